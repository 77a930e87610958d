use std::collections::{BTreeMap, BTreeSet};

use serde_json::Value;
use tracing::debug;

use crate::args::{collapse, ArgumentSpecifier, Batch, KeyLayout};
use crate::dynamic::DynamicSpecifier;
use crate::error::{Composition, ConfigError};
use crate::launch::{LaunchInfo, TaskId};
use crate::specifier::{split, DynamicSide, Specifier, Split};

/// All batches of `first`, then all batches of `second`, where exactly one
/// side is dynamic. The static side is collapsed into one batch up front.
#[derive(Clone)]
pub struct DynamicConcatenate {
    side: DynamicSide,
    dynamic: Box<dyn DynamicSpecifier>,
    fixed: Box<dyn ArgumentSpecifier>,
    cached: Batch,
    cached_sent: bool,
    dynamic_exhausted: bool,
    last_from_dynamic: bool,
}

impl DynamicConcatenate {
    pub fn new(first: Specifier, second: Specifier) -> Result<Self, ConfigError> {
        let Split {
            side,
            dynamic,
            fixed,
        } = split(Composition::Concatenate, first, second)?;
        let cached = collapse(fixed.copy());
        Ok(Self {
            side,
            dynamic,
            fixed,
            cached,
            cached_sent: false,
            dynamic_exhausted: false,
            last_from_dynamic: false,
        })
    }

    pub fn dynamic_side(&self) -> DynamicSide {
        self.side
    }

    /// Feedback only matters for a batch the dynamic side produced.
    fn dynamic_active(&self) -> bool {
        self.last_from_dynamic && !self.dynamic_exhausted
    }

    fn layout(&self) -> KeyLayout {
        let dynamic = KeyLayout::of(&*self.dynamic);
        let fixed = KeyLayout::of(&*self.fixed);
        match self.side {
            DynamicSide::First => dynamic.chained(&fixed),
            DynamicSide::Second => fixed.chained(&dynamic),
        }
    }

    fn take_cached(&mut self) -> Option<Batch> {
        if self.cached_sent {
            return None;
        }
        self.cached_sent = true;
        if self.cached.is_empty() {
            return None;
        }
        Some(self.cached.clone())
    }

    fn pull_dynamic(&mut self) -> Option<Batch> {
        if self.dynamic_exhausted {
            return None;
        }
        let batch = self.dynamic.next();
        if batch.is_none() {
            self.dynamic_exhausted = true;
        }
        batch
    }
}

impl Iterator for DynamicConcatenate {
    type Item = Batch;

    fn next(&mut self) -> Option<Batch> {
        let (batch, from_dynamic) = match self.side {
            DynamicSide::First => match self.pull_dynamic() {
                Some(batch) => (Some(batch), true),
                None => (self.take_cached(), false),
            },
            DynamicSide::Second => match self.take_cached() {
                Some(batch) => (Some(batch), false),
                None => (self.pull_dynamic(), true),
            },
        };
        self.last_from_dynamic = batch.is_some() && from_dynamic;
        batch
    }
}

impl ArgumentSpecifier for DynamicConcatenate {
    fn constant_keys(&self) -> Vec<String> {
        self.layout().constant
    }

    fn varying_keys(&self) -> Vec<String> {
        self.layout().varying
    }

    fn constant_items(&self) -> BTreeMap<String, Value> {
        self.layout().items
    }

    fn label(&self) -> String {
        match self.side {
            DynamicSide::First => format!("({} + {})", self.dynamic.label(), self.fixed.label()),
            DynamicSide::Second => format!("({} + {})", self.fixed.label(), self.dynamic.label()),
        }
    }

    fn copy(&self) -> Box<dyn ArgumentSpecifier> {
        Box::new(self.clone())
    }
}

impl DynamicSpecifier for DynamicConcatenate {
    fn schedule(&self) -> Option<Vec<usize>> {
        let live = if self.dynamic_exhausted {
            Vec::new()
        } else {
            self.dynamic.schedule()?
        };
        let pending: Vec<usize> = if self.cached_sent || self.cached.is_empty() {
            Vec::new()
        } else {
            vec![self.cached.len()]
        };
        let schedule = match self.side {
            DynamicSide::First => live.into_iter().chain(pending).collect(),
            DynamicSide::Second => pending.into_iter().chain(live).collect(),
        };
        Some(schedule)
    }

    fn update(&mut self, tids: &BTreeSet<TaskId>, info: &LaunchInfo) {
        if !self.dynamic_active() {
            debug!(side = ?self.side, "dynamic side inactive; ignoring update");
            return;
        }
        self.dynamic.update(tids, info);
    }

    fn copy_dynamic(&self) -> Box<dyn DynamicSpecifier> {
        Box::new(self.clone())
    }
}
