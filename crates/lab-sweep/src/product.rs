use std::collections::{BTreeMap, BTreeSet};

use serde_json::Value;

use crate::args::{check_disjoint, collapse, cross_join, ArgumentSpecifier, Batch, KeyLayout};
use crate::dynamic::DynamicSpecifier;
use crate::error::{Composition, ConfigError};
use crate::launch::{LaunchInfo, TaskId};
use crate::specifier::{split, DynamicSide, Specifier, Split};

/// Each live batch of the dynamic side crossed with the cached batch of the
/// static side. Varying keys of the two sides must be disjoint.
#[derive(Clone)]
pub struct DynamicCartesianProduct {
    side: DynamicSide,
    dynamic: Box<dyn DynamicSpecifier>,
    fixed: Box<dyn ArgumentSpecifier>,
    cached: Batch,
}

impl DynamicCartesianProduct {
    pub fn new(first: Specifier, second: Specifier) -> Result<Self, ConfigError> {
        let (first_varying, second_varying) = (first.varying_keys(), second.varying_keys());
        let Split {
            side,
            dynamic,
            fixed,
        } = split(Composition::CartesianProduct, first, second)?;
        check_disjoint(&first_varying, &second_varying)?;
        let cached = collapse(fixed.copy());
        Ok(Self {
            side,
            dynamic,
            fixed,
            cached,
        })
    }

    pub fn dynamic_side(&self) -> DynamicSide {
        self.side
    }

    fn layout(&self) -> KeyLayout {
        let dynamic = KeyLayout::of(&*self.dynamic);
        let fixed = KeyLayout::of(&*self.fixed);
        match self.side {
            DynamicSide::First => dynamic.crossed(&fixed),
            DynamicSide::Second => fixed.crossed(&dynamic),
        }
    }
}

impl Iterator for DynamicCartesianProduct {
    type Item = Batch;

    fn next(&mut self) -> Option<Batch> {
        if self.cached.is_empty() {
            return None;
        }
        let live = self.dynamic.next()?;
        let crossed = match self.side {
            DynamicSide::First => cross_join(&live, &self.cached),
            DynamicSide::Second => cross_join(&self.cached, &live),
        };
        Some(crossed)
    }
}

impl ArgumentSpecifier for DynamicCartesianProduct {
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
            DynamicSide::First => format!("({} * {})", self.dynamic.label(), self.fixed.label()),
            DynamicSide::Second => format!("({} * {})", self.fixed.label(), self.dynamic.label()),
        }
    }

    fn copy(&self) -> Box<dyn ArgumentSpecifier> {
        Box::new(self.clone())
    }
}

impl DynamicSpecifier for DynamicCartesianProduct {
    fn schedule(&self) -> Option<Vec<usize>> {
        let factor = self.cached.len();
        if factor == 0 {
            return Some(Vec::new());
        }
        let live = self.dynamic.schedule()?;
        Some(live.into_iter().map(|n| n * factor).collect())
    }

    fn update(&mut self, tids: &BTreeSet<TaskId>, info: &LaunchInfo) {
        self.dynamic.update(tids, info);
    }

    fn copy_dynamic(&self) -> Box<dyn DynamicSpecifier> {
        Box::new(self.clone())
    }
}
