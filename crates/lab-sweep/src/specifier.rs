use std::collections::{BTreeMap, BTreeSet};

use serde_json::Value;
use tracing::debug;

use crate::args::{collapse, ArgumentSpecifier, Batch, CartesianProduct, Concatenate, StaticArgs};
use crate::concat::DynamicConcatenate;
use crate::dynamic::DynamicSpecifier;
use crate::error::{Composition, ConfigError};
use crate::launch::{LaunchInfo, TaskId};
use crate::product::DynamicCartesianProduct;
use crate::show::render_batches;

/// Which child of a dynamic combinator is the adaptive one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DynamicSide {
    First,
    Second,
}

/// Either a fully known specifier or one that needs feedback to progress.
#[derive(Clone)]
pub enum Specifier {
    Static(Box<dyn ArgumentSpecifier>),
    Dynamic(Box<dyn DynamicSpecifier>),
}

impl Specifier {
    pub fn from_static<T: ArgumentSpecifier + 'static>(spec: T) -> Self {
        Specifier::Static(Box::new(spec))
    }

    pub fn from_dynamic<T: DynamicSpecifier + 'static>(spec: T) -> Self {
        Specifier::Dynamic(Box::new(spec))
    }

    pub fn empty() -> Self {
        Specifier::from_static(StaticArgs::empty())
    }

    pub fn is_dynamic(&self) -> bool {
        matches!(self, Specifier::Dynamic(_))
    }

    /// Only a static specifier can be known to produce nothing.
    pub fn is_empty(&self) -> bool {
        match self {
            Specifier::Static(spec) => collapse(spec.copy()).is_empty(),
            Specifier::Dynamic(_) => false,
        }
    }

    pub fn label(&self) -> String {
        match self {
            Specifier::Static(spec) => spec.label(),
            Specifier::Dynamic(spec) => spec.label(),
        }
    }

    pub fn constant_keys(&self) -> Vec<String> {
        match self {
            Specifier::Static(spec) => spec.constant_keys(),
            Specifier::Dynamic(spec) => spec.constant_keys(),
        }
    }

    pub fn varying_keys(&self) -> Vec<String> {
        match self {
            Specifier::Static(spec) => spec.varying_keys(),
            Specifier::Dynamic(spec) => spec.varying_keys(),
        }
    }

    pub fn constant_items(&self) -> BTreeMap<String, Value> {
        match self {
            Specifier::Static(spec) => spec.constant_items(),
            Specifier::Dynamic(spec) => spec.constant_items(),
        }
    }

    /// Static specifiers always know their remaining batch sizes.
    pub fn schedule(&self) -> Option<Vec<usize>> {
        match self {
            Specifier::Static(spec) => Some(spec.copy().map(|b| b.len()).collect()),
            Specifier::Dynamic(spec) => spec.schedule(),
        }
    }

    pub fn update(&mut self, tids: &BTreeSet<TaskId>, info: &LaunchInfo) {
        match self {
            Specifier::Static(_) => debug!("update on a static specifier ignored"),
            Specifier::Dynamic(spec) => spec.update(tids, info),
        }
    }

    /// The batches a copy of this specifier yields right now. For a dynamic
    /// specifier that stops at the first batch that needs feedback.
    pub fn preview(&self) -> Vec<Batch> {
        self.clone().collect()
    }

    pub fn render(&self) -> String {
        let mut ordering = self.constant_keys();
        ordering.extend(self.varying_keys());
        let mut out = render_batches(&self.preview(), &ordering);
        if self.is_dynamic() {
            out.push_str(&format!(
                "Remaining arguments not available for {}\n",
                self.label()
            ));
        }
        out
    }

    pub fn show(&self) {
        print!("{}", self.render());
    }

    pub fn concatenate(self, other: Option<Specifier>) -> Result<Specifier, ConfigError> {
        concatenate(self, other)
    }

    pub fn cross_product(self, other: Option<Specifier>) -> Result<Specifier, ConfigError> {
        cross_product(self, other)
    }
}

impl Iterator for Specifier {
    type Item = Batch;

    fn next(&mut self) -> Option<Batch> {
        match self {
            Specifier::Static(spec) => spec.next(),
            Specifier::Dynamic(spec) => spec.next(),
        }
    }
}

/// `first` followed by `second`. An absent or empty `second` leaves `first` unchanged.
pub fn concatenate(first: Specifier, second: Option<Specifier>) -> Result<Specifier, ConfigError> {
    let second = match second {
        Some(s) if !s.is_empty() => s,
        _ => return Ok(first),
    };
    match (first, second) {
        (Specifier::Static(a), Specifier::Static(b)) => {
            Ok(Specifier::from_static(Concatenate::new(a, b)))
        }
        (first, second) => Ok(Specifier::from_dynamic(DynamicConcatenate::new(first, second)?)),
    }
}

/// Cartesian product of `first` and `second`. An absent operand, or one
/// known to be empty, yields an empty specifier.
pub fn cross_product(first: Specifier, second: Option<Specifier>) -> Result<Specifier, ConfigError> {
    let second = match second {
        Some(s) if !s.is_empty() && !first.is_empty() => s,
        _ => return Ok(Specifier::empty()),
    };
    match (first, second) {
        (Specifier::Static(a), Specifier::Static(b)) => {
            Ok(Specifier::from_static(CartesianProduct::new(a, b)?))
        }
        (first, second) => Ok(Specifier::from_dynamic(DynamicCartesianProduct::new(
            first, second,
        )?)),
    }
}

pub(crate) struct Split {
    pub side: DynamicSide,
    pub dynamic: Box<dyn DynamicSpecifier>,
    pub fixed: Box<dyn ArgumentSpecifier>,
}

/// Resolves which child is dynamic, once, at construction.
pub(crate) fn split(
    operation: Composition,
    first: Specifier,
    second: Specifier,
) -> Result<Split, ConfigError> {
    match (first, second) {
        (Specifier::Dynamic(dynamic), Specifier::Static(fixed)) => Ok(Split {
            side: DynamicSide::First,
            dynamic,
            fixed,
        }),
        (Specifier::Static(fixed), Specifier::Dynamic(dynamic)) => Ok(Split {
            side: DynamicSide::Second,
            dynamic,
            fixed,
        }),
        (Specifier::Dynamic(a), Specifier::Dynamic(b)) => Err(ConfigError::BothDynamic {
            operation,
            first: a.label(),
            second: b.label(),
        }),
        (Specifier::Static(_), Specifier::Static(_)) => {
            Err(ConfigError::NoDynamicSide { operation })
        }
    }
}
