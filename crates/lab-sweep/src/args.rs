use std::collections::{BTreeMap, BTreeSet};

use serde_json::Value;

use crate::error::ConfigError;

pub type ArgumentSet = BTreeMap<String, Value>;
pub type Batch = Vec<ArgumentSet>;

/// A lazily evaluated sequence of batches of argument sets.
///
/// Implementations must be fused: once `next` returns `None` it keeps
/// returning `None`.
pub trait ArgumentSpecifier: Iterator<Item = Batch> {
    fn constant_keys(&self) -> Vec<String>;

    fn varying_keys(&self) -> Vec<String>;

    fn constant_items(&self) -> BTreeMap<String, Value>;

    fn label(&self) -> String;

    /// Independent copy; iterating it never advances `self`.
    fn copy(&self) -> Box<dyn ArgumentSpecifier>;
}

impl Clone for Box<dyn ArgumentSpecifier> {
    fn clone(&self) -> Self {
        self.copy()
    }
}

/// Fully known batches of argument sets.
#[derive(Debug, Clone, PartialEq)]
pub struct StaticArgs {
    batches: Vec<Batch>,
    position: usize,
    constant_keys: Vec<String>,
    varying_keys: Vec<String>,
}

impl StaticArgs {
    pub fn new(sets: Vec<ArgumentSet>) -> Self {
        if sets.is_empty() {
            return Self::grouped(Vec::new());
        }
        Self::grouped(vec![sets])
    }

    /// One batch per group. Empty groups are dropped.
    pub fn grouped(batches: Vec<Batch>) -> Self {
        let batches: Vec<Batch> = batches.into_iter().filter(|b| !b.is_empty()).collect();
        let (constant_keys, varying_keys) = partition_keys(batches.iter().flatten());
        Self {
            batches,
            position: 0,
            constant_keys,
            varying_keys,
        }
    }

    /// A single batch assigning each of `values` to `key` in turn.
    pub fn list(key: &str, values: Vec<Value>) -> Self {
        let sets = values
            .into_iter()
            .map(|v| {
                let mut set = ArgumentSet::new();
                set.insert(key.to_string(), v);
                set
            })
            .collect();
        Self::new(sets)
    }

    pub fn empty() -> Self {
        Self::grouped(Vec::new())
    }
}

impl Iterator for StaticArgs {
    type Item = Batch;

    fn next(&mut self) -> Option<Batch> {
        let batch = self.batches.get(self.position)?.clone();
        self.position += 1;
        Some(batch)
    }
}

impl ArgumentSpecifier for StaticArgs {
    fn constant_keys(&self) -> Vec<String> {
        self.constant_keys.clone()
    }

    fn varying_keys(&self) -> Vec<String> {
        self.varying_keys.clone()
    }

    fn constant_items(&self) -> BTreeMap<String, Value> {
        let mut items = BTreeMap::new();
        if let Some(first) = self.batches.first().and_then(|b| b.first()) {
            for key in &self.constant_keys {
                if let Some(v) = first.get(key) {
                    items.insert(key.clone(), v.clone());
                }
            }
        }
        items
    }

    fn label(&self) -> String {
        "StaticArgs".to_string()
    }

    fn copy(&self) -> Box<dyn ArgumentSpecifier> {
        Box::new(self.clone())
    }
}

/// Static concatenation: every batch of `first`, then every batch of `second`.
#[derive(Clone)]
pub struct Concatenate {
    first: Box<dyn ArgumentSpecifier>,
    second: Box<dyn ArgumentSpecifier>,
}

impl Concatenate {
    pub fn new(first: Box<dyn ArgumentSpecifier>, second: Box<dyn ArgumentSpecifier>) -> Self {
        Self { first, second }
    }
}

impl Iterator for Concatenate {
    type Item = Batch;

    fn next(&mut self) -> Option<Batch> {
        self.first.next().or_else(|| self.second.next())
    }
}

impl Concatenate {
    fn layout(&self) -> KeyLayout {
        KeyLayout::of(&*self.first).chained(&KeyLayout::of(&*self.second))
    }
}

impl ArgumentSpecifier for Concatenate {
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
        format!("({} + {})", self.first.label(), self.second.label())
    }

    fn copy(&self) -> Box<dyn ArgumentSpecifier> {
        Box::new(self.clone())
    }
}

/// Static cartesian product. Both sides are known up front, so each is
/// collapsed into a single batch and the result is one crossed batch.
#[derive(Clone)]
pub struct CartesianProduct {
    first: Box<dyn ArgumentSpecifier>,
    second: Box<dyn ArgumentSpecifier>,
    done: bool,
}

impl CartesianProduct {
    pub fn new(
        first: Box<dyn ArgumentSpecifier>,
        second: Box<dyn ArgumentSpecifier>,
    ) -> Result<Self, ConfigError> {
        check_disjoint(&first.varying_keys(), &second.varying_keys())?;
        Ok(Self {
            first,
            second,
            done: false,
        })
    }
}

impl Iterator for CartesianProduct {
    type Item = Batch;

    fn next(&mut self) -> Option<Batch> {
        if self.done {
            return None;
        }
        self.done = true;
        let first = collapse(self.first.copy());
        let second = collapse(self.second.copy());
        let crossed = cross_join(&first, &second);
        if crossed.is_empty() {
            return None;
        }
        Some(crossed)
    }
}

impl CartesianProduct {
    fn layout(&self) -> KeyLayout {
        KeyLayout::of(&*self.first).crossed(&KeyLayout::of(&*self.second))
    }
}

impl ArgumentSpecifier for CartesianProduct {
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
        format!("({} * {})", self.first.label(), self.second.label())
    }

    fn copy(&self) -> Box<dyn ArgumentSpecifier> {
        Box::new(self.clone())
    }
}

/// Drains a specifier and flattens everything it yields into one batch.
pub fn collapse<I>(specifier: I) -> Batch
where
    I: IntoIterator<Item = Batch>,
{
    specifier.into_iter().flatten().collect()
}

/// Every set of `outer` merged with every set of `inner`; `outer` varies slowest.
pub fn cross_join(outer: &[ArgumentSet], inner: &[ArgumentSet]) -> Batch {
    let mut out = Vec::with_capacity(outer.len() * inner.len());
    for a in outer {
        for b in inner {
            let mut merged = a.clone();
            merged.extend(b.iter().map(|(k, v)| (k.clone(), v.clone())));
            out.push(merged);
        }
    }
    out
}

pub fn union_keys(a: &[String], b: &[String]) -> Vec<String> {
    let set: BTreeSet<&String> = a.iter().chain(b.iter()).collect();
    set.into_iter().cloned().collect()
}

/// Constant and varying keys of a specifier, with the constant values that
/// are known. The two key lists never share a key.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct KeyLayout {
    pub constant: Vec<String>,
    pub varying: Vec<String>,
    pub items: BTreeMap<String, Value>,
}

impl KeyLayout {
    pub fn of<S: ArgumentSpecifier + ?Sized>(spec: &S) -> Self {
        Self {
            constant: spec.constant_keys(),
            varying: spec.varying_keys(),
            items: spec.constant_items(),
        }
    }

    fn all_keys(&self) -> Vec<String> {
        union_keys(&self.constant, &self.varying)
    }

    /// Keys of `self` followed by `other`. A key stays constant only when
    /// both sides hold it constant at the same value.
    pub fn chained(&self, other: &KeyLayout) -> KeyLayout {
        let constant: Vec<String> = self
            .constant
            .iter()
            .filter(|k| other.constant.contains(k) && self.items.get(*k) == other.items.get(*k))
            .cloned()
            .collect();
        let varying = union_keys(&self.all_keys(), &other.all_keys())
            .into_iter()
            .filter(|k| !constant.contains(k))
            .collect();
        let items = self
            .items
            .iter()
            .filter(|(k, _)| constant.contains(k))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        KeyLayout {
            constant,
            varying,
            items,
        }
    }

    /// Keys of every set of `self` merged with every set of `other`, where
    /// `other` wins on shared keys.
    pub fn crossed(&self, other: &KeyLayout) -> KeyLayout {
        let outer_varying: Vec<String> = self
            .varying
            .iter()
            .filter(|k| !other.constant.contains(k))
            .cloned()
            .collect();
        let varying = union_keys(&outer_varying, &other.varying);
        let constant: Vec<String> = union_keys(&self.constant, &other.constant)
            .into_iter()
            .filter(|k| !varying.contains(k))
            .collect();
        let mut items = self.items.clone();
        items.extend(other.items.clone());
        items.retain(|k, _| constant.contains(k));
        KeyLayout {
            constant,
            varying,
            items,
        }
    }
}

pub(crate) fn check_disjoint(a: &[String], b: &[String]) -> Result<(), ConfigError> {
    let a: BTreeSet<&String> = a.iter().collect();
    let overlap: Vec<String> = b
        .iter()
        .filter(|k| a.contains(k))
        .cloned()
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect();
    if overlap.is_empty() {
        Ok(())
    } else {
        Err(ConfigError::KeyOverlap { keys: overlap })
    }
}

/// Splits the keys of `sets` into (constant, varying). A key is constant when
/// every set carries it with the same value.
fn partition_keys<'a, I>(sets: I) -> (Vec<String>, Vec<String>)
where
    I: IntoIterator<Item = &'a ArgumentSet>,
{
    let mut seen: BTreeMap<&'a String, Option<&'a Value>> = BTreeMap::new();
    let mut count = 0usize;
    let mut present: BTreeMap<&'a String, usize> = BTreeMap::new();
    for set in sets {
        count += 1;
        for (k, v) in set {
            *present.entry(k).or_insert(0) += 1;
            let entry = seen.entry(k).or_insert(Some(v));
            if matches!(*entry, Some(prev) if prev != v) {
                *entry = None;
            }
        }
    }
    let mut constant = Vec::new();
    let mut varying = Vec::new();
    for (k, v) in seen {
        if v.is_some() && present.get(k) == Some(&count) {
            constant.push(k.clone());
        } else {
            varying.push(k.clone());
        }
    }
    (constant, varying)
}
