//! Metric family registry.
//!
//! The registry owns one gauge family per probe. Each family carries its own
//! `RwLock`, so writers to different families never contend, and a scrape
//! only ever holds one family's read lock at a time while it copies that
//! family out.
//!
//! The set of families is fixed once [`RegistryBuilder::build`] returns:
//! lookups afterwards go through an immutable map shared by `Arc`.

mod encode;

pub use encode::{CONTENT_TYPE, MetricKind, TextEncoder, encode_families};

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

/// Error type for registry operations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RegistryError {
    /// A family with this name was already registered.
    DuplicateFamily(String),
    /// No family with this name exists.
    UnknownFamily(String),
    /// A label tuple does not match the family's label schema.
    LabelArity {
        family: String,
        expected: usize,
        actual: usize,
    },
    /// A family or label name is not a valid exposition identifier.
    InvalidName(String),
}

impl std::fmt::Display for RegistryError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RegistryError::DuplicateFamily(name) => {
                write!(f, "metric family '{}' registered twice", name)
            }
            RegistryError::UnknownFamily(name) => write!(f, "unknown metric family '{}'", name),
            RegistryError::LabelArity {
                family,
                expected,
                actual,
            } => write!(
                f,
                "family '{}' expects {} label values, got {}",
                family, expected, actual
            ),
            RegistryError::InvalidName(name) => write!(f, "invalid metric or label name '{}'", name),
        }
    }
}

impl std::error::Error for RegistryError {}

/// Label values of one series, ordered by the family's label names.
///
/// Equality is structural over all values; values are compared as exact
/// strings with no normalization.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct LabelTuple(Vec<String>);

impl LabelTuple {
    pub fn new<I, S>(values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self(values.into_iter().map(Into::into).collect())
    }

    pub fn values(&self) -> &[String] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl<const N: usize> From<[&str; N]> for LabelTuple {
    fn from(values: [&str; N]) -> Self {
        Self::new(values)
    }
}

/// Static description of a metric family: name, help text, label schema.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FamilyDesc {
    name: String,
    help: String,
    label_names: Vec<String>,
}

impl FamilyDesc {
    pub fn new(name: impl Into<String>, help: impl Into<String>, label_names: &[&str]) -> Self {
        Self {
            name: name.into(),
            help: help.into(),
            label_names: label_names.iter().map(|l| l.to_string()).collect(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn help(&self) -> &str {
        &self.help
    }

    pub fn label_names(&self) -> &[String] {
        &self.label_names
    }

    fn validate(&self) -> Result<(), RegistryError> {
        if !is_valid_metric_name(&self.name) {
            return Err(RegistryError::InvalidName(self.name.clone()));
        }
        let mut seen = BTreeSet::new();
        for label in &self.label_names {
            if !is_valid_label_name(label) || !seen.insert(label.as_str()) {
                return Err(RegistryError::InvalidName(format!("{}:{}", self.name, label)));
            }
        }
        Ok(())
    }
}

fn is_valid_metric_name(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' || c == ':' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_' || c == ':')
}

fn is_valid_label_name(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    !name.starts_with("__") && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

/// Value of one series plus the generation that last observed it.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Series {
    pub value: f64,
    pub generation: u64,
}

/// Mutable contents of a family, guarded by the family lock.
#[derive(Debug, Default)]
pub(crate) struct FamilyState {
    pub(crate) series: HashMap<LabelTuple, Series>,
    /// Highest generation committed or retired for this family.
    pub(crate) generation: u64,
}

/// One named gauge collection.
#[derive(Debug)]
pub struct MetricFamily {
    desc: Arc<FamilyDesc>,
    state: RwLock<FamilyState>,
}

impl MetricFamily {
    fn new(desc: FamilyDesc) -> Self {
        Self {
            desc: Arc::new(desc),
            state: RwLock::new(FamilyState::default()),
        }
    }

    pub fn desc(&self) -> &FamilyDesc {
        &self.desc
    }

    pub fn name(&self) -> &str {
        self.desc.name()
    }

    /// Inserts or updates one series. The series is stamped with the
    /// family's current generation.
    pub fn set(&self, tuple: LabelTuple, value: f64) -> Result<(), RegistryError> {
        self.check_arity(&tuple)?;
        let mut state = self.write();
        let generation = state.generation;
        state.series.insert(tuple, Series { value, generation });
        Ok(())
    }

    /// Removes one series. Returns `true` if it was present.
    pub fn delete_tuple(&self, tuple: &LabelTuple) -> bool {
        self.write().series.remove(tuple).is_some()
    }

    /// Returns the label tuples currently present, for diffing.
    pub fn snapshot_tuples(&self) -> BTreeSet<LabelTuple> {
        self.read().series.keys().cloned().collect()
    }

    /// Returns the value of one series, if present.
    pub fn get(&self, tuple: &LabelTuple) -> Option<Series> {
        self.read().series.get(tuple).copied()
    }

    /// Number of series currently present.
    pub fn len(&self) -> usize {
        self.read().series.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Highest generation committed or retired so far.
    pub fn generation(&self) -> u64 {
        self.read().generation
    }

    /// Marks `generation` as finished without data. Any snapshot carrying
    /// this generation or an older one is rejected afterwards.
    pub fn retire_generation(&self, generation: u64) {
        let mut state = self.write();
        state.generation = state.generation.max(generation);
    }

    /// Copies the family out under its read lock, then sorts outside it.
    pub fn view(&self) -> FamilyView {
        let mut series: Vec<(LabelTuple, f64)> = {
            let state = self.read();
            state
                .series
                .iter()
                .map(|(tuple, s)| (tuple.clone(), s.value))
                .collect()
        };
        series.sort_by(|a, b| a.0.cmp(&b.0));
        FamilyView {
            desc: Arc::clone(&self.desc),
            series,
        }
    }

    pub(crate) fn check_arity(&self, tuple: &LabelTuple) -> Result<(), RegistryError> {
        let expected = self.desc.label_names.len();
        if tuple.len() != expected {
            return Err(RegistryError::LabelArity {
                family: self.desc.name.clone(),
                expected,
                actual: tuple.len(),
            });
        }
        Ok(())
    }

    pub(crate) fn write(&self) -> RwLockWriteGuard<'_, FamilyState> {
        self.state.write().unwrap_or_else(PoisonError::into_inner)
    }

    fn read(&self) -> RwLockReadGuard<'_, FamilyState> {
        self.state.read().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Point-in-time copy of one family, detached from its lock.
#[derive(Debug, Clone)]
pub struct FamilyView {
    desc: Arc<FamilyDesc>,
    series: Vec<(LabelTuple, f64)>,
}

impl FamilyView {
    pub fn desc(&self) -> &FamilyDesc {
        &self.desc
    }

    /// Series sorted by label tuple.
    pub fn series(&self) -> &[(LabelTuple, f64)] {
        &self.series
    }
}

/// Collects family registrations at startup.
#[derive(Debug, Default)]
pub struct RegistryBuilder {
    families: BTreeMap<String, Arc<MetricFamily>>,
}

impl RegistryBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a family. A name registered twice is a configuration error.
    pub fn register(&mut self, desc: FamilyDesc) -> Result<Arc<MetricFamily>, RegistryError> {
        desc.validate()?;
        if self.families.contains_key(desc.name()) {
            return Err(RegistryError::DuplicateFamily(desc.name().to_string()));
        }
        let family = Arc::new(MetricFamily::new(desc));
        self.families
            .insert(family.name().to_string(), Arc::clone(&family));
        Ok(family)
    }

    pub fn build(self) -> Registry {
        Registry {
            families: Arc::new(self.families),
        }
    }
}

/// Frozen set of metric families, cheap to clone and share.
#[derive(Debug, Clone, Default)]
pub struct Registry {
    families: Arc<BTreeMap<String, Arc<MetricFamily>>>,
}

impl Registry {
    pub fn builder() -> RegistryBuilder {
        RegistryBuilder::new()
    }

    pub fn family(&self, name: &str) -> Option<&Arc<MetricFamily>> {
        self.families.get(name)
    }

    /// Families in name order.
    pub fn families(&self) -> impl Iterator<Item = &Arc<MetricFamily>> {
        self.families.values()
    }

    pub fn set(&self, family: &str, tuple: LabelTuple, value: f64) -> Result<(), RegistryError> {
        self.lookup(family)?.set(tuple, value)
    }

    pub fn delete_tuple(&self, family: &str, tuple: &LabelTuple) -> Result<bool, RegistryError> {
        Ok(self.lookup(family)?.delete_tuple(tuple))
    }

    pub fn snapshot_tuples(&self, family: &str) -> Result<BTreeSet<LabelTuple>, RegistryError> {
        Ok(self.lookup(family)?.snapshot_tuples())
    }

    /// Copies every family out, one family lock at a time.
    pub fn export(&self) -> Vec<FamilyView> {
        self.families.values().map(|f| f.view()).collect()
    }

    fn lookup(&self, family: &str) -> Result<&Arc<MetricFamily>, RegistryError> {
        self.families
            .get(family)
            .ok_or_else(|| RegistryError::UnknownFamily(family.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn process_desc() -> FamilyDesc {
        FamilyDesc::new(
            "system_process_info",
            "Information about running processes",
            &["pid", "name", "user"],
        )
    }

    #[test]
    fn test_register_duplicate_family() {
        let mut builder = Registry::builder();
        builder.register(process_desc()).unwrap();
        let err = builder.register(process_desc()).unwrap_err();
        assert_eq!(
            err,
            RegistryError::DuplicateFamily("system_process_info".to_string())
        );
    }

    #[test]
    fn test_register_invalid_names() {
        let mut builder = Registry::builder();
        let bad_family = FamilyDesc::new("1bad", "", &[]);
        assert!(matches!(
            builder.register(bad_family),
            Err(RegistryError::InvalidName(_))
        ));

        let bad_label = FamilyDesc::new("good_name", "", &["ok", "not-ok"]);
        assert!(matches!(
            builder.register(bad_label),
            Err(RegistryError::InvalidName(_))
        ));

        let repeated = FamilyDesc::new("good_name", "", &["pid", "pid"]);
        assert!(matches!(
            builder.register(repeated),
            Err(RegistryError::InvalidName(_))
        ));
    }

    #[test]
    fn test_set_delete_snapshot() {
        let mut builder = Registry::builder();
        builder.register(process_desc()).unwrap();
        let registry = builder.build();

        let init = LabelTuple::from(["1", "init", "root"]);
        let sshd = LabelTuple::from(["42", "sshd", "root"]);
        registry
            .set("system_process_info", init.clone(), 1.0)
            .unwrap();
        registry
            .set("system_process_info", sshd.clone(), 1.0)
            .unwrap();

        let tuples = registry.snapshot_tuples("system_process_info").unwrap();
        assert_eq!(tuples.len(), 2);

        assert!(registry.delete_tuple("system_process_info", &sshd).unwrap());
        assert!(!registry.delete_tuple("system_process_info", &sshd).unwrap());

        let tuples = registry.snapshot_tuples("system_process_info").unwrap();
        assert_eq!(tuples.into_iter().collect::<Vec<_>>(), vec![init]);
    }

    #[test]
    fn test_set_rejects_wrong_arity() {
        let mut builder = Registry::builder();
        let family = builder.register(process_desc()).unwrap();

        let err = family.set(LabelTuple::from(["1", "init"]), 1.0).unwrap_err();
        assert_eq!(
            err,
            RegistryError::LabelArity {
                family: "system_process_info".to_string(),
                expected: 3,
                actual: 2,
            }
        );
        assert!(family.is_empty());
    }

    #[test]
    fn test_unknown_family() {
        let registry = Registry::builder().build();
        let err = registry
            .set("missing", LabelTuple::from(["x"]), 1.0)
            .unwrap_err();
        assert_eq!(err, RegistryError::UnknownFamily("missing".to_string()));
    }

    #[test]
    fn test_export_is_sorted_and_detached() {
        let mut builder = Registry::builder();
        let family = builder.register(process_desc()).unwrap();
        builder
            .register(FamilyDesc::new("system_os_info", "OS", &["os_name"]))
            .unwrap();
        let registry = builder.build();

        family.set(LabelTuple::from(["99", "cron", "root"]), 1.0).unwrap();
        family.set(LabelTuple::from(["1", "init", "root"]), 1.0).unwrap();

        let views = registry.export();
        assert_eq!(views.len(), 2);
        assert_eq!(views[0].desc().name(), "system_os_info");
        let process_view = &views[1];
        assert_eq!(process_view.series()[0].0.values()[0], "1");
        assert_eq!(process_view.series()[1].0.values()[0], "99");

        // A later write must not leak into an already taken view.
        family.set(LabelTuple::from(["7", "late", "root"]), 1.0).unwrap();
        assert_eq!(process_view.series().len(), 2);
    }

    #[test]
    fn test_retire_generation_is_monotonic() {
        let mut builder = Registry::builder();
        let family = builder.register(process_desc()).unwrap();
        family.retire_generation(5);
        family.retire_generation(3);
        assert_eq!(family.generation(), 5);
    }
}
