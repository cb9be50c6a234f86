use super::heuristics::{patch_for_entity_constructor, patch_for_module_constructor};
use super::{Callouts, ClassPatch, FieldPatch, MethodForward, MethodPatch, MethodRef};
use crate::jvm::BinaryName;
use dashmap::{DashMap, DashSet};
use log::debug;
use std::sync::atomic::{AtomicU32, Ordering};

/// Source of the rules applied to classes as they are loaded
///
/// Implementations are shared by every loading thread, so every operation must be safe to call
/// concurrently. Registration must be idempotent: registering the same rule twice (possibly from
/// two threads racing to load related classes) leaves the catalog as if it had happened once.
pub trait RuleCatalog: Send + Sync {
    /// Snapshot of the rule for a class
    fn for_class(&self, class_name: &str) -> Option<ClassPatch>;

    /// Mark the scenario stack as initializing for the duration of every constructor
    fn register_entity_constructor(&self, class_name: &BinaryName);

    /// Bracket every constructor of a module
    fn register_module_constructor(&self, class_name: &BinaryName);

    /// Has this module been opted out of constructor bracketing?
    fn is_module_excluded(&self, class_name: &str) -> bool;

    /// Correlation ID of a method
    ///
    /// IDs start at 1 and are handed out in increasing order, exactly once per method.
    fn allocate_id(&self, method: &MethodRef) -> u32;
}

/// Rule catalog kept in memory for the lifetime of the process
pub struct InMemoryCatalog {
    rules: DashMap<String, ClassPatch>,
    excluded_modules: DashSet<String>,
    ids: DashMap<MethodRef, u32>,
    next_id: AtomicU32,
    callouts: Callouts,
}

impl Default for InMemoryCatalog {
    fn default() -> InMemoryCatalog {
        InMemoryCatalog::new(Callouts::default())
    }
}

impl InMemoryCatalog {
    pub fn new(callouts: Callouts) -> InMemoryCatalog {
        InMemoryCatalog {
            rules: DashMap::new(),
            excluded_modules: DashSet::new(),
            ids: DashMap::new(),
            next_id: AtomicU32::new(1),
            callouts,
        }
    }

    /// Set the whole rule for a class
    pub fn insert(&self, class_name: &str, patch: ClassPatch) {
        self.rules.insert(class_name.to_owned(), patch);
    }

    /// Merge a method rule into the rule for its class, creating that rule if needed
    pub fn add_method_patch(&self, patch: MethodPatch) {
        let class_name = patch.from.class.to_string();
        let mut rule = self.rules.entry(class_name).or_default();
        if rule.add_method_patch(patch) {
            debug!("registered method rule in {:?}", rule.key());
        }
    }

    /// Merge a field addition into the rule for a class, creating that rule if needed
    pub fn add_field_patch(&self, class_name: &str, field: FieldPatch) {
        self.rules
            .entry(class_name.to_owned())
            .or_default()
            .add_field_patch(field);
    }

    /// Set the method forward of a class, creating its rule if needed
    pub fn set_method_forward(&self, forward: MethodForward) {
        let class_name = forward.from.class.to_string();
        self.rules.entry(class_name).or_default().method_forward = Some(forward);
    }

    /// Update the rule for a class in place, creating it if needed
    pub fn update(&self, class_name: &str, update: impl FnOnce(&mut ClassPatch)) {
        update(&mut self.rules.entry(class_name.to_owned()).or_default());
    }

    pub fn exclude_module(&self, class_name: &str) {
        self.excluded_modules.insert(class_name.to_owned());
    }
}

impl RuleCatalog for InMemoryCatalog {
    fn for_class(&self, class_name: &str) -> Option<ClassPatch> {
        self.rules.get(class_name).map(|rule| rule.value().clone())
    }

    fn register_entity_constructor(&self, class_name: &BinaryName) {
        self.add_method_patch(patch_for_entity_constructor(&self.callouts, class_name));
    }

    fn register_module_constructor(&self, class_name: &BinaryName) {
        self.add_method_patch(patch_for_module_constructor(&self.callouts, class_name));
    }

    fn is_module_excluded(&self, class_name: &str) -> bool {
        self.excluded_modules.contains(class_name)
    }

    fn allocate_id(&self, method: &MethodRef) -> u32 {
        if let Some(id) = self.ids.get(method) {
            return *id;
        }
        // The entry holds the shard lock, so only one thread ever draws an ID for `method`
        *self
            .ids
            .entry(method.clone())
            .or_insert_with(|| self.next_id.fetch_add(1, Ordering::Relaxed))
    }
}
