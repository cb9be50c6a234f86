use super::CallTarget;
use crate::jvm::BinaryName;

pub struct Settings {
    /// Register the entity constructor rule for every type the oracle calls an entity
    pub instrument_all_entities: bool,

    /// Forward `hashCode()I` of plain classes to [`Callouts::hash_code`]
    pub instrument_all_hash_codes: bool,

    /// Cache `apply` on every entity companion
    pub instrument_all_entity_applies: bool,

    /// Bracket constructors and `$lzycompute` methods of every module type
    pub instrument_all_module_constructors: bool,

    /// Runtime class of the value a caching prefix hands back
    ///
    /// Only its `hasResult:Z` and `result:Ljava/lang/Object;` fields are used.
    pub cached_value_class: BinaryName,

    /// Parameter type of the synthesized `equalsForCachingInternal` override
    pub entity_class: BinaryName,

    /// Interface implemented by entity companions
    pub entity_companion_base: BinaryName,

    /// Uninhabited type, which a traced getter never returns
    pub nothing_class: BinaryName,

    /// Class name prefixes whose `hashCode` is never forwarded
    pub hash_code_excluded_prefixes: Vec<String>,

    /// Class name prefix of runtime library modules, which are never bracketed
    pub module_excluded_prefix: String,

    /// Static methods called by the injected code
    pub callouts: Callouts,
}

impl Settings {
    /// Is any of the global modes enabled?
    ///
    /// When none are, classes without an explicit rule are passed through without parsing them.
    pub fn any_global_mode(&self) -> bool {
        self.instrument_all_entities
            || self.instrument_all_hash_codes
            || self.instrument_all_entity_applies
            || self.instrument_all_module_constructors
    }
}

impl Default for Settings {
    fn default() -> Settings {
        Settings {
            instrument_all_entities: false,
            instrument_all_hash_codes: false,
            instrument_all_entity_applies: false,
            instrument_all_module_constructors: false,
            cached_value_class: BinaryName::name("optimus/debug/CachedValue"),
            entity_class: BinaryName::name("optimus/platform/storable/Entity"),
            entity_companion_base: BinaryName::name("optimus/platform/storable/EntityCompanionBase"),
            nothing_class: BinaryName::name("scala/runtime/Nothing$"),
            hash_code_excluded_prefixes: vec![
                String::from("scala/reflect"),
                String::from("sun/"),
                String::from("java/security"),
            ],
            module_excluded_prefix: String::from("scala"),
            callouts: Callouts::default(),
        }
    }
}

/// Hook targets used by the rules built from heuristics and global modes
///
/// Each descriptor given here overrides the inferred one at the call site.
#[derive(Clone, Debug)]
pub struct Callouts {
    /// Identity-preserving `hashCode` implementation, called as `(Ljava/lang/Object;)I`
    pub hash_code: CallTarget,

    /// Cache lookup before a factory method runs
    pub cache_lookup: CallTarget,

    /// Cache population after a factory method returns
    pub cache_store: CallTarget,

    /// Reports a getter's value as an observable computation
    pub trace_as_node: CallTarget,

    pub lzy_compute_enter: CallTarget,
    pub lzy_compute_exit: CallTarget,

    /// Marks the scenario stack as initializing while an entity constructor runs
    pub entity_constructor_enter: CallTarget,
    pub entity_constructor_exit: CallTarget,

    pub module_constructor_enter: CallTarget,
    pub module_constructor_exit: CallTarget,
}

impl Default for Callouts {
    fn default() -> Callouts {
        let callout = |method: &str, descriptor: Option<&str>| CallTarget {
            class: BinaryName::name("optimus/debug/InstrumentedCallouts"),
            method: method.to_owned(),
            descriptor: descriptor.map(str::to_owned),
        };
        Callouts {
            hash_code: CallTarget {
                class: BinaryName::name("optimus/debug/InstrumentedHashCodes"),
                method: String::from("hashCode"),
                descriptor: Some(String::from("(Ljava/lang/Object;)I")),
            },
            cache_lookup: callout(
                "getCachedValue",
                Some("(ILjava/lang/Object;[Ljava/lang/Object;)Loptimus/debug/CachedValue;"),
            ),
            cache_store: callout(
                "setCachedValue",
                Some("(Ljava/lang/Object;Loptimus/debug/CachedValue;)V"),
            ),
            trace_as_node: callout("traceValAsNode", None),
            lzy_compute_enter: callout("enterReentrantLazyCompute", None),
            lzy_compute_exit: callout("exitReentrantLazyCompute", None),
            entity_constructor_enter: callout(
                "markScenarioStackAsInitializing",
                Some("()Ljava/lang/Object;"),
            ),
            entity_constructor_exit: callout(
                "resetScenarioStackInitializing",
                Some("(Ljava/lang/Object;)V"),
            ),
            module_constructor_enter: callout("enterModuleConstructor", None),
            module_constructor_exit: callout("exitModuleConstructor", None),
        }
    }
}
