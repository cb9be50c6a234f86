//! Which methods get which treatment
//!
//! The predicates here look only at what is in the class file (access flags, names, and
//! descriptors), and the rule builders only at the configured callouts. Together they make up
//! the treatment chain used by [`select_treatment`].

use super::{
    Callouts, ClassPatch, LoaderId, MethodForward, MethodPatch, MethodRef, RuleCatalog, Settings,
};
use crate::jvm::{
    BinaryName, ClassAccessFlags, FieldType, MethodAccessFlags, MethodDescriptor, Name, RefType,
};

/// Marker of compiler-generated (or otherwise internal) names
const INTERNAL_MARKER: char = '$';

/// Suffix of companion and module class names
const MODULE_MARKER: char = '$';

const LZY_COMPUTE_SUFFIX: &str = "$lzycompute";

/// Name of the factory methods on companions
const APPLY: &str = "apply";

/// Method of a class, as seen by the predicates
pub struct MethodInfo<'a> {
    pub class_name: &'a BinaryName,
    pub access_flags: MethodAccessFlags,
    pub name: &'a str,
    pub descriptor: &'a str,
    pub parsed_descriptor: &'a MethodDescriptor,
}

impl<'a> MethodInfo<'a> {
    fn method_ref(&self) -> MethodRef {
        MethodRef::new(self.class_name.clone(), self.name, Some(self.descriptor))
    }
}

/// Does this look like a getter for a plain `val`?
///
///   - it is an instance method taking no arguments
///   - its name has no internal marker
///   - it returns something, and that something is not the uninhabited type
pub fn maybe_simple_getter(
    access_flags: MethodAccessFlags,
    name: &str,
    descriptor: &MethodDescriptor,
    nothing_class: &BinaryName,
) -> bool {
    if access_flags.contains(MethodAccessFlags::STATIC)
        || !descriptor.parameters.is_empty()
        || name.contains(INTERNAL_MARKER)
    {
        return false;
    }
    match &descriptor.return_type {
        None => false,
        Some(FieldType::Ref(RefType::Object(class))) => class != nothing_class,
        Some(_) => true,
    }
}

/// Does this method of a companion return the companion's product type?
///
/// The product type is the companion's name without its trailing marker.
pub fn is_create_entity_method(companion: &str, descriptor: &MethodDescriptor) -> bool {
    let product = match companion.strip_suffix(MODULE_MARKER) {
        Some(product) => product,
        None => return false,
    };
    matches!(
        &descriptor.return_type,
        Some(FieldType::Ref(RefType::Object(class))) if class.as_str() == product
    )
}

pub fn is_lzy_compute(name: &str) -> bool {
    name.ends_with(LZY_COMPUTE_SUFFIX)
}

/// Is the class an entity companion, whose `apply` methods should be cached?
pub fn should_cache_apply_methods(class_name: &str, interfaces: &[&str], settings: &Settings) -> bool {
    class_name.ends_with(MODULE_MARKER)
        && interfaces
            .iter()
            .any(|interface| *interface == settings.entity_companion_base.as_str())
}

/// Is the class a module whose construction should be bracketed?
///
/// Modules loaded by the bootstrap loader, runtime library modules, and modules excluded in the
/// catalog are left alone.
pub fn should_add_module_constructor_bracketing(
    loader: Option<LoaderId>,
    class_name: &str,
    settings: &Settings,
    catalog: &dyn RuleCatalog,
) -> bool {
    loader.is_some()
        && class_name.ends_with(MODULE_MARKER)
        && !class_name.starts_with(settings.module_excluded_prefix.as_str())
        && !catalog.is_module_excluded(class_name)
}

/// Should `hashCode` of this class be forwarded to the identity-preserving implementation?
///
/// Only concrete classes extending `java/lang/Object` directly qualify, and only when they are
/// loaded by a real loader and outside of the excluded packages.
pub fn should_add_hash_code(
    loader: Option<LoaderId>,
    access_flags: ClassAccessFlags,
    class_name: &str,
    super_class: Option<&str>,
    settings: &Settings,
) -> bool {
    !access_flags.contains(ClassAccessFlags::INTERFACE)
        && super_class == Some(BinaryName::OBJECT.as_str())
        && loader.is_some()
        && !settings
            .hash_code_excluded_prefixes
            .iter()
            .any(|prefix| class_name.starts_with(prefix.as_str()))
}

/// Look up a cached result before the method runs, and fill the cache when it returns
pub fn patch_for_caching_method(callouts: &Callouts, from: MethodRef) -> MethodPatch {
    let mut patch = MethodPatch::new(from);
    patch.prefix = Some(callouts.cache_lookup.clone());
    patch.prefix_with_id = true;
    patch.prefix_with_args = true;
    patch.pass_local_value = true;
    patch.check_and_return = true;
    patch.suffix = Some(callouts.cache_store.clone());
    patch.suffix_with_return_value = true;
    patch
}

/// Report the computed value of a getter
pub fn patch_for_suffix_as_node(callouts: &Callouts, from: MethodRef) -> MethodPatch {
    let mut patch = MethodPatch::new(from);
    patch.suffix = Some(callouts.trace_as_node.clone());
    patch.suffix_with_return_value = true;
    patch.suffix_with_id = true;
    patch.suffix_with_this = true;
    patch
}

/// Bracket a lazy `val` initializer with enter/exit calls sharing a token
pub fn patch_for_bracketing_lzy_compute(callouts: &Callouts, from: MethodRef) -> MethodPatch {
    let mut patch = MethodPatch::new(from);
    patch.prefix = Some(callouts.lzy_compute_enter.clone());
    patch.prefix_with_id = true;
    patch.prefix_with_args = true;
    patch.pass_local_value = true;
    patch.suffix = Some(callouts.lzy_compute_exit.clone());
    patch.suffix_with_id = true;
    patch
}

/// Mark the scenario stack as initializing for the duration of every constructor
pub fn patch_for_entity_constructor(callouts: &Callouts, class_name: &BinaryName) -> MethodPatch {
    let mut patch = MethodPatch::new(MethodRef::new(class_name.clone(), "<init>", None));
    patch.prefix = Some(callouts.entity_constructor_enter.clone());
    patch.pass_local_value = true;
    patch.suffix = Some(callouts.entity_constructor_exit.clone());
    patch
}

/// Bracket every constructor of a module
pub fn patch_for_module_constructor(callouts: &Callouts, class_name: &BinaryName) -> MethodPatch {
    let mut patch = MethodPatch::new(MethodRef::new(class_name.clone(), "<init>", None));
    patch.prefix = Some(callouts.module_constructor_enter.clone());
    patch.prefix_with_id = true;
    patch.suffix = Some(callouts.module_constructor_exit.clone());
    patch.suffix_with_id = true;
    patch
}

/// Forward `hashCode()I` to the identity-preserving implementation
pub fn patch_for_hash_code_forward(callouts: &Callouts, class_name: &BinaryName) -> MethodForward {
    MethodForward::new(
        MethodRef::new(class_name.clone(), "hashCode", Some("()I")),
        callouts.hash_code.clone(),
    )
}

/// What to do with one method
#[derive(Debug, PartialEq)]
pub enum Treatment<'p> {
    /// Rule given explicitly in the class rule
    Explicit(&'p MethodPatch),

    /// Rule built by the named heuristic
    Heuristic(&'static str, MethodPatch),

    /// Leave the method as it is
    CopyUnchanged,
}

/// Entry in the treatment chain
struct Heuristic {
    name: &'static str,
    applies: fn(&ClassPatch, &Settings, &MethodInfo<'_>) -> bool,
    build: fn(&Callouts, MethodRef) -> MethodPatch,
}

fn caches_apply(class_patch: &ClassPatch, _: &Settings, method: &MethodInfo<'_>) -> bool {
    class_patch.cache_all_applies
        && method.name == APPLY
        && is_create_entity_method(method.class_name.as_str(), method.parsed_descriptor)
}

fn traces_getter(class_patch: &ClassPatch, settings: &Settings, method: &MethodInfo<'_>) -> bool {
    class_patch.trace_vals_as_nodes
        && maybe_simple_getter(
            method.access_flags,
            method.name,
            method.parsed_descriptor,
            &settings.nothing_class,
        )
}

fn brackets_lzy_compute(class_patch: &ClassPatch, _: &Settings, method: &MethodInfo<'_>) -> bool {
    class_patch.bracket_all_lzy_computes && is_lzy_compute(method.name)
}

/// Heuristics in priority order, tried after explicit rules
const HEURISTICS: [Heuristic; 3] = [
    Heuristic {
        name: "cache-all-applies",
        applies: caches_apply,
        build: patch_for_caching_method,
    },
    Heuristic {
        name: "trace-vals-as-nodes",
        applies: traces_getter,
        build: patch_for_suffix_as_node,
    },
    Heuristic {
        name: "bracket-lzy-computes",
        applies: brackets_lzy_compute,
        build: patch_for_bracketing_lzy_compute,
    },
];

/// Pick the treatment of a method, first match wins
pub fn select_treatment<'p>(
    class_patch: &'p ClassPatch,
    settings: &Settings,
    method: &MethodInfo<'_>,
) -> Treatment<'p> {
    if let Some(patch) = class_patch.for_method(method.name, method.descriptor) {
        return Treatment::Explicit(patch);
    }
    for heuristic in &HEURISTICS {
        if (heuristic.applies)(class_patch, settings, method) {
            return Treatment::Heuristic(
                heuristic.name,
                (heuristic.build)(&settings.callouts, method.method_ref()),
            );
        }
    }
    Treatment::CopyUnchanged
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::jvm::ParseDescriptor;
    use crate::patch::InMemoryCatalog;

    fn desc(descriptor: &str) -> MethodDescriptor {
        MethodDescriptor::parse(descriptor).unwrap()
    }

    #[test]
    fn simple_getters() {
        let nothing = BinaryName::name("scala/runtime/Nothing$");
        let public = MethodAccessFlags::PUBLIC;
        assert!(maybe_simple_getter(public, "name", &desc("()Ljava/lang/String;"), &nothing));
        assert!(maybe_simple_getter(public, "size", &desc("()I"), &nothing));
        assert!(!maybe_simple_getter(public, "run", &desc("()V"), &nothing));
        assert!(!maybe_simple_getter(public, "fail", &desc("()Lscala/runtime/Nothing$;"), &nothing));
        assert!(!maybe_simple_getter(public, "name", &desc("(I)Ljava/lang/String;"), &nothing));
        assert!(!maybe_simple_getter(public, "name$1", &desc("()I"), &nothing));
        assert!(!maybe_simple_getter(
            public | MethodAccessFlags::STATIC,
            "name",
            &desc("()I"),
            &nothing
        ));
    }

    #[test]
    fn create_entity_methods() {
        assert!(is_create_entity_method("me/Trade$", &desc("(I)Lme/Trade;")));
        assert!(!is_create_entity_method("me/Trade$", &desc("(I)Lme/Other;")));
        assert!(!is_create_entity_method("me/Trade$", &desc("(I)I")));
        assert!(!is_create_entity_method("me/Trade", &desc("()Lme/Trade;")));
    }

    #[test]
    fn class_level_predicates() {
        let settings = Settings::default();
        let loader = Some(LoaderId(1));
        let flags = ClassAccessFlags::PUBLIC | ClassAccessFlags::SUPER;
        let object = Some("java/lang/Object");

        assert!(should_add_hash_code(loader, flags, "me/Point", object, &settings));
        assert!(!should_add_hash_code(None, flags, "me/Point", object, &settings));
        assert!(!should_add_hash_code(loader, flags, "me/Point", Some("me/Base"), &settings));
        assert!(!should_add_hash_code(loader, flags, "sun/misc/Thing", object, &settings));
        assert!(!should_add_hash_code(
            loader,
            flags | ClassAccessFlags::INTERFACE | ClassAccessFlags::ABSTRACT,
            "me/Shape",
            object,
            &settings
        ));

        let companion_base = "optimus/platform/storable/EntityCompanionBase";
        assert!(should_cache_apply_methods("me/Trade$", &[companion_base], &settings));
        assert!(!should_cache_apply_methods("me/Trade", &[companion_base], &settings));
        assert!(!should_cache_apply_methods("me/Trade$", &["java/io/Serializable"], &settings));

        let catalog = InMemoryCatalog::default();
        catalog.exclude_module("me/Skipped$");
        let bracket = |loader, name| {
            should_add_module_constructor_bracketing(loader, name, &settings, &catalog)
        };
        assert!(bracket(loader, "me/Module$"));
        assert!(!bracket(None, "me/Module$"));
        assert!(!bracket(loader, "me/Module"));
        assert!(!bracket(loader, "scala/Predef$"));
        assert!(!bracket(loader, "me/Skipped$"));
    }

    #[test]
    fn treatment_chain_is_first_match_wins() {
        let settings = Settings::default();
        let class_name = BinaryName::name("me/Trade$");
        let descriptor = desc("()Lme/Trade;");
        let method = MethodInfo {
            class_name: &class_name,
            access_flags: MethodAccessFlags::PUBLIC,
            name: "apply",
            descriptor: "()Lme/Trade;",
            parsed_descriptor: &descriptor,
        };

        let mut class_patch = ClassPatch::default();
        assert_eq!(
            select_treatment(&class_patch, &settings, &method),
            Treatment::CopyUnchanged
        );

        // `apply` is also a simple getter, but caching comes first
        class_patch.cache_all_applies = true;
        class_patch.trace_vals_as_nodes = true;
        match select_treatment(&class_patch, &settings, &method) {
            Treatment::Heuristic(name, patch) => {
                assert_eq!(name, "cache-all-applies");
                assert!(patch.check_and_return);
                assert_eq!(patch.from.descriptor.as_deref(), Some("()Lme/Trade;"));
            }
            other => panic!("unexpected {:?}", other),
        }

        class_patch.cache_all_applies = false;
        assert!(matches!(
            select_treatment(&class_patch, &settings, &method),
            Treatment::Heuristic("trace-vals-as-nodes", _)
        ));

        let explicit = MethodPatch::new(MethodRef::new(class_name.clone(), "apply", None));
        class_patch.add_method_patch(explicit.clone());
        assert_eq!(
            select_treatment(&class_patch, &settings, &method),
            Treatment::Explicit(&explicit)
        );
    }
}
