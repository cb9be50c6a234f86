use super::class_rewriter::ClassRewriter;
use super::heuristics::{
    patch_for_hash_code_forward, should_add_hash_code, should_add_module_constructor_bracketing,
    should_cache_apply_methods,
};
use super::rules::binary_name;
use super::{ClassPatch, Error, RuleCatalog, Settings};
use crate::jvm::class_file::ClassFile;
use log::{debug, info};
use std::borrow::Cow;
use std::collections::HashSet;

/// Opaque identity of the class loader defining a class
///
/// Classes defined by the bootstrap loader have no loader at all (`None` wherever an
/// `Option<LoaderId>` is expected).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct LoaderId(pub u64);

/// Hook called by the host as every class is being loaded
pub trait ClassFileTransformer: Send + Sync {
    /// Transform the bytes of a class, returning them borrowed when nothing changes
    fn transform<'b>(
        &self,
        loader: Option<LoaderId>,
        class_name: &str,
        bytes: &'b [u8],
    ) -> Result<Cow<'b, [u8]>, Error>;
}

/// Oracle deciding which classes are entities
pub trait EntityClassifier: Send + Sync {
    fn is_entity(&self, class_name: &str, super_class: Option<&str>) -> bool;
}

impl<F> EntityClassifier for F
where
    F: Fn(&str, Option<&str>) -> bool + Send + Sync,
{
    fn is_entity(&self, class_name: &str, super_class: Option<&str>) -> bool {
        self(class_name, super_class)
    }
}

/// Classes are entities exactly when their direct super class is one of a known set
#[derive(Debug, Default, Clone)]
pub struct KnownSupertypes(HashSet<String>);

impl KnownSupertypes {
    pub fn new() -> KnownSupertypes {
        KnownSupertypes::default()
    }

    pub fn insert(&mut self, class_name: impl Into<String>) {
        self.0.insert(class_name.into());
    }
}

impl<S: Into<String>> FromIterator<S> for KnownSupertypes {
    fn from_iter<I: IntoIterator<Item = S>>(iter: I) -> KnownSupertypes {
        KnownSupertypes(iter.into_iter().map(Into::into).collect())
    }
}

impl EntityClassifier for KnownSupertypes {
    fn is_entity(&self, _class_name: &str, super_class: Option<&str>) -> bool {
        super_class.map_or(false, |super_class| self.0.contains(super_class))
    }
}

/// Transformer applying the rules of a catalog, plus whatever the global modes add
pub struct Instrumenter<C, E> {
    settings: Settings,
    catalog: C,
    classifier: E,
}

impl<C: RuleCatalog, E: EntityClassifier> Instrumenter<C, E> {
    pub fn new(settings: Settings, catalog: C, classifier: E) -> Instrumenter<C, E> {
        Instrumenter {
            settings,
            catalog,
            classifier,
        }
    }

    pub fn catalog(&self) -> &C {
        &self.catalog
    }

    /// Rule for the class, after the global modes have had their say
    ///
    /// Registrations go to the catalog, but everything else only touches the returned snapshot.
    fn effective_patch(
        &self,
        loader: Option<LoaderId>,
        class_name: &str,
        class: &ClassFile,
        mut class_patch: Option<ClassPatch>,
    ) -> Result<Option<ClassPatch>, Error> {
        let settings = &self.settings;
        let name = binary_name(class_name)?;
        let super_class = class.super_class_name()?;

        if settings.instrument_all_entities && self.classifier.is_entity(class_name, super_class) {
            self.catalog.register_entity_constructor(&name);
            class_patch = self.catalog.for_class(class_name);
        }

        if settings.instrument_all_hash_codes
            && should_add_hash_code(loader, class.access_flags, class_name, super_class, settings)
        {
            let class_patch = class_patch.get_or_insert_with(ClassPatch::default);
            if class_patch.method_forward.is_none() {
                class_patch.method_forward =
                    Some(patch_for_hash_code_forward(&settings.callouts, &name));
            }
        }

        if settings.instrument_all_entity_applies
            && should_cache_apply_methods(class_name, &class.interface_names()?, settings)
        {
            class_patch
                .get_or_insert_with(ClassPatch::default)
                .cache_all_applies = true;
        }

        if settings.instrument_all_module_constructors
            && should_add_module_constructor_bracketing(loader, class_name, settings, &self.catalog)
        {
            self.catalog.register_module_constructor(&name);
            let mut fresh = self.catalog.for_class(class_name).unwrap_or_default();
            if let Some(snapshot) = class_patch {
                fresh.method_forward = fresh.method_forward.or(snapshot.method_forward);
                fresh.cache_all_applies |= snapshot.cache_all_applies;
            }
            fresh.bracket_all_lzy_computes = true;
            class_patch = Some(fresh);
        }

        Ok(class_patch)
    }
}

impl<C: RuleCatalog, E: EntityClassifier> ClassFileTransformer for Instrumenter<C, E> {
    fn transform<'b>(
        &self,
        loader: Option<LoaderId>,
        class_name: &str,
        bytes: &'b [u8],
    ) -> Result<Cow<'b, [u8]>, Error> {
        let class_patch = self.catalog.for_class(class_name);
        if class_patch.is_none() && !self.settings.any_global_mode() {
            return Ok(Cow::Borrowed(bytes));
        }

        let mut class = ClassFile::parse(bytes)?;
        let class_patch = match self.effective_patch(loader, class_name, &class, class_patch)? {
            Some(class_patch) => class_patch,
            None => {
                debug!("{}: no rule applies", class_name);
                return Ok(Cow::Borrowed(bytes));
            }
        };

        let summary = ClassRewriter::new(&class_patch, &self.settings, &self.catalog)
            .rewrite(&mut class)?;
        if summary.is_empty() {
            debug!("{}: rule left the class unchanged", class_name);
            return Ok(Cow::Borrowed(bytes));
        }
        info!(
            "{}: rewrote {} methods, added {} methods and {} fields",
            class_name, summary.methods_rewritten, summary.methods_added, summary.fields_added
        );
        Ok(Cow::Owned(class.to_bytes()?))
    }
}
