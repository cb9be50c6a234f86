use super::Error;
use crate::jvm::{BinaryName, FieldType, MethodDescriptor, Name, ParseDescriptor};
use std::fmt;

/// Method identified by its owner, name, and (optionally) descriptor
///
/// A missing descriptor is a wildcard which matches every overload of the name.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct MethodRef {
    pub class: BinaryName,
    pub name: String,
    pub descriptor: Option<String>,
}

impl MethodRef {
    pub fn new(class: BinaryName, name: impl Into<String>, descriptor: Option<&str>) -> MethodRef {
        MethodRef {
            class,
            name: name.into(),
            descriptor: descriptor.map(str::to_owned),
        }
    }

    /// Does this reference pick out the method with the given name and descriptor?
    pub fn matches(&self, name: &str, descriptor: &str) -> bool {
        self.name == name
            && self
                .descriptor
                .as_deref()
                .map_or(true, |expected| expected == descriptor)
    }

    /// Parsed descriptor, if there is one
    pub fn method_descriptor(&self) -> Result<Option<MethodDescriptor>, Error> {
        self.descriptor
            .as_deref()
            .map(|descriptor| parse_method_descriptor(self, descriptor))
            .transpose()
    }
}

impl fmt::Display for MethodRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.class, self.name)?;
        if let Some(descriptor) = &self.descriptor {
            f.write_str(descriptor)?;
        }
        Ok(())
    }
}

/// Static method invoked by injected code
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct CallTarget {
    pub class: BinaryName,
    pub method: String,

    /// Overrides the descriptor inferred from the values pushed at the call site
    pub descriptor: Option<String>,
}

impl CallTarget {
    pub fn new(class: BinaryName, method: impl Into<String>) -> CallTarget {
        CallTarget {
            class,
            method: method.into(),
            descriptor: None,
        }
    }

    pub fn with_descriptor(mut self, descriptor: impl Into<String>) -> CallTarget {
        self.descriptor = Some(descriptor.into());
        self
    }
}

/// Instance field declared on (or added to) the class being rewritten
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct FieldPatch {
    pub name: String,

    /// Field descriptor, which defaults to `Ljava/lang/Object;`
    pub descriptor: Option<String>,
}

impl FieldPatch {
    pub fn new(name: impl Into<String>) -> FieldPatch {
        FieldPatch {
            name: name.into(),
            descriptor: None,
        }
    }

    pub fn with_descriptor(mut self, descriptor: impl Into<String>) -> FieldPatch {
        self.descriptor = Some(descriptor.into());
        self
    }

    pub fn field_type(&self) -> Result<FieldType, Error> {
        match &self.descriptor {
            None => Ok(FieldType::OBJECT),
            Some(descriptor) => FieldType::parse(descriptor).map_err(|err| {
                Error::malformed(&self.name, format!("bad field descriptor {}: {}", descriptor, err))
            }),
        }
    }
}

/// Redirect a method to a static implementation elsewhere
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct MethodForward {
    /// Method to synthesize, which needs a descriptor
    pub from: MethodRef,
    pub to: CallTarget,

    /// Synthesize `from` as a static method (the target then gets `null` as its receiver)
    pub is_static: bool,
}

impl MethodForward {
    pub fn new(from: MethodRef, to: CallTarget) -> MethodForward {
        MethodForward {
            from,
            to,
            is_static: false,
        }
    }
}

/// Instrumentation of a single method
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MethodPatch {
    pub from: MethodRef,

    /// Called once before the original body
    pub prefix: Option<CallTarget>,

    /// Called on every exit, normal or exceptional
    pub suffix: Option<CallTarget>,

    /// Pass the correlation ID to the prefix
    pub prefix_with_id: bool,

    /// Pass the receiver (or `null`) and the boxed arguments to the prefix
    pub prefix_with_args: bool,

    /// Pass the outgoing value (or exception) to the suffix
    pub suffix_with_return_value: bool,
    pub suffix_with_id: bool,
    pub suffix_with_this: bool,

    /// Keep the prefix result in a fresh local and hand it to the suffix
    pub pass_local_value: bool,

    /// Return the field when it is already set, and set it on every normal return
    pub cache_in_field: Option<FieldPatch>,

    /// Store the prefix result in this field of the receiver
    pub store_to_field: Option<FieldPatch>,

    /// Return early when the prefix result reports a cached value
    pub check_and_return: bool,
}

impl MethodPatch {
    pub fn new(from: MethodRef) -> MethodPatch {
        MethodPatch {
            from,
            prefix: None,
            suffix: None,
            prefix_with_id: false,
            prefix_with_args: false,
            suffix_with_return_value: false,
            suffix_with_id: false,
            suffix_with_this: false,
            pass_local_value: false,
            cache_in_field: None,
            store_to_field: None,
            check_and_return: false,
        }
    }

    /// Does applying this patch leave the method untouched?
    pub fn is_noop(&self) -> bool {
        self.prefix.is_none() && self.suffix.is_none() && self.cache_in_field.is_none()
    }
}

/// Everything to do to one class
///
/// The catalog hands these out as snapshots: editing one never affects the catalog.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ClassPatch {
    pub method_patches: Vec<MethodPatch>,
    pub method_forward: Option<MethodForward>,
    pub field_patches: Vec<FieldPatch>,

    /// Cache every `apply` returning the companion's product type
    pub cache_all_applies: bool,

    /// Trace every simple getter
    pub trace_vals_as_nodes: bool,

    /// Bracket every `$lzycompute` method
    pub bracket_all_lzy_computes: bool,

    /// Make cache equality fall back to identity
    pub poison_cache_equality: bool,
}

impl ClassPatch {
    /// Rule for a method, preferring an exact descriptor match over a wildcard
    pub fn for_method(&self, name: &str, descriptor: &str) -> Option<&MethodPatch> {
        let mut wildcard = None;
        for patch in &self.method_patches {
            if patch.from.name != name {
                continue;
            }
            match patch.from.descriptor.as_deref() {
                Some(expected) if expected == descriptor => return Some(patch),
                Some(_) => (),
                None => wildcard = wildcard.or(Some(patch)),
            }
        }
        wildcard
    }

    /// Add a method rule, replacing any rule for the same name and descriptor
    ///
    /// Returns whether anything changed.
    pub fn add_method_patch(&mut self, patch: MethodPatch) -> bool {
        match self.method_patches.iter_mut().find(|existing| {
            existing.from.name == patch.from.name && existing.from.descriptor == patch.from.descriptor
        }) {
            Some(existing) if *existing == patch => false,
            Some(existing) => {
                *existing = patch;
                true
            }
            None => {
                self.method_patches.push(patch);
                true
            }
        }
    }

    /// Add a field, unless one with the same name is already there
    ///
    /// Returns whether the field was added.
    pub fn add_field_patch(&mut self, field: FieldPatch) -> bool {
        if self.field_patches.iter().any(|existing| existing.name == field.name) {
            false
        } else {
            self.field_patches.push(field);
            true
        }
    }
}

pub(crate) fn parse_method_descriptor(
    method: impl fmt::Display,
    descriptor: &str,
) -> Result<MethodDescriptor, Error> {
    MethodDescriptor::parse(descriptor).map_err(|err| {
        Error::malformed(method, format!("bad method descriptor {}: {}", descriptor, err))
    })
}

/// Binary name from a name supplied at runtime
pub(crate) fn binary_name(name: &str) -> Result<BinaryName, Error> {
    BinaryName::from_str(name).map_err(|reason| Error::malformed(name, reason))
}
