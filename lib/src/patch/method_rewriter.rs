//! Entry and exit injection
//!
//! A method body is decoded into a [`CodeList`], and the injected sequences are spliced in
//! around the original items, which are otherwise left alone:
//!
//!   - the prefix goes before the first original item (so it is outside every original exception
//!     range)
//!   - the suffix goes in front of every `*return` (after the labels on the return, so that jumps
//!     to the return run the suffix too)
//!   - exceptional exits get a catch-all handler appended at the end of the code, covering the
//!     original body minus the suffix blocks, which runs the suffix and rethrows. Constructors
//!     get the suffix in front of every `athrow` instead, since `this` may be uninitialized in
//!     parts of the body.
//!
//! The value handed from prefix to suffix lives in a fresh local just past the original locals.
//! That local is added to every original stack map frame, so that it stays live across jumps.

use super::heuristics::MethodInfo;
use super::rules::parse_method_descriptor;
use super::{CallTarget, Error, MethodPatch, MethodRef, RuleCatalog, Settings};
use crate::jvm::class_file::{ClassConstantIndex, Code, ConstantsPool};
use crate::jvm::code::{
    verification_type, BranchInstruction, CodeItem, CodeList, Emitter, Frame, LabelledFrame,
    MethodShape, OrdComparison, SynLabel, TryCatch, VerificationType,
};
use crate::jvm::{
    BaseType, BinaryName, FieldType, MethodAccessFlags, MethodDescriptor, Name, RenderDescriptor,
};
use crate::util::{OffsetVec, Width};
use log::debug;
use std::mem;

/// Name of the local holding the value passed from prefix to suffix
const LOCAL_VALUE_NAME: &str = "__locValue";

/// Verification category of a value
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Category {
    Int,
    Float,
    Long,
    Double,
    Reference,
}

fn category(field_type: &FieldType) -> Category {
    match field_type {
        FieldType::Base(BaseType::Float) => Category::Float,
        FieldType::Base(BaseType::Long) => Category::Long,
        FieldType::Base(BaseType::Double) => Category::Double,
        FieldType::Base(_) => Category::Int,
        FieldType::Ref(_) => Category::Reference,
    }
}

/// Do two return types share a verification category (`void` only agreeing with `void`)?
pub(crate) fn returns_agree(left: Option<&FieldType>, right: Option<&FieldType>) -> bool {
    match (left, right) {
        (None, None) => true,
        (Some(left), Some(right)) => category(left) == category(right),
        _ => false,
    }
}

/// Descriptor of a call to a hook, given the values pushed for it
///
/// An explicit descriptor on the target wins, as long as its parameters line up slot for slot
/// with what was pushed.
pub(crate) fn call_descriptor(
    method: &MethodRef,
    target: &CallTarget,
    pushed: Vec<FieldType>,
    inferred_return: Option<FieldType>,
) -> Result<MethodDescriptor, Error> {
    let explicit = match &target.descriptor {
        None => {
            return Ok(MethodDescriptor {
                parameters: pushed,
                return_type: inferred_return,
            })
        }
        Some(descriptor) => parse_method_descriptor(method, descriptor)?,
    };
    let agrees = explicit.parameters.len() == pushed.len()
        && explicit
            .parameters
            .iter()
            .zip(&pushed)
            .all(|(expected, actual)| category(expected) == category(actual));
    if !agrees {
        let passed = MethodDescriptor {
            parameters: pushed,
            return_type: None,
        };
        return Err(Error::malformed(
            method,
            format!(
                "{}.{}{} cannot be called with arguments {}",
                target.class,
                target.method,
                explicit.render(),
                passed.render()
            ),
        ));
    }
    Ok(explicit)
}

/// How control leaves the method at an injection point
#[derive(Debug)]
enum Exit {
    /// Normal return, with the type of the value returned
    Return(Option<FieldType>),

    /// Exception on top of the stack about to propagate out
    Throw,
}

/// Rewrites one method body according to a [`MethodPatch`]
pub struct MethodRewriter<'a> {
    patch: &'a MethodPatch,
    method: &'a MethodInfo<'a>,
    this_class: ClassConstantIndex,
    settings: &'a Settings,
    catalog: &'a dyn RuleCatalog,
    is_static: bool,
    is_constructor: bool,

    /// Allocated on first use
    correlation_id: Option<u32>,

    /// Slot and type of the local passed from prefix to suffix
    local: Option<(u16, FieldType)>,
}

impl<'a> MethodRewriter<'a> {
    pub fn new(
        patch: &'a MethodPatch,
        method: &'a MethodInfo<'a>,
        this_class: ClassConstantIndex,
        settings: &'a Settings,
        catalog: &'a dyn RuleCatalog,
    ) -> MethodRewriter<'a> {
        MethodRewriter {
            patch,
            method,
            this_class,
            settings,
            catalog,
            is_static: method.access_flags.contains(MethodAccessFlags::STATIC),
            is_constructor: method.name == "<init>",
            correlation_id: None,
            local: None,
        }
    }

    fn return_type(&self) -> Option<&'a FieldType> {
        self.method.parsed_descriptor.return_type.as_ref()
    }

    fn malformed(&self, reason: impl Into<String>) -> Error {
        Error::malformed(&self.patch.from, reason)
    }

    fn correlation_id(&mut self) -> u32 {
        let catalog = self.catalog;
        let from = &self.patch.from;
        *self
            .correlation_id
            .get_or_insert_with(|| catalog.allocate_id(from))
    }

    /// Type of the local passed from prefix to suffix
    ///
    /// This is whatever an explicit prefix descriptor returns, defaulting to `Object`.
    fn local_type(&self) -> Result<FieldType, Error> {
        let explicit = match self.patch.prefix.as_ref().and_then(|p| p.descriptor.as_ref()) {
            None => return Ok(FieldType::OBJECT),
            Some(descriptor) => parse_method_descriptor(&self.patch.from, descriptor)?,
        };
        explicit
            .return_type
            .ok_or_else(|| self.malformed("prefix passing a local value must return something"))
    }

    /// Reject combinations of options that cannot be expressed in this method
    fn validate(&self) -> Result<(), Error> {
        let patch = self.patch;
        if let Some(field) = &patch.cache_in_field {
            if patch.prefix.is_some() {
                return Err(self.malformed("cache in field cannot be combined with a prefix"));
            }
            if self.is_static || self.is_constructor {
                return Err(self.malformed("cache in field needs an initialized receiver"));
            }
            let return_type = self
                .return_type()
                .ok_or_else(|| self.malformed("cache in field needs a return value"))?;
            let field_type = field.field_type()?;
            let compatible = match (&field_type, return_type) {
                (FieldType::Ref(_), FieldType::Ref(_)) => {
                    &field_type == return_type || field_type == FieldType::OBJECT
                }
                (field_type, return_type) => category(field_type) == category(return_type),
            };
            if !compatible {
                return Err(self.malformed(format!(
                    "field {} of type {} cannot cache values of type {}",
                    field.name,
                    field_type.render(),
                    return_type.render()
                )));
            }
        }
        if patch.pass_local_value && patch.prefix.is_none() {
            return Err(self.malformed("passing a local value needs a prefix"));
        }
        if patch.check_and_return {
            if !patch.pass_local_value {
                return Err(self.malformed("check and return needs the local value"));
            }
            if self.is_constructor {
                return Err(self.malformed("constructors cannot return before initializing"));
            }
            if !self.local_type()?.is_reference() {
                return Err(self.malformed("check and return needs a reference local value"));
            }
        }
        if patch.store_to_field.is_some() && patch.prefix.is_some() && self.is_static {
            return Err(self.malformed("store to field needs a receiver"));
        }
        Ok(())
    }

    /// Rewrite the method body
    pub fn rewrite(
        mut self,
        code: &Code,
        constants: &mut ConstantsPool,
        emit_frames: bool,
    ) -> Result<Code, Error> {
        self.validate()?;

        let shape = MethodShape {
            this_class: self.this_class,
            is_static: self.is_static,
            is_constructor: self.is_constructor,
            descriptor: self.method.parsed_descriptor,
        };
        let mut code_list = CodeList::decode(code, constants, &shape)?;
        let original_items = mem::take(&mut code_list.items);

        // Reserve the local passed from prefix to suffix
        let mut local_vtype: Option<(usize, VerificationType<ClassConstantIndex, SynLabel>)> =
            None;
        if self.patch.pass_local_value {
            let local_type = self.local_type()?;
            let slot = code_list.max_locals;
            let max_locals = slot as usize + local_type.width();
            code_list.max_locals = u16::try_from(max_locals)
                .map_err(|_| crate::jvm::Error::MaxLocalsOverflow(max_locals))?;
            local_vtype = Some((slot as usize, verification_type(constants, &local_type)?));
            self.local = Some((slot, local_type));
        }

        let method_start = code_list.fresh_label();
        let body_start = code_list.fresh_label();
        let mut items = vec![CodeItem::Label(method_start)];

        // Entry
        let mut emitter = Emitter::new(constants, &mut code_list.label_generator);
        let jumps_to_body = self.emit_prefix(&mut emitter, body_start)?;
        let (prefix_items, prefix_depth) = emitter.finish();
        items.extend(prefix_items);
        items.push(CodeItem::Label(body_start));
        if jumps_to_body && emit_frames {
            let mut frame = code_list.labelled_initial_frame()?;
            if let Some((slot, vtype)) = local_vtype {
                frame.set_local(slot, vtype);
            }
            items.push(CodeItem::Frame(frame));
        }

        // Normal exits (and explicit throws in constructors)
        //
        // Suffix blocks are carved out of the ranges the catch-all handler protects. Ranges
        // without any original code in them are dropped, since exception ranges may not be empty.
        let mut protected: Vec<(SynLabel, SynLabel)> = vec![];
        let mut range_start = body_start;
        let mut range_has_code = false;
        let mut exit_blocks = 0;
        let mut suffix_depth = 0;
        for item in original_items {
            let exit = match &item {
                CodeItem::Branch(branch) if branch.is_return() => {
                    Some(Exit::Return(self.return_type().cloned()))
                }
                CodeItem::Branch(BranchInstruction::AThrow) if self.is_constructor => {
                    Some(Exit::Throw)
                }
                _ => None,
            };
            match (item, exit) {
                (CodeItem::Frame(mut frame), _) => {
                    if let Some((slot, vtype)) = local_vtype {
                        frame.set_local(slot, vtype);
                    }
                    items.push(CodeItem::Frame(frame));
                }
                (item, Some(exit)) => {
                    let mut emitter = Emitter::new(constants, &mut code_list.label_generator)
                        .with_stack(&self.exit_stack(&exit));
                    self.emit_exit(&mut emitter, &exit)?;
                    let (suffix_items, depth) = emitter.finish();
                    if suffix_items.is_empty() {
                        range_has_code = true;
                        items.push(item);
                        continue;
                    }
                    suffix_depth = suffix_depth.max(depth);
                    let block_start = code_list.fresh_label();
                    let block_end = code_list.fresh_label();
                    if range_has_code {
                        protected.push((range_start, block_start));
                    }
                    items.push(CodeItem::Label(block_start));
                    items.extend(suffix_items);
                    items.push(item);
                    items.push(CodeItem::Label(block_end));
                    range_start = block_end;
                    range_has_code = false;
                    exit_blocks += 1;
                }
                (item, None) => {
                    range_has_code |=
                        matches!(item, CodeItem::Instruction(_) | CodeItem::Branch(_));
                    items.push(item);
                }
            }
        }
        let body_end = code_list.fresh_label();
        items.push(CodeItem::Label(body_end));
        if range_has_code {
            protected.push((range_start, body_end));
        }

        // Exceptional exits
        if self.patch.suffix.is_some() && !self.is_constructor && !protected.is_empty() {
            let handler = code_list.fresh_label();
            for (start, end) in protected {
                code_list.exception_table.push(TryCatch {
                    start,
                    end,
                    handler,
                    catch_type: None,
                });
            }

            items.push(CodeItem::Label(handler));
            if emit_frames {
                let throwable = constants.get_class(BinaryName::THROWABLE.as_str())?;
                let mut frame: LabelledFrame = Frame {
                    locals: OffsetVec::new(),
                    stack: OffsetVec::new(),
                };
                if self.patch.suffix_with_this && !self.is_static {
                    frame.locals.push(VerificationType::Object(self.this_class));
                }
                if let Some((slot, vtype)) = local_vtype {
                    frame.set_local(slot, vtype);
                }
                frame.stack.push(VerificationType::Object(throwable));
                items.push(CodeItem::Frame(frame));
            }
            let throwable = FieldType::object(BinaryName::THROWABLE);
            let mut emitter = Emitter::new(constants, &mut code_list.label_generator)
                .with_stack(&[throwable]);
            self.emit_exit(&mut emitter, &Exit::Throw)?;
            emitter.athrow();
            let (handler_items, depth) = emitter.finish();
            suffix_depth = suffix_depth.max(depth);
            items.extend(handler_items);
        }

        let method_end = code_list.fresh_label();
        items.push(CodeItem::Label(method_end));
        if let Some((slot, local_type)) = &self.local {
            code_list.add_local_variable(
                constants,
                method_start,
                method_end,
                LOCAL_VALUE_NAME,
                local_type,
                *slot,
            )?;
        }

        let max_stack = code_list.max_stack as usize + prefix_depth.max(suffix_depth);
        code_list.max_stack =
            u16::try_from(max_stack).map_err(|_| crate::jvm::Error::MaxStackOverflow(max_stack))?;
        code_list.items = items;

        debug!(
            "rewrote {} ({} exit blocks, max stack {}, max locals {})",
            self.patch.from,
            exit_blocks,
            code_list.max_stack,
            code_list.max_locals
        );
        Ok(code_list.assemble(constants, emit_frames)?)
    }

    /// Values on the stack when an exit is reached
    fn exit_stack(&self, exit: &Exit) -> Vec<FieldType> {
        match exit {
            Exit::Return(None) => vec![],
            Exit::Return(Some(return_type)) => vec![return_type.clone()],
            Exit::Throw => vec![FieldType::object(BinaryName::THROWABLE)],
        }
    }

    /// Push the receiver, or `null` where there is no usable receiver
    fn load_this_or_null(&self, emitter: &mut Emitter<'_>) {
        if self.is_static || self.is_constructor {
            emitter.const_null();
        } else {
            emitter.load_this();
        }
    }

    /// Emit the code that runs before the original body
    ///
    /// Returns whether the emitted code jumps to `body_start`.
    fn emit_prefix(
        &mut self,
        emitter: &mut Emitter<'_>,
        body_start: SynLabel,
    ) -> Result<bool, Error> {
        let patch = self.patch;
        let mut jumps_to_body = false;
        let class_name = self.method.class_name.as_str();

        if let Some(field) = &patch.cache_in_field {
            // Validation ensures there is a return type
            if let Some(return_type) = self.return_type() {
                let field_type = field.field_type()?;
                emitter.load_this();
                emitter.get_field(class_name, &field.name, &field_type)?;
                emitter.compare_to_default(&field_type);
                emitter.branch_if_default(&field_type, body_start);
                emitter.load_this();
                emitter.get_field(class_name, &field.name, &field_type)?;
                // Primitives of one category share a verification type
                if field_type.is_reference() && field_type != *return_type {
                    emitter.unbox_top(return_type)?;
                }
                emitter.return_(Some(return_type));
                jumps_to_body = true;
            }
        }

        let prefix = match &patch.prefix {
            Some(prefix) => prefix,
            None => return Ok(jumps_to_body),
        };

        let mut pushed = vec![];
        if patch.prefix_with_id {
            let id = self.correlation_id();
            emitter.const_int(id as i32)?;
            pushed.push(FieldType::int());
        }
        if patch.prefix_with_args {
            self.load_this_or_null(emitter);
            pushed.push(FieldType::OBJECT);
            let arguments = self.method.parsed_descriptor.parameter_slots(!self.is_static);
            emitter.object_array_of_locals(&arguments)?;
            pushed.push(FieldType::array(FieldType::OBJECT));
        }
        let keeps_result = patch.pass_local_value || patch.store_to_field.is_some();
        let inferred_return = if keeps_result {
            Some(FieldType::OBJECT)
        } else {
            None
        };
        let descriptor = call_descriptor(&patch.from, prefix, pushed, inferred_return)?;
        emitter.invoke_static(&prefix.class, &prefix.method, &descriptor)?;

        match (&self.local, &patch.store_to_field, &descriptor.return_type) {
            (Some((slot, local_type)), _, Some(_)) => emitter.set_local(*slot, local_type),
            (None, Some(field), Some(result_type)) => {
                let field_type = field.field_type()?;
                if category(&field_type) != category(result_type) {
                    return Err(self.malformed(format!(
                        "prefix result {} cannot be stored in field {}",
                        result_type.render(),
                        field.name
                    )));
                }
                emitter.store_top_to_field(class_name, &field.name, &field_type)?;
                emitter.pop();
            }
            (None, Some(field), None) => {
                return Err(self.malformed(format!(
                    "prefix returns nothing to store in field {}",
                    field.name
                )))
            }
            (_, _, Some(_)) => emitter.pop(),
            (_, _, None) => (),
        }

        if patch.check_and_return {
            if let Some((slot, local_type)) = self.local.clone() {
                let wrapper = self.settings.cached_value_class.clone();
                let wrapper_type = FieldType::object(wrapper.clone());

                emitter.get_local(slot, &local_type);
                if local_type != wrapper_type {
                    emitter.check_cast(wrapper.as_str())?;
                }
                emitter.get_field(wrapper.as_str(), "hasResult", &FieldType::boolean())?;
                emitter.branch(BranchInstruction::If(OrdComparison::EQ, body_start));
                match self.return_type() {
                    None => emitter.return_(None),
                    Some(return_type) => {
                        emitter.get_local(slot, &local_type);
                        if local_type != wrapper_type {
                            emitter.check_cast(wrapper.as_str())?;
                        }
                        emitter.get_field(wrapper.as_str(), "result", &FieldType::OBJECT)?;
                        emitter.unbox_top(return_type)?;
                        emitter.return_(Some(return_type));
                    }
                }
                jumps_to_body = true;
            }
        }

        Ok(jumps_to_body)
    }

    /// Emit the code that runs at an exit, with the exit's values already on the stack
    fn emit_exit(&mut self, emitter: &mut Emitter<'_>, exit: &Exit) -> Result<(), Error> {
        let patch = self.patch;
        if let (Exit::Return(Some(_)), Some(field)) = (exit, &patch.cache_in_field) {
            let field_type = field.field_type()?;
            emitter.store_top_to_field(self.method.class_name.as_str(), &field.name, &field_type)?;
        }

        let suffix = match &patch.suffix {
            Some(suffix) => suffix,
            None => return Ok(()),
        };

        let mut pushed = vec![];
        if patch.suffix_with_return_value {
            match exit {
                Exit::Return(return_type) => emitter.dup_and_box(return_type.as_ref())?,
                Exit::Throw => emitter.dup(),
            }
            pushed.push(FieldType::OBJECT);
        }
        if let Some((slot, local_type)) = &self.local {
            emitter.get_local(*slot, local_type);
            pushed.push(local_type.clone());
        }
        if patch.suffix_with_id {
            let id = self.correlation_id();
            emitter.const_int(id as i32)?;
            pushed.push(FieldType::int());
        }
        if patch.suffix_with_this {
            self.load_this_or_null(emitter);
            pushed.push(FieldType::OBJECT);
        }
        let descriptor = call_descriptor(&patch.from, suffix, pushed, None)?;
        emitter.invoke_static(&suffix.class, &suffix.method, &descriptor)?;
        if descriptor.return_type.is_some() {
            emitter.pop();
        }
        Ok(())
    }
}
