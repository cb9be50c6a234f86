use super::heuristics::{select_treatment, MethodInfo, Treatment};
use super::method_rewriter::{call_descriptor, returns_agree, MethodRewriter};
use super::rules::{binary_name, parse_method_descriptor};
use super::{ClassPatch, Error, MethodForward, RuleCatalog, Settings};
use crate::jvm::class_file::{ClassConstantIndex, ClassFile, Code, ConstantsPool, Field, Method};
use crate::jvm::code::{
    BranchInstruction, CodeList, Emitter, EqComparison, MethodShape, VerificationType,
};
use crate::jvm::{
    BinaryName, FieldAccessFlags, FieldType, MethodAccessFlags, MethodDescriptor, Name,
    RenderDescriptor, UnqualifiedName,
};
use log::{debug, warn};
use std::borrow::Cow;
use std::collections::HashSet;

/// Name of the synthesized cache equality override
const EQUALS_FOR_CACHING: &str = "equalsForCachingInternal";

/// What a pass over a class changed
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct RewriteSummary {
    pub methods_rewritten: usize,
    pub methods_added: usize,
    pub fields_added: usize,
}

impl RewriteSummary {
    pub fn is_empty(&self) -> bool {
        *self == RewriteSummary::default()
    }
}

/// Applies a class rule to a parsed class
///
/// Methods are visited once, in declaration order. Members the rule asks for are appended
/// once every existing method has been seen.
pub struct ClassRewriter<'a> {
    class_patch: &'a ClassPatch,
    settings: &'a Settings,
    catalog: &'a dyn RuleCatalog,
}

impl<'a> ClassRewriter<'a> {
    pub fn new(
        class_patch: &'a ClassPatch,
        settings: &'a Settings,
        catalog: &'a dyn RuleCatalog,
    ) -> ClassRewriter<'a> {
        ClassRewriter {
            class_patch,
            settings,
            catalog,
        }
    }

    pub fn rewrite(&self, class: &mut ClassFile) -> Result<RewriteSummary, Error> {
        let class_name = binary_name(class.class_name()?)?;
        let this_class = class.this_class;
        let emit_frames = class.version.uses_stack_map_frames();
        let ClassFile {
            constants,
            methods,
            fields,
            ..
        } = class;

        let mut summary = RewriteSummary::default();
        let mut seen_forwarded_method = false;
        for method in methods.iter_mut() {
            let name = constants.utf8(method.name_index)?.to_owned();
            let descriptor = constants.utf8(method.descriptor_index)?.to_owned();
            if let Some(forward) = &self.class_patch.method_forward {
                seen_forwarded_method |= forward.from.name == name;
            }

            let code_position = match method.code_attribute_position(constants)? {
                Some(position) => position,
                None => continue,
            };
            let parsed_descriptor =
                parse_method_descriptor(format!("{}.{}", class_name, name), &descriptor)?;
            let info = MethodInfo {
                class_name: &class_name,
                access_flags: method.access_flags,
                name: &name,
                descriptor: &descriptor,
                parsed_descriptor: &parsed_descriptor,
            };
            let (patch, origin) =
                match select_treatment(self.class_patch, self.settings, &info) {
                    Treatment::Explicit(patch) => (Cow::Borrowed(patch), "explicit rule"),
                    Treatment::Heuristic(heuristic, patch) => (Cow::Owned(patch), heuristic),
                    Treatment::CopyUnchanged => continue,
                };
            if patch.is_noop() {
                debug!("{}.{}{}: {} has nothing to inject", class_name, name, descriptor, origin);
                continue;
            }
            debug!("{}.{}{}: applying {}", class_name, name, descriptor, origin);

            let code: Code = method.attributes[code_position].decode()?;
            let rewriter =
                MethodRewriter::new(&patch, &info, this_class, self.settings, self.catalog);
            let code = rewriter.rewrite(&code, constants, emit_frames)?;
            method.attributes[code_position] = constants.get_attribute(code)?;
            summary.methods_rewritten += 1;
        }

        if let Some(forward) = &self.class_patch.method_forward {
            if seen_forwarded_method {
                debug!(
                    "{} already declares {}, not forwarding it",
                    class_name, forward.from.name
                );
            } else {
                methods.push(forwarding_method(
                    constants,
                    &class_name,
                    this_class,
                    forward,
                    emit_frames,
                )?);
                summary.methods_added += 1;
            }
        }

        if self.class_patch.poison_cache_equality {
            methods.push(equals_for_caching(
                constants,
                &class_name,
                this_class,
                &self.settings.entity_class,
                emit_frames,
            )?);
            summary.methods_added += 1;
        }

        let mut field_names = HashSet::new();
        for field in fields.iter() {
            field_names.insert(constants.utf8(field.name_index)?.to_owned());
        }
        for field_patch in &self.class_patch.field_patches {
            if !field_names.insert(field_patch.name.clone()) {
                warn!(
                    "{} already has a field {}, not adding it again",
                    class_name, field_patch.name
                );
                continue;
            }
            let field_type = field_patch.field_type()?;
            fields.push(Field {
                access_flags: FieldAccessFlags::empty(),
                name_index: constants.get_utf8(&field_patch.name)?,
                descriptor_index: constants.get_utf8(&field_type.render())?,
                attributes: vec![],
            });
            summary.fields_added += 1;
        }

        Ok(summary)
    }
}

/// Synthesize a method which hands its receiver and arguments to a static method elsewhere
fn forwarding_method(
    constants: &mut ConstantsPool,
    class_name: &BinaryName,
    this_class: ClassConstantIndex,
    forward: &MethodForward,
    emit_frames: bool,
) -> Result<Method, Error> {
    let from = &forward.from;
    if from.name == UnqualifiedName::INIT.as_str() {
        return Err(Error::malformed(from, "constructors cannot be forwarded"));
    }
    let descriptor = from
        .method_descriptor()?
        .ok_or_else(|| Error::malformed(from, "forwarded method needs a descriptor"))?;

    let mut pushed = vec![FieldType::OBJECT];
    pushed.extend(descriptor.parameters.iter().cloned());
    let target = call_descriptor(from, &forward.to, pushed, descriptor.return_type.clone())?;
    if !returns_agree(target.return_type.as_ref(), descriptor.return_type.as_ref()) {
        return Err(Error::malformed(
            from,
            format!(
                "{}.{}{} does not return what the forwarded method does",
                forward.to.class,
                forward.to.method,
                target.render()
            ),
        ));
    }

    let shape = MethodShape {
        this_class,
        is_static: forward.is_static,
        is_constructor: false,
        descriptor: &descriptor,
    };
    let mut code_list = CodeList::new(constants, &shape)?;
    let start = code_list.fresh_label();
    let end = code_list.fresh_label();

    let mut emitter = Emitter::new(constants, &mut code_list.label_generator);
    emitter.place_label(start);
    if forward.is_static {
        emitter.const_null();
    } else {
        emitter.load_this();
    }
    for (slot, parameter) in descriptor.parameter_slots(!forward.is_static) {
        emitter.get_local(slot, parameter);
    }
    emitter.invoke_static(&forward.to.class, &forward.to.method, &target)?;
    if let Some(return_type) = &descriptor.return_type {
        if target.return_type.as_ref() != Some(return_type) && return_type.is_reference() {
            emitter.unbox_top(return_type)?;
        }
    }
    emitter.return_(descriptor.return_type.as_ref());
    emitter.place_label(end);
    let (items, depth) = emitter.finish();

    code_list.items = items;
    code_list.max_stack =
        u16::try_from(depth).map_err(|_| crate::jvm::Error::MaxStackOverflow(depth))?;
    if !forward.is_static {
        let this_type = FieldType::object(class_name.clone());
        code_list.add_local_variable(constants, start, end, "this", &this_type, 0)?;
    }
    let code = code_list.assemble(constants, emit_frames)?;

    let mut access_flags = MethodAccessFlags::PUBLIC;
    if forward.is_static {
        access_flags |= MethodAccessFlags::STATIC;
    }
    Ok(Method {
        access_flags,
        name_index: constants.get_utf8(&from.name)?,
        descriptor_index: constants.get_utf8(&descriptor.render())?,
        attributes: vec![constants.get_attribute(code)?],
    })
}

/// Synthesize a cache equality override which only considers an instance equal to itself
fn equals_for_caching(
    constants: &mut ConstantsPool,
    class_name: &BinaryName,
    this_class: ClassConstantIndex,
    entity_class: &BinaryName,
    emit_frames: bool,
) -> Result<Method, Error> {
    let entity = FieldType::object(entity_class.clone());
    let descriptor = MethodDescriptor {
        parameters: vec![entity.clone()],
        return_type: Some(FieldType::boolean()),
    };
    let shape = MethodShape {
        this_class,
        is_static: false,
        is_constructor: false,
        descriptor: &descriptor,
    };
    let mut code_list = CodeList::new(constants, &shape)?;
    let initial_frame = code_list.labelled_initial_frame()?;
    let start = code_list.fresh_label();
    let not_same = code_list.fresh_label();
    let done = code_list.fresh_label();
    let end = code_list.fresh_label();

    let mut emitter = Emitter::new(constants, &mut code_list.label_generator);
    emitter.place_label(start);
    emitter.load_this();
    emitter.get_local(1, &entity);
    emitter.branch(BranchInstruction::IfACmp(EqComparison::NE, not_same));
    emitter.const_int(1)?;
    emitter.branch(BranchInstruction::Goto(done));
    emitter.place_label(not_same);
    if emit_frames {
        emitter.frame(initial_frame.clone());
    }
    emitter.const_int(0)?;
    emitter.place_label(done);
    if emit_frames {
        let mut frame = initial_frame;
        frame.stack.push(VerificationType::Integer);
        emitter.frame(frame);
    }
    emitter.return_(descriptor.return_type.as_ref());
    emitter.place_label(end);
    let (items, depth) = emitter.finish();

    code_list.items = items;
    code_list.max_stack =
        u16::try_from(depth).map_err(|_| crate::jvm::Error::MaxStackOverflow(depth))?;
    let this_type = FieldType::object(class_name.clone());
    code_list.add_local_variable(constants, start, end, "this", &this_type, 0)?;
    code_list.add_local_variable(constants, start, end, "other", &entity, 1)?;
    let code = code_list.assemble(constants, emit_frames)?;

    Ok(Method {
        access_flags: MethodAccessFlags::PUBLIC,
        name_index: constants.get_utf8(EQUALS_FOR_CACHING)?,
        descriptor_index: constants.get_utf8(&descriptor.render())?,
        attributes: vec![constants.get_attribute(code)?],
    })
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::jvm::class_file::Version;
    use crate::jvm::code::{CodeItem, Instruction};
    use crate::jvm::ClassAccessFlags;
    use crate::patch::{CallTarget, FieldPatch, InMemoryCatalog, MethodRef};

    fn empty_class(name: &str) -> ClassFile {
        let mut constants = ConstantsPool::new();
        let this_class = constants.get_class(name).unwrap();
        let super_class = constants.get_class("java/lang/Object").unwrap();
        ClassFile {
            version: Version::JAVA8,
            constants,
            access_flags: ClassAccessFlags::PUBLIC | ClassAccessFlags::SUPER,
            this_class,
            super_class: Some(super_class),
            interfaces: vec![],
            fields: vec![],
            methods: vec![],
            attributes: vec![],
        }
    }

    fn decoded_body(class: &mut ClassFile, method_idx: usize) -> CodeList {
        let method = class.methods[method_idx].clone();
        let name = class.constants.utf8(method.name_index).unwrap().to_owned();
        let descriptor = class.constants.utf8(method.descriptor_index).unwrap().to_owned();
        let descriptor = parse_method_descriptor(&name, &descriptor).unwrap();
        let code: Code = method.attributes[0].decode().unwrap();
        let shape = MethodShape {
            this_class: class.this_class,
            is_static: method.access_flags.contains(MethodAccessFlags::STATIC),
            is_constructor: false,
            descriptor: &descriptor,
        };
        CodeList::decode(&code, &mut class.constants, &shape).unwrap()
    }

    fn instructions(code: &CodeList) -> Vec<CodeItem> {
        code.items
            .iter()
            .filter(|item| matches!(item, CodeItem::Instruction(_) | CodeItem::Branch(_)))
            .cloned()
            .collect()
    }

    #[test]
    fn missing_forward_target_is_synthesized() {
        let settings = Settings::default();
        let catalog = InMemoryCatalog::default();
        let mut class_patch = ClassPatch::default();
        class_patch.method_forward = Some(MethodForward::new(
            MethodRef::new(BinaryName::name("me/Sample"), "hashCode", Some("()I")),
            CallTarget::new(BinaryName::name("me/Hashes"), "hashCode"),
        ));

        let mut class = empty_class("me/Sample");
        let summary = ClassRewriter::new(&class_patch, &settings, &catalog)
            .rewrite(&mut class)
            .unwrap();
        assert_eq!(summary.methods_added, 1);

        let body = decoded_body(&mut class, 0);
        let items = instructions(&body);
        assert_eq!(items[0], CodeItem::Instruction(Instruction::ALoad(0)));
        match &items[1] {
            CodeItem::Instruction(Instruction::Invoke(_, method)) => {
                let (class, name, descriptor) = class.constants.method_ref(*method).unwrap();
                assert_eq!(class, "me/Hashes");
                assert_eq!(name, "hashCode");
                assert_eq!(descriptor, "(Ljava/lang/Object;)I");
            }
            other => panic!("unexpected {:?}", other),
        }
        assert_eq!(items[2], CodeItem::Branch(BranchInstruction::IReturn));
    }

    #[test]
    fn constructor_forwards_are_rejected() {
        let settings = Settings::default();
        let catalog = InMemoryCatalog::default();
        let mut class_patch = ClassPatch::default();
        class_patch.method_forward = Some(MethodForward::new(
            MethodRef::new(BinaryName::name("me/Sample"), "<init>", Some("()V")),
            CallTarget::new(BinaryName::name("me/Hooks"), "init"),
        ));
        let mut class = empty_class("me/Sample");
        let result = ClassRewriter::new(&class_patch, &settings, &catalog).rewrite(&mut class);
        assert!(matches!(result, Err(Error::MalformedRule { .. })));
    }

    #[test]
    fn poisoned_equality_compares_identity() {
        let settings = Settings::default();
        let catalog = InMemoryCatalog::default();
        let class_patch = ClassPatch {
            poison_cache_equality: true,
            ..ClassPatch::default()
        };
        let mut class = empty_class("me/Sample");
        ClassRewriter::new(&class_patch, &settings, &catalog)
            .rewrite(&mut class)
            .unwrap();

        let method = &class.methods[0];
        assert_eq!(
            class.constants.utf8(method.descriptor_index).unwrap(),
            "(Loptimus/platform/storable/Entity;)Z"
        );
        let body = decoded_body(&mut class, 0);
        assert_eq!(body.local_variables.len(), 2);
        let frames = body
            .items
            .iter()
            .filter(|item| matches!(item, CodeItem::Frame(_)))
            .count();
        assert_eq!(frames, 2);
        assert!(matches!(
            instructions(&body)[2],
            CodeItem::Branch(BranchInstruction::IfACmp(EqComparison::NE, _))
        ));
    }

    #[test]
    fn duplicate_fields_are_added_once() {
        let settings = Settings::default();
        let catalog = InMemoryCatalog::default();
        let mut class_patch = ClassPatch::default();
        class_patch.field_patches.push(FieldPatch::new("__cached"));
        class_patch
            .field_patches
            .push(FieldPatch::new("__cached").with_descriptor("I"));
        class_patch
            .field_patches
            .push(FieldPatch::new("__count").with_descriptor("J"));

        let mut class = empty_class("me/Sample");
        let summary = ClassRewriter::new(&class_patch, &settings, &catalog)
            .rewrite(&mut class)
            .unwrap();
        assert_eq!(summary.fields_added, 2);
        let descriptors: Vec<_> = class
            .fields
            .iter()
            .map(|field| class.constants.utf8(field.descriptor_index).unwrap())
            .collect();
        assert_eq!(descriptors, vec!["Ljava/lang/Object;", "J"]);
    }
}
