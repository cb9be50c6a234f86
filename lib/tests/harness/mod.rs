//! Build small classes in-process, and take rewritten ones apart again

#![allow(dead_code)]

use classpatch::jvm::class_file::{ClassFile, Code, ConstantsPool, Field, Method, Version};
use classpatch::jvm::code::{
    CodeItem, CodeList, Emitter, Instruction, InvokeType, MethodShape,
};
use classpatch::jvm::{
    ClassAccessFlags, Error, FieldAccessFlags, MethodAccessFlags, MethodDescriptor,
    ParseDescriptor,
};

pub struct ClassBuilder {
    class: ClassFile,
}

impl ClassBuilder {
    pub fn new(name: &str, super_class: &str) -> ClassBuilder {
        let mut constants = ConstantsPool::new();
        let this_class = constants.get_class(name).unwrap();
        let super_class = constants.get_class(super_class).unwrap();
        ClassBuilder {
            class: ClassFile {
                version: Version::JAVA8,
                constants,
                access_flags: ClassAccessFlags::PUBLIC | ClassAccessFlags::SUPER,
                this_class,
                super_class: Some(super_class),
                interfaces: vec![],
                fields: vec![],
                methods: vec![],
                attributes: vec![],
            },
        }
    }

    pub fn version(mut self, version: Version) -> ClassBuilder {
        self.class.version = version;
        self
    }

    pub fn access_flags(mut self, access_flags: ClassAccessFlags) -> ClassBuilder {
        self.class.access_flags = access_flags;
        self
    }

    pub fn interface(mut self, name: &str) -> ClassBuilder {
        let interface = self.class.constants.get_class(name).unwrap();
        self.class.interfaces.push(interface);
        self
    }

    pub fn field(mut self, name: &str, descriptor: &str) -> ClassBuilder {
        let field = Field {
            access_flags: FieldAccessFlags::PRIVATE,
            name_index: self.class.constants.get_utf8(name).unwrap(),
            descriptor_index: self.class.constants.get_utf8(descriptor).unwrap(),
            attributes: vec![],
        };
        self.class.fields.push(field);
        self
    }

    /// Add a method whose body is generated with an emitter
    pub fn method(
        self,
        access_flags: MethodAccessFlags,
        name: &str,
        descriptor: &str,
        body: impl FnOnce(&mut Emitter<'_>) -> Result<(), Error>,
    ) -> ClassBuilder {
        self.method_items(access_flags, name, descriptor, |constants, code_list| {
            let mut emitter = Emitter::new(constants, &mut code_list.label_generator);
            body(&mut emitter)?;
            let (items, depth) = emitter.finish();
            code_list.items = items;
            code_list.max_stack = depth as u16;
            Ok(())
        })
    }

    /// Add a method whose body is filled in directly
    pub fn method_items(
        mut self,
        access_flags: MethodAccessFlags,
        name: &str,
        descriptor: &str,
        body: impl FnOnce(&mut ConstantsPool, &mut CodeList) -> Result<(), Error>,
    ) -> ClassBuilder {
        let parsed = MethodDescriptor::parse(descriptor).unwrap();
        let shape = MethodShape {
            this_class: self.class.this_class,
            is_static: access_flags.contains(MethodAccessFlags::STATIC),
            is_constructor: name == "<init>",
            descriptor: &parsed,
        };
        let constants = &mut self.class.constants;
        let mut code_list = CodeList::new(constants, &shape).unwrap();
        body(constants, &mut code_list).unwrap();
        let emit_frames = self.class.version.uses_stack_map_frames();
        let code = code_list.assemble(constants, emit_frames).unwrap();
        let method = Method {
            access_flags,
            name_index: constants.get_utf8(name).unwrap(),
            descriptor_index: constants.get_utf8(descriptor).unwrap(),
            attributes: vec![constants.get_attribute(code).unwrap()],
        };
        self.class.methods.push(method);
        self
    }

    pub fn abstract_method(mut self, name: &str, descriptor: &str) -> ClassBuilder {
        let constants = &mut self.class.constants;
        let method = Method {
            access_flags: MethodAccessFlags::PUBLIC | MethodAccessFlags::ABSTRACT,
            name_index: constants.get_utf8(name).unwrap(),
            descriptor_index: constants.get_utf8(descriptor).unwrap(),
            attributes: vec![],
        };
        self.class.methods.push(method);
        self
    }

    pub fn build(self) -> Vec<u8> {
        self.class.to_bytes().unwrap()
    }
}

/// Names of the methods, in order
pub fn method_names(class: &ClassFile) -> Vec<String> {
    class
        .methods
        .iter()
        .map(|method| class.constants.utf8(method.name_index).unwrap().to_owned())
        .collect()
}

pub fn field_names(class: &ClassFile) -> Vec<String> {
    class
        .fields
        .iter()
        .map(|field| class.constants.utf8(field.name_index).unwrap().to_owned())
        .collect()
}

fn find_method(class: &ClassFile, name: &str) -> Method {
    class
        .methods
        .iter()
        .find(|method| class.constants.utf8(method.name_index).unwrap() == name)
        .unwrap_or_else(|| panic!("no method {}", name))
        .clone()
}

/// Raw `Code` attribute of a method
pub fn code(class: &ClassFile, name: &str) -> Code {
    let method = find_method(class, name);
    let position = method
        .code_attribute_position(&class.constants)
        .unwrap()
        .unwrap();
    method.attributes[position].decode().unwrap()
}

/// Decoded body of a method
pub fn body(class: &mut ClassFile, name: &str) -> CodeList {
    let method = find_method(class, name);
    let descriptor = class.constants.utf8(method.descriptor_index).unwrap().to_owned();
    let descriptor = MethodDescriptor::parse(&descriptor).unwrap();
    let code = code(class, name);
    let shape = MethodShape {
        this_class: class.this_class,
        is_static: method.access_flags.contains(MethodAccessFlags::STATIC),
        is_constructor: name == "<init>",
        descriptor: &descriptor,
    };
    CodeList::decode(&code, &mut class.constants, &shape).unwrap()
}

/// Instructions of a body, with constants resolved and labels blanked out
pub fn listing(class: &ClassFile, body: &CodeList) -> Vec<String> {
    body.items
        .iter()
        .filter_map(|item| describe(&class.constants, item))
        .collect()
}

fn describe(constants: &ConstantsPool, item: &CodeItem) -> Option<String> {
    let text = match item {
        CodeItem::Instruction(Instruction::Invoke(kind, method)) => {
            let (class, name, descriptor) = constants.method_ref(*method).unwrap();
            let kind = match kind {
                InvokeType::Virtual => "invokevirtual",
                InvokeType::Special => "invokespecial",
                InvokeType::Static => "invokestatic",
                InvokeType::Interface(_) => "invokeinterface",
            };
            format!("{} {}.{}{}", kind, class, name, descriptor)
        }
        CodeItem::Instruction(Instruction::GetField(field)) => {
            let (class, name, descriptor) = constants.field_ref(*field).unwrap();
            format!("getfield {}.{}:{}", class, name, descriptor)
        }
        CodeItem::Instruction(Instruction::PutField(field)) => {
            let (class, name, descriptor) = constants.field_ref(*field).unwrap();
            format!("putfield {}.{}:{}", class, name, descriptor)
        }
        CodeItem::Instruction(Instruction::CheckCast(class)) => {
            format!("checkcast {}", constants.class_name(*class).unwrap())
        }
        CodeItem::Instruction(Instruction::ANewArray(class)) => {
            format!("anewarray {}", constants.class_name(*class).unwrap())
        }
        CodeItem::Instruction(insn) => format!("{:?}", insn),
        CodeItem::Branch(branch) => {
            let blanked = branch
                .map_labels(|_| Ok::<(), ()>(()), |_| Ok(()))
                .unwrap();
            format!("{:?}", blanked)
        }
        CodeItem::Label(_) | CodeItem::LineNumber(_) | CodeItem::Frame(_) => return None,
    };
    Some(text)
}

pub fn frame_count(body: &CodeList) -> usize {
    body.items
        .iter()
        .filter(|item| matches!(item, CodeItem::Frame(_)))
        .count()
}
