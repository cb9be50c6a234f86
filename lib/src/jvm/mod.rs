//! Read, edit, and write JVM classes
//!
//! ### Round trip
//!
//! A class file is parsed into a [`class_file::ClassFile`], which keeps the constant pool intact
//! so that untouched members are written back byte for byte. Method bodies that need changes are
//! decoded into a [`code::CodeList`], edited, then assembled back into a `Code` attribute:
//!
//! ```
//! use classpatch::jvm::class_file::{ClassFile, Code};
//! use classpatch::jvm::code::{CodeList, MethodShape};
//! use classpatch::jvm::*;
//!
//! # fn round_trip(bytes: &[u8]) -> Result<Vec<u8>, Error> {
//! let mut class = ClassFile::parse(bytes)?;
//! let emit_frames = class.version.uses_stack_map_frames();
//!
//! for method in &mut class.methods {
//!     let name = class.constants.utf8(method.name_index)?.to_owned();
//!     let descriptor = MethodDescriptor::parse(class.constants.utf8(method.descriptor_index)?)?;
//!     let code_idx = match method.code_attribute_position(&class.constants)? {
//!         Some(code_idx) => code_idx,
//!         None => continue,
//!     };
//!     let code: Code = method.attributes[code_idx].decode()?;
//!     let shape = MethodShape {
//!         this_class: class.this_class,
//!         is_static: method.access_flags.contains(MethodAccessFlags::STATIC),
//!         is_constructor: name == "<init>",
//!         descriptor: &descriptor,
//!     };
//!     let code_list = CodeList::decode(&code, &mut class.constants, &shape)?;
//!     let code = code_list.assemble(&mut class.constants, emit_frames)?;
//!     method.attributes[code_idx] = class.constants.get_attribute(code)?;
//! }
//!
//! class.to_bytes()
//! # }
//! ```

mod access_flags;
pub mod class_file;
pub mod code;
mod descriptors;
mod errors;
mod names;

pub use access_flags::*;
pub use descriptors::*;
pub use errors::*;
pub use names::*;
