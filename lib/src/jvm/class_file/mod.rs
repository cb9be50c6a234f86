//! Binary layout of class files
//!
//! Everything in here maps closely onto [chapter 4][0] of the JVM specification: parsing keeps
//! constant pool indices stable so that the parts of a class that are not rewritten can be
//! written back out byte for byte.
//!
//! [0]: https://docs.oracle.com/javase/specs/jvms/se17/html/jvms-4.html

mod attribute;
mod class;
mod constants;
mod field;
mod method;
mod serialize;
mod version;

pub use attribute::*;
pub use class::*;
pub use constants::*;
pub use field::*;
pub use method::*;
pub use serialize::*;
pub use version::*;
