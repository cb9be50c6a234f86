//! Method bodies as editable instruction lists
//!
//! ### Structure
//!
//! The bytecode in a [`Code`](crate::jvm::class_file::Code) attribute refers to everything by
//! offset: jump targets, exception ranges, local variable scopes, line numbers and stack map
//! frames. That makes inserting even a single instruction painful. Decoding a method body into a
//! [`CodeList`] replaces every one of those offsets by a [`SynLabel`], so that instrumentation can
//! splice [`CodeItem`]s anywhere and leave [`CodeList::assemble`] to work out the new offsets.
//!
//! The [list of bytecode instructions][0] gets split into two groups:
//!
//!   - [`Instruction`] for straight-line instructions
//!   - [`BranchInstruction`] for instructions that may jump, return, or throw
//!
//! ### Code generation
//!
//! New sequences are built with an [`Emitter`], which picks the right width-dependent
//! instructions (eg. `dup` vs. `dup2`) and keeps track of how deep the operand stack gets.
//!
//! [0]: https://docs.oracle.com/javase/specs/jvms/se18/html/jvms-6.html#jvms-6.5

mod code;
mod emitter;
mod frame;
mod instructions;
pub mod jump_encoding;
mod label;

pub use code::*;
pub use emitter::*;
pub use frame::*;
pub use instructions::*;
pub use label::*;
