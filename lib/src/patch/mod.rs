//! Rule-driven instrumentation of classes as they are loaded
//!
//! ### Flow
//!
//! The host calls [`ClassFileTransformer::transform`] on an [`Instrumenter`] with the bytes of
//! every class it loads. The instrumenter looks up the [`ClassPatch`] for the class in its
//! [`RuleCatalog`], lets the global modes of its [`Settings`] extend it, and only then parses
//! the class. A [`ClassRewriter`] then picks a treatment for every method (see
//! [`heuristics::select_treatment`]) and hands the ones that need changes to a
//! [`MethodRewriter`].
//!
//! Classes no rule applies to are returned as they came in, without being parsed.
//!
//! ### Injected calls
//!
//! All injected code consists of calls to static methods ([`CallTarget`]s) passing some
//! combination of:
//!
//!   - a per-method correlation ID (an `int` allocated by the catalog)
//!   - the receiver (or `null` in static methods and constructors)
//!   - the arguments, boxed into an `Object[]`
//!   - the value being returned or the exception being thrown, boxed
//!   - the value returned by the entry hook, kept in a fresh local
//!
//! The descriptor of a call is inferred from what is passed, unless the target gives one
//! explicitly, in which case the two must agree slot for slot.

mod catalog;
mod class_rewriter;
mod errors;
pub mod heuristics;
mod method_rewriter;
mod rules;
mod settings;
mod transformer;

pub use catalog::*;
pub use class_rewriter::*;
pub use errors::*;
pub use method_rewriter::MethodRewriter;
pub use rules::{CallTarget, ClassPatch, FieldPatch, MethodForward, MethodPatch, MethodRef};
pub use settings::*;
pub use transformer::*;
