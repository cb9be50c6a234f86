//! Load-time rewriting of JVM class files.
//!
//! The crate is split in two layers:
//!
//!   - [`jvm`] parses class files into an editable model (constant pool, members, and
//!     label-based method bodies) and serializes them back again
//!
//!   - [`patch`] decides, per class and per method, which instrumentation applies and rewrites
//!     the method bodies accordingly: entry/exit hooks, result caching, call forwarding and
//!     lazy-value bracketing
//!
//! A host class loader drives the whole thing through [`patch::ClassFileTransformer`].

pub mod jvm;
pub mod patch;
mod util;
