//! Onload Operator CRD Definitions
//!
//! Custom resource types owned by the Onload operator, plus the
//! Kernel Module Management `Module` type the operator creates.

pub mod kmm_module;
pub mod onload;

pub use kmm_module::*;
pub use onload::*;
