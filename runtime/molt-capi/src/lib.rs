//! C-API value construction and module support for the molt CPython ABI
//! shim.
//!
//! [`build`] implements the `Py_BuildValue` family over the object model in
//! `molt_capi_obj_model`; [`modsupport`] holds the module and type
//! bookkeeping helpers. Every entry point takes a [`CapiContext`], which
//! carries the pending exception the way a `PyThreadState` does.

pub mod args;
pub mod build;
pub mod context;
pub mod error;
pub mod modsupport;

pub use args::{Converter, VaArg, VaError, VaList};
pub use build::{
    ArgStack, BuildFlags, BuiltStack, build_value, build_value_size_t, count_format,
    va_build_stack, va_build_stack_size_t, va_build_value, va_build_value_size_t,
};
pub use context::{CapiContext, InterpreterState};
pub use error::{ExcKind, ExceptionSentinel, PyErr};
