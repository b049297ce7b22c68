use std::fmt;

use molt_capi_obj_model::ObjError;

/// Exception classes the shim raises.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum ExcKind {
    SystemError,
    OverflowError,
    MemoryError,
    TypeError,
    ValueError,
    IndexError,
    UnicodeDecodeError,
}

impl ExcKind {
    pub fn name(self) -> &'static str {
        match self {
            ExcKind::SystemError => "SystemError",
            ExcKind::OverflowError => "OverflowError",
            ExcKind::MemoryError => "MemoryError",
            ExcKind::TypeError => "TypeError",
            ExcKind::ValueError => "ValueError",
            ExcKind::IndexError => "IndexError",
            ExcKind::UnicodeDecodeError => "UnicodeDecodeError",
        }
    }
}

impl fmt::Display for ExcKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A raised exception: class plus message.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
#[error("{kind}: {message}")]
pub struct PyErr {
    pub kind: ExcKind,
    pub message: String,
}

impl PyErr {
    pub fn new(kind: ExcKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}

impl From<ObjError> for PyErr {
    fn from(err: ObjError) -> Self {
        let kind = match err {
            ObjError::Unhashable(_) | ObjError::WrongType { .. } => ExcKind::TypeError,
            ObjError::Utf8Decode { .. } => ExcKind::UnicodeDecodeError,
            ObjError::CodePointRange(_) | ObjError::OrdinalRange(_) => ExcKind::ValueError,
            ObjError::IndexOutOfRange(_) => ExcKind::IndexError,
        };
        PyErr::new(kind, err.to_string())
    }
}

/// The value a C-API function returns once it has raised: `NULL`, `-1`.
pub trait ExceptionSentinel {
    fn exception_sentinel() -> Self;
}

impl<T> ExceptionSentinel for Option<T> {
    fn exception_sentinel() -> Self {
        None
    }
}

impl ExceptionSentinel for i32 {
    fn exception_sentinel() -> Self {
        -1
    }
}

impl ExceptionSentinel for isize {
    fn exception_sentinel() -> Self {
        -1
    }
}

impl ExceptionSentinel for bool {
    fn exception_sentinel() -> Self {
        false
    }
}

impl ExceptionSentinel for () {
    fn exception_sentinel() -> Self {}
}
