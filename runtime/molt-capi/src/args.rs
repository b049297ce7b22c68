//! Pre-decoded variadic arguments.
//!
//! A native caller's `...` is decoded once, up front, into a slice of
//! [`VaArg`] slots carrying the promoted C type of each argument. The builder
//! then walks the slots with a [`VaList`] cursor; copying the cursor is
//! `va_copy`.

use std::ffi::CStr;
use std::fmt;

use libc::{c_int, c_long, c_uint, c_ulong, c_ulonglong, c_longlong, c_void, ssize_t, wchar_t};
use molt_capi_obj_model::{Complex, ObjPtr, OwnedRef};

use crate::context::CapiContext;

/// Caller-supplied construction hook for `O&`, `N&` and `S&`. Called once
/// with the opaque argument that follows it; never retained.
pub type Converter<'a> = &'a dyn Fn(&mut CapiContext, *mut c_void) -> Option<OwnedRef>;

#[derive(Clone, Copy)]
pub enum VaArg<'a> {
    Int(c_int),
    UInt(c_uint),
    Long(c_long),
    ULong(c_ulong),
    LongLong(c_longlong),
    ULongLong(c_ulonglong),
    SSize(ssize_t),
    Double(f64),
    /// `Py_complex *`.
    Complex(Option<&'a Complex>),
    /// `const char *`: the memory the pointer addresses, `None` for `NULL`.
    Str(Option<&'a [u8]>),
    /// `const wchar_t *`.
    Wide(Option<&'a [wchar_t]>),
    /// `PyObject *`.
    Object(Option<ObjPtr>),
    Converter(Converter<'a>),
    Ptr(*mut c_void),
}

impl<'a> VaArg<'a> {
    pub fn c_str(value: &'a CStr) -> Self {
        VaArg::Str(Some(value.to_bytes_with_nul()))
    }

    pub fn object(obj: ObjPtr) -> Self {
        VaArg::Object(Some(obj))
    }

    /// The C type this slot was decoded as.
    pub fn kind_name(&self) -> &'static str {
        match self {
            VaArg::Int(_) => "int",
            VaArg::UInt(_) => "unsigned int",
            VaArg::Long(_) => "long",
            VaArg::ULong(_) => "unsigned long",
            VaArg::LongLong(_) => "long long",
            VaArg::ULongLong(_) => "unsigned long long",
            VaArg::SSize(_) => "Py_ssize_t",
            VaArg::Double(_) => "double",
            VaArg::Complex(_) => "Py_complex *",
            VaArg::Str(_) => "char *",
            VaArg::Wide(_) => "wchar_t *",
            VaArg::Object(_) => "PyObject *",
            VaArg::Converter(_) => "converter",
            VaArg::Ptr(_) => "void *",
        }
    }
}

impl fmt::Debug for VaArg<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VaArg::Int(v) => write!(f, "Int({v})"),
            VaArg::UInt(v) => write!(f, "UInt({v})"),
            VaArg::Long(v) => write!(f, "Long({v})"),
            VaArg::ULong(v) => write!(f, "ULong({v})"),
            VaArg::LongLong(v) => write!(f, "LongLong({v})"),
            VaArg::ULongLong(v) => write!(f, "ULongLong({v})"),
            VaArg::SSize(v) => write!(f, "SSize({v})"),
            VaArg::Double(v) => write!(f, "Double({v})"),
            VaArg::Complex(v) => write!(f, "Complex({v:?})"),
            VaArg::Str(v) => write!(f, "Str({:?})", v.map(<[u8]>::len)),
            VaArg::Wide(v) => write!(f, "Wide({:?})", v.map(<[wchar_t]>::len)),
            VaArg::Object(v) => write!(f, "Object({v:?})"),
            VaArg::Converter(_) => f.write_str("Converter(..)"),
            VaArg::Ptr(v) => write!(f, "Ptr({:p})", *v),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum VaError {
    #[error("argument {index}: expected {expected}, got {found}")]
    Mismatch {
        index: usize,
        expected: &'static str,
        found: &'static str,
    },
    #[error("argument {index}: expected {expected}, but the argument list is exhausted")]
    Exhausted { index: usize, expected: &'static str },
}

/// Cursor over decoded arguments. Each read advances it by exactly one slot,
/// whether or not the slot had the expected type.
#[derive(Clone, Debug)]
pub struct VaList<'a> {
    args: &'a [VaArg<'a>],
    pos: usize,
}

impl<'a> VaList<'a> {
    pub fn new(args: &'a [VaArg<'a>]) -> Self {
        Self { args, pos: 0 }
    }

    pub fn position(&self) -> usize {
        self.pos
    }

    pub fn remaining(&self) -> usize {
        self.args.len().saturating_sub(self.pos)
    }

    /// Advances past one slot without interpreting it.
    pub fn skip(&mut self) -> Option<VaArg<'a>> {
        let arg = self.args.get(self.pos).copied();
        self.pos += 1;
        arg
    }

    fn take<T>(
        &mut self,
        expected: &'static str,
        pick: impl FnOnce(VaArg<'a>) -> Option<T>,
    ) -> Result<T, VaError> {
        let index = self.pos;
        let Some(arg) = self.skip() else {
            return Err(VaError::Exhausted { index, expected });
        };
        pick(arg).ok_or(VaError::Mismatch {
            index,
            expected,
            found: arg.kind_name(),
        })
    }

    pub fn next_int(&mut self) -> Result<c_int, VaError> {
        self.take("int", |arg| match arg {
            VaArg::Int(v) => Some(v),
            _ => None,
        })
    }

    pub fn next_uint(&mut self) -> Result<c_uint, VaError> {
        self.take("unsigned int", |arg| match arg {
            VaArg::UInt(v) => Some(v),
            _ => None,
        })
    }

    pub fn next_long(&mut self) -> Result<c_long, VaError> {
        self.take("long", |arg| match arg {
            VaArg::Long(v) => Some(v),
            _ => None,
        })
    }

    pub fn next_ulong(&mut self) -> Result<c_ulong, VaError> {
        self.take("unsigned long", |arg| match arg {
            VaArg::ULong(v) => Some(v),
            _ => None,
        })
    }

    pub fn next_longlong(&mut self) -> Result<c_longlong, VaError> {
        self.take("long long", |arg| match arg {
            VaArg::LongLong(v) => Some(v),
            _ => None,
        })
    }

    pub fn next_ulonglong(&mut self) -> Result<c_ulonglong, VaError> {
        self.take("unsigned long long", |arg| match arg {
            VaArg::ULongLong(v) => Some(v),
            _ => None,
        })
    }

    /// `Py_ssize_t`; a `long` slot is accepted where the two have one width.
    pub fn next_ssize(&mut self) -> Result<ssize_t, VaError> {
        self.take("Py_ssize_t", |arg| match arg {
            VaArg::SSize(v) => Some(v),
            VaArg::Long(v) if size_of::<c_long>() == size_of::<ssize_t>() => Some(v as ssize_t),
            _ => None,
        })
    }

    pub fn next_double(&mut self) -> Result<f64, VaError> {
        self.take("double", |arg| match arg {
            VaArg::Double(v) => Some(v),
            _ => None,
        })
    }

    pub fn next_complex(&mut self) -> Result<Option<&'a Complex>, VaError> {
        self.take("Py_complex *", |arg| match arg {
            VaArg::Complex(v) => Some(v),
            _ => None,
        })
    }

    pub fn next_str(&mut self) -> Result<Option<&'a [u8]>, VaError> {
        self.take("char *", |arg| match arg {
            VaArg::Str(v) => Some(v),
            _ => None,
        })
    }

    pub fn next_wide(&mut self) -> Result<Option<&'a [wchar_t]>, VaError> {
        self.take("wchar_t *", |arg| match arg {
            VaArg::Wide(v) => Some(v),
            _ => None,
        })
    }

    pub fn next_object(&mut self) -> Result<Option<ObjPtr>, VaError> {
        self.take("PyObject *", |arg| match arg {
            VaArg::Object(v) => Some(v),
            _ => None,
        })
    }

    pub fn next_converter(&mut self) -> Result<Converter<'a>, VaError> {
        self.take("converter", |arg| match arg {
            VaArg::Converter(v) => Some(v),
            _ => None,
        })
    }

    pub fn next_ptr(&mut self) -> Result<*mut c_void, VaError> {
        self.take("void *", |arg| match arg {
            VaArg::Ptr(v) => Some(v),
            _ => None,
        })
    }
}
