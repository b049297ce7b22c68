//! Format-driven value construction (`Py_BuildValue` and its variants).
//!
//! A build makes two passes over the format: [`count_format`] sizes the
//! top-level group without touching the arguments, then a [`ValueBuilder`]
//! walks the format and the argument cursor together, emitting one object
//! per directive. Every intermediate object is an [`OwnedRef`], so a failed
//! build releases whatever it had made by dropping it. Arguments that hand
//! over a claim (`N`) are still consumed after a failure; see
//! `ValueBuilder::ignore`.

use molt_capi_obj_model::{OwnedRef, none};

use crate::args::{VaArg, VaError, VaList};
use crate::context::CapiContext;
use crate::error::ExcKind;

mod compose;
mod emit;
mod scan;
mod stack;

pub use scan::count_format;
pub use stack::{ArgStack, BuiltStack, va_build_stack, va_build_stack_size_t};

/// Per-call build options.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct BuildFlags(u32);

impl BuildFlags {
    pub const NONE: Self = Self(0);
    /// `#` lengths are `Py_ssize_t` (`PY_SSIZE_T_CLEAN`). Without it a `#`
    /// format is refused.
    pub const SIZE_T: Self = Self(1);

    pub fn size_t(self) -> bool {
        self.0 & Self::SIZE_T.0 != 0
    }
}

/// `Py_BuildValue`.
pub fn build_value(ctx: &mut CapiContext, format: &[u8], args: &[VaArg<'_>]) -> Option<OwnedRef> {
    build(ctx, format, VaList::new(args), BuildFlags::NONE)
}

/// `_Py_BuildValue_SizeT`.
pub fn build_value_size_t(
    ctx: &mut CapiContext,
    format: &[u8],
    args: &[VaArg<'_>],
) -> Option<OwnedRef> {
    build(ctx, format, VaList::new(args), BuildFlags::SIZE_T)
}

/// `Py_VaBuildValue`. Works on a copy of `va`; the caller's cursor does not
/// move.
pub fn va_build_value(ctx: &mut CapiContext, format: &[u8], va: &VaList<'_>) -> Option<OwnedRef> {
    build(ctx, format, va.clone(), BuildFlags::NONE)
}

/// `_Py_VaBuildValue_SizeT`.
pub fn va_build_value_size_t(
    ctx: &mut CapiContext,
    format: &[u8],
    va: &VaList<'_>,
) -> Option<OwnedRef> {
    build(ctx, format, va.clone(), BuildFlags::SIZE_T)
}

fn build(ctx: &mut CapiContext, format: &[u8], va: VaList<'_>, flags: BuildFlags) -> Option<OwnedRef> {
    let n = count_format(ctx, format, 0);
    if n < 0 {
        return None;
    }
    if n == 0 {
        return Some(none());
    }
    let mut builder = ValueBuilder::new(ctx, format, va, flags);
    if n == 1 {
        builder.mkvalue()
    } else {
        builder.mktuple(0, n)
    }
}

/// One in-flight build: the format cursor, the argument cursor and the
/// context errors are raised on. Nested groups recurse on the same builder.
pub(crate) struct ValueBuilder<'c, 'f, 'a> {
    ctx: &'c mut CapiContext,
    format: &'f [u8],
    pos: usize,
    va: VaList<'a>,
    flags: BuildFlags,
}

impl<'c, 'f, 'a> ValueBuilder<'c, 'f, 'a> {
    pub(crate) fn new(
        ctx: &'c mut CapiContext,
        format: &'f [u8],
        va: VaList<'a>,
        flags: BuildFlags,
    ) -> Self {
        Self {
            ctx,
            format,
            pos: 0,
            va,
            flags,
        }
    }

    /// The byte under the cursor; `0` once past the end.
    fn peek(&self) -> u8 {
        self.format.get(self.pos).copied().unwrap_or(0)
    }

    fn bump(&mut self) -> u8 {
        let ch = self.peek();
        self.pos += 1;
        ch
    }

    fn rest(&self) -> &'f [u8] {
        self.format.get(self.pos..).unwrap_or(&[])
    }

    /// Arity of the group starting at the cursor, closed by `endchar`.
    fn count(&mut self, endchar: u8) -> isize {
        let rest = self.rest();
        count_format(self.ctx, rest, endchar)
    }

    /// Reads one argument slot. A slot of the wrong kind means the caller's
    /// arguments do not match the format.
    fn read<T>(&mut self, next: impl FnOnce(&mut VaList<'a>) -> Result<T, VaError>) -> Option<T> {
        match next(&mut self.va) {
            Ok(value) => Some(value),
            Err(err) => self
                .ctx
                .raise_exception(ExcKind::SystemError, format!("Py_BuildValue: {err}")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use molt_capi_obj_model::{int_value, none_ptr, object_repr};

    fn repr(obj: &Option<OwnedRef>) -> Option<String> {
        obj.as_ref().map(|obj| object_repr(obj.as_obj()))
    }

    #[test]
    fn test_empty_format_is_none() {
        let mut ctx = CapiContext::new();
        let obj = build_value(&mut ctx, b"", &[]);
        assert_eq!(obj.map(|obj| obj.as_obj()), Some(none_ptr()));
        let obj = build_value(&mut ctx, b" , :", &[]);
        assert_eq!(obj.map(|obj| obj.as_obj()), Some(none_ptr()));
    }

    #[test]
    fn test_single_directive_is_not_wrapped() {
        let mut ctx = CapiContext::new();
        let obj = build_value(&mut ctx, b"i", &[VaArg::Int(7)]).unwrap();
        assert_eq!(int_value(obj.as_obj()).map(ToString::to_string).as_deref(), Some("7"));
        let obj = build_value(&mut ctx, b"(i)", &[VaArg::Int(7)]);
        assert_eq!(repr(&obj).as_deref(), Some("(7,)"));
    }

    #[test]
    fn test_many_directives_make_a_tuple() {
        let mut ctx = CapiContext::new();
        let obj = build_value(&mut ctx, b"ii", &[VaArg::Int(1), VaArg::Int(2)]);
        assert_eq!(repr(&obj).as_deref(), Some("(1, 2)"));
    }

    #[test]
    fn test_va_forms_do_not_advance_the_caller() {
        let mut ctx = CapiContext::new();
        let args = [VaArg::Int(1), VaArg::Int(2), VaArg::Int(3)];
        let mut va = VaList::new(&args);
        assert_eq!(va.next_int(), Ok(1));
        let obj = va_build_value(&mut ctx, b"ii", &va);
        assert_eq!(repr(&obj).as_deref(), Some("(2, 3)"));
        assert_eq!(va.position(), 1);
        let obj = va_build_value_size_t(&mut ctx, b"[i]", &va);
        assert_eq!(repr(&obj).as_deref(), Some("[2]"));
    }

    #[test]
    fn test_unmatched_paren_builds_nothing() {
        let mut ctx = CapiContext::new();
        assert!(build_value(&mut ctx, b"(ii", &[VaArg::Int(1), VaArg::Int(2)]).is_none());
        assert_eq!(
            ctx.exception().map(ToString::to_string).as_deref(),
            Some("SystemError: unmatched paren in format")
        );
    }

    #[test]
    fn test_flags() {
        assert!(BuildFlags::SIZE_T.size_t());
        assert!(!BuildFlags::NONE.size_t());
        assert_eq!(BuildFlags::default(), BuildFlags::NONE);
    }
}
