//! Per-thread execution context: the pending-exception channel and the
//! interpreter-level bookkeeping the module helpers need.

use molt_capi_obj_model::{ObjError, OwnedRef};

use crate::error::{ExcKind, ExceptionSentinel, PyErr};

/// `PyInterpreterState` as far as module support is concerned.
#[derive(Default)]
pub struct InterpreterState {
    max_module_number: isize,
    pub(crate) modules_by_index: Vec<Option<OwnedRef>>,
}

impl InterpreterState {
    /// Hands out module-def indices 1, 2, 3, ...
    pub(crate) fn next_module_index(&mut self) -> isize {
        self.max_module_number += 1;
        self.max_module_number
    }

    pub fn max_module_number(&self) -> isize {
        self.max_module_number
    }
}

/// `PyThreadState` for the shim. Every C-API entry point takes one.
#[derive(Default)]
pub struct CapiContext {
    pending: Option<PyErr>,
    interp: InterpreterState,
}

impl CapiContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// `PyErr_SetString`: replaces any pending exception and returns the
    /// caller's failure sentinel.
    pub fn raise_exception<T: ExceptionSentinel>(
        &mut self,
        kind: ExcKind,
        message: impl Into<String>,
    ) -> T {
        self.raise_err(PyErr::new(kind, message))
    }

    pub fn raise_err<T: ExceptionSentinel>(&mut self, err: PyErr) -> T {
        log::debug!("raise {err}");
        self.pending = Some(err);
        T::exception_sentinel()
    }

    pub fn raise_obj_error<T: ExceptionSentinel>(&mut self, err: ObjError) -> T {
        self.raise_err(PyErr::from(err))
    }

    /// `PyErr_NoMemory`.
    pub fn no_memory<T: ExceptionSentinel>(&mut self) -> T {
        self.raise_exception(ExcKind::MemoryError, "")
    }

    /// `PyErr_BadArgument`.
    pub fn bad_argument<T: ExceptionSentinel>(&mut self) -> T {
        self.raise_exception(ExcKind::TypeError, "bad argument type for built-in operation")
    }

    /// `PyErr_Occurred`.
    pub fn exception_pending(&self) -> bool {
        self.pending.is_some()
    }

    pub fn exception(&self) -> Option<&PyErr> {
        self.pending.as_ref()
    }

    /// `PyErr_Fetch`: takes the pending exception, leaving none.
    pub fn fetch_exception(&mut self) -> Option<PyErr> {
        self.pending.take()
    }

    /// `PyErr_Restore`: reinstates `err`, discarding whatever is pending.
    pub fn restore_exception(&mut self, err: Option<PyErr>) {
        self.pending = err;
    }

    pub fn clear_exception(&mut self) {
        self.pending = None;
    }

    pub fn interp(&self) -> &InterpreterState {
        &self.interp
    }

    pub(crate) fn interp_mut(&mut self) -> &mut InterpreterState {
        &mut self.interp
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_raise_returns_sentinel() {
        let mut ctx = CapiContext::new();
        let status: i32 = ctx.raise_exception(ExcKind::TypeError, "nope");
        assert_eq!(status, -1);
        let obj: Option<OwnedRef> = ctx.raise_exception(ExcKind::ValueError, "later");
        assert!(obj.is_none());
        assert_eq!(
            ctx.exception(),
            Some(&PyErr::new(ExcKind::ValueError, "later"))
        );
    }

    #[test]
    fn test_fetch_and_restore() {
        let mut ctx = CapiContext::new();
        ctx.raise_exception::<()>(ExcKind::SystemError, "first");
        let saved = ctx.fetch_exception();
        assert!(!ctx.exception_pending());
        ctx.raise_exception::<()>(ExcKind::TypeError, "second");
        ctx.restore_exception(saved);
        assert_eq!(ctx.exception().map(|err| err.kind), Some(ExcKind::SystemError));
        ctx.clear_exception();
        assert!(!ctx.exception_pending());
    }

    #[test]
    fn test_obj_error_mapping() {
        let mut ctx = CapiContext::new();
        ctx.raise_obj_error::<()>(ObjError::Unhashable("list"));
        assert_eq!(
            ctx.exception().map(ToString::to_string).as_deref(),
            Some("TypeError: unhashable type: 'list'")
        );
    }
}
