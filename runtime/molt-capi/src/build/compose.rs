use molt_capi_obj_model::{OwnedRef, dict_new, dict_set_item, list_new, seq_set_item, tuple_new};

use super::ValueBuilder;
use crate::error::ExcKind;

impl ValueBuilder<'_, '_, '_> {
    /// Builds an `n`-tuple closed by `endchar` (`0` for the implicit
    /// top-level tuple). A negative `n` is a failed count whose error is
    /// already pending.
    pub(crate) fn mktuple(&mut self, endchar: u8, n: isize) -> Option<OwnedRef> {
        let n = usize::try_from(n).ok()?;
        self.fill_sequence(tuple_new(n), endchar, n)
    }

    pub(crate) fn mklist(&mut self, endchar: u8, n: isize) -> Option<OwnedRef> {
        let n = usize::try_from(n).ok()?;
        self.fill_sequence(list_new(n), endchar, n)
    }

    fn fill_sequence(&mut self, seq: OwnedRef, endchar: u8, n: usize) -> Option<OwnedRef> {
        for idx in 0..n {
            let Some(item) = self.mkvalue() else {
                self.ignore(endchar, n - idx - 1);
                return None;
            };
            if let Err(err) = seq_set_item(seq.as_obj(), idx, item) {
                self.ctx.raise_obj_error::<()>(err);
                self.ignore(endchar, n - idx - 1);
                return None;
            }
        }
        self.close_group(endchar)?;
        Some(seq)
    }

    /// Builds a dict from `n / 2` key/value pairs. Equal keys: last write
    /// wins.
    pub(crate) fn mkdict(&mut self, endchar: u8, n: isize) -> Option<OwnedRef> {
        let n = usize::try_from(n).ok()?;
        if n % 2 != 0 {
            self.ctx
                .raise_exception::<()>(ExcKind::SystemError, "Bad dict format");
            self.ignore(endchar, n);
            return None;
        }
        let dict = dict_new();
        for idx in (0..n).step_by(2) {
            let Some(key) = self.mkvalue() else {
                self.ignore(endchar, n - idx - 1);
                return None;
            };
            let Some(value) = self.mkvalue() else {
                self.ignore(endchar, n - idx - 2);
                return None;
            };
            if let Err(err) = dict_set_item(dict.as_obj(), key.as_obj(), value.as_obj()) {
                self.ctx.raise_obj_error::<()>(err);
                self.ignore(endchar, n - idx - 2);
                return None;
            }
        }
        self.close_group(endchar)?;
        Some(dict)
    }

    /// Consumes the next `k` directives of a group that has already failed,
    /// dropping whatever they produce, then checks the closer. Runs with an
    /// exception pending and leaves that exception in place.
    pub(crate) fn ignore(&mut self, endchar: u8, k: usize) {
        for _ in 0..k {
            let saved = self.ctx.fetch_exception();
            let discarded = self.mkvalue();
            self.ctx.restore_exception(saved);
            drop(discarded);
        }
        // The check runs even after a failure, so a bad closer replaces the
        // pending exception.
        let _ = self.close_group(endchar);
    }

    /// Requires the cursor to sit on `endchar` and steps over it.
    pub(crate) fn close_group(&mut self, endchar: u8) -> Option<()> {
        if self.peek() != endchar {
            return self
                .ctx
                .raise_exception(ExcKind::SystemError, "Unmatched paren in format");
        }
        if endchar != 0 {
            self.pos += 1;
        }
        Some(())
    }
}
