use molt_capi_obj_model::OwnedRef;

use super::{BuildFlags, ValueBuilder, count_format};
use crate::args::VaList;
use crate::context::CapiContext;

/// Where a stack build put its results.
pub enum ArgStack<'s> {
    /// The caller's buffer, filled in place.
    Small(&'s mut [Option<OwnedRef>]),
    /// A buffer allocated because the caller's was too small; exactly as
    /// long as the format's arity.
    Heap(Vec<Option<OwnedRef>>),
}

impl ArgStack<'_> {
    pub fn as_slice(&self) -> &[Option<OwnedRef>] {
        match self {
            ArgStack::Small(slots) => slots,
            ArgStack::Heap(slots) => slots,
        }
    }

    pub fn as_ptr(&self) -> *const Option<OwnedRef> {
        self.as_slice().as_ptr()
    }

    pub fn is_heap(&self) -> bool {
        matches!(self, ArgStack::Heap(_))
    }
}

/// `_Py_VaBuildStack` result: the buffer plus how many leading slots it
/// filled.
pub struct BuiltStack<'s> {
    pub stack: ArgStack<'s>,
    pub nargs: usize,
}

impl BuiltStack<'_> {
    /// The filled slots.
    pub fn args(&self) -> &[Option<OwnedRef>] {
        let slots = self.stack.as_slice();
        slots.get(..self.nargs).unwrap_or(slots)
    }
}

/// `_Py_VaBuildStack`: builds the top-level directives of `format` as a flat
/// argument vector, in `small_stack` when it is long enough.
pub fn va_build_stack<'s>(
    ctx: &mut CapiContext,
    small_stack: &'s mut [Option<OwnedRef>],
    format: &[u8],
    va: &VaList<'_>,
) -> Option<BuiltStack<'s>> {
    build_stack(ctx, small_stack, format, va.clone(), BuildFlags::NONE)
}

/// `_Py_VaBuildStack_SizeT`.
pub fn va_build_stack_size_t<'s>(
    ctx: &mut CapiContext,
    small_stack: &'s mut [Option<OwnedRef>],
    format: &[u8],
    va: &VaList<'_>,
) -> Option<BuiltStack<'s>> {
    build_stack(ctx, small_stack, format, va.clone(), BuildFlags::SIZE_T)
}

fn build_stack<'s>(
    ctx: &mut CapiContext,
    small_stack: &'s mut [Option<OwnedRef>],
    format: &[u8],
    va: VaList<'_>,
    flags: BuildFlags,
) -> Option<BuiltStack<'s>> {
    let n = usize::try_from(count_format(ctx, format, 0)).ok()?;
    if n == 0 {
        return Some(BuiltStack {
            stack: ArgStack::Small(small_stack),
            nargs: 0,
        });
    }
    let mut builder = ValueBuilder::new(ctx, format, va, flags);
    if let Some(slots) = small_stack.get_mut(..n) {
        builder.mkstack(slots, 0)?;
        return Some(BuiltStack {
            stack: ArgStack::Small(small_stack),
            nargs: n,
        });
    }
    let mut heap = Vec::new();
    if heap.try_reserve_exact(n).is_err() {
        return builder.ctx.no_memory();
    }
    heap.resize_with(n, || None);
    builder.mkstack(&mut heap, 0)?;
    Some(BuiltStack {
        stack: ArgStack::Heap(heap),
        nargs: n,
    })
}

impl ValueBuilder<'_, '_, '_> {
    /// Fills every slot of `slots` from the format. On failure the slots
    /// already filled are emptied again.
    fn mkstack(&mut self, slots: &mut [Option<OwnedRef>], endchar: u8) -> Option<()> {
        let n = slots.len();
        let mut placed = 0;
        for slot in slots.iter_mut() {
            let Some(item) = self.mkvalue() else {
                self.ignore(endchar, n - placed - 1);
                break;
            };
            *slot = Some(item);
            placed += 1;
        }
        if placed == n && self.close_group(endchar).is_some() {
            return Some(());
        }
        for slot in slots.iter_mut().take(placed) {
            *slot = None;
        }
        None
    }
}
