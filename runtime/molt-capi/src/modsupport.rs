//! Module and type bookkeeping: namespace insertion, module-def indices and
//! the per-interpreter module table.

use std::ffi::CStr;
use std::ptr::NonNull;

use libc::{c_int, c_long};
use molt_capi_obj_model::{
    ObjPtr, OwnedRef, TPFLAGS_HEAPTYPE, TPFLAGS_READY, dict_set_item_str, int_from_i64,
    int_value, module_data, module_def_data, str_from_utf8, tuple_from_vec, type_data,
};
use num_traits::ToPrimitive;

use crate::context::CapiContext;
use crate::error::ExcKind;

/// `PyModule_AddObjectRef`: binds `name` to `value` in the module namespace.
/// The caller keeps its own claim on `value`.
pub fn module_add_object_ref(
    ctx: &mut CapiContext,
    module: ObjPtr,
    name: &str,
    value: Option<ObjPtr>,
) -> c_int {
    let Some(data) = module_data(module) else {
        return ctx.raise_exception(
            ExcKind::TypeError,
            "PyModule_AddObjectRef() first argument must be a module",
        );
    };
    let Some(value) = value else {
        if !ctx.exception_pending() {
            ctx.raise_exception::<()>(
                ExcKind::SystemError,
                "PyModule_AddObjectRef() must be called with an exception raised if value is NULL",
            );
        }
        return -1;
    };
    if let Err(err) = dict_set_item_str(data.dict.as_obj(), name, value) {
        return ctx.raise_obj_error(err);
    }
    log::trace!("module {}: bound {name} to a {}", data.name, value.type_name());
    0
}

/// `PyModule_AddObject`: like [`module_add_object_ref`], but on success the
/// claim in `value` moves into the module and the slot is left empty. On
/// failure the caller still owns it.
pub fn module_add_object(
    ctx: &mut CapiContext,
    module: ObjPtr,
    name: &str,
    value: &mut Option<OwnedRef>,
) -> c_int {
    let status = module_add_object_ref(ctx, module, name, value.as_ref().map(OwnedRef::as_obj));
    if status == 0 {
        drop(value.take());
    }
    status
}

pub fn module_add_int_constant(
    ctx: &mut CapiContext,
    module: ObjPtr,
    name: &str,
    value: c_long,
) -> c_int {
    let obj = int_from_i64(i64::from(value));
    module_add_object_ref(ctx, module, name, Some(obj.as_obj()))
}

/// `PyModule_AddStringConstant`; `value` is decoded as UTF-8.
pub fn module_add_string_constant(
    ctx: &mut CapiContext,
    module: ObjPtr,
    name: &str,
    value: &CStr,
) -> c_int {
    let obj = match str_from_utf8(value.to_bytes()) {
        Ok(obj) => obj,
        Err(err) => return ctx.raise_obj_error(err),
    };
    module_add_object_ref(ctx, module, name, Some(obj.as_obj()))
}

/// `PyType_Ready`, as far as the shim tracks it: marks the type ready.
pub fn type_ready(ctx: &mut CapiContext, ty: ObjPtr) -> c_int {
    let Some(data) = type_data(ty) else {
        return ctx.bad_argument();
    };
    data.flags.set(data.flags.get() | TPFLAGS_READY);
    0
}

/// `PyModule_AddType`: readies `ty` and binds it under the last component
/// of its dotted name.
pub fn module_add_type(ctx: &mut CapiContext, module: ObjPtr, ty: ObjPtr) -> c_int {
    if type_ready(ctx, ty) < 0 {
        return -1;
    }
    let Some(data) = type_data(ty) else {
        return ctx.bad_argument();
    };
    module_add_object_ref(ctx, module, data.short_name(), Some(ty))
}

/// `PyModule_GetDef` (borrowed). `None` without an exception when the
/// module was not created from a def.
pub fn module_get_def(ctx: &mut CapiContext, module: ObjPtr) -> Option<ObjPtr> {
    let Some(data) = module_data(module) else {
        return ctx.bad_argument();
    };
    data.def.as_ref().map(OwnedRef::as_obj)
}

/// `PyModule_GetState`. `None` without an exception when the module has
/// no state.
pub fn module_get_state(ctx: &mut CapiContext, module: ObjPtr) -> Option<NonNull<u8>> {
    let Some(data) = module_data(module) else {
        return ctx.bad_argument();
    };
    data.state_ptr()
}

/// `PyModuleDef_Init`: gives `def` the next index of this interpreter on
/// first use and returns it.
pub fn module_def_init(ctx: &mut CapiContext, def: ObjPtr) -> Option<ObjPtr> {
    let Some(data) = module_def_data(def) else {
        return ctx.bad_argument();
    };
    if data.index.get() == 0 {
        let index = ctx.interp_mut().next_module_index();
        data.index.set(index);
        log::trace!("moduledef {} assigned index {index}", data.name);
    }
    Some(def)
}

/// `_PyState_AddModule`: records `module` in the slot of `def`'s index,
/// growing the table as needed.
pub fn state_add_module(ctx: &mut CapiContext, module: ObjPtr, def: ObjPtr) -> c_int {
    let Some(data) = module_def_data(def) else {
        return ctx.bad_argument();
    };
    if data.has_slots {
        return ctx.raise_exception(
            ExcKind::SystemError,
            "PyState_AddModule called on module with slots",
        );
    }
    let Ok(index) = usize::try_from(data.index.get()) else {
        return ctx.raise_exception(ExcKind::SystemError, "invalid module index");
    };
    if index == 0 {
        return ctx.raise_exception(ExcKind::SystemError, "invalid module index");
    }
    let table = &mut ctx.interp_mut().modules_by_index;
    if table.len() <= index {
        table.resize_with(index + 1, || None);
    }
    let previous = table
        .get_mut(index)
        .and_then(|slot| slot.replace(OwnedRef::new_ref(module)));
    drop(previous);
    log::trace!("module table slot {index} now holds {}", data.name);
    0
}

/// `PyState_RemoveModule`: empties the slot of `def`'s index.
pub fn state_remove_module(ctx: &mut CapiContext, def: ObjPtr) -> c_int {
    let Some(data) = module_def_data(def) else {
        return ctx.bad_argument();
    };
    if data.has_slots {
        return ctx.raise_exception(
            ExcKind::SystemError,
            "PyState_RemoveModule called on module with slots",
        );
    }
    let index = match usize::try_from(data.index.get()) {
        Ok(index) if index > 0 => index,
        _ => return ctx.raise_exception(ExcKind::SystemError, "invalid module index"),
    };
    let Some(slot) = ctx.interp_mut().modules_by_index.get_mut(index) else {
        return ctx.raise_exception(ExcKind::SystemError, "Module index out of bounds.");
    };
    let previous = slot.take();
    drop(previous);
    0
}

/// `PyState_FindModule` (borrowed). Never raises.
pub fn state_find_module(ctx: &CapiContext, def: ObjPtr) -> Option<ObjPtr> {
    let data = module_def_data(def)?;
    if data.has_slots {
        return None;
    }
    let index = usize::try_from(data.index.get()).ok().filter(|&index| index > 0)?;
    ctx.interp()
        .modules_by_index
        .get(index)?
        .as_ref()
        .map(OwnedRef::as_obj)
}

/// `PyType_GetModule` (borrowed).
pub fn type_get_module(ctx: &mut CapiContext, ty: ObjPtr) -> Option<ObjPtr> {
    let Some(data) = type_data(ty) else {
        return ctx.bad_argument();
    };
    if data.flags.get() & TPFLAGS_HEAPTYPE == 0 {
        return ctx.raise_exception(
            ExcKind::TypeError,
            format!("PyType_GetModule: Type '{}' is not a heap type", data.name),
        );
    }
    match &data.module {
        Some(module) => Some(module.as_obj()),
        None => ctx.raise_exception(
            ExcKind::TypeError,
            format!(
                "PyType_GetModule: Type '{}' has no associated module",
                data.name
            ),
        ),
    }
}

pub fn type_get_module_state(ctx: &mut CapiContext, ty: ObjPtr) -> Option<NonNull<u8>> {
    let module = type_get_module(ctx, ty)?;
    module_get_state(ctx, module)
}

/// `_Py_convert_optional_to_ssize_t`, an argument-clinic converter:
/// returns 1 on success, 0 with an exception pending. `None` leaves
/// `result` untouched.
pub fn convert_optional_to_ssize_t(ctx: &mut CapiContext, obj: ObjPtr, result: &mut isize) -> c_int {
    if obj.is_none() {
        return 1;
    }
    let Some(value) = int_value(obj) else {
        ctx.raise_exception::<()>(
            ExcKind::TypeError,
            format!(
                "argument should be integer or None, not '{:.200}'",
                obj.type_name()
            ),
        );
        return 0;
    };
    let Some(value) = value.to_isize() else {
        ctx.raise_exception::<()>(
            ExcKind::OverflowError,
            format!(
                "cannot fit '{:.200}' into an index-sized integer",
                obj.type_name()
            ),
        );
        return 0;
    };
    *result = value;
    1
}

/// `PyTuple_Pack`: a tuple holding a new claim on each of `items`.
pub fn tuple_pack(items: &[ObjPtr]) -> OwnedRef {
    tuple_from_vec(items.iter().copied().map(OwnedRef::new_ref).collect())
}
