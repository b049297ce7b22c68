//! Core object representation for the molt C-API shim.
//!
//! Every object is a heap allocation headed by a [`MoltHeader`] carrying the
//! type tag and the reference count, the shape native extensions expect
//! behind a `PyObject *`. [`ObjPtr`] is a borrowed reference; [`OwnedRef`]
//! holds exactly one claim and releases it when dropped.

use std::cell::{Cell, RefCell};
use std::fmt;
use std::ptr::NonNull;
use std::sync::atomic::{AtomicU32, Ordering as AtomicOrdering};

use num_bigint::BigInt;
use wtf8::Wtf8Buf;

mod dict;
mod hash;
mod repr;
mod text;

pub use dict::DictTable;
pub use hash::{object_eq, object_hash};
pub use repr::object_repr;
pub use text::{
    str_code_points, str_from_code_points, str_from_ordinal, str_from_str, str_from_utf8,
    str_to_string,
};

pub const TYPE_ID_NONE: u32 = 1;
pub const TYPE_ID_INT: u32 = 2;
pub const TYPE_ID_FLOAT: u32 = 3;
pub const TYPE_ID_COMPLEX: u32 = 4;
pub const TYPE_ID_STRING: u32 = 5;
pub const TYPE_ID_BYTES: u32 = 6;
pub const TYPE_ID_TUPLE: u32 = 7;
pub const TYPE_ID_LIST: u32 = 8;
pub const TYPE_ID_DICT: u32 = 9;
pub const TYPE_ID_MODULE: u32 = 10;
pub const TYPE_ID_TYPE: u32 = 11;
pub const TYPE_ID_MODULE_DEF: u32 = 12;

/// `tp_flags` bits, same values as CPython.
pub const TPFLAGS_HEAPTYPE: u64 = 1 << 9;
pub const TPFLAGS_READY: u64 = 1 << 12;

pub const HEADER_FLAG_IMMORTAL: u64 = 1;
/// Set on a quarantined object whose last claim was released.
pub const HEADER_FLAG_RELEASED: u64 = 1 << 1;
const IMMORTAL_REF_COUNT: u32 = 1 << 30;

#[repr(C)]
pub struct MoltHeader {
    pub type_id: u32,
    pub ref_count: AtomicU32,
    pub flags: u64,
}

#[repr(C)]
pub struct MoltObjectBox {
    header: MoltHeader,
    payload: Payload,
}

/// `Py_complex`.
#[repr(C)]
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct Complex {
    pub real: f64,
    pub imag: f64,
}

pub enum Payload {
    None,
    Int(BigInt),
    Float(f64),
    Complex(Complex),
    Str(Wtf8Buf),
    Bytes(Box<[u8]>),
    /// Slots start out empty (`NULL`) until filled by `seq_set_item`.
    Tuple(RefCell<Vec<Option<OwnedRef>>>),
    List(RefCell<Vec<Option<OwnedRef>>>),
    Dict(RefCell<DictTable>),
    Module(ModuleData),
    Type(TypeData),
    ModuleDef(ModuleDefData),
}

impl Payload {
    fn type_id(&self) -> u32 {
        match self {
            Payload::None => TYPE_ID_NONE,
            Payload::Int(_) => TYPE_ID_INT,
            Payload::Float(_) => TYPE_ID_FLOAT,
            Payload::Complex(_) => TYPE_ID_COMPLEX,
            Payload::Str(_) => TYPE_ID_STRING,
            Payload::Bytes(_) => TYPE_ID_BYTES,
            Payload::Tuple(_) => TYPE_ID_TUPLE,
            Payload::List(_) => TYPE_ID_LIST,
            Payload::Dict(_) => TYPE_ID_DICT,
            Payload::Module(_) => TYPE_ID_MODULE,
            Payload::Type(_) => TYPE_ID_TYPE,
            Payload::ModuleDef(_) => TYPE_ID_MODULE_DEF,
        }
    }
}

pub struct ModuleData {
    pub name: String,
    pub dict: OwnedRef,
    pub def: Option<OwnedRef>,
    state: RefCell<Box<[u8]>>,
}

impl ModuleData {
    /// `md_state`: `None` when the defining `ModuleDef` asked for no state.
    pub fn state_ptr(&self) -> Option<NonNull<u8>> {
        let mut state = self.state.borrow_mut();
        if state.is_empty() {
            return None;
        }
        NonNull::new(state.as_mut_ptr())
    }
}

pub struct TypeData {
    /// `tp_name`, possibly dotted (`pkg.mod.Name`).
    pub name: String,
    pub flags: Cell<u64>,
    /// `ht_module`; only meaningful for heap types.
    pub module: Option<OwnedRef>,
}

impl TypeData {
    /// The name after the last dot, as `_PyType_Name` reports it.
    pub fn short_name(&self) -> &str {
        match self.name.rfind('.') {
            Some(pos) => &self.name[pos + 1..],
            None => &self.name,
        }
    }
}

pub struct ModuleDefData {
    pub name: String,
    /// `m_size`; a non-positive size means the module carries no state.
    pub size: isize,
    /// Multi-phase initialisation (`m_slots != NULL`).
    pub has_slots: bool,
    /// `m_base.m_index`; zero until the def is initialised.
    pub index: Cell<isize>,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ObjError {
    #[error("unhashable type: '{0}'")]
    Unhashable(&'static str),
    #[error("'utf-8' codec can't decode byte 0x{byte:02x} in position {position}: {reason}")]
    Utf8Decode {
        byte: u8,
        position: usize,
        reason: &'static str,
    },
    #[error("character U+{0:x} is not in range [U+0000; U+10ffff]")]
    CodePointRange(u32),
    #[error("chr() arg not in range(0x110000)")]
    OrdinalRange(i64),
    #[error("{0} assignment index out of range")]
    IndexOutOfRange(&'static str),
    #[error("expected {expected}, got '{found}'")]
    WrongType {
        expected: &'static str,
        found: &'static str,
    },
}

thread_local! {
    static LIVE_OBJECTS: Cell<usize> = const { Cell::new(0) };
    static NONE_OBJECT: Cell<Option<ObjPtr>> = const { Cell::new(None) };
}

/// Number of mortal objects allocated on this thread and not yet freed.
pub fn live_objects() -> usize {
    LIVE_OBJECTS.with(|count| count.get())
}

/// A borrowed object reference.
///
/// Holding an `ObjPtr` does not keep the object alive: it is valid only while
/// someone holds a claim on it, exactly like a borrowed `PyObject *`.
#[derive(Copy, Clone, PartialEq, Eq, Hash)]
#[repr(transparent)]
pub struct ObjPtr(NonNull<MoltObjectBox>);

impl ObjPtr {
    pub fn from_raw(ptr: *mut MoltObjectBox) -> Option<Self> {
        NonNull::new(ptr).map(Self)
    }

    pub fn as_raw(self) -> *mut MoltObjectBox {
        self.0.as_ptr()
    }

    pub fn addr(self) -> usize {
        self.0.as_ptr() as usize
    }

    fn header<'a>(self) -> &'a MoltHeader {
        unsafe { &(*self.0.as_ptr()).header }
    }

    pub fn payload<'a>(self) -> &'a Payload {
        unsafe { &(*self.0.as_ptr()).payload }
    }

    pub fn type_id(self) -> u32 {
        self.header().type_id
    }

    pub fn ref_count(self) -> u32 {
        self.header().ref_count.load(AtomicOrdering::Relaxed)
    }

    pub fn is_immortal(self) -> bool {
        self.header().flags & HEADER_FLAG_IMMORTAL != 0
    }

    /// Only ever true with `refcount_verify`, which keeps released objects
    /// around instead of freeing them.
    pub fn is_released(self) -> bool {
        self.header().flags & HEADER_FLAG_RELEASED != 0
    }

    pub fn is_none(self) -> bool {
        self.type_id() == TYPE_ID_NONE
    }

    /// `Py_TYPE(obj)->tp_name` for the builtin layouts.
    pub fn type_name(self) -> &'static str {
        match self.type_id() {
            TYPE_ID_NONE => "NoneType",
            TYPE_ID_INT => "int",
            TYPE_ID_FLOAT => "float",
            TYPE_ID_COMPLEX => "complex",
            TYPE_ID_STRING => "str",
            TYPE_ID_BYTES => "bytes",
            TYPE_ID_TUPLE => "tuple",
            TYPE_ID_LIST => "list",
            TYPE_ID_DICT => "dict",
            TYPE_ID_MODULE => "module",
            TYPE_ID_TYPE => "type",
            TYPE_ID_MODULE_DEF => "moduledef",
            _ => "object",
        }
    }
}

impl fmt::Debug for ObjPtr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "<{} object at {:p}>", self.type_name(), self.0.as_ptr())
    }
}

/// One claim on an object, released on drop.
#[repr(transparent)]
pub struct OwnedRef(ObjPtr);

impl OwnedRef {
    /// Adopts a claim the caller already holds, without touching the count.
    ///
    /// # Safety
    /// The caller must own one claim on `ptr` and give it up.
    pub unsafe fn from_raw(ptr: ObjPtr) -> Self {
        Self(ptr)
    }

    /// Adds a new claim on `ptr`.
    pub fn new_ref(ptr: ObjPtr) -> Self {
        inc_ref(ptr);
        Self(ptr)
    }

    pub fn as_obj(&self) -> ObjPtr {
        self.0
    }

    /// Hands the claim to the caller; the count is left as is.
    pub fn into_raw(self) -> ObjPtr {
        let ptr = self.0;
        std::mem::forget(self);
        ptr
    }
}

impl Clone for OwnedRef {
    fn clone(&self) -> Self {
        Self::new_ref(self.0)
    }
}

impl Drop for OwnedRef {
    fn drop(&mut self) {
        unsafe { dec_ref(self.0) };
    }
}

impl fmt::Debug for OwnedRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

pub fn inc_ref(obj: ObjPtr) {
    #[cfg(feature = "refcount_verify")]
    if obj.is_released() {
        panic!("inc_ref on released {} object", obj.type_name());
    }
    obj.header().ref_count.fetch_add(1, AtomicOrdering::Relaxed);
}

/// # Safety
/// The caller must own the claim it releases. Frees the object when the
/// count reaches zero, after which `obj` dangles.
pub unsafe fn dec_ref(obj: ObjPtr) {
    #[cfg(feature = "refcount_verify")]
    if obj.is_released() {
        panic!("dec_ref on released {} object", obj.type_name());
    }
    let header = obj.header();
    let prev = header.ref_count.fetch_sub(1, AtomicOrdering::AcqRel);
    if prev == 1 && header.flags & HEADER_FLAG_IMMORTAL == 0 {
        LIVE_OBJECTS.with(|count| count.set(count.get().saturating_sub(1)));
        unsafe { release(obj) };
    }
}

#[cfg(not(feature = "refcount_verify"))]
unsafe fn release(obj: ObjPtr) {
    drop(unsafe { Box::from_raw(obj.as_raw()) });
}

/// Quarantines instead of freeing: the payload (and every claim it holds)
/// goes, the header stays readable and flagged, and the box is leaked.
#[cfg(feature = "refcount_verify")]
unsafe fn release(obj: ObjPtr) {
    let boxed = unsafe { &mut *obj.as_raw() };
    boxed.header.flags |= HEADER_FLAG_RELEASED;
    drop(std::mem::replace(&mut boxed.payload, Payload::None));
}

fn alloc_object(payload: Payload) -> OwnedRef {
    let header = MoltHeader {
        type_id: payload.type_id(),
        ref_count: AtomicU32::new(1),
        flags: 0,
    };
    let boxed = Box::new(MoltObjectBox { header, payload });
    LIVE_OBJECTS.with(|count| count.set(count.get() + 1));
    OwnedRef(ObjPtr(NonNull::from(Box::leak(boxed))))
}

/// The per-thread `None` singleton (borrowed).
pub fn none_ptr() -> ObjPtr {
    NONE_OBJECT.with(|slot| {
        if let Some(ptr) = slot.get() {
            return ptr;
        }
        let boxed = Box::new(MoltObjectBox {
            header: MoltHeader {
                type_id: TYPE_ID_NONE,
                ref_count: AtomicU32::new(IMMORTAL_REF_COUNT),
                flags: HEADER_FLAG_IMMORTAL,
            },
            payload: Payload::None,
        });
        let ptr = ObjPtr(NonNull::from(Box::leak(boxed)));
        slot.set(Some(ptr));
        ptr
    })
}

pub fn none() -> OwnedRef {
    OwnedRef::new_ref(none_ptr())
}

pub fn int_from_i64(value: i64) -> OwnedRef {
    alloc_object(Payload::Int(BigInt::from(value)))
}

pub fn int_from_u64(value: u64) -> OwnedRef {
    alloc_object(Payload::Int(BigInt::from(value)))
}

pub fn int_from_bigint(value: BigInt) -> OwnedRef {
    alloc_object(Payload::Int(value))
}

pub fn int_value<'a>(obj: ObjPtr) -> Option<&'a BigInt> {
    match obj.payload() {
        Payload::Int(value) => Some(value),
        _ => None,
    }
}

pub fn float_from_f64(value: f64) -> OwnedRef {
    alloc_object(Payload::Float(value))
}

pub fn float_value(obj: ObjPtr) -> Option<f64> {
    match obj.payload() {
        Payload::Float(value) => Some(*value),
        _ => None,
    }
}

pub fn complex_from_parts(value: Complex) -> OwnedRef {
    alloc_object(Payload::Complex(value))
}

pub fn complex_value(obj: ObjPtr) -> Option<Complex> {
    match obj.payload() {
        Payload::Complex(value) => Some(*value),
        _ => None,
    }
}

pub fn bytes_from_slice(data: &[u8]) -> OwnedRef {
    alloc_object(Payload::Bytes(data.into()))
}

pub fn bytes_value<'a>(obj: ObjPtr) -> Option<&'a [u8]> {
    match obj.payload() {
        Payload::Bytes(data) => Some(data),
        _ => None,
    }
}

fn empty_slots(len: usize) -> Vec<Option<OwnedRef>> {
    std::iter::repeat_with(|| None).take(len).collect()
}

/// A tuple of `len` empty slots; fill it with [`seq_set_item`].
pub fn tuple_new(len: usize) -> OwnedRef {
    alloc_object(Payload::Tuple(RefCell::new(empty_slots(len))))
}

pub fn tuple_from_vec(items: Vec<OwnedRef>) -> OwnedRef {
    let slots = items.into_iter().map(Some).collect();
    alloc_object(Payload::Tuple(RefCell::new(slots)))
}

pub fn list_new(len: usize) -> OwnedRef {
    alloc_object(Payload::List(RefCell::new(empty_slots(len))))
}

fn seq_slots<'a>(seq: ObjPtr) -> Option<(&'a RefCell<Vec<Option<OwnedRef>>>, &'static str)> {
    match seq.payload() {
        Payload::Tuple(slots) => Some((slots, "tuple")),
        Payload::List(slots) => Some((slots, "list")),
        _ => None,
    }
}

/// Installs `item` at `index`, consuming its claim (`PyTuple_SetItem`
/// semantics). Any previous occupant is released.
pub fn seq_set_item(seq: ObjPtr, index: usize, item: OwnedRef) -> Result<(), ObjError> {
    let Some((slots, kind)) = seq_slots(seq) else {
        return Err(ObjError::WrongType {
            expected: "tuple or list",
            found: seq.type_name(),
        });
    };
    let previous = {
        let mut slots = slots.borrow_mut();
        let Some(slot) = slots.get_mut(index) else {
            return Err(ObjError::IndexOutOfRange(kind));
        };
        slot.replace(item)
    };
    drop(previous);
    Ok(())
}

pub fn seq_get_item(seq: ObjPtr, index: usize) -> Option<ObjPtr> {
    let (slots, _) = seq_slots(seq)?;
    let slots = slots.borrow();
    slots.get(index)?.as_ref().map(OwnedRef::as_obj)
}

pub fn seq_len(seq: ObjPtr) -> Option<usize> {
    seq_slots(seq).map(|(slots, _)| slots.borrow().len())
}

pub fn dict_new() -> OwnedRef {
    alloc_object(Payload::Dict(RefCell::new(DictTable::new())))
}

fn dict_table<'a>(dict: ObjPtr) -> Result<&'a RefCell<DictTable>, ObjError> {
    match dict.payload() {
        Payload::Dict(table) => Ok(table),
        _ => Err(ObjError::WrongType {
            expected: "dict",
            found: dict.type_name(),
        }),
    }
}

/// `PyDict_SetItem`: claims both `key` and `value`; an equal key already
/// present keeps its key object and gets the new value.
pub fn dict_set_item(dict: ObjPtr, key: ObjPtr, value: ObjPtr) -> Result<(), ObjError> {
    let table = dict_table(dict)?;
    let previous = table.borrow_mut().insert(key, value)?;
    drop(previous);
    Ok(())
}

pub fn dict_get_item(dict: ObjPtr, key: ObjPtr) -> Result<Option<ObjPtr>, ObjError> {
    dict_table(dict)?.borrow().get(key)
}

pub fn dict_set_item_str(dict: ObjPtr, key: &str, value: ObjPtr) -> Result<(), ObjError> {
    let key = str_from_str(key);
    dict_set_item(dict, key.as_obj(), value)
}

pub fn dict_get_item_str(dict: ObjPtr, key: &str) -> Option<ObjPtr> {
    let key = str_from_str(key);
    dict_get_item(dict, key.as_obj()).ok().flatten()
}

pub fn dict_len(dict: ObjPtr) -> Option<usize> {
    dict_table(dict).ok().map(|table| table.borrow().len())
}

/// A fresh module whose namespace already binds `__name__`.
pub fn module_new(name: &str) -> OwnedRef {
    module_alloc(name, None, 0)
}

/// `PyModule_FromDefAndSpec` without the import machinery: the module
/// remembers `def` and gets a zeroed state block of `def.size` bytes.
pub fn module_from_def(def: ObjPtr) -> Result<OwnedRef, ObjError> {
    let Payload::ModuleDef(data) = def.payload() else {
        return Err(ObjError::WrongType {
            expected: "moduledef",
            found: def.type_name(),
        });
    };
    let size = usize::try_from(data.size).unwrap_or(0);
    Ok(module_alloc(&data.name, Some(OwnedRef::new_ref(def)), size))
}

fn module_alloc(name: &str, def: Option<OwnedRef>, state_size: usize) -> OwnedRef {
    let dict = dict_new();
    let name_obj = str_from_str(name);
    if let Ok(table) = dict_table(dict.as_obj()) {
        let key = str_from_str("__name__");
        let _ = table.borrow_mut().insert(key.as_obj(), name_obj.as_obj());
    }
    alloc_object(Payload::Module(ModuleData {
        name: name.to_string(),
        dict,
        def,
        state: RefCell::new(vec![0u8; state_size].into_boxed_slice()),
    }))
}

pub fn module_data<'a>(obj: ObjPtr) -> Option<&'a ModuleData> {
    match obj.payload() {
        Payload::Module(data) => Some(data),
        _ => None,
    }
}

pub fn module_def_new(name: &str, size: isize, has_slots: bool) -> OwnedRef {
    alloc_object(Payload::ModuleDef(ModuleDefData {
        name: name.to_string(),
        size,
        has_slots,
        index: Cell::new(0),
    }))
}

pub fn module_def_data<'a>(obj: ObjPtr) -> Option<&'a ModuleDefData> {
    match obj.payload() {
        Payload::ModuleDef(data) => Some(data),
        _ => None,
    }
}

/// A static (non-heap) type object.
pub fn type_new(name: &str, flags: u64) -> OwnedRef {
    alloc_object(Payload::Type(TypeData {
        name: name.to_string(),
        flags: Cell::new(flags & !TPFLAGS_HEAPTYPE),
        module: None,
    }))
}

/// A heap type, optionally bound to its defining module (`PyType_FromModuleAndSpec`).
pub fn heap_type_new(name: &str, module: Option<ObjPtr>) -> OwnedRef {
    alloc_object(Payload::Type(TypeData {
        name: name.to_string(),
        flags: Cell::new(TPFLAGS_HEAPTYPE),
        module: module.map(OwnedRef::new_ref),
    }))
}

pub fn type_data<'a>(obj: ObjPtr) -> Option<&'a TypeData> {
    match obj.payload() {
        Payload::Type(data) => Some(data),
        _ => None,
    }
}
