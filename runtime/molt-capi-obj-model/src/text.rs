use wtf8::{CodePoint, Wtf8Buf};

use crate::{ObjError, ObjPtr, OwnedRef, Payload, alloc_object};

const MAX_CODE_POINT: i64 = 0x10ffff;

pub fn str_from_str(value: &str) -> OwnedRef {
    alloc_object(Payload::Str(Wtf8Buf::from_str(value)))
}

/// `PyUnicode_FromStringAndSize`: strict UTF-8.
pub fn str_from_utf8(data: &[u8]) -> Result<OwnedRef, ObjError> {
    match std::str::from_utf8(data) {
        Ok(text) => Ok(str_from_str(text)),
        Err(err) => {
            let position = err.valid_up_to();
            let byte = data.get(position).copied().unwrap_or(0);
            let reason = match err.error_len() {
                None => "unexpected end of data",
                Some(_) if (0xc2..=0xf4).contains(&byte) => "invalid continuation byte",
                Some(_) => "invalid start byte",
            };
            Err(ObjError::Utf8Decode {
                byte,
                position,
                reason,
            })
        }
    }
}

/// `PyUnicode_FromWideChar` for a 4-byte `wchar_t`. Lone surrogates are kept.
pub fn str_from_code_points(units: &[u32]) -> Result<OwnedRef, ObjError> {
    let mut buf = Wtf8Buf::with_capacity(units.len());
    for &unit in units {
        let code_point = CodePoint::from_u32(unit).ok_or(ObjError::CodePointRange(unit))?;
        buf.push(code_point);
    }
    Ok(alloc_object(Payload::Str(buf)))
}

/// `PyUnicode_FromOrdinal`.
pub fn str_from_ordinal(ordinal: i64) -> Result<OwnedRef, ObjError> {
    if !(0..=MAX_CODE_POINT).contains(&ordinal) {
        return Err(ObjError::OrdinalRange(ordinal));
    }
    str_from_code_points(&[ordinal as u32])
}

/// The text as a Rust string; `None` for non-str objects or text holding
/// lone surrogates.
pub fn str_to_string(obj: ObjPtr) -> Option<String> {
    match obj.payload() {
        Payload::Str(buf) => buf.as_str().map(str::to_owned),
        _ => None,
    }
}

pub fn str_code_points(obj: ObjPtr) -> Option<Vec<u32>> {
    match obj.payload() {
        Payload::Str(buf) => Some(buf.code_points().map(|cp| cp.to_u32()).collect()),
        _ => None,
    }
}
