use libc::wchar_t;
use molt_capi_obj_model::{
    OwnedRef, bytes_from_slice, complex_from_parts, float_from_f64, int_from_bigint,
    int_from_i64, int_from_u64, none, str_from_code_points, str_from_ordinal, str_from_utf8,
};
use num_bigint::BigInt;

use super::ValueBuilder;
use crate::args::VaList;
use crate::error::ExcKind;

#[derive(Copy, Clone, PartialEq, Eq)]
enum TextKind {
    Str,
    Bytes,
}

impl ValueBuilder<'_, '_, '_> {
    /// Emits the next directive. `None` means an exception is pending (or
    /// was already pending when a `NULL` object argument was met).
    pub(crate) fn mkvalue(&mut self) -> Option<OwnedRef> {
        loop {
            let directive = self.bump();
            match directive {
                b'(' => {
                    let n = self.count(b')');
                    return self.mktuple(b')', n);
                }
                b'[' => {
                    let n = self.count(b']');
                    return self.mklist(b']', n);
                }
                b'{' => {
                    let n = self.count(b'}');
                    return self.mkdict(b'}', n);
                }
                b'b' | b'B' | b'h' | b'i' => {
                    let value = self.read(VaList::next_int)?;
                    return Some(int_from_i64(i64::from(value)));
                }
                b'H' | b'I' => {
                    let value = self.read(VaList::next_uint)?;
                    return Some(int_from_u64(u64::from(value)));
                }
                b'n' => {
                    let value = self.read(VaList::next_ssize)?;
                    return Some(int_from_bigint(BigInt::from(value)));
                }
                b'l' => {
                    let value = self.read(VaList::next_long)?;
                    return Some(int_from_i64(i64::from(value)));
                }
                b'k' => {
                    let value = self.read(VaList::next_ulong)?;
                    return Some(int_from_u64(u64::from(value)));
                }
                b'L' => {
                    let value = self.read(VaList::next_longlong)?;
                    return Some(int_from_i64(value));
                }
                b'K' => {
                    let value = self.read(VaList::next_ulonglong)?;
                    return Some(int_from_u64(value));
                }
                b'u' => return self.emit_wide(),
                b'f' | b'd' => {
                    let value = self.read(VaList::next_double)?;
                    return Some(float_from_f64(value));
                }
                b'D' => {
                    let value = self.read(VaList::next_complex)?;
                    return match value {
                        Some(value) => Some(complex_from_parts(*value)),
                        None => self.ctx.raise_exception(
                            ExcKind::SystemError,
                            "NULL Py_complex pointer passed to Py_BuildValue",
                        ),
                    };
                }
                b'c' => {
                    let value = self.read(VaList::next_int)?;
                    return Some(bytes_from_slice(&[value as u8]));
                }
                b'C' => {
                    let value = self.read(VaList::next_int)?;
                    return match str_from_ordinal(i64::from(value)) {
                        Ok(obj) => Some(obj),
                        Err(err) => self.ctx.raise_obj_error(err),
                    };
                }
                b's' | b'z' | b'U' => return self.emit_text(TextKind::Str),
                b'y' => return self.emit_text(TextKind::Bytes),
                b'N' | b'S' | b'O' => return self.emit_object(directive),
                b':' | b',' | b' ' | b'\t' => {}
                _ => {
                    return self.ctx.raise_exception(
                        ExcKind::SystemError,
                        "bad format char passed to Py_BuildValue",
                    );
                }
            }
        }
    }

    /// The optional `#` after a string directive. `Some(None)` when there is
    /// no suffix.
    fn length_suffix(&mut self) -> Option<Option<isize>> {
        if self.peek() != b'#' {
            return Some(None);
        }
        self.pos += 1;
        if self.flags.size_t() {
            return self.read(VaList::next_ssize).map(Some);
        }
        self.va.skip();
        self.ctx.raise_exception(
            ExcKind::SystemError,
            "PY_SSIZE_T_CLEAN macro must be defined for '#' formats",
        )
    }

    /// Number of units to take from `data`: the explicit length when one was
    /// given and is non-negative, else up to the first NUL.
    fn unit_count<T: Copy + PartialEq + Default>(
        &mut self,
        data: &[T],
        explicit: Option<isize>,
    ) -> Option<usize> {
        if let Some(n) = explicit.and_then(|n| usize::try_from(n).ok()) {
            if n > data.len() {
                return self.ctx.raise_exception(
                    ExcKind::SystemError,
                    format!(
                        "Py_BuildValue: length {n} runs past a buffer of {} units",
                        data.len()
                    ),
                );
            }
            return Some(n);
        }
        // A slice never exceeds `isize::MAX` units, so the count always
        // fits a `Py_ssize_t`.
        let terminator = T::default();
        let n = data
            .iter()
            .position(|&unit| unit == terminator)
            .unwrap_or(data.len());
        Some(n)
    }

    fn emit_text(&mut self, kind: TextKind) -> Option<OwnedRef> {
        let data = self.read(VaList::next_str)?;
        let explicit = self.length_suffix()?;
        let Some(data) = data else {
            return Some(none());
        };
        let n = self.unit_count(data, explicit)?;
        let data = data.get(..n)?;
        match kind {
            TextKind::Bytes => Some(bytes_from_slice(data)),
            TextKind::Str => match str_from_utf8(data) {
                Ok(obj) => Some(obj),
                Err(err) => self.ctx.raise_obj_error(err),
            },
        }
    }

    fn emit_wide(&mut self) -> Option<OwnedRef> {
        let data = self.read(VaList::next_wide)?;
        let explicit = self.length_suffix()?;
        let Some(data) = data else {
            return Some(none());
        };
        let n = self.unit_count(data, explicit)?;
        let units: Vec<u32> = data.iter().take(n).map(|&unit: &wchar_t| unit as u32).collect();
        match str_from_code_points(&units) {
            Ok(obj) => Some(obj),
            Err(err) => self.ctx.raise_obj_error(err),
        }
    }

    /// `N`, `S` and `O`, with or without a `&` converter.
    fn emit_object(&mut self, directive: u8) -> Option<OwnedRef> {
        if self.peek() == b'&' {
            self.pos += 1;
            let converter = self.read(VaList::next_converter);
            let arg = self.read(VaList::next_ptr);
            let (converter, arg) = (converter?, arg?);
            return converter(&mut *self.ctx, arg);
        }
        match self.read(VaList::next_object)? {
            // SAFETY: `N` transfers the caller's claim to the result.
            Some(obj) if directive == b'N' => Some(unsafe { OwnedRef::from_raw(obj) }),
            Some(obj) => Some(OwnedRef::new_ref(obj)),
            None => {
                if !self.ctx.exception_pending() {
                    self.ctx.raise_exception::<()>(
                        ExcKind::SystemError,
                        "NULL object passed to Py_BuildValue",
                    );
                }
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::ffi::c_void;

    use molt_capi_obj_model::{
        Complex, bytes_value, complex_value, float_value, int_value, none_ptr, object_repr,
        str_from_str, str_to_string,
    };

    use super::*;
    use crate::args::VaArg;
    use crate::build::{build_value, build_value_size_t};
    use crate::context::CapiContext;
    use crate::error::PyErr;

    fn int_text(obj: &OwnedRef) -> Option<String> {
        int_value(obj.as_obj()).map(ToString::to_string)
    }

    fn pending(ctx: &CapiContext) -> Option<String> {
        ctx.exception().map(PyErr::to_string)
    }

    #[test]
    fn test_integer_family() {
        let mut ctx = CapiContext::new();
        let cases = [
            ("b", VaArg::Int(-3), "-3"),
            ("h", VaArg::Int(300), "300"),
            ("H", VaArg::UInt(65535), "65535"),
            ("I", VaArg::UInt(u32::MAX), "4294967295"),
            ("n", VaArg::SSize(-9), "-9"),
            ("l", VaArg::Long(-12), "-12"),
            ("k", VaArg::ULong(12), "12"),
            ("L", VaArg::LongLong(i64::MIN), "-9223372036854775808"),
            ("K", VaArg::ULongLong(u64::MAX), "18446744073709551615"),
        ];
        for (format, arg, expected) in cases {
            let obj = build_value(&mut ctx, format.as_bytes(), &[arg]).unwrap();
            assert_eq!(int_text(&obj).as_deref(), Some(expected));
        }
    }

    #[test]
    fn test_floats_and_complex() {
        let mut ctx = CapiContext::new();
        let obj = build_value(&mut ctx, b"d", &[VaArg::Double(1.5)]).unwrap();
        assert_eq!(float_value(obj.as_obj()), Some(1.5));
        let value = Complex { real: 1.0, imag: -2.0 };
        let obj = build_value(&mut ctx, b"D", &[VaArg::Complex(Some(&value))]).unwrap();
        assert_eq!(complex_value(obj.as_obj()), Some(value));

        assert!(build_value(&mut ctx, b"D", &[VaArg::Complex(None)]).is_none());
        assert_eq!(
            pending(&ctx).as_deref(),
            Some("SystemError: NULL Py_complex pointer passed to Py_BuildValue")
        );
    }

    #[test]
    fn test_char_directives() {
        let mut ctx = CapiContext::new();
        let obj = build_value(&mut ctx, b"c", &[VaArg::Int(i32::from(b'z'))]).unwrap();
        assert_eq!(bytes_value(obj.as_obj()), Some(&b"z"[..]));
        let obj = build_value(&mut ctx, b"C", &[VaArg::Int(0x263a)]).unwrap();
        assert_eq!(str_to_string(obj.as_obj()).as_deref(), Some("\u{263a}"));

        assert!(build_value(&mut ctx, b"C", &[VaArg::Int(0x110000)]).is_none());
        assert_eq!(
            pending(&ctx).as_deref(),
            Some("ValueError: chr() arg not in range(0x110000)")
        );
    }

    #[test]
    fn test_strings_stop_at_nul() {
        let mut ctx = CapiContext::new();
        let obj = build_value(&mut ctx, b"s", &[VaArg::Str(Some(b"ab\0cd"))]).unwrap();
        assert_eq!(str_to_string(obj.as_obj()).as_deref(), Some("ab"));
        let obj = build_value(&mut ctx, b"y", &[VaArg::Str(Some(b"xyz"))]).unwrap();
        assert_eq!(bytes_value(obj.as_obj()), Some(&b"xyz"[..]));
    }

    #[test]
    fn test_null_strings_are_none() {
        let mut ctx = CapiContext::new();
        for format in ["s", "z", "U", "y"] {
            let obj = build_value(&mut ctx, format.as_bytes(), &[VaArg::Str(None)]).unwrap();
            assert_eq!(obj.as_obj(), none_ptr());
        }
        let obj = build_value(&mut ctx, b"u", &[VaArg::Wide(None)]).unwrap();
        assert_eq!(obj.as_obj(), none_ptr());
        let obj = build_value_size_t(&mut ctx, b"s#", &[VaArg::Str(None), VaArg::SSize(4)]).unwrap();
        assert_eq!(obj.as_obj(), none_ptr());
        assert!(!ctx.exception_pending());
    }

    #[test]
    fn test_explicit_lengths() {
        let mut ctx = CapiContext::new();
        let obj = build_value_size_t(&mut ctx, b"y#", &[VaArg::Str(Some(b"a\0b")), VaArg::SSize(3)])
            .unwrap();
        assert_eq!(bytes_value(obj.as_obj()), Some(&b"a\0b"[..]));
        // A negative length falls back to the NUL scan.
        let obj = build_value_size_t(&mut ctx, b"s#", &[VaArg::Str(Some(b"ok\0")), VaArg::SSize(-1)])
            .unwrap();
        assert_eq!(str_to_string(obj.as_obj()).as_deref(), Some("ok"));

        assert!(
            build_value_size_t(&mut ctx, b"s#", &[VaArg::Str(Some(b"ab")), VaArg::SSize(3)])
                .is_none()
        );
        assert_eq!(
            pending(&ctx).as_deref(),
            Some("SystemError: Py_BuildValue: length 3 runs past a buffer of 2 units")
        );
    }

    #[test]
    fn test_invalid_utf8_is_a_decode_error() {
        let mut ctx = CapiContext::new();
        assert!(build_value(&mut ctx, b"s", &[VaArg::Str(Some(b"\xff\0"))]).is_none());
        assert_eq!(
            pending(&ctx).as_deref(),
            Some("UnicodeDecodeError: 'utf-8' codec can't decode byte 0xff in position 0: invalid start byte")
        );
    }

    #[test]
    fn test_wide_strings() {
        let mut ctx = CapiContext::new();
        let wide: Vec<libc::wchar_t> = "hé!\0tail".chars().map(|ch| ch as libc::wchar_t).collect();
        let obj = build_value(&mut ctx, b"u", &[VaArg::Wide(Some(&wide))]).unwrap();
        assert_eq!(str_to_string(obj.as_obj()).as_deref(), Some("hé!"));
        let obj = build_value_size_t(&mut ctx, b"u#", &[VaArg::Wide(Some(&wide)), VaArg::SSize(2)])
            .unwrap();
        assert_eq!(str_to_string(obj.as_obj()).as_deref(), Some("hé"));
    }

    #[test]
    fn test_object_directives() {
        let mut ctx = CapiContext::new();
        let value = str_from_str("v");
        let before = value.as_obj().ref_count();
        let obj = build_value(&mut ctx, b"O", &[VaArg::object(value.as_obj())]).unwrap();
        assert_eq!(obj.as_obj(), value.as_obj());
        assert_eq!(value.as_obj().ref_count(), before + 1);
        drop(obj);
        let obj = build_value(&mut ctx, b"S", &[VaArg::object(value.as_obj())]).unwrap();
        assert_eq!(value.as_obj().ref_count(), before + 1);
        drop(obj);
        assert_eq!(value.as_obj().ref_count(), before);
    }

    #[test]
    fn test_null_object() {
        let mut ctx = CapiContext::new();
        assert!(build_value(&mut ctx, b"O", &[VaArg::Object(None)]).is_none());
        assert_eq!(
            pending(&ctx).as_deref(),
            Some("SystemError: NULL object passed to Py_BuildValue")
        );

        let mut ctx = CapiContext::new();
        ctx.raise_exception::<()>(ExcKind::ValueError, "upstream");
        assert!(build_value(&mut ctx, b"N", &[VaArg::Object(None)]).is_none());
        assert_eq!(pending(&ctx).as_deref(), Some("ValueError: upstream"));
    }

    #[test]
    fn test_converter() {
        let mut ctx = CapiContext::new();
        let convert = |_: &mut CapiContext, arg: *mut c_void| -> Option<OwnedRef> {
            let value = unsafe { *(arg as *const i64) };
            Some(int_from_i64(value * 2))
        };
        let mut slot = 21i64;
        let arg = &mut slot as *mut i64 as *mut c_void;
        let obj = build_value(&mut ctx, b"O&", &[VaArg::Converter(&convert), VaArg::Ptr(arg)])
            .unwrap();
        assert_eq!(int_text(&obj).as_deref(), Some("42"));

        let failing = |ctx: &mut CapiContext, _: *mut c_void| -> Option<OwnedRef> {
            ctx.raise_exception(ExcKind::TypeError, "converter failed")
        };
        assert!(
            build_value(&mut ctx, b"N&", &[VaArg::Converter(&failing), VaArg::Ptr(arg)]).is_none()
        );
        assert_eq!(pending(&ctx).as_deref(), Some("TypeError: converter failed"));
    }

    #[test]
    fn test_separators_are_skipped() {
        let mut ctx = CapiContext::new();
        let obj = build_value(&mut ctx, b", :\ti", &[VaArg::Int(5)]).unwrap();
        assert_eq!(int_text(&obj).as_deref(), Some("5"));
    }

    #[test]
    fn test_bad_format_char() {
        let mut ctx = CapiContext::new();
        assert!(build_value(&mut ctx, b"q", &[VaArg::Int(1)]).is_none());
        assert_eq!(
            pending(&ctx).as_deref(),
            Some("SystemError: bad format char passed to Py_BuildValue")
        );
        // A stray `#` is not a separator when a directive is expected.
        assert!(build_value(&mut ctx, b"#i", &[VaArg::Int(1)]).is_none());
        assert_eq!(
            pending(&ctx).as_deref(),
            Some("SystemError: bad format char passed to Py_BuildValue")
        );
    }

    #[test]
    fn test_argument_mismatch() {
        let mut ctx = CapiContext::new();
        assert!(build_value(&mut ctx, b"i", &[VaArg::Double(1.0)]).is_none());
        assert_eq!(
            pending(&ctx).as_deref(),
            Some("SystemError: Py_BuildValue: argument 0: expected int, got double")
        );
        assert!(build_value(&mut ctx, b"d", &[]).is_none());
        assert_eq!(
            pending(&ctx).as_deref(),
            Some(
                "SystemError: Py_BuildValue: argument 0: expected double, but the argument list is exhausted"
            )
        );
    }

    #[test]
    fn test_repr_of_mixed_scalars() {
        let mut ctx = CapiContext::new();
        let obj = build_value(
            &mut ctx,
            b"(y,c,f)",
            &[VaArg::Str(Some(b"ab")), VaArg::Int(65), VaArg::Double(0.5)],
        )
        .unwrap();
        assert_eq!(object_repr(obj.as_obj()), "(b'ab', b'A', 0.5)");
    }
}
