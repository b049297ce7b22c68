use std::fmt::Write;

use crate::{ObjPtr, Payload};

/// Python-style `repr()` for the builtin layouts.
pub fn object_repr(obj: ObjPtr) -> String {
    let mut out = String::new();
    write_repr(obj, &mut out);
    out
}

fn write_repr(obj: ObjPtr, out: &mut String) {
    match obj.payload() {
        Payload::None => out.push_str("None"),
        Payload::Int(value) => {
            let _ = write!(out, "{value}");
        }
        Payload::Float(value) => write_float(*value, out),
        Payload::Complex(value) => {
            if value.real == 0.0 && value.real.is_sign_positive() {
                write_complex_part(value.imag, out);
                out.push('j');
            } else {
                out.push('(');
                write_complex_part(value.real, out);
                if value.imag >= 0.0 || value.imag.is_nan() {
                    out.push('+');
                }
                write_complex_part(value.imag, out);
                out.push_str("j)");
            }
        }
        Payload::Str(text) => {
            let code_points: Vec<u32> = text.code_points().map(|cp| cp.to_u32()).collect();
            write_str(&code_points, out);
        }
        Payload::Bytes(data) => write_bytes(data, out),
        Payload::Tuple(items) => {
            let items = items.borrow();
            out.push('(');
            write_items(items.iter().map(|item| item.as_ref().map(|i| i.as_obj())), out);
            if items.len() == 1 {
                out.push(',');
            }
            out.push(')');
        }
        Payload::List(items) => {
            out.push('[');
            write_items(
                items.borrow().iter().map(|item| item.as_ref().map(|i| i.as_obj())),
                out,
            );
            out.push(']');
        }
        Payload::Dict(table) => {
            out.push('{');
            for (idx, (key, value)) in table.borrow().iter().enumerate() {
                if idx > 0 {
                    out.push_str(", ");
                }
                write_repr(key, out);
                out.push_str(": ");
                write_repr(value, out);
            }
            out.push('}');
        }
        Payload::Module(data) => {
            let _ = write!(out, "<module '{}'>", data.name);
        }
        Payload::Type(data) => {
            let _ = write!(out, "<class '{}'>", data.name);
        }
        Payload::ModuleDef(data) => {
            let _ = write!(out, "<moduledef '{}'>", data.name);
        }
    }
}

fn write_items(items: impl Iterator<Item = Option<ObjPtr>>, out: &mut String) {
    for (idx, item) in items.enumerate() {
        if idx > 0 {
            out.push_str(", ");
        }
        match item {
            Some(item) => write_repr(item, out),
            None => out.push_str("<NULL>"),
        }
    }
}

fn write_float(value: f64, out: &mut String) {
    if value.is_nan() {
        out.push_str("nan");
    } else if value.is_infinite() {
        out.push_str(if value > 0.0 { "inf" } else { "-inf" });
    } else {
        let _ = write!(out, "{value:?}");
    }
}

fn write_complex_part(value: f64, out: &mut String) {
    if value.is_finite() && value.fract() == 0.0 && value.abs() < 1e16 {
        let _ = write!(out, "{}", value as i64);
    } else {
        write_float(value, out);
    }
}

fn write_str(code_points: &[u32], out: &mut String) {
    let has_single = code_points.contains(&u32::from(b'\''));
    let has_double = code_points.contains(&u32::from(b'"'));
    let quote = if has_single && !has_double { '"' } else { '\'' };
    out.push(quote);
    for &cp in code_points {
        match char::from_u32(cp) {
            Some('\\') => out.push_str("\\\\"),
            Some('\n') => out.push_str("\\n"),
            Some('\r') => out.push_str("\\r"),
            Some('\t') => out.push_str("\\t"),
            Some(ch) if ch == quote => {
                out.push('\\');
                out.push(ch);
            }
            Some(ch) if !ch.is_control() => out.push(ch),
            _ if cp < 0x100 => {
                let _ = write!(out, "\\x{cp:02x}");
            }
            _ if cp < 0x10000 => {
                let _ = write!(out, "\\u{cp:04x}");
            }
            _ => {
                let _ = write!(out, "\\U{cp:08x}");
            }
        }
    }
    out.push(quote);
}

fn write_bytes(data: &[u8], out: &mut String) {
    let quote = if data.contains(&b'\'') && !data.contains(&b'"') {
        '"'
    } else {
        '\''
    };
    out.push('b');
    out.push(quote);
    for &byte in data {
        match byte {
            b'\\' => out.push_str("\\\\"),
            b'\n' => out.push_str("\\n"),
            b'\r' => out.push_str("\\r"),
            b'\t' => out.push_str("\\t"),
            _ if char::from(byte) == quote => {
                out.push('\\');
                out.push(quote);
            }
            0x20..=0x7e => out.push(char::from(byte)),
            _ => {
                let _ = write!(out, "\\x{byte:02x}");
            }
        }
    }
    out.push(quote);
}
