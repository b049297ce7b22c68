use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

use num_bigint::BigInt;
use num_traits::FromPrimitive;

use crate::{Complex, ObjError, ObjPtr, Payload};

const TAG_NONE: u8 = 0;
const TAG_INT: u8 = 1;
const TAG_FLOAT: u8 = 2;
const TAG_COMPLEX: u8 = 3;
const TAG_STR: u8 = 4;
const TAG_BYTES: u8 = 5;
const TAG_TUPLE: u8 = 6;
const TAG_IDENTITY: u8 = 7;
const TAG_EMPTY_SLOT: u8 = 0xff;

/// Hash used for mapping keys. Numbers that compare equal across int, float
/// and complex hash equal.
pub fn object_hash(obj: ObjPtr) -> Result<u64, ObjError> {
    let mut hasher = DefaultHasher::new();
    hash_into(obj, &mut hasher)?;
    Ok(hasher.finish())
}

fn hash_into(obj: ObjPtr, state: &mut DefaultHasher) -> Result<(), ObjError> {
    match obj.payload() {
        Payload::None => TAG_NONE.hash(state),
        Payload::Int(value) => hash_int(value, state),
        Payload::Float(value) => hash_float(*value, state),
        Payload::Complex(value) => {
            if value.imag == 0.0 {
                hash_float(value.real, state);
            } else {
                TAG_COMPLEX.hash(state);
                value.real.to_bits().hash(state);
                value.imag.to_bits().hash(state);
            }
        }
        Payload::Str(text) => {
            TAG_STR.hash(state);
            for cp in text.code_points() {
                cp.to_u32().hash(state);
            }
        }
        Payload::Bytes(data) => {
            TAG_BYTES.hash(state);
            data.hash(state);
        }
        Payload::Tuple(items) => {
            TAG_TUPLE.hash(state);
            for item in items.borrow().iter() {
                match item {
                    Some(item) => hash_into(item.as_obj(), state)?,
                    None => TAG_EMPTY_SLOT.hash(state),
                }
            }
        }
        Payload::List(_) | Payload::Dict(_) => return Err(ObjError::Unhashable(obj.type_name())),
        Payload::Module(_) | Payload::Type(_) | Payload::ModuleDef(_) => {
            TAG_IDENTITY.hash(state);
            obj.addr().hash(state);
        }
    }
    Ok(())
}

fn hash_int(value: &BigInt, state: &mut DefaultHasher) {
    TAG_INT.hash(state);
    value.hash(state);
}

fn hash_float(value: f64, state: &mut DefaultHasher) {
    if let Some(int) = integral_float(value) {
        return hash_int(&int, state);
    }
    TAG_FLOAT.hash(state);
    value.to_bits().hash(state);
}

fn integral_float(value: f64) -> Option<BigInt> {
    if value.is_finite() && value.fract() == 0.0 {
        BigInt::from_f64(value)
    } else {
        None
    }
}

#[derive(Clone, Copy)]
enum Numeric<'a> {
    Int(&'a BigInt),
    Float(f64),
    Complex(Complex),
}

fn numeric<'a>(payload: &'a Payload) -> Option<Numeric<'a>> {
    match payload {
        Payload::Int(value) => Some(Numeric::Int(value)),
        Payload::Float(value) => Some(Numeric::Float(*value)),
        Payload::Complex(value) => Some(Numeric::Complex(*value)),
        _ => None,
    }
}

fn numeric_eq(lhs: Numeric<'_>, rhs: Numeric<'_>) -> bool {
    match (lhs, rhs) {
        (Numeric::Int(a), Numeric::Int(b)) => a == b,
        (Numeric::Float(a), Numeric::Float(b)) => a == b,
        (Numeric::Int(i), Numeric::Float(f)) | (Numeric::Float(f), Numeric::Int(i)) => {
            integral_float(f).is_some_and(|value| &value == i)
        }
        (Numeric::Complex(a), Numeric::Complex(b)) => a == b,
        (Numeric::Complex(c), other) | (other, Numeric::Complex(c)) => {
            c.imag == 0.0 && numeric_eq(Numeric::Float(c.real), other)
        }
    }
}

/// Key equality for mappings: identity, then value equality for numbers,
/// text, bytes and tuples.
pub fn object_eq(lhs: ObjPtr, rhs: ObjPtr) -> bool {
    if lhs == rhs {
        return true;
    }
    match (lhs.payload(), rhs.payload()) {
        (Payload::None, Payload::None) => true,
        (Payload::Str(a), Payload::Str(b)) => a == b,
        (Payload::Bytes(a), Payload::Bytes(b)) => a == b,
        (Payload::Tuple(a), Payload::Tuple(b)) => {
            let a = a.borrow();
            let b = b.borrow();
            a.len() == b.len()
                && a.iter().zip(b.iter()).all(|pair| match pair {
                    (Some(x), Some(y)) => object_eq(x.as_obj(), y.as_obj()),
                    (None, None) => true,
                    _ => false,
                })
        }
        (a, b) => match (numeric(a), numeric(b)) {
            (Some(x), Some(y)) => numeric_eq(x, y),
            _ => false,
        },
    }
}
