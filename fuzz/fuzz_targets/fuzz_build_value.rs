#![no_main]

use arbitrary::Arbitrary;
use libfuzzer_sys::fuzz_target;
use molt_capi::{CapiContext, VaArg, build_value, build_value_size_t};
use molt_capi_obj_model::{OwnedRef, dec_ref, inc_ref, live_objects, str_from_str};

#[derive(Arbitrary, Debug)]
enum ArgSeed {
    Int(i32),
    UInt(u32),
    Long(i64),
    ULong(u64),
    LongLong(i64),
    ULongLong(u64),
    SSize(i64),
    Double(f64),
    Str(Option<Vec<u8>>),
    Wide(Option<Vec<u16>>),
    Object(bool),
}

#[derive(Arbitrary, Debug)]
struct Input {
    format: Vec<u8>,
    args: Vec<ArgSeed>,
    size_t: bool,
}

// Arbitrary formats against arbitrary argument lists: no panic, every claim
// taken on a borrowed object is given back, nothing built outlives the call.
fuzz_target!(|input: Input| {
    let live = live_objects();
    // Every object slot carries one spare claim that an `N` may take over.
    let held: Vec<Option<OwnedRef>> = input
        .args
        .iter()
        .map(|seed| match seed {
            ArgSeed::Object(true) => {
                let obj = str_from_str("held");
                inc_ref(obj.as_obj());
                Some(obj)
            }
            _ => None,
        })
        .collect();
    let wides: Vec<Option<Vec<libc::wchar_t>>> = input
        .args
        .iter()
        .map(|seed| match seed {
            ArgSeed::Wide(Some(units)) => {
                Some(units.iter().map(|&unit| libc::wchar_t::from(unit)).collect())
            }
            _ => None,
        })
        .collect();
    let args: Vec<VaArg<'_>> = input
        .args
        .iter()
        .zip(&wides)
        .zip(&held)
        .map(|((seed, wide), held)| match seed {
            ArgSeed::Int(v) => VaArg::Int(*v),
            ArgSeed::UInt(v) => VaArg::UInt(*v),
            ArgSeed::Long(v) => VaArg::Long(*v as _),
            ArgSeed::ULong(v) => VaArg::ULong(*v as _),
            ArgSeed::LongLong(v) => VaArg::LongLong(*v),
            ArgSeed::ULongLong(v) => VaArg::ULongLong(*v),
            ArgSeed::SSize(v) => VaArg::SSize(*v as isize),
            ArgSeed::Double(v) => VaArg::Double(*v),
            ArgSeed::Str(bytes) => VaArg::Str(bytes.as_deref()),
            ArgSeed::Wide(_) => VaArg::Wide(wide.as_deref()),
            ArgSeed::Object(_) => VaArg::Object(held.as_ref().map(OwnedRef::as_obj)),
        })
        .collect();

    let mut ctx = CapiContext::new();
    let built = if input.size_t {
        build_value_size_t(&mut ctx, &input.format, &args)
    } else {
        build_value(&mut ctx, &input.format, &args)
    };
    assert!(built.is_some() || ctx.exception_pending());
    drop(built);
    for obj in held.iter().flatten() {
        // 1 when an `N` consumed the spare claim, 2 when nothing did.
        match obj.as_obj().ref_count() {
            1 => {}
            2 => unsafe { dec_ref(obj.as_obj()) },
            count => panic!("held object left with {count} claims"),
        }
    }
    drop(held);
    assert_eq!(live_objects(), live);
});
