use std::hint::black_box;

use criterion::{BenchmarkId, Criterion, criterion_group, criterion_main};
use molt_capi::{CapiContext, VaArg, VaList, build_value, va_build_stack};
use molt_capi_obj_model::{OwnedRef, str_from_str};

fn bench_flat_tuple(c: &mut Criterion) {
    let mut group = c.benchmark_group("build_value");
    for size in [4usize, 32, 256] {
        let format = "i".repeat(size).into_bytes();
        let args: Vec<VaArg<'_>> = (0..size).map(|idx| VaArg::Int(idx as i32)).collect();
        group.bench_with_input(BenchmarkId::new("flat_tuple", size), &size, |b, _| {
            let mut ctx = CapiContext::new();
            b.iter(|| black_box(build_value(&mut ctx, &format, &args)));
        });
    }
    group.finish();
}

fn bench_nested_mixed(c: &mut Criterion) {
    let mut group = c.benchmark_group("build_value");
    let shared = str_from_str("shared");
    let args = [
        VaArg::c_str(c"name"),
        VaArg::Int(7),
        VaArg::c_str(c"items"),
        VaArg::Double(1.5),
        VaArg::object(shared.as_obj()),
        VaArg::ULongLong(u64::MAX),
    ];
    group.bench_function("nested_mixed", |b| {
        let mut ctx = CapiContext::new();
        b.iter(|| black_box(build_value(&mut ctx, b"{s:i,s:[d,O,(K)]}", &args)));
    });
    group.finish();
}

fn bench_stack(c: &mut Criterion) {
    let mut group = c.benchmark_group("build_value");
    let args = [VaArg::Int(1), VaArg::Int(2), VaArg::Int(3), VaArg::Int(4)];
    for capacity in [8usize, 2] {
        group.bench_with_input(BenchmarkId::new("stack", capacity), &capacity, |b, &capacity| {
            let mut ctx = CapiContext::new();
            let mut small: Vec<Option<OwnedRef>> = std::iter::repeat_with(|| None).take(capacity).collect();
            let va = VaList::new(&args);
            b.iter(|| {
                let built = va_build_stack(&mut ctx, &mut small, b"iiii", &va);
                black_box(built.map(|built| built.nargs))
            });
        });
    }
    group.finish();
}

criterion_group!(build_value_benches, bench_flat_tuple, bench_nested_mixed, bench_stack);
criterion_main!(build_value_benches);
