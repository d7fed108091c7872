//! Run with:
//!   cargo bench --bench invoke_benchmark

use criterion::{Criterion, black_box, criterion_group, criterion_main};
use kava::{
    AccessFlags, ClassDefinition, EnvCreateInfo, ExecEnv, MethodDefinition, MethodId,
    NativeRegistry, PoolCreateInfo, Slot,
};

const DEPTH: usize = 64;

fn create_env(natives: NativeRegistry) -> (ExecEnv, MethodId, MethodId) {
    let mut env = ExecEnv::new(
        &EnvCreateInfo {
            max_depth: DEPTH,
            pools: PoolCreateInfo::for_depth(DEPTH),
        },
        natives,
    )
    .expect("env");
    let class = env
        .classes
        .define(
            ClassDefinition::new("Bench")
                .method(
                    MethodDefinition::new("call", "(II)V")
                        .access(AccessFlags::STATIC)
                        .max_stack(4)
                        .max_locals(2),
                )
                .method(
                    MethodDefinition::new("add", "(II)I")
                        .access(AccessFlags::STATIC | AccessFlags::NATIVE),
                ),
        )
        .expect("define");
    env.classes.link(class).expect("link");
    let call = env.classes.find_method(class, "call", "(II)V").expect("call");
    let add = env.classes.find_method(class, "add", "(II)I").expect("add");
    (env, call, add)
}

/// Acquire, link, pop and release one interpreted frame.
fn bench_interpreted_round_trip(c: &mut Criterion) {
    let (mut env, call, _) = create_env(NativeRegistry::new());
    c.bench_function("invoke_interpreted_and_pop", |b| {
        b.iter(|| {
            let ops = env.entry_operands_mut().expect("entry");
            ops.push(Slot::int(1)).expect("push");
            ops.push(Slot::int(2)).expect("push");
            black_box(env.invoke(black_box(call)).expect("invoke"));
            black_box(env.pop_frame().expect("pop"));
        })
    });
}

/// Nests frames up to the maximum depth, then unwinds them all.
fn bench_deep_stack(c: &mut Criterion) {
    let (mut env, call, _) = create_env(NativeRegistry::new());
    c.bench_function("invoke_full_depth", |b| {
        b.iter(|| {
            for _ in 0..DEPTH {
                let ops = env.caller_operands().expect("caller");
                let ops = env.buffer_mut(ops).expect("buffer");
                ops.push(Slot::int(1)).expect("push");
                ops.push(Slot::int(2)).expect("push");
                env.invoke(call).expect("invoke");
            }
            while !env.stack.is_empty() {
                black_box(env.pop_frame().expect("pop"));
            }
        })
    });
}

fn bench_native_call(c: &mut Criterion) {
    let mut natives = NativeRegistry::new();
    natives.register("Bench", "add", "(II)I", |_env, _this, args| {
        Some(Slot::int(args[0].as_int()? + args[1].as_int()?))
    });
    let (mut env, _, add) = create_env(natives);
    c.bench_function("invoke_native", |b| {
        b.iter(|| {
            let ops = env.entry_operands_mut().expect("entry");
            ops.push(Slot::int(20)).expect("push");
            ops.push(Slot::int(22)).expect("push");
            env.invoke(black_box(add)).expect("invoke");
            black_box(env.entry_operands_mut().expect("entry").pop())
        })
    });
}

criterion_group!(
    benches,
    bench_interpreted_round_trip,
    bench_deep_stack,
    bench_native_call
);
criterion_main!(benches);
