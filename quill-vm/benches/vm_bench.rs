//! Benchmarks for compilation and VM execution

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use quill_vm::{Compiler, CompilerOptions, Engine, Vm};

const FIB: &str = r#"
func fib(n) {
    if n < 2 {
        return n
    }
    return fib(n - 1) + fib(n - 2)
}
fib(15)
"#;

const LOOPS: &str = r#"
total := 0
xs := []
for i := 0; i < 200; i++ {
    xs = append(xs, i)
}
for _, v := range xs {
    if v % 2 == 0 {
        continue
    }
    total += v
}
total
"#;

const CLOSURES: &str = r#"
func counter() {
    n := 0
    return func() {
        n++
        return n
    }
}
c := counter()
for i := 0; i < 500; i++ {
    c()
}
c()
"#;

fn benchmark_compile(c: &mut Criterion) {
    let mut group = c.benchmark_group("compile");
    for (name, source) in [("fib", FIB), ("loops", LOOPS), ("closures", CLOSURES)] {
        let ast = quill_parser::parse(source).unwrap();
        group.bench_function(name, |b| {
            b.iter(|| {
                let program = Compiler::new(CompilerOptions::default())
                    .compile(black_box(&ast))
                    .unwrap();
                black_box(program)
            });
        });
    }
    group.finish();
}

fn benchmark_execute(c: &mut Criterion) {
    let mut group = c.benchmark_group("execute");
    let vm = Vm::builder().with_balance_check(false).build().unwrap();
    let engine = Engine::with_vm(vm);
    for (name, source) in [("fib", FIB), ("loops", LOOPS), ("closures", CLOSURES)] {
        let program = engine.compile(source).unwrap();
        group.bench_function(name, |b| {
            b.iter(|| black_box(engine.run_program(&program).unwrap()));
        });
    }
    group.finish();
}

fn benchmark_end_to_end(c: &mut Criterion) {
    let engine = Engine::new();
    c.bench_function("parse_compile_run_loops", |b| {
        b.iter(|| black_box(engine.run(black_box(LOOPS)).unwrap()));
    });
}

criterion_group!(benches, benchmark_compile, benchmark_execute, benchmark_end_to_end);
criterion_main!(benches);
