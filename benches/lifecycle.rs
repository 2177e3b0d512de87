//! Object lifecycle benchmarks
//!
//! Measures the allocation paths (freelist vs system allocator), refcount
//! traffic and attribute dispatch on native classes.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use pybridge::host::builtins::list;
use pybridge::host::ops;
use pybridge::{create, field, gc, with_gil, ClassBuilder, FeatureFlags, NativeClass, Value};

#[derive(Default)]
struct Pooled {
    x: f64,
    y: f64,
}

impl NativeClass for Pooled {
    const NAME: &'static str = "BenchPooled";
    const FLAGS: FeatureFlags = FeatureFlags::new().freelist(64);

    fn describe(class: &mut ClassBuilder<Self>) {
        class
            .field("x", field!(Pooled, x))
            .field("y", field!(Pooled, y))
            .fields_constructor()
            .def("norm", |this: &Pooled, _args: &[Value]| (this.x * this.x + this.y * this.y).sqrt());
    }
}

#[derive(Default)]
struct Unpooled {
    x: f64,
    y: f64,
}

impl NativeClass for Unpooled {
    const NAME: &'static str = "BenchUnpooled";

    fn describe(class: &mut ClassBuilder<Self>) {
        class.field("x", field!(Unpooled, x)).field("y", field!(Unpooled, y));
    }
}

#[derive(Default)]
struct Link {
    next: Option<pybridge::ObjRef>,
}

impl NativeClass for Link {
    const NAME: &'static str = "BenchLink";

    fn describe(class: &mut ClassBuilder<Self>) {
        class.field("next", field!(Link, next));
    }
}

fn bench_allocation(c: &mut Criterion) {
    let mut group = c.benchmark_group("allocation");

    group.bench_function("freelist", |b| {
        with_gil(|| {
            b.iter(|| black_box(create(Pooled { x: 1.0, y: 2.0 }).unwrap()));
        })
    });

    group.bench_function("system", |b| {
        with_gil(|| {
            b.iter(|| black_box(create(Unpooled { x: 1.0, y: 2.0 }).unwrap()));
        })
    });

    group.bench_function("call_type", |b| {
        with_gil(|| {
            let ty = Value::Type(pybridge::type_object::<Pooled>().unwrap());
            let args = [Value::Float(3.0), Value::Float(4.0)];
            b.iter(|| black_box(ops::call(&ty, &args).unwrap()));
        })
    });

    group.finish();
}

fn bench_refcount(c: &mut Criterion) {
    c.bench_function("refcount_clone_drop", |b| {
        with_gil(|| {
            let obj = create(Pooled::default()).unwrap();
            b.iter(|| {
                let extra = black_box(obj.clone());
                drop(extra);
            });
        })
    });
}

fn bench_dispatch(c: &mut Criterion) {
    let mut group = c.benchmark_group("dispatch");

    with_gil(|| {
        let point = Value::Obj(create(Pooled { x: 3.0, y: 4.0 }).unwrap());

        group.bench_function("field_get", |b| {
            b.iter(|| black_box(ops::getattr(&point, "x").unwrap()));
        });

        group.bench_function("field_set", |b| {
            b.iter(|| ops::setattr(&point, "y", Value::Float(black_box(5.0))).unwrap());
        });

        group.bench_function("method_call", |b| {
            b.iter(|| black_box(ops::call_method(&point, "norm", &[]).unwrap()));
        });
    });

    group.finish();
}

fn bench_collection(c: &mut Criterion) {
    let mut group = c.benchmark_group("cycle_collection");

    for size in [16usize, 256, 1024] {
        group.bench_with_input(BenchmarkId::from_parameter(size), &size, |b, &size| {
            with_gil(|| {
                b.iter(|| {
                    let nodes: Vec<_> = (0..size).map(|_| create(Link::default()).unwrap()).collect();
                    for (i, node) in nodes.iter().enumerate() {
                        let next = Value::Obj(nodes[(i + 1) % size].clone());
                        ops::setattr(&Value::Obj(node.clone()), "next", next).unwrap();
                    }
                    drop(nodes);
                    black_box(gc::collect())
                });
            })
        });
    }

    group.bench_function("self_referencing_lists", |b| {
        with_gil(|| {
            b.iter(|| {
                for _ in 0..64 {
                    let l = list::new(Vec::new()).unwrap();
                    list::append(&l, Value::Obj(l.clone())).unwrap();
                }
                black_box(gc::collect())
            });
        })
    });

    group.finish();
}

criterion_group!(benches, bench_allocation, bench_refcount, bench_dispatch, bench_collection);
criterion_main!(benches);
