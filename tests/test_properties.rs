use proptest::prelude::*;
use pybridge::host::builtins::list;
use pybridge::host::ops;
use pybridge::lifecycle::instantiate;
use pybridge::{
    create, field, with_gil, BufferSpec, ClassBuilder, CompareOp, ExceptionKind, FeatureFlags, NativeClass, Value,
};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

#[derive(Default)]
struct Record {
    id: i64,
    score: f64,
    label: String,
    flag: bool,
}

impl NativeClass for Record {
    const NAME: &'static str = "PropRecord";

    fn describe(class: &mut ClassBuilder<Self>) {
        class
            .field("id", field!(Record, id))
            .field("score", field!(Record, score))
            .field("label", field!(Record, label))
            .field("flag", field!(Record, flag))
            .fields_constructor();
    }
}

#[derive(Default)]
struct Pooled {
    n: i64,
}

impl NativeClass for Pooled {
    const NAME: &'static str = "PropPooled";
    const FLAGS: FeatureFlags = FeatureFlags::new().freelist(2);

    fn describe(class: &mut ClassBuilder<Self>) {
        class.field("n", field!(Pooled, n)).fields_constructor();
    }
}

#[derive(Default)]
struct Key {
    a: i64,
    b: i64,
}

impl NativeClass for Key {
    const NAME: &'static str = "PropKey";
    const FLAGS: FeatureFlags = FeatureFlags::new().frozen();

    fn describe(class: &mut ClassBuilder<Self>) {
        class
            .field("a", field!(Key, a))
            .field("b", field!(Key, b))
            .compare(CompareOp::Eq, |x: &Key, y: &Key| x.a == y.a && x.b == y.b)
            .hash(|k: &Key| k.a.wrapping_mul(1_000_003) ^ k.b);
    }
}

struct Finalized {
    runs: Arc<AtomicUsize>,
}

impl NativeClass for Finalized {
    const NAME: &'static str = "PropFinalized";

    fn describe(class: &mut ClassBuilder<Self>) {
        class.cleanup(|this: &mut Finalized| {
            this.runs.fetch_add(1, Ordering::SeqCst);
        });
    }
}

struct Grid {
    cells: Vec<u8>,
    shape: Vec<isize>,
}

impl NativeClass for Grid {
    const NAME: &'static str = "PropGrid";

    fn describe(class: &mut ClassBuilder<Self>) {
        class.buffer(|g: &Grid| BufferSpec::from_slice(&g.cells).with_shape(&g.shape));
    }
}

proptest! {
    #[test]
    fn test_fields_round_trip(id in any::<i64>(), score in -1e12f64..1e12, label in ".{0,16}", flag in any::<bool>()) {
        with_gil(|| {
            let ty = pybridge::type_object::<Record>().unwrap();
            let args = [Value::Int(id), Value::Float(score), Value::str(&label), Value::Bool(flag)];
            let record = Value::Obj(instantiate(ty, &args).unwrap());
            prop_assert_eq!(ops::getattr(&record, "id").unwrap(), Value::Int(id));
            prop_assert_eq!(ops::getattr(&record, "score").unwrap(), Value::Float(score));
            prop_assert_eq!(ops::getattr(&record, "label").unwrap(), Value::str(&label));
            prop_assert_eq!(ops::getattr(&record, "flag").unwrap(), Value::Bool(flag));

            ops::setattr(&record, "id", Value::Int(id.wrapping_add(1))).unwrap();
            prop_assert_eq!(ops::getattr(&record, "id").unwrap(), Value::Int(id.wrapping_add(1)));
            Ok(())
        })?;
    }

    #[test]
    fn test_freelist_never_exceeds_capacity(count in 0usize..12) {
        with_gil(|| {
            let ty = pybridge::type_object::<Pooled>().unwrap();
            let objs: Vec<_> = (0..count).map(|n| create(Pooled { n: n as i64 }).unwrap()).collect();
            drop(objs);
            prop_assert!(ty.freelist_len() <= 2);
            if count >= 2 {
                prop_assert_eq!(ty.freelist_len(), 2);
            }
            Ok(())
        })?;
    }

    #[test]
    fn test_negative_indices_wrap(items in prop::collection::vec(any::<i64>(), 1..20), raw in any::<i64>()) {
        with_gil(|| {
            let len = items.len() as i64;
            let l = Value::Obj(list::new(items.iter().copied().map(Value::Int).collect()).unwrap());
            let index = raw.rem_euclid(2 * len) - len;
            let expected = items[index.rem_euclid(len) as usize];
            prop_assert_eq!(ops::getitem(&l, &Value::Int(index)).unwrap(), Value::Int(expected));

            let err = ops::getitem(&l, &Value::Int(len + raw.rem_euclid(5))).unwrap_err();
            prop_assert_eq!(err.kind, ExceptionKind::IndexError);
            let err = ops::getitem(&l, &Value::Int(-len - 1 - raw.rem_euclid(5))).unwrap_err();
            prop_assert_eq!(err.kind, ExceptionKind::IndexError);
            Ok(())
        })?;
    }

    #[test]
    fn test_equal_objects_hash_equal(a in any::<i64>(), b in any::<i64>()) {
        with_gil(|| {
            let x = Value::Obj(create(Key { a, b }).unwrap());
            let y = Value::Obj(create(Key { a, b }).unwrap());
            prop_assert!(!x.is(&y));
            prop_assert!(ops::eq(&x, &y).unwrap());
            let hx = ops::hash(&x).unwrap();
            prop_assert_eq!(hx, ops::hash(&y).unwrap());
            prop_assert_ne!(hx, -1);
            Ok(())
        })?;
    }

    #[test]
    fn test_cleanup_runs_exactly_once(clones in 0usize..8) {
        with_gil(|| {
            let runs = Arc::new(AtomicUsize::new(0));
            let obj = create(Finalized { runs: Arc::clone(&runs) }).unwrap();
            let handles: Vec<_> = (0..clones).map(|_| obj.clone()).collect();
            prop_assert_eq!(obj.refcount() as usize, clones + 1);
            drop(obj);
            prop_assert_eq!(runs.load(Ordering::SeqCst), usize::from(clones == 0));
            drop(handles);
            prop_assert_eq!(runs.load(Ordering::SeqCst), 1);
            Ok(())
        })?;
    }

    #[test]
    fn test_negative_buffer_dimensions_are_rejected(len in 1usize..16, bad in -8isize..0) {
        with_gil(|| {
            let grid = Value::Obj(create(Grid { cells: vec![0; len], shape: vec![bad] }).unwrap());
            let err = ops::get_buffer(&grid).unwrap_err();
            prop_assert_eq!(err.kind, ExceptionKind::BufferError);

            let grid = Value::Obj(create(Grid { cells: vec![0; len], shape: vec![len as isize] }).unwrap());
            let view = ops::get_buffer(&grid).unwrap();
            prop_assert_eq!(view.len(), len);
            prop_assert_eq!(view.shape(), &[len as isize][..]);
            Ok(())
        })?;
    }
}
