//! Host runtime tests - operations, attribute access, builtins, weakrefs, buffers

use super::builtins::{dict, list};
use super::gil::with_gil;
use super::weakref::{self, WeakRef};
use super::*;
use crate::descriptor::{ClassBuilder, ClassToken, FeatureFlags};
use crate::field;
use crate::module::{type_object, NativeClass};
use crate::protocol::{BinaryOp, BufferSpec, CompareOp, UnaryOp};

#[derive(Default)]
struct Vec2 {
    x: f64,
    y: f64,
}

impl NativeClass for Vec2 {
    const NAME: &'static str = "HostVec2";

    fn describe(class: &mut ClassBuilder<Self>) {
        class
            .field("x", field!(Vec2, x))
            .field("y", field!(Vec2, y))
            .fields_constructor()
            .binary(BinaryOp::Add, |a: &Vec2, b: &Vec2| Vec2 { x: a.x + b.x, y: a.y + b.y })
            .reflected(BinaryOp::Mul, |v: &Vec2, k: &Value| -> HostResult<Vec2> {
                let k = k.as_float().ok_or_else(|| HostError::type_error("scale must be a number"))?;
                Ok(Vec2 { x: v.x * k, y: v.y * k })
            })
            .unary(UnaryOp::Neg, |v: &Vec2| Vec2 { x: -v.x, y: -v.y })
            .compare(CompareOp::Eq, |a: &Vec2, b: &Vec2| a.x == b.x && a.y == b.y)
            .hash(|v: &Vec2| (v.x as i64) * 31 + v.y as i64)
            .repr(|v: &Vec2| format!("Vec2({}, {})", v.x, v.y));
    }
}

#[derive(Default)]
struct Account {
    balance: i64,
    _audit: i64,
}

impl NativeClass for Account {
    const NAME: &'static str = "HostAccount";
    const FLAGS: FeatureFlags = FeatureFlags::new().dict().weakref();

    fn describe(class: &mut ClassBuilder<Self>) {
        class
            .doc("A balance with an audit counter.")
            .field("balance", field!(Account, balance))
            .field("_audit", field!(Account, _audit))
            .fields_constructor()
            .def("deposit", |this: &mut Account, args: &[Value]| -> HostResult<i64> {
                let amount = args
                    .first()
                    .and_then(Value::as_int)
                    .ok_or_else(|| HostError::type_error("deposit() needs an int"))?;
                this.balance += amount;
                this._audit += 1;
                Ok(this.balance)
            })
            .def("audit", |this: &Account, _args: &[Value]| this._audit)
            .def("kind", |cls: ClassToken, _args: &[Value]| cls.name())
            .def("zero", |_args: &[Value]| 0i64)
            .property("doubled", |this: &Account| this.balance * 2)
            .class_attr("currency", "EUR");
    }
}

#[derive(Default)]
struct Sealed {
    id: i64,
}

impl NativeClass for Sealed {
    const NAME: &'static str = "HostSealed";
    const FLAGS: FeatureFlags = FeatureFlags::new().frozen();

    fn describe(class: &mut ClassBuilder<Self>) {
        class.field("id", field!(Sealed, id)).fields_constructor();
    }
}

struct Samples {
    data: Vec<i32>,
    shape: Vec<isize>,
}

impl NativeClass for Samples {
    const NAME: &'static str = "HostSamples";

    fn describe(class: &mut ClassBuilder<Self>) {
        class
            .buffer(|s: &Samples| BufferSpec::from_slice(&s.data).with_shape(&s.shape))
            .def("push", |s: &mut Samples, args: &[Value]| -> HostResult<()> {
                let item = args.first().and_then(Value::as_int).unwrap_or_default();
                s.data.push(item as i32);
                s.shape = vec![s.data.len() as isize];
                Ok(())
            });
    }
}

fn samples(data: Vec<i32>) -> ObjRef {
    let shape = vec![data.len() as isize];
    crate::create(Samples { data, shape }).unwrap()
}

fn vec2(x: f64, y: f64) -> Value {
    Value::Obj(crate::create(Vec2 { x, y }).unwrap())
}

fn account(balance: i64) -> Value {
    let ty = type_object::<Account>().unwrap();
    ops::call(&Value::Type(ty), &[Value::Int(balance)]).unwrap()
}

// ===== Primitive operations =====

#[test]
fn integer_arithmetic_follows_floor_semantics() {
    with_gil(|| {
        let div = ops::binary_op(&Value::Int(-7), &Value::Int(2), BinaryOp::FloorDiv).unwrap();
        let rem = ops::binary_op(&Value::Int(-7), &Value::Int(2), BinaryOp::Mod).unwrap();
        assert_eq!(div, Value::Int(-4));
        assert_eq!(rem, Value::Int(1));
    });
}

#[test]
fn integer_overflow_and_zero_division_raise() {
    with_gil(|| {
        let err = ops::binary_op(&Value::Int(i64::MAX), &Value::Int(1), BinaryOp::Add).unwrap_err();
        assert!(err.is(ExceptionKind::ArithmeticError));
        assert_eq!(err.kind, ExceptionKind::OverflowError);

        let err = ops::binary_op(&Value::Int(1), &Value::Int(0), BinaryOp::Mod).unwrap_err();
        assert_eq!(err.kind, ExceptionKind::ZeroDivisionError);
    });
}

#[test]
fn primitive_repr_and_truthiness() {
    with_gil(|| {
        assert_eq!(ops::repr(&Value::Float(2.0)).unwrap(), "2.0");
        assert_eq!(ops::repr(&Value::str("it's")).unwrap(), "'it\\'s'");
        assert_eq!(ops::repr(&Value::None).unwrap(), "None");
        assert!(!ops::truthy(&Value::str("")).unwrap());
        assert!(ops::truthy(&Value::Int(3)).unwrap());
    });
}

#[test]
fn hash_of_minus_one_is_remapped() {
    with_gil(|| {
        assert_eq!(ops::hash(&Value::Int(-1)).unwrap(), -2);
        assert_eq!(ops::hash(&Value::Float(3.0)).unwrap(), ops::hash(&Value::Int(3)).unwrap());
    });
}

#[test]
fn ordering_mixed_types_is_a_type_error() {
    with_gil(|| {
        let err = ops::rich_compare(&Value::Int(1), &Value::str("a"), CompareOp::Lt).unwrap_err();
        assert_eq!(err.kind, ExceptionKind::TypeError);
        assert!(!ops::eq(&Value::Int(1), &Value::str("a")).unwrap());
    });
}

// ===== Native protocol dispatch =====

#[test]
fn forward_binary_builds_a_new_instance() {
    with_gil(|| {
        let sum = ops::binary_op(&vec2(1.0, 2.0), &vec2(3.0, 4.0), BinaryOp::Add).unwrap();
        assert_eq!(ops::repr(&sum).unwrap(), "Vec2(4, 6)");
    });
}

#[test]
fn reflected_operator_handles_primitive_left_operand() {
    with_gil(|| {
        let scaled = ops::binary_op(&Value::Float(2.0), &vec2(1.5, -1.0), BinaryOp::Mul).unwrap();
        assert_eq!(ops::repr(&scaled).unwrap(), "Vec2(3, -2)");
    });
}

#[test]
fn mismatched_operands_are_a_type_error() {
    with_gil(|| {
        let err = ops::binary_op(&vec2(1.0, 1.0), &Value::Int(1), BinaryOp::Add).unwrap_err();
        assert_eq!(err.kind, ExceptionKind::TypeError);
        assert!(err.message.contains("unsupported operand"));
    });
}

#[test]
fn equal_instances_hash_equal() {
    with_gil(|| {
        let (a, b) = (vec2(2.0, 5.0), vec2(2.0, 5.0));
        assert!(ops::eq(&a, &b).unwrap());
        assert!(!ops::rich_compare(&a, &b, CompareOp::Ne).unwrap());
        assert_eq!(ops::hash(&a).unwrap(), ops::hash(&b).unwrap());
    });
}

#[test]
fn unary_and_missing_unary() {
    with_gil(|| {
        let negated = ops::unary_op(&vec2(1.0, -2.0), UnaryOp::Neg).unwrap();
        assert_eq!(ops::repr(&negated).unwrap(), "Vec2(-1, 2)");
        let err = ops::unary_op(&vec2(1.0, 1.0), UnaryOp::Invert).unwrap_err();
        assert_eq!(err.kind, ExceptionKind::TypeError);
    });
}

// ===== Attribute access =====

#[test]
fn fields_properties_and_constants() {
    with_gil(|| {
        let acct = account(10);
        assert_eq!(ops::getattr(&acct, "balance").unwrap(), Value::Int(10));
        assert_eq!(ops::getattr(&acct, "doubled").unwrap(), Value::Int(20));
        assert_eq!(ops::getattr(&acct, "currency").unwrap(), Value::str("EUR"));
        let class = ops::getattr(&acct, "__class__").unwrap();
        assert_eq!(class.as_type().map(HostType::name), Some("HostAccount"));
    });
}

#[test]
fn private_fields_are_not_attributes() {
    with_gil(|| {
        let err = ops::getattr(&account(0), "_audit").unwrap_err();
        assert_eq!(err.kind, ExceptionKind::AttributeError);
    });
}

#[test]
fn bound_method_mutates_its_receiver() {
    with_gil(|| {
        let acct = account(10);
        let result = ops::call_method(&acct, "deposit", &[Value::Int(5)]).unwrap();
        assert_eq!(result, Value::Int(15));
        assert_eq!(ops::call_method(&acct, "audit", &[]).unwrap(), Value::Int(1));
        assert_eq!(ops::getattr(&acct, "balance").unwrap(), Value::Int(15));
    });
}

#[test]
fn class_and_static_methods_from_the_type() {
    with_gil(|| {
        let ty = Value::Type(type_object::<Account>().unwrap());
        assert_eq!(ops::call_method(&ty, "kind", &[]).unwrap(), Value::str("HostAccount"));
        assert_eq!(ops::call_method(&ty, "zero", &[]).unwrap(), Value::Int(0));
        assert_eq!(ops::getattr(&ty, "__name__").unwrap(), Value::str("HostAccount"));
        assert_eq!(ops::getattr(&ty, "__doc__").unwrap(), Value::str("A balance with an audit counter."));
    });
}

#[test]
fn unbound_method_takes_the_receiver_first() {
    with_gil(|| {
        let acct = account(1);
        let ty = Value::Type(type_object::<Account>().unwrap());
        let deposit = ops::getattr(&ty, "deposit").unwrap();
        assert_eq!(ops::call(&deposit, &[acct.clone(), Value::Int(2)]).unwrap(), Value::Int(3));

        let err = ops::call(&deposit, &[vec2(0.0, 0.0), Value::Int(2)]).unwrap_err();
        assert_eq!(err.kind, ExceptionKind::TypeError);
    });
}

#[test]
fn instance_dict_holds_dynamic_attributes() {
    with_gil(|| {
        let acct = account(0);
        ops::setattr(&acct, "nickname", Value::str("savings")).unwrap();
        assert_eq!(ops::getattr(&acct, "nickname").unwrap(), Value::str("savings"));

        let attrs = ops::getattr(&acct, "__dict__").unwrap();
        assert_eq!(ops::len(&attrs).unwrap(), 1);

        ops::delattr(&acct, "nickname").unwrap();
        let err = ops::getattr(&acct, "nickname").unwrap_err();
        assert_eq!(err.kind, ExceptionKind::AttributeError);
    });
}

#[test]
fn fields_take_precedence_over_the_instance_dict() {
    with_gil(|| {
        let acct = account(4);
        ops::setattr(&acct, "balance", Value::Int(9)).unwrap();
        let attrs = ops::getattr(&acct, "__dict__").unwrap();
        assert_eq!(ops::len(&attrs).unwrap(), 0);
        assert_eq!(ops::getattr(&acct, "balance").unwrap(), Value::Int(9));
    });
}

#[test]
fn read_only_property_rejects_assignment() {
    with_gil(|| {
        let err = ops::setattr(&account(1), "doubled", Value::Int(0)).unwrap_err();
        assert_eq!(err.kind, ExceptionKind::AttributeError);
        assert!(err.message.contains("no setter"));
    });
}

#[test]
fn wrong_field_type_is_a_type_error() {
    with_gil(|| {
        let err = ops::setattr(&account(1), "balance", Value::str("lots")).unwrap_err();
        assert_eq!(err.kind, ExceptionKind::TypeError);
    });
}

#[test]
fn frozen_instances_reject_assignment() {
    with_gil(|| {
        let ty = Value::Type(type_object::<Sealed>().unwrap());
        let sealed = ops::call(&ty, &[Value::Int(7)]).unwrap();
        let err = ops::setattr(&sealed, "id", Value::Int(8)).unwrap_err();
        assert_eq!(err.kind, ExceptionKind::FrozenInstanceError);
        assert!(err.is(ExceptionKind::AttributeError));
        assert_eq!(ops::getattr(&sealed, "id").unwrap(), Value::Int(7));
    });
}

#[test]
fn types_without_dict_reject_new_attributes() {
    with_gil(|| {
        let err = ops::setattr(&vec2(0.0, 0.0), "z", Value::Int(1)).unwrap_err();
        assert_eq!(err.kind, ExceptionKind::AttributeError);
    });
}

// ===== Builtins =====

#[test]
fn list_indexing_wraps_negative_indices() {
    with_gil(|| {
        let items = Value::Obj(list::new(vec![Value::Int(1), Value::Int(2), Value::Int(3)]).unwrap());
        assert_eq!(ops::getitem(&items, &Value::Int(-1)).unwrap(), Value::Int(3));
        ops::setitem(&items, &Value::Int(-3), Value::Int(10)).unwrap();
        ops::delitem(&items, &Value::Int(1)).unwrap();
        assert_eq!(ops::repr(&items).unwrap(), "[10, 3]");

        let err = ops::getitem(&items, &Value::Int(-3)).unwrap_err();
        assert_eq!(err.kind, ExceptionKind::IndexError);
    });
}

#[test]
fn list_methods_and_iteration() {
    with_gil(|| {
        let items = Value::Obj(list::new(Vec::new()).unwrap());
        ops::call_method(&items, "append", &[Value::Int(1)]).unwrap();
        ops::call_method(&items, "extend", &[Value::Obj(list::new(vec![Value::Int(2)]).unwrap())]).unwrap();
        assert!(ops::contains(&items, &Value::Int(2)).unwrap());
        assert_eq!(ops::collect(&items).unwrap(), vec![Value::Int(1), Value::Int(2)]);
        assert_eq!(ops::call_method(&items, "pop", &[]).unwrap(), Value::Int(2));
        assert_eq!(ops::len(&items).unwrap(), 1);
    });
}

#[test]
fn self_referencing_list_repr_terminates() {
    with_gil(|| {
        let obj = list::new(Vec::new()).unwrap();
        list::append(&obj, Value::Obj(obj.clone())).unwrap();
        assert_eq!(ops::repr(&Value::Obj(obj.clone())).unwrap(), "[[...]]");
        ops::call_method(&Value::Obj(obj), "clear", &[]).unwrap();
    });
}

#[test]
fn lists_are_unhashable() {
    with_gil(|| {
        let items = Value::Obj(list::new(Vec::new()).unwrap());
        let err = ops::hash(&items).unwrap_err();
        assert_eq!(err.kind, ExceptionKind::TypeError);
    });
}

#[test]
fn dict_keys_use_host_equality() {
    with_gil(|| {
        let map = dict::new().unwrap();
        dict::set_item(&map, vec2(1.0, 2.0), Value::str("first")).unwrap();
        dict::set_item(&map, vec2(1.0, 2.0), Value::str("second")).unwrap();
        assert_eq!(dict::len(&map).unwrap(), 1);
        assert_eq!(dict::get(&map, &vec2(1.0, 2.0)).unwrap(), Some(Value::str("second")));
    });
}

#[test]
fn dict_missing_key_and_unhashable_key() {
    with_gil(|| {
        let map = Value::Obj(dict::new().unwrap());
        ops::setitem(&map, &Value::str("a"), Value::Int(1)).unwrap();
        assert_eq!(ops::repr(&map).unwrap(), "{'a': 1}");

        let err = ops::getitem(&map, &Value::str("b")).unwrap_err();
        assert_eq!(err.kind, ExceptionKind::KeyError);

        let key = Value::Obj(list::new(Vec::new()).unwrap());
        let err = ops::setitem(&map, &key, Value::Int(2)).unwrap_err();
        assert_eq!(err.kind, ExceptionKind::TypeError);
    });
}

#[test]
fn dict_iterates_keys_in_insertion_order() {
    with_gil(|| {
        let map = Value::Obj(dict::new().unwrap());
        for key in ["c", "a", "b"] {
            ops::setitem(&map, &Value::str(key), Value::None).unwrap();
        }
        ops::delitem(&map, &Value::str("a")).unwrap();
        let keys = ops::collect(&map).unwrap();
        assert_eq!(keys, vec![Value::str("c"), Value::str("b")]);
        assert_eq!(ops::call_method(&map, "get", &[Value::str("zz"), Value::Int(5)]).unwrap(), Value::Int(5));
    });
}

// ===== Weak references =====

#[test]
fn weakref_dies_with_its_target() {
    with_gil(|| {
        let acct = account(3).into_obj().unwrap();
        let weak = weakref::new(&acct).unwrap();
        assert_eq!(weakref::weak_count(&acct), 1);
        {
            let upgraded = weak.upgrade().unwrap();
            assert!(upgraded.is(&acct));
        }
        drop(acct);
        assert!(weak.is_dead());
        assert!(weak.upgrade().is_none());
    });
}

#[test]
fn weakref_requires_the_feature() {
    with_gil(|| {
        let point = vec2(0.0, 0.0).into_obj().unwrap();
        let err = WeakRef::new(&point).unwrap_err();
        assert_eq!(err.kind, ExceptionKind::TypeError);
    });
}

#[test]
fn weakref_debug_reports_liveness() {
    with_gil(|| {
        let acct = account(2).into_obj().unwrap();
        let weak = WeakRef::new(&acct).unwrap();
        assert_eq!(format!("{weak:?}"), "WeakRef { alive: true }");
        drop(acct);
        assert_eq!(format!("{weak:?}"), "WeakRef { alive: false }");
    });
}

#[test]
fn host_weakref_object_is_callable() {
    with_gil(|| {
        let acct = account(3).into_obj().unwrap();
        let weak = Value::Obj(weakref::new_ref(&acct).unwrap());
        assert_eq!(ops::call(&weak, &[]).unwrap(), Value::Obj(acct.clone()));
        drop(acct);
        assert_eq!(ops::call(&weak, &[]).unwrap(), Value::None);
    });
}

// ===== Buffers =====

#[test]
fn buffer_view_exposes_validated_metadata() {
    with_gil(|| {
        let obj = samples(vec![1, 2, 3]);
        let view = ops::get_buffer(&Value::Obj(obj.clone())).unwrap();
        assert_eq!(view.shape(), &[3]);
        assert_eq!(view.strides(), &[4]);
        assert_eq!(view.format(), "i");
        assert_eq!(view.itemsize(), 4);
        assert!(view.readonly());
        assert_eq!(view.as_bytes().len(), 12);
        assert_eq!(view.element(&[2]).unwrap(), &3i32.to_ne_bytes());
        assert_eq!(obj.header().exports(), 1);
        drop(view);
        assert_eq!(obj.header().exports(), 0);
    });
}

#[test]
fn mutation_while_exported_is_a_buffer_error() {
    with_gil(|| {
        let obj = Value::Obj(samples(vec![1]));
        let view = ops::get_buffer(&obj).unwrap();
        let err = ops::call_method(&obj, "push", &[Value::Int(2)]).unwrap_err();
        assert_eq!(err.kind, ExceptionKind::BufferError);
        drop(view);
        ops::call_method(&obj, "push", &[Value::Int(2)]).unwrap();
    });
}

#[test]
fn negative_shape_is_reported_not_exposed() {
    with_gil(|| {
        let obj = crate::create(Samples { data: vec![1, 2], shape: vec![-1] }).unwrap();
        let err = BufferView::new(&obj).unwrap_err();
        assert_eq!(err.kind, ExceptionKind::BufferError);
        assert!(err.message.contains("negative dimension"));
        assert_eq!(obj.header().exports(), 0);
    });
}

#[test]
fn non_exporters_are_a_type_error() {
    with_gil(|| {
        let err = ops::get_buffer(&vec2(0.0, 0.0)).unwrap_err();
        assert_eq!(err.kind, ExceptionKind::TypeError);
    });
}

#[test]
fn downcast_checks_the_payload_type() {
    with_gil(|| {
        let point = vec2(1.0, 2.0).into_obj().unwrap();
        assert_eq!(point.downcast::<Vec2>().unwrap().map(|v| v.x), Some(1.0));
        assert!(point.downcast::<Account>().unwrap().is_none());
    });
}
