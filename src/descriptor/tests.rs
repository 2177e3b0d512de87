//! Builder tests - member classification and registration-time errors

use super::*;
use crate::error::BuildError;
use crate::host::gil::with_gil;
use crate::host::{HostResult, Value};
use crate::inherit::{BasePayload, BuiltinBase};
use crate::module::{register, NativeClass};
use crate::protocol::BinaryOp;
use crate::strong_ref::StrongRef;
use crate::{base_payload, field};

#[derive(Default)]
struct Shape {
    sides: i64,
    label: String,
    _cache: f64,
}

impl NativeClass for Shape {
    const NAME: &'static str = "DescShape";

    fn describe(class: &mut ClassBuilder<Self>) {
        class
            .doc("A polygon.")
            .field("sides", field!(Shape, sides))
            .field("label", field!(Shape, label))
            .field("_cache", field!(Shape, _cache))
            .member_doc("sides", "Number of sides.")
            .fields_constructor()
            .def("describe", |this: &Shape, _args: &[Value]| format!("{} ({})", this.label, this.sides))
            .def("grow", |this: &mut Shape, _args: &[Value]| this.sides += 1)
            .def("square", |cls: ClassToken, _args: &[Value]| cls.instantiate(&[Value::Int(4), Value::str("square")]))
            .def("max_sides", |_args: &[Value]| 64i64)
            .len(|this: &Shape| this.sides as usize)
            .property("perimeter_hint", |this: &Shape| this.sides * 10);
    }
}

#[repr(C)]
#[derive(Default)]
struct Tile {
    base: BasePayload<Shape>,
    color: String,
}

impl NativeClass for Tile {
    const NAME: &'static str = "DescTile";

    fn describe(class: &mut ClassBuilder<Self>) {
        class
            .extends(base_payload!(Tile, base))
            .field("color", field!(Tile, color))
            .fields_constructor();
    }
}

#[test]
fn members_are_classified() {
    with_gil(|| {
        let ty = register::<Shape>().unwrap();
        let desc = ty.descriptor().unwrap();

        let public: Vec<_> = desc.public_fields().map(|f| f.name).collect();
        let private: Vec<_> = desc.private_fields().map(|f| f.name).collect();
        assert_eq!(public, ["sides", "label"]);
        assert_eq!(private, ["_cache"]);

        assert_eq!(desc.method("describe").unwrap().kind, MethodKind::Instance);
        assert_eq!(desc.method("grow").unwrap().receiver, Receiver::Exclusive);
        assert_eq!(desc.method("square").unwrap().kind, MethodKind::Class);
        assert_eq!(desc.method("max_sides").unwrap().kind, MethodKind::Static);
        assert_eq!(desc.method("__len__").unwrap().kind, MethodKind::Magic);
        assert!(desc.has_constructor());
        assert_eq!(desc.doc_of("sides"), Some("Number of sides."));
        assert_eq!(desc.fields[0].doc, Some("Number of sides."));
    });
}

#[test]
fn return_conventions_follow_the_return_type() {
    with_gil(|| {
        let desc = register::<Shape>().unwrap().descriptor().unwrap().clone();
        assert_eq!(desc.method("describe").unwrap().convention, ReturnConvention::Always);
        assert_eq!(desc.method("square").unwrap().convention, ReturnConvention::Fallible);
    });
}

#[test]
fn child_constructor_flattens_parent_fields_first() {
    with_gil(|| {
        register::<Shape>().unwrap();
        let tile = register::<Tile>().unwrap();
        let desc = tile.descriptor().unwrap();
        assert_eq!(desc.constructor_args(), ["sides", "label", "color"]);
        assert!(desc.extends("DescShape"));
        assert!(desc.base_field().is_some());
    });
}

fn build_error<T: NativeClass>() -> BuildError {
    with_gil(|| register::<T>().unwrap_err())
}

struct Duplicate {
    a: i64,
}

impl NativeClass for Duplicate {
    const NAME: &'static str = "DescDuplicate";

    fn describe(class: &mut ClassBuilder<Self>) {
        class.field("a", field!(Duplicate, a)).field("a", field!(Duplicate, a));
    }
}

#[test]
fn duplicate_member_is_rejected() {
    assert_eq!(
        build_error::<Duplicate>(),
        BuildError::DuplicateMember { ty: "DescDuplicate", name: "a".to_owned() }
    );
}

struct PlainMagic;

impl NativeClass for PlainMagic {
    const NAME: &'static str = "DescPlainMagic";

    fn describe(class: &mut ClassBuilder<Self>) {
        class.def("__len__", |_this: &PlainMagic, _args: &[Value]| 0i64);
    }
}

#[test]
fn hook_names_cannot_be_plain_methods() {
    assert!(matches!(build_error::<PlainMagic>(), BuildError::ReservedMagicName { .. }));
}

struct IndexOnly;

impl NativeClass for IndexOnly {
    const NAME: &'static str = "DescIndexOnly";

    fn describe(class: &mut ClassBuilder<Self>) {
        class.seq_getitem(|_this: &IndexOnly, index: usize| index as i64);
    }
}

#[test]
fn sequence_indexing_needs_len() {
    assert_eq!(build_error::<IndexOnly>(), BuildError::SequenceIndexWithoutLen { ty: "DescIndexOnly" });
}

#[derive(Default)]
struct FrozenCounter {
    n: i64,
}

impl NativeClass for FrozenCounter {
    const NAME: &'static str = "DescFrozenCounter";
    const FLAGS: FeatureFlags = FeatureFlags::new().frozen();

    fn describe(class: &mut ClassBuilder<Self>) {
        class
            .field("n", field!(FrozenCounter, n))
            .inplace(BinaryOp::Add, |this: &mut FrozenCounter, other: &FrozenCounter| this.n += other.n);
    }
}

#[test]
fn inplace_operator_on_frozen_type_is_rejected() {
    assert_eq!(
        build_error::<FrozenCounter>(),
        BuildError::MutationOnFrozen { ty: "DescFrozenCounter", member: "__iadd__" }
    );
}

#[derive(Default)]
struct FrozenBase {
    id: i64,
}

impl NativeClass for FrozenBase {
    const NAME: &'static str = "DescFrozenBase";
    const FLAGS: FeatureFlags = FeatureFlags::new().frozen();

    fn describe(class: &mut ClassBuilder<Self>) {
        class.field("id", field!(FrozenBase, id));
    }
}

#[repr(C)]
#[derive(Default)]
struct ThawedChild {
    base: BasePayload<FrozenBase>,
}

impl NativeClass for ThawedChild {
    const NAME: &'static str = "DescThawedChild";

    fn describe(class: &mut ClassBuilder<Self>) {
        class.extends(base_payload!(ThawedChild, base));
    }
}

#[test]
fn mutable_child_of_frozen_parent_is_rejected() {
    with_gil(|| register::<FrozenBase>().unwrap());
    assert_eq!(
        build_error::<ThawedChild>(),
        BuildError::FrozenParent { child: "DescThawedChild", parent: "DescFrozenBase" }
    );
}

#[repr(C)]
struct Orphan {
    base: BasePayload<Unregistered>,
}

#[derive(Default)]
struct Unregistered;

impl NativeClass for Unregistered {
    const NAME: &'static str = "DescUnregistered";

    fn describe(_class: &mut ClassBuilder<Self>) {}
}

impl NativeClass for Orphan {
    const NAME: &'static str = "DescOrphan";

    fn describe(class: &mut ClassBuilder<Self>) {
        class.extends(base_payload!(Orphan, base));
    }
}

#[test]
fn parent_must_be_registered_first() {
    assert_eq!(
        build_error::<Orphan>(),
        BuildError::ParentNotRegistered { child: "DescOrphan", parent: "DescUnregistered" }
    );
}

struct Target;

impl NativeClass for Target {
    const NAME: &'static str = "DescTarget";

    fn describe(_class: &mut ClassBuilder<Self>) {}
}

struct Holder {
    target: StrongRef<Target>,
}

impl NativeClass for Holder {
    const NAME: &'static str = "DescHolder";

    fn describe(class: &mut ClassBuilder<Self>) {
        class.strong_ref("_target", field!(Holder, target));
    }
}

#[test]
fn strong_ref_target_must_be_registered() {
    assert_eq!(
        build_error::<Holder>(),
        BuildError::UnregisteredRefTarget { ty: "DescHolder", field: "_target", target: "DescTarget" }
    );
    with_gil(|| {
        register::<Target>().unwrap();
        let holder = register::<Holder>().unwrap();
        let desc = holder.descriptor().unwrap();
        assert_eq!(desc.strong_refs().count(), 1);
        assert!(desc.private_fields().any(|field| field.name == "_target"));
    });
}

struct Pooled {
    v: i64,
}

impl NativeClass for Pooled {
    const NAME: &'static str = "DescPooled";
    const FLAGS: FeatureFlags = FeatureFlags::new().freelist(4).dict();

    fn describe(class: &mut ClassBuilder<Self>) {
        class.field("v", field!(Pooled, v));
    }
}

#[test]
fn freelist_with_dict_is_rejected() {
    assert_eq!(build_error::<Pooled>(), BuildError::FreelistWithDict { ty: "DescPooled" });
}

struct NotADict;

impl NativeClass for NotADict {
    const NAME: &'static str = "DescNotADict";

    fn describe(class: &mut ClassBuilder<Self>) {
        class.missing(|_this: &NotADict, _key: &Value| Value::None);
    }
}

#[test]
fn missing_hook_needs_a_dict_base() {
    assert_eq!(build_error::<NotADict>(), BuildError::MissingWithoutDictBase { ty: "DescNotADict" });
}

struct TwoBases;

impl NativeClass for TwoBases {
    const NAME: &'static str = "DescTwoBases";

    fn describe(class: &mut ClassBuilder<Self>) {
        class.extends_builtin(BuiltinBase::List).extends_builtin(BuiltinBase::Dict);
    }
}

#[test]
fn only_one_base_is_allowed() {
    assert_eq!(build_error::<TwoBases>(), BuildError::MultipleBases { ty: "DescTwoBases" });
}

#[test]
fn checked_flags_accept_valid_combinations() {
    const FLAGS: FeatureFlags = FeatureFlags::new().freelist(8).frozen().checked();
    assert_eq!(FLAGS.freelist_capacity(), 8);
    assert!(FLAGS.is_frozen());
    assert!(FLAGS.validate("Ok").is_ok());
    assert_eq!(
        FeatureFlags::new().freelist(2).weakref().validate("Bad"),
        Err(BuildError::FreelistWithWeakref { ty: "Bad" })
    );
}

#[test]
fn class_method_instantiates_the_class() {
    with_gil(|| -> HostResult<()> {
        let ty = crate::module::type_object::<Shape>()?;
        let square = crate::host::ops::call_method(&Value::Type(ty), "square", &[])?;
        assert_eq!(crate::host::ops::len(&square)?, 4);
        assert_eq!(crate::host::ops::call_method(&square, "describe", &[])?, Value::str("square (4)"));
        Ok(())
    })
    .unwrap();
}
