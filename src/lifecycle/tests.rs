//! Lifecycle tests - construction, deallocation order, freelists, budgets

use super::*;
use crate::allocator::{allocation_limit, set_allocation_limit};
use crate::descriptor::{ClassBuilder, FeatureFlags};
use crate::field;
use crate::host::gil::with_gil;
use crate::host::weakref::WeakRef;
use crate::host::{ops, ExceptionKind};
use crate::module::type_object;
use crate::strong_ref::StrongRef;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

#[derive(Default)]
struct Particle {
    mass: f64,
}

impl NativeClass for Particle {
    const NAME: &'static str = "LifeParticle";
    const FLAGS: FeatureFlags = FeatureFlags::new().freelist(3).checked();

    fn describe(class: &mut ClassBuilder<Self>) {
        class.field("mass", field!(Particle, mass)).fields_constructor();
    }
}

#[test]
fn freelist_keeps_at_most_capacity_records() {
    with_gil(|| {
        let ty = type_object::<Particle>().unwrap();
        drain_freelists();
        let particles: Vec<_> = (0..4).map(|i| create(Particle { mass: i as f64 }).unwrap()).collect();
        let before = ty.freelist_stats().unwrap();
        drop(particles);
        let after = ty.freelist_stats().unwrap();
        assert_eq!(ty.freelist_len(), 3);
        assert_eq!(after.recycled - before.recycled, 3);
        assert_eq!(after.overflowed - before.overflowed, 1);
    });
}

#[test]
fn pooled_records_come_back_clean() {
    with_gil(|| {
        let ty = type_object::<Particle>().unwrap();
        drop(create(Particle { mass: 9.5 }).unwrap());
        assert!(ty.freelist_len() > 0);

        let reused = ops::call(&Value::Type(ty), &[Value::Float(1.0)]).unwrap().into_obj().unwrap();
        assert!(reused.header().has_flag(flags::FROM_FREELIST));
        assert!(reused.header().has_flag(flags::CONSTRUCTED));
        assert!(!reused.header().has_flag(flags::FINALIZED));
        assert_eq!(reused.refcount(), 1);
        assert_eq!(ops::getattr(&Value::Obj(reused), "mass").unwrap(), Value::Float(1.0));
    });
}

struct Tracked {
    cleanups: Arc<AtomicUsize>,
    label: String,
    seen: Arc<parking_lot::Mutex<Option<String>>>,
}

impl NativeClass for Tracked {
    const NAME: &'static str = "LifeTracked";

    fn describe(class: &mut ClassBuilder<Self>) {
        class
            .constructor(|_args: &[Value]| -> HostResult<Tracked> {
                Err(HostError::value_error("refusing to build"))
            })
            .cleanup(|this: &mut Tracked| {
                this.cleanups.fetch_add(1, Ordering::SeqCst);
                *this.seen.lock() = Some(this.label.clone());
            });
    }
}

fn tracked(label: &str) -> (ObjRef, Arc<AtomicUsize>, Arc<parking_lot::Mutex<Option<String>>>) {
    let cleanups = Arc::new(AtomicUsize::new(0));
    let seen = Arc::new(parking_lot::Mutex::new(None));
    let obj = create(Tracked {
        cleanups: Arc::clone(&cleanups),
        label: label.to_owned(),
        seen: Arc::clone(&seen),
    })
    .unwrap();
    (obj, cleanups, seen)
}

#[test]
fn cleanup_runs_once_with_fields_intact() {
    with_gil(|| {
        let (obj, cleanups, seen) = tracked("first");
        let extra = obj.clone();
        drop(obj);
        assert_eq!(cleanups.load(Ordering::SeqCst), 0);
        drop(extra);
        assert_eq!(cleanups.load(Ordering::SeqCst), 1);
        assert_eq!(seen.lock().as_deref(), Some("first"));
    });
}

#[test]
fn explicit_finalize_is_not_repeated_by_deallocation() {
    with_gil(|| {
        let (obj, cleanups, _seen) = tracked("twice");
        finalize(&obj).unwrap();
        finalize(&obj).unwrap();
        drop(obj);
        assert_eq!(cleanups.load(Ordering::SeqCst), 1);
    });
}

#[test]
fn cleanup_blocked_by_a_borrow_runs_later() {
    with_gil(|| {
        let (obj, cleanups, _seen) = tracked("held");
        let guard = obj.borrow::<Tracked>().unwrap();
        let err = finalize(&obj).unwrap_err();
        assert_eq!(err.kind, ExceptionKind::RuntimeError);
        assert!(!obj.header().has_flag(flags::FINALIZED));
        drop(guard);

        assert_eq!(cleanups.load(Ordering::SeqCst), 0);
        finalize(&obj).unwrap();
        drop(obj);
        assert_eq!(cleanups.load(Ordering::SeqCst), 1);
    });
}

#[test]
fn failed_constructor_releases_the_record_without_cleanup() {
    with_gil(|| {
        let ty = type_object::<Tracked>().unwrap();
        let live = crate::allocator::stats().live_bytes;
        let err = instantiate(ty, &[]).unwrap_err();
        assert_eq!(err.kind, ExceptionKind::ValueError);
        assert_eq!(crate::allocator::stats().live_bytes, live);
    });
}

#[test]
fn allocation_budget_fails_before_the_constructor() {
    with_gil(|| {
        let ty = type_object::<Particle>().unwrap();
        drain_freelists();
        let previous = allocation_limit();
        set_allocation_limit(Some(crate::allocator::stats().live_bytes));

        let err = instantiate(ty, &[Value::Float(1.0)]).unwrap_err();
        assert_eq!(err.kind, ExceptionKind::MemoryError);
        assert!(err.message.contains("LifeParticle"));

        set_allocation_limit(previous);
        assert!(instantiate(ty, &[Value::Float(1.0)]).is_ok());
    });
}

#[test]
fn fields_constructor_checks_arity_and_types() {
    with_gil(|| {
        let ty = type_object::<Particle>().unwrap();
        let err = instantiate(ty, &[]).unwrap_err();
        assert_eq!(err.kind, ExceptionKind::TypeError);
        assert!(err.message.contains("mass"));
        let err = instantiate(ty, &[Value::str("heavy")]).unwrap_err();
        assert_eq!(err.kind, ExceptionKind::TypeError);
    });
}

struct Leaf {
    id: i64,
}

impl NativeClass for Leaf {
    const NAME: &'static str = "LifeLeaf";

    fn describe(class: &mut ClassBuilder<Self>) {
        class.field("id", field!(Leaf, id));
    }
}

struct Branch {
    leaf: StrongRef<Leaf>,
}

impl NativeClass for Branch {
    const NAME: &'static str = "LifeBranch";

    fn describe(class: &mut ClassBuilder<Self>) {
        class.strong_ref("_leaf", field!(Branch, leaf));
    }
}

#[test]
fn strong_refs_are_released_with_their_holder() {
    with_gil(|| {
        type_object::<Leaf>().unwrap();
        let leaf = create(Leaf { id: 1 }).unwrap();
        let mut strong = StrongRef::new();
        strong.set(&leaf).unwrap();
        let branch = create(Branch { leaf: strong }).unwrap();
        assert_eq!(leaf.refcount(), 2);

        let held = referents(&branch).unwrap();
        assert_eq!(held.len(), 1);
        assert!(held[0].is(&leaf));
        drop(held);

        drop(branch);
        assert_eq!(leaf.refcount(), 1);
    });
}

#[test]
fn create_rejects_a_foreign_payload_type() {
    with_gil(|| {
        let ty = type_object::<Leaf>().unwrap();
        let err = construct(ty, Particle { mass: 0.0 }).unwrap_err();
        assert_eq!(err.kind, ExceptionKind::TypeError);
    });
}

struct Marker {
    id: i64,
}

impl NativeClass for Marker {
    const NAME: &'static str = "LifeMarker";
    const FLAGS: FeatureFlags = FeatureFlags::new().weakref();

    fn describe(class: &mut ClassBuilder<Self>) {
        class.field("id", field!(Marker, id));
    }
}

/// What a cleanup hook could still reach
#[derive(Debug, PartialEq)]
struct Teardown {
    self_upgrades: bool,
    dict_value_alive: bool,
    target_refcount: Option<u32>,
}

struct Witness {
    target: StrongRef<Leaf>,
    me: Option<WeakRef>,
    dict_value: Option<WeakRef>,
    seen: Arc<parking_lot::Mutex<Option<Teardown>>>,
}

impl NativeClass for Witness {
    const NAME: &'static str = "LifeWitness";
    const FLAGS: FeatureFlags = FeatureFlags::new().dict().weakref();

    fn describe(class: &mut ClassBuilder<Self>) {
        class
            .strong_ref("_target", field!(Witness, target))
            .cleanup(|this: &mut Witness| {
                *this.seen.lock() = Some(Teardown {
                    self_upgrades: this.me.as_ref().is_some_and(|weak| weak.upgrade().is_some()),
                    dict_value_alive: this.dict_value.as_ref().is_some_and(|weak| !weak.is_dead()),
                    target_refcount: this.target.get().map(ObjRef::refcount),
                });
            });
    }
}

#[test]
fn cleanup_runs_before_references_are_released() {
    with_gil(|| {
        type_object::<Leaf>().unwrap();
        let leaf = create(Leaf { id: 7 }).unwrap();
        let marker = create(Marker { id: 1 }).unwrap();
        let marker_weak = WeakRef::new(&marker).unwrap();

        let mut target = StrongRef::new();
        target.set(&leaf).unwrap();
        let seen = Arc::new(parking_lot::Mutex::new(None));
        let witness = create(Witness {
            target,
            me: None,
            dict_value: None,
            seen: Arc::clone(&seen),
        })
        .unwrap();
        let outside = WeakRef::new(&witness).unwrap();
        {
            let mut this = witness.borrow_mut::<Witness>().unwrap();
            this.me = Some(WeakRef::new(&witness).unwrap());
            this.dict_value = Some(WeakRef::new(&marker).unwrap());
        }
        ops::setattr(&Value::Obj(witness.clone()), "tag", Value::Obj(marker)).unwrap();
        assert_eq!(leaf.refcount(), 2);

        drop(witness);

        let expected = Teardown {
            self_upgrades: true,
            dict_value_alive: true,
            target_refcount: Some(2),
        };
        assert_eq!(*seen.lock(), Some(expected));
        assert!(outside.is_dead());
        assert!(marker_weak.is_dead());
        assert_eq!(leaf.refcount(), 1);
    });
}

struct Phoenix {
    me: Option<WeakRef>,
    nest: Arc<parking_lot::Mutex<Vec<ObjRef>>>,
    cleanups: Arc<AtomicUsize>,
}

impl NativeClass for Phoenix {
    const NAME: &'static str = "LifePhoenix";
    const FLAGS: FeatureFlags = FeatureFlags::new().weakref();

    fn describe(class: &mut ClassBuilder<Self>) {
        class.cleanup(|this: &mut Phoenix| {
            this.cleanups.fetch_add(1, Ordering::SeqCst);
            if let Some(obj) = this.me.as_ref().and_then(WeakRef::upgrade) {
                this.nest.lock().push(obj);
            }
        });
    }
}

#[test]
fn cleanup_hook_can_resurrect_its_record() {
    with_gil(|| {
        let nest = Arc::new(parking_lot::Mutex::new(Vec::new()));
        let cleanups = Arc::new(AtomicUsize::new(0));
        let phoenix = create(Phoenix {
            me: None,
            nest: Arc::clone(&nest),
            cleanups: Arc::clone(&cleanups),
        })
        .unwrap();
        phoenix.borrow_mut::<Phoenix>().unwrap().me = Some(WeakRef::new(&phoenix).unwrap());
        let weak = WeakRef::new(&phoenix).unwrap();

        let releases = allocator::stats().releases;
        drop(phoenix);
        assert_eq!(cleanups.load(Ordering::SeqCst), 1);
        assert_eq!(allocator::stats().releases, releases);
        assert!(!weak.is_dead());

        let revived = nest.lock().pop().unwrap();
        assert_eq!(revived.refcount(), 1);
        assert!(revived.header().has_flag(flags::FINALIZED));
        assert!(!revived.header().has_flag(flags::DEALLOCATING));

        drop(revived);
        assert_eq!(cleanups.load(Ordering::SeqCst), 1);
        assert_eq!(allocator::stats().releases, releases + 1);
        assert!(weak.is_dead());
        assert!(nest.lock().is_empty());
    });
}
