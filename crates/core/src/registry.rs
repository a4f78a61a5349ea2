//! Process-wide shadow registry
//!
//! Maps object addresses to their (unique) shadow. [`handle_for`] is the
//! entry point for wrapping an object: it reuses the existing shadow,
//! expands it when a more derived class is requested, or creates one,
//! running registered subtype casters first so an object pointed at
//! through a base class still gets shadowed as its most derived known
//! class. [`view_for`] observes without ever creating.

use std::any::TypeId;
use std::collections::HashMap;
use std::sync::{Arc, LazyLock};

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use objshadow_probe::{try_probe, RawObject};
use parking_lot::RwLock;

use crate::handle::{ObjectHandle, ObjectView};
use crate::schema::Shadowed;
use crate::shadow::ObjectShadow;

struct ShadowEntry {
    /// Shadow id, so a stale drop cannot evict a replacement entry
    id: u64,
    shadow: std::sync::Weak<ObjectShadow>,
}

/// Runtime downcast check: returns the object pointer adjusted to the
/// derived class when the object actually is one, `None` otherwise.
pub type SubtypeCaster = fn(RawObject) -> Option<RawObject>;

struct SubtypeFactory {
    caster: SubtypeCaster,
    create: fn(RawObject) -> Option<Arc<ObjectShadow>>,
}

static SHADOWS: LazyLock<DashMap<usize, ShadowEntry>> = LazyLock::new(DashMap::new);
static FACTORIES: LazyLock<RwLock<HashMap<TypeId, Vec<SubtypeFactory>>>> =
    LazyLock::new(Default::default);

/// Registers `Derived` as a discoverable subtype of `Base`.
///
/// When an object is first wrapped as `Base`, each registered caster runs
/// in registration order; the first match decides the shadowed class.
/// Discovery then recurses on the matched class, so chains of
/// registrations find the most derived one.
pub fn register_subtype<Base: Shadowed, Derived: Shadowed>(caster: SubtypeCaster) {
    FACTORIES
        .write()
        .entry(TypeId::of::<Base>())
        .or_default()
        .push(SubtypeFactory {
            caster,
            create: create_with_discovery::<Derived>,
        });
    tracing::debug!(
        base = Base::class_name(),
        derived = Derived::class_name(),
        "subtype registered"
    );
}

fn create_with_discovery<T: Shadowed>(raw: RawObject) -> Option<Arc<ObjectShadow>> {
    let matched = {
        let factories = FACTORIES.read();
        factories.get(&TypeId::of::<T>()).and_then(|list| {
            list.iter()
                .find_map(|f| (f.caster)(raw).map(|derived| (derived, f.create)))
        })
    };
    match matched {
        Some((derived, create)) => create(derived),
        None => ObjectShadow::create_for_schema(T::class_schema(), raw),
    }
}

fn finish<T: Shadowed>(shadow: Arc<ObjectShadow>) -> ObjectHandle<T> {
    let target = T::class_schema();
    if shadow.is_complete(target.type_id()) {
        return ObjectHandle::from_shadow(shadow);
    }
    if shadow.expand_to(target) {
        ObjectHandle::from_shadow(shadow)
    } else {
        tracing::warn!(
            class = target.class_name(),
            addr = shadow.raw().addr(),
            "object is already shadowed as an unrelated class"
        );
        ObjectHandle::null()
    }
}

/// Strong handle for `raw` seen as `T`, creating or expanding the
/// object's shadow as needed.
///
/// Returns the null handle when no probe is installed, the object is not
/// alive, or it is already shadowed as a class unrelated to `T`. At most
/// one shadow ever exists per object; concurrent callers race for
/// creation and the losers reuse the winner's.
pub fn handle_for<T: Shadowed>(raw: RawObject) -> ObjectHandle<T> {
    let Some(probe) = try_probe() else {
        return ObjectHandle::null();
    };
    if !probe.is_valid_object(raw) {
        return ObjectHandle::null();
    }

    // Fast path: already shadowed.
    if let Some(entry) = SHADOWS.get(&raw.addr()) {
        let existing = entry.shadow.upgrade();
        drop(entry);
        if let Some(shadow) = existing {
            return finish(shadow);
        }
    }

    // Create path. The cache is built and filled while the map entry is
    // held, so the entry is only ever published fully initialized and a
    // racing reader can never observe unfilled slots. Slot fills store
    // bare pointers and never look other shadows up, so nothing beyond
    // this shadow's own guard is taken under the entry.
    let created = match SHADOWS.entry(raw.addr()) {
        Entry::Occupied(mut occupied) => match occupied.get().shadow.upgrade() {
            Some(shadow) => {
                drop(occupied);
                shadow
            }
            None => {
                // Stale entry from a dropped shadow at a reused address.
                let Some(shadow) = create_with_discovery::<T>(raw) else {
                    return ObjectHandle::null();
                };
                shadow.initialize();
                occupied.insert(ShadowEntry {
                    id: shadow.id(),
                    shadow: Arc::downgrade(&shadow),
                });
                shadow
            }
        },
        Entry::Vacant(vacant) => {
            let Some(shadow) = create_with_discovery::<T>(raw) else {
                return ObjectHandle::null();
            };
            shadow.initialize();
            vacant.insert(ShadowEntry {
                id: shadow.id(),
                shadow: Arc::downgrade(&shadow),
            });
            shadow
        }
    };
    finish(created)
}

/// Weak view for `raw` seen as `T`.
///
/// Never creates or expands a shadow: the null view is returned unless
/// the object is alive, shadowed, and the shadow already covers `T`.
pub fn view_for<T: Shadowed>(raw: RawObject) -> ObjectView<T> {
    let Some(probe) = try_probe() else {
        return ObjectView::null();
    };
    if !probe.is_valid_object(raw) {
        return ObjectView::null();
    }
    let Some(entry) = SHADOWS.get(&raw.addr()) else {
        return ObjectView::null();
    };
    let shadow = entry.shadow.upgrade();
    drop(entry);
    match shadow {
        Some(shadow) if shadow.is_complete(TypeId::of::<T>()) => {
            ObjectHandle::<T>::from_shadow(shadow).downgrade()
        }
        _ => ObjectView::null(),
    }
}

/// Whether `raw` currently has a live shadow.
pub fn is_shadowed(raw: RawObject) -> bool {
    SHADOWS
        .get(&raw.addr())
        .is_some_and(|entry| entry.shadow.strong_count() > 0)
}

/// Removes the registry entry for `addr`, but only if it still belongs to
/// shadow `id`. Called from the shadow's drop.
pub(crate) fn forget(addr: usize, id: u64) {
    SHADOWS.remove_if(&addr, |_, entry| entry.id == id);
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use objshadow_probe::RawObject;

    use super::*;
    use crate::schema::PropertyValue;
    use crate::testutil::{
        install_probe, mark_smart, register_smart_discovery, unmark_smart, Chain, Coupler, Gadget,
        InPlug, OutPlug, SmartGadget, Ticker, Widget,
    };

    fn same_shadow<A: Shadowed, B: Shadowed>(a: &ObjectHandle<A>, b: &ObjectHandle<B>) -> bool {
        match (a.shadow(), b.shadow()) {
            (Some(a), Some(b)) => Arc::ptr_eq(a, b),
            _ => false,
        }
    }

    #[test]
    fn wrap_expand_and_teardown_lifecycle() {
        let probe = install_probe();
        let gadget = Box::new(SmartGadget::sample());
        let raw = RawObject::from_ref(&*gadget);
        probe.track(raw, probe.adopt_current_thread());

        // Views never create a shadow.
        assert!(view_for::<Widget>(raw).upgrade().is_null());
        assert!(!is_shadowed(raw));

        // First wrap, as the base class only.
        let base = handle_for::<Widget>(raw);
        assert!(base.is_valid());
        assert!(is_shadowed(raw));
        assert_eq!(base.get("size").and_then(|v| v.as_int()), Some(4));
        assert_eq!(
            base.get("label").and_then(|v| v.as_text().map(str::to_owned)),
            Some("probe".to_owned())
        );
        assert!(base.cast::<SmartGadget>().is_none());

        // Mutate the live object, then expand. Values cached before the
        // expansion must not be recomputed by it.
        unsafe { raw.as_mut::<SmartGadget>() }.gadget.widget.size = 7;
        let derived = handle_for::<SmartGadget>(raw);
        assert!(same_shadow(&base, &derived));
        assert_eq!(derived.get("size").and_then(|v| v.as_int()), Some(4));
        assert_eq!(derived.get("area").and_then(|v| v.as_int()), Some(16));
        assert_eq!(derived.get("firmware").and_then(|v| v.as_uint()), Some(1));
        // Name precedence: the derived class shadows Widget's "label".
        assert_eq!(
            derived
                .get("label")
                .and_then(|v| v.as_text().map(str::to_owned)),
            Some("gadget:probe".to_owned())
        );
        // The old handle keeps resolving from its own class downwards.
        assert_eq!(
            base.get("label").and_then(|v| v.as_text().map(str::to_owned)),
            Some("probe".to_owned())
        );
        // The base handle now casts up.
        assert!(base.cast::<SmartGadget>().is_some());

        // Views now resolve and compare equal to the handles.
        let view = view_for::<Widget>(raw);
        assert!(view.is_valid());
        assert_eq!(view.upgrade(), base);
        assert!(view.cast::<SmartGadget>().is_valid());

        // Dropping the last strong handle tears everything down.
        let upcast = base.cast::<SmartGadget>();
        drop(base);
        drop(derived);
        drop(upcast);
        assert!(!is_shadowed(raw));
        assert!(!view.is_valid());
        assert!(view.upgrade().is_null());
        assert_eq!(probe.hub().drop_object(raw), 0);

        probe.retire(raw);
    }

    #[test]
    fn wrapping_an_untracked_object_yields_null() {
        install_probe();
        let widget = Widget::sample();
        let raw = RawObject::from_ref(&widget);
        assert!(handle_for::<Widget>(raw).is_null());
        assert!(view_for::<Widget>(raw).upgrade().is_null());
    }

    #[test]
    fn discovery_shadows_the_most_derived_class() {
        let probe = install_probe();
        register_smart_discovery();

        let gadget = Box::new(SmartGadget::sample());
        let raw = RawObject::from_ref(&*gadget);
        probe.track(raw, probe.adopt_current_thread());
        mark_smart(raw);

        let handle = handle_for::<Gadget>(raw);
        assert!(handle.is_valid());
        let smart = handle.cast::<SmartGadget>().expect("discovered as SmartGadget");
        assert_eq!(smart.get("firmware").and_then(|v| v.as_uint()), Some(1));

        unmark_smart(raw);
        drop(handle);
        drop(smart);
        probe.retire(raw);
    }

    #[test]
    fn unrelated_class_request_leaves_the_shadow_alone() {
        let probe = install_probe();
        let widget = Box::new(Widget::sample());
        let raw = RawObject::from_ref(&*widget);
        probe.track(raw, probe.adopt_current_thread());

        let handle = handle_for::<Widget>(raw);
        assert!(handle.is_valid());
        // Ticker is no relative of Widget; the shadow must stay intact.
        assert!(handle_for::<Ticker>(raw).is_null());
        assert_eq!(handle.get("size").and_then(|v| v.as_int()), Some(4));

        drop(handle);
        probe.retire(raw);
    }

    #[test]
    fn concurrent_wrapping_yields_one_shadow() {
        let probe = install_probe();
        let widget = Box::new(Widget::sample());
        let raw = RawObject::from_ref(&*widget);
        // Free-threaded, so any thread may create the shadow.
        probe.track_free(raw);

        let handles: Vec<ObjectHandle<Widget>> = std::thread::scope(|scope| {
            let workers: Vec<_> = (0..8)
                .map(|_| scope.spawn(move || handle_for::<Widget>(raw)))
                .collect();
            workers.into_iter().map(|w| w.join().unwrap()).collect()
        });

        assert!(handles.iter().all(|h| h.is_valid()));
        assert!(handles
            .windows(2)
            .all(|pair| same_shadow(&pair[0], &pair[1])));

        drop(handles);
        assert!(!is_shadowed(raw));
        probe.retire(raw);
    }

    #[test]
    fn pointer_properties_wrap_their_targets() {
        let probe = install_probe();
        let ctx = probe.adopt_current_thread();

        let partner = Box::new(Widget::sample());
        let partner_raw = RawObject::from_ref(&*partner);
        probe.track(partner_raw, ctx);
        // Non-owning targets must already be shadowed to be visible.
        let partner_handle = handle_for::<Widget>(partner_raw);

        let alien = Box::new(Ticker { count: 1 });
        let alien_raw = RawObject::from_ref(&*alien);
        probe.track(alien_raw, ctx);

        let rig = Box::new(crate::testutil::Rig {
            owned: Box::new(Widget::sample()),
            partner: &*partner,
            alien: &*alien,
        });
        let rig_raw = RawObject::from_ref(&*rig);
        probe.track(RawObject::from_ref(&*rig.owned), ctx);
        probe.track(rig_raw, ctx);

        let handle = handle_for::<crate::testutil::Rig>(rig_raw);

        // Owning pointer: a strong handle, created on demand.
        let owned = handle.get("owned").and_then(|v| v.as_handle().cloned());
        let owned = owned.expect("owning pointer wrapped");
        let owned_widget = owned.typed::<Widget>().expect("typed as Widget");
        assert_eq!(owned_widget.get("size").and_then(|v| v.as_int()), Some(4));

        // Non-owning pointer: a weak view onto the existing shadow.
        let view = handle.get("partner").and_then(|v| v.as_view().cloned());
        let view = view.expect("non-owning pointer wrapped");
        assert_eq!(view.typed::<Widget>().upgrade(), partner_handle);

        // Foreign pointer: wrapped per read, so it starts out null and
        // resolves once the target gains a shadow.
        let alien_view = handle.get("alien").and_then(|v| v.as_view().cloned());
        assert!(alien_view.expect("foreign wrapped").is_null());
        let alien_handle = handle_for::<Ticker>(alien_raw);
        let alien_view = handle.get("alien").and_then(|v| v.as_view().cloned());
        assert!(!alien_view.expect("foreign wrapped").is_null());

        drop(alien_handle);
        drop(partner_handle);
        drop(owned_widget);
        drop(owned);
        drop(handle);
        for target in [rig_raw, partner_raw, alien_raw] {
            probe.retire(target);
        }
        probe.retire(RawObject::from_ref(&*rig.owned));
    }

    #[test]
    fn self_referential_pointer_wraps_without_reentry() {
        let probe = install_probe();
        let mut node = Box::new(Chain {
            next: std::ptr::null(),
        });
        let addr: *const Chain = &*node;
        node.next = addr;
        let raw = RawObject::from_ref(&*node);
        probe.track(raw, probe.adopt_current_thread());

        // Filling the cache must not re-enter the registry for the
        // object's own address; the wrap happens at read time instead.
        let handle = handle_for::<Chain>(raw);
        assert!(handle.is_valid());
        let view = handle.get("next").and_then(|v| v.as_view().cloned());
        let view = view.expect("pointer wrapped");
        assert_eq!(view.addr(), raw.addr());
        assert_eq!(view.typed::<Chain>().upgrade(), handle);

        drop(view);
        drop(handle);
        probe.retire(raw);
    }

    #[test]
    fn racing_first_wrap_never_exposes_unfilled_slots() {
        let probe = install_probe();
        let widget = Box::new(Widget::sample());
        let raw = RawObject::from_ref(&*widget);
        probe.track_free(raw);

        // Losers of the creation race must only ever see a shadow whose
        // slots are already filled.
        std::thread::scope(|scope| {
            for _ in 0..8 {
                scope.spawn(move || {
                    let handle = handle_for::<Widget>(raw);
                    assert_eq!(handle.get("size").and_then(|v| v.as_int()), Some(4));
                });
            }
        });

        assert!(!is_shadowed(raw));
        probe.retire(raw);
    }

    #[test]
    fn diamond_expansion_leaves_reused_path_alone() {
        let probe = install_probe();
        let coupler = Box::new(Coupler::sample());
        let raw = RawObject::from_ref(&*coupler);
        probe.track(raw, probe.adopt_current_thread());

        let narrow = handle_for::<InPlug>(raw);
        assert_eq!(narrow.get("lanes").and_then(|v| v.as_int()), Some(1));

        unsafe { raw.as_mut::<Coupler>() }.input.port.lanes = 6;
        unsafe { raw.as_mut::<Coupler>() }.output.port.lanes = 6;
        let wide = handle_for::<Coupler>(raw);
        assert!(same_shadow(&narrow, &wide));

        // The input path was cached before the expansion and keeps its
        // value; the output path is new and fetches the live one.
        assert_eq!(wide.get("lanes").and_then(|v| v.as_int()), Some(1));
        let out = wide.cast::<OutPlug>().expect("covers OutPlug");
        assert_eq!(out.get("lanes").and_then(|v| v.as_int()), Some(6));

        // Each Port node is subscribed exactly once: the reused path at
        // creation, the new one at expansion.
        assert_eq!(probe.hub().emit(raw, "lanesChanged"), 1);
        let out_raw = RawObject::from_ref(&coupler.output.port);
        assert_eq!(probe.hub().emit(out_raw, "lanesChanged"), 1);

        drop(out);
        drop(wide);
        drop(narrow);
        probe.retire(raw);
    }

    #[test]
    fn null_value_pointer_properties_stay_null() {
        let probe = install_probe();
        let ctx = probe.adopt_current_thread();
        let rig = Box::new(crate::testutil::Rig {
            owned: Box::new(Widget::sample()),
            partner: std::ptr::null(),
            alien: std::ptr::null(),
        });
        let rig_raw = RawObject::from_ref(&*rig);
        probe.track(RawObject::from_ref(&*rig.owned), ctx);
        probe.track(rig_raw, ctx);

        let handle = handle_for::<crate::testutil::Rig>(rig_raw);
        match handle.get("partner") {
            Some(PropertyValue::View(view)) => assert!(view.is_null()),
            other => panic!("expected a view, got {other:?}"),
        }
        match handle.get("alien") {
            Some(PropertyValue::View(view)) => assert!(view.is_null()),
            other => panic!("expected a view, got {other:?}"),
        }

        drop(handle);
        probe.retire(rig_raw);
        probe.retire(RawObject::from_ref(&*rig.owned));
    }
}
