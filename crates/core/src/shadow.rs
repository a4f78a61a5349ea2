//! Per-object control block
//!
//! An [`ObjectShadow`] is the one-per-object anchor everything else hangs
//! off: the property cache tree, the change subscriptions, and the per-
//! object guard that serializes access to the live object. Strong handles
//! keep the shadow alive; when the last one drops, the shadow tears its
//! subscriptions down and removes itself from the registry.

use std::any::TypeId;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use objshadow_probe::{try_broker, try_probe, RawObject, SubscriptionKey, Task};
use parking_lot::Mutex;

use crate::cache::PropertyCache;
use crate::config;
use crate::error::ShadowError;
use crate::registry;
use crate::schema::{ClassSchema, PropertyValue};

static NEXT_SHADOW_ID: AtomicU64 = AtomicU64::new(1);

/// Whether property values of `schema` instances are cached.
fn caching_enabled(schema: &ClassSchema) -> bool {
    !schema.caching_disabled() && config::get().cache_properties
}

/// Control block shared by all handles and views of one live object.
pub struct ObjectShadow {
    /// Unique per shadow, so a stale drop cannot evict a replacement's
    /// registry entry
    id: u64,
    /// The object as it was first registered (its most derived known class)
    raw: RawObject,
    /// Cache tree; the lock doubles as the per-object access guard
    cache: Mutex<PropertyCache>,
    subscriptions: Mutex<Vec<SubscriptionKey>>,
}

impl ObjectShadow {
    /// Creates an uninitialized shadow for `raw` seen as `schema`.
    ///
    /// Returns `None` when no probe is installed or the object is not
    /// alive. Must be called from the object's own execution context.
    ///
    /// # Panics
    /// Panics when called from a context other than the object's.
    pub(crate) fn create_for_schema(
        schema: &'static ClassSchema,
        raw: RawObject,
    ) -> Option<Arc<Self>> {
        let probe = try_probe()?;
        if !probe.is_valid_object(raw) {
            return None;
        }
        if let Some(owner) = probe.object_context(raw) {
            assert!(
                owner == probe.current_context(),
                "shadow for {} created outside the object's execution context",
                schema.class_name()
            );
        }

        let cache = PropertyCache::new_unfilled(schema, raw);
        Some(Arc::new(Self {
            id: NEXT_SHADOW_ID.fetch_add(1, Ordering::Relaxed),
            raw,
            cache: Mutex::new(cache),
            subscriptions: Mutex::new(Vec::new()),
        }))
    }

    /// Fills the cache and sets up change subscriptions.
    ///
    /// The registry runs this before publishing the shadow, so a shadow
    /// another caller can find is always fully initialized. Slot fills
    /// only ever store bare pointers and never consult other shadows.
    pub(crate) fn initialize(self: &Arc<Self>) {
        let mut pending = Vec::new();
        {
            let mut cache = self.cache.lock();
            if caching_enabled(cache.schema()) {
                collect_notify_slots(&cache, false, &mut pending);
                cache.update();
            } else {
                cache.clear_fresh();
            }
        }
        self.subscribe_pending(pending);
    }

    pub(crate) fn id(&self) -> u64 {
        self.id
    }

    /// The object pointer this shadow was registered under.
    pub fn raw(&self) -> RawObject {
        self.raw
    }

    /// Whether the cache covers `ty`.
    pub fn is_complete(&self, ty: TypeId) -> bool {
        self.cache.lock().find(ty).is_some()
    }

    /// Runs `f` against the cache node for `ty` while holding the
    /// per-object guard.
    pub fn with_cache<R>(&self, ty: TypeId, f: impl FnOnce(&PropertyCache) -> R) -> Option<R> {
        let cache = self.cache.lock();
        cache.find(ty).map(f)
    }

    /// The object pointer adjusted to class `ty`, if the cache covers it.
    pub fn object_as(&self, ty: TypeId) -> Option<RawObject> {
        self.with_cache(ty, PropertyCache::raw)
    }

    /// Grows the cache to cover `target`, keeping already cached values
    /// for classes it covered before. Returns `false` when `target` is
    /// unrelated to the shadowed class.
    pub(crate) fn expand_to(self: &Arc<Self>, target: &'static ClassSchema) -> bool {
        let mut pending = Vec::new();
        {
            let mut cache = self.cache.lock();
            if cache.find(target.type_id()).is_some() {
                return true;
            }
            if !target.includes(cache.schema().type_id()) {
                return false;
            }
            // Expansion fetches live values, so it is bound to the
            // object's context just like creation.
            if let Some(probe) = try_probe() {
                if let Some(owner) = probe.object_context(self.raw) {
                    assert!(
                        owner == probe.current_context(),
                        "shadow for {} expanded outside the object's execution context",
                        target.class_name()
                    );
                }
            }
            let existing = std::mem::replace(&mut *cache, PropertyCache::detached(self.raw));
            *cache = PropertyCache::expand(target, self.raw, existing);
            if caching_enabled(target) {
                // Fresh marks single out the nodes this expansion added;
                // reused nodes keep their values and their subscriptions.
                collect_notify_slots(&cache, true, &mut pending);
                cache.update_fresh();
            } else {
                cache.clear_fresh();
            }
        }
        self.subscribe_pending(pending);
        tracing::debug!(class = target.class_name(), "shadow expanded");
        true
    }

    /// Reads the property `name`, resolved from the node for `start` down
    /// its base chain.
    pub(crate) fn get_named(
        &self,
        start: TypeId,
        name: &str,
    ) -> Result<PropertyValue, ShadowError> {
        let (descriptor, value) = {
            let cache = self.cache.lock();
            let node = cache
                .find(start)
                .ok_or(ShadowError::IncompleteShadow(cache.schema().class_name()))?;
            let (owner, index) = node
                .find_named(name)
                .ok_or_else(|| ShadowError::NoSuchProperty(name.to_owned()))?;
            let schema = owner.schema();
            let descriptor = &schema.properties()[index];
            let value = if caching_enabled(schema) {
                owner.slot(index).clone()
            } else {
                // The cache lock still serializes access to the live object.
                descriptor.fetch_live(owner.raw())
            };
            (descriptor, value)
        };

        // Pointer properties are stored bare and wrapped per read: the
        // wrap takes other shadows' guards (and creates shadows, for
        // owning pointers), so it must not run under this object's guard.
        Ok(match descriptor.wrap_value(&value) {
            Some(wrapped) => wrapped,
            None => value,
        })
    }

    /// Writes the property `name` through to the live object, updating the
    /// cached slot first so readers never observe the pre-write value
    /// after the call returns.
    pub(crate) fn set_named(
        &self,
        start: TypeId,
        name: &str,
        value: PropertyValue,
    ) -> Result<(), ShadowError> {
        let mut cache = self.cache.lock();
        let root_class = cache.schema().class_name();
        let node = cache
            .find_mut(start)
            .ok_or(ShadowError::IncompleteShadow(root_class))?;
        let (owner, index) = node
            .find_named_mut(name)
            .ok_or_else(|| ShadowError::NoSuchProperty(name.to_owned()))?;
        let schema = owner.schema();
        let descriptor = &schema.properties()[index];
        if !descriptor.is_writable() {
            return Err(ShadowError::NotWritable(name.to_owned()));
        }

        let raw = owner.raw();
        descriptor.write_live(raw, &value)?;
        if caching_enabled(schema) {
            owner.set_slot(index, value);
        }
        // TODO: optionally defer the live write to the object's context
        // once a batching policy exists; today writes require the caller
        // to be allowed to touch the object directly.
        Ok(())
    }

    /// Re-fetches every cached slot of the node for `ty`. Returns `false`
    /// when the cache does not cover `ty`.
    pub(crate) fn refresh_type(&self, ty: TypeId) -> bool {
        let mut cache = self.cache.lock();
        match cache.find_mut(ty) {
            Some(node) => {
                node.update();
                true
            }
            None => false,
        }
    }

    /// Runs `f` with the object, marshalled to the object's execution
    /// context, and blocks for the result.
    ///
    /// Runs inline when the object is free-threaded or already owned by
    /// the calling context. Returns `None` when the object is gone or the
    /// task could not be delivered.
    pub(crate) fn invoke_sync<R>(
        &self,
        view: RawObject,
        f: impl FnOnce(RawObject) -> R + Send + 'static,
    ) -> Option<R>
    where
        R: Send + 'static,
    {
        let probe = try_probe()?;
        if !probe.is_valid_object(self.raw) {
            return None;
        }
        match probe.object_context(self.raw) {
            Some(owner) if owner != probe.current_context() => {
                let root = self.raw;
                let (sender, receiver) = crossbeam_channel::bounded(1);
                let task: Task = Box::new(move || {
                    // Revalidate on the owning context; the object may have
                    // died while the task sat in the queue.
                    let alive = try_probe().is_some_and(|p| p.is_valid_object(root));
                    if alive {
                        let _ = sender.send(f(view));
                    }
                });
                if !probe.dispatch(owner, task) {
                    return None;
                }
                receiver.recv().ok()
            }
            _ => Some(f(view)),
        }
    }

    /// Fire-and-forget variant of [`invoke_sync`](Self::invoke_sync).
    pub(crate) fn invoke_async(&self, view: RawObject, f: impl FnOnce(RawObject) + Send + 'static) {
        let Some(probe) = try_probe() else {
            return;
        };
        if !probe.is_valid_object(self.raw) {
            return;
        }
        match probe.object_context(self.raw) {
            Some(owner) if owner != probe.current_context() => {
                let root = self.raw;
                let task: Task = Box::new(move || {
                    let alive = try_probe().is_some_and(|p| p.is_valid_object(root));
                    if alive {
                        f(view);
                    }
                });
                if !probe.dispatch(owner, task) {
                    tracing::warn!("dropping async invocation, context unavailable");
                }
            }
            _ => f(view),
        }
    }

    /// Subscribes slot-refresh callbacks for the collected notify slots.
    ///
    /// Runs without the cache lock held: brokers may fire callbacks (which
    /// take the lock) during registration.
    fn subscribe_pending(self: &Arc<Self>, pending: Vec<NotifySlot>) {
        if pending.is_empty() {
            return;
        }
        let Some(broker) = try_broker() else {
            return;
        };

        let mut keys = Vec::with_capacity(pending.len());
        for (ty, node_raw, index, signal) in pending {
            let weak: Weak<ObjectShadow> = Arc::downgrade(self);
            let key = broker.subscribe(
                node_raw,
                signal,
                Arc::new(move || {
                    if let Some(shadow) = weak.upgrade() {
                        let mut cache = shadow.cache.lock();
                        if let Some(node) = cache.find_mut(ty) {
                            node.refresh_slot(index);
                        }
                    }
                }),
            );
            keys.push(key);
        }
        self.subscriptions.lock().extend(keys);
    }
}

/// (class, node pointer, slot, signal) of a property awaiting subscription.
type NotifySlot = (TypeId, RawObject, usize, &'static str);

/// Collects the notify slots of the tree, restricted to fresh nodes when
/// `fresh_only` is set. Must run before the fresh marks are cleared.
fn collect_notify_slots(node: &PropertyCache, fresh_only: bool, out: &mut Vec<NotifySlot>) {
    if !fresh_only || node.is_fresh() {
        for (index, descriptor) in node.schema().properties().iter().enumerate() {
            if let Some(signal) = descriptor.notify() {
                out.push((node.schema().type_id(), node.raw(), index, signal));
            }
        }
    }
    for base in node.base_nodes() {
        collect_notify_slots(base, fresh_only, out);
    }
}

impl Drop for ObjectShadow {
    fn drop(&mut self) {
        let keys = std::mem::take(self.subscriptions.get_mut());
        if let Some(broker) = try_broker() {
            for key in keys {
                broker.unsubscribe(key);
            }
        }
        registry::forget(self.raw.addr(), self.id);
        tracing::trace!(addr = self.raw.addr(), id = self.id, "shadow dropped");
    }
}
