//! Change-notification plumbing
//!
//! Objects announce state changes by name ("signals"). The shadow layer
//! subscribes a callback per cached property that declares a notification,
//! and the host emits signals when the underlying state changes.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use slotmap::SlotMap;

use crate::object::RawObject;

slotmap::new_key_type! {
    /// Key identifying a registered signal subscription
    pub struct SubscriptionKey;
}

/// Callback invoked when a subscribed signal fires.
///
/// Shared so the hub can release its lock before invoking; callbacks may
/// re-enter the broker (for example to add subscriptions).
pub type SignalCallback = Arc<dyn Fn() + Send + Sync + 'static>;

/// Registration surface for change notifications.
pub trait SignalBroker: Send + Sync {
    /// Subscribes `callback` to `signal` on `obj`.
    fn subscribe(&self, obj: RawObject, signal: &str, callback: SignalCallback)
        -> SubscriptionKey;

    /// Removes a subscription. Returns `false` if the key was already gone.
    fn unsubscribe(&self, key: SubscriptionKey) -> bool;
}

struct Subscription {
    addr: usize,
    signal: String,
    callback: SignalCallback,
}

#[derive(Default)]
struct HubInner {
    subscriptions: SlotMap<SubscriptionKey, Subscription>,
    /// Object address -> subscription keys, for emit and bulk removal
    by_object: HashMap<usize, Vec<SubscriptionKey>>,
}

/// In-process signal broker.
///
/// Hosts with a native notification system implement [`SignalBroker`]
/// directly; hosts without one can route their change events through a
/// `SignalHub` and call [`SignalHub::emit`].
#[derive(Default)]
pub struct SignalHub {
    inner: RwLock<HubInner>,
}

impl SignalHub {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fires `signal` on `obj`, invoking every matching callback on the
    /// calling thread. Returns the number of callbacks invoked.
    ///
    /// Callbacks run with no hub lock held, so they may subscribe or
    /// unsubscribe freely.
    pub fn emit(&self, obj: RawObject, signal: &str) -> usize {
        let matched: Vec<SignalCallback> = {
            let inner = self.inner.read();
            let Some(keys) = inner.by_object.get(&obj.addr()) else {
                return 0;
            };
            keys.iter()
                .filter_map(|key| inner.subscriptions.get(*key))
                .filter(|sub| sub.signal == signal)
                .map(|sub| Arc::clone(&sub.callback))
                .collect()
        };
        for callback in &matched {
            callback();
        }
        matched.len()
    }

    /// Drops every subscription registered on `obj`. Returns the number
    /// removed.
    pub fn drop_object(&self, obj: RawObject) -> usize {
        let mut inner = self.inner.write();
        let Some(keys) = inner.by_object.remove(&obj.addr()) else {
            return 0;
        };
        let mut removed = 0;
        for key in keys {
            if inner.subscriptions.remove(key).is_some() {
                removed += 1;
            }
        }
        removed
    }

    /// Number of live subscriptions, for diagnostics.
    pub fn subscription_count(&self) -> usize {
        self.inner.read().subscriptions.len()
    }
}

impl SignalBroker for SignalHub {
    fn subscribe(
        &self,
        obj: RawObject,
        signal: &str,
        callback: SignalCallback,
    ) -> SubscriptionKey {
        let mut inner = self.inner.write();
        let key = inner.subscriptions.insert(Subscription {
            addr: obj.addr(),
            signal: signal.to_owned(),
            callback,
        });
        inner.by_object.entry(obj.addr()).or_default().push(key);
        tracing::trace!(addr = obj.addr(), signal, "signal subscription added");
        key
    }

    fn unsubscribe(&self, key: SubscriptionKey) -> bool {
        let mut inner = self.inner.write();
        let Some(sub) = inner.subscriptions.remove(key) else {
            return false;
        };
        if let Some(keys) = inner.by_object.get_mut(&sub.addr) {
            keys.retain(|k| *k != key);
            if keys.is_empty() {
                inner.by_object.remove(&sub.addr);
            }
        }
        true
    }
}
