//! In-process probe implementation
//!
//! [`LocalProbe`] is the batteries-included [`Probe`]: threads register as
//! execution contexts, tracked objects are pinned to a context (or left
//! free-threaded), and cross-context work is marshalled over bounded
//! per-context task queues drained on the owning thread.

use std::cell::Cell;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::LazyLock;

use crossbeam_channel::{Receiver, Sender, TrySendError};
use parking_lot::RwLock;

use crate::globals::{self, Probe};
use crate::object::{ContextId, RawObject, Task};
use crate::signals::{SignalBroker, SignalCallback, SignalHub, SubscriptionKey};

/// Default capacity of each per-context task queue
const DEFAULT_QUEUE_CAPACITY: usize = 1024;

/// Maximum tasks executed per `run_pending` call, so a context that keeps
/// feeding itself cannot starve its caller
const MAX_TASKS_PER_DRAIN: usize = 1024;

thread_local! {
    /// Context the current thread registered as
    static CURRENT: Cell<Option<ContextId>> = const { Cell::new(None) };
}

struct ContextQueue {
    sender: Sender<Task>,
    receiver: Receiver<Task>,
}

/// Task-queue based probe for hosts without their own event loop plumbing.
pub struct LocalProbe {
    queues: RwLock<HashMap<ContextId, ContextQueue>>,
    /// Tracked object address -> owning context (`None` = free-threaded)
    objects: RwLock<HashMap<usize, Option<ContextId>>>,
    next_context: AtomicU64,
    hub: SignalHub,
    queue_capacity: usize,
}

static GLOBAL: LazyLock<LocalProbe> = LazyLock::new(LocalProbe::new);

impl Default for LocalProbe {
    fn default() -> Self {
        Self::new()
    }
}

impl LocalProbe {
    pub fn new() -> Self {
        Self::with_queue_capacity(DEFAULT_QUEUE_CAPACITY)
    }

    pub fn with_queue_capacity(capacity: usize) -> Self {
        Self {
            queues: RwLock::new(HashMap::new()),
            objects: RwLock::new(HashMap::new()),
            next_context: AtomicU64::new(1),
            hub: SignalHub::new(),
            queue_capacity: capacity,
        }
    }

    /// The process-wide probe, installed into the globals on first use.
    pub fn global() -> &'static LocalProbe {
        let probe = &*GLOBAL;
        // Lost races just mean another caller already installed it.
        let _ = globals::install(probe, probe);
        probe
    }

    fn register_context(&self) -> ContextId {
        let id = ContextId(self.next_context.fetch_add(1, Ordering::Relaxed));
        let (sender, receiver) = crossbeam_channel::bounded(self.queue_capacity);
        self.queues
            .write()
            .insert(id, ContextQueue { sender, receiver });
        id
    }

    /// Registers the calling thread as an execution context, or returns the
    /// context it already registered as.
    pub fn adopt_current_thread(&self) -> ContextId {
        if let Some(id) = CURRENT.get() {
            return id;
        }
        let id = self.register_context();
        CURRENT.set(Some(id));
        tracing::debug!(%id, "thread adopted as execution context");
        id
    }

    /// Spawns a dedicated pump thread that registers as a new context and
    /// executes queued tasks until the context is shut down.
    pub fn spawn_context(&self, name: &str) -> std::io::Result<ContextId> {
        let id = self.register_context();
        let receiver = {
            let queues = self.queues.read();
            // Just inserted above and never removed concurrently by us.
            match queues.get(&id) {
                Some(queue) => queue.receiver.clone(),
                None => unreachable!("context queue vanished during spawn"),
            }
        };
        std::thread::Builder::new()
            .name(format!("objshadow-{name}"))
            .spawn(move || {
                CURRENT.set(Some(id));
                tracing::debug!(%id, "context pump started");
                for task in receiver.iter() {
                    task();
                }
                tracing::debug!(%id, "context pump stopped");
            })?;
        Ok(id)
    }

    /// Removes a context. The pump thread (if any) exits after draining;
    /// later dispatches to the context fail.
    pub fn shutdown_context(&self, ctx: ContextId) -> bool {
        self.queues.write().remove(&ctx).is_some()
    }

    /// Marks `obj` as a live object owned by `ctx`.
    pub fn track(&self, obj: RawObject, ctx: ContextId) {
        self.objects.write().insert(obj.addr(), Some(ctx));
    }

    /// Marks `obj` as a live object usable from any context.
    pub fn track_free(&self, obj: RawObject) {
        self.objects.write().insert(obj.addr(), None);
    }

    /// Marks `obj` as destroyed. Returns `false` if it was not tracked.
    pub fn retire(&self, obj: RawObject) -> bool {
        let removed = self.objects.write().remove(&obj.addr()).is_some();
        if removed {
            tracing::trace!(addr = obj.addr(), "object retired");
        }
        removed
    }

    /// Runs tasks queued for the calling thread's context. Returns the
    /// number executed.
    pub fn run_pending(&self) -> usize {
        let Some(ctx) = CURRENT.get() else {
            return 0;
        };
        let receiver = {
            let queues = self.queues.read();
            match queues.get(&ctx) {
                Some(queue) => queue.receiver.clone(),
                None => return 0,
            }
        };
        let mut executed = 0;
        while executed < MAX_TASKS_PER_DRAIN {
            match receiver.try_recv() {
                Ok(task) => {
                    task();
                    executed += 1;
                }
                Err(_) => break,
            }
        }
        executed
    }

    /// Fires `signal` on `obj`, marshalled to the owning context when the
    /// caller is on a different one.
    pub fn emit(&'static self, obj: RawObject, signal: &str) {
        let owner = self.objects.read().get(&obj.addr()).copied().flatten();
        match owner {
            Some(ctx) if CURRENT.get() != Some(ctx) => {
                let signal = signal.to_owned();
                let task: Task = Box::new(move || {
                    self.hub.emit(obj, &signal);
                });
                if !self.dispatch(ctx, task) {
                    tracing::warn!(%ctx, "dropping signal emission, context unavailable");
                }
            }
            _ => {
                self.hub.emit(obj, signal);
            }
        }
    }

    pub fn hub(&self) -> &SignalHub {
        &self.hub
    }
}

impl Probe for LocalProbe {
    fn is_valid_object(&self, obj: RawObject) -> bool {
        self.objects.read().contains_key(&obj.addr())
    }

    fn current_context(&self) -> ContextId {
        self.adopt_current_thread()
    }

    fn object_context(&self, obj: RawObject) -> Option<ContextId> {
        self.objects.read().get(&obj.addr()).copied().flatten()
    }

    fn dispatch(&self, ctx: ContextId, task: Task) -> bool {
        let queues = self.queues.read();
        let Some(queue) = queues.get(&ctx) else {
            tracing::warn!(%ctx, "dispatch to unknown context");
            return false;
        };
        match queue.sender.try_send(task) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                tracing::warn!(%ctx, "task queue full, dropping task");
                false
            }
            Err(TrySendError::Disconnected(_)) => false,
        }
    }
}

impl SignalBroker for LocalProbe {
    fn subscribe(
        &self,
        obj: RawObject,
        signal: &str,
        callback: SignalCallback,
    ) -> SubscriptionKey {
        self.hub.subscribe(obj, signal, callback)
    }

    fn unsubscribe(&self, key: SubscriptionKey) -> bool {
        self.hub.unsubscribe(key)
    }
}
