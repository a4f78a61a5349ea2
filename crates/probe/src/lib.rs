//! objshadow probe - host process integration
//!
//! This crate handles:
//! - Type-erased identity of host-owned objects ([`RawObject`], [`ObjectId`])
//! - The process-wide [`Probe`] that answers liveness, context affinity and
//!   cross-context dispatch questions
//! - Change-notification plumbing ([`SignalBroker`], [`SignalHub`])
//! - A ready-made in-process probe ([`LocalProbe`])
//!
//! # Architecture
//!
//! The host installs exactly one probe and one signal broker via
//! [`install`] during startup; the shadow layer reads them back through
//! [`probe()`] and [`broker()`]. Hosts embedded in a runtime with its own
//! notion of threads and object lifetimes implement the traits themselves;
//! everything else uses [`LocalProbe::global`].

pub mod error;
pub mod globals;
pub mod local;
pub mod logging;
pub mod object;
pub mod object_id;
pub mod signals;

pub use error::ProbeError;
pub use globals::{broker, install, is_installed, probe, try_broker, try_probe, Probe};
pub use local::LocalProbe;
pub use object::{ContextId, RawObject, Task};
pub use object_id::ObjectId;
pub use signals::{SignalBroker, SignalCallback, SignalHub, SubscriptionKey};
