//! objshadow core - cached, concurrency-aware shadows of live objects
//!
//! The shadow layer wraps objects owned and mutated by a host process into
//! safe, cheap-to-copy references. Each object gets at most one
//! [`ObjectShadow`] holding a property cache and the change subscriptions
//! that keep it fresh; [`ObjectHandle`]s keep the shadow alive while
//! [`ObjectView`]s just observe.
//!
//! # Re-exports
//!
//! The probe crate is re-exported as [`probe`] for convenience, so hosts
//! only need one dependency.
//!
//! # Getting started
//!
//! 1. Install a probe (or use `probe::LocalProbe::global()`).
//! 2. Implement [`Shadowed`] for each class, declaring its schema.
//! 3. Wrap objects with [`handle_for`] and read them like records.

// Re-export the probe crate
pub use objshadow_probe as probe;

pub mod cache;
pub mod config;
pub mod error;
pub mod handle;
pub mod registry;
pub mod schema;
pub mod shadow;

#[cfg(test)]
pub(crate) mod testutil;

// Re-export commonly used items
pub use cache::PropertyCache;
pub use error::ShadowError;
pub use handle::{AnyHandle, AnyView, ObjectHandle, ObjectView};
pub use registry::{handle_for, is_shadowed, register_subtype, view_for, SubtypeCaster};
pub use schema::{
    ClassSchema, ClassSchemaBuilder, FetchStrategy, FromValue, PropertyDescriptor, PropertyFlags,
    PropertyValue, Shadowed,
};
pub use shadow::ObjectShadow;

// Re-export config types
pub use config::{ConfigError, ConfigResult, ShadowConfig};
