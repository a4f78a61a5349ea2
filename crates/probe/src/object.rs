//! Raw object identity and execution context primitives.
//!
//! A [`RawObject`] is a non-null, type-erased pointer to an object owned by
//! the host process. The probe layer never owns these objects; it only
//! tracks which ones are currently alive and which execution context they
//! belong to.

use std::ffi::c_void;
use std::fmt;
use std::ptr::NonNull;

/// A unit of work marshalled onto an execution context.
pub type Task = Box<dyn FnOnce() + Send + 'static>;

/// Identifier of an execution context (a thread or event-loop the host
/// process runs object code on).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ContextId(pub u64);

impl fmt::Display for ContextId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ctx#{}", self.0)
    }
}

/// Type-erased pointer to a live, host-owned object.
///
/// Carries no ownership and no type information. Dereferencing is only
/// sound after the installed probe has confirmed the object is alive, and
/// only with the type the pointer was registered under (or a base
/// sub-object reachable through a schema projection).
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct RawObject(NonNull<c_void>);

// RawObject is an address, not an access path. All dereferencing goes
// through the shadow layer, which serializes access per object and checks
// liveness with the installed probe first.
unsafe impl Send for RawObject {}
unsafe impl Sync for RawObject {}

impl RawObject {
    /// Wraps a raw pointer, returning `None` for null.
    pub fn new(ptr: *mut c_void) -> Option<Self> {
        NonNull::new(ptr).map(Self)
    }

    /// Captures the address of a live reference.
    pub fn from_ref<T>(value: &T) -> Self {
        // A reference is never null.
        Self(NonNull::from(value).cast())
    }

    pub fn as_ptr(self) -> *mut c_void {
        self.0.as_ptr()
    }

    pub fn addr(self) -> usize {
        self.0.as_ptr() as usize
    }

    /// Reborrows the object as `T`.
    ///
    /// # Safety
    ///
    /// The object must be alive, actually of type `T` at this address, and
    /// not concurrently mutated for the duration of `'a`.
    pub unsafe fn as_ref<'a, T>(self) -> &'a T {
        &*self.0.cast::<T>().as_ptr()
    }

    /// Reborrows the object as `&mut T`.
    ///
    /// # Safety
    ///
    /// Same as [`RawObject::as_ref`], and additionally the caller must hold
    /// exclusive access to the object.
    #[allow(clippy::mut_from_ref)]
    pub unsafe fn as_mut<'a, T>(self) -> &'a mut T {
        &mut *self.0.cast::<T>().as_ptr()
    }
}

impl fmt::Debug for RawObject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "RawObject({:p})", self.0.as_ptr())
    }
}
