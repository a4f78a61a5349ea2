//! Strong handles and weak views onto shadowed objects
//!
//! An [`ObjectHandle`] keeps the shadow (and its cache) alive and is the
//! main read/write surface. An [`ObjectView`] observes without keeping
//! anything alive and must be upgraded before use. Both compare and hash
//! by the underlying object pointer, so they work as map keys and stay
//! comparable across the handle/view divide.

use std::any::TypeId;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::marker::PhantomData;
use std::sync::{Arc, Weak};

use objshadow_probe::{try_probe, ObjectId, RawObject};

use crate::error::ShadowError;
use crate::schema::{PropertyValue, Shadowed};
use crate::shadow::ObjectShadow;

/// Strong, typed reference to a shadowed object.
pub struct ObjectHandle<T: Shadowed> {
    shadow: Option<Arc<ObjectShadow>>,
    _marker: PhantomData<fn() -> T>,
}

impl<T: Shadowed> ObjectHandle<T> {
    /// Handle referring to no object.
    pub fn null() -> Self {
        Self {
            shadow: None,
            _marker: PhantomData,
        }
    }

    pub(crate) fn from_shadow(shadow: Arc<ObjectShadow>) -> Self {
        debug_assert!(shadow.is_complete(TypeId::of::<T>()));
        Self {
            shadow: Some(shadow),
            _marker: PhantomData,
        }
    }

    pub(crate) fn shadow(&self) -> Option<&Arc<ObjectShadow>> {
        self.shadow.as_ref()
    }

    pub fn is_null(&self) -> bool {
        self.shadow.is_none()
    }

    /// Whether the underlying object is still alive.
    pub fn is_valid(&self) -> bool {
        match &self.shadow {
            Some(shadow) => try_probe().is_some_and(|p| p.is_valid_object(shadow.raw())),
            None => false,
        }
    }

    /// Address of the underlying object, 0 for the null handle.
    pub fn addr(&self) -> usize {
        self.shadow.as_ref().map_or(0, |s| s.raw().addr())
    }

    /// The object pointer adjusted to class `T`.
    pub fn raw(&self) -> Option<RawObject> {
        self.shadow
            .as_ref()
            .and_then(|s| s.object_as(TypeId::of::<T>()))
    }

    /// Serializable identity of the underlying object.
    pub fn object_id(&self) -> ObjectId {
        match &self.shadow {
            Some(shadow) => ObjectId::new(shadow.raw(), T::class_name()),
            None => ObjectId::null(),
        }
    }

    /// Reads a property, resolving `name` against `T` and its bases.
    pub fn try_get(&self, name: &str) -> Result<PropertyValue, ShadowError> {
        let shadow = self.shadow.as_ref().ok_or(ShadowError::ObjectGone)?;
        if !self.is_valid() {
            return Err(ShadowError::ObjectGone);
        }
        shadow.get_named(TypeId::of::<T>(), name)
    }

    /// Reads a property, `None` on any failure.
    pub fn get(&self, name: &str) -> Option<PropertyValue> {
        self.try_get(name).ok()
    }

    /// Writes a property through to the live object.
    pub fn set(&self, name: &str, value: impl Into<PropertyValue>) -> Result<(), ShadowError> {
        let shadow = self.shadow.as_ref().ok_or(ShadowError::ObjectGone)?;
        if !self.is_valid() {
            return Err(ShadowError::ObjectGone);
        }
        shadow.set_named(TypeId::of::<T>(), name, value.into())
    }

    /// Re-fetches all cached values of `T`'s node. Returns `false` for the
    /// null handle.
    pub fn refresh(&self) -> bool {
        match &self.shadow {
            Some(shadow) => shadow.refresh_type(TypeId::of::<T>()),
            None => false,
        }
    }

    /// Reinterprets the handle as class `U`, sharing the same shadow.
    /// Fails when the shadow does not cover `U`.
    pub fn cast<U: Shadowed>(&self) -> Option<ObjectHandle<U>> {
        let shadow = self.shadow.as_ref()?;
        if shadow.is_complete(TypeId::of::<U>()) {
            Some(ObjectHandle {
                shadow: Some(Arc::clone(shadow)),
                _marker: PhantomData,
            })
        } else {
            None
        }
    }

    /// Weak view of the same object.
    pub fn downgrade(&self) -> ObjectView<T> {
        match &self.shadow {
            Some(shadow) => ObjectView {
                shadow: Arc::downgrade(shadow),
                addr: shadow.raw().addr(),
                _marker: PhantomData,
            },
            None => ObjectView::null(),
        }
    }

    /// Type-erased strong handle.
    pub fn erase(&self) -> AnyHandle {
        AnyHandle {
            shadow: self.shadow.clone(),
        }
    }

    /// Runs `f` with a shared reference to the object on the object's own
    /// execution context, blocking for the result.
    pub fn invoke_sync<R>(&self, f: impl FnOnce(&T) -> R + Send + 'static) -> Option<R>
    where
        R: Send + 'static,
    {
        let shadow = self.shadow.as_ref()?;
        let view = shadow.object_as(TypeId::of::<T>())?;
        // SAFETY: the task runs on the owning context after revalidation,
        // on a pointer the cache adjusted to class T.
        shadow.invoke_sync(view, move |raw| f(unsafe { raw.as_ref::<T>() }))
    }

    /// Runs `f` with exclusive access to the object on the object's own
    /// execution context, blocking for the result.
    pub fn invoke_sync_mut<R>(&self, f: impl FnOnce(&mut T) -> R + Send + 'static) -> Option<R>
    where
        R: Send + 'static,
    {
        let shadow = self.shadow.as_ref()?;
        let view = shadow.object_as(TypeId::of::<T>())?;
        // SAFETY: as in `invoke_sync`; the owning context is the only
        // place the object is touched.
        shadow.invoke_sync(view, move |raw| f(unsafe { raw.as_mut::<T>() }))
    }

    /// Queues `f` on the object's execution context without waiting. Does
    /// nothing when the object is gone.
    pub fn invoke_async(&self, f: impl FnOnce(&T) + Send + 'static) {
        if let Some(shadow) = self.shadow.as_ref() {
            if let Some(view) = shadow.object_as(TypeId::of::<T>()) {
                // SAFETY: as in `invoke_sync`.
                shadow.invoke_async(view, move |raw| f(unsafe { raw.as_ref::<T>() }));
            }
        }
    }

    /// Drops the reference, leaving the null handle.
    pub fn clear(&mut self) {
        self.shadow = None;
    }
}

impl<T: Shadowed> Clone for ObjectHandle<T> {
    fn clone(&self) -> Self {
        Self {
            shadow: self.shadow.clone(),
            _marker: PhantomData,
        }
    }
}

impl<T: Shadowed> Default for ObjectHandle<T> {
    fn default() -> Self {
        Self::null()
    }
}

impl<T: Shadowed> fmt::Debug for ObjectHandle<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ObjectHandle<{}>({:#x})", T::class_name(), self.addr())
    }
}

impl<T: Shadowed> PartialEq for ObjectHandle<T> {
    fn eq(&self, other: &Self) -> bool {
        self.addr() == other.addr()
    }
}

impl<T: Shadowed> Eq for ObjectHandle<T> {}

impl<T: Shadowed> PartialOrd for ObjectHandle<T> {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl<T: Shadowed> Ord for ObjectHandle<T> {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.addr().cmp(&other.addr())
    }
}

impl<T: Shadowed> Hash for ObjectHandle<T> {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.addr().hash(state);
    }
}

impl<T: Shadowed> PartialEq<ObjectView<T>> for ObjectHandle<T> {
    fn eq(&self, other: &ObjectView<T>) -> bool {
        self.addr() == other.addr()
    }
}

/// Weak, typed reference to a shadowed object.
///
/// Keeps nothing alive; upgrade before use. Comparison and hashing use the
/// object address captured at creation, so views stay usable as ordered
/// map keys after the object dies.
pub struct ObjectView<T: Shadowed> {
    shadow: Weak<ObjectShadow>,
    addr: usize,
    _marker: PhantomData<fn() -> T>,
}

impl<T: Shadowed> ObjectView<T> {
    pub fn null() -> Self {
        Self {
            shadow: Weak::new(),
            addr: 0,
            _marker: PhantomData,
        }
    }

    /// Address captured when the view was created, 0 for the null view.
    pub fn addr(&self) -> usize {
        self.addr
    }

    /// Strong handle to the object, or the null handle when the shadow is
    /// gone.
    pub fn upgrade(&self) -> ObjectHandle<T> {
        match self.shadow.upgrade() {
            Some(shadow) if shadow.is_complete(TypeId::of::<T>()) => {
                ObjectHandle::from_shadow(shadow)
            }
            _ => ObjectHandle::null(),
        }
    }

    /// Whether the object is still shadowed and alive.
    pub fn is_valid(&self) -> bool {
        self.upgrade().is_valid()
    }

    /// Reinterprets the view as class `U`, sharing the same shadow. The
    /// null view is returned when the shadow is gone or does not cover `U`.
    pub fn cast<U: Shadowed>(&self) -> ObjectView<U> {
        match self.shadow.upgrade() {
            Some(shadow) if shadow.is_complete(TypeId::of::<U>()) => ObjectView {
                shadow: self.shadow.clone(),
                addr: self.addr,
                _marker: PhantomData,
            },
            _ => ObjectView::null(),
        }
    }

    pub fn get(&self, name: &str) -> Option<PropertyValue> {
        self.upgrade().get(name)
    }

    pub fn set(&self, name: &str, value: impl Into<PropertyValue>) -> Result<(), ShadowError> {
        self.upgrade().set(name, value)
    }

    /// Type-erased view.
    pub fn erase(&self) -> AnyView {
        AnyView {
            shadow: self.shadow.clone(),
            addr: self.addr,
        }
    }
}

impl<T: Shadowed> Clone for ObjectView<T> {
    fn clone(&self) -> Self {
        Self {
            shadow: self.shadow.clone(),
            addr: self.addr,
            _marker: PhantomData,
        }
    }
}

impl<T: Shadowed> Default for ObjectView<T> {
    fn default() -> Self {
        Self::null()
    }
}

impl<T: Shadowed> fmt::Debug for ObjectView<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ObjectView<{}>({:#x})", T::class_name(), self.addr)
    }
}

impl<T: Shadowed> PartialEq for ObjectView<T> {
    fn eq(&self, other: &Self) -> bool {
        self.addr == other.addr
    }
}

impl<T: Shadowed> Eq for ObjectView<T> {}

impl<T: Shadowed> PartialOrd for ObjectView<T> {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl<T: Shadowed> Ord for ObjectView<T> {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.addr.cmp(&other.addr)
    }
}

impl<T: Shadowed> Hash for ObjectView<T> {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.addr.hash(state);
    }
}

impl<T: Shadowed> PartialEq<ObjectHandle<T>> for ObjectView<T> {
    fn eq(&self, other: &ObjectHandle<T>) -> bool {
        self.addr == other.addr()
    }
}

/// Type-erased strong handle, as stored in property values.
#[derive(Clone, Default)]
pub struct AnyHandle {
    shadow: Option<Arc<ObjectShadow>>,
}

impl AnyHandle {
    pub fn null() -> Self {
        Self { shadow: None }
    }

    pub fn is_null(&self) -> bool {
        self.shadow.is_none()
    }

    pub fn addr(&self) -> usize {
        self.shadow.as_ref().map_or(0, |s| s.raw().addr())
    }

    /// Recovers a typed handle. Fails when the shadow does not cover `T`.
    pub fn typed<T: Shadowed>(&self) -> Option<ObjectHandle<T>> {
        let shadow = self.shadow.as_ref()?;
        if shadow.is_complete(TypeId::of::<T>()) {
            Some(ObjectHandle::from_shadow(Arc::clone(shadow)))
        } else {
            None
        }
    }
}

impl fmt::Debug for AnyHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "AnyHandle({:#x})", self.addr())
    }
}

impl PartialEq for AnyHandle {
    fn eq(&self, other: &Self) -> bool {
        self.addr() == other.addr()
    }
}

impl Eq for AnyHandle {}

/// Type-erased weak view, as stored in property values.
#[derive(Clone)]
pub struct AnyView {
    shadow: Weak<ObjectShadow>,
    addr: usize,
}

impl AnyView {
    pub fn null() -> Self {
        Self {
            shadow: Weak::new(),
            addr: 0,
        }
    }

    pub fn is_null(&self) -> bool {
        self.addr == 0
    }

    pub fn addr(&self) -> usize {
        self.addr
    }

    /// Recovers a typed view. The null view is returned when the shadow is
    /// gone or does not cover `T`.
    pub fn typed<T: Shadowed>(&self) -> ObjectView<T> {
        match self.shadow.upgrade() {
            Some(shadow) if shadow.is_complete(TypeId::of::<T>()) => ObjectView {
                shadow: self.shadow.clone(),
                addr: self.addr,
                _marker: PhantomData,
            },
            _ => ObjectView::null(),
        }
    }
}

impl Default for AnyView {
    fn default() -> Self {
        Self::null()
    }
}

impl fmt::Debug for AnyView {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "AnyView({:#x})", self.addr)
    }
}

impl PartialEq for AnyView {
    fn eq(&self, other: &Self) -> bool {
        self.addr == other.addr
    }
}

impl Eq for AnyView {}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::Widget;

    #[test]
    fn null_handle_behaves_inertly() {
        let handle = ObjectHandle::<Widget>::null();
        assert!(handle.is_null());
        assert!(!handle.is_valid());
        assert_eq!(handle.addr(), 0);
        assert_eq!(handle.get("size"), None);
        assert_eq!(handle.try_get("size"), Err(ShadowError::ObjectGone));
        assert_eq!(handle.set("size", 3), Err(ShadowError::ObjectGone));
        assert!(!handle.refresh());
        assert!(handle.object_id().is_null());
    }

    #[test]
    fn null_view_upgrades_to_null_handle() {
        let view = ObjectView::<Widget>::null();
        assert!(!view.is_valid());
        assert!(view.upgrade().is_null());
        assert_eq!(view.get("size"), None);
    }

    #[test]
    fn null_handles_compare_equal() {
        let a = ObjectHandle::<Widget>::null();
        let b = ObjectHandle::<Widget>::null();
        assert_eq!(a, b);
        assert_eq!(a, b.downgrade());
        assert!(AnyHandle::null().is_null());
        assert!(AnyView::null().typed::<Widget>().upgrade().is_null());
    }
}
