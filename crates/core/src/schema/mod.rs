//! Property schemas for shadowed classes
//!
//! A [`ClassSchema`] describes everything the shadow layer needs to know
//! about one class: its properties, how each is fetched from the live
//! object, which are writable, which signal announces a change, and how to
//! reach the class's base sub-objects. Schemas are declared once per type
//! with [`ClassSchemaBuilder`] and stored in a `static`, then wired up via
//! the [`Shadowed`] trait.
//!
//! # Example
//!
//! ```ignore
//! struct Probe { serial: u32, label: String }
//!
//! impl Shadowed for Probe {
//!     fn class_schema() -> &'static ClassSchema {
//!         static SCHEMA: LazyLock<ClassSchema> = LazyLock::new(|| {
//!             ClassSchema::builder::<Probe>("Probe")
//!                 .field("serial", |p| p.serial)
//!                 .getter("label", |p| p.label.clone())
//!                 .build()
//!         });
//!         LazyLock::force(&SCHEMA)
//!     }
//! }
//! ```

pub mod value;

use std::any::TypeId;
use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;

use objshadow_probe::RawObject;

use crate::error::ShadowError;
use crate::handle::{AnyHandle, AnyView};
use crate::registry;

pub use value::{FromValue, PropertyValue};

bitflags::bitflags! {
    /// Behavior flags of a single property
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct PropertyFlags: u32 {
        /// Writable through the shadow
        const MUTABLE = 1;
        /// Pointer to an object owned by this one
        const OWNING = 1 << 1;
        /// Pointer to an object owned elsewhere in this collaboration
        const NON_OWNING = 1 << 2;
        /// Pointer to an object owned by a foreign collaboration; implies
        /// non-owning, and the value is only wrapped at read time
        const FOREIGN = (1 << 3) | (1 << 2);
    }
}

impl PropertyFlags {
    pub fn is_foreign(self) -> bool {
        self.contains(Self::FOREIGN)
    }
}

/// How a property's value is obtained from the live object
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchStrategy {
    /// Calls an accessor on the object
    Accessor,
    /// Reads a member directly
    Field,
    /// Derives the value from other state
    Computed,
    /// Calls an accessor on the companion (private part) object
    CompanionAccessor,
    /// Reads a member of the companion object
    CompanionField,
}

type FetchFn = Box<dyn Fn(RawObject) -> PropertyValue + Send + Sync>;
type WriteFn = Box<dyn Fn(RawObject, &PropertyValue) -> Result<(), ShadowError> + Send + Sync>;
type WrapFn = Box<dyn Fn(&PropertyValue) -> PropertyValue + Send + Sync>;
type ProjectFn = Box<dyn Fn(RawObject) -> RawObject + Send + Sync>;
type CompanionFn = Arc<dyn Fn(RawObject) -> RawObject + Send + Sync>;

/// One property of a shadowed class.
pub struct PropertyDescriptor {
    name: &'static str,
    flags: PropertyFlags,
    strategy: FetchStrategy,
    notify: Option<&'static str>,
    fetch: FetchFn,
    write: Option<WriteFn>,
    /// Read-time conversion of stored pointers into handles/views. Never
    /// runs under the per-object guard, since it takes other shadows'
    /// guards.
    wrap: Option<WrapFn>,
}

impl PropertyDescriptor {
    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn flags(&self) -> PropertyFlags {
        self.flags
    }

    pub fn strategy(&self) -> FetchStrategy {
        self.strategy
    }

    /// Signal that announces changes to this property, if any.
    pub fn notify(&self) -> Option<&'static str> {
        self.notify
    }

    pub fn is_writable(&self) -> bool {
        self.flags.contains(PropertyFlags::MUTABLE)
    }

    /// Fetches the current value from the live object.
    ///
    /// Callers must have established that `raw` is alive, of the declaring
    /// class, and not concurrently mutated.
    pub(crate) fn fetch_live(&self, raw: RawObject) -> PropertyValue {
        (self.fetch)(raw)
    }

    /// Writes `value` through to the live object.
    pub(crate) fn write_live(
        &self,
        raw: RawObject,
        value: &PropertyValue,
    ) -> Result<(), ShadowError> {
        match &self.write {
            Some(write) => write(raw, value),
            None => Err(ShadowError::NotWritable(self.name.to_owned())),
        }
    }

    /// Converts a stored value into its read-time form. `None` for
    /// properties that are served exactly as stored.
    pub(crate) fn wrap_value(&self, value: &PropertyValue) -> Option<PropertyValue> {
        self.wrap.as_ref().map(|wrap| wrap(value))
    }
}

impl fmt::Debug for PropertyDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PropertyDescriptor")
            .field("name", &self.name)
            .field("flags", &self.flags)
            .field("strategy", &self.strategy)
            .field("notify", &self.notify)
            .field("writable", &self.write.is_some())
            .finish()
    }
}

/// Link from a class to one of its base classes.
pub struct BaseSchema {
    schema: &'static ClassSchema,
    project: ProjectFn,
}

impl BaseSchema {
    pub fn schema(&self) -> &'static ClassSchema {
        self.schema
    }

    /// Adjusts a pointer to the derived object into a pointer to this base
    /// sub-object.
    pub(crate) fn project(&self, raw: RawObject) -> RawObject {
        (self.project)(raw)
    }
}

impl fmt::Debug for BaseSchema {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BaseSchema")
            .field("class", &self.schema.class_name)
            .finish()
    }
}

/// Complete property description of one class.
pub struct ClassSchema {
    class_name: &'static str,
    type_id: TypeId,
    properties: Vec<PropertyDescriptor>,
    bases: Vec<BaseSchema>,
    caching_disabled: bool,
}

impl ClassSchema {
    pub fn builder<C: 'static>(class_name: &'static str) -> ClassSchemaBuilder<C> {
        ClassSchemaBuilder {
            class_name,
            properties: Vec::new(),
            bases: Vec::new(),
            companion: None,
            caching_disabled: false,
            _marker: PhantomData,
        }
    }

    pub fn class_name(&self) -> &'static str {
        self.class_name
    }

    pub fn type_id(&self) -> TypeId {
        self.type_id
    }

    pub fn properties(&self) -> &[PropertyDescriptor] {
        &self.properties
    }

    /// Looks up a property declared directly on this class.
    pub fn property(&self, name: &str) -> Option<(usize, &PropertyDescriptor)> {
        self.properties
            .iter()
            .enumerate()
            .find(|(_, p)| p.name == name)
    }

    pub fn bases(&self) -> &[BaseSchema] {
        &self.bases
    }

    /// Whether caching is disabled for instances of this class.
    pub fn caching_disabled(&self) -> bool {
        self.caching_disabled
    }

    /// Whether this class is, or derives from, the class identified by `ty`.
    pub fn includes(&self, ty: TypeId) -> bool {
        self.type_id == ty || self.bases.iter().any(|b| b.schema.includes(ty))
    }
}

impl fmt::Debug for ClassSchema {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClassSchema")
            .field("class", &self.class_name)
            .field("properties", &self.properties)
            .field("bases", &self.bases)
            .field("caching_disabled", &self.caching_disabled)
            .finish()
    }
}

/// Types that declare a [`ClassSchema`] and can therefore be shadowed.
pub trait Shadowed: 'static {
    fn class_schema() -> &'static ClassSchema;

    fn class_name() -> &'static str {
        Self::class_schema().class_name()
    }
}

/// Read-time wrap of a stored pointer into a weak view. Never creates a
/// shadow; the view is null until the target is shadowed.
fn view_wrap<U: Shadowed>() -> WrapFn {
    Box::new(|value| {
        PropertyValue::View(match value {
            PropertyValue::Pointer(Some(target)) => registry::view_for::<U>(*target).erase(),
            _ => AnyView::null(),
        })
    })
}

/// Fluent builder for a [`ClassSchema`].
///
/// Declaration order matters in two places: [`notify`](Self::notify)
/// attaches to the most recently declared property, and
/// [`companion`](Self::companion) must come before any `companion_*`
/// property.
pub struct ClassSchemaBuilder<C> {
    class_name: &'static str,
    properties: Vec<PropertyDescriptor>,
    bases: Vec<BaseSchema>,
    companion: Option<(TypeId, CompanionFn)>,
    caching_disabled: bool,
    _marker: PhantomData<fn() -> C>,
}

impl<C: 'static> ClassSchemaBuilder<C> {
    fn push(&mut self, name: &'static str, strategy: FetchStrategy, fetch: FetchFn) {
        debug_assert!(
            !self.properties.iter().any(|p| p.name == name),
            "duplicate property {name:?} on {}",
            self.class_name
        );
        self.properties.push(PropertyDescriptor {
            name,
            flags: PropertyFlags::empty(),
            strategy,
            notify: None,
            fetch,
            write: None,
            wrap: None,
        });
    }

    fn last_mut(&mut self) -> &mut PropertyDescriptor {
        match self.properties.last_mut() {
            Some(p) => p,
            None => panic!("no property declared yet on schema for {}", self.class_name),
        }
    }

    /// Declares a base class together with the projection from a derived
    /// object to the base sub-object.
    pub fn base<B: Shadowed>(mut self, project: fn(&C) -> &B) -> Self {
        let project: ProjectFn = Box::new(move |raw| {
            // SAFETY: the shadow layer only projects pointers it has
            // verified as live objects of type C.
            RawObject::from_ref(project(unsafe { raw.as_ref::<C>() }))
        });
        self.bases.push(BaseSchema {
            schema: B::class_schema(),
            project,
        });
        self
    }

    /// Binds the companion (private part) object that `companion_getter`
    /// and `companion_field` properties read from.
    pub fn companion<P: 'static>(mut self, get: fn(&C) -> &P) -> Self {
        let project: CompanionFn = Arc::new(move |raw| {
            // SAFETY: as in `base`.
            RawObject::from_ref(get(unsafe { raw.as_ref::<C>() }))
        });
        self.companion = Some((TypeId::of::<P>(), project));
        self
    }

    /// Property backed by an accessor on the object.
    pub fn getter<V: Into<PropertyValue> + 'static>(
        mut self,
        name: &'static str,
        get: fn(&C) -> V,
    ) -> Self {
        self.push(
            name,
            FetchStrategy::Accessor,
            Box::new(move |raw| get(unsafe { raw.as_ref::<C>() }).into()),
        );
        self
    }

    /// Property backed by a plain member read.
    pub fn field<V: Into<PropertyValue> + 'static>(
        mut self,
        name: &'static str,
        get: fn(&C) -> V,
    ) -> Self {
        self.push(
            name,
            FetchStrategy::Field,
            Box::new(move |raw| get(unsafe { raw.as_ref::<C>() }).into()),
        );
        self
    }

    /// Property derived from other state rather than stored on the object.
    pub fn computed<V: Into<PropertyValue> + 'static>(
        mut self,
        name: &'static str,
        get: fn(&C) -> V,
    ) -> Self {
        self.push(
            name,
            FetchStrategy::Computed,
            Box::new(move |raw| get(unsafe { raw.as_ref::<C>() }).into()),
        );
        self
    }

    /// Writable property with accessor-based fetch and a setter.
    pub fn writable<V>(mut self, name: &'static str, get: fn(&C) -> V, set: fn(&mut C, V)) -> Self
    where
        V: Into<PropertyValue> + FromValue + 'static,
    {
        self.push(
            name,
            FetchStrategy::Accessor,
            Box::new(move |raw| get(unsafe { raw.as_ref::<C>() }).into()),
        );
        let descriptor = self.last_mut();
        descriptor.flags |= PropertyFlags::MUTABLE;
        descriptor.write = Some(Box::new(move |raw, value| {
            let typed = V::from_value(value).ok_or_else(|| ShadowError::TypeMismatch {
                property: name.to_owned(),
                expected: V::EXPECTED,
            })?;
            // SAFETY: called with the per-object guard held on a live C.
            set(unsafe { raw.as_mut::<C>() }, typed);
            Ok(())
        }));
        self
    }

    fn companion_fetch<P: 'static, V: Into<PropertyValue> + 'static>(
        &self,
        get: fn(&P) -> V,
    ) -> FetchFn {
        let Some((companion_type, project)) = self.companion.clone() else {
            panic!(
                "companion property on {} declared before companion binding",
                self.class_name
            );
        };
        assert!(
            companion_type == TypeId::of::<P>(),
            "companion property type does not match the companion binding of {}",
            self.class_name
        );
        Box::new(move |raw| {
            let companion = project(raw);
            // SAFETY: the companion projection returns a reference-derived
            // pointer into the same live object.
            get(unsafe { companion.as_ref::<P>() }).into()
        })
    }

    /// Property backed by an accessor on the companion object.
    pub fn companion_getter<P: 'static, V: Into<PropertyValue> + 'static>(
        mut self,
        name: &'static str,
        get: fn(&P) -> V,
    ) -> Self {
        let fetch = self.companion_fetch(get);
        self.push(name, FetchStrategy::CompanionAccessor, fetch);
        self
    }

    /// Property backed by a member read on the companion object.
    pub fn companion_field<P: 'static, V: Into<PropertyValue> + 'static>(
        mut self,
        name: &'static str,
        get: fn(&P) -> V,
    ) -> Self {
        let fetch = self.companion_fetch(get);
        self.push(name, FetchStrategy::CompanionField, fetch);
        self
    }

    fn push_pointer<U: Shadowed>(&mut self, name: &'static str, get: fn(&C) -> Option<&U>) {
        // The cache only ever stores the bare pointer. Wrapping it into a
        // handle or view takes other shadows' guards (and, for owning
        // pointers, creates shadows), so it is deferred to read time,
        // outside this object's guard. Fetching during a cache fill
        // therefore never re-enters the registry, even for properties that
        // point back at the object being filled.
        self.push(
            name,
            FetchStrategy::Accessor,
            Box::new(move |raw| {
                PropertyValue::Pointer(get(unsafe { raw.as_ref::<C>() }).map(RawObject::from_ref))
            }),
        );
    }

    fn push_pointer_list<U: Shadowed>(&mut self, name: &'static str, get: fn(&C) -> Vec<&U>) {
        self.push(
            name,
            FetchStrategy::Accessor,
            Box::new(move |raw| {
                PropertyValue::PointerList(
                    get(unsafe { raw.as_ref::<C>() })
                        .into_iter()
                        .map(RawObject::from_ref)
                        .collect(),
                )
            }),
        );
    }

    /// Pointer to an object owned by this one. Reads produce a strong
    /// handle, created on demand.
    pub fn owning<U: Shadowed>(mut self, name: &'static str, get: fn(&C) -> Option<&U>) -> Self {
        self.push_pointer(name, get);
        let descriptor = self.last_mut();
        descriptor.flags |= PropertyFlags::OWNING;
        descriptor.wrap = Some(Box::new(|value| {
            PropertyValue::Handle(match value {
                PropertyValue::Pointer(Some(target)) => registry::handle_for::<U>(*target).erase(),
                _ => AnyHandle::null(),
            })
        }));
        self
    }

    /// Pointer to an object owned elsewhere. Reads produce a weak view and
    /// never create a shadow.
    pub fn non_owning<U: Shadowed>(
        mut self,
        name: &'static str,
        get: fn(&C) -> Option<&U>,
    ) -> Self {
        self.push_pointer(name, get);
        let descriptor = self.last_mut();
        descriptor.flags |= PropertyFlags::NON_OWNING;
        descriptor.wrap = Some(view_wrap::<U>());
        self
    }

    /// Pointer into a foreign collaboration. Stored and wrapped like
    /// `non_owning`; the flag records the ownership boundary.
    pub fn foreign<U: Shadowed>(mut self, name: &'static str, get: fn(&C) -> Option<&U>) -> Self {
        self.push_pointer(name, get);
        let descriptor = self.last_mut();
        descriptor.flags |= PropertyFlags::FOREIGN;
        descriptor.wrap = Some(view_wrap::<U>());
        self
    }

    /// List of owned objects. Reads produce strong handles.
    pub fn owning_list<U: Shadowed>(
        mut self,
        name: &'static str,
        get: fn(&C) -> Vec<&U>,
    ) -> Self {
        self.push_pointer_list(name, get);
        let descriptor = self.last_mut();
        descriptor.flags |= PropertyFlags::OWNING;
        descriptor.wrap = Some(Box::new(|value| {
            PropertyValue::HandleList(match value {
                PropertyValue::PointerList(targets) => targets
                    .iter()
                    .map(|target| registry::handle_for::<U>(*target).erase())
                    .collect(),
                _ => Vec::new(),
            })
        }));
        self
    }

    /// List of non-owned objects. Reads produce weak views.
    pub fn non_owning_list<U: Shadowed>(
        mut self,
        name: &'static str,
        get: fn(&C) -> Vec<&U>,
    ) -> Self {
        self.push_pointer_list(name, get);
        let descriptor = self.last_mut();
        descriptor.flags |= PropertyFlags::NON_OWNING;
        descriptor.wrap = Some(Box::new(|value| {
            PropertyValue::ViewList(match value {
                PropertyValue::PointerList(targets) => targets
                    .iter()
                    .map(|target| registry::view_for::<U>(*target).erase())
                    .collect(),
                _ => Vec::new(),
            })
        }));
        self
    }

    /// Attaches a change-notification signal to the most recently declared
    /// property. The shadow subscribes to it and refreshes the cached slot
    /// when it fires.
    pub fn notify(mut self, signal: &'static str) -> Self {
        self.last_mut().notify = Some(signal);
        self
    }

    /// Disables caching for this class: reads always go to the live object
    /// and no change subscriptions are created.
    pub fn disable_caching(mut self) -> Self {
        self.caching_disabled = true;
        self
    }

    pub fn build(self) -> ClassSchema {
        ClassSchema {
            class_name: self.class_name,
            type_id: TypeId::of::<C>(),
            properties: self.properties,
            bases: self.bases,
            caching_disabled: self.caching_disabled,
        }
    }
}
