//! Property wire values
//!
//! Every property read produces a [`PropertyValue`], a small self-describing
//! value that can be cached, compared and handed across threads without
//! touching the live object again.

use objshadow_probe::RawObject;

use crate::handle::{AnyHandle, AnyView};

/// Type-erased value of a single property.
#[derive(Debug, Clone, Default, PartialEq)]
pub enum PropertyValue {
    /// No value (unfilled cache slot, or a `()` property)
    #[default]
    Unit,
    Bool(bool),
    Int(i64),
    UInt(u64),
    Float(f64),
    Text(String),
    /// Unwrapped pointer to another tracked object. This is the stored form
    /// of every pointer property; reads wrap it into a handle or view on
    /// the way out.
    Pointer(Option<RawObject>),
    /// Unwrapped pointers backing a list property, wrapped per read like
    /// `Pointer`
    PointerList(Vec<RawObject>),
    /// Strong reference to an owned sub-object
    Handle(AnyHandle),
    /// Weak reference to a non-owned object
    View(AnyView),
    HandleList(Vec<AnyHandle>),
    ViewList(Vec<AnyView>),
}

impl PropertyValue {
    /// Name of the value's shape, for diagnostics.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Unit => "unit",
            Self::Bool(_) => "bool",
            Self::Int(_) => "int",
            Self::UInt(_) => "uint",
            Self::Float(_) => "float",
            Self::Text(_) => "text",
            Self::Pointer(_) => "pointer",
            Self::PointerList(_) => "pointer list",
            Self::Handle(_) => "handle",
            Self::View(_) => "view",
            Self::HandleList(_) => "handle list",
            Self::ViewList(_) => "view list",
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            Self::Int(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_uint(&self) -> Option<u64> {
        match self {
            Self::UInt(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_float(&self) -> Option<f64> {
        match self {
            Self::Float(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_handle(&self) -> Option<&AnyHandle> {
        match self {
            Self::Handle(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_view(&self) -> Option<&AnyView> {
        match self {
            Self::View(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_handle_list(&self) -> Option<&[AnyHandle]> {
        match self {
            Self::HandleList(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_view_list(&self) -> Option<&[AnyView]> {
        match self {
            Self::ViewList(v) => Some(v),
            _ => None,
        }
    }
}

/// Conversion out of a [`PropertyValue`], used by writable properties to
/// type-check incoming values.
pub trait FromValue: Sized {
    /// Expected shape name, surfaced in type-mismatch errors.
    const EXPECTED: &'static str;

    fn from_value(value: &PropertyValue) -> Option<Self>;
}

macro_rules! impl_from_value_int {
    ($($ty:ty),*) => {
        $(impl FromValue for $ty {
            const EXPECTED: &'static str = "int";

            fn from_value(value: &PropertyValue) -> Option<Self> {
                value.as_int().and_then(|v| <$ty>::try_from(v).ok())
            }
        })*
    };
}

macro_rules! impl_from_value_uint {
    ($($ty:ty),*) => {
        $(impl FromValue for $ty {
            const EXPECTED: &'static str = "uint";

            fn from_value(value: &PropertyValue) -> Option<Self> {
                value.as_uint().and_then(|v| <$ty>::try_from(v).ok())
            }
        })*
    };
}

impl_from_value_int!(i8, i16, i32, i64);
impl_from_value_uint!(u8, u16, u32, u64);

impl FromValue for bool {
    const EXPECTED: &'static str = "bool";

    fn from_value(value: &PropertyValue) -> Option<Self> {
        value.as_bool()
    }
}

impl FromValue for f64 {
    const EXPECTED: &'static str = "float";

    fn from_value(value: &PropertyValue) -> Option<Self> {
        value.as_float()
    }
}

impl FromValue for f32 {
    const EXPECTED: &'static str = "float";

    fn from_value(value: &PropertyValue) -> Option<Self> {
        value.as_float().map(|v| v as f32)
    }
}

impl FromValue for String {
    const EXPECTED: &'static str = "text";

    fn from_value(value: &PropertyValue) -> Option<Self> {
        value.as_text().map(str::to_owned)
    }
}

impl From<()> for PropertyValue {
    fn from(_: ()) -> Self {
        Self::Unit
    }
}

impl From<bool> for PropertyValue {
    fn from(v: bool) -> Self {
        Self::Bool(v)
    }
}

macro_rules! impl_into_value {
    ($variant:ident: $($ty:ty),*) => {
        $(impl From<$ty> for PropertyValue {
            fn from(v: $ty) -> Self {
                Self::$variant(v.into())
            }
        })*
    };
}

impl_into_value!(Int: i8, i16, i32, i64);
impl_into_value!(UInt: u8, u16, u32, u64);
impl_into_value!(Float: f32, f64);
impl_into_value!(Text: &str, String);

impl From<usize> for PropertyValue {
    fn from(v: usize) -> Self {
        Self::UInt(v as u64)
    }
}

impl FromValue for usize {
    const EXPECTED: &'static str = "uint";

    fn from_value(value: &PropertyValue) -> Option<Self> {
        value.as_uint().and_then(|v| usize::try_from(v).ok())
    }
}
