//! Serializable object identity

use std::fmt;

use serde::Serialize;

use crate::object::RawObject;

/// Stable, serializable identity of a tracked object.
///
/// Pairs the object address with its class name so identities stay
/// meaningful once they leave the process. An id does not keep the object
/// alive and may outlive it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct ObjectId {
    address: usize,
    class: &'static str,
}

impl ObjectId {
    pub fn new(obj: RawObject, class: &'static str) -> Self {
        Self {
            address: obj.addr(),
            class,
        }
    }

    /// Identity of no object.
    pub const fn null() -> Self {
        Self {
            address: 0,
            class: "",
        }
    }

    pub fn is_null(&self) -> bool {
        self.address == 0
    }

    pub fn address(&self) -> usize {
        self.address
    }

    pub fn class_name(&self) -> &'static str {
        self.class
    }
}

impl fmt::Display for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_null() {
            write!(f, "<null>")
        } else {
            write!(f, "{}@{:#x}", self.class, self.address)
        }
    }
}
