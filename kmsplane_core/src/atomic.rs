// Copyright 2026 the Kmsplane Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Atomic request assembly.
//!
//! An [`AtomicRequest`] is an ordered list of `(object, property, value)`
//! triples that the device applies as one unit. Adding a property whose ID
//! was never resolved on the target object fails for that one property and
//! leaves the request otherwise intact, so a caller can still submit
//! whatever was added.

use alloc::vec::Vec;
use core::fmt;

use crate::object::{ObjectRef, PropertyId};

/// One property assignment inside an atomic request.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct PropertyAssignment {
    /// Object the property belongs to.
    pub object: ObjectRef,
    /// Property to set.
    pub property: PropertyId,
    /// Raw value.
    pub value: u64,
}

/// A property that could not be added to a request.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct PropertyAddFailure {
    /// Object the property was meant for.
    pub object: ObjectRef,
    /// Property name as expected on the object.
    pub name: &'static str,
    /// Value that was not added.
    pub value: u64,
}

impl fmt::Display for PropertyAddFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "failed to add prop {}={} to {}",
            self.name, self.value, self.object
        )
    }
}

/// Commit behavior flags.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct CommitFlags {
    /// Request a page-flip completion event for every CRTC in the request.
    pub page_flip_event: bool,
}

/// Ordered set of property assignments submitted in one commit.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct AtomicRequest {
    assignments: Vec<PropertyAssignment>,
}

impl AtomicRequest {
    /// Creates an empty request.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends `name = value` on `object`.
    ///
    /// `property` is `None` when the object does not expose `name`; the
    /// assignment is then rejected and described by the returned failure.
    pub fn add(
        &mut self,
        object: impl Into<ObjectRef>,
        name: &'static str,
        property: Option<PropertyId>,
        value: u64,
    ) -> Result<(), PropertyAddFailure> {
        let object = object.into();
        match property {
            Some(property) => {
                self.assignments.push(PropertyAssignment {
                    object,
                    property,
                    value,
                });
                Ok(())
            }
            None => Err(PropertyAddFailure {
                object,
                name,
                value,
            }),
        }
    }

    /// Returns the assignments in insertion order.
    #[must_use]
    pub fn assignments(&self) -> &[PropertyAssignment] {
        &self.assignments
    }

    /// Number of assignments.
    #[must_use]
    pub fn len(&self) -> usize {
        self.assignments.len()
    }

    /// Returns `true` when nothing has been added.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.assignments.is_empty()
    }

    /// Returns the value assigned to `property` on `object`, if any.
    ///
    /// When the same property is assigned twice the later value wins, which
    /// matches how the device applies the request.
    #[must_use]
    pub fn value_of(&self, object: impl Into<ObjectRef>, property: PropertyId) -> Option<u64> {
        let object = object.into();
        self.assignments
            .iter()
            .rev()
            .find(|a| a.object == object && a.property == property)
            .map(|a| a.value)
    }
}

#[cfg(test)]
mod tests {
    use super::AtomicRequest;
    use crate::object::{CrtcId, ObjectRef, PlaneId, PropertyId};

    #[test]
    fn missing_property_is_rejected_without_touching_request() {
        let mut req = AtomicRequest::new();
        req.add(PlaneId(40), "FB_ID", Some(PropertyId(17)), 90)
            .unwrap();
        let failure = req.add(PlaneId(40), "ZPOS", None, 1).unwrap_err();

        assert_eq!(req.len(), 1);
        assert_eq!(failure.object, ObjectRef::Plane(PlaneId(40)));
        assert_eq!(failure.name, "ZPOS");
        assert_eq!(failure.value, 1);
    }

    #[test]
    fn assignments_keep_insertion_order() {
        let mut req = AtomicRequest::new();
        req.add(CrtcId(1), "PDAF_TYPE", Some(PropertyId(5)), 2)
            .unwrap();
        req.add(PlaneId(2), "CRTC_ID", Some(PropertyId(6)), 1)
            .unwrap();

        let objects: alloc::vec::Vec<_> = req.assignments().iter().map(|a| a.object).collect();
        assert_eq!(
            objects,
            [ObjectRef::Crtc(CrtcId(1)), ObjectRef::Plane(PlaneId(2))]
        );
    }

    #[test]
    fn value_of_returns_latest_assignment() {
        let mut req = AtomicRequest::new();
        req.add(PlaneId(2), "ZPOS", Some(PropertyId(9)), 0).unwrap();
        req.add(PlaneId(2), "ZPOS", Some(PropertyId(9)), 3).unwrap();
        assert_eq!(req.value_of(PlaneId(2), PropertyId(9)), Some(3));
        assert_eq!(req.value_of(PlaneId(3), PropertyId(9)), None);
    }
}
