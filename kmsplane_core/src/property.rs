// Copyright 2026 the Kmsplane Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Name-based property resolution.
//!
//! Display objects expose their controllable attributes as numbered
//! properties whose IDs differ between drivers and boots. The
//! [`PropertyResolver`] reads an object's property list, looks up each
//! property's name and keeps the ones this crate knows how to drive. Names
//! are compared exactly; anything unrecognised (vendor properties irrelevant
//! to a plane commit) is ignored.
//!
//! Property IDs are global within a device, so the ID → name lookup is
//! cached per [`ObjectKind`] and reused for every later object of that kind.

use alloc::vec::Vec;

use hashbrown::HashMap;

use crate::device::DisplayDevice;
use crate::error::ResolveError;
use crate::object::{ObjectKind, ObjectRef, PropertyId};

/// Property names, exactly as the kernel and vendor driver expose them.
pub mod names {
    /// CRTC: whether the pipeline is enabled.
    pub const ACTIVE: &str = "ACTIVE";
    /// CRTC: phase-detection autofocus data type.
    pub const PDAF_TYPE: &str = "PDAF_TYPE";
    /// CRTC: vendor work mode.
    pub const WORK_MODE: &str = "WORK_MODE";
    /// Connector and plane: bound CRTC.
    pub const CRTC_ID: &str = "CRTC_ID";
    /// Connector: vendor CSI transmit routing.
    pub const CSI_TX_PATH: &str = "CSI-TX-PATH";
    /// Plane: bound framebuffer.
    pub const FB_ID: &str = "FB_ID";
    /// Plane: source x, 16.16 fixed point.
    pub const SRC_X: &str = "SRC_X";
    /// Plane: source y, 16.16 fixed point.
    pub const SRC_Y: &str = "SRC_Y";
    /// Plane: source width, 16.16 fixed point.
    pub const SRC_W: &str = "SRC_W";
    /// Plane: source height, 16.16 fixed point.
    pub const SRC_H: &str = "SRC_H";
    /// Plane: destination x in pixels.
    pub const CRTC_X: &str = "CRTC_X";
    /// Plane: destination y in pixels.
    pub const CRTC_Y: &str = "CRTC_Y";
    /// Plane: destination width in pixels.
    pub const CRTC_W: &str = "CRTC_W";
    /// Plane: destination height in pixels.
    pub const CRTC_H: &str = "CRTC_H";
    /// Plane: stacking order.
    pub const ZPOS: &str = "ZPOS";
    /// Plane: vendor feature bits.
    pub const FEATURE: &str = "FEATURE";
}

/// Properties resolved on a CRTC.
pub const CRTC_PROPERTIES: &[&str] = &[names::ACTIVE, names::PDAF_TYPE, names::WORK_MODE];

/// Properties resolved on a connector.
pub const CONNECTOR_PROPERTIES: &[&str] = &[names::CRTC_ID, names::CSI_TX_PATH];

/// Properties resolved on a plane.
pub const PLANE_PROPERTIES: &[&str] = &[
    names::CRTC_ID,
    names::FB_ID,
    names::SRC_X,
    names::SRC_Y,
    names::SRC_W,
    names::SRC_H,
    names::CRTC_X,
    names::CRTC_Y,
    names::CRTC_W,
    names::CRTC_H,
    names::ZPOS,
    names::FEATURE,
];

/// Returns the property names resolved for objects of `kind`.
#[must_use]
pub const fn expected_names(kind: ObjectKind) -> &'static [&'static str] {
    match kind {
        ObjectKind::Crtc => CRTC_PROPERTIES,
        ObjectKind::Connector => CONNECTOR_PROPERTIES,
        ObjectKind::Plane => PLANE_PROPERTIES,
    }
}

/// A recognised property and its value at resolution time.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct Resolved {
    /// Property ID on this device.
    pub id: PropertyId,
    /// Value the object held when it was resolved.
    pub value: u64,
}

/// Recognised properties of one object, keyed by name.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PropertyMap {
    entries: HashMap<&'static str, Resolved>,
}

impl PropertyMap {
    /// ID of the named property, if the object exposes it.
    #[must_use]
    pub fn id(&self, name: &str) -> Option<PropertyId> {
        self.entries.get(name).map(|r| r.id)
    }

    /// Value of the named property at resolution time.
    #[must_use]
    pub fn value(&self, name: &str) -> Option<u64> {
        self.entries.get(name).map(|r| r.value)
    }

    /// Number of recognised properties.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns `true` when no expected property was found.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Iterates over `(name, resolved)` pairs in unspecified order.
    pub fn iter(&self) -> impl Iterator<Item = (&'static str, Resolved)> + '_ {
        self.entries.iter().map(|(&name, &resolved)| (name, resolved))
    }

    fn insert(&mut self, name: &'static str, resolved: Resolved) {
        self.entries.insert(name, resolved);
    }
}

/// Resolves property names to IDs, caching name lookups per object kind.
#[derive(Debug, Default)]
pub struct PropertyResolver {
    // `None` marks a property ID whose name is not one we drive.
    names: HashMap<ObjectKind, HashMap<PropertyId, Option<&'static str>>>,
}

impl PropertyResolver {
    /// Creates a resolver with empty caches.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Reads the property list of `object` and returns its recognised
    /// properties.
    ///
    /// Fails only when the property list itself cannot be read. A property
    /// whose name lookup fails is skipped and looked up again next time.
    pub fn resolve<D: DisplayDevice + ?Sized>(
        &mut self,
        device: &D,
        object: ObjectRef,
    ) -> Result<PropertyMap, ResolveError> {
        let entries = device
            .object_properties(object)
            .map_err(|source| ResolveError { object, source })?;

        let kind = object.kind();
        let expected = expected_names(kind);
        let cache = self.names.entry(kind).or_default();
        let mut map = PropertyMap::default();

        for entry in entries {
            let name = match cache.get(&entry.id) {
                Some(&cached) => cached,
                None => match device.property_name(entry.id) {
                    Ok(name) => {
                        let known = expected.iter().copied().find(|n| *n == name);
                        cache.insert(entry.id, known);
                        known
                    }
                    Err(err) => {
                        log::debug!("{object}: skipping property {:?}: {err}", entry.id);
                        continue;
                    }
                },
            };
            if let Some(name) = name {
                map.insert(
                    name,
                    Resolved {
                        id: entry.id,
                        value: entry.value,
                    },
                );
            }
        }

        Ok(map)
    }

    /// Number of cached name lookups for `kind`.
    #[must_use]
    pub fn cached_names(&self, kind: ObjectKind) -> usize {
        self.names.get(&kind).map_or(0, HashMap::len)
    }
}

/// Property IDs of a display pipeline.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct CrtcProperties {
    /// `ACTIVE`.
    pub active: Option<PropertyId>,
    /// `PDAF_TYPE`.
    pub pdaf_type: Option<PropertyId>,
    /// `WORK_MODE`.
    pub work_mode: Option<PropertyId>,
}

impl From<&PropertyMap> for CrtcProperties {
    fn from(map: &PropertyMap) -> Self {
        Self {
            active: map.id(names::ACTIVE),
            pdaf_type: map.id(names::PDAF_TYPE),
            work_mode: map.id(names::WORK_MODE),
        }
    }
}

/// Property IDs of a display output.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct ConnectorProperties {
    /// `CRTC_ID`.
    pub crtc_id: Option<PropertyId>,
    /// `CSI-TX-PATH`.
    pub csi_tx_path: Option<PropertyId>,
}

impl From<&PropertyMap> for ConnectorProperties {
    fn from(map: &PropertyMap) -> Self {
        Self {
            crtc_id: map.id(names::CRTC_ID),
            csi_tx_path: map.id(names::CSI_TX_PATH),
        }
    }
}

/// Property IDs of an overlay plane.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct PlaneProperties {
    /// `CRTC_ID`.
    pub crtc_id: Option<PropertyId>,
    /// `FB_ID`.
    pub fb_id: Option<PropertyId>,
    /// `SRC_X`.
    pub src_x: Option<PropertyId>,
    /// `SRC_Y`.
    pub src_y: Option<PropertyId>,
    /// `SRC_W`.
    pub src_w: Option<PropertyId>,
    /// `SRC_H`.
    pub src_h: Option<PropertyId>,
    /// `CRTC_X`.
    pub crtc_x: Option<PropertyId>,
    /// `CRTC_Y`.
    pub crtc_y: Option<PropertyId>,
    /// `CRTC_W`.
    pub crtc_w: Option<PropertyId>,
    /// `CRTC_H`.
    pub crtc_h: Option<PropertyId>,
    /// `ZPOS`.
    pub zpos: Option<PropertyId>,
    /// `FEATURE`.
    pub feature: Option<PropertyId>,
}

impl From<&PropertyMap> for PlaneProperties {
    fn from(map: &PropertyMap) -> Self {
        Self {
            crtc_id: map.id(names::CRTC_ID),
            fb_id: map.id(names::FB_ID),
            src_x: map.id(names::SRC_X),
            src_y: map.id(names::SRC_Y),
            src_w: map.id(names::SRC_W),
            src_h: map.id(names::SRC_H),
            crtc_x: map.id(names::CRTC_X),
            crtc_y: map.id(names::CRTC_Y),
            crtc_w: map.id(names::CRTC_W),
            crtc_h: map.id(names::CRTC_H),
            zpos: map.id(names::ZPOS),
            feature: map.id(names::FEATURE),
        }
    }
}

impl PlaneProperties {
    /// Lists the plane properties the object did not expose.
    #[must_use]
    pub fn missing(&self) -> Vec<&'static str> {
        [
            (names::CRTC_ID, self.crtc_id),
            (names::FB_ID, self.fb_id),
            (names::SRC_X, self.src_x),
            (names::SRC_Y, self.src_y),
            (names::SRC_W, self.src_w),
            (names::SRC_H, self.src_h),
            (names::CRTC_X, self.crtc_x),
            (names::CRTC_Y, self.crtc_y),
            (names::CRTC_W, self.crtc_w),
            (names::CRTC_H, self.crtc_h),
            (names::ZPOS, self.zpos),
            (names::FEATURE, self.feature),
        ]
        .into_iter()
        .filter_map(|(name, id)| id.is_none().then_some(name))
        .collect()
    }
}
