// Copyright 2026 the Kmsplane Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Display resource discovery.
//!
//! [`Discovery::discover`] walks the device's CRTCs, connectors and planes:
//!
//! - the first CRTC whose properties resolve becomes the pipeline,
//! - the first connector whose properties resolve and that offers at least
//!   one mode becomes the output (its first mode is recorded),
//! - every plane whose properties resolve is kept, in enumeration order,
//!   together with its stacking-order value and scaling capability.
//!
//! Selection is "first usable", not "best match": the only requirement is
//! that the same hardware state always yields the same selection.

use alloc::vec::Vec;

use crate::device::{DisplayDevice, DisplayMode};
use crate::error::DiscoveryError;
use crate::frame::Framebuffer;
use crate::object::{ConnectorId, CrtcId, ObjectRef, PlaneId};
use crate::property::{
    ConnectorProperties, CrtcProperties, PlaneProperties, PropertyMap, PropertyResolver, names,
};

/// Bit of the `FEATURE` property that advertises scaling support.
pub const FEATURE_SCALE: u64 = 0x1;

/// The selected display pipeline.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct DisplayPipeline {
    /// CRTC ID.
    pub id: CrtcId,
    /// Resolved property IDs.
    pub properties: CrtcProperties,
}

/// The selected display output.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct DisplayOutput {
    /// Connector ID.
    pub id: ConnectorId,
    /// Resolved property IDs.
    pub properties: ConnectorProperties,
    /// First mode advertised by the connector.
    pub mode: DisplayMode,
}

/// An overlay plane and its capabilities.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct OverlayPlane {
    /// Plane ID.
    pub id: PlaneId,
    /// Resolved property IDs.
    pub properties: PlaneProperties,
    /// Upper bound of the `ZPOS` range, if exposed.
    pub zpos_max: Option<u64>,
    /// Whether `FEATURE` advertises scaling.
    pub supports_scale: bool,
}

/// A plane paired with the framebuffer it will show.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct PlaneAssignment {
    /// Target plane.
    pub plane: OverlayPlane,
    /// Framebuffer to scan out.
    pub framebuffer: Framebuffer,
}

/// Result of resource discovery.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Discovery {
    /// Selected pipeline.
    pub crtc: DisplayPipeline,
    /// Selected output.
    pub connector: DisplayOutput,
    /// Usable planes in enumeration order.
    pub planes: Vec<OverlayPlane>,
}

impl Discovery {
    /// Discovers targets with a fresh [`PropertyResolver`].
    pub fn discover<D: DisplayDevice + ?Sized>(device: &D) -> Result<Self, DiscoveryError> {
        Self::discover_with(device, &mut PropertyResolver::new())
    }

    /// Discovers targets, reusing the caches of `resolver`.
    pub fn discover_with<D: DisplayDevice + ?Sized>(
        device: &D,
        resolver: &mut PropertyResolver,
    ) -> Result<Self, DiscoveryError> {
        let crtc = select_crtc(device, resolver)?;
        let connector = select_connector(device, resolver)?;
        let planes = collect_planes(device, resolver)?;

        log::info!(
            "using crtc {} and connector {} ({}x{}@{}), {} planes",
            crtc.id,
            connector.id,
            connector.mode.width,
            connector.mode.height,
            connector.mode.refresh,
            planes.len()
        );

        Ok(Self {
            crtc,
            connector,
            planes,
        })
    }

    /// Pairs framebuffers with planes in order: the first framebuffer goes
    /// on the first plane, and so on.
    ///
    /// The number of images is bounded by the planes actually discovered.
    pub fn assign(
        &self,
        framebuffers: &[Framebuffer],
    ) -> Result<Vec<PlaneAssignment>, DiscoveryError> {
        if framebuffers.len() > self.planes.len() {
            return Err(DiscoveryError::NotEnoughPlanes {
                requested: framebuffers.len(),
                available: self.planes.len(),
            });
        }
        Ok(self
            .planes
            .iter()
            .zip(framebuffers)
            .map(|(&plane, &framebuffer)| PlaneAssignment { plane, framebuffer })
            .collect())
    }
}

fn select_crtc<D: DisplayDevice + ?Sized>(
    device: &D,
    resolver: &mut PropertyResolver,
) -> Result<DisplayPipeline, DiscoveryError> {
    for id in device.crtcs()? {
        match resolver.resolve(device, ObjectRef::Crtc(id)) {
            Ok(map) => {
                return Ok(DisplayPipeline {
                    id,
                    properties: CrtcProperties::from(&map),
                });
            }
            Err(err) => log::warn!("{err}"),
        }
    }
    Err(DiscoveryError::NoUsableTarget { what: "crtc" })
}

fn select_connector<D: DisplayDevice + ?Sized>(
    device: &D,
    resolver: &mut PropertyResolver,
) -> Result<DisplayOutput, DiscoveryError> {
    for id in device.connectors()? {
        let map = match resolver.resolve(device, ObjectRef::Connector(id)) {
            Ok(map) => map,
            Err(err) => {
                log::warn!("{err}");
                continue;
            }
        };
        let mode = match device.connector_modes(id) {
            Ok(modes) => modes.into_iter().next(),
            Err(err) => {
                log::warn!("connector {id}: {err}");
                continue;
            }
        };
        let Some(mode) = mode else {
            log::debug!("connector {id} has no modes");
            continue;
        };
        return Ok(DisplayOutput {
            id,
            properties: ConnectorProperties::from(&map),
            mode,
        });
    }
    Err(DiscoveryError::NoUsableTarget { what: "connector" })
}

fn collect_planes<D: DisplayDevice + ?Sized>(
    device: &D,
    resolver: &mut PropertyResolver,
) -> Result<Vec<OverlayPlane>, DiscoveryError> {
    let mut planes = Vec::new();
    for id in device.planes()? {
        let map = match resolver.resolve(device, ObjectRef::Plane(id)) {
            Ok(map) => map,
            Err(err) => {
                log::warn!("{err}");
                continue;
            }
        };
        let plane = OverlayPlane {
            id,
            properties: PlaneProperties::from(&map),
            zpos_max: zpos_bound(device, &map),
            supports_scale: map
                .value(names::FEATURE)
                .is_some_and(|feature| feature & FEATURE_SCALE != 0),
        };
        log::debug!(
            "plane {id}: zpos max {:?}, scale {}",
            plane.zpos_max,
            plane.supports_scale
        );
        let missing = plane.properties.missing();
        if !missing.is_empty() {
            log::debug!("plane {id} lacks {missing:?}");
        }
        planes.push(plane);
    }
    Ok(planes)
}

/// Upper bound of a plane's `ZPOS` range. Drivers that do not advertise a
/// range fall back to the current value.
fn zpos_bound<D: DisplayDevice + ?Sized>(device: &D, map: &PropertyMap) -> Option<u64> {
    let id = map.id(names::ZPOS)?;
    match device.property_range(id) {
        Ok(Some((_, max))) => Some(max),
        Ok(None) => map.value(names::ZPOS),
        Err(err) => {
            log::warn!("zpos range: {err}");
            map.value(names::ZPOS)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::Discovery;
    use crate::error::DiscoveryError;
    use crate::fake::FakeDevice;
    use crate::format::PixelFormat;
    use crate::frame::Framebuffer;
    use crate::object::{ConnectorId, CrtcId, FramebufferId, ObjectKind, ObjectRef, PlaneId};
    use crate::property::names;

    fn framebuffer(id: u32) -> Framebuffer {
        Framebuffer {
            id: FramebufferId(id),
            width: 64,
            height: 64,
            format: PixelFormat::XBGR8888,
            modifier: None,
        }
    }

    #[test]
    fn selects_first_usable_crtc_and_connector() {
        let device = FakeDevice::rockchip_like(2, 2, 3);
        let discovery = Discovery::discover(&device).unwrap();

        assert_eq!(discovery.crtc.id, CrtcId(device.crtc_ids()[0]));
        assert_eq!(
            discovery.connector.id,
            ConnectorId(device.connector_ids()[0])
        );
        assert_eq!(discovery.connector.mode.index, 0);
        assert_eq!(discovery.planes.len(), 3);
    }

    #[test]
    fn skips_crtc_whose_properties_cannot_be_read() {
        let device = FakeDevice::rockchip_like(2, 1, 1);
        let first = CrtcId(device.crtc_ids()[0]);
        device.fail_properties_of(ObjectRef::Crtc(first));

        let discovery = Discovery::discover(&device).unwrap();
        assert_eq!(discovery.crtc.id, CrtcId(device.crtc_ids()[1]));
    }

    #[test]
    fn skips_connector_without_modes() {
        let device = FakeDevice::rockchip_like(1, 2, 1);
        device.clear_modes(ConnectorId(device.connector_ids()[0]));

        let discovery = Discovery::discover(&device).unwrap();
        assert_eq!(
            discovery.connector.id,
            ConnectorId(device.connector_ids()[1])
        );
    }

    #[test]
    fn no_usable_connector_is_fatal() {
        let device = FakeDevice::rockchip_like(1, 1, 1);
        device.clear_modes(ConnectorId(device.connector_ids()[0]));

        let err = Discovery::discover(&device).unwrap_err();
        assert_eq!(err, DiscoveryError::NoUsableTarget { what: "connector" });
        assert_eq!(err.code(), crate::error::ENODEV);
    }

    #[test]
    fn no_usable_crtc_is_fatal() {
        let device = FakeDevice::rockchip_like(1, 1, 1);
        device.fail_properties_of(ObjectRef::Crtc(CrtcId(device.crtc_ids()[0])));

        assert_eq!(
            Discovery::discover(&device).unwrap_err(),
            DiscoveryError::NoUsableTarget { what: "crtc" }
        );
    }

    #[test]
    fn plane_capabilities_are_captured() {
        let device = FakeDevice::rockchip_like(1, 1, 2);
        let discovery = Discovery::discover(&device).unwrap();

        assert_eq!(discovery.planes[0].zpos_max, Some(1));
        assert!(!discovery.planes[0].supports_scale);
        assert_eq!(discovery.planes[1].zpos_max, Some(1));
        assert!(discovery.planes[1].supports_scale);
    }

    #[test]
    fn zpos_bound_is_the_advertised_range_not_the_current_value() {
        let device = FakeDevice::rockchip_like(1, 1, 4);
        let discovery = Discovery::discover(&device).unwrap();

        let bounds: alloc::vec::Vec<_> = discovery.planes.iter().map(|p| p.zpos_max).collect();
        assert_eq!(bounds, [Some(3); 4]);
    }

    #[test]
    fn hidden_zpos_has_no_bound() {
        let device = FakeDevice::rockchip_like(1, 1, 2);
        device.hide_property(ObjectKind::Plane, names::ZPOS);
        let discovery = Discovery::discover(&device).unwrap();

        assert!(discovery.planes.iter().all(|p| p.zpos_max.is_none()));
    }

    #[test]
    fn unreadable_plane_is_skipped() {
        let device = FakeDevice::rockchip_like(1, 1, 3);
        let broken = PlaneId(device.plane_ids()[1]);
        device.fail_properties_of(ObjectRef::Plane(broken));

        let discovery = Discovery::discover(&device).unwrap();
        let ids: alloc::vec::Vec<_> = discovery.planes.iter().map(|p| p.id).collect();
        assert_eq!(
            ids,
            [PlaneId(device.plane_ids()[0]), PlaneId(device.plane_ids()[2])]
        );
    }

    #[test]
    fn assignment_is_bounded_by_discovered_planes() {
        let device = FakeDevice::rockchip_like(1, 1, 2);
        let discovery = Discovery::discover(&device).unwrap();

        let pairs = discovery.assign(&[framebuffer(1), framebuffer(2)]).unwrap();
        assert_eq!(pairs[0].plane.id, discovery.planes[0].id);
        assert_eq!(pairs[1].framebuffer.id, FramebufferId(2));

        let err = discovery
            .assign(&[framebuffer(1), framebuffer(2), framebuffer(3)])
            .unwrap_err();
        assert_eq!(
            err,
            DiscoveryError::NotEnoughPlanes {
                requested: 3,
                available: 2
            }
        );
    }
}
