// Copyright 2026 the Kmsplane Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! [`DisplayDevice`] over the DRM mode-setting ioctls.

use core::time::Duration;

use drm::buffer::{self, DrmFourcc, DrmModifier, PlanarBuffer};
use drm::control::{
    AtomicCommitFlags, Device as ControlDevice, FbCmd2Flags, Mode, RawResourceHandle,
    atomic::AtomicModeReq, connector, crtc, framebuffer, from_u32, plane, property,
};
use kmsplane_core::atomic::{AtomicRequest, CommitFlags};
use kmsplane_core::device::{DisplayDevice, DisplayMode, FramebufferDesc, PageFlip, PropertyEntry};
use kmsplane_core::error::{DeviceError, EINVAL};
use kmsplane_core::format::PixelFormat;
use kmsplane_core::object::{ConnectorId, CrtcId, FramebufferId, ObjectRef, PlaneId, PropertyId};

use crate::card::{Card, errno};

pub(crate) fn raw(handle: impl Into<RawResourceHandle>) -> u32 {
    handle.into().get()
}

pub(crate) fn handle<H: From<RawResourceHandle>>(op: &'static str, id: u32) -> Result<H, DeviceError> {
    from_u32(id).ok_or(DeviceError::new(op, EINVAL))
}

pub(crate) fn io_err(op: &'static str) -> impl FnOnce(std::io::Error) -> DeviceError {
    move |err| DeviceError::new(op, errno(&err)).with_description(err.to_string())
}

/// Bounds of a range property. Negative signed bounds clamp to zero.
fn range_bounds(value_type: &property::ValueType) -> Option<(u64, u64)> {
    match *value_type {
        property::ValueType::UnsignedRange(min, max) => Some((min, max)),
        property::ValueType::SignedRange(min, max) => Some((
            u64::try_from(min).unwrap_or(0),
            u64::try_from(max).unwrap_or(0),
        )),
        _ => None,
    }
}

/// Maps a fourcc onto `DrmFourcc`. Codes the `drm` crate does not know are
/// rejected with `EINVAL` before any ioctl.
fn drm_fourcc(format: PixelFormat) -> Result<DrmFourcc, DeviceError> {
    DrmFourcc::try_from(format.code()).map_err(|_| {
        DeviceError::new("add framebuffer", EINVAL)
            .with_description(format!("unsupported fourcc {format:?}"))
    })
}

/// Framebuffer description in the shape `drmModeAddFB2WithModifiers` expects.
struct PlanarDesc {
    size: (u32, u32),
    format: DrmFourcc,
    modifier: Option<DrmModifier>,
    handle: buffer::Handle,
    pitch: u32,
    offset: u32,
}

impl PlanarBuffer for PlanarDesc {
    fn size(&self) -> (u32, u32) {
        self.size
    }

    fn format(&self) -> DrmFourcc {
        self.format
    }

    fn modifier(&self) -> Option<DrmModifier> {
        self.modifier
    }

    fn pitches(&self) -> [u32; 4] {
        [self.pitch, 0, 0, 0]
    }

    fn handles(&self) -> [Option<buffer::Handle>; 4] {
        [Some(self.handle), None, None, None]
    }

    fn offsets(&self) -> [u32; 4] {
        [self.offset, 0, 0, 0]
    }
}

fn display_mode(index: usize, mode: &Mode) -> DisplayMode {
    let (width, height) = mode.size();
    DisplayMode {
        name: mode.name().to_string_lossy().into_owned(),
        width,
        height,
        refresh: mode.vrefresh(),
        index,
    }
}

impl Card {
    fn mode_for(&self, connector: connector::Handle, mode: &DisplayMode) -> Result<Mode, DeviceError> {
        let info = self
            .get_connector(connector, false)
            .map_err(io_err("get connector"))?;
        info.modes()
            .get(mode.index)
            .copied()
            .filter(|m| display_mode(mode.index, m) == *mode)
            .ok_or(DeviceError::new("set crtc", EINVAL))
    }

    fn add_to_request(
        req: &mut AtomicModeReq,
        object: ObjectRef,
        property: property::Handle,
        value: u64,
    ) -> Result<(), DeviceError> {
        const OP: &str = "atomic commit";
        let value = property::Value::UnsignedRange(value);
        match object {
            ObjectRef::Crtc(id) => {
                req.add_property(handle::<crtc::Handle>(OP, id.get())?, property, value);
            }
            ObjectRef::Connector(id) => {
                req.add_property(handle::<connector::Handle>(OP, id.get())?, property, value);
            }
            ObjectRef::Plane(id) => {
                req.add_property(handle::<plane::Handle>(OP, id.get())?, property, value);
            }
        }
        Ok(())
    }
}

impl DisplayDevice for Card {
    fn crtcs(&self) -> Result<Vec<CrtcId>, DeviceError> {
        let res = self.resource_handles().map_err(io_err("get resources"))?;
        Ok(res.crtcs().iter().map(|&h| CrtcId(raw(h))).collect())
    }

    fn connectors(&self) -> Result<Vec<ConnectorId>, DeviceError> {
        let res = self.resource_handles().map_err(io_err("get resources"))?;
        Ok(res.connectors().iter().map(|&h| ConnectorId(raw(h))).collect())
    }

    fn planes(&self) -> Result<Vec<PlaneId>, DeviceError> {
        let planes = self.plane_handles().map_err(io_err("get plane resources"))?;
        Ok(planes.into_iter().map(|h| PlaneId(raw(h))).collect())
    }

    fn connector_modes(&self, connector: ConnectorId) -> Result<Vec<DisplayMode>, DeviceError> {
        let conn: connector::Handle = handle("get connector", connector.get())?;
        let info = self
            .get_connector(conn, false)
            .map_err(io_err("get connector"))?;
        Ok(info
            .modes()
            .iter()
            .enumerate()
            .map(|(index, mode)| display_mode(index, mode))
            .collect())
    }

    fn object_properties(&self, object: ObjectRef) -> Result<Vec<PropertyEntry>, DeviceError> {
        const OP: &str = "get object properties";
        let set = match object {
            ObjectRef::Crtc(id) => self.get_properties(handle::<crtc::Handle>(OP, id.get())?),
            ObjectRef::Connector(id) => {
                self.get_properties(handle::<connector::Handle>(OP, id.get())?)
            }
            ObjectRef::Plane(id) => self.get_properties(handle::<plane::Handle>(OP, id.get())?),
        }
        .map_err(io_err(OP))?;
        let (ids, values) = set.as_props_and_values();
        Ok(ids
            .iter()
            .zip(values)
            .map(|(&id, &value)| PropertyEntry {
                id: PropertyId(raw(id)),
                value,
            })
            .collect())
    }

    fn property_name(&self, property: PropertyId) -> Result<String, DeviceError> {
        let prop: property::Handle = handle("get property", property.get())?;
        let info = self.get_property(prop).map_err(io_err("get property"))?;
        Ok(info.name().to_string_lossy().into_owned())
    }

    fn property_range(&self, property: PropertyId) -> Result<Option<(u64, u64)>, DeviceError> {
        let prop: property::Handle = handle("get property", property.get())?;
        let info = self.get_property(prop).map_err(io_err("get property"))?;
        Ok(range_bounds(&info.value_type()))
    }

    fn add_framebuffer(&self, desc: &FramebufferDesc) -> Result<FramebufferId, DeviceError> {
        const OP: &str = "add framebuffer";
        let format = drm_fourcc(desc.format)?;
        let planar = PlanarDesc {
            size: (desc.width, desc.height),
            format,
            modifier: desc.modifier.map(DrmModifier::from),
            handle: handle(OP, desc.handle.get())?,
            pitch: desc.pitch,
            offset: desc.offset,
        };
        let flags = if planar.modifier.is_some() {
            FbCmd2Flags::MODIFIERS
        } else {
            FbCmd2Flags::empty()
        };
        let fb = self
            .add_planar_framebuffer(&planar, flags)
            .map_err(io_err(OP))?;
        Ok(FramebufferId(raw(fb)))
    }

    fn remove_framebuffer(&self, framebuffer: FramebufferId) -> Result<(), DeviceError> {
        let fb: framebuffer::Handle = handle("remove framebuffer", framebuffer.get())?;
        self.destroy_framebuffer(fb)
            .map_err(io_err("remove framebuffer"))
    }

    fn atomic_commit(&self, request: &AtomicRequest, flags: CommitFlags) -> Result<(), DeviceError> {
        let mut req = AtomicModeReq::new();
        for assignment in request.assignments() {
            let property: property::Handle = handle("atomic commit", assignment.property.get())?;
            Self::add_to_request(&mut req, assignment.object, property, assignment.value)?;
        }
        let mut commit_flags = AtomicCommitFlags::empty();
        if flags.page_flip_event {
            commit_flags |= AtomicCommitFlags::PAGE_FLIP_EVENT;
        }
        ControlDevice::atomic_commit(self, commit_flags, req).map_err(io_err("atomic commit"))
    }

    fn set_mode(
        &self,
        crtc: CrtcId,
        connector: ConnectorId,
        mode: &DisplayMode,
        framebuffer: FramebufferId,
    ) -> Result<(), DeviceError> {
        const OP: &str = "set crtc";
        let connector: connector::Handle = handle(OP, connector.get())?;
        let mode = self.mode_for(connector, mode)?;
        self.set_crtc(
            handle(OP, crtc.get())?,
            Some(handle(OP, framebuffer.get())?),
            (0, 0),
            &[connector],
            Some(mode),
        )
        .map_err(io_err(OP))
    }

    fn wait_page_flip(&self, crtc: CrtcId, timeout: Duration) -> Result<PageFlip, DeviceError> {
        self.wait_flip(crtc, timeout)
    }
}
