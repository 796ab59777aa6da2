// Copyright 2026 the Kmsplane Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Backend contract for display hardware.
//!
//! Hardware access is split into two collaborators, both implemented by a
//! backend crate:
//!
//! - **Device channel**, [`DisplayDevice`]: enumeration of CRTCs,
//!   connectors and planes, property lists, framebuffer registration, atomic
//!   commits and the separate modeset. Every call is synchronous; the caller
//!   is suspended until the hardware has answered.
//!
//! - **Allocator channel**, [`BufferAllocator`]: creation or import of
//!   scanout-capable buffers, scoped CPU mappings, and release.
//!
//! A backend usually implements both on the same open device node. Both
//! traits take `&self`: the device handle is a session object shared by
//! reference between stages rather than ambient global state.
//!
//! # Crate boundaries
//!
//! `kmsplane_core` owns the data model and the sequencing of discovery,
//! framebuffer construction and commit. Backend crates translate these
//! calls into ioctls. Application code opens the backend session and wires
//! the stages together:
//!
//! ```rust,ignore
//! let card = Card::open_driver("rockchip")?;
//! let discovery = Discovery::discover(&card)?;
//! let frame = FrameBuilder::new(&card, &card).build(&spec, &mut file)?;
//! let assignments = discovery.assign(core::slice::from_ref(&frame))?;
//! let report = commit(&card, &discovery.crtc, &discovery.connector, &assignments, flags);
//! // wait for the commit to retire, then:
//! frame.release(&card, &card)?;
//! ```

use alloc::string::String;
use alloc::vec::Vec;
use core::ops::DerefMut;
use core::time::Duration;

use crate::atomic::{AtomicRequest, CommitFlags};
use crate::error::{AllocationError, DeviceError};
use crate::format::{BufferLayout, PixelFormat};
use crate::object::{BufferHandle, ConnectorId, CrtcId, FramebufferId, ObjectRef, PlaneId, PropertyId};

/// A display timing mode supported by a connector.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct DisplayMode {
    /// Mode name (e.g. `"1920x1080"`).
    pub name: String,
    /// Horizontal active pixels.
    pub width: u16,
    /// Vertical active lines.
    pub height: u16,
    /// Vertical refresh rate in Hz.
    pub refresh: u32,
    /// Position in the connector's mode list.
    pub index: usize,
}

/// One entry of an object's property list.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct PropertyEntry {
    /// Property ID.
    pub id: PropertyId,
    /// Current raw value on the object.
    pub value: u64,
}

/// Everything needed to register a single-plane framebuffer.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct FramebufferDesc {
    /// Width in pixels.
    pub width: u32,
    /// Height in pixels.
    pub height: u32,
    /// Pixel format.
    pub format: PixelFormat,
    /// Handle of the backing buffer.
    pub handle: BufferHandle,
    /// Row pitch in bytes.
    pub pitch: u32,
    /// Offset of the first pixel in bytes.
    pub offset: u32,
    /// Format modifier; `None` registers without modifiers.
    pub modifier: Option<u64>,
}

/// Completion of a page flip requested with
/// [`CommitFlags::page_flip_event`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct PageFlip {
    /// CRTC whose update completed.
    pub crtc: CrtcId,
    /// Vertical blank counter at completion.
    pub sequence: u32,
    /// Completion time on the device's monotonic clock.
    pub timestamp: Duration,
}

/// Synchronous request/response channel to the display controller.
pub trait DisplayDevice {
    /// Lists every CRTC in enumeration order.
    fn crtcs(&self) -> Result<Vec<CrtcId>, DeviceError>;

    /// Lists every connector in enumeration order.
    fn connectors(&self) -> Result<Vec<ConnectorId>, DeviceError>;

    /// Lists every plane in enumeration order.
    fn planes(&self) -> Result<Vec<PlaneId>, DeviceError>;

    /// Returns the timing modes a connector supports, preferred first.
    fn connector_modes(&self, connector: ConnectorId) -> Result<Vec<DisplayMode>, DeviceError>;

    /// Returns the property IDs and current values of an object.
    fn object_properties(&self, object: ObjectRef) -> Result<Vec<PropertyEntry>, DeviceError>;

    /// Returns the name of a property.
    fn property_name(&self, property: PropertyId) -> Result<String, DeviceError>;

    /// Returns the advertised `(min, max)` of a range property, or `None`
    /// when the property is not a range.
    fn property_range(&self, property: PropertyId) -> Result<Option<(u64, u64)>, DeviceError>;

    /// Registers a framebuffer.
    fn add_framebuffer(&self, desc: &FramebufferDesc) -> Result<FramebufferId, DeviceError>;

    /// Deregisters a framebuffer.
    fn remove_framebuffer(&self, framebuffer: FramebufferId) -> Result<(), DeviceError>;

    /// Applies every assignment of `request` as one indivisible update.
    fn atomic_commit(&self, request: &AtomicRequest, flags: CommitFlags) -> Result<(), DeviceError>;

    /// Binds `crtc` to `connector` with `mode`, scanning out `framebuffer`.
    ///
    /// This is the separate timing configuration step; atomic commits never
    /// change the mode.
    fn set_mode(
        &self,
        crtc: CrtcId,
        connector: ConnectorId,
        mode: &DisplayMode,
        framebuffer: FramebufferId,
    ) -> Result<(), DeviceError>;

    /// Blocks until a page flip completes on `crtc`.
    ///
    /// Only commits submitted with [`CommitFlags::page_flip_event`] produce
    /// flips. Fails with `ETIMEDOUT` when nothing arrives within `timeout`.
    fn wait_page_flip(&self, crtc: CrtcId, timeout: Duration) -> Result<PageFlip, DeviceError>;
}

/// What to allocate.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct AllocRequest {
    /// Geometry derived from the image size and format.
    pub layout: BufferLayout,
    /// Pixel format.
    pub format: PixelFormat,
    /// Backend-specific allocation flags.
    pub flags: u32,
    /// Existing allocation to import instead of creating a new one.
    pub external_fd: Option<i32>,
}

/// Allocator for scanout-capable memory.
pub trait BufferAllocator {
    /// Backend representation of one allocation, including its exported
    /// process handle.
    type Buffer;

    /// CPU view of a buffer. Dropping it unmaps.
    type Mapping<'a>: DerefMut<Target = [u8]>
    where
        Self: 'a;

    /// Creates a new allocation, or imports `request.external_fd` when set.
    ///
    /// An import failure must be reported as
    /// [`AllocationError::ImportFailed`]; it must never fall back to a fresh
    /// allocation.
    fn allocate(&self, request: &AllocRequest) -> Result<Self::Buffer, AllocationError>;

    /// Device-local handle used to register the buffer as a framebuffer.
    fn handle(&self, buffer: &Self::Buffer) -> BufferHandle;

    /// Maps the buffer for CPU writes until the mapping is dropped.
    fn map<'a>(&'a self, buffer: &'a mut Self::Buffer) -> Result<Self::Mapping<'a>, AllocationError>;

    /// Releases the exported process handle, then the allocation itself.
    fn free(&self, buffer: Self::Buffer) -> Result<(), AllocationError>;
}
