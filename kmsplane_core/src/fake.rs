// Copyright 2026 the Kmsplane Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! In-memory device and allocator.
//!
//! [`FakeDevice`] models a display controller with a vendor property set
//! (`PDAF_TYPE`, `WORK_MODE`, `CSI-TX-PATH`, `FEATURE`) plus a few
//! unrelated properties. [`FakeAllocator`] hands out heap-backed buffers.
//! Both append every state-changing call to a shared [`Journal`] so tests
//! can assert on ordering across the two.
//!
//! The device validates what it is given the way the kernel does: unknown
//! framebuffers are refused, and a commit that references an unregistered
//! framebuffer fails as a whole.

use alloc::rc::Rc;
use alloc::string::{String, ToString};
use alloc::vec::Vec;
use core::cell::{RefCell, RefMut};
use core::time::Duration;

use hashbrown::HashMap;

use crate::atomic::{AtomicRequest, CommitFlags};
use crate::device::{
    AllocRequest, BufferAllocator, DisplayDevice, DisplayMode, FramebufferDesc, PageFlip,
    PropertyEntry,
};
use crate::error::{AllocationError, DeviceError, EINVAL, ETIMEDOUT};
use crate::object::{
    BufferHandle, ConnectorId, CrtcId, FramebufferId, ObjectKind, ObjectRef, PlaneId, PropertyId,
};
use crate::property::names;

const ENOENT: i32 = 2;
const EIO: i32 = 5;

const CRTC_BASE: u32 = 60;
const CONNECTOR_BASE: u32 = 150;
const PLANE_BASE: u32 = 200;
const FRAMEBUFFER_BASE: u32 = 500;

/// A state-changing call observed by the fakes.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum Call {
    /// A framebuffer was registered.
    AddFramebuffer(FramebufferId),
    /// A framebuffer was deregistered.
    RemoveFramebuffer(FramebufferId),
    /// An atomic request with this many assignments was submitted.
    AtomicCommit(usize),
    /// A modeset was performed.
    SetMode(CrtcId, ConnectorId, FramebufferId),
    /// A page flip on this CRTC was waited for.
    WaitPageFlip(CrtcId),
    /// A buffer was allocated.
    Allocate(BufferHandle),
    /// A buffer was imported from an external handle.
    Import(BufferHandle),
    /// A buffer's exported process handle was closed.
    CloseExport(i32),
    /// A buffer was freed.
    Free(BufferHandle),
}

/// Shared, ordered record of [`Call`]s.
pub type Journal = Rc<RefCell<Vec<Call>>>;

struct PropertyDef {
    id: PropertyId,
    name: &'static str,
}

const fn def(id: u32, name: &'static str) -> PropertyDef {
    PropertyDef {
        id: PropertyId(id),
        name,
    }
}

static CRTC_DEFS: [PropertyDef; 4] = [
    def(1, names::ACTIVE),
    def(2, names::PDAF_TYPE),
    def(3, names::WORK_MODE),
    def(4, "GAMMA_LUT"),
];

static CONNECTOR_DEFS: [PropertyDef; 3] = [
    def(10, "DPMS"),
    def(11, names::CRTC_ID),
    def(12, names::CSI_TX_PATH),
];

static PLANE_DEFS: [PropertyDef; 13] = [
    def(20, "type"),
    def(21, names::FB_ID),
    def(22, names::CRTC_ID),
    def(23, names::SRC_X),
    def(24, names::SRC_Y),
    def(25, names::SRC_W),
    def(26, names::SRC_H),
    def(27, names::CRTC_X),
    def(28, names::CRTC_Y),
    def(29, names::CRTC_W),
    def(30, names::CRTC_H),
    def(31, names::ZPOS),
    def(32, names::FEATURE),
];

#[derive(Default)]
struct DeviceState {
    failing: Vec<ObjectRef>,
    hidden: Vec<(ObjectKind, &'static str)>,
    modes: HashMap<ConnectorId, Vec<DisplayMode>>,
    framebuffers: HashMap<FramebufferId, FramebufferDesc>,
    next_framebuffer: u32,
    fail_next_framebuffer: Option<i32>,
    fail_next_commit: Option<i32>,
    withhold_flips: bool,
    property_name_calls: usize,
    commits: Vec<(AtomicRequest, CommitFlags)>,
    pending_flips: Vec<PageFlip>,
    flip_sequence: u32,
}

/// In-memory display controller.
pub struct FakeDevice {
    crtcs: Vec<u32>,
    connectors: Vec<u32>,
    planes: Vec<u32>,
    state: RefCell<DeviceState>,
    journal: Journal,
}

impl core::fmt::Debug for FakeDevice {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("FakeDevice")
            .field("crtcs", &self.crtcs)
            .field("connectors", &self.connectors)
            .field("planes", &self.planes)
            .finish_non_exhaustive()
    }
}

impl FakeDevice {
    /// Creates a device with the given number of CRTCs, connectors and
    /// planes. Every connector offers a single 1920x1080@60 mode; plane `i`
    /// reports `ZPOS = i` and `FEATURE = i % 2`. `ZPOS` advertises the range
    /// `0..=planes - 1`.
    #[must_use]
    pub fn rockchip_like(crtcs: u32, connectors: u32, planes: u32) -> Self {
        let connector_ids: Vec<u32> = (0..connectors).map(|i| CONNECTOR_BASE + i).collect();
        let modes = connector_ids
            .iter()
            .map(|&id| {
                (
                    ConnectorId(id),
                    alloc::vec![DisplayMode {
                        name: "1920x1080".to_string(),
                        width: 1920,
                        height: 1080,
                        refresh: 60,
                        index: 0,
                    }],
                )
            })
            .collect();
        Self {
            crtcs: (0..crtcs).map(|i| CRTC_BASE + i).collect(),
            connectors: connector_ids,
            planes: (0..planes).map(|i| PLANE_BASE + i).collect(),
            state: RefCell::new(DeviceState {
                modes,
                next_framebuffer: FRAMEBUFFER_BASE,
                ..DeviceState::default()
            }),
            journal: Journal::default(),
        }
    }

    /// Raw CRTC IDs in enumeration order.
    #[must_use]
    pub fn crtc_ids(&self) -> Vec<u32> {
        self.crtcs.clone()
    }

    /// Raw connector IDs in enumeration order.
    #[must_use]
    pub fn connector_ids(&self) -> Vec<u32> {
        self.connectors.clone()
    }

    /// Raw plane IDs in enumeration order.
    #[must_use]
    pub fn plane_ids(&self) -> Vec<u32> {
        self.planes.clone()
    }

    /// The call journal; share it with a [`FakeAllocator`] to interleave
    /// allocator calls.
    #[must_use]
    pub fn journal(&self) -> Journal {
        Rc::clone(&self.journal)
    }

    /// Snapshot of the call journal.
    #[must_use]
    pub fn calls(&self) -> Vec<Call> {
        self.journal.borrow().clone()
    }

    /// Makes reading the property list of `object` fail with `EIO`.
    pub fn fail_properties_of(&self, object: ObjectRef) {
        self.state.borrow_mut().failing.push(object);
    }

    /// Removes the named property from every object of `kind`.
    pub fn hide_property(&self, kind: ObjectKind, name: &'static str) {
        self.state.borrow_mut().hidden.push((kind, name));
    }

    /// Removes every mode of `connector`.
    pub fn clear_modes(&self, connector: ConnectorId) {
        if let Some(modes) = self.state.borrow_mut().modes.get_mut(&connector) {
            modes.clear();
        }
    }

    /// Makes the next framebuffer registration fail with `code`.
    pub fn fail_next_framebuffer(&self, code: i32) {
        self.state.borrow_mut().fail_next_framebuffer = Some(code);
    }

    /// Makes the next atomic commit fail with `code`.
    pub fn fail_next_commit(&self, code: i32) {
        self.state.borrow_mut().fail_next_commit = Some(code);
    }

    /// Stops delivering page-flip events; waits time out from now on.
    pub fn withhold_page_flips(&self) {
        self.state.borrow_mut().withhold_flips = true;
    }

    /// Number of property name lookups served.
    #[must_use]
    pub fn property_name_calls(&self) -> usize {
        self.state.borrow().property_name_calls
    }

    /// Number of properties listed for `object`.
    #[must_use]
    pub fn object_property_count(&self, object: ObjectRef) -> usize {
        self.visible_defs(object.kind()).len()
    }

    /// Registration parameters of a live framebuffer.
    #[must_use]
    pub fn framebuffer_desc(&self, id: FramebufferId) -> Option<FramebufferDesc> {
        self.state.borrow().framebuffers.get(&id).copied()
    }

    /// Number of framebuffers currently registered.
    #[must_use]
    pub fn live_framebuffers(&self) -> usize {
        self.state.borrow().framebuffers.len()
    }

    /// Successfully applied commits, oldest first.
    #[must_use]
    pub fn commits(&self) -> Vec<(AtomicRequest, CommitFlags)> {
        self.state.borrow().commits.clone()
    }

    /// Looks up the ID of a property by name on objects of `kind`.
    #[must_use]
    pub fn property_id(&self, kind: ObjectKind, name: &str) -> Option<PropertyId> {
        defs(kind).iter().find(|d| d.name == name).map(|d| d.id)
    }

    fn visible_defs(&self, kind: ObjectKind) -> Vec<&'static PropertyDef> {
        let state = self.state.borrow();
        defs(kind)
            .iter()
            .filter(|d| !state.hidden.contains(&(kind, d.name)))
            .collect()
    }

    fn record(&self, call: Call) {
        self.journal.borrow_mut().push(call);
    }

    fn initial_value(object: ObjectRef, name: &str, planes: &[u32]) -> u64 {
        match object {
            ObjectRef::Plane(id) => {
                let index = planes.iter().position(|&p| p == id.0).unwrap_or(0) as u64;
                match name {
                    names::ZPOS => index,
                    names::FEATURE => index % 2,
                    _ => 0,
                }
            }
            ObjectRef::Crtc(_) if name == names::ACTIVE => 1,
            _ => 0,
        }
    }

    fn exists(&self, object: ObjectRef) -> bool {
        let raw = object.raw();
        match object {
            ObjectRef::Crtc(_) => self.crtcs.contains(&raw),
            ObjectRef::Connector(_) => self.connectors.contains(&raw),
            ObjectRef::Plane(_) => self.planes.contains(&raw),
        }
    }
}

fn defs(kind: ObjectKind) -> &'static [PropertyDef] {
    match kind {
        ObjectKind::Crtc => &CRTC_DEFS,
        ObjectKind::Connector => &CONNECTOR_DEFS,
        ObjectKind::Plane => &PLANE_DEFS,
    }
}

impl DisplayDevice for FakeDevice {
    fn crtcs(&self) -> Result<Vec<CrtcId>, DeviceError> {
        Ok(self.crtcs.iter().copied().map(CrtcId).collect())
    }

    fn connectors(&self) -> Result<Vec<ConnectorId>, DeviceError> {
        Ok(self.connectors.iter().copied().map(ConnectorId).collect())
    }

    fn planes(&self) -> Result<Vec<PlaneId>, DeviceError> {
        Ok(self.planes.iter().copied().map(PlaneId).collect())
    }

    fn connector_modes(&self, connector: ConnectorId) -> Result<Vec<DisplayMode>, DeviceError> {
        self.state
            .borrow()
            .modes
            .get(&connector)
            .cloned()
            .ok_or(DeviceError::new("get connector", ENOENT))
    }

    fn object_properties(&self, object: ObjectRef) -> Result<Vec<PropertyEntry>, DeviceError> {
        if !self.exists(object) {
            return Err(DeviceError::new("get object properties", ENOENT));
        }
        if self.state.borrow().failing.contains(&object) {
            return Err(DeviceError::new("get object properties", EIO));
        }
        Ok(self
            .visible_defs(object.kind())
            .into_iter()
            .map(|d| PropertyEntry {
                id: d.id,
                value: Self::initial_value(object, d.name, &self.planes),
            })
            .collect())
    }

    fn property_name(&self, property: PropertyId) -> Result<String, DeviceError> {
        self.state.borrow_mut().property_name_calls += 1;
        [&CRTC_DEFS[..], &CONNECTOR_DEFS[..], &PLANE_DEFS[..]]
            .into_iter()
            .flatten()
            .find(|d| d.id == property)
            .map(|d| d.name.to_string())
            .ok_or(DeviceError::new("get property", ENOENT))
    }

    fn property_range(&self, property: PropertyId) -> Result<Option<(u64, u64)>, DeviceError> {
        let def = [&CRTC_DEFS[..], &CONNECTOR_DEFS[..], &PLANE_DEFS[..]]
            .into_iter()
            .flatten()
            .find(|d| d.id == property)
            .ok_or(DeviceError::new("get property", ENOENT))?;
        let top = u64::try_from(self.planes.len().saturating_sub(1)).unwrap_or(u64::MAX);
        Ok((def.name == names::ZPOS).then_some((0, top)))
    }

    fn add_framebuffer(&self, desc: &FramebufferDesc) -> Result<FramebufferId, DeviceError> {
        let mut state = self.state.borrow_mut();
        if let Some(code) = state.fail_next_framebuffer.take() {
            return Err(DeviceError::new("add framebuffer", code));
        }
        if desc.width == 0 || desc.height == 0 || desc.pitch == 0 {
            return Err(DeviceError::new("add framebuffer", EINVAL));
        }
        let id = FramebufferId(state.next_framebuffer);
        state.next_framebuffer += 1;
        state.framebuffers.insert(id, *desc);
        drop(state);
        self.record(Call::AddFramebuffer(id));
        Ok(id)
    }

    fn remove_framebuffer(&self, framebuffer: FramebufferId) -> Result<(), DeviceError> {
        if self
            .state
            .borrow_mut()
            .framebuffers
            .remove(&framebuffer)
            .is_none()
        {
            return Err(DeviceError::new("remove framebuffer", ENOENT));
        }
        self.record(Call::RemoveFramebuffer(framebuffer));
        Ok(())
    }

    fn atomic_commit(&self, request: &AtomicRequest, flags: CommitFlags) -> Result<(), DeviceError> {
        let mut state = self.state.borrow_mut();
        if let Some(code) = state.fail_next_commit.take() {
            let err = DeviceError::new("atomic commit", code);
            return Err(err.with_description("commit rejected by fake device"));
        }
        for assignment in request.assignments() {
            let known = defs(assignment.object.kind())
                .iter()
                .find(|d| d.id == assignment.property);
            let Some(def) = known else {
                return Err(DeviceError::new("atomic commit", EINVAL));
            };
            if def.name == names::FB_ID && assignment.value != 0 {
                let fb = FramebufferId(u32::try_from(assignment.value).unwrap_or(0));
                if !state.framebuffers.contains_key(&fb) {
                    return Err(DeviceError::new("atomic commit", EINVAL));
                }
            }
        }
        if flags.page_flip_event && !state.withhold_flips {
            queue_flips(&mut state, request);
        }
        state.commits.push((request.clone(), flags));
        drop(state);
        self.record(Call::AtomicCommit(request.len()));
        Ok(())
    }

    fn set_mode(
        &self,
        crtc: CrtcId,
        connector: ConnectorId,
        mode: &DisplayMode,
        framebuffer: FramebufferId,
    ) -> Result<(), DeviceError> {
        let state = self.state.borrow();
        let known_mode = state
            .modes
            .get(&connector)
            .is_some_and(|modes| modes.contains(mode));
        if !known_mode || !state.framebuffers.contains_key(&framebuffer) {
            return Err(DeviceError::new("set crtc", EINVAL));
        }
        drop(state);
        self.record(Call::SetMode(crtc, connector, framebuffer));
        Ok(())
    }

    fn wait_page_flip(&self, crtc: CrtcId, _timeout: Duration) -> Result<PageFlip, DeviceError> {
        self.record(Call::WaitPageFlip(crtc));
        let mut state = self.state.borrow_mut();
        let index = state
            .pending_flips
            .iter()
            .position(|flip| flip.crtc == crtc)
            .ok_or(DeviceError::new("wait page flip", ETIMEDOUT))?;
        Ok(state.pending_flips.remove(index))
    }
}

/// Queues one flip per CRTC touched by `request`, either directly or
/// through a plane's `CRTC_ID`.
fn queue_flips(state: &mut DeviceState, request: &AtomicRequest) {
    let plane_crtc = defs(ObjectKind::Plane)
        .iter()
        .find(|d| d.name == names::CRTC_ID)
        .map(|d| d.id);
    let mut crtcs: Vec<CrtcId> = Vec::new();
    for assignment in request.assignments() {
        let crtc = match assignment.object {
            ObjectRef::Crtc(id) => Some(id),
            ObjectRef::Plane(_) if Some(assignment.property) == plane_crtc => {
                u32::try_from(assignment.value).ok().map(CrtcId)
            }
            _ => None,
        };
        if let Some(crtc) = crtc.filter(|c| !crtcs.contains(c)) {
            crtcs.push(crtc);
        }
    }
    for crtc in crtcs {
        state.flip_sequence += 1;
        let sequence = state.flip_sequence;
        state.pending_flips.push(PageFlip {
            crtc,
            sequence,
            timestamp: Duration::from_micros(16_667 * u64::from(sequence)),
        });
    }
}

/// A heap-backed buffer handed out by [`FakeAllocator`].
#[derive(Debug)]
pub struct FakeBuffer {
    handle: BufferHandle,
    export_fd: i32,
    storage: Rc<RefCell<Vec<u8>>>,
}

impl FakeBuffer {
    /// The buffer's exported process handle.
    #[must_use]
    pub fn export_fd(&self) -> i32 {
        self.export_fd
    }
}

#[derive(Default)]
struct AllocState {
    next_handle: u32,
    live: HashMap<BufferHandle, Rc<RefCell<Vec<u8>>>>,
    exports: HashMap<i32, Rc<RefCell<Vec<u8>>>>,
    freed: Vec<BufferHandle>,
    fail_next_allocation: Option<i32>,
}

/// Heap-backed allocator.
pub struct FakeAllocator {
    state: RefCell<AllocState>,
    journal: Journal,
}

impl core::fmt::Debug for FakeAllocator {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("FakeAllocator")
            .field("live_buffers", &self.live_buffers())
            .finish_non_exhaustive()
    }
}

impl Default for FakeAllocator {
    fn default() -> Self {
        Self::new()
    }
}

impl FakeAllocator {
    /// Creates an allocator with its own journal.
    #[must_use]
    pub fn new() -> Self {
        Self::with_journal(Journal::default())
    }

    /// Creates an allocator that records into `journal`.
    #[must_use]
    pub fn with_journal(journal: Journal) -> Self {
        Self {
            state: RefCell::new(AllocState {
                next_handle: 1,
                ..AllocState::default()
            }),
            journal,
        }
    }

    /// Publishes `len` zeroed bytes under an external handle that
    /// [`BufferAllocator::allocate`] can later import.
    pub fn publish_external(&self, fd: i32, len: usize) {
        self.state
            .borrow_mut()
            .exports
            .insert(fd, Rc::new(RefCell::new(alloc::vec![0; len])));
    }

    /// Makes the next fresh allocation fail with `code`.
    pub fn fail_next_allocation(&self, code: i32) {
        self.state.borrow_mut().fail_next_allocation = Some(code);
    }

    /// Number of buffers not yet freed.
    #[must_use]
    pub fn live_buffers(&self) -> usize {
        self.state.borrow().live.len()
    }

    /// Handles freed so far, in order.
    #[must_use]
    pub fn freed(&self) -> Vec<BufferHandle> {
        self.state.borrow().freed.clone()
    }

    /// Copy of a live buffer's bytes (empty if unknown).
    #[must_use]
    pub fn contents(&self, handle: BufferHandle) -> Vec<u8> {
        self.state
            .borrow()
            .live
            .get(&handle)
            .map(|storage| storage.borrow().clone())
            .unwrap_or_default()
    }

    fn record(&self, call: Call) {
        self.journal.borrow_mut().push(call);
    }
}

impl BufferAllocator for FakeAllocator {
    type Buffer = FakeBuffer;
    type Mapping<'a> = RefMut<'a, [u8]>;

    fn allocate(&self, request: &AllocRequest) -> Result<FakeBuffer, AllocationError> {
        let size = request.layout.size;
        let mut state = self.state.borrow_mut();

        let (storage, imported) = match request.external_fd {
            Some(fd) => {
                let storage = state
                    .exports
                    .get(&fd)
                    .filter(|s| s.borrow().len() as u64 >= size)
                    .cloned()
                    .ok_or(AllocationError::ImportFailed {
                        fd,
                        size,
                        code: EINVAL,
                    })?;
                (storage, true)
            }
            None => {
                if let Some(code) = state.fail_next_allocation.take() {
                    return Err(AllocationError::CreateFailed {
                        width: request.layout.width,
                        height: request.layout.height,
                        size,
                        code,
                    });
                }
                let len = request.layout.size_bytes();
                (Rc::new(RefCell::new(alloc::vec![0; len])), false)
            }
        };

        let handle = BufferHandle(state.next_handle);
        state.next_handle += 1;
        let export_fd = match request.external_fd {
            Some(fd) => fd,
            None => {
                let fd = 1000 + i32::try_from(handle.0).unwrap_or(0);
                state.exports.insert(fd, Rc::clone(&storage));
                fd
            }
        };
        state.live.insert(handle, Rc::clone(&storage));
        drop(state);

        self.record(if imported {
            Call::Import(handle)
        } else {
            Call::Allocate(handle)
        });
        Ok(FakeBuffer {
            handle,
            export_fd,
            storage,
        })
    }

    fn handle(&self, buffer: &FakeBuffer) -> BufferHandle {
        buffer.handle
    }

    fn map<'a>(&'a self, buffer: &'a mut FakeBuffer) -> Result<RefMut<'a, [u8]>, AllocationError> {
        let storage = buffer
            .storage
            .try_borrow_mut()
            .map_err(|_| AllocationError::MapFailed {
                handle: buffer.handle,
                code: EINVAL,
            })?;
        Ok(RefMut::map(storage, |bytes| bytes.as_mut_slice()))
    }

    fn free(&self, buffer: FakeBuffer) -> Result<(), AllocationError> {
        let mut state = self.state.borrow_mut();
        if state.live.remove(&buffer.handle).is_none() {
            return Err(AllocationError::FreeFailed {
                handle: buffer.handle,
                code: ENOENT,
            });
        }
        state.freed.push(buffer.handle);
        drop(state);
        self.record(Call::CloseExport(buffer.export_fd));
        self.record(Call::Free(buffer.handle));
        Ok(())
    }
}
