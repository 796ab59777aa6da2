// Copyright 2026 the Kmsplane Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Multi-object atomic commit.
//!
//! [`commit`] puts the pipeline's vendor mode, the output's routing and the
//! full state of every assigned plane into one [`AtomicRequest`] and submits
//! it, so the whole update lands at the same refresh or not at all.
//!
//! Per plane, in assignment order:
//!
//! | Property | Value |
//! |---|---|
//! | `CRTC_ID` | selected pipeline |
//! | `FB_ID` | the plane's framebuffer |
//! | `SRC_X`, `SRC_Y` | `0` |
//! | `SRC_W`, `SRC_H` | image size in 16.16 fixed point |
//! | `CRTC_X`, `CRTC_Y` | `0` |
//! | `CRTC_W`, `CRTC_H` | image size in pixels |
//! | `ZPOS` | position in the assignment list, bottom first |
//!
//! A property the object does not expose is skipped and listed in the
//! [`CommitReport`]; the rest of the request is still submitted. The commit
//! never sets the mode-change flag: timing must already be configured by a
//! separate modeset. Nothing is retried.

use alloc::format;
use alloc::vec::Vec;

use crate::atomic::{AtomicRequest, CommitFlags, PropertyAddFailure};
use crate::device::DisplayDevice;
use crate::discovery::{DisplayOutput, DisplayPipeline, PlaneAssignment};
use crate::error::CommitError;
use crate::object::{FramebufferId, ObjectRef, PlaneId, PropertyId};
use crate::property::names;

/// Phase-detection autofocus data type (`PDAF_TYPE`).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[repr(u64)]
pub enum PdafType {
    /// Driver default.
    Default = 0,
    /// Sent during horizontal blanking.
    HBlank = 1,
    /// Sent during vertical blanking.
    VBlank = 2,
}

/// Pipeline work mode (`WORK_MODE`).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[repr(u64)]
pub enum WorkMode {
    /// Hold the current frame.
    Hold = 0,
    /// Regular scanout.
    Normal = 1,
    /// Alternate between two buffers.
    PingPong = 2,
    /// Bypass the pipeline.
    Bypass = 3,
    /// Background only.
    Background = 4,
    /// Scan out one frame.
    OneFrame = 5,
    /// Scan out one frame without sending it.
    OneFrameNoSend = 6,
}

/// Output routing (`CSI-TX-PATH`).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[repr(u64)]
pub enum CsiTxPath {
    /// Route through the video output processor.
    Vop = 0,
    /// Bypass the video output processor.
    Bypass = 1,
}

/// Fixed values applied to the pipeline and output on every commit.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct CommitPolicy {
    /// Value for `PDAF_TYPE`.
    pub pdaf_type: PdafType,
    /// Value for `WORK_MODE`.
    pub work_mode: WorkMode,
    /// Value for `CSI-TX-PATH`.
    pub csi_tx_path: CsiTxPath,
}

impl Default for CommitPolicy {
    fn default() -> Self {
        Self {
            pdaf_type: PdafType::VBlank,
            work_mode: WorkMode::Normal,
            csi_tx_path: CsiTxPath::Bypass,
        }
    }
}

/// Source rectangle in 16.16 fixed point.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct SourceRect {
    /// X offset.
    pub x: u64,
    /// Y offset.
    pub y: u64,
    /// Width.
    pub w: u64,
    /// Height.
    pub h: u64,
}

impl SourceRect {
    /// Whole-image source rectangle.
    #[must_use]
    pub const fn full(width: u32, height: u32) -> Self {
        Self {
            x: 0,
            y: 0,
            w: to_fixed(width),
            h: to_fixed(height),
        }
    }
}

/// Destination rectangle in pixels.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct DestRect {
    /// X position.
    pub x: u64,
    /// Y position.
    pub y: u64,
    /// Width.
    pub w: u64,
    /// Height.
    pub h: u64,
}

impl DestRect {
    /// Rectangle at the origin covering `width` x `height` pixels.
    #[must_use]
    pub const fn at_origin(width: u32, height: u32) -> Self {
        Self {
            x: 0,
            y: 0,
            w: width as u64,
            h: height as u64,
        }
    }
}

/// Converts an integer pixel count to 16.16 fixed point.
#[inline]
#[must_use]
pub const fn to_fixed(value: u32) -> u64 {
    (value as u64) << 16
}

/// The state requested for one plane.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct PlaneState {
    /// Target plane.
    pub plane: PlaneId,
    /// Framebuffer shown on the plane.
    pub framebuffer: FramebufferId,
    /// Stacking order.
    pub zpos: u64,
    /// Source rectangle.
    pub src: SourceRect,
    /// Destination rectangle.
    pub dst: DestRect,
}

/// Outcome of one commit.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CommitReport {
    /// Result of submitting the request.
    pub submission: Result<(), CommitError>,
    /// Properties that could not be added to the request.
    pub skipped: Vec<PropertyAddFailure>,
    /// Requested plane states, bottom first.
    pub planes: Vec<PlaneState>,
    /// Number of assignments actually submitted.
    pub submitted: usize,
}

impl CommitReport {
    /// Returns `true` when the request was accepted.
    #[must_use]
    pub fn is_ok(&self) -> bool {
        self.submission.is_ok()
    }

    /// Converts into the submission result, discarding the rest.
    pub fn into_result(self) -> Result<(), CommitError> {
        self.submission
    }
}

/// Builds the request for `assignments` without submitting it.
///
/// Returns the request, the skipped properties and the plane states.
#[must_use]
pub fn build_request(
    crtc: &DisplayPipeline,
    connector: &DisplayOutput,
    assignments: &[PlaneAssignment],
    policy: &CommitPolicy,
) -> (AtomicRequest, Vec<PropertyAddFailure>, Vec<PlaneState>) {
    let mut builder = RequestBuilder::default();

    builder.add(
        crtc.id,
        names::PDAF_TYPE,
        crtc.properties.pdaf_type,
        policy.pdaf_type as u64,
    );
    builder.add(
        crtc.id,
        names::WORK_MODE,
        crtc.properties.work_mode,
        policy.work_mode as u64,
    );
    builder.add(
        connector.id,
        names::CSI_TX_PATH,
        connector.properties.csi_tx_path,
        policy.csi_tx_path as u64,
    );

    let mut planes = Vec::with_capacity(assignments.len());
    for (index, assignment) in assignments.iter().enumerate() {
        let plane = &assignment.plane;
        let fb = &assignment.framebuffer;
        let props = &plane.properties;
        let zpos = index as u64;
        let src = SourceRect::full(fb.width, fb.height);
        let dst = DestRect::at_origin(fb.width, fb.height);

        log::debug!(
            "plane {} <- fb {} ({}x{}), zpos {zpos}",
            plane.id,
            fb.id,
            fb.width,
            fb.height
        );
        if plane.zpos_max.is_some_and(|max| zpos > max) {
            log::warn!(
                "plane {}: zpos {zpos} exceeds reported bound {:?}",
                plane.id,
                plane.zpos_max
            );
        }

        let id = plane.id;
        builder.add(id, names::CRTC_ID, props.crtc_id, u64::from(crtc.id.get()));
        builder.add(id, names::FB_ID, props.fb_id, u64::from(fb.id.get()));
        builder.add(id, names::SRC_X, props.src_x, src.x);
        builder.add(id, names::SRC_Y, props.src_y, src.y);
        builder.add(id, names::SRC_W, props.src_w, src.w);
        builder.add(id, names::SRC_H, props.src_h, src.h);
        builder.add(id, names::CRTC_X, props.crtc_x, dst.x);
        builder.add(id, names::CRTC_Y, props.crtc_y, dst.y);
        builder.add(id, names::CRTC_W, props.crtc_w, dst.w);
        builder.add(id, names::CRTC_H, props.crtc_h, dst.h);
        builder.add(id, names::ZPOS, props.zpos, zpos);

        planes.push(PlaneState {
            plane: id,
            framebuffer: fb.id,
            zpos,
            src,
            dst,
        });
    }

    (builder.request, builder.skipped, planes)
}

/// Builds and submits one atomic request covering the pipeline, the output
/// and every assigned plane.
pub fn commit<D: DisplayDevice + ?Sized>(
    device: &D,
    crtc: &DisplayPipeline,
    connector: &DisplayOutput,
    assignments: &[PlaneAssignment],
    policy: &CommitPolicy,
    flags: CommitFlags,
) -> CommitReport {
    let (request, skipped, planes) = build_request(crtc, connector, assignments, policy);

    let submission = device.atomic_commit(&request, flags).map_err(|err| {
        let description = if err.description.is_empty() {
            format!("errno {}", err.code)
        } else {
            err.description
        };
        log::error!("atomic: couldn't commit new state: {description}, ret: {}", err.code);
        CommitError::SubmissionFailed {
            code: err.code,
            description,
        }
    });

    if submission.is_ok() {
        log::info!(
            "committed {} planes ({} properties, {} skipped)",
            planes.len(),
            request.len(),
            skipped.len()
        );
    }

    CommitReport {
        submission,
        skipped,
        planes,
        submitted: request.len(),
    }
}

#[derive(Default)]
struct RequestBuilder {
    request: AtomicRequest,
    skipped: Vec<PropertyAddFailure>,
}

impl RequestBuilder {
    fn add(
        &mut self,
        object: impl Into<ObjectRef>,
        name: &'static str,
        property: Option<PropertyId>,
        value: u64,
    ) {
        if let Err(failure) = self.request.add(object, name, property, value) {
            log::warn!("{failure}");
            self.skipped.push(failure);
        }
    }
}

#[cfg(test)]
mod tests {
    use alloc::vec::Vec;

    use super::{
        CommitPolicy, CsiTxPath, DestRect, PdafType, SourceRect, WorkMode, build_request, commit,
    };
    use crate::atomic::CommitFlags;
    use crate::device::DisplayDevice;
    use crate::discovery::{Discovery, PlaneAssignment};
    use crate::error::CommitError;
    use crate::fake::{FakeAllocator, FakeDevice};
    use crate::format::PixelFormat;
    use crate::frame::{Frame, FrameBuilder, Framebuffer, ImageSpec};
    use crate::object::{ObjectKind, ObjectRef, PlaneId};
    use crate::property::names;

    const EMPTY: &[u8] = &[];

    fn frames(
        device: &FakeDevice,
        allocator: &FakeAllocator,
        sizes: &[(u32, u32)],
    ) -> Vec<Frame<crate::fake::FakeBuffer>> {
        let builder = FrameBuilder::new(device, allocator);
        sizes
            .iter()
            .map(|&(w, h)| {
                builder
                    .build(&ImageSpec::new(w, h, PixelFormat::XBGR8888), &mut EMPTY)
                    .unwrap()
            })
            .collect()
    }

    fn framebuffers(frames: &[Frame<crate::fake::FakeBuffer>]) -> Vec<Framebuffer> {
        frames.iter().map(Frame::framebuffer).collect()
    }

    fn assignments(device: &FakeDevice, frames: &[Framebuffer]) -> (Discovery, Vec<PlaneAssignment>) {
        let discovery = Discovery::discover(device).unwrap();
        let pairs = discovery.assign(frames).unwrap();
        (discovery, pairs)
    }

    #[test]
    fn zpos_follows_assignment_order() {
        let device = FakeDevice::rockchip_like(1, 1, 4);
        let allocator = FakeAllocator::new();
        let frames = frames(&device, &allocator, &[(8, 8), (8, 8), (8, 8), (8, 8)]);
        let (discovery, pairs) = assignments(&device, &framebuffers(&frames));

        let report = commit(
            &device,
            &discovery.crtc,
            &discovery.connector,
            &pairs,
            &CommitPolicy::default(),
            CommitFlags::default(),
        );

        assert!(report.is_ok());
        let zpos: Vec<u64> = report.planes.iter().map(|p| p.zpos).collect();
        assert_eq!(zpos, [0, 1, 2, 3]);

        let (request, _) = &device.commits()[0];
        let zpos_prop = device.property_id(ObjectKind::Plane, names::ZPOS).unwrap();
        for (index, pair) in pairs.iter().enumerate() {
            assert_eq!(
                request.value_of(pair.plane.id, zpos_prop),
                Some(index as u64)
            );
        }
    }

    #[test]
    fn rectangles_cover_the_whole_image() {
        let device = FakeDevice::rockchip_like(1, 1, 1);
        let allocator = FakeAllocator::new();
        let frames = frames(&device, &allocator, &[(640, 480)]);
        let (discovery, pairs) = assignments(&device, &framebuffers(&frames));

        let (request, skipped, planes) = build_request(
            &discovery.crtc,
            &discovery.connector,
            &pairs,
            &CommitPolicy::default(),
        );

        assert!(skipped.is_empty());
        assert_eq!(
            planes[0].src,
            SourceRect {
                x: 0,
                y: 0,
                w: 640 << 16,
                h: 480 << 16
            }
        );
        assert_eq!(planes[0].dst, DestRect::at_origin(640, 480));

        let plane = pairs[0].plane.id;
        let id = |name| device.property_id(ObjectKind::Plane, name).unwrap();
        assert_eq!(request.value_of(plane, id(names::SRC_W)), Some(640 << 16));
        assert_eq!(request.value_of(plane, id(names::SRC_H)), Some(480 << 16));
        assert_eq!(request.value_of(plane, id(names::CRTC_W)), Some(640));
        assert_eq!(request.value_of(plane, id(names::CRTC_H)), Some(480));
        assert_eq!(request.value_of(plane, id(names::CRTC_X)), Some(0));
        assert_eq!(
            request.value_of(plane, id(names::FB_ID)),
            Some(u64::from(pairs[0].framebuffer.id.get()))
        );
        assert_eq!(
            request.value_of(plane, id(names::CRTC_ID)),
            Some(u64::from(discovery.crtc.id.get()))
        );
    }

    #[test]
    fn pipeline_and_output_get_policy_values() {
        let device = FakeDevice::rockchip_like(1, 1, 1);
        let (discovery, _) = assignments(&device, &[]);

        let (request, skipped, planes) = build_request(
            &discovery.crtc,
            &discovery.connector,
            &[],
            &CommitPolicy::default(),
        );

        assert!(skipped.is_empty());
        assert!(planes.is_empty());
        assert_eq!(request.len(), 3);
        let crtc = discovery.crtc;
        assert_eq!(
            request.value_of(crtc.id, crtc.properties.pdaf_type.unwrap()),
            Some(PdafType::VBlank as u64)
        );
        assert_eq!(
            request.value_of(crtc.id, crtc.properties.work_mode.unwrap()),
            Some(WorkMode::Normal as u64)
        );
        let connector = &discovery.connector;
        assert_eq!(
            request.value_of(connector.id, connector.properties.csi_tx_path.unwrap()),
            Some(CsiTxPath::Bypass as u64)
        );
    }

    #[test]
    fn missing_properties_are_skipped_and_reported() {
        let device = FakeDevice::rockchip_like(1, 1, 2);
        device.hide_property(ObjectKind::Plane, names::ZPOS);
        device.hide_property(ObjectKind::Crtc, names::PDAF_TYPE);
        let allocator = FakeAllocator::new();
        let frames = frames(&device, &allocator, &[(8, 8), (8, 8)]);
        let (discovery, pairs) = assignments(&device, &framebuffers(&frames));

        let report = commit(
            &device,
            &discovery.crtc,
            &discovery.connector,
            &pairs,
            &CommitPolicy::default(),
            CommitFlags::default(),
        );

        assert!(report.is_ok(), "remaining properties are still submitted");
        let skipped: Vec<_> = report.skipped.iter().map(|f| (f.object, f.name, f.value)).collect();
        assert_eq!(
            skipped,
            [
                (ObjectRef::Crtc(discovery.crtc.id), names::PDAF_TYPE, 2),
                (ObjectRef::Plane(pairs[0].plane.id), names::ZPOS, 0),
                (ObjectRef::Plane(pairs[1].plane.id), names::ZPOS, 1),
            ]
        );
        // 2 pipeline/output properties + 10 per plane.
        assert_eq!(report.submitted, 2 + 2 * 10);
    }

    #[test]
    fn submission_failure_carries_code_and_skipped_list() {
        let device = FakeDevice::rockchip_like(1, 1, 1);
        device.hide_property(ObjectKind::Connector, names::CSI_TX_PATH);
        device.fail_next_commit(22);
        let allocator = FakeAllocator::new();
        let frames = frames(&device, &allocator, &[(8, 8)]);
        let (discovery, pairs) = assignments(&device, &framebuffers(&frames));

        let report = commit(
            &device,
            &discovery.crtc,
            &discovery.connector,
            &pairs,
            &CommitPolicy::default(),
            CommitFlags::default(),
        );

        assert_eq!(
            report.submission,
            Err(CommitError::SubmissionFailed {
                code: 22,
                description: "commit rejected by fake device".into()
            })
        );
        assert_eq!(report.skipped.len(), 1);
        assert!(device.commits().is_empty());
    }

    #[test]
    fn commit_is_single_shot() {
        let device = FakeDevice::rockchip_like(1, 1, 1);
        device.fail_next_commit(16);
        let allocator = FakeAllocator::new();
        let frames = frames(&device, &allocator, &[(8, 8)]);
        let (discovery, pairs) = assignments(&device, &framebuffers(&frames));

        let report = commit(
            &device,
            &discovery.crtc,
            &discovery.connector,
            &pairs,
            &CommitPolicy::default(),
            CommitFlags::default(),
        );

        assert!(!report.is_ok());
        let commits = device
            .calls()
            .iter()
            .filter(|c| matches!(c, crate::fake::Call::AtomicCommit(_)))
            .count();
        assert_eq!(commits, 0, "a failed commit must not be retried");
    }

    #[test]
    fn two_vga_images_end_to_end() {
        let device = FakeDevice::rockchip_like(1, 1, 4);
        let allocator = FakeAllocator::with_journal(device.journal());
        let frames = frames(&device, &allocator, &[(640, 480), (640, 480)]);
        for frame in &frames {
            let layout = frame.buffer().layout();
            assert_eq!(layout.byte_stride, 2560);
            assert_eq!(layout.size, 1_228_800);
        }
        let (discovery, pairs) = assignments(&device, &framebuffers(&frames));

        let report = commit(
            &device,
            &discovery.crtc,
            &discovery.connector,
            &pairs,
            &CommitPolicy::default(),
            CommitFlags::default(),
        );
        assert!(report.is_ok());
        assert_eq!(report.planes.len(), 2);
        assert_eq!(report.planes[0].plane, PlaneId(device.plane_ids()[0]));
        assert_eq!(report.planes[1].zpos, 1);

        for frame in frames {
            frame.release(&device, &allocator).unwrap();
        }
        assert_eq!(device.live_framebuffers(), 0);
        assert_eq!(allocator.live_buffers(), 0);
    }

    #[test]
    fn submission_without_device_text_reports_the_errno() {
        let device = FakeDevice::rockchip_like(1, 1, 1);
        let allocator = FakeAllocator::new();
        let frames = frames(&device, &allocator, &[(8, 8)]);
        let (discovery, pairs) = assignments(&device, &framebuffers(&frames));
        device.remove_framebuffer(frames[0].framebuffer().id).unwrap();

        let report = commit(
            &device,
            &discovery.crtc,
            &discovery.connector,
            &pairs,
            &CommitPolicy::default(),
            CommitFlags::default(),
        );

        assert_eq!(
            report.submission,
            Err(CommitError::SubmissionFailed {
                code: 22,
                description: "errno 22".into()
            })
        );
    }
}
