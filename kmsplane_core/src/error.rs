// Copyright 2026 the Kmsplane Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Error taxonomy.
//!
//! Setup errors ([`SetupError`], [`DiscoveryError`]) are fatal. Per-image
//! errors ([`AllocationError`], [`BuildError`]) are reported per image.
//! Commit submission failures come back inside a
//! [`CommitReport`](crate::commit::CommitReport) next to the properties that
//! could not be added. Every error exposes the underlying errno via `code()`
//! when one is known.

use alloc::string::String;

use thiserror::Error;

use crate::format::PixelFormat;
use crate::object::{BufferHandle, CrtcId, FramebufferId, ObjectRef};

/// A failed request on the device channel.
#[derive(Clone, Debug, PartialEq, Eq, Error)]
#[error("{op} failed (errno {code})")]
pub struct DeviceError {
    /// Name of the failed operation.
    pub op: &'static str,
    /// Positive errno reported by the device.
    pub code: i32,
    /// The device's own text for `code`; empty when it gave none.
    pub description: String,
}

impl DeviceError {
    /// Creates a device error for `op` with errno `code`.
    #[must_use]
    pub const fn new(op: &'static str, code: i32) -> Self {
        Self {
            op,
            code,
            description: String::new(),
        }
    }

    /// Attaches the device's description of the failure.
    #[must_use]
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }
}

/// Opening the device or negotiating client capabilities failed.
#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum SetupError {
    /// The device node could not be opened.
    #[error("failed to open display device {path}: errno {code}")]
    DeviceOpen {
        /// Device path or driver name that was tried.
        path: String,
        /// Positive errno.
        code: i32,
    },
    /// A client capability was refused.
    #[error("failed to enable client capability {capability}: errno {code}")]
    Capability {
        /// Capability name.
        capability: &'static str,
        /// Positive errno.
        code: i32,
    },
}

impl SetupError {
    /// Underlying errno.
    #[must_use]
    pub const fn code(&self) -> i32 {
        match self {
            Self::DeviceOpen { code, .. } | Self::Capability { code, .. } => *code,
        }
    }
}

/// Resolving the properties of one object failed.
#[derive(Clone, Debug, PartialEq, Eq, Error)]
#[error("failed to resolve properties of {object}: {source}")]
pub struct ResolveError {
    /// The object whose property list could not be read.
    pub object: ObjectRef,
    /// Underlying device failure.
    pub source: DeviceError,
}

/// Resource discovery failed.
#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum DiscoveryError {
    /// No pipeline or no output could be resolved.
    #[error("no usable {what} found")]
    NoUsableTarget {
        /// `"crtc"` or `"connector"`.
        what: &'static str,
    },
    /// More images were requested than there are usable planes.
    #[error("{requested} images requested but only {available} planes are usable")]
    NotEnoughPlanes {
        /// Number of images supplied.
        requested: usize,
        /// Number of planes discovered.
        available: usize,
    },
    /// Enumerating resources failed.
    #[error(transparent)]
    Device(#[from] DeviceError),
}

impl DiscoveryError {
    /// Underlying errno (`ENODEV` when nothing usable was found).
    #[must_use]
    pub const fn code(&self) -> i32 {
        match self {
            Self::NoUsableTarget { .. } | Self::NotEnoughPlanes { .. } => ENODEV,
            Self::Device(err) => err.code,
        }
    }
}

/// Buffer allocation, import, mapping or release failed.
#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum AllocationError {
    /// A fresh allocation could not be created.
    #[error("failed to allocate {width}x{height} buffer of {size} bytes: errno {code}")]
    CreateFailed {
        /// Width in pixels.
        width: u32,
        /// Height in pixels.
        height: u32,
        /// Requested size in bytes.
        size: u64,
        /// Positive errno.
        code: i32,
    },
    /// An externally supplied handle could not be imported.
    #[error("failed to import external buffer fd {fd} ({size} bytes): errno {code}")]
    ImportFailed {
        /// The external handle.
        fd: i32,
        /// Expected size in bytes.
        size: u64,
        /// Positive errno.
        code: i32,
    },
    /// The buffer could not be mapped for CPU access.
    #[error("failed to map buffer {handle:?}: errno {code}")]
    MapFailed {
        /// Device-local buffer handle.
        handle: BufferHandle,
        /// Positive errno.
        code: i32,
    },
    /// Releasing the buffer failed.
    #[error("failed to free buffer {handle:?}: errno {code}")]
    FreeFailed {
        /// Device-local buffer handle.
        handle: BufferHandle,
        /// Positive errno.
        code: i32,
    },
}

impl AllocationError {
    /// Underlying errno.
    #[must_use]
    pub const fn code(&self) -> i32 {
        match self {
            Self::CreateFailed { code, .. }
            | Self::ImportFailed { code, .. }
            | Self::MapFailed { code, .. }
            | Self::FreeFailed { code, .. } => *code,
        }
    }
}

/// Reading image bytes from a source failed.
#[derive(Clone, Debug, PartialEq, Eq, Error)]
#[error("failed to read image data: errno {code}")]
pub struct SourceError {
    /// Positive errno.
    pub code: i32,
}

/// Building one framebuffer failed.
#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum BuildError {
    /// The buffer could not be allocated or mapped.
    #[error(transparent)]
    Allocation(#[from] AllocationError),
    /// The image data could not be read.
    #[error(transparent)]
    Source(#[from] SourceError),
    /// The display subsystem refused the framebuffer.
    #[error(
        "failed to create fb ret={code}: {width}x{height}, format {format:?}, handle {handle:?}, \
         pitch {pitch}, offset {offset}, modifier {modifier:?}"
    )]
    RegistrationFailed {
        /// Positive errno.
        code: i32,
        /// Width in pixels.
        width: u32,
        /// Height in pixels.
        height: u32,
        /// Pixel format.
        format: PixelFormat,
        /// Buffer handle passed for plane 0.
        handle: BufferHandle,
        /// Pitch passed for plane 0.
        pitch: u32,
        /// Offset passed for plane 0.
        offset: u32,
        /// Compression modifier, if any.
        modifier: Option<u64>,
    },
}

impl BuildError {
    /// Underlying errno.
    #[must_use]
    pub const fn code(&self) -> i32 {
        match self {
            Self::Allocation(err) => err.code(),
            Self::Source(err) => err.code,
            Self::RegistrationFailed { code, .. } => *code,
        }
    }
}

/// Submitting an atomic request failed.
#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum CommitError {
    /// The device rejected the request as a whole.
    #[error("atomic: couldn't commit new state: {description} (errno {code})")]
    SubmissionFailed {
        /// Positive errno.
        code: i32,
        /// Human-readable description of `code`.
        description: String,
    },
}

impl CommitError {
    /// Underlying errno.
    #[must_use]
    pub const fn code(&self) -> i32 {
        match self {
            Self::SubmissionFailed { code, .. } => *code,
        }
    }
}

/// Releasing a frame failed or was attempted out of order.
#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum TeardownError {
    /// The buffer still backs a registered framebuffer and was not freed.
    #[error("buffer still backs registered framebuffer {0:?}; deregister it first")]
    StillRegistered(FramebufferId),
    /// Deregistering the framebuffer failed.
    #[error("failed to remove framebuffer {id:?}: {source}")]
    Deregister {
        /// Framebuffer that could not be removed.
        id: FramebufferId,
        /// Underlying device failure.
        source: DeviceError,
    },
    /// Releasing the buffer failed.
    #[error(transparent)]
    Allocation(#[from] AllocationError),
}

impl TeardownError {
    /// Underlying errno (`EBUSY` for sequencing errors).
    #[must_use]
    pub const fn code(&self) -> i32 {
        match self {
            Self::StillRegistered(_) => EBUSY,
            Self::Deregister { source, .. } => source.code,
            Self::Allocation(err) => err.code(),
        }
    }
}

/// Waiting for a commit to retire failed.
#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum RetireError {
    /// No flip completion arrived in time.
    #[error("no page flip on crtc {crtc} within {timeout_ms} ms")]
    Timeout {
        /// CRTC that was waited on.
        crtc: CrtcId,
        /// Wait bound in milliseconds.
        timeout_ms: u64,
    },
    /// Reading device events failed.
    #[error(transparent)]
    Device(DeviceError),
}

impl RetireError {
    /// Underlying errno (`ETIMEDOUT` on timeout).
    #[must_use]
    pub const fn code(&self) -> i32 {
        match self {
            Self::Timeout { .. } => ETIMEDOUT,
            Self::Device(err) => err.code,
        }
    }
}

/// `EBUSY` from `errno.h`.
pub const EBUSY: i32 = 16;
/// `ENODEV` from `errno.h`.
pub const ENODEV: i32 = 19;
/// `EINVAL` from `errno.h`.
pub const EINVAL: i32 = 22;
/// `ETIMEDOUT` from `errno.h`.
pub const ETIMEDOUT: i32 = 110;
