// Copyright 2026 the Kmsplane Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! One run: discover, build, modeset, commit, wait, tear down.

use std::path::{Path, PathBuf};
use std::time::Duration;

use kmsplane_core::atomic::PropertyAddFailure;
use kmsplane_core::commit::{CommitPolicy, PlaneState, commit};
use kmsplane_core::device::{BufferAllocator, DisplayDevice};
use kmsplane_core::discovery::Discovery;
use kmsplane_core::error::{
    BuildError, CommitError, DiscoveryError, ENODEV, SetupError, SourceError, TeardownError,
};
use kmsplane_core::frame::{ByteSource, Frame, FrameBuilder};
use kmsplane_core::retire::{RetirePolicy, Retired, wait_for_retirement};
use thiserror::Error;

use crate::cli::{ConfigError, RunConfig};

/// An image that could not be turned into a framebuffer.
#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) struct ImageFailure {
    /// Position on the command line.
    pub(crate) index: usize,
    pub(crate) path: PathBuf,
    pub(crate) error: BuildError,
}

/// What a completed run did.
#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) struct Summary {
    /// Number of framebuffers built and committed.
    pub(crate) built: usize,
    pub(crate) failures: Vec<ImageFailure>,
    /// Properties left out of the commit.
    pub(crate) skipped: Vec<PropertyAddFailure>,
    /// Requested plane states, bottom first.
    pub(crate) planes: Vec<PlaneState>,
    /// `None` when waiting for retirement failed.
    pub(crate) retired: Option<Retired>,
}

impl Summary {
    /// Exit status: the errno of the first failed image, or 0.
    pub(crate) fn code(&self) -> i32 {
        self.failures.first().map_or(0, |failure| failure.error.code())
    }
}

/// A run that could not complete.
#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub(crate) enum RunError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Setup(#[from] SetupError),
    #[error(transparent)]
    Discovery(#[from] DiscoveryError),
    /// Every image failed; nothing was committed.
    #[error("none of the {} images could be built", .failures.len())]
    NothingBuilt { failures: Vec<ImageFailure> },
    #[error(transparent)]
    Commit(#[from] CommitError),
    #[error(transparent)]
    Teardown(#[from] TeardownError),
}

impl RunError {
    pub(crate) fn code(&self) -> i32 {
        match self {
            Self::Config(err) => err.code(),
            Self::Setup(err) => err.code(),
            Self::Discovery(err) => err.code(),
            Self::NothingBuilt { failures } => failures
                .first()
                .map_or(ENODEV, |failure| failure.error.code()),
            Self::Commit(err) => err.code(),
            Self::Teardown(err) => err.code(),
        }
    }
}

/// Runs the whole sequence against `device` and `allocator`.
///
/// `open` turns an image path into its byte source. `sleep` performs a fixed
/// retirement delay. If waiting for the page flip fails, `sleep` runs once
/// more with [`RetirePolicy::DEFAULT_DELAY`] so the hardware is never torn
/// down under a possibly live scanout. `park` is called after retirement
/// when the config asks to stay resident; teardown follows if it ever
/// returns.
///
/// Frames that were built are always released, also when the commit fails.
/// The first teardown failure is reported after every frame was attempted.
pub(crate) fn execute<D, A, S, O, Z, P>(
    device: &D,
    allocator: &A,
    config: &RunConfig,
    mut open: O,
    mut sleep: Z,
    park: P,
) -> Result<Summary, RunError>
where
    D: DisplayDevice + ?Sized,
    A: BufferAllocator + ?Sized,
    S: ByteSource,
    O: FnMut(&Path) -> Result<S, SourceError>,
    Z: FnMut(Duration),
    P: FnOnce(),
{
    let discovery = Discovery::discover(device)?;
    if config.images.len() > discovery.planes.len() {
        return Err(DiscoveryError::NotEnoughPlanes {
            requested: config.images.len(),
            available: discovery.planes.len(),
        }
        .into());
    }

    let builder = FrameBuilder::new(device, allocator);
    let mut frames = Vec::with_capacity(config.images.len());
    let mut failures = Vec::new();
    for (index, image) in config.images.iter().enumerate() {
        let built = open(&image.path)
            .map_err(BuildError::from)
            .and_then(|mut source| builder.build(&image.spec, &mut source));
        match built {
            Ok(frame) => frames.push(frame),
            Err(error) => {
                log::warn!("image {index} ({}): {error}", image.path.display());
                failures.push(ImageFailure {
                    index,
                    path: image.path.clone(),
                    error,
                });
            }
        }
    }
    if frames.is_empty() {
        return Err(RunError::NothingBuilt { failures });
    }

    let framebuffers: Vec<_> = frames.iter().map(Frame::framebuffer).collect();
    let assignments = match discovery.assign(&framebuffers) {
        Ok(assignments) => assignments,
        Err(err) => {
            release_all(device, allocator, frames)?;
            return Err(err.into());
        }
    };

    if config.modeset {
        let crtc = discovery.crtc.id;
        let connector = &discovery.connector;
        if let Err(err) = device.set_mode(crtc, connector.id, &connector.mode, framebuffers[0].id) {
            log::warn!("modeset of crtc {crtc} on connector {} failed: {err}", connector.id);
        }
    }

    let report = commit(
        device,
        &discovery.crtc,
        &discovery.connector,
        &assignments,
        &CommitPolicy::default(),
        config.retire.commit_flags(),
    );

    let mut retired = None;
    if report.is_ok() {
        match wait_for_retirement(device, config.retire, discovery.crtc.id, &mut sleep) {
            Ok(done) => retired = Some(done),
            Err(err) => {
                log::warn!(
                    "{err}; waiting {} ms before teardown",
                    RetirePolicy::DEFAULT_DELAY.as_millis()
                );
                sleep(RetirePolicy::DEFAULT_DELAY);
            }
        }
        if config.stay_resident {
            log::info!("staying resident with {} planes up", frames.len());
            park();
        }
    }

    let built = frames.len();
    let teardown = release_all(device, allocator, frames);
    report.submission.clone()?;
    teardown?;

    Ok(Summary {
        built,
        failures,
        skipped: report.skipped,
        planes: report.planes,
        retired,
    })
}

fn release_all<D, A>(
    device: &D,
    allocator: &A,
    frames: Vec<Frame<A::Buffer>>,
) -> Result<(), TeardownError>
where
    D: DisplayDevice + ?Sized,
    A: BufferAllocator + ?Sized,
{
    let mut first = None;
    for frame in frames {
        if let Err(err) = frame.release(device, allocator) {
            log::error!("{err}");
            first.get_or_insert(err);
        }
    }
    first.map_or(Ok(()), Err)
}
