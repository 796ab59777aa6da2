// Copyright 2026 the Kmsplane Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Commit retirement.
//!
//! After a commit the hardware keeps scanning out the old framebuffers until
//! the next vertical blank. Releasing them earlier tears the image, so the
//! caller waits for the commit to retire before teardown. Two policies:
//!
//! - [`RetirePolicy::FixedDelay`]: sleep for a fixed time. This needs no
//!   event support from the device.
//! - [`RetirePolicy::PageFlipEvent`]: commit with
//!   [`CommitFlags::page_flip_event`] and block on the completion event for
//!   the committed CRTC.

use core::time::Duration;

use crate::atomic::CommitFlags;
use crate::device::{DisplayDevice, PageFlip};
use crate::error::{ETIMEDOUT, RetireError};
use crate::object::CrtcId;

/// How to wait for a commit to retire.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum RetirePolicy {
    /// Sleep for the given duration.
    FixedDelay(Duration),
    /// Wait for the flip-complete event, up to `timeout`.
    PageFlipEvent {
        /// Upper bound on the wait.
        timeout: Duration,
    },
}

impl RetirePolicy {
    /// Delay used by [`Default`].
    pub const DEFAULT_DELAY: Duration = Duration::from_millis(5000);

    /// Flags the commit must carry for this policy to observe retirement.
    #[must_use]
    pub const fn commit_flags(self) -> CommitFlags {
        CommitFlags {
            page_flip_event: matches!(self, Self::PageFlipEvent { .. }),
        }
    }
}

impl Default for RetirePolicy {
    fn default() -> Self {
        Self::FixedDelay(Self::DEFAULT_DELAY)
    }
}

/// How a commit was observed to retire.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Retired {
    /// The fixed delay elapsed.
    Elapsed(Duration),
    /// The device reported the flip.
    Flipped(PageFlip),
}

/// Waits for the last commit on `crtc` to retire according to `policy`.
///
/// `sleep` performs the fixed delay; it is never called for
/// [`RetirePolicy::PageFlipEvent`].
pub fn wait_for_retirement<D, S>(
    device: &D,
    policy: RetirePolicy,
    crtc: CrtcId,
    sleep: S,
) -> Result<Retired, RetireError>
where
    D: DisplayDevice + ?Sized,
    S: FnOnce(Duration),
{
    match policy {
        RetirePolicy::FixedDelay(delay) => {
            log::debug!("waiting {} ms for crtc {crtc} to retire", delay.as_millis());
            sleep(delay);
            Ok(Retired::Elapsed(delay))
        }
        RetirePolicy::PageFlipEvent { timeout } => match device.wait_page_flip(crtc, timeout) {
            Ok(flip) => {
                log::debug!(
                    "crtc {} flipped at sequence {} ({:?})",
                    flip.crtc,
                    flip.sequence,
                    flip.timestamp
                );
                Ok(Retired::Flipped(flip))
            }
            Err(err) if err.code == ETIMEDOUT => Err(RetireError::Timeout {
                crtc,
                timeout_ms: u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX),
            }),
            Err(err) => Err(RetireError::Device(err)),
        },
    }
}
