// Copyright 2026 the Kmsplane Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Page-flip completion events.
//!
//! Commits submitted with the page-flip event flag make the kernel queue one
//! event per affected CRTC on the device node. [`Card::wait_flip`] polls the
//! node until an event for the requested CRTC arrives. Events for other CRTCs
//! are kept in a [`FlipBacklog`] so a later wait on that CRTC can return
//! immediately.

use core::time::Duration;
use std::collections::VecDeque;

use drm::control::{Device as ControlDevice, Event};
use kmsplane_core::device::PageFlip;
use kmsplane_core::error::{DeviceError, ETIMEDOUT};
use kmsplane_core::object::CrtcId;
use rustix::event::{PollFd, PollFlags, poll};
use rustix::io::Errno;

use crate::card::Card;
use crate::device::{io_err, raw};
use crate::time;

const OP: &str = "wait page flip";

/// Flips nobody has claimed yet, oldest first.
///
/// Holds at most `capacity` flips; holding one more evicts the oldest.
#[derive(Debug)]
pub(crate) struct FlipBacklog {
    flips: VecDeque<PageFlip>,
    capacity: usize,
    evicted: u64,
}

impl FlipBacklog {
    pub(crate) fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            flips: VecDeque::with_capacity(capacity),
            capacity,
            evicted: 0,
        }
    }

    /// Removes and returns the oldest flip held for `crtc`.
    pub(crate) fn claim(&mut self, crtc: CrtcId) -> Option<PageFlip> {
        let index = self.flips.iter().position(|flip| flip.crtc == crtc)?;
        self.flips.remove(index)
    }

    fn hold(&mut self, flip: PageFlip) {
        if self.flips.len() == self.capacity {
            self.flips.pop_front();
            self.evicted += 1;
        }
        self.flips.push_back(flip);
    }
}

impl Card {
    pub(crate) fn wait_flip(&self, crtc: CrtcId, timeout: Duration) -> Result<PageFlip, DeviceError> {
        if let Some(flip) = self.flips.borrow_mut().claim(crtc) {
            return Ok(flip);
        }

        let deadline = time::now().saturating_add(timeout);
        loop {
            let remaining = deadline.saturating_sub(time::now());
            if remaining.is_zero() {
                return Err(DeviceError::new(OP, ETIMEDOUT));
            }

            let mut fds = [PollFd::new(self, PollFlags::IN)];
            match poll(&mut fds, Some(&time::duration_to_timespec(remaining))) {
                Ok(0) | Err(Errno::INTR) => continue,
                Ok(_) => {}
                Err(err) => {
                    let description = err.to_string();
                    return Err(DeviceError::new(OP, err.raw_os_error()).with_description(description));
                }
            }

            let flips = self
                .receive_events()
                .map_err(io_err(OP))?
                .filter_map(|event| match event {
                    Event::PageFlip(flip) => Some(PageFlip {
                        crtc: CrtcId(raw(flip.crtc)),
                        sequence: flip.frame,
                        timestamp: flip.duration,
                    }),
                    _ => None,
                });
            let mut backlog = self.flips.borrow_mut();
            if let Some(flip) = route_flips(flips, crtc, &mut backlog) {
                log::debug!(
                    "crtc {crtc}: flip {} observed {:?} after completion",
                    flip.sequence,
                    time::now().saturating_sub(flip.timestamp)
                );
                return Ok(flip);
            }
        }
    }
}

/// Returns the first flip for `crtc` and holds every other one.
fn route_flips(
    flips: impl Iterator<Item = PageFlip>,
    crtc: CrtcId,
    backlog: &mut FlipBacklog,
) -> Option<PageFlip> {
    let evicted_before = backlog.evicted;
    let mut found = None;
    for flip in flips {
        if found.is_none() && flip.crtc == crtc {
            found = Some(flip);
        } else {
            backlog.hold(flip);
        }
    }
    let evicted = backlog.evicted - evicted_before;
    if evicted > 0 {
        log::warn!("{evicted} unclaimed page flip events dropped");
    }
    found
}

#[cfg(test)]
mod tests {
    use core::time::Duration;

    use kmsplane_core::device::PageFlip;
    use kmsplane_core::object::CrtcId;

    use super::{FlipBacklog, route_flips};

    fn flip(crtc: u32, sequence: u32) -> PageFlip {
        PageFlip {
            crtc: CrtcId(crtc),
            sequence,
            timestamp: Duration::from_millis(u64::from(sequence) * 16),
        }
    }

    #[test]
    fn matching_flip_is_returned_and_others_held() {
        let mut backlog = FlipBacklog::new(4);
        let found = route_flips(
            [flip(2, 1), flip(1, 2), flip(1, 3)].into_iter(),
            CrtcId(1),
            &mut backlog,
        );

        assert_eq!(found, Some(flip(1, 2)));
        assert_eq!(backlog.claim(CrtcId(2)), Some(flip(2, 1)));
        assert_eq!(backlog.claim(CrtcId(1)), Some(flip(1, 3)));
        assert_eq!(backlog.claim(CrtcId(1)), None);
    }

    #[test]
    fn full_backlog_evicts_the_oldest_flip() {
        let mut backlog = FlipBacklog::new(2);
        let found = route_flips(
            [flip(2, 1), flip(3, 2), flip(2, 3)].into_iter(),
            CrtcId(1),
            &mut backlog,
        );

        assert_eq!(found, None);
        assert_eq!(backlog.evicted, 1);
        assert_eq!(backlog.claim(CrtcId(2)), Some(flip(2, 3)));
        assert_eq!(backlog.claim(CrtcId(3)), Some(flip(3, 2)));
    }

    #[test]
    fn zero_capacity_still_holds_one_flip() {
        let mut backlog = FlipBacklog::new(0);
        route_flips([flip(5, 1), flip(5, 2)].into_iter(), CrtcId(1), &mut backlog);

        assert_eq!(backlog.claim(CrtcId(5)), Some(flip(5, 2)));
        assert_eq!(backlog.claim(CrtcId(5)), None);
    }
}
