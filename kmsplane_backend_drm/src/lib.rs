// Copyright 2026 the Kmsplane Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Linux DRM/KMS backend for kmsplane.
//!
//! [`Card`] is an open `/dev/dri/card*` node with universal planes and
//! atomic commits enabled. It implements both
//! [`DisplayDevice`](kmsplane_core::device::DisplayDevice), over the
//! mode-setting ioctls, and
//! [`BufferAllocator`](kmsplane_core::device::BufferAllocator), over dumb
//! buffers exported and imported as dmabufs.
//!
//! ```rust,ignore
//! use kmsplane_backend_drm::Card;
//! use kmsplane_core::discovery::Discovery;
//!
//! let card = Card::open_driver("rockchip")?;
//! let discovery = Discovery::discover(&card)?;
//! ```
//!
//! Page-flip events requested by a commit are read from the node by
//! [`DisplayDevice::wait_page_flip`](kmsplane_core::device::DisplayDevice::wait_page_flip);
//! events for other CRTCs are held in a small backlog that evicts the
//! oldest entry when full.

mod allocator;
mod card;
mod device;
mod dmabuf;
mod events;
mod time;

pub use allocator::{CardBuffer, CardMapping};
pub use card::{Card, DEFAULT_DRIVER, DRI_DIR};
pub use dmabuf::DmabufMapping;
pub use time::now;
