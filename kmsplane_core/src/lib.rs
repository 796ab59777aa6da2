// Copyright 2026 the Kmsplane Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Resource discovery, property resolution and atomic plane commits for
//! display controllers.
//!
//! `kmsplane_core` models the steps needed to put a set of images on
//! hardware overlay planes in one indivisible update. It is `no_std`
//! compatible (with `alloc`) and talks to hardware only through the
//! [`device`] contracts, so every step can be exercised against an
//! in-memory device.
//!
//! # Architecture
//!
//! ```text
//!   DisplayDevice ──► Discovery::discover() ──► Discovery
//!                         (PropertyResolver)       │
//!                                                  │ planes
//!   BufferAllocator ──► FrameBuilder::build() ──► Frame ─┐
//!                                                  │     │
//!                                                  ▼     │
//!                     commit::commit() ◄── PlaneAssignment
//!                            │
//!                            ▼
//!                      CommitReport ──► retire ──► Frame::deregister / free
//! ```
//!
//! **[`object`]**: Typed identifiers for CRTCs, connectors, planes,
//! framebuffers and properties.
//!
//! **[`format`]**: Pixel-format codes, the pixel-size table and the
//! 64-byte aligned stride computation.
//!
//! **[`device`]**: The [`DisplayDevice`](device::DisplayDevice) and
//! [`BufferAllocator`](device::BufferAllocator) traits that backends
//! implement.
//!
//! **[`property`]**: Name-based property resolution with per-kind name
//! caching.
//!
//! **[`discovery`]**: Selection of the pipeline and output, and plane
//! capability gathering.
//!
//! **[`frame`]**: Allocation, fill and framebuffer registration for one
//! image, plus the deregister-then-free teardown order.
//!
//! **[`atomic`]**: The ordered property triples submitted in one commit.
//!
//! **[`commit`]**: Builds and submits the multi-object atomic request.
//!
//! **[`retire`]**: Waiting for a commit to retire before teardown.
//!
//! **[`error`]**: Error taxonomy shared by all stages.
//!
//! # Crate features
//!
//! - `fake` (disabled by default): Exposes [`fake`], an in-memory device and
//!   allocator that record every call.

#![no_std]
#![cfg_attr(docsrs, feature(doc_auto_cfg))]

extern crate alloc;

pub mod atomic;
pub mod commit;
pub mod device;
pub mod discovery;
pub mod error;
#[cfg(any(test, feature = "fake"))]
pub mod fake;
pub mod format;
pub mod frame;
pub mod object;
pub mod property;
pub mod retire;
