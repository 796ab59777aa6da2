// Copyright 2026 the Kmsplane Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Device node session.

use std::cell::RefCell;
use std::fmt;
use std::fs::{self, File, OpenOptions};
use std::io;
use std::os::fd::{AsFd, BorrowedFd};
use std::path::{Path, PathBuf};

use drm::ClientCapability;
use drm::Device as _;
use kmsplane_core::error::{ENODEV, SetupError};

use crate::events::FlipBacklog;

/// Directory scanned by [`Card::open_driver`].
pub const DRI_DIR: &str = "/dev/dri";

/// Driver matched when no device is given explicitly.
pub const DEFAULT_DRIVER: &str = "rockchip";

const EIO: i32 = 5;

/// An open display device node with universal planes and atomic commits
/// enabled.
///
/// `Card` implements both [`DisplayDevice`](kmsplane_core::device::DisplayDevice)
/// and [`BufferAllocator`](kmsplane_core::device::BufferAllocator). It is
/// the one session object shared by reference between discovery, frame
/// construction, commit and teardown.
pub struct Card {
    file: File,
    path: PathBuf,
    pub(crate) flips: RefCell<FlipBacklog>,
}

impl fmt::Debug for Card {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Card")
            .field("path", &self.path)
            .finish_non_exhaustive()
    }
}

impl AsFd for Card {
    fn as_fd(&self) -> BorrowedFd<'_> {
        self.file.as_fd()
    }
}

impl drm::Device for Card {}
impl drm::control::Device for Card {}

impl Card {
    /// Flip events kept for CRTCs nobody is waiting on yet.
    pub const FLIP_BACKLOG: usize = 16;

    /// Opens `path` and enables the required client capabilities.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, SetupError> {
        let path = path.as_ref();
        let card = Self::open_node(path).map_err(|err| SetupError::DeviceOpen {
            path: path.display().to_string(),
            code: errno(&err),
        })?;
        card.enable_capabilities()?;
        Ok(card)
    }

    /// Opens the first card node under [`DRI_DIR`] whose kernel driver is
    /// called `driver`.
    pub fn open_driver(driver: &str) -> Result<Self, SetupError> {
        let not_found = || SetupError::DeviceOpen {
            path: driver.to_string(),
            code: ENODEV,
        };
        let mut nodes: Vec<PathBuf> = fs::read_dir(DRI_DIR)
            .map_err(|_| not_found())?
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|path| {
                path.file_name()
                    .and_then(|n| n.to_str())
                    .is_some_and(|n| n.starts_with("card"))
            })
            .collect();
        nodes.sort();

        for path in nodes {
            let card = match Self::open_node(&path) {
                Ok(card) => card,
                Err(err) => {
                    log::debug!("skipping {}: {err}", path.display());
                    continue;
                }
            };
            match card.driver_name() {
                Some(name) if name == driver => {
                    log::info!("opened {} ({name})", path.display());
                    card.enable_capabilities()?;
                    return Ok(card);
                }
                name => log::debug!("skipping {}: driver {name:?}", path.display()),
            }
        }
        Err(not_found())
    }

    /// Path of the opened node.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Kernel driver name, if the driver reports one.
    #[must_use]
    pub fn driver_name(&self) -> Option<String> {
        self.get_driver()
            .ok()
            .map(|driver| driver.name().to_string_lossy().into_owned())
    }

    fn open_node(path: &Path) -> io::Result<Self> {
        let file = OpenOptions::new().read(true).write(true).open(path)?;
        Ok(Self {
            file,
            path: path.to_path_buf(),
            flips: RefCell::new(FlipBacklog::new(Self::FLIP_BACKLOG)),
        })
    }

    fn enable_capabilities(&self) -> Result<(), SetupError> {
        for (cap, name) in [
            (ClientCapability::UniversalPlanes, "universal planes"),
            (ClientCapability::Atomic, "atomic"),
        ] {
            self.set_client_capability(cap, true)
                .map_err(|err| SetupError::Capability {
                    capability: name,
                    code: errno(&err),
                })?;
        }
        Ok(())
    }
}

/// Positive errno carried by `err`, `EIO` when it has none.
pub(crate) fn errno(err: &io::Error) -> i32 {
    err.raw_os_error().unwrap_or(EIO)
}
