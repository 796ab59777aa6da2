// Copyright 2026 the Kmsplane Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Command-line arguments and their validation.

use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;
use kmsplane_backend_drm::DEFAULT_DRIVER;
use kmsplane_core::error::EINVAL;
use kmsplane_core::format::PixelFormat;
use kmsplane_core::frame::ImageSpec;
use kmsplane_core::retire::RetirePolicy;
use thiserror::Error;

/// Show raw images on hardware overlay planes with one atomic commit.
///
/// Each file is loaded into its own scanout buffer and placed on its own
/// plane at the top-left corner, stacked in the order given (first file at
/// the bottom).
#[derive(Parser, Debug, Clone, PartialEq, Eq)]
#[command(name = "kmsplane", version, about)]
pub(crate) struct Args {
    /// 1 registers buffers with the AFBC compression modifier, 0 without.
    #[arg(value_parser = clap::value_parser!(u8).range(0..=1))]
    pub(crate) compress: u8,

    /// Image width in pixels.
    #[arg(value_parser = clap::value_parser!(u32).range(1..))]
    pub(crate) width: u32,

    /// Image height in pixels.
    #[arg(value_parser = clap::value_parser!(u32).range(1..))]
    pub(crate) height: u32,

    /// Number of images.
    #[arg(value_parser = clap::value_parser!(u32).range(1..))]
    pub(crate) count: u32,

    /// Raw image files, exactly COUNT of them, bottom-most first.
    #[arg(required = true, num_args = 1..)]
    pub(crate) files: Vec<PathBuf>,

    /// Device node to open instead of searching by driver name.
    #[arg(long, value_name = "PATH", conflicts_with = "driver")]
    pub(crate) device: Option<PathBuf>,

    /// Kernel driver whose card node is opened.
    #[arg(long, value_name = "NAME", default_value = DEFAULT_DRIVER)]
    pub(crate) driver: String,

    /// Pixel format of the files: a name such as XBGR8888 or a
    /// four-character code such as XB24.
    #[arg(long, value_name = "FORMAT", default_value = "XBGR8888", value_parser = parse_format)]
    pub(crate) format: PixelFormat,

    /// Import an existing dmabuf for the image at the same position instead
    /// of allocating. Repeat once per image, in order.
    #[arg(long = "import-fd", value_name = "FD")]
    pub(crate) import_fds: Vec<i32>,

    /// Milliseconds to keep the images up before teardown.
    #[arg(long, value_name = "MS", default_value_t = 5000)]
    pub(crate) retire_wait_ms: u64,

    /// Wait for the page-flip event instead of a fixed delay; the delay
    /// becomes the timeout.
    #[arg(long)]
    pub(crate) vblank: bool,

    /// Do not bind the output mode before the commit.
    #[arg(long)]
    pub(crate) skip_modeset: bool,

    /// Keep the images up and wait to be signalled instead of tearing down.
    #[arg(long)]
    pub(crate) stay_resident: bool,
}

fn parse_format(value: &str) -> Result<PixelFormat, String> {
    if let Some(format) = PixelFormat::from_name(value) {
        return Ok(format);
    }
    match <[u8; 4]>::try_from(value.as_bytes()) {
        Ok(code) if code.iter().all(|c| c.is_ascii_graphic() || *c == b' ') => {
            Ok(PixelFormat::from_fourcc(code))
        }
        _ => Err(format!(
            "`{value}` is neither a known format name nor a four-character code"
        )),
    }
}

/// Which device node to open.
#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) enum DeviceSelector {
    /// An explicit node.
    Path(PathBuf),
    /// The first node driven by this kernel driver.
    Driver(String),
}

/// One image to show.
#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) struct ImageConfig {
    /// File holding the raw pixels.
    pub(crate) path: PathBuf,
    /// Geometry, format and allocation source.
    pub(crate) spec: ImageSpec,
}

/// Validated run configuration.
#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) struct RunConfig {
    pub(crate) device: DeviceSelector,
    pub(crate) images: Vec<ImageConfig>,
    pub(crate) retire: RetirePolicy,
    pub(crate) modeset: bool,
    pub(crate) stay_resident: bool,
}

/// Arguments that parse but do not describe a valid run.
#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub(crate) enum ConfigError {
    /// The file list does not match the declared image count.
    #[error("{count} images declared but {files} files given")]
    CountMismatch { count: usize, files: usize },
    /// More import descriptors than images.
    #[error("{fds} import descriptors given for {count} images")]
    TooManyImports { fds: usize, count: usize },
}

impl ConfigError {
    pub(crate) const fn code(&self) -> i32 {
        EINVAL
    }
}

impl Args {
    /// Checks cross-argument constraints and builds the run configuration.
    pub(crate) fn into_config(self) -> Result<RunConfig, ConfigError> {
        let count = usize::try_from(self.count).unwrap_or(usize::MAX);
        if self.files.len() != count {
            return Err(ConfigError::CountMismatch {
                count,
                files: self.files.len(),
            });
        }
        if self.import_fds.len() > count {
            return Err(ConfigError::TooManyImports {
                fds: self.import_fds.len(),
                count,
            });
        }

        let images = self
            .files
            .into_iter()
            .enumerate()
            .map(|(index, path)| ImageConfig {
                path,
                spec: ImageSpec {
                    compress: self.compress == 1,
                    external_fd: self.import_fds.get(index).copied(),
                    ..ImageSpec::new(self.width, self.height, self.format)
                },
            })
            .collect();

        let wait = Duration::from_millis(self.retire_wait_ms);
        let retire = if self.vblank {
            RetirePolicy::PageFlipEvent { timeout: wait }
        } else {
            RetirePolicy::FixedDelay(wait)
        };

        let device = match self.device {
            Some(path) => DeviceSelector::Path(path),
            None => DeviceSelector::Driver(self.driver),
        };

        Ok(RunConfig {
            device,
            images,
            retire,
            modeset: !self.skip_modeset,
            stay_resident: self.stay_resident,
        })
    }
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;
    use std::time::Duration;

    use clap::Parser;
    use clap::error::ErrorKind;
    use kmsplane_core::format::{AFBC_MODIFIER, PixelFormat};
    use kmsplane_core::retire::RetirePolicy;

    use super::{Args, ConfigError, DeviceSelector};

    fn parse(args: &[&str]) -> Result<Args, clap::Error> {
        Args::try_parse_from(std::iter::once("kmsplane").chain(args.iter().copied()))
    }

    #[test]
    fn positional_arguments_build_one_spec_per_file() {
        let config = parse(&["0", "640", "480", "2", "a.raw", "b.raw"])
            .unwrap()
            .into_config()
            .unwrap();

        assert_eq!(config.images.len(), 2);
        assert_eq!(config.images[0].path, PathBuf::from("a.raw"));
        assert_eq!(config.images[1].path, PathBuf::from("b.raw"));
        let spec = config.images[1].spec;
        assert_eq!((spec.width, spec.height), (640, 480));
        assert_eq!(spec.format, PixelFormat::XBGR8888);
        assert_eq!(spec.modifier(), None);
        assert_eq!(spec.external_fd, None);
        assert_eq!(config.device, DeviceSelector::Driver("rockchip".into()));
        assert_eq!(
            config.retire,
            RetirePolicy::FixedDelay(Duration::from_secs(5))
        );
        assert!(config.modeset);
        assert!(!config.stay_resident);
    }

    #[test]
    fn compress_flag_selects_afbc() {
        let config = parse(&["1", "64", "64", "1", "a.raw"])
            .unwrap()
            .into_config()
            .unwrap();
        assert_eq!(config.images[0].spec.modifier(), Some(AFBC_MODIFIER));
    }

    #[test]
    fn compress_must_be_zero_or_one() {
        let err = parse(&["2", "64", "64", "1", "a.raw"]).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ValueValidation);
    }

    #[test]
    fn zero_count_is_rejected() {
        let err = parse(&["0", "64", "64", "0", "a.raw"]).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ValueValidation);
    }

    #[test]
    fn missing_files_are_rejected() {
        let err = parse(&["0", "64", "64", "1"]).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::MissingRequiredArgument);
    }

    #[test]
    fn every_declared_image_needs_its_own_file() {
        let err = parse(&["0", "64", "64", "3", "a.raw", "b.raw"])
            .unwrap()
            .into_config()
            .unwrap_err();
        assert_eq!(err, ConfigError::CountMismatch { count: 3, files: 2 });

        let err = parse(&["0", "64", "64", "1", "a.raw", "b.raw"])
            .unwrap()
            .into_config()
            .unwrap_err();
        assert_eq!(err, ConfigError::CountMismatch { count: 1, files: 2 });
    }

    #[test]
    fn import_fds_apply_by_position() {
        let config = parse(&[
            "--import-fd",
            "7",
            "0",
            "64",
            "64",
            "2",
            "a.raw",
            "b.raw",
        ])
        .unwrap()
        .into_config()
        .unwrap();
        assert_eq!(config.images[0].spec.external_fd, Some(7));
        assert_eq!(config.images[1].spec.external_fd, None);

        let err = parse(&[
            "--import-fd",
            "7",
            "--import-fd",
            "8",
            "0",
            "64",
            "64",
            "1",
            "a.raw",
        ])
        .unwrap()
        .into_config()
        .unwrap_err();
        assert_eq!(err, ConfigError::TooManyImports { fds: 2, count: 1 });
    }

    #[test]
    fn options_override_defaults() {
        let config = parse(&[
            "--device",
            "/dev/dri/card1",
            "--format",
            "rgb565",
            "--retire-wait-ms",
            "250",
            "--vblank",
            "--skip-modeset",
            "--stay-resident",
            "0",
            "64",
            "64",
            "1",
            "a.raw",
        ])
        .unwrap()
        .into_config()
        .unwrap();

        assert_eq!(
            config.device,
            DeviceSelector::Path(PathBuf::from("/dev/dri/card1"))
        );
        assert_eq!(config.images[0].spec.format, PixelFormat::RGB565);
        assert_eq!(
            config.retire,
            RetirePolicy::PageFlipEvent {
                timeout: Duration::from_millis(250)
            }
        );
        assert!(!config.modeset);
        assert!(config.stay_resident);
    }

    #[test]
    fn device_and_driver_are_exclusive() {
        let err = parse(&[
            "--device",
            "/dev/dri/card0",
            "--driver",
            "vc4",
            "0",
            "64",
            "64",
            "1",
            "a.raw",
        ])
        .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ArgumentConflict);
    }

    #[test]
    fn format_accepts_names_and_fourcc_codes() {
        let args = parse(&["--format", "NV12", "0", "8", "8", "1", "a.raw"]).unwrap();
        assert_eq!(args.format, PixelFormat::from_fourcc(*b"NV12"));
        assert_eq!(args.format.pixel_size(), None);

        let args = parse(&["--format", "XB24", "0", "8", "8", "1", "a.raw"]).unwrap();
        assert_eq!(args.format, PixelFormat::XBGR8888);

        let err = parse(&["--format", "bogus-format", "0", "8", "8", "1", "a.raw"]).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ValueValidation);
    }
}
