// Copyright 2026 the Kmsplane Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! `kmsplane` puts raw image files on hardware overlay planes with one
//! atomic commit, keeps them up until the commit retires, then releases
//! every buffer.
//!
//! ```text
//! kmsplane [OPTIONS] <COMPRESS> <WIDTH> <HEIGHT> <COUNT> <FILES>...
//! ```
//!
//! Logging goes through `env_logger`; set `RUST_LOG=debug` to see geometry
//! and per-plane details. The exit status is 0 after a clean teardown and
//! the errno of the first failure otherwise.

use std::process::ExitCode;
use std::thread;

use clap::Parser;
use env_logger::Env;
use kmsplane_backend_drm::Card;

mod cli;
mod run;
mod source;

use cli::{Args, DeviceSelector};
use run::{RunError, Summary, execute};
use source::FileSource;

fn main() -> ExitCode {
    env_logger::Builder::from_env(Env::default().default_filter_or("info")).init();

    match try_main(Args::parse()) {
        Ok(summary) => {
            report(&summary);
            exit_code(summary.code())
        }
        Err(err) => {
            log::error!("{err}");
            if let RunError::NothingBuilt { failures } = &err {
                for failure in failures {
                    eprintln!("  image {}: {}", failure.path.display(), failure.error);
                }
            }
            exit_code(err.code().max(1))
        }
    }
}

fn try_main(args: Args) -> Result<Summary, RunError> {
    let config = args.into_config()?;
    let card = match &config.device {
        DeviceSelector::Path(path) => Card::open(path)?,
        DeviceSelector::Driver(name) => Card::open_driver(name)?,
    };
    log::info!(
        "opened {} ({})",
        card.path().display(),
        card.driver_name().as_deref().unwrap_or("unknown driver")
    );

    execute(
        &card,
        &card,
        &config,
        FileSource::open,
        thread::sleep,
        || park_forever(),
    )
}

fn report(summary: &Summary) {
    for plane in &summary.planes {
        log::debug!(
            "plane {} showed fb {} at zpos {}",
            plane.plane,
            plane.framebuffer,
            plane.zpos
        );
    }
    if !summary.skipped.is_empty() {
        log::warn!(
            "{} properties were left out of the commit",
            summary.skipped.len()
        );
    }
    match summary.retired {
        Some(retired) => log::debug!("retired: {retired:?}"),
        None => log::warn!("tore down without confirmed retirement"),
    }
    if summary.failures.is_empty() {
        log::info!("showed {} images", summary.built);
        return;
    }
    eprintln!(
        "{} of {} images failed:",
        summary.failures.len(),
        summary.failures.len() + summary.built
    );
    for failure in &summary.failures {
        eprintln!(
            "  #{} {}: {}",
            failure.index,
            failure.path.display(),
            failure.error
        );
    }
}

fn exit_code(code: i32) -> ExitCode {
    match u8::try_from(code) {
        Ok(0) => ExitCode::SUCCESS,
        Ok(code) => ExitCode::from(code),
        Err(_) => ExitCode::FAILURE,
    }
}

/// Blocks until the process is signalled.
fn park_forever() -> ! {
    log::info!("resident; send SIGINT or SIGTERM to exit");
    loop {
        thread::park();
    }
}
