//! Tracing setup.
//!
//! The library only emits `tracing` events; binaries and tests decide where
//! they go. Per-observation events are logged at `trace` under
//! [`OBSERVATION_TARGET`] and are off unless that target is enabled
//! explicitly, e.g. `RUST_LOG=info,cartpole_rig::packets::observation=trace`.

use tracing_subscriber::{EnvFilter, fmt, prelude::*};

use crate::error::{Result, RigError};

/// Target of per-observation trace events.
pub const OBSERVATION_TARGET: &str = "cartpole_rig::packets::observation";

/// Target of messages relayed from the controller firmware.
pub const CONTROLLER_TARGET: &str = "cartpole_rig::controller";

/// Suggested fallback for [`init`] and [`try_init`].
pub const DEFAULT_FILTER: &str = "info,cartpole_rig::packets::observation=off";

/// Installs a formatted stderr subscriber.
///
/// `RUST_LOG` wins when it is set and parses; otherwise `filter` is used.
/// Fails on an invalid `filter` or if a global subscriber is already
/// installed.
pub fn try_init(filter: &str) -> Result<()> {
    let filter = resolve_filter(std::env::var(EnvFilter::DEFAULT_ENV).ok().as_deref(), filter)?;
    tracing_subscriber::registry()
        .with(fmt::layer().with_target(true).with_writer(std::io::stderr))
        .with(filter)
        .try_init()
        .map_err(|e| RigError::config(format!("could not install tracing subscriber: {e}")))
}

/// Like [`try_init`], ignoring an already installed subscriber.
pub fn init(filter: &str) {
    if let Err(e) = try_init(filter) {
        tracing::debug!(error = %e, "Tracing not initialised");
    }
}

fn resolve_filter(from_env: Option<&str>, fallback: &str) -> Result<EnvFilter> {
    if let Some(directives) = from_env.filter(|d| !d.trim().is_empty()) {
        match EnvFilter::try_new(directives) {
            Ok(filter) => return Ok(filter),
            Err(e) => eprintln!("ignoring invalid {}: {e}", EnvFilter::DEFAULT_ENV),
        }
    }
    EnvFilter::try_new(fallback).map_err(|e| RigError::config(format!("invalid log filter '{fallback}': {e}")))
}
