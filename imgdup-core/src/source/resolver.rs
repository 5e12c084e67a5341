//! Access method resolution.
//!
//! Decides which source adapter a scan should use and which ingestion mode
//! follows from that choice.
//!
//! ## Policy
//!
//! 1. Ask the lower-privilege source whether it administers the channel.
//! 2. If it does, run a trial fetch through it. Any messages back means the
//!    cheap metadata path works: lightweight ingestion.
//! 3. Otherwise use the richer history source when one is configured.
//! 4. Without one, fall back to lightweight ingestion and warn.

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{info, instrument, warn};

use super::{MessageSource, SharedSource};
use crate::config::IngestionMode;

/// Messages requested by the trial fetch.
const TRIAL_FETCH_LIMIT: usize = 1;

/// Outcome of automatic method resolution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Resolution {
    /// Admin access confirmed and the trial fetch returned messages.
    Lightweight,
    /// Richer history retrieval with downloads.
    Richer,
    /// Richer retrieval was needed but is not configured.
    RicherUnavailableFallback,
}

impl Resolution {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Lightweight => "lightweight",
            Self::Richer => "richer",
            Self::RicherUnavailableFallback => "richer-unavailable-fallback",
        }
    }
}

impl fmt::Display for Resolution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Source selected for a scan, with the ingestion mode to run it in.
#[derive(Clone)]
pub struct ResolvedSource {
    pub source: SharedSource,
    /// `None` when the method was chosen explicitly rather than resolved.
    pub resolution: Option<Resolution>,
    pub ingestion_mode: IngestionMode,
}

impl fmt::Debug for ResolvedSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResolvedSource")
            .field("source", &self.source.kind())
            .field("resolution", &self.resolution)
            .field("ingestion_mode", &self.ingestion_mode)
            .finish()
    }
}

impl ResolvedSource {
    /// Use `source` as-is, bypassing resolution.
    pub fn explicit(source: SharedSource, ingestion_mode: IngestionMode) -> Self {
        Self {
            source,
            resolution: None,
            ingestion_mode,
        }
    }

    /// Provenance tag stamped on every record this source produces.
    pub fn provenance(&self) -> String {
        format!("{}/{}", self.source.kind(), self.ingestion_mode.as_str())
    }
}

/// Resolve the access method for `channel`.
///
/// Never fails: errors from the admin check or the trial fetch count as a
/// denial and move resolution on to the richer method.
#[instrument(level = "info", skip(lightweight, richer), fields(richer_configured = richer.is_some()))]
pub async fn resolve_method(
    lightweight: SharedSource,
    richer: Option<SharedSource>,
    channel: &str,
) -> ResolvedSource {
    if trial_succeeds(lightweight.as_ref(), channel).await {
        info!(source = %lightweight.kind(), "Resolved lightweight method");
        return ResolvedSource {
            source: lightweight,
            resolution: Some(Resolution::Lightweight),
            ingestion_mode: IngestionMode::Lightweight,
        };
    }

    match richer {
        Some(source) => {
            info!(source = %source.kind(), "Resolved richer history method");
            ResolvedSource {
                source,
                resolution: Some(Resolution::Richer),
                ingestion_mode: IngestionMode::WithDownload,
            }
        }
        None => {
            warn!(
                channel,
                "Richer history retrieval not configured, falling back to lightweight method"
            );
            ResolvedSource {
                source: lightweight,
                resolution: Some(Resolution::RicherUnavailableFallback),
                ingestion_mode: IngestionMode::Lightweight,
            }
        }
    }
}

async fn trial_succeeds(source: &dyn MessageSource, channel: &str) -> bool {
    match source.is_admin(channel).await {
        Ok(true) => {}
        Ok(false) => {
            info!(channel, "No administrative access through lightweight source");
            return false;
        }
        Err(e) => {
            warn!(error = %e, "Admin check failed");
            return false;
        }
    }

    match source.fetch_batch(channel, TRIAL_FETCH_LIMIT, None).await {
        Ok(batch) if !batch.is_empty() => true,
        Ok(_) => {
            info!(channel, "Trial fetch returned no messages");
            false
        }
        Err(e) => {
            warn!(error = %e, "Trial fetch failed");
            false
        }
    }
}

/// Wrap any concrete source into a [`SharedSource`].
pub fn shared<S: MessageSource + 'static>(source: S) -> SharedSource {
    Arc::new(source)
}
