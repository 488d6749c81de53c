use tracing::debug;
use tracing_subscriber::fmt::time::ChronoLocal;
use tracing_subscriber::EnvFilter;

use crate::config::LoggingConfig;
use crate::error::ClientError;
use crate::peer::types::IceCandidate;

const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.3f";

/// Installs the global tracing subscriber.
///
/// `RUST_LOG` wins over the configured filter. With logging disabled only
/// warnings and errors get through.
pub fn init(config: &LoggingConfig) -> Result<(), ClientError> {
    let fallback = if config.enabled && crate::config::LOGGING_ENABLED {
        config.filter.as_str()
    } else {
        "warn"
    };
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(fallback))
        .map_err(|e| ClientError::Logger(e.to_string()))?;

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_timer(ChronoLocal::new(TIMESTAMP_FORMAT.to_owned()))
        .with_target(false)
        .try_init()
        .map_err(|e| ClientError::Logger(e.to_string()))
}

/// Logs a trickled candidate as it appears
pub fn dump_candidate(label: &str, cand: &IceCandidate) {
    debug!(
        call_id = %cand.call_id,
        candidate = %cand.candidate,
        sdp_mid = ?cand.sdp_mid,
        sdp_mline_index = ?cand.sdp_mline_index,
        "trickle {label}"
    );
}
