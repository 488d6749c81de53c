pub mod commands;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod events;
pub mod logger;
pub mod peer;
pub mod session;
pub mod signaling;
pub mod utils;

#[cfg(test)]
pub(crate) mod testing;

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::timeout;
use tracing::{info, warn};

use crate::config::ClientConfig;
use crate::dispatch::{Dispatcher, Exit, Intent};
use crate::error::ClientError;
use crate::events::Emitter;
use crate::peer::call::EngineChannels;
use crate::peer::{CallEngine, RtcLinkFactory, TrackMedia};
use crate::session::PairingController;
use crate::signaling::{WsChannel, WsSignaling};

/// How long queued signaling frames get to leave after the loop stops
const FLUSH_TIMEOUT: Duration = Duration::from_secs(2);

/// Connects to the matching server and runs the client until the user quits
/// or the signaling channel goes away.
///
/// `intents` carries user actions in; `emitter` carries [`events::ClientEvent`]s out.
pub async fn run(
    config: ClientConfig,
    intents: mpsc::UnboundedReceiver<Intent>,
    emitter: Emitter,
) -> Result<Exit, ClientError> {
    config.validate()?;
    let WsChannel {
        signaling,
        inbound,
        writer,
    } = WsSignaling::connect(&config.server_url).await?;
    let signaling = Arc::new(signaling);

    let (channels, receivers) = EngineChannels::new();
    let engine = CallEngine::new(
        Arc::new(TrackMedia::new(None)),
        Arc::new(RtcLinkFactory),
        signaling.clone(),
        emitter.clone(),
        config.ice_servers.clone(),
        channels,
        config.call_timings(),
    );
    let mut controller = PairingController::new(engine, signaling, emitter);
    if !config.interests.is_empty() {
        controller.request_match(config.interests.clone())?;
    }

    info!(server = %config.server_url, "client running");
    let exit = Dispatcher::new(controller, inbound, intents, receivers)
        .run()
        .await;

    // the dispatcher owned every sender, so the writer drains and closes now
    if timeout(FLUSH_TIMEOUT, writer).await.is_err() {
        warn!("signaling frames not flushed in time");
    }
    info!(?exit, "client stopped");
    Ok(exit)
}
