use std::collections::BTreeSet;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, info};

use crate::peer::call::{EngineReceivers, SetupOutcome};
use crate::peer::link::LinkEvent;
use crate::session::PairingController;
use crate::signaling::InboundEvent;

/// Something the local user asked for
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Intent {
    /// `None` reuses the interests of the previous request.
    RequestMatch(Option<BTreeSet<String>>),
    SendText(String),
    Disconnect,
    Rematch,
    StartCall,
    AcceptCall,
    RejectCall,
    HangUp,
    ToggleMute,
    Quit,
}

/// Why the dispatch loop returned
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Exit {
    Quit,
    ChannelLost,
}

const TICK: Duration = Duration::from_secs(1);

/// Serializes every event source onto one controller.
///
/// Each event is handled to completion before the next one is taken, so
/// transitions never interleave. Slow call setup runs elsewhere and comes
/// back as an event of its own.
pub struct Dispatcher {
    controller: PairingController,
    inbound: mpsc::UnboundedReceiver<InboundEvent>,
    intents: mpsc::UnboundedReceiver<Intent>,
    link_events: mpsc::UnboundedReceiver<LinkEvent>,
    setups: mpsc::UnboundedReceiver<SetupOutcome>,
}

impl Dispatcher {
    pub fn new(
        controller: PairingController,
        inbound: mpsc::UnboundedReceiver<InboundEvent>,
        intents: mpsc::UnboundedReceiver<Intent>,
        engine: EngineReceivers,
    ) -> Self {
        Self {
            controller,
            inbound,
            intents,
            link_events: engine.link_events,
            setups: engine.setups,
        }
    }

    pub fn controller(&self) -> &PairingController {
        &self.controller
    }

    pub async fn run(mut self) -> Exit {
        let mut ticker = interval(TICK);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // the first tick fires immediately
        ticker.tick().await;

        let mut intents_open = true;
        loop {
            tokio::select! {
                biased;

                event = self.inbound.recv() => match event {
                    Some(event) => self.controller.on_signal(event).await,
                    None => {
                        self.controller.on_channel_lost().await;
                        return Exit::ChannelLost;
                    }
                },

                intent = self.intents.recv(), if intents_open => match intent {
                    Some(intent) => {
                        if apply_intent(&mut self.controller, intent).await.is_break() {
                            self.shutdown().await;
                            return Exit::Quit;
                        }
                    }
                    None => {
                        debug!("intent source closed");
                        intents_open = false;
                    }
                },

                Some(event) = self.link_events.recv() => {
                    self.controller.on_link_event(event).await;
                }

                Some(outcome) = self.setups.recv() => {
                    self.controller.on_setup_finished(outcome).await;
                }

                _ = ticker.tick() => self.controller.tick().await,
            }
        }
    }

    /// Leaves the partner so nothing is left hanging on the other side.
    async fn shutdown(&mut self) {
        info!("shutting down");
        if let Err(e) = self.controller.disconnect().await {
            debug!(error = %e, "disconnect on shutdown failed");
        }
    }
}

/// Applies one user intent. Breaks on [`Intent::Quit`].
pub async fn apply_intent(
    controller: &mut PairingController,
    intent: Intent,
) -> std::ops::ControlFlow<()> {
    use std::ops::ControlFlow;

    let (op, res) = match intent {
        Intent::Quit => return ControlFlow::Break(()),
        Intent::RequestMatch(interests) => {
            let interests =
                interests.unwrap_or_else(|| controller.session().interests().clone());
            ("request_match", controller.request_match(interests))
        }
        Intent::SendText(text) => ("send_text", controller.send_text(&text).map(|_| ())),
        Intent::Disconnect => ("disconnect", controller.disconnect().await),
        Intent::Rematch => ("rematch", controller.rematch().await),
        Intent::StartCall => ("start_call", controller.start_call()),
        Intent::AcceptCall => ("accept_call", controller.accept_call()),
        Intent::RejectCall => ("reject_call", controller.reject_call()),
        Intent::HangUp => ("hang_up", controller.hang_up().await),
        Intent::ToggleMute => ("toggle_mute", controller.toggle_mute().map(|_| ())),
    };
    if let Err(e) = res {
        controller.report(op, e);
    }
    ControlFlow::Continue(())
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::Ordering;

    use tokio::time::timeout;

    use super::*;
    use crate::events::ClientEvent;
    use crate::session::{MessageOrigin, PairingStatus};
    use crate::signaling::OutboundEvent;
    use crate::testing::Harness;

    fn dispatcher() -> (
        Dispatcher,
        Harness,
        mpsc::UnboundedSender<InboundEvent>,
        mpsc::UnboundedSender<Intent>,
    ) {
        let mut h = Harness::new();
        let engine = h.take_engine();
        // the dispatcher listens for setups; the harness keeps a dead end
        let (_, setups) = mpsc::unbounded_channel();
        let receivers = EngineReceivers {
            link_events: std::mem::replace(&mut h.link_events, mpsc::unbounded_channel().1),
            setups: std::mem::replace(&mut h.setups, setups),
        };
        let controller = PairingController::new(engine, h.sink.clone(), h.emitter.clone());
        let (in_tx, in_rx) = mpsc::unbounded_channel();
        let (intent_tx, intent_rx) = mpsc::unbounded_channel();
        let d = Dispatcher::new(controller, in_rx, intent_rx, receivers);
        (d, h, in_tx, intent_tx)
    }

    #[tokio::test]
    async fn closed_channel_ends_the_loop() {
        let (d, mut h, in_tx, _intents) = dispatcher();
        in_tx.send(InboundEvent::ChatStart("p".into())).unwrap();
        drop(in_tx);

        assert_eq!(d.run().await, Exit::ChannelLost);
        let events = h.drain_events();
        assert!(events.contains(&ClientEvent::StatusChanged(PairingStatus::Waiting)));
        assert_eq!(events.last(), Some(&ClientEvent::ChannelLost));
    }

    #[tokio::test]
    async fn quit_leaves_the_partner() {
        let (d, h, in_tx, intents) = dispatcher();
        in_tx.send(InboundEvent::ChatStart("p".into())).unwrap();
        intents.send(Intent::SendText("bye".into())).unwrap();
        intents.send(Intent::Quit).unwrap();

        assert_eq!(d.run().await, Exit::Quit);
        assert_eq!(
            h.sink.sent(),
            vec![
                OutboundEvent::SendMessage("bye".into()),
                OutboundEvent::DisconnectPartner,
            ]
        );
        drop(in_tx);
    }

    #[tokio::test]
    async fn chat_flows_while_the_microphone_is_pending() {
        let (d, mut h, in_tx, intents) = dispatcher();
        h.media.hold.store(true, Ordering::SeqCst);
        let media = h.media.clone();
        let loop_task = tokio::spawn(d.run());

        in_tx.send(InboundEvent::ChatStart("p".into())).unwrap();
        intents.send(Intent::StartCall).unwrap();
        media.entered.notified().await;

        in_tx
            .send(InboundEvent::ReceiveMessage("still there?".into()))
            .unwrap();
        let message = timeout(Duration::from_secs(5), async {
            loop {
                match h.events.recv().await {
                    Some(ClientEvent::Message { text, origin }) => break Some((text, origin)),
                    Some(_) => {}
                    None => break None,
                }
            }
        })
        .await
        .expect("message handled while the call is being set up");
        assert_eq!(
            message,
            Some(("still there?".to_string(), MessageOrigin::Remote))
        );
        assert!(h.sink.sent().iter().all(|e| !matches!(e, OutboundEvent::CallRequest(_))));

        media.gate.notify_one();
        loop {
            match h.events.recv().await {
                Some(ClientEvent::CallRequested { .. }) | None => break,
                Some(_) => {}
            }
        }
        intents.send(Intent::Quit).unwrap();
        assert_eq!(loop_task.await.unwrap(), Exit::Quit);
        assert!(h
            .sink
            .sent()
            .iter()
            .any(|e| matches!(e, OutboundEvent::CallRequest(_))));
        drop(in_tx);
    }

    #[tokio::test]
    async fn call_intent_without_partner_is_reported() {
        let (mut d, mut h, _in, _intents) = dispatcher();
        let flow = apply_intent(&mut d.controller, Intent::StartCall).await;
        assert!(flow.is_continue());
        assert!(h
            .drain_events()
            .iter()
            .any(|e| matches!(e, ClientEvent::CallFailed { .. })));
    }

    #[tokio::test]
    async fn repeated_match_reuses_interests() {
        let (mut d, h, _in, _intents) = dispatcher();
        let interests: BTreeSet<String> = ["Gaming".to_string()].into();
        let _ = apply_intent(
            &mut d.controller,
            Intent::RequestMatch(Some(interests.clone())),
        )
        .await;
        d.controller.on_signal(InboundEvent::Waiting).await;
        let _ = apply_intent(&mut d.controller, Intent::RequestMatch(None)).await;

        assert_eq!(d.controller().status(), PairingStatus::FindingMatch);
        assert_eq!(
            h.sink.sent(),
            vec![
                OutboundEvent::SetInterests(interests.clone()),
                OutboundEvent::SetInterests(interests),
            ]
        );
    }
}
