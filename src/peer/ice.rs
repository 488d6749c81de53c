use std::collections::VecDeque;

use tracing::{debug, warn};

use crate::peer::link::PeerLink;
use crate::peer::types::IceCandidate;

/// What to do with a remote candidate that just arrived
#[derive(Debug, PartialEq, Eq)]
pub enum Admission {
    /// Remote description is installed, hand it to the link now.
    Apply(IceCandidate),
    /// Held until the remote description lands.
    Buffered,
}

/// Remote candidates received before the remote description was installed.
///
/// The queue only ever holds candidates while `remote_described` is false.
/// `mark_remote_described` flips the flag and hands back everything buffered
/// in arrival order, exactly once; later candidates pass straight through.
#[derive(Debug, Default)]
pub struct CandidateQueue {
    pending: VecDeque<IceCandidate>,
    remote_described: bool,
}

impl CandidateQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn admit(&mut self, candidate: IceCandidate) -> Admission {
        if self.remote_described {
            Admission::Apply(candidate)
        } else {
            debug!(
                pending = self.pending.len() + 1,
                "remote description not set yet, queuing candidate"
            );
            self.pending.push_back(candidate);
            Admission::Buffered
        }
    }

    /// Records the remote description install and drains the backlog.
    pub fn mark_remote_described(&mut self) -> Vec<IceCandidate> {
        self.remote_described = true;
        self.pending.drain(..).collect()
    }

    pub fn is_remote_described(&self) -> bool {
        self.remote_described
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    pub fn clear(&mut self) {
        self.pending.clear();
        self.remote_described = false;
    }
}

/// Applies all pending candidates once the remote description is installed.
///
/// A candidate the link refuses is logged and skipped; returns how many
/// were accepted.
pub async fn apply_pending_candidates(link: &dyn PeerLink, queue: &mut CandidateQueue) -> usize {
    let mut applied = 0;
    for candidate in queue.mark_remote_described() {
        debug!(candidate = %candidate.candidate, "applying pending candidate");
        match link.add_ice_candidate(&candidate).await {
            Ok(()) => applied += 1,
            Err(e) => warn!(error = %e, "failed to apply pending candidate"),
        }
    }
    applied
}

/// Per-call tally of local candidate types, logged once the call connects
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct CandidateStats {
    pub host: u32,
    pub srflx: u32,
    pub relay: u32,
}

impl CandidateStats {
    pub fn record(&mut self, candidate: &str) {
        if candidate.contains("typ host") {
            self.host += 1;
        } else if candidate.contains("typ srflx") {
            self.srflx += 1;
        } else if candidate.contains("typ relay") {
            self.relay += 1;
        }
    }

    pub fn log(&self) {
        debug!(
            host = self.host,
            srflx = self.srflx,
            relay = self.relay,
            "local candidate analysis"
        );
        if self.relay == 0 {
            warn!("no TURN relay candidates found, connection through NAT may fail");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::peer::types::CallId;
    use crate::testing::{FakeLinkFactory, LinkOp};

    fn cand(n: u32) -> IceCandidate {
        IceCandidate {
            call_id: CallId::new("c"),
            candidate: format!("candidate:{n} 1 udp 1 10.0.0.{n} 5000 typ host"),
            sdp_mid: Some("0".into()),
            sdp_mline_index: Some(0),
        }
    }

    #[test]
    fn buffers_until_remote_description_then_drains_in_order() {
        let mut queue = CandidateQueue::new();
        assert_eq!(queue.admit(cand(1)), Admission::Buffered);
        assert_eq!(queue.admit(cand(2)), Admission::Buffered);
        assert_eq!(queue.admit(cand(3)), Admission::Buffered);
        assert_eq!(queue.len(), 3);

        let drained = queue.mark_remote_described();
        assert_eq!(drained, vec![cand(1), cand(2), cand(3)]);
        assert!(queue.is_empty());

        // drained exactly once
        assert!(queue.mark_remote_described().is_empty());
        assert_eq!(queue.admit(cand(4)), Admission::Apply(cand(4)));
        assert!(queue.is_empty());
    }

    #[test]
    fn clear_resets_described_flag() {
        let mut queue = CandidateQueue::new();
        queue.mark_remote_described();
        queue.clear();
        assert!(!queue.is_remote_described());
        assert_eq!(queue.admit(cand(1)), Admission::Buffered);
    }

    #[test]
    fn stats_count_candidate_types() {
        let mut stats = CandidateStats::default();
        stats.record("candidate:1 1 udp 1 10.0.0.1 5000 typ host");
        stats.record("candidate:2 1 udp 1 1.2.3.4 5000 typ srflx raddr 0.0.0.0");
        stats.record("candidate:3 1 udp 1 5.6.7.8 5000 typ relay raddr 0.0.0.0");
        stats.record("candidate:4 1 udp 1 10.0.0.2 5000 typ host");
        assert_eq!(
            stats,
            CandidateStats {
                host: 2,
                srflx: 1,
                relay: 1
            }
        );
    }

    #[tokio::test]
    async fn pending_candidates_reach_link_after_remote_description() {
        let factory = FakeLinkFactory::new();
        let link = factory.standalone_link();
        let mut queue = CandidateQueue::new();
        queue.admit(cand(1));
        queue.admit(cand(2));

        link.set_remote_description(&crate::peer::types::SessionDescription::answer("v=0"))
            .await
            .unwrap();
        let applied = apply_pending_candidates(link.as_ref(), &mut queue).await;

        assert_eq!(applied, 2);
        let ops = factory.ops();
        assert_eq!(
            ops,
            vec![
                LinkOp::SetRemote(crate::peer::types::SdpKind::Answer),
                LinkOp::AddCandidate(cand(1).candidate),
                LinkOp::AddCandidate(cand(2).candidate),
            ]
        );
    }
}
