use std::collections::VecDeque;

use super::{TransportMode, TransportProtocol};

/// Ordered set of untried transport candidates.
///
/// Built once per source from the requested [`TransportMode`]. The session
/// client pulls candidates with [`next_candidate`](Self::next_candidate)
/// and reports dead ends with [`candidate_failed`](Self::candidate_failed).
/// Candidates only ever leave the set; nothing re-enters it until a new
/// policy is built for a new source.
///
/// ```
/// use rtsp_source::{FallbackPolicy, TransportMode, TransportProtocol};
///
/// let mut policy = FallbackPolicy::new(TransportMode::Automatic);
/// assert_eq!(policy.next_candidate(), Some(TransportProtocol::Tcp));
/// policy.candidate_failed(TransportProtocol::Tcp);
/// assert_eq!(policy.next_candidate(), Some(TransportProtocol::Udp));
/// assert_eq!(policy.next_candidate(), None);
/// ```
#[derive(Debug, Clone)]
pub struct FallbackPolicy {
    mode: TransportMode,
    candidates: VecDeque<TransportProtocol>,
    failed: Vec<TransportProtocol>,
}

impl FallbackPolicy {
    pub fn new(mode: TransportMode) -> Self {
        Self {
            mode,
            candidates: mode.candidates().iter().copied().collect(),
            failed: Vec::new(),
        }
    }

    /// The mode this policy was built from.
    pub fn mode(&self) -> TransportMode {
        self.mode
    }

    /// Take the next untried transport, or `None` once the set is exhausted.
    pub fn next_candidate(&mut self) -> Option<TransportProtocol> {
        let next = self.candidates.pop_front();
        match next {
            Some(protocol) => tracing::debug!(
                %protocol,
                remaining = self.candidates.len(),
                "transport candidate selected"
            ),
            None => tracing::debug!(mode = %self.mode, "transport candidates exhausted"),
        }
        next
    }

    /// Record a failed attempt over `protocol`.
    ///
    /// The protocol is excluded from every later
    /// [`next_candidate`](Self::next_candidate) call, whether or not it had
    /// already been handed out.
    pub fn candidate_failed(&mut self, protocol: TransportProtocol) {
        if !self.failed.contains(&protocol) {
            self.failed.push(protocol);
        }
        self.candidates.retain(|c| *c != protocol);
        tracing::debug!(
            %protocol,
            remaining = self.candidates.len(),
            "transport candidate failed"
        );
    }

    /// Whether `protocol` has been reported as failed.
    pub fn has_failed(&self, protocol: TransportProtocol) -> bool {
        self.failed.contains(&protocol)
    }

    /// Candidates not yet handed out, in priority order.
    pub fn remaining(&self) -> impl Iterator<Item = TransportProtocol> + '_ {
        self.candidates.iter().copied()
    }

    pub fn is_exhausted(&self) -> bool {
        self.candidates.is_empty()
    }
}
