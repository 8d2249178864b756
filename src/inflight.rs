//! In-flight QoS1/2 delivery state tracking.
//!
//! The outbound side is a single pending-operation slot: `publish` blocks
//! until the handshake finishes, so at most one locally-initiated exchange
//! exists at a time. The inbound side tracks every QoS2 packet identifier
//! between PUBREC and PUBREL so duplicate PUBLISH packets are never
//! re-dispatched.

use heapless::Vec;

use crate::handler::QoS;

/// Acknowledgment currently awaited for the outbound publication.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub(crate) enum OutboundState {
    /// QoS1: PUBLISH sent, PUBACK pending.
    AwaitPubAck,
    /// QoS2: PUBLISH sent, PUBREC pending.
    AwaitPubRec,
    /// QoS2: PUBREL sent, PUBCOMP pending.
    AwaitPubComp,
}

/// What the session controller must do after feeding an acknowledgment in.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub(crate) enum AckOutcome {
    /// Handshake finished; drop the record.
    Complete,
    /// PUBREC accepted; send PUBREL and keep waiting.
    SendPubRel,
    /// Not the acknowledgment this record expects. Brokers may retransmit;
    /// never fatal.
    Ignored,
}

/// The single outbound in-flight record.
#[derive(Debug, Clone, Copy)]
pub(crate) struct Outbound {
    pub packet_id: u16,
    pub state: OutboundState,
    /// When the packet for the current state was last (re)transmitted.
    pub sent_at_ms: u64,
    /// Retransmissions within the current state.
    pub retries: u8,
}

impl Outbound {
    /// Starts tracking a freshly sent QoS1/2 PUBLISH.
    pub fn new(packet_id: u16, qos: QoS, now_ms: u64) -> Self {
        debug_assert_ne!(qos, QoS::AtMostOnce);
        let state = match qos {
            QoS::ExactlyOnce => OutboundState::AwaitPubRec,
            _ => OutboundState::AwaitPubAck,
        };
        Self {
            packet_id,
            state,
            sent_at_ms: now_ms,
            retries: 0,
        }
    }

    /// Applies an inbound PUBACK/PUBREC/PUBCOMP for `packet_id`.
    ///
    /// `first_byte` is the acknowledgment's fixed-header first byte. The
    /// retry counter restarts at each handshake stage so every exchange step
    /// gets the full retry budget.
    pub fn on_ack(&mut self, first_byte: u8, packet_id: u16, now_ms: u64) -> AckOutcome {
        if packet_id != self.packet_id {
            return AckOutcome::Ignored;
        }
        match (self.state, first_byte) {
            (OutboundState::AwaitPubAck, crate::packet::PUBACK) => AckOutcome::Complete,
            (OutboundState::AwaitPubRec, crate::packet::PUBREC) => {
                self.state = OutboundState::AwaitPubComp;
                self.sent_at_ms = now_ms;
                self.retries = 0;
                AckOutcome::SendPubRel
            }
            (OutboundState::AwaitPubComp, crate::packet::PUBCOMP) => AckOutcome::Complete,
            _ => AckOutcome::Ignored,
        }
    }

    /// Whether the current state's acknowledgment is overdue.
    pub fn is_due(&self, now_ms: u64, retry_interval_ms: u32) -> bool {
        now_ms.saturating_sub(self.sent_at_ms) >= u64::from(retry_interval_ms)
    }

    /// Records a retransmission.
    pub fn mark_retry(&mut self, now_ms: u64) {
        self.sent_at_ms = now_ms;
        self.retries += 1;
    }
}

/// Outcome of admitting an inbound QoS2 packet identifier.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub(crate) enum StartOutcome {
    /// New exchange: dispatch the message and answer with PUBREC.
    Fresh,
    /// Already tracked: answer with PUBREC again, never re-dispatch.
    Duplicate,
    /// No slot free. The packet must be ignored entirely, PUBREC included,
    /// so the broker keeps retransmitting until a slot frees.
    Full,
}

/// QoS2 packet identifiers received and acknowledged with PUBREC, still
/// awaiting the broker's PUBREL.
#[derive(Debug, Default)]
pub(crate) struct InboundQos2<const N: usize> {
    ids: Vec<u16, N>,
}

impl<const N: usize> InboundQos2<N> {
    pub fn new() -> Self {
        Self { ids: Vec::new() }
    }

    /// Begins tracking `packet_id`.
    pub fn start(&mut self, packet_id: u16) -> StartOutcome {
        if self.ids.contains(&packet_id) {
            return StartOutcome::Duplicate;
        }
        match self.ids.push(packet_id) {
            Ok(()) => StartOutcome::Fresh,
            Err(_) => StartOutcome::Full,
        }
    }

    /// Whether `packet_id` is currently tracked.
    pub fn contains(&self, packet_id: u16) -> bool {
        self.ids.contains(&packet_id)
    }

    /// Finishes the exchange on PUBREL. Returns `false` if the id was not
    /// tracked (PUBCOMP is still sent so a retransmitting broker settles).
    pub fn complete(&mut self, packet_id: u16) -> bool {
        let before = self.ids.len();
        self.ids.retain(|&id| id != packet_id);
        self.ids.len() != before
    }

    pub fn clear(&mut self) {
        self.ids.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::packet::{PUBACK, PUBCOMP, PUBREC};

    #[test]
    fn qos1_completes_on_puback() {
        let mut record = Outbound::new(3, QoS::AtLeastOnce, 0);
        assert_eq!(record.state, OutboundState::AwaitPubAck);
        assert_eq!(record.on_ack(PUBACK, 4, 10), AckOutcome::Ignored);
        assert_eq!(record.on_ack(PUBCOMP, 3, 10), AckOutcome::Ignored);
        assert_eq!(record.on_ack(PUBACK, 3, 10), AckOutcome::Complete);
    }

    #[test]
    fn qos2_walks_the_full_handshake() {
        let mut record = Outbound::new(9, QoS::ExactlyOnce, 0);
        assert_eq!(record.state, OutboundState::AwaitPubRec);
        // PUBACK is the wrong acknowledgment for QoS2.
        assert_eq!(record.on_ack(PUBACK, 9, 5), AckOutcome::Ignored);
        assert_eq!(record.on_ack(PUBREC, 9, 5), AckOutcome::SendPubRel);
        assert_eq!(record.state, OutboundState::AwaitPubComp);
        assert_eq!(record.retries, 0);
        // A retransmitted PUBREC changes nothing.
        assert_eq!(record.on_ack(PUBREC, 9, 6), AckOutcome::Ignored);
        assert_eq!(record.on_ack(PUBCOMP, 9, 7), AckOutcome::Complete);
    }

    #[test]
    fn retry_deadline_tracking() {
        let mut record = Outbound::new(1, QoS::AtLeastOnce, 100);
        assert!(!record.is_due(150, 100));
        assert!(record.is_due(200, 100));
        record.mark_retry(200);
        assert_eq!(record.retries, 1);
        assert!(!record.is_due(250, 100));
    }

    #[test]
    fn inbound_qos2_suppresses_duplicates() {
        let mut table: InboundQos2<4> = InboundQos2::new();
        assert_eq!(table.start(21), StartOutcome::Fresh);
        assert_eq!(table.start(21), StartOutcome::Duplicate);
        assert!(table.contains(21));
        assert!(table.complete(21));
        assert!(!table.complete(21));
        assert_eq!(table.start(21), StartOutcome::Fresh);
    }

    #[test]
    fn inbound_qos2_slot_frees_after_completion() {
        let mut table: InboundQos2<2> = InboundQos2::new();
        assert_eq!(table.start(1), StartOutcome::Fresh);
        assert_eq!(table.start(2), StartOutcome::Fresh);
        assert_eq!(table.start(3), StartOutcome::Full);
        assert!(table.complete(1));
        assert_eq!(table.start(3), StartOutcome::Fresh);
    }
}
