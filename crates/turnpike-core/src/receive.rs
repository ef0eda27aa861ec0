//! Receive side of a segment stream: acknowledgment and reassembly.
//!
//! Every accepted segment is acknowledged on arrival, duplicates included.
//! Segments at or past the expected sequence are held in order until they
//! can be drained. A reliable stream stops draining at a gap and waits for
//! the retransmission, and holds at most `max_lag` sequences ahead of the
//! gap. An unreliable stream jumps over the gap and discards any half-built
//! message.

use std::collections::BTreeMap;

use crate::config::DEFAULT_MAX_SEQUENCE_LAG;
use crate::segment::BodyType;

/// Outcome of feeding one segment
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Receipt {
    /// Sequence to acknowledge; `None` when the segment was refused
    pub ack: Option<u64>,
    /// Messages completed by this segment, in order
    pub delivered: Vec<Vec<u8>>,
}

/// Reassembly state for one stream
#[derive(Debug)]
pub struct ReceiveLogic {
    reliable: bool,
    max_lag: u64,
    expected: u64,
    pending: BTreeMap<u64, (BodyType, Vec<u8>)>,
    assembly: Option<Vec<u8>>,
}

impl ReceiveLogic {
    /// Create an empty stream
    #[must_use]
    pub fn new(reliable: bool) -> Self {
        Self {
            reliable,
            max_lag: DEFAULT_MAX_SEQUENCE_LAG,
            expected: 0,
            pending: BTreeMap::new(),
            assembly: None,
        }
    }

    /// Limit how far past the expected sequence a reliable stream buffers
    #[must_use]
    pub fn with_max_lag(mut self, max_lag: u64) -> Self {
        self.max_lag = max_lag;
        self
    }

    /// Whether this is the reliable stream
    #[must_use]
    pub fn is_reliable(&self) -> bool {
        self.reliable
    }

    /// Next sequence the stream waits for
    #[must_use]
    pub fn expected(&self) -> u64 {
        self.expected
    }

    /// Segments held back waiting for earlier ones
    #[must_use]
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    /// Feed one segment.
    ///
    /// A reliable stream drains on every arrival so a retransmitted start or
    /// middle segment can release the rest of its message. An unreliable
    /// stream drains only when a message-ending segment arrives.
    ///
    /// Refused segments get no acknowledgment: `u64::MAX`, which has no
    /// successor, and on the reliable stream anything more than `max_lag`
    /// past the expected sequence. The sender retransmits those later.
    pub fn receive(&mut self, sequence: u64, body_type: BodyType, payload: Vec<u8>) -> Receipt {
        let mut receipt = Receipt::default();

        if sequence.checked_add(1).is_none() {
            tracing::debug!(sequence, "segment has no successor, refusing");
            return receipt;
        }
        if self.reliable && sequence.saturating_sub(self.expected) > self.max_lag {
            tracing::debug!(
                sequence,
                expected = self.expected,
                max_lag = self.max_lag,
                "segment too far ahead, refusing"
            );
            return receipt;
        }
        receipt.ack = Some(sequence);

        if sequence < self.expected {
            tracing::trace!(sequence, expected = self.expected, "duplicate segment");
            return receipt;
        }
        self.pending.entry(sequence).or_insert((body_type, payload));

        if self.reliable || body_type.ends_message() {
            self.drain(&mut receipt.delivered);
        }
        receipt
    }

    fn drain(&mut self, delivered: &mut Vec<Vec<u8>>) {
        while let Some(sequence) = self.pending.keys().next().copied() {
            if sequence != self.expected {
                if self.reliable {
                    break;
                }
                tracing::debug!(
                    from = self.expected,
                    to = sequence,
                    "skipping gap in unreliable stream"
                );
                self.expected = sequence;
                self.assembly = None;
            }

            let Some((body_type, payload)) = self.pending.remove(&sequence) else {
                break;
            };
            // `receive` never admits u64::MAX
            let Some(next) = sequence.checked_add(1) else {
                break;
            };
            self.expected = next;

            match body_type {
                BodyType::Complete => {
                    self.assembly = None;
                    delivered.push(payload);
                }
                BodyType::PartialStart => self.assembly = Some(payload),
                BodyType::PartialMiddle => {
                    if let Some(buf) = self.assembly.as_mut() {
                        buf.extend_from_slice(&payload);
                    }
                }
                BodyType::PartialEnd => {
                    if let Some(mut buf) = self.assembly.take() {
                        buf.extend_from_slice(&payload);
                        delivered.push(buf);
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::segment::split;

    fn feed(logic: &mut ReceiveLogic, seq: u64, body_type: BodyType, payload: &[u8]) -> Receipt {
        logic.receive(seq, body_type, payload.to_vec())
    }

    #[test]
    fn test_complete_segment_delivered_immediately() {
        let mut logic = ReceiveLogic::new(true);
        let receipt = feed(&mut logic, 0, BodyType::Complete, b"hi");

        assert_eq!(receipt.ack, Some(0));
        assert_eq!(receipt.delivered, vec![b"hi".to_vec()]);
        assert_eq!(logic.expected(), 1);
    }

    #[test]
    fn test_split_message_reassembled_once() {
        let payload: Vec<u8> = (0..100u8).collect();
        let mut logic = ReceiveLogic::new(true);
        let mut delivered = Vec::new();

        for (seq, (body_type, chunk)) in split(&payload, 7).into_iter().enumerate() {
            delivered.extend(logic.receive(seq as u64, body_type, chunk).delivered);
        }

        assert_eq!(delivered, vec![payload]);
        assert_eq!(logic.pending_len(), 0);
    }

    #[test]
    fn test_duplicates_are_acked_but_not_redelivered() {
        let mut logic = ReceiveLogic::new(true);
        feed(&mut logic, 0, BodyType::Complete, b"a");

        let receipt = feed(&mut logic, 0, BodyType::Complete, b"a");
        assert_eq!(receipt.ack, Some(0));
        assert!(receipt.delivered.is_empty());
    }

    #[test]
    fn test_reliable_waits_for_gap() {
        let mut logic = ReceiveLogic::new(true);
        feed(&mut logic, 0, BodyType::Complete, b"0");

        assert!(feed(&mut logic, 2, BodyType::Complete, b"2").delivered.is_empty());
        assert!(feed(&mut logic, 3, BodyType::Complete, b"3").delivered.is_empty());
        assert_eq!(logic.expected(), 1);

        let receipt = feed(&mut logic, 1, BodyType::Complete, b"1");
        assert_eq!(
            receipt.delivered,
            vec![b"1".to_vec(), b"2".to_vec(), b"3".to_vec()]
        );
    }

    #[test]
    fn test_reliable_retransmitted_start_releases_message() {
        let mut logic = ReceiveLogic::new(true);

        assert!(feed(&mut logic, 1, BodyType::PartialMiddle, b"b").delivered.is_empty());
        assert!(feed(&mut logic, 2, BodyType::PartialEnd, b"c").delivered.is_empty());

        let receipt = feed(&mut logic, 0, BodyType::PartialStart, b"a");
        assert_eq!(receipt.delivered, vec![b"abc".to_vec()]);
    }

    #[test]
    fn test_unreliable_skips_gap() {
        let mut logic = ReceiveLogic::new(false);
        let mut delivered = Vec::new();

        for seq in [0u64, 1, 3, 4] {
            let receipt = logic.receive(seq, BodyType::Complete, vec![seq as u8]);
            assert_eq!(receipt.ack, Some(seq));
            assert_eq!(receipt.delivered, vec![vec![seq as u8]]);
            delivered.extend(receipt.delivered);
        }

        assert_eq!(delivered, vec![vec![0], vec![1], vec![3], vec![4]]);
        assert_eq!(logic.expected(), 5);

        // The missing segment arriving late is acknowledged and dropped.
        let late = logic.receive(2, BodyType::Complete, vec![2]);
        assert_eq!(late.ack, Some(2));
        assert!(late.delivered.is_empty());
    }

    #[test]
    fn test_unreliable_gap_discards_partial_message() {
        let mut logic = ReceiveLogic::new(false);

        assert!(feed(&mut logic, 0, BodyType::PartialStart, b"lost-").delivered.is_empty());
        // Segment 1 (the end of the first message) never arrives.
        assert!(feed(&mut logic, 2, BodyType::PartialStart, b"x").delivered.is_empty());

        let receipt = feed(&mut logic, 3, BodyType::PartialEnd, b"y");
        assert_eq!(receipt.delivered, vec![b"xy".to_vec()]);
    }

    #[test]
    fn test_unreliable_orphan_end_is_dropped() {
        let mut logic = ReceiveLogic::new(false);

        let receipt = feed(&mut logic, 5, BodyType::PartialEnd, b"tail");
        assert!(receipt.delivered.is_empty());
        assert_eq!(logic.expected(), 6);
    }

    #[test]
    fn test_last_sequence_is_refused() {
        for reliable in [false, true] {
            let mut logic = ReceiveLogic::new(reliable).with_max_lag(u64::MAX);

            let receipt = feed(&mut logic, u64::MAX, BodyType::Complete, b"x");
            assert_eq!(receipt.ack, None);
            assert!(receipt.delivered.is_empty());
            assert_eq!(logic.expected(), 0);
            assert_eq!(logic.pending_len(), 0);

            // The watermark is untouched, so normal traffic still flows.
            let next = feed(&mut logic, 0, BodyType::Complete, b"y");
            assert_eq!(next.delivered, vec![b"y".to_vec()]);
        }
    }

    #[test]
    fn test_unreliable_jump_to_high_sequence() {
        let mut logic = ReceiveLogic::new(false);

        let receipt = feed(&mut logic, u64::MAX - 1, BodyType::Complete, b"z");
        assert_eq!(receipt.ack, Some(u64::MAX - 1));
        assert_eq!(receipt.delivered, vec![b"z".to_vec()]);
        assert_eq!(logic.expected(), u64::MAX);
    }

    #[test]
    fn test_reliable_refuses_far_ahead_segments() {
        let mut logic = ReceiveLogic::new(true).with_max_lag(10);

        let far = feed(&mut logic, 11, BodyType::Complete, b"far");
        assert_eq!(far.ack, None);
        assert_eq!(logic.pending_len(), 0);

        let edge = feed(&mut logic, 10, BodyType::Complete, b"edge");
        assert_eq!(edge.ack, Some(10));
        assert_eq!(logic.pending_len(), 1);

        // Once the gap fills the window moves and the refused segment fits.
        for seq in 0..10 {
            feed(&mut logic, seq, BodyType::Complete, b"-");
        }
        assert_eq!(logic.expected(), 11);
        let retried = feed(&mut logic, 11, BodyType::Complete, b"far");
        assert_eq!(retried.ack, Some(11));
        assert_eq!(retried.delivered, vec![b"far".to_vec()]);
    }

    #[test]
    fn test_unreliable_ignores_lag_limit() {
        let mut logic = ReceiveLogic::new(false).with_max_lag(10);

        let receipt = feed(&mut logic, 5000, BodyType::Complete, b"late");
        assert_eq!(receipt.ack, Some(5000));
        assert_eq!(receipt.delivered, vec![b"late".to_vec()]);
    }
}
