//! Send side of a segment stream.
//!
//! `SendState` holds everything about a stream's outbound segments: the
//! in-flight table, the transmit queue, RTT history and the rate
//! controller. It is a synchronous state machine driven with explicit
//! timestamps. `SendLogic` wraps it in a mutex shared by the caller, the
//! pacing task and the loss-scan task.

use std::collections::{BTreeMap, VecDeque};
use std::ops::Range;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio::time::Instant;

use crate::config::TransportConfig;
use crate::congestion::{CongestionController, Phase};
use crate::error::{Error, SendError};
use crate::frame::Frame;
use crate::segment::{BodyType, split};
use crate::sink::FrameSink;

#[derive(Debug)]
struct InFlight {
    body_type: BodyType,
    payload: Vec<u8>,
    sent_at: Option<Instant>,
    transmissions: u32,
    queued: bool,
}

/// Result of one loss scan
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LossScan {
    /// Segments past the loss timeout
    pub lost: usize,
    /// Lost segments queued for retransmission (reliable stream)
    pub requeued: usize,
    /// Lost segments given up on (unreliable stream)
    pub dropped: usize,
}

/// Snapshot of a stream's send side
#[derive(Debug, Clone, PartialEq)]
pub struct SendStats {
    /// Stream kind
    pub reliable: bool,
    /// Segments per second
    pub rate: f64,
    /// Controller phase
    pub phase: Phase,
    /// Mean of the RTT history
    pub average_rtt: Duration,
    /// Unacknowledged segments
    pub in_flight: usize,
    /// Segments waiting for the pacer
    pub queued: usize,
    /// Sequence the next segment will get
    pub next_sequence: u64,
    /// Segments sent more than once
    pub retransmissions: u64,
    /// Segments detected lost
    pub lost: u64,
}

/// Outbound segment bookkeeping for one stream
#[derive(Debug)]
pub struct SendState {
    reliable: bool,
    max_segment_size: usize,
    window: usize,
    max_sequence_lag: u64,
    rtt_history: usize,
    initial_rtt: Duration,
    loss_scan_segments: f64,
    loss_scan_bounds: (Duration, Duration),
    next_sequence: u64,
    in_flight: BTreeMap<u64, InFlight>,
    queue: VecDeque<u64>,
    rtts: VecDeque<Duration>,
    acked_since_scan: usize,
    controller: CongestionController,
    retransmissions: u64,
    lost: u64,
    closed: bool,
}

impl SendState {
    /// Empty stream
    #[must_use]
    pub fn new(reliable: bool, config: &TransportConfig) -> Self {
        Self {
            reliable,
            max_segment_size: config.max_segment_size,
            window: config.window.max(1),
            max_sequence_lag: config.max_sequence_lag,
            rtt_history: config.rtt_history.max(1),
            initial_rtt: config.initial_rtt,
            loss_scan_segments: config.loss_scan_segments,
            loss_scan_bounds: config.loss_scan_bounds,
            next_sequence: 0,
            in_flight: BTreeMap::new(),
            queue: VecDeque::new(),
            rtts: VecDeque::with_capacity(config.rtt_history),
            acked_since_scan: 0,
            controller: CongestionController::new(config.congestion.clone()),
            retransmissions: 0,
            lost: 0,
            closed: false,
        }
    }

    /// Split `payload` into segments and queue them. Returns the sequences
    /// assigned.
    ///
    /// # Errors
    ///
    /// `WindowFull` when the unacknowledged count has reached the window,
    /// `LagExceeded` when the oldest unacknowledged sequence is too far
    /// behind, `Closed` after `close`.
    pub fn push(&mut self, payload: &[u8]) -> Result<Range<u64>, SendError> {
        if self.closed {
            return Err(SendError::Closed);
        }

        let outstanding = self.in_flight.len();
        if outstanding >= self.window {
            return Err(SendError::WindowFull {
                outstanding,
                window: self.window,
            });
        }

        if let Some(&oldest) = self.in_flight.keys().next() {
            let lag = self.next_sequence - oldest;
            if lag > self.max_sequence_lag {
                return Err(SendError::LagExceeded {
                    lag,
                    max: self.max_sequence_lag,
                });
            }
        }

        let first = self.next_sequence;
        for (body_type, chunk) in split(payload, self.max_segment_size) {
            let sequence = self.next_sequence;
            self.next_sequence += 1;
            self.in_flight.insert(
                sequence,
                InFlight {
                    body_type,
                    payload: chunk,
                    sent_at: None,
                    transmissions: 0,
                    queued: true,
                },
            );
            self.queue.push_back(sequence);
        }
        Ok(first..self.next_sequence)
    }

    /// Take the next queued segment, mark it sent at `now` and return its
    /// encoded frame
    pub fn next_transmission(&mut self, now: Instant) -> Option<Vec<u8>> {
        while let Some(sequence) = self.queue.pop_front() {
            let Some(segment) = self.in_flight.get_mut(&sequence) else {
                continue;
            };
            segment.queued = false;
            segment.sent_at = Some(now);
            segment.transmissions += 1;
            if segment.transmissions > 1 {
                self.retransmissions += 1;
            }

            let frame = Frame::Data {
                reliable: self.reliable,
                body_type: segment.body_type,
                sequence,
                payload: segment.payload.clone(),
            };
            return Some(frame.encode());
        }
        None
    }

    /// Acknowledge `sequence`. Only segments sent exactly once contribute an
    /// RTT sample. Returns false for unknown or already acknowledged
    /// sequences.
    pub fn ack(&mut self, sequence: u64, now: Instant) -> bool {
        let Some(segment) = self.in_flight.remove(&sequence) else {
            return false;
        };
        self.acked_since_scan += 1;

        if segment.transmissions == 1 {
            if let Some(sent_at) = segment.sent_at {
                if self.rtts.len() == self.rtt_history {
                    self.rtts.pop_front();
                }
                self.rtts.push_back(now.saturating_duration_since(sent_at));
            }
        }
        true
    }

    /// Find sent segments older than twice the average RTT. The reliable
    /// stream queues each for retransmission once; it is not considered
    /// again until it has been resent. The unreliable stream forgets them.
    /// The loss ratio since the previous scan is fed to the rate controller.
    pub fn detect_losses(&mut self, now: Instant) -> LossScan {
        let timeout = self.average_rtt() * 2;
        let occupancy = self.occupancy();

        let lost: Vec<u64> = self
            .in_flight
            .iter()
            .filter(|(_, segment)| !segment.queued)
            .filter_map(|(&sequence, segment)| {
                let sent_at = segment.sent_at?;
                (now.saturating_duration_since(sent_at) > timeout).then_some(sequence)
            })
            .collect();

        let mut scan = LossScan {
            lost: lost.len(),
            ..LossScan::default()
        };
        for sequence in lost {
            if self.reliable {
                if let Some(segment) = self.in_flight.get_mut(&sequence) {
                    segment.queued = true;
                    self.queue.push_back(sequence);
                    scan.requeued += 1;
                }
            } else if self.in_flight.remove(&sequence).is_some() {
                scan.dropped += 1;
            }
        }
        self.lost += scan.lost as u64;

        let total = scan.lost + self.acked_since_scan;
        if total > 0 {
            let ratio = scan.lost as f64 / total as f64;
            self.controller.on_loss_sample(ratio, occupancy);
        }
        self.acked_since_scan = 0;
        scan
    }

    /// Mean of the RTT history, or the initial estimate before any sample
    #[must_use]
    pub fn average_rtt(&self) -> Duration {
        if self.rtts.is_empty() {
            return self.initial_rtt;
        }
        self.rtts.iter().sum::<Duration>() / self.rtts.len() as u32
    }

    /// Fraction of the window occupied by unacknowledged segments
    #[must_use]
    pub fn occupancy(&self) -> f64 {
        (self.in_flight.len() as f64 / self.window as f64).min(1.0)
    }

    /// Current send rate in segments per second
    #[must_use]
    pub fn rate(&self) -> f64 {
        self.controller.rate()
    }

    /// Delay between loss scans at the current rate
    #[must_use]
    pub fn scan_interval(&self) -> Duration {
        let (min, max) = self.loss_scan_bounds;
        Duration::from_secs_f64(self.loss_scan_segments / self.rate()).clamp(min, max)
    }

    /// Whether `close` has been called
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Stop accepting segments and forget everything outstanding
    pub fn close(&mut self) {
        self.closed = true;
        self.in_flight.clear();
        self.queue.clear();
    }

    /// Snapshot
    #[must_use]
    pub fn stats(&self) -> SendStats {
        SendStats {
            reliable: self.reliable,
            rate: self.rate(),
            phase: self.controller.phase(),
            average_rtt: self.average_rtt(),
            in_flight: self.in_flight.len(),
            queued: self.queue.len(),
            next_sequence: self.next_sequence,
            retransmissions: self.retransmissions,
            lost: self.lost,
        }
    }
}

struct Shared {
    state: Mutex<SendState>,
    wake: Notify,
    sink: Arc<dyn FrameSink>,
}

impl Shared {
    fn state(&self) -> MutexGuard<'_, SendState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// Paced, loss-aware sender for one stream.
///
/// Runs two background tasks: a pacer writing queued segments to the sink
/// at the controller's rate, and a loss scanner whose period shrinks as the
/// rate grows. Both stop on `close` or drop.
pub struct SendLogic {
    shared: Arc<Shared>,
    reliable: bool,
    pacer: JoinHandle<()>,
    scanner: JoinHandle<()>,
}

impl SendLogic {
    /// Start the stream's tasks. Must be called inside a Tokio runtime.
    #[must_use]
    pub fn start(sink: Arc<dyn FrameSink>, reliable: bool, config: &TransportConfig) -> Self {
        let shared = Arc::new(Shared {
            state: Mutex::new(SendState::new(reliable, config)),
            wake: Notify::new(),
            sink,
        });

        let pacer = tokio::spawn(pace(Arc::clone(&shared)));
        let scanner = tokio::spawn(scan_losses(Arc::clone(&shared)));

        Self {
            shared,
            reliable,
            pacer,
            scanner,
        }
    }

    /// Queue a message for transmission.
    ///
    /// # Errors
    ///
    /// Backpressure (`WindowFull`, `LagExceeded`) means wait for
    /// acknowledgments and retry. `Closed` after `close`.
    pub fn send(&self, payload: &[u8]) -> Result<(), SendError> {
        let sequences = self.shared.state().push(payload)?;
        tracing::trace!(
            reliable = self.reliable,
            first = sequences.start,
            segments = sequences.end - sequences.start,
            "queued message"
        );
        self.shared.wake.notify_one();
        Ok(())
    }

    /// Record an acknowledgment from the peer
    pub fn ack_data(&self, sequence: u64) -> bool {
        self.shared.state().ack(sequence, Instant::now())
    }

    /// Whether this is the reliable stream
    #[must_use]
    pub fn is_reliable(&self) -> bool {
        self.reliable
    }

    /// Snapshot of rate, RTT and queue state
    #[must_use]
    pub fn stats(&self) -> SendStats {
        self.shared.state().stats()
    }

    /// Stop both tasks and drop outstanding segments
    pub fn close(&self) {
        self.shared.state().close();
        self.shared.wake.notify_one();
        self.pacer.abort();
        self.scanner.abort();
    }

    /// Whether `close` has been called
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.shared.state().is_closed()
    }
}

impl std::fmt::Debug for SendLogic {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SendLogic")
            .field("reliable", &self.reliable)
            .field("stats", &self.stats())
            .finish()
    }
}

impl Drop for SendLogic {
    fn drop(&mut self) {
        self.pacer.abort();
        self.scanner.abort();
    }
}

async fn pace(shared: Arc<Shared>) {
    loop {
        let next = {
            let mut state = shared.state();
            if state.is_closed() {
                return;
            }
            let rate = state.rate();
            state.next_transmission(Instant::now()).map(|frame| (frame, rate))
        };

        let Some((frame, rate)) = next else {
            shared.wake.notified().await;
            continue;
        };

        match shared.sink.send_frame(frame).await {
            Ok(()) => {}
            Err(Error::SinkClosed) => {
                tracing::debug!("frame sink closed, stopping sender");
                shared.state().close();
                return;
            }
            Err(e) => tracing::warn!(error = %e, "failed to write segment"),
        }

        tokio::time::sleep(Duration::from_secs_f64(1.0 / rate)).await;
    }
}

async fn scan_losses(shared: Arc<Shared>) {
    loop {
        let interval = shared.state().scan_interval();
        tokio::time::sleep(interval).await;

        let scan = {
            let mut state = shared.state();
            if state.is_closed() {
                return;
            }
            state.detect_losses(Instant::now())
        };

        if scan.lost > 0 {
            tracing::debug!(
                lost = scan.lost,
                requeued = scan.requeued,
                dropped = scan.dropped,
                "loss scan"
            );
        }
        if scan.requeued > 0 {
            shared.wake.notify_one();
        }
    }
}
