//! External interface seams: ingress (communication adapter) and egress
//! (output adapters).
//!
//! The ingress callback contract is a bounded channel: the adapter calls
//! [`IngressHandle::push`] once per sensor frame from an arbitrary thread.
//! On overflow the policy is mode-selected: TWS drops the oldest queued
//! frame, BEAM_REQUEST blocks the producer. Frames pushed after shutdown
//! begins are rejected.
//!
//! Concrete adapters are chosen once at initialization; there is no
//! per-frame dynamic dispatch inside the algorithms.

use crate::error::RadarError;
use crate::stats::PipelineStats;
use crate::types::{RawFrame, TrackFrame, TrackingMode};
use crossbeam_channel::{Receiver, Sender, TrySendError};
use std::io::Write;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

// ---------------------------------------------------------------------------
// Ingress
// ---------------------------------------------------------------------------

/// Raw-frame delivery boundary. The orchestrator registers this with the
/// communication adapter; the adapter invokes [`push`](Self::push) once per
/// sensor frame.
#[derive(Clone)]
pub struct IngressHandle {
    tx: Sender<RawFrame>,
    /// Second receiver on the same channel, used to discard the oldest
    /// frame under TWS overflow
    drain: Receiver<RawFrame>,
    mode: TrackingMode,
    running: Arc<AtomicBool>,
    stats: Arc<PipelineStats>,
}

impl IngressHandle {
    pub(crate) fn new(
        tx: Sender<RawFrame>,
        drain: Receiver<RawFrame>,
        mode: TrackingMode,
        running: Arc<AtomicBool>,
        stats: Arc<PipelineStats>,
    ) -> Self {
        Self {
            tx,
            drain,
            mode,
            running,
            stats,
        }
    }

    /// Deliver one raw frame. Returns `true` when the frame was enqueued.
    ///
    /// TWS: on a full queue the oldest pending frame is discarded to make
    /// room (counted as a drop). BEAM_REQUEST: blocks until the queue has
    /// capacity. After shutdown begins every push is rejected.
    pub fn push(&self, frame: RawFrame) -> bool {
        if !self.running.load(Ordering::Acquire) {
            PipelineStats::incr(&self.stats.frames_rejected);
            return false;
        }
        match self.mode {
            TrackingMode::Tws => {
                let mut frame = frame;
                loop {
                    match self.tx.try_send(frame) {
                        Ok(()) => {
                            PipelineStats::incr(&self.stats.frames_received);
                            return true;
                        }
                        Err(TrySendError::Full(f)) => {
                            // Drop the oldest frame, keep the freshest data.
                            if self.drain.try_recv().is_ok() {
                                PipelineStats::incr(&self.stats.frames_dropped);
                            }
                            frame = f;
                        }
                        Err(TrySendError::Disconnected(_)) => return false,
                    }
                }
            }
            TrackingMode::BeamRequest => {
                if self.tx.send(frame).is_ok() {
                    PipelineStats::incr(&self.stats.frames_received);
                    true
                } else {
                    false
                }
            }
        }
    }

    /// Queue depth, for health monitoring.
    pub fn queued(&self) -> usize {
        self.tx.len()
    }
}

/// Boundary to the raw-packet transport collaborator. The transport owns
/// its connection; the core only needs start/stop and a connected flag.
pub trait CommunicationAdapter: Send {
    fn start(&mut self, ingress: IngressHandle) -> Result<(), RadarError>;
    fn stop(&mut self);
    fn is_connected(&self) -> bool;
}

// ---------------------------------------------------------------------------
// Egress
// ---------------------------------------------------------------------------

/// Output publication boundary. The orchestrator publishes one
/// [`TrackFrame`] per pipeline tick to every registered adapter.
pub trait OutputAdapter: Send {
    fn publish(&mut self, frame: &TrackFrame) -> Result<(), RadarError>;
}

/// Serializes each track frame as one JSON line.
pub struct JsonLinesOutput<W: Write + Send> {
    writer: W,
}

impl<W: Write + Send> JsonLinesOutput<W> {
    pub fn new(writer: W) -> Self {
        Self { writer }
    }
}

impl<W: Write + Send> OutputAdapter for JsonLinesOutput<W> {
    fn publish(&mut self, frame: &TrackFrame) -> Result<(), RadarError> {
        serde_json::to_writer(&mut self.writer, frame)
            .map_err(|e| RadarError::Io(std::io::Error::other(e)))?;
        self.writer.write_all(b"\n")?;
        Ok(())
    }
}

/// Forwards track frames into a channel; the main consumer for embedding
/// the engine in-process (and for tests).
pub struct ChannelOutput {
    tx: Sender<TrackFrame>,
}

impl ChannelOutput {
    pub fn new(tx: Sender<TrackFrame>) -> Self {
        Self { tx }
    }
}

impl OutputAdapter for ChannelOutput {
    fn publish(&mut self, frame: &TrackFrame) -> Result<(), RadarError> {
        // A gone consumer is not fatal to the pipeline.
        let _ = self.tx.send(frame.clone());
        Ok(())
    }
}

/// Discards everything. Benchmarks and load tests.
pub struct NullOutput;

impl OutputAdapter for NullOutput {
    fn publish(&mut self, _frame: &TrackFrame) -> Result<(), RadarError> {
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crossbeam_channel::bounded;

    fn handle(capacity: usize, mode: TrackingMode) -> (IngressHandle, Receiver<RawFrame>, Arc<PipelineStats>) {
        let (tx, rx) = bounded(capacity);
        let stats = Arc::new(PipelineStats::new());
        let running = Arc::new(AtomicBool::new(true));
        (
            IngressHandle::new(tx, rx.clone(), mode, running, stats.clone()),
            rx,
            stats,
        )
    }

    fn raw(n: i64) -> RawFrame {
        RawFrame {
            arrival_ns: n,
            bytes: vec![0u8; 4],
        }
    }

    #[test]
    fn tws_overflow_drops_oldest() {
        let (h, rx, stats) = handle(2, TrackingMode::Tws);
        assert!(h.push(raw(1)));
        assert!(h.push(raw(2)));
        assert!(h.push(raw(3))); // frame 1 evicted
        let snap = stats.snapshot(0);
        assert_eq!(snap.frames_received, 3);
        assert_eq!(snap.frames_dropped, 1);
        let remaining: Vec<i64> = rx.try_iter().map(|f| f.arrival_ns).collect();
        assert_eq!(remaining, vec![2, 3]);
    }

    #[test]
    fn rejects_after_shutdown() {
        let (h, _rx, stats) = handle(2, TrackingMode::Tws);
        h.running.store(false, Ordering::Release);
        assert!(!h.push(raw(1)));
        assert_eq!(stats.snapshot(0).frames_rejected, 1);
    }

    #[test]
    fn beam_request_blocks_until_capacity() {
        let (h, rx, _stats) = handle(1, TrackingMode::BeamRequest);
        assert!(h.push(raw(1)));
        let h2 = h.clone();
        let sender = std::thread::spawn(move || h2.push(raw(2)));
        // Give the producer a moment to block on the full queue, then free
        // a slot.
        std::thread::sleep(std::time::Duration::from_millis(50));
        assert!(!sender.is_finished(), "producer should block when full");
        assert_eq!(rx.recv().unwrap().arrival_ns, 1);
        assert!(sender.join().unwrap());
        assert_eq!(rx.recv().unwrap().arrival_ns, 2);
    }

    #[test]
    fn json_lines_output_is_valid_json() {
        let mut buf = Vec::new();
        {
            let mut out = JsonLinesOutput::new(&mut buf);
            let frame = TrackFrame {
                seq: 3,
                arrival_ns: 9,
                tracks: vec![],
                detections: None,
                clusters: None,
                beam_requests: vec![],
                stats: Default::default(),
            };
            out.publish(&frame).unwrap();
        }
        let line = String::from_utf8(buf).unwrap();
        let value: serde_json::Value = serde_json::from_str(line.trim()).unwrap();
        assert_eq!(value["seq"], 3);
    }
}
