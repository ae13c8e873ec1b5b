//! System orchestrator: stage workers, bounded channels, health, and
//! lifecycle (initialize → running → stopping → stopped).
//!
//! # Stage layout
//!
//! ```text
//! ingress → RAW → decode → DET → cluster → CLU → track → TRK → output
//! ```
//!
//! One worker thread per stage, joined by bounded crossbeam channels, so a
//! transient slowdown in one stage applies backpressure upstream without
//! blocking the sensor thread (the ingress queue absorbs it under the
//! mode-selected overflow policy).
//!
//! # Shutdown
//!
//! Cooperative: `stop()` flips the shared running flag. The decode worker
//! drains the raw queue and exits, closing its output channel; each
//! downstream worker drains until its input disconnects and exits in turn.
//! The orchestrator joins all workers under a bounded timeout and reports
//! [`RadarError::ShutdownTimeout`] when they fail to drain in time.

use crate::adapters::{IngressHandle, OutputAdapter};
use crate::clustering::DbscanClusterer;
use crate::config::Config;
use crate::decode::FrameDecoder;
use crate::error::RadarError;
use crate::pipeline::TrackingPipeline;
use crate::stats::{PipelineStats, StatsSnapshot};
use crate::track::Track;
use crate::track_manager::TrackManager;
use crate::types::{FrameClusters, FrameDetections, RawFrame, TrackFrame};
use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

/// Poll period for the running flag inside the first stage's receive loop.
const RECV_POLL: Duration = Duration::from_millis(100);

/// The radar tracking system. Owns every worker, channel, and the track
/// manager; all of it is released on every exit path through `stop()` /
/// `Drop`.
pub struct RadarSystem {
    config: Arc<Config>,
    stats: Arc<PipelineStats>,
    manager: Arc<TrackManager>,
    running: Arc<AtomicBool>,
    healthy: Arc<AtomicBool>,
    ingress: IngressHandle,
    raw_rx: Option<Receiver<RawFrame>>,
    outputs: Option<Vec<Box<dyn OutputAdapter>>>,
    workers: Vec<(&'static str, JoinHandle<()>)>,
    monitor_stop: Option<Sender<()>>,
    started_at: Instant,
}

impl RadarSystem {
    /// Validate the configuration and build the (not yet started) system.
    pub fn new(
        config: Config,
        outputs: Vec<Box<dyn OutputAdapter>>,
    ) -> Result<Self, RadarError> {
        config.validate()?;
        let config = Arc::new(config);
        let stats = Arc::new(PipelineStats::new());
        let manager = Arc::new(TrackManager::new(
            config.algorithms.management.clone(),
            config.volume.clone(),
            config.system.max_tracks,
            stats.clone(),
        ));
        let running = Arc::new(AtomicBool::new(false));
        let healthy = Arc::new(AtomicBool::new(true));

        let (raw_tx, raw_rx) = bounded(config.pipeline.channel_capacity);
        let ingress = IngressHandle::new(
            raw_tx,
            raw_rx.clone(),
            config.system.tracking_mode,
            running.clone(),
            stats.clone(),
        );

        Ok(Self {
            config,
            stats,
            manager,
            running,
            healthy,
            ingress,
            raw_rx: Some(raw_rx),
            outputs: Some(outputs),
            workers: Vec::new(),
            monitor_stop: None,
            started_at: Instant::now(),
        })
    }

    /// Handle to register with the communication adapter. Valid before and
    /// after `start`; pushes are rejected until the system runs.
    pub fn ingress(&self) -> IngressHandle {
        self.ingress.clone()
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    pub fn is_healthy(&self) -> bool {
        self.healthy.load(Ordering::Acquire)
    }

    /// Consistent snapshot of the non-terminated tracks.
    pub fn active_tracks(&self) -> Vec<Track> {
        self.manager.active_tracks()
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot(self.manager.active_count() as u32)
    }

    /// Spawn all stage workers and the health monitor.
    pub fn start(&mut self) -> Result<(), RadarError> {
        if !self.workers.is_empty() {
            return Err(RadarError::StageFatal {
                stage: "system",
                reason: "already started".into(),
            });
        }
        let raw_rx = self.raw_rx.take().ok_or(RadarError::StageFatal {
            stage: "system",
            reason: "system cannot be restarted".into(),
        })?;
        let outputs = self.outputs.take().unwrap_or_default();

        let capacity = self.config.pipeline.channel_capacity;
        let (det_tx, det_rx) = bounded::<FrameDetections>(capacity);
        let (clu_tx, clu_rx) = bounded::<FrameClusters>(capacity);
        let (trk_tx, trk_rx) = bounded::<TrackFrame>(capacity);

        self.running.store(true, Ordering::Release);
        self.started_at = Instant::now();

        self.spawn_decode(raw_rx, det_tx)?;
        self.spawn_cluster(det_rx, clu_tx)?;
        self.spawn_track(clu_rx, trk_tx)?;
        self.spawn_output(trk_rx, outputs)?;
        self.spawn_monitor()?;

        tracing::info!(
            mode = ?self.config.system.tracking_mode,
            max_tracks = self.config.system.max_tracks,
            channel_capacity = capacity,
            "radar system started"
        );
        Ok(())
    }

    fn spawn(
        &mut self,
        stage: &'static str,
        body: impl FnOnce() + Send + 'static,
    ) -> Result<(), RadarError> {
        let handle = std::thread::Builder::new()
            .name(stage.to_string())
            .spawn(body)
            .map_err(|e| RadarError::StageFatal {
                stage,
                reason: format!("failed to spawn worker: {e}"),
            })?;
        self.workers.push((stage, handle));
        Ok(())
    }

    /// Decode stage: the only worker that watches the running flag, since
    /// its input channel stays open as long as ingress handles exist.
    fn spawn_decode(
        &mut self,
        raw_rx: Receiver<RawFrame>,
        det_tx: Sender<FrameDetections>,
    ) -> Result<(), RadarError> {
        let running = self.running.clone();
        let stats = self.stats.clone();
        self.spawn("decode", move || {
            let mut decoder = FrameDecoder::new();
            loop {
                let raw = match raw_rx.recv_timeout(RECV_POLL) {
                    Ok(raw) => raw,
                    Err(RecvTimeoutError::Timeout) => {
                        if !running.load(Ordering::Acquire) && raw_rx.is_empty() {
                            break;
                        }
                        continue;
                    }
                    Err(RecvTimeoutError::Disconnected) => break,
                };
                let out = decoder.decode(&raw);
                if let Some(err) = out.error {
                    PipelineStats::incr(&stats.decode_errors);
                    tracing::warn!(%err, "recoverable decode error");
                }
                PipelineStats::add(&stats.detections_rejected, out.rejected_records as u64);
                PipelineStats::add(
                    &stats.detections_processed,
                    out.frame.detections.len() as u64,
                );
                if det_tx.send(out.frame).is_err() {
                    break; // downstream gone
                }
            }
            tracing::debug!("decode stage drained");
        })
    }

    fn spawn_cluster(
        &mut self,
        det_rx: Receiver<FrameDetections>,
        clu_tx: Sender<FrameClusters>,
    ) -> Result<(), RadarError> {
        let clusterer = DbscanClusterer::new(self.config.algorithms.clustering.clone());
        let stats = self.stats.clone();
        self.spawn("cluster", move || {
            while let Ok(frame) = det_rx.recv() {
                let clusters = clusterer.cluster(&frame.detections);
                PipelineStats::add(&stats.clusters_formed, clusters.len() as u64);
                let out = FrameClusters {
                    seq: frame.seq,
                    arrival_ns: frame.arrival_ns,
                    clusters,
                    detections: frame.detections,
                };
                if clu_tx.send(out).is_err() {
                    break;
                }
            }
            tracing::debug!("cluster stage drained");
        })
    }

    fn spawn_track(
        &mut self,
        clu_rx: Receiver<FrameClusters>,
        trk_tx: Sender<TrackFrame>,
    ) -> Result<(), RadarError> {
        let tracking =
            TrackingPipeline::new(self.config.clone(), self.manager.clone(), self.stats.clone());
        self.spawn("track", move || {
            while let Ok(frame) = clu_rx.recv() {
                let out = tracking.tick(&frame);
                if trk_tx.send(out).is_err() {
                    break;
                }
            }
            tracing::debug!("track stage drained");
        })
    }

    fn spawn_output(
        &mut self,
        trk_rx: Receiver<TrackFrame>,
        mut outputs: Vec<Box<dyn OutputAdapter>>,
    ) -> Result<(), RadarError> {
        let stats = self.stats.clone();
        let healthy = self.healthy.clone();
        let running = self.running.clone();
        self.spawn("output", move || {
            while let Ok(frame) = trk_rx.recv() {
                let mut fatal = false;
                for adapter in outputs.iter_mut() {
                    if let Err(err) = adapter.publish(&frame) {
                        tracing::error!(%err, "output adapter failed");
                        fatal = true;
                    }
                }
                PipelineStats::incr(&stats.frames_published);
                if fatal {
                    // A broken egress is a stage-fatal condition: flip
                    // health and let the orchestrator wind the system down.
                    healthy.store(false, Ordering::Release);
                    running.store(false, Ordering::Release);
                }
            }
            tracing::debug!("output stage drained");
        })
    }

    fn spawn_monitor(&mut self) -> Result<(), RadarError> {
        let (stop_tx, stop_rx) = bounded::<()>(1);
        self.monitor_stop = Some(stop_tx);
        let period = Duration::from_secs_f64(self.config.pipeline.health_period_sec);
        let stats = self.stats.clone();
        let manager = self.manager.clone();
        let ingress = self.ingress.clone();
        let healthy = self.healthy.clone();
        self.spawn("health", move || {
            loop {
                match stop_rx.recv_timeout(period) {
                    Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
                    Err(RecvTimeoutError::Timeout) => {}
                }
                let snap = stats.snapshot(manager.active_count() as u32);
                if !healthy.load(Ordering::Acquire) {
                    tracing::error!("system unhealthy; awaiting shutdown");
                }
                let queued = ingress.queued();
                if queued > 0 {
                    tracing::debug!(queued, "frames waiting at ingress");
                }
                tracing::info!(
                    active_tracks = snap.active_tracks,
                    frames_received = snap.frames_received,
                    frames_dropped = snap.frames_dropped,
                    detections = snap.detections_processed,
                    "system status"
                );
            }
        })
    }

    /// Orderly shutdown: flip the flag, let the stages drain in pipeline
    /// order, join everything under the configured bounded wait.
    pub fn stop(&mut self) -> Result<(), RadarError> {
        self.running.store(false, Ordering::Release);
        if let Some(stop_tx) = self.monitor_stop.take() {
            let _ = stop_tx.send(());
        }

        let deadline =
            Instant::now() + Duration::from_secs_f64(self.config.pipeline.drain_timeout_sec);
        let mut workers = std::mem::take(&mut self.workers);
        while !workers.is_empty() {
            if let Some(pos) = workers.iter().position(|(_, h)| h.is_finished()) {
                let (stage, handle) = workers.remove(pos);
                if handle.join().is_err() {
                    tracing::error!(stage, "stage worker panicked");
                    self.healthy.store(false, Ordering::Release);
                }
                continue;
            }
            if Instant::now() > deadline {
                let pending = workers.len();
                for (stage, _) in &workers {
                    tracing::error!(stage, "worker did not drain before timeout");
                }
                return Err(RadarError::ShutdownTimeout { pending });
            }
            std::thread::sleep(Duration::from_millis(10));
        }

        let snap = self.stats.snapshot(self.manager.active_count() as u32);
        let runtime = self.started_at.elapsed().as_secs_f64();
        tracing::info!(
            runtime_sec = format!("{runtime:.1}"),
            detections = snap.detections_processed,
            tracks_created = snap.tracks_created,
            frames_published = snap.frames_published,
            rate_hz = format!("{:.1}", snap.frames_published as f64 / runtime.max(1e-9)),
            "radar system stopped"
        );
        Ok(())
    }
}

impl Drop for RadarSystem {
    fn drop(&mut self) {
        if !self.workers.is_empty() {
            let _ = self.stop();
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
