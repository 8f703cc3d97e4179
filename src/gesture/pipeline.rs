//! Per-frame gesture pipeline
//!
//! Owns the camera session: every frame is classified, stabilized and
//! passed through the dispatcher before the next one is taken. Actions
//! are queued for the worker rather than executed here, so a slow
//! docker call never holds up frame processing.

use std::time::{Duration, Instant};

use tokio::sync::{broadcast, mpsc};
use tracing::{debug, info, warn};

use super::dispatcher::Dispatcher;
use super::stabilizer::Stabilizer;
use crate::config::Config;
use crate::events::DispatchEvent;
use crate::executor::{DispatchRequest, Trigger};
use crate::landmarks::{count_fingers, Frame, FrameEvent};

/// Requests to open or close the camera session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionControl {
    Activate,
    Deactivate,
}

/// Tuning for the pipeline
#[derive(Debug, Clone)]
pub struct PipelineSettings {
    pub window: usize,
    pub cooldown: Duration,
    pub min_detection_confidence: f32,
    pub mirror_x: bool,
    pub start_active: bool,
}

impl From<&Config> for PipelineSettings {
    fn from(config: &Config) -> Self {
        Self {
            window: config.window,
            cooldown: config.cooldown,
            min_detection_confidence: config.min_detection_confidence,
            mirror_x: config.mirror_x,
            start_active: config.start_active,
        }
    }
}

/// State that lives exactly as long as one camera session
#[derive(Debug)]
struct Session {
    stabilizer: Stabilizer,
    dispatcher: Dispatcher,
    stable_count: u8,
}

/// Frame loop feeding the dispatch queue
pub struct GesturePipeline {
    settings: PipelineSettings,
    session: Option<Session>,
    queue_tx: mpsc::Sender<DispatchRequest>,
    event_tx: broadcast::Sender<DispatchEvent>,
}

impl GesturePipeline {
    /// Create a pipeline; the session opens when `run` starts if configured
    pub fn new(
        settings: PipelineSettings,
        queue_tx: mpsc::Sender<DispatchRequest>,
        event_tx: broadcast::Sender<DispatchEvent>,
    ) -> Self {
        Self {
            settings,
            session: None,
            queue_tx,
            event_tx,
        }
    }

    /// Whether a camera session is open
    #[cfg(test)]
    pub fn is_active(&self) -> bool {
        self.session.is_some()
    }

    /// Current stabilized count (0 without a session)
    #[cfg(test)]
    pub fn stable_count(&self) -> u8 {
        self.session.as_ref().map_or(0, |s| s.stable_count)
    }

    /// Open a camera session with fresh state
    pub fn activate(&mut self) {
        if self.session.is_some() {
            return;
        }

        self.session = Some(Session {
            stabilizer: Stabilizer::new(self.settings.window),
            dispatcher: Dispatcher::new(self.settings.cooldown),
            stable_count: 0,
        });

        info!(window = self.settings.window, cooldown = ?self.settings.cooldown, "camera session started");
        let _ = self.event_tx.send(DispatchEvent::SessionStarted);
    }

    /// Close the camera session and discard its state
    pub fn deactivate(&mut self) {
        if self.session.take().is_some() {
            info!("camera session ended");
            let _ = self.event_tx.send(DispatchEvent::SessionEnded);
        }
    }

    /// Run the pipeline until the landmark source closes
    pub async fn run(
        &mut self,
        mut frame_rx: mpsc::Receiver<FrameEvent>,
        mut control_rx: mpsc::Receiver<SessionControl>,
    ) {
        info!("gesture pipeline started");

        if self.settings.start_active {
            self.activate();
        }

        loop {
            tokio::select! {
                biased;

                Some(control) = control_rx.recv() => {
                    match control {
                        SessionControl::Activate => self.activate(),
                        SessionControl::Deactivate => self.deactivate(),
                    }
                }

                event = frame_rx.recv() => {
                    match event {
                        Some(FrameEvent::Frame { frame, at }) => {
                            if let Some(request) = self.handle_frame(&frame, at) {
                                self.enqueue(request).await;
                            }
                        }
                        Some(FrameEvent::SourceClosed) | None => {
                            info!("landmark source closed");
                            break;
                        }
                    }
                }
            }
        }

        self.deactivate();
        info!("gesture pipeline stopped");
    }

    /// Process one frame; returns the request to queue, if any
    fn handle_frame(&mut self, frame: &Frame, at: Instant) -> Option<DispatchRequest> {
        let session = self.session.as_mut()?;

        let raw = match frame.primary_hand(self.settings.min_detection_confidence) {
            Some(hand) if self.settings.mirror_x => count_fingers(Some(&hand.mirrored())),
            hand => count_fingers(hand),
        };

        let stable = session.stabilizer.push(raw);
        if stable != session.stable_count {
            debug!(raw, stable, "stable count changed");
            session.stable_count = stable;
            let _ = self
                .event_tx
                .send(DispatchEvent::StableCountChanged { count: stable });
        }

        let action = session.dispatcher.observe(stable, at)?;
        info!(fingers = stable, %action, "gesture dispatched");

        Some(DispatchRequest {
            action,
            trigger: Trigger::Gesture { fingers: stable },
        })
    }

    /// Hand a request to the worker, keeping arrival order
    async fn enqueue(&self, request: DispatchRequest) {
        if self.queue_tx.send(request).await.is_err() {
            warn!(action = %request.action, "dispatch queue closed, dropping command");
            return;
        }

        let _ = self.event_tx.send(DispatchEvent::CommandQueued {
            action: request.action,
            trigger: request.trigger,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use crate::executor::tests::RecordingExecutor;
    use crate::executor::{Action, CommandWorker};
    use crate::landmarks::{test_hand, DetectedHand};

    fn settings() -> PipelineSettings {
        PipelineSettings {
            window: 3,
            cooldown: Duration::from_secs(3),
            min_detection_confidence: 0.7,
            mirror_x: false,
            start_active: true,
        }
    }

    fn frame_with(fingers: u8) -> Frame {
        let raised = |i: u8| fingers > i + 1;
        let landmarks = test_hand(fingers >= 1, [raised(0), raised(1), raised(2), raised(3)]);
        Frame {
            hands: vec![DetectedHand {
                score: Some(0.9),
                landmarks,
            }],
        }
    }

    fn pipeline() -> (
        GesturePipeline,
        mpsc::Receiver<DispatchRequest>,
        broadcast::Receiver<DispatchEvent>,
    ) {
        let (queue_tx, queue_rx) = mpsc::channel(8);
        let (event_tx, event_rx) = broadcast::channel(64);
        (
            GesturePipeline::new(settings(), queue_tx, event_tx),
            queue_rx,
            event_rx,
        )
    }

    #[test]
    fn test_frame_helper_counts() {
        for n in 0..=5u8 {
            let frame = frame_with(n);
            assert_eq!(count_fingers(frame.primary_hand(0.7)), n);
        }
    }

    #[test]
    fn test_inactive_pipeline_ignores_frames() {
        let (mut p, _q, _e) = pipeline();
        assert!(!p.is_active());
        assert_eq!(p.handle_frame(&frame_with(1), Instant::now()), None);
    }

    #[test]
    fn test_held_gesture_fires_once() {
        let (mut p, _q, _e) = pipeline();
        p.activate();

        let base = Instant::now();
        let fired: Vec<_> = (0..10)
            .filter_map(|i| p.handle_frame(&frame_with(2), base + Duration::from_millis(i * 33)))
            .collect();

        assert_eq!(
            fired,
            vec![DispatchRequest {
                action: Action::Run,
                trigger: Trigger::Gesture { fingers: 2 },
            }]
        );
        assert_eq!(p.stable_count(), 2);
    }

    #[test]
    fn test_single_frame_glitch_does_not_fire() {
        let (mut p, _q, _e) = pipeline();
        p.activate();

        let base = Instant::now();
        assert_eq!(p.handle_frame(&Frame::default(), base), None);
        assert_eq!(p.handle_frame(&Frame::default(), base), None);
        // One stray frame is outvoted by the two empty ones
        assert_eq!(p.handle_frame(&frame_with(5), base), None);
        assert_eq!(p.stable_count(), 0);
    }

    #[test]
    fn test_low_confidence_counts_as_no_hand() {
        let (mut p, _q, _e) = pipeline();
        p.activate();

        let mut frame = frame_with(1);
        frame.hands[0].score = Some(0.3);
        let base = Instant::now();
        for _ in 0..3 {
            assert_eq!(p.handle_frame(&frame, base), None);
        }
        assert_eq!(p.stable_count(), 0);
    }

    #[test]
    fn test_mirroring_applies_before_count() {
        let (queue_tx, _q) = mpsc::channel(8);
        let (event_tx, _e) = broadcast::channel(8);
        let mut p = GesturePipeline::new(
            PipelineSettings {
                mirror_x: true,
                ..settings()
            },
            queue_tx,
            event_tx,
        );
        p.activate();

        // An open hand on an unmirrored frame reads as four fingers
        let request = p.handle_frame(&frame_with(5), Instant::now());
        assert_eq!(request.map(|r| r.action), Some(Action::Start));
    }

    #[test]
    fn test_new_session_discards_dispatch_state() {
        let (mut p, _q, mut events) = pipeline();
        p.activate();

        let base = Instant::now();
        assert!(p.handle_frame(&frame_with(1), base).is_some());

        p.deactivate();
        p.activate();

        // Same count, inside the old cooldown, fires again in the new session
        let again = p.handle_frame(&frame_with(1), base + Duration::from_millis(100));
        assert_eq!(again.map(|r| r.action), Some(Action::Pull));

        let mut seen = Vec::new();
        while let Ok(event) = events.try_recv() {
            seen.push(event);
        }
        assert_eq!(seen.first(), Some(&DispatchEvent::SessionStarted));
        assert!(seen.contains(&DispatchEvent::SessionEnded));
    }

    #[tokio::test]
    async fn test_run_queues_and_stops_on_source_close() {
        let (mut p, mut queue_rx, mut events) = pipeline();
        let (frame_tx, frame_rx) = mpsc::channel(32);
        let (_control_tx, control_rx) = mpsc::channel(4);

        let base = Instant::now();
        for (i, n) in [1u8, 1, 1, 3, 3, 3].into_iter().enumerate() {
            let at = base + Duration::from_secs(i as u64 * 2);
            frame_tx
                .send(FrameEvent::Frame {
                    frame: frame_with(n),
                    at,
                })
                .await
                .unwrap();
        }
        frame_tx.send(FrameEvent::SourceClosed).await.unwrap();

        p.run(frame_rx, control_rx).await;
        assert!(!p.is_active());

        // 1 fires at t=0; 3 becomes stable at t=8 (window of 3: [1,3,3]) and fires
        assert_eq!(queue_rx.recv().await.map(|r| r.action), Some(Action::Pull));
        assert_eq!(queue_rx.recv().await.map(|r| r.action), Some(Action::Stop));
        assert!(queue_rx.try_recv().is_err());

        let mut queued = 0;
        while let Ok(event) = events.try_recv() {
            if matches!(event, DispatchEvent::CommandQueued { .. }) {
                queued += 1;
            }
        }
        assert_eq!(queued, 2);
    }

    #[tokio::test]
    async fn test_run_honours_deactivate() {
        let (mut p, mut queue_rx, _e) = pipeline();
        let (frame_tx, frame_rx) = mpsc::channel(8);
        let (control_tx, control_rx) = mpsc::channel(4);

        control_tx.send(SessionControl::Deactivate).await.unwrap();
        frame_tx
            .send(FrameEvent::Frame {
                frame: frame_with(2),
                at: Instant::now(),
            })
            .await
            .unwrap();
        frame_tx.send(FrameEvent::SourceClosed).await.unwrap();

        p.run(frame_rx, control_rx).await;
        assert!(queue_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_failed_command_still_arms_cooldown() {
        let (mut p, _q, mut events) = pipeline();
        p.activate();

        let executor = Arc::new(RecordingExecutor::failing(&[Action::Run]));
        let worker = CommandWorker::new(executor.clone(), p.event_tx.clone());

        let base = Instant::now();
        let secs = |s: f64| base + Duration::from_secs_f64(s);

        let request = p.handle_frame(&frame_with(2), secs(0.0)).unwrap();

        // Run the dispatched command through the worker
        let (tx, rx) = mpsc::channel(1);
        tx.send(request).await.unwrap();
        drop(tx);
        worker.run(rx).await;
        assert_eq!(executor.calls(), vec![Action::Run]);

        let mut outcome = None;
        while let Ok(event) = events.try_recv() {
            if let DispatchEvent::CommandCompleted { record } = event {
                outcome = Some(record.success);
            }
        }
        assert_eq!(outcome, Some(false));

        // Same count stays suppressed after the failure
        assert_eq!(p.handle_frame(&frame_with(2), secs(0.5)), None);
        assert_eq!(p.handle_frame(&frame_with(2), secs(1.0)), None);

        // A new count is gated by the cooldown of the failed dispatch
        for t in [1.5, 1.6, 2.9] {
            assert_eq!(p.handle_frame(&frame_with(3), secs(t)), None);
        }
        assert_eq!(p.stable_count(), 3);
        let late = p.handle_frame(&frame_with(3), secs(3.1));
        assert_eq!(late.map(|r| r.action), Some(Action::Stop));
    }

    #[tokio::test]
    async fn test_closed_queue_reports_nothing_queued() {
        let (mut p, queue_rx, mut events) = pipeline();
        drop(queue_rx);
        p.activate();

        let request = p.handle_frame(&frame_with(1), Instant::now()).unwrap();
        p.enqueue(request).await;

        while let Ok(event) = events.try_recv() {
            assert!(!matches!(event, DispatchEvent::CommandQueued { .. }));
        }
    }
}
