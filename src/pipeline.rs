//! Threaded runtime around [`TargetTracker`].
//!
//! One worker thread owns the tracker and the detector. Frames go through a
//! latest-only slot so a slow worker skips stale frames instead of queueing
//! them; sensor samples and control commands share a single unbounded queue
//! and never block the caller. Readers get whole snapshots, never a
//! half-updated box. Events go to a bounded queue with a single receiver;
//! when nobody drains it the newest events are dropped.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use crossbeam_channel::{bounded, select, unbounded, Receiver, Sender, TrySendError};
use parking_lot::{Mutex, RwLock};
use tracing::{debug, info, warn};

use crate::detector::Detector;
use crate::error::Error;
use crate::flow::FlowBackend;
use crate::frame::Frame;
use crate::hand::HandPose;
use crate::tracker::{SensorEvent, TargetTracker, TrackEvent, TrackSnapshot};

/// Events held for a slow or absent reader.
pub const EVENT_BACKLOG: usize = 64;

/// Single-value mailbox: writers overwrite, the reader sees the newest.
pub struct LatestSlot<T>(Mutex<Option<T>>);

impl<T> LatestSlot<T> {
    pub fn new() -> Self {
        Self(Mutex::new(None))
    }

    /// Stores `value`, returning `true` when an unread value was replaced.
    pub fn put(&self, value: T) -> bool {
        self.0.lock().replace(value).is_some()
    }

    pub fn take(&self) -> Option<T> {
        self.0.lock().take()
    }
}

impl<T: Clone> LatestSlot<T> {
    pub fn peek(&self) -> Option<T> {
        self.0.lock().clone()
    }
}

impl<T> Default for LatestSlot<T> {
    fn default() -> Self {
        Self::new()
    }
}

enum Command {
    Sensor(SensorEvent),
    SetTarget(Option<String>),
    Shutdown,
}

struct Shared {
    frame: LatestSlot<Frame>,
    hands: LatestSlot<Vec<HandPose>>,
    snapshot: RwLock<TrackSnapshot>,
    dropped_frames: AtomicU64,
    dropped_events: AtomicU64,
}

pub struct TrackingPipeline {
    shared: Arc<Shared>,
    commands: Sender<Command>,
    notify: Sender<()>,
    events: Mutex<Option<Receiver<TrackEvent>>>,
    worker: Option<JoinHandle<()>>,
}

impl TrackingPipeline {
    /// Moves `tracker` and `detector` onto a new worker thread.
    pub fn spawn<D, B>(tracker: TargetTracker<B>, detector: D) -> Result<Self, Error>
    where
        D: Detector + Send + 'static,
        B: FlowBackend + Send + 'static,
    {
        let shared = Arc::new(Shared {
            frame: LatestSlot::new(),
            hands: LatestSlot::new(),
            snapshot: RwLock::new(tracker.snapshot()),
            dropped_frames: AtomicU64::new(0),
            dropped_events: AtomicU64::new(0),
        });

        let (commands, command_rx) = unbounded();
        let (notify, notify_rx) = bounded(1);
        let (event_tx, events) = bounded(EVENT_BACKLOG);

        let worker = {
            let shared = shared.clone();

            thread::Builder::new()
                .name("locktrack-worker".into())
                .spawn(move || {
                    let mut worker = Worker {
                        tracker,
                        detector,
                        shared,
                        events: event_tx,
                    };
                    worker.run(command_rx, notify_rx);
                })?
        };

        Ok(Self {
            shared,
            commands,
            notify,
            events: Mutex::new(Some(events)),
            worker: Some(worker),
        })
    }

    /// Hands a frame to the worker, replacing any frame it has not started.
    pub fn submit_frame(&self, frame: Frame) -> Result<(), Error> {
        if self.worker.is_none() {
            return Err(Error::PipelineClosed);
        }

        if self.shared.frame.put(frame) {
            self.shared.dropped_frames.fetch_add(1, Ordering::Relaxed);
        }

        match self.notify.try_send(()) {
            Ok(()) | Err(TrySendError::Full(())) => Ok(()),
            Err(TrySendError::Disconnected(())) => Err(Error::PipelineClosed),
        }
    }

    /// Publishes the newest hand-landmark result.
    pub fn publish_hands(&self, hands: Vec<HandPose>) {
        self.shared.hands.put(hands);
    }

    pub fn push_sensor(&self, event: SensorEvent) -> Result<(), Error> {
        self.send(Command::Sensor(event))
    }

    pub fn set_target(&self, target: Option<&str>) -> Result<(), Error> {
        self.send(Command::SetTarget(target.map(str::to_string)))
    }

    #[inline]
    pub fn snapshot(&self) -> TrackSnapshot {
        self.shared.snapshot.read().clone()
    }

    /// Hands out the event receiver. Only the first call gets it.
    pub fn take_events(&self) -> Option<Receiver<TrackEvent>> {
        self.events.lock().take()
    }

    /// Events discarded because the receiver was full.
    #[inline]
    pub fn dropped_events(&self) -> u64 {
        self.shared.dropped_events.load(Ordering::Relaxed)
    }

    /// Frames overwritten before the worker reached them.
    #[inline]
    pub fn dropped_frames(&self) -> u64 {
        self.shared.dropped_frames.load(Ordering::Relaxed)
    }

    /// Stops the worker and waits for it. Later calls are no-ops.
    pub fn shutdown(&mut self) {
        if let Some(handle) = self.worker.take() {
            let _ = self.commands.send(Command::Shutdown);

            if handle.join().is_err() {
                warn!("tracking worker panicked");
            }
        }
    }

    fn send(&self, command: Command) -> Result<(), Error> {
        if self.worker.is_none() {
            return Err(Error::PipelineClosed);
        }

        self.commands.send(command).map_err(|_| Error::PipelineClosed)
    }
}

impl Drop for TrackingPipeline {
    fn drop(&mut self) {
        self.shutdown();
    }
}

struct Worker<D, B: FlowBackend> {
    tracker: TargetTracker<B>,
    detector: D,
    shared: Arc<Shared>,
    events: Sender<TrackEvent>,
}

impl<D: Detector, B: FlowBackend> Worker<D, B> {
    fn run(&mut self, commands: Receiver<Command>, notify: Receiver<()>) {
        info!("tracking worker started");

        loop {
            select! {
                recv(commands) -> cmd => match cmd {
                    Ok(cmd) => {
                        if !self.handle(cmd) {
                            break;
                        }
                    }
                    Err(_) => break,
                },
                recv(notify) -> msg => {
                    if msg.is_err() {
                        break;
                    }

                    // samples and commands sent before the frame apply first
                    let mut running = true;
                    while let Ok(cmd) = commands.try_recv() {
                        if !self.handle(cmd) {
                            running = false;
                            break;
                        }
                    }
                    if !running {
                        break;
                    }

                    if let Some(frame) = self.shared.frame.take() {
                        self.process(&frame);
                    }
                }
            }
        }

        info!("tracking worker stopped");
    }

    /// Applies one command; `false` asks the loop to exit.
    fn handle(&mut self, command: Command) -> bool {
        match command {
            Command::Sensor(event) => {
                let events = self.tracker.on_sensor(event);
                self.publish(events);
            }
            Command::SetTarget(target) => {
                self.tracker.set_target(target.as_deref());
                self.publish(Vec::new());
            }
            Command::Shutdown => return false,
        }

        true
    }

    fn process(&mut self, frame: &Frame) {
        let hands = self.shared.hands.peek().unwrap_or_default();
        let out = self.tracker.process_frame(frame, &mut self.detector, &hands);

        if !out.events.is_empty() {
            debug!("frame {}: {:?}", frame.timestamp_ms, out.events);
        }

        self.publish(out.events);
    }

    fn publish(&self, events: Vec<TrackEvent>) {
        *self.shared.snapshot.write() = self.tracker.snapshot();

        for event in events {
            match self.events.try_send(event) {
                // a dropped receiver means nobody listens
                Ok(()) | Err(TrySendError::Disconnected(_)) => (),
                Err(TrySendError::Full(event)) => {
                    self.shared.dropped_events.fetch_add(1, Ordering::Relaxed);
                    debug!("event queue full, dropping {:?}", event);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TrackerConfig;
    use crate::detection::ClassLabels;
    use crate::detector::Inference;
    use crate::state::TrackPhase;
    use std::time::{Duration, Instant};

    struct Blind;

    impl Detector for Blind {
        fn infer(&mut self, _frame: &Frame) -> Result<Inference, Error> {
            Err(Error::Detector("no model".into()))
        }
    }

    fn pipeline() -> TrackingPipeline {
        let tracker = TargetTracker::new(TrackerConfig::default(), ClassLabels::new(vec!["cola".into()]));
        TrackingPipeline::spawn(tracker, Blind).unwrap()
    }

    fn wait_for<F: Fn(&TrackSnapshot) -> bool>(p: &TrackingPipeline, cond: F) -> bool {
        let deadline = Instant::now() + Duration::from_secs(5);
        while Instant::now() < deadline {
            if cond(&p.snapshot()) {
                return true;
            }
            thread::sleep(Duration::from_millis(2));
        }
        false
    }

    #[test]
    fn slot_keeps_only_latest() {
        let slot = LatestSlot::new();
        assert!(!slot.put(1));
        assert!(slot.put(2));
        assert_eq!(slot.peek(), Some(2));
        assert_eq!(slot.take(), Some(2));
        assert_eq!(slot.take(), None);
    }

    #[test]
    fn commands_reach_the_worker() {
        let p = pipeline();
        assert_eq!(p.snapshot().phase, TrackPhase::Idle);

        p.set_target(Some("cola")).unwrap();
        assert!(wait_for(&p, |s| s.phase == TrackPhase::Searching));

        p.submit_frame(Frame::from_gray(ndarray::Array2::from_elem((48, 64), 128), 1_000))
            .unwrap();
        assert!(wait_for(&p, |s| s.timestamp_ms == 1_000 && s.image_width == 64));
    }

    #[test]
    fn event_receiver_is_handed_out_once() {
        let p = pipeline();
        assert!(p.take_events().is_some());
        assert!(p.take_events().is_none());
    }

    #[test]
    fn unread_events_stay_bounded() {
        let tracker = TargetTracker::new(TrackerConfig::default(), ClassLabels::new(vec!["cola".into()]));
        let (tx, rx) = bounded(EVENT_BACKLOG);
        let worker = Worker {
            tracker,
            detector: Blind,
            shared: Arc::new(Shared {
                frame: LatestSlot::new(),
                hands: LatestSlot::new(),
                snapshot: RwLock::new(TrackSnapshot::default()),
                dropped_frames: AtomicU64::new(0),
                dropped_events: AtomicU64::new(0),
            }),
            events: tx,
        };

        worker.publish(vec![TrackEvent::Lost; EVENT_BACKLOG + 10]);
        assert_eq!(rx.len(), EVENT_BACKLOG);
        assert_eq!(worker.shared.dropped_events.load(Ordering::Relaxed), 10);

        // a reader that went away is not an error
        drop(rx);
        worker.publish(vec![TrackEvent::FastRotation]);
        assert_eq!(worker.shared.dropped_events.load(Ordering::Relaxed), 10);
    }

    #[test]
    fn closed_pipeline_rejects_input() {
        let mut p = pipeline();
        p.shutdown();
        p.shutdown();

        assert!(matches!(p.set_target(Some("cola")), Err(Error::PipelineClosed)));
        assert!(matches!(
            p.submit_frame(Frame::from_gray(ndarray::Array2::zeros((4, 4)), 0)),
            Err(Error::PipelineClosed)
        ));
    }
}
