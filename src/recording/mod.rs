// THEORY:
// The recording subsystem turns a motion verdict into evidence on disk
// without ever blocking the capture loop. The `RecordingSessionManager`
// owns at most two concurrent sessions, one Auto (triggered by detection,
// bounded duration, seeded with the pre-roll buffer) and one Manual
// (operator-controlled, runs until stopped and drained), each backed by
// its own writer thread and its own record queue.
//
// Key architectural principles:
// 1.  **Bounded-Effort Lifecycle**: Each session walks
//     Idle → Priming → Active → Stopping → Done. Every transition is
//     driven by the writer thread except the force-reset in
//     `stop_all_and_wait`, which reclaims the slot even from a wedged
//     writer once the shutdown budget expires.
// 2.  **Fail the Start, Not the Session**: Everything that can fail
//     synchronously (empty pre-roll, sink open) fails in the caller before
//     a thread is spawned. Once a writer is running, per-frame write
//     errors are logged and skipped; the session itself never dies of one.
// 3.  **Sticky Stop**: The stop signal is a channel send. The writer polls
//     it with `try_recv` every iteration and latches it, so a stop is
//     never lost to timing, and a dropped sender counts as a stop.
// 4.  **No-Op Re-Entry**: Starting a session kind that is already live is
//     a silent no-op. The trigger side stays free to fire every frame.

pub mod evidence;
pub mod sink;

use crate::core_modules::buffers::SharedBuffers;
use crate::core_modules::frame::Frame;
use crate::error::{Result, VisionError};
use crate::recording::sink::{SinkFactory, VideoSink};
use crossbeam_channel::{Receiver, Sender, TryRecvError};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

/// Writer-side poll interval while its queue is empty.
const POLL_BACKOFF: Duration = Duration::from_millis(10);

/// The two concurrent session slots.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionKind {
    /// Detection-triggered, pre-roll seeded, fixed duration.
    Auto,
    /// Operator-controlled, runs until stopped and drained.
    Manual,
}

impl SessionKind {
    pub const ALL: [SessionKind; 2] = [SessionKind::Auto, SessionKind::Manual];

    pub fn index(self) -> usize {
        match self {
            SessionKind::Auto => 0,
            SessionKind::Manual => 1,
        }
    }
}

/// Lifecycle of one recording session slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    /// Pre-roll snapshot is being written.
    Priming,
    /// Draining the live record queue.
    Active,
    /// Finalizing the sink.
    Stopping,
    /// Writer finished; the slot is reclaimed on the next start.
    Done,
}

impl SessionState {
    fn is_live(self) -> bool {
        matches!(self, SessionState::Priming | SessionState::Active | SessionState::Stopping)
    }
}

struct SessionSlot {
    state: Arc<Mutex<SessionState>>,
    handle: Option<JoinHandle<()>>,
    stop_tx: Option<Sender<()>>,
}

impl SessionSlot {
    fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(SessionState::Idle)),
            handle: None,
            stop_tx: None,
        }
    }

    fn state(&self) -> SessionState {
        // A poisoned state lock still holds a plain enum; recover it.
        *self
            .state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn set_state(&self, state: SessionState) {
        *self
            .state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = state;
    }

    /// Joins a finished writer so a Done slot becomes startable again.
    fn reap(&mut self) {
        if self
            .handle
            .as_ref()
            .is_some_and(|handle| handle.is_finished())
        {
            if let Some(handle) = self.handle.take() {
                let _ = handle.join();
            }
            self.stop_tx = None;
            self.set_state(SessionState::Idle);
        }
    }
}

/// Owns the Auto and Manual session slots and their writer threads.
pub struct RecordingSessionManager {
    evidence_dir: PathBuf,
    fps: u32,
    buffers: SharedBuffers,
    sink_factory: Arc<dyn SinkFactory>,
    slots: [SessionSlot; 2],
}

impl RecordingSessionManager {
    pub fn new(
        evidence_dir: PathBuf,
        fps: u32,
        buffers: SharedBuffers,
        sink_factory: Arc<dyn SinkFactory>,
    ) -> Self {
        Self {
            evidence_dir,
            fps,
            buffers,
            sink_factory,
            slots: [SessionSlot::new(), SessionSlot::new()],
        }
    }

    /// Starts a detection-triggered session recording the pre-roll buffer
    /// plus `duration` of live frames. A live Auto session makes this a
    /// no-op; an empty pre-roll or a sink-open failure fails the start.
    pub fn start_auto(&mut self, duration: Duration) -> Result<()> {
        self.start(SessionKind::Auto, Some(duration))
    }

    /// Starts an operator-controlled session that runs until
    /// `stop_manual()` is called and its queue has drained.
    pub fn start_manual(&mut self) -> Result<()> {
        self.start(SessionKind::Manual, None)
    }

    fn start(&mut self, kind: SessionKind, duration: Option<Duration>) -> Result<()> {
        let slot = &mut self.slots[kind.index()];
        slot.reap();
        if slot.state().is_live() {
            return Ok(());
        }

        // A previous session may have ended with frames still queued; they
        // predate this session's pre-roll and must not leak into its clip.
        self.buffers.clear_record(kind);
        let pre_roll = self.buffers.snapshot();
        let first = pre_roll.first().ok_or(VisionError::EmptyPreRoll)?;
        let (width, height) = first.dimensions();

        // Open in the caller so the failure reaches whoever started the
        // session, not a log line in a detached thread.
        let path = evidence::clip_path(&self.evidence_dir, kind);
        let sink = self.sink_factory.open(&path, self.fps, width, height)?;
        log::info!("recording session ({kind:?}) started: {}", path.display());

        let (stop_tx, stop_rx) = crossbeam_channel::unbounded();
        slot.set_state(SessionState::Priming);
        slot.stop_tx = Some(stop_tx);

        let state = Arc::clone(&slot.state);
        let buffers = self.buffers.clone();
        slot.handle = Some(std::thread::spawn(move || {
            writer_loop(sink, pre_roll, buffers, kind, state, stop_rx, duration);
        }));
        Ok(())
    }

    /// Signals the Manual session to stop once its queue drains. Idempotent;
    /// a no-op when nothing manual is running.
    pub fn stop_manual(&mut self) {
        if let Some(tx) = &self.slots[SessionKind::Manual.index()].stop_tx {
            let _ = tx.send(());
        }
    }

    /// Signals both sessions and waits for their writers on one shared
    /// budget. Slots are force-reset to Idle regardless of the outcome, so
    /// `is_recording()` is false afterwards even when a wedged writer is
    /// abandoned; that case returns `ShutdownTimeout`. An abandoned
    /// writer's queue is drained and its stop signal is already latched,
    /// so once it unwedges it exits instead of consuming frames a later
    /// session may enqueue.
    pub fn stop_all_and_wait(&mut self, timeout: Duration) -> Result<()> {
        for slot in &self.slots {
            if let Some(tx) = &slot.stop_tx {
                let _ = tx.send(());
            }
        }

        let deadline = Instant::now() + timeout;
        let mut timed_out = false;
        for kind in SessionKind::ALL {
            let slot = &mut self.slots[kind.index()];
            if let Some(handle) = slot.handle.take() {
                while !handle.is_finished() && Instant::now() < deadline {
                    std::thread::sleep(POLL_BACKOFF);
                }
                if handle.is_finished() {
                    let _ = handle.join();
                } else {
                    // Abandon the writer; the slot is reclaimed anyway.
                    timed_out = true;
                    self.buffers.clear_record(kind);
                }
            }
            slot.stop_tx = None;
            slot.set_state(SessionState::Idle);
        }

        if timed_out {
            log::warn!("shutdown budget of {timeout:?} expired with a writer still live");
            Err(VisionError::ShutdownTimeout(timeout))
        } else {
            Ok(())
        }
    }

    /// True while any session is Priming, Active or Stopping.
    pub fn is_recording(&self) -> bool {
        self.slots.iter().any(|slot| slot.state().is_live())
    }

    /// Session kinds currently accepting frames on their record queue.
    pub fn active_kinds(&self) -> Vec<SessionKind> {
        SessionKind::ALL
            .into_iter()
            .filter(|kind| {
                matches!(
                    self.slots[kind.index()].state(),
                    SessionState::Priming | SessionState::Active
                )
            })
            .collect()
    }

    pub fn session_state(&self, kind: SessionKind) -> SessionState {
        self.slots[kind.index()].state()
    }
}

fn set_state(state: &Arc<Mutex<SessionState>>, value: SessionState) {
    *state
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner()) = value;
}

fn write_or_warn(sink: &mut Box<dyn VideoSink>, frame: &Frame, kind: SessionKind) {
    if let Err(e) = sink.write_frame(frame) {
        log::warn!("recording session ({kind:?}): frame skipped: {e}");
    }
}

/// The per-session writer. Writes the pre-roll, then drains the session's
/// record queue until its end condition: elapsed duration or stop for Auto,
/// stop-and-drained for Manual.
fn writer_loop(
    mut sink: Box<dyn VideoSink>,
    pre_roll: Vec<Frame>,
    buffers: SharedBuffers,
    kind: SessionKind,
    state: Arc<Mutex<SessionState>>,
    stop_rx: Receiver<()>,
    duration: Option<Duration>,
) {
    for frame in &pre_roll {
        write_or_warn(&mut sink, frame, kind);
    }

    set_state(&state, SessionState::Active);
    let started = Instant::now();
    let mut stop_requested = false;

    loop {
        if !stop_requested {
            stop_requested = match stop_rx.try_recv() {
                Ok(()) | Err(TryRecvError::Disconnected) => true,
                Err(TryRecvError::Empty) => false,
            };
        }

        let finished = match duration {
            Some(limit) => stop_requested || started.elapsed() >= limit,
            None => stop_requested && buffers.record_len(kind) == 0,
        };
        if finished {
            break;
        }

        match buffers.pop_record(kind) {
            Some(frame) => write_or_warn(&mut sink, &frame, kind),
            None => std::thread::sleep(POLL_BACKOFF),
        }
    }

    set_state(&state, SessionState::Stopping);
    if let Err(e) = sink.finish() {
        log::warn!("recording session ({kind:?}): finish failed: {e}");
    }
    set_state(&state, SessionState::Done);
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn marked_frame(mark: u8) -> Frame {
        Frame::filled(4, 4, [mark, 0, 0])
    }

    /// Sink that records frame marks in shared memory.
    struct MemorySink {
        written: Arc<Mutex<Vec<u8>>>,
    }

    impl VideoSink for MemorySink {
        fn write_frame(&mut self, frame: &Frame) -> crate::error::Result<()> {
            self.written.lock().unwrap().push(frame.pixel(0, 0)[0]);
            Ok(())
        }

        fn finish(&mut self) -> crate::error::Result<()> {
            Ok(())
        }
    }

    struct MemoryFactory {
        written: Arc<Mutex<Vec<u8>>>,
        opens: AtomicUsize,
    }

    impl MemoryFactory {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                written: Arc::new(Mutex::new(Vec::new())),
                opens: AtomicUsize::new(0),
            })
        }
    }

    impl SinkFactory for MemoryFactory {
        fn open(&self, _: &Path, _: u32, _: u32, _: u32) -> crate::error::Result<Box<dyn VideoSink>> {
            self.opens.fetch_add(1, Ordering::SeqCst);
            Ok(Box::new(MemorySink {
                written: Arc::clone(&self.written),
            }))
        }
    }

    /// Sink whose writes wedge long enough to outlive any shutdown budget.
    struct BlockingSink;

    impl VideoSink for BlockingSink {
        fn write_frame(&mut self, _: &Frame) -> crate::error::Result<()> {
            std::thread::sleep(Duration::from_secs(30));
            Ok(())
        }

        fn finish(&mut self) -> crate::error::Result<()> {
            Ok(())
        }
    }

    struct BlockingFactory;

    impl SinkFactory for BlockingFactory {
        fn open(&self, _: &Path, _: u32, _: u32, _: u32) -> crate::error::Result<Box<dyn VideoSink>> {
            Ok(Box::new(BlockingSink))
        }
    }

    struct FailingFactory;

    impl SinkFactory for FailingFactory {
        fn open(&self, path: &Path, _: u32, _: u32, _: u32) -> crate::error::Result<Box<dyn VideoSink>> {
            Err(VisionError::SinkOpen {
                path: path.to_path_buf(),
                source: std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied"),
            })
        }
    }

    fn manager_with(factory: Arc<dyn SinkFactory>) -> (RecordingSessionManager, SharedBuffers) {
        let buffers = SharedBuffers::new(8, 16);
        let manager = RecordingSessionManager::new(
            PathBuf::from("/tmp"),
            20,
            buffers.clone(),
            factory,
        );
        (manager, buffers)
    }

    fn wait_for_done(manager: &RecordingSessionManager, kind: SessionKind) {
        let deadline = Instant::now() + Duration::from_secs(5);
        while manager.session_state(kind) != SessionState::Done {
            assert!(Instant::now() < deadline, "session never finished");
            std::thread::sleep(Duration::from_millis(5));
        }
    }

    #[test]
    fn empty_pre_roll_fails_the_start() {
        let (mut manager, _buffers) = manager_with(MemoryFactory::new());
        assert!(matches!(
            manager.start_auto(Duration::from_millis(50)),
            Err(VisionError::EmptyPreRoll)
        ));
        assert!(!manager.is_recording());
    }

    #[test]
    fn sink_open_failure_reaches_the_caller() {
        let (mut manager, buffers) = manager_with(Arc::new(FailingFactory));
        buffers.push_frame(marked_frame(0));
        assert!(matches!(
            manager.start_auto(Duration::from_millis(50)),
            Err(VisionError::SinkOpen { .. })
        ));
        assert!(!manager.is_recording());
    }

    #[test]
    fn second_auto_start_while_live_is_a_no_op() {
        let factory = MemoryFactory::new();
        let (mut manager, buffers) = manager_with(factory.clone());
        buffers.push_frame(marked_frame(0));

        manager.start_auto(Duration::from_millis(300)).unwrap();
        manager.start_auto(Duration::from_millis(300)).unwrap();
        assert_eq!(factory.opens.load(Ordering::SeqCst), 1);

        manager.stop_all_and_wait(Duration::from_secs(5)).unwrap();
    }

    #[test]
    fn auto_session_writes_pre_roll_then_queue_in_capture_order() {
        let factory = MemoryFactory::new();
        let (mut manager, buffers) = manager_with(factory.clone());
        for mark in 0..3 {
            buffers.push_frame(marked_frame(mark));
        }

        manager.start_auto(Duration::from_millis(150)).unwrap();
        // Queued while the session is live; pre-start frames are stale by
        // definition and discarded at start.
        for mark in 3..5 {
            buffers.push_record(SessionKind::Auto, marked_frame(mark));
        }
        wait_for_done(&manager, SessionKind::Auto);

        assert_eq!(*factory.written.lock().unwrap(), vec![0, 1, 2, 3, 4]);
        // The slot is reclaimable: a fresh start succeeds and opens again.
        manager.start_auto(Duration::from_millis(50)).unwrap();
        assert_eq!(factory.opens.load(Ordering::SeqCst), 2);
        manager.stop_all_and_wait(Duration::from_secs(5)).unwrap();
    }

    #[test]
    fn new_auto_session_does_not_inherit_stale_queue_frames() {
        let factory = MemoryFactory::new();
        let (mut manager, buffers) = manager_with(factory.clone());
        buffers.push_frame(marked_frame(0));

        // First session: zero live duration, writes only its pre-roll.
        manager.start_auto(Duration::ZERO).unwrap();
        wait_for_done(&manager, SessionKind::Auto);
        // Queued after the writer's deadline, so never consumed by it.
        buffers.push_record(SessionKind::Auto, marked_frame(9));

        buffers.push_frame(marked_frame(1));
        manager.start_auto(Duration::from_millis(100)).unwrap();
        wait_for_done(&manager, SessionKind::Auto);

        // The second clip is its own pre-roll only; frame 9 belongs to the
        // previous event and must not appear after newer frames.
        assert_eq!(*factory.written.lock().unwrap(), vec![0, 0, 1]);
    }

    #[test]
    fn timed_out_stop_drains_the_abandoned_sessions_queue() {
        let (mut manager, buffers) = manager_with(Arc::new(BlockingFactory));
        buffers.push_frame(marked_frame(0));
        manager.start_auto(Duration::from_secs(30)).unwrap();
        std::thread::sleep(Duration::from_millis(50));
        buffers.push_record(SessionKind::Auto, marked_frame(5));

        let result = manager.stop_all_and_wait(Duration::from_millis(300));
        assert!(matches!(result, Err(VisionError::ShutdownTimeout(_))));
        assert_eq!(buffers.record_len(SessionKind::Auto), 0);
    }

    #[test]
    fn manual_session_drains_its_queue_before_finishing() {
        let factory = MemoryFactory::new();
        let (mut manager, buffers) = manager_with(factory.clone());
        buffers.push_frame(marked_frame(0));

        manager.start_manual().unwrap();
        for mark in 1..6 {
            buffers.push_record(SessionKind::Manual, marked_frame(mark));
        }
        manager.stop_manual();
        // Idempotent.
        manager.stop_manual();
        wait_for_done(&manager, SessionKind::Manual);

        // Nothing queued before the stop is lost.
        assert_eq!(*factory.written.lock().unwrap(), vec![0, 1, 2, 3, 4, 5]);
    }

    #[test]
    fn stop_all_against_a_wedged_writer_returns_within_budget() {
        let (mut manager, buffers) = manager_with(Arc::new(BlockingFactory));
        buffers.push_frame(marked_frame(0));
        manager.start_auto(Duration::from_secs(30)).unwrap();
        // Give the writer time to wedge inside write_frame.
        std::thread::sleep(Duration::from_millis(50));

        let budget = Duration::from_millis(500);
        let started = Instant::now();
        let result = manager.stop_all_and_wait(budget);

        assert!(matches!(result, Err(VisionError::ShutdownTimeout(_))));
        assert!(started.elapsed() < budget + Duration::from_secs(2));
        assert!(!manager.is_recording());
    }

    #[test]
    fn active_kinds_reports_live_sessions() {
        let factory = MemoryFactory::new();
        let (mut manager, buffers) = manager_with(factory);
        buffers.push_frame(marked_frame(0));
        assert!(manager.active_kinds().is_empty());

        manager.start_manual().unwrap();
        assert_eq!(manager.active_kinds(), vec![SessionKind::Manual]);
        assert!(manager.is_recording());

        manager.stop_manual();
        wait_for_done(&manager, SessionKind::Manual);
        assert!(manager.active_kinds().is_empty());
        manager.stop_all_and_wait(Duration::from_secs(1)).unwrap();
    }
}
