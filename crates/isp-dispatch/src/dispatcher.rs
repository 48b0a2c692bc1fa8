//! Engine Event Dispatcher
//!
//! Entry point of the engine's notification callback. Each call handles one
//! event end to end and returns without waiting on anything: pool
//! exhaustion, hardware refusals and a busy consumer are all reported, never
//! retried in place.

use drop_policy::DropPolicy;
use isp_protocol::{
    msg_id, resolve, BufferHandle, BufferPool, EventEnvelope, FreeBuffer, HardwareConfig,
    IspError, LogicalCaptureMode, OutputId, PostProcessFrame, RawEvent, StatType, StatsBuffer,
    StatsControl, StatsLookup, TopologyCell,
};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

use crate::notify::{Notification, NotificationKind, NotificationSender, Payload};
use crate::reservation::{Reservation, ReservationManager};

/// What a successful dispatch did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// Engine registers programmed
    Configured { bindings: usize },
    /// Frame handed to the consumer and a replacement installed
    Delivered,
    /// Frame discarded by the drop policy
    Dropped,
    /// Consumer queue unavailable; the payload went back to its owner
    Reclaimed,
    /// Notification forwarded without buffer handling
    Forwarded,
}

/// Routes engine events to the resolver, the pool, the drop policy and the consumer
pub struct Dispatcher {
    pool: Arc<dyn BufferPool>,
    hardware: Arc<dyn HardwareConfig>,
    stats: Arc<dyn StatsLookup>,
    stats_control: Arc<dyn StatsControl>,
    topology: Arc<TopologyCell>,
    policy: Arc<DropPolicy>,
    reservations: ReservationManager,
    notifier: NotificationSender,
}

impl Dispatcher {
    /// Create a dispatcher over its collaborators
    pub fn new(
        pool: Arc<dyn BufferPool>,
        hardware: Arc<dyn HardwareConfig>,
        stats: Arc<dyn StatsLookup>,
        stats_control: Arc<dyn StatsControl>,
        topology: Arc<TopologyCell>,
        policy: Arc<DropPolicy>,
        notifier: NotificationSender,
    ) -> Self {
        Self {
            reservations: ReservationManager::new(pool.clone()),
            pool,
            hardware,
            stats,
            stats_control,
            topology,
            policy,
            notifier,
        }
    }

    /// Handle one engine event
    pub fn dispatch(&self, raw: RawEvent) -> Result<DispatchOutcome, IspError> {
        let retired = raw.retired_buffer().copied();
        let envelope = match EventEnvelope::classify(raw) {
            Ok(envelope) => envelope,
            Err(e) => {
                error!("Discarding engine event: {}", e);
                // The engine already let go of this buffer
                if let Some(buffer) = retired {
                    self.reclaim(&buffer);
                }
                return Err(e);
            }
        };

        debug!(event = envelope.name(), "Dispatching engine event");

        match envelope {
            EventEnvelope::Start { output } | EventEnvelope::StartRecording { output } => {
                info!(?output, "Start: getting ping and pong buffers");
                let mode = self.capture_mode(output)?;
                let reservation = self
                    .reservations
                    .reserve_pair(mode, output)
                    .map_err(|e| failed("start", e))?;
                self.apply(&reservation)
            }
            EventEnvelope::Capture { output } => {
                info!(?output, "Capture: getting ping and pong buffers");
                let mode = self.capture_mode(output)?;
                let reservation = self
                    .reservations
                    .reserve_pair_or_alias(mode, output)
                    .map_err(|e| failed("capture", e))?;
                self.apply(&reservation)
            }
            EventEnvelope::OutputIrq { output } => {
                debug!(?output, "Output IRQ: getting free buffer");
                let mode = self.capture_mode(output)?;
                self.install_replacement(mode, output)
            }
            EventEnvelope::OutputReady {
                output,
                frame_id,
                buffer,
            } => self.on_output(output, frame_id, buffer),
            EventEnvelope::StatsReady {
                stat_type,
                msg_id,
                frame_id,
                phys_addr,
            } => self.on_stats(stat_type, msg_id, frame_id, phys_addr),
            EventEnvelope::GenericMessage { msg_id, frame_id } => self.on_message(msg_id, frame_id),
            EventEnvelope::PostProcess(frame) => self.on_post_process(frame),
        }
    }

    fn capture_mode(&self, output: OutputId) -> Result<LogicalCaptureMode, IspError> {
        let topology = self.topology.load();
        output
            .slot()
            .and_then(|slot| resolve(slot, topology))
            .ok_or_else(|| failed("resolve", IspError::UnresolvedMode { output, topology }))
    }

    fn on_output(
        &self,
        output: OutputId,
        frame_id: u32,
        buffer: FreeBuffer,
    ) -> Result<DispatchOutcome, IspError> {
        let mode = self.capture_mode(output)?;

        if self.policy.decide(output).is_drop() {
            // Dropped frames skip the consumer and go straight back to the free list
            self.pool.release(&buffer).map_err(|e| failed("drop", e))?;
            debug!(?output, frame_id, index = buffer.handle.index(), "Dropped frame");
            return Ok(DispatchOutcome::Dropped);
        }

        // Delivery and replacement are independent: a frame that made it out
        // is delivered even when no buffer can take its place.
        let delivered = self.deliver_frame(output, frame_id, mode, buffer)?;
        self.install_replacement(mode, output)?;
        Ok(if delivered {
            DispatchOutcome::Delivered
        } else {
            DispatchOutcome::Reclaimed
        })
    }

    fn deliver_frame(
        &self,
        output: OutputId,
        frame_id: u32,
        mode: LogicalCaptureMode,
        buffer: FreeBuffer,
    ) -> Result<bool, IspError> {
        self.pool.hand_off(&buffer).map_err(|e| failed("deliver", e))?;

        let notification = Notification {
            kind: NotificationKind::FrameDone,
            msg_id: output.as_raw(),
            frame_id,
            mode: Some(mode),
            payload: Payload::Frame(buffer),
            error: false,
        };
        if self.notifier.send(notification).is_err() {
            // Nobody will ever return it; take it back now
            self.reclaim(&buffer);
            return Ok(false);
        }
        Ok(true)
    }

    fn install_replacement(
        &self,
        mode: LogicalCaptureMode,
        output: OutputId,
    ) -> Result<DispatchOutcome, IspError> {
        let reservation = self
            .reservations
            .reserve_single(mode, output)
            .map_err(|e| failed("replacement", e))?;
        self.apply(&reservation)
    }

    /// Program every binding of a reservation into the engine
    fn apply(&self, reservation: &Reservation) -> Result<DispatchOutcome, IspError> {
        let mut applied = 0;
        for binding in reservation.bindings() {
            if let Err(e) = self.hardware.configure(binding) {
                self.unwind(reservation, applied);
                return Err(failed(binding.target.command(), e));
            }
            debug!(
                target = binding.target.command(),
                output = ?binding.output,
                index = binding.buffer.handle.index(),
                phys_addr = binding.buffer.desc.phys_addr,
                "Configured buffer address"
            );
            applied += 1;
        }
        Ok(DispatchOutcome::Configured { bindings: applied })
    }

    /// Return buffers of bindings the engine never accepted
    fn unwind(&self, reservation: &Reservation, applied: usize) {
        let programmed: Vec<BufferHandle> = reservation
            .bindings()
            .take(applied)
            .map(|b| b.buffer.handle)
            .collect();
        let mut returned: Option<BufferHandle> = None;
        for binding in reservation.bindings().skip(applied) {
            let handle = binding.buffer.handle;
            if programmed.contains(&handle) || returned == Some(handle) {
                continue;
            }
            self.reclaim(&binding.buffer);
            returned = Some(handle);
        }
    }

    fn on_stats(
        &self,
        stat_type: StatType,
        msg_id: u32,
        frame_id: u32,
        phys_addr: u64,
    ) -> Result<DispatchOutcome, IspError> {
        match self.stats.translate(phys_addr) {
            Some(stats) => self.deliver_stats(msg_id, frame_id, phys_addr, stats),
            None => {
                let e = failed("stats", IspError::TranslationNotFound(phys_addr));
                warn!(?stat_type, frame_id, "Reporting stats event without payload");
                let report = Notification {
                    kind: NotificationKind::Stats,
                    msg_id,
                    frame_id,
                    mode: None,
                    payload: Payload::None,
                    error: true,
                };
                if self.notifier.send(report).is_err() {
                    error!(?stat_type, frame_id, phys_addr, "Stats failure report lost");
                }
                Err(e)
            }
        }
    }

    fn deliver_stats(
        &self,
        msg_id: u32,
        frame_id: u32,
        phys_addr: u64,
        stats: StatsBuffer,
    ) -> Result<DispatchOutcome, IspError> {
        let notification = Notification {
            kind: NotificationKind::Stats,
            msg_id,
            frame_id,
            mode: None,
            payload: Payload::Stats(stats),
            error: false,
        };
        if self.notifier.send(notification).is_ok() {
            return Ok(DispatchOutcome::Forwarded);
        }

        // The consumer will never release it; hand it straight back to the engine
        self.stats_control
            .release_stats_buffer(stats.stat_type, phys_addr)
            .map_err(|e| failed("stats release", e))?;
        debug!(stat_type = ?stats.stat_type, phys_addr, "Returned undelivered stats buffer");
        Ok(DispatchOutcome::Reclaimed)
    }

    fn on_message(&self, msg_id: u32, frame_id: u32) -> Result<DispatchOutcome, IspError> {
        let msg_id = if msg_id == msg_id::SOF_ACK && self.policy.armed_without_pending() {
            info!(frame_id, "Start-of-frame acknowledge under drop policy");
            msg_id::HDR_SOF_ACK
        } else {
            msg_id
        };

        self.forward(Notification {
            kind: NotificationKind::Message,
            msg_id,
            frame_id,
            mode: None,
            payload: Payload::None,
            error: false,
        });
        Ok(DispatchOutcome::Forwarded)
    }

    fn on_post_process(&self, frame: PostProcessFrame) -> Result<DispatchOutcome, IspError> {
        self.forward(Notification {
            kind: NotificationKind::PostProcess,
            msg_id: 0,
            frame_id: frame.frame_id,
            mode: Some(frame.mode),
            payload: Payload::PostProcess(frame),
            error: frame.status != 0,
        });
        Ok(DispatchOutcome::Forwarded)
    }

    fn forward(&self, notification: Notification) {
        // Message and post-process notifications own no buffer; the sender
        // has already logged the loss
        let _ = self.notifier.send(notification);
    }

    fn reclaim(&self, buffer: &FreeBuffer) {
        if let Err(e) = self.pool.release(buffer) {
            warn!("Could not return buffer to pool: {}", e);
        }
    }
}

fn failed(stage: &'static str, e: IspError) -> IspError {
    error!(stage, "{}", e);
    e
}

#[cfg(test)]
mod tests {
    use super::*;
    use buffer_pool::{BufferArena, PoolLayout, SlotOwner};
    use isp_protocol::{buf_evt, output_id, BindingTarget, BufferBinding, OutputTopology, StatsRegion};
    use parking_lot::Mutex;
    use proptest::prelude::*;
    use stats_table::StatsRegionTable;
    use tokio::sync::mpsc;

    /// Engine double that records every binding
    #[derive(Default)]
    struct RecordingEngine {
        bindings: Mutex<Vec<BufferBinding>>,
        reject: Mutex<Option<BindingTarget>>,
        stats_released: Mutex<Vec<(StatType, u64)>>,
    }

    impl RecordingEngine {
        fn targets(&self) -> Vec<(BindingTarget, u16)> {
            self.bindings
                .lock()
                .iter()
                .map(|b| (b.target, b.buffer.handle.index()))
                .collect()
        }
    }

    impl HardwareConfig for RecordingEngine {
        fn configure(&self, binding: &BufferBinding) -> Result<(), IspError> {
            if *self.reject.lock() == Some(binding.target) {
                return Err(IspError::HardwareConfigureFailed {
                    command: binding.target.command(),
                    code: -5,
                });
            }
            self.bindings.lock().push(*binding);
            Ok(())
        }
    }

    impl StatsControl for RecordingEngine {
        fn release_stats_buffer(&self, stat_type: StatType, phys_addr: u64) -> Result<(), IspError> {
            self.stats_released.lock().push((stat_type, phys_addr));
            Ok(())
        }

        fn enable_stats(&self, _stat_type: StatType, _regions: &[StatsRegion]) -> Result<(), IspError> {
            Ok(())
        }

        fn disable_stats(&self, _stat_type: StatType) -> Result<(), IspError> {
            Ok(())
        }
    }

    struct Fixture {
        dispatcher: Dispatcher,
        arena: Arc<BufferArena>,
        engine: Arc<RecordingEngine>,
        topology: Arc<TopologyCell>,
        policy: Arc<DropPolicy>,
        rx: mpsc::Receiver<Notification>,
    }

    fn fixture(topology: OutputTopology, per_mode: usize, depth: usize) -> Fixture {
        let mut buffers = Vec::new();
        for (i, mode) in LogicalCaptureMode::ALL.iter().enumerate() {
            buffers.extend(
                PoolLayout {
                    mode: *mode,
                    count: per_mode,
                    frame_len: 0x1000,
                }
                .descriptors(0x1000_0000 * (i as u64 + 1), 10 * i as i32)
                .unwrap(),
            );
        }
        let arena = Arc::new(BufferArena::new(buffers).unwrap());
        let engine = Arc::new(RecordingEngine::default());
        let stats = Arc::new(
            StatsRegionTable::with_regions([StatsRegion {
                stat_type: StatType::Aec,
                phys_addr: 0x9000,
                vaddr: 0x100,
                fd: 40,
                len: 256,
                active: true,
            }])
            .unwrap(),
        );
        let topology = Arc::new(TopologyCell::new(topology));
        let policy = Arc::new(DropPolicy::new());
        let (notifier, rx) = NotificationSender::channel(depth);
        let dispatcher = Dispatcher::new(
            arena.clone(),
            engine.clone(),
            stats,
            engine.clone(),
            topology.clone(),
            policy.clone(),
            notifier,
        );
        Fixture {
            dispatcher,
            arena,
            engine,
            topology,
            policy,
            rx,
        }
    }

    fn buffer_event(event_type: u32, output: u32) -> RawEvent {
        RawEvent::Buffer {
            event_type,
            output_id: output,
        }
    }

    fn output_event(output: u32, frame_counter: u32, buffer: FreeBuffer) -> RawEvent {
        RawEvent::Output {
            output_id: output,
            frame_counter,
            buffer,
        }
    }

    fn bound(f: &Fixture, index: usize) -> FreeBuffer {
        f.engine.bindings.lock()[index].buffer
    }

    #[tokio::test]
    async fn test_start_then_deliver_main_and_preview() {
        let mut f = fixture(OutputTopology::MainAndPreview, 3, 8);

        let outcome = f
            .dispatcher
            .dispatch(buffer_event(buf_evt::START, output_id::PRIMARY))
            .unwrap();
        assert_eq!(outcome, DispatchOutcome::Configured { bindings: 2 });
        assert_eq!(
            f.engine.targets(),
            vec![(BindingTarget::Ping, 0), (BindingTarget::Pong, 1)]
        );

        let a = bound(&f, 0);
        let outcome = f
            .dispatcher
            .dispatch(output_event(output_id::PRIMARY, 1, a))
            .unwrap();
        assert_eq!(outcome, DispatchOutcome::Delivered);
        assert_eq!(f.engine.targets()[2], (BindingTarget::FreeBufferAddress, 2));

        let n = f.rx.recv().await.unwrap();
        assert_eq!(n.kind, NotificationKind::FrameDone);
        assert_eq!(n.mode, Some(LogicalCaptureMode::Main));
        assert_eq!(n.frame_id, 1);
        assert_eq!(n.frame(), Some(&a));
        assert!(!n.error);
        assert_eq!(f.arena.owner(a.handle), Some(SlotOwner::Consumer));
    }

    #[tokio::test]
    async fn test_start_recording_reserves_pair() {
        let f = fixture(OutputTopology::VideoAndPreview, 2, 8);

        f.dispatcher
            .dispatch(buffer_event(buf_evt::START_RECORDING, output_id::SECONDARY))
            .unwrap();
        let modes: Vec<_> = f
            .engine
            .bindings
            .lock()
            .iter()
            .map(|b| b.buffer.mode)
            .collect();
        assert_eq!(modes, vec![LogicalCaptureMode::Preview; 2]);
    }

    #[tokio::test]
    async fn test_start_with_one_buffer_configures_nothing() {
        let f = fixture(OutputTopology::MainAndPreview, 1, 8);

        let err = f
            .dispatcher
            .dispatch(buffer_event(buf_evt::START, output_id::PRIMARY))
            .unwrap_err();
        assert_eq!(err, IspError::PoolExhausted(LogicalCaptureMode::Main));
        assert!(f.engine.targets().is_empty());
        assert_eq!(f.arena.available(LogicalCaptureMode::Main), 1);
    }

    #[tokio::test]
    async fn test_capture_falls_back_to_single_buffer() {
        let f = fixture(OutputTopology::MainAndThumb, 1, 8);

        let outcome = f
            .dispatcher
            .dispatch(buffer_event(buf_evt::CAPTURE, output_id::PRIMARY))
            .unwrap();
        assert_eq!(outcome, DispatchOutcome::Configured { bindings: 2 });
        assert_eq!(
            f.engine.targets(),
            vec![(BindingTarget::Ping, 0), (BindingTarget::Pong, 0)]
        );
        assert_eq!(bound(&f, 0), bound(&f, 1));
        assert_eq!(f.arena.stats().exhausted, 1);
    }

    #[tokio::test]
    async fn test_drop_zero_count_accepts_then_drops() {
        let mut f = fixture(OutputTopology::MainAndPreview, 4, 8);
        f.policy.set_drop_enabled(true);
        f.policy.set_drop_count(0);
        f.dispatcher
            .dispatch(buffer_event(buf_evt::START, output_id::PRIMARY))
            .unwrap();

        let first = bound(&f, 0);
        assert_eq!(
            f.dispatcher
                .dispatch(output_event(output_id::PRIMARY, 1, first))
                .unwrap(),
            DispatchOutcome::Delivered
        );
        assert_eq!(f.policy.snapshot().remaining, -1);
        assert_eq!(f.rx.recv().await.unwrap().frame_id, 1);

        let second = bound(&f, 1);
        assert_eq!(
            f.dispatcher
                .dispatch(output_event(output_id::PRIMARY, 2, second))
                .unwrap(),
            DispatchOutcome::Dropped
        );
        assert_eq!(f.arena.owner(second.handle), Some(SlotOwner::Free));
        assert!(f.rx.try_recv().is_err());
        // Drop path reserves nothing
        assert_eq!(f.engine.targets().len(), 3);
    }

    #[tokio::test]
    async fn test_secondary_dropped_with_primary() {
        let mut f = fixture(OutputTopology::MainAndThumb, 4, 8);
        f.policy.set_drop_enabled(true);
        f.policy.set_drop_count(1);
        f.dispatcher
            .dispatch(buffer_event(buf_evt::START, output_id::PRIMARY))
            .unwrap();
        f.dispatcher
            .dispatch(buffer_event(buf_evt::START, output_id::SECONDARY))
            .unwrap();

        let main = bound(&f, 0);
        let thumb = bound(&f, 2);
        assert_eq!(
            f.dispatcher.dispatch(output_event(output_id::PRIMARY, 1, main)).unwrap(),
            DispatchOutcome::Dropped
        );
        // Reconfiguring between the pair does not split it
        f.policy.set_drop_count(0);
        assert_eq!(
            f.dispatcher.dispatch(output_event(output_id::SECONDARY, 1, thumb)).unwrap(),
            DispatchOutcome::Dropped
        );
        assert!(f.rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_unresolved_secondary_is_discarded() {
        let mut f = fixture(OutputTopology::Raw, 2, 8);
        let before = f.arena.owners();
        let stray = FreeBuffer {
            handle: BufferHandle::new(0),
            mode: LogicalCaptureMode::Main,
            desc: Default::default(),
        };

        let err = f
            .dispatcher
            .dispatch(output_event(output_id::SECONDARY, 3, stray))
            .unwrap_err();
        assert_eq!(
            err,
            IspError::UnresolvedMode {
                output: OutputId::Secondary,
                topology: OutputTopology::Raw,
            }
        );
        assert!(f.rx.try_recv().is_err());
        assert_eq!(f.arena.owners(), before);
        assert_eq!(f.arena.stats(), Default::default());

        // The next event is processed normally
        assert!(f
            .dispatcher
            .dispatch(buffer_event(buf_evt::START, output_id::PRIMARY))
            .is_ok());
    }

    #[tokio::test]
    async fn test_topology_change_applies_to_next_event() {
        let f = fixture(OutputTopology::MainAndPreview, 2, 8);
        f.topology.store(OutputTopology::ThumbAndMain);

        f.dispatcher
            .dispatch(buffer_event(buf_evt::OUTPUT_IRQ, output_id::PRIMARY))
            .unwrap();
        assert_eq!(bound(&f, 0).mode, LogicalCaptureMode::Thumbnail);
    }

    #[tokio::test]
    async fn test_delivery_survives_replacement_exhaustion() {
        let mut f = fixture(OutputTopology::MainAndPreview, 2, 8);
        f.dispatcher
            .dispatch(buffer_event(buf_evt::START, output_id::PRIMARY))
            .unwrap();

        let a = bound(&f, 0);
        let err = f
            .dispatcher
            .dispatch(output_event(output_id::PRIMARY, 5, a))
            .unwrap_err();
        assert_eq!(err, IspError::PoolExhausted(LogicalCaptureMode::Main));

        let n = f.rx.recv().await.unwrap();
        assert_eq!(n.frame_id, 5);
        assert_eq!(n.frame(), Some(&a));
    }

    #[tokio::test]
    async fn test_full_queue_returns_buffer_to_pool() {
        let mut f = fixture(OutputTopology::MainAndPreview, 4, 1);
        f.dispatcher
            .dispatch(RawEvent::Message { msg_id: msg_id::START_ACK, sof_count: 0 })
            .unwrap();
        f.dispatcher
            .dispatch(buffer_event(buf_evt::START, output_id::PRIMARY))
            .unwrap();

        let a = bound(&f, 0);
        assert_eq!(
            f.dispatcher
                .dispatch(output_event(output_id::PRIMARY, 1, a))
                .unwrap(),
            DispatchOutcome::Reclaimed
        );
        // Reclaimed and immediately reused as the replacement
        assert_eq!(f.arena.stats().released, 1);
        assert_eq!(f.engine.targets()[2], (BindingTarget::FreeBufferAddress, 0));
        assert!(f.arena.owners().iter().all(|o| *o != SlotOwner::Consumer));
        assert_eq!(f.rx.recv().await.unwrap().kind, NotificationKind::Message);
    }

    #[tokio::test]
    async fn test_full_queue_returns_stats_buffer_to_engine() {
        let mut f = fixture(OutputTopology::MainAndPreview, 1, 1);
        f.dispatcher
            .dispatch(RawEvent::Message { msg_id: msg_id::START_ACK, sof_count: 0 })
            .unwrap();

        let outcome = f
            .dispatcher
            .dispatch(RawEvent::Stats {
                stats_id: msg_id::STATS_AEC,
                frame_counter: 3,
                phys_addr: 0x9000,
            })
            .unwrap();
        assert_eq!(outcome, DispatchOutcome::Reclaimed);
        assert_eq!(*f.engine.stats_released.lock(), vec![(StatType::Aec, 0x9000)]);

        assert_eq!(f.rx.recv().await.unwrap().kind, NotificationKind::Message);
        assert!(f.rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_aliased_capture_pong_refused_keeps_buffer_in_engine() {
        let f = fixture(OutputTopology::MainAndThumb, 1, 8);
        *f.engine.reject.lock() = Some(BindingTarget::Pong);

        let err = f
            .dispatcher
            .dispatch(buffer_event(buf_evt::CAPTURE, output_id::PRIMARY))
            .unwrap_err();
        assert!(matches!(err, IspError::HardwareConfigureFailed { .. }));
        // Ping holds the shared buffer, so it must not go back to the pool
        assert_eq!(f.engine.targets(), vec![(BindingTarget::Ping, 0)]);
        assert_eq!(f.arena.owner(BufferHandle::new(0)), Some(SlotOwner::Hardware));
        assert_eq!(f.arena.stats().released, 0);
    }

    #[tokio::test]
    async fn test_aliased_capture_ping_refused_releases_once() {
        let f = fixture(OutputTopology::MainAndThumb, 1, 8);
        *f.engine.reject.lock() = Some(BindingTarget::Ping);

        assert!(f
            .dispatcher
            .dispatch(buffer_event(buf_evt::CAPTURE, output_id::PRIMARY))
            .is_err());
        assert_eq!(f.arena.owner(BufferHandle::new(0)), Some(SlotOwner::Free));
        assert_eq!(f.arena.stats().released, 1);
    }

    #[tokio::test]
    async fn test_hardware_failure_returns_buffers() {
        let f = fixture(OutputTopology::MainAndPreview, 3, 8);
        *f.engine.reject.lock() = Some(BindingTarget::Pong);

        let err = f
            .dispatcher
            .dispatch(buffer_event(buf_evt::START, output_id::PRIMARY))
            .unwrap_err();
        assert!(matches!(err, IspError::HardwareConfigureFailed { code: -5, .. }));
        // Ping was programmed, pong went back
        assert_eq!(f.engine.targets(), vec![(BindingTarget::Ping, 0)]);
        assert_eq!(f.arena.owner(BufferHandle::new(0)), Some(SlotOwner::Hardware));
        assert_eq!(f.arena.owner(BufferHandle::new(1)), Some(SlotOwner::Free));
    }

    #[tokio::test]
    async fn test_invalid_output_id_reclaims_buffer() {
        let f = fixture(OutputTopology::MainAndPreview, 1, 8);
        let held = f.arena.reserve(LogicalCaptureMode::Main).unwrap();

        let err = f.dispatcher.dispatch(output_event(77, 1, held)).unwrap_err();
        assert!(matches!(err, IspError::InvalidEventKind { value: 77, .. }));
        assert_eq!(f.arena.owner(held.handle), Some(SlotOwner::Free));
    }

    #[tokio::test]
    async fn test_stats_forwarded() {
        let mut f = fixture(OutputTopology::MainAndPreview, 1, 8);

        f.dispatcher
            .dispatch(RawEvent::Stats {
                stats_id: msg_id::STATS_AEC,
                frame_counter: 9,
                phys_addr: 0x9000,
            })
            .unwrap();
        let n = f.rx.recv().await.unwrap();
        assert_eq!(n.kind, NotificationKind::Stats);
        assert_eq!(n.frame_id, 9);
        assert_eq!(n.msg_id, msg_id::STATS_AEC);
        assert!(matches!(n.payload, Payload::Stats(s) if s.vaddr == 0x100 && s.fd == 40));
    }

    #[tokio::test]
    async fn test_stats_translation_failure_reported() {
        let mut f = fixture(OutputTopology::MainAndPreview, 1, 8);

        let err = f
            .dispatcher
            .dispatch(RawEvent::Stats {
                stats_id: msg_id::STATS_AEC,
                frame_counter: 2,
                phys_addr: 0xbad0,
            })
            .unwrap_err();
        assert_eq!(err, IspError::TranslationNotFound(0xbad0));

        let n = f.rx.recv().await.unwrap();
        assert!(n.error);
        assert_eq!(n.payload, Payload::None);
        assert_eq!(n.frame_id, 2);
    }

    #[tokio::test]
    async fn test_sof_ack_remapped_under_drop_policy() {
        let mut f = fixture(OutputTopology::MainAndPreview, 1, 8);
        let sof = || RawEvent::Message {
            msg_id: msg_id::SOF_ACK,
            sof_count: 4,
        };

        f.dispatcher.dispatch(sof()).unwrap();
        assert_eq!(f.rx.recv().await.unwrap().msg_id, msg_id::SOF_ACK);

        f.policy.set_drop_enabled(true);
        f.dispatcher.dispatch(sof()).unwrap();
        assert_eq!(f.rx.recv().await.unwrap().msg_id, msg_id::HDR_SOF_ACK);

        f.policy.set_drop_count(2);
        f.dispatcher.dispatch(sof()).unwrap();
        assert_eq!(f.rx.recv().await.unwrap().msg_id, msg_id::SOF_ACK);

        // Other messages pass through untouched
        f.policy.set_drop_count(0);
        f.dispatcher
            .dispatch(RawEvent::Message { msg_id: msg_id::EPOCH1, sof_count: 5 })
            .unwrap();
        assert_eq!(f.rx.recv().await.unwrap().msg_id, msg_id::EPOCH1);
    }

    #[tokio::test]
    async fn test_post_process_forwarded() {
        let mut f = fixture(OutputTopology::MainAndPreview, 1, 8);
        let frame = PostProcessFrame {
            frame_id: 11,
            mode: LogicalCaptureMode::Video,
            phys_addr: 0x5000,
            status: 0,
        };

        assert_eq!(
            f.dispatcher.dispatch(RawEvent::PostProcess(frame)).unwrap(),
            DispatchOutcome::Forwarded
        );
        let n = f.rx.recv().await.unwrap();
        assert_eq!(n.kind, NotificationKind::PostProcess);
        assert_eq!(n.payload, Payload::PostProcess(frame));
        assert!(f.engine.targets().is_empty());
    }

    #[test]
    fn test_unsupported_notification() {
        let f = fixture(OutputTopology::MainAndPreview, 1, 8);
        assert!(matches!(
            f.dispatcher.dispatch(RawEvent::Unsupported { notification: 12 }),
            Err(IspError::InvalidEventKind { field: "notification", .. })
        ));
    }

    proptest! {
        #[test]
        fn prop_buffers_never_lost(
            count in -1i32..4,
            enabled in any::<bool>(),
            frames in 1usize..12,
        ) {
            let mut f = fixture(OutputTopology::MainAndThumb, 3, 64);
            f.policy.set_drop_enabled(enabled);
            f.policy.set_drop_count(count);
            f.dispatcher.dispatch(buffer_event(buf_evt::START, output_id::PRIMARY)).unwrap();

            // The engine retires buffers in the order they were programmed
            let mut next = 0;
            for frame in 0..frames {
                let buffer = bound(&f, next);
                next += 1;
                let _ = f.dispatcher.dispatch(output_event(output_id::PRIMARY, frame as u32, buffer));
                // Consumer hands delivered buffers straight back
                while let Ok(n) = f.rx.try_recv() {
                    if let Some(buf) = n.frame() {
                        f.arena.release(buf).unwrap();
                    }
                }
                if next >= f.engine.bindings.lock().len() {
                    break;
                }
            }

            let held = f.arena.owners().iter().filter(|o| **o != SlotOwner::Free).count();
            let in_engine = f.engine.bindings.lock().len() - next;
            prop_assert_eq!(held, in_engine);
            prop_assert!(f.arena.owners().iter().all(|o| *o != SlotOwner::Consumer));
        }
    }
}
