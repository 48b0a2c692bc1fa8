//! Script runner
//!
//! Drives an `IspSession` from a step list while a consumer task drains the
//! notification queue and hands buffers back the way a camera HAL would.

use anyhow::Result;
use buffer_pool::{ArenaStats, BufferArena};
use isp_dispatch::{
    Backends, ControlCommand, DispatchOutcome, IspSession, Notification, NotificationKind, Payload,
};
use isp_protocol::{BufferPool, RawEvent};
use stats_table::StatsRegionTable;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tracing::{info, warn};

use crate::config::{ReplayConfig, Step};
use crate::engine::SimulatedEngine;

/// What the consumer saw
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ConsumerReport {
    pub frames: usize,
    pub stats: usize,
    pub messages: usize,
    pub post_process: usize,
    /// Notifications flagged as failed
    pub errors: usize,
}

/// Outcome of a replay run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReplaySummary {
    pub steps: usize,
    pub delivered: usize,
    pub dropped: usize,
    /// Payloads taken back because the consumer queue was unavailable
    pub reclaimed: usize,
    /// Steps that returned an error
    pub failed: usize,
    /// Stats buffers returned to the engine
    pub stats_returned: usize,
    pub consumer: ConsumerReport,
    pub pool: ArenaStats,
}

/// Replay the configured script and wait for the consumer to drain
pub async fn run(config: &ReplayConfig) -> Result<ReplaySummary> {
    let arena = Arc::new(config.build_arena()?);
    let table = StatsRegionTable::with_regions(config.stats_regions.iter().copied())?;
    let engine = Arc::new(SimulatedEngine::new());

    let backends = Backends {
        pool: arena.clone(),
        hardware: engine.clone(),
        stats: Arc::new(table),
        stats_control: engine.clone(),
    };
    let (session, rx) = IspSession::new(config.session.clone(), backends);
    let session = Arc::new(session);

    let (shutdown_tx, shutdown_rx) = oneshot::channel();
    let consumer = tokio::spawn(consume(rx, arena.clone(), session.clone(), shutdown_rx));

    let mut summary = ReplaySummary {
        steps: config.steps.len(),
        delivered: 0,
        dropped: 0,
        reclaimed: 0,
        failed: 0,
        stats_returned: 0,
        consumer: ConsumerReport::default(),
        pool: ArenaStats::default(),
    };

    for (i, step) in config.steps.iter().enumerate() {
        match run_step(&session, &engine, step) {
            Ok(Some(DispatchOutcome::Delivered)) => summary.delivered += 1,
            Ok(Some(DispatchOutcome::Dropped)) => summary.dropped += 1,
            Ok(Some(DispatchOutcome::Reclaimed)) => summary.reclaimed += 1,
            Ok(_) => {}
            Err(e) => {
                warn!(step = i, "Step failed: {}", e);
                summary.failed += 1;
            }
        }
        // Let the consumer keep pace with the engine
        tokio::task::yield_now().await;
    }

    let _ = shutdown_tx.send(());
    summary.consumer = consumer.await?;
    summary.pool = arena.stats();
    summary.stats_returned = engine.stats_released().len();
    Ok(summary)
}

fn run_step(
    session: &IspSession,
    engine: &SimulatedEngine,
    step: &Step,
) -> Result<Option<DispatchOutcome>> {
    let event = match step {
        Step::Buffer { event, output } => RawEvent::Buffer {
            event_type: event.code(),
            output_id: output.as_raw(),
        },
        Step::Complete { output, frame } => match engine.retire(*output) {
            Some(buffer) => RawEvent::Output {
                output_id: output.as_raw(),
                frame_counter: *frame,
                buffer,
            },
            None => {
                warn!(?output, frame, "No buffer programmed; skipping completion");
                return Ok(None);
            }
        },
        Step::Stats {
            stat_type,
            frame,
            phys_addr,
        } => RawEvent::Stats {
            stats_id: stat_type.msg_id(),
            frame_counter: *frame,
            phys_addr: *phys_addr,
        },
        Step::Message { msg_id, frame } => RawEvent::Message {
            msg_id: *msg_id,
            sof_count: *frame,
        },
        Step::Control { command } => {
            session.apply(command.clone())?;
            return Ok(None);
        }
    };

    Ok(Some(session.dispatch(event)?))
}

async fn consume(
    mut rx: mpsc::Receiver<Notification>,
    arena: Arc<BufferArena>,
    session: Arc<IspSession>,
    mut shutdown: oneshot::Receiver<()>,
) -> ConsumerReport {
    let mut report = ConsumerReport::default();
    loop {
        tokio::select! {
            Some(notification) = rx.recv() => {
                handle(&notification, &arena, &session, &mut report);
            }
            _ = &mut shutdown => {
                while let Ok(notification) = rx.try_recv() {
                    handle(&notification, &arena, &session, &mut report);
                }
                break;
            }
        }
    }
    info!(?report, "Consumer finished");
    report
}

fn handle(
    notification: &Notification,
    arena: &BufferArena,
    session: &IspSession,
    report: &mut ConsumerReport,
) {
    if notification.error {
        report.errors += 1;
    }

    match notification.kind {
        NotificationKind::FrameDone => report.frames += 1,
        NotificationKind::Stats => report.stats += 1,
        NotificationKind::Message => report.messages += 1,
        NotificationKind::PostProcess => report.post_process += 1,
    }

    match notification.payload {
        Payload::Frame(buffer) => {
            info!(
                mode = ?notification.mode,
                frame_id = notification.frame_id,
                index = buffer.handle.index(),
                "Frame received"
            );
            if let Err(e) = arena.release(&buffer) {
                warn!("Could not return frame buffer: {}", e);
            }
        }
        Payload::Stats(stats) => {
            info!(
                stat_type = ?stats.stat_type,
                frame_id = notification.frame_id,
                vaddr = stats.vaddr,
                "Stats received"
            );
            let command = ControlCommand::ReleaseStatsBuffer {
                stat_type: stats.stat_type,
                vaddr: stats.vaddr,
                fd: stats.fd,
            };
            if let Err(e) = session.apply(command) {
                warn!("Could not return stats buffer: {}", e);
            }
        }
        Payload::PostProcess(_) | Payload::None => {
            info!(
                kind = ?notification.kind,
                msg_id = notification.msg_id,
                frame_id = notification.frame_id,
                "Notification received"
            );
        }
    }
}
