//! Ping/pong buffer reservation
//!
//! Reservations only describe which buffer goes into which engine register;
//! the dispatcher applies them.

use isp_protocol::{
    BindingTarget, BufferBinding, BufferPool, FreeBuffer, IspError, LogicalCaptureMode, OutputId,
};
use std::sync::Arc;
use tracing::{debug, warn};

/// Buffer bindings produced for one engine event (at most two)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Reservation {
    bindings: [Option<BufferBinding>; 2],
}

impl Reservation {
    fn pair(output: OutputId, ping: FreeBuffer, pong: FreeBuffer) -> Self {
        Self {
            bindings: [
                Some(BufferBinding {
                    target: BindingTarget::Ping,
                    output,
                    buffer: ping,
                }),
                Some(BufferBinding {
                    target: BindingTarget::Pong,
                    output,
                    buffer: pong,
                }),
            ],
        }
    }

    fn single(output: OutputId, buffer: FreeBuffer) -> Self {
        Self {
            bindings: [
                Some(BufferBinding {
                    target: BindingTarget::FreeBufferAddress,
                    output,
                    buffer,
                }),
                None,
            ],
        }
    }

    /// Bindings in the order they must be programmed
    pub fn bindings(&self) -> impl Iterator<Item = &BufferBinding> {
        self.bindings.iter().flatten()
    }

    /// Buffer bound to `target`, if any
    #[cfg(test)]
    pub fn buffer_for(&self, target: BindingTarget) -> Option<FreeBuffer> {
        self.bindings()
            .find(|b| b.target == target)
            .map(|b| b.buffer)
    }

    /// Whether ping and pong share one buffer
    #[cfg(test)]
    pub fn is_aliased(&self) -> bool {
        match (&self.bindings[0], &self.bindings[1]) {
            (Some(a), Some(b)) => a.buffer.handle == b.buffer.handle,
            _ => false,
        }
    }
}

/// Reserves engine buffers from the shared pool
#[derive(Clone)]
pub struct ReservationManager {
    pool: Arc<dyn BufferPool>,
}

impl ReservationManager {
    /// Create a manager drawing from `pool`
    pub fn new(pool: Arc<dyn BufferPool>) -> Self {
        Self { pool }
    }

    /// Two independent buffers for ping and pong (streaming start)
    ///
    /// If the second reservation fails the first buffer goes back to the
    /// pool, so a failed start leaves nothing behind.
    pub fn reserve_pair(
        &self,
        mode: LogicalCaptureMode,
        output: OutputId,
    ) -> Result<Reservation, IspError> {
        let ping = self.pool.reserve(mode)?;
        let pong = match self.pool.reserve(mode) {
            Ok(pong) => pong,
            Err(e) => {
                if let Err(release) = self.pool.release(&ping) {
                    warn!("Could not return ping buffer: {}", release);
                }
                return Err(e);
            }
        };
        debug!(
            ?output,
            ?mode,
            ping = ping.handle.index(),
            pong = pong.handle.index(),
            "Reserved ping/pong pair"
        );
        Ok(Reservation::pair(output, ping, pong))
    }

    /// Ping and pong for a one-shot capture; pong reuses ping when the pool runs dry
    pub fn reserve_pair_or_alias(
        &self,
        mode: LogicalCaptureMode,
        output: OutputId,
    ) -> Result<Reservation, IspError> {
        let ping = self.pool.reserve(mode)?;
        let pong = match self.pool.reserve(mode) {
            Ok(pong) => pong,
            Err(_) => {
                warn!(
                    ?output,
                    ?mode,
                    index = ping.handle.index(),
                    "Capture: using the same buffer for both ping and pong"
                );
                ping
            }
        };
        Ok(Reservation::pair(output, ping, pong))
    }

    /// One buffer for the engine's free-buffer register
    pub fn reserve_single(
        &self,
        mode: LogicalCaptureMode,
        output: OutputId,
    ) -> Result<Reservation, IspError> {
        let buffer = self.pool.reserve(mode)?;
        debug!(?output, ?mode, index = buffer.handle.index(), "Reserved free buffer");
        Ok(Reservation::single(output, buffer))
    }
}
