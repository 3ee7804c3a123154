//! Resumable progress of a multi-page write driven by timer ticks.

use crate::geometry::{Chunk, ChunkPlan};

/// Cursor of a write started with [`EepromSpi::write_begin`](crate::EepromSpi::write_begin).
///
/// The data slice is borrowed for the whole session, so the caller cannot
/// change or drop it until the device handle lets go of it.
#[derive(Debug)]
pub(crate) struct WriteSession<'d> {
    plan: ChunkPlan,
    data: &'d [u8],
    written: u32,
}

impl<'d> WriteSession<'d> {
    pub(crate) fn new(plan: ChunkPlan, data: &'d [u8]) -> Self {
        Self {
            plan,
            data,
            written: 0,
        }
    }

    /// Next chunk and its bytes, without moving the cursor.
    pub(crate) fn peek(&self) -> Option<(Chunk, &'d [u8])> {
        let mut plan = self.plan;
        let chunk = plan.next()?;
        Some((chunk, &self.data[..chunk.len()]))
    }

    /// Move the cursor past a chunk that has been dispatched.
    pub(crate) fn advance(&mut self, chunk: Chunk) {
        self.plan.next();
        self.data = &self.data[chunk.len()..];
        self.written += u32::from(chunk.length);
    }

    pub(crate) fn remaining(&self) -> u32 {
        self.plan.remaining()
    }

    pub(crate) fn written(&self) -> u32 {
        self.written
    }

    pub(crate) fn is_finished(&self) -> bool {
        self.plan.is_finished()
    }
}

/// What the handle is doing between ticks.
#[derive(Debug)]
pub(crate) enum Phase<'d> {
    Idle,
    /// A chunk is on its way; more are left in the session.
    WriteChunkPending(WriteSession<'d>),
    /// The last chunk went out; waiting one tick for its write cycle.
    WriteSettling { written: u32 },
    /// A read finished on the bus; waiting one tick for the read window.
    ReadSettling,
}

/// Progress of the tick-driven write, as seen from the foreground.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum WriteStatus {
    /// No tick-driven write is running and none has failed.
    Idle,
    /// Chunks are still being dispatched.
    InProgress { written: u32, remaining: u32 },
    /// All chunks were sent; the device's last write cycle has not elapsed.
    Settling { written: u32 },
    /// The session stopped at a chunk error. `written` bytes made it to the
    /// device. Collect the error with
    /// [`EepromSpi::take_write_error`](crate::EepromSpi::take_write_error).
    Failed { written: u32 },
}
