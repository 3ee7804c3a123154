//! Bounded waiting on the status register's write-in-progress bit.

use crate::error::Error;
use embedded_hal::spi::ErrorType;

/// How long to keep polling a busy device before giving up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ReadyPolicy {
    /// Give up after `max_attempts` status reads that all report busy.
    /// Exhaustion is reported as [`Error::DeviceNotReady`](crate::Error::DeviceNotReady).
    Attempts { max_attempts: u32, backoff_us: u32 },
    /// Give up once `budget_ms` have elapsed on the [`Timer`](crate::Timer)
    /// clock. Exhaustion is reported as [`Error::Busy`](crate::Error::Busy).
    Deadline { budget_ms: u32, backoff_us: u32 },
}

impl Default for ReadyPolicy {
    fn default() -> Self {
        ReadyPolicy::Attempts {
            max_attempts: 50,
            backoff_us: 200,
        }
    }
}

impl ReadyPolicy {
    pub(crate) fn start(self, now_ms: u64) -> ReadyPoll {
        ReadyPoll {
            policy: self,
            attempts: 0,
            started_ms: now_ms,
        }
    }
}

/// Why a wait was abandoned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Exhausted {
    Attempts,
    Deadline,
}

impl Exhausted {
    /// Attempt exhaustion is the harder failure; a missed deadline may only
    /// need a longer budget.
    pub(crate) fn error<SPI: ErrorType>(self) -> Error<SPI> {
        match self {
            Exhausted::Attempts => Error::DeviceNotReady,
            Exhausted::Deadline => Error::Busy,
        }
    }
}

/// Book-keeping for one wait.
///
/// The caller reads the status register, and while it reports busy asks
/// [`ReadyPoll::busy`] whether to back off and poll again.
#[derive(Debug)]
pub(crate) struct ReadyPoll {
    policy: ReadyPolicy,
    attempts: u32,
    started_ms: u64,
}

impl ReadyPoll {
    /// Record one busy status read. `Ok(backoff_us)` means poll again after
    /// that delay.
    pub(crate) fn busy(&mut self, now_ms: u64) -> Result<u32, Exhausted> {
        self.attempts += 1;
        match self.policy {
            ReadyPolicy::Attempts {
                max_attempts,
                backoff_us,
            } => {
                if self.attempts >= max_attempts {
                    Err(Exhausted::Attempts)
                } else {
                    Ok(backoff_us)
                }
            }
            ReadyPolicy::Deadline {
                budget_ms,
                backoff_us,
            } => {
                if now_ms.saturating_sub(self.started_ms) >= u64::from(budget_ms) {
                    Err(Exhausted::Deadline)
                } else {
                    Ok(backoff_us)
                }
            }
        }
    }

    pub(crate) fn attempts(&self) -> u32 {
        self.attempts
    }
}
