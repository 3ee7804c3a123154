use crate::geometry::Geometry;
use crate::readiness::ReadyPolicy;

/// Internal write cycle time (tW) of the M95 family.
pub const WRITE_CYCLE_MS: u32 = 5;

/// Static configuration of one device handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Config {
    pub geometry: Geometry,
    pub ready_policy: ReadyPolicy,
    /// Tick period while a tick-driven write is running.
    pub write_cycle_ms: u32,
    /// Tick period while a read settles.
    pub read_cycle_ms: u32,
}

impl Config {
    pub const fn new(geometry: Geometry) -> Self {
        Self {
            geometry,
            ready_policy: ReadyPolicy::Attempts {
                max_attempts: 50,
                backoff_us: 200,
            },
            write_cycle_ms: WRITE_CYCLE_MS,
            read_cycle_ms: WRITE_CYCLE_MS,
        }
    }

    pub const fn with_ready_policy(mut self, ready_policy: ReadyPolicy) -> Self {
        self.ready_policy = ready_policy;
        self
    }

    pub const fn with_write_cycle_ms(mut self, write_cycle_ms: u32) -> Self {
        self.write_cycle_ms = write_cycle_ms;
        self
    }

    pub const fn with_read_cycle_ms(mut self, read_cycle_ms: u32) -> Self {
        self.read_cycle_ms = read_cycle_ms;
        self
    }
}

impl Default for Config {
    fn default() -> Self {
        Config::new(Geometry::M95M04)
    }
}
