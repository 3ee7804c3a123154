/// Millisecond clock and periodic tick source used by the driver.
///
/// `now_ms` backs the [`ReadyPolicy::Deadline`](crate::ReadyPolicy::Deadline)
/// readiness policy and must be monotonic. `start`/`stop` control the periodic
/// interrupt that calls [`EepromSpi::tick`](crate::EepromSpi::tick); platforms
/// that call `tick` from a free-running timer can keep the default no-ops.
pub trait Timer {
    /// Milliseconds since an arbitrary fixed point.
    fn now_ms(&self) -> u64;

    /// Start (or re-arm) the periodic tick with the given period.
    fn start(&mut self, _period_ms: u32) {}

    /// Stop the periodic tick.
    fn stop(&mut self) {}
}

impl<T: Timer + ?Sized> Timer for &mut T {
    fn now_ms(&self) -> u64 {
        T::now_ms(self)
    }

    fn start(&mut self, period_ms: u32) {
        T::start(self, period_ms)
    }

    fn stop(&mut self) {
        T::stop(self)
    }
}
