//! A `no_std` driver for the ST M95 family of SPI EEPROMs (M95M04, M95M01),
//! built on [`embedded-hal`](https://crates.io/crates/embedded-hal) 1.0.
//!
//! Writes of any length and alignment are cut into page-bounded chunks, and
//! each chunk is only sent once the device has finished the write cycle of
//! the previous one. Three ways of driving that engine are provided:
//!
//! - [`EepromSpi::write`]: blocking, polls the status register between chunks;
//! - [`EepromSpi::write_begin`] + [`EepromSpi::tick`]: non-blocking, one chunk
//!   per call of `tick` from a periodic timer interrupt;
//! - [`AsyncEepromSpi::write`]: `async`, awaits the back-off between polls.
//!
//! How long a busy device is polled is set by [`ReadyPolicy`]: a number of
//! attempts or a time budget on the [`Timer`] clock.
//!
//! The drivers talk to an [`embedded_hal::spi::SpiDevice`], which owns the
//! chip-select line. With a HAL that only hands out a bus and a GPIO, wrap
//! them in `embedded_hal_bus::spi::ExclusiveDevice`.
//!
//! # Example
//!
//! ```ignore
//! use embedded_hal_bus::spi::{ExclusiveDevice, NoDelay};
//! use m95_eeprom::{Config, EepromSpi, Geometry};
//!
//! let spi_device = ExclusiveDevice::new(spi_bus, cs_pin, NoDelay)?;
//! let config = Config::new(Geometry::M95M04);
//! let mut eeprom = EepromSpi::init(spi_device, delay, timer, config)?;
//! eeprom.write(500, &data)?;
//! eeprom.read(500, &mut buf)?;
//! ```
//!
//! # Tick-driven writes
//!
//! The handle is shared between the foreground and the timer interrupt, so
//! keep it in an interrupt-safe cell:
//!
//! ```ignore
//! static EEPROM: Mutex<RefCell<Option<EepromSpi<'static, Spi, Delay, Tim>>>> =
//!     Mutex::new(RefCell::new(None));
//!
//! // foreground
//! critical_section::with(|cs| {
//!     let mut eeprom = EEPROM.borrow_ref_mut(cs);
//!     eeprom.as_mut().unwrap().write_begin(0x1F4, &LOG_RECORD)
//! })?;
//!
//! // timer interrupt, every write cycle
//! critical_section::with(|cs| {
//!     if let Some(eeprom) = EEPROM.borrow_ref_mut(cs).as_mut() {
//!         eeprom.tick();
//!     }
//! });
//! ```
//!
//! # Features
//!
//! - `defmt`: log through [`defmt`](https://crates.io/crates/defmt) and derive
//!   `defmt::Format` on the public types.
//! - `log`: log through [`log`](https://crates.io/crates/log).

#![cfg_attr(not(test), no_std)]

mod fmt;

mod async_comms;
mod comms;
mod config;
mod error;
mod geometry;
mod readiness;
mod session;
mod traits;

#[cfg(test)]
mod mock;

pub use async_comms::AsyncEepromSpi;
pub use comms::{BlockProtection, EepromSpi, Status};
pub use config::{Config, WRITE_CYCLE_MS};
pub use error::{Error, RangeError};
pub use geometry::{Chunk, ChunkPlan, Geometry, MAX_PAGE_WIDTH};
pub use readiness::ReadyPolicy;
pub use session::WriteStatus;
pub use traits::Timer;
