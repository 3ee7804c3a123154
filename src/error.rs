use core::fmt::{self, Debug, Display};
use embedded_hal::spi::ErrorType;

/// The error type used by this library.
///
/// This encapsulates the bus error of the underlying SPI device and adds the
/// protocol and usage errors of the EEPROM engine on top of that.
pub enum Error<SPI: ErrorType> {
    /// An SPI transfer failed. The operation in flight is abandoned.
    Spi(SPI::Error),
    /// The device still reported a write in progress after the configured
    /// number of status polls.
    DeviceNotReady,
    /// The device did not become ready within the configured time budget, or
    /// the handle is occupied by a write that has not completed yet.
    Busy,
    /// Address out of range, zero length or similar caller error.
    InvalidArgument,
    /// A single program command was asked to cover more than one page.
    StorageOverflow,
}

impl<SPI: ErrorType> From<RangeError> for Error<SPI> {
    fn from(_: RangeError) -> Self {
        Error::InvalidArgument
    }
}

#[cfg(feature = "defmt")]
impl<SPI: ErrorType> defmt::Format for Error<SPI> {
    fn format(&self, fmt: defmt::Formatter) {
        match self {
            Error::Spi(_spi) => defmt::write!(fmt, "Error::Spi"),
            Error::DeviceNotReady => defmt::write!(fmt, "Error::DeviceNotReady"),
            Error::Busy => defmt::write!(fmt, "Error::Busy"),
            Error::InvalidArgument => defmt::write!(fmt, "Error::InvalidArgument"),
            Error::StorageOverflow => defmt::write!(fmt, "Error::StorageOverflow"),
        }
    }
}

impl<SPI: ErrorType> Debug for Error<SPI> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Spi(spi) => write!(f, "Error::Spi({:?})", spi),
            Error::DeviceNotReady => write!(f, "Error::DeviceNotReady"),
            Error::Busy => write!(f, "Error::Busy"),
            Error::InvalidArgument => write!(f, "Error::InvalidArgument"),
            Error::StorageOverflow => write!(f, "Error::StorageOverflow"),
        }
    }
}

impl<SPI: ErrorType> Display for Error<SPI> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Spi(spi) => write!(f, "SPI transfer failed: {:?}", spi),
            Error::DeviceNotReady => f.write_str("device stayed busy for every status poll"),
            Error::Busy => f.write_str("device or handle busy"),
            Error::InvalidArgument => f.write_str("invalid address or length"),
            Error::StorageOverflow => f.write_str("write exceeds page width"),
        }
    }
}

/// A requested range does not fit the device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum RangeError {
    /// Nothing to transfer.
    ZeroLength,
    /// The range starts or ends past the end of the device.
    OutOfBounds,
}
