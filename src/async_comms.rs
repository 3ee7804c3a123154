use core::fmt::Debug;

use crate::comms::{frame_header, BlockProtection, Opcode, Payload, Status, ERASED_PAGE};
use crate::config::Config;
use crate::error::Error;
use crate::geometry::{Chunk, Geometry};
use crate::traits::Timer;
use embedded_hal_async::delay::DelayNs;
use embedded_hal_async::spi::{Operation, SpiDevice};

/// Await-based M95 driver for executors such as embassy.
///
/// Same chunking, readiness and failure rules as
/// [`EepromSpi`](crate::EepromSpi), but the back-off between status polls is
/// an awaited delay, so the write engine needs no timer interrupt: the future
/// returned by [`write`](Self::write) is the session.
pub struct AsyncEepromSpi<SPI, D, T> {
    spi: SPI,
    delay: D,
    timer: T,
    config: Config,
    last_written: u32,
}

impl<SPI, D, T> Debug for AsyncEepromSpi<SPI, D, T> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("AsyncEepromSpi")
            .field("config", &self.config)
            .finish()
    }
}

impl<SPI, D, T> AsyncEepromSpi<SPI, D, T>
where
    SPI: SpiDevice,
    D: DelayNs,
    T: Timer,
{
    pub fn new(spi: SPI, delay: D, timer: T, config: Config) -> Self {
        Self {
            spi,
            delay,
            timer,
            config,
            last_written: 0,
        }
    }

    pub async fn init(spi: SPI, delay: D, timer: T, config: Config) -> Result<Self, Error<SPI>> {
        let mut this = Self::new(spi, delay, timer, config);
        this.wait_ready().await?;
        let status = this.read_status().await?;
        log_debug!("Initial status: {:#x}", status.bits());
        Ok(this)
    }

    pub fn release(self) -> (SPI, D, T) {
        (self.spi, self.delay, self.timer)
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn geometry(&self) -> &Geometry {
        &self.config.geometry
    }

    /// Reads the status register.
    pub async fn read_status(&mut self) -> Result<Status, Error<SPI>> {
        let mut response = [0u8; 1];
        self.transact(Opcode::ReadStatus, None, Payload::In(&mut response))
            .await?;
        Ok(Status::from_bits_retain(response[0]))
    }

    pub async fn is_busy(&mut self) -> Result<bool, Error<SPI>> {
        Ok(self.read_status().await?.is_busy())
    }

    /// Single status poll: `Ok` when idle, [`Error::Busy`] otherwise.
    pub async fn check_ready(&mut self) -> Result<(), Error<SPI>> {
        if self.is_busy().await? {
            Err(Error::Busy)
        } else {
            Ok(())
        }
    }

    /// Sets the Write Enable Latch; required before every mutating instruction.
    pub async fn write_enable(&mut self) -> Result<(), Error<SPI>> {
        self.transact(Opcode::WriteEnable, None, Payload::None).await
    }

    pub async fn write_disable(&mut self) -> Result<(), Error<SPI>> {
        self.transact(Opcode::WriteDisable, None, Payload::None)
            .await
    }

    pub async fn block_protection(&mut self) -> Result<BlockProtection, Error<SPI>> {
        Ok(self.read_status().await?.block_protection())
    }

    /// Reads EEPROM contents into `buf`, starting at `address`.
    pub async fn read(&mut self, address: u32, buf: &mut [u8]) -> Result<(), Error<SPI>> {
        self.config.geometry.check_range(address, buf.len())?;
        self.wait_ready().await?;
        self.transact(Opcode::Read, Some(address), Payload::In(buf))
            .await
    }

    /// Write `data` at `address`, one page-bounded chunk at a time. Stops at
    /// the first failing chunk; earlier chunks stay written.
    pub async fn write(&mut self, address: u32, data: &[u8]) -> Result<(), Error<SPI>> {
        let plan = self.config.geometry.chunks(address, data.len())?;
        self.last_written = 0;
        let mut offset = 0;
        for chunk in plan {
            self.program(chunk, &data[offset..offset + chunk.len()])
                .await?;
            offset += chunk.len();
            self.last_written = offset as u32;
        }
        Ok(())
    }

    /// Fill the whole array with `0xFF`, page by page.
    pub async fn erase_all(&mut self) -> Result<(), Error<SPI>> {
        self.last_written = 0;
        for chunk in self.config.geometry.pages() {
            self.program(chunk, &ERASED_PAGE[..chunk.len()]).await?;
            self.last_written += u32::from(chunk.length);
        }
        Ok(())
    }

    pub fn last_written(&self) -> u32 {
        self.last_written
    }

    async fn program(&mut self, chunk: Chunk, data: &[u8]) -> Result<(), Error<SPI>> {
        if data.len() > usize::from(self.config.geometry.page_width()) {
            return Err(Error::StorageOverflow);
        }
        self.wait_ready().await?;
        self.write_enable().await?;
        log_trace!("Program {} bytes at {:#x}", chunk.length, chunk.address);
        self.transact(Opcode::Write, Some(chunk.address), Payload::Out(data))
            .await
    }

    /// Wait until the status of the device is not busy, within the
    /// configured budget.
    async fn wait_ready(&mut self) -> Result<(), Error<SPI>> {
        let mut poll = self.config.ready_policy.start(self.timer.now_ms());
        loop {
            if !self.read_status().await?.is_busy() {
                return Ok(());
            }
            match poll.busy(self.timer.now_ms()) {
                Ok(backoff_us) => self.delay.delay_us(backoff_us).await,
                Err(exhausted) => {
                    log_warn!("Device still busy after {} polls", poll.attempts());
                    return Err(exhausted.error());
                }
            }
        }
    }

    async fn transact(
        &mut self,
        opcode: Opcode,
        address: Option<u32>,
        payload: Payload<'_>,
    ) -> Result<(), Error<SPI>> {
        let (header, len) = frame_header(opcode, address);
        let header = &header[..len];
        let spi_result = match payload {
            Payload::None => self.spi.transaction(&mut [Operation::Write(header)]).await,
            Payload::Out(data) => {
                self.spi
                    .transaction(&mut [Operation::Write(header), Operation::Write(data)])
                    .await
            }
            Payload::In(buf) => {
                self.spi
                    .transaction(&mut [Operation::Write(header), Operation::Read(buf)])
                    .await
            }
        };
        spi_result.map_err(Error::Spi)
    }
}
