//! Refer to datasheet:
//! https://www.st.com/resource/en/datasheet/m95m04-dr.pdf

use crate::config::Config;
use crate::error::Error;
use crate::geometry::{Chunk, Geometry, MAX_PAGE_WIDTH};
use crate::session::{Phase, WriteSession, WriteStatus};
use crate::traits::Timer;
use core::fmt::Debug;
use embedded_hal::delay::DelayNs;
use embedded_hal::spi::{ErrorType, Operation, SpiDevice};
use embedded_storage::{ReadStorage, Storage};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub(crate) enum Opcode {
    /// Set the write enable latch.
    WriteEnable = 0x06,
    /// Reset the write enable latch.
    WriteDisable = 0x04,
    /// Read the 8-bit status register.
    ReadStatus = 0x05,
    /// Write the 8-bit status register.
    WriteStatus = 0x01,
    Read = 0x03,
    Write = 0x02,
    /// Read the identification page, or its lock status when A10 is set.
    ReadId = 0x83,
    /// Write the identification page, or lock it when A10 is set.
    WriteId = 0x82,
}

bitflags::bitflags! {
    /// Status register bits.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct Status: u8 {
        /// **W**rite **i**n **p**rogress.
        const WIP = 1 << 0;
        /// Status of the **W**rite **E**nable **L**atch.
        const WEL = 1 << 1;
        const BP0 = 1 << 2;
        const BP1 = 1 << 3;
        /// **S**tatus **R**egister **W**rite **D**isable bit.
        const SRWD = 1 << 7;
    }
}

impl Status {
    pub fn is_busy(self) -> bool {
        self.contains(Status::WIP)
    }

    pub fn block_protection(self) -> BlockProtection {
        BlockProtection::from_status(self)
    }
}

#[cfg(feature = "defmt")]
impl defmt::Format for Status {
    fn format(&self, fmt: defmt::Formatter) {
        defmt::write!(fmt, "Status({=u8:#010b})", self.bits())
    }
}

/// Write-protected area selected by the BP1/BP0 status bits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum BlockProtection {
    None,
    UpperQuarter,
    UpperHalf,
    Full,
}

impl BlockProtection {
    const fn to_status(self) -> Status {
        match self {
            BlockProtection::None => Status::empty(),
            BlockProtection::UpperQuarter => Status::BP0,
            BlockProtection::UpperHalf => Status::BP1,
            BlockProtection::Full => Status::BP0.union(Status::BP1),
        }
    }

    fn from_status(status: Status) -> Self {
        match (status.contains(Status::BP1), status.contains(Status::BP0)) {
            (false, false) => BlockProtection::None,
            (false, true) => BlockProtection::UpperQuarter,
            (true, false) => BlockProtection::UpperHalf,
            (true, true) => BlockProtection::Full,
        }
    }
}

/// A10 selects the lock bit instead of the identification page array.
pub(crate) const ID_LOCK_ADDRESS: u32 = 1 << 10;
/// Data byte of the Lock ID instruction (b1 set).
pub(crate) const ID_LOCK_BYTE: u8 = 0b0000_0010;

/// Source of the fill pattern written by `erase_all`.
pub(crate) static ERASED_PAGE: [u8; MAX_PAGE_WIDTH as usize] = [0xFF; MAX_PAGE_WIDTH as usize];

/// Opcode followed by an optional 24-bit big-endian address.
pub(crate) fn frame_header(opcode: Opcode, address: Option<u32>) -> ([u8; 4], usize) {
    match address {
        Some(addr) => (
            [
                opcode as u8,
                (addr >> 16) as u8,
                (addr >> 8) as u8,
                addr as u8,
            ],
            4,
        ),
        None => ([opcode as u8, 0, 0, 0], 1),
    }
}

/// Data phase of one framed transaction.
pub(crate) enum Payload<'a> {
    None,
    Out(&'a [u8]),
    In(&'a mut [u8]),
}

/// Offset and length inside the identification page.
pub(crate) fn check_id_range(geometry: &Geometry, offset: u16, len: usize) -> bool {
    len > 0 && usize::from(offset) + len <= usize::from(geometry.page_width())
}

/// Blocking M95 driver with an optional tick-driven write engine.
///
/// `'d` is the lifetime of the data handed to [`write_begin`](Self::write_begin);
/// the handle keeps that slice borrowed until the session is over.
pub struct EepromSpi<'d, SPI: ErrorType, D, T> {
    spi: SPI,
    delay: D,
    timer: T,
    config: Config,
    phase: Phase<'d>,
    fault: Option<(u32, Error<SPI>)>,
    last_written: u32,
}

impl<SPI: ErrorType, D, T> Debug for EepromSpi<'_, SPI, D, T> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("EepromSpi")
            .field("config", &self.config)
            .field("phase", &self.phase)
            .field("fault", &self.fault)
            .finish()
    }
}

impl<'d, SPI, D, T> EepromSpi<'d, SPI, D, T>
where
    SPI: SpiDevice,
    D: DelayNs,
    T: Timer,
{
    /// Wrap a device without talking to it.
    pub fn new(spi: SPI, delay: D, timer: T, config: Config) -> Self {
        Self {
            spi,
            delay,
            timer,
            config,
            phase: Phase::Idle,
            fault: None,
            last_written: 0,
        }
    }

    /// Wrap a device and wait until it reports ready.
    pub fn init(spi: SPI, delay: D, timer: T, config: Config) -> Result<Self, Error<SPI>> {
        let mut this = Self::new(spi, delay, timer, config);
        this.wait_ready()?;
        let status = this.read_status()?;
        log_debug!("Initial status: {:#x}", status.bits());
        Ok(this)
    }

    /// Give back the bus, delay and timer.
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
    pub fn read_status(&mut self) -> Result<Status, Error<SPI>> {
        let mut response = [0u8; 1];
        self.transact(Opcode::ReadStatus, None, Payload::In(&mut response))?;
        Ok(Status::from_bits_retain(response[0]))
    }

    pub fn is_busy(&mut self) -> Result<bool, Error<SPI>> {
        Ok(self.read_status()?.is_busy())
    }

    /// Single status poll: `Ok` when the device is idle, [`Error::Busy`] when a
    /// write cycle is still running.
    pub fn check_ready(&mut self) -> Result<(), Error<SPI>> {
        if self.is_busy()? {
            Err(Error::Busy)
        } else {
            Ok(())
        }
    }

    /// The Write Enable instruction sets the Write Enable Latch (WEL) bit. WEL
    /// must be set before every Write, Write Status Register and Write ID
    /// instruction and is reset by the device when that instruction completes.
    pub fn write_enable(&mut self) -> Result<(), Error<SPI>> {
        self.transact(Opcode::WriteEnable, None, Payload::None)
    }

    /// Resets the Write Enable Latch.
    pub fn write_disable(&mut self) -> Result<(), Error<SPI>> {
        self.transact(Opcode::WriteDisable, None, Payload::None)
    }

    pub fn block_protection(&mut self) -> Result<BlockProtection, Error<SPI>> {
        Ok(self.read_status()?.block_protection())
    }

    /// Write BP1/BP0, leaving SRWD untouched, and wait for the status write
    /// cycle to finish.
    pub fn set_block_protection(&mut self, level: BlockProtection) -> Result<(), Error<SPI>> {
        self.ensure_writable()?;
        self.wait_ready()?;
        let keep = self.read_status()? & Status::SRWD;
        self.write_enable()?;
        let value = (keep | level.to_status()).bits();
        self.transact(Opcode::WriteStatus, None, Payload::Out(&[value]))?;
        self.wait_ready()?;
        log_debug!("Block protection set to {:#x}", value);
        Ok(())
    }

    /// Reads EEPROM contents into `buf`, starting at `address`.
    ///
    /// Fails with [`Error::Busy`] while a tick-driven write is running. A
    /// successful read leaves the handle in its read window until the next
    /// [`tick`](Self::tick), see [`read_completed`](Self::read_completed).
    pub fn read(&mut self, address: u32, buf: &mut [u8]) -> Result<(), Error<SPI>> {
        if self.write_in_progress() {
            return Err(Error::Busy);
        }
        self.config.geometry.check_range(address, buf.len())?;
        self.wait_ready()?;
        self.transact(Opcode::Read, Some(address), Payload::In(buf))?;
        if matches!(self.phase, Phase::Idle) {
            self.phase = Phase::ReadSettling;
            self.timer.start(self.config.read_cycle_ms);
        }
        Ok(())
    }

    /// Write `data` starting at `address`, one page-bounded chunk at a time,
    /// blocking until every chunk has been accepted by the device.
    ///
    /// The first failing chunk aborts the rest of the request. Chunks before
    /// it stay written; [`last_written`](Self::last_written) tells how many
    /// bytes that was.
    pub fn write(&mut self, address: u32, data: &[u8]) -> Result<(), Error<SPI>> {
        self.ensure_writable()?;
        let plan = self.config.geometry.chunks(address, data.len())?;
        self.last_written = 0;
        let mut offset = 0;
        for chunk in plan {
            self.program(chunk, &data[offset..offset + chunk.len()])?;
            offset += chunk.len();
            self.last_written = offset as u32;
        }
        Ok(())
    }

    /// Fill the whole array with `0xFF`, page by page.
    pub fn erase_all(&mut self) -> Result<(), Error<SPI>> {
        self.ensure_writable()?;
        self.last_written = 0;
        for chunk in self.config.geometry.pages() {
            self.program(chunk, &ERASED_PAGE[..chunk.len()])?;
            self.last_written += u32::from(chunk.length);
        }
        log_debug!("Erased {} pages", self.config.geometry.page_count());
        Ok(())
    }

    /// Bytes accepted by the device during the most recent `write`,
    /// `erase_all` or completed tick-driven write.
    pub fn last_written(&self) -> u32 {
        self.last_written
    }

    /// Start a tick-driven write.
    ///
    /// Only the first chunk is sent before returning; every following call to
    /// [`tick`](Self::tick) sends one more, and the tick after the last chunk
    /// completes the session.
    pub fn write_begin(&mut self, address: u32, data: &'d [u8]) -> Result<(), Error<SPI>> {
        self.ensure_writable()?;
        let plan = self.config.geometry.chunks(address, data.len())?;
        let mut session = WriteSession::new(plan, data);
        self.last_written = 0;
        if let Some((chunk, bytes)) = session.peek() {
            self.program(chunk, bytes)?;
            session.advance(chunk);
        }
        self.phase = Self::after_dispatch(session);
        self.timer.start(self.config.write_cycle_ms);
        Ok(())
    }

    /// Advance the tick-driven state machine by one step.
    ///
    /// Meant to be called from the periodic timer at roughly the device's
    /// write cycle time. Does nothing while the handle is idle.
    pub fn tick(&mut self) {
        match core::mem::replace(&mut self.phase, Phase::Idle) {
            Phase::Idle => {}
            Phase::WriteChunkPending(mut session) => {
                let Some((chunk, bytes)) = session.peek() else {
                    self.finish_write(session.written());
                    return;
                };
                match self.program(chunk, bytes) {
                    Ok(()) => {
                        session.advance(chunk);
                        self.phase = Self::after_dispatch(session);
                    }
                    Err(e) => {
                        log_error!(
                            "Write stopped at {:#x} after {} bytes: {:?}",
                            chunk.address,
                            session.written(),
                            e
                        );
                        self.last_written = session.written();
                        self.fault = Some((session.written(), e));
                        self.timer.stop();
                    }
                }
            }
            Phase::WriteSettling { written } => self.finish_write(written),
            Phase::ReadSettling => self.timer.stop(),
        }
    }

    /// `true` from `write_begin` until the tick after the last chunk.
    pub fn write_in_progress(&self) -> bool {
        matches!(
            self.phase,
            Phase::WriteChunkPending(_) | Phase::WriteSettling { .. }
        )
    }

    /// `false` between a successful `read` and the next tick.
    pub fn read_completed(&self) -> bool {
        !matches!(self.phase, Phase::ReadSettling)
    }

    pub fn write_status(&self) -> WriteStatus {
        if let Some((written, _)) = &self.fault {
            return WriteStatus::Failed { written: *written };
        }
        match &self.phase {
            Phase::WriteChunkPending(session) => WriteStatus::InProgress {
                written: session.written(),
                remaining: session.remaining(),
            },
            Phase::WriteSettling { written } => WriteStatus::Settling { written: *written },
            Phase::Idle | Phase::ReadSettling => WriteStatus::Idle,
        }
    }

    /// Collect the error that ended the last tick-driven write.
    ///
    /// Until it is collected, new writes are refused with [`Error::Busy`].
    pub fn take_write_error(&mut self) -> Option<Error<SPI>> {
        self.fault.take().map(|(_, e)| e)
    }

    /// Read from the identification page.
    pub fn read_identification(&mut self, offset: u16, buf: &mut [u8]) -> Result<(), Error<SPI>> {
        if self.write_in_progress() {
            return Err(Error::Busy);
        }
        if !check_id_range(&self.config.geometry, offset, buf.len()) {
            return Err(Error::InvalidArgument);
        }
        self.wait_ready()?;
        self.transact(Opcode::ReadId, Some(u32::from(offset)), Payload::In(buf))
    }

    /// Write into the identification page. The device ignores the write once
    /// the page is locked.
    pub fn write_identification(&mut self, offset: u16, data: &[u8]) -> Result<(), Error<SPI>> {
        if !check_id_range(&self.config.geometry, offset, data.len()) {
            return Err(Error::InvalidArgument);
        }
        self.ensure_writable()?;
        self.wait_ready()?;
        self.write_enable()?;
        self.transact(Opcode::WriteId, Some(u32::from(offset)), Payload::Out(data))
    }

    pub fn identification_locked(&mut self) -> Result<bool, Error<SPI>> {
        if self.write_in_progress() {
            return Err(Error::Busy);
        }
        let mut response = [0u8; 1];
        self.wait_ready()?;
        self.transact(Opcode::ReadId, Some(ID_LOCK_ADDRESS), Payload::In(&mut response))?;
        Ok(response[0] & 0x01 != 0)
    }

    /// Permanently lock the identification page in read-only mode.
    pub fn lock_identification(&mut self) -> Result<(), Error<SPI>> {
        self.ensure_writable()?;
        self.wait_ready()?;
        self.write_enable()?;
        self.transact(Opcode::WriteId, Some(ID_LOCK_ADDRESS), Payload::Out(&[ID_LOCK_BYTE]))
    }

    fn ensure_writable(&self) -> Result<(), Error<SPI>> {
        if self.write_in_progress() || self.fault.is_some() {
            return Err(Error::Busy);
        }
        Ok(())
    }

    fn after_dispatch(session: WriteSession<'d>) -> Phase<'d> {
        if session.is_finished() {
            Phase::WriteSettling {
                written: session.written(),
            }
        } else {
            Phase::WriteChunkPending(session)
        }
    }

    fn finish_write(&mut self, written: u32) {
        self.last_written = written;
        self.timer.stop();
        log_debug!("Write of {} bytes completed", written);
    }

    /// Write one chunk: wait for the previous cycle, set WEL, send the
    /// page program frame.
    fn program(&mut self, chunk: Chunk, data: &[u8]) -> Result<(), Error<SPI>> {
        if data.len() > usize::from(self.config.geometry.page_width()) {
            return Err(Error::StorageOverflow);
        }
        self.wait_ready()?;
        self.write_enable()?;
        log_trace!("Program {} bytes at {:#x}", chunk.length, chunk.address);
        self.transact(Opcode::Write, Some(chunk.address), Payload::Out(data))
    }

    /// Poll the status register until WIP clears or the configured budget
    /// runs out.
    fn wait_ready(&mut self) -> Result<(), Error<SPI>> {
        let mut poll = self.config.ready_policy.start(self.timer.now_ms());
        loop {
            if !self.read_status()?.is_busy() {
                return Ok(());
            }
            match poll.busy(self.timer.now_ms()) {
                Ok(backoff_us) => self.delay.delay_us(backoff_us),
                Err(exhausted) => {
                    log_warn!("Device still busy after {} polls", poll.attempts());
                    return Err(exhausted.error());
                }
            }
        }
    }

    /// One chip-select framed transaction.
    fn transact(
        &mut self,
        opcode: Opcode,
        address: Option<u32>,
        payload: Payload<'_>,
    ) -> Result<(), Error<SPI>> {
        let (header, len) = frame_header(opcode, address);
        let header = &header[..len];
        let spi_result = match payload {
            Payload::None => self.spi.transaction(&mut [Operation::Write(header)]),
            Payload::Out(data) => self
                .spi
                .transaction(&mut [Operation::Write(header), Operation::Write(data)]),
            Payload::In(buf) => self
                .spi
                .transaction(&mut [Operation::Write(header), Operation::Read(buf)]),
        };
        spi_result.map_err(Error::Spi)
    }
}

impl<SPI, D, T> ReadStorage for EepromSpi<'_, SPI, D, T>
where
    SPI: SpiDevice,
    D: DelayNs,
    T: Timer,
{
    type Error = Error<SPI>;

    fn read(&mut self, offset: u32, bytes: &mut [u8]) -> Result<(), Self::Error> {
        if bytes.is_empty() {
            return Ok(());
        }
        EepromSpi::read(self, offset, bytes)
    }

    fn capacity(&self) -> usize {
        self.config.geometry.device_size() as usize
    }
}

impl<SPI, D, T> Storage for EepromSpi<'_, SPI, D, T>
where
    SPI: SpiDevice,
    D: DelayNs,
    T: Timer,
{
    fn write(&mut self, offset: u32, bytes: &[u8]) -> Result<(), Self::Error> {
        if bytes.is_empty() {
            return Ok(());
        }
        EepromSpi::write(self, offset, bytes)
    }
}
