//! Simulated M95 device, raw bus, delay and timer for the unit tests.

use crate::traits::Timer;
use core::cell::{Cell, RefCell};
use core::convert::Infallible;
use embedded_hal::digital::OutputPin;
use embedded_hal::spi::{self, ErrorKind, ErrorType, Operation};
use std::rc::Rc;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct MockError;

impl spi::Error for MockError {
    fn kind(&self) -> ErrorKind {
        ErrorKind::Other
    }
}

/// One chip-select frame as seen on the wire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Frame {
    pub opcode: u8,
    pub address: Option<u32>,
    pub payload: usize,
}

const WREN: u8 = 0x06;
const WRDI: u8 = 0x04;
const RDSR: u8 = 0x05;
const WRSR: u8 = 0x01;
const READ: u8 = 0x03;
const WRITE: u8 = 0x02;
const RDID: u8 = 0x83;
const WRID: u8 = 0x82;
const LOCK_SELECT: u32 = 1 << 10;

#[derive(Debug)]
pub(crate) struct MockEeprom {
    pub memory: Vec<u8>,
    pub page_width: usize,
    pub id_page: Vec<u8>,
    pub id_locked: bool,
    /// Non-volatile status bits (BP0, BP1, SRWD).
    pub status: u8,
    pub wel: bool,
    /// Status reads still reporting WIP.
    pub busy_polls: u32,
    /// WIP polls added by every accepted write cycle.
    pub busy_per_write: u32,
    pub stuck_busy: bool,
    /// Zero-based index of the WRITE frame that fails on the bus.
    pub fail_program: Option<usize>,
    pub fail_status: bool,
    pub programs_seen: usize,
    pub writes_without_wel: usize,
    pub crossed_page: bool,
    pub frames: Vec<Frame>,
}

impl MockEeprom {
    pub fn new(page_width: usize, page_count: usize) -> Self {
        Self {
            memory: vec![0; page_width * page_count],
            page_width,
            id_page: vec![0; page_width],
            id_locked: false,
            status: 0,
            wel: false,
            busy_polls: 0,
            busy_per_write: 2,
            stuck_busy: false,
            fail_program: None,
            fail_status: false,
            programs_seen: 0,
            writes_without_wel: 0,
            crossed_page: false,
            frames: Vec::new(),
        }
    }

    /// `(address, length)` of every page program frame, in order.
    pub fn programs(&self) -> Vec<(u32, usize)> {
        self.frames
            .iter()
            .filter(|f| f.opcode == WRITE)
            .map(|f| (f.address.unwrap_or(0), f.payload))
            .collect()
    }

    pub fn count(&self, opcode: u8) -> usize {
        self.frames.iter().filter(|f| f.opcode == opcode).count()
    }

    /// Every WRITE frame is directly preceded by a WREN frame.
    pub fn every_program_enabled(&self) -> bool {
        self.frames
            .windows(2)
            .filter(|w| w[1].opcode == WRITE)
            .all(|w| w[0].opcode == WREN)
            && self.frames.first().map_or(true, |f| f.opcode != WRITE)
    }

    fn status_byte(&mut self) -> u8 {
        let busy = if self.stuck_busy {
            true
        } else if self.busy_polls > 0 {
            self.busy_polls -= 1;
            true
        } else {
            false
        };
        let mut value = self.status;
        if self.wel {
            value |= 0x02;
        }
        if busy {
            value |= 0x01;
        }
        value
    }

    fn start_write_cycle(&mut self) {
        self.wel = false;
        self.busy_polls = self.busy_per_write;
    }

    fn program(&mut self, address: u32, data: &[u8]) {
        if !self.wel {
            self.writes_without_wel += 1;
            return;
        }
        let address = address as usize;
        let page_start = address - address % self.page_width;
        if address % self.page_width + data.len() > self.page_width {
            self.crossed_page = true;
        }
        for (i, &byte) in data.iter().enumerate() {
            // The address counter wraps inside the page.
            let offset = (address % self.page_width + i) % self.page_width;
            self.memory[page_start + offset] = byte;
        }
        self.start_write_cycle();
    }
}

fn collect_out(ops: &[Operation<'_, u8>]) -> Vec<u8> {
    let mut out = Vec::new();
    for op in ops {
        if let Operation::Write(data) = op {
            out.extend_from_slice(data);
        }
    }
    out
}

fn fill_in(ops: &mut [Operation<'_, u8>], mut source: impl FnMut(usize) -> u8) {
    let mut index = 0;
    for op in ops.iter_mut() {
        if let Operation::Read(buf) = op {
            for byte in buf.iter_mut() {
                *byte = source(index);
                index += 1;
            }
        }
    }
}

impl ErrorType for MockEeprom {
    type Error = MockError;
}

impl spi::SpiDevice for MockEeprom {
    fn transaction(&mut self, operations: &mut [Operation<'_, u8>]) -> Result<(), MockError> {
        let (first, rest) = operations.split_first_mut().expect("empty transaction");
        let header = match first {
            Operation::Write(header) => header.to_vec(),
            _ => panic!("frame must start with the opcode"),
        };
        let opcode = header[0];
        let address = (header.len() >= 4)
            .then(|| u32::from_be_bytes([0, header[1], header[2], header[3]]));
        let out = collect_out(rest);
        let payload = out.len()
            + rest
                .iter()
                .map(|op| match op {
                    Operation::Read(buf) => buf.len(),
                    _ => 0,
                })
                .sum::<usize>();
        self.frames.push(Frame {
            opcode,
            address,
            payload,
        });

        match opcode {
            WREN => self.wel = true,
            WRDI => self.wel = false,
            RDSR => {
                if self.fail_status {
                    return Err(MockError);
                }
                let value = self.status_byte();
                fill_in(rest, |_| value);
            }
            WRSR => {
                if self.wel {
                    self.status = out[0] & 0x8C;
                    self.start_write_cycle();
                } else {
                    self.writes_without_wel += 1;
                }
            }
            READ => {
                let start = address.expect("read without address") as usize;
                let memory = &self.memory;
                fill_in(rest, |i| memory[(start + i) % memory.len()]);
            }
            WRITE => {
                let index = self.programs_seen;
                self.programs_seen += 1;
                if self.fail_program == Some(index) {
                    return Err(MockError);
                }
                self.program(address.expect("write without address"), &out);
            }
            RDID => {
                let address = address.expect("rdid without address");
                if address & LOCK_SELECT != 0 {
                    let locked = self.id_locked as u8;
                    fill_in(rest, |_| locked);
                } else {
                    let start = address as usize % self.page_width;
                    let page = &self.id_page;
                    fill_in(rest, |i| page[(start + i) % page.len()]);
                }
            }
            WRID => {
                let address = address.expect("wrid without address");
                if !self.wel {
                    self.writes_without_wel += 1;
                } else if address & LOCK_SELECT != 0 {
                    if out.first().map_or(false, |b| b & 0x02 != 0) {
                        self.id_locked = true;
                    }
                    self.start_write_cycle();
                } else if !self.id_locked {
                    let start = address as usize % self.page_width;
                    for (i, &byte) in out.iter().enumerate() {
                        self.id_page[(start + i) % self.page_width] = byte;
                    }
                    self.start_write_cycle();
                } else {
                    self.wel = false;
                }
            }
            other => panic!("unexpected opcode {other:#04x}"),
        }
        Ok(())
    }
}

impl embedded_hal_async::spi::SpiDevice for MockEeprom {
    async fn transaction(&mut self, operations: &mut [Operation<'_, u8>]) -> Result<(), MockError> {
        spi::SpiDevice::transaction(self, operations)
    }
}

/// Delay that returns at once and counts how often it was asked to wait.
#[derive(Debug, Default)]
pub(crate) struct NoDelay {
    pub calls: u32,
}

impl embedded_hal::delay::DelayNs for NoDelay {
    fn delay_ns(&mut self, _ns: u32) {
        self.calls += 1;
    }
}

impl embedded_hal_async::delay::DelayNs for NoDelay {
    async fn delay_ns(&mut self, _ns: u32) {
        self.calls += 1;
    }
}

/// Clock that moves forward by `step_ms` every time it is read.
#[derive(Debug, Default)]
pub(crate) struct MockTimer {
    pub now: Cell<u64>,
    pub step_ms: u64,
    pub period: Option<u32>,
    pub starts: u32,
    pub stops: u32,
}

impl MockTimer {
    pub fn stepping(step_ms: u64) -> Self {
        Self {
            step_ms,
            ..Self::default()
        }
    }
}

impl Timer for MockTimer {
    fn now_ms(&self) -> u64 {
        let now = self.now.get();
        self.now.set(now + self.step_ms);
        now
    }

    fn start(&mut self, period_ms: u32) {
        self.period = Some(period_ms);
        self.starts += 1;
    }

    fn stop(&mut self) {
        self.period = None;
        self.stops += 1;
    }
}

/// What a raw bus and its chip-select pin saw, in order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum BusEvent {
    Select,
    Deselect,
    Write(Vec<u8>),
    Read(usize),
    Flush,
}

pub(crate) type BusLog = Rc<RefCell<Vec<BusEvent>>>;

/// Raw `SpiBus` that records traffic and answers every read with `0x00`.
#[derive(Debug)]
pub(crate) struct MockBus {
    pub log: BusLog,
}

impl ErrorType for MockBus {
    type Error = MockError;
}

impl spi::SpiBus for MockBus {
    fn read(&mut self, words: &mut [u8]) -> Result<(), MockError> {
        words.fill(0);
        self.log.borrow_mut().push(BusEvent::Read(words.len()));
        Ok(())
    }

    fn write(&mut self, words: &[u8]) -> Result<(), MockError> {
        self.log.borrow_mut().push(BusEvent::Write(words.to_vec()));
        Ok(())
    }

    fn transfer(&mut self, read: &mut [u8], write: &[u8]) -> Result<(), MockError> {
        self.write(write)?;
        self.read(read)
    }

    fn transfer_in_place(&mut self, words: &mut [u8]) -> Result<(), MockError> {
        let out = words.to_vec();
        self.write(&out)?;
        self.read(words)
    }

    fn flush(&mut self) -> Result<(), MockError> {
        self.log.borrow_mut().push(BusEvent::Flush);
        Ok(())
    }
}

/// Active-low chip-select pin sharing the bus log.
#[derive(Debug)]
pub(crate) struct MockPin {
    pub log: BusLog,
}

impl embedded_hal::digital::ErrorType for MockPin {
    type Error = Infallible;
}

impl OutputPin for MockPin {
    fn set_low(&mut self) -> Result<(), Infallible> {
        self.log.borrow_mut().push(BusEvent::Select);
        Ok(())
    }

    fn set_high(&mut self) -> Result<(), Infallible> {
        self.log.borrow_mut().push(BusEvent::Deselect);
        Ok(())
    }
}
