//! Simulated PCF8574 + HD44780 pair for tests.
//!
//! Records every expander write and delay, and decodes enable pulses into
//! controller commands and DDRAM contents so tests can assert on what the
//! screen would show.

use super::hd44780::{bits, BusFault, ROW_OFFSETS};
use embedded_hal::delay::DelayNs;
use embedded_hal::i2c::{ErrorKind, ErrorType, I2c, NoAcknowledgeSource, Operation};
use std::sync::{Arc, Mutex};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BusEvent {
    Write(u8),
    DelayNs(u32),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SimError {
    NoAcknowledge,
    Timeout,
}

impl embedded_hal::i2c::Error for SimError {
    fn kind(&self) -> ErrorKind {
        match self {
            SimError::NoAcknowledge => ErrorKind::NoAcknowledge(NoAcknowledgeSource::Address),
            SimError::Timeout => ErrorKind::Other,
        }
    }
}

impl BusFault for SimError {
    fn is_timeout(&self) -> bool {
        *self == SimError::Timeout
    }
}

struct SimState {
    events: Vec<BusEvent>,
    commands: Vec<u8>,
    fault: Option<SimError>,
    last_write: Option<u8>,
    four_bit: bool,
    pending_high: Option<u8>,
    ddram: [u8; 128],
    address: u8,
    columns: u8,
}

impl SimState {
    fn on_write(&mut self, byte: u8) {
        self.events.push(BusEvent::Write(byte));

        let falling_edge = matches!(
            self.last_write,
            Some(prev) if prev & bits::ENABLE != 0 && prev & !bits::ENABLE == byte
        );
        self.last_write = Some(byte);

        if falling_edge {
            self.latch(byte >> 4, byte & bits::REGISTER_SELECT != 0);
        }
    }

    fn latch(&mut self, nibble: u8, data: bool) {
        if !self.four_bit {
            // 8-bit interface: only the upper data lines are wired
            if nibble == 0x2 {
                self.four_bit = true;
            }
            return;
        }

        match self.pending_high.take() {
            None => self.pending_high = Some(nibble),
            Some(high) => {
                let value = (high << 4) | nibble;
                if data {
                    self.write_data(value);
                } else {
                    self.execute(value);
                }
            }
        }
    }

    fn execute(&mut self, command: u8) {
        self.commands.push(command);
        if command & 0x80 != 0 {
            self.address = command & 0x7F;
        } else if command == 0x01 {
            self.ddram = [b' '; 128];
            self.address = 0;
        } else if command & 0xFE == 0x02 {
            self.address = 0;
        }
    }

    fn write_data(&mut self, value: u8) {
        self.ddram[self.address as usize] = value;
        self.address = (self.address + 1) & 0x7F;
    }
}

/// Shared handle to the simulated bus; clones observe the same state
#[derive(Clone)]
pub struct SimBus {
    state: Arc<Mutex<SimState>>,
}

impl SimBus {
    pub fn new(columns: u8) -> Self {
        Self {
            state: Arc::new(Mutex::new(SimState {
                events: Vec::new(),
                commands: Vec::new(),
                fault: None,
                last_write: None,
                four_bit: false,
                pending_high: None,
                ddram: [b' '; 128],
                address: 0,
                columns,
            })),
        }
    }

    /// Delay source that records into this bus' event log
    pub fn delay(&self) -> SimDelay {
        SimDelay {
            state: Arc::clone(&self.state),
        }
    }

    /// Reject every transaction with a missing acknowledge
    pub fn set_failing(&self, failing: bool) {
        self.state.lock().unwrap().fault = failing.then_some(SimError::NoAcknowledge);
    }

    /// Reject every transaction as timed out
    pub fn set_timing_out(&self, timing_out: bool) {
        self.state.lock().unwrap().fault = timing_out.then_some(SimError::Timeout);
    }

    pub fn clear_events(&self) {
        let mut state = self.state.lock().unwrap();
        state.events.clear();
        state.commands.clear();
    }

    pub fn events(&self) -> Vec<BusEvent> {
        self.state.lock().unwrap().events.clone()
    }

    pub fn writes(&self) -> Vec<u8> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                BusEvent::Write(b) => Some(b),
                BusEvent::DelayNs(_) => None,
            })
            .collect()
    }

    /// Commands decoded since the last `clear_events`
    pub fn commands(&self) -> Vec<u8> {
        self.state.lock().unwrap().commands.clone()
    }

    pub fn is_four_bit(&self) -> bool {
        self.state.lock().unwrap().four_bit
    }

    /// Current DDRAM address counter
    pub fn cursor(&self) -> u8 {
        self.state.lock().unwrap().address
    }

    /// Visible text of a row, padded to the column count
    pub fn row_text(&self, row: usize) -> String {
        let state = self.state.lock().unwrap();
        let start = ROW_OFFSETS[row] as usize;
        let end = start + state.columns as usize;
        state.ddram[start..end].iter().map(|&b| b as char).collect()
    }

    /// Visible text of a row without trailing padding
    pub fn line(&self, row: usize) -> String {
        self.row_text(row).trim_end().to_string()
    }
}

impl ErrorType for SimBus {
    type Error = SimError;
}

impl I2c for SimBus {
    fn transaction(
        &mut self,
        _address: u8,
        operations: &mut [Operation<'_>],
    ) -> Result<(), Self::Error> {
        let mut state = self.state.lock().unwrap();
        if let Some(fault) = state.fault {
            return Err(fault);
        }

        for op in operations.iter_mut() {
            match op {
                Operation::Write(bytes) => {
                    for &b in bytes.iter() {
                        state.on_write(b);
                    }
                }
                Operation::Read(buf) => buf.fill(0),
            }
        }
        Ok(())
    }
}

pub struct SimDelay {
    state: Arc<Mutex<SimState>>,
}

impl DelayNs for SimDelay {
    fn delay_ns(&mut self, ns: u32) {
        self.state.lock().unwrap().events.push(BusEvent::DelayNs(ns));
    }

    fn delay_us(&mut self, us: u32) {
        self.delay_ns(us.saturating_mul(1_000));
    }

    fn delay_ms(&mut self, ms: u32) {
        self.delay_ns(ms.saturating_mul(1_000_000));
    }
}
