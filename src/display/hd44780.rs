//! HD44780 character LCD driver behind a PCF8574 I2C port expander.
//!
//! 16x2 (or up to 40x4) character display driven in 4-bit mode.
//! Every byte is split into two nibbles, each latched by an enable pulse.
//!
//! Expander pin mapping (common backpack wiring):
//! P0 = RS, P1 = RW (tied low), P2 = E, P3 = backlight, P4..P7 = D4..D7

use super::CharDisplay;
use embedded_hal::delay::DelayNs;
use embedded_hal::i2c::{ErrorKind, I2c};
use thiserror::Error;

/// Default PCF8574 address on most backpacks
pub const DEFAULT_ADDRESS: u8 = 0x27;

/// DDRAM start address of each physical row
pub const ROW_OFFSETS: [u8; 4] = [0x00, 0x40, 0x14, 0x54];

/// Controller commands
#[allow(dead_code)]
pub mod cmd {
    pub const CLEAR_DISPLAY: u8 = 0x01;
    pub const RETURN_HOME: u8 = 0x02;
    pub const ENTRY_MODE_SET: u8 = 0x04;
    pub const DISPLAY_CONTROL: u8 = 0x08;
    pub const CURSOR_SHIFT: u8 = 0x10;
    pub const FUNCTION_SET: u8 = 0x20;
    pub const SET_CGRAM_ADDR: u8 = 0x40;
    pub const SET_DDRAM_ADDR: u8 = 0x80;

    // Entry mode flags
    pub const ENTRY_LEFT: u8 = 0x02;
    pub const ENTRY_SHIFT_DECREMENT: u8 = 0x00;

    // Display control flags
    pub const DISPLAY_ON: u8 = 0x04;
    pub const CURSOR_OFF: u8 = 0x00;
    pub const BLINK_OFF: u8 = 0x00;

    // Function set flags
    pub const MODE_4BIT: u8 = 0x00;
    pub const LINES_2: u8 = 0x08;
    pub const DOTS_5X8: u8 = 0x00;
}

/// Expander control bits
pub mod bits {
    pub const REGISTER_SELECT: u8 = 0x01;
    pub const ENABLE: u8 = 0x04;
    pub const BACKLIGHT: u8 = 0x08;
}

/// Register targeted by a byte
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    Command = 0x00,
    Data = bits::REGISTER_SELECT,
}

/// Bus error that can tell a transaction timeout apart from other faults
///
/// embedded-hal has no timeout kind, so each bus reports it here.
pub trait BusFault: embedded_hal::i2c::Error {
    fn is_timeout(&self) -> bool;
}

/// Display driver errors
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum DriverError {
    #[error("I2C no acknowledge from expander")]
    NoAcknowledge,

    #[error("I2C transaction timed out")]
    Timeout,

    #[error("I2C bus error: {0:?}")]
    Bus(ErrorKind),

    #[error("Display not initialized")]
    NotInitialized,
}

impl DriverError {
    fn from_bus<E: BusFault>(err: E) -> Self {
        if err.is_timeout() {
            return DriverError::Timeout;
        }
        match err.kind() {
            ErrorKind::NoAcknowledge(_) => DriverError::NoAcknowledge,
            kind => DriverError::Bus(kind),
        }
    }
}

/// Compute the DDRAM address for a cursor position.
///
/// Rows at or past the configured count alias rows 0/1, as observed on
/// deployed 16x2 modules.
pub fn ddram_address(row: u8, col: u8, rows: u8) -> u8 {
    let row = if row >= rows { row % 2 } else { row };
    ROW_OFFSETS[row as usize % ROW_OFFSETS.len()].wrapping_add(col) & 0x7F
}

/// HD44780 over PCF8574 driver
pub struct Hd44780<I, D> {
    i2c: I,
    delay: D,
    address: u8,
    rows: u8,
    columns: u8,
    initialized: bool,
}

impl<I, D> Hd44780<I, D>
where
    I: I2c,
    I::Error: BusFault,
    D: DelayNs,
{
    /// Create a new driver instance (uninitialized)
    pub fn new(i2c: I, delay: D, address: u8, rows: u8, columns: u8) -> Self {
        Self {
            i2c,
            delay,
            address,
            rows,
            columns,
            initialized: false,
        }
    }

    /// Run the 4-bit bootstrap sequence
    ///
    /// The controller may be in any state after power-up (8-bit mode or
    /// halfway through a 4-bit transfer), so three raw 0x3 nibbles force it
    /// back into a known 8-bit state before switching to 4-bit mode.
    pub fn initialize(&mut self) -> Result<(), DriverError> {
        tracing::info!(
            "Initializing HD44780 display ({}x{}) at 0x{:02X}",
            self.columns,
            self.rows,
            self.address
        );

        self.delay.delay_ms(50);

        self.write_nibble(0x30, Mode::Command)?;
        self.delay.delay_ms(5);
        self.write_nibble(0x30, Mode::Command)?;
        self.delay.delay_ms(1);
        self.write_nibble(0x30, Mode::Command)?;
        self.delay.delay_ms(1);
        self.write_nibble(0x20, Mode::Command)?;
        self.delay.delay_ms(1);

        self.command(cmd::FUNCTION_SET | cmd::MODE_4BIT | cmd::LINES_2 | cmd::DOTS_5X8)?;
        self.command(cmd::DISPLAY_CONTROL | cmd::DISPLAY_ON | cmd::CURSOR_OFF | cmd::BLINK_OFF)?;
        self.send_clear()?;
        self.command(cmd::ENTRY_MODE_SET | cmd::ENTRY_LEFT | cmd::ENTRY_SHIFT_DECREMENT)?;

        self.initialized = true;
        tracing::info!("Display initialized successfully");

        Ok(())
    }

    /// Clear the display and return the cursor to address 0
    pub fn clear(&mut self) -> Result<(), DriverError> {
        self.ensure_initialized()?;
        self.send_clear()
    }

    /// Move the cursor to (row, col), zero-based
    pub fn set_cursor(&mut self, row: u8, col: u8) -> Result<(), DriverError> {
        self.ensure_initialized()?;
        self.command(cmd::SET_DDRAM_ADDR | ddram_address(row, col, self.rows))
    }

    /// Write a single character at the cursor
    pub fn write_char(&mut self, c: char) -> Result<(), DriverError> {
        self.ensure_initialized()?;
        let byte = if c.is_ascii() { c as u8 } else { b'?' };
        self.send(byte, Mode::Data)
    }

    /// Write a string starting at the cursor
    pub fn write_string(&mut self, s: &str) -> Result<(), DriverError> {
        for c in s.chars() {
            self.write_char(c)?;
        }
        Ok(())
    }

    /// Fill both rows with a fixed pattern
    pub fn test_pattern(&mut self) -> Result<(), DriverError> {
        const PATTERN: &str = "0123456789ABCDEFGHIJKLMNOPQRSTUVWXYZabcd";

        self.clear()?;
        for row in 0..self.rows {
            self.set_cursor(row, 0)?;
            let offset = row as usize * 4;
            let line: String = PATTERN
                .chars()
                .cycle()
                .skip(offset)
                .take(self.columns as usize)
                .collect();
            self.write_string(&line)?;
        }
        Ok(())
    }

    /// Check if the bootstrap sequence completed
    #[allow(dead_code)]
    pub fn is_initialized(&self) -> bool {
        self.initialized
    }

    fn ensure_initialized(&self) -> Result<(), DriverError> {
        if self.initialized {
            Ok(())
        } else {
            Err(DriverError::NotInitialized)
        }
    }

    fn send_clear(&mut self) -> Result<(), DriverError> {
        self.command(cmd::CLEAR_DISPLAY)?;
        self.delay.delay_ms(2);
        Ok(())
    }

    fn command(&mut self, value: u8) -> Result<(), DriverError> {
        self.send(value, Mode::Command)
    }

    /// Send a full byte as two nibbles, high first
    fn send(&mut self, value: u8, mode: Mode) -> Result<(), DriverError> {
        self.write_nibble(value & 0xF0, mode)?;
        self.write_nibble(value << 4, mode)
    }

    /// Latch the upper four bits of `nibble`
    fn write_nibble(&mut self, nibble: u8, mode: Mode) -> Result<(), DriverError> {
        let data = (nibble & 0xF0) | mode as u8 | bits::BACKLIGHT;
        self.pulse_enable(data)
    }

    fn pulse_enable(&mut self, data: u8) -> Result<(), DriverError> {
        self.write_expander(data | bits::ENABLE)?;
        self.delay.delay_ms(1);
        self.write_expander(data & !bits::ENABLE)?;
        self.delay.delay_ms(1);
        Ok(())
    }

    fn write_expander(&mut self, byte: u8) -> Result<(), DriverError> {
        self.i2c.write(self.address, &[byte]).map_err(|e| {
            let err = DriverError::from_bus(e);
            tracing::error!(
                "I2C write to LCD (addr 0x{:02X}) failed: {}",
                self.address,
                err
            );
            err
        })
    }
}

impl<I, D> CharDisplay for Hd44780<I, D>
where
    I: I2c + Send,
    I::Error: BusFault,
    D: DelayNs + Send,
{
    fn clear(&mut self) -> Result<(), DriverError> {
        Hd44780::clear(self)
    }

    fn set_cursor(&mut self, row: u8, col: u8) -> Result<(), DriverError> {
        Hd44780::set_cursor(self, row, col)
    }

    fn write_str(&mut self, s: &str) -> Result<(), DriverError> {
        self.write_string(s)
    }

    fn columns(&self) -> u8 {
        self.columns
    }
}
