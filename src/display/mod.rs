//! Display module for character LCD control.
//!
//! This module provides the interface to an HD44780-compatible 16x2 LCD
//! connected through a PCF8574 I2C backpack.

pub mod hd44780;
pub mod i2c;
#[cfg(test)]
pub mod sim;

// Re-export main types
pub use hd44780::{DriverError, Hd44780};

use crate::config::Config;
use rppal::hal::Delay;
use thiserror::Error;

/// Text-level operations the message arbiter needs from a display
pub trait CharDisplay: Send {
    /// Clear the display and home the cursor
    fn clear(&mut self) -> Result<(), DriverError>;

    /// Move the cursor to (row, col)
    fn set_cursor(&mut self, row: u8, col: u8) -> Result<(), DriverError>;

    /// Write text at the cursor
    fn write_str(&mut self, s: &str) -> Result<(), DriverError>;

    /// Number of characters per row
    fn columns(&self) -> u8;
}

/// Concrete driver type on the Pi
pub type Lcd = Hd44780<rppal::i2c::I2c, Delay>;

/// Errors while bringing up the display
#[derive(Error, Debug)]
pub enum DisplayError {
    #[error("Bus error: {0}")]
    Bus(#[from] i2c::BusError),

    #[error("Driver error: {0}")]
    Driver(#[from] DriverError),
}

/// Open the configured bus and run the LCD bootstrap sequence
pub fn open(config: &Config) -> Result<Lcd, DisplayError> {
    let (bus, delay) = i2c::open(config.i2c_bus)?;
    let mut lcd = Hd44780::new(bus, delay, config.lcd_address, config.rows, config.columns);
    lcd.initialize()?;
    Ok(lcd)
}

/// Truncate `text` to at most `columns` characters
pub fn fit_line(text: &str, columns: u8) -> String {
    text.chars().take(columns as usize).collect()
}
