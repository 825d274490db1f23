//! I2C bus setup for the LCD port expander.
//!
//! Opens the Raspberry Pi I2C controller through rppal. The returned handle
//! implements the embedded-hal `I2c` trait, which is all the driver needs.

use super::hd44780::BusFault;
use rppal::hal::Delay;
use rppal::i2c::I2c;
use std::io;
use thiserror::Error;

/// Bus configuration
pub mod config {
    /// Per-transaction ceiling in milliseconds
    pub const TIMEOUT_MS: u32 = 1000;
}

/// I2C-related errors
#[derive(Error, Debug)]
pub enum BusError {
    #[error("I2C initialization failed: {0}")]
    InitError(#[from] rppal::i2c::Error),
}

// The kernel reports an expired transaction timeout as ETIMEDOUT
impl BusFault for rppal::i2c::Error {
    fn is_timeout(&self) -> bool {
        matches!(self, rppal::i2c::Error::Io(e) if e.kind() == io::ErrorKind::TimedOut)
    }
}

/// Open I2C bus `bus` (1 on all 40-pin boards) and a matching delay source
pub fn open(bus: u8) -> Result<(I2c, Delay), BusError> {
    let i2c = I2c::with_bus(bus)?;

    // Not every kernel driver honors the timeout ioctl
    if let Err(e) = i2c.set_timeout(config::TIMEOUT_MS) {
        tracing::warn!("Could not set I2C timeout to {}ms: {}", config::TIMEOUT_MS, e);
    }

    tracing::debug!(
        "I2C initialized: Bus={}, Speed={}Hz, Timeout={}ms",
        bus,
        i2c.clock_speed().unwrap_or(0),
        config::TIMEOUT_MS
    );

    Ok((i2c, Delay::new()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timed_out_io_is_a_timeout() {
        let timed_out = rppal::i2c::Error::Io(io::Error::from(io::ErrorKind::TimedOut));
        let refused = rppal::i2c::Error::Io(io::Error::from(io::ErrorKind::PermissionDenied));

        assert!(timed_out.is_timeout());
        assert!(!refused.is_timeout());
        assert!(!rppal::i2c::Error::FeatureNotSupported.is_timeout());
    }
}
