#![no_std]
#![warn(missing_docs)]

//! Bring-up driver for the Lontium LT9211C MIPI DSI to LVDS video bridge
//!
//! The chip ingests a serial MIPI DSI stream, measures its timing, locks an
//! internal clock-recovery PLL to the measured rate and re-times the stream
//! onto a fixed-format dual-port LVDS output. This crate drives that
//! bring-up over the chip's paged I2C register space and keeps retrying
//! until the output is verified stable.
//!
//! # Core components
//!
//! - [`bus`] - paged register access, with an I2C adapter
//! - [`timing`] - pixel formats, the supported-mode table and mode matching
//! - [`rx`] - input front end, timing probe and clock recovery
//! - [`tx`] - output PLL, format programming and PHY power
//! - [`check`] - video check block (frame rate, stability, readback)
//! - [`bringup`] - the retrying state machine tying it all together
//!
//! # Driving the state machine
//!
//! Construct an [`Lt9211c`] from a [`RegisterBus`], a reset pin and a delay
//! provider, then call [`Lt9211c::poll`] from deferred work. Each poll runs
//! as many bring-up stages as succeed back-to-back and returns either
//! [`Poll::Reschedule`] (run again after the given delay; stages retry
//! across real-world signal instability such as cable reseating) or
//! [`Poll::Done`] once video is flowing.
//!
//! Register I/O is synchronous and single-threaded by construction: the
//! device owns its transport, and exactly one caller polls it.

#[cfg(feature = "defmt")]
use defmt as _;

#[macro_use]
mod fmt;

pub mod bringup;
pub mod bus;
pub mod check;
pub mod error;
pub mod rx;
pub mod system;
pub mod timing;
pub mod tx;

pub use bringup::{Lt9211c, Poll, State};
pub use bus::{I2cRegisterBus, Page, RegisterBus};
pub use error::{Error, Result};
pub use timing::{PixelFormat, RawInputTiming, ResolvedTiming, VideoTiming, DEFAULT_MODE};

/// Attach-time configuration, fixed for the life of the device.
///
/// Both values describe the source feeding the bridge; they cannot change
/// mid-run without a re-attach.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Config {
    /// Active MIPI data lanes on the input port
    pub lanes: u8,
    /// Input uses burst timing (compressed blanking intervals)
    pub burst: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            lanes: 4,
            burst: true,
        }
    }
}
