//! Video check block: frame-rate measurement, stability status and timing
//! readback.
//!
//! The check block counts frames of whatever clock/source pair the system
//! muxes feed it (see [`crate::system`]) and exposes the measured geometry
//! in read-only registers.

use crate::bus::{Page, RegisterBus};
use crate::error::Result;
use crate::timing::VideoTiming;
use bitflags::bitflags;
use embedded_hal::delay::DelayNs;

bitflags! {
    /// Video check status register bits.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct CheckStatus: u8 {
        /// Measured timing has been steady over the check window.
        const STABLE = 1 << 0;
    }
}

/// Reference oscillator feeding the frame-time counter, Hz.
const FRAME_COUNTER_HZ: u32 = 25_000_000;

/// Settling time after the check counters are reset, covering a few frames
/// at any supported rate.
const READBACK_SETTLE_MS: u32 = 80;

/// Measure the input frame rate in Hz, rounded to nearest.
pub fn frame_rate<B: RegisterBus>(bus: &mut B) -> Result<u8> {
    let mut frame_time = bus.read(Page::Check, 0x43)? as u32;
    frame_time = (frame_time << 8) + bus.read(Page::Check, 0x44)? as u32;
    frame_time = (frame_time << 8) + bus.read(Page::Check, 0x45)? as u32;

    // counter reads zero until the first frame has been captured
    if frame_time == 0 {
        return Ok(0);
    }
    Ok(((FRAME_COUNTER_HZ * 2 / frame_time + 1) / 2) as u8)
}

/// Whether the check block currently reports stable video.
pub fn is_stable<B: RegisterBus>(bus: &mut B) -> Result<bool> {
    let status = CheckStatus::from_bits_truncate(bus.read(Page::Check, 0x40)?);
    Ok(status.contains(CheckStatus::STABLE))
}

fn read_u16<B: RegisterBus>(bus: &mut B, high: u8, low: u8) -> Result<u16> {
    Ok(((bus.read(Page::Check, high)? as u16) << 8) | bus.read(Page::Check, low)? as u16)
}

/// Read back the timing the check block measured on the live stream.
///
/// Resets the check counters first and waits for them to refill. The
/// returned record carries no refresh rate (`frame_rate` is zero); use
/// [`frame_rate`] for that.
pub fn measure_timing<B, D>(bus: &mut B, delay: &mut D) -> Result<VideoTiming>
where
    B: RegisterBus,
    D: DelayNs,
{
    bus.write(Page::System, 0x0b, 0x7f)?;
    bus.write(Page::System, 0x0b, 0xff)?;
    delay.delay_ms(READBACK_SETTLE_MS);

    Ok(VideoTiming {
        hsync_len: read_u16(bus, 0x50, 0x51)?,
        vsync_len: read_u16(bus, 0x52, 0x53)?,
        hback_porch: read_u16(bus, 0x54, 0x55)?,
        vback_porch: read_u16(bus, 0x56, 0x57)?,
        hfront_porch: read_u16(bus, 0x58, 0x59)?,
        vfront_porch: read_u16(bus, 0x5a, 0x5b)?,
        hactive: read_u16(bus, 0x5c, 0x5d)?,
        vactive: read_u16(bus, 0x5e, 0x5f)?,
        htotal: read_u16(bus, 0x60, 0x61)?,
        vtotal: read_u16(bus, 0x62, 0x63)?,
        frame_rate: 0,
    })
}
