//! System-level services: identification, clock muxing and the on-chip
//! frequency meter.

use crate::bus::{Page, RegisterBus};
use crate::error::Result;
use embedded_hal::delay::DelayNs;

/// Clock sources selectable into the video check block.
pub mod check_clk {
    /// MIPI receiver byte clock, used while hunting for input timing.
    pub const MIPI_BYTE: u8 = 0x03;
    /// Recovered pixel clock, used once clock recovery has converged.
    pub const DESSC_PIXEL: u8 = 0x01;
}

/// Frequency-meter taps.
pub mod fm_clk {
    /// Recovered pixel clock, analog tap.
    pub const DESSC_PIXEL: u8 = 0x10;
}

/// Read the 3-byte chip identification burst.
pub fn read_chip_id<B: RegisterBus>(bus: &mut B) -> Result<[u8; 3]> {
    let mut id = [0u8; 3];
    bus.read_bulk(Page::System, 0x00, &mut id)?;
    Ok(id)
}

/// Route one of the [`check_clk`] sources into the video check block.
pub fn select_check_clock<B: RegisterBus>(bus: &mut B, source: u8) -> Result<()> {
    bus.update(Page::System, 0x80, |v| v & 0xfc)?;
    bus.update(Page::System, 0x80, |v| v | source)?;
    Ok(())
}

/// Point the video check block at the MIPI debug stream.
pub fn select_check_source<B: RegisterBus>(bus: &mut B) -> Result<()> {
    const MIPI_DEBUG: u8 = 0x05;
    let current = bus.read(Page::Check, 0x80)?;
    bus.write(Page::Check, 0x3f, current & 0xf8)?;
    bus.write(Page::Check, 0x3f, MIPI_DEBUG)?;
    Ok(())
}

/// Select the MIPI receiver as the active input path.
pub fn select_active_rx<B: RegisterBus>(bus: &mut B) -> Result<()> {
    bus.update(Page::Digital, 0x30, |v| v & 0xf8)?;
    bus.update(Page::Digital, 0x30, |v| v | 0x01)?;
    bus.update(Page::Digital, 0x30, |v| v | 0x10)?;
    Ok(())
}

/// Route the line SRAM to the transmit path.
pub fn select_tx_sram<B: RegisterBus>(bus: &mut B) -> Result<()> {
    bus.update(Page::Digital, 0x30, |v| v & 0x3f)?;
    bus.update(Page::Digital, 0x30, |v| v | 0x40)?;
    Ok(())
}

/// Latch control bit of the frequency-meter tap register.
const FM_LATCH: u8 = 0x80;

/// Settling time before the meter's count is trusted.
const FM_SETTLE_MS: u32 = 5;

/// Measure one of the [`fm_clk`] taps; returns kHz.
///
/// The meter free-runs after the tap is selected; latching freezes the
/// 20-bit count for readout.
pub fn measure_clock<B, D>(bus: &mut B, delay: &mut D, tap: u8) -> Result<u32>
where
    B: RegisterBus,
    D: DelayNs,
{
    bus.write(Page::Check, 0x90, tap)?;
    delay.delay_ms(FM_SETTLE_MS);
    bus.write(Page::Check, 0x90, tap | FM_LATCH)?;

    let mut khz = (bus.read(Page::Check, 0x98)? & 0x0f) as u32;
    khz = (khz << 8) + bus.read(Page::Check, 0x99)? as u32;
    khz = (khz << 8) + bus.read(Page::Check, 0x9a)? as u32;

    bus.write(Page::Check, 0x90, tap & !FM_LATCH)?;
    Ok(khz)
}
