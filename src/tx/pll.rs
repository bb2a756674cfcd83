//! Output (TX) PLL: divider derivation, programming and lock calibration.
//!
//! The serializer runs at 7/2 × the pixel clock in the dual-port output
//! configuration; all divider selection below follows from that one ratio.

use crate::bus::{Page, RegisterBus};
use crate::error::{Error, Result};
use bitflags::bitflags;
use embedded_hal::delay::DelayNs;

bitflags! {
    /// TX PLL calibration and lock status.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct TxPllStatus: u8 {
        /// Last calibration round completed
        const CAL_DONE = 1 << 0;
        /// PLL is locked to the reference
        const LOCKED = 1 << 2;
    }
}

/// Derived output-PLL settings for one pixel clock.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct TxPllConfig {
    /// Serializer clock, kHz (pixel clock × 7/2)
    pub phy_clk_khz: u32,
    /// Pre-divider register code
    pub pre_div_code: u8,
    /// Pre-divider ratio
    pub pre_div: u32,
    /// Serial-clock divider register code
    pub serial_div_code: u8,
    /// Serial-clock divider ratio
    pub serial_div: u32,
    /// Pixel-clock divider bucket code
    pub pixel_div_code: u8,
    /// Final divider-set value
    pub divider_set: u8,
}

impl TxPllConfig {
    /// Derive all divider settings for `pclk_khz`.
    ///
    /// `pclk_khz` must be non-zero; callers gate on the frequency meter
    /// before deriving.
    pub fn derive(pclk_khz: u32) -> Self {
        let phy_clk_khz = pclk_khz * 7 / 2;
        let (pre_div_code, pre_div) = pre_divider(pclk_khz);
        let (serial_div_code, serial_div) = serial_clock_divider(phy_clk_khz);
        let pixel_div_code = pixel_divider_code(pclk_khz, phy_clk_khz, serial_div);
        let divider_set = (phy_clk_khz * serial_div / (pclk_khz / pre_div)) as u8;
        Self {
            phy_clk_khz,
            pre_div_code,
            pre_div,
            serial_div_code,
            serial_div,
            pixel_div_code,
            divider_set,
        }
    }
}

/// Pre-divider from the pixel clock, ascending bands.
pub fn pre_divider(pclk_khz: u32) -> (u8, u32) {
    if pclk_khz < 20_000 {
        (0x28, 1)
    } else if pclk_khz < 40_000 {
        (0x28, 1)
    } else if pclk_khz < 80_000 {
        (0x29, 2)
    } else if pclk_khz < 160_000 {
        (0x2a, 4)
    } else if pclk_khz < 320_000 {
        (0x2b, 8)
    } else {
        (0x2f, 16)
    }
}

/// Serial-clock divider from the serializer clock, descending bands.
pub fn serial_clock_divider(phy_clk_khz: u32) -> (u8, u32) {
    if phy_clk_khz >= 640_000 {
        (0x42, 1)
    } else if phy_clk_khz >= 320_000 {
        (0x02, 2)
    } else if phy_clk_khz >= 160_000 {
        (0x12, 4)
    } else if phy_clk_khz >= 80_000 {
        (0x22, 8)
    } else {
        (0x32, 16)
    }
}

/// Pixel-clock divider bucket.
///
/// Below 150 MHz a fixed VCO/3.5 tap is used; above, the ratio of the
/// serializer rate to the pixel rate picks one of the /7, /14, /28, /56
/// buckets.
pub fn pixel_divider_code(pclk_khz: u32, phy_clk_khz: u32, serial_div: u32) -> u8 {
    if pclk_khz < 150_000 {
        return 0x04;
    }
    let ratio = phy_clk_khz * serial_div * 2 / (pclk_khz * 7);
    if ratio <= 2 {
        0x00 // /7
    } else if ratio <= 4 {
        0x01 // /14
    } else if ratio <= 8 {
        0x02 // /28
    } else {
        0x03 // /56
    }
}

/// Select the recovered pixel clock as the PLL reference, normal work mode.
pub fn select_reference<B: RegisterBus>(bus: &mut B) -> Result<()> {
    bus.write(Page::Analog, 0x30, 0x00)
}

/// Program the derived divider settings.
pub fn configure<B: RegisterBus>(bus: &mut B, cfg: &TxPllConfig) -> Result<()> {
    // dual-port output: htotal must divide evenly across the ports
    bus.update(Page::Digital, 0x6f, |v| v | 0x01)?;
    bus.write(Page::Analog, 0x31, cfg.pre_div_code)?;
    bus.write(Page::Analog, 0x32, cfg.serial_div_code)?;
    bus.write(Page::Analog, 0x33, cfg.pixel_div_code)?;
    bus.write(Page::Analog, 0x34, 0x01)?; // divider-set software output enable
    bus.write(Page::Analog, 0x35, cfg.divider_set)?;
    Ok(())
}

/// Calibration rounds and per-round settling time.
const CAL_ROUNDS: u8 = 4;
const CAL_SETTLE_MS: u32 = 20;

/// Reset the PLL, run bounded calibration rounds, then require lock.
pub fn calibrate<B, D>(bus: &mut B, delay: &mut D) -> Result<()>
where
    B: RegisterBus,
    D: DelayNs,
{
    bus.write(Page::System, 0x0c, 0xfe)?; // pll reset
    delay.delay_ms(1);
    bus.write(Page::System, 0x0c, 0xff)?;

    for _ in 0..CAL_ROUNDS {
        bus.write_sequence(Page::TxPll, &[(0x0f, 0x00), (0x0f, 0x01)])?;
        delay.delay_ms(CAL_SETTLE_MS);
        let status = TxPllStatus::from_bits_truncate(bus.read(Page::TxPll, 0x39)?);
        if status.contains(TxPllStatus::CAL_DONE) {
            break;
        }
    }

    let status = TxPllStatus::from_bits_truncate(bus.read(Page::TxPll, 0x39)?);
    if status.contains(TxPllStatus::LOCKED) {
        info!("tx pll locked");
        Ok(())
    } else {
        warn!("tx pll unlocked");
        Err(Error::Unlocked)
    }
}
