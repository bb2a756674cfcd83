//! Clock recovery (PCR): reference divider selection, fractional modulator
//! programming and the closed-loop calibration that rate-matches the
//! recovered pixel clock to the input stream.

use crate::bus::{Page, RegisterBus};
use crate::error::{Error, Result};
use bitflags::bitflags;
use embedded_hal::delay::DelayNs;

bitflags! {
    /// PCR calibration status word.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct PcrStatus: u8 {
        /// Hsync-referenced stage has settled
        const HS_STABLE = 1 << 3;
        /// Data-enable-referenced stage has settled
        const DE_STABLE = 1 << 4;
    }
}

/// Power-of-two divider between the pixel clock and the recovery PLL
/// reference, selected by pixel-clock band.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct RefDivider {
    /// Divider-select register code
    pub code: u8,
    /// Numeric divide ratio
    pub ratio: u32,
    /// Lowest band only: an extra /2 stage on the pixel clock output
    pub half_rate: bool,
}

impl RefDivider {
    /// Select the divider band for a pixel clock, highest band first.
    pub const fn for_pixel_clock(pclk_khz: u32) -> Self {
        let (code, ratio, half_rate) = if pclk_khz >= 352_000 {
            (0x04, 2, false)
        } else if pclk_khz >= 176_000 {
            (0x04, 2, false)
        } else if pclk_khz >= 88_000 {
            (0x05, 4, false)
        } else if pclk_khz >= 44_000 {
            (0x06, 8, false)
        } else if pclk_khz >= 22_000 {
            (0x07, 16, false)
        } else {
            (0x07, 16, true)
        };
        Self {
            code,
            ratio,
            half_rate,
        }
    }
}

/// Fractional-modulator settings derived from the pixel clock.
///
/// The reference step is 25 MHz/1000: the divided pixel clock splits into
/// an integer multiplier M and a 24-bit-scaled fraction K, with a one-step
/// drift window around M.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct PcrParams {
    /// Integer multiplier
    pub m: u32,
    /// Fractional part, scaled into the 24-bit modulator field
    pub k: u32,
    /// M overflow limit (M + 1)
    pub up_limit: u32,
    /// M underflow limit (M - 1)
    pub down_limit: u32,
}

impl PcrParams {
    /// Derive M/K and the drift limits from the pixel clock and the chosen
    /// reference divider ratio.
    pub const fn derive(pclk_khz: u32, divider: u32) -> Self {
        let value = pclk_khz * divider / 25;
        let m = value / 1000;
        let k = (value % 1000) << 14;
        Self {
            m,
            k,
            up_limit: m + 1,
            down_limit: m.saturating_sub(1),
        }
    }
}

/// Pixel clocks below this use the long write-delay profile during
/// calibration.
const LOW_PIXEL_CLOCK_KHZ: u32 = 44_000;

/// Stability poll period and budget: the loop gives the chip ~25.5 s to
/// converge before the attempt is abandoned.
const STABLE_POLL_MS: u32 = 500;
const STABLE_POLL_LIMIT: u32 = 50;

/// Program the recovery PLL and its fractional modulator for `pclk_khz`,
/// finishing with the PLL reset pulse.
pub fn configure_pll<B, D>(bus: &mut B, delay: &mut D, pclk_khz: u32) -> Result<()>
where
    B: RegisterBus,
    D: DelayNs,
{
    bus.write_sequence(
        Page::Analog,
        &[
            (0x26, 0x20), // xtal reference, pll powered
            (0x27, 0x40), // prediv 1
        ],
    )?;

    let div = RefDivider::for_pixel_clock(pclk_khz);
    bus.write(Page::Analog, 0x2f, div.code)?;
    if div.half_rate {
        bus.write(Page::Analog, 0x2c, 0x01)?;
    }

    let params = PcrParams::derive(pclk_khz, div.ratio);
    program_modulator(bus, &params)?;

    // reset once the modulator is loaded, release after 1 ms
    bus.write(Page::System, 0x03, 0xfe)?;
    delay.delay_ms(1);
    bus.write(Page::System, 0x03, 0xff)?;
    Ok(())
}

fn program_modulator<B: RegisterBus>(bus: &mut B, p: &PcrParams) -> Result<()> {
    bus.write(Page::MipiRx, 0x08, 0x00)?; // modulator fed from mipi rx
    bus.write(Page::MipiRx, 0x26, 0x80 | p.m as u8)?;
    bus.write(Page::MipiRx, 0x2d, p.up_limit as u8)?;
    bus.write(Page::MipiRx, 0x31, p.down_limit as u8)?;
    bus.write(Page::MipiRx, 0x27, (p.k >> 16) as u8)?;
    bus.write(Page::MipiRx, 0x28, (p.k >> 8) as u8)?;
    bus.write(Page::MipiRx, 0x29, p.k as u8)?;
    // clear the setup bit, leaving M loaded
    bus.update(Page::MipiRx, 0x26, |v| v & 0x7f)?;
    Ok(())
}

/// Run the closed-loop calibration and poll until the recovered clock is
/// stable in both stages, or the budget runs out.
pub fn calibrate<B, D>(bus: &mut B, delay: &mut D, pclk_khz: u32, burst: bool) -> Result<()>
where
    B: RegisterBus,
    D: DelayNs,
{
    bus.write_sequence(
        Page::MipiRx,
        &[
            (0x0c, 0x60), // fifo position
            (0x1c, 0x60), // fifo position
            (0x24, 0x70), // pcr mode: de + hs + vs
            (0x2d, 0x30), // M overflow limit while calibrating
            (0x31, 0x0a), // M underflow limit while calibrating
            // stage 1, hsync referenced
            (0x25, 0xf0), // line limit
            (0x2a, 0x30), // step-in limit
            (0x21, 0x4f), // hs step
            (0x22, 0x00),
            // stage 2, hsync referenced
            (0x1e, 0x01), // first/second diff
            (0x23, 0x80), // hs step
            // stage 2, de referenced
            (0x0a, 0x02), // adjust pre line
            (0x38, 0x02), // de thresholds 1..4
            (0x39, 0x04),
            (0x3a, 0x08),
            (0x3b, 0x10),
            (0x3f, 0x04), // de steps 1..4
            (0x40, 0x08),
            (0x41, 0x10),
            (0x42, 0x20),
            (0x2b, 0xa0), // stable-out threshold
            // hand the M register over to hardware
            (0x26, 0x97),
            (0x26, 0x17),
            (0x27, 0x0f),
        ],
    )?;
    bus.write_sequence(
        Page::System,
        &[
            (0x20, 0xbf), // port B divider quirk
            (0x20, 0xff),
        ],
    )?;
    delay.delay_ms(5);
    bus.write(Page::System, 0x0b, 0x6f)?;
    bus.write(Page::System, 0x0b, 0xff)?;

    // slow, non-burst streams need the longer sram delays
    let dly = if pclk_khz < LOW_PIXEL_CLOCK_KHZ && !burst {
        0x60
    } else {
        0x40
    };
    bus.write_sequence(
        Page::MipiRx,
        &[
            (0x0c, dly),  // sram read delay
            (0x1b, 0x00), // write delay, high byte
            (0x1c, dly),  // write delay, low byte
        ],
    )?;

    // pcr reset, then release the modulator
    bus.write(Page::System, 0x09, 0xdb)?;
    bus.write(Page::System, 0x09, 0xdf)?;
    bus.write(Page::MipiRx, 0x08, 0x80)?;
    bus.write(Page::MipiRx, 0x08, 0x00)?;
    delay.delay_ms(10);

    for _ in 0..=STABLE_POLL_LIMIT {
        delay.delay_ms(STABLE_POLL_MS);
        let m = bus.read(Page::MipiRx, 0x94)? & 0x7f;
        let status = PcrStatus::from_bits_truncate(bus.read(Page::MipiRx, 0x87)?);
        if status.contains(PcrStatus::HS_STABLE | PcrStatus::DE_STABLE) {
            info!("pcr stable, m={}", m);
            return Ok(());
        }
        debug!("pcr settling, m={}", m);
    }
    warn!("pcr did not stabilize");
    Err(Error::Unstable)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::mock::{MockBus, NoopDelay};

    #[test]
    fn params_split_the_derived_value() {
        let p = PcrParams::derive(148_500, 2);
        assert_eq!(p.m, 11);
        assert_eq!(p.k, 880 << 14);
        assert_eq!(p.up_limit, 12);
        assert_eq!(p.down_limit, 10);
    }

    #[test]
    fn divider_bands_descend() {
        assert_eq!(RefDivider::for_pixel_clock(400_000).ratio, 2);
        assert_eq!(RefDivider::for_pixel_clock(352_000).ratio, 2);
        assert_eq!(RefDivider::for_pixel_clock(200_000).ratio, 2);
        assert_eq!(RefDivider::for_pixel_clock(148_500).ratio, 4);
        assert_eq!(RefDivider::for_pixel_clock(88_000).ratio, 4);
        assert_eq!(RefDivider::for_pixel_clock(50_000).ratio, 8);
        assert_eq!(RefDivider::for_pixel_clock(25_000).ratio, 16);
        assert_eq!(RefDivider::for_pixel_clock(10_000).ratio, 16);
    }

    #[test]
    fn lowest_band_enables_the_extra_half() {
        assert!(!RefDivider::for_pixel_clock(22_000).half_rate);
        assert!(RefDivider::for_pixel_clock(21_999).half_rate);
    }

    #[test]
    fn modulator_registers_carry_m_and_k() {
        let mut bus = MockBus::new();
        let p = PcrParams::derive(148_500, 2);
        program_modulator(&mut bus, &p).unwrap();
        assert_eq!(bus.get(Page::MipiRx, 0x26), 0x0b); // M, setup bit cleared
        assert_eq!(bus.get(Page::MipiRx, 0x2d), 12);
        assert_eq!(bus.get(Page::MipiRx, 0x31), 10);
        assert_eq!(bus.get(Page::MipiRx, 0x27), 0xdc); // 880 << 14 = 0x00dc_0000
        assert_eq!(bus.get(Page::MipiRx, 0x28), 0x00);
        assert_eq!(bus.get(Page::MipiRx, 0x29), 0x00);
    }

    #[test]
    fn calibration_succeeds_on_the_stable_mask() {
        let mut bus = MockBus::new();
        bus.set(Page::MipiRx, 0x87, 0x18);
        assert!(calibrate(&mut bus, &mut NoopDelay, 148_500, true).is_ok());
    }

    #[test]
    fn calibration_needs_both_stable_bits() {
        let mut bus = MockBus::new();
        bus.set(Page::MipiRx, 0x87, 0x08); // hs stage only
        assert_eq!(
            calibrate(&mut bus, &mut NoopDelay, 148_500, true),
            Err(Error::Unstable)
        );
    }

    #[test]
    fn slow_nonburst_streams_get_long_delays() {
        let mut bus = MockBus::new();
        bus.set(Page::MipiRx, 0x87, 0x18);
        calibrate(&mut bus, &mut NoopDelay, 30_000, false).unwrap();
        assert_eq!(bus.get(Page::MipiRx, 0x0c), 0x60);
        assert_eq!(bus.get(Page::MipiRx, 0x1c), 0x60);

        calibrate(&mut bus, &mut NoopDelay, 30_000, true).unwrap();
        assert_eq!(bus.get(Page::MipiRx, 0x0c), 0x40);

        calibrate(&mut bus, &mut NoopDelay, 148_500, false).unwrap();
        assert_eq!(bus.get(Page::MipiRx, 0x0c), 0x40);
    }
}
