//! MIPI receive front end: PHY bring-up, digital path configuration and the
//! input timing probe.

pub mod pcr;

use crate::bus::{Page, RegisterBus};
use crate::error::Result;
use crate::timing::{PixelFormat, RawInputTiming, VideoTiming};
use crate::Config;

/// Power on the receive PHY for port A.
pub fn power_on_phy<B: RegisterBus>(bus: &mut B, config: &Config) -> Result<()> {
    // Non-4-lane setups OR the lane count into the decoder's lane register.
    let mut lane_cfg = bus.read(Page::MipiRx, 0x00)?;
    if config.lanes != 4 {
        lane_cfg |= config.lanes;
    }
    bus.write(Page::MipiRx, 0x00, lane_cfg)?;

    // Both ports down while the analog front end is reconfigured.
    bus.write(Page::Analog, 0x01, 0x11)?;

    bus.write_sequence(
        Page::Analog,
        &[
            (0x18, 0x48), // port A clk delay select 0
            (0x01, 0x91), // port A enable
            (0x02, 0x00), // mipi mode, no swap
            (0x03, 0xee), // port A/B eq current reference
            (0x09, 0x21), // link clk from port A, clk2pll off
            (0x04, 0x44),
            (0x05, 0xc4), // port A clk lane eq
            (0x06, 0x44),
            (0x13, 0x0c), // clk lane rterm + high speed enable
        ],
    )?;
    if config.burst {
        bus.write(Page::Analog, 0x13, 0x00)?;
    }

    bus.write_sequence(
        Page::MipiRx,
        &[
            (0x01, 0x00), // data lane term enable time 39 ns
            (0x02, 0x0e), // hs settle
            (0x05, 0x00), // clk lane term enable time 39 ns
            (0x0a, 0x59),
            (0x0b, 0x20),
        ],
    )?;

    // dphy reset pulse
    bus.write(Page::System, 0x09, 0xde)?;
    bus.write(Page::System, 0x09, 0xdf)?;
    Ok(())
}

/// Route the system and video-check clocks for MIPI input.
pub fn select_clocks<B: RegisterBus>(bus: &mut B) -> Result<()> {
    bus.write(Page::Digital, 0xe9, 0x88)?; // sys clk from XTAL
    bus.write_sequence(
        Page::System,
        &[
            (0x80, 0x51), // sram rd/wr clock sources, check clk from pixel clk
            (0x81, 0x10), // byte clk from port A, pixel clk from recovery pll
        ],
    )?;
    bus.write(Page::Check, 0x32, 0x03)?; // check window: 3 frames
    Ok(())
}

/// Configure the digital receive path: input select and lane sources.
pub fn configure_digital<B: RegisterBus>(bus: &mut B) -> Result<()> {
    bus.write_sequence(
        Page::MipiRx,
        &[
            (0x04, 0x00), // DSI input
            (0x21, 0x46), // pcr adjust tracks hsync level
        ],
    )?;
    bus.write_sequence(
        Page::Digital,
        &[
            (0x3f, 0x08), // HS/LP control command enable
            (0x40, 0x04), // port A ch0..ch3 sources
            (0x41, 0x03),
            (0x42, 0x02),
            (0x43, 0x01),
            (0x45, 0x04), // port B ch0..ch3 sources
            (0x46, 0x03),
            (0x47, 0x02),
            (0x48, 0x01),
            (0x44, 0x00), // port A output select + ch4
            (0x49, 0x00), // port B output select + ch4
        ],
    )?;
    Ok(())
}

/// Read the decoder's raw view of the input stream.
///
/// The per-lane start-of-transmission counters are read first; they are
/// diagnostic only and never feed the signal decision.
pub fn read_input_timing<B: RegisterBus>(bus: &mut B) -> Result<RawInputTiming> {
    let mut sot = [0u8; 8];
    bus.read_bulk(Page::MipiRx, 0x88, &mut sot)?;

    // widen hs settle before sampling the counters
    bus.write(Page::MipiRx, 0x02, 0x0a)?;

    let mut raw = [0u8; 5];
    bus.read_bulk(Page::MipiRx, 0x82, &mut raw)?;
    let lane_status = bus.read(Page::MipiRx, 0x9c)?;

    let word_count = u16::from_be_bytes([raw[0], raw[1]]);
    let format = PixelFormat::from_code(raw[2] & 0x0f);
    let timing = RawInputTiming {
        word_count,
        hactive: format.active_pixels(word_count),
        vactive: u16::from_be_bytes([raw[3], raw[4]]),
        format,
        lane_status,
    };
    debug!(
        "probe: wc={} hact={} vact={} lane_status={:x}",
        timing.word_count,
        timing.hactive,
        timing.vactive,
        timing.lane_status
    );
    Ok(timing)
}

/// Probe the input stream, failing when nothing plausible is present.
pub fn probe_input_timing<B: RegisterBus>(bus: &mut B) -> Result<RawInputTiming> {
    let timing = read_input_timing(bus)?;
    timing.require_signal()?;
    Ok(timing)
}

/// Program the selected mode's full timing into the receive front end.
pub fn apply_timing<B: RegisterBus>(bus: &mut B, t: &VideoTiming) -> Result<()> {
    bus.write_sequence(
        Page::MipiRx,
        &[
            (0x0d, (t.vtotal >> 8) as u8),
            (0x0e, t.vtotal as u8),
            (0x0f, (t.vactive >> 8) as u8),
            (0x10, t.vactive as u8),
            (0x15, t.vsync_len as u8),
            (0x17, (t.vfront_porch >> 8) as u8),
            (0x18, t.vfront_porch as u8),
            (0x11, (t.htotal >> 8) as u8),
            (0x12, t.htotal as u8),
            (0x13, (t.hactive >> 8) as u8),
            (0x14, t.hactive as u8),
            (0x4c, t.hsync_len as u8),
            (0x19, (t.hfront_porch >> 8) as u8),
            (0x1a, t.hfront_porch as u8),
        ],
    )
}
