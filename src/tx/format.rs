//! Output format programming: sync mode, color format, lane mapping and the
//! final transmit-side reset.
//!
//! Pure register sequencing; nothing here polls. The format is fixed for
//! this design: VESA data order, RGB at 8 bit per component, sync-timing
//! mode on a 4-lane dual-port output.

use crate::bus::{Page, RegisterBus};
use crate::error::Result;
use embedded_hal::delay::DelayNs;

const RESET_HOLD_MS: u32 = 2;

fn select_ports<B: RegisterBus>(bus: &mut B) -> Result<()> {
    bus.update(Page::Digital, 0x6f, |v| v | 0x90)?;
    Ok(())
}

fn set_video_format<B: RegisterBus>(bus: &mut B) -> Result<()> {
    bus.update(Page::Digital, 0x6e, |v| v & 0xf7)?; // sync-timing mode
    bus.update(Page::Digital, 0x6f, |v| v & 0xbf)?; // VESA data order
    bus.update(Page::Digital, 0x6f, |v| v | 0x04)?; // RGB, 8 bit per component
    bus.write(Page::Digital, 0x68, 0x00)?; // sync interleave off
    Ok(())
}

fn map_lanes<B: RegisterBus>(bus: &mut B) -> Result<()> {
    bus.write_sequence(
        Page::Digital,
        &[
            (0x4a, 0x01), // hl swap enable, port 0 sources from port A
            (0x4b, 0x00),
            (0x4c, 0x10),
            (0x4d, 0x20),
            (0x4e, 0x50),
            (0x4f, 0x30),
            (0x50, 0x46), // port 1 source select
            (0x51, 0x10),
            (0x52, 0x20),
            (0x53, 0x50),
            (0x54, 0x30),
            (0x55, 0x00),
            (0x56, 0x20),
        ],
    )
}

fn swap_ports<B: RegisterBus>(bus: &mut B) -> Result<()> {
    bus.write(Page::Digital, 0x4a, 0x01)?;
    bus.update(Page::Digital, 0x50, |v| v & 0x40)?;
    Ok(())
}

fn soft_reset<B, D>(bus: &mut B, delay: &mut D) -> Result<()>
where
    B: RegisterBus,
    D: DelayNs,
{
    bus.write(Page::System, 0x08, 0x6f)?;
    delay.delay_ms(RESET_HOLD_MS);
    bus.write(Page::System, 0x08, 0x7f)?;
    Ok(())
}

/// Program the fixed output format and pulse the transmit-side reset.
pub fn configure<B, D>(bus: &mut B, delay: &mut D) -> Result<()>
where
    B: RegisterBus,
    D: DelayNs,
{
    select_ports(bus)?;
    set_video_format(bus)?;
    map_lanes(bus)?;
    swap_ports(bus)?;
    soft_reset(bus, delay)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::mock::{MockBus, NoopDelay};

    #[test]
    fn format_bits_land() {
        let mut bus = MockBus::new();
        bus.set(Page::Digital, 0x6e, 0xff);
        bus.set(Page::Digital, 0x6f, 0xff);
        configure(&mut bus, &mut NoopDelay).unwrap();

        assert_eq!(bus.get(Page::Digital, 0x6e) & 0x08, 0); // sync mode
        assert_eq!(bus.get(Page::Digital, 0x6f) & 0x40, 0); // VESA
        assert_eq!(bus.get(Page::Digital, 0x6f) & 0x04, 0x04); // 8-bit RGB
        assert_eq!(bus.get(Page::Digital, 0x68), 0x00); // interleave off
    }

    #[test]
    fn lane_map_and_swap() {
        let mut bus = MockBus::new();
        configure(&mut bus, &mut NoopDelay).unwrap();
        assert_eq!(bus.get(Page::Digital, 0x4a), 0x01);
        // port swap keeps only the port-1 source bit
        assert_eq!(bus.get(Page::Digital, 0x50), 0x40);
    }

    #[test]
    fn reset_is_released() {
        let mut bus = MockBus::new();
        configure(&mut bus, &mut NoopDelay).unwrap();
        assert_eq!(bus.get(Page::System, 0x08), 0x7f);
    }
}
