//! LVDS transmit front end: PHY power sequencing and SRAM routing.

pub mod format;
pub mod pll;

use crate::bus::{Page, RegisterBus};
use crate::error::Result;
use crate::system;

/// Power down the transmit PHY, both ports.
pub fn power_off_phy<B: RegisterBus>(bus: &mut B) -> Result<()> {
    bus.write_sequence(Page::Analog, &[(0x36, 0x00), (0x37, 0x00)])
}

/// Power up the transmit PHY for dual-port output and pulse its reset.
pub fn power_on_phy<B: RegisterBus>(bus: &mut B) -> Result<()> {
    bus.write_sequence(
        Page::Analog,
        &[
            (0x36, 0x03), // lvds enable, both ports
            (0x37, 0x44), // port rterm enable
            (0x38, 0x14),
            (0x39, 0x31),
            (0x3a, 0xc8),
            (0x3b, 0x00),
            (0x3c, 0x0f),
            // lane drive defaults
            (0x46, 0x40),
            (0x47, 0x40),
            (0x48, 0x40),
            (0x49, 0x40),
            (0x4a, 0x40),
            (0x4b, 0x40),
            (0x4c, 0x40),
            (0x4d, 0x40),
            (0x4e, 0x40),
            (0x4f, 0x40),
            (0x50, 0x40),
            (0x51, 0x40),
        ],
    )?;
    bus.write(Page::System, 0x03, 0xbf)?; // tx reset
    bus.write(Page::System, 0x03, 0xff)?; // release
    Ok(())
}

/// Route the line SRAM to the transmit path and power the PHY.
pub fn configure_source<B: RegisterBus>(bus: &mut B) -> Result<()> {
    system::select_tx_sram(bus)?;
    power_on_phy(bus)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::mock::MockBus;

    #[test]
    fn power_off_disables_both_ports() {
        let mut bus = MockBus::new();
        bus.set(Page::Analog, 0x36, 0x03);
        power_off_phy(&mut bus).unwrap();
        assert_eq!(bus.get(Page::Analog, 0x36), 0x00);
        assert_eq!(bus.get(Page::Analog, 0x37), 0x00);
    }

    #[test]
    fn source_config_routes_sram_and_powers_up() {
        let mut bus = MockBus::new();
        bus.set(Page::Digital, 0x30, 0xbf);
        configure_source(&mut bus).unwrap();
        // sram select: bits 7:6 cleared then bit 6 set
        assert_eq!(bus.get(Page::Digital, 0x30) & 0xc0, 0x40);
        assert_eq!(bus.get(Page::Analog, 0x36), 0x03);
        assert_eq!(bus.get(Page::System, 0x03), 0xff);
    }
}
