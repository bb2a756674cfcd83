//! Paged register access
//!
//! The chip exposes a single 8-bit register space behind a page selector
//! register; the selector is global mutable state shared by every block in
//! the device. To keep that from leaking into callers, every operation here
//! takes the page explicitly and the transport reselects it before each
//! access — no component ever depends on what a previous caller left in the
//! selector.

use crate::error::{Error, Result};
use embedded_hal::i2c::I2c;

/// Register pages, named for the block that owns the bulk of each page.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(u8)]
pub enum Page {
    /// Chip identification, soft resets, system clock routing
    System = 0x81,
    /// Analog blocks: RX PHY, clock-recovery PLL, TX PLL, TX PHY drive
    Analog = 0x82,
    /// Digital top: RX/TX muxing, lane mapping, output format
    Digital = 0x85,
    /// Video check block and frequency meter
    Check = 0x86,
    /// TX PLL calibration control and status
    TxPll = 0x87,
    /// MIPI receive decoder and clock-recovery modulator
    MipiRx = 0xd0,
}

/// Synchronous access to the chip's paged register space.
///
/// All methods are infallible on the chip side; any error is a transport
/// failure and surfaces as [`Error::Transport`].
pub trait RegisterBus {
    /// Write one register on the given page.
    fn write(&mut self, page: Page, reg: u8, value: u8) -> Result<()>;

    /// Read one register on the given page.
    fn read(&mut self, page: Page, reg: u8) -> Result<u8>;

    /// Read consecutive registers on the given page.
    fn read_bulk(&mut self, page: Page, reg: u8, buf: &mut [u8]) -> Result<()>;

    /// Write a sequence of (register, value) pairs on one page, in order.
    fn write_sequence(&mut self, page: Page, seq: &[(u8, u8)]) -> Result<()> {
        for &(reg, value) in seq {
            self.write(page, reg, value)?;
        }
        Ok(())
    }

    /// Read-modify-write one register; returns the value written.
    fn update<F>(&mut self, page: Page, reg: u8, f: F) -> Result<u8>
    where
        F: FnOnce(u8) -> u8,
    {
        let value = f(self.read(page, reg)?);
        self.write(page, reg, value)?;
        Ok(value)
    }
}

/// Register holding the active page selector.
const PAGE_SELECT: u8 = 0xff;

/// Default 7-bit I2C address of the bridge.
pub const DEFAULT_ADDRESS: u8 = 0x2d;

/// [`RegisterBus`] adapter over an `embedded-hal` I2C bus.
///
/// Selects the page before every access; see the module docs for why the
/// selector is never cached.
pub struct I2cRegisterBus<I2C> {
    i2c: I2C,
    address: u8,
}

impl<I2C: I2c> I2cRegisterBus<I2C> {
    /// Wrap an I2C bus; `address` is the device's 7-bit address.
    pub fn new(i2c: I2C, address: u8) -> Self {
        Self { i2c, address }
    }

    /// Release the underlying bus.
    pub fn release(self) -> I2C {
        self.i2c
    }

    fn select(&mut self, page: Page) -> Result<()> {
        self.i2c
            .write(self.address, &[PAGE_SELECT, page as u8])
            .map_err(|_| Error::Transport)
    }

    fn raw_write(&mut self, reg: u8, value: u8) -> Result<()> {
        self.i2c
            .write(self.address, &[reg, value])
            .map_err(|_| Error::Transport)
    }
}

impl<I2C: I2c> RegisterBus for I2cRegisterBus<I2C> {
    fn write(&mut self, page: Page, reg: u8, value: u8) -> Result<()> {
        self.select(page)?;
        self.raw_write(reg, value)
    }

    fn read(&mut self, page: Page, reg: u8) -> Result<u8> {
        let mut buf = [0u8; 1];
        self.read_bulk(page, reg, &mut buf)?;
        Ok(buf[0])
    }

    fn read_bulk(&mut self, page: Page, reg: u8, buf: &mut [u8]) -> Result<()> {
        self.select(page)?;
        self.i2c
            .write_read(self.address, &[reg], buf)
            .map_err(|_| Error::Transport)
    }

    fn write_sequence(&mut self, page: Page, seq: &[(u8, u8)]) -> Result<()> {
        self.select(page)?;
        for &(reg, value) in seq {
            self.raw_write(reg, value)?;
        }
        Ok(())
    }
}

#[cfg(test)]
pub(crate) mod mock {
    //! Test doubles: an in-memory register model plus no-op pin and delay.

    use super::{Page, RegisterBus};
    use crate::error::Result;

    const PAGES: [Page; 6] = [
        Page::System,
        Page::Analog,
        Page::Digital,
        Page::Check,
        Page::TxPll,
        Page::MipiRx,
    ];

    /// Register model standing in for the chip in unit tests.
    pub(crate) struct MockBus {
        regs: [[u8; 256]; PAGES.len()],
    }

    impl MockBus {
        pub fn new() -> Self {
            Self {
                regs: [[0; 256]; PAGES.len()],
            }
        }

        fn index(page: Page) -> usize {
            PAGES.iter().position(|&p| p == page).unwrap()
        }

        pub fn set(&mut self, page: Page, reg: u8, value: u8) {
            self.regs[Self::index(page)][reg as usize] = value;
        }

        pub fn get(&self, page: Page, reg: u8) -> u8 {
            self.regs[Self::index(page)][reg as usize]
        }
    }

    impl RegisterBus for MockBus {
        fn write(&mut self, page: Page, reg: u8, value: u8) -> Result<()> {
            self.set(page, reg, value);
            Ok(())
        }

        fn read(&mut self, page: Page, reg: u8) -> Result<u8> {
            Ok(self.get(page, reg))
        }

        fn read_bulk(&mut self, page: Page, reg: u8, buf: &mut [u8]) -> Result<()> {
            for (i, b) in buf.iter_mut().enumerate() {
                *b = self.get(page, reg.wrapping_add(i as u8));
            }
            Ok(())
        }
    }

    pub(crate) struct NoopDelay;

    impl embedded_hal::delay::DelayNs for NoopDelay {
        fn delay_ns(&mut self, _ns: u32) {}
    }

    pub(crate) struct MockReset;

    impl embedded_hal::digital::ErrorType for MockReset {
        type Error = core::convert::Infallible;
    }

    impl embedded_hal::digital::OutputPin for MockReset {
        fn set_low(&mut self) -> core::result::Result<(), Self::Error> {
            Ok(())
        }

        fn set_high(&mut self) -> core::result::Result<(), Self::Error> {
            Ok(())
        }
    }
}
