//! Video timing model: packed pixel formats, the supported-mode table and
//! mode matching.
//!
//! The input decoder reports active video as a byte count per line
//! (word count); [`PixelFormat`] carries the rational factor that turns
//! that into a pixel count. Probed (width, height, rate) triples are then
//! matched against [`SUPPORTED_MODES`], which supplies the porch and sync
//! geometry the front end is programmed with.

use crate::error::{Error, Result};

/// Packed pixel format codes reported by the input decoder.
///
/// Each format maps to a fixed word-count → pixel-count conversion factor.
/// Codes the decoder can emit but the table does not know fall back to the
/// 24 bit-per-pixel factor instead of failing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum PixelFormat {
    /// YUV 4:2:2, 10 bit per component
    Yuv422Bpc10,
    /// YUV 4:2:2, 12 bit per component
    Yuv422Bpc12,
    /// YUV 4:2:2, 8 bit per component
    Yuv422Bpc8,
    /// RGB, 10 bit per component
    RgbBpc10,
    /// RGB, 12 bit per component
    RgbBpc12,
    /// YUV 4:2:0, 8 bit per component
    Yuv420Bpc8,
    /// RGB 565
    Rgb565,
    /// RGB, 6 bit per component, packed
    RgbBpc6,
    /// RGB, 6 bit per component, loosely packed
    RgbBpc6Loose,
    /// RGB, 8 bit per component
    Rgb888,
    /// Raw bayer, 8 bit
    Raw8,
    /// Raw bayer, 10 bit
    Raw10,
    /// Raw bayer, 12 bit
    Raw12,
    /// Unrecognized format code
    Unknown,
}

impl PixelFormat {
    /// Decode the low nibble of the decoder's format register.
    pub fn from_code(code: u8) -> Self {
        match code {
            // 0x0e is the CSI variant of the same packing
            0x01 | 0x0e => Self::Yuv422Bpc10,
            0x02 => Self::Yuv422Bpc12,
            0x03 => Self::Yuv422Bpc8,
            0x04 => Self::RgbBpc10,
            0x05 => Self::RgbBpc12,
            0x06 => Self::Yuv420Bpc8,
            0x07 => Self::Rgb565,
            0x08 => Self::RgbBpc6,
            0x09 => Self::RgbBpc6Loose,
            0x0a => Self::Rgb888,
            0x0b => Self::Raw8,
            0x0c => Self::Raw10,
            0x0d => Self::Raw12,
            _ => Self::Unknown,
        }
    }

    /// Word-count → pixel-count factor as (numerator, denominator).
    pub const fn pixel_factor(self) -> (u32, u32) {
        match self {
            Self::Yuv422Bpc10 => (5, 2),
            Self::Yuv422Bpc12 => (1, 3),
            Self::Yuv422Bpc8 => (1, 2),
            Self::RgbBpc10 => (15, 4),
            Self::RgbBpc12 => (9, 2),
            Self::Yuv420Bpc8 => (1, 3),
            Self::Rgb565 => (1, 2),
            Self::RgbBpc6 | Self::RgbBpc6Loose => (9, 4),
            Self::Rgb888 => (1, 3),
            Self::Raw8 => (1, 1),
            Self::Raw10 => (5, 4),
            Self::Raw12 => (3, 2),
            // 24 bpp fallback
            Self::Unknown => (1, 3),
        }
    }

    /// Active pixels per line for a reported word count.
    pub fn active_pixels(self, word_count: u16) -> u16 {
        let (num, den) = self.pixel_factor();
        (word_count as u32 * num / den) as u16
    }
}

/// Full timing geometry of one video mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct VideoTiming {
    /// Horizontal front porch, pixels
    pub hfront_porch: u16,
    /// Horizontal sync length, pixels
    pub hsync_len: u16,
    /// Horizontal back porch, pixels
    pub hback_porch: u16,
    /// Active pixels per line
    pub hactive: u16,
    /// Total pixels per line
    pub htotal: u16,
    /// Vertical front porch, lines
    pub vfront_porch: u16,
    /// Vertical sync length, lines
    pub vsync_len: u16,
    /// Vertical back porch, lines
    pub vback_porch: u16,
    /// Active lines per frame
    pub vactive: u16,
    /// Total lines per frame
    pub vtotal: u16,
    /// Nominal refresh rate, Hz
    pub frame_rate: u8,
}

impl VideoTiming {
    /// Pixel clock in kHz at the given refresh rate.
    pub const fn pixel_clock_khz(&self, frame_rate: u8) -> u32 {
        self.htotal as u32 * self.vtotal as u32 * frame_rate as u32 / 1000
    }
}

const fn mode(
    hfront_porch: u16,
    hsync_len: u16,
    hback_porch: u16,
    hactive: u16,
    htotal: u16,
    vfront_porch: u16,
    vsync_len: u16,
    vback_porch: u16,
    vactive: u16,
    vtotal: u16,
    frame_rate: u8,
) -> VideoTiming {
    VideoTiming {
        hfront_porch,
        hsync_len,
        hback_porch,
        hactive,
        htotal,
        vfront_porch,
        vsync_len,
        vback_porch,
        vactive,
        vtotal,
        frame_rate,
    }
}

/// Supported input modes. Table order is match priority: for entries that
/// share a resolution, the first one inside the rate window wins.
pub static SUPPORTED_MODES: &[VideoTiming] = &[
    mode(24, 96, 40, 640, 800, 33, 2, 10, 480, 525, 60),        // 640x480 @ 60
    mode(16, 62, 60, 720, 858, 9, 6, 30, 480, 525, 60),         // 720x480 @ 60
    mode(12, 64, 88, 720, 864, 5, 5, 39, 576, 625, 50),         // 720x576 @ 50
    mode(48, 128, 88, 800, 1056, 1, 4, 23, 600, 628, 60),       // 800x600 @ 60
    mode(110, 40, 220, 1280, 1650, 5, 5, 20, 720, 750, 30),     // 1280x720 @ 30
    mode(440, 40, 220, 1280, 1980, 5, 5, 20, 720, 750, 50),     // 1280x720 @ 50
    mode(110, 40, 220, 1280, 1650, 5, 5, 20, 720, 750, 60),     // 1280x720 @ 60
    mode(24, 136, 160, 1024, 1344, 3, 6, 29, 768, 806, 60),     // 1024x768 @ 60
    mode(26, 110, 110, 1366, 1592, 13, 6, 13, 768, 800, 60),    // 1366x768 @ 60
    mode(110, 40, 220, 1280, 1650, 5, 5, 20, 720, 750, 30),     // 1280x720 @ 30
    mode(48, 32, 80, 1920, 2080, 5, 5, 20, 720, 750, 60),       // 1920x720 @ 60
    mode(48, 112, 248, 1280, 1688, 1, 3, 38, 1024, 1066, 60),   // 1280x1024 @ 60
    mode(88, 44, 148, 1920, 2200, 4, 5, 36, 1080, 1125, 30),    // 1920x1080 @ 30
    mode(88, 44, 148, 1920, 2200, 4, 5, 36, 1080, 1125, 60),    // 1920x1080 @ 60
    mode(88, 44, 148, 1920, 2200, 4, 5, 36, 1080, 1125, 90),    // 1920x1080 @ 90
    mode(64, 192, 304, 1600, 2160, 1, 3, 46, 1200, 1250, 60),   // 1600x1200 @ 60
    mode(48, 32, 80, 1920, 2080, 3, 6, 26, 1200, 1235, 60),     // 1920x1200 @ 60
    mode(32, 48, 80, 2048, 2208, 6, 3, 28, 1280, 1317, 60),     // 2048x1280 @ 60
    mode(50, 48, 80, 2304, 2482, 6, 3, 32, 1440, 1481, 60),     // 2304x1440 @ 60
    mode(48, 32, 80, 2560, 2720, 3, 5, 33, 1440, 1481, 60),     // 2560x1440 @ 60
    mode(1276, 88, 296, 3840, 5500, 8, 10, 72, 2160, 2250, 24), // 3840x2160 @ 24
];

/// Mode published upstream before (and regardless of) a successful probe:
/// 1920x1080 @ 60, 148.5 MHz.
pub const DEFAULT_MODE: VideoTiming = mode(88, 44, 148, 1920, 2200, 4, 5, 36, 1080, 1125, 60);

/// Raw view of the input stream, one snapshot per probe attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct RawInputTiming {
    /// Payload bytes per active line as reported by the decoder
    pub word_count: u16,
    /// Active pixels per line, derived from the word count
    pub hactive: u16,
    /// Active lines per frame
    pub vactive: u16,
    /// Packed pixel format
    pub format: PixelFormat,
    /// Lane high-speed/low-power status, diagnostic
    pub lane_status: u8,
}

impl RawInputTiming {
    /// Anything below this, in either axis, is noise rather than video.
    pub const NOISE_FLOOR: u16 = 400;

    /// Whether the snapshot plausibly describes active video.
    pub fn has_signal(&self) -> bool {
        self.hactive >= Self::NOISE_FLOOR && self.vactive >= Self::NOISE_FLOOR
    }

    /// Fail with [`Error::NoSignal`] when below the noise floor.
    pub fn require_signal(&self) -> Result<()> {
        if self.has_signal() {
            Ok(())
        } else {
            Err(Error::NoSignal)
        }
    }
}

/// A table mode plus the measured rate it was matched at.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct ResolvedTiming {
    /// The matched table entry
    pub mode: VideoTiming,
    /// Measured refresh rate at match time, Hz
    pub frame_rate: u8,
    /// Pixel clock derived from the measured rate, kHz
    pub pclk_khz: u32,
}

/// Acceptable deviation between measured and nominal refresh rate, Hz.
const RATE_WINDOW: u8 = 3;

/// Find the first supported mode matching the probed geometry and rate.
///
/// The pixel clock of the result is derived from the measured rate so that
/// small source deviations carry through to the clock-recovery math.
pub fn select_mode(hactive: u16, vactive: u16, frame_rate: u8) -> Option<ResolvedTiming> {
    SUPPORTED_MODES
        .iter()
        .find(|m| {
            m.hactive == hactive
                && m.vactive == vactive
                && m.frame_rate.abs_diff(frame_rate) <= RATE_WINDOW
        })
        .map(|m| ResolvedTiming {
            mode: *m,
            frame_rate,
            pclk_khz: m.pixel_clock_khz(frame_rate),
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pixel_factors_match_packing() {
        assert_eq!(PixelFormat::from_code(0x0c).active_pixels(1000), 1250); // RAW10
        assert_eq!(PixelFormat::from_code(0x0a).active_pixels(5760), 1920); // RGB 8bpc
        assert_eq!(PixelFormat::from_code(0x03).active_pixels(3840), 1920); // YUV422 8bpc
        assert_eq!(PixelFormat::from_code(0x0b).active_pixels(1280), 1280); // RAW8
        assert_eq!(PixelFormat::from_code(0x08).active_pixels(400), 900); // RGB 6bpc
    }

    #[test]
    fn csi_yuv422_shares_the_dsi_factor() {
        assert_eq!(
            PixelFormat::from_code(0x0e),
            PixelFormat::from_code(0x01)
        );
    }

    #[test]
    fn unknown_codes_fall_back_to_24bpp() {
        let fmt = PixelFormat::from_code(0x0f);
        assert_eq!(fmt, PixelFormat::Unknown);
        assert_eq!(fmt.active_pixels(5760), 1920);
    }

    #[test]
    fn match_prefers_table_order() {
        // the table holds 1920x1080 entries at 30, 60 and 90 Hz; 59 only
        // fits the 60 Hz window, and that entry precedes the 90 Hz one
        let resolved = select_mode(1920, 1080, 59).unwrap();
        assert_eq!(resolved.mode.frame_rate, 60);
        assert_eq!(resolved.mode.htotal, 2200);
        assert_eq!(resolved.frame_rate, 59);
        // pixel clock comes from the measured rate, not the nominal one
        assert_eq!(resolved.pclk_khz, 2200 * 1125 * 59 / 1000);
    }

    #[test]
    fn match_respects_rate_window() {
        assert!(select_mode(1920, 1080, 57).is_some());
        assert!(select_mode(1920, 1080, 87).is_some());
        assert!(select_mode(1920, 1080, 50).is_none());
    }

    #[test]
    fn no_match_below_floor() {
        for rate in [0, 24, 30, 50, 60, 90] {
            assert!(select_mode(100, 100, rate).is_none());
        }
    }

    #[test]
    fn noise_floor_rejects_small_geometry() {
        let raw = RawInputTiming {
            word_count: 300,
            hactive: 100,
            vactive: 100,
            format: PixelFormat::Rgb888,
            lane_status: 0,
        };
        assert_eq!(raw.require_signal(), Err(Error::NoSignal));
    }

    #[test]
    fn default_mode_is_1080p60() {
        assert_eq!(DEFAULT_MODE.hactive, 1920);
        assert_eq!(DEFAULT_MODE.vactive, 1080);
        assert_eq!(DEFAULT_MODE.pixel_clock_khz(DEFAULT_MODE.frame_rate), 148_500);
    }
}
