//! Bring-up state machine.
//!
//! Takes the bridge from reset to a verified output stream through an
//! ordered set of stages, re-entering earlier stages on measurable failure.
//! The machine never blocks on its own retries: a failing stage yields
//! [`Poll::Reschedule`] and expects the caller's deferred-work mechanism to
//! invoke [`Lt9211c::poll`] again after the delay. Stages that succeed chain
//! within a single `poll` call, so a clean first attempt runs reset-to-video
//! in one invocation.

use crate::bus::RegisterBus;
use crate::check;
use crate::error::{Error, Result};
use crate::rx::{self, pcr};
use crate::system::{self, check_clk, fm_clk};
use crate::timing::{self, PixelFormat, ResolvedTiming, VideoTiming, DEFAULT_MODE};
use crate::tx::{self, format, pll};
use crate::Config;
use embedded_hal::delay::DelayNs;
use embedded_hal::digital::OutputPin;

/// Bring-up stages, in forward order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum State {
    /// Reset the chip, identify it, power the input front end
    Prepare,
    /// Probe the input stream and match it against the mode table
    InputTimingConfig,
    /// Lock clock recovery onto the matched timing
    InputPllConfig,
    /// Derive and calibrate the output PLL from the recovered clock
    OutputConfigVideo,
    /// Verify the stream and program the output format
    OutputVideoOut,
}

/// What the caller should do after a poll.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Poll {
    /// Run [`Lt9211c::poll`] again after this delay.
    Reschedule {
        /// Delay before the next poll, milliseconds. Zero means "as soon
        /// as the scheduler permits", not "synchronously".
        delay_ms: u32,
    },
    /// Bring-up is complete; the output stream is live.
    Done,
}

enum Step {
    Advance,
    Yield(Poll),
}

/// Consecutive timing failures tolerated before a full re-prepare.
const MAX_TIMING_FAILURES: u8 = 30;

/// Stability reads after clock recovery converges. The outcome is logged
/// but never gates progression.
const STABILITY_SPIN: u32 = 50;

/// Reset line hold and post-release settling time.
const RESET_HOLD_MS: u32 = 60;

/// The bridge device: owns the register transport, reset line, delay
/// provider and all bring-up state.
pub struct Lt9211c<B, RST, D> {
    bus: B,
    reset: RST,
    delay: D,
    config: Config,
    state: State,
    timing_failures: u8,
    last_format: PixelFormat,
    resolved: Option<ResolvedTiming>,
}

impl<B, RST, D> Lt9211c<B, RST, D>
where
    B: RegisterBus,
    RST: OutputPin,
    D: DelayNs,
{
    /// Create the device in the [`State::Prepare`] stage. Nothing is
    /// touched until the first [`poll`](Self::poll).
    pub fn new(bus: B, reset: RST, delay: D, config: Config) -> Self {
        Self {
            bus,
            reset,
            delay,
            config,
            state: State::Prepare,
            timing_failures: 0,
            last_format: PixelFormat::Unknown,
            resolved: None,
        }
    }

    /// The mode published upstream for early display-pipeline negotiation,
    /// independent of what the probe later measures.
    pub fn preferred_mode(&self) -> &'static VideoTiming {
        &DEFAULT_MODE
    }

    /// The mode resolved by the last successful probe. Diagnostic only; it
    /// is not published upstream.
    pub fn resolved_timing(&self) -> Option<&ResolvedTiming> {
        self.resolved.as_ref()
    }

    /// Current bring-up stage.
    pub fn state(&self) -> State {
        self.state
    }

    /// Tear down, returning the owned resources.
    ///
    /// Callers stop scheduling [`poll`](Self::poll) first; once the last
    /// poll has returned there is no pending work to cancel.
    pub fn release(self) -> (B, RST, D) {
        (self.bus, self.reset, self.delay)
    }

    /// Run the bring-up machine until it needs the scheduler again.
    ///
    /// Successful stages chain within one call; only a failure (or
    /// completion) yields control. Drive this from deferred work: on
    /// [`Poll::Reschedule`] run it again after the delay, on
    /// [`Poll::Done`] stop.
    pub fn poll(&mut self) -> Poll {
        loop {
            match self.step() {
                Step::Advance => continue,
                Step::Yield(poll) => return poll,
            }
        }
    }

    fn step(&mut self) -> Step {
        match self.state {
            State::Prepare => {
                self.timing_failures = 0;
                match self.prepare() {
                    Ok(()) => {
                        self.state = State::InputTimingConfig;
                        Step::Advance
                    }
                    // Transport trouble this early leaves the front end
                    // half-configured; run the whole stage again.
                    Err(_) => Step::Yield(Poll::Reschedule { delay_ms: 0 }),
                }
            }
            State::InputTimingConfig => match self.acquire_input_timing() {
                Ok(resolved) => {
                    self.resolved = Some(resolved);
                    self.state = State::InputPllConfig;
                    Step::Advance
                }
                Err(e) => {
                    debug!("input timing not acquired: {}", e);
                    self.timing_failures = self.timing_failures.saturating_add(1);
                    if self.last_format == PixelFormat::Rgb888 {
                        // the expected format is arriving; the source just
                        // has not settled, so keep waiting for it
                        self.timing_failures = 0;
                    }
                    if self.timing_failures > MAX_TIMING_FAILURES {
                        warn!("input timing lost, re-preparing the chip");
                        self.state = State::Prepare;
                    }
                    Step::Yield(Poll::Reschedule { delay_ms: 0 })
                }
            },
            State::InputPllConfig => match self.configure_input_pll() {
                Ok(()) => {
                    self.wait_video_stable();
                    match tx::configure_source(&mut self.bus) {
                        Ok(()) => {
                            self.state = State::OutputConfigVideo;
                            Step::Advance
                        }
                        Err(_) => {
                            self.state = State::InputTimingConfig;
                            Step::Yield(Poll::Reschedule { delay_ms: 0 })
                        }
                    }
                }
                Err(e) => {
                    debug!("input pll config failed: {}", e);
                    self.state = State::InputTimingConfig;
                    Step::Yield(Poll::Reschedule { delay_ms: 0 })
                }
            },
            State::OutputConfigVideo => match self.configure_output_pll() {
                Ok(()) => {
                    self.state = State::OutputVideoOut;
                    Step::Advance
                }
                Err(e) => {
                    debug!("output pll config failed: {}", e);
                    Step::Yield(Poll::Reschedule { delay_ms: 0 })
                }
            },
            State::OutputVideoOut => {
                if let Err(e) = self.start_video_out() {
                    warn!("output format config failed: {}", e);
                }
                info!("video output live");
                Step::Yield(Poll::Done)
            }
        }
    }

    fn prepare(&mut self) -> Result<()> {
        self.reset_chip()?;
        let id = system::read_chip_id(&mut self.bus)?;
        info!("chip id {:x} {:x} {:x}", id[0], id[1], id[2]);

        rx::power_on_phy(&mut self.bus, &self.config)?;
        rx::select_clocks(&mut self.bus)?;
        system::select_check_clock(&mut self.bus, check_clk::MIPI_BYTE)?;
        system::select_check_source(&mut self.bus)?;
        system::select_active_rx(&mut self.bus)?;
        rx::configure_digital(&mut self.bus)?;
        tx::power_off_phy(&mut self.bus)?;
        Ok(())
    }

    fn reset_chip(&mut self) -> Result<()> {
        self.reset.set_low().map_err(|_| Error::Gpio)?;
        self.delay.delay_ms(RESET_HOLD_MS);
        self.reset.set_high().map_err(|_| Error::Gpio)?;
        self.delay.delay_ms(RESET_HOLD_MS);
        Ok(())
    }

    fn acquire_input_timing(&mut self) -> Result<ResolvedTiming> {
        let raw = rx::read_input_timing(&mut self.bus)?;
        // remembered across the failure path: the retry policy keys on the
        // format seen by the most recent probe
        self.last_format = raw.format;
        raw.require_signal()?;

        let rate = check::frame_rate(&mut self.bus)?;
        info!("input {}x{} at {} Hz", raw.hactive, raw.vactive, rate);

        let resolved =
            timing::select_mode(raw.hactive, raw.vactive, rate).ok_or(Error::NoMatch)?;
        rx::apply_timing(&mut self.bus, &resolved.mode)?;
        Ok(resolved)
    }

    fn configure_input_pll(&mut self) -> Result<()> {
        let resolved = self.resolved.ok_or(Error::NoMatch)?;
        pcr::configure_pll(&mut self.bus, &mut self.delay, resolved.pclk_khz)?;
        pcr::calibrate(
            &mut self.bus,
            &mut self.delay,
            resolved.pclk_khz,
            self.config.burst,
        )?;
        // the check block watches the recovered clock from here on
        system::select_check_clock(&mut self.bus, check_clk::DESSC_PIXEL)?;
        system::select_check_source(&mut self.bus)?;
        Ok(())
    }

    fn wait_video_stable(&mut self) {
        for _ in 0..=STABILITY_SPIN {
            if check::is_stable(&mut self.bus).unwrap_or(false) {
                info!("input video stable");
                return;
            }
        }
        // Not a gate: output configuration proceeds on the recovered clock
        // regardless.
        warn!("input video still unstable after {} reads", STABILITY_SPIN + 1);
    }

    fn configure_output_pll(&mut self) -> Result<()> {
        let pclk_khz =
            system::measure_clock(&mut self.bus, &mut self.delay, fm_clk::DESSC_PIXEL)?;
        if pclk_khz == 0 {
            // the meter saw nothing; the recovered clock is not running
            return Err(Error::Unlocked);
        }
        info!("recovered pixel clock {} kHz", pclk_khz);
        if let Some(resolved) = self.resolved.as_mut() {
            resolved.pclk_khz = pclk_khz;
        }

        pll::select_reference(&mut self.bus)?;
        let cfg = pll::TxPllConfig::derive(pclk_khz);
        pll::configure(&mut self.bus, &cfg)?;
        pll::calibrate(&mut self.bus, &mut self.delay)
    }

    fn start_video_out(&mut self) -> Result<()> {
        let measured = check::measure_timing(&mut self.bus, &mut self.delay)?;
        info!(
            "output timing {}x{} ({}x{} total)",
            measured.hactive,
            measured.vactive,
            measured.htotal,
            measured.vtotal
        );
        format::configure(&mut self.bus, &mut self.delay)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::mock::{MockBus, MockReset, NoopDelay};
    use crate::bus::Page;

    type Bridge = Lt9211c<MockBus, MockReset, NoopDelay>;

    fn bridge_with(bus: MockBus) -> Bridge {
        Lt9211c::new(bus, MockReset, NoopDelay, Config::default())
    }

    /// Register image of a healthy 1920x1080 @ 60 RGB888 source.
    fn healthy_bus() -> MockBus {
        let mut bus = MockBus::new();
        // probe burst: wc 5760 (1920 x 3 bytes), format RGB 8bpc, vact 1080
        bus.set(Page::MipiRx, 0x82, 0x16);
        bus.set(Page::MipiRx, 0x83, 0x80);
        bus.set(Page::MipiRx, 0x84, 0x0a);
        bus.set(Page::MipiRx, 0x85, 0x04);
        bus.set(Page::MipiRx, 0x86, 0x38);
        // frame-time counter: 25 MHz / 60 Hz
        bus.set(Page::Check, 0x43, 0x06);
        bus.set(Page::Check, 0x44, 0x5b);
        bus.set(Page::Check, 0x45, 0x9b);
        // clock recovery converges immediately
        bus.set(Page::MipiRx, 0x87, 0x18);
        // check block reports stable video
        bus.set(Page::Check, 0x40, 0x01);
        // frequency meter reads 148500 kHz
        bus.set(Page::Check, 0x98, 0x02);
        bus.set(Page::Check, 0x99, 0x44);
        bus.set(Page::Check, 0x9a, 0x14);
        // tx pll calibrates and locks on the first round
        bus.set(Page::TxPll, 0x39, 0x05);
        bus
    }

    #[test]
    fn healthy_source_completes_in_one_poll() {
        let mut bridge = bridge_with(healthy_bus());
        // every stage succeeds first try: one invocation chains through all
        // of them without an intermediate reschedule
        assert_eq!(bridge.poll(), Poll::Done);
        assert_eq!(bridge.state(), State::OutputVideoOut);

        let resolved = bridge.resolved_timing().unwrap();
        assert_eq!(resolved.mode.hactive, 1920);
        assert_eq!(resolved.frame_rate, 60);
        assert_eq!(resolved.pclk_khz, 148_500);

        let (bus, _, _) = bridge.release();
        // output pll programmed for 148.5 MHz
        assert_eq!(bus.get(Page::Analog, 0x31), 0x2a);
        assert_eq!(bus.get(Page::Analog, 0x32), 0x02);
        assert_eq!(bus.get(Page::Analog, 0x33), 0x04);
        assert_eq!(bus.get(Page::Analog, 0x35), 28);
        // output format programmed and reset released
        assert_eq!(bus.get(Page::Digital, 0x68), 0x00);
        assert_eq!(bus.get(Page::System, 0x08), 0x7f);
    }

    #[test]
    fn no_signal_reschedules_and_eventually_reprepares() {
        // all-zero registers: the probe sees nothing at all
        let mut bridge = bridge_with(MockBus::new());

        assert_eq!(bridge.poll(), Poll::Reschedule { delay_ms: 0 });
        assert_eq!(bridge.state(), State::InputTimingConfig);

        // failures 2..=30 keep retrying the probe in place
        for _ in 0..29 {
            assert_eq!(bridge.poll(), Poll::Reschedule { delay_ms: 0 });
            assert_eq!(bridge.state(), State::InputTimingConfig);
        }
        // failure 31 exceeds the budget and forces a full re-prepare
        assert_eq!(bridge.poll(), Poll::Reschedule { delay_ms: 0 });
        assert_eq!(bridge.state(), State::Prepare);
    }

    #[test]
    fn rgb888_probe_keeps_the_retry_counter_clear() {
        let mut bus = MockBus::new();
        // RGB 8bpc at 500x500: above the noise floor, matches no table
        // entry (and the frame counter reads zero)
        bus.set(Page::MipiRx, 0x82, 0x05);
        bus.set(Page::MipiRx, 0x83, 0xdc); // wc 1500 -> hact 500
        bus.set(Page::MipiRx, 0x84, 0x0a);
        bus.set(Page::MipiRx, 0x85, 0x01);
        bus.set(Page::MipiRx, 0x86, 0xf4); // vact 500
        let mut bridge = bridge_with(bus);

        // far beyond the 30-failure budget, yet never re-prepares: seeing
        // the expected format resets the counter every time
        for _ in 0..100 {
            assert_eq!(bridge.poll(), Poll::Reschedule { delay_ms: 0 });
            assert_eq!(bridge.state(), State::InputTimingConfig);
        }
    }

    #[test]
    fn pcr_failure_returns_to_timing_acquisition() {
        let mut bus = healthy_bus();
        bus.set(Page::MipiRx, 0x87, 0x00); // recovery never stabilizes
        let mut bridge = bridge_with(bus);

        assert_eq!(bridge.poll(), Poll::Reschedule { delay_ms: 0 });
        assert_eq!(bridge.state(), State::InputTimingConfig);
    }

    #[test]
    fn unlocked_output_pll_retries_in_place() {
        let mut bus = healthy_bus();
        bus.set(Page::TxPll, 0x39, 0x01); // calibration done, never locks
        let mut bridge = bridge_with(bus);

        assert_eq!(bridge.poll(), Poll::Reschedule { delay_ms: 0 });
        assert_eq!(bridge.state(), State::OutputConfigVideo);

        // stays in the output stage on further polls
        assert_eq!(bridge.poll(), Poll::Reschedule { delay_ms: 0 });
        assert_eq!(bridge.state(), State::OutputConfigVideo);
    }

    #[test]
    fn default_mode_is_published_before_any_probe() {
        let bridge = bridge_with(MockBus::new());
        let mode = bridge.preferred_mode();
        assert_eq!(mode.hactive, 1920);
        assert_eq!(mode.vactive, 1080);
        assert_eq!(mode.frame_rate, 60);
        assert!(bridge.resolved_timing().is_none());
    }
}
