//! Bridge error types

use core::fmt;

/// Bridge operation result type
pub type Result<T> = core::result::Result<T, Error>;

/// Bridge error types
///
/// Everything except [`Error::Gpio`] is recoverable by retrying the
/// bring-up stage that produced it; the state machine never treats any of
/// these as fatal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Error {
    /// No plausible active video present on the input
    NoSignal,
    /// Measured resolution/rate not in the supported mode table
    NoMatch,
    /// Clock recovery did not converge within its iteration budget
    Unstable,
    /// Output PLL did not lock within its calibration rounds
    Unlocked,
    /// Register transport failure
    Transport,
    /// Reset line could not be driven
    Gpio,
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NoSignal => write!(f, "no input video detected"),
            Self::NoMatch => write!(f, "input timing not in the supported mode table"),
            Self::Unstable => write!(f, "clock recovery did not stabilize"),
            Self::Unlocked => write!(f, "output PLL did not lock"),
            Self::Transport => write!(f, "register transport error"),
            Self::Gpio => write!(f, "reset line error"),
        }
    }
}
