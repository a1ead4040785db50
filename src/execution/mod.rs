pub mod gateway;
pub mod intent;
pub mod sequencer;

use std::fmt;

pub use gateway::{ExchangeGateway, GatewayError, GatewayProvider, GatewayResult, PositionMode};
pub use intent::PositionIntent;
pub use sequencer::OrderSequencer;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AbortReason {
    SymbolUnavailable,
    EntryRejected,
    VolumeFilter,
    InvalidIntent,
    ExchangeError,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureReason {
    PositionNotOpened,
    TpPlacementFailed,
    TpCountMismatch,
    ExchangeError,
}

/// Terminal result of one execution attempt.
///
/// `Aborted` means nothing reached the book. `ClosedOnFailure` means an
/// entry may have been filled and a reduce-only close was submitted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutionOutcome {
    Opened,
    OpenedWithDegradedProtection,
    Aborted(AbortReason),
    ClosedOnFailure(FailureReason),
}

impl ExecutionOutcome {
    /// True when a position is expected to remain open
    pub fn is_open(&self) -> bool {
        matches!(self, Self::Opened | Self::OpenedWithDegradedProtection)
    }
}

impl fmt::Display for AbortReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::SymbolUnavailable => "symbol_unavailable",
            Self::EntryRejected => "entry_rejected",
            Self::VolumeFilter => "volume_filter",
            Self::InvalidIntent => "invalid_intent",
            Self::ExchangeError => "exchange_error",
        };
        f.write_str(s)
    }
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::PositionNotOpened => "position_not_opened",
            Self::TpPlacementFailed => "tp_placement_failed",
            Self::TpCountMismatch => "tp_count_mismatch",
            Self::ExchangeError => "exchange_error",
        };
        f.write_str(s)
    }
}

impl fmt::Display for ExecutionOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Opened => f.write_str("opened"),
            Self::OpenedWithDegradedProtection => f.write_str("opened_with_degraded_protection"),
            Self::Aborted(reason) => write!(f, "aborted: {}", reason),
            Self::ClosedOnFailure(reason) => write!(f, "closed_on_failure: {}", reason),
        }
    }
}
