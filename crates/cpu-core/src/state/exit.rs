//! Exit reasons a host can observe after a bounded execution call.

/// Why the last `run` call returned control to the host.
///
/// The stored reason is consumed exactly once: reading it resets the field
/// to [`ExitReason::Normal`]. The engine's internal wish to re-check
/// interrupt state mid-loop is not representable here; it never leaves the
/// run loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub enum ExitReason {
    /// The cycle budget was exhausted and nothing notable happened.
    #[default]
    Normal,
    /// The engine yielded early so the host can perform non-CPU work.
    Async,
    /// A `HLT` instruction retired and the CPU is quiescent.
    Hlt,
}

impl ExitReason {
    /// Returns `true` for the neutral, nothing-notable reason.
    #[must_use]
    pub const fn is_normal(self) -> bool {
        matches!(self, Self::Normal)
    }
}

#[cfg(test)]
mod tests {
    use super::ExitReason;

    #[test]
    fn default_reason_is_normal() {
        assert_eq!(ExitReason::default(), ExitReason::Normal);
        assert!(ExitReason::Normal.is_normal());
    }

    #[test]
    fn non_neutral_reasons_are_not_normal() {
        assert!(!ExitReason::Async.is_normal());
        assert!(!ExitReason::Hlt.is_normal());
    }
}
