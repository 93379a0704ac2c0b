//! Severity and action enums, and the compile-time table of which actions are
//! legal for which severity (§3 invariants, §9 REDESIGN FLAGS: "action encoded
//! as string" -> small enum + compile-time legality table).

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default, Serialize, Deserialize)]
pub enum Severity {
    #[default]
    Good,
    Minor,
    Major,
    Critical,
    NonRecoverable,
    Offline,
}

impl Severity {
    /// The engine treats `NonRecoverable` like `Critical` for action-dispatch purposes (§4.5).
    pub fn for_action_dispatch(self) -> Severity {
        match self {
            Severity::NonRecoverable => Severity::Critical,
            other => other,
        }
    }

    /// Derive a severity from the raw BMC status token (§4.5).
    pub fn from_bmc_status(token: &str) -> Severity {
        match token {
            "ok" => Severity::Good,
            "nc" | "lnc" | "unc" => Severity::Major,
            "cr" | "lcr" | "ucr" => Severity::Critical,
            "nr" | "lnr" | "unr" => Severity::NonRecoverable,
            "na" | "ns" => Severity::Offline,
            _ => Severity::Minor,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Action {
    Ignore,
    Log,
    Alarm,
    Reset,
    PowerCycle,
}

impl Action {
    /// Legal actions for a given severity (§3: reset/power-cycle only legal for `critical`).
    pub fn legal_for(severity: Severity) -> &'static [Action] {
        use Action::*;
        match severity {
            Severity::Critical => &[Ignore, Log, Alarm, Reset, PowerCycle],
            _ => &[Ignore, Log, Alarm],
        }
    }

    pub fn is_legal_for(self, severity: Severity) -> bool {
        Self::legal_for(severity).contains(&self)
    }
}

impl Action {
    /// Inverse of [`Display`]: parse the wire token used in PATCH bodies.
    pub fn from_wire(s: &str) -> Option<Action> {
        match s {
            "ignore" => Some(Action::Ignore),
            "log" => Some(Action::Log),
            "alarm" => Some(Action::Alarm),
            "reset" => Some(Action::Reset),
            "power-cycle" => Some(Action::PowerCycle),
            _ => None,
        }
    }
}

impl std::fmt::Display for Action {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Action::Ignore => "ignore",
            Action::Log => "log",
            Action::Alarm => "alarm",
            Action::Reset => "reset",
            Action::PowerCycle => "power-cycle",
        };
        write!(f, "{s}")
    }
}

/// Alarm/log reason phrases, grounded in `hwmonAlarm.h`'s `REASON_*` constants.
/// Never construct a free-form reason string outside this set (§4.5, §7).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reason {
    OutOfTolerance,
    Resetting,
    PowerCycling,
    Offline,
    Online,
    Suppressed,
    Unsuppressed,
    Ignored,
    Deprovisioned,
    Ok,
    Degraded,
    SetTo(Action),
}

impl std::fmt::Display for Reason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Reason::OutOfTolerance => write!(f, "is 'out-of-tolerance'"),
            Reason::Resetting => write!(f, "is 'resetting'"),
            Reason::PowerCycling => write!(f, "is 'power-cycling'"),
            Reason::Offline => write!(f, "is 'offline'"),
            Reason::Online => write!(f, "is 'online'"),
            Reason::Suppressed => write!(f, "is 'suppressed'"),
            Reason::Unsuppressed => write!(f, "is 'unsuppressed'"),
            Reason::Ignored => write!(f, "is 'ignored'"),
            Reason::Deprovisioned => write!(f, "is 'deprovisioned'"),
            Reason::Ok => write!(f, "is 'ok'"),
            Reason::Degraded => write!(f, "is 'degraded'"),
            Reason::SetTo(action) => write!(f, "severity level action set to '{action}'"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_token_maps_to_expected_severity() {
        assert_eq!(Severity::from_bmc_status("ok"), Severity::Good);
        assert_eq!(Severity::from_bmc_status("lnc"), Severity::Major);
        assert_eq!(Severity::from_bmc_status("ucr"), Severity::Critical);
        assert_eq!(Severity::from_bmc_status("unr"), Severity::NonRecoverable);
        assert_eq!(Severity::from_bmc_status("ns"), Severity::Offline);
        assert_eq!(Severity::from_bmc_status("garbage"), Severity::Minor);
    }

    #[test]
    fn reset_and_power_cycle_only_legal_for_critical() {
        assert!(!Action::Reset.is_legal_for(Severity::Minor));
        assert!(!Action::PowerCycle.is_legal_for(Severity::Major));
        assert!(Action::Reset.is_legal_for(Severity::Critical));
        assert!(Action::PowerCycle.is_legal_for(Severity::Critical));
    }

    #[test]
    fn non_recoverable_dispatches_like_critical() {
        assert_eq!(Severity::NonRecoverable.for_action_dispatch(), Severity::Critical);
    }
}
