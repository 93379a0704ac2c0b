//! Side effects produced by a single FSM/engine tick. The tick functions
//! themselves never perform I/O; the driver in `core::mod` turns these into
//! HTTP queue pushes and UDP event-outbox datagrams. Keeping I/O out of the
//! tick functions is what makes them unit-testable without a network.

use crate::core::ids::GroupId;
use crate::core::severity::{Action, Reason, Severity};

#[derive(Debug, Clone, PartialEq)]
pub enum AlarmSignal {
    Alarm,
    Log,
    Degrade,
}

#[derive(Debug, Clone, PartialEq)]
pub enum MaintenanceEvent {
    DegradeRaise,
    DegradeClear,
    Reset,
    PowerCycle,
    HwmonMinor,
    HwmonMajor,
    HwmonCritical,
    HwmonClear,
    HwmonConfig,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Effect {
    /// Assert or clear one of {alarm, log, degrade} for a sensor, with the
    /// enumerated reason phrase. `clear` beats `assert` when both occur in
    /// one pass (§4.5 conflict rule) — the engine only ever emits one Effect
    /// per (sensor, signal) per tick, already resolved.
    SensorSignal {
        sensor: String,
        signal: AlarmSignal,
        assert: bool,
        severity: Option<Severity>,
        reason: Reason,
    },
    /// A group-level alarm (propagated `failed`/`alarmed` state).
    GroupSignal {
        group: GroupId,
        assert: bool,
        reason: Reason,
    },
    /// Emitted to the maintenance-agent UDP outbox (§6).
    Maintenance {
        event: MaintenanceEvent,
        hostname: String,
        sensor: Option<String>,
    },
    /// An operator changed a severity action; informational log only.
    ActionChanged {
        sensor: String,
        severity: Severity,
        from: Option<Action>,
        to: Option<Action>,
    },
}
