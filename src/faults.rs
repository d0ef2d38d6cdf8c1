//! Programmable fault injection.
//!
//! An [`ErrorCondition`] is registered with the [`ErrorSimulator`], which
//! evaluates its trigger on every processed command until it fires, then
//! evaluates its recovery until it clears. Every activation and recovery
//! is appended to the simulator's history.

use chrono::{DateTime, Local};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::Serialize;
use std::str::FromStr;
use std::time::{Duration, Instant};
use tracing::{debug, info};

use crate::error::EmulatorError;
use crate::protocol::CommandType;

pub const OFFLINE: &str = "offline";
pub const PAPER_OUT: &str = "paper_out";
pub const PAPER_JAM: &str = "paper_jam";
pub const TIMEOUT: &str = "timeout";
pub const CONNECTION_ERROR: &str = "connection_error";
pub const RESET: &str = "reset";

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Trigger {
    Immediate,
    AfterCommands(u64),
    AfterTime(Duration),
    /// Probability per processed command, 0.0..=1.0
    Random(f64),
}

impl Trigger {
    fn label(&self) -> &'static str {
        match self {
            Trigger::Immediate => "immediate",
            Trigger::AfterCommands(_) => "after_commands",
            Trigger::AfterTime(_) => "after_time",
            Trigger::Random(_) => "random",
        }
    }

    fn value(&self) -> Option<f64> {
        match self {
            Trigger::Immediate => None,
            Trigger::AfterCommands(n) => Some(*n as f64),
            Trigger::AfterTime(d) => Some(d.as_secs_f64()),
            Trigger::Random(p) => Some(*p),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecoveryCondition {
    ElapsedSinceActivation(Duration),
    CommandsSinceActivation(u64),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Recovery {
    /// Cleared only by removing the condition.
    Manual,
    /// Cleared once the condition's duration has passed since activation.
    Auto,
    Conditional(RecoveryCondition),
}

impl Recovery {
    fn label(&self) -> &'static str {
        match self {
            Recovery::Manual => "manual",
            Recovery::Auto => "auto",
            Recovery::Conditional(_) => "conditional",
        }
    }
}

/// What the recovery predicate gets to look at.
#[derive(Debug, Clone, Copy)]
pub struct RecoveryContext {
    pub elapsed_since_activation: Duration,
    pub commands_since_activation: u64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ErrorCondition {
    pub error_type: String,
    pub trigger: Trigger,
    pub duration: Option<Duration>,
    pub recovery: Recovery,
}

impl ErrorCondition {
    pub fn new(error_type: impl Into<String>, trigger: Trigger) -> Self {
        Self {
            error_type: error_type.into(),
            trigger,
            duration: None,
            recovery: Recovery::Manual,
        }
    }

    pub fn with_duration(mut self, duration: Duration) -> Self {
        self.duration = Some(duration);
        self
    }

    pub fn with_recovery(mut self, recovery: Recovery) -> Self {
        self.recovery = recovery;
        self
    }

    pub fn should_trigger(&self, command_count: u64, elapsed: Duration, rng: &mut impl Rng) -> bool {
        match self.trigger {
            Trigger::Immediate => true,
            Trigger::AfterCommands(n) => command_count >= n,
            Trigger::AfterTime(after) => elapsed >= after,
            Trigger::Random(p) => rng.random::<f64>() < p,
        }
    }

    pub fn should_recover(&self, ctx: &RecoveryContext) -> bool {
        match self.recovery {
            Recovery::Manual => false,
            Recovery::Auto => self
                .duration
                .is_some_and(|d| ctx.elapsed_since_activation >= d),
            Recovery::Conditional(RecoveryCondition::ElapsedSinceActivation(d)) => {
                ctx.elapsed_since_activation >= d
            }
            Recovery::Conditional(RecoveryCondition::CommandsSinceActivation(n)) => {
                ctx.commands_since_activation >= n
            }
        }
    }

    pub fn snapshot(&self) -> ConditionSnapshot {
        ConditionSnapshot {
            trigger_type: self.trigger.label(),
            trigger_value: self.trigger.value(),
            duration: self.duration.map(|d| d.as_secs_f64()),
            recovery_type: self.recovery.label(),
        }
    }
}

/// Parses `error_type[:trigger[=value]][:duration_secs]`, e.g.
/// `paper_out:after_commands=5` or `timeout:random=0.1:2`.
/// A duration makes the condition recover on its own.
impl FromStr for ErrorCondition {
    type Err = EmulatorError;

    fn from_str(spec: &str) -> Result<Self, Self::Err> {
        let invalid = |reason: &str| EmulatorError::InvalidFault {
            spec: spec.to_string(),
            reason: reason.to_string(),
        };

        let mut parts = spec.split(':');
        let error_type = parts.next().unwrap_or_default().trim();
        if error_type.is_empty() {
            return Err(invalid("missing error type"));
        }

        let trigger = match parts.next().map(str::trim) {
            None | Some("") | Some("immediate") => Trigger::Immediate,
            Some(trigger) => {
                let (name, value) = trigger
                    .split_once('=')
                    .ok_or_else(|| invalid("trigger needs a value, e.g. after_commands=5"))?;
                match name {
                    "after_commands" => Trigger::AfterCommands(
                        value.parse().map_err(|_| invalid("command count must be an integer"))?,
                    ),
                    "after_time" => Trigger::AfterTime(parse_secs(value).ok_or_else(|| invalid("bad seconds"))?),
                    "random" => {
                        let p: f64 = value.parse().map_err(|_| invalid("bad probability"))?;
                        if !(0.0..=1.0).contains(&p) {
                            return Err(invalid("probability must be within 0..=1"));
                        }
                        Trigger::Random(p)
                    }
                    _ => return Err(invalid("unknown trigger")),
                }
            }
        };

        let mut condition = ErrorCondition::new(error_type, trigger);
        if let Some(duration) = parts.next() {
            let duration = parse_secs(duration).ok_or_else(|| invalid("bad duration"))?;
            condition = condition.with_duration(duration).with_recovery(Recovery::Auto);
        }
        if parts.next().is_some() {
            return Err(invalid("too many fields"));
        }
        Ok(condition)
    }
}

fn parse_secs(value: &str) -> Option<Duration> {
    let secs: f64 = value.trim().parse().ok()?;
    Duration::try_from_secs_f64(secs).ok()
}

pub fn offline_error(trigger: Trigger) -> ErrorCondition {
    ErrorCondition::new(OFFLINE, trigger)
}

pub fn paper_out_error(trigger: Trigger) -> ErrorCondition {
    ErrorCondition::new(PAPER_OUT, trigger)
}

pub fn timeout_error(probability: f64, duration: Duration) -> ErrorCondition {
    ErrorCondition::new(TIMEOUT, Trigger::Random(probability))
        .with_duration(duration)
        .with_recovery(Recovery::Auto)
}

pub fn connection_error(after: Duration, duration: Duration) -> ErrorCondition {
    ErrorCondition::new(CONNECTION_ERROR, Trigger::AfterTime(after))
        .with_duration(duration)
        .with_recovery(Recovery::Auto)
}

/// Fires `interval` after start and clears `duration` after firing.
pub fn intermittent_error(error_type: &str, interval: Duration, duration: Duration) -> ErrorCondition {
    ErrorCondition::new(error_type, Trigger::AfterTime(interval))
        .with_duration(duration)
        .with_recovery(Recovery::Conditional(RecoveryCondition::ElapsedSinceActivation(duration)))
}

/// Condition fields recorded alongside each history entry.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ConditionSnapshot {
    pub trigger_type: &'static str,
    pub trigger_value: Option<f64>,
    pub duration: Option<f64>,
    pub recovery_type: &'static str,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorAction {
    Activated,
    Recovered,
}

#[derive(Debug, Clone, Serialize)]
pub struct ErrorEvent {
    pub timestamp: DateTime<Local>,
    pub error_type: String,
    pub action: ErrorAction,
    pub condition: ConditionSnapshot,
}

#[derive(Debug, Clone)]
struct Registered {
    condition: ErrorCondition,
    // (when, command count) at activation
    activated: Option<(Instant, u64)>,
}

/// Fault types that changed during one `process` call.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProcessOutcome {
    pub activated: Vec<String>,
    pub recovered: Vec<String>,
}

#[derive(Debug)]
pub struct ErrorSimulator {
    conditions: Vec<Registered>,
    // Activated by `trigger_error` with no registered condition behind them
    forced: Vec<ErrorCondition>,
    history: Vec<ErrorEvent>,
    command_count: u64,
    start_time: Instant,
    rng: StdRng,
}

impl Default for ErrorSimulator {
    fn default() -> Self {
        Self::new(None)
    }
}

impl ErrorSimulator {
    /// A fixed seed makes `random` triggers reproducible.
    pub fn new(seed: Option<u64>) -> Self {
        let rng = match seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_os_rng(),
        };
        Self {
            conditions: Vec::new(),
            forced: Vec::new(),
            history: Vec::new(),
            command_count: 0,
            start_time: Instant::now(),
            rng,
        }
    }

    /// Registers a condition, replacing any with the same error type.
    /// Replacing an active condition is recorded as its recovery; returns
    /// whether that happened.
    pub fn add_condition(&mut self, condition: ErrorCondition) -> bool {
        info!("Added error condition: {}", condition.error_type);
        let entry = Registered {
            condition,
            activated: None,
        };
        let replaced = match self
            .conditions
            .iter_mut()
            .find(|r| r.condition.error_type == entry.condition.error_type)
        {
            Some(existing) => Some(std::mem::replace(existing, entry)),
            None => {
                self.conditions.push(entry);
                None
            }
        };
        match replaced {
            Some(old) if old.activated.is_some() => {
                self.record(&old.condition, ErrorAction::Recovered);
                true
            }
            _ => false,
        }
    }

    /// Unregisters a condition and drops a forced activation of the same
    /// type. Dropping an active one counts as a manual recovery; returns
    /// whether anything active was dropped.
    pub fn remove_condition(&mut self, error_type: &str) -> bool {
        let mut dropped = Vec::new();
        if let Some(pos) = self
            .conditions
            .iter()
            .position(|r| r.condition.error_type == error_type)
        {
            let removed = self.conditions.remove(pos);
            info!("Removed error condition: {}", error_type);
            if removed.activated.is_some() {
                dropped.push(removed.condition);
            }
        }
        let (forced, kept): (Vec<_>, Vec<_>) = std::mem::take(&mut self.forced)
            .into_iter()
            .partition(|c| c.error_type == error_type);
        self.forced = kept;
        dropped.extend(forced);

        for condition in &dropped {
            self.record(condition, ErrorAction::Recovered);
        }
        !dropped.is_empty()
    }

    /// Activates `error_type` regardless of its trigger. An unregistered
    /// type is activated through a throwaway immediate condition; it is not
    /// listed by [`conditions`](Self::conditions) and stays active until
    /// removed or recovered by [`recover_all`](Self::recover_all).
    pub fn trigger_error(&mut self, error_type: &str) {
        let now = Instant::now();
        let count = self.command_count;
        match self
            .conditions
            .iter_mut()
            .find(|r| r.condition.error_type == error_type)
        {
            Some(registered) => {
                registered.activated = Some((now, count));
                let condition = registered.condition.clone();
                self.record(&condition, ErrorAction::Activated);
            }
            None => {
                let transient = ErrorCondition::new(error_type, Trigger::Immediate);
                self.record(&transient, ErrorAction::Activated);
                if !self.forced.iter().any(|c| c.error_type == error_type) {
                    self.forced.push(transient);
                }
            }
        }
    }

    /// Recovers every active fault at once, recording each recovery.
    /// Activated conditions are unregistered so they cannot fire again.
    /// Returns the recovered types.
    pub fn recover_all(&mut self) -> Vec<String> {
        let mut recovered: Vec<ErrorCondition> = Vec::new();
        self.conditions.retain(|registered| {
            if registered.activated.is_some() {
                recovered.push(registered.condition.clone());
                false
            } else {
                true
            }
        });
        recovered.append(&mut self.forced);

        for condition in &recovered {
            self.record(condition, ErrorAction::Recovered);
        }
        recovered.into_iter().map(|c| c.error_type).collect()
    }

    pub fn clear_all(&mut self) {
        self.conditions.clear();
        self.forced.clear();
        info!("Cleared all error conditions");
    }

    /// Counts one command and evaluates triggers, then recoveries. Returns
    /// the first fault that activated.
    pub fn process(&mut self, command_type: CommandType) -> Option<String> {
        self.process_at(command_type, Instant::now())
            .activated
            .into_iter()
            .next()
    }

    pub fn process_at(&mut self, command_type: CommandType, now: Instant) -> ProcessOutcome {
        self.command_count += 1;
        let count = self.command_count;
        let elapsed = now.saturating_duration_since(self.start_time);
        debug!(command = %command_type, count, "evaluating fault triggers");

        let mut outcome = ProcessOutcome::default();
        let mut fired = Vec::new();
        for registered in self.conditions.iter_mut().filter(|r| r.activated.is_none()) {
            if registered.condition.should_trigger(count, elapsed, &mut self.rng) {
                registered.activated = Some((now, count));
                fired.push(registered.condition.clone());
            }
        }
        for condition in fired {
            self.record(&condition, ErrorAction::Activated);
            outcome.activated.push(condition.error_type);
        }

        let mut recovered = Vec::new();
        self.conditions.retain(|registered| {
            let Some((at, at_count)) = registered.activated else {
                return true;
            };
            let ctx = RecoveryContext {
                elapsed_since_activation: now.saturating_duration_since(at),
                commands_since_activation: count - at_count,
            };
            if registered.condition.should_recover(&ctx) {
                recovered.push(registered.condition.clone());
                false
            } else {
                true
            }
        });
        for condition in recovered {
            self.record(&condition, ErrorAction::Recovered);
            outcome.recovered.push(condition.error_type);
        }

        outcome
    }

    fn record(&mut self, condition: &ErrorCondition, action: ErrorAction) {
        match action {
            ErrorAction::Activated => info!("Activated error: {}", condition.error_type),
            ErrorAction::Recovered => info!("Recovered from error: {}", condition.error_type),
        }
        self.history.push(ErrorEvent {
            timestamp: Local::now(),
            error_type: condition.error_type.clone(),
            action,
            condition: condition.snapshot(),
        });
    }

    /// Registered conditions, fired or not.
    pub fn conditions(&self) -> Vec<ErrorCondition> {
        self.conditions.iter().map(|r| r.condition.clone()).collect()
    }

    /// Fault types that have fired and not yet recovered, forced ones
    /// included.
    pub fn active_errors(&self) -> Vec<String> {
        let mut active: Vec<String> = self
            .conditions
            .iter()
            .filter(|r| r.activated.is_some())
            .map(|r| r.condition.error_type.clone())
            .collect();
        for condition in &self.forced {
            if !active.contains(&condition.error_type) {
                active.push(condition.error_type.clone());
            }
        }
        active
    }

    pub fn is_active(&self, error_type: &str) -> bool {
        self.forced.iter().any(|c| c.error_type == error_type)
            || self
                .conditions
                .iter()
                .any(|r| r.activated.is_some() && r.condition.error_type == error_type)
    }

    pub fn history(&self) -> &[ErrorEvent] {
        &self.history
    }

    pub fn command_count(&self) -> u64 {
        self.command_count
    }

    pub fn reset(&mut self) {
        self.conditions.clear();
        self.forced.clear();
        self.history.clear();
        self.command_count = 0;
        self.start_time = Instant::now();
        info!("Error simulator reset");
    }
}
