//! # Signal Detector
//!
//! Turns the server's output lines into domain events. The server under test
//! has no machine-readable protocol, so recognition is driven by an ordered
//! table of declarative rules: each rule names the event it produces, the
//! pattern it matches and the unit of the number it captures. New log
//! phrasings are added to the table, never to the control flow.
//!
//! ## Ordering
//!
//! Rules are evaluated in table order and only against the phase the run is
//! in: ready rules while the server is not ready, compiled rules only after a
//! trigger was issued. A compiled line can therefore never be recognised
//! before the ready line, and each event fires at most once per run.

use regex::Regex;
use std::time::{Duration, Instant};
use tracing::{debug, trace};

use crate::cli::Variant;

/// Kind of event a rule produces
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SignalKind {
    Ready,
    Compiled,
}

/// Unit of the number captured by a rule's first group
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DurationUnit {
    Millis,
    Seconds,
}

impl DurationUnit {
    /// Convert a captured number into whole milliseconds
    pub fn to_millis(self, raw: &str) -> Option<u64> {
        let value: f64 = raw.parse().ok()?;
        if !value.is_finite() || value < 0.0 {
            return None;
        }
        let ms = match self {
            DurationUnit::Millis => value,
            DurationUnit::Seconds => value * 1000.0,
        };
        Some(ms.round() as u64)
    }
}

/// One pattern → extractor rule
#[derive(Clone, Debug)]
pub struct SignalRule {
    pub kind: SignalKind,
    pub pattern: Regex,
    /// `None` for rules that only recognise the event without a number
    pub unit: Option<DurationUnit>,
}

impl SignalRule {
    /// Build a rule from a pattern source. Patterns are compiled
    /// case-insensitively.
    pub fn new(
        kind: SignalKind,
        pattern: &str,
        unit: Option<DurationUnit>,
    ) -> Result<Self, regex::Error> {
        Ok(Self {
            kind,
            pattern: Regex::new(&format!("(?i){}", pattern))?,
            unit,
        })
    }

    /// Try the rule against a line.
    ///
    /// Returns `None` if the pattern does not match, `Some(None)` if it matched
    /// but no duration could be extracted.
    fn apply(&self, line: &str) -> Option<Option<u64>> {
        let captures = self.pattern.captures(line)?;
        let extracted = match self.unit {
            Some(unit) => captures
                .get(1)
                .and_then(|m| unit.to_millis(m.as_str())),
            None => None,
        };
        Some(extracted)
    }
}

/// The built-in rule table, in evaluation order.
pub fn default_rules() -> Vec<SignalRule> {
    let table: [(SignalKind, &str, Option<DurationUnit>); 6] = [
        (SignalKind::Ready, r"ready in ([0-9]+)ms", Some(DurationUnit::Millis)),
        (
            SignalKind::Ready,
            r"ready in ([0-9]+(?:\.[0-9]+)?)s",
            Some(DurationUnit::Seconds),
        ),
        (SignalKind::Ready, r"ready", None),
        (
            SignalKind::Compiled,
            r"compiled.*in ([0-9]+)ms",
            Some(DurationUnit::Millis),
        ),
        (
            SignalKind::Compiled,
            r"compiled.*in ([0-9]+(?:\.[0-9]+)?)s\b",
            Some(DurationUnit::Seconds),
        ),
        (SignalKind::Compiled, r"\bcompiled\b", None),
    ];

    table
        .into_iter()
        .map(|(kind, pattern, unit)| {
            SignalRule::new(kind, pattern, unit).expect("built-in rule table is valid")
        })
        .collect()
}

/// Forward-only progress of a run
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum Phase {
    NotReady,
    Ready,
    Triggered,
    Measured,
}

/// Mutable run-scoped detection state.
///
/// Written by the detector (ready, measured) and by the trigger controller
/// (triggered); read by the harness loop to decide success vs. timeout.
#[derive(Debug)]
pub struct DetectionState {
    phase: Phase,
    started_at: Instant,
    trigger_instant: Option<Instant>,
    measured_ms: Option<u64>,
}

impl DetectionState {
    pub fn new() -> Self {
        Self::starting_at(Instant::now())
    }

    pub fn starting_at(started_at: Instant) -> Self {
        Self {
            phase: Phase::NotReady,
            started_at,
            trigger_instant: None,
            measured_ms: None,
        }
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn server_ready(&self) -> bool {
        self.phase >= Phase::Ready
    }

    pub fn trigger_instant(&self) -> Option<Instant> {
        self.trigger_instant
    }

    pub fn measured_ms(&self) -> Option<u64> {
        self.measured_ms
    }

    pub fn elapsed_since_start(&self) -> Duration {
        self.started_at.elapsed()
    }

    /// `not-ready → ready`. Returns false if the state is already past it.
    pub fn mark_ready(&mut self) -> bool {
        self.advance(Phase::Ready)
    }

    /// `ready → triggered`, recording the mutation instant.
    pub fn mark_triggered(&mut self, at: Instant) -> bool {
        if self.phase != Phase::Ready {
            return false;
        }
        self.trigger_instant = Some(at);
        self.phase = Phase::Triggered;
        true
    }

    /// Record the terminal measurement. Only the first one sticks.
    pub fn mark_measured(&mut self, ms: u64) -> bool {
        if self.phase == Phase::Measured {
            return false;
        }
        self.measured_ms = Some(ms);
        self.phase = Phase::Measured;
        true
    }

    fn advance(&mut self, to: Phase) -> bool {
        if self.phase >= to {
            return false;
        }
        self.phase = to;
        true
    }
}

impl Default for DetectionState {
    fn default() -> Self {
        Self::new()
    }
}

/// Event emitted by the detector
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DetectionEvent {
    /// Server finished startup. `reported_ms` is whatever the line carried;
    /// `elapsed_ms` is wall-clock time since launch.
    Ready {
        reported_ms: Option<u64>,
        elapsed_ms: u64,
    },
    /// Server rebuilt after the trigger. `elapsed_ms` is wall-clock time since
    /// the mutation instant.
    Compiled {
        reported_ms: Option<u64>,
        elapsed_ms: u64,
    },
}

impl DetectionEvent {
    /// The measurement of record: the server's own figure when it printed
    /// one, wall-clock elapsed time otherwise.
    pub fn measured_ms(&self) -> u64 {
        match *self {
            DetectionEvent::Ready {
                reported_ms,
                elapsed_ms,
            }
            | DetectionEvent::Compiled {
                reported_ms,
                elapsed_ms,
            } => reported_ms.unwrap_or(elapsed_ms),
        }
    }

    pub fn reported_ms(&self) -> Option<u64> {
        match *self {
            DetectionEvent::Ready { reported_ms, .. }
            | DetectionEvent::Compiled { reported_ms, .. } => reported_ms,
        }
    }

    pub fn elapsed_ms(&self) -> u64 {
        match *self {
            DetectionEvent::Ready { elapsed_ms, .. }
            | DetectionEvent::Compiled { elapsed_ms, .. } => elapsed_ms,
        }
    }
}

/// Applies the rule table to output lines, one at a time, in emission order.
pub struct SignalDetector {
    variant: Variant,
    rules: Vec<SignalRule>,
}

impl SignalDetector {
    pub fn new(variant: Variant) -> Self {
        Self::with_rules(variant, default_rules())
    }

    pub fn with_rules(variant: Variant, rules: Vec<SignalRule>) -> Self {
        Self { variant, rules }
    }

    /// Feed one output chunk. At most one event is produced per chunk.
    pub fn on_output(&self, chunk: &str, state: &mut DetectionState) -> Option<DetectionEvent> {
        match state.phase() {
            Phase::NotReady => {
                let reported_ms = self.first_match(SignalKind::Ready, chunk)?;
                state.mark_ready();
                let elapsed_ms = millis(state.elapsed_since_start());
                debug!(?reported_ms, elapsed_ms, "ready signal matched");
                Some(DetectionEvent::Ready {
                    reported_ms,
                    elapsed_ms,
                })
            }
            Phase::Triggered if self.variant == Variant::HotReload => {
                let reported_ms = self.first_match(SignalKind::Compiled, chunk)?;
                let elapsed_ms = state
                    .trigger_instant()
                    .map(|t| millis(t.elapsed()))
                    .unwrap_or_default();
                debug!(?reported_ms, elapsed_ms, "compiled signal matched");
                Some(DetectionEvent::Compiled {
                    reported_ms,
                    elapsed_ms,
                })
            }
            phase => {
                trace!(?phase, "line ignored in current phase");
                None
            }
        }
    }

    fn first_match(&self, kind: SignalKind, chunk: &str) -> Option<Option<u64>> {
        self.rules
            .iter()
            .filter(|rule| rule.kind == kind)
            .find_map(|rule| rule.apply(chunk))
    }
}

fn millis(d: Duration) -> u64 {
    u64::try_from(d.as_millis()).unwrap_or(u64::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ready_ms(line: &str) -> Option<Option<u64>> {
        let detector = SignalDetector::new(Variant::ColdStart);
        let mut state = DetectionState::new();
        detector
            .on_output(line, &mut state)
            .map(|event| event.reported_ms())
    }

    fn triggered_state() -> DetectionState {
        let mut state = DetectionState::new();
        state.mark_ready();
        state.mark_triggered(Instant::now());
        state
    }

    #[test]
    fn test_default_rules_build_in_order() {
        let rules = default_rules();
        let kinds: Vec<SignalKind> = rules.iter().map(|rule| rule.kind).collect();
        assert_eq!(
            kinds,
            [
                SignalKind::Ready,
                SignalKind::Ready,
                SignalKind::Ready,
                SignalKind::Compiled,
                SignalKind::Compiled,
                SignalKind::Compiled,
            ]
        );
        assert!(rules[0].unit == Some(DurationUnit::Millis));
        assert!(rules[2].unit.is_none());
    }

    #[test]
    fn test_ready_phrasings() {
        assert_eq!(ready_ms("  ✓ Ready in 640ms"), Some(Some(640)));
        assert_eq!(ready_ms("✓ Ready in 1.5s"), Some(Some(1500)));
        assert_eq!(ready_ms("READY IN 15.8s"), Some(Some(15800)));
        assert_eq!(ready_ms("Ready in 2s"), Some(Some(2000)));
        assert_eq!(ready_ms("- ready started server on 0.0.0.0:3000"), Some(None));
        assert_eq!(ready_ms("Starting..."), None);
    }

    #[test]
    fn test_ready_fires_once() {
        let detector = SignalDetector::new(Variant::ColdStart);
        let mut state = DetectionState::new();
        assert!(detector.on_output("Ready in 820ms", &mut state).is_some());
        assert!(detector.on_output("Ready in 900ms", &mut state).is_none());
        assert!(state.server_ready());
    }

    #[test]
    fn test_compiled_phrasings() {
        let detector = SignalDetector::new(Variant::HotReload);

        let mut state = triggered_state();
        let event = detector
            .on_output("✓ Compiled /page in 120ms", &mut state)
            .unwrap();
        assert_eq!(event.reported_ms(), Some(120));
        assert_eq!(event.measured_ms(), 120);

        let mut state = triggered_state();
        let event = detector.on_output("Compiled in 85ms", &mut state).unwrap();
        assert_eq!(event.measured_ms(), 85);

        let mut state = triggered_state();
        let event = detector
            .on_output("compiled /dashboard in 1.2s (512 modules)", &mut state)
            .unwrap();
        assert_eq!(event.reported_ms(), Some(1200));
    }

    #[test]
    fn test_compiled_without_number_falls_back_to_wall_clock() {
        let detector = SignalDetector::new(Variant::HotReload);
        let mut state = DetectionState::new();
        state.mark_ready();
        let at = Instant::now() - Duration::from_millis(250);
        state.mark_triggered(at);

        let event = detector
            .on_output("Compiled successfully", &mut state)
            .unwrap();
        assert_eq!(event.reported_ms(), None);
        assert!(event.elapsed_ms() >= 250);
        assert_eq!(event.measured_ms(), event.elapsed_ms());
    }

    #[test]
    fn test_compiled_never_before_ready() {
        let detector = SignalDetector::new(Variant::HotReload);
        let mut state = DetectionState::new();

        assert!(detector.on_output("Compiled /page in 95ms", &mut state).is_none());
        assert_eq!(state.phase(), Phase::NotReady);

        // ready but not yet triggered: post-ready compilations are not ours
        detector.on_output("ready", &mut state).unwrap();
        assert!(detector.on_output("Compiled /page in 95ms", &mut state).is_none());
        assert_eq!(state.phase(), Phase::Ready);
    }

    #[test]
    fn test_cold_start_ignores_compiled() {
        let detector = SignalDetector::new(Variant::ColdStart);
        let mut state = triggered_state();
        assert!(detector.on_output("Compiled in 85ms", &mut state).is_none());
    }

    #[test]
    fn test_nothing_fires_after_measurement() {
        let detector = SignalDetector::new(Variant::HotReload);
        let mut state = triggered_state();
        let event = detector.on_output("Compiled in 85ms", &mut state).unwrap();
        state.mark_measured(event.measured_ms());

        assert!(detector.on_output("Compiled in 40ms", &mut state).is_none());
        assert_eq!(state.measured_ms(), Some(85));
    }

    #[test]
    fn test_custom_rule_table() {
        let rules = vec![
            SignalRule::new(SignalKind::Ready, r"listening after ([0-9]+)ms", Some(DurationUnit::Millis))
                .unwrap(),
        ];
        let detector = SignalDetector::with_rules(Variant::ColdStart, rules);
        let mut state = DetectionState::new();
        assert!(detector.on_output("Ready in 10ms", &mut state).is_none());
        let event = detector
            .on_output("Listening after 42ms", &mut state)
            .unwrap();
        assert_eq!(event.measured_ms(), 42);
    }

    #[test]
    fn test_state_transitions_are_forward_only() {
        let mut state = DetectionState::new();
        assert!(!state.mark_triggered(Instant::now()));
        assert!(state.mark_ready());
        assert!(!state.mark_ready());
        assert!(state.mark_triggered(Instant::now()));
        assert!(!state.mark_triggered(Instant::now()));
        assert!(state.mark_measured(10));
        assert!(!state.mark_measured(20));
        assert_eq!(state.measured_ms(), Some(10));
    }
}
