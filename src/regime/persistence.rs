use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info};

use crate::error::{RegimeError, Result};
use crate::types::{RawRegimeCandidate, RegimeLabel};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PersistenceConfig {
    /// Consecutive agreeing candidates required to confirm a transition
    pub persistence_days: u32,
    /// Largest allowed spacing between consecutive candidates, if any
    pub max_gap_secs: Option<i64>,
}

impl Default for PersistenceConfig {
    fn default() -> Self {
        Self {
            persistence_days: 5,
            max_gap_secs: None,
        }
    }
}

impl PersistenceConfig {
    pub fn validate(&self) -> std::result::Result<(), Vec<String>> {
        let mut errors = Vec::new();
        if self.persistence_days == 0 {
            errors.push("persistence: persistence_days must be > 0".to_string());
        }
        if matches!(self.max_gap_secs, Some(secs) if secs <= 0) {
            errors.push("persistence: max_gap_secs must be > 0 when set".to_string());
        }
        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}

/// Confirmed regime for one symbol plus debounce bookkeeping.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConfirmedRegimeState {
    pub symbol: String,
    pub current_label: RegimeLabel,
    /// Timestamp of the transition into `current_label`; `None` before any input
    pub entered_at: Option<DateTime<Utc>>,
    pub consecutive_candidate_count: u32,
    pub candidate_label_pending: Option<RegimeLabel>,
}

impl ConfirmedRegimeState {
    pub fn new(symbol: &str) -> Self {
        Self {
            symbol: symbol.to_string(),
            current_label: RegimeLabel::Neutral,
            entered_at: None,
            consecutive_candidate_count: 0,
            candidate_label_pending: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransitionEvent {
    pub symbol: String,
    pub from: RegimeLabel,
    pub to: RegimeLabel,
    pub at: DateTime<Utc>,
    /// Length of the agreeing run that confirmed the transition
    pub candidate_run: u32,
}

/// Debounce state machine for one symbol.
///
/// Must be driven by a single owner in strict timestamp order. Ordering
/// violations halt the filter until [`PersistenceFilter::reset`].
#[derive(Debug, Clone)]
pub struct PersistenceFilter {
    config: PersistenceConfig,
    state: ConfirmedRegimeState,
    last_seen: Option<DateTime<Utc>>,
    transitions: Vec<TransitionEvent>,
    halted: bool,
}

impl PersistenceFilter {
    pub fn new(symbol: &str, config: PersistenceConfig) -> Self {
        Self {
            config,
            state: ConfirmedRegimeState::new(symbol),
            last_seen: None,
            transitions: Vec::new(),
            halted: false,
        }
    }

    pub fn symbol(&self) -> &str {
        &self.state.symbol
    }

    pub fn state(&self) -> &ConfirmedRegimeState {
        &self.state
    }

    pub fn current_label(&self) -> RegimeLabel {
        self.state.current_label
    }

    pub fn last_seen(&self) -> Option<DateTime<Utc>> {
        self.last_seen
    }

    pub fn transitions(&self) -> &[TransitionEvent] {
        &self.transitions
    }

    pub fn is_halted(&self) -> bool {
        self.halted
    }

    /// Applies one candidate. Returns the transition event when this candidate
    /// confirms a regime change.
    pub fn apply(&mut self, candidate: &RawRegimeCandidate) -> Result<Option<TransitionEvent>> {
        if self.halted {
            return Err(RegimeError::FilterHalted {
                symbol: self.state.symbol.clone(),
            });
        }
        if let Err(err) = self.check_order(candidate) {
            error!("{}", err);
            self.halted = true;
            return Err(err);
        }

        let state = &mut self.state;
        if state.entered_at.is_none() {
            state.entered_at = Some(candidate.timestamp);
        }
        self.last_seen = Some(candidate.timestamp);

        if state.candidate_label_pending == Some(candidate.label) {
            state.consecutive_candidate_count += 1;
        } else {
            state.candidate_label_pending = Some(candidate.label);
            state.consecutive_candidate_count = 1;
        }

        if state.consecutive_candidate_count >= self.config.persistence_days
            && candidate.label != state.current_label
        {
            let event = TransitionEvent {
                symbol: state.symbol.clone(),
                from: state.current_label,
                to: candidate.label,
                at: candidate.timestamp,
                candidate_run: state.consecutive_candidate_count,
            };
            state.current_label = candidate.label;
            state.entered_at = Some(candidate.timestamp);

            info!(
                "{} regime {} -> {} at {} after {} candidates",
                event.symbol, event.from, event.to, event.at, event.candidate_run
            );
            self.transitions.push(event.clone());
            return Ok(Some(event));
        }

        debug!(
            "{} candidate {} ({}/{}), holding {}",
            state.symbol,
            candidate.label,
            state.consecutive_candidate_count,
            self.config.persistence_days,
            state.current_label
        );
        Ok(None)
    }

    fn check_order(&self, candidate: &RawRegimeCandidate) -> Result<()> {
        if candidate.symbol != self.state.symbol {
            return Err(RegimeError::InvalidSeries {
                symbol: self.state.symbol.clone(),
                reason: format!("candidate for {} fed to {} filter", candidate.symbol, self.state.symbol),
            });
        }
        let Some(last_seen) = self.last_seen else {
            return Ok(());
        };
        if candidate.timestamp <= last_seen {
            return Err(RegimeError::OutOfOrderInput {
                symbol: self.state.symbol.clone(),
                last_seen,
                received: candidate.timestamp,
            });
        }
        if let Some(max_gap_secs) = self.config.max_gap_secs {
            if candidate.timestamp - last_seen > Duration::seconds(max_gap_secs) {
                return Err(RegimeError::SequenceGap {
                    symbol: self.state.symbol.clone(),
                    last_seen,
                    received: candidate.timestamp,
                    max_gap_secs,
                });
            }
        }
        Ok(())
    }

    /// Clears all state, including the transition log and a halted flag.
    pub fn reset(&mut self) {
        let symbol = self.state.symbol.clone();
        self.state = ConfirmedRegimeState::new(&symbol);
        self.last_seen = None;
        self.transitions.clear();
        self.halted = false;
    }

    /// Mean days between consecutive confirmed transitions.
    pub fn average_persistence_days(&self) -> Option<f64> {
        if self.transitions.len() < 2 {
            return None;
        }
        let total: f64 = self
            .transitions
            .windows(2)
            .map(|w| (w[1].at - w[0].at).num_seconds() as f64 / 86_400.0)
            .sum();
        Some(total / (self.transitions.len() - 1) as f64)
    }

    /// Transitions confirmed within `[start, end]`.
    pub fn transition_count(&self, start: DateTime<Utc>, end: DateTime<Utc>) -> usize {
        self.transitions
            .iter()
            .filter(|t| t.at >= start && t.at <= end)
            .count()
    }

    /// How long the current regime has held as of `now`.
    pub fn time_in_regime(&self, now: DateTime<Utc>) -> Option<Duration> {
        self.state.entered_at.map(|entered| now - entered)
    }
}
