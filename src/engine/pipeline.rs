use chrono::{DateTime, Utc};
use std::sync::Arc;
use tracing::{debug, error};

use crate::attest::AttestationSigner;
use crate::error::{RegimeError, Result};
use crate::features::engine::FeatureEngine;
use crate::regime::{PersistenceConfig, PersistenceFilter, RegimeClassifier, TransitionEvent};
use crate::types::{
    FeatureVector, PredictionDraft, PredictionTrigger, PriceBar, RawRegimeCandidate, RegimeLabel,
    SignedPrediction,
};

/// Outcome of one `process` call.
#[derive(Debug, Clone, Default)]
pub struct PipelineReport {
    pub symbol: String,
    pub candidates: Vec<RawRegimeCandidate>,
    /// Confirmed regime after each candidate, aligned with `candidates`
    pub confirmed: Vec<RegimeLabel>,
    pub transitions: Vec<TransitionEvent>,
    pub predictions: Vec<SignedPrediction>,
    /// New bars that produced no candidate (short baseline or invalid features)
    pub skipped_bars: usize,
}

impl PipelineReport {
    fn new(symbol: &str) -> Self {
        Self {
            symbol: symbol.to_string(),
            ..Self::default()
        }
    }

    /// Share of candidates whose confirmed regime was `label`.
    pub fn share_in(&self, label: RegimeLabel) -> f64 {
        if self.confirmed.is_empty() {
            return 0.0;
        }
        let held = self.confirmed.iter().filter(|l| **l == label).count();
        held as f64 / self.confirmed.len() as f64
    }
}

/// Per-symbol chain from price history to signed predictions.
///
/// Owns the symbol's persistence filter; engine, classifier and signer are
/// shared. Each call only handles bars newer than the last one processed, so
/// the full history can be passed on every tick.
pub struct RegimePipeline {
    symbol: String,
    engine: Arc<FeatureEngine>,
    classifier: Arc<RegimeClassifier>,
    signer: Arc<AttestationSigner>,
    filter: PersistenceFilter,
    reattest_every_bars: Option<u32>,
    last_processed: Option<DateTime<Utc>>,
    held_since: Option<DateTime<Utc>>,
    bars_since_transition: u32,
    bars_since_attestation: u32,
    halted: bool,
}

impl RegimePipeline {
    pub fn new(
        symbol: &str,
        engine: Arc<FeatureEngine>,
        classifier: Arc<RegimeClassifier>,
        signer: Arc<AttestationSigner>,
        persistence: PersistenceConfig,
        reattest_every_bars: Option<u32>,
    ) -> Self {
        Self {
            symbol: symbol.to_string(),
            engine,
            classifier,
            signer,
            filter: PersistenceFilter::new(symbol, persistence),
            reattest_every_bars: reattest_every_bars.filter(|n| *n > 0),
            last_processed: None,
            held_since: None,
            bars_since_transition: 0,
            bars_since_attestation: 0,
            halted: false,
        }
    }

    pub fn symbol(&self) -> &str {
        &self.symbol
    }

    pub fn filter(&self) -> &PersistenceFilter {
        &self.filter
    }

    pub fn last_processed(&self) -> Option<DateTime<Utc>> {
        self.last_processed
    }

    pub fn is_halted(&self) -> bool {
        self.halted
    }

    /// Clears the filter and the processing cursor, lifting a halt.
    pub fn reset(&mut self) {
        self.filter.reset();
        self.last_processed = None;
        self.held_since = None;
        self.bars_since_transition = 0;
        self.bars_since_attestation = 0;
        self.halted = false;
    }

    pub fn process(&mut self, history: &[PriceBar]) -> Result<PipelineReport> {
        if self.halted {
            return Err(RegimeError::FilterHalted {
                symbol: self.symbol.clone(),
            });
        }
        if let Some(bar) = history.iter().find(|b| b.symbol != self.symbol) {
            return Err(self.halt(RegimeError::InvalidSeries {
                symbol: self.symbol.clone(),
                reason: format!("bar for {} in {} history", bar.symbol, self.symbol),
            }));
        }

        let mut report = PipelineReport::new(&self.symbol);
        let start = match self.last_processed {
            Some(last) => history.partition_point(|b| b.timestamp <= last),
            None => 0,
        };
        let new_bars = history.len() - start;
        if new_bars == 0 {
            return Ok(report);
        }

        let vectors = self
            .engine
            .compute_from(history, start)
            .map_err(|e| self.halt(e))?;

        for fv in &vectors {
            if fv.is_valid {
                self.step(fv, &mut report).map_err(|e| self.halt(e))?;
            } else {
                debug!("{} {}: invalid feature vector, bar skipped", self.symbol, fv.timestamp);
            }
            self.last_processed = Some(fv.timestamp);
        }
        self.last_processed = history.last().map(|b| b.timestamp);
        report.skipped_bars = new_bars - report.candidates.len();

        debug!(
            "{}: {} new bars, {} candidates, {} transitions, {} predictions",
            self.symbol,
            new_bars,
            report.candidates.len(),
            report.transitions.len(),
            report.predictions.len()
        );
        Ok(report)
    }

    fn step(&mut self, fv: &FeatureVector, report: &mut PipelineReport) -> Result<()> {
        let candidate = self.classifier.classify(fv);
        let transition = self.filter.apply(&candidate)?;

        let trigger = match &transition {
            Some(event) => {
                self.held_since = Some(event.at);
                self.bars_since_transition = 0;
                Some(PredictionTrigger::Transition {
                    from: event.from,
                    candidate_run: event.candidate_run,
                })
            }
            None => {
                self.bars_since_transition += 1;
                self.bars_since_attestation += 1;
                match (self.held_since, self.reattest_every_bars) {
                    (Some(held_since), Some(every)) if self.bars_since_attestation >= every => {
                        Some(PredictionTrigger::Reattestation {
                            held_since,
                            bars_since_transition: self.bars_since_transition,
                        })
                    }
                    _ => None,
                }
            }
        };

        if let Some(trigger) = trigger {
            let draft = PredictionDraft::new(fv, &candidate, self.filter.current_label(), trigger);
            let signed = self.signer.sign(draft)?;
            self.bars_since_attestation = 0;
            report.predictions.push(signed);
        }

        report.confirmed.push(self.filter.current_label());
        report.candidates.push(candidate);
        if let Some(event) = transition {
            report.transitions.push(event);
        }
        Ok(())
    }

    fn halt(&mut self, err: RegimeError) -> RegimeError {
        if err.is_fatal() {
            error!("{}: pipeline halted: {}", self.symbol, err);
            self.halted = true;
        }
        err
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::attest::{verify_record, FixedClock, KeyPair};
    use crate::data::synthetic::{Segment, SyntheticSeries};
    use chrono::TimeZone;

    fn pipeline(symbol: &str, reattest: Option<u32>) -> RegimePipeline {
        let clock = FixedClock::new(Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap());
        let signer = AttestationSigner::new("regime-agent", KeyPair::generate(), Arc::new(clock));
        RegimePipeline::new(
            symbol,
            Arc::new(FeatureEngine::default()),
            Arc::new(RegimeClassifier::default()),
            Arc::new(signer),
            PersistenceConfig::default(),
            reattest,
        )
    }

    #[test]
    fn test_short_history_produces_nothing() {
        let bars = SyntheticSeries::new("SPY", 3)
            .segment(Segment::new(200, 0.0005, 0.01))
            .generate();
        let mut pipeline = pipeline("SPY", Some(20));
        let report = pipeline.process(&bars).unwrap();

        assert!(report.candidates.is_empty());
        assert!(report.predictions.is_empty());
        assert_eq!(report.skipped_bars, 200);
        assert_eq!(pipeline.filter().current_label(), RegimeLabel::Neutral);
    }

    #[test]
    fn test_rally_confirms_bull_and_holds() {
        let bars = SyntheticSeries::rally_scenario("SPY", 42).generate();
        assert_eq!(bars.len(), 343);

        let mut pipeline = pipeline("SPY", Some(20));
        let report = pipeline.process(&bars).unwrap();

        assert_eq!(report.candidates.len(), 343 - 252);
        let bull_at = report
            .transitions
            .iter()
            .find(|t| t.to == RegimeLabel::Bull)
            .map(|t| t.at)
            .expect("bull regime confirmed during rally");
        assert!(bull_at > bars[252].timestamp);
        assert!(report.share_in(RegimeLabel::Bull) > 0.5);

        let first_bull = report
            .predictions
            .iter()
            .find(|p| p.regime() == RegimeLabel::Bull)
            .expect("bull transition attested");
        assert_eq!(first_bull.timestamp(), bull_at);
        assert!(report.predictions.iter().all(verify_record));
    }

    #[test]
    fn test_transition_needs_full_run() {
        let bars = SyntheticSeries::rally_scenario("SPY", 42).generate();
        let mut pipeline = pipeline("SPY", None);
        let report = pipeline.process(&bars).unwrap();

        for event in &report.transitions {
            assert!(event.candidate_run >= 5);
            let idx = report
                .candidates
                .iter()
                .position(|c| c.timestamp == event.at)
                .unwrap();
            assert!(idx + 1 >= 5);
            assert!(report.candidates[idx + 1 - 5..=idx]
                .iter()
                .all(|c| c.label == event.to));
        }
        // one prediction per transition when re-attestation is off
        assert_eq!(report.predictions.len(), report.transitions.len());
    }

    #[test]
    fn test_incremental_matches_batch() {
        let bars = SyntheticSeries::rally_scenario("SPY", 7).generate();

        let mut batch = pipeline("SPY", Some(20));
        let full = batch.process(&bars).unwrap();

        let mut incremental = pipeline("SPY", Some(20));
        let first = incremental.process(&bars[..300]).unwrap();
        let second = incremental.process(&bars).unwrap();
        let again = incremental.process(&bars).unwrap();

        let labels = |r: &PipelineReport| r.candidates.iter().map(|c| c.label).collect::<Vec<_>>();
        let mut combined = labels(&first);
        combined.extend(labels(&second));
        assert_eq!(combined, labels(&full));
        assert_eq!(
            first.predictions.len() + second.predictions.len(),
            full.predictions.len()
        );
        assert!(again.candidates.is_empty());
        assert_eq!(again.skipped_bars, 0);
    }

    #[test]
    fn test_reattestation_while_holding() {
        let bars = SyntheticSeries::rally_scenario("SPY", 42).generate();
        let mut pipeline = pipeline("SPY", Some(10));
        let report = pipeline.process(&bars).unwrap();

        let reattested: Vec<_> = report
            .predictions
            .iter()
            .filter(|p| matches!(p.payload().trigger, PredictionTrigger::Reattestation { .. }))
            .collect();
        assert!(!reattested.is_empty());
        for p in reattested {
            let PredictionTrigger::Reattestation { held_since, .. } = p.payload().trigger else {
                unreachable!()
            };
            assert!(held_since < p.timestamp());
        }
    }

    #[test]
    fn test_foreign_symbol_halts() {
        let bars = SyntheticSeries::new("QQQ", 1)
            .segment(Segment::new(260, 0.0, 0.01))
            .generate();
        let mut pipeline = pipeline("SPY", Some(20));
        assert!(matches!(
            pipeline.process(&bars),
            Err(RegimeError::InvalidSeries { .. })
        ));
        assert!(pipeline.is_halted());
        assert!(matches!(
            pipeline.process(&bars),
            Err(RegimeError::FilterHalted { .. })
        ));

        pipeline.reset();
        assert!(!pipeline.is_halted());
    }
}
