use anyhow::{Context, Result};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{error, info, warn};

use super::pipeline::{PipelineReport, RegimePipeline};
use crate::attest::AttestationSigner;
use crate::data::PriceSource;
use crate::database::PredictionStore;
use crate::error::StoreError;
use crate::features::engine::FeatureEngine;
use crate::regime::{PersistenceConfig, RegimeClassifier};
use crate::types::SignedPrediction;

/// Result of one pass over every configured symbol.
#[derive(Debug, Default)]
pub struct RunSummary {
    pub reports: Vec<PipelineReport>,
    /// Symbols whose pass failed, with the error message
    pub failures: Vec<(String, String)>,
    pub stored: usize,
    pub duplicates: usize,
}

impl RunSummary {
    pub fn prediction_count(&self) -> usize {
        self.reports.iter().map(|r| r.predictions.len()).sum()
    }

    pub fn failed(&self, symbol: &str) -> Option<&str> {
        self.failures
            .iter()
            .find(|(failed, _)| failed == symbol)
            .map(|(_, message)| message.as_str())
    }
}

/// Drives one pipeline per symbol. Symbols run in parallel on the blocking
/// pool; a failure in one symbol never touches another.
pub struct RegimeRunner {
    source: Arc<dyn PriceSource>,
    store: Option<Arc<dyn PredictionStore>>,
    engine: Arc<FeatureEngine>,
    classifier: Arc<RegimeClassifier>,
    signer: Arc<AttestationSigner>,
    persistence: PersistenceConfig,
    reattest_every_bars: Option<u32>,
    pipelines: HashMap<String, RegimePipeline>,
    /// Signed predictions the store has not accepted yet, retried first on
    /// the symbol's next successful pass
    unstored: HashMap<String, Vec<SignedPrediction>>,
    order: Vec<String>,
}

impl RegimeRunner {
    pub fn new(
        symbols: &[String],
        source: Arc<dyn PriceSource>,
        engine: Arc<FeatureEngine>,
        classifier: Arc<RegimeClassifier>,
        signer: Arc<AttestationSigner>,
        persistence: PersistenceConfig,
        reattest_every_bars: Option<u32>,
    ) -> Self {
        let mut runner = Self {
            source,
            store: None,
            engine,
            classifier,
            signer,
            persistence,
            reattest_every_bars,
            pipelines: HashMap::new(),
            unstored: HashMap::new(),
            order: symbols.to_vec(),
        };
        for symbol in symbols {
            let pipeline = runner.build_pipeline(symbol);
            runner.pipelines.insert(symbol.clone(), pipeline);
        }
        runner
    }

    /// Appends every produced prediction to `store`.
    pub fn with_store(mut self, store: Arc<dyn PredictionStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn pipeline(&self, symbol: &str) -> Option<&RegimePipeline> {
        self.pipelines.get(symbol)
    }

    /// Predictions for `symbol` still waiting for the store, oldest first.
    pub fn unstored(&self, symbol: &str) -> &[SignedPrediction] {
        self.unstored.get(symbol).map(Vec::as_slice).unwrap_or(&[])
    }

    fn build_pipeline(&self, symbol: &str) -> RegimePipeline {
        RegimePipeline::new(
            symbol,
            Arc::clone(&self.engine),
            Arc::clone(&self.classifier),
            Arc::clone(&self.signer),
            self.persistence.clone(),
            self.reattest_every_bars,
        )
    }

    /// Fetches the latest history for each symbol and processes new bars.
    ///
    /// Every pipeline is back in place before anything is stored. Fetch,
    /// processing and store errors all land in `failures` for their symbol.
    pub async fn run_once(&mut self) -> Result<RunSummary> {
        let mut handles = Vec::with_capacity(self.order.len());

        for symbol in &self.order {
            let mut pipeline = match self.pipelines.remove(symbol) {
                Some(pipeline) => pipeline,
                None => {
                    warn!("{}: no pipeline in place, starting a fresh one", symbol);
                    self.build_pipeline(symbol)
                }
            };
            let source = Arc::clone(&self.source);
            let task_symbol = symbol.clone();

            let handle = tokio::spawn(async move {
                let bars = match source.fetch_bars(&task_symbol).await {
                    Ok(bars) => bars,
                    Err(e) => {
                        let e = e.context(format!("fetching bars for {}", task_symbol));
                        return Ok::<_, anyhow::Error>((pipeline, Err(e)));
                    }
                };
                tokio::task::spawn_blocking(move || {
                    let result = pipeline.process(&bars).map_err(anyhow::Error::from);
                    (pipeline, result)
                })
                .await
                .context("pipeline task panicked")
            });
            handles.push((symbol.clone(), handle));
        }

        let mut outcomes = Vec::with_capacity(handles.len());
        for (symbol, handle) in handles {
            let outcome: Result<PipelineReport> = match handle.await {
                Ok(Ok((pipeline, result))) => {
                    self.pipelines.insert(symbol.clone(), pipeline);
                    result
                }
                Ok(Err(e)) => Err(self.replace_pipeline(&symbol, e)),
                Err(e) => {
                    let e = anyhow::Error::from(e).context("symbol task panicked");
                    Err(self.replace_pipeline(&symbol, e))
                }
            };
            outcomes.push((symbol, outcome));
        }

        let mut summary = RunSummary::default();
        for (symbol, outcome) in outcomes {
            match outcome {
                Ok(report) => {
                    info!(
                        "{}: {} candidates, {} transitions, {} predictions",
                        symbol,
                        report.candidates.len(),
                        report.transitions.len(),
                        report.predictions.len()
                    );
                    if let Err(e) = self.persist(&symbol, &report.predictions, &mut summary).await {
                        error!("{}: {:#}", symbol, e);
                        summary.failures.push((symbol, format!("{:#}", e)));
                    }
                    summary.reports.push(report);
                }
                Err(e) => {
                    error!("{}: {:#}", symbol, e);
                    summary.failures.push((symbol, format!("{:#}", e)));
                }
            }
        }

        Ok(summary)
    }

    /// The pipeline was lost with its task. A fresh one replays the full
    /// history on the next pass; predictions already stored come back as
    /// duplicates.
    fn replace_pipeline(&mut self, symbol: &str, cause: anyhow::Error) -> anyhow::Error {
        warn!("{}: pipeline lost, rebuilding from empty state", symbol);
        let pipeline = self.build_pipeline(symbol);
        self.pipelines.insert(symbol.to_string(), pipeline);
        cause
    }

    /// Stores held-back predictions for `symbol` and then `fresh`, in order.
    /// On the first store error the rest stay held for the next pass.
    async fn persist(
        &mut self,
        symbol: &str,
        fresh: &[SignedPrediction],
        summary: &mut RunSummary,
    ) -> Result<()> {
        let Some(store) = self.store.clone() else {
            return Ok(());
        };

        let mut queue = self.unstored.remove(symbol).unwrap_or_default();
        if !queue.is_empty() {
            info!("{}: retrying {} unstored predictions", symbol, queue.len());
        }
        queue.extend_from_slice(fresh);

        let mut next = 0;
        while next < queue.len() {
            match store.append(&queue[next]).await {
                Ok(()) => summary.stored += 1,
                Err(StoreError::Duplicate { symbol, timestamp }) => {
                    warn!("{} prediction at {} already in ledger, skipped", symbol, timestamp);
                    summary.duplicates += 1;
                }
                Err(e) => {
                    let held = queue.split_off(next);
                    warn!("{}: holding {} predictions for the next pass", symbol, held.len());
                    self.unstored.insert(symbol.to_string(), held);
                    return Err(e).with_context(|| format!("storing {} prediction", symbol));
                }
            }
            next += 1;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::attest::{FixedClock, KeyPair};
    use crate::data::synthetic::SyntheticSeries;
    use crate::data::MockPriceSource;
    use crate::database::MockPredictionStore;
    use crate::types::{PriceBar, RegimeLabel};
    use async_trait::async_trait;
    use chrono::{TimeZone, Utc};
    use std::sync::atomic::{AtomicBool, Ordering};

    fn runner(symbols: &[&str], source: MockPriceSource) -> RegimeRunner {
        let clock = FixedClock::new(Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap());
        let signer = AttestationSigner::new("regime-agent", KeyPair::generate(), Arc::new(clock));
        let symbols: Vec<String> = symbols.iter().map(|s| s.to_string()).collect();
        RegimeRunner::new(
            &symbols,
            Arc::new(source),
            Arc::new(FeatureEngine::default()),
            Arc::new(RegimeClassifier::default()),
            Arc::new(signer),
            PersistenceConfig::default(),
            None,
        )
    }

    #[tokio::test]
    async fn test_symbols_are_isolated() {
        let mut source = MockPriceSource::new();
        source.expect_fetch_bars().returning(|symbol| {
            if symbol == "BAD" {
                Err(anyhow::anyhow!("feed offline"))
            } else {
                Ok(SyntheticSeries::rally_scenario(symbol, 42).generate())
            }
        });

        let mut runner = runner(&["SPY", "BAD"], source);
        let summary = runner.run_once().await.unwrap();

        assert_eq!(summary.reports.len(), 1);
        assert_eq!(summary.reports[0].symbol, "SPY");
        assert!(summary.reports[0].transitions.iter().any(|t| t.to == RegimeLabel::Bull));
        assert_eq!(summary.failures.len(), 1);
        assert_eq!(summary.failures[0].0, "BAD");
        assert!(summary.failures[0].1.contains("feed offline"));
        assert!(runner.pipeline("BAD").is_some());
    }

    #[tokio::test]
    async fn test_predictions_reach_store_once() {
        let mut source = MockPriceSource::new();
        source
            .expect_fetch_bars()
            .returning(|symbol| Ok(SyntheticSeries::rally_scenario(symbol, 42).generate()));

        let mut store = MockPredictionStore::new();
        store.expect_append().returning(|_| Ok(()));

        let mut runner = runner(&["SPY"], source).with_store(Arc::new(store));
        let first = runner.run_once().await.unwrap();
        assert!(first.stored > 0);
        assert_eq!(first.stored, first.prediction_count());

        // same history again: nothing new to process or store
        let second = runner.run_once().await.unwrap();
        assert_eq!(second.stored, 0);
        assert!(second.reports[0].candidates.is_empty());
    }

    #[tokio::test]
    async fn test_store_failure_stays_with_its_symbol() {
        let mut source = MockPriceSource::new();
        source
            .expect_fetch_bars()
            .returning(|symbol| Ok(SyntheticSeries::rally_scenario(symbol, 42).generate()));

        let spy_down = Arc::new(AtomicBool::new(true));
        let flag = Arc::clone(&spy_down);
        let mut store = MockPredictionStore::new();
        store.expect_append().returning(move |record| {
            if record.symbol() == "SPY" && flag.load(Ordering::SeqCst) {
                Err(StoreError::SignatureRejected)
            } else {
                Ok(())
            }
        });

        let mut runner = runner(&["SPY", "QQQ"], source).with_store(Arc::new(store));
        let first = runner.run_once().await.unwrap();

        assert_eq!(first.reports.len(), 2);
        assert_eq!(first.failures.len(), 1);
        assert!(first.failed("SPY").unwrap().contains("storing SPY prediction"));
        assert!(first.failed("QQQ").is_none());

        let spy_made = first.reports.iter().find(|r| r.symbol == "SPY").unwrap().predictions.len();
        let qqq_made = first.reports.iter().find(|r| r.symbol == "QQQ").unwrap().predictions.len();
        assert!(spy_made > 0 && qqq_made > 0);
        assert_eq!(first.stored, qqq_made);
        assert_eq!(runner.unstored("SPY").len(), spy_made);
        assert!(runner.unstored("QQQ").is_empty());

        // both pipelines survived and hold their progress
        assert!(runner.pipeline("SPY").unwrap().last_processed().is_some());
        assert!(runner.pipeline("QQQ").unwrap().last_processed().is_some());

        spy_down.store(false, Ordering::SeqCst);
        let second = runner.run_once().await.unwrap();
        assert!(second.failures.is_empty());
        assert_eq!(second.stored, spy_made);
        assert!(runner.unstored("SPY").is_empty());
    }

    struct CrashingSource;

    #[async_trait]
    impl PriceSource for CrashingSource {
        async fn fetch_bars(&self, symbol: &str) -> anyhow::Result<Vec<PriceBar>> {
            if symbol == "BAD" {
                panic!("feed crashed");
            }
            Ok(SyntheticSeries::rally_scenario(symbol, 42).generate())
        }
    }

    #[tokio::test]
    async fn test_lost_pipeline_is_rebuilt() {
        let clock = FixedClock::new(Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap());
        let signer = AttestationSigner::new("regime-agent", KeyPair::generate(), Arc::new(clock));
        let mut runner = RegimeRunner::new(
            &["SPY".to_string(), "BAD".to_string()],
            Arc::new(CrashingSource),
            Arc::new(FeatureEngine::default()),
            Arc::new(RegimeClassifier::default()),
            Arc::new(signer),
            PersistenceConfig::default(),
            None,
        );

        let summary = runner.run_once().await.unwrap();
        assert_eq!(summary.reports.len(), 1);
        assert!(summary.failed("BAD").unwrap().contains("symbol task panicked"));

        let rebuilt = runner.pipeline("BAD").unwrap();
        assert!(rebuilt.last_processed().is_none());
        assert!(runner.pipeline("SPY").unwrap().last_processed().is_some());

        let again = runner.run_once().await.unwrap();
        assert!(again.failed("BAD").is_some());
        assert!(again.failed("SPY").is_none());
    }
}
