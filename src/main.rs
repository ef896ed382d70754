use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, Level};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use regime_attest::attest::{AttestationSigner, KeyPair, SystemClock};
use regime_attest::config::{self, RuntimeConfig};
use regime_attest::data::{CsvPriceSource, PriceSource, SyntheticPriceSource, SyntheticSeries};
use regime_attest::database::SqlitePredictionStore;
use regime_attest::engine::{RegimePipeline, RegimeRunner};
use regime_attest::features::FeatureEngine;
use regime_attest::regime::RegimeClassifier;
use regime_attest::types::RegimeLabel;

#[derive(Parser)]
#[command(name = "regime-attest")]
#[command(version = "0.1.0")]
#[command(about = "Market regime classifier with Ed25519-attested predictions", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Configuration file path
    #[arg(short, long, default_value = "regime.toml")]
    config: PathBuf,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    /// Emit logs as JSON lines
    #[arg(long)]
    log_json: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Generate a signing key and print its public half
    Keygen {
        /// Where to write the hex secret
        #[arg(short, long, default_value = "regime-agent.key")]
        out: PathBuf,

        /// Overwrite an existing key file
        #[arg(long)]
        force: bool,
    },
    /// Classify the configured symbols and append predictions to the ledger
    Run {
        /// Directory of <SYMBOL>.csv files
        #[arg(short, long, conflicts_with = "synthetic")]
        data: Option<PathBuf>,

        /// Use the seeded rally scenario instead of CSV input
        #[arg(long)]
        synthetic: bool,

        /// Seed for synthetic data
        #[arg(long, default_value = "42")]
        seed: u64,
    },
    /// Run the rally scenario in memory with a throwaway key
    Simulate {
        #[arg(short, long, default_value = "SPY")]
        symbol: String,

        #[arg(long, default_value = "42")]
        seed: u64,
    },
    /// Re-verify every stored prediction; exits non-zero on any rejection
    Verify {
        /// Limit to one symbol (default: every symbol in the ledger)
        #[arg(short, long)]
        symbol: Option<String>,

        /// Require records to be signed by this public key
        #[arg(long)]
        public_key: Option<String>,
    },
    /// Print the effective configuration as TOML
    Config,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose, cli.log_json)?;

    match cli.command {
        Commands::Keygen { out, force } => keygen(&out, force)?,
        Commands::Run { data, synthetic, seed } => {
            let runtime = config::load(&cli.config)?;
            run(&runtime, data, synthetic, seed).await?;
        }
        Commands::Simulate { symbol, seed } => {
            let runtime = config::load(&cli.config)?;
            simulate(&runtime, &symbol, seed)?;
        }
        Commands::Verify { symbol, public_key } => {
            let runtime = config::load(&cli.config)?;
            verify(&runtime, symbol, public_key).await?;
        }
        Commands::Config => {
            let runtime = config::load(&cli.config)?;
            println!("{}", toml::to_string_pretty(&runtime).context("rendering configuration")?);
        }
    }

    Ok(())
}

fn init_logging(verbose: bool, json: bool) -> Result<()> {
    let log_level = if verbose { Level::DEBUG } else { Level::INFO };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(log_level.as_str().to_lowercase()));

    let builder = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false);

    if json {
        tracing::subscriber::set_global_default(builder.json().finish())?;
    } else {
        tracing::subscriber::set_global_default(builder.finish())?;
    }
    Ok(())
}

fn keygen(out: &Path, force: bool) -> Result<()> {
    if out.exists() && !force {
        bail!("{} already exists, pass --force to overwrite", out.display());
    }
    let keys = KeyPair::generate();
    keys.write_secret_file(out)
        .with_context(|| format!("writing {}", out.display()))?;

    info!("Signing key written to {} (fingerprint {})", out.display(), keys.fingerprint());
    println!("{}", keys.public_key_hex());
    Ok(())
}

fn build_signer(runtime: &RuntimeConfig, keys: KeyPair) -> Arc<AttestationSigner> {
    let signer = AttestationSigner::new(
        runtime.attestation.agent_id.clone(),
        keys,
        Arc::new(SystemClock),
    );
    info!("Signing as {} with key {}", signer.agent_id(), signer.fingerprint());
    Arc::new(signer)
}

async fn run(runtime: &RuntimeConfig, data: Option<PathBuf>, synthetic: bool, seed: u64) -> Result<()> {
    let source: Arc<dyn PriceSource> = match (data, synthetic) {
        (_, true) => {
            let source = runtime.symbols.iter().fold(SyntheticPriceSource::new(), |source, symbol| {
                source.with_series(symbol, SyntheticSeries::rally_scenario(symbol, seed))
            });
            Arc::new(source)
        }
        (Some(dir), false) => Arc::new(CsvPriceSource::new(dir)),
        (None, false) => bail!("pass --data <dir> or --synthetic"),
    };

    let keys = config::load_signing_key(runtime)?;
    let signer = build_signer(runtime, keys);
    let store = Arc::new(
        SqlitePredictionStore::new(&runtime.store.database_url)
            .await
            .context("opening prediction ledger")?,
    );

    let mut runner = RegimeRunner::new(
        &runtime.symbols,
        source,
        Arc::new(FeatureEngine::new(runtime.features.clone())),
        Arc::new(RegimeClassifier::new(runtime.classifier.clone())),
        signer,
        runtime.persistence.clone(),
        runtime.attestation.reattest_every_bars,
    )
    .with_store(store);

    let summary = runner.run_once().await?;

    println!("\n=== Regime Run ===");
    for report in &summary.reports {
        let current = runner
            .pipeline(&report.symbol)
            .map(|p| p.filter().current_label())
            .unwrap_or(RegimeLabel::Neutral);
        println!(
            "{}: {} | candidates {} | transitions {} | predictions {} | skipped {}",
            report.symbol,
            current,
            report.candidates.len(),
            report.transitions.len(),
            report.predictions.len(),
            report.skipped_bars
        );
    }
    println!("Stored {} predictions ({} duplicates skipped)", summary.stored, summary.duplicates);

    if !summary.failures.is_empty() {
        for (symbol, reason) in &summary.failures {
            println!("FAILED {}: {}", symbol, reason);
        }
        bail!("{} of {} symbols failed", summary.failures.len(), runtime.symbols.len());
    }
    Ok(())
}

fn simulate(runtime: &RuntimeConfig, symbol: &str, seed: u64) -> Result<()> {
    let bars = SyntheticSeries::rally_scenario(symbol, seed).generate();
    let signer = build_signer(runtime, KeyPair::generate());

    let mut pipeline = RegimePipeline::new(
        symbol,
        Arc::new(FeatureEngine::new(runtime.features.clone())),
        Arc::new(RegimeClassifier::new(runtime.classifier.clone())),
        signer,
        runtime.persistence.clone(),
        runtime.attestation.reattest_every_bars,
    );
    let report = pipeline.process(&bars)?;

    println!("\n=== Rally Simulation: {} (seed {}) ===", symbol, seed);
    println!("Bars: {} | candidates: {} | skipped: {}", bars.len(), report.candidates.len(), report.skipped_bars);
    for event in &report.transitions {
        println!(
            "{}  {} -> {} (run of {})",
            event.at.format("%Y-%m-%d"),
            event.from,
            event.to,
            event.candidate_run
        );
    }
    for label in RegimeLabel::all() {
        println!("{:>8}: {:5.1}% of classified bars", label, report.share_in(label) * 100.0);
    }
    println!("Signed predictions: {}", report.predictions.len());
    Ok(())
}

async fn verify(runtime: &RuntimeConfig, symbol: Option<String>, public_key: Option<String>) -> Result<()> {
    let store = SqlitePredictionStore::new(&runtime.store.database_url)
        .await
        .context("opening prediction ledger")?;

    let symbols = match symbol {
        Some(symbol) => vec![symbol],
        None => store.symbols().await?,
    };

    let mut checked = 0;
    let mut rejected = 0;
    for symbol in &symbols {
        let audit = store
            .audit(symbol, public_key.as_deref())
            .await
            .with_context(|| format!("reading {} predictions", symbol))?;
        checked += audit.checked();
        rejected += audit.rejected;
    }

    println!("Verified {} of {} predictions across {} symbols", checked - rejected, checked, symbols.len());
    if rejected > 0 {
        bail!("{} predictions failed verification", rejected);
    }
    Ok(())
}
