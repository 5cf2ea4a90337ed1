// Command-line runner for the `espresso_flow` library: analyze one folder of frames, or
// every shot folder under a root directory, and print the reports as JSON.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use espresso_flow::config::AnalyzerConfig;
use espresso_flow::core_modules::classifier::{LogisticModel, ShotClassifier};
use espresso_flow::parallel_pipeline::{discover_shot_dirs, BatchAnalyzer, ShotJob};
use espresso_flow::pipeline::{ShotAnalyzer, ShotReport};
use espresso_flow::record_store::{InMemoryShotStore, NewShot, ShotStore};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

const DEFAULT_LOG_FILTER: &str = "espresso_flow=info";

#[derive(Parser, Debug)]
#[command(name = "espresso_flow", version, about = "Espresso extraction stream analysis")]
struct Cli {
    /// YAML configuration; defaults are used when omitted.
    #[arg(long, global = true, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Trained model artifact (JSON). Without it the rule cascade decides.
    #[arg(long, global = true, value_name = "PATH")]
    model: Option<PathBuf>,

    /// Record results in a JSON shot store (created if missing).
    #[arg(long, global = true, value_name = "PATH")]
    store: Option<PathBuf>,

    /// Emit logs as JSON lines.
    #[arg(long, global = true)]
    json_logs: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Analyze one folder of numbered frames.
    Analyze {
        frames_dir: PathBuf,
        /// Write the kymograph PNG here.
        #[arg(long, value_name = "PATH")]
        kymograph: Option<PathBuf>,
        /// Pull duration in seconds; defaults to the folder's own duration.
        #[arg(long, value_name = "SECONDS")]
        pull_duration: Option<f64>,
    },
    /// Analyze every subdirectory of ROOT_DIR that contains frames.
    Batch { root_dir: PathBuf },
}

fn init_logging(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER));
    let builder = tracing_subscriber::fmt().with_env_filter(filter).with_writer(std::io::stderr);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

fn load_classifier(model: Option<&Path>, config: &AnalyzerConfig) -> ShotClassifier {
    let Some(path) = model else {
        return ShotClassifier::rules_only();
    };
    match LogisticModel::load(path) {
        Ok(model) => {
            info!(path = %path.display(), features = model.feature_names.len(), "trained model loaded");
            ShotClassifier::with_model(Arc::new(model), config.decision_threshold)
        }
        Err(err) => {
            warn!(path = %path.display(), error = %err, "could not load model, using rule-based fallback");
            ShotClassifier::rules_only()
        }
    }
}

fn open_store(path: &Path) -> Result<InMemoryShotStore> {
    if path.exists() {
        InMemoryShotStore::load_json(path).with_context(|| format!("reading shot store {}", path.display()))
    } else {
        Ok(InMemoryShotStore::new())
    }
}

fn record(store: &InMemoryShotStore, report: &ShotReport) {
    let shot = NewShot {
        filename: report.source.clone(),
        label: report.label,
        confidence: report.confidence,
        features: Some(report.features.clone()),
        video_duration_s: report.features.pull_duration_s,
        notes: String::new(),
    };
    if let Err(err) = store.create(shot) {
        warn!(source = %report.source, error = %err, "shot not recorded");
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.json_logs);

    let config = match &cli.config {
        Some(path) => AnalyzerConfig::load(path).with_context(|| format!("loading config {}", path.display()))?,
        None => AnalyzerConfig::default(),
    };
    let classifier = load_classifier(cli.model.as_deref(), &config);
    let analyzer = ShotAnalyzer::new(config, classifier).context("building analyzer")?;
    let store = cli.store.as_deref().map(open_store).transpose()?;

    match cli.command {
        Command::Analyze {
            frames_dir,
            kymograph,
            pull_duration,
        } => {
            let analysis = analyzer
                .analyze_folder(&frames_dir, pull_duration)
                .with_context(|| format!("analyzing {}", frames_dir.display()))?;

            if let Some(path) = kymograph {
                if analysis.save_kymograph(&path)? {
                    info!(path = %path.display(), "kymograph written");
                } else {
                    warn!("too few frames for a kymograph");
                }
            }
            if let Some(store) = &store {
                record(store, &analysis.report);
            }
            println!("{}", serde_json::to_string_pretty(&analysis.report)?);
        }
        Command::Batch { root_dir } => {
            let dirs = discover_shot_dirs(&root_dir).with_context(|| format!("listing {}", root_dir.display()))?;
            info!(shots = dirs.len(), root = %root_dir.display(), "starting batch");

            let batch = BatchAnalyzer::new(analyzer);
            let results = batch.analyze_all(dirs.iter().map(ShotJob::new).collect()).await;
            batch.shutdown().await;

            let mut reports = Vec::new();
            for (dir, result) in dirs.iter().zip(results) {
                match result {
                    Ok(report) => {
                        if let Some(store) = &store {
                            record(store, &report);
                        }
                        reports.push(report);
                    }
                    Err(err) => warn!(dir = %dir.display(), error = %err, "shot failed"),
                }
            }
            println!("{}", serde_json::to_string_pretty(&reports)?);
        }
    }

    if let (Some(store), Some(path)) = (&store, &cli.store) {
        store.save_json(path)?;
        info!(summary = ?store.summary(), "shot store updated");
    }

    Ok(())
}
