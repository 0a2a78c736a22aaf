use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use tracing::info;
use tracing_subscriber::EnvFilter;

use polads::{AucInput, Dataset, FeatureSet, LdaTopics, PipelineConfig, TextClassifier};

/// Train and evaluate the political-ad text classifier.
#[derive(Debug, Parser)]
#[command(version, about)]
struct Args {
    /// Training set with `text` and `target` columns (CSV or Parquet).
    #[arg(long, default_value = "fbpac-ads-en-US-train.csv")]
    train: PathBuf,

    /// Test set with the same columns.
    #[arg(long, default_value = "fbpac-ads-en-US-test.csv")]
    test: PathBuf,

    #[arg(long, default_value = "models/lda_model.json")]
    lda_model: PathBuf,

    #[arg(long, default_value = "models/lda_dictionary.json")]
    lda_dictionary: PathBuf,

    /// Where the fitted pipeline is written and read back from.
    #[arg(long, default_value = "text_classifier.pk")]
    artifact: PathBuf,

    /// Skip topic features and the LDA model entirely.
    #[arg(long)]
    lexical_only: bool,

    /// Compute ROC-AUC from thresholded predictions instead of probabilities.
    #[arg(long)]
    auc_on_labels: bool,

    #[arg(long, default_value_t = 1.0)]
    c: f64,

    #[arg(long, default_value_t = 100)]
    max_iter: usize,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();

    let train = Dataset::load(&args.train)
        .with_context(|| format!("loading training set {}", args.train.display()))?;
    let test = Dataset::load(&args.test)
        .with_context(|| format!("loading test set {}", args.test.display()))?;

    let config = PipelineConfig {
        features: if args.lexical_only {
            FeatureSet::Lexical
        } else {
            FeatureSet::LexicalWithTopics
        },
        c: args.c,
        max_iter: args.max_iter,
        ..PipelineConfig::default()
    };

    let topics = match config.features {
        FeatureSet::Lexical => None,
        FeatureSet::LexicalWithTopics => Some(
            LdaTopics::load(&args.lda_model, &args.lda_dictionary)
                .context("loading LDA model and dictionary")?,
        ),
    };

    let (pipeline, report) = TextClassifier::fit(config.clone(), topics, train.texts(), train.labels())
        .context("fitting pipeline")?;
    info!(
        vocabulary = report.vocabulary_size,
        features = report.n_features,
        iterations = report.optimizer.iterations,
        topic_failures = report.topic_failures.len(),
        "pipeline fitted"
    );

    pipeline
        .save(&args.artifact)
        .with_context(|| format!("saving pipeline to {}", args.artifact.display()))?;
    drop(pipeline);

    let pipeline: TextClassifier = TextClassifier::load_expecting(&args.artifact, &config)
        .with_context(|| format!("reloading pipeline from {}", args.artifact.display()))?;

    let auc_input = if args.auc_on_labels {
        AucInput::HardLabels
    } else {
        AucInput::Probabilities
    };
    let train_scores = pipeline
        .evaluate(&train, auc_input)
        .context("scoring training set")?;
    let test_scores = pipeline
        .evaluate(&test, auc_input)
        .context("scoring test set")?;

    println!("{}", auc_line(train_scores.roc_auc));
    println!("{}", auc_line(test_scores.roc_auc));
    println!("F1-score (train): {}", train_scores.f1);
    println!("F1-score (test): {}", test_scores.f1);

    Ok(())
}

/// ROC-AUC is printed bare; a single-class split has none.
fn auc_line(auc: Option<f64>) -> String {
    auc.map_or_else(|| "undefined".to_owned(), |auc| auc.to_string())
}
