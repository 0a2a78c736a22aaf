//! The fitted text-classification pipeline and its on-disk artifact.
//!
//! A pipeline is built once by [`TextClassifier::fit`] and is immutable
//! afterwards. Its artifact is a single JSON document tagged with
//! [`ARTIFACT_FORMAT`] and [`SCHEMA_VERSION`]; loading refuses artifacts with
//! another tag or whose parts disagree on feature layout, since classifier
//! coefficients are bound to column positions.

use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::{
    fs::File,
    io::{BufReader, BufWriter, Read, Write},
    path::Path,
};
use tracing::info;

use crate::{
    classifier::{ClassWeight, Classifier, FitSummary, LogisticRegression},
    dataset::Dataset,
    error::{Error, Result},
    features::{self, SparseMatrix},
    metrics::{self, AucInput, ConfusionMatrix},
    topics::{self, LdaTopics, TopicFailure, TopicModel},
    tokenizer::{Tokenizer, TokenizerConfig},
    vectorizer::{CountVectorizer, TfidfTransformer},
};

pub const ARTIFACT_FORMAT: &str = "polads-pipeline";
pub const SCHEMA_VERSION: u32 = 1;

/// Which feature blocks feed the classifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FeatureSet {
    /// TF-IDF n-grams only.
    Lexical,
    /// TF-IDF n-grams followed by topic-membership weights.
    LexicalWithTopics,
}

/// Everything that determines a pipeline's shape. Stored in the artifact.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineConfig {
    pub features: FeatureSet,
    pub tokenizer: TokenizerConfig,
    pub ngram_range: (usize, usize),
    pub max_features: Option<usize>,
    /// Inverse L2 regularisation strength.
    pub c: f64,
    pub max_iter: usize,
    pub class_weight: ClassWeight,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            features: FeatureSet::LexicalWithTopics,
            tokenizer: TokenizerConfig::default(),
            ngram_range: (1, 2),
            max_features: Some(5000),
            c: 1.0,
            max_iter: 100,
            class_weight: ClassWeight::Balanced,
        }
    }
}

/// What fitting produced besides the pipeline itself.
#[derive(Debug, Clone)]
pub struct FitReport {
    pub vocabulary_size: usize,
    pub n_features: usize,
    pub topic_failures: Vec<TopicFailure>,
    pub optimizer: FitSummary,
}

/// Classifier input for a batch, row-aligned with the documents.
#[derive(Debug, Clone)]
pub struct Transformed {
    pub features: SparseMatrix,
    pub topic_failures: Vec<TopicFailure>,
}

/// Scores for one labelled dataset.
#[derive(Debug, Clone)]
pub struct Evaluation {
    /// `None` when the dataset holds a single class.
    pub roc_auc: Option<f64>,
    pub f1: f64,
    pub confusion: ConfusionMatrix,
    pub topic_failures: usize,
}

/// Tokenizer, TF-IDF vectorizer, optional topic features and a logistic
/// regression, fitted together.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TextClassifier<M = LdaTopics> {
    config: PipelineConfig,
    tokenizer: Tokenizer,
    vectorizer: CountVectorizer,
    tfidf: TfidfTransformer,
    topics: Option<M>,
    classifier: LogisticRegression,
}

#[derive(Serialize)]
struct ArtifactRef<'a, M> {
    format: &'a str,
    schema_version: u32,
    pipeline: &'a TextClassifier<M>,
}

#[derive(Deserialize)]
struct ArtifactHeader {
    format: String,
    schema_version: u32,
}

#[derive(Deserialize)]
#[serde(bound = "M: DeserializeOwned")]
struct Artifact<M> {
    pipeline: TextClassifier<M>,
}

impl<M: TopicModel> TextClassifier<M> {
    /// Fits every stage on `texts`. `topics` is required for
    /// [`FeatureSet::LexicalWithTopics`] and ignored otherwise.
    pub fn fit<S: AsRef<str>>(
        config: PipelineConfig,
        topics: Option<M>,
        texts: &[S],
        labels: &[bool],
    ) -> Result<(Self, FitReport)> {
        if texts.len() != labels.len() {
            return Err(Error::LengthMismatch {
                samples: texts.len(),
                labels: labels.len(),
            });
        }
        let topics = match config.features {
            FeatureSet::Lexical => None,
            FeatureSet::LexicalWithTopics => Some(topics.ok_or(Error::MissingTopicModel)?),
        };

        let tokenizer = Tokenizer::new(config.tokenizer.clone())?;
        let tokens = tokenize_all(&tokenizer, texts);

        let mut vectorizer = CountVectorizer::new(config.ngram_range, config.max_features);
        let counts = vectorizer.fit_transform(&tokens)?;
        let mut tfidf = TfidfTransformer::default();
        let lexical = tfidf.fit_transform(&counts)?;
        info!(
            documents = texts.len(),
            vocabulary = vectorizer.vocabulary_size(),
            "fitted lexical features"
        );

        let (features, topic_failures) = with_topics(lexical, topics.as_ref(), texts)?;

        let mut classifier = LogisticRegression::new(config.c, config.max_iter, config.class_weight);
        let optimizer = classifier.fit(&features, labels)?;

        let report = FitReport {
            vocabulary_size: vectorizer.vocabulary_size(),
            n_features: features.n_cols(),
            topic_failures,
            optimizer,
        };
        let pipeline = Self {
            config,
            tokenizer,
            vectorizer,
            tfidf,
            topics,
            classifier,
        };
        Ok((pipeline, report))
    }

    /// Builds classifier input for `texts` with the frozen vocabulary and
    /// topic model. Always one row per document.
    pub fn transform<S: AsRef<str>>(&self, texts: &[S]) -> Result<Transformed> {
        let tokens = tokenize_all(&self.tokenizer, texts);
        let counts = self.vectorizer.transform(&tokens);
        let lexical = self.tfidf.transform(&counts)?;
        let (features, topic_failures) = with_topics(lexical, self.topics.as_ref(), texts)?;
        Ok(Transformed {
            features,
            topic_failures,
        })
    }

    /// Probability that each document is political.
    pub fn predict_proba<S: AsRef<str>>(&self, texts: &[S]) -> Result<Vec<f64>> {
        let transformed = self.transform(texts)?;
        self.classifier.predict_proba(&transformed.features)
    }

    pub fn predict<S: AsRef<str>>(&self, texts: &[S]) -> Result<Vec<bool>> {
        let transformed = self.transform(texts)?;
        self.classifier.predict(&transformed.features)
    }

    /// Scores the pipeline against a labelled dataset.
    pub fn evaluate(&self, dataset: &Dataset, auc_input: AucInput) -> Result<Evaluation> {
        let transformed = self.transform(dataset.texts())?;
        let probas = self.classifier.predict_proba(&transformed.features)?;
        let predicted: Vec<bool> = probas.iter().map(|&p| p >= 0.5).collect();

        let scores = match auc_input {
            AucInput::Probabilities => probas,
            AucInput::HardLabels => predicted.iter().map(|&p| f64::from(u8::from(p))).collect(),
        };

        Ok(Evaluation {
            roc_auc: metrics::roc_auc(dataset.labels(), &scores),
            f1: metrics::f1_score(dataset.labels(), &predicted),
            confusion: metrics::confusion_matrix(&predicted, dataset.labels()),
            topic_failures: transformed.topic_failures.len(),
        })
    }

    #[inline]
    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    #[inline]
    pub fn classifier(&self) -> &LogisticRegression {
        &self.classifier
    }

    #[inline]
    pub fn vectorizer(&self) -> &CountVectorizer {
        &self.vectorizer
    }

    /// Total classifier input width.
    pub fn n_features(&self) -> usize {
        self.vectorizer.vocabulary_size() + self.topics.as_ref().map_or(0, |t| t.num_topics())
    }

    /// Checks that the parts agree on feature layout.
    fn validate(&self) -> Result<()> {
        let corrupt = |msg: String| Err(Error::CorruptArtifact(msg));

        if self.tokenizer.config() != &self.config.tokenizer {
            return corrupt("tokenizer differs from recorded config".into());
        }
        if self.vectorizer.ngram_range() != self.config.ngram_range
            || self.vectorizer.max_features() != self.config.max_features
        {
            return corrupt("vectorizer differs from recorded config".into());
        }
        if self.vectorizer.vocabulary_size() != self.tfidf.idf().len() {
            return corrupt(format!(
                "{} vocabulary terms but {} idf weights",
                self.vectorizer.vocabulary_size(),
                self.tfidf.idf().len()
            ));
        }
        match (self.config.features, &self.topics) {
            (FeatureSet::Lexical, None) | (FeatureSet::LexicalWithTopics, Some(_)) => {}
            (features, _) => return corrupt(format!("topic model presence does not match {features:?}")),
        }
        if self.classifier.n_features() != self.n_features() {
            return corrupt(format!(
                "{} coefficients for {} features",
                self.classifier.n_features(),
                self.n_features()
            ));
        }
        Ok(())
    }
}

impl<M: TopicModel + Serialize> TextClassifier<M> {
    pub fn save_to_writer(&self, writer: impl Write) -> Result<()> {
        let artifact = ArtifactRef {
            format: ARTIFACT_FORMAT,
            schema_version: SCHEMA_VERSION,
            pipeline: self,
        };
        serde_json::to_writer(writer, &artifact)?;
        Ok(())
    }

    /// Writes the whole pipeline to `path` as one artifact.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let mut writer = BufWriter::new(File::create(path.as_ref())?);
        self.save_to_writer(&mut writer)?;
        writer.flush()?;
        info!(path = %path.as_ref().display(), "saved pipeline");
        Ok(())
    }
}

impl<M: TopicModel + DeserializeOwned> TextClassifier<M> {
    pub fn load_from_reader(mut reader: impl Read) -> Result<Self> {
        let mut buffer = String::new();
        reader.read_to_string(&mut buffer)?;

        let header: ArtifactHeader = serde_json::from_str(&buffer)?;
        if header.format != ARTIFACT_FORMAT || header.schema_version != SCHEMA_VERSION {
            return Err(Error::SchemaMismatch {
                expected: format!("{ARTIFACT_FORMAT} v{SCHEMA_VERSION}"),
                found: format!("{} v{}", header.format, header.schema_version),
            });
        }

        let artifact: Artifact<M> = serde_json::from_str(&buffer)?;
        artifact.pipeline.validate()?;
        Ok(artifact.pipeline)
    }

    /// Reads a pipeline written by [`TextClassifier::save`].
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let pipeline = Self::load_from_reader(BufReader::new(File::open(path.as_ref())?))?;
        info!(
            path = %path.as_ref().display(),
            features = pipeline.n_features(),
            "loaded pipeline"
        );
        Ok(pipeline)
    }

    /// Like [`TextClassifier::load`], but also requires the artifact to have
    /// been fitted with `expected`.
    pub fn load_expecting(path: impl AsRef<Path>, expected: &PipelineConfig) -> Result<Self> {
        let pipeline = Self::load(path)?;
        if &pipeline.config != expected {
            return Err(Error::ConfigMismatch);
        }
        Ok(pipeline)
    }
}

fn tokenize_all<S: AsRef<str>>(tokenizer: &Tokenizer, texts: &[S]) -> Vec<Vec<String>> {
    texts.iter().map(|t| tokenizer.tokenize(t.as_ref())).collect()
}

/// Appends topic features to `lexical` when a topic model is present.
fn with_topics<M: TopicModel, S: AsRef<str>>(
    lexical: SparseMatrix,
    model: Option<&M>,
    texts: &[S],
) -> Result<(SparseMatrix, Vec<TopicFailure>)> {
    let Some(model) = model else {
        return Ok((lexical, Vec::new()));
    };

    let topic_features = topics::extract(model, texts);
    if !topic_features.failures.is_empty() {
        info!(
            failed = topic_features.failures.len(),
            documents = texts.len(),
            "topic vectors replaced with zeros"
        );
    }
    let combined = features::combine(&lexical, &topic_features.matrix)?;
    Ok((combined, topic_features.failures))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::topics::tests::sample_topics;

    fn corpus() -> (Vec<&'static str>, Vec<bool>) {
        (
            vec![
                "Vote for change! The senate needs you",
                "Buy our amazing shoes on sale",
                "Call your senator and vote in November",
                "New running shoes, half price sale",
            ],
            vec![true, false, true, false],
        )
    }

    #[test]
    fn fits_and_recovers_training_labels() {
        let (texts, labels) = corpus();
        let (pipeline, report) =
            TextClassifier::fit(PipelineConfig::default(), Some(sample_topics()), &texts, &labels)
                .unwrap();

        assert_eq!(report.n_features, report.vocabulary_size + 2);
        assert!(report.topic_failures.is_empty());
        assert_eq!(pipeline.predict(&texts).unwrap(), labels);
    }

    #[test]
    fn topic_pipeline_requires_a_model() {
        let (texts, labels) = corpus();
        let result = TextClassifier::<LdaTopics>::fit(PipelineConfig::default(), None, &texts, &labels);
        assert!(matches!(result, Err(Error::MissingTopicModel)));
    }

    #[test]
    fn lexical_variant_ignores_topics() {
        let (texts, labels) = corpus();
        let config = PipelineConfig {
            features: FeatureSet::Lexical,
            ..PipelineConfig::default()
        };
        let (pipeline, report) =
            TextClassifier::fit(config, Some(sample_topics()), &texts, &labels).unwrap();
        assert_eq!(report.n_features, report.vocabulary_size);
        assert_eq!(pipeline.n_features(), report.vocabulary_size);
    }

    #[test]
    fn transform_keeps_width_for_unseen_text() {
        let (texts, labels) = corpus();
        let (pipeline, report) =
            TextClassifier::fit(PipelineConfig::default(), Some(sample_topics()), &texts, &labels)
                .unwrap();
        let transformed = pipeline
            .transform(&["completely unrelated words", ""])
            .unwrap();
        assert_eq!(transformed.features.n_rows(), 2);
        assert_eq!(transformed.features.n_cols(), report.n_features);
    }

    #[test]
    fn evaluation_on_training_data() {
        let (texts, labels) = corpus();
        let (pipeline, _) =
            TextClassifier::fit(PipelineConfig::default(), Some(sample_topics()), &texts, &labels)
                .unwrap();
        let dataset = Dataset::new(texts.iter().map(|t| t.to_string()).collect(), labels).unwrap();

        let evaluation = pipeline.evaluate(&dataset, AucInput::Probabilities).unwrap();
        assert_eq!(evaluation.f1, 1.0);
        assert_eq!(evaluation.roc_auc, Some(1.0));
        assert_eq!(evaluation.confusion.accuracy(), 1.0);

        let hard = pipeline.evaluate(&dataset, AucInput::HardLabels).unwrap();
        assert_eq!(hard.roc_auc, Some(1.0));
    }

    #[test]
    fn artifact_round_trip_in_memory() {
        let (texts, labels) = corpus();
        let (pipeline, _) =
            TextClassifier::fit(PipelineConfig::default(), Some(sample_topics()), &texts, &labels)
                .unwrap();

        let mut buffer = Vec::new();
        pipeline.save_to_writer(&mut buffer).unwrap();
        let restored = TextClassifier::<LdaTopics>::load_from_reader(buffer.as_slice()).unwrap();

        assert_eq!(restored.config(), pipeline.config());
        assert_eq!(restored.classifier(), pipeline.classifier());
        assert_eq!(
            restored.predict_proba(&texts).unwrap(),
            pipeline.predict_proba(&texts).unwrap()
        );
    }

    #[test]
    fn rejects_other_schema_versions() {
        let (texts, labels) = corpus();
        let (pipeline, _) =
            TextClassifier::fit(PipelineConfig::default(), Some(sample_topics()), &texts, &labels)
                .unwrap();

        let mut value = serde_json::to_value(ArtifactRef {
            format: ARTIFACT_FORMAT,
            schema_version: SCHEMA_VERSION,
            pipeline: &pipeline,
        })
        .unwrap();
        value["schema_version"] = serde_json::json!(SCHEMA_VERSION + 1);
        let bytes = serde_json::to_vec(&value).unwrap();

        assert!(matches!(
            TextClassifier::<LdaTopics>::load_from_reader(bytes.as_slice()),
            Err(Error::SchemaMismatch { .. })
        ));
    }

    #[test]
    fn rejects_inconsistent_layout() {
        let (texts, labels) = corpus();
        let (pipeline, _) =
            TextClassifier::fit(PipelineConfig::default(), Some(sample_topics()), &texts, &labels)
                .unwrap();

        let mut value = serde_json::to_value(ArtifactRef {
            format: ARTIFACT_FORMAT,
            schema_version: SCHEMA_VERSION,
            pipeline: &pipeline,
        })
        .unwrap();
        value["pipeline"]["classifier"]["coefficients"]
            .as_array_mut()
            .unwrap()
            .pop();
        let bytes = serde_json::to_vec(&value).unwrap();

        assert!(matches!(
            TextClassifier::<LdaTopics>::load_from_reader(bytes.as_slice()),
            Err(Error::CorruptArtifact(_))
        ));
    }

    #[test]
    fn rejects_dictionary_wider_than_topic_model() {
        let (texts, labels) = corpus();
        let (pipeline, _) =
            TextClassifier::fit(PipelineConfig::default(), Some(sample_topics()), &texts, &labels)
                .unwrap();

        let mut value = serde_json::to_value(ArtifactRef {
            format: ARTIFACT_FORMAT,
            schema_version: SCHEMA_VERSION,
            pipeline: &pipeline,
        })
        .unwrap();
        value["pipeline"]["topics"]["dictionary"]["token2id"]["turnout"] = serde_json::json!(99);
        let bytes = serde_json::to_vec(&value).unwrap();

        assert!(matches!(
            TextClassifier::<LdaTopics>::load_from_reader(bytes.as_slice()),
            Err(Error::Json(_))
        ));
    }
}
