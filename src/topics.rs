//! Topic-membership features from a pre-trained LDA model.
//!
//! The dictionary and model are produced elsewhere and only read here. Both
//! are JSON documents:
//!
//! - dictionary: `{"token2id": {"vote": 0, "senate": 1, ...}}`
//! - model: `{"alpha": [..K], "topic_term": [[..V]; K], ...}` where
//!   `topic_term` holds the variational topic-word parameters (lambda).

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::{collections::BTreeMap, fs::File, io::BufReader, path::Path};
use tracing::{info, warn};

use crate::{
    error::{Error, Result},
    features::SparseMatrix,
    tokenizer,
};

/// Why a single document could not be mapped to topics.
#[derive(Debug, Clone, PartialEq, thiserror::Error, Serialize, Deserialize)]
pub enum TopicError {
    #[error("topic {topic} is outside the model's {num_topics} topics")]
    TopicOutOfRange { topic: usize, num_topics: usize },

    #[error("term id {term} is outside the model vocabulary of {width}")]
    TermOutOfRange { term: usize, width: usize },

    #[error("topic {0} has a non-finite weight")]
    NonFiniteWeight(usize),
}

/// A topic model that maps raw text to sparse `(topic, weight)` pairs.
pub trait TopicModel {
    fn num_topics(&self) -> usize;
    fn topic_distribution(&self, text: &str) -> std::result::Result<Vec<(usize, f64)>, TopicError>;
}

/// Token to term-id mapping the topic model was trained with.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Dictionary {
    token2id: IndexMap<String, usize>,
}

impl Dictionary {
    pub fn new(token2id: IndexMap<String, usize>) -> Self {
        Self { token2id }
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let reader = BufReader::new(File::open(path)?);
        Ok(serde_json::from_reader(reader)?)
    }

    /// Sorted `(term id, count)` pairs. Unknown tokens are ignored.
    pub fn doc2bow<S: AsRef<str>>(&self, tokens: &[S]) -> Vec<(usize, u32)> {
        tokens
            .iter()
            .filter_map(|t| self.token2id.get(t.as_ref()).copied())
            .fold(BTreeMap::new(), |mut map, id| {
                *map.entry(id).or_insert(0u32) += 1;
                map
            })
            .into_iter()
            .collect()
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.token2id.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.token2id.is_empty()
    }

    fn max_id(&self) -> Option<usize> {
        self.token2id.values().copied().max()
    }
}

/// The serialized state of an [`LdaModel`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LdaState {
    pub alpha: Vec<f64>,
    pub topic_term: Vec<Vec<f64>>,
    #[serde(default = "default_minimum_probability")]
    pub minimum_probability: f64,
    #[serde(default = "default_iterations")]
    pub iterations: usize,
    #[serde(default = "default_gamma_threshold")]
    pub gamma_threshold: f64,
}

fn default_minimum_probability() -> f64 {
    0.01
}

fn default_iterations() -> usize {
    50
}

fn default_gamma_threshold() -> f64 {
    0.001
}

/// A frozen LDA model doing per-document variational inference.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "LdaState", into = "LdaState")]
pub struct LdaModel {
    state: LdaState,
    /// `exp(E[log beta])` per topic, derived from `topic_term`.
    exp_elog_beta: Vec<Vec<f64>>,
}

impl LdaModel {
    pub fn new(state: LdaState) -> Result<Self> {
        let num_topics = state.alpha.len();
        if num_topics == 0 {
            return Err(Error::InvalidTopicModel("model has no topics".into()));
        }
        if state.topic_term.len() != num_topics {
            return Err(Error::InvalidTopicModel(format!(
                "{} alpha values but {} topic rows",
                num_topics,
                state.topic_term.len()
            )));
        }
        let width = state.topic_term[0].len();
        if width == 0 || state.topic_term.iter().any(|row| row.len() != width) {
            return Err(Error::InvalidTopicModel(
                "topic rows must share a non-zero width".into(),
            ));
        }
        let positive = |v: &f64| v.is_finite() && *v > 0.0;
        if !state.alpha.iter().all(positive) || !state.topic_term.iter().flatten().all(positive) {
            return Err(Error::InvalidTopicModel(
                "parameters must be finite and positive".into(),
            ));
        }

        let exp_elog_beta = state
            .topic_term
            .iter()
            .map(|row| {
                let psi_total = digamma(row.iter().sum());
                row.iter().map(|&v| (digamma(v) - psi_total).exp()).collect()
            })
            .collect();

        Ok(Self {
            state,
            exp_elog_beta,
        })
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let reader = BufReader::new(File::open(path)?);
        let state: LdaState = serde_json::from_reader(reader)?;
        Self::new(state)
    }

    #[inline]
    pub fn num_topics(&self) -> usize {
        self.state.alpha.len()
    }

    /// Number of term ids the model knows.
    #[inline]
    pub fn num_terms(&self) -> usize {
        self.state.topic_term[0].len()
    }

    /// Infers the topic mixture of one bag of words. Topics whose weight is
    /// below the model's minimum probability are left out.
    pub fn infer(&self, bow: &[(usize, u32)]) -> std::result::Result<Vec<(usize, f64)>, TopicError> {
        let k = self.num_topics();
        let width = self.num_terms();
        if let Some(&(term, _)) = bow.iter().find(|&&(term, _)| term >= width) {
            return Err(TopicError::TermOutOfRange { term, width });
        }

        let alpha = &self.state.alpha;
        if bow.is_empty() {
            return self.filter_topics(alpha.clone());
        }

        let mut gamma = vec![1.0; k];
        let mut exp_elog_theta = vec![0.0; k];
        for _ in 0..self.state.iterations.max(1) {
            let psi_total = digamma(gamma.iter().sum());
            for (t, g) in gamma.iter().enumerate() {
                exp_elog_theta[t] = (digamma(*g) - psi_total).exp();
            }

            let mut next = alpha.clone();
            for &(term, count) in bow {
                let phinorm: f64 = (0..k)
                    .map(|t| exp_elog_theta[t] * self.exp_elog_beta[t][term])
                    .sum::<f64>()
                    + 1e-100;
                let ratio = count as f64 / phinorm;
                for t in 0..k {
                    next[t] += exp_elog_theta[t] * self.exp_elog_beta[t][term] * ratio;
                }
            }

            let mean_change =
                next.iter().zip(&gamma).map(|(a, b)| (a - b).abs()).sum::<f64>() / k as f64;
            gamma = next;
            if mean_change < self.state.gamma_threshold {
                break;
            }
        }

        self.filter_topics(gamma)
    }

    /// Normalises `gamma` and drops topics under the minimum probability.
    fn filter_topics(&self, gamma: Vec<f64>) -> std::result::Result<Vec<(usize, f64)>, TopicError> {
        let total: f64 = gamma.iter().sum();
        let mut topics = Vec::new();
        for (t, g) in gamma.into_iter().enumerate() {
            let weight = g / total;
            if !weight.is_finite() {
                return Err(TopicError::NonFiniteWeight(t));
            }
            if weight >= self.state.minimum_probability {
                topics.push((t, weight));
            }
        }
        Ok(topics)
    }
}

impl TryFrom<LdaState> for LdaModel {
    type Error = Error;

    fn try_from(state: LdaState) -> Result<Self> {
        Self::new(state)
    }
}

impl From<LdaModel> for LdaState {
    fn from(model: LdaModel) -> Self {
        model.state
    }
}

/// A dictionary and LDA model loaded together.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "LdaTopicsState", into = "LdaTopicsState")]
pub struct LdaTopics {
    dictionary: Dictionary,
    model: LdaModel,
}

/// Serialized form of [`LdaTopics`], checked by [`LdaTopics::new`] on the way in.
#[derive(Serialize, Deserialize)]
struct LdaTopicsState {
    dictionary: Dictionary,
    model: LdaModel,
}

impl TryFrom<LdaTopicsState> for LdaTopics {
    type Error = Error;

    fn try_from(state: LdaTopicsState) -> Result<Self> {
        Self::new(state.dictionary, state.model)
    }
}

impl From<LdaTopics> for LdaTopicsState {
    fn from(topics: LdaTopics) -> Self {
        Self {
            dictionary: topics.dictionary,
            model: topics.model,
        }
    }
}

impl LdaTopics {
    pub fn new(dictionary: Dictionary, model: LdaModel) -> Result<Self> {
        if let Some(max_id) = dictionary.max_id() {
            if max_id >= model.num_terms() {
                return Err(Error::InvalidTopicModel(format!(
                    "dictionary id {} exceeds model vocabulary of {}",
                    max_id,
                    model.num_terms()
                )));
            }
        }
        Ok(Self { dictionary, model })
    }

    /// Loads both artifacts once; the result is held for the pipeline's lifetime.
    pub fn load(model_path: impl AsRef<Path>, dictionary_path: impl AsRef<Path>) -> Result<Self> {
        let model = LdaModel::load(model_path.as_ref())?;
        let dictionary = Dictionary::load(dictionary_path.as_ref())?;
        info!(
            topics = model.num_topics(),
            terms = dictionary.len(),
            "loaded topic model"
        );
        Self::new(dictionary, model)
    }

    #[inline]
    pub fn dictionary(&self) -> &Dictionary {
        &self.dictionary
    }
}

impl TopicModel for LdaTopics {
    fn num_topics(&self) -> usize {
        self.model.num_topics()
    }

    fn topic_distribution(&self, text: &str) -> std::result::Result<Vec<(usize, f64)>, TopicError> {
        let tokens = tokenizer::preprocess(text);
        let bow = self.dictionary.doc2bow(tokens.as_slice());
        self.model.infer(&bow)
    }
}

/// A document whose topic vector could not be computed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TopicFailure {
    pub row: usize,
    pub error: TopicError,
}

/// Topic features for a batch, one row per input document.
#[derive(Debug, Clone)]
pub struct TopicFeatures {
    pub matrix: SparseMatrix,
    /// Rows that were filled with zeros because inference failed.
    pub failures: Vec<TopicFailure>,
}

/// Places sparse `(topic, weight)` pairs into a dense vector indexed by
/// topic id, absent topics at zero.
pub fn dense_topic_vector(
    pairs: &[(usize, f64)],
    num_topics: usize,
) -> std::result::Result<Vec<f64>, TopicError> {
    let mut dense = vec![0.0; num_topics];
    for &(topic, weight) in pairs {
        if topic >= num_topics {
            return Err(TopicError::TopicOutOfRange { topic, num_topics });
        }
        if !weight.is_finite() {
            return Err(TopicError::NonFiniteWeight(topic));
        }
        dense[topic] = weight;
    }
    Ok(dense)
}

/// Maps documents to fixed-width topic-membership rows.
pub fn extract<M: TopicModel + ?Sized, S: AsRef<str>>(model: &M, texts: &[S]) -> TopicFeatures {
    let num_topics = model.num_topics();
    let mut failures = Vec::new();
    let rows: Vec<Vec<f64>> = texts
        .iter()
        .enumerate()
        .map(|(row, text)| {
            model
                .topic_distribution(text.as_ref())
                .and_then(|pairs| dense_topic_vector(&pairs, num_topics))
                .unwrap_or_else(|error| {
                    warn!(row, %error, "topic vector failed, using zeros");
                    failures.push(TopicFailure { row, error });
                    vec![0.0; num_topics]
                })
        })
        .collect();

    let mut matrix = SparseMatrix::new(num_topics);
    for row in rows {
        matrix.push_row(
            row.into_iter()
                .enumerate()
                .filter(|&(_, v)| v != 0.0)
                .collect(),
        );
    }

    TopicFeatures { matrix, failures }
}

/// Digamma function via the recurrence up to x >= 6 and the asymptotic series.
pub fn digamma(mut x: f64) -> f64 {
    let mut result = 0.0;
    while x < 6.0 {
        result -= 1.0 / x;
        x += 1.0;
    }
    let inv = 1.0 / x;
    let inv2 = inv * inv;
    result + x.ln() - 0.5 * inv
        - inv2 * (1.0 / 12.0 - inv2 * (1.0 / 120.0 - inv2 * (1.0 / 252.0 - inv2 * (1.0 / 240.0 - inv2 / 132.0))))
}
