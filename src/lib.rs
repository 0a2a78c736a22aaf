//! Political-ad text classification: stemmed TF-IDF n-grams plus optional LDA
//! topic weights, fed to a class-balanced logistic regression.

pub mod classifier;
pub mod dataset;
pub mod error;
pub mod features;
pub mod metrics;
pub mod optim;
pub mod pipeline;
pub mod stopwords;
pub mod tokenizer;
pub mod topics;
pub mod vectorizer;

pub use classifier::{ClassWeight, Classifier, LogisticRegression};
pub use dataset::Dataset;
pub use error::{Error, Result};
pub use metrics::AucInput;
pub use pipeline::{FeatureSet, PipelineConfig, TextClassifier};
pub use topics::{LdaTopics, TopicModel};
