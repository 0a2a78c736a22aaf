use regex::Regex;
use rust_stemmers::{Algorithm, Stemmer};
use serde::{Deserialize, Serialize};
use std::{borrow::Cow, fmt};

use crate::{error::Error, stopwords};

/// Runs of word characters, or one of `? ! " ' ; :`.
pub const TOKEN_PATTERN: &str = r#"\w+|\?|!|"|'|;|:"#;

/// Bounds, in characters, for tokens fed to the topic model dictionary.
const PREPROCESS_MIN_LEN: usize = 2;
const PREPROCESS_MAX_LEN: usize = 15;

/// Language of the Snowball stemmer applied to every token.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StemLanguage {
    English,
}

impl StemLanguage {
    fn algorithm(self) -> Algorithm {
        match self {
            StemLanguage::English => Algorithm::English,
        }
    }
}

/// The persisted form of a [`Tokenizer`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenizerConfig {
    pub pattern: String,
    pub language: StemLanguage,
    pub lowercase: bool,
}

impl Default for TokenizerConfig {
    fn default() -> Self {
        Self {
            pattern: TOKEN_PATTERN.to_owned(),
            language: StemLanguage::English,
            lowercase: true,
        }
    }
}

/// A regex tokenizer that stems every matched token.
#[derive(Serialize, Deserialize)]
#[serde(try_from = "TokenizerConfig", into = "TokenizerConfig")]
pub struct Tokenizer {
    config: TokenizerConfig,
    /// Compiled form of `config.pattern`.
    regex: Regex,
    stemmer: Stemmer,
}

impl Tokenizer {
    pub fn new(config: TokenizerConfig) -> Result<Self, Error> {
        let regex = Regex::new(&config.pattern)?;
        let stemmer = Stemmer::create(config.language.algorithm());
        Ok(Self {
            config,
            regex,
            stemmer,
        })
    }

    /// Splits `text` into stemmed tokens. Empty input yields no tokens.
    pub fn tokenize(&self, text: &str) -> Vec<String> {
        let text: Cow<'_, str> = if self.config.lowercase {
            Cow::Owned(text.to_lowercase())
        } else {
            Cow::Borrowed(text)
        };

        self.regex
            .find_iter(&text)
            .map(|m| self.stem(m.as_str()))
            .collect()
    }

    /// Tokens of two characters or fewer (including the punctuation marks)
    /// are kept as they are.
    fn stem(&self, token: &str) -> String {
        if token.chars().count() <= 2 {
            token.to_owned()
        } else {
            self.stemmer.stem(token).into_owned()
        }
    }

    #[inline]
    pub fn config(&self) -> &TokenizerConfig {
        &self.config
    }
}

impl Default for Tokenizer {
    fn default() -> Self {
        let config = TokenizerConfig::default();
        let regex = Regex::new(&config.pattern).expect("default token pattern compiles");
        let stemmer = Stemmer::create(config.language.algorithm());
        Self {
            config,
            regex,
            stemmer,
        }
    }
}

impl Clone for Tokenizer {
    fn clone(&self) -> Self {
        Self {
            config: self.config.clone(),
            regex: self.regex.clone(),
            stemmer: Stemmer::create(self.config.language.algorithm()),
        }
    }
}

impl fmt::Debug for Tokenizer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Tokenizer")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl TryFrom<TokenizerConfig> for Tokenizer {
    type Error = Error;

    fn try_from(config: TokenizerConfig) -> Result<Self, Self::Error> {
        Self::new(config)
    }
}

impl From<Tokenizer> for TokenizerConfig {
    fn from(tokenizer: Tokenizer) -> Self {
        tokenizer.config
    }
}

/// Reduces a document to the plain bag-of-words tokens the topic model
/// dictionary was built from: lower-cased alphabetic runs of 2 to 15
/// characters, stop words removed. No stemming.
pub fn preprocess(text: &str) -> Vec<String> {
    text.to_lowercase()
        .split(|c: char| !c.is_alphabetic())
        .filter(|w| (PREPROCESS_MIN_LEN..=PREPROCESS_MAX_LEN).contains(&w.chars().count()))
        .filter(|w| !stopwords::is_english_stop_word(w))
        .map(str::to_owned)
        .collect()
}
