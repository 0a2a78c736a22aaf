use indexmap::IndexSet;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::debug;

use crate::{
    error::{Error, Result},
    features::{SparseMatrix, SparseRow},
    stopwords,
};

/// Turns token sequences into n-gram count vectors over a frozen vocabulary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CountVectorizer {
    /// Inclusive range of n-gram lengths.
    ngram_range: (usize, usize),
    /// Keep only this many of the most frequent terms.
    max_features: Option<usize>,
    remove_stop_words: bool,
    /// The vocabulary; a term's index is its column.
    vocabulary: IndexSet<Box<str>>,
}

impl CountVectorizer {
    pub fn new(ngram_range: (usize, usize), max_features: Option<usize>) -> Self {
        Self {
            ngram_range,
            max_features,
            remove_stop_words: true,
            vocabulary: IndexSet::new(),
        }
    }

    pub fn with_stop_words(mut self, remove: bool) -> Self {
        self.remove_stop_words = remove;
        self
    }

    /// The n-gram terms of one token sequence, in document order.
    pub fn analyze(&self, tokens: &[String]) -> Vec<String> {
        let kept: Vec<&str> = tokens
            .iter()
            .map(String::as_str)
            .filter(|t| !self.remove_stop_words || !stopwords::is_english_stop_word(t))
            .collect();

        let (min_n, max_n) = self.ngram_range;
        let mut terms = Vec::new();
        for n in min_n.max(1)..=max_n {
            terms.extend(kept.windows(n).map(|gram| gram.join(" ")));
        }
        terms
    }

    /// Learns the vocabulary from tokenized documents.
    ///
    /// Terms are ranked by total count across the corpus (ties by term) and
    /// capped at `max_features`; the survivors are laid out in lexicographic
    /// column order.
    pub fn fit(&mut self, documents: &[Vec<String>]) -> Result<()> {
        if documents.is_empty() {
            return Err(Error::EmptyCorpus);
        }

        let mut term_counts: HashMap<String, usize> = HashMap::new();
        for doc in documents {
            for term in self.analyze(doc) {
                *term_counts.entry(term).or_default() += 1;
            }
        }

        let mut ranked: Vec<(String, usize)> = term_counts.into_iter().collect();
        ranked.sort_unstable_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
        if let Some(max_features) = self.max_features {
            ranked.truncate(max_features);
        }

        let mut terms: Vec<String> = ranked.into_iter().map(|(term, _)| term).collect();
        terms.sort_unstable();
        self.vocabulary = terms.into_iter().map(String::into_boxed_str).collect();

        if self.vocabulary.is_empty() {
            return Err(Error::EmptyVocabulary);
        }

        debug!(terms = self.vocabulary.len(), "fitted count vocabulary");
        Ok(())
    }

    /// Counts vocabulary terms per document. Unknown terms are ignored, so
    /// the width is always the vocabulary size.
    pub fn transform(&self, documents: &[Vec<String>]) -> SparseMatrix {
        let mut matrix = SparseMatrix::new(self.vocabulary.len());
        for doc in documents {
            let counts = self
                .analyze(doc)
                .into_iter()
                .filter_map(|term| self.vocabulary.get_index_of(term.as_str()))
                .fold(HashMap::new(), |mut map, col| {
                    *map.entry(col).or_insert(0usize) += 1;
                    map
                });

            let mut row: SparseRow = counts
                .into_iter()
                .map(|(col, count)| (col, count as f64))
                .collect();
            row.sort_unstable_by_key(|&(col, _)| col);
            matrix.push_row(row);
        }
        matrix
    }

    pub fn fit_transform(&mut self, documents: &[Vec<String>]) -> Result<SparseMatrix> {
        self.fit(documents)?;
        Ok(self.transform(documents))
    }

    #[inline]
    pub fn vocabulary(&self) -> &IndexSet<Box<str>> {
        &self.vocabulary
    }

    #[inline]
    pub fn vocabulary_size(&self) -> usize {
        self.vocabulary.len()
    }

    #[inline]
    pub fn ngram_range(&self) -> (usize, usize) {
        self.ngram_range
    }

    #[inline]
    pub fn max_features(&self) -> Option<usize> {
        self.max_features
    }
}

/// Rescales counts by smoothed inverse document frequency and normalises
/// each row to unit L2 length.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TfidfTransformer {
    idf: Vec<f64>,
}

impl TfidfTransformer {
    /// `idf = ln((1 + n) / (1 + df)) + 1`
    pub fn fit(&mut self, counts: &SparseMatrix) -> Result<()> {
        if counts.n_rows() == 0 {
            return Err(Error::EmptyCorpus);
        }

        let mut doc_freq = vec![0usize; counts.n_cols()];
        for row in counts.rows() {
            for &(col, value) in row {
                if value > 0.0 {
                    doc_freq[col] += 1;
                }
            }
        }

        let n = counts.n_rows() as f64;
        self.idf = doc_freq
            .into_iter()
            .map(|df| ((1.0 + n) / (1.0 + df as f64)).ln() + 1.0)
            .collect();
        Ok(())
    }

    pub fn transform(&self, counts: &SparseMatrix) -> Result<SparseMatrix> {
        if counts.n_cols() != self.idf.len() {
            return Err(Error::FeatureWidth {
                expected: self.idf.len(),
                actual: counts.n_cols(),
            });
        }

        let mut weighted = counts.clone();
        for row in weighted.rows_mut() {
            for (col, value) in row.iter_mut() {
                *value *= self.idf[*col];
            }
            let norm = row.iter().map(|(_, v)| v * v).sum::<f64>().sqrt();
            if norm > 0.0 {
                row.iter_mut().for_each(|(_, v)| *v /= norm);
            }
        }
        Ok(weighted)
    }

    pub fn fit_transform(&mut self, counts: &SparseMatrix) -> Result<SparseMatrix> {
        self.fit(counts)?;
        self.transform(counts)
    }

    #[inline]
    pub fn idf(&self) -> &[f64] {
        &self.idf
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn docs(texts: &[&str]) -> Vec<Vec<String>> {
        texts
            .iter()
            .map(|t| t.split_whitespace().map(str::to_owned).collect())
            .collect()
    }

    #[test]
    fn builds_unigrams_and_bigrams_without_stop_words() {
        let vectorizer = CountVectorizer::new((1, 2), None);
        let terms = vectorizer.analyze(&docs(&["vote for the senat"])[0]);
        assert_eq!(terms, vec!["vote", "senat", "vote senat"]);
    }

    #[test]
    fn stop_words_can_be_kept() {
        let vectorizer = CountVectorizer::new((1, 2), None).with_stop_words(false);
        let terms = vectorizer.analyze(&docs(&["vote for"])[0]);
        assert_eq!(terms, vec!["vote", "for", "vote for"]);
    }

    #[test]
    fn vocabulary_is_capped_by_frequency_and_sorted() {
        let mut vectorizer = CountVectorizer::new((1, 1), Some(2));
        vectorizer
            .fit(&docs(&["vote vote shoe", "vote shoe elect", "zebra"]))
            .unwrap();
        let vocab: Vec<&str> = vectorizer.vocabulary().iter().map(|t| &**t).collect();
        assert_eq!(vocab, vec!["shoe", "vote"]);
    }

    #[test]
    fn unknown_terms_are_ignored_at_transform() {
        let mut vectorizer = CountVectorizer::new((1, 2), Some(5000));
        vectorizer.fit(&docs(&["vote now", "buy shoe"])).unwrap();
        let width = vectorizer.vocabulary_size();

        let counts = vectorizer.transform(&docs(&["vote vote unseen", "", "complet unknown"]));
        assert_eq!(counts.n_cols(), width);
        assert_eq!(counts.n_rows(), 3);
        let vote = vectorizer.vocabulary().get_index_of("vote").unwrap();
        assert_eq!(counts.row(0), &[(vote, 2.0)]);
        assert!(counts.row(1).is_empty());
        assert!(counts.row(2).is_empty());
    }

    #[test]
    fn only_stop_words_is_an_empty_vocabulary() {
        let mut vectorizer = CountVectorizer::new((1, 2), None);
        assert!(matches!(
            vectorizer.fit(&docs(&["the and of"])),
            Err(Error::EmptyVocabulary)
        ));
        assert!(matches!(vectorizer.fit(&[]), Err(Error::EmptyCorpus)));
    }

    #[test]
    fn smooth_idf_and_unit_rows() {
        let counts = SparseMatrix::from_dense(2, &[vec![1.0, 1.0], vec![1.0, 0.0]]).unwrap();
        let mut tfidf = TfidfTransformer::default();
        let weighted = tfidf.fit_transform(&counts).unwrap();

        assert!((tfidf.idf()[0] - 1.0).abs() < 1e-12);
        assert!((tfidf.idf()[1] - ((3.0f64 / 2.0).ln() + 1.0)).abs() < 1e-12);

        for row in weighted.rows() {
            let norm: f64 = row.iter().map(|(_, v)| v * v).sum();
            assert!((norm - 1.0).abs() < 1e-12);
        }
        assert_eq!(weighted.row(1), &[(0, 1.0)]);
    }

    #[test]
    fn tfidf_rejects_wrong_width() {
        let counts = SparseMatrix::from_dense(2, &[vec![1.0, 0.0]]).unwrap();
        let mut tfidf = TfidfTransformer::default();
        tfidf.fit(&counts).unwrap();
        let other = SparseMatrix::from_dense(3, &[vec![1.0, 0.0, 0.0]]).unwrap();
        assert!(matches!(
            tfidf.transform(&other),
            Err(Error::FeatureWidth { expected: 2, actual: 3 })
        ));
    }
}
