//! Word n-gram TF-IDF with cosine similarity.
//!
//! Term weighting follows the common smoothed formulation: raw term counts,
//! `idf = ln((1 + n) / (1 + df)) + 1`, every vector L2-normalized. Tokens are
//! lowercased runs of two or more word characters; n-grams join adjacent
//! tokens with a single space.

use std::collections::{BTreeMap, HashMap};
use std::sync::LazyLock;

use regex::Regex;

use nextcmd_core::scorer::LexicalScorer;

static TOKEN_PATTERN: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\b\w\w+\b").unwrap());

/// Sparse term-weight vector keyed by vocabulary index. Ordered so that
/// sums run in the same order for the same terms.
pub type SparseVector = BTreeMap<usize, f64>;

/// Split `text` into lowercase word n-grams, shortest n first.
pub fn analyze(text: &str, (min_n, max_n): (usize, usize)) -> Vec<String> {
    let lowered = text.to_lowercase();
    let tokens: Vec<&str> = TOKEN_PATTERN
        .find_iter(&lowered)
        .map(|m| m.as_str())
        .collect();

    let mut grams = Vec::new();
    for n in min_n..=max_n.min(tokens.len()) {
        for window in tokens.windows(n) {
            grams.push(window.join(" "));
        }
    }
    grams
}

/// Dot product of two sparse vectors. For L2-normalized inputs this is the
/// cosine similarity.
pub fn dot(a: &SparseVector, b: &SparseVector) -> f64 {
    let (small, large) = if a.len() <= b.len() { (a, b) } else { (b, a) };
    small
        .iter()
        .filter_map(|(idx, w)| large.get(idx).map(|v| w * v))
        .sum()
}

/// Stateless scorer configuration. Each [`fit`](Self::fit) builds a fresh
/// vocabulary owned by the caller.
#[derive(Clone, Debug)]
pub struct TfIdfScorer {
    ngram_range: (usize, usize),
}

impl Default for TfIdfScorer {
    fn default() -> Self {
        Self::new(1, 3)
    }
}

impl TfIdfScorer {
    /// `min_n` is raised to 1 and `max_n` to `min_n` if out of order.
    pub fn new(min_n: usize, max_n: usize) -> Self {
        let min_n = min_n.max(1);
        Self {
            ngram_range: (min_n, max_n.max(min_n)),
        }
    }

    pub fn ngram_range(&self) -> (usize, usize) {
        self.ngram_range
    }

    pub fn fit(&self, corpus: &[String]) -> FittedVocabulary {
        let mut terms: HashMap<String, usize> = HashMap::new();
        let mut doc_freq: Vec<usize> = Vec::new();

        for doc in corpus {
            let mut grams = analyze(doc, self.ngram_range);
            grams.sort_unstable();
            grams.dedup();
            for gram in grams {
                let next = terms.len();
                let idx = *terms.entry(gram).or_insert(next);
                if idx == doc_freq.len() {
                    doc_freq.push(0);
                }
                doc_freq[idx] += 1;
            }
        }

        let n = corpus.len() as f64;
        let idf = doc_freq
            .into_iter()
            .map(|df| ((1.0 + n) / (1.0 + df as f64)).ln() + 1.0)
            .collect();

        FittedVocabulary {
            terms,
            idf,
            ngram_range: self.ngram_range,
        }
    }
}

/// Vocabulary and IDF weights learned from one corpus.
#[derive(Debug)]
pub struct FittedVocabulary {
    terms: HashMap<String, usize>,
    idf: Vec<f64>,
    ngram_range: (usize, usize),
}

impl FittedVocabulary {
    pub fn len(&self) -> usize {
        self.terms.len()
    }

    pub fn is_empty(&self) -> bool {
        self.terms.is_empty()
    }

    pub fn contains(&self, term: &str) -> bool {
        self.terms.contains_key(term)
    }

    /// Weighted, L2-normalized vector for `doc`. Out-of-vocabulary terms
    /// are ignored; a document with none yields the zero vector.
    pub fn transform(&self, doc: &str) -> SparseVector {
        let mut vector = SparseVector::new();
        for gram in analyze(doc, self.ngram_range) {
            if let Some(&idx) = self.terms.get(&gram) {
                *vector.entry(idx).or_insert(0.0) += 1.0;
            }
        }

        for (idx, weight) in vector.iter_mut() {
            *weight *= self.idf[*idx];
        }

        let norm = vector.values().map(|w| w * w).sum::<f64>().sqrt();
        if norm > 0.0 {
            for weight in vector.values_mut() {
                *weight /= norm;
            }
        }
        vector
    }
}

impl LexicalScorer for TfIdfScorer {
    fn name(&self) -> &str {
        "tfidf"
    }

    fn similarities(&self, corpus: &[String], query: &str) -> Vec<f64> {
        if corpus.is_empty() {
            return Vec::new();
        }
        let vocab = self.fit(corpus);
        if vocab.is_empty() {
            return vec![0.0; corpus.len()];
        }
        let q = vocab.transform(query);
        corpus.iter().map(|doc| dot(&q, &vocab.transform(doc))).collect()
    }
}
