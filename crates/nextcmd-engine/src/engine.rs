use std::collections::HashSet;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{debug, instrument, warn};

use nextcmd_core::errors::ProposerError;
use nextcmd_core::proposer::GenerativeProposer;
use nextcmd_core::scorer::LexicalScorer;
use nextcmd_core::types::{Candidate, PredictionRequest};

use crate::config::EngineConfig;
use crate::tfidf::TfIdfScorer;

/// What happened to the generative half of a prediction.
#[derive(Clone, Debug)]
pub enum GenerativeOutcome {
    Proposed { accepted: usize, discarded: usize },
    Failed(ProposerError),
    TimedOut(Duration),
}

impl GenerativeOutcome {
    /// True when the result had to fall back to history only.
    pub fn is_degraded(&self) -> bool {
        !matches!(self, Self::Proposed { .. })
    }
}

/// A ranked candidate list plus how it was produced.
#[derive(Clone, Debug)]
pub struct PredictionReport {
    pub candidates: Vec<Candidate>,
    pub generative: GenerativeOutcome,
    pub elapsed: Duration,
}

/// Fuses generative proposals with history similarity.
///
/// Generative candidates that extend the input come first, each at a fixed
/// score. History entries follow, best similarity first, up to
/// `history_top_k`. A command appears at most once; the first occurrence wins.
pub struct PredictionEngine {
    proposer: Arc<dyn GenerativeProposer>,
    scorer: Arc<dyn LexicalScorer>,
    config: EngineConfig,
}

impl PredictionEngine {
    pub fn new(proposer: Arc<dyn GenerativeProposer>, config: EngineConfig) -> Self {
        let (min_n, max_n) = config.ngram_range;
        Self {
            proposer,
            scorer: Arc::new(TfIdfScorer::new(min_n, max_n)),
            config,
        }
    }

    pub fn with_scorer(mut self, scorer: Arc<dyn LexicalScorer>) -> Self {
        self.scorer = scorer;
        self
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn proposer_name(&self) -> &str {
        self.proposer.name()
    }

    pub async fn predict(&self, request: &PredictionRequest) -> Vec<Candidate> {
        self.predict_detailed(request).await.candidates
    }

    #[instrument(skip_all, fields(history = request.history.len()))]
    pub async fn predict_detailed(&self, request: &PredictionRequest) -> PredictionReport {
        let start = Instant::now();
        let input = request.current_input.as_str();

        let (proposals, generative) = self.generate(input).await;

        let mut seen: HashSet<&str> = HashSet::new();
        let mut candidates = Vec::new();

        for command in &proposals {
            if seen.insert(command.as_str()) {
                candidates.push(Candidate::new(command.as_str(), self.config.generative_score));
            }
        }

        if !request.history.is_empty() && self.config.history_top_k > 0 {
            let mut scores = self.scorer.similarities(&request.history, input);
            scores.truncate(request.history.len());
            for idx in top_k_indices(&scores, self.config.history_top_k) {
                let command = &request.history[idx];
                if seen.insert(command.as_str()) {
                    candidates.push(Candidate::new(command.as_str(), scores[idx]));
                }
            }
        }

        let elapsed = start.elapsed();
        debug!(
            candidates = candidates.len(),
            elapsed_ms = elapsed.as_millis() as u64,
            degraded = generative.is_degraded(),
            "prediction complete"
        );

        PredictionReport {
            candidates,
            generative,
            elapsed,
        }
    }

    /// Ask the proposer for completions, keeping only literal extensions of
    /// `input`. Failure or timeout yields no proposals.
    async fn generate(&self, input: &str) -> (Vec<String>, GenerativeOutcome) {
        let timeout = self.config.generative_timeout;
        let call = self.proposer.propose(input, &self.config.propose);

        match tokio::time::timeout(timeout, call).await {
            Ok(Ok(raw)) => {
                let total = raw.len();
                let accepted: Vec<String> =
                    raw.into_iter().filter(|c| c.starts_with(input)).collect();
                let outcome = GenerativeOutcome::Proposed {
                    accepted: accepted.len(),
                    discarded: total - accepted.len(),
                };
                (accepted, outcome)
            }
            Ok(Err(e)) => {
                warn!(
                    proposer = self.proposer.name(),
                    error_kind = e.error_kind(),
                    error = %e,
                    "generative proposer failed, using history only"
                );
                (Vec::new(), GenerativeOutcome::Failed(e))
            }
            Err(_) => {
                warn!(
                    proposer = self.proposer.name(),
                    timeout_ms = timeout.as_millis() as u64,
                    "generative proposer timed out, using history only"
                );
                (Vec::new(), GenerativeOutcome::TimedOut(timeout))
            }
        }
    }
}

/// Indices of the `k` highest scores, highest first; equal scores keep
/// their original order.
fn top_k_indices(scores: &[f64], k: usize) -> Vec<usize> {
    let mut order: Vec<usize> = (0..scores.len()).collect();
    order.sort_by(|&a, &b| scores[b].total_cmp(&scores[a]).then(a.cmp(&b)));
    order.truncate(k);
    order
}
