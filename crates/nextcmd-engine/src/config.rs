use std::time::Duration;

use nextcmd_core::proposer::ProposeOptions;
use nextcmd_settings::Settings;

/// Merge policy for [`PredictionEngine`](crate::PredictionEngine).
#[derive(Clone, Debug)]
pub struct EngineConfig {
    /// Confidence given to every accepted generative candidate.
    pub generative_score: f64,
    /// How many history entries the similarity ranking contributes at most.
    pub history_top_k: usize,
    /// Budget for the proposer before falling back to history only.
    pub generative_timeout: Duration,
    /// Passed through to the proposer on every call.
    pub propose: ProposeOptions,
    pub ngram_range: (usize, usize),
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            generative_score: 0.8,
            history_top_k: 3,
            generative_timeout: Duration::from_millis(1500),
            propose: ProposeOptions::default(),
            ngram_range: (1, 3),
        }
    }
}

impl EngineConfig {
    pub fn from_settings(settings: &Settings) -> Self {
        let engine = &settings.engine;
        Self {
            generative_score: engine.generative_score,
            history_top_k: engine.history_top_k,
            generative_timeout: Duration::from_millis(engine.generative_timeout_ms),
            propose: ProposeOptions {
                num_candidates: engine.generative_candidates,
                max_tokens: settings.model.max_tokens,
                temperature: settings.model.temperature,
            },
            ngram_range: (engine.ngram_min, engine.ngram_max),
        }
    }
}
