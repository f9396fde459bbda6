use async_trait::async_trait;

use crate::errors::ProposerError;

/// Options controlling a single generative call.
#[derive(Clone, Debug, PartialEq)]
pub struct ProposeOptions {
    /// How many continuations to ask for.
    pub num_candidates: usize,
    /// Upper bound on generated tokens per continuation.
    pub max_tokens: u32,
    pub temperature: f64,
}

impl Default for ProposeOptions {
    fn default() -> Self {
        Self {
            num_candidates: 3,
            max_tokens: 50,
            temperature: 0.7,
        }
    }
}

/// A generative model that proposes full-command completions for a prefix.
///
/// Implementations return complete command strings (prefix included). The
/// prediction engine is responsible for discarding anything that is not a
/// literal extension of the prefix.
#[async_trait]
pub trait GenerativeProposer: Send + Sync {
    fn name(&self) -> &str;

    async fn propose(
        &self,
        prefix: &str,
        options: &ProposeOptions,
    ) -> Result<Vec<String>, ProposerError>;
}
