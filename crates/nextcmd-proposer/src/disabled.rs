use async_trait::async_trait;

use nextcmd_core::errors::ProposerError;
use nextcmd_core::proposer::{GenerativeProposer, ProposeOptions};

/// Stand-in used when no model endpoint is configured. Always proposes
/// nothing, so predictions come from history alone without being counted
/// as degraded.
#[derive(Clone, Copy, Debug, Default)]
pub struct DisabledProposer;

#[async_trait]
impl GenerativeProposer for DisabledProposer {
    fn name(&self) -> &str {
        "disabled"
    }

    async fn propose(
        &self,
        _prefix: &str,
        _options: &ProposeOptions,
    ) -> Result<Vec<String>, ProposerError> {
        Ok(Vec::new())
    }
}
