use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;

use nextcmd_core::errors::ProposerError;
use nextcmd_core::proposer::{GenerativeProposer, ProposeOptions};

/// Pre-programmed responses for deterministic testing without a model.
#[derive(Clone, Debug)]
pub enum MockResponse {
    /// Return these completions verbatim.
    Candidates(Vec<String>),
    /// Fail the call.
    Error(ProposerError),
    /// Wait a duration, then yield the inner response.
    Delay(Duration, Box<MockResponse>),
}

impl MockResponse {
    pub fn candidates(items: &[&str]) -> Self {
        Self::Candidates(items.iter().map(|s| s.to_string()).collect())
    }

    pub fn delayed(delay: Duration, inner: MockResponse) -> Self {
        Self::Delay(delay, Box::new(inner))
    }
}

/// Proposer that replays scripted responses in order.
///
/// Once the script runs out, the fallback response (if any) is returned for
/// every further call; without one the call fails with `InvalidRequest`.
pub struct MockProposer {
    responses: Mutex<VecDeque<MockResponse>>,
    fallback: Option<MockResponse>,
    prefixes: Mutex<Vec<String>>,
    call_count: AtomicUsize,
}

impl MockProposer {
    pub fn new(responses: Vec<MockResponse>) -> Self {
        Self {
            responses: Mutex::new(responses.into()),
            fallback: None,
            prefixes: Mutex::new(Vec::new()),
            call_count: AtomicUsize::new(0),
        }
    }

    /// Answer every call with the same response.
    pub fn always(response: MockResponse) -> Self {
        Self::new(Vec::new()).with_fallback(response)
    }

    pub fn with_fallback(mut self, response: MockResponse) -> Self {
        self.fallback = Some(response);
        self
    }

    pub fn call_count(&self) -> usize {
        self.call_count.load(Ordering::Relaxed)
    }

    /// Prefixes received so far, in call order.
    pub fn prefixes(&self) -> Vec<String> {
        self.prefixes.lock().clone()
    }
}

#[async_trait]
impl GenerativeProposer for MockProposer {
    fn name(&self) -> &str {
        "mock"
    }

    async fn propose(
        &self,
        prefix: &str,
        _options: &ProposeOptions,
    ) -> Result<Vec<String>, ProposerError> {
        let idx = self.call_count.fetch_add(1, Ordering::Relaxed);
        self.prefixes.lock().push(prefix.to_string());

        let scripted = self.responses.lock().pop_front();
        let Some(mut response) = scripted.or_else(|| self.fallback.clone()) else {
            return Err(ProposerError::InvalidRequest(format!(
                "MockProposer: no response configured for call {idx}"
            )));
        };

        loop {
            match response {
                MockResponse::Candidates(items) => return Ok(items),
                MockResponse::Error(e) => return Err(e),
                MockResponse::Delay(delay, inner) => {
                    tokio::time::sleep(delay).await;
                    response = *inner;
                }
            }
        }
    }
}
