//! Request handlers, one per envelope type.

use std::sync::Arc;

use tracing::{debug, error};

use nextcmd_core::types::PredictionRequest;
use nextcmd_engine::PredictionEngine;
use nextcmd_store::{CommandRecord, HistoryStore, StoreError};
use nextcmd_telemetry::{names, MetricsRecorder};

use crate::protocol::{RequestEnvelope, ResponseEnvelope, DEFAULT_HISTORY_LIMIT, MAX_HISTORY_LIMIT};

/// Shared state available to all handlers.
pub struct HandlerState {
    pub engine: Arc<PredictionEngine>,
    pub store: Arc<dyn HistoryStore>,
    pub metrics: Arc<MetricsRecorder>,
}

impl HandlerState {
    pub fn new(
        engine: Arc<PredictionEngine>,
        store: Arc<dyn HistoryStore>,
        metrics: Arc<MetricsRecorder>,
    ) -> Self {
        Self {
            engine,
            store,
            metrics,
        }
    }

    /// Run a blocking store call off the async workers.
    pub async fn with_store<T, F>(&self, f: F) -> Result<T, HandlerError>
    where
        T: Send + 'static,
        F: FnOnce(&dyn HistoryStore) -> Result<T, StoreError> + Send + 'static,
    {
        let store = Arc::clone(&self.store);
        let result = tokio::task::spawn_blocking(move || f(store.as_ref()))
            .await
            .map_err(|e| HandlerError::Join(e.to_string()))?;
        Ok(result?)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum HandlerError {
    #[error("storage failure: {0}")]
    Store(#[from] StoreError),
    #[error("worker task failed: {0}")]
    Join(String),
}

/// Route a decoded request to its handler. Always produces a response.
pub async fn dispatch(state: &HandlerState, request: RequestEnvelope) -> ResponseEnvelope {
    match request {
        RequestEnvelope::Predict {
            current_input,
            history,
        } => predict(state, PredictionRequest::new(current_input, history)).await,
        RequestEnvelope::Record { command, context } => record(state, command, context).await,
        RequestEnvelope::History { limit, prefix } => history(state, limit, prefix).await,
    }
}

async fn predict(state: &HandlerState, request: PredictionRequest) -> ResponseEnvelope {
    state.metrics.counter_inc(names::PREDICT_REQUESTS, 1);

    let report = state.engine.predict_detailed(&request).await;

    if report.generative.is_degraded() {
        state.metrics.counter_inc(names::PREDICT_DEGRADED, 1);
    }
    state.metrics.histogram_observe(
        names::PREDICT_LATENCY_MS,
        report.elapsed.as_secs_f64() * 1000.0,
    );

    ResponseEnvelope::Predictions {
        predictions: report.candidates,
    }
}

async fn record(state: &HandlerState, command: String, context: String) -> ResponseEnvelope {
    state.metrics.counter_inc(names::RECORD_REQUESTS, 1);

    match state
        .with_store(move |store| store.record(&command, &context))
        .await
    {
        Ok(CommandRecord { id, .. }) => {
            debug!(id, "record stored");
            ResponseEnvelope::recorded()
        }
        Err(e) => {
            state.metrics.counter_inc(names::RECORD_FAILURES, 1);
            error!(error = %e, "failed to record command");
            ResponseEnvelope::error(e.to_string())
        }
    }
}

async fn history(
    state: &HandlerState,
    limit: Option<u32>,
    prefix: Option<String>,
) -> ResponseEnvelope {
    state.metrics.counter_inc(names::HISTORY_REQUESTS, 1);

    let limit = limit.unwrap_or(DEFAULT_HISTORY_LIMIT).min(MAX_HISTORY_LIMIT);
    let result = state
        .with_store(move |store| match prefix.as_deref() {
            Some(p) if !p.is_empty() => store.with_prefix(p, limit),
            _ => store.recent(limit),
        })
        .await;

    match result {
        Ok(records) => ResponseEnvelope::History { records },
        Err(e) => {
            error!(error = %e, "failed to read history");
            ResponseEnvelope::error(e.to_string())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{DateTime, Utc};
    use nextcmd_engine::EngineConfig;
    use nextcmd_proposer::{MockProposer, MockResponse};
    use nextcmd_store::{Database, HistoryRepo};

    /// Store double that fails every call.
    struct FailingStore;

    fn disk_error() -> StoreError {
        StoreError::Database("disk I/O error".into())
    }

    impl HistoryStore for FailingStore {
        fn record(&self, _: &str, _: &str) -> Result<CommandRecord, StoreError> {
            Err(disk_error())
        }
        fn get(&self, id: i64) -> Result<CommandRecord, StoreError> {
            Err(StoreError::NotFound(format!("command record {id}")))
        }
        fn recent(&self, _: u32) -> Result<Vec<CommandRecord>, StoreError> {
            Err(disk_error())
        }
        fn since(&self, _: DateTime<Utc>, _: u32) -> Result<Vec<CommandRecord>, StoreError> {
            Err(disk_error())
        }
        fn with_prefix(&self, _: &str, _: u32) -> Result<Vec<CommandRecord>, StoreError> {
            Err(disk_error())
        }
        fn count(&self) -> Result<u64, StoreError> {
            Err(disk_error())
        }
    }

    fn failing_store() -> Arc<dyn HistoryStore> {
        Arc::new(FailingStore)
    }

    fn state_with(proposer: MockProposer, store: Arc<dyn HistoryStore>) -> HandlerState {
        let engine = PredictionEngine::new(Arc::new(proposer), EngineConfig::default());
        HandlerState::new(Arc::new(engine), store, Arc::new(MetricsRecorder::new()))
    }

    fn memory_store() -> Arc<dyn HistoryStore> {
        Arc::new(HistoryRepo::new(Database::in_memory().unwrap()))
    }

    #[tokio::test]
    async fn predict_returns_ranked_candidates() {
        let state = state_with(
            MockProposer::new(vec![MockResponse::candidates(&["git status", "python"])]),
            memory_store(),
        );
        let resp = dispatch(
            &state,
            RequestEnvelope::Predict {
                current_input: "git ".into(),
                history: vec!["git status".into(), "git commit".into(), "ls".into()],
            },
        )
        .await;

        let ResponseEnvelope::Predictions { predictions } = resp else {
            panic!("expected predictions, got {resp:?}");
        };
        let commands: Vec<_> = predictions.iter().map(|c| c.command.as_str()).collect();
        assert_eq!(commands, vec!["git status", "git commit", "ls"]);
        assert_eq!(state.metrics.counter_get(names::PREDICT_REQUESTS), 1);
        assert_eq!(state.metrics.counter_get(names::PREDICT_DEGRADED), 0);
        assert_eq!(
            state.metrics.histogram_summary(names::PREDICT_LATENCY_MS).count,
            1
        );
    }

    #[tokio::test]
    async fn degraded_prediction_is_counted() {
        let state = state_with(
            MockProposer::new(vec![MockResponse::Error(
                nextcmd_core::ProposerError::NetworkError("down".into()),
            )]),
            memory_store(),
        );
        let resp = dispatch(
            &state,
            RequestEnvelope::Predict {
                current_input: "ls".into(),
                history: vec!["ls -la".into()],
            },
        )
        .await;
        assert!(matches!(resp, ResponseEnvelope::Predictions { ref predictions } if predictions.len() == 1));
        assert_eq!(state.metrics.counter_get(names::PREDICT_DEGRADED), 1);
    }

    #[tokio::test]
    async fn record_then_history() {
        let state = state_with(MockProposer::new(vec![]), memory_store());

        let resp = dispatch(
            &state,
            RequestEnvelope::Record {
                command: "ls -la".into(),
                context: "ctx".into(),
            },
        )
        .await;
        assert_eq!(resp, ResponseEnvelope::recorded());

        let resp = dispatch(
            &state,
            RequestEnvelope::History {
                limit: None,
                prefix: None,
            },
        )
        .await;
        let ResponseEnvelope::History { records } = resp else {
            panic!("expected history, got {resp:?}");
        };
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].command, "ls -la");
        assert_eq!(records[0].context, "ctx");
    }

    #[tokio::test]
    async fn history_prefix_and_limit() {
        let state = state_with(MockProposer::new(vec![]), memory_store());
        for cmd in ["git status", "ls", "git log", "git diff"] {
            state
                .with_store(move |s| s.record(cmd, ""))
                .await
                .unwrap();
        }

        let resp = dispatch(
            &state,
            RequestEnvelope::History {
                limit: Some(2),
                prefix: Some("git".into()),
            },
        )
        .await;
        let ResponseEnvelope::History { records } = resp else {
            panic!("expected history, got {resp:?}");
        };
        let commands: Vec<_> = records.iter().map(|r| r.command.as_str()).collect();
        assert_eq!(commands, vec!["git diff", "git log"]);
        assert_eq!(state.metrics.counter_get(names::HISTORY_REQUESTS), 1);
    }

    #[tokio::test]
    async fn history_limit_is_capped() {
        let state = state_with(MockProposer::new(vec![]), memory_store());
        let resp = dispatch(
            &state,
            RequestEnvelope::History {
                limit: Some(u32::MAX),
                prefix: None,
            },
        )
        .await;
        assert!(matches!(resp, ResponseEnvelope::History { .. }));
    }

    #[tokio::test]
    async fn record_failure_is_error_envelope() {
        let state = state_with(MockProposer::new(vec![]), failing_store());
        let resp = dispatch(
            &state,
            RequestEnvelope::Record {
                command: "ls".into(),
                context: String::new(),
            },
        )
        .await;
        let ResponseEnvelope::Error { message } = resp else {
            panic!("expected error, got {resp:?}");
        };
        assert!(message.contains("disk I/O error"));
        assert_eq!(state.metrics.counter_get(names::RECORD_FAILURES), 1);
    }

    #[tokio::test]
    async fn history_failure_is_error_envelope() {
        let state = state_with(MockProposer::new(vec![]), failing_store());
        let resp = dispatch(
            &state,
            RequestEnvelope::History {
                limit: None,
                prefix: Some("x".into()),
            },
        )
        .await;
        assert!(resp.is_error());
    }
}
