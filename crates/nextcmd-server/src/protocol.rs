//! Envelope protocol spoken over `/ws`.
//!
//! Every frame is one JSON object tagged by `type`. Each request gets exactly
//! one response; a request that cannot be decoded gets an `error` response
//! and the session carries on.
//!
//! Frames larger than the server's `max_message_size` (1 MiB by default) are
//! not decoded at all: the transport rejects them and the session is closed
//! without a reply.

use serde::{Deserialize, Deserializer, Serialize};

use nextcmd_core::types::{Candidate, PredictionRequest};
use nextcmd_store::CommandRecord;

/// Default and maximum page size for `history` requests.
pub const DEFAULT_HISTORY_LIMIT: u32 = 20;
pub const MAX_HISTORY_LIMIT: u32 = 500;

/// Client → server.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RequestEnvelope {
    Predict {
        current_input: String,
        #[serde(default, deserialize_with = "null_as_default")]
        history: Vec<String>,
    },
    Record {
        command: String,
        #[serde(default, deserialize_with = "null_as_default")]
        context: String,
    },
    History {
        #[serde(default)]
        limit: Option<u32>,
        #[serde(default)]
        prefix: Option<String>,
    },
}

impl RequestEnvelope {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Predict { .. } => "predict",
            Self::Record { .. } => "record",
            Self::History { .. } => "history",
        }
    }

    /// Decode one text frame.
    pub fn decode(text: &str) -> Result<Self, ProtocolError> {
        serde_json::from_str(text).map_err(|e| ProtocolError::Malformed(e.to_string()))
    }

    /// Decode one binary frame; the payload must be UTF-8 JSON.
    pub fn decode_bytes(bytes: &[u8]) -> Result<Self, ProtocolError> {
        let text = std::str::from_utf8(bytes)
            .map_err(|_| ProtocolError::UnsupportedFrame("binary payload is not UTF-8"))?;
        Self::decode(text)
    }
}

impl From<PredictionRequest> for RequestEnvelope {
    fn from(req: PredictionRequest) -> Self {
        Self::Predict {
            current_input: req.current_input,
            history: req.history,
        }
    }
}

/// Server → client.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ResponseEnvelope {
    Predictions { predictions: Vec<Candidate> },
    Recorded { status: String },
    History { records: Vec<CommandRecord> },
    Error { message: String },
}

impl ResponseEnvelope {
    pub fn recorded() -> Self {
        Self::Recorded {
            status: "success".into(),
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self::Error {
            message: message.into(),
        }
    }

    pub fn is_error(&self) -> bool {
        matches!(self, Self::Error { .. })
    }

    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|e| {
            serde_json::json!({"type": "error", "message": format!("encode failed: {e}")})
                .to_string()
        })
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    #[error("malformed request: {0}")]
    Malformed(String),
    #[error("unsupported frame: {0}")]
    UnsupportedFrame(&'static str),
}

impl From<ProtocolError> for ResponseEnvelope {
    fn from(e: ProtocolError) -> Self {
        Self::error(e.to_string())
    }
}

fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn decode_predict_with_history() {
        let req = RequestEnvelope::decode(
            r#"{"type":"predict","current_input":"git ","history":["git status","ls"]}"#,
        )
        .unwrap();
        assert_eq!(
            req,
            RequestEnvelope::Predict {
                current_input: "git ".into(),
                history: vec!["git status".into(), "ls".into()],
            }
        );
        assert_eq!(req.kind(), "predict");
    }

    #[test]
    fn predict_history_defaults_to_empty() {
        for raw in [
            r#"{"type":"predict","current_input":"ls"}"#,
            r#"{"type":"predict","current_input":"ls","history":null}"#,
        ] {
            match RequestEnvelope::decode(raw).unwrap() {
                RequestEnvelope::Predict { history, .. } => assert!(history.is_empty()),
                other => panic!("unexpected {other:?}"),
            }
        }
    }

    #[test]
    fn record_context_defaults_to_empty() {
        let req = RequestEnvelope::decode(r#"{"type":"record","command":"ls -la"}"#).unwrap();
        assert_eq!(
            req,
            RequestEnvelope::Record {
                command: "ls -la".into(),
                context: String::new(),
            }
        );
    }

    #[test]
    fn history_fields_optional() {
        let req = RequestEnvelope::decode(r#"{"type":"history"}"#).unwrap();
        assert_eq!(
            req,
            RequestEnvelope::History {
                limit: None,
                prefix: None
            }
        );
    }

    #[test]
    fn unknown_type_is_malformed() {
        let err = RequestEnvelope::decode(r#"{"type":"unknown"}"#).unwrap_err();
        assert!(matches!(err, ProtocolError::Malformed(_)));
        assert!(err.to_string().contains("unknown"));
    }

    #[test]
    fn missing_type_is_malformed() {
        let err = RequestEnvelope::decode(r#"{"command":"ls"}"#).unwrap_err();
        assert!(err.to_string().contains("type"));
    }

    #[test]
    fn missing_required_field_is_malformed() {
        let err = RequestEnvelope::decode(r#"{"type":"record"}"#).unwrap_err();
        assert!(err.to_string().contains("command"));
    }

    #[test]
    fn non_json_is_malformed() {
        assert!(RequestEnvelope::decode("hello there").is_err());
    }

    #[test]
    fn binary_frames() {
        let ok = RequestEnvelope::decode_bytes(br#"{"type":"history","limit":5}"#).unwrap();
        assert_eq!(ok.kind(), "history");

        let err = RequestEnvelope::decode_bytes(&[0xff, 0xfe, 0x00]).unwrap_err();
        assert!(matches!(err, ProtocolError::UnsupportedFrame(_)));
    }

    #[test]
    fn response_wire_shapes() {
        let predictions = ResponseEnvelope::Predictions {
            predictions: vec![Candidate::new("git status", 0.8)],
        };
        assert_eq!(
            serde_json::from_str::<serde_json::Value>(&predictions.to_json()).unwrap(),
            json!({"type":"predictions","predictions":[{"command":"git status","score":0.8}]})
        );

        assert_eq!(
            serde_json::from_str::<serde_json::Value>(&ResponseEnvelope::recorded().to_json())
                .unwrap(),
            json!({"type":"recorded","status":"success"})
        );

        let error: ResponseEnvelope = ProtocolError::Malformed("bad".into()).into();
        assert!(error.is_error());
        assert_eq!(
            serde_json::from_str::<serde_json::Value>(&error.to_json()).unwrap(),
            json!({"type":"error","message":"malformed request: bad"})
        );
    }

    #[test]
    fn empty_predictions_serialize_as_empty_list() {
        let resp = ResponseEnvelope::Predictions {
            predictions: vec![],
        };
        assert_eq!(resp.to_json(), r#"{"type":"predictions","predictions":[]}"#);
    }

    #[test]
    fn prediction_request_converts() {
        let env: RequestEnvelope = PredictionRequest::new("cd", vec!["cd ..".into()]).into();
        assert_eq!(env.kind(), "predict");
    }
}
