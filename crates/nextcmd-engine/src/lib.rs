pub mod config;
pub mod engine;
pub mod tfidf;

pub use config::EngineConfig;
pub use engine::{GenerativeOutcome, PredictionEngine, PredictionReport};
pub use tfidf::{FittedVocabulary, TfIdfScorer};
