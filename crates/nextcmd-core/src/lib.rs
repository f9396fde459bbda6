pub mod errors;
pub mod ids;
pub mod proposer;
pub mod scorer;
pub mod types;

pub use errors::ProposerError;
pub use ids::SessionId;
pub use proposer::{GenerativeProposer, ProposeOptions};
pub use scorer::LexicalScorer;
pub use types::{Candidate, PredictionRequest};
