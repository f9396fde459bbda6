pub mod disabled;
pub mod http;
pub mod reliable;

pub mod mock;

pub use disabled::DisabledProposer;
pub use http::{HttpProposer, HttpProposerConfig};
pub use mock::{MockProposer, MockResponse};
pub use reliable::{ReliableConfig, ReliableProposer};
