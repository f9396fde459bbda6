pub mod handlers;
pub mod protocol;
pub mod server;
pub mod session;

pub use handlers::HandlerState;
pub use protocol::{ProtocolError, RequestEnvelope, ResponseEnvelope};
pub use server::{build_router, start, AppState, ServerConfig, ServerHandle};
pub use session::SessionRegistry;
