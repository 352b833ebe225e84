pub mod logging;
pub mod config;
pub mod handler;
pub mod server;

pub use config::ServerConfig;
pub use dnswire;
pub use handler::{HostEntry, RequestHandler, StaticHandler};
pub use server::{Server, ServerError, ServerHandle, ServerState};
