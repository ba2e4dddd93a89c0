pub mod aggregation;
pub mod dispatcher;
pub mod server;

pub use dispatcher::RequestDispatcher;
pub use server::{GatewayServer, ServerConfig};
