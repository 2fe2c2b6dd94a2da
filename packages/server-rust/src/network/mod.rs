//! HTTP surface: configuration, request context, middleware pipeline,
//! route handlers and the server lifecycle.

pub mod config;
pub mod context;
pub mod handlers;
pub mod headers;
pub mod middleware;
pub mod module;
pub mod shutdown;

pub use config::*;
pub use context::{ClientAddr, ConnectionScheme, Deadline, DeadlineExceeded, RequestContext};
pub use handlers::{router, AppState};
pub use middleware::build_pipeline;
pub use module::HttpServer;
pub use shutdown::{shutdown_signal, ShutdownController};
