//! HTTP API: SSE stream, diagnostics and the internal ingest endpoint

pub mod handlers;
pub mod routes;
pub mod sse_handlers;

pub use routes::create_router;
