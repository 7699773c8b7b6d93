//! Central server: ingest/reconciliation service and HTTP surface.

pub mod ingest;
pub mod routes;

pub use ingest::{BatchError, BatchOutcome, IngestError, IngestOutcome, IngestService};
pub use routes::{build_router, run_server, AppState};
