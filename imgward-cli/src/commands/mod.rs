//! Subcommand implementations.

pub mod ingest;
pub mod reconcile;
pub mod scan;
pub mod store;
pub mod whitelist;
