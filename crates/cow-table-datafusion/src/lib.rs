//! DataFusion integration for `cow-table-core`.
//!
//! This crate keeps all DataFusion types out of `cow-table-core`. The main
//! entry point is [`CowTableProvider`], a read-only table over one resolved
//! snapshot (provenance columns included).

mod cow_table_provider;
pub use cow_table_provider::{CowTableProvider, register_snapshot};
