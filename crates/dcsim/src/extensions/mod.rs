//! Workload ingestion.

pub mod trace_reader;
