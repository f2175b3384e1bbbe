//! Harvest orchestration for topicharvest.
//!
//! This crate ties together discovery, fetching, extraction and storage into
//! one resumable run: topics in, a JSONL dataset and URL progress lists out.

pub mod orchestrator;
mod worker;

pub use orchestrator::{
    HarvestInput, HarvestSummary, Harvester, ProgressReporter, SilentProgress,
};
