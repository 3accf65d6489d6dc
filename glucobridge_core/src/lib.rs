#![forbid(unsafe_code)]

//! Core of glucobridge: moves diabetes device data from a record source into
//! a monitoring sink.
//!
//! This crate provides:
//! - Domain types (patient records, entries, treatments, profiles)
//! - The treatment identifier and basal profile merger
//! - The looper and the cycle orchestrators it drives
//! - Collaborator traits plus file-backed implementations
//! - Configuration and logging setup

pub mod types;
pub mod error;
pub mod profile;
pub mod config;
pub mod logging;
pub mod mapper;
pub mod identifier;
pub mod basal;
pub mod looper;
pub mod collaborators;
pub mod orchestrator;
pub mod journal;
pub mod store;

#[cfg(test)]
pub(crate) mod testing;

// Re-export commonly used types
pub use error::{Error, Result};
pub use types::*;
pub use profile::{Profile, ProfileConfig, PumpSettings, ScheduleEntry, TimeOfDay};
pub use config::Config;
pub use collaborators::{Clock, FixedClock, RecordSource, Sink, SystemClock};
pub use identifier::{identify, Identification, MatchPolicy};
pub use basal::{merge_schedule, PumpImport};
pub use looper::{LoopOutcome, Looper, StopHandle};
pub use orchestrator::{
    Collaborators, CycleSummary, EntriesPipeline, EntriesState, PumpSettingsPipeline,
    TreatmentsPipeline, TreatmentsState,
};
pub use store::{FileSink, FileSource};
