//! Seams to the outside world.
//!
//! The orchestrators only talk to the source and the sink through these
//! traits. Credentials, sessions and wire formats belong to the
//! implementations; errors come back as [`Error::Authentication`] or
//! [`Error::Transport`] and are not masked by the core.
//!
//! [`Error::Authentication`]: crate::Error::Authentication
//! [`Error::Transport`]: crate::Error::Transport

use crate::{Entry, PatientRecordWithDeviceData, Profile, PumpSettings, Result, Treatment};
use async_trait::async_trait;
use chrono::{DateTime, Utc};

/// Device-data aggregator we read from
#[async_trait]
pub trait RecordSource: Send + Sync {
    /// Records created in `[from, to)`
    async fn fetch_records(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<PatientRecordWithDeviceData>>;

    /// Full current pump configuration
    async fn fetch_pump_settings(&self) -> Result<PumpSettings>;
}

/// Monitoring log we report to
#[async_trait]
pub trait Sink: Send + Sync {
    /// Store entries; returns what the sink accepted
    async fn report_entries(&self, entries: Vec<Entry>) -> Result<Vec<Entry>>;

    /// Store treatments; returns what the sink accepted
    async fn report_treatments(&self, treatments: Vec<Treatment>) -> Result<Vec<Treatment>>;

    async fn fetch_profile(&self) -> Result<Profile>;

    async fn update_profile(&self, profile: Profile) -> Result<Profile>;
}

/// Source of "now" for window upper bounds
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

/// Wall clock
#[derive(Clone, Copy, Debug, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Clock pinned to one instant
#[derive(Clone, Copy, Debug)]
pub struct FixedClock(pub DateTime<Utc>);

impl Clock for FixedClock {
    fn now(&self) -> DateTime<Utc> {
        self.0
    }
}
