//! File-backed source and sink.
//!
//! Layout under the data directory:
//!
//! ```text
//! source/records.jsonl       records to serve, one per line
//! source/pump_settings.json  current pump configuration
//! sink/entries.jsonl         reported glucose entries
//! sink/treatments.jsonl      reported treatments
//! sink/profile.json          profile document
//! ```
//!
//! File I/O runs on the blocking pool so loops sharing a runtime are not
//! stalled by disk access.

use crate::collaborators::{RecordSource, Sink};
use crate::{
    journal, Entry, Error, PatientRecordWithDeviceData, Profile, PumpSettings, Result, Treatment,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::path::{Path, PathBuf};

async fn blocking<T, F>(f: F) -> Result<T>
where
    F: FnOnce() -> Result<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| Error::Other(format!("File task failed: {}", e)))?
}

/// Serves records and pump settings from `<data_dir>/source`
#[derive(Clone, Debug)]
pub struct FileSource {
    dir: PathBuf,
}

impl FileSource {
    pub fn new(data_dir: &Path) -> Self {
        Self {
            dir: data_dir.join("source"),
        }
    }

    pub fn records_path(&self) -> PathBuf {
        self.dir.join("records.jsonl")
    }

    pub fn pump_settings_path(&self) -> PathBuf {
        self.dir.join("pump_settings.json")
    }
}

#[async_trait]
impl RecordSource for FileSource {
    async fn fetch_records(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<PatientRecordWithDeviceData>> {
        let path = self.records_path();
        let records: Vec<PatientRecordWithDeviceData> =
            blocking(move || journal::read_all(&path)).await?;

        let in_window: Vec<_> = records
            .into_iter()
            .filter(|r| r.created_at() >= from && r.created_at() < to)
            .collect();
        tracing::debug!(count = in_window.len(), %from, %to, "Fetched records");
        Ok(in_window)
    }

    async fn fetch_pump_settings(&self) -> Result<PumpSettings> {
        let path = self.pump_settings_path();
        let loaded = {
            let path = path.clone();
            blocking(move || journal::load_document::<PumpSettings>(&path)).await?
        };
        loaded.ok_or_else(|| Error::Transport(format!("No pump settings at {:?}", path)))
    }
}

/// Writes reports under `<data_dir>/sink`
#[derive(Clone, Debug)]
pub struct FileSink {
    dir: PathBuf,
}

impl FileSink {
    pub fn new(data_dir: &Path) -> Self {
        Self {
            dir: data_dir.join("sink"),
        }
    }

    pub fn entries_path(&self) -> PathBuf {
        self.dir.join("entries.jsonl")
    }

    pub fn treatments_path(&self) -> PathBuf {
        self.dir.join("treatments.jsonl")
    }

    pub fn profile_path(&self) -> PathBuf {
        self.dir.join("profile.json")
    }
}

#[async_trait]
impl Sink for FileSink {
    async fn report_entries(&self, entries: Vec<Entry>) -> Result<Vec<Entry>> {
        let path = self.entries_path();
        blocking(move || {
            journal::append(&path, &entries)?;
            Ok(entries)
        })
        .await
    }

    /// Treatments already stored under the same identifier are skipped, so a
    /// retried cycle does not record the same event twice.
    async fn report_treatments(&self, treatments: Vec<Treatment>) -> Result<Vec<Treatment>> {
        let path = self.treatments_path();
        let offered = treatments.len();
        let stored =
            blocking(move || journal::append_new(&path, treatments, Treatment::identifier)).await?;
        if stored.len() < offered {
            tracing::debug!(
                skipped = offered - stored.len(),
                "Skipped treatments already in the sink"
            );
        }
        Ok(stored)
    }

    async fn fetch_profile(&self) -> Result<Profile> {
        let path = self.profile_path();
        let loaded = blocking(move || journal::load_document::<Profile>(&path)).await?;
        Ok(loaded.unwrap_or_default())
    }

    async fn update_profile(&self, profile: Profile) -> Result<Profile> {
        let path = self.profile_path();
        blocking(move || {
            journal::save_document(&path, &profile)?;
            Ok(profile)
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mapper;
    use crate::testing::*;

    #[tokio::test]
    async fn test_file_source_filters_window() {
        let temp_dir = tempfile::tempdir().unwrap();
        let source = FileSource::new(temp_dir.path());
        journal::append(
            &source.records_path(),
            &[
                glucose("CGM1", at(9, 59, 59), 100.0),
                glucose("CGM1", at(10, 0, 0), 101.0),
                carb("P1", at(10, 30, 0), 12.0),
                glucose("CGM1", at(11, 0, 0), 102.0),
            ],
        )
        .unwrap();

        let records = source.fetch_records(at(10, 0, 0), at(11, 0, 0)).await.unwrap();

        assert_eq!(records.len(), 2);
        assert_eq!(records[0].created_at(), at(10, 0, 0));
        assert_eq!(records[1].created_at(), at(10, 30, 0));
    }

    #[tokio::test]
    async fn test_file_source_missing_files() {
        let temp_dir = tempfile::tempdir().unwrap();
        let source = FileSource::new(temp_dir.path());

        assert!(source
            .fetch_records(at(0, 0, 0), at(23, 0, 0))
            .await
            .unwrap()
            .is_empty());
        assert!(matches!(
            source.fetch_pump_settings().await,
            Err(Error::Transport(_))
        ));
    }

    #[tokio::test]
    async fn test_file_sink_stores_each_treatment_once() {
        let temp_dir = tempfile::tempdir().unwrap();
        let sink = FileSink::new(temp_dir.path());

        let first = mapper::correction_bolus_treatment(&device("P1"), at(10, 0, 0), 1.5);
        let second = mapper::carb_correction_treatment(&device("P1"), at(10, 30, 0), 20.0);

        let accepted = sink.report_treatments(vec![first.clone()]).await.unwrap();
        assert_eq!(accepted, vec![first.clone()]);

        let accepted = sink
            .report_treatments(vec![first.clone(), second.clone()])
            .await
            .unwrap();
        assert_eq!(accepted, vec![second.clone()]);

        let stored: Vec<Treatment> = journal::read_all(&sink.treatments_path()).unwrap();
        assert_eq!(stored, vec![first, second]);
    }

    #[tokio::test]
    async fn test_retried_cycle_does_not_duplicate_treatments() {
        use crate::collaborators::FixedClock;
        use crate::orchestrator::{Collaborators, TreatmentsPipeline, TreatmentsState};
        use crate::MatchPolicy;
        use chrono::FixedOffset;
        use std::sync::Arc;

        let temp_dir = tempfile::tempdir().unwrap();
        let source = FileSource::new(temp_dir.path());
        let sink = FileSink::new(temp_dir.path());
        journal::append(
            &source.records_path(),
            &[bolus("P1", at(10, 0, 0), 2.0), basal("P1", at(10, 30, 0), 0.9)],
        )
        .unwrap();
        // Profile update fails every cycle: the target config does not exist
        sink.update_profile(profile_named("Other", vec![])).await.unwrap();

        let pipeline = TreatmentsPipeline::new(
            Collaborators::new(
                Arc::new(source),
                Arc::new(sink.clone()),
                Arc::new(FixedClock(at(11, 0, 0))),
            ),
            "Default",
            MatchPolicy::default(),
            FixedOffset::east_opt(0).unwrap(),
        );

        let state = TreatmentsState::starting_at(at(9, 0, 0));
        for _ in 0..3 {
            assert!(pipeline.run_cycle(state.clone()).await.is_err());
        }

        let stored: Vec<Treatment> = journal::read_all(&sink.treatments_path()).unwrap();
        assert_eq!(stored.len(), 1);
    }

    #[tokio::test]
    async fn test_file_sink_profile_roundtrip() {
        let temp_dir = tempfile::tempdir().unwrap();
        let sink = FileSink::new(temp_dir.path());

        assert_eq!(sink.fetch_profile().await.unwrap(), Profile::default());

        let profile = profile_named("Default", vec![]);
        sink.update_profile(profile.clone()).await.unwrap();
        assert_eq!(sink.fetch_profile().await.unwrap(), profile);
    }
}
