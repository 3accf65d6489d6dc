//! Cycle orchestrators: one fetch -> transform -> report pass per pipeline.
//!
//! Each pipeline turns a cycle state into the next one and is meant to be
//! driven by a [`Looper`](crate::Looper). The fetch window is
//! `[date_from, clock.now())`; the next `date_from` sits one second past the
//! newest record that actually made it to the sink, and never moves
//! backwards.

use crate::basal::{self, PumpImport};
use crate::collaborators::{Clock, RecordSource, Sink};
use crate::identifier::{self, MatchPolicy};
use crate::{
    mapper, Error, PatientRecord, PatientRecordWithDeviceData, RecordId, RecordKind, Result,
    ScheduleEntry,
};
use chrono::{DateTime, Duration, FixedOffset, Utc};
use std::collections::{BTreeSet, HashSet};
use std::fmt;
use std::sync::Arc;

/// Everything a pipeline talks to, shared read-only between loops
#[derive(Clone)]
pub struct Collaborators {
    pub source: Arc<dyn RecordSource>,
    pub sink: Arc<dyn Sink>,
    pub clock: Arc<dyn Clock>,
}

impl Collaborators {
    pub fn new(
        source: Arc<dyn RecordSource>,
        sink: Arc<dyn Sink>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            source,
            sink,
            clock,
        }
    }
}

/// Counters for one cycle
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct CycleSummary {
    pub fetched: usize,
    pub processed: usize,
    pub reported: usize,
    pub deferred: usize,
    pub dropped: usize,
}

impl fmt::Display for CycleSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "fetched={} processed={} reported={} deferred={} dropped={}",
            self.fetched, self.processed, self.reported, self.deferred, self.dropped
        )
    }
}

/// Cursor of the entries loop
#[derive(Clone, Debug, PartialEq)]
pub struct EntriesState {
    pub date_from: DateTime<Utc>,
}

/// Cursor of the treatments loop plus the records still waiting to resolve
#[derive(Clone, Debug, PartialEq)]
pub struct TreatmentsState {
    pub date_from: DateTime<Utc>,
    pub previous_records: Vec<PatientRecordWithDeviceData>,
    /// Records given up on that the fetch window can still return; forgotten
    /// once the cursor passes them
    pub abandoned: BTreeSet<RecordId>,
}

impl TreatmentsState {
    pub fn starting_at(date_from: DateTime<Utc>) -> Self {
        Self {
            date_from,
            previous_records: Vec::new(),
            abandoned: BTreeSet::new(),
        }
    }
}

fn advance_cursor(
    current: DateTime<Utc>,
    processed: impl IntoIterator<Item = DateTime<Utc>>,
) -> DateTime<Utc> {
    processed
        .into_iter()
        .max()
        .map(|newest| newest + Duration::seconds(1))
        .map_or(current, |next| next.max(current))
}

/// Glucose readings to sink entries
#[derive(Clone)]
pub struct EntriesPipeline {
    collaborators: Collaborators,
}

impl EntriesPipeline {
    pub fn new(collaborators: Collaborators) -> Self {
        Self { collaborators }
    }

    pub async fn run_cycle(&self, state: EntriesState) -> Result<(EntriesState, CycleSummary)> {
        let date_to = self.collaborators.clock.now();
        let fetched = self
            .collaborators
            .source
            .fetch_records(state.date_from, date_to)
            .await?;

        let glucose_records = fetched
            .iter()
            .filter(|r| r.kind() == RecordKind::Glucose)
            .count();
        let entries: Vec<_> = fetched.iter().filter_map(mapper::glucose_entry).collect();
        let mut summary = CycleSummary {
            fetched: fetched.len(),
            processed: entries.len(),
            dropped: glucose_records - entries.len(),
            ..Default::default()
        };

        if entries.is_empty() {
            tracing::info!(pipeline = "entries", %summary, "Nothing to report");
            return Ok((state, summary));
        }

        let newest = entries.iter().map(|e| e.date).max();
        let accepted = self.collaborators.sink.report_entries(entries).await?;
        summary.reported = accepted.len();

        let next = EntriesState {
            date_from: advance_cursor(state.date_from, newest),
        };
        tracing::info!(
            pipeline = "entries",
            %summary,
            date_from = %next.date_from,
            "Cycle complete"
        );
        Ok((next, summary))
    }

    pub async fn step(&self, state: EntriesState) -> Result<EntriesState> {
        self.run_cycle(state).await.map(|(next, _)| next)
    }
}

/// Carbs and boluses to treatments, basal rates into the profile
#[derive(Clone)]
pub struct TreatmentsPipeline {
    collaborators: Collaborators,
    profile_name: String,
    policy: MatchPolicy,
    utc_offset: FixedOffset,
}

impl TreatmentsPipeline {
    pub fn new(
        collaborators: Collaborators,
        profile_name: impl Into<String>,
        policy: MatchPolicy,
        utc_offset: FixedOffset,
    ) -> Self {
        Self {
            collaborators,
            profile_name: profile_name.into(),
            policy,
            utc_offset,
        }
    }

    pub async fn run_cycle(
        &self,
        state: TreatmentsState,
    ) -> Result<(TreatmentsState, CycleSummary)> {
        let date_to = self.collaborators.clock.now();
        let fetched = self
            .collaborators
            .source
            .fetch_records(state.date_from, date_to)
            .await?;

        let previous_ids: HashSet<RecordId> =
            state.previous_records.iter().map(|r| r.id()).collect();

        let mut seen = HashSet::new();
        let batch: Vec<PatientRecordWithDeviceData> = state
            .previous_records
            .iter()
            .chain(fetched.iter())
            .filter(|r| !state.abandoned.contains(&r.id()) && seen.insert(r.id()))
            .cloned()
            .collect();

        let (candidates, basal_records): (Vec<_>, Vec<_>) = batch
            .iter()
            .filter(|r| r.kind() != RecordKind::Glucose)
            .cloned()
            .partition(|r| r.kind() != RecordKind::InsulinBasal);

        let identification = identifier::identify(&candidates, &batch, &self.policy);
        let observed = basal::observed_schedule(&basal_records, self.utc_offset);

        let report = async {
            if identification.treatments.is_empty() {
                Ok(Vec::new())
            } else {
                self.collaborators
                    .sink
                    .report_treatments(identification.treatments.clone())
                    .await
            }
        };
        let (reported, profile_updated) = tokio::join!(report, self.update_basal(&observed));
        let reported = reported?;
        profile_updated?;

        let processed_basal: Vec<DateTime<Utc>> = basal_records
            .iter()
            .filter_map(|r| match r.record {
                PatientRecord::InsulinBasal {
                    created_at, value, ..
                } if basal::is_usable_rate(value) => Some(created_at),
                _ => None,
            })
            .collect();
        let skipped_basal = basal_records.len() - processed_basal.len();

        let date_from = advance_cursor(
            state.date_from,
            identification
                .resolved
                .iter()
                .map(|id| id.created_at)
                .chain(processed_basal.iter().copied()),
        );

        let mut dropped = skipped_basal;
        let mut abandoned = state.abandoned.clone();
        let mut carry_forward = Vec::new();
        for record in identification.unprocessed_records {
            if previous_ids.contains(&record.id()) {
                tracing::warn!(record = %record.id(), "Dropping record that failed to resolve twice");
                dropped += 1;
                abandoned.insert(record.id());
            } else {
                carry_forward.push(record);
            }
        }

        abandoned.retain(|id| id.created_at >= date_from);

        let summary = CycleSummary {
            fetched: fetched.len(),
            processed: identification.resolved.len() + processed_basal.len(),
            reported: reported.len(),
            deferred: carry_forward.len(),
            dropped,
        };
        tracing::info!(
            pipeline = "treatments",
            %summary,
            date_from = %date_from,
            "Cycle complete"
        );

        Ok((
            TreatmentsState {
                date_from,
                previous_records: carry_forward,
                abandoned,
            },
            summary,
        ))
    }

    pub async fn step(&self, state: TreatmentsState) -> Result<TreatmentsState> {
        self.run_cycle(state).await.map(|(next, _)| next)
    }

    /// Merge observed basal rates into the target profile. Returns whether
    /// the sink was written to.
    async fn update_basal(&self, observed: &[ScheduleEntry]) -> Result<bool> {
        if observed.is_empty() {
            return Ok(false);
        }

        let sink = &self.collaborators.sink;
        let profile = sink.fetch_profile().await?;
        let existing = profile
            .config(&self.profile_name)
            .ok_or_else(|| Error::ProfileNotFound(self.profile_name.clone()))?;

        let merged = basal::merge_schedule(&existing.basal, observed);
        if merged == existing.basal {
            tracing::debug!(profile = %self.profile_name, "Basal schedule unchanged");
            return Ok(false);
        }

        let updated = basal::apply_basal_schedule(&profile, &self.profile_name, merged)?;
        sink.update_profile(updated).await?;
        tracing::info!(
            profile = %self.profile_name,
            observed = observed.len(),
            "Updated basal schedule"
        );
        Ok(true)
    }
}

/// Full pump configuration into the profile, no cursor
#[derive(Clone)]
pub struct PumpSettingsPipeline {
    collaborators: Collaborators,
    profile_name: String,
    import: PumpImport,
}

impl PumpSettingsPipeline {
    pub fn new(
        collaborators: Collaborators,
        profile_name: impl Into<String>,
        import: PumpImport,
    ) -> Self {
        Self {
            collaborators,
            profile_name: profile_name.into(),
            import,
        }
    }

    pub async fn run_cycle(&self) -> Result<CycleSummary> {
        let settings = self.collaborators.source.fetch_pump_settings().await?;
        let profile = self.collaborators.sink.fetch_profile().await?;
        let updated =
            basal::apply_pump_settings(&profile, &self.profile_name, &settings, self.import)?;

        let mut summary = CycleSummary {
            fetched: 1,
            processed: 1,
            ..Default::default()
        };
        if updated != profile {
            self.collaborators.sink.update_profile(updated).await?;
            summary.reported = 1;
        }

        tracing::info!(
            pipeline = "pump_settings",
            %summary,
            program = %settings.active_basal_program,
            "Cycle complete"
        );
        Ok(summary)
    }

    pub async fn step(&self, _state: ()) -> Result<()> {
        self.run_cycle().await.map(|_| ())
    }
}
