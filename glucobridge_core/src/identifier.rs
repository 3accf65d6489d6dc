//! Treatment identifier: correlates carb and bolus records into treatments.
//!
//! ## Matching rules
//!
//! 1. **Same device only**: a carb record is never paired with a bolus from
//!    another device.
//! 2. **Bounded proximity**: the two timestamps must be within the policy's
//!    meal window (inclusive, default 5 minutes).
//! 3. **Meal boluses first, then nearest**: all eligible pairs are ranked
//!    with boluses the pump programmed for a meal ahead of plain ones, then by
//!    time distance, carb timestamp, bolus timestamp and record ids; pairs are
//!    accepted greedily while neither side is taken. Each record joins at most
//!    one treatment.
//!
//! Unpaired boluses become correction boluses and unpaired carbs become carb
//! corrections. Records that cannot be resolved are returned as unprocessed
//! and never abort the rest of the batch.

use crate::{mapper, PatientRecord, PatientRecordWithDeviceData, RecordId, Treatment};
use chrono::{DateTime, Duration, Utc};
use std::collections::{HashMap, HashSet};

/// Default carb/bolus pairing window in seconds
pub const DEFAULT_MEAL_WINDOW_SECS: u64 = 300;

/// Windows longer than a day are clamped
const MAX_MEAL_WINDOW_SECS: u64 = 24 * 60 * 60;

/// Tunables for carb/bolus correlation
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct MatchPolicy {
    pub meal_window: Duration,
}

impl MatchPolicy {
    pub fn with_window_secs(secs: u64) -> Self {
        let secs = secs.min(MAX_MEAL_WINDOW_SECS) as i64;
        Self {
            meal_window: Duration::seconds(secs),
        }
    }
}

impl Default for MatchPolicy {
    fn default() -> Self {
        Self::with_window_secs(DEFAULT_MEAL_WINDOW_SECS)
    }
}

/// Why a single record could not be turned into a treatment
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum CorrelationError {
    #[error("record {id} has invalid {field}: {value}")]
    InvalidQuantity {
        id: RecordId,
        field: &'static str,
        value: f64,
    },

    #[error("bolus {id} was programmed for a meal but no carbs were found")]
    AwaitingCarbs { id: RecordId },

    #[error("record {id} is neither a carb nor a bolus record")]
    UnsupportedKind { id: RecordId },
}

/// Output partition of [`identify`]
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Identification {
    pub treatments: Vec<Treatment>,
    /// Every record consumed into a treatment, counterparts from the batch
    /// context included
    pub resolved: Vec<RecordId>,
    pub unprocessed_records: Vec<PatientRecordWithDeviceData>,
}

#[derive(Clone, Copy, Debug, PartialEq)]
enum Side {
    Carb,
    Bolus { awaiting_meal: bool },
}

#[derive(Clone, Debug)]
struct Candidate<'a> {
    record: &'a PatientRecordWithDeviceData,
    id: RecordId,
    at: DateTime<Utc>,
    amount: f64,
    side: Side,
}

impl<'a> Candidate<'a> {
    fn from_record(record: &'a PatientRecordWithDeviceData) -> Result<Self, CorrelationError> {
        let id = record.id();
        let (amount, side, field) = match &record.record {
            PatientRecord::Carb { value, .. } => (*value, Side::Carb, "carbs"),
            PatientRecord::InsulinBolus {
                total_value,
                programmed_meal,
                ..
            } => (
                *total_value,
                Side::Bolus {
                    awaiting_meal: programmed_meal.is_some_and(|m| m > 0.0),
                },
                "insulin",
            ),
            _ => return Err(CorrelationError::UnsupportedKind { id }),
        };

        if !amount.is_finite() || amount <= 0.0 {
            return Err(CorrelationError::InvalidQuantity {
                id,
                field,
                value: amount,
            });
        }

        Ok(Candidate {
            record,
            at: record.created_at(),
            id,
            amount,
            side,
        })
    }

    fn is_carb(&self) -> bool {
        self.side == Side::Carb
    }
}

/// Resolve carb/bolus `candidates` into treatments.
///
/// Counterparts are searched in the whole `batch`, so a candidate can pair
/// with a record that was not itself offered for resolution.
pub fn identify(
    candidates: &[PatientRecordWithDeviceData],
    batch: &[PatientRecordWithDeviceData],
    policy: &MatchPolicy,
) -> Identification {
    let mut seen = HashSet::new();
    let mut ordered: Vec<&PatientRecordWithDeviceData> = candidates
        .iter()
        .filter(|record| seen.insert(record.id()))
        .collect();
    ordered.sort_by(|a, b| {
        a.created_at()
            .cmp(&b.created_at())
            .then_with(|| a.id().cmp(&b.id()))
    });

    let mut result = Identification::default();
    let mut valid: Vec<Candidate> = Vec::with_capacity(ordered.len());
    let mut rejected: HashSet<RecordId> = HashSet::new();

    for record in ordered {
        match Candidate::from_record(record) {
            Ok(candidate) => valid.push(candidate),
            Err(e) => {
                tracing::warn!(record = %record.id(), error = %e, "Deferring unresolvable record");
                rejected.insert(record.id());
                result.unprocessed_records.push(record.clone());
            }
        }
    }

    let candidate_ids: HashSet<RecordId> = valid.iter().map(|c| c.id.clone()).collect();

    // Counterpart pool: the valid candidates plus any other usable carb/bolus
    // record from the batch.
    let mut pool: HashMap<RecordId, Candidate> =
        valid.iter().map(|c| (c.id.clone(), c.clone())).collect();
    for record in batch {
        let id = record.id();
        if pool.contains_key(&id) || rejected.contains(&id) {
            continue;
        }
        if let Ok(candidate) = Candidate::from_record(record) {
            pool.insert(id, candidate);
        }
    }

    let partners = pair_meals(&pool, &candidate_ids, policy);

    let mut emitted: HashSet<RecordId> = HashSet::new();
    for candidate in &valid {
        if emitted.contains(&candidate.id) {
            continue;
        }

        if let Some(partner) = partners.get(&candidate.id).and_then(|id| pool.get(id)) {
            let (carb, bolus) = if candidate.is_carb() {
                (candidate, partner)
            } else {
                (partner, candidate)
            };
            tracing::debug!(carb = %carb.id, bolus = %bolus.id, "Paired meal bolus");
            result.treatments.push(mapper::meal_bolus_treatment(
                &bolus.record.device,
                bolus.at,
                bolus.amount,
                carb.at,
                carb.amount,
            ));
            for id in [&candidate.id, &partner.id] {
                emitted.insert(id.clone());
                result.resolved.push(id.clone());
            }
            continue;
        }

        let treatment = match candidate.side {
            Side::Carb => mapper::carb_correction_treatment(
                &candidate.record.device,
                candidate.at,
                candidate.amount,
            ),
            Side::Bolus {
                awaiting_meal: true,
            } => {
                let e = CorrelationError::AwaitingCarbs {
                    id: candidate.id.clone(),
                };
                tracing::warn!(record = %candidate.id, error = %e, "Deferring unresolvable record");
                result.unprocessed_records.push(candidate.record.clone());
                continue;
            }
            Side::Bolus { .. } => mapper::correction_bolus_treatment(
                &candidate.record.device,
                candidate.at,
                candidate.amount,
            ),
        };

        emitted.insert(candidate.id.clone());
        result.resolved.push(candidate.id.clone());
        result.treatments.push(treatment);
    }

    tracing::debug!(
        treatments = result.treatments.len(),
        unprocessed = result.unprocessed_records.len(),
        "Identified treatments"
    );

    result
}

/// Pick one-to-one carb/bolus pairs, meal-programmed boluses first and then
/// nearest first. At least one side of every pair must be a candidate.
fn pair_meals(
    pool: &HashMap<RecordId, Candidate>,
    candidate_ids: &HashSet<RecordId>,
    policy: &MatchPolicy,
) -> HashMap<RecordId, RecordId> {
    let (carbs, boluses): (Vec<&Candidate>, Vec<&Candidate>) =
        pool.values().partition(|c| c.is_carb());

    let mut pairs = Vec::new();
    for carb in &carbs {
        for bolus in &boluses {
            if carb.record.device.serial_number != bolus.record.device.serial_number {
                continue;
            }
            if !candidate_ids.contains(&carb.id) && !candidate_ids.contains(&bolus.id) {
                continue;
            }
            let distance = (bolus.at - carb.at).abs();
            if distance > policy.meal_window {
                continue;
            }
            let plain = !matches!(bolus.side, Side::Bolus { awaiting_meal: true });
            pairs.push((
                plain,
                distance,
                carb.at,
                bolus.at,
                carb.id.clone(),
                bolus.id.clone(),
            ));
        }
    }
    pairs.sort();

    let mut partners = HashMap::new();
    for (_, _, _, _, carb, bolus) in pairs {
        if partners.contains_key(&carb) || partners.contains_key(&bolus) {
            continue;
        }
        partners.insert(carb.clone(), bolus.clone());
        partners.insert(bolus, carb);
    }
    partners
}
