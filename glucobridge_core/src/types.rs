//! Core domain types for the glucobridge system.
//!
//! This module defines the fundamental types that flow between the source
//! and the sink:
//! - Source-side patient records and the devices that produced them
//! - Stable record identities used for dedup bookkeeping
//! - Sink-side glucose entries and treatment events

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Value written to `enteredBy` on every treatment we report
pub const ENTERED_BY: &str = "glucobridge";

/// Namespace for deterministic treatment identifiers
const TREATMENT_NAMESPACE: Uuid = Uuid::from_u128(0x6a0f_52c1_9b7e_4d3a_8e21_f4c0_77b3_1d95);

// ============================================================================
// Source Records
// ============================================================================

/// Unit a glucose reading was reported in
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Default)]
pub enum GlucoseUnit {
    #[serde(rename = "mg/dL")]
    #[default]
    MgDl,
    #[serde(rename = "mmol/L")]
    MmolL,
}

/// How a bolus was delivered by the pump
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum BolusDelivery {
    #[default]
    Standard,
    Extended,
    Combination,
}

/// Kind discriminant of a [`PatientRecord`]
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "snake_case")]
pub enum RecordKind {
    Glucose,
    Carb,
    InsulinBolus,
    InsulinBasal,
}

impl fmt::Display for RecordKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RecordKind::Glucose => "glucose",
            RecordKind::Carb => "carb",
            RecordKind::InsulinBolus => "insulin_bolus",
            RecordKind::InsulinBasal => "insulin_basal",
        };
        f.write_str(name)
    }
}

/// A single record as exposed by the source
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PatientRecord {
    /// Glucose reading
    Glucose {
        created_at: DateTime<Utc>,
        value: f64,
        #[serde(default)]
        unit: GlucoseUnit,
    },
    /// Carbohydrate intake in grams
    Carb {
        created_at: DateTime<Utc>,
        value: f64,
    },
    /// Delivered bolus in units
    InsulinBolus {
        created_at: DateTime<Utc>,
        total_value: f64,
        #[serde(default)]
        delivery: BolusDelivery,
        /// Portion the pump attributed to a meal, if any
        #[serde(default, skip_serializing_if = "Option::is_none")]
        programmed_meal: Option<f64>,
    },
    /// Basal rate change in U/h
    InsulinBasal {
        created_at: DateTime<Utc>,
        value: f64,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        duration_minutes: Option<u32>,
    },
}

impl PatientRecord {
    pub fn created_at(&self) -> DateTime<Utc> {
        match self {
            PatientRecord::Glucose { created_at, .. }
            | PatientRecord::Carb { created_at, .. }
            | PatientRecord::InsulinBolus { created_at, .. }
            | PatientRecord::InsulinBasal { created_at, .. } => *created_at,
        }
    }

    pub fn kind(&self) -> RecordKind {
        match self {
            PatientRecord::Glucose { .. } => RecordKind::Glucose,
            PatientRecord::Carb { .. } => RecordKind::Carb,
            PatientRecord::InsulinBolus { .. } => RecordKind::InsulinBolus,
            PatientRecord::InsulinBasal { .. } => RecordKind::InsulinBasal,
        }
    }
}

/// The device a record originated from
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct DeviceData {
    pub serial_number: String,
    #[serde(default)]
    pub manufacturer: String,
    #[serde(default)]
    pub model_name: String,
    #[serde(default)]
    pub device_type: String,
}

impl DeviceData {
    /// Tag written to the `device` field of sink documents
    pub fn tag(&self) -> String {
        if self.model_name.is_empty() {
            self.serial_number.clone()
        } else {
            format!("{}/{}", self.model_name, self.serial_number)
        }
    }
}

/// A record paired with its originating device
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct PatientRecordWithDeviceData {
    #[serde(flatten)]
    pub record: PatientRecord,
    pub device: DeviceData,
}

impl PatientRecordWithDeviceData {
    pub fn new(record: PatientRecord, device: DeviceData) -> Self {
        Self { record, device }
    }

    pub fn id(&self) -> RecordId {
        RecordId {
            device: self.device.serial_number.clone(),
            created_at: self.record.created_at(),
            kind: self.record.kind(),
        }
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.record.created_at()
    }

    pub fn kind(&self) -> RecordKind {
        self.record.kind()
    }
}

/// Stable identity of a record: device serial, timestamp and kind.
///
/// Survives serialization, unlike object identity, so carried-forward
/// records can be matched against freshly fetched ones.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct RecordId {
    pub device: String,
    pub created_at: DateTime<Utc>,
    pub kind: RecordKind,
}

impl fmt::Display for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}@{}#{}",
            self.device,
            self.created_at.to_rfc3339(),
            self.kind
        )
    }
}

impl RecordId {
    /// Deterministic treatment identifier for the records a treatment came
    /// from. Reporting the same records twice yields the same identifier, so
    /// the sink can dedupe retried reports.
    pub fn treatment_identifier(sources: &[&RecordId]) -> Uuid {
        let mut sorted: Vec<String> = sources.iter().map(|id| id.to_string()).collect();
        sorted.sort();
        Uuid::new_v5(&TREATMENT_NAMESPACE, sorted.join("|").as_bytes())
    }
}

// ============================================================================
// Sink Documents
// ============================================================================

/// A glucose entry as stored by the sink
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct Entry {
    #[serde(rename = "type")]
    pub entry_type: String,
    /// Glucose in mg/dL
    pub sgv: u16,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub date: DateTime<Utc>,
    #[serde(rename = "dateString")]
    pub date_string: String,
    pub device: String,
}

/// Bolus given together with carbs
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct MealBolusTreatment {
    pub identifier: Uuid,
    pub created_at: DateTime<Utc>,
    pub insulin: f64,
    pub carbs: f64,
    /// Minutes from the bolus to the carbs (negative when carbs came first)
    #[serde(rename = "preBolus")]
    pub pre_bolus: i64,
    #[serde(rename = "enteredBy")]
    pub entered_by: String,
    pub device: String,
}

/// Bolus with no matching carbs
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct CorrectionBolusTreatment {
    pub identifier: Uuid,
    pub created_at: DateTime<Utc>,
    pub insulin: f64,
    #[serde(rename = "enteredBy")]
    pub entered_by: String,
    pub device: String,
}

/// Carbs with no matching bolus
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct CarbCorrectionTreatment {
    pub identifier: Uuid,
    pub created_at: DateTime<Utc>,
    pub carbs: f64,
    #[serde(rename = "enteredBy")]
    pub entered_by: String,
    pub device: String,
}

/// Treatment event reported to the sink
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(tag = "eventType")]
pub enum Treatment {
    #[serde(rename = "Meal Bolus")]
    MealBolus(MealBolusTreatment),
    #[serde(rename = "Correction Bolus")]
    CorrectionBolus(CorrectionBolusTreatment),
    #[serde(rename = "Carb Correction")]
    CarbCorrection(CarbCorrectionTreatment),
}

impl Treatment {
    pub fn created_at(&self) -> DateTime<Utc> {
        match self {
            Treatment::MealBolus(t) => t.created_at,
            Treatment::CorrectionBolus(t) => t.created_at,
            Treatment::CarbCorrection(t) => t.created_at,
        }
    }

    pub fn identifier(&self) -> Uuid {
        match self {
            Treatment::MealBolus(t) => t.identifier,
            Treatment::CorrectionBolus(t) => t.identifier,
            Treatment::CarbCorrection(t) => t.identifier,
        }
    }

    /// The sink's `eventType` string
    pub fn event_type(&self) -> &'static str {
        match self {
            Treatment::MealBolus(_) => "Meal Bolus",
            Treatment::CorrectionBolus(_) => "Correction Bolus",
            Treatment::CarbCorrection(_) => "Carb Correction",
        }
    }
}
