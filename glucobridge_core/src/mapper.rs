//! Record mapper: stateless transforms from source records to sink shapes.
//!
//! Nothing here decides *which* records belong together; that is the
//! identifier's job. These functions only build the documents once the
//! quantities are known.

use crate::{
    CarbCorrectionTreatment, CorrectionBolusTreatment, DeviceData, Entry, GlucoseUnit,
    MealBolusTreatment, PatientRecord, PatientRecordWithDeviceData, RecordId, RecordKind,
    ScheduleEntry, TimeOfDay, Treatment, ENTERED_BY,
};
use chrono::{DateTime, FixedOffset, SecondsFormat, Utc};

/// mg/dL per mmol/L of glucose
pub const MMOL_TO_MG_DL: f64 = 18.0182;

/// Convert a glucose reading to whole mg/dL
pub fn to_mg_dl(value: f64, unit: GlucoseUnit) -> u16 {
    let mg_dl = match unit {
        GlucoseUnit::MgDl => value,
        GlucoseUnit::MmolL => value * MMOL_TO_MG_DL,
    };
    mg_dl.round().clamp(0.0, f64::from(u16::MAX)) as u16
}

/// Build the sink entry for a glucose record.
///
/// `None` for any other kind, and for readings that are not a finite
/// positive number: those are skipped rather than reported as 0 mg/dL.
pub fn glucose_entry(record: &PatientRecordWithDeviceData) -> Option<Entry> {
    match record.record {
        PatientRecord::Glucose { value, .. } if !(value.is_finite() && value > 0.0) => {
            tracing::warn!(record = %record.id(), value, "Skipping invalid glucose reading");
            None
        }
        PatientRecord::Glucose {
            created_at,
            value,
            unit,
        } => Some(Entry {
            entry_type: "sgv".into(),
            sgv: to_mg_dl(value, unit),
            date: created_at,
            date_string: created_at.to_rfc3339_opts(SecondsFormat::Millis, true),
            device: record.device.tag(),
        }),
        _ => None,
    }
}

fn source_id(device: &DeviceData, created_at: DateTime<Utc>, kind: RecordKind) -> RecordId {
    RecordId {
        device: device.serial_number.clone(),
        created_at,
        kind,
    }
}

/// Carbs and bolus from the same device
pub fn meal_bolus_treatment(
    device: &DeviceData,
    bolus_at: DateTime<Utc>,
    insulin: f64,
    carbs_at: DateTime<Utc>,
    carbs: f64,
) -> Treatment {
    let carb_id = source_id(device, carbs_at, RecordKind::Carb);
    let bolus_id = source_id(device, bolus_at, RecordKind::InsulinBolus);
    Treatment::MealBolus(MealBolusTreatment {
        identifier: RecordId::treatment_identifier(&[&carb_id, &bolus_id]),
        created_at: bolus_at,
        insulin,
        carbs,
        pre_bolus: (carbs_at - bolus_at).num_minutes(),
        entered_by: ENTERED_BY.into(),
        device: device.tag(),
    })
}

pub fn correction_bolus_treatment(
    device: &DeviceData,
    created_at: DateTime<Utc>,
    insulin: f64,
) -> Treatment {
    let bolus_id = source_id(device, created_at, RecordKind::InsulinBolus);
    Treatment::CorrectionBolus(CorrectionBolusTreatment {
        identifier: RecordId::treatment_identifier(&[&bolus_id]),
        created_at,
        insulin,
        entered_by: ENTERED_BY.into(),
        device: device.tag(),
    })
}

pub fn carb_correction_treatment(
    device: &DeviceData,
    created_at: DateTime<Utc>,
    carbs: f64,
) -> Treatment {
    let carb_id = source_id(device, created_at, RecordKind::Carb);
    Treatment::CarbCorrection(CarbCorrectionTreatment {
        identifier: RecordId::treatment_identifier(&[&carb_id]),
        created_at,
        carbs,
        entered_by: ENTERED_BY.into(),
        device: device.tag(),
    })
}

/// Basal rate observed at `created_at`, bucketed to the minute-of-day in the
/// profile's offset
pub fn basal_schedule_entry(
    created_at: DateTime<Utc>,
    rate: f64,
    offset: FixedOffset,
) -> ScheduleEntry {
    ScheduleEntry::new(TimeOfDay::of(&created_at.with_timezone(&offset)), rate)
}
