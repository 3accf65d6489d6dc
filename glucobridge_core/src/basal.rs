//! Basal profile merger.
//!
//! Observed basal rates are bucketed to minute-of-day and merged into the
//! stored schedule by replacing entries with the same time of day. Entries
//! without a new observation are kept, so edits made on the sink side
//! survive. Merging the same observations twice is a no-op.

use crate::{
    mapper, Error, PatientRecord, PatientRecordWithDeviceData, Profile, PumpSettings, Result,
    ScheduleEntry, TimeOfDay,
};
use chrono::FixedOffset;
use std::collections::BTreeMap;

/// Turn basal records into a schedule, one entry per minute-of-day.
///
/// When several records land in the same minute the latest one wins.
/// Non-basal records are ignored; non-finite or negative rates are skipped.
pub fn observed_schedule(
    records: &[PatientRecordWithDeviceData],
    offset: FixedOffset,
) -> Vec<ScheduleEntry> {
    let mut basal: Vec<&PatientRecordWithDeviceData> = records
        .iter()
        .filter(|r| matches!(r.record, PatientRecord::InsulinBasal { .. }))
        .collect();
    basal.sort_by(|a, b| {
        a.created_at()
            .cmp(&b.created_at())
            .then_with(|| a.id().cmp(&b.id()))
    });

    let mut by_time: BTreeMap<TimeOfDay, f64> = BTreeMap::new();
    for record in basal {
        if let PatientRecord::InsulinBasal {
            created_at, value, ..
        } = record.record
        {
            if !is_usable_rate(value) {
                tracing::warn!(record = %record.id(), rate = value, "Skipping invalid basal rate");
                continue;
            }
            let entry = mapper::basal_schedule_entry(created_at, value, offset);
            by_time.insert(entry.time, entry.value);
        }
    }

    into_schedule(by_time)
}

pub(crate) fn is_usable_rate(rate: f64) -> bool {
    rate.is_finite() && rate >= 0.0
}

/// Merge `observed` into `existing`, replacing by time of day.
///
/// Returns a new schedule sorted ascending with unique times; neither input
/// is touched.
pub fn merge_schedule(existing: &[ScheduleEntry], observed: &[ScheduleEntry]) -> Vec<ScheduleEntry> {
    let mut by_time: BTreeMap<TimeOfDay, f64> = BTreeMap::new();
    for entry in existing.iter().chain(observed) {
        by_time.insert(entry.time, entry.value);
    }
    into_schedule(by_time)
}

/// Merge basal records straight into an existing schedule
pub fn merge_basal_records(
    existing: &[ScheduleEntry],
    records: &[PatientRecordWithDeviceData],
    offset: FixedOffset,
) -> Vec<ScheduleEntry> {
    merge_schedule(existing, &observed_schedule(records, offset))
}

/// Copy of `profile` with the basal schedule of config `name` replaced.
///
/// Every other field of every config is carried over untouched.
pub fn apply_basal_schedule(
    profile: &Profile,
    name: &str,
    schedule: Vec<ScheduleEntry>,
) -> Result<Profile> {
    let mut updated = profile.clone();
    let config = updated
        .store
        .get_mut(name)
        .ok_or_else(|| Error::ProfileNotFound(name.to_string()))?;
    config.basal = schedule;
    Ok(updated)
}

/// Which parts of a pump settings scrape to carry into the profile
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PumpImport {
    pub basal: bool,
    pub other_settings: bool,
}

/// Copy of `profile` updated from a full pump settings scrape.
///
/// The active basal program is merged like observed basal records. With
/// `other_settings`, carb ratio, sensitivity, targets and insulin duration
/// are replaced wholesale when the pump reports them.
pub fn apply_pump_settings(
    profile: &Profile,
    name: &str,
    settings: &PumpSettings,
    import: PumpImport,
) -> Result<Profile> {
    let mut updated = profile.clone();
    let config = updated
        .store
        .get_mut(name)
        .ok_or_else(|| Error::ProfileNotFound(name.to_string()))?;

    if import.basal {
        match settings.active_basal_schedule() {
            Some(schedule) => config.basal = merge_schedule(&config.basal, schedule),
            None => tracing::warn!(
                program = %settings.active_basal_program,
                "Active basal program missing from pump settings"
            ),
        }
    }

    if import.other_settings {
        replace_if_present(&mut config.carbratio, &settings.insulin_carb_ratio);
        replace_if_present(&mut config.sens, &settings.insulin_sensitivity);
        replace_if_present(&mut config.target_low, &settings.target_low);
        replace_if_present(&mut config.target_high, &settings.target_high);
        if let Some(hours) = settings.insulin_duration_hours {
            config.dia = Some(hours);
        }
    }

    Ok(updated)
}

fn replace_if_present(target: &mut Vec<ScheduleEntry>, source: &[ScheduleEntry]) {
    if !source.is_empty() {
        *target = merge_schedule(&[], source);
    }
}

fn into_schedule(by_time: BTreeMap<TimeOfDay, f64>) -> Vec<ScheduleEntry> {
    by_time
        .into_iter()
        .map(|(time, value)| ScheduleEntry::new(time, value))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{DeviceData, ProfileConfig};
    use chrono::{DateTime, TimeZone, Utc};

    fn at(h: u32, m: u32, s: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 1, h, m, s).unwrap()
    }

    fn utc() -> FixedOffset {
        FixedOffset::east_opt(0).unwrap()
    }

    fn entry(hm: &str, value: f64) -> ScheduleEntry {
        ScheduleEntry::new(hm.parse().unwrap(), value)
    }

    fn basal(created_at: DateTime<Utc>, rate: f64) -> PatientRecordWithDeviceData {
        PatientRecordWithDeviceData::new(
            PatientRecord::InsulinBasal {
                created_at,
                value: rate,
                duration_minutes: None,
            },
            DeviceData {
                serial_number: "P1".into(),
                manufacturer: String::new(),
                model_name: String::new(),
                device_type: String::new(),
            },
        )
    }

    fn profile_with(basal: Vec<ScheduleEntry>) -> Profile {
        let mut profile = Profile {
            default_profile: "Default".into(),
            ..Default::default()
        };
        let mut config = ProfileConfig {
            basal,
            carbratio: vec![entry("00:00", 10.0)],
            dia: Some(4.0),
            ..Default::default()
        };
        config
            .extra
            .insert("delay".into(), serde_json::Value::from(20));
        profile.store.insert("Default".into(), config);
        profile.store.insert(
            "Sick day".into(),
            ProfileConfig {
                basal: vec![entry("00:00", 1.5)],
                ..Default::default()
            },
        );
        profile
    }

    #[test]
    fn test_merge_replaces_by_time_and_keeps_the_rest() {
        let existing = vec![entry("00:00", 0.6), entry("06:00", 0.9), entry("22:00", 0.7)];
        let observed = vec![entry("06:00", 1.1), entry("12:30", 0.8)];

        let merged = merge_schedule(&existing, &observed);

        assert_eq!(
            merged,
            vec![
                entry("00:00", 0.6),
                entry("06:00", 1.1),
                entry("12:30", 0.8),
                entry("22:00", 0.7),
            ]
        );
        // Inputs untouched
        assert_eq!(existing.len(), 3);
        assert_eq!(existing[1].value, 0.9);
    }

    #[test]
    fn test_merge_sorts_and_dedupes_unordered_existing() {
        let existing = vec![entry("12:00", 0.8), entry("00:00", 0.6), entry("12:00", 0.9)];
        let merged = merge_schedule(&existing, &[]);
        assert_eq!(merged, vec![entry("00:00", 0.6), entry("12:00", 0.9)]);
    }

    #[test]
    fn test_merge_is_idempotent() {
        let existing = vec![entry("00:00", 0.6), entry("06:00", 0.9)];
        let records = vec![basal(at(6, 0, 10), 1.0), basal(at(18, 15, 0), 0.5)];

        let once = merge_basal_records(&existing, &records, utc());
        let twice = merge_basal_records(&once, &records, utc());

        assert_eq!(once, twice);
    }

    #[test]
    fn test_observed_same_minute_latest_wins() {
        let records = vec![
            basal(at(8, 0, 40), 0.9),
            basal(at(8, 0, 5), 0.4),
            basal(at(9, 0, 0), f64::NAN),
            basal(at(10, 0, 0), -0.1),
        ];

        let schedule = observed_schedule(&records, utc());

        assert_eq!(schedule, vec![entry("08:00", 0.9)]);
    }

    #[test]
    fn test_observed_schedule_ignores_other_kinds() {
        let mut records = vec![basal(at(3, 0, 0), 0.5)];
        records.push(PatientRecordWithDeviceData::new(
            PatientRecord::Carb {
                created_at: at(4, 0, 0),
                value: 30.0,
            },
            records[0].device.clone(),
        ));
        assert_eq!(observed_schedule(&records, utc()), vec![entry("03:00", 0.5)]);
    }

    #[test]
    fn test_apply_basal_preserves_unrelated_fields() {
        let profile = profile_with(vec![entry("00:00", 0.6)]);

        let updated =
            apply_basal_schedule(&profile, "Default", vec![entry("00:00", 0.75)]).unwrap();

        let config = updated.config("Default").unwrap();
        assert_eq!(config.basal, vec![entry("00:00", 0.75)]);
        assert_eq!(config.carbratio, vec![entry("00:00", 10.0)]);
        assert_eq!(config.dia, Some(4.0));
        assert_eq!(config.extra["delay"], 20);
        assert_eq!(updated.store["Sick day"], profile.store["Sick day"]);
        // Original untouched
        assert_eq!(profile.config("Default").unwrap().basal[0].value, 0.6);
    }

    #[test]
    fn test_apply_basal_missing_profile() {
        let profile = profile_with(vec![]);
        let err = apply_basal_schedule(&profile, "Nope", vec![]).unwrap_err();
        assert!(matches!(err, Error::ProfileNotFound(name) if name == "Nope"));
    }

    fn pump_settings() -> PumpSettings {
        let mut settings = PumpSettings {
            active_basal_program: "Program A".into(),
            insulin_carb_ratio: vec![entry("00:00", 12.0), entry("11:00", 9.0)],
            insulin_duration_hours: Some(3.5),
            ..Default::default()
        };
        settings
            .basal_programs
            .insert("Program A".into(), vec![entry("00:00", 0.65), entry("04:00", 0.8)]);
        settings
            .basal_programs
            .insert("Program B".into(), vec![entry("00:00", 2.0)]);
        settings
    }

    #[test]
    fn test_pump_settings_basal_only() {
        let profile = profile_with(vec![entry("00:00", 0.6), entry("20:00", 0.5)]);
        let import = PumpImport {
            basal: true,
            other_settings: false,
        };

        let updated = apply_pump_settings(&profile, "Default", &pump_settings(), import).unwrap();

        let config = updated.config("Default").unwrap();
        assert_eq!(
            config.basal,
            vec![entry("00:00", 0.65), entry("04:00", 0.8), entry("20:00", 0.5)]
        );
        assert_eq!(config.carbratio, vec![entry("00:00", 10.0)]);
        assert_eq!(config.dia, Some(4.0));
    }

    #[test]
    fn test_pump_settings_other_settings() {
        let profile = profile_with(vec![entry("00:00", 0.6)]);
        let import = PumpImport {
            basal: false,
            other_settings: true,
        };

        let updated = apply_pump_settings(&profile, "Default", &pump_settings(), import).unwrap();

        let config = updated.config("Default").unwrap();
        assert_eq!(config.basal, vec![entry("00:00", 0.6)]);
        assert_eq!(config.carbratio, vec![entry("00:00", 12.0), entry("11:00", 9.0)]);
        assert_eq!(config.dia, Some(3.5));
        // Pump reported no sensitivity schedule, keep ours
        assert!(config.sens.is_empty());
    }
}
