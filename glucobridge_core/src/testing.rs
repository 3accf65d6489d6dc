//! In-memory collaborators and record builders for unit tests.

use crate::collaborators::{RecordSource, Sink};
use crate::{
    BolusDelivery, DeviceData, Entry, Error, GlucoseUnit, PatientRecord,
    PatientRecordWithDeviceData, Profile, ProfileConfig, PumpSettings, Result, ScheduleEntry,
    Treatment,
};
use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;

pub fn at(h: u32, m: u32, s: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 3, 1, h, m, s).unwrap()
}

pub fn device(serial: &str) -> DeviceData {
    DeviceData {
        serial_number: serial.into(),
        manufacturer: "Acme".into(),
        model_name: "Pump".into(),
        device_type: "insulin_pump".into(),
    }
}

pub fn glucose(serial: &str, created_at: DateTime<Utc>, mg_dl: f64) -> PatientRecordWithDeviceData {
    PatientRecordWithDeviceData::new(
        PatientRecord::Glucose {
            created_at,
            value: mg_dl,
            unit: GlucoseUnit::MgDl,
        },
        device(serial),
    )
}

pub fn carb(serial: &str, created_at: DateTime<Utc>, grams: f64) -> PatientRecordWithDeviceData {
    PatientRecordWithDeviceData::new(
        PatientRecord::Carb {
            created_at,
            value: grams,
        },
        device(serial),
    )
}

pub fn bolus(serial: &str, created_at: DateTime<Utc>, units: f64) -> PatientRecordWithDeviceData {
    PatientRecordWithDeviceData::new(
        PatientRecord::InsulinBolus {
            created_at,
            total_value: units,
            delivery: BolusDelivery::Standard,
            programmed_meal: None,
        },
        device(serial),
    )
}

pub fn meal_bolus(
    serial: &str,
    created_at: DateTime<Utc>,
    units: f64,
) -> PatientRecordWithDeviceData {
    PatientRecordWithDeviceData::new(
        PatientRecord::InsulinBolus {
            created_at,
            total_value: units,
            delivery: BolusDelivery::Standard,
            programmed_meal: Some(units),
        },
        device(serial),
    )
}

pub fn basal(serial: &str, created_at: DateTime<Utc>, rate: f64) -> PatientRecordWithDeviceData {
    PatientRecordWithDeviceData::new(
        PatientRecord::InsulinBasal {
            created_at,
            value: rate,
            duration_minutes: None,
        },
        device(serial),
    )
}

pub fn profile_named(name: &str, basal: Vec<ScheduleEntry>) -> Profile {
    let mut profile = Profile {
        default_profile: name.into(),
        ..Default::default()
    };
    profile.store.insert(
        name.into(),
        ProfileConfig {
            basal,
            ..Default::default()
        },
    );
    profile
}

/// Source serving a fixed record set, filtered by window
#[derive(Default)]
pub struct FakeSource {
    pub records: Mutex<Vec<PatientRecordWithDeviceData>>,
    pub pump_settings: Mutex<PumpSettings>,
    pub windows: Mutex<Vec<(DateTime<Utc>, DateTime<Utc>)>>,
    pub fail: AtomicBool,
}

impl FakeSource {
    pub fn with_records(records: Vec<PatientRecordWithDeviceData>) -> Self {
        Self {
            records: Mutex::new(records),
            ..Default::default()
        }
    }

    pub fn push(&self, record: PatientRecordWithDeviceData) {
        self.records.lock().unwrap().push(record);
    }
}

#[async_trait]
impl RecordSource for FakeSource {
    async fn fetch_records(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<PatientRecordWithDeviceData>> {
        self.windows.lock().unwrap().push((from, to));
        if self.fail.load(Ordering::SeqCst) {
            return Err(Error::Authentication("session expired".into()));
        }
        Ok(self
            .records
            .lock()
            .unwrap()
            .iter()
            .filter(|r| r.created_at() >= from && r.created_at() < to)
            .cloned()
            .collect())
    }

    async fn fetch_pump_settings(&self) -> Result<PumpSettings> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(Error::Transport("connection reset".into()));
        }
        Ok(self.pump_settings.lock().unwrap().clone())
    }
}

/// Sink that records everything it is sent
#[derive(Default)]
pub struct FakeSink {
    pub entries: Mutex<Vec<Entry>>,
    pub treatments: Mutex<Vec<Treatment>>,
    pub profile: Mutex<Profile>,
    pub profile_updates: AtomicUsize,
    pub fail_treatments: AtomicBool,
    pub fail_profile: AtomicBool,
}

impl FakeSink {
    pub fn with_profile(profile: Profile) -> Self {
        Self {
            profile: Mutex::new(profile),
            ..Default::default()
        }
    }

    pub fn treatments(&self) -> Vec<Treatment> {
        self.treatments.lock().unwrap().clone()
    }

    pub fn profile(&self) -> Profile {
        self.profile.lock().unwrap().clone()
    }
}

#[async_trait]
impl Sink for FakeSink {
    async fn report_entries(&self, entries: Vec<Entry>) -> Result<Vec<Entry>> {
        self.entries.lock().unwrap().extend(entries.iter().cloned());
        Ok(entries)
    }

    async fn report_treatments(&self, treatments: Vec<Treatment>) -> Result<Vec<Treatment>> {
        if self.fail_treatments.load(Ordering::SeqCst) {
            return Err(Error::Transport("treatments endpoint down".into()));
        }
        self.treatments
            .lock()
            .unwrap()
            .extend(treatments.iter().cloned());
        Ok(treatments)
    }

    async fn fetch_profile(&self) -> Result<Profile> {
        Ok(self.profile())
    }

    async fn update_profile(&self, profile: Profile) -> Result<Profile> {
        if self.fail_profile.load(Ordering::SeqCst) {
            return Err(Error::Transport("profile endpoint down".into()));
        }
        self.profile_updates.fetch_add(1, Ordering::SeqCst);
        *self.profile.lock().unwrap() = profile.clone();
        Ok(profile)
    }
}
