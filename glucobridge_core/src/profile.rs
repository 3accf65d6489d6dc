//! Sink profile and pump settings types.
//!
//! Time-of-day schedules (basal, carb ratio, sensitivity, targets) share one
//! entry type keyed by minute-of-day. Profile documents keep any field we do
//! not model in a flattened `extra` map so a round trip through this crate
//! never drops settings edited by hand on the sink side.

use crate::Error;
use chrono::{DateTime, TimeZone, Timelike, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

const MINUTES_PER_DAY: u16 = 24 * 60;

// ============================================================================
// Time of day
// ============================================================================

/// Minute-of-day in `[0, 1440)`, serialized as `"HH:MM"`
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct TimeOfDay(u16);

impl TimeOfDay {
    pub const MIDNIGHT: TimeOfDay = TimeOfDay(0);

    pub fn from_minutes(minutes: u16) -> Option<Self> {
        (minutes < MINUTES_PER_DAY).then_some(TimeOfDay(minutes))
    }

    pub fn from_hm(hour: u16, minute: u16) -> Option<Self> {
        if hour >= 24 || minute >= 60 {
            return None;
        }
        Some(TimeOfDay(hour * 60 + minute))
    }

    /// Minute-of-day of `at` in its own timezone, seconds truncated
    pub fn of<Tz: TimeZone>(at: &DateTime<Tz>) -> Self {
        TimeOfDay((at.hour() * 60 + at.minute()) as u16)
    }

    pub fn minutes(self) -> u16 {
        self.0
    }

    pub fn as_seconds(self) -> u32 {
        u32::from(self.0) * 60
    }
}

impl fmt::Display for TimeOfDay {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:02}:{:02}", self.0 / 60, self.0 % 60)
    }
}

impl FromStr for TimeOfDay {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || Error::Other(format!("Invalid time of day: {:?}", s));
        let (hour, minute) = s.trim().split_once(':').ok_or_else(invalid)?;
        let hour = hour.parse::<u16>().map_err(|_| invalid())?;
        let minute = minute.parse::<u16>().map_err(|_| invalid())?;
        TimeOfDay::from_hm(hour, minute).ok_or_else(invalid)
    }
}

impl Serialize for TimeOfDay {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for TimeOfDay {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

// ============================================================================
// Schedules
// ============================================================================

/// One step of a time-of-day schedule
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawScheduleEntry", into = "RawScheduleEntry")]
pub struct ScheduleEntry {
    pub time: TimeOfDay,
    pub value: f64,
}

impl ScheduleEntry {
    pub fn new(time: TimeOfDay, value: f64) -> Self {
        Self { time, value }
    }
}

/// Wire shape: `{ "time": "HH:MM", "value": 0.8, "timeAsSeconds": 0 }`
#[derive(Serialize, Deserialize)]
struct RawScheduleEntry {
    time: String,
    value: f64,
    #[serde(rename = "timeAsSeconds", default)]
    time_as_seconds: Option<u32>,
}

impl TryFrom<RawScheduleEntry> for ScheduleEntry {
    type Error = Error;

    fn try_from(raw: RawScheduleEntry) -> Result<Self, Self::Error> {
        let time = match raw.time.parse::<TimeOfDay>() {
            Ok(time) => time,
            Err(e) => raw
                .time_as_seconds
                .and_then(|secs| u16::try_from(secs / 60).ok())
                .and_then(TimeOfDay::from_minutes)
                .ok_or(e)?,
        };
        Ok(ScheduleEntry {
            time,
            value: raw.value,
        })
    }
}

impl From<ScheduleEntry> for RawScheduleEntry {
    fn from(entry: ScheduleEntry) -> Self {
        RawScheduleEntry {
            time: entry.time.to_string(),
            value: entry.value,
            time_as_seconds: Some(entry.time.as_seconds()),
        }
    }
}

// ============================================================================
// Profile
// ============================================================================

/// One named configuration inside the sink profile store
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ProfileConfig {
    #[serde(default)]
    pub basal: Vec<ScheduleEntry>,
    #[serde(default)]
    pub carbratio: Vec<ScheduleEntry>,
    #[serde(default)]
    pub sens: Vec<ScheduleEntry>,
    #[serde(default)]
    pub target_low: Vec<ScheduleEntry>,
    #[serde(default)]
    pub target_high: Vec<ScheduleEntry>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dia: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub units: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timezone: Option<String>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

/// The sink's profile document
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Profile {
    #[serde(rename = "defaultProfile", default)]
    pub default_profile: String,
    #[serde(default)]
    pub store: BTreeMap<String, ProfileConfig>,
    #[serde(rename = "startDate", default, skip_serializing_if = "Option::is_none")]
    pub start_date: Option<DateTime<Utc>>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl Profile {
    pub fn config(&self, name: &str) -> Option<&ProfileConfig> {
        self.store.get(name)
    }
}

// ============================================================================
// Pump settings
// ============================================================================

/// Full pump configuration as scraped from the source
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct PumpSettings {
    pub active_basal_program: String,
    #[serde(default)]
    pub basal_programs: BTreeMap<String, Vec<ScheduleEntry>>,
    #[serde(default)]
    pub insulin_carb_ratio: Vec<ScheduleEntry>,
    #[serde(default)]
    pub insulin_sensitivity: Vec<ScheduleEntry>,
    #[serde(default)]
    pub target_low: Vec<ScheduleEntry>,
    #[serde(default)]
    pub target_high: Vec<ScheduleEntry>,
    #[serde(default)]
    pub insulin_duration_hours: Option<f64>,
}

impl PumpSettings {
    /// Schedule of the program the pump is currently running
    pub fn active_basal_schedule(&self) -> Option<&[ScheduleEntry]> {
        self.basal_programs
            .get(&self.active_basal_program)
            .map(Vec::as_slice)
    }
}
