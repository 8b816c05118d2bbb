//! Decoded telemetry records
//!
//! Every field is stored in physical units (seconds, meters, m/s, newtons,
//! joules). Unitless codes (workout type, rowing state, ...) and counters stay
//! as the unsigned integers the monitor sends.

use serde::Serialize;
use std::time::Duration;

/// The four record layouts the monitor notifies
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum RecordKind {
    GeneralStatus,
    AdditionalStatus,
    StrokeData,
    SplitData,
}

impl RecordKind {
    pub const ALL: [RecordKind; 4] = [
        RecordKind::GeneralStatus,
        RecordKind::AdditionalStatus,
        RecordKind::StrokeData,
        RecordKind::SplitData,
    ];

    /// Minimum payload length; shorter payloads fail to decode
    pub const fn min_len(self) -> usize {
        match self {
            RecordKind::GeneralStatus => 19,
            RecordKind::AdditionalStatus => 16,
            RecordKind::StrokeData => 20,
            RecordKind::SplitData => 18,
        }
    }

    /// Tag byte identifying this record inside a multiplexed notification
    pub const fn tag(self) -> u8 {
        match self {
            RecordKind::GeneralStatus => 0x31,
            RecordKind::AdditionalStatus => 0x32,
            RecordKind::StrokeData => 0x35,
            RecordKind::SplitData => 0x37,
        }
    }

    pub const fn from_tag(tag: u8) -> Option<Self> {
        match tag {
            0x31 => Some(RecordKind::GeneralStatus),
            0x32 => Some(RecordKind::AdditionalStatus),
            0x35 => Some(RecordKind::StrokeData),
            0x37 => Some(RecordKind::SplitData),
            _ => None,
        }
    }

    pub const fn name(self) -> &'static str {
        match self {
            RecordKind::GeneralStatus => "GeneralStatus",
            RecordKind::AdditionalStatus => "AdditionalStatus",
            RecordKind::StrokeData => "StrokeData",
            RecordKind::SplitData => "SplitData",
        }
    }
}

/// Overall workout progress and monitor state
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GeneralStatus {
    /// Seconds since the workout started
    pub elapsed_time: f64,
    /// Meters rowed
    pub distance: f64,
    pub workout_type: u8,
    pub interval_type: u8,
    pub workout_state: u8,
    pub rowing_state: u8,
    pub stroke_state: u8,
    /// Meters of work in the programmed workout
    pub total_work_distance: u32,
    /// Programmed duration; time or distance depending on `workout_duration_type`
    pub workout_duration: u32,
    pub workout_duration_type: u8,
    pub drag_factor: u8,
}

/// Speed, rates and pace
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AdditionalStatus {
    pub elapsed_time: f64,
    /// Meters per second
    pub speed: f64,
    /// Strokes per minute
    pub stroke_rate: u8,
    /// Beats per minute, 255 when no belt is paired
    pub heart_rate: u8,
    /// Seconds per 500 m
    pub current_pace: f64,
    /// Seconds per 500 m
    pub average_pace: f64,
    /// Meters
    pub rest_distance: u16,
    /// Seconds
    pub rest_time: f64,
}

impl AdditionalStatus {
    /// Current pace as a duration per 500 m
    pub fn pace_per_500m(&self) -> Duration {
        Duration::from_secs_f64(self.current_pace.max(0.0))
    }
}

/// Per-stroke force and timing
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StrokeData {
    pub elapsed_time: f64,
    pub distance: f64,
    /// Meters
    pub drive_length: f64,
    /// Seconds
    pub drive_time: f64,
    /// Seconds
    pub stroke_recovery_time: f64,
    /// Meters
    pub stroke_distance: f64,
    /// Newtons
    pub peak_drive_force: f64,
    /// Newtons
    pub average_drive_force: f64,
    /// Joules
    pub work_per_stroke: f64,
    pub stroke_count: u16,
}

impl StrokeData {
    /// Recovery time over drive time, `None` before the first measured drive
    pub fn drive_ratio(&self) -> Option<f64> {
        (self.drive_time > 0.0).then(|| self.stroke_recovery_time / self.drive_time)
    }
}

/// Split or interval summary
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SplitData {
    pub elapsed_time: f64,
    pub distance: f64,
    /// Seconds
    pub split_time: f64,
    /// Meters
    pub split_distance: f64,
    /// Seconds
    pub rest_time: u16,
    /// Meters
    pub rest_distance: u16,
    pub split_type: u8,
    pub split_number: u8,
}

/// One decoded notification
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum TelemetryRecord {
    GeneralStatus(GeneralStatus),
    AdditionalStatus(AdditionalStatus),
    StrokeData(StrokeData),
    SplitData(SplitData),
    /// Multiplexed payload with a tag this crate does not decode
    Unknown { tag: u8, payload: Vec<u8> },
}

impl TelemetryRecord {
    pub fn kind(&self) -> Option<RecordKind> {
        match self {
            TelemetryRecord::GeneralStatus(_) => Some(RecordKind::GeneralStatus),
            TelemetryRecord::AdditionalStatus(_) => Some(RecordKind::AdditionalStatus),
            TelemetryRecord::StrokeData(_) => Some(RecordKind::StrokeData),
            TelemetryRecord::SplitData(_) => Some(RecordKind::SplitData),
            TelemetryRecord::Unknown { .. } => None,
        }
    }

    /// Elapsed workout time in seconds, for every decoded variant
    pub fn elapsed_time(&self) -> Option<f64> {
        match self {
            TelemetryRecord::GeneralStatus(r) => Some(r.elapsed_time),
            TelemetryRecord::AdditionalStatus(r) => Some(r.elapsed_time),
            TelemetryRecord::StrokeData(r) => Some(r.elapsed_time),
            TelemetryRecord::SplitData(r) => Some(r.elapsed_time),
            TelemetryRecord::Unknown { .. } => None,
        }
    }

    pub fn is_unknown(&self) -> bool {
        matches!(self, TelemetryRecord::Unknown { .. })
    }
}
