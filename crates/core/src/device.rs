//! Device progress state and the pure transition rules over it.

use std::fmt;

use labseq_storage::DeviceRecord;
use serde::{Deserialize, Serialize};

pub const NOT_STARTED: &str = "not_started";
pub const COMPLETED: &str = "completed";

/// Where a device is in its sequence.
///
/// On the wire this is a single string: `"not_started"`, `"completed"`, or
/// the id of the test in progress. Test ids equal to either sentinel are
/// therefore rejected by the sequencer.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum Stage {
    NotStarted,
    Running(String),
    Completed,
}

impl Stage {
    pub fn as_str(&self) -> &str {
        match self {
            Stage::NotStarted => NOT_STARTED,
            Stage::Running(test_id) => test_id,
            Stage::Completed => COMPLETED,
        }
    }

    pub fn is_reserved(test_id: &str) -> bool {
        test_id == NOT_STARTED || test_id == COMPLETED
    }
}

impl From<String> for Stage {
    fn from(s: String) -> Self {
        match s.as_str() {
            // An empty stage reads as not started.
            NOT_STARTED | "" => Stage::NotStarted,
            COMPLETED => Stage::Completed,
            _ => Stage::Running(s),
        }
    }
}

impl From<Stage> for String {
    fn from(stage: Stage) -> Self {
        match stage {
            Stage::Running(test_id) => test_id,
            other => other.as_str().to_string(),
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Status of one test on one device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TestStatus {
    Completed,
    Running,
    Pending,
}

/// Aggregate status of a device, derived from completion counts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeviceStatus {
    NotStarted,
    InProgress,
    Completed,
}

/// Which rule produced the stage after a completion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Advance {
    /// The completed test is required and another required test follows it.
    Next,
    /// The completed test is the last required test.
    LastRequired,
    /// The completed test is not in the required list. The stage still
    /// becomes `completed`, whatever else remains outstanding.
    NotRequired,
}

/// Stage that follows completing `test_id`, given the device's required list.
pub fn next_stage(required_tests: &[String], test_id: &str) -> (Stage, Advance) {
    match required_tests.iter().position(|t| t == test_id) {
        Some(i) if i + 1 < required_tests.len() => {
            (Stage::Running(required_tests[i + 1].clone()), Advance::Next)
        }
        Some(_) => (Stage::Completed, Advance::LastRequired),
        None => (Stage::Completed, Advance::NotRequired),
    }
}

/// One physical unit under test.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Device {
    pub serial_number: String,
    pub device_type: String,
    pub current_stage: Stage,
    pub completed_tests: Vec<String>,
    /// Required test ids captured when the device was created.
    pub required_tests: Vec<String>,
    pub manufacturing_order_number: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

impl Device {
    pub fn new(
        serial_number: &str,
        device_type: &str,
        required_tests: Vec<String>,
        manufacturing_order_number: Option<String>,
        now: String,
    ) -> Self {
        Device {
            serial_number: serial_number.to_string(),
            device_type: device_type.to_string(),
            current_stage: Stage::NotStarted,
            completed_tests: Vec::new(),
            required_tests,
            manufacturing_order_number,
            created_at: now.clone(),
            updated_at: now,
        }
    }

    pub fn start(&mut self, test_id: &str) {
        self.current_stage = Stage::Running(test_id.to_string());
    }

    /// Record `test_id` as completed and recompute the stage.
    ///
    /// Completing a test twice leaves `completed_tests` unchanged but the
    /// stage is recomputed every time.
    pub fn complete(&mut self, test_id: &str) -> Advance {
        if !self.completed_tests.iter().any(|t| t == test_id) {
            self.completed_tests.push(test_id.to_string());
        }
        let (stage, advance) = next_stage(&self.required_tests, test_id);
        self.current_stage = stage;
        advance
    }

    pub fn test_status(&self, test_id: &str) -> TestStatus {
        if self.completed_tests.iter().any(|t| t == test_id) {
            TestStatus::Completed
        } else if matches!(&self.current_stage, Stage::Running(current) if current == test_id) {
            TestStatus::Running
        } else {
            TestStatus::Pending
        }
    }

    /// Count-based status. This can disagree with `current_stage`: optional
    /// completions count here, and completing an optional test moves the
    /// stage to `completed` early.
    pub fn status(&self) -> DeviceStatus {
        if self.completed_tests.is_empty() {
            DeviceStatus::NotStarted
        } else if self.completed_tests.len() >= self.required_tests.len() {
            DeviceStatus::Completed
        } else {
            DeviceStatus::InProgress
        }
    }
}

impl From<DeviceRecord> for Device {
    fn from(r: DeviceRecord) -> Self {
        Device {
            serial_number: r.serial_number,
            device_type: r.device_type,
            current_stage: Stage::from(r.current_stage),
            completed_tests: r.completed_tests,
            required_tests: r.required_tests,
            manufacturing_order_number: r.manufacturing_order_number,
            created_at: r.created_at,
            updated_at: r.updated_at,
        }
    }
}

impl From<Device> for DeviceRecord {
    fn from(d: Device) -> Self {
        DeviceRecord {
            serial_number: d.serial_number,
            device_type: d.device_type,
            current_stage: d.current_stage.into(),
            completed_tests: d.completed_tests,
            required_tests: d.required_tests,
            manufacturing_order_number: d.manufacturing_order_number,
            created_at: d.created_at,
            updated_at: d.updated_at,
        }
    }
}
