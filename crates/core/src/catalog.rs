//! Test catalog lookup and normalization.
//!
//! Stored test sequences are raw JSON whose fields were imported with
//! inconsistent types: `is_required` may be a boolean or a `"true"`/`"false"`
//! string, `sequence_order` an integer or a numeric string. [`TestCatalogEntry::parse`]
//! is the only place that sees the raw form; everything past it works on
//! [`TestStep`].

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use labseq_storage::{SequencerStorage, TestDefinitionRecord};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use crate::error::SequencerError;

/// One normalized step of a device type's test sequence.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestStep {
    pub test_id: String,
    pub sequence_order: i64,
    pub is_required: bool,
    pub test_number: Option<String>,
}

/// A device type's full test sequence, sorted by `sequence_order`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestCatalogEntry {
    pub device_type: String,
    pub sequence: Vec<TestStep>,
}

impl TestCatalogEntry {
    /// Normalize a stored `test_sequence` value.
    ///
    /// Fails with `MalformedCatalog` if the value is not a list, a step has no
    /// `test_id`, a `sequence_order` is not an integer, or two steps share a
    /// `sequence_order`.
    pub fn parse(device_type: &str, raw: &Value) -> Result<Self, SequencerError> {
        let items = raw
            .as_array()
            .ok_or_else(|| SequencerError::malformed(device_type, "test sequence is not a list"))?;

        let mut sequence = Vec::with_capacity(items.len());
        let mut seen_orders = BTreeSet::new();
        for (index, item) in items.iter().enumerate() {
            let step = parse_step(device_type, index, item)?;
            if !seen_orders.insert(step.sequence_order) {
                return Err(SequencerError::malformed(
                    device_type,
                    format!("duplicate sequence_order {}", step.sequence_order),
                ));
            }
            sequence.push(step);
        }
        sequence.sort_by_key(|s| s.sequence_order);

        Ok(TestCatalogEntry {
            device_type: device_type.to_string(),
            sequence,
        })
    }

    /// Test ids of the required steps, in sequence order.
    pub fn required_tests(&self) -> Vec<String> {
        self.sequence
            .iter()
            .filter(|s| s.is_required)
            .map(|s| s.test_id.clone())
            .collect()
    }

    /// All test ids, in sequence order.
    pub fn test_ids(&self) -> Vec<String> {
        self.sequence.iter().map(|s| s.test_id.clone()).collect()
    }
}

fn parse_step(device_type: &str, index: usize, item: &Value) -> Result<TestStep, SequencerError> {
    let obj = item
        .as_object()
        .ok_or_else(|| SequencerError::malformed(device_type, format!("step {index} is not an object")))?;

    let test_id = obj
        .get("test_id")
        .and_then(Value::as_str)
        .filter(|id| !id.is_empty())
        .ok_or_else(|| SequencerError::malformed(device_type, format!("step {index} has no test_id")))?
        .to_string();

    let sequence_order = match obj.get("sequence_order") {
        None | Some(Value::Null) => 0,
        Some(v) => parse_order(v).ok_or_else(|| {
            SequencerError::malformed(
                device_type,
                format!("step {test_id} has non-integer sequence_order {v}"),
            )
        })?,
    };

    let test_number = match obj.get("test_number") {
        Some(Value::String(s)) => Some(s.clone()),
        Some(Value::Number(n)) => Some(n.to_string()),
        _ => None,
    };

    Ok(TestStep {
        test_id,
        sequence_order,
        is_required: is_truthy(obj.get("is_required")),
        test_number,
    })
}

fn parse_order(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n
            .as_i64()
            .or_else(|| n.as_f64().filter(|f| f.fract() == 0.0).map(|f| f as i64)),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

/// `true` or a case-insensitive `"true"` string; anything else is false.
pub fn is_truthy(value: Option<&Value>) -> bool {
    match value {
        Some(Value::Bool(b)) => *b,
        Some(Value::String(s)) => s.trim().eq_ignore_ascii_case("true"),
        _ => false,
    }
}

/// A sequence step merged with its test definition, for display.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnrichedTest {
    pub test_id: String,
    pub test_name: String,
    pub description: String,
    pub sequence_order: i64,
    pub is_required: bool,
    pub test_number: Option<String>,
    pub estimated_duration_minutes: i64,
}

/// Merge definitions into `sequence`. Steps without a definition keep their
/// `test_id` as display name and a zero duration.
pub fn enrich(sequence: &[TestStep], definitions: &[TestDefinitionRecord]) -> Vec<EnrichedTest> {
    let by_id: BTreeMap<&str, &TestDefinitionRecord> = definitions
        .iter()
        .map(|d| (d.test_id.as_str(), d))
        .collect();

    sequence
        .iter()
        .map(|step| {
            let def = by_id.get(step.test_id.as_str());
            EnrichedTest {
                test_id: step.test_id.clone(),
                test_name: def
                    .map(|d| d.test_name.clone())
                    .unwrap_or_else(|| step.test_id.clone()),
                description: def.map(|d| d.description.clone()).unwrap_or_default(),
                sequence_order: step.sequence_order,
                is_required: step.is_required,
                test_number: step.test_number.clone(),
                estimated_duration_minutes: def
                    .map(|d| d.estimated_duration_minutes.max(0))
                    .unwrap_or(0),
            }
        })
        .collect()
}

/// Totals shown to operators before they start a device.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PreviewSummary {
    pub total_tests: usize,
    pub required_tests: usize,
    pub optional_tests: usize,
    pub total_required_time_minutes: i64,
    pub total_optional_time_minutes: i64,
    pub estimated_total_hours: f64,
}

/// Enriched sequence of a device type plus its summary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SequencePreview {
    pub device_type: String,
    pub tests: Vec<EnrichedTest>,
    pub summary: PreviewSummary,
}

impl SequencePreview {
    pub fn new(device_type: &str, tests: Vec<EnrichedTest>) -> Self {
        let (required, optional): (Vec<&EnrichedTest>, Vec<&EnrichedTest>) =
            tests.iter().partition(|t| t.is_required);
        let required_minutes: i64 = required.iter().map(|t| t.estimated_duration_minutes).sum();
        let optional_minutes: i64 = optional.iter().map(|t| t.estimated_duration_minutes).sum();
        let hours = (required_minutes + optional_minutes) as f64 / 60.0;

        let summary = PreviewSummary {
            total_tests: tests.len(),
            required_tests: required.len(),
            optional_tests: optional.len(),
            total_required_time_minutes: required_minutes,
            total_optional_time_minutes: optional_minutes,
            estimated_total_hours: (hours * 10.0).round() / 10.0,
        };
        SequencePreview {
            device_type: device_type.to_string(),
            tests,
            summary,
        }
    }
}

/// Read-only view of the test catalog and test definitions.
pub struct Catalog<S> {
    storage: Arc<S>,
}

impl<S> Clone for Catalog<S> {
    fn clone(&self) -> Self {
        Catalog {
            storage: self.storage.clone(),
        }
    }
}

impl<S: SequencerStorage> Catalog<S> {
    pub fn new(storage: Arc<S>) -> Self {
        Catalog { storage }
    }

    /// The normalized catalog entry for `device_type` (exact match).
    pub async fn entry(&self, device_type: &str) -> Result<TestCatalogEntry, SequencerError> {
        let record = self.storage.get_test_sequence(device_type).await?;
        let entry = TestCatalogEntry::parse(device_type, &record.test_sequence)?;
        debug!(device_type, steps = entry.sequence.len(), "loaded test sequence");
        Ok(entry)
    }

    /// Steps sorted ascending by `sequence_order`.
    pub async fn get_sequence(&self, device_type: &str) -> Result<Vec<TestStep>, SequencerError> {
        Ok(self.entry(device_type).await?.sequence)
    }

    /// Required test ids in sequence order.
    pub async fn get_required(&self, device_type: &str) -> Result<Vec<String>, SequencerError> {
        Ok(self.entry(device_type).await?.required_tests())
    }

    /// Merge test definitions into `sequence`.
    pub async fn enrich(&self, sequence: &[TestStep]) -> Result<Vec<EnrichedTest>, SequencerError> {
        let ids: Vec<String> = sequence.iter().map(|s| s.test_id.clone()).collect();
        let definitions = self.storage.get_test_definitions(&ids).await?;
        Ok(enrich(sequence, &definitions))
    }

    pub async fn preview(&self, device_type: &str) -> Result<SequencePreview, SequencerError> {
        let sequence = self.get_sequence(device_type).await?;
        let tests = self.enrich(&sequence).await?;
        Ok(SequencePreview::new(device_type, tests))
    }

    pub async fn list_device_types(&self) -> Result<Vec<String>, SequencerError> {
        Ok(self.storage.list_device_types().await?)
    }

    /// Every test definition keyed by `test_id`.
    pub async fn test_definitions(
        &self,
    ) -> Result<BTreeMap<String, TestDefinitionRecord>, SequencerError> {
        Ok(self
            .storage
            .list_test_definitions()
            .await?
            .into_iter()
            .map(|d| (d.test_id.clone(), d))
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn definition(id: &str, name: &str, minutes: i64) -> TestDefinitionRecord {
        TestDefinitionRecord {
            test_id: id.to_string(),
            test_name: name.to_string(),
            description: format!("{name} description"),
            estimated_duration_minutes: minutes,
        }
    }

    #[test]
    fn parse_sorts_by_sequence_order() {
        let raw = json!([
            {"test_id": "T3", "sequence_order": 3, "is_required": true},
            {"test_id": "T1", "sequence_order": "1", "is_required": "true"},
            {"test_id": "T2", "sequence_order": 2.0, "is_required": "TRUE", "test_number": 7}
        ]);
        let entry = TestCatalogEntry::parse("LNA6213", &raw).unwrap();
        assert_eq!(entry.test_ids(), vec!["T1", "T2", "T3"]);
        assert_eq!(entry.sequence[1].test_number.as_deref(), Some("7"));
        assert_eq!(entry, TestCatalogEntry::parse("LNA6213", &raw).unwrap());
    }

    #[test]
    fn is_required_normalizes_bool_and_string_forms() {
        assert!(is_truthy(Some(&json!(true))));
        assert!(is_truthy(Some(&json!("true"))));
        assert!(is_truthy(Some(&json!("True"))));
        assert!(!is_truthy(Some(&json!(false))));
        assert!(!is_truthy(Some(&json!("false"))));
        assert!(!is_truthy(Some(&json!("yes"))));
        assert!(!is_truthy(Some(&json!(1))));
        assert!(!is_truthy(None));
    }

    #[test]
    fn required_tests_keep_sequence_order() {
        let raw = json!([
            {"test_id": "T_opt", "sequence_order": 4, "is_required": false},
            {"test_id": "T2", "sequence_order": 2, "is_required": "true"},
            {"test_id": "T1", "sequence_order": 1, "is_required": true},
            {"test_id": "T3", "sequence_order": 3, "is_required": "True"}
        ]);
        let entry = TestCatalogEntry::parse("LNA6213", &raw).unwrap();
        assert_eq!(entry.required_tests(), vec!["T1", "T2", "T3"]);
        assert_eq!(entry.sequence.len(), 4);
    }

    #[test]
    fn malformed_sequences_are_rejected() {
        let cases = [
            json!({"test_id": "T1"}),
            json!([{"sequence_order": 1}]),
            json!([{"test_id": "T1", "sequence_order": "first"}]),
            json!([
                {"test_id": "T1", "sequence_order": 1},
                {"test_id": "T2", "sequence_order": 1}
            ]),
            json!(["T1"]),
        ];
        for raw in cases {
            let err = TestCatalogEntry::parse("LNA6213", &raw).unwrap_err();
            assert!(
                matches!(err, SequencerError::MalformedCatalog { .. }),
                "{raw} -> {err:?}"
            );
        }
    }

    #[test]
    fn missing_sequence_order_defaults_to_zero() {
        let raw = json!([
            {"test_id": "T2", "sequence_order": 1},
            {"test_id": "T1"}
        ]);
        let entry = TestCatalogEntry::parse("X", &raw).unwrap();
        assert_eq!(entry.test_ids(), vec!["T1", "T2"]);
        assert!(entry.required_tests().is_empty());
    }

    #[test]
    fn enrich_falls_back_to_test_id() {
        let sequence = vec![
            TestStep {
                test_id: "T1".into(),
                sequence_order: 1,
                is_required: true,
                test_number: None,
            },
            TestStep {
                test_id: "T9".into(),
                sequence_order: 2,
                is_required: false,
                test_number: None,
            },
        ];
        let tests = enrich(&sequence, &[definition("T1", "Wirebond", 30)]);
        assert_eq!(tests[0].test_name, "Wirebond");
        assert_eq!(tests[0].estimated_duration_minutes, 30);
        assert_eq!(tests[1].test_name, "T9");
        assert_eq!(tests[1].description, "");
        assert_eq!(tests[1].estimated_duration_minutes, 0);
    }

    #[test]
    fn preview_summary_totals() {
        let sequence = vec![
            TestStep {
                test_id: "T1".into(),
                sequence_order: 1,
                is_required: true,
                test_number: None,
            },
            TestStep {
                test_id: "T2".into(),
                sequence_order: 2,
                is_required: true,
                test_number: None,
            },
            TestStep {
                test_id: "T_opt".into(),
                sequence_order: 3,
                is_required: false,
                test_number: None,
            },
        ];
        let defs = [
            definition("T1", "Chip inspection", 45),
            definition("T2", "S21", 60),
            definition("T_opt", "Two-tone", 20),
        ];
        let preview = SequencePreview::new("LNA6213", enrich(&sequence, &defs));
        let s = &preview.summary;
        assert_eq!(s.total_tests, 3);
        assert_eq!(s.required_tests, 2);
        assert_eq!(s.optional_tests, 1);
        assert_eq!(s.total_required_time_minutes, 105);
        assert_eq!(s.total_optional_time_minutes, 20);
        assert_eq!(s.estimated_total_hours, 2.1);
    }
}
