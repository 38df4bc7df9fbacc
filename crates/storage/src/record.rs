use serde::{Deserialize, Deserializer, Serialize};

/// A row of the `devices` table: one physical unit under test.
///
/// `current_stage` is stored in its wire form: `"not_started"`,
/// `"completed"`, or a test id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceRecord {
    pub serial_number: String,
    pub device_type: String,
    pub current_stage: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub completed_tests: Vec<String>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub required_tests: Vec<String>,
    #[serde(default)]
    pub manufacturing_order_number: Option<String>,
    /// ISO 8601 / RFC 3339 timestamp string.
    pub created_at: String,
    /// ISO 8601 / RFC 3339 timestamp string.
    pub updated_at: String,
}

/// A row of the `device_test_sequences` table.
///
/// `test_sequence` is kept exactly as stored. Imported catalogs type
/// `is_required` and `sequence_order` inconsistently, so normalization is
/// left to the catalog layer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TestSequenceRecord {
    pub device_type: String,
    pub test_sequence: serde_json::Value,
}

/// A row of the `test_definitions` table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestDefinitionRecord {
    pub test_id: String,
    pub test_name: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub description: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub estimated_duration_minutes: i64,
}

/// One `manufacturing_order_devices` row: how many units of a device type
/// an order requires.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderDeviceRecord {
    pub device_type: String,
    pub quantity: i64,
    #[serde(default, deserialize_with = "null_as_default")]
    pub description: String,
}

/// A manufacturing order together with its device-type requirements.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManufacturingOrderRecord {
    pub manufacturing_order_number: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub product_name: String,
    #[serde(default = "default_priority")]
    pub priority: String,
    #[serde(default)]
    pub due_date: Option<String>,
    #[serde(default)]
    pub operator: Option<String>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub device_types: Vec<OrderDeviceRecord>,
}

fn default_priority() -> String {
    "medium".to_string()
}

/// Read an explicit `null` as the field's default.
fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn null_optional_columns_read_as_defaults() {
        let def: TestDefinitionRecord = serde_json::from_str(
            r#"{"test_id": "T1", "test_name": "Burn-in", "description": null, "estimated_duration_minutes": null}"#,
        )
        .unwrap();
        assert_eq!(def.description, "");
        assert_eq!(def.estimated_duration_minutes, 0);

        let order: ManufacturingOrderRecord = serde_json::from_str(
            r#"{"manufacturing_order_number": "MO-1", "product_name": null, "device_types": null}"#,
        )
        .unwrap();
        assert_eq!(order.product_name, "");
        assert_eq!(order.priority, "medium");
        assert!(order.device_types.is_empty());
    }

    #[test]
    fn missing_optional_columns_read_as_defaults() {
        let def: TestDefinitionRecord =
            serde_json::from_str(r#"{"test_id": "T1", "test_name": "Burn-in"}"#).unwrap();
        assert_eq!(def.description, "");
        assert_eq!(def.estimated_duration_minutes, 0);
    }
}
