//! Device registry and test sequencer.
//!
//! Every mutating operation is one read-modify-write inside a single storage
//! snapshot. The device row is taken with `get_device_for_update`, so two
//! operators racing on the same serial number are serialized by the store;
//! operations on different devices never wait on each other. Any failure
//! aborts the snapshot, leaving the device as it was.
//!
//! `required_tests` always comes from the list captured at creation. Later
//! catalog edits affect new devices only.

use std::collections::BTreeMap;
use std::sync::Arc;

use labseq_storage::{DeviceRecord, ManufacturingOrderRecord, SequencerStorage};
use serde::{Deserialize, Serialize};
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;
use tracing::{debug, info, warn};

use crate::catalog::Catalog;
use crate::device::{Advance, Device, DeviceStatus, Stage, TestStatus};
use crate::error::SequencerError;
use crate::resolver::DeviceTypeResolver;

/// Registration request for a new device.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NewDevice {
    pub serial_number: String,
    /// Derived from the serial number when absent.
    #[serde(default)]
    pub device_type: Option<String>,
    #[serde(default)]
    pub manufacturing_order_number: Option<String>,
}

impl NewDevice {
    pub fn new(serial_number: &str, device_type: &str) -> Self {
        NewDevice {
            serial_number: serial_number.to_string(),
            device_type: Some(device_type.to_string()),
            manufacturing_order_number: None,
        }
    }
}

/// Result of `complete_test`.
#[derive(Debug, Clone, Serialize)]
pub struct Completion {
    pub test_id: String,
    pub next_test: Stage,
    pub advance: Advance,
    pub device: Device,
}

/// A device together with its count-based status.
#[derive(Debug, Clone, Serialize)]
pub struct DeviceView {
    #[serde(flatten)]
    pub device: Device,
    pub status: DeviceStatus,
}

impl From<Device> for DeviceView {
    fn from(device: Device) -> Self {
        let status = device.status();
        DeviceView { device, status }
    }
}

/// Progress of one device type within a manufacturing order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DeviceTypeProgress {
    pub required: i64,
    pub completed: usize,
    pub in_progress: usize,
    pub description: String,
}

/// A manufacturing order with per-device-type progress.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OrderProgress {
    pub manufacturing_order_number: String,
    pub product_name: String,
    pub priority: String,
    pub due_date: Option<String>,
    pub operator: Option<String>,
    pub device_types: BTreeMap<String, DeviceTypeProgress>,
}

impl OrderProgress {
    /// Tally `devices` (the devices attached to `order`) by device type.
    pub fn tally(order: ManufacturingOrderRecord, devices: &[Device]) -> Self {
        let mut device_types: BTreeMap<String, DeviceTypeProgress> = order
            .device_types
            .into_iter()
            .map(|dt| {
                let progress = DeviceTypeProgress {
                    required: dt.quantity,
                    description: dt.description,
                    ..Default::default()
                };
                (dt.device_type, progress)
            })
            .collect();

        for device in devices {
            let entry = device_types.entry(device.device_type.clone()).or_default();
            match device.status() {
                DeviceStatus::Completed => entry.completed += 1,
                DeviceStatus::InProgress => entry.in_progress += 1,
                DeviceStatus::NotStarted => {}
            }
        }

        OrderProgress {
            manufacturing_order_number: order.manufacturing_order_number.trim().to_string(),
            product_name: order.product_name,
            priority: order.priority,
            due_date: order.due_date,
            operator: order.operator,
            device_types,
        }
    }
}

/// The device test sequencer.
pub struct Sequencer<S> {
    storage: Arc<S>,
    catalog: Catalog<S>,
    resolver: DeviceTypeResolver,
}

impl<S: SequencerStorage> Sequencer<S> {
    pub fn new(storage: Arc<S>) -> Self {
        Sequencer {
            catalog: Catalog::new(storage.clone()),
            storage,
            resolver: DeviceTypeResolver::default(),
        }
    }

    pub fn with_resolver(mut self, resolver: DeviceTypeResolver) -> Self {
        self.resolver = resolver;
        self
    }

    pub fn catalog(&self) -> &Catalog<S> {
        &self.catalog
    }

    pub fn resolver(&self) -> &DeviceTypeResolver {
        &self.resolver
    }

    pub fn storage(&self) -> &S {
        &self.storage
    }

    /// Register a device and snapshot its required tests.
    ///
    /// Conflict if the serial number is taken (checked before the device
    /// type), InvalidInput if no device type is given and none can be
    /// resolved, NotFound if the device type has no catalog entry.
    pub async fn create(&self, new: NewDevice) -> Result<Device, SequencerError> {
        let serial_number = new.serial_number.trim();
        if serial_number.is_empty() {
            return Err(SequencerError::InvalidRequest(
                "serial_number must not be empty".to_string(),
            ));
        }

        match self.storage.get_device(serial_number).await {
            Ok(_) => {
                return Err(SequencerError::DeviceExists {
                    serial_number: serial_number.to_string(),
                })
            }
            Err(labseq_storage::StorageError::DeviceNotFound { .. }) => {}
            Err(e) => return Err(e.into()),
        }

        let device_type = match new
            .device_type
            .as_deref()
            .map(str::trim)
            .filter(|t| !t.is_empty())
        {
            Some(t) => t.to_string(),
            None => self.resolver.resolve(serial_number).ok_or_else(|| {
                SequencerError::UnresolvedDeviceType {
                    serial_number: serial_number.to_string(),
                }
            })?,
        };

        let entry = self.catalog.entry(&device_type).await?;
        let device = Device::new(
            serial_number,
            &device_type,
            entry.required_tests(),
            new.manufacturing_order_number
                .map(|mo| mo.trim().to_string())
                .filter(|mo| !mo.is_empty()),
            now_rfc3339(),
        );

        let mut snapshot = self.storage.begin_snapshot().await?;
        if let Err(e) = self
            .storage
            .insert_device(&mut snapshot, device.clone().into())
            .await
        {
            self.abort(snapshot).await;
            return Err(e.into());
        }
        self.storage.commit_snapshot(snapshot).await?;

        info!(
            serial_number,
            device_type = %device.device_type,
            required = device.required_tests.len(),
            "device created"
        );
        Ok(device)
    }

    /// Mark `test_id` as the test in progress. Any test id is accepted,
    /// including ones outside the device's required list.
    pub async fn start_test(
        &self,
        serial_number: &str,
        test_id: &str,
    ) -> Result<Device, SequencerError> {
        check_test_id(test_id)?;
        let (device, ()) = self
            .modify(serial_number, |device| device.start(test_id))
            .await?;
        info!(serial_number, test_id, "test started");
        Ok(device)
    }

    /// Record `test_id` as completed and move the stage forward.
    pub async fn complete_test(
        &self,
        serial_number: &str,
        test_id: &str,
    ) -> Result<Completion, SequencerError> {
        check_test_id(test_id)?;
        let (device, advance) = self
            .modify(serial_number, |device| device.complete(test_id))
            .await?;

        if advance == Advance::NotRequired {
            warn!(
                serial_number,
                test_id, "completed test is not required; stage moved to completed"
            );
        }
        info!(
            serial_number,
            test_id,
            next = %device.current_stage,
            "test completed"
        );
        Ok(Completion {
            test_id: test_id.to_string(),
            next_test: device.current_stage.clone(),
            advance,
            device,
        })
    }

    pub async fn status(
        &self,
        serial_number: &str,
        test_id: &str,
    ) -> Result<TestStatus, SequencerError> {
        Ok(self.get_device(serial_number).await?.test_status(test_id))
    }

    pub async fn device_status(&self, serial_number: &str) -> Result<DeviceStatus, SequencerError> {
        Ok(self.get_device(serial_number).await?.status())
    }

    pub async fn get_device(&self, serial_number: &str) -> Result<Device, SequencerError> {
        let record = self.storage.get_device(serial_number).await?;
        Ok(Device::from(record))
    }

    /// Devices ordered by serial number; `limit` 0 means all.
    pub async fn list_devices(&self, limit: usize) -> Result<Vec<Device>, SequencerError> {
        Ok(self
            .storage
            .list_devices(limit)
            .await?
            .into_iter()
            .map(Device::from)
            .collect())
    }

    pub async fn manufacturing_order(
        &self,
        manufacturing_order_number: &str,
    ) -> Result<OrderProgress, SequencerError> {
        let order = self
            .storage
            .get_manufacturing_order(manufacturing_order_number)
            .await?;
        self.order_progress(order).await
    }

    pub async fn list_manufacturing_orders(&self) -> Result<Vec<OrderProgress>, SequencerError> {
        let orders = self.storage.list_manufacturing_orders().await?;
        let mut progress = Vec::with_capacity(orders.len());
        for order in orders {
            progress.push(self.order_progress(order).await?);
        }
        Ok(progress)
    }

    async fn order_progress(
        &self,
        order: ManufacturingOrderRecord,
    ) -> Result<OrderProgress, SequencerError> {
        let devices: Vec<Device> = self
            .storage
            .list_devices_for_order(&order.manufacturing_order_number)
            .await?
            .into_iter()
            .map(Device::from)
            .collect();
        Ok(OrderProgress::tally(order, &devices))
    }

    /// Roll back after a failed step. The step's error is what the caller
    /// sees, so a failed rollback is only logged.
    async fn abort(&self, snapshot: S::Snapshot) {
        if let Err(e) = self.storage.abort_snapshot(snapshot).await {
            warn!(error = %e, "abort failed");
        }
    }

    /// Lock the device row, apply `f`, write it back and commit.
    async fn modify<R, F>(
        &self,
        serial_number: &str,
        f: F,
    ) -> Result<(Device, R), SequencerError>
    where
        F: FnOnce(&mut Device) -> R + Send,
        R: Send,
    {
        let mut snapshot = self.storage.begin_snapshot().await?;

        let record = match self
            .storage
            .get_device_for_update(&mut snapshot, serial_number)
            .await
        {
            Ok(r) => r,
            Err(e) => {
                self.abort(snapshot).await;
                return Err(e.into());
            }
        };

        let mut device = Device::from(record);
        let before = device.current_stage.clone();
        let out = f(&mut device);
        device.updated_at = now_rfc3339();

        let record: DeviceRecord = device.clone().into();
        if let Err(e) = self.storage.update_device(&mut snapshot, record).await {
            self.abort(snapshot).await;
            return Err(e.into());
        }
        self.storage.commit_snapshot(snapshot).await?;

        debug!(
            serial_number,
            from = %before,
            to = %device.current_stage,
            completed = device.completed_tests.len(),
            "device updated"
        );
        Ok((device, out))
    }
}

fn check_test_id(test_id: &str) -> Result<(), SequencerError> {
    if test_id.trim().is_empty() {
        return Err(SequencerError::InvalidRequest(
            "test_id must not be empty".to_string(),
        ));
    }
    if Stage::is_reserved(test_id) {
        return Err(SequencerError::InvalidRequest(format!(
            "'{test_id}' is reserved and cannot be used as a test_id"
        )));
    }
    Ok(())
}

fn now_rfc3339() -> String {
    let now = OffsetDateTime::now_utc();
    now.format(&Rfc3339)
        .unwrap_or_else(|_| now.unix_timestamp().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use labseq_storage::OrderDeviceRecord;

    fn device_with(completed: &[&str]) -> Device {
        let mut d = Device::new(
            "LNA6213-001",
            "LNA6213",
            vec!["T1".into(), "T2".into()],
            Some("MO-1".into()),
            "2026-01-01T00:00:00Z".into(),
        );
        for t in completed {
            d.complete(t);
        }
        d
    }

    #[test]
    fn tally_counts_by_device_status() {
        let order = ManufacturingOrderRecord {
            manufacturing_order_number: " MO-1 ".into(),
            product_name: "Modulators".into(),
            priority: "high".into(),
            due_date: None,
            operator: None,
            device_types: vec![OrderDeviceRecord {
                device_type: "LNA6213".into(),
                quantity: 5,
                description: "10 GHz".into(),
            }],
        };
        let devices = [
            device_with(&[]),
            device_with(&["T1"]),
            device_with(&["T1", "T2"]),
        ];
        let progress = OrderProgress::tally(order, &devices);
        assert_eq!(progress.manufacturing_order_number, "MO-1");
        let p = &progress.device_types["LNA6213"];
        assert_eq!(p.required, 5);
        assert_eq!(p.completed, 1);
        assert_eq!(p.in_progress, 1);
        assert_eq!(p.description, "10 GHz");
    }

    #[test]
    fn reserved_test_ids_are_rejected() {
        assert!(check_test_id("T1").is_ok());
        assert!(check_test_id("").is_err());
        assert!(check_test_id("completed").is_err());
        assert!(check_test_id("not_started").is_err());
    }

    #[test]
    fn device_view_serializes_flat() {
        let view = DeviceView::from(device_with(&["T1"]));
        let json = serde_json::to_value(&view).unwrap();
        assert_eq!(json["serial_number"], "LNA6213-001");
        assert_eq!(json["current_stage"], "T2");
        assert_eq!(json["status"], "in_progress");
        assert_eq!(json["completed_tests"], serde_json::json!(["T1"]));
    }
}
