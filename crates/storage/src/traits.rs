use async_trait::async_trait;

use crate::error::StorageError;
use crate::record::{
    DeviceRecord, ManufacturingOrderRecord, TestDefinitionRecord, TestSequenceRecord,
};

/// The storage trait for labseq backends.
///
/// A `SequencerStorage` implementation provides transactional storage for
/// device progress rows and read access to the reference tables (test
/// catalog, test definitions, manufacturing orders).
///
/// ## Snapshot Semantics
///
/// All mutating operations take `&mut Self::Snapshot`, a type representing an
/// in-progress transaction. The lifecycle is:
///
/// 1. `begin_snapshot()` -- start a transaction, returns a `Snapshot`
/// 2. Call mutating methods with `&mut snapshot`
/// 3. `commit_snapshot(snapshot)` -- commit and consume the transaction
///    OR `abort_snapshot(snapshot)` -- roll back and consume the transaction
///
/// If a `Snapshot` is dropped without committing, the underlying transaction
/// MUST be rolled back and every row lock it holds released.
///
/// ## Row Locking
///
/// `get_device_for_update` and `insert_device` lock the device row keyed on
/// `serial_number` (`SELECT ... FOR UPDATE` semantics) until the snapshot
/// ends. At most one snapshot mutates a given device at a time; snapshots on
/// different devices never block each other.
///
/// ## Thread Safety
///
/// Implementations must be `Send + Sync + 'static` to be used in axum
/// application state and across async task boundaries.
#[async_trait]
pub trait SequencerStorage: Send + Sync + 'static {
    /// The snapshot (transaction) type used by this storage backend.
    ///
    /// Must be `Send` to allow passing across async task boundaries.
    type Snapshot: Send;

    // ── Snapshot lifecycle ────────────────────────────────────────────────────

    /// Begin a new snapshot (transaction).
    async fn begin_snapshot(&self) -> Result<Self::Snapshot, StorageError>;

    /// Commit a snapshot, making all mutations durable.
    async fn commit_snapshot(&self, snapshot: Self::Snapshot) -> Result<(), StorageError>;

    /// Abort (roll back) a snapshot, discarding all mutations.
    async fn abort_snapshot(&self, snapshot: Self::Snapshot) -> Result<(), StorageError>;

    // ── Device operations (within snapshot) ──────────────────────────────────

    /// Insert a new device row, locking it for the rest of the snapshot.
    ///
    /// Returns `Err(StorageError::DeviceAlreadyExists)` if a row with the same
    /// serial number is committed or already staged in this snapshot.
    async fn insert_device(
        &self,
        snapshot: &mut Self::Snapshot,
        record: DeviceRecord,
    ) -> Result<(), StorageError>;

    /// Read a device row, locking it for update.
    ///
    /// Waits while another snapshot holds the lock. Returns
    /// `Err(StorageError::DeviceNotFound)` if the device does not exist.
    async fn get_device_for_update(
        &self,
        snapshot: &mut Self::Snapshot,
        serial_number: &str,
    ) -> Result<DeviceRecord, StorageError>;

    /// Overwrite a device row previously read with `get_device_for_update`.
    ///
    /// Returns `Err(StorageError::DeviceNotFound)` if the device does not exist.
    async fn update_device(
        &self,
        snapshot: &mut Self::Snapshot,
        record: DeviceRecord,
    ) -> Result<(), StorageError>;

    // ── Query operations (outside snapshot) ──────────────────────────────────

    /// Read a committed device row without locking.
    async fn get_device(&self, serial_number: &str) -> Result<DeviceRecord, StorageError>;

    /// List committed devices ordered by serial number.
    ///
    /// `limit`: maximum number of results (0 = no limit).
    async fn list_devices(&self, limit: usize) -> Result<Vec<DeviceRecord>, StorageError>;

    /// List committed devices attached to a manufacturing order.
    async fn list_devices_for_order(
        &self,
        manufacturing_order_number: &str,
    ) -> Result<Vec<DeviceRecord>, StorageError>;

    /// Read the raw stored test sequence for a device type (exact match).
    ///
    /// Returns `Err(StorageError::DeviceTypeNotFound)` if absent.
    async fn get_test_sequence(
        &self,
        device_type: &str,
    ) -> Result<TestSequenceRecord, StorageError>;

    /// List every device type that has a stored test sequence, sorted.
    async fn list_device_types(&self) -> Result<Vec<String>, StorageError>;

    /// Read the definitions for the given test ids. Unknown ids are skipped.
    async fn get_test_definitions(
        &self,
        test_ids: &[String],
    ) -> Result<Vec<TestDefinitionRecord>, StorageError>;

    /// List all test definitions ordered by test id.
    async fn list_test_definitions(&self) -> Result<Vec<TestDefinitionRecord>, StorageError>;

    /// Read a manufacturing order by number, ignoring surrounding whitespace.
    ///
    /// Returns `Err(StorageError::OrderNotFound)` if absent.
    async fn get_manufacturing_order(
        &self,
        manufacturing_order_number: &str,
    ) -> Result<ManufacturingOrderRecord, StorageError>;

    /// List all manufacturing orders ordered by due date, then number.
    async fn list_manufacturing_orders(
        &self,
    ) -> Result<Vec<ManufacturingOrderRecord>, StorageError>;
}
