/// All errors that can be returned by a SequencerStorage implementation.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    /// No device row with the given serial number.
    #[error("device not found: {serial_number}")]
    DeviceNotFound { serial_number: String },

    /// A device row with this serial number already exists.
    #[error("device already exists: {serial_number}")]
    DeviceAlreadyExists { serial_number: String },

    /// No test sequence is stored for the device type.
    #[error("device type not found: {device_type}")]
    DeviceTypeNotFound { device_type: String },

    /// No manufacturing order with the given number.
    #[error("manufacturing order not found: {manufacturing_order_number}")]
    OrderNotFound { manufacturing_order_number: String },

    /// A backend-specific storage error (DB connection, serialization, etc.).
    #[error("storage backend error: {0}")]
    Backend(String),
}
