use labseq_storage::StorageError;

/// Errors returned by sequencer operations.
#[derive(Debug, thiserror::Error)]
pub enum SequencerError {
    #[error("device {serial_number} not found")]
    DeviceNotFound { serial_number: String },

    #[error("device type {device_type} not found")]
    DeviceTypeNotFound { device_type: String },

    #[error("manufacturing order {manufacturing_order_number} not found")]
    OrderNotFound { manufacturing_order_number: String },

    #[error("device {serial_number} already exists")]
    DeviceExists { serial_number: String },

    /// Neither an explicit device type nor the serial number resolved one.
    #[error("cannot determine device type from serial number: {serial_number}")]
    UnresolvedDeviceType { serial_number: String },

    /// A request field is empty or uses a reserved value.
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// The stored test sequence for a device type could not be normalized.
    #[error("invalid test sequence for device type {device_type}: {reason}")]
    MalformedCatalog { device_type: String, reason: String },

    /// The backing store failed; reported to callers as a generic failure.
    #[error("storage failure: {0}")]
    Storage(String),
}

/// Coarse classification used by the HTTP and CLI layers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    NotFound,
    Conflict,
    InvalidInput,
    Storage,
}

impl SequencerError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            SequencerError::DeviceNotFound { .. }
            | SequencerError::DeviceTypeNotFound { .. }
            | SequencerError::OrderNotFound { .. } => ErrorKind::NotFound,
            SequencerError::DeviceExists { .. } => ErrorKind::Conflict,
            SequencerError::UnresolvedDeviceType { .. }
            | SequencerError::InvalidRequest(_)
            | SequencerError::MalformedCatalog { .. } => ErrorKind::InvalidInput,
            SequencerError::Storage(_) => ErrorKind::Storage,
        }
    }

    pub(crate) fn malformed(device_type: &str, reason: impl Into<String>) -> Self {
        SequencerError::MalformedCatalog {
            device_type: device_type.to_string(),
            reason: reason.into(),
        }
    }
}

impl From<StorageError> for SequencerError {
    fn from(e: StorageError) -> Self {
        match e {
            StorageError::DeviceNotFound { serial_number } => {
                SequencerError::DeviceNotFound { serial_number }
            }
            StorageError::DeviceAlreadyExists { serial_number } => {
                SequencerError::DeviceExists { serial_number }
            }
            StorageError::DeviceTypeNotFound { device_type } => {
                SequencerError::DeviceTypeNotFound { device_type }
            }
            StorageError::OrderNotFound {
                manufacturing_order_number,
            } => SequencerError::OrderNotFound {
                manufacturing_order_number,
            },
            StorageError::Backend(msg) => SequencerError::Storage(msg),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn storage_errors_map_onto_the_taxonomy() {
        let cases = [
            (
                StorageError::DeviceNotFound {
                    serial_number: "A-1".into(),
                },
                ErrorKind::NotFound,
            ),
            (
                StorageError::DeviceAlreadyExists {
                    serial_number: "A-1".into(),
                },
                ErrorKind::Conflict,
            ),
            (
                StorageError::DeviceTypeNotFound {
                    device_type: "A".into(),
                },
                ErrorKind::NotFound,
            ),
            (StorageError::Backend("down".into()), ErrorKind::Storage),
        ];
        for (storage, kind) in cases {
            assert_eq!(SequencerError::from(storage).kind(), kind);
        }
    }
}
