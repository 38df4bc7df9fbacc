pub mod conformance;
mod error;
mod memory;
mod record;
mod traits;

pub use error::StorageError;
pub use memory::{LabData, MemorySnapshot, MemoryStorage};
pub use record::{
    DeviceRecord, ManufacturingOrderRecord, OrderDeviceRecord, TestDefinitionRecord,
    TestSequenceRecord,
};
pub use traits::SequencerStorage;
