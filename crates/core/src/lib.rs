//! labseq-core: device test sequencing for the lab floor.
//!
//! A device is registered under a device type, gets that type's required
//! tests snapshotted at creation, and then moves through them one completion
//! at a time. Storage is abstracted behind
//! [`labseq_storage::SequencerStorage`].
//!
//! # Public API
//!
//! - [`Sequencer`] -- device registry and test progression
//! - [`Catalog`] -- normalized test sequences and definitions
//! - [`DeviceTypeResolver`] -- serial number → device type
//! - [`SequencerError`] / [`ErrorKind`] -- error taxonomy

pub mod catalog;
pub mod device;
pub mod error;
pub mod resolver;
pub mod sequencer;

pub use catalog::{
    enrich, is_truthy, Catalog, EnrichedTest, PreviewSummary, SequencePreview, TestCatalogEntry,
    TestStep,
};
pub use device::{next_stage, Advance, Device, DeviceStatus, Stage, TestStatus};
pub use error::{ErrorKind, SequencerError};
pub use resolver::{DeviceTypeResolver, DEFAULT_SEPARATOR, KNOWN_DEVICE_TYPES};
pub use sequencer::{
    Completion, DeviceTypeProgress, DeviceView, NewDevice, OrderProgress, Sequencer,
};
