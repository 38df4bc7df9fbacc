//! Application state shared across request handlers.

use labseq_core::Sequencer;
use labseq_storage::MemoryStorage;

pub(crate) struct AppState {
    pub(crate) sequencer: Sequencer<MemoryStorage>,
}

impl AppState {
    pub(crate) fn new(sequencer: Sequencer<MemoryStorage>) -> Self {
        AppState { sequencer }
    }
}
