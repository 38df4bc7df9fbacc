//! Runs the backend conformance suite against the in-memory store.

use labseq_storage::conformance::run_conformance_suite;
use labseq_storage::MemoryStorage;

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn memory_storage_passes_conformance_suite() {
    let report = run_conformance_suite(|| async { MemoryStorage::new() }).await;
    assert!(report.total > 0);
    assert!(report.failed == 0, "{report}");
}
