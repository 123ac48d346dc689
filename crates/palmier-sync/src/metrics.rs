//! Counter names and one-time descriptions. No exporter is installed here;
//! without a recorder the macros are no-ops.

use metrics::describe_counter;
use once_cell::sync::OnceCell;

pub const FUZZY_FAIL_OPEN: &str = "dedup_fuzzy_fail_open_total";
pub const RECORDS_SKIPPED: &str = "sync_records_skipped_total";
pub const RECORDS_NEW: &str = "sync_records_new_total";
pub const ADAPTER_ERRORS: &str = "sync_adapter_errors_total";
pub const DEALS_DETECTED: &str = "flight_deals_detected_total";

pub fn ensure_metrics_described() {
    static ONCE: OnceCell<()> = OnceCell::new();
    ONCE.get_or_init(|| {
        describe_counter!(
            FUZZY_FAIL_OPEN,
            "Same-day title lookups that failed and let the record through."
        );
        describe_counter!(RECORDS_SKIPPED, "Raw records not ingested, by reason.");
        describe_counter!(RECORDS_NEW, "Records persisted by the pipeline.");
        describe_counter!(ADAPTER_ERRORS, "Adapter crawls that failed or timed out.");
        describe_counter!(DEALS_DETECTED, "Flight quotes flagged as deals.");
    });
}
