//! Metrics for blobfs.
//!
//! Defines metric name constants and records through the `metrics` facade.
//! The library installs no recorder; without one every call is a no-op, so
//! an embedding application decides where the numbers go.

use metrics::{counter, describe_counter};

// -- Metric name constants ----------------------------------------------------

/// Total filesystem operations (counter). Labels: operation, outcome.
pub const FS_OPERATIONS_TOTAL: &str = "blobfs_operations_total";

/// Total Azure REST requests (counter). Labels: method, status.
pub const AZURE_REQUESTS_TOTAL: &str = "blobfs_azure_requests_total";

/// Total listing pages fetched (counter).
pub const LISTING_PAGES_TOTAL: &str = "blobfs_listing_pages_total";

/// Total copy status checks (counter).
pub const COPY_POLLS_TOTAL: &str = "blobfs_copy_polls_total";

/// Total bytes written in request bodies (counter).
pub const BYTES_WRITTEN_TOTAL: &str = "blobfs_bytes_written_total";

/// Total bytes read from response bodies (counter).
pub const BYTES_READ_TOTAL: &str = "blobfs_bytes_read_total";

/// Register metric descriptions with whatever recorder is installed.
pub fn describe_metrics() {
    describe_counter!(FS_OPERATIONS_TOTAL, "Total filesystem operations");
    describe_counter!(AZURE_REQUESTS_TOTAL, "Total Azure Blob REST requests");
    describe_counter!(LISTING_PAGES_TOTAL, "Total listing pages fetched");
    describe_counter!(COPY_POLLS_TOTAL, "Total copy status checks");
    describe_counter!(BYTES_WRITTEN_TOTAL, "Total bytes written (request bodies)");
    describe_counter!(BYTES_READ_TOTAL, "Total bytes read (response bodies)");
}

/// Record the outcome of a filesystem operation.
pub fn record_operation<T, E>(operation: &'static str, result: &Result<T, E>) {
    let outcome = if result.is_ok() { "ok" } else { "error" };
    counter!(FS_OPERATIONS_TOTAL, "operation" => operation, "outcome" => outcome).increment(1);
}

/// Record a completed Azure request.
pub fn record_request(method: &http::Method, status: u16) {
    counter!(
        AZURE_REQUESTS_TOTAL,
        "method" => method.as_str().to_string(),
        "status" => status.to_string()
    )
    .increment(1);
}

/// Record one fetched listing page.
pub fn record_listing_page() {
    counter!(LISTING_PAGES_TOTAL).increment(1);
}

/// Record one copy status check.
pub fn record_copy_poll() {
    counter!(COPY_POLLS_TOTAL).increment(1);
}

pub fn record_bytes_written(bytes: usize) {
    counter!(BYTES_WRITTEN_TOTAL).increment(bytes as u64);
}

pub fn record_bytes_read(bytes: usize) {
    counter!(BYTES_READ_TOTAL).increment(bytes as u64);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recording_without_recorder_is_noop() {
        describe_metrics();
        record_operation::<(), ()>("write", &Ok(()));
        record_operation::<(), ()>("write", &Err(()));
        record_request(&http::Method::PUT, 201);
        record_listing_page();
        record_copy_poll();
        record_bytes_written(5);
        record_bytes_read(5);
    }
}
