//! Cache housekeeping.

use fairway_client::FairwayClient;

/// Remove every entry in the cache namespace.
pub fn clear(client: &FairwayClient) {
    client.cache().clear();
    tracing::info!(namespace = %client.cache().policy().namespace, "Cache cleared");
}

/// Run one maintenance sweep and print the report.
#[allow(clippy::print_stdout)]
pub fn maintain(client: &FairwayClient) {
    let report = client.cache().run_maintenance();
    println!("expired removed:  {}", report.expired_removed);
    println!("overflow removed: {}", report.overflow_removed);
    println!("remaining:        {}", report.remaining);
}
