//! Ascending identifiers for parts and tool calls.
//!
//! Ids are `<prefix>_<millis:012x><counter:08x>`, so sorting ids sorts by creation order
//! within a process.

use std::sync::atomic::{AtomicU64, Ordering};

static COUNTER: AtomicU64 = AtomicU64::new(0);

pub fn ascending(prefix: &str) -> String {
    let millis = chrono::Utc::now().timestamp_millis().max(0) as u64;
    let seq = COUNTER.fetch_add(1, Ordering::Relaxed) & 0xffff_ffff;
    format!("{prefix}_{millis:012x}{seq:08x}")
}

/// Random id for pending registry entries.
pub fn pending() -> String {
    uuid::Uuid::new_v4().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ascending_ids_sort_in_creation_order() {
        let ids: Vec<String> = (0..50).map(|_| ascending("prt")).collect();
        let mut sorted = ids.clone();
        sorted.sort();
        assert_eq!(ids, sorted);
        assert!(ids[0].starts_with("prt_"));
    }
}
