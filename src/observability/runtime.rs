//! Process-level runtime figures for the metrics endpoint.

use serde::Serialize;
use sysinfo::System;

/// Resident and virtual memory of this process, in bytes
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct MemoryUsage {
    pub rss: u64,
    pub r#virtual: u64,
}

/// Read current process memory. Zeroes when the platform does not expose it.
pub fn memory_usage() -> MemoryUsage {
    let Ok(pid) = sysinfo::get_current_pid() else {
        return MemoryUsage::default();
    };

    let mut sys = System::new();
    if !sys.refresh_process(pid) {
        return MemoryUsage::default();
    }

    sys.process(pid)
        .map(|p| MemoryUsage {
            rss: p.memory(),
            r#virtual: p.virtual_memory(),
        })
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_serializes_virtual_key() {
        let json = serde_json::to_value(MemoryUsage { rss: 1, r#virtual: 2 }).unwrap();
        assert_eq!(json["rss"], 1);
        assert_eq!(json["virtual"], 2);
    }
}
