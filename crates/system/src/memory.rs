use sysinfo::{
    get_current_pid, MemoryRefreshKind, Pid, ProcessRefreshKind, ProcessesToUpdate, RefreshKind, System,
};
use telemetry_core::state::{MemorySnapshot, MemoryUsage};
use tracing::warn;

/// Source of heap/non-heap memory figures. Reads are on demand; there is no
/// poller thread behind this.
pub trait MemoryProbe: Send {
    fn sample(&mut self) -> MemorySnapshot;
}

/// Memory of the current process, read through `sysinfo`.
///
/// The resident set stands in for the heap (`used`), with the virtual size
/// as `committed` and physical RAM as the ceiling. Swap fills the non-heap
/// slot.
pub struct ProcessMemory {
    sys: System,
    pid: Option<Pid>,
}

impl ProcessMemory {
    pub fn new() -> Self {
        let pid = match get_current_pid() {
            Ok(pid) => Some(pid),
            Err(e) => {
                warn!("Unable to determine own pid ({e}); reporting system memory only");
                None
            }
        };
        let sys = System::new_with_specifics(
            RefreshKind::nothing().with_memory(MemoryRefreshKind::everything()),
        );
        Self { sys, pid }
    }
}

impl Default for ProcessMemory {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryProbe for ProcessMemory {
    fn sample(&mut self) -> MemorySnapshot {
        self.sys.refresh_memory();

        let (resident, virt) = match self.pid {
            Some(pid) => {
                self.sys.refresh_processes_specifics(
                    ProcessesToUpdate::Some(&[pid]),
                    true,
                    ProcessRefreshKind::nothing().with_memory(),
                );
                self.sys
                    .process(pid)
                    .map_or((0, 0), |p| (p.memory(), p.virtual_memory()))
            }
            None => (self.sys.used_memory(), self.sys.used_memory()),
        };

        let total_ram = self.sys.total_memory();
        let total_swap = self.sys.total_swap();

        MemorySnapshot {
            heap:     MemoryUsage {
                used:      resident,
                committed: virt.max(resident),
                max:       (total_ram > 0).then_some(total_ram),
            },
            non_heap: MemoryUsage {
                used:      self.sys.used_swap(),
                committed: total_swap,
                max:       (total_swap > 0).then_some(total_swap),
            },
        }
    }
}

/// Format a byte count as a human-readable string (e.g. `"7.3 GiB"`).
pub fn format_bytes(bytes: u64) -> String {
    const GIB: u64 = 1 << 30;
    const MIB: u64 = 1 << 20;
    const KIB: u64 = 1 << 10;

    if bytes >= GIB {
        format!("{:.1} GiB", bytes as f64 / GIB as f64)
    } else if bytes >= MIB {
        format!("{:.1} MiB", bytes as f64 / MIB as f64)
    } else if bytes >= KIB {
        format!("{:.1} KiB", bytes as f64 / KIB as f64)
    } else {
        format!("{bytes} B")
    }
}

/// `format_bytes` for values that may not exist yet.
pub fn format_optional_bytes(bytes: Option<u64>) -> String {
    bytes.map_or_else(|| "UNAVAILABLE".to_string(), format_bytes)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn format_bytes_gib() {
        assert_eq!(format_bytes(8 * 1024 * 1024 * 1024), "8.0 GiB");
    }

    #[test]
    fn format_bytes_mib() {
        assert_eq!(format_bytes(10 * 1024 * 1024), "10.0 MiB");
    }

    #[test]
    fn format_bytes_small() {
        assert_eq!(format_bytes(0), "0 B");
        assert_eq!(format_bytes(1536), "1.5 KiB");
    }

    #[test]
    fn missing_size_is_unavailable() {
        assert_eq!(format_optional_bytes(None), "UNAVAILABLE");
        assert_eq!(format_optional_bytes(Some(512)), "512 B");
    }

    #[test]
    fn process_probe_reports_own_resident_set() {
        let mut probe = ProcessMemory::new();
        let snapshot = probe.sample();
        assert!(snapshot.heap.committed >= snapshot.heap.used);
        assert!(snapshot.total_used() >= snapshot.heap.used);
        if cfg!(target_os = "linux") {
            assert!(snapshot.heap.used > 0);
            assert!(snapshot.max_bytes() > 0);
        }
    }
}
