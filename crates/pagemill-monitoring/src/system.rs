use parking_lot::Mutex;
use serde::Serialize;
use sysinfo::{Disks, Networks, System};

/// Per-disk usage snapshot.
#[derive(Debug, Clone, Serialize)]
pub struct DiskStats {
    pub name: String,
    pub total_bytes: u64,
    pub available_bytes: u64,
}

/// Host-level stats attached to every telemetry frame.
#[derive(Debug, Clone, Default, Serialize)]
pub struct SystemStats {
    pub cpu_percent: f32,
    pub memory_total_bytes: u64,
    pub memory_used_bytes: u64,
    pub load_avg_1: f64,
    pub load_avg_5: f64,
    pub load_avg_15: f64,
    pub network_rx_bytes: u64,
    pub network_tx_bytes: u64,
    pub disks: Vec<DiskStats>,
}

/// Wraps the sysinfo handles; one refresh per telemetry tick.
pub struct SystemStatsCollector {
    system: Mutex<System>,
    networks: Mutex<Networks>,
    disks: Mutex<Disks>,
}

impl SystemStatsCollector {
    pub fn new() -> Self {
        Self {
            system: Mutex::new(System::new_all()),
            networks: Mutex::new(Networks::new_with_refreshed_list()),
            disks: Mutex::new(Disks::new_with_refreshed_list()),
        }
    }

    pub fn collect(&self) -> SystemStats {
        let (cpu_percent, memory_total_bytes, memory_used_bytes) = {
            let mut system = self.system.lock();
            system.refresh_cpu_all();
            system.refresh_memory();
            (
                system.global_cpu_usage(),
                system.total_memory(),
                system.used_memory(),
            )
        };

        let (network_rx_bytes, network_tx_bytes) = {
            let mut networks = self.networks.lock();
            networks.refresh();
            networks.iter().fold((0u64, 0u64), |(rx, tx), (_, data)| {
                (rx + data.total_received(), tx + data.total_transmitted())
            })
        };

        let disks = {
            let mut disks = self.disks.lock();
            disks.refresh();
            disks
                .iter()
                .map(|disk| DiskStats {
                    name: disk.name().to_string_lossy().into_owned(),
                    total_bytes: disk.total_space(),
                    available_bytes: disk.available_space(),
                })
                .collect()
        };

        let load = System::load_average();

        SystemStats {
            cpu_percent,
            memory_total_bytes,
            memory_used_bytes,
            load_avg_1: load.one,
            load_avg_5: load.five,
            load_avg_15: load.fifteen,
            network_rx_bytes,
            network_tx_bytes,
            disks,
        }
    }
}

impl Default for SystemStatsCollector {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn collect_reports_plausible_totals() {
        let collector = SystemStatsCollector::new();
        let stats = collector.collect();
        assert!(stats.memory_total_bytes > 0);
        assert!(stats.memory_used_bytes <= stats.memory_total_bytes);
    }
}
