//! Host metrics sampling.
//!
//! CPU usage is inherently a windowed measurement: two counter readings
//! separated by a short async sleep. A sample therefore never blocks the
//! caller's event loop; callers spawn `sample()` as its own unit of work.
//! Host description values are read fresh on every call.

use std::net::UdpSocket;

use serde::Serialize;
use sysinfo::System;
use tokio::time;

use crate::error::{Error, Result};

const BYTES_PER_GB: f64 = 1e9;

/// Point-in-time host utilization.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SystemStats {
    pub cpu_percent: f32,
    pub memory_percent: f64,
    pub load_avg: LoadAverages,
}

/// 1/5/15-minute load averages.
#[derive(Debug, Clone, Serialize)]
pub struct LoadAverages {
    #[serde(rename = "1m")]
    pub one: f64,
    #[serde(rename = "5m")]
    pub five: f64,
    #[serde(rename = "15m")]
    pub fifteen: f64,
}

/// Static host description.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HostInfo {
    pub hostname: String,
    pub operating_system: String,
    pub total_memory_gb: f64,
    pub free_memory_gb: f64,
    pub cpu_count: usize,
    pub private_ip: String,
    pub user: String,
}

/// Sample CPU, memory and load. Takes at least
/// [`sysinfo::MINIMUM_CPU_UPDATE_INTERVAL`] of wall time for the CPU
/// measurement window.
pub async fn sample() -> Result<SystemStats> {
    let mut sys = System::new();
    sys.refresh_cpu_usage();
    time::sleep(sysinfo::MINIMUM_CPU_UPDATE_INTERVAL).await;
    sys.refresh_cpu_usage();
    sys.refresh_memory();

    let total = sys.total_memory();
    if total == 0 {
        return Err(Error::Sampling("total memory reported as zero".to_string()));
    }
    let used = total.saturating_sub(sys.free_memory());
    let load = System::load_average();

    Ok(SystemStats {
        cpu_percent: sys.global_cpu_usage(),
        memory_percent: used as f64 / total as f64 * 100.0,
        load_avg: LoadAverages {
            one: load.one,
            five: load.five,
            fifteen: load.fifteen,
        },
    })
}

/// Describe the host. Nothing is cached here beyond what the OS provides.
pub fn host_info() -> HostInfo {
    let mut sys = System::new();
    sys.refresh_memory();
    sys.refresh_cpu_usage();

    HostInfo {
        hostname: System::host_name().unwrap_or_else(|| "unknown".to_string()),
        operating_system: System::long_os_version()
            .or_else(System::name)
            .unwrap_or_else(|| "unknown".to_string()),
        total_memory_gb: sys.total_memory() as f64 / BYTES_PER_GB,
        free_memory_gb: sys.free_memory() as f64 / BYTES_PER_GB,
        cpu_count: sys.cpus().len(),
        private_ip: private_ip().unwrap_or_else(|| "unknown".to_string()),
        user: std::env::var("USER")
            .or_else(|_| std::env::var("USERNAME"))
            .unwrap_or_else(|_| "unknown".to_string()),
    }
}

/// Route-derived local address: connecting a UDP socket selects the
/// outbound interface without sending any traffic.
fn private_ip() -> Option<String> {
    let socket = UdpSocket::bind(("0.0.0.0", 0)).ok()?;
    socket.connect(("8.8.8.8", 80)).ok()?;
    Some(socket.local_addr().ok()?.ip().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn sample_reports_percentages_in_range() {
        let stats = sample().await.unwrap();
        assert!(stats.cpu_percent >= 0.0);
        assert!(stats.memory_percent >= 0.0 && stats.memory_percent <= 100.0);
        assert!(stats.load_avg.one >= 0.0);
    }

    #[test]
    fn host_info_has_a_hostname_and_cpus() {
        let info = host_info();
        assert!(!info.hostname.is_empty());
        assert!(info.cpu_count > 0);
        assert!(info.total_memory_gb > 0.0);
    }

    #[test]
    fn stats_serialize_with_wire_field_names() {
        let stats = SystemStats {
            cpu_percent: 12.5,
            memory_percent: 40.0,
            load_avg: LoadAverages {
                one: 0.5,
                five: 0.4,
                fifteen: 0.3,
            },
        };
        let json = serde_json::to_string(&stats).unwrap();
        assert!(json.contains("\"cpuPercent\""));
        assert!(json.contains("\"loadAvg\""));
        assert!(json.contains("\"1m\""));
        assert!(json.contains("\"15m\""));
    }
}
