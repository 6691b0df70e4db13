//! System metric sampling
//!
//! Wraps sysinfo behind per-probe boundaries: a failing sub-probe zeroes
//! its snapshot fields and is listed in `degraded_probes`, and the cycle
//! always produces a complete snapshot. Network rates are derived from
//! counter deltas between consecutive cycles.

use std::sync::{Arc, RwLock};
use std::time::Instant;

use chrono::Utc;
use sysinfo::{Disks, Networks, System, MINIMUM_CPU_UPDATE_INTERVAL};

use crate::error::{ProbeError, ProbeResult};
use crate::metrics::{NetworkStats, ProcessSample, Snapshot, SystemInfo};

/// Raw cumulative counters summed over all interfaces
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
struct NetworkCounters {
    bytes_sent: u64,
    bytes_recv: u64,
    packets_sent: u64,
    packets_recv: u64,
    errors_in: u64,
    errors_out: u64,
}

/// Per-second rate from two cumulative counter readings. The elapsed time
/// is floored at 100ms so a tight re-sample cannot explode the rate, and a
/// counter reset (current below previous) reports 0 for the cycle.
fn rate(current: u64, previous: u64, elapsed_secs: f64) -> f64 {
    if current < previous {
        return 0.0;
    }
    (current - previous) as f64 / elapsed_secs.max(0.1)
}

/// The latest complete snapshot, swapped whole under a lock so readers
/// never observe a partially written cycle.
#[derive(Default)]
pub struct SharedSnapshot {
    inner: RwLock<Option<Arc<Snapshot>>>,
}

impl SharedSnapshot {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn publish(&self, snapshot: Snapshot) {
        let snapshot = Arc::new(snapshot);
        match self.inner.write() {
            Ok(mut guard) => *guard = Some(snapshot),
            Err(poisoned) => *poisoned.into_inner() = Some(snapshot),
        }
    }

    pub fn latest(&self) -> Option<Arc<Snapshot>> {
        match self.inner.read() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }
}

/// Collects one snapshot per call. Holds the sysinfo handles and the
/// previous network counters for rate derivation.
pub struct Sampler {
    system: System,
    networks: Networks,
    disks: Disks,
    top_n: usize,
    prev_net: Option<(NetworkCounters, Instant)>,
}

impl Sampler {
    pub fn new(top_n: usize) -> Self {
        Self {
            system: System::new_all(),
            networks: Networks::new_with_refreshed_list(),
            disks: Disks::new_with_refreshed_list(),
            top_n,
            prev_net: None,
        }
    }

    /// Run one full collection cycle. Never fails as a whole; failed
    /// sub-probes leave their fields defaulted and are listed in
    /// `degraded_probes`.
    pub async fn collect(&mut self) -> Snapshot {
        let mut snap = Snapshot { timestamp: Utc::now(), ..Snapshot::default() };

        // CPU and process usage share the two-pass refresh: one initial
        // read, a short settle, then the read that yields usage deltas.
        self.system.refresh_cpu_usage();
        self.system.refresh_processes();
        tokio::time::sleep(MINIMUM_CPU_UPDATE_INTERVAL).await;
        self.system.refresh_cpu_usage();
        self.system.refresh_processes();
        self.system.refresh_memory();

        match self.sample_cpu() {
            Ok(v) => snap.cpu_percent = v,
            Err(e) => degrade(&mut snap, "cpu", &e),
        }
        match self.sample_memory() {
            Ok(v) => snap.memory_percent = v,
            Err(e) => degrade(&mut snap, "memory", &e),
        }
        match self.sample_disk() {
            Ok(v) => snap.disk_percent = v,
            Err(e) => degrade(&mut snap, "disk", &e),
        }
        match self.sample_network() {
            Ok(v) => snap.network = v,
            Err(e) => degrade(&mut snap, "network", &e),
        }
        match self.sample_processes() {
            Ok(v) => snap.top_processes = v,
            Err(e) => degrade(&mut snap, "process", &e),
        }
        snap.system = self.sample_system_info();

        snap
    }

    fn sample_cpu(&self) -> ProbeResult<f64> {
        if self.system.cpus().is_empty() {
            return Err(ProbeError::Unavailable {
                probe: "cpu",
                reason: "no cpus reported".to_string(),
            });
        }
        Ok(f64::from(self.system.global_cpu_info().cpu_usage()))
    }

    fn sample_memory(&self) -> ProbeResult<f64> {
        let total = self.system.total_memory();
        if total == 0 {
            return Err(ProbeError::Unavailable {
                probe: "memory",
                reason: "total memory reported as zero".to_string(),
            });
        }
        let used = total.saturating_sub(self.system.available_memory());
        Ok(used as f64 / total as f64 * 100.0)
    }

    fn sample_disk(&mut self) -> ProbeResult<f64> {
        self.disks.refresh_list();
        let (mut total, mut available) = (0u64, 0u64);
        for disk in self.disks.list() {
            total = total.saturating_add(disk.total_space());
            available = available.saturating_add(disk.available_space());
        }
        if total == 0 {
            return Err(ProbeError::Unavailable {
                probe: "disk",
                reason: "no disks with non-zero capacity".to_string(),
            });
        }
        Ok(total.saturating_sub(available) as f64 / total as f64 * 100.0)
    }

    fn sample_network(&mut self) -> ProbeResult<NetworkStats> {
        self.networks.refresh_list();
        let mut counters = NetworkCounters::default();
        for (_name, data) in self.networks.list() {
            counters.bytes_sent += data.total_transmitted();
            counters.bytes_recv += data.total_received();
            counters.packets_sent += data.total_packets_transmitted();
            counters.packets_recv += data.total_packets_received();
            counters.errors_in += data.total_errors_on_received();
            counters.errors_out += data.total_errors_on_transmitted();
        }

        let now = Instant::now();
        let mut stats = NetworkStats {
            bytes_sent: counters.bytes_sent,
            bytes_recv: counters.bytes_recv,
            packets_sent: counters.packets_sent,
            packets_recv: counters.packets_recv,
            errors_in: counters.errors_in,
            errors_out: counters.errors_out,
            ..NetworkStats::default()
        };

        // First cycle has no baseline; speeds stay 0.
        if let Some((prev, prev_at)) = self.prev_net {
            let elapsed = now.duration_since(prev_at).as_secs_f64();
            stats.bytes_sent_speed = rate(counters.bytes_sent, prev.bytes_sent, elapsed);
            stats.bytes_recv_speed = rate(counters.bytes_recv, prev.bytes_recv, elapsed);
            stats.packets_sent_speed = rate(counters.packets_sent, prev.packets_sent, elapsed);
            stats.packets_recv_speed = rate(counters.packets_recv, prev.packets_recv, elapsed);
        }
        self.prev_net = Some((counters, now));

        Ok(stats)
    }

    fn sample_processes(&self) -> ProbeResult<Vec<ProcessSample>> {
        let total_memory = self.system.total_memory();
        let mut samples: Vec<ProcessSample> = self
            .system
            .processes()
            .iter()
            .map(|(pid, proc)| ProcessSample {
                pid: pid.as_u32(),
                name: proc.name().to_string(),
                cpu_percent: f64::from(proc.cpu_usage()),
                memory_percent: if total_memory == 0 {
                    0.0
                } else {
                    proc.memory() as f64 / total_memory as f64 * 100.0
                },
                status: proc.status().to_string(),
            })
            .collect();
        if samples.is_empty() {
            return Err(ProbeError::Unavailable {
                probe: "process",
                reason: "process table empty".to_string(),
            });
        }
        samples.sort_by(|a, b| b.cpu_percent.total_cmp(&a.cpu_percent));
        samples.truncate(self.top_n);
        Ok(samples)
    }

    fn sample_system_info(&self) -> SystemInfo {
        let load = System::load_average();
        let (disk_total, disk_available) = self.disks.list().iter().fold(
            (0u64, 0u64),
            |(t, a), d| (t.saturating_add(d.total_space()), a.saturating_add(d.available_space())),
        );
        SystemInfo {
            cpu_count: self.system.cpus().len(),
            physical_cores: self.system.physical_core_count().unwrap_or(0),
            memory_total: self.system.total_memory(),
            memory_available: self.system.available_memory(),
            disk_total,
            disk_available,
            load_1: load.one,
            load_5: load.five,
            load_15: load.fifteen,
            boot_time: System::boot_time(),
            hostname: System::host_name().unwrap_or_default(),
        }
    }
}

fn degrade(snap: &mut Snapshot, probe: &str, err: &ProbeError) {
    tracing::warn!(probe, "Probe degraded: {}", err);
    snap.degraded_probes.push(probe.to_string());
}
