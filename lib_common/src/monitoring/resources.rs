//! # Host Resource Sampler
//!
//! CPU/memory/disk sampling runs on one dedicated background thread so the
//! CPU-bound refresh work never blocks the cooperative event loop. Samples
//! are published through a `watch` channel; the thread exits on its own once
//! every receiver is gone.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use sysinfo::{CpuExt, DiskExt, System, SystemExt};
use tokio::sync::watch;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceSample {
    pub cpu_pct: f32,
    pub memory_pct: f32,
    /// Usage of the fullest mounted disk.
    pub disk_pct: f32,
    pub sampled_at: DateTime<Utc>,
}

pub struct ResourceSampler;

impl ResourceSampler {
    /// Spawns the sampling thread and returns the receiving end. The first
    /// sample arrives after one interval; until then the value is `None`.
    pub fn spawn(interval: Duration) -> watch::Receiver<Option<ResourceSample>> {
        let (tx, rx) = watch::channel(None);
        std::thread::Builder::new()
            .name("resource-sampler".into())
            .spawn(move || {
                let mut sys = System::new_all();
                loop {
                    std::thread::sleep(interval);
                    sys.refresh_cpu();
                    sys.refresh_memory();
                    sys.refresh_disks();
                    let sample = Self::sample(&sys);
                    if tx.send(Some(sample)).is_err() {
                        // All receivers dropped; the process is shutting down.
                        break;
                    }
                }
            })
            .expect("failed to spawn resource sampler thread");
        rx
    }

    fn sample(sys: &System) -> ResourceSample {
        let cpu_pct = sys.global_cpu_info().cpu_usage();
        let memory_pct = if sys.total_memory() == 0 {
            0.0
        } else {
            (sys.used_memory() as f32 / sys.total_memory() as f32) * 100.0
        };
        let disk_pct = sys
            .disks()
            .iter()
            .filter(|d| d.total_space() > 0)
            .map(|d| {
                let used = d.total_space() - d.available_space();
                (used as f32 / d.total_space() as f32) * 100.0
            })
            .fold(0.0f32, f32::max);
        ResourceSample { cpu_pct, memory_pct, disk_pct, sampled_at: Utc::now() }
    }
}
