//! One discovery cycle: probe every configured range, parse the output,
//! and register devices the inventory has not seen before.
//!
//! Probe failures and invalid candidates only affect their own range or
//! device. Only a storage failure aborts the cycle.

use std::collections::HashSet;
use std::net::IpAddr;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use netwatch_core::{identity_key, DeviceRecord, ScannedDevice, ValidationError};
use uuid::Uuid;

use crate::classifier::LocalNetworks;
use crate::error::{ProbeError, StorageError};
use crate::inventory::Inventory;
use crate::parser;
use crate::probe::{ProbeOutput, ProbeStrategy};
use crate::ranges::{RangeSource, RangeSpec};
use crate::watch::Shutdown;

/// The outcome of one cycle.
#[derive(Debug)]
pub struct CycleReport {
    pub cycle_id: Uuid,
    /// Devices inserted this cycle, in discovery order.
    pub new_devices: Vec<DeviceRecord>,
    pub ranges_scanned: usize,
    pub ranges_failed: usize,
    pub candidates: usize,
    pub known: usize,
    pub skipped: usize,
    pub duration: Duration,
}

impl CycleReport {
    fn new(cycle_id: Uuid) -> Self {
        Self {
            cycle_id,
            new_devices: Vec::new(),
            ranges_scanned: 0,
            ranges_failed: 0,
            candidates: 0,
            known: 0,
            skipped: 0,
            duration: Duration::ZERO,
        }
    }
}

enum Outcome {
    New(DeviceRecord),
    Known(String),
    Skipped,
}

/// Drives discovery cycles against one inventory.
pub struct Reconciler<L, R> {
    ranges: RangeSource,
    local_networks: LocalNetworks,
    local: L,
    remote: R,
    inventory: Inventory,
    range_timeout: Duration,
}

impl<L: ProbeStrategy, R: ProbeStrategy> Reconciler<L, R> {
    pub fn new(
        ranges: RangeSource,
        local_networks: LocalNetworks,
        local: L,
        remote: R,
        inventory: Inventory,
        range_timeout: Duration,
    ) -> Self {
        Self {
            ranges,
            local_networks,
            local,
            remote,
            inventory,
            range_timeout,
        }
    }

    pub fn inventory(&self) -> &Inventory {
        &self.inventory
    }

    /// Run one cycle over all configured ranges.
    ///
    /// Ranges are probed sequentially; `shutdown` is checked between ranges.
    pub async fn run_cycle(&self, shutdown: &Shutdown) -> Result<CycleReport, StorageError> {
        let start = Instant::now();
        let now = Utc::now();
        let mut report = CycleReport::new(Uuid::new_v4());
        let mut seen = HashSet::new();

        let ranges = self.ranges.load();
        tracing::info!(
            cycle_id = %report.cycle_id,
            ranges = ranges.len(),
            "Starting discovery cycle"
        );

        for range in &ranges {
            if shutdown.is_triggered() {
                tracing::info!(cycle_id = %report.cycle_id, "Shutdown requested, ending cycle early");
                break;
            }

            let output = match self.probe_range(range).await {
                Ok(output) => output,
                Err(e) => {
                    tracing::warn!(range = %range, error = %e, "Probe failed, skipping range");
                    report.ranges_failed += 1;
                    continue;
                }
            };
            report.ranges_scanned += 1;

            let candidates = parser::parse_probe_output(&output);
            tracing::debug!(range = %range, candidates = candidates.len(), "Parsed probe output");
            report.candidates += candidates.len();

            for candidate in candidates {
                match self.reconcile_candidate(range, candidate, now)? {
                    Outcome::New(record) => report.new_devices.push(record),
                    Outcome::Known(identity) => {
                        report.known += 1;
                        seen.insert(identity);
                    }
                    Outcome::Skipped => report.skipped += 1,
                }
            }
        }

        if let Err(e) = self.inventory.touch(&seen, now) {
            tracing::warn!(error = %e, "Failed to refresh last-seen timestamps");
        }

        report.duration = start.elapsed();
        tracing::info!(
            cycle_id = %report.cycle_id,
            new = report.new_devices.len(),
            known = report.known,
            skipped = report.skipped,
            ranges_scanned = report.ranges_scanned,
            ranges_failed = report.ranges_failed,
            duration_ms = report.duration.as_millis(),
            "Discovery cycle complete"
        );

        Ok(report)
    }

    /// Probe one range with the strategy its locality calls for, bounded by
    /// the per-range timeout.
    async fn probe_range(&self, range: &RangeSpec) -> Result<ProbeOutput, ProbeError> {
        let local = self.local_networks.is_local(&range.net);
        let strategy = if local {
            self.local.name()
        } else {
            self.remote.name()
        };

        tracing::info!(range = %range, strategy, local, "Probing range");

        let probe = async {
            if local {
                self.local.probe(range).await
            } else {
                self.remote.probe(range).await
            }
        };

        match tokio::time::timeout(self.range_timeout, probe).await {
            Ok(result) => result,
            Err(_) => Err(ProbeError::Timeout {
                program: strategy.to_string(),
                timeout_secs: self.range_timeout.as_secs(),
            }),
        }
    }

    fn reconcile_candidate(
        &self,
        range: &RangeSpec,
        candidate: ScannedDevice,
        seen_at: DateTime<Utc>,
    ) -> Result<Outcome, StorageError> {
        let address: IpAddr = match candidate.address.parse() {
            Ok(addr) => addr,
            Err(_) => {
                let error = ValidationError::InvalidAddress(candidate.address);
                tracing::warn!(range = %range, error = %error, "Skipping device");
                return Ok(Outcome::Skipped);
            }
        };

        if !range.net.contains(&address) {
            tracing::debug!(range = %range, address = %address, "Skipping device outside range");
            return Ok(Outcome::Skipped);
        }

        let identity = identity_key(&candidate.hardware_id, &address);
        match self
            .inventory
            .register_if_new(&identity, address, &candidate.vendor, seen_at)?
        {
            Some(record) => {
                tracing::info!(
                    identity = %record.identity,
                    address = %record.address,
                    vendor = %record.vendor,
                    status = %record.status,
                    "New device discovered"
                );
                Ok(Outcome::New(record))
            }
            None => Ok(Outcome::Known(identity)),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use netwatch_core::DeviceStatus;

    use super::*;
    use crate::probe::OutputFormat;

    /// Returns canned output for every range and counts calls.
    struct CannedProbe {
        name: &'static str,
        output: Option<ProbeOutput>,
        calls: AtomicUsize,
    }

    impl CannedProbe {
        fn new(name: &'static str, format: OutputFormat, text: &str) -> Self {
            Self {
                name,
                output: Some(ProbeOutput::new(format, text)),
                calls: AtomicUsize::new(0),
            }
        }

        fn failing(name: &'static str) -> Self {
            Self {
                name,
                output: None,
                calls: AtomicUsize::new(0),
            }
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    impl ProbeStrategy for CannedProbe {
        fn name(&self) -> &'static str {
            self.name
        }

        async fn probe(&self, _range: &RangeSpec) -> Result<ProbeOutput, ProbeError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.output.clone().ok_or_else(|| ProbeError::Failed {
                program: self.name.to_string(),
                code: 1,
                stderr: "permission denied".to_string(),
            })
        }
    }

    fn reconciler(
        dir: &tempfile::TempDir,
        ranges: &str,
        local_nets: &[&str],
        local: CannedProbe,
        remote: CannedProbe,
    ) -> Reconciler<CannedProbe, CannedProbe> {
        let ranges_file = dir.path().join("networks.txt");
        std::fs::write(&ranges_file, ranges).unwrap();
        let inventory = Inventory::open(dir.path().join("data")).unwrap();
        let local_networks =
            LocalNetworks::new(local_nets.iter().map(|n| n.parse().unwrap()).collect());
        Reconciler::new(
            RangeSource::new(ranges_file, "eth0", Vec::new()),
            local_networks,
            local,
            remote,
            inventory,
            Duration::from_secs(5),
        )
    }

    #[tokio::test]
    async fn test_local_range_uses_link_layer_probe() {
        let dir = tempfile::tempdir().unwrap();
        let r = reconciler(
            &dir,
            "eth0:192.168.1.0/24\n",
            &["192.168.1.0/24"],
            CannedProbe::new(
                "local",
                OutputFormat::LinkLayer,
                "192.168.1.50  aa:bb:cc:dd:ee:ff  ExampleVendor\n",
            ),
            CannedProbe::failing("remote"),
        );

        let report = r.run_cycle(&Shutdown::new()).await.unwrap();

        assert_eq!(r.local.calls(), 1);
        assert_eq!(r.remote.calls(), 0);
        assert_eq!(report.new_devices.len(), 1);
        let device = &report.new_devices[0];
        assert_eq!(device.identity, "aa:bb:cc:dd:ee:ff");
        assert_eq!(device.vendor, "ExampleVendor");
        assert_eq!(device.status, DeviceStatus::Unknown);
    }

    #[tokio::test]
    async fn test_remote_devices_are_keyed_by_address() {
        let dir = tempfile::tempdir().unwrap();
        let r = reconciler(
            &dir,
            "10.20.0.0/24\n",
            &["192.168.1.0/24"],
            CannedProbe::failing("local"),
            CannedProbe::new(
                "remote",
                OutputFormat::Reachability,
                "Nmap scan report for 10.20.0.5\nNmap scan report for 10.20.0.6\n",
            ),
        );

        let report = r.run_cycle(&Shutdown::new()).await.unwrap();

        let identities: Vec<&str> = report.new_devices.iter().map(|d| d.identity.as_str()).collect();
        assert_eq!(identities, vec!["10.20.0.5", "10.20.0.6"]);
        assert!(r.inventory().exists("10.20.0.5").unwrap());
    }

    #[tokio::test]
    async fn test_failed_range_does_not_abort_cycle() {
        let dir = tempfile::tempdir().unwrap();
        let r = reconciler(
            &dir,
            "eth0:192.168.1.0/24\n10.20.0.0/24\n",
            &["192.168.1.0/24"],
            CannedProbe::failing("local"),
            CannedProbe::new(
                "remote",
                OutputFormat::Reachability,
                "Nmap scan report for 10.20.0.5\n",
            ),
        );

        let report = r.run_cycle(&Shutdown::new()).await.unwrap();

        assert_eq!(report.ranges_failed, 1);
        assert_eq!(report.ranges_scanned, 1);
        assert_eq!(report.new_devices.len(), 1);
    }

    #[tokio::test]
    async fn test_invalid_and_out_of_range_addresses_are_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let r = reconciler(
            &dir,
            "192.168.1.0/24\n",
            &["192.168.1.0/24"],
            CannedProbe::new(
                "local",
                OutputFormat::LinkLayer,
                "999.168.1.2 aa:bb:cc:dd:ee:01 Bad\n\
                 10.0.0.9 aa:bb:cc:dd:ee:02 Elsewhere\n\
                 192.168.1.3 aa:bb:cc:dd:ee:03 Good\n",
            ),
            CannedProbe::failing("remote"),
        );

        let report = r.run_cycle(&Shutdown::new()).await.unwrap();

        assert_eq!(report.candidates, 3);
        assert_eq!(report.skipped, 2);
        assert_eq!(report.new_devices.len(), 1);
        assert_eq!(r.inventory().get_all().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_second_cycle_finds_nothing_new() {
        let dir = tempfile::tempdir().unwrap();
        let r = reconciler(
            &dir,
            "192.168.1.0/24\n",
            &["192.168.1.0/24"],
            CannedProbe::new(
                "local",
                OutputFormat::LinkLayer,
                "192.168.1.50 aa:bb:cc:dd:ee:ff Vendor\n192.168.1.50 AA-BB-CC-DD-EE-FF Vendor\n",
            ),
            CannedProbe::failing("remote"),
        );

        let first = r.run_cycle(&Shutdown::new()).await.unwrap();
        let second = r.run_cycle(&Shutdown::new()).await.unwrap();

        assert_eq!(first.new_devices.len(), 1);
        assert_eq!(first.known, 1);
        assert!(second.new_devices.is_empty());
        assert_eq!(second.known, 2);
        assert_eq!(r.inventory().get_all().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_shutdown_stops_between_ranges() {
        let dir = tempfile::tempdir().unwrap();
        let r = reconciler(
            &dir,
            "10.1.0.0/24\n10.2.0.0/24\n",
            &[],
            CannedProbe::failing("local"),
            CannedProbe::new("remote", OutputFormat::Reachability, ""),
        );

        let shutdown = Shutdown::new();
        shutdown.trigger();
        let report = r.run_cycle(&shutdown).await.unwrap();

        assert_eq!(r.remote.calls(), 0);
        assert_eq!(report.ranges_scanned, 0);
    }

    #[tokio::test]
    async fn test_storage_failure_aborts_cycle() {
        let dir = tempfile::tempdir().unwrap();
        let r = reconciler(
            &dir,
            "192.168.1.0/24\n",
            &["192.168.1.0/24"],
            CannedProbe::new(
                "local",
                OutputFormat::LinkLayer,
                "192.168.1.50 aa:bb:cc:dd:ee:ff Vendor\n",
            ),
            CannedProbe::failing("remote"),
        );
        std::fs::remove_dir_all(r.inventory().root()).unwrap();
        std::fs::write(r.inventory().root(), b"not a directory").unwrap();

        assert!(r.run_cycle(&Shutdown::new()).await.is_err());
    }
}
