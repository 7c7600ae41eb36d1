//! Probe process wrappers.
//!
//! Each strategy executes an external discovery tool as a child process via
//! `tokio::process::Command` under a hard wall-clock timeout and returns its
//! stdout tagged with the format the parser should expect.

use std::time::{Duration, Instant};

use tokio::process::Command;

use crate::config::ProbeConfig;
use crate::error::ProbeError;
use crate::ranges::RangeSpec;

/// Which textual layout a probe produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    /// arp-scan: `address  mac  vendor` per responding host.
    LinkLayer,
    /// `arp -a`: `host (address) at mac [ether] on iface`.
    ArpCache,
    /// nmap ping sweep: `Nmap scan report for address` per live host.
    Reachability,
}

/// Raw output of one probe run.
#[derive(Debug, Clone)]
pub struct ProbeOutput {
    pub format: OutputFormat,
    pub text: String,
}

impl ProbeOutput {
    pub fn new(format: OutputFormat, text: impl Into<String>) -> Self {
        Self {
            format,
            text: text.into(),
        }
    }
}

/// A way of discovering live devices in one range.
///
/// Implementations must be side-effect free apart from network traffic and
/// must bound their own runtime.
#[allow(async_fn_in_trait)]
pub trait ProbeStrategy {
    /// Short name used in logs.
    fn name(&self) -> &'static str;

    async fn probe(&self, range: &RangeSpec) -> Result<ProbeOutput, ProbeError>;
}

/// Link-layer sweep with `arp-scan`, falling back to the ARP cache on timeout.
pub struct LocalProbe {
    config: ProbeConfig,
}

impl LocalProbe {
    pub fn new(config: &ProbeConfig) -> Self {
        Self {
            config: config.clone(),
        }
    }

    fn arp_scan_args(&self, range: &RangeSpec) -> Vec<String> {
        vec![
            "-I".to_string(),
            range.interface.clone(),
            format!("--timeout={}", self.config.arp_scan_timeout_ms),
            format!("--retry={}", self.config.arp_scan_retries),
            range.net.to_string(),
        ]
    }

    fn arp_cache_args(range: &RangeSpec) -> Vec<String> {
        vec!["-a".to_string(), "-i".to_string(), range.interface.clone()]
    }

    async fn probe_arp_cache(&self, range: &RangeSpec) -> Result<ProbeOutput, ProbeError> {
        let text = run_probe(
            &self.config,
            &self.config.arp_path,
            &Self::arp_cache_args(range),
            Duration::from_secs(self.config.fallback_timeout_secs),
        )
        .await?;
        Ok(ProbeOutput::new(OutputFormat::ArpCache, text))
    }
}

impl ProbeStrategy for LocalProbe {
    fn name(&self) -> &'static str {
        "arp-scan"
    }

    async fn probe(&self, range: &RangeSpec) -> Result<ProbeOutput, ProbeError> {
        let result = run_probe(
            &self.config,
            &self.config.arp_scan_path,
            &self.arp_scan_args(range),
            Duration::from_secs(self.config.local_timeout_secs),
        )
        .await;

        match result {
            Ok(text) => Ok(ProbeOutput::new(OutputFormat::LinkLayer, text)),
            Err(ProbeError::Timeout { .. }) => {
                tracing::warn!(
                    range = %range,
                    "arp-scan timed out, falling back to the ARP cache"
                );
                self.probe_arp_cache(range).await
            }
            Err(e) => Err(e),
        }
    }
}

/// Routed reachability sweep with an nmap ping scan.
pub struct RemoteProbe {
    config: ProbeConfig,
}

impl RemoteProbe {
    pub fn new(config: &ProbeConfig) -> Self {
        Self {
            config: config.clone(),
        }
    }

    fn nmap_args(&self, range: &RangeSpec) -> Vec<String> {
        vec![
            "-sn".to_string(),
            "-PE".to_string(),
            format!("-PS{}", self.config.ping_ports),
            "-n".to_string(),
            format!("--max-retries={}", self.config.max_retries),
            format!("--host-timeout={}s", self.config.host_timeout_secs),
            range.net.to_string(),
        ]
    }
}

impl ProbeStrategy for RemoteProbe {
    fn name(&self) -> &'static str {
        "nmap"
    }

    async fn probe(&self, range: &RangeSpec) -> Result<ProbeOutput, ProbeError> {
        let text = run_probe(
            &self.config,
            &self.config.nmap_path,
            &self.nmap_args(range),
            Duration::from_secs(self.config.remote_timeout_secs),
        )
        .await?;
        Ok(ProbeOutput::new(OutputFormat::Reachability, text))
    }
}

async fn run_probe(
    config: &ProbeConfig,
    program: &str,
    args: &[String],
    timeout: Duration,
) -> Result<String, ProbeError> {
    let (program, args) = probe_command(config, program, args);
    run_command(&program, &args, timeout).await
}

/// The program and argument list actually executed, with `sudo` prepended
/// when configured.
fn probe_command(config: &ProbeConfig, program: &str, args: &[String]) -> (String, Vec<String>) {
    if config.use_sudo {
        let mut sudo_args = Vec::with_capacity(args.len() + 1);
        sudo_args.push(program.to_string());
        sudo_args.extend_from_slice(args);
        ("sudo".to_string(), sudo_args)
    } else {
        (program.to_string(), args.to_vec())
    }
}

/// Run `program` with `args`, returning stdout on a zero exit status.
///
/// The child is killed if `timeout` elapses first.
pub async fn run_command(
    program: &str,
    args: &[String],
    timeout: Duration,
) -> Result<String, ProbeError> {
    let start = Instant::now();
    tracing::debug!(program, args = ?args, "Starting probe");

    let mut command = Command::new(program);
    command.args(args).kill_on_drop(true);

    let output = match tokio::time::timeout(timeout, command.output()).await {
        Ok(result) => result.map_err(|source| ProbeError::Spawn {
            program: program.to_string(),
            source,
        })?,
        Err(_) => {
            return Err(ProbeError::Timeout {
                program: program.to_string(),
                timeout_secs: timeout.as_secs(),
            })
        }
    };

    if !output.status.success() {
        return Err(ProbeError::Failed {
            program: program.to_string(),
            code: output.status.code().unwrap_or(-1),
            stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        });
    }

    tracing::debug!(
        program,
        duration_ms = start.elapsed().as_millis(),
        bytes = output.stdout.len(),
        "Probe complete"
    );

    Ok(String::from_utf8_lossy(&output.stdout).into_owned())
}
