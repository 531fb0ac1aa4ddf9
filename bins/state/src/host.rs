//! Simulated host selection and persistence.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Args;
use nlstate::NetState;
use nlstate::lab::{DhcpServer, SimulatedHost};
use nlstate::state::NetworkState;

/// Ethernet devices of a host that has no state file yet.
const DEFAULT_DEVICES: &[&str] = &["eth1", "eth2"];

#[derive(Args)]
pub struct HostArgs {
    /// Host state file (YAML). Created on the first apply.
    #[arg(long, global = true, value_name = "FILE")]
    pub host: Option<PathBuf>,

    /// Attach a DHCP and router advertisement service to an interface
    #[arg(long, global = true, value_name = "IFACE", value_delimiter = ',')]
    pub dhcp_server: Vec<String>,
}

impl HostArgs {
    /// Build the engine on the selected host.
    pub fn engine(&self) -> Result<NetState<SimulatedHost>> {
        let mut host = match self.load()? {
            Some(state) => SimulatedHost::from_state(&state),
            None => DEFAULT_DEVICES
                .iter()
                .fold(SimulatedHost::new(), |host, name| host.with_ethernet(name)),
        };
        for iface in &self.dhcp_server {
            host = host.with_dhcp_server(iface, DhcpServer::standard().with_delay(Duration::ZERO));
        }
        Ok(NetState::new(host))
    }

    /// Write the host configuration back to the state file, if any.
    pub fn save(&self, host: &SimulatedHost) -> Result<()> {
        let Some(path) = &self.host else {
            return Ok(());
        };
        let yaml = serde_yaml::to_string(&host.config_state())
            .context("YAML serialization failed")?;
        std::fs::write(path, yaml).with_context(|| format!("cannot write {}", path.display()))?;
        tracing::debug!(path = %path.display(), "host state saved");
        Ok(())
    }

    fn load(&self) -> Result<Option<NetworkState>> {
        let Some(path) = &self.host else {
            return Ok(None);
        };
        if !path.exists() {
            return Ok(None);
        }
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("cannot read {}", path.display()))?;
        let state = serde_yaml::from_str(&text)
            .with_context(|| format!("invalid host state in {}", path.display()))?;
        Ok(Some(state))
    }
}

/// Read a desired state document. `-` reads standard input.
pub fn read_document(path: &str) -> Result<NetworkState> {
    let text = if path == "-" {
        std::io::read_to_string(std::io::stdin()).context("cannot read standard input")?
    } else {
        std::fs::read_to_string(path).with_context(|| format!("cannot read {}", path))?
    };
    // JSON is a subset of YAML, so one parser covers both formats.
    serde_yaml::from_str(&text).with_context(|| format!("invalid state document {}", path))
}
