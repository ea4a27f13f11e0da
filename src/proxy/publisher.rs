//! Result publisher: run state, working lists, address list and CSV export

use crate::proxy::files::write_atomic;
use crate::proxy::models::{Proxy, ProxyType};
use crate::proxy::state::RunState;
use crate::Result;
use chrono::Utc;
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use tracing::info;

/// Relay entry placed at the top of the SOCKS5 list
pub const DEFAULT_OPERATOR_RELAY: &str = "127.0.0.1:9050";

/// Writes every artifact under one output directory
#[derive(Debug, Clone)]
pub struct Publisher {
    dir: PathBuf,
    operator_relay: String,
}

impl Publisher {
    pub fn new(dir: impl Into<PathBuf>, operator_relay: impl Into<String>) -> Self {
        Self {
            dir: dir.into(),
            operator_relay: operator_relay.into(),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn state_path(&self) -> PathBuf {
        self.dir.join("proxies.json")
    }

    pub fn working_path(&self, proxy_type: ProxyType) -> PathBuf {
        self.dir.join(format!("{}_working.txt", proxy_type))
    }

    pub fn addresses_path(&self) -> PathBuf {
        self.dir.join("ips.txt")
    }

    pub fn csv_path(&self) -> PathBuf {
        self.dir.join("all_proxies.csv")
    }

    pub fn last_updated_path(&self) -> PathBuf {
        self.dir.join("last_updated.txt")
    }

    /// Persist the full run state and the working address list
    pub async fn checkpoint(&self, state: &RunState) -> Result<()> {
        write_atomic(&self.state_path(), state.to_json()?).await?;
        self.write_addresses(state).await
    }

    async fn write_addresses(&self, state: &RunState) -> Result<()> {
        let hosts = state.working_hosts();
        write_atomic(&self.addresses_path(), lines(hosts.iter().map(String::as_str))).await?;
        Ok(())
    }

    /// Write the per-protocol working lists, address list and timestamp
    pub async fn finalize(&self, state: &RunState) -> Result<()> {
        for proxy_type in ProxyType::ALL {
            let endpoints: BTreeSet<&str> = state
                .working(proxy_type)
                .map(|result| result.endpoint())
                .collect();

            let mut entries: Vec<&str> = Vec::with_capacity(endpoints.len() + 1);
            if proxy_type == ProxyType::Socks5 {
                entries.push(&self.operator_relay);
                entries.extend(
                    endpoints
                        .into_iter()
                        .filter(|endpoint| *endpoint != self.operator_relay),
                );
            } else {
                entries.extend(endpoints);
            }

            write_atomic(&self.working_path(proxy_type), lines(entries.iter().copied())).await?;
            info!(protocol = %proxy_type, count = entries.len(), "Published working list");
        }

        self.write_addresses(state).await?;
        write_atomic(
            &self.last_updated_path(),
            format!("{}\n", Utc::now().to_rfc3339()),
        )
        .await?;
        Ok(())
    }

    /// Export every deduplicated candidate as `host,port,protocol,source`
    pub async fn export_all(&self, proxies: &[Proxy]) -> Result<()> {
        let mut writer = csv::Writer::from_writer(Vec::new());
        writer.write_record(["host", "port", "protocol", "source"])?;
        for proxy in proxies {
            let port = proxy.port.to_string();
            writer.write_record([
                proxy.host.as_str(),
                port.as_str(),
                proxy.proxy_type.scheme(),
                proxy.source.as_str(),
            ])?;
        }
        let bytes = writer.into_inner().map_err(|e| anyhow::anyhow!("{}", e))?;
        write_atomic(&self.csv_path(), bytes).await?;
        info!(path = %self.csv_path().display(), rows = proxies.len(), "Exported candidates");
        Ok(())
    }
}

fn lines<'a>(items: impl Iterator<Item = &'a str>) -> String {
    let mut out = String::new();
    for item in items {
        out.push_str(item);
        out.push('\n');
    }
    out
}
