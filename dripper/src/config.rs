use std::collections::BTreeSet;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use util::{InterfaceAddress, TargetSet};

use crate::binding::BindMode;
use crate::bound_client::{BoundClient, ClientConfig};

/// Send a slow drip of GET requests, each from a random local address.
#[derive(Parser, Debug, Clone)]
#[command(author, version, about)]
pub struct Args {
    /// File with one target URL per line.
    #[arg(long)]
    pub targets_file: PathBuf,

    /// Only use addresses on this interface. Defaults to every interface.
    #[arg(long)]
    pub interface: Option<String>,

    /// Seconds to wait after each request before the next one.
    #[arg(long, default_value_t = 10)]
    pub interval: u64,

    /// Per-request timeout in seconds.
    #[arg(long, default_value_t = 10)]
    pub timeout: u64,

    /// How requests are pinned to their source.
    #[arg(long, value_enum, default_value_t = BindMode::Address)]
    pub bind: BindMode,

    /// Skip TLS certificate validation. For self-signed test targets only.
    #[arg(long)]
    pub insecure: bool,

    /// Seed for target/source selection.
    #[arg(long)]
    pub seed: Option<u64>,

    /// Re-enumerate interfaces every N seconds.
    #[arg(long)]
    pub refresh: Option<u64>,
}

impl Args {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval)
    }

    pub fn refresh_period(&self) -> Option<Duration> {
        self.refresh.map(Duration::from_secs)
    }

    pub fn rng(&self) -> ChaCha8Rng {
        match self.seed {
            Some(seed) => ChaCha8Rng::seed_from_u64(seed),
            None => ChaCha8Rng::from_entropy(),
        }
    }

    pub fn client(&self) -> BoundClient {
        let config = ClientConfig {
            timeout: Duration::from_secs(self.timeout),
            accept_invalid_certs: self.insecure,
        };
        BoundClient::new(config, self.bind.binding())
    }

    /// Targets first, then sources, so a bad target file fails before any
    /// interface is touched.
    pub fn load(&self) -> Result<(TargetSet, Vec<InterfaceAddress>)> {
        let targets = util::load_targets(&self.targets_file)
            .with_context(|| format!("loading targets from {}", self.targets_file.display()))?;

        let sources = util::sources_for(self.interface.as_deref())
            .context("discovering source addresses")?;

        Ok((targets, sources))
    }
}

/// Fail startup if the binding cannot be used on any interface we will send from.
pub fn probe(client: &BoundClient, sources: &[InterfaceAddress]) -> Result<()> {
    let interfaces: BTreeSet<&str> = sources.iter().map(|s| s.interface_name.as_str()).collect();

    for interface in interfaces {
        client
            .binding()
            .probe(interface)
            .with_context(|| format!("probing binding on {interface}"))?;
    }

    Ok(())
}
