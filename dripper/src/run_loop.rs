use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use rand_chacha::ChaCha8Rng;
use tokio::time::Instant;
use util::{InterfaceAddress, TargetSet};

use crate::bound_client::{pick_user_agent, RequestOutcome, Sender};

pub const DEFAULT_INTERVAL: Duration = Duration::from_secs(10);

/// Produces a fresh source snapshot.
pub type Refresh = Box<dyn FnMut() -> Result<Vec<InterfaceAddress>, util::Error> + Send>;

/// Owns the targets and the source snapshot, and paces requests one at a time.
pub struct Dispatcher<S> {
    targets: TargetSet,
    sources: Arc<[InterfaceAddress]>,
    sender: S,
    rng: ChaCha8Rng,
    interval: Duration,
    refresh: Option<(Duration, Refresh)>,
    refreshed_at: Instant,
}

impl<S: Sender> Dispatcher<S> {
    /// `targets` is non-empty by construction (`TargetSet::new` refuses an
    /// empty list); an empty `sources` fails with `NoUsableSources`.
    pub fn new(
        targets: TargetSet,
        sources: Vec<InterfaceAddress>,
        sender: S,
        rng: ChaCha8Rng,
    ) -> Result<Self, util::Error> {
        if sources.is_empty() {
            return Err(util::Error::NoUsableSources);
        }

        Ok(Dispatcher {
            targets,
            sources: sources.into(),
            sender,
            rng,
            interval: DEFAULT_INTERVAL,
            refresh: None,
            refreshed_at: Instant::now(),
        })
    }

    /// Spacing between the end of one request and the start of the next.
    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    /// Re-enumerate sources every `period`.
    pub fn with_refresh(mut self, period: Duration, refresh: Refresh) -> Self {
        self.refresh = Some((period, refresh));
        self.refreshed_at = Instant::now();
        self
    }

    pub fn sources(&self) -> Arc<[InterfaceAddress]> {
        self.sources.clone()
    }

    /// Pick one target and one source, each uniformly at random.
    pub fn pick(&mut self) -> (String, InterfaceAddress) {
        let target = self.targets.choose(&mut self.rng).to_string();
        let source = self.sources[self.rng.gen_range(0..self.sources.len())].clone();
        (target, source)
    }

    /// One dispatch tick without the trailing sleep.
    pub async fn tick(&mut self) -> RequestOutcome {
        // A due refresh replaces the snapshot before we draw from it.
        self.maybe_refresh();

        // Target, source and User-Agent all come from the one seeded generator,
        // so a given seed replays the same sequence.
        let (target, source) = self.pick();
        let user_agent = pick_user_agent(&mut self.rng);

        // Failures come back inside the outcome. Nothing here can end the loop.
        let outcome = self.sender.send(&target, &source, user_agent).await;
        report(&outcome);

        outcome
    }

    /// Runs until the process is terminated.
    pub async fn run(mut self) {
        info!(
            "Dispatching to {} targets from {} sources every {:?}",
            self.targets.len(),
            self.sources.len(),
            self.interval
        );

        loop {
            self.tick().await;

            // Measured from the end of the request, so latency adds to the period.
            tokio::time::sleep(self.interval).await;
        }
    }

    fn maybe_refresh(&mut self) {
        let Some((period, refresh)) = &mut self.refresh else {
            return;
        };
        if self.refreshed_at.elapsed() < *period {
            return;
        }
        self.refreshed_at = Instant::now();

        match refresh() {
            Ok(sources) if !sources.is_empty() => {
                info!("Refreshed sources: {}", describe(&sources));
                // Swap the whole snapshot; readers holding the old Arc keep it intact.
                self.sources = sources.into();
            }
            Ok(_) => {
                warn!("Source refresh found no usable addresses; keeping previous snapshot");
            }
            Err(error) => {
                warn!("Source refresh failed; keeping previous snapshot: {}", error);
            }
        }
    }
}

/// Log one line for the attempt.
pub fn report(outcome: &RequestOutcome) {
    match &outcome.status {
        Ok(status) => info!(
            target_url = %outcome.target,
            source = %outcome.source.address,
            interface = %outcome.source.interface_name,
            latency_ms = outcome.latency.as_millis() as u64,
            "Request to {} from {} returned status {}",
            outcome.target,
            outcome.source,
            status
        ),
        Err(error) => warn!(
            target_url = %outcome.target,
            source = %outcome.source.address,
            interface = %outcome.source.interface_name,
            latency_ms = outcome.latency.as_millis() as u64,
            "Request to {} from {} failed: {}",
            outcome.target,
            outcome.source,
            error
        ),
    }
}

pub fn describe(sources: &[InterfaceAddress]) -> String {
    sources
        .iter()
        .map(|s| s.to_string())
        .collect::<Vec<_>>()
        .join(", ")
}
