use std::error::Error as StdError;
use std::future::Future;
use std::io;
use std::time::{Duration, Instant};

use rand::Rng;
use reqwest::redirect::Policy;
use util::InterfaceAddress;

use crate::binding::Binding;

pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

/// Matches the redirect limit of common HTTP client defaults.
pub const MAX_REDIRECTS: usize = 10;

/// User-Agent values rotated per request.
pub const USER_AGENTS: &[&str] = &[
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 14_4) AppleWebKit/605.1.15 (KHTML, like Gecko) Version/17.4 Safari/605.1.15",
    "Mozilla/5.0 (X11; Linux x86_64; rv:125.0) Gecko/20100101 Firefox/125.0",
    "Mozilla/5.0 (iPhone; CPU iPhone OS 17_4 like Mac OS X) AppleWebKit/605.1.15 (KHTML, like Gecko) Version/17.4 Mobile/15E148 Safari/604.1",
    "Mozilla/5.0 (Linux; Android 14; Pixel 8) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0.0.0 Mobile Safari/537.36",
];

pub fn pick_user_agent<R: Rng>(rng: &mut R) -> &'static str {
    USER_AGENTS[rng.gen_range(0..USER_AGENTS.len())]
}

/// Why a single request failed. None of these stop the dispatch loop.
#[derive(Debug, thiserror::Error)]
pub enum RequestError {
    /// No route, refused, or the bound source could not reach the destination.
    #[error("connect failed: {0}")]
    ConnectFailed(String),

    #[error("timed out after {0:?}")]
    Timeout(Duration),

    #[error("TLS certificate validation failed: {0}")]
    TlsValidationFailed(String),

    #[error("protocol error: {0}")]
    ProtocolError(String),

    #[error("binding to device {interface} requires elevated privilege")]
    InsufficientPrivilege { interface: String },

    #[error("device binding is not supported on this platform")]
    DeviceBindUnsupported,
}

/// What happened to one request.
#[derive(Debug)]
pub struct RequestOutcome {
    pub target: String,
    pub source: InterfaceAddress,
    /// HTTP status code, or why there was none.
    pub status: Result<u16, RequestError>,
    pub latency: Duration,
}

/// Something that can perform one request from a given source.
pub trait Sender {
    fn send(
        &self,
        url: &str,
        source: &InterfaceAddress,
        user_agent: &str,
    ) -> impl Future<Output = RequestOutcome> + Send;
}

#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub timeout: Duration,
    /// Accept any server certificate. Only for test targets with self-signed certs.
    pub accept_invalid_certs: bool,
}

impl Default for ClientConfig {
    fn default() -> Self {
        ClientConfig {
            timeout: DEFAULT_TIMEOUT,
            accept_invalid_certs: false,
        }
    }
}

/// Issues each request through a freshly built client bound to the request's source.
///
/// Nothing is pooled across calls: the client, and every connection it opened,
/// is dropped when the call returns.
#[derive(Debug)]
pub struct BoundClient {
    config: ClientConfig,
    binding: Box<dyn Binding>,
}

impl BoundClient {
    pub fn new(config: ClientConfig, binding: Box<dyn Binding>) -> Self {
        BoundClient { config, binding }
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    pub fn binding(&self) -> &dyn Binding {
        self.binding.as_ref()
    }

    fn build(
        &self,
        source: &InterfaceAddress,
        user_agent: &str,
    ) -> Result<reqwest::Client, RequestError> {
        let builder = reqwest::Client::builder()
            .user_agent(user_agent)
            .timeout(self.config.timeout)
            .connect_timeout(self.config.timeout)
            .redirect(Policy::limited(MAX_REDIRECTS))
            // A proxy would make the proxy, not us, the peer of the target.
            .no_proxy()
            // Keep nothing idle. The client is dropped after one request anyway.
            .pool_max_idle_per_host(0)
            .danger_accept_invalid_certs(self.config.accept_invalid_certs);

        // The binding lands on the connector, which every hop of a redirect
        // chain goes through.
        let builder = self.binding.apply(builder, source)?;

        builder
            .build()
            .map_err(|e| RequestError::ConnectFailed(format!("client setup: {}", chain(&e))))
    }

    async fn get(
        &self,
        url: &str,
        source: &InterfaceAddress,
        user_agent: &str,
    ) -> Result<u16, RequestError> {
        let client = self.build(source, user_agent)?;

        // Only the status is kept. The body is dropped unread with the response.
        let response = client.get(url).send().await.map_err(|e| {
            let failure = Failure {
                timed_out: e.is_timeout(),
                connect: e.is_connect(),
                device: self.binding.is_device(),
            };
            classify(&e, failure, self.config.timeout, source)
        })?;

        Ok(response.status().as_u16())
    }
}

impl Sender for BoundClient {
    async fn send(&self, url: &str, source: &InterfaceAddress, user_agent: &str) -> RequestOutcome {
        let start = Instant::now();
        let status = self.get(url, source, user_agent).await;

        RequestOutcome {
            target: url.to_string(),
            source: source.clone(),
            status,
            latency: start.elapsed(),
        }
    }
}

/// What the HTTP layer says about a failure, beyond its error chain.
#[derive(Debug, Clone, Copy, Default)]
struct Failure {
    timed_out: bool,
    connect: bool,
    /// The client was device-bound.
    device: bool,
}

fn classify(
    err: &(dyn StdError + 'static),
    failure: Failure,
    timeout: Duration,
    source: &InterfaceAddress,
) -> RequestError {
    // A timeout wins over whatever the connection was doing when it fired.
    if failure.timed_out {
        return RequestError::Timeout(timeout);
    }

    // EPERM only means missing privilege when we asked for SO_BINDTODEVICE.
    // Otherwise it is a firewall or similar refusing the connect.
    if failure.device && is_permission_denied(err) {
        return RequestError::InsufficientPrivilege {
            interface: source.interface_name.clone(),
        };
    }

    if is_certificate_error(err) {
        return RequestError::TlsValidationFailed(chain(err));
    }

    if failure.connect || is_permission_denied(err) {
        return RequestError::ConnectFailed(chain(err));
    }

    // Bad URLs, too many redirects and malformed responses.
    RequestError::ProtocolError(chain(err))
}

/// Iterate `err` and its sources.
fn sources<'a>(
    err: &'a (dyn StdError + 'static),
) -> impl Iterator<Item = &'a (dyn StdError + 'static)> {
    std::iter::successors(Some(err), |e| (*e).source())
}

/// Whole source chain on one line, `outer: inner: root`.
pub(crate) fn chain(err: &(dyn StdError + 'static)) -> String {
    sources(err)
        .map(|e| e.to_string())
        .collect::<Vec<_>>()
        .join(": ")
}

pub(crate) fn is_permission_denied(err: &(dyn StdError + 'static)) -> bool {
    sources(err)
        .filter_map(|e| e.downcast_ref::<io::Error>())
        .any(|e| e.kind() == io::ErrorKind::PermissionDenied)
}

/// rustls rejects a peer chain with `InvalidCertificate`. The TLS stream hands
/// it up wrapped in an `io::Error`, whose `source()` skips the wrapped error,
/// so look inside with `get_ref()`.
pub(crate) fn is_certificate_error(err: &(dyn StdError + 'static)) -> bool {
    sources(err).any(|e| {
        let tls = e.downcast_ref::<rustls::Error>().or_else(|| {
            e.downcast_ref::<io::Error>()
                .and_then(|io| io.get_ref())
                .and_then(|inner| inner.downcast_ref::<rustls::Error>())
        });
        matches!(tls, Some(rustls::Error::InvalidCertificate(_)))
    })
}
