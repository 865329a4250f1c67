use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::mpsc::Sender as StopSender;
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use dripper::bound_client::USER_AGENTS;
use dripper::{AddressBind, Binding, BoundClient, ClientConfig, DeviceBind, RequestError, Sender};
use rouille::{Request, Response};
use util::InterfaceAddress;

const CERT_CRT: &[u8] = include_bytes!("certs/crt.pem");
const CERT_KEY: &[u8] = include_bytes!("certs/key.pem");

/// A web server that records the peer address and User-Agent of every request.
struct PeerLog {
    scheme: &'static str,
    addr: SocketAddr,
    seen: Seen,
    stop: Option<StopSender<()>>,
    handle: Option<JoinHandle<()>>,
}

type Seen = Arc<Mutex<Vec<(IpAddr, String)>>>;

fn recording(
    log: Seen,
    respond: impl Fn(&Request) -> Response + Send + Sync + 'static,
) -> impl Fn(&Request) -> Response + Send + Sync + 'static {
    move |request: &Request| {
        let agent = request.header("User-Agent").unwrap_or_default().to_string();
        log.lock().unwrap().push((request.remote_addr().ip(), agent));
        respond(request)
    }
}

impl PeerLog {
    fn start(bind: &str, respond: impl Fn(&Request) -> Response + Send + Sync + 'static) -> Self {
        let seen = Seen::default();
        let server = rouille::Server::new(bind, recording(seen.clone(), respond))
            .expect("test server to bind");

        Self::run("http", server, seen)
    }

    /// Same, over TLS with a self-signed certificate for 127.0.0.1.
    fn start_tls(
        bind: &str,
        respond: impl Fn(&Request) -> Response + Send + Sync + 'static,
    ) -> Self {
        let seen = Seen::default();
        let server = rouille::Server::new_ssl(
            bind,
            recording(seen.clone(), respond),
            CERT_CRT.to_vec(),
            CERT_KEY.to_vec(),
        )
        .expect("test TLS server to bind");

        Self::run("https", server, seen)
    }

    fn run<F>(scheme: &'static str, server: rouille::Server<F>, seen: Seen) -> Self
    where
        F: Fn(&Request) -> Response + Send + Sync + 'static,
    {
        let addr = server.server_addr();
        let (handle, stop) = server.stoppable();

        PeerLog {
            scheme,
            addr,
            seen,
            stop: Some(stop),
            handle: Some(handle),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}://{}{}", self.scheme, self.addr, path)
    }

    fn peers(&self) -> Vec<IpAddr> {
        self.seen.lock().unwrap().iter().map(|(ip, _)| *ip).collect()
    }

    fn agents(&self) -> Vec<String> {
        self.seen.lock().unwrap().iter().map(|(_, a)| a.clone()).collect()
    }
}

impl Drop for PeerLog {
    fn drop(&mut self) {
        if let Some(stop) = self.stop.take() {
            let _ = stop.send(());
        }
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

fn source(address: &str) -> InterfaceAddress {
    InterfaceAddress {
        address: address.parse().unwrap(),
        interface_name: "lo".into(),
    }
}

fn client(timeout: Duration) -> BoundClient {
    BoundClient::new(
        ClientConfig {
            timeout,
            ..Default::default()
        },
        Box::new(AddressBind),
    )
}

// Linux routes all of 127.0.0.0/8 to lo, so distinct loopback addresses can
// stand in for distinct local sources and distinct hosts.
#[cfg(target_os = "linux")]
const SOURCE: &str = "127.0.0.2";
#[cfg(not(target_os = "linux"))]
const SOURCE: &str = "127.0.0.1";

#[cfg(target_os = "linux")]
const OTHER_HOST: &str = "127.0.0.3:0";
#[cfg(not(target_os = "linux"))]
const OTHER_HOST: &str = "127.0.0.1:0";

#[tokio::test]
async fn server_sees_bound_source() {
    let server = PeerLog::start("127.0.0.1:0", |_| Response::text("ok"));

    let outcome = client(Duration::from_secs(5))
        .send(&server.url("/"), &source(SOURCE), USER_AGENTS[0])
        .await;

    assert_eq!(outcome.status.unwrap(), 200);
    assert_eq!(outcome.target, server.url("/"));
    assert_eq!(outcome.source, source(SOURCE));
    assert_eq!(server.peers(), [SOURCE.parse::<IpAddr>().unwrap()]);
    assert_eq!(server.agents(), [USER_AGENTS[0]]);
}

#[tokio::test]
async fn redirect_to_other_host_keeps_source() {
    let landing = PeerLog::start(OTHER_HOST, |_| Response::text("landed"));
    let target = landing.url("/landing");
    let entry = PeerLog::start("127.0.0.1:0", move |_| Response::redirect_302(target.clone()));

    let outcome = client(Duration::from_secs(5))
        .send(&entry.url("/start"), &source(SOURCE), USER_AGENTS[1])
        .await;

    let expected: IpAddr = SOURCE.parse().unwrap();
    assert_eq!(outcome.status.unwrap(), 200);
    assert_eq!(entry.peers(), [expected]);
    assert_eq!(landing.peers(), [expected]);
}

#[tokio::test]
async fn error_statuses_are_outcomes() {
    let server = PeerLog::start("127.0.0.1:0", |_| Response::empty_404());

    let outcome = client(Duration::from_secs(5))
        .send(&server.url("/missing"), &source(SOURCE), USER_AGENTS[2])
        .await;

    assert_eq!(outcome.status.unwrap(), 404);
}

#[tokio::test]
async fn silent_server_times_out() {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        // Accept and hold connections without ever answering.
        let mut held = Vec::new();
        while let Ok((stream, _)) = listener.accept().await {
            held.push(stream);
        }
    });

    let timeout = Duration::from_millis(500);
    let start = Instant::now();
    let outcome = client(timeout)
        .send(&format!("http://{addr}/"), &source("127.0.0.1"), USER_AGENTS[0])
        .await;
    let elapsed = start.elapsed();

    assert!(matches!(outcome.status, Err(RequestError::Timeout(t)) if t == timeout));
    assert!(elapsed >= timeout, "gave up early after {elapsed:?}");
    assert!(
        elapsed < timeout + Duration::from_millis(1500),
        "gave up late after {elapsed:?}"
    );
}

#[tokio::test]
async fn refused_connection_is_connect_failed() {
    let port = {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        listener.local_addr().unwrap().port()
    };

    let outcome = client(Duration::from_secs(5))
        .send(
            &format!("http://127.0.0.1:{port}/"),
            &source("127.0.0.1"),
            USER_AGENTS[0],
        )
        .await;

    assert!(matches!(outcome.status, Err(RequestError::ConnectFailed(_))));
}

#[tokio::test]
async fn foreign_source_address_is_connect_failed() {
    let server = PeerLog::start("127.0.0.1:0", |_| Response::text("ok"));
    // TEST-NET-1, never assigned to a local interface.
    let foreign = InterfaceAddress {
        address: Ipv4Addr::new(192, 0, 2, 1),
        interface_name: "eth0".into(),
    };

    let outcome = client(Duration::from_secs(5))
        .send(&server.url("/"), &foreign, USER_AGENTS[0])
        .await;

    assert!(matches!(outcome.status, Err(RequestError::ConnectFailed(_))));
    assert!(server.peers().is_empty());
}

#[tokio::test]
async fn malformed_target_fails_without_panicking() {
    let outcome = client(Duration::from_secs(1))
        .send("not a url", &source("127.0.0.1"), USER_AGENTS[0])
        .await;

    assert!(matches!(
        outcome.status,
        Err(RequestError::ProtocolError(_)) | Err(RequestError::ConnectFailed(_))
    ));
}

#[tokio::test]
async fn self_signed_target_fails_validation_by_default() {
    let server = PeerLog::start_tls("127.0.0.1:0", |_| Response::text("secure"));

    let outcome = client(Duration::from_secs(5))
        .send(&server.url("/"), &source(SOURCE), USER_AGENTS[0])
        .await;

    assert!(
        matches!(outcome.status, Err(RequestError::TlsValidationFailed(_))),
        "got {:?}",
        outcome.status
    );
    // The handshake was refused, so no request ever reached the handler.
    assert!(server.peers().is_empty());
}

#[tokio::test]
async fn insecure_mode_reaches_self_signed_target_from_bound_source() {
    let server = PeerLog::start_tls("127.0.0.1:0", |_| Response::text("secure"));
    let insecure = BoundClient::new(
        ClientConfig {
            timeout: Duration::from_secs(5),
            accept_invalid_certs: true,
        },
        Box::new(AddressBind),
    );

    let outcome = insecure
        .send(&server.url("/"), &source(SOURCE), USER_AGENTS[3])
        .await;

    assert_eq!(outcome.status.unwrap(), 200);
    assert_eq!(server.peers(), [SOURCE.parse::<IpAddr>().unwrap()]);
    assert_eq!(server.agents(), [USER_AGENTS[3]]);
}

/// `SO_BINDTODEVICE` needs `CAP_NET_RAW`; without it there is nothing to exercise.
#[cfg(target_os = "linux")]
fn device_bind_available() -> bool {
    !matches!(
        DeviceBind.probe("lo"),
        Err(RequestError::InsufficientPrivilege { .. })
    )
}

#[cfg(target_os = "linux")]
#[tokio::test]
async fn device_bind_sends_from_source_on_lo() {
    if !device_bind_available() {
        return;
    }
    assert!(DeviceBind.probe("lo").is_ok());
    let server = PeerLog::start("127.0.0.1:0", |_| Response::text("ok"));
    let bound = BoundClient::new(
        ClientConfig {
            timeout: Duration::from_secs(5),
            ..Default::default()
        },
        Box::new(DeviceBind),
    );

    let outcome = bound
        .send(&server.url("/"), &source(SOURCE), USER_AGENTS[4])
        .await;

    assert_eq!(outcome.status.unwrap(), 200);
    assert_eq!(server.peers(), [SOURCE.parse::<IpAddr>().unwrap()]);
}

#[cfg(target_os = "linux")]
#[test]
fn device_probe_of_unknown_interface_fails() {
    if !device_bind_available() {
        return;
    }

    let err = DeviceBind.probe("no-such-if0").unwrap_err();

    assert!(matches!(err, RequestError::ConnectFailed(_)), "got {err:?}");
}
