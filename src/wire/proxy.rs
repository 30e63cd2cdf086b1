//! `WireProxy`: the worker-side client for a remote coordinator.
//!
//! Every call goes through three layers, in order: a reachability probe
//! (§4.C — plain TCP connect, no ICMP dependency), a fresh authenticated
//! connection, then one request/response frame pair. A failure at any
//! layer is retried up to `reconnect_tries` times with `reconnect_wait`
//! between attempts before the call gives up with `ConnectionError`.

use std::io;
use std::net::{SocketAddr, TcpStream, ToSocketAddrs};
use std::thread;
use std::time::Duration;

use serde::{de::DeserializeOwned, Serialize};

use crate::constants::{
    DEFAULT_CONNECT_TIMEOUT, DEFAULT_PING_RETRY, DEFAULT_PING_TIMEOUT, DEFAULT_RECONNECT_TRIES,
    DEFAULT_RECONNECT_WAIT,
};
use crate::error::{CorralError, Result};
use crate::wire::framing::{read_frame, write_frame};
use crate::wire::protocol::{Method, Request, Response, ServiceTarget};
use crate::wire::auth;

/// Tunable retry/timeout parameters for a [`WireProxy`]. Mirrors the
/// fields the spec calls out by name so a config file can set them
/// directly.
#[derive(Debug, Clone, Copy)]
pub struct RetryConfig {
    pub reconnect_tries: u32,
    pub reconnect_wait: Duration,
    pub ping_timeout: Duration,
    pub ping_retry: u32,
    pub connect_timeout: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            reconnect_tries: DEFAULT_RECONNECT_TRIES,
            reconnect_wait: DEFAULT_RECONNECT_WAIT,
            ping_timeout: DEFAULT_PING_TIMEOUT,
            ping_retry: DEFAULT_PING_RETRY,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
        }
    }
}

/// A raw, byte-oriented client for one coordinator address.
pub struct WireProxy {
    addr: SocketAddr,
    authkey: Vec<u8>,
    retry: RetryConfig,
}

impl WireProxy {
    /// Resolve `host:port` once at construction time; reconnects reuse
    /// the resolved address rather than re-resolving DNS on every retry.
    pub fn connect_to(host: &str, port: u16, authkey: Vec<u8>, retry: RetryConfig) -> Result<Self> {
        let addr = first_addr(host, port)?;
        Ok(Self { addr, authkey, retry })
    }

    /// Probe `self.addr` with up to `ping_retry` bare TCP connects of
    /// `ping_timeout` each. Returns `Ok(())` on the first success;
    /// `HostUnreachable` if every attempt fails.
    fn probe_reachable(&self) -> Result<()> {
        let mut last_err = None;
        for _ in 0..self.retry.ping_retry.max(1) {
            match TcpStream::connect_timeout(&self.addr, self.retry.ping_timeout) {
                Ok(_stream) => return Ok(()),
                Err(e) => last_err = Some(e),
            }
        }
        Err(CorralError::HostUnreachable(format!(
            "{}: {}",
            self.addr,
            last_err.map(|e| e.to_string()).unwrap_or_default()
        )))
    }

    fn connect_and_authenticate(&self) -> Result<TcpStream> {
        self.probe_reachable()?;
        let stream = TcpStream::connect_timeout(&self.addr, self.retry.connect_timeout)
            .map_err(|e| classify_connect_error(&self.addr, e))?;
        stream.set_nodelay(true).ok();
        let mut stream = stream;
        auth::initiate(&mut stream, &self.authkey)?;
        Ok(stream)
    }

    fn call_once(&self, request: &Request) -> Result<Vec<u8>> {
        let mut stream = self.connect_and_authenticate()?;
        let payload = bincode::serialize(request)?;
        write_frame(&mut stream, &payload)?;
        let response_bytes = read_frame(&mut stream)?;
        let response: Response = bincode::deserialize(&response_bytes)?;
        match response {
            Response::Ok(bytes) => Ok(bytes),
            Response::Err(kind, detail) => {
                log::debug!("remote error for {:?}/{:?}: {detail}", request.target, request.method);
                Err(kind.into())
            }
        }
    }

    /// Send `request`, retrying the whole connect+invoke sequence up to
    /// `reconnect_tries` times with `reconnect_wait` between attempts.
    ///
    /// Only a transport-level I/O failure (a reset mid-connect or
    /// mid-invoke) is retried. `Auth`, `Closed`, and every application-level
    /// `Response::Err` (`Empty`, `RemoteKey`, `RemoteValue`, a rejected
    /// state transition, …) are fatal for the call and surface immediately,
    /// unchanged by a retry — matching §4.C's "AuthFailed and Closed and
    /// KeyError are fatal for the call".
    pub fn call(&self, request: &Request) -> Result<Vec<u8>> {
        let mut last_err = None;
        for attempt in 0..self.retry.reconnect_tries.max(1) {
            match self.call_once(request) {
                Ok(bytes) => return Ok(bytes),
                Err(e) if !is_retryable(&e) => return Err(e),
                Err(e) => {
                    last_err = Some(e);
                    if attempt + 1 < self.retry.reconnect_tries.max(1) {
                        thread::sleep(self.retry.reconnect_wait);
                    }
                }
            }
        }
        Err(CorralError::ConnectionError(
            last_err.map(|e| e.to_string()).unwrap_or_default(),
        ))
    }
}

/// Whether `err` represents a transient transport failure worth retrying
/// the connect+invoke sequence for. `ConnectionRefused` is deliberately
/// excluded — §4.C treats a refused connection as "server absent" and
/// fails fast rather than spinning on a peer that isn't listening.
fn is_retryable(err: &CorralError) -> bool {
    matches!(err, CorralError::Io(_))
}

fn classify_connect_error(addr: &SocketAddr, e: io::Error) -> CorralError {
    if e.kind() == io::ErrorKind::ConnectionRefused {
        CorralError::ConnectionRefused(addr.to_string())
    } else {
        CorralError::HostUnreachable(format!("{addr}: {e}"))
    }
}

/// A typed convenience wrapper over [`WireProxy`], generic over the
/// argument (`A`), result (`R`), and constant-argument (`C`) types the
/// worker actually deals in. The coordinator's `Service` (see
/// `crate::coordinator::service`) uses the mirror-image encoding on its
/// side of each of these calls.
pub struct TypedProxy<A, R, C> {
    inner: WireProxy,
    _marker: std::marker::PhantomData<fn() -> (A, R, C)>,
}

impl<A, R, C> TypedProxy<A, R, C>
where
    A: Serialize + DeserializeOwned,
    R: Serialize + DeserializeOwned,
    C: Serialize + DeserializeOwned,
{
    #[must_use]
    pub fn new(inner: WireProxy) -> Self {
        Self { inner, _marker: std::marker::PhantomData }
    }

    /// Fetch and remove the next pending argument, blocking up to
    /// `timeout`.
    pub fn job_q_get(&self, block: bool, timeout: Duration) -> Result<A> {
        let request = Request::get(ServiceTarget::JobQ, block, timeout);
        let bytes = self.inner.call(&request)?;
        Ok(bincode::deserialize(&bytes)?)
    }

    /// Re-offer `arg` (used when a worker-child is interrupted mid-task).
    pub fn job_q_put(&self, arg: &A) -> Result<()> {
        let payload = bincode::serialize(arg)?;
        let request = Request::put(ServiceTarget::JobQ, Method::Put, payload, Duration::from_secs(30));
        self.inner.call(&request)?;
        Ok(())
    }

    /// Report a successful `(arg, result)` pair.
    pub fn result_q_put(&self, arg: &A, result: &R, timeout: Duration) -> Result<()> {
        let payload = bincode::serialize(&(arg, result))?;
        let request = Request::put(ServiceTarget::ResultQ, Method::PutResult, payload, timeout);
        self.inner.call(&request)?;
        Ok(())
    }

    /// Report a failed argument and the kind of error it raised.
    pub fn fail_q_put(&self, arg: &A, error_kind: &str, hostname: &str, timeout: Duration) -> Result<()> {
        let payload = bincode::serialize(&(arg, error_kind, hostname))?;
        let request = Request::put(ServiceTarget::FailQ, Method::PutResult, payload, timeout);
        self.inner.call(&request)?;
        Ok(())
    }

    /// Fetch the coordinator's read-only constant argument.
    pub fn const_arg_get(&self) -> Result<C> {
        let bytes = self.inner.call(&Request::get_const())?;
        Ok(bincode::deserialize(&bytes)?)
    }
}

pub(crate) fn first_addr(host: &str, port: u16) -> io::Result<SocketAddr> {
    (host, port)
        .to_socket_addrs()?
        .next()
        .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, format!("no address for {host}:{port}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wire::framing::{read_frame, write_frame};
    use std::net::TcpListener;

    fn spawn_echo_server(authkey: &'static [u8]) -> (SocketAddr, thread::JoinHandle<()>) {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let handle = thread::spawn(move || {
            let (mut stream, _) = listener.accept().unwrap();
            auth::respond(&mut stream, authkey).unwrap();
            let req_bytes = read_frame(&mut stream).unwrap();
            let req: Request = bincode::deserialize(&req_bytes).unwrap();
            let arg: u32 = bincode::deserialize(&req.payload).unwrap_or(7);
            let resp = Response::Ok(bincode::serialize(&(arg + 1)).unwrap());
            write_frame(&mut stream, &bincode::serialize(&resp).unwrap()).unwrap();
        });
        (addr, handle)
    }

    #[test]
    fn call_round_trips_through_a_real_socket() {
        let (addr, handle) = spawn_echo_server(b"sharedkey");
        let proxy = WireProxy {
            addr,
            authkey: b"sharedkey".to_vec(),
            retry: RetryConfig { reconnect_tries: 1, ..RetryConfig::default() },
        };
        let request = Request::put(ServiceTarget::JobQ, Method::Put, bincode::serialize(&41u32).unwrap(), Duration::from_secs(1));
        let bytes = proxy.call(&request).unwrap();
        let value: u32 = bincode::deserialize(&bytes).unwrap();
        assert_eq!(value, 42);
        handle.join().unwrap();
    }

    #[test]
    fn wrong_authkey_surfaces_as_connection_error() {
        let (addr, handle) = spawn_echo_server(b"serverkey");
        let proxy = WireProxy {
            addr,
            authkey: b"wrongkey".to_vec(),
            retry: RetryConfig {
                reconnect_tries: 1,
                reconnect_wait: Duration::from_millis(1),
                ..RetryConfig::default()
            },
        };
        let request = Request::get_const();
        let err = proxy.call(&request).unwrap_err();
        assert!(matches!(err, CorralError::Auth), "expected Auth, got {err:?}");
        let _ = handle.join();
    }

    #[test]
    fn unreachable_host_fails_fast_without_retrying() {
        let proxy = WireProxy {
            addr: "127.0.0.1:1".parse().unwrap(),
            authkey: b"key".to_vec(),
            retry: RetryConfig {
                reconnect_tries: 5,
                ping_retry: 1,
                ping_timeout: Duration::from_millis(50),
                ..RetryConfig::default()
            },
        };
        let started = std::time::Instant::now();
        let err = proxy.call(&Request::get_const()).unwrap_err();
        assert!(matches!(err, CorralError::HostUnreachable(_)), "expected HostUnreachable, got {err:?}");
        // A retryable classification would have waited `reconnect_wait` between
        // each of 5 attempts; fail-fast means this returns well under that.
        assert!(started.elapsed() < RetryConfig::default().reconnect_wait * 2);
    }

    #[test]
    fn empty_response_is_not_retried() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let handle = thread::spawn(move || {
            let (mut stream, _) = listener.accept().unwrap();
            auth::respond(&mut stream, b"sharedkey").unwrap();
            let _req_bytes = read_frame(&mut stream).unwrap();
            let resp = Response::Err(crate::wire::protocol::RemoteErrorKind::Empty, "nothing pending".into());
            write_frame(&mut stream, &bincode::serialize(&resp).unwrap()).unwrap();
        });
        let proxy = WireProxy {
            addr,
            authkey: b"sharedkey".to_vec(),
            retry: RetryConfig { reconnect_tries: 5, reconnect_wait: Duration::from_secs(5), ..RetryConfig::default() },
        };
        let started = std::time::Instant::now();
        let err = proxy.call(&Request::get_const()).unwrap_err();
        assert!(matches!(err, CorralError::Empty), "expected Empty, got {err:?}");
        assert!(started.elapsed() < Duration::from_secs(1), "Empty should fail fast, not retry");
        handle.join().unwrap();
    }
}
