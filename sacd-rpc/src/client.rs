//! Client-side plumbing: connections, retry, heartbeat.
use crate::error::RpcError;
use crate::frame::{read_frame, write_frame};
use crate::message::Ping;
use log::{error, info, warn};
use serde::{de::DeserializeOwned, Serialize};
use std::net::TcpStream;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Milliseconds since the Unix epoch.
pub fn unix_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// A lazily-connected unary call channel.
///
/// The TCP stream is established on first use and dropped on any error,
/// so the next call reconnects. One request/response exchange holds the
/// internal lock for its whole duration; calls from multiple threads
/// serialize.
pub struct Connection {
    addr: String,
    stream: Mutex<Option<TcpStream>>,
}

impl Connection {
    /// Creates a channel to `addr` without connecting yet.
    pub fn new(addr: impl Into<String>) -> Self {
        Self {
            addr: addr.into(),
            stream: Mutex::new(None),
        }
    }

    /// Target address.
    pub fn addr(&self) -> &str {
        &self.addr
    }

    /// Performs one unary call.
    pub fn call<Req, Resp>(&self, req: &Req) -> Result<Resp, RpcError>
    where
        Req: Serialize,
        Resp: DeserializeOwned,
    {
        let mut guard = self.stream.lock().unwrap();
        if guard.is_none() {
            let stream = TcpStream::connect(&self.addr)?;
            stream.set_nodelay(true)?;
            *guard = Some(stream);
        }
        // The unwrap cannot fail: the stream was just ensured above.
        let stream = guard.as_mut().unwrap();
        let result = write_frame(stream, req).and_then(|_| read_frame(stream));
        if result.is_err() {
            *guard = None;
        }
        result
    }
}

/// Bounded retry of a fallible call.
///
/// Each failure is logged; the last error is surfaced when the budget
/// runs out. Expected steady-state conditions (empty buffer, not-ready
/// flags) are values, not errors, and never pass through here.
pub struct Retry {
    budget: usize,
    backoff: Duration,
}

impl Default for Retry {
    fn default() -> Self {
        Self {
            budget: 3,
            backoff: Duration::from_secs(1),
        }
    }
}

impl Retry {
    /// Creates a policy retrying up to `budget` times with a fixed pause.
    pub fn new(budget: usize, backoff: Duration) -> Self {
        Self { budget, backoff }
    }

    /// Runs `f` until it succeeds or the budget is exhausted.
    pub fn run<T>(
        &self,
        name: &str,
        mut f: impl FnMut() -> Result<T, RpcError>,
    ) -> Result<T, RpcError> {
        let mut last = None;
        for attempt in 1..=self.budget {
            match f() {
                Ok(v) => return Ok(v),
                Err(e) => {
                    error!("{} failed (attempt {}/{}): {}", name, attempt, self.budget, e);
                    last = Some(e);
                    if attempt < self.budget {
                        thread::sleep(self.backoff);
                    }
                }
            }
        }
        // budget >= 1 is enforced by construction via usage; an empty
        // budget degenerates to an immediate disconnect error.
        Err(last.unwrap_or(RpcError::Disconnected))
    }
}

/// Background heartbeat owning the `connected` flag of one peer link.
///
/// A dedicated thread pings at a fixed interval on its own connection.
/// The flag goes up on the first successful pong and down on the first
/// transport error; after an error the thread pauses for the reconnect
/// delay and starts over. Callers poll [`connected`](Heartbeat::connected)
/// and pause rather than abort while the link is down.
pub struct Heartbeat {
    connected: Arc<AtomicBool>,
    closed: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl Heartbeat {
    /// Spawns the heartbeat thread.
    ///
    /// `ping` performs one ping/pong exchange. `learner_id` is read before
    /// every ping and carried in it, so a process can attach its id once
    /// it has registered and the remote side can tie the link to the
    /// registration.
    pub fn spawn<F>(
        name: &str,
        learner_id: Arc<Mutex<Option<u64>>>,
        interval: Duration,
        reconnect_delay: Duration,
        ping: F,
    ) -> Self
    where
        F: Fn(Ping) -> Result<(), RpcError> + Send + 'static,
    {
        let connected = Arc::new(AtomicBool::new(false));
        let closed = Arc::new(AtomicBool::new(false));
        let name = name.to_string();

        let handle = {
            let connected = connected.clone();
            let closed = closed.clone();
            thread::spawn(move || {
                while !closed.load(Ordering::Relaxed) {
                    let result = ping(Ping {
                        time_ms: unix_millis(),
                        learner_id: *learner_id.lock().unwrap(),
                    });
                    match result {
                        Ok(()) => {
                            if !connected.swap(true, Ordering::Relaxed) {
                                info!("{} connected", name);
                            }
                            thread::sleep(interval);
                        }
                        Err(e) => {
                            if connected.swap(false, Ordering::Relaxed) {
                                error!("{} disconnected: {}", name, e);
                            }
                            thread::sleep(reconnect_delay);
                        }
                    }
                }
            })
        };

        Self {
            connected,
            closed,
            handle: Some(handle),
        }
    }

    /// Current link state.
    pub fn connected(&self) -> bool {
        self.connected.load(Ordering::Relaxed)
    }

    /// Shared handle on the link state, for loops that outlive `self`.
    pub fn connected_flag(&self) -> Arc<AtomicBool> {
        self.connected.clone()
    }

    /// Stops the heartbeat thread.
    pub fn stop(&mut self) {
        self.closed.store(true, Ordering::Relaxed);
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                warn!("Heartbeat thread panicked");
            }
        }
    }
}

impl Drop for Heartbeat {
    fn drop(&mut self) {
        self.stop();
    }
}
