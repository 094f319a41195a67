//! Frame server: one thread per connection, a [`Service`] for dispatch.
use crate::error::RpcError;
use crate::frame::{read_frame, write_frame};
use log::{info, warn};
use serde::{de::DeserializeOwned, Serialize};
use std::io;
use std::net::{SocketAddr, TcpListener, ToSocketAddrs};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

const ACCEPT_POLL: Duration = Duration::from_millis(20);

/// Request dispatch of one server process.
///
/// `handle` runs on the connection's thread; implementations synchronize
/// their own state. Connection lifecycle hooks see the peer address that
/// [`PeerSet`](crate::PeerSet) keys on.
pub trait Service: Send + Sync + 'static {
    /// Request enum of the service.
    type Request: DeserializeOwned + Send;

    /// Response enum of the service.
    type Response: Serialize;

    /// Answers one request.
    fn handle(&self, peer: SocketAddr, req: Self::Request) -> Self::Response;

    /// Called when a connection opens.
    fn on_connect(&self, _peer: SocketAddr) {}

    /// Called when a connection closes.
    fn on_disconnect(&self, _peer: SocketAddr) {}
}

/// Running server; stops on [`stop`](ServerHandle::stop) or drop.
pub struct ServerHandle {
    local_addr: SocketAddr,
    stop: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl ServerHandle {
    /// Address the server is bound to; useful with port 0.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Stops accepting connections.
    ///
    /// Threads serving already-open connections run until their peer
    /// hangs up.
    pub fn stop(&mut self) {
        self.stop.store(true, Ordering::Relaxed);
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                warn!("Accept thread panicked");
            }
        }
    }
}

impl Drop for ServerHandle {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Binds `addr` and serves `service` until the handle is stopped.
pub fn serve<S: Service>(addr: impl ToSocketAddrs, service: Arc<S>) -> io::Result<ServerHandle> {
    let listener = TcpListener::bind(addr)?;
    let local_addr = listener.local_addr()?;
    listener.set_nonblocking(true)?;
    info!("Serving on {}", local_addr);

    let stop = Arc::new(AtomicBool::new(false));
    let handle = {
        let stop = stop.clone();
        thread::spawn(move || {
            while !stop.load(Ordering::Relaxed) {
                match listener.accept() {
                    Ok((stream, peer)) => {
                        let service = service.clone();
                        thread::spawn(move || serve_connection(service, stream, peer));
                    }
                    Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                        thread::sleep(ACCEPT_POLL);
                    }
                    Err(e) => {
                        warn!("Accept failed on {}: {}", local_addr, e);
                        thread::sleep(ACCEPT_POLL);
                    }
                }
            }
        })
    };

    Ok(ServerHandle {
        local_addr,
        stop,
        handle: Some(handle),
    })
}

fn serve_connection<S: Service>(service: Arc<S>, mut stream: std::net::TcpStream, peer: SocketAddr) {
    if let Err(e) = stream.set_nodelay(true) {
        warn!("set_nodelay failed for {}: {}", peer, e);
    }
    service.on_connect(peer);
    loop {
        let req = match read_frame::<S::Request>(&mut stream) {
            Ok(req) => req,
            Err(RpcError::Disconnected) => break,
            Err(e) => {
                warn!("Dropping connection of {}: {}", peer, e);
                break;
            }
        };
        let resp = service.handle(peer, req);
        if let Err(e) = write_frame(&mut stream, &resp) {
            warn!("Dropping connection of {}: {}", peer, e);
            break;
        }
    }
    service.on_disconnect(peer);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::Connection;
    use serde::Deserialize;
    use std::sync::atomic::AtomicUsize;

    #[derive(Deserialize, Serialize)]
    enum Req {
        Double(i64),
    }

    #[derive(Deserialize, Serialize)]
    enum Resp {
        Doubled(i64),
    }

    #[derive(Default)]
    struct Doubler {
        connections: AtomicUsize,
        disconnections: AtomicUsize,
    }

    impl Service for Doubler {
        type Request = Req;
        type Response = Resp;

        fn handle(&self, _peer: SocketAddr, req: Req) -> Resp {
            let Req::Double(n) = req;
            Resp::Doubled(2 * n)
        }

        fn on_connect(&self, _peer: SocketAddr) {
            self.connections.fetch_add(1, Ordering::SeqCst);
        }

        fn on_disconnect(&self, _peer: SocketAddr) {
            self.disconnections.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn test_unary_calls_and_lifecycle() {
        let service = Arc::new(Doubler::default());
        let mut server = serve("127.0.0.1:0", service.clone()).unwrap();

        {
            let conn = Connection::new(server.local_addr().to_string());
            for n in 0..5 {
                let Resp::Doubled(m) = conn.call::<_, Resp>(&Req::Double(n)).unwrap();
                assert_eq!(m, 2 * n);
            }
        }

        // connection drops above; give the handler thread a moment
        for _ in 0..100 {
            if service.disconnections.load(Ordering::SeqCst) == 1 {
                break;
            }
            thread::sleep(Duration::from_millis(10));
        }
        assert_eq!(service.connections.load(Ordering::SeqCst), 1);
        assert_eq!(service.disconnections.load(Ordering::SeqCst), 1);

        server.stop();
    }
}
