//! Typed client stubs for the evolver and learner services.
//!
//! Each stub owns two connections: one for unary calls and one driven by
//! the heartbeat thread. Registration helpers block until they succeed,
//! pausing while the link is down; everything else retries within a
//! bounded budget and surfaces the last error.
use crate::client::{Connection, Heartbeat, Retry};
use crate::error::RpcError;
use crate::message::{
    ActorRegistration, EvolverRequest, EvolverResponse, LearnerAddr, LearnerRequest,
    LearnerResponse,
};
use log::info;
use sacd_core::{Episode, NdArray};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

fn wait_connected(name: &str, heartbeat: &Heartbeat, delay: Duration) {
    if heartbeat.connected() {
        return;
    }
    info!("Waiting for {} connection", name);
    while !heartbeat.connected() {
        thread::sleep(delay);
    }
}

/// Client of the evolver service.
pub struct EvolverStub {
    conn: Connection,
    heartbeat: Heartbeat,
    learner_id: Arc<Mutex<Option<u64>>>,
    retry: Retry,
    reconnect_delay: Duration,
}

impl EvolverStub {
    /// Connects to the evolver at `addr`.
    pub fn new(
        addr: impl Into<String>,
        ping_interval: Duration,
        reconnect_delay: Duration,
    ) -> Self {
        let addr = addr.into();
        info!("Starting evolver stub [{}]", addr);
        let learner_id = Arc::new(Mutex::new(None));
        let ping_conn = Connection::new(addr.clone());
        let heartbeat = Heartbeat::spawn(
            "Evolver",
            learner_id.clone(),
            ping_interval,
            reconnect_delay,
            move |ping| match ping_conn.call(&EvolverRequest::Ping(ping))? {
                EvolverResponse::Pong => Ok(()),
                other => Err(RpcError::UnexpectedResponse(format!("{:?}", other))),
            },
        );
        Self {
            conn: Connection::new(addr),
            heartbeat,
            learner_id,
            retry: Retry::default(),
            reconnect_delay,
        }
    }

    /// Current state of the heartbeat link.
    pub fn connected(&self) -> bool {
        self.heartbeat.connected()
    }

    /// Attaches the registered learner id to subsequent heartbeats, so
    /// the evolver can drop the registration when the link dies.
    pub fn set_learner_id(&self, id: u64) {
        *self.learner_id.lock().unwrap() = Some(id);
    }

    /// Asks the evolver for a learner to attach to.
    ///
    /// Blocks until a learner is available, pausing with a fixed delay
    /// both while the link is down and while the evolver answers that no
    /// learner is alive yet.
    pub fn register_actor(&self) -> LearnerAddr {
        wait_connected("evolver", &self.heartbeat, self.reconnect_delay);
        info!("Registering to evolver...");
        loop {
            let result = self
                .retry
                .run("RegisterActor", || self.conn.call(&EvolverRequest::RegisterActor));
            match result {
                Ok(EvolverResponse::ActorRegistration(Some(addr))) => {
                    info!("Registered to evolver");
                    return addr;
                }
                Ok(_) | Err(_) => thread::sleep(self.reconnect_delay),
            }
        }
    }

    /// Announces a learner endpoint; returns the assigned name and id.
    pub fn register_learner(&self, host: &str, port: u16) -> Result<(String, u64), RpcError> {
        wait_connected("evolver", &self.heartbeat, self.reconnect_delay);
        let result = self.retry.run("RegisterLearner", || {
            self.conn.call(&EvolverRequest::RegisterLearner {
                host: host.to_string(),
                port,
            })
        })?;
        match result {
            EvolverResponse::LearnerRegistration { name, id } => Ok((name, id)),
            other => Err(RpcError::UnexpectedResponse(format!("{:?}", other))),
        }
    }

    /// Stops the heartbeat thread.
    pub fn close(&mut self) {
        self.heartbeat.stop();
    }
}

/// Client of the learner service.
pub struct LearnerStub {
    conn: Connection,
    heartbeat: Heartbeat,
    retry: Retry,
    reconnect_delay: Duration,
}

impl LearnerStub {
    /// Connects to the learner at `addr`.
    pub fn new(
        addr: impl Into<String>,
        ping_interval: Duration,
        reconnect_delay: Duration,
    ) -> Self {
        let addr = addr.into();
        info!("Starting learner stub [{}]", addr);
        let ping_conn = Connection::new(addr.clone());
        let heartbeat = Heartbeat::spawn(
            "Learner",
            Arc::new(Mutex::new(None)),
            ping_interval,
            reconnect_delay,
            move |ping| match ping_conn.call(&LearnerRequest::Ping(ping))? {
                LearnerResponse::Pong => Ok(()),
                other => Err(RpcError::UnexpectedResponse(format!("{:?}", other))),
            },
        );
        Self {
            conn: Connection::new(addr),
            heartbeat,
            retry: Retry::default(),
            reconnect_delay,
        }
    }

    /// Current state of the heartbeat link.
    pub fn connected(&self) -> bool {
        self.heartbeat.connected()
    }

    /// Registers this actor; blocks until the learner accepts it.
    pub fn register_actor(&self) -> ActorRegistration {
        wait_connected("learner", &self.heartbeat, self.reconnect_delay);
        info!("Registering to learner...");
        loop {
            let result = self
                .retry
                .run("RegisterActor", || self.conn.call(&LearnerRequest::RegisterActor));
            match result {
                Ok(LearnerResponse::ActorRegistration(Some(reg))) => {
                    info!("Registered to learner");
                    return reg;
                }
                Ok(_) | Err(_) => thread::sleep(self.reconnect_delay),
            }
        }
    }

    /// Ships one finished episode.
    pub fn add_episode(&self, episode: Episode) -> Result<(), RpcError> {
        let req = LearnerRequest::Add(episode);
        match self.retry.run("Add", || self.conn.call(&req))? {
            LearnerResponse::AddAck => Ok(()),
            other => Err(RpcError::UnexpectedResponse(format!("{:?}", other))),
        }
    }

    /// Remote inference for actors without a local policy copy.
    pub fn get_action(
        &self,
        obses: Vec<NdArray>,
        rnn_state: NdArray,
    ) -> Result<(NdArray, NdArray), RpcError> {
        let req = LearnerRequest::GetAction { obses, rnn_state };
        match self.retry.run("GetAction", || self.conn.call(&req))? {
            LearnerResponse::Action { action, rnn_state } => Ok((action, rnn_state)),
            other => Err(RpcError::UnexpectedResponse(format!("{:?}", other))),
        }
    }

    /// Pulls the current policy variables; `None` while the model is not
    /// ready.
    pub fn get_policy_variables(&self) -> Result<Option<Vec<NdArray>>, RpcError> {
        let result = self
            .retry
            .run("GetPolicyVariables", || self.conn.call(&LearnerRequest::GetPolicyVariables))?;
        match result {
            LearnerResponse::PolicyVariables(vars) => Ok(vars),
            other => Err(RpcError::UnexpectedResponse(format!("{:?}", other))),
        }
    }

    /// Stops the heartbeat thread.
    pub fn close(&mut self) {
        self.heartbeat.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::server::{serve, Service};
    use std::net::SocketAddr;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    const FAST: Duration = Duration::from_millis(5);

    fn init_logger() {
        let _ = env_logger::builder().is_test(true).try_init();
    }

    /// Evolver that answers `RegisterActor` with `None` a few times
    /// before handing out a learner address.
    struct SlowEvolver {
        refusals: usize,
        register_calls: AtomicUsize,
    }

    impl Service for SlowEvolver {
        type Request = EvolverRequest;
        type Response = EvolverResponse;

        fn handle(&self, _peer: SocketAddr, req: EvolverRequest) -> EvolverResponse {
            match req {
                EvolverRequest::Ping(_) => EvolverResponse::Pong,
                EvolverRequest::RegisterActor => {
                    let n = self.register_calls.fetch_add(1, Ordering::SeqCst);
                    if n < self.refusals {
                        EvolverResponse::ActorRegistration(None)
                    } else {
                        EvolverResponse::ActorRegistration(Some(LearnerAddr {
                            host: "127.0.0.1".into(),
                            port: 9000,
                        }))
                    }
                }
                EvolverRequest::RegisterLearner { .. } => EvolverResponse::LearnerRegistration {
                    name: "learner-0".into(),
                    id: 0,
                },
            }
        }
    }

    #[test]
    fn test_actor_registration_retries_until_learner_exists() {
        init_logger();
        let service = Arc::new(SlowEvolver {
            refusals: 2,
            register_calls: AtomicUsize::new(0),
        });
        let mut server = serve("127.0.0.1:0", service.clone()).unwrap();

        let mut stub = EvolverStub::new(server.local_addr().to_string(), FAST, FAST);
        let addr = stub.register_actor();
        assert_eq!(addr.port, 9000);
        assert_eq!(service.register_calls.load(Ordering::SeqCst), 3);

        stub.close();
        server.stop();
    }

    #[test]
    fn test_learner_registration_one_shot() {
        init_logger();
        let service = Arc::new(SlowEvolver {
            refusals: 0,
            register_calls: AtomicUsize::new(0),
        });
        let mut server = serve("127.0.0.1:0", service).unwrap();

        let mut stub = EvolverStub::new(server.local_addr().to_string(), FAST, FAST);
        let (name, id) = stub.register_learner("127.0.0.1", 9000).unwrap();
        assert_eq!(name, "learner-0");
        assert_eq!(id, 0);

        stub.close();
        server.stop();
    }

    #[test]
    fn test_heartbeat_reaches_server() {
        init_logger();
        let service = Arc::new(SlowEvolver {
            refusals: 0,
            register_calls: AtomicUsize::new(0),
        });
        let mut server = serve("127.0.0.1:0", service).unwrap();

        let mut stub = EvolverStub::new(server.local_addr().to_string(), FAST, FAST);
        for _ in 0..100 {
            if stub.connected() {
                break;
            }
            thread::sleep(FAST);
        }
        assert!(stub.connected());

        stub.close();
        server.stop();
    }
}
