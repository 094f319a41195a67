//! The evolver: a stateless broker between actors and learners.
use anyhow::Result;
use log::{info, warn};
use sacd_rpc::{
    serve, EvolverRequest, EvolverResponse, LearnerAddr, PeerSet, ServerHandle, Service,
};
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{BufReader, Write};
use std::net::SocketAddr;
use std::path::Path;
use std::sync::{Arc, Mutex};

/// Configuration of the evolver process.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct EvolverConfig {
    /// Address the broker service binds to.
    pub bind_addr: String,
}

impl Default for EvolverConfig {
    fn default() -> Self {
        Self {
            bind_addr: "0.0.0.0:61000".into(),
        }
    }
}

impl EvolverConfig {
    /// Sets the bind address.
    pub fn bind_addr(mut self, bind_addr: impl Into<String>) -> Self {
        self.bind_addr = bind_addr.into();
        self
    }

    /// Loads the configuration from a YAML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let file = File::open(path)?;
        let rdr = BufReader::new(file);
        let b = serde_yaml::from_reader(rdr)?;
        Ok(b)
    }

    /// Saves the configuration to a YAML file.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let mut file = File::create(path)?;
        file.write_all(serde_yaml::to_string(&self)?.as_bytes())?;
        Ok(())
    }
}

struct Registry {
    learners: Vec<(u64, LearnerAddr)>,
    next_id: u64,
    next_assign: usize,
}

struct EvolverService {
    peers: PeerSet,
    registry: Mutex<Registry>,
}

impl EvolverService {
    fn new() -> Self {
        Self {
            peers: PeerSet::new(),
            registry: Mutex::new(Registry {
                learners: vec![],
                next_id: 0,
                next_assign: 0,
            }),
        }
    }

    /// Round-robin assignment over the live learners.
    fn assign(&self) -> Option<LearnerAddr> {
        let mut registry = self.registry.lock().unwrap();
        if registry.learners.is_empty() {
            return None;
        }
        let ix = registry.next_assign % registry.learners.len();
        registry.next_assign = registry.next_assign.wrapping_add(1);
        Some(registry.learners[ix].1.clone())
    }

    fn register_learner(&self, host: String, port: u16) -> (String, u64) {
        let mut registry = self.registry.lock().unwrap();
        let id = registry.next_id;
        registry.next_id += 1;
        registry.learners.push((id, LearnerAddr { host, port }));
        let name = format!("learner-{}", id);
        info!("Registered {} at {}", name, registry.learners.last().unwrap().1.host);
        (name, id)
    }

    fn drop_learner(&self, id: u64) {
        let mut registry = self.registry.lock().unwrap();
        let before = registry.learners.len();
        registry.learners.retain(|(l, _)| *l != id);
        if registry.learners.len() < before {
            warn!("Learner {} dropped from the registry", id);
        }
    }
}

impl Service for EvolverService {
    type Request = EvolverRequest;
    type Response = EvolverResponse;

    fn handle(&self, peer: SocketAddr, req: EvolverRequest) -> EvolverResponse {
        match req {
            EvolverRequest::Ping(ping) => {
                if let Some(id) = ping.learner_id {
                    self.peers.add_info(peer, id);
                }
                EvolverResponse::Pong
            }
            EvolverRequest::RegisterActor => EvolverResponse::ActorRegistration(self.assign()),
            EvolverRequest::RegisterLearner { host, port } => {
                let (name, id) = self.register_learner(host, port);
                EvolverResponse::LearnerRegistration { name, id }
            }
        }
    }

    fn on_connect(&self, peer: SocketAddr) {
        self.peers.connect(peer);
    }

    fn on_disconnect(&self, peer: SocketAddr) {
        if let Some(id) = self.peers.disconnect(peer) {
            self.drop_learner(id);
        }
    }
}

/// Running evolver process.
pub struct Evolver {
    handle: ServerHandle,
}

impl Evolver {
    /// Binds the broker service and starts serving.
    pub fn run(config: &EvolverConfig) -> Result<Self> {
        let handle = serve(config.bind_addr.as_str(), Arc::new(EvolverService::new()))?;
        Ok(Self { handle })
    }

    /// Bound address of the broker service.
    pub fn local_addr(&self) -> SocketAddr {
        self.handle.local_addr()
    }

    /// Stops the broker service.
    pub fn stop(&mut self) {
        self.handle.stop();
    }
}
