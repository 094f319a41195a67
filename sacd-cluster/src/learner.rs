//! The learner: owns the model and the replay buffer, runs training.
use crate::model_lock::DiagRwLock;
use anyhow::Result;
use crossbeam_channel::{bounded, Receiver, Sender};
use log::{debug, info, warn};
use sacd_core::{
    replay_buffer::{EpisodeWindower, PrioritizedReplayBuffer, ReplayBufferConfig, TransitionField},
    Episode, Model, ModelRegistry, NdArray,
};
use sacd_rpc::{
    serve, ActorRegistration, EvolverStub, LearnerRequest, LearnerResponse, PeerSet, ServerHandle,
    Service,
};
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{BufReader, Write};
use std::net::SocketAddr;
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

/// Pending episodes between the service threads and the training loop.
const INGEST_QUEUE: usize = 64;

/// Configuration of a learner process.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct LearnerConfig {
    /// Address the learner service binds to.
    pub bind_addr: String,

    /// Host actors reach this learner on, as registered at the evolver.
    pub advertised_host: String,

    /// Address of the evolver.
    pub evolver_addr: String,

    /// Model name resolved through the [`ModelRegistry`].
    pub model_name: String,

    /// Directory for model snapshots, handed to registering actors.
    pub model_dir: String,

    /// Model configuration, JSON.
    pub model_config_json: String,

    /// Environment reset configuration handed to actors, JSON.
    pub reset_config_json: String,

    /// Training hyperparameters handed to actors, JSON.
    pub sac_config_json: String,

    /// Steps warming up a recurrent encoder at the start of each window.
    pub burn_in: usize,

    /// Steps of the n-step return at the end of each window.
    pub n_step: usize,

    /// Replay buffer configuration.
    pub replay: ReplayBufferConfig,

    /// Pause of the training loop while the buffer is underfilled.
    pub idle_ms: u64,

    /// Interval of heartbeat pings to the evolver.
    pub ping_interval_ms: u64,

    /// Pause before reconnection attempts.
    pub reconnect_delay_ms: u64,
}

impl Default for LearnerConfig {
    fn default() -> Self {
        Self {
            bind_addr: "0.0.0.0:61001".into(),
            advertised_host: "127.0.0.1".into(),
            evolver_addr: "127.0.0.1:61000".into(),
            model_name: "sac".into(),
            model_dir: "models".into(),
            model_config_json: "{}".into(),
            reset_config_json: "{}".into(),
            sac_config_json: "{}".into(),
            burn_in: 0,
            n_step: 1,
            replay: ReplayBufferConfig::default(),
            idle_ms: 100,
            ping_interval_ms: 2000,
            reconnect_delay_ms: 2000,
        }
    }
}

impl LearnerConfig {
    /// Sets the bind address.
    pub fn bind_addr(mut self, bind_addr: impl Into<String>) -> Self {
        self.bind_addr = bind_addr.into();
        self
    }

    /// Sets the evolver address.
    pub fn evolver_addr(mut self, evolver_addr: impl Into<String>) -> Self {
        self.evolver_addr = evolver_addr.into();
        self
    }

    /// Sets the model name.
    pub fn model_name(mut self, model_name: impl Into<String>) -> Self {
        self.model_name = model_name.into();
        self
    }

    /// Sets the window shape.
    pub fn window(mut self, burn_in: usize, n_step: usize) -> Self {
        self.burn_in = burn_in;
        self.n_step = n_step;
        self
    }

    /// Sets the replay buffer configuration.
    pub fn replay(mut self, replay: ReplayBufferConfig) -> Self {
        self.replay = replay;
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

struct LearnerService {
    model: Arc<DiagRwLock<Box<dyn Model>>>,
    ready: Arc<AtomicBool>,
    episode_tx: Sender<Episode>,
    next_actor_id: AtomicU64,
    dropped_episodes: AtomicU64,
    peers: PeerSet,
    model_dir: String,
    reset_config_json: String,
    model_config_json: String,
    sac_config_json: String,
}

impl Service for LearnerService {
    type Request = LearnerRequest;
    type Response = LearnerResponse;

    fn handle(&self, _peer: SocketAddr, req: LearnerRequest) -> LearnerResponse {
        match req {
            LearnerRequest::Ping(_) => LearnerResponse::Pong,
            LearnerRequest::RegisterActor => {
                if !self.ready.load(Ordering::Relaxed) {
                    return LearnerResponse::ActorRegistration(None);
                }
                let actor_id = self.next_actor_id.fetch_add(1, Ordering::SeqCst);
                info!("Actor {} registered", actor_id);
                LearnerResponse::ActorRegistration(Some(ActorRegistration {
                    model_dir: self.model_dir.clone(),
                    actor_id,
                    reset_config_json: self.reset_config_json.clone(),
                    model_config_json: self.model_config_json.clone(),
                    sac_config_json: self.sac_config_json.clone(),
                }))
            }
            LearnerRequest::Add(episode) => {
                if self.episode_tx.try_send(episode).is_err() {
                    // fire-and-forget contract: back-pressure by dropping,
                    // the actor keeps its cadence
                    let dropped = self.dropped_episodes.fetch_add(1, Ordering::Relaxed) + 1;
                    warn!("Ingest queue is full ({} episodes dropped)", dropped);
                }
                LearnerResponse::AddAck
            }
            LearnerRequest::GetAction { obses, rnn_state } => {
                let model = self.model.read();
                let (action, rnn_state) = model.predict(&obses, &rnn_state);
                LearnerResponse::Action { action, rnn_state }
            }
            LearnerRequest::GetPolicyVariables => {
                if !self.ready.load(Ordering::Relaxed) {
                    return LearnerResponse::PolicyVariables(None);
                }
                LearnerResponse::PolicyVariables(Some(self.model.read().get_variables()))
            }
        }
    }

    fn on_connect(&self, peer: SocketAddr) {
        self.peers.connect(peer);
    }

    fn on_disconnect(&self, peer: SocketAddr) {
        self.peers.disconnect(peer);
    }
}

/// Running learner process.
pub struct Learner {
    name: String,
    id: u64,
    server: ServerHandle,
    evolver_stub: EvolverStub,
    stop: Arc<AtomicBool>,
    trainer: Option<JoinHandle<()>>,
}

impl Learner {
    /// Builds the model, binds the service, registers at the evolver and
    /// starts the training loop.
    ///
    /// Registration to the evolver retries indefinitely; there is no
    /// meaningful fallback while the broker is unreachable.
    pub fn build(config: &LearnerConfig, registry: &ModelRegistry) -> Result<Self> {
        let model = registry.build(&config.model_name, &config.model_config_json)?;
        let model = Arc::new(DiagRwLock::new(model, Duration::from_secs(1)));
        let ready = Arc::new(AtomicBool::new(false));
        let (episode_tx, episode_rx) = bounded(INGEST_QUEUE);

        let service = Arc::new(LearnerService {
            model: model.clone(),
            ready: ready.clone(),
            episode_tx,
            next_actor_id: AtomicU64::new(0),
            dropped_episodes: AtomicU64::new(0),
            peers: PeerSet::new(),
            model_dir: config.model_dir.clone(),
            reset_config_json: config.reset_config_json.clone(),
            model_config_json: config.model_config_json.clone(),
            sac_config_json: config.sac_config_json.clone(),
        });
        let server = serve(config.bind_addr.as_str(), service)?;

        let evolver_stub = EvolverStub::new(
            config.evolver_addr.clone(),
            Duration::from_millis(config.ping_interval_ms),
            Duration::from_millis(config.reconnect_delay_ms),
        );
        let reconnect_delay = Duration::from_millis(config.reconnect_delay_ms);
        let (name, id) = loop {
            match evolver_stub.register_learner(&config.advertised_host, server.local_addr().port())
            {
                Ok(assigned) => break assigned,
                Err(e) => {
                    warn!("Learner registration failed: {}", e);
                    thread::sleep(reconnect_delay);
                }
            }
        };
        evolver_stub.set_learner_id(id);
        info!("Registered to evolver as {}", name);
        ready.store(true, Ordering::Relaxed);

        let stop = Arc::new(AtomicBool::new(false));
        let trainer = {
            let model = model.clone();
            let stop = stop.clone();
            let buffer = PrioritizedReplayBuffer::build(&config.replay);
            let windower = EpisodeWindower::new(config.burn_in, config.n_step);
            let idle = Duration::from_millis(config.idle_ms);
            thread::spawn(move || training_loop(model, buffer, windower, episode_rx, stop, idle))
        };

        Ok(Self {
            name,
            id,
            server,
            evolver_stub,
            stop,
            trainer: Some(trainer),
        })
    }

    /// Name assigned by the evolver.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Id assigned by the evolver.
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Bound address of the learner service.
    pub fn local_addr(&self) -> SocketAddr {
        self.server.local_addr()
    }

    /// Stops the training loop, the service and the evolver link.
    pub fn stop(&mut self) {
        self.stop.store(true, Ordering::Relaxed);
        if let Some(trainer) = self.trainer.take() {
            if trainer.join().is_err() {
                warn!("Training thread panicked");
            }
        }
        self.server.stop();
        self.evolver_stub.close();
    }
}

impl Drop for Learner {
    fn drop(&mut self) {
        self.stop();
    }
}

fn training_loop(
    model: Arc<DiagRwLock<Box<dyn Model>>>,
    mut buffer: PrioritizedReplayBuffer,
    windower: EpisodeWindower,
    episode_rx: Receiver<Episode>,
    stop: Arc<AtomicBool>,
    idle: Duration,
) {
    while !stop.load(Ordering::Relaxed) {
        while let Ok(episode) = episode_rx.try_recv() {
            let windows = windower.windows(&episode);
            if windows.is_empty() {
                debug!(
                    "Dropping an episode of {} steps, shorter than one window",
                    episode.steps()
                );
                continue;
            }
            if let Err(e) = buffer.add(windows) {
                warn!("Rejecting an episode: {}", e);
            }
        }

        let batch = match buffer.sample() {
            Some(batch) => batch,
            None => {
                thread::sleep(idle);
                continue;
            }
        };

        let output = {
            let mut model = model.write();
            model.train_step(&batch)
        };
        buffer.update(&batch.points, &output.td_errors);

        // behavior probabilities are recomputed on the network as it is
        // *after* the step, matching the stored-policy semantics actors
        // rely on
        let probs: Vec<NdArray> = {
            let model = model.read();
            batch
                .windows
                .iter()
                .map(|w| model.behavior_probs(&w.obses, &w.actions, &w.rnn_state))
                .collect()
        };
        if let Err(e) = buffer.update_transitions(TransitionField::MuProbs, &batch.points, &probs) {
            warn!("Behavior probability refresh failed: {}", e);
        }

        if output.step % 100 == 0 {
            info!(
                "Training step {}, buffer size {}",
                output.step,
                buffer.size()
            );
        }
    }
}
