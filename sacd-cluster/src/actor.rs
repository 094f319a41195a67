//! The actor: steps the environment and ships finished episodes.
use crate::episode_queue::EpisodeQueue;
use crate::model_lock::DiagRwLock;
use anyhow::Result;
use log::{debug, error, info, warn};
use sacd_core::{Env, EnvWorker, EpisodeBuilder, Model, ModelRegistry, NdArray};
use sacd_rpc::{EvolverStub, LearnerStub};
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{BufReader, Write};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

/// Poll interval of the sender thread on the episode queue.
const SENDER_POLL: Duration = Duration::from_millis(500);

/// Configuration of an actor process.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct ActorConfig {
    /// Address of the evolver.
    pub evolver_addr: String,

    /// Model name resolved through the [`ModelRegistry`].
    pub model_name: String,

    /// Shapes of the observation branches, without the step dimension.
    pub obs_shapes: Vec<Vec<usize>>,

    /// Action dimensionality.
    pub action_dim: usize,

    /// Recurrent state width, `None` for feed-forward policies.
    pub rnn_dim: Option<usize>,

    /// Steps warming up a recurrent encoder at the start of each window.
    pub burn_in: usize,

    /// Steps of the n-step return at the end of each window.
    pub n_step: usize,

    /// Episodes are truncated at this many steps.
    pub max_episode_steps: usize,

    /// Slots of the episode hand-off queue.
    pub queue_slots: usize,

    /// `true`: act with a local policy copy, refreshed periodically.
    /// `false`: ask the learner for every action.
    pub update_policy_mode: bool,

    /// Iterations between policy-variable pulls.
    pub update_policy_interval: u64,

    /// Stop after this many iterations; `None` runs until a link drops.
    pub max_iterations: Option<u64>,

    /// Interval of heartbeat pings.
    pub ping_interval_ms: u64,

    /// Pause before reconnection attempts.
    pub reconnect_delay_ms: u64,
}

impl Default for ActorConfig {
    fn default() -> Self {
        Self {
            evolver_addr: "127.0.0.1:61000".into(),
            model_name: "sac".into(),
            obs_shapes: vec![],
            action_dim: 1,
            rnn_dim: None,
            burn_in: 0,
            n_step: 1,
            max_episode_steps: 1000,
            queue_slots: 10,
            update_policy_mode: true,
            update_policy_interval: 10,
            max_iterations: None,
            ping_interval_ms: 2000,
            reconnect_delay_ms: 2000,
        }
    }
}

impl ActorConfig {
    /// Sets the evolver address.
    pub fn evolver_addr(mut self, evolver_addr: impl Into<String>) -> Self {
        self.evolver_addr = evolver_addr.into();
        self
    }

    /// Sets the observation/action layout.
    pub fn layout(mut self, obs_shapes: Vec<Vec<usize>>, action_dim: usize) -> Self {
        self.obs_shapes = obs_shapes;
        self.action_dim = action_dim;
        self
    }

    /// Sets the window shape.
    pub fn window(mut self, burn_in: usize, n_step: usize) -> Self {
        self.burn_in = burn_in;
        self.n_step = n_step;
        self
    }

    /// Sets the iteration budget.
    pub fn max_iterations(mut self, max_iterations: Option<u64>) -> Self {
        self.max_iterations = max_iterations;
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

/// `true` if any variable of a pulled broadcast contains NaN.
fn variables_contain_nan(variables: &[NdArray]) -> bool {
    variables.iter().any(|v| v.has_nan())
}

fn update_policy_variables(stub: &LearnerStub, model: &DiagRwLock<Box<dyn Model>>) {
    match stub.get_policy_variables() {
        Ok(Some(variables)) => {
            if variables_contain_nan(&variables) {
                warn!("NaN in variables, skip updating");
                return;
            }
            let mut model = model.write();
            match model.set_variables(&variables) {
                Ok(()) => info!("Policy variables updated"),
                Err(e) => warn!("Rejecting a variable broadcast: {}", e),
            }
        }
        Ok(None) => debug!("Policy variables not ready yet"),
        Err(e) => warn!("Variable pull failed: {}", e),
    }
}

fn spawn_env<F>(build: &F, reset_config_json: &str) -> Result<EnvWorker>
where
    F: Fn(&str) -> Result<Box<dyn Env>>,
{
    let env = build(reset_config_json)?;
    Ok(EnvWorker::spawn(move || env))
}

/// The actor role.
pub struct Actor;

impl Actor {
    /// Runs the environment-interaction loop until a link drops or the
    /// iteration budget is spent.
    ///
    /// `env_builder` receives the reset configuration handed back by the
    /// learner and is called again whenever the environment has to be
    /// rebuilt after a step failure.
    pub fn run<F>(config: &ActorConfig, registry: &ModelRegistry, env_builder: F) -> Result<()>
    where
        F: Fn(&str) -> Result<Box<dyn Env>>,
    {
        let ping = Duration::from_millis(config.ping_interval_ms);
        let delay = Duration::from_millis(config.reconnect_delay_ms);

        let mut evolver_stub = EvolverStub::new(config.evolver_addr.clone(), ping, delay);
        let learner_addr = evolver_stub.register_actor();
        let learner_stub = Arc::new(LearnerStub::new(
            format!("{}:{}", learner_addr.host, learner_addr.port),
            ping,
            delay,
        ));
        let registration = learner_stub.register_actor();
        info!("Actor {} starting", registration.actor_id);

        let model = DiagRwLock::new(
            registry.build(&config.model_name, &registration.model_config_json)?,
            Duration::from_secs(1),
        );

        let queue = Arc::new(EpisodeQueue::new(
            config.queue_slots,
            &config.obs_shapes,
            config.action_dim,
            config.rnn_dim,
            config.max_episode_steps,
        ));
        let stop = Arc::new(AtomicBool::new(false));
        let sender = {
            let queue = queue.clone();
            let stop = stop.clone();
            let learner_stub = learner_stub.clone();
            thread::spawn(move || loop {
                match queue.get(SENDER_POLL) {
                    Some(slot) => {
                        let episode = queue.episode(slot);
                        queue.release(slot);
                        if let Err(e) = learner_stub.add_episode(episode) {
                            warn!("Shipping an episode failed: {}", e);
                        }
                    }
                    None => {
                        if stop.load(Ordering::Relaxed) {
                            break;
                        }
                    }
                }
            })
        };

        let mut worker = spawn_env(&env_builder, &registration.reset_config_json)?;
        let mut dropped_full: usize = 0;
        let mut iteration: u64 = 0;

        while evolver_stub.connected() && learner_stub.connected() {
            if let Some(max) = config.max_iterations {
                if iteration >= max {
                    break;
                }
            }
            if config.update_policy_mode && iteration % config.update_policy_interval == 0 {
                update_policy_variables(learner_stub.as_ref(), &model);
            }

            let mut obses = match worker.reset() {
                Ok(obses) => obses,
                Err(e) => {
                    error!("Environment reset failed: {}", e);
                    worker.close();
                    worker = spawn_env(&env_builder, &registration.reset_config_json)?;
                    continue;
                }
            };
            let mut rnn_state = model.read().initial_rnn_state();
            let mut builder = EpisodeBuilder::new();
            let mut episode_reward = 0.;
            let mut step_failed = false;

            for _ in 0..config.max_episode_steps {
                let (action, next_rnn_state) = if config.update_policy_mode {
                    let model = model.read();
                    model.predict(&obses, &rnn_state)
                } else {
                    match learner_stub.get_action(obses.clone(), rnn_state.clone()) {
                        Ok(pair) => pair,
                        Err(e) => {
                            warn!("Remote action failed: {}", e);
                            break;
                        }
                    }
                };

                match worker.step(action.clone()) {
                    Ok(step) => {
                        // strip the [1, ...] row convention down to
                        // per-step rows before stacking
                        builder.push_step(
                            obses.iter().map(|o| o.squeeze_first()).collect(),
                            action.squeeze_first(),
                            step.reward,
                            step.done && !step.max_reached,
                            rnn_state.squeeze_first(),
                        );
                        episode_reward += step.reward;
                        obses = step.obses;
                        rnn_state = next_rnn_state;
                        if step.done || step.max_reached {
                            break;
                        }
                    }
                    Err(e) => {
                        error!("Environment step failed: {}", e);
                        step_failed = true;
                        break;
                    }
                }
            }

            if step_failed {
                worker.close();
                info!("Restarting the environment...");
                worker = spawn_env(&env_builder, &registration.reset_config_json)?;
                continue;
            }
            if builder.is_empty() {
                continue;
            }

            let mut episode =
                builder.finish(obses.iter().map(|o| o.squeeze_first()).collect())?;
            info!("{}, S {}, R {:6.1}", iteration, episode.steps(), episode_reward);
            iteration += 1;

            if !episode.is_trainable(config.burn_in, config.n_step) {
                debug!("Episode shorter than one window, dropped");
                continue;
            }

            // refresh behavior probabilities on the policy that acted
            episode.mu_probs = {
                let rnn0 = if episode.rnn_states.is_empty() {
                    NdArray::empty()
                } else {
                    episode.rnn_states.slice_rows(0, 1)
                };
                let model = model.read();
                model.behavior_probs(&episode.obses, &episode.actions, &rnn0)
            };

            if queue.put(&episode).is_err() {
                dropped_full += 1;
                warn!("Episode queue is full ({} episodes dropped)", dropped_full);
            }
        }

        stop.store(true, Ordering::Relaxed);
        if sender.join().is_err() {
            warn!("Sender thread panicked");
        }
        worker.close();
        evolver_stub.close();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sacd_core::replay_buffer::SampledBatch;
    use sacd_core::{CoreError, TrainOutput};
    use sacd_rpc::{serve, LearnerRequest, LearnerResponse, Service};
    use std::net::SocketAddr;
    use tempdir::TempDir;

    /// Policy with one scalar parameter.
    struct Scalar {
        value: f32,
    }

    impl Model for Scalar {
        fn predict(&self, _: &[NdArray], _: &NdArray) -> (NdArray, NdArray) {
            (NdArray::empty(), NdArray::empty())
        }
        fn train_step(&mut self, batch: &SampledBatch) -> TrainOutput {
            TrainOutput {
                step: 0,
                td_errors: vec![0.; batch.points.len()],
            }
        }
        fn get_variables(&self) -> Vec<NdArray> {
            vec![NdArray::from_f32(&[1], &[self.value])]
        }
        fn set_variables(&mut self, variables: &[NdArray]) -> Result<(), CoreError> {
            self.value = variables[0].to_f32()?[0];
            Ok(())
        }
        fn behavior_probs(&self, _: &[NdArray], _: &NdArray, _: &NdArray) -> NdArray {
            NdArray::empty()
        }
        fn initial_rnn_state(&self) -> NdArray {
            NdArray::empty()
        }
    }

    /// Learner answering variable pulls with a configurable snapshot.
    struct VariableServer {
        variables: Vec<NdArray>,
    }

    impl Service for VariableServer {
        type Request = LearnerRequest;
        type Response = LearnerResponse;

        fn handle(&self, _peer: SocketAddr, req: LearnerRequest) -> LearnerResponse {
            match req {
                LearnerRequest::Ping(_) => LearnerResponse::Pong,
                LearnerRequest::GetPolicyVariables => {
                    LearnerResponse::PolicyVariables(Some(self.variables.clone()))
                }
                _ => LearnerResponse::Pong,
            }
        }
    }

    fn pull_from(variables: Vec<NdArray>, model: &DiagRwLock<Box<dyn Model>>) {
        let mut server = serve("127.0.0.1:0", Arc::new(VariableServer { variables })).unwrap();
        let fast = Duration::from_millis(5);
        let mut stub = LearnerStub::new(server.local_addr().to_string(), fast, fast);
        update_policy_variables(&stub, model);
        stub.close();
        server.stop();
    }

    #[test]
    fn test_nan_broadcast_leaves_model_untouched() {
        let model = DiagRwLock::new(
            Box::new(Scalar { value: 3. }) as Box<dyn Model>,
            Duration::from_secs(1),
        );

        pull_from(vec![NdArray::from_f32(&[2], &[1.0, f32::NAN])], &model);
        let vars = model.read().get_variables();
        assert_eq!(vars[0].to_f32().unwrap(), vec![3.]);

        // a clean snapshot goes through
        pull_from(vec![NdArray::from_f32(&[1], &[5.])], &model);
        let vars = model.read().get_variables();
        assert_eq!(vars[0].to_f32().unwrap(), vec![5.]);
    }

    #[test]
    fn test_nan_broadcast_detection() {
        let good = vec![
            NdArray::from_f32(&[2], &[0.1, -0.2]),
            NdArray::from_f32(&[1], &[1.0]),
        ];
        assert!(!variables_contain_nan(&good));

        let bad = vec![
            NdArray::from_f32(&[2], &[0.1, -0.2]),
            NdArray::from_f32(&[2], &[1.0, f32::NAN]),
        ];
        assert!(variables_contain_nan(&bad));
    }

    #[test]
    fn test_config_yaml_roundtrip() {
        let dir = TempDir::new("actor_config").unwrap();
        let path = dir.path().join("actor.yaml");
        let config = ActorConfig::default()
            .layout(vec![vec![8], vec![4, 4]], 2)
            .window(2, 3)
            .max_iterations(Some(5));
        config.save(&path).unwrap();
        assert_eq!(ActorConfig::load(&path).unwrap(), config);
    }
}
