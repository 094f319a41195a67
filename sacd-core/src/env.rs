//! Capability interface of the simulation environment.
//!
//! Like [`Model`](crate::Model), the environment is a black box to the
//! coordination layer. Because many environment backends are not thread
//! safe, an environment can be confined to its own thread with
//! [`EnvWorker`] and driven through a command channel.
use crate::error::CoreError;
use crate::ndarray::NdArray;
use anyhow::Result;
use crossbeam_channel::{bounded, Receiver, Sender};
use log::warn;
use std::thread::{self, JoinHandle};

/// Outcome of one environment step.
#[derive(Clone, Debug)]
pub struct EnvStep {
    /// Observation branches after the step, each of shape `[1, ...]`.
    pub obses: Vec<NdArray>,

    /// Scalar reward of the step.
    pub reward: f32,

    /// True when the episode terminated.
    pub done: bool,

    /// True when the episode was cut off by a step limit rather than a
    /// terminal state. Such steps are recorded as not done.
    pub max_reached: bool,
}

/// The black-box environment.
pub trait Env: Send {
    /// Resets the environment and returns the initial observation
    /// branches, each of shape `[1, ...]`.
    fn reset(&mut self) -> Result<Vec<NdArray>>;

    /// Applies an action of shape `[1, action_dim]`.
    fn step(&mut self, action: &NdArray) -> Result<EnvStep>;
}

impl Env for Box<dyn Env> {
    fn reset(&mut self) -> Result<Vec<NdArray>> {
        (**self).reset()
    }

    fn step(&mut self, action: &NdArray) -> Result<EnvStep> {
        (**self).step(action)
    }
}

enum EnvCommand {
    Reset,
    Step(NdArray),
    Close,
}

enum EnvResponse {
    Obses(Result<Vec<NdArray>>),
    Step(Result<EnvStep>),
}

/// Runs an [`Env`] on a dedicated thread.
///
/// Commands and responses travel over rendezvous channels, so at most one
/// command is in flight and the caller observes responses in order.
pub struct EnvWorker {
    command_tx: Sender<EnvCommand>,
    response_rx: Receiver<EnvResponse>,
    handle: Option<JoinHandle<()>>,
}

impl EnvWorker {
    /// Builds the environment on a new thread and starts serving commands.
    pub fn spawn<F, E>(build: F) -> Self
    where
        F: FnOnce() -> E + Send + 'static,
        E: Env,
    {
        let (command_tx, command_rx) = bounded::<EnvCommand>(0);
        let (response_tx, response_rx) = bounded::<EnvResponse>(0);

        let handle = thread::spawn(move || {
            let mut env = build();
            while let Ok(command) = command_rx.recv() {
                let response = match command {
                    EnvCommand::Reset => EnvResponse::Obses(env.reset()),
                    EnvCommand::Step(action) => EnvResponse::Step(env.step(&action)),
                    EnvCommand::Close => break,
                };
                if response_tx.send(response).is_err() {
                    break;
                }
            }
        });

        Self {
            command_tx,
            response_rx,
            handle: Some(handle),
        }
    }

    /// Resets the environment.
    pub fn reset(&self) -> Result<Vec<NdArray>> {
        self.command_tx
            .send(EnvCommand::Reset)
            .map_err(|_| CoreError::Env("worker thread terminated".into()))?;
        match self.response_rx.recv() {
            Ok(EnvResponse::Obses(obses)) => obses,
            _ => Err(CoreError::Env("worker thread terminated".into()).into()),
        }
    }

    /// Steps the environment.
    pub fn step(&self, action: NdArray) -> Result<EnvStep> {
        self.command_tx
            .send(EnvCommand::Step(action))
            .map_err(|_| CoreError::Env("worker thread terminated".into()))?;
        match self.response_rx.recv() {
            Ok(EnvResponse::Step(step)) => step,
            _ => Err(CoreError::Env("worker thread terminated".into()).into()),
        }
    }

    /// Stops the worker thread.
    pub fn close(&mut self) {
        let _ = self.command_tx.send(EnvCommand::Close);
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                warn!("Environment worker thread panicked");
            }
        }
    }
}

impl Drop for EnvWorker {
    fn drop(&mut self) {
        self.close();
    }
}
