// src/worker.rs
//! EvaluationWorker - Dedicated thread owning one Observation.
//!
//! Commands are applied strictly in arrival order, so incremental heatmap
//! updates always start from a state that reflects every prior stroke.
//!
//! Threading model:
//! - Owns: Observation
//! - Every command carries the generation current at submission. A reset bumps
//!   the shared generation: queued mutations from older generations are skipped
//!   and an older reset still rebuilding is cancelled.
//! - Evaluations are answered on a per-request reply channel.

use crate::cancel::CancelToken;
use crate::canvas::Canvas;
use crate::config::EvaluationConfig;
use crate::diff::StrokePixel;
use crate::error::EvalError;
use crate::observation::{Observation, UpdateSummary};
use crate::report::{EvaluationOptions, EvaluationReport};
use anyhow::{anyhow, Context, Result};
use log::*;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc::{channel, Receiver, Sender};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

/// Work sent to the evaluation thread.
enum Command {
    UpdateDrawing(Canvas),
    ApplyStroke(Vec<StrokePixel>),
    UpdateConfig(EvaluationConfig),
    Reset {
        reference: Canvas,
        start_time: Option<u64>,
        config: EvaluationConfig,
        cancel: CancelToken,
    },
    Start(Option<u64>),
    Finish(Option<u64>),
    Evaluate(EvaluationOptions, Sender<Result<EvaluationReport, EvalError>>),
}

struct Envelope {
    generation: u64,
    command: Command,
}

/// Outcome of one command, reported back in processing order.
#[derive(Debug, Clone, PartialEq)]
pub enum WorkerEvent {
    Updated {
        generation: u64,
        summary: UpdateSummary,
        top5_error: Option<f32>,
    },
    ConfigUpdated { generation: u64 },
    Reset { generation: u64 },
    Started { generation: u64, at: u64 },
    Finished { generation: u64, at: u64 },
    /// The command was superseded by a newer reset and not applied.
    Skipped { generation: u64 },
    Failed { generation: u64, error: EvalError },
}

/// Worker state (runs on dedicated thread)
struct WorkerActor {
    observation: Observation,
    generation: Arc<AtomicU64>,
}

impl WorkerActor {
    fn is_stale(&self, generation: u64) -> bool {
        generation < self.generation.load(Ordering::Acquire)
    }

    /// Applies one command. Returns the event to report, if any.
    fn handle(&mut self, envelope: Envelope) -> Option<WorkerEvent> {
        let Envelope { generation, command } = envelope;
        let failed = |error| WorkerEvent::Failed { generation, error };

        match command {
            Command::Evaluate(options, reply) => {
                if reply.send(self.observation.evaluate(&options)).is_err() {
                    debug!("EvaluationWorker: Evaluation requester went away");
                }
                None
            }
            Command::Reset {
                reference,
                start_time,
                config,
                cancel,
            } => {
                if cancel.is_cancelled() {
                    debug!("EvaluationWorker: Reset {} superseded before start", generation);
                    return Some(WorkerEvent::Skipped { generation });
                }
                match self
                    .observation
                    .reset_observation_cancellable(reference, start_time, config, &cancel)
                {
                    Ok(()) => Some(WorkerEvent::Reset { generation }),
                    Err(EvalError::Cancelled) => {
                        debug!("EvaluationWorker: Reset {} cancelled mid-rebuild", generation);
                        Some(WorkerEvent::Skipped { generation })
                    }
                    Err(e) => Some(failed(e)),
                }
            }
            _ if self.is_stale(generation) => {
                trace!("EvaluationWorker: Skipping stale command from generation {}", generation);
                Some(WorkerEvent::Skipped { generation })
            }
            Command::UpdateDrawing(canvas) => Some(self.updated(generation, |obs| obs.update_drawing(&canvas))),
            Command::ApplyStroke(stroke) => Some(self.updated(generation, |obs| obs.apply_stroke(&stroke))),
            Command::UpdateConfig(config) => Some(match self.observation.update_config(config) {
                Ok(()) => WorkerEvent::ConfigUpdated { generation },
                Err(e) => failed(e),
            }),
            Command::Start(at) => {
                let at = self.observation.start_observation(at);
                Some(WorkerEvent::Started { generation, at })
            }
            Command::Finish(at) => Some(match self.observation.finish_observation(at) {
                Ok(at) => WorkerEvent::Finished { generation, at },
                Err(e) => failed(e),
            }),
        }
    }

    fn updated(
        &mut self,
        generation: u64,
        apply: impl FnOnce(&mut Observation) -> Result<UpdateSummary, EvalError>,
    ) -> WorkerEvent {
        match apply(&mut self.observation) {
            Ok(summary) => WorkerEvent::Updated {
                generation,
                summary,
                top5_error: self.observation.top5_error(),
            },
            Err(error) => WorkerEvent::Failed { generation, error },
        }
    }

    /// Run the command loop until every sender is gone, then hand the observation back.
    fn run(mut self, commands: Receiver<Envelope>, events: Sender<WorkerEvent>) -> Observation {
        info!("EvaluationWorker: Thread started");

        while let Ok(envelope) = commands.recv() {
            if let Some(event) = self.handle(envelope) {
                trace!("EvaluationWorker: {:?}", event);
                if events.send(event).is_err() {
                    // Nobody listens for events; keep applying commands.
                    trace!("EvaluationWorker: Event receiver closed");
                }
            }
        }

        info!("EvaluationWorker: Command channel closed, exiting");
        self.observation
    }
}

/// Handle to an observation running on its own thread.
pub struct EvaluationWorker {
    commands: Sender<Envelope>,
    events: Receiver<WorkerEvent>,
    cancel: CancelToken,
    handle: JoinHandle<Observation>,
}

impl EvaluationWorker {
    /// Moves `observation` onto a new thread named "evaluation".
    pub fn spawn(observation: Observation) -> Result<Self> {
        let (command_tx, command_rx) = channel();
        let (event_tx, event_rx) = channel();
        let generation = Arc::new(AtomicU64::new(0));
        let cancel = CancelToken::for_generation(Arc::clone(&generation));

        let actor = WorkerActor {
            observation,
            generation,
        };
        let handle = thread::Builder::new()
            .name("evaluation".to_string())
            .spawn(move || actor.run(command_rx, event_tx))
            .context("Failed to spawn evaluation thread")?;

        info!("EvaluationWorker: Evaluation thread spawned");
        Ok(Self {
            commands: command_tx,
            events: event_rx,
            cancel,
            handle,
        })
    }

    /// Generation new commands are tagged with.
    pub fn generation(&self) -> u64 {
        self.cancel.issued()
    }

    fn submit(&self, generation: u64, command: Command) -> Result<u64, EvalError> {
        self.commands
            .send(Envelope { generation, command })
            .map_err(|_| EvalError::WorkerStopped)?;
        Ok(generation)
    }

    pub fn update_drawing(&self, canvas: Canvas) -> Result<u64, EvalError> {
        self.submit(self.generation(), Command::UpdateDrawing(canvas))
    }

    pub fn apply_stroke(&self, stroke: Vec<StrokePixel>) -> Result<u64, EvalError> {
        self.submit(self.generation(), Command::ApplyStroke(stroke))
    }

    pub fn update_config(&self, config: EvaluationConfig) -> Result<u64, EvalError> {
        self.submit(self.generation(), Command::UpdateConfig(config))
    }

    pub fn start(&self, at: Option<u64>) -> Result<u64, EvalError> {
        self.submit(self.generation(), Command::Start(at))
    }

    pub fn finish(&self, at: Option<u64>) -> Result<u64, EvalError> {
        self.submit(self.generation(), Command::Finish(at))
    }

    /// Queues a reset and supersedes everything submitted before it,
    /// including an older reset that is still rebuilding.
    pub fn reset(
        &mut self,
        reference: Canvas,
        start_time: Option<u64>,
        config: EvaluationConfig,
    ) -> Result<u64, EvalError> {
        self.cancel = self.cancel.supersede();
        let cancel = self.cancel.clone();
        self.submit(
            cancel.issued(),
            Command::Reset {
                reference,
                start_time,
                config,
                cancel,
            },
        )
    }

    /// Evaluates after every command queued so far has been applied.
    pub fn evaluate(&self, options: EvaluationOptions) -> Result<EvaluationReport, EvalError> {
        let (reply_tx, reply_rx) = channel();
        self.submit(self.generation(), Command::Evaluate(options, reply_tx))?;
        reply_rx.recv().map_err(|_| EvalError::WorkerStopped)?
    }

    /// Next event, if one is ready.
    pub fn try_event(&self) -> Option<WorkerEvent> {
        self.events.try_recv().ok()
    }

    /// Blocks until the next event arrives.
    pub fn recv_event(&self) -> Result<WorkerEvent, EvalError> {
        self.events.recv().map_err(|_| EvalError::WorkerStopped)
    }

    /// Stops the thread after the queued commands and returns the observation.
    pub fn shutdown(self) -> Result<Observation> {
        let EvaluationWorker { commands, handle, .. } = self;
        drop(commands);
        let observation = handle
            .join()
            .map_err(|_| anyhow!("Evaluation thread panicked"))?;
        info!("EvaluationWorker: Shut down");
        Ok(observation)
    }
}
