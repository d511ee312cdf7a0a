// Scheduler / Runner
// Dependency-gated concurrent execution of a loaded pipeline

use crate::data::{Value, DEFAULT_OUTPUT};
use crate::events::{ChangeEvent, ChangeNotifier, ChangeSender};
use crate::state::PipelineState;
use crate::step::{OnFire, Step, Trigger};

use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

/// Engine-level failures. Step failures are not engine failures; they
/// surface as suppressed publications and diagnostics instead.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("step task panicked: {0}")]
    TaskPanicked(String),
}

/// A parsed dependency reference: `stepName[:outputName]`, with the
/// output defaulting to `default`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DepRef {
    pub step: String,
    pub output: String,
}

impl DepRef {
    pub fn parse(raw: &str) -> Self {
        match raw.split_once(':') {
            Some((step, output)) => Self {
                step: step.to_string(),
                output: output.to_string(),
            },
            None => Self {
                step: raw.to_string(),
                output: DEFAULT_OUTPUT.to_string(),
            },
        }
    }
}

/// A loaded, executable pipeline.
///
/// The step map is shared: trigger fires clone the pipeline (minus its
/// triggers) to spawn independent runs over the same immutable steps.
#[derive(Debug)]
pub struct Pipeline {
    steps: Arc<HashMap<String, Arc<dyn Step>>>,
    triggers: HashMap<String, Arc<dyn Trigger>>,
    inputs: Arc<HashMap<String, Vec<String>>>,
    on_change: Option<ChangeSender>,
}

impl Clone for Pipeline {
    fn clone(&self) -> Self {
        Self {
            steps: self.steps.clone(),
            triggers: self.triggers.clone(),
            inputs: self.inputs.clone(),
            on_change: self.on_change.clone(),
        }
    }
}

impl Pipeline {
    pub(crate) fn new(
        steps: HashMap<String, Arc<dyn Step>>,
        triggers: HashMap<String, Arc<dyn Trigger>>,
        inputs: HashMap<String, Vec<String>>,
    ) -> Self {
        Self {
            steps: Arc::new(steps),
            triggers,
            inputs: Arc::new(inputs),
            on_change: None,
        }
    }

    /// Install a change-event sink for subsequent runs.
    pub fn set_on_change(&mut self, sender: ChangeSender) {
        self.on_change = Some(sender);
    }

    pub fn step_names(&self) -> Vec<&str> {
        self.steps.keys().map(String::as_str).collect()
    }

    pub fn trigger_names(&self) -> Vec<&str> {
        self.triggers.keys().map(String::as_str).collect()
    }

    pub fn has_triggers(&self) -> bool {
        !self.triggers.is_empty()
    }

    /// A fresh pipeline over the same step map, with triggers excluded.
    pub fn without_triggers(&self) -> Pipeline {
        Pipeline {
            steps: self.steps.clone(),
            triggers: HashMap::new(),
            inputs: self.inputs.clone(),
            on_change: self.on_change.clone(),
        }
    }

    /// Install the trigger runner: each registered trigger gets a handler
    /// that builds a steps-only pipeline over the shared map and hands it
    /// to `handler` together with the fire payload. Concurrent fires
    /// produce concurrent independent runs.
    pub fn arm_triggers<F>(&self, handler: F)
    where
        F: Fn(Pipeline, Value) + Send + Sync + 'static,
    {
        let handler = Arc::new(handler);
        for trigger in self.triggers.values() {
            let fresh = self.without_triggers();
            let handler = handler.clone();
            let on_fire: OnFire = Arc::new(move |data| {
                handler(fresh.clone(), data);
            });
            trigger.set_on_trigger(on_fire);
        }
    }

    /// Execute one run with a fresh state. Returns the state for
    /// inspection once every step task has terminated.
    pub async fn run(&self, token: &CancellationToken) -> Result<Arc<PipelineState>, EngineError> {
        let state = Arc::new(PipelineState::new());
        self.run_with_state(token, state.clone()).await?;
        Ok(state)
    }

    /// Execute one run against a caller-provided state, which may carry
    /// pre-populated entries (the for-each step injects its loop bindings
    /// this way).
    ///
    /// One task is spawned per step. Each task awaits its dependencies'
    /// barriers, verifies the awaited outputs were actually published,
    /// runs the step, publishes the bag and signals its own barrier. Any
    /// exit path closes the barrier - a skipped or failed step wakes its
    /// awaiters, which observe the missing output and skip themselves.
    pub async fn run_with_state(
        &self,
        token: &CancellationToken,
        state: Arc<PipelineState>,
    ) -> Result<(), EngineError> {
        let mut senders = HashMap::new();
        let mut receivers = HashMap::new();
        for name in self.steps.keys() {
            let (tx, rx) = watch::channel(false);
            senders.insert(name.clone(), tx);
            receivers.insert(name.clone(), rx);
        }

        let mut handles = Vec::with_capacity(self.steps.len());

        for (name, step) in self.steps.iter() {
            let Some(barrier) = senders.remove(name) else {
                continue;
            };

            let deps: Vec<(DepRef, Option<watch::Receiver<bool>>)> = self
                .inputs
                .get(name)
                .map(|raw_deps| {
                    raw_deps
                        .iter()
                        .map(|raw| {
                            let dep = DepRef::parse(raw);
                            let rx = receivers.get(&dep.step).cloned();
                            (dep, rx)
                        })
                        .collect()
                })
                .unwrap_or_default();

            handles.push(tokio::spawn(step_task(
                name.clone(),
                step.clone(),
                deps,
                barrier,
                state.clone(),
                token.clone(),
                self.on_change.clone(),
            )));
        }

        drop(receivers);

        // The run terminates only when every task has returned, even
        // under cancellation.
        let mut panicked = None;
        for handle in handles {
            if let Err(err) = handle.await {
                panicked = Some(err.to_string());
            }
        }

        match panicked {
            Some(message) => Err(EngineError::TaskPanicked(message)),
            None => Ok(()),
        }
    }
}

/// State machine of one step task:
/// waiting -> (aborted | ready) -> running -> (published | failed) -> exited.
/// The barrier sender is dropped on every path, so awaiters always wake.
async fn step_task(
    name: String,
    step: Arc<dyn Step>,
    deps: Vec<(DepRef, Option<watch::Receiver<bool>>)>,
    barrier: watch::Sender<bool>,
    state: Arc<PipelineState>,
    token: CancellationToken,
    on_change: Option<ChangeSender>,
) {
    for (dep, rx) in deps {
        if let Some(mut rx) = rx {
            // Ok means the dependency published; Err means its task
            // exited without publishing. Either way the state check below
            // decides.
            let _ = rx.wait_for(|published| *published).await;
        }

        if state.get(&dep.step, &dep.output).is_none() {
            tracing::debug!(
                step = %name,
                dependency = %dep.step,
                output = %dep.output,
                "upstream output not published, skipping"
            );
            return;
        }
    }

    if token.is_cancelled() {
        tracing::debug!(step = %name, "run cancelled before step start");
        return;
    }

    on_change.notify(ChangeEvent::start(&name));
    tracing::debug!(step = %name, "running step");

    match step.run(&token, &state).await {
        Ok(bag) => {
            state.set(&name, bag.clone());
            let _ = barrier.send(true);
            tracing::debug!(step = %name, outputs = bag.len(), "step completed");
            on_change.notify(ChangeEvent::end(&name, bag));
        }
        Err(err) => {
            tracing::error!(step = %name, error = %err, "step failed");
        }
    }
}
