// Pipeline State
// Shared per-run result store under a readers/writer discipline

use crate::data::{OutputBag, Value, DEFAULT_OUTPUT};

use std::collections::HashMap;
use std::sync::RwLock;

/// Results of executed steps for a single run.
///
/// A step name is set exactly once per run; the engine enforces this by
/// construction, since every step task runs at most once. Readers observe
/// either the previous or the next full bag, never a partial write.
#[derive(Debug, Default)]
pub struct PipelineState {
    results: RwLock<HashMap<String, OutputBag>>,
}

impl PipelineState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Look up a single output of a step. `None` means the step has not
    /// published (or published a bag without this output name).
    pub fn get(&self, step: &str, output: &str) -> Option<Value> {
        let results = self.results.read().unwrap_or_else(|e| e.into_inner());
        results.get(step).and_then(|bag| bag.get(output)).cloned()
    }

    /// Publish a step's output bag. Overwrites any prior entry.
    pub fn set(&self, step: &str, bag: OutputBag) {
        let mut results = self.results.write().unwrap_or_else(|e| e.into_inner());
        results.insert(step.to_string(), bag);
    }

    /// Whether a step has published anything at all.
    pub fn contains(&self, step: &str) -> bool {
        let results = self.results.read().unwrap_or_else(|e| e.into_inner());
        results.contains_key(step)
    }

    /// Full copy of the current results, for inspection after a run.
    pub fn snapshot(&self) -> HashMap<String, OutputBag> {
        let results = self.results.read().unwrap_or_else(|e| e.into_inner());
        results.clone()
    }

    /// Project the current results into the `ctx` object the expression
    /// environment evaluates against.
    ///
    /// A bag's `default` entry binds directly as `ctx.<step>`; every other
    /// output binds as `ctx.<step>.<output>`. When a step has both, the
    /// named outputs are merged over the default (which stays reachable
    /// under `ctx.<step>.default` unless it is itself an object, in which
    /// case its keys are flattened in first).
    pub fn context_projection(&self) -> Value {
        let results = self.results.read().unwrap_or_else(|e| e.into_inner());
        let mut ctx = HashMap::new();

        for (step, bag) in results.iter() {
            let named: Vec<(&String, &Value)> =
                bag.iter().filter(|(k, _)| *k != DEFAULT_OUTPUT).collect();

            let entry = if named.is_empty() {
                bag.get(DEFAULT_OUTPUT).cloned().unwrap_or(Value::Null)
            } else {
                let mut obj = HashMap::new();
                match bag.get(DEFAULT_OUTPUT) {
                    Some(Value::Object(map)) => obj.extend(map.clone()),
                    Some(other) => {
                        obj.insert(DEFAULT_OUTPUT.to_string(), other.clone());
                    }
                    None => {}
                }
                for (k, v) in named {
                    obj.insert(k.clone(), v.clone());
                }
                Value::Object(obj)
            };

            ctx.insert(step.clone(), entry);
        }

        Value::Object(ctx)
    }
}
