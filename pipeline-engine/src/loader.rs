// Pipeline Loader
// Builds the executable pipeline from a declarative configuration

use crate::config::PipelineConfig;
use crate::registry::RegistryEntry;
use crate::runner::{DepRef, Pipeline};
use crate::step::{BuildContext, Step, StepError, Trigger};

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;
use thiserror::Error;

/// Fatal configuration errors raised while loading.
#[derive(Debug, Error)]
pub enum LoadError {
    #[error("unknown step type: {0}")]
    UnknownKind(String),

    #[error("duplicate step name: {0}")]
    DuplicateStep(String),

    #[error("step '{step}' depends on undeclared step '{dependency}'")]
    MissingDependency { step: String, dependency: String },

    #[error("circular dependency detected among steps: {}", .0.join(", "))]
    CycleDetected(Vec<String>),

    #[error("failed to construct step '{name}': {source}")]
    StepConstruction {
        name: String,
        #[source]
        source: StepError,
    },
}

/// Build an executable [`Pipeline`] from a parsed configuration.
///
/// Every spec is looked up in the registry, constructed through its
/// factory, and placed into the step or trigger map by registry category.
/// Dependency strings are recorded verbatim; the scheduler parses them
/// lazily so output-scoped references stay cheap.
pub fn load_pipeline(config: &PipelineConfig, ctx: &BuildContext) -> Result<Pipeline, LoadError> {
    let mut steps: HashMap<String, Arc<dyn Step>> = HashMap::new();
    let mut triggers: HashMap<String, Arc<dyn Trigger>> = HashMap::new();
    let mut inputs: HashMap<String, Vec<String>> = HashMap::new();

    for spec in &config.steps {
        if steps.contains_key(&spec.name) || triggers.contains_key(&spec.name) {
            return Err(LoadError::DuplicateStep(spec.name.clone()));
        }

        let entry = ctx
            .registry
            .lookup(&spec.kind)
            .ok_or_else(|| LoadError::UnknownKind(spec.kind.clone()))?;

        match entry {
            RegistryEntry::Step(factory) => {
                let step = factory(&spec.name, &spec.config, ctx).map_err(|source| {
                    LoadError::StepConstruction {
                        name: spec.name.clone(),
                        source,
                    }
                })?;
                steps.insert(spec.name.clone(), step);
            }
            RegistryEntry::Trigger(factory) => {
                let trigger = factory(&spec.name, &spec.config, ctx).map_err(|source| {
                    LoadError::StepConstruction {
                        name: spec.name.clone(),
                        source,
                    }
                })?;
                triggers.insert(spec.name.clone(), trigger);
            }
        }

        inputs.insert(spec.name.clone(), spec.inputs.clone());
    }

    validate_dependencies(&inputs, &steps, &triggers)?;
    detect_cycles(&inputs)?;

    Ok(Pipeline::new(steps, triggers, inputs))
}

fn validate_dependencies(
    inputs: &HashMap<String, Vec<String>>,
    steps: &HashMap<String, Arc<dyn Step>>,
    triggers: &HashMap<String, Arc<dyn Trigger>>,
) -> Result<(), LoadError> {
    for (name, deps) in inputs {
        for raw in deps {
            let dep = DepRef::parse(raw);
            if !steps.contains_key(&dep.step) && !triggers.contains_key(&dep.step) {
                return Err(LoadError::MissingDependency {
                    step: name.clone(),
                    dependency: dep.step,
                });
            }
        }
    }
    Ok(())
}

/// Kahn's algorithm over the dependency DAG. Anything left unprocessed
/// after the queue drains sits on a cycle.
fn detect_cycles(inputs: &HashMap<String, Vec<String>>) -> Result<(), LoadError> {
    let mut in_degree: HashMap<&str, usize> = HashMap::new();
    let mut dependents: HashMap<&str, Vec<&str>> = HashMap::new();

    for (name, deps) in inputs {
        in_degree.entry(name).or_insert(0);
        for raw in deps {
            let dep_step = DepRef::parse(raw).step;
            // Edges to undeclared names were rejected above.
            if let Some((dep_key, _)) = inputs.get_key_value(dep_step.as_str()) {
                dependents.entry(dep_key.as_str()).or_default().push(name);
                *in_degree.entry(name).or_insert(0) += 1;
            }
        }
    }

    let mut queue: VecDeque<&str> = in_degree
        .iter()
        .filter(|(_, &degree)| degree == 0)
        .map(|(&name, _)| name)
        .collect();

    let mut processed = HashSet::new();

    while let Some(name) = queue.pop_front() {
        processed.insert(name);
        if let Some(next) = dependents.get(name) {
            for &dependent in next {
                if let Some(degree) = in_degree.get_mut(dependent) {
                    *degree -= 1;
                    if *degree == 0 {
                        queue.push_back(dependent);
                    }
                }
            }
        }
    }

    if processed.len() != in_degree.len() {
        let mut cycle: Vec<String> = in_degree
            .keys()
            .filter(|name| !processed.contains(**name))
            .map(|name| name.to_string())
            .collect();
        cycle.sort();
        return Err(LoadError::CycleDetected(cycle));
    }

    Ok(())
}
