//! Image resolution protocol: local-first inspect with pull-on-miss fallback.
//!
//! The engine indexes images primarily by repo, but a just-pulled image is
//! sometimes only addressable by the exact pulled reference. The protocol
//! therefore inspects by repo first, pulls on a miss, re-inspects by repo, and
//! only then retries by full reference. The chain is modeled as an explicit
//! state machine with recorded transition reasons so the fallback order is
//! independently testable.

use bollard::models::ImageInspect;

use crate::engine::Engine;
use crate::error::{ProbeError, Result};
use crate::reference::ImageIdentifier;

/// States of the resolution protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResolveState {
    /// Inspect by repo name only.
    InspectRepo,
    /// Pull the full (normalized) reference.
    Pull,
    /// Inspect by repo name again after the pull attempt.
    ReinspectRepo,
    /// Last resort: inspect by the full normalized reference.
    ReinspectFull,
    /// An inspect succeeded.
    Found,
    /// Every lookup failed.
    Failed,
}

/// Outcome of one protocol step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepOutcome {
    Success,
    Miss,
}

/// Transition function of the resolution protocol.
///
/// The pull step never gates on its own outcome: the engine's consistency is
/// probed by re-inspecting, not by interpreting the pull response.
pub fn next_state(state: ResolveState, outcome: StepOutcome) -> ResolveState {
    match (state, outcome) {
        (ResolveState::InspectRepo, StepOutcome::Success) => ResolveState::Found,
        (ResolveState::InspectRepo, StepOutcome::Miss) => ResolveState::Pull,
        (ResolveState::Pull, _) => ResolveState::ReinspectRepo,
        (ResolveState::ReinspectRepo, StepOutcome::Success) => ResolveState::Found,
        (ResolveState::ReinspectRepo, StepOutcome::Miss) => ResolveState::ReinspectFull,
        (ResolveState::ReinspectFull, StepOutcome::Success) => ResolveState::Found,
        (ResolveState::ReinspectFull, StepOutcome::Miss) => ResolveState::Failed,
        (terminal, _) => terminal,
    }
}

/// One recorded transition of the protocol.
#[derive(Debug, Clone)]
pub struct Transition {
    pub from: ResolveState,
    pub to: ResolveState,
    pub reason: String,
}

/// Successful resolution: the inspect data plus the protocol trace.
#[derive(Debug)]
pub struct Resolution {
    /// Normalized reference (`:latest` appended when neither tag nor digest
    /// was given), as used for the pull step.
    pub reference: String,
    /// Engine inspect data for the resolved image.
    pub inspect: ImageInspect,
    /// Transitions taken to reach `Found`.
    pub trace: Vec<Transition>,
}

/// Drives the resolution protocol against an engine handle.
pub struct Resolver<'a> {
    engine: &'a Engine,
}

impl<'a> Resolver<'a> {
    pub fn new(engine: &'a Engine) -> Self {
        Self { engine }
    }

    /// Resolve an image, pulling it through the engine if it is not local.
    ///
    /// Returns [`ProbeError::ImageNotFound`] when every lookup misses, or the
    /// last unexpected fault when one occurred along the way.
    pub async fn resolve(&self, full_name: &str) -> Result<Resolution> {
        let id = ImageIdentifier::parse(full_name);
        let pull_reference = ImageIdentifier::normalized_reference(full_name);

        let mut state = ResolveState::InspectRepo;
        let mut trace: Vec<Transition> = Vec::new();
        let mut found: Option<ImageInspect> = None;
        let mut last_fault: Option<ProbeError> = None;

        loop {
            match state {
                ResolveState::InspectRepo
                | ResolveState::ReinspectRepo
                | ResolveState::ReinspectFull => {
                    let target = if state == ResolveState::ReinspectFull {
                        pull_reference.as_str()
                    } else {
                        id.repo.as_str()
                    };

                    match self.engine.inspect_image(target).await {
                        Ok(inspect) => {
                            let next = next_state(state, StepOutcome::Success);
                            record(
                                &mut trace,
                                state,
                                next,
                                format!("inspect of '{}' succeeded", target),
                            );
                            found = Some(inspect);
                            state = next;
                        }
                        Err(err) => {
                            let next = next_state(state, StepOutcome::Miss);
                            record(
                                &mut trace,
                                state,
                                next,
                                format!("inspect of '{}' failed: {}", target, err),
                            );
                            if !err.is_not_found() {
                                last_fault = Some(err);
                            }
                            state = next;
                        }
                    }
                }
                ResolveState::Pull => {
                    let next = next_state(state, StepOutcome::Success);
                    match self.engine.pull_image(&pull_reference).await {
                        Ok(()) => record(
                            &mut trace,
                            state,
                            next,
                            format!("pull of '{}' completed", pull_reference),
                        ),
                        // The pull outcome never gates the retry chain; the
                        // engine is re-inspected either way.
                        Err(err) => record(
                            &mut trace,
                            state,
                            next,
                            format!("pull of '{}' failed: {}", pull_reference, err),
                        ),
                    }
                    state = next;
                }
                ResolveState::Found | ResolveState::Failed => break,
            }
        }

        match found {
            Some(inspect) => {
                tracing::debug!(
                    reference = %full_name,
                    steps = trace.len(),
                    "Image resolved"
                );
                Ok(Resolution {
                    reference: pull_reference,
                    inspect,
                    trace,
                })
            }
            None => {
                tracing::warn!(reference = %full_name, "Image could not be resolved");
                Err(match last_fault {
                    Some(fault) => fault,
                    None => ProbeError::ImageNotFound(full_name.to_string()),
                })
            }
        }
    }
}

fn record(trace: &mut Vec<Transition>, from: ResolveState, to: ResolveState, reason: String) {
    tracing::debug!(?from, ?to, %reason, "Resolver transition");
    trace.push(Transition { from, to, reason });
}
