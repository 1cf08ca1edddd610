//! Lifecycle Controller.
//!
//! ```text
//! Uninstalled ──install──▶ Installing ──ok──▶ Installed ──activate──▶ Activating ──▶ Active ──▶ Superseded
//!                               │                 │
//!                               └──fail──▶ Redundant ◀──superseded while waiting
//! ```
//!
//! [`transition`] is a pure function from (state, input) to (state, effects).
//! [`LifecycleController`] performs the effects against the cache store,
//! network and host, and feeds the results back in as inputs.

use std::fmt;
use std::sync::Arc;

use futures::future::{join_all, try_join_all};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::{debug, error, info, warn};

use crate::cache::CacheStore;
use crate::config::WorkerConfig;
use crate::error::{ServiceWorkerError, SwResult};
use crate::host::{NetworkFetch, WorkerHost};
use crate::request::Request;

// ==================== State Machine ====================

/// Lifecycle state of one worker (and of the generation it owns).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LifecycleState {
    #[default]
    Uninstalled,
    /// Priming the cache generation.
    Installing,
    /// Installed, waiting for activation.
    Installed,
    /// Deleting stale generations.
    Activating,
    /// Serving; this worker's generation is current.
    Active,
    /// Replaced by a newer worker after having been active.
    Superseded,
    /// Install failed, or replaced before activation. Never serves.
    Redundant,
}

impl LifecycleState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Uninstalled => "uninstalled",
            Self::Installing => "installing",
            Self::Installed => "installed",
            Self::Activating => "activating",
            Self::Active => "active",
            Self::Superseded => "superseded",
            Self::Redundant => "redundant",
        }
    }

    /// Whether fetch events are routed through this worker.
    pub fn controls_fetches(&self) -> bool {
        matches!(self, Self::Activating | Self::Active)
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Superseded | Self::Redundant)
    }
}

impl fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Inputs that drive the state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleInput {
    Install,
    InstallSucceeded,
    InstallFailed,
    Activate,
    ActivateCompleted,
    Supersede,
}

impl fmt::Display for LifecycleInput {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Install => "install",
            Self::InstallSucceeded => "install-succeeded",
            Self::InstallFailed => "install-failed",
            Self::Activate => "activate",
            Self::ActivateCompleted => "activate-completed",
            Self::Supersede => "supersede",
        })
    }
}

/// Work the controller must carry out after a transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Effect {
    /// Fetch every manifest URL and store the batch in the new generation.
    PrimeGeneration,
    /// Tell the host not to wait for open clients before activating.
    SkipWaiting,
    /// Delete every generation other than ours.
    PurgeStaleGenerations,
    /// Tell the host to route all clients through this worker.
    ClaimClients,
}

/// Result of applying one input.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transition {
    pub state: LifecycleState,
    pub effects: Vec<Effect>,
}

impl Transition {
    fn to(state: LifecycleState, effects: &[Effect]) -> Self {
        Self {
            state,
            effects: effects.to_vec(),
        }
    }
}

/// Apply `input` in `state`.
pub fn transition(state: LifecycleState, input: LifecycleInput) -> SwResult<Transition> {
    use Effect::*;
    use LifecycleInput as I;
    use LifecycleState as S;

    let next = match (state, input) {
        (S::Uninstalled, I::Install) => Transition::to(S::Installing, &[PrimeGeneration]),
        (S::Installing, I::InstallSucceeded) => Transition::to(S::Installed, &[SkipWaiting]),
        (S::Installing, I::InstallFailed) => Transition::to(S::Redundant, &[]),
        (S::Installed, I::Activate) => Transition::to(S::Activating, &[PurgeStaleGenerations]),
        (S::Activating, I::ActivateCompleted) => Transition::to(S::Active, &[ClaimClients]),
        (S::Installed, I::Supersede) => Transition::to(S::Redundant, &[]),
        (S::Active, I::Supersede) => Transition::to(S::Superseded, &[]),
        (state, input) => return Err(ServiceWorkerError::InvalidTransition { state, input }),
    };
    Ok(next)
}

// ==================== Reports ====================

/// Outcome of a successful install.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct InstallReport {
    pub generation: String,
    /// Number of manifest entries stored.
    pub assets: usize,
}

/// Outcome of an activation. Failed deletions do not fail activation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ActivationReport {
    pub generation: String,
    pub deleted: Vec<String>,
    /// Stale generations that could not be deleted, with the reason.
    pub failed: Vec<(String, String)>,
}

// ==================== Controller ====================

/// Drives install and activation of one cache generation.
pub struct LifecycleController {
    config: Arc<WorkerConfig>,
    store: Arc<dyn CacheStore>,
    network: Arc<dyn NetworkFetch>,
    host: Arc<dyn WorkerHost>,
    state: RwLock<LifecycleState>,
}

/// What running a chain of effects produced.
#[derive(Default)]
struct Run {
    install: Option<SwResult<InstallReport>>,
    activation: Option<ActivationReport>,
}

impl LifecycleController {
    pub fn new(
        config: Arc<WorkerConfig>,
        store: Arc<dyn CacheStore>,
        network: Arc<dyn NetworkFetch>,
        host: Arc<dyn WorkerHost>,
    ) -> Self {
        Self {
            config,
            store,
            network,
            host,
            state: RwLock::new(LifecycleState::Uninstalled),
        }
    }

    pub async fn state(&self) -> LifecycleState {
        *self.state.read().await
    }

    pub fn generation(&self) -> &str {
        &self.config.cache_name
    }

    /// Prime the generation. Fails as a whole if any asset fails.
    pub async fn install(&self) -> SwResult<InstallReport> {
        info!(generation = self.generation(), "Installing");
        let run = self.drive(LifecycleInput::Install).await?;
        run.install.unwrap_or_else(|| {
            Err(ServiceWorkerError::cache("install produced no outcome"))
        })
    }

    /// Cut over to this generation and garbage-collect the others.
    pub async fn activate(&self) -> SwResult<ActivationReport> {
        info!(generation = self.generation(), "Activating");
        let run = self.drive(LifecycleInput::Activate).await?;
        Ok(run.activation.unwrap_or_default())
    }

    /// Mark this worker as replaced by a newer one.
    pub async fn supersede(&self) -> SwResult<LifecycleState> {
        self.drive(LifecycleInput::Supersede).await?;
        Ok(self.state().await)
    }

    async fn apply(&self, input: LifecycleInput) -> SwResult<Transition> {
        let mut state = self.state.write().await;
        let from = *state;
        let next = transition(from, input)?;
        info!(
            generation = self.generation(),
            %from,
            to = %next.state,
            %input,
            "Lifecycle transition"
        );
        *state = next.state;
        Ok(next)
    }

    /// Apply `input`, perform its effects, and keep going while effects produce follow-up inputs.
    async fn drive(&self, input: LifecycleInput) -> SwResult<Run> {
        let mut run = Run::default();
        let mut pending = Some(input);

        while let Some(input) = pending.take() {
            let next = self.apply(input).await?;
            for effect in next.effects {
                if let Some(follow_up) = self.perform(effect, &mut run).await {
                    pending = Some(follow_up);
                }
            }
        }

        Ok(run)
    }

    async fn perform(&self, effect: Effect, run: &mut Run) -> Option<LifecycleInput> {
        debug!(generation = self.generation(), ?effect, "Performing effect");
        match effect {
            Effect::PrimeGeneration => {
                let outcome = self.prime().await;
                let follow_up = match &outcome {
                    Ok(report) => {
                        info!(
                            generation = %report.generation,
                            assets = report.assets,
                            "App shell cached"
                        );
                        LifecycleInput::InstallSucceeded
                    }
                    Err(e) => {
                        error!(generation = self.generation(), error = %e, "Install failed");
                        LifecycleInput::InstallFailed
                    }
                };
                run.install = Some(outcome);
                Some(follow_up)
            }
            Effect::SkipWaiting => {
                if let Err(e) = self.host.skip_waiting().await {
                    warn!(error = %e, "Host rejected skip-waiting");
                }
                None
            }
            Effect::PurgeStaleGenerations => {
                run.activation = Some(self.purge_stale().await);
                Some(LifecycleInput::ActivateCompleted)
            }
            Effect::ClaimClients => {
                if let Err(e) = self.host.claim_clients().await {
                    warn!(error = %e, "Host rejected client claim");
                }
                None
            }
        }
    }

    /// Fetch every manifest URL concurrently, then store the batch.
    async fn prime(&self) -> SwResult<InstallReport> {
        let generation = self.generation().to_string();
        let failed = |reason: String| ServiceWorkerError::InstallFailed {
            generation: generation.clone(),
            reason,
        };

        self.store
            .open(&generation)
            .await
            .map_err(|e| failed(e.to_string()))?;

        let urls = self.config.manifest_urls().map_err(|e| failed(e.to_string()))?;
        let fetches = urls.into_iter().map(|url| async move {
            let request = Request::get(url);
            let response = self.network.fetch(&request).await?;
            if !response.is_success() {
                return Err(ServiceWorkerError::UnexpectedStatus {
                    url: request.url.to_string(),
                    status: response.status,
                });
            }
            debug!(url = %request.url, bytes = response.body.len(), "Fetched shell asset");
            Ok::<_, ServiceWorkerError>((request.key(), response))
        });

        let entries = try_join_all(fetches)
            .await
            .map_err(|e| failed(e.to_string()))?;
        let assets = entries.len();

        self.store
            .put_all(&generation, entries)
            .await
            .map_err(|e| failed(e.to_string()))?;

        Ok(InstallReport { generation, assets })
    }

    /// Delete every generation except ours. Failures are logged and reported, never raised.
    async fn purge_stale(&self) -> ActivationReport {
        let generation = self.generation().to_string();
        let mut report = ActivationReport {
            generation: generation.clone(),
            ..Default::default()
        };

        let names = match self.store.keys().await {
            Ok(names) => names,
            Err(e) => {
                warn!(error = %e, "Could not list cache generations, skipping cleanup");
                return report;
            }
        };

        let stale: Vec<String> = names.into_iter().filter(|name| *name != generation).collect();
        let deletions = stale.iter().map(|name| async move {
            info!(generation = %name, "Deleting old cache");
            (name, self.store.delete(name).await)
        });

        for (name, outcome) in join_all(deletions).await {
            match outcome {
                Ok(true) => report.deleted.push(name.clone()),
                Ok(false) => debug!(generation = %name, "Old cache already gone"),
                Err(e) => {
                    let soft = ServiceWorkerError::CleanupFailed {
                        generation: name.clone(),
                        reason: e.to_string(),
                    };
                    warn!(error = %soft, "Stale cache left behind");
                    report.failed.push((name.clone(), e.to_string()));
                }
            }
        }

        report
    }
}
