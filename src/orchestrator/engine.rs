use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use tokio::fs;
use tokio::sync::{Mutex, OwnedMutexGuard, RwLock, Semaphore};
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use crate::config::{ServicePaths, WardenConfig};
use crate::descriptor::DescriptorGenerator;
use crate::error::{Result, WardenError};
use crate::host::{HostRunner, HostStatus};
use crate::notification::{EventLogSink, EventType, Notifier, UnitEvent};
use crate::resolver::DependencyResolver;
use crate::unit::{StartMode, UnitRecord, UnitState, UnitStore};

use super::CancelSignal;

/// Report of a dependency-ordered batch operation. A failure aborts
/// the remaining sequence without rolling back finished units.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BatchOutcome {
    pub succeeded: Vec<String>,
    pub skipped: Vec<String>,
    pub failed: Option<(String, String)>,
    pub aborted: Vec<String>,
}

impl BatchOutcome {
    pub fn is_success(&self) -> bool {
        self.failed.is_none()
    }
}

/// Drives every lifecycle transition. The registry it owns is the
/// single consistency domain for unit metadata and status; callers
/// never get a mutable handle to it.
pub struct Orchestrator {
    config: WardenConfig,
    paths: ServicePaths,
    store: UnitStore,
    registry: RwLock<Vec<UnitRecord>>,
    unit_locks: DashMap<String, Arc<Mutex<()>>>,
    transition_permits: Arc<Semaphore>,
    signals: RwLock<HashMap<String, CancelSignal>>,
    notifier: Notifier,
}

impl Orchestrator {
    pub fn new(config: WardenConfig, paths: ServicePaths, notifier: Notifier) -> Self {
        let max_parallel = config.orchestrator.max_parallel_ops;
        let notifier = if config.notification.enabled && config.notification.event_log {
            notifier.with_sink(Arc::new(EventLogSink::new(paths.events_dir.clone())))
        } else {
            notifier
        };
        Self {
            config,
            store: UnitStore::new(&paths.root),
            paths,
            registry: RwLock::new(Vec::new()),
            unit_locks: DashMap::new(),
            transition_permits: Arc::new(Semaphore::new(max_parallel)),
            signals: RwLock::new(HashMap::new()),
            notifier,
        }
    }

    /// Loads persisted units into the registry and prepares the
    /// on-disk layout.
    pub async fn init(&self) -> Result<()> {
        self.store.init().await?;
        fs::create_dir_all(&self.paths.services_dir).await?;

        let units = self.store.load_all().await?;
        info!(count = units.len(), "Loaded unit records");
        *self.registry.write().await = units;
        Ok(())
    }

    // ---- registry access -------------------------------------------------

    /// Registers a new unit. Guards and the dependency resolver run
    /// before any side effect: a rejected unit is never persisted.
    pub async fn register(&self, unit: UnitRecord) -> Result<()> {
        unit.validate()?;

        // Uniqueness check and insert stay under one write guard so a
        // concurrent register of the same id cannot slip between them.
        let mut registry = self.registry.write().await;
        if registry.iter().any(|u| u.id == unit.id) {
            return Err(WardenError::UnitAlreadyExists(unit.id.clone()));
        }
        DependencyResolver::validate(&unit, &registry)?;

        self.store.save(&unit).await?;
        let event = UnitEvent::new(EventType::UnitRegistered, &unit.id);
        registry.push(unit);
        drop(registry);
        self.notifier.notify(&event).await;
        Ok(())
    }

    /// Updates a unit's metadata. Status and history stay whatever the
    /// orchestrator last recorded; operator edits cannot fabricate a
    /// lifecycle state.
    pub async fn update(&self, mut unit: UnitRecord) -> Result<()> {
        unit.validate()?;

        // Same single-guard discipline as register: the busy check,
        // validation and slot replacement see one registry snapshot.
        let mut registry = self.registry.write().await;
        let current = registry
            .iter()
            .find(|u| u.id == unit.id)
            .ok_or_else(|| WardenError::UnitNotFound(unit.id.clone()))?;
        if current.status.is_busy() {
            return Err(WardenError::InvalidTransition {
                unit_id: unit.id.clone(),
                from: current.status.to_string(),
                to: "update".to_string(),
            });
        }
        unit.status = current.status;
        unit.state_history = current.state_history.clone();
        unit.created_at = current.created_at;
        unit.installed_at = current.installed_at;
        DependencyResolver::validate(&unit, &registry)?;

        self.store.save(&unit).await?;
        let event = UnitEvent::new(EventType::UnitUpdated, &unit.id);
        if let Some(slot) = registry.iter_mut().find(|u| u.id == unit.id) {
            *slot = unit;
        }
        drop(registry);
        self.notifier.notify(&event).await;
        Ok(())
    }

    /// Deletes a unit record. Only legal once teardown is complete.
    pub async fn remove(&self, unit_id: &str) -> Result<()> {
        let _guard = self.lock_unit(unit_id).await;

        {
            let registry = self.registry.read().await;
            let unit = registry
                .iter()
                .find(|u| u.id == unit_id)
                .ok_or_else(|| WardenError::UnitNotFound(unit_id.to_string()))?;
            if unit.status != UnitState::Uninstalled {
                return Err(WardenError::InvalidTransition {
                    unit_id: unit_id.to_string(),
                    from: unit.status.to_string(),
                    to: "removed".to_string(),
                });
            }
            // A unit someone still depends on cannot disappear.
            if let Some(dependent) = registry
                .iter()
                .find(|u| u.dependencies.iter().any(|d| d == unit_id))
            {
                return Err(WardenError::InvalidUnit(format!(
                    "unit {} is a dependency of {}",
                    unit_id, dependent.id
                )));
            }
        }

        self.store.delete(unit_id).await?;
        self.registry.write().await.retain(|u| u.id != unit_id);
        self.notifier
            .notify(&UnitEvent::new(EventType::UnitRemoved, unit_id))
            .await;
        Ok(())
    }

    pub async fn get(&self, unit_id: &str) -> Option<UnitRecord> {
        self.registry
            .read()
            .await
            .iter()
            .find(|u| u.id == unit_id)
            .cloned()
    }

    pub async fn list(&self) -> Vec<UnitRecord> {
        self.registry.read().await.clone()
    }

    // ---- cancellation ----------------------------------------------------

    /// Requests cancellation of the unit's pending transition. Takes
    /// effect before the host subprocess spawns; afterwards it only
    /// shortens the orchestrator's wait.
    pub async fn request_cancel(&self, unit_id: &str) {
        self.signals
            .write()
            .await
            .entry(unit_id.to_string())
            .or_default()
            .cancel();
    }

    async fn cancel_signal(&self, unit_id: &str) -> CancelSignal {
        self.signals
            .write()
            .await
            .entry(unit_id.to_string())
            .or_default()
            .clone()
    }

    fn check_cancelled(&self, unit_id: &str, signal: &CancelSignal) -> Result<()> {
        if signal.is_cancelled() {
            signal.clear();
            return Err(WardenError::Cancelled(unit_id.to_string()));
        }
        Ok(())
    }

    // ---- lifecycle transitions -------------------------------------------

    /// Install: materializes the isolated directory, renames the host
    /// binary into it, writes the descriptor, and runs the host's
    /// install subcommand.
    pub async fn install(&self, unit_id: &str) -> Result<()> {
        let _guard = self.lock_unit(unit_id).await;
        let _permit = self.acquire_permit().await?;
        let signal = self.cancel_signal(unit_id).await;

        let unit = self
            .get(unit_id)
            .await
            .ok_or_else(|| WardenError::UnitNotFound(unit_id.to_string()))?;
        if !unit.status.can_install() {
            return Err(self.invalid_transition(&unit, UnitState::Installing));
        }
        self.check_cancelled(unit_id, &signal)?;

        self.apply_transition(unit_id, UnitState::Installing, "install requested")
            .await?;

        match self.do_install(&unit, &signal).await {
            Ok(()) => {
                self.apply_transition(unit_id, UnitState::Installed, "host install succeeded")
                    .await?;
                info!(unit_id, "Unit installed");
                Ok(())
            }
            Err(e) => {
                self.fail_unit(unit_id, &format!("install failed: {}", e))
                    .await;
                if self.config.orchestrator.cleanup_failed_installs {
                    self.cleanup_unit_dir(unit_id).await;
                }
                Err(e)
            }
        }
    }

    async fn do_install(&self, unit: &UnitRecord, signal: &CancelSignal) -> Result<()> {
        let host_binary = &self.config.host.binary_path;
        if host_binary.as_os_str().is_empty() {
            return Err(WardenError::Config(
                "host.binary_path is not configured".to_string(),
            ));
        }

        let unit_dir = self.paths.unit_dir(&unit.id);
        fs::create_dir_all(self.paths.unit_logs_dir(&unit.id)).await?;

        let renamed = unit_dir.join(HostRunner::binary_name(&unit.id));
        fs::copy(host_binary, &renamed).await?;

        let descriptor = DescriptorGenerator::generate(unit)?;
        fs::write(
            unit_dir.join(DescriptorGenerator::file_name(&unit.id)),
            descriptor,
        )
        .await?;

        // Last checkpoint before the subprocess exists.
        self.check_cancelled(&unit.id, signal)?;

        HostRunner::new(&unit_dir, &renamed).install().await
    }

    /// Start: Installed/Stopped -> Starting -> Running.
    pub async fn start(&self, unit_id: &str) -> Result<()> {
        let _guard = self.lock_unit(unit_id).await;
        let _permit = self.acquire_permit().await?;
        self.start_locked(unit_id).await
    }

    async fn start_locked(&self, unit_id: &str) -> Result<()> {
        let signal = self.cancel_signal(unit_id).await;

        let unit = self
            .get(unit_id)
            .await
            .ok_or_else(|| WardenError::UnitNotFound(unit_id.to_string()))?;
        if unit.start_mode == StartMode::Disabled {
            return Err(WardenError::UnitDisabled(unit_id.to_string()));
        }
        if !unit.status.can_start() {
            return Err(self.invalid_transition(&unit, UnitState::Starting));
        }
        self.check_cancelled(unit_id, &signal)?;

        let previous = unit.status;
        self.apply_transition(unit_id, UnitState::Starting, "start requested")
            .await?;

        // Cancellation may have arrived while the transition persisted.
        if signal.is_cancelled() {
            signal.clear();
            self.force_state(unit_id, previous, "start cancelled before host invocation")
                .await;
            return Err(WardenError::Cancelled(unit_id.to_string()));
        }

        match self.runner(unit_id).start().await {
            Ok(()) => {
                self.apply_transition(unit_id, UnitState::Running, "host start succeeded")
                    .await?;
                info!(unit_id, "Unit running");
                Ok(())
            }
            Err(e) => {
                self.fail_unit(unit_id, &format!("start failed: {}", e)).await;
                Err(e)
            }
        }
    }

    /// Stop: Running -> Stopping -> Stopped, bounded by the unit's
    /// stop timeout. A timeout is reported and the unit marked Failed;
    /// there is no automatic retry.
    pub async fn stop(&self, unit_id: &str) -> Result<()> {
        let _guard = self.lock_unit(unit_id).await;
        let _permit = self.acquire_permit().await?;
        self.stop_locked(unit_id).await
    }

    async fn stop_locked(&self, unit_id: &str) -> Result<()> {
        let signal = self.cancel_signal(unit_id).await;

        let unit = self
            .get(unit_id)
            .await
            .ok_or_else(|| WardenError::UnitNotFound(unit_id.to_string()))?;
        if !unit.status.can_stop() {
            return Err(self.invalid_transition(&unit, UnitState::Stopping));
        }
        self.check_cancelled(unit_id, &signal)?;

        let previous = unit.status;
        self.apply_transition(unit_id, UnitState::Stopping, "stop requested")
            .await?;

        let timeout = Duration::from_millis(unit.stop_timeout_ms);
        match self.await_stop(unit_id, timeout, &signal).await {
            Ok(()) => {
                self.apply_transition(unit_id, UnitState::Stopped, "host stop succeeded")
                    .await?;
                info!(unit_id, "Unit stopped");
                Ok(())
            }
            Err(e @ WardenError::Cancelled(_)) => {
                // The host may still finish the stop on its own; the
                // unit must not sit in Stopping, which the status poll
                // skips. Revert and let the poll record the outcome.
                self.force_state(unit_id, previous, "stop wait cancelled, host outcome pending")
                    .await;
                warn!(unit_id, "Stop wait cancelled, host outcome pending");
                Err(e)
            }
            Err(e) => {
                self.fail_unit(unit_id, &format!("stop failed: {}", e)).await;
                Err(e)
            }
        }
    }

    /// Waits for the host's stop subcommand, honoring the timeout and
    /// cancellation. Cancellation never kills the host process: doing
    /// so could leave the registered entity inconsistent.
    async fn await_stop(
        &self,
        unit_id: &str,
        timeout: Duration,
        signal: &CancelSignal,
    ) -> Result<()> {
        let runner = self.runner(unit_id);
        let stop_fut = runner.stop();
        tokio::pin!(stop_fut);

        let deadline = Instant::now() + timeout;
        loop {
            tokio::select! {
                res = &mut stop_fut => return res,
                _ = tokio::time::sleep(Duration::from_millis(50)) => {
                    if signal.is_cancelled() {
                        signal.clear();
                        return Err(WardenError::Cancelled(unit_id.to_string()));
                    }
                    if Instant::now() >= deadline {
                        return Err(WardenError::StopTimeout {
                            unit_id: unit_id.to_string(),
                            timeout_ms: timeout.as_millis() as u64,
                        });
                    }
                }
            }
        }
    }

    /// Uninstall: stops the unit first when running, runs the host's
    /// uninstall subcommand, and removes the isolated directory only
    /// after the host reports the unit no longer registered.
    pub async fn uninstall(&self, unit_id: &str) -> Result<()> {
        let _guard = self.lock_unit(unit_id).await;
        let _permit = self.acquire_permit().await?;

        let unit = self
            .get(unit_id)
            .await
            .ok_or_else(|| WardenError::UnitNotFound(unit_id.to_string()))?;
        if !unit.status.can_uninstall() {
            return Err(self.invalid_transition(&unit, UnitState::Uninstalling));
        }

        if unit.status == UnitState::Running {
            self.stop_locked(unit_id).await?;
        }

        self.apply_transition(unit_id, UnitState::Uninstalling, "uninstall requested")
            .await?;

        let result = self.do_uninstall(unit_id).await;
        match result {
            Ok(()) => {
                self.apply_transition(unit_id, UnitState::Uninstalled, "host uninstall succeeded")
                    .await?;
                info!(unit_id, "Unit uninstalled");
                Ok(())
            }
            Err(e) => {
                self.fail_unit(unit_id, &format!("uninstall failed: {}", e))
                    .await;
                Err(e)
            }
        }
    }

    async fn do_uninstall(&self, unit_id: &str) -> Result<()> {
        let runner = self.runner(unit_id);
        runner.uninstall().await?;

        let status = runner.status().await?;
        if status != HostStatus::NonExistent {
            return Err(WardenError::Other(format!(
                "host still reports unit {} as registered ({:?})",
                unit_id, status
            )));
        }

        fs::remove_dir_all(self.paths.unit_dir(unit_id)).await?;
        Ok(())
    }

    /// Queries the host's status subcommand and reconciles the
    /// recorded state with what the host reports. Skips units that
    /// are mid-transition or not installed.
    pub async fn refresh_status(&self, unit_id: &str) -> Result<()> {
        let _guard = self.lock_unit(unit_id).await;

        let unit = self
            .get(unit_id)
            .await
            .ok_or_else(|| WardenError::UnitNotFound(unit_id.to_string()))?;
        if unit.status.is_busy() || !unit.status.is_registered() {
            return Ok(());
        }

        let observed = self.runner(unit_id).status().await?;
        let mapped = match observed {
            HostStatus::Started => Some(UnitState::Running),
            HostStatus::Stopped => Some(UnitState::Stopped),
            HostStatus::NonExistent | HostStatus::Unknown => None,
        };

        match mapped {
            Some(state) if state != unit.status => {
                debug!(unit_id, from = %unit.status, to = %state, "Status poll reconciled state");
                self.force_state(unit_id, state, "status poll").await;
            }
            Some(_) => {}
            None => {
                warn!(unit_id, ?observed, "Host status does not match records");
            }
        }
        Ok(())
    }

    /// Best-effort refresh over every registered unit, used by the
    /// polling loop.
    pub async fn refresh_all(&self) {
        let ids: Vec<String> = self
            .registry
            .read()
            .await
            .iter()
            .filter(|u| u.status.is_registered() && !u.status.is_busy())
            .map(|u| u.id.clone())
            .collect();

        let results = join_all(ids.iter().map(|id| self.refresh_status(id))).await;
        for (id, result) in ids.iter().zip(results) {
            if let Err(e) = result {
                warn!(unit_id = %id, error = %e, "Status refresh failed");
            }
        }
    }

    // ---- batch operations ------------------------------------------------

    /// Starts the given units and their dependency closures in
    /// resolver order. Already-running units are skipped (a shared
    /// dependency starts exactly once); the first failure aborts the
    /// remainder without rollback.
    pub async fn start_many(&self, unit_ids: &[String]) -> Result<BatchOutcome> {
        let order = {
            let registry = self.registry.read().await;
            DependencyResolver::start_order(unit_ids, &registry)?
        };
        debug!(?order, "Batch start order resolved");

        let mut outcome = BatchOutcome::default();
        let mut iter = order.into_iter();

        for id in iter.by_ref() {
            let unit = match self.get(&id).await {
                Some(u) => u,
                None => {
                    outcome.failed = Some((id.clone(), "unit disappeared".to_string()));
                    break;
                }
            };

            if unit.status == UnitState::Running {
                outcome.skipped.push(id);
                continue;
            }
            if unit.start_mode == StartMode::Disabled {
                outcome.skipped.push(id);
                continue;
            }

            match self.start(&id).await {
                Ok(()) => outcome.succeeded.push(id),
                Err(e) => {
                    error!(unit_id = %id, error = %e, "Batch start aborted");
                    outcome.failed = Some((id, e.to_string()));
                    break;
                }
            }
        }

        outcome.aborted = iter.collect();
        Ok(outcome)
    }

    /// Stops the given units and their dependents in reverse resolver
    /// order. Units not running are skipped.
    pub async fn stop_many(&self, unit_ids: &[String]) -> Result<BatchOutcome> {
        let order = {
            let registry = self.registry.read().await;
            DependencyResolver::stop_order(unit_ids, &registry)?
        };
        debug!(?order, "Batch stop order resolved");

        let mut outcome = BatchOutcome::default();
        let mut iter = order.into_iter();

        for id in iter.by_ref() {
            let unit = match self.get(&id).await {
                Some(u) => u,
                None => {
                    outcome.failed = Some((id.clone(), "unit disappeared".to_string()));
                    break;
                }
            };

            if unit.status != UnitState::Running {
                outcome.skipped.push(id);
                continue;
            }

            match self.stop(&id).await {
                Ok(()) => outcome.succeeded.push(id),
                Err(e) => {
                    error!(unit_id = %id, error = %e, "Batch stop aborted");
                    outcome.failed = Some((id, e.to_string()));
                    break;
                }
            }
        }

        outcome.aborted = iter.collect();
        Ok(outcome)
    }

    /// Starts every startable unit (Disabled ones excluded).
    pub async fn start_all(&self) -> Result<BatchOutcome> {
        let ids: Vec<String> = self
            .registry
            .read()
            .await
            .iter()
            .filter(|u| u.start_mode != StartMode::Disabled)
            .map(|u| u.id.clone())
            .collect();
        self.start_many(&ids).await
    }

    /// Stops every running unit, dependents first.
    pub async fn stop_all(&self) -> Result<BatchOutcome> {
        let ids: Vec<String> = self
            .registry
            .read()
            .await
            .iter()
            .filter(|u| u.status == UnitState::Running)
            .map(|u| u.id.clone())
            .collect();
        self.stop_many(&ids).await
    }

    // ---- internals -------------------------------------------------------

    async fn lock_unit(&self, unit_id: &str) -> OwnedMutexGuard<()> {
        let mutex = self
            .unit_locks
            .entry(unit_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        mutex.lock_owned().await
    }

    async fn acquire_permit(&self) -> Result<tokio::sync::OwnedSemaphorePermit> {
        Arc::clone(&self.transition_permits)
            .acquire_owned()
            .await
            .map_err(|_| WardenError::Other("orchestrator is shutting down".to_string()))
    }

    fn runner(&self, unit_id: &str) -> HostRunner {
        let unit_dir = self.paths.unit_dir(unit_id);
        let binary = unit_dir.join(HostRunner::binary_name(unit_id));
        HostRunner::new(unit_dir, binary)
    }

    fn invalid_transition(&self, unit: &UnitRecord, to: UnitState) -> WardenError {
        WardenError::InvalidTransition {
            unit_id: unit.id.clone(),
            from: unit.status.to_string(),
            to: to.to_string(),
        }
    }

    /// Applies a checked transition, persists the record, and notifies.
    async fn apply_transition(&self, unit_id: &str, to: UnitState, reason: &str) -> Result<()> {
        let (from, snapshot) = {
            let mut registry = self.registry.write().await;
            let unit = registry
                .iter_mut()
                .find(|u| u.id == unit_id)
                .ok_or_else(|| WardenError::UnitNotFound(unit_id.to_string()))?;
            let from = unit.status;
            if !from.can_transition_to(to) {
                return Err(WardenError::InvalidTransition {
                    unit_id: unit_id.to_string(),
                    from: from.to_string(),
                    to: to.to_string(),
                });
            }
            unit.transition(to, reason);
            (from, unit.clone())
        };

        self.store.save(&snapshot).await?;
        self.notifier
            .notify(
                &UnitEvent::new(EventType::StateChanged, unit_id)
                    .with_transition(from, to)
                    .with_message(reason),
            )
            .await;
        Ok(())
    }

    /// Records an observed or corrective state without transition
    /// checking. Reserved for poll reconciliation and cancel reverts.
    async fn force_state(&self, unit_id: &str, to: UnitState, reason: &str) {
        let snapshot = {
            let mut registry = self.registry.write().await;
            match registry.iter_mut().find(|u| u.id == unit_id) {
                Some(unit) => {
                    let from = unit.status;
                    unit.transition(to, reason);
                    Some((from, unit.clone()))
                }
                None => None,
            }
        };

        if let Some((from, unit)) = snapshot {
            if let Err(e) = self.store.save(&unit).await {
                error!(unit_id, error = %e, "Failed to persist state correction");
            }
            self.notifier
                .notify(
                    &UnitEvent::new(EventType::StateChanged, unit_id)
                        .with_transition(from, to)
                        .with_message(reason),
                )
                .await;
        }
    }

    /// Marks a unit Failed with diagnostic context. The failure itself
    /// is surfaced to the caller separately.
    async fn fail_unit(&self, unit_id: &str, diagnostic: &str) {
        warn!(unit_id, diagnostic, "Unit transition failed");
        self.force_state(unit_id, UnitState::Failed, diagnostic).await;
        self.notifier
            .notify(
                &UnitEvent::new(EventType::TransitionFailed, unit_id).with_message(diagnostic),
            )
            .await;
    }

    /// Best-effort removal of a failed install's directory. Errors are
    /// logged, never escalated; the directory may survive.
    async fn cleanup_unit_dir(&self, unit_id: &str) {
        let dir = self.paths.unit_dir(unit_id);
        if let Err(e) = fs::remove_dir_all(&dir).await {
            if e.kind() != std::io::ErrorKind::NotFound {
                warn!(unit_id, error = %e, "Cleanup of failed install left directory behind");
            }
        }
    }
}
