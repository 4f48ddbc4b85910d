//! The update session state machine.
//!
//! ```text
//! Idle -> CheckingVersion -> BackingUp -> Syncing -> Finalizing -> Migrating -> Completed
//!                                            |            |            |
//!                                            +------------+------------+--> RollingBack
//!                                                                              |-> RolledBack
//!                                                                              +-> FailedIrrecoverable
//! ```
//!
//! Failures before `BackingUp` completes abort the upgrade without touching
//! the installation. Failures after it restore the snapshot. Only a failed
//! restore ends in `FailedIrrecoverable`, which needs an operator.

use anyhow::Result;
use chrono::Utc;
use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info, warn};

use crate::config::settings::{DISABLED, ENABLED};
use crate::config::{FileSettingsStore, SettingKey, SettingsStore, UpdaterConfig};
use crate::core::RefitError;
use crate::manifest::{Manifest, ManifestStore};
use crate::transport::{HttpTransport, Transport};
use crate::upgrade::backup::{BackupManager, Snapshot};
use crate::upgrade::config::{InstallLayout, ServerConfig};
use crate::upgrade::diff::{ChangeKind, ManifestDiffer};
use crate::upgrade::lock::InstallLock;
use crate::upgrade::migration::{
    MigrationOutcome, MigrationReport, SchemaMigrator, SqlExecutor, SqliteExecutor,
};
use crate::upgrade::rollback::{RollbackManager, RollbackOutcome};
use crate::upgrade::session::UpdateSession;
use crate::upgrade::sync::{ArtifactSynchronizer, SyncReport};
use crate::upgrade::version_check::{ReleaseInfo, ReleaseTimestamp, VersionResolver};

/// States of one upgrade.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpgradeState {
    /// Nothing started.
    Idle,
    /// Resolving installed and latest versions and fetching the remote manifest.
    CheckingVersion,
    /// Snapshotting the installation.
    BackingUp,
    /// Deleting unknown artifacts and downloading changed ones.
    Syncing,
    /// Writing the new manifest and update bookkeeping.
    Finalizing,
    /// Migrating the database schema.
    Migrating,
    /// Upgrade finished.
    Completed,
    /// Restoring the snapshot after a failure.
    RollingBack,
    /// Snapshot restored.
    RolledBack,
    /// Snapshot could not be restored.
    FailedIrrecoverable,
}

impl fmt::Display for UpgradeState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Idle => "idle",
            Self::CheckingVersion => "checking-version",
            Self::BackingUp => "backing-up",
            Self::Syncing => "syncing",
            Self::Finalizing => "finalizing",
            Self::Migrating => "migrating",
            Self::Completed => "completed",
            Self::RollingBack => "rolling-back",
            Self::RolledBack => "rolled-back",
            Self::FailedIrrecoverable => "failed-irrecoverable",
        };
        f.write_str(name)
    }
}

/// How an upgrade ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UpgradeOutcome {
    /// Installed version already equals the latest release.
    AlreadyCurrent {
        /// Installed version
        version: String,
    },
    /// Upgrade applied.
    Completed {
        /// Version before the upgrade, if known
        from: Option<String>,
        /// Version now installed
        to: String,
    },
    /// Stopped before anything was modified.
    Aborted {
        /// Why
        reason: String,
    },
    /// Failed after the snapshot; the installation was restored.
    RolledBack {
        /// Original failure
        reason: String,
    },
    /// Failed and the installation could not be restored.
    FailedIrrecoverable {
        /// Original and restore failures
        reason: String,
    },
}

impl UpgradeOutcome {
    /// Stable machine-readable result code.
    pub fn code(&self) -> &'static str {
        match self {
            Self::AlreadyCurrent { .. } => "UPGRADE_NOT_REQUIRED",
            Self::Completed { .. } => "UPGRADE_SUCCESS",
            Self::Aborted { .. } => "UPGRADE_ABORTED",
            Self::RolledBack { .. } => "UPGRADE_ROLLED_BACK",
            Self::FailedIrrecoverable { .. } => "UPGRADE_FAILED_IRRECOVERABLE",
        }
    }

    /// True if the installation is at the latest release.
    pub fn is_success(&self) -> bool {
        matches!(self, Self::AlreadyCurrent { .. } | Self::Completed { .. })
    }
}

/// Options for [`UpdateOrchestrator::upgrade`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UpgradeOptions {
    /// Reconcile even when the installed version equals the latest release.
    pub force: bool,
}

/// Everything an upgrade did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpgradeReport {
    /// Final result.
    pub outcome: UpgradeOutcome,
    /// States entered, in order.
    pub transitions: Vec<UpgradeState>,
    /// Sync result, if syncing ran.
    pub sync: Option<SyncReport>,
    /// Migration result, if migrating ran.
    pub migration: Option<MigrationReport>,
    /// Snapshot taken, if backing up succeeded.
    pub snapshot: Option<PathBuf>,
}

impl UpgradeReport {
    fn new() -> Self {
        Self {
            outcome: UpgradeOutcome::Aborted {
                reason: "not started".to_string(),
            },
            transitions: vec![UpgradeState::Idle],
            sync: None,
            migration: None,
            snapshot: None,
        }
    }

    fn enter(&mut self, state: UpgradeState) {
        info!("Upgrade state: {}", state);
        self.transitions.push(state);
    }

    fn finish(mut self, outcome: UpgradeOutcome) -> Self {
        match &outcome {
            UpgradeOutcome::Completed { .. } | UpgradeOutcome::AlreadyCurrent { .. } => {
                self.enter(UpgradeState::Completed);
            }
            UpgradeOutcome::RolledBack { .. } => self.enter(UpgradeState::RolledBack),
            UpgradeOutcome::FailedIrrecoverable { .. } => {
                self.enter(UpgradeState::FailedIrrecoverable);
            }
            UpgradeOutcome::Aborted { reason } => warn!("Upgrade aborted: {}", reason),
        }
        self.outcome = outcome;
        self
    }

    /// Final state entered.
    pub fn final_state(&self) -> UpgradeState {
        self.transitions.last().copied().unwrap_or(UpgradeState::Idle)
    }

    /// Stable machine-readable result code.
    pub fn code(&self) -> &'static str {
        self.outcome.code()
    }

    /// True if the installation is at the latest release.
    pub fn is_success(&self) -> bool {
        self.outcome.is_success()
    }
}

/// Result of an update availability check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpdateCheck {
    /// Whether a different release is available.
    pub available: bool,
    /// Installed version, if known.
    pub current: Option<String>,
    /// Latest release, if the metadata could be read.
    pub latest: Option<ReleaseInfo>,
}

/// Snapshot of what refit knows about an installation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusReport {
    /// Installed version.
    pub current: Option<String>,
    /// Latest release.
    pub latest: Option<ReleaseInfo>,
    /// Latest release time, if valid.
    pub release_timestamp: Option<ReleaseTimestamp>,
    /// Snapshot a rollback would restore.
    pub recorded_snapshot: Option<PathBuf>,
    /// Version the database schema was last migrated to.
    pub services_version: Option<String>,
    /// Value of the persisted update-available flag.
    pub update_available: Option<String>,
}

/// Runs update checks, upgrades, migrations and rollbacks for one installation.
///
/// Public operations never return errors for failures of the update itself;
/// those are reported through [`UpdateCheck`], [`UpgradeReport`] and
/// [`MigrationReport`].
pub struct UpdateOrchestrator<T: Transport> {
    layout: InstallLayout,
    server: ServerConfig,
    transport: T,
    settings: Arc<dyn SettingsStore>,
    manifests: ManifestStore,
    resolver: VersionResolver,
    synchronizer: ArtifactSynchronizer,
    backups: BackupManager,
    rollback: RollbackManager,
    sql_dir: PathBuf,
    migrator: Option<SchemaMigrator>,
    component_names: Vec<String>,
}

impl UpdateOrchestrator<HttpTransport> {
    /// Orchestrator wired from configuration: HTTP transport, file settings
    /// store, and a SQLite migrator when `migration.database` is set.
    ///
    /// # Errors
    ///
    /// Fails if the server section is incomplete, the HTTP client cannot be
    /// built, or the database cannot be opened.
    pub fn from_config(config: &UpdaterConfig) -> Result<Self> {
        config.validate_server()?;
        let transport = HttpTransport::new(config.server.timeout())?;
        let settings: Arc<dyn SettingsStore> =
            Arc::new(FileSettingsStore::new(config.settings_path()));

        let mut orchestrator = Self::new(config, transport, settings);
        if let Some(database) = &config.migration.database {
            let executor = SqliteExecutor::open(
                database,
                std::time::Duration::from_millis(config.migration.busy_timeout_ms),
            )?;
            orchestrator = orchestrator.with_executor(Box::new(executor));
        }
        Ok(orchestrator)
    }
}

impl<T: Transport> UpdateOrchestrator<T> {
    /// Orchestrator for the installation described by `config`.
    ///
    /// No database is attached; call [`with_executor`](Self::with_executor)
    /// to enable schema migration.
    pub fn new(config: &UpdaterConfig, transport: T, settings: Arc<dyn SettingsStore>) -> Self {
        let layout = config.install.clone();
        let manifests = ManifestStore::for_layout(&layout);
        Self {
            resolver: VersionResolver::new(manifests.clone(), config.server.resolved_metadata_url()),
            synchronizer: ArtifactSynchronizer::new(&layout, config.server.clone()),
            backups: BackupManager::new(layout.clone(), config.backup_root(), settings.clone()),
            rollback: RollbackManager::new(layout.clone()),
            sql_dir: config.migration.sql_dir_for(&layout),
            server: config.server.clone(),
            component_names: config.query.component_names.clone(),
            migrator: None,
            manifests,
            layout,
            transport,
            settings,
        }
    }

    /// Attach the database schema migrations run against.
    #[must_use]
    pub fn with_executor(mut self, executor: Box<dyn SqlExecutor>) -> Self {
        self.migrator = Some(SchemaMigrator::new(
            executor,
            self.sql_dir.clone(),
            self.settings.clone(),
            self.rollback.clone(),
        ));
        self
    }

    /// Check whether a new release is available and persist the answer.
    ///
    /// The `update.available` flag is only written when both versions could
    /// be resolved.
    pub async fn check_for_update(&self) -> UpdateCheck {
        let mut session = UpdateSession::new();
        let available = self.resolver.has_update(&self.transport, &mut session).await;

        if session.current_version().is_some() && session.latest().is_some() {
            let flag = if available { ENABLED } else { DISABLED };
            if let Err(e) = self.settings.set(SettingKey::UpdateAvailable, flag) {
                warn!("Failed to record update availability: {:#}", e);
            }
        }

        UpdateCheck {
            available,
            current: session.current_version,
            latest: session.latest,
        }
    }

    /// Upgrade the installation to the latest release.
    pub async fn upgrade(&mut self, options: UpgradeOptions) -> UpgradeReport {
        let report = UpgradeReport::new();

        let _lock = match InstallLock::acquire(&self.layout.lock_path()).await {
            Ok(lock) => lock,
            Err(e) => {
                return report.finish(UpgradeOutcome::Aborted {
                    reason: format!("{e:#}"),
                });
            }
        };

        self.run_upgrade(report, options).await
    }

    async fn run_upgrade(&mut self, mut report: UpgradeReport, options: UpgradeOptions) -> UpgradeReport {
        let mut session = UpdateSession::new();

        report.enter(UpgradeState::CheckingVersion);
        let current = self.resolver.current_version(&mut session).await;
        let latest = match self.resolver.latest_release(&self.transport, &mut session).await {
            Ok(latest) => latest,
            Err(e) => {
                return report.finish(UpgradeOutcome::Aborted {
                    reason: format!("{e:#}"),
                });
            }
        };

        if current.as_deref() == Some(latest.version.as_str()) && !options.force {
            info!("Already at {}", latest.version);
            return report.finish(UpgradeOutcome::AlreadyCurrent {
                version: latest.version,
            });
        }

        let manifest_url = self.server.manifest_url(&latest.version, &self.layout.manifest_file);
        let remote = match ManifestStore::fetch_remote(&self.transport, &manifest_url).await {
            Ok(remote) => remote,
            Err(e) => {
                return report.finish(UpgradeOutcome::Aborted {
                    reason: format!("{e:#}"),
                });
            }
        };
        log_planned_changes(session.local_manifest(), &remote);

        report.enter(UpgradeState::BackingUp);
        let snapshot = match self.backups.backup(current.as_deref()) {
            Ok(snapshot) => snapshot,
            Err(e) => {
                return report.finish(UpgradeOutcome::Aborted {
                    reason: format!("{e:#}"),
                });
            }
        };
        report.snapshot = Some(snapshot.path.clone());

        report.enter(UpgradeState::Syncing);
        match self.sync(&remote, &latest.version).await {
            Ok(sync) => report.sync = Some(sync),
            Err(e) => return self.roll_back(report, &snapshot, format!("{e:#}")),
        }

        report.enter(UpgradeState::Finalizing);
        if let Err(e) = self.manifests.save(&remote) {
            return self.roll_back(report, &snapshot, format!("{e:#}"));
        }

        let previous = self
            .settings
            .get(SettingKey::ServicesVersion)
            .unwrap_or_else(|e| {
                warn!("Failed to read services version: {:#}", e);
                None
            })
            .or_else(|| current.clone());
        let needs_migration =
            previous.as_deref().is_none_or(|p| !p.eq_ignore_ascii_case(&latest.version));

        if let Some(migrator) = self.migrator.as_mut().filter(|_| needs_migration) {
            report.enter(UpgradeState::Migrating);
            let migration = migrator.migrate(&latest.version, previous.as_deref().unwrap_or(""));
            let outcome = migration.outcome.clone();
            report.migration = Some(migration);

            match outcome {
                MigrationOutcome::Applied { .. } => {}
                MigrationOutcome::RolledBack {
                    failure,
                    snapshot_restored: true,
                } => {
                    report.enter(UpgradeState::RollingBack);
                    return report.finish(UpgradeOutcome::RolledBack { reason: failure });
                }
                MigrationOutcome::RolledBack {
                    failure,
                    snapshot_restored: false,
                } => {
                    report.enter(UpgradeState::RollingBack);
                    error!("Schema rolled back but installation files were not restored");
                    return report.finish(UpgradeOutcome::FailedIrrecoverable {
                        reason: format!("{failure}; snapshot could not be restored"),
                    });
                }
                MigrationOutcome::RollbackFailed {
                    failure,
                    rollback_failure,
                } => {
                    report.enter(UpgradeState::RollingBack);
                    return report.finish(UpgradeOutcome::FailedIrrecoverable {
                        reason: format!("{failure}; rollback failed: {rollback_failure}"),
                    });
                }
            }
        }

        self.record_update_applied();
        info!("Upgrade to {} complete", latest.version);
        report.finish(UpgradeOutcome::Completed {
            from: current,
            to: latest.version,
        })
    }

    async fn sync(&self, remote: &Manifest, version: &str) -> Result<SyncReport> {
        let deleted = self.synchronizer.delete_unknown(remote)?;
        let mut sync = self.synchronizer.sync(&self.transport, remote, version).await?;
        sync.deleted = deleted;
        if !sync.is_clean() {
            warn!(
                "{} artifact(s) could not be synced and will be retried next time",
                sync.failed.len()
            );
        }
        Ok(sync)
    }

    fn record_update_applied(&self) {
        let now = Utc::now().to_rfc3339();
        for (key, value) in [(SettingKey::UpdateAvailable, DISABLED), (SettingKey::LastUpdate, now.as_str())] {
            if let Err(e) = self.settings.set(key, value) {
                warn!("Failed to record {}: {:#}", key, e);
            }
        }
    }

    fn roll_back(&self, mut report: UpgradeReport, snapshot: &Snapshot, reason: String) -> UpgradeReport {
        error!("Upgrade failed: {}", reason);
        report.enter(UpgradeState::RollingBack);

        match self.rollback.restore(&snapshot.path) {
            Ok(RollbackOutcome::Restored) => report.finish(UpgradeOutcome::RolledBack { reason }),
            Ok(RollbackOutcome::SnapshotMissing) => {
                report.finish(UpgradeOutcome::FailedIrrecoverable {
                    reason: format!("{reason}; snapshot {} is missing", snapshot.path.display()),
                })
            }
            Err(e) => report.finish(UpgradeOutcome::FailedIrrecoverable {
                reason: format!("{reason}; {e:#}"),
            }),
        }
    }

    /// Bring the database schema up to the installed version.
    ///
    /// Runs a migration only when the recorded `services.version` differs
    /// (ignoring case) from the installed version; returns `None` otherwise,
    /// or when no database is attached.
    pub async fn update_database(&mut self) -> Option<MigrationReport> {
        let persisted = match self.settings.get(SettingKey::ServicesVersion) {
            Ok(version) => version,
            Err(e) => {
                warn!("Failed to read services version: {:#}", e);
                None
            }
        };
        let current = self.resolver.current_version(&mut UpdateSession::new()).await;
        info!("Installed version {:?}, database version {:?}", current, persisted);

        let (Some(current), Some(persisted)) = (current, persisted) else {
            return None;
        };
        if current.eq_ignore_ascii_case(&persisted) {
            return None;
        }
        if self.migrator.is_none() {
            warn!("Database is at {} but no database is configured", persisted);
            return None;
        }

        let _lock = match InstallLock::acquire(&self.layout.lock_path()).await {
            Ok(lock) => lock,
            Err(e) => {
                error!("Cannot migrate database: {:#}", e);
                return None;
            }
        };
        self.migrator.as_mut().map(|m| m.migrate(&current, &persisted))
    }

    /// Run a migration between two explicit versions.
    ///
    /// # Errors
    ///
    /// Fails if no database is attached or the installation lock cannot be
    /// taken. Migration failures are reported in the returned report.
    pub async fn migrate(&mut self, target: &str, previous: &str) -> Result<MigrationReport> {
        if self.migrator.is_none() {
            return Err(RefitError::ConfigError {
                message: "migration.database is not set".to_string(),
            }
            .into());
        }
        let _lock = InstallLock::acquire(&self.layout.lock_path()).await?;
        self.migrator.as_mut().map(|m| m.migrate(target, previous)).ok_or_else(|| {
            RefitError::ConfigError {
                message: "migration.database is not set".to_string(),
            }
            .into()
        })
    }

    /// Restore the installation from `snapshot`, or from the recorded snapshot.
    ///
    /// # Errors
    ///
    /// Fails if no snapshot is given or recorded, or restoring fails.
    pub async fn rollback(&self, snapshot: Option<PathBuf>) -> Result<RollbackOutcome> {
        let snapshot = match snapshot {
            Some(snapshot) => snapshot,
            None => self.backups.recorded_snapshot()?.or(self.backups.latest_snapshot()?).ok_or_else(
                || RefitError::SnapshotMissing {
                    path: self.backups.backup_root().display().to_string(),
                },
            )?,
        };

        let _lock = InstallLock::acquire(&self.layout.lock_path()).await?;
        self.rollback.restore(&snapshot)
    }

    /// Recorded checksums of the installed components.
    ///
    /// Only entries whose name contains one of the configured component
    /// names are returned. Empty when there is no local manifest.
    pub async fn artifact_checksums(&self) -> BTreeMap<String, String> {
        match self.manifests.load().await {
            Ok(Some(manifest)) => manifest.checksums_matching(&self.component_names),
            Ok(None) => BTreeMap::new(),
            Err(e) => {
                warn!("Failed to load local manifest: {:#}", e);
                BTreeMap::new()
            }
        }
    }

    /// Gather versions, release time and persisted state.
    pub async fn status(&self) -> StatusReport {
        let mut session = UpdateSession::new();
        let current = self.resolver.current_version(&mut session).await;
        let latest = match self.resolver.latest_release(&self.transport, &mut session).await {
            Ok(latest) => Some(latest),
            Err(e) => {
                warn!("Latest release unavailable: {:#}", e);
                None
            }
        };
        let release_timestamp = VersionResolver::latest_release_timestamp(&session)
            .map_err(|e| warn!("{:#}", e))
            .ok();

        let setting = |key: SettingKey| {
            self.settings.get(key).unwrap_or_else(|e| {
                warn!("Failed to read {}: {:#}", key, e);
                None
            })
        };

        StatusReport {
            current,
            latest,
            release_timestamp,
            recorded_snapshot: setting(SettingKey::BackupFolder).map(PathBuf::from),
            services_version: setting(SettingKey::ServicesVersion),
            update_available: setting(SettingKey::UpdateAvailable),
        }
    }
}

fn log_planned_changes(local: Option<&Manifest>, remote: &Manifest) {
    let empty = Manifest::default();
    let changes = ManifestDiffer::compare(local.unwrap_or(&empty), remote);
    let count = |kind: ChangeKind| changes.values().filter(|k| **k == kind).count();
    info!(
        "Release {} adds {} and changes {} artifact(s), removes {}",
        remote.version().unwrap_or("unknown"),
        count(ChangeKind::Added),
        count(ChangeKind::Changed),
        count(ChangeKind::Removed)
    );
}
