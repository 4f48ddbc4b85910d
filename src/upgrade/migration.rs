//! Database schema migration between releases.
//!
//! Each release may ship two scripts under `sql/{versionCore}/`:
//! `initial_db_scripts.sql` moves the schema forward and
//! `rollback_scripts.sql` undoes it. `versionCore` is the release version with
//! any `-suffix` removed, so `2.0.0-rc1` and `2.0.0` share scripts.
//!
//! # Script Format
//!
//! Scripts are split on every `;` and each non-blank fragment runs as one
//! statement. A `;` inside a string literal or trigger body therefore splits
//! the statement; migration scripts must not contain one.
//!
//! # Failure Handling
//!
//! When a forward statement fails, the remaining statements are skipped, the
//! rollback script is run, and the installation is restored from the snapshot
//! recorded by the last backup (after which the record is cleared). The
//! result is always returned as a [`MigrationReport`], never as an error.

use anyhow::{Context, Result};
use rusqlite::Connection;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info};

use crate::config::{SettingKey, SettingsStore};
use crate::constants::{FORWARD_SCRIPT, ROLLBACK_SCRIPT};
use crate::core::RefitError;
use crate::upgrade::rollback::{RollbackManager, RollbackOutcome};

/// Executes single SQL statements against the application database.
pub trait SqlExecutor: Send {
    /// Execute one statement.
    fn execute(&mut self, statement: &str) -> Result<()>;
}

/// [`SqlExecutor`] over a SQLite connection.
pub struct SqliteExecutor {
    conn: Connection,
}

impl SqliteExecutor {
    /// Open (or create) the database at `path`.
    ///
    /// # Errors
    ///
    /// Fails if the database cannot be opened.
    pub fn open(path: &Path, busy_timeout: Duration) -> Result<Self> {
        let conn = Connection::open(path)
            .with_context(|| format!("Failed to open database {}", path.display()))?;
        conn.busy_timeout(busy_timeout).context("Failed to set busy timeout")?;
        Ok(Self { conn })
    }

    /// Private in-memory database.
    pub fn in_memory() -> Result<Self> {
        Ok(Self {
            conn: Connection::open_in_memory().context("Failed to open in-memory database")?,
        })
    }

    /// Underlying connection.
    pub fn connection(&self) -> &Connection {
        &self.conn
    }
}

impl SqlExecutor for SqliteExecutor {
    fn execute(&mut self, statement: &str) -> Result<()> {
        self.conn.execute_batch(statement).map_err(Into::into)
    }
}

/// Version string with any `-suffix` removed.
pub fn version_core(version: &str) -> &str {
    version.split_once('-').map_or(version, |(core, _)| core)
}

/// Split a script into statements on `;`, dropping blank fragments.
pub fn split_statements(script: &str) -> Vec<&str> {
    script.split(';').map(str::trim).filter(|s| !s.is_empty()).collect()
}

/// Forward and rollback script locations for one release.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MigrationScriptPair {
    /// Script applied when moving to the release.
    pub forward: PathBuf,
    /// Script applied when the forward script fails.
    pub rollback: PathBuf,
}

impl MigrationScriptPair {
    /// Scripts for `version` under `sql_dir`.
    pub fn resolve(sql_dir: &Path, version: &str) -> Self {
        let dir = sql_dir.join(version_core(version));
        Self {
            forward: dir.join(FORWARD_SCRIPT),
            rollback: dir.join(ROLLBACK_SCRIPT),
        }
    }
}

/// How a migration ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MigrationOutcome {
    /// Forward script applied and the new version recorded.
    Applied {
        /// Statements executed
        statements: usize,
        /// False when no forward script exists for the release
        script_found: bool,
    },
    /// Forward script failed; rollback script ran.
    RolledBack {
        /// Forward failure
        failure: String,
        /// Whether a recorded snapshot was restored
        snapshot_restored: bool,
    },
    /// Forward script failed and so did the rollback.
    RollbackFailed {
        /// Forward failure
        failure: String,
        /// Rollback failure
        rollback_failure: String,
    },
}

/// Structured result of [`SchemaMigrator::migrate`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MigrationReport {
    /// Release being migrated to, as given.
    pub target_version: String,
    /// Release being migrated from, as given.
    pub previous_version: String,
    /// Scripts used.
    pub scripts: MigrationScriptPair,
    /// What happened.
    pub outcome: MigrationOutcome,
}

impl MigrationReport {
    /// True if the forward script was applied.
    pub fn is_success(&self) -> bool {
        matches!(self.outcome, MigrationOutcome::Applied { .. })
    }

    /// Stable machine-readable result code.
    pub fn code(&self) -> &'static str {
        match self.outcome {
            MigrationOutcome::Applied { .. } => "SQL_EXECUTION_SUCCESS",
            MigrationOutcome::RolledBack { .. } => "SQL_EXECUTION_FAILURE",
            MigrationOutcome::RollbackFailed { .. } => "SQL_ROLLBACK_FAILURE",
        }
    }
}

impl fmt::Display for MigrationReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.outcome {
            MigrationOutcome::Applied {
                statements,
                script_found: true,
            } => write!(f, "migrated to {} ({statements} statements)", self.target_version),
            MigrationOutcome::Applied {
                script_found: false,
                ..
            } => write!(f, "no migration script for {}", self.target_version),
            MigrationOutcome::RolledBack {
                failure,
                snapshot_restored,
            } => {
                write!(f, "migration to {} rolled back: {failure}", self.target_version)?;
                if *snapshot_restored {
                    write!(f, " (installation restored from snapshot)")?;
                }
                Ok(())
            }
            MigrationOutcome::RollbackFailed {
                failure,
                rollback_failure,
            } => write!(
                f,
                "migration to {} failed: {failure}; rollback also failed: {rollback_failure}",
                self.target_version
            ),
        }
    }
}

/// Applies migration scripts with rollback on failure.
pub struct SchemaMigrator {
    executor: Box<dyn SqlExecutor>,
    sql_dir: PathBuf,
    settings: Arc<dyn SettingsStore>,
    rollback: RollbackManager,
}

impl SchemaMigrator {
    /// Migrator reading scripts from `sql_dir` and executing them with `executor`.
    pub fn new(
        executor: Box<dyn SqlExecutor>,
        sql_dir: impl Into<PathBuf>,
        settings: Arc<dyn SettingsStore>,
        rollback: RollbackManager,
    ) -> Self {
        Self {
            executor,
            sql_dir: sql_dir.into(),
            settings,
            rollback,
        }
    }

    /// Migrate the schema to `target` from `previous`.
    ///
    /// On success `services.version` is set to `target`. On failure the
    /// rollback script runs and the recorded snapshot, if any, is restored.
    pub fn migrate(&mut self, target: &str, previous: &str) -> MigrationReport {
        info!(
            "Migrating schema from {} to {}",
            version_core(previous),
            version_core(target)
        );
        let scripts = MigrationScriptPair::resolve(&self.sql_dir, target);

        let outcome = match self.apply_forward(&scripts, target) {
            Ok((statements, script_found)) => {
                info!("Schema migration to {} complete", target);
                MigrationOutcome::Applied {
                    statements,
                    script_found,
                }
            }
            Err(e) => {
                error!("Schema migration to {} failed: {:#}", target, e);
                self.roll_back(&scripts, target, format!("{e:#}"))
            }
        };

        MigrationReport {
            target_version: target.to_string(),
            previous_version: previous.to_string(),
            scripts,
            outcome,
        }
    }

    fn apply_forward(&mut self, scripts: &MigrationScriptPair, target: &str) -> Result<(usize, bool)> {
        let result = self.run_script(&scripts.forward, target)?;
        self.settings.set(SettingKey::ServicesVersion, target)?;
        Ok(result)
    }

    fn roll_back(
        &mut self,
        scripts: &MigrationScriptPair,
        target: &str,
        failure: String,
    ) -> MigrationOutcome {
        info!("Running rollback script {}", scripts.rollback.display());
        let restored = self
            .run_script(&scripts.rollback, target)
            .and_then(|_| self.restore_recorded_snapshot());

        match restored {
            Ok(snapshot_restored) => MigrationOutcome::RolledBack {
                failure,
                snapshot_restored,
            },
            Err(e) => {
                error!("Rollback failed: {:#}", e);
                MigrationOutcome::RollbackFailed {
                    failure,
                    rollback_failure: format!("{e:#}"),
                }
            }
        }
    }

    fn restore_recorded_snapshot(&self) -> Result<bool> {
        let Some(snapshot) = self.settings.get(SettingKey::BackupFolder)? else {
            debug!("No snapshot recorded, skipping file restore");
            return Ok(false);
        };

        let outcome = self.rollback.restore(Path::new(&snapshot))?;
        self.settings.remove(SettingKey::BackupFolder)?;
        Ok(outcome == RollbackOutcome::Restored)
    }

    /// Run every statement of `path`. A missing script counts as empty.
    fn run_script(&mut self, path: &Path, version: &str) -> Result<(usize, bool)> {
        let script = match std::fs::read_to_string(path) {
            Ok(script) => script,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                info!("{} not found", path.display());
                return Ok((0, false));
            }
            Err(e) => {
                return Err(e).with_context(|| format!("Failed to read {}", path.display()));
            }
        };
        info!("{} found", path.display());

        let statements = split_statements(&script);
        for statement in &statements {
            debug!("Executing statement: {}", statement);
            self.executor.execute(statement).map_err(|e| RefitError::MigrationFailed {
                version: version_core(version).to_string(),
                reason: format!("{e:#}"),
            })?;
        }
        Ok((statements.len(), true))
    }
}

impl fmt::Debug for SchemaMigrator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SchemaMigrator").field("sql_dir", &self.sql_dir).finish_non_exhaustive()
    }
}
