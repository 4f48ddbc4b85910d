//! Configuration for refit.
//!
//! Two kinds of configuration exist:
//!
//! - [`UpdaterConfig`]: the user-edited TOML file describing the installation,
//!   the release server, snapshot storage and migration settings.
//! - [`SettingsStore`]: machine-written key-value state the engine persists
//!   between runs (pending update flag, last update time, snapshot pointer,
//!   migrated schema version).

pub mod settings;
mod updater;

pub use settings::{FileSettingsStore, SettingKey, SettingsStore};
pub use updater::UpdaterConfig;
