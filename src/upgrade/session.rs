use crate::manifest::Manifest;
use crate::upgrade::version_check::ReleaseInfo;

/// State gathered during one check or upgrade.
///
/// A session is created per operation and threaded through each step, so
/// values resolved early (the installed version, the latest release, the
/// local manifest) are reused later without re-reading and without being
/// shared between operations.
#[derive(Debug, Default, Clone)]
pub struct UpdateSession {
    pub(crate) current_version: Option<String>,
    pub(crate) latest: Option<ReleaseInfo>,
    pub(crate) local_manifest: Option<Manifest>,
}

impl UpdateSession {
    /// Empty session.
    pub fn new() -> Self {
        Self::default()
    }

    /// Installed version, once resolved.
    pub fn current_version(&self) -> Option<&str> {
        self.current_version.as_deref()
    }

    /// Latest release, once resolved.
    pub fn latest(&self) -> Option<&ReleaseInfo> {
        self.latest.as_ref()
    }

    /// Latest release version, once resolved.
    pub fn latest_version(&self) -> Option<&str> {
        self.latest.as_ref().map(|r| r.version.as_str())
    }

    /// Local manifest as loaded at the start of the session.
    pub fn local_manifest(&self) -> Option<&Manifest> {
        self.local_manifest.as_ref()
    }
}
