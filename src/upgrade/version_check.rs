use anyhow::Result;
use chrono::{DateTime, NaiveDateTime, Utc};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::constants::{LAST_UPDATED_TAG, VERSION_TAG};
use crate::core::RefitError;
use crate::manifest::ManifestStore;
use crate::transport::Transport;
use crate::upgrade::session::UpdateSession;

const TIMESTAMP_FORMAT: &str = "%Y%m%d%H%M%S";
const TIMESTAMP_LEN: usize = 14;

/// Why a release timestamp was rejected.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TimestampError {
    /// Not exactly 14 characters long.
    #[error("expected 14 digits, found {0} characters")]
    WrongLength(usize),

    /// Contains something other than ASCII digits.
    #[error("contains non-digit characters")]
    NotNumeric,

    /// Digits do not form a real calendar date and time.
    #[error("not a valid date and time")]
    OutOfRange,
}

/// Release time from the metadata document, `YYYYMMDDHHMMSS` in UTC.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct ReleaseTimestamp(DateTime<Utc>);

impl ReleaseTimestamp {
    /// The timestamp as a UTC date-time.
    pub fn as_datetime(&self) -> DateTime<Utc> {
        self.0
    }
}

impl FromStr for ReleaseTimestamp {
    type Err = TimestampError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let len = s.chars().count();
        if len != TIMESTAMP_LEN {
            return Err(TimestampError::WrongLength(len));
        }
        if !s.bytes().all(|b| b.is_ascii_digit()) {
            return Err(TimestampError::NotNumeric);
        }
        let naive = NaiveDateTime::parse_from_str(s, TIMESTAMP_FORMAT)
            .map_err(|_| TimestampError::OutOfRange)?;
        Ok(Self(naive.and_utc()))
    }
}

impl fmt::Display for ReleaseTimestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.format(TIMESTAMP_FORMAT))
    }
}

/// Latest release as announced by the metadata document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReleaseInfo {
    /// Release version string.
    pub version: String,
    /// Raw `lastUpdated` value. Validated only when
    /// [`timestamp`](Self::timestamp) is called.
    pub last_updated: String,
}

impl ReleaseInfo {
    /// Parse the release metadata XML document.
    ///
    /// Both `version` and `lastUpdated` are looked up anywhere below the root
    /// element; the first match wins.
    ///
    /// # Errors
    ///
    /// Returns [`RefitError::MetadataParseError`] if the document is not
    /// well-formed or either element is missing or empty.
    pub fn parse(xml: &str) -> Result<Self, RefitError> {
        let doc = roxmltree::Document::parse(xml).map_err(|e| RefitError::MetadataParseError {
            reason: e.to_string(),
        })?;

        let version = element_text(&doc, VERSION_TAG)?;
        let last_updated = element_text(&doc, LAST_UPDATED_TAG)?;
        Ok(Self {
            version,
            last_updated,
        })
    }

    /// Release timestamp.
    ///
    /// # Errors
    ///
    /// Returns [`RefitError::InvalidReleaseTimestamp`] unless `last_updated`
    /// is exactly 14 digits forming a valid date and time.
    pub fn timestamp(&self) -> Result<ReleaseTimestamp, RefitError> {
        self.last_updated.parse().map_err(|e: TimestampError| RefitError::InvalidReleaseTimestamp {
            value: self.last_updated.clone(),
            reason: e.to_string(),
        })
    }
}

fn element_text(doc: &roxmltree::Document<'_>, tag: &str) -> Result<String, RefitError> {
    doc.root_element()
        .descendants()
        .find(|n| n.is_element() && n.has_tag_name(tag))
        .and_then(|n| n.text())
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .map(str::to_string)
        .ok_or_else(|| RefitError::MetadataParseError {
            reason: format!("missing <{tag}> element"),
        })
}

/// Resolves the installed and latest release versions.
///
/// Versions are compared as literal strings: a release is "new" whenever its
/// version string differs from the installed one, regardless of ordering.
#[derive(Debug, Clone)]
pub struct VersionResolver {
    manifests: ManifestStore,
    metadata_url: String,
}

impl VersionResolver {
    /// Resolver reading the local manifest from `manifests` and release
    /// metadata from `metadata_url`.
    pub fn new(manifests: ManifestStore, metadata_url: impl Into<String>) -> Self {
        Self {
            manifests,
            metadata_url: metadata_url.into(),
        }
    }

    /// Metadata document URL.
    pub fn metadata_url(&self) -> &str {
        &self.metadata_url
    }

    /// Installed version from the local manifest's `Manifest-Version`.
    ///
    /// Returns `None` (after logging) when there is no readable local
    /// manifest. The manifest is cached on the session.
    pub async fn current_version(&self, session: &mut UpdateSession) -> Option<String> {
        if session.local_manifest.is_none() {
            match self.manifests.load().await {
                Ok(Some(manifest)) => session.local_manifest = Some(manifest),
                Ok(None) => info!("No local manifest at {}", self.manifests.path().display()),
                Err(e) => warn!("Failed to load local manifest: {:#}", e),
            }
        }

        session.current_version =
            session.local_manifest.as_ref().and_then(|m| m.version()).map(str::to_string);
        debug!("Current version: {:?}", session.current_version);
        session.current_version.clone()
    }

    /// Download the metadata document and cache the latest release on the
    /// session.
    ///
    /// # Errors
    ///
    /// Fails with [`RefitError::MetadataUnavailable`] if the document cannot
    /// be downloaded or [`RefitError::MetadataParseError`] if it is malformed.
    pub async fn latest_release<T: Transport>(
        &self,
        transport: &T,
        session: &mut UpdateSession,
    ) -> Result<ReleaseInfo> {
        info!("Checking latest release at {}", self.metadata_url);
        let bytes = transport.fetch(&self.metadata_url).await.map_err(|e| {
            RefitError::MetadataUnavailable {
                url: self.metadata_url.clone(),
                reason: format!("{e:#}"),
            }
        })?;

        let xml = String::from_utf8_lossy(&bytes);
        let release = ReleaseInfo::parse(&xml)?;
        debug!("Latest release {} ({})", release.version, release.last_updated);

        session.latest = Some(release.clone());
        Ok(release)
    }

    /// Whether the latest release differs from the installed version.
    ///
    /// Any failure (no local manifest, unreachable or malformed metadata) is
    /// logged and reported as "no update".
    pub async fn has_update<T: Transport>(
        &self,
        transport: &T,
        session: &mut UpdateSession,
    ) -> bool {
        let Some(current) = self.current_version(session).await else {
            warn!("Cannot check for updates: installed version is unknown");
            return false;
        };

        match self.latest_release(transport, session).await {
            Ok(latest) => {
                let available = latest.version != current;
                info!(
                    "Installed {}, latest {}: {}",
                    current,
                    latest.version,
                    if available { "update available" } else { "up to date" }
                );
                available
            }
            Err(e) => {
                warn!("Failed to check for updates: {:#}", e);
                false
            }
        }
    }

    /// Timestamp of the release cached on the session.
    ///
    /// # Errors
    ///
    /// Fails if no release has been resolved yet or its timestamp is invalid.
    pub fn latest_release_timestamp(session: &UpdateSession) -> Result<ReleaseTimestamp> {
        let release = session.latest.as_ref().ok_or_else(|| RefitError::Other {
            message: "Latest release has not been resolved".to_string(),
        })?;
        Ok(release.timestamp()?)
    }
}
