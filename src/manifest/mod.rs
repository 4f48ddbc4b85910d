//! Artifact manifest model and `MANIFEST.MF` codec.
//!
//! A manifest records which artifacts an installation is made of and the
//! checksum each one must have. The on-disk format is the section-based
//! `MANIFEST.MF` text format:
//!
//! ```text
//! Manifest-Version: 1.2.0
//! Created-By: release-pipeline
//!
//! Name: registration-client.jar
//! Checksum: 3F2A...
//! Content-Type: application/java-archive
//!
//! Name: ext/bcprov.jar
//! Checksum: 91C0...
//! ```
//!
//! The first section holds the main attributes; `Manifest-Version` carries the
//! installed version string. Every following section starts with `Name:` and
//! describes one artifact by its path relative to the `lib/` directory.
//!
//! # Format Rules
//!
//! - Lines end with `\r\n` (`\n` and `\r` are accepted when reading)
//! - A blank line terminates a section
//! - Lines longer than 72 bytes continue on the next line after a single space
//! - Attribute names are case-insensitive
//!
//! # Checksums
//!
//! Each entry has a dedicated [`ArtifactEntry::checksum`]. It is read from the
//! `Checksum` attribute; older release pipelines wrote the checksum into
//! `Content-Type` instead, so when `Checksum` is absent the `Content-Type`
//! value is used.

mod store;

pub use store::ManifestStore;

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

const MANIFEST_VERSION: &str = "Manifest-Version";
const NAME: &str = "Name";
const CHECKSUM: &str = "Checksum";
const CONTENT_TYPE: &str = "Content-Type";
const MAX_LINE_BYTES: usize = 72;

/// Errors produced while parsing a manifest.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ManifestError {
    /// A header line has no `": "` separator.
    #[error("line {line}: expected 'Name: value'")]
    MissingSeparator {
        /// 1-based line number
        line: usize,
    },

    /// A continuation line appeared before any attribute of its section.
    #[error("line {line}: continuation line without a preceding attribute")]
    OrphanContinuation {
        /// 1-based line number
        line: usize,
    },

    /// An entry section does not start with `Name:`.
    #[error("line {line}: entry section must start with 'Name:'")]
    SectionWithoutName {
        /// 1-based line number
        line: usize,
    },

    /// An entry declares neither `Checksum` nor `Content-Type`.
    #[error("entry '{entry}' has no checksum")]
    MissingChecksum {
        /// Entry name
        entry: String,
    },

    /// Two sections share the same `Name`.
    #[error("duplicate entry '{entry}'")]
    DuplicateEntry {
        /// Entry name
        entry: String,
    },
}

/// One artifact recorded in a manifest.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactEntry {
    /// Expected checksum of the artifact file. Compared case-insensitively.
    pub checksum: String,
    /// Content type attribute, if present.
    pub content_type: Option<String>,
    /// Any other attributes of the entry, keyed by their original name.
    pub attributes: BTreeMap<String, String>,
}

impl ArtifactEntry {
    /// Entry with a checksum and no other attributes.
    pub fn new(checksum: impl Into<String>) -> Self {
        Self {
            checksum: checksum.into(),
            content_type: None,
            attributes: BTreeMap::new(),
        }
    }

    /// Set the content type.
    #[must_use]
    pub fn with_content_type(mut self, content_type: impl Into<String>) -> Self {
        self.content_type = Some(content_type.into());
        self
    }

    /// Whether `actual` matches the recorded checksum, ignoring ASCII case.
    pub fn checksum_matches(&self, actual: &str) -> bool {
        self.checksum.eq_ignore_ascii_case(actual)
    }
}

/// Parsed manifest: version, main attributes and artifact entries.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Manifest {
    version: Option<String>,
    main_attributes: BTreeMap<String, String>,
    entries: BTreeMap<String, ArtifactEntry>,
}

impl Manifest {
    /// Empty manifest declaring `version`.
    pub fn new(version: impl Into<String>) -> Self {
        Self {
            version: Some(version.into()),
            ..Self::default()
        }
    }

    /// The `Manifest-Version` attribute.
    pub fn version(&self) -> Option<&str> {
        self.version.as_deref()
    }

    /// Main attributes other than `Manifest-Version`.
    pub fn main_attributes(&self) -> &BTreeMap<String, String> {
        &self.main_attributes
    }

    /// Artifact entries keyed by their path relative to `lib/`.
    pub fn entries(&self) -> &BTreeMap<String, ArtifactEntry> {
        &self.entries
    }

    /// Look up one entry.
    pub fn entry(&self, name: &str) -> Option<&ArtifactEntry> {
        self.entries.get(name)
    }

    /// Add or replace an entry.
    pub fn insert_entry(&mut self, name: impl Into<String>, entry: ArtifactEntry) {
        self.entries.insert(name.into(), entry);
    }

    /// Builder-style [`insert_entry`](Self::insert_entry).
    #[must_use]
    pub fn with_entry(mut self, name: impl Into<String>, entry: ArtifactEntry) -> Self {
        self.insert_entry(name, entry);
        self
    }

    /// Recorded checksums of the entries whose name contains any of `needles`.
    pub fn checksums_matching<S: AsRef<str>>(&self, needles: &[S]) -> BTreeMap<String, String> {
        self.entries
            .iter()
            .filter(|(name, _)| needles.iter().any(|n| name.contains(n.as_ref())))
            .map(|(name, entry)| (name.clone(), entry.checksum.clone()))
            .collect()
    }

    /// Parse manifest text.
    ///
    /// # Errors
    ///
    /// Returns a [`ManifestError`] describing the first malformed line or entry.
    pub fn parse(text: &str) -> Result<Self, ManifestError> {
        let sections = split_sections(text)?;
        let mut sections = sections.into_iter();

        let mut manifest = Self::default();
        if let Some(main) = sections.next() {
            for (name, value) in main.attributes {
                if name.eq_ignore_ascii_case(MANIFEST_VERSION) {
                    manifest.version = Some(value);
                } else {
                    manifest.main_attributes.insert(name, value);
                }
            }
        }

        for section in sections {
            let mut attributes = section.attributes.into_iter();
            let entry_name = match attributes.next() {
                Some((name, value)) if name.eq_ignore_ascii_case(NAME) => value,
                _ => return Err(ManifestError::SectionWithoutName { line: section.first_line }),
            };

            let mut checksum = None;
            let mut content_type = None;
            let mut others = BTreeMap::new();
            for (name, value) in attributes {
                if name.eq_ignore_ascii_case(CHECKSUM) {
                    checksum = Some(value);
                } else if name.eq_ignore_ascii_case(CONTENT_TYPE) {
                    content_type = Some(value);
                } else {
                    others.insert(name, value);
                }
            }

            let checksum = checksum.or_else(|| content_type.clone()).ok_or_else(|| {
                ManifestError::MissingChecksum {
                    entry: entry_name.clone(),
                }
            })?;

            if manifest.entries.contains_key(&entry_name) {
                return Err(ManifestError::DuplicateEntry { entry: entry_name });
            }
            manifest.entries.insert(
                entry_name,
                ArtifactEntry {
                    checksum,
                    content_type,
                    attributes: others,
                },
            );
        }

        Ok(manifest)
    }

    /// Render the manifest in `MANIFEST.MF` format.
    pub fn render(&self) -> String {
        let mut out = String::new();

        if let Some(version) = &self.version {
            write_header(&mut out, MANIFEST_VERSION, version);
        }
        for (name, value) in &self.main_attributes {
            write_header(&mut out, name, value);
        }
        out.push_str("\r\n");

        for (name, entry) in &self.entries {
            write_header(&mut out, NAME, name);
            write_header(&mut out, CHECKSUM, &entry.checksum);
            if let Some(content_type) = &entry.content_type {
                write_header(&mut out, CONTENT_TYPE, content_type);
            }
            for (attr, value) in &entry.attributes {
                write_header(&mut out, attr, value);
            }
            out.push_str("\r\n");
        }

        out
    }
}

impl FromStr for Manifest {
    type Err = ManifestError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for Manifest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.render())
    }
}

struct Section {
    first_line: usize,
    attributes: Vec<(String, String)>,
}

fn split_sections(text: &str) -> Result<Vec<Section>, ManifestError> {
    let mut sections = Vec::new();
    let mut current: Option<Section> = None;

    for (index, line) in text.lines().enumerate() {
        let line_no = index + 1;
        // `lines()` strips "\n" and "\r\n"; tolerate a stray trailing '\r'
        let line = line.strip_suffix('\r').unwrap_or(line);

        if line.is_empty() {
            if let Some(section) = current.take() {
                sections.push(section);
            } else if sections.is_empty() {
                // An empty main section
                sections.push(Section {
                    first_line: line_no,
                    attributes: Vec::new(),
                });
            }
            continue;
        }

        if let Some(rest) = line.strip_prefix(' ') {
            let attribute = current
                .as_mut()
                .and_then(|s| s.attributes.last_mut())
                .ok_or(ManifestError::OrphanContinuation { line: line_no })?;
            attribute.1.push_str(rest);
            continue;
        }

        let (name, value) =
            line.split_once(": ").ok_or(ManifestError::MissingSeparator { line: line_no })?;
        current
            .get_or_insert_with(|| Section {
                first_line: line_no,
                attributes: Vec::new(),
            })
            .attributes
            .push((name.to_string(), value.to_string()));
    }

    if let Some(section) = current {
        sections.push(section);
    }
    Ok(sections)
}

fn write_header(out: &mut String, name: &str, value: &str) {
    let line = format!("{name}: {value}");
    let mut remaining = line.as_str();
    let mut limit = MAX_LINE_BYTES;
    let mut first = true;

    while !remaining.is_empty() {
        let mut cut = remaining.len().min(limit);
        while !remaining.is_char_boundary(cut) {
            cut -= 1;
        }
        if !first {
            out.push(' ');
        }
        out.push_str(&remaining[..cut]);
        out.push_str("\r\n");
        remaining = &remaining[cut..];
        limit = MAX_LINE_BYTES - 1;
        first = false;
    }
}
