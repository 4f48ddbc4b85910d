use anyhow::{Context, Result};
use sha2::{Digest, Sha256};
use std::path::Path;
use tokio::fs;
use tracing::debug;

/// Checksum primitive used to decide whether an artifact needs syncing.
///
/// Manifest checksums are hex-encoded SHA-256 digests of the artifact file.
/// Comparison ignores ASCII case, since release pipelines have written both
/// upper- and lowercase digests.
pub struct ChecksumVerifier;

impl ChecksumVerifier {
    /// Hex-encoded SHA-256 digest of a file.
    ///
    /// # Examples
    ///
    /// ```rust,no_run
    /// use refit_cli::upgrade::verification::ChecksumVerifier;
    /// use std::path::Path;
    ///
    /// # async fn example() -> anyhow::Result<()> {
    /// let checksum = ChecksumVerifier::compute_sha256(Path::new("lib/app.jar")).await?;
    /// println!("SHA256: {}", checksum);
    /// # Ok(())
    /// # }
    /// ```
    pub async fn compute_sha256(file_path: &Path) -> Result<String> {
        let contents = fs::read(file_path)
            .await
            .with_context(|| format!("Failed to read file: {}", file_path.display()))?;
        Ok(Self::sha256_hex(&contents))
    }

    /// Hex-encoded SHA-256 digest of `bytes`.
    pub fn sha256_hex(bytes: &[u8]) -> String {
        hex::encode(Sha256::digest(bytes))
    }

    /// Whether the file's digest equals `expected`, ignoring case.
    ///
    /// # Errors
    ///
    /// Fails if the file cannot be read.
    pub async fn matches(file_path: &Path, expected: &str) -> Result<bool> {
        let actual = Self::compute_sha256(file_path).await?;
        let matches = actual.eq_ignore_ascii_case(expected.trim());
        if !matches {
            debug!(
                "Checksum mismatch for {}: expected {}, actual {}",
                file_path.display(),
                expected,
                actual
            );
        }
        Ok(matches)
    }
}
