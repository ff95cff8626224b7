// Copyright (C) 2025 Berth Contributors
// SPDX-License-Identifier: AGPL-3.0-or-later
//! SHA-256 sidecars for backup streams, in `sha256sum` format.

use std::io::ErrorKind;
use std::path::Path;

use sha2::{Digest, Sha256};
use tokio::io::AsyncReadExt;

use crate::error::{BackupError, Result};

const CHUNK: usize = 64 * 1024;

/// Hex SHA-256 of a file, read in chunks.
pub async fn sha256_file(path: &Path) -> Result<String> {
    let mut file = tokio::fs::File::open(path).await?;
    let mut hasher = Sha256::new();
    let mut buf = vec![0u8; CHUNK];
    loop {
        let n = file.read(&mut buf).await?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(format!("{:x}", hasher.finalize()))
}

/// Hash `artifact` and write `<hex>  <file name>` to `sidecar`.
pub async fn write_sidecar(artifact: &Path, sidecar: &Path) -> Result<String> {
    let digest = sha256_file(artifact).await?;
    let name = artifact
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    tokio::fs::write(sidecar, format!("{}  {}\n", digest, name)).await?;
    Ok(digest)
}

/// Check `artifact` against `sidecar`.
///
/// Returns `false` when there is no sidecar to check against.
pub async fn verify(artifact: &Path, sidecar: &Path) -> Result<bool> {
    let recorded = match tokio::fs::read_to_string(sidecar).await {
        Ok(c) => c,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(false),
        Err(e) => return Err(e.into()),
    };
    let expected = recorded
        .split_whitespace()
        .next()
        .unwrap_or_default()
        .to_ascii_lowercase();

    let actual = sha256_file(artifact).await?;
    if actual != expected {
        return Err(BackupError::ChecksumMismatch {
            path: artifact.to_path_buf(),
            expected,
            actual,
        });
    }
    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_known_digest() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("a.gz");
        tokio::fs::write(&path, "abc").await.unwrap();

        assert_eq!(
            sha256_file(&path).await.unwrap(),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[tokio::test]
    async fn test_sidecar_detects_corruption() {
        let temp_dir = TempDir::new().unwrap();
        let artifact = temp_dir.path().join("a.gz");
        let sidecar = temp_dir.path().join("a.sha256");
        tokio::fs::write(&artifact, "stream").await.unwrap();

        write_sidecar(&artifact, &sidecar).await.unwrap();
        let written = tokio::fs::read_to_string(&sidecar).await.unwrap();
        assert!(written.ends_with("  a.gz\n"));
        assert!(verify(&artifact, &sidecar).await.unwrap());

        tokio::fs::write(&artifact, "stream, truncated").await.unwrap();
        let err = verify(&artifact, &sidecar).await.unwrap_err();
        assert!(matches!(err, BackupError::ChecksumMismatch { .. }));
    }

    #[tokio::test]
    async fn test_missing_sidecar_is_unverified() {
        let temp_dir = TempDir::new().unwrap();
        let artifact = temp_dir.path().join("a.gz");
        tokio::fs::write(&artifact, "stream").await.unwrap();
        assert!(
            !verify(&artifact, &temp_dir.path().join("a.sha256"))
                .await
                .unwrap()
        );
    }
}
