//! Directory fingerprinting
//!
//! The checksum of a tree is the SHA-256 of the sorted `"/relative/path:<sha256 of bytes>"`
//! entries joined with `|`. Sorting makes it independent of traversal order;
//! directories themselves contribute nothing. `.git` is never part of an
//! install, so it is not part of the fingerprint either.

use std::fs::File;
use std::io;
use std::path::{Path, PathBuf};

use sha2::{Digest as _, Sha256};
use walkdir::WalkDir;

use crate::error::{PluginError, Result};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirectoryMetadata {
    pub total_bytes: u64,
    pub file_count: u64,
    /// Lowercase hex SHA-256
    pub checksum: String,
}

impl DirectoryMetadata {
    /// Compare against a registry-declared checksum (case-insensitive)
    pub fn matches(&self, expected: &str) -> bool {
        self.checksum.eq_ignore_ascii_case(expected.trim())
    }
}

pub fn compute_metadata(path: &Path) -> Result<DirectoryMetadata> {
    let not_found = || PluginError::DirectoryNotFound {
        path: path.to_path_buf(),
    };
    let root = std::fs::canonicalize(path).map_err(|_| not_found())?;
    if !root.is_dir() {
        return Err(not_found());
    }

    let mut entries = Vec::new();
    let mut total_bytes = 0u64;
    let mut file_count = 0u64;

    let walker = WalkDir::new(&root)
        .follow_links(false)
        .into_iter()
        .filter_entry(|entry| entry.depth() == 0 || entry.file_name() != ".git");

    for entry in walker {
        let entry = entry.map_err(io::Error::from)?;
        let file_path = entry.path();
        // `is_file` follows symlinks to files; symlinked directories are not descended
        if !file_path.is_file() {
            continue;
        }

        let (digest, size) = hash_file(file_path)?;
        entries.push(format!("{}:{}", relative_path(&root, file_path), digest));
        total_bytes += size;
        file_count += 1;
    }

    entries.sort();
    let checksum = format!("{:x}", Sha256::digest(entries.join("|").as_bytes()));

    Ok(DirectoryMetadata {
        total_bytes,
        file_count,
        checksum,
    })
}

/// [`compute_metadata`] on the blocking pool
pub async fn compute_metadata_blocking(path: PathBuf) -> Result<DirectoryMetadata> {
    tokio::task::spawn_blocking(move || compute_metadata(&path))
        .await
        .map_err(|e| PluginError::Io(io::Error::other(e)))?
}

fn hash_file(path: &Path) -> io::Result<(String, u64)> {
    let mut file = File::open(path)?;
    let mut hasher = Sha256::new();
    let size = io::copy(&mut file, &mut hasher)?;
    Ok((format!("{:x}", hasher.finalize()), size))
}

/// `/a/b.txt` style, forward slashes on every platform
fn relative_path(root: &Path, file: &Path) -> String {
    let relative = file.strip_prefix(root).unwrap_or(file);
    let mut out = String::new();
    for component in relative.components() {
        out.push('/');
        out.push_str(&component.as_os_str().to_string_lossy());
    }
    out
}
