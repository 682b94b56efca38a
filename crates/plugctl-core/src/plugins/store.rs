//! Shared JSON file handling for the manifest and the lockfile

use std::io::Write as _;
use std::path::Path;

use anyhow::{Context, Result};
use serde::Serialize;

use crate::logging::Logger;

/// Tolerant read: a missing, empty, or malformed file yields `None` plus a
/// warning record. Never fails.
pub(crate) fn read_json_tolerant(
    path: &Path,
    label: &str,
    logger: &Logger,
) -> Option<serde_json::Map<String, serde_json::Value>> {
    let file = path.display().to_string();

    if !path.exists() {
        logger.warning(
            &format!("{}.readFileNotFound", label),
            format!("{} file was not found.", label),
            &[("filePath", &file)],
        );
        return None;
    }

    let content = match std::fs::read_to_string(path) {
        Ok(content) => content,
        Err(e) => {
            logger.warning(
                &format!("{}.readError", label),
                format!("Could not read {} file: {}", label, e),
                &[("filePath", &file)],
            );
            return None;
        }
    };

    if content.trim().is_empty() {
        logger.warning(
            &format!("{}.readEmptyFile", label),
            format!("{} file is empty.", label),
            &[("filePath", &file)],
        );
        return None;
    }

    match serde_json::from_str::<serde_json::Value>(&content) {
        Ok(serde_json::Value::Object(map)) => Some(map),
        Ok(_) => {
            logger.warning(
                &format!("{}.readMalformed", label),
                format!("{} file is not a JSON object, ignoring it.", label),
                &[("filePath", &file)],
            );
            None
        }
        Err(e) => {
            logger.warning(
                &format!("{}.readMalformed", label),
                format!("{} file is not valid JSON, ignoring it: {}", label, e),
                &[("filePath", &file)],
            );
            None
        }
    }
}

/// Four-space pretty JSON with a trailing newline, written through a
/// temporary file in the same directory and renamed into place.
pub(crate) fn write_json_pretty<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let mut buf = Vec::new();
    let formatter = serde_json::ser::PrettyFormatter::with_indent(b"    ");
    let mut serializer = serde_json::Serializer::with_formatter(&mut buf, formatter);
    value
        .serialize(&mut serializer)
        .context("failed to serialize json")?;
    buf.push(b'\n');

    let dir = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    std::fs::create_dir_all(dir)
        .with_context(|| format!("failed to create {}", dir.display()))?;

    let mut tmp = tempfile::NamedTempFile::new_in(dir)
        .with_context(|| format!("failed to create temp file in {}", dir.display()))?;
    tmp.write_all(&buf)
        .with_context(|| format!("failed to write {}", path.display()))?;
    tmp.persist(path)
        .with_context(|| format!("failed to replace {}", path.display()))?;
    Ok(())
}
