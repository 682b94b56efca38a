use std::fs;
use std::io::{self, Cursor};
use std::path::{Component, Path, PathBuf};

use anyhow::{anyhow, bail, Context, Result};
use flate2::read::GzDecoder;
use url::Url;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArchiveKind {
    Zip,
    TarGz,
}

impl ArchiveKind {
    /// Sniff the format from magic bytes; registry URLs carry no reliable extension
    pub fn detect(bytes: &[u8]) -> Option<Self> {
        match bytes {
            [b'P', b'K', 3, 4, ..] | [b'P', b'K', 5, 6, ..] => Some(Self::Zip),
            [0x1f, 0x8b, ..] => Some(Self::TarGz),
            _ => None,
        }
    }
}

/// Read archive bytes from `http(s)://`, `file://`, or a plain path
pub(super) async fn read_archive(http_client: &reqwest::Client, location: &str) -> Result<Vec<u8>> {
    if let Ok(url) = Url::parse(location) {
        match url.scheme() {
            "http" | "https" => {
                let bytes = http_client
                    .get(url.clone())
                    .send()
                    .await
                    .with_context(|| format!("failed to fetch archive from {}", url))?
                    .error_for_status()
                    .with_context(|| format!("archive request failed for {}", url))?
                    .bytes()
                    .await
                    .context("failed to read archive response bytes")?;
                return Ok(bytes.to_vec());
            }
            "file" => {
                let path = url
                    .to_file_path()
                    .map_err(|_| anyhow!("invalid file URL: {}", url))?;
                return tokio::fs::read(&path)
                    .await
                    .with_context(|| format!("failed to read archive {}", path.display()));
            }
            // Windows drive letters parse as a one-letter scheme
            scheme if scheme.len() > 1 => bail!("unsupported archive URL scheme: {}", scheme),
            _ => {}
        }
    }

    let path = PathBuf::from(location);
    tokio::fs::read(&path)
        .await
        .with_context(|| format!("failed to read archive {}", path.display()))
}

/// Extract a zip or gzip-compressed tar into `dest`. Entries that would land
/// outside `dest` fail the whole extraction.
pub fn unpack_archive(bytes: &[u8], dest: &Path) -> Result<()> {
    fs::create_dir_all(dest).with_context(|| format!("failed to create {}", dest.display()))?;

    match ArchiveKind::detect(bytes) {
        Some(ArchiveKind::Zip) => unpack_zip(bytes, dest),
        Some(ArchiveKind::TarGz) => unpack_tar_gz(bytes, dest),
        None => bail!("unrecognized archive format (expected zip or tar.gz)"),
    }
}

fn unpack_zip(bytes: &[u8], dest: &Path) -> Result<()> {
    let mut archive = zip::ZipArchive::new(Cursor::new(bytes)).context("invalid zip archive")?;

    for index in 0..archive.len() {
        let mut file = archive.by_index(index)?;
        let relative = file
            .enclosed_name()
            .ok_or_else(|| anyhow!("zip entry '{}' escapes the archive root", file.name()))?;
        let target = dest.join(relative);

        if file.is_dir() {
            fs::create_dir_all(&target)?;
            continue;
        }

        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent)?;
        }
        let mut out = fs::File::create(&target)
            .with_context(|| format!("failed to create {}", target.display()))?;
        io::copy(&mut file, &mut out)?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            if let Some(mode) = file.unix_mode() {
                fs::set_permissions(&target, fs::Permissions::from_mode(mode & 0o777))?;
            }
        }
    }

    Ok(())
}

fn unpack_tar_gz(bytes: &[u8], dest: &Path) -> Result<()> {
    let mut archive = tar::Archive::new(GzDecoder::new(Cursor::new(bytes)));

    for entry in archive.entries().context("invalid tar archive")? {
        let mut entry = entry?;
        let path = entry.path()?.into_owned();
        validate_entry_path(&path)?;

        let kind = entry.header().entry_type();
        if kind.is_symlink() || kind.is_hard_link() {
            tracing::debug!("Skipping link entry {}", path.display());
            continue;
        }
        if kind.is_pax_global_extensions() || kind.is_pax_local_extensions() {
            continue;
        }

        entry
            .unpack_in(dest)
            .with_context(|| format!("failed to extract {}", path.display()))?;
    }

    Ok(())
}

fn validate_entry_path(path: &Path) -> Result<()> {
    for component in path.components() {
        match component {
            Component::ParentDir | Component::RootDir | Component::Prefix(_) => {
                bail!("archive entry '{}' escapes the archive root", path.display())
            }
            _ => {}
        }
    }
    Ok(())
}

/// Archives usually wrap their content in one top-level folder; step into it
pub fn descend_single_root(dir: &Path) -> Result<PathBuf> {
    let mut entries = Vec::new();
    for entry in fs::read_dir(dir).with_context(|| format!("failed to read {}", dir.display()))? {
        let entry = entry?;
        if entry.file_name() == "__MACOSX" {
            continue;
        }
        entries.push(entry);
    }

    if let [only] = entries.as_slice() {
        if only.file_type()?.is_dir() {
            return Ok(only.path());
        }
    }
    Ok(dir.to_path_buf())
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::{write::GzEncoder, Compression};
    use std::io::Write;
    use tempfile::tempdir;

    fn build_zip(entries: &[(&str, &str)]) -> Vec<u8> {
        let mut writer = zip::ZipWriter::new(Cursor::new(Vec::new()));
        let options = zip::write::SimpleFileOptions::default();
        for (name, contents) in entries {
            writer.start_file(*name, options).expect("start zip entry");
            writer.write_all(contents.as_bytes()).expect("write zip entry");
        }
        writer.finish().expect("finish zip").into_inner()
    }

    fn build_tar_gz(entries: &[(&str, &str)]) -> Vec<u8> {
        let encoder = GzEncoder::new(Vec::new(), Compression::default());
        let mut builder = tar::Builder::new(encoder);
        for (name, contents) in entries {
            let mut header = tar::Header::new_gnu();
            header.set_size(contents.len() as u64);
            header.set_mode(0o644);
            header.set_cksum();
            builder
                .append_data(&mut header, name, contents.as_bytes())
                .expect("append tar entry");
        }
        builder
            .into_inner()
            .expect("finish tar")
            .finish()
            .expect("finish gzip")
    }

    #[test]
    fn detects_formats_by_magic() {
        assert_eq!(ArchiveKind::detect(&build_zip(&[("a", "b")])), Some(ArchiveKind::Zip));
        assert_eq!(ArchiveKind::detect(&build_tar_gz(&[("a", "b")])), Some(ArchiveKind::TarGz));
        assert_eq!(ArchiveKind::detect(b"<html>"), None);
    }

    #[test]
    fn unpacks_zip_and_descends_wrapper_dir() {
        let temp = tempdir().expect("tempdir");
        let bytes = build_zip(&[
            ("foo-1.0.0/Plugin.php", "<?php"),
            ("foo-1.0.0/i18n/en.json", "{}"),
        ]);

        unpack_archive(&bytes, temp.path()).expect("unpack");
        let root = descend_single_root(temp.path()).expect("root");

        assert_eq!(root, temp.path().join("foo-1.0.0"));
        assert_eq!(fs::read_to_string(root.join("Plugin.php")).expect("read"), "<?php");
        assert!(root.join("i18n/en.json").is_file());
    }

    #[test]
    fn unpacks_tar_gz_without_wrapper() {
        let temp = tempdir().expect("tempdir");
        let bytes = build_tar_gz(&[("Plugin.php", "<?php"), ("assets/icon.svg", "<svg/>")]);

        unpack_archive(&bytes, temp.path()).expect("unpack");
        let root = descend_single_root(temp.path()).expect("root");

        assert_eq!(root, temp.path());
        assert!(root.join("assets/icon.svg").is_file());
    }

    #[test]
    fn rejects_zip_traversal() {
        let temp = tempdir().expect("tempdir");
        let dest = temp.path().join("out");
        let bytes = build_zip(&[("../evil.txt", "pwned")]);

        assert!(unpack_archive(&bytes, &dest).is_err());
        assert!(!temp.path().join("evil.txt").exists());
    }

    #[test]
    fn rejects_tar_traversal() {
        let temp = tempdir().expect("tempdir");
        let dest = temp.path().join("out");

        // tar::Builder refuses `..` paths, so write the header name by hand
        let encoder = GzEncoder::new(Vec::new(), Compression::default());
        let mut builder = tar::Builder::new(encoder);
        let mut header = tar::Header::new_old();
        let name = b"../evil.txt";
        header.as_old_mut().name[..name.len()].copy_from_slice(name);
        header.set_size(5);
        header.set_mode(0o644);
        header.set_cksum();
        builder.append(&header, &b"pwned"[..]).expect("append");
        let bytes = builder
            .into_inner()
            .expect("finish tar")
            .finish()
            .expect("finish gzip");

        assert!(unpack_archive(&bytes, &dest).is_err());
        assert!(!temp.path().join("evil.txt").exists());
    }

    #[test]
    fn rejects_unknown_format() {
        let temp = tempdir().expect("tempdir");
        assert!(unpack_archive(b"definitely not an archive", temp.path()).is_err());
    }

    #[tokio::test]
    async fn reads_local_paths_and_file_urls() {
        let temp = tempdir().expect("tempdir");
        let path = temp.path().join("plugin.zip");
        fs::write(&path, b"PK\x03\x04rest").expect("write");

        let client = reqwest::Client::new();
        let by_path = read_archive(&client, path.to_str().expect("utf8 path"))
            .await
            .expect("read by path");
        let url = Url::from_file_path(&path).expect("file url");
        let by_url = read_archive(&client, url.as_str()).await.expect("read by url");

        assert_eq!(by_path, by_url);
        assert!(read_archive(&client, "ftp://example.org/x.zip").await.is_err());
    }
}
