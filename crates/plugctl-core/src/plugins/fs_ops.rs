//! Filesystem primitives for installing and removing plugin trees

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use walkdir::WalkDir;

use crate::constants::files;

/// Recursive copy of `src` into `dst`. Version control metadata is skipped.
pub fn copy_dir_all(src: &Path, dst: &Path) -> io::Result<()> {
    fs::create_dir_all(dst)?;

    let walker = WalkDir::new(src)
        .min_depth(1)
        .into_iter()
        .filter_entry(|entry| entry.file_name() != ".git");

    for entry in walker {
        let entry = entry.map_err(io::Error::from)?;
        let relative = entry
            .path()
            .strip_prefix(src)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))?;
        let target = dst.join(relative);

        if entry.file_type().is_dir() {
            fs::create_dir_all(&target)?;
        } else if entry.path().is_file() {
            if let Some(parent) = target.parent() {
                fs::create_dir_all(parent)?;
            }
            fs::copy(entry.path(), &target)?;
        }
    }

    Ok(())
}

/// Replace `dest` with a copy of `src`.
///
/// Content lands in a staging directory next to `dest` first, so a failed
/// copy never touches the existing install. Files absent from `src` do not
/// survive the swap.
pub fn replace_dir_staged(src: &Path, dest: &Path) -> io::Result<()> {
    let (parent, name) = split_dest(dest)?;
    fs::create_dir_all(&parent)?;

    let staging = parent.join(format!("{}{}", files::STAGING_PREFIX, name));
    let backup = parent.join(format!("{}old-{}", files::STAGING_PREFIX, name));
    for leftover in [&staging, &backup] {
        if leftover.exists() {
            fs::remove_dir_all(leftover)?;
        }
    }

    let staging_guard = scopeguard::guard(staging.clone(), |path| {
        if path.exists() {
            if let Err(e) = fs::remove_dir_all(&path) {
                tracing::warn!("Failed to clean staging dir {}: {}", path.display(), e);
            }
        }
    });

    copy_dir_all(src, &staging)?;

    let had_previous = dest.exists();
    if had_previous {
        fs::rename(dest, &backup)?;
    }

    if let Err(e) = fs::rename(&staging, dest) {
        if had_previous {
            if let Err(restore) = fs::rename(&backup, dest) {
                tracing::error!(
                    "Failed to restore {} from {}: {}",
                    dest.display(),
                    backup.display(),
                    restore
                );
            }
        }
        return Err(e);
    }
    scopeguard::ScopeGuard::into_inner(staging_guard);

    if had_previous {
        if let Err(e) = fs::remove_dir_all(&backup) {
            tracing::warn!("Failed to remove previous install {}: {}", backup.display(), e);
        }
    }

    Ok(())
}

/// True when `path` is a directory holding at least one entry
pub fn dir_has_content(path: &Path) -> bool {
    fs::read_dir(path)
        .map(|mut entries| entries.next().is_some())
        .unwrap_or(false)
}

/// Delete a plugin directory, then its vendor directory when that became
/// empty. `plugins_root` itself is never removed.
pub fn remove_plugin_dir(dir: &Path, plugins_root: &Path) -> io::Result<()> {
    let result = fs::remove_dir_all(dir);

    if let Some(vendor_dir) = dir.parent() {
        if vendor_dir != plugins_root
            && vendor_dir.starts_with(plugins_root)
            && vendor_dir.is_dir()
            && !dir_has_content(vendor_dir)
        {
            if let Err(e) = fs::remove_dir(vendor_dir) {
                tracing::debug!("Failed to prune vendor dir {}: {}", vendor_dir.display(), e);
            }
        }
    }

    result
}

/// `pluginsDir/<vendor>/<name>` directories present on disk
pub fn installed_dirs(plugins_root: &Path) -> io::Result<Vec<(String, String)>> {
    let mut found = Vec::new();
    if !plugins_root.is_dir() {
        return Ok(found);
    }

    for vendor in fs::read_dir(plugins_root)? {
        let vendor = vendor?;
        if !vendor.file_type()?.is_dir() {
            continue;
        }
        let vendor_name = vendor.file_name().to_string_lossy().to_string();
        if vendor_name.starts_with('.') {
            continue;
        }
        for plugin in fs::read_dir(vendor.path())? {
            let plugin = plugin?;
            let plugin_name = plugin.file_name().to_string_lossy().to_string();
            if plugin.file_type()?.is_dir() && !plugin_name.starts_with('.') {
                found.push((vendor_name.clone(), plugin_name));
            }
        }
    }

    found.sort();
    Ok(found)
}

fn split_dest(dest: &Path) -> io::Result<(PathBuf, String)> {
    let parent = dest
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."))
        .to_path_buf();
    let name = dest
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .ok_or_else(|| {
            io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("{} has no directory name", dest.display()),
            )
        })?;
    Ok((parent, name))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn write(root: &Path, rel: &str, contents: &str) {
        let path = root.join(rel);
        fs::create_dir_all(path.parent().expect("parent")).expect("create parent");
        fs::write(path, contents).expect("write file");
    }

    #[test]
    fn copy_skips_git_metadata() {
        let temp = tempdir().expect("tempdir");
        let src = temp.path().join("src");
        write(&src, "Plugin.php", "<?php");
        write(&src, "nested/deep/file.txt", "x");
        write(&src, ".git/HEAD", "ref");

        let dst = temp.path().join("dst");
        copy_dir_all(&src, &dst).expect("copy");

        assert!(dst.join("Plugin.php").is_file());
        assert!(dst.join("nested/deep/file.txt").is_file());
        assert!(!dst.join(".git").exists());
    }

    #[test]
    fn staged_replace_prunes_stale_files() {
        let temp = tempdir().expect("tempdir");
        let dest = temp.path().join("plugins/acme/foo");
        write(&dest, "old-only.txt", "stale");
        write(&dest, "shared.txt", "v1");

        let src = temp.path().join("new");
        write(&src, "shared.txt", "v2");
        write(&src, "new-only.txt", "fresh");

        replace_dir_staged(&src, &dest).expect("replace");

        assert!(!dest.join("old-only.txt").exists());
        assert_eq!(fs::read_to_string(dest.join("shared.txt")).expect("read"), "v2");
        assert!(dest.join("new-only.txt").exists());

        let siblings: Vec<_> = fs::read_dir(temp.path().join("plugins/acme"))
            .expect("read vendor")
            .map(|e| e.expect("entry").file_name())
            .collect();
        assert_eq!(siblings, vec![std::ffi::OsString::from("foo")]);
    }

    #[test]
    fn staged_replace_failure_keeps_existing_install() {
        let temp = tempdir().expect("tempdir");
        let dest = temp.path().join("plugins/acme/foo");
        write(&dest, "keep.txt", "v1");

        let missing_src = temp.path().join("does-not-exist");
        assert!(replace_dir_staged(&missing_src, &dest).is_err());

        assert_eq!(fs::read_to_string(dest.join("keep.txt")).expect("read"), "v1");
        let staging = temp
            .path()
            .join("plugins/acme")
            .join(format!("{}foo", files::STAGING_PREFIX));
        assert!(!staging.exists());
    }

    #[test]
    fn remove_prunes_empty_vendor_only() {
        let temp = tempdir().expect("tempdir");
        let root = temp.path().join("plugins");
        write(&root, "acme/foo/a.txt", "x");
        write(&root, "acme/bar/b.txt", "y");

        remove_plugin_dir(&root.join("acme/foo"), &root).expect("remove foo");
        assert!(root.join("acme").is_dir());

        remove_plugin_dir(&root.join("acme/bar"), &root).expect("remove bar");
        assert!(!root.join("acme").exists());
        assert!(root.is_dir());
    }

    #[cfg(unix)]
    #[test]
    fn failed_vendor_prune_does_not_fail_removal() {
        use std::os::unix::fs::PermissionsExt;

        let temp = tempdir().expect("tempdir");
        let root = temp.path().join("plugins");
        write(&root, "acme/foo/a.txt", "x");

        fs::set_permissions(&root, fs::Permissions::from_mode(0o555)).expect("chmod");
        // Root ignores directory permissions
        let enforced = fs::write(root.join(".canary"), "x").is_err();
        let result = remove_plugin_dir(&root.join("acme/foo"), &root);
        fs::set_permissions(&root, fs::Permissions::from_mode(0o755)).expect("chmod");

        result.expect("plugin dir removed");
        assert!(!root.join("acme/foo").exists());
        if enforced {
            assert!(root.join("acme").is_dir());
        }
    }

    #[test]
    fn lists_installed_dirs() {
        let temp = tempdir().expect("tempdir");
        let root = temp.path().join("plugins");
        write(&root, "zeta/one/f", "");
        write(&root, "acme/two/f", "");
        write(&root, "acme/.plugctl-staging-three/f", "");
        write(&root, "README", "");

        let found = installed_dirs(&root).expect("list");
        assert_eq!(
            found,
            vec![
                ("acme".to_string(), "two".to_string()),
                ("zeta".to_string(), "one".to_string())
            ]
        );
        assert!(installed_dirs(&temp.path().join("missing")).expect("empty").is_empty());
    }
}
