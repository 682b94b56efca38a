//! Subcommand bodies
//!
//! Failures of plugin operations are already reported through the manager's
//! logger, so these only decide the exit status and print results to stdout.

use anyhow::Result;

use plugctl_core::constants::install;
use plugctl_core::plugins::{
    InstallSummary, PluginKey, PluginListing, PluginManager, PluginState, PluginStatus,
    RemoveOutcome, UpdateOutcome, VersionRequest,
};

use crate::Commands;

/// Run one command. `Ok(false)` means the operation failed for a plugin.
pub(crate) async fn run(manager: &PluginManager, command: Commands) -> Result<bool> {
    match command {
        Commands::Add {
            key,
            constraint,
            no_save,
        } => {
            let key = PluginKey::parse(&key)?;
            let request = VersionRequest::Constraint(constraint);
            match manager.add(&key, request, !no_save).await {
                Ok(summary) => {
                    println!("{}", installed_line(&summary));
                    Ok(true)
                }
                Err(_) => Ok(false),
            }
        }
        Commands::Update { key } => {
            let key = PluginKey::parse(&key)?;
            match manager.update(&key).await {
                Ok(UpdateOutcome::Updated { from, installed }) => {
                    println!("{} (was {})", installed_line(&installed), from);
                    Ok(true)
                }
                Ok(UpdateOutcome::AlreadyUpToDate { tag }) => {
                    println!("{}@{} is up to date", key, tag);
                    Ok(true)
                }
                Err(_) => Ok(false),
            }
        }
        Commands::Remove { key } => {
            let key = PluginKey::parse(&key)?;
            match manager.remove(&key).await {
                Ok(RemoveOutcome::Removed) => {
                    println!("removed {}", key);
                    Ok(true)
                }
                Ok(RemoveOutcome::NothingToRemove) => Ok(true),
                Err(_) => Ok(false),
            }
        }
        Commands::Install => {
            let report = manager.install_from_manifest().await;
            for summary in &report.installed {
                println!("{}", installed_line(summary));
            }
            for (key, err) in &report.failed {
                println!("failed {}: {}", key, err);
            }
            Ok(report.is_success())
        }
        Commands::List => {
            for listing in manager.list() {
                println!("{}", listing_line(&listing));
            }
            Ok(true)
        }
        Commands::Status => {
            let statuses = manager.status()?;
            let clean = statuses.iter().all(|s| s.state == PluginState::Installed);
            for status in &statuses {
                println!("{}", status_line(status));
            }
            Ok(clean)
        }
    }
}

fn installed_line(summary: &InstallSummary) -> String {
    format!(
        "installed {}@{} from {} ({} files, {} bytes, sha256 {})",
        summary.key,
        summary.tag,
        summary.source,
        summary.metadata.file_count,
        summary.metadata.total_bytes,
        summary.metadata.checksum
    )
}

fn listing_line(listing: &PluginListing) -> String {
    let declared = match &listing.constraint {
        Some(Some(constraint)) => constraint.as_str(),
        Some(None) => install::LATEST,
        None => "-",
    };
    let locked = listing
        .locked
        .as_ref()
        .map(|entry| entry.version.as_str())
        .unwrap_or("-");
    format!("{:<40} {:<16} {}", listing.key.as_str(), declared, locked)
}

fn status_line(status: &PluginStatus) -> String {
    format!(
        "{:<40} {:<24} {}",
        status.key,
        status.state.as_str(),
        status.version.as_deref().unwrap_or("-")
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use plugctl_core::plugins::{LockEntry, LockSource};

    fn key(raw: &str) -> PluginKey {
        PluginKey::parse(raw).expect("valid key")
    }

    #[test]
    fn listing_shows_latest_and_missing_lock() {
        let declared_latest = PluginListing {
            key: key("acme/foo"),
            constraint: Some(None),
            locked: None,
        };
        let line = listing_line(&declared_latest);
        assert!(line.starts_with("acme/foo"));
        assert!(line.contains("latest"));
        assert!(line.trim_end().ends_with('-'));

        let locked_only = PluginListing {
            key: key("acme/bar"),
            constraint: None,
            locked: Some(LockEntry {
                version: "2.1.0".into(),
                source: LockSource {
                    url: "https://git.example.org/acme/bar.git".into(),
                    reference: "abc".into(),
                    path: None,
                },
                dist: None,
            }),
        };
        assert!(listing_line(&locked_only).trim_end().ends_with("2.1.0"));
    }

    #[test]
    fn status_line_names_state() {
        let line = status_line(&PluginStatus {
            key: "other/stray".into(),
            state: PluginState::Untracked,
            version: None,
        });
        assert!(line.contains("untracked"));
    }
}
