use std::path::{Component, Path, PathBuf};

use anyhow::{anyhow, bail, Context, Result};
use tokio::process::Command;

/// Check out `reference` of `url` into `dest` as a detached HEAD.
///
/// A shallow fetch of the single ref is tried first; servers that refuse
/// fetching by commit get a full fetch instead.
pub(super) async fn checkout(git: &str, url: &str, reference: &str, dest: &Path) -> Result<()> {
    tokio::fs::create_dir_all(dest)
        .await
        .with_context(|| format!("failed to create {}", dest.display()))?;

    run_git(git, &["init", "-q"], dest).await?;
    run_git(git, &["remote", "add", "origin", url], dest).await?;

    let shallow = run_git(git, &["fetch", "-q", "--depth", "1", "origin", reference], dest).await;
    match shallow {
        Ok(_) => {
            run_git(git, &["checkout", "-q", "--detach", "FETCH_HEAD"], dest).await?;
        }
        Err(e) => {
            tracing::debug!("Shallow fetch of {} failed, fetching all refs: {:#}", reference, e);
            run_git(
                git,
                &[
                    "fetch",
                    "-q",
                    "--tags",
                    "origin",
                    "+refs/heads/*:refs/remotes/origin/*",
                ],
                dest,
            )
            .await?;
            run_git(git, &["checkout", "-q", "--detach", reference], dest).await?;
        }
    }

    Ok(())
}

/// Directory of the plugin inside a checkout
pub(super) fn plugin_root(checkout: &Path, subfolder: &str) -> Result<PathBuf> {
    let subfolder = subfolder.trim_matches('/');
    if subfolder.is_empty() {
        return Ok(checkout.to_path_buf());
    }

    let relative = Path::new(subfolder);
    if relative
        .components()
        .any(|c| !matches!(c, Component::Normal(_)))
    {
        bail!("plugin subfolder '{}' must be a plain relative path", subfolder);
    }

    let root = checkout.join(relative);
    if !root.is_dir() {
        bail!("plugin subfolder '{}' does not exist in the repository", subfolder);
    }
    Ok(root)
}

async fn run_git(git: &str, args: &[&str], cwd: &Path) -> Result<std::process::Output> {
    let output = Command::new(git)
        .args(args)
        .current_dir(cwd)
        .env("GIT_TERMINAL_PROMPT", "0")
        .output()
        .await
        .with_context(|| format!("Failed to execute git {} in {}", args.join(" "), cwd.display()))?;

    if output.status.success() {
        Ok(output)
    } else {
        let detail = command_error_detail(&output.stdout, &output.stderr);
        Err(anyhow!("git {} failed: {}", args.join(" "), detail))
    }
}

fn command_error_detail(stdout: &[u8], stderr: &[u8]) -> String {
    let stderr = String::from_utf8_lossy(stderr).trim().to_string();
    if !stderr.is_empty() {
        return stderr;
    }
    let stdout = String::from_utf8_lossy(stdout).trim().to_string();
    if !stdout.is_empty() {
        return stdout;
    }
    "unknown git error".to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::process::Command as StdCommand;
    use tempfile::tempdir;

    fn git_available() -> bool {
        StdCommand::new("git")
            .arg("--version")
            .output()
            .map(|o| o.status.success())
            .unwrap_or(false)
    }

    fn git(cwd: &Path, args: &[&str]) -> String {
        let output = StdCommand::new("git")
            .args(["-c", "user.name=test", "-c", "user.email=test@example.org"])
            .args(args)
            .current_dir(cwd)
            .output()
            .expect("run git");
        assert!(output.status.success(), "git {:?} failed", args);
        String::from_utf8_lossy(&output.stdout).trim().to_string()
    }

    #[tokio::test]
    async fn checks_out_commit_and_finds_subfolder() {
        if !git_available() {
            return;
        }

        let temp = tempdir().expect("tempdir");
        let repo = temp.path().join("repo");
        std::fs::create_dir_all(repo.join("plugins/foo")).expect("mkdir");
        git(&repo, &["init", "-q"]);

        std::fs::write(repo.join("plugins/foo/Plugin.php"), "v1").expect("write v1");
        git(&repo, &["add", "."]);
        git(&repo, &["commit", "-q", "-m", "v1"]);
        let first = git(&repo, &["rev-parse", "HEAD"]);

        std::fs::write(repo.join("plugins/foo/Plugin.php"), "v2").expect("write v2");
        git(&repo, &["commit", "-q", "-am", "v2"]);

        let dest = temp.path().join("checkout");
        checkout("git", repo.to_str().expect("utf8"), &first, &dest)
            .await
            .expect("checkout");

        let root = plugin_root(&dest, "/plugins/foo/").expect("subfolder");
        assert_eq!(
            std::fs::read_to_string(root.join("Plugin.php")).expect("read"),
            "v1"
        );
    }

    #[tokio::test]
    async fn unknown_repository_fails() {
        if !git_available() {
            return;
        }

        let temp = tempdir().expect("tempdir");
        let missing = temp.path().join("no-such-repo");
        let result = checkout(
            "git",
            missing.to_str().expect("utf8"),
            "deadbeef",
            &temp.path().join("checkout"),
        )
        .await;
        assert!(result.is_err());
    }

    #[test]
    fn subfolder_must_stay_inside_checkout() {
        let temp = tempdir().expect("tempdir");
        std::fs::create_dir_all(temp.path().join("a")).expect("mkdir");

        assert_eq!(plugin_root(temp.path(), "").expect("root"), temp.path());
        assert!(plugin_root(temp.path(), "a").is_ok());
        assert!(plugin_root(temp.path(), "../a").is_err());
        assert!(plugin_root(temp.path(), "missing").is_err());
    }
}
