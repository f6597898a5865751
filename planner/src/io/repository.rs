//! Repository collaborator: checkout setup and guaranteed cleanup.
//!
//! Every run acquires exactly one checkout through [`RepoGuard`], which
//! releases it on drop so failure paths clean up as well.

use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::LazyLock;
use std::time::Duration;

use anyhow::{Context, Result};
use regex::Regex;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use crate::io::process::run_bounded;

/// A checked-out repository for one run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepoCheckout {
    pub clone_path: PathBuf,
    pub repo_url: String,
    pub repo_owner: String,
    pub repo_name: String,
    pub fork_url: Option<String>,
    pub fork_owner: Option<String>,
}

/// Fatal setup error: missing credentials, bad URL, or clone failure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SetupFailure {
    pub reason: String,
}

impl fmt::Display for SetupFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "repository setup failed: {}", self.reason)
    }
}

impl std::error::Error for SetupFailure {}

fn setup_failure(reason: impl Into<String>) -> anyhow::Error {
    anyhow::Error::new(SetupFailure {
        reason: reason.into(),
    })
}

pub trait Repository {
    /// Prepare a checkout of `url` (or of `fork_url` when given).
    fn setup(&self, url: &str, fork_url: Option<&str>) -> Result<RepoCheckout>;
    fn cleanup(&self, checkout: &RepoCheckout) -> Result<()>;
}

/// Owns a checkout and hands it back to its repository on drop.
pub struct RepoGuard<'a, R: Repository> {
    repo: &'a R,
    checkout: RepoCheckout,
}

impl<'a, R: Repository> RepoGuard<'a, R> {
    pub fn acquire(repo: &'a R, url: &str, fork_url: Option<&str>) -> Result<Self> {
        let checkout = repo.setup(url, fork_url)?;
        info!(path = %checkout.clone_path.display(), "repository ready");
        Ok(Self { repo, checkout })
    }

    pub fn checkout(&self) -> &RepoCheckout {
        &self.checkout
    }
}

impl<R: Repository> Drop for RepoGuard<'_, R> {
    fn drop(&mut self) {
        if let Err(err) = self.repo.cleanup(&self.checkout) {
            warn!(
                path = %self.checkout.clone_path.display(),
                err = %format!("{err:#}"),
                "repository cleanup failed"
            );
        }
    }
}

/// Remove whatever a failed clone left behind. Returns false when the
/// directory is still there.
fn remove_partial_clone(path: &Path) -> bool {
    if !path.exists() {
        return true;
    }
    match fs::remove_dir_all(path) {
        Ok(()) => true,
        Err(err) => {
            warn!(path = %path.display(), err = %err, "failed to remove partial clone");
            false
        }
    }
}

/// Split a GitHub URL into `(owner, name)`.
///
/// Accepts `https://github.com/o/n`, `https://github.com/o/n.git` and `git@github.com:o/n.git`.
pub fn parse_github_url(url: &str) -> Option<(String, String)> {
    static GITHUB_RE: LazyLock<Regex> = LazyLock::new(|| {
        Regex::new(
            r"^(?:https?://(?:www\.)?github\.com/|git@github\.com:)([A-Za-z0-9_.-]+)/([A-Za-z0-9_.-]+?)(?:\.git)?/?$",
        )
        .expect("github url regex should be valid")
    });
    let caps = GITHUB_RE.captures(url.trim())?;
    Some((caps[1].to_string(), caps[2].to_string()))
}

/// Shallow `git clone` into a fresh temporary directory.
#[derive(Debug, Clone)]
pub struct GitRepository {
    pub required_env: Vec<String>,
    pub timeout: Duration,
    pub clone_root: PathBuf,
}

impl GitRepository {
    pub fn new(required_env: Vec<String>, timeout: Duration) -> Self {
        Self {
            required_env,
            timeout,
            clone_root: std::env::temp_dir(),
        }
    }

    fn check_env(&self) -> Result<()> {
        let missing: Vec<&str> = self
            .required_env
            .iter()
            .filter(|name| std::env::var(name.as_str()).map_or(true, |v| v.trim().is_empty()))
            .map(String::as_str)
            .collect();
        if !missing.is_empty() {
            return Err(setup_failure(format!(
                "missing environment variables: {}",
                missing.join(", ")
            )));
        }
        Ok(())
    }
}

impl Repository for GitRepository {
    #[instrument(skip_all, fields(url = %url))]
    fn setup(&self, url: &str, fork_url: Option<&str>) -> Result<RepoCheckout> {
        self.check_env()?;
        let (repo_owner, repo_name) =
            parse_github_url(url).ok_or_else(|| setup_failure(format!("unsupported url {url}")))?;
        let fork_owner = match fork_url {
            Some(fork) => Some(
                parse_github_url(fork)
                    .map(|(owner, _)| owner)
                    .ok_or_else(|| setup_failure(format!("unsupported fork url {fork}")))?,
            ),
            None => None,
        };

        let clone_path = self
            .clone_root
            .join(format!("planner-{}", Uuid::new_v4().simple()));
        let source = fork_url.unwrap_or(url);
        let mut cmd = Command::new("git");
        cmd.arg("clone")
            .arg("--depth")
            .arg("1")
            .arg(source)
            .arg(&clone_path);
        debug!(source, path = %clone_path.display(), "cloning");
        let output = run_bounded(cmd, None, self.timeout, 64 * 1024).context("run git clone")?;
        if !output.succeeded() {
            remove_partial_clone(&clone_path);
            return Err(setup_failure(format!(
                "git clone {source} failed\n{}",
                output.render("git")
            )));
        }

        Ok(RepoCheckout {
            clone_path,
            repo_url: url.to_string(),
            repo_owner,
            repo_name,
            fork_url: fork_url.map(str::to_string),
            fork_owner,
        })
    }

    #[instrument(skip_all, fields(path = %checkout.clone_path.display()))]
    fn cleanup(&self, checkout: &RepoCheckout) -> Result<()> {
        if checkout.clone_path.exists() {
            fs::remove_dir_all(&checkout.clone_path)
                .with_context(|| format!("remove {}", checkout.clone_path.display()))?;
        }
        debug!("checkout removed");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    #[test]
    fn parses_common_github_url_forms() {
        let expected = Some(("acme".to_string(), "widgets".to_string()));
        assert_eq!(parse_github_url("https://github.com/acme/widgets"), expected);
        assert_eq!(parse_github_url("https://github.com/acme/widgets.git"), expected);
        assert_eq!(parse_github_url("git@github.com:acme/widgets.git"), expected);
        assert_eq!(parse_github_url("https://gitlab.com/acme/widgets"), None);
        assert_eq!(parse_github_url("https://github.com/acme"), None);
    }

    #[test]
    fn partial_clone_removal_reports_leftovers() {
        let temp = tempfile::tempdir().expect("tempdir");
        let clone = temp.path().join("planner-partial");
        fs::create_dir_all(clone.join(".git")).expect("mkdir");

        assert!(remove_partial_clone(&clone));
        assert!(!clone.exists());
        assert!(remove_partial_clone(&clone));

        let not_a_dir = temp.path().join("planner-file");
        fs::write(&not_a_dir, "x").expect("write");
        assert!(!remove_partial_clone(&not_a_dir));
    }

    #[test]
    fn missing_env_is_a_setup_failure() {
        let repo = GitRepository::new(
            vec!["PLANNER_TEST_SURELY_UNSET_VARIABLE".to_string()],
            Duration::from_secs(5),
        );

        let err = repo
            .setup("https://github.com/acme/widgets", None)
            .expect_err("env missing");

        let failure = err.downcast_ref::<SetupFailure>().expect("setup failure");
        assert!(failure.reason.contains("PLANNER_TEST_SURELY_UNSET_VARIABLE"));
    }

    #[test]
    fn bad_url_is_a_setup_failure() {
        let repo = GitRepository::new(Vec::new(), Duration::from_secs(5));

        let err = repo.setup("not a url", None).expect_err("bad url");
        assert!(err.downcast_ref::<SetupFailure>().is_some());
    }

    struct CountingRepo {
        cleanups: Cell<u32>,
    }

    impl Repository for CountingRepo {
        fn setup(&self, url: &str, _fork_url: Option<&str>) -> Result<RepoCheckout> {
            Ok(RepoCheckout {
                clone_path: PathBuf::from("/nonexistent"),
                repo_url: url.to_string(),
                repo_owner: "o".to_string(),
                repo_name: "n".to_string(),
                fork_url: None,
                fork_owner: None,
            })
        }

        fn cleanup(&self, _checkout: &RepoCheckout) -> Result<()> {
            self.cleanups.set(self.cleanups.get() + 1);
            anyhow::bail!("cleanup errors are logged, not raised")
        }
    }

    #[test]
    fn guard_cleans_up_once_on_drop() {
        let repo = CountingRepo {
            cleanups: Cell::new(0),
        };
        {
            let guard = RepoGuard::acquire(&repo, "https://github.com/o/n", None).expect("acquire");
            assert_eq!(guard.checkout().repo_name, "n");
        }
        assert_eq!(repo.cleanups.get(), 1);
    }
}
