//! VCS adapter - the only component that touches version control.
//!
//! Local operations go through libgit2; the pull-request recording shells out
//! to the external `gh` tool from inside the adapter, so agents themselves
//! never spawn a VCS process. All agents share one working branch; the
//! supervisor checks `current_branch` against the configured branch before
//! any launch.

use anyhow::{Context, Result};
use git2::{Repository, Signature, StatusOptions};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Bounded retries when a commit leaves the tree dirty again (e.g. a hook or
/// formatter rewrote files between add and commit).
const COMMIT_RETRIES: u32 = 3;

#[derive(Debug, thiserror::Error)]
pub enum VcsError {
    #[error("current branch is '{current}', expected working branch '{expected}'")]
    WrongBranch { current: String, expected: String },
    #[error("pull of '{branch}' cannot fast-forward")]
    Conflict { branch: String },
    #[error("pull request recording is disabled by configuration")]
    PrDisabled,
    #[error(transparent)]
    Git(#[from] git2::Error),
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub struct Vcs {
    repo_path: PathBuf,
    pr_enabled: bool,
}

impl Vcs {
    pub fn new(repo_path: impl Into<PathBuf>, pr_enabled: bool) -> Self {
        Self {
            repo_path: repo_path.into(),
            pr_enabled,
        }
    }

    fn open(&self) -> Result<Repository, VcsError> {
        Ok(Repository::discover(&self.repo_path)?)
    }

    pub fn current_branch(&self) -> Result<String, VcsError> {
        let repo = self.open()?;
        let result = match repo.head() {
            Ok(head) if head.is_branch() => {
                Ok(head.shorthand().unwrap_or("HEAD").to_string())
            }
            Ok(head) => {
                // Detached HEAD - show short SHA
                let oid = head.peel_to_commit()?.id();
                Ok(format!("{:.7}", oid))
            }
            Err(e) if e.code() == git2::ErrorCode::UnbornBranch => {
                // Fresh repository: HEAD is a symbolic ref to an unborn branch.
                let head = repo.find_reference("HEAD")?;
                let target = head.symbolic_target().unwrap_or("HEAD");
                Ok(target.trim_start_matches("refs/heads/").to_string())
            }
            Err(e) => Err(e.into()),
        };
        result
    }

    /// Assert the working-branch invariant. Every agent shares one branch;
    /// a mismatch is fatal for the caller.
    pub fn ensure_branch(&self, expected: &str) -> Result<(), VcsError> {
        let current = self.current_branch()?;
        if current != expected {
            return Err(VcsError::WrongBranch {
                current,
                expected: expected.to_string(),
            });
        }
        Ok(())
    }

    /// Fetch `branch` from origin and fast-forward the local ref to it.
    /// A diverged history is a [`VcsError::Conflict`]; merge resolution is
    /// out of the adapter's contract. A repository with no `origin` remote
    /// (local-only deployments, tests) is a no-op.
    pub fn pull(&self, branch: &str) -> Result<(), VcsError> {
        let repo = self.open()?;
        let mut remote = match repo.find_remote("origin") {
            Ok(r) => r,
            Err(_) => {
                debug!(branch, "no origin remote - skipping pull");
                return Ok(());
            }
        };

        remote
            .fetch(&[branch], None, None)
            .context("fetch from origin")?;

        let fetch_head = repo
            .find_reference(&format!("refs/remotes/origin/{branch}"))?
            .peel_to_commit()?;
        let annotated = repo.find_annotated_commit(fetch_head.id())?;
        let (analysis, _) = repo.merge_analysis(&[&annotated])?;

        if analysis.is_up_to_date() {
            return Ok(());
        }
        if !analysis.is_fast_forward() {
            return Err(VcsError::Conflict {
                branch: branch.to_string(),
            });
        }

        let refname = format!("refs/heads/{branch}");
        let mut reference = repo.find_reference(&refname)?;
        reference.set_target(fetch_head.id(), "fast-forward pull")?;
        repo.set_head(&refname)?;
        repo.checkout_head(Some(git2::build::CheckoutBuilder::default().force()))?;
        info!(branch, target = %fetch_head.id(), "fast-forwarded");
        Ok(())
    }

    /// True when neither the index nor the working tree has changes
    /// (untracked files count as dirty).
    pub fn is_clean(&self) -> Result<bool, VcsError> {
        let repo = self.open()?;
        let mut opts = StatusOptions::new();
        opts.include_untracked(true).include_ignored(false);
        let statuses = repo.statuses(Some(&mut opts))?;
        Ok(statuses.is_empty())
    }

    /// Paths with index or working-tree changes, untracked files included.
    /// Used to check an edit set against a work unit's file capability.
    pub fn changed_files(&self) -> Result<Vec<String>, VcsError> {
        let repo = self.open()?;
        let mut opts = StatusOptions::new();
        opts.include_untracked(true)
            .include_ignored(false)
            .recurse_untracked_dirs(true);
        let statuses = repo.statuses(Some(&mut opts))?;
        Ok(statuses
            .iter()
            .filter_map(|e| e.path().map(str::to_string))
            .collect())
    }

    /// Stage everything and commit. If the tree is dirty again right after
    /// the commit (files rewritten underneath us), the add+commit is retried
    /// a bounded number of times. Returns the final commit SHA.
    pub fn commit(&self, message: &str, add_all: bool) -> Result<String, VcsError> {
        let mut sha = self.commit_once(message, add_all)?;
        for attempt in 1..=COMMIT_RETRIES {
            if self.is_clean()? {
                return Ok(sha);
            }
            warn!(attempt, "tree dirty after commit - retrying with rewritten files");
            sha = self.commit_once(message, true)?;
        }
        Ok(sha)
    }

    fn commit_once(&self, message: &str, add_all: bool) -> Result<String, VcsError> {
        let repo = self.open()?;
        let mut index = repo.index()?;
        if add_all {
            index.add_all(["*"], git2::IndexAddOption::DEFAULT, None)?;
        }
        index.write()?;
        let tree_id = index.write_tree()?;
        let tree = repo.find_tree(tree_id)?;

        let sig = repo
            .signature()
            .or_else(|_| Signature::now("crewd", "crewd@localhost"))?;

        let parent = match repo.head() {
            Ok(head) => Some(head.peel_to_commit()?),
            Err(e) if e.code() == git2::ErrorCode::UnbornBranch => None,
            Err(e) => return Err(e.into()),
        };
        let parents: Vec<&git2::Commit> = parent.iter().collect();

        let oid = repo.commit(Some("HEAD"), &sig, &sig, message, &tree, &parents)?;
        Ok(oid.to_string())
    }

    pub fn branch_create(&self, name: &str) -> Result<(), VcsError> {
        let repo = self.open()?;
        let head = repo.head()?.peel_to_commit()?;
        repo.branch(name, &head, false)?;
        Ok(())
    }

    pub fn checkout(&self, name: &str) -> Result<(), VcsError> {
        let repo = self.open()?;
        let refname = format!("refs/heads/{name}");
        let obj = repo.revparse_single(&refname)?;
        repo.checkout_tree(&obj, None)?;
        repo.set_head(&refname)?;
        Ok(())
    }

    /// Record a pull request via the external `gh` tool. Returns the PR URL.
    pub fn record_pr(&self, title: &str, body: &str, base: &str) -> Result<String, VcsError> {
        if !self.pr_enabled {
            return Err(VcsError::PrDisabled);
        }
        let output = std::process::Command::new("gh")
            .args(["pr", "create", "--title", title, "--body", body, "--base", base])
            .current_dir(&self.repo_path)
            .output()
            .context("spawn gh")?;
        if !output.status.success() {
            return Err(anyhow::anyhow!(
                "gh pr create failed: {}",
                String::from_utf8_lossy(&output.stderr).trim()
            )
            .into());
        }
        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }
}

/// Initialize a repository with an empty first commit on `branch`.
/// Used by tests and `crewd init` on fresh checkouts.
pub fn init_repo(path: &Path, branch: &str) -> Result<Repository> {
    let mut opts = git2::RepositoryInitOptions::new();
    opts.initial_head(branch);
    let repo = Repository::init_opts(path, &opts)?;
    {
        let sig = Signature::now("crewd", "crewd@localhost")?;
        let tree_id = repo.index()?.write_tree()?;
        let tree = repo.find_tree(tree_id)?;
        repo.commit(Some("HEAD"), &sig, &sig, "init", &tree, &[])?;
    }
    Ok(repo)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn repo() -> (tempfile::TempDir, Vcs) {
        let dir = tempfile::tempdir().unwrap();
        init_repo(dir.path(), "roadmap").unwrap();
        let vcs = Vcs::new(dir.path(), false);
        (dir, vcs)
    }

    #[test]
    fn branch_and_cleanliness() {
        let (dir, vcs) = repo();
        assert_eq!(vcs.current_branch().unwrap(), "roadmap");
        assert!(vcs.is_clean().unwrap());

        std::fs::write(dir.path().join("a.md"), "hello").unwrap();
        assert!(!vcs.is_clean().unwrap());
    }

    #[test]
    fn ensure_branch_rejects_mismatch() {
        let (_dir, vcs) = repo();
        assert!(vcs.ensure_branch("roadmap").is_ok());
        let err = vcs.ensure_branch("main").unwrap_err();
        assert!(matches!(err, VcsError::WrongBranch { .. }));
    }

    #[test]
    fn commit_stages_and_cleans() {
        let (dir, vcs) = repo();
        std::fs::write(dir.path().join("a.md"), "hello").unwrap();

        let sha = vcs.commit("feat: add a.md", true).unwrap();
        assert_eq!(sha.len(), 40);
        assert!(vcs.is_clean().unwrap());
    }

    #[test]
    fn branch_create_and_checkout() {
        let (_dir, vcs) = repo();
        vcs.branch_create("feature").unwrap();
        vcs.checkout("feature").unwrap();
        assert_eq!(vcs.current_branch().unwrap(), "feature");
    }

    #[test]
    fn pull_without_remote_is_noop() {
        let (_dir, vcs) = repo();
        vcs.pull("roadmap").unwrap();
    }

    #[test]
    fn record_pr_disabled() {
        let (_dir, vcs) = repo();
        assert!(matches!(
            vcs.record_pr("t", "b", "main").unwrap_err(),
            VcsError::PrDisabled
        ));
    }
}
