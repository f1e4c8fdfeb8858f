//! The version-control commit helper: shells out to `git` the
//! same way lifecycle scripts are shelled out to elsewhere in this codebase.
//! No `git2` dependency needed for `add -A` / `commit` / `rev-parse`.

use crate::error::MigrateError;
use std::path::Path;
use std::process::Command;

/// Stages everything and commits with `--no-verify`, returning the new
/// commit sha. A failure here is logged and does not abort the run.
pub fn commit(root: &Path, message: &str) -> Result<String, MigrateError> {
    run_git(root, &["add", "-A"]).map_err(|e| MigrateError::CommitFailure(e))?;
    run_git(root, &["commit", "--no-verify", "-m", message]).map_err(MigrateError::CommitFailure)?;
    let sha = run_git(root, &["rev-parse", "HEAD"]).map_err(MigrateError::CommitFailure)?;
    Ok(sha.trim().to_string())
}

fn run_git(root: &Path, args: &[&str]) -> Result<String, String> {
    let output = Command::new("git")
        .args(args)
        .current_dir(root)
        .output()
        .map_err(|e| format!("failed to run git {}: {e}", args.join(" ")))?;

    if !output.status.success() {
        return Err(format!(
            "git {} failed: {}",
            args.join(" "),
            String::from_utf8_lossy(&output.stderr).trim()
        ));
    }

    Ok(String::from_utf8_lossy(&output.stdout).to_string())
}
