//! Best-effort git provenance for ledger rows.

use std::process::Command;

/// Current commit hash and whether the working tree is dirty. Returns
/// `None`s when git is unavailable or the cwd is not a repository; a
/// deployment never fails over missing provenance.
pub fn provenance() -> (Option<String>, Option<bool>) {
    let commit = Command::new("git")
        .args(["rev-parse", "HEAD"])
        .output()
        .ok()
        .filter(|out| out.status.success())
        .and_then(|out| String::from_utf8(out.stdout).ok())
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty());

    if commit.is_none() {
        return (None, None);
    }

    let dirty = Command::new("git")
        .args(["status", "--porcelain"])
        .output()
        .ok()
        .filter(|out| out.status.success())
        .map(|out| !out.stdout.is_empty());

    (commit, dirty)
}
