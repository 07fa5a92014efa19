//! Process-scoped working directory (spec §4.1, "crash recovery"): moves a
//! shared `saved/` store directory into a directory private to the current
//! process for the duration it's open, and moves it back on a clean close.
//!
//! Grounded on `Database::Implementation::create`/`~Implementation` and
//! `cleanupDiscardedDBsImpl` in
//! `examples/original_source/lib/Database/Database.cpp`: a directory left
//! behind under a dead process's pid, or explicitly suffixed `-dead`, is
//! leftover from a crash (or from two processes racing on the same pid) and
//! is safe to discard outright rather than trying to recover partial state
//! from it.

use std::path::{Path, PathBuf};

use nix::unistd::Pid;

const DEAD_SUFFIX: &str = "-dead";
const SAVED_DIR: &str = "saved";

/// Owns the process-private directory a store was opened from, and restores
/// it to the shared `saved/` location when dropped (mirrors the original's
/// "last process to close wins" semantics: an existing `saved/` from a racing
/// process is clobbered, not merged).
pub struct WorkDir {
    versioned_path: PathBuf,
    process_path: PathBuf,
    readonly: bool,
    restored: bool,
}

impl WorkDir {
    /// Claims the working directory for `versioned_path` (the directory for
    /// one on-disk format version). In read-write mode this renames any
    /// existing `saved/` directory into a process-private `p<pid>/`
    /// directory (creating an empty one if there wasn't a `saved/` to
    /// reclaim) after first evicting any stale directory already sitting at
    /// that pid (a prior process that reused this pid and crashed).
    pub fn claim(versioned_path: &Path, readonly: bool) -> std::io::Result<(Self, bool)> {
        std::fs::create_dir_all(versioned_path)?;
        let saved_path = versioned_path.join(SAVED_DIR);

        if readonly {
            return Ok((
                WorkDir {
                    versioned_path: versioned_path.to_path_buf(),
                    process_path: saved_path,
                    readonly: true,
                    restored: true,
                },
                true,
            ));
        }

        let pid = std::process::id();
        let process_path = versioned_path.join(format!("p{pid}"));

        if process_path.exists() {
            let _ = std::fs::rename(&process_path, dead_sibling(&process_path));
        }

        let existing = match std::fs::rename(&saved_path, &process_path) {
            Ok(()) => true,
            Err(_) => {
                std::fs::create_dir_all(&process_path)?;
                false
            }
        };

        Ok((
            WorkDir {
                versioned_path: versioned_path.to_path_buf(),
                process_path,
                readonly: false,
                restored: false,
            },
            existing,
        ))
    }

    pub fn path(&self) -> &Path {
        &self.process_path
    }

    /// Renames the process-private directory back to `saved/`, clobbering
    /// whatever another racing process may have already put there. Safe to
    /// call more than once; only the first call has an effect.
    pub fn restore(&mut self) {
        if self.restored || self.readonly {
            return;
        }
        self.restored = true;
        let saved_path = self.versioned_path.join(SAVED_DIR);
        if saved_path.exists() {
            let _ = std::fs::rename(&saved_path, dead_sibling(&saved_path));
        }
        let _ = std::fs::rename(&self.process_path, &saved_path);
    }

    /// Moves the already-claimed process directory aside under `corrupted/`
    /// (bumping any prior `corrupted/` to `-dead` first) and recreates an
    /// empty process directory in its place, so a fresh store can be opened
    /// without losing the failed one for inspection (spec §4.1 step 5, §7
    /// `StoreCorruption`). No-op in readonly mode, since a readonly open
    /// never claims a process directory to begin with.
    pub fn quarantine_and_recreate(&mut self) -> std::io::Result<PathBuf> {
        let corrupted_path = self.versioned_path.join("corrupted");
        if self.readonly {
            return Ok(corrupted_path);
        }
        if corrupted_path.exists() {
            let _ = std::fs::rename(&corrupted_path, dead_sibling(&corrupted_path));
        }
        std::fs::rename(&self.process_path, &corrupted_path)?;
        std::fs::create_dir_all(&self.process_path)?;
        Ok(corrupted_path)
    }
}

impl Drop for WorkDir {
    fn drop(&mut self) {
        self.restore();
    }
}

fn dead_sibling(path: &Path) -> PathBuf {
    let mut name = path.file_name().unwrap_or_default().to_os_string();
    name.push(DEAD_SUFFIX);
    path.with_file_name(name)
}

/// Removes every subdirectory of `versioned_path` that is either explicitly
/// `-dead`-suffixed or named `p<pid>` for a pid that is no longer running.
/// Best-effort: failures to remove an individual entry are swallowed, since
/// another process may be racing to clean up (or own) the same entry.
pub fn cleanup_discarded(versioned_path: &Path) {
    let current_pid = std::process::id();
    let Ok(entries) = std::fs::read_dir(versioned_path) else {
        return;
    };
    for entry in entries.flatten() {
        let path = entry.path();
        let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
            continue;
        };
        if should_remove(name, current_pid) {
            let _ = std::fs::remove_dir_all(&path);
        }
    }
}

fn should_remove(dir_name: &str, current_pid: u32) -> bool {
    if dir_name.ends_with(DEAD_SUFFIX) {
        return true;
    }
    let Some(pid_str) = dir_name.strip_prefix('p') else {
        return false;
    };
    let Ok(pid) = pid_str.parse::<u32>() else {
        return false;
    };
    if pid == current_pid {
        return false;
    }
    !is_process_alive(pid)
}

fn is_process_alive(pid: u32) -> bool {
    nix::sys::signal::kill(Pid::from_raw(pid as i32), None).is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dead_suffixed_directories_are_always_removed() {
        assert!(should_remove("p123-dead", std::process::id()));
    }

    #[test]
    fn own_pid_directory_is_never_removed() {
        let pid = std::process::id();
        assert!(!should_remove(&format!("p{pid}"), pid));
    }

    #[test]
    fn non_pid_directories_are_left_alone() {
        assert!(!should_remove("saved", std::process::id()));
        assert!(!should_remove("corrupted", std::process::id()));
    }

    #[test]
    fn claim_then_restore_round_trips_through_saved() {
        let tmp = tempfile::tempdir().unwrap();
        let versioned = tmp.path().join("v1");

        let (mut workdir, existing) = WorkDir::claim(&versioned, false).unwrap();
        assert!(!existing);
        std::fs::write(workdir.path().join("marker"), b"hi").unwrap();
        workdir.restore();

        assert!(versioned.join(SAVED_DIR).join("marker").exists());
    }

    #[test]
    fn quarantine_and_recreate_preserves_contents_under_corrupted() {
        let tmp = tempfile::tempdir().unwrap();
        let versioned = tmp.path().join("v1");

        let (mut workdir, _existing) = WorkDir::claim(&versioned, false).unwrap();
        std::fs::write(workdir.path().join("data.mdb"), b"garbage").unwrap();

        workdir.quarantine_and_recreate().unwrap();

        assert!(versioned.join("corrupted").join("data.mdb").exists());
        assert!(workdir.path().exists());
        assert!(std::fs::read_dir(workdir.path()).unwrap().next().is_none());
    }

    #[test]
    fn claim_reclaims_prior_saved_contents() {
        let tmp = tempfile::tempdir().unwrap();
        let versioned = tmp.path().join("v1");
        std::fs::create_dir_all(versioned.join(SAVED_DIR)).unwrap();
        std::fs::write(versioned.join(SAVED_DIR).join("marker"), b"hi").unwrap();

        let (workdir, existing) = WorkDir::claim(&versioned, false).unwrap();
        assert!(existing);
        assert!(workdir.path().join("marker").exists());
    }
}
