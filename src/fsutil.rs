//! Staged filesystem transactions.
//!
//! A merge or migration touches several files (symbol library, footprint,
//! 3D asset, index sidecar) that must change as one logical unit. All
//! mutations are staged first, then committed in two phases: temp files
//! are written next to their targets, then every target is backed up and
//! replaced by rename. Any failure rolls the already-replaced targets
//! back, so consumers never observe a mixed old/new artifact set.

use std::fs;
use std::path::{Path, PathBuf};

use crate::error::{ImportError, Result};

const TMP_SUFFIX: &str = ".kimport-tmp";
const BAK_SUFFIX: &str = ".kimport-bak";

#[derive(Debug)]
enum Op {
    /// Write `bytes` to `path`, replacing any existing file.
    Write { path: PathBuf, bytes: Vec<u8> },
    /// Give `existing` a second name at `path` (hard link, copy fallback).
    Link { existing: PathBuf, path: PathBuf },
    /// Move `from` to `to` (used to park legacy sources after migration).
    Move { from: PathBuf, to: PathBuf },
    /// Delete `path` (used to retire an identity's superseded asset).
    Remove { path: PathBuf },
}

impl Op {
    fn target(&self) -> &Path {
        match self {
            Op::Write { path, .. } | Op::Link { path, .. } | Op::Remove { path } => path,
            Op::Move { to, .. } => to,
        }
    }
}

#[derive(Debug, Default)]
pub struct FsTransaction {
    ops: Vec<Op>,
}

impl FsTransaction {
    pub fn new() -> FsTransaction {
        FsTransaction::default()
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    pub fn stage_write(&mut self, path: impl Into<PathBuf>, bytes: Vec<u8>) {
        self.ops.push(Op::Write {
            path: path.into(),
            bytes,
        });
    }

    pub fn stage_link(&mut self, existing: impl Into<PathBuf>, path: impl Into<PathBuf>) {
        self.ops.push(Op::Link {
            existing: existing.into(),
            path: path.into(),
        });
    }

    pub fn stage_move(&mut self, from: impl Into<PathBuf>, to: impl Into<PathBuf>) {
        self.ops.push(Op::Move {
            from: from.into(),
            to: to.into(),
        });
    }

    pub fn stage_remove(&mut self, path: impl Into<PathBuf>) {
        self.ops.push(Op::Remove { path: path.into() });
    }

    /// Apply every staged operation or none of them.
    pub fn commit(self) -> Result<()> {
        let mut tmp_files: Vec<PathBuf> = Vec::new();

        // Phase 1: materialize all new content next to its target. Nothing
        // visible changes yet, so an error here needs no restore.
        let phase1 = (|| -> Result<()> {
            for op in &self.ops {
                if let Some(parent) = op.target().parent() {
                    fs::create_dir_all(parent)?;
                }
                if let Op::Write { path, bytes } = op {
                    let tmp = sibling(path, TMP_SUFFIX);
                    fs::write(&tmp, bytes)?;
                    tmp_files.push(tmp);
                }
            }
            Ok(())
        })();
        if let Err(e) = phase1 {
            cleanup(&tmp_files);
            return Err(e);
        }

        // Phase 2: swap targets into place, keeping backups for rollback.
        let mut replaced: Vec<(PathBuf, PathBuf)> = Vec::new(); // (bak, target)
        let mut placed: Vec<&Op> = Vec::new();
        let phase2 = (|| -> Result<()> {
            let mut tmp_iter = tmp_files.iter();
            for op in &self.ops {
                let target = op.target();
                if target.exists() {
                    let bak = sibling(target, BAK_SUFFIX);
                    fs::rename(target, &bak)?;
                    replaced.push((bak, target.to_path_buf()));
                }
                match op {
                    Op::Write { .. } => {
                        let tmp = tmp_iter.next().expect("tmp file per staged write");
                        fs::rename(tmp, target)?;
                    }
                    Op::Link { existing, path } => {
                        if fs::hard_link(existing, path).is_err() {
                            fs::copy(existing, path)?;
                        }
                    }
                    Op::Move { from, to } => {
                        fs::rename(from, to)?;
                    }
                    // The backup rename above already took the file away.
                    Op::Remove { .. } => {}
                }
                placed.push(op);
            }
            Ok(())
        })();

        if let Err(e) = phase2 {
            // Undo in reverse order, then restore backups.
            for op in placed.into_iter().rev() {
                match op {
                    Op::Write { path, .. } | Op::Link { path, .. } => {
                        let _ = fs::remove_file(path);
                    }
                    Op::Move { from, to } => {
                        let _ = fs::rename(to, from);
                    }
                    // Restored through its backup below.
                    Op::Remove { .. } => {}
                }
            }
            for (bak, target) in replaced.into_iter().rev() {
                if let Err(restore_err) = fs::rename(&bak, &target) {
                    log::error!(
                        "rollback could not restore {}: {restore_err}",
                        target.display()
                    );
                }
            }
            cleanup(&tmp_files);
            return Err(ImportError::Storage(match e {
                ImportError::Storage(io) => io,
                other => std::io::Error::other(other.to_string()),
            }));
        }

        for (bak, _) in replaced {
            let _ = fs::remove_file(bak);
        }
        Ok(())
    }
}

fn sibling(path: &Path, suffix: &str) -> PathBuf {
    let mut name = path.file_name().unwrap_or_default().to_os_string();
    name.push(suffix);
    path.with_file_name(name)
}

fn cleanup(tmp_files: &[PathBuf]) {
    for tmp in tmp_files {
        let _ = fs::remove_file(tmp);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn commits_writes_links_and_moves_together() {
        let dir = TempDir::new().unwrap();
        let a = dir.path().join("a.txt");
        let b = dir.path().join("sub/b.txt");
        let moved = dir.path().join("moved.txt");
        fs::write(dir.path().join("orig.txt"), b"legacy").unwrap();

        let mut txn = FsTransaction::new();
        txn.stage_write(&a, b"alpha".to_vec());
        txn.stage_write(&b, b"beta".to_vec());
        txn.stage_link(&a, dir.path().join("a-alias.txt"));
        txn.stage_move(dir.path().join("orig.txt"), &moved);
        txn.commit().unwrap();

        assert_eq!(fs::read(&a).unwrap(), b"alpha");
        assert_eq!(fs::read(&b).unwrap(), b"beta");
        assert_eq!(fs::read(dir.path().join("a-alias.txt")).unwrap(), b"alpha");
        assert_eq!(fs::read(&moved).unwrap(), b"legacy");
        assert!(!dir.path().join("orig.txt").exists());
    }

    #[test]
    fn commit_applies_staged_removals() {
        let dir = TempDir::new().unwrap();
        let retired = dir.path().join("old.step");
        fs::write(&retired, b"superseded").unwrap();

        let mut txn = FsTransaction::new();
        txn.stage_remove(&retired);
        txn.commit().unwrap();

        assert!(!retired.exists());
        assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[test]
    fn replaces_existing_files_and_drops_backups() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("lib.kicad_sym");
        fs::write(&path, b"old").unwrap();

        let mut txn = FsTransaction::new();
        txn.stage_write(&path, b"new".to_vec());
        txn.commit().unwrap();

        assert_eq!(fs::read(&path).unwrap(), b"new");
        assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 1);
    }

    #[cfg(unix)]
    #[test]
    fn failed_commit_leaves_originals_byte_identical() {
        use std::os::unix::fs::PermissionsExt;

        let dir = TempDir::new().unwrap();
        let ok_file = dir.path().join("lib.kicad_sym");
        fs::write(&ok_file, b"previous triplet").unwrap();
        let retired = dir.path().join("old.step");
        fs::write(&retired, b"superseded").unwrap();

        let locked = dir.path().join("locked");
        fs::create_dir(&locked).unwrap();
        fs::set_permissions(&locked, fs::Permissions::from_mode(0o555)).unwrap();

        let mut txn = FsTransaction::new();
        txn.stage_write(&ok_file, b"replacement".to_vec());
        txn.stage_remove(&retired);
        txn.stage_write(locked.join("asset.step"), b"mesh".to_vec());
        let err = txn.commit().unwrap_err();
        assert!(matches!(err, ImportError::Storage(_)));

        assert_eq!(fs::read(&ok_file).unwrap(), b"previous triplet");
        assert_eq!(fs::read(&retired).unwrap(), b"superseded");
        fs::set_permissions(&locked, fs::Permissions::from_mode(0o755)).unwrap();
        assert_eq!(fs::read_dir(&locked).unwrap().count(), 0);
    }
}
