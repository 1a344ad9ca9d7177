//! Polling folder watcher feeding the import queue.
//!
//! Watches a download folder for freshly arrived vendor archives. Files
//! are reported once; a size window filters out partial downloads and
//! things that are clearly not component archives.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

use tokio::sync::mpsc;

use crate::cancel::CancelToken;
use crate::error::Result;

/// Anything smaller is a stub or an unfinished download.
const MIN_ARCHIVE_SIZE: u64 = 1024;
/// Anything larger is not a component archive.
const MAX_ARCHIVE_SIZE: u64 = 50 * 1024 * 1024;

pub struct FolderWatcher {
    dir: PathBuf,
    known: HashSet<PathBuf>,
}

impl FolderWatcher {
    /// Everything already in the folder counts as known: only archives
    /// arriving after the watcher starts are reported.
    pub fn new(dir: impl Into<PathBuf>) -> Result<FolderWatcher> {
        let dir = dir.into();
        let known = list_candidates(&dir)?.into_iter().collect();
        Ok(FolderWatcher { dir, known })
    }

    /// Archives that appeared since the previous poll, each reported
    /// exactly once.
    pub fn poll(&mut self) -> Result<Vec<PathBuf>> {
        let mut fresh = Vec::new();
        for path in list_candidates(&self.dir)? {
            if self.known.insert(path.clone()) {
                log::info!("new archive detected: {}", path.display());
                fresh.push(path);
            }
        }
        Ok(fresh)
    }
}

fn list_candidates(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut found = Vec::new();
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        let path = entry.path();
        if path.extension().and_then(|e| e.to_str()) != Some("zip") {
            continue;
        }
        let size = entry.metadata()?.len();
        if !(MIN_ARCHIVE_SIZE..=MAX_ARCHIVE_SIZE).contains(&size) {
            continue;
        }
        found.push(path);
    }
    Ok(found)
}

/// Poll `dir` until cancelled, sending each fresh archive to `tx`. Stops
/// cleanly when the receiving side goes away.
pub async fn watch(
    dir: impl Into<PathBuf>,
    interval: Duration,
    tx: mpsc::Sender<PathBuf>,
    cancel: CancelToken,
) -> Result<()> {
    let mut watcher = FolderWatcher::new(dir)?;
    loop {
        if cancel.is_cancelled() {
            return Ok(());
        }
        for path in watcher.poll()? {
            if tx.send(path).await.is_err() {
                return Ok(());
            }
        }
        tokio::time::sleep(interval).await;
    }
}
