//! End-to-end import pipeline: archive or remote identifier in, merge
//! reports out.

use std::fs;
use std::path::Path;

use crate::archive::Archive;
use crate::cancel::CancelToken;
use crate::canonical;
use crate::config::ImportConfig;
use crate::detect;
use crate::easyeda::{self, EasyedaApi};
use crate::error::Result;
use crate::library::{LibraryLocks, MergeReport, Merger};
use crate::parsers;

/// Ties detection, parsing, normalization and merging together. Cheap to
/// clone; clones share the same per-library locks.
#[derive(Debug, Clone, Default)]
pub struct Importer {
    merger: Merger,
}

impl Importer {
    pub fn new() -> Importer {
        Importer::default()
    }

    pub fn with_locks(locks: LibraryLocks) -> Importer {
        Importer {
            merger: Merger::with_locks(locks),
        }
    }

    pub fn locks(&self) -> &LibraryLocks {
        self.merger.locks()
    }

    /// Import every part found in a vendor archive on disk.
    pub async fn import_archive_path(
        &self,
        path: &Path,
        config: &ImportConfig,
        cancel: &CancelToken,
    ) -> Result<Vec<MergeReport>> {
        let name = path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("archive.zip")
            .to_string();
        let bytes = fs::read(path)?;
        self.import_archive_bytes(name, bytes, config, cancel).await
    }

    /// Import every part found in an in-memory vendor archive.
    pub async fn import_archive_bytes(
        &self,
        name: impl Into<String>,
        bytes: Vec<u8>,
        config: &ImportConfig,
        cancel: &CancelToken,
    ) -> Result<Vec<MergeReport>> {
        cancel.check()?;
        let archive = Archive::from_bytes(name, bytes)?;
        let provider = detect::detect(&archive)?;
        log::info!("{}: detected {provider} archive", archive.name);

        let mut reports = Vec::new();
        for raw in parsers::parse(provider, &archive)? {
            let part = canonical::build(raw)?;
            reports.push(self.merger.merge(&part, config, cancel).await?);
        }
        Ok(reports)
    }

    /// Fetch one part from the EasyEDA service and merge it.
    pub async fn import_lcsc(
        &self,
        api: &EasyedaApi,
        lcsc_id: &str,
        config: &ImportConfig,
        cancel: &CancelToken,
    ) -> Result<MergeReport> {
        cancel.check()?;
        let raw = easyeda::fetch_part(api, lcsc_id).await?;
        let part = canonical::build(raw)?;
        self.merger.merge(&part, config, cancel).await
    }
}
