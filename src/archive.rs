//! Read-only view of a vendor zip archive.
//!
//! Archives are small (a few MB at most), so the whole payload is held in
//! memory and entries are re-read by name on demand. Detection and the
//! parsers only ever see this view, never the file system, which keeps
//! them pure functions of the archive contents.

use std::io::{Cursor, Read};

use zip::ZipArchive;

use crate::error::{ImportError, Result};

#[derive(Debug)]
pub struct Archive {
    /// Display name for error context (the spool file name, not used for
    /// detection).
    pub name: String,
    raw: Vec<u8>,
    entries: Vec<String>,
}

impl Archive {
    pub fn from_bytes(name: impl Into<String>, bytes: Vec<u8>) -> Result<Archive> {
        let name = name.into();
        let mut zip = ZipArchive::new(Cursor::new(&bytes)).map_err(|e| {
            ImportError::corrupt(&name, format!("not a valid zip archive: {e}"))
        })?;
        let mut entries = Vec::with_capacity(zip.len());
        for i in 0..zip.len() {
            let entry = zip.by_index(i)?;
            entries.push(entry.name().to_string());
        }
        Ok(Archive {
            name,
            raw: bytes,
            entries,
        })
    }

    pub fn entry_names(&self) -> &[String] {
        &self.entries
    }

    /// First entry whose path ends with `suffix`, in archive order.
    pub fn find_by_suffix(&self, suffix: &str) -> Option<&str> {
        self.entries
            .iter()
            .map(String::as_str)
            .find(|n| !n.ends_with('/') && n.ends_with(suffix))
    }

    /// All file entries below a directory whose name matches `dir` exactly
    /// (any nesting level), e.g. every file under a `KiCad/` folder.
    pub fn files_under_dir<'a>(&'a self, dir: &'a str) -> impl Iterator<Item = &'a str> {
        let needle = format!("{dir}/");
        self.entries
            .iter()
            .map(String::as_str)
            .filter(move |n| {
                !n.ends_with('/')
                    && (n.starts_with(&needle) || n.contains(&format!("/{needle}")))
            })
    }

    pub fn read_bytes(&self, entry: &str) -> Result<Vec<u8>> {
        let mut zip = ZipArchive::new(Cursor::new(&self.raw))?;
        let mut file = zip.by_name(entry).map_err(|e| {
            ImportError::corrupt(&self.name, format!("missing entry {entry}: {e}"))
        })?;
        let mut buf = Vec::with_capacity(file.size() as usize);
        file.read_to_end(&mut buf)?;
        Ok(buf)
    }

    /// Read an entry as text with encoding normalization: lossy UTF-8,
    /// BOM stripped, CRLF folded to LF.
    pub fn read_text(&self, entry: &str) -> Result<String> {
        let bytes = self.read_bytes(entry)?;
        Ok(normalize_text(&bytes))
    }
}

pub fn normalize_text(bytes: &[u8]) -> String {
    let text = String::from_utf8_lossy(bytes);
    let text = text.strip_prefix('\u{feff}').unwrap_or(&text);
    text.replace("\r\n", "\n")
}
