//! Vendor format detection.
//!
//! Providers ship structurally different zips: Octopart bundles
//! `device.lib`/`device.dcm`, Samacsys nests everything under a `KiCad/`
//! folder, UltraLibrarian under `KiCAD/`, and Snapeda drops the library
//! files at the archive root. Detection walks a prioritized fingerprint
//! list and the first match wins. The archive's own file name is never
//! consulted because users rename downloads.

use crate::archive::Archive;
use crate::error::{ImportError, Result};

/// Closed set of supported component sources. `EasyEda` parts arrive via
/// the remote fetcher, never as a zip archive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Provider {
    Octopart,
    Samacsys,
    UltraLibrarian,
    Snapeda,
    EasyEda,
}

impl Provider {
    /// Name of the target library this provider's parts merge into.
    pub fn lib_name(&self) -> &'static str {
        match self {
            Provider::Octopart => "Octopart",
            Provider::Samacsys => "Samacsys",
            Provider::UltraLibrarian => "UltraLibrarian",
            Provider::Snapeda => "Snapeda",
            Provider::EasyEda => "EasyEDA",
        }
    }

    pub fn all() -> &'static [Provider] {
        &[
            Provider::Octopart,
            Provider::Samacsys,
            Provider::UltraLibrarian,
            Provider::Snapeda,
            Provider::EasyEda,
        ]
    }
}

impl std::fmt::Display for Provider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.lib_name())
    }
}

/// Content markers of the two symbol library generations. Guards against
/// archives that carry the right extension with unrelated content.
fn looks_like_symbol_lib(text: &str) -> bool {
    let head: String = text.chars().take(512).collect();
    head.contains("EESchema-LIBRARY") || head.contains("(kicad_symbol_lib")
}

fn has_symbol_lib(archive: &Archive, candidate: &str) -> bool {
    archive
        .read_text(candidate)
        .map(|text| looks_like_symbol_lib(&text))
        .unwrap_or(false)
}

fn symbol_lib_in_dir(archive: &Archive, dir: &str) -> Option<String> {
    archive
        .files_under_dir(dir)
        .find(|n| n.ends_with(".lib") || n.ends_with(".kicad_sym"))
        .map(str::to_string)
}

/// Classify an archive as one of the known providers.
///
/// Pure function of the archive contents; returns `UnrecognizedFormat`
/// when no fingerprint matches, in which case the caller must not write
/// anything.
pub fn detect(archive: &Archive) -> Result<Provider> {
    // Octopart: fixed device.lib/device.dcm pair.
    if archive.find_by_suffix("device.lib").is_some()
        && archive.find_by_suffix("device.dcm").is_some()
    {
        log::debug!("{}: identified as Octopart", archive.name);
        return Ok(Provider::Octopart);
    }

    // Samacsys: a KiCad/ folder holding the library files.
    if let Some(lib) = symbol_lib_in_dir(archive, "KiCad") {
        if has_symbol_lib(archive, &lib) {
            log::debug!("{}: identified as Samacsys", archive.name);
            return Ok(Provider::Samacsys);
        }
    }

    // UltraLibrarian: same layout but the folder is spelled KiCAD/.
    if let Some(lib) = symbol_lib_in_dir(archive, "KiCAD") {
        if has_symbol_lib(archive, &lib) {
            log::debug!("{}: identified as UltraLibrarian", archive.name);
            return Ok(Provider::UltraLibrarian);
        }
    }

    // Snapeda: library files anywhere in the archive, typically at root.
    let candidate = archive
        .find_by_suffix(".kicad_sym")
        .or_else(|| archive.find_by_suffix(".lib"))
        .map(str::to_string);
    if let Some(lib) = candidate {
        if has_symbol_lib(archive, &lib) {
            log::debug!("{}: identified as Snapeda", archive.name);
            return Ok(Provider::Snapeda);
        }
    }

    Err(ImportError::UnrecognizedFormat {
        archive: archive.name.clone(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{Cursor, Write};
    use zip::write::SimpleFileOptions;

    fn build_zip(entries: &[(&str, &str)]) -> Archive {
        let mut buf = Cursor::new(Vec::new());
        let mut zip = zip::ZipWriter::new(&mut buf);
        for (name, content) in entries {
            zip.start_file(*name, SimpleFileOptions::default()).unwrap();
            zip.write_all(content.as_bytes()).unwrap();
        }
        zip.finish().unwrap();
        Archive::from_bytes("test.zip", buf.into_inner()).unwrap()
    }

    const LEGACY_LIB: &str = "EESchema-LIBRARY Version 2.4\nDEF X U 0 40 Y Y 1 F N\nENDDEF\n";
    const CURRENT_LIB: &str = "(kicad_symbol_lib (version 20211014))";

    #[test]
    fn detects_octopart() {
        let archive = build_zip(&[
            ("device.lib", LEGACY_LIB),
            ("device.dcm", "$CMP X\n$ENDCMP\n"),
            ("device.pretty/X.kicad_mod", "(footprint \"X\")"),
        ]);
        assert_eq!(detect(&archive).unwrap(), Provider::Octopart);
    }

    #[test]
    fn detects_samacsys() {
        let archive = build_zip(&[
            ("LM358/KiCad/LM358.lib", LEGACY_LIB),
            ("LM358/KiCad/LM358.kicad_mod", "(footprint \"SOIC8\")"),
        ]);
        assert_eq!(detect(&archive).unwrap(), Provider::Samacsys);
    }

    #[test]
    fn detects_ultralibrarian() {
        let archive = build_zip(&[(
            "UL/KiCAD/part.kicad_sym",
            CURRENT_LIB,
        )]);
        assert_eq!(detect(&archive).unwrap(), Provider::UltraLibrarian);
    }

    #[test]
    fn detects_snapeda_at_root() {
        let archive = build_zip(&[
            ("PN123.kicad_sym", CURRENT_LIB),
            ("PN123.kicad_mod", "(footprint \"PN123\")"),
        ]);
        assert_eq!(detect(&archive).unwrap(), Provider::Snapeda);
    }

    #[test]
    fn octopart_wins_over_snapeda_fingerprint() {
        // device.lib also matches the Snapeda .lib rule; priority decides.
        let archive = build_zip(&[
            ("device.lib", LEGACY_LIB),
            ("device.dcm", "$CMP X\n$ENDCMP\n"),
        ]);
        assert_eq!(detect(&archive).unwrap(), Provider::Octopart);
    }

    #[test]
    fn unrelated_archive_is_unrecognized() {
        let archive = build_zip(&[("readme.txt", "hello")]);
        assert!(matches!(
            detect(&archive),
            Err(ImportError::UnrecognizedFormat { .. })
        ));
    }

    #[test]
    fn extension_spoof_is_unrecognized() {
        let archive = build_zip(&[("part.kicad_sym", "this is not a library")]);
        assert!(matches!(
            detect(&archive),
            Err(ImportError::UnrecognizedFormat { .. })
        ));
    }
}
