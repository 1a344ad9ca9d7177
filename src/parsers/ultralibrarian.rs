//! UltraLibrarian archives: same layout as Samacsys but the vendor
//! folder is spelled `KiCAD/` and footprints sit in a nested `.pretty`
//! directory.

use std::collections::HashMap;

use crate::archive::Archive;
use crate::detect::Provider;
use crate::error::{ImportError, Result};
use crate::legacy;

use super::{assemble, find_model, footprint_map, symbol_entries, RawPart};

const VENDOR_DIR: &str = "KiCAD";

pub fn parse(archive: &Archive) -> Result<Vec<RawPart>> {
    let symbol_entry = archive
        .files_under_dir(VENDOR_DIR)
        .find(|n| n.ends_with(".kicad_sym"))
        .or_else(|| {
            archive
                .files_under_dir(VENDOR_DIR)
                .find(|n| n.ends_with(".lib"))
        })
        .map(str::to_string)
        .ok_or_else(|| {
            ImportError::corrupt(&archive.name, "no symbol library under KiCAD/")
        })?;
    let symbols = symbol_entries(archive, &symbol_entry)?;

    let dcm = match archive
        .files_under_dir(VENDOR_DIR)
        .find(|n| n.ends_with(".dcm"))
        .map(str::to_string)
    {
        Some(entry) => legacy::parse_dcm(&archive.read_text(&entry)?),
        None => HashMap::new(),
    };

    let footprints = footprint_map(archive, archive.files_under_dir(VENDOR_DIR));
    let model = find_model(archive);

    Ok(assemble(
        Provider::UltraLibrarian,
        archive,
        symbols,
        dcm,
        footprints,
        model,
    ))
}

#[cfg(test)]
mod tests {
    use super::super::test_util::*;
    use super::*;

    #[test]
    fn extracts_from_kicad_folder_with_pretty_dir() {
        let archive = build_archive(
            "ul.zip",
            &[
                ("export/KiCAD/part.kicad_sym", CURRENT_LIB.as_bytes()),
                (
                    "export/KiCAD/footprints.pretty/SOIC8.kicad_mod",
                    FOOTPRINT.as_bytes(),
                ),
                ("export/3D/part.stp", STEP),
            ],
        );
        let parts = parse(&archive).unwrap();
        assert_eq!(parts.len(), 1);
        assert_eq!(parts[0].part_number, "PN123");
        assert!(parts[0].footprint_text.is_some());
        assert_eq!(parts[0].model.as_ref().unwrap().file_name, "part.stp");
    }

    #[test]
    fn missing_symbol_library_is_corrupt() {
        let archive = build_archive(
            "ul.zip",
            &[("KiCAD/footprints.pretty/X.kicad_mod", FOOTPRINT.as_bytes())],
        );
        assert!(matches!(
            parse(&archive),
            Err(ImportError::CorruptArchive { .. })
        ));
    }
}
