// Each integration test binary compiles its own copy and uses a subset.
#![allow(dead_code)]

use std::io::{Cursor, Write};

use zip::write::SimpleFileOptions;

pub fn zip_bytes(entries: &[(&str, &[u8])]) -> Vec<u8> {
    let mut buf = Cursor::new(Vec::new());
    let mut zip = zip::ZipWriter::new(&mut buf);
    for (entry, content) in entries {
        zip.start_file(*entry, SimpleFileOptions::default()).unwrap();
        zip.write_all(content).unwrap();
    }
    zip.finish().unwrap();
    buf.into_inner()
}

pub fn symbol_lib(part_number: &str) -> String {
    format!(
        r#"(kicad_symbol_lib (version 20211014) (generator vendor)
    (symbol "{part_number}" (property "Reference" "U") (property "Footprint" "Lib:SOIC8")
        (symbol "{part_number}_1_1" (pin input line (at 0 0 0) (name "VCC") (number "1")))))"#
    )
}

pub const FOOTPRINT: &str = r#"(footprint "SOIC8" (layer F.Cu)
    (pad "1" smd rect (at 0 0) (size 1 1) (layers F.Cu)))"#;

pub const STEP: &[u8] = b"ISO-10303-21;HEADER;ENDSEC;";

/// A complete single-part archive in the root-level vendor layout.
pub fn vendor_archive(part_number: &str) -> Vec<u8> {
    vendor_archive_with_model(part_number, STEP)
}

pub fn vendor_archive_with_model(part_number: &str, model: &[u8]) -> Vec<u8> {
    zip_bytes(&[
        (
            &format!("{part_number}.kicad_sym"),
            symbol_lib(part_number).as_bytes(),
        ),
        ("SOIC8.kicad_mod", FOOTPRINT.as_bytes()),
        (&format!("{part_number}.step"), model),
    ])
}

/// Same part in the `KiCad/` + `3D/` directory layout.
pub fn samacsys_archive(part_number: &str) -> Vec<u8> {
    zip_bytes(&[
        (
            &format!("KiCad/{part_number}.kicad_sym"),
            symbol_lib(part_number).as_bytes(),
        ),
        ("KiCad/SOIC8.kicad_mod", FOOTPRINT.as_bytes()),
        (&format!("3D/{part_number}.step"), STEP),
    ])
}

/// Same part in the `KiCAD/` directory layout.
pub fn ultralibrarian_archive(part_number: &str) -> Vec<u8> {
    zip_bytes(&[
        (
            &format!("KiCAD/{part_number}.kicad_sym"),
            symbol_lib(part_number).as_bytes(),
        ),
        ("KiCAD/SOIC8.kicad_mod", FOOTPRINT.as_bytes()),
        (&format!("3D/{part_number}.step"), STEP),
    ])
}
