//! Samacsys (Component Search Engine) archives: everything of interest
//! lives under a `KiCad/` folder, with the footprint files as siblings of
//! the symbol library.

use std::collections::HashMap;

use crate::archive::Archive;
use crate::detect::Provider;
use crate::error::{ImportError, Result};
use crate::legacy;

use super::{assemble, find_model, footprint_map, symbol_entries, RawPart};

const VENDOR_DIR: &str = "KiCad";

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
            ImportError::corrupt(&archive.name, "no symbol library under KiCad/")
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
        Provider::Samacsys,
        archive,
        symbols,
        dcm,
        footprints,
        model,
    ))
}
