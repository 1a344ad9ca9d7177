//! Snapeda archives (also the fallback layout): library files anywhere
//! in the archive, usually at the root.

use std::collections::HashMap;

use crate::archive::Archive;
use crate::detect::Provider;
use crate::error::{ImportError, Result};
use crate::legacy;

use super::{assemble, find_model, footprint_map, symbol_entries, RawPart};

pub fn parse(archive: &Archive) -> Result<Vec<RawPart>> {
    let symbol_entry = archive
        .find_by_suffix(".kicad_sym")
        .or_else(|| archive.find_by_suffix(".lib"))
        .map(str::to_string)
        .ok_or_else(|| ImportError::corrupt(&archive.name, "no symbol library found"))?;
    let symbols = symbol_entries(archive, &symbol_entry)?;

    let dcm = match archive.find_by_suffix(".dcm").map(str::to_string) {
        Some(entry) => legacy::parse_dcm(&archive.read_text(&entry)?),
        None => HashMap::new(),
    };

    let footprints = footprint_map(
        archive,
        archive.entry_names().iter().map(String::as_str),
    );
    let model = find_model(archive);

    Ok(assemble(
        Provider::Snapeda,
        archive,
        symbols,
        dcm,
        footprints,
        model,
    ))
}
