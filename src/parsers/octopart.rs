//! Octopart archives: fixed `device.lib` / `device.dcm` pair with the
//! footprints in a `.pretty` directory.

use std::collections::HashMap;

use crate::archive::Archive;
use crate::detect::Provider;
use crate::error::{ImportError, Result};
use crate::legacy;

use super::{assemble, find_model, footprint_map, symbol_entries, RawPart};

pub fn parse(archive: &Archive) -> Result<Vec<RawPart>> {
    let symbol_entry = archive.find_by_suffix("device.lib").ok_or_else(|| {
        ImportError::corrupt(&archive.name, "missing device.lib symbol library")
    })?;
    let symbols = symbol_entries(archive, &symbol_entry.to_string())?;

    let dcm = match archive.find_by_suffix("device.dcm") {
        Some(entry) => legacy::parse_dcm(&archive.read_text(&entry.to_string())?),
        None => HashMap::new(),
    };

    let footprints = footprint_map(
        archive,
        archive
            .entry_names()
            .iter()
            .map(String::as_str)
            .filter(|n| n.contains(".pretty/")),
    );

    let model = find_model(archive);
    Ok(assemble(
        Provider::Octopart,
        archive,
        symbols,
        dcm,
        footprints,
        model,
    ))
}
