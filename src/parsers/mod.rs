//! Vendor parsers: pure functions from archive bytes to raw extraction
//! records, one record per bundled part.
//!
//! The providers share one record shape and most of the extraction
//! mechanics; what differs per provider is where the files live inside
//! the archive. Absence of an optional artifact (footprint, model, dcm)
//! is encoded as `None`; a missing or unparsable symbol library is a
//! `CorruptArchive` error for every zip provider.

pub mod octopart;
pub mod samacsys;
pub mod snapeda;
pub mod ultralibrarian;

use std::collections::HashMap;

use regex::Regex;

use crate::archive::Archive;
use crate::canonical::{clean_name, Transform};
use crate::detect::Provider;
use crate::error::{ImportError, Result};
use crate::legacy::{self, DcmEntry};
use crate::sexpr::{self, Sexpr};

/// Raw symbol payload: either one legacy `DEF … ENDDEF` block or an
/// already-current `(symbol …)` node.
#[derive(Debug, Clone)]
pub enum RawSymbol {
    LegacyBlock(String),
    Node(Sexpr),
}

#[derive(Debug, Clone)]
pub struct RawModel {
    pub file_name: String,
    pub bytes: Vec<u8>,
    /// Placement transform shipped with the model; copied verbatim.
    pub transform: Transform,
}

/// One part as extracted from a vendor archive or remote payload, before
/// normalization into the canonical model.
#[derive(Debug, Clone)]
pub struct RawPart {
    pub provider: Provider,
    pub part_number: String,
    pub symbol: RawSymbol,
    pub footprint_text: Option<String>,
    pub dcm: Option<DcmEntry>,
    pub model: Option<RawModel>,
    pub source: String,
}

/// Dispatch to the provider's parser.
pub fn parse(provider: Provider, archive: &Archive) -> Result<Vec<RawPart>> {
    match provider {
        Provider::Octopart => octopart::parse(archive),
        Provider::Samacsys => samacsys::parse(archive),
        Provider::UltraLibrarian => ultralibrarian::parse(archive),
        Provider::Snapeda => snapeda::parse(archive),
        Provider::EasyEda => Err(ImportError::Other(
            "EasyEDA parts are fetched remotely, not parsed from archives".into(),
        )),
    }
}

/// Split a symbol library entry (legacy or current) into per-part symbol
/// payloads with their entry names.
pub(crate) fn symbol_entries(
    archive: &Archive,
    entry: &str,
) -> Result<Vec<(String, RawSymbol)>> {
    let text = archive.read_text(entry)?;
    if text.contains("EESchema-LIBRARY") {
        let blocks = legacy::split_lib_entries(&text);
        if blocks.is_empty() {
            return Err(ImportError::corrupt(
                &archive.name,
                format!("no symbol definitions in {entry}"),
            ));
        }
        return Ok(blocks
            .into_iter()
            .filter_map(|block| {
                let name = block
                    .lines()
                    .next()?
                    .split_whitespace()
                    .nth(1)?
                    .trim_matches('~')
                    .to_string();
                Some((name, RawSymbol::LegacyBlock(block)))
            })
            .collect());
    }

    let lib = sexpr::parse(&text).map_err(|e| {
        ImportError::corrupt(&archive.name, format!("symbol library unparsable: {e}"))
    })?;
    if lib.tag() != Some("kicad_symbol_lib") {
        return Err(ImportError::corrupt(
            &archive.name,
            format!("{entry} is not a symbol library"),
        ));
    }
    let symbols: Vec<(String, RawSymbol)> = lib
        .find_all("symbol")
        .filter_map(|node| {
            let name = node.entry_name()?.to_string();
            Some((name, RawSymbol::Node(node.clone())))
        })
        .collect();
    if symbols.is_empty() {
        return Err(ImportError::corrupt(
            &archive.name,
            format!("no symbols in {entry}"),
        ));
    }
    Ok(symbols)
}

/// All footprint files reachable through `entries`, keyed by their
/// cleaned footprint name.
pub(crate) fn footprint_map<'a>(
    archive: &Archive,
    entries: impl Iterator<Item = &'a str>,
) -> HashMap<String, String> {
    let mut map = HashMap::new();
    for entry in entries {
        if !entry.ends_with(".kicad_mod") {
            continue;
        }
        match archive.read_text(entry) {
            Ok(text) => {
                if let Some(name) = footprint_name(&text) {
                    map.insert(name, text);
                }
            }
            Err(e) => log::warn!("{}: skipping footprint {entry}: {e}", archive.name),
        }
    }
    map
}

/// Footprint entry name from `(footprint "NAME" …)` or `(module NAME …)`.
pub(crate) fn footprint_name(text: &str) -> Option<String> {
    let re = Regex::new(r#"\((?:footprint|module)\s+"?([^"\s)]+)"?"#).unwrap();
    re.captures(text)
        .map(|caps| clean_name(&caps[1]))
        .filter(|name| !name.is_empty())
}

/// First 3D asset in the archive, preferring STEP over VRML as the
/// original importer does.
pub(crate) fn find_model(archive: &Archive) -> Option<RawModel> {
    let entry = archive
        .find_by_suffix(".step")
        .or_else(|| archive.find_by_suffix(".stp"))
        .or_else(|| archive.find_by_suffix(".wrl"))?
        .to_string();
    let bytes = match archive.read_bytes(&entry) {
        Ok(bytes) => bytes,
        Err(e) => {
            log::warn!("{}: cannot read 3D model {entry}: {e}", archive.name);
            return None;
        }
    };
    let file_name = entry.rsplit('/').next().unwrap_or(&entry).to_string();
    Some(RawModel {
        file_name,
        bytes,
        transform: Transform::default(),
    })
}

/// Footprint referenced by a raw symbol, used to pair multi-part archives.
fn symbol_footprint_ref(symbol: &RawSymbol) -> Option<String> {
    match symbol {
        RawSymbol::Node(node) => node.property("Footprint").map(str::to_string),
        RawSymbol::LegacyBlock(block) => {
            let re = Regex::new(r#"(?m)^F2\s+"([^"]*)""#).unwrap();
            re.captures(block).map(|caps| caps[1].to_string())
        }
    }
}

/// Combine the located artifacts into one `RawPart` per symbol entry.
pub(crate) fn assemble(
    provider: Provider,
    archive: &Archive,
    symbols: Vec<(String, RawSymbol)>,
    mut dcm: HashMap<String, DcmEntry>,
    footprints: HashMap<String, String>,
    model: Option<RawModel>,
) -> Vec<RawPart> {
    let single_footprint = (footprints.len() == 1)
        .then(|| footprints.values().next().cloned())
        .flatten();

    symbols
        .into_iter()
        .map(|(name, symbol)| {
            let footprint_text = symbol_footprint_ref(&symbol)
                .and_then(|fp_ref| {
                    let fp_name = fp_ref.rsplit(':').next().unwrap_or(&fp_ref);
                    footprints.get(&clean_name(fp_name)).cloned()
                })
                .or_else(|| single_footprint.clone())
                .or_else(|| footprints.get(&clean_name(&name)).cloned());
            RawPart {
                provider,
                dcm: dcm.remove(&name),
                part_number: name,
                symbol,
                footprint_text,
                model: model.clone(),
                source: archive.name.clone(),
            }
        })
        .collect()
}

#[cfg(test)]
pub(crate) mod test_util {
    use super::*;
    use std::io::{Cursor, Write};
    use zip::write::SimpleFileOptions;

    pub fn build_archive(name: &str, entries: &[(&str, &[u8])]) -> Archive {
        let mut buf = Cursor::new(Vec::new());
        let mut zip = zip::ZipWriter::new(&mut buf);
        for (entry, content) in entries {
            zip.start_file(*entry, SimpleFileOptions::default()).unwrap();
            zip.write_all(content).unwrap();
        }
        zip.finish().unwrap();
        Archive::from_bytes(name, buf.into_inner()).unwrap()
    }

    pub const LEGACY_LIB: &str = "\
EESchema-LIBRARY Version 2.4
DEF PN123 U 0 40 Y Y 1 F N
F0 \"U\" 0 100 50 H V C CNN
F1 \"PN123\" 0 -100 50 H V C CNN
F2 \"Lib:SOIC8\" 0 0 50 H I C CNN
DRAW
X VCC 1 -300 100 200 R 50 50 1 1 W
ENDDRAW
ENDDEF
";

    pub const CURRENT_LIB: &str = r#"(kicad_symbol_lib (version 20211014) (generator test)
        (symbol "PN123" (property "Reference" "U") (property "Footprint" "Lib:SOIC8")
            (symbol "PN123_1_1" (pin input line (at 0 0 0) (name "VCC") (number "1")))))"#;

    pub const FOOTPRINT: &str = r#"(footprint "SOIC8" (layer F.Cu)
        (pad "1" smd rect (at 0 0) (size 1 1) (layers F.Cu)))"#;

    pub const DCM: &str = "\
$CMP PN123
D Test part
K test
F http://example.com/pn123.pdf
$ENDCMP
";

    pub const STEP: &[u8] = b"ISO-10303-21;HEADER;ENDSEC;";
}
