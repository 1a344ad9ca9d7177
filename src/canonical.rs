//! Canonical part model: the provider-agnostic unit of exchange between
//! the parsers, the remote fetcher and the merger.

use crate::detect::Provider;
use crate::error::{ImportError, Result};
use crate::legacy::{self, DcmEntry};
use crate::parsers::{RawPart, RawSymbol};
use crate::sexpr::{self, Sexpr};

/// Shared electrical pin type vocabulary. Every provider vocabulary maps
/// onto this enumeration; unknown values become `Unspecified`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PinType {
    Input,
    Output,
    Bidirectional,
    TriState,
    Passive,
    Free,
    PowerIn,
    PowerOut,
    OpenCollector,
    OpenEmitter,
    NoConnect,
    Unspecified,
}

impl PinType {
    /// Current s-expression token, e.g. `passive` or `power_in`.
    pub fn from_token(token: &str) -> PinType {
        match token {
            "input" => PinType::Input,
            "output" => PinType::Output,
            "bidirectional" => PinType::Bidirectional,
            "tri_state" => PinType::TriState,
            "passive" => PinType::Passive,
            "free" => PinType::Free,
            "power_in" => PinType::PowerIn,
            "power_out" => PinType::PowerOut,
            "open_collector" => PinType::OpenCollector,
            "open_emitter" => PinType::OpenEmitter,
            "no_connect" => PinType::NoConnect,
            _ => PinType::Unspecified,
        }
    }

    /// EasyEDA numeric electrical type codes.
    pub fn from_easyeda(code: &str) -> PinType {
        match code {
            "1" => PinType::Input,
            "2" => PinType::Output,
            "3" => PinType::Bidirectional,
            "4" => PinType::PowerIn,
            "0" => PinType::Unspecified,
            _ => PinType::Unspecified,
        }
    }

    pub fn token(&self) -> &'static str {
        match self {
            PinType::Input => "input",
            PinType::Output => "output",
            PinType::Bidirectional => "bidirectional",
            PinType::TriState => "tri_state",
            PinType::Passive => "passive",
            PinType::Free => "free",
            PinType::PowerIn => "power_in",
            PinType::PowerOut => "power_out",
            PinType::OpenCollector => "open_collector",
            PinType::OpenEmitter => "open_emitter",
            PinType::NoConnect => "no_connect",
            PinType::Unspecified => "unspecified",
        }
    }
}

/// Stable merge key: provider plus normalized part number. Re-importing
/// the same archive always yields the same identity.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PartIdentity {
    pub provider: Provider,
    pub part_number: String,
}

impl PartIdentity {
    pub fn new(provider: Provider, raw_name: &str) -> PartIdentity {
        PartIdentity {
            provider,
            part_number: clean_name(raw_name),
        }
    }
}

impl std::fmt::Display for PartIdentity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.provider, self.part_number)
    }
}

/// Replace characters that are invalid in library entry or file names.
pub fn clean_name(name: &str) -> String {
    name.trim()
        .chars()
        .map(|c| match c {
            '<' | '>' | ':' | '"' | '/' | '\\' | '|' | '?' | '*' | ' ' => '_',
            other => other,
        })
        .collect()
}

#[derive(Debug, Clone, PartialEq)]
pub struct Pin {
    pub name: String,
    pub number: String,
    pub electrical: PinType,
    pub x: f64,
    pub y: f64,
}

/// Structured symbol description plus its serialized form.
#[derive(Debug, Clone)]
pub struct SymbolDef {
    pub name: String,
    pub pins: Vec<Pin>,
    pub node: Sexpr,
}

impl SymbolDef {
    pub fn from_node(node: Sexpr) -> Result<SymbolDef> {
        if node.tag() != Some("symbol") {
            return Err(ImportError::Other("not a symbol node".into()));
        }
        let name = node
            .entry_name()
            .ok_or_else(|| ImportError::Other("symbol node without a name".into()))?
            .to_string();
        let mut pins = Vec::new();
        collect_pins(&node, &mut pins);
        Ok(SymbolDef { name, pins, node })
    }

    pub fn description(&self) -> Option<&str> {
        self.node.property("Description")
    }

    pub fn footprint_ref(&self) -> Option<&str> {
        self.node.property("Footprint")
    }
}

fn collect_pins(node: &Sexpr, out: &mut Vec<Pin>) {
    if node.tag() == Some("pin") {
        let items = node.as_list().unwrap_or(&[]);
        let electrical = items
            .get(1)
            .and_then(Sexpr::as_str)
            .map(PinType::from_token)
            .unwrap_or(PinType::Unspecified);
        let (x, y) = node
            .find("at")
            .and_then(|at| {
                let at = at.as_list()?;
                Some((at.get(1)?.as_f64()?, at.get(2)?.as_f64()?))
            })
            .unwrap_or((0.0, 0.0));
        let name = node
            .find("name")
            .and_then(|n| n.as_list()?.get(1)?.as_str().map(str::to_string))
            .unwrap_or_default();
        let number = node
            .find("number")
            .and_then(|n| n.as_list()?.get(1)?.as_str().map(str::to_string))
            .unwrap_or_default();
        out.push(Pin {
            name,
            number,
            electrical,
            x,
            y,
        });
        return;
    }
    if let Some(items) = node.as_list() {
        for child in items {
            collect_pins(child, out);
        }
    }
}

/// Structured footprint plus its serialized form.
#[derive(Debug, Clone)]
pub struct FootprintDef {
    pub name: String,
    pub node: Sexpr,
}

impl FootprintDef {
    pub fn from_text(text: &str) -> Result<FootprintDef> {
        let node = sexpr::parse(text)?;
        // v5 footprints use the `module` tag but are otherwise compatible.
        if !matches!(node.tag(), Some("footprint") | Some("module")) {
            return Err(ImportError::Other("not a footprint definition".into()));
        }
        let name = node
            .entry_name()
            .ok_or_else(|| ImportError::Other("footprint without a name".into()))?;
        let name = clean_name(name);
        Ok(FootprintDef { name, node })
    }

    /// Current 3D model reference path, if any.
    pub fn model_ref(&self) -> Option<&str> {
        self.node.find("model")?.as_list()?.get(1)?.as_str()
    }

    /// Point the footprint at `path`, updating the existing `model` node
    /// or appending one with the part's placement transform.
    pub fn set_model_ref(&mut self, path: &str, transform: &Transform) {
        if let Some(model) = self.node.find_mut("model") {
            if let Some(items) = model.as_list_mut() {
                if items.len() > 1 {
                    items[1] = Sexpr::string(path);
                } else {
                    items.push(Sexpr::string(path));
                }
                return;
            }
        }
        self.node.push(model_node(path, transform));
    }

    /// Drop any model reference the vendor text carried. Used when a part
    /// ships no 3D asset, so the footprint never points at a file the
    /// library does not hold.
    pub fn clear_model_ref(&mut self) {
        if let Some(items) = self.node.as_list_mut() {
            items.retain(|c| c.tag() != Some("model"));
        }
    }
}

fn xyz(tag: &str, v: (f64, f64, f64)) -> Sexpr {
    Sexpr::list(vec![
        Sexpr::atom(tag),
        Sexpr::list(vec![
            Sexpr::atom("xyz"),
            Sexpr::num(v.0),
            Sexpr::num(v.1),
            Sexpr::num(v.2),
        ]),
    ])
}

fn model_node(path: &str, transform: &Transform) -> Sexpr {
    Sexpr::list(vec![
        Sexpr::atom("model"),
        Sexpr::string(path),
        xyz("offset", transform.offset),
        xyz("scale", transform.scale),
        xyz("rotate", transform.rotate),
    ])
}

/// Placement transform of a 3D asset. Copied from the source archive or
/// API response, never computed.
#[derive(Debug, Clone, PartialEq)]
pub struct Transform {
    pub offset: (f64, f64, f64),
    pub rotate: (f64, f64, f64),
    pub scale: (f64, f64, f64),
}

impl Default for Transform {
    fn default() -> Self {
        Transform {
            offset: (0.0, 0.0, 0.0),
            rotate: (0.0, 0.0, 0.0),
            scale: (1.0, 1.0, 1.0),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Model3d {
    pub file_stem: String,
    pub extension: String,
    pub bytes: Vec<u8>,
    pub transform: Transform,
}

impl Model3d {
    pub fn file_name(&self) -> String {
        format!("{}.{}", self.file_stem, self.extension)
    }
}

#[derive(Debug, Clone)]
pub struct Provenance {
    pub provider: Provider,
    /// Archive file name or remote part identifier.
    pub source: String,
}

#[derive(Debug, Clone)]
pub struct CanonicalPart {
    pub identity: PartIdentity,
    pub symbol: SymbolDef,
    pub footprint: Option<FootprintDef>,
    pub model: Option<Model3d>,
    pub provenance: Provenance,
}

/// Build a canonical part from one raw extraction record.
///
/// Performs legacy-to-current conversion, identity normalization and
/// descriptive field consolidation. Deterministic: the same raw record
/// always yields the same identity and the same serialized entries.
pub fn build(raw: RawPart) -> Result<CanonicalPart> {
    let identity = PartIdentity::new(raw.provider, &raw.part_number);

    let node = match raw.symbol {
        RawSymbol::Node(node) => node,
        RawSymbol::LegacyBlock(block) => legacy::convert_symbol(&block)?,
    };
    let node = rename_symbol(node, &identity.part_number);
    let mut symbol = SymbolDef::from_node(node)?;

    if let Some(dcm) = &raw.dcm {
        consolidate_dcm(&mut symbol, dcm);
    }

    let footprint = match &raw.footprint_text {
        Some(text) => Some(FootprintDef::from_text(text).map_err(|e| {
            ImportError::corrupt(&raw.source, format!("footprint unparsable: {e}"))
        })?),
        None => None,
    };

    let model = raw.model.map(|m| {
        let (stem, ext) = split_model_name(&m.file_name);
        Model3d {
            file_stem: clean_name(&stem),
            extension: ext,
            bytes: m.bytes,
            transform: m.transform,
        }
    });

    Ok(CanonicalPart {
        identity,
        symbol,
        footprint,
        model,
        provenance: Provenance {
            provider: raw.provider,
            source: raw.source,
        },
    })
}

fn split_model_name(file_name: &str) -> (String, String) {
    match file_name.rsplit_once('.') {
        Some((stem, ext)) => (stem.to_string(), ext.to_ascii_lowercase()),
        None => (file_name.to_string(), "step".to_string()),
    }
}

/// Rename the symbol entry and its unit sub-symbols to the normalized
/// identity name, keeping the original name in the Value field.
fn rename_symbol(mut node: Sexpr, new_name: &str) -> Sexpr {
    let old_name = node.entry_name().unwrap_or_default().to_string();
    if old_name == new_name {
        return node;
    }
    if let Some(items) = node.as_list_mut() {
        if items.len() > 1 {
            items[1] = Sexpr::string(new_name);
        }
        for child in items.iter_mut() {
            if child.tag() == Some("symbol") {
                if let Some(unit_name) = child.entry_name() {
                    let renamed = unit_name.replacen(&old_name, new_name, 1);
                    if let Some(unit_items) = child.as_list_mut() {
                        unit_items[1] = Sexpr::string(renamed);
                    }
                }
            }
        }
    }
    if node.property("Value").is_none() && !old_name.is_empty() {
        node.set_property("Value", &old_name);
    }
    node
}

fn consolidate_dcm(symbol: &mut SymbolDef, dcm: &DcmEntry) {
    if let Some(description) = &dcm.description {
        symbol.node.set_property("Description", description);
    }
    if let Some(keywords) = &dcm.keywords {
        symbol.node.set_property("ki_keywords", keywords);
    }
    if let Some(datasheet) = &dcm.datasheet {
        let current = symbol.node.property("Datasheet").unwrap_or_default();
        if current.is_empty() {
            symbol.node.set_property("Datasheet", datasheet);
        }
    }
}
