//! Native reader for the legacy KiCad text formats.
//!
//! Vendor archives still commonly ship v4/v5 `.lib` symbol libraries with
//! `.dcm` companion files. This module converts them into the current
//! s-expression schema so the rest of the pipeline only ever deals with
//! one representation. Delegation to the external `kicad-cli` upgrade
//! command is available as an alternative through [`crate::upgrade`].

use std::collections::HashMap;

use regex::Regex;

use crate::error::{ImportError, Result};
use crate::sexpr::Sexpr;

const MIL_TO_MM: f64 = 0.0254;

/// Descriptive metadata of one `.dcm` record.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DcmEntry {
    pub description: Option<String>,
    pub keywords: Option<String>,
    pub datasheet: Option<String>,
}

/// Parse a `.dcm` companion file into per-symbol metadata.
///
/// Records look like `$CMP name` / `D descr` / `K keywords` / `F url` /
/// `$ENDCMP`; anything else is ignored.
pub fn parse_dcm(text: &str) -> HashMap<String, DcmEntry> {
    let mut entries = HashMap::new();
    let mut current: Option<(String, DcmEntry)> = None;

    for line in text.lines() {
        let line = line.trim();
        if let Some(name) = line.strip_prefix("$CMP ") {
            current = Some((name.trim().to_string(), DcmEntry::default()));
        } else if line == "$ENDCMP" {
            if let Some((name, entry)) = current.take() {
                entries.insert(name, entry);
            }
        } else if let Some((_, entry)) = current.as_mut() {
            if let Some(d) = line.strip_prefix("D ") {
                entry.description = Some(d.trim().to_string());
            } else if let Some(k) = line.strip_prefix("K ") {
                entry.keywords = Some(k.trim().to_string());
            } else if let Some(f) = line.strip_prefix("F ") {
                entry.datasheet = Some(f.trim().to_string());
            }
        }
    }
    entries
}

/// Split a legacy `.lib` file into its `DEF … ENDDEF` blocks.
pub fn split_lib_entries(text: &str) -> Vec<String> {
    let mut blocks = Vec::new();
    let mut current: Option<Vec<&str>> = None;
    for line in text.lines() {
        if line.starts_with("DEF ") {
            current = Some(vec![line]);
        } else if line.starts_with("ENDDEF") {
            if let Some(mut block) = current.take() {
                block.push(line);
                blocks.push(block.join("\n"));
            }
        } else if let Some(block) = current.as_mut() {
            block.push(line);
        }
    }
    blocks
}

/// Convert a whole legacy symbol library into current-format
/// `(symbol "NAME" …)` nodes, one per `DEF` block.
pub fn convert_symbol_lib(text: &str) -> Result<Vec<Sexpr>> {
    if !text.contains("EESchema-LIBRARY") {
        return Err(ImportError::Other(
            "not a legacy EESchema symbol library".into(),
        ));
    }
    split_lib_entries(text)
        .iter()
        .map(|block| convert_symbol(block))
        .collect()
}

/// Convert one `DEF … ENDDEF` block.
pub fn convert_symbol(block: &str) -> Result<Sexpr> {
    let mut lines = block.lines();
    let def = lines
        .next()
        .ok_or_else(|| ImportError::Other("empty symbol definition".into()))?;
    let def_fields: Vec<&str> = def.split_whitespace().collect();
    if def_fields.len() < 3 || def_fields[0] != "DEF" {
        return Err(ImportError::Other(format!("malformed DEF line: {def}")));
    }
    let name = def_fields[1].trim_matches('~').to_string();
    let reference = def_fields[2].to_string();

    let mut properties: Vec<(String, String)> = vec![
        ("Reference".into(), reference),
        ("Value".into(), name.clone()),
        ("Footprint".into(), String::new()),
        ("Datasheet".into(), String::new()),
    ];
    let mut graphics = Vec::new();
    let mut pins = Vec::new();

    let field_re = Regex::new(r#"^F(\d+)\s+"([^"]*)""#).unwrap();

    for line in lines {
        let line = line.trim_end();
        if let Some(caps) = field_re.captures(line) {
            let idx: usize = caps[1].parse().unwrap_or(99);
            let value = caps[2].to_string();
            if idx < properties.len() && !value.is_empty() {
                properties[idx].1 = value;
            }
            continue;
        }
        let fields: Vec<&str> = line.split_whitespace().collect();
        match fields.first().copied() {
            Some("X") => {
                if let Some(pin) = convert_pin(&fields) {
                    pins.push(pin);
                }
            }
            Some("S") => {
                if let Some(rect) = convert_rectangle(&fields) {
                    graphics.push(rect);
                }
            }
            Some("C") => {
                if let Some(circle) = convert_circle(&fields) {
                    graphics.push(circle);
                }
            }
            Some("P") => {
                if let Some(poly) = convert_polyline(&fields) {
                    graphics.push(poly);
                }
            }
            Some("A") => {
                // Arcs are rare in vendor exports; the entry is still
                // valid without them.
                log::debug!("skipping legacy arc primitive: {line}");
            }
            _ => {}
        }
    }

    let mut symbol = vec![
        Sexpr::atom("symbol"),
        Sexpr::string(&name),
        Sexpr::list(vec![
            Sexpr::atom("pin_names"),
            Sexpr::list(vec![Sexpr::atom("offset"), Sexpr::num(1.016)]),
        ]),
        Sexpr::list(vec![Sexpr::atom("in_bom"), Sexpr::atom("yes")]),
        Sexpr::list(vec![Sexpr::atom("on_board"), Sexpr::atom("yes")]),
    ];
    for (key, value) in &properties {
        symbol.push(crate::sexpr::property_node(key, value));
    }

    if !graphics.is_empty() {
        let mut body = vec![Sexpr::atom("symbol"), Sexpr::string(format!("{name}_0_1"))];
        body.extend(graphics);
        symbol.push(Sexpr::list(body));
    }
    if !pins.is_empty() {
        let mut body = vec![Sexpr::atom("symbol"), Sexpr::string(format!("{name}_1_1"))];
        body.extend(pins);
        symbol.push(Sexpr::list(body));
    }

    Ok(Sexpr::List(symbol))
}

/// Legacy electrical type letter → current pin type token.
pub fn pin_type_token(letter: &str) -> &'static str {
    match letter {
        "I" => "input",
        "O" => "output",
        "B" => "bidirectional",
        "T" => "tri_state",
        "P" => "passive",
        "W" => "power_in",
        "w" => "power_out",
        "C" => "open_collector",
        "E" => "open_emitter",
        "N" => "no_connect",
        "U" => "unspecified",
        _ => "unspecified",
    }
}

// X name number posx posy length orientation snum snom unit convert etype [shape]
fn convert_pin(fields: &[&str]) -> Option<Sexpr> {
    if fields.len() < 12 {
        return None;
    }
    let name = fields[1].trim_matches('~');
    let number = fields[2];
    let x: f64 = fields[3].parse().ok()?;
    let y: f64 = fields[4].parse().ok()?;
    let length: f64 = fields[5].parse().ok()?;
    let angle = match fields[6] {
        "R" => 0.0,
        "L" => 180.0,
        "U" => 90.0,
        "D" => 270.0,
        _ => 0.0,
    };
    let etype = pin_type_token(fields[11]);

    let effects = || {
        Sexpr::list(vec![
            Sexpr::atom("effects"),
            Sexpr::list(vec![
                Sexpr::atom("font"),
                Sexpr::list(vec![Sexpr::atom("size"), Sexpr::num(1.27), Sexpr::num(1.27)]),
            ]),
        ])
    };

    Some(Sexpr::list(vec![
        Sexpr::atom("pin"),
        Sexpr::atom(etype),
        Sexpr::atom("line"),
        Sexpr::list(vec![
            Sexpr::atom("at"),
            Sexpr::num(x * MIL_TO_MM),
            Sexpr::num(y * MIL_TO_MM),
            Sexpr::num(angle),
        ]),
        Sexpr::list(vec![Sexpr::atom("length"), Sexpr::num(length * MIL_TO_MM)]),
        Sexpr::list(vec![Sexpr::atom("name"), Sexpr::string(name), effects()]),
        Sexpr::list(vec![Sexpr::atom("number"), Sexpr::string(number), effects()]),
    ]))
}

fn stroke(width_mil: f64) -> Sexpr {
    Sexpr::list(vec![
        Sexpr::atom("stroke"),
        Sexpr::list(vec![Sexpr::atom("width"), Sexpr::num(width_mil * MIL_TO_MM)]),
        Sexpr::list(vec![Sexpr::atom("type"), Sexpr::atom("default")]),
    ])
}

fn fill(flag: Option<&&str>) -> Sexpr {
    let kind = match flag.copied() {
        Some("f") => "background",
        Some("F") => "outline",
        _ => "none",
    };
    Sexpr::list(vec![
        Sexpr::atom("fill"),
        Sexpr::list(vec![Sexpr::atom("type"), Sexpr::atom(kind)]),
    ])
}

// S x1 y1 x2 y2 unit convert thickness fill
fn convert_rectangle(fields: &[&str]) -> Option<Sexpr> {
    if fields.len() < 8 {
        return None;
    }
    let coords: Vec<f64> = fields[1..5]
        .iter()
        .map(|f| f.parse().ok())
        .collect::<Option<Vec<_>>>()?;
    let thickness: f64 = fields[7].parse().unwrap_or(10.0);
    Some(Sexpr::list(vec![
        Sexpr::atom("rectangle"),
        Sexpr::list(vec![
            Sexpr::atom("start"),
            Sexpr::num(coords[0] * MIL_TO_MM),
            Sexpr::num(coords[1] * MIL_TO_MM),
        ]),
        Sexpr::list(vec![
            Sexpr::atom("end"),
            Sexpr::num(coords[2] * MIL_TO_MM),
            Sexpr::num(coords[3] * MIL_TO_MM),
        ]),
        stroke(thickness),
        fill(fields.get(8)),
    ]))
}

// C cx cy radius unit convert thickness fill
fn convert_circle(fields: &[&str]) -> Option<Sexpr> {
    if fields.len() < 7 {
        return None;
    }
    let cx: f64 = fields[1].parse().ok()?;
    let cy: f64 = fields[2].parse().ok()?;
    let radius: f64 = fields[3].parse().ok()?;
    let thickness: f64 = fields[6].parse().unwrap_or(10.0);
    Some(Sexpr::list(vec![
        Sexpr::atom("circle"),
        Sexpr::list(vec![
            Sexpr::atom("center"),
            Sexpr::num(cx * MIL_TO_MM),
            Sexpr::num(cy * MIL_TO_MM),
        ]),
        Sexpr::list(vec![Sexpr::atom("radius"), Sexpr::num(radius * MIL_TO_MM)]),
        stroke(thickness),
        fill(fields.get(7)),
    ]))
}

// P count unit convert thickness x1 y1 … xn yn fill
fn convert_polyline(fields: &[&str]) -> Option<Sexpr> {
    if fields.len() < 7 {
        return None;
    }
    let count: usize = fields[1].parse().ok()?;
    let thickness: f64 = fields[4].parse().unwrap_or(10.0);
    let coords = &fields[5..];
    if coords.len() < count * 2 {
        return None;
    }
    let mut pts = vec![Sexpr::atom("pts")];
    for pair in coords[..count * 2].chunks(2) {
        let x: f64 = pair[0].parse().ok()?;
        let y: f64 = pair[1].parse().ok()?;
        pts.push(Sexpr::list(vec![
            Sexpr::atom("xy"),
            Sexpr::num(x * MIL_TO_MM),
            Sexpr::num(y * MIL_TO_MM),
        ]));
    }
    Some(Sexpr::list(vec![
        Sexpr::atom("polyline"),
        Sexpr::List(pts),
        stroke(thickness),
        fill(coords.get(count * 2)),
    ]))
}
