//! Conversion of EasyEDA shape records into the common raw-part shape.
//!
//! The endpoint describes symbols and footprints as arrays of
//! tilde-separated records (`P~...` pins, `PAD~...` pads, `TRACK~...`
//! silkscreen lines). One canvas unit is 10 mil.

use crate::canonical::Transform;
use crate::detect::Provider;
use crate::easyeda::models::ComponentData;
use crate::error::{ImportError, Result};
use crate::parsers::{RawModel, RawPart, RawSymbol};
use crate::sexpr::{self, Sexpr};

const UNIT_TO_MM: f64 = 0.254;

/// Assemble a raw part record from one component response plus its
/// already-downloaded model bytes.
pub fn to_raw_part(data: &ComponentData, model_bytes: Option<Vec<u8>>) -> Result<RawPart> {
    let symbol = build_symbol(data)?;
    let footprint_text = build_footprint(data);

    let model = match (&data.model_3d, model_bytes) {
        (Some(info), Some(bytes)) => Some(RawModel {
            file_name: format!("{}.step", info.title),
            bytes,
            transform: Transform::default(),
        }),
        _ => None,
    };

    Ok(RawPart {
        provider: Provider::EasyEda,
        part_number: data.title.clone(),
        symbol: RawSymbol::Node(symbol),
        footprint_text,
        dcm: None,
        model,
        source: data.lcsc_id.clone(),
    })
}

fn build_symbol(data: &ComponentData) -> Result<Sexpr> {
    let pins: Vec<Sexpr> = data
        .symbol_shapes
        .iter()
        .filter_map(|shape| parse_pin(shape, data.symbol_origin))
        .collect();
    if pins.is_empty() {
        return Err(ImportError::Other(format!(
            "component {} has no symbol pins",
            data.lcsc_id
        )));
    }

    let name = &data.title;
    let mut symbol = Sexpr::list(vec![
        Sexpr::atom("symbol"),
        Sexpr::string(name),
        Sexpr::list(vec![
            Sexpr::atom("pin_names"),
            Sexpr::list(vec![Sexpr::atom("offset"), Sexpr::num(1.016)]),
        ]),
        Sexpr::list(vec![Sexpr::atom("in_bom"), Sexpr::atom("yes")]),
        Sexpr::list(vec![Sexpr::atom("on_board"), Sexpr::atom("yes")]),
    ]);
    symbol.push(sexpr::property_node("Reference", &data.prefix));
    symbol.push(sexpr::property_node("Value", name));
    if !data.datasheet.is_empty() {
        symbol.push(sexpr::property_node("Datasheet", &data.datasheet));
    }
    if !data.manufacturer.is_empty() {
        symbol.push(sexpr::property_node("Manufacturer", &data.manufacturer));
    }
    symbol.push(sexpr::property_node("LCSC", &data.lcsc_id));

    let mut unit = Sexpr::list(vec![
        Sexpr::atom("symbol"),
        Sexpr::string(format!("{name}_1_1")),
    ]);
    for pin in pins {
        unit.push(pin);
    }
    symbol.push(unit);
    Ok(symbol)
}

/// Pin record: caret-caret separated segments, the first holding the
/// settings (`P~display~?~electric~x~y~rotation~id~locked`), the fourth
/// and fifth holding the name and number annotations.
fn parse_pin(shape: &str, origin: (f64, f64)) -> Option<Sexpr> {
    let segments: Vec<&str> = shape.split("^^").collect();
    let settings: Vec<&str> = segments.first()?.split('~').collect();
    if settings.first() != Some(&"P") {
        return None;
    }

    let electric = settings.get(3).copied().unwrap_or("0");
    let x: f64 = settings.get(4)?.parse().ok()?;
    let y: f64 = settings.get(5)?.parse().ok()?;
    let rotation: f64 = settings
        .get(6)
        .and_then(|r| r.parse().ok())
        .unwrap_or(0.0);

    let annotation = |idx: usize| -> String {
        segments
            .get(idx)
            .and_then(|seg| seg.split('~').nth(4))
            .unwrap_or("")
            .to_string()
    };
    let name = annotation(3);
    let number = annotation(4);

    let ki_x = (x - origin.0) * UNIT_TO_MM;
    let ki_y = -(y - origin.1) * UNIT_TO_MM;

    Some(Sexpr::list(vec![
        Sexpr::atom("pin"),
        Sexpr::atom(crate::canonical::PinType::from_easyeda(electric).token()),
        Sexpr::atom("line"),
        Sexpr::list(vec![
            Sexpr::atom("at"),
            Sexpr::num(round2(ki_x)),
            Sexpr::num(round2(ki_y)),
            Sexpr::num(rotation),
        ]),
        Sexpr::list(vec![Sexpr::atom("length"), Sexpr::num(2.54)]),
        Sexpr::list(vec![Sexpr::atom("name"), Sexpr::string(name)]),
        Sexpr::list(vec![Sexpr::atom("number"), Sexpr::string(number)]),
    ]))
}

fn build_footprint(data: &ComponentData) -> Option<String> {
    let mut elements = Vec::new();
    for shape in &data.footprint_shapes {
        if let Some(pad) = parse_pad(shape, data.footprint_origin) {
            elements.push(pad);
        } else if let Some(lines) = parse_track(shape, data.footprint_origin) {
            elements.extend(lines);
        }
    }
    if elements.is_empty() {
        return None;
    }

    let mut fp = Sexpr::list(vec![
        Sexpr::atom("footprint"),
        Sexpr::string(&data.title),
        Sexpr::list(vec![Sexpr::atom("version"), Sexpr::atom("20221018")]),
        Sexpr::list(vec![Sexpr::atom("generator"), Sexpr::string("kimport")]),
        Sexpr::list(vec![Sexpr::atom("layer"), Sexpr::string("F.Cu")]),
    ]);
    for element in elements {
        fp.push(element);
    }
    Some(sexpr::to_string(&fp))
}

/// Pad record:
/// `PAD~shape~x~y~width~height~layer~net~number~hole_radius~points~rotation~...`
fn parse_pad(shape: &str, origin: (f64, f64)) -> Option<Sexpr> {
    let fields: Vec<&str> = shape.split('~').collect();
    if fields.first() != Some(&"PAD") {
        return None;
    }
    let pad_shape = fields.get(1).copied().unwrap_or("RECT");
    let x: f64 = fields.get(2)?.parse().ok()?;
    let y: f64 = fields.get(3)?.parse().ok()?;
    let width: f64 = fields.get(4)?.parse().ok()?;
    let height: f64 = fields.get(5)?.parse().ok()?;
    let number = fields.get(8).copied().unwrap_or("");
    let hole_radius: f64 = fields
        .get(9)
        .and_then(|v| v.parse().ok())
        .unwrap_or(0.0);
    let rotation: f64 = fields
        .get(11)
        .and_then(|v| v.parse().ok())
        .unwrap_or(0.0);

    let ki_x = round2((x - origin.0) * UNIT_TO_MM);
    let ki_y = round2((y - origin.1) * UNIT_TO_MM);
    let size_x = round2((width * UNIT_TO_MM).max(0.01));
    let size_y = round2((height * UNIT_TO_MM).max(0.01));

    let shape_token = match pad_shape {
        "ELLIPSE" => "circle",
        "OVAL" => "oval",
        _ => "rect",
    };

    let mut pad = vec![
        Sexpr::atom("pad"),
        Sexpr::string(number),
        Sexpr::atom(if hole_radius > 0.0 {
            "thru_hole"
        } else {
            "smd"
        }),
        Sexpr::atom(if hole_radius > 0.0 && pad_shape == "RECT" {
            "rect"
        } else if hole_radius > 0.0 {
            "circle"
        } else {
            shape_token
        }),
        Sexpr::list(vec![
            Sexpr::atom("at"),
            Sexpr::num(ki_x),
            Sexpr::num(ki_y),
            Sexpr::num(rotation),
        ]),
        Sexpr::list(vec![
            Sexpr::atom("size"),
            Sexpr::num(size_x),
            Sexpr::num(size_y),
        ]),
    ];
    if hole_radius > 0.0 {
        pad.push(Sexpr::list(vec![
            Sexpr::atom("drill"),
            Sexpr::num(round2(hole_radius * 2.0 * UNIT_TO_MM)),
        ]));
        pad.push(Sexpr::list(vec![
            Sexpr::atom("layers"),
            Sexpr::string("*.Cu"),
            Sexpr::string("*.Mask"),
        ]));
    } else {
        pad.push(Sexpr::list(vec![
            Sexpr::atom("layers"),
            Sexpr::string("F.Cu"),
            Sexpr::string("F.Paste"),
            Sexpr::string("F.Mask"),
        ]));
    }
    Some(Sexpr::list(pad))
}

/// Track record: `TRACK~width~layer~net~x1 y1 x2 y2 ...~id`, rendered as
/// silkscreen line segments.
fn parse_track(shape: &str, origin: (f64, f64)) -> Option<Vec<Sexpr>> {
    let fields: Vec<&str> = shape.split('~').collect();
    if fields.first() != Some(&"TRACK") {
        return None;
    }
    let width: f64 = fields.get(1).and_then(|v| v.parse().ok()).unwrap_or(0.254);
    let coords: Vec<f64> = fields
        .get(4)?
        .split_whitespace()
        .filter_map(|v| v.parse().ok())
        .collect();

    let mut lines = Vec::new();
    for pair in coords.chunks(2).collect::<Vec<_>>().windows(2) {
        let (a, b) = (pair[0], pair[1]);
        if a.len() < 2 || b.len() < 2 {
            continue;
        }
        lines.push(Sexpr::list(vec![
            Sexpr::atom("fp_line"),
            Sexpr::list(vec![
                Sexpr::atom("start"),
                Sexpr::num(round2((a[0] - origin.0) * UNIT_TO_MM)),
                Sexpr::num(round2((a[1] - origin.1) * UNIT_TO_MM)),
            ]),
            Sexpr::list(vec![
                Sexpr::atom("end"),
                Sexpr::num(round2((b[0] - origin.0) * UNIT_TO_MM)),
                Sexpr::num(round2((b[1] - origin.1) * UNIT_TO_MM)),
            ]),
            Sexpr::list(vec![
                Sexpr::atom("stroke"),
                Sexpr::list(vec![
                    Sexpr::atom("width"),
                    Sexpr::num(round2((width * UNIT_TO_MM).max(0.01))),
                ]),
                Sexpr::list(vec![Sexpr::atom("type"), Sexpr::atom("solid")]),
            ]),
            Sexpr::list(vec![Sexpr::atom("layer"), Sexpr::string("F.SilkS")]),
        ]));
    }
    Some(lines)
}

fn round2(v: f64) -> f64 {
    (v * 100.0).round() / 100.0
}
