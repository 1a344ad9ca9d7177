//! Minimal s-expression reader/writer for KiCad library files.
//!
//! Symbol libraries, footprints and library tables all share the same
//! parenthesized syntax. The engine only ever needs to split, query and
//! patch a handful of nodes (symbol entries, `property` fields, `model`
//! paths), so the tree keeps atoms verbatim instead of interpreting them.

use crate::error::{ImportError, Result};

#[derive(Debug, Clone, PartialEq)]
pub enum Sexpr {
    /// Bare token (identifiers and numbers, kept verbatim).
    Atom(String),
    /// Double-quoted string (stored unescaped).
    Str(String),
    List(Vec<Sexpr>),
}

impl Sexpr {
    pub fn atom(s: impl Into<String>) -> Sexpr {
        Sexpr::Atom(s.into())
    }

    pub fn string(s: impl Into<String>) -> Sexpr {
        Sexpr::Str(s.into())
    }

    /// Number atom with KiCad-style trimmed formatting (no trailing zeros).
    pub fn num(v: f64) -> Sexpr {
        if v == v.trunc() && v.abs() < 1e15 {
            Sexpr::Atom(format!("{}", v as i64))
        } else {
            let mut s = format!("{:.4}", v);
            while s.ends_with('0') {
                s.pop();
            }
            if s.ends_with('.') {
                s.pop();
            }
            Sexpr::Atom(s)
        }
    }

    pub fn list(items: Vec<Sexpr>) -> Sexpr {
        Sexpr::List(items)
    }

    pub fn as_list(&self) -> Option<&[Sexpr]> {
        match self {
            Sexpr::List(items) => Some(items),
            _ => None,
        }
    }

    pub fn as_list_mut(&mut self) -> Option<&mut Vec<Sexpr>> {
        match self {
            Sexpr::List(items) => Some(items),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Sexpr::Atom(s) | Sexpr::Str(s) => Some(s),
            Sexpr::List(_) => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        self.as_str()?.parse().ok()
    }

    /// Tag of a list node, i.e. its leading atom.
    pub fn tag(&self) -> Option<&str> {
        match self.as_list()?.first()? {
            Sexpr::Atom(s) => Some(s),
            _ => None,
        }
    }

    /// First direct child list with the given tag.
    pub fn find(&self, tag: &str) -> Option<&Sexpr> {
        self.as_list()?
            .iter()
            .find(|c| c.tag() == Some(tag))
    }

    pub fn find_mut(&mut self, tag: &str) -> Option<&mut Sexpr> {
        self.as_list_mut()?
            .iter_mut()
            .find(|c| c.tag() == Some(tag))
    }

    pub fn find_all<'a>(&'a self, tag: &'a str) -> impl Iterator<Item = &'a Sexpr> {
        self.as_list()
            .unwrap_or(&[])
            .iter()
            .filter(move |c| c.tag() == Some(tag))
    }

    /// Name of a named node such as `(symbol "NAME" ...)` or
    /// `(footprint "NAME" ...)`.
    pub fn entry_name(&self) -> Option<&str> {
        self.as_list()?.get(1)?.as_str()
    }

    /// Value of a `(property "Key" "Value" ...)` child.
    pub fn property(&self, key: &str) -> Option<&str> {
        self.find_all("property")
            .find(|p| p.entry_name() == Some(key))?
            .as_list()?
            .get(2)?
            .as_str()
    }

    /// Replace the value of a property, or append the property if absent.
    pub fn set_property(&mut self, key: &str, value: &str) {
        if let Some(items) = self.as_list_mut() {
            for child in items.iter_mut() {
                if child.tag() == Some("property") && child.entry_name() == Some(key) {
                    if let Some(fields) = child.as_list_mut() {
                        if fields.len() > 2 {
                            fields[2] = Sexpr::string(value);
                        } else {
                            fields.push(Sexpr::string(value));
                        }
                        return;
                    }
                }
            }
            items.push(property_node(key, value));
        }
    }

    pub fn push(&mut self, child: Sexpr) {
        if let Some(items) = self.as_list_mut() {
            items.push(child);
        }
    }
}

/// Build a full `(property "Key" "Value" (at …) (effects …))` node with
/// the default hidden-field placement.
pub fn property_node(key: &str, value: &str) -> Sexpr {
    Sexpr::list(vec![
        Sexpr::atom("property"),
        Sexpr::string(key),
        Sexpr::string(value),
        Sexpr::list(vec![
            Sexpr::atom("at"),
            Sexpr::num(0.0),
            Sexpr::num(0.0),
            Sexpr::num(0.0),
        ]),
        Sexpr::list(vec![
            Sexpr::atom("effects"),
            Sexpr::list(vec![
                Sexpr::atom("font"),
                Sexpr::list(vec![
                    Sexpr::atom("size"),
                    Sexpr::num(1.27),
                    Sexpr::num(1.27),
                ]),
            ]),
            Sexpr::list(vec![Sexpr::atom("hide"), Sexpr::atom("yes")]),
        ]),
    ])
}

/// Parse the first top-level form of `text`.
pub fn parse(text: &str) -> Result<Sexpr> {
    let mut tokens = Tokenizer::new(text);
    let node = parse_form(&mut tokens)?;
    Ok(node)
}

fn parse_form(tokens: &mut Tokenizer) -> Result<Sexpr> {
    match tokens.next() {
        Some(Token::Open) => {
            let mut items = Vec::new();
            loop {
                match tokens.peek() {
                    Some(Token::Close) => {
                        tokens.next();
                        return Ok(Sexpr::List(items));
                    }
                    Some(_) => items.push(parse_form(tokens)?),
                    None => {
                        return Err(ImportError::Other(
                            "unbalanced parenthesis in s-expression".into(),
                        ));
                    }
                }
            }
        }
        Some(Token::Close) => Err(ImportError::Other(
            "unexpected ')' in s-expression".into(),
        )),
        Some(Token::Str(s)) => Ok(Sexpr::Str(s)),
        Some(Token::Atom(s)) => Ok(Sexpr::Atom(s)),
        None => Err(ImportError::Other("empty s-expression input".into())),
    }
}

#[derive(Debug, Clone)]
enum Token {
    Open,
    Close,
    Atom(String),
    Str(String),
}

struct Tokenizer<'a> {
    chars: std::iter::Peekable<std::str::Chars<'a>>,
    lookahead: Option<Token>,
}

impl<'a> Tokenizer<'a> {
    fn new(text: &'a str) -> Self {
        Tokenizer {
            chars: text.chars().peekable(),
            lookahead: None,
        }
    }

    fn peek(&mut self) -> Option<&Token> {
        if self.lookahead.is_none() {
            self.lookahead = self.scan();
        }
        self.lookahead.as_ref()
    }

    fn next(&mut self) -> Option<Token> {
        if let Some(tok) = self.lookahead.take() {
            return Some(tok);
        }
        self.scan()
    }

    fn scan(&mut self) -> Option<Token> {
        while let Some(&c) = self.chars.peek() {
            if c.is_whitespace() {
                self.chars.next();
            } else {
                break;
            }
        }
        let c = *self.chars.peek()?;
        match c {
            '(' => {
                self.chars.next();
                Some(Token::Open)
            }
            ')' => {
                self.chars.next();
                Some(Token::Close)
            }
            '"' => {
                self.chars.next();
                let mut s = String::new();
                while let Some(c) = self.chars.next() {
                    match c {
                        '"' => break,
                        '\\' => {
                            if let Some(esc) = self.chars.next() {
                                match esc {
                                    'n' => s.push('\n'),
                                    't' => s.push('\t'),
                                    other => s.push(other),
                                }
                            }
                        }
                        other => s.push(other),
                    }
                }
                Some(Token::Str(s))
            }
            _ => {
                let mut s = String::new();
                while let Some(&c) = self.chars.peek() {
                    if c.is_whitespace() || c == '(' || c == ')' || c == '"' {
                        break;
                    }
                    s.push(c);
                    self.chars.next();
                }
                Some(Token::Atom(s))
            }
        }
    }
}

/// Serialize a tree with stable KiCad-style indentation.
pub fn to_string(node: &Sexpr) -> String {
    let mut out = String::new();
    write_node(node, 0, &mut out);
    out.push('\n');
    out
}

fn write_node(node: &Sexpr, depth: usize, out: &mut String) {
    match node {
        Sexpr::Atom(s) => out.push_str(s),
        Sexpr::Str(s) => {
            out.push('"');
            for c in s.chars() {
                match c {
                    '"' => out.push_str("\\\""),
                    '\\' => out.push_str("\\\\"),
                    '\n' => out.push_str("\\n"),
                    other => out.push(other),
                }
            }
            out.push('"');
        }
        Sexpr::List(items) => {
            let nested = items.iter().any(|i| matches!(i, Sexpr::List(_)));
            out.push('(');
            for (idx, item) in items.iter().enumerate() {
                if idx > 0 {
                    if nested && matches!(item, Sexpr::List(_)) {
                        out.push('\n');
                        for _ in 0..=depth {
                            out.push('\t');
                        }
                    } else {
                        out.push(' ');
                    }
                }
                write_node(item, depth + 1, out);
            }
            if nested {
                out.push('\n');
                for _ in 0..depth {
                    out.push('\t');
                }
            }
            out.push(')');
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const LIB: &str = r#"(kicad_symbol_lib
        (version 20211014)
        (generator kimport)
        (symbol "LM358" (property "Footprint" "Samacsys:SOIC8") (pin passive line (at 0 0 0)))
        (symbol "NE555" (property "Footprint" "Samacsys:DIP8"))
    )"#;

    #[test]
    fn parses_nested_lists_and_strings() {
        let lib = parse(LIB).unwrap();
        assert_eq!(lib.tag(), Some("kicad_symbol_lib"));
        let symbols: Vec<_> = lib.find_all("symbol").collect();
        assert_eq!(symbols.len(), 2);
        assert_eq!(symbols[0].entry_name(), Some("LM358"));
        assert_eq!(symbols[0].property("Footprint"), Some("Samacsys:SOIC8"));
    }

    #[test]
    fn round_trips_through_serializer() {
        let lib = parse(LIB).unwrap();
        let text = to_string(&lib);
        let again = parse(&text).unwrap();
        assert_eq!(lib, again);
    }

    #[test]
    fn set_property_updates_in_place() {
        let mut lib = parse(LIB).unwrap();
        let sym = lib.find_mut("symbol").unwrap();
        sym.set_property("Footprint", "Snapeda:QFN16");
        assert_eq!(sym.property("Footprint"), Some("Snapeda:QFN16"));
    }

    #[test]
    fn set_property_appends_when_missing() {
        let mut sym = parse(r#"(symbol "X")"#).unwrap();
        sym.set_property("Datasheet", "http://example.com/ds.pdf");
        assert_eq!(sym.property("Datasheet"), Some("http://example.com/ds.pdf"));
    }

    #[test]
    fn escapes_quotes_in_strings() {
        let node = Sexpr::list(vec![Sexpr::atom("descr"), Sexpr::string("a \"b\" c")]);
        let text = to_string(&node);
        let again = parse(&text).unwrap();
        assert_eq!(again.as_list().unwrap()[1].as_str(), Some("a \"b\" c"));
    }

    #[test]
    fn rejects_unbalanced_input() {
        assert!(parse("(symbol \"X\"").is_err());
    }
}
