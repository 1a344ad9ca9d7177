//! Upgrading legacy symbol libraries to the current format.
//!
//! The built-in converter handles the common case without external
//! tooling. When a local KiCad installation is available, [`KicadCli`]
//! delegates to `kicad-cli sym upgrade` instead, which covers exotic
//! legacy constructs the built-in converter skips.

use std::fs;
use std::process::Command;

use crate::error::{ImportError, Result};
use crate::legacy;
use crate::sexpr::{self, Sexpr};

/// Minimum KiCad version whose CLI supports `sym upgrade`.
const MIN_CLI_VERSION: (u32, u32, u32) = (8, 0, 4);

/// Turns legacy `.lib` text into current `.kicad_sym` text.
pub trait SymbolUpgrader: Sync {
    fn upgrade(&self, legacy_lib_text: &str) -> Result<String>;
}

/// Pure-Rust conversion of the legacy format.
#[derive(Debug, Default)]
pub struct BuiltinUpgrader;

impl SymbolUpgrader for BuiltinUpgrader {
    fn upgrade(&self, legacy_lib_text: &str) -> Result<String> {
        let symbols = legacy::convert_symbol_lib(legacy_lib_text)?;
        let mut lib = Sexpr::list(vec![
            Sexpr::atom("kicad_symbol_lib"),
            Sexpr::list(vec![Sexpr::atom("version"), Sexpr::atom("20211014")]),
            Sexpr::list(vec![Sexpr::atom("generator"), Sexpr::string("kimport")]),
        ]);
        for symbol in symbols {
            lib.push(symbol);
        }
        Ok(sexpr::to_string(&lib))
    }
}

/// Wrapper around the external `kicad-cli` executable.
#[derive(Debug, Clone)]
pub struct KicadCli {
    program: String,
}

impl Default for KicadCli {
    fn default() -> Self {
        KicadCli {
            program: "kicad-cli".to_string(),
        }
    }
}

impl KicadCli {
    pub fn new() -> KicadCli {
        KicadCli::default()
    }

    pub fn with_program(program: impl Into<String>) -> KicadCli {
        KicadCli {
            program: program.into(),
        }
    }

    /// Reported version, if the executable runs at all.
    pub fn version(&self) -> Option<(u32, u32, u32)> {
        let output = Command::new(&self.program).arg("version").output().ok()?;
        if !output.status.success() {
            return None;
        }
        let text = String::from_utf8_lossy(&output.stdout);
        parse_version(text.trim())
    }

    /// Whether a usable installation is present.
    pub fn exists(&self) -> bool {
        match self.version() {
            Some(v) if v >= MIN_CLI_VERSION => true,
            Some(v) => {
                log::warn!(
                    "{} {}.{}.{} is older than the required {}.{}.{}",
                    self.program,
                    v.0,
                    v.1,
                    v.2,
                    MIN_CLI_VERSION.0,
                    MIN_CLI_VERSION.1,
                    MIN_CLI_VERSION.2
                );
                false
            }
            None => false,
        }
    }
}

impl SymbolUpgrader for KicadCli {
    fn upgrade(&self, legacy_lib_text: &str) -> Result<String> {
        let dir = tempfile::tempdir()?;
        let input = dir.path().join("upgrade.lib");
        let output = dir.path().join("upgrade.kicad_sym");
        fs::write(&input, legacy_lib_text)?;

        let status = Command::new(&self.program)
            .arg("sym")
            .arg("upgrade")
            .arg(&input)
            .arg("-o")
            .arg(&output)
            .status()
            .map_err(|e| ImportError::Other(format!("cannot run {}: {e}", self.program)))?;
        if !status.success() {
            return Err(ImportError::Other(format!(
                "{} sym upgrade exited with {status}",
                self.program
            )));
        }
        Ok(fs::read_to_string(&output)?)
    }
}

fn parse_version(text: &str) -> Option<(u32, u32, u32)> {
    // The tool prints e.g. "8.0.4" or "8.0.4-rc1", sometimes with a
    // leading product name.
    let token = text.split_whitespace().last()?;
    let core = token.split(|c: char| c == '-' || c == '+').next()?;
    let mut parts = core.split('.');
    let major = parts.next()?.parse().ok()?;
    let minor = parts.next()?.parse().ok()?;
    let patch = parts.next().and_then(|p| p.parse().ok()).unwrap_or(0);
    Some((major, minor, patch))
}

#[cfg(test)]
mod tests {
    use super::*;

    const LEGACY: &str = "EESchema-LIBRARY Version 2.4\n\
#\nDEF R1 R 0 40 Y Y 1 F N\n\
F0 \"R\" 0 0 50 H V C CNN\n\
F1 \"R1\" 0 0 50 H V C CNN\n\
DRAW\n\
X ~ 1 0 100 50 D 50 50 1 1 P\n\
ENDDRAW\nENDDEF\n";

    #[test]
    fn builtin_upgrader_produces_parsable_library() {
        let text = BuiltinUpgrader.upgrade(LEGACY).unwrap();
        let lib = sexpr::parse(&text).unwrap();
        assert_eq!(lib.tag(), Some("kicad_symbol_lib"));
        let sym = lib.find("symbol").unwrap();
        assert_eq!(sym.entry_name(), Some("R1"));
    }

    #[test]
    fn builtin_upgrader_rejects_non_legacy_input() {
        assert!(BuiltinUpgrader.upgrade("(kicad_symbol_lib)").is_err());
    }

    #[test]
    fn version_strings_parse() {
        assert_eq!(parse_version("8.0.4"), Some((8, 0, 4)));
        assert_eq!(parse_version("9.0.0-rc2"), Some((9, 0, 0)));
        assert_eq!(parse_version("KiCad 8.0.5"), Some((8, 0, 5)));
        assert_eq!(parse_version("garbage"), None);
    }

    #[test]
    fn missing_executable_does_not_exist() {
        assert!(!KicadCli::with_program("kicad-cli-definitely-missing").exists());
    }
}
