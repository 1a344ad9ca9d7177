use clap::Parser;
use std::path::PathBuf;

use crate::config::ImportConfig;
use crate::error::{ImportError, Result};
use crate::library::MergePolicy;
use crate::pathres::{PathMode, DEFAULT_GLOBAL_VAR};

#[derive(Parser, Debug)]
#[command(name = "kimport")]
#[command(version)]
#[command(
    about = "Imports Octopart, Samacsys, UltraLibrarian, Snapeda and EasyEDA parts into KiCad libraries",
    long_about = None
)]
pub struct Cli {
    /// Vendor archive to import (repeatable)
    #[arg(long, value_name = "FILE")]
    pub archive: Vec<PathBuf>,

    /// Import every archive already present in a folder
    #[arg(long, value_name = "DIR")]
    pub folder: Option<PathBuf>,

    /// Watch a download folder and import archives as they arrive
    #[arg(long, value_name = "DIR")]
    pub watch: Option<PathBuf>,

    /// LCSC component ID to fetch from EasyEDA, e.g. C2040 (repeatable)
    #[arg(long, value_name = "ID")]
    pub lcsc: Vec<String>,

    /// Batch mode: read LCSC IDs from a file (one ID per line)
    #[arg(long, value_name = "FILE")]
    pub batch: Option<PathBuf>,

    /// Migrate a legacy library folder to the current layout
    #[arg(long)]
    pub migrate: bool,

    /// Target library folder
    #[arg(short, long, default_value = ".", value_name = "DIR")]
    pub lib_folder: PathBuf,

    /// Overwrite entries that already exist in the target library
    #[arg(long, conflicts_with = "skip_existing")]
    pub overwrite: bool,

    /// Skip entries that already exist instead of reporting a conflict
    #[arg(long)]
    pub skip_existing: bool,

    /// Path variable the libraries are referenced through
    #[arg(long, value_name = "VAR", default_value = DEFAULT_GLOBAL_VAR)]
    pub path_variable: String,

    /// Reference 3D models relative to the project (KIPRJMOD) instead of
    /// the global path variable
    #[arg(long)]
    pub project_relative: bool,

    /// Subfolder under the project directory for project-relative paths
    #[arg(long, value_name = "DIR", requires = "project_relative")]
    pub project_subfolder: Option<String>,

    /// Delegate legacy symbol upgrades to a local kicad-cli installation
    #[arg(long)]
    pub use_kicad_cli: bool,

    /// Number of parallel imports in batch mode (default: 4)
    #[arg(long, default_value = "4")]
    pub parallel: usize,

    /// Continue on error in batch mode (skip failed archives)
    #[arg(long)]
    pub continue_on_error: bool,

    /// Enable debug logging
    #[arg(long)]
    pub debug: bool,
}

impl Cli {
    pub fn validate(&self) -> Result<()> {
        let has_work = !self.archive.is_empty()
            || self.folder.is_some()
            || self.watch.is_some()
            || !self.lcsc.is_empty()
            || self.batch.is_some()
            || self.migrate;
        if !has_work {
            return Err(ImportError::Other(
                "nothing to do: pass --archive, --folder, --watch, --lcsc, --batch or --migrate"
                    .to_string(),
            ));
        }

        for id in &self.lcsc {
            if !id.starts_with('C') || id.len() < 2 {
                return Err(ImportError::Other(format!(
                    "invalid LCSC ID: {id} (expected C followed by digits)"
                )));
            }
        }

        if self.parallel == 0 {
            return Err(ImportError::Other(
                "--parallel must be at least 1".to_string(),
            ));
        }

        Ok(())
    }

    /// All LCSC IDs to process, from --lcsc and the batch file combined.
    pub fn lcsc_ids(&self) -> Result<Vec<String>> {
        let mut ids = self.lcsc.clone();
        if let Some(batch_file) = &self.batch {
            let content = std::fs::read_to_string(batch_file).map_err(|e| {
                ImportError::Other(format!("cannot read batch file: {e}"))
            })?;
            let re = regex::Regex::new(r"C\d+").expect("static pattern");
            let from_file: Vec<String> = re
                .find_iter(&content)
                .map(|m| m.as_str().to_string())
                .collect();
            if from_file.is_empty() {
                return Err(ImportError::Other(
                    "no valid LCSC IDs found in batch file".to_string(),
                ));
            }
            log::info!("loaded {} LCSC IDs from batch file", from_file.len());
            ids.extend(from_file);
        }
        Ok(ids)
    }

    pub fn policy(&self) -> MergePolicy {
        if self.overwrite {
            MergePolicy::Overwrite
        } else if self.skip_existing {
            MergePolicy::Skip
        } else {
            MergePolicy::PromptRequired
        }
    }

    pub fn path_mode(&self) -> PathMode {
        if self.project_relative {
            PathMode::ProjectLocal {
                subfolder: self.project_subfolder.clone(),
            }
        } else {
            PathMode::Global {
                variable: self.path_variable.clone(),
            }
        }
    }

    pub fn config(&self) -> ImportConfig {
        let mut config = ImportConfig::new(&self.lib_folder)
            .with_policy(self.policy())
            .with_path_mode(self.path_mode());
        config.use_kicad_cli = self.use_kicad_cli;
        config
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Cli {
        Cli::try_parse_from(std::iter::once("kimport").chain(args.iter().copied())).unwrap()
    }

    #[test]
    fn requires_a_work_item() {
        assert!(parse(&[]).validate().is_err());
        assert!(parse(&["--migrate"]).validate().is_ok());
        assert!(parse(&["--archive", "x.zip"]).validate().is_ok());
    }

    #[test]
    fn rejects_malformed_lcsc_ids() {
        assert!(parse(&["--lcsc", "C2040"]).validate().is_ok());
        assert!(parse(&["--lcsc", "2040"]).validate().is_err());
        assert!(parse(&["--lcsc", "C"]).validate().is_err());
    }

    #[test]
    fn overwrite_and_skip_are_mutually_exclusive() {
        assert!(Cli::try_parse_from(["kimport", "--overwrite", "--skip-existing"]).is_err());
    }

    #[test]
    fn policy_defaults_to_prompt() {
        assert_eq!(parse(&["--migrate"]).policy(), MergePolicy::PromptRequired);
        assert_eq!(
            parse(&["--migrate", "--overwrite"]).policy(),
            MergePolicy::Overwrite
        );
        assert_eq!(
            parse(&["--migrate", "--skip-existing"]).policy(),
            MergePolicy::Skip
        );
    }

    #[test]
    fn config_carries_the_external_upgrader_flag() {
        assert!(!parse(&["--migrate"]).config().use_kicad_cli);
        assert!(parse(&["--migrate", "--use-kicad-cli"]).config().use_kicad_cli);
    }

    #[test]
    fn path_mode_follows_flags() {
        assert_eq!(
            parse(&["--migrate"]).path_mode(),
            PathMode::Global {
                variable: DEFAULT_GLOBAL_VAR.to_string()
            }
        );
        assert_eq!(
            parse(&[
                "--migrate",
                "--project-relative",
                "--project-subfolder",
                "libs"
            ])
            .path_mode(),
            PathMode::ProjectLocal {
                subfolder: Some("libs".to_string())
            }
        );
    }
}
