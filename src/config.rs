//! Explicit configuration value threaded into every operation.
//!
//! There is deliberately no process-wide mutable state: tests run many
//! imports with different configurations side by side.

use std::path::PathBuf;

use crate::library::MergePolicy;
use crate::pathres::{PathMode, PathResolver, DEFAULT_GLOBAL_VAR};

#[derive(Debug, Clone)]
pub struct ImportConfig {
    /// Root folder holding the target libraries.
    pub lib_root: PathBuf,
    /// What to do when an identity already exists in a target library.
    pub policy: MergePolicy,
    /// How cross-reference paths are rooted.
    pub path_mode: PathMode,
    /// Delegate legacy symbol library upgrades to the external
    /// `kicad-cli` tool instead of the built-in converter.
    pub use_kicad_cli: bool,
}

impl ImportConfig {
    pub fn new(lib_root: impl Into<PathBuf>) -> ImportConfig {
        ImportConfig {
            lib_root: lib_root.into(),
            policy: MergePolicy::PromptRequired,
            path_mode: PathMode::Global {
                variable: DEFAULT_GLOBAL_VAR.to_string(),
            },
            use_kicad_cli: false,
        }
    }

    pub fn with_policy(mut self, policy: MergePolicy) -> ImportConfig {
        self.policy = policy;
        self
    }

    pub fn with_path_mode(mut self, mode: PathMode) -> ImportConfig {
        self.path_mode = mode;
        self
    }

    pub fn resolver(&self) -> PathResolver {
        PathResolver::new(self.path_mode.clone())
    }
}
