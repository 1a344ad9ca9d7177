//! Path resolution for cross-references between the three artifact kinds.
//!
//! Footprints store their 3D-model reference and symbols store their
//! footprint reference as portable strings. Both are computed here, never
//! ad hoc, so every link in a library goes through one naming scheme.
//! Pure functions, no I/O, always forward slashes.

/// Variable the project-local mode expands against.
pub const PROJECT_VAR: &str = "KIPRJMOD";
/// Default variable for the global shared library folder.
pub const DEFAULT_GLOBAL_VAR: &str = "KICAD_3RD_PARTY";
/// Name of the shared 3D-asset directory under the library root.
pub const SHAPES_DIR: &str = "3dshapes";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PathMode {
    /// Paths rooted at a user-configured shared folder, referenced by a
    /// named path variable.
    Global { variable: String },
    /// Paths rooted at the current project directory, optionally under a
    /// subfolder.
    ProjectLocal { subfolder: Option<String> },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathResolver {
    mode: PathMode,
}

impl PathResolver {
    pub fn new(mode: PathMode) -> PathResolver {
        PathResolver { mode }
    }

    pub fn global(variable: impl Into<String>) -> PathResolver {
        PathResolver::new(PathMode::Global {
            variable: variable.into(),
        })
    }

    pub fn project_local(subfolder: Option<String>) -> PathResolver {
        PathResolver::new(PathMode::ProjectLocal { subfolder })
    }

    fn base(&self) -> String {
        match &self.mode {
            PathMode::Global { variable } => format!("${{{variable}}}"),
            PathMode::ProjectLocal { subfolder } => match subfolder {
                Some(sub) => format!("${{{PROJECT_VAR}}}/{}", sub.replace('\\', "/")),
                None => format!("${{{PROJECT_VAR}}}"),
            },
        }
    }

    /// Path a footprint stores for its 3D-model asset.
    pub fn model_path(&self, model_file_name: &str) -> String {
        format!("{}/{SHAPES_DIR}/{model_file_name}", self.base())
    }

    /// Reference a symbol stores for its footprint.
    pub fn footprint_ref(&self, lib_name: &str, footprint_name: &str) -> String {
        format!("{lib_name}:{footprint_name}")
    }
}

impl Default for PathResolver {
    fn default() -> Self {
        PathResolver::global(DEFAULT_GLOBAL_VAR)
    }
}
