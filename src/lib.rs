pub mod archive;
pub mod cancel;
pub mod canonical;
pub mod cli;
pub mod config;
pub mod detect;
pub mod easyeda;
pub mod error;
pub mod fsutil;
pub mod import;
pub mod legacy;
pub mod library;
pub mod migrate;
pub mod parsers;
pub mod pathres;
pub mod sexpr;
pub mod upgrade;
pub mod watcher;

pub use archive::Archive;
pub use cancel::CancelToken;
pub use canonical::{CanonicalPart, PartIdentity};
pub use cli::Cli;
pub use config::ImportConfig;
pub use detect::Provider;
pub use easyeda::EasyedaApi;
pub use error::{ImportError, Result};
pub use import::Importer;
pub use library::{LibraryLocks, MergeOutcome, MergePolicy, MergeReport, Merger, TargetLibrary};
pub use migrate::{MigrationOutcome, MigrationReport, Migrator};
pub use pathres::{PathMode, PathResolver};
pub use upgrade::{BuiltinUpgrader, KicadCli, SymbolUpgrader};
pub use watcher::FolderWatcher;
