//! One-shot migration of pre-existing library folders to the current
//! layout.
//!
//! Older installations carry `<Lib>.lib`/`<Lib>.dcm` pairs from KiCad v5
//! and current-format files parked under `<Lib>_kicad_sym.kicad_sym`
//! names. A migration run converts those to `<Lib>.kicad_sym`, checks
//! and qualifies the converted symbols' footprint references, moves
//! per-provider `<Lib>.3dshapes/` assets into the shared directory,
//! rewrites footprint 3D references onto the shared asset scheme, and
//! parks the consumed sources in `migration_backup/` so a second run finds nothing
//! to do. All writes of a run commit as one transaction; an unresolvable
//! cross-reference aborts the whole run before anything changes.

use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};

use crate::cancel::CancelToken;
use crate::config::ImportConfig;
use crate::error::{ImportError, Result};
use crate::fsutil::FsTransaction;
use crate::legacy;
use crate::library::LibraryLocks;
use crate::pathres::SHAPES_DIR;
use crate::sexpr::{self, Sexpr};
use crate::upgrade::SymbolUpgrader;

const BACKUP_DIR: &str = "migration_backup";
const RENAMED_SUFFIX: &str = "_kicad_sym";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MigrationState {
    Scanning,
    Converting,
    Relinking,
    Committed,
    Failed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LegacyKind {
    /// KiCad v5 `.lib` with an optional `.dcm` sibling.
    V5Lib,
    /// Current-format file under the interim `<Lib>_kicad_sym.kicad_sym`
    /// name.
    RenamedCurrent,
}

#[derive(Debug, Clone)]
struct Candidate {
    lib_name: String,
    source: PathBuf,
    dcm: Option<PathBuf>,
    kind: LegacyKind,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MigrationOutcome {
    NothingToMigrate,
    Migrated(Vec<String>),
}

#[derive(Debug, Clone)]
pub struct MigrationReport {
    pub outcome: MigrationOutcome,
    pub relinked_footprints: usize,
}

#[derive(Debug, Clone, Default)]
pub struct Migrator {
    locks: LibraryLocks,
}

impl Migrator {
    pub fn new() -> Migrator {
        Migrator::default()
    }

    pub fn with_locks(locks: LibraryLocks) -> Migrator {
        Migrator { locks }
    }

    /// Run the migration over `config.lib_root`.
    pub async fn migrate(
        &self,
        config: &ImportConfig,
        upgrader: &dyn SymbolUpgrader,
        cancel: &CancelToken,
    ) -> Result<MigrationReport> {
        let root = &config.lib_root;
        let mut state = MigrationState::Scanning;
        log::info!("{state:?} {} for legacy libraries", root.display());

        let candidates = scan(root)?;
        let asset_moves = plan_asset_moves(root)?;
        let moved_names: HashSet<String> = asset_moves
            .iter()
            .filter_map(|m| m.to.file_name().map(|n| n.to_string_lossy().into_owned()))
            .collect();
        let relinks = plan_relinks(root, config, &moved_names)?;
        if candidates.is_empty() && relinks.is_empty() && asset_moves.is_empty() {
            log::info!("nothing to migrate");
            return Ok(MigrationReport {
                outcome: MigrationOutcome::NothingToMigrate,
                relinked_footprints: 0,
            });
        }
        cancel.check()?;

        // Serialize against imports touching the same libraries: the
        // conversion targets plus every library whose footprints get
        // relinked, in sorted order, with the shared asset directory
        // always last (the same order the merger uses).
        let mut targets: Vec<PathBuf> = candidates
            .iter()
            .map(|c| root.join(format!("{}.kicad_sym", c.lib_name)))
            .collect();
        for relink in &relinks {
            let stem = relink
                .path
                .parent()
                .and_then(|d| d.file_stem())
                .and_then(|s| s.to_str());
            if let Some(stem) = stem {
                targets.push(root.join(format!("{stem}.kicad_sym")));
            }
        }
        targets.sort();
        targets.dedup();
        let mut guards = Vec::with_capacity(targets.len());
        for target in &targets {
            guards.push(self.locks.lock_for(target).lock_owned().await);
        }
        let _shapes_guard = if asset_moves.is_empty() {
            None
        } else {
            Some(
                self.locks
                    .lock_for(&root.join(SHAPES_DIR))
                    .lock_owned()
                    .await,
            )
        };

        state = MigrationState::Converting;
        let mut txn = FsTransaction::new();
        let mut migrated = Vec::new();
        let backup = root.join(BACKUP_DIR);

        let run = (|| -> Result<()> {
            for candidate in &candidates {
                log::info!(
                    "converting {} ({:?})",
                    candidate.source.display(),
                    candidate.kind
                );
                let mut converted = convert(candidate, upgrader)?;
                resolve_footprint_refs(&mut converted, root, &candidate.lib_name)?;
                txn.stage_write(
                    root.join(format!("{}.kicad_sym", candidate.lib_name)),
                    sexpr::to_string(&converted).into_bytes(),
                );
                txn.stage_move(
                    &candidate.source,
                    backup.join(candidate.source.file_name().unwrap_or_default()),
                );
                if let Some(dcm) = &candidate.dcm {
                    txn.stage_move(dcm, backup.join(dcm.file_name().unwrap_or_default()));
                }
                migrated.push(candidate.lib_name.clone());
            }

            for mv in &asset_moves {
                txn.stage_move(&mv.from, &mv.to);
            }

            state = MigrationState::Relinking;
            for relink in &relinks {
                txn.stage_write(relink.path.clone(), relink.new_text.clone().into_bytes());
            }
            Ok(())
        })();

        if let Err(e) = run {
            state = MigrationState::Failed;
            log::error!("migration aborted in {state:?} state: {e}");
            return Err(e);
        }

        cancel.check()?;
        let relinked = relinks.len();
        txn.commit()?;
        for dir in asset_moves.iter().filter_map(|m| m.from.parent()) {
            // Emptied per-provider asset folders are not worth keeping.
            let _ = fs::remove_dir(dir);
        }
        state = MigrationState::Committed;
        log::info!(
            "migration {state:?}: {} libraries, {relinked} footprints relinked",
            migrated.len()
        );
        Ok(MigrationReport {
            outcome: MigrationOutcome::Migrated(migrated),
            relinked_footprints: relinked,
        })
    }
}

fn scan(root: &Path) -> Result<Vec<Candidate>> {
    let mut found = Vec::new();
    if !root.exists() {
        return Ok(found);
    }
    for entry in fs::read_dir(root)? {
        let path = entry?.path();
        if !path.is_file() {
            continue;
        }
        let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
            continue;
        };
        if let Some(stem) = name.strip_suffix(".lib") {
            let dcm = path.with_extension("dcm");
            found.push(Candidate {
                lib_name: stem.to_string(),
                source: path.clone(),
                dcm: dcm.exists().then_some(dcm),
                kind: LegacyKind::V5Lib,
            });
        } else if let Some(stem) = name.strip_suffix(".kicad_sym") {
            if let Some(lib_name) = stem.strip_suffix(RENAMED_SUFFIX) {
                found.push(Candidate {
                    lib_name: lib_name.to_string(),
                    source: path.clone(),
                    dcm: None,
                    kind: LegacyKind::RenamedCurrent,
                });
            }
        }
    }
    found.sort_by(|a, b| a.lib_name.cmp(&b.lib_name));
    Ok(found)
}

fn convert(candidate: &Candidate, upgrader: &dyn SymbolUpgrader) -> Result<Sexpr> {
    let text = fs::read_to_string(&candidate.source)?;
    let mut tree = match candidate.kind {
        LegacyKind::V5Lib => sexpr::parse(&upgrader.upgrade(&text)?)?,
        LegacyKind::RenamedCurrent => {
            let tree = sexpr::parse(&text)?;
            if tree.tag() != Some("kicad_symbol_lib") {
                return Err(ImportError::Other(format!(
                    "{} is not a symbol library",
                    candidate.source.display()
                )));
            }
            tree
        }
    };
    if let Some(dcm_path) = &candidate.dcm {
        let entries = legacy::parse_dcm(&fs::read_to_string(dcm_path)?);
        if let Some(items) = tree.as_list_mut() {
            for child in items.iter_mut() {
                if child.tag() != Some("symbol") {
                    continue;
                }
                let Some(name) = child.entry_name().map(str::to_string) else {
                    continue;
                };
                if let Some(entry) = entries.get(&name) {
                    if let Some(description) = &entry.description {
                        child.set_property("Description", description);
                    }
                    if let Some(keywords) = &entry.keywords {
                        child.set_property("ki_keywords", keywords);
                    }
                    if let Some(datasheet) = &entry.datasheet {
                        child.set_property("Datasheet", datasheet);
                    }
                }
            }
        }
    }
    Ok(tree)
}

/// Check each converted symbol's footprint reference and qualify bare
/// names against the library's own `.pretty` folder. A reference into a
/// `.pretty` folder under the root must name an existing footprint;
/// references into libraries that do not live under the root are left
/// alone.
fn resolve_footprint_refs(tree: &mut Sexpr, root: &Path, lib_name: &str) -> Result<()> {
    let Some(items) = tree.as_list_mut() else {
        return Ok(());
    };
    for child in items.iter_mut() {
        if child.tag() != Some("symbol") {
            continue;
        }
        let Some(reference) = child.property("Footprint").map(str::to_string) else {
            continue;
        };
        if reference.is_empty() {
            continue;
        }
        match reference.split_once(':') {
            Some((fp_lib, fp_name)) => {
                let pretty = root.join(format!("{fp_lib}.pretty"));
                if !pretty.is_dir() {
                    // Lives in some other library, not ours to check.
                    continue;
                }
                if !pretty.join(format!("{fp_name}.kicad_mod")).is_file() {
                    return Err(ImportError::CrossReferenceUnresolved {
                        entry: child.entry_name().unwrap_or_default().to_string(),
                        reference,
                    });
                }
            }
            None => {
                let own = root
                    .join(format!("{lib_name}.pretty"))
                    .join(format!("{reference}.kicad_mod"));
                if !own.is_file() {
                    return Err(ImportError::CrossReferenceUnresolved {
                        entry: child.entry_name().unwrap_or_default().to_string(),
                        reference,
                    });
                }
                child.set_property("Footprint", &format!("{lib_name}:{reference}"));
            }
        }
    }
    Ok(())
}

struct AssetMove {
    from: PathBuf,
    to: PathBuf,
}

/// Old installations kept one `<Lib>.3dshapes/` folder per provider; their
/// contents consolidate into the shared directory.
fn plan_asset_moves(root: &Path) -> Result<Vec<AssetMove>> {
    let mut moves = Vec::new();
    if !root.exists() {
        return Ok(moves);
    }
    let shared = root.join(SHAPES_DIR);
    for entry in fs::read_dir(root)? {
        let dir = entry?.path();
        if !dir.is_dir() || dir == shared {
            continue;
        }
        let Some(name) = dir.file_name().and_then(|n| n.to_str()) else {
            continue;
        };
        if !name.ends_with(".3dshapes") {
            continue;
        }
        for asset in fs::read_dir(&dir)? {
            let from = asset?.path();
            if !from.is_file() {
                continue;
            }
            let Some(file_name) = from.file_name().map(|n| n.to_os_string()) else {
                continue;
            };
            moves.push(AssetMove {
                to: shared.join(file_name),
                from,
            });
        }
    }
    moves.sort_by(|a, b| a.from.cmp(&b.from));
    Ok(moves)
}

struct Relink {
    path: PathBuf,
    new_text: String,
}

/// Rewrite footprint 3D references that point into any old `3dshapes`
/// location onto the configured path scheme. References to assets that
/// neither exist in the shared directory nor arrive there through a
/// planned move are unresolvable and abort the run.
fn plan_relinks(
    root: &Path,
    config: &ImportConfig,
    incoming: &HashSet<String>,
) -> Result<Vec<Relink>> {
    let mut relinks = Vec::new();
    if !root.exists() {
        return Ok(relinks);
    }
    let resolver = config.resolver();
    let shapes = root.join(SHAPES_DIR);

    for entry in fs::read_dir(root)? {
        let dir = entry?.path();
        if !dir.is_dir() || dir.extension().and_then(|e| e.to_str()) != Some("pretty") {
            continue;
        }
        for fp_entry in fs::read_dir(&dir)? {
            let fp_path = fp_entry?.path();
            if fp_path.extension().and_then(|e| e.to_str()) != Some("kicad_mod") {
                continue;
            }
            let text = fs::read_to_string(&fp_path)?;
            let mut node = sexpr::parse(&text)?;
            let Some(old_ref) = node
                .find("model")
                .and_then(|m| m.as_list()?.get(1)?.as_str())
                .map(str::to_string)
            else {
                continue;
            };
            if !points_into_shapes_dir(&old_ref) {
                // Not one of ours (e.g. a stock KiCad model), leave it.
                continue;
            }
            let file_name = old_ref.rsplit('/').next().unwrap_or(&old_ref).to_string();
            let new_ref = resolver.model_path(&file_name);
            if new_ref == old_ref {
                continue;
            }
            if !shapes.join(&file_name).exists() && !incoming.contains(&file_name) {
                return Err(ImportError::CrossReferenceUnresolved {
                    entry: fp_path
                        .file_stem()
                        .and_then(|s| s.to_str())
                        .unwrap_or_default()
                        .to_string(),
                    reference: old_ref,
                });
            }
            if let Some(model) = node.find_mut("model") {
                if let Some(items) = model.as_list_mut() {
                    items[1] = Sexpr::string(&new_ref);
                }
            }
            relinks.push(Relink {
                path: fp_path,
                new_text: sexpr::to_string(&node),
            });
        }
    }
    Ok(relinks)
}

/// True for paths with a `3dshapes` or `<Provider>.3dshapes` directory
/// segment, the two layouts earlier versions stored assets under.
fn points_into_shapes_dir(reference: &str) -> bool {
    reference
        .split('/')
        .rev()
        .skip(1)
        .any(|seg| seg == SHAPES_DIR || seg.ends_with(".3dshapes"))
}
