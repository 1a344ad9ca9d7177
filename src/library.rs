//! Target libraries and the merge engine.
//!
//! A target library is the only durable state of the system: one ordered
//! symbol library file per provider, one footprint file per identity in
//! the provider's `.pretty` folder, and a 3D-asset directory shared by
//! all providers. The merger is the sole writer during imports; all of a
//! merge's file changes go through one [`FsTransaction`] under the
//! library's exclusive lock.

use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex as StdMutex};

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tokio::sync::Mutex;

use crate::cancel::CancelToken;
use crate::canonical::{CanonicalPart, Model3d, PartIdentity};
use crate::config::ImportConfig;
use crate::detect::Provider;
use crate::error::{ImportError, Result};
use crate::fsutil::FsTransaction;
use crate::pathres::SHAPES_DIR;
use crate::sexpr::{self, Sexpr};

/// Conflict resolution chosen by the caller. The engine never makes this
/// decision itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergePolicy {
    /// Leave an existing entry untouched.
    Skip,
    /// Atomically replace the existing symbol/footprint/3D triplet.
    Overwrite,
    /// Report a conflict and write nothing.
    PromptRequired,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeOutcome {
    Added,
    Overwritten,
    AlreadyPresent,
    Conflict,
}

#[derive(Debug, Clone)]
pub struct MergeReport {
    pub identity: PartIdentity,
    pub outcome: MergeOutcome,
    pub message: String,
}

/// Locations of one provider's three co-located artifacts.
#[derive(Debug, Clone)]
pub struct TargetLibrary {
    root: PathBuf,
    name: String,
}

impl TargetLibrary {
    pub fn new(root: impl Into<PathBuf>, provider: Provider) -> TargetLibrary {
        TargetLibrary {
            root: root.into(),
            name: provider.lib_name().to_string(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn symbol_lib_path(&self) -> PathBuf {
        self.root.join(format!("{}.kicad_sym", self.name))
    }

    pub fn pretty_dir(&self) -> PathBuf {
        self.root.join(format!("{}.pretty", self.name))
    }

    pub fn footprint_path(&self, identity_name: &str) -> PathBuf {
        self.pretty_dir().join(format!("{identity_name}.kicad_mod"))
    }

    /// 3D assets are shared across every provider library under the root.
    pub fn shapes_dir(&self) -> PathBuf {
        self.root.join(SHAPES_DIR)
    }

    /// Parse the symbol library file, or produce an empty library tree if
    /// the file does not exist yet.
    pub fn load_symbol_lib(&self) -> Result<Sexpr> {
        let path = self.symbol_lib_path();
        if !path.exists() {
            return Ok(empty_symbol_lib());
        }
        let text = fs::read_to_string(&path)?;
        let tree = sexpr::parse(&text)?;
        if tree.tag() != Some("kicad_symbol_lib") {
            return Err(ImportError::Other(format!(
                "{} is not a symbol library",
                path.display()
            )));
        }
        Ok(tree)
    }

    /// Entry names in file order.
    pub fn symbol_names(&self) -> Result<Vec<String>> {
        Ok(self
            .load_symbol_lib()?
            .find_all("symbol")
            .filter_map(|s| s.entry_name().map(str::to_string))
            .collect())
    }
}

fn empty_symbol_lib() -> Sexpr {
    Sexpr::list(vec![
        Sexpr::atom("kicad_symbol_lib"),
        Sexpr::list(vec![Sexpr::atom("version"), Sexpr::atom("20211014")]),
        Sexpr::list(vec![Sexpr::atom("generator"), Sexpr::string("kimport")]),
    ])
}

/// Sidecar index of the shared 3D-asset directory: content hash to the
/// file that first stored those bytes.
#[derive(Debug, Default, Serialize, Deserialize)]
struct ModelIndex {
    assets: BTreeMap<String, String>,
}

const MODEL_INDEX_FILE: &str = ".kimport-index.json";

struct ModelStore {
    dir: PathBuf,
}

impl ModelStore {
    fn new(dir: PathBuf) -> ModelStore {
        ModelStore { dir }
    }

    fn load_index(&self) -> ModelIndex {
        let path = self.dir.join(MODEL_INDEX_FILE);
        fs::read_to_string(&path)
            .ok()
            .and_then(|text| serde_json::from_str(&text).ok())
            .unwrap_or_default()
    }

    /// Stage the storage of `model` under an identity-based file name,
    /// reusing an existing byte-identical asset when the index knows one.
    /// Returns the file name footprint references should use.
    fn plan_store(
        &self,
        model: &Model3d,
        identity_name: &str,
        txn: &mut FsTransaction,
    ) -> Result<String> {
        let mut index = self.load_index();
        let file_name = format!("{identity_name}.{}", model.extension);
        let target = self.dir.join(&file_name);

        let hash = format!("{:x}", Sha256::digest(&model.bytes));

        // Retire a differently-named asset this identity stored before,
        // e.g. a .step superseded by a .wrl.
        if self.dir.is_dir() {
            for entry in fs::read_dir(&self.dir)? {
                let path = entry?.path();
                let Some(name) = path
                    .file_name()
                    .and_then(|n| n.to_str())
                    .map(str::to_string)
                else {
                    continue;
                };
                if name == file_name || name == MODEL_INDEX_FILE {
                    continue;
                }
                if path.file_stem().and_then(|s| s.to_str()) == Some(identity_name) {
                    index.assets.retain(|_, f| *f != name);
                    txn.stage_remove(&path);
                }
            }
        }

        // This identity may have stored different bytes before; its name
        // must not keep claiming the old content.
        let stale: Vec<String> = index
            .assets
            .iter()
            .filter(|(h, f)| *f == &file_name && **h != hash)
            .map(|(h, _)| h.clone())
            .collect();
        for h in stale {
            index.assets.remove(&h);
        }

        match index.assets.get(&hash) {
            Some(existing) if *existing != file_name => {
                let existing_path = self.dir.join(existing);
                if existing_path.exists() {
                    log::debug!(
                        "3D asset for {identity_name} is byte-identical to {existing}, linking"
                    );
                    txn.stage_link(existing_path, target);
                } else {
                    txn.stage_write(target, model.bytes.clone());
                    index.assets.insert(hash, file_name.clone());
                }
            }
            Some(_) => {
                // Same identity, same bytes: the asset is already there.
                if !target.exists() {
                    txn.stage_write(target, model.bytes.clone());
                }
            }
            None => {
                txn.stage_write(target, model.bytes.clone());
                index.assets.insert(hash, file_name.clone());
            }
        }

        let index_bytes = serde_json::to_vec_pretty(&index)
            .map_err(|e| ImportError::Other(format!("cannot serialize model index: {e}")))?;
        txn.stage_write(self.dir.join(MODEL_INDEX_FILE), index_bytes);
        Ok(file_name)
    }
}

/// Process-wide registry handing out one async lock per target library,
/// shared by the merger and the migration engine. Merges against the
/// same library serialize; different libraries proceed concurrently.
#[derive(Debug, Clone, Default)]
pub struct LibraryLocks {
    inner: Arc<StdMutex<HashMap<PathBuf, Arc<Mutex<()>>>>>,
}

impl LibraryLocks {
    pub fn new() -> LibraryLocks {
        LibraryLocks::default()
    }

    pub fn lock_for(&self, library_file: &Path) -> Arc<Mutex<()>> {
        let mut map = self.inner.lock().expect("lock registry poisoned");
        map.entry(library_file.to_path_buf())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }
}

#[derive(Debug, Clone, Default)]
pub struct Merger {
    locks: LibraryLocks,
}

impl Merger {
    pub fn new() -> Merger {
        Merger::default()
    }

    pub fn with_locks(locks: LibraryLocks) -> Merger {
        Merger { locks }
    }

    pub fn locks(&self) -> &LibraryLocks {
        &self.locks
    }

    /// Merge one canonical part into its provider's target library.
    ///
    /// Appends new identities in insertion order; for existing identities
    /// the outcome is decided entirely by `config.policy`. All writes of
    /// one merge commit or roll back as a unit.
    pub async fn merge(
        &self,
        part: &CanonicalPart,
        config: &ImportConfig,
        cancel: &CancelToken,
    ) -> Result<MergeReport> {
        let library = TargetLibrary::new(&config.lib_root, part.identity.provider);
        let lock = self.locks.lock_for(&library.symbol_lib_path());
        let _guard = lock.lock().await;

        cancel.check()?;

        let mut lib_tree = library.load_symbol_lib()?;
        let entry_name = part.identity.part_number.clone();
        let exists = lib_tree
            .find_all("symbol")
            .any(|s| s.entry_name() == Some(&entry_name));

        let outcome = match (exists, config.policy) {
            (false, _) => MergeOutcome::Added,
            (true, MergePolicy::Skip) => {
                log::info!("{} already present, skipping", part.identity);
                return Ok(MergeReport {
                    identity: part.identity.clone(),
                    outcome: MergeOutcome::AlreadyPresent,
                    message: format!("{} already present in library", part.identity),
                });
            }
            (true, MergePolicy::PromptRequired) => {
                log::info!("{} already present, deferring to caller", part.identity);
                return Ok(MergeReport {
                    identity: part.identity.clone(),
                    outcome: MergeOutcome::Conflict,
                    message: format!(
                        "{} already exists; choose skip or overwrite",
                        part.identity
                    ),
                });
            }
            (true, MergePolicy::Overwrite) => MergeOutcome::Overwritten,
        };

        // The asset directory and its index are shared by every provider
        // library under the root, so model storage needs its own lock.
        // Always taken after the library lock, never before.
        let _shapes_guard = match &part.model {
            Some(_) => Some(
                self.locks
                    .lock_for(&library.shapes_dir())
                    .lock_owned()
                    .await,
            ),
            None => None,
        };

        let mut txn = FsTransaction::new();
        let resolver = config.resolver();

        // 3D asset first so the footprint can reference the stored name.
        let model_file = match &part.model {
            Some(model) => Some(ModelStore::new(library.shapes_dir()).plan_store(
                model,
                &entry_name,
                &mut txn,
            )?),
            None => None,
        };

        let footprint_ref = part.footprint.as_ref().map(|_| {
            resolver.footprint_ref(library.name(), &entry_name)
        });

        if let Some(fp) = &part.footprint {
            let mut fp = fp.clone();
            // Footprint files are named by identity so merge matching and
            // cross-references stay consistent.
            if let Some(items) = fp.node.as_list_mut() {
                if items.len() > 1 {
                    items[1] = Sexpr::string(&entry_name);
                }
            }
            if let (Some(model), Some(file)) = (&part.model, &model_file) {
                fp.set_model_ref(&resolver.model_path(file), &model.transform);
            } else {
                // Without a stored asset any vendor model reference
                // would dangle.
                fp.clear_model_ref();
            }
            txn.stage_write(
                library.footprint_path(&entry_name),
                sexpr::to_string(&fp.node).into_bytes(),
            );
        }

        let mut symbol_node = part.symbol.node.clone();
        if let Some(fp_ref) = &footprint_ref {
            symbol_node.set_property("Footprint", fp_ref);
        }

        replace_or_append_symbol(&mut lib_tree, &entry_name, symbol_node);
        txn.stage_write(
            library.symbol_lib_path(),
            sexpr::to_string(&lib_tree).into_bytes(),
        );

        cancel.check()?;
        txn.commit()?;

        let message = match outcome {
            MergeOutcome::Added => format!("added {}", part.identity),
            MergeOutcome::Overwritten => format!("updated {}", part.identity),
            _ => unreachable!(),
        };
        log::info!("{message}");
        Ok(MergeReport {
            identity: part.identity.clone(),
            outcome,
            message,
        })
    }
}

/// Replace the entry in place (position preserved) or append it, never
/// touching any other entry.
fn replace_or_append_symbol(lib_tree: &mut Sexpr, entry_name: &str, symbol: Sexpr) {
    if let Some(items) = lib_tree.as_list_mut() {
        for child in items.iter_mut() {
            if child.tag() == Some("symbol") && child.entry_name() == Some(entry_name) {
                *child = symbol;
                return;
            }
        }
        items.push(symbol);
    }
}
