//! Compilation of Schematron rules files into cached validating stylesheets.
//!
//! Cache layout under the store root:
//!
//! ```text
//! <root>/schematron_message.xsl                      support assets
//! <root>/schematron_skeleton.xsl
//! <root>/<rules.sch>-<digest>/srv/rules/rules.xsl    compiled artifact
//! <root>/<rules.sch>-<digest>/srv/rules/lookup.xml   document('lookup.xml')
//! <root>/<rules.sch>-<digest>/srv/shared/codes.xml   document('../shared/codes.xml')
//! ```
//!
//! Inside its digest directory an entry mirrors the absolute locations of the rules
//! file and of every dependency, so a relative `document()` call evaluated from the
//! artifact lands on the cached copy, including references that climb out of the
//! rules directory.

use std::path::{Component, Path, PathBuf};
use std::sync::{Arc, Mutex};

use moka::sync::Cache;
use tracing::{debug, info};

use crate::assets::ResourceMaterializer;
use crate::cache::ContentCacheStore;
use crate::dependency::{DependencyTracker, normalize_lexically};
use crate::error::{Error, Result};
use crate::transform::{TransformEngine, TransformRunner};

/// A `document(...)` dependency after caching
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CachedDependency {
    pub source: PathBuf,
    /// Where the compiled stylesheet will read it from
    pub cached: PathBuf,
    /// Whether this call copied it
    pub refreshed: bool,
}

/// Result of [`SchematronCompiler::compile`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompiledRules {
    pub rules_file: PathBuf,
    pub artifact: PathBuf,
    pub dependencies: Vec<CachedDependency>,
    /// Whether the transform engine ran during this call
    pub recompiled: bool,
}

/// Produces ready-to-run stylesheets from rules files, recompiling only when the
/// cached artifact is stale.
pub struct SchematronCompiler<E: TransformEngine> {
    store: ContentCacheStore,
    tracker: DependencyTracker,
    materializer: ResourceMaterializer,
    engine: Arc<E>,
    /// One lock per absolute rules path, held from the staleness check to the commit
    compile_locks: Cache<PathBuf, Arc<Mutex<()>>>,
}

impl<E: TransformEngine> SchematronCompiler<E> {
    pub fn new(store: ContentCacheStore, engine: Arc<E>) -> Self {
        Self {
            store,
            tracker: DependencyTracker::default(),
            materializer: ResourceMaterializer::new(),
            engine,
            compile_locks: Cache::builder().max_capacity(1024).build(),
        }
    }

    pub fn store(&self) -> &ContentCacheStore {
        &self.store
    }

    pub fn tracker(&self) -> &DependencyTracker {
        &self.tracker
    }

    /// Compile `rules_file`, or reuse its cached artifact while it is fresh.
    ///
    /// A failed compilation leaves no artifact behind. Every dependency is copied
    /// next to the artifact, using the same staleness rule.
    pub fn compile(&self, rules_file: &Path) -> Result<CompiledRules> {
        let rules_file = normalize_lexically(&std::path::absolute(rules_file)?);
        if !rules_file.is_file() {
            return Err(Error::FileNotFound { path: rules_file });
        }

        let lock = self
            .compile_locks
            .get_with(rules_file.clone(), || Arc::new(Mutex::new(())));
        // The guard protects no data, so a poisoned lock is still usable.
        let _guard = lock.lock().unwrap_or_else(|poisoned| poisoned.into_inner());

        let meta_stylesheet = self
            .materializer
            .ensure_support_assets_on_disk(self.store.root())?;

        let cache_dir = self.store.unique_cache_path(&rules_file)?;
        let artifact =
            mirrored_path(&rules_file, &cache_dir).with_file_name(artifact_name(&rules_file));

        let recompiled = self.store.is_stale(&artifact, &rules_file)?;
        if recompiled {
            // References may have changed along with the rules.
            self.tracker.invalidate(&rules_file);

            let mut runner = TransformRunner::new(Arc::clone(&self.engine));
            self.store.write_atomic(&rules_file, &artifact, |temp| {
                runner
                    .run_to_file(&meta_stylesheet, &rules_file, temp)
                    .map_err(|error| match error {
                        Error::Validation(failure) => Error::Compilation {
                            rules_file: rules_file.clone(),
                            failure,
                        },
                        other => other,
                    })
            })?;
            info!(rules = %rules_file.display(), artifact = %artifact.display(), "compiled Schematron rules");
        } else {
            debug!(rules = %rules_file.display(), "compiled rules are fresh");
        }

        let dependencies = self.cache_dependencies(&rules_file, &cache_dir)?;

        Ok(CompiledRules {
            rules_file,
            artifact,
            dependencies,
            recompiled,
        })
    }

    fn cache_dependencies(&self, rules_file: &Path, cache_dir: &Path) -> Result<Vec<CachedDependency>> {
        let documents = self.tracker.referenced_documents(rules_file)?;

        let mut dependencies = Vec::with_capacity(documents.len());
        for source in documents.iter() {
            let cached = mirrored_path(source, cache_dir);
            let refreshed = self.store.cache_copy(source, &cached)?;
            if refreshed {
                debug!(source = %source.display(), cached = %cached.display(), "cached rules dependency");
            }
            dependencies.push(CachedDependency {
                source: source.clone(),
                cached,
                refreshed,
            });
        }
        Ok(dependencies)
    }
}

fn artifact_name(rules_file: &Path) -> String {
    let stem = rules_file
        .file_stem()
        .map(|stem| stem.to_string_lossy().into_owned())
        .unwrap_or_else(|| "rules".to_string());
    format!("{}.xsl", stem)
}

/// Position of the absolute, normalized `source` inside `cache_dir`
fn mirrored_path(source: &Path, cache_dir: &Path) -> PathBuf {
    source
        .components()
        .filter_map(|component| match component {
            Component::Normal(segment) => Some(segment),
            _ => None,
        })
        .fold(cache_dir.to_path_buf(), |path, segment| path.join(segment))
}
