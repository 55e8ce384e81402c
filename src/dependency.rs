//! Discovery of documents a Schematron rules file loads through `document(...)`.
//!
//! The scan is line based on purpose: a `document(...)` call split across lines is
//! not detected. Results are memoized per rules file until explicitly invalidated.

use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::{Component, Path, PathBuf};
use std::sync::{Arc, OnceLock};

use moka::sync::Cache;
use regex::Regex;
use tracing::debug;

use crate::error::{Error, Result};

/// Cached regex for `document('...')` references
static DOCUMENT_CALL_REGEX: OnceLock<Regex> = OnceLock::new();

fn get_document_call_regex() -> &'static Regex {
    DOCUMENT_CALL_REGEX.get_or_init(|| {
        Regex::new(r#"document\(\s*['"]([^'"]+)['"]"#)
            .expect("Failed to compile document() regex")
    })
}

/// Ordered absolute paths referenced by one rules file
pub type DependencySet = Arc<Vec<PathBuf>>;

/// Scans rules files for external document references and memoizes the result
pub struct DependencyTracker {
    memo: Cache<PathBuf, DependencySet>,
}

impl DependencyTracker {
    pub fn new(max_capacity: u64) -> Self {
        Self {
            memo: Cache::builder().max_capacity(max_capacity).build(),
        }
    }

    /// Absolute paths of every document `rules_file` references, in order of appearance.
    ///
    /// Fails if the rules file or any referenced document cannot be read. A missing
    /// dependency would silently change what the rules check, so it is never skipped.
    pub fn referenced_documents(&self, rules_file: &Path) -> Result<DependencySet> {
        let key = std::path::absolute(rules_file)?;
        if let Some(documents) = self.memo.get(&key) {
            return Ok(documents);
        }

        // Entries are inserted whole, so readers never see a partial set.
        let documents = Arc::new(scan(&key)?);
        self.memo.insert(key, Arc::clone(&documents));
        Ok(documents)
    }

    /// Drop the memoized set for `rules_file` so the next lookup rescans it.
    pub fn invalidate(&self, rules_file: &Path) {
        if let Ok(key) = std::path::absolute(rules_file) {
            self.memo.invalidate(&key);
        }
    }

    pub fn is_memoized(&self, rules_file: &Path) -> bool {
        std::path::absolute(rules_file)
            .map(|key| self.memo.contains_key(&key))
            .unwrap_or(false)
    }
}

impl Default for DependencyTracker {
    fn default() -> Self {
        Self::new(1024)
    }
}

fn scan(rules_file: &Path) -> Result<Vec<PathBuf>> {
    let file = File::open(rules_file).map_err(|e| Error::resource_io(rules_file, e))?;
    let base_dir = rules_file.parent().unwrap_or(Path::new("."));
    let regex = get_document_call_regex();

    let mut documents = Vec::new();
    for line in BufReader::new(file).lines() {
        let line = line.map_err(|e| Error::resource_io(rules_file, e))?;
        for caps in regex.captures_iter(&line) {
            let reference = &caps[1];
            if is_url(reference) {
                debug!(reference, "skipping non-file document() reference");
                continue;
            }

            let reference = reference
                .strip_prefix("file://")
                .or_else(|| reference.strip_prefix("file:"))
                .unwrap_or(reference);
            let path = Path::new(reference);
            let resolved = normalize_lexically(&if path.is_absolute() {
                path.to_path_buf()
            } else {
                base_dir.join(path)
            });

            if !resolved.is_file() {
                return Err(Error::resource_io(
                    &resolved,
                    std::io::Error::new(
                        std::io::ErrorKind::NotFound,
                        format!("referenced from {}", rules_file.display()),
                    ),
                ));
            }
            if !documents.contains(&resolved) {
                documents.push(resolved);
            }
        }
    }

    debug!(
        rules = %rules_file.display(),
        count = documents.len(),
        "scanned document() references"
    );
    Ok(documents)
}

/// Drop `.` segments and fold `..` into the preceding segment, without touching
/// the file system.
pub(crate) fn normalize_lexically(path: &Path) -> PathBuf {
    let mut normalized = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => match normalized.components().next_back() {
                Some(Component::Normal(_)) => {
                    normalized.pop();
                }
                // `..` above the root is the root
                Some(Component::RootDir | Component::Prefix(_)) => {}
                _ => normalized.push(component),
            },
            other => normalized.push(other),
        }
    }
    normalized
}

fn is_url(reference: &str) -> bool {
    match reference.split_once("://") {
        Some((scheme, _)) => scheme != "file",
        None => false,
    }
}
