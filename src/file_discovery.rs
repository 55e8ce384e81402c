use crate::error::{Error, Result};
use globset::{GlobBuilder, GlobMatcher};
use ignore::WalkBuilder;
use std::path::{Component, Path, PathBuf};
use tracing::{debug, warn};

const URL_PREFIXES: [&str; 3] = ["http://", "https://", "file:"];

/// Turns command line inputs into the list of documents to validate.
///
/// URLs pass through untouched. Local paths are normalized and glob patterns
/// (`*`, `?`, `[...]`, `**`) are expanded against the file system, sorted.
#[derive(Debug, Clone, Default)]
pub struct PathExpander {
    /// Follow symbolic links while walking
    follow_symlinks: bool,
}

impl PathExpander {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_follow_symlinks(mut self, follow: bool) -> Self {
        self.follow_symlinks = follow;
        self
    }

    /// Expand every input, preserving input order
    pub fn expand(&self, inputs: &[String]) -> Result<Vec<String>> {
        let mut documents = Vec::with_capacity(inputs.len());
        for input in inputs {
            self.expand_one(input, &mut documents)?;
        }
        Ok(documents)
    }

    fn expand_one(&self, input: &str, documents: &mut Vec<String>) -> Result<()> {
        if URL_PREFIXES.iter().any(|prefix| input.starts_with(prefix)) {
            documents.push(input.to_string());
            return Ok(());
        }

        let normalized = normalize(input);
        if Path::new(&normalized)
            .components()
            .any(|c| c == Component::ParentDir)
        {
            return Err(Error::UnsupportedPath {
                path: input.to_string(),
                reason: "parent directory references are not allowed".to_string(),
            });
        }

        if !is_pattern(&normalized) {
            documents.push(normalized);
            return Ok(());
        }

        let matches = self.expand_pattern(&normalized)?;
        if matches.is_empty() {
            return Err(Error::FileNotFound {
                path: PathBuf::from(input),
            });
        }
        debug!(pattern = %normalized, matches = matches.len(), "expanded pattern");
        documents.extend(matches);
        Ok(())
    }

    fn expand_pattern(&self, pattern: &str) -> Result<Vec<String>> {
        let matcher = compile_glob(pattern)?;
        let (root, depth) = walk_root(pattern);

        let mut walker = WalkBuilder::new(&root);
        walker
            .standard_filters(false)
            .follow_links(self.follow_symlinks)
            .max_depth(depth);

        let mut matches = Vec::new();
        for entry in walker.build() {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    warn!("Error walking {}: {}", root.display(), e);
                    continue;
                }
            };
            if !entry.file_type().is_some_and(|t| t.is_file()) {
                continue;
            }
            let candidate = normalize(&entry.path().to_string_lossy());
            if matcher.is_match(&candidate) {
                matches.push(candidate);
            }
        }

        matches.sort();
        Ok(matches)
    }
}

/// Local path an input names: `file:` URLs are converted, everything else is
/// taken as is.
pub fn input_path(input: &str) -> Result<PathBuf> {
    if !input.starts_with("file:") {
        return Ok(PathBuf::from(input));
    }
    reqwest::Url::parse(input)
        .ok()
        .and_then(|url| url.to_file_path().ok())
        .ok_or_else(|| Error::UnsupportedPath {
            path: input.to_string(),
            reason: "not a local file URL".to_string(),
        })
}

fn compile_glob(pattern: &str) -> Result<GlobMatcher> {
    GlobBuilder::new(pattern)
        .literal_separator(true)
        .build()
        .map(|glob| glob.compile_matcher())
        .map_err(|e| Error::Config(format!("Invalid glob pattern '{}': {}", pattern, e)))
}

/// Longest literal directory prefix of `pattern`, and how deep below it the
/// pattern can reach (`None` when it contains `**`).
fn walk_root(pattern: &str) -> (PathBuf, Option<usize>) {
    let segments: Vec<&str> = pattern.split('/').collect();
    let literal = segments
        .iter()
        .take_while(|segment| !is_pattern(segment))
        .count();

    let mut root = segments[..literal].join("/");
    if root.is_empty() {
        root = if pattern.starts_with('/') { "/" } else { "." }.to_string();
    }

    let depth = if segments[literal..].contains(&"**") {
        None
    } else {
        Some(segments.len() - literal)
    };
    (PathBuf::from(root), depth)
}

fn is_pattern(path: &str) -> bool {
    path.contains(['*', '?', '['])
}

/// Trim leading `./` and collapse repeated separators
fn normalize(path: &str) -> String {
    let mut normalized = path.to_string();
    while normalized.contains("//") {
        normalized = normalized.replace("//", "/");
    }
    while let Some(rest) = normalized.strip_prefix("./") {
        normalized = rest.to_string();
    }
    normalized
}
