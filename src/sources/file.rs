//! File-based secret source.
//!
//! Scans a fixed set of candidate files (never directories) for
//! provider tokens. Every candidate path must resolve inside one of the
//! allowed roots (the user's home directory and the working directory by
//! default) and must not contain a `..` segment; anything else is skipped
//! with a warning and never read.

use std::collections::HashSet;
use std::path::{Component, Path, PathBuf};

use async_trait::async_trait;
use tokio::fs;
use tracing::{debug, warn};

use crate::error::Result;
use crate::providers::Provider;
use crate::sources::{DiscoveredSecret, Provenance, SecretSource};
use crate::util::home_dir;

/// Upper bound on how much of any candidate file is read.
const MAX_FILE_BYTES: u64 = 256 * 1024;

pub struct FileSource {
    candidates: Vec<PathBuf>,
    allowed_roots: Vec<PathBuf>,
}

impl FileSource {
    /// The standard candidate set under home and the working directory.
    pub fn new() -> Self {
        let home = PathBuf::from(home_dir());
        let cwd = std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."));
        let candidates = vec![
            cwd.join(".env"),
            home.join(".env"),
            home.join(".config").join("keywarden").join("keys.json"),
            home.join(".keywarden").join("keys.json"),
        ];
        Self {
            candidates,
            allowed_roots: vec![home, cwd],
        }
    }

    /// Explicit candidates and roots (used by tests and embedders).
    pub fn with_paths(candidates: Vec<PathBuf>, allowed_roots: Vec<PathBuf>) -> Self {
        Self {
            candidates,
            allowed_roots,
        }
    }

    /// Check one candidate against the traversal policy. Returns the
    /// canonical path to read, or `None` when the candidate must be
    /// skipped.
    async fn resolve_allowed(&self, candidate: &Path) -> Option<PathBuf> {
        if candidate.components().any(|c| c == Component::ParentDir) {
            warn!(
                path = %candidate.display(),
                "rejecting search path containing a parent-directory segment"
            );
            return None;
        }

        // Missing candidates are the common case, not a policy violation.
        let resolved = match fs::canonicalize(candidate).await {
            Ok(resolved) => resolved,
            Err(_) => return None,
        };

        for root in &self.allowed_roots {
            if let Ok(root) = fs::canonicalize(root).await {
                if resolved.starts_with(&root) {
                    return Some(resolved);
                }
            }
        }

        warn!(
            path = %candidate.display(),
            "rejecting search path outside the allowed roots"
        );
        None
    }

    async fn scan_file(&self, path: &Path) -> Result<Vec<DiscoveredSecret>> {
        let metadata = fs::metadata(path).await?;
        if !metadata.is_file() {
            return Ok(Vec::new());
        }
        if metadata.len() > MAX_FILE_BYTES {
            warn!(
                path = %path.display(),
                size = metadata.len(),
                "skipping oversized candidate file"
            );
            return Ok(Vec::new());
        }

        let contents = fs::read_to_string(path).await?;
        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default();

        let mut found = if file_name.ends_with(".json") {
            extract_from_json(&contents)
        } else if file_name.ends_with(".env") {
            extract_from_env_format(&contents)
        } else {
            extract_by_pattern(&contents)
        };

        // One candidate per provider per file.
        let mut seen: HashSet<Provider> = HashSet::new();
        found.retain(|(provider, _)| seen.insert(*provider));

        Ok(found
            .into_iter()
            .map(|(provider, value)| {
                DiscoveredSecret::new(provider, value, Provenance::File)
                    .with_detail(path.display().to_string())
            })
            .collect())
    }
}

impl Default for FileSource {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SecretSource for FileSource {
    fn name(&self) -> &'static str {
        "file"
    }

    fn provenance(&self) -> Provenance {
        Provenance::File
    }

    async fn discover(&self) -> Result<Vec<DiscoveredSecret>> {
        let mut secrets = Vec::new();
        for candidate in &self.candidates {
            let Some(resolved) = self.resolve_allowed(candidate).await else {
                continue;
            };
            match self.scan_file(&resolved).await {
                Ok(mut found) => {
                    debug!(path = %resolved.display(), count = found.len(), "scanned candidate file");
                    secrets.append(&mut found);
                }
                Err(e) => {
                    warn!(path = %resolved.display(), error = %e, "failed to scan candidate file");
                }
            }
        }
        Ok(secrets)
    }
}

/// Map a config key (JSON or dotenv) to the provider it names.
fn provider_for_key(key: &str) -> Option<Provider> {
    let normalized = key.trim().to_lowercase();
    for provider in Provider::ALL {
        if normalized == provider.id()
            || normalized == provider.env_var_name().to_lowercase()
            || normalized == format!("{}_api_key", provider.id())
        {
            return Some(*provider);
        }
    }
    None
}

/// Walk a JSON document for string entries whose keys name a provider and
/// whose values match that provider's token shape.
fn extract_from_json(contents: &str) -> Vec<(Provider, String)> {
    let Ok(root) = serde_json::from_str::<serde_json::Value>(contents) else {
        return Vec::new();
    };
    let mut found = Vec::new();
    walk_json(&root, &mut found);
    found
}

fn walk_json(value: &serde_json::Value, found: &mut Vec<(Provider, String)>) {
    if let Some(object) = value.as_object() {
        for (key, entry) in object {
            match entry {
                serde_json::Value::String(raw) => {
                    if let Some(provider) = provider_for_key(key) {
                        if provider.matches_token(raw) {
                            found.push((provider, raw.clone()));
                        }
                    }
                }
                nested => walk_json(nested, found),
            }
        }
    }
}

/// Parse `KEY=VALUE` lines, matching keys against the provider variable
/// table and values against token shapes.
fn extract_from_env_format(contents: &str) -> Vec<(Provider, String)> {
    let mut found = Vec::new();
    for line in contents.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let Some((key, value)) = line.split_once('=') else {
            continue;
        };
        let key = key.trim().trim_start_matches("export ").trim();
        let value = value.trim().trim_matches('"').trim_matches('\'');
        if value.is_empty() {
            continue;
        }
        if let Some(provider) = provider_for_key(key) {
            if provider.matches_token(value) {
                found.push((provider, value.to_string()));
            }
        }
    }
    found
}

/// Last resort for unknown extensions: search the text for well-known
/// token shapes directly.
fn extract_by_pattern(contents: &str) -> Vec<(Provider, String)> {
    let mut found = Vec::new();
    for provider in Provider::ALL {
        let Some(anchored) = provider.scan_pattern() else {
            continue;
        };
        let search = anchored.trim_start_matches('^').trim_end_matches('$');
        let Ok(re) = regex::Regex::new(search) else {
            continue;
        };
        if let Some(m) = re.find(contents) {
            found.push((*provider, m.as_str().to_string()));
        }
    }
    found
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn openai_key() -> String {
        format!("sk-{}", "a".repeat(48))
    }

    fn source_rooted_at(dir: &TempDir, candidates: Vec<PathBuf>) -> FileSource {
        FileSource::with_paths(candidates, vec![dir.path().to_path_buf()])
    }

    #[tokio::test]
    async fn parses_env_style_files() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join(".env");
        std::fs::write(
            &path,
            format!(
                "# keys\nexport OPENAI_API_KEY=\"{}\"\nUNRELATED=other\n",
                openai_key()
            ),
        )
        .unwrap();

        let source = source_rooted_at(&dir, vec![path]);
        let found = source.discover().await.unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].provider, Provider::OpenAi);
        assert_eq!(found[0].value, openai_key());
        assert_eq!(found[0].provenance, Provenance::File);
    }

    #[tokio::test]
    async fn parses_json_files_including_nested_objects() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("keys.json");
        std::fs::write(
            &path,
            serde_json::json!({
                "providers": { "openai_api_key": openai_key() },
                "cloudflare": "x".repeat(40),
                "note": "not a key"
            })
            .to_string(),
        )
        .unwrap();

        let source = source_rooted_at(&dir, vec![path]);
        let mut providers: Vec<Provider> = source
            .discover()
            .await
            .unwrap()
            .into_iter()
            .map(|s| s.provider)
            .collect();
        providers.sort_by_key(|p| p.id());
        assert_eq!(providers, vec![Provider::Cloudflare, Provider::OpenAi]);
    }

    #[tokio::test]
    async fn scans_generic_text_by_token_shape() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("notes.txt");
        std::fs::write(&path, format!("my key is {} somewhere", openai_key())).unwrap();

        let source = source_rooted_at(&dir, vec![path]);
        let found = source.discover().await.unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].provider, Provider::OpenAi);
    }

    #[tokio::test]
    async fn rejects_paths_with_parent_segments() {
        let dir = TempDir::new().unwrap();
        let sneaky = dir.path().join("sub").join("..").join("secret.txt");
        std::fs::write(dir.path().join("secret.txt"), openai_key()).unwrap();

        let source = source_rooted_at(&dir, vec![sneaky]);
        assert!(source.discover().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn rejects_paths_outside_allowed_roots() {
        let inside = TempDir::new().unwrap();
        let outside = TempDir::new().unwrap();
        let path = outside.path().join("loot.env");
        std::fs::write(&path, format!("OPENAI_API_KEY={}", openai_key())).unwrap();

        // Candidate exists and parses, but lives outside the only root.
        let source = FileSource::with_paths(vec![path], vec![inside.path().to_path_buf()]);
        assert!(source.discover().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn oversized_files_are_skipped() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("huge.txt");
        let mut contents = openai_key();
        contents.push_str(&"x".repeat(MAX_FILE_BYTES as usize));
        std::fs::write(&path, contents).unwrap();

        let source = source_rooted_at(&dir, vec![path]);
        assert!(source.discover().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn missing_candidates_are_not_errors() {
        let dir = TempDir::new().unwrap();
        let source = source_rooted_at(&dir, vec![dir.path().join("absent.json")]);
        assert!(source.discover().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn values_failing_the_token_shape_are_ignored() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join(".env");
        std::fs::write(&path, "OPENAI_API_KEY=not-a-real-token\n").unwrap();

        let source = source_rooted_at(&dir, vec![path]);
        assert!(source.discover().await.unwrap().is_empty());
    }
}
