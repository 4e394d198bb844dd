use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Canonical list of code-file extensions (without the leading dot,
/// lowercase) the walker considers indexable.
pub const CODE_EXTENSIONS: &[&str] = &[
    "ts", "tsx", "js", "jsx", "mjs", "cjs", "py", "java", "go", "rs", "c", "cpp", "h", "hpp",
    "cs", "rb", "php", "swift", "kt", "scala", "r", "m", "md", "mdx", "txt", "json", "yaml",
    "yml", "toml", "xml", "html", "css", "scss", "sass", "less", "vue", "svelte", "sql", "sh",
    "bash", "zsh", "fish", "ps1", "bat", "cmd", "dockerfile", "makefile", "cmake", "gradle",
    "tf", "hcl", "proto", "graphql", "prisma",
];

/// Basenames (lowercase) that are indexable regardless of extension.
pub const SPECIAL_FILENAMES: &[&str] = &["dockerfile", "makefile", "cmakelists.txt", "gemfile", "rakefile"];

/// Literal glob patterns applied globally during the walk.
pub const GLOBAL_IGNORE_PATTERNS: &[&str] = &[
    "*.lock",
    "*.bin",
    "*.ipynb",
    "*.pyc",
    "*.safetensors",
    "*.sqlite",
    "*.pt",
    "*.whl",
    "*.egg",
    "*.so",
    "*.dll",
    "*.dylib",
    "*.exe",
    "*.o",
    "*.a",
    "*.class",
    "*.jar",
    "*.war",
    "*.min.js",
    "*.min.css",
    "*.map",
    "package-lock.json",
    "yarn.lock",
    "pnpm-lock.yaml",
];

/// Check whether a file extension (without leading dot, lowercase) is on
/// the supported-extensions allowlist.
pub fn is_supported_extension(ext: &str) -> bool {
    CODE_EXTENSIONS.contains(&ext)
}

/// Check whether a basename (already lowercased) is a special indexable
/// filename regardless of extension.
pub fn is_special_filename(name: &str) -> bool {
    SPECIAL_FILENAMES.contains(&name)
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OllamaConfig {
    pub base_url: String,
    pub model: String,
    pub timeout_ms: u64,
    pub retries: u32,
}

impl Default for OllamaConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:11434".to_string(),
            model: "qwen3-embedding:0.6b".to_string(),
            timeout_ms: 30_000,
            retries: 3,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IndexingConfig {
    pub batch_size: usize,
    pub max_file_size_bytes: u64,
    pub concurrency: usize,
}

impl Default for IndexingConfig {
    fn default() -> Self {
        Self {
            batch_size: 10,
            max_file_size_bytes: 1024 * 1024,
            concurrency: 8,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchConfig {
    pub max_results: usize,
    pub show_content: bool,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            max_results: 10,
            show_content: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct IgnoreConfig {
    pub extra_patterns: Vec<String>,
}

/// Root configuration, assembled from (in increasing precedence) built-in
/// defaults, the first matching config file at the repo root, and
/// `WBGREP_*` environment variables.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    pub ollama: OllamaConfig,
    pub indexing: IndexingConfig,
    pub search: SearchConfig,
    pub ignore: IgnoreConfig,
    #[serde(skip)]
    pub data_dir: PathBuf,
}

/// First-match-wins config file basenames, checked at the repo root.
const CONFIG_FILENAMES: &[&str] = &[".wbgreprc", ".wbgreprc.json", "wbgrep.config.json"];

impl Config {
    /// Load configuration for `repo_root`: start from defaults, merge the
    /// first matching config file (if any), then apply `WBGREP_*` env
    /// var overrides. Never fails on a missing or absent file — only a
    /// malformed *present* file is reported.
    pub fn load(repo_root: &Path) -> anyhow::Result<Self> {
        let mut config = Self::from_file(repo_root)?.unwrap_or_default();
        config.apply_env_overrides();
        config.data_dir = repo_root.join(".wb-grep");
        Ok(config)
    }

    fn from_file(repo_root: &Path) -> anyhow::Result<Option<Self>> {
        for name in CONFIG_FILENAMES {
            let path = repo_root.join(name);
            if path.is_file() {
                let text = std::fs::read_to_string(&path)?;
                let config: Config = serde_json::from_str(&text)
                    .map_err(|e| anyhow::anyhow!("failed to parse {}: {}", path.display(), e))?;
                return Ok(Some(config));
            }
        }
        Ok(None)
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(v) = std::env::var("WBGREP_OLLAMA_BASE_URL") {
            self.ollama.base_url = v;
        }
        if let Ok(v) = std::env::var("WBGREP_OLLAMA_MODEL") {
            self.ollama.model = v;
        }
        if let Ok(v) = std::env::var("WBGREP_OLLAMA_TIMEOUT_MS") {
            if let Ok(n) = v.parse() {
                self.ollama.timeout_ms = n;
            }
        }
        if let Ok(v) = std::env::var("WBGREP_OLLAMA_RETRIES") {
            if let Ok(n) = v.parse() {
                self.ollama.retries = n;
            }
        }
        if let Ok(v) = std::env::var("WBGREP_INDEX_BATCH_SIZE") {
            if let Ok(n) = v.parse() {
                self.indexing.batch_size = n;
            }
        }
        if let Ok(v) = std::env::var("WBGREP_MAX_FILE_SIZE") {
            if let Ok(n) = v.parse() {
                self.indexing.max_file_size_bytes = n;
            }
        }
        if let Ok(v) = std::env::var("WBGREP_CONCURRENCY") {
            if let Ok(n) = v.parse() {
                self.indexing.concurrency = n;
            }
        }
        if let Ok(v) = std::env::var("WBGREP_MAX_RESULTS") {
            if let Ok(n) = v.parse() {
                self.search.max_results = n;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_spec() {
        let config = Config::default();
        assert_eq!(config.ollama.base_url, "http://localhost:11434");
        assert_eq!(config.ollama.model, "qwen3-embedding:0.6b");
        assert_eq!(config.indexing.batch_size, 10);
        assert_eq!(config.indexing.max_file_size_bytes, 1024 * 1024);
        assert_eq!(config.indexing.concurrency, 8);
        assert_eq!(config.search.max_results, 10);
    }

    #[test]
    fn load_missing_file_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::load(dir.path()).unwrap();
        assert_eq!(config.ollama.model, "qwen3-embedding:0.6b");
    }

    #[test]
    fn load_parses_first_matching_file() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join(".wbgreprc"),
            r#"{"ollama": {"model": "custom-model"}}"#,
        )
        .unwrap();
        let config = Config::load(dir.path()).unwrap();
        assert_eq!(config.ollama.model, "custom-model");
        // Unset fields keep their defaults.
        assert_eq!(config.ollama.base_url, "http://localhost:11434");
    }
}
