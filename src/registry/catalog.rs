//! Supported-model catalog
//!
//! The catalog is data handed to the registry at construction, not
//! branching baked into the load path: adding a model means adding an
//! entry, and tests can run against a synthetic catalog.

/// One supported model: a canonical name plus the HuggingFace artifact
/// that backs it.
#[derive(Debug, Clone)]
pub struct CatalogEntry {
    /// Canonical name callers pass to `localm_load_model`.
    pub name: String,
    /// Alternative spellings accepted case-insensitively.
    pub aliases: Vec<String>,
    /// HuggingFace repository: "TheBloke/Mistral-7B-v0.1-GGUF"
    pub hf_repo: String,
    /// GGUF filename within the repository.
    pub hf_file: String,
    /// Approximate artifact size, for log messages.
    pub size_bytes: u64,
}

/// The set of models this process will agree to load.
#[derive(Debug, Clone)]
pub struct Catalog {
    entries: Vec<CatalogEntry>,
}

impl Catalog {
    pub fn new(entries: Vec<CatalogEntry>) -> Self {
        Self { entries }
    }

    /// The models built into this release.
    pub fn builtin() -> Self {
        Self::new(vec![
            entry(
                "mistral",
                &["mistral-7b", "mistral-7b-v0.1"],
                "TheBloke/Mistral-7B-v0.1-GGUF",
                "mistral-7b-v0.1.Q4_K_M.gguf",
                4_370_000_000,
            ),
            entry(
                "tinyllama",
                &["tiny-llama"],
                "TheBloke/TinyLlama-1.1B-Chat-v1.0-GGUF",
                "tinyllama-1.1b-chat-v1.0.Q4_K_M.gguf",
                670_000_000,
            ),
            entry(
                "qwen3:1.7b",
                &["qwen3-1.7b"],
                "Qwen/Qwen3-1.7B-GGUF",
                "Qwen3-1.7B-Q8_0.gguf",
                2_000_000_000,
            ),
            entry(
                "gpt2",
                &[],
                "ggml-org/models",
                "gpt-2-q8_0.gguf",
                170_000_000,
            ),
        ])
    }

    /// Looks up a model by canonical name, then case-insensitively by
    /// name or alias. Empty names never match.
    pub fn find(&self, name: &str) -> Option<&CatalogEntry> {
        if name.is_empty() {
            return None;
        }
        self.entries
            .iter()
            .find(|e| e.name == name)
            .or_else(|| {
                self.entries.iter().find(|e| {
                    e.name.eq_ignore_ascii_case(name)
                        || e.aliases.iter().any(|a| a.eq_ignore_ascii_case(name))
                })
            })
    }

    pub fn entries(&self) -> &[CatalogEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

fn entry(name: &str, aliases: &[&str], hf_repo: &str, hf_file: &str, size_bytes: u64) -> CatalogEntry {
    CatalogEntry {
        name: name.to_string(),
        aliases: aliases.iter().map(|a| a.to_string()).collect(),
        hf_repo: hf_repo.to_string(),
        hf_file: hf_file.to_string(),
        size_bytes,
    }
}
