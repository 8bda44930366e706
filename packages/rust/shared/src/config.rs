//! Application configuration for research-digest.
//!
//! The pipeline reads a single TOML document (by default
//! `research_config.toml` in the working directory). Collector sections are
//! kept opaque here and decoded by the collector that owns them.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize};

use crate::error::{DigestError, Result};
use crate::types::CollectorConfig;

/// Default configuration file name, resolved against the working directory.
pub const DEFAULT_CONFIG_FILE: &str = "research_config.toml";

/// State directory name under the user's home.
const STATE_DIR_NAME: &str = ".research-digest";

/// Database file name inside the state directory.
const STATE_DB_NAME: &str = "state.db";

// ---------------------------------------------------------------------------
// Config structs (matching research_config.toml schema)
// ---------------------------------------------------------------------------

/// Top-level application config, deserialized from TOML.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Where documents land.
    #[serde(default)]
    pub output: OutputConfig,

    /// Dedup ledger location.
    #[serde(default)]
    pub storage: StorageConfig,

    /// Shared HTTP client settings.
    #[serde(default)]
    pub http: HttpConfig,

    /// Post-collection stages.
    #[serde(default)]
    pub processing: ProcessingConfig,

    /// Per-collector sections, keyed by lowercased collector name. Only
    /// `enabled` is interpreted here.
    #[serde(default, deserialize_with = "lowercase_sections")]
    pub collectors: BTreeMap<String, toml::Table>,
}

impl AppConfig {
    /// Split the section for `name` into its `enabled` flag and the opaque
    /// remainder. Returns `None` when the config has no such section.
    pub fn collector_config(&self, name: &str) -> Option<CollectorConfig> {
        let mut options = self.collectors.get(&name.to_lowercase())?.clone();
        let enabled = match options.remove("enabled") {
            Some(toml::Value::Boolean(flag)) => flag,
            Some(other) => {
                tracing::warn!(
                    collector = name,
                    value = %other,
                    "`enabled` is not a boolean, treating collector as disabled"
                );
                false
            }
            None => false,
        };
        Some(CollectorConfig::new(name, enabled, options))
    }
}

/// Collector names are case-insensitive; two sections naming the same
/// collector are rejected.
fn lowercase_sections<'de, D>(
    deserializer: D,
) -> std::result::Result<BTreeMap<String, toml::Table>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = BTreeMap::<String, toml::Table>::deserialize(deserializer)?;
    let mut sections = BTreeMap::new();
    for (name, table) in raw {
        let key = name.to_lowercase();
        if sections.insert(key.clone(), table).is_some() {
            return Err(D::Error::custom(format!(
                "collector `{key}` is configured more than once"
            )));
        }
    }
    Ok(sections)
}

/// `[output]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutputConfig {
    /// Root directory for every run.
    #[serde(default = "default_base_dir")]
    pub base_dir: String,

    /// Partition runs into `<base_dir>/<YYYY-MM-DD>`.
    #[serde(default = "default_true")]
    pub use_date_folders: bool,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            base_dir: default_base_dir(),
            use_date_folders: true,
        }
    }
}

fn default_base_dir() -> String {
    "research_digest".into()
}
fn default_true() -> bool {
    true
}

/// `[storage]` section.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Path to the dedup database. `~/` is expanded.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub db_path: Option<String>,
}

impl StorageConfig {
    /// Resolve the configured path, falling back to [`default_db_path`].
    pub fn resolve_db_path(&self) -> Result<PathBuf> {
        match &self.db_path {
            Some(raw) => expand_home(raw),
            None => default_db_path(),
        }
    }
}

/// `[http]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpConfig {
    /// Timeout applied to every individual request.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    /// User-Agent sent to every source.
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_timeout_secs(),
            user_agent: default_user_agent(),
        }
    }
}

fn default_timeout_secs() -> u64 {
    15
}
fn default_user_agent() -> String {
    concat!("research-digest/", env!("CARGO_PKG_VERSION")).into()
}

/// `[processing]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessingConfig {
    /// Wall-clock limit for each external step.
    #[serde(default = "default_step_timeout")]
    pub step_timeout_secs: u64,

    /// Run the same-run content dedup stage.
    #[serde(default = "default_true")]
    pub deduplicate: bool,

    /// Document-format conversion step.
    #[serde(default)]
    pub convert: ExternalStepConfig,

    /// Note formatting / tagging step.
    #[serde(default)]
    pub format: ExternalStepConfig,

    /// Large-file splitting step.
    #[serde(default)]
    pub split: ExternalStepConfig,
}

impl Default for ProcessingConfig {
    fn default() -> Self {
        Self {
            step_timeout_secs: default_step_timeout(),
            deduplicate: true,
            convert: ExternalStepConfig::default(),
            format: ExternalStepConfig::default(),
            split: ExternalStepConfig::default(),
        }
    }
}

fn default_step_timeout() -> u64 {
    300
}

/// An external command run as a pipeline stage.
///
/// `{input}` and `{output}` inside `args` are replaced with the stage's
/// input and output directories.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExternalStepConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub command: String,
    #[serde(default)]
    pub args: Vec<String>,
}

// ---------------------------------------------------------------------------
// Config loading
// ---------------------------------------------------------------------------

/// Default location of the dedup database (`~/.research-digest/state.db`).
pub fn default_db_path() -> Result<PathBuf> {
    let home =
        dirs::home_dir().ok_or_else(|| DigestError::config("could not determine home directory"))?;
    Ok(home.join(STATE_DIR_NAME).join(STATE_DB_NAME))
}

fn expand_home(raw: &str) -> Result<PathBuf> {
    match raw.strip_prefix("~/") {
        Some(rest) => {
            let home = dirs::home_dir()
                .ok_or_else(|| DigestError::config("could not determine home directory"))?;
            Ok(home.join(rest))
        }
        None => Ok(PathBuf::from(raw)),
    }
}

/// Load the application config from a specific file path.
///
/// A missing or malformed file is an error; the pipeline never runs on
/// implicit defaults.
pub fn load_config_from(path: &Path) -> Result<AppConfig> {
    let content = std::fs::read_to_string(path).map_err(|e| DigestError::io(path, e))?;

    toml::from_str(&content)
        .map_err(|e| DigestError::config(format!("failed to parse {}: {e}", path.display())))
}

/// Write the starter config to `path`. Refuses to overwrite an existing file.
pub fn init_config(path: &Path) -> Result<()> {
    if path.exists() {
        return Err(DigestError::config(format!(
            "{} already exists",
            path.display()
        )));
    }
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent).map_err(|e| DigestError::io(parent, e))?;
    }
    std::fs::write(path, STARTER_CONFIG).map_err(|e| DigestError::io(path, e))?;
    tracing::info!(path = %path.display(), "created starter config file");
    Ok(())
}

const STARTER_CONFIG: &str = r#"# research-digest configuration

[output]
base_dir = "research_digest"
use_date_folders = true

[storage]
# db_path = "~/.research-digest/state.db"

[http]
timeout_secs = 15

[processing]
step_timeout_secs = 300
deduplicate = true

[processing.convert]
enabled = false
command = "./file_converter.py"
args = ["-i", "{input}", "-o", "{output}", "-r"]

[processing.format]
enabled = false
command = "./obsidian_prep.py"
args = ["-i", "{input}", "-r", "-o", "{output}", "--auto-tag"]

[processing.split]
enabled = false
command = "./file_splitter.py"
args = ["{input}", "-o", "{output}"]

[collectors.hackernews]
enabled = true
search_topics = ["rust", "distributed systems"]
min_points = 50
min_comments = 20
max_depth = 3

[collectors.reddit]
enabled = false
time_filter = "week"
subreddits = [
    { name = "rust", min_upvotes = 100, tags = ["programming"] },
]

[collectors.rss]
enabled = false
days_back = 7
feeds = [
    { url = "https://blog.rust-lang.org/feed.xml", name = "Rust Blog", tags = ["rust"] },
]

[collectors.arxiv]
enabled = false
search_queries = ["cat:cs.DC"]
days_back = 30
max_results = 25
"#;
