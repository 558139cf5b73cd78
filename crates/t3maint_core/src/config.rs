use std::env;
use std::fs;
use std::path::Path;

use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};

pub const DEFAULT_STORAGE_ROOT: &str = "fileadmin";

#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq, Eq)]
pub struct ToolConfig {
    #[serde(default)]
    pub storage: StorageSection,
}

#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq, Eq)]
pub struct StorageSection {
    pub root: Option<String>,
}

impl ToolConfig {
    /// Resolve the storage root directory name: env > config > default.
    pub fn storage_root(&self) -> String {
        if let Ok(value) = env::var("T3MAINT_STORAGE_ROOT") {
            let trimmed = value.trim().to_string();
            if !trimmed.is_empty() {
                return trimmed;
            }
        }
        self.storage
            .root
            .clone()
            .unwrap_or_else(|| DEFAULT_STORAGE_ROOT.to_string())
    }
}

/// Load and parse a ToolConfig from a TOML file. Returns default if the file
/// doesn't exist.
pub fn load_config(config_path: &Path) -> Result<ToolConfig> {
    if !config_path.exists() {
        return Ok(ToolConfig::default());
    }
    let content = fs::read_to_string(config_path)
        .with_context(|| format!("failed to read {}", config_path.display()))?;
    let parsed: ToolConfig = toml::from_str(&content)
        .with_context(|| format!("failed to parse {}", config_path.display()))?;
    Ok(parsed)
}

/// One configured site language; only the base path matters here. Language
/// id 0 is the default language and carries no distinguishing prefix.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SiteLanguage {
    pub language_id: i64,
    pub base_path: String,
}

#[derive(Debug, Clone, Deserialize)]
struct SiteConfigFile {
    #[serde(default)]
    languages: Vec<SiteLanguageEntry>,
}

#[derive(Debug, Clone, Deserialize)]
struct SiteLanguageEntry {
    #[serde(rename = "languageId")]
    language_id: i64,
    base: Option<String>,
}

/// Loads the language set of one site from
/// `<sites_dir>/<identifier>/config.yaml`. A missing or unparseable site is
/// an error: language disambiguation is meaningless without it.
pub fn load_site_languages(sites_dir: &Path, identifier: &str) -> Result<Vec<SiteLanguage>> {
    let identifier = identifier.trim();
    if identifier.is_empty() {
        bail!("site identifier must not be empty");
    }
    let config_path = sites_dir.join(identifier).join("config.yaml");
    if !config_path.exists() {
        bail!(
            "site configuration not found: {} (expected {})",
            identifier,
            config_path.display()
        );
    }
    let content = fs::read_to_string(&config_path)
        .with_context(|| format!("failed to read {}", config_path.display()))?;
    let parsed: SiteConfigFile = serde_yaml::from_str(&content)
        .with_context(|| format!("failed to parse {}", config_path.display()))?;

    Ok(parsed
        .languages
        .into_iter()
        .map(|entry| SiteLanguage {
            language_id: entry.language_id,
            base_path: base_path_of(entry.base.as_deref().unwrap_or("/")),
        })
        .collect())
}

/// Reduces a language base (`/en/` or `https://example.com/en`) to its path
/// component, normalized to leading and trailing slashes.
fn base_path_of(base: &str) -> String {
    let trimmed = base.trim();
    let path = match trimmed.find("://") {
        Some(scheme_end) => {
            let rest = &trimmed[scheme_end + 3..];
            match rest.find('/') {
                Some(slash) => &rest[slash..],
                None => "/",
            }
        }
        None => trimmed,
    };
    let inner = path.trim_matches('/');
    if inner.is_empty() {
        "/".to_string()
    } else {
        format!("/{inner}/")
    }
}
