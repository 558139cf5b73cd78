use std::collections::HashSet;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ValueSource {
    Flag,
    Env,
    Heuristic,
    Default,
}

impl ValueSource {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Flag => "flag",
            Self::Env => "env",
            Self::Heuristic => "heuristic",
            Self::Default => "default",
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct PathOverrides {
    pub project_root: Option<PathBuf>,
    pub db: Option<PathBuf>,
    pub config: Option<PathBuf>,
    pub tca: Option<PathBuf>,
}

#[derive(Debug, Clone)]
pub struct ResolutionContext {
    pub cwd: PathBuf,
}

impl ResolutionContext {
    pub fn from_process() -> Result<Self> {
        let cwd = env::current_dir().context("failed to read current directory")?;
        Ok(Self { cwd })
    }
}

#[derive(Debug, Clone)]
pub struct ResolvedPaths {
    pub project_root: PathBuf,
    pub state_dir: PathBuf,
    pub config_path: PathBuf,
    pub db_path: PathBuf,
    pub sites_dir: PathBuf,
    pub tca_path: PathBuf,
    pub root_source: ValueSource,
    pub db_source: ValueSource,
    pub config_source: ValueSource,
}

impl ResolvedPaths {
    pub fn diagnostics(&self) -> String {
        format!(
            "project_root={} ({})\nstate_dir={}\nconfig_path={} ({})\ndb_path={} ({})\nsites_dir={}\ntca_path={}",
            normalize_for_display(&self.project_root),
            self.root_source.as_str(),
            normalize_for_display(&self.state_dir),
            normalize_for_display(&self.config_path),
            self.config_source.as_str(),
            normalize_for_display(&self.db_path),
            self.db_source.as_str(),
            normalize_for_display(&self.sites_dir),
            normalize_for_display(&self.tca_path),
        )
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct RuntimeStatus {
    pub project_root_exists: bool,
    pub state_dir_exists: bool,
    pub config_exists: bool,
    pub db_exists: bool,
    pub db_size_bytes: Option<u64>,
    pub sites_dir_exists: bool,
    pub tca_exists: bool,
    pub warnings: Vec<String>,
}

pub fn resolve_paths(
    context: &ResolutionContext,
    overrides: &PathOverrides,
) -> Result<ResolvedPaths> {
    resolve_paths_with_lookup(context, overrides, |key| env::var(key).ok())
}

fn resolve_paths_with_lookup<F>(
    context: &ResolutionContext,
    overrides: &PathOverrides,
    lookup_env: F,
) -> Result<ResolvedPaths>
where
    F: Fn(&str) -> Option<String>,
{
    let (project_root, root_source) = resolve_project_root(context, overrides, &lookup_env);

    let state_dir = project_root.join(".t3maint");
    let sites_dir = project_root.join("config").join("sites");

    let (db_path, db_source) = if let Some(path) = overrides.db.as_deref() {
        (
            absolutize(path, &context.cwd),
            ValueSource::Flag,
        )
    } else if let Some(value) = lookup_env("T3MAINT_DB") {
        (
            absolutize_from_project(Path::new(value.trim()), &project_root),
            ValueSource::Env,
        )
    } else {
        (
            project_root.join("var").join("cms.sqlite"),
            ValueSource::Default,
        )
    };

    let (config_path, config_source) = if let Some(path) = overrides.config.as_deref() {
        (
            absolutize(path, &context.cwd),
            ValueSource::Flag,
        )
    } else if let Some(value) = lookup_env("T3MAINT_CONFIG") {
        (
            absolutize_from_project(Path::new(value.trim()), &project_root),
            ValueSource::Env,
        )
    } else {
        (state_dir.join("config.toml"), ValueSource::Default)
    };

    let tca_path = match overrides.tca.as_deref() {
        Some(path) => absolutize(path, &context.cwd),
        None => project_root.join("var").join("tca.json"),
    };

    Ok(ResolvedPaths {
        project_root,
        state_dir,
        config_path,
        db_path,
        sites_dir,
        tca_path,
        root_source,
        db_source,
        config_source,
    })
}

pub fn inspect_runtime(paths: &ResolvedPaths) -> Result<RuntimeStatus> {
    let project_root_exists = paths.project_root.exists();
    let state_dir_exists = paths.state_dir.exists();
    let config_exists = paths.config_path.exists();
    let sites_dir_exists = paths.sites_dir.exists();
    let tca_exists = paths.tca_path.exists();
    let db_exists = paths.db_path.exists();
    let db_size_bytes = if db_exists {
        let metadata = fs::metadata(&paths.db_path)
            .with_context(|| format!("failed to inspect {}", paths.db_path.display()))?;
        Some(metadata.len())
    } else {
        None
    };

    let mut warnings = Vec::new();
    if !db_exists {
        warnings.push(format!(
            "installation database is missing: {}",
            normalize_for_display(&paths.db_path)
        ));
    }
    if !sites_dir_exists {
        warnings.push(
            "config/sites/ is missing; consolidation needs a site configuration".to_string(),
        );
    }
    if !tca_exists {
        warnings.push(
            "var/tca.json is missing; whole-schema mode (-a) will be unavailable".to_string(),
        );
    }

    Ok(RuntimeStatus {
        project_root_exists,
        state_dir_exists,
        config_exists,
        db_exists,
        db_size_bytes,
        sites_dir_exists,
        tca_exists,
        warnings,
    })
}

#[derive(Debug, Clone)]
pub struct InitReport {
    pub created_dirs: Vec<PathBuf>,
    pub wrote_config: bool,
}

pub fn init_layout(paths: &ResolvedPaths, force: bool) -> Result<InitReport> {
    let mut created_dirs = Vec::new();
    if !paths.state_dir.exists() {
        fs::create_dir_all(&paths.state_dir)
            .with_context(|| format!("failed to create {}", paths.state_dir.display()))?;
        created_dirs.push(paths.state_dir.clone());
    }

    let wrote_config = write_text_file(
        &paths.config_path,
        &render_materialized_config(),
        force,
    )?;

    Ok(InitReport {
        created_dirs,
        wrote_config,
    })
}

pub fn render_materialized_config() -> String {
    "# t3maint runtime configuration (materialized by `t3maint init`)\n\n[storage]\n# Directory name of the default file storage, relative to the project root.\nroot = \"fileadmin\"\n"
        .to_string()
}

fn resolve_project_root<F>(
    context: &ResolutionContext,
    overrides: &PathOverrides,
    lookup_env: &F,
) -> (PathBuf, ValueSource)
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(path) = overrides.project_root.as_deref() {
        return (absolutize(path, &context.cwd), ValueSource::Flag);
    }

    if let Some(value) = lookup_env("T3MAINT_PROJECT_ROOT") {
        return (
            absolutize(Path::new(value.trim()), &context.cwd),
            ValueSource::Env,
        );
    }

    (
        detect_project_root_heuristic(&context.cwd),
        ValueSource::Heuristic,
    )
}

// An installation root is recognized by its site configuration directory or
// by a previous `t3maint init`.
fn detect_project_root_heuristic(cwd: &Path) -> PathBuf {
    let mut seen = HashSet::new();
    for candidate in ancestors(cwd) {
        let key = normalize_for_display(&candidate);
        if !seen.insert(key) {
            continue;
        }
        if candidate.join("config").join("sites").exists() || candidate.join(".t3maint").exists() {
            return candidate;
        }
    }
    cwd.to_path_buf()
}

fn ancestors(path: &Path) -> Vec<PathBuf> {
    let mut out = Vec::new();
    let mut cursor = Some(path);
    while let Some(current) = cursor {
        out.push(current.to_path_buf());
        cursor = current.parent();
    }
    out
}

fn absolutize(path: &Path, base: &Path) -> PathBuf {
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        base.join(path)
    }
}

fn absolutize_from_project(path: &Path, project_root: &Path) -> PathBuf {
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        project_root.join(path)
    }
}

fn write_text_file(path: &Path, content: &str, force: bool) -> Result<bool> {
    if path.exists() && !force {
        return Ok(false);
    }

    let parent = path
        .parent()
        .ok_or_else(|| anyhow::anyhow!("path has no parent: {}", path.display()))?;
    fs::create_dir_all(parent)
        .with_context(|| format!("failed to create parent directory {}", parent.display()))?;
    fs::write(path, content).with_context(|| format!("failed to write {}", path.display()))?;
    Ok(true)
}

pub fn ensure_database_present(paths: &ResolvedPaths) -> Result<()> {
    if !paths.db_path.exists() {
        bail!(
            "installation database not found: {}\nPass --db or set T3MAINT_DB to point at the CMS database.",
            normalize_for_display(&paths.db_path)
        );
    }
    Ok(())
}

pub fn normalize_for_display(path: &Path) -> String {
    path.to_string_lossy().replace('\\', "/")
}
