use std::collections::HashSet;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};

pub const STATE_DIR_NAME: &str = ".cholotool";
pub const DB_FILENAME: &str = "cholotool.db";
const WP_CONFIG_FILENAME: &str = "wp-config.php";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
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
    pub data_dir: Option<PathBuf>,
    pub config: Option<PathBuf>,
}

#[derive(Debug, Clone)]
pub struct ResolutionContext {
    pub cwd: PathBuf,
    pub executable_dir: Option<PathBuf>,
}

impl ResolutionContext {
    pub fn from_process() -> Result<Self> {
        let cwd = env::current_dir().context("failed to read current directory")?;
        let executable_dir = env::current_exe()
            .ok()
            .and_then(|path| path.parent().map(Path::to_path_buf));
        Ok(Self {
            cwd,
            executable_dir,
        })
    }
}

#[derive(Debug, Clone)]
pub struct ResolvedPaths {
    pub project_root: PathBuf,
    pub templates_dir: PathBuf,
    pub state_dir: PathBuf,
    pub exports_dir: PathBuf,
    pub data_dir: PathBuf,
    pub db_path: PathBuf,
    pub config_path: PathBuf,
    pub root_source: ValueSource,
    pub data_source: ValueSource,
    pub config_source: ValueSource,
}

#[derive(Debug, Clone)]
pub struct RuntimeStatus {
    pub project_root_exists: bool,
    pub templates_exists: bool,
    pub state_dir_exists: bool,
    pub data_dir_exists: bool,
    pub db_exists: bool,
    pub db_size_bytes: Option<u64>,
    pub config_exists: bool,
    pub warnings: Vec<String>,
}

impl ResolvedPaths {
    pub fn diagnostics(&self) -> String {
        format!(
            "project_root={} ({})\nstate_dir={}\ntemplates_dir={}\nexports_dir={}\ndata_dir={} ({})\ndb_path={}\nconfig_path={} ({})",
            normalize_for_display(&self.project_root),
            self.root_source.as_str(),
            normalize_for_display(&self.state_dir),
            normalize_for_display(&self.templates_dir),
            normalize_for_display(&self.exports_dir),
            normalize_for_display(&self.data_dir),
            self.data_source.as_str(),
            normalize_for_display(&self.db_path),
            normalize_for_display(&self.config_path),
            self.config_source.as_str(),
        )
    }

    /// Build the canonical layout under `project_root` without consulting env or flags.
    pub fn for_project(project_root: &Path) -> Self {
        let state_dir = project_root.join(STATE_DIR_NAME);
        let data_dir = state_dir.join("data");
        Self {
            project_root: project_root.to_path_buf(),
            templates_dir: project_root.join("templates"),
            exports_dir: state_dir.join("exports"),
            db_path: data_dir.join(DB_FILENAME),
            config_path: state_dir.join("config.toml"),
            state_dir,
            data_dir,
            root_source: ValueSource::Flag,
            data_source: ValueSource::Default,
            config_source: ValueSource::Default,
        }
    }
}

pub fn inspect_runtime(paths: &ResolvedPaths) -> Result<RuntimeStatus> {
    let db_exists = paths.db_path.exists();
    let db_size_bytes = if db_exists {
        let metadata = fs::metadata(&paths.db_path)
            .with_context(|| format!("failed to inspect {}", paths.db_path.display()))?;
        Some(metadata.len())
    } else {
        None
    };

    let templates_exists = paths.templates_dir.exists();
    let state_dir_exists = paths.state_dir.exists();
    let config_exists = paths.config_path.exists();

    let mut warnings = Vec::new();
    if !templates_exists {
        warnings.push("templates/ is missing; `page import` needs template files".to_string());
    }
    if !state_dir_exists {
        warnings.push(format!(
            "{STATE_DIR_NAME}/ is missing; run `cholotool init` before writing pages"
        ));
    }
    if !config_exists {
        warnings.push(
            "config.toml is missing; database settings must come from the environment"
                .to_string(),
        );
    }

    Ok(RuntimeStatus {
        project_root_exists: paths.project_root.exists(),
        templates_exists,
        state_dir_exists,
        data_dir_exists: paths.data_dir.exists(),
        db_exists,
        db_size_bytes,
        config_exists,
        warnings,
    })
}

pub fn ensure_runtime_ready_for_writes(paths: &ResolvedPaths, status: &RuntimeStatus) -> Result<()> {
    if !status.state_dir_exists {
        bail!(
            "Runtime layout is not initialized.\nMissing required path: {STATE_DIR_NAME}/ (holds the backup ledger)\nRun: cholotool init --project-root {}",
            normalize_for_display(&paths.project_root)
        );
    }
    Ok(())
}

#[derive(Debug, Clone)]
pub struct InitOptions {
    pub include_templates: bool,
    pub materialize_config: bool,
    pub force: bool,
}

impl Default for InitOptions {
    fn default() -> Self {
        Self {
            include_templates: true,
            materialize_config: true,
            force: false,
        }
    }
}

#[derive(Debug, Clone)]
pub struct InitReport {
    pub created_dirs: Vec<PathBuf>,
    pub wrote_config: bool,
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
    let (project_root, root_source) = resolve_project_root(context, overrides, &lookup_env)
        .context("failed to resolve project root")?;
    let defaults = ResolvedPaths::for_project(&project_root);

    let (data_dir, data_source) = resolve_location(
        overrides.data_dir.as_deref(),
        lookup_env("CHOLOTOOL_DATA_DIR"),
        &project_root,
        &defaults.data_dir,
    );
    let (config_path, config_source) = resolve_location(
        overrides.config.as_deref(),
        lookup_env("CHOLOTOOL_CONFIG"),
        &project_root,
        &defaults.config_path,
    );

    Ok(ResolvedPaths {
        db_path: data_dir.join(DB_FILENAME),
        data_dir,
        config_path,
        root_source,
        data_source,
        config_source,
        ..defaults
    })
}

pub fn init_layout(paths: &ResolvedPaths, options: &InitOptions) -> Result<InitReport> {
    let mut created_dirs = Vec::new();

    let mut required_dirs = vec![
        paths.state_dir.clone(),
        paths.data_dir.clone(),
        paths.exports_dir.clone(),
        paths.state_dir.join("logs"),
    ];
    if options.include_templates {
        required_dirs.push(paths.templates_dir.clone());
    }

    for dir in &required_dirs {
        if !dir.exists() {
            fs::create_dir_all(dir)
                .with_context(|| format!("failed to create {}", dir.display()))?;
            created_dirs.push(dir.clone());
        }
    }

    let wrote_config = if options.materialize_config {
        write_text_file(
            &paths.config_path,
            &render_materialized_config(paths),
            options.force,
        )?
    } else {
        false
    };

    Ok(InitReport {
        created_dirs,
        wrote_config,
    })
}

pub fn render_materialized_config(paths: &ResolvedPaths) -> String {
    let templates_dir = normalize_for_display(&paths.templates_dir);
    format!(
        "# cholotool runtime configuration (materialized by `cholotool init`)\n# Environment variables CHOLOT_DB_* and DATABASE_URL override [database].\n\n[database]\nhost = \"127.0.0.1\"\nport = 3306\nuser = \"root\"\n# password = \"\"\n# name = \"wordpress\"\ntable_prefix = \"wp_\"\n\n[site]\n# url = \"https://cholot.example\"\n# uploads_dir = \"wp-content/uploads\"\n# user_agent = \"cholotool/0.1\"\ntimeout_ms = 30000\n\n[elementor]\nversion = \"3.18.0\"\nextra_widget_types = []\n\n# Service-card styling; templates are read from {templates_dir}\n[cards]\nimage_height = 250\ndivider_shape = \"curve\"\ndivider_color = \"#ffffff\"\ndivider_height = 40\naccent_color = \"#b68c2f\"\nicon_library = \"fa-solid\"\n",
    )
}

/// Flag beats env beats the project default. Relative values hang off the project root.
fn resolve_location(
    flag: Option<&Path>,
    env_value: Option<String>,
    project_root: &Path,
    default: &Path,
) -> (PathBuf, ValueSource) {
    if let Some(path) = flag {
        return (absolutize(path, project_root), ValueSource::Flag);
    }
    match env_value.as_deref().map(str::trim) {
        Some(value) if !value.is_empty() => {
            (absolutize(Path::new(value), project_root), ValueSource::Env)
        }
        _ => (default.to_path_buf(), ValueSource::Default),
    }
}

fn resolve_project_root<F>(
    context: &ResolutionContext,
    overrides: &PathOverrides,
    lookup_env: &F,
) -> Result<(PathBuf, ValueSource)>
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(path) = overrides.project_root.as_deref() {
        return Ok((absolutize(path, &context.cwd), ValueSource::Flag));
    }

    if let Some(value) = lookup_env("CHOLOTOOL_PROJECT_ROOT").filter(|v| !v.trim().is_empty()) {
        return Ok((
            absolutize(Path::new(value.trim()), &context.cwd),
            ValueSource::Env,
        ));
    }

    let root = detect_project_root_heuristic(&context.cwd, context.executable_dir.as_deref());
    Ok((root, ValueSource::Heuristic))
}

/// Nearest ancestor holding `.cholotool/`, else the nearest WordPress install
/// (`wp-config.php`), else the working directory.
fn detect_project_root_heuristic(cwd: &Path, executable_dir: Option<&Path>) -> PathBuf {
    let mut seen = HashSet::new();
    let candidates: Vec<&Path> = cwd
        .ancestors()
        .chain(executable_dir.into_iter().flat_map(Path::ancestors))
        .filter(|candidate| seen.insert(normalize_for_display(candidate)))
        .collect();

    candidates
        .iter()
        .find(|candidate| candidate.join(STATE_DIR_NAME).is_dir())
        .or_else(|| {
            candidates
                .iter()
                .take_while(|candidate| cwd.starts_with(candidate))
                .find(|candidate| candidate.join(WP_CONFIG_FILENAME).is_file())
        })
        .map_or_else(|| cwd.to_path_buf(), |candidate| candidate.to_path_buf())
}

fn absolutize(path: &Path, base: &Path) -> PathBuf {
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        base.join(path)
    }
}

pub(crate) fn write_text_file(path: &Path, content: &str, force: bool) -> Result<bool> {
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

pub fn normalize_for_display(path: &Path) -> String {
    path.to_string_lossy().replace('\\', "/")
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::fs;

    use tempfile::tempdir;

    use super::{
        InitOptions, PathOverrides, ResolutionContext, STATE_DIR_NAME, ValueSource,
        ensure_runtime_ready_for_writes, init_layout, inspect_runtime, resolve_paths_with_lookup,
    };
    use crate::config::load_config;

    #[test]
    fn resolve_paths_prefers_flag_over_env() {
        let temp = tempdir().expect("tempdir");
        let cwd = temp.path().join("cwd");
        let from_flag = temp.path().join("flag-root");
        fs::create_dir_all(&cwd).expect("create cwd");

        let overrides = PathOverrides {
            project_root: Some(from_flag.clone()),
            ..PathOverrides::default()
        };
        let context = ResolutionContext {
            cwd: cwd.clone(),
            executable_dir: None,
        };

        let env = HashMap::from([(
            "CHOLOTOOL_PROJECT_ROOT".to_string(),
            temp.path().join("env-root").to_string_lossy().to_string(),
        )]);

        let resolved = resolve_paths_with_lookup(&context, &overrides, |key| env.get(key).cloned())
            .expect("resolve paths");
        assert_eq!(resolved.project_root, from_flag);
        assert_eq!(resolved.root_source, ValueSource::Flag);
    }

    #[test]
    fn heuristic_finds_ancestor_with_state_dir() {
        let temp = tempdir().expect("tempdir");
        let root = temp.path().join("site");
        let nested = root.join("wp-content").join("themes");
        fs::create_dir_all(root.join(STATE_DIR_NAME)).expect("state dir");
        fs::create_dir_all(&nested).expect("nested");

        let context = ResolutionContext {
            cwd: nested,
            executable_dir: None,
        };
        let resolved = resolve_paths_with_lookup(&context, &PathOverrides::default(), |_| None)
            .expect("resolve");
        assert_eq!(resolved.project_root, root);
        assert_eq!(resolved.root_source, ValueSource::Heuristic);
    }

    #[test]
    fn heuristic_falls_back_to_wordpress_root() {
        let temp = tempdir().expect("tempdir");
        let root = temp.path().join("site");
        let nested = root.join("wp-content").join("uploads");
        fs::create_dir_all(&nested).expect("nested");
        fs::write(root.join("wp-config.php"), "<?php\n").expect("wp-config");

        let context = ResolutionContext {
            cwd: nested,
            executable_dir: None,
        };
        let resolved = resolve_paths_with_lookup(&context, &PathOverrides::default(), |_| None)
            .expect("resolve");
        assert_eq!(resolved.project_root, root);
        assert_eq!(resolved.templates_dir, root.join("templates"));
    }

    #[test]
    fn data_dir_env_moves_db_path() {
        let temp = tempdir().expect("tempdir");
        let root = temp.path().join("project");
        let context = ResolutionContext {
            cwd: root.clone(),
            executable_dir: None,
        };
        let overrides = PathOverrides {
            project_root: Some(root.clone()),
            ..PathOverrides::default()
        };
        let env = HashMap::from([("CHOLOTOOL_DATA_DIR".to_string(), "ledger".to_string())]);
        let resolved = resolve_paths_with_lookup(&context, &overrides, |key| env.get(key).cloned())
            .expect("resolve");
        assert_eq!(resolved.data_source, ValueSource::Env);
        assert_eq!(resolved.db_path, root.join("ledger").join("cholotool.db"));
    }

    #[test]
    fn init_layout_creates_expected_dirs_and_config() {
        let temp = tempdir().expect("tempdir");
        let root = temp.path().join("project");
        fs::create_dir_all(&root).expect("create root");

        let context = ResolutionContext {
            cwd: root.clone(),
            executable_dir: None,
        };
        let overrides = PathOverrides {
            project_root: Some(root.clone()),
            ..PathOverrides::default()
        };
        let paths = resolve_paths_with_lookup(&context, &overrides, |_| None).expect("resolve");

        let report = init_layout(&paths, &InitOptions::default()).expect("init");

        assert!(!report.created_dirs.is_empty());
        assert!(report.wrote_config);
        assert!(paths.templates_dir.exists());
        assert!(paths.exports_dir.exists());
        assert!(paths.data_dir.exists());

        let config = load_config(&paths.config_path).expect("materialized config parses");
        assert_eq!(config.database.table_prefix.as_deref(), Some("wp_"));
        assert_eq!(config.cards.image_height, 250);

        let second = init_layout(&paths, &InitOptions::default()).expect("init again");
        assert!(second.created_dirs.is_empty());
        assert!(!second.wrote_config);
    }

    #[test]
    fn write_readiness_fails_without_init() {
        let temp = tempdir().expect("tempdir");
        let root = temp.path().join("project");
        fs::create_dir_all(&root).expect("create root");
        let context = ResolutionContext {
            cwd: root.clone(),
            executable_dir: None,
        };
        let overrides = PathOverrides {
            project_root: Some(root.clone()),
            ..PathOverrides::default()
        };
        let paths = resolve_paths_with_lookup(&context, &overrides, |_| None).expect("resolve");
        let status = inspect_runtime(&paths).expect("inspect");
        assert!(!status.warnings.is_empty());
        let err = ensure_runtime_ready_for_writes(&paths, &status).expect_err("must fail");
        assert!(err.to_string().contains("Runtime layout is not initialized"));
    }
}
