// Layered configuration for the sync daemon.
//
// Global config:    `~/.feishu-sync/config.toml`    (auth + defaults shared across workspaces)
// Workspace config: `<root>/.feishu-sync/workspace.toml` (per-folder sync settings)
//
// Both are optional, field-defaulted TOML, and both are validated together
// into an `EffectiveConfig` once at startup.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::security::{ensure_owner_only_dir, ensure_owner_only_file};

pub const DEBOUNCE_MS: u64 = 3_000;
pub const DEDUPE_WINDOW_MS: u64 = 600_000;
pub const LOCAL_IGNORE_WINDOW_MS: u64 = 2_000;

/// Root directory for process-wide state: `~/.feishu-sync/`.
pub fn global_dir() -> Option<PathBuf> {
    dirs::home_dir().map(|h| h.join(".feishu-sync"))
}

/// Path to the global config file: `~/.feishu-sync/config.toml`.
pub fn global_config_path() -> Option<PathBuf> {
    global_dir().map(|d| d.join("config.toml"))
}

/// Path to the workspace config file: `<root>/.feishu-sync/workspace.toml`.
pub fn workspace_config_path(workspace_root: &Path) -> PathBuf {
    workspace_root.join(".feishu-sync").join("workspace.toml")
}

// ── Global config ──────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default, rename_all = "camelCase")]
pub struct GlobalConfig {
    /// Path to the file holding the current bearer token.
    pub token_path: Option<PathBuf>,
    pub wiki_space_id: Option<String>,
    pub auth: AuthConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default, rename_all = "camelCase")]
pub struct AuthConfig {
    pub client_id: Option<String>,
    pub client_secret: Option<String>,
}

impl GlobalConfig {
    /// Load from `~/.feishu-sync/config.toml`. Returns defaults if the file
    /// doesn't exist or can't be parsed.
    pub fn load() -> Self {
        global_config_path().and_then(|p| Self::load_from(&p).ok()).unwrap_or_default()
    }

    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path).map_err(ConfigError::Io)?;
        toml::from_str(&contents).map_err(ConfigError::Parse)
    }

    pub fn save(&self) -> Result<(), ConfigError> {
        let path = global_config_path().ok_or_else(|| {
            ConfigError::Io(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                "could not determine home directory",
            ))
        })?;
        self.save_to(&path)
    }

    pub fn save_to(&self, path: &Path) -> Result<(), ConfigError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(ConfigError::Io)?;
            ensure_owner_only_dir(parent)
                .map_err(|error| ConfigError::Io(std::io::Error::other(error.to_string())))?;
        }
        let contents = toml::to_string_pretty(self).map_err(ConfigError::Serialize)?;
        std::fs::write(path, contents).map_err(ConfigError::Io).and_then(|_| {
            ensure_owner_only_file(path)
                .map_err(|error| ConfigError::Io(std::io::Error::other(error.to_string())))
        })
    }

    /// `auth.clientId`/`auth.clientSecret`, overridable by
    /// `FEISHU_APP_ID`/`FEISHU_APP_SECRET`.
    pub fn client_id(&self) -> Option<String> {
        std::env::var("FEISHU_APP_ID").ok().or_else(|| self.auth.client_id.clone())
    }

    pub fn client_secret(&self) -> Option<String> {
        std::env::var("FEISHU_APP_SECRET").ok().or_else(|| self.auth.client_secret.clone())
    }
}

// ── Workspace config ───────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default, rename_all = "camelCase")]
pub struct WorkspaceConfig {
    pub sync: SyncConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default, rename_all = "camelCase")]
pub struct SyncConfig {
    /// May begin with `~`, expanded against the resolved home directory.
    pub folder_path: Option<String>,
    /// `0` disables periodic polling.
    pub poll_interval_seconds: u64,
    pub initial_sync: bool,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self { folder_path: None, poll_interval_seconds: 300, initial_sync: true }
    }
}

impl WorkspaceConfig {
    pub fn load(workspace_root: &Path) -> Self {
        let path = workspace_config_path(workspace_root);
        Self::load_from(&path).unwrap_or_default()
    }

    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path).map_err(ConfigError::Io)?;
        toml::from_str(&contents).map_err(ConfigError::Parse)
    }

    pub fn save(&self, workspace_root: &Path) -> Result<(), ConfigError> {
        let path = workspace_config_path(workspace_root);
        self.save_to(&path)
    }

    pub fn save_to(&self, path: &Path) -> Result<(), ConfigError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(ConfigError::Io)?;
            ensure_owner_only_dir(parent)
                .map_err(|error| ConfigError::Io(std::io::Error::other(error.to_string())))?;
        }
        let contents = toml::to_string_pretty(self).map_err(ConfigError::Serialize)?;
        std::fs::write(path, contents).map_err(ConfigError::Io).and_then(|_| {
            ensure_owner_only_file(path)
                .map_err(|error| ConfigError::Io(std::io::Error::other(error.to_string())))
        })
    }
}

/// Resolve `~/...` against the home directory; leave other paths untouched.
pub fn expand_home(raw: &str) -> PathBuf {
    if let Some(rest) = raw.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(rest);
        }
    } else if raw == "~" {
        if let Some(home) = dirs::home_dir() {
            return home;
        }
    }
    PathBuf::from(raw)
}

// ── Effective configuration ───────────────────────────────────────

/// Global + workspace config merged and validated at startup. Everything
/// downstream (client, walkers, processor, orchestrator) takes this rather
/// than the raw file structs.
#[derive(Debug, Clone, PartialEq)]
pub struct EffectiveConfig {
    pub wiki_space_id: String,
    pub token_path: PathBuf,
    pub client_id: Option<String>,
    pub client_secret: Option<String>,
    pub folder_path: PathBuf,
    pub poll_interval_seconds: u64,
    pub initial_sync: bool,
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ConfigValidationError {
    #[error("`wikiSpaceId` is not set")]
    MissingWikiSpaceId,
    #[error("`tokenPath` is not set")]
    MissingTokenPath,
    #[error("token file `{0}` does not exist or is not readable")]
    TokenFileUnreadable(String),
    #[error("token file `{0}` is empty")]
    TokenFileEmpty(String),
    #[error("`sync.folderPath` is not set")]
    MissingFolderPath,
    #[error("sync folder `{0}` could not be created or accessed: {1}")]
    FolderInaccessible(String, String),
}

impl EffectiveConfig {
    pub fn resolve(global: &GlobalConfig, workspace: &WorkspaceConfig) -> Result<Self, ConfigValidationError> {
        let wiki_space_id = global
            .wiki_space_id
            .clone()
            .filter(|value| !value.is_empty())
            .ok_or(ConfigValidationError::MissingWikiSpaceId)?;

        let token_path = global.token_path.clone().ok_or(ConfigValidationError::MissingTokenPath)?;
        let token_contents = std::fs::read_to_string(&token_path)
            .map_err(|_| ConfigValidationError::TokenFileUnreadable(token_path.display().to_string()))?;
        if token_contents.trim().is_empty() {
            return Err(ConfigValidationError::TokenFileEmpty(token_path.display().to_string()));
        }

        let folder_path_raw =
            workspace.sync.folder_path.clone().ok_or(ConfigValidationError::MissingFolderPath)?;
        let folder_path = expand_home(&folder_path_raw);
        std::fs::create_dir_all(&folder_path)
            .map_err(|e| ConfigValidationError::FolderInaccessible(folder_path.display().to_string(), e.to_string()))?;

        Ok(Self {
            wiki_space_id,
            token_path,
            client_id: global.client_id(),
            client_secret: global.client_secret(),
            folder_path,
            poll_interval_seconds: workspace.sync.poll_interval_seconds,
            initial_sync: workspace.sync.initial_sync,
        })
    }

    pub fn bearer_token(&self) -> std::io::Result<String> {
        Ok(std::fs::read_to_string(&self.token_path)?.trim().to_string())
    }
}

// ── Errors ─────────────────────────────────────────────────────────

#[derive(Debug)]
pub enum ConfigError {
    Io(std::io::Error),
    Parse(toml::de::Error),
    Serialize(toml::ser::Error),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Io(e) => write!(f, "config I/O error: {e}"),
            Self::Parse(e) => write!(f, "config parse error: {e}"),
            Self::Serialize(e) => write!(f, "config serialize error: {e}"),
        }
    }
}

impl std::error::Error for ConfigError {}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn global_config_defaults_are_unset() {
        let cfg = GlobalConfig::default();
        assert!(cfg.token_path.is_none());
        assert!(cfg.wiki_space_id.is_none());
        assert!(cfg.auth.client_id.is_none());
    }

    #[test]
    fn global_config_roundtrip() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.toml");

        let cfg = GlobalConfig {
            token_path: Some(PathBuf::from("/tmp/token")),
            wiki_space_id: Some("space1".into()),
            auth: AuthConfig { client_id: Some("cid".into()), client_secret: Some("csecret".into()) },
        };
        cfg.save_to(&path).unwrap();
        let loaded = GlobalConfig::load_from(&path).unwrap();
        assert_eq!(cfg, loaded);
    }

    #[test]
    fn client_id_env_override_wins_over_file() {
        let cfg = GlobalConfig {
            auth: AuthConfig { client_id: Some("from-file".into()), client_secret: None },
            ..Default::default()
        };
        std::env::set_var("FEISHU_APP_ID", "from-env");
        assert_eq!(cfg.client_id().as_deref(), Some("from-env"));
        std::env::remove_var("FEISHU_APP_ID");
        assert_eq!(cfg.client_id().as_deref(), Some("from-file"));
    }

    #[test]
    fn sync_config_defaults() {
        let cfg = SyncConfig::default();
        assert_eq!(cfg.poll_interval_seconds, 300);
        assert!(cfg.initial_sync);
        assert!(cfg.folder_path.is_none());
    }

    #[test]
    fn workspace_config_roundtrip() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("workspace.toml");

        let cfg = WorkspaceConfig {
            sync: SyncConfig {
                folder_path: Some("~/wiki".into()),
                poll_interval_seconds: 60,
                initial_sync: false,
            },
        };
        cfg.save_to(&path).unwrap();
        let loaded = WorkspaceConfig::load_from(&path).unwrap();
        assert_eq!(cfg, loaded);
    }

    #[test]
    fn expand_home_replaces_tilde_prefix() {
        let home = dirs::home_dir().unwrap();
        assert_eq!(expand_home("~/wiki"), home.join("wiki"));
        assert_eq!(expand_home("/abs/path"), PathBuf::from("/abs/path"));
    }

    #[test]
    fn resolve_fails_without_wiki_space_id() {
        let global = GlobalConfig::default();
        let workspace = WorkspaceConfig::default();
        let err = EffectiveConfig::resolve(&global, &workspace).unwrap_err();
        assert_eq!(err, ConfigValidationError::MissingWikiSpaceId);
    }

    #[test]
    fn resolve_fails_on_empty_token_file() {
        let dir = TempDir::new().unwrap();
        let token_path = dir.path().join("token");
        std::fs::write(&token_path, "   \n").unwrap();

        let global = GlobalConfig {
            token_path: Some(token_path.clone()),
            wiki_space_id: Some("space1".into()),
            auth: AuthConfig::default(),
        };
        let mut workspace = WorkspaceConfig::default();
        workspace.sync.folder_path = Some(dir.path().join("wiki").display().to_string());

        let err = EffectiveConfig::resolve(&global, &workspace).unwrap_err();
        assert_eq!(err, ConfigValidationError::TokenFileEmpty(token_path.display().to_string()));
    }

    #[test]
    fn resolve_succeeds_and_creates_sync_folder() {
        let dir = TempDir::new().unwrap();
        let token_path = dir.path().join("token");
        std::fs::write(&token_path, "secret-token\n").unwrap();
        let folder_path = dir.path().join("wiki-folder");

        let global = GlobalConfig {
            token_path: Some(token_path),
            wiki_space_id: Some("space1".into()),
            auth: AuthConfig::default(),
        };
        let mut workspace = WorkspaceConfig::default();
        workspace.sync.folder_path = Some(folder_path.display().to_string());
        workspace.sync.poll_interval_seconds = 45;

        let effective = EffectiveConfig::resolve(&global, &workspace).unwrap();
        assert_eq!(effective.wiki_space_id, "space1");
        assert_eq!(effective.poll_interval_seconds, 45);
        assert!(folder_path.is_dir());
        assert_eq!(effective.bearer_token().unwrap(), "secret-token");
    }
}
