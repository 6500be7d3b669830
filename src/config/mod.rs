//! Configuration loading and merge logic for `depreport`.
//!
//! Global config and project-local config are merged with project values taking precedence.

mod overlay;

use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Context;

use self::overlay::ConfigOverlay;

/// Default per-request timeout in minutes.
pub const DEFAULT_TIMEOUT_MINUTES: u64 = 60;
/// Default number of extra attempts after a connection failure. Zero disables retries.
pub const DEFAULT_CONNECTION_RETRIES: u32 = 1;
/// Default directory that receives the policy result files.
pub const DEFAULT_OUTPUT_DIR: &str = ".";
/// Environment variable that overrides any configured API key.
pub const API_KEY_ENV: &str = "DEPREPORT_API_KEY";

/// Top-level runtime configuration for report generation and upload.
#[derive(Debug, Clone)]
pub struct DepReportConfig {
    /// Base URL of the verdict service; requests go to `<server_url>/agent`.
    pub server_url: Option<String>,
    /// Organization token sent with every request.
    pub api_key: Option<String>,
    pub product_name: Option<String>,
    pub product_version: Option<String>,
    /// Project identity for the report; falls back to the dependency source's root.
    pub project_name: Option<String>,
    pub project_version: Option<String>,
    /// Ask the service for a compliance verdict before updating.
    pub check_policies: bool,
    /// Update even when the verdict reports violations or cannot be read.
    pub force_update: bool,
    /// Abort when the verdict reports violations.
    pub fail_on_error: bool,
    /// Abort when the service cannot be reached at all.
    pub fail_on_connection_error: bool,
    /// Keep development dependencies in the report.
    pub dev_dependencies: bool,
    pub timeout_minutes: u64,
    pub connection_retries: u32,
    pub output_dir: PathBuf,
}

impl Default for DepReportConfig {
    fn default() -> Self {
        Self {
            server_url: None,
            api_key: None,
            product_name: None,
            product_version: None,
            project_name: None,
            project_version: None,
            check_policies: false,
            force_update: false,
            fail_on_error: false,
            fail_on_connection_error: true,
            dev_dependencies: false,
            timeout_minutes: DEFAULT_TIMEOUT_MINUTES,
            connection_retries: DEFAULT_CONNECTION_RETRIES,
            output_dir: PathBuf::from(DEFAULT_OUTPUT_DIR),
        }
    }
}

impl DepReportConfig {
    /// Loads and merges global + project configuration from default paths.
    ///
    /// # Errors
    ///
    /// Returns an error if any discovered config file cannot be read or parsed.
    pub fn load() -> anyhow::Result<Self> {
        let mut config = Self::load_with_paths(global_config_path(), project_config_path())?;
        if let Some(api_key) = env::var(API_KEY_ENV).ok().filter(|key| !key.trim().is_empty()) {
            config.api_key = Some(api_key);
        }
        Ok(config)
    }

    #[cfg(test)]
    fn load_from_path(path: &Path) -> anyhow::Result<Self> {
        Self::load_with_paths(Some(path.to_path_buf()), None)
    }

    fn load_with_paths(global: Option<PathBuf>, project: Option<PathBuf>) -> anyhow::Result<Self> {
        let mut config = Self::default();
        if let Some(path) = global {
            config.merge_from_path(&path)?;
        }
        if let Some(path) = project {
            config.merge_from_path(&path)?;
        }
        config.validate()?;
        Ok(config)
    }

    pub(crate) fn validate(&self) -> anyhow::Result<()> {
        if let Some(url) = self.server_url.as_deref()
            && !(url.starts_with("http://") || url.starts_with("https://"))
        {
            anyhow::bail!("server_url must be an http(s) URL, got '{url}'");
        }
        Ok(())
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_minutes.saturating_mul(60))
    }

    fn merge_from_path(&mut self, path: &Path) -> anyhow::Result<()> {
        if !path.exists() {
            return Ok(());
        }

        let raw = fs::read_to_string(path)
            .with_context(|| format!("failed to read config file at {}", path.display()))?;
        let overlay: ConfigOverlay = toml::from_str(&raw)
            .with_context(|| format!("failed to parse config file at {}", path.display()))?;
        self.apply_overlay(overlay);
        Ok(())
    }

    fn apply_overlay(&mut self, overlay: ConfigOverlay) {
        replace_non_empty(&mut self.server_url, overlay.server_url);
        replace_non_empty(&mut self.api_key, overlay.api_key);
        replace_non_empty(&mut self.product_name, overlay.product_name);
        replace_non_empty(&mut self.product_version, overlay.product_version);
        replace_non_empty(&mut self.project_name, overlay.project_name);
        replace_non_empty(&mut self.project_version, overlay.project_version);

        if let Some(value) = overlay.check_policies {
            self.check_policies = value;
        }
        if let Some(value) = overlay.force_update {
            self.force_update = value;
        }
        if let Some(value) = overlay.fail_on_error {
            self.fail_on_error = value;
        }
        if let Some(value) = overlay.fail_on_connection_error {
            self.fail_on_connection_error = value;
        }
        if let Some(value) = overlay.dev_dependencies {
            self.dev_dependencies = value;
        }
        if let Some(value) = overlay.timeout_minutes {
            self.timeout_minutes = sanitize_positive_u64(value, DEFAULT_TIMEOUT_MINUTES);
        }
        if let Some(value) = overlay.connection_retries {
            self.connection_retries = value;
        }
        if let Some(value) = overlay.output_dir
            && !value.as_os_str().is_empty()
        {
            self.output_dir = value;
        }
    }
}

fn global_config_path() -> Option<PathBuf> {
    if let Some(explicit) = env::var_os("DEPREPORT_CONFIG_GLOBAL_PATH") {
        return Some(PathBuf::from(explicit));
    }

    let home = env::var_os("HOME")
        .or_else(|| env::var_os("USERPROFILE"))
        .map(PathBuf::from)?;

    Some(home.join(".config").join("depreport").join("config.toml"))
}

fn project_config_path() -> Option<PathBuf> {
    if let Some(explicit) = env::var_os("DEPREPORT_CONFIG_PROJECT_PATH") {
        return Some(PathBuf::from(explicit));
    }

    let cwd = env::current_dir().ok()?;
    Some(cwd.join(".depreport.toml"))
}

fn replace_non_empty(target: &mut Option<String>, value: Option<String>) {
    if let Some(value) = value.map(|raw| raw.trim().to_string())
        && !value.is_empty()
    {
        *target = Some(value);
    }
}

fn sanitize_positive_u64(value: u64, fallback: u64) -> u64 {
    if value == 0 { fallback } else { value }
}

#[cfg(test)]
#[path = "../tests/config.rs"]
mod tests;
