use std::path::PathBuf;

use serde::Deserialize;

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub(super) struct ConfigOverlay {
    pub server_url: Option<String>,
    pub api_key: Option<String>,
    pub product_name: Option<String>,
    pub product_version: Option<String>,
    pub project_name: Option<String>,
    pub project_version: Option<String>,
    pub check_policies: Option<bool>,
    pub force_update: Option<bool>,
    pub fail_on_error: Option<bool>,
    pub fail_on_connection_error: Option<bool>,
    pub dev_dependencies: Option<bool>,
    pub timeout_minutes: Option<u64>,
    pub connection_retries: Option<u32>,
    pub output_dir: Option<PathBuf>,
}
