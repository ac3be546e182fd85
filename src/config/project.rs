use super::{env_bool, env_string};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProjectConfig {
    /// Strict isolation (§4.12, §6.5): multi-project requests denied
    /// absent an explicit override.
    pub project_isolation_mode: bool,
    pub enable_cross_project_search: bool,
    /// A configured "system" principal bypasses isolation with implicit
    /// `owner` everywhere (§4.12).
    pub system_principal: String,
}

impl Default for ProjectConfig {
    fn default() -> Self {
        Self {
            project_isolation_mode: true,
            enable_cross_project_search: false,
            system_principal: "system".to_string(),
        }
    }
}

impl ProjectConfig {
    pub fn apply_env(&mut self) {
        self.project_isolation_mode =
            env_bool("PROJECT_ISOLATION_MODE", self.project_isolation_mode);
        self.enable_cross_project_search =
            env_bool("PROJECT_ENABLE_CROSS_PROJECT_SEARCH", self.enable_cross_project_search);
        self.system_principal = env_string("PROJECT_SYSTEM_PRINCIPAL", &self.system_principal);
    }
}
