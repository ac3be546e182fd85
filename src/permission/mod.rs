// src/permission/mod.rs
//! Permission Gate (C12, §4.12).
//!
//! The policy store is external; this module defines the contract the
//! orchestrator consults before any write and before any multi-project
//! read, plus a reference in-memory implementation grounded on the
//! original `permission_manager.py`'s `PermissionLevel`/`PermissionRequest`
//! shapes (SPEC_FULL.md §11) — suitable for tests and single-node
//! deployments, not a production ACL store.

use crate::config::ProjectConfig;
use crate::error::PermissionError;
use async_trait::async_trait;
use std::collections::HashMap;
use tokio::sync::RwLock;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PermissionLevel {
    None,
    Read,
    Write,
    Admin,
    Owner,
}

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone)]
pub struct PermissionRequest {
    pub user: String,
    pub project_ids: Vec<String>,
    pub required_level: PermissionLevel,
    pub action: String,
}

#[derive(Debug, Clone)]
pub struct PermissionDecision {
    pub allowed: bool,
    pub per_project_level: HashMap<String, PermissionLevel>,
    pub denied: Vec<String>,
}

#[async_trait]
pub trait PermissionGate: Send + Sync {
    async fn check_permissions(
        &self,
        request: &PermissionRequest,
    ) -> Result<PermissionDecision, PermissionError>;
}

/// Reference implementation: an in-memory grant table plus the strict
/// isolation / system-principal rules from §4.12.
pub struct InMemoryPermissionGate {
    grants: RwLock<HashMap<(String, String), PermissionLevel>>,
    project_isolation_mode: bool,
    enable_cross_project_search: bool,
    system_principal: String,
}

impl InMemoryPermissionGate {
    pub fn new(config: &ProjectConfig) -> Self {
        Self {
            grants: RwLock::new(HashMap::new()),
            project_isolation_mode: config.project_isolation_mode,
            enable_cross_project_search: config.enable_cross_project_search,
            system_principal: config.system_principal.clone(),
        }
    }

    pub async fn grant(&self, user: &str, project_id: &str, level: PermissionLevel) {
        self.grants
            .write()
            .await
            .insert((user.to_string(), project_id.to_string()), level);
    }

    async fn level_for(&self, user: &str, project_id: &str) -> PermissionLevel {
        if user == self.system_principal {
            return PermissionLevel::Owner;
        }
        self.grants
            .read()
            .await
            .get(&(user.to_string(), project_id.to_string()))
            .copied()
            .unwrap_or(PermissionLevel::None)
    }
}

#[async_trait]
impl PermissionGate for InMemoryPermissionGate {
    async fn check_permissions(
        &self,
        request: &PermissionRequest,
    ) -> Result<PermissionDecision, PermissionError> {
        // Strict isolation: a multi-project request (including the
        // "no project scope given" case modeled as an empty list) is
        // denied unless cross-project access is explicitly enabled, or
        // the caller is the system principal.
        let is_system = request.user == self.system_principal;
        if self.project_isolation_mode
            && !is_system
            && !self.enable_cross_project_search
            && request.project_ids.len() != 1
        {
            return Err(PermissionError::CrossProjectDenied);
        }

        let mut per_project_level = HashMap::new();
        let mut denied = Vec::new();

        for project_id in &request.project_ids {
            let level = self.level_for(&request.user, project_id).await;
            per_project_level.insert(project_id.clone(), level);
            if level < request.required_level {
                denied.push(project_id.clone());
            }
        }

        if !denied.is_empty() {
            return Err(PermissionError::Denied {
                user: request.user.clone(),
                required: format!("{:?}", request.required_level),
                projects: denied,
            });
        }

        Ok(PermissionDecision {
            allowed: true,
            per_project_level,
            denied: Vec::new(),
        })
    }
}
