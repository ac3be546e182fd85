// src/error.rs
//! Error taxonomy shared by every component (§7).
//!
//! Components raise one of these variants; the orchestrator and transport
//! layer decide how to surface it (retry, partial-success indicator, opaque
//! 5xx, …). Components never invent ad-hoc string errors for conditions this
//! taxonomy already names.

use thiserror::Error;

/// Errors raised by the Model Gateway (C1) and its provider registry/router.
#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("provider '{name}' not registered for task '{task}'")]
    NoProvider { name: String, task: &'static str },

    #[error("all providers in priority order were unavailable for task '{task}'")]
    AllProvidersUnavailable { task: &'static str },

    #[error("embedding dimension mismatch: provider returned {got}, collection expects {expected}")]
    DimensionMismatch { expected: usize, got: usize },

    #[error("rerank returned {got} scores for {expected} documents")]
    RerankMisaligned { expected: usize, got: usize },

    #[error("transient provider error from '{provider}': {message}")]
    Transient { provider: String, message: String },

    #[error("fatal provider error from '{provider}': {message}")]
    Fatal { provider: String, message: String },

    #[error("malformed provider response from '{provider}': {message}")]
    MalformedResponse { provider: String, message: String },

    #[error("operation cancelled past its deadline")]
    DeadlineExceeded,
}

impl GatewayError {
    /// Whether this error class is worth retrying with backoff (§4.1, §7).
    pub fn is_retryable(&self) -> bool {
        matches!(self, GatewayError::Transient { .. })
    }
}

/// Errors raised by the Dual-Write Store (C7).
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("parent conversation '{conversation_id}' does not exist")]
    ParentMissing { conversation_id: String },

    #[error("vector upsert failed after relational commit for unit '{unit_id}': {message}")]
    Partial { unit_id: String, message: String },

    #[error("relational store error: {0}")]
    Relational(#[from] sqlx::Error),

    #[error("vector store error: {0}")]
    Vector(String),

    #[error("gateway error: {0}")]
    Gateway(#[from] GatewayError),
}

/// Errors raised by the Semantic Retriever (C8) and Context Injector (C9).
#[derive(Debug, Error)]
pub enum RetrieveError {
    #[error("gateway error: {0}")]
    Gateway(#[from] GatewayError),

    #[error("store error: {0}")]
    Store(#[from] StoreError),
}

/// Errors raised by the Permission Gate (C12).
#[derive(Debug, Error, Clone)]
pub enum PermissionError {
    #[error("user '{user}' lacks '{required:?}' on project(s) {projects:?}")]
    Denied {
        user: String,
        required: String,
        projects: Vec<String>,
    },

    #[error("cross-project access requested under strict isolation without override")]
    CrossProjectDenied,
}

/// Top-level façade error (§7 taxonomy, orchestrator boundary). The
/// transport layer maps each variant to a JSON-RPC/HTTP error envelope.
#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("invalid input: {0}")]
    InputInvalid(String),

    #[error("permission denied: {0}")]
    PermissionDenied(#[from] PermissionError),

    #[error("referential integrity: {0}")]
    ParentMissing(String),

    #[error("provider transient failure: {0}")]
    ProviderTransient(String),

    #[error("provider fatal failure: {0}")]
    ProviderFatal(String),

    #[error("store partial failure: unit '{unit_id}' written relationally, vector pending repair")]
    StorePartial { unit_id: String },

    #[error("deadline exceeded")]
    DeadlineExceeded,

    #[error("internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl From<GatewayError> for ServiceError {
    fn from(err: GatewayError) -> Self {
        match err {
            GatewayError::Transient { message, .. } => ServiceError::ProviderTransient(message),
            GatewayError::Fatal { message, .. } => ServiceError::ProviderFatal(message),
            GatewayError::DeadlineExceeded => ServiceError::DeadlineExceeded,
            other => ServiceError::Internal(anyhow::anyhow!(other)),
        }
    }
}

impl From<StoreError> for ServiceError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::ParentMissing { conversation_id } => {
                ServiceError::ParentMissing(conversation_id)
            }
            StoreError::Partial { unit_id, .. } => ServiceError::StorePartial { unit_id },
            StoreError::Gateway(g) => g.into(),
            other => ServiceError::Internal(anyhow::anyhow!(other)),
        }
    }
}

impl From<RetrieveError> for ServiceError {
    fn from(err: RetrieveError) -> Self {
        match err {
            RetrieveError::Gateway(g) => g.into(),
            RetrieveError::Store(s) => s.into(),
        }
    }
}
