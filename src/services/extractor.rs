use async_trait::async_trait;

use crate::models::registry::RegistryRecord;
use crate::models::task::{ErrorKind, TaskError};

/// Turns a CNPJ into a registry record.
///
/// An empty [`RegistryRecord`] means the lookup worked but found nothing.
#[async_trait]
pub trait Extractor: Send + Sync {
    async fn extract(&self, subject: &str) -> Result<RegistryRecord, ExtractError>;
}

#[derive(Debug, thiserror::Error)]
pub enum ExtractError {
    #[error("lookup timed out after {0}s")]
    Timeout(u64),

    #[error("network error: {0}")]
    Network(String),

    #[error("failed to parse registry page: {0}")]
    Parse(String),
}

impl ExtractError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ExtractError::Timeout(_) => ErrorKind::Timeout,
            ExtractError::Network(_) => ErrorKind::Network,
            ExtractError::Parse(_) => ErrorKind::Parse,
        }
    }

    /// Transport failures are worth another attempt; parse failures are not.
    pub fn is_transient(&self) -> bool {
        !matches!(self, ExtractError::Parse(_))
    }
}

impl From<&ExtractError> for TaskError {
    fn from(err: &ExtractError) -> Self {
        TaskError::new(err.kind(), err.to_string())
    }
}
