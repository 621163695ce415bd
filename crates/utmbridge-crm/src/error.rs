use std::path::PathBuf;

use thiserror::Error;

/// Failures talking to the CRM that are not expressed by an HTTP status.
#[derive(Debug, Error)]
pub enum CrmError {
    #[error("CRM request failed: {0}")]
    Transport(String),

    #[error("CRM request timed out: {0}")]
    Timeout(String),

    #[error("Invalid CRM configuration: {0}")]
    InvalidConfig(String),
}

impl From<reqwest::Error> for CrmError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            Self::Timeout(err.to_string())
        } else {
            Self::Transport(err.to_string())
        }
    }
}

#[derive(Debug, Error)]
pub enum CredentialError {
    #[error("Credential file not found: {}", .0.display())]
    NotFound(PathBuf),

    #[error("Credential file {} is malformed: {message}", path.display())]
    Malformed { path: PathBuf, message: String },

    #[error("Credential record has no access_token")]
    MissingAccessToken,

    #[error("Credential store I/O error: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Error)]
pub enum RefreshError {
    #[error("Token endpoint rejected refresh (HTTP {status}): {body}")]
    Rejected { status: u16, body: String },

    #[error("Stored credential has no refresh_token")]
    MissingRefreshToken,

    #[error("Token endpoint response is invalid: {0}")]
    InvalidResponse(String),

    #[error(transparent)]
    Store(#[from] CredentialError),

    #[error(transparent)]
    Crm(#[from] CrmError),
}
