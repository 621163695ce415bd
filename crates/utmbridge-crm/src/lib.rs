//! Kommo CRM integration for utmbridge.
//!
//! - [`CrmClient`] - contact search and lead update ([`LeadApi`])
//! - [`FileCredentialStore`] - persisted access/refresh tokens ([`CredentialStore`])
//! - [`OAuthRefresher`] - refresh-token exchange ([`TokenRefresher`])

pub mod client;
pub mod credentials;
pub mod error;
pub mod oauth;
pub mod types;

pub use client::{CrmClient, CrmClientConfig, LeadApi};
pub use credentials::{CredentialStore, FileCredentialStore};
pub use error::{CredentialError, CrmError, RefreshError};
pub use oauth::{OAuthClientConfig, OAuthRefresher, TokenRefresher};
pub use types::{
    AttributionFields, Credential, CustomFieldIds, LeadId, RemoteOutcome, SubmissionIdentity,
};
