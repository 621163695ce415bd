//! HTTP client for the Kommo (amoCRM) v4 REST API.
//!
//! Only the two calls the reconciliation needs are wrapped:
//!
//! - contact search with embedded leads, used to discover the lead created by
//!   the CRM's own form integration
//! - partial lead update writing the attribution custom fields
//!
//! Both translate the HTTP status into a [`RemoteOutcome`]; only transport
//! failures surface as [`CrmError`].

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::CrmError;
use crate::types::{AttributionFields, CustomFieldIds, LeadId, RemoteOutcome, SubmissionIdentity};

/// Lead discovery and update operations against the CRM.
#[async_trait]
pub trait LeadApi: Send + Sync {
    /// Finds the first lead of the first contact matching the identity.
    async fn search_lead(
        &self,
        identity: &SubmissionIdentity,
        access_token: &str,
    ) -> Result<RemoteOutcome<LeadId>, CrmError>;

    /// Writes the attribution fields onto the lead.
    async fn update_lead(
        &self,
        lead_id: &LeadId,
        fields: &AttributionFields,
        access_token: &str,
    ) -> Result<RemoteOutcome<()>, CrmError>;
}

#[derive(Debug, Clone)]
pub struct CrmClientConfig {
    /// Account base URL, e.g. `https://example.kommo.com`.
    pub base_url: Url,
    pub fields: CustomFieldIds,
    /// Per-request timeout for every outbound call.
    pub request_timeout: Duration,
    /// Pause before each lead update; the CRM accepts writes to a fresh lead
    /// only after it becomes visible.
    pub update_delay: Duration,
}

pub struct CrmClient {
    http: Client,
    base_url: String,
    fields: CustomFieldIds,
    update_delay: Duration,
}

impl CrmClient {
    pub fn new(config: CrmClientConfig) -> Result<Self, CrmError> {
        let http = Client::builder()
            .timeout(config.request_timeout)
            .build()
            .map_err(|e| CrmError::InvalidConfig(format!("failed to build HTTP client: {e}")))?;
        Ok(Self::with_http_client(http, config))
    }

    pub fn with_http_client(http: Client, config: CrmClientConfig) -> Self {
        Self {
            http,
            base_url: config.base_url.as_str().trim_end_matches('/').to_string(),
            fields: config.fields,
            update_delay: config.update_delay,
        }
    }

    fn api_url(&self, path: &str) -> String {
        format!("{}/api/v4/{}", self.base_url, path)
    }

    fn update_payload<'a>(&self, fields: &'a AttributionFields) -> LeadPatch<'a> {
        let custom_fields_values = self
            .fields
            .ids()
            .into_iter()
            .zip(fields.values())
            .map(|(field_id, value)| CustomFieldValue {
                field_id,
                values: [FieldValue { value }],
            })
            .collect();
        LeadPatch {
            custom_fields_values,
        }
    }
}

#[async_trait]
impl LeadApi for CrmClient {
    async fn search_lead(
        &self,
        identity: &SubmissionIdentity,
        access_token: &str,
    ) -> Result<RemoteOutcome<LeadId>, CrmError> {
        let term = identity.query_term().unwrap_or_default();
        let response = self
            .http
            .get(self.api_url("contacts"))
            .bearer_auth(access_token)
            .query(&[("query", term), ("with", "leads")])
            .send()
            .await?;

        let status = response.status();
        match status {
            StatusCode::UNAUTHORIZED => {
                let body = response.text().await.unwrap_or_default();
                tracing::warn!(status = status.as_u16(), %body, "Contact search unauthorized");
                return Ok(RemoteOutcome::AuthExpired);
            }
            StatusCode::NO_CONTENT => return Ok(RemoteOutcome::NotYetAvailable),
            StatusCode::OK => {}
            _ => {
                let body = response.text().await.unwrap_or_default();
                tracing::error!(status = status.as_u16(), %body, "Contact search failed");
                return Ok(RemoteOutcome::HardError {
                    status: status.as_u16(),
                    body,
                });
            }
        }

        let body = response.text().await?;
        let page: ContactsPage = match serde_json::from_str(&body) {
            Ok(page) => page,
            Err(e) => {
                tracing::error!(error = %e, %body, "Contact search returned an unreadable body");
                return Ok(RemoteOutcome::HardError {
                    status: status.as_u16(),
                    body,
                });
            }
        };

        Ok(page.first_lead().map_or(RemoteOutcome::NotYetAvailable, RemoteOutcome::Success))
    }

    async fn update_lead(
        &self,
        lead_id: &LeadId,
        fields: &AttributionFields,
        access_token: &str,
    ) -> Result<RemoteOutcome<()>, CrmError> {
        if !self.update_delay.is_zero() {
            tokio::time::sleep(self.update_delay).await;
        }

        let response = self
            .http
            .patch(self.api_url(&format!("leads/{lead_id}")))
            .bearer_auth(access_token)
            .json(&self.update_payload(fields))
            .send()
            .await?;

        let status = response.status();
        match status {
            StatusCode::UNAUTHORIZED => {
                let body = response.text().await.unwrap_or_default();
                tracing::warn!(
                    lead_id = %lead_id,
                    status = status.as_u16(),
                    %body,
                    "Lead update unauthorized"
                );
                Ok(RemoteOutcome::AuthExpired)
            }
            StatusCode::OK | StatusCode::NO_CONTENT => Ok(RemoteOutcome::Success(())),
            _ => {
                let body = response.text().await.unwrap_or_default();
                tracing::error!(
                    lead_id = %lead_id,
                    status = status.as_u16(),
                    %body,
                    "Lead update failed"
                );
                Ok(RemoteOutcome::HardError {
                    status: status.as_u16(),
                    body,
                })
            }
        }
    }
}

// ---- wire types ----

#[derive(Debug, Deserialize)]
struct ContactsPage {
    #[serde(rename = "_embedded", default)]
    embedded: Option<ContactsEmbedded>,
}

#[derive(Debug, Deserialize)]
struct ContactsEmbedded {
    #[serde(default)]
    contacts: Vec<Contact>,
}

#[derive(Debug, Deserialize)]
struct Contact {
    #[serde(default)]
    id: Option<serde_json::Value>,
    #[serde(rename = "_embedded", default)]
    embedded: Option<ContactLeads>,
}

#[derive(Debug, Deserialize)]
struct ContactLeads {
    #[serde(default)]
    leads: Vec<LeadRef>,
}

#[derive(Debug, Deserialize)]
struct LeadRef {
    id: LeadId,
}

impl ContactsPage {
    fn first_lead(self) -> Option<LeadId> {
        let contact = self.embedded?.contacts.into_iter().next()?;
        let contact_id = contact.id.map(|id| id.to_string()).unwrap_or_default();
        match contact.embedded.and_then(|e| e.leads.into_iter().next()) {
            Some(lead) => {
                tracing::debug!(contact_id = %contact_id, lead_id = %lead.id, "Contact has a lead");
                Some(lead.id)
            }
            None => {
                tracing::debug!(contact_id = %contact_id, "Contact found without leads");
                None
            }
        }
    }
}

#[derive(Debug, Serialize)]
struct LeadPatch<'a> {
    custom_fields_values: Vec<CustomFieldValue<'a>>,
}

#[derive(Debug, Serialize)]
struct CustomFieldValue<'a> {
    field_id: i64,
    values: [FieldValue<'a>; 1],
}

#[derive(Debug, Serialize)]
struct FieldValue<'a> {
    value: &'a str,
}
