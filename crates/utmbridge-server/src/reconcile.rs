//! Lead reconciliation.
//!
//! A form submission reaches us before the CRM's own integration has created
//! the contact and lead, so the engine polls contact search until a lead
//! appears and then writes the attribution fields onto it.
//!
//! ```text
//! Searching ──found──▶ Updating ──ok──▶ Done
//!    │  ▲                 │
//!    │  └──Refreshing◀────┘ (401, once per update)
//!    └──401──▶ Refreshing ──▶ Searching (same attempt)
//! ```
//!
//! Anything else ends in `Failed`. A 401 is only recoverable when a
//! [`TokenRefresher`] is configured; in access-only mode it is terminal.

use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use utmbridge_crm::{
    AttributionFields, CredentialError, CredentialStore, CrmError, LeadApi, LeadId,
    RefreshError, RemoteOutcome, SubmissionIdentity, TokenRefresher,
};

/// Polling and retry limits for one reconciliation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconcilePolicy {
    /// Contact searches before the lead is declared missing.
    pub max_attempts: u32,
    /// Wait after every search that found no lead.
    pub poll_interval: Duration,
    /// Token refreshes allowed across the whole reconciliation.
    pub max_refreshes: u32,
}

impl Default for ReconcilePolicy {
    fn default() -> Self {
        Self {
            max_attempts: 10,
            poll_interval: Duration::from_secs(2),
            max_refreshes: 3,
        }
    }
}

/// Successful reconciliation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reconciled {
    pub lead_id: LeadId,
    pub search_attempts: u32,
    pub refreshes: u32,
}

#[derive(Debug, Error)]
pub enum ReconcileError {
    #[error("Credentials unavailable: {0}")]
    Credentials(#[from] CredentialError),

    #[error("CRM authorization failed: {0}")]
    Unauthorized(String),

    #[error("No lead found after {attempts} search attempts")]
    NotFound { attempts: u32 },

    #[error("Contact search failed (HTTP {status})")]
    SearchFailed { status: u16, body: String },

    #[error("Update of lead {lead_id} failed (HTTP {status})")]
    UpdateFailed {
        lead_id: LeadId,
        status: u16,
        body: String,
    },

    #[error(transparent)]
    Crm(#[from] CrmError),
}

impl From<RefreshError> for ReconcileError {
    fn from(err: RefreshError) -> Self {
        match err {
            RefreshError::Store(e) => Self::Credentials(e),
            RefreshError::Crm(e) => Self::Crm(e),
            other => Self::Unauthorized(other.to_string()),
        }
    }
}

/// States of a single reconciliation run.
#[derive(Debug)]
enum State {
    Searching { attempt: u32 },
    Refreshing { resume: Resume },
    Updating { lead_id: LeadId, retried: bool },
    Done(LeadId),
    Failed(ReconcileError),
}

/// Where to continue after a successful refresh.
#[derive(Debug)]
enum Resume {
    Search { attempt: u32 },
    Update { lead_id: LeadId },
}

/// Mutable data carried through one run.
struct Run<'a> {
    identity: &'a SubmissionIdentity,
    fields: &'a AttributionFields,
    access_token: String,
    searches: u32,
    refreshes: u32,
}

pub struct ReconcileEngine {
    crm: Arc<dyn LeadApi>,
    store: Arc<dyn CredentialStore>,
    refresher: Option<Arc<dyn TokenRefresher>>,
    policy: ReconcilePolicy,
}

impl ReconcileEngine {
    pub fn new(
        crm: Arc<dyn LeadApi>,
        store: Arc<dyn CredentialStore>,
        refresher: Option<Arc<dyn TokenRefresher>>,
        policy: ReconcilePolicy,
    ) -> Self {
        Self {
            crm,
            store,
            refresher,
            policy,
        }
    }

    pub fn policy(&self) -> &ReconcilePolicy {
        &self.policy
    }

    pub fn can_refresh(&self) -> bool {
        self.refresher.is_some()
    }

    /// Finds the lead created for this submission and writes `fields` onto it.
    #[tracing::instrument(
        name = "reconcile",
        skip_all,
        fields(query = identity.query_term().unwrap_or_default())
    )]
    pub async fn reconcile(
        &self,
        identity: &SubmissionIdentity,
        fields: &AttributionFields,
    ) -> Result<Reconciled, ReconcileError> {
        let credential = match self.store.load().await {
            Ok(c) => c,
            Err(e) => {
                tracing::error!(error = %e, "Failed to load CRM credentials");
                return Err(e.into());
            }
        };

        let mut run = Run {
            identity,
            fields,
            access_token: credential.access_token,
            searches: 0,
            refreshes: 0,
        };

        let mut state = State::Searching { attempt: 1 };
        loop {
            state = match state {
                State::Searching { attempt } => self.search(&mut run, attempt).await,
                State::Refreshing { resume } => self.refresh(&mut run, resume).await,
                State::Updating { lead_id, retried } => {
                    self.update(&mut run, lead_id, retried).await
                }
                State::Done(lead_id) => {
                    tracing::info!(
                        lead_id = %lead_id,
                        searches = run.searches,
                        refreshes = run.refreshes,
                        "Lead attribution updated"
                    );
                    return Ok(Reconciled {
                        lead_id,
                        search_attempts: run.searches,
                        refreshes: run.refreshes,
                    });
                }
                State::Failed(err) => {
                    tracing::warn!(
                        error = %err,
                        searches = run.searches,
                        refreshes = run.refreshes,
                        "Reconciliation failed"
                    );
                    return Err(err);
                }
            };
        }
    }

    async fn search(&self, run: &mut Run<'_>, attempt: u32) -> State {
        if attempt > self.policy.max_attempts {
            return State::Failed(ReconcileError::NotFound {
                attempts: self.policy.max_attempts,
            });
        }

        run.searches += 1;
        let outcome = match self.crm.search_lead(run.identity, &run.access_token).await {
            Ok(outcome) => outcome,
            Err(e) => return State::Failed(e.into()),
        };

        match outcome {
            RemoteOutcome::Success(lead_id) => {
                tracing::info!(attempt, lead_id = %lead_id, "Lead found");
                State::Updating {
                    lead_id,
                    retried: false,
                }
            }
            RemoteOutcome::NotYetAvailable => {
                tracing::debug!(
                    attempt,
                    max_attempts = self.policy.max_attempts,
                    "Lead not created yet, waiting"
                );
                tokio::time::sleep(self.policy.poll_interval).await;
                State::Searching {
                    attempt: attempt + 1,
                }
            }
            RemoteOutcome::AuthExpired => {
                if self.refresher.is_none() {
                    return State::Failed(ReconcileError::Unauthorized(
                        "access token rejected during contact search".into(),
                    ));
                }
                tracing::info!(attempt, "Access token expired during search");
                State::Refreshing {
                    resume: Resume::Search { attempt },
                }
            }
            RemoteOutcome::HardError { status, body } => {
                State::Failed(ReconcileError::SearchFailed { status, body })
            }
        }
    }

    async fn refresh(&self, run: &mut Run<'_>, resume: Resume) -> State {
        let Some(refresher) = self.refresher.as_ref() else {
            return State::Failed(ReconcileError::Unauthorized(
                "token refresh is not configured".into(),
            ));
        };
        if run.refreshes >= self.policy.max_refreshes {
            return State::Failed(ReconcileError::Unauthorized(format!(
                "access token still rejected after {} refreshes",
                run.refreshes
            )));
        }

        run.refreshes += 1;
        let credential = match refresher.refresh(self.store.as_ref()).await {
            Ok(c) => c,
            Err(e) => {
                tracing::error!(error = %e, "Token refresh failed");
                return State::Failed(e.into());
            }
        };
        run.access_token = credential.access_token;

        match resume {
            Resume::Search { attempt } => State::Searching { attempt },
            Resume::Update { lead_id } => State::Updating {
                lead_id,
                retried: true,
            },
        }
    }

    async fn update(&self, run: &mut Run<'_>, lead_id: LeadId, retried: bool) -> State {
        let outcome = match self
            .crm
            .update_lead(&lead_id, run.fields, &run.access_token)
            .await
        {
            Ok(outcome) => outcome,
            Err(e) => {
                tracing::error!(lead_id = %lead_id, error = %e, "Lead update request failed");
                return State::Failed(e.into());
            }
        };

        match outcome {
            RemoteOutcome::Success(()) => State::Done(lead_id),
            RemoteOutcome::AuthExpired if !retried && self.refresher.is_some() => {
                tracing::info!(lead_id = %lead_id, "Access token expired during update");
                State::Refreshing {
                    resume: Resume::Update { lead_id },
                }
            }
            RemoteOutcome::AuthExpired => State::Failed(ReconcileError::Unauthorized(format!(
                "access token rejected while updating lead {lead_id}"
            ))),
            // update_lead never yields this; treat it as a failed write.
            RemoteOutcome::NotYetAvailable => State::Failed(ReconcileError::UpdateFailed {
                lead_id,
                status: 204,
                body: String::new(),
            }),
            RemoteOutcome::HardError { status, body } => {
                State::Failed(ReconcileError::UpdateFailed {
                    lead_id,
                    status,
                    body,
                })
            }
        }
    }
}
