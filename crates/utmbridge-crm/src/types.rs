//! Domain types shared by the CRM client, the credential store and the
//! reconciliation engine.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Access credential pair persisted by the credential store.
///
/// `refresh_token` is absent when the service runs in access-only mode with a
/// long-lived token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credential {
    #[serde(default)]
    pub access_token: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
}

impl Credential {
    pub fn new(access_token: impl Into<String>, refresh_token: Option<String>) -> Self {
        Self {
            access_token: access_token.into(),
            refresh_token,
        }
    }
}

/// Identifiers extracted from a form submission used to find the contact.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SubmissionIdentity {
    pub email: Option<String>,
    pub phone: Option<String>,
}

impl SubmissionIdentity {
    /// Builds an identity, treating empty strings as absent.
    ///
    /// Returns `None` when neither email nor phone is usable.
    pub fn new(email: Option<String>, phone: Option<String>) -> Option<Self> {
        let email = email.filter(|e| !e.trim().is_empty());
        let phone = phone.filter(|p| !p.trim().is_empty());
        if email.is_none() && phone.is_none() {
            return None;
        }
        Some(Self { email, phone })
    }

    /// The single search term sent to the CRM: email first, phone otherwise.
    pub fn query_term(&self) -> Option<&str> {
        self.email.as_deref().or(self.phone.as_deref())
    }
}

/// Marketing attribution values submitted alongside the form.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AttributionFields {
    pub utm_source: String,
    pub utm_medium: String,
    pub utm_campaign: String,
    pub utm_content: String,
    pub utm_placement: String,
}

impl AttributionFields {
    /// Hidden-field keys in the order they are written to the lead.
    pub const KEYS: [&'static str; 5] = [
        "utm_source",
        "utm_medium",
        "utm_campaign",
        "utm_content",
        "utm_placement",
    ];

    /// Builds attribution values from a key lookup; missing keys become `""`.
    pub fn from_lookup<F>(mut lookup: F) -> Self
    where
        F: FnMut(&str) -> Option<String>,
    {
        let mut take = |key: &str| lookup(key).unwrap_or_default();
        Self {
            utm_source: take("utm_source"),
            utm_medium: take("utm_medium"),
            utm_campaign: take("utm_campaign"),
            utm_content: take("utm_content"),
            utm_placement: take("utm_placement"),
        }
    }

    pub fn values(&self) -> [&str; 5] {
        [
            &self.utm_source,
            &self.utm_medium,
            &self.utm_campaign,
            &self.utm_content,
            &self.utm_placement,
        ]
    }
}

/// Custom-field identifiers of the five attribution fields on a lead.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CustomFieldIds {
    pub utm_source: i64,
    pub utm_medium: i64,
    pub utm_campaign: i64,
    pub utm_content: i64,
    pub utm_placement: i64,
}

impl CustomFieldIds {
    pub fn ids(&self) -> [i64; 5] {
        [
            self.utm_source,
            self.utm_medium,
            self.utm_campaign,
            self.utm_content,
            self.utm_placement,
        ]
    }
}

/// CRM-assigned lead identifier.
///
/// The CRM returns numeric ids, but the value is treated as opaque text.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "RawId", into = "String")]
pub struct LeadId(String);

impl LeadId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for LeadId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<LeadId> for String {
    fn from(id: LeadId) -> Self {
        id.0
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RawId {
    Int(i64),
    Str(String),
}

impl From<RawId> for LeadId {
    fn from(raw: RawId) -> Self {
        match raw {
            RawId::Int(n) => Self(n.to_string()),
            RawId::Str(s) => Self(s),
        }
    }
}

/// Result of a single CRM call, decided from the HTTP status and body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RemoteOutcome<T> {
    Success(T),
    /// The CRM has not materialized the record yet.
    NotYetAvailable,
    /// The access token was rejected (HTTP 401).
    AuthExpired,
    HardError { status: u16, body: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identity_requires_email_or_phone() {
        assert!(SubmissionIdentity::new(None, None).is_none());
        assert!(SubmissionIdentity::new(Some(String::new()), Some("  ".into())).is_none());

        let phone_only = SubmissionIdentity::new(None, Some("+380501112233".into())).unwrap();
        assert_eq!(phone_only.query_term(), Some("+380501112233"));
    }

    #[test]
    fn identity_prefers_email_for_query() {
        let identity =
            SubmissionIdentity::new(Some("a@b.com".into()), Some("+380501112233".into())).unwrap();
        assert_eq!(identity.query_term(), Some("a@b.com"));
    }

    #[test]
    fn attribution_defaults_missing_keys_to_empty() {
        let fields = AttributionFields::from_lookup(|key| match key {
            "utm_source" => Some("facebook".to_string()),
            "utm_placement" => Some("feed".to_string()),
            _ => None,
        });
        assert_eq!(fields.values(), ["facebook", "", "", "", "feed"]);
    }

    #[test]
    fn lead_id_accepts_numbers_and_strings() {
        let numeric: LeadId = serde_json::from_str("999").unwrap();
        let text: LeadId = serde_json::from_str("\"abc-1\"").unwrap();
        assert_eq!(numeric.as_str(), "999");
        assert_eq!(text.to_string(), "abc-1");
    }

    #[test]
    fn credential_omits_missing_refresh_token() {
        let credential = Credential::new("access", None);
        let json = serde_json::to_value(&credential).unwrap();
        assert_eq!(json, serde_json::json!({ "access_token": "access" }));
    }
}
