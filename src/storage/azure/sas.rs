//! Service SAS tokens for single blobs.
//!
//! Tokens are always read-only (`sp=r`), scoped to one blob (`sr=b`) and
//! restricted to HTTPS.  The start time is backdated by five minutes to
//! absorb clock skew between this host and the service.
//!
//! Reference: <https://learn.microsoft.com/en-us/rest/api/storageservices/create-service-sas>

use chrono::{DateTime, Duration, Utc};

use super::credential::Credentials;
use super::path::encode_component;
use crate::storage::backend::ResponseOverrides;

const SIGNED_PERMISSIONS: &str = "r";
const SIGNED_RESOURCE: &str = "b";
const SIGNED_PROTOCOL: &str = "https";
const CLOCK_SKEW_SECONDS: i64 = 300;

/// Generates read-only SAS query strings.
#[derive(Debug, Clone)]
pub struct SasTokenGenerator {
    credentials: Credentials,
    api_version: String,
}

impl SasTokenGenerator {
    pub fn new(credentials: Credentials, api_version: impl Into<String>) -> Self {
        Self {
            credentials,
            api_version: api_version.into(),
        }
    }

    /// Query string granting read access to `resource_path` (the unencoded
    /// `/{container}/{blob}` path) until `expires_at`.
    pub fn token(
        &self,
        resource_path: &str,
        expires_at: DateTime<Utc>,
        overrides: &ResponseOverrides,
    ) -> String {
        self.token_at(resource_path, Utc::now(), expires_at, overrides)
    }

    pub(crate) fn token_at(
        &self,
        resource_path: &str,
        now: DateTime<Utc>,
        expires_at: DateTime<Utc>,
        overrides: &ResponseOverrides,
    ) -> String {
        let start = format_time(now - Duration::seconds(CLOCK_SKEW_SECONDS));
        let expiry = format_time(expires_at);
        let string_to_sign = self.string_to_sign(resource_path, &start, &expiry, overrides);
        let signature = self.credentials.sign(&string_to_sign);

        let mut params: Vec<(&str, &str)> = vec![
            ("sv", self.api_version.as_str()),
            ("st", start.as_str()),
            ("se", expiry.as_str()),
            ("sr", SIGNED_RESOURCE),
            ("sp", SIGNED_PERMISSIONS),
            ("spr", SIGNED_PROTOCOL),
            ("sig", signature.as_str()),
        ];
        for (key, value) in override_fields(overrides) {
            if let Some(value) = value {
                params.push((key, value));
            }
        }

        params
            .into_iter()
            .map(|(k, v)| format!("{}={}", k, encode_component(v)))
            .collect::<Vec<_>>()
            .join("&")
    }

    /// The 16-line service SAS string-to-sign.
    pub(crate) fn string_to_sign(
        &self,
        resource_path: &str,
        start: &str,
        expiry: &str,
        overrides: &ResponseOverrides,
    ) -> String {
        let canonical_resource = format!("/blob/{}{}", self.credentials.account(), resource_path);

        let mut fields: Vec<&str> = vec![
            SIGNED_PERMISSIONS,
            start,
            expiry,
            canonical_resource.as_str(),
            "", // signed identifier
            "", // signed IP
            SIGNED_PROTOCOL,
            self.api_version.as_str(),
            SIGNED_RESOURCE,
            "", // snapshot time
            "", // encryption scope
        ];
        fields.extend(
            override_fields(overrides)
                .into_iter()
                .map(|(_, v)| v.unwrap_or("")),
        );
        fields.join("\n")
    }
}

/// Response header overrides in signing order with their query keys.
fn override_fields(overrides: &ResponseOverrides) -> [(&'static str, Option<&str>); 5] {
    [
        ("rscc", overrides.cache_control.as_deref()),
        ("rscd", overrides.content_disposition.as_deref()),
        ("rsce", overrides.content_encoding.as_deref()),
        ("rscl", overrides.content_language.as_deref()),
        ("rsct", overrides.content_type.as_deref()),
    ]
}

/// UTC, second precision, trailing `Z`.
pub fn format_time(time: DateTime<Utc>) -> String {
    time.format("%Y-%m-%dT%H:%M:%SZ").to_string()
}
