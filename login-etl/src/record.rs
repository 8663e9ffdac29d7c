use chrono::Utc;
use serde::Deserialize;
use thiserror::Error;

use crate::masking::mask;

/// The untrusted body of one queue message, as sent by the upstream login
/// service. Every field is optional; unknown fields are ignored.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct LoginPayload {
    #[serde(default)]
    pub user_id: Option<String>,
    #[serde(default)]
    pub device_type: Option<String>,
    #[serde(default)]
    pub ip: Option<String>,
    #[serde(default)]
    pub device_id: Option<String>,
    #[serde(default)]
    pub locale: Option<String>,
    #[serde(default)]
    pub app_version: Option<String>,
    #[serde(default)]
    pub create_date: Option<String>,
}

#[derive(Error, Debug)]
pub enum RecordError {
    #[error("{raw:?} is not a valid app version")]
    InvalidAppVersion { raw: String },
}

/// One anonymized login event, ready for persistence.
///
/// `masked_ip` and `masked_device_id` only ever hold digests: `build` is the
/// sole constructor on the ingest path and masks the raw values before the
/// record exists.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoginRecord {
    pub user_id: String,
    pub device_type: String,
    pub masked_ip: String,
    pub masked_device_id: String,
    pub locale: String,
    pub app_version: i32,
    pub create_date: String,
}

impl LoginPayload {
    pub fn parse(body: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(body)
    }

    /// A payload where every recognized field is missing, null or empty is
    /// noise from upstream and carries no event.
    fn has_content(&self) -> bool {
        [
            &self.user_id,
            &self.device_type,
            &self.ip,
            &self.device_id,
            &self.locale,
            &self.app_version,
        ]
        .into_iter()
        .any(|field| is_present(field))
    }
}

fn is_present(field: &Option<String>) -> bool {
    field.as_deref().is_some_and(|value| !value.is_empty())
}

/// Build one canonical record from a payload.
///
/// Returns `Ok(None)` for content-free payloads (a completeness gate, not a
/// per-field schema check). Missing fields default to the empty string,
/// except `app_version` which defaults to "0" before normalization. A
/// `create_date` is stamped at construction time when the payload has none.
pub fn build(payload: LoginPayload) -> Result<Option<LoginRecord>, RecordError> {
    if !payload.has_content() {
        return Ok(None);
    }

    let app_version = normalize_app_version(payload.app_version.as_deref().unwrap_or("0"))?;
    let create_date = payload
        .create_date
        .filter(|date| !date.is_empty())
        .unwrap_or_else(|| Utc::now().to_rfc3339());

    Ok(Some(LoginRecord {
        user_id: payload.user_id.unwrap_or_default(),
        device_type: payload.device_type.unwrap_or_default(),
        masked_ip: mask(payload.ip.as_deref().unwrap_or("")),
        masked_device_id: mask(payload.device_id.as_deref().unwrap_or("")),
        locale: payload.locale.unwrap_or_default(),
        app_version,
        create_date,
    }))
}

// "2.10.3" -> 2103. A stripped string that still fails to parse means
// malformed upstream data and must surface, not silently become zero.
fn normalize_app_version(raw: &str) -> Result<i32, RecordError> {
    raw.replace('.', "")
        .parse()
        .map_err(|_| RecordError::InvalidAppVersion { raw: raw.to_owned() })
}
