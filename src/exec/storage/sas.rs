//! Account shared access signatures, signed locally with an account key.

use base64::engine::general_purpose::STANDARD as BASE64_STANDARD;
use base64::Engine;
use chrono::{DateTime, Duration, Utc};
use hmac::{Hmac, Mac};
use sha2::Sha256;

use crate::client::{AzureError, AzureResult};

/// Service version the signature is computed for.
pub const SAS_VERSION: &str = "2019-12-12";

/// What an account SAS grants.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccountSas {
    /// `b`, `f`, `q`, `t`
    pub services: String,
    /// `s`, `c`, `o`
    pub resource_types: String,
    /// `r`, `w`, `d`, `l`, ...
    pub permissions: String,
    pub expiry: DateTime<Utc>,
    pub start: Option<DateTime<Utc>>,
}

impl AccountSas {
    /// Blob read/write/delete/list on every resource type, over HTTPS.
    pub fn blob_read_write(valid_for: Duration) -> Self {
        Self {
            services: "b".to_string(),
            resource_types: "sco".to_string(),
            permissions: "rwdl".to_string(),
            expiry: Utc::now() + valid_for,
            start: None,
        }
    }

    fn timestamp(at: &DateTime<Utc>) -> String {
        at.format("%Y-%m-%dT%H:%M:%SZ").to_string()
    }

    fn string_to_sign(&self, account: &str) -> String {
        format!(
            "{}\n{}\n{}\n{}\n{}\n{}\n{}\n{}\n{}\n",
            account,
            self.permissions,
            self.services,
            self.resource_types,
            self.start.as_ref().map(Self::timestamp).unwrap_or_default(),
            Self::timestamp(&self.expiry),
            "",
            "https",
            SAS_VERSION
        )
    }

    /// Query string (without the leading `?`) signed with a base64 account key.
    pub fn sign(&self, account: &str, key: &str) -> AzureResult<String> {
        let key_bytes = BASE64_STANDARD
            .decode(key)
            .map_err(|e| AzureError::InvalidParameter(format!("storage account key is not base64: {}", e)))?;

        type HmacSha256 = Hmac<Sha256>;
        let mut mac = HmacSha256::new_from_slice(&key_bytes)
            .map_err(|e| AzureError::InvalidParameter(format!("HMAC key error: {}", e)))?;
        mac.update(self.string_to_sign(account).as_bytes());
        let signature = BASE64_STANDARD.encode(mac.finalize().into_bytes());

        let mut query = url::form_urlencoded::Serializer::new(String::new());
        query.append_pair("sv", SAS_VERSION);
        query.append_pair("ss", &self.services);
        query.append_pair("srt", &self.resource_types);
        query.append_pair("sp", &self.permissions);
        if let Some(ref start) = self.start {
            query.append_pair("st", &Self::timestamp(start));
        }
        query.append_pair("se", &Self::timestamp(&self.expiry));
        query.append_pair("spr", "https");
        query.append_pair("sig", &signature);
        Ok(query.finish())
    }
}

/// Drop the query of a URL, so SAS URLs can be compared.
pub fn without_query(url: &str) -> &str {
    url.split('?').next().unwrap_or(url)
}
