use serde::{Deserialize, Serialize};

use crate::codec;

/// Minimum allowed length of token names.
pub const MIN_TOKEN_NAME_LEN: usize = 1;
/// Maximum allowed length of token names.
pub const MAX_TOKEN_NAME_LEN: usize = 25;

/// Root token document as stored remotely.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenRecord {
    pub id: String,
    pub name: String,
    pub owner: String,
    /// Canonical ping URL.
    pub url: String,
    /// Shortened ping URL, or `url` when shortening failed.
    pub short_url: String,
}

/// A request-group document exactly as it arrives from the remote store.
///
/// `time_logs` holds offsets relative to `group_id`, never absolute times.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawRequestGroup {
    pub group_id: i64,
    #[serde(default)]
    pub request_count: u64,
    pub token_id: String,
    #[serde(default)]
    pub time_logs: Vec<i64>,
}

/// A decoded request group. Only [`codec::decode`] builds one, so a group can
/// never be decoded twice.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenRequestGroup {
    pub(crate) group_id: i64,
    pub(crate) request_count: u64,
    pub(crate) token_id: String,
    pub(crate) time_logs: Vec<i64>,
}

impl TokenRequestGroup {
    /// UTC millis marking the start of this group's bucket.
    pub fn group_id(&self) -> i64 {
        self.group_id
    }

    pub fn request_count(&self) -> u64 {
        self.request_count
    }

    pub fn token_id(&self) -> &str {
        &self.token_id
    }

    /// Absolute UTC millisecond timestamps, in wire order.
    pub fn time_logs(&self) -> &[i64] {
        &self.time_logs
    }
}

/// A token with its materialized request history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Token {
    #[serde(flatten)]
    pub record: TokenRecord,
    pub token_requests: Vec<TokenRequestGroup>,
}

impl Token {
    pub fn new(record: TokenRecord) -> Self {
        Self {
            record,
            token_requests: Vec::new(),
        }
    }

    /// Build a token from a root record and its raw request groups.
    pub fn from_raw(record: TokenRecord, groups: Vec<RawRequestGroup>) -> Self {
        Self {
            record,
            token_requests: codec::decode_all(groups),
        }
    }

    pub fn id(&self) -> &str {
        &self.record.id
    }

    pub fn name(&self) -> &str {
        &self.record.name
    }
}

/// Serialized token with raw groups, as exported from the remote store.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenExport {
    #[serde(flatten)]
    pub record: TokenRecord,
    #[serde(default)]
    pub token_requests: Vec<RawRequestGroup>,
}

impl From<TokenExport> for Token {
    fn from(export: TokenExport) -> Self {
        Token::from_raw(export.record, export.token_requests)
    }
}

/// Check a display name against the allowed length range.
pub fn validate_token_name(name: &str) -> Result<(), String> {
    let len = name.chars().count();
    if len < MIN_TOKEN_NAME_LEN {
        return Err("token name cannot be empty".to_string());
    }
    if len > MAX_TOKEN_NAME_LEN {
        return Err(format!(
            "token name must be at most {} characters (got {})",
            MAX_TOKEN_NAME_LEN, len
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_uses_camel_case_fields() {
        let record = TokenRecord {
            id: "abc".into(),
            name: "readme".into(),
            owner: "u1".into(),
            url: "https://ping.example/abc".into(),
            short_url: "https://s.example/x".into(),
        };
        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(json["shortUrl"], "https://s.example/x");
        assert!(json.get("short_url").is_none());
    }

    #[test]
    fn test_raw_group_defaults_missing_fields() {
        let raw: RawRequestGroup =
            serde_json::from_str(r#"{"groupId": 1000, "tokenId": "t1"}"#).unwrap();
        assert_eq!(raw.request_count, 0);
        assert!(raw.time_logs.is_empty());
    }

    #[test]
    fn test_export_decodes_offsets() {
        let export: TokenExport = serde_json::from_str(
            r#"{
                "id": "t1", "name": "n", "owner": "o", "url": "u", "shortUrl": "s",
                "tokenRequests": [{"groupId": 1000, "requestCount": 2, "tokenId": "t1", "timeLogs": [0, 500]}]
            }"#,
        )
        .unwrap();
        let token = Token::from(export);
        assert_eq!(token.token_requests[0].time_logs(), &[1000, 1500]);
    }

    #[test]
    fn test_validate_token_name_bounds() {
        assert!(validate_token_name("").is_err());
        assert!(validate_token_name("a").is_ok());
        assert!(validate_token_name(&"x".repeat(25)).is_ok());
        assert!(validate_token_name(&"x".repeat(26)).is_err());
        // counted in characters, not bytes
        assert!(validate_token_name(&"é".repeat(25)).is_ok());
    }
}
