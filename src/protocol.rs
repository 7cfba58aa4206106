//! HTTP Protocol Types
//!
//! Payload models for the trigger endpoints (GitHub fork webhooks and tick
//! requests) and the JSON status responses they return, plus webhook
//! signature verification.

use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;

use crate::quest::{TickCadence, TickReport};

type HmacSha256 = Hmac<Sha256>;

// ============================================================================
// GitHub webhook payloads
// ============================================================================

/// User entity inside GitHub webhook payloads.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GitHubUser {
    pub login: String,
    pub id: i64,
}

/// Repository entity inside GitHub webhook payloads.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GitHubRepository {
    pub id: i64,
    /// "owner/repo"
    pub full_name: String,
    pub owner: GitHubUser,
    /// API URL of the repository
    pub url: String,
}

/// Payload of a GitHub fork webhook.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GitHubForkHook {
    /// The fork that was created
    pub forkee: GitHubRepository,
    /// The repository being forked
    pub repository: GitHubRepository,
}

impl GitHubForkHook {
    /// Whether the forked repository is the configured upstream.
    pub fn is_repo(&self, upstream: &str) -> bool {
        self.repository.full_name == upstream
    }
}

// ============================================================================
// Tick trigger
// ============================================================================

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct TickRequest {
    pub cadence: TickCadence,
}

#[derive(Debug, Serialize)]
pub struct TickResponse {
    pub success: bool,
    #[serde(flatten)]
    pub report: TickReport,
}

// ============================================================================
// Status responses
// ============================================================================

#[derive(Debug, Serialize)]
pub struct StatusResponse {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl StatusResponse {
    pub fn ok() -> Self {
        Self {
            success: true,
            error: None,
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            success: false,
            error: Some(message.into()),
        }
    }
}

// ============================================================================
// Webhook signature verification
// ============================================================================

/// Validate a GitHub webhook signature header (`X-Hub-Signature-256`)
/// against the raw request body. Returns false on any malformed input; the
/// comparison itself is constant time.
pub fn verify_signature(secret: &str, body: &[u8], signature_header: &str) -> bool {
    let Some(signature_hex) = signature_header.strip_prefix("sha256=") else {
        return false;
    };
    let Ok(signature) = hex::decode(signature_hex) else {
        return false;
    };

    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .expect("HMAC can take key of any size");
    mac.update(body);
    mac.verify_slice(&signature).is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    const FORK_PAYLOAD: &str = r#"{
        "forkee": {
            "id": 2,
            "full_name": "player/sandbox",
            "owner": {"login": "player", "id": 4242},
            "url": "https://api.github.com/repos/player/sandbox",
            "fork": true
        },
        "repository": {
            "id": 1,
            "full_name": "gitquest/sandbox",
            "owner": {"login": "gitquest", "id": 1},
            "url": "https://api.github.com/repos/gitquest/sandbox",
            "stargazers_count": 3
        },
        "sender": {"login": "player", "id": 4242}
    }"#;

    #[test]
    fn test_fork_payload_parses_with_extra_fields() {
        let hook: GitHubForkHook = serde_json::from_str(FORK_PAYLOAD).unwrap();
        assert_eq!(hook.forkee.owner.id, 4242);
        assert_eq!(hook.forkee.full_name, "player/sandbox");
        assert!(hook.is_repo("gitquest/sandbox"));
        assert!(!hook.is_repo("someone/else"));
    }

    #[test]
    fn test_tick_request_parses() {
        let req: TickRequest = serde_json::from_str(r#"{"cadence":"fast"}"#).unwrap();
        assert_eq!(req.cadence, TickCadence::Fast);
        let req: TickRequest = serde_json::from_str(r#"{"cadence":"full"}"#).unwrap();
        assert_eq!(req.cadence, TickCadence::Full);
        assert!(serde_json::from_str::<TickRequest>(r#"{"cadence":"slow"}"#).is_err());
    }

    #[test]
    fn test_verify_signature() {
        let secret = "it's a secret to everybody";
        let body = b"{\"zen\":\"Design for failure.\"}";

        let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).unwrap();
        mac.update(body);
        let header = format!("sha256={}", hex::encode(mac.finalize().into_bytes()));

        assert!(verify_signature(secret, body, &header));
        assert!(!verify_signature(secret, b"tampered body", &header));
        assert!(!verify_signature("wrong secret", body, &header));
        assert!(!verify_signature(secret, body, "sha256=deadbeef"));
        assert!(!verify_signature(secret, body, "not-a-signature"));
    }
}
