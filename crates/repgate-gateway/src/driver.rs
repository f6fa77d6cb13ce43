//! Line protocol for the `repgate` binary
//!
//! Stands in for an HTTP front end. Each input line is one command:
//!
//! ```text
//! GET /api/v1/entities sk_live_...     run a request through the gateway
//! issue <owner> <tier> [label]         issue an API key
//! revoke <token>                       revoke an API key
//! stats                                admission and cache counters
//! ```
//!
//! Each command produces one JSON object.

use crate::tier::{Tier, UnknownTier};
use crate::{Gateway, GatewayRequest};
use serde_json::{json, Value};
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DriverError {
    #[error("empty command")]
    Empty,

    #[error("usage: {0}")]
    Usage(&'static str),

    #[error(transparent)]
    Tier(#[from] UnknownTier),

    #[error("bad bootstrap entry {0:?}, expected owner:tier")]
    Bootstrap(String),
}

/// Parsed input line
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Command {
    Request {
        method: String,
        path: String,
        token: Option<String>,
    },
    Issue {
        owner_id: String,
        tier: Tier,
        label: Option<String>,
    },
    Revoke {
        token: String,
    },
    Stats,
}

impl Command {
    pub fn parse(line: &str) -> Result<Self, DriverError> {
        let mut parts = line.split_whitespace();
        let head = parts.next().ok_or(DriverError::Empty)?;

        match head.to_ascii_lowercase().as_str() {
            "issue" => {
                let usage = DriverError::Usage("issue <owner> <tier> [label]");
                let owner_id = parts.next().ok_or_else(|| usage.clone())?.to_string();
                let tier: Tier = parts.next().ok_or(usage)?.parse()?;
                let label: Vec<&str> = parts.collect();
                Ok(Self::Issue {
                    owner_id,
                    tier,
                    label: (!label.is_empty()).then(|| label.join(" ")),
                })
            }
            "revoke" => {
                let token = parts.next().ok_or(DriverError::Usage("revoke <token>"))?;
                Ok(Self::Revoke {
                    token: token.to_string(),
                })
            }
            "stats" => Ok(Self::Stats),
            _ => {
                let path = parts.next().ok_or(DriverError::Usage("<METHOD> <path> [token]"))?;
                Ok(Self::Request {
                    method: head.to_ascii_uppercase(),
                    path: path.to_string(),
                    token: parts.next().map(str::to_string),
                })
            }
        }
    }
}

/// Parse `owner:tier` pairs separated by commas
pub fn parse_bootstrap(spec: &str) -> Result<Vec<(String, Tier)>, DriverError> {
    spec.split(',')
        .map(str::trim)
        .filter(|entry| !entry.is_empty())
        .map(|entry| {
            let (owner, tier) = entry
                .split_once(':')
                .ok_or_else(|| DriverError::Bootstrap(entry.to_string()))?;
            if owner.is_empty() {
                return Err(DriverError::Bootstrap(entry.to_string()));
            }
            Ok((owner.to_string(), tier.parse::<Tier>()?))
        })
        .collect()
}

/// Run a command against the gateway
pub fn execute(gateway: &Gateway, command: Command) -> Value {
    match command {
        Command::Request { method, path, token } => {
            let mut request = GatewayRequest::new(method, path);
            if let Some(token) = token {
                request = request.with_header(gateway.auth().api_key_header.clone(), token);
            }
            match gateway.process(&request) {
                Ok(response) => json!({
                    "status": 200,
                    "response": response,
                }),
                Err(e) => json!({
                    "status": e.status_code(),
                    "error": e.to_string(),
                    "retry_after": e.retry_after(),
                    "headers": e.headers(),
                }),
            }
        }
        Command::Issue { owner_id, tier, label } => {
            let token = gateway.credentials().issue(&owner_id, tier, label.as_deref());
            json!({
                "owner_id": owner_id,
                "tier": tier,
                "api_key": token,
            })
        }
        Command::Revoke { token } => json!({
            "revoked": gateway.credentials().revoke(&token),
        }),
        Command::Stats => json!({
            "admission": gateway.admission().stats(),
            "cache": gateway.cache().map(|c| c.stats()),
            "credentials": gateway.credentials().len(),
            "routes": gateway.router().len(),
        }),
    }
}
