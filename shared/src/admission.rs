//! Player admission payload
//!
//! A connecting player identifies itself with a fixed set of named fields,
//! either as URL query parameters or as the `Join` handshake map. Parsing
//! happens before any session state is touched; the first missing field is
//! named in the error.

use std::collections::BTreeMap;
use thiserror::Error;
use url::form_urlencoded;

/// Required handshake fields, in the order they are checked
pub const REQUIRED_FIELDS: [&str; 10] = [
    "assetId",
    "profileId",
    "playerId",
    "worldSlug",
    "sessionId",
    "displayName",
    "username",
    "nonce",
    "key",
    "identity",
];

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AdmissionError {
    #[error("missing required field `{0}`")]
    MissingField(&'static str),

    #[error("field `{field}` is malformed: {reason}")]
    Malformed { field: &'static str, reason: String },

    #[error("unknown game `{0}`")]
    UnknownGame(String),

    #[error("session `{session}` is full ({max_players} players)")]
    SessionFull { session: String, max_players: usize },

    #[error("session `{0}` is shutting down")]
    SessionClosed(String),
}

/// Who a player is, as far as game logic is concerned
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlayerIdentity {
    pub display_name: String,
    pub username: String,
    pub profile_id: String,
    pub numeric_id: u32,
    pub asset_id: String,
    pub world_slug: String,
    pub session_id: String,
}

impl PlayerIdentity {
    /// Identity for a connection-less participant
    pub fn bot(name: &str, numeric_id: u32, session_id: &str) -> Self {
        Self {
            display_name: name.to_string(),
            username: name.to_lowercase(),
            profile_id: format!("bot-{}", numeric_id),
            numeric_id,
            asset_id: String::new(),
            world_slug: String::new(),
            session_id: session_id.to_string(),
        }
    }
}

/// Authentication material carried alongside the identity
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Credentials {
    pub nonce: String,
    pub key: String,
    pub identity: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JoinRequest {
    pub identity: PlayerIdentity,
    pub credentials: Credentials,
}

impl JoinRequest {
    /// Parses `a=1&b=2` style query strings; a leading `?` is allowed
    pub fn from_query(query: &str) -> Result<Self, AdmissionError> {
        let fields: BTreeMap<String, String> =
            form_urlencoded::parse(query.trim_start_matches('?').as_bytes())
                .map(|(name, value)| (name.into_owned(), value.into_owned()))
                .collect();

        Self::from_fields(&fields)
    }

    pub fn from_fields(fields: &BTreeMap<String, String>) -> Result<Self, AdmissionError> {
        for name in REQUIRED_FIELDS {
            match fields.get(name) {
                Some(value) if !value.trim().is_empty() => {}
                _ => return Err(AdmissionError::MissingField(name)),
            }
        }

        let get = |name: &str| fields.get(name).cloned().unwrap_or_default();

        let numeric_id = get("playerId")
            .trim()
            .parse::<u32>()
            .map_err(|e| AdmissionError::Malformed {
                field: "playerId",
                reason: e.to_string(),
            })?;

        Ok(Self {
            identity: PlayerIdentity {
                display_name: get("displayName"),
                username: get("username"),
                profile_id: get("profileId"),
                numeric_id,
                asset_id: get("assetId"),
                world_slug: get("worldSlug"),
                session_id: get("sessionId"),
            },
            credentials: Credentials {
                nonce: get("nonce"),
                key: get("key"),
                identity: get("identity"),
            },
        })
    }

    /// Inverse of [`JoinRequest::from_fields`], used by clients to build the handshake
    pub fn to_fields(&self) -> BTreeMap<String, String> {
        let pairs = [
            ("assetId", self.identity.asset_id.clone()),
            ("profileId", self.identity.profile_id.clone()),
            ("playerId", self.identity.numeric_id.to_string()),
            ("worldSlug", self.identity.world_slug.clone()),
            ("sessionId", self.identity.session_id.clone()),
            ("displayName", self.identity.display_name.clone()),
            ("username", self.identity.username.clone()),
            ("nonce", self.credentials.nonce.clone()),
            ("key", self.credentials.key.clone()),
            ("identity", self.credentials.identity.clone()),
        ];

        pairs
            .into_iter()
            .map(|(name, value)| (name.to_string(), value))
            .collect()
    }
}
