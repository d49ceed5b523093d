use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::Message;

// -- Session tokens --

/// What a signed token may be used for. Login tokens travel in emailed links
/// and can only be exchanged for a session; they never authorize a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TokenPurpose {
    Login,
    Session,
}

/// JWT claims for both login links and sessions. `sub` is the email address.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String,
    pub purpose: TokenPurpose,
    pub iat: usize,
    pub exp: usize,
}

/// Verified caller identity, built once per request by the session middleware.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthContext {
    pub identity: String,
    pub is_admin: bool,
}

// -- Auth --

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MagicLinkRequest {
    pub email: String,
}

// -- Messages --

#[derive(Debug, Serialize, Deserialize)]
pub struct CreateMessageResponse {
    pub id: Uuid,
    pub link: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ReadMessageResponse {
    pub image_url: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct DeleteMessageResponse {
    pub success: bool,
}

/// Admin listing entry; `expired` is evaluated at request time.
#[derive(Debug, Serialize, Deserialize)]
pub struct MessageListItem {
    #[serde(flatten)]
    pub message: Message,
    pub expired: bool,
}

/// Keyset position in the admin listing: the last row of the previous page.
/// Travels as `<created_at unix millis>.<id>`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ListCursor {
    pub created_at: DateTime<Utc>,
    pub id: Uuid,
}

impl ListCursor {
    pub fn after(message: &Message) -> Self {
        Self {
            created_at: message.created_at,
            id: message.id,
        }
    }
}

impl fmt::Display for ListCursor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.created_at.timestamp_millis(), self.id)
    }
}

impl FromStr for ListCursor {
    type Err = &'static str;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (millis, id) = s.split_once('.').ok_or("cursor must be <millis>.<id>")?;
        let millis: i64 = millis.parse().map_err(|_| "cursor timestamp is not a number")?;
        Ok(Self {
            created_at: DateTime::from_timestamp_millis(millis).ok_or("cursor timestamp out of range")?,
            id: id.parse().map_err(|_| "cursor id is not a uuid")?,
        })
    }
}

/// One page of the admin listing. `next` is the cursor for older messages.
#[derive(Debug, Serialize, Deserialize)]
pub struct MessagePage {
    pub messages: Vec<MessageListItem>,
    pub next: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
}
