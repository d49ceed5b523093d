use axum::{
    Json,
    extract::{Query, State},
    http::StatusCode,
    response::{IntoResponse, Redirect},
};
use axum_extra::extract::cookie::{Cookie, CookieJar, SameSite};
use chrono::{DateTime, Duration, Utc};
use jsonwebtoken::{DecodingKey, EncodingKey, Header, Validation, decode, encode};
use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};

use vanish_types::api::{AuthContext, Claims, MagicLinkRequest, TokenPurpose};

use crate::AppState;
use crate::error::ApiError;

pub const SESSION_COOKIE: &str = "vanish_session";

const LOGIN_TOKEN_MINUTES: i64 = 15;
const SESSION_DAYS: i64 = 30;

/// Where login links go.
#[derive(Clone)]
pub enum Mailer {
    /// Write the link to the log. For single-operator setups and development.
    Log,
    /// POST `{to, subject, link}` to a mail relay.
    Webhook { client: reqwest::Client, url: String },
}

#[derive(Serialize)]
struct MailPayload<'a> {
    to: &'a str,
    subject: &'a str,
    link: &'a str,
}

impl Mailer {
    pub fn from_webhook(url: Option<String>) -> Self {
        match url {
            Some(url) => Mailer::Webhook {
                client: reqwest::Client::new(),
                url,
            },
            None => Mailer::Log,
        }
    }

    pub async fn deliver(&self, to: &str, link: &str) -> anyhow::Result<()> {
        match self {
            Mailer::Log => {
                info!("Sign-in link for {}: {}", to, link);
                Ok(())
            }
            Mailer::Webhook { client, url } => {
                client
                    .post(url)
                    .json(&MailPayload {
                        to,
                        subject: "Your vanish sign-in link",
                        link,
                    })
                    .send()
                    .await?
                    .error_for_status()?;
                info!("Sign-in link sent to {}", to);
                Ok(())
            }
        }
    }
}

/// Passwordless sign-in for the single allow-listed admin.
#[derive(Clone)]
pub struct IdentityProvider {
    secret: String,
    admin_email: String,
    site_url: String,
    mailer: Mailer,
}

impl IdentityProvider {
    pub fn new(secret: &str, admin_email: &str, site_url: &str, mailer: Mailer) -> Self {
        Self {
            secret: secret.to_string(),
            admin_email: admin_email.trim().to_ascii_lowercase(),
            site_url: site_url.trim_end_matches('/').to_string(),
            mailer,
        }
    }

    pub fn is_admin(&self, identity: &str) -> bool {
        identity.trim().eq_ignore_ascii_case(&self.admin_email)
    }

    pub fn issue_token(
        &self,
        identity: &str,
        purpose: TokenPurpose,
        now: DateTime<Utc>,
    ) -> anyhow::Result<String> {
        let lifetime = match purpose {
            TokenPurpose::Login => Duration::minutes(LOGIN_TOKEN_MINUTES),
            TokenPurpose::Session => Duration::days(SESSION_DAYS),
        };
        let claims = Claims {
            sub: identity.trim().to_ascii_lowercase(),
            purpose,
            iat: now.timestamp() as usize,
            exp: (now + lifetime).timestamp() as usize,
        };

        let token = encode(
            &Header::default(),
            &claims,
            &EncodingKey::from_secret(self.secret.as_bytes()),
        )?;

        Ok(token)
    }

    /// Signature, expiry and purpose must all match.
    pub fn verify_token(&self, token: &str, purpose: TokenPurpose) -> Option<Claims> {
        let claims = decode::<Claims>(
            token,
            &DecodingKey::from_secret(self.secret.as_bytes()),
            &Validation::default(),
        )
        .ok()?
        .claims;

        (claims.purpose == purpose).then_some(claims)
    }

    /// Resolve a session token into the caller's identity.
    pub fn authenticate(&self, token: &str) -> Result<AuthContext, ApiError> {
        let claims = self
            .verify_token(token, TokenPurpose::Session)
            .ok_or(ApiError::Unauthorized)?;

        Ok(AuthContext {
            is_admin: self.is_admin(&claims.sub),
            identity: claims.sub,
        })
    }

    /// Mint a login token and send the link. Non-admin addresses get nothing.
    pub async fn send_magic_link(&self, email: &str) -> anyhow::Result<bool> {
        if !self.is_admin(email) {
            return Ok(false);
        }
        let token = self.issue_token(email, TokenPurpose::Login, Utc::now())?;
        let link = format!("{}/auth/callback?token={}", self.site_url, token);
        self.mailer.deliver(&self.admin_email, &link).await?;
        Ok(true)
    }

    fn secure_cookies(&self) -> bool {
        self.site_url.starts_with("https://")
    }
}

#[derive(Debug, Deserialize)]
pub struct CallbackQuery {
    pub token: String,
}

/// POST /auth/magic-link: always 202, whether or not the address may sign in.
pub async fn request_magic_link(
    State(state): State<AppState>,
    Json(req): Json<MagicLinkRequest>,
) -> StatusCode {
    dispatch_magic_link(&state, &req.email).await;
    StatusCode::ACCEPTED
}

pub(crate) async fn dispatch_magic_link(state: &AppState, email: &str) {
    match state.identity.send_magic_link(email).await {
        Ok(true) => {}
        Ok(false) => warn!("Sign-in requested for non-admin address"),
        Err(e) => error!("Failed to deliver sign-in link: {:#}", e),
    }
}

/// GET /auth/callback: exchange a login token for a session cookie.
pub async fn callback(
    State(state): State<AppState>,
    Query(query): Query<CallbackQuery>,
    jar: CookieJar,
) -> Result<impl IntoResponse, ApiError> {
    let claims = state
        .identity
        .verify_token(&query.token, TokenPurpose::Login)
        .ok_or(ApiError::Unauthorized)?;

    if !state.identity.is_admin(&claims.sub) {
        return Err(ApiError::Unauthorized);
    }

    let session = state
        .identity
        .issue_token(&claims.sub, TokenPurpose::Session, Utc::now())
        .map_err(|e| {
            error!("Failed to issue session: {:#}", e);
            ApiError::Internal
        })?;

    let cookie = Cookie::build((SESSION_COOKIE, session))
        .path("/")
        .http_only(true)
        .same_site(SameSite::Lax)
        .secure(state.identity.secure_cookies());

    info!("Admin signed in");
    Ok((jar.add(cookie), Redirect::to("/admin")))
}

/// POST /auth/logout
pub async fn logout(jar: CookieJar) -> impl IntoResponse {
    (
        jar.remove(Cookie::build(SESSION_COOKIE).path("/")),
        StatusCode::NO_CONTENT,
    )
}
