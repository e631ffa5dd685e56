use cached::Cached;

use crate::session::SessionHandle;
use crate::spotify::{self, AppCredentials, SpotifyAccess};
use crate::{crypto, utils, Error, Result, CONFIG, LOG, STATE_KEYS};

/// Session key the spotify token cache lives under
pub const TOKEN_KEY: &str = "token_info";

// tokens this close to expiring are refreshed before use
const EXPIRY_MARGIN_SECONDS: i64 = 60;

/// A user's cached spotify tokens
#[derive(serde::Serialize, serde::Deserialize, Debug, Clone, PartialEq)]
pub struct AuthToken {
    pub access_token: String,
    pub refresh_token: Option<String>,
    // epoch seconds
    pub expires_at: i64,
    #[serde(default)]
    pub scope: String,
    #[serde(default)]
    pub token_type: String,
}

impl AuthToken {
    /// Build from a token response. Refresh responses may omit the
    /// refresh token, in which case `previous_refresh` is kept.
    pub fn from_access(access: SpotifyAccess, previous_refresh: Option<String>) -> Result<Self> {
        Ok(Self {
            expires_at: utils::expiry_seconds_to_epoch_expiration(access.expires_in)?,
            refresh_token: access.refresh_token.or(previous_refresh),
            access_token: access.access_token,
            scope: access.scope,
            token_type: access.token_type,
        })
    }

    pub fn is_expired(&self, now: i64) -> bool {
        self.expires_at - now < EXPIRY_MARGIN_SECONDS
    }
}

/// What the sign-in route should do next
#[derive(Debug, PartialEq)]
pub enum AuthStep {
    /// show a link to spotify's authorize page
    SignIn { authorize_url: String },
    /// a valid token is cached in the session
    Home,
}

/// Query parameters spotify redirects back to the sign-in page with
#[derive(serde::Deserialize, Debug, Default)]
pub struct SignInCallback {
    pub code: Option<String>,
    pub state: Option<String>,
    pub error: Option<String>,
}

/// The authorization-code flow against spotify's accounts service
pub struct SpotifyOAuth {
    app: AppCredentials,
    redirect_uri: String,
    scope: String,
    show_dialog: bool,
}

impl SpotifyOAuth {
    pub fn new(app: AppCredentials) -> Self {
        Self {
            app,
            redirect_uri: CONFIG.spotify_redirect_url(),
            scope: CONFIG.spotify_scope.clone(),
            show_dialog: true,
        }
    }

    pub fn authorize_url(&self, state: &str) -> Result<String> {
        let url = surf::Url::parse_with_params(
            &format!("{}/authorize", CONFIG.spotify_accounts_url),
            &[
                ("client_id", self.app.client_id.as_str()),
                ("response_type", "code"),
                ("redirect_uri", self.redirect_uri.as_str()),
                ("scope", self.scope.as_str()),
                ("show_dialog", if self.show_dialog { "true" } else { "false" }),
                ("state", state),
            ],
        )
        .map_err(|e| se!("invalid authorize url {}", e))?;
        Ok(url.to_string())
    }

    pub async fn exchange_code(&self, code: &str) -> Result<AuthToken> {
        let access = spotify::new_spotify_access_token(&self.app, code).await?;
        AuthToken::from_access(access, None)
    }

    pub async fn refresh(&self, token: &AuthToken) -> Result<AuthToken> {
        let refresh_token = token.refresh_token.as_ref().ok_or(Error::Unauthenticated)?;
        let access = spotify::refresh_access_token(&self.app, refresh_token).await?;
        AuthToken::from_access(access, token.refresh_token.clone())
    }

    /// The session's token, refreshed first if it's about to expire.
    /// Tokens that can't be refreshed are dropped from the session.
    pub async fn current_token(&self, session: &SessionHandle) -> Option<AuthToken> {
        let cached: AuthToken = session.get(TOKEN_KEY).await?;
        let now = match utils::now_seconds() {
            Ok(now) => now,
            Err(e) => {
                slog::error!(LOG, "clock error {:?}", e);
                return None;
            }
        };
        if !cached.is_expired(now) {
            return Some(cached);
        }
        match self.refresh(&cached).await {
            Ok(token) => {
                if let Err(e) = session.insert(TOKEN_KEY, &token).await {
                    slog::error!(LOG, "error caching refreshed token {:?}", e);
                }
                Some(token)
            }
            Err(e) => {
                slog::info!(LOG, "cached token could not be refreshed, signing in again"; "error" => %e);
                session.remove(TOKEN_KEY).await;
                None
            }
        }
    }

    /// Drive the three sign-in steps:
    /// 1. no valid token: link to spotify
    /// 2. spotify redirected back with a `code`: exchange and cache it
    /// 3. a valid token is already cached
    pub async fn sign_in(&self, session: &SessionHandle, callback: &SignInCallback) -> Result<AuthStep> {
        if let Some(err) = &callback.error {
            slog::info!(LOG, "spotify sign-in declined"; "error" => err);
        }
        if let Some(code) = &callback.code {
            let state_ok = match &callback.state {
                Some(state) => is_valid_state(state).await,
                None => false,
            };
            if !state_ok {
                slog::warn!(LOG, "invalid sign-in state token {:?}", callback.state);
            } else {
                match self.exchange_code(code).await {
                    Ok(token) => {
                        session.insert(TOKEN_KEY, &token).await?;
                        slog::info!(LOG, "completing user sign-in"; "scope" => &token.scope);
                        return Ok(AuthStep::Home);
                    }
                    Err(e) => slog::warn!(LOG, "spotify code exchange failed"; "error" => %e),
                }
            }
        }

        if self.current_token(session).await.is_some() {
            return Ok(AuthStep::Home);
        }
        let state = new_state_token().await;
        Ok(AuthStep::SignIn {
            authorize_url: self.authorize_url(&state)?,
        })
    }
}

pub async fn sign_out(session: &SessionHandle) {
    session.remove(TOKEN_KEY).await;
}

async fn new_state_token() -> String {
    let s = crypto::new_token();
    let mut lock = STATE_KEYS.lock().await;
    lock.flush();
    lock.cache_set(s.clone(), ());
    s
}

async fn is_valid_state(s: &str) -> bool {
    let mut lock = STATE_KEYS.lock().await;
    lock.cache_remove(&s.to_string()).is_some()
}
