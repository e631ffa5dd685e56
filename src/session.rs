/*!
Server side sessions

Browsers carry an opaque session id cookie. The store only ever sees the
hmac of that id, and the values it holds (the spotify token cache) are
kept either in-process or in postgres, encrypted.
*/
use async_mutex::Mutex;
use cached::stores::TimedCache;
use cached::Cached;
use chrono::{DateTime, Duration, Utc};
use sqlx::PgPool;
use std::collections::HashMap;
use std::sync::Arc;

use crate::{crypto, Result, CONFIG, LOG};

pub const COOKIE_NAME: &str = "tourbus_session";

/// A browser session's key/value data
#[derive(serde::Serialize, serde::Deserialize, Debug, Clone, Default, PartialEq)]
pub struct Session {
    values: HashMap<String, serde_json::Value>,
}

impl Session {
    pub fn get<T: serde::de::DeserializeOwned>(&self, key: &str) -> Option<T> {
        let v = self.values.get(key)?;
        match serde_json::from_value(v.clone()) {
            Ok(t) => Some(t),
            Err(e) => {
                slog::warn!(LOG, "dropping unreadable session value"; "key" => key, "error" => %e);
                None
            }
        }
    }

    pub fn insert<T: serde::Serialize>(&mut self, key: &str, value: &T) -> Result<()> {
        let v = serde_json::to_value(value).map_err(|e| se!("session value error {}", e))?;
        self.values.insert(key.to_string(), v);
        Ok(())
    }

    pub fn remove(&mut self, key: &str) -> bool {
        self.values.remove(key).is_some()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

#[async_trait::async_trait]
pub trait SessionStore: Send + Sync {
    async fn load(&self, key: &str) -> Result<Option<Session>>;
    async fn save(&self, key: &str, session: &Session) -> Result<()>;
    async fn destroy(&self, key: &str) -> Result<()>;
}

/// Sessions kept in process memory, each living `ttl_seconds` since its last save
pub struct MemorySessionStore {
    inner: Mutex<TimedCache<String, Session>>,
}

impl MemorySessionStore {
    pub fn new(ttl_seconds: u64) -> Self {
        Self {
            inner: Mutex::new(TimedCache::with_lifespan(ttl_seconds)),
        }
    }

    #[cfg(test)]
    pub async fn size(&self) -> usize {
        self.inner.lock().await.cache_size()
    }
}

#[async_trait::async_trait]
impl SessionStore for MemorySessionStore {
    async fn load(&self, key: &str) -> Result<Option<Session>> {
        let mut lock = self.inner.lock().await;
        Ok(lock.cache_get(&key.to_string()).cloned())
    }

    async fn save(&self, key: &str, session: &Session) -> Result<()> {
        let mut lock = self.inner.lock().await;
        lock.flush();
        lock.cache_set(key.to_string(), session.clone());
        Ok(())
    }

    async fn destroy(&self, key: &str) -> Result<()> {
        let mut lock = self.inner.lock().await;
        lock.cache_remove(&key.to_string());
        Ok(())
    }
}

#[derive(sqlx::FromRow, Debug)]
struct SessionRow {
    // AES_256_GCM encrypted json of the session values, sealed
    // with the application key and `nonce`
    data: String,
    nonce: String,
    expires: DateTime<Utc>,
}

/// Sessions persisted to postgres so they survive restarts and are shared between instances
pub struct PgSessionStore {
    pool: PgPool,
    ttl_seconds: i64,
}

impl PgSessionStore {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool,
            ttl_seconds: CONFIG.session_ttl_seconds as i64,
        }
    }
}

fn seal(session: &Session) -> Result<crypto::Enc> {
    let json = serde_json::to_string(session).map_err(|e| se!("session json error {}", e))?;
    crypto::encrypt(&json)
}

fn open(value: String, nonce: String) -> Result<Session> {
    let json = crypto::decrypt(&crypto::Enc { value, nonce })?;
    serde_json::from_str(&json).map_err(|e| se!("session json parse error {}", e))
}

#[async_trait::async_trait]
impl SessionStore for PgSessionStore {
    async fn load(&self, key: &str) -> Result<Option<Session>> {
        let row = sqlx::query_as::<_, SessionRow>(
            "select data, nonce, expires from tourbus_sessions where id = $1",
        )
        .bind(key)
        .fetch_optional(&self.pool)
        .await?;
        match row {
            Some(row) if row.expires > Utc::now() => Ok(Some(open(row.data, row.nonce)?)),
            Some(_) => {
                sqlx::query("delete from tourbus_sessions where expires <= now()")
                    .execute(&self.pool)
                    .await
                    .map_err(|e| slog::error!(LOG, "error deleting expired sessions, continuing: {:?}", e))
                    .ok();
                Ok(None)
            }
            None => Ok(None),
        }
    }

    async fn save(&self, key: &str, session: &Session) -> Result<()> {
        let enc = seal(session)?;
        let expires = Utc::now()
            .checked_add_signed(Duration::seconds(self.ttl_seconds))
            .ok_or("error creating session expiration timestamp")?;
        sqlx::query("delete from tourbus_sessions where expires <= now()")
            .execute(&self.pool)
            .await
            .map_err(|e| slog::error!(LOG, "error deleting expired sessions, continuing: {:?}", e))
            .ok();
        sqlx::query(
            "
            insert into tourbus_sessions (id, data, nonce, expires)
            values ($1, $2, $3, $4)
            on conflict (id) do update set
            data = excluded.data, nonce = excluded.nonce,
            expires = excluded.expires, modified = now()
            ",
        )
        .bind(key)
        .bind(&enc.value)
        .bind(&enc.nonce)
        .bind(expires)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn destroy(&self, key: &str) -> Result<()> {
        sqlx::query("delete from tourbus_sessions where id = $1")
            .bind(key)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

struct SessionState {
    session: Session,
    dirty: bool,
}

/// The current request's session, shared between the middleware and the handler
#[derive(Clone)]
pub struct SessionHandle {
    inner: Arc<Mutex<SessionState>>,
}

impl SessionHandle {
    fn new(session: Session) -> Self {
        Self {
            inner: Arc::new(Mutex::new(SessionState {
                session,
                dirty: false,
            })),
        }
    }

    #[cfg(test)]
    pub fn for_tests(session: Session) -> Self {
        Self::new(session)
    }

    pub async fn get<T: serde::de::DeserializeOwned>(&self, key: &str) -> Option<T> {
        self.inner.lock().await.session.get(key)
    }

    pub async fn insert<T: serde::Serialize>(&self, key: &str, value: &T) -> Result<()> {
        let mut state = self.inner.lock().await;
        state.session.insert(key, value)?;
        state.dirty = true;
        Ok(())
    }

    pub async fn remove(&self, key: &str) {
        let mut state = self.inner.lock().await;
        if state.session.remove(key) {
            state.dirty = true;
        }
    }

    async fn take_if_dirty(&self) -> Option<Session> {
        let mut state = self.inner.lock().await;
        if state.dirty {
            state.dirty = false;
            Some(state.session.clone())
        } else {
            None
        }
    }
}

/// Pull the session handle the middleware attached to `req`
pub fn session<State>(req: &tide::Request<State>) -> Result<SessionHandle> {
    req.ext::<SessionHandle>()
        .cloned()
        .ok_or_else(|| se!("session middleware not installed"))
}

/// Loads the session named by the request's cookie (or starts a new one)
/// before the handler runs, and persists it afterwards if it changed.
/// New sessions are only stored, and their cookie only set, once a
/// handler writes to them. Sessions emptied by a handler are destroyed.
pub struct SessionMiddleware {
    store: Arc<dyn SessionStore>,
}

impl SessionMiddleware {
    pub fn new(store: Arc<dyn SessionStore>) -> Self {
        Self { store }
    }
}

fn session_cookie(id: &str) -> String {
    format!(
        "{name}={id}; Path=/; HttpOnly; SameSite=Lax{secure}",
        name = COOKIE_NAME,
        id = id,
        secure = if CONFIG.ssl { "; Secure" } else { "" },
    )
}

#[async_trait::async_trait]
impl<State: Clone + Send + Sync + 'static> tide::Middleware<State> for SessionMiddleware {
    async fn handle(&self, mut req: tide::Request<State>, next: tide::Next<'_, State>) -> tide::Result {
        let existing = req.cookie(COOKIE_NAME).map(|c| c.value().to_string());
        let (id, is_new) = match existing {
            Some(id) if !id.is_empty() => (id, false),
            _ => (crypto::new_token(), true),
        };
        let key = crypto::hmac_sign(&id);

        let session = if is_new {
            Session::default()
        } else {
            match self.store.load(&key).await {
                Ok(s) => s.unwrap_or_default(),
                Err(e) => {
                    slog::error!(LOG, "error loading session, starting fresh {:?}", e);
                    Session::default()
                }
            }
        };
        let handle = SessionHandle::new(session);
        req.set_ext(handle.clone());

        let mut res = next.run(req).await;

        match handle.take_if_dirty().await {
            Some(session) if session.is_empty() => {
                if !is_new {
                    if let Err(e) = self.store.destroy(&key).await {
                        slog::error!(LOG, "error destroying session {:?}", e);
                    }
                }
            }
            Some(session) => {
                if let Err(e) = self.store.save(&key, &session).await {
                    slog::error!(LOG, "error saving session {:?}", e);
                } else if is_new {
                    res.append_header("set-cookie", session_cookie(&id));
                }
            }
            None => (),
        }
        Ok(res)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(serde::Serialize, serde::Deserialize, Debug, PartialEq)]
    struct Token {
        access_token: String,
    }

    #[test]
    fn session_values_round_trip_through_json() {
        let mut s = Session::default();
        s.insert(
            "token_info",
            &Token {
                access_token: "abc".into(),
            },
        )
        .unwrap();
        let t: Token = s.get("token_info").unwrap();
        assert_eq!(t.access_token, "abc");
        assert!(s.get::<Token>("missing").is_none());
        assert!(s.remove("token_info"));
        assert!(!s.remove("token_info"));
        assert!(s.is_empty());
    }

    #[test]
    fn wrong_shape_reads_as_missing() {
        let mut s = Session::default();
        s.insert("token_info", &"just a string").unwrap();
        assert!(s.get::<Token>("token_info").is_none());
    }

    #[test]
    fn sealed_sessions_reopen() {
        let mut s = Session::default();
        s.insert("token_info", &serde_json::json!({"access_token": "abc"}))
            .unwrap();
        let enc = seal(&s).unwrap();
        assert!(!enc.value.contains("abc"));
        assert_eq!(open(enc.value, enc.nonce).unwrap(), s);
    }

    #[async_std::test]
    async fn memory_store_save_load_destroy() {
        let store = MemorySessionStore::new(60);
        let mut s = Session::default();
        s.insert("k", &1).unwrap();
        store.save("key", &s).await.unwrap();
        assert_eq!(store.load("key").await.unwrap(), Some(s));
        store.destroy("key").await.unwrap();
        assert_eq!(store.load("key").await.unwrap(), None);
    }

    #[async_std::test]
    async fn handle_tracks_changes() {
        let handle = SessionHandle::new(Session::default());
        assert!(handle.take_if_dirty().await.is_none());
        handle.remove("absent").await;
        assert!(handle.take_if_dirty().await.is_none());
        handle.insert("k", &"v").await.unwrap();
        let saved = handle.take_if_dirty().await.unwrap();
        assert_eq!(saved.get::<String>("k").as_deref(), Some("v"));
        assert!(handle.take_if_dirty().await.is_none());
    }

    #[async_std::test]
    async fn memory_store_drops_expired_sessions_on_save() {
        let store = MemorySessionStore::new(1);
        for i in 0..50 {
            store.save(&format!("key-{}", i), &Session::default()).await.unwrap();
        }
        assert_eq!(store.size().await, 50);
        async_std::task::sleep(std::time::Duration::from_millis(2100)).await;
        store.save("fresh", &Session::default()).await.unwrap();
        assert_eq!(store.size().await, 1);
    }

    #[test]
    fn cookie_is_http_only() {
        let c = session_cookie("abc");
        assert!(c.starts_with("tourbus_session=abc; Path=/"));
        assert!(c.contains("HttpOnly"));
    }
}
