use async_mutex::Mutex;
use cached::stores::TimedCache;
use slog::o;
use slog::Drain;
use std::io::Read;
use std::sync::Arc;
use std::{env, fs};

#[macro_use]
mod macros;

mod auth;
mod crypto;
mod error;
mod logging;
mod models;
mod pages;
mod secrets;
mod service;
mod session;
mod setlist;
mod spotify;
mod tour;
mod utils;

pub use error::{Error, Result};

fn env_or(k: &str, default: &str) -> String {
    env::var(k).unwrap_or_else(|_| default.to_string())
}

lazy_static::lazy_static! {
    pub static ref CONFIG: Config = Config::load();

    // The "base" logger that all crates should branch off of
    pub static ref BASE_LOG: slog::Logger = {
        let level: slog::Level = CONFIG.log_level
                .parse()
                .unwrap_or(slog::Level::Info);
        if CONFIG.log_format == "pretty" {
            let decorator = slog_term::TermDecorator::new().build();
            let drain = slog_term::CompactFormat::new(decorator).build().fuse();
            let drain = slog_async::Async::new(drain).build().fuse();
            let drain = slog::LevelFilter::new(drain, level).fuse();
            slog::Logger::root(drain, o!())
        } else {
            let drain = slog_json::Json::default(std::io::stderr()).fuse();
            let drain = slog_async::Async::new(drain).build().fuse();
            let drain = slog::LevelFilter::new(drain, level).fuse();
            slog::Logger::root(drain, o!())
        }
    };

    // Base logger
    pub static ref LOG: slog::Logger = BASE_LOG.new(slog::o!("app" => "tourbus"));

    // one-time oauth `state` tokens handed to spotify during sign-in
    pub static ref STATE_KEYS: Arc<Mutex<TimedCache<String, ()>>> = Arc::new(Mutex::new(TimedCache::with_lifespan(30)));
}

#[derive(Debug)]
pub struct Config {
    pub version: String,
    pub ssl: bool,
    pub host: String,
    pub real_hostname: Option<String>,
    pub port: u16,
    pub log_format: String,
    pub log_level: String,
    pub enc_key: String,
    pub secrets_backend: String,
    pub gcp_project: String,
    pub session_backend: String,
    pub db_url: String,
    pub session_ttl_seconds: u64,
    pub spotify_accounts_url: String,
    pub spotify_api_url: String,
    pub spotify_scope: String,
    pub setlistfm_api_url: String,
    pub static_dir: String,
    // values rendered when upstream services have nothing for a request
    pub fallback_track_url: String,
    pub fallback_preview_url: String,
    pub fallback_image_url: String,
    pub no_tour_message: String,
    pub no_venue_placeholder: String,
}
impl Config {
    pub fn load() -> Self {
        let version = fs::File::open("commit_hash.txt")
            .ok()
            .and_then(|mut f| {
                let mut s = String::new();
                f.read_to_string(&mut s).ok().map(|_| s.trim().to_string())
            })
            .unwrap_or_else(|| "unknown".to_string());
        Self {
            version,
            ssl: env_or("SSL", "false") == "true",
            host: env_or("HOST", "localhost"),
            real_hostname: env::var("REAL_HOSTNAME").ok(),
            port: env_or("PORT", "8080").parse().unwrap_or(8080),
            log_format: env_or("LOG_FORMAT", "json")
                .to_lowercase()
                .trim()
                .to_string(),
            log_level: env_or("LOG_LEVEL", "INFO"),
            enc_key: env_or("ENC_KEY", "01234567890123456789012345678901"),
            secrets_backend: env_or("SECRETS_BACKEND", "env").to_lowercase(),
            gcp_project: env_or("GCP_PROJECT", "tourbus-407014"),
            session_backend: env_or("SESSION_BACKEND", "memory").to_lowercase(),
            db_url: env_or("DATABASE_URL", "error"),
            session_ttl_seconds: env_or("SESSION_TTL_SECONDS", "2592000")
                .parse()
                .unwrap_or(60 * 60 * 24 * 30),
            spotify_accounts_url: env_or("SPOTIFY_ACCOUNTS_URL", "https://accounts.spotify.com"),
            spotify_api_url: env_or("SPOTIFY_API_URL", "https://api.spotify.com/v1"),
            spotify_scope: env_or("SPOTIFY_SCOPE", "user-top-read"),
            setlistfm_api_url: env_or("SETLISTFM_API_URL", "https://api.setlist.fm/rest/1.0"),
            static_dir: env_or("STATIC_DIR", "static"),
            fallback_track_url: env_or(
                "FALLBACK_TRACK_URL",
                "https://open.spotify.com/track/5sluzb7VfBh5sBM8C8Nofa",
            ),
            fallback_preview_url: env_or("FALLBACK_PREVIEW_URL", ""),
            fallback_image_url: env_or("FALLBACK_IMAGE_URL", "http://placecage.com/600/400"),
            no_tour_message: env_or("NO_TOUR_MESSAGE", "Sorry, no tour for the selected year"),
            no_venue_placeholder: env_or("NO_VENUE_PLACEHOLDER", "any venues"),
        }
    }
    pub fn initialize(&self) -> anyhow::Result<()> {
        if self.enc_key.len() != 32 {
            anyhow::bail!("ENC_KEY must be 32 bytes, got {}", self.enc_key.len());
        }
        slog::info!(
            LOG, "initialized config";
            "version" => &CONFIG.version,
            "ssl" => &CONFIG.ssl,
            "host" => &CONFIG.host,
            "port" => &CONFIG.port,
            "log_format" => &CONFIG.log_format,
            "log_level" => &CONFIG.log_level,
            "secrets_backend" => &CONFIG.secrets_backend,
            "session_backend" => &CONFIG.session_backend,
        );
        Ok(())
    }
    pub fn host(&self) -> String {
        let p = if self.ssl { "https" } else { "http" };
        format!("{}://{}:{}", p, self.host, self.port)
    }
    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
    /// Spotify sends users back to the sign-in page, `/`, with a `code`
    pub fn spotify_redirect_url(&self) -> String {
        let host = self.real_hostname.clone().unwrap_or_else(|| self.host());
        format!("{}/", host.trim_end_matches('/'))
    }
}

async fn session_store() -> anyhow::Result<Arc<dyn session::SessionStore>> {
    match CONFIG.session_backend.as_str() {
        "postgres" => {
            let pool = sqlx::postgres::PgPoolOptions::new()
                .max_connections(5)
                .connect(&CONFIG.db_url)
                .await?;
            sqlx::migrate!("./migrations").run(&pool).await?;
            Ok(Arc::new(session::PgSessionStore::new(pool)))
        }
        "memory" => Ok(Arc::new(session::MemorySessionStore::new(
            CONFIG.session_ttl_seconds,
        ))),
        other => anyhow::bail!("unknown SESSION_BACKEND {:?}", other),
    }
}

#[async_std::main]
async fn main() -> anyhow::Result<()> {
    // try sourcing a .env if one exists
    dotenv::dotenv().ok();
    CONFIG.initialize()?;

    let accessor = secrets::from_config()?;
    let credentials = secrets::Credentials::load(accessor.as_ref()).await?;
    let store = session_store().await?;

    let ctx = service::Context::new(credentials);
    service::start(ctx, store).await?;
    Ok(())
}
