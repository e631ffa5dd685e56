use std::sync::Arc;
use tide::http::Method;

use crate::auth::{self, AuthStep, SignInCallback, SpotifyOAuth};
use crate::pages::{self, ANY_CITY, ANY_YEAR};
use crate::secrets::Credentials;
use crate::session::{self, SessionHandle, SessionMiddleware, SessionStore};
use crate::setlist::{SetlistClient, SetlistFilter, SetlistSource};
use crate::spotify::{AppCredentials, SpotifyClient};
use crate::tour::{self, Fallbacks, TourRequest};
use crate::{utils, Error, CONFIG, LOG};

const SEARCH_LIMIT: u32 = 50;

#[derive(Clone)]
pub struct Context {
    oauth: Arc<SpotifyOAuth>,
    setlists: Arc<dyn SetlistSource>,
    spotify_api_url: Arc<String>,
    maps_key: Arc<String>,
    fallbacks: Arc<Fallbacks>,
}

impl Context {
    pub fn new(credentials: Credentials) -> Self {
        Self::with_base_urls(
            credentials,
            &CONFIG.spotify_api_url,
            &CONFIG.setlistfm_api_url,
        )
    }

    pub fn with_base_urls(
        credentials: Credentials,
        spotify_api_url: &str,
        setlistfm_api_url: &str,
    ) -> Self {
        let app = AppCredentials {
            client_id: credentials.spotify_client_id,
            client_secret: credentials.spotify_client_secret,
        };
        Self {
            oauth: Arc::new(SpotifyOAuth::new(app)),
            setlists: Arc::new(SetlistClient::with_base_url(
                setlistfm_api_url,
                &credentials.setlistfm_api_key,
            )),
            spotify_api_url: Arc::new(spotify_api_url.to_string()),
            maps_key: Arc::new(credentials.google_maps_key),
            fallbacks: Arc::new(Fallbacks::from_config()),
        }
    }

    /// A catalog client acting as the signed-in user
    fn spotify(&self, access_token: &str) -> SpotifyClient {
        SpotifyClient::with_base_url(&self.spotify_api_url, access_token)
    }
}

pub fn build_app(ctx: Context, store: Arc<dyn SessionStore>) -> tide::Server<Context> {
    let mut app = tide::with_state(ctx);
    app.with(crate::logging::LogMiddleware::new());
    app.with(tide::utils::After(|mut res: tide::Response| async move {
        if res.status() == tide::StatusCode::NotFound {
            res.set_body(pages::not_found());
            res.set_content_type(tide::http::mime::HTML);
        }
        Ok(res)
    }));
    app.with(SessionMiddleware::new(store));
    app.at("/").get(sign_in);
    app.at("/home").get(home).post(home);
    app.at("/artist/:id/:year/:city").get(artist).post(artist);
    app.at("/sign_out").get(sign_out);
    if std::path::Path::new(&CONFIG.static_dir).is_dir() {
        if let Err(e) = app.at("/static").serve_dir(&CONFIG.static_dir) {
            slog::error!(LOG, "not serving static files from {}: {:?}", CONFIG.static_dir, e);
        }
    }
    app
}

pub async fn start(ctx: Context, store: Arc<dyn SessionStore>) -> crate::Result<()> {
    let app = build_app(ctx, store);
    slog::info!(LOG, "running at {}", CONFIG.host());
    app.listen(CONFIG.listen_addr())
        .await
        .map_err(|e| se!("server error {:?}", e))?;
    Ok(())
}

/// Sends the request back through sign-in when its session has no usable spotify token
macro_rules! token_or_redirect {
    ($req:expr, $session:expr) => {{
        match $req.state().oauth.current_token(&$session).await {
            Some(token) => token,
            None => {
                slog::info!(LOG, "no valid spotify token, redirecting to sign-in"; "path" => $req.url().path());
                return Ok(resp!(redirect => "/"));
            }
        }
    }};
}

/// Spotify rejected the session's token, forget it and start over
async fn signed_out(session: &SessionHandle) -> tide::Response {
    auth::sign_out(session).await;
    resp!(redirect => "/")
}

async fn sign_in(req: tide::Request<Context>) -> tide::Result {
    let session = session::session(&req)?;
    let callback: SignInCallback = req.query().unwrap_or_default();
    match req.state().oauth.sign_in(&session, &callback).await? {
        AuthStep::Home => Ok(resp!(redirect => "/home")),
        AuthStep::SignIn { authorize_url } => Ok(resp!(html => pages::sign_in(&authorize_url))),
    }
}

#[derive(serde::Deserialize, Default)]
struct SearchForm {
    search: Option<String>,
}

async fn home(mut req: tide::Request<Context>) -> tide::Result {
    let session = session::session(&req)?;
    let token = token_or_redirect!(req, session);
    let search = if req.method() == Method::Post {
        let form: SearchForm = req.body_form().await.unwrap_or_default();
        form.search.filter(|s| !s.trim().is_empty())
    } else {
        None
    };

    let client = req.state().spotify(&token.access_token);
    let artists = match &search {
        Some(q) => client.search_artists(q, SEARCH_LIMIT).await,
        None => client.top_artists().await,
    };
    let artists = match artists {
        Ok(artists) => artists,
        Err(Error::Unauthenticated) => return Ok(signed_out(&session).await),
        Err(e) => {
            slog::error!(LOG, "error fetching artists"; "search" => ?search, "error" => %e);
            vec![]
        }
    };
    Ok(resp!(html => pages::home(&artists)))
}

/// Filters from the artist path, where `0` and `city` mean "any"
pub fn path_filter(year: &str, city: &str) -> SetlistFilter {
    let year = year.trim();
    let city = city.trim();
    SetlistFilter {
        year: Some(year)
            .filter(|y| !y.is_empty() && *y != ANY_YEAR)
            .map(String::from),
        city_name: Some(city)
            .filter(|c| !c.is_empty() && *c != ANY_CITY)
            .map(String::from),
    }
}

/// Filters from the artist page's year form, which searches every city
pub fn form_filter(year: Option<String>) -> SetlistFilter {
    SetlistFilter {
        year: year
            .map(|y| y.trim().to_string())
            .filter(|y| !y.is_empty() && y != ANY_YEAR),
        city_name: None,
    }
}

#[derive(serde::Deserialize, Default)]
struct YearForm {
    year: Option<String>,
}

async fn artist(mut req: tide::Request<Context>) -> tide::Result {
    let session = session::session(&req)?;
    let token = token_or_redirect!(req, session);
    let id = utils::decode_segment(req.param("id")?);
    let filter = if req.method() == Method::Post {
        let form: YearForm = req.body_form().await.unwrap_or_default();
        form_filter(form.year)
    } else {
        path_filter(
            &utils::decode_segment(req.param("year")?),
            &utils::decode_segment(req.param("city")?),
        )
    };
    let ctx = req.state().clone();
    let client = ctx.spotify(&token.access_token);

    let artist = match client.artist(&id).await {
        Ok(artist) => artist,
        Err(Error::Unauthenticated) => return Ok(signed_out(&session).await),
        Err(Error::NotFound(_)) => return Ok(resp!(status => 404, html => pages::not_found())),
        Err(e) => {
            slog::error!(LOG, "error fetching artist"; "id" => &id, "error" => %e);
            return Ok(resp!(status => 502, html => pages::not_found()));
        }
    };
    let related_artists = match client.related_artists(&id).await {
        Ok(related) => related,
        Err(Error::Unauthenticated) => return Ok(signed_out(&session).await),
        Err(e) => {
            slog::warn!(LOG, "error fetching related artists"; "id" => &id, "error" => %e);
            vec![]
        }
    };

    let tour_req = TourRequest {
        artist_id: &artist.id,
        artist_name: &artist.name,
        filter,
    };
    let tour = match tour::build_tour(ctx.setlists.as_ref(), &client, &tour_req, &ctx.fallbacks).await {
        Ok(tour) => tour,
        Err(Error::Unauthenticated) => return Ok(signed_out(&session).await),
        Err(e) => return Err(e.into()),
    };

    let image_url = artist
        .image_url()
        .unwrap_or(&CONFIG.fallback_image_url)
        .to_string();
    let html = pages::artist(&pages::ArtistPage {
        artist: &artist,
        related_artists: &related_artists,
        image_url: &image_url,
        tour: &tour,
        maps_key: &ctx.maps_key,
    })?;
    Ok(resp!(html => html))
}

async fn sign_out(req: tide::Request<Context>) -> tide::Result {
    let session = session::session(&req)?;
    auth::sign_out(&session).await;
    slog::info!(LOG, "signed out");
    Ok(resp!(redirect => "/"))
}
