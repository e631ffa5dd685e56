use crate::error::{self, Error};
use crate::models::{Artist, TrackPreview};
use crate::{Result, CONFIG, LOG};

#[derive(serde::Deserialize, Debug)]
pub struct SpotifyAccess {
    pub access_token: String,
    pub token_type: String,
    #[serde(default)]
    pub scope: String,
    pub expires_in: u64,
    pub refresh_token: Option<String>,
}

#[derive(serde::Serialize)]
struct SpotifyAccessParams {
    grant_type: String,
    code: String,
    redirect_uri: String,
}

impl SpotifyAccessParams {
    fn from_code(code: &str) -> Self {
        SpotifyAccessParams {
            grant_type: "authorization_code".to_string(),
            code: code.to_string(),
            redirect_uri: CONFIG.spotify_redirect_url(),
        }
    }
}

#[derive(serde::Serialize)]
struct RefreshParams {
    grant_type: String,
    refresh_token: String,
}

impl RefreshParams {
    fn from_token(token: &str) -> Self {
        RefreshParams {
            grant_type: "refresh_token".to_string(),
            refresh_token: token.to_string(),
        }
    }
}

/// Application credentials used to talk to the spotify accounts service
#[derive(Clone)]
pub struct AppCredentials {
    pub client_id: String,
    pub client_secret: String,
}

impl AppCredentials {
    fn basic_auth(&self) -> String {
        let auth = base64::encode(format!("{}:{}", self.client_id, self.client_secret).as_bytes());
        format!("Basic {}", auth)
    }
}

async fn token_request<T: serde::Serialize>(app: &AppCredentials, params: &T) -> Result<SpotifyAccess> {
    let body = surf::Body::from_form(params).map_err(|e| se!("form error {}", e))?;
    let mut resp = surf::post(format!("{}/api/token", CONFIG.spotify_accounts_url))
        .body(body)
        .header("authorization", app.basic_auth())
        .send()
        .await
        .map_err(|e| Error::Unavailable(format!("account request error {:?}", e)))?;
    if !resp.status().is_success() {
        let status = resp.status();
        let text = resp.body_string().await.unwrap_or_default();
        slog::warn!(LOG, "spotify token request rejected"; "status" => status as u16, "body" => text);
        // a rejected code or refresh token means the user has to sign in again
        return Err(match status {
            surf::StatusCode::BadRequest | surf::StatusCode::Unauthorized => Error::Unauthenticated,
            s => error::from_status(s, "spotify token"),
        });
    }
    let access: SpotifyAccess = resp
        .body_json()
        .await
        .map_err(|e| Error::Unavailable(format!("account json parse error {}", e)))?;
    Ok(access)
}

pub async fn new_spotify_access_token(app: &AppCredentials, code: &str) -> Result<SpotifyAccess> {
    token_request(app, &SpotifyAccessParams::from_code(code)).await
}

pub async fn refresh_access_token(app: &AppCredentials, refresh_token: &str) -> Result<SpotifyAccess> {
    slog::info!(LOG, "refreshing spotify access token");
    token_request(app, &RefreshParams::from_token(refresh_token)).await
}

/// Catalog lookup the tour aggregator needs to resolve performed songs
#[async_trait::async_trait]
pub trait TrackSearch: Send + Sync {
    async fn search_track(
        &self,
        song_name: &str,
        artist_name: &str,
        limit: u32,
    ) -> Result<Vec<TrackPreview>>;
}

#[derive(serde::Deserialize)]
struct Paging<T> {
    items: Vec<T>,
}

#[derive(serde::Deserialize)]
struct ArtistSearch {
    artists: Paging<Artist>,
}

#[derive(serde::Deserialize)]
struct TrackSearchResults {
    tracks: Paging<TrackPreview>,
}

#[derive(serde::Deserialize)]
struct RelatedArtists {
    artists: Vec<Artist>,
}

#[derive(serde::Serialize)]
struct SearchParams<'a> {
    q: &'a str,
    #[serde(rename = "type")]
    kind: &'a str,
    limit: u32,
}

/// A spotify web api client bound to a single user's access token.
///
/// Built fresh for each request from the token cached in that
/// request's session.
pub struct SpotifyClient {
    base_url: String,
    access_token: String,
}

impl SpotifyClient {
    pub fn with_base_url(base_url: &str, access_token: &str) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            access_token: access_token.to_string(),
        }
    }

    async fn get<T, Q>(&self, path: &str, query: Option<&Q>) -> Result<T>
    where
        T: serde::de::DeserializeOwned,
        Q: serde::Serialize,
    {
        let mut req = surf::get(format!("{}{}", self.base_url, path))
            .header("authorization", format!("Bearer {}", self.access_token));
        if let Some(query) = query {
            req = req
                .query(query)
                .map_err(|e| se!("query encode error {} {}", path, e))?;
        }
        let mut resp = req
            .send()
            .await
            .map_err(|e| Error::Unavailable(format!("spotify {} error {:?}", path, e)))?;
        if !resp.status().is_success() {
            return Err(error::from_status(resp.status(), path));
        }
        resp.body_json()
            .await
            .map_err(|e| Error::Unavailable(format!("spotify {} json error {}", path, e)))
    }

    pub async fn top_artists(&self) -> Result<Vec<Artist>> {
        let page: Paging<Artist> = self.get::<_, ()>("/me/top/artists", None).await?;
        Ok(page.items)
    }

    pub async fn search_artists(&self, query: &str, limit: u32) -> Result<Vec<Artist>> {
        let params = SearchParams {
            q: query,
            kind: "artist",
            limit,
        };
        let found: ArtistSearch = self.get("/search", Some(&params)).await?;
        Ok(found.artists.items)
    }

    pub async fn artist(&self, id: &str) -> Result<Artist> {
        self.get::<_, ()>(&format!("/artists/{}", urlencoding::encode(id)), None)
            .await
    }

    pub async fn related_artists(&self, id: &str) -> Result<Vec<Artist>> {
        let related: RelatedArtists = self
            .get::<_, ()>(
                &format!("/artists/{}/related-artists", urlencoding::encode(id)),
                None,
            )
            .await?;
        Ok(related.artists)
    }
}

/// Query text for a song by a specific artist
pub fn track_query(song_name: &str, artist_name: &str) -> String {
    format!("{} artist:{}", song_name, artist_name)
}

#[async_trait::async_trait]
impl TrackSearch for SpotifyClient {
    async fn search_track(
        &self,
        song_name: &str,
        artist_name: &str,
        limit: u32,
    ) -> Result<Vec<TrackPreview>> {
        let q = track_query(song_name, artist_name);
        let params = SearchParams {
            q: &q,
            kind: "track",
            limit,
        };
        let found: TrackSearchResults = self.get("/search", Some(&params)).await?;
        Ok(found.tracks.items)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn track_query_scopes_to_artist() {
        assert_eq!(track_query("Tweezer", "Phish"), "Tweezer artist:Phish");
    }

    #[test]
    fn search_results_parse() {
        let raw = serde_json::json!({
            "tracks": {"items": [{
                "id": "5sluzb7VfBh5sBM8C8Nofa",
                "name": "Tweezer",
                "preview_url": null,
                "external_urls": {"spotify": "https://open.spotify.com/track/5sluzb7VfBh5sBM8C8Nofa"},
                "artists": [{"id": "5wbIWUzTPuTxTyG6ouQKqz", "name": "Phish"}]
            }]}
        });
        let found: TrackSearchResults = serde_json::from_value(raw).unwrap();
        assert_eq!(found.tracks.items.len(), 1);
        assert!(found.tracks.items[0].preview_url.is_none());
        assert_eq!(found.tracks.items[0].artists[0].name, "Phish");
    }

    #[test]
    fn artist_search_parse() {
        let raw = serde_json::json!({
            "artists": {"items": [
                {"id": "a", "name": "Phish", "images": [{"url": "https://i.scdn.co/image/x", "width": 640, "height": 640}]},
                {"id": "b", "name": "Phish Tribute"}
            ]}
        });
        let found: ArtistSearch = serde_json::from_value(raw).unwrap();
        assert_eq!(found.artists.items[0].image_url(), Some("https://i.scdn.co/image/x"));
        assert_eq!(found.artists.items[1].image_url(), None);
    }

    #[test]
    fn client_trims_base_url() {
        let c = SpotifyClient::with_base_url("http://localhost:9/v1/", "tok");
        assert_eq!(c.base_url, "http://localhost:9/v1");
    }
}
