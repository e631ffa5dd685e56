use crate::error::{self, Error};
use crate::models::Setlist;
use crate::{Result, LOG};

/// Filters for a setlist search. `None` means "don't filter on this".
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SetlistFilter {
    pub year: Option<String>,
    pub city_name: Option<String>,
}

/// Source of setlists for an artist, most recent first
#[async_trait::async_trait]
pub trait SetlistSource: Send + Sync {
    async fn find_setlists(&self, artist_name: &str, filter: &SetlistFilter) -> Result<Vec<Setlist>>;
}

#[derive(serde::Serialize)]
#[serde(rename_all = "camelCase")]
struct SearchParams<'a> {
    artist_name: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    year: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    city_name: Option<&'a str>,
    p: u32,
}

#[derive(serde::Deserialize)]
struct SearchResults {
    // entries are converted one at a time so a malformed one can't sink the rest
    setlist: Option<Vec<serde_json::Value>>,
}

/// setlist.fm rest client
pub struct SetlistClient {
    base_url: String,
    api_key: String,
}

impl SetlistClient {
    pub fn with_base_url(base_url: &str, api_key: &str) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
        }
    }
}

#[async_trait::async_trait]
impl SetlistSource for SetlistClient {
    async fn find_setlists(&self, artist_name: &str, filter: &SetlistFilter) -> Result<Vec<Setlist>> {
        let params = SearchParams {
            artist_name,
            year: filter.year.as_deref(),
            city_name: filter.city_name.as_deref(),
            p: 1,
        };
        slog::debug!(
            LOG, "searching setlists";
            "artist" => artist_name,
            "year" => ?filter.year,
            "city" => ?filter.city_name,
        );
        let mut resp = surf::get(format!("{}/search/setlists", self.base_url))
            .query(&params)
            .map_err(|e| se!("setlist query encode error {}", e))?
            .header("x-api-key", self.api_key.as_str())
            .header("accept", "application/json")
            .send()
            .await
            .map_err(|e| Error::Unavailable(format!("setlist search error {:?}", e)))?;
        if !resp.status().is_success() {
            return Err(error::from_status(
                resp.status(),
                &format!("setlists for {}", artist_name),
            ));
        }
        let found: SearchResults = resp
            .body_json()
            .await
            .map_err(|e| Error::Unavailable(format!("setlist search json error {}", e)))?;
        parse_results(found, artist_name)
    }
}

fn parse_results(found: SearchResults, artist_name: &str) -> Result<Vec<Setlist>> {
    let setlists: Vec<Setlist> = found
        .setlist
        .unwrap_or_default()
        .into_iter()
        .filter_map(|raw| match serde_json::from_value::<Setlist>(raw) {
            Ok(setlist) => Some(setlist),
            Err(e) => {
                slog::warn!(LOG, "skipping unreadable setlist"; "artist" => artist_name, "error" => %e);
                None
            }
        })
        .collect();
    if setlists.is_empty() {
        return Err(Error::NotFound(format!("setlists for {}", artist_name)));
    }
    Ok(setlists)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_setlist_member_is_not_found() {
        let found: SearchResults =
            serde_json::from_value(serde_json::json!({"type": "setlists", "total": 0})).unwrap();
        assert!(matches!(
            parse_results(found, "Phish"),
            Err(Error::NotFound(_))
        ));
    }

    #[test]
    fn results_keep_upstream_order() {
        let found: SearchResults = serde_json::from_value(serde_json::json!({
            "setlist": [
                {"eventDate": "31-12-2019", "venue": {"name": "MSG", "city": {"name": "New York"}}},
                {"eventDate": "30-12-2019", "venue": {"name": "MSG", "city": {"name": "New York"}}}
            ]
        }))
        .unwrap();
        let setlists = parse_results(found, "Phish").unwrap();
        assert_eq!(setlists[0].event_date, "31-12-2019");
        assert_eq!(setlists[1].event_date, "30-12-2019");
    }

    #[test]
    fn unreadable_entries_are_skipped() {
        let found: SearchResults = serde_json::from_value(serde_json::json!({
            "setlist": [
                {"eventDate": "31-12-2019", "venue": {"name": "MSG", "city": {"name": "New York", "coords": {"lat": 40.7, "long": -74.0}}}},
                {"eventDate": "30-12-2019", "venue": {"name": "MSG", "city": {"name": "New York", "coords": {}}}},
                {"venue": {"name": "no date"}},
                "garbage"
            ]
        }))
        .unwrap();
        let setlists = parse_results(found, "Phish").unwrap();
        assert_eq!(setlists.len(), 2);
        assert_eq!(setlists[0].coords(), Some((40.7, -74.0)));
        assert!(setlists[1].coords().is_none());
    }

    #[test]
    fn only_unreadable_entries_is_not_found() {
        let found: SearchResults = serde_json::from_value(serde_json::json!({
            "setlist": [{"venue": {"name": "no date"}}]
        }))
        .unwrap();
        assert!(matches!(
            parse_results(found, "Phish"),
            Err(Error::NotFound(_))
        ));
    }

    #[test]
    fn query_params_skip_missing_filters() {
        let params = SearchParams {
            artist_name: "Phish",
            year: Some("2022"),
            city_name: None,
            p: 1,
        };
        let v = serde_json::to_value(&params).unwrap();
        assert_eq!(
            v,
            serde_json::json!({"artistName": "Phish", "year": "2022", "p": 1})
        );
    }
}
