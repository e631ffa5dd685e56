//! Shapes of the upstream json we care about and the values derived from them.
use serde::{Deserialize, Serialize};

#[derive(Deserialize, Serialize, Debug, Clone, PartialEq)]
pub struct Image {
    pub url: String,
    pub width: Option<u32>,
    pub height: Option<u32>,
}

#[derive(Deserialize, Serialize, Debug, Clone, PartialEq)]
pub struct Artist {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub images: Vec<Image>,
    #[serde(default)]
    pub genres: Vec<String>,
    #[serde(default)]
    pub popularity: Option<u32>,
}

impl Artist {
    /// The first image spotify lists, which is the largest
    pub fn image_url(&self) -> Option<&str> {
        self.images.first().map(|i| i.url.as_str())
    }
}

#[derive(Deserialize, Serialize, Debug, Clone, PartialEq, Default)]
pub struct ExternalUrls {
    #[serde(default)]
    pub spotify: String,
}

#[derive(Deserialize, Serialize, Debug, Clone, PartialEq)]
pub struct TrackArtist {
    pub id: Option<String>,
    pub name: String,
}

/// A playable catalog match for a song performed at a show
#[derive(Deserialize, Serialize, Debug, Clone, PartialEq)]
pub struct TrackPreview {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub name: String,
    // spotify doesn't provide previews for every track
    pub preview_url: Option<String>,
    #[serde(default)]
    pub external_urls: ExternalUrls,
    #[serde(default)]
    pub artists: Vec<TrackArtist>,
}

impl TrackPreview {
    /// Stand-in track rendered when nothing could be resolved
    pub fn fallback(preview_url: &str, external_url: &str) -> Self {
        Self {
            id: None,
            name: String::new(),
            preview_url: Some(preview_url.to_string()).filter(|s| !s.is_empty()),
            external_urls: ExternalUrls {
                spotify: external_url.to_string(),
            },
            artists: vec![],
        }
    }
}

// setlist.fm sometimes sends partial or empty coordinate objects
#[derive(Deserialize, Serialize, Debug, Clone, PartialEq, Default)]
pub struct Coords {
    #[serde(default)]
    pub lat: Option<f64>,
    #[serde(default)]
    pub long: Option<f64>,
}

#[derive(Deserialize, Serialize, Debug, Clone, PartialEq, Default)]
pub struct Country {
    #[serde(default)]
    pub code: String,
    #[serde(default)]
    pub name: String,
}

#[derive(Deserialize, Serialize, Debug, Clone, PartialEq, Default)]
pub struct City {
    #[serde(default)]
    pub name: String,
    pub coords: Option<Coords>,
    #[serde(default)]
    pub country: Country,
}

#[derive(Deserialize, Serialize, Debug, Clone, PartialEq, Default)]
pub struct Venue {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub city: City,
}

#[derive(Deserialize, Serialize, Debug, Clone, PartialEq)]
pub struct Tour {
    #[serde(default)]
    pub name: String,
}

#[derive(Deserialize, Serialize, Debug, Clone, PartialEq)]
pub struct Song {
    #[serde(default)]
    pub name: String,
}

#[derive(Deserialize, Serialize, Debug, Clone, PartialEq, Default)]
pub struct Set {
    pub name: Option<String>,
    pub encore: Option<u32>,
    #[serde(default)]
    pub song: Vec<Song>,
}

#[derive(Deserialize, Serialize, Debug, Clone, PartialEq, Default)]
pub struct Sets {
    #[serde(default)]
    pub set: Vec<Set>,
}

/// One documented performance as returned by setlist.fm
#[derive(Deserialize, Serialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Setlist {
    #[serde(default)]
    pub id: String,
    // dd-MM-yyyy
    pub event_date: String,
    #[serde(default)]
    pub venue: Venue,
    pub tour: Option<Tour>,
    #[serde(default)]
    pub sets: Sets,
    pub url: Option<String>,
}

impl Setlist {
    /// `(lat, long)` of the venue's city, when both are known
    pub fn coords(&self) -> Option<(f64, f64)> {
        let coords = self.venue.city.coords.as_ref()?;
        Some((coords.lat?, coords.long?))
    }

    /// Song names in performance order, blank entries (tapes, segues) dropped
    pub fn song_names(&self) -> impl Iterator<Item = &str> {
        self.sets
            .set
            .iter()
            .flat_map(|set| set.song.iter())
            .map(|song| song.name.trim())
            .filter(|name| !name.is_empty())
    }
}

#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct MapMarker {
    pub lat: f64,
    pub lng: f64,
    pub infobox: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn setlist_from_setlistfm_json() {
        let raw = serde_json::json!({
            "id": "63de4613",
            "eventDate": "31-12-2019",
            "tour": {"name": "New Year's Run"},
            "venue": {
                "name": "Madison Square Garden",
                "city": {
                    "name": "New York",
                    "coords": {"lat": 40.71, "long": -74.0},
                    "country": {"code": "US", "name": "United States"}
                }
            },
            "sets": {"set": [
                {"song": [{"name": "Carini"}, {"name": ""}, {"name": "Tweezer"}]},
                {"encore": 1, "song": [{"name": "Tweezer Reprise"}]}
            ]},
            "url": "https://www.setlist.fm/setlist/phish/2019/x.html"
        });
        let setlist: Setlist = serde_json::from_value(raw).unwrap();
        assert_eq!(setlist.event_date, "31-12-2019");
        assert_eq!(setlist.coords(), Some((40.71, -74.0)));
        assert_eq!(
            setlist.song_names().collect::<Vec<_>>(),
            vec!["Carini", "Tweezer", "Tweezer Reprise"]
        );
    }

    #[test]
    fn setlist_with_missing_members() {
        let raw = serde_json::json!({
            "eventDate": "01-01-2000",
            "venue": {"name": "Somewhere", "city": {"name": "Nowhere"}}
        });
        let setlist: Setlist = serde_json::from_value(raw).unwrap();
        assert!(setlist.coords().is_none());
        assert!(setlist.tour.is_none());
        assert_eq!(setlist.song_names().count(), 0);
    }

    #[test]
    fn partial_coords_and_nameless_tour_still_parse() {
        let raw = serde_json::json!({
            "eventDate": "02-01-2000",
            "tour": {},
            "venue": {"name": "Somewhere", "city": {"name": "Nowhere", "coords": {"lat": 40.1}}}
        });
        let setlist: Setlist = serde_json::from_value(raw).unwrap();
        assert!(setlist.coords().is_none());
        assert_eq!(setlist.tour.map(|t| t.name), Some(String::new()));

        let raw = serde_json::json!({
            "eventDate": "03-01-2000",
            "venue": {"city": {"name": "Nowhere", "coords": {}}}
        });
        let setlist: Setlist = serde_json::from_value(raw).unwrap();
        assert!(setlist.coords().is_none());
    }

    #[test]
    fn fallback_track_drops_empty_preview() {
        let t = TrackPreview::fallback("", "https://open.spotify.com/track/x");
        assert!(t.preview_url.is_none());
        assert_eq!(t.external_urls.spotify, "https://open.spotify.com/track/x");
    }
}
