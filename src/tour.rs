/*!
Tour aggregation

Given an artist and optional year/city filters, fetch the artist's setlists,
pin the ones with known venue coordinates on the map, select the stop whose
songs get resolved to playable catalog tracks, and hand all of it back to
the page renderer in one value. Nothing here is shared between requests.
*/
use crate::error::Error;
use crate::models::{MapMarker, Setlist, TrackPreview};
use crate::setlist::{SetlistFilter, SetlistSource};
use crate::spotify::TrackSearch;
use crate::utils::{escape_html, last_chars};
use crate::{Result, CONFIG, LOG};

/// Key of the lone entry returned when no song could be resolved
pub const FALLBACK_SONG: &str = "Fail";

/// Placeholder values rendered when upstream data is missing
#[derive(Debug, Clone)]
pub struct Fallbacks {
    pub no_tour_message: String,
    pub no_venue_placeholder: String,
    pub preview_url: String,
    pub track_url: String,
}

impl Fallbacks {
    pub fn from_config() -> Self {
        Self {
            no_tour_message: CONFIG.no_tour_message.clone(),
            no_venue_placeholder: CONFIG.no_venue_placeholder.clone(),
            preview_url: CONFIG.fallback_preview_url.clone(),
            track_url: CONFIG.fallback_track_url.clone(),
        }
    }

    fn track(&self) -> TrackPreview {
        TrackPreview::fallback(&self.preview_url, &self.track_url)
    }
}

/// How the setlist lookup went, kept so "no data" and "couldn't ask" stay distinguishable
#[derive(Debug, Clone, PartialEq)]
pub enum SetlistStatus {
    Found(usize),
    NotFound,
    Unavailable(String),
}

/// Song name to catalog track, in the order songs were first played
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TrackList {
    entries: Vec<(String, TrackPreview)>,
}

impl TrackList {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace, keeping the position of the first insert
    pub fn insert(&mut self, song: &str, track: TrackPreview) {
        match self.entries.iter_mut().find(|(name, _)| name == song) {
            Some(entry) => entry.1 = track,
            None => self.entries.push((song.to_string(), track)),
        }
    }

    pub fn get(&self, song: &str) -> Option<&TrackPreview> {
        self.entries
            .iter()
            .find(|(name, _)| name == song)
            .map(|(_, track)| track)
    }

    pub fn contains(&self, song: &str) -> bool {
        self.get(song).is_some()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &TrackPreview)> {
        self.entries.iter().map(|(name, track)| (name.as_str(), track))
    }
}

pub struct TourRequest<'a> {
    pub artist_id: &'a str,
    pub artist_name: &'a str,
    pub filter: SetlistFilter,
}

/// Everything the artist page needs about an artist's shows
#[derive(Debug, Clone, PartialEq)]
pub struct TourView {
    pub markers: Vec<MapMarker>,
    pub tracks: TrackList,
    pub tour_name: String,
    pub city_name: String,
    pub event_date: String,
    pub venue_name: String,
    pub selected: Option<Setlist>,
    pub setlist_status: SetlistStatus,
}

/// Fetch setlists, treating "none found" and upstream failures as an empty list
pub async fn fetch_setlists<S: SetlistSource + ?Sized>(
    source: &S,
    artist_name: &str,
    filter: &SetlistFilter,
) -> (Vec<Setlist>, SetlistStatus) {
    match source.find_setlists(artist_name, filter).await {
        Ok(setlists) => {
            let n = setlists.len();
            (setlists, SetlistStatus::Found(n))
        }
        Err(Error::NotFound(what)) => {
            slog::info!(LOG, "no setlists found"; "what" => what, "year" => ?filter.year, "city" => ?filter.city_name);
            (vec![], SetlistStatus::NotFound)
        }
        Err(e) => {
            slog::warn!(LOG, "setlist lookup failed"; "artist" => artist_name, "error" => %e);
            (vec![], SetlistStatus::Unavailable(e.to_string()))
        }
    }
}

/// Path of the artist page for the year and city of `setlist`
pub fn stop_path(artist_id: &str, setlist: &Setlist) -> String {
    format!(
        "/artist/{}/{}/{}",
        urlencoding::encode(artist_id),
        last_chars(&setlist.event_date, 4),
        urlencoding::encode(&setlist.venue.city.name),
    )
}

/// One marker per setlist with venue coordinates, in input order
pub fn map_markers(artist_id: &str, setlists: &[Setlist]) -> Vec<MapMarker> {
    setlists
        .iter()
        .filter_map(|setlist| {
            let (lat, lng) = match setlist.coords() {
                Some(c) => c,
                None => {
                    slog::debug!(LOG, "no coordinates for setlist"; "id" => &setlist.id, "city" => &setlist.venue.city.name);
                    return None;
                }
            };
            let load_set = format!(
                "<a href='{}'>Listen to set</a>",
                escape_html(&stop_path(artist_id, setlist))
            );
            let infobox = format!(
                "{} {} {} {}",
                escape_html(&setlist.venue.city.name),
                escape_html(&setlist.event_date),
                escape_html(&setlist.venue.name),
                load_set,
            );
            Some(MapMarker {
                lat,
                lng,
                infobox,
            })
        })
        .collect()
}

/// The stop whose songs are resolved: the last setlist of the filtered sequence
pub fn select_stop(setlists: &[Setlist]) -> Option<&Setlist> {
    setlists.last()
}

pub fn tour_label(stop: &Setlist) -> String {
    stop.tour
        .as_ref()
        .map(|t| format!("{} - ", t.name))
        .unwrap_or_default()
}

/// Resolve each song of `stop` to its best catalog match.
///
/// Songs that can't be matched are skipped. An expired session
/// aborts the whole resolution so the caller can send the user
/// back through sign-in.
pub async fn resolve_tracks<C: TrackSearch + ?Sized>(
    catalog: &C,
    artist_name: &str,
    stop: &Setlist,
) -> Result<TrackList> {
    let mut tracks = TrackList::new();
    for song in stop.song_names() {
        if tracks.contains(song) {
            continue;
        }
        match catalog.search_track(song, artist_name, 1).await {
            Ok(found) => match found.into_iter().next() {
                Some(track) => tracks.insert(song, track),
                None => slog::info!(LOG, "no catalog match"; "song" => song, "artist" => artist_name),
            },
            Err(Error::Unauthenticated) => return Err(Error::Unauthenticated),
            Err(e) => {
                slog::warn!(LOG, "track search failed"; "song" => song, "artist" => artist_name, "error" => %e)
            }
        }
    }
    Ok(tracks)
}

pub async fn build_tour<S, C>(
    source: &S,
    catalog: &C,
    req: &TourRequest<'_>,
    fallbacks: &Fallbacks,
) -> Result<TourView>
where
    S: SetlistSource + ?Sized,
    C: TrackSearch + ?Sized,
{
    let (setlists, setlist_status) = fetch_setlists(source, req.artist_name, &req.filter).await;
    let markers = map_markers(req.artist_id, &setlists);

    let selected = select_stop(&setlists).cloned();
    let (tour_name, city_name, event_date, venue_name, mut tracks) = match &selected {
        Some(stop) => (
            tour_label(stop),
            stop.venue.city.name.clone(),
            stop.event_date.clone(),
            stop.venue.name.clone(),
            resolve_tracks(catalog, req.artist_name, stop).await?,
        ),
        None => (
            fallbacks.no_tour_message.clone(),
            String::new(),
            String::new(),
            fallbacks.no_venue_placeholder.clone(),
            TrackList::new(),
        ),
    };
    if tracks.is_empty() {
        tracks.insert(FALLBACK_SONG, fallbacks.track());
    }

    slog::info!(
        LOG, "built tour view";
        "artist" => req.artist_name,
        "markers" => markers.len(),
        "tracks" => tracks.len(),
        "event_date" => &event_date,
    );
    Ok(TourView {
        markers,
        tracks,
        tour_name,
        city_name,
        event_date,
        venue_name,
        selected,
        setlist_status,
    })
}
