//! Server rendered html
use crate::models::{Artist, MapMarker};
use crate::tour::TourView;
use crate::utils::escape_html;
use crate::Result;

/// Year/city path values meaning "no filter"
pub const ANY_YEAR: &str = "0";
pub const ANY_CITY: &str = "city";

fn layout(title: &str, body: &str) -> String {
    format!(
        r#"<!DOCTYPE html>
<html lang="en">
<head>
<meta charset="utf-8">
<meta name="viewport" content="width=device-width, initial-scale=1">
<title>{title}</title>
<link rel="stylesheet" href="/static/style.css">
</head>
<body>
{body}
</body>
</html>
"#,
        title = escape_html(title),
        body = body,
    )
}

fn nav() -> &'static str {
    r#"<nav><a href="/home">Home</a> <a href="/sign_out">Sign out</a></nav>"#
}

pub fn artist_path(id: &str) -> String {
    format!(
        "/artist/{}/{}/{}",
        urlencoding::encode(id),
        ANY_YEAR,
        ANY_CITY
    )
}

pub fn sign_in(authorize_url: &str) -> String {
    let body = format!(
        r#"<center><h1 class="title">tourbus</h1>
<p>Hear what your favorite artists played on tour.</p>
<a class="button" href="{url}">Sign in with Spotify</a></center>"#,
        url = escape_html(authorize_url),
    );
    layout("tourbus", &body)
}

fn artist_card(artist: &Artist) -> String {
    let image = artist
        .image_url()
        .map(|url| {
            format!(
                r#"<img src="{}" alt="{}" width="160">"#,
                escape_html(url),
                escape_html(&artist.name)
            )
        })
        .unwrap_or_default();
    format!(
        r#"<li class="artist"><a href="{href}">{image}<span>{name}</span></a></li>"#,
        href = escape_html(&artist_path(&artist.id)),
        image = image,
        name = escape_html(&artist.name),
    )
}

pub fn home(artists: &[Artist]) -> String {
    let cards: String = artists.iter().map(|a| artist_card(a)).collect();
    let body = format!(
        r#"{nav}
<form method="post" action="/home">
<input type="text" name="search" placeholder="Search artists">
<button type="submit">Search</button>
</form>
<ul class="artists">{cards}</ul>"#,
        nav = nav(),
        cards = cards,
    );
    layout("tourbus", &body)
}

/// Everything rendered on an artist's page
pub struct ArtistPage<'a> {
    pub artist: &'a Artist,
    pub related_artists: &'a [Artist],
    pub image_url: &'a str,
    pub tour: &'a TourView,
    pub maps_key: &'a str,
}

/// Marker json safe to inline in a `<script>` block
pub fn markers_json(markers: &[MapMarker]) -> Result<String> {
    let json = serde_json::to_string(markers).map_err(|e| se!("marker json error {}", e))?;
    Ok(json.replace("</", "<\\/"))
}

fn track_list(tour: &TourView) -> String {
    tour.tracks
        .iter()
        .map(|(song, track)| {
            let audio = track
                .preview_url
                .as_deref()
                .filter(|u| !u.is_empty())
                .map(|u| format!(r#"<audio controls preload="none" src="{}"></audio>"#, escape_html(u)))
                .unwrap_or_default();
            format!(
                r#"<li class="track"><a href="{href}" target="_blank">{song}</a> {audio}</li>"#,
                href = escape_html(&track.external_urls.spotify),
                song = escape_html(song),
                audio = audio,
            )
        })
        .collect()
}

pub fn artist(page: &ArtistPage<'_>) -> Result<String> {
    let tour = page.tour;
    let related: String = page.related_artists.iter().map(|a| artist_card(a)).collect();
    let genres = escape_html(&page.artist.genres.join(", "));
    let body = format!(
        r#"{nav}
<header>
<img src="{image}" alt="{name}" width="300">
<h1>{name}</h1>
<p class="genres">{genres}</p>
</header>
<form method="post" action="{self_path}">
<input type="text" name="year" placeholder="Year" size="4">
<button type="submit">Find tour</button>
</form>
<section class="stop">
<h2>{tour_name}</h2>
<h3 class="venue">{venue}</h3>
<h3>{city} {event_date}</h3>
<ol class="tracks">{tracks}</ol>
</section>
<div id="map" style="height: 480px"></div>
<section class="related"><h2>Related artists</h2><ul class="artists">{related}</ul></section>
<script>
const markers = {markers};
function initMap() {{
  const center = markers.length ? {{lat: markers[0].lat, lng: markers[0].lng}} : {{lat: 39.8, lng: -98.6}};
  const map = new google.maps.Map(document.getElementById("map"), {{zoom: 3, center: center}});
  const info = new google.maps.InfoWindow();
  markers.forEach(function (m) {{
    const pin = new google.maps.Marker({{position: {{lat: m.lat, lng: m.lng}}, map: map}});
    pin.addListener("click", function () {{
      info.setContent(m.infobox);
      info.open(map, pin);
    }});
  }});
}}
</script>
<script async defer src="https://maps.googleapis.com/maps/api/js?key={maps_key}&callback=initMap"></script>"#,
        nav = nav(),
        image = escape_html(page.image_url),
        name = escape_html(&page.artist.name),
        genres = genres,
        self_path = escape_html(&artist_path(&page.artist.id)),
        tour_name = escape_html(&tour.tour_name),
        venue = escape_html(&tour.venue_name),
        city = escape_html(&tour.city_name),
        event_date = escape_html(&tour.event_date),
        tracks = track_list(tour),
        related = related,
        markers = markers_json(&tour.markers)?,
        maps_key = urlencoding::encode(page.maps_key),
    );
    Ok(layout(&page.artist.name, &body))
}

pub fn not_found() -> String {
    let body = format!(
        r#"{nav}
<center><h1>Wrong turn</h1><p>That page isn't on the tour.</p><a href="/">Back to the bus</a></center>"#,
        nav = nav(),
    );
    layout("tourbus - not found", &body)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ExternalUrls, TrackPreview};
    use crate::tour::{SetlistStatus, TrackList, FALLBACK_SONG};

    fn phish() -> Artist {
        Artist {
            id: "5wbIWUzTPuTxTyG6ouQKqz".into(),
            name: "Phish".into(),
            images: vec![],
            genres: vec!["jam band".into()],
            popularity: Some(60),
        }
    }

    fn view() -> TourView {
        let mut tracks = TrackList::new();
        tracks.insert(
            FALLBACK_SONG,
            TrackPreview {
                id: None,
                name: String::new(),
                preview_url: None,
                external_urls: ExternalUrls {
                    spotify: "https://open.spotify.com/track/5sluzb7VfBh5sBM8C8Nofa".into(),
                },
                artists: vec![],
            },
        );
        TourView {
            markers: vec![MapMarker {
                lat: 40.7,
                lng: -74.0,
                infobox: "New York <a href='/artist/x/2019/New%20York'>Listen to set</a></script>".into(),
            }],
            tracks,
            tour_name: "Sorry, no tour for the selected year".into(),
            city_name: String::new(),
            event_date: String::new(),
            venue_name: "any venues".into(),
            selected: None,
            setlist_status: SetlistStatus::NotFound,
        }
    }

    #[test]
    fn marker_json_cannot_close_script() {
        let json = markers_json(&view().markers).unwrap();
        assert!(!json.contains("</script>"));
        assert!(json.contains("<\\/script>"));
    }

    #[test]
    fn artist_page_renders_tour_and_fallback_track() {
        let a = phish();
        let v = view();
        let html = artist(&ArtistPage {
            artist: &a,
            related_artists: &[],
            image_url: "http://placecage.com/600/400",
            tour: &v,
            maps_key: "maps-key",
        })
        .unwrap();
        assert!(html.contains("<h2>Sorry, no tour for the selected year</h2>"));
        assert!(html.contains(r#"<h3 class="venue">any venues</h3>"#));
        assert!(html.contains(">Fail</a>"));
        assert!(html.contains("key=maps-key"));
        assert!(html.contains(r#"action="/artist/5wbIWUzTPuTxTyG6ouQKqz/0/city""#));
    }

    #[test]
    fn empty_tour_name_keeps_venue_separate() {
        let a = phish();
        let mut v = view();
        v.tour_name = String::new();
        v.venue_name = "Madison Square Garden".into();
        let html = artist(&ArtistPage {
            artist: &a,
            related_artists: &[],
            image_url: "http://placecage.com/600/400",
            tour: &v,
            maps_key: "maps-key",
        })
        .unwrap();
        assert!(html.contains("<h2></h2>"));
        assert!(html.contains(r#"<h3 class="venue">Madison Square Garden</h3>"#));
    }

    #[test]
    fn home_links_artists_without_filters() {
        let html = home(&[phish()]);
        assert!(html.contains(r#"href="/artist/5wbIWUzTPuTxTyG6ouQKqz/0/city""#));
        assert!(html.contains(r#"name="search""#));
    }

    #[test]
    fn sign_in_links_to_authorize_url() {
        let html = sign_in("https://accounts.spotify.com/authorize?client_id=a&state=b");
        assert!(html.contains("https://accounts.spotify.com/authorize?client_id=a&amp;state=b"));
    }
}
