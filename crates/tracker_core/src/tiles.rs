//! Slippy-map tile addressing for the `{server}/{zoom}/{x}/{y}.png` tile service.

use std::f64::consts::PI;

use shared::domain::Coordinate;
use thiserror::Error;
use url::Url;

pub const OSM_TILE_TEMPLATE: &str = "https://{s}.tile.openstreetmap.org/{z}/{x}/{y}.png";
pub const OSM_ATTRIBUTION: &str = "© OpenStreetMap contributors";
pub const MAX_ZOOM: u8 = 19;
/// Latitude bound of the Web Mercator projection.
pub const MAX_LATITUDE: f64 = 85.051_128_779_806_59;

#[derive(Debug, Error)]
pub enum TileUrlError {
    #[error("tile url template produced an invalid url '{url}': {source}")]
    InvalidUrl {
        url: String,
        source: url::ParseError,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TileCoord {
    pub zoom: u8,
    pub x: u32,
    pub y: u32,
}

impl TileCoord {
    /// The tile covering `coordinate` at `zoom`. Zoom is capped at [`MAX_ZOOM`]
    /// and latitudes outside the projection are pinned to its edge rows.
    pub fn containing(coordinate: Coordinate, zoom: u8) -> Self {
        let zoom = zoom.min(MAX_ZOOM);
        let n = f64::from(1u32 << zoom);
        let max_index = n - 1.0;

        let lat = coordinate.lat.clamp(-MAX_LATITUDE, MAX_LATITUDE).to_radians();
        let lng = coordinate.lng.clamp(-180.0, 180.0);

        let x = ((lng + 180.0) / 360.0 * n).floor().clamp(0.0, max_index);
        let y = ((1.0 - (lat.tan() + 1.0 / lat.cos()).ln() / PI) / 2.0 * n)
            .floor()
            .clamp(0.0, max_index);

        Self {
            zoom,
            x: x as u32,
            y: y as u32,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TileLayer {
    pub url_template: String,
    pub subdomains: Vec<String>,
    pub attribution: String,
}

impl Default for TileLayer {
    fn default() -> Self {
        Self {
            url_template: OSM_TILE_TEMPLATE.to_string(),
            subdomains: vec!["a".into(), "b".into(), "c".into()],
            attribution: OSM_ATTRIBUTION.to_string(),
        }
    }
}

impl TileLayer {
    pub fn subdomain_for(&self, tile: TileCoord) -> Option<&str> {
        if self.subdomains.is_empty() {
            return None;
        }
        let index = (u64::from(tile.x) + u64::from(tile.y)) % self.subdomains.len() as u64;
        self.subdomains.get(index as usize).map(String::as_str)
    }

    pub fn tile_url(&self, tile: TileCoord) -> Result<Url, TileUrlError> {
        let mut raw = self
            .url_template
            .replace("{z}", &tile.zoom.to_string())
            .replace("{x}", &tile.x.to_string())
            .replace("{y}", &tile.y.to_string());
        if let Some(subdomain) = self.subdomain_for(tile) {
            raw = raw.replace("{s}", subdomain);
        }

        Url::parse(&raw).map_err(|source| TileUrlError::InvalidUrl { url: raw, source })
    }
}
