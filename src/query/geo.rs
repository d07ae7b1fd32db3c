//! Spherical distance support for `$near` / `$nearSphere`.

use bson::{Bson, Document};

use super::types::NearQuery;
use crate::document::path;
use crate::utils::num::as_f64;

/// Mean earth radius in meters, as used for 2dsphere distances.
pub const EARTH_RADIUS_M: f64 = 6_378_100.0;

/// Extracts `(longitude, latitude)` from a GeoJSON point or a legacy `[lng, lat]` pair.
#[must_use]
pub fn point_of(v: &Bson) -> Option<(f64, f64)> {
    match v {
        Bson::Document(d) => {
            if let Some(Bson::String(t)) = d.get("type")
                && t != "Point"
            {
                return None;
            }
            point_of_pair(d.get("coordinates")?)
        }
        pair => point_of_pair(pair),
    }
}

fn point_of_pair(v: &Bson) -> Option<(f64, f64)> {
    let Bson::Array(items) = v else {
        return None;
    };
    if items.len() != 2 {
        return None;
    }
    let (lng, lat) = (as_f64(&items[0])?, as_f64(&items[1])?);
    if !(-180.0..=180.0).contains(&lng) || !(-90.0..=90.0).contains(&lat) {
        return None;
    }
    Some((lng, lat))
}

/// Great-circle distance in meters between two `(lng, lat)` points.
#[must_use]
pub fn haversine(a: (f64, f64), b: (f64, f64)) -> f64 {
    let (lat1, lat2) = (a.1.to_radians(), b.1.to_radians());
    let dlat = (b.1 - a.1).to_radians();
    let dlng = (b.0 - a.0).to_radians();
    let h = (dlat / 2.0).sin().powi(2) + lat1.cos() * lat2.cos() * (dlng / 2.0).sin().powi(2);
    2.0 * EARTH_RADIUS_M * h.sqrt().min(1.0).asin()
}

/// Distance from `v` to the query point when `v` is a point inside the distance window.
#[must_use]
pub fn near_distance(v: &Bson, near: &NearQuery) -> Option<f64> {
    let d = haversine(point_of(v)?, near.point);
    if near.min_distance.is_some_and(|min| d < min) || near.max_distance.is_some_and(|max| d > max) {
        return None;
    }
    Some(d)
}

/// Smallest in-window distance of any point stored at `field` in `doc`.
#[must_use]
pub fn distance_in(doc: &Document, field: &str, near: &NearQuery) -> Option<f64> {
    path::lookup(doc, field)
        .iter()
        .filter_map(|r| near_distance(r.value, near))
        .min_by(f64::total_cmp)
}
