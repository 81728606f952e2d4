//! Map boundaries and the size-capped route encoding for the static map.

use serde::Serialize;
use tracing::{debug, warn};

use crate::kinematics::coordinate_distance_m;
use crate::models::PositionFix;

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct BoundingBox {
    pub min_lat: f64,
    pub max_lat: f64,
    pub min_lon: f64,
    pub max_lon: f64,
}

impl BoundingBox {
    pub fn of<'a>(fixes: impl IntoIterator<Item = &'a PositionFix>) -> Option<Self> {
        fixes.into_iter().fold(None, |bounds, fix| {
            let (lat, lon) = (fix.latitude, fix.longitude);
            Some(match bounds {
                None => BoundingBox {
                    min_lat: lat,
                    max_lat: lat,
                    min_lon: lon,
                    max_lon: lon,
                },
                Some(b) => BoundingBox {
                    min_lat: b.min_lat.min(lat),
                    max_lat: b.max_lat.max(lat),
                    min_lon: b.min_lon.min(lon),
                    max_lon: b.max_lon.max(lon),
                },
            })
        })
    }

    /// East-west extent along the northern edge, in metres.
    pub fn width_m(&self) -> f64 {
        coordinate_distance_m((self.max_lat, self.min_lon), (self.max_lat, self.max_lon))
    }

    /// North-south extent along the eastern edge, in metres.
    pub fn height_m(&self) -> f64 {
        coordinate_distance_m((self.max_lat, self.max_lon), (self.min_lat, self.max_lon))
    }

    /// Metres per pixel when the box is fitted onto a square canvas.
    pub fn scale(&self, canvas_px: f64) -> f64 {
        (self.width_m() / canvas_px).max(self.height_m() / canvas_px)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct MapCenter {
    pub latitude: f64,
    pub longitude: f64,
}

/// Boundaries as the statement template consumes them.
///
/// `top`/`bottom` carry longitudes and `left`/`right` latitudes, and the
/// center is `min + (max - min)`, which lands on the max edge rather than the
/// midpoint. Both are kept as the template has always received them until the
/// layout owners confirm a fix.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct MapBoundaries {
    pub top: f64,
    pub bottom: f64,
    pub left: f64,
    pub right: f64,
    pub center: MapCenter,
}

impl From<BoundingBox> for MapBoundaries {
    fn from(b: BoundingBox) -> Self {
        let (top, bottom) = (b.max_lon, b.min_lon);
        let (left, right) = (b.min_lat, b.max_lat);
        MapBoundaries {
            top,
            bottom,
            left,
            right,
            center: MapCenter {
                latitude: bottom + (top - bottom),
                longitude: left + (right - left),
            },
        }
    }
}

/// Encodes `(lat, lon)` pairs with the polyline algorithm at precision 5.
pub fn encode_polyline(coordinates: &[(f64, f64)]) -> String {
    let mut encoded = String::with_capacity(coordinates.len() * 8);
    let (mut last_lat, mut last_lon) = (0i64, 0i64);

    for &(lat, lon) in coordinates {
        let lat = (lat * 1e5).round() as i64;
        let lon = (lon * 1e5).round() as i64;
        push_value(lat - last_lat, &mut encoded);
        push_value(lon - last_lon, &mut encoded);
        last_lat = lat;
        last_lon = lon;
    }

    encoded
}

fn push_value(value: i64, out: &mut String) {
    let mut chunk = if value < 0 { !(value << 1) } else { value << 1 };
    while chunk >= 0x20 {
        out.push(char::from((((chunk & 0x1f) | 0x20) + 63) as u8));
        chunk >>= 5;
    }
    out.push(char::from((chunk + 63) as u8));
}

/// Keeps a point only when it is at least `min_spacing_m` from the last kept one.
pub fn thin(coordinates: &[(f64, f64)], min_spacing_m: f64) -> Vec<(f64, f64)> {
    let mut kept: Vec<(f64, f64)> = Vec::with_capacity(coordinates.len());
    for &coordinate in coordinates {
        if let Some(&last) = kept.last() {
            if coordinate_distance_m(last, coordinate) < min_spacing_m {
                continue;
            }
        }
        kept.push(coordinate);
    }
    kept
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RouteEncoding {
    pub encoded: String,
    /// Coarsening factor the encoding was produced at.
    pub factor: u32,
    pub points: usize,
    /// Set when the encoding still does not fit.
    pub degraded: bool,
}

/// Coarsens the route until `fits` accepts its encoding.
///
/// Each attempt restarts from the full input with a spacing of
/// `scale * factor` metres. Gives up, flagging the result as degraded, once the
/// route is down to two points, `scale` cannot thin anything, or
/// `max_attempts` is spent.
pub fn reduce_route_with<F>(
    coordinates: &[(f64, f64)],
    scale: f64,
    max_attempts: u32,
    fits: F,
) -> RouteEncoding
where
    F: Fn(&str) -> bool,
{
    let mut factor = 0u32;
    loop {
        let retained = thin(coordinates, scale * f64::from(factor));
        let encoded = encode_polyline(&retained);
        let points = retained.len();

        if fits(&encoded) {
            debug!(factor, points, "route encoding fits");
            return RouteEncoding {
                encoded,
                factor,
                points,
                degraded: false,
            };
        }

        let exhausted = factor + 1 >= max_attempts;
        if points <= 2 || scale <= 0.0 || exhausted {
            warn!(
                factor,
                points,
                length = encoded.len(),
                "route encoding does not fit even after coarsening"
            );
            return RouteEncoding {
                encoded,
                factor,
                points,
                degraded: true,
            };
        }

        factor += 1;
    }
}

pub fn reduce_route(
    coordinates: &[(f64, f64)],
    scale: f64,
    max_encoded_len: usize,
    max_attempts: u32,
) -> RouteEncoding {
    reduce_route_with(coordinates, scale, max_attempts, |encoded| {
        encoded.len() <= max_encoded_len
    })
}

pub fn coordinates(fixes: &[PositionFix]) -> Vec<(f64, f64)> {
    fixes.iter().map(|fix| (fix.latitude, fix.longitude)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::fixtures::{at, fix};

    fn track(count: usize) -> Vec<(f64, f64)> {
        (0..count)
            .map(|i| (51.5 + i as f64 * 0.0003, -0.1 + i as f64 * 0.0002))
            .collect()
    }

    #[test]
    fn encodes_the_reference_polyline() {
        let encoded = encode_polyline(&[(38.5, -120.2), (40.7, -120.95), (43.252, -126.453)]);
        assert_eq!(encoded, "_p~iF~ps|U_ulLnnqC_mqNvxq`@");
        assert_eq!(encode_polyline(&[]), "");
    }

    #[test]
    fn boundaries_keep_the_template_center() {
        let fixes = vec![
            fix(1, at(6, 0, 0), 51.5, -0.2),
            fix(2, at(6, 5, 0), 51.6, -0.1),
        ];
        let bounds = BoundingBox::of(&fixes).unwrap();
        assert_eq!(bounds.min_lat, 51.5);
        assert_eq!(bounds.max_lon, -0.1);

        let boundaries = MapBoundaries::from(bounds);
        // Deliberately the max edge, not the midpoint.
        assert!((boundaries.center.latitude - boundaries.top).abs() < 1e-9);
        assert!((boundaries.center.longitude - 51.6).abs() < 1e-9);
        assert_ne!(boundaries.center.longitude, (51.5 + 51.6) / 2.0);
    }

    #[test]
    fn scale_is_the_larger_extent_per_pixel() {
        let fixes = vec![
            fix(1, at(6, 0, 0), 51.5, -0.1),
            fix(2, at(6, 5, 0), 51.6, -0.1),
        ];
        let bounds = BoundingBox::of(&fixes).unwrap();
        assert_eq!(bounds.width_m(), 0.0);
        let scale = bounds.scale(640.0);
        assert!((scale - bounds.height_m() / 640.0).abs() < 1e-9);
        assert!(BoundingBox::of(std::iter::empty::<&PositionFix>()).is_none());
    }

    #[test]
    fn two_points_fit_at_factor_zero() {
        let route = reduce_route(&track(2), 10.0, 8192, 100);
        assert_eq!(route.factor, 0);
        assert_eq!(route.points, 2);
        assert!(!route.degraded);
    }

    #[test]
    fn coarsening_shrinks_an_evenly_spaced_track() {
        let coordinates = track(400);
        let mut previous = usize::MAX;
        for factor in 0..6 {
            let length = encode_polyline(&thin(&coordinates, 10.0 * f64::from(factor))).len();
            assert!(length <= previous);
            previous = length;
        }

        let full = encode_polyline(&coordinates).len();
        let route = reduce_route(&coordinates, 10.0, full / 3, 100);
        assert!(!route.degraded);
        assert!(route.factor > 0);
        assert!(route.encoded.len() <= full / 3);
        assert_eq!(route.points, thin(&coordinates, 10.0 * f64::from(route.factor)).len());
    }

    #[test]
    fn impossible_ceilings_degrade_instead_of_looping() {
        let route = reduce_route(&track(50), 10.0, 1, 10_000);
        assert!(route.degraded);
        assert!(route.points <= 2);

        let stationary = vec![(51.5, -0.1); 10];
        let route = reduce_route(&stationary, 0.0, 4, 10_000);
        assert!(route.degraded);
        assert_eq!(route.factor, 0);

        let route = reduce_route(&track(50), 0.01, 1, 3);
        assert!(route.degraded);
        assert_eq!(route.factor, 2);
    }
}
