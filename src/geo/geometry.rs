//! Spherical distance and containment primitives for the zone lookups.
//!
//! Accuracy requirements are modest: search radii are tens of meters and the
//! geometries span city blocks, so an equirectangular local projection around
//! the query point is sufficient for segment distance.

const EARTH_RADIUS_M: f64 = 6_371_000.0;

/// Great-circle distance between two (lat, lng) points in meters.
pub fn haversine_m(lat1: f64, lng1: f64, lat2: f64, lng2: f64) -> f64 {
    let phi1 = lat1.to_radians();
    let phi2 = lat2.to_radians();
    let d_phi = (lat2 - lat1).to_radians();
    let d_lambda = (lng2 - lng1).to_radians();

    let a = (d_phi / 2.0).sin().powi(2)
        + phi1.cos() * phi2.cos() * (d_lambda / 2.0).sin().powi(2);
    2.0 * EARTH_RADIUS_M * a.sqrt().asin()
}

/// Minimum distance in meters from a point to a polyline of (lat, lng)
/// vertices. Returns `None` for an empty polyline.
pub fn distance_to_polyline_m(lat: f64, lng: f64, polyline: &[(f64, f64)]) -> Option<f64> {
    match polyline {
        [] => None,
        [(vlat, vlng)] => Some(haversine_m(lat, lng, *vlat, *vlng)),
        _ => polyline
            .windows(2)
            .map(|seg| distance_to_segment_m(lat, lng, seg[0], seg[1]))
            .min_by(|a, b| a.total_cmp(b)),
    }
}

fn distance_to_segment_m(lat: f64, lng: f64, a: (f64, f64), b: (f64, f64)) -> f64 {
    // Project into a local meters frame centered on the query point.
    let cos_lat = lat.to_radians().cos();
    let to_xy = |p: (f64, f64)| -> (f64, f64) {
        (
            (p.1 - lng).to_radians() * cos_lat * EARTH_RADIUS_M,
            (p.0 - lat).to_radians() * EARTH_RADIUS_M,
        )
    };

    let (ax, ay) = to_xy(a);
    let (bx, by) = to_xy(b);
    let (dx, dy) = (bx - ax, by - ay);
    let len_sq = dx * dx + dy * dy;

    if len_sq == 0.0 {
        return (ax * ax + ay * ay).sqrt();
    }

    // Query point is the origin; clamp the projection onto the segment.
    let t = (-(ax * dx + ay * dy) / len_sq).clamp(0.0, 1.0);
    let (cx, cy) = (ax + t * dx, ay + t * dy);
    (cx * cx + cy * cy).sqrt()
}

/// Ray-cast containment test against a polygon of (lat, lng) vertices. The
/// polygon is treated as closed; the last vertex need not repeat the first.
pub fn point_in_polygon(lat: f64, lng: f64, polygon: &[(f64, f64)]) -> bool {
    if polygon.len() < 3 {
        return false;
    }

    let mut inside = false;
    let mut j = polygon.len() - 1;
    for i in 0..polygon.len() {
        let (lat_i, lng_i) = polygon[i];
        let (lat_j, lng_j) = polygon[j];
        if ((lng_i > lng) != (lng_j > lng))
            && lat < (lat_j - lat_i) * (lng - lng_i) / (lng_j - lng_i) + lat_i
        {
            inside = !inside;
        }
        j = i;
    }
    inside
}

#[cfg(test)]
mod tests {
    use super::*;

    // Roughly one block of Chicago's Lakeview neighborhood.
    const BLOCK: f64 = 0.001;

    #[test]
    fn haversine_matches_known_degree_scale() {
        // One degree of latitude is about 111.2 km.
        let d = haversine_m(41.0, -87.6, 42.0, -87.6);
        assert!((d - 111_195.0).abs() < 300.0, "got {d}");
    }

    #[test]
    fn haversine_zero_for_identical_points() {
        assert_eq!(haversine_m(41.9, -87.65, 41.9, -87.65), 0.0);
    }

    #[test]
    fn polyline_distance_perpendicular_to_segment() {
        // East-west street segment; query a small offset due north of it.
        let street = [(41.9400, -87.6600), (41.9400, -87.6500)];
        let d = distance_to_polyline_m(41.9400 + BLOCK, -87.6550, &street).unwrap();
        let expected = haversine_m(41.9400, -87.6550, 41.9400 + BLOCK, -87.6550);
        assert!((d - expected).abs() < 1.0, "got {d}, expected {expected}");
    }

    #[test]
    fn polyline_distance_clamps_to_endpoint() {
        let street = [(41.9400, -87.6600), (41.9400, -87.6500)];
        // Query past the eastern endpoint.
        let d = distance_to_polyline_m(41.9400, -87.6450, &street).unwrap();
        let expected = haversine_m(41.9400, -87.6450, 41.9400, -87.6500);
        assert!((d - expected).abs() < 1.0);
    }

    #[test]
    fn empty_polyline_has_no_distance() {
        assert!(distance_to_polyline_m(41.9, -87.6, &[]).is_none());
    }

    #[test]
    fn point_in_polygon_square() {
        let square = [
            (41.9400, -87.6600),
            (41.9400, -87.6500),
            (41.9500, -87.6500),
            (41.9500, -87.6600),
        ];
        assert!(point_in_polygon(41.9450, -87.6550, &square));
        assert!(!point_in_polygon(41.9550, -87.6550, &square));
        assert!(!point_in_polygon(41.9450, -87.6450, &square));
    }

    #[test]
    fn degenerate_polygon_contains_nothing() {
        assert!(!point_in_polygon(41.9, -87.6, &[(41.9, -87.6), (41.91, -87.6)]));
    }
}
