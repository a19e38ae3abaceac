use std::f64::consts::FRAC_PI_2;

/// Spherical earth radius used by Web-Mercator (EPSG:3857), metres.
const EARTH_RADIUS_M: f64 = 6378137.0;

/// Half the projected world width, metres. Coordinates beyond this are
/// not valid Mercator points.
const MAX_EXTENT_M: f64 = 20037508.342789244;

fn within_geographic_envelope(x: f64, y: f64) -> bool {
    x.abs() <= 180.0 && y.abs() <= 90.0
}

fn within_mercator_envelope(x: f64, y: f64) -> bool {
    x.abs() <= MAX_EXTENT_M && y.abs() <= MAX_EXTENT_M
}

/// Converts one coordinate pair to lon/lat degrees.
///
/// Pairs already inside the geographic envelope are passed through
/// untouched, pairs inside the Mercator extent are unprojected, and
/// anything beyond both envelopes is dropped.
pub fn to_wgs84(x: f64, y: f64) -> Option<[f64; 2]> {
    if within_geographic_envelope(x, y) {
        return Some([x, y]);
    }
    if !within_mercator_envelope(x, y) {
        return None;
    }

    let lon_raw = (x / EARTH_RADIUS_M).to_degrees();
    let lon = lon_raw - ((lon_raw + 180.0) / 360.0).floor() * 360.0;
    let lat = (2.0 * (y / EARTH_RADIUS_M).exp().atan() - FRAC_PI_2).to_degrees();
    Some([lon, lat])
}
