//! Search areas, approximate distances and compass bearings.

use geo::{Contains, HaversineBearing, HaversineDistance, Point, Polygon, Rect, coord};

use crate::error::{NearbyError, Result};

const METERS_PER_DEGREE_LAT: f64 = 111_320.0;

/// A bounding box plus the midpoint distances are measured from.
#[derive(Debug, Clone, PartialEq)]
pub struct SearchArea {
    pub sw_lat: f64,
    pub sw_lon: f64,
    pub ne_lat: f64,
    pub ne_lon: f64,
    pub mid_lat: f64,
    pub mid_lon: f64,
}

impl SearchArea {
    /// A box between two corners. The midpoint defaults to the box center
    /// unless `point` names the user's position.
    pub fn from_bbox(
        sw_lat: f64,
        sw_lon: f64,
        ne_lat: f64,
        ne_lon: f64,
        point: Option<(f64, f64)>,
    ) -> Result<Self> {
        check_coordinate(sw_lat, sw_lon)?;
        check_coordinate(ne_lat, ne_lon)?;
        if sw_lat >= ne_lat || sw_lon >= ne_lon {
            return Err(NearbyError::InvalidInput(format!(
                "bounding box corners are inverted: sw=({sw_lat},{sw_lon}) ne=({ne_lat},{ne_lon})"
            )));
        }

        let (mid_lat, mid_lon) = match point {
            Some((lat, lon)) => {
                check_coordinate(lat, lon)?;
                (lat, lon)
            }
            None => ((sw_lat + ne_lat) / 2.0, (sw_lon + ne_lon) / 2.0),
        };

        Ok(Self {
            sw_lat,
            sw_lon,
            ne_lat,
            ne_lon,
            mid_lat,
            mid_lon,
        })
    }

    /// A box circumscribing the circle of `radius_m` around a point.
    pub fn from_point_radius(lat: f64, lon: f64, radius_m: f64) -> Result<Self> {
        check_coordinate(lat, lon)?;
        if !(radius_m.is_finite() && radius_m > 0.0) {
            return Err(NearbyError::InvalidInput(format!("invalid radius {radius_m}")));
        }

        let dlat = radius_m / METERS_PER_DEGREE_LAT;
        let dlon = radius_m / (METERS_PER_DEGREE_LAT * lat.to_radians().cos().max(0.01));

        Self::from_bbox(
            (lat - dlat).max(-90.0),
            (lon - dlon).max(-180.0),
            (lat + dlat).min(90.0),
            (lon + dlon).min(180.0),
            Some((lat, lon)),
        )
    }

    pub fn polygon(&self) -> Polygon<f64> {
        Rect::new(
            coord! { x: self.sw_lon, y: self.sw_lat },
            coord! { x: self.ne_lon, y: self.ne_lat },
        )
        .to_polygon()
    }

    pub fn midpoint(&self) -> Point<f64> {
        Point::new(self.mid_lon, self.mid_lat)
    }

    pub fn contains(&self, lat: f64, lon: f64) -> bool {
        self.polygon().contains(&Point::new(lon, lat))
    }

    /// Meters from the midpoint.
    pub fn distance_to(&self, lat: f64, lon: f64) -> f64 {
        self.midpoint().haversine_distance(&Point::new(lon, lat))
    }

    /// Closed ring over the box, in the `lat lon` order the store expects.
    pub fn line_string(&self) -> String {
        format!(
            "LINESTRING({:.6} {:.6}, {:.6} {:.6}, {:.6} {:.6}, {:.6} {:.6}, {:.6} {:.6})",
            self.sw_lat,
            self.sw_lon,
            self.sw_lat,
            self.ne_lon,
            self.ne_lat,
            self.ne_lon,
            self.ne_lat,
            self.sw_lon,
            self.sw_lat,
            self.sw_lon,
        )
    }

    pub fn point_string(&self) -> String {
        format!("POINT({:.6} {:.6})", self.mid_lat, self.mid_lon)
    }
}

/// Initial bearing in degrees from one coordinate to another.
pub fn compass_dir(lat: f64, lon: f64, next_lat: f64, next_lon: f64) -> f64 {
    Point::new(lon, lat).haversine_bearing(Point::new(next_lon, next_lat))
}

fn check_coordinate(lat: f64, lon: f64) -> Result<()> {
    if !(-90.0..=90.0).contains(&lat) || !(-180.0..=180.0).contains(&lon) {
        return Err(NearbyError::InvalidInput(format!(
            "coordinate out of range: ({lat},{lon})"
        )));
    }
    Ok(())
}
