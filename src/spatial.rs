//! Spatial helpers: geodesic distance and nearest-candidate selection
//!
//! Uses the Haversine formula for distances on Earth's surface; all
//! distances are meters.

use geo::{HaversineDistance, Point};

use crate::error::Error;
use crate::models::Route;

/// Candidate set for a nearest-match search
///
/// Replaces ad-hoc keyword dispatch: the caller states whether to search
/// the whole collection, an explicit list, or one route's entities.
#[derive(Debug)]
pub enum Candidates<'a, T> {
    /// Every entity of the type, fetched from the backend
    All,
    /// An explicit, caller-supplied candidate list
    Among(&'a [T]),
    /// Only the entities belonging to the given route
    OnRoute(&'a Route),
}

/// Haversine distance between two points in meters
pub(crate) fn haversine_distance(a: Point<f64>, b: Point<f64>) -> f64 {
    a.haversine_distance(&b)
}

/// Parse decimal-degree strings into a point (x = longitude, y =
/// latitude)
///
/// The backend ships coordinates as strings; they are coerced here, on
/// demand, never during record mapping.
pub(crate) fn parse_coords(lat: &str, long: &str) -> Result<Point<f64>, Error> {
    let latitude: f64 = lat
        .trim()
        .parse()
        .map_err(|_| Error::InvalidCoordinates(format!("latitude {lat:?}")))?;
    let longitude: f64 = long
        .trim()
        .parse()
        .map_err(|_| Error::InvalidCoordinates(format!("longitude {long:?}")))?;
    Ok(Point::new(longitude, latitude))
}

/// Select the candidate nearest to `target`, returning it with the
/// distance in meters
///
/// Ties keep the first-encountered minimum, so the result is stable
/// under the candidate order. An empty candidate set is an explicit
/// [`Error::EmptyCandidates`], never an index fault.
pub(crate) fn nearest_by<T>(
    mut candidates: Vec<T>,
    target: Point<f64>,
    position: impl Fn(&T) -> Result<Point<f64>, Error>,
) -> Result<(T, f64), Error> {
    if candidates.is_empty() {
        return Err(Error::EmptyCandidates);
    }

    let mut best_index = 0;
    let mut best_distance = haversine_distance(position(&candidates[0])?, target);
    for (index, candidate) in candidates.iter().enumerate().skip(1) {
        let distance = haversine_distance(position(candidate)?, target);
        if distance < best_distance {
            best_index = index;
            best_distance = distance;
        }
    }

    Ok((candidates.swap_remove(best_index), best_distance))
}
