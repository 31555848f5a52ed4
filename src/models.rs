//! Inthegra entities: routes, stops and buses
//!
//! Typed views over the `/linhas`, `/paradas` and `/veiculos`
//! collections, plus the cross-entity helpers the backend does not
//! provide natively: a route's stop and vehicle lists, the routes
//! serving a stop, nearest-stop and nearest-bus search, and route
//! tracing between two arbitrary points.
//!
//! Entity identity is the backend code: two instances of the same type
//! compare equal exactly when their codes match, whatever the other
//! fields hold.

use std::fmt;
use std::sync::OnceLock;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use crate::cache::{CacheKey, CachePolicy};
use crate::client::InthegraClient;
use crate::error::Error;
use crate::resource::Resource;
use crate::spatial::{Candidates, nearest_by, parse_coords};

/// Validity window for live vehicle data (route bus lists, positions)
const LIVE_DATA_TTL: Duration = Duration::from_secs(30);

/// A bus route
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Route {
    /// Route code, e.g. `0401`
    #[serde(rename = "CodigoLinha")]
    pub code: String,
    /// Human description, e.g. `UNIVERSIDADE`
    #[serde(rename = "Denomicao")]
    pub description: String,
    /// Name of the source terminus
    #[serde(rename = "Origem")]
    pub source: String,
    /// Name of the destination/return terminus
    #[serde(rename = "Retorno")]
    pub destination: String,
    /// Whether the route loops back to its source
    #[serde(rename = "Circular")]
    pub circular: bool,
}

impl PartialEq for Route {
    fn eq(&self, other: &Self) -> bool {
        self.code == other.code
    }
}

impl Eq for Route {}

impl fmt::Display for Route {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.code, self.description)
    }
}

#[async_trait]
impl Resource for Route {
    const ENDPOINT: &'static str = "/linhas";

    fn key(&self) -> String {
        self.code.clone()
    }
}

impl Route {
    /// The ordered stop sequence of this route, from `/paradasLinha`
    ///
    /// Permanently cached per route code: stop assignments change
    /// rarely, and the serving-routes scan of [`Stop::routes`] reads
    /// every route's list.
    pub async fn stops(&self, client: &InthegraClient) -> Result<Vec<Stop>, Error> {
        client
            .cache()
            .get_or_compute(
                CacheKey::new("stops", &self.code),
                CachePolicy::Permanent,
                async {
                    let payload = client
                        .get("/paradasLinha", &[("busca", self.code.clone())])
                        .await?;
                    if is_unknown_collection(&payload) {
                        return Ok(Vec::new());
                    }
                    let raw: RawRouteStops = serde_json::from_value(payload)
                        .map_err(|e| Error::ParseError(e.to_string()))?;
                    Ok(raw.stops)
                },
            )
            .await
    }

    /// The buses currently operating on this route, from
    /// `/veiculosLinha`
    ///
    /// Cached for 30 seconds per route code. Each returned bus carries
    /// this route as its resolved owner.
    pub async fn buses(&self, client: &InthegraClient) -> Result<Vec<Bus>, Error> {
        let mut buses = client
            .cache()
            .get_or_compute(
                CacheKey::new("buses", &self.code),
                CachePolicy::TimeToLive(LIVE_DATA_TTL),
                async {
                    let payload = client
                        .get("/veiculosLinha", &[("busca", self.code.clone())])
                        .await?;
                    if is_unknown_collection(&payload) {
                        return Ok(Vec::new());
                    }
                    let raw: RawGroupedBuses = serde_json::from_value(payload)
                        .map_err(|e| Error::ParseError(e.to_string()))?;
                    Ok(raw.line.buses)
                },
            )
            .await?;

        for bus in &mut buses {
            bus.adopt(self);
        }
        Ok(buses)
    }

    /// Look up the route whose code matches `code` exactly
    ///
    /// Goes through the backend's fuzzy search and scans the results: a
    /// numeric query matches result codes numerically (so leading zeros
    /// do not matter), falling back to a four-digit zero-padded string
    /// comparison for codes that are not numeric; a text query matches
    /// literally.
    ///
    /// # Errors
    ///
    /// [`Error::RouteNotFound`] if no search result matches exactly.
    pub async fn find(
        client: &InthegraClient,
        code: impl Into<RouteCode> + Send,
    ) -> Result<Self, Error> {
        let wanted = code.into();
        let results = Self::search(client, &wanted.to_string()).await?;
        results
            .into_iter()
            .find(|route| wanted.matches(&route.code))
            .ok_or_else(|| Error::RouteNotFound {
                code: wanted.to_string(),
            })
    }

    /// Trace a route between two points
    ///
    /// Finds the stops nearest to `source` and `dest` and looks for a
    /// route serving both. Without one, every route of either endpoint
    /// stop is evaluated by how close it comes to the opposite point,
    /// and the best imperfect match wins; the returned stops are then
    /// recomputed against the winning route, so they always lie on it.
    /// Whether a single transfer-free ride is acceptable is the
    /// caller's judgment.
    ///
    /// `source` and `dest` are `(latitude, longitude)` pairs in decimal
    /// degrees.
    pub async fn trace(
        client: &InthegraClient,
        source: (f64, f64),
        dest: (f64, f64),
    ) -> Result<Trace, Error> {
        let (source_stop, source_distance) =
            Stop::nearest(client, source.0, source.1, Candidates::All).await?;
        let (dest_stop, dest_distance) =
            Stop::nearest(client, dest.0, dest.1, Candidates::All).await?;

        let source_routes = source_stop.routes(client).await?;
        let dest_routes = dest_stop.routes(client).await?;

        for route in &source_routes {
            if dest_routes.contains(route) {
                debug!(route = %route.code, "direct route found");
                return Ok(Trace {
                    source_stop,
                    source_distance,
                    dest_stop,
                    dest_distance,
                    route: route.clone(),
                });
            }
        }

        // No shared route: rate each candidate route by the nearest its
        // stops come to the opposite endpoint, keep the global minimum.
        debug!(
            source_routes = source_routes.len(),
            dest_routes = dest_routes.len(),
            "no shared route, evaluating candidates"
        );
        let mut best: Option<(f64, Route)> = None;
        for route in &dest_routes {
            let (_, distance) =
                Stop::nearest(client, source.0, source.1, Candidates::OnRoute(route)).await?;
            if best.as_ref().is_none_or(|(d, _)| distance < *d) {
                best = Some((distance, route.clone()));
            }
        }
        for route in &source_routes {
            let (_, distance) =
                Stop::nearest(client, dest.0, dest.1, Candidates::OnRoute(route)).await?;
            if best.as_ref().is_none_or(|(d, _)| distance < *d) {
                best = Some((distance, route.clone()));
            }
        }
        let (_, route) = best.ok_or(Error::EmptyCandidates)?;

        let (source_stop, source_distance) =
            Stop::nearest(client, source.0, source.1, Candidates::OnRoute(&route)).await?;
        let (dest_stop, dest_distance) =
            Stop::nearest(client, dest.0, dest.1, Candidates::OnRoute(&route)).await?;

        Ok(Trace {
            source_stop,
            source_distance,
            dest_stop,
            dest_distance,
            route,
        })
    }
}

/// Result of [`Route::trace`]
#[derive(Debug, Clone)]
pub struct Trace {
    /// Boarding stop, guaranteed to lie on `route`
    pub source_stop: Stop,
    /// Meters from the source point to `source_stop`
    pub source_distance: f64,
    /// Alighting stop, guaranteed to lie on `route`
    pub dest_stop: Stop,
    /// Meters from the destination point to `dest_stop`
    pub dest_distance: f64,
    /// The recommended route
    pub route: Route,
}

/// Exact-match query for [`Route::find`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RouteCode {
    /// Compare numerically, tolerating leading zeros
    Numeric(u32),
    /// Compare literally
    Text(String),
}

impl RouteCode {
    /// Whether a result code matches this query exactly
    fn matches(&self, code: &str) -> bool {
        match self {
            Self::Numeric(wanted) => match code.parse::<u32>() {
                Ok(numeric) => numeric == *wanted,
                // Codes like `T0401` never parse; compare against the
                // zero-padded rendering instead.
                Err(_) => code == format!("{wanted:04}"),
            },
            Self::Text(wanted) => code == wanted,
        }
    }
}

impl From<u32> for RouteCode {
    fn from(code: u32) -> Self {
        Self::Numeric(code)
    }
}

impl From<&str> for RouteCode {
    fn from(code: &str) -> Self {
        Self::Text(code.to_string())
    }
}

impl From<String> for RouteCode {
    fn from(code: String) -> Self {
        Self::Text(code)
    }
}

impl fmt::Display for RouteCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Numeric(code) => write!(f, "{code}"),
            Self::Text(code) => f.write_str(code),
        }
    }
}

/// A bus stop
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Stop {
    /// Stop code
    #[serde(rename = "CodigoParada")]
    pub code: u32,
    /// Human description
    #[serde(rename = "Denomicao")]
    pub description: String,
    /// Street address
    #[serde(rename = "Endereco")]
    pub address: String,
    /// Latitude in decimal degrees, as shipped by the backend
    #[serde(rename = "Lat")]
    pub lat: String,
    /// Longitude in decimal degrees, as shipped by the backend
    #[serde(rename = "Long")]
    pub long: String,
}

impl PartialEq for Stop {
    fn eq(&self, other: &Self) -> bool {
        self.code == other.code
    }
}

impl Eq for Stop {}

impl fmt::Display for Stop {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.code, self.description)
    }
}

#[async_trait]
impl Resource for Stop {
    const ENDPOINT: &'static str = "/paradas";

    fn key(&self) -> String {
        self.code.to_string()
    }
}

impl Stop {
    /// This stop's coordinates parsed as a point
    pub fn coords(&self) -> Result<geo::Point<f64>, Error> {
        parse_coords(&self.lat, &self.long)
    }

    /// Every route whose stop list contains this stop
    ///
    /// There is no backend endpoint for this: the full route collection
    /// is scanned, reading each route's stop list. Expensive on a cold
    /// cache; permanently cached per stop code afterwards, and the
    /// per-route stop lists it reads are cached too.
    pub async fn routes(&self, client: &InthegraClient) -> Result<Vec<Route>, Error> {
        client
            .cache()
            .get_or_compute(
                CacheKey::new("routes", self.code.to_string()),
                CachePolicy::Permanent,
                async {
                    let mut serving = Vec::new();
                    for route in Route::all(client).await? {
                        let stops = route.stops(client).await?;
                        if stops.iter().any(|stop| stop == self) {
                            serving.push(route);
                        }
                    }
                    Ok(serving)
                },
            )
            .await
    }

    /// The stop nearest to `(lat, long)` among `candidates`, with the
    /// distance in meters
    ///
    /// # Errors
    ///
    /// [`Error::EmptyCandidates`] when the candidate set is empty.
    pub async fn nearest(
        client: &InthegraClient,
        lat: f64,
        long: f64,
        candidates: Candidates<'_, Self>,
    ) -> Result<(Self, f64), Error> {
        let stops = match candidates {
            Candidates::All => Self::all(client).await?,
            Candidates::Among(list) => list.to_vec(),
            Candidates::OnRoute(route) => route.stops(client).await?,
        };
        let target = geo::Point::new(long, lat);
        nearest_by(stops, target, Self::coords)
    }
}

/// A bus
///
/// The coordinates set at construction are a snapshot for in-memory
/// nearest-neighbor comparisons; the live, time-sensitive position is
/// behind [`position`](Self::position).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Bus {
    /// Vehicle code, e.g. `02521`
    #[serde(rename = "CodigoVeiculo")]
    pub code: String,
    /// Timestamp of the last position update
    #[serde(rename = "Hora")]
    pub last_update: String,
    #[serde(rename = "Lat")]
    lat: String,
    #[serde(rename = "Long")]
    long: String,
    #[serde(skip)]
    route_code: Option<String>,
    #[serde(skip)]
    route: OnceLock<Route>,
}

impl PartialEq for Bus {
    fn eq(&self, other: &Self) -> bool {
        self.code == other.code
    }
}

impl Eq for Bus {}

impl fmt::Display for Bus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.code)
    }
}

#[async_trait]
impl Resource for Bus {
    const ENDPOINT: &'static str = "/veiculos";

    fn key(&self) -> String {
        self.code.clone()
    }

    /// Fetch every bus in service
    ///
    /// The backend returns the fleet grouped by route; the grouping is
    /// flattened here, each bus keeping its owning-route code for lazy
    /// resolution.
    async fn all(client: &InthegraClient) -> Result<Vec<Self>, Error> {
        let payload = client.get(Self::ENDPOINT, &[]).await?;
        let groups: Vec<RawGroupedBuses> =
            serde_json::from_value(payload).map_err(|e| Error::ParseError(e.to_string()))?;

        let mut buses = Vec::new();
        for group in groups {
            for mut bus in group.line.buses {
                bus.route_code.clone_from(&group.line.code);
                buses.push(bus);
            }
        }
        Ok(buses)
    }

    /// Server-side search is not available for buses
    async fn search(_client: &InthegraClient, _pattern: &str) -> Result<Vec<Self>, Error> {
        Err(Error::SearchUnsupported {
            endpoint: Self::ENDPOINT,
        })
    }

    /// Like the default refresh, but keeps the resolved-route memo;
    /// only the mapped fields are replaced.
    async fn refresh(&mut self, client: &InthegraClient) -> Result<(), Error> {
        let fleet = Self::all(client).await?;
        let fresh = fleet
            .into_iter()
            .find(|other| other.code == self.code)
            .ok_or_else(|| Error::RecordNotFound {
                endpoint: Self::ENDPOINT,
                code: self.code.clone(),
            })?;

        self.last_update = fresh.last_update;
        self.lat = fresh.lat;
        self.long = fresh.long;
        if fresh.route_code.is_some() {
            self.route_code = fresh.route_code;
        }
        Ok(())
    }
}

impl Bus {
    /// Attach `route` as this bus's resolved owner
    fn adopt(&mut self, route: &Route) {
        self.route_code = Some(route.code.clone());
        let _ = self.route.set(route.clone());
    }

    /// Snapshot coordinates for distance comparisons; never touches the
    /// network
    fn snapshot_coords(&self) -> Result<geo::Point<f64>, Error> {
        parse_coords(&self.lat, &self.long)
    }

    /// The route this bus operates on
    ///
    /// Buses obtained through [`Route::buses`] carry their route
    /// eagerly; buses from the flat listing resolve it here once, from
    /// the route code, and keep it for the object's lifetime.
    pub async fn route(&self, client: &InthegraClient) -> Result<Route, Error> {
        if let Some(route) = self.route.get() {
            return Ok(route.clone());
        }
        let code = self
            .route_code
            .as_deref()
            .ok_or_else(|| Error::RecordNotFound {
                endpoint: Self::ENDPOINT,
                code: self.code.clone(),
            })?;
        let route = Route::find(client, code).await?;
        Ok(self.route.get_or_init(|| route).clone())
    }

    /// The bus's live position as `(latitude, longitude)` decimal-degree
    /// strings
    ///
    /// Positions go stale quickly, so this re-fetches the fleet listing
    /// instead of answering from the construction-time snapshot; the
    /// result is cached for 30 seconds per bus code.
    ///
    /// # Errors
    ///
    /// [`Error::RecordNotFound`] when the bus is no longer in the
    /// listing.
    pub async fn position(&self, client: &InthegraClient) -> Result<(String, String), Error> {
        client
            .cache()
            .get_or_compute(
                CacheKey::new("position", &self.code),
                CachePolicy::TimeToLive(LIVE_DATA_TTL),
                async {
                    let fleet = Self::all(client).await?;
                    let fresh = fleet
                        .into_iter()
                        .find(|bus| bus.code == self.code)
                        .ok_or_else(|| Error::RecordNotFound {
                            endpoint: Self::ENDPOINT,
                            code: self.code.clone(),
                        })?;
                    Ok((fresh.lat, fresh.long))
                },
            )
            .await
    }

    /// The bus nearest to `(lat, long)` among `candidates`, with the
    /// distance in meters
    ///
    /// Distances use the construction-time coordinate snapshots, so a
    /// bulk search never issues one position fetch per candidate.
    ///
    /// # Errors
    ///
    /// [`Error::EmptyCandidates`] when the candidate set is empty.
    pub async fn nearest(
        client: &InthegraClient,
        lat: f64,
        long: f64,
        candidates: Candidates<'_, Self>,
    ) -> Result<(Self, f64), Error> {
        let buses = match candidates {
            Candidates::All => Self::all(client).await?,
            Candidates::Among(list) => list.to_vec(),
            Candidates::OnRoute(route) => route.buses(client).await?,
        };
        let target = geo::Point::new(long, lat);
        nearest_by(buses, target, Self::snapshot_coords)
    }
}

/// `{"code": 130}` is the backend's way of answering "nothing
/// registered" on the per-route sub-endpoints; map it to an empty
/// collection instead of a mapping failure.
fn is_unknown_collection(payload: &Value) -> bool {
    payload.get("code").and_then(Value::as_i64) == Some(130)
}

#[derive(Debug, Deserialize)]
struct RawRouteStops {
    #[serde(rename = "Paradas")]
    stops: Vec<Stop>,
}

#[derive(Debug, Deserialize)]
struct RawGroupedBuses {
    #[serde(rename = "Linha")]
    line: RawLineBuses,
}

#[derive(Debug, Deserialize)]
struct RawLineBuses {
    #[serde(rename = "CodigoLinha", default)]
    code: Option<String>,
    #[serde(rename = "Veiculos")]
    buses: Vec<Bus>,
}
