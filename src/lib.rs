//! Client for the Inthegra API, the public transit service of Strans
//! (Teresina, Brazil)
//!
//! Exposes the backend's routes, stops and buses as typed entities and
//! adds the cross-entity features the API does not provide natively:
//! nearest-stop and nearest-bus search, the set of routes serving a
//! stop, and tracing a route between two arbitrary points.
//!
//! # Architecture
//!
//! [`InthegraClient`] is the authenticated HTTP gateway (token signin,
//! lazy authentication, one automatic retry on token expiry). Entity
//! types implement [`Resource`] for the collection-level operations
//! (`all`, `search`, `filter`, `refresh`) and add their own derived
//! lookups, which consult the client's [`EntityCache`] before going
//! back to the network.
//!
//! # Example
//!
//! ```rust,ignore
//! use inthegra::{Candidates, InthegraClient, InthegraConfig, Resource, Route, Stop};
//!
//! let config = InthegraConfig {
//!     api_key: "...".into(),
//!     email: "...".into(),
//!     password: "...".into(),
//!     ..InthegraConfig::default()
//! };
//! let client = InthegraClient::new(&config)?;
//!
//! // The route 0401 and the buses currently running on it.
//! let route = Route::find(&client, 401).await?;
//! let buses = route.buses(&client).await?;
//!
//! // The stop nearest to the UFPI campus.
//! let (stop, meters) =
//!     Stop::nearest(&client, -5.056221, -42.790308, Candidates::All).await?;
//!
//! // A single-ride recommendation between two points.
//! let trace = Route::trace(
//!     &client,
//!     (-5.089, -42.801),
//!     (-5.056, -42.790),
//! ).await?;
//! println!("take {} from {} to {}", trace.route, trace.source_stop, trace.dest_stop);
//! ```

mod cache;
mod client;
mod config;
mod error;
mod models;
mod resource;
mod spatial;

pub use cache::{CacheKey, CachePolicy, EntityCache};
pub use client::InthegraClient;
pub use config::InthegraConfig;
pub use error::Error;
pub use models::{Bus, Route, RouteCode, Stop, Trace};
pub use resource::Resource;
pub use spatial::Candidates;
