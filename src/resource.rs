//! Collection-level operations shared by all entity types
//!
//! Each entity type maps one backend collection endpoint. The field
//! translation itself (Portuguese CamelCase keys to Rust attributes)
//! lives in `#[serde(rename)]` attributes on the entity structs, so a
//! record missing a mapped field fails the whole fetch with a
//! descriptive [`Error::ParseError`] instead of producing a half-mapped
//! entity.

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::client::InthegraClient;
use crate::error::Error;

/// A typed view over one Inthegra collection endpoint
#[async_trait]
pub trait Resource: DeserializeOwned + Clone + Send + Sync + Sized + 'static {
    /// Collection endpoint path, e.g. `/linhas`
    const ENDPOINT: &'static str;

    /// The entity code rendered as a string
    ///
    /// Codes are the sole basis of entity identity: equality, cache
    /// keys and refresh matching all go through them.
    fn key(&self) -> String;

    /// Map a decoded collection payload into entities
    fn from_records(records: Value) -> Result<Vec<Self>, Error> {
        serde_json::from_value(records).map_err(|e| Error::ParseError(e.to_string()))
    }

    /// Fetch the full unfiltered collection
    async fn all(client: &InthegraClient) -> Result<Vec<Self>, Error> {
        let records = client.get(Self::ENDPOINT, &[]).await?;
        Self::from_records(records)
    }

    /// Fetch the collection filtered server-side by a free-text pattern
    ///
    /// The backend's search is substring/fuzzy; expect multiple results
    /// even for an exact code.
    async fn search(client: &InthegraClient, pattern: &str) -> Result<Vec<Self>, Error> {
        let records = client
            .get(Self::ENDPOINT, &[("busca", pattern.to_string())])
            .await?;
        Self::from_records(records)
    }

    /// Client-side filter over [`all`](Self::all)
    async fn filter<F>(client: &InthegraClient, predicate: F) -> Result<Vec<Self>, Error>
    where
        F: Fn(&Self) -> bool + Send,
    {
        let mut entities = Self::all(client).await?;
        entities.retain(|entity| predicate(entity));
        Ok(entities)
    }

    /// Re-fetch the collection and replace this entity's state with the
    /// record sharing its code
    ///
    /// # Errors
    ///
    /// [`Error::RecordNotFound`] when the collection no longer contains
    /// the code; the entity keeps its previous state in that case.
    async fn refresh(&mut self, client: &InthegraClient) -> Result<(), Error> {
        let collection = Self::all(client).await?;
        let fresh = collection
            .into_iter()
            .find(|other| other.key() == self.key())
            .ok_or_else(|| Error::RecordNotFound {
                endpoint: Self::ENDPOINT,
                code: self.key(),
            })?;
        *self = fresh;
        Ok(())
    }
}
