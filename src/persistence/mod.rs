//! Persistence layer: the nest store and the spawnpoint store.
//!
//! [`NestStore`] is the durable home of nests and their last nesting
//! decision; the concrete implementation uses `sqlx::PgPool`.
//! [`PointStore`] counts spawnpoints inside a geometry and is only
//! consulted while filtering nests at load time.

pub mod golbat;
#[cfg(test)]
pub(crate) mod memory;
pub mod models;
pub mod postgres;

use std::collections::HashMap;
use std::fmt::Debug;
use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use futures_util::stream::{self, Stream, TryStreamExt};
use tokio_util::sync::CancellationToken;

use crate::config::AppConfig;
use crate::domain::{NestGeometry, NestId};
use crate::error::NestError;
pub use models::{NestPartialUpdate, StoredNest};
use golbat::GolbatPointStore;
use postgres::PostgresNestStore;

/// Rows per page when scanning the store.
pub const PAGE_SIZE: usize = 1000;

/// Ids per query when fetching rows by id.
pub const ID_BATCH_SIZE: usize = 500;

/// Durable storage of nests.
#[async_trait]
pub trait NestStore: Send + Sync + Debug {
    /// Inserts a nest, or updates name, geometry, area and position of an
    /// existing one. Nesting species fields of an existing row are kept.
    ///
    /// # Errors
    ///
    /// Returns [`NestError::StoreUnavailable`] on database failure.
    async fn insert_or_update_nest(&self, nest: &StoredNest) -> Result<(), NestError>;

    /// Writes the set columns of `update`. An empty update is a no-op.
    ///
    /// # Errors
    ///
    /// Returns [`NestError::StoreUnavailable`] on database failure.
    async fn update_nest_partial(
        &self,
        id: NestId,
        update: &NestPartialUpdate,
    ) -> Result<(), NestError>;

    /// One nest with its geometry.
    ///
    /// # Errors
    ///
    /// Returns [`NestError::StoreUnavailable`] on database failure.
    async fn get_nest_by_id(&self, id: NestId) -> Result<Option<StoredNest>, NestError>;

    /// Every nest with its geometry, ordered by id.
    ///
    /// # Errors
    ///
    /// Returns [`NestError::StoreUnavailable`] on database failure.
    async fn get_all_nests(&self) -> Result<Vec<StoredNest>, NestError>;

    /// Active nests with their geometry, ordered by id.
    ///
    /// # Errors
    ///
    /// Returns [`NestError::StoreUnavailable`] on database failure.
    async fn get_active_nests(&self) -> Result<Vec<StoredNest>, NestError>;

    /// Inactive nests with their geometry, ordered by id.
    ///
    /// # Errors
    ///
    /// Returns [`NestError::StoreUnavailable`] on database failure.
    async fn get_inactive_nests(&self) -> Result<Vec<StoredNest>, NestError>;

    /// Distinct non-null area names, sorted.
    ///
    /// # Errors
    ///
    /// Returns [`NestError::StoreUnavailable`] on database failure.
    async fn get_nest_areas(&self) -> Result<Vec<String>, NestError>;

    /// Rows for `ids` without their geometry. Missing ids are absent from
    /// the map.
    ///
    /// # Errors
    ///
    /// Returns [`NestError::StoreUnavailable`] on database failure.
    async fn get_nests_without_polygon(
        &self,
        ids: &[NestId],
    ) -> Result<HashMap<NestId, StoredNest>, NestError>;

    /// Up to `limit` rows with id greater than `after`, ordered by id.
    ///
    /// # Errors
    ///
    /// Returns [`NestError::StoreUnavailable`] on database failure.
    async fn get_nests_page(
        &self,
        after: Option<NestId>,
        limit: usize,
        include_polygon: bool,
    ) -> Result<Vec<StoredNest>, NestError>;
}

/// Counts spawnpoints contained in a geometry.
#[async_trait]
pub trait PointStore: Send + Sync + Debug {
    /// Number of recently seen spawnpoints inside `geometry`.
    ///
    /// # Errors
    ///
    /// Returns [`NestError::StoreUnavailable`] on database failure.
    async fn count_points_contained(&self, geometry: &NestGeometry) -> Result<i64, NestError>;
}

/// Streams every row ordered by id, one page of [`PAGE_SIZE`] at a time.
///
/// A short page ends the stream; a failed page ends it with the error.
pub fn stream_nests(
    store: &dyn NestStore,
    include_polygon: bool,
) -> impl Stream<Item = Result<StoredNest, NestError>> + Send + '_ {
    // `Some(cursor)` while pages remain; `None` once a short page was seen.
    stream::try_unfold(Some(None::<NestId>), move |cursor| async move {
        let Some(after) = cursor else {
            return Ok::<_, NestError>(None);
        };
        let page = store
            .get_nests_page(after, PAGE_SIZE, include_polygon)
            .await?;
        let next = if page.len() < PAGE_SIZE {
            None
        } else {
            page.last().map(|row| Some(row.id()))
        };
        Ok(Some((
            stream::iter(page.into_iter().map(Ok::<_, NestError>)),
            next,
        )))
    })
    .try_flatten()
}

/// Runs `f` over every row with up to `concurrency` calls in flight.
///
/// The first error from the scan or from `f` stops the iteration.
///
/// # Errors
///
/// Returns the first error raised, or [`NestError::Cancelled`] when
/// `cancel` fires first.
pub async fn iterate_nests_concurrently<F, Fut>(
    store: &dyn NestStore,
    concurrency: usize,
    include_polygon: bool,
    cancel: &CancellationToken,
    f: F,
) -> Result<(), NestError>
where
    F: FnMut(StoredNest) -> Fut + Send,
    Fut: Future<Output = Result<(), NestError>> + Send,
{
    let work = stream_nests(store, include_polygon).try_for_each_concurrent(concurrency.max(1), f);
    tokio::select! {
        () = cancel.cancelled() => Err(NestError::Cancelled),
        result = work => result,
    }
}

/// Stores built from the configuration.
#[derive(Debug, Clone)]
pub struct Stores {
    /// The nest store.
    pub nests: Arc<dyn NestStore>,
    /// The spawnpoint store, when `[golbat_db]` is configured.
    pub points: Option<Arc<dyn PointStore>>,
}

/// Connects to the nest store and, when configured, the spawnpoint store.
/// With `migrate` the nest schema is brought up to date first.
///
/// # Errors
///
/// Returns [`NestError::StoreUnavailable`] if a connection or migration
/// fails.
pub async fn connect(config: &AppConfig, migrate: bool) -> Result<Stores, NestError> {
    let nests = PostgresNestStore::connect(&config.nests_db).await?;
    if migrate {
        nests.migrate().await?;
    }
    tracing::info!("connected to nests db");

    let points = match &config.golbat_db {
        Some(golbat) => {
            let store = GolbatPointStore::connect(golbat).await?;
            tracing::info!("connected to golbat db");
            Some(Arc::new(store) as Arc<dyn PointStore>)
        }
        None => {
            tracing::info!("no golbat db configured, spawnpoint counts are not refreshed");
            None
        }
    };

    Ok(Stores {
        nests: Arc::new(nests),
        points,
    })
}
