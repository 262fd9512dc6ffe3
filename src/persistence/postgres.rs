//! PostgreSQL implementation of the nest store.

use std::collections::HashMap;

use async_trait::async_trait;
use sqlx::postgres::{PgConnectOptions, PgPoolOptions};
use sqlx::{PgPool, Postgres, QueryBuilder};

use super::{ID_BATCH_SIZE, NestPartialUpdate, NestStore, StoredNest};
use crate::config::DbConfig;
use crate::domain::NestId;
use crate::error::NestError;

const COLUMNS: &str = "nest_id, lat, lon, name, polygon, area_name, spawnpoints, m2, active, \
     pokemon_id, pokemon_form, pokemon_avg, pokemon_ratio, pokemon_count, discarded, updated";

const COLUMNS_WITHOUT_POLYGON: &str = "nest_id, lat, lon, name, NULL::TEXT AS polygon, area_name, \
     spawnpoints, m2, active, pokemon_id, pokemon_form, pokemon_avg, pokemon_ratio, pokemon_count, \
     discarded, updated";

/// Nest store backed by `sqlx::PgPool`.
#[derive(Debug, Clone)]
pub struct PostgresNestStore {
    pool: PgPool,
}

impl PostgresNestStore {
    /// Wraps an existing connection pool.
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Connects using `config.url` when set, otherwise the individual
    /// connection fields.
    ///
    /// # Errors
    ///
    /// Returns [`NestError::StoreUnavailable`] if the URL is malformed or
    /// the pool cannot connect.
    pub async fn connect(config: &DbConfig) -> Result<Self, NestError> {
        let options = match config.url.as_deref() {
            Some(url) => url
                .parse::<PgConnectOptions>()
                .map_err(|e| NestError::StoreUnavailable(format!("nests_db.url: {e}")))?,
            None => {
                let mut options = PgConnectOptions::new()
                    .host(&config.host)
                    .username(&config.user)
                    .password(&config.password)
                    .database(&config.db);
                if let Some(port) = config.port {
                    options = options.port(port);
                }
                options
            }
        };
        let pool = PgPoolOptions::new()
            .max_connections(config.max_pool)
            .connect_with(options)
            .await?;
        Ok(Self::new(pool))
    }

    /// Brings the schema up to date with the embedded migrations.
    ///
    /// # Errors
    ///
    /// Returns [`NestError::StoreUnavailable`] if a migration fails.
    pub async fn migrate(&self) -> Result<(), NestError> {
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        Ok(())
    }

    /// The underlying pool.
    #[must_use]
    pub const fn pool(&self) -> &PgPool {
        &self.pool
    }

    async fn select_where(&self, clause: &str) -> Result<Vec<StoredNest>, NestError> {
        let sql = format!("SELECT {COLUMNS} FROM nests {clause} ORDER BY nest_id");
        let rows = sqlx::query_as::<_, StoredNest>(&sql)
            .fetch_all(&self.pool)
            .await?;
        Ok(rows)
    }
}

fn push_partial_update(builder: &mut QueryBuilder<'_, Postgres>, update: &NestPartialUpdate) {
    let mut set = builder.separated(", ");
    if let Some(value) = &update.area_name {
        set.push("area_name = ").push_bind_unseparated(value.clone());
    }
    if let Some(value) = update.spawnpoints {
        set.push("spawnpoints = ").push_bind_unseparated(value);
    }
    if let Some(value) = update.m2 {
        set.push("m2 = ").push_bind_unseparated(value);
    }
    if let Some(value) = update.active {
        set.push("active = ").push_bind_unseparated(value);
    }
    if let Some(value) = update.pokemon_id {
        set.push("pokemon_id = ").push_bind_unseparated(value);
    }
    if let Some(value) = update.pokemon_form {
        set.push("pokemon_form = ").push_bind_unseparated(value);
    }
    if let Some(value) = update.pokemon_avg {
        set.push("pokemon_avg = ").push_bind_unseparated(value);
    }
    if let Some(value) = update.pokemon_ratio {
        set.push("pokemon_ratio = ").push_bind_unseparated(value);
    }
    if let Some(value) = update.pokemon_count {
        set.push("pokemon_count = ").push_bind_unseparated(value);
    }
    if let Some(value) = &update.discarded {
        set.push("discarded = ").push_bind_unseparated(value.clone());
    }
    if let Some(value) = update.updated {
        set.push("updated = ").push_bind_unseparated(value);
    }
}

#[async_trait]
impl NestStore for PostgresNestStore {
    async fn insert_or_update_nest(&self, nest: &StoredNest) -> Result<(), NestError> {
        sqlx::query(
            "INSERT INTO nests (nest_id, lat, lon, name, polygon, area_name, spawnpoints, m2, \
             active, discarded, updated) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11) \
             ON CONFLICT (nest_id) DO UPDATE SET name = EXCLUDED.name, lat = EXCLUDED.lat, \
             lon = EXCLUDED.lon, polygon = EXCLUDED.polygon, area_name = EXCLUDED.area_name, \
             spawnpoints = EXCLUDED.spawnpoints, m2 = EXCLUDED.m2, active = EXCLUDED.active, \
             discarded = EXCLUDED.discarded, updated = EXCLUDED.updated",
        )
        .bind(nest.nest_id)
        .bind(nest.lat)
        .bind(nest.lon)
        .bind(&nest.name)
        .bind(nest.polygon.as_deref().unwrap_or_default())
        .bind(&nest.area_name)
        .bind(nest.spawnpoints)
        .bind(nest.m2)
        .bind(nest.active)
        .bind(&nest.discarded)
        .bind(nest.updated)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn update_nest_partial(
        &self,
        id: NestId,
        update: &NestPartialUpdate,
    ) -> Result<(), NestError> {
        if update.is_empty() {
            return Ok(());
        }
        let mut builder = QueryBuilder::<Postgres>::new("UPDATE nests SET ");
        push_partial_update(&mut builder, update);
        builder.push(" WHERE nest_id = ").push_bind(id.get());
        builder.build().execute(&self.pool).await?;
        Ok(())
    }

    async fn get_nest_by_id(&self, id: NestId) -> Result<Option<StoredNest>, NestError> {
        let sql = format!("SELECT {COLUMNS} FROM nests WHERE nest_id = $1");
        let row = sqlx::query_as::<_, StoredNest>(&sql)
            .bind(id.get())
            .fetch_optional(&self.pool)
            .await?;
        Ok(row)
    }

    async fn get_all_nests(&self) -> Result<Vec<StoredNest>, NestError> {
        self.select_where("").await
    }

    async fn get_active_nests(&self) -> Result<Vec<StoredNest>, NestError> {
        self.select_where("WHERE active = TRUE").await
    }

    async fn get_inactive_nests(&self) -> Result<Vec<StoredNest>, NestError> {
        self.select_where("WHERE active IS NOT TRUE").await
    }

    async fn get_nest_areas(&self) -> Result<Vec<String>, NestError> {
        let areas = sqlx::query_scalar::<_, String>(
            "SELECT DISTINCT area_name FROM nests WHERE area_name IS NOT NULL ORDER BY area_name",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(areas)
    }

    async fn get_nests_without_polygon(
        &self,
        ids: &[NestId],
    ) -> Result<HashMap<NestId, StoredNest>, NestError> {
        let sql = format!("SELECT {COLUMNS_WITHOUT_POLYGON} FROM nests WHERE nest_id = ANY($1)");
        let mut found = HashMap::with_capacity(ids.len());
        for batch in ids.chunks(ID_BATCH_SIZE) {
            let raw: Vec<i64> = batch.iter().map(|id| id.get()).collect();
            let rows = sqlx::query_as::<_, StoredNest>(&sql)
                .bind(raw)
                .fetch_all(&self.pool)
                .await?;
            found.extend(rows.into_iter().map(|row| (row.id(), row)));
        }
        Ok(found)
    }

    async fn get_nests_page(
        &self,
        after: Option<NestId>,
        limit: usize,
        include_polygon: bool,
    ) -> Result<Vec<StoredNest>, NestError> {
        let columns = if include_polygon {
            COLUMNS
        } else {
            COLUMNS_WITHOUT_POLYGON
        };
        let sql = format!(
            "SELECT {columns} FROM nests WHERE ($1::BIGINT IS NULL OR nest_id > $1) \
             ORDER BY nest_id LIMIT $2"
        );
        let limit = i64::try_from(limit).map_err(|e| NestError::Internal(e.to_string()))?;
        let rows = sqlx::query_as::<_, StoredNest>(&sql)
            .bind(after.map(NestId::get))
            .bind(limit)
            .fetch_all(&self.pool)
            .await?;
        Ok(rows)
    }
}
