//! Spawnpoint counts from a Golbat MySQL database.

use async_trait::async_trait;
use sqlx::MySqlPool;
use sqlx::mysql::{MySqlConnectOptions, MySqlPoolOptions};

use super::PointStore;
use crate::config::GolbatDbConfig;
use crate::domain::NestGeometry;
use crate::error::NestError;

/// Counts spawnpoints in Golbat's `spawnpoint` table.
#[derive(Debug, Clone)]
pub struct GolbatPointStore {
    pool: MySqlPool,
    max_age_days: u32,
}

impl GolbatPointStore {
    /// Wraps an existing pool. Spawnpoints last seen more than
    /// `max_age_days` ago are not counted.
    #[must_use]
    pub fn new(pool: MySqlPool, max_age_days: u32) -> Self {
        Self { pool, max_age_days }
    }

    /// Connects using `config.url` when set, otherwise the individual
    /// connection fields.
    ///
    /// # Errors
    ///
    /// Returns [`NestError::StoreUnavailable`] if the URL is malformed or
    /// the pool cannot connect.
    pub async fn connect(config: &GolbatDbConfig) -> Result<Self, NestError> {
        let db = &config.db;
        let options = match db.url.as_deref() {
            Some(url) => url
                .parse::<MySqlConnectOptions>()
                .map_err(|e| NestError::StoreUnavailable(format!("golbat_db.url: {e}")))?,
            None => {
                let mut options = MySqlConnectOptions::new()
                    .host(&db.host)
                    .username(&db.user)
                    .password(&db.password)
                    .database(&db.db);
                if let Some(port) = db.port {
                    options = options.port(port);
                }
                options
            }
        };
        let pool = MySqlPoolOptions::new()
            .max_connections(db.max_pool)
            .connect_with(options)
            .await?;
        Ok(Self::new(pool, config.spawnpoint_max_age_days))
    }
}

#[async_trait]
impl PointStore for GolbatPointStore {
    async fn count_points_contained(&self, geometry: &NestGeometry) -> Result<i64, NestError> {
        let bbox = geometry
            .bounding_rect()
            .ok_or_else(|| NestError::GeometryInvalid("geometry has no bounding box".to_string()))?;
        let geojson = geometry.to_geojson_string()?;
        let count = sqlx::query_scalar::<_, i64>(
            "SELECT COUNT(*) FROM spawnpoint \
             WHERE lat > ? AND lon > ? AND lat < ? AND lon < ? \
             AND last_seen > UNIX_TIMESTAMP(NOW() - INTERVAL ? DAY) \
             AND ST_CONTAINS(ST_GeomFromGeoJSON(?, 2, 0), POINT(lon, lat))",
        )
        .bind(bbox.min().y)
        .bind(bbox.min().x)
        .bind(bbox.max().y)
        .bind(bbox.max().x)
        .bind(self.max_age_days)
        .bind(geojson)
        .fetch_one(&self.pool)
        .await?;
        Ok(count)
    }
}
