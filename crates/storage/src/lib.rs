mod basket;
mod tenancy;

use std::{str::FromStr, time::Duration};

use chrono::{DateTime, SecondsFormat, Utc};
use sqlx::{
    migrate::MigrateError,
    sqlite::{SqliteConnectOptions, SqlitePoolOptions},
    SqlitePool,
};
use thiserror::Error;

pub use basket::{
    BasketAttribute, BasketAttributeError, BasketAttributeRepository, BasketAttributeType,
};
pub use tenancy::{
    Partner, PartnerRepository, Site, SiteConfiguration, SiteConfigurationRepository,
    SiteMarketingContext, SiteRepository, SiteTheme, SiteThemeRepository, TenancyError,
};

/// Top-level database handle that owns the SQLite connection pool.
#[derive(Clone)]
pub struct Database {
    pool: SqlitePool,
}

impl Database {
    /// Establishes a new SQLite connection pool for the provided connection string.
    pub async fn connect(database_url: &str) -> Result<Self, StorageError> {
        let options = SqliteConnectOptions::from_str(database_url)
            .map_err(StorageError::Connect)?
            .create_if_missing(true)
            .foreign_keys(true)
            .busy_timeout(Duration::from_secs(5));

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await
            .map_err(StorageError::Connect)?;

        apply_pragmas(&pool).await?;

        Ok(Self { pool })
    }

    /// Applies migrations located under `migrations/`.
    pub async fn run_migrations(&self) -> Result<(), StorageError> {
        sqlx::migrate!("../../migrations")
            .run(&self.pool)
            .await
            .map_err(StorageError::Migration)?;
        Ok(())
    }

    /// Returns a handle for interacting with sites.
    pub fn sites(&self) -> SiteRepository {
        SiteRepository::new(self.pool.clone())
    }

    /// Returns a handle for interacting with site themes.
    pub fn site_themes(&self) -> SiteThemeRepository {
        SiteThemeRepository::new(self.pool.clone())
    }

    /// Returns a handle for interacting with partners.
    pub fn partners(&self) -> PartnerRepository {
        PartnerRepository::new(self.pool.clone())
    }

    /// Returns a handle for interacting with site configurations.
    pub fn site_configurations(&self) -> SiteConfigurationRepository {
        SiteConfigurationRepository::new(self.pool.clone())
    }

    /// Returns a handle for reading and writing basket attributes.
    pub fn basket_attributes(&self) -> BasketAttributeRepository {
        BasketAttributeRepository::new(self.pool.clone())
    }

    /// Removes every site, theme, partner and site configuration.
    pub async fn delete_tenancy(&self) -> Result<TenancyDeleted, StorageError> {
        let mut tx = self.pool.begin().await?;

        let site_configurations = sqlx::query("DELETE FROM site_configurations")
            .execute(&mut *tx)
            .await?
            .rows_affected();
        let site_themes = sqlx::query("DELETE FROM site_themes")
            .execute(&mut *tx)
            .await?
            .rows_affected();
        let partners = sqlx::query("DELETE FROM partners")
            .execute(&mut *tx)
            .await?
            .rows_affected();
        let sites = sqlx::query("DELETE FROM sites")
            .execute(&mut *tx)
            .await?
            .rows_affected();

        tx.commit().await?;

        Ok(TenancyDeleted {
            sites,
            site_themes,
            partners,
            site_configurations,
        })
    }

    /// Exposes the inner pool when lower level access is required.
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

async fn apply_pragmas(pool: &SqlitePool) -> Result<(), StorageError> {
    sqlx::query("PRAGMA journal_mode = WAL;")
        .fetch_one(pool)
        .await
        .map_err(StorageError::Pragma)?;

    sqlx::query("PRAGMA synchronous = NORMAL;")
        .execute(pool)
        .await
        .map_err(StorageError::Pragma)?;

    Ok(())
}

/// General storage level errors.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("failed to connect to sqlite: {0}")]
    Connect(sqlx::Error),
    #[error("failed to apply pragma: {0}")]
    Pragma(sqlx::Error),
    #[error("failed to run database migrations: {0}")]
    Migration(MigrateError),
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

/// Row counts removed by [`Database::delete_tenancy`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TenancyDeleted {
    pub sites: u64,
    pub site_themes: u64,
    pub partners: u64,
    pub site_configurations: u64,
}

/// Result of a lookup-then-insert-if-absent operation.
///
/// Existing rows are returned untouched; `created` tells whether the row
/// was inserted with the supplied defaults.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GetOrCreate<T> {
    pub record: T,
    pub created: bool,
}

impl<T> GetOrCreate<T> {
    fn existing(record: T) -> Self {
        Self {
            record,
            created: false,
        }
    }

    fn created(record: T) -> Self {
        Self {
            record,
            created: true,
        }
    }

    pub fn outcome_str(&self) -> &'static str {
        if self.created {
            "created"
        } else {
            "existing"
        }
    }
}

const SQLITE_CONSTRAINT_UNIQUE: &str = "2067";
const SQLITE_CONSTRAINT_FOREIGNKEY: &str = "787";

fn constraint_code(err: &sqlx::Error) -> Option<String> {
    match err {
        sqlx::Error::Database(db_err) => db_err.code().map(|code| code.into_owned()),
        _ => None,
    }
}

fn to_rfc3339(value: DateTime<Utc>) -> String {
    value.to_rfc3339_opts(SecondsFormat::Millis, true)
}
