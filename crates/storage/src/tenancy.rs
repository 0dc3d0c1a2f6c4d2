use chrono::Utc;
use serde_json::Value;
use sqlx::SqlitePool;
use thiserror::Error;

use storefront_core::descriptor::SiteConfigurationDefaults;

use crate::{constraint_code, to_rfc3339, GetOrCreate, SQLITE_CONSTRAINT_UNIQUE};

/// Errors raised by the tenancy repositories.
#[derive(Debug, Error)]
pub enum TenancyError {
    #[error("site {site_id} is already configured for a different partner")]
    SiteAlreadyConfigured { site_id: i64 },
    #[error("partner '{0}' not found")]
    PartnerNotFound(String),
    #[error("failed to encode configuration json: {0}")]
    Encode(#[from] serde_json::Error),
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

#[derive(Debug, Clone, PartialEq, Eq, sqlx::FromRow)]
pub struct Site {
    pub id: i64,
    pub domain: String,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, sqlx::FromRow)]
pub struct SiteTheme {
    pub id: i64,
    pub site_id: i64,
    pub theme_dir_name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, sqlx::FromRow)]
pub struct Partner {
    pub id: i64,
    pub short_code: String,
    pub name: String,
    pub enable_sailthru: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, sqlx::FromRow)]
pub struct SiteConfiguration {
    pub id: i64,
    pub site_id: i64,
    pub partner_id: i64,
    pub lms_url_root: Option<String>,
    pub theme_scss_path: Option<String>,
    pub payment_processors: String,
    pub from_email: Option<String>,
    pub segment_key: Option<String>,
    pub oauth_settings_json: String,
    pub extra_json: String,
    pub enable_partial_program: bool,
}

/// Site configuration joined with its partner, as needed by the marketing notifier.
#[derive(Debug, Clone, PartialEq, Eq, sqlx::FromRow)]
pub struct SiteMarketingContext {
    pub site_id: i64,
    pub partner_short_code: String,
    pub enable_sailthru: bool,
    pub lms_url_root: Option<String>,
}

/// Repository for `sites`.
#[derive(Clone)]
pub struct SiteRepository {
    pool: SqlitePool,
}

impl SiteRepository {
    pub(crate) fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Returns the site for `domain`, creating it with `default_name` when absent.
    pub async fn get_or_create(
        &self,
        domain: &str,
        default_name: &str,
    ) -> Result<GetOrCreate<Site>, TenancyError> {
        let mut tx = self.pool.begin().await?;

        let existing =
            sqlx::query_as::<_, Site>("SELECT id, domain, name FROM sites WHERE domain = ?")
                .bind(domain)
                .fetch_optional(&mut *tx)
                .await?;
        if let Some(site) = existing {
            tx.commit().await?;
            return Ok(GetOrCreate::existing(site));
        }

        let site = sqlx::query_as::<_, Site>(
            "INSERT INTO sites (domain, name, created_at) VALUES (?, ?, ?) \
             RETURNING id, domain, name",
        )
        .bind(domain)
        .bind(default_name)
        .bind(to_rfc3339(Utc::now()))
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(GetOrCreate::created(site))
    }

    pub async fn list_all(&self) -> Result<Vec<Site>, TenancyError> {
        let rows = sqlx::query_as::<_, Site>("SELECT id, domain, name FROM sites ORDER BY id")
            .fetch_all(&self.pool)
            .await?;
        Ok(rows)
    }
}

/// Repository for `site_themes`.
#[derive(Clone)]
pub struct SiteThemeRepository {
    pool: SqlitePool,
}

impl SiteThemeRepository {
    pub(crate) fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn get_or_create(
        &self,
        site_id: i64,
        theme_dir_name: &str,
    ) -> Result<GetOrCreate<SiteTheme>, TenancyError> {
        let mut tx = self.pool.begin().await?;

        let existing = sqlx::query_as::<_, SiteTheme>(
            "SELECT id, site_id, theme_dir_name FROM site_themes \
             WHERE site_id = ? AND theme_dir_name = ?",
        )
        .bind(site_id)
        .bind(theme_dir_name)
        .fetch_optional(&mut *tx)
        .await?;
        if let Some(theme) = existing {
            tx.commit().await?;
            return Ok(GetOrCreate::existing(theme));
        }

        let theme = sqlx::query_as::<_, SiteTheme>(
            "INSERT INTO site_themes (site_id, theme_dir_name, created_at) VALUES (?, ?, ?) \
             RETURNING id, site_id, theme_dir_name",
        )
        .bind(site_id)
        .bind(theme_dir_name)
        .bind(to_rfc3339(Utc::now()))
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(GetOrCreate::created(theme))
    }

    pub async fn list_all(&self) -> Result<Vec<SiteTheme>, TenancyError> {
        let rows = sqlx::query_as::<_, SiteTheme>(
            "SELECT id, site_id, theme_dir_name FROM site_themes ORDER BY id",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }
}

/// Repository for `partners`.
#[derive(Clone)]
pub struct PartnerRepository {
    pool: SqlitePool,
}

impl PartnerRepository {
    pub(crate) fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Returns the partner for `short_code`, creating it with `default_name` when absent.
    pub async fn get_or_create(
        &self,
        short_code: &str,
        default_name: &str,
    ) -> Result<GetOrCreate<Partner>, TenancyError> {
        let mut tx = self.pool.begin().await?;

        let existing = sqlx::query_as::<_, Partner>(
            "SELECT id, short_code, name, enable_sailthru FROM partners WHERE short_code = ?",
        )
        .bind(short_code)
        .fetch_optional(&mut *tx)
        .await?;
        if let Some(partner) = existing {
            tx.commit().await?;
            return Ok(GetOrCreate::existing(partner));
        }

        let partner = sqlx::query_as::<_, Partner>(
            "INSERT INTO partners (short_code, name, created_at) VALUES (?, ?, ?) \
             RETURNING id, short_code, name, enable_sailthru",
        )
        .bind(short_code)
        .bind(default_name)
        .bind(to_rfc3339(Utc::now()))
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(GetOrCreate::created(partner))
    }

    /// Flips the partner's marketing opt-in.
    pub async fn set_sailthru_enabled(
        &self,
        short_code: &str,
        enabled: bool,
    ) -> Result<Partner, TenancyError> {
        sqlx::query_as::<_, Partner>(
            "UPDATE partners SET enable_sailthru = ? WHERE short_code = ? \
             RETURNING id, short_code, name, enable_sailthru",
        )
        .bind(enabled)
        .bind(short_code)
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| TenancyError::PartnerNotFound(short_code.to_string()))
    }

    pub async fn list_all(&self) -> Result<Vec<Partner>, TenancyError> {
        let rows = sqlx::query_as::<_, Partner>(
            "SELECT id, short_code, name, enable_sailthru FROM partners ORDER BY id",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }
}

const SITE_CONFIGURATION_COLUMNS: &str = "id, site_id, partner_id, lms_url_root, theme_scss_path, \
     payment_processors, from_email, segment_key, oauth_settings_json, extra_json, \
     enable_partial_program";

/// Repository for `site_configurations`.
#[derive(Clone)]
pub struct SiteConfigurationRepository {
    pool: SqlitePool,
}

impl SiteConfigurationRepository {
    pub(crate) fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Returns the configuration linking `site_id` and `partner_id`, creating it from
    /// `defaults` when absent.
    ///
    /// A site carries at most one configuration; if it is already bound to another
    /// partner the call fails with [`TenancyError::SiteAlreadyConfigured`].
    pub async fn get_or_create(
        &self,
        site_id: i64,
        partner_id: i64,
        defaults: &SiteConfigurationDefaults,
    ) -> Result<GetOrCreate<SiteConfiguration>, TenancyError> {
        let mut tx = self.pool.begin().await?;

        let existing = sqlx::query_as::<_, SiteConfiguration>(&format!(
            "SELECT {SITE_CONFIGURATION_COLUMNS} FROM site_configurations \
             WHERE site_id = ? AND partner_id = ?"
        ))
        .bind(site_id)
        .bind(partner_id)
        .fetch_optional(&mut *tx)
        .await?;
        if let Some(configuration) = existing {
            tx.commit().await?;
            return Ok(GetOrCreate::existing(configuration));
        }

        let oauth_settings = defaults
            .oauth_settings
            .clone()
            .unwrap_or_else(|| Value::Object(Default::default()));
        let oauth_settings_json = serde_json::to_string(&oauth_settings)?;
        let extra_json = serde_json::to_string(&defaults.extra)?;

        let inserted = sqlx::query_as::<_, SiteConfiguration>(&format!(
            "INSERT INTO site_configurations \
             (site_id, partner_id, lms_url_root, theme_scss_path, payment_processors, \
              from_email, segment_key, oauth_settings_json, extra_json, created_at) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?) \
             RETURNING {SITE_CONFIGURATION_COLUMNS}"
        ))
        .bind(site_id)
        .bind(partner_id)
        .bind(&defaults.lms_url_root)
        .bind(&defaults.theme_scss_path)
        .bind(defaults.payment_processors.as_deref().unwrap_or_default())
        .bind(&defaults.from_email)
        .bind(&defaults.segment_key)
        .bind(oauth_settings_json)
        .bind(extra_json)
        .bind(to_rfc3339(Utc::now()))
        .fetch_one(&mut *tx)
        .await;

        let configuration = match inserted {
            Ok(configuration) => configuration,
            Err(err) if constraint_code(&err).as_deref() == Some(SQLITE_CONSTRAINT_UNIQUE) => {
                return Err(TenancyError::SiteAlreadyConfigured { site_id });
            }
            Err(err) => return Err(TenancyError::Database(err)),
        };

        tx.commit().await?;
        Ok(GetOrCreate::created(configuration))
    }

    /// Loads the partner and LMS root serving `site_id`.
    pub async fn fetch_marketing_context(
        &self,
        site_id: i64,
    ) -> Result<Option<SiteMarketingContext>, TenancyError> {
        let row = sqlx::query_as::<_, SiteMarketingContext>(
            "SELECT sc.site_id AS site_id, \
                    p.short_code AS partner_short_code, \
                    p.enable_sailthru AS enable_sailthru, \
                    sc.lms_url_root AS lms_url_root \
               FROM site_configurations AS sc \
               JOIN partners AS p ON p.id = sc.partner_id \
              WHERE sc.site_id = ?",
        )
        .bind(site_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }

    pub async fn list_all(&self) -> Result<Vec<SiteConfiguration>, TenancyError> {
        let rows = sqlx::query_as::<_, SiteConfiguration>(&format!(
            "SELECT {SITE_CONFIGURATION_COLUMNS} FROM site_configurations ORDER BY id"
        ))
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }
}
