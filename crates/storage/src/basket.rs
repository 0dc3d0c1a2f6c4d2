use sqlx::SqlitePool;
use thiserror::Error;

use crate::{constraint_code, GetOrCreate, SQLITE_CONSTRAINT_FOREIGNKEY};

#[derive(Debug, Clone, PartialEq, Eq, sqlx::FromRow)]
pub struct BasketAttributeType {
    pub id: i64,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, sqlx::FromRow)]
pub struct BasketAttribute {
    pub id: i64,
    pub basket_id: i64,
    pub attribute_type_id: i64,
    pub value_text: String,
}

/// Errors raised while reading or writing basket attributes.
#[derive(Debug, Error)]
pub enum BasketAttributeError {
    #[error("basket {0} does not exist")]
    MissingBasket(i64),
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

/// Repository for key/value annotations attached to baskets.
#[derive(Clone)]
pub struct BasketAttributeRepository {
    pool: SqlitePool,
}

impl BasketAttributeRepository {
    pub(crate) fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Returns the attribute type called `name`, creating it on first use.
    pub async fn get_or_create_type(
        &self,
        name: &str,
    ) -> Result<GetOrCreate<BasketAttributeType>, BasketAttributeError> {
        let mut tx = self.pool.begin().await?;

        let existing = sqlx::query_as::<_, BasketAttributeType>(
            "SELECT id, name FROM basket_attribute_types WHERE name = ?",
        )
        .bind(name)
        .fetch_optional(&mut *tx)
        .await?;
        if let Some(attribute_type) = existing {
            tx.commit().await?;
            return Ok(GetOrCreate::existing(attribute_type));
        }

        let attribute_type = sqlx::query_as::<_, BasketAttributeType>(
            "INSERT INTO basket_attribute_types (name) VALUES (?) RETURNING id, name",
        )
        .bind(name)
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(GetOrCreate::created(attribute_type))
    }

    /// Sets the basket's value for the attribute type, replacing any previous value.
    pub async fn upsert(
        &self,
        basket_id: i64,
        attribute_type_id: i64,
        value: &str,
    ) -> Result<BasketAttribute, BasketAttributeError> {
        let result = sqlx::query_as::<_, BasketAttribute>(
            "INSERT INTO basket_attributes (basket_id, attribute_type_id, value_text) \
             VALUES (?, ?, ?) \
             ON CONFLICT(basket_id, attribute_type_id) DO UPDATE \
             SET value_text = excluded.value_text \
             RETURNING id, basket_id, attribute_type_id, value_text",
        )
        .bind(basket_id)
        .bind(attribute_type_id)
        .bind(value)
        .fetch_one(&self.pool)
        .await;

        match result {
            Ok(attribute) => Ok(attribute),
            Err(err) if constraint_code(&err).as_deref() == Some(SQLITE_CONSTRAINT_FOREIGNKEY) => {
                Err(BasketAttributeError::MissingBasket(basket_id))
            }
            Err(err) => Err(BasketAttributeError::Database(err)),
        }
    }

    /// Returns the stored value for the basket, if any.
    pub async fn fetch_value(
        &self,
        basket_id: i64,
        attribute_type_id: i64,
    ) -> Result<Option<String>, BasketAttributeError> {
        let value = sqlx::query_scalar::<_, String>(
            "SELECT value_text FROM basket_attributes \
             WHERE basket_id = ? AND attribute_type_id = ? \
             ORDER BY id LIMIT 1",
        )
        .bind(basket_id)
        .bind(attribute_type_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(value)
    }
}
