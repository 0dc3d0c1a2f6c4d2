use std::collections::HashMap;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use uuid::Uuid;

/// Product class name identifying purchasable course enrollments.
pub const SEAT_PRODUCT_CLASS_NAME: &str = "Seat";

/// Cookie carrying the marketing campaign id, also used as the basket attribute type name.
pub const SAILTHRU_CAMPAIGN: &str = "sailthru_bid";

/// Fully qualified name of the worker task receiving enrollment updates.
pub const UPDATE_COURSE_ENROLLMENT_TASK: &str =
    "ecommerce_worker.sailthru.v1.tasks.update_course_enrollment";

/// Catalogue product as seen by the basket and checkout flows.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Product {
    pub id: i64,
    pub title: String,
    pub product_class: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub course_id: Option<String>,
    #[serde(default)]
    pub attributes: ProductAttributes,
    #[serde(default)]
    pub stock_records: Vec<StockRecord>,
}

impl Product {
    /// Returns `true` when the product is a course seat.
    pub fn is_seat(&self) -> bool {
        self.product_class == SEAT_PRODUCT_CLASS_NAME
    }

    /// Returns the first stock record, which carries the product's list price.
    pub fn first_stock_record(&self) -> Option<&StockRecord> {
        self.stock_records.first()
    }
}

/// Seat specific product attributes.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProductAttributes {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub certificate_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id_verification_required: Option<bool>,
}

/// Price and availability of a product for a given partner.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockRecord {
    pub partner_sku: String,
    #[serde(default)]
    pub price_excl_tax: Option<Decimal>,
    pub price_currency: String,
}

/// Authenticated shopper.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Customer {
    pub email: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
}

/// Subset of the triggering HTTP request the notifier needs.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestContext {
    #[serde(default)]
    pub cookies: HashMap<String, String>,
}

impl RequestContext {
    pub fn with_cookie(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.cookies.insert(name.into(), value.into());
        self
    }

    /// Returns the cookie value, treating empty values as absent.
    pub fn cookie(&self, name: &str) -> Option<&str> {
        self.cookies
            .get(name)
            .map(String::as_str)
            .filter(|value| !value.is_empty())
    }
}

/// A product was added to a basket.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BasketAddition {
    pub site_id: i64,
    pub product: Product,
    #[serde(default)]
    pub user: Option<Customer>,
    #[serde(default)]
    pub basket_id: Option<i64>,
    #[serde(default)]
    pub request: RequestContext,
}

/// Placed order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Order {
    pub number: String,
    pub site_id: i64,
    #[serde(default)]
    pub basket_id: Option<i64>,
    pub currency: String,
    #[serde(default)]
    pub user: Option<Customer>,
    #[serde(default)]
    pub lines: Vec<OrderLine>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderLine {
    pub product: Product,
    pub line_price_excl_tax: Decimal,
}

/// Payment for an order has completed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckoutComplete {
    pub order: Order,
    #[serde(default)]
    pub request: Option<RequestContext>,
}

/// Application lifecycle events observed by the marketing notifier.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum LifecycleEvent {
    BasketAddition(BasketAddition),
    CheckoutComplete(CheckoutComplete),
}

impl LifecycleEvent {
    pub fn kind_str(&self) -> &'static str {
        match self {
            Self::BasketAddition(_) => "basket_addition",
            Self::CheckoutComplete(_) => "checkout_complete",
        }
    }
}

/// Enrollment notification handed to the marketing worker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnrollmentUpdate {
    pub email: String,
    pub course_url: String,
    /// `true` for a basket addition, `false` for a completed purchase.
    pub is_cart: bool,
    pub mode: String,
    #[serde(with = "rust_decimal::serde::float")]
    pub unit_cost: Decimal,
    pub course_id: String,
    pub currency: String,
    pub site_code: String,
    pub message_id: Option<String>,
}

#[derive(Serialize)]
struct EnrollmentKwargs<'a> {
    #[serde(with = "rust_decimal::serde::float")]
    unit_cost: Decimal,
    course_id: &'a str,
    currency: &'a str,
    site_code: &'a str,
    message_id: Option<&'a str>,
}

impl EnrollmentUpdate {
    /// Wraps the update in a task envelope using the worker's positional/keyword layout.
    pub fn into_task(self, issued_at: DateTime<Utc>) -> Result<TaskEnvelope, serde_json::Error> {
        let kwargs = EnrollmentKwargs {
            unit_cost: self.unit_cost,
            course_id: &self.course_id,
            currency: &self.currency,
            site_code: &self.site_code,
            message_id: self.message_id.as_deref(),
        };
        let kwargs = serde_json::to_value(kwargs)?;

        Ok(TaskEnvelope {
            id: Uuid::new_v4(),
            task: UPDATE_COURSE_ENROLLMENT_TASK.to_string(),
            args: vec![
                Value::String(self.email),
                Value::String(self.course_url),
                Value::Bool(self.is_cart),
                Value::String(self.mode),
            ],
            kwargs,
            issued_at,
        })
    }
}

/// Serialized task as accepted by the external broker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskEnvelope {
    pub id: Uuid,
    pub task: String,
    pub args: Vec<Value>,
    pub kwargs: Value,
    pub issued_at: DateTime<Utc>,
}

impl TaskEnvelope {
    /// Returns a log-safe view of the task without the recipient address.
    pub fn redacted(&self) -> Value {
        json!({
            "id": self.id,
            "task": self.task,
            "args_len": self.args.len(),
            "kwargs": self.kwargs,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    fn update() -> EnrollmentUpdate {
        EnrollmentUpdate {
            email: "learner@example.com".to_string(),
            course_url: "https://lms.example.com/courses/edX/DemoX/info".to_string(),
            is_cart: true,
            mode: "verified".to_string(),
            unit_cost: Decimal::from_str("49.99").unwrap(),
            course_id: "edX/DemoX".to_string(),
            currency: "USD".to_string(),
            site_code: "edX".to_string(),
            message_id: Some("cmp-1".to_string()),
        }
    }

    #[test]
    fn task_envelope_uses_positional_and_keyword_layout() {
        let task = update().into_task(Utc::now()).expect("task");

        assert_eq!(task.task, UPDATE_COURSE_ENROLLMENT_TASK);
        assert_eq!(task.args[0], json!("learner@example.com"));
        assert_eq!(task.args[2], json!(true));
        assert_eq!(task.args[3], json!("verified"));
        assert_eq!(task.kwargs["unit_cost"], json!(49.99));
        assert_eq!(task.kwargs["site_code"], json!("edX"));
        assert_eq!(task.kwargs["message_id"], json!("cmp-1"));
    }

    #[test]
    fn redacted_task_hides_recipient() {
        let task = update().into_task(Utc::now()).expect("task");
        let redacted = task.redacted().to_string();
        assert!(!redacted.contains("learner@example.com"));
        assert!(redacted.contains("edX/DemoX"));
    }

    #[test]
    fn empty_cookie_counts_as_missing() {
        let request = RequestContext::default().with_cookie(SAILTHRU_CAMPAIGN, "");
        assert_eq!(request.cookie(SAILTHRU_CAMPAIGN), None);

        let request = request.with_cookie(SAILTHRU_CAMPAIGN, "abc");
        assert_eq!(request.cookie(SAILTHRU_CAMPAIGN), Some("abc"));
    }

    #[test]
    fn lifecycle_event_deserializes_from_tagged_json() {
        let event: LifecycleEvent = serde_json::from_value(json!({
            "type": "basket_addition",
            "site_id": 1,
            "product": {
                "id": 7,
                "title": "Seat in DemoX",
                "product_class": "Seat",
                "course_id": "edX/DemoX",
                "stock_records": [
                    {"partner_sku": "ABC", "price_excl_tax": "10.00", "price_currency": "USD"}
                ]
            }
        }))
        .expect("event");

        assert_eq!(event.kind_str(), "basket_addition");
        let LifecycleEvent::BasketAddition(addition) = event else {
            panic!("expected basket addition");
        };
        assert!(addition.product.is_seat());
        assert_eq!(
            addition.product.first_stock_record().and_then(|s| s.price_excl_tax),
            Some(Decimal::from_str("10.00").unwrap())
        );
    }
}
