use std::sync::Arc;

use chrono::{DateTime, Utc};
use metrics::counter;
use rust_decimal::Decimal;
use thiserror::Error;
use tracing::{debug, error, info};

use storefront_core::seat::{course_info_url, mode_for_seat};
use storefront_core::types::{
    BasketAddition, CheckoutComplete, EnrollmentUpdate, LifecycleEvent, Product, SAILTHRU_CAMPAIGN,
};
use storefront_storage::{BasketAttributeError, Database, SiteMarketingContext, TenancyError};
use storefront_util::NotifierConfig;

use crate::queue::{BrokerQueue, QueueError, TaskQueue};

const BASKET_ADDITION_FAILURE: &str = "Failed to call Sailthru upon basket addition.";
const ORDER_COMPLETION_FAILURE: &str = "Failed to call Sailthru upon order completion.";

/// Errors raised while building or submitting an enrollment update.
///
/// These never leave the notifier; they are logged and folded into a
/// [`NotifyOutcome`].
#[derive(Debug, Error)]
pub enum NotifyError {
    #[error("site {0} has no configuration")]
    MissingSiteConfiguration(i64),
    #[error("site {0} has no lms url root")]
    MissingLmsRoot(i64),
    #[error("no customer attached to the event")]
    MissingCustomer,
    #[error("seat product {0} has no course id")]
    MissingCourseId(i64),
    #[error("failed to build course url: {0}")]
    CourseUrl(#[from] url::ParseError),
    #[error("tenancy lookup failed: {0}")]
    Tenancy(#[from] TenancyError),
    #[error("basket attribute error: {0}")]
    BasketAttribute(#[from] BasketAttributeError),
    #[error("failed to encode task: {0}")]
    Encode(#[from] serde_json::Error),
    #[error("task submission failed: {0}")]
    Queue(#[from] QueueError),
}

/// What the notifier did with an event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NotifyOutcome {
    pub action: NotifyAction,
    pub submitted: usize,
    pub reason: Option<String>,
}

impl NotifyOutcome {
    fn submitted(count: usize) -> Self {
        Self {
            action: NotifyAction::Submitted,
            submitted: count,
            reason: None,
        }
    }

    fn skipped(reason: &str) -> Self {
        Self {
            action: NotifyAction::Skipped,
            submitted: 0,
            reason: Some(reason.to_string()),
        }
    }

    fn failed(err: &NotifyError) -> Self {
        Self {
            action: NotifyAction::Failed,
            submitted: 0,
            reason: Some(err.to_string()),
        }
    }

    pub fn is_submitted(&self) -> bool {
        matches!(self.action, NotifyAction::Submitted)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotifyAction {
    Submitted,
    Skipped,
    Failed,
}

impl NotifyAction {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Submitted => "submitted",
            Self::Skipped => "skipped",
            Self::Failed => "failed",
        }
    }
}

/// Forwards basket and checkout events to the marketing worker.
#[derive(Clone)]
pub struct EnrollmentNotifier {
    config: NotifierConfig,
    database: Database,
    queue: Arc<dyn TaskQueue>,
    clock: Arc<dyn Fn() -> DateTime<Utc> + Send + Sync>,
}

impl EnrollmentNotifier {
    pub fn new(config: NotifierConfig, database: Database, queue: Arc<dyn TaskQueue>) -> Self {
        Self {
            config,
            database,
            queue,
            clock: Arc::new(Utc::now),
        }
    }

    /// Builds a notifier that hands tasks to the configured HTTP broker.
    ///
    /// The returned queue shares in-flight deliveries with the notifier;
    /// flush it before the runtime shuts down.
    pub fn with_broker(
        config: NotifierConfig,
        database: Database,
    ) -> Result<(Self, BrokerQueue), QueueError> {
        let queue = BrokerQueue::from_config(&config)?;
        let notifier = Self::new(config, database, Arc::new(queue.clone()));
        Ok((notifier, queue))
    }

    /// Dispatches a lifecycle event to the matching handler.
    pub async fn handle(&self, event: &LifecycleEvent) -> NotifyOutcome {
        match event {
            LifecycleEvent::BasketAddition(addition) => {
                self.process_basket_addition(addition).await
            }
            LifecycleEvent::CheckoutComplete(checkout) => {
                self.process_checkout_complete(checkout).await
            }
        }
    }

    /// Tells the marketing worker a paid seat entered a basket.
    pub async fn process_basket_addition(&self, event: &BasketAddition) -> NotifyOutcome {
        let result = self.basket_addition(event).await;
        finish("basket_addition", BASKET_ADDITION_FAILURE, result)
    }

    /// Tells the marketing worker about every seat in a completed order.
    pub async fn process_checkout_complete(&self, event: &CheckoutComplete) -> NotifyOutcome {
        let result = self.checkout_complete(event).await;
        finish("checkout_complete", ORDER_COMPLETION_FAILURE, result)
    }

    async fn basket_addition(&self, event: &BasketAddition) -> Result<NotifyOutcome, NotifyError> {
        if !self.config.sailthru_enabled {
            return Ok(NotifyOutcome::skipped("switch_disabled"));
        }

        let site = self.marketing_context(event.site_id).await?;
        if !site.enable_sailthru {
            return Ok(NotifyOutcome::skipped("partner_disabled"));
        }

        let product = &event.product;
        if !product.is_seat() {
            return Ok(NotifyOutcome::skipped("not_a_seat"));
        }

        let Some((price, currency)) = product.first_stock_record().and_then(|record| {
            record
                .price_excl_tax
                .filter(|price| !price.is_zero())
                .map(|price| (price, record.price_currency.clone()))
        }) else {
            return Ok(NotifyOutcome::skipped("free_item"));
        };

        let message_id = event.request.cookie(SAILTHRU_CAMPAIGN).map(str::to_string);
        if let (Some(message_id), Some(basket_id)) = (message_id.as_deref(), event.basket_id) {
            self.store_campaign(basket_id, message_id).await?;
        }

        let customer = event.user.as_ref().ok_or(NotifyError::MissingCustomer)?;
        let update = build_update(
            &site,
            product,
            &customer.email,
            true,
            price,
            currency,
            message_id,
        )?;
        self.submit(update)?;

        Ok(NotifyOutcome::submitted(1))
    }

    async fn checkout_complete(
        &self,
        event: &CheckoutComplete,
    ) -> Result<NotifyOutcome, NotifyError> {
        if !self.config.sailthru_enabled {
            return Ok(NotifyOutcome::skipped("switch_disabled"));
        }

        let order = &event.order;
        let site = self.marketing_context(order.site_id).await?;
        if !site.enable_sailthru {
            return Ok(NotifyOutcome::skipped("partner_disabled"));
        }

        let cookie = event
            .request
            .as_ref()
            .and_then(|request| request.cookie(SAILTHRU_CAMPAIGN))
            .map(str::to_string);
        let message_id = match (cookie, order.basket_id) {
            (Some(cookie), _) => Some(cookie),
            (None, Some(basket_id)) => self.stored_campaign(basket_id).await?,
            (None, None) => None,
        };

        let mut submitted = 0;
        for line in order.lines.iter().filter(|line| line.product.is_seat()) {
            let customer = order.user.as_ref().ok_or(NotifyError::MissingCustomer)?;
            let update = build_update(
                &site,
                &line.product,
                &customer.email,
                false,
                line.line_price_excl_tax,
                order.currency.clone(),
                message_id.clone(),
            )?;
            self.submit(update)?;
            submitted += 1;
        }

        if submitted == 0 {
            return Ok(NotifyOutcome::skipped("no_seat_lines"));
        }
        Ok(NotifyOutcome::submitted(submitted))
    }

    async fn marketing_context(&self, site_id: i64) -> Result<SiteMarketingContext, NotifyError> {
        self.database
            .site_configurations()
            .fetch_marketing_context(site_id)
            .await?
            .ok_or(NotifyError::MissingSiteConfiguration(site_id))
    }

    async fn store_campaign(&self, basket_id: i64, message_id: &str) -> Result<(), NotifyError> {
        let attributes = self.database.basket_attributes();
        let attribute_type = attributes.get_or_create_type(SAILTHRU_CAMPAIGN).await?;
        attributes
            .upsert(basket_id, attribute_type.record.id, message_id)
            .await?;
        debug!(stage = "notifier", basket_id, "stored campaign id on basket");
        Ok(())
    }

    async fn stored_campaign(&self, basket_id: i64) -> Result<Option<String>, NotifyError> {
        let attributes = self.database.basket_attributes();
        let attribute_type = attributes.get_or_create_type(SAILTHRU_CAMPAIGN).await?;
        let value = attributes
            .fetch_value(basket_id, attribute_type.record.id)
            .await?;
        Ok(value)
    }

    fn submit(&self, update: EnrollmentUpdate) -> Result<(), NotifyError> {
        let task = update.into_task((self.clock)())?;
        info!(
            stage = "notifier",
            task_id = %task.id,
            task = %task.redacted(),
            "submitting enrollment update"
        );
        self.queue.submit(task)?;
        Ok(())
    }
}

#[cfg(test)]
impl EnrollmentNotifier {
    fn with_clock(mut self, clock: Arc<dyn Fn() -> DateTime<Utc> + Send + Sync>) -> Self {
        self.clock = clock;
        self
    }
}

fn build_update(
    site: &SiteMarketingContext,
    product: &Product,
    email: &str,
    is_cart: bool,
    unit_cost: Decimal,
    currency: String,
    message_id: Option<String>,
) -> Result<EnrollmentUpdate, NotifyError> {
    let course_id = product
        .course_id
        .clone()
        .ok_or(NotifyError::MissingCourseId(product.id))?;
    let lms_url_root = site
        .lms_url_root
        .as_deref()
        .ok_or(NotifyError::MissingLmsRoot(site.site_id))?;
    let course_url = course_info_url(lms_url_root, &course_id)?;

    Ok(EnrollmentUpdate {
        email: email.to_string(),
        course_url: course_url.to_string(),
        is_cart,
        mode: mode_for_seat(product),
        unit_cost,
        course_id,
        currency,
        site_code: site.partner_short_code.clone(),
        message_id,
    })
}

fn finish(
    event: &'static str,
    failure_message: &'static str,
    result: Result<NotifyOutcome, NotifyError>,
) -> NotifyOutcome {
    let outcome = match result {
        Ok(outcome) => outcome,
        Err(err) => {
            error!(stage = "notifier", event, error = %err, "{failure_message}");
            NotifyOutcome::failed(&err)
        }
    };

    counter!("marketing_events_total", "event" => event, "result" => outcome.action.as_str())
        .increment(1);
    debug!(
        stage = "notifier",
        event,
        action = outcome.action.as_str(),
        submitted = outcome.submitted,
        reason = outcome.reason.as_deref().unwrap_or(""),
        "lifecycle event processed"
    );
    outcome
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    use chrono::TimeZone;
    use serde_json::json;
    use storefront_core::descriptor::SiteConfigurationDefaults;
    use storefront_core::types::{
        Customer, Order, OrderLine, ProductAttributes, RequestContext, StockRecord,
        TaskEnvelope, SEAT_PRODUCT_CLASS_NAME,
    };

    #[derive(Default)]
    struct RecordingQueue {
        tasks: Mutex<Vec<TaskEnvelope>>,
    }

    impl RecordingQueue {
        fn tasks(&self) -> Vec<TaskEnvelope> {
            self.tasks.lock().expect("queue lock").clone()
        }
    }

    impl TaskQueue for RecordingQueue {
        fn submit(&self, task: TaskEnvelope) -> Result<(), QueueError> {
            self.tasks.lock().expect("queue lock").push(task);
            Ok(())
        }
    }

    struct FailingQueue;

    impl TaskQueue for FailingQueue {
        fn submit(&self, _task: TaskEnvelope) -> Result<(), QueueError> {
            Err(QueueError::Rejected("broker down".to_string()))
        }
    }

    struct Fixture {
        database: Database,
        site_id: i64,
        basket_id: i64,
    }

    async fn fixture(partner_enabled: bool) -> Fixture {
        let database = Database::connect("sqlite::memory:?cache=shared")
            .await
            .expect("connect");
        database.run_migrations().await.expect("migrations");

        let site = database
            .sites()
            .get_or_create("shop.example.com", "edx.org")
            .await
            .expect("site");
        let partner = database
            .partners()
            .get_or_create("edX", "edX")
            .await
            .expect("partner");
        let defaults: SiteConfigurationDefaults =
            serde_json::from_value(json!({ "lms_url_root": "https://lms.example.com" }))
                .expect("defaults");
        database
            .site_configurations()
            .get_or_create(site.record.id, partner.record.id, &defaults)
            .await
            .expect("configuration");
        database
            .partners()
            .set_sailthru_enabled("edX", partner_enabled)
            .await
            .expect("opt in");

        let basket: (i64,) = sqlx::query_as(
            "INSERT INTO baskets (site_id, owner_email, created_at) \
             VALUES (?, 'learner@example.com', '2024-01-01T00:00:00Z') RETURNING id",
        )
        .bind(site.record.id)
        .fetch_one(database.pool())
        .await
        .expect("basket");

        Fixture {
            database,
            site_id: site.record.id,
            basket_id: basket.0,
        }
    }

    fn notifier(
        fixture: &Fixture,
        enabled: bool,
        queue: Arc<dyn TaskQueue>,
    ) -> EnrollmentNotifier {
        EnrollmentNotifier::new(
            NotifierConfig {
                sailthru_enabled: enabled,
                broker_url: None,
            },
            fixture.database.clone(),
            queue,
        )
    }

    fn seat(price: Option<Decimal>) -> Product {
        Product {
            id: 11,
            title: "Seat in DemoX with verified certificate".to_string(),
            product_class: SEAT_PRODUCT_CLASS_NAME.to_string(),
            course_id: Some("course-v1:edX+DemoX+Demo".to_string()),
            attributes: ProductAttributes {
                certificate_type: Some("verified".to_string()),
                id_verification_required: Some(true),
            },
            stock_records: vec![StockRecord {
                partner_sku: "SKU-1".to_string(),
                price_excl_tax: price,
                price_currency: "USD".to_string(),
            }],
        }
    }

    fn coupon() -> Product {
        Product {
            id: 12,
            title: "Coupon".to_string(),
            product_class: "Coupon".to_string(),
            course_id: None,
            attributes: ProductAttributes::default(),
            stock_records: vec![StockRecord {
                partner_sku: "SKU-2".to_string(),
                price_excl_tax: Some(Decimal::new(100, 0)),
                price_currency: "USD".to_string(),
            }],
        }
    }

    fn customer() -> Option<Customer> {
        Some(Customer {
            email: "learner@example.com".to_string(),
            username: Some("learner".to_string()),
        })
    }

    fn addition(fixture: &Fixture, product: Product, cookie: Option<&str>) -> BasketAddition {
        let mut request = RequestContext::default();
        if let Some(cookie) = cookie {
            request = request.with_cookie(SAILTHRU_CAMPAIGN, cookie);
        }
        BasketAddition {
            site_id: fixture.site_id,
            product,
            user: customer(),
            basket_id: Some(fixture.basket_id),
            request,
        }
    }

    fn checkout(fixture: &Fixture, lines: Vec<OrderLine>, cookie: Option<&str>) -> CheckoutComplete {
        CheckoutComplete {
            order: Order {
                number: "EDX-100001".to_string(),
                site_id: fixture.site_id,
                basket_id: Some(fixture.basket_id),
                currency: "USD".to_string(),
                user: customer(),
                lines,
            },
            request: cookie
                .map(|value| RequestContext::default().with_cookie(SAILTHRU_CAMPAIGN, value)),
        }
    }

    fn seat_line(price: i64) -> OrderLine {
        OrderLine {
            product: seat(Some(Decimal::new(price, 0))),
            line_price_excl_tax: Decimal::new(price, 0),
        }
    }

    async fn stored_campaign(fixture: &Fixture) -> Option<String> {
        let attributes = fixture.database.basket_attributes();
        let attribute_type = attributes
            .get_or_create_type(SAILTHRU_CAMPAIGN)
            .await
            .expect("type");
        attributes
            .fetch_value(fixture.basket_id, attribute_type.record.id)
            .await
            .expect("value")
    }

    #[tokio::test]
    async fn basket_addition_submits_cart_update() {
        let fixture = fixture(true).await;
        let queue = Arc::new(RecordingQueue::default());
        let notifier = notifier(&fixture, true, queue.clone());

        let outcome = notifier
            .process_basket_addition(&addition(&fixture, seat(Some(Decimal::new(4999, 2))), Some("cmp-1")))
            .await;

        assert_eq!(outcome, NotifyOutcome::submitted(1));
        let tasks = queue.tasks();
        assert_eq!(tasks.len(), 1);
        let task = &tasks[0];
        assert_eq!(task.args[0], json!("learner@example.com"));
        assert_eq!(
            task.args[1],
            json!("https://lms.example.com/courses/course-v1:edX+DemoX+Demo/info")
        );
        assert_eq!(task.args[2], json!(true));
        assert_eq!(task.args[3], json!("verified"));
        assert_eq!(task.kwargs["unit_cost"], json!(49.99));
        assert_eq!(task.kwargs["currency"], json!("USD"));
        assert_eq!(task.kwargs["site_code"], json!("edX"));
        assert_eq!(task.kwargs["message_id"], json!("cmp-1"));
    }

    #[tokio::test]
    async fn basket_addition_ignores_non_seat_products() {
        let fixture = fixture(true).await;
        let queue = Arc::new(RecordingQueue::default());
        let notifier = notifier(&fixture, true, queue.clone());

        let outcome = notifier
            .process_basket_addition(&addition(&fixture, coupon(), Some("cmp-1")))
            .await;

        assert_eq!(outcome, NotifyOutcome::skipped("not_a_seat"));
        assert!(queue.tasks().is_empty());
        assert_eq!(stored_campaign(&fixture).await, None);
    }

    #[tokio::test]
    async fn basket_addition_ignores_free_seats() {
        let fixture = fixture(true).await;
        let queue = Arc::new(RecordingQueue::default());
        let notifier = notifier(&fixture, true, queue.clone());

        let mut no_stock = seat(None);
        no_stock.stock_records.clear();
        for product in [seat(Some(Decimal::ZERO)), seat(None), no_stock] {
            let outcome = notifier
                .process_basket_addition(&addition(&fixture, product, Some("cmp-1")))
                .await;
            assert_eq!(outcome, NotifyOutcome::skipped("free_item"));
        }

        assert!(queue.tasks().is_empty());
    }

    #[tokio::test]
    async fn basket_addition_stores_cookie_on_basket() {
        let fixture = fixture(true).await;
        let queue = Arc::new(RecordingQueue::default());
        let notifier = notifier(&fixture, true, queue.clone());

        notifier
            .process_basket_addition(&addition(&fixture, seat(Some(Decimal::new(10, 0))), Some("first")))
            .await;
        assert_eq!(stored_campaign(&fixture).await.as_deref(), Some("first"));

        notifier
            .process_basket_addition(&addition(&fixture, seat(Some(Decimal::new(10, 0))), Some("second")))
            .await;
        assert_eq!(stored_campaign(&fixture).await.as_deref(), Some("second"));
        assert_eq!(queue.tasks().len(), 2);
    }

    #[tokio::test]
    async fn basket_addition_without_cookie_keeps_stored_value() {
        let fixture = fixture(true).await;
        let queue = Arc::new(RecordingQueue::default());
        let notifier = notifier(&fixture, true, queue.clone());

        notifier
            .process_basket_addition(&addition(&fixture, seat(Some(Decimal::new(10, 0))), Some("first")))
            .await;
        notifier
            .process_basket_addition(&addition(&fixture, seat(Some(Decimal::new(10, 0))), None))
            .await;

        assert_eq!(stored_campaign(&fixture).await.as_deref(), Some("first"));
        assert_eq!(queue.tasks()[1].kwargs["message_id"], serde_json::Value::Null);
    }

    #[tokio::test]
    async fn disabled_switch_submits_nothing() {
        let fixture = fixture(true).await;
        let queue = Arc::new(RecordingQueue::default());
        let notifier = notifier(&fixture, false, queue.clone());

        let basket = notifier
            .process_basket_addition(&addition(&fixture, seat(Some(Decimal::new(10, 0))), Some("cmp-1")))
            .await;
        let order = notifier
            .process_checkout_complete(&checkout(&fixture, vec![seat_line(10)], Some("cmp-1")))
            .await;

        assert_eq!(basket, NotifyOutcome::skipped("switch_disabled"));
        assert_eq!(order, NotifyOutcome::skipped("switch_disabled"));
        assert!(queue.tasks().is_empty());
        assert_eq!(stored_campaign(&fixture).await, None);
    }

    #[tokio::test]
    async fn partner_opt_out_submits_nothing() {
        let fixture = fixture(false).await;
        let queue = Arc::new(RecordingQueue::default());
        let notifier = notifier(&fixture, true, queue.clone());

        let outcome = notifier
            .handle(&LifecycleEvent::BasketAddition(addition(
                &fixture,
                seat(Some(Decimal::new(10, 0))),
                None,
            )))
            .await;

        assert_eq!(outcome, NotifyOutcome::skipped("partner_disabled"));
        assert!(queue.tasks().is_empty());
    }

    #[tokio::test]
    async fn checkout_falls_back_to_stored_campaign() {
        let fixture = fixture(true).await;
        let queue = Arc::new(RecordingQueue::default());
        let notifier = notifier(&fixture, true, queue.clone());
        let attributes = fixture.database.basket_attributes();
        let attribute_type = attributes.get_or_create_type(SAILTHRU_CAMPAIGN).await.unwrap();
        attributes
            .upsert(fixture.basket_id, attribute_type.record.id, "abc123")
            .await
            .unwrap();

        let outcome = notifier
            .process_checkout_complete(&checkout(&fixture, vec![seat_line(25)], None))
            .await;

        assert_eq!(outcome, NotifyOutcome::submitted(1));
        let tasks = queue.tasks();
        assert_eq!(tasks[0].args[2], json!(false));
        assert_eq!(tasks[0].kwargs["message_id"], json!("abc123"));
        assert_eq!(tasks[0].kwargs["unit_cost"], json!(25.0));
    }

    #[tokio::test]
    async fn checkout_cookie_wins_over_stored_campaign() {
        let fixture = fixture(true).await;
        let queue = Arc::new(RecordingQueue::default());
        let notifier = notifier(&fixture, true, queue.clone());
        let attributes = fixture.database.basket_attributes();
        let attribute_type = attributes.get_or_create_type(SAILTHRU_CAMPAIGN).await.unwrap();
        attributes
            .upsert(fixture.basket_id, attribute_type.record.id, "stored")
            .await
            .unwrap();

        notifier
            .process_checkout_complete(&checkout(&fixture, vec![seat_line(25)], Some("fresh")))
            .await;

        assert_eq!(queue.tasks()[0].kwargs["message_id"], json!("fresh"));
    }

    #[tokio::test]
    async fn checkout_submits_one_task_per_seat_line() {
        let fixture = fixture(true).await;
        let queue = Arc::new(RecordingQueue::default());
        let issued_at = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap();
        let notifier =
            notifier(&fixture, true, queue.clone()).with_clock(Arc::new(move || issued_at));
        let lines = vec![
            seat_line(25),
            OrderLine {
                product: coupon(),
                line_price_excl_tax: Decimal::new(100, 0),
            },
            seat_line(40),
        ];

        let outcome = notifier
            .process_checkout_complete(&checkout(&fixture, lines, None))
            .await;

        assert_eq!(outcome, NotifyOutcome::submitted(2));
        let tasks = queue.tasks();
        assert_eq!(tasks.len(), 2);
        assert_eq!(tasks[0].kwargs["unit_cost"], json!(25.0));
        assert_eq!(tasks[1].kwargs["unit_cost"], json!(40.0));
        assert!(tasks.iter().all(|task| task.issued_at == issued_at));
        assert!(tasks.iter().all(|task| task.kwargs["message_id"].is_null()));
    }

    #[tokio::test]
    async fn checkout_without_seats_is_skipped() {
        let fixture = fixture(true).await;
        let queue = Arc::new(RecordingQueue::default());
        let notifier = notifier(&fixture, true, queue.clone());
        let lines = vec![OrderLine {
            product: coupon(),
            line_price_excl_tax: Decimal::new(100, 0),
        }];

        let outcome = notifier
            .process_checkout_complete(&checkout(&fixture, lines, None))
            .await;

        assert_eq!(outcome, NotifyOutcome::skipped("no_seat_lines"));
        assert!(queue.tasks().is_empty());
    }

    #[tokio::test]
    async fn queue_failure_is_swallowed() {
        let fixture = fixture(true).await;
        let notifier = notifier(&fixture, true, Arc::new(FailingQueue));

        let outcome = notifier
            .process_checkout_complete(&checkout(&fixture, vec![seat_line(25)], None))
            .await;

        assert_eq!(outcome.action, NotifyAction::Failed);
        assert!(outcome
            .reason
            .as_deref()
            .is_some_and(|reason| reason.contains("broker down")));
    }

    #[tokio::test]
    async fn unknown_site_is_swallowed() {
        let fixture = fixture(true).await;
        let queue = Arc::new(RecordingQueue::default());
        let notifier = notifier(&fixture, true, queue.clone());
        let mut event = addition(&fixture, seat(Some(Decimal::new(10, 0))), None);
        event.site_id = 9999;

        let outcome = notifier.process_basket_addition(&event).await;

        assert_eq!(outcome.action, NotifyAction::Failed);
        assert!(!outcome.is_submitted());
        assert!(queue.tasks().is_empty());
    }

    #[tokio::test]
    async fn anonymous_basket_addition_is_swallowed() {
        let fixture = fixture(true).await;
        let queue = Arc::new(RecordingQueue::default());
        let notifier = notifier(&fixture, true, queue.clone());
        let mut event = addition(&fixture, seat(Some(Decimal::new(10, 0))), Some("cmp-1"));
        event.user = None;

        let outcome = notifier.process_basket_addition(&event).await;

        assert_eq!(outcome.action, NotifyAction::Failed);
        assert!(queue.tasks().is_empty());
    }

    #[tokio::test]
    async fn broker_notifier_posts_one_task_per_seat_line() {
        use httpmock::prelude::*;

        let fixture = fixture(true).await;
        let server = MockServer::start_async().await;
        let mock = server
            .mock_async(|when, then| {
                when.method(POST)
                    .path("/tasks")
                    .json_body_partial(
                        json!({ "kwargs": { "site_code": "edX", "course_id": "course-v1:edX+DemoX+Demo" } })
                            .to_string(),
                    );
                then.status(202);
            })
            .await;
        let config = NotifierConfig {
            sailthru_enabled: true,
            broker_url: Some(url::Url::parse(&server.url("/tasks")).expect("url")),
        };

        let (notifier, queue) =
            EnrollmentNotifier::with_broker(config, fixture.database.clone()).expect("notifier");
        let outcome = notifier
            .handle(&LifecycleEvent::CheckoutComplete(checkout(
                &fixture,
                vec![seat_line(25), seat_line(40)],
                Some("cmp-1"),
            )))
            .await;
        queue.flush().await;

        assert_eq!(outcome, NotifyOutcome::submitted(2));
        assert_eq!(mock.hits_async().await, 2);
    }

    #[tokio::test]
    async fn broker_notifier_requires_broker_url() {
        let fixture = fixture(true).await;

        let err = EnrollmentNotifier::with_broker(
            NotifierConfig {
                sailthru_enabled: true,
                broker_url: None,
            },
            fixture.database,
        )
        .err();
        assert!(matches!(err, Some(QueueError::NotConfigured)));
    }

    #[test]
    fn encode_failure_is_reported_as_failed() {
        let encode_error = serde_json::from_str::<serde_json::Value>("{").unwrap_err();

        let outcome = finish(
            "checkout_complete",
            ORDER_COMPLETION_FAILURE,
            Err(NotifyError::from(encode_error)),
        );

        assert_eq!(outcome.action, NotifyAction::Failed);
        assert!(outcome
            .reason
            .as_deref()
            .is_some_and(|reason| reason.starts_with("failed to encode task")));
    }
}
