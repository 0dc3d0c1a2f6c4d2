//! Marketing notifications for basket and checkout lifecycle events.

pub mod notifier;
pub mod queue;

pub use notifier::{EnrollmentNotifier, NotifyAction, NotifyError, NotifyOutcome};
pub use queue::{BrokerQueue, DeliveryError, QueueError, TaskQueue};
