//! Domain types shared by the storefront tenancy bootstrap and the marketing notifier.

pub mod descriptor;
pub mod seat;
pub mod types;
