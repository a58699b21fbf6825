pub mod auth;
pub mod billing;
pub mod config;
pub mod customers;
pub mod delivery_orders;
pub mod error;
pub mod extractor;
pub mod media;
pub mod pagination;
pub mod products;
pub mod routes;
pub mod subscriptions;
pub mod webhooks;
