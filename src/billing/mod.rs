pub mod adapters;
pub mod api;
pub mod models;
pub mod service;

pub use adapters::{
    BillingProviderAdapter, ProviderInvoice, StripeLikeAdapter, UnconfiguredAdapter,
};
pub use models::{
    BillingInvoice, BillingRuntimeConfig, BillingWebhookEvent, CatalogSyncReport,
    InvoiceBackfillReport, InvoiceStatus, SyncOutcome, WebhookEventStatus,
};
pub use service::{map_provider_subscription_status, BillingService};
