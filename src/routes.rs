use axum::{
    routing::{get, patch, post, put},
    Router,
};

use crate::{
    auth, billing, customers, delivery_orders, media, products, subscriptions, webhooks,
};

pub fn api_routes() -> Router {
    Router::new()
        .route("/api/register", post(auth::register_user))
        .route("/api/login", post(auth::login_user))
        .route("/api/logout", post(auth::logout_user))
        .route("/api/me", get(auth::current_user))
        .route("/api/customers", get(customers::list_customers))
        .route(
            "/api/customers/:id",
            get(customers::get_customer).delete(customers::delete_customer),
        )
        .route("/api/customers/:id/profile", put(customers::upsert_profile))
        .route("/api/customers/:id/company", put(customers::upsert_company))
        .route(
            "/api/products",
            get(products::list_products).post(products::create_product),
        )
        .route("/api/products/export", get(products::export_products_csv))
        .route("/api/products/import", post(products::import_products_csv))
        .route(
            "/api/products/:id",
            get(products::get_product)
                .patch(products::update_product)
                .delete(products::delete_product),
        )
        .route("/api/products/:id/publish", post(products::publish_product))
        .route(
            "/api/products/:id/deactivate",
            post(products::deactivate_product),
        )
        .route("/api/products/:id/stock", post(products::adjust_stock))
        .route("/api/media", post(media::upload_media))
        .route("/api/subscriptions", get(subscriptions::list_subscriptions))
        .route("/api/subscriptions/:id", get(subscriptions::get_subscription))
        .route(
            "/api/subscriptions/:id/actions",
            post(subscriptions::dispatch_action),
        )
        .route(
            "/api/subscriptions/:id/recompute-totals",
            post(subscriptions::recompute_totals),
        )
        .route(
            "/api/delivery-orders",
            get(delivery_orders::list_delivery_orders),
        )
        .route(
            "/api/delivery-orders/:id",
            get(delivery_orders::get_delivery_order),
        )
        .route(
            "/api/delivery-orders/:id/status",
            patch(delivery_orders::update_status),
        )
        .route("/api/billing/invoices", get(billing::api::list_invoices))
        .route(
            "/api/billing/invoices/backfill",
            post(billing::api::backfill_invoices),
        )
        .route(
            "/api/billing/webhook-events",
            get(billing::api::list_webhook_events),
        )
        .route("/api/billing/config", get(billing::api::get_runtime_config))
        .route("/api/billing/catalog/sync", post(billing::api::sync_catalog))
        .route(
            "/api/billing/webhooks",
            post(webhooks::ingest_billing_webhook),
        )
}
