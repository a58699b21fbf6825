use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use url::Url;

use crate::config;

/// key: billing-adapter -> provider integration seam

/// Invoice record as the provider returns it; timestamps are epoch seconds.
#[derive(Debug, Clone, Deserialize)]
pub struct ProviderInvoice {
    pub id: String,
    #[serde(default)]
    pub number: Option<String>,
    #[serde(default)]
    pub subscription: Option<String>,
    pub status: String,
    #[serde(default)]
    pub period_start: Option<i64>,
    #[serde(default)]
    pub period_end: Option<i64>,
    pub total: i64,
    #[serde(default)]
    pub tax: Option<i64>,
    pub amount_due: i64,
    pub currency: String,
    #[serde(default)]
    pub hosted_invoice_url: Option<String>,
    #[serde(default)]
    pub invoice_pdf: Option<String>,
    pub created: i64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ProviderPrice {
    pub id: String,
    pub unit_amount: i64,
    pub currency: String,
}

#[derive(Debug, Deserialize)]
struct ListEnvelope<T> {
    data: Vec<T>,
}

#[derive(Debug, Deserialize)]
struct CreatedPrice {
    id: String,
}

#[async_trait]
pub trait BillingProviderAdapter: Send + Sync {
    async fn list_invoices(&self, limit: u32) -> Result<Vec<ProviderInvoice>>;

    /// Looks for a price object equivalent to the product's current price.
    /// Prices are immutable provider-side; equivalence is lookup key plus
    /// amount plus currency.
    async fn find_equivalent_price(
        &self,
        lookup_key: &str,
        amount_cents: i64,
        currency: &str,
    ) -> Result<Option<String>>;

    async fn create_price(
        &self,
        lookup_key: &str,
        nickname: &str,
        amount_cents: i64,
        currency: &str,
    ) -> Result<String>;

    async fn cancel_subscription(
        &self,
        provider_subscription_id: &str,
        at_period_end: bool,
    ) -> Result<()>;
}

/// Stand-in used when no provider credentials are configured: the console
/// still serves its mirrors, and any action that would reach the provider
/// fails with a plain message.
pub struct UnconfiguredAdapter;

#[async_trait]
impl BillingProviderAdapter for UnconfiguredAdapter {
    async fn list_invoices(&self, _limit: u32) -> Result<Vec<ProviderInvoice>> {
        Err(anyhow!("billing provider is not configured"))
    }

    async fn find_equivalent_price(
        &self,
        _lookup_key: &str,
        _amount_cents: i64,
        _currency: &str,
    ) -> Result<Option<String>> {
        Err(anyhow!("billing provider is not configured"))
    }

    async fn create_price(
        &self,
        _lookup_key: &str,
        _nickname: &str,
        _amount_cents: i64,
        _currency: &str,
    ) -> Result<String> {
        Err(anyhow!("billing provider is not configured"))
    }

    async fn cancel_subscription(
        &self,
        _provider_subscription_id: &str,
        _at_period_end: bool,
    ) -> Result<()> {
        Err(anyhow!("billing provider is not configured"))
    }
}

/// HTTP client for a Stripe-shaped provider API.
pub struct StripeLikeAdapter {
    client: Client,
    base_url: Url,
    api_key: String,
}

impl StripeLikeAdapter {
    pub fn from_env() -> Result<Self> {
        let api_key = config::BILLING_PROVIDER_API_KEY
            .clone()
            .ok_or_else(|| anyhow!("BILLING_PROVIDER_API_KEY is not configured"))?;
        Ok(Self::new(config::BILLING_PROVIDER_BASE_URL.clone(), api_key))
    }

    pub fn new(base_url: Url, api_key: String) -> Self {
        StripeLikeAdapter {
            client: Client::new(),
            base_url,
            api_key,
        }
    }

    fn endpoint(&self, path: &str) -> Result<Url> {
        let mut url = self.base_url.clone();
        {
            let mut segments = url
                .path_segments_mut()
                .map_err(|_| anyhow!("provider base URL cannot be a base"))?;
            for segment in path.split('/') {
                segments.push(segment);
            }
        }
        Ok(url)
    }
}

#[async_trait]
impl BillingProviderAdapter for StripeLikeAdapter {
    async fn list_invoices(&self, limit: u32) -> Result<Vec<ProviderInvoice>> {
        let mut url = self.endpoint("invoices")?;
        url.query_pairs_mut()
            .append_pair("limit", &limit.to_string());
        let envelope: ListEnvelope<ProviderInvoice> = self
            .client
            .get(url)
            .bearer_auth(&self.api_key)
            .send()
            .await?
            .error_for_status()
            .context("provider invoice listing failed")?
            .json()
            .await?;
        Ok(envelope.data)
    }

    async fn find_equivalent_price(
        &self,
        lookup_key: &str,
        amount_cents: i64,
        currency: &str,
    ) -> Result<Option<String>> {
        let mut url = self.endpoint("prices")?;
        url.query_pairs_mut()
            .append_pair("lookup_keys[]", lookup_key)
            .append_pair("active", "true");
        let envelope: ListEnvelope<ProviderPrice> = self
            .client
            .get(url)
            .bearer_auth(&self.api_key)
            .send()
            .await?
            .error_for_status()
            .context("provider price lookup failed")?
            .json()
            .await?;
        Ok(envelope
            .data
            .into_iter()
            .find(|price| {
                price.unit_amount == amount_cents && price.currency.eq_ignore_ascii_case(currency)
            })
            .map(|price| price.id))
    }

    async fn create_price(
        &self,
        lookup_key: &str,
        nickname: &str,
        amount_cents: i64,
        currency: &str,
    ) -> Result<String> {
        let url = self.endpoint("prices")?;
        let form = [
            ("lookup_key", lookup_key.to_string()),
            ("nickname", nickname.to_string()),
            ("unit_amount", amount_cents.to_string()),
            ("currency", currency.to_string()),
            ("recurring[interval]", "month".to_string()),
        ];
        let created: CreatedPrice = self
            .client
            .post(url)
            .bearer_auth(&self.api_key)
            .form(&form)
            .send()
            .await?
            .error_for_status()
            .context("provider price creation failed")?
            .json()
            .await?;
        Ok(created.id)
    }

    async fn cancel_subscription(
        &self,
        provider_subscription_id: &str,
        at_period_end: bool,
    ) -> Result<()> {
        if at_period_end {
            let url = self.endpoint(&format!("subscriptions/{provider_subscription_id}"))?;
            self.client
                .post(url)
                .bearer_auth(&self.api_key)
                .form(&[("cancel_at_period_end", "true")])
                .send()
                .await?
                .error_for_status()
                .context("provider scheduled cancel failed")?;
        } else {
            let url = self.endpoint(&format!("subscriptions/{provider_subscription_id}"))?;
            self.client
                .delete(url)
                .bearer_auth(&self.api_key)
                .send()
                .await?
                .error_for_status()
                .context("provider immediate cancel failed")?;
        }
        Ok(())
    }
}
