use once_cell::sync::Lazy;
use url::Url;

/// Secret used for JWT signing. Must be set via the `JWT_SECRET` env variable.
pub static JWT_SECRET: Lazy<String> =
    Lazy::new(|| std::env::var("JWT_SECRET").expect("JWT_SECRET must be set"));

/// Address the HTTP server should bind to. Defaults to `0.0.0.0`.
pub static BIND_ADDRESS: Lazy<String> =
    Lazy::new(|| std::env::var("BIND_ADDRESS").unwrap_or_else(|_| "0.0.0.0".to_string()));

/// Port the HTTP server should listen on. Defaults to `3000`.
pub static BIND_PORT: Lazy<u16> = Lazy::new(|| {
    std::env::var("BIND_PORT")
        .ok()
        .and_then(|value| value.parse::<u16>().ok())
        .unwrap_or(3000)
});

/// When set to a truthy value, allows the application to continue running even if database
/// migrations fail. Defaults to `false`.
pub static ALLOW_MIGRATION_FAILURE: Lazy<bool> = Lazy::new(|| {
    std::env::var("ALLOW_MIGRATION_FAILURE")
        .ok()
        .map(|value| {
            let normalized = value.trim().to_ascii_lowercase();
            matches!(normalized.as_str(), "1" | "true" | "yes")
        })
        .unwrap_or(false)
});

/// key: billing-config -> provider slug recorded on mirrored rows
pub static BILLING_PROVIDER: Lazy<String> =
    Lazy::new(|| std::env::var("BILLING_PROVIDER").unwrap_or_else(|_| "stripe".to_string()));

/// key: billing-config -> default settlement currency
pub static BILLING_CURRENCY: Lazy<String> = Lazy::new(|| {
    std::env::var("BILLING_CURRENCY")
        .ok()
        .map(|value| value.trim().to_ascii_lowercase())
        .filter(|value| !value.is_empty())
        .unwrap_or_else(|| "myr".to_string())
});

/// key: billing-config -> minimum subscription term in months
pub static BILLING_MIN_TERM_MONTHS: Lazy<i32> = Lazy::new(|| {
    std::env::var("BILLING_MIN_TERM_MONTHS")
        .ok()
        .and_then(|value| value.parse::<i32>().ok())
        .filter(|value| *value > 0)
        .unwrap_or(12)
});

/// key: billing-config -> SST rate in basis points (800 = 8%)
pub static BILLING_SST_RATE_BPS: Lazy<i64> = Lazy::new(|| {
    std::env::var("BILLING_SST_RATE_BPS")
        .ok()
        .and_then(|value| value.parse::<i64>().ok())
        .filter(|value| *value >= 0)
        .unwrap_or(800)
});

/// key: billing-config -> whether the provider computes tax automatically
pub static BILLING_AUTOMATIC_TAX: Lazy<bool> = Lazy::new(|| {
    std::env::var("BILLING_AUTOMATIC_TAX")
        .ok()
        .map(|value| matches!(value.trim().to_ascii_lowercase().as_str(), "1" | "true" | "yes"))
        .unwrap_or(false)
});

/// Provider tax-rate object applied when automatic tax is off.
pub static BILLING_MANUAL_TAX_RATE_ID: Lazy<Option<String>> =
    Lazy::new(|| read_optional_env("BILLING_MANUAL_TAX_RATE_ID"));

/// Base URL of the billing provider API. Parsed eagerly so a malformed value
/// fails at startup rather than on the first sync.
pub static BILLING_PROVIDER_BASE_URL: Lazy<Url> = Lazy::new(|| {
    let raw = std::env::var("BILLING_PROVIDER_BASE_URL")
        .unwrap_or_else(|_| "https://api.stripe.com/v1".to_string());
    Url::parse(&raw).unwrap_or_else(|err| panic!("invalid BILLING_PROVIDER_BASE_URL: {err}"))
});

/// Secret key presented to the billing provider API.
pub static BILLING_PROVIDER_API_KEY: Lazy<Option<String>> =
    Lazy::new(|| read_optional_env("BILLING_PROVIDER_API_KEY"));

/// Shared secret for verifying inbound provider webhook signatures.
pub static BILLING_WEBHOOK_SECRET: Lazy<Option<String>> =
    Lazy::new(|| read_optional_env("BILLING_WEBHOOK_SECRET"));

/// Directory product media is written under. Defaults to `media`.
pub static MEDIA_ROOT: Lazy<String> =
    Lazy::new(|| std::env::var("MEDIA_ROOT").unwrap_or_else(|_| "media".to_string()));

/// Public base URL media files are served from.
pub static MEDIA_PUBLIC_BASE_URL: Lazy<String> = Lazy::new(|| {
    std::env::var("MEDIA_PUBLIC_BASE_URL")
        .ok()
        .map(|value| value.trim_end_matches('/').to_string())
        .filter(|value| !value.is_empty())
        .unwrap_or_else(|| "/media".to_string())
});

/// Upload cap for product images, in bytes. Defaults to 5 MiB.
pub static MEDIA_IMAGE_MAX_BYTES: Lazy<usize> = Lazy::new(|| {
    std::env::var("MEDIA_IMAGE_MAX_BYTES")
        .ok()
        .and_then(|value| value.parse::<usize>().ok())
        .filter(|value| *value > 0)
        .unwrap_or(5 * 1024 * 1024)
});

/// Upload cap for product videos, in bytes. Defaults to 100 MiB.
pub static MEDIA_VIDEO_MAX_BYTES: Lazy<usize> = Lazy::new(|| {
    std::env::var("MEDIA_VIDEO_MAX_BYTES")
        .ok()
        .and_then(|value| value.parse::<usize>().ok())
        .filter(|value| *value > 0)
        .unwrap_or(100 * 1024 * 1024)
});

/// Cap on declared video duration, in seconds. Defaults to 120.
pub static MEDIA_VIDEO_MAX_SECONDS: Lazy<u32> = Lazy::new(|| {
    std::env::var("MEDIA_VIDEO_MAX_SECONDS")
        .ok()
        .and_then(|value| value.parse::<u32>().ok())
        .filter(|value| *value > 0)
        .unwrap_or(120)
});

fn read_optional_env(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}
