//! Router and firewall discovery adapters.
//!
//! Each adapter polls one vendor's management interface and reports
//! what it saw as source batches for the merge engine. Adapters never
//! fail: HTTP and parse errors are logged and produce empty batches,
//! so one dead router cannot stall a poll round.

pub mod ddwrt;
pub mod fortigate;
pub mod openwrt;
pub mod table_scrape;

use std::future::Future;
use std::pin::Pin;

use anyhow::{Context, Result};
use serde_json::Value;

use crate::config::{RouterConfig, RouterKind, ADAPTER_HTTP_TIMEOUT};
use crate::merge::SourceBatch;

pub use ddwrt::DdwrtAdapter;
pub use fortigate::FortigateAdapter;
pub use openwrt::OpenwrtAdapter;
pub use table_scrape::{ScrapeProfile, TableScrapeAdapter};

/// One polled discovery source.
pub trait DeviceSource: Send + Sync {
    /// Adapter label for logs.
    fn name(&self) -> &str;

    /// Source batches in merge priority order. Never fails; errors are
    /// absorbed and logged, yielding partial or empty batches.
    fn discover<'a>(&'a self) -> Pin<Box<dyn Future<Output = Vec<SourceBatch>> + Send + 'a>>;
}

/// Build the adapter for one configured router.
pub fn source_for(config: &RouterConfig) -> Result<Box<dyn DeviceSource>> {
    let source: Box<dyn DeviceSource> = match config.kind {
        RouterKind::Ddwrt => Box::new(DdwrtAdapter::new(config)?),
        RouterKind::Openwrt => Box::new(OpenwrtAdapter::new(config)?),
        RouterKind::Fortigate => Box::new(FortigateAdapter::new(config)?),
        RouterKind::Generic => Box::new(TableScrapeAdapter::new(config, ScrapeProfile::Generic)?),
        RouterKind::Bezeq => Box::new(TableScrapeAdapter::new(config, ScrapeProfile::Bezeq)?),
        RouterKind::Partner => Box::new(TableScrapeAdapter::new(config, ScrapeProfile::Partner)?),
    };
    Ok(source)
}

/// Shared HTTP client for adapter requests.
pub(crate) fn build_client(verify_tls: bool) -> Result<reqwest::Client> {
    reqwest::Client::builder()
        .timeout(ADAPTER_HTTP_TIMEOUT)
        .danger_accept_invalid_certs(!verify_tls)
        .build()
        .context("Failed to build HTTP client")
}

/// First non-empty string among `keys` in a JSON object. Vendor APIs
/// disagree on field names; every adapter resolves them through this
/// one ordered-synonym lookup.
pub(crate) fn first_str(entry: &Value, keys: &[&str]) -> String {
    for key in keys {
        if let Some(text) = entry.get(*key).and_then(|value| value.as_str()) {
            if !text.is_empty() {
                return text.to_string();
            }
        }
    }
    String::new()
}
