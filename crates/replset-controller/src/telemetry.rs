//! Logging setup and span constructors
//!
//! The reconciler never reaches for a global logger: it creates one span per
//! resource with [`reconcile_span`] and hands it down to every component.
//! Hosts install a subscriber once with [`init`].

use serde::{Deserialize, Serialize};
use std::sync::Once;
use tracing::Span;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

static INIT: Once = Once::new();

/// Log output format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    Json,
    #[default]
    Pretty,
}

/// Install the global subscriber
///
/// `RUST_LOG` wins over `default_directive`. Later calls are no-ops, and an
/// already installed subscriber is left alone.
pub fn init(format: LogFormat, default_directive: &str) {
    INIT.call_once(|| {
        let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_directive));
        let result = match format {
            LogFormat::Json => tracing_subscriber::registry()
                .with(filter)
                .with(fmt::layer().json())
                .try_init(),
            LogFormat::Pretty => tracing_subscriber::registry()
                .with(filter)
                .with(fmt::layer().pretty())
                .try_init(),
        };
        if let Err(e) = result {
            tracing::debug!(error = %e, "subscriber already installed");
        }
    });
}

/// Span covering one reconciliation pass of one resource
#[must_use]
pub fn reconcile_span(namespace: &str, name: &str) -> Span {
    tracing::info_span!("reconcile", namespace = namespace, name = name)
}
