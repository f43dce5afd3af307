use async_trait::async_trait;
use jot_core::ConversionUpdate;
use std::fmt;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SinkError {
    #[error("attribution sink unavailable")]
    Unavailable,
    #[error("postback transport failure: {0}")]
    Transport(String),
    #[error("operation not supported by the resolved capability tier")]
    Unsupported,
}

/// Capability tiers of the OS attribution API, richest first. Which tier
/// a device offers depends on its OS version; the tracker probes once at
/// construction and never re-checks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SinkTier {
    /// Fine value + coarse tier + lock-window, with delivery feedback.
    Full,
    /// Fine value only, with delivery feedback.
    FineOnly,
    /// Synchronous fine-value update, no feedback. Treated as
    /// always-succeeding.
    LegacySync,
}

impl SinkTier {
    pub fn as_str(&self) -> &'static str {
        match self {
            SinkTier::Full => "full",
            SinkTier::FineOnly => "fine_only",
            SinkTier::LegacySync => "legacy_sync",
        }
    }
}

impl fmt::Display for SinkTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The OS attribution API surface. An implementation only has to fill in
/// the methods of the tier it reports from `probe`; the rest default to
/// `Unsupported` and are never called for that tier.
#[async_trait]
pub trait AttributionSink: Send + Sync {
    /// Richest capability tier the platform exposes, `None` when the
    /// attribution API is absent entirely.
    fn probe(&self) -> Option<SinkTier>;

    /// One-shot attribution registration at tracker init. Platforms that
    /// register implicitly keep the default no-op.
    fn register(&self) {}

    async fn update_conversion_value(
        &self,
        _update: ConversionUpdate,
    ) -> Result<(), SinkError> {
        Err(SinkError::Unsupported)
    }

    async fn update_fine_value(&self, _fine_value: u8) -> Result<(), SinkError> {
        Err(SinkError::Unsupported)
    }

    fn update_fine_value_sync(&self, _fine_value: u8) {}
}
