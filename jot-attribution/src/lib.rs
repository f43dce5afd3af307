mod sink;

pub use sink::{AttributionSink, SinkError, SinkTier};

use chrono::{DateTime, Utc};
use jot_core::{
    AttributionWindow, CoarseTier, ConversionEvent, ConversionUpdate, MAX_FINE_VALUE,
};
use jot_storage::{AttributionStore, StorageError};
use std::fmt;
use std::sync::{Arc, Mutex};
use thiserror::Error;
use tracing::{debug, info, warn};

pub const DEFAULT_LOCK_FINE_THRESHOLD: u8 = 2;

#[derive(Debug, Error)]
pub enum TrackerError {
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),
}

/// Lock-window policy. The install report always locks; for ordinary
/// events any fine value at or above the threshold locks the window
/// immediately, trading possible later higher-value signals for
/// attribution certainty.
#[derive(Debug, Clone, Copy)]
pub struct TrackerConfig {
    pub lock_fine_threshold: u8,
    pub lock_ordinary_events: bool,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            lock_fine_threshold: DEFAULT_LOCK_FINE_THRESHOLD,
            lock_ordinary_events: true,
        }
    }
}

/// What became of a report call. Reports are best-effort and never
/// surface errors to the caller; the outcome is returned for logging,
/// tests, and the CLI.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReportOutcome {
    Sent,
    AlreadyReported,
    WindowExpired,
    SinkUnavailable,
    InvalidValue,
    Failed,
}

impl ReportOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReportOutcome::Sent => "sent",
            ReportOutcome::AlreadyReported => "already_reported",
            ReportOutcome::WindowExpired => "window_expired",
            ReportOutcome::SinkUnavailable => "sink_unavailable",
            ReportOutcome::InvalidValue => "invalid_value",
            ReportOutcome::Failed => "failed",
        }
    }
}

impl fmt::Display for ReportOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Conversion attribution tracker. One instance per process lifetime,
/// shared as `Arc<ConversionTracker>`; report calls may come from the
/// UI interaction path and never block it beyond the policy decision.
pub struct ConversionTracker {
    store: Mutex<AttributionStore>,
    sink: Arc<dyn AttributionSink>,
    tier: Option<SinkTier>,
    config: TrackerConfig,
    install_ts: DateTime<Utc>,
    install_lock: tokio::sync::Mutex<()>,
}

impl ConversionTracker {
    /// Builds the process-wide tracker: loads or creates the install
    /// record, resolves the sink capability tier, registers for
    /// attribution, and attempts the one-time install report. Only
    /// storage failures abort construction; a dead or failing sink
    /// degrades to logged no-ops.
    pub async fn init(
        store: AttributionStore,
        sink: Arc<dyn AttributionSink>,
        config: TrackerConfig,
    ) -> Result<Arc<Self>, TrackerError> {
        let state = store.init_install(Utc::now())?;

        let tier = sink.probe();
        match tier {
            Some(tier) => {
                debug!(tier = tier.as_str(), "attribution sink resolved");
                sink.register();
            }
            None => warn!("attribution sink unavailable, conversion reporting disabled"),
        }

        let tracker = Arc::new(Self {
            store: Mutex::new(store),
            sink,
            tier,
            config,
            install_ts: state.install_ts,
            install_lock: tokio::sync::Mutex::new(()),
        });

        let outcome = tracker.report_install().await;
        debug!(outcome = outcome.as_str(), "install report attempted");

        Ok(tracker)
    }

    pub fn install_ts(&self) -> DateTime<Utc> {
        self.install_ts
    }

    pub fn current_window(&self) -> AttributionWindow {
        AttributionWindow::at(self.install_ts, Utc::now())
    }

    /// One-time install conversion report. The persisted flag only
    /// flips after a confirmed-successful send, so a failed attempt is
    /// retried on the next cold start; once flipped, the sink is never
    /// called for the install again.
    pub async fn report_install(&self) -> ReportOutcome {
        let _guard = self.install_lock.lock().await;

        let already_sent = {
            let Ok(store) = self.store.lock() else {
                warn!("attribution store lock poisoned, dropping install report");
                return ReportOutcome::Failed;
            };
            match store.load() {
                Ok(Some(state)) => state.install_postback_sent,
                Ok(None) => false,
                Err(err) => {
                    warn!(error = %err, "failed to read install state, dropping install report");
                    return ReportOutcome::Failed;
                }
            }
        };
        if already_sent {
            debug!("install conversion already reported, skipping");
            return ReportOutcome::AlreadyReported;
        }

        let update = ConversionUpdate::for_event(ConversionEvent::Install, true);
        let outcome = self.dispatch(update, Utc::now()).await;

        if outcome == ReportOutcome::Sent {
            let Ok(store) = self.store.lock() else {
                warn!("attribution store lock poisoned after install send");
                return outcome;
            };
            if let Err(err) = store.mark_install_reported() {
                // The next launch re-sends; the platform dedups on its side.
                warn!(error = %err, "install postback sent but flag not persisted");
            }
        }

        outcome
    }

    pub async fn report_note_created(&self, is_first_note: bool) -> ReportOutcome {
        let event = if is_first_note {
            ConversionEvent::FirstNoteCreated
        } else {
            ConversionEvent::NoteCreated
        };
        self.report_event_at(event, Utc::now()).await
    }

    pub async fn report_note_edited(&self) -> ReportOutcome {
        self.report_event_at(ConversionEvent::NoteEdited, Utc::now())
            .await
    }

    pub async fn report_multiple_notes_created(&self) -> ReportOutcome {
        self.report_event_at(ConversionEvent::MultipleNotesCreated, Utc::now())
            .await
    }

    /// The >= 5 notes threshold is the event producer's to enforce; the
    /// tracker reports whatever it is told.
    pub async fn report_active_user(&self) -> ReportOutcome {
        self.report_event_at(ConversionEvent::ActiveUser, Utc::now())
            .await
    }

    /// Escape hatch for values outside the fixed event set. Same window
    /// gating as every other report.
    pub async fn report_custom(
        &self,
        fine_value: u8,
        coarse_tier: CoarseTier,
        lock_window: bool,
    ) -> ReportOutcome {
        if fine_value > MAX_FINE_VALUE {
            warn!(fine_value, "custom conversion value out of range, dropped");
            return ReportOutcome::InvalidValue;
        }
        let update = ConversionUpdate {
            fine_value,
            coarse_tier,
            lock_window,
        };
        self.dispatch(update, Utc::now()).await
    }

    async fn report_event_at(&self, event: ConversionEvent, now: DateTime<Utc>) -> ReportOutcome {
        let update = ConversionUpdate::for_event(event, self.lock_window_for(event));
        self.dispatch(update, now).await
    }

    fn lock_window_for(&self, event: ConversionEvent) -> bool {
        if event == ConversionEvent::Install {
            return true;
        }
        self.config.lock_ordinary_events && event.fine_value() >= self.config.lock_fine_threshold
    }

    async fn dispatch(&self, update: ConversionUpdate, now: DateTime<Utc>) -> ReportOutcome {
        let Some(tier) = self.tier else {
            debug!(
                fine_value = update.fine_value,
                "conversion report dropped, sink unavailable"
            );
            return ReportOutcome::SinkUnavailable;
        };

        let window = AttributionWindow::at(self.install_ts, now);
        if window.is_expired() {
            debug!(
                fine_value = update.fine_value,
                "conversion report dropped, attribution window expired"
            );
            return ReportOutcome::WindowExpired;
        }

        let result = match tier {
            SinkTier::Full => self.sink.update_conversion_value(update).await,
            SinkTier::FineOnly => self.sink.update_fine_value(update.fine_value).await,
            SinkTier::LegacySync => {
                self.sink.update_fine_value_sync(update.fine_value);
                Ok(())
            }
        };

        match result {
            Ok(()) => {
                info!(
                    fine_value = update.fine_value,
                    coarse_tier = update.coarse_tier.as_str(),
                    lock_window = update.lock_window,
                    window = window.as_str(),
                    "conversion value reported"
                );
                ReportOutcome::Sent
            }
            Err(err) => {
                warn!(
                    error = %err,
                    fine_value = update.fine_value,
                    "conversion report failed"
                );
                ReportOutcome::Failed
            }
        }
    }

    // Fire-and-forget signal facade for the event producers. Each call
    // detaches onto the runtime; the outcome is logged inside the
    // report path. Invoked after the producer's own persistence commit.

    pub fn note_created(self: &Arc<Self>, is_first_note: bool) {
        let tracker = Arc::clone(self);
        tokio::spawn(async move {
            tracker.report_note_created(is_first_note).await;
        });
    }

    pub fn note_edited(self: &Arc<Self>) {
        let tracker = Arc::clone(self);
        tokio::spawn(async move {
            tracker.report_note_edited().await;
        });
    }

    pub fn multiple_notes_created(self: &Arc<Self>) {
        let tracker = Arc::clone(self);
        tokio::spawn(async move {
            tracker.report_multiple_notes_created().await;
        });
    }

    pub fn active_user_threshold_reached(self: &Arc<Self>) {
        let tracker = Arc::clone(self);
        tokio::spawn(async move {
            tracker.report_active_user().await;
        });
    }
}
