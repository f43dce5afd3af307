use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

pub const WINDOW0_MAX_DAYS: i64 = 2;
pub const WINDOW1_MAX_DAYS: i64 = 7;
pub const WINDOW2_MAX_DAYS: i64 = 35;

/// Largest fine value the platform's conversion register can carry.
pub const MAX_FINE_VALUE: u8 = 63;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord)]
#[serde(rename_all = "lowercase")]
pub enum CoarseTier {
    Low,
    Medium,
    High,
}

impl CoarseTier {
    pub fn as_str(&self) -> &'static str {
        match self {
            CoarseTier::Low => "low",
            CoarseTier::Medium => "medium",
            CoarseTier::High => "high",
        }
    }
}

impl fmt::Display for CoarseTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CoarseTier {
    type Err = String;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        let normalized = input.trim().to_lowercase();
        match normalized.as_str() {
            "low" => Ok(CoarseTier::Low),
            "medium" => Ok(CoarseTier::Medium),
            "high" => Ok(CoarseTier::High),
            other => Err(format!("Unknown coarse tier: {other}")),
        }
    }
}

/// Closed set of application events the tracker can convert into a
/// conversion-value update. The fine value and coarse tier per variant
/// are fixed; producers pick the variant, never the numbers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConversionEvent {
    NoteCreated,
    FirstNoteCreated,
    NoteEdited,
    MultipleNotesCreated,
    ActiveUser,
    Install,
}

impl ConversionEvent {
    pub fn fine_value(&self) -> u8 {
        match self {
            ConversionEvent::NoteCreated => 1,
            ConversionEvent::FirstNoteCreated => 2,
            ConversionEvent::NoteEdited => 3,
            ConversionEvent::MultipleNotesCreated => 4,
            ConversionEvent::ActiveUser => 5,
            ConversionEvent::Install => 1,
        }
    }

    pub fn coarse_tier(&self) -> CoarseTier {
        match self {
            ConversionEvent::NoteCreated => CoarseTier::Low,
            ConversionEvent::FirstNoteCreated => CoarseTier::Medium,
            ConversionEvent::NoteEdited => CoarseTier::Low,
            ConversionEvent::MultipleNotesCreated => CoarseTier::Medium,
            ConversionEvent::ActiveUser => CoarseTier::High,
            ConversionEvent::Install => CoarseTier::Low,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ConversionEvent::NoteCreated => "note_created",
            ConversionEvent::FirstNoteCreated => "first_note_created",
            ConversionEvent::NoteEdited => "note_edited",
            ConversionEvent::MultipleNotesCreated => "multiple_notes_created",
            ConversionEvent::ActiveUser => "active_user",
            ConversionEvent::Install => "install",
        }
    }
}

impl fmt::Display for ConversionEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ConversionEvent {
    type Err = String;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        let normalized = input.trim().to_lowercase().replace('-', "_");
        match normalized.as_str() {
            "note_created" => Ok(ConversionEvent::NoteCreated),
            "first_note_created" | "first_note" => Ok(ConversionEvent::FirstNoteCreated),
            "note_edited" => Ok(ConversionEvent::NoteEdited),
            "multiple_notes_created" | "multiple_notes" => Ok(ConversionEvent::MultipleNotesCreated),
            "active_user" => Ok(ConversionEvent::ActiveUser),
            "install" => Ok(ConversionEvent::Install),
            other => Err(format!("Unknown conversion event: {other}")),
        }
    }
}

/// Attribution window derived from the elapsed time since install.
/// Always recomputed from timestamps, never stored.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum AttributionWindow {
    Window0,
    Window1,
    Window2,
    Expired,
}

impl AttributionWindow {
    pub fn at(install_ts: DateTime<Utc>, now: DateTime<Utc>) -> Self {
        Self::for_elapsed(now.signed_duration_since(install_ts))
    }

    /// Window boundaries are inclusive at each edge: exactly 2 days is
    /// still `Window0`. Negative elapsed time (clock adjusted backwards
    /// past the install instant) clamps to `Window0`.
    pub fn for_elapsed(elapsed: Duration) -> Self {
        if elapsed <= Duration::days(WINDOW0_MAX_DAYS) {
            AttributionWindow::Window0
        } else if elapsed <= Duration::days(WINDOW1_MAX_DAYS) {
            AttributionWindow::Window1
        } else if elapsed <= Duration::days(WINDOW2_MAX_DAYS) {
            AttributionWindow::Window2
        } else {
            AttributionWindow::Expired
        }
    }

    pub fn is_expired(&self) -> bool {
        matches!(self, AttributionWindow::Expired)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            AttributionWindow::Window0 => "window0",
            AttributionWindow::Window1 => "window1",
            AttributionWindow::Window2 => "window2",
            AttributionWindow::Expired => "expired",
        }
    }
}

impl fmt::Display for AttributionWindow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Payload handed to the attribution sink.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct ConversionUpdate {
    pub fine_value: u8,
    pub coarse_tier: CoarseTier,
    pub lock_window: bool,
}

impl ConversionUpdate {
    pub fn for_event(event: ConversionEvent, lock_window: bool) -> Self {
        Self {
            fine_value: event.fine_value(),
            coarse_tier: event.coarse_tier(),
            lock_window,
        }
    }
}
