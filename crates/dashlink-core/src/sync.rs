//! Cross-chart synchronization types.

use crate::error::{CoreError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;

/// One synchronizable aspect of chart state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum SyncMode {
    Time,
    Zoom,
    Pan,
    Crosshair,
    Selection,
    DataRange,
}

impl SyncMode {
    pub const ALL: [SyncMode; 6] = [
        Self::Time,
        Self::Zoom,
        Self::Pan,
        Self::Crosshair,
        Self::Selection,
        Self::DataRange,
    ];

    /// Modes restored from the master during a full resync.
    ///
    /// Crosshair and selection are momentary and never replayed.
    pub const DURABLE: [SyncMode; 3] = [Self::Time, Self::Zoom, Self::Pan];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Time => "time",
            Self::Zoom => "zoom",
            Self::Pan => "pan",
            Self::Crosshair => "crosshair",
            Self::Selection => "selection",
            Self::DataRange => "dataRange",
        }
    }
}

impl fmt::Display for SyncMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Per-chart sync enable flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncModes {
    #[serde(default = "default_true")]
    pub time: bool,
    #[serde(default = "default_true")]
    pub zoom: bool,
    #[serde(default = "default_true")]
    pub pan: bool,
    #[serde(default = "default_true")]
    pub crosshair: bool,
    #[serde(default = "default_true")]
    pub selection: bool,
    #[serde(default)]
    pub data_range: bool,
}

fn default_true() -> bool {
    true
}

impl Default for SyncModes {
    fn default() -> Self {
        Self {
            time: true,
            zoom: true,
            pan: true,
            crosshair: true,
            selection: true,
            data_range: false,
        }
    }
}

impl SyncModes {
    pub fn all() -> Self {
        Self {
            time: true,
            zoom: true,
            pan: true,
            crosshair: true,
            selection: true,
            data_range: true,
        }
    }

    pub fn none() -> Self {
        Self {
            time: false,
            zoom: false,
            pan: false,
            crosshair: false,
            selection: false,
            data_range: false,
        }
    }

    /// Only the given modes enabled.
    pub fn only(modes: &[SyncMode]) -> Self {
        let mut flags = Self::none();
        for mode in modes {
            flags.set(*mode, true);
        }
        flags
    }

    pub fn is_enabled(&self, mode: SyncMode) -> bool {
        match mode {
            SyncMode::Time => self.time,
            SyncMode::Zoom => self.zoom,
            SyncMode::Pan => self.pan,
            SyncMode::Crosshair => self.crosshair,
            SyncMode::Selection => self.selection,
            SyncMode::DataRange => self.data_range,
        }
    }

    pub fn set(&mut self, mode: SyncMode, enabled: bool) {
        let flag = match mode {
            SyncMode::Time => &mut self.time,
            SyncMode::Zoom => &mut self.zoom,
            SyncMode::Pan => &mut self.pan,
            SyncMode::Crosshair => &mut self.crosshair,
            SyncMode::Selection => &mut self.selection,
            SyncMode::DataRange => &mut self.data_range,
        };
        *flag = enabled;
    }

    /// Enabled modes in declaration order.
    pub fn enabled(&self) -> Vec<SyncMode> {
        SyncMode::ALL
            .into_iter()
            .filter(|mode| self.is_enabled(*mode))
            .collect()
    }
}

/// Visible time window in epoch milliseconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TimeRange {
    pub start: i64,
    pub end: i64,
}

impl TimeRange {
    pub fn new(start: i64, end: i64) -> Result<Self> {
        if end < start {
            return Err(CoreError::InvalidTimeRange { start, end });
        }
        Ok(Self { start, end })
    }

    pub fn duration_ms(&self) -> i64 {
        self.end - self.start
    }
}

/// Horizontal/vertical pan offset in chart units.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct PanOffset {
    pub x: f64,
    pub y: f64,
}

/// Crosshair location. `price` is absent when the pointer is outside the plot.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CrosshairPosition {
    pub time: i64,
    pub price: Option<f64>,
}

/// Selected time span.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Selection {
    pub start: i64,
    pub end: i64,
}

/// Visible value range on the price axis.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DataRange {
    pub min: f64,
    pub max: f64,
}

/// A state change reported by one chart and applied to others.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "camelCase")]
pub enum SyncOperation {
    TimeRange(TimeRange),
    Zoom(f64),
    Pan(PanOffset),
    /// `None` hides the crosshair.
    Crosshair(Option<CrosshairPosition>),
    /// `None` clears the selection.
    Selection(Option<Selection>),
    DataRange(DataRange),
}

impl SyncOperation {
    /// The sync mode gating this operation.
    pub fn mode(&self) -> SyncMode {
        match self {
            Self::TimeRange(_) => SyncMode::Time,
            Self::Zoom(_) => SyncMode::Zoom,
            Self::Pan(_) => SyncMode::Pan,
            Self::Crosshair(_) => SyncMode::Crosshair,
            Self::Selection(_) => SyncMode::Selection,
            Self::DataRange(_) => SyncMode::DataRange,
        }
    }
}
