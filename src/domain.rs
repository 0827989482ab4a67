//! Values exchanged with the hub: play modes, arrangements and steps.

use core::fmt;
use core::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Match-start variant. Each mode maps to the verb invoked on the hub.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PlayMode {
    /// Real match against another player.
    Fight,
    /// Match against the server's test opponent.
    Debug,
    /// Debug match where the server enforces turn timeouts.
    DebugTimeout,
}

impl PlayMode {
    pub const ALL: [PlayMode; 3] = [PlayMode::Fight, PlayMode::Debug, PlayMode::DebugTimeout];

    pub const fn verb(self) -> &'static str {
        match self {
            PlayMode::Fight => "Fight",
            PlayMode::Debug => "Debug",
            PlayMode::DebugTimeout => "DebugTimeout",
        }
    }
}

impl fmt::Display for PlayMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.verb())
    }
}

impl FromStr for PlayMode {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "fight" => Ok(PlayMode::Fight),
            "debug" => Ok(PlayMode::Debug),
            "debugtimeout" | "debug-timeout" | "debug_timeout" => Ok(PlayMode::DebugTimeout),
            other => Err(anyhow::anyhow!("unknown play mode: {}", other)),
        }
    }
}

/// Errors reported by [`Arrangement::validate`] and [`Step::validate`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LayoutError {
    #[error("arrangement has {rows} rows, expected {expected}")]
    RowCount { rows: usize, expected: usize },
    #[error("arrangement row {row} has {cols} cells, expected {expected}")]
    RowLength { row: usize, cols: usize, expected: usize },
    #[error("arrangement cell ({row}, {col}) holds {value}, expected 0 or 1")]
    CellValue { row: usize, col: usize, value: u8 },
    #[error("step ({x}, {y}) is outside 0..{size}")]
    StepOutOfRange { x: u8, y: u8, size: usize },
}

/// Initial unit placement, row-major. Serializes as a nested JSON array.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Arrangement {
    rows: Vec<Vec<u8>>,
}

impl Arrangement {
    pub fn new(rows: Vec<Vec<u8>>) -> Self {
        Self { rows }
    }

    /// Square grid of the given size with every cell empty.
    pub fn empty(size: usize) -> Self {
        Self {
            rows: vec![vec![0; size]; size],
        }
    }

    pub fn from_rows<const N: usize>(rows: [[u8; N]; N]) -> Self {
        Self {
            rows: rows.iter().map(|r| r.to_vec()).collect(),
        }
    }

    pub fn rows(&self) -> &[Vec<u8>] {
        &self.rows
    }

    /// (rows, columns of the first row).
    pub fn dimensions(&self) -> (usize, usize) {
        (self.rows.len(), self.rows.first().map_or(0, Vec::len))
    }

    pub fn get(&self, row: usize, col: usize) -> Option<u8> {
        self.rows.get(row).and_then(|r| r.get(col)).copied()
    }

    pub fn set(&mut self, row: usize, col: usize, value: u8) -> bool {
        match self.rows.get_mut(row).and_then(|r| r.get_mut(col)) {
            Some(cell) => {
                *cell = value;
                true
            }
            None => false,
        }
    }

    /// Number of occupied cells.
    pub fn occupied(&self) -> usize {
        self.rows.iter().flatten().filter(|&&v| v != 0).count()
    }

    /// Checks the grid is `size`×`size` and holds only 0/1.
    pub fn validate(&self, size: usize) -> Result<(), LayoutError> {
        if self.rows.len() != size {
            return Err(LayoutError::RowCount {
                rows: self.rows.len(),
                expected: size,
            });
        }
        for (r, row) in self.rows.iter().enumerate() {
            if row.len() != size {
                return Err(LayoutError::RowLength {
                    row: r,
                    cols: row.len(),
                    expected: size,
                });
            }
            if let Some((c, &value)) = row.iter().enumerate().find(|&(_, &v)| v > 1) {
                return Err(LayoutError::CellValue { row: r, col: c, value });
            }
        }
        Ok(())
    }

    /// JSON text sent as the single argument of `ReceiveArrangement`.
    pub fn to_payload(&self) -> anyhow::Result<String> {
        serde_json::to_string(&self.rows)
            .map_err(|e| anyhow::anyhow!("Serialization error: {}", e))
    }

    pub fn from_payload(payload: &str) -> anyhow::Result<Self> {
        let rows: Vec<Vec<u8>> = serde_json::from_str(payload)
            .map_err(|e| anyhow::anyhow!("Deserialization error: {}", e))?;
        Ok(Self { rows })
    }
}

/// A single move, sent as two positional arguments to `ReceiveStep`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Step {
    pub x: u8,
    pub y: u8,
}

impl Step {
    pub const fn new(x: u8, y: u8) -> Self {
        Self { x, y }
    }

    pub fn validate(&self, size: usize) -> Result<(), LayoutError> {
        if (self.x as usize) < size && (self.y as usize) < size {
            Ok(())
        } else {
            Err(LayoutError::StepOutOfRange {
                x: self.x,
                y: self.y,
                size,
            })
        }
    }

    pub fn to_arguments(&self) -> Vec<Value> {
        vec![Value::from(self.x), Value::from(self.y)]
    }
}

impl From<(u8, u8)> for Step {
    fn from((x, y): (u8, u8)) -> Self {
        Self { x, y }
    }
}
