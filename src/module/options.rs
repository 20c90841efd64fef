//! Tunable option markers.
//!
//! A [`Tunable`] marks a parameter as searchable rather than concrete.
//! Modules collect every tunable reachable from themselves and their
//! children; this core only aggregates them, resolution belongs to an
//! outer search loop.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Marker for a tunable/searchable parameter: a name and its candidate
/// values. Aggregated read-only across the module graph.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tunable {
    pub name: String,
    pub candidates: Vec<Value>,
}

impl Tunable {
    pub fn new(name: impl Into<String>, candidates: Vec<Value>) -> Self {
        Self {
            name: name.into(),
            candidates,
        }
    }
}
