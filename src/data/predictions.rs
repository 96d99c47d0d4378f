//! Prediction ingestion from the external prediction supplier.
//!
//! Records arrive as plain data (`{opportunity_id, outcome_labels,
//! outcome_probabilities, market_odds}` plus optional extras). Each record is
//! validated on its own: a malformed record is reported and dropped, the rest
//! of the batch goes through.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashSet;
use std::path::Path;
use tracing::{debug, warn};

use crate::data::models::{Adjustments, GameState};
use crate::errors::EngineError;

/// One prediction as supplied by the external predictor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PredictionRecord {
    #[serde(alias = "opportunityId", alias = "id")]
    pub opportunity_id: String,
    #[serde(alias = "outcomeLabels", alias = "outcomes")]
    pub outcome_labels: Vec<String>,
    #[serde(alias = "outcomeProbabilities", alias = "probabilities")]
    pub outcome_probabilities: Vec<f64>,
    #[serde(alias = "marketOdds", alias = "odds")]
    pub market_odds: Vec<Decimal>,
    #[serde(default)]
    pub confidence: Option<f64>,
    #[serde(default, alias = "startsAt", alias = "commence_time")]
    pub starts_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub adjustments: Adjustments,
}

impl PredictionRecord {
    pub fn into_game_state(self) -> Result<GameState, EngineError> {
        let mut game = GameState::new(
            self.opportunity_id,
            self.outcome_labels,
            self.outcome_probabilities,
            self.market_odds,
        )?
        .with_adjustments(self.adjustments)?;
        if let Some(confidence) = self.confidence {
            game = game.with_confidence(confidence)?;
        }
        if let Some(starts_at) = self.starts_at {
            game = game.with_start(starts_at);
        }
        Ok(game)
    }
}

/// A parsed prediction file. Records whose structure did not deserialize are
/// carried alongside the good ones so the cycle can report them.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PredictionBatch {
    pub records: Vec<PredictionRecord>,
    pub malformed: Vec<(String, EngineError)>,
}

impl From<Vec<PredictionRecord>> for PredictionBatch {
    fn from(records: Vec<PredictionRecord>) -> Self {
        Self {
            records,
            malformed: Vec::new(),
        }
    }
}

impl PredictionBatch {
    pub fn len(&self) -> usize {
        self.records.len() + self.malformed.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Outcome of validating one batch.
#[derive(Debug, Default)]
pub struct IngestReport {
    pub games: Vec<GameState>,
    pub rejected: Vec<(String, EngineError)>,
}

/// Validate a batch. Later duplicates of an opportunity id are rejected.
pub fn ingest(batch: impl Into<PredictionBatch>) -> IngestReport {
    let batch = batch.into();
    let mut report = IngestReport {
        games: Vec::new(),
        rejected: batch.malformed,
    };
    let mut seen = HashSet::new();

    for record in batch.records {
        let id = record.opportunity_id.clone();
        if !seen.insert(id.clone()) {
            warn!(opportunity_id = %id, "Duplicate prediction record in batch, skipping");
            report.rejected.push((
                id.clone(),
                EngineError::InvalidRecord {
                    opportunity_id: id,
                    reason: "duplicate opportunity id in batch".to_string(),
                },
            ));
            continue;
        }

        match record.into_game_state() {
            Ok(game) => report.games.push(game),
            Err(e) => {
                warn!(opportunity_id = %id, error = %e, "Rejected malformed prediction record");
                report.rejected.push((id, e));
            }
        }
    }

    debug!(
        accepted = report.games.len(),
        rejected = report.rejected.len(),
        "Prediction batch ingested"
    );
    report
}

/// Parse a JSON array of prediction records. Only a document that is not a
/// JSON array fails as a whole; an element with the wrong shape is kept in
/// `malformed` and the rest of the array goes through.
pub fn parse_predictions(json: &str) -> Result<PredictionBatch, EngineError> {
    let values: Vec<Value> =
        serde_json::from_str(json).map_err(|e| EngineError::Parse(format!("predictions: {e}")))?;

    let mut batch = PredictionBatch::default();
    for (index, value) in values.into_iter().enumerate() {
        let id = record_id(&value, index);
        match serde_json::from_value::<PredictionRecord>(value) {
            Ok(record) => batch.records.push(record),
            Err(e) => {
                warn!(opportunity_id = %id, error = %e, "Prediction record does not deserialize");
                batch.malformed.push((
                    id.clone(),
                    EngineError::InvalidRecord {
                        opportunity_id: id,
                        reason: e.to_string(),
                    },
                ));
            }
        }
    }
    Ok(batch)
}

/// Best-effort id of a raw record, falling back to its position.
fn record_id(value: &Value, index: usize) -> String {
    ["opportunity_id", "opportunityId", "id"]
        .iter()
        .find_map(|key| value.get(*key).and_then(Value::as_str))
        .map(str::to_string)
        .unwrap_or_else(|| format!("#{index}"))
}

/// Load prediction records from a JSON file written by the supplier.
pub fn load_predictions(path: &Path) -> Result<PredictionBatch, EngineError> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| EngineError::Io(format!("{}: {e}", path.display())))?;
    parse_predictions(&raw)
}

// =============================================================================
// Tests
// =============================================================================
