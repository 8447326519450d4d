use std::collections::HashMap;
use std::path::Path;

use async_trait::async_trait;
use tracing::debug;

use super::{flatten_fallback, PlanRequest, Planner};
use crate::errors::WardenError;
use crate::models::Recommendation;

/// Replays a fixed plan: for each phase, one batch of recommendations per
/// planning round. Rounds past the end of the script return nothing.
#[derive(Debug, Default, Clone)]
pub struct ScriptedPlanner {
    phases: HashMap<String, Vec<Vec<Recommendation>>>,
}

impl ScriptedPlanner {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn from_file(path: &Path) -> Result<Self, WardenError> {
        let content = tokio::fs::read_to_string(path).await.map_err(|e| {
            WardenError::Config(format!("Failed to read plan file {}: {}", path.display(), e))
        })?;
        Self::from_yaml_str(&content)
    }

    pub fn from_yaml_str(content: &str) -> Result<Self, WardenError> {
        let phases: HashMap<String, Vec<Vec<Recommendation>>> = serde_yaml::from_str(content)
            .map_err(|e| WardenError::Config(format!("Invalid plan file: {}", e)))?;
        let phases = phases
            .into_iter()
            .map(|(phase, rounds)| {
                let rounds = rounds
                    .into_iter()
                    .map(|round| round.into_iter().map(flatten_fallback).collect())
                    .collect();
                (phase, rounds)
            })
            .collect();
        Ok(Self { phases })
    }

    pub fn with_round(mut self, phase: &str, recommendations: Vec<Recommendation>) -> Self {
        self.phases.entry(phase.to_string()).or_default().push(recommendations);
        self
    }

    pub fn phases(&self) -> impl Iterator<Item = &str> {
        self.phases.keys().map(String::as_str)
    }
}

#[async_trait]
impl Planner for ScriptedPlanner {
    async fn propose(&self, request: &PlanRequest) -> Result<Vec<Recommendation>, WardenError> {
        let batch = self
            .phases
            .get(&request.phase)
            .and_then(|rounds| rounds.get(request.iteration as usize))
            .cloned()
            .unwrap_or_default();
        debug!(phase = %request.phase, iteration = request.iteration, count = batch.len(), "Scripted recommendations");
        Ok(batch)
    }

    fn name(&self) -> &str {
        "scripted"
    }
}
