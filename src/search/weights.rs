//! Per-field fusion weights.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::{SearchError, SearchResult};
use crate::types::FieldKind;

/// What happens to the weight of a field the query does not supply.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AbsentFieldPolicy {
    /// Present weights are rescaled to sum to 1
    #[default]
    Renormalize,
    /// Present weights keep their configured fractions
    Fixed,
}

impl AbsentFieldPolicy {
    pub fn as_str(&self) -> &'static str {
        match self {
            AbsentFieldPolicy::Renormalize => "renormalize",
            AbsentFieldPolicy::Fixed => "fixed",
        }
    }
}

/// One non-negative weight per field kind.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FieldWeights {
    pub summary: f32,
    pub code: f32,
    pub test_info: f32,
    pub log: f32,
    pub environment: f32,
}

impl Default for FieldWeights {
    fn default() -> Self {
        Self {
            summary: 0.20,
            code: 0.25,
            test_info: 0.15,
            log: 0.30,
            environment: 0.10,
        }
    }
}

impl FieldWeights {
    pub fn get(&self, field: FieldKind) -> f32 {
        match field {
            FieldKind::Summary => self.summary,
            FieldKind::Code => self.code,
            FieldKind::TestInfo => self.test_info,
            FieldKind::Log => self.log,
            FieldKind::Environment => self.environment,
        }
    }

    pub fn set(&mut self, field: FieldKind, weight: f32) {
        match field {
            FieldKind::Summary => self.summary = weight,
            FieldKind::Code => self.code = weight,
            FieldKind::TestInfo => self.test_info = weight,
            FieldKind::Log => self.log = weight,
            FieldKind::Environment => self.environment = weight,
        }
    }

    /// Rejects negative or non-finite weights and an all-zero record.
    pub fn validate(&self) -> SearchResult<()> {
        for field in FieldKind::ALL {
            let weight = self.get(field);
            if !weight.is_finite() || weight < 0.0 {
                return Err(SearchError::InvalidWeights(format!(
                    "{field} weight must be a non-negative number, got {weight}"
                )));
            }
        }
        if FieldKind::ALL.iter().all(|f| self.get(*f) == 0.0) {
            return Err(SearchError::InvalidWeights(
                "at least one field weight must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }

    /// Weights actually applied to the `present` fields.
    ///
    /// Fails when every present field carries weight 0, since the fused
    /// ranking would then be meaningless.
    pub fn effective(
        &self,
        present: &[FieldKind],
        policy: AbsentFieldPolicy,
    ) -> SearchResult<BTreeMap<FieldKind, f32>> {
        let total: f32 = present.iter().map(|f| self.get(*f)).sum();
        if total <= 0.0 {
            let names: Vec<&str> = present.iter().map(|f| f.as_str()).collect();
            return Err(SearchError::InvalidWeights(format!(
                "every queried field has weight 0 ({})",
                names.join(", ")
            )));
        }

        Ok(present
            .iter()
            .map(|&field| {
                let weight = self.get(field);
                let applied = match policy {
                    AbsentFieldPolicy::Renormalize => weight / total,
                    AbsentFieldPolicy::Fixed => weight,
                };
                (field, applied)
            })
            .collect())
    }

    /// Returns a copy with `field=weight` pairs from `spec` applied,
    /// e.g. `"summary=0.5,log=0.1"`.
    pub fn with_overrides(&self, spec: &str) -> SearchResult<Self> {
        let mut weights = *self;
        for pair in spec.split(',').map(str::trim).filter(|p| !p.is_empty()) {
            let (name, value) = pair.split_once('=').ok_or_else(|| {
                SearchError::InvalidWeights(format!("expected field=weight, got '{pair}'"))
            })?;
            let field: FieldKind = name
                .trim()
                .parse()
                .map_err(|_| SearchError::InvalidWeights(format!("unknown field '{}'", name.trim())))?;
            let weight: f32 = value.trim().parse().map_err(|_| {
                SearchError::InvalidWeights(format!("'{}' is not a number", value.trim()))
            })?;
            weights.set(field, weight);
        }
        weights.validate()?;
        Ok(weights)
    }
}
