//! Churn classifier
//!
//! Handlers only see the [`Classifier`] trait. The concrete model is a JSON
//! artifact loaded once at startup: either a logistic model with one-hot
//! categorical weights, or a forest of decision trees whose leaves carry class
//! probabilities.

use std::collections::BTreeMap;
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::{Result, ServiceError};
use crate::models::{
    ChurnLabel, ClassProbabilities, CustomerRecord, FeatureColumn, FeatureTable, Prediction,
};
use crate::normalize::normalize_text;

const PROBABILITY_TOLERANCE: f64 = 1e-6;

/// Opaque churn model. Implementations must be safe to call from many
/// requests at once.
pub trait Classifier: Send + Sync {
    /// Short model family name, reported by `/health`.
    fn kind(&self) -> &'static str;

    /// One `[not_churn, churn]` pair per input row, in input order.
    fn predict_proba(&self, table: &FeatureTable) -> Result<Vec<ClassProbabilities>>;

    fn predict(&self, table: &FeatureTable) -> Result<Vec<ChurnLabel>> {
        Ok(self
            .predict_proba(table)?
            .iter()
            .map(ClassProbabilities::label)
            .collect())
    }
}

/// Normalize a single record and run it through the classifier.
pub fn predict_one(classifier: &dyn Classifier, record: &CustomerRecord) -> Result<Prediction> {
    let table = FeatureTable::new(vec![record.normalized()]);
    let prediction = classifier
        .predict(&table)?
        .into_iter()
        .next()
        .ok_or_else(|| ServiceError::Prediction("classifier returned no label".to_string()))?;
    let probabilities = classifier
        .predict_proba(&table)?
        .into_iter()
        .next()
        .ok_or_else(|| {
            ServiceError::Prediction("classifier returned no probabilities".to_string())
        })?;

    Ok(Prediction {
        prediction,
        probabilities,
    })
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ModelArtifact {
    Logistic(LogisticModel),
    Forest(ForestModel),
}

impl ModelArtifact {
    pub fn from_path(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        let artifact = Self::from_json(&raw)?;
        info!(
            path = %path.display(),
            kind = artifact.kind(),
            "loaded model artifact"
        );
        Ok(artifact)
    }

    pub fn from_json(raw: &str) -> Result<Self> {
        let artifact: ModelArtifact = serde_json::from_str(raw)?;
        artifact.validate()?;
        Ok(artifact)
    }

    fn validate(&self) -> Result<()> {
        match self {
            ModelArtifact::Logistic(model) => model.validate(),
            ModelArtifact::Forest(model) => model.validate(),
        }
    }
}

impl Classifier for ModelArtifact {
    fn kind(&self) -> &'static str {
        match self {
            ModelArtifact::Logistic(_) => "logistic",
            ModelArtifact::Forest(_) => "forest",
        }
    }

    fn predict_proba(&self, table: &FeatureTable) -> Result<Vec<ClassProbabilities>> {
        debug!(rows = table.len(), kind = self.kind(), "predict_proba");
        table
            .iter()
            .map(|record| match self {
                ModelArtifact::Logistic(model) => Ok(model.probabilities(record)),
                ModelArtifact::Forest(model) => model.probabilities(record),
            })
            .collect()
    }
}

/// `p(churn) = sigmoid(intercept + sum(weights))`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogisticModel {
    pub intercept: f64,
    /// Weight per numeric column.
    #[serde(default)]
    pub numeric: BTreeMap<FeatureColumn, f64>,
    /// Weight per category per textual column; unseen categories weigh 0.
    #[serde(default)]
    pub categorical: BTreeMap<FeatureColumn, BTreeMap<String, f64>>,
}

impl LogisticModel {
    fn validate(&self) -> Result<()> {
        if !self.intercept.is_finite() {
            return Err(ServiceError::Model("intercept is not finite".to_string()));
        }

        for (column, weight) in &self.numeric {
            if column.is_textual() {
                return Err(ServiceError::Model(format!(
                    "numeric weight given for textual column '{column}'"
                )));
            }
            if !weight.is_finite() {
                return Err(ServiceError::Model(format!(
                    "weight for '{column}' is not finite"
                )));
            }
        }

        for (column, weights) in &self.categorical {
            if !column.is_textual() {
                return Err(ServiceError::Model(format!(
                    "categorical weights given for numeric column '{column}'"
                )));
            }
            for (category, weight) in weights {
                check_category(*column, category)?;
                if !weight.is_finite() {
                    return Err(ServiceError::Model(format!(
                        "weight for '{column}={category}' is not finite"
                    )));
                }
            }
        }

        Ok(())
    }

    fn probabilities(&self, record: &CustomerRecord) -> ClassProbabilities {
        let mut logit = self.intercept;

        for (column, weight) in &self.numeric {
            logit += weight * record.numeric(*column).unwrap_or(0.0);
        }

        for (column, weights) in &self.categorical {
            if let Some(weight) = record.text(*column).and_then(|value| weights.get(value)) {
                logit += weight;
            }
        }

        ClassProbabilities::from_churn(sigmoid(logit))
    }
}

fn sigmoid(x: f64) -> f64 {
    1.0 / (1.0 + (-x).exp())
}

/// Mean of the leaf probabilities reached in each tree.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ForestModel {
    pub trees: Vec<TreeNode>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "node", rename_all = "snake_case")]
pub enum TreeNode {
    Leaf {
        /// `[not_churn, churn]`
        proba: [f64; 2],
    },
    /// `value <= threshold` goes left.
    Numeric {
        column: FeatureColumn,
        threshold: f64,
        left: Box<TreeNode>,
        right: Box<TreeNode>,
    },
    /// Value in `values` goes left.
    Category {
        column: FeatureColumn,
        values: Vec<String>,
        left: Box<TreeNode>,
        right: Box<TreeNode>,
    },
}

impl ForestModel {
    fn validate(&self) -> Result<()> {
        if self.trees.is_empty() {
            return Err(ServiceError::Model("forest has no trees".to_string()));
        }
        self.trees.iter().try_for_each(TreeNode::validate)
    }

    fn probabilities(&self, record: &CustomerRecord) -> Result<ClassProbabilities> {
        let mut churn = 0.0;
        for tree in &self.trees {
            churn += tree.evaluate(record)?[1];
        }
        Ok(ClassProbabilities::from_churn(churn / self.trees.len() as f64))
    }
}

impl TreeNode {
    fn validate(&self) -> Result<()> {
        match self {
            TreeNode::Leaf { proba } => {
                let [not_churn, churn] = *proba;
                let in_range = (0.0..=1.0).contains(&not_churn) && (0.0..=1.0).contains(&churn);
                if !in_range || (not_churn + churn - 1.0).abs() > PROBABILITY_TOLERANCE {
                    return Err(ServiceError::Model(format!(
                        "leaf probabilities {proba:?} do not form a distribution"
                    )));
                }
                Ok(())
            }
            TreeNode::Numeric {
                column,
                threshold,
                left,
                right,
            } => {
                if column.is_textual() {
                    return Err(ServiceError::Model(format!(
                        "numeric split on textual column '{column}'"
                    )));
                }
                if !threshold.is_finite() {
                    return Err(ServiceError::Model(format!(
                        "split threshold on '{column}' is not finite"
                    )));
                }
                left.validate()?;
                right.validate()
            }
            TreeNode::Category {
                column,
                values,
                left,
                right,
            } => {
                if !column.is_textual() {
                    return Err(ServiceError::Model(format!(
                        "categorical split on numeric column '{column}'"
                    )));
                }
                for value in values {
                    check_category(*column, value)?;
                }
                left.validate()?;
                right.validate()
            }
        }
    }

    fn evaluate(&self, record: &CustomerRecord) -> Result<[f64; 2]> {
        let mut node = self;
        loop {
            node = match node {
                TreeNode::Leaf { proba } => return Ok(*proba),
                TreeNode::Numeric {
                    column,
                    threshold,
                    left,
                    right,
                } => {
                    let value = record.numeric(*column).ok_or_else(|| {
                        ServiceError::Model(format!("'{column}' is not numeric"))
                    })?;
                    if value <= *threshold {
                        left.as_ref()
                    } else {
                        right.as_ref()
                    }
                }
                TreeNode::Category {
                    column,
                    values,
                    left,
                    right,
                } => {
                    let value = record.text(*column).ok_or_else(|| {
                        ServiceError::Model(format!("'{column}' is not textual"))
                    })?;
                    if values.iter().any(|candidate| candidate == value) {
                        left.as_ref()
                    } else {
                        right.as_ref()
                    }
                }
            };
        }
    }
}

/// Records are normalized before prediction, so artifact categories must be too.
fn check_category(column: FeatureColumn, category: &str) -> Result<()> {
    if normalize_text(category) != category {
        return Err(ServiceError::Model(format!(
            "category '{category}' for '{column}' is not lowercase and trimmed"
        )));
    }
    Ok(())
}
