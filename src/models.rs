use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

use serde::ser::SerializeMap;
use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::ServiceError;

/// One customer as the classifier sees it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CustomerRecord {
    #[serde(deserialize_with = "whole_number")]
    pub age: i64,
    pub gender: String,
    pub subscription_type: String,
    pub watch_hours: f64,
    pub region: String,
    #[serde(deserialize_with = "whole_number")]
    pub number_of_profiles: i64,
    pub payment_method: String,
    pub device: String,
}

/// Accepts `30` and `30.0`; rejects `30.5`.
fn whole_number<'de, D>(deserializer: D) -> Result<i64, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Number {
        Integer(i64),
        Float(f64),
    }

    match Number::deserialize(deserializer)? {
        Number::Integer(value) => Ok(value),
        Number::Float(value) if value.is_finite() && value.fract() == 0.0 => Ok(value as i64),
        Number::Float(value) => Err(D::Error::custom(format!(
            "expected an integer, got {value}"
        ))),
    }
}

/// The feature columns, in the order the model was trained on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FeatureColumn {
    Age,
    Gender,
    SubscriptionType,
    WatchHours,
    Region,
    NumberOfProfiles,
    PaymentMethod,
    Device,
}

impl FeatureColumn {
    pub const ALL: [FeatureColumn; 8] = [
        FeatureColumn::Age,
        FeatureColumn::Gender,
        FeatureColumn::SubscriptionType,
        FeatureColumn::WatchHours,
        FeatureColumn::Region,
        FeatureColumn::NumberOfProfiles,
        FeatureColumn::PaymentMethod,
        FeatureColumn::Device,
    ];

    /// Dimensions exposed by the `/probability/*` routes.
    pub const DIMENSIONS: [FeatureColumn; 4] = [
        FeatureColumn::Age,
        FeatureColumn::Gender,
        FeatureColumn::SubscriptionType,
        FeatureColumn::Region,
    ];

    pub fn name(self) -> &'static str {
        match self {
            FeatureColumn::Age => "age",
            FeatureColumn::Gender => "gender",
            FeatureColumn::SubscriptionType => "subscription_type",
            FeatureColumn::WatchHours => "watch_hours",
            FeatureColumn::Region => "region",
            FeatureColumn::NumberOfProfiles => "number_of_profiles",
            FeatureColumn::PaymentMethod => "payment_method",
            FeatureColumn::Device => "device",
        }
    }

    pub fn is_textual(self) -> bool {
        matches!(
            self,
            FeatureColumn::Gender
                | FeatureColumn::SubscriptionType
                | FeatureColumn::Region
                | FeatureColumn::PaymentMethod
                | FeatureColumn::Device
        )
    }

    /// Like `from_str`, but also accepts the short `subscription` route name.
    pub fn from_dimension(name: &str) -> Result<Self, ServiceError> {
        match name {
            "subscription" => Ok(FeatureColumn::SubscriptionType),
            other => other.parse(),
        }
    }
}

impl fmt::Display for FeatureColumn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for FeatureColumn {
    type Err = ServiceError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        FeatureColumn::ALL
            .into_iter()
            .find(|column| column.name() == s)
            .ok_or_else(|| ServiceError::UnknownColumn(s.to_string()))
    }
}

/// A single cell of a feature row, used as a grouping key.
#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum GroupKey {
    Integer(i64),
    Float(f64),
    Text(String),
}

impl GroupKey {
    fn rank(&self) -> u8 {
        match self {
            GroupKey::Integer(_) => 0,
            GroupKey::Float(_) => 1,
            GroupKey::Text(_) => 2,
        }
    }
}

impl PartialEq for GroupKey {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for GroupKey {}

impl PartialOrd for GroupKey {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for GroupKey {
    fn cmp(&self, other: &Self) -> Ordering {
        match (self, other) {
            (GroupKey::Integer(a), GroupKey::Integer(b)) => a.cmp(b),
            (GroupKey::Float(a), GroupKey::Float(b)) => a.total_cmp(b),
            (GroupKey::Text(a), GroupKey::Text(b)) => a.cmp(b),
            _ => self.rank().cmp(&other.rank()),
        }
    }
}

impl fmt::Display for GroupKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GroupKey::Integer(value) => write!(f, "{value}"),
            GroupKey::Float(value) => write!(f, "{value}"),
            GroupKey::Text(value) => f.write_str(value),
        }
    }
}

impl CustomerRecord {
    pub fn value(&self, column: FeatureColumn) -> GroupKey {
        match column {
            FeatureColumn::Age => GroupKey::Integer(self.age),
            FeatureColumn::Gender => GroupKey::Text(self.gender.clone()),
            FeatureColumn::SubscriptionType => GroupKey::Text(self.subscription_type.clone()),
            FeatureColumn::WatchHours => GroupKey::Float(self.watch_hours),
            FeatureColumn::Region => GroupKey::Text(self.region.clone()),
            FeatureColumn::NumberOfProfiles => GroupKey::Integer(self.number_of_profiles),
            FeatureColumn::PaymentMethod => GroupKey::Text(self.payment_method.clone()),
            FeatureColumn::Device => GroupKey::Text(self.device.clone()),
        }
    }

    /// Numeric view of a column; `None` for textual columns.
    pub fn numeric(&self, column: FeatureColumn) -> Option<f64> {
        match column {
            FeatureColumn::Age => Some(self.age as f64),
            FeatureColumn::WatchHours => Some(self.watch_hours),
            FeatureColumn::NumberOfProfiles => Some(self.number_of_profiles as f64),
            _ => None,
        }
    }

    /// Textual view of a column; `None` for numeric columns.
    pub fn text(&self, column: FeatureColumn) -> Option<&str> {
        match column {
            FeatureColumn::Gender => Some(&self.gender),
            FeatureColumn::SubscriptionType => Some(&self.subscription_type),
            FeatureColumn::Region => Some(&self.region),
            FeatureColumn::PaymentMethod => Some(&self.payment_method),
            FeatureColumn::Device => Some(&self.device),
            _ => None,
        }
    }
}

/// Rows fed to the classifier. Every row carries all of `FeatureColumn::ALL`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FeatureTable {
    rows: Vec<CustomerRecord>,
}

impl FeatureTable {
    pub fn new(rows: Vec<CustomerRecord>) -> Self {
        Self { rows }
    }

    pub fn rows(&self) -> &[CustomerRecord] {
        &self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, CustomerRecord> {
        self.rows.iter()
    }
}

impl FromIterator<CustomerRecord> for FeatureTable {
    fn from_iter<I: IntoIterator<Item = CustomerRecord>>(iter: I) -> Self {
        Self {
            rows: iter.into_iter().collect(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChurnLabel {
    NotChurn,
    Churn,
}

impl ChurnLabel {
    pub fn as_u8(self) -> u8 {
        match self {
            ChurnLabel::NotChurn => 0,
            ChurnLabel::Churn => 1,
        }
    }
}

impl Serialize for ChurnLabel {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u8(self.as_u8())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ClassProbabilities {
    pub not_churn: f64,
    pub churn: f64,
}

impl ClassProbabilities {
    pub fn from_churn(churn: f64) -> Self {
        Self {
            not_churn: 1.0 - churn,
            churn,
        }
    }

    /// Ties go to `NotChurn`.
    pub fn label(&self) -> ChurnLabel {
        if self.churn > self.not_churn {
            ChurnLabel::Churn
        } else {
            ChurnLabel::NotChurn
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Prediction {
    pub prediction: ChurnLabel,
    pub probabilities: ClassProbabilities,
}

/// Per-group rollup; probabilities are percentages rounded to two decimals.
#[derive(Debug, Clone, PartialEq)]
pub struct GroupSummary {
    pub key: GroupKey,
    pub churn_probability: f64,
    pub not_churn_probability: f64,
    pub users_count: usize,
}

/// Grouped summary for one dimension.
///
/// Serializes as `{ "total_users": n, "grouped_by_<dimension>": [...] }` where
/// each entry names its key after the dimension.
#[derive(Debug, Clone, PartialEq)]
pub struct GroupedReport {
    pub dimension: FeatureColumn,
    pub total_users: usize,
    pub groups: Vec<GroupSummary>,
}

struct DimensionRow<'a> {
    dimension: FeatureColumn,
    summary: &'a GroupSummary,
}

impl Serialize for DimensionRow<'_> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(4))?;
        map.serialize_entry(self.dimension.name(), &self.summary.key)?;
        map.serialize_entry("churn_probability", &self.summary.churn_probability)?;
        map.serialize_entry("not_churn_probability", &self.summary.not_churn_probability)?;
        map.serialize_entry("users_count", &self.summary.users_count)?;
        map.end()
    }
}

impl Serialize for GroupedReport {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let rows: Vec<DimensionRow<'_>> = self
            .groups
            .iter()
            .map(|summary| DimensionRow {
                dimension: self.dimension,
                summary,
            })
            .collect();

        let mut map = serializer.serialize_map(Some(2))?;
        map.serialize_entry("total_users", &self.total_users)?;
        map.serialize_entry(&format!("grouped_by_{}", self.dimension), &rows)?;
        map.end()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn columns_parse_by_name() {
        assert_eq!(
            "subscription_type".parse::<FeatureColumn>().unwrap(),
            FeatureColumn::SubscriptionType
        );
        assert!(matches!(
            "plan".parse::<FeatureColumn>(),
            Err(ServiceError::UnknownColumn(name)) if name == "plan"
        ));
    }

    #[test]
    fn subscription_alias_only_for_dimensions() {
        assert_eq!(
            FeatureColumn::from_dimension("subscription").unwrap(),
            FeatureColumn::SubscriptionType
        );
        assert!("subscription".parse::<FeatureColumn>().is_err());
    }

    #[test]
    fn integer_fields_accept_whole_floats() {
        let mut raw = json!({
            "age": 30.0,
            "gender": "male",
            "subscription_type": "basic",
            "watch_hours": 4,
            "region": "europe",
            "number_of_profiles": 2,
            "payment_method": "paypal",
            "device": "tv",
        });
        let record: CustomerRecord = serde_json::from_value(raw.clone()).unwrap();
        assert_eq!(record.age, 30);
        assert_eq!(record.watch_hours, 4.0);

        raw["number_of_profiles"] = json!(2.5);
        let err = serde_json::from_value::<CustomerRecord>(raw).unwrap_err();
        assert!(err.to_string().contains("expected an integer, got 2.5"));
    }

    #[test]
    fn label_ties_go_to_not_churn() {
        assert_eq!(ClassProbabilities::from_churn(0.5).label(), ChurnLabel::NotChurn);
        assert_eq!(ClassProbabilities::from_churn(0.51).label(), ChurnLabel::Churn);
    }

    #[test]
    fn group_keys_order_within_type() {
        let mut keys = vec![
            GroupKey::Text("west".into()),
            GroupKey::Text("east".into()),
        ];
        keys.sort();
        assert_eq!(keys[0], GroupKey::Text("east".into()));
        assert!(GroupKey::Float(1.5) < GroupKey::Float(2.0));
        assert!(GroupKey::Integer(30) > GroupKey::Integer(25));
    }

    #[test]
    fn grouped_report_names_keys_after_dimension() {
        let report = GroupedReport {
            dimension: FeatureColumn::Region,
            total_users: 2,
            groups: vec![GroupSummary {
                key: GroupKey::Text("europe".into()),
                churn_probability: 12.5,
                not_churn_probability: 87.5,
                users_count: 2,
            }],
        };

        let value = serde_json::to_value(&report).unwrap();
        assert_eq!(
            value,
            json!({
                "total_users": 2,
                "grouped_by_region": [{
                    "region": "europe",
                    "churn_probability": 12.5,
                    "not_churn_probability": 87.5,
                    "users_count": 2
                }]
            })
        );
    }

    #[test]
    fn prediction_serializes_label_as_integer() {
        let prediction = Prediction {
            prediction: ChurnLabel::Churn,
            probabilities: ClassProbabilities {
                not_churn: 0.25,
                churn: 0.75,
            },
        };
        let value = serde_json::to_value(prediction).unwrap();
        assert_eq!(
            value,
            json!({"prediction": 1, "probabilities": {"not_churn": 0.25, "churn": 0.75}})
        );
    }
}
