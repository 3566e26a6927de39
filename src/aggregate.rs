use std::collections::BTreeMap;

use tracing::debug;

use crate::classifier::Classifier;
use crate::error::{Result, ServiceError};
use crate::models::{
    ClassProbabilities, FeatureColumn, FeatureTable, GroupKey, GroupSummary, GroupedReport,
};

#[derive(Debug, Default)]
struct Accumulator {
    churn: f64,
    not_churn: f64,
    count: usize,
}

/// Group rows by `column` and average each class probability per group.
///
/// `probabilities[i]` belongs to `table.rows()[i]`. Groups come back ordered
/// by key. Percentages are rounded half away from zero.
pub fn group_probabilities(
    table: &FeatureTable,
    probabilities: &[ClassProbabilities],
    column: FeatureColumn,
) -> Result<Vec<GroupSummary>> {
    if table.len() != probabilities.len() {
        return Err(ServiceError::Prediction(format!(
            "got {} probability rows for {} table rows",
            probabilities.len(),
            table.len()
        )));
    }

    let mut groups: BTreeMap<GroupKey, Accumulator> = BTreeMap::new();

    for (record, probability) in table.iter().zip(probabilities) {
        let entry = groups.entry(record.value(column)).or_default();
        entry.churn += probability.churn;
        entry.not_churn += probability.not_churn;
        entry.count += 1;
    }

    Ok(groups
        .into_iter()
        .map(|(key, acc)| GroupSummary {
            key,
            churn_probability: to_percent(acc.churn / acc.count as f64),
            not_churn_probability: to_percent(acc.not_churn / acc.count as f64),
            users_count: acc.count,
        })
        .collect())
}

/// Predict every row and roll the probabilities up by `dimension`.
pub fn summarize(
    classifier: &dyn Classifier,
    table: &FeatureTable,
    dimension: FeatureColumn,
) -> Result<GroupedReport> {
    let table = table.normalized();
    let probabilities = classifier.predict_proba(&table)?;
    let groups = group_probabilities(&table, &probabilities, dimension)?;

    debug!(
        dimension = %dimension,
        rows = table.len(),
        groups = groups.len(),
        "summarized churn probabilities"
    );

    Ok(GroupedReport {
        dimension,
        total_users: table.len(),
        groups,
    })
}

/// Fraction to percentage with two decimals.
pub fn to_percent(fraction: f64) -> f64 {
    round2(fraction * 100.0)
}

pub fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classifier::testing::{customer, ShortClassifier, WatchHoursClassifier};
    use crate::models::CustomerRecord;
    use proptest::prelude::*;

    fn table(rows: Vec<CustomerRecord>) -> FeatureTable {
        FeatureTable::new(rows)
    }

    #[test]
    fn averages_single_group() {
        let rows = table(vec![
            customer("male", "europe", 20.0),
            customer("male", "europe", 40.0),
            customer("male", "europe", 60.0),
        ]);
        let report = summarize(&WatchHoursClassifier, &rows, FeatureColumn::Gender).unwrap();

        assert_eq!(report.total_users, 3);
        assert_eq!(
            report.groups,
            vec![GroupSummary {
                key: GroupKey::Text("male".into()),
                churn_probability: 40.0,
                not_churn_probability: 60.0,
                users_count: 3,
            }]
        );
    }

    #[test]
    fn counts_each_distinct_value() {
        let rows = table(vec![
            customer("male", "europe", 10.0),
            customer("female", "europe", 30.0),
            customer("male", "europe", 50.0),
        ]);
        let report = summarize(&WatchHoursClassifier, &rows, FeatureColumn::Gender).unwrap();

        assert_eq!(report.groups.len(), 2);
        assert_eq!(report.groups[0].key, GroupKey::Text("female".into()));
        assert_eq!(report.groups[0].users_count, 1);
        assert_eq!(report.groups[0].churn_probability, 30.0);
        assert_eq!(report.groups[1].key, GroupKey::Text("male".into()));
        assert_eq!(report.groups[1].users_count, 2);
        assert_eq!(report.groups[1].churn_probability, 30.0);
    }

    #[test]
    fn empty_table_gives_empty_summary() {
        for dimension in FeatureColumn::DIMENSIONS {
            let report =
                summarize(&WatchHoursClassifier, &FeatureTable::default(), dimension).unwrap();
            assert_eq!(report.total_users, 0);
            assert!(report.groups.is_empty());
        }
    }

    #[test]
    fn groups_after_normalizing_text() {
        let rows = table(vec![
            customer("  Male", "Europe", 10.0),
            customer("male ", "EUROPE", 30.0),
        ]);
        let report = summarize(&WatchHoursClassifier, &rows, FeatureColumn::Region).unwrap();
        assert_eq!(report.groups.len(), 1);
        assert_eq!(report.groups[0].key, GroupKey::Text("europe".into()));
        assert_eq!(report.groups[0].users_count, 2);
    }

    #[test]
    fn groups_by_integer_column_in_numeric_order() {
        let mut young = customer("male", "europe", 10.0);
        young.age = 9;
        let mut old = customer("male", "europe", 10.0);
        old.age = 40;
        let report =
            summarize(&WatchHoursClassifier, &table(vec![old, young]), FeatureColumn::Age).unwrap();
        assert_eq!(report.groups[0].key, GroupKey::Integer(9));
        assert_eq!(report.groups[1].key, GroupKey::Integer(40));
    }

    #[test]
    fn rounds_to_two_decimals() {
        let rows = table(vec![
            customer("male", "europe", 10.0),
            customer("male", "europe", 10.0),
            customer("male", "europe", 20.0),
        ]);
        let report = summarize(&WatchHoursClassifier, &rows, FeatureColumn::Gender).unwrap();
        assert_eq!(report.groups[0].churn_probability, 13.33);
        assert_eq!(report.groups[0].not_churn_probability, 86.67);
    }

    #[test]
    fn mismatched_probabilities_fail() {
        let rows = table(vec![customer("male", "europe", 10.0)]);
        let err = summarize(&ShortClassifier, &rows, FeatureColumn::Gender).unwrap_err();
        assert!(matches!(err, ServiceError::Prediction(_)));
    }

    #[test]
    fn unknown_grouping_column_fails_loudly() {
        assert!(matches!(
            "last_login_days".parse::<FeatureColumn>(),
            Err(ServiceError::UnknownColumn(_))
        ));
    }

    #[test]
    fn round2_is_half_away_from_zero() {
        assert_eq!(round2(0.125), 0.13);
        assert_eq!(round2(-0.125), -0.13);
        assert_eq!(round2(12.344), 12.34);
        assert_eq!(to_percent(0.5), 50.0);
    }

    fn arb_customer() -> impl Strategy<Value = CustomerRecord> {
        (
            18i64..80,
            prop::sample::select(vec!["Male", " female", "OTHER "]),
            prop::sample::select(vec!["europe", "Asia", "africa", "North America"]),
            0.0f64..100.0,
        )
            .prop_map(|(age, gender, region, watch_hours)| {
                let mut record = customer(gender, region, watch_hours);
                record.age = age;
                record
            })
    }

    /// Any printable text in every textual column.
    fn arb_raw_customer() -> impl Strategy<Value = CustomerRecord> {
        (arb_customer(), "\\PC*", "\\PC*", "\\PC*", "\\PC*", "\\PC*").prop_map(
            |(mut record, gender, subscription, region, payment, device)| {
                record.gender = gender;
                record.subscription_type = subscription;
                record.region = region;
                record.payment_method = payment;
                record.device = format!(" {device} ");
                record
            },
        )
    }

    #[test]
    fn bundled_model_summarizes_bundled_sample() {
        use crate::classifier::ModelArtifact;
        use crate::dataset::Dataset;

        let model = ModelArtifact::from_json(include_str!("../data/churn_model.json")).unwrap();
        let dataset = Dataset::from_reader(include_str!("../data/clientes_sample.csv").as_bytes())
            .unwrap();
        let table = dataset.feature_table().unwrap();

        let report = summarize(&model, &table, FeatureColumn::Region).unwrap();
        assert_eq!(report.total_users, 10);
        assert_eq!(report.groups.iter().map(|g| g.users_count).sum::<usize>(), 10);
        assert_eq!(report.groups[0].key, GroupKey::Text("africa".into()));
    }

    proptest! {
        #[test]
        fn counts_sum_to_row_count(rows in prop::collection::vec(arb_customer(), 0..60)) {
            let rows = FeatureTable::new(rows);
            for dimension in FeatureColumn::DIMENSIONS {
                let report = summarize(&WatchHoursClassifier, &rows, dimension).unwrap();
                let counted: usize = report.groups.iter().map(|g| g.users_count).sum();
                prop_assert_eq!(counted, rows.len());
                prop_assert_eq!(report.total_users, rows.len());
            }
        }

        #[test]
        fn group_percentages_sum_to_hundred(rows in prop::collection::vec(arb_customer(), 1..60)) {
            let rows = FeatureTable::new(rows);
            let report = summarize(&WatchHoursClassifier, &rows, FeatureColumn::Region).unwrap();
            for group in &report.groups {
                let total = group.churn_probability + group.not_churn_probability;
                prop_assert!((total - 100.0).abs() <= 0.01 + 1e-9);
            }
        }

        #[test]
        fn normalizing_is_idempotent(rows in prop::collection::vec(arb_raw_customer(), 0..20)) {
            let once = FeatureTable::new(rows).normalized();
            prop_assert_eq!(once.normalized(), once.clone());
            for record in once.iter() {
                prop_assert_eq!(record.device.trim(), record.device.as_str());
            }
        }
    }
}
