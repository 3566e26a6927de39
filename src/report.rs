use std::fmt::Write;

use chrono::{DateTime, Utc};

use crate::models::{FeatureColumn, GroupSummary, GroupedReport};

/// Groups of one report sorted by churn probability, highest first.
pub fn rank_by_churn(report: &GroupedReport) -> Vec<&GroupSummary> {
    let mut groups: Vec<&GroupSummary> = report.groups.iter().collect();
    groups.sort_by(|a, b| {
        b.churn_probability
            .total_cmp(&a.churn_probability)
            .then_with(|| b.users_count.cmp(&a.users_count))
    });
    groups
}

/// Highest-churn groups across every report.
pub fn top_segments(
    reports: &[GroupedReport],
    limit: usize,
) -> Vec<(FeatureColumn, &GroupSummary)> {
    let mut segments: Vec<(FeatureColumn, &GroupSummary)> = reports
        .iter()
        .flat_map(|report| report.groups.iter().map(move |group| (report.dimension, group)))
        .collect();

    segments.sort_by(|a, b| b.1.churn_probability.total_cmp(&a.1.churn_probability));
    segments.truncate(limit);
    segments
}

fn dimension_title(dimension: FeatureColumn) -> &'static str {
    match dimension {
        FeatureColumn::Age => "Age",
        FeatureColumn::Gender => "Gender",
        FeatureColumn::SubscriptionType => "Subscription Type",
        FeatureColumn::WatchHours => "Watch Hours",
        FeatureColumn::Region => "Region",
        FeatureColumn::NumberOfProfiles => "Number of Profiles",
        FeatureColumn::PaymentMethod => "Payment Method",
        FeatureColumn::Device => "Device",
    }
}

pub fn build_report(
    source: &str,
    generated_at: DateTime<Utc>,
    reports: &[GroupedReport],
) -> String {
    let total_users = reports.first().map_or(0, |report| report.total_users);

    let mut output = String::new();

    let _ = writeln!(output, "# Churn Probability Report");
    let _ = writeln!(
        output,
        "Generated from {} on {} ({} customers)",
        source,
        generated_at.format("%Y-%m-%d %H:%M UTC"),
        total_users
    );

    for report in reports {
        let _ = writeln!(output);
        let _ = writeln!(output, "## By {}", dimension_title(report.dimension));

        if report.groups.is_empty() {
            let _ = writeln!(output, "No customers in this dataset.");
            continue;
        }

        for group in rank_by_churn(report) {
            let _ = writeln!(
                output,
                "- {}: {:.2}% churn / {:.2}% retain across {} customers",
                group.key, group.churn_probability, group.not_churn_probability, group.users_count
            );
        }
    }

    let _ = writeln!(output);
    let _ = writeln!(output, "## Highest Churn Segments");

    let segments = top_segments(reports, 5);
    if segments.is_empty() {
        let _ = writeln!(output, "No customers in this dataset.");
    } else {
        for (dimension, group) in segments {
            let _ = writeln!(
                output,
                "- {} = {}: {:.2}% churn ({} customers)",
                dimension, group.key, group.churn_probability, group.users_count
            );
        }
    }

    output
}
