//! # Integrity Checker
//!
//! Eventual-consistency measurement between the two stores. Per collection,
//! both sides are counted with two independent queries (no distributed
//! transaction) and quality is the ratio of the smaller count to
//! the larger. Sync lag is expected; divergence is reported, not enforced.

use std::sync::Arc;

use super::store::MonitoringStore;
use crate::configs::settings::CollectionMapping;
use crate::connections::recordstore::RecordStore;
use crate::connections::tsdb::TickSource;
use crate::models::IntegrityReport;

pub struct IntegrityChecker {
    source: Arc<dyn TickSource>,
    sink: Arc<dyn RecordStore>,
    store: Arc<MonitoringStore>,
    mappings: Vec<CollectionMapping>,
}

impl IntegrityChecker {
    pub fn new(
        source: Arc<dyn TickSource>,
        sink: Arc<dyn RecordStore>,
        store: Arc<MonitoringStore>,
        mappings: Vec<CollectionMapping>,
    ) -> Self {
        Self { source, sink, store, mappings }
    }

    /// Checks every configured collection and appends each report to the
    /// monitoring store. A count failure on either side yields a zero-quality
    /// report with the failure as its issue; it never aborts the cycle.
    pub async fn check_consistency(&self) -> Vec<IntegrityReport> {
        let mut reports = Vec::with_capacity(self.mappings.len());
        for mapping in &self.mappings {
            let report = self.check_collection(mapping).await;
            if let Err(err) = self.store.append_integrity(&report).await {
                log::error!("failed to persist integrity report for {}: {}", report.collection, err);
            }
            reports.push(report);
        }
        reports
    }

    async fn check_collection(&self, mapping: &CollectionMapping) -> IntegrityReport {
        let source_count = self.source.count_rows(&mapping.table).await;
        let sink_count = self.sink.count_records(&mapping.collection).await;
        let timestamp = chrono::Utc::now();

        match (source_count, sink_count) {
            (Ok(source), Ok(sink)) => {
                let report = Self::score(&mapping.collection, source, sink, timestamp);
                log::debug!(
                    "integrity {}: source={} sink={} quality={:.3}",
                    mapping.collection,
                    source,
                    sink,
                    report.quality_score
                );
                report
            }
            (source, sink) => {
                let mut issues = Vec::new();
                if let Err(err) = source {
                    issues.push(format!("source count for '{}' failed: {}", mapping.table, err));
                }
                if let Err(err) = sink {
                    issues.push(format!("sink count for '{}' failed: {}", mapping.collection, err));
                }
                IntegrityReport {
                    collection: mapping.collection.clone(),
                    total_records: 0,
                    matched_records: 0,
                    mismatched_records: 0,
                    quality_score: 0.0,
                    issues,
                    timestamp,
                }
            }
        }
    }

    fn score(
        collection: &str,
        source: u64,
        sink: u64,
        timestamp: chrono::DateTime<chrono::Utc>,
    ) -> IntegrityReport {
        let total = source.max(sink);
        let matched = source.min(sink);
        let mismatched = total - matched;
        // Two empty stores are in perfect agreement.
        let quality_score = if total == 0 { 1.0 } else { matched as f64 / total as f64 };
        let issues = if mismatched > 0 {
            vec![format!(
                "record count mismatch for '{}': source={} sink={}",
                collection, source, sink
            )]
        } else {
            Vec::new()
        };
        IntegrityReport {
            collection: collection.to_string(),
            total_records: total,
            matched_records: matched,
            mismatched_records: mismatched,
            quality_score,
            issues,
            timestamp,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    #[test]
    fn divergent_counts_score_their_ratio_with_one_issue() {
        let report = IntegrityChecker::score("ticks", 100, 80, Utc::now());
        assert_eq!(report.quality_score, 0.8);
        assert_eq!(report.total_records, 100);
        assert_eq!(report.matched_records, 80);
        assert_eq!(report.mismatched_records, 20);
        assert_eq!(report.issues.len(), 1);
        assert!(report.issues[0].contains("source=100 sink=80"));
    }

    #[test]
    fn equal_counts_are_perfect_quality_with_no_issues() {
        let report = IntegrityChecker::score("ticks", 50, 50, Utc::now());
        assert_eq!(report.quality_score, 1.0);
        assert!(report.issues.is_empty());
    }

    #[test]
    fn sink_ahead_of_source_still_scores_the_ratio() {
        let report = IntegrityChecker::score("ticks", 80, 100, Utc::now());
        assert_eq!(report.quality_score, 0.8);
    }

    #[test]
    fn empty_stores_agree() {
        let report = IntegrityChecker::score("ticks", 0, 0, Utc::now());
        assert_eq!(report.quality_score, 1.0);
        assert!(report.issues.is_empty());
    }
}
