//! Search-index store DTOs
//!
//! Responses of the Elasticsearch-compatible document and search APIs.

use serde::{Deserialize, Serialize};

/// Response to a document write
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexResponse {
    #[serde(rename = "_id")]
    pub id: String,
    #[serde(rename = "_index")]
    pub index: String,
    #[serde(default)]
    pub result: Option<String>,
}

/// Search response trimmed to the aggregations the correlator requests
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SearchResponse {
    #[serde(default)]
    pub aggregations: Option<DetectionAggregations>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DetectionAggregations {
    pub by_technique: TermsAggregation<TechniqueBucket>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TermsAggregation<B> {
    #[serde(default = "Vec::new")]
    pub buckets: Vec<B>,
}

impl<B> Default for TermsAggregation<B> {
    fn default() -> Self {
        Self {
            buckets: Vec::new(),
        }
    }
}

/// Documents for one technique
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TechniqueBucket {
    pub key: String,
    pub doc_count: u64,
    #[serde(default)]
    pub detection_status: TermsAggregation<KeyBucket>,
    #[serde(default)]
    pub rule_names: TermsAggregation<KeyBucket>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KeyBucket {
    pub key: String,
    pub doc_count: u64,
}

/// Per-technique alert evidence extracted from a search response
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DetectionBucket {
    pub technique_id: String,
    pub document_count: u64,
    /// Documents carrying `detection_status = detected`
    pub detected_count: u64,
    /// Whether any document carries `detection_status = evaded`
    pub marked_evaded: bool,
    pub rule_names: Vec<String>,
}

impl DetectionBucket {
    /// True when at least one alert matched the technique
    pub fn has_alert(&self) -> bool {
        self.detected_count > 0 || !self.rule_names.is_empty()
    }
}

impl SearchResponse {
    /// Flattens the technique aggregation into detection buckets
    pub fn into_buckets(self) -> Vec<DetectionBucket> {
        let Some(aggs) = self.aggregations else {
            return Vec::new();
        };

        aggs.by_technique
            .buckets
            .into_iter()
            .map(|bucket| {
                let status_count = |wanted: &str| {
                    bucket
                        .detection_status
                        .buckets
                        .iter()
                        .filter(|s| s.key.eq_ignore_ascii_case(wanted))
                        .map(|s| s.doc_count)
                        .sum::<u64>()
                };
                let detected_count = status_count("detected");
                let marked_evaded = status_count("evaded") > 0;

                DetectionBucket {
                    technique_id: bucket.key,
                    document_count: bucket.doc_count,
                    detected_count,
                    marked_evaded,
                    rule_names: bucket
                        .rule_names
                        .buckets
                        .into_iter()
                        .map(|r| r.key)
                        .collect(),
                }
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_into_buckets() {
        let response: SearchResponse = serde_json::from_value(serde_json::json!({
            "took": 3,
            "hits": {"total": {"value": 5}},
            "aggregations": {
                "by_technique": {
                    "buckets": [
                        {
                            "key": "T1078",
                            "doc_count": 3,
                            "detection_status": {"buckets": [{"key": "Detected", "doc_count": 2}, {"key": "pending", "doc_count": 1}]},
                            "rule_names": {"buckets": [{"key": "Suspicious Logon", "doc_count": 2}]}
                        },
                        {
                            "key": "T1018",
                            "doc_count": 2,
                            "detection_status": {"buckets": [{"key": "pending", "doc_count": 2}]},
                            "rule_names": {"buckets": []}
                        }
                    ]
                }
            }
        }))
        .unwrap();

        let buckets = response.into_buckets();
        assert_eq!(buckets.len(), 2);
        assert_eq!(buckets[0].detected_count, 2);
        assert!(buckets[0].has_alert());
        assert_eq!(buckets[0].rule_names, vec!["Suspicious Logon".to_string()]);
        assert!(!buckets[1].has_alert());
        assert!(!buckets[1].marked_evaded);
    }

    #[test]
    fn test_missing_aggregations() {
        let response: SearchResponse = serde_json::from_str("{}").unwrap();
        assert!(response.into_buckets().is_empty());
    }
}
