//! Persisted metadata records.

use std::collections::BTreeMap;

use randomtrust_tests::TestOutcome;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::chaos::LorenzConfig;
use crate::mixer::EntropyMetrics;
use crate::noise::NoiseConfig;
use crate::rng::OutputFormat;

/// One entropy mix and where its raw artifacts were stored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimulationRecord {
    pub simulation_id: Uuid,
    pub noise_seed: Option<u64>,
    pub noise_config: NoiseConfig,
    pub chaos_config: LorenzConfig,
    pub metrics: EntropyMetrics,
    pub seed_hex: String,
    pub pool_hash_hex: String,
    pub chaos_checksum: String,
    pub noise_raw_path: String,
    pub chaos_raw_path: String,
}

/// One generator run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunRecord {
    pub run_id: Uuid,
    pub simulation_id: Uuid,
    pub format: OutputFormat,
    pub length: usize,
    pub entropy_metrics: EntropyMetrics,
    /// Hex BLAKE2s-256 of the generator seed; the seed itself is not stored here.
    pub seed_hash: String,
    /// Artifact path of the raw payload, if one was persisted.
    pub export_path: Option<String>,
    pub run_checksum: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditRecord {
    pub audit_id: Uuid,
    pub name: String,
    pub description: Option<String>,
    pub data_hash: String,
    pub result_path: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReportStatus {
    Passed,
    Failed,
}

/// Stored verdict of one battery test against a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TestReportRecord {
    pub run_id: Uuid,
    pub test_name: String,
    pub status: ReportStatus,
    /// `statistic`, `threshold` and every detail of the outcome.
    #[serde(with = "float_map")]
    pub metrics: BTreeMap<String, f64>,
}

impl TestReportRecord {
    pub fn from_outcome(run_id: Uuid, outcome: &TestOutcome) -> Self {
        let mut metrics = BTreeMap::new();
        metrics.insert("statistic".to_string(), outcome.metric);
        metrics.insert("threshold".to_string(), outcome.threshold);
        for (key, value) in &outcome.details {
            metrics.insert(key.clone(), *value);
        }
        Self {
            run_id,
            test_name: outcome.name.clone(),
            status: if outcome.passed {
                ReportStatus::Passed
            } else {
                ReportStatus::Failed
            },
            metrics,
        }
    }
}

/// JSON has no infinity; non-finite values round-trip as `"inf"`, `"-inf"`, `"nan"`.
mod float_map {
    use std::collections::BTreeMap;

    use serde::de::Error as _;
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    #[derive(Serialize, Deserialize)]
    #[serde(untagged)]
    enum JsonFloat {
        Number(f64),
        Text(String),
    }

    pub fn serialize<S: Serializer>(map: &BTreeMap<String, f64>, s: S) -> Result<S::Ok, S::Error> {
        let encoded: BTreeMap<&str, JsonFloat> = map
            .iter()
            .map(|(k, &v)| {
                let value = if v.is_finite() {
                    JsonFloat::Number(v)
                } else if v.is_nan() {
                    JsonFloat::Text("nan".into())
                } else if v > 0.0 {
                    JsonFloat::Text("inf".into())
                } else {
                    JsonFloat::Text("-inf".into())
                };
                (k.as_str(), value)
            })
            .collect();
        encoded.serialize(s)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<BTreeMap<String, f64>, D::Error> {
        let raw = BTreeMap::<String, JsonFloat>::deserialize(d)?;
        raw.into_iter()
            .map(|(k, v)| {
                let value = match v {
                    JsonFloat::Number(x) => x,
                    JsonFloat::Text(t) => match t.as_str() {
                        "inf" => f64::INFINITY,
                        "-inf" => f64::NEG_INFINITY,
                        "nan" => f64::NAN,
                        other => return Err(D::Error::custom(format!("invalid float {other:?}"))),
                    },
                };
                Ok((k, value))
            })
            .collect()
    }
}
