//! Exact nearest-neighbour search over labelled intent examples.
//!
//! Each dataset is a JSON-lines file of `{"intent": label, "embedding": [..]}`
//! rows. Vectors are L2-normalised on load and ranked by inner product, so
//! ranking is by cosine similarity.

use std::path::Path;

use futures::future::BoxFuture;
use serde::Deserialize;
use tracing::{debug, warn};

use drover_core::config::{AppConfig, IntentConfig};
use drover_core::error::{DroverError, Result};
use drover_core::traits::SemanticRetriever;
use drover_core::types::UserType;

use crate::embeddings::normalize;

#[derive(Deserialize)]
struct DatasetRow {
    intent: String,
    embedding: Vec<f32>,
}

/// Flat (brute-force) inner-product index.
#[derive(Debug, Clone, Default)]
pub struct FlatIndex {
    labels: Vec<String>,
    vectors: Vec<Vec<f32>>,
}

impl FlatIndex {
    /// Build an index from labelled vectors. All vectors must share one dimension.
    pub fn from_rows(rows: impl IntoIterator<Item = (String, Vec<f32>)>) -> Result<Self> {
        let mut index = Self::default();
        for (label, mut vector) in rows {
            if let Some(dims) = index.dims() {
                if vector.len() != dims {
                    return Err(DroverError::Retrieval(format!(
                        "dimension mismatch for '{}': expected {}, got {}",
                        label,
                        dims,
                        vector.len()
                    )));
                }
            }
            normalize(&mut vector);
            index.labels.push(label);
            index.vectors.push(vector);
        }
        Ok(index)
    }

    /// Load a JSON-lines dataset. Malformed lines are logged and skipped.
    pub fn from_jsonl(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            DroverError::Retrieval(format!("cannot read dataset {}: {}", path.display(), e))
        })?;

        let mut rows = Vec::new();
        for (line_no, line) in content.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            match serde_json::from_str::<DatasetRow>(line) {
                Ok(row) => rows.push((row.intent, row.embedding)),
                Err(e) => warn!(
                    path = %path.display(),
                    line = line_no + 1,
                    error = %e,
                    "Skipping malformed dataset row"
                ),
            }
        }

        let index = Self::from_rows(rows)?;
        debug!(path = %path.display(), rows = index.len(), "Intent dataset loaded");
        Ok(index)
    }

    pub fn dims(&self) -> Option<usize> {
        self.vectors.first().map(Vec::len)
    }

    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }

    /// Labels of the `k` rows with the highest inner product with `query`.
    pub fn search(&self, query: &[f32], k: usize) -> Result<Vec<String>> {
        let Some(dims) = self.dims() else {
            return Ok(Vec::new());
        };
        if query.len() != dims {
            return Err(DroverError::Retrieval(format!(
                "query has {} dimensions, index has {}",
                query.len(),
                dims
            )));
        }

        let mut scored: Vec<(f32, usize)> = self
            .vectors
            .iter()
            .enumerate()
            .map(|(i, v)| (v.iter().zip(query).map(|(a, b)| a * b).sum(), i))
            .collect();
        // Stable sort keeps dataset order among equal scores.
        scored.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap_or(std::cmp::Ordering::Equal));

        Ok(scored
            .into_iter()
            .take(k)
            .map(|(_, i)| self.labels[i].clone())
            .collect())
    }
}

/// `SemanticRetriever` holding one flat index per user type.
#[derive(Debug, Clone, Default)]
pub struct FlatIndexRetriever {
    customer: Option<FlatIndex>,
    driver: Option<FlatIndex>,
}

impl FlatIndexRetriever {
    pub fn new(customer: Option<FlatIndex>, driver: Option<FlatIndex>) -> Self {
        Self { customer, driver }
    }

    /// Load the datasets named in the `[intent]` section.
    pub fn from_config(config: &IntentConfig) -> Result<Self> {
        let load = |raw: &Option<String>| -> Result<Option<FlatIndex>> {
            raw.as_deref()
                .map(|p| FlatIndex::from_jsonl(&AppConfig::resolve_path(p)))
                .transpose()
        };
        Ok(Self {
            customer: load(&config.customer_dataset)?,
            driver: load(&config.driver_dataset)?,
        })
    }

    fn index_for(&self, user_type: UserType) -> Option<&FlatIndex> {
        match user_type {
            UserType::Customer => self.customer.as_ref(),
            UserType::Driver => self.driver.as_ref(),
        }
    }
}

impl SemanticRetriever for FlatIndexRetriever {
    fn top_k(
        &self,
        query_embedding: &[f32],
        user_type: UserType,
        k: usize,
    ) -> BoxFuture<'_, Result<Vec<String>>> {
        let result = match self.index_for(user_type) {
            Some(index) => index.search(query_embedding, k),
            None => Err(DroverError::Retrieval(format!(
                "no intent dataset configured for {}",
                user_type.as_str()
            ))),
        };
        Box::pin(async move { result })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use drover_test_utils::write_intent_dataset;

    fn rows() -> Vec<(String, Vec<f32>)> {
        vec![
            ("coupon inquiry".into(), vec![1.0, 0.0, 0.0]),
            ("order inquiry".into(), vec![0.0, 1.0, 0.0]),
            ("coupon inquiry".into(), vec![10.0, 1.0, 0.0]),
            ("account inquiry".into(), vec![0.0, 0.0, 1.0]),
        ]
    }

    #[test]
    fn test_search_ranks_by_cosine() {
        let index = FlatIndex::from_rows(rows()).unwrap();
        let top = index.search(&[0.9, 0.1, 0.0], 3).unwrap();
        assert_eq!(top, vec!["coupon inquiry", "coupon inquiry", "order inquiry"]);
    }

    #[test]
    fn test_search_k_larger_than_index() {
        let index = FlatIndex::from_rows(rows()).unwrap();
        assert_eq!(index.search(&[0.0, 0.0, 1.0], 50).unwrap().len(), 4);
        assert!(FlatIndex::default().search(&[1.0], 5).unwrap().is_empty());
    }

    #[test]
    fn test_dimension_mismatch() {
        let index = FlatIndex::from_rows(rows()).unwrap();
        assert!(matches!(
            index.search(&[1.0, 0.0], 2),
            Err(DroverError::Retrieval(_))
        ));
        let bad = vec![("a".to_string(), vec![1.0]), ("b".to_string(), vec![1.0, 2.0])];
        assert!(FlatIndex::from_rows(bad).is_err());
    }

    #[test]
    fn test_jsonl_skips_bad_lines() {
        let file = write_intent_dataset(&[
            ("coupon inquiry", vec![1.0, 0.0]),
            ("order inquiry", vec![0.0, 1.0]),
        ]);
        std::fs::OpenOptions::new()
            .append(true)
            .open(file.path())
            .and_then(|mut f| std::io::Write::write_all(&mut f, b"not json\n\n"))
            .unwrap();

        let index = FlatIndex::from_jsonl(file.path()).unwrap();
        assert_eq!(index.len(), 2);
        assert_eq!(index.dims(), Some(2));
    }

    #[tokio::test]
    async fn test_retriever_per_user_type() {
        let customer = FlatIndex::from_rows(rows()).unwrap();
        let retriever = FlatIndexRetriever::new(Some(customer), None);

        let top = retriever
            .top_k(&[0.0, 1.0, 0.0], UserType::Customer, 1)
            .await
            .unwrap();
        assert_eq!(top, vec!["order inquiry"]);

        assert!(retriever
            .top_k(&[0.0, 1.0, 0.0], UserType::Driver, 1)
            .await
            .is_err());
    }

    #[test]
    fn test_from_config_loads_datasets() {
        let file = write_intent_dataset(&[("certification inquiry", vec![0.5, 0.5])]);
        let config = IntentConfig {
            driver_dataset: Some(file.path().display().to_string()),
            ..IntentConfig::default()
        };
        let retriever = FlatIndexRetriever::from_config(&config).unwrap();
        assert!(retriever.index_for(UserType::Customer).is_none());
        assert_eq!(retriever.index_for(UserType::Driver).map(FlatIndex::len), Some(1));
    }
}
