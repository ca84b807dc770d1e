//! Layered tool exposure
//!
//! A caller never sees the whole catalog at once. It sees two tiers:
//!
//! - **essential**: operations named in configuration, always shown while
//!   their backend is connected;
//! - **matched**: operations ranked against the caller's free-text query,
//!   capped at a limit, with essential names removed.
//!
//! Listing is read-only: it never changes usage counts.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use gateway_core::{OperationDescriptor, Ranked, ScoringWeights, normalize_query, rank};
use serde::Serialize;

use crate::catalog::Catalog;

/// The operations visible to a caller for one listing
#[derive(Debug, Clone, Default)]
pub struct ExposureTier {
    /// Always-visible operations, in configured order
    pub essential: Vec<Arc<OperationDescriptor>>,
    /// Query-ranked operations, highest score first
    pub matched: Vec<Ranked<Arc<OperationDescriptor>>>,
    /// Number of operations the tiers were drawn from
    pub total_available: usize,
}

impl ExposureTier {
    /// Essential then matched descriptors, as one list
    pub fn operations(&self) -> impl Iterator<Item = &Arc<OperationDescriptor>> {
        self.essential
            .iter()
            .chain(self.matched.iter().map(|r| &r.item))
    }

    /// Caller-facing summary without schemas
    #[must_use]
    pub fn summary(&self, rationale: &str) -> ExposureSummary {
        ExposureSummary {
            essential: self.essential.iter().map(|d| d.name.clone()).collect(),
            matched: self
                .matched
                .iter()
                .map(|r| MatchedName {
                    name: r.item.name.clone(),
                    score: r.score,
                })
                .collect(),
            total_available: self.total_available,
            rationale: rationale.to_string(),
        }
    }
}

/// A computed tier plus a human-readable explanation
#[derive(Debug, Clone)]
pub struct Exposure {
    /// The tier
    pub tier: ExposureTier,
    /// e.g. "loaded 4 essential + 1 matched"
    pub rationale: String,
}

/// Serializable view of an [`ExposureTier`]
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExposureSummary {
    /// Essential operation names
    pub essential: Vec<String>,
    /// Matched names with scores
    pub matched: Vec<MatchedName>,
    /// Catalog size
    pub total_available: usize,
    /// Rationale string
    pub rationale: String,
}

/// Matched operation name with its score
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MatchedName {
    /// Operation name
    pub name: String,
    /// Relevance score
    pub score: f64,
}

/// Computes exposure tiers from the catalog
#[derive(Debug, Clone, Copy, Default)]
pub struct ExposureStrategy {
    weights: ScoringWeights,
}

impl ExposureStrategy {
    /// Strategy with custom scoring weights
    #[must_use]
    pub fn new(weights: ScoringWeights) -> Self {
        Self { weights }
    }

    /// Compute the tiers for `query` over the whole catalog.
    ///
    /// Essential names that no longer resolve are skipped. Ranking is
    /// truncated to `limit` before essential names are removed, so the
    /// matched tier can hold fewer than `limit` entries.
    #[must_use]
    pub fn expose(
        &self,
        catalog: &Catalog,
        query: Option<&str>,
        essential_names: &[String],
        limit: usize,
    ) -> Exposure {
        self.expose_snapshot(catalog.snapshot_with_usage(), query, essential_names, limit)
    }

    /// Compute the tiers over one `(descriptor, usage)` snapshot.
    ///
    /// Both tiers and `total_available` come from `snapshot` alone, so they
    /// always agree with each other.
    #[must_use]
    pub fn expose_snapshot(
        &self,
        snapshot: Vec<(Arc<OperationDescriptor>, u64)>,
        query: Option<&str>,
        essential_names: &[String],
        limit: usize,
    ) -> Exposure {
        let total_available = snapshot.len();

        let by_name: HashMap<&str, &Arc<OperationDescriptor>> = snapshot
            .iter()
            .map(|(d, _)| (d.name.as_str(), d))
            .collect();
        let mut seen = HashSet::new();
        let essential: Vec<Arc<OperationDescriptor>> = essential_names
            .iter()
            .filter(|name| seen.insert(name.as_str()))
            .filter_map(|name| by_name.get(name.as_str()).map(|d| Arc::clone(d)))
            .collect();

        let Some(query_lower) = normalize_query(query) else {
            let rationale = format!("essential only ({} operations)", essential.len());
            return Exposure {
                tier: ExposureTier {
                    essential,
                    matched: Vec::new(),
                    total_available,
                },
                rationale,
            };
        };

        let mut matched = rank(snapshot, &query_lower, &self.weights);
        matched.truncate(limit);
        let essential_set: HashSet<&str> = essential.iter().map(|d| d.name.as_str()).collect();
        matched.retain(|r| !essential_set.contains(r.item.name.as_str()));

        let rationale = format!(
            "loaded {} essential + {} matched",
            essential.len(),
            matched.len()
        );
        Exposure {
            tier: ExposureTier {
                essential,
                matched,
                total_available,
            },
            rationale,
        }
    }
}
