//! Tool hub core library
//!
//! Dependency-light primitives shared by the gateway: the
//! [`OperationDescriptor`] record and the relevance scoring used by the
//! exposure strategy. Nothing here performs I/O or holds locks.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod descriptor;
pub mod scoring;

pub use descriptor::{DescriptorError, OperationDescriptor, parse_keyword_tags};
pub use scoring::{Ranked, ScoringWeights, normalize_query, rank, score, text_relevance};
