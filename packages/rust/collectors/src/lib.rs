//! Source collectors, the discussion tree fetcher, and the collector registry.
//!
//! This crate provides:
//! - [`Collector`]: the contract every source plugin implements
//! - [`sources`]: built-in collectors (Hacker News, Reddit, RSS/Atom, arXiv)
//! - [`TreeFetcher`]: bounded-depth, concurrent retrieval of reply trees
//! - [`CollectorRegistry`]: the set of collectors available for a run

pub mod collector;
pub mod document;
pub mod http;
pub mod registry;
pub mod sources;
pub mod tree;

pub use collector::{CollectOutcome, Collector, CollectorContext};
pub use document::Document;
pub use registry::{BUILTIN_COLLECTORS, CollectorEntry, CollectorRegistry};
pub use tree::{FetchedNode, NodeSource, TreeFetcher};
