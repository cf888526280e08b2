//! # class-mapper
//!
//! Matches obfuscated Java classes against a deobfuscated reference
//! implementation and produces a confidence-scored name mapping.
//!
//! ## Architecture
//!
//! - **model**: Class records shared by both sides and type-name normalization
//! - **crossref**: Outgoing references per method, aggregated into a graph
//! - **behavior**: Internal behavior (call graph, state, loops, arrays) from Java syntax trees
//! - **classify**: Structural classification of array-heavy classes
//! - **structure**: Java source extraction using tree-sitter AST parsing
//! - **refs**: Cross-reference extraction from Java sources
//! - **bytecode**: Extraction from `javap -c -p` disassembly listings
//! - **ingest**: Fail-fast parallel worker pool over extractor providers
//! - **progress**: Ingestion progress counters and terminal bar
//! - **cache**: Persistent LMDB cache of extracted records keyed by content checksum
//! - **scan**: Artifact discovery in input directories
//! - **loader**: Loading and project filtering of both sides
//! - **weights**: Scoring, resolution and conflict constants
//! - **scorer**: Weighted multi-dimension similarity between two classes
//! - **resolver**: Multi-pass matching from anchors outwards
//! - **conflict**: Arbitration when several classes claim one obfuscated name
//! - **report**: CSV and JSON output

pub mod behavior;
pub mod bytecode;
pub mod cache;
pub mod classify;
pub mod cli;
pub mod config;
pub mod conflict;
pub mod crossref;
pub mod error;
pub mod ingest;
pub mod loader;
pub mod model;
pub mod progress;
pub mod refs;
pub mod report;
pub mod resolver;
pub mod scan;
pub mod scorer;
pub mod structure;
pub mod weights;
