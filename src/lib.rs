//! # azdo-harness
//!
//! An incremental, resumable harvesting pipeline for Azure DevOps. One sync
//! invocation detects what changed since the last run, fetches only those
//! entities (repository metadata, code files, pull requests, work items),
//! normalizes them into a uniform document record, and streams the result
//! in bounded-size batches for a downstream search indexer.
//!
//! ## Architecture
//!
//! ```text
//! ┌────────────┐   ┌─────────────────┐   ┌───────────┐   ┌─────────┐
//! │ SyncDriver │──▶│ change detection │──▶│ normalize │──▶│ batcher │
//! │ full/poll  │   │ WIQL / git log   │   │ per kind  │   │ size n  │
//! └────────────┘   └─────────────────┘   └───────────┘   └────┬────┘
//!                                                             ▼
//!                                      lazy batch iterator, pulled by host
//! ```
//!
//! The whole pipeline is one sequential pull: nothing is fetched until the
//! consumer asks for the next batch, so memory stays bounded at one batch
//! and dropping the iterator is cancellation.
//!
//! ## Quick Start
//!
//! ```bash
//! export AZUREDEVOPS_ACCESS_TOKEN=...
//! export AZUREDEVOPS_URL=https://dev.azure.com/your-org
//! azh sync                         # full load, batches as JSON lines
//! azh poll --start 1700000000 --end 1700086400
//! azh sources                      # enabled kinds and credential status
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`models`] | Entity and document types |
//! | [`error`] | Sync error taxonomy |
//! | [`remote`] | Azure DevOps REST access |
//! | [`workcopy`] | Local git checkout handling |
//! | [`normalize`] | Entity → document mapping |
//! | [`batch`] | Fixed-size lazy batching |
//! | [`sync`] | Sync driver and batch stream |

pub mod batch;
pub mod config;
pub mod error;
pub mod models;
pub mod normalize;
pub mod remote;
pub mod sync;
pub mod workcopy;
