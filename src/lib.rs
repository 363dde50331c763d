//! # Report Agent
//!
//! Turns a user's scanned PDF report into a per-user vector index and
//! answers questions about it with a tool-using ReAct agent.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────┐   ┌──────────┐   ┌──────────────┐   ┌──────────────┐
//! │  Upload  │──▶│   OCR    │──▶│ Pages+Chunks │──▶│ Embed+Index  │
//! │  (PDF)   │   │ ocrmypdf │   │ pdf-extract  │   │ SQLite/user  │
//! └──────────┘   └──────────┘   └──────────────┘   └──────┬───────┘
//!                                                         │
//!       ┌─────────────────────────────────────────────────┘
//!       ▼
//! ┌──────────┐   ┌──────────┐   ┌──────────────────────────┐
//! │ Retrieve │──▶│  Prompt  │──▶│  ReAct agent             │
//! │  top-k   │   │          │   │  tools: search, getAll…  │
//! └──────────┘   └──────────┘   └──────────────────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! report-agent init
//! report-agent ingest alice ./report.pdf
//! report-agent query alice "Is my glucose normal?"
//! report-agent serve
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`models`] | Core data types |
//! | [`error`] | Pipeline error taxonomy |
//! | [`ocr`] | OCR normalization via `ocrmypdf` |
//! | [`extract`] | Per-page PDF text extraction |
//! | [`chunk`] | Sliding-window segmentation |
//! | [`embedding`] | Embedding provider abstraction |
//! | [`index`] | Per-user vector index lifecycle |
//! | [`db`] | Index file connection |
//! | [`migrate`] | Index file schema |
//! | [`retrieval`] | Top-k similarity retrieval |
//! | [`agent`] | ReAct loop, tools and reasoning models |
//! | [`service`] | Ingestion and query orchestration |
//! | [`server`] | HTTP API |
//! | [`http`] | Shared HTTP retry helper |

pub mod agent;
pub mod chunk;
pub mod config;
pub mod db;
pub mod embedding;
pub mod error;
pub mod extract;
pub mod http;
pub mod index;
pub mod migrate;
pub mod models;
pub mod ocr;
pub mod retrieval;
pub mod server;
pub mod service;
