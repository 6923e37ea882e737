//! # property-nlq
//!
//! Natural-language search over a property listings database. A query such
//! as *"casas con piscina en zona 10 por menos de 300000"* is sent to a local
//! language model, the SQL it answers with is pulled apart into WHERE
//! conditions and bound parameters, spliced into a fixed query skeleton,
//! checked against a set of safety rules and, when rejected, sent back to
//! the model for a bounded number of corrections.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────┐   ┌──────────────────────────────────────┐   ┌─────────┐
//! │  Ollama  │◀─▶│          TranslationPipeline          │──▶│  MySQL  │
//! │ (model)  │   │ extract ▸ assemble ▸ validate ▸ repair│   │         │
//! └──────────┘   └───────────────────┬──────────────────┘   └─────────┘
//!                                    │
//!                      ┌─────────────┴─────────────┐
//!                      ▼                           ▼
//!                 ┌──────────┐               ┌──────────┐
//!                 │   CLI    │               │   HTTP   │
//!                 │  (nlq)   │               │  (axum)  │
//!                 └──────────┘               └──────────┘
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`models`] | Core data types |
//! | [`error`] | Error taxonomy |
//! | [`extract`] | Fenced-block extraction and classification |
//! | [`assemble`] | WHERE fragment → full template |
//! | [`validate`] | Safety rules |
//! | [`repair`] | Bounded correction loop |
//! | [`pipeline`] | Query → safe template |
//! | [`prompts`] | Prompt templates |
//! | [`generator`] | Model backend |
//! | [`repository`] | Query execution |
//! | [`search`] | Search use case |
//! | [`server`] | HTTP API |
//! | [`db`] | Database connection |
//! | [`logging`] | Tracing subscriber setup |

pub mod assemble;
pub mod commands;
pub mod config;
pub mod db;
pub mod error;
pub mod extract;
pub mod generator;
pub mod logging;
pub mod models;
pub mod pipeline;
pub mod prompts;
pub mod repair;
pub mod repository;
pub mod search;
pub mod server;
pub mod validate;
