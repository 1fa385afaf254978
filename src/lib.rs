//! # Patent Ingest
//!
//! Harvests bulk patent open data published through a CKAN catalog and
//! loads it into a normalized SQLite database.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────┐   ┌──────────┐   ┌──────────────┐   ┌──────────┐
//! │ Catalog  │──▶│  Fetch   │──▶│ Content cache│──▶│  Detect  │
//! │ (CKAN)   │   │ (reqwest)│   │ (blob + flag)│   │ + decode │
//! └──────────┘   └──────────┘   └──────────────┘   └────┬─────┘
//!                                                       ▼
//!                ┌──────────┐   ┌──────────┐   ┌──────────────┐
//!                │  SQLite  │◀──│  Mapper  │◀──│    Parse     │
//!                │  store   │   │          │   │ CSV/JSON/XML │
//!                └──────────┘   └──────────┘   └──────────────┘
//! ```
//!
//! Every blob is cached on disk before it is parsed, and every resource is
//! flagged once its rows are stored, so a run can be interrupted and
//! resumed without downloading or parsing anything twice.
//!
//! ## Quick Start
//!
//! ```bash
//! patents init            # create database
//! patents fetch           # run one ingestion
//! patents count           # patents stored
//! patents serve           # HTTP control surface
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`models`] | Catalog descriptors and row types |
//! | [`catalog`] | CKAN `package_show` client |
//! | [`fetch`] | Resource downloads |
//! | [`cache`] | Downloaded-blob cache and processed flags |
//! | [`detect`] | Payload format and encoding detection |
//! | [`parse`] | CSV / JSON / XML / ZIP record parsing |
//! | [`mapping`] | Source labels to canonical rows |
//! | [`store`] | Normalized tables and upserts |
//! | [`ingest`] | Run orchestration |
//! | [`ingestor`] | Single-run guard and status |
//! | [`progress`] | Progress events and reporters |
//! | [`server`] | HTTP control surface |
//! | [`stats`] | Database and cache overview |
//! | [`db`] | Database connection |
//! | [`migrate`] | Schema migrations |

pub mod cache;
pub mod catalog;
pub mod config;
pub mod db;
pub mod detect;
pub mod error;
pub mod fetch;
pub mod ingest;
pub mod ingestor;
pub mod mapping;
pub mod migrate;
pub mod models;
pub mod parse;
pub mod progress;
pub mod server;
pub mod stats;
pub mod store;
