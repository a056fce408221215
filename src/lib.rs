//! # press-sync
//!
//! Incremental mirroring of WordPress.com content into Dify knowledge bases.
//!
//! Each registered site has one destination dataset. A reconciliation pass
//! fetches the site's items modified since its watermark, renders them to
//! markdown, and creates or updates one destination document per item,
//! remembering which document belongs to which item.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────┐   ┌────────────┐   ┌──────────────┐
//! │ WordPress.com│──▶│ Reconciler │──▶│     Dify     │
//! │  (fetch)     │   │ + transform│   │  (documents) │
//! └──────────────┘   └─────┬──────┘   └──────────────┘
//!                          │
//!                    ┌─────▼──────┐
//!                    │ Site store │
//!                    │  (SQLite)  │
//!                    └────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! psync init                     # create the store
//! psync serve                    # onboarding server + periodic sync
//! psync open-oauth               # print the authorization URL
//! psync sync-site 12345          # one pass for one site
//! psync sync-all-sites
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`models`] | Site records and items |
//! | [`kv`] | Key-value store abstraction |
//! | [`sites`] | Site record store |
//! | [`connector_wpcom`] | WordPress.com source client |
//! | [`fetch`] | Paginated incremental fetch |
//! | [`transform`] | HTML → markdown |
//! | [`destination`] | Dify client |
//! | [`reconcile`] | Reconciliation passes |
//! | [`progress`] | Sync event reporting |
//! | [`scheduler`] | Periodic trigger |
//! | [`oauth`] | Site onboarding |
//! | [`server`] | Onboarding HTTP server |
//! | [`db`] | Database connection |
//! | [`migrate`] | Schema creation |

pub mod commands;
pub mod config;
pub mod connector_wpcom;
pub mod db;
pub mod destination;
pub mod error;
pub mod fetch;
pub mod kv;
pub mod logging;
pub mod migrate;
pub mod models;
pub mod oauth;
pub mod progress;
pub mod reconcile;
pub mod scheduler;
pub mod server;
pub mod sites;
pub mod transform;
