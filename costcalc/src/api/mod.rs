//! API layer for HTTP request handling and data models.
//!
//! - **[`handlers`]**: Axum route handlers
//! - **[`models`]**: Query and response types
//!
//! # API Structure
//!
//! - **Cost trees** (`/tree`, `/tree/{costType}`): the caller's costs this month, optionally with
//!   a month-end projection
//! - **Estimations** (`/estimation/flow/*`, `/estimation/import/*`): expected monthly cost of a
//!   flow or import type, from comparable workloads across the cluster
//! - **Health** (`/health`)
//!
//! The OpenAPI document is served at `/docs`.

pub mod handlers;
pub mod models;
