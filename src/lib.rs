//! batchsweep - resilient batch dispatch for marketplace back-offices.
//!
//! Pulls items group by group from a backend, pushes a per-item operation in
//! fixed-size batches through a bounded worker pool, and recovers from a broken
//! session without losing or double-counting work.
//!
//! The engine lives in [`services`]; the backend contracts and the bundled
//! HTTP adapter live in [`backend`].
//!
//! # HTTP backend contract
//!
//! - `GET {groups_path}` returns `[{"id", "name"}]`.
//! - `POST {items_path}` with `{"group_id", "group_name", "offset", "limit", "filter"}`
//!   returns `{"items": [{"id", "name", "payload"}]}`.
//! - `POST {operation_path}` with `{"ids", "params"}` returns
//!   `{"results": [{"id", "success", "code", "status"}]}`; an entry succeeded
//!   when `success` is true or `code` is 0.

pub mod backend;
pub mod cli;
pub mod config;
pub mod models;
pub mod services;
