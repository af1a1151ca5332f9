//! # pricequeue
//!
//! Resumable price-scraping work queue. Postal codes are seeded into a
//! durable store, claimed one at a time, and quoted against a form endpoint
//! with synthetic identities, rotating proxies and randomized pacing. Every
//! item ends `done` or `failed`; an interrupted run picks up where it left
//! off.

pub mod checkpoint;
pub mod config;
pub mod db;
pub mod engine;
pub mod error;
pub mod http;
pub mod identity;
pub mod model;
pub mod proxy;
pub mod seed;
pub mod store;
pub mod telemetry;
