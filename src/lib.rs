//! Lead gateway: accepts raw lead submissions, validates and normalizes
//! them against deployment-specific rules, maps them into the partner's
//! schema and delivers them with retries and a full audit trail.

pub mod config;
pub mod db;
pub mod errors;
pub mod handlers;
pub mod mapping;
pub mod models;
pub mod normalization;
pub mod partner_client;
pub mod payload;
pub mod processor;
pub mod retry;
pub mod store;
pub mod validation;
pub mod worker;
