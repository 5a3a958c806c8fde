//! Background news engine: subscribes to RSS/Atom feeds, continuously fetches
//! and classifies items, embeds and clusters them into stories, rates
//! newsworthiness with a local LLM, and serves a ranked, optionally
//! personalized, feed.

pub mod ai;
pub mod classify;
pub mod config;
pub mod db;
pub mod engine;
pub mod error;
pub mod feed;
pub mod models;

pub(crate) mod util;
