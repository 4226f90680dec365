//! Two-tier, stale-while-revalidate cache in front of book-metadata providers.

pub mod application;
pub mod cache;
pub mod config;
pub mod infra;
pub mod provider;
