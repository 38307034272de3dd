//! Durable metadata storage

pub mod database;

pub use database::{DocumentListQuery, MetadataStore, StatusChange};
