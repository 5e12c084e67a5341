//! Helpers shared across CLI commands.

use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::DateTime;
use imgdup_core::{ImageStore, StoreConfig};
use tracing::debug;

/// In-memory database marker accepted by `--db`.
pub const MEMORY_DB: &str = ":memory:";

/// Build the store configuration for a `--db` value.
pub fn store_config(db: &str, max_working_set_size: usize) -> StoreConfig {
    if db == MEMORY_DB {
        StoreConfig::in_memory(max_working_set_size)
    } else {
        StoreConfig::file(db, max_working_set_size)
    }
}

/// Open and load the image store.
pub async fn open_store(db: &str, max_working_set_size: usize) -> Result<Arc<ImageStore>> {
    let store = Arc::new(ImageStore::new(store_config(db, max_working_set_size)));
    store
        .load()
        .await
        .with_context(|| format!("Failed to open database: {db}"))?;
    debug!(db, "Store loaded");
    Ok(store)
}

/// Format an RFC 3339 date for display, passing unparseable input through.
pub fn format_date(date: &str) -> String {
    match DateTime::parse_from_rfc3339(date) {
        Ok(dt) => dt.format("%Y-%m-%d %H:%M:%S UTC").to_string(),
        Err(_) => date.to_string(),
    }
}
