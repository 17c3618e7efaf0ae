//! Schema registry backed by a directory of `<table>.json` files.
//!
//! A schema file refines type conversion for its table; absence is not an
//! error (conversion degrades to best-effort). Files are read once and
//! cached, including negative results, for the process lifetime. Operators
//! ship schema changes by restarting the server.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use dashmap::DashMap;
use possync_domain::TableSchema;
use tracing::{debug, warn};

/// Cached loader for table field descriptors.
pub struct SchemaRegistry {
    dir: PathBuf,
    strict_tables: bool,
    cache: DashMap<String, Option<Arc<TableSchema>>>,
}

impl SchemaRegistry {
    /// Creates a registry over a schema directory.
    ///
    /// With `strict_tables` ingress rejects batches for tables that have no
    /// schema file, instead of applying them with fallback conversion.
    pub fn new(dir: impl Into<PathBuf>, strict_tables: bool) -> Self {
        SchemaRegistry {
            dir: dir.into(),
            strict_tables,
            cache: DashMap::new(),
        }
    }

    /// Creates a registry wrapped in an `Arc` for sharing across tasks.
    pub fn new_shared(dir: impl Into<PathBuf>, strict_tables: bool) -> Arc<Self> {
        Arc::new(Self::new(dir, strict_tables))
    }

    /// Whether tables without a schema file are rejected at ingress.
    pub fn strict_tables(&self) -> bool {
        self.strict_tables
    }

    /// Loads the schema for a table, or `None` when the file is missing,
    /// unreadable or malformed. The result is cached either way.
    pub fn load(&self, table: &str) -> Option<Arc<TableSchema>> {
        let key = table.to_lowercase();
        if let Some(cached) = self.cache.get(&key) {
            return cached.value().clone();
        }

        let loaded = self.read_schema_file(&key);
        self.cache.insert(key, loaded.clone());
        loaded
    }

    fn read_schema_file(&self, table: &str) -> Option<Arc<TableSchema>> {
        let path = self.dir.join(format!("{table}.json"));
        let body = match fs::read_to_string(&path) {
            Ok(body) => body,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                debug!(table, path = %path.display(), "no schema file, using fallback conversion");
                return None;
            }
            Err(err) => {
                warn!(table, path = %path.display(), error = %err, "schema file unreadable");
                return None;
            }
        };

        match TableSchema::from_json(table, &body) {
            Ok(schema) => {
                debug!(table, fields = schema.fields.len(), "schema loaded");
                Some(Arc::new(schema))
            }
            Err(err) => {
                warn!(table, path = %path.display(), error = %err, "schema file malformed");
                None
            }
        }
    }

    /// Lists the tables that have a schema file, by directory scan. Used by
    /// the retention pruner to walk the known ledgers; reads the directory
    /// each call so files added at runtime are picked up.
    pub fn known_tables(&self) -> Vec<String> {
        let entries = match fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(err) => {
                warn!(dir = %self.dir.display(), error = %err, "schema directory unreadable");
                return Vec::new();
            }
        };

        let mut tables: Vec<String> = entries
            .filter_map(Result::ok)
            .filter_map(|entry| stem_of_json(&entry.path()))
            .collect();
        tables.sort();
        tables
    }
}

fn stem_of_json(path: &Path) -> Option<String> {
    if path.extension()?.to_str()? != "json" {
        return None;
    }
    Some(path.file_stem()?.to_str()?.to_lowercase())
}
