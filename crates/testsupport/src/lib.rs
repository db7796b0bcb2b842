//! Shared fixtures for integration tests.

use collection::{Collection, Document};
use common::Config;
use std::path::PathBuf;
use tempfile::TempDir;
use types::Value;

/// A collection in a temp directory; the directory lives as long as the
/// fixture.
pub struct TestCollection {
    pub collection: Collection,
    pub path: PathBuf,
    _dir: TempDir,
}

impl TestCollection {
    pub fn new() -> Self {
        Self::with_config(Config::default())
    }

    pub fn with_config(config: Config) -> Self {
        let dir = TempDir::new().expect("create temp dir");
        let path = dir.path().join("test.edb");
        let collection = Collection::open(&path, config).expect("open collection");
        TestCollection {
            collection,
            path,
            _dir: dir,
        }
    }

    /// Drop the collection without disposing (simulated crash) and
    /// reopen from the same file.
    pub fn crash_and_reopen(self, config: Config) -> Self {
        let TestCollection {
            collection,
            path,
            _dir,
        } = self;
        drop(collection);
        let reopened = Collection::open(&path, config).expect("reopen collection");
        TestCollection {
            collection: reopened,
            path,
            _dir,
        }
    }
}

impl Default for TestCollection {
    fn default() -> Self {
        Self::new()
    }
}

/// `doc(&[("price", Value::Int(5))])` with an explicit id.
pub fn doc(id: &str, fields: &[(&str, Value)]) -> Document {
    let mut document = Document::with_id(id);
    for (name, value) in fields {
        document.insert_field(*name, value.clone());
    }
    document
}

/// Seed `n` documents with ids `p0000..` and an integer `price` field.
pub fn seed_priced(collection: &Collection, n: i64) {
    for i in 0..n {
        collection
            .insert(doc(&format!("p{i:04}"), &[("price", Value::Int(i))]))
            .expect("seed insert");
    }
}
