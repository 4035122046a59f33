//! Common utilities for integration tests.

use sf_script::{EngineConfig, EngineContext, SourceDocument};
use sf_traits::{HostEnvironment, StaticEnvironment};
use sf_types::Row;
use std::path::PathBuf;
use std::sync::Arc;

/// User name seen by scripts through the injected host environment.
pub const TEST_USER: &str = "tester";

/// Path of a file under `fixtures/`.
pub fn fixture_path(name: &str) -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .join("fixtures")
        .join(name)
}

/// A fixture script as a source document named after the file.
pub fn fixture_document(name: &str) -> SourceDocument {
    let source = std::fs::read_to_string(fixture_path(name))
        .unwrap_or_else(|e| panic!("failed to read fixture {name}: {e}"));
    SourceDocument::new(name, source)
}

/// Host environment with a fixed user name.
pub fn test_host() -> Arc<dyn HostEnvironment> {
    Arc::new(StaticEnvironment::new().with_user_name(TEST_USER))
}

/// Engine loaded with the given fixture documents, in order.
pub fn engine_with(fixtures: &[&str], config: EngineConfig) -> EngineContext {
    let documents: Vec<SourceDocument> = fixtures.iter().map(|f| fixture_document(f)).collect();
    EngineContext::load(&documents, config, test_host()).expect("fixtures should load")
}

/// Engine loaded with `functions.rhai` only.
pub fn functions_engine(config: EngineConfig) -> EngineContext {
    engine_with(&["functions.rhai"], config)
}

/// A small set of company rows.
pub fn companies() -> Vec<Row> {
    vec![
        Row::new()
            .with("name", "ACME Corp")
            .with("company_number", "00012345")
            .with("active", true),
        Row::new()
            .with("name", "Globex")
            .with("company_number", "98765")
            .with("active", false),
        Row::new()
            .with("name", "Initech LTD")
            .with("company_number", "5550001")
            .with("active", true),
    ]
}
