//! Integration tests for scriptflow.
//!
//! Scripts are loaded from the files under `fixtures/`, the way a deployed
//! pipeline loads them.
//!
//! ```bash
//! cargo test -p integration-tests
//! ```

mod common;
mod engine_test;
mod pipeline_test;
