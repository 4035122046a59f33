//! Engine behavior observed through the public API.

use crate::common::{companies, engine_with, fixture_document, functions_engine, TEST_USER};
use sf_error::{ScriptError, SfError};
use sf_script::{
    CallOptions, EngineConfig, EngineContext, EngineLimits, Routing, ScriptSource, SourceDocument,
};
use sf_types::{FunctionRole, Row, Value};
use std::sync::Arc;
use std::time::{Duration, Instant};

fn script_error(result: sf_error::Result<impl std::fmt::Debug>) -> ScriptError {
    match result {
        Err(SfError::Script(e)) => e,
        other => panic!("expected a script error, got {other:?}"),
    }
}

#[test]
fn test_lowercase_string_column() {
    let engine = functions_engine(EngineConfig::new());

    for row in companies() {
        let expected = match row.get("name") {
            Some(Value::String(s)) => s.to_lowercase(),
            other => panic!("unexpected fixture value {other:?}"),
        };
        let value = engine.transform_column("lowercase", "name", row).unwrap();
        assert_eq!(value, Value::String(expected));
    }
}

#[test]
fn test_lowercase_null_column_is_execution_error() {
    let engine = functions_engine(EngineConfig::new());
    let row = Row::new().with("name", Value::Null);

    let error = script_error(engine.transform_column("lowercase", "name", row));
    assert!(matches!(error, ScriptError::Execution { ref function, .. } if function == "lowercase"));
}

#[test]
fn test_reverse_company_number_twice_is_identity() {
    let engine = functions_engine(EngineConfig::new());

    for number in ["00012345", "98765", "", "a", "AB-12/x"] {
        let row = Row::new().with("company_number", number);
        let once = engine
            .transform_column("reverseCompanyNumber", "company_number", row)
            .unwrap();

        let row = Row::new().with("company_number", once);
        let twice = engine
            .transform_column("reverseCompanyNumber", "company_number", row)
            .unwrap();
        assert_eq!(twice, Value::from(number));
    }
}

#[test]
fn test_row_mapper_emits_in_call_order() {
    let engine = functions_engine(EngineConfig::new());

    for count in [0_i64, 1, 5] {
        let row = Row::new().with("id", 9_i64).with("count", count);
        let rows = engine.map_row("repeat", row).unwrap();

        assert_eq!(rows.len(), count as usize);
        for (i, emitted) in rows.iter().enumerate() {
            assert_eq!(emitted.get("id"), Some(&Value::Int(9)));
            assert_eq!(emitted.get("n"), Some(&Value::Int(i as i64)));
            assert!(!emitted.contains("count"));
        }
    }
}

#[test]
fn test_test_map_emits_row_twice() {
    let engine = functions_engine(EngineConfig::new());
    let row = companies().remove(0);

    let rows = engine.map_row("testMap", row.clone()).unwrap();
    assert_eq!(rows, vec![row.clone(), row]);
}

#[test]
fn test_invalid_emit_argument() {
    let engine = functions_engine(EngineConfig::new());
    let error = script_error(engine.map_row("emitNumber", Row::new().with("id", 1_i64)));

    assert!(matches!(error, ScriptError::InvalidEmitArgument { ref function, .. } if function == "emitNumber"));
    assert!(error.is_execution_failure());
}

#[test]
fn test_connection_property_is_deterministic() {
    let engine = functions_engine(EngineConfig::pool(3));

    let first = engine.connection_property("connectionProperty", "password").unwrap();
    for _ in 0..6 {
        let again = engine.connection_property("connectionProperty", "password").unwrap();
        assert_eq!(again, first);
    }
    assert_eq!(first, format!("{TEST_USER}.password-from-rhai"));
}

#[test]
fn test_later_document_overrides_earlier() {
    let engine = engine_with(&["functions.rhai", "overrides.rhai"], EngineConfig::new());
    let row = Row::new().with("name", "ACME");

    assert_eq!(
        engine.transform_column("lowercase", "name", row).unwrap(),
        Value::from("b:acme")
    );
    assert_eq!(
        engine.connection_property("connectionProperty", "url").unwrap(),
        "url-pure"
    );

    // Functions only the first document defines are still there
    let library = engine.library();
    let lowercase = library.registry().get("lowercase").unwrap();
    assert_eq!(lowercase.document(), "overrides.rhai");
    assert_eq!(
        library.registry().get("testMap").unwrap().document(),
        "functions.rhai"
    );
}

#[test]
fn test_reverse_load_order_keeps_first_fixture() {
    let engine = engine_with(&["overrides.rhai", "functions.rhai"], EngineConfig::new());
    let row = Row::new().with("name", "ACME");

    assert_eq!(
        engine.transform_column("lowercase", "name", row).unwrap(),
        Value::from("acme")
    );
}

#[test]
fn test_unknown_function_fails_on_resolve() {
    let engine = functions_engine(EngineConfig::new());
    let error = script_error(engine.resolve("uppercase", FunctionRole::ColumnTransform));

    assert_eq!(
        error,
        ScriptError::NotFound {
            function: "uppercase".to_string()
        }
    );
}

#[test]
fn test_syntax_error_reports_document_and_line() {
    let documents = [
        fixture_document("functions.rhai"),
        SourceDocument::new("broken.rhai", "fn ok(x) { x }\nfn broken(x) { let = 1; }\n"),
    ];
    let error = script_error(ScriptSource::default().load(&documents));

    match error {
        ScriptError::Load { document, line, .. } => {
            assert_eq!(document, "broken.rhai");
            assert_eq!(line, Some(2));
        }
        other => panic!("expected a load error, got {other:?}"),
    }
}

#[test]
fn test_serialized_and_pool_agree() {
    let serialized = functions_engine(EngineConfig::new());
    let pool = functions_engine(EngineConfig::pool(4));

    for row in companies() {
        let row = Arc::new(row);
        for function in ["lowercase", "reverseCompanyNumber"] {
            let column = if function == "lowercase" { "name" } else { "company_number" };
            assert_eq!(
                serialized.transform_column(function, column, Arc::clone(&row)).unwrap(),
                pool.transform_column(function, column, Arc::clone(&row)).unwrap()
            );
        }
        assert_eq!(
            serialized.map_row("testMap", Arc::clone(&row)).unwrap(),
            pool.map_row("testMap", row).unwrap()
        );
    }
}

#[test]
fn test_pool_serves_concurrent_callers() {
    let engine = Arc::new(functions_engine(
        EngineConfig::pool(4).with_routing(Routing::Affinity),
    ));
    let handle = engine
        .resolve("reverseCompanyNumber", FunctionRole::ColumnTransform)
        .unwrap();

    std::thread::scope(|s| {
        for t in 0..6_i64 {
            let engine = Arc::clone(&engine);
            let handle = handle.clone();
            s.spawn(move || {
                for i in 0..20_i64 {
                    let number = format!("{t}-{i}");
                    let row = Row::new().with("company_number", number.clone());
                    let options = CallOptions::new().with_affinity(t);
                    let value = engine
                        .call_column_transform(&handle, "company_number", row, &options)
                        .unwrap();
                    assert_eq!(value, Value::from(number.chars().rev().collect::<String>()));
                }
            });
        }
    });

    assert_eq!(engine.stats().calls, 120);
}

#[test]
fn test_timeout_does_not_affect_next_call() {
    let config = EngineConfig::new()
        .with_limits(EngineLimits::default().unlimited_operations())
        .with_call_timeout(Duration::from_millis(200));
    let engine = functions_engine(config);
    let row = Row::new().with("name", "ACME");

    let error = script_error(engine.transform_column("spin", "name", row.clone()));
    assert!(matches!(error, ScriptError::Timeout { ref function, .. } if function == "spin"));

    let started = Instant::now();
    let value = engine.transform_column("lowercase", "name", row).unwrap();
    assert_eq!(value, Value::from("acme"));
    assert!(started.elapsed() < Duration::from_secs(2));

    let stats = engine.stats();
    assert_eq!(stats.timeouts, 1);
    assert!(stats.instances_recycled >= 1);
}

#[test]
fn test_queued_timeout_leaves_running_call_alone() {
    let config = EngineConfig::new().with_limits(EngineLimits::default().unlimited_operations());
    let engine = functions_engine(config);
    let lowercase = engine
        .resolve("lowercase", FunctionRole::ColumnTransform)
        .unwrap();

    std::thread::scope(|s| {
        let running = s.spawn(|| {
            let row = Row::new().with("name", "A").with("millis", 500_i64);
            engine.transform_column("busy", "name", row)
        });
        std::thread::sleep(Duration::from_millis(50));

        // Queued behind `busy` on the only instance
        let options = CallOptions::new().with_timeout(Duration::from_millis(20));
        let row = Row::new().with("name", "B");
        let error = script_error(engine.call_column_transform(&lowercase, "name", row, &options));
        assert!(matches!(error, ScriptError::Timeout { ref function, .. } if function == "lowercase"));

        assert_eq!(running.join().unwrap().unwrap(), Value::from("A"));
    });

    let stats = engine.stats();
    assert_eq!(stats.timeouts, 1);
    assert_eq!(stats.instances_recycled, 0);

    let row = Row::new().with("name", "C");
    assert_eq!(
        engine.transform_column("lowercase", "name", row).unwrap(),
        Value::from("c")
    );
}

#[test]
fn test_oversized_padding_is_execution_error() {
    let engine = functions_engine(EngineConfig::new());
    let error = script_error(engine.connection_property("padHuge", "x"));

    assert!(matches!(error, ScriptError::Execution { ref function, .. } if function == "padHuge"));
    assert_eq!(
        engine.connection_property("connectionProperty", "after").unwrap(),
        format!("{TEST_USER}.after-from-rhai")
    );
}

#[test]
fn test_stale_handle_after_reload() {
    let engine = functions_engine(EngineConfig::pool(2));
    let handle = engine
        .resolve("lowercase", FunctionRole::ColumnTransform)
        .unwrap();
    let row = Arc::new(Row::new().with("name", "ACME"));

    engine
        .reload_documents(&[
            fixture_document("functions.rhai"),
            fixture_document("overrides.rhai"),
        ])
        .unwrap();

    let error = script_error(engine.call_column_transform(
        &handle,
        "name",
        Arc::clone(&row),
        &CallOptions::default(),
    ));
    assert!(matches!(error, ScriptError::StaleHandle { .. }));

    let fresh = engine
        .resolve("lowercase", FunctionRole::ColumnTransform)
        .unwrap();
    let value = engine
        .call_column_transform(&fresh, "name", row, &CallOptions::default())
        .unwrap();
    assert_eq!(value, Value::from("b:acme"));
    assert_eq!(engine.stats().reloads, 1);
}

#[test]
fn test_close_is_idempotent() {
    let engine: EngineContext = functions_engine(EngineConfig::pool(2));
    engine.close();
    engine.close();

    assert!(engine.is_closed());
    let error = script_error(engine.connection_property("connectionProperty", "x"));
    assert_eq!(error, ScriptError::Closed);
}
