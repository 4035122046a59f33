//! NDJSON in, JSONL out, through a pipeline configured from a file.

use crate::common::{fixture_path, test_host, TEST_USER};
use sf_error::{ScriptError, SfError};
use sf_pipeline::{
    ErrorPolicy, JsonlSink, NdjsonSource, PipelineConfig, RowPipeline, ValueDefinition,
};
use sf_script::ScriptConfig;
use sf_traits::RowSource;
use sf_types::Row;
use std::io::Write;
use tempfile::NamedTempFile;

const INPUT: &str = r#"{"name":"ACME Corp","company_number":"00012345","active":true,"scratch":1}
{"name":"Globex","company_number":"98765","active":false,"scratch":2}

{"name":"Initech LTD","company_number":"5550001","active":true,"scratch":3}
"#;

fn input_file(contents: &str) -> NamedTempFile {
    let mut file = NamedTempFile::new().unwrap();
    file.write_all(contents.as_bytes()).unwrap();
    file.flush().unwrap();
    file
}

fn run_file(pipeline: &RowPipeline, input: &NamedTempFile) -> (sf_error::Result<u64>, Vec<Row>) {
    let mut source = NdjsonSource::open(input.path()).unwrap();
    let mut sink = JsonlSink::new(Vec::new());
    let result = pipeline
        .run(&mut source, &mut sink)
        .map(|stats| stats.rows_written);

    let output = String::from_utf8(sink.into_inner()).unwrap();
    let rows = output
        .lines()
        .map(|line| serde_json::from_str(line).unwrap())
        .collect();
    (result, rows)
}

fn scripted_config() -> PipelineConfig {
    let script = fixture_path("functions.rhai").display().to_string();
    PipelineConfig::default().with_script(ScriptConfig::with_script_file(script))
}

#[tokio::test]
async fn test_fixture_pipeline_end_to_end() {
    let config = PipelineConfig::from_file(fixture_path("pipeline.json")).unwrap();
    let pipeline = RowPipeline::from_config(&config, test_host()).await.unwrap();

    let properties = pipeline.connection_properties();
    assert_eq!(properties["user"], format!("{TEST_USER}.user-from-rhai"));
    assert_eq!(properties["url"], "jdbc:h2:mem:test");

    let input = input_file(INPUT);
    let (result, rows) = run_file(&pipeline, &input);
    assert_eq!(result.unwrap(), 6);

    // testMap emits every row twice
    let names: Vec<String> = rows
        .iter()
        .map(|row| row.get("name").unwrap().to_string())
        .collect();
    assert_eq!(
        names,
        vec!["acme corp", "acme corp", "globex", "globex", "initech ltd", "initech ltd"]
    );

    let first = &rows[0];
    assert_eq!(first.get("company_number").unwrap().to_string(), "54321000");
    assert_eq!(first.get("source").unwrap().to_string(), "fixture");
    assert!(!first.contains("scratch"));

    let columns: Vec<&str> = first.column_names().collect();
    assert_eq!(columns, vec!["name", "company_number", "active", "source"]);
}

#[tokio::test]
async fn test_drop_policy_skips_failed_rows() {
    let config = scripted_config()
        .with_transform("name", ValueDefinition::function("failOnInactive"))
        .with_error_policy(ErrorPolicy::Drop);
    let pipeline = RowPipeline::from_config(&config, test_host()).await.unwrap();

    let input = input_file(INPUT);
    let (result, rows) = run_file(&pipeline, &input);
    assert_eq!(result.unwrap(), 2);
    assert!(rows.iter().all(|row| row.get("name").unwrap().to_string() != "Globex"));
}

#[tokio::test]
async fn test_passthrough_policy_writes_original_row() {
    let config = scripted_config()
        .with_transform("name", ValueDefinition::function("failOnInactive"))
        .with_transform("marker", ValueDefinition::literal("done"))
        .with_error_policy(ErrorPolicy::Passthrough);
    let pipeline = RowPipeline::from_config(&config, test_host()).await.unwrap();

    let input = input_file(INPUT);
    let (result, rows) = run_file(&pipeline, &input);
    assert_eq!(result.unwrap(), 3);

    assert!(rows[0].contains("marker"));
    assert!(!rows[1].contains("marker"));
    assert_eq!(rows[1].get("scratch").unwrap().to_string(), "2");
}

#[tokio::test]
async fn test_fail_policy_stops_the_run() {
    let config = scripted_config()
        .with_transform("name", ValueDefinition::function("failOnInactive"))
        .with_error_policy(ErrorPolicy::Fail);
    let pipeline = RowPipeline::from_config(&config, test_host()).await.unwrap();

    let input = input_file(INPUT);
    let (result, rows) = run_file(&pipeline, &input);

    match result {
        Err(SfError::Script(ScriptError::Execution { function, cause })) => {
            assert_eq!(function, "failOnInactive");
            assert!(cause.contains("inactive company Globex"));
        }
        other => panic!("expected an execution error, got {other:?}"),
    }
    assert_eq!(rows.len(), 1);
}

#[tokio::test]
async fn test_unreadable_line_is_skipped_unless_failing() {
    let input = input_file("{\"id\":1}\nnot json\n{\"id\":2}\n");

    let config = scripted_config().with_transform("id_copy", ValueDefinition::literal(0_i64));
    let pipeline = RowPipeline::from_config(&config, test_host()).await.unwrap();
    let (result, rows) = run_file(&pipeline, &input);
    assert_eq!(result.unwrap(), 2);
    assert_eq!(rows.len(), 2);

    let config = config.with_error_policy(ErrorPolicy::Fail);
    let pipeline = RowPipeline::from_config(&config, test_host()).await.unwrap();
    let (result, _) = run_file(&pipeline, &input);
    assert!(matches!(result, Err(SfError::Source(_))));
}

#[tokio::test]
async fn test_limit_and_threads() {
    let lines: String = (0..50)
        .map(|i| format!("{{\"id\":{i},\"company_number\":\"{i:04}\"}}\n"))
        .collect();
    let input = input_file(&lines);

    let config = scripted_config()
        .with_transform("company_number", ValueDefinition::function("reverseCompanyNumber"))
        .with_limit(20)
        .with_threads(4);
    let pipeline = RowPipeline::from_config(&config, test_host()).await.unwrap();

    let (result, rows) = run_file(&pipeline, &input);
    assert_eq!(result.unwrap(), 20);

    for (i, row) in rows.iter().enumerate() {
        let expected: String = format!("{i:04}").chars().rev().collect();
        assert_eq!(row.get("company_number").unwrap().to_string(), expected);
    }
}

#[tokio::test]
async fn test_unknown_function_fails_before_reading() {
    let config = scripted_config().with_map("noSuchMapper");
    let error = RowPipeline::from_config(&config, test_host())
        .await
        .unwrap_err();

    assert!(matches!(
        error,
        SfError::Script(ScriptError::NotFound { ref function }) if function == "noSuchMapper"
    ));
}

#[test]
fn test_ndjson_source_reports_line_numbers() {
    let input = input_file("{\"a\":1}\n\n{broken\n");
    let mut source = NdjsonSource::open(input.path()).unwrap();

    assert!(source.next_row().unwrap().is_some());
    let error = source.next_row().unwrap_err();
    assert!(error.to_string().contains("line 3"), "{error}");
}
