use std::io::Write;

use tempfile::NamedTempFile;

use drover_core::config::AppConfig;

/// Config with a tiny invocation budget suitable for paused-clock tests.
pub fn test_config() -> AppConfig {
    toml::from_str(
        r#"
[model]
model_id = "test-model"

[invoke]
timeout_secs = 5
max_retries = 2
retry_delay_ms = 10

[store]
path = ":memory:"

[decision]
max_iterations = 4
"#,
    )
    .expect("test config must parse")
}

/// Write config text to a temp file and return the handle (the file lives
/// as long as the handle).
pub fn write_config_file(content: &str) -> NamedTempFile {
    let mut file = NamedTempFile::new().expect("create temp config");
    file.write_all(content.as_bytes()).expect("write temp config");
    file.flush().expect("flush temp config");
    file
}

/// Write labelled embedding rows as JSON lines.
pub fn write_intent_dataset(rows: &[(&str, Vec<f32>)]) -> NamedTempFile {
    let mut file = NamedTempFile::new().expect("create temp dataset");
    for (intent, embedding) in rows {
        let line = serde_json::json!({ "intent": intent, "embedding": embedding });
        writeln!(file, "{}", line).expect("write dataset row");
    }
    file.flush().expect("flush temp dataset");
    file
}
