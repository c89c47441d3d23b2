use std::process::{Command, Output};

use docchat::{ChunkRecord, DocumentMetadata, FlatIndex, VectorIndex};

fn run(data_dir: &std::path::Path, args: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_docchat"))
        .args(args)
        .env("DOCCHAT_DATA_DIR", data_dir)
        .env_remove("OPENAI_API_KEY")
        .env_remove("RUST_LOG")
        .output()
        .expect("run CLI")
}

fn seed(data_dir: &std::path::Path) {
    let mut index = FlatIndex::open(data_dir.join("documents.json"));
    let a = DocumentMetadata::new("a.txt");
    let b = DocumentMetadata::new("b.md");
    index
        .append(vec![
            ChunkRecord::new("first chunk".into(), vec![1.0, 0.0], &a, 0, 2),
            ChunkRecord::new("second chunk".into(), vec![0.0, 1.0], &a, 1, 2),
            ChunkRecord::new("other doc".into(), vec![1.0, 1.0], &b, 0, 1),
        ])
        .expect("seed store");
}

#[test]
fn list_prints_sources_as_json() {
    let dir = tempfile::tempdir().expect("tempdir");
    seed(dir.path());

    let output = run(dir.path(), &["list", "--json"]);
    assert!(
        output.status.success(),
        "cli exited with {}: {}",
        output.status,
        String::from_utf8_lossy(&output.stderr)
    );
    let documents: serde_json::Value =
        serde_json::from_slice(&output.stdout).expect("json output");
    let summary: Vec<(String, u64)> = documents
        .as_array()
        .expect("array")
        .iter()
        .map(|doc| {
            (
                doc["source"].as_str().expect("source").to_string(),
                doc["chunks"].as_u64().expect("chunks"),
            )
        })
        .collect();
    assert_eq!(
        summary,
        vec![("a.txt".to_string(), 2), ("b.md".to_string(), 1)]
    );
}

#[test]
fn delete_and_reset_work_without_credentials() {
    let dir = tempfile::tempdir().expect("tempdir");
    seed(dir.path());

    let output = run(dir.path(), &["delete", "a.txt"]);
    assert!(output.status.success());
    assert_eq!(FlatIndex::open(dir.path().join("documents.json")).len(), 1);

    let output = run(dir.path(), &["delete", "a.txt"]);
    assert!(!output.status.success());

    let output = run(dir.path(), &["reset"]);
    assert!(output.status.success());
    assert!(!dir.path().join("documents.json").exists());
}

#[test]
fn search_requires_an_api_key() {
    let dir = tempfile::tempdir().expect("tempdir");
    let output = run(dir.path(), &["search", "anything"]);
    assert!(!output.status.success());
    assert!(String::from_utf8_lossy(&output.stderr).contains("OPENAI_API_KEY"));
}
