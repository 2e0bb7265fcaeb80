use audit_engine::{AuditError, AuditLog, LogStream, SgroupAction};
use serde_json::json;
use tempfile::TempDir;

fn log_in(dir: &TempDir) -> AuditLog {
    AuditLog::new(Some(dir.path().to_path_buf()))
}

#[tokio::test]
async fn test_missing_log_reads_as_empty_whole_file() {
    let dir = TempDir::new().unwrap();
    let logs = log_in(&dir).read("nothing", 1000, LogStream::Actions).await.unwrap();
    assert!(logs.logs.is_empty());
    assert!(logs.whole_file);
    assert!(logs.last_log_date.is_none());
}

#[tokio::test]
async fn test_append_and_read_whole_file() {
    let dir = TempDir::new().unwrap();
    let log = log_in(&dir);

    log.log_sgroup_action("TrustedAdmin", "collab.", SgroupAction::Create, None, json!({ "ou": "Collab" }))
        .await
        .unwrap();
    log.log_sgroup_action(
        "uid=alice,ou=people",
        "collab.",
        SgroupAction::ModifyAttrs,
        Some("rename"),
        json!({ "ou": "Collaboration" }),
    )
    .await
    .unwrap();

    let logs = log.read("collab.", 1_000_000, LogStream::Actions).await.unwrap();
    assert!(logs.whole_file);
    assert!(logs.last_log_date.is_some());
    assert_eq!(logs.logs.len(), 2);
    assert_eq!(logs.logs[0]["action"], "create");
    assert_eq!(logs.logs[1]["msg"], "rename");
    assert_eq!(logs.logs[1]["ou"], "Collaboration");

    // the sync stream is a separate file
    let sync = log.read("collab.", 1_000_000, LogStream::Sync).await.unwrap();
    assert!(sync.logs.is_empty());
}

#[tokio::test]
async fn test_tail_window_drops_partial_first_line() {
    let dir = TempDir::new().unwrap();
    let log = log_in(&dir);
    for i in 0..3 {
        log.log_flattened_modifications("g", "member", i, vec![format!("uid=u{i}")], vec![])
            .await
            .unwrap();
    }
    let path = AuditLog::log_file(dir.path(), "g", LogStream::Sync);
    let content = std::fs::read_to_string(&path).unwrap();
    let last_line_len = content.lines().last().unwrap().len() as u64 + 1;

    // window covering exactly the last record: it starts on a line boundary and is kept
    let logs = log.read("g", last_line_len, LogStream::Sync).await.unwrap();
    assert!(!logs.whole_file);
    assert_eq!(logs.logs.len(), 1);
    assert_eq!(logs.logs[0]["new_count"], 2);

    // one byte more: the window starts inside the second record, which is dropped
    let logs = log.read("g", last_line_len + 1, LogStream::Sync).await.unwrap();
    assert_eq!(logs.logs.len(), 1);

    // no budget: nothing but the file date
    let logs = log.read("g", 0, LogStream::Sync).await.unwrap();
    assert!(logs.logs.is_empty());
    assert!(logs.last_log_date.is_some());
}

#[tokio::test]
async fn test_corrupted_log_is_an_error() {
    let dir = TempDir::new().unwrap();
    let log = log_in(&dir);
    let path = AuditLog::log_file(dir.path(), "bad", LogStream::Actions);
    std::fs::write(&path, "{\"action\":\"create\"}\nnot json\n").unwrap();

    let err = log.read("bad", 1000, LogStream::Actions).await.unwrap_err();
    assert!(matches!(err, AuditError::ParseError { .. }));
}

#[tokio::test]
async fn test_unwritable_log_dir_propagates() {
    let dir = TempDir::new().unwrap();
    let log = AuditLog::new(Some(dir.path().join("missing")));
    let err = log
        .log_sgroup_action("TrustedAdmin", "g", SgroupAction::Delete, None, json!({}))
        .await
        .unwrap_err();
    assert!(matches!(err, AuditError::StorageError(_)));
}
