//! Backup → restore round trips and restore cleanup guarantees

mod common;

use std::fs;
use std::path::Path;
use std::sync::Arc;

use common::{files_in, options, registry_with, write_keys, StubProvider, DUMP_CONTENTS};
use dbvault_core::{
    BackupPipeline, BackupRequest, ErrorKind, ProviderRegistry, RestorePipeline, RestoreRequest,
    Stage,
};
use tempfile::TempDir;

async fn backup(registry: &ProviderRegistry, keys: &Path, out: &Path) -> std::path::PathBuf {
    BackupPipeline::new(registry)
        .run(BackupRequest::new("stub", options(), keys, out))
        .await
        .unwrap()
        .encrypted_path
}

#[tokio::test]
async fn test_round_trip_restores_original_dump() {
    let temp = TempDir::new().unwrap();
    let keys = write_keys(temp.path(), "keys.json");
    let work_root = temp.path().join("work");
    let provider = Arc::new(StubProvider::new());
    let registry = registry_with(provider.clone());

    let encrypted = backup(&registry, &keys, &temp.path().join("backups")).await;
    let report = RestorePipeline::new(&registry)
        .run(RestoreRequest::new("stub", options(), &encrypted, &keys).with_work_root(&work_root))
        .await
        .unwrap();

    assert_eq!(report.provider, "stub");
    assert!(report.dump_file_name.ends_with("-orders_db.sql"));
    assert_eq!(*provider.restored.lock().unwrap(), vec![DUMP_CONTENTS.to_vec()]);
    assert!(files_in(&work_root).is_empty());
    assert!(encrypted.exists());
}

#[tokio::test]
async fn test_corrupted_artifact_fails_at_decrypt_and_cleans_up() {
    let temp = TempDir::new().unwrap();
    let keys = write_keys(temp.path(), "keys.json");
    let work_root = temp.path().join("work");
    let provider = Arc::new(StubProvider::new());
    let registry = registry_with(provider.clone());

    let encrypted = backup(&registry, &keys, &temp.path().join("backups")).await;
    let mut bytes = fs::read(&encrypted).unwrap();
    let middle = bytes.len() / 2;
    bytes[middle] ^= 0xff;
    fs::write(&encrypted, bytes).unwrap();

    let err = RestorePipeline::new(&registry)
        .run(RestoreRequest::new("stub", options(), &encrypted, &keys).with_work_root(&work_root))
        .await
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::CipherFailed);
    assert_eq!(err.stage(), Some(Stage::Decrypt));
    assert!(files_in(&work_root).is_empty());
    assert!(provider.restored.lock().unwrap().is_empty());
}

#[tokio::test]
async fn test_mismatched_private_key_is_rejected() {
    let temp = TempDir::new().unwrap();
    let keys = write_keys(temp.path(), "keys.json");
    let other_keys = write_keys(temp.path(), "other.json");
    let work_root = temp.path().join("work");
    let registry = registry_with(Arc::new(StubProvider::new()));

    let encrypted = backup(&registry, &keys, &temp.path().join("backups")).await;
    let err = RestorePipeline::new(&registry)
        .run(
            RestoreRequest::new("stub", options(), &encrypted, &other_keys)
                .with_work_root(&work_root),
        )
        .await
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::CipherFailed);
    assert!(files_in(&work_root).is_empty());
}

#[tokio::test]
async fn test_restore_tool_failure_still_removes_work_dir() {
    let temp = TempDir::new().unwrap();
    let keys = write_keys(temp.path(), "keys.json");
    let work_root = temp.path().join("work");

    let encrypted = backup(
        &registry_with(Arc::new(StubProvider::new())),
        &keys,
        &temp.path().join("backups"),
    )
    .await;

    let failing = registry_with(Arc::new(StubProvider::new().failing_restore()));
    let err = RestorePipeline::new(&failing)
        .run(RestoreRequest::new("stub", options(), &encrypted, &keys).with_work_root(&work_root))
        .await
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::RestoreFailed);
    assert_eq!(err.stage(), Some(Stage::Restore));
    assert!(files_in(&work_root).is_empty());
}

#[tokio::test]
async fn test_archive_without_dump_fails_at_extract() {
    let temp = TempDir::new().unwrap();
    let keys_path = write_keys(temp.path(), "keys.json");
    let keys = dbvault_core::KeyPair::load(&keys_path).unwrap();
    let work_root = temp.path().join("work");
    let registry = registry_with(Arc::new(StubProvider::new()));

    let notes = temp.path().join("notes.txt");
    fs::write(&notes, b"not a dump").unwrap();
    let archive = temp.path().join("notes.zip");
    dbvault_core::Archiver::new().compress(&notes, &archive).unwrap();
    let encrypted = temp.path().join("notes.zip.encrypted");
    dbvault_core::CipherStage::default()
        .encrypt_file(&archive, &encrypted, &keys.public_key)
        .unwrap();

    let err = RestorePipeline::new(&registry)
        .run(
            RestoreRequest::new("stub", options(), &encrypted, &keys_path)
                .with_work_root(&work_root),
        )
        .await
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::ExtractFailed);
    assert_eq!(err.stage(), Some(Stage::Extract));
    assert!(files_in(&work_root).is_empty());
}

#[tokio::test]
async fn test_missing_artifact_fails_without_touching_database() {
    let temp = TempDir::new().unwrap();
    let keys = write_keys(temp.path(), "keys.json");
    let provider = Arc::new(StubProvider::new());
    let registry = registry_with(provider.clone());

    let err = RestorePipeline::new(&registry)
        .run(
            RestoreRequest::new("stub", options(), temp.path().join("gone.encrypted"), &keys)
                .with_work_root(temp.path().join("work")),
        )
        .await
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::CipherFailed);
    assert!(provider.restored.lock().unwrap().is_empty());
}

#[tokio::test]
async fn test_missing_restore_tool_fails_before_decrypting() {
    let temp = TempDir::new().unwrap();
    let keys = write_keys(temp.path(), "keys.json");
    let work_root = temp.path().join("work");
    let encrypted = backup(
        &registry_with(Arc::new(StubProvider::new())),
        &keys,
        &temp.path().join("backups"),
    )
    .await;

    let provider = Arc::new(StubProvider::new().without_restore_tool());
    let registry = registry_with(provider.clone());
    let err = RestorePipeline::new(&registry)
        .run(RestoreRequest::new("stub", options(), &encrypted, &keys).with_work_root(&work_root))
        .await
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::ToolUnavailable);
    assert_eq!(err.stage(), Some(Stage::Probe));
    assert!(provider.restored.lock().unwrap().is_empty());
    assert!(files_in(&work_root).is_empty());
}
