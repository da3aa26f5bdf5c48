//! `SYNCVAULT_*` overrides picked up by `Config::default()`.
//!
//! Kept in its own test binary because it mutates process environment.

use std::sync::Mutex;
use syncvault_container::ENV_MAX_MEMORY_MB;
use syncvault_core::{Config, SyncFile, ENV_KEEP_SYNC_COUNT, ENV_SKIP_CLEANUP};
use syncvault_storage::MemoryStore;

static ENV_LOCK: Mutex<()> = Mutex::new(());

fn with_env<T>(vars: &[(&str, &str)], f: impl FnOnce() -> T) -> T {
    let _guard = ENV_LOCK.lock().unwrap_or_else(|e| e.into_inner());
    for (key, value) in vars {
        std::env::set_var(key, value);
    }
    let result = f();
    for (key, _) in vars {
        std::env::remove_var(key);
    }
    result
}

fn three_full_syncs(file: &SyncFile) {
    for _ in 0..3 {
        file.start_sync().unwrap();
        file.end_sync().unwrap();
    }
}

#[test]
fn keep_sync_count_applies_to_default_config() {
    let config = with_env(&[(ENV_KEEP_SYNC_COUNT, "1")], Config::default);
    assert_eq!(config.keep_sync_count, 1);

    let file = SyncFile::open_store(MemoryStore::new("keep"), config).unwrap();
    three_full_syncs(&file);
    assert_eq!(file.cleanup().unwrap().len(), 2);
}

#[test]
fn explicit_keep_sync_count_beats_environment() {
    let config = with_env(&[(ENV_KEEP_SYNC_COUNT, "1")], || {
        Config::default().keep_sync_count(3)
    });
    assert_eq!(config.keep_sync_count, 3);

    let reapplied = with_env(&[(ENV_KEEP_SYNC_COUNT, "1")], || {
        Config::default().keep_sync_count(3).apply_env()
    });
    assert_eq!(reapplied.keep_sync_count, 1);
}

#[test]
fn invalid_keep_sync_count_is_ignored() {
    for raw in ["0", "-2", "many"] {
        let config = with_env(&[(ENV_KEEP_SYNC_COUNT, raw)], Config::default);
        assert_eq!(config.keep_sync_count, 2, "value {raw}");
    }
}

#[test]
fn skip_cleanup_applies_to_default_config() {
    let config = with_env(&[(ENV_SKIP_CLEANUP, "true")], Config::default);
    assert!(config.skip_cleanup);

    let file = SyncFile::open_store(MemoryStore::new("skip"), config.keep_sync_count(1)).unwrap();
    three_full_syncs(&file);
    assert!(file.cleanup().unwrap().is_empty());

    let config = with_env(&[(ENV_SKIP_CLEANUP, "no")], Config::default);
    assert!(!config.skip_cleanup);
}

#[test]
fn decoder_limits_apply_to_default_config() {
    let config = with_env(&[(ENV_MAX_MEMORY_MB, "48")], Config::default);
    assert_eq!(config.decoder.max_memory, 48 * 1024 * 1024);
}
