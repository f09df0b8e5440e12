use super::*;
use tempfile::TempDir;

fn create_test_store() -> (TenantIndexStore, TempDir) {
    let temp_dir = TempDir::new().expect("should create temp dir");
    let store = TenantIndexStore::new(temp_dir.path().join("tenants"));
    (store, temp_dir)
}

fn unit(dimension: usize, axis: usize) -> Vec<f32> {
    let mut v = vec![0.0; dimension];
    v[axis] = 1.0;
    v
}

async fn seed(store: &TenantIndexStore, tenant: &str, texts: &[&str]) -> TenantSnapshot {
    let handle = store
        .open_or_create(tenant, 4)
        .await
        .expect("should open tenant");
    let vectors = (0..texts.len()).map(|i| unit(4, i % 4)).collect();
    store
        .append(
            tenant,
            handle,
            vectors,
            texts.iter().map(|t| (*t).to_string()).collect(),
        )
        .await
        .expect("should append")
}

#[tokio::test]
async fn open_missing_tenant_is_empty() {
    let (store, _temp_dir) = create_test_store();

    let snapshot = store
        .open_or_create("acme", 384)
        .await
        .expect("should open tenant");

    assert!(snapshot.is_empty());
    assert!(snapshot.records().is_empty());
    assert_eq!(snapshot.dimension(), 384);
    assert!(!store.root().join("acme").exists());
}

#[tokio::test]
async fn zero_dimension_is_invalid() {
    let (store, _temp_dir) = create_test_store();
    assert!(matches!(
        store.open_or_create("acme", 0).await,
        Err(RetrievalError::InvalidInput(_))
    ));
}

#[cfg(target_pointer_width = "64")]
#[tokio::test]
async fn oversized_dimension_is_invalid() {
    let (store, _temp_dir) = create_test_store();
    assert!(matches!(
        store.open_or_create("acme", u32::MAX as usize + 1).await,
        Err(RetrievalError::InvalidInput(_))
    ));
}

#[tokio::test]
async fn append_grows_index_and_log_together() {
    let (store, _temp_dir) = create_test_store();

    let first = seed(&store, "acme", &["one", "two"]).await;
    assert_eq!(first.len(), 2);
    assert_eq!(first.records().len(), 2);

    let second = store
        .append(
            "acme",
            first,
            vec![unit(4, 2), unit(4, 3), unit(4, 0)],
            vec!["three".into(), "four".into(), "five".into()],
        )
        .await
        .expect("should append");

    assert_eq!(second.len(), 5);
    assert_eq!(second.records().len(), 5);
    assert_eq!(
        second.texts(),
        vec!["one", "two", "three", "four", "five"]
    );
}

#[tokio::test]
async fn state_persists_across_store_instances() {
    let (store, temp_dir) = create_test_store();
    seed(&store, "acme", &["alpha", "beta"]).await;
    drop(store);

    let reopened = TenantIndexStore::new(temp_dir.path().join("tenants"));
    let snapshot = reopened
        .open_or_create("acme", 4)
        .await
        .expect("should open tenant");

    assert_eq!(snapshot.len(), 2);
    assert_eq!(snapshot.texts(), vec!["alpha", "beta"]);
    assert!(reopened.root().join("acme").join(disk::INDEX_FILE).exists());
    assert!(reopened.root().join("acme").join(disk::METADATA_FILE).exists());
}

#[tokio::test]
async fn empty_append_is_a_no_op() {
    let (store, _temp_dir) = create_test_store();
    let handle = store
        .open_or_create("acme", 4)
        .await
        .expect("should open tenant");

    let returned = store
        .append("acme", handle.clone(), Vec::new(), Vec::new())
        .await
        .expect("empty append should succeed");

    assert_eq!(returned, handle);
    assert!(!store.root().join("acme").exists());
}

#[tokio::test]
async fn mismatched_counts_are_rejected() {
    let (store, _temp_dir) = create_test_store();
    let handle = store
        .open_or_create("acme", 4)
        .await
        .expect("should open tenant");

    let result = store
        .append("acme", handle, vec![unit(4, 0)], Vec::new())
        .await;
    assert!(matches!(result, Err(RetrievalError::InvalidInput(_))));
}

#[tokio::test]
async fn wrong_vector_dimension_is_rejected() {
    let (store, _temp_dir) = create_test_store();
    let handle = store
        .open_or_create("acme", 4)
        .await
        .expect("should open tenant");

    let result = store
        .append("acme", handle, vec![vec![1.0, 0.0]], vec!["short".into()])
        .await;
    assert!(matches!(
        result,
        Err(RetrievalError::DimensionMismatch {
            stored: 4,
            requested: 2,
            ..
        })
    ));
}

#[tokio::test]
async fn reopening_with_other_dimension_fails() {
    let (store, _temp_dir) = create_test_store();
    seed(&store, "acme", &["alpha"]).await;

    let result = store.open_or_create("acme", 8).await;
    assert!(matches!(
        result,
        Err(RetrievalError::DimensionMismatch {
            stored: 4,
            requested: 8,
            ..
        })
    ));
}

#[tokio::test]
async fn stale_handles_do_not_lose_writes() {
    let (store, _temp_dir) = create_test_store();

    let first = store
        .open_or_create("acme", 4)
        .await
        .expect("should open tenant");
    let second = first.clone();

    store
        .append("acme", first, vec![unit(4, 0)], vec!["from first".into()])
        .await
        .expect("first append should succeed");
    let written = store
        .append("acme", second, vec![unit(4, 1)], vec!["from second".into()])
        .await
        .expect("second append should succeed");

    assert_eq!(written.texts(), vec!["from first", "from second"]);
}

#[tokio::test]
async fn search_missing_tenant_is_empty() {
    let (store, _temp_dir) = create_test_store();

    let results = store
        .search("nobody", &unit(4, 0), 5)
        .await
        .expect("search should succeed");
    assert!(results.is_empty());
}

#[tokio::test]
async fn search_returns_exact_match_first() {
    let (store, _temp_dir) = create_test_store();
    seed(&store, "acme", &["north", "east", "south", "west"]).await;

    let results = store
        .search("acme", &unit(4, 2), 2)
        .await
        .expect("search should succeed");

    assert_eq!(results.len(), 2);
    assert_eq!(results[0], "south");
}

#[tokio::test]
async fn search_caps_at_k_and_count() {
    let (store, _temp_dir) = create_test_store();
    seed(&store, "acme", &["a", "b", "c"]).await;

    let capped = store
        .search("acme", &unit(4, 0), 2)
        .await
        .expect("search should succeed");
    assert_eq!(capped.len(), 2);

    let all = store
        .search_scored("acme", &unit(4, 0), 50)
        .await
        .expect("search should succeed");
    assert_eq!(all.len(), 3);
    assert_eq!(all[0].position, 0);
    assert_eq!(all[0].distance, 0.0);
    assert!(all.windows(2).all(|w| w[0].distance <= w[1].distance));
}

#[tokio::test]
async fn search_with_wrong_query_dimension_fails() {
    let (store, _temp_dir) = create_test_store();
    seed(&store, "acme", &["a"]).await;

    assert!(matches!(
        store.search("acme", &[1.0, 0.0], 1).await,
        Err(RetrievalError::DimensionMismatch { .. })
    ));
}

#[tokio::test]
async fn tenants_are_isolated() {
    let (store, _temp_dir) = create_test_store();
    seed(&store, "acme", &["acme secret"]).await;
    seed(&store, "globex", &["globex secret"]).await;

    let results = store
        .search("globex", &unit(4, 0), 10)
        .await
        .expect("search should succeed");
    assert_eq!(results, vec!["globex secret".to_string()]);

    let tenants = store.tenants().await.expect("should list tenants");
    assert_eq!(tenants, vec!["acme".to_string(), "globex".to_string()]);
}

#[tokio::test]
async fn torn_index_is_truncated_on_read() {
    let (store, _temp_dir) = create_test_store();
    seed(&store, "acme", &["one", "two"]).await;

    // Index gains a row whose metadata never made it to disk
    let dir = store.root().join("acme");
    let raw = disk::load(&dir, "acme")
        .expect("should load")
        .expect("tenant exists");
    let mut index = raw.index.clone();
    index.add(&[unit(4, 3)]).expect("should add");
    std::fs::write(dir.join(disk::INDEX_FILE), index.to_bytes()).expect("should write index");

    let results = store
        .search("acme", &unit(4, 3), 5)
        .await
        .expect("search should succeed");
    assert_eq!(results.len(), 2);

    let report = store
        .status("acme")
        .await
        .expect("status should succeed")
        .expect("tenant exists");
    assert_eq!(report.index_rows, 3);
    assert_eq!(report.log_rows, 2);
    assert!(!report.is_consistent());
}

#[tokio::test]
async fn torn_log_is_truncated_on_read() {
    let (store, _temp_dir) = create_test_store();
    seed(&store, "acme", &["one", "two", "three"]).await;

    let dir = store.root().join("acme");
    let raw = disk::load(&dir, "acme")
        .expect("should load")
        .expect("tenant exists");
    let mut index = raw.index.clone();
    index.truncate(1);
    std::fs::write(dir.join(disk::INDEX_FILE), index.to_bytes()).expect("should write index");

    let snapshot = store
        .open_or_create("acme", 4)
        .await
        .expect("should open tenant");
    assert_eq!(snapshot.len(), 1);
    assert_eq!(snapshot.texts(), vec!["one"]);
}

#[tokio::test]
async fn append_onto_torn_tenant_persists_consistent_state() {
    let (store, _temp_dir) = create_test_store();
    seed(&store, "acme", &["one", "two"]).await;

    let dir = store.root().join("acme");
    std::fs::remove_file(dir.join(disk::METADATA_FILE)).expect("should remove log");

    let handle = store
        .open_or_create("acme", 4)
        .await
        .expect("should open tenant");
    assert!(handle.is_empty());

    store
        .append("acme", handle, vec![unit(4, 1)], vec!["fresh".into()])
        .await
        .expect("should append");

    let report = store
        .status("acme")
        .await
        .expect("status should succeed")
        .expect("tenant exists");
    assert!(report.is_consistent());
    assert_eq!(report.index_rows, 1);
}

#[tokio::test]
async fn repair_rewrites_torn_tenant() {
    let (store, _temp_dir) = create_test_store();
    seed(&store, "acme", &["one", "two"]).await;

    let dir = store.root().join("acme");
    let log = std::fs::read_to_string(dir.join(disk::METADATA_FILE)).expect("should read log");
    let first_line = log.lines().next().expect("log has a line");
    std::fs::write(dir.join(disk::METADATA_FILE), format!("{}\n", first_line))
        .expect("should write log");

    let report = store
        .repair("acme")
        .await
        .expect("repair should succeed")
        .expect("tenant exists");
    assert_eq!(report.dropped_rows(), 1);

    let after = store
        .status("acme")
        .await
        .expect("status should succeed")
        .expect("tenant exists");
    assert!(after.is_consistent());
    assert_eq!(after.index_rows, 1);

    assert!(
        store
            .repair("missing")
            .await
            .expect("repair should succeed")
            .is_none()
    );
}

#[tokio::test]
async fn tenant_directory_holds_only_the_two_artifacts() {
    let (store, _temp_dir) = create_test_store();
    seed(&store, "acme", &["one", "two"]).await;

    let mut names: Vec<String> = std::fs::read_dir(store.root().join("acme"))
        .expect("should list tenant dir")
        .map(|entry| {
            entry
                .expect("should read entry")
                .file_name()
                .to_string_lossy()
                .into_owned()
        })
        .collect();
    names.sort();

    assert_eq!(names, vec!["faiss_index.bin", "metadata.txt"]);
}

#[tokio::test]
async fn stale_pending_files_are_removed_by_the_next_write() {
    let (store, _temp_dir) = create_test_store();
    let first = seed(&store, "acme", &["one"]).await;

    let dir = store.root().join("acme");
    let stale = dir.join(".pending-crashed");
    std::fs::write(&stale, b"half written").expect("should write stale file");

    store
        .append("acme", first, vec![unit(4, 1)], vec!["two".into()])
        .await
        .expect("should append");

    assert!(!stale.exists());
    assert!(dir.join(disk::INDEX_FILE).is_file());
}

#[tokio::test]
async fn repair_removes_stale_pending_files() {
    let (store, _temp_dir) = create_test_store();
    seed(&store, "acme", &["one", "two"]).await;

    let dir = store.root().join("acme");
    let stale = dir.join(".pending-abc123");
    std::fs::write(&stale, b"partial").expect("should write stale file");
    let keep = dir.join("notes.txt");
    std::fs::write(&keep, b"operator notes").expect("should write file");

    let report = store
        .repair("acme")
        .await
        .expect("repair should succeed")
        .expect("tenant exists");

    assert!(report.is_consistent());
    assert!(!stale.exists());
    assert!(keep.exists());
    assert_eq!(disk::sweep_pending(&dir).expect("should sweep"), 0);
}

#[tokio::test]
async fn corrupt_index_blob_is_reported() {
    let (store, _temp_dir) = create_test_store();
    seed(&store, "acme", &["one"]).await;

    std::fs::write(
        store.root().join("acme").join(disk::INDEX_FILE),
        b"not an index",
    )
    .expect("should write index");

    assert!(matches!(
        store.search("acme", &unit(4, 0), 1).await,
        Err(RetrievalError::StorageCorruption { .. })
    ));
}

#[tokio::test]
async fn newline_texts_keep_their_positions() {
    let (store, _temp_dir) = create_test_store();
    seed(&store, "acme", &["first\nwith break", "second"]).await;

    let results = store
        .search("acme", &unit(4, 1), 1)
        .await
        .expect("search should succeed");
    assert_eq!(results, vec!["second".to_string()]);

    let results = store
        .search("acme", &unit(4, 0), 1)
        .await
        .expect("search should succeed");
    assert_eq!(results, vec!["first\nwith break".to_string()]);
}

#[test]
fn tenant_id_validation() {
    for valid in ["acme", "biz-42", "tenant_1", "a.b", "X"] {
        assert!(validate_tenant_id(valid).is_ok(), "{} should be valid", valid);
    }

    let too_long = "a".repeat(129);
    for invalid in ["", ".", "..", "../etc", "a/b", "a b", "ünï", too_long.as_str()] {
        assert!(
            validate_tenant_id(invalid).is_err(),
            "{:?} should be invalid",
            invalid
        );
    }
}

#[tokio::test]
async fn invalid_tenant_never_touches_disk() {
    let (store, _temp_dir) = create_test_store();
    assert!(matches!(
        store.open_or_create("../escape", 4).await,
        Err(RetrievalError::InvalidInput(_))
    ));
    assert!(matches!(
        store.search("../escape", &unit(4, 0), 1).await,
        Err(RetrievalError::InvalidInput(_))
    ));
}

#[tokio::test]
async fn interleaved_appends_from_one_base_all_land() {
    let (store, _temp_dir) = create_test_store();
    let base = store
        .open_or_create("acme", 4)
        .await
        .expect("should open tenant");

    let appends = (0..8).map(|i| {
        let store = &store;
        let handle = base.clone();
        async move {
            store
                .append("acme", handle, vec![unit(4, i % 4)], vec![format!("doc {}", i)])
                .await
        }
    });
    for result in futures::future::join_all(appends).await {
        result.expect("append should succeed");
    }

    let snapshot = store
        .open_or_create("acme", 4)
        .await
        .expect("should open tenant");
    assert_eq!(snapshot.len(), 8);
    let mut texts = snapshot.texts();
    texts.sort_unstable();
    assert_eq!(
        texts,
        (0..8).map(|i| format!("doc {}", i)).collect::<Vec<_>>()
    );
}
