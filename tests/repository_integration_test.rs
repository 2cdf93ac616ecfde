// ==========================================
// Repository 层集成测试
// ==========================================
// 测试目标: 文件数据库上的替换/追加/查询/导出
// ==========================================


use fuel_dispatch_ingest::domain::PersistPolicy;
use fuel_dispatch_ingest::logging;
use fuel_dispatch_ingest::repository::{
    export_csv, IngestRunRecord, TransactionQuery, TransactionRepository,
    TransactionRepositoryImpl,
};
use test_helpers::record;

fn run(run_id: &str, policy: PersistPolicy, finished_at: &str) -> IngestRunRecord {
    IngestRunRecord {
        run_id: run_id.to_string(),
        policy,
        state: "PERSISTED".to_string(),
        files: 1,
        skipped_files: 0,
        records: 0,
        persisted: 0,
        duplicates_skipped: 0,
        report_json: format!("{{\"run_id\":\"{}\"}}", run_id),
        finished_at: finished_at.to_string(),
    }
}

// ==========================================
// 测试用例
// ==========================================

#[tokio::test]
async fn test_append_dedup_treats_missing_values_as_equal() {
    logging::init_test();

    let (_temp_file, db_path) = test_helpers::create_test_db().expect("Failed to create test db");
    let repo = TransactionRepositoryImpl::new(&db_path).unwrap();

    let batch = vec![
        record((2024, 1, 5), (10, 0), "Petrol", "1", "GNC", None, Some(100.0)),
        record((2024, 1, 5), (10, 0), "Petrol", "1", "GNC", Some(8.0), None),
    ];

    let first = repo
        .append(batch.clone(), run("a1", PersistPolicy::Append, "2024-01-05T10:00:00Z"))
        .await
        .unwrap();
    assert_eq!(first.inserted, 2);

    let second = repo
        .append(batch, run("a2", PersistPolicy::Append, "2024-01-05T11:00:00Z"))
        .await
        .unwrap();
    assert_eq!(second.inserted, 0);
    assert_eq!(second.duplicates_skipped, 2);

    // 运行记录按完成时间倒序，计数已回填
    let runs = repo.list_runs(5).await.unwrap();
    assert_eq!(runs.len(), 2);
    assert_eq!(runs[0].run_id, "a2");
    assert_eq!(runs[0].duplicates_skipped, 2);
    assert_eq!(runs[1].persisted, 2);
}

#[tokio::test]
async fn test_replace_survives_reopen() {
    logging::init_test();

    let (_temp_file, db_path) = test_helpers::create_test_db().expect("Failed to create test db");
    {
        let repo = TransactionRepositoryImpl::new(&db_path).unwrap();
        repo.replace_all(
            vec![record((2024, 1, 5), (8, 0), "Petrol", "1", "SUPER", Some(10.0), Some(1000.0))],
            run("r1", PersistPolicy::Replace, "2024-01-05T08:00:00Z"),
        )
        .await
        .unwrap();

        let outcome = repo
            .replace_all(
                vec![
                    record((2024, 1, 6), (9, 0), "Petrol", "2", "DIESEL", Some(20.0), Some(2000.0)),
                    record((2024, 1, 6), (9, 5), "Petrol", "2", "DIESEL", Some(5.0), Some(500.0)),
                ],
                run("r2", PersistPolicy::Replace, "2024-01-06T09:00:00Z"),
            )
            .await
            .unwrap();
        assert_eq!(outcome.removed, 1);
        assert_eq!(outcome.inserted, 2);
    }

    let reopened = TransactionRepositoryImpl::new(&db_path).unwrap();
    assert_eq!(reopened.count().await.unwrap(), 2);
    let all = reopened.query(&TransactionQuery::default()).await.unwrap();
    assert!(all.iter().all(|r| r.product == "DIESEL"));
}

#[tokio::test]
async fn test_pagination_is_per_request() {
    logging::init_test();

    let (_temp_file, db_path) = test_helpers::create_test_db().expect("Failed to create test db");
    let repo = TransactionRepositoryImpl::new(&db_path).unwrap();

    let records: Vec<_> = (0..5)
        .map(|i| {
            record(
                (2024, 1, 5),
                (8 + i, 0),
                "Posta Hersu",
                "1",
                "SUPER",
                Some(1.0 + i as f64),
                Some(100.0),
            )
        })
        .collect();
    repo.replace_all(records, run("r1", PersistPolicy::Replace, "2024-01-05T00:00:00Z"))
        .await
        .unwrap();

    let page = repo
        .query(&TransactionQuery {
            limit: Some(2),
            offset: Some(2),
            ..Default::default()
        })
        .await
        .unwrap();
    assert_eq!(page.len(), 2);
    assert_eq!(page[0].time_text(), "10:00:00");

    // 无分页参数的请求不受上一请求影响
    let all = repo.query(&TransactionQuery::default()).await.unwrap();
    assert_eq!(all.len(), 5);

    let tail = repo
        .query(&TransactionQuery {
            offset: Some(4),
            ..Default::default()
        })
        .await
        .unwrap();
    assert_eq!(tail.len(), 1);
}

#[tokio::test]
async fn test_export_writes_null_as_empty() {
    logging::init_test();

    let (_temp_file, db_path) = test_helpers::create_test_db().expect("Failed to create test db");
    let repo = TransactionRepositoryImpl::new(&db_path).unwrap();
    repo.replace_all(
        vec![record((2024, 3, 1), (0, 0), "Petrol", "1", "GNC", None, Some(250.5))],
        run("r1", PersistPolicy::Replace, "2024-03-01T00:00:00Z"),
    )
    .await
    .unwrap();

    let dir = tempfile::TempDir::new().unwrap();
    let path = dir.path().join("despachos.csv");
    let all = repo.query(&TransactionQuery::default()).await.unwrap();
    assert_eq!(export_csv(&path, &all).unwrap(), 1);

    let text = std::fs::read_to_string(&path).unwrap();
    assert_eq!(
        text.lines().nth(1).unwrap(),
        "2024-03-01,00:00:00,Petrol,1,a,GNC,,250.5,,fixture.csv"
    );
}
