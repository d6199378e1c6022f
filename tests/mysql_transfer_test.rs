// ABOUTME: Integration tests moving dumps through a live MySQL server
// ABOUTME: Ignored by default; set TEST_MYSQL_URL to run them

use mysql_async::prelude::*;
use mysql_async::{Conn, Opts};
use std::env;
use tabledump::commands::{dump_in, dump_out, verify_dump, ExportOptions, ImportOptions};
use tabledump::dump::FileEncoding;
use tabledump::filters::TablePattern;
use tabledump::session::mysql::MysqlSession;
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

/// Helper to get test MySQL URL from environment
fn get_test_mysql_url() -> Option<String> {
    env::var("TEST_MYSQL_URL").ok()
}

async fn admin(url: &str) -> Conn {
    Conn::new(Opts::from_url(url).unwrap()).await.unwrap()
}

#[tokio::test]
#[ignore]
async fn test_mysql_round_trip_keeps_types() {
    let Some(url) = get_test_mysql_url() else {
        return;
    };
    let mut conn = admin(&url).await;
    conn.query_drop("DROP TABLE IF EXISTS tdm_items")
        .await
        .unwrap();
    conn.query_drop(
        "CREATE TABLE tdm_items (
            id INT PRIMARY KEY,
            name VARCHAR(40) NOT NULL,
            price DECIMAL(10, 2),
            weight DOUBLE,
            active TINYINT(1),
            added DATETIME
        )",
    )
    .await
    .unwrap();
    conn.query_drop(
        "INSERT INTO tdm_items VALUES
            (1, 'O''Brien\\\\Co', 12.50, 0.25, 1, '2024-01-31 10:00:00'),
            (2, 'plain', NULL, NULL, 0, NULL)",
    )
    .await
    .unwrap();

    let dir = TempDir::new().unwrap();
    let file = dir.path().join("items.dump");
    let mut session = MysqlSession::connect(&url).await.unwrap();
    let report = dump_out(
        &mut session,
        &file,
        &[TablePattern::parse("tdm_items").unwrap()],
        &ExportOptions {
            encoding: FileEncoding::Utf8,
            progress: false,
        },
        &CancellationToken::new(),
    )
    .await
    .unwrap();
    assert_eq!(report.tables[0].rows, 2);
    assert!(!report.tables[0].count_mismatch());

    let options = ImportOptions {
        encoding: FileEncoding::Utf8,
        commit_interval: 0,
        progress: false,
    };
    let verified = verify_dump(&file, &options, &CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(verified.total_rows(), 2);

    conn.query_drop("DELETE FROM tdm_items").await.unwrap();
    let report = dump_in(&mut session, &file, &options, &CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(report.total_rows(), 2);
    assert_eq!(report.total_failed_rows(), 0);

    let name: Option<String> = conn
        .query_first("SELECT name FROM tdm_items WHERE id = 1")
        .await
        .unwrap();
    assert_eq!(name.as_deref(), Some("O'Brien\\Co"));
    let price: Option<String> = conn
        .query_first("SELECT CAST(price AS CHAR) FROM tdm_items WHERE id = 1")
        .await
        .unwrap();
    assert_eq!(price.as_deref(), Some("12.50"));

    conn.query_drop("DROP TABLE tdm_items").await.unwrap();
}
