//! Inventory job behavior over a mocked object store: good files ingest,
//! corrupt files are skipped, the job reports partial success.

use std::io::Write;

use aws_sdk_s3::operation::get_object::GetObjectOutput;
use aws_sdk_s3::primitives::ByteStream;
use aws_smithy_mocks::{RuleMode, mock, mock_client};
use flate2::Compression;
use flate2::write::GzEncoder;
use tokio::sync::mpsc;

use stratus_core::event::{EventType, FlatEvent};
use stratus_core::s3::Client;
use stratus_flow::inventory::{FileStatus, InventoryReader, Manifest};

fn gzip(content: &str) -> Vec<u8> {
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(content.as_bytes()).unwrap();
    encoder.finish().unwrap()
}

fn manifest_for(files: &[(&str, &str)]) -> Manifest {
    let files_json: Vec<String> = files
        .iter()
        .map(|(key, md5)| format!(r#"{{"key": "{key}", "MD5checksum": "{md5}"}}"#))
        .collect();
    Manifest::from_json(&format!(
        r#"{{
            "sourceBucket": "data",
            "destinationBucket": "arn:aws:s3:::inventory",
            "fileFormat": "CSV",
            "fileSchema": ["Bucket", "Key", "VersionId", "Size"],
            "files": [{files}]
        }}"#,
        files = files_json.join(",")
    ))
    .unwrap()
}

#[tokio::test]
async fn corrupt_file_is_skipped_and_job_continues() {
    let good = gzip("\"data\",\"key1\",\"v1\",\"10\"\n\"data\",\"key2\",\"v2\",\"20\"\n");
    let bad = gzip("\"data\",\"key3\",\"v3\",\"30\"\n");

    let good_md5 = format!("{:x}", md5::compute(&good));
    let manifest = manifest_for(&[
        ("data/f1.csv.gz", &good_md5),
        ("data/f2.csv.gz", "00000000000000000000000000000000"),
    ]);

    let good_clone = good.clone();
    let rule_good = mock!(aws_sdk_s3::Client::get_object)
        .match_requests(|req| req.key() == Some("data/f1.csv.gz"))
        .then_output(move || {
            GetObjectOutput::builder()
                .body(ByteStream::from(good_clone.clone()))
                .build()
        });
    let bad_clone = bad.clone();
    let rule_bad = mock!(aws_sdk_s3::Client::get_object)
        .match_requests(|req| req.key() == Some("data/f2.csv.gz"))
        .then_output(move || {
            GetObjectOutput::builder()
                .body(ByteStream::from(bad_clone.clone()))
                .build()
        });
    let s3 = Client::new(mock_client!(
        aws_sdk_s3,
        RuleMode::MatchAny,
        [&rule_good, &rule_bad]
    ));

    let reader = InventoryReader::new(s3, 100);
    let (sender, mut receiver) = mpsc::channel::<Vec<FlatEvent>>(16);

    let summary = reader.run(&manifest, &sender).await.unwrap();
    drop(sender);

    assert_eq!(summary.n_rows, 2);
    assert!(summary.is_partial());
    assert_eq!(summary.outcomes.len(), 2);
    assert!(matches!(
        summary.outcomes[0].status,
        FileStatus::Ingested { rows: 2 }
    ));
    assert!(matches!(summary.outcomes[1].status, FileStatus::Skipped { .. }));

    let mut events = Vec::new();
    while let Some(batch) = receiver.recv().await {
        events.extend(batch);
    }
    assert_eq!(events.len(), 2);
    assert!(events.iter().all(|e| e.event_type == EventType::Crawl));
    assert!(events.iter().all(|e| e.sequencer.is_none()));
    let keys: Vec<&str> = events.iter().map(|e| e.key.as_str()).collect();
    assert_eq!(keys, vec!["key1", "key2"]);

    // Every verified row ends up as a tracked object after ingestion.
    let mut store = stratus_store::InMemoryStore::new();
    store.ingest(events);
    assert!(store.current_object("data", "key1").is_some());
    assert!(store.current_object("data", "key2").is_some());
}

#[tokio::test]
async fn all_files_failing_is_not_partial() {
    let manifest = manifest_for(&[("data/f1.csv.gz", "badbadbadbadbadbadbadbadbadbadba")]);
    let rule = mock!(aws_sdk_s3::Client::get_object).then_output(|| {
        GetObjectOutput::builder()
            .body(ByteStream::from(gzip("\"data\",\"k\",\"v\",\"1\"\n")))
            .build()
    });
    let s3 = Client::new(mock_client!(aws_sdk_s3, RuleMode::MatchAny, [&rule]));

    let reader = InventoryReader::new(s3, 100);
    let (sender, _receiver) = mpsc::channel::<Vec<FlatEvent>>(16);

    let summary = reader.run(&manifest, &sender).await.unwrap();
    assert_eq!(summary.n_rows, 0);
    assert!(!summary.is_partial());
}
