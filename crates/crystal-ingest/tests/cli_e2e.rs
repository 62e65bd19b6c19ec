//! End-to-end tests for the crystal-ingest binary

use assert_cmd::Command;
use flate2::write::GzEncoder;
use flate2::Compression;
use predicates::prelude::*;
use std::io::Write;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn crystal() -> Command {
    let mut cmd = Command::cargo_bin("crystal-ingest").unwrap();
    cmd.env("LOG_OUTPUT", "console").env_remove("LOG_LEVEL");
    cmd
}

#[test]
fn test_help_lists_stages() {
    crystal()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("build"))
        .stdout(predicate::str::contains("partition"));
}

#[test]
fn test_sort_then_partition_subcommands() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("raw.txt"), "banana\nApple\napple\navocado\n").unwrap();

    crystal()
        .current_dir(dir.path())
        .args(["sort", "--input", "raw.txt", "--output", "sorted.txt"])
        .assert()
        .success();

    assert_eq!(
        std::fs::read_to_string(dir.path().join("sorted.txt")).unwrap(),
        "Apple\navocado\nbanana\n"
    );

    crystal()
        .current_dir(dir.path())
        .args(["partition", "--input", "sorted.txt", "--shard-dir", "shards"])
        .assert()
        .success();

    let shards = dir.path().join("shards");
    assert_eq!(std::fs::read_to_string(shards.join("index_A.txt")).unwrap(), "Apple\n");
    assert_eq!(std::fs::read_to_string(shards.join("index_a.txt")).unwrap(), "avocado\n");
    assert_eq!(std::fs::read_to_string(shards.join("index_b.txt")).unwrap(), "banana\n");
}

#[test]
fn test_sort_in_place() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("ids.txt"), "b\na\nA\n").unwrap();

    crystal()
        .current_dir(dir.path())
        .args(["sort", "-i", "ids.txt", "-o", "ids.txt"])
        .assert()
        .success();

    assert_eq!(
        std::fs::read_to_string(dir.path().join("ids.txt")).unwrap(),
        "A\nb\n"
    );
}

#[test]
fn test_missing_sort_input_fails_with_stage() {
    let dir = tempfile::tempdir().unwrap();

    crystal()
        .current_dir(dir.path())
        .args(["sort", "-i", "absent.txt", "-o", "sorted.txt"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("sort stage failed"));
}

#[test]
fn test_invalid_config_is_rejected() {
    let dir = tempfile::tempdir().unwrap();

    crystal()
        .current_dir(dir.path())
        .args(["build", "--max-workers", "0"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("max_workers"));
}

#[tokio::test(flavor = "multi_thread")]
async fn test_build_against_mock_host() {
    let server = MockServer::start().await;

    let index = format!(
        r#"<sitemapindex><sitemap><loc>{0}/sitemap.xml</loc></sitemap><sitemap><loc>{0}/c/one.xml.gz</loc></sitemap></sitemapindex>"#,
        server.uri()
    );
    let mut chunk = GzEncoder::new(Vec::new(), Compression::default());
    chunk
        .write_all(
            b"<urlset><url><loc>https://www.dnb.com/business-directory/company-profiles.initech.html</loc></url></urlset>",
        )
        .unwrap();
    let chunk = chunk.finish().unwrap();

    Mock::given(method("GET"))
        .and(path("/index.xml"))
        .respond_with(ResponseTemplate::new(200).set_body_string(index))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/c/one.xml.gz"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(chunk))
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().unwrap();

    crystal()
        .current_dir(dir.path())
        .env("CRYSTAL_SENTINEL_URL", format!("{}/sitemap.xml", server.uri()))
        .args(["build", "--no-progress", "--base-url"])
        .arg(format!("{}/index.xml", server.uri()))
        .args(["--chunk-dir", "chunks", "--shard-dir", "shards"])
        .assert()
        .success();

    assert_eq!(
        std::fs::read_to_string(dir.path().join("shards").join("index_i.txt")).unwrap(),
        "initech.html\n"
    );
    assert!(!dir.path().join("chunks").exists());
}
