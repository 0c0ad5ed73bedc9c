//! Crawl tests over synthetic dump trees

use std::fs;
use std::path::Path;

use tempfile::TempDir;

use super::window::utc;
use super::{select_by_time, upper_bound, CrawlRequest, Crawler, TimeWindow};
use crate::app::remote::testing::FakeTree;
use crate::app::remote::RemoteFileManager;
use crate::errors::RemoteError;

/// 2024-01-01T00:00:00Z in epoch seconds
const JAN_1: i64 = 1_704_067_200;
const DAY: i64 = 86_400;

fn window_secs(start: i64, end: i64) -> TimeWindow {
    TimeWindow::new(start * 1000, Some(end * 1000), utc()).unwrap()
}

fn bucket_path(day: i64, bucket_secs: i64) -> String {
    format!("/dump/srv/2024/01/{:02}/{}", day, bucket_secs * 1000)
}

fn request(window: TimeWindow, output: &Path) -> CrawlRequest {
    CrawlRequest::new(window, "/dump", output)
}

#[test]
fn test_listing_cost_follows_window_not_tree_size() {
    let tree = FakeTree::new();
    for day in 1..=10 {
        let day_start = JAN_1 + (day - 1) * DAY;
        for i in 0..100 {
            let bucket = day_start + i * 600;
            tree.file(
                &format!("{}/calls/000001.bin", bucket_path(day, bucket)),
                64,
                bucket + 90,
            );
        }
    }
    let manager = RemoteFileManager::new(tree.clone());
    let temp_dir = TempDir::new().unwrap();

    // Window inside bucket 50 of day 10
    let bucket = JAN_1 + 9 * DAY + 50 * 600;
    let request = request(window_secs(bucket + 60, bucket + 120), temp_dir.path());
    let (tasks, stats) = Crawler::new(&manager, &request).collect().unwrap();

    assert_eq!(tasks.len(), 1);
    assert_eq!(
        tasks[0].remote.path(),
        format!("{}/calls/000001.bin", bucket_path(10, bucket))
    );
    assert_eq!(stats.buckets_visited, 1);

    // root, server, year, month, ten days, then one bucket and its calls folder
    let listings = tree.directory_listings();
    assert!(listings <= 20, "listed {} directories", listings);
}

#[test]
fn test_upper_bound_uses_next_sibling_or_unbounded() {
    let tree = FakeTree::new();
    for bucket in ["100", "200", "300"] {
        tree.dir(&format!("/dump/srv/2024/01/01/{}", bucket));
    }
    let manager = RemoteFileManager::new(tree.clone());

    let first = manager.get("/dump/srv/2024/01/01/100");
    assert_eq!(upper_bound(&manager, &first, 3).unwrap(), Some(200));

    let last = manager.get("/dump/srv/2024/01/01/300");
    assert_eq!(upper_bound(&manager, &last, 3).unwrap(), None);

    let day = manager.get("/dump/srv/2024/01/01");
    assert_eq!(upper_bound(&manager, &day, 2).unwrap(), None);
}

#[test]
fn test_upper_bound_climbs_to_following_subtree() {
    let tree = FakeTree::new();
    tree.dir("/dump/srv/2024/01/01/100")
        .dir("/dump/srv/2024/01/01/300")
        .dir("/dump/srv/2024/01/02")
        .dir("/dump/srv/2024/02/01/400")
        .dir("/dump/srv/2025/01/01/500");
    let manager = RemoteFileManager::new(tree);

    // Empty day 02 is passed over on the way to February
    let last = manager.get("/dump/srv/2024/01/01/300");
    assert_eq!(upper_bound(&manager, &last, 3).unwrap(), Some(400));

    let january = manager.get("/dump/srv/2024/01");
    assert_eq!(upper_bound(&manager, &january, 1).unwrap(), Some(400));

    let year = manager.get("/dump/srv/2024");
    assert_eq!(upper_bound(&manager, &year, 0).unwrap(), Some(500));

    let next_year = manager.get("/dump/srv/2025/01/01/500");
    assert_eq!(upper_bound(&manager, &next_year, 3).unwrap(), None);
}

#[test]
fn test_select_by_time_keeps_one_file_past_end() {
    let mtimes = [200, 90, 260, 100, 150, 300];
    let selected: Vec<i64> = select_by_time(&mtimes, 100, Some(200), |m| *m)
        .into_iter()
        .copied()
        .collect();
    assert_eq!(selected, vec![100, 150, 200, 260]);

    let open: Vec<i64> = select_by_time(&mtimes, 150, None, |m| *m)
        .into_iter()
        .copied()
        .collect();
    assert_eq!(open, vec![150, 200, 260, 300]);

    assert!(select_by_time(&mtimes, 400, Some(500), |m| *m).is_empty());
}

fn bucket_tree() -> (FakeTree, i64) {
    let tree = FakeTree::new();
    let bucket = JAN_1 + 3600;
    let path = bucket_path(1, bucket);
    tree.file(&format!("{}/calls/000001.bin", path), 100, bucket + 10)
        .file(&format!("{}/calls/000002.bin", path), 200, bucket + 500)
        .file(&format!("{}/calls[1]/000001.bin", path), 50, bucket + 20)
        .file(&format!("{}/dictionary/000001.bin", path), 10, bucket)
        .file(&format!("{}/params/000001.bin", path), 11, bucket)
        .file(&format!("{}/trace/000001.bin", path), 12, bucket + 10)
        .file(&format!("{}/trace/000009.bin", path), 12, bucket + 900)
        .file(&format!("{}/trace/000010.bin", path), 12, bucket + 950)
        .file(&format!("{}/sql/000001.bin", path), 13, bucket + 10);

    // Bucket inside the window whose calls folder is empty
    let quiet = bucket + 50;
    let quiet_path = bucket_path(1, quiet);
    tree.dir(&format!("{}/calls", quiet_path))
        .file(&format!("{}/params/000001.bin", quiet_path), 5, quiet);
    (tree, bucket)
}

#[test]
fn test_bucket_folder_policies() {
    let (tree, bucket) = bucket_tree();
    let manager = RemoteFileManager::new(tree);
    let temp_dir = TempDir::new().unwrap();
    let request = request(window_secs(bucket, bucket + 100), temp_dir.path());

    let (tasks, stats) = Crawler::new(&manager, &request).collect().unwrap();
    let mut remote: Vec<String> = tasks
        .iter()
        .map(|t| t.remote.path().rsplit("/01/").next().unwrap().to_string())
        .collect();
    remote.sort();

    let b = bucket * 1000;
    assert_eq!(
        remote,
        vec![
            format!("{}/calls/000001.bin", b),
            format!("{}/calls/000002.bin", b),
            format!("{}/calls[1]/000001.bin", b),
            format!("{}/dictionary/000001.bin", b),
            format!("{}/params/000001.bin", b),
            format!("{}/sql/000001.bin", b),
            format!("{}/trace/000001.bin", b),
            format!("{}/trace/000009.bin", b),
        ]
    );
    assert_eq!(stats.buckets_visited, 2);
    assert_eq!(stats.buckets_without_calls, 1);

    let params = tasks
        .iter()
        .find(|t| t.remote.name() == "000001.bin" && t.remote.path().contains("/params/"))
        .unwrap();
    assert_eq!(
        params.local,
        temp_dir
            .path()
            .join("srv/2024/01/01")
            .join(b.to_string())
            .join("params/000001.bin")
    );
    assert_eq!(params.size(), 11);
}

#[test]
fn test_skip_details_and_server_selection() {
    let (tree, bucket) = bucket_tree();
    tree.file("/dump/other/2024/01/01/1704070800000/calls/x.bin", 1, bucket + 10);
    let manager = RemoteFileManager::new(tree);
    let temp_dir = TempDir::new().unwrap();

    let mut request = request(window_secs(bucket, bucket + 100), temp_dir.path());
    request.skip_details = true;
    request.servers = Some(vec!["srv".to_string()]);

    let (tasks, stats) = Crawler::new(&manager, &request).collect().unwrap();
    assert_eq!(stats.servers, 1);
    assert!(tasks.iter().all(|t| t.remote.path().starts_with("/dump/srv/")));
    assert!(!tasks
        .iter()
        .any(|t| t.remote.path().contains("/trace/") || t.remote.path().contains("/sql/")));
    assert_eq!(tasks.len(), 5);
}

#[test]
fn test_rerun_with_matching_local_files_is_empty() {
    let (tree, bucket) = bucket_tree();
    let temp_dir = TempDir::new().unwrap();
    let request = request(window_secs(bucket, bucket + 100), temp_dir.path());

    let manager = RemoteFileManager::new(tree.clone());
    let (tasks, _) = Crawler::new(&manager, &request).collect().unwrap();
    assert!(!tasks.is_empty());
    for task in &tasks {
        fs::create_dir_all(task.local.parent().unwrap()).unwrap();
        fs::write(&task.local, vec![0u8; task.size() as usize]).unwrap();
    }

    let manager = RemoteFileManager::new(tree);
    let (again, stats) = Crawler::new(&manager, &request).collect().unwrap();
    assert!(again.is_empty());
    assert_eq!(stats.files_up_to_date, tasks.len());
}

#[test]
fn test_size_mismatch_is_downloaded_again() {
    let (tree, bucket) = bucket_tree();
    let temp_dir = TempDir::new().unwrap();
    let request = request(window_secs(bucket, bucket + 100), temp_dir.path());

    let manager = RemoteFileManager::new(tree);
    let (tasks, _) = Crawler::new(&manager, &request).collect().unwrap();
    let first = &tasks[0];
    fs::create_dir_all(first.local.parent().unwrap()).unwrap();
    fs::write(&first.local, b"short").unwrap();

    let (again, _) = Crawler::new(&manager, &request).collect().unwrap();
    assert_eq!(again.len(), tasks.len());
}

#[test]
fn test_window_before_all_data_selects_nothing() {
    let (tree, bucket) = bucket_tree();
    let manager = RemoteFileManager::new(tree);
    let temp_dir = TempDir::new().unwrap();
    let request = request(window_secs(bucket - 7200, bucket - 3600), temp_dir.path());

    let (tasks, _) = Crawler::new(&manager, &request).collect().unwrap();
    assert!(tasks.is_empty());
}

#[test]
fn test_missing_dump_root_fails() {
    let manager = RemoteFileManager::new(FakeTree::new());
    let temp_dir = TempDir::new().unwrap();
    let request = request(window_secs(0, 1), temp_dir.path());

    assert!(matches!(
        Crawler::new(&manager, &request).collect(),
        Err(RemoteError::NotFound { .. })
    ));
}

#[test]
fn test_preload_serves_whole_crawl() {
    let (tree, bucket) = bucket_tree();
    tree.file("/dump/srv/classes/a.jar", 1, 1);
    let manager = RemoteFileManager::new(tree.clone());
    let temp_dir = TempDir::new().unwrap();
    let mut request = request(window_secs(bucket, bucket + 100), temp_dir.path());
    request.preload = true;

    let (tasks, _) = Crawler::new(&manager, &request).collect().unwrap();
    assert_eq!(tasks.len(), 8);
    assert_eq!(tree.directory_listings(), 0);
}
