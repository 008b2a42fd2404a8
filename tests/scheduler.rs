mod common;

use cloud_mirror_rust::{
    remote::RemoteFolder, DownloadError, DownloadEvent, DownloadLink, DownloadScheduler,
    DownloadStatus, DownloadStore, Group, GroupState, Item, SchedulerConfig,
};
use common::*;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

const KB: u64 = 1024;

struct Setup {
    server: TestServer,
    sink: Arc<RecordingSink>,
    scheduler: DownloadScheduler,
    dir: tempfile::TempDir,
}

fn scheduler_config(groups: usize, small: usize, large: usize, threshold: u64) -> SchedulerConfig {
    SchedulerConfig {
        max_concurrent_groups: groups,
        max_concurrent_small: small,
        max_concurrent_large: large,
        large_file_threshold: threshold,
        stats_interval: Duration::from_millis(50),
        downloader: fast_config(64 * KB, 2),
    }
}

async fn setup(
    config: SchedulerConfig,
    options: ServerOptions,
    remote: impl FnOnce(&TestServer) -> StaticRemote,
) -> Setup {
    let server = TestServer::start(options).await;
    let remote = Arc::new(remote(&server));
    let sink = Arc::new(RecordingSink::default());
    let scheduler = DownloadScheduler::with_client(
        config,
        test_client(),
        DownloadStore::new(),
        remote.clone(),
        remote,
        sink.clone(),
    );
    Setup {
        server,
        sink,
        scheduler,
        dir: tempfile::tempdir().unwrap(),
    }
}

impl Setup {
    fn ready_group(&self, id: &str) -> Group {
        let mut group = Group::new(id, id, self.dir.path().join(id));
        group.advance_state(GroupState::Ready).unwrap();
        group
    }

    async fn wait_group(&self, id: &str, status: DownloadStatus) -> bool {
        wait_until(Duration::from_secs(30), || {
            self.scheduler.group(id).map(|g| g.status) == Some(status)
        })
        .await
    }
}

/// 按事件顺序回放，返回同时处于 Downloading 的最大数量
fn max_concurrent<'a>(changes: impl Iterator<Item = (&'a str, DownloadStatus)>) -> usize {
    let mut active = HashSet::new();
    let mut max = 0;
    for (id, status) in changes {
        if status == DownloadStatus::Downloading {
            active.insert(id.to_string());
        } else {
            active.remove(id);
        }
        max = max.max(active.len());
    }
    max
}

fn group_changes(events: &[DownloadEvent]) -> Vec<(&str, DownloadStatus)> {
    events
        .iter()
        .filter_map(|event| match event {
            DownloadEvent::GroupStatusChanged { group_id, new_status, .. } => {
                Some((group_id.as_str(), *new_status))
            }
            _ => None,
        })
        .collect()
}

fn item_changes(events: &[DownloadEvent]) -> Vec<(&str, DownloadStatus)> {
    events
        .iter()
        .filter_map(|event| match event {
            DownloadEvent::ItemStatusChanged { item_id, new_status, .. } => {
                Some((item_id.as_str(), *new_status))
            }
            _ => None,
        })
        .collect()
}

fn slow_options() -> ServerOptions {
    ServerOptions {
        chunk_delay: Duration::from_millis(20),
        ..Default::default()
    }
}

#[tokio::test]
async fn test_group_concurrency_is_bounded() {
    let size = 512 * KB;
    let s = setup(scheduler_config(2, 4, 2, 10 * 1024 * KB), slow_options(), |server| {
        (0..5).fold(StaticRemote::new(), |remote, i| {
            remote.with_link(&format!("f{}", i), DownloadLink::new(server.url(&format!("f{}.bin", i))))
        })
    })
    .await;

    for i in 0..5 {
        s.server.put_file(&format!("f{}.bin", i), pattern(size as usize));
        let group = s.ready_group(&format!("g{}", i));
        let item = Item::new(format!("f{}", i), "", format!("f{}.bin", i), "", size);
        s.scheduler.add_group(group, vec![item]).unwrap();
    }

    for i in 0..5 {
        assert!(s.wait_group(&format!("g{}", i), DownloadStatus::Completed).await);
    }

    let events = s.sink.events();
    let changes = group_changes(&events);
    let max = max_concurrent(changes.into_iter());
    assert_eq!(max, 2, "{} groups downloading at once", max);

    for i in 0..5 {
        let path = s.dir.path().join(format!("g{}", i)).join(format!("f{}.bin", i));
        assert_eq!(std::fs::read(path).unwrap(), pattern(size as usize));
    }
}

#[tokio::test]
async fn test_small_and_large_budgets_are_separate() {
    let small = 64 * KB;
    let large = 512 * KB;
    let s = setup(scheduler_config(1, 2, 1, 256 * KB), slow_options(), |server| {
        (0..6).fold(StaticRemote::new(), |remote, i| {
            remote.with_link(&format!("f{}", i), DownloadLink::new(server.url(&format!("f{}.bin", i))))
        })
    })
    .await;

    let mut items = Vec::new();
    for i in 0..6 {
        // f0..f3 小文件，f4 f5 大文件
        let size = if i < 4 { small } else { large };
        s.server.put_file(&format!("f{}.bin", i), pattern(size as usize));
        items.push(Item::new(format!("f{}", i), "", format!("f{}.bin", i), "data", size));
    }
    s.scheduler.add_group(s.ready_group("g"), items).unwrap();
    assert!(s.wait_group("g", DownloadStatus::Completed).await);

    let events = s.sink.events();
    let changes = item_changes(&events);
    let small_max = max_concurrent(changes.iter().copied().filter(|(id, _)| *id < "f4"));
    let large_max = max_concurrent(changes.iter().copied().filter(|(id, _)| *id >= "f4"));
    assert!(small_max <= 2, "{} small files at once", small_max);
    assert!(large_max <= 1, "{} large files at once", large_max);

    let progress = s.scheduler.group_progress("g").unwrap();
    assert_eq!(progress.completed_items, 6);
    assert_eq!(progress.downloaded_bytes, 4 * small + 2 * large);
}

#[tokio::test]
async fn test_request_folder_walks_remote_tree() {
    let s = setup(scheduler_config(2, 4, 2, 1024 * KB), ServerOptions::default(), |server| {
        StaticRemote::new()
            .with_link("a", DownloadLink::new(server.url("a.txt")))
            .with_link("b", DownloadLink::new(server.url("b.txt")))
            .with_link("c", DownloadLink::new(server.url("c.txt")))
            .with_folder(RemoteFolder {
                id: "folder-1".into(),
                name: "照片".into(),
                entries: vec![
                    entry("a", "a.txt", "", 100 * KB),
                    entry("b", "b.txt", "2024/05", 10),
                    entry("c", "c.txt", "2024/06", 0),
                ],
            })
    })
    .await;
    s.server.put_file("a.txt", pattern(100 * KB as usize));
    s.server.put_file("b.txt", pattern(10));

    let save_at = s.dir.path().join("mirror");
    let group = s.scheduler.request_folder("folder-1", &save_at).await.unwrap();
    assert_eq!(group.state, GroupState::Ready);
    assert_eq!(group.name, "照片");
    assert_eq!(s.scheduler.items_of_group("folder-1").len(), 3);

    assert!(s.wait_group("folder-1", DownloadStatus::Completed).await);
    assert_eq!(std::fs::read(save_at.join("a.txt")).unwrap(), pattern(100 * KB as usize));
    assert_eq!(std::fs::read(save_at.join("2024/05/b.txt")).unwrap(), pattern(10));
    assert_eq!(std::fs::metadata(save_at.join("2024/06/c.txt")).unwrap().len(), 0);

    let states: Vec<GroupState> = s
        .sink
        .events()
        .into_iter()
        .filter_map(|event| match event {
            DownloadEvent::GroupStateChanged { group_id, state, .. } if group_id == "folder-1" => {
                Some(state)
            }
            _ => None,
        })
        .collect();
    assert_eq!(states, vec![GroupState::Initializing, GroupState::Ready]);
    assert_eq!(s.sink.group_statuses("folder-1").last(), Some(&DownloadStatus::Completed));
}

#[tokio::test]
async fn test_walk_failure_marks_group_error() {
    let s = setup(scheduler_config(2, 4, 2, 1024 * KB), ServerOptions::default(), |_| {
        StaticRemote::new()
    })
    .await;

    let err = s
        .scheduler
        .request_folder("nope", s.dir.path())
        .await
        .unwrap_err();
    assert!(matches!(err, DownloadError::Remote(_)));

    let group = s.scheduler.group("nope").unwrap();
    assert_eq!(group.status, DownloadStatus::Error);
    assert_eq!(group.state, GroupState::Initializing);
    assert!(group.error.unwrap().contains("folder not found"));
}

#[tokio::test]
async fn test_add_group_rejects_duplicate_paths() {
    let s = setup(scheduler_config(1, 1, 1, 1024 * KB), ServerOptions::default(), |_| {
        StaticRemote::new()
    })
    .await;

    let items = vec![
        Item::new("1", "", "same.txt", "dir", 1),
        Item::new("2", "", "same.txt", "/dir", 1),
    ];
    let err = s.scheduler.add_group(s.ready_group("g"), items).unwrap_err();
    assert!(matches!(err, DownloadError::DuplicateItem(_)));
    assert!(s.scheduler.group("g").is_none());

    let escaping = vec![Item::new("3", "", "x.txt", "../outside", 1)];
    let err = s.scheduler.add_group(s.ready_group("g"), escaping).unwrap_err();
    assert!(matches!(err, DownloadError::InvalidPath(_)));
}

#[tokio::test]
async fn test_empty_group_completes() {
    let s = setup(scheduler_config(1, 1, 1, 1024 * KB), ServerOptions::default(), |_| {
        StaticRemote::new()
    })
    .await;
    s.scheduler.add_group(s.ready_group("empty"), Vec::new()).unwrap();
    assert_eq!(s.scheduler.group("empty").unwrap().status, DownloadStatus::Completed);
}

#[tokio::test]
async fn test_group_waits_until_ready() {
    let s = setup(scheduler_config(1, 1, 1, 1024 * KB), ServerOptions::default(), |server| {
        StaticRemote::new().with_link("f", DownloadLink::new(server.url("f.bin")))
    })
    .await;
    s.server.put_file("f.bin", pattern(1000));

    let group = Group::new("g", "g", s.dir.path());
    s.scheduler
        .add_group(group, vec![Item::new("f", "", "f.bin", "", 1000)])
        .unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(s.scheduler.item("f").unwrap().status, DownloadStatus::Pending);
    assert!(s.server.requests().is_empty());

    s.scheduler.mark_group_ready("g").unwrap();
    assert!(s.wait_group("g", DownloadStatus::Completed).await);
}

#[tokio::test]
async fn test_pause_and_resume_group() {
    let size = 1024 * KB;
    let s = setup(scheduler_config(1, 2, 1, 10 * 1024 * KB), slow_options(), |server| {
        StaticRemote::new().with_link("f", DownloadLink::new(server.url("f.bin")))
    })
    .await;
    s.server.put_file("f.bin", pattern(size as usize));
    s.scheduler
        .add_group(s.ready_group("g"), vec![Item::new("f", "", "f.bin", "", size)])
        .unwrap();

    assert!(s.wait_group("g", DownloadStatus::Downloading).await);
    s.scheduler.pause_group("g").await.unwrap();
    assert_eq!(s.scheduler.item("f").unwrap().status, DownloadStatus::Paused);
    assert_eq!(s.scheduler.group("g").unwrap().status, DownloadStatus::Paused);

    let requests = s.server.requests().len();
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(s.server.requests().len(), requests);

    s.scheduler.resume_group("g").unwrap();
    assert!(s.wait_group("g", DownloadStatus::Completed).await);
    let path = s.dir.path().join("g").join("f.bin");
    assert_eq!(std::fs::read(path).unwrap(), pattern(size as usize));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_resume_right_after_pause_is_not_lost() {
    let size = 4 * 1024 * KB;
    let s = setup(scheduler_config(1, 2, 1, 10 * 1024 * KB), slow_options(), |server| {
        StaticRemote::new().with_link("f", DownloadLink::new(server.url("f.bin")))
    })
    .await;
    s.server.put_file("f.bin", pattern(size as usize));
    s.scheduler
        .add_group(s.ready_group("g"), vec![Item::new("f", "", "f.bin", "", size)])
        .unwrap();

    assert!(s.wait_group("g", DownloadStatus::Downloading).await);
    s.scheduler.pause_group("g").await.unwrap();
    s.scheduler.resume_group("g").unwrap();

    assert!(s.wait_group("g", DownloadStatus::Completed).await);
    assert_eq!(s.scheduler.item("f").unwrap().status, DownloadStatus::Completed);
    let path = s.dir.path().join("g").join("f.bin");
    assert!(std::fs::read(path).unwrap() == pattern(size as usize));
}

#[tokio::test]
async fn test_item_owned_by_another_group_is_rejected() {
    let s = setup(scheduler_config(1, 1, 1, 1024 * KB), ServerOptions::default(), |_| {
        StaticRemote::new()
            .with_folder(RemoteFolder {
                id: "child".into(),
                name: "child".into(),
                entries: vec![entry("shared", "a.txt", "", 10)],
            })
    })
    .await;

    // 保持 Initializing，不会开始下载
    let first = Group::new("parent", "parent", s.dir.path().join("parent"));
    s.scheduler
        .add_group(
            first,
            vec![
                Item::new("shared", "", "a.txt", "child", 10),
                Item::new("own", "", "b.txt", "", 10),
            ],
        )
        .unwrap();

    let err = s
        .scheduler
        .add_group(
            s.ready_group("other"),
            vec![
                Item::new("fresh", "", "c.txt", "", 10),
                Item::new("shared", "", "a.txt", "", 10),
            ],
        )
        .unwrap_err();
    assert!(matches!(err, DownloadError::DuplicateItem(_)));
    assert!(s.scheduler.group("other").is_none());
    // 失败时已写入的文件被回滚
    assert!(s.scheduler.item("fresh").is_none());

    let err = s.scheduler.request_folder("child", s.dir.path()).await.unwrap_err();
    assert!(matches!(err, DownloadError::DuplicateItem(_)));
    assert_eq!(s.scheduler.group("child").unwrap().status, DownloadStatus::Error);

    assert_eq!(s.scheduler.item("shared").unwrap().group_id, "parent");
    assert_eq!(s.scheduler.items_of_group("parent").len(), 2);
}

#[tokio::test]
async fn test_failed_item_can_be_retried() {
    let s = setup(scheduler_config(1, 2, 1, 1024 * KB), ServerOptions::default(), |server| {
        StaticRemote::new()
            .with_link("ok", DownloadLink::new(server.url("ok.bin")))
            .with_link("late", DownloadLink::new(server.url("late.bin")))
    })
    .await;
    s.server.put_file("ok.bin", pattern(2000));
    s.scheduler
        .add_group(
            s.ready_group("g"),
            vec![
                Item::new("ok", "", "ok.bin", "", 2000),
                Item::new("late", "", "late.bin", "", 3000),
            ],
        )
        .unwrap();

    // late.bin 尚不存在：404 后组进入 Error
    assert!(s.wait_group("g", DownloadStatus::Error).await);
    assert_eq!(s.scheduler.item("ok").unwrap().status, DownloadStatus::Completed);
    assert_eq!(s.scheduler.item("late").unwrap().status, DownloadStatus::Error);
    assert!(matches!(
        s.scheduler.retry_item("ok"),
        Err(DownloadError::InvalidTransition(_))
    ));

    s.server.put_file("late.bin", pattern(3000));
    s.scheduler.retry_item("late").unwrap();
    assert!(s.wait_group("g", DownloadStatus::Completed).await);
    let path = s.dir.path().join("g").join("late.bin");
    assert_eq!(std::fs::read(path).unwrap(), pattern(3000));
}

#[tokio::test]
async fn test_remove_group_forgets_items() {
    let s = setup(scheduler_config(1, 1, 1, 1024 * KB), ServerOptions::default(), |server| {
        StaticRemote::new().with_link("f", DownloadLink::new(server.url("f.bin")))
    })
    .await;
    s.server.put_file("f.bin", pattern(100));
    s.scheduler
        .add_group(s.ready_group("g"), vec![Item::new("f", "", "f.bin", "", 100)])
        .unwrap();
    assert!(s.wait_group("g", DownloadStatus::Completed).await);

    s.scheduler.remove_group("g").await.unwrap();
    assert!(s.scheduler.group("g").is_none());
    assert!(s.scheduler.item("f").is_none());
    assert!(matches!(
        s.scheduler.remove_group("g").await,
        Err(DownloadError::NotFound(_))
    ));
}

#[tokio::test]
async fn test_manager_stats_are_published() {
    let s = setup(scheduler_config(1, 1, 1, 1024 * KB), ServerOptions::default(), |server| {
        StaticRemote::new().with_link("f", DownloadLink::new(server.url("f.bin")))
    })
    .await;
    s.server.put_file("f.bin", pattern(300 * KB as usize));
    s.scheduler
        .add_group(s.ready_group("g"), vec![Item::new("f", "", "f.bin", "", 300 * KB)])
        .unwrap();
    assert!(s.wait_group("g", DownloadStatus::Completed).await);

    assert_eq!(s.scheduler.stats().lifetime_bytes, 300 * KB);
    assert!(
        wait_until(Duration::from_secs(5), || {
            s.sink.events().iter().any(|event| {
                matches!(event, DownloadEvent::ManagerStats(stats) if stats.lifetime_bytes == 300 * KB)
            })
        })
        .await
    );
}
