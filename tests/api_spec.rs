use std::time::Duration;

use axum::http::StatusCode;
use axum_test::TestServer;
use script_manager::api::create_router;
use script_manager::config::Config;
use script_manager::db::Database;
use script_manager::engine::Engine;
use script_manager::models::*;
use tempfile::TempDir;

struct TestApp {
    dir: TempDir,
    server: TestServer,
}

impl TestApp {
    fn library_file(&self, name: &str, content: &str) {
        std::fs::write(self.dir.path().join("library").join(name), content)
            .expect("Failed to write library file");
    }

    fn place(&self, project: &str, name: &str, content: &str) {
        std::fs::write(
            self.dir.path().join("projects").join(project).join(name),
            content,
        )
        .expect("Failed to place project file");
    }
}

fn setup() -> TestApp {
    let dir = tempfile::tempdir().expect("Failed to create temp dir");
    std::fs::create_dir_all(dir.path().join("library")).expect("Failed to create library");

    let config = Config::new(
        dir.path().join("library"),
        dir.path().join("projects"),
        dir.path().join("state"),
    )
    .with_project_names(["alpha", "beta"])
    .with_grace_period(Duration::from_millis(200), Duration::from_millis(20));

    let db = Database::open_memory().expect("Failed to create database");
    db.migrate().expect("Failed to migrate");
    let engine = Engine::new(config, db).expect("Failed to create engine");
    let server = TestServer::new(create_router(engine)).expect("Failed to create test server");

    TestApp { dir, server }
}

fn assign_input(project: &str, filename: &str) -> AssignInput {
    AssignInput {
        project: project.to_string(),
        filename: filename.to_string(),
        mode: AssignMode::Copy,
    }
}

mod library {
    use super::*;

    #[tokio::test]
    async fn lists_library_files() {
        let app = setup();
        app.library_file("bot.py", "print('hi')");
        app.library_file("notes.txt", "ignored");

        let response = app.server.get("/api/v1/library").await;

        response.assert_status_ok();
        let files: Vec<LibraryFile> = response.json();
        assert_eq!(files.len(), 1);
        assert_eq!(files[0].name, "bot.py");
        assert_eq!(files[0].checksum.len(), 16);
    }

    #[tokio::test]
    async fn lists_projects() {
        let app = setup();

        let response = app.server.get("/api/v1/projects").await;

        response.assert_status_ok();
        let projects: Vec<ProjectSummary> = response.json();
        let names: Vec<_> = projects.iter().map(|p| p.name.as_str()).collect();
        assert_eq!(names, vec!["alpha", "beta"]);
    }

    #[tokio::test]
    async fn unknown_project_files_is_not_found() {
        let app = setup();

        app.server
            .get("/api/v1/projects/gamma/files")
            .await
            .assert_status_not_found();
    }
}

mod assign {
    use super::*;

    #[tokio::test]
    async fn returns_created_with_the_new_file() {
        let app = setup();
        app.library_file("bot.py", "x");

        let response = app
            .server
            .post("/api/v1/assign")
            .json(&assign_input("alpha", "bot.py"))
            .await;

        response.assert_status(StatusCode::CREATED);
        let result: AssignResult = response.json();
        assert_eq!(result.file.name, "bot.py");
        assert!(result.replaced.is_empty());

        let files: Vec<ProjectFile> = app.server.get("/api/v1/projects/alpha/files").await.json();
        assert_eq!(files.len(), 1);
    }

    #[tokio::test]
    async fn mode_defaults_to_copy() {
        let app = setup();
        app.library_file("bot.py", "x");

        let response = app
            .server
            .post("/api/v1/assign")
            .json(&serde_json::json!({ "project": "alpha", "filename": "bot.py" }))
            .await;

        response.assert_status(StatusCode::CREATED);
        let result: AssignResult = response.json();
        assert_eq!(result.file.mode, AssignMode::Copy);
    }

    #[tokio::test]
    async fn missing_library_file_is_not_found() {
        let app = setup();

        app.server
            .post("/api/v1/assign")
            .json(&assign_input("alpha", "ghost.py"))
            .await
            .assert_status_not_found();
    }

    #[tokio::test]
    async fn bad_filename_is_bad_request() {
        let app = setup();

        app.server
            .post("/api/v1/assign")
            .json(&assign_input("alpha", "../../etc/passwd.py"))
            .await
            .assert_status(StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn bootstrap_file_is_conflict() {
        let app = setup();
        app.library_file("main.py", "x");

        app.server
            .post("/api/v1/assign")
            .json(&assign_input("alpha", "main.py"))
            .await
            .assert_status(StatusCode::CONFLICT);
    }
}

mod remove {
    use super::*;

    #[tokio::test]
    async fn removes_an_assigned_file() {
        let app = setup();
        app.place("alpha", "bot.py", "x");

        let response = app.server.delete("/api/v1/projects/alpha/files/bot.py").await;

        response.assert_status_ok();
        let result: RemoveResult = response.json();
        assert_eq!(result.stop, StopOutcome::NotRunning);
        assert!(result.snapshot.starts_with("before_remove_"));
    }

    #[tokio::test]
    async fn unassigned_file_is_not_found() {
        let app = setup();

        app.server
            .delete("/api/v1/projects/alpha/files/bot.py")
            .await
            .assert_status_not_found();
    }

    #[tokio::test]
    async fn clear_reports_removed_count() {
        let app = setup();
        app.place("beta", "a.py", "a");
        app.place("beta", "b.py", "b");

        let response = app.server.post("/api/v1/projects/beta/clear").await;

        response.assert_status_ok();
        let result: ClearResult = response.json();
        assert_eq!(result.removed_count, 2);
        assert!(result.snapshot.is_some());
    }

    #[tokio::test]
    async fn stop_all_with_failures_is_multi_status() {
        let app = setup();
        app.place("alpha", "a.py", "a");
        app.place("beta", "b.py", "b");
        app.place("beta", "stop", "");

        let response = app.server.post("/api/v1/stop_all").await;

        response.assert_status(StatusCode::MULTI_STATUS);
        let result: StopAllResult = response.json();
        assert_eq!(result.removed_count, 1);
        assert_eq!(result.failures.len(), 1);
        assert_eq!(result.failures[0].filename, "b.py");
    }

    #[tokio::test]
    async fn stop_all_then_undo() {
        let app = setup();
        app.place("alpha", "a.py", "a");
        app.place("beta", "b.py", "b");

        let response = app.server.post("/api/v1/stop_all").await;
        response.assert_status_ok();
        let result: StopAllResult = response.json();
        assert_eq!(result.removed_count, 2);

        let response = app.server.post("/api/v1/undo").await;
        response.assert_status_ok();
        let undo: UndoResult = response.json();
        assert_eq!(undo.restored, 2);
    }
}

mod snapshots {
    use super::*;

    #[tokio::test]
    async fn undo_without_backup_is_not_found() {
        let app = setup();

        app.server.post("/api/v1/undo").await.assert_status_not_found();
    }

    #[tokio::test]
    async fn create_with_name_then_restore() {
        let app = setup();
        app.place("alpha", "a.py", "a");

        let response = app
            .server
            .post("/api/v1/snapshots")
            .json(&CreateSnapshotInput {
                name: Some("baseline".to_string()),
            })
            .await;
        response.assert_status(StatusCode::CREATED);

        app.server.post("/api/v1/projects/alpha/clear").await.assert_status_ok();

        let response = app.server.post("/api/v1/snapshots/baseline/restore").await;
        response.assert_status_ok();
        let result: RestoreResult = response.json();
        assert_eq!(result.restored, 1);

        let files: Vec<ProjectFile> = app.server.get("/api/v1/projects/alpha/files").await.json();
        assert_eq!(files[0].name, "a.py");
    }

    #[tokio::test]
    async fn create_without_body_generates_a_name() {
        let app = setup();

        let response = app.server.post("/api/v1/snapshots").await;

        response.assert_status(StatusCode::CREATED);
        let summary: SnapshotSummary = response.json();
        assert!(!summary.name.is_empty());
    }

    #[tokio::test]
    async fn malformed_body_is_bad_request() {
        let app = setup();

        app.server
            .post("/api/v1/snapshots")
            .text("{not json")
            .await
            .assert_status(StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn lists_snapshots() {
        let app = setup();
        app.server.post("/api/v1/snapshots").await;
        app.server.post("/api/v1/snapshots").await;

        let response = app.server.get("/api/v1/snapshots").await;

        response.assert_status_ok();
        let list: Vec<SnapshotSummary> = response.json();
        assert_eq!(list.len(), 2);
    }

    #[tokio::test]
    async fn restoring_unknown_snapshot_is_not_found() {
        let app = setup();

        app.server
            .post("/api/v1/snapshots/nope/restore")
            .await
            .assert_status_not_found();
    }
}

mod health {
    use super::*;

    #[tokio::test]
    async fn heartbeat_makes_project_healthy() {
        let app = setup();

        app.server
            .post("/api/v1/projects/alpha/heartbeat")
            .json(&HeartbeatInput::default())
            .await
            .assert_status(StatusCode::NO_CONTENT);

        let summary: HealthSummary = app.server.get("/api/v1/health").await.json();
        assert_eq!(summary.total_projects, 2);
        assert_eq!(summary.healthy_projects, 1);
        assert_eq!(summary.unhealthy_projects, vec!["beta"]);
    }

    #[tokio::test]
    async fn reports_per_project_status() {
        let app = setup();

        let response = app.server.get("/api/v1/health/projects").await;

        response.assert_status_ok();
        let report: Vec<HealthRecord> = response.json();
        assert_eq!(report.len(), 2);
        assert!(report.iter().all(|r| r.status == HealthStatus::NoHeartbeat));
    }
}

mod events {
    use super::*;

    #[tokio::test]
    async fn returns_newest_first_with_limit() {
        let app = setup();
        app.library_file("bot.py", "x");
        app.server
            .post("/api/v1/assign")
            .json(&assign_input("alpha", "bot.py"))
            .await;
        app.server.delete("/api/v1/projects/alpha/files/bot.py").await;

        let events: Vec<Event> = app.server.get("/api/v1/events").await.json();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].action, EventAction::Remove);

        let events: Vec<Event> = app
            .server
            .get("/api/v1/events")
            .add_query_param("limit", 1)
            .await
            .json();
        assert_eq!(events.len(), 1);
    }
}
