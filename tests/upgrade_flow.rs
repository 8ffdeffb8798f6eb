//! End-to-end upgrade scenarios against throwaway git repositories, with
//! stub generation scripts standing in for the external coding tool.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use git2::Repository;
use tempfile::{TempDir, tempdir};

use warden::config::{CheckConfig, Config};
use warden::request::{Request, Scope};
use warden::store::TaskStore;
use warden::supervisor::Supervisor;

fn setup_repo() -> TempDir {
    let dir = tempdir().unwrap();
    let repo = Repository::init(dir.path()).unwrap();
    let mut config = repo.config().unwrap();
    config.set_str("user.name", "test").unwrap();
    config.set_str("user.email", "test@test.com").unwrap();
    drop(config);
    fs::write(dir.path().join("app.txt"), "v1\n").unwrap();
    fs::write(dir.path().join("service.sh"), "sleep 30\n").unwrap();
    commit_all(dir.path(), "init");
    dir
}

fn commit_all(dir: &Path, msg: &str) {
    let repo = Repository::open(dir).unwrap();
    let mut index = repo.index().unwrap();
    index
        .add_all(["*"].iter(), git2::IndexAddOption::DEFAULT, None)
        .unwrap();
    index.write().unwrap();
    let tree_id = index.write_tree().unwrap();
    let tree = repo.find_tree(tree_id).unwrap();
    let sig = git2::Signature::now("test", "test@test.com").unwrap();
    if let Ok(head) = repo.head() {
        let parent = head.peel_to_commit().unwrap();
        repo.commit(Some("HEAD"), &sig, &sig, msg, &tree, &[&parent])
            .unwrap();
    } else {
        repo.commit(Some("HEAD"), &sig, &sig, msg, &tree, &[])
            .unwrap();
    }
}

fn create_script(dir: &Path, name: &str, content: &str) -> PathBuf {
    let path = dir.join(name);
    fs::write(&path, content).unwrap();
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let mut perms = fs::metadata(&path).unwrap().permissions();
        perms.set_mode(0o755);
        fs::set_permissions(&path, perms).unwrap();
    }
    path
}

/// Fast-cycle config: short grace periods, stub generation, trivial checks.
fn test_config(repo: &Path, workspace: &Path, generate: &Path) -> Config {
    let mut config = Config::defaults(repo.to_path_buf());
    config.workspace = workspace.to_path_buf();
    config.service_command = "sh service.sh".to_string();
    config.health_grace = Duration::from_millis(200);
    config.stop_grace = Duration::from_millis(500);
    config.build_deadline = Duration::from_secs(30);
    config.generate_program = generate.to_string_lossy().into_owned();
    config.generate_args = Vec::new();
    config.checks = vec![CheckConfig {
        name: "smoke".to_string(),
        command: vec!["true".to_string()],
    }];
    config
}

fn task_log(workspace: &Path, id: &str) -> String {
    let store = TaskStore::open(workspace).unwrap();
    fs::read_to_string(store.task_log(id)).unwrap()
}

#[tokio::test]
async fn scenario_a_happy_path_deploys_and_restarts() {
    let repo = setup_repo();
    let ws = tempdir().unwrap();
    let scripts = tempdir().unwrap();
    let generate = create_script(
        scripts.path(),
        "generate.sh",
        "#!/bin/sh\nprintf 'tweak\\n' >> app.txt\n",
    );
    let config = test_config(repo.path(), ws.path(), &generate);
    let mut sup = Supervisor::new(config).unwrap();

    // Service is already up before the request arrives.
    assert!(sup.ensure_service().await);
    let store = TaskStore::open(ws.path()).unwrap();
    let old_pid = fs::read_to_string(store.service_pid_file()).unwrap();

    let req = Request::new("bump timeout", "append a tweak", Scope::Core, "tester");
    sup.submit(&req).unwrap();
    assert!(sup.poll_once().await.unwrap());

    let log = task_log(ws.path(), &req.id);
    assert!(log.contains("Status: SUCCESS"), "log was:\n{log}");
    assert!(log.contains("cutover complete"));

    // Patch artifacts persist for forensics.
    assert!(store.forward_patch(&req.id).exists());
    assert!(store.rollback_patch(&req.id).exists());

    // The change landed on the live tree and a fresh service instance
    // replaced the pre-deploy one.
    let live = fs::read_to_string(repo.path().join("app.txt")).unwrap();
    assert!(live.contains("tweak"));
    assert!(sup.status().unwrap().service_running);
    let new_pid = fs::read_to_string(store.service_pid_file()).unwrap();
    assert_ne!(new_pid, old_pid);

    // Sandbox torn down.
    assert!(fs::read_dir(&store.sandboxes).unwrap().next().is_none());
}

#[tokio::test]
async fn scenario_b_health_failure_rolls_back() {
    let repo = setup_repo();
    let ws = tempdir().unwrap();
    let scripts = tempdir().unwrap();
    // The "upgrade" breaks the service start script.
    let generate = create_script(
        scripts.path(),
        "generate.sh",
        "#!/bin/sh\nprintf 'exit 1\\n' > service.sh\n",
    );
    let config = test_config(repo.path(), ws.path(), &generate);
    let mut sup = Supervisor::new(config).unwrap();

    let req = Request::new("break the service", "sabotage", Scope::Core, "tester");
    sup.submit(&req).unwrap();
    assert!(sup.poll_once().await.unwrap());

    let log = task_log(ws.path(), &req.id);
    assert!(log.contains("Status: FAILED"), "log was:\n{log}");
    assert!(log.contains("failed health check"));
    assert!(log.contains("Rollback succeeded"));

    // The live tree is byte-identical to its pre-deploy content.
    let restored = fs::read_to_string(repo.path().join("service.sh")).unwrap();
    assert_eq!(restored, "sleep 30\n");

    // The restored service is running again.
    assert!(sup.status().unwrap().service_running);
}

#[tokio::test]
async fn scenario_c_one_task_per_polling_cycle() {
    let repo = setup_repo();
    let ws = tempdir().unwrap();
    let scripts = tempdir().unwrap();
    let generate = create_script(scripts.path(), "generate.sh", "#!/bin/sh\ntrue\n");
    let config = test_config(repo.path(), ws.path(), &generate);
    let mut sup = Supervisor::new(config).unwrap();

    // Skill-scoped requests are cheap: rejected without sandboxing.
    let first = Request::new("first", "p", Scope::Skill, "tester");
    let second = Request::new("second", "p", Scope::Skill, "tester");
    sup.submit(&first).unwrap();
    sup.submit(&second).unwrap();

    assert!(sup.poll_once().await.unwrap());

    let logs = [
        task_log(ws.path(), &first.id),
        task_log(ws.path(), &second.id),
    ];
    let still_queued = logs.iter().filter(|l| l.contains("Status: QUEUED")).count();
    let rejected = logs
        .iter()
        .filter(|l| l.contains("Status: REJECTED"))
        .count();
    assert_eq!(still_queued, 1);
    assert_eq!(rejected, 1);
    assert_eq!(sup.status().unwrap().pending_tasks, 1);
}

#[tokio::test]
async fn skill_scope_rejected_without_sandbox_or_patches() {
    let repo = setup_repo();
    let ws = tempdir().unwrap();
    let scripts = tempdir().unwrap();
    let generate = create_script(scripts.path(), "generate.sh", "#!/bin/sh\ntrue\n");
    let config = test_config(repo.path(), ws.path(), &generate);
    let mut sup = Supervisor::new(config).unwrap();

    let req = Request::new("install a skill", "p", Scope::Skill, "tester");
    sup.submit(&req).unwrap();
    sup.poll_once().await.unwrap();

    let log = task_log(ws.path(), &req.id);
    assert!(log.contains("Status: REJECTED"));

    let store = TaskStore::open(ws.path()).unwrap();
    assert!(fs::read_dir(&store.sandboxes).unwrap().next().is_none());
    assert!(fs::read_dir(&store.backups).unwrap().next().is_none());
}

#[tokio::test]
async fn dirty_live_tree_fails_before_sandboxing() {
    let repo = setup_repo();
    fs::write(repo.path().join("uncommitted.txt"), "wip\n").unwrap();
    let ws = tempdir().unwrap();
    let scripts = tempdir().unwrap();
    let generate = create_script(scripts.path(), "generate.sh", "#!/bin/sh\ntrue\n");
    let config = test_config(repo.path(), ws.path(), &generate);
    let mut sup = Supervisor::new(config).unwrap();

    let req = Request::new("blocked", "p", Scope::Core, "tester");
    sup.submit(&req).unwrap();
    sup.poll_once().await.unwrap();

    let log = task_log(ws.path(), &req.id);
    assert!(log.contains("Status: FAILED"));
    assert!(log.contains("not clean"));
    assert!(log.contains("uncommitted.txt"));

    let store = TaskStore::open(ws.path()).unwrap();
    assert!(fs::read_dir(&store.sandboxes).unwrap().next().is_none());
}

#[tokio::test]
async fn verification_failure_leaves_live_tree_untouched() {
    let repo = setup_repo();
    let ws = tempdir().unwrap();
    let scripts = tempdir().unwrap();
    let generate = create_script(
        scripts.path(),
        "generate.sh",
        "#!/bin/sh\nprintf 'candidate\\n' >> app.txt\n",
    );
    let mut config = test_config(repo.path(), ws.path(), &generate);
    config.build_deadline = Duration::from_millis(400);
    config.checks = vec![CheckConfig {
        name: "always-red".to_string(),
        command: vec!["false".to_string()],
    }];
    let mut sup = Supervisor::new(config).unwrap();

    let req = Request::new("never verifies", "p", Scope::Core, "tester");
    sup.submit(&req).unwrap();
    sup.poll_once().await.unwrap();

    let log = task_log(ws.path(), &req.id);
    assert!(log.contains("Status: FAILED"));
    assert!(log.contains("exceeded before successful verification"));

    // No live-tree mutation and no deploy artifacts.
    let live = fs::read_to_string(repo.path().join("app.txt")).unwrap();
    assert_eq!(live, "v1\n");
    let store = TaskStore::open(ws.path()).unwrap();
    assert!(!store.forward_patch(&req.id).exists());
}

#[tokio::test]
async fn empty_diff_refuses_deploy() {
    let repo = setup_repo();
    let ws = tempdir().unwrap();
    let scripts = tempdir().unwrap();
    // Generation succeeds but changes nothing.
    let generate = create_script(scripts.path(), "generate.sh", "#!/bin/sh\ntrue\n");
    let config = test_config(repo.path(), ws.path(), &generate);
    let mut sup = Supervisor::new(config).unwrap();

    let req = Request::new("no-op", "p", Scope::Core, "tester");
    sup.submit(&req).unwrap();
    sup.poll_once().await.unwrap();

    let log = task_log(ws.path(), &req.id);
    assert!(log.contains("Status: FAILED"));
    assert!(log.contains("No code changes were produced."));

    let store = TaskStore::open(ws.path()).unwrap();
    assert!(!store.forward_patch(&req.id).exists());
}

#[tokio::test]
async fn rollback_start_failure_flags_manual_intervention() {
    let repo = setup_repo();
    // The pre-deploy service is already broken, so the rollback's restart
    // cannot succeed either.
    fs::write(repo.path().join("service.sh"), "exit 1\n").unwrap();
    commit_all(repo.path(), "broken service");
    let ws = tempdir().unwrap();
    let scripts = tempdir().unwrap();
    let generate = create_script(
        scripts.path(),
        "generate.sh",
        "#!/bin/sh\nprintf 'exit 2\\n' > service.sh\n",
    );
    let config = test_config(repo.path(), ws.path(), &generate);
    let mut sup = Supervisor::new(config).unwrap();

    let req = Request::new("doubly broken", "p", Scope::Core, "tester");
    sup.submit(&req).unwrap();
    assert!(sup.poll_once().await.unwrap());

    let log = task_log(ws.path(), &req.id);
    assert!(log.contains("Status: FAILED"), "log was:\n{log}");
    assert!(log.contains("failed health check"));
    assert!(log.contains("manual intervention needed"));

    // The reverse apply still ran: the live tree holds the pre-deploy
    // content even though no service could be started from it.
    let restored = fs::read_to_string(repo.path().join("service.sh")).unwrap();
    assert_eq!(restored, "exit 1\n");
    assert!(!sup.status().unwrap().service_running);
}

#[tokio::test]
async fn status_write_failure_still_pops_queue() {
    let repo = setup_repo();
    let ws = tempdir().unwrap();
    let scripts = tempdir().unwrap();
    let generate = create_script(scripts.path(), "generate.sh", "#!/bin/sh\ntrue\n");
    let config = test_config(repo.path(), ws.path(), &generate);
    let mut sup = Supervisor::new(config).unwrap();

    let req = Request::new("wedged log dir", "p", Scope::Skill, "tester");
    let entry = sup.submit(&req).unwrap();

    // Clobber the task log directory so every status write fails.
    let store = TaskStore::open(ws.path()).unwrap();
    fs::remove_dir_all(&store.tasks).unwrap();
    fs::write(&store.tasks, "not a directory").unwrap();

    // The entry is consumed anyway: one attempt per submission even when
    // the outcome cannot be recorded.
    assert!(sup.poll_once().await.unwrap());
    assert!(!entry.exists());
    assert!(!sup.poll_once().await.unwrap());
}

#[tokio::test]
async fn queue_entry_removed_after_terminal_status() {
    let repo = setup_repo();
    let ws = tempdir().unwrap();
    let scripts = tempdir().unwrap();
    let generate = create_script(scripts.path(), "generate.sh", "#!/bin/sh\ntrue\n");
    let config = test_config(repo.path(), ws.path(), &generate);
    let mut sup = Supervisor::new(config).unwrap();

    let req = Request::new("done once", "p", Scope::Skill, "tester");
    let entry = sup.submit(&req).unwrap();
    assert!(entry.exists());
    sup.poll_once().await.unwrap();
    assert!(!entry.exists());
    // A second cycle finds nothing: at most one attempt per submission.
    assert!(!sup.poll_once().await.unwrap());
}
