//! Drives a couple of ticks of the scheduler end to end against a real
//! `.fuel/` directory, using `/bin/echo` as a stand-in agent so the spawn
//! path exercises a real child process without depending on any actual
//! coding agent being installed.

use std::time::Duration;

use fuel_core::config::ConfigFile;
use fuel_core::Scheduler;
use fuel_test_utils::{free_port, FuelFixture};

fn toml_config(port: u16) -> String {
    format!(
        r#"
primary = "echo"
consume_port = {port}

[agents.echo]
command = "/bin/echo"
prompt_args = []
max_concurrent = 2
"#
    )
}

#[tokio::test]
async fn tick_spawns_a_ready_task_and_later_marks_it_done() {
    let fixture = FuelFixture::new();
    let task_id = fixture.seed_task("say hello");
    let fuel_dir = fixture.fuel_dir();
    let cwd = fixture.dir.path().to_path_buf();

    let port = free_port();
    let config = ConfigFile::parse(&toml_config(port)).expect("config should parse");
    let mut scheduler = Scheduler::new(fixture.store, config, fuel_dir.clone(), cwd)
        .expect("scheduler should bind its IPC port");

    scheduler.tick().expect("first tick should admit the ready task");

    let store = fuel_store::Store::open(&fuel_dir);
    let task = store.tasks.find(&task_id).expect("task should still exist");
    assert_eq!(task.status, fuel_store::TaskStatus::InProgress);
    assert!(task.consumed);
    assert!(task.consume_pid.is_some());

    // `/bin/echo` exits immediately; poll a few more ticks until the
    // supervisor reaps it and the scheduler marks the task done.
    let mut closed = false;
    for _ in 0..50 {
        scheduler.tick().expect("tick should succeed while draining completions");
        let task = store.tasks.find(&task_id).expect("task should exist");
        if task.status == fuel_store::TaskStatus::Closed {
            closed = true;
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert!(closed, "task should have been closed once the echo process exited");
}

#[tokio::test]
async fn tick_does_not_admit_work_while_paused() {
    let fixture = FuelFixture::new();
    let task_id = fixture.seed_task("should stay open while paused");
    let fuel_dir = fixture.fuel_dir();
    let cwd = fixture.dir.path().to_path_buf();

    let port = free_port();
    let config = ConfigFile::parse(&toml_config(port)).expect("config should parse");
    let mut scheduler = Scheduler::new(fixture.store, config, fuel_dir.clone(), cwd)
        .expect("scheduler should bind its IPC port");

    // Send a Pause over the wire rather than reaching into scheduler
    // internals, exercising the same path an operator command would.
    use std::io::Write as _;
    use std::net::TcpStream;
    let mut stream = TcpStream::connect(("127.0.0.1", port)).expect("should connect to IPC port");
    stream
        .write_all(fuel_core::ipc::codec::encode(&fuel_core::ipc::ClientMessage::Pause).as_bytes())
        .expect("should write pause command");

    // Give the server a moment to accept the connection before ticking.
    tokio::time::sleep(Duration::from_millis(50)).await;
    scheduler.tick().expect("tick should succeed");
    scheduler.tick().expect("tick should succeed");

    let store = fuel_store::Store::open(&fuel_dir);
    let task = store.tasks.find(&task_id).expect("task should still exist");
    assert_eq!(task.status, fuel_store::TaskStatus::Open);
}

#[tokio::test]
async fn failed_task_auto_retries_until_max_attempts_then_stays_stuck() {
    let fixture = FuelFixture::new();
    let task_id = fixture.seed_task("will fail");
    let fuel_dir = fixture.fuel_dir();
    let cwd = fixture.dir.path().to_path_buf();

    let port = free_port();
    let config = ConfigFile::parse(&format!(
        r#"
primary = "broken"
consume_port = {port}

[agents.broken]
command = "/bin/false"
prompt_args = []
max_concurrent = 2
max_attempts = 2
"#
    ))
    .expect("config should parse");
    let mut scheduler = Scheduler::new(fixture.store, config, fuel_dir.clone(), cwd)
        .expect("scheduler should bind its IPC port");

    let store = fuel_store::Store::open(&fuel_dir);

    // First failure: attempts(1) < max_attempts(2), so the scheduler
    // auto-reopens the task rather than leaving it stuck.
    let mut reopened = false;
    for _ in 0..50 {
        scheduler.tick().expect("tick should succeed");
        let task = store.tasks.find(&task_id).expect("task should exist");
        if task.status == fuel_store::TaskStatus::Open {
            reopened = true;
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert!(reopened, "first failure should auto-reopen the task");

    // Second failure: attempts(2) >= max_attempts(2), so it's left
    // in_progress / failed-stuck for an operator to retry.
    let mut stuck = false;
    for _ in 0..50 {
        scheduler.tick().expect("tick should succeed");
        let task = store.tasks.find(&task_id).expect("task should exist");
        if task.status == fuel_store::TaskStatus::InProgress && task.consumed_exit_code == Some(1) {
            stuck = true;
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert!(stuck, "second failure should reach max_attempts and leave the task failed-stuck");

    let runs = store.runs.for_task(&task_id).expect("runs should be readable");
    assert_eq!(runs.len(), 2);
}
