// ABOUTME: Integration tests for augur-fleet against real processes, sockets and config files.
// ABOUTME: The full start/serve/shutdown path runs once here since registration is per-process.

use augur_fleet::signal::{Delivery, SignalSink};
use augur_fleet::supervisor::ShimCommand;
use augur_fleet::{
    Application, BrokerClient, Config, FleetControl, FleetError, LifecycleController,
    ProcessLocator, ShutdownSequence, SignalBroadcaster, SignalKind, StartOptions,
    WorkerSupervisor, BROKER_SOCKET_VAR,
};
use augur_fleet_core::{FleetMarker, FleetMatcher, ProcessRecord, MARKER_VAR};
use nix::sys::signal::{kill, killpg, Signal};
use nix::unistd::Pid;
use std::io::{BufRead, BufReader, Write};
use std::os::unix::fs::PermissionsExt;
use std::os::unix::process::CommandExt;
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::{NamedTempFile, TempDir};

fn sleeping_shim() -> ShimCommand {
    ShimCommand::new(
        "sh",
        vec!["-c".to_string(), "sleep 30".to_string(), "shim".to_string()],
    )
}

/// Records pids instead of signalling them.
#[derive(Clone, Default)]
struct Recorder(Arc<Mutex<Vec<u32>>>);

impl SignalSink for Recorder {
    fn send(&self, pid: u32, _kind: SignalKind) -> Delivery {
        self.0.lock().unwrap().push(pid);
        Delivery::Delivered
    }
}

fn spawn_marked(marker: &str) -> std::process::Child {
    Command::new("sleep")
        .arg("30")
        .env("VIRTUAL_ENV", marker)
        .stdout(Stdio::null())
        .spawn()
        .unwrap()
}

// ============================================================================
// Config
// ============================================================================

#[test]
fn test_config_file_with_legacy_worker_keys() {
    let mut file = NamedTempFile::new().unwrap();
    writeln!(
        file,
        r#"
[server]
port = 5050

[fleet]
interpreter_tokens = ["augur"]

[workers.repo_collector]
switch = true
workers = 2
port = 5010

[workers.insight_worker]
switch = false
port = 5020
"#
    )
    .unwrap();

    let (config, path) = Config::resolve(Some(file.path())).unwrap();
    assert_eq!(path.as_deref(), Some(file.path()));
    assert_eq!(config.server.port, 5050);
    assert_eq!(config.fleet.interpreter_tokens, vec!["augur"]);

    let specs = config.worker_specs();
    let enabled: Vec<_> = specs.iter().filter(|s| s.enabled).collect();
    assert_eq!(enabled.len(), 1);
    assert_eq!(enabled[0].kind, "repo_collector");
    assert_eq!(
        (0..enabled[0].instances)
            .map(|i| enabled[0].instance_name(i))
            .collect::<Vec<_>>(),
        vec!["repo_collector_0", "repo_collector_1"]
    );
}

#[test]
fn test_missing_explicit_config_is_an_error() {
    let tmp = TempDir::new().unwrap();
    let err = Config::resolve(Some(tmp.path().join("nope.toml").as_path())).unwrap_err();
    assert!(matches!(err, FleetError::ConfigRead { .. }));
}

// ============================================================================
// Process locator against the real process table
// ============================================================================

#[test]
fn test_locator_finds_marked_child_only_for_its_marker() {
    let mine = format!("/tmp/augur-it-venv-{}", std::process::id());
    let theirs = format!("{mine}-other");
    let mut ours = spawn_marked(&mine);
    let mut other = spawn_marked(&theirs);

    let locator = ProcessLocator::new(FleetMatcher::new(FleetMarker::new(&mine), ["sleep"]));
    let pids: Vec<u32> = locator
        .list_fleet_processes()
        .iter()
        .map(|p| p.pid)
        .collect();

    assert!(pids.contains(&ours.id()));
    assert!(!pids.contains(&other.id()));
    assert!(!pids.contains(&std::process::id()));

    ours.kill().unwrap();
    other.kill().unwrap();
    let _ = ours.wait();
    let _ = other.wait();
}

#[test]
fn test_stop_reaches_marked_child() {
    let marker = format!("/tmp/augur-it-stop-{}", std::process::id());
    let mut child = spawn_marked(&marker);

    let control = FleetControl::new(
        ProcessLocator::new(FleetMatcher::new(FleetMarker::new(&marker), ["sleep"])),
        SignalBroadcaster::new(),
    );
    let report = control.broadcast(SignalKind::Terminate);
    assert_eq!(report.delivered, vec![child.id()]);

    let status = child.wait().unwrap();
    assert!(!status.success());

    // Nothing left for a second stop.
    assert_eq!(control.broadcast(SignalKind::Terminate).attempted(), 0);
}

#[test]
fn test_interpreter_tokens_gate_membership() {
    let marker = format!("/tmp/augur-it-tokens-{}", std::process::id());
    let mut child = spawn_marked(&marker);

    let locator = ProcessLocator::new(FleetMatcher::new(FleetMarker::new(&marker), ["python"]));
    let found: Vec<ProcessRecord> = locator.list_fleet_processes();
    assert!(found.iter().all(|p| p.pid != child.id()));

    child.kill().unwrap();
    let _ = child.wait();
}

// ============================================================================
// CLI entry points
// ============================================================================

#[test]
fn test_stop_with_broken_config_still_stops_fleet() {
    let marker = format!("/tmp/augur-it-broken-config-{}", std::process::id());
    std::env::set_var(MARKER_VAR, &marker);

    let mut config = NamedTempFile::new().unwrap();
    write!(config, "[server\nport = ").unwrap();

    // `python` as $0 puts the interpreter token on the command line.
    let mut child = Command::new("sh")
        .args(["-c", "sleep 30; true", "python"])
        .env(MARKER_VAR, &marker)
        .process_group(0)
        .stdout(Stdio::null())
        .spawn()
        .unwrap();
    let group = Pid::from_raw(child.id() as i32);

    let found = augur_fleet::run_processes(Some(config.path())).unwrap();
    assert!(found.iter().any(|p| p.pid == child.id()));

    augur_fleet::run_stop(Some(config.path())).unwrap();
    let status = child.wait().unwrap();
    assert!(!status.success());

    let _ = killpg(group, Signal::SIGKILL);
}

// ============================================================================
// Worker process
// ============================================================================

/// Workers dir plus a bin dir holding a `stub_start` entry point that records its pid.
fn worker_fixture() -> TempDir {
    let tmp = TempDir::new().unwrap();
    std::fs::create_dir_all(tmp.path().join("workers/stub")).unwrap();
    std::fs::create_dir_all(tmp.path().join("bin")).unwrap();

    let script = tmp.path().join("bin/stub_start");
    std::fs::write(&script, "#!/bin/sh\necho $$ > started\nexec sleep 30\n").unwrap();
    std::fs::set_permissions(&script, std::fs::Permissions::from_mode(0o755)).unwrap();
    tmp
}

fn started_file(tmp: &TempDir) -> PathBuf {
    tmp.path().join("workers/stub/started")
}

fn spawn_worker(tmp: &TempDir, instance: usize) -> Child {
    let path = format!(
        "{}:{}",
        tmp.path().join("bin").display(),
        std::env::var("PATH").unwrap_or_default()
    );
    Command::new(env!("CARGO_BIN_EXE_augur"))
        .args(["server", "worker", "--kind", "stub", "--port", "5010"])
        .args(["--instance", &instance.to_string()])
        .arg("--workers-dir")
        .arg(tmp.path().join("workers"))
        .env("PATH", path)
        .env("RUST_LOG", "augur_fleet=debug")
        .env_remove(MARKER_VAR)
        .env_remove(BROKER_SOCKET_VAR)
        .stdout(Stdio::null())
        .stderr(Stdio::piped())
        .spawn()
        .unwrap()
}

/// Block until the worker has its signal handlers in place and is staggering.
fn wait_until_staggering(worker: &mut Child) {
    let stderr = worker.stderr.take().unwrap();
    let mut lines = BufReader::new(stderr).lines();
    let seen = lines.any(|line| line.is_ok_and(|l| l.contains("Waiting before start")));
    assert!(seen, "worker never logged its stagger delay");
    // Keep draining so the worker never blocks on a full pipe.
    std::thread::spawn(move || lines.for_each(drop));
}

fn wait_for_pid_file(path: &Path) -> u32 {
    for _ in 0..250 {
        if let Ok(text) = std::fs::read_to_string(path) {
            if let Ok(pid) = text.trim().parse() {
                return pid;
            }
        }
        std::thread::sleep(Duration::from_millis(20));
    }
    panic!("entry point never started");
}

fn has_exited(pid: u32) -> bool {
    let stat = std::fs::read_to_string(format!("/proc/{pid}/stat")).unwrap_or_default();
    stat.is_empty() || stat.contains(") Z ")
}

#[test]
fn test_worker_forwards_sigterm_to_entry_point() {
    let tmp = worker_fixture();
    let mut worker = spawn_worker(&tmp, 0);
    wait_until_staggering(&mut worker);

    let entry = wait_for_pid_file(&started_file(&tmp));
    assert!(!has_exited(entry));

    kill(Pid::from_raw(worker.id() as i32), Signal::SIGTERM).unwrap();
    let status = worker.wait().unwrap();
    assert!(status.success(), "worker exited with {status}");

    let mut gone = false;
    for _ in 0..250 {
        if has_exited(entry) {
            gone = true;
            break;
        }
        std::thread::sleep(Duration::from_millis(20));
    }
    assert!(gone, "entry point {entry} outlived its worker");
}

#[test]
fn test_staggered_worker_stopped_early_never_starts_entry_point() {
    let tmp = worker_fixture();
    let mut worker = spawn_worker(&tmp, 1);
    wait_until_staggering(&mut worker);

    std::thread::sleep(Duration::from_secs(1));
    assert!(!started_file(&tmp).exists());

    kill(Pid::from_raw(worker.id() as i32), Signal::SIGTERM).unwrap();
    let status = worker.wait().unwrap();
    assert!(status.success(), "worker exited with {status}");
    assert!(!started_file(&tmp).exists());
}

// ============================================================================
// Full lifecycle
// ============================================================================

#[tokio::test]
async fn test_start_serve_and_shutdown() {
    let tmp = TempDir::new().unwrap();
    let socket = tmp.path().join("broker.sock");

    let mut config = Config::default();
    config.broker.socket_path = Some(socket.to_string_lossy().into_owned());
    config.server.command = "sh".to_string();
    config.server.args = vec![
        "-c".to_string(),
        "echo listening on {host}:{port}; sleep 1".to_string(),
    ];
    config.server.working_directory = Some(tmp.path().to_string_lossy().into_owned());
    config.server.log_file = tmp.path().join("logs/server.log").to_string_lossy().into_owned();
    config.workers.insert(
        "repo_collector".to_string(),
        augur_fleet_core::WorkerEntry {
            enabled: true,
            instances: 2,
            port: 5010,
        },
    );

    let recorder = Recorder::default();
    let fleet = FleetControl::new(
        ProcessLocator::new(FleetMatcher::new(
            FleetMarker::new("/nonexistent/augur-it-venv"),
            ["augur"],
        )),
        SignalBroadcaster::with_sink(recorder.clone()),
    );
    let app = Arc::new(Application::new(config, None));
    let controller = LifecycleController::new(
        app.clone(),
        fleet,
        WorkerSupervisor::new(sleeping_shim(), tmp.path().join("workers")),
        StartOptions {
            disable_housekeeper: false,
            skip_cleanup: true,
        },
    );
    let sequence = Arc::clone(controller.shutdown_sequence());

    let serving = tokio::spawn(controller.run());

    // Broker is up while the server runs.
    let mut client = None;
    for _ in 0..50 {
        if let Ok(c) = BrokerClient::connect(&socket).await {
            client = Some(c);
            break;
        }
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
    }
    let mut client = client.expect("broker never came up");
    let workers = client.get("workers").await.unwrap().unwrap();
    assert_eq!(workers["repo_collector"]["instances"], 2);
    drop(client);

    let code = serving.await.unwrap();
    assert_eq!(code, 0);
    assert!(sequence.has_fired());
    assert_eq!(sequence.worker_count(), 0);
    assert!(!socket.exists());
    assert!(recorder.0.lock().unwrap().is_empty());

    let log = std::fs::read_to_string(tmp.path().join("logs/server.log")).unwrap();
    assert!(log.contains("listening on 0.0.0.0:5000"));

    // Registration happens once per process.
    assert!(ShutdownSequence::registered().is_some());
    let again = ShutdownSequence::new(app);
    assert!(matches!(
        again.register(),
        Err(FleetError::ShutdownAlreadyRegistered)
    ));
}
