#![cfg(unix)]

use meltsbatch::core::process::{InteractiveProcess, ProcessConfig, ProcessError, ProcessState};
use serial_test::serial;
use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use tempfile::TempDir;
use tracing::Dispatch;

/// Menu loop that echoes every selection and exits on `0`.
const MENU_SCRIPT: &str = r#"#!/bin/sh
echo "args: $*"
echo "MAIN MENU"
while IFS= read -r line; do
  case "$line" in
    0) echo "quitting"; exit 0 ;;
    *) echo "selected $line"; echo "MAIN MENU" ;;
  esac
done
"#;

/// Never goes quiet and ignores SIGTERM.
const CHATTY_SCRIPT: &str = r#"#!/bin/sh
trap '' TERM
while true; do
  echo tick
  sleep 0.1
done
"#;

fn write_script(dir: &Path, name: &str, body: &str) -> PathBuf {
    let path = dir.join(name);
    fs::write(&path, body).unwrap();
    fs::set_permissions(&path, fs::Permissions::from_mode(0o755)).unwrap();
    path
}

fn fast_config(executable: PathBuf, timeout: Duration) -> ProcessConfig {
    ProcessConfig {
        timeout,
        poll_interval: Duration::from_millis(150),
        settle_delay: Duration::from_millis(50),
        grace_period: Duration::from_millis(50),
        ..ProcessConfig::new(executable)
    }
}

#[tokio::test]
#[serial]
async fn test_menu_session_round_trip() {
    let temp_dir = TempDir::new().unwrap();
    let script = write_script(temp_dir.path(), "alphamelts_fake", MENU_SCRIPT);
    let job_dir = temp_dir.path().join("job");

    let mut process = InteractiveProcess::new(
        fast_config(script, Duration::from_secs(20)),
        &job_dir,
        Dispatch::none(),
    )
    .meltsfile("MORB.melts")
    .environment_file("environment.txt");

    process.start().await.unwrap();
    assert!(job_dir.is_dir());
    assert!(process.is_alive());
    assert!(process.pid().is_some());

    process.write(["3", "1", "4"], true, false).await.unwrap();
    assert_eq!(process.state(), ProcessState::Quiescent);

    let output = process.read();
    assert!(output.contains("args: -m MORB.melts -f environment.txt"));
    for selection in ["1", "MORB.melts", "3", "4"] {
        assert!(
            output.contains(&format!("selected {}\n", selection)),
            "missing selection {selection} in {output:?}"
        );
    }
    // Drained queue stays empty until more output arrives.
    assert_eq!(process.read(), "");

    process.terminate().await;
    assert_eq!(process.state(), ProcessState::Terminated);
    assert!(!process.is_alive());
    assert!(!process.timed_out());

    let after = process.write(["4"], false, false).await;
    assert!(matches!(after, Err(ProcessError::Terminated)));

    // Idempotent.
    process.terminate().await;
    assert_eq!(process.state(), ProcessState::Terminated);
}

#[tokio::test]
#[serial]
async fn test_timeout_terminates_chatty_process() {
    let temp_dir = TempDir::new().unwrap();
    let script = write_script(temp_dir.path(), "chatty", CHATTY_SCRIPT);
    let mut process = InteractiveProcess::new(
        fast_config(script, Duration::from_secs(1)),
        temp_dir.path(),
        Dispatch::none(),
    );

    let started = Instant::now();
    process.start().await.unwrap();
    let state = process.wait(Duration::from_millis(200)).await;

    assert_eq!(state, ProcessState::Terminated);
    assert!(process.timed_out());
    assert!(!process.is_alive());
    assert!(started.elapsed() < Duration::from_secs(4));
    assert!(process.read().contains("tick"));

    // Writes after a timeout are skipped rather than failing.
    process.write(["3"], true, false).await.unwrap();
}

#[tokio::test]
#[serial]
async fn test_timeout_terminates_silent_process() {
    let temp_dir = TempDir::new().unwrap();
    let script = write_script(
        temp_dir.path(),
        "silent",
        "#!/bin/sh\ntrap '' TERM\nwhile true; do sleep 0.1; done\n",
    );
    let mut process = InteractiveProcess::new(
        fast_config(script, Duration::from_secs(1)),
        temp_dir.path(),
        Dispatch::none(),
    );
    process.start().await.unwrap();
    tokio::time::sleep(Duration::from_millis(1200)).await;

    // Past the deadline a quiet child is terminated, not reported quiescent.
    let state = process.wait(Duration::from_millis(100)).await;
    assert_eq!(state, ProcessState::Terminated);
    assert!(process.timed_out());
    assert!(!process.is_alive());
}

#[tokio::test]
#[serial]
async fn test_bare_command_name_is_found_on_path() {
    let temp_dir = TempDir::new().unwrap();
    let mut process = InteractiveProcess::new(
        fast_config(PathBuf::from("sh"), Duration::from_secs(5)),
        temp_dir.path(),
        Dispatch::none(),
    );

    process.start().await.unwrap();
    process.write(["echo from-path"], true, false).await.unwrap();
    assert_eq!(process.read(), "from-path\n");

    process.terminate().await;
    assert!(!process.is_alive());
}

#[tokio::test]
#[serial]
async fn test_quiescence_after_output_stops() {
    let temp_dir = TempDir::new().unwrap();
    let script = write_script(
        temp_dir.path(),
        "burst",
        "#!/bin/sh\nfor i in 1 2 3 4 5; do echo line $i; sleep 0.02; done\nread line\n",
    );
    let mut process = InteractiveProcess::new(
        fast_config(script, Duration::from_secs(20)),
        temp_dir.path(),
        Dispatch::none(),
    );
    process.start().await.unwrap();

    let state = process.wait(Duration::from_millis(300)).await;
    assert_eq!(state, ProcessState::Quiescent);
    assert_eq!(
        process.read(),
        "line 1\nline 2\nline 3\nline 4\nline 5\n"
    );
    assert!(process.is_alive());

    process.terminate().await;
    assert!(!process.is_alive());
}

#[tokio::test]
#[serial]
async fn test_stderr_is_kept_separate() {
    let temp_dir = TempDir::new().unwrap();
    let script = write_script(
        temp_dir.path(),
        "noisy",
        "#!/bin/sh\necho out\necho err >&2\nread line\n",
    );
    let mut process = InteractiveProcess::new(
        fast_config(script, Duration::from_secs(20)),
        temp_dir.path(),
        Dispatch::none(),
    );
    process.start().await.unwrap();
    process.wait(Duration::from_millis(200)).await;

    assert_eq!(process.read(), "out\n");
    assert_eq!(process.read_errors(), "err\n");
    process.terminate().await;
}

#[tokio::test]
#[serial]
async fn test_non_executable_file_is_rejected() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("plain.txt");
    fs::write(&path, "not a program").unwrap();
    fs::set_permissions(&path, fs::Permissions::from_mode(0o644)).unwrap();

    let mut process = InteractiveProcess::new(
        ProcessConfig::new(&path),
        temp_dir.path(),
        Dispatch::none(),
    );
    let err = process.start().await.unwrap_err();
    assert!(matches!(err, ProcessError::NotExecutable(_)));
    assert!(!process.is_alive());
}

#[cfg(target_os = "linux")]
#[tokio::test]
#[serial]
async fn test_detached_descendants_are_killed() {
    let Some(setsid) = ["/usr/bin/setsid", "/bin/setsid"]
        .into_iter()
        .find(|path| Path::new(path).exists())
    else {
        return;
    };

    let temp_dir = TempDir::new().unwrap();
    let body = format!(
        "#!/bin/sh\n{} sleep 30 &\necho \"child $!\"\nwhile IFS= read -r line; do\n  [ \"$line\" = 0 ] && exit 0\ndone\n",
        setsid
    );
    let script = write_script(temp_dir.path(), "spawner", &body);
    let mut config = fast_config(script, Duration::from_secs(20));
    config.descendant_pattern = None;

    let mut process = InteractiveProcess::new(config, temp_dir.path(), Dispatch::none());
    process.start().await.unwrap();
    process.wait(Duration::from_millis(200)).await;

    let output = process.read();
    let child: u32 = output
        .lines()
        .find_map(|line| line.strip_prefix("child "))
        .and_then(|pid| pid.trim().parse().ok())
        .expect("spawner reports its child pid");

    process.terminate().await;

    let deadline = Instant::now() + Duration::from_secs(3);
    loop {
        let stat = fs::read_to_string(format!("/proc/{}/stat", child));
        let gone = match stat {
            Err(_) => true,
            Ok(stat) => stat
                .rsplit_once(')')
                .map(|(_, rest)| rest.trim_start().starts_with('Z'))
                .unwrap_or(false),
        };
        if gone {
            break;
        }
        assert!(Instant::now() < deadline, "descendant {child} survived");
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
}
