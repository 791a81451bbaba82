//! Exercises the Master's startup-crash guard (spec.md §4.5 step 2d /
//! `D_start`): a worker generation that dies immediately after
//! inheriting its fds must cause the whole process tree to exit with a
//! failure, rather than spin-restarting forever.

use std::process::{Command, Stdio};
use std::time::Duration;

#[test]
fn worker_crash_within_startup_threshold_is_fatal() {
    let exe = env!("CARGO_BIN_EXE_zerodown-demo");
    let mut command = Command::new(exe);
    command
        .env("ZERODOWN_DEMO_TCP_PORT", "17072")
        .env("ZERODOWN_DEMO_UNIX_PATH", "/tmp/zerodown-echo-demo-17072.sock")
        .env("ZERODOWN_DEMO_CRASH_ON_INHERIT", "1")
        .stdout(Stdio::null())
        .stderr(Stdio::inherit());

    let mut child = command.spawn().expect("failed to spawn zerodown-demo");

    let deadline = std::time::Instant::now() + Duration::from_secs(5);
    let status = loop {
        if let Some(status) = child.try_wait().expect("failed to poll child") {
            break status;
        }
        if std::time::Instant::now() >= deadline {
            let _ = child.kill();
            panic!("master did not exit after its worker crashed on startup");
        }
        std::thread::sleep(Duration::from_millis(50));
    };

    assert!(
        !status.success(),
        "master should exit with failure after a startup-threshold worker crash"
    );
}
