//! End-to-end runs of the `oss` and `worker` binaries against real
//! processes and a real shared memory clock.

use nix::errno::Errno;
use nix::sys::signal::{kill, Signal};
use nix::unistd::Pid;
use oss_env::{ClockStore, OwnedClockRegion, SharedRegion};
use std::collections::BTreeSet;
use std::io::{BufRead, BufReader, Read};
use std::process::{Child, Command, ExitStatus, Stdio};
use std::thread::sleep;
use std::time::{Duration, Instant};

/// Distinct per test and per test process so parallel runs never share a clock.
fn unique_key(offset: i32) -> i32 {
    0x00AB_0000 | ((std::process::id() as i32 & 0xfff) << 4) | offset
}

fn oss(key: i32, extra: &[&str]) -> Command {
    let mut cmd = Command::new(env!("CARGO_BIN_EXE_oss"));
    cmd.args(extra)
        .args(["--key", &key.to_string(), "--worker", env!("CARGO_BIN_EXE_worker")])
        .stdout(Stdio::piped())
        .stderr(Stdio::null());
    cmd
}

fn wait_with_timeout(child: &mut Child, timeout: Duration) -> ExitStatus {
    let started = Instant::now();
    loop {
        if let Some(status) = child.try_wait().unwrap() {
            return status;
        }
        if started.elapsed() > timeout {
            let _ = child.kill();
            panic!("process did not exit within {:?}", timeout);
        }
        sleep(Duration::from_millis(20));
    }
}

fn stdout_of(child: &mut Child) -> String {
    let mut out = String::new();
    child.stdout.take().unwrap().read_to_string(&mut out).unwrap();
    out
}

/// Pids listed as occupied in any printed process table.
fn table_pids(stdout: &str) -> BTreeSet<i32> {
    stdout
        .lines()
        .filter_map(|line| {
            let cols: Vec<&str> = line.split_whitespace().collect();
            match cols.as_slice() {
                [entry, "1", pid, _, _] if entry.parse::<usize>().is_ok() => pid.parse().ok(),
                _ => None,
            }
        })
        .collect()
}

#[test]
fn test_help_exits_zero() {
    let status = Command::new(env!("CARGO_BIN_EXE_oss"))
        .arg("-h")
        .stdout(Stdio::null())
        .status()
        .unwrap();
    assert!(status.success());
}

#[test]
fn test_bad_arguments_exit_one() {
    let cases: [&[&str]; 4] = [
        &["-n", "3", "-s", "2", "-t", "2"],
        &["-n", "0", "-s", "2", "-t", "2", "-i", "10"],
        &["-n", "3", "-s", "2", "-t", "2", "-i", "-5"],
        &["-n", "3", "-s", "2", "-t", "2", "-i", "10", "extra"],
    ];
    for args in cases {
        let status = Command::new(env!("CARGO_BIN_EXE_oss"))
            .args(args)
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .unwrap();
        assert_eq!(status.code(), Some(1), "args {:?}", args);
    }
}

#[test]
fn test_worker_rejects_bad_lifetimes() {
    for args in [&["0", "5"][..], &["1"][..], &["1", "0"][..]] {
        let status = Command::new(env!("CARGO_BIN_EXE_worker"))
            .args(args)
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .unwrap();
        assert_eq!(status.code(), Some(1), "args {:?}", args);
    }
}

#[test]
fn test_worker_without_clock_exits_one() {
    let key = unique_key(1);
    let status = Command::new(env!("CARGO_BIN_EXE_worker"))
        .args(["1", "1", "--key", &key.to_string()])
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .unwrap();
    assert_eq!(status.code(), Some(1));
}

#[test]
fn test_run_to_completion() {
    let key = unique_key(2);
    let mut child = oss(key, &["-n", "3", "-s", "2", "-t", "1", "-i", "50", "--seed", "7"])
        .spawn()
        .unwrap();

    let status = wait_with_timeout(&mut child, Duration::from_secs(30));
    let stdout = stdout_of(&mut child);
    assert!(status.success());

    assert!(stdout.contains("OSS PID:"));
    assert!(stdout.contains("Process Table:"));
    assert_eq!(stdout.matches("--Just Starting").count(), 3);
    assert_eq!(stdout.matches("--Terminating").count(), 3);
    assert!(!SharedRegion::exists(key));
}

#[test]
fn test_sigint_stops_workers_and_removes_clock() {
    let key = unique_key(3);
    let mut child = oss(key, &["-n", "4", "-s", "2", "-t", "30", "-i", "0"])
        .spawn()
        .unwrap();

    // Let the clock region appear and the first workers launch.
    let started = Instant::now();
    while !SharedRegion::exists(key) && started.elapsed() < Duration::from_secs(10) {
        sleep(Duration::from_millis(20));
    }
    sleep(Duration::from_millis(1500));

    kill(Pid::from_raw(child.id() as i32), Signal::SIGINT).unwrap();
    let status = wait_with_timeout(&mut child, Duration::from_secs(15));
    let stdout = stdout_of(&mut child);
    assert!(status.success());

    let pids = table_pids(&stdout);
    assert!(!pids.is_empty(), "no workers appeared in:\n{}", stdout);
    for pid in pids {
        assert_eq!(kill(Pid::from_raw(pid), None::<Signal>), Err(Errno::ESRCH), "worker {} survived", pid);
    }
    assert!(!SharedRegion::exists(key));
}

#[test]
fn test_worker_detaches_on_sigterm() {
    let key = unique_key(4);
    let mut clock = OwnedClockRegion::create(key).unwrap();

    let mut worker = Command::new(env!("CARGO_BIN_EXE_worker"))
        .args(["30", "1", "--key", &key.to_string()])
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()
        .unwrap();

    // Handlers are installed before the first line is printed.
    let mut lines = BufReader::new(worker.stdout.take().unwrap()).lines();
    let mut started = false;
    for line in lines.by_ref() {
        if line.unwrap() == "--Just Starting" {
            started = true;
            break;
        }
    }
    assert!(started);

    kill(Pid::from_raw(worker.id() as i32), Signal::SIGTERM).unwrap();
    let status = wait_with_timeout(&mut worker, Duration::from_secs(10));
    assert!(status.success(), "worker exited with {:?}", status);

    // The worker left the lock free: releasing does not time out.
    clock.release().unwrap();
    assert!(!SharedRegion::exists(key));
}
