use std::process::Command;

fn cybertank() -> Command {
    let mut cmd = Command::new(env!("CARGO_BIN_EXE_cybertank"));
    cmd.env("CYBERTANK_LOG", "off");
    cmd
}

#[test]
fn test_local_match_prints_turns() {
    let output = cybertank()
        .args(["local", "--turns", "3", "--bot", "fixture"])
        .output()
        .expect("failed to run cybertank");
    assert!(output.status.success());
    let stdout = String::from_utf8(output.stdout).expect("non utf8 output");
    assert!(stdout.contains("started Debug as rustbot"));
    assert_eq!(stdout.matches("(1, 0)").count(), 3);
}

#[test]
fn test_local_match_with_seed_is_reproducible() {
    let run = || {
        cybertank()
            .args(["local", "--turns", "5", "--seed", "99"])
            .output()
            .expect("failed to run cybertank")
            .stdout
    };
    assert_eq!(run(), run());
}

#[test]
fn test_unknown_mode_is_rejected() {
    let output = cybertank()
        .args(["play", "--mode", "practice"])
        .output()
        .expect("failed to run cybertank");
    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("practice"));
}

#[test]
fn test_play_reports_connection_failure() {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let output = cybertank()
        .args([
            "play",
            "--server",
            &format!("http://{}", addr),
            "--skip-negotiation",
            "--mode",
            "debug-timeout",
        ])
        .output()
        .expect("failed to run cybertank");
    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("connection failed"));
}
