use std::process::Command;

#[test]
fn sim_binary_smoke() {
    let output = Command::new(env!("CARGO_BIN_EXE_sim"))
        .args(["42", "4"])
        .output()
        .expect("failed to run sim binary");
    assert!(output.status.success());
    let stdout = String::from_utf8(output.stdout).expect("non utf8 output");
    let v: serde_json::Value = serde_json::from_str(stdout.trim()).expect("invalid json");
    assert_eq!(v["start_verb"], "Debug");
    assert_eq!(v["player"], "sim");
    assert_eq!(v["occupied"], 20);
    assert_eq!(v["steps"].as_array().map(Vec::len), Some(4));
    assert_eq!(v["state"], "closed");
    assert_eq!(v["close_reason"], "match over");
    assert_eq!(v["transport_stops"], 1);
}

#[test]
fn sim_binary_is_reproducible() {
    let run = || {
        Command::new(env!("CARGO_BIN_EXE_sim"))
            .args(["7", "6"])
            .output()
            .expect("failed to run sim binary")
            .stdout
    };
    assert_eq!(run(), run());
}

#[test]
fn sim_binary_rejects_bad_args() {
    let output = Command::new(env!("CARGO_BIN_EXE_sim"))
        .arg("1")
        .output()
        .expect("failed to run sim binary");
    assert!(!output.status.success());
}
