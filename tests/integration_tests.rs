use std::fs;
use std::path::Path;
use std::process::{Command, Output};
use std::str;

fn p2p_bench(args: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_p2p-bench"))
        .args(args)
        .output()
        .expect("Failed to execute p2p-bench")
}

fn write_series(path: &Path, lines: &[&str]) {
    let mut content = lines.join("\n");
    content.push('\n');
    fs::write(path, content).expect("Failed to write metrics fixture");
}

#[test]
fn test_report_table_compares_series() {
    let dir = tempfile::tempdir().unwrap();
    let tcp = dir.path().join("metrics_dial_tcp_c1_s5.csv");
    let ws = dir.path().join("metrics_dial_websocket_c1_s5.csv");

    write_series(
        &tcp,
        &[
            "1700000000000,5,10,1048576,1024,2048",
            "1700000001000,5,20,3145728,3072,2048",
            "1700000002000,3,90,9437184,9216,9216",
        ],
    );
    write_series(&ws, &["1700000000000,5,40,2097152,512,512"]);

    let output = p2p_bench(&[
        "report",
        "-s",
        "5",
        tcp.to_str().unwrap(),
        ws.to_str().unwrap(),
    ]);
    let stdout = str::from_utf8(&output.stdout).unwrap_or("");
    let stderr = str::from_utf8(&output.stderr).unwrap_or("");

    assert!(
        output.status.success(),
        "Command failed with status: {:?}\nSTDOUT: {}\nSTDERR: {}",
        output.status.code(),
        stdout,
        stderr
    );

    let lines: Vec<&str> = stdout.lines().collect();
    assert_eq!(lines.len(), 18, "unexpected table:\n{}", stdout);
    assert!(lines[0].contains(" metrics_dial_tcp_c1_s5.csv |"));
    assert!(lines[0].contains(" metrics_dial_websocket_c1_s5.csv |"));
    assert!(lines[2].contains("**CPU (%)**"));

    // Only the two records at 5 active streams count for the tcp series
    let tcp_width = "metrics_dial_tcp_c1_s5.csv".len() + 2;
    let cpu_avg = lines[5];
    assert!(cpu_avg.trim_start_matches('|').trim_start().starts_with("avg"));
    assert!(cpu_avg.contains(&format!("|{:>width$}|", 15, width = tcp_width)));

    let memory_max = lines[8];
    assert!(memory_max.contains(&format!("|{:>width$}|", "3.000", width = tcp_width)));
}

#[test]
fn test_report_json_output() {
    let dir = tempfile::tempdir().unwrap();
    let run = dir.path().join("run.csv");
    write_series(&run, &["1,1,7,1024,2048,4096", "2,1,9,1024,2048,4096"]);

    let output = p2p_bench(&["report", "--format", "json", run.to_str().unwrap()]);
    assert!(output.status.success());

    let json: serde_json::Value =
        serde_json::from_slice(&output.stdout).expect("report output should be JSON");
    assert_eq!(json["run.csv"]["samples"], 2);
    assert_eq!(json["run.csv"]["cpu"]["min"], 7);
    assert_eq!(json["run.csv"]["cpu"]["avg"], 8);
    assert_eq!(json["run.csv"]["bytes_written"]["max"], 4096);
}

#[test]
fn test_report_fails_on_malformed_source() {
    let dir = tempfile::tempdir().unwrap();
    let bad = dir.path().join("bad.csv");
    write_series(&bad, &["1,1,1,1,1,1", "2,1,not-a-number,1,1,1"]);

    let output = p2p_bench(&["report", bad.to_str().unwrap()]);
    let stderr = str::from_utf8(&output.stderr).unwrap_or("");

    assert_eq!(output.status.code(), Some(1));
    assert!(output.stdout.is_empty());
    assert!(stderr.contains("Malformed record #1"), "stderr: {}", stderr);
}

#[test]
fn test_report_requires_sources() {
    let output = p2p_bench(&["report"]);
    assert_eq!(output.status.code(), Some(1));
}

#[test]
fn test_dial_with_bad_address_fails_at_startup() {
    let output = p2p_bench(&["dial", "/ip4/127.0.0.1/udp/9999/quic"]);
    let stderr = str::from_utf8(&output.stderr).unwrap_or("");

    assert_eq!(output.status.code(), Some(1));
    assert!(stderr.contains("Startup failure"), "stderr: {}", stderr);
}

#[test]
fn test_listen_with_unavailable_transport_fails() {
    let output = p2p_bench(&["-t", "webrtc", "-l", "0", "listen"]);
    let stderr = str::from_utf8(&output.stderr).unwrap_or("");

    assert_eq!(output.status.code(), Some(1));
    assert!(stderr.contains("not available"), "stderr: {}", stderr);
}

#[test]
fn test_listen_runs_for_duration_and_writes_csv() {
    let dir = tempfile::tempdir().unwrap();
    let csv = dir.path().join("listen.csv");

    let output = p2p_bench(&[
        "listen",
        "-l",
        "0",
        "--insecure",
        "--interval",
        "100ms",
        "--metrics",
        csv.to_str().unwrap(),
        "-d",
        "1s",
    ]);
    let stderr = str::from_utf8(&output.stderr).unwrap_or("");

    assert!(output.status.success(), "stderr: {}", stderr);
    assert!(stderr.contains("listener: my address: /ip4/127.0.0.1/tcp/"));

    let content = fs::read_to_string(&csv).unwrap();
    let rows: Vec<&str> = content.lines().collect();
    assert!(!rows.is_empty());
    for row in rows {
        let fields: Vec<&str> = row.split(',').collect();
        assert_eq!(fields.len(), 6, "bad row: {}", row);
        assert_eq!(fields[1], "0");
    }
}
