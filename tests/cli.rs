use base64::Engine;
use std::fs;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::process::Command;
use tempfile::TempDir;

const PNG: [u8; 8] = [0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A];
const GIF: &[u8] = b"GIF89a\x01\x00\x01\x00";

fn scrollback_binary() -> PathBuf {
    let mut path = std::env::current_exe().unwrap();
    path.pop(); // remove test binary name
    path.pop(); // remove deps/
    path.push("scrollback");
    path
}

fn setup_test_env(max_records: usize) -> (TempDir, PathBuf, PathBuf) {
    let tmp = TempDir::new().unwrap();
    let root = tmp.path().to_path_buf();

    let config_dir = root.join("config");
    fs::create_dir_all(&config_dir).unwrap();
    let chat_dir = root.join("chat");
    fs::create_dir_all(chat_dir.join("cache")).unwrap();
    fs::write(chat_dir.join("cache/p1.png"), PNG).unwrap();

    let thumbnail = base64::engine::general_purpose::STANDARD.encode(GIF);
    let mut items = vec![
        serde_json::json!({ "kind": "day", "label": "January 10, 2024" }),
        serde_json::json!({ "kind": "service", "text": "Alice created the group" }),
    ];
    for n in 1..=12 {
        let outgoing = n % 3 == 0;
        let sender = if outgoing {
            serde_json::Value::Null
        } else {
            serde_json::Value::from("Alice")
        };
        let mut item = serde_json::json!({
            "kind": "message",
            "id": format!("m{}", n),
            "outgoing": outgoing,
            "sender": sender,
            "time": format!("10:{:02}", n),
            "text": format!("message number {}", n),
        });
        match n {
            2 => item["media"] = serde_json::json!({ "handle": "p1", "cache": "cache/p1.png" }),
            5 => item["media"] = serde_json::json!({ "handle": "p2", "thumbnail": thumbnail }),
            8 => {
                item["media"] = serde_json::json!({ "handle": "p3", "url": "photos/missing.jpg" })
            }
            _ => {}
        }
        if n == 7 {
            item["reply"] = serde_json::json!({ "sender": "Alice", "text": "message number 6" });
        }
        items.push(item);
    }
    let transcript = serde_json::json!({
        "title": "Team chat",
        "view": { "visible": 400, "item_height": 80, "page_size": 5 },
        "items": items,
    });
    let transcript_path = chat_dir.join("chat.json");
    fs::write(&transcript_path, serde_json::to_string_pretty(&transcript).unwrap()).unwrap();

    let config_content = format!(
        r#"[export]
max_records_per_chunk = {}
max_media_per_chunk = 40
scroll_step_delay_ms = 0
media_acquire_timeout_ms = 2000

[scroll]
settle_delay_ms = 0

[media]
disabled_strategies = ["full-view"]

[output]
dir = "{}/exports"
format = "markdown"
"#,
        max_records,
        root.display()
    );
    let config_path = config_dir.join("scrollback.toml");
    fs::write(&config_path, config_content).unwrap();

    (tmp, config_path, transcript_path)
}

fn run_scrollback(config_path: &Path, args: &[&str]) -> (String, String, bool) {
    let binary = scrollback_binary();
    let output = Command::new(&binary)
        .arg("--config")
        .arg(config_path.to_str().unwrap())
        .args(args)
        .output()
        .unwrap_or_else(|e| panic!("Failed to run scrollback binary at {:?}: {}", binary, e));

    let stdout = String::from_utf8_lossy(&output.stdout).to_string();
    let stderr = String::from_utf8_lossy(&output.stderr).to_string();
    let success = output.status.success();
    (stdout, stderr, success)
}

fn read_zip(path: &Path) -> Vec<(String, String)> {
    let bytes = fs::read(path).unwrap();
    let mut archive = zip::ZipArchive::new(std::io::Cursor::new(bytes)).unwrap();
    (0..archive.len())
        .map(|i| {
            let mut entry = archive.by_index(i).unwrap();
            let mut body = String::new();
            entry.read_to_string(&mut body).unwrap();
            (entry.name().to_string(), body)
        })
        .collect()
}

#[test]
fn test_export_multiple_parts_zipped() {
    let (tmp, config_path, transcript) = setup_test_env(5);

    let (stdout, stderr, success) = run_scrollback(
        &config_path,
        &["export", transcript.to_str().unwrap(), "--progress", "off"],
    );
    assert!(success, "export failed: {}", stderr);
    assert!(stdout.contains("Export complete: 12 messages, 2 images, 3 part(s)"), "{}", stdout);
    assert!(stdout.contains("images unavailable: 1"), "{}", stdout);
    assert!(stdout.contains("items skipped:      1"), "{}", stdout);

    let zip_path = tmp.path().join("exports/Team_chat_export.zip");
    assert!(zip_path.exists(), "missing {}", zip_path.display());
    let entries = read_zip(&zip_path);
    let names: Vec<&str> = entries.iter().map(|(n, _)| n.as_str()).collect();
    assert_eq!(
        names,
        vec!["Team_chat_part1.md", "Team_chat_part2.md", "Team_chat_part3.md"]
    );

    let all: String = entries.iter().map(|(_, b)| b.as_str()).collect();
    for n in 1..=12 {
        assert_eq!(
            all.matches(&format!("message number {}  \n", n)).count(),
            1,
            "message {} not exported exactly once",
            n
        );
    }
    let first = all.find("message number 1  ").unwrap();
    let last = all.find("message number 12  ").unwrap();
    assert!(first < last);

    assert!(all.contains("### January 10, 2024"));
    assert!(all.contains("**[10:03] Me:**"));
    assert!(all.contains("> ↪ Alice: message number 6"));
    assert!(all.contains("![image](data:image/png;base64,"));
    assert!(all.contains("![image](data:image/gif;base64,"));
    assert!(all.contains("*[image unavailable: not found]* [original](file://"));
    assert!(entries[2].1.contains("part 3 of 3"));
}

#[test]
fn test_export_single_json_document() {
    let (tmp, config_path, transcript) = setup_test_env(100);

    let (stdout, stderr, success) = run_scrollback(
        &config_path,
        &[
            "export",
            transcript.to_str().unwrap(),
            "--format",
            "json",
            "--quality",
            "reduced",
            "--progress",
            "off",
        ],
    );
    assert!(success, "export failed: {}", stderr);
    assert!(stdout.contains("1 part(s)"), "{}", stdout);

    let path = tmp.path().join("exports/Team_chat.json");
    let value: serde_json::Value = serde_json::from_slice(&fs::read(&path).unwrap()).unwrap();
    assert_eq!(value["title"], "Team chat");
    assert_eq!(value["total_parts"], 1);
    let records = value["records"].as_array().unwrap();
    assert_eq!(records.len(), 12);
    assert_eq!(records[0]["id"]["value"], "m1");
    assert_eq!(records[0]["day"], "January 10, 2024");
    assert_eq!(records[1]["media"]["status"], "acquired");
    assert_eq!(records[1]["media"]["strategy"], "data-channel");
    assert_eq!(records[4]["media"]["strategy"], "rendered-raster");
    assert_eq!(records[7]["media"]["status"], "failed");
    assert_eq!(records[2]["role"], "self");
    assert_eq!(records[2]["sender"], "Me");
}

#[test]
fn test_export_date_window_labels_output() {
    let (tmp, config_path, transcript) = setup_test_env(100);

    let (stdout, stderr, success) = run_scrollback(
        &config_path,
        &[
            "export",
            transcript.to_str().unwrap(),
            "--from",
            "2024-01-01",
            "--to",
            "2024-01-31",
            "--progress",
            "off",
        ],
    );
    assert!(success, "export failed: {}", stderr);
    assert!(stdout.contains("12 messages"), "{}", stdout);
    assert!(tmp
        .path()
        .join("exports/Team_chat_2024-01-01_to_2024-01-31.md")
        .exists());
}

#[test]
fn test_export_outside_window_writes_nothing() {
    let (tmp, config_path, transcript) = setup_test_env(100);

    let (stdout, stderr, success) = run_scrollback(
        &config_path,
        &[
            "export",
            transcript.to_str().unwrap(),
            "--from",
            "2024-02-01",
            "--to",
            "2024-02-28",
            "--progress",
            "off",
        ],
    );
    assert!(success, "export failed: {}", stderr);
    assert!(stdout.contains("No messages found"), "{}", stdout);
    assert!(!tmp.path().join("exports").exists());
}

#[test]
fn test_export_dry_run_writes_nothing() {
    let (tmp, config_path, transcript) = setup_test_env(5);

    let (stdout, stderr, success) = run_scrollback(
        &config_path,
        &[
            "export",
            transcript.to_str().unwrap(),
            "--dry-run",
            "--progress",
            "off",
        ],
    );
    assert!(success, "dry run failed: {}", stderr);
    assert!(stdout.contains("Dry run: would write Team_chat_export.zip"), "{}", stdout);
    assert!(!tmp.path().join("exports").exists());
}

#[test]
fn test_export_progress_json_on_stderr() {
    let (_tmp, config_path, transcript) = setup_test_env(100);

    let (stdout, stderr, success) = run_scrollback(
        &config_path,
        &[
            "export",
            transcript.to_str().unwrap(),
            "--dry-run",
            "--progress",
            "json",
        ],
    );
    assert!(success, "export failed: {}", stderr);
    assert!(!stdout.contains("\"event\""));
    let progress: Vec<serde_json::Value> = stderr
        .lines()
        .filter_map(|l| serde_json::from_str::<serde_json::Value>(l).ok())
        .filter(|v| v["event"] == "progress")
        .collect();
    assert!(!progress.is_empty());
    assert_eq!(progress.last().unwrap()["records"], 12);
}

#[test]
fn test_inspect_reports_counts() {
    let (_tmp, config_path, transcript) = setup_test_env(100);

    let (stdout, stderr, success) =
        run_scrollback(&config_path, &["inspect", transcript.to_str().unwrap()]);
    assert!(success, "inspect failed: {}", stderr);
    assert!(stdout.contains("Title:     Team chat"));
    assert!(stdout.contains("Messages:  12"));
    assert!(stdout.contains("Images:    3"));
    assert!(stdout.contains("Notices:   1"));
}

#[test]
fn test_missing_transcript_fails() {
    let (tmp, config_path, _) = setup_test_env(100);
    let missing = tmp.path().join("nope.json");

    let (_stdout, stderr, success) =
        run_scrollback(&config_path, &["export", missing.to_str().unwrap()]);
    assert!(!success);
    assert!(stderr.contains("source unavailable"), "{}", stderr);
}

#[test]
fn test_invalid_config_fails() {
    let (tmp, _, transcript) = setup_test_env(100);
    let bad = tmp.path().join("config/bad.toml");
    fs::write(&bad, "[media]\ndisabled_strategies = [\"telepathy\"]\n").unwrap();

    let (_stdout, stderr, success) =
        run_scrollback(&bad, &["export", transcript.to_str().unwrap()]);
    assert!(!success);
    assert!(stderr.contains("Unknown media strategy"), "{}", stderr);
}

#[test]
fn test_inverted_window_fails() {
    let (_tmp, config_path, transcript) = setup_test_env(100);

    let (_stdout, stderr, success) = run_scrollback(
        &config_path,
        &[
            "export",
            transcript.to_str().unwrap(),
            "--from",
            "2024-03-01",
            "--to",
            "2024-01-01",
        ],
    );
    assert!(!success);
    assert!(stderr.contains("is after"), "{}", stderr);
}
