use std::process::Command;

fn vaultsearch() -> Command {
    let mut cmd = Command::new(env!("CARGO_BIN_EXE_vaultsearch"));
    // Argument errors must surface before any database connection is attempted
    cmd.env("VAULTSEARCH_DATABASE_URL", "postgres://127.0.0.1:1/unreachable");
    cmd
}

#[test]
fn test_help_lists_subcommands() {
    let output = vaultsearch().arg("--help").output().expect("binary runs");
    assert!(output.status.success());

    let stdout = String::from_utf8_lossy(&output.stdout);
    for name in ["migrate", "ingest", "search", "advanced", "semantic", "hybrid", "get", "count", "embed"] {
        assert!(stdout.contains(name), "help should mention {}: {}", name, stdout);
    }
}

#[test]
fn test_embed_help_lists_actions() {
    let output = vaultsearch().args(["embed", "--help"]).output().expect("binary runs");
    assert!(output.status.success());

    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("backfill"));
    assert!(stdout.contains("stats"));
    assert!(stdout.contains("switch-model"));
}

#[test]
fn test_unknown_doc_type_is_rejected() {
    let output = vaultsearch()
        .args(["search", "rust", "--type", "whiteboard"])
        .output()
        .expect("binary runs");

    assert_eq!(output.status.code(), Some(2));
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("whiteboard"), "stderr: {}", stderr);
}

#[test]
fn test_unreachable_database_fails_cleanly() {
    let output = vaultsearch().arg("count").output().expect("binary runs");

    assert!(!output.status.success());
    assert!(output.stdout.is_empty());
}
