//! Integration tests for Strata

mod cli_tests {
    use assert_cmd::{cargo::cargo_bin_cmd, Command};
    use predicates::prelude::*;
    use std::path::Path;
    use tempfile::TempDir;

    /// Strata with defaults only, whatever the user's own config says
    fn strata(dir: &Path) -> Command {
        let mut cmd = cargo_bin_cmd!("strata");
        cmd.current_dir(dir)
            .env("STRATA_CONFIG", dir.join("config.toml"))
            .env_remove("RUST_LOG");
        cmd
    }

    fn workspace(buildfile: &str) -> TempDir {
        let temp = TempDir::new().unwrap();
        std::fs::write(temp.path().join("strata.toml"), buildfile).unwrap();
        temp
    }

    const CONTAINER_BUILD: &str = r#"
[[build]]
name = "app"
base = "alpine"
commit = "myapp:latest"

[[build.steps]]
run = "apk add curl"

[[build.steps]]
mkdir = ["/app"]
"#;

    #[test]
    fn help_displays() {
        let temp = TempDir::new().unwrap();
        strata(temp.path())
            .arg("--help")
            .assert()
            .success()
            .stdout(predicate::str::contains("Incremental layered container image builder"));
    }

    #[test]
    fn version_displays() {
        let temp = TempDir::new().unwrap();
        strata(temp.path())
            .arg("--version")
            .assert()
            .success()
            .stdout(predicate::str::contains("strata"));
    }

    #[test]
    fn config_path() {
        let temp = TempDir::new().unwrap();
        strata(temp.path())
            .args(["config", "path"])
            .assert()
            .success()
            .stdout(predicate::str::contains("config.toml"));
    }

    #[test]
    fn config_show() {
        let temp = TempDir::new().unwrap();
        strata(temp.path())
            .args(["config", "show"])
            .assert()
            .success()
            .stdout(predicate::str::contains("[build]"));
    }

    #[test]
    fn config_init_writes_file() {
        let temp = TempDir::new().unwrap();
        strata(temp.path())
            .args(["config", "init"])
            .assert()
            .success()
            .stdout(predicate::str::contains("Configuration initialized"));
        assert!(temp.path().join("config.toml").exists());
    }

    #[test]
    fn dry_run_build_commits_through_stub() {
        let temp = workspace(CONTAINER_BUILD);
        strata(temp.path())
            .args(["build", "--dry-run"])
            .assert()
            .success()
            .stdout(predicate::str::contains("apk add curl"))
            .stdout(predicate::str::contains("Committed myapp:latest"))
            .stdout(predicate::str::contains("3 PASS"));
    }

    #[test]
    fn localhost_build_runs_commands() {
        let temp = workspace(
            r#"
[[build]]
name = "host"
target = "localhost"

[[build.steps]]
run = "echo hello"
"#,
        );
        strata(temp.path())
            .arg("build")
            .assert()
            .success()
            .stdout(predicate::str::contains("host | hello"))
            .stdout(predicate::str::contains("0 FAIL"));
    }

    #[test]
    fn failing_step_fails_the_build() {
        let temp = workspace(
            r#"
[[build]]
name = "host"
target = "localhost"

[[build.steps]]
run = "false"

[[build.steps]]
run = "echo never"
"#,
        );
        strata(temp.path())
            .arg("build")
            .assert()
            .failure()
            .stdout(predicate::str::contains("never").not())
            .stdout(predicate::str::contains("FAIL"))
            .stderr(predicate::str::contains("Error:"));
    }

    #[test]
    fn quiet_failure_prints_captured_output() {
        let temp = workspace(
            r#"
[[build]]
name = "host"
target = "localhost"

[[build.steps]]
run = "echo hidden-detail; false"
"#,
        );
        strata(temp.path())
            .args(["build", "-q"])
            .assert()
            .failure()
            .stdout(predicate::str::contains("Output of the failed command"))
            .stdout(predicate::str::contains("hidden-detail"));
    }

    #[test]
    fn independent_builds_both_run() {
        let temp = workspace(
            r#"
[[build]]
name = "broken"
target = "localhost"

[[build.steps]]
run = "exit 3"

[[build]]
name = "fine"
target = "localhost"

[[build.steps]]
run = "echo survived"
"#,
        );
        strata(temp.path())
            .arg("build")
            .assert()
            .failure()
            .stdout(predicate::str::contains("survived"));
    }

    #[test]
    fn only_unknown_build_fails() {
        let temp = workspace(CONTAINER_BUILD);
        strata(temp.path())
            .args(["build", "--dry-run", "--only", "nope"])
            .assert()
            .failure()
            .stderr(predicate::str::contains("Unknown build: nope"));
    }

    #[test]
    fn missing_buildfile_hints() {
        let temp = TempDir::new().unwrap();
        strata(temp.path())
            .args(["build", "--file", "absent.toml"])
            .assert()
            .failure()
            .stderr(predicate::str::contains("Hint:"));
    }

    #[test]
    fn invalid_buildfile_is_reported() {
        let temp = workspace("[[build]]\nname = \"x\"\n");
        strata(temp.path())
            .args(["build", "--dry-run"])
            .assert()
            .failure()
            .stderr(predicate::str::contains("Invalid buildfile"));
    }
}
