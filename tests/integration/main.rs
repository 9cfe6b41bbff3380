//! Integration tests for sws

mod cli_tests {
    use assert_cmd::{cargo::cargo_bin_cmd, Command};
    use predicates::prelude::*;
    use std::path::{Path, PathBuf};
    use tempfile::TempDir;

    /// Stand-in toolchain: "compiles" by copying the source, and rejects any
    /// model containing the word `syntaxerror`.
    const FAKE_SCRIPT: &str = "if grep -q syntaxerror {model_dir}/main.stan; then \
        echo 'Syntax error in main.stan' >&2; exit 1; fi; \
        cp {model_dir}/main.stan {model_dir}/main.js; \
        printf 'wasm:' > {model_dir}/main.wasm; \
        cat {model_dir}/main.stan >> {model_dir}/main.wasm";

    const MODEL: &str = "parameters { real y; } model { y ~ normal(0, 1); }\n";

    struct Sandbox {
        dir: TempDir,
        config: PathBuf,
    }

    impl Sandbox {
        fn new() -> Self {
            Self::with_script(FAKE_SCRIPT)
        }

        fn with_script(script: &str) -> Self {
            let dir = TempDir::new().unwrap();
            let toolchain = dir.path().join("toolchain");
            std::fs::create_dir_all(&toolchain).unwrap();

            let config = dir.path().join("config.toml");
            let content = format!(
                "[storage]\nroot = '{}'\n\n[build]\ntoolchain_dir = '{}'\nshell = \"sh\"\nscript = \"\"\"{}\"\"\"\n\n[cache]\nwait_poll_ms = 20\n",
                dir.path().join("state").display(),
                toolchain.display(),
                script,
            );
            std::fs::write(&config, content).unwrap();

            Self { dir, config }
        }

        fn path(&self) -> &Path {
            self.dir.path()
        }

        fn sws(&self) -> Command {
            let mut cmd = cargo_bin_cmd!("sws");
            cmd.arg("--config").arg(&self.config);
            cmd.env_remove("SWS_TOOLCHAIN_DIR");
            cmd
        }

        fn write_model(&self, name: &str, body: &str) -> PathBuf {
            let path = self.path().join(name);
            std::fs::write(&path, body).unwrap();
            path
        }

        fn create_job(&self) -> String {
            let out = self.sws().args(["job", "create"]).output().unwrap();
            assert!(out.status.success());
            let report: serde_json::Value = serde_json::from_slice(&out.stdout).unwrap();
            assert_eq!(report["status"], "initiated");
            report["job_id"].as_str().unwrap().to_string()
        }
    }

    #[test]
    fn help_displays() {
        cargo_bin_cmd!("sws")
            .arg("--help")
            .assert()
            .success()
            .stdout(predicate::str::contains("Stan WASM build server"));
    }

    #[test]
    fn version_displays() {
        cargo_bin_cmd!("sws")
            .arg("--version")
            .assert()
            .success()
            .stdout(predicate::str::contains("sws"));
    }

    #[test]
    fn config_path_follows_flag() {
        let sandbox = Sandbox::new();
        sandbox
            .sws()
            .args(["config", "path"])
            .assert()
            .success()
            .stdout(predicate::str::contains("config.toml"));
    }

    #[test]
    fn config_show() {
        let sandbox = Sandbox::new();
        sandbox
            .sws()
            .args(["config", "show"])
            .assert()
            .success()
            .stdout(predicate::str::contains("[build]"))
            .stdout(predicate::str::contains("wait_poll_ms = 20"));
    }

    #[test]
    fn job_lifecycle() {
        let sandbox = Sandbox::new();
        let model = sandbox.write_model("model.stan", MODEL);
        let id = sandbox.create_job();

        sandbox
            .sws()
            .args(["job", "upload", &id])
            .arg(&model)
            .assert()
            .success()
            .stdout(predicate::str::contains("\"success\":true"));

        sandbox
            .sws()
            .args(["job", "status", &id])
            .assert()
            .success()
            .stdout(predicate::str::contains("\"initiated\""));

        sandbox
            .sws()
            .args(["job", "run", &id, "--wait"])
            .assert()
            .success()
            .stdout(predicate::str::contains("\"completed\""));

        sandbox
            .sws()
            .args(["job", "fetch", &id, "main.js"])
            .assert()
            .success()
            .stdout(MODEL);

        let wasm = sandbox.path().join("out.wasm");
        sandbox
            .sws()
            .args(["job", "fetch", &id, "main.wasm", "--output"])
            .arg(&wasm)
            .assert()
            .success();
        assert_eq!(
            std::fs::read_to_string(&wasm).unwrap(),
            format!("wasm:{MODEL}")
        );

        // Status stays completed
        sandbox
            .sws()
            .args(["job", "status", &id])
            .assert()
            .success()
            .stdout(predicate::str::contains("\"completed\""));
    }

    #[test]
    fn upload_from_stdin_and_fetch_to_stdout() {
        let sandbox = Sandbox::new();
        let id = sandbox.create_job();

        sandbox
            .sws()
            .args(["job", "upload", &id, "-"])
            .write_stdin(MODEL)
            .assert()
            .success()
            .stdout(predicate::str::contains("\"success\":true"));

        sandbox
            .sws()
            .args(["job", "run", &id, "--wait"])
            .assert()
            .success()
            .stdout(predicate::str::contains("\"completed\""));

        sandbox
            .sws()
            .args(["job", "fetch", &id, "main.js"])
            .assert()
            .success()
            .stdout(MODEL);
    }

    #[test]
    fn upload_after_run_rejected() {
        let sandbox = Sandbox::new();
        let model = sandbox.write_model("model.stan", MODEL);
        let id = sandbox.create_job();

        sandbox.sws().args(["job", "upload", &id]).arg(&model).assert().success();
        sandbox.sws().args(["job", "run", &id]).assert().success();

        sandbox
            .sws()
            .args(["job", "upload", &id])
            .arg(&model)
            .assert()
            .failure()
            .stderr(predicate::str::contains("Invalid state"));
    }

    #[test]
    fn run_without_source_rejected() {
        let sandbox = Sandbox::new();
        let id = sandbox.create_job();

        sandbox
            .sws()
            .args(["job", "run", &id])
            .assert()
            .failure()
            .stderr(predicate::str::contains("no source uploaded"));
    }

    #[test]
    fn unknown_job_and_bad_ids() {
        let sandbox = Sandbox::new();

        sandbox
            .sws()
            .args(["job", "status", "abcdef1234567890"])
            .assert()
            .failure()
            .stderr(predicate::str::contains("Job not found"));

        sandbox
            .sws()
            .args(["job", "status", "../../etc"])
            .assert()
            .failure()
            .stderr(predicate::str::contains("Invalid job ID"));
    }

    #[test]
    fn unknown_artifact_rejected() {
        let sandbox = Sandbox::new();
        let id = sandbox.create_job();

        sandbox
            .sws()
            .args(["job", "fetch", &id, "main.o"])
            .assert()
            .failure()
            .stderr(predicate::str::contains("Unknown artifact"));
    }

    #[test]
    fn build_writes_artifacts() {
        let sandbox = Sandbox::new();
        let model = sandbox.write_model("model.stan", MODEL);
        let out = sandbox.path().join("out");

        sandbox
            .sws()
            .arg("build")
            .arg(&model)
            .arg("--output")
            .arg(&out)
            .assert()
            .success();

        assert_eq!(std::fs::read_to_string(out.join("main.js")).unwrap(), MODEL);
        assert!(out.join("main.wasm").is_file());
    }

    #[test]
    fn identical_builds_share_one_cache_entry() {
        let sandbox = Sandbox::new();
        let model = sandbox.write_model("model.stan", MODEL);
        let copy = sandbox.write_model("copy.stan", MODEL);

        for file in [&model, &copy] {
            sandbox
                .sws()
                .arg("build")
                .arg(file)
                .arg("--output")
                .arg(sandbox.path().join("out"))
                .assert()
                .success();
        }

        let out = sandbox
            .sws()
            .args(["cache", "list", "--format", "plain"])
            .output()
            .unwrap();
        assert!(out.status.success());
        let keys = String::from_utf8(out.stdout).unwrap();
        assert_eq!(keys.lines().count(), 1);
        assert_eq!(keys.trim().len(), 64);
    }

    #[test]
    fn failed_build_reports_diagnostic() {
        let sandbox = Sandbox::new();
        let model = sandbox.write_model("broken.stan", "model { syntaxerror }\n");

        sandbox
            .sws()
            .arg("build")
            .arg(&model)
            .arg("--output")
            .arg(sandbox.path().join("out"))
            .assert()
            .failure()
            .stderr(predicate::str::contains("Syntax error in main.stan"))
            .stderr(predicate::str::contains("Compilation failed"));

        // Nothing cached for the failed source
        sandbox
            .sws()
            .args(["cache", "list", "--format", "json"])
            .assert()
            .success()
            .stdout(predicate::str::contains("\"ready\"").not());
    }

    #[test]
    fn failed_job_has_no_artifacts() {
        let sandbox = Sandbox::new();
        let model = sandbox.write_model("broken.stan", "model { syntaxerror }\n");
        let id = sandbox.create_job();

        sandbox.sws().args(["job", "upload", &id]).arg(&model).assert().success();
        sandbox
            .sws()
            .args(["job", "run", &id])
            .assert()
            .success()
            .stdout(predicate::str::contains("\"failed\""))
            .stdout(predicate::str::contains("Syntax error"));

        sandbox
            .sws()
            .args(["job", "fetch", &id, "main.js"])
            .assert()
            .failure()
            .stderr(predicate::str::contains("Artifact not found"));
    }

    #[test]
    fn oversized_upload_rejected() {
        let sandbox = Sandbox::new();
        let config = std::fs::read_to_string(&sandbox.config).unwrap();
        std::fs::write(
            &sandbox.config,
            config.replace("[build]\n", "[build]\nmax_source_bytes = 8\n"),
        )
        .unwrap();

        let model = sandbox.write_model("model.stan", MODEL);
        let id = sandbox.create_job();

        sandbox
            .sws()
            .args(["job", "upload", &id])
            .arg(&model)
            .assert()
            .failure()
            .stderr(predicate::str::contains("Source too large"));
    }

    #[test]
    fn build_without_toolchain_fails_with_hint() {
        let dir = TempDir::new().unwrap();
        let config = dir.path().join("config.toml");
        std::fs::write(
            &config,
            format!("[storage]\nroot = '{}'\n", dir.path().join("state").display()),
        )
        .unwrap();
        let model = dir.path().join("model.stan");
        std::fs::write(&model, MODEL).unwrap();

        cargo_bin_cmd!("sws")
            .env_remove("SWS_TOOLCHAIN_DIR")
            .arg("--config")
            .arg(&config)
            .arg("build")
            .arg(&model)
            .assert()
            .failure()
            .stderr(predicate::str::contains("Toolchain directory not configured"))
            .stderr(predicate::str::contains("SWS_TOOLCHAIN_DIR"));
    }

    #[test]
    fn cache_reclaim_with_nothing_stale() {
        let sandbox = Sandbox::new();
        sandbox.sws().args(["cache", "reclaim"]).assert().success();
    }

    #[test]
    fn completions_bash() {
        cargo_bin_cmd!("sws")
            .args(["completions", "bash"])
            .assert()
            .success()
            .stdout(predicate::str::contains("sws"));
    }
}
