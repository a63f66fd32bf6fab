//! End-to-end orchestration tests
//!
//! These drive the real orchestrators against scripted stand-ins for the
//! external collaborators: shell fixtures play the test host, and the
//! `mock_adapter` binary plays the DAP debugger.

#![cfg(unix)]

use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use testbridge::common::Config;
use testbridge::debug::DebugOrchestrator;
use testbridge::run::RunOrchestrator;
use testbridge::tree::{
    NodeKind, NodeMeta, RunLog, RunProfile, RunRequest, RunState, TestNode, TestTree,
};

const SAMPLE_TRX: &str = r#"<?xml version="1.0" encoding="utf-8"?>
<TestRun xmlns="http://microsoft.com/schemas/VisualStudio/TeamTest/2010">
  <Results>
    <UnitTestResult testId="id-1" testName="Adds" outcome="Passed" duration="00:00:00.1230000" />
    <UnitTestResult testId="id-2" testName="Divides" outcome="Failed" duration="00:00:00.0450000">
      <Output>
        <ErrorInfo>
          <Message>Expected 2 but was 3.</Message>
          <StackTrace>at Calc.Tests.Divides() in /src/CalcTests.cs:line 42</StackTrace>
        </ErrorInfo>
      </Output>
    </UnitTestResult>
  </Results>
  <TestDefinitions>
    <UnitTest id="id-1" name="Adds">
      <TestMethod className="Calc.Tests" name="Adds" />
    </UnitTest>
    <UnitTest id="id-2" name="Divides">
      <TestMethod className="Calc.Tests" name="Divides" />
    </UnitTest>
  </TestDefinitions>
</TestRun>
"#;

/// Write an executable shell fixture
fn write_script(path: &Path, content: &str) {
    fs::write(path, content).expect("write script");
    fs::set_permissions(path, fs::Permissions::from_mode(0o755)).expect("chmod script");
}

/// A host stand-in that writes the sample result log, optionally announces
/// a process id (for debug-wait runs), then idles briefly
fn write_runner(dir: &Path, announce_pid: bool) -> PathBuf {
    let path = dir.join("runner.sh");
    let announce = if announce_pid {
        "echo \"Process Id: 4242, Name: testhost\"\nsleep 2\n"
    } else {
        ""
    };
    let script = format!(
        "#!/bin/sh\n\
         if [ \"$1\" = \"build\" ]; then exit 0; fi\n\
         dir=\"\"\n\
         prev=\"\"\n\
         for arg in \"$@\"; do\n\
         \x20 if [ \"$prev\" = \"--results-directory\" ]; then dir=\"$arg\"; fi\n\
         \x20 prev=\"$arg\"\n\
         done\n\
         cat > \"$dir/run.trx\" <<'TRX'\n{SAMPLE_TRX}TRX\n{announce}exit 0\n"
    );
    write_script(&path, &script);
    path
}

fn group_meta(project: &Path, target: Option<&Path>) -> NodeMeta {
    NodeMeta {
        qualified_name: "Calc.Tests".to_string(),
        owning_group: "g1".to_string(),
        kind: NodeKind::Group,
        parameterized: false,
        display_name: "Calc.Tests".to_string(),
        project_path: Some(project.to_path_buf()),
        target_path: target.map(Path::to_path_buf),
    }
}

fn leaf_meta(fqn: &str, group: &str) -> NodeMeta {
    NodeMeta {
        qualified_name: fqn.to_string(),
        owning_group: group.to_string(),
        kind: NodeKind::Method,
        parameterized: false,
        display_name: fqn.rsplit('.').next().unwrap().to_string(),
        project_path: None,
        target_path: None,
    }
}

/// The calculator tree the sample result log reports against
fn calc_tree(project: &Path, target: Option<&Path>) -> TestTree {
    let mut tree = TestTree::new();
    tree.insert(TestNode::new("g1", Some(group_meta(project, target))));
    tree.insert(TestNode::new("adds", Some(leaf_meta("Calc.Tests.Adds", "g1"))));
    tree.insert(TestNode::new(
        "divides",
        Some(leaf_meta("Calc.Tests.Divides", "g1")),
    ));
    tree.add_child("g1", "adds");
    tree.add_child("g1", "divides");
    tree
}

fn config_with_runner(runner: &Path) -> Config {
    let mut config = Config::default();
    config.runner.program = runner.to_string_lossy().into_owned();
    config
}

#[tokio::test]
async fn run_correlates_the_result_log_onto_the_tree() {
    let dir = tempfile::tempdir().unwrap();
    let runner = write_runner(dir.path(), false);
    let project = dir.path().join("Calc.Tests.csproj");
    fs::write(&project, "").unwrap();

    let mut tree = calc_tree(&project, None);
    let config = config_with_runner(&runner);
    let mut log = RunLog::new();
    let request = RunRequest::new(RunProfile::Run, vec!["g1".to_string()], vec![]);

    let summary = RunOrchestrator::new(&mut tree, &config, &mut log)
        .execute(&request)
        .await
        .unwrap();

    assert_eq!(summary.passed, 1);
    assert_eq!(summary.failed, 1);
    assert_eq!(summary.total, 2);
    assert_eq!(summary.execution_time_ms, 123 + 45);

    assert_eq!(
        tree.state("adds"),
        Some(&RunState::Passed { duration_ms: 123 })
    );
    match tree.state("divides") {
        Some(RunState::Failed {
            message, location, ..
        }) => {
            assert!(message.contains("Expected 2 but was 3."));
            assert_eq!(location.as_ref().unwrap().line, 42);
        }
        other => panic!("expected failed state, got {other:?}"),
    }
    // The group node (the single progress unit here) converged too
    assert!(matches!(tree.state("g1"), Some(RunState::Failed { .. })));
}

#[tokio::test]
async fn missing_result_log_errors_the_whole_group() {
    let dir = tempfile::tempdir().unwrap();
    let runner = dir.path().join("runner.sh");
    write_script(&runner, "#!/bin/sh\nexit 1\n");
    let project = dir.path().join("Calc.Tests.csproj");
    fs::write(&project, "").unwrap();

    let mut tree = calc_tree(&project, None);
    let config = config_with_runner(&runner);
    let mut log = RunLog::new();
    let request = RunRequest::new(RunProfile::Run, vec!["g1".to_string()], vec![]);

    RunOrchestrator::new(&mut tree, &config, &mut log)
        .execute(&request)
        .await
        .unwrap();

    for id in ["adds", "divides"] {
        match tree.state(id) {
            Some(RunState::Errored { message }) => {
                assert!(message.contains("No result log"), "message: {message}")
            }
            other => panic!("expected errored state for {id}, got {other:?}"),
        }
    }
}

#[tokio::test]
async fn filter_clause_reaches_the_host_with_encoded_commas() {
    let dir = tempfile::tempdir().unwrap();
    let args_file = dir.path().join("args.txt");
    let runner = dir.path().join("runner.sh");
    let script = format!(
        "#!/bin/sh\n\
         printf '%s\\n' \"$@\" > {}\n\
         dir=\"\"\n\
         prev=\"\"\n\
         for arg in \"$@\"; do\n\
         \x20 if [ \"$prev\" = \"--results-directory\" ]; then dir=\"$arg\"; fi\n\
         \x20 prev=\"$arg\"\n\
         done\n\
         cat > \"$dir/run.trx\" <<'TRX'\n{SAMPLE_TRX}TRX\nexit 0\n",
        args_file.display()
    );
    write_script(&runner, &script);
    let project = dir.path().join("Calc.Tests.csproj");
    fs::write(&project, "").unwrap();

    let mut tree = calc_tree(&project, None);
    let mut generic = leaf_meta("Calc.Tests.Divide(x,y)", "g1");
    generic.display_name = "Divide(x,y)".to_string();
    tree.insert(TestNode::new("generic", Some(generic)));
    tree.add_child("g1", "generic");

    let config = config_with_runner(&runner);
    let mut log = RunLog::new();
    // A leaf request, not the group node: this invocation is filtered
    let request = RunRequest::new(RunProfile::Run, vec!["generic".to_string()], vec![]);

    RunOrchestrator::new(&mut tree, &config, &mut log)
        .execute(&request)
        .await
        .unwrap();

    let args = fs::read_to_string(&args_file).unwrap();
    assert!(
        args.contains("FullyQualifiedName=Calc.Tests.Divide(x%2Cy)"),
        "args: {args}"
    );
}

#[tokio::test]
async fn mid_run_cancellation_settles_every_group_terminally() {
    let dir = tempfile::tempdir().unwrap();
    let runner = dir.path().join("runner.sh");
    write_script(
        &runner,
        "#!/bin/sh\nif [ \"$1\" = \"build\" ]; then exit 0; fi\nsleep 30\n",
    );
    let project1 = dir.path().join("One.csproj");
    let project2 = dir.path().join("Two.csproj");
    fs::write(&project1, "").unwrap();
    fs::write(&project2, "").unwrap();

    let mut tree = TestTree::new();
    let mut g1 = group_meta(&project1, None);
    g1.qualified_name = "One".to_string();
    tree.insert(TestNode::new("g1", Some(g1)));
    let mut g2 = group_meta(&project2, None);
    g2.qualified_name = "Two".to_string();
    g2.owning_group = "g2".to_string();
    tree.insert(TestNode::new("g2", Some(g2)));
    tree.insert(TestNode::new("a", Some(leaf_meta("One.A", "g1"))));
    tree.insert(TestNode::new("c", Some(leaf_meta("Two.C", "g2"))));
    tree.add_child("g1", "a");
    tree.add_child("g2", "c");

    let config = config_with_runner(&runner);
    let mut log = RunLog::new();
    let request = RunRequest::new(
        RunProfile::Run,
        vec!["g1".to_string(), "g2".to_string()],
        vec![],
    );

    let cancel = request.cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(400)).await;
        cancel.cancel();
    });

    let started = Instant::now();
    RunOrchestrator::new(&mut tree, &config, &mut log)
        .execute(&request)
        .await
        .unwrap();

    // Group 1 was killed mid-flight, group 2 never started; both are terminal
    assert!(started.elapsed() < Duration::from_secs(15));
    for id in ["a", "c", "g1", "g2"] {
        let state = tree.state(id).unwrap();
        assert!(state.is_terminal(), "{id} ended non-terminal: {state:?}");
    }
}

#[tokio::test]
async fn debug_hosted_runner_attaches_intercepts_and_correlates() {
    let dir = tempfile::tempdir().unwrap();
    let runner = write_runner(dir.path(), true);
    let project = dir.path().join("Calc.Tests.csproj");
    fs::write(&project, "").unwrap();
    // A library artifact with no adjacent executable selects the hosted runner
    let library = dir.path().join("Calc.Tests.dll");
    let dump = dir.path().join("exception-filters.json");

    let mut tree = calc_tree(&project, Some(library.as_path()));
    let mut config = config_with_runner(&runner);
    config.debug.debugger = env!("CARGO_BIN_EXE_mock_adapter").to_string();
    config.debug.debugger_args = vec!["--dump".to_string(), dump.display().to_string()];
    let mut log = RunLog::new();
    let request = RunRequest::new(RunProfile::Debug, vec!["g1".to_string()], vec![]);

    DebugOrchestrator::new(&mut tree, &config, &mut log)
        .execute(&request)
        .await
        .unwrap();

    // The session's result log was correlated like a plain run
    assert_eq!(
        tree.state("adds"),
        Some(&RunState::Passed { duration_ms: 123 })
    );
    assert!(matches!(tree.state("divides"), Some(RunState::Failed { .. })));

    // The intercepted set-exception-filters message carries the never-break
    // override, whatever the incoming filter set was
    let intercepted: serde_json::Value =
        serde_json::from_str(&fs::read_to_string(&dump).unwrap()).unwrap();
    let options = intercepted["exceptionOptions"].as_array().unwrap();
    let never_break = options.iter().any(|option| {
        option["breakMode"] == "never"
            && option["path"][0]["names"][0] == "System.IO.FileNotFoundException"
    });
    assert!(never_break, "intercepted message: {intercepted}");

    // This test's named session was deregistered on the way out (other
    // tests' sessions may be live concurrently)
    assert!(!testbridge::debug::registry::ensure_registered()
        .active()
        .contains(&"g1/pid-4242".to_string()));
}

#[tokio::test]
async fn debug_direct_executable_marks_debugged_leaves_passed() {
    let dir = tempfile::tempdir().unwrap();
    let runner = write_runner(dir.path(), false);
    let project = dir.path().join("Calc.Tests.csproj");
    fs::write(&project, "").unwrap();

    // An executable artifact adjacent to the library selects direct launch
    let library = dir.path().join("Calc.Tests.dll");
    fs::write(&library, "lib").unwrap();
    let executable = dir.path().join("Calc.Tests");
    write_script(
        &executable,
        "#!/bin/sh\necho \"Waiting for debugger attach\"\nsleep 2\nexit 0\n",
    );

    let mut tree = calc_tree(&project, Some(library.as_path()));
    let mut config = config_with_runner(&runner);
    config.debug.debugger = env!("CARGO_BIN_EXE_mock_adapter").to_string();
    let mut log = RunLog::new();
    let request = RunRequest::new(
        RunProfile::Debug,
        vec!["adds".to_string(), "divides".to_string()],
        vec![],
    );

    DebugOrchestrator::new(&mut tree, &config, &mut log)
        .execute(&request)
        .await
        .unwrap();

    // No result log exists on this path; a debug session is for inspection
    assert_eq!(
        tree.state("adds"),
        Some(&RunState::Passed { duration_ms: 0 })
    );
    assert_eq!(
        tree.state("divides"),
        Some(&RunState::Passed { duration_ms: 0 })
    );
}

#[tokio::test]
async fn readiness_timeout_errors_the_group_instead_of_hanging() {
    let dir = tempfile::tempdir().unwrap();
    let runner = dir.path().join("runner.sh");
    // Never announces a process id
    write_script(
        &runner,
        "#!/bin/sh\nif [ \"$1\" = \"build\" ]; then exit 0; fi\nsleep 30\n",
    );
    let project = dir.path().join("Calc.Tests.csproj");
    fs::write(&project, "").unwrap();

    let mut tree = calc_tree(&project, None);
    let mut config = config_with_runner(&runner);
    config.debug.debugger = env!("CARGO_BIN_EXE_mock_adapter").to_string();
    config.timeouts.readiness_secs = 1;
    let mut log = RunLog::new();
    let request = RunRequest::new(RunProfile::Debug, vec!["g1".to_string()], vec![]);

    let started = Instant::now();
    DebugOrchestrator::new(&mut tree, &config, &mut log)
        .execute(&request)
        .await
        .unwrap();

    assert!(started.elapsed() < Duration::from_secs(15));
    for id in ["adds", "divides"] {
        match tree.state(id) {
            Some(RunState::Errored { message }) => {
                assert!(message.contains("did not start"), "message: {message}")
            }
            other => panic!("expected errored state for {id}, got {other:?}"),
        }
    }
}

#[tokio::test]
async fn build_failure_errors_the_group_before_any_launch() {
    let dir = tempfile::tempdir().unwrap();
    let runner = dir.path().join("runner.sh");
    write_script(
        &runner,
        "#!/bin/sh\nif [ \"$1\" = \"build\" ]; then exit 2; fi\nsleep 30\n",
    );
    let project = dir.path().join("Calc.Tests.csproj");
    fs::write(&project, "").unwrap();

    let mut tree = calc_tree(&project, None);
    let mut config = config_with_runner(&runner);
    config.debug.debugger = env!("CARGO_BIN_EXE_mock_adapter").to_string();
    let mut log = RunLog::new();
    let request = RunRequest::new(RunProfile::Debug, vec!["g1".to_string()], vec![]);

    let started = Instant::now();
    DebugOrchestrator::new(&mut tree, &config, &mut log)
        .execute(&request)
        .await
        .unwrap();

    // Failed fast: the readiness window was never spent on a broken build
    assert!(started.elapsed() < Duration::from_secs(10));
    for id in ["adds", "divides"] {
        match tree.state(id) {
            Some(RunState::Errored { message }) => {
                assert!(message.contains("Build failed"), "message: {message}")
            }
            other => panic!("expected errored state for {id}, got {other:?}"),
        }
    }
}
