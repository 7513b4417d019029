use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use ferry_config::AgentConfig;
use ferry_core::{
    Agent, AgentParts, CommandExecutor, CommandRequest, CommandRunner, CompletionNotifier,
    CoreError, CoreResult, TaskHandle, TaskKind, TransferSettings,
};
use ferry_repo::{FileRef, RepoKind};
use ferry_telemetry::Metrics;
use ferry_test_support::{MemoryProvider, MemoryStore, temp_dir};
use httpmock::prelude::*;
use url::Url;

type TestResult<T> = anyhow::Result<T>;

const WAIT: Duration = Duration::from_secs(10);

#[derive(Debug, Default)]
struct RecordingNotifier {
    calls: Mutex<Vec<(Url, Option<i32>)>>,
}

#[async_trait]
impl CompletionNotifier for RecordingNotifier {
    async fn notify(&self, target: &Url, exit_code: Option<i32>) -> CoreResult<()> {
        self.calls
            .lock()
            .expect("notifier lock")
            .push((target.clone(), exit_code));
        Ok(())
    }
}

fn agent(notifier: Arc<RecordingNotifier>) -> TestResult<Agent> {
    Ok(Agent::new(AgentParts {
        commands: Arc::new(CommandExecutor::new("/bin/sh")),
        provider: Arc::new(MemoryProvider::new(MemoryStore::new())),
        transfer: TransferSettings::default(),
        notifier,
        metrics: Metrics::new()?,
    }))
}

async fn run(agent: &Agent, request: CommandRequest) -> TestResult<ferry_core::TaskSnapshot> {
    let id = agent.submit_command(request);
    Ok(tokio::time::timeout(WAIT, agent.wait(id)).await??)
}

#[tokio::test]
async fn echo_captures_stdout() -> TestResult<()> {
    let agent = agent(Arc::default())?;
    let task = run(&agent, CommandRequest::new("echo hello")).await?;
    assert_eq!(task.exit_code, Some(0));
    assert_eq!(task.stdout, "hello\n");
    assert_eq!(task.kind, TaskKind::Command);
    assert_eq!(task.cmd, vec!["/bin/sh", "-e", "-c", "echo hello"]);
    assert!(task.is_finished());
    Ok(())
}

#[tokio::test]
async fn exit_code_is_recorded() -> TestResult<()> {
    let notifier = Arc::new(RecordingNotifier::default());
    let agent = agent(Arc::clone(&notifier))?;
    let target = Url::parse("http://orchestrator.local/notify")?;
    let task = run(
        &agent,
        CommandRequest {
            notification: Some(target.clone()),
            ..CommandRequest::new("echo oops >&2; exit 7")
        },
    )
    .await?;
    assert_eq!(task.exit_code, Some(7));
    assert_eq!(task.stderr, "oops\n");
    assert!(task.finished_at.is_some());
    let calls = notifier.calls.lock().expect("notifier lock").clone();
    assert_eq!(calls, vec![(target, Some(7))]);
    Ok(())
}

#[tokio::test]
async fn stdin_and_env_reach_the_process() -> TestResult<()> {
    let agent = agent(Arc::default())?;
    let mut request = CommandRequest::new("cat; printf '%s' \"$FERRY_TEST_VALUE\"");
    request.stdin = "line one\n".to_string();
    request
        .env
        .insert("FERRY_TEST_VALUE".to_string(), "from-env".to_string());
    let task = run(&agent, request).await?;
    assert_eq!(task.exit_code, Some(0));
    assert_eq!(task.stdout, "line one\nfrom-env");
    Ok(())
}

#[tokio::test]
async fn spawn_failure_is_finalized() -> TestResult<()> {
    let notifier = Arc::new(RecordingNotifier::default());
    let agent = Agent::new(AgentParts {
        commands: Arc::new(CommandExecutor::new("/definitely/not/a/shell")),
        provider: Arc::new(MemoryProvider::new(MemoryStore::new())),
        transfer: TransferSettings::default(),
        notifier: notifier.clone(),
        metrics: Metrics::new()?,
    });
    let task = run(
        &agent,
        CommandRequest {
            notification: Some(Url::parse("http://orchestrator.local/n")?),
            ..CommandRequest::new("true")
        },
    )
    .await?;
    assert_eq!(task.exit_code, None);
    assert!(task.stderr.starts_with("Exception: command process failure"));
    assert!(task.is_finished());
    assert_eq!(notifier.calls.lock().expect("notifier lock")[0].1, None);
    Ok(())
}

#[derive(Debug)]
struct ExplodingRunner;

#[async_trait]
impl CommandRunner for ExplodingRunner {
    fn argv(&self, cmd: &str) -> Vec<String> {
        vec![cmd.to_string()]
    }

    async fn run(&self, task: &Arc<TaskHandle>, _env: &BTreeMap<String, String>) -> Option<i32> {
        task.append_stdout("partial\n");
        panic!("runner exploded");
    }
}

#[tokio::test]
async fn panicking_runner_still_finalizes_and_notifies() -> TestResult<()> {
    let notifier = Arc::new(RecordingNotifier::default());
    let agent = Agent::new(AgentParts {
        commands: Arc::new(ExplodingRunner),
        provider: Arc::new(MemoryProvider::new(MemoryStore::new())),
        transfer: TransferSettings::default(),
        notifier: notifier.clone(),
        metrics: Metrics::new()?,
    });
    let target = Url::parse("http://orchestrator.local/notify")?;
    let task = run(
        &agent,
        CommandRequest {
            notification: Some(target.clone()),
            ..CommandRequest::new("boom")
        },
    )
    .await?;
    assert!(task.is_finished());
    assert_eq!(task.exit_code, None);
    assert_eq!(task.stdout, "partial\n");
    assert!(task.stderr.starts_with("Exception: task worker failure"));
    let calls = notifier.calls.lock().expect("notifier lock").clone();
    assert_eq!(calls, vec![(target, None)]);
    assert_eq!(agent.metrics().snapshot().active_tasks, 0);
    Ok(())
}

#[tokio::test]
async fn kill_destroys_running_process() -> TestResult<()> {
    let agent = agent(Arc::default())?;
    let id = agent.submit_command(CommandRequest::new("sleep 30"));
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert!(!agent.get(id)?.is_finished());
    let waiter = {
        let agent = agent.clone();
        tokio::spawn(async move { agent.wait(id).await })
    };
    // The waiter must look the task up before it is unregistered.
    tokio::time::sleep(Duration::from_millis(50)).await;
    let before = agent.kill(id)?;
    assert!(!before.is_finished());
    assert!(matches!(agent.get(id), Err(CoreError::UnknownTask { .. })));
    let finished = tokio::time::timeout(WAIT, waiter).await???;
    assert!(finished.is_finished());
    assert_ne!(finished.exit_code, Some(0));
    Ok(())
}

#[tokio::test]
async fn registry_lists_and_deletes() -> TestResult<()> {
    let agent = agent(Arc::default())?;
    let first = run(&agent, CommandRequest::new("true")).await?;
    let second = run(&agent, CommandRequest::new("false")).await?;
    assert_eq!(second.exit_code, Some(1));
    let ids: Vec<u64> = agent.list().iter().map(|task| task.id).collect();
    assert_eq!(ids, vec![first.id, second.id]);
    agent.delete(first.id)?;
    assert_eq!(agent.list().len(), 1);
    assert!(matches!(
        agent.delete(first.id),
        Err(CoreError::UnknownTask { id }) if id == first.id
    ));
    assert!(!agent.date().is_empty());
    Ok(())
}

#[tokio::test]
async fn local_manifest_entries_are_refreshed() -> TestResult<()> {
    let dir = temp_dir("ferry-cmd-")?;
    let root = dir.path().to_string_lossy().into_owned();
    let agent = agent(Arc::default())?;
    let mut request = CommandRequest::new(format!("printf 'abcdef' > '{root}/out.txt'"));
    request.files.push(FileRef {
        tag: "out".to_string(),
        description: String::new(),
        source: None,
        root,
        key: "out.txt".to_string(),
        kind: RepoKind::File,
        length: 0,
        modified: None,
        content_type: None,
    });
    let task = run(&agent, request).await?;
    assert_eq!(task.exit_code, Some(0));
    assert_eq!(task.manifest.len(), 1);
    assert_eq!(task.manifest[0].length, 6);
    assert!(task.manifest[0].modified.is_some());
    Ok(())
}

#[tokio::test]
async fn http_notifier_reports_completion() -> TestResult<()> {
    let server = MockServer::start_async().await;
    let notify = server
        .mock_async(|when, then| {
            when.method(GET)
                .path("/callback")
                .query_param("source", "http://agent-1:8887/task")
                .query_param("oldStatus", "RUNNING")
                .query_param("newStatus", "COMPLETE")
                .query_param("sequence", "0")
                .query_param_exists("reference");
            then.status(200);
        })
        .await;
    let config = AgentConfig {
        agent_uri: Url::parse("http://agent-1:8887/task")?,
        shell: "/bin/sh".to_string(),
        notify_delay: Duration::ZERO,
        ..AgentConfig::default()
    };
    let agent = Agent::from_config(&config, Metrics::new()?)?;
    let task = run(
        &agent,
        CommandRequest {
            notification: Some(Url::parse(&server.url("/callback"))?),
            ..CommandRequest::new("true")
        },
    )
    .await?;
    assert_eq!(task.exit_code, Some(0));
    notify.assert_async().await;
    assert_eq!(agent.metrics().snapshot().notifications_failed_total, 0);
    Ok(())
}

#[tokio::test]
async fn failed_notification_is_counted_not_retried() -> TestResult<()> {
    let server = MockServer::start_async().await;
    let notify = server
        .mock_async(|when, then| {
            when.method(GET).path("/callback");
            then.status(500);
        })
        .await;
    let config = AgentConfig {
        shell: "/bin/sh".to_string(),
        notify_delay: Duration::ZERO,
        ..AgentConfig::default()
    };
    let agent = Agent::from_config(&config, Metrics::new()?)?;
    let task = run(
        &agent,
        CommandRequest {
            notification: Some(Url::parse(&server.url("/callback"))?),
            ..CommandRequest::new("exit 3")
        },
    )
    .await?;
    assert_eq!(task.exit_code, Some(3));
    notify.assert_hits_async(1).await;
    assert_eq!(agent.metrics().snapshot().notifications_failed_total, 1);
    Ok(())
}
