//! `docker` CLI executor
//!
//! Every action is one or two short-lived `docker` invocations bounded
//! by a timeout. Non-zero exits are turned into failure outcomes
//! carrying docker's stderr.

use std::process::Output;
use std::sync::RwLock;
use std::time::Duration;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::{debug, info, warn};

use super::{Action, CommandExecutor, CommandOutcome, ContainerInfo, ExecutorError};
use crate::config::ContainerSettings;

/// Time allowed for `docker info` at startup
const AVAILABILITY_TIMEOUT: Duration = Duration::from_secs(5);

/// Why a docker invocation produced no output
#[derive(Debug)]
enum InvokeError {
    Io(std::io::Error),
    Timeout,
}

/// Executor backed by the local `docker` binary
pub struct DockerExecutor {
    program: String,
    leading_args: Vec<String>,
    /// Retargetable at runtime; every action works on one snapshot
    container: RwLock<ContainerSettings>,
    timeout: Duration,
}

impl DockerExecutor {
    /// Create an executor for the given container
    pub fn new(container: ContainerSettings, timeout: Duration) -> Self {
        Self::with_program("docker", container, timeout)
    }

    /// Create an executor invoking a different binary
    pub fn with_program(
        program: impl Into<String>,
        container: ContainerSettings,
        timeout: Duration,
    ) -> Self {
        Self::with_command(program, Vec::new(), container, timeout)
    }

    /// Create an executor whose invocations start with `program leading_args..`
    pub fn with_command(
        program: impl Into<String>,
        leading_args: Vec<String>,
        container: ContainerSettings,
        timeout: Duration,
    ) -> Self {
        Self {
            program: program.into(),
            leading_args,
            container: RwLock::new(container),
            timeout,
        }
    }

    /// Current target container
    fn settings(&self) -> ContainerSettings {
        match self.container.read() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    /// Check that docker is installed and its daemon answers
    pub async fn check_available(&self) -> Result<(), ExecutorError> {
        match self.invoke(&["info"], AVAILABILITY_TIMEOUT).await {
            Ok(output) if output.status.success() => {
                info!("docker is available");
                Ok(())
            }
            Ok(output) => Err(ExecutorError::DaemonDown(stderr_of(&output))),
            Err(InvokeError::Timeout) => Err(ExecutorError::Timeout(AVAILABILITY_TIMEOUT)),
            Err(InvokeError::Io(e)) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(ExecutorError::NotInstalled)
            }
            Err(InvokeError::Io(e)) => Err(e.into()),
        }
    }

    /// Run one docker invocation with a deadline
    async fn invoke(&self, args: &[&str], limit: Duration) -> Result<Output, InvokeError> {
        debug!(program = %self.program, ?args, "invoking docker");

        let child = Command::new(&self.program)
            .args(&self.leading_args)
            .args(args)
            .kill_on_drop(true)
            .output();

        match tokio::time::timeout(limit, child).await {
            Ok(result) => result.map_err(InvokeError::Io),
            Err(_) => Err(InvokeError::Timeout),
        }
    }

    /// Run a docker invocation and map its exit status to an outcome
    async fn run_step(&self, args: &[&str], ok: String, failed: &str) -> CommandOutcome {
        match self.invoke(args, self.timeout).await {
            Ok(output) if output.status.success() => CommandOutcome::ok(ok),
            Ok(output) => CommandOutcome::failed(format!("{failed}: {}", stderr_of(&output))),
            Err(e) => invoke_failure(e),
        }
    }

    /// Whether a container called `name` exists (any state)
    async fn container_exists(&self, name: &str) -> Result<bool, InvokeError> {
        let filter = format!("name={name}");
        let output = self
            .invoke(
                &["ps", "-a", "--filter", filter.as_str(), "--format", "{{.Names}}"],
                self.timeout,
            )
            .await?;

        let stdout = String::from_utf8_lossy(&output.stdout);
        Ok(stdout.lines().any(|line| line.trim() == name))
    }

    async fn pull(&self, container: &ContainerSettings) -> CommandOutcome {
        let image = container.image.as_str();
        self.run_step(
            &["pull", image],
            format!("Image {image} pulled"),
            "Failed to pull image",
        )
        .await
    }

    async fn launch(&self, container: &ContainerSettings) -> CommandOutcome {
        let name = container.name.as_str();
        match self.container_exists(name).await {
            Ok(true) => {
                return CommandOutcome::failed("Container already exists. Use Start or Remove.")
            }
            Ok(false) => {}
            Err(e) => return invoke_failure(e),
        }

        let ports = format!("{}:{}", container.host_port, container.container_port);
        self.run_step(
            &[
                "run",
                "-d",
                "--name",
                name,
                "-p",
                ports.as_str(),
                container.image.as_str(),
            ],
            format!("Container {name} launched on port {}", container.host_port),
            "Failed to launch container",
        )
        .await
    }

    async fn stop(&self, name: &str) -> CommandOutcome {
        self.run_step(
            &["stop", name],
            format!("Container {name} stopped"),
            "Container not found or already stopped",
        )
        .await
    }

    async fn start(&self, name: &str) -> CommandOutcome {
        self.run_step(
            &["start", name],
            format!("Container {name} started"),
            "Container not found or failed to start",
        )
        .await
    }

    async fn remove(&self, name: &str) -> CommandOutcome {
        // rm refuses running containers; a failed stop is fine here
        if let Err(e) = self.invoke(&["stop", name], self.timeout).await {
            warn!(?e, container = %name, "stop before remove failed");
        }

        self.run_step(
            &["rm", name],
            format!("Container {name} removed"),
            "Container not found or failed to remove",
        )
        .await
    }
}

#[async_trait]
impl CommandExecutor for DockerExecutor {
    async fn execute(&self, action: Action) -> CommandOutcome {
        let container = self.settings();
        info!(%action, container = %container.name, "executing docker command");

        match action {
            Action::Pull => self.pull(&container).await,
            Action::Run => self.launch(&container).await,
            Action::Stop => self.stop(&container.name).await,
            Action::Start => self.start(&container.name).await,
            Action::Remove => self.remove(&container.name).await,
        }
    }

    async fn container_info(&self) -> ContainerInfo {
        let name = self.settings().name;
        let filter = format!("name={name}");
        let args = [
            "ps",
            "-a",
            "--filter",
            filter.as_str(),
            "--format",
            "{{.Names}}\t{{.Status}}\t{{.Ports}}",
        ];

        match self.invoke(&args, self.timeout).await {
            Ok(output) => parse_container_row(&String::from_utf8_lossy(&output.stdout), &name),
            Err(e) => ContainerInfo {
                status: format!("Error: {e:?}"),
                ..ContainerInfo::missing()
            },
        }
    }

    async fn set_container(&self, name: Option<String>, image: Option<String>) -> ContainerSettings {
        let mut guard = match self.container.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        if let Some(name) = name {
            guard.name = name;
        }
        if let Some(image) = image {
            guard.image = image;
        }
        info!(container = %guard.name, image = %guard.image, "target container changed");
        guard.clone()
    }
}

/// Outcome for an invocation that never produced an exit status
fn invoke_failure(err: InvokeError) -> CommandOutcome {
    match err {
        InvokeError::Timeout => CommandOutcome::failed("Command timed out. Docker may be busy."),
        InvokeError::Io(e) => CommandOutcome::failed(format!("Error executing command: {e}")),
    }
}

/// Pick the row for `name` out of `docker ps` output
fn parse_container_row(stdout: &str, name: &str) -> ContainerInfo {
    let row = stdout
        .lines()
        .map(|line| line.split('\t').collect::<Vec<_>>())
        .find(|parts| parts.first().map(|n| n.trim()) == Some(name));

    match row {
        Some(parts) => {
            let status = parts.get(1).map_or("Unknown", |s| s.trim()).to_string();
            let ports = match parts.get(2).map(|s| s.trim()) {
                Some(p) if !p.is_empty() => p.to_string(),
                _ => "N/A".to_string(),
            };
            ContainerInfo {
                exists: true,
                running: status.starts_with("Up"),
                status,
                ports,
            }
        }
        None => ContainerInfo::missing(),
    }
}

fn stderr_of(output: &Output) -> String {
    String::from_utf8_lossy(&output.stderr).trim().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;

    /// Write a fake `docker` script that logs its arguments and answers from `body`
    fn fake_docker(dir: &Path, body: &str) -> String {
        let path = dir.join("docker.sh");
        let log = dir.join("calls.log");
        let script = format!(
            "#!/bin/sh\necho \"$@\" >> '{}'\n{}\n",
            log.display(),
            body
        );
        std::fs::write(&path, script).unwrap();
        path.to_string_lossy().into_owned()
    }

    fn calls(dir: &Path) -> Vec<String> {
        std::fs::read_to_string(dir.join("calls.log"))
            .unwrap_or_default()
            .lines()
            .map(str::to_string)
            .collect()
    }

    fn executor(script: String) -> DockerExecutor {
        scripted(script, Duration::from_secs(5))
    }

    // Run through sh so the script is never exec'd while still open for writing
    fn scripted(script: String, timeout: Duration) -> DockerExecutor {
        DockerExecutor::with_command("sh", vec![script], ContainerSettings::default(), timeout)
    }

    #[test]
    fn test_parse_running_container() {
        let out = "finger_controlled_container\tUp 3 minutes\t0.0.0.0:8080->80/tcp\n";
        let info = parse_container_row(out, "finger_controlled_container");
        assert!(info.exists);
        assert!(info.running);
        assert_eq!(info.ports, "0.0.0.0:8080->80/tcp");
    }

    #[test]
    fn test_parse_stopped_and_missing() {
        let out = "finger_controlled_container\tExited (0) 2 seconds ago\t\n";
        let info = parse_container_row(out, "finger_controlled_container");
        assert!(info.exists);
        assert!(!info.running);
        assert_eq!(info.ports, "N/A");

        // Filter matches substrings; only the exact name counts
        let out = "finger_controlled_container_old\tUp 1 hour\t\n";
        assert_eq!(
            parse_container_row(out, "finger_controlled_container"),
            ContainerInfo::missing()
        );
    }

    #[tokio::test]
    async fn test_missing_binary_is_not_installed() {
        let exec = DockerExecutor::with_program(
            "/nonexistent/docker-binary",
            ContainerSettings::default(),
            Duration::from_secs(5),
        );
        assert!(matches!(
            exec.check_available().await,
            Err(ExecutorError::NotInstalled)
        ));

        let outcome = exec.execute(Action::Pull).await;
        assert!(!outcome.success);
    }

    #[tokio::test]
    async fn test_daemon_down() {
        let tmp = tempfile::tempdir().unwrap();
        let script = fake_docker(tmp.path(), "echo 'cannot connect' >&2; exit 1");
        let err = executor(script).check_available().await.unwrap_err();
        assert!(matches!(err, ExecutorError::DaemonDown(ref msg) if msg == "cannot connect"));
    }

    #[tokio::test]
    async fn test_pull_success_and_failure() {
        let tmp = tempfile::tempdir().unwrap();
        let ok = executor(fake_docker(tmp.path(), "exit 0"));
        let outcome = ok.execute(Action::Pull).await;
        assert_eq!(outcome, CommandOutcome::ok("Image nginx:latest pulled"));
        assert_eq!(calls(tmp.path()), vec!["pull nginx:latest"]);

        let tmp = tempfile::tempdir().unwrap();
        let bad = executor(fake_docker(tmp.path(), "echo 'no such image' >&2; exit 1"));
        let outcome = bad.execute(Action::Pull).await;
        assert!(!outcome.success);
        assert_eq!(outcome.message, "Failed to pull image: no such image");
    }

    #[tokio::test]
    async fn test_run_refuses_existing_container() {
        let tmp = tempfile::tempdir().unwrap();
        let exec = executor(fake_docker(
            tmp.path(),
            "[ \"$1\" = ps ] && echo finger_controlled_container; exit 0",
        ));
        let outcome = exec.execute(Action::Run).await;
        assert!(!outcome.success);
        assert!(outcome.message.contains("already exists"));
        assert_eq!(calls(tmp.path()).len(), 1);
    }

    #[tokio::test]
    async fn test_run_launches_with_port_mapping() {
        let tmp = tempfile::tempdir().unwrap();
        let exec = executor(fake_docker(tmp.path(), "exit 0"));
        let outcome = exec.execute(Action::Run).await;
        assert!(outcome.success, "{}", outcome.message);
        assert_eq!(
            calls(tmp.path())[1],
            "run -d --name finger_controlled_container -p 8080:80 nginx:latest"
        );
    }

    #[tokio::test]
    async fn test_remove_stops_first() {
        let tmp = tempfile::tempdir().unwrap();
        let exec = executor(fake_docker(tmp.path(), "[ \"$1\" = stop ] && exit 1; exit 0"));
        let outcome = exec.execute(Action::Remove).await;
        assert!(outcome.success);
        assert_eq!(
            calls(tmp.path()),
            vec![
                "stop finger_controlled_container",
                "rm finger_controlled_container"
            ]
        );
    }

    #[tokio::test]
    async fn test_timeout_reports_failure() {
        let tmp = tempfile::tempdir().unwrap();
        let exec = scripted(fake_docker(tmp.path(), "sleep 5"), Duration::from_millis(100));
        let outcome = exec.execute(Action::Stop).await;
        assert!(!outcome.success);
        assert!(outcome.message.contains("timed out"));
    }

    #[tokio::test]
    async fn test_retarget_applies_to_next_action() {
        let tmp = tempfile::tempdir().unwrap();
        let exec = executor(fake_docker(tmp.path(), "exit 0"));

        let updated = exec
            .set_container(Some("web".to_string()), Some("httpd:2.4".to_string()))
            .await;
        assert_eq!(updated.name, "web");
        assert_eq!(updated.host_port, 8080);

        exec.execute(Action::Pull).await;
        exec.execute(Action::Stop).await;

        // Name only; the image stays
        exec.set_container(Some("api".to_string()), None).await;
        exec.execute(Action::Start).await;

        assert_eq!(
            calls(tmp.path()),
            vec!["pull httpd:2.4", "stop web", "start api"]
        );
    }

    #[test]
    fn test_invoke_failure_messages() {
        assert!(invoke_failure(InvokeError::Timeout).message.contains("timed out"));

        let err = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied");
        let outcome = invoke_failure(InvokeError::Io(err));
        assert!(!outcome.success);
        assert_eq!(outcome.message, "Error executing command: denied");
    }
}
