//! Backend that drives the `docker` command-line client.

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::process::{Command, Output, Stdio};
use std::time::{Duration, Instant};

use convoy_common::error::{ConvoyError, Result};
use serde::Deserialize;

use super::{ContainerBackend, CreateRequest, InspectInfo};

/// How often a bounded wait checks whether the container exited.
const WAIT_POLL_INTERVAL: Duration = Duration::from_millis(200);

/// Stderr fragments docker prints when an inspected object does not exist.
const NOT_FOUND_MARKERS: [&str; 3] = ["No such container", "No such image", "No such object"];

/// Backend that shells out to the Docker CLI.
#[derive(Debug, Clone)]
pub struct DockerCliBackend {
    binary: PathBuf,
}

impl DockerCliBackend {
    /// Locates the runtime binary (on `PATH` if not absolute).
    ///
    /// # Errors
    ///
    /// Returns [`ConvoyError::NotFound`] if the binary cannot be found.
    pub fn new(binary: &Path) -> Result<Self> {
        let binary = which::which(binary).map_err(|_| ConvoyError::NotFound {
            kind: "container runtime binary",
            id: binary.display().to_string(),
        })?;
        tracing::debug!(binary = %binary.display(), "using docker CLI backend");
        Ok(Self { binary })
    }

    fn output(&self, operation: &'static str, target: &str, args: &[&str]) -> Result<Output> {
        tracing::trace!(operation, target, ?args, "invoking docker");
        Command::new(&self.binary)
            .args(args)
            .output()
            .map_err(|e| ConvoyError::runtime(target, operation, e))
    }

    /// Runs a command that must succeed and returns its stdout.
    fn run(&self, operation: &'static str, target: &str, args: &[&str]) -> Result<String> {
        let output = self.output(operation, target, args)?;
        if !output.status.success() {
            return Err(ConvoyError::runtime(
                target,
                operation,
                String::from_utf8_lossy(&output.stderr).trim(),
            ));
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }

    /// Runs an inspect command that answers whether an object exists.
    ///
    /// Only a "no such ..." failure means absent; any other failure (an
    /// unreachable daemon, a permission error) is a runtime error.
    fn exists(&self, operation: &'static str, target: &str, args: &[&str]) -> Result<bool> {
        let output = self.output(operation, target, args)?;
        if output.status.success() {
            return Ok(true);
        }
        let stderr = String::from_utf8_lossy(&output.stderr);
        if is_not_found(&stderr) {
            return Ok(false);
        }
        Err(ConvoyError::runtime(target, operation, stderr.trim()))
    }

    fn wait_bounded(&self, name: &str, timeout: Duration) -> Result<Output> {
        let mut child = Command::new(&self.binary)
            .args(["wait", name])
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| ConvoyError::runtime(name, "wait", e))?;

        let deadline = Instant::now() + timeout;
        while child
            .try_wait()
            .map_err(|e| ConvoyError::runtime(name, "wait", e))?
            .is_none()
        {
            if Instant::now() >= deadline {
                let _ = child.kill();
                let _ = child.wait();
                return Err(ConvoyError::HookTimeout {
                    container: name.to_string(),
                    timeout,
                });
            }
            std::thread::sleep(WAIT_POLL_INTERVAL);
        }
        child
            .wait_with_output()
            .map_err(|e| ConvoyError::runtime(name, "wait", e))
    }
}

impl ContainerBackend for DockerCliBackend {
    fn image_exists(&self, image: &str) -> Result<bool> {
        self.exists("image inspect", image, &["image", "inspect", "--format", "{{.Id}}", image])
    }

    fn pull_image(&self, image: &str) -> Result<()> {
        tracing::info!(image, "pulling image");
        let _ = self.run("pull", image, &["pull", "--quiet", image])?;
        Ok(())
    }

    fn container_exists(&self, name: &str) -> Result<bool> {
        self.exists("inspect", name, &["container", "inspect", "--format", "{{.Id}}", name])
    }

    fn container_running(&self, name: &str) -> Result<bool> {
        let out = self.run(
            "inspect",
            name,
            &["container", "inspect", "--format", "{{.State.Running}}", name],
        )?;
        Ok(out.trim() == "true")
    }

    fn inspect(&self, name: &str) -> Result<InspectInfo> {
        let out = self.run("inspect", name, &["container", "inspect", name])?;
        parse_inspect(name, &out)
    }

    fn create(&self, request: &CreateRequest) -> Result<()> {
        let args = create_args(request);
        let args: Vec<&str> = args.iter().map(String::as_str).collect();
        let _ = self.run("create", &request.name, &args)?;
        Ok(())
    }

    fn start(&self, name: &str) -> Result<()> {
        let _ = self.run("start", name, &["start", name])?;
        Ok(())
    }

    fn stop(&self, name: &str, timeout: Duration) -> Result<()> {
        let secs = timeout.as_secs().to_string();
        let _ = self.run("stop", name, &["stop", "--time", &secs, name])?;
        Ok(())
    }

    fn remove(&self, name: &str) -> Result<()> {
        let _ = self.run("remove", name, &["rm", name])?;
        Ok(())
    }

    fn wait_for_exit(&self, name: &str, timeout: Option<Duration>) -> Result<i64> {
        let output = match timeout {
            Some(limit) => self.wait_bounded(name, limit)?,
            None => self.output("wait", name, &["wait", name])?,
        };
        if !output.status.success() {
            return Err(ConvoyError::runtime(
                name,
                "wait",
                String::from_utf8_lossy(&output.stderr).trim(),
            ));
        }
        let stdout = String::from_utf8_lossy(&output.stdout);
        stdout.trim().parse().map_err(|_| {
            ConvoyError::runtime(name, "wait", format!("unexpected exit code output: {stdout}"))
        })
    }

    fn fetch_logs(&self, name: &str) -> Result<String> {
        let output = self.output("logs", name, &["logs", name])?;
        if !output.status.success() {
            return Err(ConvoyError::runtime(
                name,
                "logs",
                String::from_utf8_lossy(&output.stderr).trim(),
            ));
        }
        let mut logs = String::from_utf8_lossy(&output.stdout).into_owned();
        logs.push_str(&String::from_utf8_lossy(&output.stderr));
        Ok(logs)
    }
}

/// Builds the `docker create` argument vector for a request.
#[must_use]
pub fn create_args(request: &CreateRequest) -> Vec<String> {
    let mut args = vec!["create".to_string(), "--name".to_string(), request.name.clone()];
    let mut flag = |name: &str, value: String| {
        args.push(name.to_string());
        args.push(value);
    };

    for (key, value) in &request.env {
        flag("--env", format!("{key}={value}"));
    }
    if let Some(hostname) = &request.hostname {
        flag("--hostname", hostname.clone());
    }
    for volume in &request.volumes {
        flag("--volume", volume.clone());
    }
    for port in &request.exposed_ports {
        flag("--expose", port.clone());
    }
    for (container_port, host) in &request.port_bindings {
        flag("--publish", format!("{host}:{container_port}"));
    }
    for (name, alias) in &request.links {
        flag("--link", format!("{name}:{alias}"));
    }
    if let Some(shares) = request.cpu_shares {
        flag("--cpu-shares", shares.to_string());
    }
    for ulimit in &request.ulimits {
        flag("--ulimit", format!("{}={}:{}", ulimit.name, ulimit.soft, ulimit.hard));
    }
    if let Some(mode) = &request.network_mode {
        flag("--network", mode.clone());
    }
    if let Some(mode) = &request.ipc_mode {
        flag("--ipc", mode.clone());
    }
    if let Some(mode) = &request.pid_mode {
        flag("--pid", mode.clone());
    }
    if request.privileged {
        args.push("--privileged".to_string());
    }
    args.push(request.image.clone());
    args.extend(request.command.iter().cloned());
    args
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct InspectDocument {
    config: InspectConfig,
    state: InspectState,
    #[serde(default)]
    host_config: InspectHostConfig,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct InspectConfig {
    image: String,
    #[serde(default)]
    env: Option<Vec<String>>,
    #[serde(default)]
    exposed_ports: Option<BTreeMap<String, serde_json::Value>>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct InspectState {
    running: bool,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct InspectHostConfig {
    #[serde(default)]
    binds: Option<Vec<String>>,
    #[serde(default)]
    links: Option<Vec<String>>,
}

fn is_not_found(stderr: &str) -> bool {
    NOT_FOUND_MARKERS.iter().any(|marker| stderr.contains(marker))
}

/// Parses `docker container inspect` output.
///
/// Links come back as `/target:/owner/alias` and are normalized to
/// `target:alias`.
fn parse_inspect(name: &str, json: &str) -> Result<InspectInfo> {
    let documents: Vec<InspectDocument> = serde_json::from_str(json)?;
    let doc = documents
        .into_iter()
        .next()
        .ok_or_else(|| ConvoyError::runtime(name, "inspect", "empty inspect output"))?;

    let env = doc.config.env.map(|vars| {
        vars.into_iter()
            .map(|var| match var.split_once('=') {
                Some((key, value)) => (key.to_string(), value.to_string()),
                None => (var, String::new()),
            })
            .collect()
    });
    let links = doc.host_config.links.map(|links| {
        links
            .iter()
            .filter_map(|link| {
                let (target, alias) = link.split_once(':')?;
                let alias = alias.rsplit('/').next().unwrap_or(alias);
                Some(format!("{}:{alias}", target.trim_start_matches('/')))
            })
            .collect()
    });

    Ok(InspectInfo {
        image: doc.config.image,
        running: doc.state.running,
        env,
        exposed_ports: doc
            .config
            .exposed_ports
            .map(|ports| ports.into_keys().collect()),
        volumes: doc.host_config.binds.map(|b| b.into_iter().collect::<BTreeSet<_>>()),
        links,
    })
}
