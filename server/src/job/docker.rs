//! Docker CLI container runtime

use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::mpsc;
use tracing::{debug, warn};

use super::runtime::{ContainerProcess, ContainerRuntime, ContainerSpec};
use super::types::{ContainerHandle, JobError};

/// Output lines buffered between the pipe readers and the job task
const LINE_CHANNEL_CAPACITY: usize = 256;

/// Upper bound for short control commands (`stop`, `logs`)
const CONTROL_TIMEOUT: Duration = Duration::from_secs(30);

/// Container runtime driving the `docker` command line
#[derive(Debug, Clone)]
pub struct DockerCli {
    bin: String,
    gpu_probe_bin: String,
}

impl DockerCli {
    pub fn new(bin: impl Into<String>, gpu_probe_bin: impl Into<String>) -> Self {
        Self {
            bin: bin.into(),
            gpu_probe_bin: gpu_probe_bin.into(),
        }
    }

    /// Arguments after the binary for `docker container run`
    pub fn command_args(spec: &ContainerSpec) -> Vec<String> {
        let mut args = vec!["container".to_string(), "run".to_string()];
        if let Some(platform) = &spec.platform {
            args.push("--platform".to_string());
            args.push(platform.clone());
        }
        args.push("-m".to_string());
        args.push(spec.memory_limit.clone());
        if let Some(gpu) = &spec.gpu {
            args.push("--gpus".to_string());
            args.push(gpu.clone());
        }
        args.push("--rm".to_string());
        args.push("--name".to_string());
        args.push(spec.name.clone());
        for mount in &spec.mounts {
            args.push("-v".to_string());
            args.push(format!("{}:{}", mount.host.display(), mount.container));
        }
        args.push(spec.image.clone());
        args.push("/bin/bash".to_string());
        args.push("-c".to_string());
        args.push(spec.command.clone());
        args
    }

    async fn control(&self, args: &[&str]) -> Result<std::process::Output, JobError> {
        let output = Command::new(&self.bin)
            .args(args)
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output();
        tokio::time::timeout(CONTROL_TIMEOUT, output)
            .await
            .map_err(|_| JobError::Runtime(format!("`{} {}` timed out", self.bin, args.join(" "))))?
            .map_err(JobError::from)
    }
}

/// Raw line bytes to text, without the line terminator
fn decode_line(raw: &[u8]) -> String {
    let raw = raw.strip_suffix(b"\n").unwrap_or(raw);
    let raw = raw.strip_suffix(b"\r").unwrap_or(raw);
    String::from_utf8_lossy(raw).into_owned()
}

/// Forward every line of a pipe into the shared channel
///
/// Lines that are not UTF-8 are decoded lossily. The pipe is drained to EOF
/// even after the receiver is gone.
fn forward_lines<R>(pipe: R, tx: mpsc::Sender<String>)
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut reader = BufReader::new(pipe);
        let mut buf = Vec::new();
        let mut receiving = true;
        loop {
            buf.clear();
            match reader.read_until(b'\n', &mut buf).await {
                Ok(0) => break,
                Ok(_) => {
                    if receiving && tx.send(decode_line(&buf)).await.is_err() {
                        receiving = false;
                    }
                }
                Err(e) => {
                    debug!("Container output stream closed: {}", e);
                    break;
                }
            }
        }
    });
}

#[async_trait]
impl ContainerRuntime for DockerCli {
    async fn accelerator_available(&self) -> bool {
        let status = Command::new(&self.gpu_probe_bin)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .await;
        matches!(status, Ok(s) if s.success())
    }

    fn command_line(&self, spec: &ContainerSpec) -> String {
        let mut parts = vec![self.bin.clone()];
        parts.extend(Self::command_args(spec));
        parts.join(" ")
    }

    async fn launch(&self, spec: &ContainerSpec) -> Result<Box<dyn ContainerProcess>, JobError> {
        let mut child = Command::new(&self.bin)
            .args(Self::command_args(spec))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| JobError::Spawn(format!("{}: {}", self.bin, e)))?;

        let (tx, rx) = mpsc::channel(LINE_CHANNEL_CAPACITY);
        if let Some(stdout) = child.stdout.take() {
            forward_lines(stdout, tx.clone());
        }
        if let Some(stderr) = child.stderr.take() {
            forward_lines(stderr, tx);
        }

        Ok(Box::new(DockerProcess {
            handle: ContainerHandle::new(spec.name.clone()),
            child,
            lines: rx,
        }))
    }

    async fn stop(&self, handle: &ContainerHandle) -> Result<(), JobError> {
        let output = self.control(&["stop", handle.as_str()]).await?;
        if output.status.success() {
            Ok(())
        } else {
            Err(JobError::Runtime(
                String::from_utf8_lossy(&output.stderr).trim().to_string(),
            ))
        }
    }

    async fn recent_logs(
        &self,
        handle: &ContainerHandle,
        tail: usize,
    ) -> Result<Vec<String>, JobError> {
        let tail_arg = tail.to_string();
        let output = self
            .control(&["logs", "--tail", &tail_arg, handle.as_str()])
            .await?;
        if !output.status.success() {
            return Err(JobError::Runtime(
                String::from_utf8_lossy(&output.stderr).trim().to_string(),
            ));
        }
        // docker logs replays the container's stderr on our stderr
        let mut lines: Vec<String> = String::from_utf8_lossy(&output.stdout)
            .lines()
            .chain(String::from_utf8_lossy(&output.stderr).lines())
            .map(str::to_string)
            .collect();
        let excess = lines.len().saturating_sub(tail);
        lines.drain(..excess);
        Ok(lines)
    }
}

/// A running `docker container run` child
struct DockerProcess {
    handle: ContainerHandle,
    child: Child,
    lines: mpsc::Receiver<String>,
}

#[async_trait]
impl ContainerProcess for DockerProcess {
    fn handle(&self) -> &ContainerHandle {
        &self.handle
    }

    async fn next_line(&mut self) -> Option<String> {
        self.lines.recv().await
    }

    async fn wait(&mut self) -> Result<i32, JobError> {
        let status = self.child.wait().await?;
        Ok(status.code().unwrap_or(-1))
    }

    async fn terminate(&mut self) {
        if let Err(e) = self.child.start_kill() {
            warn!("Failed to kill docker client for {}: {}", self.handle, e);
            return;
        }
        let _ = self.child.wait().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::runtime::Mount;
    use std::path::PathBuf;

    fn spec() -> ContainerSpec {
        ContainerSpec {
            name: "ctseg-casename00001".to_string(),
            image: "qchen99/suprem:v1".to_string(),
            command: "sh predict.sh".to_string(),
            mounts: vec![
                Mount {
                    host: PathBuf::from("/data/in/casename00001"),
                    container: "/workspace/inputs/casename00001".to_string(),
                },
                Mount {
                    host: PathBuf::from("/data/out/casename00001"),
                    container: "/workspace/outputs/casename00001".to_string(),
                },
            ],
            memory_limit: "128G".to_string(),
            gpu: Some("device=0".to_string()),
            platform: None,
        }
    }

    #[test]
    fn test_command_args_with_gpu() {
        let args = DockerCli::command_args(&spec());
        assert_eq!(
            args,
            vec![
                "container",
                "run",
                "-m",
                "128G",
                "--gpus",
                "device=0",
                "--rm",
                "--name",
                "ctseg-casename00001",
                "-v",
                "/data/in/casename00001:/workspace/inputs/casename00001",
                "-v",
                "/data/out/casename00001:/workspace/outputs/casename00001",
                "qchen99/suprem:v1",
                "/bin/bash",
                "-c",
                "sh predict.sh",
            ]
        );
    }

    #[test]
    fn test_command_args_with_platform_and_no_gpu() {
        let mut spec = spec();
        spec.gpu = None;
        spec.platform = Some("linux/amd64".to_string());
        spec.memory_limit = "64G".to_string();

        let args = DockerCli::command_args(&spec);
        assert_eq!(&args[2..6], &["--platform", "linux/amd64", "-m", "64G"]);
        assert!(!args.iter().any(|a| a == "--gpus"));
    }

    #[test]
    fn test_decode_line_strips_terminators_and_replaces_invalid_bytes() {
        assert_eq!(decode_line(b"Saving results\r\n"), "Saving results");
        assert_eq!(decode_line(b"tail"), "tail");
        assert_eq!(decode_line(b"\xff\xfe progress\n"), "\u{fffd}\u{fffd} progress");
    }

    /// Executable stand-in for the docker binary
    #[cfg(unix)]
    fn fake_docker(script: &str) -> PathBuf {
        use std::os::unix::fs::PermissionsExt;

        let dir = std::env::temp_dir().join(format!("ctseg_docker_{}", uuid::Uuid::new_v4()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("docker");
        std::fs::write(&path, script).unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        path
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_invalid_utf8_output_does_not_stop_the_stream() {
        let script = r#"#!/bin/sh
echo "Loading model"
printf '\377\376 progress\n'
i=0
while [ $i -lt 20000 ]; do
  echo "line $i"
  i=$((i+1))
done
echo "Saving results" >&2
exit 0
"#;
        let bin = fake_docker(script);
        let docker = DockerCli::new(bin.display().to_string(), "true");

        let mut process = docker.launch(&spec()).await.unwrap();
        let mut lines = Vec::new();
        while let Some(line) = process.next_line().await {
            lines.push(line);
        }
        let code = process.wait().await.unwrap();

        assert_eq!(code, 0);
        assert_eq!(lines.len(), 20003);
        assert!(lines.iter().any(|l| l == "Loading model"));
        assert!(lines.iter().any(|l| l.ends_with(" progress") && l.contains('\u{fffd}')));
        assert!(lines.iter().any(|l| l == "line 19999"));
        assert!(lines.iter().any(|l| l == "Saving results"));
    }

    #[test]
    fn test_command_line_starts_with_binary() {
        let docker = DockerCli::new("docker", "nvidia-smi");
        let line = docker.command_line(&spec());
        assert!(line.starts_with("docker container run -m 128G"));
        assert!(line.ends_with("/bin/bash -c sh predict.sh"));
    }
}
