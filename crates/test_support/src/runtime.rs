//! Container runtime discovery for testcontainers.

use anyhow::{Result, bail};
use std::{
    env,
    os::unix::net::UnixStream,
    path::{Path, PathBuf},
    sync::OnceLock,
};

/// Ensure a Docker-compatible API socket is reachable before starting
/// containers. Prefers `DOCKER_HOST`, then the Docker socket, then a running
/// Podman socket (exported via `DOCKER_HOST` for testcontainers).
///
/// # Errors
/// Returns an error naming the sockets that were tried when none accepts
/// connections.
pub fn ensure_container_runtime() -> Result<()> {
    static INIT: OnceLock<Result<(), String>> = OnceLock::new();
    match INIT.get_or_init(discover_runtime) {
        Ok(()) => Ok(()),
        Err(message) => bail!("{message}"),
    }
}

fn discover_runtime() -> Result<(), String> {
    if let Ok(docker_host) = env::var("DOCKER_HOST") {
        let path = docker_host
            .strip_prefix("unix://")
            .map_or_else(|| PathBuf::from(&docker_host), PathBuf::from);
        if !docker_host.contains("://") || docker_host.starts_with("unix://") {
            if connectable(&path) {
                return Ok(());
            }
            return Err(format!(
                "DOCKER_HOST points to `{docker_host}` but the socket is not accepting connections"
            ));
        }
        // TCP endpoints are taken on faith; testcontainers reports failures itself.
        return Ok(());
    }

    let docker = Path::new("/var/run/docker.sock");
    if connectable(docker) {
        return Ok(());
    }

    if let Some(podman) = podman_socket() {
        if connectable(&podman) {
            // SAFETY: set once during test bootstrap, before any container starts.
            unsafe {
                env::set_var("DOCKER_HOST", format!("unix://{}", podman.display()));
            }
            return Ok(());
        }
        return Err(format!(
            "Podman socket found at `{}` but it is not accepting connections; start `podman.socket`",
            podman.display()
        ));
    }

    Err(
        "No container runtime found: start the Docker daemon or `podman.socket`, or set DOCKER_HOST"
            .to_string(),
    )
}

fn podman_socket() -> Option<PathBuf> {
    let mut candidates = Vec::new();
    if let Ok(runtime_dir) = env::var("XDG_RUNTIME_DIR") {
        candidates.push(PathBuf::from(runtime_dir).join("podman/podman.sock"));
    }
    candidates.push(PathBuf::from("/run/podman/podman.sock"));
    candidates.push(PathBuf::from("/var/run/podman/podman.sock"));
    candidates.into_iter().find(|path| path.exists())
}

fn connectable(path: &Path) -> bool {
    path.exists() && UnixStream::connect(path).is_ok()
}
