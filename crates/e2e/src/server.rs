//! Server management - spawning and health checking the application under test

use std::collections::BTreeMap;
use std::io::{BufRead, BufReader, Read};
use std::path::PathBuf;
use std::process::{Child, Command, Stdio};
use std::time::Duration;
use testbed_common::{PollConfig, PollError, Poller};
use tracing::{debug, info, warn};

use crate::error::{E2eError, E2eResult};

/// Handle to a running server process
pub struct ServerHandle {
    child: Child,
    pub base_url: String,
    pub port: u16,
}

impl ServerHandle {
    /// Spawn the server and wait until its health endpoint answers
    pub async fn spawn(config: ServerConfig) -> E2eResult<Self> {
        let port = match config.port {
            Some(port) => port,
            None => find_free_port()?,
        };
        let base_url = format!("http://127.0.0.1:{}", port);

        info!("Spawning {} on port {}", config.binary_path.display(), port);

        let mut cmd = Command::new(&config.binary_path);
        cmd.args(&config.args)
            .env(&config.port_env, port.to_string())
            .envs(&config.env)
            .stdout(Stdio::null())
            .stderr(Stdio::piped());

        if let Some(dir) = &config.current_dir {
            cmd.current_dir(dir);
        }

        let child = cmd.spawn().map_err(|e| {
            E2eError::ServerStartup(format!(
                "Failed to spawn {}: {}",
                config.binary_path.display(),
                e
            ))
        })?;

        let mut handle = ServerHandle {
            child,
            base_url: base_url.clone(),
            port,
        };

        // An unread pipe fills up and blocks the server's writes
        if let Some(stderr) = handle.child.stderr.take() {
            forward_stderr(stderr)?;
        }

        handle.wait_for_healthy(&config.health_path, config.startup).await?;

        info!("Server is healthy at {}", base_url);
        Ok(handle)
    }

    /// Poll the health endpoint until it returns a 2xx
    async fn wait_for_healthy(&mut self, health_path: &str, startup: PollConfig) -> E2eResult<()> {
        let health_url = format!("{}{}", self.base_url, health_path);
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(2))
            .build()?;

        let child = &mut self.child;
        let result = Poller::new(startup)
            .describe(format!("{} to report healthy", health_url))
            .run_until(|| {
                // A server that already exited will never become healthy
                let exited = child.try_wait();
                let request = client.get(&health_url).send();
                async move {
                    match exited {
                        Ok(Some(status)) => {
                            return Err(E2eError::ServerStartup(format!(
                                "server exited during startup with {}",
                                status
                            )))
                        }
                        Ok(None) => {}
                        Err(e) => return Err(E2eError::Io(e)),
                    }

                    match request.await {
                        Ok(resp) if resp.status().is_success() => Ok(true),
                        Ok(resp) => {
                            warn!("Health check returned {}", resp.status());
                            Ok(false)
                        }
                        Err(e) => {
                            // Connection refused is expected while the server is starting
                            if !e.is_connect() {
                                warn!("Health check error: {}", e);
                            }
                            Ok(false)
                        }
                    }
                }
            })
            .await;

        match result {
            Ok(_) => Ok(()),
            Err(PollError::Timeout(t)) => Err(E2eError::ServerHealthCheck(t)),
            Err(other) => Err(other.into()),
        }
    }

    /// Get the base URL for this server
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Stop the server
    pub fn stop(&mut self) -> E2eResult<()> {
        if let Ok(Some(_)) = self.child.try_wait() {
            return Ok(());
        }

        info!("Stopping server (pid: {})", self.child.id());

        // Try graceful shutdown first
        #[cfg(unix)]
        {
            use nix::sys::signal::{kill, Signal};
            use nix::unistd::Pid;

            let pid = Pid::from_raw(self.child.id() as i32);
            if kill(pid, Signal::SIGTERM).is_ok() {
                std::thread::sleep(Duration::from_millis(500));
            }
        }

        // Force kill if still running
        let _ = self.child.kill();
        self.child.wait()?;

        Ok(())
    }
}

impl Drop for ServerHandle {
    fn drop(&mut self) {
        let _ = self.stop();
    }
}

/// Configuration for spawning a server
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Path to the server binary
    pub binary_path: PathBuf,

    /// Command-line arguments
    pub args: Vec<String>,

    /// Extra environment variables
    pub env: BTreeMap<String, String>,

    /// Environment variable the server reads its port from
    pub port_env: String,

    /// Port to listen on (None = find free port)
    pub port: Option<u16>,

    /// Path polled until it returns a 2xx
    pub health_path: String,

    /// How long to wait for the health check, and how often to try
    pub startup: PollConfig,

    /// Working directory for the process
    pub current_dir: Option<PathBuf>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            binary_path: PathBuf::from("target/debug/app"),
            args: Vec::new(),
            env: BTreeMap::new(),
            port_env: "PORT".to_string(),
            port: None,
            health_path: "/health".to_string(),
            startup: PollConfig::new(30_000, 100),
            current_dir: None,
        }
    }
}

/// Drain the server's stderr on a background thread, one `debug!` per line
fn forward_stderr(stderr: impl Read + Send + 'static) -> E2eResult<()> {
    std::thread::Builder::new()
        .name("server-stderr".to_string())
        .spawn(move || {
            for line in BufReader::new(stderr).split(b'\n') {
                match line {
                    Ok(line) => debug!(target: "server", "{}", String::from_utf8_lossy(&line)),
                    Err(_) => break,
                }
            }
        })?;
    Ok(())
}

/// Find a free port to use
fn find_free_port() -> E2eResult<u16> {
    use std::net::TcpListener;

    let listener = TcpListener::bind("127.0.0.1:0").map_err(|e| {
        E2eError::ServerStartup(format!("Failed to bind to find free port: {}", e))
    })?;
    Ok(listener.local_addr()?.port())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_find_free_port() {
        let port1 = find_free_port().unwrap();
        let port2 = find_free_port().unwrap();

        // Ports should be in valid range
        assert!(port1 > 1024);
        assert!(port2 > 1024);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_spawn_fails_fast_when_process_exits() {
        let config = ServerConfig {
            binary_path: PathBuf::from("false"),
            startup: PollConfig::new(10_000, 50),
            ..Default::default()
        };

        let start = std::time::Instant::now();
        let err = match ServerHandle::spawn(config).await {
            Ok(_) => panic!("`false` should never become healthy"),
            Err(e) => e,
        };

        assert!(matches!(err, E2eError::ServerStartup(_)), "{}", err);
        assert!(start.elapsed() < Duration::from_secs(5));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_chatty_stderr_does_not_block_startup() {
        // Well past the 64 KiB pipe buffer before the server even binds
        let config = ServerConfig {
            binary_path: PathBuf::from("sh"),
            args: vec![
                "-c".to_string(),
                r#"head -c 200000 /dev/zero >&2; exec python3 -m http.server "$PORT""#.to_string(),
            ],
            health_path: "/".to_string(),
            startup: PollConfig::new(15_000, 100),
            ..Default::default()
        };

        let mut server = ServerHandle::spawn(config).await.unwrap();
        assert!(server.base_url().starts_with("http://127.0.0.1:"));
        let resp = reqwest::get(server.base_url()).await.unwrap();
        assert!(resp.status().is_success());

        server.stop().unwrap();
        assert!(server.child.try_wait().unwrap().is_some());
    }

    #[tokio::test]
    async fn test_missing_binary_is_startup_error() {
        let config = ServerConfig {
            binary_path: PathBuf::from("/nonexistent/testbed-server"),
            ..Default::default()
        };
        let err = match ServerHandle::spawn(config).await {
            Ok(_) => panic!("spawn should fail"),
            Err(e) => e,
        };
        assert!(err.to_string().contains("Failed to spawn"));
    }
}
