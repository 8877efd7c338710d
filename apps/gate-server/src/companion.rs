//! Supervision of the companion process that front-ends this gateway.
//!
//! The supervisor owns the entire lifecycle of the dependent: spawn with a
//! fixed command/workdir, poll its liveness endpoint under a bounded retry
//! policy, and tear it down (together with anything it spawned) when the
//! gateway exits. On Unix the child is placed in its own process group so a
//! single signal reaches the whole transitive tree instead of leaking
//! orphaned grandchildren.

use std::collections::HashMap;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::{Mutex, RwLock};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

#[derive(Debug, thiserror::Error)]
pub enum SupervisorError {
    #[error("failed to launch dependent: {0}")]
    Launch(String),
    #[error("dependent not ready after {attempts} probes")]
    NeverReady { attempts: u32 },
    #[error("supervision cancelled by shutdown")]
    Cancelled,
}

/// Lifecycle of the supervised dependent. `Failed` is terminal for a launch
/// attempt; the gateway decides what to do with it (this design: abort).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CompanionState {
    NotStarted,
    Launching,
    AwaitingReady,
    Ready,
    Terminating,
    Terminated,
    Failed,
}

impl CompanionState {
    pub fn as_str(self) -> &'static str {
        match self {
            CompanionState::NotStarted => "not_started",
            CompanionState::Launching => "launching",
            CompanionState::AwaitingReady => "awaiting_ready",
            CompanionState::Ready => "ready",
            CompanionState::Terminating => "terminating",
            CompanionState::Terminated => "terminated",
            CompanionState::Failed => "failed",
        }
    }
}

/// Read-only snapshot of the process handle, exposed via `status()`.
#[derive(Debug, Clone, Serialize)]
pub struct CompanionStatus {
    pub state: CompanionState,
    pub pid: Option<u32>,
    pub launched_at: Option<DateTime<Utc>>,
    pub attempts: u32,
}

/// Launch and readiness parameters for the dependent process.
#[derive(Debug, Clone)]
pub struct CompanionSpec {
    pub command: String,
    pub args: Vec<String>,
    pub env: HashMap<String, String>,
    pub workdir: Option<PathBuf>,
    pub health_url: String,
    pub initial_delay: Duration,
    pub poll_interval: Duration,
    pub probe_timeout: Duration,
    pub max_retries: u32,
    pub stop_grace: Duration,
}

pub struct CompanionSupervisor {
    spec: CompanionSpec,
    client: reqwest::Client,
    child: Mutex<Option<tokio::process::Child>>,
    status: RwLock<CompanionStatus>,
    cancel: CancellationToken,
}

impl CompanionSupervisor {
    pub fn new(spec: CompanionSpec) -> Result<Arc<Self>, SupervisorError> {
        let client = reqwest::Client::builder()
            .timeout(spec.probe_timeout)
            .build()
            .map_err(|e| SupervisorError::Launch(format!("http client: {e}")))?;
        Ok(Arc::new(Self {
            spec,
            client,
            child: Mutex::new(None),
            status: RwLock::new(CompanionStatus {
                state: CompanionState::NotStarted,
                pid: None,
                launched_at: None,
                attempts: 0,
            }),
            cancel: CancellationToken::new(),
        }))
    }

    pub async fn status(&self) -> CompanionStatus {
        self.status.read().await.clone()
    }

    /// Launch the dependent, then confirm readiness. What the gateway calls.
    pub async fn run(&self) -> Result<(), SupervisorError> {
        self.launch().await?;
        self.await_ready().await
    }

    async fn transition(&self, next: CompanionState, cause: &str) {
        let mut status = self.status.write().await;
        if status.state == next {
            return;
        }
        info!(
            target: "gate::companion",
            from = status.state.as_str(),
            to = next.as_str(),
            cause,
            "companion state transition"
        );
        status.state = next;
    }

    pub async fn launch(&self) -> Result<(), SupervisorError> {
        self.transition(CompanionState::Launching, "gateway startup").await;
        let mut cmd = tokio::process::Command::new(&self.spec.command);
        cmd.args(&self.spec.args);
        cmd.envs(&self.spec.env);
        if let Some(dir) = self.spec.workdir.as_ref() {
            cmd.current_dir(dir);
        }
        cmd.stdin(Stdio::null());
        cmd.stdout(Stdio::null());
        cmd.stderr(Stdio::null());
        cmd.kill_on_drop(true);
        // Own process group, so teardown can signal the whole tree
        #[cfg(unix)]
        cmd.process_group(0);

        match cmd.spawn() {
            Ok(child) => {
                let pid = child.id();
                {
                    let mut status = self.status.write().await;
                    status.pid = pid;
                    status.launched_at = Some(Utc::now());
                }
                *self.child.lock().await = Some(child);
                self.transition(CompanionState::AwaitingReady, "dependent spawned")
                    .await;
                info!(target: "gate::companion", ?pid, command = %self.spec.command, "dependent launched");
                Ok(())
            }
            Err(err) => {
                self.transition(CompanionState::Failed, "spawn failed").await;
                Err(SupervisorError::Launch(err.to_string()))
            }
        }
    }

    /// Bounded readiness loop: fixed initial delay, then at most
    /// `max_retries` probes at `poll_interval` spacing. Cancellation is
    /// checked inside the loop body so shutdown interrupts both the sleeps
    /// and an in-flight probe.
    pub async fn await_ready(&self) -> Result<(), SupervisorError> {
        if !self.sleep_or_cancel(self.spec.initial_delay).await {
            return Err(SupervisorError::Cancelled);
        }
        for attempt in 1..=self.spec.max_retries {
            self.status.write().await.attempts = attempt;
            if let Some(status) = self.dependent_exit_status().await {
                self.transition(CompanionState::Failed, "dependent exited before ready")
                    .await;
                return Err(SupervisorError::Launch(format!(
                    "dependent exited with {status} before becoming ready"
                )));
            }
            let ready = tokio::select! {
                _ = self.cancel.cancelled() => return Err(SupervisorError::Cancelled),
                ready = self.probe() => ready,
            };
            if ready {
                self.transition(CompanionState::Ready, "health probe succeeded")
                    .await;
                return Ok(());
            }
            debug!(
                target: "gate::companion",
                attempt,
                max_retries = self.spec.max_retries,
                "dependent not ready yet"
            );
            if attempt < self.spec.max_retries
                && !self.sleep_or_cancel(self.spec.poll_interval).await
            {
                return Err(SupervisorError::Cancelled);
            }
        }
        self.transition(CompanionState::Failed, "readiness retries exhausted")
            .await;
        Err(SupervisorError::NeverReady {
            attempts: self.spec.max_retries,
        })
    }

    async fn probe(&self) -> bool {
        match self
            .client
            .get(&self.spec.health_url)
            .timeout(self.spec.probe_timeout)
            .send()
            .await
        {
            Ok(resp) => resp.status().is_success(),
            Err(err) => {
                debug!(target: "gate::companion", error = %err, "health probe failed");
                false
            }
        }
    }

    async fn dependent_exit_status(&self) -> Option<std::process::ExitStatus> {
        let mut guard = self.child.lock().await;
        let child = guard.as_mut()?;
        child.try_wait().ok().flatten()
    }

    async fn sleep_or_cancel(&self, dur: Duration) -> bool {
        tokio::select! {
            _ = tokio::time::sleep(dur) => true,
            _ = self.cancel.cancelled() => false,
        }
    }

    /// Terminate the dependent and everything it spawned. Graceful stop
    /// first, escalating to a hard kill after `stop_grace`. Idempotent.
    ///
    /// A handle already in `Failed` keeps that state (terminal per launch
    /// attempt); the live child, if any, is still reaped.
    pub async fn shutdown(&self) {
        self.cancel.cancel();
        let Some(mut child) = self.child.lock().await.take() else {
            return;
        };
        let failed = self.status.read().await.state == CompanionState::Failed;
        if !failed {
            self.transition(CompanionState::Terminating, "gateway shutdown")
                .await;
        }
        let pid = child.id();
        #[cfg(unix)]
        if let Some(pid) = pid {
            signal_group(pid, libc::SIGTERM);
        }
        #[cfg(not(unix))]
        {
            let _ = child.start_kill();
        }
        match tokio::time::timeout(self.spec.stop_grace, child.wait()).await {
            Ok(Ok(status)) => {
                info!(target: "gate::companion", %status, "dependent exited");
            }
            Ok(Err(err)) => {
                warn!(target: "gate::companion", error = %err, "failed to reap dependent");
            }
            Err(_) => {
                warn!(
                    target: "gate::companion",
                    grace_ms = self.spec.stop_grace.as_millis() as u64,
                    "dependent ignored graceful stop; escalating to kill"
                );
                #[cfg(unix)]
                if let Some(pid) = pid {
                    signal_group(pid, libc::SIGKILL);
                }
                let _ = child.kill().await;
            }
        }
        if !failed {
            self.transition(CompanionState::Terminated, "dependent stopped")
                .await;
        }
    }
}

/// Signal the child's whole process group; the child was spawned as its own
/// group leader, so its pid doubles as the pgid.
#[cfg(unix)]
fn signal_group(pid: u32, sig: libc::c_int) {
    unsafe {
        let _ = libc::killpg(pid as libc::pid_t, sig);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{routing::get, Router};
    use std::net::SocketAddr;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn spec(health_url: String) -> CompanionSpec {
        CompanionSpec {
            command: "sleep".into(),
            args: vec!["30".into()],
            env: HashMap::new(),
            workdir: None,
            health_url,
            initial_delay: Duration::from_millis(0),
            poll_interval: Duration::from_millis(20),
            probe_timeout: Duration::from_millis(500),
            max_retries: 5,
            stop_grace: Duration::from_millis(500),
        }
    }

    async fn serve_health(ok_after: u32) -> SocketAddr {
        let hits = Arc::new(AtomicU32::new(0));
        let app = Router::new().route(
            "/health",
            get(move || {
                let hits = hits.clone();
                async move {
                    if hits.fetch_add(1, Ordering::SeqCst) + 1 >= ok_after {
                        axum::http::StatusCode::OK
                    } else {
                        axum::http::StatusCode::SERVICE_UNAVAILABLE
                    }
                }
            }),
        );
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind probe listener");
        let addr = listener.local_addr().expect("probe addr");
        tokio::spawn(async move {
            let _ = axum::serve(listener, app).await;
        });
        addr
    }

    #[cfg(unix)]
    fn process_alive(pid: u32) -> bool {
        unsafe { libc::kill(pid as libc::pid_t, 0) == 0 }
    }

    #[tokio::test]
    async fn spawn_failure_is_fatal_and_marks_failed() {
        let mut spec = spec("http://127.0.0.1:1/health".into());
        spec.command = "gate-no-such-binary".into();
        let sup = CompanionSupervisor::new(spec).expect("supervisor");
        match sup.run().await {
            Err(SupervisorError::Launch(_)) => {}
            other => panic!("expected launch error, got {other:?}"),
        }
        assert_eq!(sup.status().await.state, CompanionState::Failed);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn readiness_polling_is_bounded() {
        // Bind then drop a listener so probes hit a closed port quickly.
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind");
        let addr = listener.local_addr().expect("addr");
        drop(listener);

        let sup = CompanionSupervisor::new(spec(format!("http://{addr}/health")))
            .expect("supervisor");
        match sup.run().await {
            Err(SupervisorError::NeverReady { attempts }) => assert_eq!(attempts, 5),
            other => panic!("expected retries exhausted, got {other:?}"),
        }
        let status = sup.status().await;
        assert_eq!(status.state, CompanionState::Failed);
        assert_eq!(status.attempts, 5);
        sup.shutdown().await;
        // Failed stays terminal even after the child is reaped.
        assert_eq!(sup.status().await.state, CompanionState::Failed);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn becomes_ready_after_dependent_warms_up() {
        let addr = serve_health(3).await;
        let sup = CompanionSupervisor::new(spec(format!("http://{addr}/health")))
            .expect("supervisor");
        sup.run().await.expect("dependent ready");
        let status = sup.status().await;
        assert_eq!(status.state, CompanionState::Ready);
        assert!(status.attempts >= 3);
        assert!(status.launched_at.is_some());

        let pid = status.pid.expect("pid recorded");
        assert!(process_alive(pid));
        sup.shutdown().await;
        assert_eq!(sup.status().await.state, CompanionState::Terminated);
        assert!(!process_alive(pid));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn shutdown_cancels_inflight_polling() {
        // Health endpoint that never reports ready.
        let addr = serve_health(u32::MAX).await;
        let mut spec = spec(format!("http://{addr}/health"));
        spec.max_retries = 1000;
        spec.poll_interval = Duration::from_millis(50);
        let sup = CompanionSupervisor::new(spec).expect("supervisor");
        let runner = {
            let sup = sup.clone();
            tokio::spawn(async move { sup.run().await })
        };
        tokio::time::sleep(Duration::from_millis(120)).await;
        sup.shutdown().await;
        match runner.await.expect("runner join") {
            Err(SupervisorError::Cancelled) => {}
            other => panic!("expected cancellation, got {other:?}"),
        }
        assert_eq!(sup.status().await.state, CompanionState::Terminated);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn teardown_reaches_grandchildren() {
        let addr = serve_health(1).await;
        let mut spec = spec(format!("http://{addr}/health"));
        // Shell parent that spawns its own child; both must die on shutdown.
        spec.command = "sh".into();
        spec.args = vec!["-c".into(), "sleep 30 & wait".into()];
        let sup = CompanionSupervisor::new(spec).expect("supervisor");
        sup.run().await.expect("dependent ready");
        let pid = sup.status().await.pid.expect("pid recorded");
        sup.shutdown().await;
        tokio::time::sleep(Duration::from_millis(100)).await;
        // killpg reached the group leader; a surviving leader would still
        // answer signal 0.
        assert!(!process_alive(pid));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn dependent_exit_before_ready_fails_fast() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind");
        let addr = listener.local_addr().expect("addr");
        drop(listener);

        let mut spec = spec(format!("http://{addr}/health"));
        spec.command = "true".into();
        spec.args = vec![];
        spec.initial_delay = Duration::from_millis(100);
        spec.max_retries = 50;
        let sup = CompanionSupervisor::new(spec).expect("supervisor");
        match sup.run().await {
            Err(SupervisorError::Launch(msg)) => {
                assert!(msg.contains("before becoming ready"), "msg: {msg}")
            }
            other => panic!("expected early-exit failure, got {other:?}"),
        }
        assert_eq!(sup.status().await.state, CompanionState::Failed);
    }
}
