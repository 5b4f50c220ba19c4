// ─── Session Controller ───
// Owns the single supervised server process. Every lifecycle operation
// goes through `inner`, so at most one process exists at a time. Console
// writes hold only the stdin lock, never `inner`.

use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde::Serialize;
use tokio::io::AsyncWriteExt;
use tokio::process::{ChildStdin, Command};
use tokio::sync::{watch, Mutex};
use tracing::{debug, error, info, warn};

use crate::core::config::ConfigSource;
use crate::core::error::{PanelError, PanelResult};
use crate::core::events::LogBuffer;
use crate::core::loaders::process::LossyLines;
use crate::core::loaders::{ProvisionContext, SessionProvisioner};
use crate::core::telemetry::{
    max_players_from_properties, ProbeTarget, ServerStatus, TelemetryCollector,
};

use super::model::{SessionInfo, SessionRequest, SessionState};

const STOP_INSTRUCTION: &str = "stop";
const SAVE_INSTRUCTION: &str = "save-all";

/// Longest console command accepted, in bytes.
pub const MAX_COMMAND_LEN: usize = 1024;

/// A server that stops draining stdin fails the write after this long.
const CONSOLE_WRITE_TIMEOUT: Duration = Duration::from_secs(10);

type ConsoleInput = Arc<Mutex<ChildStdin>>;

/// Reply of the `status` operation.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionStatus {
    pub status: ServerStatus,
    pub state: SessionState,
    pub player_count: String,
    pub memory_usage: u64,
    pub host_cpu_load: f64,
    pub session: Option<SessionInfo>,
}

struct LiveSession {
    info: SessionInfo,
    stdin: ConsoleInput,
    generation: u64,
}

async fn write_console(stdin: &ConsoleInput, line: &str) -> PanelResult<()> {
    let payload = format!("{line}\n");
    let write = async {
        let mut stdin = stdin.lock().await;
        stdin.write_all(payload.as_bytes()).await?;
        stdin.flush().await
    };

    match tokio::time::timeout(CONSOLE_WRITE_TIMEOUT, write).await {
        Ok(Ok(())) => Ok(()),
        Ok(Err(err)) => {
            warn!("Could not write to server stdin: {}", err);
            Err(PanelError::NotRunning)
        }
        Err(_) => {
            warn!("Server stdin blocked for {:?}", CONSOLE_WRITE_TIMEOUT);
            Err(PanelError::Other("server console is not accepting input".into()))
        }
    }
}

struct ControllerInner {
    state: SessionState,
    live: Option<LiveSession>,
    last_request: Option<SessionRequest>,
    generation: u64,
}

/// Lifecycle state machine for the supervised server.
///
/// Cloning is cheap and every clone drives the same session.
#[derive(Clone)]
pub struct SessionController {
    config: Arc<dyn ConfigSource>,
    provisioner: Arc<dyn SessionProvisioner>,
    logs: Arc<LogBuffer>,
    telemetry: Arc<TelemetryCollector>,
    inner: Arc<Mutex<ControllerInner>>,
    state_tx: Arc<watch::Sender<SessionState>>,
}

impl SessionController {
    pub fn new(
        config: Arc<dyn ConfigSource>,
        provisioner: Arc<dyn SessionProvisioner>,
        logs: Arc<LogBuffer>,
        telemetry: Arc<TelemetryCollector>,
    ) -> Self {
        let (state_tx, _) = watch::channel(SessionState::Stopped);
        Self {
            config,
            provisioner,
            logs,
            telemetry,
            inner: Arc::new(Mutex::new(ControllerInner {
                state: SessionState::Stopped,
                live: None,
                last_request: None,
                generation: 0,
            })),
            state_tx: Arc::new(state_tx),
        }
    }

    pub fn subscribe_state(&self) -> watch::Receiver<SessionState> {
        self.state_tx.subscribe()
    }

    pub async fn state(&self) -> SessionState {
        self.inner.lock().await.state
    }

    pub async fn last_request(&self) -> Option<SessionRequest> {
        self.inner.lock().await.last_request.clone()
    }

    pub async fn session(&self) -> Option<SessionInfo> {
        self.inner.lock().await.live.as_ref().map(|l| l.info.clone())
    }

    fn transition(&self, inner: &mut ControllerInner, next: SessionState) {
        if inner.state != next {
            debug!("Session state {:?} -> {:?}", inner.state, next);
        }
        inner.state = next;
        self.state_tx.send_replace(next);
    }

    async fn set_state(&self, next: SessionState) {
        let mut inner = self.inner.lock().await;
        self.transition(&mut inner, next);
    }

    // ── Start ───────────────────────────────────────────

    /// Provisions and launches `request`. Rejected outright with
    /// `AlreadyRunning` unless the controller is `Stopped`.
    pub async fn start(&self, request: SessionRequest) -> PanelResult<SessionInfo> {
        {
            let mut inner = self.inner.lock().await;
            if inner.live.is_some() || inner.state != SessionState::Stopped {
                return Err(PanelError::AlreadyRunning);
            }
            self.transition(&mut inner, SessionState::Preparing);
        }

        // Detached so a dropped caller cannot strand the state machine
        // half way through provisioning.
        let this = self.clone();
        let attempt = tokio::spawn(async move {
            let result = this.launch(&request).await;
            if let Err(err) = &result {
                error!(variant = %request.variant, "Start of {} failed: {}", request.game_version, err);
                this.logs.append(format!("[panel] Start failed: {err}")).await;
                this.set_state(SessionState::Stopped).await;
            }
            result
        });

        match attempt.await {
            Ok(result) => result,
            Err(join_err) => {
                self.set_state(SessionState::Stopped).await;
                Err(PanelError::Other(format!("start task aborted: {join_err}")))
            }
        }
    }

    async fn launch(&self, request: &SessionRequest) -> PanelResult<SessionInfo> {
        let settings = self.config.snapshot()?;
        let working_dir = request.working_dir(&settings.server_directory);
        info!(
            variant = %request.variant,
            "Starting {} {} in {:?}",
            request.variant,
            request.game_version,
            working_dir
        );

        self.set_state(SessionState::Provisioning).await;
        let spec = self
            .provisioner
            .provision(
                request,
                ProvisionContext {
                    working_dir: &working_dir,
                    settings: &settings,
                    logs: self.logs.as_ref(),
                },
            )
            .await?;

        self.set_state(SessionState::Launching).await;
        self.logs
            .append(format!("[panel] Launching: {}", spec.command_line()))
            .await;

        let mut child = Command::new(&spec.program)
            .args(&spec.args)
            .current_dir(&spec.working_dir)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| PanelError::io(&spec.working_dir, e))?;

        let Some(stdin) = child.stdin.take() else {
            let _ = child.start_kill();
            return Err(PanelError::Other("server stdin was not captured".into()));
        };

        self.telemetry
            .session_started(max_players_from_properties(&spec.working_dir).await);

        if let Some(out) = child.stdout.take() {
            let logs = self.logs.clone();
            let telemetry = self.telemetry.clone();
            tokio::spawn(async move {
                let mut lines = LossyLines::new(out);
                while let Some(line) = lines.next_line().await {
                    info!("[mc] {}", line);
                    telemetry.observe_line(&line);
                    logs.append(line).await;
                }
            });
        }
        if let Some(err) = child.stderr.take() {
            let logs = self.logs.clone();
            tokio::spawn(async move {
                let mut lines = LossyLines::new(err);
                while let Some(line) = lines.next_line().await {
                    warn!("[mc] {}", line);
                    logs.append(line).await;
                }
            });
        }

        let info = SessionInfo {
            variant: request.variant,
            family: request.variant.family(),
            core: request.variant.core().map(str::to_string),
            game_version: request.game_version.clone(),
            working_dir: spec.working_dir.clone(),
            runtime: spec.runtime_home.clone(),
            pid: child.id(),
            started_at: Utc::now(),
        };

        let generation = {
            let mut inner = self.inner.lock().await;
            inner.generation += 1;
            let generation = inner.generation;
            inner.live = Some(LiveSession {
                info: info.clone(),
                stdin: Arc::new(Mutex::new(stdin)),
                generation,
            });
            inner.last_request = Some(request.clone());
            self.transition(&mut inner, SessionState::Running);
            generation
        };

        let this = self.clone();
        tokio::spawn(async move {
            let outcome = child.wait().await;
            this.on_exit(generation, outcome).await;
        });

        info!(variant = %request.variant, "Server running (pid {:?})", info.pid);
        Ok(info)
    }

    async fn on_exit(&self, generation: u64, outcome: std::io::Result<std::process::ExitStatus>) {
        let message = match &outcome {
            Ok(status) => match status.code() {
                Some(code) => format!("[panel] Server exited with code {code}"),
                None => "[panel] Server terminated by signal".to_string(),
            },
            Err(err) => format!("[panel] Lost track of server process: {err}"),
        };

        {
            let mut inner = self.inner.lock().await;
            if inner.live.as_ref().map(|l| l.generation) != Some(generation) {
                return;
            }
            inner.live = None;
            self.transition(&mut inner, SessionState::Stopped);
        }

        info!("{}", message);
        self.telemetry.session_ended();
        self.logs.append(message).await;
    }

    // ── Stop / restart ──────────────────────────────────

    /// Asks the server to shut down. `Ok(false)` when nothing is running.
    pub async fn stop(&self) -> PanelResult<bool> {
        let Some((stdin, generation)) = self.running_console().await else {
            return Ok(false);
        };

        if let Err(err) = write_console(&stdin, STOP_INSTRUCTION).await {
            warn!("Could not deliver stop instruction: {}", err);
            return Ok(false);
        }

        {
            let mut inner = self.inner.lock().await;
            let same_session = inner.live.as_ref().map(|l| l.generation) == Some(generation);
            if same_session && inner.state == SessionState::Running {
                self.transition(&mut inner, SessionState::Stopping);
            }
        }

        info!("Stop instruction sent");
        self.logs.append("[panel] Stopping server...").await;
        Ok(true)
    }

    /// Stops the current server if any, then starts `request` or the last
    /// successfully started request. Without an explicit request a server
    /// must be running, otherwise `NotRunning`.
    pub async fn restart(&self, request: Option<SessionRequest>) -> PanelResult<SessionInfo> {
        let explicit = request.is_some();
        let request = match request {
            Some(request) => request,
            None => self.last_request().await.ok_or_else(|| {
                PanelError::invalid("no previous session to restart; pass type and version")
            })?,
        };

        let mut states = self.subscribe_state();
        let sent_stop = self.stop().await?;
        let already_stopping = *states.borrow() == SessionState::Stopping;
        if sent_stop || already_stopping {
            states
                .wait_for(|s| *s == SessionState::Stopped)
                .await
                .map_err(|_| PanelError::Other("session controller dropped".into()))?;
        } else if !explicit {
            return Err(PanelError::NotRunning);
        }

        self.start(request).await
    }

    // ── Console input ───────────────────────────────────

    pub async fn save(&self) -> PanelResult<()> {
        self.write_instruction(SAVE_INSTRUCTION).await?;
        self.logs.append("[panel] World save requested").await;
        Ok(())
    }

    pub async fn send_command(&self, text: &str) -> PanelResult<()> {
        let text = text.trim_end_matches(['\r', '\n']).trim();
        if text.is_empty() {
            return Err(PanelError::invalid("command must not be empty"));
        }
        if text.contains(['\r', '\n']) {
            return Err(PanelError::invalid("command must be a single line"));
        }
        if text.len() > MAX_COMMAND_LEN {
            return Err(PanelError::invalid(format!(
                "command longer than {MAX_COMMAND_LEN} bytes"
            )));
        }

        self.write_instruction(text).await?;
        self.logs.append(format!("[Command Sent]: {text}")).await;
        Ok(())
    }

    async fn write_instruction(&self, line: &str) -> PanelResult<()> {
        let (stdin, _) = self.running_console().await.ok_or(PanelError::NotRunning)?;
        write_console(&stdin, line).await
    }

    /// Console handle of a `Running` session, taken without holding `inner`
    /// during the write.
    async fn running_console(&self) -> Option<(ConsoleInput, u64)> {
        let inner = self.inner.lock().await;
        if inner.state != SessionState::Running {
            return None;
        }
        inner
            .live
            .as_ref()
            .map(|live| (live.stdin.clone(), live.generation))
    }

    // ── Observation ─────────────────────────────────────

    /// What the telemetry poller should measure right now.
    pub async fn probe_target(&self) -> ProbeTarget {
        let inner = self.inner.lock().await;
        match &inner.live {
            Some(live) => ProbeTarget {
                running: true,
                pid: live.info.pid,
            },
            None => ProbeTarget::default(),
        }
    }

    pub async fn status(&self) -> SessionStatus {
        let (state, session) = {
            let inner = self.inner.lock().await;
            (inner.state, inner.live.as_ref().map(|l| l.info.clone()))
        };
        let target = ProbeTarget {
            running: session.is_some(),
            pid: session.as_ref().and_then(|s| s.pid),
        };
        let reading = self.telemetry.measure(target);

        SessionStatus {
            status: reading.status,
            state,
            player_count: reading.player_count_label(),
            memory_usage: reading.memory_used_bytes,
            host_cpu_load: reading.host_cpu_load,
            session,
        }
    }
}

#[cfg(all(test, unix))]
mod tests {
    use std::path::Path;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use async_trait::async_trait;
    use tokio::time::timeout;

    use super::*;
    use crate::core::config::{Settings, StaticConfigSource};
    use crate::core::events::{LogEvent, Subscription};
    use crate::core::loaders::LaunchSpec;
    use crate::core::session::ServerVariant;
    use crate::core::telemetry::StaticProbe;

    const WAIT: Duration = Duration::from_secs(10);

    const STAND_IN_SERVER: &str = r#"
echo "[00:00:00] [Server thread/INFO]: Done (0.1s)! For help, type \"help\""
while read -r line; do
  case "$line" in
    stop) echo "[00:00:01] [Server thread/INFO]: Stopping server"; exit 0 ;;
    save-all) echo "[00:00:01] [Server thread/INFO]: Saved the game" ;;
    *) echo "[00:00:01] [Server thread/INFO]: ran $line" ;;
  esac
done
"#;

    /// Writes a shell script in place of the real server.
    struct ScriptProvisioner {
        script: String,
        delay: Duration,
        fail: bool,
        calls: AtomicUsize,
        seen: std::sync::Mutex<Vec<SessionRequest>>,
    }

    impl ScriptProvisioner {
        fn new(script: &str) -> Self {
            Self {
                script: script.to_string(),
                delay: Duration::ZERO,
                fail: false,
                calls: AtomicUsize::new(0),
                seen: std::sync::Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl SessionProvisioner for ScriptProvisioner {
        async fn provision(
            &self,
            request: &SessionRequest,
            ctx: ProvisionContext<'_>,
        ) -> PanelResult<LaunchSpec> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.seen.lock().unwrap().push(request.clone());
            tokio::time::sleep(self.delay).await;
            if self.fail {
                return Err(PanelError::InstallFailed {
                    variant: request.variant.to_string(),
                    reason: "installer exited with code 1".into(),
                });
            }

            std::fs::create_dir_all(ctx.working_dir).unwrap();
            let script = ctx.working_dir.join("server.sh");
            std::fs::write(&script, &self.script).unwrap();
            Ok(LaunchSpec {
                program: "sh".into(),
                args: vec![script.to_string_lossy().to_string()],
                working_dir: ctx.working_dir.to_path_buf(),
                runtime_home: None,
            })
        }
    }

    async fn controller_with(
        root: &Path,
        provisioner: Arc<ScriptProvisioner>,
    ) -> (SessionController, Arc<LogBuffer>, Arc<TelemetryCollector>) {
        let settings = Settings::default().rooted_at(root);
        let logs = Arc::new(LogBuffer::load(settings.logs_file.clone()).await);
        let telemetry = Arc::new(TelemetryCollector::new(
            Duration::from_secs(60),
            Box::new(StaticProbe::default()),
        ));
        let controller = SessionController::new(
            Arc::new(StaticConfigSource::new(settings)),
            provisioner,
            logs.clone(),
            telemetry.clone(),
        );
        (controller, logs, telemetry)
    }

    fn vanilla() -> SessionRequest {
        SessionRequest::new(ServerVariant::Vanilla, "1.20.1").unwrap()
    }

    async fn expect_log(sub: &mut Subscription<LogEvent>, needle: &str) {
        timeout(WAIT, async {
            while let Some(event) = sub.recv().await {
                if event.message.contains(needle) {
                    return;
                }
            }
            panic!("log feed closed before {needle:?}");
        })
        .await
        .unwrap_or_else(|_| panic!("timed out waiting for {needle:?}"));
    }

    async fn wait_for_state(controller: &SessionController, wanted: SessionState) {
        let mut states = controller.subscribe_state();
        timeout(WAIT, states.wait_for(|s| *s == wanted))
            .await
            .expect("state wait timed out")
            .unwrap();
    }

    #[tokio::test]
    async fn start_runs_until_stopped() {
        let dir = tempfile::tempdir().unwrap();
        let provisioner = Arc::new(ScriptProvisioner::new(STAND_IN_SERVER));
        let (controller, logs, _) = controller_with(dir.path(), provisioner).await;
        let mut feed = logs.subscribe();

        let info = controller.start(vanilla()).await.unwrap();
        assert_eq!(info.working_dir, dir.path().join("servers").join("vanilla-1.20.1"));
        assert_eq!(controller.state().await, SessionState::Running);
        assert_eq!(controller.status().await.status, ServerStatus::Running);
        expect_log(&mut feed, "Done (0.1s)!").await;

        assert!(controller.stop().await.unwrap());
        wait_for_state(&controller, SessionState::Stopped).await;
        assert!(controller.session().await.is_none());
        assert_eq!(controller.status().await.status, ServerStatus::Stopped);
    }

    #[tokio::test]
    async fn concurrent_starts_admit_exactly_one() {
        let dir = tempfile::tempdir().unwrap();
        let mut provisioner = ScriptProvisioner::new(STAND_IN_SERVER);
        provisioner.delay = Duration::from_millis(200);
        let provisioner = Arc::new(provisioner);
        let (controller, _, _) = controller_with(dir.path(), provisioner.clone()).await;

        let (a, b) = tokio::join!(controller.start(vanilla()), controller.start(vanilla()));

        let outcomes = [a.is_ok(), b.is_ok()];
        assert_eq!(outcomes.iter().filter(|ok| **ok).count(), 1);
        let rejected = if a.is_err() { a.unwrap_err() } else { b.unwrap_err() };
        assert!(matches!(rejected, PanelError::AlreadyRunning));
        assert_eq!(provisioner.calls.load(Ordering::SeqCst), 1);

        controller.stop().await.unwrap();
        wait_for_state(&controller, SessionState::Stopped).await;
    }

    #[tokio::test]
    async fn start_while_running_keeps_the_existing_process() {
        let dir = tempfile::tempdir().unwrap();
        let provisioner = Arc::new(ScriptProvisioner::new(STAND_IN_SERVER));
        let (controller, _, _) = controller_with(dir.path(), provisioner).await;

        let first = controller.start(vanilla()).await.unwrap();
        let err = controller.start(vanilla()).await.unwrap_err();

        assert!(matches!(err, PanelError::AlreadyRunning));
        assert_eq!(controller.session().await.unwrap().pid, first.pid);

        controller.stop().await.unwrap();
        wait_for_state(&controller, SessionState::Stopped).await;
    }

    #[tokio::test]
    async fn stop_without_session_is_a_no_op() {
        let dir = tempfile::tempdir().unwrap();
        let provisioner = Arc::new(ScriptProvisioner::new(STAND_IN_SERVER));
        let (controller, _, _) = controller_with(dir.path(), provisioner).await;

        assert!(!controller.stop().await.unwrap());
        assert_eq!(controller.state().await, SessionState::Stopped);
    }

    #[tokio::test]
    async fn failed_provisioning_returns_to_stopped() {
        let dir = tempfile::tempdir().unwrap();
        let mut provisioner = ScriptProvisioner::new(STAND_IN_SERVER);
        provisioner.fail = true;
        let (controller, _, _) = controller_with(dir.path(), Arc::new(provisioner)).await;

        let err = controller.start(vanilla()).await.unwrap_err();

        assert!(matches!(err, PanelError::InstallFailed { .. }));
        assert_eq!(controller.state().await, SessionState::Stopped);
        assert!(controller.session().await.is_none());
        assert!(controller.last_request().await.is_none());
    }

    #[tokio::test]
    async fn restart_without_history_is_invalid() {
        let dir = tempfile::tempdir().unwrap();
        let provisioner = Arc::new(ScriptProvisioner::new(STAND_IN_SERVER));
        let (controller, _, _) = controller_with(dir.path(), provisioner).await;

        let err = controller.restart(None).await.unwrap_err();
        assert!(matches!(err, PanelError::InvalidRequest(_)));
    }

    #[tokio::test]
    async fn restart_reuses_the_previous_request() {
        let dir = tempfile::tempdir().unwrap();
        let provisioner = Arc::new(ScriptProvisioner::new(STAND_IN_SERVER));
        let (controller, _, _) = controller_with(dir.path(), provisioner.clone()).await;
        let forge = SessionRequest::new(ServerVariant::Forge, "1.20.1").unwrap();

        let before = controller.start(forge.clone()).await.unwrap();
        let after = controller.restart(None).await.unwrap();

        assert_ne!(before.pid, after.pid);
        assert_eq!(after.variant, ServerVariant::Forge);
        assert_eq!(after.game_version, "1.20.1");
        assert_eq!(*provisioner.seen.lock().unwrap(), vec![forge.clone(), forge]);

        controller.stop().await.unwrap();
        wait_for_state(&controller, SessionState::Stopped).await;
    }

    #[tokio::test]
    async fn restart_after_stop_is_not_running() {
        let dir = tempfile::tempdir().unwrap();
        let provisioner = Arc::new(ScriptProvisioner::new(STAND_IN_SERVER));
        let (controller, _, _) = controller_with(dir.path(), provisioner.clone()).await;

        controller.start(vanilla()).await.unwrap();
        controller.stop().await.unwrap();
        wait_for_state(&controller, SessionState::Stopped).await;

        let err = controller.restart(None).await.unwrap_err();
        assert!(matches!(err, PanelError::NotRunning));
        assert_eq!(controller.state().await, SessionState::Stopped);
        assert_eq!(provisioner.calls.load(Ordering::SeqCst), 1);

        // An explicit request still starts from idle.
        controller.restart(Some(vanilla())).await.unwrap();
        assert_eq!(controller.state().await, SessionState::Running);
        controller.stop().await.unwrap();
        wait_for_state(&controller, SessionState::Stopped).await;
    }

    #[tokio::test]
    async fn commands_reach_the_server_console() {
        let dir = tempfile::tempdir().unwrap();
        let provisioner = Arc::new(ScriptProvisioner::new(STAND_IN_SERVER));
        let (controller, logs, _) = controller_with(dir.path(), provisioner).await;
        let mut feed = logs.subscribe();
        controller.start(vanilla()).await.unwrap();

        controller.send_command("say hello").await.unwrap();
        expect_log(&mut feed, "ran say hello").await;
        controller.save().await.unwrap();
        expect_log(&mut feed, "Saved the game").await;

        assert!(matches!(
            controller.send_command("   ").await,
            Err(PanelError::InvalidRequest(_))
        ));
        assert!(matches!(
            controller.send_command("say a\nstop").await,
            Err(PanelError::InvalidRequest(_))
        ));
        assert!(matches!(
            controller.send_command(&"x".repeat(MAX_COMMAND_LEN + 1)).await,
            Err(PanelError::InvalidRequest(_))
        ));

        controller.stop().await.unwrap();
        wait_for_state(&controller, SessionState::Stopped).await;
        assert!(matches!(controller.save().await, Err(PanelError::NotRunning)));
        assert!(matches!(
            controller.send_command("list").await,
            Err(PanelError::NotRunning)
        ));
    }

    #[tokio::test]
    async fn server_exit_is_observed() {
        let dir = tempfile::tempdir().unwrap();
        let provisioner = Arc::new(ScriptProvisioner::new(
            "echo '[00:00:00] [Server thread/INFO]: Steve joined the game'; sleep 0.2; exit 1",
        ));
        let (controller, logs, telemetry) = controller_with(dir.path(), provisioner).await;
        let mut feed = logs.subscribe();

        controller.start(vanilla()).await.unwrap();
        expect_log(&mut feed, "Steve joined the game").await;
        assert_eq!(telemetry.player_count().online, 1);

        wait_for_state(&controller, SessionState::Stopped).await;
        expect_log(&mut feed, "exited with code 1").await;
        assert_eq!(telemetry.player_count().online, 0);
        assert_eq!(controller.last_request().await, Some(vanilla()));
    }

    #[tokio::test]
    async fn output_after_invalid_utf8_is_still_captured() {
        let dir = tempfile::tempdir().unwrap();
        let server_dir = dir.path().join("servers").join("vanilla-1.20.1");
        std::fs::create_dir_all(&server_dir).unwrap();
        std::fs::write(server_dir.join("server.properties"), "max-players=7\n").unwrap();
        let provisioner = Arc::new(ScriptProvisioner::new(
            r#"
echo before
printf '\377\376 bad\n'
echo "[00:00:00] [Server thread/INFO]: Alex joined the game"
echo after
while read -r line; do [ "$line" = stop ] && exit 0; done
"#,
        ));
        let (controller, logs, telemetry) = controller_with(dir.path(), provisioner).await;
        let mut feed = logs.subscribe();

        controller.start(vanilla()).await.unwrap();
        expect_log(&mut feed, "before").await;
        expect_log(&mut feed, " bad").await;
        expect_log(&mut feed, "after").await;
        assert_eq!(telemetry.player_count().to_string(), "1/7");

        controller.stop().await.unwrap();
        wait_for_state(&controller, SessionState::Stopped).await;
    }

    #[tokio::test]
    async fn status_stays_responsive_while_console_is_blocked() {
        let dir = tempfile::tempdir().unwrap();
        // Never reads stdin, so the pipe fills up.
        let provisioner = Arc::new(ScriptProvisioner::new("sleep 3"));
        let (controller, _, _) = controller_with(dir.path(), provisioner).await;
        controller.start(vanilla()).await.unwrap();

        let writer = {
            let controller = controller.clone();
            let line = format!("say {}", "x".repeat(MAX_COMMAND_LEN - 4));
            tokio::spawn(async move {
                for _ in 0..256 {
                    if controller.send_command(&line).await.is_err() {
                        break;
                    }
                }
            })
        };
        tokio::time::sleep(Duration::from_millis(300)).await;

        let quick = Duration::from_secs(1);
        let status = timeout(quick, controller.status()).await.expect("status blocked");
        assert_eq!(status.status, ServerStatus::Running);
        assert!(timeout(quick, controller.probe_target()).await.expect("probe target blocked").running);
        assert!(timeout(quick, controller.session()).await.expect("session blocked").is_some());

        wait_for_state(&controller, SessionState::Stopped).await;
        timeout(WAIT, writer).await.unwrap().unwrap();
    }
}
