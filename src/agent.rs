use crate::call::{CallSession, CallStatus, Notification};
use crate::command::CommandSender;
use crate::config::Config;
use crate::error::AgentError;
use crate::event::Classifier;
use crate::media::{AudioNormalizer, SynthesisClient, ToneGenerator};
use crate::profile::Profile;
use crate::supervisor::{ProcessSupervisor, ReadOutcome};
use anyhow::{anyhow, Result};
use async_trait::async_trait;
use std::path::Path;
use std::sync::{Arc, RwLock};
use std::time::Duration;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Application-supplied callbacks, dispatched from the reader loop in line
/// order. Every method has a default; the documented defaults are: incoming
/// calls are rejected, and an audio-source failure hangs up the call.
#[async_trait]
pub trait CallEventHandler: Send + Sync {
    async fn on_ready(&self, _agent: &AgentHandle) {
        info!("ready for instructions");
    }

    async fn on_incoming_call(&self, agent: &AgentHandle, number: &str) {
        info!("incoming call from {}, rejecting", number);
        sleep(Duration::from_millis(100)).await;
        agent.reject().await.ok();
    }

    async fn on_call_rejected(&self, _agent: &AgentHandle, number: &str) {
        info!("rejected incoming call: {}", number);
    }

    async fn on_outgoing_call(&self, _agent: &AgentHandle, number: &str) {
        info!("calling {}", number);
    }

    async fn on_call_ringing(&self, agent: &AgentHandle) {
        if let Some(number) = agent.current_call() {
            info!("{} is ringing", number);
        }
    }

    async fn on_call_established(&self, _agent: &AgentHandle) {
        info!("call established");
    }

    async fn on_call_ended(&self, _agent: &AgentHandle, reason: &str, number: Option<&str>) {
        info!("call ended");
        debug!("number: {:?}, reason: {}", number, reason);
    }

    async fn on_call_timestamp(&self, _agent: &AgentHandle, timestamp: &str) {
        info!("call time: {}", timestamp);
    }

    async fn on_status_change(&self, _agent: &AgentHandle, status: &CallStatus) {
        debug!("call status: {}", status);
    }

    async fn on_login_success(&self, _agent: &AgentHandle) {
        info!("logged in");
    }

    async fn on_login_failure(&self, _agent: &AgentHandle, line: &str) {
        error!("login failed: {}", line);
    }

    async fn on_mic_muted(&self, _agent: &AgentHandle) {
        info!("microphone muted");
    }

    async fn on_mic_unmuted(&self, _agent: &AgentHandle) {
        info!("microphone unmuted");
    }

    async fn on_dtmf(&self, _agent: &AgentHandle, digit: char, duration_ms: u32) {
        info!("received DTMF symbol '{}' duration={}", digit, duration_ms);
    }

    async fn on_audio_failure(&self, agent: &AgentHandle) {
        debug!("aborting call, maybe we reached voicemail?");
        agent.hangup().await.ok();
    }

    async fn on_unclassified(&self, _agent: &AgentHandle, line: &str) {
        debug!("unhandled agent output: '{}'", line);
    }
}

/// Handler with every default behavior left as documented.
pub struct DefaultHandler;

#[async_trait]
impl CallEventHandler for DefaultHandler {}

struct AgentInner {
    login_uri: String,
    commands: CommandSender,
    session: RwLock<CallSession>,
    last_error: RwLock<Option<String>>,
    token: CancellationToken,
    normalizer: Option<Arc<dyn AudioNormalizer>>,
    synthesis: Option<Arc<dyn SynthesisClient>>,
    tones: Option<Arc<dyn ToneGenerator>>,
}

impl AgentInner {
    fn session(&self) -> CallSession {
        self.session
            .read()
            .map(|s| s.clone())
            .unwrap_or_default()
    }

    fn with_session<R>(&self, f: impl FnOnce(&mut CallSession) -> R) -> Option<R> {
        self.session.write().ok().map(|mut s| f(&mut s))
    }

    fn record_error(&self, message: &str) {
        if let Ok(mut e) = self.last_error.write() {
            *e = Some(message.to_string());
        }
    }
}

/// Caller-facing view of a running session: command issuing, status
/// polling, and shutdown. Cheap to clone; shared with handler callbacks.
#[derive(Clone)]
pub struct AgentHandle {
    inner: Arc<AgentInner>,
}

impl AgentHandle {
    pub fn status(&self) -> CallStatus {
        self.inner.session().status
    }

    pub fn current_call(&self) -> Option<String> {
        self.inner.session().remote_number
    }

    pub fn call_established(&self) -> bool {
        self.status() == CallStatus::Established
    }

    pub fn mic_muted(&self) -> bool {
        self.inner.session().mic_muted
    }

    pub fn is_ready(&self) -> bool {
        self.inner.commands.is_ready()
    }

    pub fn is_stopped(&self) -> bool {
        self.inner.token.is_cancelled()
    }

    /// Last reader-loop failure, if any. The loop stops cleanly instead of
    /// propagating, so this is how callers observe what went wrong.
    pub fn last_error(&self) -> Option<String> {
        self.inner.last_error.read().ok().and_then(|e| e.clone())
    }

    /// Poll until registration completes. Aborts with `Stopped` when the
    /// session shuts down first, so a failed login never blocks forever.
    pub async fn wait_until_ready(&self) -> Result<(), AgentError> {
        while !self.is_ready() {
            if self.is_stopped() {
                return Err(AgentError::Stopped);
            }
            sleep(Duration::from_millis(100)).await;
        }
        Ok(())
    }

    /// Request cooperative shutdown of the reader loop.
    pub fn shutdown(&self) {
        self.inner.token.cancel();
    }

    /// Send a raw newline-terminated command, gated on readiness.
    pub async fn send(&self, command: &str) -> Result<(), AgentError> {
        self.inner.commands.send(command).await
    }

    pub async fn login(&self) -> Result<(), AgentError> {
        info!("adding account");
        self.inner
            .commands
            .send_raw(&format!("/uanew {}", self.inner.login_uri))
            .await
    }

    pub async fn logout(&self) -> Result<(), AgentError> {
        info!("removing accounts");
        self.inner.commands.send_raw("/uadelall").await
    }

    pub async fn dial(&self, number: &str) -> Result<(), AgentError> {
        info!("dialling {}", number);
        self.send(&format!("/dial {}", number)).await
    }

    /// Hang up the active call. The local session is cleared optimistically
    /// and reconciled by the termination line the agent emits.
    pub async fn hangup(&self) -> Result<(), AgentError> {
        let Some(number) = self.current_call() else {
            warn!("no active call to hang up");
            return Err(AgentError::NoActiveCall);
        };
        info!("hanging up {}", number);
        self.send("/hangup").await?;
        self.inner.with_session(|s| s.reset());
        Ok(())
    }

    pub async fn hold(&self) -> Result<(), AgentError> {
        let Some(number) = self.current_call() else {
            warn!("no active call to hold");
            return Err(AgentError::NoActiveCall);
        };
        info!("holding {}", number);
        self.send("/hold").await
    }

    pub async fn resume(&self) -> Result<(), AgentError> {
        let Some(number) = self.current_call() else {
            warn!("no active call to resume");
            return Err(AgentError::NoActiveCall);
        };
        info!("resuming {}", number);
        self.send("/resume").await
    }

    pub async fn mute(&self) -> Result<(), AgentError> {
        if !self.call_established() {
            warn!("cannot mute microphone while not in a call");
            return Err(AgentError::NoActiveCall);
        }
        if self.mic_muted() {
            debug!("mic already muted");
            return Ok(());
        }
        self.send("/mute").await
    }

    pub async fn unmute(&self) -> Result<(), AgentError> {
        if !self.call_established() {
            warn!("cannot unmute microphone while not in a call");
            return Err(AgentError::NoActiveCall);
        }
        if !self.mic_muted() {
            debug!("mic already unmuted");
            return Ok(());
        }
        self.send("/mute").await
    }

    /// Accept an incoming call; the session flips to established
    /// optimistically and is reconciled by the agent's confirmation line.
    pub async fn accept(&self) -> Result<(), AgentError> {
        let Some(number) = self.current_call() else {
            warn!("no incoming call to accept");
            return Err(AgentError::NoActiveCall);
        };
        info!("accepting call from {}", number);
        self.send("/accept").await?;
        self.inner
            .with_session(|s| s.status = CallStatus::Established);
        Ok(())
    }

    /// Reject an incoming call (the agent's bare `b` key).
    pub async fn reject(&self) -> Result<(), AgentError> {
        self.send("b").await
    }

    pub async fn list_calls(&self) -> Result<(), AgentError> {
        self.send("/listcalls").await
    }

    /// Ask the agent to report call state, give the reader loop a moment to
    /// pick the answer up, and return the (possibly refreshed) status.
    pub async fn call_status(&self) -> Result<CallStatus, AgentError> {
        self.send("/callstat").await?;
        sleep(Duration::from_millis(100)).await;
        Ok(self.status())
    }

    pub async fn send_dtmf(&self, digits: &str) -> Result<(), AgentError> {
        if digits.is_empty() || !digits.chars().all(|c| c.is_ascii_digit()) {
            error!("invalid dtmf tone: {}", digits);
            return Err(AgentError::InvalidDtmf(digits.to_string()));
        }
        let tones = self
            .inner
            .tones
            .as_ref()
            .ok_or_else(|| AgentError::Media(anyhow!("no tone generator configured")))?;
        info!("sending dtmf tones for {}", digits);
        let path = tones.tone_file(digits).await.map_err(AgentError::Media)?;
        self.send_audio(&path).await
    }

    pub async fn speak(&self, text: &str) -> Result<(), AgentError> {
        if !self.call_established() {
            error!("speaking without an active call");
            return Err(AgentError::NoActiveCall);
        }
        let synthesis = self
            .inner
            .synthesis
            .as_ref()
            .ok_or_else(|| AgentError::Media(anyhow!("no synthesis client configured")))?;
        info!("sending TTS for {}", text);
        let path = synthesis.synthesize(text).await.map_err(AgentError::Media)?;
        self.send_audio(&path).await
    }

    /// Stream an audio file into the call: normalize, switch the audio
    /// source to the file, block for its duration minus a fixed lead while
    /// streaming begins, then restore the default source so the agent does
    /// not exit.
    pub async fn send_audio(&self, path: &Path) -> Result<(), AgentError> {
        if !self.call_established() {
            error!("cannot send audio without an active call");
            return Err(AgentError::NoActiveCall);
        }
        let normalizer = self
            .inner
            .normalizer
            .as_ref()
            .ok_or_else(|| AgentError::Media(anyhow!("no audio normalizer configured")))?;
        let audio = normalizer.normalize(path).await.map_err(AgentError::Media)?;
        info!("transmitting audio");
        self.send(&format!("/ausrc aufile,{}", audio.path.display()))
            .await?;
        let lead = Duration::from_millis(500);
        sleep(audio.duration.saturating_sub(lead)).await;
        self.send("/ausrc alsa,default").await
    }
}

pub struct AgentBuilder {
    config: Option<Config>,
    handler: Option<Arc<dyn CallEventHandler>>,
    normalizer: Option<Arc<dyn AudioNormalizer>>,
    synthesis: Option<Arc<dyn SynthesisClient>>,
    tones: Option<Arc<dyn ToneGenerator>>,
    cancel_token: Option<CancellationToken>,
}

impl AgentBuilder {
    pub fn new() -> Self {
        Self {
            config: None,
            handler: None,
            normalizer: None,
            synthesis: None,
            tones: None,
            cancel_token: None,
        }
    }

    pub fn with_config(mut self, config: Config) -> Self {
        self.config = Some(config);
        self
    }

    pub fn with_handler(mut self, handler: Arc<dyn CallEventHandler>) -> Self {
        self.handler = Some(handler);
        self
    }

    pub fn with_normalizer(mut self, normalizer: Arc<dyn AudioNormalizer>) -> Self {
        self.normalizer = Some(normalizer);
        self
    }

    pub fn with_synthesis(mut self, synthesis: Arc<dyn SynthesisClient>) -> Self {
        self.synthesis = Some(synthesis);
        self
    }

    pub fn with_tones(mut self, tones: Arc<dyn ToneGenerator>) -> Self {
        self.tones = Some(tones);
        self
    }

    pub fn with_cancel_token(mut self, token: CancellationToken) -> Self {
        self.cancel_token = Some(token);
        self
    }

    pub fn build(mut self) -> Result<Agent> {
        let config = self.config.take().unwrap_or_default();
        let profile = Profile::new(&config)?;
        let supervisor = ProcessSupervisor::new(config.baresip_bin.clone(), profile.dir());
        let inner = Arc::new(AgentInner {
            login_uri: config.account.login_uri(),
            commands: CommandSender::new(),
            session: RwLock::new(CallSession::default()),
            last_error: RwLock::new(None),
            token: self.cancel_token.take().unwrap_or_default(),
            normalizer: self.normalizer.take(),
            synthesis: self.synthesis.take(),
            tones: self.tones.take(),
        });
        Ok(Agent {
            config,
            inner,
            handler: self
                .handler
                .take()
                .unwrap_or_else(|| Arc::new(DefaultHandler)),
            profile,
            supervisor,
            classifier: Classifier::new(),
        })
    }
}

impl Default for AgentBuilder {
    fn default() -> Self {
        Self::new()
    }
}

enum LoopAction {
    Continue,
    Stop,
}

/// The composition root: owns the process supervisor, classifier, and call
/// session, and drives them from a single reader loop.
pub struct Agent {
    config: Config,
    inner: Arc<AgentInner>,
    handler: Arc<dyn CallEventHandler>,
    profile: Profile,
    supervisor: ProcessSupervisor,
    classifier: Classifier,
}

impl Agent {
    pub fn handle(&self) -> AgentHandle {
        AgentHandle {
            inner: self.inner.clone(),
        }
    }

    /// Run the session to completion: materialize the agent's config
    /// directory, drive the reader loop, and tear down in an orderly way on
    /// every exit path. Failures after the first successful spawn stop the
    /// loop cleanly and are observable via [`AgentHandle::last_error`].
    pub async fn serve(&mut self) -> Result<()> {
        self.profile.materialize()?;
        let result = self.run_loop().await;
        if let Err(e) = &result {
            self.inner.record_error(&e.to_string());
        }
        self.shutdown().await;
        result
    }

    async fn run_loop(&mut self) -> Result<()> {
        let read_timeout = Duration::from_millis(self.config.read_timeout_ms);
        let backoff = Duration::from_millis(self.config.respawn_backoff_ms);
        let token = self.inner.token.clone();
        let mut respawns: u32 = 0;
        let mut started_once = false;

        loop {
            if token.is_cancelled() {
                return Ok(());
            }

            if !self.supervisor.has_process() {
                if let Some(cap) = self.config.max_respawns {
                    if respawns > cap {
                        error!("respawn ceiling of {} reached, giving up", cap);
                        return Err(AgentError::ProcessDied.into());
                    }
                }
                match self.supervisor.start() {
                    Ok(stdin) => {
                        self.inner.commands.attach(stdin).await;
                        started_once = true;
                    }
                    Err(e) => {
                        // The very first launch failing is fatal; once a
                        // process has run, unavailability is assumed
                        // transient and retried.
                        if !started_once {
                            return Err(e.into());
                        }
                        warn!("respawn failed: {}", e);
                        self.inner.record_error(&e.to_string());
                        respawns += 1;
                        self.backoff(&token, backoff).await;
                    }
                }
                continue;
            }

            if !self.supervisor.is_alive() {
                warn!("agent process died, respawning");
                self.on_process_death().await;
                respawns += 1;
                self.backoff(&token, backoff).await;
                continue;
            }

            let outcome = tokio::select! {
                _ = token.cancelled() => return Ok(()),
                outcome = self.supervisor.read_line(read_timeout) => outcome,
            };
            match outcome {
                ReadOutcome::Timeout => continue,
                ReadOutcome::Eof => {
                    warn!("agent output closed, respawning");
                    self.on_process_death().await;
                    respawns += 1;
                    self.backoff(&token, backoff).await;
                }
                ReadOutcome::Line(line) => match self.process_line(&line).await {
                    Ok(LoopAction::Continue) => {}
                    Ok(LoopAction::Stop) => return Ok(()),
                    Err(e) => {
                        error!("error processing agent output: {}", e);
                        return Err(e.into());
                    }
                },
            }
        }
    }

    async fn backoff(&self, token: &CancellationToken, backoff: Duration) {
        tokio::select! {
            _ = token.cancelled() => {}
            _ = sleep(backoff) => {}
        }
    }

    /// A dead process always collapses to "no active call"; mid-call state
    /// is not recoverable across a crash.
    async fn on_process_death(&mut self) {
        self.supervisor.kill().await;
        self.inner.commands.detach().await;
        self.inner.with_session(|s| s.reset());
        // fresh output stream, fresh dedup state
        self.classifier = Classifier::new();
    }

    async fn process_line(&mut self, raw: &str) -> Result<LoopAction, AgentError> {
        if self.config.debug {
            debug!("{}", raw.trim());
        }
        let active = self
            .inner
            .with_session(|s| s.remote_number.clone())
            .flatten();
        let Some(event) = self.classifier.classify(raw, active.as_deref()) else {
            return Ok(LoopAction::Continue);
        };
        let notifications = self
            .inner
            .with_session(|s| s.apply(&event))
            .unwrap_or_default();

        let handle = self.handle();
        let mut action = LoopAction::Continue;
        for notification in notifications {
            match notification {
                Notification::Ready => self.handler.on_ready(&handle).await,
                Notification::AccountsMissing => {
                    debug!("no accounts setup");
                    if let Err(e) = handle.login().await {
                        warn!("failed to add account: {}", e);
                    }
                }
                Notification::LoginOk => {
                    self.inner.commands.set_ready();
                    self.handler.on_login_success(&handle).await;
                }
                Notification::LoginFailed(line) => {
                    self.handler.on_login_failure(&handle, &line).await;
                    return Err(AgentError::Registration(line));
                }
                Notification::IncomingCall(number) => {
                    self.handler.on_incoming_call(&handle, &number).await
                }
                Notification::CallRejected(number) => {
                    self.handler.on_call_rejected(&handle, &number).await
                }
                Notification::OutgoingCall(number) => {
                    self.handler.on_outgoing_call(&handle, &number).await
                }
                Notification::Ringing => self.handler.on_call_ringing(&handle).await,
                Notification::Established => self.handler.on_call_established(&handle).await,
                Notification::StatusChanged(status) => {
                    self.handler.on_status_change(&handle, &status).await
                }
                Notification::CallTimestamp(ts) => {
                    self.handler.on_call_timestamp(&handle, &ts).await
                }
                Notification::CallEnded { reason, number } => {
                    self.handler
                        .on_call_ended(&handle, &reason, number.as_deref())
                        .await
                }
                Notification::MicMuted => self.handler.on_mic_muted(&handle).await,
                Notification::MicUnmuted => self.handler.on_mic_unmuted(&handle).await,
                Notification::DtmfReceived(digit, duration) => {
                    self.handler.on_dtmf(&handle, digit, duration).await
                }
                Notification::AudioSourceFailed => {
                    error!("failed to set audio-source (No such device)");
                    self.inner.record_error(&AgentError::AudioDevice.to_string());
                    self.handler.on_audio_failure(&handle).await;
                }
                Notification::Stopping => action = LoopAction::Stop,
                Notification::Unclassified(line) => {
                    self.handler.on_unclassified(&handle, &line).await
                }
            }
        }
        Ok(action)
    }

    /// Orderly teardown: hang up, ask the agent to quit, force-kill what is
    /// left, restore the config backup, and mark the session stopped.
    async fn shutdown(&mut self) {
        info!("closing agent session");
        let handle = self.handle();
        if handle.current_call().is_some() {
            handle.hangup().await.ok();
        }
        self.inner.commands.send_raw("/quit").await.ok();
        self.supervisor.terminate().await;
        self.inner.commands.detach().await;
        self.inner.with_session(|s| s.reset());
        if let Err(e) = self.profile.restore() {
            warn!("failed to restore original config: {}", e);
        }
        self.inner.token.cancel();
    }
}
