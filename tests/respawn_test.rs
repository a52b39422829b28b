use async_trait::async_trait;
use barectl::agent::{AgentBuilder, AgentHandle, CallEventHandler};
use barectl::call::CallStatus;
use barectl::config::Config;
use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;

/// Counts reader-loop callbacks so tests can observe session progress.
#[derive(Default)]
struct CountingHandler {
    ready: AtomicUsize,
    logins: AtomicUsize,
}

#[async_trait]
impl CallEventHandler for CountingHandler {
    async fn on_ready(&self, _agent: &AgentHandle) {
        self.ready.fetch_add(1, Ordering::SeqCst);
    }

    async fn on_login_success(&self, _agent: &AgentHandle) {
        self.logins.fetch_add(1, Ordering::SeqCst);
    }
}

/// Write an executable stub standing in for the real agent binary. It
/// ignores the `-f <dir>` arguments the supervisor passes.
fn stub_config(dir: &Path, script_body: &str) -> Config {
    let script = dir.join("fake-agent");
    fs::write(&script, format!("#!/bin/sh\n{}\n", script_body)).unwrap();
    fs::set_permissions(&script, fs::Permissions::from_mode(0o755)).unwrap();

    let mut config = Config::default();
    config.baresip_bin = script.to_string_lossy().to_string();
    config.config_dir = Some(dir.join("profile").to_string_lossy().to_string());
    config.read_timeout_ms = 100;
    config.respawn_backoff_ms = 50;
    config.account.user = "alice".to_string();
    config.account.password = "pw".to_string();
    config.account.gateway = "gw.example.com".to_string();
    config.account.transport = "udp".to_string();
    config
}

async fn wait_for(mut cond: impl FnMut() -> bool) {
    tokio::time::timeout(Duration::from_secs(10), async {
        while !cond() {
            sleep(Duration::from_millis(25)).await;
        }
    })
    .await
    .expect("condition not met within 10s");
}

#[tokio::test]
async fn test_login_flow_reaches_ready() {
    let tmp = tempfile::tempdir().unwrap();
    // announce readiness, prompt for an account, confirm registration once
    // the /uanew command arrives, then stay silent
    let config = stub_config(
        tmp.path(),
        r#"echo "baresip is ready."
echo "account: No SIP accounts found"
read line
echo "All 1 useragent registered successfully! (200 OK)"
sleep 600"#,
    );

    let handler = Arc::new(CountingHandler::default());
    let mut agent = AgentBuilder::new()
        .with_config(config)
        .with_handler(handler.clone())
        .build()
        .unwrap();
    let handle = agent.handle();
    let server = tokio::spawn(async move { agent.serve().await });

    handle.wait_until_ready().await.unwrap();
    assert!(handle.is_ready());
    assert_eq!(handler.ready.load(Ordering::SeqCst), 1);
    assert_eq!(handler.logins.load(Ordering::SeqCst), 1);
    assert_eq!(handle.status(), CallStatus::Disconnected);

    handle.shutdown();
    server.await.unwrap().unwrap();
    assert!(handle.is_stopped());
}

#[tokio::test]
async fn test_respawn_after_death_reaches_ready_again() {
    let tmp = tempfile::tempdir().unwrap();
    // the stub announces readiness and immediately dies; the controller
    // must respawn it without caller intervention
    let config = stub_config(
        tmp.path(),
        r#"echo "baresip is ready."
exit 0"#,
    );

    let handler = Arc::new(CountingHandler::default());
    let mut agent = AgentBuilder::new()
        .with_config(config)
        .with_handler(handler.clone())
        .build()
        .unwrap();
    let handle = agent.handle();
    let server = tokio::spawn(async move { agent.serve().await });

    let counter = handler.clone();
    wait_for(move || counter.ready.load(Ordering::SeqCst) >= 2).await;

    handle.shutdown();
    server.await.unwrap().unwrap();
}

#[tokio::test]
async fn test_readiness_survives_respawn() {
    let tmp = tempfile::tempdir().unwrap();
    // register, then die: the command gate must stay open across the
    // automatic respawn
    let config = stub_config(
        tmp.path(),
        r#"echo "baresip is ready."
echo "account: No SIP accounts found"
read line
echo "All 1 useragent registered successfully! (200 OK)"
exit 0"#,
    );

    let handler = Arc::new(CountingHandler::default());
    let mut agent = AgentBuilder::new()
        .with_config(config)
        .with_handler(handler.clone())
        .build()
        .unwrap();
    let handle = agent.handle();
    let server = tokio::spawn(async move { agent.serve().await });

    handle.wait_until_ready().await.unwrap();
    let counter = handler.clone();
    wait_for(move || counter.ready.load(Ordering::SeqCst) >= 2).await;
    assert!(handle.is_ready());

    handle.shutdown();
    server.await.unwrap().unwrap();
}

#[tokio::test]
async fn test_initial_launch_failure_is_fatal() {
    let tmp = tempfile::tempdir().unwrap();
    let mut config = stub_config(tmp.path(), "true");
    config.baresip_bin = tmp
        .path()
        .join("does-not-exist")
        .to_string_lossy()
        .to_string();

    let mut agent = AgentBuilder::new().with_config(config).build().unwrap();
    let result = agent.serve().await;
    assert!(result.is_err(), "missing binary must surface a launch error");
}

#[tokio::test]
async fn test_registration_failure_shuts_down_session() {
    let tmp = tempfile::tempdir().unwrap();
    let config = stub_config(
        tmp.path(),
        r#"echo "baresip is ready."
echo "ua: SIP register failed: 401 Unauthorized"
sleep 600"#,
    );

    let mut agent = AgentBuilder::new().with_config(config).build().unwrap();
    let handle = agent.handle();
    let result = tokio::time::timeout(Duration::from_secs(10), agent.serve())
        .await
        .expect("session did not shut down on registration failure");
    assert!(result.is_err());
    assert!(handle.last_error().is_some());
    assert!(!handle.is_ready());
    assert!(handle.is_stopped());
}

#[tokio::test]
async fn test_shutdown_restores_profile_backup() {
    let tmp = tempfile::tempdir().unwrap();
    let profile_dir = tmp.path().join("profile");
    fs::create_dir_all(&profile_dir).unwrap();
    let original = "#audio_path\t\t/usr/share/baresip\n";
    fs::write(profile_dir.join("config"), original).unwrap();

    let mut config = stub_config(tmp.path(), "sleep 600");
    config.disable_sounds = true;

    let mut agent = AgentBuilder::new().with_config(config).build().unwrap();
    let handle = agent.handle();
    let server = tokio::spawn(async move { agent.serve().await });

    // the rewritten config is on disk while the session runs
    wait_for(|| {
        fs::read_to_string(profile_dir.join("config"))
            .map(|c| c.contains("/dont/load"))
            .unwrap_or(false)
    })
    .await;

    handle.shutdown();
    server.await.unwrap().unwrap();
    assert_eq!(
        fs::read_to_string(profile_dir.join("config")).unwrap(),
        original
    );
}
