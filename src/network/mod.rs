//! Network / captive-portal state machine.
//!
//! Keeps the device connected when credentials exist and otherwise runs a
//! bounded setup flow: raise an access point, serve the portal, try the
//! submitted credentials, converge back to monitoring. The machine owns
//! the radio; everything else reads its published snapshot or talks to it
//! over the command channel.

pub mod portal;
pub mod wifi;

use serde::Serialize;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, oneshot};

use crate::config::{ConfigStore, WifiProfile};
use portal::{CaptiveSession, SetupPortal, SharedSession};
use wifi::{NetworkError, WifiLink, WifiNetwork};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum NetworkPhase {
    Monitoring,
    EnteringApMode,
    PortalServing,
    Connecting,
}

impl NetworkPhase {
    /// Phases during which the pipeline shows the setup screen
    pub fn is_setup(self) -> bool {
        self != NetworkPhase::Monitoring
    }
}

/// Published snapshot, readable at any time without blocking the machine
#[derive(Debug, Clone, Serialize)]
pub struct NetworkStatus {
    pub phase: NetworkPhase,
    pub connected_ssid: Option<String>,
    pub last_error: Option<String>,
}

/// Handle to the snapshot; written only by the state machine
#[derive(Clone)]
pub struct NetworkState {
    inner: Arc<Mutex<NetworkStatus>>,
}

impl NetworkState {
    pub(crate) fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(NetworkStatus {
                phase: NetworkPhase::Monitoring,
                connected_ssid: None,
                last_error: None,
            })),
        }
    }

    pub fn snapshot(&self) -> NetworkStatus {
        self.inner.lock().expect("network state poisoned").clone()
    }

    pub(crate) fn set_phase(&self, phase: NetworkPhase) {
        self.inner.lock().expect("network state poisoned").phase = phase;
    }

    fn set_connected(&self, ssid: Option<String>) {
        self.inner
            .lock()
            .expect("network state poisoned")
            .connected_ssid = ssid;
    }

    fn set_error(&self, error: Option<String>) {
        self.inner.lock().expect("network state poisoned").last_error = error;
    }
}

/// Requests into the state machine
#[derive(Debug)]
pub enum NetworkCommand {
    /// Long press: enter setup mode, or cancel it when already active
    ToggleSetup,
    /// Credential submission from the portal or the admin API
    SubmitCredentials { ssid: String, secret: String },
    /// Explicit abort from the admin API
    CancelSetup,
    /// Scan request; replies with a snapshot, never blocks submission
    Scan {
        respond_to: oneshot::Sender<Vec<WifiNetwork>>,
    },
}

/// Outcome of one pass through the setup flow
enum SetupExit {
    Done,
    Shutdown,
}

/// Outcome of a single join attempt
enum JoinOutcome {
    Connected,
    Failed,
    Cancelled,
    Shutdown,
}

pub struct NetworkMachine<W: WifiLink, P: SetupPortal> {
    wifi: W,
    portal: P,
    store: Arc<ConfigStore>,
    state: NetworkState,
    commands: mpsc::Receiver<NetworkCommand>,
    commands_tx: mpsc::Sender<NetworkCommand>,
}

impl<W: WifiLink, P: SetupPortal> NetworkMachine<W, P> {
    pub fn new(
        wifi: W,
        portal: P,
        store: Arc<ConfigStore>,
    ) -> (Self, NetworkState, mpsc::Sender<NetworkCommand>) {
        let (tx, rx) = mpsc::channel(8);
        let state = NetworkState::new();
        let machine = Self {
            wifi,
            portal,
            store,
            state: state.clone(),
            commands: rx,
            commands_tx: tx.clone(),
        };
        (machine, state, tx)
    }

    pub async fn run(mut self, mut shutdown: broadcast::Receiver<()>) {
        let interval = Duration::from_secs(self.store.get().network.monitor_interval_secs);
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = shutdown.recv() => break,
                command = self.commands.recv() => {
                    match command {
                        Some(NetworkCommand::ToggleSetup) => {
                            if let SetupExit::Shutdown = self.run_setup(&mut shutdown).await {
                                break;
                            }
                        }
                        Some(NetworkCommand::SubmitCredentials { .. }) => {
                            tracing::debug!("Ignoring credentials outside setup mode");
                        }
                        Some(NetworkCommand::CancelSetup) => {}
                        Some(NetworkCommand::Scan { respond_to }) => {
                            let networks = self.wifi.scan().await.unwrap_or_default();
                            let _ = respond_to.send(networks);
                        }
                        None => break,
                    }
                }
                _ = ticker.tick() => {
                    let ssid = self.wifi.connected_ssid().await;
                    let connected = ssid.is_some();
                    self.state.set_connected(ssid);

                    let has_profile = self.store.get().network.saved_profile.is_some();
                    if !connected && !has_profile {
                        tracing::info!("No network and no saved profile, entering setup");
                        if let SetupExit::Shutdown = self.run_setup(&mut shutdown).await {
                            break;
                        }
                        ticker.reset();
                    }
                }
            }
        }

        // Leave no AP or portal behind on shutdown
        self.portal.stop().await;
        let _ = self.wifi.stop_ap().await;
    }

    /// Full setup flow; returns when the machine is back in Monitoring
    async fn run_setup(&mut self, shutdown: &mut broadcast::Receiver<()>) -> SetupExit {
        let config = self.store.get().network;
        self.state.set_error(None);
        self.state.set_phase(NetworkPhase::EnteringApMode);

        // Scan while the radio is still in station mode; AP mode makes
        // scanning unreliable on single-radio hardware.
        let networks = self.wifi.scan().await.unwrap_or_default();

        if let Err(e) = self.raise_ap(&config, shutdown).await {
            tracing::error!("Could not raise setup AP: {e}");
            self.state.set_error(Some(format!("Setup AP failed: {e}")));
            self.state.set_phase(NetworkPhase::Monitoring);
            return SetupExit::Done;
        }

        let session: SharedSession = Arc::new(Mutex::new(CaptiveSession {
            ap_ssid: config.ap_ssid.clone(),
            networks,
            last_error: None,
        }));

        if let Err(e) = self
            .portal
            .start(Arc::clone(&session), self.commands_tx.clone())
            .await
        {
            tracing::error!("Could not start captive portal: {e}");
            self.state.set_error(Some(format!("Portal failed: {e}")));
            let _ = self.wifi.stop_ap().await;
            self.state.set_phase(NetworkPhase::Monitoring);
            return SetupExit::Done;
        }

        self.state.set_phase(NetworkPhase::PortalServing);

        let exit = loop {
            let command = tokio::select! {
                _ = shutdown.recv() => break SetupExit::Shutdown,
                command = self.commands.recv() => command,
            };

            match command {
                Some(NetworkCommand::SubmitCredentials { ssid, secret }) => {
                    match self
                        .try_join(&config, &session, shutdown, ssid, secret)
                        .await
                    {
                        JoinOutcome::Connected | JoinOutcome::Cancelled => {
                            break SetupExit::Done;
                        }
                        JoinOutcome::Shutdown => break SetupExit::Shutdown,
                        // Failed attempt, portal keeps serving
                        JoinOutcome::Failed => {}
                    }
                }
                Some(NetworkCommand::ToggleSetup) | Some(NetworkCommand::CancelSetup) => {
                    tracing::info!("Setup cancelled");
                    break SetupExit::Done;
                }
                Some(NetworkCommand::Scan { respond_to }) => {
                    let networks = match self.wifi.scan().await {
                        Ok(networks) => {
                            session.lock().expect("session lock poisoned").networks =
                                networks.clone();
                            networks
                        }
                        // AP mode often cannot scan, serve the snapshot
                        Err(_) => session.lock().expect("session lock poisoned").networks.clone(),
                    };
                    let _ = respond_to.send(networks);
                }
                None => break SetupExit::Shutdown,
            }
        };

        self.portal.stop().await;
        let _ = self.wifi.stop_ap().await;
        self.state.set_phase(NetworkPhase::Monitoring);
        exit
    }

    /// Bring the AP up with bounded exponential backoff
    async fn raise_ap(
        &mut self,
        config: &crate::config::NetworkConfig,
        shutdown: &mut broadcast::Receiver<()>,
    ) -> Result<(), NetworkError> {
        let mut last = None;
        for attempt in 0..config.ap_retry_attempts {
            match self
                .wifi
                .start_ap(&config.ap_ssid, config.ap_password.as_deref())
                .await
            {
                Ok(()) => return Ok(()),
                Err(e) => {
                    tracing::warn!(
                        "AP attempt {}/{} failed: {e}",
                        attempt + 1,
                        config.ap_retry_attempts
                    );
                    last = Some(e);
                }
            }
            if attempt + 1 < config.ap_retry_attempts {
                // Attempts are capped at 10 by config validation; saturate
                // anyway so a large base delay cannot wrap
                let delay =
                    Duration::from_secs(config.ap_retry_base_secs.saturating_mul(1 << attempt));
                tokio::select! {
                    _ = shutdown.recv() => break,
                    _ = tokio::time::sleep(delay) => {}
                }
            }
        }
        Err(last.unwrap_or_else(|| NetworkError::Radio("no attempts made".to_string())))
    }

    /// One join attempt
    ///
    /// The AP comes down before the station join so the radio is never
    /// commanded into both modes, and comes back up when the join fails.
    async fn try_join(
        &mut self,
        config: &crate::config::NetworkConfig,
        session: &SharedSession,
        shutdown: &mut broadcast::Receiver<()>,
        ssid: String,
        secret: String,
    ) -> JoinOutcome {
        self.state.set_phase(NetworkPhase::Connecting);
        let _ = self.wifi.stop_ap().await;

        let timeout = Duration::from_secs(config.join_timeout_secs);
        // None means the attempt was cancelled. The join future stays pinned
        // across command handling so a scan or a duplicate submission cannot
        // abort it.
        let result = {
            let join = self.wifi.join(&ssid, &secret, timeout);
            tokio::pin!(join);
            loop {
                tokio::select! {
                    result = &mut join => break Some(result),
                    command = self.commands.recv() => match command {
                        Some(NetworkCommand::ToggleSetup)
                        | Some(NetworkCommand::CancelSetup) => break None,
                        // Answered from the session snapshot; the radio is
                        // busy joining
                        Some(NetworkCommand::Scan { respond_to }) => {
                            let networks = session
                                .lock()
                                .expect("session lock poisoned")
                                .networks
                                .clone();
                            let _ = respond_to.send(networks);
                        }
                        Some(NetworkCommand::SubmitCredentials { .. }) => {
                            tracing::debug!("Ignoring credentials while a join is in flight");
                        }
                        None => return JoinOutcome::Shutdown,
                    },
                    _ = shutdown.recv() => return JoinOutcome::Shutdown,
                }
            }
        };

        match result {
            Some(Ok(())) => {
                tracing::info!("Connected to '{ssid}'");
                self.state.set_connected(Some(ssid.clone()));
                self.state.set_error(None);
                if let Err(e) = self.store.update(|c| {
                    c.network.saved_profile = Some(WifiProfile {
                        ssid: ssid.clone(),
                        secret: secret.clone(),
                    });
                }) {
                    tracing::warn!("Failed to persist network profile: {e}");
                }
                JoinOutcome::Connected
            }
            Some(Err(e)) => {
                tracing::warn!("Join to '{ssid}' failed: {e}");
                session.lock().expect("session lock poisoned").last_error =
                    Some(e.to_string());
                self.state.set_error(Some(e.to_string()));
                if let Err(ap_err) = self
                    .wifi
                    .start_ap(&config.ap_ssid, config.ap_password.as_deref())
                    .await
                {
                    tracing::error!("Could not re-raise setup AP: {ap_err}");
                }
                self.state.set_phase(NetworkPhase::PortalServing);
                JoinOutcome::Failed
            }
            // Cancelled mid-join; caller tears everything down
            None => JoinOutcome::Cancelled,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[derive(Clone, Copy)]
    enum JoinBehavior {
        Succeed,
        Reject,
        Hang,
    }

    struct FakeWifi {
        ap_fails: bool,
        ap_attempts: Arc<AtomicU32>,
        join: JoinBehavior,
        connected: Option<String>,
    }

    impl FakeWifi {
        fn new(join: JoinBehavior) -> Self {
            Self {
                ap_fails: false,
                ap_attempts: Arc::new(AtomicU32::new(0)),
                join,
                connected: Some("HomeNet".to_string()),
            }
        }
    }

    impl WifiLink for FakeWifi {
        async fn scan(&mut self) -> Result<Vec<WifiNetwork>, NetworkError> {
            Ok(vec![WifiNetwork {
                ssid: "HomeNet".to_string(),
                signal: 90,
                security: "WPA2".to_string(),
                in_use: false,
            }])
        }

        async fn connected_ssid(&mut self) -> Option<String> {
            self.connected.clone()
        }

        async fn join(
            &mut self,
            ssid: &str,
            _psk: &str,
            timeout: Duration,
        ) -> Result<(), NetworkError> {
            match self.join {
                JoinBehavior::Succeed => {
                    self.connected = Some(ssid.to_string());
                    Ok(())
                }
                JoinBehavior::Reject => {
                    Err(NetworkError::Credential("auth failed".to_string()))
                }
                JoinBehavior::Hang => {
                    tokio::time::sleep(timeout * 10).await;
                    Err(NetworkError::Timeout(timeout))
                }
            }
        }

        async fn start_ap(
            &mut self,
            _ssid: &str,
            _password: Option<&str>,
        ) -> Result<(), NetworkError> {
            self.ap_attempts.fetch_add(1, Ordering::Relaxed);
            if self.ap_fails {
                Err(NetworkError::Radio("radio busy".to_string()))
            } else {
                Ok(())
            }
        }

        async fn stop_ap(&mut self) -> Result<(), NetworkError> {
            Ok(())
        }
    }

    struct FakePortal {
        running: Arc<std::sync::atomic::AtomicBool>,
    }

    impl FakePortal {
        fn new() -> Self {
            Self {
                running: Arc::new(std::sync::atomic::AtomicBool::new(false)),
            }
        }
    }

    impl SetupPortal for FakePortal {
        async fn start(
            &mut self,
            _session: SharedSession,
            _commands: mpsc::Sender<NetworkCommand>,
        ) -> Result<(), NetworkError> {
            self.running.store(true, Ordering::Relaxed);
            Ok(())
        }

        async fn stop(&mut self) {
            self.running.store(false, Ordering::Relaxed);
        }
    }

    fn test_store(tag: &str) -> Arc<ConfigStore> {
        let dir = std::env::temp_dir().join(format!("led-matrix-net-{tag}"));
        std::fs::create_dir_all(&dir).unwrap();
        Arc::new(ConfigStore::new(dir.join("config.json"), Config::default()))
    }

    async fn wait_for_phase(state: &NetworkState, phase: NetworkPhase) {
        for _ in 0..200 {
            if state.snapshot().phase == phase {
                return;
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        panic!(
            "never reached {phase:?}, stuck in {:?}",
            state.snapshot().phase
        );
    }

    #[tokio::test(start_paused = true)]
    async fn long_press_reaches_portal_serving() {
        let (machine, state, tx) =
            NetworkMachine::new(FakeWifi::new(JoinBehavior::Succeed), FakePortal::new(), test_store("portal"));
        let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
        let task = tokio::spawn(machine.run(shutdown_rx));

        tx.send(NetworkCommand::ToggleSetup).await.unwrap();
        wait_for_phase(&state, NetworkPhase::PortalServing).await;

        shutdown_tx.send(()).unwrap();
        task.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn ap_failure_exhausts_retries_then_monitoring_with_error() {
        let mut wifi = FakeWifi::new(JoinBehavior::Succeed);
        wifi.ap_fails = true;
        let attempts = Arc::clone(&wifi.ap_attempts);

        let (machine, state, tx) =
            NetworkMachine::new(wifi, FakePortal::new(), test_store("ap-retry"));
        let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
        let task = tokio::spawn(machine.run(shutdown_rx));

        tx.send(NetworkCommand::ToggleSetup).await.unwrap();

        // Backoff is 2s + 4s, give it plenty
        tokio::time::sleep(Duration::from_secs(30)).await;
        let status = state.snapshot();
        assert_eq!(status.phase, NetworkPhase::Monitoring);
        assert!(status.last_error.is_some());
        assert_eq!(attempts.load(Ordering::Relaxed), 3);

        shutdown_tx.send(()).unwrap();
        task.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn failed_credentials_return_to_portal_with_networks() {
        let (machine, state, tx) =
            NetworkMachine::new(FakeWifi::new(JoinBehavior::Reject), FakePortal::new(), test_store("reject"));
        let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
        let task = tokio::spawn(machine.run(shutdown_rx));

        tx.send(NetworkCommand::ToggleSetup).await.unwrap();
        wait_for_phase(&state, NetworkPhase::PortalServing).await;

        tx.send(NetworkCommand::SubmitCredentials {
            ssid: "HomeNet".to_string(),
            secret: "wrongpass".to_string(),
        })
        .await
        .unwrap();

        tokio::time::sleep(Duration::from_secs(2)).await;
        let status = state.snapshot();
        assert_eq!(status.phase, NetworkPhase::PortalServing);
        assert!(status.last_error.is_some());

        // Discovered networks survive the failed attempt
        let (reply_tx, reply_rx) = oneshot::channel();
        tx.send(NetworkCommand::Scan { respond_to: reply_tx })
            .await
            .unwrap();
        let networks = reply_rx.await.unwrap();
        assert!(!networks.is_empty());

        shutdown_tx.send(()).unwrap();
        task.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn successful_join_persists_profile_and_returns_to_monitoring() {
        let store = test_store("join-ok");
        let (machine, state, tx) = NetworkMachine::new(
            FakeWifi::new(JoinBehavior::Succeed),
            FakePortal::new(),
            Arc::clone(&store),
        );
        let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
        let task = tokio::spawn(machine.run(shutdown_rx));

        tx.send(NetworkCommand::ToggleSetup).await.unwrap();
        wait_for_phase(&state, NetworkPhase::PortalServing).await;

        tx.send(NetworkCommand::SubmitCredentials {
            ssid: "HomeNet".to_string(),
            secret: "hunter22".to_string(),
        })
        .await
        .unwrap();

        wait_for_phase(&state, NetworkPhase::Monitoring).await;
        assert_eq!(state.snapshot().connected_ssid.as_deref(), Some("HomeNet"));
        assert_eq!(
            store.get().network.saved_profile.map(|p| p.ssid),
            Some("HomeNet".to_string())
        );

        shutdown_tx.send(()).unwrap();
        task.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn scan_during_connecting_keeps_join_running() {
        let (machine, state, tx) = NetworkMachine::new(
            FakeWifi::new(JoinBehavior::Hang),
            FakePortal::new(),
            test_store("scan-join"),
        );
        let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
        let task = tokio::spawn(machine.run(shutdown_rx));

        tx.send(NetworkCommand::ToggleSetup).await.unwrap();
        wait_for_phase(&state, NetworkPhase::PortalServing).await;

        tx.send(NetworkCommand::SubmitCredentials {
            ssid: "HomeNet".to_string(),
            secret: "hunter22".to_string(),
        })
        .await
        .unwrap();
        wait_for_phase(&state, NetworkPhase::Connecting).await;

        // A read-only scan is answered from the session and must not
        // abort the join or re-raise the AP
        let (reply_tx, reply_rx) = oneshot::channel();
        tx.send(NetworkCommand::Scan { respond_to: reply_tx })
            .await
            .unwrap();
        let networks = reply_rx.await.unwrap();
        assert!(!networks.is_empty());

        let status = state.snapshot();
        assert_eq!(status.phase, NetworkPhase::Connecting);
        assert!(status.last_error.is_none());

        tx.send(NetworkCommand::CancelSetup).await.unwrap();
        wait_for_phase(&state, NetworkPhase::Monitoring).await;

        shutdown_tx.send(()).unwrap();
        task.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_during_connecting_returns_to_monitoring() {
        let portal = FakePortal::new();
        let portal_running = Arc::clone(&portal.running);
        let (machine, state, tx) =
            NetworkMachine::new(FakeWifi::new(JoinBehavior::Hang), portal, test_store("cancel"));
        let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
        let task = tokio::spawn(machine.run(shutdown_rx));

        tx.send(NetworkCommand::ToggleSetup).await.unwrap();
        wait_for_phase(&state, NetworkPhase::PortalServing).await;

        tx.send(NetworkCommand::SubmitCredentials {
            ssid: "HomeNet".to_string(),
            secret: "hunter22".to_string(),
        })
        .await
        .unwrap();
        wait_for_phase(&state, NetworkPhase::Connecting).await;

        tx.send(NetworkCommand::CancelSetup).await.unwrap();
        wait_for_phase(&state, NetworkPhase::Monitoring).await;
        assert!(!portal_running.load(Ordering::Relaxed));

        shutdown_tx.send(()).unwrap();
        task.await.unwrap();
    }
}
