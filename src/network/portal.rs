//! Captive portal for WiFi setup.
//!
//! Serves a small page on the access point where a phone picks a network
//! and submits credentials. Common captive-detection probe URLs redirect
//! here so the page opens automatically after association. Credential
//! submissions go to the network state machine over its command channel;
//! the portal never drives the radio itself.

use axum::extract::{Form, State};
use axum::response::{Html, IntoResponse, Json, Redirect};
use axum::routing::{get, post};
use axum::Router;
use serde::Deserialize;
use std::sync::{Arc, Mutex};
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;

use super::wifi::{NetworkError, WifiNetwork};
use super::NetworkCommand;

/// Setup-session state shared with the portal handlers; exists only while
/// the portal phases are active
#[derive(Debug, Clone, Default)]
pub struct CaptiveSession {
    pub ap_ssid: String,
    pub networks: Vec<WifiNetwork>,
    pub last_error: Option<String>,
}

pub type SharedSession = Arc<Mutex<CaptiveSession>>;

/// Portal lifecycle, as seen by the state machine
pub trait SetupPortal: Send {
    fn start(
        &mut self,
        session: SharedSession,
        commands: mpsc::Sender<NetworkCommand>,
    ) -> impl std::future::Future<Output = Result<(), NetworkError>> + Send;

    fn stop(&mut self) -> impl std::future::Future<Output = ()> + Send;
}

#[derive(Clone)]
struct PortalState {
    session: SharedSession,
    commands: mpsc::Sender<NetworkCommand>,
}

/// Axum server bound to the AP subnet
pub struct CaptivePortal {
    port: u16,
    shutdown: Option<watch::Sender<bool>>,
    server: Option<JoinHandle<()>>,
}

impl CaptivePortal {
    pub fn new(port: u16) -> Self {
        Self {
            port,
            shutdown: None,
            server: None,
        }
    }
}

impl SetupPortal for CaptivePortal {
    async fn start(
        &mut self,
        session: SharedSession,
        commands: mpsc::Sender<NetworkCommand>,
    ) -> Result<(), NetworkError> {
        let state = PortalState { session, commands };

        let detection_routes = [
            "/generate_204",
            "/gen_204",
            "/hotspot-detect.html",
            "/library/test/success.html",
            "/ncsi.txt",
            "/connecttest.txt",
            "/redirect",
        ];

        let mut app = Router::new()
            .route("/", get(setup_page))
            .route("/connect", post(submit_credentials))
            .route("/scan", get(scan_networks));
        for route in detection_routes {
            app = app.route(route, get(|| async { Redirect::temporary("/") }));
        }
        let app = app.with_state(state);

        let listener = tokio::net::TcpListener::bind(("0.0.0.0", self.port))
            .await
            .map_err(NetworkError::Command)?;

        let (tx, mut rx) = watch::channel(false);
        self.shutdown = Some(tx);
        self.server = Some(tokio::spawn(async move {
            let result = axum::serve(listener, app)
                .with_graceful_shutdown(async move {
                    let _ = rx.wait_for(|stop| *stop).await;
                })
                .await;
            if let Err(e) = result {
                tracing::error!("Captive portal server error: {e}");
            }
        }));

        tracing::info!("Captive portal listening on port {}", self.port);
        Ok(())
    }

    async fn stop(&mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(true);
        }
        if let Some(server) = self.server.take() {
            let _ = server.await;
        }
        tracing::info!("Captive portal stopped");
    }
}

/// Portal stand-in for running without hardware
pub struct NullPortal;

impl SetupPortal for NullPortal {
    async fn start(
        &mut self,
        _session: SharedSession,
        _commands: mpsc::Sender<NetworkCommand>,
    ) -> Result<(), NetworkError> {
        Ok(())
    }

    async fn stop(&mut self) {}
}

#[derive(Deserialize)]
struct ConnectForm {
    ssid: String,
    #[serde(default)]
    password: String,
}

async fn setup_page(State(state): State<PortalState>) -> Html<String> {
    let session = state.session.lock().expect("session lock poisoned").clone();
    Html(render_setup_page(&session))
}

async fn submit_credentials(
    State(state): State<PortalState>,
    Form(form): Form<ConnectForm>,
) -> impl IntoResponse {
    if form.ssid.is_empty() {
        let mut session = state.session.lock().expect("session lock poisoned").clone();
        session.last_error = Some("Please select a network".to_string());
        return Html(render_setup_page(&session));
    }

    let command = NetworkCommand::SubmitCredentials {
        ssid: form.ssid.clone(),
        secret: form.password,
    };
    if state.commands.try_send(command).is_err() {
        tracing::warn!("Network command channel full, credential submission dropped");
    }

    Html(format!(
        "<html><body><h1>Connecting to {}...</h1>\
         <p>Watch the display panel for the result. If it fails, \
         reconnect to the setup network and try again.</p></body></html>",
        escape_html(&form.ssid)
    ))
}

async fn scan_networks(State(state): State<PortalState>) -> Json<serde_json::Value> {
    let (reply_tx, reply_rx) = oneshot::channel();
    let fresh = if state
        .commands
        .try_send(NetworkCommand::Scan { respond_to: reply_tx })
        .is_ok()
    {
        tokio::time::timeout(std::time::Duration::from_secs(15), reply_rx)
            .await
            .ok()
            .and_then(Result::ok)
    } else {
        None
    };

    let networks = match fresh {
        Some(networks) => networks,
        // Scan unavailable right now, serve the session's snapshot
        None => state
            .session
            .lock()
            .expect("session lock poisoned")
            .networks
            .clone(),
    };
    Json(serde_json::json!({ "networks": networks }))
}

fn render_setup_page(session: &CaptiveSession) -> String {
    let mut options = String::new();
    for network in &session.networks {
        let ssid = escape_html(&network.ssid);
        options.push_str(&format!(
            "<option value=\"{ssid}\">{ssid} ({}%, {})</option>",
            network.signal,
            escape_html(&network.security)
        ));
    }

    let error = session
        .last_error
        .as_ref()
        .map(|e| format!("<p style=\"color:red\">{}</p>", escape_html(e)))
        .unwrap_or_default();

    format!(
        "<html><head><title>{ap} Setup</title>\
         <meta name=\"viewport\" content=\"width=device-width, initial-scale=1\">\
         </head><body>\
         <h1>{ap}</h1>{error}\
         <form method=\"post\" action=\"/connect\">\
         <label>Network <select name=\"ssid\">{options}</select></label><br>\
         <label>Password <input type=\"password\" name=\"password\"></label><br>\
         <button type=\"submit\">Connect</button>\
         </form></body></html>",
        ap = escape_html(&session.ap_ssid),
    )
}

fn escape_html(input: &str) -> String {
    input
        .replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn setup_page_lists_networks_and_error() {
        let session = CaptiveSession {
            ap_ssid: "LED-Display-Setup".to_string(),
            networks: vec![WifiNetwork {
                ssid: "HomeNet".to_string(),
                signal: 87,
                security: "WPA2".to_string(),
                in_use: false,
            }],
            last_error: Some("Connection failed".to_string()),
        };
        let page = render_setup_page(&session);
        assert!(page.contains("HomeNet"));
        assert!(page.contains("87%"));
        assert!(page.contains("Connection failed"));
    }

    #[test]
    fn ssids_are_html_escaped() {
        let session = CaptiveSession {
            ap_ssid: "AP".to_string(),
            networks: vec![WifiNetwork {
                ssid: "<script>evil</script>".to_string(),
                signal: 50,
                security: "Open".to_string(),
                in_use: false,
            }],
            last_error: None,
        };
        let page = render_setup_page(&session);
        assert!(!page.contains("<script>evil"));
        assert!(page.contains("&lt;script&gt;"));
    }
}
