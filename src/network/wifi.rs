//! WiFi radio operations through NetworkManager.
//!
//! Everything shells out to `nmcli` with list arguments, never through a
//! shell, and SSIDs/passphrases are validated before any command line is
//! built. The `WifiLink` trait is the seam the state machine is generic
//! over, so its logic is tested against a fake radio.

use serde::Serialize;
use std::time::Duration;
use thiserror::Error;
use tokio::process::Command;

pub const HOTSPOT_CONNECTION: &str = "Hotspot";

#[derive(Error, Debug)]
pub enum NetworkError {
    #[error("Radio operation failed: {0}")]
    Radio(String),

    #[error("Credentials rejected: {0}")]
    Credential(String),

    #[error("Timed out after {0:?}")]
    Timeout(Duration),

    #[error("Failed to run nmcli: {0}")]
    Command(#[from] std::io::Error),
}

/// One discovered network, as shown in the setup portal
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WifiNetwork {
    pub ssid: String,
    /// Signal strength 0-100
    pub signal: u8,
    pub security: String,
    pub in_use: bool,
}

/// Station/AP operations on the single radio
pub trait WifiLink: Send {
    /// Scan for nearby networks; deduplicated, strongest first
    fn scan(&mut self) -> impl std::future::Future<Output = Result<Vec<WifiNetwork>, NetworkError>> + Send;

    /// SSID of the current station-mode association, if any
    fn connected_ssid(&mut self) -> impl std::future::Future<Output = Option<String>> + Send;

    /// Join a network, bounded by `timeout`
    fn join(
        &mut self,
        ssid: &str,
        psk: &str,
        timeout: Duration,
    ) -> impl std::future::Future<Output = Result<(), NetworkError>> + Send;

    /// Bring up the setup access point (includes DHCP/DNS for its subnet)
    fn start_ap(
        &mut self,
        ssid: &str,
        password: Option<&str>,
    ) -> impl std::future::Future<Output = Result<(), NetworkError>> + Send;

    /// Tear the access point down; idempotent
    fn stop_ap(&mut self) -> impl std::future::Future<Output = Result<(), NetworkError>> + Send;
}

/// SSIDs are 1-32 bytes with no control characters
pub fn validate_ssid(ssid: &str) -> Result<(), NetworkError> {
    if ssid.is_empty() || ssid.len() > 32 {
        return Err(NetworkError::Credential(
            "SSID must be 1-32 characters".to_string(),
        ));
    }
    if ssid.chars().any(char::is_control) {
        return Err(NetworkError::Credential(
            "SSID contains control characters".to_string(),
        ));
    }
    Ok(())
}

/// WPA passphrases are 8-63 characters; empty means an open network
pub fn validate_psk(psk: &str) -> Result<(), NetworkError> {
    if !psk.is_empty() && (psk.len() < 8 || psk.len() > 63) {
        return Err(NetworkError::Credential(
            "Password must be 8-63 characters".to_string(),
        ));
    }
    Ok(())
}

/// Real radio driven through nmcli
pub struct NmcliWifi {
    interface: String,
}

impl NmcliWifi {
    pub fn new(interface: &str) -> Self {
        Self {
            interface: interface.to_string(),
        }
    }

    async fn nmcli(args: &[&str]) -> Result<String, NetworkError> {
        let output = Command::new("nmcli").args(args).output().await?;
        if output.status.success() {
            Ok(String::from_utf8_lossy(&output.stdout).into_owned())
        } else {
            Err(classify_failure(&String::from_utf8_lossy(&output.stderr)))
        }
    }
}

impl WifiLink for NmcliWifi {
    async fn scan(&mut self) -> Result<Vec<WifiNetwork>, NetworkError> {
        let out = Self::nmcli(&[
            "-t",
            "-f",
            "IN-USE,SSID,SIGNAL,SECURITY",
            "device",
            "wifi",
            "list",
            "ifname",
            self.interface.as_str(),
            "--rescan",
            "yes",
        ])
        .await?;
        Ok(parse_scan_output(&out))
    }

    async fn connected_ssid(&mut self) -> Option<String> {
        let out = Self::nmcli(&["-t", "-f", "ACTIVE,SSID", "device", "wifi", "list"])
            .await
            .ok()?;
        parse_active_ssid(&out)
    }

    async fn join(&mut self, ssid: &str, psk: &str, timeout: Duration) -> Result<(), NetworkError> {
        validate_ssid(ssid)?;
        validate_psk(psk)?;

        let mut args = vec![
            "device",
            "wifi",
            "connect",
            ssid,
            "ifname",
            self.interface.as_str(),
        ];
        if !psk.is_empty() {
            args.push("password");
            args.push(psk);
        }

        match tokio::time::timeout(timeout, Self::nmcli(&args)).await {
            Ok(result) => result.map(|_| ()),
            Err(_) => Err(NetworkError::Timeout(timeout)),
        }
    }

    async fn start_ap(&mut self, ssid: &str, password: Option<&str>) -> Result<(), NetworkError> {
        validate_ssid(ssid)?;
        if let Some(pw) = password {
            validate_psk(pw)?;
        }

        // NetworkManager's hotspot mode runs its own DHCP and DNS scoped
        // to the AP subnet, so no separate responder is needed.
        let mut args = vec![
            "device",
            "wifi",
            "hotspot",
            "ifname",
            self.interface.as_str(),
            "con-name",
            HOTSPOT_CONNECTION,
            "ssid",
            ssid,
        ];
        if let Some(pw) = password.filter(|p| !p.is_empty()) {
            args.push("password");
            args.push(pw);
        }
        Self::nmcli(&args).await.map(|_| ())
    }

    async fn stop_ap(&mut self) -> Result<(), NetworkError> {
        match Self::nmcli(&["connection", "down", HOTSPOT_CONNECTION]).await {
            Ok(_) => Ok(()),
            // Already down is fine
            Err(NetworkError::Radio(msg)) if msg.contains("not an active connection") => Ok(()),
            Err(e) => Err(e),
        }
    }
}

/// Radio stand-in for running without WiFi hardware
pub struct MockWifi {
    pub connected: Option<String>,
}

impl WifiLink for MockWifi {
    async fn scan(&mut self) -> Result<Vec<WifiNetwork>, NetworkError> {
        Ok(vec![WifiNetwork {
            ssid: "MockNet".to_string(),
            signal: 80,
            security: "WPA2".to_string(),
            in_use: self.connected.as_deref() == Some("MockNet"),
        }])
    }

    async fn connected_ssid(&mut self) -> Option<String> {
        self.connected.clone()
    }

    async fn join(&mut self, ssid: &str, psk: &str, _timeout: Duration) -> Result<(), NetworkError> {
        validate_ssid(ssid)?;
        validate_psk(psk)?;
        self.connected = Some(ssid.to_string());
        Ok(())
    }

    async fn start_ap(&mut self, _ssid: &str, _password: Option<&str>) -> Result<(), NetworkError> {
        Ok(())
    }

    async fn stop_ap(&mut self) -> Result<(), NetworkError> {
        Ok(())
    }
}

fn classify_failure(stderr: &str) -> NetworkError {
    let msg = stderr.trim().to_string();
    // nmcli reports rejected secrets in a few phrasings
    if msg.contains("Secrets were required")
        || msg.contains("secrets were required")
        || msg.contains("password")
    {
        NetworkError::Credential(msg)
    } else {
        NetworkError::Radio(msg)
    }
}

/// Split one line of `nmcli -t` output, honoring `\:` escapes in SSIDs
fn split_terse(line: &str) -> Vec<String> {
    let mut fields = Vec::new();
    let mut current = String::new();
    let mut escaped = false;
    for ch in line.chars() {
        if escaped {
            current.push(ch);
            escaped = false;
        } else if ch == '\\' {
            escaped = true;
        } else if ch == ':' {
            fields.push(std::mem::take(&mut current));
        } else {
            current.push(ch);
        }
    }
    fields.push(current);
    fields
}

/// Parse `IN-USE,SSID,SIGNAL,SECURITY` terse output into a deduplicated
/// list sorted by signal strength descending
fn parse_scan_output(output: &str) -> Vec<WifiNetwork> {
    let mut networks: Vec<WifiNetwork> = Vec::new();

    for line in output.lines() {
        let fields = split_terse(line);
        if fields.len() < 4 || fields[1].is_empty() {
            continue;
        }

        let network = WifiNetwork {
            in_use: fields[0] == "*",
            ssid: fields[1].clone(),
            signal: fields[2].parse().unwrap_or(0),
            security: if fields[3].is_empty() {
                "Open".to_string()
            } else {
                fields[3].clone()
            },
        };

        // A hidden duplicate keeps whichever entry is stronger or in use
        match networks.iter_mut().find(|n| n.ssid == network.ssid) {
            Some(existing) => {
                if network.in_use || network.signal > existing.signal {
                    *existing = network;
                }
            }
            None => networks.push(network),
        }
    }

    networks.sort_by(|a, b| b.signal.cmp(&a.signal));
    networks
}

/// Parse `ACTIVE,SSID` terse output into the associated SSID
fn parse_active_ssid(output: &str) -> Option<String> {
    output.lines().find_map(|line| {
        let fields = split_terse(line);
        if fields.len() >= 2 && fields[0] == "yes" && !fields[1].is_empty() {
            Some(fields[1].clone())
        } else {
            None
        }
    })
}
