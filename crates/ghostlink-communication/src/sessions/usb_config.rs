//! USB configuration session (`usb-config`)
//!
//! Used to set up a machine attached over USB: pick a serial port, then
//! configure Wi-Fi, name and password. One session object per setup flow;
//! it never reconnects on its own.

use super::SessionContext;
use crate::protocol::CommandChannel;
use ghostlink_core::data::frame::status;
use ghostlink_core::{ConnectionError, Error, ProtocolError, Result, StatusFrame};
use regex::Regex;
use serde::Serialize;
use serde_json::{json, Value};
use std::fmt;
use std::sync::OnceLock;

fn ipv4_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"^\d{1,3}\.\d{1,3}\.\d{1,3}\.\d{1,3}$").expect("invalid regex pattern")
    })
}

/// Signal quality bucket derived from |rssi|
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SignalStrength {
    Bad,
    Poor,
    Good,
    Best,
}

impl SignalStrength {
    /// Bucket for an rssi reading; the sign is ignored
    pub fn from_rssi(rssi: i64) -> Self {
        match rssi.unsigned_abs() {
            r if r > 75 => SignalStrength::Best,
            r if r > 50 => SignalStrength::Good,
            r if r > 25 => SignalStrength::Poor,
            _ => SignalStrength::Bad,
        }
    }
}

impl fmt::Display for SignalStrength {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SignalStrength::Best => write!(f, "best"),
            SignalStrength::Good => write!(f, "good"),
            SignalStrength::Poor => write!(f, "poor"),
            SignalStrength::Bad => write!(f, "bad"),
        }
    }
}

/// An access point seen by the machine
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WifiNetwork {
    pub ssid: String,
    pub security: String,
    /// Absolute rssi
    pub rssi: u64,
    pub strength: SignalStrength,
}

impl WifiNetwork {
    fn from_value(value: &Value) -> Option<Self> {
        let ssid = value.get("ssid")?.as_str()?.to_string();
        let security = value
            .get("security")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        let rssi = value.get("rssi").and_then(Value::as_i64).unwrap_or(0);
        Some(Self {
            ssid,
            security,
            rssi: rssi.unsigned_abs(),
            strength: SignalStrength::from_rssi(rssi),
        })
    }

    /// True unless the network is open
    pub fn requires_password(&self) -> bool {
        !self.security.is_empty()
    }
}

/// Outcome of `get network`
#[derive(Debug, Clone, PartialEq)]
pub enum NetworkCheck {
    /// Machine joined a network and has an IPv4 address
    Good(StatusFrame),
    /// Not connected yet; ask again later
    TryAgain,
    /// The machine reported an error
    Error(StatusFrame),
}

/// `set network` payload for joining `ssid` as a client
pub fn client_config(ssid: &str, security: &str, password: &str) -> Value {
    let mut config = json!({
        "wifi_mode": "client",
        "ssid": ssid,
        "security": security,
        "method": "dhcp",
    });
    match security.to_uppercase().as_str() {
        "WEP" => config["wepkey"] = json!(password),
        "WPA-PSK" | "WPA2-PSK" => config["psk"] = json!(password),
        _ => {}
    }
    config
}

/// `set network` payload for hosting an access point named `ssid`
pub fn host_config(ssid: &str) -> Value {
    json!({
        "ssid": ssid,
        "wifi_mode": "host",
        "method": "dhcp",
    })
}

/// USB setup session
pub struct UsbConfigSession {
    channel: CommandChannel,
    key: String,
}

impl fmt::Debug for UsbConfigSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UsbConfigSession")
            .field("channel", &self.channel)
            .finish()
    }
}

impl UsbConfigSession {
    /// Open `usb-config`
    pub fn open(ctx: &SessionContext) -> Result<Self> {
        Ok(Self {
            key: ctx.key()?.to_string(),
            channel: ctx.open_channel("usb-config", Some(false))?,
        })
    }

    /// Underlying command channel
    pub fn channel(&self) -> &CommandChannel {
        &self.channel
    }

    async fn ok(&self, command: String) -> Result<StatusFrame> {
        self.channel
            .invoke(command)?
            .expect_status(&[status::OK])
            .await
    }

    /// Serial ports the daemon can see
    pub async fn list(&self) -> Result<Vec<String>> {
        let frame = self.ok("list".to_string()).await?;
        Ok(frame
            .get("ports")
            .and_then(Value::as_array)
            .map(|ports| {
                ports
                    .iter()
                    .filter_map(Value::as_str)
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default())
    }

    /// Exchange keys and attach to `port`; the reply carries a `port` field
    pub async fn connect(&self, port: &str) -> Result<StatusFrame> {
        self.ok(format!("key {}", self.key)).await?;
        let frame = self.ok(format!("connect {}", port)).await?;
        tracing::info!("Attached to machine on {}", port);
        Ok(frame.with_field("port", port))
    }

    /// Try `ports` from last to first; the first that connects wins
    pub async fn try_ports(&self, mut ports: Vec<String>) -> Result<StatusFrame> {
        let mut last_error = None;
        while let Some(port) = ports.pop() {
            match self.connect(&port).await {
                Ok(frame) => return Ok(frame),
                Err(e) if e.is_connection_error() || e.is_fatal() => return Err(e),
                Err(e) => {
                    tracing::debug!("Port {} refused: {}", port, e);
                    last_error = Some(e);
                }
            }
        }
        Err(last_error.unwrap_or_else(|| {
            ConnectionError::InvalidParameters {
                reason: "no serial ports to try".to_string(),
            }
            .into()
        }))
    }

    /// `list`, then [`UsbConfigSession::try_ports`]
    pub async fn discover(&self) -> Result<StatusFrame> {
        let ports = self.list().await?;
        self.try_ports(ports).await
    }

    /// Access points visible to the machine
    pub async fn scan_wifi(&self) -> Result<Vec<WifiNetwork>> {
        let frame = self.ok("scan_wifi".to_string()).await?;
        Ok(frame
            .get("wifi")
            .and_then(Value::as_array)
            .map(|entries| entries.iter().filter_map(WifiNetwork::from_value).collect())
            .unwrap_or_default())
    }

    /// Join `network` as a client
    pub async fn set_wifi(&self, network: &WifiNetwork, password: &str) -> Result<StatusFrame> {
        let config = client_config(&network.ssid, &network.security, password);
        self.ok(format!("set network {}", config)).await
    }

    /// Host an access point named `ssid`
    pub async fn set_ap_mode(&self, ssid: &str) -> Result<StatusFrame> {
        self.ok(format!("set network {}", host_config(ssid))).await
    }

    /// Ask whether the machine is online
    pub async fn machine_network(&self) -> Result<NetworkCheck> {
        let mut responses = self.channel.invoke("get network")?;
        match responses.next().await {
            Ok(frame) => {
                let Some(frame) = frame.as_status() else {
                    return Ok(NetworkCheck::TryAgain);
                };
                let has_ipv4 = frame
                    .get("ipaddr")
                    .and_then(Value::as_array)
                    .and_then(|addrs| addrs.first())
                    .and_then(Value::as_str)
                    .is_some_and(|addr| ipv4_pattern().is_match(addr));
                let has_ssid = frame.str_field("ssid").is_some_and(|s| !s.is_empty());

                if frame.is(status::OK) && has_ipv4 && has_ssid {
                    Ok(NetworkCheck::Good(frame.clone()))
                } else {
                    Ok(NetworkCheck::TryAgain)
                }
            }
            Err(Error::Protocol(ProtocolError::Rejected { payload })) => {
                Ok(NetworkCheck::Error(payload))
            }
            Err(e) => Err(e),
        }
    }

    /// Rename the machine
    pub async fn set_name(&self, name: &str) -> Result<StatusFrame> {
        self.ok(format!("set general {}", json!({ "name": name })))
            .await
    }

    /// Change the machine password; an empty password sends nothing
    pub async fn set_password(&self, password: &str) -> Result<Option<StatusFrame>> {
        if password.is_empty() {
            return Ok(None);
        }
        self.ok(format!("set password {}", password)).await.map(Some)
    }

    /// Authenticate, with or without a password
    pub async fn auth(&self, password: &str) -> Result<StatusFrame> {
        let command = if password.is_empty() {
            "auth".to_string()
        } else {
            format!("auth {}", password)
        };
        self.ok(command).await
    }

    /// Release the connection
    pub fn close(&self) {
        self.channel.transport().close(Some(false));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_signal_strength_buckets() {
        assert_eq!(SignalStrength::from_rssi(-80), SignalStrength::Best);
        assert_eq!(SignalStrength::from_rssi(-60), SignalStrength::Good);
        assert_eq!(SignalStrength::from_rssi(40), SignalStrength::Poor);
        assert_eq!(SignalStrength::from_rssi(-25), SignalStrength::Bad);
        assert_eq!(SignalStrength::from_rssi(0), SignalStrength::Bad);
    }

    #[test]
    fn test_client_config_keys() {
        let wep = client_config("home", "WEP", "secret");
        assert_eq!(wep["wepkey"], "secret");
        assert!(wep.get("psk").is_none());

        let wpa = client_config("home", "wpa2-psk", "secret");
        assert_eq!(wpa["psk"], "secret");
        assert_eq!(wpa["wifi_mode"], "client");
        assert_eq!(wpa["method"], "dhcp");

        let open = client_config("cafe", "", "");
        assert!(open.get("psk").is_none() && open.get("wepkey").is_none());
    }

    #[test]
    fn test_host_config() {
        assert_eq!(
            host_config("printer"),
            json!({"ssid": "printer", "wifi_mode": "host", "method": "dhcp"})
        );
    }

    #[test]
    fn test_wifi_network_from_value() {
        let network =
            WifiNetwork::from_value(&json!({"ssid": "lab", "security": "WPA2-PSK", "rssi": -52}))
                .unwrap();
        assert_eq!(network.rssi, 52);
        assert_eq!(network.strength, SignalStrength::Good);
        assert!(network.requires_password());
        assert!(WifiNetwork::from_value(&json!({"rssi": -10})).is_none());
    }

    #[test]
    fn test_wifi_network_serializes() {
        let network = WifiNetwork::from_value(&json!({"ssid": "lab", "rssi": -90})).unwrap();
        assert_eq!(
            serde_json::to_value(&network).unwrap(),
            json!({"ssid": "lab", "security": "", "rssi": 90, "strength": "best"})
        );
    }

    #[test]
    fn test_ipv4_pattern() {
        assert!(ipv4_pattern().is_match("192.168.1.20"));
        assert!(!ipv4_pattern().is_match("fe80::1"));
    }
}
