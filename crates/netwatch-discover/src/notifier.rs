//! New-device alerts over the Telegram Bot API.
//!
//! The [`Notifier`] renders the configured template for one device and
//! delivers it through an [`AlertTransport`], retrying with a linearly
//! increasing delay. It never panics on a bad template; an unknown or
//! unbalanced placeholder degrades to a fixed message.

use std::time::Duration;

use netwatch_core::{DeviceRecord, HardwareId};
use serde::{Deserialize, Serialize};

use crate::config::NotifyConfig;
use crate::error::{DeliveryError, NotifyError};

/// Request body for `sendMessage`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OutgoingMessage {
    pub chat_id: String,
    pub text: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parse_mode: Option<String>,
}

/// Delivery channel for rendered alerts.
///
/// One call is one attempt; retry policy lives in [`Notifier`].
#[allow(async_fn_in_trait)]
pub trait AlertTransport {
    async fn send_message(&self, token: &str, message: &OutgoingMessage)
        -> Result<(), DeliveryError>;

    /// Identity/health probe of the endpoint.
    async fn get_me(&self, token: &str) -> Result<(), DeliveryError>;
}

// ── Telegram transport ────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct ApiResponse {
    #[serde(default)]
    description: Option<String>,
}

/// HTTPS transport for the Telegram Bot API.
pub struct TelegramTransport {
    client: reqwest::Client,
    api_base: String,
}

impl TelegramTransport {
    pub fn new(config: &NotifyConfig) -> Result<Self, NotifyError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()
            .map_err(|e| NotifyError::Client(e.to_string()))?;

        Ok(Self {
            client,
            api_base: config.api_base.trim_end_matches('/').to_string(),
        })
    }

    fn endpoint(&self, token: &str, method: &str) -> String {
        format!("{}/bot{}/{}", self.api_base, token, method)
    }

    /// Map a response to success on HTTP 200, otherwise a rejection carrying
    /// the endpoint's description.
    async fn check(response: reqwest::Response) -> Result<(), DeliveryError> {
        let status = response.status();
        if status == reqwest::StatusCode::OK {
            return Ok(());
        }

        let description = match response.json::<ApiResponse>().await {
            Ok(ApiResponse {
                description: Some(d),
            }) => d,
            _ => status.canonical_reason().unwrap_or("unknown error").to_string(),
        };

        Err(DeliveryError::Rejected {
            status: status.as_u16(),
            description,
        })
    }
}

impl AlertTransport for TelegramTransport {
    async fn send_message(
        &self,
        token: &str,
        message: &OutgoingMessage,
    ) -> Result<(), DeliveryError> {
        // Request URLs embed the bot token; strip them from errors.
        let response = self
            .client
            .post(self.endpoint(token, "sendMessage"))
            .json(message)
            .send()
            .await
            .map_err(|e| DeliveryError::Transport(e.without_url()))?;
        Self::check(response).await
    }

    async fn get_me(&self, token: &str) -> Result<(), DeliveryError> {
        let response = self
            .client
            .get(self.endpoint(token, "getMe"))
            .send()
            .await
            .map_err(|e| DeliveryError::Transport(e.without_url()))?;
        Self::check(response).await
    }
}

// ── Notifier ──────────────────────────────────────────────────────

pub struct Notifier<T> {
    config: NotifyConfig,
    transport: T,
}

impl Notifier<TelegramTransport> {
    pub fn telegram(config: &NotifyConfig) -> Result<Self, NotifyError> {
        Ok(Self::new(config.clone(), TelegramTransport::new(config)?))
    }
}

impl<T: AlertTransport> Notifier<T> {
    pub fn new(config: NotifyConfig, transport: T) -> Self {
        Self { config, transport }
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Deliver an alert for a newly discovered device.
    ///
    /// Makes up to `max_retries` attempts, sleeping `retry_delay * attempt`
    /// between them. Missing credentials fail immediately without an attempt.
    pub async fn send_alert(&self, device: &DeviceRecord) -> Result<(), NotifyError> {
        let Some((token, chat_id)) = self.config.credentials() else {
            tracing::warn!(
                identity = %device.identity,
                "Notification credentials not configured, alert not sent"
            );
            return Err(NotifyError::MissingCredentials);
        };

        let message = OutgoingMessage {
            chat_id: chat_id.to_string(),
            text: self.render(device),
            parse_mode: self.parse_mode(),
        };

        let max_attempts = self.config.max_retries.max(1);
        let base_delay = Duration::from_secs(self.config.retry_delay_secs);
        let mut attempt = 1;

        loop {
            match self.transport.send_message(token, &message).await {
                Ok(()) => {
                    tracing::info!(identity = %device.identity, attempt, "Alert delivered");
                    return Ok(());
                }
                Err(e) if attempt >= max_attempts => {
                    tracing::warn!(identity = %device.identity, attempt, error = %e, "Alert delivery failed");
                    tracing::error!(
                        identity = %device.identity,
                        attempts = attempt,
                        "Alert delivery retries exhausted"
                    );
                    return Err(NotifyError::Exhausted {
                        attempts: attempt,
                        last: e,
                    });
                }
                Err(e) => {
                    let delay = base_delay * attempt;
                    tracing::warn!(
                        identity = %device.identity,
                        attempt,
                        retry_in_secs = delay.as_secs(),
                        error = %e,
                        "Alert delivery failed"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
            }
        }
    }

    /// Single, non-retried check that the endpoint accepts the token.
    pub async fn test_connection(&self) -> Result<(), NotifyError> {
        let (token, _) = self
            .config
            .credentials()
            .ok_or(NotifyError::MissingCredentials)?;
        self.transport.get_me(token).await?;
        tracing::info!("Notification endpoint reachable");
        Ok(())
    }

    fn parse_mode(&self) -> Option<String> {
        let mode = self.config.parse_mode.trim();
        (!mode.is_empty()).then(|| mode.to_string())
    }

    fn html_mode(&self) -> bool {
        self.config.parse_mode.trim().eq_ignore_ascii_case("html")
    }

    /// Render the alert text for `device`.
    pub fn render(&self, device: &DeviceRecord) -> String {
        let values = AlertValues::new(device, self.html_mode());
        match render_template(&self.config.alert_message, &values) {
            Ok(text) => text,
            Err(e) => {
                tracing::warn!(error = %e, "Invalid alert template, using fallback message");
                values.fallback()
            }
        }
    }
}

// ── Template rendering ────────────────────────────────────────────

struct AlertValues {
    mac: String,
    ip: String,
    vendor: String,
    timestamp: String,
}

impl AlertValues {
    fn new(device: &DeviceRecord, html: bool) -> Self {
        let mac = device
            .hardware_id()
            .unwrap_or_else(HardwareId::sentinel)
            .to_string();
        let escape = |s: &str| if html { escape_html(s) } else { s.to_string() };

        Self {
            mac: escape(&mac),
            ip: escape(&device.address.to_string()),
            vendor: escape(&device.vendor),
            timestamp: device.first_seen.format("%Y-%m-%d %H:%M:%S UTC").to_string(),
        }
    }

    fn get(&self, name: &str) -> Option<&str> {
        match name {
            "mac" => Some(&self.mac),
            "ip" => Some(&self.ip),
            "vendor" => Some(&self.vendor),
            "timestamp" => Some(&self.timestamp),
            _ => None,
        }
    }

    fn fallback(&self) -> String {
        format!(
            "New device detected\nMAC: {}\nIP: {}\nVendor: {}\nTime: {}",
            self.mac, self.ip, self.vendor, self.timestamp
        )
    }
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
enum TemplateError {
    #[error("unknown placeholder {{{0}}}")]
    UnknownPlaceholder(String),
    #[error("unbalanced brace at byte {0}")]
    Unbalanced(usize),
}

/// Substitute `{name}` placeholders; `{{` and `}}` are literal braces.
fn render_template(template: &str, values: &AlertValues) -> Result<String, TemplateError> {
    let mut out = String::with_capacity(template.len() + 64);
    let mut chars = template.char_indices().peekable();

    while let Some((pos, c)) = chars.next() {
        match c {
            '{' if chars.next_if(|&(_, n)| n == '{').is_some() => out.push('{'),
            '}' if chars.next_if(|&(_, n)| n == '}').is_some() => out.push('}'),
            '{' => {
                let mut name = String::new();
                loop {
                    match chars.next() {
                        Some((_, '}')) => break,
                        Some((_, '{')) | None => return Err(TemplateError::Unbalanced(pos)),
                        Some((_, n)) => name.push(n),
                    }
                }
                let value = values
                    .get(name.trim())
                    .ok_or(TemplateError::UnknownPlaceholder(name))?;
                out.push_str(value);
            }
            '}' => return Err(TemplateError::Unbalanced(pos)),
            other => out.push(other),
        }
    }

    Ok(out)
}

fn escape_html(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            other => out.push(other),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use std::net::IpAddr;
    use std::sync::Mutex;

    use chrono::{TimeZone, Utc};
    use netwatch_core::DeviceStatus;

    use super::*;

    /// Fails the first `failures` calls, then succeeds.
    struct FlakyTransport {
        failures: u32,
        sent: Mutex<Vec<OutgoingMessage>>,
        probes: Mutex<u32>,
    }

    impl FlakyTransport {
        fn new(failures: u32) -> Self {
            Self {
                failures,
                sent: Mutex::new(Vec::new()),
                probes: Mutex::new(0),
            }
        }

        fn attempts(&self) -> usize {
            self.sent.lock().unwrap().len()
        }
    }

    impl AlertTransport for FlakyTransport {
        async fn send_message(
            &self,
            _token: &str,
            message: &OutgoingMessage,
        ) -> Result<(), DeliveryError> {
            let mut sent = self.sent.lock().unwrap();
            sent.push(message.clone());
            if (sent.len() as u32) <= self.failures {
                return Err(DeliveryError::Rejected {
                    status: 502,
                    description: "Bad Gateway".to_string(),
                });
            }
            Ok(())
        }

        async fn get_me(&self, _token: &str) -> Result<(), DeliveryError> {
            *self.probes.lock().unwrap() += 1;
            if self.failures > 0 {
                return Err(DeliveryError::Rejected {
                    status: 401,
                    description: "Unauthorized".to_string(),
                });
            }
            Ok(())
        }
    }

    fn config() -> NotifyConfig {
        NotifyConfig {
            bot_token: Some("123:abc".to_string()),
            chat_id: Some("-100200".to_string()),
            ..NotifyConfig::default()
        }
    }

    fn device(identity: &str, address: &str, vendor: &str) -> DeviceRecord {
        let seen = Utc.with_ymd_and_hms(2026, 2, 24, 10, 0, 0).unwrap();
        let address: IpAddr = address.parse().unwrap();
        DeviceRecord::new(identity, address, vendor, DeviceStatus::Unknown, seen)
    }

    #[test]
    fn test_render_default_template() {
        let notifier = Notifier::new(config(), FlakyTransport::new(0));
        let text = notifier.render(&device("aa:bb:cc:dd:ee:ff", "192.168.1.50", "ExampleVendor"));
        assert_eq!(
            text,
            "⚠️ ALERT: New device detected\nMAC: aa:bb:cc:dd:ee:ff\nIP: 192.168.1.50\n\
             Vendor: ExampleVendor\nTime: 2026-02-24 10:00:00 UTC"
        );
    }

    #[test]
    fn test_render_address_keyed_device_shows_sentinel() {
        let notifier = Notifier::new(config(), FlakyTransport::new(0));
        let text = notifier.render(&device("10.20.0.5", "10.20.0.5", "unknown"));
        assert!(text.contains("MAC: 00:00:00:00:00:00"));
        assert!(text.contains("IP: 10.20.0.5"));
    }

    #[test]
    fn test_render_escapes_html_values() {
        let notifier = Notifier::new(config(), FlakyTransport::new(0));
        let text = notifier.render(&device("aa:bb:cc:dd:ee:ff", "192.168.1.50", "A&B <Labs>"));
        assert!(text.contains("Vendor: A&amp;B &lt;Labs&gt;"));

        let plain = NotifyConfig {
            parse_mode: String::new(),
            ..config()
        };
        let notifier = Notifier::new(plain, FlakyTransport::new(0));
        let text = notifier.render(&device("aa:bb:cc:dd:ee:ff", "192.168.1.50", "A&B <Labs>"));
        assert!(text.contains("Vendor: A&B <Labs>"));
    }

    #[test]
    fn test_render_bad_template_falls_back() {
        for template in ["New {device} at {ip}", "Unclosed {mac", "Stray } brace"] {
            let cfg = NotifyConfig {
                alert_message: template.to_string(),
                ..config()
            };
            let notifier = Notifier::new(cfg, FlakyTransport::new(0));
            let text = notifier.render(&device("aa:bb:cc:dd:ee:ff", "192.168.1.50", "V"));
            assert!(text.starts_with("New device detected\nMAC: aa:bb:cc:dd:ee:ff"), "{template}");
        }
    }

    #[test]
    fn test_render_literal_braces() {
        let cfg = NotifyConfig {
            alert_message: "{{json}} {ip}".to_string(),
            ..config()
        };
        let notifier = Notifier::new(cfg, FlakyTransport::new(0));
        let text = notifier.render(&device("aa:bb:cc:dd:ee:ff", "192.168.1.50", "V"));
        assert_eq!(text, "{json} 192.168.1.50");
    }

    #[test]
    fn test_outgoing_message_body() {
        let message = OutgoingMessage {
            chat_id: "-100200".to_string(),
            text: "hi".to_string(),
            parse_mode: None,
        };
        assert_eq!(
            serde_json::to_value(&message).unwrap(),
            serde_json::json!({"chat_id": "-100200", "text": "hi"})
        );
    }

    #[test]
    fn test_endpoint_url() {
        let cfg = NotifyConfig {
            api_base: "https://api.telegram.org/".to_string(),
            ..config()
        };
        let transport = TelegramTransport::new(&cfg).unwrap();
        assert_eq!(
            transport.endpoint("123:abc", "sendMessage"),
            "https://api.telegram.org/bot123:abc/sendMessage"
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_send_alert_retries_until_success() {
        let notifier = Notifier::new(config(), FlakyTransport::new(2));
        let start = tokio::time::Instant::now();

        notifier
            .send_alert(&device("aa:bb:cc:dd:ee:ff", "192.168.1.50", "V"))
            .await
            .unwrap();

        assert_eq!(notifier.transport().attempts(), 3);
        // 2s after the first failure, 4s after the second.
        assert_eq!(start.elapsed(), Duration::from_secs(6));
    }

    #[tokio::test(start_paused = true)]
    async fn test_send_alert_exhausts_retries() {
        let notifier = Notifier::new(config(), FlakyTransport::new(10));

        let err = notifier
            .send_alert(&device("aa:bb:cc:dd:ee:ff", "192.168.1.50", "V"))
            .await
            .unwrap_err();

        assert!(matches!(err, NotifyError::Exhausted { attempts: 3, .. }));
        assert_eq!(notifier.transport().attempts(), 3);
    }

    #[tokio::test]
    async fn test_missing_credentials_make_no_attempt() {
        let cfg = NotifyConfig {
            bot_token: None,
            ..config()
        };
        let notifier = Notifier::new(cfg, FlakyTransport::new(0));

        let err = notifier
            .send_alert(&device("aa:bb:cc:dd:ee:ff", "192.168.1.50", "V"))
            .await
            .unwrap_err();

        assert!(matches!(err, NotifyError::MissingCredentials));
        assert_eq!(notifier.transport().attempts(), 0);
        assert!(matches!(
            notifier.test_connection().await,
            Err(NotifyError::MissingCredentials)
        ));
    }

    #[tokio::test]
    async fn test_connection_is_single_attempt() {
        let notifier = Notifier::new(config(), FlakyTransport::new(1));
        assert!(notifier.test_connection().await.is_err());
        assert_eq!(*notifier.transport().probes.lock().unwrap(), 1);

        let notifier = Notifier::new(config(), FlakyTransport::new(0));
        assert!(notifier.test_connection().await.is_ok());
    }
}
