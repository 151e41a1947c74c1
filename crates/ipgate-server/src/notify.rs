use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};

/// Embed colour (red).
pub const ALERT_COLOR: u32 = 16_711_680;

pub const ALERT_THUMBNAIL: &str =
    "https://em-content.zobj.net/source/noto-emoji-animations/344/police-car-light_1f6a8.gif";

const NOT_PROVIDED: &str = "Not provided";

// ── Data types ───────────────────────────────────────────────────────────────

/// Alert as received on `/send-message`.
#[derive(Debug, Clone, Deserialize)]
pub struct Alert {
    pub nome_empresa: String,
    pub client_name: String,
    pub number_client: String,
    pub msg: String,
    pub url_opa: Option<String>,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct WebhookPayload {
    pub embeds: Vec<Embed>,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct Embed {
    #[serde(rename = "type")]
    pub kind: &'static str,
    pub title: String,
    pub description: String,
    pub color: u32,
    pub thumbnail: Thumbnail,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    pub fields: Vec<EmbedField>,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct Thumbnail {
    pub url: &'static str,
    pub height: u32,
    pub width: u32,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct EmbedField {
    pub name: &'static str,
    pub value: String,
    pub inline: bool,
}

fn or_not_provided(value: &str) -> &str {
    if value.trim().is_empty() {
        NOT_PROVIDED
    } else {
        value
    }
}

impl WebhookPayload {
    pub fn from_alert(alert: &Alert) -> Self {
        let company = or_not_provided(&alert.nome_empresa);
        let embed = Embed {
            kind: "rich",
            title: format!("Attention: log in to the support console for company {company}"),
            description: or_not_provided(&alert.msg).to_owned(),
            color: ALERT_COLOR,
            thumbnail: Thumbnail {
                url: ALERT_THUMBNAIL,
                height: 0,
                width: 0,
            },
            url: alert.url_opa.clone().filter(|u| !u.trim().is_empty()),
            fields: vec![
                EmbedField {
                    name: "CLIENT",
                    value: format!("`{}`", or_not_provided(&alert.client_name)),
                    inline: true,
                },
                EmbedField {
                    name: "NUMBER",
                    value: format!("`{}`", or_not_provided(&alert.number_client)),
                    inline: true,
                },
            ],
        };
        Self {
            embeds: vec![embed],
        }
    }
}

// ── Notifier ─────────────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum NotifyError {
    #[error("no webhook URL configured")]
    NotConfigured,
    #[error("webhook request failed: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("webhook responded with status {0}")]
    Status(reqwest::StatusCode),
}

/// Forwards alerts to the configured webhook. One attempt per alert.
#[derive(Clone)]
pub struct Notifier {
    client: reqwest::Client,
    url: Option<reqwest::Url>,
}

impl Notifier {
    pub fn new(url: Option<reqwest::Url>, timeout: Duration) -> Result<Self, NotifyError> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self { client, url })
    }

    pub fn is_configured(&self) -> bool {
        self.url.is_some()
    }

    pub async fn send(&self, alert: &Alert) -> Result<(), NotifyError> {
        let url = self.url.as_ref().ok_or(NotifyError::NotConfigured)?;
        let payload = WebhookPayload::from_alert(alert);

        let resp = self.client.post(url.clone()).json(&payload).send().await?;
        let status = resp.status();
        if !status.is_success() {
            warn!(%status, company = %alert.nome_empresa, "webhook rejected alert");
            return Err(NotifyError::Status(status));
        }

        debug!(%status, company = %alert.nome_empresa, "alert delivered");
        Ok(())
    }
}
