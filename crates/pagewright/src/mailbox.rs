//! Notification mailbox contract.
//!
//! Scenarios that trigger mail (account created, password reset) check
//! delivery through a [`Mailbox`]. Delivery is asynchronous, so checks go
//! through [`MailArrival`] and the poller with the mail preset.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use uuid::Uuid;

use crate::result::ProbeResult;
use crate::wait::EventualCondition;

/// One delivered message
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MailMessage {
    /// Mailbox-assigned identifier
    pub id: String,
    /// Recipient address
    pub to: String,
    /// Subject line
    pub subject: String,
    /// Plain-text body
    pub body: String,
    /// Delivery time
    pub received_at: DateTime<Utc>,
}

/// Read access to delivered mail
#[async_trait]
pub trait Mailbox: Send + Sync {
    /// Most recent message to `recipient` whose subject contains
    /// `subject_contains`, if any
    async fn fetch_latest(
        &self,
        recipient: &str,
        subject_contains: &str,
    ) -> ProbeResult<Option<MailMessage>>;
}

/// Shared in-memory mailbox for tests
#[derive(Debug, Clone, Default)]
pub struct MemoryMailbox {
    messages: Arc<Mutex<Vec<MailMessage>>>,
}

impl MemoryMailbox {
    /// Create an empty mailbox
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Deliver a message now; returns its id
    pub fn deliver(&self, to: &str, subject: &str, body: &str) -> String {
        let message = MailMessage {
            id: Uuid::new_v4().to_string(),
            to: to.to_string(),
            subject: subject.to_string(),
            body: body.to_string(),
            received_at: Utc::now(),
        };
        let id = message.id.clone();
        self.messages
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(message);
        id
    }

    /// Deliver a message after `delay` on the tokio runtime
    pub fn deliver_later(&self, delay: Duration, to: &str, subject: &str, body: &str) {
        let mailbox = self.clone();
        let (to, subject, body) = (to.to_string(), subject.to_string(), body.to_string());
        drop(tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let _ = mailbox.deliver(&to, &subject, &body);
        }));
    }

    /// All messages in delivery order
    #[must_use]
    pub fn messages(&self) -> Vec<MailMessage> {
        self.messages
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Number of delivered messages
    #[must_use]
    pub fn len(&self) -> usize {
        self.messages
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Whether nothing was delivered
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl Mailbox for MemoryMailbox {
    async fn fetch_latest(
        &self,
        recipient: &str,
        subject_contains: &str,
    ) -> ProbeResult<Option<MailMessage>> {
        Ok(self
            .messages
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .rev()
            .find(|m| m.to.eq_ignore_ascii_case(recipient) && m.subject.contains(subject_contains))
            .cloned())
    }
}

/// A matching message has been delivered; witness is the message
#[derive(Clone)]
pub struct MailArrival {
    mailbox: Arc<dyn Mailbox>,
    recipient: String,
    subject: String,
}

impl std::fmt::Debug for MailArrival {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MailArrival")
            .field("recipient", &self.recipient)
            .field("subject", &self.subject)
            .finish_non_exhaustive()
    }
}

impl MailArrival {
    /// Wait for mail to `recipient` with `subject` in the subject line
    #[must_use]
    pub fn new(mailbox: Arc<dyn Mailbox>, recipient: &str, subject: &str) -> Self {
        Self {
            mailbox,
            recipient: recipient.to_string(),
            subject: subject.to_string(),
        }
    }
}

#[async_trait]
impl EventualCondition for MailArrival {
    type Witness = MailMessage;

    fn description(&self) -> String {
        format!("mail {:?} to {}", self.subject, self.recipient)
    }

    async fn probe(&self) -> ProbeResult<Option<MailMessage>> {
        self.mailbox
            .fetch_latest(&self.recipient, &self.subject)
            .await
    }
}

#[cfg(feature = "http-mailbox")]
pub use http::HttpMailbox;

#[cfg(feature = "http-mailbox")]
mod http {
    //! Mailpit-compatible HTTP mailbox.

    use super::{Mailbox, MailMessage};
    use crate::result::{ProbeError, ProbeResult};
    use async_trait::async_trait;
    use chrono::{DateTime, Utc};
    use serde::Deserialize;
    use std::time::Duration;

    #[derive(Debug, Deserialize)]
    #[serde(rename_all = "PascalCase")]
    struct Address {
        address: String,
    }

    #[derive(Debug, Deserialize)]
    #[serde(rename_all = "PascalCase")]
    struct Summary {
        #[serde(rename = "ID")]
        id: String,
        #[serde(default)]
        to: Vec<Address>,
        subject: String,
        created: DateTime<Utc>,
    }

    #[derive(Debug, Deserialize)]
    struct SearchResponse {
        #[serde(default)]
        messages: Vec<Summary>,
    }

    #[derive(Debug, Deserialize)]
    #[serde(rename_all = "PascalCase")]
    struct Detail {
        #[serde(default)]
        text: String,
    }

    /// Mailbox backed by a Mailpit API (`/api/v1/search`, `/api/v1/message/{id}`)
    #[derive(Debug, Clone)]
    pub struct HttpMailbox {
        base_url: String,
        client: reqwest::Client,
    }

    impl HttpMailbox {
        /// Create a client for the API at `base_url` (e.g. `http://localhost:8025`)
        pub fn new(base_url: impl Into<String>) -> Self {
            let client = reqwest::Client::builder()
                .timeout(Duration::from_secs(10))
                .build()
                .unwrap_or_default();
            Self::with_client(base_url, client)
        }

        /// Use a preconfigured reqwest client
        pub fn with_client(base_url: impl Into<String>, client: reqwest::Client) -> Self {
            Self {
                base_url: base_url.into().trim_end_matches('/').to_string(),
                client,
            }
        }

        /// Returns the base URL
        pub fn base_url(&self) -> &str {
            &self.base_url
        }

        async fn get_json<T: for<'de> Deserialize<'de>>(
            &self,
            url: &str,
            query: &[(&str, &str)],
        ) -> ProbeResult<T> {
            let failed = |e: reqwest::Error| ProbeError::Mailbox {
                message: format!("{url}: {e}"),
            };
            let resp = self
                .client
                .get(url)
                .query(query)
                .send()
                .await
                .map_err(failed)?;
            let status = resp.status();
            if !status.is_success() {
                let body = resp.text().await.unwrap_or_default();
                return Err(ProbeError::Mailbox {
                    message: format!("{url}: HTTP {}: {body}", status.as_u16()),
                });
            }
            resp.json().await.map_err(failed)
        }
    }

    #[async_trait]
    impl Mailbox for HttpMailbox {
        async fn fetch_latest(
            &self,
            recipient: &str,
            subject_contains: &str,
        ) -> ProbeResult<Option<MailMessage>> {
            let query = format!("to:\"{recipient}\" subject:\"{subject_contains}\"");
            let search: SearchResponse = self
                .get_json(
                    &format!("{}/api/v1/search", self.base_url),
                    &[("query", query.as_str()), ("limit", "20")],
                )
                .await?;

            let Some(latest) = search
                .messages
                .into_iter()
                .filter(|m| {
                    m.subject.contains(subject_contains)
                        && m.to.iter().any(|a| a.address.eq_ignore_ascii_case(recipient))
                })
                .max_by_key(|m| m.created)
            else {
                return Ok(None);
            };

            let detail: Detail = self
                .get_json(
                    &format!("{}/api/v1/message/{}", self.base_url, latest.id),
                    &[],
                )
                .await?;
            Ok(Some(MailMessage {
                id: latest.id,
                to: recipient.to_string(),
                subject: latest.subject,
                body: detail.text,
                received_at: latest.created,
            }))
        }
    }

    #[cfg(test)]
    mod tests {
        use super::*;

        #[test]
        fn test_base_url_trimmed() {
            assert_eq!(
                HttpMailbox::new("http://localhost:8025/").base_url(),
                "http://localhost:8025"
            );
        }

        #[test]
        fn test_search_response_parses() {
            let json = r#"{"messages":[{"ID":"abc","To":[{"Name":"","Address":"a@b.c"}],
                "Subject":"Account Created","Created":"2024-05-01T10:00:00Z"}],"total":1}"#;
            let parsed: SearchResponse = serde_json::from_str(json).unwrap();
            assert_eq!(parsed.messages[0].id, "abc");
            assert_eq!(parsed.messages[0].to[0].address, "a@b.c");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::result::ProbeError;
    use crate::wait::{poll_until, PollConfig};

    #[tokio::test]
    async fn test_fetch_latest_filters_and_prefers_newest() {
        let mailbox = MemoryMailbox::new();
        let _ = mailbox.deliver("a@x.test", "Account Created", "old");
        let _ = mailbox.deliver("b@x.test", "Account Created", "other");
        let _ = mailbox.deliver("A@X.test", "Account Created", "new");
        let _ = mailbox.deliver("a@x.test", "Password Reset", "reset");

        let latest = mailbox
            .fetch_latest("a@x.test", "Created")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(latest.body, "new");
        assert!(mailbox.fetch_latest("c@x.test", "Created").await.unwrap().is_none());
        assert_eq!(mailbox.len(), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_arrival_waits_for_delivery() {
        let mailbox = MemoryMailbox::new();
        mailbox.deliver_later(Duration::from_secs(5), "a@x.test", "Account Created", "Hi Jane");

        let arrival =
            MailArrival::new(Arc::new(mailbox.clone()), "a@x.test", "Account Created");
        let polled = poll_until(&arrival, PollConfig::mail()).await.unwrap();
        assert_eq!(polled.witness.body, "Hi Jane");
        assert!(polled.elapsed >= Duration::from_secs(5));
        assert!(polled.elapsed <= Duration::from_secs(7));
    }

    #[tokio::test(start_paused = true)]
    async fn test_arrival_times_out() {
        let mailbox = Arc::new(MemoryMailbox::new());
        let arrival = MailArrival::new(mailbox, "a@x.test", "Account Created");
        let err = poll_until(&arrival, PollConfig::from_millis(4_000, 2_000))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            ProbeError::ConditionTimeout { ref description, .. } if description.contains("a@x.test")
        ));
    }
}
