use async_trait::async_trait;
use contract_replay::{Error, HttpClient, Inbox, MailMessage, Method, Request};
use serde::Deserialize;
use std::{fmt, sync::Arc};

const INBOXES: &str = "/api/v2/domains/public/inboxes";
const MESSAGES: &str = "/api/v2/domains/public/messages";

#[derive(Debug, Deserialize)]
struct InboxListing {
    #[serde(default)]
    msgs: Vec<MessageSummary>,
}

#[derive(Debug, Deserialize)]
struct MessageSummary {
    id: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct FullMessage {
    id: String,
    subject: String,
    from: String,
    parts: Vec<MessagePart>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct MessagePart {
    body: String,
}

impl From<FullMessage> for MailMessage {
    fn from(message: FullMessage) -> Self {
        let body = message
            .parts
            .into_iter()
            .map(|part| part.body)
            .collect::<Vec<_>>()
            .join("\n");

        MailMessage {
            id: message.id,
            subject: message.subject,
            from: message.from,
            body,
        }
    }
}

/// The public Mailinator domain, read through the v2 API.
#[derive(Clone)]
pub struct MailinatorInbox {
    http: Arc<dyn HttpClient + Send + Sync>,
    base_url: String,
    token: String,
}

impl fmt::Debug for MailinatorInbox {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MailinatorInbox")
            .field("base_url", &self.base_url)
            .finish()
    }
}

impl MailinatorInbox {
    pub fn new<S1: Into<String>, S2: Into<String>>(
        http: Arc<dyn HttpClient + Send + Sync>,
        base_url: S1,
        token: S2,
    ) -> Self {
        Self {
            http,
            base_url: base_url.into(),
            token: token.into(),
        }
    }

    fn request(&self, method: Method, path: String) -> Request {
        Request::new(method, path).with_query("token", self.token.as_str())
    }
}

/// Mailinator addresses are `<user>@mailinator.com`; the API wants the user alone.
fn user_name(user: &str) -> &str {
    user.split('@').next().unwrap_or(user)
}

#[async_trait]
impl Inbox for MailinatorInbox {
    async fn latest_message(&self, user: &str) -> Result<Option<MailMessage>, Error> {
        let listing = self
            .request(Method::Get, format!("{}/{}", INBOXES, user_name(user)))
            .with_query("limit", "1")
            .with_query("sort", "descending");
        let listing: InboxListing = self
            .http
            .make_request(&self.base_url, &listing)
            .await?
            .error_for_status()?
            .json()?;

        let summary = match listing.msgs.into_iter().next() {
            Some(summary) => summary,
            None => return Ok(None),
        };

        let message: FullMessage = self
            .http
            .make_request(
                &self.base_url,
                &self.request(Method::Get, format!("{}/{}", MESSAGES, summary.id)),
            )
            .await?
            .error_for_status()?
            .json()?;

        Ok(Some(message.into()))
    }

    async fn delete_message(&self, user: &str, id: &str) -> Result<(), Error> {
        self.http
            .make_request(
                &self.base_url,
                &self.request(Method::Delete, format!("{}/{}", MESSAGES, id)),
            )
            .await?
            .error_for_status()?;

        tracing::debug!(user, id, "deleted message");
        Ok(())
    }
}
