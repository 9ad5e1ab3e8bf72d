use crate::{
    error::Error,
    poll::{wait_until, PollPolicy},
};
use async_trait::async_trait;

pub const MAX_DELETIONS: usize = 20;

#[derive(Debug, Clone, Eq, PartialEq, Default)]
pub struct MailMessage {
    pub id: String,
    pub subject: String,
    pub from: String,
    pub body: String,
}

/// A mailbox that notification flows can inspect.
#[async_trait]
pub trait Inbox: Send + Sync {
    async fn latest_message(&self, user: &str) -> Result<Option<MailMessage>, Error>;

    async fn delete_message(&self, user: &str, id: &str) -> Result<(), Error>;

    /// Deletes messages one at a time until the inbox is empty and returns how many went.
    /// Gives up with a timeout after [`MAX_DELETIONS`] messages.
    async fn delete_all(&self, user: &str) -> Result<usize, Error> {
        for deleted in 0..MAX_DELETIONS {
            match self.latest_message(user).await? {
                Some(message) => self.delete_message(user, &message.id).await?,
                None => return Ok(deleted),
            }
        }

        match self.latest_message(user).await? {
            None => Ok(MAX_DELETIONS),
            Some(_) => Err(Error::Timeout {
                what: format!("inbox of {} to empty", user),
                attempts: MAX_DELETIONS as u32,
            }),
        }
    }
}

pub async fn wait_for_message<I: Inbox + ?Sized>(
    inbox: &I,
    user: &str,
    policy: PollPolicy,
) -> Result<MailMessage, Error> {
    let what = format!("an email to {}", user);
    wait_until(policy, &what, move || inbox.latest_message(user)).await
}
