//! Built-in notification channels.

mod chat;
mod email;
mod paging;
mod push;
mod webhook;

pub use chat::{ChatFlavor, ChatSender};
pub use email::EmailSender;
pub use paging::{OpsgenieSender, PagerDutySender};
pub use push::PushSender;
pub use webhook::{SIGNATURE_HEADER, WebhookSender, sign_payload};

use super::error::DispatchError;
use crate::model::AlertMessage;

const MAX_ERROR_BODY: usize = 512;

/// Map a non-2xx response to [`DispatchError::Api`]
async fn expect_success(service: &'static str, response: reqwest::Response) -> Result<(), DispatchError> {
    let status = response.status();
    if status.is_success() {
        return Ok(());
    }
    let mut body = response.text().await.unwrap_or_default();
    if body.len() > MAX_ERROR_BODY {
        let mut end = MAX_ERROR_BODY;
        while !body.is_char_boundary(end) {
            end -= 1;
        }
        body.truncate(end);
    }
    Err(DispatchError::Api { service, status: status.as_u16(), body })
}

/// Plain-text body shared by chat and push channels
fn render_text(alert: &AlertMessage) -> String {
    let mut text = format!("{}\n{}", alert.headline(), alert.body);
    if !alert.recipients.is_empty() {
        text.push_str(&format!("\nOn call: {}", alert.recipients.join(", ")));
    }
    text
}
