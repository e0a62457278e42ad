//! Outbound ticket email via Postmark.
//!
//! Every outbound message carries a deterministic `Message-ID` of the form
//! `<ticket-{id}-msg-{n}@{domain}>` so that customer replies thread back to
//! the right ticket through the inbound webhook's `In-Reply-To` lookup.
//!
//! Delivery failures are logged and swallowed by callers: a ticket write must
//! never fail because the notification could not be sent.

use reqwest::Client;
use serde::{Deserialize, Serialize};

use crate::config::Config;
use crate::error::{AppError, Result};

const POSTMARK_API_URL: &str = "https://api.postmarkapp.com/email";

/// Result of attempting to send a ticket email.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EmailSendResult {
    Sent,
    /// No POSTMARK_SERVER_TOKEN configured, log only
    Disabled,
}

#[derive(Debug, Serialize)]
struct PostmarkHeader {
    #[serde(rename = "Name")]
    name: &'static str,
    #[serde(rename = "Value")]
    value: String,
}

/// Postmark send-email request body.
#[derive(Debug, Serialize)]
#[serde(rename_all = "PascalCase")]
struct PostmarkEmailRequest<'a> {
    from: &'a str,
    to: &'a str,
    subject: &'a str,
    text_body: &'a str,
    reply_to: &'a str,
    message_stream: &'static str,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    headers: Vec<PostmarkHeader>,
}

/// Postmark send-email response.
#[derive(Debug, Deserialize)]
struct PostmarkEmailResponse {
    #[serde(rename = "ErrorCode")]
    error_code: i64,
    #[serde(rename = "Message")]
    message: String,
}

/// Email service using the Postmark API.
#[derive(Clone)]
pub struct EmailService {
    /// Server token from ENV; None disables delivery entirely
    server_token: Option<String>,
    /// From address for outbound mail
    support_email: String,
    /// Reply-To address wired to the inbound webhook
    inbound_email: String,
    /// Domain used in synthetic Message-IDs
    email_domain: String,
    http_client: Client,
}

impl EmailService {
    pub fn new(
        server_token: Option<String>,
        support_email: String,
        inbound_email: String,
        email_domain: String,
    ) -> Self {
        Self {
            server_token,
            support_email,
            inbound_email,
            email_domain,
            http_client: Client::new(),
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(
            config.postmark_server_token.clone(),
            config.support_email.clone(),
            config.support_email_inbound.clone(),
            config.email_domain.clone(),
        )
    }

    /// True when the given address belongs to this service's own sending
    /// identity. The inbound webhook uses this to drop mail loops.
    pub fn is_own_address(&self, email: &str) -> bool {
        let email = email.trim().to_lowercase();
        email == self.support_email.to_lowercase() || email == self.inbound_email.to_lowercase()
    }

    /// Confirmation sent to the customer when a ticket is opened. The
    /// `message_id` is the stored ID of the ticket's initial message; replies
    /// quoting it thread back to the ticket.
    pub async fn send_ticket_confirmation(
        &self,
        to: &str,
        ticket_number: i64,
        ticket_subject: &str,
        message_id: &str,
    ) -> Result<EmailSendResult> {
        let subject = format!("[Ticket #{}] {}", ticket_number, ticket_subject);
        let text = format!(
            "Your support ticket has been received.\n\n\
             Ticket #{}: {}\n\n\
             We'll get back to you as soon as possible. You can reply directly \
             to this email to add more information to the ticket.",
            ticket_number, ticket_subject
        );
        self.send(to, &subject, &text, Some(message_id), None).await
    }

    /// Notification sent to the customer when staff reply to their ticket.
    /// `in_reply_to` is the Message-ID of the message being answered, so the
    /// customer's mail client threads the conversation.
    pub async fn send_ticket_reply(
        &self,
        to: &str,
        ticket_number: i64,
        ticket_subject: &str,
        reply_body: &str,
        message_id: &str,
        in_reply_to: Option<&str>,
    ) -> Result<EmailSendResult> {
        let subject = format!("Re: [Ticket #{}] {}", ticket_number, ticket_subject);
        let text = format!(
            "{}\n\n--\nReply to this email to respond to ticket #{}.",
            reply_body, ticket_number
        );
        self.send(to, &subject, &text, Some(message_id), in_reply_to)
            .await
    }

    /// Heads-up to the support inbox when a customer writes in (new ticket or
    /// reply), so staff see activity without polling the dashboard.
    pub async fn send_staff_notification(
        &self,
        ticket_number: i64,
        ticket_subject: &str,
        from_email: &str,
        preview: &str,
    ) -> Result<EmailSendResult> {
        let subject = format!("[Ticket #{}] New message from {}", ticket_number, from_email);
        let mut excerpt = preview.to_string();
        if excerpt.len() > 500 {
            excerpt.truncate(500);
            excerpt.push_str("...");
        }
        let text = format!(
            "New customer message on ticket #{} ({}).\n\nFrom: {}\n\n{}",
            ticket_number, ticket_subject, from_email, excerpt
        );
        let to = self.support_email.clone();
        self.send(&to, &subject, &text, None, None).await
    }

    async fn send(
        &self,
        to: &str,
        subject: &str,
        text_body: &str,
        message_id: Option<&str>,
        in_reply_to: Option<&str>,
    ) -> Result<EmailSendResult> {
        let Some(ref token) = self.server_token else {
            tracing::debug!(to = %to, subject = %subject, "Email disabled, skipping send");
            return Ok(EmailSendResult::Disabled);
        };

        let mut headers = Vec::new();
        if let Some(message_id) = message_id {
            headers.push(PostmarkHeader {
                name: "Message-ID",
                value: format!("<{}>", message_id.trim_matches(['<', '>'])),
            });
        }
        if let Some(in_reply_to) = in_reply_to {
            let value = format!("<{}>", in_reply_to.trim_matches(['<', '>']));
            headers.push(PostmarkHeader {
                name: "In-Reply-To",
                value: value.clone(),
            });
            headers.push(PostmarkHeader {
                name: "References",
                value,
            });
        }

        let request = PostmarkEmailRequest {
            from: &self.support_email,
            to,
            subject,
            text_body,
            reply_to: &self.inbound_email,
            message_stream: "outbound",
            headers,
        };

        let response = self
            .http_client
            .post(POSTMARK_API_URL)
            .header("X-Postmark-Server-Token", token)
            .json(&request)
            .send()
            .await
            .map_err(|e| AppError::Internal(format!("Postmark request failed: {}", e)))?;

        let status = response.status();
        let body: PostmarkEmailResponse = response
            .json()
            .await
            .map_err(|e| AppError::Internal(format!("Invalid Postmark response: {}", e)))?;

        if !status.is_success() || body.error_code != 0 {
            return Err(AppError::Internal(format!(
                "Postmark send failed (code {}): {}",
                body.error_code, body.message
            )));
        }

        tracing::info!(to = %to, subject = %subject, "Sent ticket email");
        Ok(EmailSendResult::Sent)
    }

    /// Synthetic Message-ID for an outbound ticket message. Stored on the
    /// message row so inbound replies can be matched by `In-Reply-To`.
    pub fn ticket_message_id(&self, ticket_id: &str, tag: &str) -> String {
        format!("ticket-{}-msg-{}@{}", ticket_id, tag, self.email_domain)
    }
}
