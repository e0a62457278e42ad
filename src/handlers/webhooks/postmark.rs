//! Postmark inbound email webhook.
//!
//! Customer replies to ticket notifications come back through here. The
//! handler is deliberately forgiving: anything that cannot be matched to a
//! ticket is acknowledged with 200 and `ignored: true` so Postmark does not
//! retry, and attachment or notification failures never fail the webhook.

use axum::extract::State;
use base64::Engine;
use serde::{Deserialize, Serialize};

use crate::db::{queries, AppState};
use crate::email_reply::extract_reply_text;
use crate::error::{AppError, Result};
use crate::extractors::Json;
use crate::models::{SupportTicket, TicketStatus};

const ALLOWED_IMAGE_TYPES: [&str; 4] = ["image/jpeg", "image/png", "image/gif", "image/webp"];

const MAX_ATTACHMENT_SIZE: i64 = 5 * 1024 * 1024;
const MAX_TOTAL_ATTACHMENTS_SIZE: i64 = 20 * 1024 * 1024;

#[derive(Debug, Deserialize)]
pub struct PostmarkInboundPayload {
    #[serde(rename = "From", default)]
    pub from: String,
    #[serde(rename = "Subject", default)]
    pub subject: String,
    #[serde(rename = "TextBody", default)]
    pub text_body: String,
    #[serde(rename = "StrippedTextReply")]
    pub stripped_text_reply: Option<String>,
    #[serde(rename = "MessageID", default)]
    pub message_id: String,
    #[serde(rename = "Headers", default)]
    pub headers: Vec<PostmarkInboundHeader>,
    #[serde(rename = "Attachments", default)]
    pub attachments: Vec<PostmarkInboundAttachment>,
}

#[derive(Debug, Deserialize)]
pub struct PostmarkInboundHeader {
    #[serde(rename = "Name")]
    pub name: String,
    #[serde(rename = "Value")]
    pub value: String,
}

#[derive(Debug, Deserialize)]
pub struct PostmarkInboundAttachment {
    #[serde(rename = "Name")]
    pub name: String,
    #[serde(rename = "Content", default)]
    pub content: String,
    #[serde(rename = "ContentLength", default)]
    pub content_length: i64,
    #[serde(rename = "ContentType", default)]
    pub content_type: String,
    #[serde(rename = "ContentID")]
    pub content_id: Option<String>,
}

impl PostmarkInboundPayload {
    fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|h| h.name.eq_ignore_ascii_case(name))
            .map(|h| h.value.as_str())
    }

    /// Bare sender address, extracted from forms like `Name <a@b.c>`.
    fn from_address(&self) -> String {
        let lower = self.from.to_lowercase();
        match (lower.find('<'), lower.rfind('>')) {
            (Some(start), Some(end)) if start < end => lower[start + 1..end].trim().to_string(),
            _ => lower.trim().to_string(),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct InboundResponse {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ignored: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message_id: Option<String>,
}

impl InboundResponse {
    fn ignored(reason: &'static str) -> Self {
        Self {
            success: true,
            ignored: Some(true),
            reason: Some(reason),
            message_id: None,
        }
    }
}

/// Extract `N` from a `[Ticket #N]` subject tag.
fn ticket_number_from_subject(subject: &str) -> Option<i64> {
    let start = subject.find("[Ticket #")? + "[Ticket #".len();
    let rest = &subject[start..];
    let end = rest.find(']')?;
    rest[..end].parse().ok()
}

pub async fn handle_postmark_inbound(
    State(state): State<AppState>,
    Json(payload): Json<PostmarkInboundPayload>,
) -> Result<Json<InboundResponse>> {
    tracing::info!(
        "Inbound email from {} subject {:?}",
        payload.from,
        payload.subject
    );

    // Loop prevention: our own outbound notifications carry a Message-ID in
    // our domain
    let own_domain_tag = format!("@{}", state.config.email_domain);
    if payload
        .header("Message-ID")
        .is_some_and(|v| v.contains(&own_domain_tag))
    {
        return Ok(Json(InboundResponse::ignored(
            "Outbound notification email",
        )));
    }

    let from_address = payload.from_address();
    let is_system_sender = from_address.contains("noreply@")
        || from_address.contains("no-reply@")
        || (from_address.ends_with(&own_domain_tag) && !from_address.starts_with("support@"));
    if is_system_sender {
        tracing::info!("Ignoring system notification email from {}", from_address);
        return Ok(Json(InboundResponse::ignored("System notification email")));
    }

    let conn = state.db.get()?;

    // In-Reply-To matching is authoritative; the subject tag is a fallback
    // for clients that drop threading headers
    let mut ticket: Option<SupportTicket> = None;
    if let Some(in_reply_to) = payload.header("In-Reply-To") {
        let stored_id = in_reply_to.trim().trim_matches(['<', '>']);
        if let Some(message) = queries::find_message_by_message_id(&conn, stored_id)? {
            ticket = queries::get_ticket_by_id(&conn, &message.ticket_id)?;
            if let Some(ref t) = ticket {
                tracing::info!("Matched ticket #{} via In-Reply-To", t.ticket_number);
            }
        }
    }
    if ticket.is_none() {
        if let Some(number) = ticket_number_from_subject(&payload.subject) {
            ticket = queries::get_ticket_by_number(&conn, number)?;
            if let Some(ref t) = ticket {
                tracing::info!("Matched ticket #{} via subject tag", t.ticket_number);
            }
        }
    }
    let Some(ticket) = ticket else {
        tracing::info!("Could not match email to any ticket, ignoring");
        return Ok(Json(InboundResponse::ignored("No matching ticket found")));
    };

    let is_staff = state.email.is_own_address(&from_address);

    let message_text =
        extract_reply_text(payload.stripped_text_reply.as_deref(), &payload.text_body);
    if message_text.is_empty() {
        return Err(AppError::BadRequest("Empty message".into()));
    }

    let new_message_id = format!("{}@postmark", payload.message_id);
    let new_status = if is_staff {
        TicketStatus::WaitingCustomer
    } else {
        TicketStatus::InProgress
    };

    drop(conn);
    let mut conn = state.db.get()?;
    let stored = queries::add_ticket_message(
        &mut conn,
        &queries::NewTicketMessage {
            ticket_id: &ticket.id,
            user_id: (!is_staff).then_some(ticket.user_id.as_str()),
            is_staff,
            message: &message_text,
            message_id: &new_message_id,
        },
        new_status,
    )?;

    store_attachments(&conn, &stored.id, &payload.attachments);

    let first_message_id =
        queries::first_message_for_ticket(&conn, &ticket.id)?.map(|m| m.message_id);
    let customer_email = queries::get_user_by_id(&conn, &ticket.user_id)?.map(|u| u.email);
    drop(conn);

    tracing::info!(
        "Stored inbound message {} on ticket #{}, status -> {}",
        stored.id,
        ticket.ticket_number,
        new_status.as_ref()
    );

    // Notify the other party; failure never fails the webhook
    let email = state.email.clone();
    let notification_text = message_text.clone();
    let reply_message_id = new_message_id.clone();
    tokio::spawn(async move {
        let result = if is_staff {
            match customer_email {
                Some(customer) => {
                    email
                        .send_ticket_reply(
                            &customer,
                            ticket.ticket_number,
                            &ticket.subject,
                            &notification_text,
                            &reply_message_id,
                            first_message_id.as_deref(),
                        )
                        .await
                }
                None => return,
            }
        } else {
            email
                .send_staff_notification(
                    ticket.ticket_number,
                    &ticket.subject,
                    &from_address,
                    &notification_text,
                )
                .await
        };
        if let Err(e) = result {
            tracing::warn!("Failed to send inbound notification email: {}", e);
        }
    });

    Ok(Json(InboundResponse {
        success: true,
        ignored: None,
        reason: None,
        message_id: Some(stored.id),
    }))
}

/// Persist allow-listed image attachments. Oversized files and per-file
/// failures are skipped without affecting the rest.
fn store_attachments(
    conn: &rusqlite::Connection,
    message_row_id: &str,
    attachments: &[PostmarkInboundAttachment],
) {
    let mut total: i64 = 0;
    for attachment in attachments {
        if !ALLOWED_IMAGE_TYPES.contains(&attachment.content_type.to_lowercase().as_str()) {
            continue;
        }
        if attachment.content_length > MAX_ATTACHMENT_SIZE {
            tracing::info!(
                "Skipping oversized attachment {} ({} bytes)",
                attachment.name,
                attachment.content_length
            );
            continue;
        }
        if total + attachment.content_length > MAX_TOTAL_ATTACHMENTS_SIZE {
            tracing::info!(
                "Skipping attachment {} due to total size limit",
                attachment.name
            );
            continue;
        }
        total += attachment.content_length;

        let data = match base64::engine::general_purpose::STANDARD.decode(&attachment.content) {
            Ok(d) => d,
            Err(e) => {
                tracing::warn!("Failed to decode attachment {}: {}", attachment.name, e);
                continue;
            }
        };

        let content_id = attachment
            .content_id
            .as_deref()
            .map(|c| c.trim_matches(['<', '>']));

        match queries::insert_attachment(
            conn,
            &queries::NewAttachment {
                message_id: message_row_id,
                filename: &attachment.name,
                data: &data,
                content_type: &attachment.content_type,
                content_id,
            },
        ) {
            Ok(_) => tracing::info!("Stored attachment {}", attachment.name),
            Err(e) => {
                tracing::warn!("Failed to store attachment {}: {}", attachment.name, e);
            }
        }
    }
}
