//! Support ticket actions for the account portal.

use axum::extract::{Path, State};
use axum::Extension;
use serde::{Deserialize, Serialize};

use crate::db::{queries, AppState};
use crate::error::{AppError, Result};
use crate::extractors::Json;
use crate::middleware::UserContext;
use crate::models::{SupportTicket, TicketMessage, TicketPriority, TicketStatus};

#[derive(Debug, Deserialize)]
pub struct CreateTicketRequest {
    #[serde(default)]
    pub subject: String,
    #[serde(default)]
    pub message: String,
    pub priority: Option<TicketPriority>,
}

#[derive(Debug, Serialize)]
pub struct TicketResponse {
    pub ticket: SupportTicket,
    pub message: TicketMessage,
}

/// POST /api/support/tickets - open a ticket with its initial message.
/// Notification emails are best-effort; the ticket exists even if they fail.
pub async fn create_ticket(
    State(state): State<AppState>,
    Extension(ctx): Extension<UserContext>,
    Json(request): Json<CreateTicketRequest>,
) -> Result<Json<TicketResponse>> {
    let subject = request.subject.trim();
    let message = request.message.trim();
    if subject.is_empty() {
        return Err(AppError::BadRequest("Subject is required".into()));
    }
    if message.is_empty() {
        return Err(AppError::BadRequest("Message is required".into()));
    }

    let mut conn = state.db.get()?;
    let (ticket, initial) = queries::create_ticket_with_message(
        &mut conn,
        &queries::CreateTicket {
            organization_id: &ctx.organization.id,
            user_id: &ctx.user.id,
            subject,
            priority: request.priority.unwrap_or(TicketPriority::Medium),
            message,
            email_domain: &state.config.email_domain,
        },
    )?;
    drop(conn);

    tracing::info!(
        "Created ticket #{} for user {}",
        ticket.ticket_number,
        ctx.user.id
    );

    // Fire-and-forget notifications
    let email = state.email.clone();
    let customer = ctx.user.email.clone();
    let ticket_number = ticket.ticket_number;
    let ticket_subject = ticket.subject.clone();
    let message_id = initial.message_id.clone();
    let preview = initial.message.clone();
    tokio::spawn(async move {
        if let Err(e) = email
            .send_ticket_confirmation(&customer, ticket_number, &ticket_subject, &message_id)
            .await
        {
            tracing::warn!("Failed to send ticket confirmation: {}", e);
        }
        if let Err(e) = email
            .send_staff_notification(ticket_number, &ticket_subject, &customer, &preview)
            .await
        {
            tracing::warn!("Failed to send staff notification: {}", e);
        }
    });

    Ok(Json(TicketResponse {
        ticket,
        message: initial,
    }))
}

#[derive(Debug, Deserialize)]
pub struct ReplyRequest {
    #[serde(default)]
    pub message: String,
}

/// POST /api/support/tickets/{id}/reply - append a customer reply.
/// Replies to CLOSED or RESOLVED tickets are rejected; a new ticket must be
/// opened instead.
pub async fn reply_to_ticket(
    State(state): State<AppState>,
    Extension(ctx): Extension<UserContext>,
    Path(ticket_id): Path<String>,
    Json(request): Json<ReplyRequest>,
) -> Result<Json<TicketResponse>> {
    let message = request.message.trim();
    if message.is_empty() {
        return Err(AppError::BadRequest("Message is required".into()));
    }

    let mut conn = state.db.get()?;
    let ticket = queries::get_ticket_for_user(&conn, &ticket_id, &ctx.user.id)?
        .ok_or_else(|| AppError::NotFound("Ticket not found".into()))?;

    if ticket.status.is_terminal() {
        return Err(AppError::BadRequest(format!(
            "Ticket #{} is {} and cannot accept replies. Please open a new ticket.",
            ticket.ticket_number,
            ticket.status.as_ref().to_lowercase()
        )));
    }

    let message_count = queries::list_messages(&conn, &ticket.id)?.len();
    let message_id = state
        .email
        .ticket_message_id(&ticket.id, &message_count.to_string());

    // A customer reply puts the ticket back in the staff queue
    let reply = queries::add_ticket_message(
        &mut conn,
        &queries::NewTicketMessage {
            ticket_id: &ticket.id,
            user_id: Some(&ctx.user.id),
            is_staff: false,
            message,
            message_id: &message_id,
        },
        TicketStatus::InProgress,
    )?;
    drop(conn);

    let email = state.email.clone();
    let customer = ctx.user.email.clone();
    let ticket_number = ticket.ticket_number;
    let ticket_subject = ticket.subject.clone();
    let preview = reply.message.clone();
    tokio::spawn(async move {
        if let Err(e) = email
            .send_staff_notification(ticket_number, &ticket_subject, &customer, &preview)
            .await
        {
            tracing::warn!("Failed to send staff notification: {}", e);
        }
    });

    Ok(Json(TicketResponse {
        ticket: SupportTicket {
            status: TicketStatus::InProgress,
            ..ticket
        },
        message: reply,
    }))
}
