use serde::{Deserialize, Serialize};
use strum::{AsRefStr, EnumString};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, AsRefStr, EnumString)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum TicketStatus {
    Open,
    InProgress,
    WaitingCustomer,
    Resolved,
    Closed,
}

impl TicketStatus {
    /// Terminal states reject further replies.
    pub fn is_terminal(&self) -> bool {
        matches!(self, TicketStatus::Resolved | TicketStatus::Closed)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, AsRefStr, EnumString)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum TicketPriority {
    Low,
    Medium,
    High,
    Urgent,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SupportTicket {
    pub id: String,
    /// Sequential display number, used in email subjects ("[Ticket #N]")
    pub ticket_number: i64,
    pub organization_id: String,
    pub user_id: String,
    pub subject: String,
    pub priority: TicketPriority,
    pub status: TicketStatus,
    pub created_at: i64,
    pub updated_at: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TicketMessage {
    pub id: String,
    pub ticket_id: String,
    /// None for staff or external senders
    pub user_id: Option<String>,
    pub is_staff: bool,
    pub message: String,
    /// Email Message-ID (synthetic for portal messages) used for threading
    pub message_id: String,
    pub created_at: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct TicketAttachment {
    pub id: String,
    pub message_id: String,
    pub filename: String,
    #[serde(skip_serializing)]
    pub data: Vec<u8>,
    pub content_type: String,
    /// cid: reference for inline images, angle brackets stripped
    pub content_id: Option<String>,
    pub size: i64,
    /// SHA-256 of the payload; doubles as a URL-guessing-prevention token
    pub hash: String,
    pub created_at: i64,
}
