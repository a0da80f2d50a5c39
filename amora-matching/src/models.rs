use chrono::{DateTime, Utc};
use diesel::prelude::*;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::schema::{chat_sessions, continue_proposals};

// --- ChatSession ---

/// One direction of a pairing; every active chat is stored as two mirrored
/// rows so "the session of user X" is a single-column lookup.
#[derive(Debug, Queryable, Identifiable, Serialize, Clone)]
#[diesel(table_name = chat_sessions)]
pub struct ChatSessionRow {
    pub id: Uuid,
    pub user_id: i64,
    pub partner_id: i64,
    pub status: String,
    pub end_reason: Option<String>,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = chat_sessions)]
pub struct NewChatSessionRow {
    pub user_id: i64,
    pub partner_id: i64,
}

// --- ContinueProposal ---

#[derive(Debug, Queryable, Identifiable, Serialize, Clone)]
#[diesel(table_name = continue_proposals)]
pub struct ContinueProposalRow {
    pub id: Uuid,
    pub requester_id: i64,
    pub target_id: i64,
    pub status: String,
    pub expires_at: DateTime<Utc>,
    pub responded_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Insertable, Deserialize)]
#[diesel(table_name = continue_proposals)]
pub struct NewContinueProposalRow {
    pub requester_id: i64,
    pub target_id: i64,
    pub expires_at: DateTime<Utc>,
}
