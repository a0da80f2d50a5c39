use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use validator::Validate;

// ---------------------------------------------------------------------------
// Identity
// ---------------------------------------------------------------------------

/// Transport-assigned stable user identifier. The bot front end owns the
/// numbering; the engine treats it as opaque.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(pub i64);

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ---------------------------------------------------------------------------
// Profile attributes
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Gender {
    Male,
    Female,
    Other { custom: Option<String> },
}

impl Gender {
    /// Gender filtering compares classes only: two `Other` genders match
    /// regardless of the custom label.
    pub fn same_class(&self, other: &Gender) -> bool {
        matches!(
            (self, other),
            (Gender::Male, Gender::Male)
                | (Gender::Female, Gender::Female)
                | (Gender::Other { .. }, Gender::Other { .. })
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Orientation {
    Heterosexual,
    Homosexual,
    Lesbian,
    Bisexual,
    Pansexual,
    Asexual,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, Validate)]
pub struct Location {
    #[validate(range(min = -90.0, max = 90.0))]
    pub latitude: f64,
    #[validate(range(min = -180.0, max = 180.0))]
    pub longitude: f64,
}

/// Profile attributes as served by the external profile store. Interests are
/// fetched through their own accessor and are not duplicated here.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Profile {
    pub user_id: UserId,
    pub username: String,
    pub gender: Gender,
    pub orientation: Orientation,
    pub location: Location,
    pub search_radius_km: Option<f64>,
    pub language: String,
    /// Epoch year until which the user is banned, if any.
    pub ban_until: Option<i32>,
}

// ---------------------------------------------------------------------------
// Waiting pool
// ---------------------------------------------------------------------------

/// Denormalized snapshot of a user awaiting a match. Captured at enqueue time
/// so the selector never re-reads the profile store mid-scan.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WaitingEntry {
    pub user_id: UserId,
    pub username: String,
    pub gender: Gender,
    pub orientation: Orientation,
    pub interests: Vec<String>,
    pub location: Location,
    #[serde(default = "default_enqueued_at")]
    pub enqueued_at: i64,
}

fn default_enqueued_at() -> i64 {
    Utc::now().timestamp_millis()
}

// ---------------------------------------------------------------------------
// Messages
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageKind {
    Text,
    Photo,
    Video,
    Audio,
    Voice,
    Animation,
    VideoNote,
}

impl MessageKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Text => "text",
            Self::Photo => "photo",
            Self::Video => "video",
            Self::Audio => "audio",
            Self::Voice => "voice",
            Self::Animation => "animation",
            Self::VideoNote => "video_note",
        }
    }
}

/// Tagged message payload. Text carries its body inline; every media variant
/// carries an opaque reference into the external media store — binary data
/// never enters the engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum MessageContent {
    Text { body: String },
    Photo { content_ref: String },
    Video { content_ref: String },
    Audio { content_ref: String },
    Voice { content_ref: String },
    Animation { content_ref: String },
    VideoNote { content_ref: String },
}

impl MessageContent {
    pub fn kind(&self) -> MessageKind {
        match self {
            Self::Text { .. } => MessageKind::Text,
            Self::Photo { .. } => MessageKind::Photo,
            Self::Video { .. } => MessageKind::Video,
            Self::Audio { .. } => MessageKind::Audio,
            Self::Voice { .. } => MessageKind::Voice,
            Self::Animation { .. } => MessageKind::Animation,
            Self::VideoNote { .. } => MessageKind::VideoNote,
        }
    }

    pub fn body(&self) -> Option<&str> {
        match self {
            Self::Text { body } => Some(body),
            _ => None,
        }
    }

    pub fn content_ref(&self) -> Option<&str> {
        match self {
            Self::Text { .. } => None,
            Self::Photo { content_ref }
            | Self::Video { content_ref }
            | Self::Audio { content_ref }
            | Self::Voice { content_ref }
            | Self::Animation { content_ref }
            | Self::VideoNote { content_ref } => Some(content_ref),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewChatMessage {
    pub sender_id: UserId,
    pub receiver_id: UserId,
    pub content: MessageContent,
}

/// A persisted message. `message_id` is assigned by the history store and is
/// unique and monotonically increasing within a conversation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub sender_id: UserId,
    pub receiver_id: UserId,
    pub message_id: i64,
    pub content: MessageContent,
    pub sent_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Sessions and proposals
// ---------------------------------------------------------------------------

/// One direction of an active pairing, as seen by `user_id`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ActiveSession {
    pub session_id: Uuid,
    pub user_id: UserId,
    pub partner_id: UserId,
    pub started_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EndReason {
    Left,
    Blocked,
}

impl EndReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Left => "left",
            Self::Blocked => "blocked",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PendingProposal {
    pub id: Uuid,
    pub requester_id: UserId,
    pub target_id: UserId,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProposalResolution {
    Accepted,
    Declined,
    Cancelled,
    Expired,
}

impl ProposalResolution {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Accepted => "accepted",
            Self::Declined => "declined",
            Self::Cancelled => "cancelled",
            Self::Expired => "expired",
        }
    }
}

// ---------------------------------------------------------------------------
// Engine results and outbound notices
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MatchResult {
    pub partner_id: UserId,
    pub partner_username: String,
}

/// Per-user state derived from storage. The pool and the session table are
/// the source of truth; nothing held in memory is authoritative.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum ChatState {
    Idle,
    Searching,
    Active { partner_id: UserId },
    PendingContinue { partner_id: UserId },
}

/// Events pushed to the transport collaborator for rendering. Wording and
/// localization are owned by the transport.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum OutboundNotice {
    MatchFound {
        partner_id: UserId,
        partner_username: String,
    },
    ChatMessage {
        sender_id: UserId,
        message_id: i64,
        content: MessageContent,
    },
    ChatEnded {
        partner_id: UserId,
    },
    ContinueProposed {
        partner_id: UserId,
        partner_username: String,
    },
    ContinueAccepted {
        partner_id: UserId,
        partner_username: String,
    },
    ContinueDeclined {
        partner_id: UserId,
    },
}
