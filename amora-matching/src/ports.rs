//! Collaborator contracts. The engine owns no wire protocol and no raw CRUD;
//! everything it needs from the outside world comes through these traits so
//! the bot transport, the profile service, and the stores stay swappable.

use std::collections::HashSet;

use amora_shared::AppResult;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::domain::{
    ActiveSession, ChatMessage, EndReason, NewChatMessage, OutboundNotice, PendingProposal,
    ProposalResolution, Profile, UserId, WaitingEntry,
};

/// User attributes, interests, blocks and finished-chat history, owned by the
/// profile service.
#[async_trait]
pub trait ProfileStore: Send + Sync {
    async fn get_profile(&self, user: UserId) -> AppResult<Option<Profile>>;

    async fn get_interests(&self, user: UserId) -> AppResult<Vec<String>>;

    /// Users blocked in either direction relative to `user`.
    async fn get_blocked_pairs(&self, user: UserId) -> AppResult<HashSet<UserId>>;

    /// Partners of chats `user` previously finished.
    async fn get_finished_partners(&self, user: UserId) -> AppResult<HashSet<UserId>>;

    /// Append-only, one direction per call, idempotent on re-append.
    async fn record_finished_chat(&self, user: UserId, partner: UserId) -> AppResult<()>;

    async fn record_block(&self, blocker: UserId, blocked: UserId) -> AppResult<()>;
}

/// Durable conversation log. The store assigns `message_id`, unique and
/// monotonically increasing within a pair.
#[async_trait]
pub trait HistoryStore: Send + Sync {
    async fn append_message(&self, message: NewChatMessage) -> AppResult<ChatMessage>;

    /// Full conversation between the two users, message_id ascending.
    async fn history(&self, user: UserId, partner: UserId) -> AppResult<Vec<ChatMessage>>;
}

/// Outbound edge towards the bot transport. Rendering and localization happen
/// on the other side of this trait.
#[async_trait]
pub trait Messenger: Send + Sync {
    async fn deliver(&self, to: UserId, notice: OutboundNotice) -> AppResult<()>;
}

/// Users currently waiting for a partner.
#[async_trait]
pub trait WaitingPool: Send + Sync {
    /// Insert or replace the entry keyed by user id.
    async fn upsert(&self, entry: &WaitingEntry) -> AppResult<()>;

    /// Returns whether an entry was actually deleted.
    async fn remove(&self, user: UserId) -> AppResult<bool>;

    /// Deletes both entries iff both are still present, atomically with
    /// respect to every other pool mutation. Claims a pairing: only one of two
    /// racing matchers can succeed.
    async fn remove_pair(&self, a: UserId, b: UserId) -> AppResult<bool>;

    /// All entries except the excluded ids, ordered by (enqueued_at, user_id).
    async fn candidates(&self, excluding: &HashSet<UserId>) -> AppResult<Vec<WaitingEntry>>;

    async fn contains(&self, user: UserId) -> AppResult<bool>;

    /// Advisory per-user lock around one search critical section. The TTL is a
    /// backstop against crashed holders.
    async fn try_lock(&self, user: UserId, ttl_secs: u64) -> AppResult<bool>;

    async fn unlock(&self, user: UserId) -> AppResult<()>;
}

/// Persisted chat sessions and continue proposals. The session table is the
/// source of truth for who is in a chat.
#[async_trait]
pub trait SessionStore: Send + Sync {
    async fn active_session(&self, user: UserId) -> AppResult<Option<ActiveSession>>;

    /// Creates the symmetric session rows for both participants in one
    /// transaction, re-checking that neither already has an active session.
    /// Fails with `AlreadyInChat` when either of them does. Two concurrent
    /// creates sharing a participant must serialize so at most one commits.
    async fn create_session(&self, user: UserId, partner: UserId) -> AppResult<ActiveSession>;

    /// Flips both rows of the user's active pairing to finished. Returns the
    /// partner when there was a pairing to finish.
    async fn finish_session(&self, user: UserId, reason: EndReason) -> AppResult<Option<UserId>>;

    async fn create_proposal(
        &self,
        requester: UserId,
        target: UserId,
        expires_at: DateTime<Utc>,
    ) -> AppResult<PendingProposal>;

    /// Most recently created pending proposal aimed at `target`, expired or
    /// not — expiry policy belongs to the caller.
    async fn latest_pending_for_target(&self, target: UserId) -> AppResult<Option<PendingProposal>>;

    /// Pending proposal from `requester` to `target`, expired or not.
    async fn pending_from(
        &self,
        requester: UserId,
        target: UserId,
    ) -> AppResult<Option<PendingProposal>>;

    /// Pending proposal sent by `requester`, expired or not.
    async fn pending_sent_by(&self, requester: UserId) -> AppResult<Option<PendingProposal>>;

    async fn resolve_proposal(&self, id: Uuid, resolution: ProposalResolution) -> AppResult<()>;
}
