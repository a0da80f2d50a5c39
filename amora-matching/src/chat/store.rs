use amora_shared::clients::DbPool;
use amora_shared::{AppError, AppResult, ErrorCode};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use diesel::prelude::*;
use diesel::r2d2::{ConnectionManager, PooledConnection};
use diesel::sql_types::BigInt;
use uuid::Uuid;

use crate::domain::{ActiveSession, EndReason, PendingProposal, ProposalResolution, UserId};
use crate::models::{
    ChatSessionRow, ContinueProposalRow, NewChatSessionRow, NewContinueProposalRow,
};
use crate::ports::SessionStore;

const STATUS_ACTIVE: &str = "active";
const STATUS_FINISHED: &str = "finished";
const STATUS_PENDING: &str = "pending";

/// Diesel-backed session and proposal store. Sessions are mirrored rows (one
/// per direction), so every lookup is a plain `user_id` filter.
pub struct PgSessionStore {
    db: DbPool,
}

impl PgSessionStore {
    pub fn new(db: DbPool) -> Self {
        Self { db }
    }

    fn conn(&self) -> AppResult<PooledConnection<ConnectionManager<PgConnection>>> {
        self.db
            .get()
            .map_err(|e| AppError::internal(format!("db pool exhausted: {e}")))
    }
}

/// Advisory-lock keys for a pairing, lowest id first so two creates for the
/// same users can never deadlock each other.
fn participant_lock_order(user: UserId, partner: UserId) -> (i64, i64) {
    if user.0 <= partner.0 {
        (user.0, partner.0)
    } else {
        (partner.0, user.0)
    }
}

fn to_active(row: ChatSessionRow) -> ActiveSession {
    ActiveSession {
        session_id: row.id,
        user_id: UserId(row.user_id),
        partner_id: UserId(row.partner_id),
        started_at: row.started_at,
    }
}

fn to_pending(row: ContinueProposalRow) -> PendingProposal {
    PendingProposal {
        id: row.id,
        requester_id: UserId(row.requester_id),
        target_id: UserId(row.target_id),
        created_at: row.created_at,
        expires_at: row.expires_at,
    }
}

#[async_trait]
impl SessionStore for PgSessionStore {
    async fn active_session(&self, user: UserId) -> AppResult<Option<ActiveSession>> {
        use crate::schema::chat_sessions::dsl::*;

        let mut conn = self.conn()?;
        let row = chat_sessions
            .filter(user_id.eq(user.0))
            .filter(status.eq(STATUS_ACTIVE))
            .first::<ChatSessionRow>(&mut conn)
            .optional()?;
        Ok(row.map(to_active))
    }

    async fn create_session(&self, user: UserId, partner: UserId) -> AppResult<ActiveSession> {
        use crate::schema::chat_sessions::dsl::*;

        let mut conn = self.conn()?;
        let rows = conn.transaction::<Vec<ChatSessionRow>, AppError, _>(|conn| {
            // Serialize creates that share a participant: the busy count below
            // runs under READ COMMITTED and would otherwise miss a concurrent
            // insert that has not committed yet. The locks release with the
            // transaction.
            let (first, second) = participant_lock_order(user, partner);
            diesel::sql_query("SELECT pg_advisory_xact_lock($1)")
                .bind::<BigInt, _>(first)
                .execute(conn)?;
            diesel::sql_query("SELECT pg_advisory_xact_lock($1)")
                .bind::<BigInt, _>(second)
                .execute(conn)?;

            let busy: i64 = chat_sessions
                .filter(status.eq(STATUS_ACTIVE))
                .filter(user_id.eq_any(vec![user.0, partner.0]))
                .count()
                .get_result(conn)?;
            if busy > 0 {
                return Err(AppError::new(
                    ErrorCode::AlreadyInChat,
                    "a participant is already in an active chat",
                ));
            }

            let new_rows = vec![
                NewChatSessionRow { user_id: user.0, partner_id: partner.0 },
                NewChatSessionRow { user_id: partner.0, partner_id: user.0 },
            ];
            diesel::insert_into(chat_sessions)
                .values(&new_rows)
                .get_results(conn)
                .map_err(Into::into)
        })?;

        rows.into_iter()
            .find(|row| row.user_id == user.0)
            .map(to_active)
            .ok_or_else(|| AppError::internal("session insert returned no row for the requester"))
    }

    async fn finish_session(&self, user: UserId, reason: EndReason) -> AppResult<Option<UserId>> {
        use crate::schema::chat_sessions::dsl::*;

        let mut conn = self.conn()?;
        conn.transaction::<Option<UserId>, AppError, _>(|conn| {
            let row = chat_sessions
                .filter(user_id.eq(user.0))
                .filter(status.eq(STATUS_ACTIVE))
                .first::<ChatSessionRow>(conn)
                .optional()?;
            let Some(row) = row else {
                return Ok(None);
            };

            let other = row.partner_id;
            diesel::update(
                chat_sessions.filter(status.eq(STATUS_ACTIVE)).filter(
                    user_id
                        .eq(user.0)
                        .and(partner_id.eq(other))
                        .or(user_id.eq(other).and(partner_id.eq(user.0))),
                ),
            )
            .set((
                status.eq(STATUS_FINISHED),
                end_reason.eq(Some(reason.as_str())),
                ended_at.eq(Some(Utc::now())),
            ))
            .execute(conn)?;

            Ok(Some(UserId(other)))
        })
    }

    async fn create_proposal(
        &self,
        requester: UserId,
        target: UserId,
        deadline: DateTime<Utc>,
    ) -> AppResult<PendingProposal> {
        use crate::schema::continue_proposals::dsl::*;

        let mut conn = self.conn()?;
        let row: ContinueProposalRow = diesel::insert_into(continue_proposals)
            .values(&NewContinueProposalRow {
                requester_id: requester.0,
                target_id: target.0,
                expires_at: deadline,
            })
            .get_result(&mut conn)?;
        Ok(to_pending(row))
    }

    async fn latest_pending_for_target(
        &self,
        target: UserId,
    ) -> AppResult<Option<PendingProposal>> {
        use crate::schema::continue_proposals::dsl::*;

        let mut conn = self.conn()?;
        let row = continue_proposals
            .filter(target_id.eq(target.0))
            .filter(status.eq(STATUS_PENDING))
            .order(created_at.desc())
            .first::<ContinueProposalRow>(&mut conn)
            .optional()?;
        Ok(row.map(to_pending))
    }

    async fn pending_from(
        &self,
        requester: UserId,
        target: UserId,
    ) -> AppResult<Option<PendingProposal>> {
        use crate::schema::continue_proposals::dsl::*;

        let mut conn = self.conn()?;
        let row = continue_proposals
            .filter(requester_id.eq(requester.0))
            .filter(target_id.eq(target.0))
            .filter(status.eq(STATUS_PENDING))
            .order(created_at.desc())
            .first::<ContinueProposalRow>(&mut conn)
            .optional()?;
        Ok(row.map(to_pending))
    }

    async fn pending_sent_by(&self, requester: UserId) -> AppResult<Option<PendingProposal>> {
        use crate::schema::continue_proposals::dsl::*;

        let mut conn = self.conn()?;
        let row = continue_proposals
            .filter(requester_id.eq(requester.0))
            .filter(status.eq(STATUS_PENDING))
            .order(created_at.desc())
            .first::<ContinueProposalRow>(&mut conn)
            .optional()?;
        Ok(row.map(to_pending))
    }

    async fn resolve_proposal(
        &self,
        proposal_id: Uuid,
        resolution: ProposalResolution,
    ) -> AppResult<()> {
        use crate::schema::continue_proposals::dsl::*;

        let mut conn = self.conn()?;
        match resolution {
            // Expiry is bookkeeping, not a response.
            ProposalResolution::Expired => {
                diesel::update(continue_proposals.filter(id.eq(proposal_id)))
                    .set(status.eq(resolution.as_str()))
                    .execute(&mut conn)?;
            }
            _ => {
                diesel::update(continue_proposals.filter(id.eq(proposal_id)))
                    .set((
                        status.eq(resolution.as_str()),
                        responded_at.eq(Some(Utc::now())),
                    ))
                    .execute(&mut conn)?;
            }
        }
        Ok(())
    }
}
