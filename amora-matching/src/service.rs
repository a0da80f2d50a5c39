use std::collections::HashSet;
use std::sync::Arc;

use amora_shared::{AppError, AppResult, ErrorCode};
use chrono::{Datelike, Duration, Utc};
use validator::Validate;

use crate::chat::MessageRelay;
use crate::config::EngineConfig;
use crate::domain::{
    ActiveSession, ChatMessage, ChatState, EndReason, MatchResult, MessageContent, OutboundNotice,
    PendingProposal, Profile, ProposalResolution, UserId, WaitingEntry,
};
use crate::matching::selector::{self, MatchQuery};
use crate::ports::{HistoryStore, Messenger, ProfileStore, SessionStore, WaitingPool};

/// Facade the bot transport talks to. One instance serves every user; all
/// state lives behind the injected stores, so concurrent calls coordinate
/// through the pool lock and the conditional pair removal, never through
/// in-process state.
pub struct MatchingEngine {
    config: EngineConfig,
    profiles: Arc<dyn ProfileStore>,
    pool: Arc<dyn WaitingPool>,
    sessions: Arc<dyn SessionStore>,
    messenger: Arc<dyn Messenger>,
    relay: MessageRelay,
}

impl MatchingEngine {
    pub fn new(
        config: EngineConfig,
        profiles: Arc<dyn ProfileStore>,
        history: Arc<dyn HistoryStore>,
        messenger: Arc<dyn Messenger>,
        pool: Arc<dyn WaitingPool>,
        sessions: Arc<dyn SessionStore>,
    ) -> Self {
        let relay = MessageRelay::new(sessions.clone(), history, messenger.clone());
        Self { config, profiles, pool, sessions, messenger, relay }
    }

    /// Start (or refresh) a search for `user` and try to pair them right away.
    ///
    /// `Ok(None)` means nobody fits yet: the user stays in the pool and a
    /// later searcher will close the pair and notify them through the
    /// transport.
    pub async fn request_match(&self, user: UserId) -> AppResult<Option<MatchResult>> {
        let profile = self.require_profile(user).await?;
        ensure_not_banned(&profile)?;

        if self.sessions.active_session(user).await?.is_some() {
            return Err(AppError::new(
                ErrorCode::AlreadyInChat,
                "already in an active chat",
            ));
        }

        profile.location.validate().map_err(|e| {
            AppError::with_details(
                ErrorCode::InvalidCoordinates,
                "profile coordinates are out of range",
                serde_json::json!({ "errors": e.to_string() }),
            )
        })?;

        let interests: Vec<String> = self
            .profiles
            .get_interests(user)
            .await?
            .into_iter()
            .filter(|tag| !tag.trim().is_empty())
            .collect();
        if interests.is_empty() {
            return Err(AppError::new(
                ErrorCode::NoInterests,
                "at least one interest is required to search",
            ));
        }

        let radius_km = profile
            .search_radius_km
            .filter(|r| r.is_finite() && *r > 0.0)
            .unwrap_or(self.config.default_radius_km);

        let entry = WaitingEntry {
            user_id: user,
            username: profile.username.clone(),
            gender: profile.gender.clone(),
            orientation: profile.orientation,
            interests,
            location: profile.location,
            enqueued_at: Utc::now().timestamp_millis(),
        };

        if !self
            .pool
            .try_lock(user, self.config.match_lock_ttl_secs)
            .await?
        {
            return Err(AppError::new(
                ErrorCode::SearchInProgress,
                "a search for this user is already running",
            ));
        }

        let outcome = self.try_match(user, entry, radius_km).await;

        if let Err(error) = self.pool.unlock(user).await {
            tracing::warn!(user = %user, %error, "failed to release match lock");
        }

        outcome
    }

    /// Enqueue, scan, and commit under this user's advisory lock.
    async fn try_match(
        &self,
        user: UserId,
        entry: WaitingEntry,
        radius_km: f64,
    ) -> AppResult<Option<MatchResult>> {
        self.pool.upsert(&entry).await?;

        let mut exclusions: HashSet<UserId> = self.profiles.get_blocked_pairs(user).await?;
        exclusions.extend(self.profiles.get_finished_partners(user).await?);
        exclusions.insert(user);

        loop {
            let candidates = self.pool.candidates(&exclusions).await?;
            let query = MatchQuery { requester: &entry, radius_km, exclusions: &exclusions };
            let Some(candidate) = selector::find_match(&query, &candidates) else {
                return Ok(None);
            };
            let partner = candidate.entry.user_id;

            if !self.pool.remove_pair(user, partner).await? {
                if self.pool.contains(user).await? {
                    // The candidate got claimed first; rescan without them.
                    tracing::debug!(
                        user = %user,
                        lost = %partner,
                        "candidate claimed by a concurrent search, rescanning"
                    );
                    exclusions.insert(partner);
                    continue;
                }
                // Our own entry is gone: either a concurrent search matched
                // us (the session already exists) or the user cancelled
                // mid-flight.
                return match self.sessions.active_session(user).await? {
                    Some(session) => {
                        Ok(Some(self.match_result_for(session.partner_id).await?))
                    }
                    None => Ok(None),
                };
            }

            match self.sessions.create_session(user, partner).await {
                Ok(_) => {
                    tracing::info!(
                        user = %user,
                        partner = %partner,
                        distance_km = candidate.distance_km,
                        relaxation_k = candidate.relaxation_k,
                        "match confirmed"
                    );
                    self.notify(
                        partner,
                        OutboundNotice::MatchFound {
                            partner_id: user,
                            partner_username: entry.username.clone(),
                        },
                    )
                    .await;
                    return Ok(Some(MatchResult {
                        partner_id: partner,
                        partner_username: candidate.entry.username.clone(),
                    }));
                }
                Err(AppError::Known { code: ErrorCode::AlreadyInChat, .. }) => {
                    // A session slipped in between the pool claim and the
                    // insert. Whoever is still free goes back into the pool.
                    tracing::warn!(
                        user = %user,
                        partner = %partner,
                        "session race after pool claim, restoring pool entries"
                    );
                    if self.sessions.active_session(partner).await?.is_none() {
                        self.pool.upsert(&candidate.entry).await?;
                    }
                    if let Some(session) = self.sessions.active_session(user).await? {
                        return Ok(Some(self.match_result_for(session.partner_id).await?));
                    }
                    self.pool.upsert(&entry).await?;
                    exclusions.insert(partner);
                    continue;
                }
                Err(error) => return Err(error),
            }
        }
    }

    /// Leave the waiting pool. Returns whether an entry was actually removed.
    ///
    /// Deliberately does not take the match lock: cancelling must work even
    /// while somebody else's search is scanning this user.
    pub async fn cancel_search(&self, user: UserId) -> AppResult<bool> {
        self.pool.remove(user).await
    }

    /// Leave the current chat. Writes the finished-chat markers for both
    /// directions, then flips the session rows; every step is idempotent, so
    /// a retry after a partial storage failure converges.
    pub async fn end_chat(&self, user: UserId) -> AppResult<UserId> {
        let session = self.require_session(user).await?;
        let partner = session.partner_id;

        self.profiles.record_finished_chat(user, partner).await?;
        self.profiles.record_finished_chat(partner, user).await?;
        self.sessions.finish_session(user, EndReason::Left).await?;

        self.notify(partner, OutboundNotice::ChatEnded { partner_id: user }).await;
        Ok(partner)
    }

    /// Block the current partner and end the chat. No finished-chat markers
    /// are written; the block itself keeps the pair from re-matching.
    pub async fn block_partner(&self, user: UserId) -> AppResult<UserId> {
        let session = self.require_session(user).await?;
        let partner = session.partner_id;

        self.profiles.record_block(user, partner).await?;
        self.sessions.finish_session(user, EndReason::Blocked).await?;

        self.notify(partner, OutboundNotice::ChatEnded { partner_id: user }).await;
        Ok(partner)
    }

    pub async fn send_message(
        &self,
        sender: UserId,
        content: MessageContent,
    ) -> AppResult<ChatMessage> {
        self.relay.relay(sender, content).await
    }

    pub async fn history_with(
        &self,
        user: UserId,
        partner: UserId,
    ) -> AppResult<Vec<ChatMessage>> {
        self.relay.history_with(user, partner).await
    }

    /// Offer to reopen a previously finished chat with `partner`.
    pub async fn propose_continue(
        &self,
        user: UserId,
        partner: UserId,
    ) -> AppResult<PendingProposal> {
        if user == partner {
            return Err(AppError::new(
                ErrorCode::SelfProposal,
                "cannot propose a chat with yourself",
            ));
        }

        let profile = self.require_profile(user).await?;
        ensure_not_banned(&profile)?;

        if self.sessions.active_session(user).await?.is_some() {
            return Err(AppError::new(
                ErrorCode::AlreadyInChat,
                "leave the current chat before proposing another",
            ));
        }

        let blocked = self.profiles.get_blocked_pairs(user).await?;
        let finished = self.profiles.get_finished_partners(user).await?;
        if blocked.contains(&partner) || !finished.contains(&partner) {
            return Err(AppError::new(
                ErrorCode::NoSharedHistory,
                "no finished chat with this user to continue",
            ));
        }

        if self.sessions.active_session(partner).await?.is_some() {
            return Err(AppError::new(
                ErrorCode::PartnerBusy,
                "partner is in another chat right now",
            ));
        }

        // One outstanding proposal per pair, in either direction. Stale
        // pending rows are expired here rather than by a sweeper.
        for (a, b) in [(user, partner), (partner, user)] {
            if let Some(existing) = self.sessions.pending_from(a, b).await? {
                if existing.expires_at > Utc::now() {
                    return Err(AppError::new(
                        ErrorCode::ProposalPending,
                        "a proposal between you two is already waiting",
                    ));
                }
                self.sessions
                    .resolve_proposal(existing.id, ProposalResolution::Expired)
                    .await?;
            }
        }

        let deadline = Utc::now() + Duration::seconds(self.config.proposal_ttl_secs);
        let proposal = self.sessions.create_proposal(user, partner, deadline).await?;
        tracing::info!(user = %user, partner = %partner, proposal = %proposal.id, "continue proposed");

        self.notify(
            partner,
            OutboundNotice::ContinueProposed {
                partner_id: user,
                partner_username: profile.username.clone(),
            },
        )
        .await;

        Ok(proposal)
    }

    /// Accept or decline the most recent proposal waiting on `user`.
    ///
    /// Accepting while the proposer is busy leaves the proposal pending, so
    /// it can still be accepted once they are free (until it expires).
    pub async fn respond_continue(
        &self,
        user: UserId,
        accept: bool,
    ) -> AppResult<Option<MatchResult>> {
        let proposal = self
            .sessions
            .latest_pending_for_target(user)
            .await?
            .ok_or_else(|| {
                AppError::new(ErrorCode::ProposalNotFound, "no proposal waiting for you")
            })?;

        if Utc::now() > proposal.expires_at {
            self.sessions
                .resolve_proposal(proposal.id, ProposalResolution::Expired)
                .await?;
            return Err(AppError::new(
                ErrorCode::ProposalExpired,
                "this proposal has expired",
            ));
        }

        let requester = proposal.requester_id;

        if !accept {
            self.sessions
                .resolve_proposal(proposal.id, ProposalResolution::Declined)
                .await?;
            self.notify(requester, OutboundNotice::ContinueDeclined { partner_id: user })
                .await;
            return Ok(None);
        }

        if self.sessions.active_session(user).await?.is_some() {
            return Err(AppError::new(
                ErrorCode::AlreadyInChat,
                "leave the current chat before accepting",
            ));
        }
        if self.sessions.active_session(requester).await?.is_some() {
            return Err(AppError::new(
                ErrorCode::PartnerBusy,
                "the proposer is in another chat right now",
            ));
        }

        self.sessions.create_session(user, requester).await?;
        self.sessions
            .resolve_proposal(proposal.id, ProposalResolution::Accepted)
            .await?;

        let result = self.match_result_for(requester).await?;
        let responder_name = self
            .profiles
            .get_profile(user)
            .await?
            .map(|p| p.username)
            .unwrap_or_default();
        self.notify(
            requester,
            OutboundNotice::ContinueAccepted {
                partner_id: user,
                partner_username: responder_name,
            },
        )
        .await;

        Ok(Some(result))
    }

    /// Withdraw a proposal `user` previously sent to `partner`.
    pub async fn cancel_continue(&self, user: UserId, partner: UserId) -> AppResult<()> {
        let proposal = self
            .sessions
            .pending_from(user, partner)
            .await?
            .ok_or_else(|| {
                AppError::new(ErrorCode::ProposalNotFound, "no outstanding proposal to cancel")
            })?;

        if Utc::now() > proposal.expires_at {
            self.sessions
                .resolve_proposal(proposal.id, ProposalResolution::Expired)
                .await?;
            return Err(AppError::new(
                ErrorCode::ProposalExpired,
                "this proposal has already expired",
            ));
        }

        self.sessions
            .resolve_proposal(proposal.id, ProposalResolution::Cancelled)
            .await
    }

    /// The proposal `respond_continue` would act on, if any.
    pub async fn pending_proposal(&self, user: UserId) -> AppResult<Option<PendingProposal>> {
        let Some(proposal) = self.sessions.latest_pending_for_target(user).await? else {
            return Ok(None);
        };
        if Utc::now() > proposal.expires_at {
            self.sessions
                .resolve_proposal(proposal.id, ProposalResolution::Expired)
                .await?;
            return Ok(None);
        }
        Ok(Some(proposal))
    }

    /// Where the user currently stands, derived entirely from storage.
    pub async fn chat_state(&self, user: UserId) -> AppResult<ChatState> {
        if let Some(session) = self.sessions.active_session(user).await? {
            return Ok(ChatState::Active { partner_id: session.partner_id });
        }
        if self.pool.contains(user).await? {
            return Ok(ChatState::Searching);
        }
        if let Some(proposal) = self.sessions.pending_sent_by(user).await? {
            if proposal.expires_at > Utc::now() {
                return Ok(ChatState::PendingContinue { partner_id: proposal.target_id });
            }
            self.sessions
                .resolve_proposal(proposal.id, ProposalResolution::Expired)
                .await?;
        }
        Ok(ChatState::Idle)
    }

    async fn require_profile(&self, user: UserId) -> AppResult<Profile> {
        self.profiles
            .get_profile(user)
            .await?
            .ok_or_else(|| AppError::new(ErrorCode::ProfileNotFound, "profile not found"))
    }

    async fn require_session(&self, user: UserId) -> AppResult<ActiveSession> {
        self.sessions
            .active_session(user)
            .await?
            .ok_or_else(|| AppError::new(ErrorCode::NotInChat, "no active chat"))
    }

    async fn match_result_for(&self, partner: UserId) -> AppResult<MatchResult> {
        let username = self
            .profiles
            .get_profile(partner)
            .await?
            .map(|p| p.username)
            .unwrap_or_default();
        Ok(MatchResult { partner_id: partner, partner_username: username })
    }

    /// Best-effort push to the transport. State changes never roll back on a
    /// delivery failure; the failure is logged and the transport catches up
    /// from storage next time the user interacts.
    async fn notify(&self, to: UserId, notice: OutboundNotice) {
        if let Err(error) = self.messenger.deliver(to, notice).await {
            tracing::warn!(to = %to, %error, "failed to deliver notice");
        }
    }
}

fn ensure_not_banned(profile: &Profile) -> AppResult<()> {
    if let Some(until) = profile.ban_until {
        if Utc::now().year() < until {
            return Err(AppError::with_details(
                ErrorCode::UserBanned,
                "account is banned from matching",
                serde_json::json!({ "until_year": until }),
            ));
        }
    }
    Ok(())
}
