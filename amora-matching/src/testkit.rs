//! In-memory fakes for every collaborator port plus a harness wiring them
//! into an engine. Tests drive the real service logic; only the I/O edges are
//! faked, and each fake honors the same contract as its production adapter.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use amora_shared::{AppError, AppResult, ErrorCode};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::config::EngineConfig;
use crate::domain::{
    ActiveSession, ChatMessage, EndReason, Gender, Location, NewChatMessage, Orientation,
    OutboundNotice, PendingProposal, Profile, ProposalResolution, UserId, WaitingEntry,
};
use crate::ports::{HistoryStore, Messenger, ProfileStore, SessionStore, WaitingPool};
use crate::service::MatchingEngine;

// --- FakeProfileStore ---

#[derive(Default)]
pub(crate) struct FakeProfileStore {
    profiles: Mutex<HashMap<UserId, Profile>>,
    interests: Mutex<HashMap<UserId, Vec<String>>>,
    blocks: Mutex<HashSet<(UserId, UserId)>>,
    finished: Mutex<HashSet<(UserId, UserId)>>,
}

impl FakeProfileStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn put_profile(&self, profile: Profile, interests: Vec<String>) {
        self.interests.lock().unwrap().insert(profile.user_id, interests);
        self.profiles.lock().unwrap().insert(profile.user_id, profile);
    }

    pub fn set_ban_until(&self, user: UserId, ban_until: Option<i32>) {
        if let Some(profile) = self.profiles.lock().unwrap().get_mut(&user) {
            profile.ban_until = ban_until;
        }
    }

    pub fn add_block(&self, blocker: UserId, blocked: UserId) {
        self.blocks.lock().unwrap().insert((blocker, blocked));
    }

    pub fn finished_pairs(&self) -> HashSet<(UserId, UserId)> {
        self.finished.lock().unwrap().clone()
    }

    pub fn blocked_pairs_raw(&self) -> HashSet<(UserId, UserId)> {
        self.blocks.lock().unwrap().clone()
    }
}

#[async_trait]
impl ProfileStore for FakeProfileStore {
    async fn get_profile(&self, user: UserId) -> AppResult<Option<Profile>> {
        Ok(self.profiles.lock().unwrap().get(&user).cloned())
    }

    async fn get_interests(&self, user: UserId) -> AppResult<Vec<String>> {
        Ok(self
            .interests
            .lock()
            .unwrap()
            .get(&user)
            .cloned()
            .unwrap_or_default())
    }

    async fn get_blocked_pairs(&self, user: UserId) -> AppResult<HashSet<UserId>> {
        Ok(self
            .blocks
            .lock()
            .unwrap()
            .iter()
            .filter_map(|(a, b)| {
                if *a == user {
                    Some(*b)
                } else if *b == user {
                    Some(*a)
                } else {
                    None
                }
            })
            .collect())
    }

    async fn get_finished_partners(&self, user: UserId) -> AppResult<HashSet<UserId>> {
        Ok(self
            .finished
            .lock()
            .unwrap()
            .iter()
            .filter(|(a, _)| *a == user)
            .map(|(_, b)| *b)
            .collect())
    }

    async fn record_finished_chat(&self, user: UserId, partner: UserId) -> AppResult<()> {
        self.finished.lock().unwrap().insert((user, partner));
        Ok(())
    }

    async fn record_block(&self, blocker: UserId, blocked: UserId) -> AppResult<()> {
        self.blocks.lock().unwrap().insert((blocker, blocked));
        Ok(())
    }
}

// --- FakeHistoryStore ---

#[derive(Default)]
pub(crate) struct FakeHistoryStore {
    messages: Mutex<Vec<ChatMessage>>,
}

impl FakeHistoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

fn pair_key(a: UserId, b: UserId) -> (UserId, UserId) {
    if a <= b {
        (a, b)
    } else {
        (b, a)
    }
}

#[async_trait]
impl HistoryStore for FakeHistoryStore {
    async fn append_message(&self, message: NewChatMessage) -> AppResult<ChatMessage> {
        let mut messages = self.messages.lock().unwrap();
        let key = pair_key(message.sender_id, message.receiver_id);
        let next_id = messages
            .iter()
            .filter(|m| pair_key(m.sender_id, m.receiver_id) == key)
            .map(|m| m.message_id)
            .max()
            .unwrap_or(0)
            + 1;
        let stored = ChatMessage {
            sender_id: message.sender_id,
            receiver_id: message.receiver_id,
            message_id: next_id,
            content: message.content,
            sent_at: Utc::now(),
        };
        messages.push(stored.clone());
        Ok(stored)
    }

    async fn history(&self, user: UserId, partner: UserId) -> AppResult<Vec<ChatMessage>> {
        let key = pair_key(user, partner);
        let mut log: Vec<ChatMessage> = self
            .messages
            .lock()
            .unwrap()
            .iter()
            .filter(|m| pair_key(m.sender_id, m.receiver_id) == key)
            .cloned()
            .collect();
        log.sort_by_key(|m| m.message_id);
        Ok(log)
    }
}

// --- FakeMessenger ---

pub(crate) struct FakeMessenger {
    sent: Mutex<Vec<(UserId, OutboundNotice)>>,
    fail: AtomicBool,
}

impl FakeMessenger {
    pub fn new() -> Self {
        Self { sent: Mutex::new(Vec::new()), fail: AtomicBool::new(false) }
    }

    pub fn fail_next_deliveries(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    pub fn notices_for(&self, user: UserId) -> Vec<OutboundNotice> {
        self.sent
            .lock()
            .unwrap()
            .iter()
            .filter(|(to, _)| *to == user)
            .map(|(_, notice)| notice.clone())
            .collect()
    }
}

#[async_trait]
impl Messenger for FakeMessenger {
    async fn deliver(&self, to: UserId, notice: OutboundNotice) -> AppResult<()> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(AppError::internal("transport unreachable"));
        }
        self.sent.lock().unwrap().push((to, notice));
        Ok(())
    }
}

// --- InMemoryPool ---

#[derive(Default)]
pub(crate) struct InMemoryPool {
    entries: Mutex<HashMap<UserId, WaitingEntry>>,
    locks: Mutex<HashSet<UserId>>,
}

impl InMemoryPool {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().unwrap().len()
    }

    pub fn hold_lock(&self, user: UserId) {
        self.locks.lock().unwrap().insert(user);
    }

    pub fn locked_users(&self) -> HashSet<UserId> {
        self.locks.lock().unwrap().clone()
    }
}

#[async_trait]
impl WaitingPool for InMemoryPool {
    async fn upsert(&self, entry: &WaitingEntry) -> AppResult<()> {
        self.entries.lock().unwrap().insert(entry.user_id, entry.clone());
        Ok(())
    }

    async fn remove(&self, user: UserId) -> AppResult<bool> {
        Ok(self.entries.lock().unwrap().remove(&user).is_some())
    }

    async fn remove_pair(&self, a: UserId, b: UserId) -> AppResult<bool> {
        let mut entries = self.entries.lock().unwrap();
        if entries.contains_key(&a) && entries.contains_key(&b) {
            entries.remove(&a);
            entries.remove(&b);
            Ok(true)
        } else {
            Ok(false)
        }
    }

    async fn candidates(&self, excluding: &HashSet<UserId>) -> AppResult<Vec<WaitingEntry>> {
        let mut list: Vec<WaitingEntry> = self
            .entries
            .lock()
            .unwrap()
            .values()
            .filter(|e| !excluding.contains(&e.user_id))
            .cloned()
            .collect();
        list.sort_by_key(|e| (e.enqueued_at, e.user_id));
        Ok(list)
    }

    async fn contains(&self, user: UserId) -> AppResult<bool> {
        Ok(self.entries.lock().unwrap().contains_key(&user))
    }

    async fn try_lock(&self, user: UserId, _ttl_secs: u64) -> AppResult<bool> {
        Ok(self.locks.lock().unwrap().insert(user))
    }

    async fn unlock(&self, user: UserId) -> AppResult<()> {
        self.locks.lock().unwrap().remove(&user);
        Ok(())
    }
}

// --- ContendedPool ---

/// One concurrent actor's move, applied right after the first candidate scan,
/// inside the window between scanning and removing.
pub(crate) enum ConcurrentAction {
    /// The user's entry disappears, as if they cancelled from another device.
    CancelEntry(UserId),
    /// Another search commits: both entries go and the pair goes active.
    CommitMatch(UserId, UserId),
    /// A session lands without touching the pool, the way a continue accept
    /// does.
    OpenSession(UserId, UserId),
}

/// Pool wrapper that fires one scheduled [`ConcurrentAction`] after the first
/// scan, pinning the interleavings a live deployment produces by timing.
pub(crate) struct ContendedPool {
    inner: Arc<InMemoryPool>,
    sessions: Arc<InMemorySessionStore>,
    action: Mutex<Option<ConcurrentAction>>,
}

impl ContendedPool {
    pub fn new(
        inner: Arc<InMemoryPool>,
        sessions: Arc<InMemorySessionStore>,
        action: ConcurrentAction,
    ) -> Self {
        Self { inner, sessions, action: Mutex::new(Some(action)) }
    }
}

#[async_trait]
impl WaitingPool for ContendedPool {
    async fn upsert(&self, entry: &WaitingEntry) -> AppResult<()> {
        self.inner.upsert(entry).await
    }

    async fn remove(&self, user: UserId) -> AppResult<bool> {
        self.inner.remove(user).await
    }

    async fn remove_pair(&self, a: UserId, b: UserId) -> AppResult<bool> {
        self.inner.remove_pair(a, b).await
    }

    async fn candidates(&self, excluding: &HashSet<UserId>) -> AppResult<Vec<WaitingEntry>> {
        let snapshot = self.inner.candidates(excluding).await?;
        let action = self.action.lock().unwrap().take();
        match action {
            Some(ConcurrentAction::CancelEntry(user)) => {
                self.inner.remove(user).await?;
            }
            Some(ConcurrentAction::CommitMatch(a, b)) => {
                self.inner.remove(a).await?;
                self.inner.remove(b).await?;
                self.sessions.create_session(a, b).await?;
            }
            Some(ConcurrentAction::OpenSession(a, b)) => {
                self.sessions.create_session(a, b).await?;
            }
            None => {}
        }
        Ok(snapshot)
    }

    async fn contains(&self, user: UserId) -> AppResult<bool> {
        self.inner.contains(user).await
    }

    async fn try_lock(&self, user: UserId, ttl_secs: u64) -> AppResult<bool> {
        self.inner.try_lock(user, ttl_secs).await
    }

    async fn unlock(&self, user: UserId) -> AppResult<()> {
        self.inner.unlock(user).await
    }
}

// --- InMemorySessionStore ---

#[derive(Debug, Clone)]
pub(crate) struct SessionRecord {
    pub id: Uuid,
    pub user_id: UserId,
    pub partner_id: UserId,
    pub status: String,
    pub end_reason: Option<String>,
    pub started_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub(crate) struct ProposalRecord {
    pub id: Uuid,
    pub requester_id: UserId,
    pub target_id: UserId,
    pub status: String,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub responded_at: Option<DateTime<Utc>>,
}

fn to_pending_proposal(record: &ProposalRecord) -> PendingProposal {
    PendingProposal {
        id: record.id,
        requester_id: record.requester_id,
        target_id: record.target_id,
        created_at: record.created_at,
        expires_at: record.expires_at,
    }
}

#[derive(Default)]
pub(crate) struct InMemorySessionStore {
    sessions: Mutex<Vec<SessionRecord>>,
    proposals: Mutex<Vec<ProposalRecord>>,
}

impl InMemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn session_rows(&self) -> Vec<SessionRecord> {
        self.sessions.lock().unwrap().clone()
    }

    pub fn proposal_rows(&self) -> Vec<ProposalRecord> {
        self.proposals.lock().unwrap().clone()
    }
}

#[async_trait]
impl SessionStore for InMemorySessionStore {
    async fn active_session(&self, user: UserId) -> AppResult<Option<ActiveSession>> {
        Ok(self
            .sessions
            .lock()
            .unwrap()
            .iter()
            .find(|s| s.user_id == user && s.status == "active")
            .map(|s| ActiveSession {
                session_id: s.id,
                user_id: s.user_id,
                partner_id: s.partner_id,
                started_at: s.started_at,
            }))
    }

    async fn create_session(&self, user: UserId, partner: UserId) -> AppResult<ActiveSession> {
        let mut sessions = self.sessions.lock().unwrap();
        let busy = sessions
            .iter()
            .any(|s| s.status == "active" && (s.user_id == user || s.user_id == partner));
        if busy {
            return Err(AppError::new(
                ErrorCode::AlreadyInChat,
                "a participant is already in an active chat",
            ));
        }

        let started_at = Utc::now();
        let forward = SessionRecord {
            id: Uuid::new_v4(),
            user_id: user,
            partner_id: partner,
            status: "active".into(),
            end_reason: None,
            started_at,
        };
        let reverse = SessionRecord {
            id: Uuid::new_v4(),
            user_id: partner,
            partner_id: user,
            status: "active".into(),
            end_reason: None,
            started_at,
        };
        let created = ActiveSession {
            session_id: forward.id,
            user_id: user,
            partner_id: partner,
            started_at,
        };
        sessions.push(forward);
        sessions.push(reverse);
        Ok(created)
    }

    async fn finish_session(&self, user: UserId, reason: EndReason) -> AppResult<Option<UserId>> {
        let mut sessions = self.sessions.lock().unwrap();
        let partner = sessions
            .iter()
            .find(|s| s.user_id == user && s.status == "active")
            .map(|s| s.partner_id);
        let Some(partner) = partner else {
            return Ok(None);
        };
        for s in sessions.iter_mut() {
            if s.status == "active"
                && ((s.user_id == user && s.partner_id == partner)
                    || (s.user_id == partner && s.partner_id == user))
            {
                s.status = "finished".into();
                s.end_reason = Some(reason.as_str().into());
            }
        }
        Ok(Some(partner))
    }

    async fn create_proposal(
        &self,
        requester: UserId,
        target: UserId,
        expires_at: DateTime<Utc>,
    ) -> AppResult<PendingProposal> {
        let record = ProposalRecord {
            id: Uuid::new_v4(),
            requester_id: requester,
            target_id: target,
            status: "pending".into(),
            created_at: Utc::now(),
            expires_at,
            responded_at: None,
        };
        let pending = to_pending_proposal(&record);
        self.proposals.lock().unwrap().push(record);
        Ok(pending)
    }

    async fn latest_pending_for_target(
        &self,
        target: UserId,
    ) -> AppResult<Option<PendingProposal>> {
        Ok(self
            .proposals
            .lock()
            .unwrap()
            .iter()
            .filter(|p| p.target_id == target && p.status == "pending")
            .max_by_key(|p| p.created_at)
            .map(to_pending_proposal))
    }

    async fn pending_from(
        &self,
        requester: UserId,
        target: UserId,
    ) -> AppResult<Option<PendingProposal>> {
        Ok(self
            .proposals
            .lock()
            .unwrap()
            .iter()
            .filter(|p| {
                p.requester_id == requester && p.target_id == target && p.status == "pending"
            })
            .max_by_key(|p| p.created_at)
            .map(to_pending_proposal))
    }

    async fn pending_sent_by(&self, requester: UserId) -> AppResult<Option<PendingProposal>> {
        Ok(self
            .proposals
            .lock()
            .unwrap()
            .iter()
            .filter(|p| p.requester_id == requester && p.status == "pending")
            .max_by_key(|p| p.created_at)
            .map(to_pending_proposal))
    }

    async fn resolve_proposal(&self, id: Uuid, resolution: ProposalResolution) -> AppResult<()> {
        let mut proposals = self.proposals.lock().unwrap();
        if let Some(record) = proposals.iter_mut().find(|p| p.id == id) {
            record.status = resolution.as_str().into();
            if !matches!(resolution, ProposalResolution::Expired) {
                record.responded_at = Some(Utc::now());
            }
        }
        Ok(())
    }
}

// --- Harness ---

pub(crate) struct TestHarness {
    pub engine: Arc<MatchingEngine>,
    pub profiles: Arc<FakeProfileStore>,
    pub history: Arc<FakeHistoryStore>,
    pub messenger: Arc<FakeMessenger>,
    pub pool: Arc<InMemoryPool>,
    pub sessions: Arc<InMemorySessionStore>,
}

impl TestHarness {
    /// Register a profile at the origin with the given attributes.
    pub fn user(
        &self,
        id: i64,
        gender: Gender,
        orientation: Orientation,
        interests: &[&str],
    ) -> UserId {
        self.user_at(id, gender, orientation, interests, 0.0, 0.0)
    }

    pub fn user_at(
        &self,
        id: i64,
        gender: Gender,
        orientation: Orientation,
        interests: &[&str],
        latitude: f64,
        longitude: f64,
    ) -> UserId {
        let user = UserId(id);
        self.profiles.put_profile(
            Profile {
                user_id: user,
                username: format!("user{id}"),
                gender,
                orientation,
                location: Location { latitude, longitude },
                search_radius_km: None,
                language: "en".into(),
                ban_until: None,
            },
            interests.iter().map(|s| s.to_string()).collect(),
        );
        user
    }

    /// Drop a registered user's entry straight into the pool, as if their
    /// search had been enqueued earlier by another call.
    pub async fn enqueue(&self, user: UserId) {
        let profile = self
            .profiles
            .get_profile(user)
            .await
            .unwrap()
            .expect("profile registered");
        let interests = self.profiles.get_interests(user).await.unwrap();
        let entry = WaitingEntry {
            user_id: user,
            username: profile.username,
            gender: profile.gender,
            orientation: profile.orientation,
            interests,
            location: profile.location,
            enqueued_at: Utc::now().timestamp_millis(),
        };
        self.pool.upsert(&entry).await.unwrap();
    }
}

pub(crate) fn harness() -> TestHarness {
    harness_with(EngineConfig::default())
}

pub(crate) fn harness_with(config: EngineConfig) -> TestHarness {
    let profiles = Arc::new(FakeProfileStore::new());
    let history = Arc::new(FakeHistoryStore::new());
    let messenger = Arc::new(FakeMessenger::new());
    let pool = Arc::new(InMemoryPool::new());
    let sessions = Arc::new(InMemorySessionStore::new());
    let engine = Arc::new(MatchingEngine::new(
        config,
        profiles.clone(),
        history.clone(),
        messenger.clone(),
        pool.clone(),
        sessions.clone(),
    ));
    TestHarness { engine, profiles, history, messenger, pool, sessions }
}

/// Harness whose engine sees a [`ContendedPool`]: `action` runs right after
/// the first candidate scan. The `pool` field stays the inner pool, so
/// assertions observe the same state the engine races against.
pub(crate) fn contended_harness(action: ConcurrentAction) -> TestHarness {
    let profiles = Arc::new(FakeProfileStore::new());
    let history = Arc::new(FakeHistoryStore::new());
    let messenger = Arc::new(FakeMessenger::new());
    let pool = Arc::new(InMemoryPool::new());
    let sessions = Arc::new(InMemorySessionStore::new());
    let contended = Arc::new(ContendedPool::new(pool.clone(), sessions.clone(), action));
    let engine = Arc::new(MatchingEngine::new(
        EngineConfig::default(),
        profiles.clone(),
        history.clone(),
        messenger.clone(),
        contended,
        sessions.clone(),
    ));
    TestHarness { engine, profiles, history, messenger, pool, sessions }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(id: i64, enqueued_at: i64) -> WaitingEntry {
        WaitingEntry {
            user_id: UserId(id),
            username: format!("user{id}"),
            gender: Gender::Male,
            orientation: Orientation::Bisexual,
            interests: vec!["music".into()],
            location: Location { latitude: 0.0, longitude: 0.0 },
            enqueued_at,
        }
    }

    #[tokio::test]
    async fn upsert_replaces_instead_of_duplicating() {
        let pool = InMemoryPool::new();
        pool.upsert(&entry(1, 10)).await.unwrap();
        pool.upsert(&entry(1, 20)).await.unwrap();

        assert_eq!(pool.len(), 1);
        let all = pool.candidates(&HashSet::new()).await.unwrap();
        assert_eq!(all[0].enqueued_at, 20);
    }

    #[tokio::test]
    async fn remove_pair_is_all_or_nothing() {
        let pool = InMemoryPool::new();
        pool.upsert(&entry(1, 10)).await.unwrap();

        assert!(!pool.remove_pair(UserId(1), UserId(2)).await.unwrap());
        assert!(pool.contains(UserId(1)).await.unwrap());

        pool.upsert(&entry(2, 20)).await.unwrap();
        assert!(pool.remove_pair(UserId(1), UserId(2)).await.unwrap());
        assert_eq!(pool.len(), 0);
    }

    #[tokio::test]
    async fn candidates_come_back_in_enqueue_order() {
        let pool = InMemoryPool::new();
        pool.upsert(&entry(3, 30)).await.unwrap();
        pool.upsert(&entry(1, 10)).await.unwrap();
        pool.upsert(&entry(2, 20)).await.unwrap();

        let ids: Vec<UserId> = pool
            .candidates(&HashSet::new())
            .await
            .unwrap()
            .into_iter()
            .map(|e| e.user_id)
            .collect();
        assert_eq!(ids, vec![UserId(1), UserId(2), UserId(3)]);
    }
}
