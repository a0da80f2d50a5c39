//! Pure partner selection. No I/O here: the caller snapshots the pool,
//! builds the exclusion set, and commits the winner afterwards.

use std::collections::HashSet;

use crate::domain::{Gender, Orientation, UserId, WaitingEntry};
use crate::geo;

#[derive(Debug)]
pub struct MatchQuery<'a> {
    pub requester: &'a WaitingEntry,
    pub radius_km: f64,
    pub exclusions: &'a HashSet<UserId>,
}

#[derive(Debug, Clone)]
pub struct MatchCandidate {
    pub entry: WaitingEntry,
    pub distance_km: f64,
    /// Interest-overlap level at which the candidate was accepted.
    pub relaxation_k: usize,
}

/// Gender class the requester is looking for; `None` means an open search.
///
/// Heterosexual maps to the opposite binary gender; an Other-gendered
/// heterosexual has no opposite and searches open. Homosexual and Lesbian
/// target the requester's own class. Everything else is open.
pub fn target_gender(orientation: Orientation, gender: &Gender) -> Option<Gender> {
    match orientation {
        Orientation::Heterosexual => match gender {
            Gender::Male => Some(Gender::Female),
            Gender::Female => Some(Gender::Male),
            Gender::Other { .. } => None,
        },
        Orientation::Homosexual | Orientation::Lesbian => Some(gender.clone()),
        Orientation::Bisexual | Orientation::Pansexual | Orientation::Asexual => None,
    }
}

/// How many of the requester's interests the candidate covers. A requester
/// tag counts when it appears, case-insensitively, inside any candidate tag.
/// Blank tags never match.
fn interest_overlap(requester: &[String], candidate: &[String]) -> usize {
    let candidate_tags: Vec<String> = candidate
        .iter()
        .map(|tag| tag.trim().to_lowercase())
        .filter(|tag| !tag.is_empty())
        .collect();

    requester
        .iter()
        .map(|tag| tag.trim().to_lowercase())
        .filter(|tag| !tag.is_empty())
        .filter(|tag| candidate_tags.iter().any(|c| c.contains(tag.as_str())))
        .count()
}

/// Cascading-relaxation search.
///
/// Hard constraints (gender target, exclusions, radius) never loosen. The
/// interest requirement starts at "covers every requester interest" and
/// relaxes one level per round down to zero, so a search fails only when no
/// compatible candidate is in range at all. Within a round, candidates are
/// scanned in pool order and the first one inside the radius wins.
pub fn find_match(query: &MatchQuery<'_>, pool: &[WaitingEntry]) -> Option<MatchCandidate> {
    let requester = query.requester;
    let target = target_gender(requester.orientation, &requester.gender);

    let eligible: Vec<(&WaitingEntry, usize)> = pool
        .iter()
        .filter(|entry| entry.user_id != requester.user_id)
        .filter(|entry| !query.exclusions.contains(&entry.user_id))
        .filter(|entry| match &target {
            Some(wanted) => entry.gender.same_class(wanted),
            None => true,
        })
        .map(|entry| (entry, interest_overlap(&requester.interests, &entry.interests)))
        .collect();

    for k in (0..=requester.interests.len()).rev() {
        for (entry, overlap) in &eligible {
            if *overlap < k {
                continue;
            }
            let distance_km = geo::haversine_km(&requester.location, &entry.location);
            if distance_km <= query.radius_km {
                return Some(MatchCandidate {
                    entry: (*entry).clone(),
                    distance_km,
                    relaxation_k: k,
                });
            }
        }
    }

    None
}
