//! # Semantic Pipeline
//!
//! Candidate → Enricher → Ranker (spec.md §4.8): raw candidates are
//! enriched with derived signals (categorical polarity with a lifecycle
//! bias, supersession-chain resolution through an injected async
//! entity-lookup, temporal context, and relevance factors) and then
//! combined into a single weighted relevance score for final ordering.
//! Grounded on the same filter→sort pipeline shape as [`crate::predicate`]
//! and [`crate::executor::memory::MemoryExecutor`] — a small, explicit,
//! sequential transform rather than a trait-heavy plugin system — with
//! the lookup collaborator mirroring the `async_trait` seam
//! [`crate::executor::sql::SqlConnection`] uses for its own backend.

pub mod blocks;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use regex::Regex;
use std::collections::HashSet;

/// A raw item entering the pipeline before enrichment. `base_score` is
/// whatever literal-match relevance the upstream query already computed
/// (e.g. a full-text rank); the pipeline folds it into the `literal`
/// ranking signal alongside query/content word overlap.
#[derive(Debug, Clone)]
pub struct Candidate {
    pub id: String,
    pub content: String,
    pub base_score: f64,
    pub created_at: Option<DateTime<Utc>>,
    pub updated_at: Option<DateTime<Utc>>,
    pub lifecycle_status: LifecycleStatus,
    /// Caller-supplied authority prior (e.g. source reputation), `[0,1]`.
    /// Defaults to a neutral 0.5 when unknown.
    pub authority_hint: Option<f64>,
    /// Precomputed cosine similarity against a query embedding, if the
    /// caller has one. Absent entirely (rather than defaulted to 0) so
    /// the ranker can skip the embedding term instead of penalizing
    /// candidates nobody embedded.
    pub embedding_similarity: Option<f64>,
}

impl Candidate {
    pub fn new(id: impl Into<String>, content: impl Into<String>, base_score: f64) -> Self {
        Self {
            id: id.into(),
            content: content.into(),
            base_score,
            created_at: None,
            updated_at: None,
            lifecycle_status: LifecycleStatus::Current,
            authority_hint: None,
            embedding_similarity: None,
        }
    }
}

/// Lifecycle bucket of a candidate (spec.md §4.8). `Deprecated`,
/// `Historical`, and `Archived` tilt [`compute_polarity`] negative;
/// `Current` and `Stable` leave it untouched (neutral/positive).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleStatus {
    Current,
    Stable,
    Deprecated,
    Historical,
    Archived,
}

/// Categorical sentiment (spec.md §4.8): a small lexicon plus the
/// candidate's [`LifecycleStatus`] bias, not a raw float.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Polarity {
    Positive,
    Negative,
    Neutral,
}

/// The query driving one pipeline run. `intent` feeds the ranker's
/// intent-alignment heuristic; `text` feeds both literal-overlap scoring
/// and [`infer_relevant_period`].
#[derive(Debug, Clone)]
pub struct ParsedQuery {
    pub text: String,
    pub intent: Intent,
}

impl ParsedQuery {
    pub fn new(text: impl Into<String>, intent: Intent) -> Self {
        Self { text: text.into(), intent }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Intent {
    What,
    How,
    Why,
    Other,
}

/// A date/time phrase lifted from the query's own wording (spec.md
/// §4.8: "`relevantPeriod` inferred from query prepositions"), not from
/// the candidate. The same period is attached to every candidate
/// enriched in one pipeline run, since it describes what the caller
/// asked for, not the content being ranked.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelevantPeriod {
    pub preposition: String,
    pub phrase: String,
}

#[derive(Debug, Clone)]
pub struct TemporalContext {
    pub created_at: Option<DateTime<Utc>>,
    pub updated_at: Option<DateTime<Utc>>,
    pub relevant_period: Option<RelevantPeriod>,
}

#[derive(Debug, Clone, Copy)]
pub struct RelevanceFactors {
    pub recency: f64,
    pub authority: f64,
    pub completeness: f64,
}

#[derive(Debug, Clone, Copy)]
pub struct RankingWeights {
    pub literal: f64,
    pub intent: f64,
    pub polarity: f64,
    pub authority: f64,
    pub recency: f64,
    pub embedding: f64,
}

impl Default for RankingWeights {
    fn default() -> Self {
        Self { literal: 0.35, intent: 0.15, polarity: 0.10, authority: 0.15, recency: 0.20, embedding: 0.05 }
    }
}

#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Hard cap on supersession-chain walks, independent of
    /// [`crate::ABSOLUTE_MAX_DEPTH`] since this walks an injected
    /// lookup, not SQL — but the same "bound every traversal" discipline.
    pub max_supersession_depth: u32,
    /// Exponential recency decay half-life.
    pub recency_half_life_days: f64,
    pub weights: RankingWeights,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self { max_supersession_depth: 20, recency_half_life_days: 30.0, weights: RankingWeights::default() }
    }
}

/// Resolves what (if anything) currently supersedes a given candidate
/// id. Injected rather than derived from the in-memory batch (spec.md
/// §4.8: "built... via an injected async entity-lookup") because
/// supersession is an external fact — the newer entity replacing this
/// one may not even be part of the current result set.
#[async_trait]
pub trait EntityLookup: Send + Sync {
    async fn superseded_by(&self, id: &str) -> Option<String>;
}

/// A lookup with nothing superseding anyone; useful when callers have
/// no supersession source wired up yet.
pub struct NoSupersession;

#[async_trait]
impl EntityLookup for NoSupersession {
    async fn superseded_by(&self, _id: &str) -> Option<String> {
        None
    }
}

/// A candidate after derived signals have been computed.
#[derive(Debug, Clone)]
pub struct EnrichedCandidate {
    pub candidate: Candidate,
    pub polarity: Polarity,
    /// The id of whatever most-recent entity ultimately supersedes this
    /// one, if the chain terminates within `max_supersession_depth`.
    pub superseded_by: Option<String>,
    pub supersession_depth: u32,
    pub temporal_context: TemporalContext,
    pub relevance_factors: RelevanceFactors,
}

impl EnrichedCandidate {
    pub fn is_current(&self) -> bool {
        self.superseded_by.is_none()
    }
}

#[derive(Debug, Clone, Copy)]
pub struct ScoreBreakdown {
    pub literal: f64,
    pub intent: f64,
    pub polarity: f64,
    pub authority: f64,
    pub recency: f64,
    pub embedding: f64,
}

#[derive(Debug, Clone)]
pub struct RankedCandidate {
    pub enriched: EnrichedCandidate,
    pub relevance_score: f64,
    pub score_breakdown: ScoreBreakdown,
}

/// Crude lexical polarity: counts positive/negative keyword hits, then
/// applies the lifecycle bias (spec.md §4.8) before collapsing to a
/// 3-valued categorical result. Deliberately simple — a stand-in for a
/// real sentiment model that would live behind the same signature.
fn compute_polarity(content: &str, lifecycle: LifecycleStatus) -> Polarity {
    const POSITIVE: &[&str] = &["good", "great", "improved", "fixed", "success", "correct"];
    const NEGATIVE: &[&str] = &["bad", "broken", "fails", "error", "regression", "incorrect"];

    let lower = content.to_lowercase();
    let mut pos = POSITIVE.iter().filter(|w| lower.contains(*w)).count() as i64;
    let neg = NEGATIVE.iter().filter(|w| lower.contains(*w)).count() as i64;
    let mut neg = neg;
    match lifecycle {
        LifecycleStatus::Deprecated | LifecycleStatus::Historical | LifecycleStatus::Archived => neg += 1,
        LifecycleStatus::Current | LifecycleStatus::Stable => pos += 0,
    }

    match pos.cmp(&neg) {
        std::cmp::Ordering::Greater => Polarity::Positive,
        std::cmp::Ordering::Less => Polarity::Negative,
        std::cmp::Ordering::Equal => Polarity::Neutral,
    }
}

fn polarity_score(polarity: Polarity) -> f64 {
    match polarity {
        Polarity::Positive => 1.0,
        Polarity::Neutral => 0.5,
        Polarity::Negative => 0.0,
    }
}

/// Exponential decay toward 0 as `age` grows past `half_life_days`;
/// candidates with no timestamp get a neutral 0.5.
fn recency_factor(timestamp: Option<DateTime<Utc>>, now: DateTime<Utc>, half_life_days: f64) -> f64 {
    let Some(ts) = timestamp else { return 0.5 };
    let age_days = (now - ts).num_seconds() as f64 / 86_400.0;
    if age_days <= 0.0 {
        return 1.0;
    }
    0.5f64.powf(age_days / half_life_days.max(f64::EPSILON))
}

/// Content-length heuristic for `relevanceFactors.completeness`: a
/// candidate shorter than a couple of sentences is assumed partial.
fn compute_completeness(content: &str) -> f64 {
    (content.trim().len() as f64 / 280.0).min(1.0)
}

fn relevant_period_re() -> Regex {
    Regex::new(r"(?i)\b(since|before|after|during|between)\b\s+(.+?)(?:[.?!]|$)").expect("static regex")
}

/// Heuristic extraction of a date/time phrase from the query's own
/// wording (spec.md §4.8), e.g. "bugs reported since last Tuesday" →
/// `{preposition: "since", phrase: "last Tuesday"}`.
fn infer_relevant_period(query_text: &str) -> Option<RelevantPeriod> {
    let caps = relevant_period_re().captures(query_text)?;
    Some(RelevantPeriod { preposition: caps[1].to_lowercase(), phrase: caps[2].trim().to_string() })
}

/// Word-overlap ratio between the query and a candidate's content,
/// `[0,1]`. The literal-match half of the `literal` ranking signal.
fn literal_overlap(query_text: &str, content: &str) -> f64 {
    let query_words: HashSet<String> = query_text.to_lowercase().split_whitespace().map(str::to_string).collect();
    if query_words.is_empty() {
        return 0.0;
    }
    let content_lower = content.to_lowercase();
    let hits = query_words.iter().filter(|w| content_lower.contains(w.as_str())).count();
    hits as f64 / query_words.len() as f64
}

/// Lightweight content-signature match against the query's intent
/// (spec.md §4.8): definitional language for `what`, instructional for
/// `how`, causal/rationale for `why`.
fn content_signature_score(content: &str, intent: Intent) -> f64 {
    const WHAT: &[&str] = &["is a", "is the", "means", "refers to", "defined as"];
    const HOW: &[&str] = &["step", "run ", "use ", "configure", "install"];
    const WHY: &[&str] = &["because", "reason", "due to", "caused by"];

    let lower = content.to_lowercase();
    let hits = match intent {
        Intent::What => WHAT.iter().filter(|w| lower.contains(*w)).count(),
        Intent::How => HOW.iter().filter(|w| lower.contains(*w)).count(),
        Intent::Why => WHY.iter().filter(|w| lower.contains(*w)).count(),
        Intent::Other => 0,
    };
    (hits as f64 / 2.0).min(1.0)
}

/// Resolve the supersession chain starting at `id`, walking forward
/// through `lookup` (spec.md §4.8). Cycle-safe via a visited set;
/// bounded by `max_depth` regardless of whether a cycle exists.
async fn resolve_supersession(id: &str, lookup: &dyn EntityLookup, max_depth: u32) -> (Option<String>, u32) {
    let mut current = id.to_string();
    let mut visited: HashSet<String> = [current.clone()].into_iter().collect();
    let mut terminal = None;
    let mut depth = 0u32;

    while depth < max_depth {
        let Some(next) = lookup.superseded_by(&current).await else { break };
        if visited.contains(&next) {
            break; // cycle detected; stop walking rather than loop forever
        }
        visited.insert(next.clone());
        terminal = Some(next.clone());
        current = next;
        depth += 1;
    }

    (terminal, depth)
}

/// Enrich every candidate with polarity, supersession, temporal context,
/// and relevance-factor signals. `now` is taken as a parameter (never
/// computed internally) so enrichment stays deterministic and testable.
/// Empty input returns `[]` without error.
pub async fn enrich(candidates: Vec<Candidate>, config: &PipelineConfig, now: DateTime<Utc>, query: &ParsedQuery, lookup: &dyn EntityLookup) -> Vec<EnrichedCandidate> {
    let relevant_period = infer_relevant_period(&query.text);

    let mut enriched = Vec::with_capacity(candidates.len());
    for candidate in candidates {
        let (superseded_by, supersession_depth) = resolve_supersession(&candidate.id, lookup, config.max_supersession_depth).await;
        let recency = recency_factor(candidate.updated_at.or(candidate.created_at), now, config.recency_half_life_days);
        let authority = candidate.authority_hint.unwrap_or(0.5).clamp(0.0, 1.0);
        let completeness = compute_completeness(&candidate.content).clamp(0.0, 1.0);
        let polarity = compute_polarity(&candidate.content, candidate.lifecycle_status);
        let temporal_context =
            TemporalContext { created_at: candidate.created_at, updated_at: candidate.updated_at, relevant_period: relevant_period.clone() };
        let relevance_factors = RelevanceFactors { recency, authority, completeness };
        enriched.push(EnrichedCandidate { candidate, polarity, superseded_by, supersession_depth, temporal_context, relevance_factors });
    }
    enriched
}

/// Combine enriched signals into a single relevance score and sort
/// descending. Superseded candidates are demoted rather than dropped —
/// callers that want strict "latest only" semantics can filter on
/// [`EnrichedCandidate::is_current`] afterward. Empty input returns `[]`.
pub fn rank(enriched: Vec<EnrichedCandidate>, config: &PipelineConfig, query: &ParsedQuery) -> Vec<RankedCandidate> {
    let w = &config.weights;
    let mut ranked: Vec<RankedCandidate> = enriched
        .into_iter()
        .map(|e| {
            let literal = ((literal_overlap(&query.text, &e.candidate.content) + e.candidate.base_score.clamp(0.0, 1.0)) / 2.0).clamp(0.0, 1.0);
            let intent = content_signature_score(&e.candidate.content, query.intent);
            let polarity = polarity_score(e.polarity);
            let authority = e.relevance_factors.authority;
            let recency = e.relevance_factors.recency;
            let (embedding, embedding_weight) = match e.candidate.embedding_similarity {
                Some(sim) => (sim.clamp(0.0, 1.0), w.embedding),
                None => (0.0, 0.0),
            };

            let breakdown = ScoreBreakdown {
                literal: w.literal * literal,
                intent: w.intent * intent,
                polarity: w.polarity * polarity,
                authority: w.authority * authority,
                recency: w.recency * recency,
                embedding: embedding_weight * embedding,
            };
            let mut relevance_score =
                breakdown.literal + breakdown.intent + breakdown.polarity + breakdown.authority + breakdown.recency + breakdown.embedding;
            if !e.is_current() {
                relevance_score *= 0.1;
            }
            relevance_score = relevance_score.clamp(0.0, 1.0);

            RankedCandidate { enriched: e, relevance_score, score_breakdown: breakdown }
        })
        .collect();

    ranked.sort_by(|a, b| b.relevance_score.partial_cmp(&a.relevance_score).unwrap_or(std::cmp::Ordering::Equal));
    ranked
}

/// Runs [`enrich`] then [`rank`] in one call — the pipeline's front door.
pub async fn run(candidates: Vec<Candidate>, config: &PipelineConfig, now: DateTime<Utc>, query: &ParsedQuery, lookup: &dyn EntityLookup) -> Vec<RankedCandidate> {
    let enriched = enrich(candidates, config, now, query, lookup).await;
    rank(enriched, config, query)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use std::collections::HashMap;
    use tokio::sync::Mutex as AsyncMutex;

    fn now() -> DateTime<Utc> {
        DateTime::parse_from_rfc3339("2026-07-26T00:00:00Z").unwrap().with_timezone(&Utc)
    }

    fn query(text: &str, intent: Intent) -> ParsedQuery {
        ParsedQuery::new(text, intent)
    }

    /// A lookup backed by a fixed map, standing in for the real
    /// entity-lookup a caller would inject (e.g. backed by
    /// [`crate::graph::GraphStore`]).
    struct MapEntityLookup(AsyncMutex<HashMap<String, String>>);

    impl MapEntityLookup {
        fn new(pairs: impl IntoIterator<Item = (&'static str, &'static str)>) -> Self {
            Self(AsyncMutex::new(pairs.into_iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()))
        }
    }

    #[async_trait]
    impl EntityLookup for MapEntityLookup {
        async fn superseded_by(&self, id: &str) -> Option<String> {
            self.0.lock().await.get(id).cloned()
        }
    }

    #[tokio::test]
    async fn supersession_demotes_the_older_candidate() {
        let old = Candidate::new("v1", "the initial approach", 0.9);
        let new = Candidate::new("v2", "an improved approach", 0.9);
        let lookup = MapEntityLookup::new([("v1", "v2")]);
        let ranked = run(vec![old, new], &PipelineConfig::default(), now(), &query("approach", Intent::What), &lookup).await;
        assert_eq!(ranked[0].enriched.candidate.id, "v2");
        assert!(ranked[0].relevance_score > ranked[1].relevance_score);
        assert!(!ranked[1].enriched.is_current());
    }

    #[tokio::test]
    async fn supersession_chain_is_cycle_safe() {
        let a = Candidate::new("a", "alpha", 0.5);
        let b = Candidate::new("b", "beta", 0.5);
        let lookup = MapEntityLookup::new([("a", "b"), ("b", "a")]);
        let enriched =
            enrich(vec![a, b], &PipelineConfig { max_supersession_depth: 5, ..Default::default() }, now(), &query("", Intent::Other), &lookup)
                .await;
        // Must terminate (the test itself not hanging is the primary assertion);
        // depth is bounded even though the chain cycles.
        for e in &enriched {
            assert!(e.supersession_depth <= 5);
        }
    }

    #[tokio::test]
    async fn recency_factor_decays_with_age() {
        let fresh = recency_factor(Some(now()), now(), 30.0);
        let stale = recency_factor(Some(now() - Duration::days(60)), now(), 30.0);
        assert!(fresh > stale);
    }

    #[test]
    fn polarity_reflects_keyword_balance_and_lifecycle_bias() {
        assert_eq!(compute_polarity("this fix is great and correct", LifecycleStatus::Current), Polarity::Positive);
        assert_eq!(compute_polarity("this is broken and fails constantly", LifecycleStatus::Current), Polarity::Negative);
        assert_eq!(compute_polarity("plain neutral text", LifecycleStatus::Current), Polarity::Neutral);
        assert_eq!(
            compute_polarity("plain neutral text", LifecycleStatus::Archived),
            Polarity::Negative,
            "an archived candidate's neutral content tilts negative"
        );
    }

    #[tokio::test]
    async fn rank_sorts_descending_by_relevance_score() {
        let low = Candidate::new("low", "nothing special", 0.1);
        let high = Candidate::new("high", "a great success", 0.9);
        let ranked = run(vec![low, high], &PipelineConfig::default(), now(), &query("success", Intent::What), &NoSupersession).await;
        assert_eq!(ranked[0].enriched.candidate.id, "high");
    }

    #[test]
    fn relevant_period_is_inferred_from_query_prepositions() {
        let period = infer_relevant_period("what changed since last Tuesday").unwrap();
        assert_eq!(period.preposition, "since");
        assert_eq!(period.phrase, "last Tuesday");
        assert!(infer_relevant_period("what is a widget").is_none());
    }

    #[tokio::test]
    async fn empty_input_returns_empty_output() {
        let ranked: Vec<RankedCandidate> =
            run(Vec::new(), &PipelineConfig::default(), now(), &query("anything", Intent::Other), &NoSupersession).await;
        assert!(ranked.is_empty());
    }

    #[tokio::test]
    async fn embedding_signal_only_contributes_when_present() {
        let mut with_embedding = Candidate::new("a", "plain text", 0.2);
        with_embedding.embedding_similarity = Some(1.0);
        let without_embedding = Candidate::new("b", "plain text", 0.2);
        let ranked =
            run(vec![with_embedding, without_embedding], &PipelineConfig::default(), now(), &query("plain", Intent::Other), &NoSupersession)
                .await;
        let with_e = ranked.iter().find(|r| r.enriched.candidate.id == "a").unwrap();
        let without_e = ranked.iter().find(|r| r.enriched.candidate.id == "b").unwrap();
        assert!(with_e.score_breakdown.embedding > 0.0);
        assert_eq!(without_e.score_breakdown.embedding, 0.0);
    }
}
