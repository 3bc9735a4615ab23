//! Debate pattern (spec.md §4.5): `D` debaters with distinct perspectives
//! argue over several rounds; a resolution strategy picks the winner.

use async_trait::async_trait;
use shannon_domain::error::Result;
use shannon_domain::event::EventType;
use shannon_domain::strategy::PatternType;
use shannon_domain::tool::Message;
use shannon_providers::traits::ChatRequest;

use super::{emit, Pattern, PatternContext, PatternOptions, PatternResult};

const DEFAULT_DEBATERS: usize = 3;
const MAX_DEBATERS: usize = 5;
const DEFAULT_MAX_ROUNDS: usize = 3;
const DEFAULT_PERSPECTIVES: &[&str] = &["optimistic", "skeptical", "practical", "innovative", "conservative"];
const CONSENSUS_MARKERS: &[&str] = &["i agree", "we agree", "consensus reached", "no further objections"];

const EVIDENCE_TERMS: &[&str] = &["evidence", "data", "studies show", "for example"];
const STRUCTURE_TERMS: &[&str] = &["first", "second", "therefore", "however"];
const COUNTER_ARGUMENT_TERMS: &[&str] = &["on the other hand", "however", "counterpoint", "that said"];

struct Debater {
    perspective: &'static str,
    position: String,
}

pub struct DebatePattern;

#[async_trait]
impl Pattern for DebatePattern {
    fn pattern_type(&self) -> PatternType {
        PatternType::Debate
    }

    async fn execute(
        &self,
        ctx: &PatternContext,
        query: &str,
        prior_context: &str,
        options: &PatternOptions,
    ) -> Result<PatternResult> {
        let debater_count = DEFAULT_DEBATERS.min(MAX_DEBATERS);
        let mut debaters: Vec<Debater> =
            DEFAULT_PERSPECTIVES.iter().take(debater_count).map(|p| Debater { perspective: p, position: String::new() }).collect();
        let mut tokens_used: u64 = 0;

        // Round 1: initial positions, concurrently.
        let mut futures = Vec::with_capacity(debaters.len());
        for d in &debaters {
            futures.push(opening_position(ctx, options, query, prior_context, d.perspective));
        }
        for (d, outcome) in debaters.iter_mut().zip(futures_util::future::join_all(futures).await) {
            let (position, tokens) = outcome?;
            d.position = position;
            tokens_used += tokens;
        }
        emit(ctx, options, EventType::AgentThinking, Some("debate round 1 complete".into()));

        let mut consensus_round = None;
        for round in 2..=DEFAULT_MAX_ROUNDS {
            if ctx.control.is_cancel_requested(ctx.workflow_id) {
                return Err(shannon_domain::error::Error::Cancelled);
            }

            let snapshot: Vec<String> = debaters.iter().map(|d| format!("[{}]: {}", d.perspective, d.position)).collect();
            let mut futures = Vec::with_capacity(debaters.len());
            for d in &debaters {
                futures.push(respond(ctx, options, query, d.perspective, &snapshot));
            }
            let responses = futures_util::future::join_all(futures).await;
            for (d, outcome) in debaters.iter_mut().zip(responses) {
                let (position, tokens) = outcome?;
                d.position = position;
                tokens_used += tokens;
            }

            if debaters.iter().any(|d| {
                let lower = d.position.to_lowercase();
                CONSENSUS_MARKERS.iter().any(|m| lower.contains(m))
            }) {
                consensus_round = Some(round);
                break;
            }
        }

        let scored: Vec<(f64, &Debater)> = debaters.iter().map(|d| (score_position(&d.position), d)).collect();
        let (winning_score, winner) = scored
            .iter()
            .max_by(|(a, _), (b, _)| a.partial_cmp(b).unwrap())
            .map(|(s, d)| (*s, *d))
            .expect("at least one debater");

        Ok(PatternResult {
            result: winner.position.clone(),
            tokens_used,
            confidence: winning_score,
            metadata: serde_json::json!({
                "winning_perspective": winner.perspective,
                "consensus_round": consensus_round,
                "debaters": debaters.len(),
            }),
        })
    }
}

async fn opening_position(
    ctx: &PatternContext,
    options: &PatternOptions,
    query: &str,
    prior_context: &str,
    perspective: &str,
) -> Result<(String, u64)> {
    let prompt = format!(
        "Prior context: {prior_context}\n\nFrom a {perspective} perspective, take an initial position on: {query}"
    );
    chat(ctx, options, perspective, prompt).await
}

async fn respond(
    ctx: &PatternContext,
    options: &PatternOptions,
    query: &str,
    perspective: &str,
    others: &[String],
) -> Result<(String, u64)> {
    let prompt = format!(
        "Question: {query}\n\nOther debaters' latest positions:\n{}\n\nAs the {perspective} debater, respond, \
         acknowledging strong counter-arguments where they exist, and state whether you now agree with the others.",
        others.join("\n")
    );
    chat(ctx, options, perspective, prompt).await
}

async fn chat(ctx: &PatternContext, options: &PatternOptions, perspective: &str, prompt: String) -> Result<(String, u64)> {
    let req = ChatRequest {
        messages: vec![Message::system(format!("You are the {perspective} debater.")), Message::user(prompt)],
        temperature: Some(0.6),
        max_tokens: Some((options.token_budget / DEFAULT_MAX_ROUNDS as u64 / DEFAULT_DEBATERS as u64).max(96) as u32),
        ..Default::default()
    };
    let resp = ctx.router.chat_for_role(options.model_role, req).await?;
    let tokens = resp.usage.as_ref().map(|u| u.total_tokens as u64).unwrap_or(0);
    Ok((resp.content, tokens))
}

fn score_position(text: &str) -> f64 {
    let lower = text.to_lowercase();
    let mut score = 0.3;
    score += EVIDENCE_TERMS.iter().filter(|t| lower.contains(*t)).count() as f64 * 0.12;
    score += STRUCTURE_TERMS.iter().filter(|t| lower.contains(*t)).count() as f64 * 0.08;
    score += COUNTER_ARGUMENT_TERMS.iter().filter(|t| lower.contains(*t)).count() as f64 * 0.1;
    score.clamp(0.0, 1.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn evidence_backed_positions_score_higher() {
        let with_evidence = "Studies show this works, for example in three trials.";
        let bare = "I think this is fine.";
        assert!(score_position(with_evidence) > score_position(bare));
    }
}
