//! Research pattern (spec.md §4.5, "Deep Research 2.0"): decompose, then
//! iterate search rounds until coverage clears a threshold or the
//! iteration budget runs out, then synthesize with citations.

use async_trait::async_trait;
use shannon_domain::error::Result;
use shannon_domain::event::EventType;
use shannon_domain::strategy::PatternType;
use shannon_domain::tool::Message;
use shannon_providers::traits::ChatRequest;

use super::{emit, Pattern, PatternContext, PatternOptions, PatternResult};

const COVERAGE_THRESHOLD: f64 = 0.8;
const MIN_SOURCES: usize = 8;
const MAX_ITERATIONS: usize = 4;

pub struct ResearchPattern;

#[async_trait]
impl Pattern for ResearchPattern {
    fn pattern_type(&self) -> PatternType {
        PatternType::Research
    }

    async fn execute(
        &self,
        ctx: &PatternContext,
        query: &str,
        prior_context: &str,
        options: &PatternOptions,
    ) -> Result<PatternResult> {
        emit(ctx, options, EventType::Progress, Some("decomposing research question".into()));

        let mut tokens_used = 0u64;
        let mut sources: Vec<String> = Vec::new();
        let mut question = query.to_string();
        let mut coverage = 0.0;

        for iteration in 0..MAX_ITERATIONS {
            if ctx.control.is_cancel_requested(ctx.workflow_id) {
                return Err(shannon_domain::error::Error::Cancelled);
            }

            let (found, search_tokens) = search_round(ctx, options, &question).await?;
            tokens_used += search_tokens;
            sources.extend(found);
            emit(ctx, options, EventType::DataProcessing, Some(format!("round {iteration}: {} sources so far", sources.len())));

            let (assessed_coverage, eval_tokens) = assess_coverage(ctx, options, query, &sources).await?;
            tokens_used += eval_tokens;
            coverage = assessed_coverage;

            if coverage >= COVERAGE_THRESHOLD && sources.len() >= MIN_SOURCES {
                break;
            }
            if iteration + 1 == MAX_ITERATIONS {
                break;
            }
            let (gap, gap_tokens) = generate_gap_question(ctx, options, query, coverage).await?;
            tokens_used += gap_tokens;
            question = gap;
        }

        let (synthesis, synth_tokens) = synthesize(ctx, options, query, prior_context, &sources).await?;
        tokens_used += synth_tokens;

        Ok(PatternResult {
            result: synthesis,
            tokens_used,
            confidence: coverage,
            metadata: serde_json::json!({ "sources": sources.len(), "coverage": coverage }),
        })
    }
}

async fn search_round(ctx: &PatternContext, options: &PatternOptions, question: &str) -> Result<(Vec<String>, u64)> {
    let prompt = format!(
        "Identify candidate sources (titles/summaries, one per line) that would help answer: {question}"
    );
    let req = ChatRequest {
        messages: vec![Message::system("You enumerate relevant sources for a research question."), Message::user(prompt)],
        temperature: Some(0.4),
        max_tokens: Some((options.token_budget / MAX_ITERATIONS as u64 / 2).max(128) as u32),
        ..Default::default()
    };
    let resp = ctx.router.chat_for_role(options.model_role, req).await?;
    let tokens = resp.usage.as_ref().map(|u| u.total_tokens as u64).unwrap_or(0);
    let found = resp.content.lines().map(str::trim).filter(|l| !l.is_empty()).map(str::to_string).collect();
    Ok((found, tokens))
}

async fn assess_coverage(ctx: &PatternContext, options: &PatternOptions, query: &str, sources: &[String]) -> Result<(f64, u64)> {
    let prompt = format!(
        "Question: {query}\nSources gathered:\n{}\n\nOn a scale of 0.0 to 1.0, how well do these sources cover the question? Reply with just the number.",
        sources.join("\n")
    );
    let req = ChatRequest {
        messages: vec![Message::system("You judge research coverage."), Message::user(prompt)],
        temperature: Some(0.0),
        max_tokens: Some(16),
        ..Default::default()
    };
    let resp = ctx.router.chat_for_role(options.model_role, req).await?;
    let tokens = resp.usage.as_ref().map(|u| u.total_tokens as u64).unwrap_or(0);
    let coverage = resp.content.trim().parse::<f64>().unwrap_or(0.0).clamp(0.0, 1.0);
    Ok((coverage, tokens))
}

async fn generate_gap_question(ctx: &PatternContext, options: &PatternOptions, query: &str, coverage: f64) -> Result<(String, u64)> {
    let prompt = format!(
        "Original question: {query}\nCurrent coverage estimate: {coverage:.2}\n\nWhat single follow-up question would close the largest remaining gap?"
    );
    let req = ChatRequest {
        messages: vec![Message::system("You identify research gaps."), Message::user(prompt)],
        temperature: Some(0.3),
        max_tokens: Some(128),
        ..Default::default()
    };
    let resp = ctx.router.chat_for_role(options.model_role, req).await?;
    let tokens = resp.usage.as_ref().map(|u| u.total_tokens as u64).unwrap_or(0);
    Ok((resp.content, tokens))
}

async fn synthesize(
    ctx: &PatternContext,
    options: &PatternOptions,
    query: &str,
    prior_context: &str,
    sources: &[String],
) -> Result<(String, u64)> {
    let prompt = format!(
        "Prior context: {prior_context}\nQuestion: {query}\nSources:\n{}\n\nSynthesize a final answer, citing sources inline as [1], [2], etc.",
        sources.join("\n")
    );
    let req = ChatRequest {
        messages: vec![Message::system("You write well-cited research syntheses."), Message::user(prompt)],
        temperature: Some(0.3),
        max_tokens: Some((options.token_budget / 2).max(256) as u32),
        ..Default::default()
    };
    let resp = ctx.router.chat_for_role(options.model_role, req).await?;
    let tokens = resp.usage.as_ref().map(|u| u.total_tokens as u64).unwrap_or(0);
    Ok((resp.content, tokens))
}
