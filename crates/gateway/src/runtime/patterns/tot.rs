//! Tree of Thoughts pattern (spec.md §4.5): best-first exploration of a
//! branching reasoning tree, pruned by a heuristic score.

use async_trait::async_trait;
use shannon_domain::error::Result;
use shannon_domain::event::EventType;
use shannon_domain::strategy::PatternType;
use shannon_domain::tool::Message;
use shannon_providers::traits::ChatRequest;

use super::{emit, Pattern, PatternContext, PatternOptions, PatternResult};

const DEFAULT_BRANCHES: usize = 3;
const MAX_BRANCHES: usize = 4;
const PRUNING_THRESHOLD: f64 = 0.3;
const MAX_DEPTH: usize = 3;
const EXPLORATION_BUDGET: usize = 15;
const DEPTH_PENALTY: f64 = 0.05;
const BACKTRACK_CONFIDENCE_THRESHOLD: f64 = 0.5;

const SOLUTION_MARKERS: &[&str] = &["solution:", "final answer:", "this solves it"];
const DEAD_END_MARKERS: &[&str] = &["dead end", "no progress", "cannot proceed"];
const SOLUTION_LANGUAGE: &[&str] = &["solves", "answer is", "correct", "satisfies"];
const CONNECTORS: &[&str] = &["therefore", "because", "since", "thus", "hence"];
const STEP_TERMS: &[&str] = &["step", "next,", "then,", "first,", "finally,"];

struct Node {
    text: String,
    parent: Option<usize>,
    depth: usize,
    score: f64,
    expanded: bool,
    terminal: bool,
}

pub struct TreeOfThoughtsPattern;

#[async_trait]
impl Pattern for TreeOfThoughtsPattern {
    fn pattern_type(&self) -> PatternType {
        PatternType::TreeOfThoughts
    }

    async fn execute(
        &self,
        ctx: &PatternContext,
        query: &str,
        prior_context: &str,
        options: &PatternOptions,
    ) -> Result<PatternResult> {
        emit(ctx, options, EventType::AgentThinking, Some("tree of thoughts".into()));

        let mut nodes: Vec<Node> = vec![Node {
            text: query.to_string(),
            parent: None,
            depth: 0,
            score: 1.0,
            expanded: false,
            terminal: false,
        }];
        let mut tokens_used: u64 = 0;
        let mut generated = 0usize;

        while generated < EXPLORATION_BUDGET {
            if ctx.control.is_cancel_requested(ctx.workflow_id) {
                return Err(shannon_domain::error::Error::Cancelled);
            }

            let Some(best_idx) = best_unexpanded(&nodes) else { break };
            if nodes[best_idx].terminal || nodes[best_idx].depth >= MAX_DEPTH {
                nodes[best_idx].expanded = true;
                continue;
            }

            let (branches, branch_tokens) =
                expand(ctx, options, prior_context, &path_text(&nodes, best_idx), DEFAULT_BRANCHES.min(MAX_BRANCHES)).await?;
            tokens_used += branch_tokens;
            nodes[best_idx].expanded = true;

            for branch in branches {
                if generated >= EXPLORATION_BUDGET {
                    break;
                }
                generated += 1;
                let depth = nodes[best_idx].depth + 1;
                let mut score = score_branch(&branch) - DEPTH_PENALTY * depth as f64;
                score = score.max(0.0);
                let terminal = is_terminal(&branch) || depth >= MAX_DEPTH;
                if score < PRUNING_THRESHOLD {
                    continue;
                }
                nodes.push(Node { text: branch, parent: Some(best_idx), depth, score, expanded: false, terminal });
            }
        }

        let (mut best_leaf, mut best_avg) = best_path(&nodes);

        if best_avg < BACKTRACK_CONFIDENCE_THRESHOLD {
            // `backtrack_enabled`: re-examine the best-scoring residual
            // nodes that were never expanded, in case a shallower branch
            // scores better on average than the deepest path found.
            let mut residuals: Vec<usize> = (0..nodes.len()).filter(|&i| !nodes[i].expanded).collect();
            residuals.sort_by(|&a, &b| nodes[b].score.partial_cmp(&nodes[a].score).unwrap());
            for idx in residuals.into_iter().take(3) {
                let (_, avg) = path_average(&nodes, idx);
                if avg > best_avg {
                    best_avg = avg;
                    best_leaf = idx;
                }
            }
        }

        Ok(PatternResult {
            result: path_text(&nodes, best_leaf),
            tokens_used,
            confidence: best_avg,
            metadata: serde_json::json!({ "nodes_generated": generated, "depth": nodes[best_leaf].depth }),
        })
    }
}

fn best_unexpanded(nodes: &[Node]) -> Option<usize> {
    nodes
        .iter()
        .enumerate()
        .filter(|(_, n)| !n.expanded)
        .max_by(|(_, a), (_, b)| a.score.partial_cmp(&b.score).unwrap())
        .map(|(i, _)| i)
}

fn path_text(nodes: &[Node], mut idx: usize) -> String {
    let mut parts = vec![nodes[idx].text.clone()];
    while let Some(parent) = nodes[idx].parent {
        parts.push(nodes[parent].text.clone());
        idx = parent;
    }
    parts.reverse();
    parts.join(" -> ")
}

fn path_average(nodes: &[Node], mut idx: usize) -> (usize, f64) {
    let leaf = idx;
    let mut total = nodes[idx].score;
    let mut count = 1;
    while let Some(parent) = nodes[idx].parent {
        total += nodes[parent].score;
        count += 1;
        idx = parent;
    }
    (leaf, total / count as f64)
}

/// DFS over every generated node's path average, keeping the maximizer
/// (spec.md §4.5 "average-score-maximizing path").
fn best_path(nodes: &[Node]) -> (usize, f64) {
    (0..nodes.len())
        .map(|i| path_average(nodes, i))
        .max_by(|(_, a), (_, b)| a.partial_cmp(b).unwrap())
        .unwrap_or((0, nodes[0].score))
}

async fn expand(
    ctx: &PatternContext,
    options: &PatternOptions,
    prior_context: &str,
    path_so_far: &str,
    branch_count: usize,
) -> Result<(Vec<String>, u64)> {
    let prompt = format!(
        "Prior context: {prior_context}\nReasoning so far: {path_so_far}\n\nPropose {branch_count} distinct next reasoning steps, one per line, numbered 1. 2. 3."
    );
    let req = ChatRequest {
        messages: vec![Message::system("You explore a reasoning tree."), Message::user(prompt)],
        temperature: Some(0.7),
        max_tokens: Some((options.token_budget / 4).max(128) as u32),
        ..Default::default()
    };
    let resp = ctx.router.chat_for_role(options.model_role, req).await?;
    let tokens = resp.usage.as_ref().map(|u| u.total_tokens as u64).unwrap_or(0);
    let branches: Vec<String> = resp
        .content
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .take(branch_count)
        .map(str::to_string)
        .collect();
    Ok((if branches.is_empty() { vec![resp.content] } else { branches }, tokens))
}

fn score_branch(text: &str) -> f64 {
    let lower = text.to_lowercase();
    let mut score = 0.2;
    score += SOLUTION_LANGUAGE.iter().filter(|m| lower.contains(*m)).count() as f64 * 0.15;
    score += CONNECTORS.iter().filter(|c| lower.contains(*c)).count() as f64 * 0.1;
    score += STEP_TERMS.iter().filter(|t| lower.contains(*t)).count() as f64 * 0.05;
    score.clamp(0.0, 1.0)
}

fn is_terminal(text: &str) -> bool {
    let lower = text.to_lowercase();
    SOLUTION_MARKERS.iter().any(|m| lower.contains(m)) || DEAD_END_MARKERS.iter().any(|m| lower.contains(m))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn solution_language_scores_higher_than_plain_text() {
        assert!(score_branch("This solves it because the answer is clearly 42") > score_branch("hmm not sure"));
    }

    #[test]
    fn terminal_detects_solution_and_dead_end_markers() {
        assert!(is_terminal("Solution: 42"));
        assert!(is_terminal("This is a dead end"));
        assert!(!is_terminal("let's keep exploring"));
    }
}
