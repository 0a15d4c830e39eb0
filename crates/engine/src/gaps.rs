//! Knowledge-gap detection and emerging-issue clustering.

use crate::index::PartitionedIndex;
use crate::types::{truncate_chars, EmergingIssue, GapDetectionResult, Partition, TicketRecord};
use meridian_core::{AppError, AppResult};
use std::collections::HashMap;
use std::sync::Arc;

const SAMPLE_RESOLUTION_CHARS: usize = 200;

/// Measures how well each ticket's resolution is covered by the KB partition.
#[derive(Debug, Clone)]
pub struct GapDetector {
    index: Arc<PartitionedIndex>,
    tickets: Vec<TicketRecord>,
    positions: HashMap<String, usize>,
    threshold: f32,
}

impl GapDetector {
    /// Create a detector over a fixed ticket set.
    ///
    /// A ticket is a gap when its resolution similarity is below `threshold`.
    pub fn new(index: Arc<PartitionedIndex>, tickets: Vec<TicketRecord>, threshold: f32) -> Self {
        let positions = tickets
            .iter()
            .enumerate()
            .map(|(i, t)| (t.ticket_id.clone(), i))
            .collect();

        tracing::info!(
            "Gap detector ready: {} tickets, threshold={}",
            tickets.len(),
            threshold
        );

        Self {
            index,
            tickets,
            positions,
            threshold,
        }
    }

    pub fn threshold(&self) -> f32 {
        self.threshold
    }

    pub fn tickets(&self) -> &[TicketRecord] {
        &self.tickets
    }

    /// Check one ticket by id.
    ///
    /// # Errors
    /// * `AppError::NotFound` - the ticket id is unknown
    /// * `AppError::IndexNotBuilt` - the index has not been built
    pub async fn check_ticket(&self, ticket_id: &str) -> AppResult<GapDetectionResult> {
        let ticket = self
            .positions
            .get(ticket_id)
            .map(|&i| &self.tickets[i])
            .ok_or_else(|| AppError::NotFound(format!("Ticket '{}' not found", ticket_id)))?;

        self.assess(ticket).await
    }

    async fn assess(&self, ticket: &TicketRecord) -> AppResult<GapDetectionResult> {
        let (resolution_similarity, best_matching_kb_id) = self.best_kb_match(&ticket.resolution).await?;
        let (problem_similarity, best_matching_kb_for_problem) =
            self.best_kb_match(&ticket.problem_text()).await?;

        Ok(GapDetectionResult {
            ticket_id: ticket.ticket_id.clone(),
            is_gap: resolution_similarity < self.threshold,
            resolution_similarity,
            best_matching_kb_id,
            problem_similarity,
            best_matching_kb_for_problem,
            resolution_text: ticket.resolution.clone(),
            description_text: ticket.description.clone(),
            tier: ticket.tier,
            module: ticket.module.clone(),
            category: ticket.category.clone(),
            script_id: ticket.script_id.clone(),
            conversation_id: ticket.conversation_id.clone(),
        })
    }

    async fn best_kb_match(&self, text: &str) -> AppResult<(f32, String)> {
        Ok(self
            .index
            .similarity_to_corpus(text, &[Partition::Kb])
            .await?
            .map_or((0.0, String::new()), |m| (m.similarity, m.doc_id)))
    }

    /// Check every ticket, worst-covered first.
    pub async fn scan_all_tickets(&self) -> AppResult<Vec<GapDetectionResult>> {
        let mut results = Vec::with_capacity(self.tickets.len());
        for ticket in &self.tickets {
            results.push(self.assess(ticket).await?);
        }

        results.sort_by(|a, b| a.resolution_similarity.total_cmp(&b.resolution_similarity));

        let gaps = results.iter().filter(|r| r.is_gap).count();
        tracing::info!(
            "Found {}/{} gaps (threshold={})",
            gaps,
            results.len(),
            self.threshold
        );
        Ok(results)
    }
}

/// Group gap results by (category, module) into emerging issues.
///
/// Groups smaller than `min_cluster_size` are dropped. The rest are
/// ordered by ticket count, largest first, ties in discovery order.
pub fn detect_emerging_issues(
    gap_results: &[GapDetectionResult],
    min_cluster_size: usize,
) -> Vec<EmergingIssue> {
    let mut order: Vec<(&str, &str)> = Vec::new();
    let mut groups: HashMap<(&str, &str), Vec<&GapDetectionResult>> = HashMap::new();

    for result in gap_results.iter().filter(|r| r.is_gap) {
        let key = (result.category.as_str(), result.module.as_str());
        groups
            .entry(key)
            .or_insert_with(|| {
                order.push(key);
                Vec::new()
            })
            .push(result);
    }

    let mut issues: Vec<EmergingIssue> = order
        .into_iter()
        .filter_map(|key| {
            let members = groups.remove(&key)?;
            if members.len() < min_cluster_size {
                return None;
            }

            let total: f32 = members.iter().map(|r| r.resolution_similarity).sum();
            Some(EmergingIssue {
                category: key.0.to_string(),
                module: key.1.to_string(),
                ticket_count: members.len(),
                ticket_ids: members.iter().map(|r| r.ticket_id.clone()).collect(),
                avg_similarity: total / members.len() as f32,
                sample_resolution: truncate_chars(
                    &members[0].resolution_text,
                    SAMPLE_RESOLUTION_CHARS,
                ),
            })
        })
        .collect();

    issues.sort_by(|a, b| b.ticket_count.cmp(&a.ticket_count));

    tracing::info!(
        "Detected {} emerging issues (min_cluster_size={})",
        issues.len(),
        min_cluster_size
    );
    issues
}
