//! Run-level aggregation over analyzed questions.

use aivis_shared::{
    CitationBucket, CitationStats, CompanyContext, CompetitorSnapshot, QuestionAnalysis, RunId,
    RunSummary,
};

use crate::urls::{host_matches, normalize_domain, split_host_path};

/// Weight of the mention rate in a competitor's visibility score.
const MENTION_WEIGHT: f64 = 0.7;
/// Weight of the citation share in a competitor's visibility score.
const CITATION_WEIGHT: f64 = 0.3;

/// Summarize a run. Failed questions count toward `questions_total` only.
pub fn summarize(
    questions_total: usize,
    analyses: &[QuestionAnalysis],
    questions_failed: usize,
) -> RunSummary {
    let analyzed = analyses.len();
    let (total_score, mention_rate) = if analyzed == 0 {
        (0.0, 0.0)
    } else {
        let score_sum: f64 = analyses.iter().map(|a| a.score).sum();
        let mentioned = analyses.iter().filter(|a| a.mention_detected).count();
        (score_sum / analyzed as f64, mentioned as f64 / analyzed as f64)
    };

    let message = if questions_failed == 0 {
        format!("Scored {analyzed} questions")
    } else {
        format!("Scored {analyzed} of {questions_total} questions ({questions_failed} failed)")
    };

    RunSummary {
        total_score,
        mention_rate,
        questions_total,
        questions_analyzed: analyzed,
        questions_failed,
        citation_stats: citation_stats(analyses),
        message,
    }
}

/// Bucket counts and mean influence/relevance across all citations.
pub fn citation_stats(analyses: &[QuestionAnalysis]) -> CitationStats {
    let mut stats = CitationStats::default();
    let mut influence = 0.0;
    let mut relevance = 0.0;

    for citation in analyses.iter().flat_map(|a| &a.citations) {
        stats.total += 1;
        match citation.bucket {
            CitationBucket::Owned => stats.owned += 1,
            CitationBucket::Operated => stats.operated += 1,
            CitationBucket::Earned => stats.earned += 1,
            CitationBucket::Competitor => stats.competitor += 1,
        }
        influence += citation.influence;
        relevance += citation.relevance;
    }

    if stats.total > 0 {
        stats.avg_influence = influence / stats.total as f64;
        stats.avg_relevance = relevance / stats.total as f64;
    }
    stats
}

/// Benchmark every known competitor, most visible first.
///
/// Ties are broken by name so the ranking is stable.
pub fn competitor_snapshots(
    run_id: &RunId,
    context: &CompanyContext,
    analyses: &[QuestionAnalysis],
) -> Vec<CompetitorSnapshot> {
    let analyzed = analyses.len();
    let cited_hosts: Vec<String> = analyses
        .iter()
        .flat_map(|a| &a.citations)
        .filter_map(|c| split_host_path(&c.url).map(|(host, _)| host))
        .collect();
    let total_citations = analyses.iter().map(|a| a.citations.len()).sum::<usize>();

    let mut snapshots: Vec<CompetitorSnapshot> = context
        .competitors
        .iter()
        .map(|competitor| {
            let mention_count = analyses
                .iter()
                .filter(|a| a.competitor_mentions.iter().any(|m| m == &competitor.name))
                .count();
            let domain = competitor
                .domain
                .as_deref()
                .map(normalize_domain)
                .filter(|d| !d.is_empty());
            let citation_count = domain.as_deref().map_or(0, |domain| {
                cited_hosts
                    .iter()
                    .filter(|host| host_matches(host, domain))
                    .count()
            });

            let mention_rate = ratio(mention_count, analyzed);
            let citation_share = ratio(citation_count, total_citations);
            let visibility_score =
                100.0 * (MENTION_WEIGHT * mention_rate + CITATION_WEIGHT * citation_share);

            CompetitorSnapshot {
                run_id: run_id.clone(),
                name: competitor.name.clone(),
                domain,
                mention_count,
                citation_count,
                visibility_score,
                rank: 0,
            }
        })
        .collect();

    snapshots.sort_by(|a, b| {
        b.visibility_score
            .total_cmp(&a.visibility_score)
            .then_with(|| a.name.cmp(&b.name))
    });
    for (i, snapshot) in snapshots.iter_mut().enumerate() {
        snapshot.rank = i as u32 + 1;
    }
    snapshots
}

fn ratio(part: usize, whole: usize) -> f64 {
    if whole == 0 {
        0.0
    } else {
        part as f64 / whole as f64
    }
}
