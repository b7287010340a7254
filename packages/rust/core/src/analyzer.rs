//! Response analysis: mention detection, citation classification, scoring.

use std::collections::HashSet;
use std::sync::LazyLock;

use chrono::Utc;
use regex::Regex;
use tracing::debug;
use uuid::Uuid;

use aivis_engine::RawAnswer;
use aivis_shared::{Citation, CitationBucket, CompanyContext, Question, QuestionAnalysis};

use crate::urls::{host_matches, normalize_domain, path_matches, split_host_path};

/// Score contributed by a brand mention.
const MENTION_POINTS: f64 = 60.0;
/// Score per unit of `1 + quality`, quality in `[-1, 1]`.
const CITATION_POINTS: f64 = 20.0;
/// Minimum weight any citation carries in the quality average.
const MIN_CITATION_WEIGHT: f64 = 0.1;

static TOKEN_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[\p{L}\p{N}]+").expect("token pattern is valid"));

const STOPWORDS: &[&str] = &[
    "the", "and", "for", "are", "what", "which", "who", "how", "does", "with", "you", "your",
    "can", "should", "use", "best", "good", "there", "that", "this", "from", "into", "about",
    "would", "recommend", "most", "top", "some", "any", "than", "more", "between", "is",
];

/// Case-insensitive matcher for a set of names.
///
/// Each term matches on word boundaries. Multi-word terms also match with
/// the separators collapsed, so "Acme Corp" matches "AcmeCorp" and "ACMECORP".
#[derive(Debug, Clone)]
pub struct MentionMatcher {
    pattern: Option<Regex>,
}

impl MentionMatcher {
    pub fn new<I, S>(terms: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let alternatives: Vec<String> = terms
            .into_iter()
            .filter_map(|term| term_pattern(term.as_ref()))
            .collect();
        let pattern = if alternatives.is_empty() {
            None
        } else {
            Regex::new(&format!(r"(?i)\b(?:{})\b", alternatives.join("|"))).ok()
        };
        Self { pattern }
    }

    pub fn matches(&self, text: &str) -> bool {
        self.pattern.as_ref().is_some_and(|re| re.is_match(text))
    }
}

fn term_pattern(term: &str) -> Option<String> {
    let words: Vec<&str> = TOKEN_RE.find_iter(term).map(|m| m.as_str()).collect();
    let compact_len: usize = words.iter().map(|w| w.chars().count()).sum();
    match compact_len {
        0 => None,
        // Short names ("HP", "EA") only match as written, never collapsed.
        1..3 => Some(regex::escape(term.trim())),
        _ => Some(
            words
                .iter()
                .map(|w| regex::escape(w))
                .collect::<Vec<_>>()
                .join(r"[\s\-_.]*"),
        ),
    }
}

/// Analyzer bound to one company context.
///
/// Built once per run; compiles the matchers and domain lists up front.
#[derive(Debug, Clone)]
pub struct ResponseAnalyzer {
    company: MentionMatcher,
    competitors: Vec<(String, MentionMatcher)>,
    domain: String,
    operated: Vec<(String, String)>,
    competitor_domains: Vec<String>,
}

impl ResponseAnalyzer {
    pub fn new(context: &CompanyContext) -> Self {
        let company_terms = std::iter::once(context.name.as_str())
            .chain(std::iter::once(context.domain.as_str()))
            .chain(context.aliases.iter().map(String::as_str));

        let competitors = context
            .competitors
            .iter()
            .map(|c| {
                let terms = std::iter::once(c.name.as_str()).chain(c.domain.as_deref());
                (c.name.clone(), MentionMatcher::new(terms))
            })
            .collect();

        let operated = context
            .operated_properties
            .iter()
            .filter_map(|site| split_host_path(site))
            .collect();

        let competitor_domains = context
            .competitors
            .iter()
            .filter_map(|c| c.domain.as_deref())
            .map(normalize_domain)
            .filter(|d| !d.is_empty())
            .collect();

        Self {
            company: MentionMatcher::new(company_terms),
            competitors,
            domain: normalize_domain(&context.domain),
            operated,
            competitor_domains,
        }
    }

    /// Analyze one answer to `question`.
    pub fn analyze(&self, answer: &RawAnswer, question: &Question) -> QuestionAnalysis {
        let mention_detected = self.company.matches(&answer.text);
        let competitor_mentions: Vec<String> = self
            .competitors
            .iter()
            .filter(|(_, matcher)| matcher.matches(&answer.text))
            .map(|(name, _)| name.clone())
            .collect();

        let references: Vec<usize> = (0..answer.citations.len())
            .map(|i| reference_count(&answer.text, i, &answer.citations[i].url))
            .collect();
        let max_references = references.iter().copied().max().unwrap_or(0);
        let question_tokens = content_tokens(&question.text);

        let citations: Vec<Citation> = answer
            .citations
            .iter()
            .enumerate()
            .map(|(i, raw)| Citation {
                url: raw.url.clone(),
                title: raw.title.clone(),
                bucket: self.classify(&raw.url),
                influence: influence(i, answer.citations.len(), references[i], max_references),
                relevance: relevance(&question_tokens, &answer.text, i, &raw.url, raw.title.as_deref()),
            })
            .collect();

        let score = question_score(mention_detected, &citations);
        debug!(
            question = question.sequence,
            mention_detected,
            competitors = competitor_mentions.len(),
            citations = citations.len(),
            score,
            "answer analyzed"
        );

        QuestionAnalysis {
            id: Uuid::now_v7().to_string(),
            question_id: question.id.clone(),
            run_id: question.run_id.clone(),
            answer_text: answer.text.clone(),
            mention_detected,
            competitor_mentions,
            citations,
            score,
            analyzed_at: Utc::now(),
        }
    }

    /// Bucket a cited URL. Owned wins over everything else.
    pub fn classify(&self, url: &str) -> CitationBucket {
        let Some((host, path)) = split_host_path(url) else {
            return CitationBucket::Earned;
        };

        if !self.domain.is_empty() && host == self.domain {
            return CitationBucket::Owned;
        }
        if host_matches(&host, &self.domain)
            || self
                .operated
                .iter()
                .any(|(op_host, op_path)| host_matches(&host, op_host) && path_matches(&path, op_path))
        {
            return CitationBucket::Operated;
        }
        if self
            .competitor_domains
            .iter()
            .any(|domain| host_matches(&host, domain))
        {
            return CitationBucket::Competitor;
        }
        CitationBucket::Earned
    }
}

/// Analyze without keeping the compiled analyzer around.
pub fn analyze(answer: &RawAnswer, question: &Question, context: &CompanyContext) -> QuestionAnalysis {
    ResponseAnalyzer::new(context).analyze(answer, question)
}

/// `[i+1]` markers plus literal occurrences of the URL in the answer.
fn reference_count(text: &str, index: usize, url: &str) -> usize {
    let marker = format!("[{}]", index + 1);
    let markers = text.matches(marker.as_str()).count();

    let bare = url
        .trim()
        .trim_start_matches("https://")
        .trim_start_matches("http://")
        .trim_end_matches('/');
    let literal = if bare.len() > 3 {
        text.matches(bare).count()
    } else {
        0
    };
    markers + literal
}

/// Earlier and more-referenced citations weigh more. Range `[0, 1]`.
pub fn influence(index: usize, total: usize, references: usize, max_references: usize) -> f64 {
    if total == 0 {
        return 0.0;
    }
    let position = 1.0 - index as f64 / total as f64;
    let frequency = if max_references == 0 {
        0.0
    } else {
        references as f64 / max_references as f64
    };
    (0.5 * position + 0.5 * frequency).clamp(0.0, 1.0)
}

/// Share of the question's content tokens found in the citation's context.
fn relevance(
    question_tokens: &HashSet<String>,
    text: &str,
    index: usize,
    url: &str,
    title: Option<&str>,
) -> f64 {
    if question_tokens.is_empty() {
        return 0.0;
    }

    let marker = format!("[{}]", index + 1);
    let mut context = String::new();
    if let Some(title) = title {
        context.push_str(title);
        context.push(' ');
    }
    context.push_str(url);
    for sentence in text.split(['.', '!', '?', '\n']) {
        if sentence.contains(marker.as_str()) {
            context.push(' ');
            context.push_str(sentence);
        }
    }

    let context_tokens = tokens(&context);
    let found = question_tokens
        .iter()
        .filter(|t| context_tokens.contains(*t))
        .count();
    found as f64 / question_tokens.len() as f64
}

fn tokens(text: &str) -> HashSet<String> {
    TOKEN_RE
        .find_iter(&text.to_lowercase())
        .map(|m| m.as_str().to_string())
        .collect()
}

fn content_tokens(text: &str) -> HashSet<String> {
    tokens(text)
        .into_iter()
        .filter(|t| t.chars().count() >= 3 && !STOPWORDS.contains(&t.as_str()))
        .collect()
}

fn bucket_value(bucket: CitationBucket) -> f64 {
    match bucket {
        CitationBucket::Owned => 1.0,
        CitationBucket::Operated => 0.8,
        CitationBucket::Earned => 0.3,
        CitationBucket::Competitor => -1.0,
    }
}

/// Per-question visibility score in `[0, 100]`.
pub fn question_score(mention_detected: bool, citations: &[Citation]) -> f64 {
    let quality = if citations.is_empty() {
        0.0
    } else {
        let (weighted, weights) = citations.iter().fold((0.0, 0.0), |(sum, total), c| {
            let weight = ((c.influence + c.relevance) / 2.0).max(MIN_CITATION_WEIGHT);
            (sum + weight * bucket_value(c.bucket), total + weight)
        });
        weighted / weights
    };
    let mention = if mention_detected { 1.0 } else { 0.0 };
    (MENTION_POINTS * mention + CITATION_POINTS * (1.0 + quality)).clamp(0.0, 100.0)
}
