//! Template-based probe question generation.
//!
//! Questions are rendered from a fixed template library. Each template is
//! bound to one [`QuestionType`] and names the context slots it needs;
//! templates whose slots the context cannot fill are skipped.

use std::collections::{HashSet, VecDeque};
use std::sync::LazyLock;

use regex::Regex;
use uuid::Uuid;

use aivis_shared::{CompanyContext, Question, QuestionStatus, QuestionType, RunId};
use QuestionType::*;

/// Values considered per multi-valued slot.
const MAX_SLOT_VALUES: usize = 3;

static SLOT_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\{([a-z_]+)\}").expect("slot pattern is valid"));

struct Template {
    question_type: QuestionType,
    text: &'static str,
}

const fn t(question_type: QuestionType, text: &'static str) -> Template {
    Template {
        question_type,
        text,
    }
}

const TEMPLATES: &[Template] = &[
    t(DirectConversational, "What is {company}?"),
    t(DirectConversational, "What does {company} ({domain}) do?"),
    t(DirectConversational, "Is {company} a good choice for {category}?"),
    t(DirectConversational, "What are the pros and cons of {company}?"),
    t(DirectConversational, "Does {company} support {feature}?"),
    t(Comparison, "How does {company} compare to {competitor}?"),
    t(Comparison, "{company} vs {competitor}: which is better?"),
    t(Comparison, "Should I use {company} or {competitor} for {use_case}?"),
    t(Indirect, "What are the best {category} tools?"),
    t(Indirect, "Which {category} companies are leading the market?"),
    t(Indirect, "Which tools offer {feature}?"),
    t(Indirect, "What are the most recommended solutions for {keyword}?"),
    t(UseCase, "What is the best tool for {use_case}?"),
    t(UseCase, "How can I deal with {pain_point}?"),
    t(UseCase, "What software helps teams with {pain_point}?"),
    t(Persona, "What {category} tool would you recommend for a {persona}?"),
    t(Persona, "As a {persona}, which tools should I use for {use_case}?"),
    t(Alternatives, "What are the best alternatives to {competitor}?"),
    t(Alternatives, "What are the top alternatives to {company}?"),
    t(Alternatives, "Is there a cheaper alternative to {competitor}?"),
];

/// Options for one generation call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QuestionOptions {
    /// Maximum questions to emit.
    pub count: usize,
    /// Types to draw from, in round-robin order. Empty means all types.
    pub allowed_types: Vec<QuestionType>,
}

impl Default for QuestionOptions {
    fn default() -> Self {
        Self {
            count: 10,
            allowed_types: QuestionType::ALL.to_vec(),
        }
    }
}

/// A generated question before it is attached to a run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QuestionDraft {
    /// 1-based, contiguous.
    pub sequence: u32,
    pub question_type: QuestionType,
    pub text: String,
}

impl QuestionDraft {
    /// Attach the draft to a run as a pending question.
    pub fn into_question(self, run_id: &RunId) -> Question {
        Question {
            id: Uuid::now_v7().to_string(),
            run_id: run_id.clone(),
            sequence: self.sequence,
            question_type: self.question_type,
            text: self.text,
            status: QuestionStatus::Pending,
            failure_reason: None,
        }
    }
}

/// One fully-bound template, rendered on demand.
struct Candidate {
    template: &'static str,
    bindings: Vec<(&'static str, String)>,
}

impl Candidate {
    fn render(&self) -> String {
        SLOT_RE
            .replace_all(self.template, |caps: &regex::Captures<'_>| {
                let slot = caps.get(1).map_or("", |m| m.as_str());
                self.bindings
                    .iter()
                    .find(|(name, _)| *name == slot)
                    .map(|(_, value)| value.clone())
                    .unwrap_or_default()
            })
            .into_owned()
    }
}

/// Lazy, finite stream of distinct questions.
///
/// Draws round-robin over the allowed types; a type whose candidates run
/// out drops from the rotation.
pub struct QuestionStream {
    queues: Vec<(QuestionType, VecDeque<Candidate>)>,
    cursor: usize,
    remaining: usize,
    emitted: u32,
    seen: HashSet<String>,
}

impl Iterator for QuestionStream {
    type Item = QuestionDraft;

    fn next(&mut self) -> Option<Self::Item> {
        while self.remaining > 0 && !self.queues.is_empty() {
            let slot = self.cursor % self.queues.len();
            let (question_type, queue) = &mut self.queues[slot];
            let question_type = *question_type;

            let Some(candidate) = queue.pop_front() else {
                self.queues.remove(slot);
                self.cursor = slot;
                continue;
            };

            let text = candidate.render();
            if !self.seen.insert(dedupe_key(&text)) {
                continue;
            }

            self.cursor = slot + 1;
            self.remaining -= 1;
            self.emitted += 1;
            return Some(QuestionDraft {
                sequence: self.emitted,
                question_type,
                text,
            });
        }
        None
    }
}

/// Start generating questions for `context`.
///
/// Deterministic: the same context and options always yield the same
/// sequence.
pub fn generate(context: &CompanyContext, options: &QuestionOptions) -> QuestionStream {
    let mut types: Vec<QuestionType> = Vec::new();
    let requested = if options.allowed_types.is_empty() {
        &QuestionType::ALL[..]
    } else {
        &options.allowed_types[..]
    };
    for question_type in requested {
        if !types.contains(question_type) {
            types.push(*question_type);
        }
    }

    let queues: Vec<(QuestionType, VecDeque<Candidate>)> = types
        .into_iter()
        .map(|question_type| {
            let candidates: VecDeque<Candidate> = TEMPLATES
                .iter()
                .filter(|template| template.question_type == question_type)
                .flat_map(|template| expand(template.text, context))
                .collect();
            (question_type, candidates)
        })
        .collect();

    QuestionStream {
        queues,
        cursor: 0,
        remaining: options.count,
        emitted: 0,
        seen: HashSet::new(),
    }
}

/// Every binding of `template`'s slots against the context, in context
/// order. Empty when any slot has no value.
fn expand(template: &'static str, context: &CompanyContext) -> Vec<Candidate> {
    let mut bindings: Vec<Vec<(&'static str, String)>> = vec![Vec::new()];

    for caps in SLOT_RE.captures_iter(template) {
        let Some(slot) = caps.get(1).map(|m| m.as_str()) else {
            continue;
        };
        if bindings[0].iter().any(|(name, _)| *name == slot) {
            continue;
        }
        let values = slot_values(slot, context);
        if values.is_empty() {
            return Vec::new();
        }
        bindings = bindings
            .into_iter()
            .flat_map(|partial| {
                values.iter().map(move |value| {
                    let mut next = partial.clone();
                    next.push((slot, value.clone()));
                    next
                })
            })
            .collect();
    }

    bindings
        .into_iter()
        .map(|bindings| Candidate { template, bindings })
        .collect()
}

fn slot_values(slot: &str, context: &CompanyContext) -> Vec<String> {
    let single = |value: &str| -> Vec<String> {
        let value = clean(value);
        if value.is_empty() { Vec::new() } else { vec![value] }
    };
    let first = |values: &[String]| -> Vec<String> {
        values
            .iter()
            .map(|v| clean(v))
            .filter(|v| !v.is_empty())
            .take(MAX_SLOT_VALUES)
            .collect()
    };

    match slot {
        "company" => single(&context.name),
        "domain" => single(&context.domain),
        "category" => context
            .industry
            .as_deref()
            .map(single)
            .or_else(|| context.keywords.first().map(|k| single(k)))
            .unwrap_or_default(),
        "competitor" => {
            let names: Vec<String> = context.competitors.iter().map(|c| c.name.clone()).collect();
            first(&names)
        }
        "persona" => first(&context.personas),
        "use_case" => first(&context.use_cases),
        "pain_point" => first(&context.pain_points),
        "feature" => first(&context.product_features),
        "keyword" => first(&context.keywords),
        _ => Vec::new(),
    }
}

/// Knowledge entries are often full sentences; trailing punctuation
/// would break the surrounding question.
fn clean(value: &str) -> String {
    value
        .trim()
        .trim_end_matches(['.', '!', '?', ';', ':'])
        .trim()
        .to_string()
}

fn dedupe_key(text: &str) -> String {
    text.chars()
        .filter(|c| c.is_alphanumeric())
        .flat_map(char::to_lowercase)
        .collect()
}

#[cfg(test)]
mod tests {
    use aivis_shared::Competitor;

    use super::*;

    fn rich_context() -> CompanyContext {
        CompanyContext {
            company_id: "c1".into(),
            name: "Acme Corp".into(),
            domain: "acme.dev".into(),
            industry: Some("code review".into()),
            competitors: vec![
                Competitor { name: "Riva".into(), domain: Some("riva.ai".into()) },
                Competitor { name: "Nimbus".into(), domain: Some("nimbus.ai".into()) },
            ],
            personas: vec!["engineering manager".into()],
            use_cases: vec!["reviewing pull requests".into()],
            pain_points: vec!["slow code reviews.".into()],
            product_features: vec!["inline suggestions".into()],
            keywords: vec!["code review".into(), "static analysis".into()],
            ..CompanyContext::default()
        }
    }

    fn options(count: usize, allowed_types: Vec<QuestionType>) -> QuestionOptions {
        QuestionOptions { count, allowed_types }
    }

    #[test]
    fn generation_is_deterministic() {
        let context = rich_context();
        let opts = options(12, vec![]);
        let first: Vec<_> = generate(&context, &opts).collect();
        let second: Vec<_> = generate(&context, &opts).collect();
        assert_eq!(first, second);
        assert_eq!(first.len(), 12);
    }

    #[test]
    fn sequences_start_at_one_and_are_contiguous() {
        let drafts: Vec<_> = generate(&rich_context(), &options(7, vec![])).collect();
        let sequences: Vec<u32> = drafts.iter().map(|d| d.sequence).collect();
        assert_eq!(sequences, (1..=7).collect::<Vec<_>>());
    }

    #[test]
    fn only_allowed_types_are_emitted() {
        let allowed = vec![QuestionType::Comparison, QuestionType::Alternatives];
        let drafts: Vec<_> = generate(&rich_context(), &options(6, allowed.clone())).collect();
        assert_eq!(drafts.len(), 6);
        assert!(drafts.iter().all(|d| allowed.contains(&d.question_type)));
        // Round-robin in the caller's order.
        assert_eq!(drafts[0].question_type, QuestionType::Comparison);
        assert_eq!(drafts[1].question_type, QuestionType::Alternatives);
        assert_eq!(drafts[2].question_type, QuestionType::Comparison);
    }

    #[test]
    fn no_two_questions_are_semantically_equal() {
        let drafts: Vec<_> = generate(&rich_context(), &options(100, vec![])).collect();
        let keys: HashSet<String> = drafts.iter().map(|d| dedupe_key(&d.text)).collect();
        assert_eq!(keys.len(), drafts.len());
    }

    #[test]
    fn unfillable_templates_are_skipped() {
        let sparse = CompanyContext {
            name: "Acme Corp".into(),
            domain: "acme.dev".into(),
            ..CompanyContext::default()
        };
        let drafts: Vec<_> = generate(&sparse, &options(50, vec![])).collect();
        assert!(!drafts.is_empty());
        assert!(drafts.iter().all(|d| !d.text.contains('{')));
        assert!(drafts.iter().all(|d| d.question_type != QuestionType::Comparison));

        let only_comparison = generate(&sparse, &options(5, vec![QuestionType::Comparison]));
        assert_eq!(only_comparison.count(), 0);
    }

    #[test]
    fn count_larger_than_supply_returns_fewer() {
        let sparse = CompanyContext {
            name: "Acme Corp".into(),
            domain: "acme.dev".into(),
            ..CompanyContext::default()
        };
        let drafts: Vec<_> = generate(&sparse, &options(1000, vec![])).collect();
        assert!(drafts.len() < 1000);
    }

    #[test]
    fn multi_valued_slots_expand_and_punctuation_is_trimmed() {
        let drafts: Vec<_> =
            generate(&rich_context(), &options(20, vec![QuestionType::Alternatives])).collect();
        let texts: Vec<&str> = drafts.iter().map(|d| d.text.as_str()).collect();
        assert!(texts.contains(&"What are the best alternatives to Riva?"));
        assert!(texts.contains(&"What are the best alternatives to Nimbus?"));

        let use_case: Vec<_> =
            generate(&rich_context(), &options(20, vec![QuestionType::UseCase])).collect();
        assert!(use_case.iter().any(|d| d.text == "How can I deal with slow code reviews?"));
    }

    #[test]
    fn drafts_become_pending_questions() {
        let run_id = RunId::new();
        let draft = generate(&rich_context(), &options(1, vec![])).next().unwrap();
        let question = draft.clone().into_question(&run_id);
        assert_eq!(question.run_id, run_id);
        assert_eq!(question.sequence, 1);
        assert_eq!(question.text, draft.text);
        assert_eq!(question.status, QuestionStatus::Pending);
    }
}
