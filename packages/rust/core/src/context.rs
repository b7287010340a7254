//! Knowledge context builder: stored company knowledge → typed [`CompanyContext`].
//!
//! Knowledge items are loosely shaped JSON. This module is the only place
//! that interprets them; everything downstream sees typed sections.

use std::collections::HashSet;

use serde_json::Value;
use tracing::{debug, info, instrument};

use aivis_shared::{AivisError, CompanyContext, Competitor, KnowledgeItem, Result};
use aivis_storage::KnowledgeSource;

use crate::urls::{normalize_domain, normalize_site};

/// Keys checked, in order, when a knowledge object holds a single text value.
const TEXT_KEYS: &[&str] = &["text", "value", "content", "description", "title", "name"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Section {
    Overview,
    Positioning,
    PainPoints,
    ProductFeatures,
    UseCases,
    BrandVoice,
    Competitors,
    Personas,
    Keywords,
    ValuePropositions,
    Aliases,
    OperatedProperties,
    Industry,
    BusinessModel,
}

impl Section {
    fn from_category(category: &str) -> Option<Self> {
        let key = category.trim().to_lowercase().replace(['-', ' '], "_");
        let section = match key.as_str() {
            "overview" | "summary" => Self::Overview,
            "positioning" => Self::Positioning,
            "pain_points" => Self::PainPoints,
            "product_features" | "features" => Self::ProductFeatures,
            "use_cases" => Self::UseCases,
            "brand_voice" => Self::BrandVoice,
            "competitors" => Self::Competitors,
            "personas" | "target_personas" => Self::Personas,
            "keywords" => Self::Keywords,
            "value_propositions" | "uvp" => Self::ValuePropositions,
            "aliases" => Self::Aliases,
            "operated_properties" | "properties" => Self::OperatedProperties,
            "industry" | "category" => Self::Industry,
            "business_model" => Self::BusinessModel,
            _ => return None,
        };
        Some(section)
    }
}

/// Build the typed context for `company_id`.
///
/// A company with no knowledge items yields a context with empty
/// sections; only a missing company record is an error.
#[instrument(skip(source))]
pub async fn build_context(
    source: &dyn KnowledgeSource,
    company_id: &str,
) -> Result<CompanyContext> {
    let company = source
        .get_company(company_id)
        .await?
        .ok_or_else(|| AivisError::not_found(format!("company {company_id}")))?;
    let items = source.list_knowledge_items(company_id).await?;

    let mut context = CompanyContext {
        company_id: company.id,
        name: company.name.trim().to_string(),
        domain: normalize_domain(&company.domain),
        aliases: company.aliases,
        industry: company.industry,
        business_model: company.business_model,
        ..CompanyContext::default()
    };

    for item in &items {
        fold_item(&mut context, item);
    }
    dedupe_sections(&mut context);
    context.richness_score = richness_score(&context);

    info!(
        company = %context.name,
        items = items.len(),
        competitors = context.competitors.len(),
        richness = context.richness_score,
        "company context built"
    );
    Ok(context)
}

fn fold_item(context: &mut CompanyContext, item: &KnowledgeItem) {
    let Some(section) = Section::from_category(&item.category) else {
        debug!(category = %item.category, item = %item.id, "ignoring unknown knowledge category");
        return;
    };

    match section {
        Section::Competitors => context.competitors.extend(competitors(&item.content)),
        Section::Industry => {
            if context.industry.is_none() {
                context.industry = texts(&item.content).into_iter().next();
            }
        }
        Section::BusinessModel => {
            if context.business_model.is_none() {
                context.business_model = texts(&item.content).into_iter().next();
            }
        }
        Section::OperatedProperties => context.operated_properties.extend(
            texts(&item.content)
                .iter()
                .map(|site| normalize_site(site))
                .filter(|site| !site.is_empty()),
        ),
        Section::Overview => context.overview.extend(texts(&item.content)),
        Section::Positioning => context.positioning.extend(texts(&item.content)),
        Section::PainPoints => context.pain_points.extend(texts(&item.content)),
        Section::ProductFeatures => context.product_features.extend(texts(&item.content)),
        Section::UseCases => context.use_cases.extend(texts(&item.content)),
        Section::BrandVoice => context.brand_voice.extend(texts(&item.content)),
        Section::Personas => context.personas.extend(texts(&item.content)),
        Section::Keywords => context.keywords.extend(texts(&item.content)),
        Section::ValuePropositions => context.value_propositions.extend(texts(&item.content)),
        Section::Aliases => context.aliases.extend(texts(&item.content)),
    }
}

/// Flatten a loose JSON value into trimmed, non-empty strings.
fn texts(value: &Value) -> Vec<String> {
    match value {
        Value::String(s) => {
            let s = s.trim();
            if s.is_empty() {
                Vec::new()
            } else {
                vec![s.to_string()]
            }
        }
        Value::Array(values) => values.iter().flat_map(texts).collect(),
        Value::Object(map) => {
            if let Some(items) = map.get("items") {
                return texts(items);
            }
            TEXT_KEYS
                .iter()
                .find_map(|key| map.get(*key).filter(|v| v.is_string()))
                .map(texts)
                .unwrap_or_default()
        }
        Value::Number(n) => vec![n.to_string()],
        Value::Bool(_) | Value::Null => Vec::new(),
    }
}

/// Competitors come as bare names, bare domains, `{name, domain}` objects,
/// or lists of any of those.
fn competitors(value: &Value) -> Vec<Competitor> {
    match value {
        Value::String(s) => competitor_from_str(s).into_iter().collect(),
        Value::Array(values) => values.iter().flat_map(competitors).collect(),
        Value::Object(map) => {
            if let Some(items) = map.get("items") {
                return competitors(items);
            }
            let domain = ["domain", "website", "url"]
                .iter()
                .find_map(|key| map.get(*key).and_then(Value::as_str))
                .map(normalize_domain)
                .filter(|d| !d.is_empty());
            let name = map
                .get("name")
                .and_then(Value::as_str)
                .map(str::trim)
                .filter(|n| !n.is_empty())
                .map(str::to_string)
                .or_else(|| domain.clone());
            name.map(|name| Competitor { name, domain })
                .into_iter()
                .collect()
        }
        _ => Vec::new(),
    }
}

fn competitor_from_str(raw: &str) -> Option<Competitor> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }
    let looks_like_domain = !raw.contains(char::is_whitespace) && raw.contains('.');
    let domain = looks_like_domain
        .then(|| normalize_domain(raw))
        .filter(|d| !d.is_empty());
    let name = domain.clone().unwrap_or_else(|| raw.to_string());
    Some(Competitor { name, domain })
}

fn dedupe_sections(context: &mut CompanyContext) {
    for list in [
        &mut context.aliases,
        &mut context.overview,
        &mut context.positioning,
        &mut context.pain_points,
        &mut context.product_features,
        &mut context.use_cases,
        &mut context.brand_voice,
        &mut context.operated_properties,
        &mut context.personas,
        &mut context.keywords,
        &mut context.value_propositions,
    ] {
        dedupe_case_insensitive(list);
    }

    let mut seen = HashSet::new();
    context
        .competitors
        .retain(|c| seen.insert(c.name.to_lowercase()));

    // An alias equal to the primary name adds nothing to mention matching.
    let name = context.name.to_lowercase();
    context.aliases.retain(|a| a.to_lowercase() != name);
}

fn dedupe_case_insensitive(list: &mut Vec<String>) {
    let mut seen = HashSet::new();
    list.retain(|item| seen.insert(item.to_lowercase()));
}

/// Diagnostic completeness score in `0..=100`.
///
/// Each section contributes `weight * items`, up to its own cap.
pub fn richness_score(context: &CompanyContext) -> u32 {
    let weighted = [
        (context.competitors.len(), 8, 32),
        (context.positioning.len(), 6, 18),
        (context.value_propositions.len(), 5, 15),
        (context.overview.len(), 5, 10),
        (context.product_features.len(), 4, 16),
        (context.use_cases.len(), 4, 16),
        (context.pain_points.len(), 4, 12),
        (context.personas.len(), 3, 9),
        (context.keywords.len(), 1, 5),
        (context.brand_voice.len(), 1, 3),
    ];
    let total: usize = weighted
        .iter()
        .map(|&(count, weight, cap)| (count * weight).min(cap))
        .sum();
    total.min(100) as u32
}
