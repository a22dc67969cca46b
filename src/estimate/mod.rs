//! Deterministic resale estimate from listing text and price.
//!
//! Nothing here performs I/O: identical input always produces an identical
//! [`EstimationResult`]. The tables live in [`tables`].

pub mod tables;

use crate::models::Confidence;
use crate::normalize::{StandardCondition, normalize_condition};
use once_cell::sync::Lazy;
use regex::{Regex, RegexBuilder};
use serde::{Deserialize, Serialize};
use tables::{
    CATEGORIES, CategoryProfile, FIRM_PATTERN, GENERIC_CATEGORY, NEGOTIABLE_PATTERN,
    PICKUP_ONLY_PATTERN, QUERY_MAX_CHARS, QUERY_MAX_WORDS, RISK_PATTERNS, STOP_WORDS,
    VALUE_PATTERNS, condition_multiplier,
};

/// Marketplace fee taken from resale proceeds.
pub const MARKETPLACE_FEE_RATE: f64 = 0.13;
/// Profit below this caps the score at [`SMALL_PROFIT_SCORE_CAP`].
pub const SMALL_PROFIT_THRESHOLD: f64 = 25.0;
const SMALL_PROFIT_SCORE_CAP: f64 = 30.0;
const NEGATIVE_PROFIT_SCORE_CAP: f64 = 10.0;
const MARGIN_SCORE_WEIGHT: f64 = 0.75;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ResaleDifficulty {
    VeryEasy = 1,
    Easy = 2,
    Moderate = 3,
    Hard = 4,
    VeryHard = 5,
}

impl ResaleDifficulty {
    pub fn level(self) -> i32 {
        self as i32
    }

    pub fn from_level(level: i32) -> Self {
        match level.clamp(1, 5) {
            1 => ResaleDifficulty::VeryEasy,
            2 => ResaleDifficulty::Easy,
            3 => ResaleDifficulty::Moderate,
            4 => ResaleDifficulty::Hard,
            _ => ResaleDifficulty::VeryHard,
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct EstimateInput<'a> {
    pub title: &'a str,
    pub description: &'a str,
    pub asking_price: f64,
    pub condition: Option<&'a str>,
    pub category: Option<&'a str>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ComparableLink {
    pub label: String,
    pub url: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EstimationResult {
    pub category: String,
    pub condition: StandardCondition,
    pub estimated_low: f64,
    pub estimated_high: f64,
    pub estimated_value: f64,
    pub profit_low: f64,
    pub profit_high: f64,
    pub value_score: u8,
    pub discount_percent: i32,
    pub resale_difficulty: ResaleDifficulty,
    pub confidence: Confidence,
    pub reasoning: String,
    pub notes: Vec<String>,
    pub search_query: String,
    pub comparables: Vec<ComparableLink>,
    pub shippable: bool,
    pub negotiable: bool,
    pub tags: Vec<String>,
}

struct KeywordRule {
    pattern: Regex,
    factor: f64,
    tag: &'static str,
}

fn case_insensitive(pattern: &str) -> Option<Regex> {
    RegexBuilder::new(pattern).case_insensitive(true).build().ok()
}

fn compile_rules(table: &[(&str, f64, &'static str)]) -> Vec<KeywordRule> {
    table
        .iter()
        .filter_map(|(pattern, factor, tag)| {
            case_insensitive(pattern).map(|pattern| KeywordRule {
                pattern,
                factor: *factor,
                tag,
            })
        })
        .collect()
}

static VALUE_RULES: Lazy<Vec<KeywordRule>> = Lazy::new(|| compile_rules(&VALUE_PATTERNS));
static RISK_RULES: Lazy<Vec<KeywordRule>> = Lazy::new(|| compile_rules(&RISK_PATTERNS));
static NEGOTIABLE: Lazy<Option<Regex>> = Lazy::new(|| case_insensitive(NEGOTIABLE_PATTERN));
static FIRM: Lazy<Option<Regex>> = Lazy::new(|| case_insensitive(FIRM_PATTERN));
static PICKUP_ONLY: Lazy<Option<Regex>> = Lazy::new(|| case_insensitive(PICKUP_ONLY_PATTERN));
static CATEGORY_KEYWORDS: Lazy<Vec<(Vec<Regex>, &'static CategoryProfile)>> = Lazy::new(|| {
    CATEGORIES
        .iter()
        .map(|profile| {
            let patterns = profile
                .keywords
                .iter()
                .filter_map(|kw| case_insensitive(&format!(r"\b{}\b", regex::escape(kw))))
                .collect();
            (patterns, profile)
        })
        .collect()
});

fn matches(pattern: &Option<Regex>, text: &str) -> bool {
    pattern.as_ref().is_some_and(|re| re.is_match(text))
}

/// Category from an explicit hint, else from title/description keywords,
/// else the generic profile.
pub fn resolve_category(hint: Option<&str>, title: &str, description: &str) -> &'static CategoryProfile {
    if let Some(hint) = hint.map(|h| h.trim().to_lowercase()).filter(|h| !h.is_empty())
        && let Some(profile) = CATEGORIES
            .iter()
            .find(|profile| profile.key == hint || profile.aliases.contains(&hint.as_str()))
    {
        return profile;
    }
    detect_category(title, description).unwrap_or(&GENERIC_CATEGORY)
}

pub fn detect_category(title: &str, description: &str) -> Option<&'static CategoryProfile> {
    let text = format!("{title} {description}");
    CATEGORY_KEYWORDS
        .iter()
        .find(|(patterns, _)| patterns.iter().any(|re| re.is_match(&text)))
        .map(|(_, profile)| *profile)
}

pub fn estimate(input: &EstimateInput<'_>) -> EstimationResult {
    let category = resolve_category(input.category, input.title, input.description);
    let condition = input
        .condition
        .map(normalize_condition)
        .unwrap_or(StandardCondition::Good);
    let condition_factor = condition_multiplier(condition);
    let text = format!("{} {}", input.title, input.description);
    let asking = input.asking_price.max(0.0);

    let mut tags: Vec<String> = Vec::new();
    let mut notes: Vec<String> = Vec::new();

    let mut boost = 1.0;
    let mut value_hits = 0;
    for rule in VALUE_RULES.iter().filter(|rule| rule.pattern.is_match(&text)) {
        boost *= rule.factor;
        value_hits += 1;
        tags.push(rule.tag.to_string());
        notes.push(format!(
            "Value signal `{}` (+{:.0}%)",
            rule.tag,
            (rule.factor - 1.0) * 100.0
        ));
    }

    let mut penalty = 1.0;
    let mut risk_hits = 0;
    for rule in RISK_RULES.iter().filter(|rule| rule.pattern.is_match(&text)) {
        penalty *= rule.factor;
        risk_hits += 1;
        tags.push(rule.tag.to_string());
        notes.push(format!(
            "Risk `{}` (-{:.0}%)",
            rule.tag,
            (1.0 - rule.factor) * 100.0
        ));
    }

    let negotiable = matches(&NEGOTIABLE, &text) && !matches(&FIRM, &text);
    let shippable = !matches(&PICKUP_ONLY, &text);
    if negotiable {
        tags.push("negotiable".into());
        notes.push("Seller signals the price is negotiable".into());
    }
    if !shippable {
        tags.push("local_pickup".into());
        notes.push("Local pickup only; resale limited to nearby buyers".into());
    }

    let factor = condition_factor * boost * penalty;
    let estimated_low = round_cents(asking * category.low_multiplier * factor);
    let estimated_high = round_cents(asking * category.high_multiplier * factor);
    let estimated_value = round_cents((estimated_low + estimated_high) / 2.0);

    let discount_percent = if estimated_value > 0.0 {
        ((estimated_value - asking) / estimated_value * 100.0).round() as i32
    } else {
        0
    };

    let net = 1.0 - MARKETPLACE_FEE_RATE;
    let profit_low = round_cents(estimated_low * net - asking);
    let profit_high = round_cents(estimated_high * net - asking);
    let profit_mid = (profit_low + profit_high) / 2.0;
    notes.push(format!(
        "Profit after {:.0}% fees: ${profit_low:.2} to ${profit_high:.2}",
        MARKETPLACE_FEE_RATE * 100.0
    ));

    let value_score = score(profit_mid, asking);

    let mut difficulty = category.base_difficulty.level() + risk_hits;
    if value_hits > 0 {
        difficulty -= 1;
    }
    let resale_difficulty = ResaleDifficulty::from_level(difficulty);

    let confidence = if risk_hits > 0 {
        Confidence::Low
    } else if value_hits > 0 {
        Confidence::High
    } else {
        Confidence::Medium
    };

    let reasoning = format!(
        "{} typically resells at {:.1}x to {:.1}x asking; condition {} applies {:.2}x; keyword adjustments {:.2}x.",
        category.label,
        category.low_multiplier,
        category.high_multiplier,
        condition.as_str(),
        condition_factor,
        boost * penalty,
    );

    let search_query = search_query(input.title);
    let comparables = comparable_links(&search_query);

    EstimationResult {
        category: category.key.to_string(),
        condition,
        estimated_low,
        estimated_high,
        estimated_value,
        profit_low,
        profit_high,
        value_score,
        discount_percent,
        resale_difficulty,
        confidence,
        reasoning,
        notes,
        search_query,
        comparables,
        shippable,
        negotiable,
        tags,
    }
}

fn score(profit_mid: f64, asking: f64) -> u8 {
    let margin_pct = if asking > 0.0 {
        profit_mid / asking * 100.0
    } else {
        0.0
    };
    let mut score = (margin_pct * MARGIN_SCORE_WEIGHT).clamp(0.0, 100.0);
    if profit_mid >= 250.0 {
        score += 20.0;
    } else if profit_mid >= 100.0 {
        score += 10.0;
    }
    score = score.min(100.0);
    if profit_mid < 0.0 {
        score = score.min(NEGATIVE_PROFIT_SCORE_CAP);
    } else if profit_mid < SMALL_PROFIT_THRESHOLD {
        score = score.min(SMALL_PROFIT_SCORE_CAP);
    }
    score.round() as u8
}

/// Lowercased title with punctuation and stop words removed, capped in
/// words and characters.
pub fn search_query(title: &str) -> String {
    let cleaned: String = title
        .to_lowercase()
        .chars()
        .map(|c| if c.is_alphanumeric() { c } else { ' ' })
        .collect();
    let mut query = cleaned
        .split_whitespace()
        .filter(|word| !STOP_WORDS.contains(word))
        .take(QUERY_MAX_WORDS)
        .collect::<Vec<_>>()
        .join(" ");
    if query.chars().count() > QUERY_MAX_CHARS {
        query = query.chars().take(QUERY_MAX_CHARS).collect::<String>().trim_end().to_string();
    }
    query
}

pub fn comparable_links(query: &str) -> Vec<ComparableLink> {
    let encoded = urlencoding::encode(query);
    vec![
        ComparableLink {
            label: "eBay sold listings".into(),
            url: format!(
                "https://www.ebay.com/sch/i.html?_nkw={encoded}&LH_Sold=1&LH_Complete=1"
            ),
        },
        ComparableLink {
            label: "eBay active listings".into(),
            url: format!("https://www.ebay.com/sch/i.html?_nkw={encoded}"),
        },
        ComparableLink {
            label: "Mercari search".into(),
            url: format!("https://www.mercari.com/search/?keyword={encoded}"),
        },
    ]
}

fn round_cents(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}
