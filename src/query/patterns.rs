//! Rule-based slot extraction.
//!
//! Patterns are compiled once and applied to the lowercased question. Every extractor is
//! optional: a question that matches nothing yields an empty slot map.

use super::{EntityValue, Slot};
use crate::text::parse_amount;
use regex::Regex;
use std::collections::BTreeMap;
use std::sync::LazyLock;

static AGE: LazyLock<Regex> = LazyLock::new(|| {
    compile(
        r"\b(\d{1,3})\s*-?\s*(?:years?|yrs?|y)\s*-?\s*old\b|\b(\d{1,3})\s*[mf]\b|\baged?\s+(\d{1,3})\b",
    )
});
static MALE: LazyLock<Regex> = LazyLock::new(|| compile(r"\b(?:male|man|men)\b|\b\d{1,3}\s*m\b"));
static FEMALE: LazyLock<Regex> =
    LazyLock::new(|| compile(r"\b(?:female|woman|women)\b|\b\d{1,3}\s*f\b"));
static POLICY_DURATION: LazyLock<Regex> = LazyLock::new(|| {
    compile(r"\b(\d+)\s*-?\s*(month|mon|year|yr)s?\s*-?\s*(?:old\s+)?(?:policy|cover)")
});
static AMOUNT: LazyLock<Regex> = LazyLock::new(|| {
    compile(
        r"(?:\brs\.?|\binr|₹|\$|\busd)\s*\d[\d,]*(?:\.\d+)?|\b\d[\d,]*(?:\.\d+)?\s*(?:rupees?|inr\b|dollars?)",
    )
});
static TIME_WINDOW: LazyLock<Regex> = LazyLock::new(|| {
    compile(
        r"\b(?:within|after|before|for|in|of)\s+((?:\d+|one|two|three|four|five|six|seven|ten|twelve|fifteen|thirty|sixty|ninety)\s*(?:days?|weeks?|months?|years?))\b",
    )
});
static QUESTION_HEAD: LazyLock<Regex> = LazyLock::new(|| {
    compile(
        r"^(?:what|which|how much|how many|how long)\s+(?:is|are|was|were|will be|would be)?\s*(?:the\s+|a\s+|an\s+)?(.+)$",
    )
});
static COVERAGE_QUESTION: LazyLock<Regex> = LazyLock::new(|| {
    compile(
        r"^(?:does|do|will|would|can|is|are)\s+(.+?)\s+(?:cover|covers|include|includes|allow|allows|pay for|reimburse)\s+(.+)$",
    )
});
static COVERED_QUESTION: LazyLock<Regex> = LazyLock::new(|| {
    compile(r"^(?:is|are)\s+(.+?)\s+(?:covered|included|excluded|payable|allowed)\b(.*)$")
});
static CONDITION_SPLIT: LazyLock<Regex> = LazyLock::new(|| {
    compile(r"\s+\b(for|under|if|when|during|after|before|within|in case of|in)\b\s+")
});

const PROCEDURES: &[&str] = &[
    "knee surgery",
    "heart surgery",
    "brain surgery",
    "eye surgery",
    "cataract surgery",
    "bariatric surgery",
    "organ donor",
    "chemotherapy",
    "dialysis",
    "transplant",
    "maternity",
    "cataract",
    "dental",
    "physiotherapy",
    "ayush",
    "radiation",
    "surgery",
    "operation",
    "treatment",
    "therapy",
];

const LOCATIONS: &[&str] = &[
    "navi mumbai",
    "mumbai",
    "delhi",
    "bangalore",
    "bengaluru",
    "hyderabad",
    "chennai",
    "kolkata",
    "pune",
    "ahmedabad",
    "jaipur",
    "lucknow",
    "nagpur",
    "indore",
    "bhopal",
    "patna",
    "chandigarh",
    "kochi",
];

// Patterns are literals; a failure here is a programming error caught by the tests below.
fn compile(pattern: &str) -> Regex {
    Regex::new(pattern).unwrap_or_else(|error| panic!("invalid pattern {pattern}: {error}"))
}

/// Extract slots from `question` using fixed patterns.
pub fn extract(question: &str) -> BTreeMap<Slot, EntityValue> {
    let lower = question.to_lowercase();
    let lower = lower.trim();
    let mut slots = BTreeMap::new();

    if let Some(age) = AGE.captures(lower).and_then(|caps| {
        caps.iter()
            .skip(1)
            .flatten()
            .find_map(|m| m.as_str().parse::<u32>().ok())
    }) {
        slots.insert(Slot::Age, EntityValue::Number(f64::from(age)));
    }

    if FEMALE.is_match(lower) {
        slots.insert(Slot::Gender, EntityValue::Text("female".into()));
    } else if MALE.is_match(lower) {
        slots.insert(Slot::Gender, EntityValue::Text("male".into()));
    }

    if let Some(location) = LOCATIONS.iter().find(|city| contains_phrase(lower, city)) {
        slots.insert(Slot::Location, EntityValue::Text(title_case(location)));
    }

    if let Some(caps) = POLICY_DURATION.captures(lower) {
        let count = caps.get(1).map_or("", |m| m.as_str());
        let unit = match caps.get(2).map(|m| m.as_str()) {
            Some("mon") | Some("month") => "month",
            _ => "year",
        };
        let plural = if count == "1" { "" } else { "s" };
        slots.insert(
            Slot::PolicyDuration,
            EntityValue::Text(format!("{count} {unit}{plural}")),
        );
    }

    if let Some(procedure) = PROCEDURES.iter().find(|p| contains_phrase(lower, p)) {
        slots.insert(Slot::Procedure, EntityValue::Text((*procedure).to_string()));
    }

    if let Some(amount) = AMOUNT
        .find(lower)
        .and_then(|m| parse_amount(m.as_str()))
    {
        slots.insert(Slot::Amount, EntityValue::Number(amount));
    }

    if let Some(window) = TIME_WINDOW.captures(lower).and_then(|caps| caps.get(1)) {
        slots.insert(Slot::TimeWindow, EntityValue::Text(window.as_str().to_string()));
    }

    extract_intent(lower, &mut slots);
    slots
}

/// Subject, requested fact, and condition from the question's grammatical shape.
fn extract_intent(lower: &str, slots: &mut BTreeMap<Slot, EntityValue>) {
    let sentence = lower.trim_end_matches(['?', '.', '!', ' ']);

    if let Some(caps) = COVERAGE_QUESTION.captures(sentence) {
        insert_text(slots, Slot::Subject, caps.get(1).map(|m| m.as_str()));
        let (fact, condition) = split_condition(caps.get(2).map_or("", |m| m.as_str()));
        insert_text(slots, Slot::RequestedFact, Some(fact));
        insert_text(slots, Slot::Condition, condition);
        return;
    }

    if let Some(caps) = COVERED_QUESTION.captures(sentence) {
        let (subject, condition) = split_condition(caps.get(1).map_or("", |m| m.as_str()));
        insert_text(slots, Slot::Subject, Some(subject));
        insert_text(slots, Slot::RequestedFact, Some("coverage"));
        let tail = caps.get(2).map(|m| m.as_str().trim());
        insert_text(slots, Slot::Condition, condition.or(tail));
        return;
    }

    if let Some(caps) = QUESTION_HEAD.captures(sentence) {
        let (fact, condition) = split_condition(caps.get(1).map_or("", |m| m.as_str()));
        insert_text(slots, Slot::RequestedFact, Some(fact));
        insert_text(slots, Slot::Condition, condition);
    }
}

/// Split `phrase` at the first condition marker, keeping the marker with the condition.
fn split_condition(phrase: &str) -> (&str, Option<&str>) {
    match CONDITION_SPLIT.find(phrase) {
        Some(marker) => (
            phrase[..marker.start()].trim(),
            Some(phrase[marker.start()..].trim()),
        ),
        None => (phrase.trim(), None),
    }
}

fn insert_text(slots: &mut BTreeMap<Slot, EntityValue>, slot: Slot, value: Option<&str>) {
    let Some(value) = value.map(str::trim).filter(|v| !v.is_empty()) else {
        return;
    };
    let value = value
        .strip_prefix("the ")
        .or_else(|| value.strip_prefix("a "))
        .or_else(|| value.strip_prefix("an "))
        .unwrap_or(value);
    if !value.is_empty() {
        slots.entry(slot).or_insert_with(|| EntityValue::Text(value.to_string()));
    }
}

fn contains_phrase(haystack: &str, phrase: &str) -> bool {
    haystack.match_indices(phrase).any(|(start, _)| {
        let before = haystack[..start].chars().next_back();
        let after = haystack[start + phrase.len()..].chars().next();
        !before.is_some_and(char::is_alphanumeric) && !after.is_some_and(char::is_alphanumeric)
    })
}

fn title_case(value: &str) -> String {
    value
        .split(' ')
        .map(|word| {
            let mut chars = word.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().chain(chars).collect(),
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn text(slots: &BTreeMap<Slot, EntityValue>, slot: Slot) -> Option<String> {
        slots.get(&slot).map(|value| value.to_string())
    }

    #[test]
    fn all_patterns_compile() {
        for pattern in [
            &AGE,
            &MALE,
            &FEMALE,
            &POLICY_DURATION,
            &AMOUNT,
            &TIME_WINDOW,
            &QUESTION_HEAD,
            &COVERAGE_QUESTION,
            &COVERED_QUESTION,
            &CONDITION_SPLIT,
        ] {
            LazyLock::force(pattern);
        }
    }

    #[test]
    fn claim_style_question_yields_demographics() {
        let slots = extract("46-year-old male, knee surgery in Pune, 3-month-old policy");
        assert_eq!(slots.get(&Slot::Age), Some(&EntityValue::Number(46.0)));
        assert_eq!(text(&slots, Slot::Gender).as_deref(), Some("male"));
        assert_eq!(text(&slots, Slot::Procedure).as_deref(), Some("knee surgery"));
        assert_eq!(text(&slots, Slot::Location).as_deref(), Some("Pune"));
        assert_eq!(text(&slots, Slot::PolicyDuration).as_deref(), Some("3 months"));
    }

    #[test]
    fn compact_age_gender_notation() {
        let slots = extract("35F, cataract surgery, claim of Rs. 1,20,000");
        assert_eq!(slots.get(&Slot::Age), Some(&EntityValue::Number(35.0)));
        assert_eq!(text(&slots, Slot::Gender).as_deref(), Some("female"));
        assert_eq!(slots.get(&Slot::Amount), Some(&EntityValue::Number(120_000.0)));
    }

    #[test]
    fn what_question_yields_requested_fact_and_condition() {
        let slots = extract("What is the grace period for premium payment?");
        assert_eq!(text(&slots, Slot::RequestedFact).as_deref(), Some("grace period"));
        assert_eq!(
            text(&slots, Slot::Condition).as_deref(),
            Some("for premium payment")
        );
    }

    #[test]
    fn coverage_question_yields_subject() {
        let slots = extract("Does this policy cover maternity expenses?");
        assert_eq!(text(&slots, Slot::Subject).as_deref(), Some("this policy"));
        assert_eq!(
            text(&slots, Slot::RequestedFact).as_deref(),
            Some("maternity expenses")
        );
        assert_eq!(text(&slots, Slot::Procedure).as_deref(), Some("maternity"));
    }

    #[test]
    fn time_windows_are_captured() {
        let slots = extract("Can I claim within 30 days of discharge?");
        assert_eq!(text(&slots, Slot::TimeWindow).as_deref(), Some("30 days"));
    }

    #[test]
    fn free_text_without_structure_yields_nothing() {
        assert!(extract("grace").is_empty());
        assert!(extract("").is_empty());
        assert!(extract("?!?!{{}}\u{0}").is_empty());
    }
}
