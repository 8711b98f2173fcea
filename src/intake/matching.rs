//! Text matching primitives for matter resolution.
//!
//! All comparisons run on `normalize_party_name` output: lowercase ASCII
//! alphanumerics separated by single spaces, so word boundaries are spaces.

use std::sync::LazyLock;

use aho_corasick::{AhoCorasick, AhoCorasickBuilder, MatchKind};
use regex::Regex;

use crate::config::MatchingConfig;
use crate::db::{Confidence, MatterRecord, normalize_party_name};

/// Case numbers: 6-12 digits, optionally split by single dashes or spaces
/// between digit groups (`23-1900123`, `2301 00123`). A spaced dash
/// (`251900456 - 3 documents`) ends the number. Years and short reference
/// numbers are too short to qualify.
static CASE_NUMBER: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"\b(\d+)((?:[- ]\d+)*)\b").ok());

static EMAIL_ADDRESS: LazyLock<Option<Regex>> = LazyLock::new(|| {
    Regex::new(r"(?i)[a-z0-9._%+\-]+@[a-z0-9.\-]+\.[a-z]{2,}").ok()
});

/// Keyword hints for the document type, most specific first.
const DOCUMENT_HINTS: &[(&str, &str)] = &[
    ("plea agreement", "plea_agreement"),
    ("statement in advance of plea", "plea_agreement"),
    ("presentence", "sentencing"),
    ("sentencing", "sentencing"),
    ("interrogatories", "discovery"),
    ("requests for production", "discovery"),
    ("requests for admission", "discovery"),
    ("deposition", "discovery"),
    ("subpoena", "discovery"),
    ("exhibit", "exhibit"),
    ("invoice", "invoice"),
    ("statement of account", "invoice"),
    ("retainer", "invoice"),
    ("notice of hearing", "notice_of_hearing"),
    ("minute entry", "order"),
    ("order", "order"),
    ("judgment", "judgment"),
    ("notice of appeal", "notice_of_appeal"),
    ("brief", "brief"),
    ("memorandum", "motion"),
    ("motion", "motion"),
    ("complaint", "pleading"),
    ("answer", "pleading"),
    ("summons", "pleading"),
    ("letter", "correspondence"),
];

static DOCUMENT_MATCHER: LazyLock<Option<AhoCorasick>> = LazyLock::new(|| {
    AhoCorasickBuilder::new()
        .ascii_case_insensitive(true)
        .match_kind(MatchKind::Standard)
        .build(DOCUMENT_HINTS.iter().map(|(needle, _)| *needle))
        .ok()
});

/// Word-bounded containment on normalized text.
pub fn contains_term_with_boundaries(haystack: &str, term: &str) -> bool {
    if term.is_empty() {
        return false;
    }

    let mut offset = 0usize;
    while let Some(rel_pos) = haystack[offset..].find(term) {
        let start = offset + rel_pos;
        let end = start + term.len();
        let before_ok = start == 0 || haystack.as_bytes()[start - 1] == b' ';
        let after_ok = end == haystack.len() || haystack.as_bytes()[end] == b' ';
        if before_ok && after_ok {
            return true;
        }
        offset = start + 1;
    }

    false
}

/// Candidate case numbers in `text`, as digit strings.
pub fn case_number_candidates(text: &str) -> Vec<String> {
    let Some(re) = CASE_NUMBER.as_ref() else {
        return Vec::new();
    };
    let mut out: Vec<String> = Vec::new();
    for caps in re.captures_iter(text) {
        let Some(whole) = caps.get(0) else {
            continue;
        };
        // The grouped form first, then the leading run on its own in case
        // the trailing group was a count or page number.
        let mut forms = vec![crate::db::normalize_case_number(whole.as_str())];
        if caps.get(2).is_some_and(|rest| !rest.as_str().is_empty())
            && let Some(lead) = caps.get(1)
        {
            forms.push(lead.as_str().to_string());
        }
        for digits in forms {
            if (6..=12).contains(&digits.len()) && !out.contains(&digits) {
                out.push(digits);
            }
        }
    }
    out
}

/// Lowercased addresses embedded in `text`.
pub fn embedded_addresses(text: &str) -> Vec<String> {
    let Some(re) = EMAIL_ADDRESS.as_ref() else {
        return Vec::new();
    };
    let mut out: Vec<String> = Vec::new();
    for m in re.find_iter(text) {
        let address = m.as_str().trim_end_matches('.').to_ascii_lowercase();
        if !out.contains(&address) {
            out.push(address);
        }
    }
    out
}

/// Best document-type hint from keywords in `text`.
pub fn document_type_hint(text: &str) -> Option<&'static str> {
    let matcher = DOCUMENT_MATCHER.as_ref()?;
    matcher
        .find_overlapping_iter(text)
        .map(|hit| hit.pattern().as_usize())
        .min()
        .map(|idx| DOCUMENT_HINTS[idx].1)
}

/// Classic edit distance over chars.
pub fn levenshtein(a: &str, b: &str) -> usize {
    let b_chars: Vec<char> = b.chars().collect();
    let mut prev: Vec<usize> = (0..=b_chars.len()).collect();
    let mut curr = vec![0; b_chars.len() + 1];

    for (i, ca) in a.chars().enumerate() {
        curr[0] = i + 1;
        for (j, cb) in b_chars.iter().enumerate() {
            let cost = usize::from(ca != *cb);
            curr[j + 1] = (prev[j + 1] + 1).min(curr[j] + 1).min(prev[j] + cost);
        }
        std::mem::swap(&mut prev, &mut curr);
    }
    prev[b_chars.len()]
}

/// One matter picked by name matching.
#[derive(Debug, Clone)]
pub struct NameMatch<'a> {
    pub matter: &'a MatterRecord,
    pub confidence: Confidence,
}

fn unique<'a>(hits: Vec<&'a MatterRecord>) -> Option<&'a MatterRecord> {
    match hits.as_slice() {
        [only] => Some(*only),
        _ => None,
    }
}

/// Match matter client names in `text`: full name (high), then first and
/// last name as separate words (medium), then a sufficiently long last name
/// alone (low). A level that matches more than one matter is skipped.
pub fn match_party_name<'a>(
    text: &str,
    matters: &'a [MatterRecord],
    config: &MatchingConfig,
) -> Option<NameMatch<'a>> {
    let haystack = normalize_party_name(text);
    if haystack.is_empty() {
        return None;
    }
    let names: Vec<(&MatterRecord, String)> = matters
        .iter()
        .map(|m| (m, normalize_party_name(&m.client_name)))
        .filter(|(_, name)| !name.is_empty())
        .collect();

    let full: Vec<&MatterRecord> = names
        .iter()
        .filter(|(_, name)| name.contains(' ') && contains_term_with_boundaries(&haystack, name))
        .map(|(m, _)| *m)
        .collect();
    if let Some(matter) = unique(full) {
        return Some(NameMatch {
            matter,
            confidence: Confidence::High,
        });
    }

    let first_last: Vec<&MatterRecord> = names
        .iter()
        .filter_map(|(m, name)| {
            let tokens: Vec<&str> = name.split(' ').collect();
            match tokens.as_slice() {
                [first, .., last] => (contains_term_with_boundaries(&haystack, first)
                    && contains_term_with_boundaries(&haystack, last))
                .then_some(*m),
                _ => None,
            }
        })
        .collect();
    if let Some(matter) = unique(first_last) {
        return Some(NameMatch {
            matter,
            confidence: Confidence::Medium,
        });
    }

    let last_only: Vec<&MatterRecord> = names
        .iter()
        .filter_map(|(m, name)| {
            let last = name.rsplit(' ').next()?;
            (last.len() >= config.min_last_name_len
                && contains_term_with_boundaries(&haystack, last))
            .then_some(*m)
        })
        .collect();
    unique(last_only).map(|matter| NameMatch {
        matter,
        confidence: Confidence::Low,
    })
}

/// Matters whose client name has a fragment (token of at least
/// `min_fragment_len` chars) in `text`.
pub fn matters_with_name_fragment<'a>(
    text: &str,
    matters: &'a [MatterRecord],
    config: &MatchingConfig,
) -> Vec<&'a MatterRecord> {
    let haystack = normalize_party_name(text);
    matters
        .iter()
        .filter(|m| {
            normalize_party_name(&m.client_name)
                .split(' ')
                .filter(|token| token.len() >= config.min_fragment_len)
                .any(|token| contains_term_with_boundaries(&haystack, token))
        })
        .collect()
}

/// Verify a model-proposed matter name against the roster: matter id, exact
/// normalized name, or a unique name within the edit-distance cutoff.
pub fn verify_matter_name<'a>(
    proposed: &str,
    matters: &'a [MatterRecord],
    config: &MatchingConfig,
) -> Option<&'a MatterRecord> {
    let wanted = normalize_party_name(proposed);
    if wanted.is_empty() {
        return None;
    }
    if let Some(by_id) = matters
        .iter()
        .find(|m| m.matter_id.eq_ignore_ascii_case(proposed.trim()))
    {
        return Some(by_id);
    }
    if let Some(exact) = matters
        .iter()
        .find(|m| normalize_party_name(&m.client_name) == wanted)
    {
        return Some(exact);
    }

    let mut best: Option<(usize, &MatterRecord)> = None;
    let mut tied = false;
    for matter in matters {
        let distance = levenshtein(&normalize_party_name(&matter.client_name), &wanted);
        if distance > config.max_edit_distance {
            continue;
        }
        match best {
            Some((best_distance, _)) if distance > best_distance => {}
            Some((best_distance, _)) if distance == best_distance => tied = true,
            _ => {
                best = Some((distance, matter));
                tied = false;
            }
        }
    }
    if tied { None } else { best.map(|(_, m)| m) }
}

/// Plausible person or entity name: at least two alphabetic tokens.
pub fn is_plausible_party_name(raw: &str) -> bool {
    normalize_party_name(raw)
        .split(' ')
        .filter(|token| token.len() >= 2 && token.chars().all(|c| c.is_ascii_alphabetic()))
        .count()
        >= 2
}

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use super::*;
    use crate::db::{MatterStatus, ProceduralTrack};

    fn matter(id: &str, name: &str) -> MatterRecord {
        MatterRecord {
            matter_id: id.to_string(),
            client_name: name.to_string(),
            track: ProceduralTrack::Civil,
            status: MatterStatus::Active,
            case_number: None,
            counterpart_name: None,
            counterpart_emails: Vec::new(),
            forum: None,
            storage_root: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    fn roster() -> Vec<MatterRecord> {
        vec![
            matter("doe", "Jane Doe"),
            matter("hernandez", "Maria Elena Hernandez"),
            matter("li", "Wei Li"),
        ]
    }

    #[test]
    fn boundaries_reject_partial_words() {
        assert!(contains_term_with_boundaries("re jane doe hearing", "jane doe"));
        assert!(!contains_term_with_boundaries("re janet doerr", "jane doe"));
        assert!(!contains_term_with_boundaries("anything", ""));
    }

    #[test]
    fn name_tiers_degrade_in_confidence() {
        let matters = roster();
        let config = MatchingConfig::default();

        let full = match_party_name("Re: Jane Doe hearing", &matters, &config).expect("full");
        assert_eq!(full.matter.matter_id, "doe");
        assert_eq!(full.confidence, Confidence::High);

        let first_last =
            match_party_name("Maria and Ms. Hernandez called", &matters, &config).expect("pair");
        assert_eq!(first_last.matter.matter_id, "hernandez");
        assert_eq!(first_last.confidence, Confidence::Medium);

        let last = match_party_name("Hernandez file", &matters, &config).expect("last");
        assert_eq!(last.confidence, Confidence::Low);

        // "Li" is below the last-name length gate.
        assert!(match_party_name("Mr. Li called", &matters, &config).is_none());
    }

    #[test]
    fn ambiguous_names_do_not_match() {
        let matters = vec![matter("a", "Jane Smithers"), matter("b", "John Smithers")];
        assert!(match_party_name("Smithers deposition", &matters, &MatchingConfig::default()).is_none());
    }

    #[test]
    fn case_numbers_need_six_digits() {
        assert_eq!(
            case_number_candidates("Case No. 23-1900123, filed 2025"),
            vec!["231900123".to_string()]
        );
        assert!(case_number_candidates("Invoice 2025 ref 1234").is_empty());
    }

    #[test]
    fn trailing_counts_do_not_join_the_case_number() {
        assert_eq!(
            case_number_candidates("Case No. 251900456 - 3 documents"),
            vec!["251900456".to_string()]
        );
        assert_eq!(
            case_number_candidates("Case 251900456 3 documents attached"),
            vec!["2519004563".to_string(), "251900456".to_string()]
        );
        assert_eq!(
            case_number_candidates("Nos. 2301 00123 and 241900777"),
            vec![
                "230100123".to_string(),
                "241900777".to_string()
            ]
        );
    }

    #[test]
    fn model_answers_verify_within_edit_distance() {
        let matters = roster();
        let config = MatchingConfig::default();
        assert_eq!(
            verify_matter_name("Jane Do", &matters, &config).map(|m| m.matter_id.as_str()),
            Some("doe")
        );
        assert_eq!(
            verify_matter_name("hernandez", &matters, &config).map(|m| m.matter_id.as_str()),
            Some("hernandez")
        );
        assert!(verify_matter_name("Robert Paulson", &matters, &config).is_none());
    }

    #[test]
    fn document_hints_prefer_specific_phrases() {
        assert_eq!(document_type_hint("Signed Plea Agreement attached"), Some("plea_agreement"));
        assert_eq!(document_type_hint("Notice of Hearing re Motion"), Some("notice_of_hearing"));
        assert_eq!(document_type_hint("lunch?"), None);
    }

    #[test]
    fn levenshtein_counts_edits() {
        assert_eq!(levenshtein("kitten", "sitting"), 3);
        assert_eq!(levenshtein("", "abc"), 3);
        assert_eq!(levenshtein("same", "same"), 0);
    }

    #[test]
    fn plausible_names_need_two_words() {
        assert!(is_plausible_party_name("Acme Widgets LLC"));
        assert!(!is_plausible_party_name("Acme"));
        assert!(!is_plausible_party_name("12 34"));
    }
}
