use ledgersort_core::{normalize, AccountPath, ChartOfAccounts, Method, NormalizedDescription};
use regex::{Captures, Regex};
use std::collections::HashMap;

use crate::inherit::InheritDirective;
use crate::rules::{ExactRule, KeywordRule, RegexRule, RuleError, RuleTable};

pub const EXACT_CONFIDENCE: f64 = 1.0;
pub const REGEX_CONFIDENCE: f64 = 0.95;
pub const KEYWORD_CONFIDENCE: f64 = 0.85;

/// A definite account proposed by one tier.
#[derive(Debug, Clone, PartialEq)]
pub struct Candidate {
    pub account: AccountPath,
    pub confidence: f64,
    pub method: Method,
    pub reasoning: String,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Hit {
    Account(Candidate),
    Inherit(InheritDirective),
}

fn resolve_account(
    rule: &str,
    account: &str,
    chart: &ChartOfAccounts,
) -> Result<AccountPath, RuleError> {
    let path = AccountPath::parse(account).map_err(|source| RuleError::InvalidAccount {
        rule: rule.to_string(),
        source,
    })?;
    if !chart.contains(&path) {
        return Err(RuleError::UnknownAccount {
            rule: rule.to_string(),
            account: account.to_string(),
        });
    }
    Ok(path)
}

// ── Exact ─────────────────────────────────────────────────────────────────────

pub struct ExactMatcher {
    table: HashMap<NormalizedDescription, AccountPath>,
}

impl ExactMatcher {
    pub fn compile(rules: &[ExactRule], chart: &ChartOfAccounts) -> Result<Self, RuleError> {
        let mut table: HashMap<NormalizedDescription, AccountPath> =
            HashMap::with_capacity(rules.len());
        for (index, rule) in rules.iter().enumerate() {
            let key = normalize(&rule.description);
            if key.is_empty() {
                return Err(RuleError::EmptyPattern { tier: "exact", index });
            }
            let account = resolve_account(&rule.description, &rule.account, chart)?;
            if let Some(existing) = table.get(&key) {
                if existing != &account {
                    return Err(RuleError::ConflictingExact {
                        key: key.to_string(),
                        first: existing.to_string(),
                        second: account.to_string(),
                    });
                }
                continue;
            }
            table.insert(key, account);
        }
        Ok(Self { table })
    }

    pub fn find(&self, text: &NormalizedDescription) -> Option<Candidate> {
        self.table.get(text).map(|account| Candidate {
            account: account.clone(),
            confidence: EXACT_CONFIDENCE,
            method: Method::ExactMatch,
            reasoning: format!("Exact match for '{text}'"),
        })
    }

    pub fn len(&self) -> usize {
        self.table.len()
    }

    pub fn is_empty(&self) -> bool {
        self.table.is_empty()
    }
}

// ── Regex ─────────────────────────────────────────────────────────────────────

/// An account path with `{n}` capture placeholders.
#[derive(Debug)]
struct AccountTemplate {
    raw: String,
    groups: Vec<usize>,
}

/// Capture numbers referenced as `{n}`, with the byte offset of the first one.
fn placeholders(account: &str) -> Result<(Vec<usize>, Option<usize>), String> {
    let mut groups = Vec::new();
    let mut first = None;
    let mut rest = account;
    let mut offset = 0;
    while let Some(open) = rest.find('{') {
        let close = rest[open..]
            .find('}')
            .ok_or_else(|| "unclosed '{'".to_string())?;
        let inner = &rest[open + 1..open + close];
        let n: usize = inner
            .parse()
            .map_err(|_| format!("'{{{inner}}}' is not a capture group number"))?;
        first.get_or_insert(offset + open);
        groups.push(n);
        offset += open + close + 1;
        rest = &rest[open + close + 1..];
    }
    Ok((groups, first))
}

impl AccountTemplate {
    /// Returns `None` when `account` has no placeholders.
    fn parse(
        rule: &str,
        account: &str,
        regex: &Regex,
        chart: &ChartOfAccounts,
    ) -> Result<Option<Self>, RuleError> {
        let invalid = |reason: String| RuleError::InvalidTemplate {
            rule: rule.to_string(),
            template: account.to_string(),
            reason,
        };

        let (groups, first) = placeholders(account).map_err(invalid)?;
        let Some(first) = first else {
            return Ok(None);
        };
        if let Some(n) = groups.iter().find(|n| **n == 0 || **n >= regex.captures_len()) {
            return Err(invalid(format!("pattern has no capture group {n}")));
        }

        // The fixed part in front of the first placeholder must be a real account.
        let prefix = account[..first].trim_end_matches(':');
        if prefix.is_empty() || !chart.contains_str(prefix) {
            return Err(invalid(format!("prefix '{prefix}' is not in the chart of accounts")));
        }

        Ok(Some(Self {
            raw: account.to_string(),
            groups,
        }))
    }

    fn expand(&self, caps: &Captures) -> Option<AccountPath> {
        let mut out = self.raw.clone();
        for n in &self.groups {
            let value = caps.get(*n).map(|m| m.as_str().trim()).filter(|v| !v.is_empty())?;
            out = out.replace(&format!("{{{n}}}"), &title_case(value));
        }
        AccountPath::parse(&out).ok()
    }
}

fn title_case(s: &str) -> String {
    s.split(' ')
        .map(|word| {
            let mut chars = word.chars();
            match chars.next() {
                Some(first) => first
                    .to_uppercase()
                    .chain(chars.flat_map(char::to_lowercase))
                    .collect(),
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

#[derive(Debug)]
enum RegexTarget {
    Account(AccountPath),
    Template(AccountTemplate),
    Inherit { strip: Regex },
}

#[derive(Debug)]
struct CompiledRegex {
    regex: Regex,
    target: RegexTarget,
}

pub struct RegexMatcher {
    rules: Vec<CompiledRegex>,
}

impl RegexMatcher {
    pub fn compile(rules: &[RegexRule], chart: &ChartOfAccounts) -> Result<Self, RuleError> {
        let compile = |pattern: &str| {
            Regex::new(pattern).map_err(|source| RuleError::InvalidRegex {
                pattern: pattern.to_string(),
                source,
            })
        };

        let mut compiled = Vec::with_capacity(rules.len());
        for (index, rule) in rules.iter().enumerate() {
            if rule.pattern.trim().is_empty() {
                return Err(RuleError::EmptyPattern { tier: "regex", index });
            }
            let regex = compile(&rule.pattern)?;
            let target = match (&rule.account, &rule.inherit) {
                (Some(account), None) => {
                    match AccountTemplate::parse(&rule.pattern, account, &regex, chart)? {
                        Some(template) => RegexTarget::Template(template),
                        None => {
                            RegexTarget::Account(resolve_account(&rule.pattern, account, chart)?)
                        }
                    }
                }
                (None, Some(spec)) => RegexTarget::Inherit {
                    strip: compile(&spec.strip)?,
                },
                _ => return Err(RuleError::RegexTarget(rule.pattern.clone())),
            };
            compiled.push(CompiledRegex { regex, target });
        }
        Ok(Self { rules: compiled })
    }

    /// First declared pattern that matches and yields a usable target wins.
    pub fn find(&self, text: &NormalizedDescription) -> Option<Hit> {
        for rule in &self.rules {
            let Some(caps) = rule.regex.captures(text.as_str()) else {
                continue;
            };
            let pattern = rule.regex.as_str();
            let account = match &rule.target {
                RegexTarget::Account(account) => account.clone(),
                RegexTarget::Template(template) => match template.expand(&caps) {
                    Some(account) => account,
                    None => {
                        tracing::debug!(pattern, "template capture missing, trying next pattern");
                        continue;
                    }
                },
                RegexTarget::Inherit { strip } => {
                    let directive = InheritDirective::from_match(text, &caps, pattern, strip);
                    return Some(Hit::Inherit(directive));
                }
            };
            return Some(Hit::Account(Candidate {
                account,
                confidence: REGEX_CONFIDENCE,
                method: Method::RegexMatch,
                reasoning: format!("Regex match for pattern '{pattern}'"),
            }));
        }
        None
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }
}

// ── Keyword ───────────────────────────────────────────────────────────────────

pub struct KeywordMatcher {
    keywords: Vec<(String, AccountPath)>,
}

impl KeywordMatcher {
    pub fn compile(rules: &[KeywordRule], chart: &ChartOfAccounts) -> Result<Self, RuleError> {
        let mut keywords: Vec<(String, AccountPath)> = Vec::with_capacity(rules.len());
        for (index, rule) in rules.iter().enumerate() {
            let keyword = normalize(&rule.keyword).to_string();
            if keyword.is_empty() {
                return Err(RuleError::EmptyPattern { tier: "keyword", index });
            }
            let account = resolve_account(&rule.keyword, &rule.account, chart)?;
            if let Some((_, existing)) = keywords.iter().find(|(k, _)| *k == keyword) {
                if existing != &account {
                    return Err(RuleError::ConflictingKeyword {
                        key: keyword,
                        first: existing.to_string(),
                        second: account.to_string(),
                    });
                }
                continue;
            }
            keywords.push((keyword, account));
        }
        Ok(Self { keywords })
    }

    pub fn find(&self, text: &NormalizedDescription) -> Option<Candidate> {
        self.keywords
            .iter()
            .find(|(keyword, _)| text.as_str().contains(keyword.as_str()))
            .map(|(keyword, account)| Candidate {
                account: account.clone(),
                confidence: KEYWORD_CONFIDENCE,
                method: Method::KeywordMatch,
                reasoning: format!("Keyword match for '{keyword}'"),
            })
    }

    pub fn len(&self) -> usize {
        self.keywords.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keywords.is_empty()
    }
}

// ── Cascade ───────────────────────────────────────────────────────────────────

pub enum Strategy {
    Exact(ExactMatcher),
    Regex(RegexMatcher),
    Keyword(KeywordMatcher),
}

impl Strategy {
    pub fn name(&self) -> &'static str {
        match self {
            Strategy::Exact(_) => "exact_match",
            Strategy::Regex(_) => "regex_match",
            Strategy::Keyword(_) => "keyword_match",
        }
    }

    pub fn evaluate(&self, text: &NormalizedDescription) -> Option<Hit> {
        match self {
            Strategy::Exact(m) => m.find(text).map(Hit::Account),
            Strategy::Regex(m) => m.find(text),
            Strategy::Keyword(m) => m.find(text).map(Hit::Account),
        }
    }
}

/// The local strategies in fixed priority order: exact, regex, keyword.
pub struct Cascade {
    strategies: [Strategy; 3],
}

impl Cascade {
    /// Compiles every rule and checks every target against `chart`. Any
    /// problem is fatal; no rule is ever silently dropped.
    pub fn compile(rules: &RuleTable, chart: &ChartOfAccounts) -> Result<Self, RuleError> {
        Ok(Self {
            strategies: [
                Strategy::Exact(ExactMatcher::compile(&rules.exact, chart)?),
                Strategy::Regex(RegexMatcher::compile(&rules.regex, chart)?),
                Strategy::Keyword(KeywordMatcher::compile(&rules.keyword, chart)?),
            ],
        })
    }

    pub fn evaluate(&self, text: &NormalizedDescription) -> Option<Hit> {
        for strategy in &self.strategies {
            if let Some(hit) = strategy.evaluate(text) {
                tracing::debug!(strategy = strategy.name(), description = %text, "tier hit");
                return Some(hit);
            }
        }
        tracing::debug!(description = %text, "no tier matched");
        None
    }

    pub fn strategies(&self) -> &[Strategy] {
        &self.strategies
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chart() -> ChartOfAccounts {
        ChartOfAccounts::parse(
            "Expenses\nExpenses:Childcare\nExpenses:Childcare:Others\nExpenses:Childcare:Clothes\n\
             Expenses:Food\nExpenses:Food:Groceries\nExpenses:Food:Dining\n\
             Expenses:Household Staff\nExpenses:Household Staff:Ara\n\
             Expenses:Household Staff:Ara:Others\n\
             Expenses:Transportation\nExpenses:Transportation:Public\n",
        )
        .unwrap()
    }

    fn text(s: &str) -> NormalizedDescription {
        normalize(s)
    }

    fn account(hit: Option<Hit>) -> String {
        match hit {
            Some(Hit::Account(c)) => c.account.to_string(),
            other => panic!("expected account hit, got {other:?}"),
        }
    }

    // ── exact ─────────────────────────────────────────────────────────────────

    #[test]
    fn exact_keys_are_normalized() {
        let rules =
            RuleTable::default().with_exact("  Grab   CAR", "Expenses:Transportation:Public");
        let m = ExactMatcher::compile(&rules.exact, &chart()).unwrap();
        let c = m.find(&text("grab car")).unwrap();
        assert_eq!(c.confidence, 1.0);
        assert_eq!(c.method, Method::ExactMatch);
        assert!(m.find(&text("grab car ride")).is_none());
    }

    #[test]
    fn exact_conflicting_duplicate_is_rejected() {
        let rules = RuleTable::default()
            .with_exact("grab", "Expenses:Transportation:Public")
            .with_exact("GRAB", "Expenses:Food:Dining");
        assert!(matches!(
            ExactMatcher::compile(&rules.exact, &chart()),
            Err(RuleError::ConflictingExact { .. })
        ));
    }

    #[test]
    fn exact_same_target_duplicate_is_allowed() {
        let rules = RuleTable::default()
            .with_exact("grab", "Expenses:Transportation:Public")
            .with_exact("Grab", "Expenses:Transportation:Public");
        assert_eq!(ExactMatcher::compile(&rules.exact, &chart()).unwrap().len(), 1);
    }

    #[test]
    fn unknown_account_is_a_config_error() {
        let rules = RuleTable::default().with_exact("grab", "Expenses:Transport:Taxi");
        assert!(matches!(
            ExactMatcher::compile(&rules.exact, &chart()),
            Err(RuleError::UnknownAccount { .. })
        ));
    }

    // ── regex ─────────────────────────────────────────────────────────────────

    #[test]
    fn regex_first_declared_wins() {
        let rules = RuleTable::default()
            .with_regex("(?i)alessi.*snacks", "Expenses:Childcare:Others")
            .with_regex("(?i)snacks", "Expenses:Food:Groceries");
        let m = RegexMatcher::compile(&rules.regex, &chart()).unwrap();
        assert_eq!(account(m.find(&text("alessi snacks"))), "Expenses:Childcare:Others");
        assert_eq!(account(m.find(&text("office snacks"))), "Expenses:Food:Groceries");
    }

    #[test]
    fn regex_confidence_and_reasoning() {
        let rules =
            RuleTable::default().with_regex("(?i)alessi.*h & m", "Expenses:Childcare:Clothes");
        let m = RegexMatcher::compile(&rules.regex, &chart()).unwrap();
        match m.find(&text("Alessi shirt H & M")) {
            Some(Hit::Account(c)) => {
                assert_eq!(c.confidence, 0.95);
                assert!(c.reasoning.contains("alessi.*h & m"));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn case_sensitivity_is_per_pattern() {
        let rules = RuleTable::default().with_regex("Snacks", "Expenses:Food:Groceries");
        let m = RegexMatcher::compile(&rules.regex, &chart()).unwrap();
        // Normalized text is lower-case, so a case-sensitive capitalised pattern never matches.
        assert!(m.find(&text("SNACKS")).is_none());
    }

    #[test]
    fn malformed_regex_is_a_config_error() {
        let rules = RuleTable::default().with_regex("(unclosed", "Expenses:Food:Groceries");
        assert!(matches!(
            RegexMatcher::compile(&rules.regex, &chart()),
            Err(RuleError::InvalidRegex { .. })
        ));
    }

    #[test]
    fn template_expands_capture_title_cased() {
        let rules = RuleTable::default()
            .with_regex("(?i)(ara|michelle) nbi", "Expenses:Household Staff:{1}:Others");
        let m = RegexMatcher::compile(&rules.regex, &chart()).unwrap();
        assert_eq!(
            account(m.find(&text("ARA NBI clearance"))),
            "Expenses:Household Staff:Ara:Others"
        );
    }

    #[test]
    fn template_skips_when_group_missing() {
        let rules = RuleTable::default()
            .with_regex("(?i)(ara)? nbi", "Expenses:Household Staff:{1}:Others")
            .with_regex("(?i)nbi", "Expenses:Childcare:Others");
        let m = RegexMatcher::compile(&rules.regex, &chart()).unwrap();
        assert_eq!(account(m.find(&text("x nbi"))), "Expenses:Childcare:Others");
    }

    #[test]
    fn template_validation() {
        let bad_group = RuleTable::default()
            .with_regex("(?i)(ara) nbi", "Expenses:Household Staff:{2}:Others");
        assert!(matches!(
            RegexMatcher::compile(&bad_group.regex, &chart()),
            Err(RuleError::InvalidTemplate { .. })
        ));
        let bad_prefix = RuleTable::default().with_regex("(?i)(ara) nbi", "Expenses:Staff:{1}");
        assert!(matches!(
            RegexMatcher::compile(&bad_prefix.regex, &chart()),
            Err(RuleError::InvalidTemplate { .. })
        ));
    }

    #[test]
    fn inherit_rule_yields_directive() {
        let rules = RuleTable::default().with_inherit(r"(?i)(\w+)\s+exceed", r"\bexceed\b.*$");
        let m = RegexMatcher::compile(&rules.regex, &chart()).unwrap();
        match m.find(&text("Cat Clinic Shadow EXCEED")) {
            Some(Hit::Inherit(d)) => assert_eq!(d.base_key.as_str(), "cat clinic shadow"),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn regex_rule_needs_exactly_one_target() {
        let mut rules = RuleTable::default().with_regex("x", "Expenses:Food:Groceries");
        rules.regex[0].inherit = Some(crate::rules::InheritSpec { strip: "x".into() });
        assert!(matches!(
            RegexMatcher::compile(&rules.regex, &chart()),
            Err(RuleError::RegexTarget(_))
        ));
    }

    // ── keyword ───────────────────────────────────────────────────────────────

    #[test]
    fn keyword_first_registered_wins() {
        let rules = RuleTable::default()
            .with_keyword("santis", "Expenses:Food:Groceries")
            .with_keyword("alessi", "Expenses:Childcare:Others");
        let m = KeywordMatcher::compile(&rules.keyword, &chart()).unwrap();
        let c = m.find(&text("alessi treats from SANTIS")).unwrap();
        assert_eq!(c.account.as_str(), "Expenses:Food:Groceries");
        assert_eq!(c.confidence, 0.85);
        assert!(m.find(&text("hardware store")).is_none());
    }

    #[test]
    fn keyword_conflicting_duplicate_is_rejected() {
        let rules = RuleTable::default()
            .with_keyword("santis", "Expenses:Food:Groceries")
            .with_keyword("  SANTIS ", "Expenses:Food:Dining");
        match KeywordMatcher::compile(&rules.keyword, &chart()) {
            Err(RuleError::ConflictingKeyword { key, first, second }) => {
                assert_eq!(key, "santis");
                assert_eq!(first, "Expenses:Food:Groceries");
                assert_eq!(second, "Expenses:Food:Dining");
            }
            Err(other) => panic!("unexpected error {other}"),
            Ok(_) => panic!("conflicting keywords were accepted"),
        }
    }

    #[test]
    fn keyword_same_target_duplicate_is_allowed() {
        let rules = RuleTable::default()
            .with_keyword("santis", "Expenses:Food:Groceries")
            .with_keyword("Santis", "Expenses:Food:Groceries");
        assert_eq!(KeywordMatcher::compile(&rules.keyword, &chart()).unwrap().len(), 1);
    }

    // ── cascade ───────────────────────────────────────────────────────────────

    #[test]
    fn exact_beats_regex_beats_keyword() {
        let rules = RuleTable::default()
            .with_exact("alessi snacks", "Expenses:Food:Dining")
            .with_regex("(?i)alessi.*snacks", "Expenses:Childcare:Others")
            .with_keyword("alessi", "Expenses:Food:Groceries");
        let cascade = Cascade::compile(&rules, &chart()).unwrap();

        let exact = cascade.evaluate(&text("alessi snacks"));
        assert!(matches!(
            &exact,
            Some(Hit::Account(c)) if c.method == Method::ExactMatch && c.confidence == 1.0
        ));
        assert_eq!(account(exact), "Expenses:Food:Dining");
        assert_eq!(
            account(cascade.evaluate(&text("alessi more snacks"))),
            "Expenses:Childcare:Others"
        );
        assert_eq!(account(cascade.evaluate(&text("alessi shoes"))), "Expenses:Food:Groceries");
        assert!(cascade.evaluate(&text("unknown vendor xyz")).is_none());
        assert_eq!(cascade.strategies()[0].name(), "exact_match");
    }

    #[test]
    fn placeholder_scan() {
        assert_eq!(placeholders("A:{1}:B:{2}").unwrap(), (vec![1, 2], Some(2)));
        assert_eq!(placeholders("A:B").unwrap(), (vec![], None));
        assert!(placeholders("A:{x}").is_err());
        assert!(placeholders("A:{1").is_err());
    }

    #[test]
    fn title_case_words() {
        assert_eq!(title_case("mICHELLE"), "Michelle");
        assert_eq!(title_case("ara lyn"), "Ara Lyn");
    }
}
