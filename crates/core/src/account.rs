use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

use crate::util::similarity;

pub const SEPARATOR: char = ':';

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AccountPathError {
    #[error("Account path is empty")]
    Empty,
    #[error("Account path '{0}' has an empty segment")]
    EmptySegment(String),
}

/// A colon-delimited ledger account, e.g. `Expenses:Childcare:Others`.
///
/// Comparison is exact and case-sensitive.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct AccountPath(String);

impl AccountPath {
    pub fn parse(s: &str) -> Result<Self, AccountPathError> {
        let s = s.trim();
        if s.is_empty() {
            return Err(AccountPathError::Empty);
        }
        if s.split(SEPARATOR).any(|seg| seg.trim().is_empty()) {
            return Err(AccountPathError::EmptySegment(s.to_string()));
        }
        Ok(AccountPath(s.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn segments(&self) -> impl Iterator<Item = &str> {
        self.0.split(SEPARATOR)
    }

    pub fn depth(&self) -> usize {
        self.segments().count()
    }

    pub fn root(&self) -> &str {
        self.segments().next().unwrap_or_default()
    }

    pub fn parent(&self) -> Option<AccountPath> {
        self.0
            .rfind(SEPARATOR)
            .map(|idx| AccountPath(self.0[..idx].to_string()))
    }

    /// Every proper ancestor, nearest first.
    pub fn ancestors(&self) -> Vec<AccountPath> {
        let mut out = Vec::new();
        let mut current = self.parent();
        while let Some(p) = current {
            current = p.parent();
            out.push(p);
        }
        out
    }

    /// True when `self` equals `prefix` or sits beneath it.
    pub fn is_within(&self, prefix: &str) -> bool {
        self.0 == prefix
            || (self.0.starts_with(prefix) && self.0[prefix.len()..].starts_with(SEPARATOR))
    }

    pub fn family(&self) -> AccountFamily {
        AccountFamily::from_root(self.root())
    }
}

impl fmt::Display for AccountPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for AccountPath {
    type Err = AccountPathError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        AccountPath::parse(s)
    }
}

impl TryFrom<String> for AccountPath {
    type Error = AccountPathError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        AccountPath::parse(&s)
    }
}

impl From<AccountPath> for String {
    fn from(path: AccountPath) -> Self {
        path.0
    }
}

/// Top-level account class, derived from the first path segment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AccountFamily {
    Asset,
    Liability,
    Equity,
    Income,
    Expense,
    Other,
}

impl AccountFamily {
    pub fn from_root(root: &str) -> Self {
        match root.to_lowercase().as_str() {
            "assets" | "asset" => AccountFamily::Asset,
            "liabilities" | "liability" => AccountFamily::Liability,
            "equity" => AccountFamily::Equity,
            "income" | "revenue" => AccountFamily::Income,
            "expenses" | "expense" => AccountFamily::Expense,
            _ => AccountFamily::Other,
        }
    }
}

impl fmt::Display for AccountFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AccountFamily::Asset => write!(f, "Asset"),
            AccountFamily::Liability => write!(f, "Liability"),
            AccountFamily::Equity => write!(f, "Equity"),
            AccountFamily::Income => write!(f, "Income"),
            AccountFamily::Expense => write!(f, "Expense"),
            AccountFamily::Other => write!(f, "Other"),
        }
    }
}

#[derive(Debug, Clone, Error)]
pub enum ChartError {
    #[error("Line {line}: {source}")]
    InvalidPath {
        line: usize,
        #[source]
        source: AccountPathError,
    },
    #[error("Account listed twice: {0}")]
    Duplicate(AccountPath),
    #[error("Account {account} has no parent entry {ancestor}")]
    MissingAncestor {
        account: AccountPath,
        ancestor: AccountPath,
    },
}

/// The immutable set of valid accounts plus a parent → children index.
#[derive(Debug, Clone, Default)]
pub struct ChartOfAccounts {
    accounts: BTreeSet<AccountPath>,
    children: BTreeMap<AccountPath, Vec<AccountPath>>,
}

impl ChartOfAccounts {
    pub fn new<I>(accounts: I) -> Result<Self, ChartError>
    where
        I: IntoIterator<Item = AccountPath>,
    {
        let mut set = BTreeSet::new();
        for account in accounts {
            if set.contains(&account) {
                return Err(ChartError::Duplicate(account));
            }
            set.insert(account);
        }

        let mut children: BTreeMap<AccountPath, Vec<AccountPath>> = BTreeMap::new();
        for account in &set {
            for ancestor in account.ancestors() {
                if !set.contains(&ancestor) {
                    return Err(ChartError::MissingAncestor {
                        account: account.clone(),
                        ancestor,
                    });
                }
            }
            if let Some(parent) = account.parent() {
                children.entry(parent).or_default().push(account.clone());
            }
        }

        Ok(Self {
            accounts: set,
            children,
        })
    }

    /// One account per line; blank lines and `#` comments are skipped.
    pub fn parse(text: &str) -> Result<Self, ChartError> {
        let mut accounts = Vec::new();
        for (idx, raw) in text.lines().enumerate() {
            let line = raw.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let path = AccountPath::parse(line)
                .map_err(|source| ChartError::InvalidPath { line: idx + 1, source })?;
            accounts.push(path);
        }
        Self::new(accounts)
    }

    pub fn len(&self) -> usize {
        self.accounts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.accounts.is_empty()
    }

    pub fn contains(&self, account: &AccountPath) -> bool {
        self.accounts.contains(account)
    }

    pub fn contains_str(&self, account: &str) -> bool {
        AccountPath::parse(account).is_ok_and(|p| self.contains(&p))
    }

    pub fn iter(&self) -> impl Iterator<Item = &AccountPath> {
        self.accounts.iter()
    }

    pub fn parent(&self, account: &AccountPath) -> Option<&AccountPath> {
        account.parent().and_then(|p| self.accounts.get(&p))
    }

    pub fn children(&self, account: &AccountPath) -> &[AccountPath] {
        self.children.get(account).map(Vec::as_slice).unwrap_or_default()
    }

    pub fn roots(&self) -> Vec<&AccountPath> {
        self.accounts.iter().filter(|a| a.depth() == 1).collect()
    }

    pub fn accounts_under<'a>(&'a self, prefix: &'a str) -> impl Iterator<Item = &'a AccountPath> {
        self.accounts.iter().filter(move |a| a.is_within(prefix))
    }

    pub fn max_depth(&self) -> usize {
        self.accounts.iter().map(AccountPath::depth).max().unwrap_or(0)
    }

    /// Closest valid accounts to `account`, best first.
    pub fn suggest(&self, account: &str, limit: usize) -> Vec<&AccountPath> {
        let mut scored: Vec<(f64, &AccountPath)> = self
            .accounts
            .iter()
            .map(|a| (similarity(account, a.as_str()), a))
            .collect();
        scored.sort_by(|a, b| b.0.total_cmp(&a.0).then_with(|| a.1.cmp(b.1)));
        scored.into_iter().take(limit).map(|(_, a)| a).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn path(s: &str) -> AccountPath {
        AccountPath::parse(s).unwrap()
    }

    const CHART: &str = "\
# household
Assets
Assets:Loans to
Assets:Loans to:Ara Loan
Expenses
Expenses:Food
Expenses:Food:Dining
Expenses:Food:Groceries
";

    #[test]
    fn path_rejects_empty_segments() {
        assert!(matches!(AccountPath::parse(""), Err(AccountPathError::Empty)));
        assert!(matches!(
            AccountPath::parse("Expenses::Food"),
            Err(AccountPathError::EmptySegment(_))
        ));
        assert!(AccountPath::parse(":Expenses").is_err());
    }

    #[test]
    fn path_hierarchy() {
        let p = path("Expenses:Food:Dining");
        assert_eq!(p.depth(), 3);
        assert_eq!(p.root(), "Expenses");
        assert_eq!(p.parent(), Some(path("Expenses:Food")));
        assert_eq!(p.ancestors(), vec![path("Expenses:Food"), path("Expenses")]);
        assert_eq!(path("Expenses").parent(), None);
    }

    #[test]
    fn is_within_respects_segment_boundary() {
        let p = path("Assets:Loans to:Ara Loan");
        assert!(p.is_within("Assets:Loans to"));
        assert!(p.is_within("Assets:Loans to:Ara Loan"));
        assert!(!p.is_within("Assets:Loans"));
    }

    #[test]
    fn family_from_root() {
        assert_eq!(path("Expenses:Food").family(), AccountFamily::Expense);
        assert_eq!(path("Assets:Loans to").family(), AccountFamily::Asset);
        assert_eq!(path("Income:Salary").family(), AccountFamily::Income);
        assert_eq!(path("Misc").family(), AccountFamily::Other);
    }

    #[test]
    fn serde_as_plain_string() {
        let json = serde_json::to_string(&path("Expenses:Food")).unwrap();
        assert_eq!(json, "\"Expenses:Food\"");
        assert!(serde_json::from_str::<AccountPath>("\"a::b\"").is_err());
    }

    #[test]
    fn chart_parse_and_query() {
        let chart = ChartOfAccounts::parse(CHART).unwrap();
        assert_eq!(chart.len(), 7);
        assert!(chart.contains(&path("Expenses:Food:Dining")));
        assert!(!chart.contains_str("expenses:food:dining"));
        assert_eq!(chart.parent(&path("Expenses:Food")), Some(&path("Expenses")));
        assert_eq!(chart.children(&path("Expenses:Food")).len(), 2);
        assert_eq!(chart.roots().len(), 2);
        assert_eq!(chart.accounts_under("Assets:Loans to").count(), 2);
        assert_eq!(chart.max_depth(), 3);
    }

    #[test]
    fn chart_requires_ancestors() {
        let err = ChartOfAccounts::parse("Expenses\nExpenses:Food:Dining\n").unwrap_err();
        assert!(matches!(err, ChartError::MissingAncestor { .. }));
    }

    #[test]
    fn chart_rejects_duplicates_and_bad_lines() {
        assert!(matches!(
            ChartOfAccounts::parse("Expenses\nExpenses\n"),
            Err(ChartError::Duplicate(_))
        ));
        assert!(matches!(
            ChartOfAccounts::parse("Expenses\nExpenses::X\n"),
            Err(ChartError::InvalidPath { line: 2, .. })
        ));
    }

    #[test]
    fn suggest_prefers_closest() {
        let chart = ChartOfAccounts::parse(CHART).unwrap();
        let s = chart.suggest("Expenses:Food:Grocery", 2);
        assert_eq!(s[0], &path("Expenses:Food:Groceries"));
    }
}
