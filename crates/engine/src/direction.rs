use ledgersort_core::{AccountFamily, AccountPath, Direction, NormalizedDescription};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DirectionCheck {
    Consistent,
    Mismatch { expected: &'static str },
}

/// Advisory check that the account family fits the money flow.
///
/// Outflows go to expenses or transfers out (assets, liabilities, equity).
/// Inflows come from income or transfers in. An inflow whose description
/// mentions a reimbursement is money coming back, so it belongs in a
/// receivable (or the asset it landed in), never in income.
#[derive(Debug, Clone)]
pub struct DirectionPolicy {
    reimbursement_keywords: Vec<String>,
    receivable_prefix: String,
}

impl DirectionPolicy {
    pub fn new(reimbursement_keywords: &[String], receivable_prefix: &str) -> Self {
        Self {
            reimbursement_keywords: reimbursement_keywords
                .iter()
                .map(|k| k.trim().to_lowercase())
                .filter(|k| !k.is_empty())
                .collect(),
            receivable_prefix: receivable_prefix.to_string(),
        }
    }

    pub fn is_reimbursement(&self, direction: Direction, text: &NormalizedDescription) -> bool {
        direction == Direction::In
            && self
                .reimbursement_keywords
                .iter()
                .any(|k| text.as_str().contains(k.as_str()))
    }

    pub fn check(
        &self,
        direction: Direction,
        text: &NormalizedDescription,
        account: &AccountPath,
    ) -> DirectionCheck {
        let family = account.family();
        match direction {
            Direction::Out => match family {
                AccountFamily::Income => DirectionCheck::Mismatch {
                    expected: "expense or transfer-out account",
                },
                _ => DirectionCheck::Consistent,
            },
            Direction::In if self.is_reimbursement(direction, text) => {
                if account.is_within(&self.receivable_prefix) || family == AccountFamily::Asset {
                    DirectionCheck::Consistent
                } else {
                    DirectionCheck::Mismatch {
                        expected: "receivable account for a reimbursement",
                    }
                }
            }
            Direction::In => match family {
                AccountFamily::Expense => DirectionCheck::Mismatch {
                    expected: "income or transfer-in account",
                },
                _ => DirectionCheck::Consistent,
            },
        }
    }
}

impl Default for DirectionPolicy {
    fn default() -> Self {
        Self::new(&["reimburse".to_string()], "Assets:Loans to")
    }
}
