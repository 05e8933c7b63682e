use ledgersort_core::{Method, RawTransaction};
use ledgersort_engine::BatchOutcome;
use std::path::Path;

const MAX_REVIEW_ITEMS: usize = 20;

pub fn print(transactions: &[RawTransaction], outcome: &BatchOutcome, output: &Path) {
    let stats = &outcome.statistics;

    println!("Classified {} transactions in {} ms", stats.total, stats.elapsed.as_millis());
    for method in Method::ALL {
        println!("  {:<14} {:>6}", method.as_str(), stats.count(method));
    }
    println!(
        "Needs review: {} ({:.1}%), input errors: {}",
        stats.needs_review, stats.review_percentage, stats.input_errors
    );

    let review: Vec<_> = outcome.review_items().collect();
    if !review.is_empty() {
        println!();
        println!("Review:");
        for (position, result) in review.iter().take(MAX_REVIEW_ITEMS) {
            let tx = &transactions[*position];
            println!(
                "  #{:<4} {} {:<40} {} ({:.2}, {})",
                position + 1,
                tx.date,
                truncate(&tx.description, 40),
                result.account_label(),
                result.confidence,
                result.method
            );
            println!("         {}", result.reasoning);
        }
        if review.len() > MAX_REVIEW_ITEMS {
            println!("  ... and {} more", review.len() - MAX_REVIEW_ITEMS);
        }
    }

    println!();
    println!("Wrote {}", output.display());
}

fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        return s.to_string();
    }
    let kept: String = s.chars().take(max.saturating_sub(3)).collect();
    format!("{kept}...")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn truncate_long_descriptions() {
        assert_eq!(truncate("grab car", 40), "grab car");
        assert_eq!(truncate("abcdefghij", 6), "abc...");
    }
}
