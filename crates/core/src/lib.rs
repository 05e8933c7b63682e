pub mod account;
pub mod classification;
pub mod money;
pub mod normalize;
pub mod transaction;
pub(crate) mod util;

pub use account::{AccountFamily, AccountPath, AccountPathError, ChartError, ChartOfAccounts};
pub use classification::{ClassificationResult, Method};
pub use money::Money;
pub use normalize::{normalize, NormalizedDescription};
pub use transaction::{Direction, InputError, RawTransaction, ValidatedTransaction};
