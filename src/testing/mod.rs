//! Statistical testing for differential expression

mod decide;
mod ebayes;
mod fdr;
mod moderated;
mod pvalue;

pub use decide::{decide_tests, top_table, CommonMode, ContrastSummary, DecideParams, DecisionTable, TopTableRow};
pub use ebayes::{ebayes, squeeze_var, treat, EbayesParams, SqueezedVariances};
pub use fdr::benjamini_hochberg;
pub use moderated::FitResult;
pub use pvalue::{calculate_pvalue, calculate_pvalue_t, normal_tails, upper_tail_t};
