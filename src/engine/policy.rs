// schemarestore/src/engine/policy.rs
use std::collections::BTreeSet;

/// Server error numbers that signal a missing dependency rather than a
/// broken script. Scripts failing with one of these are deferred and
/// retried once later objects exist.
///
/// 207  - invalid column name
/// 208  - invalid object name
/// 1088 - cannot find the object (ALTER TABLE targets)
/// 1767 - foreign key references invalid table
/// 2715 - cannot find data type (user-defined types)
/// 4121 - cannot find column or user-defined function
/// 4512 - cannot schema bind (view/function dependency missing)
/// 15151 - cannot find the object or principal
const DEFAULT_RETRYABLE: [u32; 8] = [207, 208, 1088, 1767, 2715, 4121, 4512, 15151];

/// Decides whether a server error defers a script or fails it outright.
pub struct RetryPolicy {
    retryable: BTreeSet<u32>,
}

impl RetryPolicy {
    pub fn standard() -> RetryPolicy {
        RetryPolicy {
            retryable: DEFAULT_RETRYABLE.iter().copied().collect(),
        }
    }

    /// Builds a policy from an explicit number list. The list replaces the
    /// built-in set entirely rather than extending it.
    pub fn with_numbers(numbers: &[u32]) -> RetryPolicy {
        RetryPolicy {
            retryable: numbers.iter().copied().collect(),
        }
    }

    pub fn from_config(numbers: Option<&[u32]>) -> RetryPolicy {
        match numbers {
            Some(list) => RetryPolicy::with_numbers(list),
            None => RetryPolicy::standard(),
        }
    }

    pub fn is_retryable(&self, number: u32) -> bool {
        self.retryable.contains(&number)
    }
}
