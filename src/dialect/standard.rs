// Standard Dialect
//
// ANSI behavior: errors are classified by SQLState class only and the lock
// timeout is never changed on the connection.

use crate::dialect::Dialect;

/// Dialect following the SQL standard
#[derive(Debug, Clone, Default)]
pub struct StandardDialect {
    in_expression_limit: usize,
}

impl StandardDialect {
    pub fn new() -> Self {
        Self::default()
    }

    /// A standard dialect whose IN lists hold at most `limit` expressions
    pub fn with_in_expression_limit(limit: usize) -> Self {
        Self {
            in_expression_limit: limit,
        }
    }
}

impl Dialect for StandardDialect {
    fn name(&self) -> &str {
        "standard"
    }

    fn in_expression_count_limit(&self) -> usize {
        self.in_expression_limit
    }
}
