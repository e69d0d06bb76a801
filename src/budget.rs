//! Budget ledger - pure token-to-cost accounting for one task.
//!
//! The ledger is owned by a single orchestrator instance and passed down by
//! reference; it is never a process-wide singleton, so concurrent tasks in
//! separate orchestrators cannot cross-talk.

/// Per-token pricing in USD per million tokens.
#[derive(Debug, Clone, Copy)]
pub struct Pricing {
    pub input_usd_per_mtok: f64,
    pub output_usd_per_mtok: f64,
}

impl Default for Pricing {
    fn default() -> Self {
        Self {
            input_usd_per_mtok: 3.0,
            output_usd_per_mtok: 15.0,
        }
    }
}

impl Pricing {
    /// Cost of a single invocation. Pure function of the token counts.
    pub fn cost(&self, input_tokens: u64, output_tokens: u64) -> f64 {
        let input = input_tokens as f64 * self.input_usd_per_mtok / 1_000_000.0;
        let output = output_tokens as f64 * self.output_usd_per_mtok / 1_000_000.0;
        input + output
    }
}

/// Running spend for one task, checked before dispatching each subtask and
/// before each retry attempt.
#[derive(Debug)]
pub struct BudgetLedger {
    budget_usd: f64,
    spent_usd: f64,
    pricing: Pricing,
}

impl BudgetLedger {
    pub fn new(budget_usd: f64, pricing: Pricing) -> Self {
        Self {
            budget_usd,
            spent_usd: 0.0,
            pricing,
        }
    }

    /// Record one invocation's token usage. Returns the cost delta.
    pub fn record(&mut self, input_tokens: u64, output_tokens: u64) -> f64 {
        let delta = self.pricing.cost(input_tokens, output_tokens);
        self.spent_usd += delta;
        delta
    }

    pub fn total_spent(&self) -> f64 {
        self.spent_usd
    }

    pub fn budget(&self) -> f64 {
        self.budget_usd
    }

    /// True once spend has reached the configured budget. Being over budget
    /// skips remaining work; it is a reason, not an error.
    pub fn is_over_budget(&self) -> bool {
        self.spent_usd >= self.budget_usd
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_accumulates_deltas() {
        let mut ledger = BudgetLedger::new(15.0, Pricing::default());

        let d1 = ledger.record(1000, 500);
        let d2 = ledger.record(800, 300);

        assert!(d1 > 0.0);
        assert!(d2 > 0.0);
        assert!((ledger.total_spent() - (d1 + d2)).abs() < 1e-12);
    }

    #[test]
    fn test_spend_is_monotonic() {
        let mut ledger = BudgetLedger::new(15.0, Pricing::default());
        let mut previous = ledger.total_spent();

        for _ in 0..10 {
            ledger.record(1000, 500);
            assert!(ledger.total_spent() >= previous);
            previous = ledger.total_spent();
        }
    }

    #[test]
    fn test_over_budget_at_threshold() {
        let pricing = Pricing {
            input_usd_per_mtok: 1_000_000.0,
            output_usd_per_mtok: 0.0,
        };
        let mut ledger = BudgetLedger::new(2.0, pricing);

        ledger.record(1, 0);
        assert!(!ledger.is_over_budget());

        ledger.record(1, 0);
        assert!(ledger.is_over_budget());
    }

    #[test]
    fn test_planner_scale_usage_blows_small_budget() {
        let mut ledger = BudgetLedger::new(0.001, Pricing::default());
        ledger.record(100_000, 50_000);
        assert!(ledger.is_over_budget());
    }

    #[test]
    fn test_zero_tokens_cost_nothing() {
        let mut ledger = BudgetLedger::new(15.0, Pricing::default());
        assert_eq!(ledger.record(0, 0), 0.0);
        assert_eq!(ledger.total_spent(), 0.0);
        assert!(!ledger.is_over_budget());
    }
}
