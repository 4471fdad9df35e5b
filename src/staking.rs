use serde::{Deserialize, Serialize};

const MIN_PRICE: f64 = 1.01;
const MAX_PRICE: f64 = 1000.0;

/// How a notional bookmaker prices a selection.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Pricing {
    /// Same decimal odds for every selection.
    Fixed { odds: f64 },
    /// Fair odds of a reference probability, shortened by `margin`.
    SyntheticMargin { margin: f64 },
}

impl Default for Pricing {
    fn default() -> Self {
        Pricing::SyntheticMargin { margin: 0.05 }
    }
}

impl Pricing {
    pub fn price(&self, reference_prob: f64) -> f64 {
        let price = match *self {
            Pricing::Fixed { odds } => odds,
            Pricing::SyntheticMargin { margin } => {
                let p = reference_prob.clamp(1.0 / MAX_PRICE, 1.0);
                1.0 / (p * (1.0 + margin.max(0.0)))
            }
        };
        price.clamp(MIN_PRICE, MAX_PRICE)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct StakeRule {
    pub min_prob: f64,
    /// Minimum `p * price - 1` per unit staked.
    pub min_ev: f64,
    pub commission: f64,
}

impl StakeRule {
    pub fn expected_value(&self, p: f64, price: f64) -> f64 {
        p * (1.0 + (price - 1.0) * (1.0 - self.commission)) - 1.0
    }

    pub fn should_bet(&self, p: f64, price: f64) -> bool {
        p >= self.min_prob && self.expected_value(p, price) >= self.min_ev
    }

    pub fn settle(&self, price: f64, won: bool) -> f64 {
        if won {
            (price - 1.0) * (1.0 - self.commission)
        } else {
            -1.0
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct BetLedger {
    pub bets: usize,
    pub wins: usize,
    pub profit: f64,
}

impl BetLedger {
    /// Places a one-unit bet when the rule allows it. Returns whether it did.
    pub fn consider(&mut self, rule: &StakeRule, p: f64, price: f64, won: bool) -> bool {
        if !rule.should_bet(p, price) {
            return false;
        }
        self.bets += 1;
        if won {
            self.wins += 1;
        }
        self.profit += rule.settle(price, won);
        true
    }

    pub fn roi(&self) -> f64 {
        if self.bets == 0 {
            return 0.0;
        }
        self.profit / self.bets as f64
    }

    pub fn hit_rate(&self) -> f64 {
        if self.bets == 0 {
            return 0.0;
        }
        self.wins as f64 / self.bets as f64
    }

    pub fn merge(&mut self, other: &BetLedger) {
        self.bets += other.bets;
        self.wins += other.wins;
        self.profit += other.profit;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const RULE: StakeRule = StakeRule {
        min_prob: 0.4,
        min_ev: 0.02,
        commission: 0.0,
    };

    #[test]
    fn synthetic_margin_shortens_fair_odds() {
        let price = Pricing::SyntheticMargin { margin: 0.05 }.price(0.5);
        assert!((price - 1.0 / 0.525).abs() < 1e-12);
        assert_eq!(Pricing::Fixed { odds: 1.9 }.price(0.9), 1.9);
        assert_eq!(Pricing::SyntheticMargin { margin: 0.05 }.price(1.0), MIN_PRICE);
    }

    #[test]
    fn bet_needs_probability_and_value() {
        assert!(RULE.should_bet(0.6, 2.0));
        // Value but too unlikely.
        assert!(!RULE.should_bet(0.35, 4.0));
        // Likely but no value.
        assert!(!RULE.should_bet(0.5, 2.0));
    }

    #[test]
    fn ledger_settles_wins_and_losses() {
        let rule = StakeRule {
            commission: 0.05,
            ..RULE
        };
        let mut ledger = BetLedger::default();
        assert!(ledger.consider(&rule, 0.6, 2.0, true));
        assert!(ledger.consider(&rule, 0.6, 2.0, false));
        assert!(!ledger.consider(&rule, 0.1, 2.0, true));
        assert_eq!(ledger.bets, 2);
        assert_eq!(ledger.wins, 1);
        assert!((ledger.profit - (0.95 - 1.0)).abs() < 1e-12);
        assert!((ledger.hit_rate() - 0.5).abs() < 1e-12);
    }
}
