//! Tier-1 strategy archetypes.
//!
//! Known strategy shapes get deterministic scaffolding: the rebalance
//! cadence and the order-management body are fixed per archetype, while
//! entry and exit conditions are compiled from the document's own rules.

/// Recognized archetypes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Archetype {
    MomentumRotation,
    DualMomentum,
    MeanReversion,
    TrendFollowing,
    Breakout,
    DividendCapture,
}

impl Archetype {
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "momentum_rotation" => Some(Self::MomentumRotation),
            "dual_momentum" => Some(Self::DualMomentum),
            "mean_reversion" => Some(Self::MeanReversion),
            "trend_following" => Some(Self::TrendFollowing),
            "breakout" => Some(Self::Breakout),
            "dividend_capture" => Some(Self::DividendCapture),
            _ => None,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::MomentumRotation => "momentum_rotation",
            Self::DualMomentum => "dual_momentum",
            Self::MeanReversion => "mean_reversion",
            Self::TrendFollowing => "trend_following",
            Self::Breakout => "breakout",
            Self::DividendCapture => "dividend_capture",
        }
    }

    /// Rebalance cadence the scaffold schedules.
    pub fn schedule(&self) -> &'static str {
        match self {
            Self::MomentumRotation | Self::DualMomentum => "monthly",
            Self::MeanReversion => "daily",
            Self::TrendFollowing | Self::Breakout => "daily",
            Self::DividendCapture => "daily",
        }
    }

    /// Order-management body, indented for the class scope.
    pub fn scaffold(&self) -> &'static str {
        match self {
            Self::MomentumRotation | Self::DualMomentum => {
                "    def on_rebalance(self):\n\
                 \x20       ranked = self.rank_universe(key=self.entry_signal)\n\
                 \x20       targets = self.select_top(ranked)\n\
                 \x20       for symbol in self.holdings():\n\
                 \x20           if symbol not in targets or self.exit_signal(symbol):\n\
                 \x20               self.liquidate(symbol)\n\
                 \x20       for symbol in targets:\n\
                 \x20           self.set_target_weight(symbol, self.position_size(symbol))\n"
            }
            Self::MeanReversion => {
                "    def on_rebalance(self):\n\
                 \x20       for symbol in self.universe():\n\
                 \x20           if self.holds(symbol) and self.exit_signal(symbol):\n\
                 \x20               self.liquidate(symbol)\n\
                 \x20           elif not self.holds(symbol) and self.entry_signal(symbol):\n\
                 \x20               self.set_target_weight(symbol, self.position_size(symbol))\n"
            }
            Self::TrendFollowing | Self::Breakout => {
                "    def on_rebalance(self):\n\
                 \x20       for symbol in self.universe():\n\
                 \x20           if self.entry_signal(symbol) and not self.holds(symbol):\n\
                 \x20               self.set_target_weight(symbol, self.position_size(symbol))\n\
                 \x20           elif self.exit_signal(symbol) and self.holds(symbol):\n\
                 \x20               self.liquidate(symbol)\n"
            }
            Self::DividendCapture => {
                "    def on_rebalance(self):\n\
                 \x20       for symbol in self.universe():\n\
                 \x20           days = self.days_to_ex_dividend(symbol)\n\
                 \x20           if days is not None and days <= self.params.get(\"entry_days\", 1) \\\n\
                 \x20                   and self.entry_signal(symbol):\n\
                 \x20               self.set_target_weight(symbol, self.position_size(symbol))\n\
                 \x20           elif self.holds(symbol) and (days is None or self.exit_signal(symbol)):\n\
                 \x20               self.liquidate(symbol)\n"
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_name_round_trip() {
        for archetype in [
            Archetype::MomentumRotation,
            Archetype::DualMomentum,
            Archetype::MeanReversion,
            Archetype::TrendFollowing,
            Archetype::Breakout,
            Archetype::DividendCapture,
        ] {
            assert_eq!(Archetype::from_name(archetype.name()), Some(archetype));
        }
        assert_eq!(Archetype::from_name("statistical_arbitrage"), None);
    }

    #[test]
    fn test_scaffolds_are_class_scoped() {
        for archetype in [Archetype::MomentumRotation, Archetype::DividendCapture] {
            assert!(archetype.scaffold().starts_with("    def on_rebalance"));
        }
    }
}
