//! In-memory record of closed trades

use serde::Serialize;
use tracing::info;

use crate::types::Trade;

/// Aggregate statistics over a set of trades
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct TradeSummary {
    pub total_trades: usize,
    pub wins: usize,
    pub losses: usize,
    pub total_pnl: f64,
    /// Percentage of trades with positive PnL
    pub win_rate: f64,
}

#[derive(Debug, Clone, Default)]
pub struct TradeLedger {
    trades: Vec<Trade>,
}

impl TradeLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, trade: Trade) {
        info!(
            direction = ?trade.direction,
            entry = format!("{:.2}", trade.entry_price),
            exit = format!("{:.2}", trade.exit_price),
            quantity = trade.quantity,
            pnl = format!("{:.4}", trade.pnl),
            reason = %trade.reason,
            "Trade closed"
        );
        self.trades.push(trade);
    }

    pub fn trades(&self) -> &[Trade] {
        &self.trades
    }

    pub fn len(&self) -> usize {
        self.trades.len()
    }

    pub fn is_empty(&self) -> bool {
        self.trades.is_empty()
    }

    pub fn summary(&self) -> TradeSummary {
        let total_trades = self.trades.len();
        let wins = self.trades.iter().filter(|t| t.pnl > 0.0).count();
        let total_pnl = self.trades.iter().map(|t| t.pnl).sum();

        let win_rate = if total_trades > 0 {
            (wins as f64 / total_trades as f64) * 100.0
        } else {
            0.0
        };

        TradeSummary {
            total_trades,
            wins,
            losses: total_trades - wins,
            total_pnl,
            win_rate,
        }
    }

    pub fn log_summary(&self) {
        let summary = self.summary();
        info!(
            trades = summary.total_trades,
            wins = summary.wins,
            losses = summary.losses,
            win_rate = format!("{:.1}%", summary.win_rate),
            total_pnl = format!("{:.4}", summary.total_pnl),
            "Trade summary"
        );
    }
}
