//! Partial-fill consolidation
//!
//! Folds exchange-reported executions into one [`ConsolidatedOrder`] per
//! order id. Every aggregate is a sum or a set union, so the result does not
//! depend on whether fills arrive as one historical batch or one at a time
//! from a stream, nor on their order.

use crate::errors::{ExchangeError, Result};
use crate::types::{OrderSide, OrderSnapshot};
use omniex_core::Fixed;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use tracing::debug;

/// One exchange-reported execution
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawFill {
    pub order_id: String,
    /// Exchange trade id; fills carrying one are applied at most once
    pub trade_id: Option<String>,
    pub symbol: String,
    pub side: OrderSide,
    pub amount: Fixed,
    pub price: Fixed,
    pub timestamp: u64,
    pub fee: Option<Fixed>,
    pub fee_currency: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OrderResultStatus {
    Pending,
    FilledPartially,
    Filled,
    Canceled,
    Error,
    Unknown,
}

/// Order state as the exchange reports it
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ExchangeOrderState {
    Open,
    Filled,
    Canceled,
    Expired,
    Rejected,
    Unrecognized(String),
}

impl ExchangeOrderState {
    /// Map the common native spellings; anything else stays visible as
    /// [`ExchangeOrderState::Unrecognized`]
    pub fn from_native(raw: &str) -> Self {
        match raw.trim().to_ascii_lowercase().replace(['-', ' '], "_").as_str() {
            "new" | "open" | "live" | "pending" | "pending_new" | "partially_filled" | "accepted" => {
                ExchangeOrderState::Open
            }
            "filled" | "done" | "closed" => ExchangeOrderState::Filled,
            "canceled" | "cancelled" | "pending_cancel" => ExchangeOrderState::Canceled,
            "expired" | "expired_in_match" => ExchangeOrderState::Expired,
            "rejected" => ExchangeOrderState::Rejected,
            _ => ExchangeOrderState::Unrecognized(raw.to_string()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConsolidatedOrder {
    pub order_id: String,
    pub client_order_id: Option<String>,
    pub symbol: String,
    pub side: OrderSide,
    /// `None` when only executions are known (trade history)
    pub requested_amount: Option<Fixed>,
    pub limit_price: Option<Fixed>,
    pub filled_amount: Fixed,
    /// Σ(price × amount) over applied fills
    pub notional: Fixed,
    /// Volume-weighted; zero while nothing is filled
    pub average_price: Fixed,
    pub fees: Fixed,
    pub fee_currency: Option<String>,
    pub exchange_state: Option<ExchangeOrderState>,
    pub status: OrderResultStatus,
    pub trade_ids: BTreeSet<String>,
    pub fill_count: usize,
    pub first_fill_at: Option<u64>,
    pub last_fill_at: Option<u64>,
}

impl ConsolidatedOrder {
    /// An order with no executions yet
    pub fn pending(
        order_id: impl Into<String>,
        symbol: impl Into<String>,
        side: OrderSide,
        requested_amount: Option<Fixed>,
    ) -> Self {
        Self {
            order_id: order_id.into(),
            client_order_id: None,
            symbol: symbol.into(),
            side,
            requested_amount,
            limit_price: None,
            filled_amount: Fixed::ZERO,
            notional: Fixed::ZERO,
            average_price: Fixed::ZERO,
            fees: Fixed::ZERO,
            fee_currency: None,
            exchange_state: None,
            status: OrderResultStatus::Pending,
            trade_ids: BTreeSet::new(),
            fill_count: 0,
            first_fill_at: None,
            last_fill_at: None,
        }
    }

    /// Start from an order snapshot, folding any inline fills
    pub fn from_snapshot(snapshot: &OrderSnapshot) -> Result<Self> {
        let mut order = Self::pending(
            snapshot.order_id.clone(),
            snapshot.symbol.clone(),
            snapshot.side,
            snapshot.requested_amount,
        );
        order.client_order_id = snapshot.client_order_id.clone();
        order.limit_price = snapshot.price;
        order.exchange_state = Some(snapshot.state.clone());
        for fill in &snapshot.fills {
            order.apply(fill)?;
        }
        order.refresh_status();
        Ok(order)
    }

    /// Record a newer exchange-reported state and re-derive the status
    pub fn set_exchange_state(&mut self, state: ExchangeOrderState) {
        self.exchange_state = Some(state);
        self.refresh_status();
    }

    pub fn remaining_amount(&self) -> Option<Fixed> {
        self.requested_amount.map(|requested| requested - self.filled_amount)
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self.status,
            OrderResultStatus::Filled | OrderResultStatus::Canceled | OrderResultStatus::Error
        )
    }

    /// Apply one fill. Validation happens before any field changes, so a
    /// rejected fill leaves the order untouched.
    pub fn apply(&mut self, fill: &RawFill) -> Result<()> {
        if fill.order_id != self.order_id {
            return Err(ExchangeError::Integrity(format!(
                "fill for order {} folded into order {}",
                fill.order_id, self.order_id
            )));
        }
        if fill.symbol != self.symbol {
            return Err(ExchangeError::Integrity(format!(
                "order {}: fill symbol {} does not match {}",
                self.order_id, fill.symbol, self.symbol
            )));
        }
        if fill.side != self.side {
            return Err(ExchangeError::Integrity(format!(
                "order {}: fill side {} does not match {}",
                self.order_id, fill.side, self.side
            )));
        }
        if !fill.amount.is_positive() || !fill.price.is_positive() {
            return Err(ExchangeError::Integrity(format!(
                "order {}: fill with amount {} at price {}",
                self.order_id, fill.amount, fill.price
            )));
        }
        if let Some(trade_id) = &fill.trade_id {
            if self.trade_ids.contains(trade_id) {
                debug!("🔁 Order {} already holds trade {}, skipping", self.order_id, trade_id);
                return Ok(());
            }
        }
        let fee_currency = match (&self.fee_currency, &fill.fee_currency) {
            (Some(current), Some(incoming)) if !current.eq_ignore_ascii_case(incoming) => {
                return Err(ExchangeError::Integrity(format!(
                    "order {}: fees in both {} and {}",
                    self.order_id, current, incoming
                )));
            }
            (Some(current), _) => Some(current.clone()),
            (None, incoming) => incoming.clone(),
        };

        let filled_amount = self.filled_amount.checked_add(fill.amount)?;
        if let Some(requested) = self.requested_amount {
            if filled_amount > requested {
                return Err(ExchangeError::Integrity(format!(
                    "order {}: filled {} exceeds requested {}",
                    self.order_id, filled_amount, requested
                )));
            }
        }
        let notional = self.notional.checked_add(fill.price.checked_mul(fill.amount)?)?;
        let fees = match fill.fee {
            Some(fee) => self.fees.checked_add(fee)?,
            None => self.fees,
        };
        let average_price = notional.checked_div(filled_amount)?;

        self.filled_amount = filled_amount;
        self.notional = notional;
        self.average_price = average_price;
        self.fees = fees;
        self.fee_currency = fee_currency;
        self.fill_count += 1;
        if let Some(trade_id) = &fill.trade_id {
            self.trade_ids.insert(trade_id.clone());
        }
        self.first_fill_at = Some(self.first_fill_at.map_or(fill.timestamp, |t| t.min(fill.timestamp)));
        self.last_fill_at = Some(self.last_fill_at.map_or(fill.timestamp, |t| t.max(fill.timestamp)));
        self.refresh_status();
        Ok(())
    }

    fn refresh_status(&mut self) {
        self.status = derive_status(self.requested_amount, self.filled_amount, self.exchange_state.as_ref());
    }
}

/// Status from amounts, with the exchange's own state breaking ties
pub fn derive_status(
    requested: Option<Fixed>,
    filled: Fixed,
    state: Option<&ExchangeOrderState>,
) -> OrderResultStatus {
    match state {
        Some(ExchangeOrderState::Unrecognized(_)) => return OrderResultStatus::Unknown,
        Some(ExchangeOrderState::Rejected) => return OrderResultStatus::Error,
        _ => {}
    }
    if let Some(requested) = requested {
        if requested.is_positive() && filled == requested {
            return OrderResultStatus::Filled;
        }
    }
    if matches!(state, Some(ExchangeOrderState::Canceled | ExchangeOrderState::Expired)) {
        return OrderResultStatus::Canceled;
    }
    if filled.is_zero() {
        return OrderResultStatus::Pending;
    }
    match (requested, state) {
        (Some(_), _) => OrderResultStatus::FilledPartially,
        // Executions without a known order size: only an open order is partial
        (None, Some(ExchangeOrderState::Open)) => OrderResultStatus::FilledPartially,
        (None, _) => OrderResultStatus::Filled,
    }
}

/// Fold one fill into an existing aggregate, or start one from it
pub fn fold(existing: Option<ConsolidatedOrder>, fill: RawFill) -> Result<ConsolidatedOrder> {
    let mut order = match existing {
        Some(order) => order,
        None => ConsolidatedOrder::pending(fill.order_id.clone(), fill.symbol.clone(), fill.side, None),
    };
    order.apply(&fill)?;
    Ok(order)
}

/// Fold a batch of fills for possibly many orders, grouped by order id in
/// first-seen order
pub fn reconcile<I>(fills: I) -> Result<Vec<ConsolidatedOrder>>
where
    I: IntoIterator<Item = RawFill>,
{
    let mut index: HashMap<String, usize> = HashMap::new();
    let mut orders: Vec<ConsolidatedOrder> = Vec::new();

    for fill in fills {
        match index.get(&fill.order_id) {
            Some(&slot) => orders[slot].apply(&fill)?,
            None => {
                index.insert(fill.order_id.clone(), orders.len());
                orders.push(fold(None, fill)?);
            }
        }
    }
    Ok(orders)
}
