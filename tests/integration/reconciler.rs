//! Fill consolidation: VWAP exactness, status derivation and independence
//! from arrival order and batching

use omniex_core::fixed;
use omniex_exchanges::prelude::*;
use omniex_exchanges::reconciler::{derive_status, fold, reconcile, ExchangeOrderState};
use proptest::prelude::*;
use rstest::rstest;

fn fill(order_id: &str, trade_id: &str, amount: Fixed, price: Fixed) -> RawFill {
    RawFill {
        order_id: order_id.to_string(),
        trade_id: Some(trade_id.to_string()),
        symbol: "BTC-USD".to_string(),
        side: OrderSide::Buy,
        amount,
        price,
        timestamp: 1_700_000_000_000,
        fee: None,
        fee_currency: None,
    }
}

fn order_of(requested: i64) -> ConsolidatedOrder {
    ConsolidatedOrder::pending("A", "BTC-USD", OrderSide::Buy, Some(Fixed::from_i64(requested)))
}

#[test]
fn test_weighted_average_not_arithmetic_mean() {
    let mut order = order_of(4);
    order.apply(&fill("A", "t1", fixed!(1), fixed!(10))).unwrap();
    order.apply(&fill("A", "t2", fixed!(3), fixed!(14))).unwrap();

    assert_eq!(order.filled_amount, fixed!(4));
    assert_eq!(order.average_price, fixed!(13));
    assert_eq!(order.status, OrderResultStatus::Filled);
    assert_eq!(order.remaining_amount(), Some(Fixed::ZERO));
}

#[test]
fn test_no_fills_is_pending() {
    let order = order_of(4);

    assert_eq!(order.status, OrderResultStatus::Pending);
    assert_eq!(order.average_price, Fixed::ZERO);
    assert!(!order.is_terminal());
}

#[test]
fn test_partial_then_full() {
    let mut order = order_of(5);
    order.apply(&fill("A", "t1", fixed!(2), fixed!(100))).unwrap();
    assert_eq!(order.status, OrderResultStatus::FilledPartially);

    order.apply(&fill("A", "t2", fixed!(3), fixed!(101))).unwrap();
    assert_eq!(order.status, OrderResultStatus::Filled);
    assert_eq!(order.average_price, Fixed::from_str_exact("100.6").unwrap());
    assert!(order.is_terminal());
}

#[test]
fn test_replayed_trade_is_applied_once() {
    let mut order = order_of(5);
    let first = fill("A", "t1", fixed!(2), fixed!(100));

    order.apply(&first).unwrap();
    order.apply(&first).unwrap();

    assert_eq!(order.filled_amount, fixed!(2));
    assert_eq!(order.fill_count, 1);
}

#[test]
fn test_fees_accumulate_in_one_currency() {
    let mut order = order_of(2);
    let mut a = fill("A", "t1", fixed!(1), fixed!(100));
    a.fee = Some(fixed!(0.1));
    a.fee_currency = Some("USD".to_string());
    let mut b = fill("A", "t2", fixed!(1), fixed!(100));
    b.fee = Some(fixed!(0.1));
    b.fee_currency = Some("usd".to_string());

    order.apply(&a).unwrap();
    order.apply(&b).unwrap();

    assert_eq!(order.fees, fixed!(0.2));
    assert_eq!(order.fee_currency.as_deref(), Some("USD"));
}

#[rstest]
#[case::side(|f: &mut RawFill| f.side = OrderSide::Sell)]
#[case::symbol(|f: &mut RawFill| f.symbol = "ETH-USD".to_string())]
#[case::order(|f: &mut RawFill| f.order_id = "B".to_string())]
#[case::zero_amount(|f: &mut RawFill| f.amount = Fixed::ZERO)]
#[case::negative_price(|f: &mut RawFill| f.price = -fixed!(1))]
#[case::zero_price(|f: &mut RawFill| f.price = Fixed::ZERO)]
#[case::overfill(|f: &mut RawFill| f.amount = fixed!(10))]
#[case::fee_currency(|f: &mut RawFill| f.fee_currency = Some("EUR".to_string()))]
fn test_inconsistent_fill_is_rejected_untouched(#[case] corrupt: fn(&mut RawFill)) {
    let mut order = order_of(3);
    let mut first = fill("A", "t1", fixed!(1), fixed!(10));
    first.fee_currency = Some("USD".to_string());
    order.apply(&first).unwrap();
    let before = order.clone();

    let mut bad = fill("A", "t2", fixed!(1), fixed!(11));
    corrupt(&mut bad);
    let err = order.apply(&bad).unwrap_err();

    assert_eq!(err.kind(), ErrorKind::Integrity);
    assert_eq!(order, before);
}

#[rstest]
#[case(Some(4), 0, Some(ExchangeOrderState::Open), OrderResultStatus::Pending)]
#[case(Some(4), 2, Some(ExchangeOrderState::Open), OrderResultStatus::FilledPartially)]
#[case(Some(4), 4, Some(ExchangeOrderState::Open), OrderResultStatus::Filled)]
#[case(Some(4), 2, Some(ExchangeOrderState::Canceled), OrderResultStatus::Canceled)]
#[case(Some(4), 0, Some(ExchangeOrderState::Expired), OrderResultStatus::Canceled)]
#[case(Some(4), 0, Some(ExchangeOrderState::Rejected), OrderResultStatus::Error)]
#[case(Some(4), 2, Some(ExchangeOrderState::Unrecognized("HALTED".into())), OrderResultStatus::Unknown)]
#[case(None, 2, Some(ExchangeOrderState::Open), OrderResultStatus::FilledPartially)]
#[case(None, 2, None, OrderResultStatus::Filled)]
fn test_status_derivation(
    #[case] requested: Option<i64>,
    #[case] filled: i64,
    #[case] state: Option<ExchangeOrderState>,
    #[case] expected: OrderResultStatus,
) {
    let status = derive_status(requested.map(Fixed::from_i64), Fixed::from_i64(filled), state.as_ref());
    assert_eq!(status, expected);
}

#[test]
fn test_native_states_map_or_stay_visible() {
    assert_eq!(ExchangeOrderState::from_native("PARTIALLY_FILLED"), ExchangeOrderState::Open);
    assert_eq!(ExchangeOrderState::from_native("cancelled"), ExchangeOrderState::Canceled);
    assert_eq!(
        ExchangeOrderState::from_native("PENDING_REVIEW"),
        ExchangeOrderState::Unrecognized("PENDING_REVIEW".to_string())
    );
}

#[test]
fn test_batch_groups_interleaved_orders() {
    let fills = vec![
        fill("A", "1", fixed!(1), fixed!(10)),
        fill("B", "2", fixed!(2), fixed!(20)),
        fill("A", "3", fixed!(3), fixed!(14)),
    ];

    let orders = reconcile(fills).unwrap();

    assert_eq!(orders.len(), 2);
    assert_eq!((orders[0].order_id.as_str(), orders[0].average_price), ("A", fixed!(13)));
    assert_eq!((orders[1].order_id.as_str(), orders[1].filled_amount), ("B", fixed!(2)));
}

/// `(amount in thousandths, price in cents)`
fn fills_strategy() -> impl Strategy<Value = Vec<RawFill>> {
    prop::collection::vec((1i64..50_000, 1i64..10_000_000), 1..24).prop_map(|raw| {
        raw.into_iter()
            .enumerate()
            .map(|(i, (amount, price))| {
                let amount = Fixed::from_i64(amount).checked_div(Fixed::from_i64(1_000)).unwrap();
                let price = Fixed::from_i64(price).checked_div(Fixed::from_i64(100)).unwrap();
                let mut f = fill("A", &format!("t{i}"), amount, price);
                f.timestamp = 1_700_000_000_000 + i as u64;
                f
            })
            .collect()
    })
}

fn aggregate(order: &ConsolidatedOrder) -> (Fixed, Fixed, Fixed, usize, Option<u64>, Option<u64>) {
    (
        order.filled_amount,
        order.notional,
        order.average_price,
        order.fill_count,
        order.first_fill_at,
        order.last_fill_at,
    )
}

proptest! {
    #[test]
    fn prop_arrival_order_does_not_matter(
        (fills, shuffled) in fills_strategy().prop_flat_map(|fills| (Just(fills.clone()), Just(fills).prop_shuffle()))
    ) {
        let batch = reconcile(fills).unwrap();
        let streamed = shuffled.into_iter().try_fold(None, |acc, f| fold(acc, f).map(Some)).unwrap().unwrap();

        prop_assert_eq!(batch.len(), 1);
        prop_assert_eq!(aggregate(&batch[0]), aggregate(&streamed));
        prop_assert_eq!(&batch[0].trade_ids, &streamed.trade_ids);
    }

    #[test]
    fn prop_history_then_stream_equals_one_batch(fills in fills_strategy(), split in any::<prop::sample::Index>()) {
        let at = split.index(fills.len() + 1);
        let (history, live) = fills.split_at(at);

        let mut order = reconcile(history.to_vec()).unwrap().pop();
        for f in live {
            order = Some(fold(order, f.clone()).unwrap());
        }
        let whole = reconcile(fills.clone()).unwrap();

        prop_assert_eq!(aggregate(&order.unwrap()), aggregate(&whole[0]));
    }

    #[test]
    fn prop_vwap_is_notional_over_amount(fills in fills_strategy()) {
        let order = reconcile(fills.clone()).unwrap().remove(0);
        let amount = fills.iter().fold(Fixed::ZERO, |sum, f| sum + f.amount);
        let notional = fills.iter().fold(Fixed::ZERO, |sum, f| sum + f.price * f.amount);

        prop_assert_eq!(order.filled_amount, amount);
        prop_assert_eq!(order.average_price, notional.checked_div(amount).unwrap());
    }
}
