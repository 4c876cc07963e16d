//! Cross-crate unit tests
//!
//! Parameterized cases with rstest, properties with proptest, a mocked
//! clock with mockall, and environment-touching tests serialized with
//! serial_test.

use omniex_core::fixed;
use omniex_core::prelude::*;
use omniex_exchanges::prelude::*;
use omniex_exchanges::symbols::{AlgorithmicNormalizer, TableNormalizer};
use proptest::prelude::*;
use rstest::*;
use serial_test::serial;
use std::sync::Arc;

// ============================================================================
// NONCES AGAINST A MOCKED CLOCK
// ============================================================================

mod nonces {
    use super::*;
    use mockall::mock;

    mock! {
        pub WallClock {}

        impl Clock for WallClock {
            fn now_nanos(&self) -> u64;
        }
    }

    fn frozen_at(millis: u64) -> Arc<MockWallClock> {
        let mut clock = MockWallClock::new();
        clock.expect_now_nanos().return_const(millis * 1_000_000);
        Arc::new(clock)
    }

    #[test]
    fn test_same_millisecond_still_increases() {
        let nonces = NonceGenerator::with_clock(NonceFormat::UnixMillis, frozen_at(1_700_000_000_000));

        let values: Vec<u64> = (0..5).map(|_| nonces.next().value()).collect();
        assert_eq!(
            values,
            vec![1_700_000_000_000, 1_700_000_000_001, 1_700_000_000_002, 1_700_000_000_003, 1_700_000_000_004]
        );
    }

    #[test]
    fn test_clock_stepping_backwards_never_repeats() {
        let mut clock = MockWallClock::new();
        let mut readings = vec![2_000u64, 1_000, 1_500].into_iter();
        clock
            .expect_now_nanos()
            .times(3)
            .returning(move || readings.next().unwrap_or(0) * 1_000_000);
        let nonces = NonceGenerator::with_clock(NonceFormat::UnixMillis, Arc::new(clock));

        let a = nonces.next().value();
        let b = nonces.next().value();
        let c = nonces.next().value();
        assert!(a < b && b < c, "{a} {b} {c}");
    }

    #[test]
    fn test_offset_shifts_wall_clock() {
        let nonces = NonceGenerator::with_clock(NonceFormat::UnixSeconds, frozen_at(1_700_000_000_000));
        nonces.set_offset_millis(-5_000);

        assert_eq!(nonces.next().value(), 1_699_999_995);
    }

    #[rstest]
    #[case(NonceFormat::UnixMillisString, true)]
    #[case(NonceFormat::UnixSecondsString, true)]
    #[case(NonceFormat::UnixMillis, false)]
    #[case(NonceFormat::Counter, false)]
    fn test_wire_type(#[case] format: NonceFormat, #[case] is_text: bool) {
        let nonces = NonceGenerator::with_clock(format, frozen_at(1_700_000_000_000));
        assert_eq!(nonces.next().to_json().is_string(), is_text);
    }

    #[test]
    fn test_concurrent_callers_get_distinct_values() {
        let nonces = Arc::new(NonceGenerator::new(NonceFormat::Counter));
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let nonces = Arc::clone(&nonces);
                std::thread::spawn(move || (0..250).map(|_| nonces.next().value()).collect::<Vec<_>>())
            })
            .collect();

        let mut all: Vec<u64> = handles.into_iter().flat_map(|h| h.join().unwrap()).collect();
        all.sort_unstable();
        all.dedup();
        assert_eq!(all.len(), 1_000);
    }

    proptest! {
        #[test]
        fn prop_offset_changes_never_break_monotonicity(offsets in prop::collection::vec(-60_000i64..60_000, 1..20)) {
            let nonces = NonceGenerator::with_clock(NonceFormat::UnixMillis, frozen_at(1_700_000_000_000));
            let mut last = nonces.next().value();
            for offset in offsets {
                nonces.set_offset_millis(offset);
                let next = nonces.next().value();
                prop_assert!(next > last, "{} after {}", next, last);
                last = next;
            }
        }
    }
}

// ============================================================================
// SYMBOL NORMALIZATION
// ============================================================================

mod symbols {
    use super::*;

    #[rstest]
    #[case(AlgorithmicNormalizer::new("dash"), "BTC-USD", "BTC-USD")]
    #[case(AlgorithmicNormalizer::new("under").with_separator("_").lowercase(), "BTC-USD", "btc_usd")]
    #[case(AlgorithmicNormalizer::new("slash").with_separator("/"), "ETH-EUR", "ETH/EUR")]
    #[case(AlgorithmicNormalizer::new("flipped").quote_first(), "ETH-BTC", "BTC-ETH")]
    #[case(AlgorithmicNormalizer::new("joined").without_separator(["USDT", "BTC"]), "ETH-USDT", "ETHUSDT")]
    fn test_algorithmic_round_trip(
        #[case] normalizer: AlgorithmicNormalizer,
        #[case] canonical: &str,
        #[case] native: &str,
    ) {
        assert_eq!(normalizer.to_exchange(canonical).unwrap(), native);
        assert_eq!(normalizer.to_canonical(native).unwrap(), canonical);
    }

    #[rstest]
    #[case("")]
    #[case("BTC")]
    #[case("BTC-")]
    #[case("btc-usd")]
    #[case("BTC-USD-X")]
    fn test_malformed_canonical_symbols_fail_closed(#[case] symbol: &str) {
        let err = AlgorithmicNormalizer::new("dash").to_exchange(symbol).unwrap_err();
        assert!(matches!(err, ExchangeError::UnknownSymbol { .. }), "{symbol}: {err}");
    }

    #[test]
    fn test_table_wins_over_fallback() {
        let table = TableNormalizer::new("legacy", [("XBTUSD", "BTC-USD")])
            .unwrap()
            .with_fallback(AlgorithmicNormalizer::new("legacy").without_separator(["USD"]));

        assert_eq!(table.to_exchange("BTC-USD").unwrap(), "XBTUSD");
        assert_eq!(table.to_exchange("ETH-USD").unwrap(), "ETHUSD");
        // "BTCUSD" would derive to the tabled pair under a second spelling
        assert!(table.to_canonical("BTCUSD").is_err());
    }

    proptest! {
        #[test]
        fn prop_separator_round_trip(base in "[A-Z][A-Z0-9]{1,7}", quote in "[A-Z]{3,5}") {
            let canonical = format!("{base}-{quote}");
            let normalizer = AlgorithmicNormalizer::new("under").with_separator("_").lowercase();

            let native = normalizer.to_exchange(&canonical).unwrap();
            prop_assert_eq!(normalizer.to_canonical(&native).unwrap(), canonical);
        }
    }
}

// ============================================================================
// ERROR TAXONOMY
// ============================================================================

mod errors {
    use super::*;

    #[rstest]
    #[case(ExchangeError::Network("reset".into()), ErrorKind::Transport, true)]
    #[case(ExchangeError::Timeout("slow".into()), ErrorKind::Transport, true)]
    #[case(ExchangeError::Http { status: 503, body: "busy".into() }, ErrorKind::Transport, true)]
    #[case(ExchangeError::auth(Some(-2015), "Invalid API-key"), ErrorKind::Auth, false)]
    #[case(ExchangeError::domain(None, "Insufficient balance"), ErrorKind::Domain, false)]
    #[case(ExchangeError::unknown_symbol("x", "FOO-BAR"), ErrorKind::Domain, false)]
    #[case(ExchangeError::Integrity("side mismatch".into()), ErrorKind::Integrity, false)]
    #[case(ExchangeError::not_supported("x", "subscribe_fills"), ErrorKind::NotSupported, false)]
    #[case(ExchangeError::Configuration("bad url".into()), ErrorKind::Configuration, false)]
    fn test_kind_and_retryability(#[case] error: ExchangeError, #[case] kind: ErrorKind, #[case] retryable: bool) {
        assert_eq!(error.kind(), kind);
        assert_eq!(error.is_retryable(), retryable);
    }

    #[test]
    fn test_exchange_message_is_verbatim() {
        let error = ExchangeError::domain(Some(-2010), "Account has insufficient balance for requested action.");
        assert_eq!(
            error.exchange_message(),
            Some("Account has insufficient balance for requested action.")
        );
        assert_eq!(error.exchange_code(), Some(-2010));
    }
}

// ============================================================================
// CONFIGURATION AND ENVIRONMENT
// ============================================================================

mod configuration {
    use super::*;

    #[test]
    fn test_partial_json_config_uses_defaults() {
        let config = ExchangeConfig::from_json_str(
            r#"{"name": "mockex", "base_url": "https://api.mockex.test", "request_timeout_ms": 2500}"#,
        )
        .unwrap();

        assert_eq!(config.request_timeout_ms, 2500);
        assert_eq!(config.metadata_ttl_ms, ExchangeConfig::default().metadata_ttl_ms);
        assert!(config.rate_limit.is_some());
    }

    #[rstest]
    #[case(r#"{"name": "", "base_url": "https://x.test"}"#)]
    #[case(r#"{"name": "x", "base_url": "not a url"}"#)]
    #[case(r#"{"name": "x", "base_url": "https://x.test", "rate_limit": {"max_requests": 0, "per_ms": 1000}}"#)]
    #[case(r#"{"name": "x", "base_url": "https://x.test", "stream_keepalive_ms": 0}"#)]
    fn test_invalid_config_is_rejected(#[case] json: &str) {
        let err = ExchangeConfig::from_json_str(json).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Configuration);
    }

    #[test]
    #[serial]
    fn test_credentials_from_env() {
        std::env::set_var("MOCK_EX_API_KEY", "env-key");
        std::env::set_var("MOCK_EX_SECRET_KEY", "env-secret");
        std::env::remove_var("MOCK_EX_PASSPHRASE");

        let config = ExchangeConfig::new("mock-ex", "https://api.mockex.test");
        let credentials = config.credentials_from_env().unwrap();
        assert_eq!(credentials.public_key(), "env-key");
        assert!(credentials.passphrase().is_none());
        assert!(!format!("{credentials:?}").contains("env-secret"));

        std::env::remove_var("MOCK_EX_API_KEY");
        std::env::remove_var("MOCK_EX_SECRET_KEY");
    }

    #[test]
    #[serial]
    fn test_missing_env_credentials() {
        std::env::remove_var("MOCK_EX_API_KEY");

        let config = ExchangeConfig::new("mock-ex", "https://api.mockex.test");
        assert!(matches!(
            config.credentials_from_env(),
            Err(ExchangeError::MissingCredentials(name)) if name == "MOCK_EX_API_KEY"
        ));
    }
}

// ============================================================================
// EXACT DECIMALS
// ============================================================================

mod decimals {
    use super::*;

    #[test]
    fn test_vwap_inputs_stay_exact() {
        let notional = fixed!(0.1) * fixed!(3) + fixed!(0.2) * fixed!(3);
        assert_eq!(notional, fixed!(0.9));
        assert_eq!(notional.checked_div(fixed!(6)).unwrap(), fixed!(0.15));
    }

    #[test]
    fn test_division_by_zero_is_an_error() {
        assert!(fixed!(1).checked_div(Fixed::ZERO).is_err());
    }

    proptest! {
        #[test]
        fn prop_plain_string_parses_back(units in 0i64..1_000_000_000, scale in 0u32..8) {
            let value = Fixed::from_i64(units).checked_div(Fixed::from_i64(10i64.pow(scale))).unwrap();
            prop_assert_eq!(Fixed::from_str_exact(&value.to_plain_string()).unwrap(), value);
        }
    }
}
