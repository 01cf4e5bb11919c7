/// Property-based tests using proptest
/// Tests invariants that should hold for all inputs
use proptest::prelude::*;
use rust_lead_scout::models::RawCandidate;
use rust_lead_scout::providers::{normalize_phone, split_address, synthetic};
use rust_lead_scout::scorer::{clamp_score, fallback_score, parse_remote_score};

fn arb_candidate() -> impl Strategy<Value = RawCandidate> {
    (
        "[A-Za-z ]{1,30}",
        proptest::option::of("[0-9()+ -]{7,16}"),
        proptest::option::of("https://[a-z]{3,12}\\.com"),
        proptest::option::of(-1.0f64..6.0),
        proptest::option::of(-10i32..5000),
    )
        .prop_map(|(name, phone, website, rating, review_count)| RawCandidate {
            business_name: name,
            phone,
            website,
            rating,
            review_count,
            ..Default::default()
        })
}

// Property: every score that can be accepted lies in [0, 100]
proptest! {
    #[test]
    fn fallback_score_is_bounded(candidate in arb_candidate()) {
        let scored = fallback_score(&candidate);
        prop_assert!((0..=100).contains(&scored.score));
        prop_assert_eq!(scored.factors.len(), 3);
    }

    #[test]
    fn fallback_score_is_deterministic(candidate in arb_candidate()) {
        prop_assert_eq!(fallback_score(&candidate), fallback_score(&candidate));
    }

    #[test]
    fn remote_scores_are_clamped(raw in proptest::num::f64::NORMAL) {
        let score = clamp_score(raw);
        prop_assert!((0..=100).contains(&score));
    }

    #[test]
    fn remote_parser_never_panics(content in "\\PC*") {
        if let Ok(parsed) = parse_remote_score(&content) {
            prop_assert!((0..=100).contains(&parsed.score));
        }
    }
}

// Property: address and phone parsing never panic on arbitrary input
proptest! {
    #[test]
    fn split_address_never_panics(address in "\\PC*", location in "\\PC*") {
        let _ = split_address(&address, &location);
    }

    #[test]
    fn well_formed_addresses_split_cleanly(
        street in "[0-9]{1,5} [A-Z][a-z]{2,10} (St|Ave|Rd)",
        city in "[A-Z][a-z]{2,12}",
        state in "[A-Z]{2}",
        zip in "[0-9]{5}"
    ) {
        let full = format!("{}, {}, {} {}", street, city, state, zip);
        let parts = split_address(&full, "Elsewhere, ZZ");
        prop_assert_eq!(parts.street, street);
        prop_assert_eq!(parts.city, city);
        prop_assert_eq!(parts.state, state);
        prop_assert_eq!(parts.zip_code, zip);
    }

    #[test]
    fn phone_normalization_never_panics(phone in "\\PC*") {
        let _ = normalize_phone(Some(&phone));
    }
}

// Property: the synthetic provider is a pure function of its inputs
proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    #[test]
    fn synthetic_output_is_reproducible(
        query in "[a-z]{3,12}",
        location in "[A-Z][a-z]{2,10}, [A-Z]{2}",
        count in 0usize..20
    ) {
        let first = synthetic::generate(&query, &location, count);
        prop_assert_eq!(first.len(), count);
        prop_assert_eq!(first, synthetic::generate(&query, &location, count));
    }
}
