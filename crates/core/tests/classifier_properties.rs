#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
//! Property tests for the intent classifier.

use proptest::prelude::*;
use switchyard_core::{Classifier, Intent, Tier};

proptest! {
    #[test]
    fn classify_is_pure(message in ".{0,400}", depth in 0usize..100) {
        let classifier = Classifier::default();
        let first = classifier.classify(&message, depth);
        let second = classifier.classify(&message, depth);
        prop_assert_eq!(first, second);
    }

    #[test]
    fn padding_never_lowers_tier(message in "[a-z ]{0,200}", pad in 0usize..1_000, depth in 0usize..60) {
        let classifier = Classifier::default();
        let base = classifier.classify(&message, depth);
        let padded = format!("{}{}", message, ".".repeat(pad));
        let longer = classifier.classify(&padded, depth);
        prop_assert_eq!(base.intent, longer.intent);
        prop_assert!(longer.tier >= base.tier);
    }

    #[test]
    fn deeper_context_never_lowers_tier(message in "[a-z ]{0,200}", depth in 0usize..60, extra in 0usize..60) {
        let classifier = Classifier::default();
        let shallow = classifier.classify(&message, depth);
        let deep = classifier.classify(&message, depth + extra);
        prop_assert!(deep.tier >= shallow.tier);
    }

    #[test]
    fn chat_has_no_tools(message in "[0-9 ]{0,50}") {
        let c = Classifier::default().classify(&message, 0);
        prop_assert_eq!(c.intent, Intent::Chat);
        prop_assert!(c.tools().is_empty());
        prop_assert_eq!(c.tier, Tier::Simple);
    }
}
