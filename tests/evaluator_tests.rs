use coinsentry::services::evaluator::should_trigger;

#[test]
fn above_fires_at_and_past_target() {
    assert!(should_trigger("above", 50500.0, 50000.0));
    assert!(should_trigger("above", 50000.0, 50000.0));
    assert!(!should_trigger("above", 49999.99, 50000.0));
}

#[test]
fn below_fires_at_and_under_target() {
    assert!(should_trigger("below", 0.38, 0.40));
    assert!(should_trigger("below", 0.40, 0.40));
    assert!(!should_trigger("below", 0.41, 0.40));
}

#[test]
fn unknown_condition_never_fires() {
    assert!(!should_trigger("equals", 100.0, 100.0));
    assert!(!should_trigger("", 100.0, 1.0));
    assert!(!should_trigger("ABOVE", 100.0, 1.0));
}

#[test]
fn non_finite_prices_never_fire() {
    assert!(!should_trigger("above", f64::NAN, 50000.0));
    assert!(!should_trigger("above", 50500.0, f64::NAN));
    assert!(!should_trigger("above", f64::INFINITY, 50000.0));
    assert!(!should_trigger("below", f64::NEG_INFINITY, 50000.0));
}
