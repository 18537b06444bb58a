/// The single definition of "should this alert fire": both the periodic
/// engine and the immediate post-creation check go through here, so the two
/// paths can never disagree on what a trigger means.
///
/// Never panics and never fires on bad data: non-finite prices and unknown
/// condition strings evaluate to false.
pub fn should_trigger(condition: &str, current_price: f64, target_price: f64) -> bool {
    if !current_price.is_finite() || !target_price.is_finite() {
        return false;
    }

    match condition {
        "above" => current_price >= target_price,
        "below" => current_price <= target_price,
        _ => false,
    }
}
