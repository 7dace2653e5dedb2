// Price/quantity quantization against venue tick and step sizes

use rust_decimal::prelude::{FromPrimitive, ToPrimitive};
use rust_decimal::{Decimal, RoundingStrategy};

/// Lift a float into decimal space; NaN and infinities become zero
pub fn to_decimal(value: f64) -> Decimal {
    Decimal::from_f64(value).unwrap_or(Decimal::ZERO)
}

pub fn to_f64(value: Decimal) -> f64 {
    value.to_f64().unwrap_or(0.0)
}

/// Number of decimal places a step carries, read from its own decimal
/// representation with trailing zeros stripped (0.00100000 -> 3, 1.0 -> 0)
pub fn step_decimals(step: Decimal) -> u32 {
    step.normalize().scale()
}

/// Floor `value` onto the step grid. Used for quantities: the result is a
/// multiple of `step` and never larger than `value`.
pub fn floor_to_step(value: Decimal, step: Decimal) -> Decimal {
    if step <= Decimal::ZERO {
        return value.trunc();
    }
    match value.checked_div(step) {
        Some(units) => units.floor() * step,
        None => value.trunc(),
    }
}

/// Round `value` to the nearest tick, halves away from zero. Used for prices.
pub fn round_to_tick(value: Decimal, tick: Decimal) -> Decimal {
    if tick <= Decimal::ZERO {
        return value.round_dp_with_strategy(0, RoundingStrategy::MidpointAwayFromZero);
    }
    match value.checked_div(tick) {
        Some(units) => {
            units.round_dp_with_strategy(0, RoundingStrategy::MidpointAwayFromZero) * tick
        }
        None => value,
    }
}

/// Render a quantized value with exactly as many decimals as the step carries
pub fn format_to_step(value: Decimal, step: Decimal) -> String {
    let decimals = if step > Decimal::ZERO { step_decimals(step) } else { 0 };
    let mut rendered = value.round_dp_with_strategy(decimals, RoundingStrategy::ToZero);
    rendered.rescale(decimals);
    rendered.to_string()
}
