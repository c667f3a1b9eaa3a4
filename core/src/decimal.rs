//! Decimal helpers: tick/step rounding and basis-point conversions.
//!
//! All prices, sizes and notionals flow through `rust_decimal::Decimal`
//! (scale sufficient for 1e-8); no floating point is used on any path
//! that touches money.

use rust_decimal::Decimal;

pub const BPS_DIVISOR: Decimal = Decimal::from_parts(10000, 0, 0, false, 0);
pub const HUNDRED: Decimal = Decimal::from_parts(100, 0, 0, false, 0);

/// Rounds `price` down to the nearest multiple of `tick_size`.
pub fn round_down_to_tick(price: Decimal, tick_size: Decimal) -> Decimal {
    if tick_size.is_zero() {
        return price;
    }
    (price / tick_size).floor() * tick_size
}

/// Rounds `price` up to the nearest multiple of `tick_size`.
pub fn round_up_to_tick(price: Decimal, tick_size: Decimal) -> Decimal {
    if tick_size.is_zero() {
        return price;
    }
    (price / tick_size).ceil() * tick_size
}

/// Rounds `quantity` down to the nearest multiple of `step_size`.
pub fn round_down_to_step(quantity: Decimal, step_size: Decimal) -> Decimal {
    round_down_to_tick(quantity, step_size)
}

/// Converts a basis-point value to its fractional decimal form (`bps/10000`).
pub fn bps_to_fraction(bps: Decimal) -> Decimal {
    bps / BPS_DIVISOR
}

/// Converts a fraction to basis points (`fraction*10000`).
pub fn fraction_to_bps(fraction: Decimal) -> Decimal {
    fraction * BPS_DIVISOR
}
