//! Conversions between raw integer amounts and human-readable decimal amounts.

use alloy_core::primitives::U256;

/// Decimals of the native currency.
pub const NATIVE_DECIMALS: u8 = 18;

/// Convert an ETH amount (f64) to wei.
///
/// Rounds to gwei precision (9 decimal places) to avoid floating-point noise,
/// then scales to wei.
pub fn eth_to_wei(eth: f64) -> U256 {
    let gwei = (eth * 1e9).round().max(0.0) as u128;
    U256::from(gwei) * U256::from(1_000_000_000u64)
}

/// Render `value` as a decimal number with `decimals` fractional digits, trimming
/// trailing zeros (`1500000` with 6 decimals is `1.5`).
pub fn format_units(value: U256, decimals: u8) -> String {
    if decimals == 0 {
        return value.to_string();
    }

    let base = U256::from(10u64).pow(U256::from(decimals));
    let whole = value / base;
    let frac = value % base;
    if frac.is_zero() {
        return whole.to_string();
    }

    let frac = format!("{:0>width$}", frac.to_string(), width = decimals as usize);
    format!("{}.{}", whole, frac.trim_end_matches('0'))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_eth_to_wei() {
        assert_eq!(eth_to_wei(1.0), U256::from(1_000_000_000_000_000_000u128));
        assert_eq!(eth_to_wei(0.1), U256::from(100_000_000_000_000_000u128));
        assert_eq!(eth_to_wei(0.05), U256::from(50_000_000_000_000_000u128));
        assert_eq!(eth_to_wei(0.7), U256::from(700_000_000_000_000_000u128));
    }

    #[test]
    fn test_format_units() {
        assert_eq!(format_units(U256::from(1_500_000u64), 6), "1.5");
        assert_eq!(format_units(U256::from(1_000_000u64), 6), "1");
        assert_eq!(format_units(U256::from(1u64), 18), "0.000000000000000001");
        assert_eq!(format_units(U256::ZERO, 18), "0");
        assert_eq!(format_units(U256::from(42u64), 0), "42");
        assert_eq!(
            format_units(U256::from(50_000_000_000_000_000u128), NATIVE_DECIMALS),
            "0.05"
        );
    }
}
