/// Format an integer amount of base units as an exact decimal string.
///
/// Trailing zeros of the fractional part are trimmed, so `1_500_000_000` lamports with 9 decimals
/// becomes `"1.5"`.
pub fn format_token_amount(amount: u128, decimals: u32) -> String {
	if decimals == 0 {
		return amount.to_string();
	}

	let digits = amount.to_string();
	let decimals = decimals as usize;
	let (whole, fraction) = if digits.len() > decimals {
		let split = digits.len() - decimals;
		(digits[..split].to_string(), digits[split..].to_string())
	} else {
		("0".to_string(), format!("{:0>width$}", digits, width = decimals))
	};

	let fraction = fraction.trim_end_matches('0');
	if fraction.is_empty() {
		whole
	} else {
		format!("{}.{}", whole, fraction)
	}
}
