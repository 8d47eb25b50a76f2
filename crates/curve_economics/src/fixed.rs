//! Fixed-point helpers for micro-unit settlement arithmetic.
//!
//! Settled quantities (tokens and reserve currency) are integers in
//! micro-units, 1 whole unit = 1_000_000 micro-units. Intermediate values are
//! exact [`Decimal`]s and are truncated toward zero when settled.

use crate::errors::CurveError;
use crate::types::Micro;
use rust_decimal::prelude::{FromPrimitive, ToPrimitive};
use rust_decimal::Decimal;

/// 1 whole unit = 1 000 000 micro-units
pub const MICRO_PER_UNIT: Micro = 1_000_000;

/// Lift a micro-unit amount into exact decimal arithmetic.
pub fn to_decimal(amount: Micro) -> Result<Decimal, CurveError> {
    Decimal::from_u128(amount).ok_or(CurveError::ArithmeticOverflow(
        "micro amount exceeds decimal range",
    ))
}

/// Settle a decimal into micro-units, truncating toward zero.
/// Negative values clamp to zero.
pub fn truncate_micro(value: Decimal) -> Result<Micro, CurveError> {
    if value.is_sign_negative() {
        return Ok(0);
    }
    value
        .trunc()
        .to_u128()
        .ok_or(CurveError::ArithmeticOverflow("decimal exceeds micro range"))
}

pub fn mul(a: Decimal, b: Decimal, context: &'static str) -> Result<Decimal, CurveError> {
    a.checked_mul(b).ok_or(CurveError::ArithmeticOverflow(context))
}

pub fn div(a: Decimal, b: Decimal, context: &'static str) -> Result<Decimal, CurveError> {
    if b.is_zero() {
        return Err(CurveError::ArithmeticOverflow(context));
    }
    a.checked_div(b).ok_or(CurveError::ArithmeticOverflow(context))
}

pub fn add(a: Decimal, b: Decimal, context: &'static str) -> Result<Decimal, CurveError> {
    a.checked_add(b).ok_or(CurveError::ArithmeticOverflow(context))
}

/// `a - b`, clamped to zero.
pub fn sub_clamped(a: Decimal, b: Decimal) -> Decimal {
    a.checked_sub(b)
        .map(|d| d.max(Decimal::ZERO))
        .unwrap_or(Decimal::ZERO)
}

/// `floor(amount × price)` in micro-units.
pub fn mul_price(amount: Micro, price: Decimal) -> Result<Micro, CurveError> {
    truncate_micro(mul(to_decimal(amount)?, price, "amount × price")?)
}

/// `floor(funds / price)` in micro-units.
pub fn div_price(funds: Micro, price: Decimal) -> Result<Micro, CurveError> {
    if price <= Decimal::ZERO {
        return Err(CurveError::InvalidState(format!(
            "non-positive price {price}"
        )));
    }
    truncate_micro(div(to_decimal(funds)?, price, "funds / price")?)
}

pub fn checked_add_micro(a: Micro, b: Micro, context: &'static str) -> Result<Micro, CurveError> {
    a.checked_add(b).ok_or(CurveError::ArithmeticOverflow(context))
}

/// Convert whole units (e.g. `1.5` tokens) into micro-units.
pub fn whole_to_micro(whole: Decimal) -> Result<Micro, CurveError> {
    truncate_micro(mul(whole, to_decimal(MICRO_PER_UNIT)?, "whole → micro")?)
}

/// Convert micro-units into whole units.
pub fn micro_to_whole(amount: Micro) -> Result<Decimal, CurveError> {
    div(to_decimal(amount)?, to_decimal(MICRO_PER_UNIT)?, "micro → whole")
}

/// Parse a whole-unit amount such as `"0.0011"` into micro-units.
///
/// Rejects negative, zero and malformed input, so it doubles as deposit
/// validation for callers that accept amounts as text.
pub fn parse_deposit(text: &str) -> Result<Micro, CurveError> {
    let whole: Decimal = text
        .trim()
        .parse()
        .map_err(|e| CurveError::InvalidDeposit(format!("malformed amount {text:?}: {e}")))?;
    if whole <= Decimal::ZERO {
        return Err(CurveError::InvalidDeposit(format!(
            "amount must be positive, got {whole}"
        )));
    }
    let micro = whole_to_micro(whole)?;
    if micro == 0 {
        return Err(CurveError::InvalidDeposit(format!(
            "amount {whole} is below one micro-unit"
        )));
    }
    Ok(micro)
}

/// Render micro-units as a whole-unit string with six decimals.
pub fn format_micro(amount: Micro) -> String {
    format!(
        "{}.{:06}",
        amount / MICRO_PER_UNIT,
        amount % MICRO_PER_UNIT
    )
}

/// Serde adapter for [`Micro`] fields in configuration documents.
///
/// TOML has no integer type wider than `i64`, so amounts are written as plain
/// integers when they fit and as decimal strings otherwise. Both forms are
/// accepted on input.
pub mod serde_micro {
    use super::Micro;
    use serde::de::Error as _;
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    #[derive(Serialize, Deserialize)]
    #[serde(untagged)]
    enum Repr {
        Int(u64),
        Text(String),
    }

    impl From<Micro> for Repr {
        fn from(amount: Micro) -> Self {
            match i64::try_from(amount) {
                Ok(small) => Repr::Int(small.unsigned_abs()),
                Err(_) => Repr::Text(amount.to_string()),
            }
        }
    }

    impl Repr {
        fn into_micro(self) -> Result<Micro, String> {
            match self {
                Repr::Int(v) => Ok(Micro::from(v)),
                Repr::Text(text) => text
                    .trim()
                    .parse()
                    .map_err(|e| format!("invalid micro-unit amount {text:?}: {e}")),
            }
        }
    }

    pub fn serialize<S: Serializer>(amount: &Micro, serializer: S) -> Result<S::Ok, S::Error> {
        Repr::from(*amount).serialize(serializer)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Micro, D::Error> {
        Repr::deserialize(deserializer)?
            .into_micro()
            .map_err(D::Error::custom)
    }

    pub mod option {
        use super::*;

        pub fn serialize<S: Serializer>(
            amount: &Option<Micro>,
            serializer: S,
        ) -> Result<S::Ok, S::Error> {
            amount.map(Repr::from).serialize(serializer)
        }

        pub fn deserialize<'de, D: Deserializer<'de>>(
            deserializer: D,
        ) -> Result<Option<Micro>, D::Error> {
            Option::<Repr>::deserialize(deserializer)?
                .map(Repr::into_micro)
                .transpose()
                .map_err(D::Error::custom)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn truncation_is_toward_zero() {
        assert_eq!(truncate_micro(Decimal::new(19_999, 4)).unwrap(), 1);
        assert_eq!(truncate_micro(Decimal::new(-5, 0)).unwrap(), 0);
    }

    #[test]
    fn price_helpers_truncate() {
        let price = Decimal::new(1001, 7); // 0.0001001
        assert_eq!(mul_price(10_990_009, price).unwrap(), 1_100);
        assert_eq!(div_price(1_100, price).unwrap(), 10_989_010);
        assert!(div_price(1, Decimal::ZERO).is_err());
    }

    #[test]
    fn deposit_parsing() {
        assert_eq!(parse_deposit("1.002312").unwrap(), 1_002_312);
        assert_eq!(parse_deposit(" 0.0011 ").unwrap(), 1_100);
        assert!(matches!(
            parse_deposit("0"),
            Err(CurveError::InvalidDeposit(_))
        ));
        assert!(matches!(
            parse_deposit("-1"),
            Err(CurveError::InvalidDeposit(_))
        ));
        assert!(matches!(
            parse_deposit("ten"),
            Err(CurveError::InvalidDeposit(_))
        ));
        assert!(matches!(
            parse_deposit("0.0000001"),
            Err(CurveError::InvalidDeposit(_))
        ));
    }

    #[test]
    fn formatting() {
        assert_eq!(format_micro(10_002_099), "10.002099");
        assert_eq!(format_micro(100_000_000_000), "100000.000000");
        assert_eq!(micro_to_whole(1_500_000).unwrap(), Decimal::new(15, 1));
    }

    #[test]
    fn micro_fields_accept_integers_and_strings() {
        #[derive(serde::Serialize, serde::Deserialize, Debug, PartialEq)]
        struct Doc {
            #[serde(with = "serde_micro")]
            amount: Micro,
            #[serde(default, with = "serde_micro::option")]
            cap: Option<Micro>,
        }

        let doc: Doc = serde_json::from_str(r#"{"amount":100000000000}"#).unwrap();
        assert_eq!(doc, Doc { amount: 100_000_000_000, cap: None });

        let huge = Micro::from(u64::MAX) * 4;
        let doc: Doc =
            serde_json::from_str(&format!(r#"{{"amount":"{huge}","cap":"7"}}"#)).unwrap();
        assert_eq!(doc.amount, huge);
        assert_eq!(doc.cap, Some(7));

        let json = serde_json::to_string(&doc).unwrap();
        assert_eq!(json, format!(r#"{{"amount":"{huge}","cap":7}}"#));
        assert!(serde_json::from_str::<Doc>(r#"{"amount":"lots"}"#).is_err());
    }

    #[test]
    fn clamped_subtraction() {
        assert_eq!(sub_clamped(Decimal::ONE, Decimal::TWO), Decimal::ZERO);
        assert_eq!(sub_clamped(Decimal::TWO, Decimal::ONE), Decimal::ONE);
    }
}
