// Copyright (c) 2024 The Botho Foundation

//! Fixed-point USD prices.
//!
//! Prices are held as an integer count of 10^-18 USD so that every
//! conversion is exact integer arithmetic and reproducible across platforms.
//! They are parsed from decimal strings (optionally in exponent notation, as
//! produced by JSON price feeds), never from binary floating point.

use alloy_primitives::U256;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::{
    error::{BridgeError, BridgeResult},
    token::{Asset, SourceToken},
};

/// Number of fractional decimal digits carried by [`UsdPrice`].
pub const PRICE_DECIMALS: u32 = 18;

/// 10^PRICE_DECIMALS
pub const PRICE_SCALE: u128 = 1_000_000_000_000_000_000;

/// A non-negative USD amount with 18 fractional digits.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct UsdPrice(u128);

impl UsdPrice {
    pub const ZERO: UsdPrice = UsdPrice(0);

    /// Construct from a raw count of 10^-18 USD.
    pub const fn from_raw(raw: u128) -> Self {
        UsdPrice(raw)
    }

    /// Construct from a whole number of dollars.
    pub fn from_dollars(dollars: u64) -> Self {
        UsdPrice(dollars as u128 * PRICE_SCALE)
    }

    pub fn raw(&self) -> u128 {
        self.0
    }

    pub fn is_zero(&self) -> bool {
        self.0 == 0
    }

    /// Parse a decimal string such as `"0.50"`, `"12"` or `"1.5e-7"`.
    ///
    /// Digits beyond the 18th fractional place are truncated.
    pub fn parse(s: &str) -> BridgeResult<Self> {
        let invalid = |why: &str| BridgeError::InvalidPrice(format!("{:?}: {}", s, why));

        let trimmed = s.trim();
        if trimmed.starts_with('-') {
            return Err(invalid("price must not be negative"));
        }
        let trimmed = trimmed.strip_prefix('+').unwrap_or(trimmed);

        let (mantissa, exponent) = match trimmed.find(['e', 'E']) {
            Some(pos) => {
                let exp: i64 = trimmed[pos + 1..]
                    .parse()
                    .map_err(|_| invalid("malformed exponent"))?;
                (&trimmed[..pos], exp)
            }
            None => (trimmed, 0),
        };

        let (int_part, frac_part) = match mantissa.split_once('.') {
            Some((i, f)) => (i, f),
            None => (mantissa, ""),
        };
        if int_part.is_empty() && frac_part.is_empty() {
            return Err(invalid("no digits"));
        }

        let mut digits = U256::ZERO;
        for c in int_part.chars().chain(frac_part.chars()) {
            let d = c.to_digit(10).ok_or_else(|| invalid("not a decimal number"))?;
            digits = digits
                .checked_mul(U256::from(10u8))
                .and_then(|v| v.checked_add(U256::from(d)))
                .ok_or_else(|| invalid("too many digits"))?;
        }

        if digits.is_zero() {
            return Ok(UsdPrice::ZERO);
        }

        // value = digits * 10^(exponent - frac_len); we want value * 10^18
        let shift = i64::try_from(frac_part.len())
            .ok()
            .and_then(|frac_len| exponent.checked_add(PRICE_DECIMALS as i64)?.checked_sub(frac_len));
        let scaled = match shift {
            Some(shift) if shift >= 0 => {
                let factor = u32::try_from(shift)
                    .ok()
                    .and_then(pow10)
                    .ok_or_else(|| invalid("too large"))?;
                digits.checked_mul(factor).ok_or_else(|| invalid("too large"))?
            }
            Some(shift) => match u32::try_from(shift.unsigned_abs()).ok().and_then(pow10) {
                Some(factor) => digits / factor,
                // Divisor exceeds 2^256, nothing survives the truncation
                None => U256::ZERO,
            },
            None if exponent < 0 => U256::ZERO,
            None => return Err(invalid("exponent out of range")),
        };

        u256_to_u128(scaled)
            .map(UsdPrice)
            .ok_or_else(|| invalid("too large"))
    }

    /// Parse and additionally require a strictly positive value.
    pub fn parse_positive(s: &str) -> BridgeResult<Self> {
        let price = Self::parse(s)?;
        price.ensure_positive(s)?;
        Ok(price)
    }

    /// Fail with `InvalidPrice` unless the price is above zero.
    pub fn ensure_positive(&self, what: &str) -> BridgeResult<()> {
        if self.is_zero() {
            return Err(BridgeError::InvalidPrice(format!(
                "{} must be greater than zero",
                what
            )));
        }
        Ok(())
    }

    /// Render with a precision that suits the magnitude, as operators expect
    /// to read sub-cent token prices. Truncates rather than rounds.
    pub fn to_display(&self) -> String {
        let places = if self.0 < PRICE_SCALE / 10_000 {
            10
        } else if self.0 < PRICE_SCALE / 100 {
            6
        } else if self.0 < PRICE_SCALE {
            4
        } else {
            2
        };
        let whole = self.0 / PRICE_SCALE;
        let frac = format!("{:018}", self.0 % PRICE_SCALE);
        format!("${}.{}", whole, &frac[..places])
    }
}

impl std::fmt::Display for UsdPrice {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let whole = self.0 / PRICE_SCALE;
        let frac = self.0 % PRICE_SCALE;
        if frac == 0 {
            return write!(f, "{}", whole);
        }
        let frac = format!("{:018}", frac);
        write!(f, "{}.{}", whole, frac.trim_end_matches('0'))
    }
}

impl std::str::FromStr for UsdPrice {
    type Err = BridgeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        UsdPrice::parse(s)
    }
}

impl Serialize for UsdPrice {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for UsdPrice {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Repr {
            Text(String),
            Int(u64),
            Float(f64),
        }

        let text = match Repr::deserialize(deserializer)? {
            Repr::Text(s) => s,
            Repr::Int(i) => i.to_string(),
            // Display of f64 is the shortest round-tripping decimal form
            Repr::Float(f) => f.to_string(),
        };
        UsdPrice::parse(&text).map_err(serde::de::Error::custom)
    }
}

/// Prices for every asset, resolved once and held fixed for a whole cycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PriceSnapshot {
    pub cxs: UsdPrice,
    pub nextep: UsdPrice,
    pub revo: UsdPrice,
    pub taken_at: DateTime<Utc>,
}

impl PriceSnapshot {
    pub fn new(cxs: UsdPrice, nextep: UsdPrice, revo: UsdPrice) -> Self {
        Self {
            cxs,
            nextep,
            revo,
            taken_at: Utc::now(),
        }
    }

    /// Price of a source token.
    pub fn price_of(&self, token: SourceToken) -> UsdPrice {
        match token {
            SourceToken::Cxs => self.cxs,
            SourceToken::Nextep => self.nextep,
        }
    }

    /// Price of any asset, including the destination token.
    pub fn price_of_asset(&self, asset: Asset) -> UsdPrice {
        match asset {
            Asset::Cxs => self.cxs,
            Asset::Nextep => self.nextep,
            Asset::Revo => self.revo,
        }
    }
}

/// 10^n as a U256, or `None` past 10^77.
pub(crate) fn pow10(n: u32) -> Option<U256> {
    let ten = U256::from(10u8);
    let mut value = U256::from(1u8);
    for _ in 0..n {
        value = value.checked_mul(ten)?;
    }
    Some(value)
}

/// Narrow a U256 to u128 if it fits.
pub(crate) fn u256_to_u128(value: U256) -> Option<u128> {
    let limbs = value.as_limbs();
    if limbs[2] != 0 || limbs[3] != 0 {
        return None;
    }
    Some(((limbs[1] as u128) << 64) | limbs[0] as u128)
}
