// Copyright (c) 2024 The Botho Foundation

//! Conversion of deposited legacy tokens into REVO.
//!
//! `destination_amount = floor(amount * token_price / destination_price)`,
//! computed over 256-bit integers. Flooring means the bridge can never mint
//! more value than was deposited.

use alloy_primitives::U256;

use crate::{
    deposit::Deposit,
    error::{BridgeError, BridgeResult},
    price::{pow10, u256_to_u128, PriceSnapshot, UsdPrice, PRICE_DECIMALS},
};

/// Convert an amount between two tokens that share the same decimals.
pub fn convert(
    amount: u128,
    token_price: UsdPrice,
    destination_price: UsdPrice,
) -> BridgeResult<u128> {
    convert_scaled(amount, 0, token_price, destination_price, 0)
}

/// Convert an amount given in `source_decimals` smallest units into
/// `destination_decimals` smallest units.
pub fn convert_scaled(
    amount: u128,
    source_decimals: u8,
    token_price: UsdPrice,
    destination_price: UsdPrice,
    destination_decimals: u8,
) -> BridgeResult<u128> {
    if destination_price.is_zero() {
        return Err(BridgeError::InvalidPrice(
            "destination price must be greater than zero".to_string(),
        ));
    }

    let overflow = || {
        BridgeError::ConversionOverflow(format!(
            "{} units at {} / {}",
            amount, token_price, destination_price
        ))
    };

    let (num_exp, den_exp) = if destination_decimals >= source_decimals {
        ((destination_decimals - source_decimals) as u32, 0)
    } else {
        (0, (source_decimals - destination_decimals) as u32)
    };

    let numerator = U256::from(amount)
        .checked_mul(U256::from(token_price.raw()))
        .and_then(|v| v.checked_mul(pow10(num_exp)?))
        .ok_or_else(overflow)?;
    let denominator = U256::from(destination_price.raw())
        .checked_mul(pow10(den_exp).ok_or_else(overflow)?)
        .ok_or_else(overflow)?;

    u256_to_u128(numerator / denominator).ok_or_else(overflow)
}

/// USD value of `amount` smallest units of a token with `decimals`.
pub fn usd_value(amount: u128, decimals: u8, price: UsdPrice) -> BridgeResult<UsdPrice> {
    // amount / 10^decimals * price, expressed in 10^-18 USD
    let value = U256::from(amount)
        .checked_mul(U256::from(price.raw()))
        .zip(pow10(decimals as u32))
        .map(|(num, den)| num / den)
        .ok_or_else(|| BridgeError::ConversionOverflow(format!("USD value of {}", amount)))?;
    u256_to_u128(value)
        .map(UsdPrice::from_raw)
        .ok_or_else(|| BridgeError::ConversionOverflow(format!("USD value of {}", amount)))
}

/// The outcome of converting one deposit at one price snapshot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConversionResult<'a> {
    pub deposit: &'a Deposit,
    pub usd_value: UsdPrice,
    pub destination_amount: u128,
    pub token_price: UsdPrice,
    pub destination_price: UsdPrice,
}

impl ConversionResult<'_> {
    /// Nothing would be minted.
    pub fn is_dust(&self) -> bool {
        self.destination_amount == 0
    }
}

/// Convert a deposit using the cycle's price snapshot.
pub fn convert_deposit<'a>(
    deposit: &'a Deposit,
    prices: &PriceSnapshot,
    destination_decimals: u8,
) -> BridgeResult<ConversionResult<'a>> {
    let token_price = prices.price_of(deposit.source_token);
    let destination_price = prices.revo;
    let source_decimals = deposit.source_token.decimals();
    let amount = u256_to_u128(deposit.amount).ok_or_else(|| {
        BridgeError::ConversionOverflow(format!(
            "{} amount {} exceeds 128 bits",
            deposit.source_token, deposit.amount
        ))
    })?;

    let destination_amount = convert_scaled(
        amount,
        source_decimals,
        token_price,
        destination_price,
        destination_decimals,
    )?;

    Ok(ConversionResult {
        deposit,
        usd_value: usd_value(amount, source_decimals, token_price)?,
        destination_amount,
        token_price,
        destination_price,
    })
}

/// Format a smallest-unit amount as a decimal token quantity.
pub fn format_units(amount: u128, decimals: u8) -> String {
    if decimals == 0 {
        return amount.to_string();
    }
    let s = format!("{:0>width$}", amount, width = decimals as usize + 1);
    let (whole, frac) = s.split_at(s.len() - decimals as usize);
    let frac = frac.trim_end_matches('0');
    if frac.is_empty() {
        whole.to_string()
    } else {
        format!("{}.{}", whole, frac)
    }
}

/// Parse a decimal token quantity into smallest units, truncating digits
/// beyond `decimals`.
pub fn parse_units(s: &str, decimals: u8) -> BridgeResult<u128> {
    // A token quantity has the same shape as a price; reuse the exact parser
    // and rescale from 18 places to the token's decimals.
    let raw = UsdPrice::parse(s)
        .map_err(|_| BridgeError::Config(format!("Invalid token amount: {}", s)))?
        .raw();
    let (num_exp, den_exp) = if decimals as u32 >= PRICE_DECIMALS {
        (decimals as u32 - PRICE_DECIMALS, 0)
    } else {
        (0, PRICE_DECIMALS - decimals as u32)
    };
    let overflow = || BridgeError::Config(format!("Token amount too large: {}", s));
    let scaled = U256::from(raw)
        .checked_mul(pow10(num_exp).ok_or_else(overflow)?)
        .ok_or_else(overflow)?
        / pow10(den_exp).ok_or_else(overflow)?;
    u256_to_u128(scaled).ok_or_else(overflow)
}
