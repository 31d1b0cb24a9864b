//! Normalization from raw provider payloads to [`SaleRecord`].

use std::str::FromStr;

use chrono::{DateTime, Utc};
use lotdb_core::Provider;
use rust_decimal::Decimal;

use crate::error::ProviderError;
use crate::types::{CopartLot, IaaiVehicle, SaleQuery, SaleRecord};

const CURRENCY: &str = "USD";

fn blank_to_none(value: Option<String>) -> Option<String> {
    value
        .map(|s| s.trim().to_owned())
        .filter(|s| !s.is_empty())
}

fn malformed(provider: Provider, lot_id: &str, reason: String) -> ProviderError {
    ProviderError::Malformed {
        provider,
        context: format!("lot {lot_id}"),
        reason,
    }
}

/// Normalizes one Copart lot. Make falls back to the searched make when the
/// lot omits it.
///
/// # Errors
///
/// Returns [`ProviderError::Malformed`] if the lot number is blank, the sale
/// timestamp is out of range, or the high bid is not a decimal.
pub fn normalize_copart_lot(lot: CopartLot, query: &SaleQuery) -> Result<SaleRecord, ProviderError> {
    let lot_id = lot.lot_number.trim().to_owned();
    if lot_id.is_empty() {
        return Err(malformed(
            Provider::Copart,
            "<blank>",
            "lotNumberStr is empty".to_owned(),
        ));
    }

    let sale_date = match lot.sale_date_ms {
        Some(ms) => Some(DateTime::<Utc>::from_timestamp_millis(ms).ok_or_else(|| {
            malformed(Provider::Copart, &lot_id, format!("sale date {ms} out of range"))
        })?),
        None => None,
    };

    let sale_price = match lot.high_bid {
        Some(n) => Some(parse_number(&n).ok_or_else(|| {
            malformed(Provider::Copart, &lot_id, format!("high bid {n} is not a decimal"))
        })?),
        None => None,
    };

    // Odometer arrives as a float; anything negative or absurd is dropped.
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    let odometer = lot
        .odometer
        .filter(|v| v.is_finite() && *v >= 0.0 && *v <= f64::from(u32::MAX))
        .map(|v| v.round() as u32);

    Ok(SaleRecord {
        provider: Provider::Copart,
        lot_id,
        vin: blank_to_none(lot.vin),
        make: blank_to_none(lot.make).unwrap_or_else(|| query.make.clone()),
        model: blank_to_none(lot.model),
        year: lot.year,
        sale_date,
        damage: blank_to_none(lot.damage),
        odometer,
        location: blank_to_none(lot.yard),
        sale_price,
        currency: CURRENCY.to_owned(),
    })
}

/// Normalizes one IAAI vehicle.
///
/// # Errors
///
/// Returns [`ProviderError::Malformed`] if the stock number is blank, the
/// sale date is not RFC 3339, or the sale price is not a decimal string.
pub fn normalize_iaai_vehicle(
    vehicle: IaaiVehicle,
    query: &SaleQuery,
) -> Result<SaleRecord, ProviderError> {
    let lot_id = vehicle.stock_number.trim().to_owned();
    if lot_id.is_empty() {
        return Err(malformed(
            Provider::Iaai,
            "<blank>",
            "stockNumber is empty".to_owned(),
        ));
    }

    let sale_date = match blank_to_none(vehicle.sale_date) {
        Some(raw) => Some(
            DateTime::parse_from_rfc3339(&raw)
                .map_err(|e| malformed(Provider::Iaai, &lot_id, format!("saleDate '{raw}': {e}")))?
                .with_timezone(&Utc),
        ),
        None => None,
    };

    let sale_price = match blank_to_none(vehicle.sale_price) {
        Some(raw) => Some(Decimal::from_str(&raw).map_err(|e| {
            malformed(Provider::Iaai, &lot_id, format!("salePrice '{raw}': {e}"))
        })?),
        None => None,
    };

    Ok(SaleRecord {
        provider: Provider::Iaai,
        lot_id,
        vin: blank_to_none(vehicle.vin),
        make: blank_to_none(vehicle.make).unwrap_or_else(|| query.make.clone()),
        model: blank_to_none(vehicle.model),
        year: vehicle.year,
        sale_date,
        damage: blank_to_none(vehicle.primary_damage),
        odometer: vehicle.odometer,
        location: blank_to_none(vehicle.branch_name),
        sale_price,
        currency: CURRENCY.to_owned(),
    })
}

fn parse_number(n: &serde_json::Number) -> Option<Decimal> {
    let raw = n.to_string();
    Decimal::from_str(&raw)
        .or_else(|_| Decimal::from_scientific(&raw))
        .ok()
}

#[cfg(test)]
#[path = "normalize_test.rs"]
mod tests;
