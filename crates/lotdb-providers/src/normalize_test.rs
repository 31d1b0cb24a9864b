use super::*;

fn query() -> SaleQuery {
    SaleQuery {
        make: "Toyota".to_owned(),
        model: None,
        year_from: 2010,
        year_to: 2020,
    }
}

fn copart_lot(json: serde_json::Value) -> CopartLot {
    serde_json::from_value(json).expect("fixture must deserialize")
}

fn iaai_vehicle(json: serde_json::Value) -> IaaiVehicle {
    serde_json::from_value(json).expect("fixture must deserialize")
}

// -----------------------------------------------------------------------
// Copart
// -----------------------------------------------------------------------

#[test]
fn copart_lot_maps_short_field_names() {
    let lot = copart_lot(serde_json::json!({
        "lotNumberStr": "58291734",
        "fv": "JTDKB20U093123456",
        "mkn": "TOYOTA",
        "lm": "PRIUS",
        "lcy": 2009,
        "ad": 1_700_000_000_000_i64,
        "dd": "FRONT END",
        "orr": 181_234.0,
        "yn": "CA - SACRAMENTO",
        "hb": 1850
    }));

    let record = normalize_copart_lot(lot, &query()).unwrap();
    assert_eq!(record.provider, Provider::Copart);
    assert_eq!(record.lot_id, "58291734");
    assert_eq!(record.make, "TOYOTA");
    assert_eq!(record.model.as_deref(), Some("PRIUS"));
    assert_eq!(record.year, Some(2009));
    assert_eq!(record.odometer, Some(181_234));
    assert_eq!(record.sale_price, Some(Decimal::from(1850)));
    assert_eq!(
        record.sale_date.map(|d| d.timestamp_millis()),
        Some(1_700_000_000_000)
    );
    assert_eq!(record.location.as_deref(), Some("CA - SACRAMENTO"));
}

#[test]
fn copart_lot_without_make_uses_searched_make() {
    let lot = copart_lot(serde_json::json!({ "lotNumberStr": "1", "mkn": "  " }));
    let record = normalize_copart_lot(lot, &query()).unwrap();
    assert_eq!(record.make, "Toyota");
    assert!(record.vin.is_none());
    assert!(record.sale_price.is_none());
}

#[test]
fn copart_fractional_bid_is_kept_exact() {
    let lot = copart_lot(serde_json::json!({ "lotNumberStr": "2", "hb": 1234.5 }));
    let record = normalize_copart_lot(lot, &query()).unwrap();
    assert_eq!(record.sale_price, Some(Decimal::new(12345, 1)));
}

#[test]
fn copart_blank_lot_number_is_malformed() {
    let lot = copart_lot(serde_json::json!({ "lotNumberStr": " " }));
    let err = normalize_copart_lot(lot, &query()).unwrap_err();
    assert!(err.is_malformed());
}

#[test]
fn copart_negative_odometer_is_dropped() {
    let lot = copart_lot(serde_json::json!({ "lotNumberStr": "3", "orr": -5.0 }));
    let record = normalize_copart_lot(lot, &query()).unwrap();
    assert!(record.odometer.is_none());
}

// -----------------------------------------------------------------------
// IAAI
// -----------------------------------------------------------------------

#[test]
fn iaai_vehicle_parses_rfc3339_date_and_string_price() {
    let vehicle = iaai_vehicle(serde_json::json!({
        "stockNumber": "34567890",
        "vin": "1HGCM82633A004352",
        "make": "Honda",
        "model": "Accord",
        "year": 2003,
        "saleDate": "2024-03-14T17:00:00Z",
        "primaryDamage": "Rear End",
        "odometer": 201_000,
        "branchName": "Dallas",
        "salePrice": "4250.00"
    }));

    let record = normalize_iaai_vehicle(vehicle, &query()).unwrap();
    assert_eq!(record.provider, Provider::Iaai);
    assert_eq!(record.lot_id, "34567890");
    assert_eq!(record.make, "Honda");
    assert_eq!(record.sale_price, Some(Decimal::new(425_000, 2)));
    assert_eq!(
        record.sale_date.map(|d| d.to_rfc3339()),
        Some("2024-03-14T17:00:00+00:00".to_owned())
    );
    assert_eq!(record.currency, "USD");
}

#[test]
fn iaai_bad_price_is_malformed() {
    let vehicle = iaai_vehicle(serde_json::json!({
        "stockNumber": "1",
        "salePrice": "four thousand"
    }));
    let err = normalize_iaai_vehicle(vehicle, &query()).unwrap_err();
    assert!(
        matches!(err, ProviderError::Malformed { ref reason, .. } if reason.contains("salePrice"))
    );
}

#[test]
fn iaai_bad_date_is_malformed() {
    let vehicle = iaai_vehicle(serde_json::json!({
        "stockNumber": "1",
        "saleDate": "14/03/2024"
    }));
    assert!(normalize_iaai_vehicle(vehicle, &query())
        .unwrap_err()
        .is_malformed());
}

#[test]
fn iaai_empty_price_string_is_absent() {
    let vehicle = iaai_vehicle(serde_json::json!({
        "stockNumber": "9",
        "salePrice": ""
    }));
    let record = normalize_iaai_vehicle(vehicle, &query()).unwrap();
    assert!(record.sale_price.is_none());
}
