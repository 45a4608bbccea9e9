//! Field-level checks for property payloads.
//!
//! Raw input arrives either as JSON (typed values) or as multipart text, so every
//! scalar is held as a `serde_json::Value` and coerced here before range checks.
//! All violations are collected so a client can fix a payload in one round trip.

use std::str::FromStr;

use serde::Deserialize;
use serde_json::{Map, Value};

use crate::error::{AppError, AppResult, ValidationErrors};
use crate::properties::repo_types::{
    Currency, DealType, NormalizedProperty, Price, Property, PropertyType,
};

pub const TITLE_LEN: (usize, usize) = (5, 200);
pub const DESCRIPTION_LEN: (usize, usize) = (10, 2000);
pub const ADDRESS_MAX: usize = 300;
pub const PRICE_MAX: f64 = 999_999_999.0;
pub const BEDROOMS_MAX: i64 = 50;
pub const BATHROOMS_MAX: i64 = 20;
pub const ROOMS_MAX: i64 = 100;
pub const AREA_MAX: f64 = 100_000.0;

/// Untyped property payload as received on the wire.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawPropertyInput {
    pub title: Option<Value>,
    pub description: Option<Value>,
    pub address: Option<Value>,
    pub property_type: Option<Value>,
    pub deal_type: Option<Value>,
    /// Nested `{amount, currency}` form.
    pub price: Option<Value>,
    /// Flat form used by HTML forms; wins over `price`.
    pub price_amount: Option<Value>,
    pub price_currency: Option<Value>,
    pub bedrooms: Option<Value>,
    pub bathrooms: Option<Value>,
    pub rooms: Option<Value>,
    pub area_sq_meters: Option<Value>,
    pub available: Option<Value>,
    pub images: Option<Value>,
    pub existing_images: Option<Value>,
}

impl RawPropertyInput {
    fn price_field(&self, key: &str) -> Option<Value> {
        match &self.price {
            Some(Value::Object(obj)) => obj.get(key).filter(|v| !v.is_null()).cloned(),
            _ => None,
        }
    }

    /// `(amount, currency)` with the flat fields taking precedence.
    pub fn price_parts(&self) -> (Option<Value>, Option<Value>) {
        (
            self.price_amount.clone().or_else(|| self.price_field("amount")),
            self.price_currency.clone().or_else(|| self.price_field("currency")),
        )
    }

    /// Client supplied list of images to keep, under either accepted name.
    pub fn keep_list(&self) -> Option<&Value> {
        self.existing_images.as_ref().or(self.images.as_ref())
    }

    /// Layers `patch` over `self`: fields present in the patch replace ours.
    pub fn overlay(self, patch: RawPropertyInput) -> RawPropertyInput {
        let (base_amount, base_currency) = self.price_parts();
        let (patch_amount, patch_currency) = patch.price_parts();
        let nested_price_is_bad = matches!(&patch.price, Some(v) if !v.is_object());
        RawPropertyInput {
            title: patch.title.or(self.title),
            description: patch.description.or(self.description),
            address: patch.address.or(self.address),
            property_type: patch.property_type.or(self.property_type),
            deal_type: patch.deal_type.or(self.deal_type),
            // a non-object price in the patch is kept so validation reports it
            price: if nested_price_is_bad { patch.price } else { None },
            price_amount: patch_amount.or(base_amount),
            price_currency: patch_currency.or(base_currency),
            bedrooms: patch.bedrooms.or(self.bedrooms),
            bathrooms: patch.bathrooms.or(self.bathrooms),
            rooms: patch.rooms.or(self.rooms),
            area_sq_meters: patch.area_sq_meters.or(self.area_sq_meters),
            available: patch.available.or(self.available),
            images: patch.images,
            existing_images: patch.existing_images,
        }
    }
}

impl From<&Property> for RawPropertyInput {
    fn from(p: &Property) -> Self {
        let mut price = Map::new();
        price.insert("amount".into(), Value::from(p.price.amount));
        price.insert("currency".into(), Value::from(p.price.currency.as_str()));
        RawPropertyInput {
            title: Some(Value::from(p.title.as_str())),
            description: Some(Value::from(p.description.as_str())),
            address: Some(Value::from(p.address.as_str())),
            property_type: Some(Value::from(p.property_type.as_str())),
            deal_type: Some(Value::from(p.deal_type.as_str())),
            price: Some(Value::Object(price)),
            bedrooms: Some(Value::from(p.bedrooms)),
            bathrooms: Some(Value::from(p.bathrooms)),
            rooms: Some(Value::from(p.rooms)),
            area_sq_meters: Some(Value::from(p.area_sq_meters)),
            available: Some(Value::from(p.available)),
            ..Default::default()
        }
    }
}

fn is_blank(v: &Value) -> bool {
    match v {
        Value::Null => true,
        Value::String(s) => s.trim().is_empty(),
        _ => false,
    }
}

fn present(value: Option<&Value>) -> Option<&Value> {
    value.filter(|v| !is_blank(v))
}

fn text(
    errors: &mut ValidationErrors,
    field: &str,
    value: Option<&Value>,
    min: usize,
    max: usize,
) -> Option<String> {
    let Some(v) = present(value) else {
        errors.add(field, format!("{field} is required"));
        return None;
    };
    let Value::String(s) = v else {
        errors.add(field, format!("{field} must be text"));
        return None;
    };
    let s = s.trim();
    let len = s.chars().count();
    if len < min {
        errors.add(field, format!("{field} must be at least {min} characters"));
        return None;
    }
    if len > max {
        errors.add(field, format!("{field} cannot exceed {max} characters"));
        return None;
    }
    Some(s.to_string())
}

fn choice<T: FromStr<Err = String>>(
    errors: &mut ValidationErrors,
    field: &str,
    value: Option<&Value>,
    default: Option<T>,
) -> Option<T> {
    let Some(v) = present(value) else {
        if default.is_none() {
            errors.add(field, format!("{field} is required"));
        }
        return default;
    };
    let Value::String(s) = v else {
        errors.add(field, format!("{field} must be text"));
        return None;
    };
    match s.parse::<T>() {
        Ok(t) => Some(t),
        Err(e) => {
            errors.add(field, format!("{field} {e}"));
            None
        }
    }
}

fn number(errors: &mut ValidationErrors, field: &str, value: Option<&Value>) -> Option<f64> {
    let Some(v) = present(value) else {
        errors.add(field, format!("{field} is required"));
        return None;
    };
    let parsed = match v {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    };
    match parsed.filter(|n| n.is_finite()) {
        Some(n) => Some(n),
        None => {
            errors.add(field, format!("{field} must be a number"));
            None
        }
    }
}

fn integer(
    errors: &mut ValidationErrors,
    field: &str,
    value: Option<&Value>,
    max: i64,
) -> Option<i32> {
    let n = number(errors, field, value)?;
    if n.fract() != 0.0 {
        errors.add(field, format!("{field} must be a whole number"));
        return None;
    }
    if n < 0.0 || n > max as f64 {
        errors.add(field, format!("{field} must be between 0 and {max}"));
        return None;
    }
    Some(n as i32)
}

fn flag(
    errors: &mut ValidationErrors,
    field: &str,
    value: Option<&Value>,
    default: bool,
) -> Option<bool> {
    let Some(v) = present(value) else {
        return Some(default);
    };
    match v {
        Value::Bool(b) => Some(*b),
        Value::String(s) if s.trim() == "true" => Some(true),
        Value::String(s) if s.trim() == "false" => Some(false),
        _ => {
            errors.add(field, format!("{field} must be true or false"));
            None
        }
    }
}

/// Validates a complete payload, returning the normalized record or every violation found.
pub fn validate(raw: &RawPropertyInput) -> AppResult<NormalizedProperty> {
    let mut errors = ValidationErrors::new();

    let title = text(&mut errors, "title", raw.title.as_ref(), TITLE_LEN.0, TITLE_LEN.1);
    let description = text(
        &mut errors,
        "description",
        raw.description.as_ref(),
        DESCRIPTION_LEN.0,
        DESCRIPTION_LEN.1,
    );
    let address = text(&mut errors, "address", raw.address.as_ref(), 1, ADDRESS_MAX);
    let property_type =
        choice::<PropertyType>(&mut errors, "propertyType", raw.property_type.as_ref(), None);
    let deal_type = choice(&mut errors, "dealType", raw.deal_type.as_ref(), Some(DealType::Sale));

    if matches!(&raw.price, Some(v) if !v.is_object() && !v.is_null()) {
        errors.add("price", "price must be an object with amount and currency");
    }
    let (amount, currency) = raw.price_parts();
    let amount = number(&mut errors, "price.amount", amount.as_ref()).and_then(|a| {
        if (0.0..=PRICE_MAX).contains(&a) {
            Some(a)
        } else {
            errors.add("price.amount", format!("price.amount must be between 0 and {PRICE_MAX}"));
            None
        }
    });
    let currency = choice::<Currency>(&mut errors, "price.currency", currency.as_ref(), None);

    let bedrooms = integer(&mut errors, "bedrooms", raw.bedrooms.as_ref(), BEDROOMS_MAX);
    let bathrooms = integer(&mut errors, "bathrooms", raw.bathrooms.as_ref(), BATHROOMS_MAX);
    let rooms = integer(&mut errors, "rooms", raw.rooms.as_ref(), ROOMS_MAX);
    let area = number(&mut errors, "areaSqMeters", raw.area_sq_meters.as_ref()).and_then(|a| {
        if a > 0.0 && a <= AREA_MAX {
            Some(a)
        } else {
            errors.add(
                "areaSqMeters",
                format!("areaSqMeters must be greater than 0 and at most {AREA_MAX}"),
            );
            None
        }
    });
    let available = flag(&mut errors, "available", raw.available.as_ref(), true);

    match (
        title,
        description,
        address,
        property_type,
        deal_type,
        amount,
        currency,
        bedrooms,
        bathrooms,
        rooms,
        area,
        available,
    ) {
        (
            Some(title),
            Some(description),
            Some(address),
            Some(property_type),
            Some(deal_type),
            Some(amount),
            Some(currency),
            Some(bedrooms),
            Some(bathrooms),
            Some(rooms),
            Some(area_sq_meters),
            Some(available),
        ) if errors.is_empty() => Ok(NormalizedProperty {
            title,
            description,
            address,
            property_type,
            deal_type,
            price: Price { amount, currency },
            bedrooms,
            bathrooms,
            rooms,
            area_sq_meters,
            available,
        }),
        _ => Err(AppError::Validation(errors)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn raw(value: serde_json::Value) -> RawPropertyInput {
        serde_json::from_value(value).expect("raw input")
    }

    fn casa_test() -> serde_json::Value {
        json!({
            "title": "Casa Test",
            "description": "Descripcion larga de prueba",
            "address": "Calle 123",
            "propertyType": "house",
            "dealType": "sale",
            "price": { "amount": 100000, "currency": "USD" },
            "bedrooms": 3,
            "bathrooms": 2,
            "rooms": 5,
            "areaSqMeters": 120
        })
    }

    fn errors_of(result: AppResult<NormalizedProperty>) -> ValidationErrors {
        match result {
            Err(AppError::Validation(e)) => e,
            other => panic!("expected validation error, got {other:?}"),
        }
    }

    #[test]
    fn accepts_valid_payload_and_fills_defaults() {
        let mut payload = casa_test();
        payload.as_object_mut().unwrap().remove("dealType");
        let p = validate(&raw(payload)).expect("valid");
        assert_eq!(p.title, "Casa Test");
        assert_eq!(p.property_type, PropertyType::House);
        assert_eq!(p.deal_type, DealType::Sale);
        assert_eq!(p.price, Price { amount: 100000.0, currency: Currency::Usd });
        assert_eq!((p.bedrooms, p.bathrooms, p.rooms), (3, 2, 5));
        assert!(p.available);
    }

    #[test]
    fn coerces_textual_form_fields() {
        let p = validate(&raw(json!({
            "title": "  Depto centrico  ",
            "description": "Luminoso, dos ambientes",
            "address": "Av. Siempre Viva 742",
            "propertyType": "apartment",
            "dealType": "rental",
            "priceAmount": "350.5",
            "priceCurrency": "ARS",
            "bedrooms": "1",
            "bathrooms": "1",
            "rooms": "2",
            "areaSqMeters": " 45.5 ",
            "available": "false"
        })))
        .expect("valid");
        assert_eq!(p.title, "Depto centrico");
        assert_eq!(p.price.amount, 350.5);
        assert_eq!(p.price.currency, Currency::Ars);
        assert_eq!(p.area_sq_meters, 45.5);
        assert!(!p.available);
    }

    #[test]
    fn each_missing_required_field_is_named() {
        for field in [
            "title",
            "description",
            "address",
            "propertyType",
            "bedrooms",
            "bathrooms",
            "rooms",
            "areaSqMeters",
        ] {
            let mut payload = casa_test();
            payload.as_object_mut().unwrap().remove(field);
            let errors = errors_of(validate(&raw(payload)));
            assert!(errors.contains(field), "{field} not reported");
            assert_eq!(errors.len(), 1, "only {field} should fail");
        }
    }

    #[test]
    fn missing_price_reports_both_parts() {
        let mut payload = casa_test();
        payload.as_object_mut().unwrap().remove("price");
        let errors = errors_of(validate(&raw(payload)));
        assert!(errors.contains("price.amount"));
        assert!(errors.contains("price.currency"));
    }

    #[test]
    fn collects_all_violations() {
        let errors = errors_of(validate(&raw(json!({
            "title": "abc",
            "description": "short",
            "address": "x".repeat(301),
            "propertyType": "castle",
            "dealType": "Sale",
            "price": { "amount": -1, "currency": "EUR" },
            "bedrooms": 51,
            "bathrooms": 2.5,
            "rooms": "many",
            "areaSqMeters": 0,
            "available": "maybe"
        }))));
        for field in [
            "title",
            "description",
            "address",
            "propertyType",
            "dealType",
            "price.amount",
            "price.currency",
            "bedrooms",
            "bathrooms",
            "rooms",
            "areaSqMeters",
            "available",
        ] {
            assert!(errors.contains(field), "{field} not reported");
        }
    }

    #[test]
    fn range_boundaries() {
        let mut payload = casa_test();
        let obj = payload.as_object_mut().unwrap();
        obj.insert("bedrooms".into(), json!(50));
        obj.insert("bathrooms".into(), json!(0));
        obj.insert("rooms".into(), json!(100));
        obj.insert("areaSqMeters".into(), json!(100000));
        obj.insert("price".into(), json!({ "amount": 999999999, "currency": "ARS" }));
        assert!(validate(&raw(payload.clone())).is_ok());

        payload["price"]["amount"] = json!(1_000_000_000u64);
        let errors = errors_of(validate(&raw(payload)));
        assert!(errors.contains("price.amount"));
    }

    #[test]
    fn enumerations_are_case_sensitive() {
        let mut payload = casa_test();
        payload["propertyType"] = json!("House");
        let errors = errors_of(validate(&raw(payload)));
        assert!(errors.get("propertyType").unwrap().contains("house"));
    }

    #[test]
    fn overlay_keeps_stored_fields_and_replaces_supplied_ones() {
        let stored = raw(casa_test());
        let patch = raw(json!({ "title": "Casa Renovada", "priceAmount": "120000" }));
        let merged = stored.overlay(patch);
        let p = validate(&merged).expect("valid");
        assert_eq!(p.title, "Casa Renovada");
        assert_eq!(p.price.amount, 120000.0);
        assert_eq!(p.price.currency, Currency::Usd);
        assert_eq!(p.address, "Calle 123");
    }

    #[test]
    fn overlay_revalidates_the_combined_record() {
        let stored = raw(casa_test());
        let merged = stored.overlay(raw(json!({ "bedrooms": 99 })));
        let errors = errors_of(validate(&merged));
        assert!(errors.contains("bedrooms"));
        assert_eq!(errors.len(), 1);
    }
}
