//! Normalization of loosely-shaped backend payloads.
//!
//! The backend returns the same entity in several shapes: cart rows nest the
//! product under `product`, `part` or `item` (or not at all), and names,
//! prices and images each go by several field names. Everything here reads
//! from `serde_json::Value` and falls back field by field.

use gapa_core::{
    Address, CartLineItem, DeliveryLocation, LocationId, ProductId, Quantity, Region, RegionId,
};
use rust_decimal::Decimal;
use rust_decimal::prelude::ToPrimitive;
use serde_json::Value;

const NESTED_PRODUCT_KEYS: &[&str] = &["product", "part", "item"];
const NAME_KEYS: &[&str] = &["name", "product_name", "part_name", "title", "item_name"];
const PRICE_KEYS: &[&str] = &["price", "selling_price", "sellingPrice", "unit_price", "amount"];
const IMAGE_KEYS: &[&str] = &["image", "img_url", "image_url", "imageUrl", "thumbnail", "photo"];
const PRODUCT_ID_KEYS: &[&str] = &["product_id", "productId", "part_id", "id"];
const QUANTITY_KEYS: &[&str] = &["quantity", "qty", "count"];
const WEIGHT_KEYS: &[&str] = &["weight_kg", "weight", "weightKg"];

/// Find the list in a response body: the body itself, or the first of `keys`
/// holding an array (one level of `data` nesting is also searched).
///
/// `null` bodies read as an empty list.
#[must_use]
pub fn extract_list(body: &Value, keys: &[&str]) -> Option<Vec<Value>> {
    match body {
        Value::Null => Some(Vec::new()),
        Value::Array(items) => Some(items.clone()),
        Value::Object(map) => keys.iter().find_map(|key| match map.get(*key) {
            Some(Value::Array(items)) => Some(items.clone()),
            Some(nested @ Value::Object(_)) if *key == "data" => extract_list(nested, keys),
            Some(Value::Null) => Some(Vec::new()),
            _ => None,
        }),
        _ => None,
    }
}

/// Find the entity object in a response body: the first of `keys` holding an
/// object, or the body itself when it is an object without such a key.
#[must_use]
pub fn extract_object<'a>(body: &'a Value, keys: &[&str]) -> Option<&'a Value> {
    let map = body.as_object()?;
    keys.iter()
        .find_map(|key| map.get(*key).filter(|v| v.is_object()))
        .or_else(|| (!map.is_empty()).then_some(body))
}

fn first<'a>(value: &'a Value, keys: &[&str]) -> Option<&'a Value> {
    keys.iter()
        .find_map(|key| value.get(*key).filter(|v| !v.is_null()))
}

/// First non-blank string (or number rendered as a string) under `keys`.
fn first_text(value: &Value, keys: &[&str]) -> Option<String> {
    keys.iter().find_map(|key| match value.get(*key)? {
        Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_owned()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    })
}

/// First value under `keys` that reads as a decimal (`1500`, `"1,500.00"`).
fn first_decimal(value: &Value, keys: &[&str]) -> Option<Decimal> {
    keys.iter().find_map(|key| parse_decimal(value.get(*key)?))
}

/// Read a JSON number or numeric string as a decimal.
#[must_use]
pub fn parse_decimal(value: &Value) -> Option<Decimal> {
    match value {
        Value::Number(n) => n.to_string().parse::<Decimal>().ok().or_else(|| {
            n.as_f64().and_then(|f| Decimal::try_from(f).ok())
        }),
        Value::String(s) => s.trim().replace(',', "").parse::<Decimal>().ok(),
        _ => None,
    }
}

fn first_image(value: &Value) -> Option<String> {
    first_text(value, IMAGE_KEYS).or_else(|| {
        match value.get("images")? {
            Value::Array(images) => images.iter().find_map(|img| match img {
                Value::String(s) if !s.is_empty() => Some(s.clone()),
                Value::Object(_) => first_text(img, &["url", "src", "image"]),
                _ => None,
            }),
            _ => None,
        }
    })
}

/// The object holding product fields for a cart row.
fn nested_product(row: &Value) -> &Value {
    NESTED_PRODUCT_KEYS
        .iter()
        .find_map(|key| row.get(*key).filter(|v| v.is_object()))
        .unwrap_or(row)
}

/// Map a product object to a cart line.
#[must_use]
pub fn line_from_product(product_id: ProductId, product: &Value, quantity: Quantity) -> CartLineItem {
    CartLineItem {
        product_id,
        name: first_text(product, NAME_KEYS).unwrap_or_else(|| "Product".to_owned()),
        price: first_decimal(product, PRICE_KEYS).unwrap_or(Decimal::ZERO),
        quantity,
        image: first_image(product),
        weight_kg: first_decimal(product, WEIGHT_KEYS).filter(|w| w.is_sign_positive() && !w.is_zero()),
    }
}

/// Map a server cart row to a cart line.
///
/// Returns `None` if no product id can be found on the row.
#[must_use]
pub fn line_from_row(row: &Value) -> Option<CartLineItem> {
    let product = nested_product(row);
    // The row's own `id` is the cart row id; prefer explicit product ids.
    let product_id = first_text(row, &["product_id", "productId", "part_id"])
        .or_else(|| first_text(product, PRODUCT_ID_KEYS))?;
    let quantity = first(row, QUANTITY_KEYS)
        .and_then(parse_decimal)
        .and_then(|d| d.trunc().to_i64())
        .map_or_else(Quantity::default, Quantity::clamped);

    let mut line = line_from_product(ProductId::new(product_id), product, quantity);
    // Some rows carry the price on the row rather than the product.
    if line.price.is_zero()
        && let Some(price) = first_decimal(row, PRICE_KEYS)
    {
        line.price = price;
    }
    Some(line)
}

/// Map a states-list entry to a region.
#[must_use]
pub fn region_from(value: &Value) -> Option<Region> {
    Some(Region {
        id: RegionId::new(first_text(value, &["id", "state_id", "stateId"])?),
        name: first_text(value, &["name", "state", "state_name", "stateName"])?,
    })
}

/// Map a price-table entry to a delivery location.
#[must_use]
pub fn location_from(value: &Value) -> Option<DeliveryLocation> {
    Some(DeliveryLocation {
        id: LocationId::new(first_text(value, &["id", "location_id", "locationId"])?),
        name: first_text(value, &["location", "name", "location_name", "locationName"])
            .unwrap_or_default(),
        price: first_decimal(value, &["price", "amount", "delivery_price", "cost"])?,
    })
}

/// Map a user profile to an address for form hydration.
#[must_use]
pub fn address_from_profile(user: &Value) -> Address {
    let full_name = first_text(user, &["name", "full_name", "fullName"]).unwrap_or_else(|| {
        [
            first_text(user, &["first_name", "firstName"]),
            first_text(user, &["last_name", "lastName"]),
        ]
        .into_iter()
        .flatten()
        .collect::<Vec<_>>()
        .join(" ")
    });

    Address {
        full_name,
        email: first_text(user, &["email"]).unwrap_or_default(),
        phone: first_text(user, &["phone", "phone_number", "phoneNumber"]).unwrap_or_default(),
        address1: first_text(user, &["address", "address1", "delivery_address"]).unwrap_or_default(),
        city: first_text(user, &["city"]).unwrap_or_default(),
        region: first_text(user, &["state", "region"]).unwrap_or_default(),
        region_id: first_text(user, &["state_id", "region_id"]).map(RegionId::new),
        country: first_text(user, &["country"]).unwrap_or_default(),
        postcode: first_text(user, &["postcode", "postal_code", "zip"]).unwrap_or_default(),
        ..Address::default()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn test_row_with_nested_product() {
        let row = json!({
            "id": 900,
            "product_id": 12,
            "quantity": 3,
            "product": { "id": 12, "product_name": "Brake Pad", "price": "15,000", "img_url": "a.jpg" }
        });
        let line = line_from_row(&row).unwrap();
        assert_eq!(line.product_id.as_str(), "12");
        assert_eq!(line.name, "Brake Pad");
        assert_eq!(line.price, Decimal::from(15_000));
        assert_eq!(line.quantity.get(), 3);
        assert_eq!(line.image.as_deref(), Some("a.jpg"));
    }

    #[test]
    fn test_row_with_part_alias() {
        let row = json!({ "qty": "2", "part": { "part_id": "X9", "part_name": "Filter", "selling_price": 2500 } });
        let line = line_from_row(&row).unwrap();
        assert_eq!(line.product_id.as_str(), "X9");
        assert_eq!(line.name, "Filter");
        assert_eq!(line.quantity.get(), 2);
    }

    #[test]
    fn test_flat_row_uses_row_price() {
        let row = json!({ "productId": "P1", "title": "Wiper", "amount": 700, "quantity": 0 });
        let line = line_from_row(&row).unwrap();
        assert_eq!(line.price, Decimal::from(700));
        // quantity floor
        assert_eq!(line.quantity.get(), 1);
    }

    #[test]
    fn test_row_without_id_is_skipped() {
        assert!(line_from_row(&json!({ "quantity": 1 })).is_none());
    }

    #[test]
    fn test_images_array() {
        let product = json!({ "images": [{ "url": "b.png" }] });
        let line = line_from_product(ProductId::new("1"), &product, Quantity::default());
        assert_eq!(line.image.as_deref(), Some("b.png"));
    }

    #[test]
    fn test_extract_list_shapes() {
        assert_eq!(extract_list(&json!([1, 2]), &["data"]).unwrap().len(), 2);
        assert_eq!(extract_list(&json!({ "cart": [1] }), &["cart"]).unwrap().len(), 1);
        assert_eq!(
            extract_list(&json!({ "data": { "items": [1, 2, 3] } }), &["data", "items"])
                .unwrap()
                .len(),
            3
        );
        assert!(extract_list(&Value::Null, &[]).unwrap().is_empty());
        assert!(extract_list(&json!({ "message": "ok" }), &["data"]).is_none());
    }

    #[test]
    fn test_extract_object_falls_back_to_body() {
        let body = json!({ "data": { "id": 1 } });
        assert_eq!(extract_object(&body, &["data"]).unwrap()["id"], 1);
        let flat = json!({ "id": 2 });
        assert_eq!(extract_object(&flat, &["data"]).unwrap()["id"], 2);
        assert!(extract_object(&json!({}), &["data"]).is_none());
    }

    #[test]
    fn test_location_requires_price() {
        let loc = location_from(&json!({ "id": 3, "location": "Ikeja", "price": 1500 })).unwrap();
        assert_eq!(loc.name, "Ikeja");
        assert_eq!(loc.price, Decimal::from(1500));
        assert!(location_from(&json!({ "id": 3, "location": "Ikeja" })).is_none());
    }

    #[test]
    fn test_profile_name_from_parts() {
        let addr = address_from_profile(&json!({ "first_name": "Ada", "last_name": "Obi", "state": "Lagos" }));
        assert_eq!(addr.full_name, "Ada Obi");
        assert_eq!(addr.region, "Lagos");
    }
}
