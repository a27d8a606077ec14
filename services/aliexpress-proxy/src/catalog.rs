//! Mapping from provider catalog payloads to the storefront shape
//!
//! Pure functions over `serde_json::Value`. The provider is loose about types,
//! so ids and prices are accepted either as JSON numbers or numeric strings.
//! Prices arrive in cents.

use serde::Serialize;
use serde_json::Value;

/// Product as served to storefront clients.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Product {
    pub id: String,
    pub title: String,
    pub price: f64,
    pub original_price: Option<f64>,
    pub image: String,
    pub url: String,
    pub rating: Option<Value>,
    pub reviews_count: Option<Value>,
    pub sales_count: Option<Value>,
    pub store_name: Option<Value>,
    pub shipping: Option<Value>,
    pub aliexpress_id: String,
}

/// Product with its detail-page fields.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProductDetails {
    #[serde(flatten)]
    pub product: Product,
    pub description: String,
    pub images: Value,
    pub specifications: Value,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Category {
    pub id: String,
    pub name: String,
    pub level: u64,
    pub parent_id: Option<String>,
}

/// One page of products.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProductPage {
    pub products: Vec<Product>,
    pub total: u64,
}

pub fn product(raw: &Value) -> Product {
    let id = text(raw, "product_id");
    Product {
        title: text(raw, "product_title"),
        price: cents(raw, "target_sale_price").unwrap_or(0.0),
        original_price: cents(raw, "target_original_price").filter(|p| *p != 0.0),
        image: text(raw, "product_main_image_url"),
        url: text(raw, "promotion_link"),
        rating: present(raw, "evaluate_rate"),
        reviews_count: present(raw, "evaluate_rate"),
        sales_count: present(raw, "sale_price"),
        store_name: present(raw, "shop_name"),
        shipping: present(raw, "logistics_cost"),
        aliexpress_id: id.clone(),
        id,
    }
}

pub fn product_details(raw: &Value) -> ProductDetails {
    ProductDetails {
        product: product(raw),
        description: text(raw, "product_description"),
        images: present(raw, "product_images").unwrap_or_else(|| Value::Array(Vec::new())),
        specifications: present(raw, "product_specifications")
            .unwrap_or_else(|| Value::Object(Default::default())),
    }
}

/// Map a search or hot-products `result`.
///
/// `total` falls back to the number of products on the page.
pub fn product_page(result: &Value) -> ProductPage {
    let products: Vec<Product> = items(result, "products", "product")
        .iter()
        .map(product)
        .collect();
    let total = number(result, "total_record_count")
        .map(|n| n as u64)
        .unwrap_or(products.len() as u64);
    ProductPage { products, total }
}

pub fn category(raw: &Value) -> Category {
    Category {
        id: text(raw, "category_id"),
        name: text(raw, "category_name"),
        level: number(raw, "level").map(|n| n as u64).unwrap_or(1),
        parent_id: present(raw, "parent_category_id").map(|v| scalar_text(&v)),
    }
}

pub fn categories(result: &Value) -> Vec<Category> {
    items(result, "categories", "category")
        .iter()
        .map(category)
        .collect()
}

/// Items under `key`, either a bare array or wrapped as `{inner: [...]}`.
fn items<'a>(result: &'a Value, key: &str, inner: &str) -> &'a [Value] {
    let list = match result.get(key) {
        Some(Value::Array(list)) => Some(list),
        Some(wrapper) => wrapper.get(inner).and_then(Value::as_array),
        None => None,
    };
    list.map(Vec::as_slice).unwrap_or_default()
}

fn present(raw: &Value, key: &str) -> Option<Value> {
    raw.get(key).filter(|v| !v.is_null()).cloned()
}

fn text(raw: &Value, key: &str) -> String {
    raw.get(key).map(scalar_text).unwrap_or_default()
}

fn scalar_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

fn number(raw: &Value, key: &str) -> Option<f64> {
    match raw.get(key)? {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    }
    .filter(|n| n.is_finite())
}

fn cents(raw: &Value, key: &str) -> Option<f64> {
    number(raw, key).map(|n| n / 100.0)
}
