//! Catalog, order and tracking routes backed by the provider RPC
//!
//! Handlers validate their input first, then go through the configured
//! `SignedApiClient`, so they behave the same in signed and OAuth mode.

use axum::Json;
use axum::body::Bytes;
use axum::extract::{Query, State};
use provider::{ApiError, Params, is_reserved};
use serde::Deserialize;
use serde_json::{Map, Value, json};
use tracing::{debug, info};

use crate::AppState;
use crate::catalog;
use crate::error::ApiFailure;

pub const PRODUCT_SEARCH: &str = "aliexpress.ds.product.search";
pub const PRODUCT_DETAILS: &str = "aliexpress.ds.product.details";
pub const CATEGORY_LIST: &str = "aliexpress.ds.category.list";
pub const HOT_PRODUCTS: &str = "aliexpress.ds.hot.products";
pub const ORDER_CREATE: &str = "aliexpress.ds.order.create";
pub const LOGISTICS_GET: &str = "aliexpress.ds.logistics.get";

const DEFAULT_PAGE_SIZE: u32 = 20;
const DEFAULT_SHIP_TO_COUNTRY: &str = "BR";
const SORT_BY_PRICE: &str = "SALE_PRICE_ASC";

/// Query parameters kept as text so bad numbers get the JSON error envelope.
#[derive(Debug, Default, Deserialize)]
pub struct SearchQuery {
    pub keywords: Option<String>,
    pub page: Option<String>,
    pub page_size: Option<String>,
    pub max_price: Option<String>,
    pub min_price: Option<String>,
    pub ship_to_country: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct PageQuery {
    pub page: Option<String>,
    pub page_size: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct DetailsQuery {
    pub product_ids: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct TrackingQuery {
    pub id: Option<String>,
}

/// Validated paging.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Paging {
    pub page: u32,
    pub page_size: u32,
}

impl Paging {
    pub fn parse(page: Option<&str>, page_size: Option<&str>) -> Result<Self, ApiFailure> {
        let page = positive("page", page, 1)?;
        let page_size = positive("page_size", page_size, DEFAULT_PAGE_SIZE)?;
        Ok(Self { page, page_size })
    }

    fn insert_into(&self, params: &mut Params) {
        params.insert("page_no".into(), self.page.to_string());
        params.insert("page_size".into(), self.page_size.to_string());
    }
}

fn positive(name: &str, raw: Option<&str>, default: u32) -> Result<u32, ApiFailure> {
    match raw.map(str::trim).filter(|s| !s.is_empty()) {
        None => Ok(default),
        Some(s) => match s.parse::<u32>() {
            Ok(n) if n > 0 => Ok(n),
            _ => Err(ApiFailure::Validation(format!(
                "{name} must be a positive integer, got '{s}'"
            ))),
        },
    }
}

/// Price in currency units to the provider's integer cents.
fn price_in_cents(name: &str, raw: &str) -> Result<String, ApiFailure> {
    let invalid = || ApiFailure::Validation(format!("{name} must be a non-negative number, got '{raw}'"));
    let value = raw.trim().parse::<f64>().map_err(|_| invalid())?;
    if !value.is_finite() || value < 0.0 {
        return Err(invalid());
    }
    Ok(((value * 100.0).round() as u64).to_string())
}

/// RPC parameters for a product search.
pub fn search_params(query: &SearchQuery) -> Result<(Params, Paging), ApiFailure> {
    let paging = Paging::parse(query.page.as_deref(), query.page_size.as_deref())?;

    let mut params = Params::new();
    params.insert(
        "keywords".into(),
        query.keywords.clone().unwrap_or_default(),
    );
    paging.insert_into(&mut params);
    let country = query
        .ship_to_country
        .as_deref()
        .map(str::trim)
        .filter(|c| !c.is_empty())
        .unwrap_or(DEFAULT_SHIP_TO_COUNTRY);
    params.insert("ship_to_country".into(), country.to_string());
    params.insert("sort".into(), SORT_BY_PRICE.into());

    for (name, field, raw) in [
        ("max_price", "max_sale_price", &query.max_price),
        ("min_price", "min_sale_price", &query.min_price),
    ] {
        if let Some(raw) = raw.as_deref().filter(|s| !s.trim().is_empty()) {
            params.insert(field.into(), price_in_cents(name, raw)?);
        }
    }

    Ok((params, paging))
}

/// RPC parameters for an order, from a flat JSON object.
///
/// Strings pass through, numbers and booleans are rendered as text, nested
/// objects and arrays are sent as JSON, nulls are dropped. Protocol fields
/// such as `method` or `access_token` are rejected.
pub fn order_params(body: &[u8]) -> Result<Params, ApiFailure> {
    let fields: Map<String, Value> = serde_json::from_slice(body)
        .map_err(|e| ApiFailure::Validation(format!("order body must be a JSON object: {e}")))?;
    if fields.is_empty() {
        return Err(ApiFailure::Validation("order body is empty".into()));
    }
    if let Some(key) = fields.keys().find(|k| is_reserved(k)) {
        return Err(ApiFailure::Validation(format!(
            "order body may not set reserved field '{key}'"
        )));
    }

    Ok(fields
        .into_iter()
        .filter_map(|(key, value)| {
            let value = match value {
                Value::Null => return None,
                Value::String(s) => s,
                other => other.to_string(),
            };
            Some((key, value))
        })
        .collect())
}

/// Call `method` and return its `result` payload.
///
/// Maps an unauthenticated client to a 401 carrying a fresh authorization
/// URL.
async fn call(state: &AppState, method: &str, params: Params) -> Result<Value, ApiFailure> {
    let response = match state.client.call(method, params).await {
        Ok(response) => response,
        Err(ApiError::Unauthenticated) => {
            info!(method, "provider call needs authorization");
            return Err(ApiFailure::Unauthenticated {
                auth_url: state.oauth.authorization_url().await,
            });
        }
        Err(e) => return Err(ApiFailure::Provider(e)),
    };

    if let Some(result) = response.result(method) {
        return Ok(result.clone());
    }
    let message = match response.error_message() {
        Some(provider_message) => format!("provider rejected {method}: {provider_message}"),
        None => format!("unexpected response from {method}"),
    };
    Err(ApiFailure::UnexpectedPayload {
        message,
        response: response.into_body(),
    })
}

/// Like `call`, but falls back to the whole body when the RPC has no
/// `result` envelope.
async fn call_lenient(state: &AppState, method: &str, params: Params) -> Result<Value, ApiFailure> {
    match call(state, method, params).await {
        Err(ApiFailure::UnexpectedPayload { response, .. })
            if response.get("error_response").is_none() =>
        {
            Ok(response)
        }
        other => other,
    }
}

/// GET /api/aliexpress/products
pub async fn products(
    State(state): State<AppState>,
    Query(query): Query<SearchQuery>,
) -> Result<Json<Value>, ApiFailure> {
    let (params, paging) = search_params(&query)?;
    debug!(keywords = ?query.keywords, page = paging.page, "searching products");

    let result = call(&state, PRODUCT_SEARCH, params).await?;
    let page = catalog::product_page(&result);
    Ok(Json(json!({
        "success": true,
        "products": page.products,
        "total": page.total,
        "current_page": paging.page,
        "page_size": paging.page_size,
    })))
}

/// GET /api/aliexpress/products/details
pub async fn product_details(
    State(state): State<AppState>,
    Query(query): Query<DetailsQuery>,
) -> Result<Json<Value>, ApiFailure> {
    let product_ids = query
        .product_ids
        .as_deref()
        .map(str::trim)
        .filter(|ids| !ids.is_empty())
        .ok_or_else(|| ApiFailure::Validation("product_ids is required".into()))?;

    let mut params = Params::new();
    params.insert("product_ids".into(), product_ids.to_string());
    let result = call(&state, PRODUCT_DETAILS, params).await?;

    Ok(Json(json!({
        "success": true,
        "product": catalog::product_details(&result),
    })))
}

/// GET /api/aliexpress/categories
pub async fn categories(State(state): State<AppState>) -> Result<Json<Value>, ApiFailure> {
    let result = call(&state, CATEGORY_LIST, Params::new()).await?;
    Ok(Json(json!({
        "success": true,
        "categories": catalog::categories(&result),
    })))
}

/// GET /api/aliexpress/hot-products
pub async fn hot_products(
    State(state): State<AppState>,
    Query(query): Query<PageQuery>,
) -> Result<Json<Value>, ApiFailure> {
    let paging = Paging::parse(query.page.as_deref(), query.page_size.as_deref())?;
    let mut params = Params::new();
    paging.insert_into(&mut params);
    params.insert("sort".into(), SORT_BY_PRICE.into());

    let result = call(&state, HOT_PRODUCTS, params).await?;
    let page = catalog::product_page(&result);
    Ok(Json(json!({
        "success": true,
        "products": page.products,
        "total": page.total,
        "current_page": paging.page,
        "page_size": paging.page_size,
    })))
}

/// POST /api/aliexpress/order
pub async fn create_order(
    State(state): State<AppState>,
    body: Bytes,
) -> Result<Json<Value>, ApiFailure> {
    let params = order_params(&body)?;
    info!(fields = params.len(), "creating order");

    let result = call_lenient(&state, ORDER_CREATE, params).await?;
    Ok(Json(json!({ "success": true, "result": result })))
}

/// GET /api/aliexpress/tracking
pub async fn tracking(
    State(state): State<AppState>,
    Query(query): Query<TrackingQuery>,
) -> Result<Json<Value>, ApiFailure> {
    let order_id = query
        .id
        .as_deref()
        .map(str::trim)
        .filter(|id| !id.is_empty())
        .ok_or_else(|| ApiFailure::Validation("order id is required".into()))?;

    let mut params = Params::new();
    params.insert("order_id".into(), order_id.to_string());
    let result = call_lenient(&state, LOGISTICS_GET, params).await?;
    Ok(Json(json!({ "success": true, "result": result })))
}
