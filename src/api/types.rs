//! Serde-deserializable domain types matching the storefront API payloads.
//!
//! The API serializes fields in camelCase; these types rename accordingly so
//! payloads round-trip cleanly through the cache's JSON values.

use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Product {
  pub id: String,
  pub name: String,
  #[serde(default)]
  pub description: Option<String>,
  pub price: f64,
  #[serde(default)]
  pub images: Vec<String>,
  #[serde(default)]
  pub category_id: Option<String>,
  #[serde(default)]
  pub rating: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Category {
  pub id: String,
  pub name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Review {
  pub id: String,
  pub product_id: String,
  pub rating: u8,
  #[serde(default)]
  pub comment: Option<String>,
  #[serde(default)]
  pub created_at: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CartItem {
  pub id: String,
  pub product_id: String,
  pub quantity: u32,
  pub price: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Cart {
  pub id: String,
  #[serde(default)]
  pub items: Vec<CartItem>,
  pub total: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderItem {
  pub product_id: String,
  pub quantity: u32,
  pub price: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Order {
  pub id: String,
  #[serde(default)]
  pub items: Vec<OrderItem>,
  pub total: f64,
  pub status: String,
  #[serde(default)]
  pub created_at: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WishlistItem {
  pub id: String,
  pub product_id: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Address {
  pub id: String,
  pub line1: String,
  #[serde(default)]
  pub line2: Option<String>,
  pub city: String,
  pub postal_code: String,
  pub country: String,
  #[serde(default)]
  pub is_default: bool,
}

/// Address fields for create/update, before the server assigns an id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewAddress {
  pub line1: String,
  #[serde(default)]
  pub line2: Option<String>,
  pub city: String,
  pub postal_code: String,
  pub country: String,
  #[serde(default)]
  pub is_default: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
  pub id: String,
  pub email: String,
  #[serde(default)]
  pub name: Option<String>,
  #[serde(default)]
  pub avatar_url: Option<String>,
  #[serde(default)]
  pub onboarding_complete: bool,
}

/// Payload returned by sign-in and sign-up.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthPayload {
  pub user: User,
  pub access_token: String,
  pub refresh_token: String,
}

/// Payload returned by the token refresh endpoint.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenPayload {
  pub access_token: String,
  pub refresh_token: String,
}

/// Pagination metadata decoded from the envelope's `metadata` field on
/// demand; the cache itself never interprets it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PageMetadata {
  pub current_page: u32,
  pub total_pages: u32,
}

impl PageMetadata {
  pub fn from_value(metadata: &Value) -> Option<Self> {
    serde_json::from_value(metadata.clone()).ok()
  }
}

/// Arguments for the product list query. Serialized into the cache key, so
/// distinct filters get independent entries.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProductListArgs {
  #[serde(skip_serializing_if = "Option::is_none")]
  pub page: Option<u32>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub category: Option<String>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub search: Option<String>,
}
