//! Endpoint paths and cache-tag declarations.
//!
//! Everything here is a pure function of arguments and response payloads,
//! so the tag tables are unit-testable without any network. The client in
//! [`super::client`] assembles these into query and mutation specs.

use std::sync::Arc;

use serde_json::Value;

use crate::cache::{Entity, Tag, TagsFn};

use super::types::ProductListArgs;

pub(crate) fn products_path(args: &ProductListArgs) -> String {
  let mut query = url::form_urlencoded::Serializer::new(String::new());
  if let Some(page) = args.page {
    query.append_pair("page", &page.to_string());
  }
  if let Some(category) = &args.category {
    query.append_pair("category", category);
  }
  if let Some(search) = &args.search {
    query.append_pair("search", search);
  }

  let query = query.finish();
  if query.is_empty() {
    "products".to_string()
  } else {
    format!("products?{query}")
  }
}

pub(crate) fn product_path(id: &str) -> String {
  format!("products/{id}")
}

pub(crate) fn reviews_path(product_id: &str) -> String {
  format!("products/{product_id}/reviews")
}

pub(crate) fn cart_item_path(item_id: &str) -> String {
  format!("carts/items/{item_id}")
}

pub(crate) fn order_path(id: &str) -> String {
  format!("orders/{id}")
}

pub(crate) fn wishlist_item_path(id: &str) -> String {
  format!("wishlist/{id}")
}

pub(crate) fn address_path(id: &str) -> String {
  format!("addresses/{id}")
}

/// Tags for a list payload: the entity's LIST tag plus one id tag per item
/// carrying an `id` field, so invalidating a single entity also reaches the
/// lists containing it.
pub(crate) fn list_provides(entity: Entity) -> TagsFn {
  Arc::new(move |data| {
    let mut tags = vec![Tag::list(entity)];
    if let Some(items) = data.as_array() {
      for item in items {
        if let Some(id) = item.get("id").and_then(Value::as_str) {
          tags.push(Tag::id(entity, id));
        }
      }
    }
    tags
  })
}

/// Tags for a single-entity payload with a known id.
pub(crate) fn detail_provides(entity: Entity, id: &str) -> TagsFn {
  let tag = Tag::id(entity, id);
  Arc::new(move |_| vec![tag.clone()])
}

/// The signed-in user is addressable as `User:me` regardless of id, plus
/// the concrete `User:<id>` once the payload reveals it.
pub(crate) fn current_user_provides() -> TagsFn {
  Arc::new(|data| {
    let mut tags = vec![Tag::id(Entity::User, "me")];
    if let Some(id) = data.get("id").and_then(Value::as_str) {
      tags.push(Tag::id(Entity::User, id));
    }
    tags
  })
}

/// A fixed tag set, independent of the response payload.
pub(crate) fn fixed_tags(tags: Vec<Tag>) -> TagsFn {
  Arc::new(move |_| tags.clone())
}

/// Invalidation for creations: the entity's list plus the created id, which
/// is only known from the response, plus any extra tags.
pub(crate) fn invalidates_created(entity: Entity, extra: Vec<Tag>) -> TagsFn {
  Arc::new(move |data| {
    let mut tags = vec![Tag::list(entity)];
    if let Some(id) = data.get("id").and_then(Value::as_str) {
      tags.push(Tag::id(entity, id));
    }
    tags.extend(extra.iter().cloned());
    tags
  })
}
