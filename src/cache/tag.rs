//! Entity tags driving cache invalidation.
//!
//! Every populated cache entry carries the tags it "provides"; every
//! mutation declares the tags it invalidates. A `List` tag marks a
//! collection-level dependency distinct from any per-item id, so mutations
//! that create or delete items invalidate both the item tag (when the id is
//! known) and the list tag to keep aggregate views correct.

/// Entity families exposed by the storefront API.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Entity {
  Product,
  Category,
  Review,
  Cart,
  Order,
  Wishlist,
  Address,
  User,
}

impl Entity {
  pub fn as_str(&self) -> &'static str {
    match self {
      Entity::Product => "Product",
      Entity::Category => "Category",
      Entity::Review => "Review",
      Entity::Cart => "Cart",
      Entity::Order => "Order",
      Entity::Wishlist => "Wishlist",
      Entity::Address => "Address",
      Entity::User => "User",
    }
  }
}

/// The id half of a tag: a whole collection or one item.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum TagId {
  List,
  Id(String),
}

/// Label attached to a cache entry identifying which entity or collection
/// it represents.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Tag {
  pub entity: Entity,
  pub id: TagId,
}

impl Tag {
  pub fn list(entity: Entity) -> Self {
    Self {
      entity,
      id: TagId::List,
    }
  }

  pub fn id(entity: Entity, id: impl Into<String>) -> Self {
    Self {
      entity,
      id: TagId::Id(id.into()),
    }
  }
}

impl std::fmt::Display for Tag {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    match &self.id {
      TagId::List => write!(f, "{}:LIST", self.entity.as_str()),
      TagId::Id(id) => write!(f, "{}:{}", self.entity.as_str(), id),
    }
  }
}
