//! Typed client facade over the cache engine and session store.

use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde_json::{json, Value};
use tracing::debug;

use crate::cache::{
  CacheEngine, CacheKey, Entity, MutationSpec, QueryOptions, QuerySpec, QuerySubscription, Tag,
};
use crate::config::{CacheConfig, Config};
use crate::error::ApiError;
use crate::session::{CredentialStorage, SessionStore};
use crate::transport::{ApiRequest, AuthTransport, HttpTransport, Transport};

use super::endpoints;
use super::types::{
  Address, AuthPayload, Cart, CartItem, Category, NewAddress, Order, Product, ProductListArgs,
  Review, TokenPayload, User, WishlistItem,
};

/// Typed queries and mutations over one shared cache and session.
///
/// Cloning is cheap; all clones share the same state. Signing out, whether
/// explicit or forced by a 401/403, resets the cache synchronously, so
/// nothing fetched under one account is ever served to the next.
#[derive(Clone)]
pub struct StoreClient {
  engine: CacheEngine,
  session: SessionStore,
}

impl StoreClient {
  /// Wire up the full stack: HTTP transport, bearer-token wrapper, cache
  /// engine, and the sign-out hook that purges the cache.
  pub fn new(config: &Config, storage: Arc<dyn CredentialStorage>) -> Result<Self, url::ParseError> {
    let http = HttpTransport::new(&config.api)?;
    Ok(Self::with_transport(
      Arc::new(http),
      storage,
      config.cache.clone(),
    ))
  }

  /// Assemble the client around any transport. Tests inject a mock here.
  pub fn with_transport(
    transport: Arc<dyn Transport>,
    storage: Arc<dyn CredentialStorage>,
    cache_config: CacheConfig,
  ) -> Self {
    let session = SessionStore::new(storage);
    let authed = AuthTransport::new(transport, session.clone());
    let engine = CacheEngine::new(Arc::new(authed), cache_config);

    let cache = engine.clone();
    session.on_sign_out(move || cache.reset_all());

    Self { engine, session }
  }

  pub fn session(&self) -> &SessionStore {
    &self.session
  }

  /// Restore a persisted session, if any. Call once at startup, before
  /// issuing auth-gated queries.
  pub fn restore_session(&self) {
    self.session.restore();
  }

  fn gated(&self) -> QueryOptions {
    QueryOptions {
      skip: !self.session.is_authenticated(),
    }
  }

  async fn run<T: DeserializeOwned>(&self, spec: MutationSpec) -> Result<T, ApiError> {
    let envelope = self.engine.mutate(spec).await?;
    serde_json::from_value(envelope.data).map_err(|e| ApiError::Decode(e.to_string()))
  }

  // --- Queries ---

  pub fn products(&self, args: ProductListArgs) -> QuerySubscription<Vec<Product>> {
    let path = endpoints::products_path(&args);
    let args = serde_json::to_value(&args).unwrap_or(Value::Null);
    self.engine.subscribe(
      QuerySpec::get("getProducts", path, args)
        .providing(endpoints::list_provides(Entity::Product)),
      QueryOptions::default(),
    )
  }

  pub fn product(&self, id: &str) -> QuerySubscription<Product> {
    self.engine.subscribe(
      QuerySpec::get("getProduct", endpoints::product_path(id), json!({ "id": id }))
        .providing(endpoints::detail_provides(Entity::Product, id)),
      QueryOptions::default(),
    )
  }

  pub fn categories(&self) -> QuerySubscription<Vec<Category>> {
    self.engine.subscribe(
      QuerySpec::get("getCategories", "categories", Value::Null)
        .providing(endpoints::list_provides(Entity::Category)),
      QueryOptions::default(),
    )
  }

  pub fn reviews(&self, product_id: &str) -> QuerySubscription<Vec<Review>> {
    self.engine.subscribe(
      QuerySpec::get(
        "getReviews",
        endpoints::reviews_path(product_id),
        json!({ "productId": product_id }),
      )
      .providing(endpoints::list_provides(Entity::Review)),
      QueryOptions::default(),
    )
  }

  pub fn my_cart(&self) -> QuerySubscription<Cart> {
    self.engine.subscribe(
      QuerySpec::get("getMyCart", "carts/me", Value::Null)
        .providing(endpoints::fixed_tags(vec![Tag::list(Entity::Cart)])),
      self.gated(),
    )
  }

  pub fn my_orders(&self) -> QuerySubscription<Vec<Order>> {
    self.engine.subscribe(
      QuerySpec::get("getMyOrders", "orders", Value::Null)
        .providing(endpoints::list_provides(Entity::Order)),
      self.gated(),
    )
  }

  pub fn order(&self, id: &str) -> QuerySubscription<Order> {
    self.engine.subscribe(
      QuerySpec::get("getOrder", endpoints::order_path(id), json!({ "id": id }))
        .providing(endpoints::detail_provides(Entity::Order, id)),
      self.gated(),
    )
  }

  pub fn wishlist(&self) -> QuerySubscription<Vec<WishlistItem>> {
    self.engine.subscribe(
      QuerySpec::get("getWishlist", "wishlist", Value::Null)
        .providing(endpoints::list_provides(Entity::Wishlist)),
      self.gated(),
    )
  }

  pub fn addresses(&self) -> QuerySubscription<Vec<Address>> {
    self.engine.subscribe(
      QuerySpec::get("getAddresses", "addresses", Value::Null)
        .providing(endpoints::list_provides(Entity::Address)),
      self.gated(),
    )
  }

  pub fn address(&self, id: &str) -> QuerySubscription<Address> {
    self.engine.subscribe(
      QuerySpec::get("getAddress", endpoints::address_path(id), json!({ "id": id }))
        .providing(endpoints::detail_provides(Entity::Address, id)),
      self.gated(),
    )
  }

  pub fn current_user(&self) -> QuerySubscription<User> {
    self.engine.subscribe(
      QuerySpec::get("getCurrentUser", "users/me", Value::Null)
        .providing(endpoints::current_user_provides()),
      self.gated(),
    )
  }

  // --- Auth mutations ---

  pub async fn sign_in(&self, email: &str, password: &str) -> Result<User, ApiError> {
    let payload: AuthPayload = self
      .run(MutationSpec::new(
        "signIn",
        ApiRequest::post(
          "auth/login",
          json!({ "email": email, "password": password }),
        ),
      ))
      .await?;
    self.session.set_credentials(
      payload.user.clone(),
      payload.access_token,
      payload.refresh_token,
    );
    Ok(payload.user)
  }

  pub async fn sign_up(&self, email: &str, password: &str, name: &str) -> Result<User, ApiError> {
    let payload: AuthPayload = self
      .run(MutationSpec::new(
        "signUp",
        ApiRequest::post(
          "auth/register",
          json!({ "email": email, "password": password, "name": name }),
        ),
      ))
      .await?;
    self.session.set_credentials(
      payload.user.clone(),
      payload.access_token,
      payload.refresh_token,
    );
    Ok(payload.user)
  }

  /// Exchange the refresh token for a new token pair. The session's user
  /// and authentication flag are untouched.
  pub async fn refresh_session(&self) -> Result<(), ApiError> {
    let Some(refresh_token) = self.session.refresh_token() else {
      return Err(ApiError::Unauthorized {
        status: 401,
        message: "no session to refresh".to_string(),
      });
    };

    let payload: TokenPayload = self
      .run(MutationSpec::new(
        "refreshSession",
        ApiRequest::post("auth/refresh", json!({ "refreshToken": refresh_token })),
      ))
      .await?;
    self
      .session
      .update_tokens(payload.access_token, payload.refresh_token);
    Ok(())
  }

  /// Sign out. The server is notified best-effort; local credentials are
  /// cleared and the cache reset regardless of its answer.
  pub async fn log_out(&self) {
    let spec = MutationSpec::new("logOut", ApiRequest::post("auth/logout", Value::Null));
    if let Err(e) = self.engine.mutate(spec).await {
      debug!(error = %e, "logout request failed, clearing local session anyway");
    }
    self.session.clear_credentials();
  }

  // --- Cart mutations ---

  pub async fn create_cart_item(
    &self,
    product_id: &str,
    quantity: u32,
  ) -> Result<CartItem, ApiError> {
    self
      .run(
        MutationSpec::new(
          "createCartItem",
          ApiRequest::post(
            "carts/items",
            json!({ "productId": product_id, "quantity": quantity }),
          ),
        )
        .invalidating(endpoints::fixed_tags(vec![Tag::list(Entity::Cart)])),
      )
      .await
  }

  pub async fn update_cart_item(&self, item_id: &str, quantity: u32) -> Result<CartItem, ApiError> {
    self
      .run(
        MutationSpec::new(
          "updateCartItem",
          ApiRequest::patch(
            endpoints::cart_item_path(item_id),
            json!({ "quantity": quantity }),
          ),
        )
        .invalidating(endpoints::fixed_tags(vec![Tag::list(Entity::Cart)])),
      )
      .await
  }

  pub async fn remove_cart_item(&self, item_id: &str) -> Result<(), ApiError> {
    self
      .engine
      .mutate(
        MutationSpec::new(
          "removeCartItem",
          ApiRequest::delete(endpoints::cart_item_path(item_id)),
        )
        .invalidating(endpoints::fixed_tags(vec![Tag::list(Entity::Cart)])),
      )
      .await
      .map(|_| ())
  }

  // --- Order mutations ---

  pub async fn create_order(&self, address_id: &str) -> Result<Order, ApiError> {
    self
      .run(
        MutationSpec::new(
          "createOrder",
          ApiRequest::post("orders", json!({ "addressId": address_id })),
        )
        .invalidating(endpoints::fixed_tags(vec![
          Tag::list(Entity::Cart),
          Tag::list(Entity::Order),
        ])),
      )
      .await
  }

  // --- Wishlist mutations ---

  pub async fn add_wishlist_item(&self, product_id: &str) -> Result<WishlistItem, ApiError> {
    self
      .run(
        MutationSpec::new(
          "addWishlistItem",
          ApiRequest::post("wishlist", json!({ "productId": product_id })),
        )
        .invalidating(endpoints::invalidates_created(Entity::Wishlist, Vec::new())),
      )
      .await
  }

  pub async fn remove_wishlist_item(&self, id: &str) -> Result<(), ApiError> {
    self
      .engine
      .mutate(
        MutationSpec::new(
          "removeWishlistItem",
          ApiRequest::delete(endpoints::wishlist_item_path(id)),
        )
        .invalidating(endpoints::fixed_tags(vec![
          Tag::list(Entity::Wishlist),
          Tag::id(Entity::Wishlist, id),
        ])),
      )
      .await
      .map(|_| ())
  }

  // --- Address mutations ---

  pub async fn create_address(&self, address: &NewAddress) -> Result<Address, ApiError> {
    self
      .run(
        MutationSpec::new(
          "createAddress",
          ApiRequest::post(
            "addresses",
            serde_json::to_value(address).unwrap_or(Value::Null),
          ),
        )
        .invalidating(endpoints::invalidates_created(
          Entity::Address,
          vec![Tag::id(Entity::User, "me")],
        )),
      )
      .await
  }

  pub async fn update_address(&self, id: &str, address: &NewAddress) -> Result<Address, ApiError> {
    self
      .run(
        MutationSpec::new(
          "updateAddress",
          ApiRequest::patch(
            endpoints::address_path(id),
            serde_json::to_value(address).unwrap_or(Value::Null),
          ),
        )
        .invalidating(endpoints::fixed_tags(vec![
          Tag::list(Entity::Address),
          Tag::id(Entity::Address, id),
          Tag::id(Entity::User, "me"),
        ])),
      )
      .await
  }

  pub async fn delete_address(&self, id: &str) -> Result<(), ApiError> {
    self
      .engine
      .mutate(
        MutationSpec::new(
          "deleteAddress",
          ApiRequest::delete(endpoints::address_path(id)),
        )
        .invalidating(endpoints::fixed_tags(vec![
          Tag::list(Entity::Address),
          Tag::id(Entity::Address, id),
          Tag::id(Entity::User, "me"),
        ])),
      )
      .await
      .map(|_| ())
  }

  // --- Profile mutations ---

  /// Update the avatar with an optimistic patch: subscribers see the new
  /// URL immediately, and a rejection rolls the patch back to the
  /// pre-mutation payload.
  pub async fn update_profile_picture(&self, avatar_url: &str) -> Result<User, ApiError> {
    let key = CacheKey::new("getCurrentUser", &Value::Null);
    let url = avatar_url.to_string();
    let patched = self
      .engine
      .apply_optimistic(&key, move |data| data["avatarUrl"] = Value::String(url));

    let result: Result<User, ApiError> = self
      .run(
        MutationSpec::new(
          "updateProfilePicture",
          ApiRequest::patch("users/me/avatar", json!({ "avatarUrl": avatar_url })),
        )
        .invalidating(endpoints::current_user_provides()),
      )
      .await;

    if patched {
      match &result {
        Ok(_) => self.engine.commit_optimistic(&key),
        Err(_) => self.engine.rollback_optimistic(&key),
      }
    }
    result
  }

  pub async fn complete_onboarding(&self) -> Result<User, ApiError> {
    self
      .run(
        MutationSpec::new(
          "completeOnboarding",
          ApiRequest::post("users/me/onboarding", Value::Null),
        )
        .invalidating(endpoints::current_user_provides()),
      )
      .await
  }

  // --- Review mutations ---

  pub async fn create_review(
    &self,
    product_id: &str,
    rating: u8,
    comment: Option<&str>,
  ) -> Result<Review, ApiError> {
    self
      .run(
        MutationSpec::new(
          "createReview",
          ApiRequest::post(
            endpoints::reviews_path(product_id),
            json!({ "rating": rating, "comment": comment }),
          ),
        )
        .invalidating(endpoints::fixed_tags(vec![
          Tag::list(Entity::Review),
          Tag::id(Entity::Product, product_id),
        ])),
      )
      .await
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::cache::{QuerySnapshot, QueryStatus};
  use crate::session::{MemoryStorage, SessionEvent};
  use crate::transport::mock::MockTransport;
  use crate::transport::{Method, RawResponse};
  use std::time::Duration;
  use tokio::time::timeout;

  fn client_with(mock: &MockTransport) -> StoreClient {
    StoreClient::with_transport(
      Arc::new(mock.clone()),
      Arc::new(MemoryStorage::new()),
      CacheConfig::default(),
    )
  }

  fn auth_payload() -> Value {
    json!({
      "user": { "id": "u1", "email": "a@b.c" },
      "accessToken": "tok-1",
      "refreshToken": "ref-1"
    })
  }

  async fn settled<T>(sub: &mut QuerySubscription<T>) -> QuerySnapshot {
    timeout(Duration::from_secs(5), async {
      loop {
        let snap = sub.snapshot();
        if !snap.is_fetching && snap.status != QueryStatus::Uninitialized {
          return snap;
        }
        if !sub.changed().await {
          return sub.snapshot();
        }
      }
    })
    .await
    .expect("query should settle")
  }

  #[tokio::test]
  async fn test_sign_in_stores_credentials() {
    let mock = MockTransport::new();
    mock.ok(Method::Post, "auth/login", auth_payload());
    let client = client_with(&mock);

    let user = client.sign_in("a@b.c", "pw").await.expect("sign in");
    assert_eq!(user.id, "u1");
    assert!(client.session().is_authenticated());
    assert_eq!(client.session().access_token(), Some("tok-1".to_string()));
  }

  #[tokio::test]
  async fn test_cart_refetches_after_adding_an_item() {
    let mock = MockTransport::new();
    mock.ok(Method::Post, "auth/login", auth_payload());
    mock.ok_once(
      Method::Get,
      "carts/me",
      json!({
        "id": "c1",
        "items": [
          { "id": "i1", "productId": "p1", "quantity": 1, "price": 10.0 },
          { "id": "i2", "productId": "p2", "quantity": 1, "price": 10.0 }
        ],
        "total": 20.0
      }),
    );
    let client = client_with(&mock);

    client.sign_in("a@b.c", "pw").await.expect("sign in");
    let mut cart = client.my_cart();
    settled(&mut cart).await;
    assert_eq!(cart.state().data.map(|c| c.items.len()), Some(2));

    mock.ok(
      Method::Post,
      "carts/items",
      json!({ "id": "i3", "productId": "p3", "quantity": 1, "price": 5.0 }),
    );
    mock.ok(
      Method::Get,
      "carts/me",
      json!({
        "id": "c1",
        "items": [
          { "id": "i1", "productId": "p1", "quantity": 1, "price": 10.0 },
          { "id": "i2", "productId": "p2", "quantity": 1, "price": 10.0 },
          { "id": "i3", "productId": "p3", "quantity": 1, "price": 5.0 }
        ],
        "total": 25.0
      }),
    );

    client.create_cart_item("p3", 1).await.expect("add item");

    // The existing subscription observes the refetched cart without
    // re-subscribing.
    timeout(Duration::from_secs(5), async {
      loop {
        if cart.state().data.map(|c| c.items.len()) == Some(3) {
          return;
        }
        assert!(cart.changed().await, "cart channel closed");
      }
    })
    .await
    .expect("cart should refetch");
    assert_eq!(mock.request_count(Method::Get, "carts/me"), 2);
  }

  #[tokio::test]
  async fn test_forced_logout_skips_subsequent_authed_queries() {
    let mock = MockTransport::new();
    mock.ok(Method::Post, "auth/login", auth_payload());
    mock.respond(
      Method::Get,
      "users/me",
      RawResponse {
        status: 401,
        body: json!({ "message": "token expired" }),
      },
    );
    let client = client_with(&mock);
    client.sign_in("a@b.c", "pw").await.expect("sign in");

    let mut events = client.session().subscribe();
    let _me = client.current_user();

    let event = timeout(Duration::from_secs(5), events.recv())
      .await
      .expect("logout should happen")
      .expect("event");
    assert_eq!(event, SessionEvent::SignedOut);
    assert!(!client.session().is_authenticated());

    // Auth-gated queries issued afterwards are skipped, not fired.
    let orders = client.my_orders();
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert_eq!(mock.request_count(Method::Get, "orders"), 0);
    assert_eq!(orders.snapshot().status, QueryStatus::Uninitialized);
  }

  #[tokio::test]
  async fn test_same_product_queried_twice_shares_one_request() {
    let mock = MockTransport::new();
    mock.ok(
      Method::Get,
      "products/p1",
      json!({ "id": "p1", "name": "Boots", "price": 49.0 }),
    );
    let client = client_with(&mock);

    let mut a = client.product("p1");
    let mut b = client.product("p1");
    settled(&mut a).await;
    settled(&mut b).await;

    assert_eq!(mock.request_count(Method::Get, "products/p1"), 1);
    assert_eq!(a.state().data.map(|p| p.name), Some("Boots".to_string()));
    assert_eq!(b.state().data.map(|p| p.name), Some("Boots".to_string()));
  }

  #[tokio::test]
  async fn test_avatar_rolls_back_on_rejected_mutation() {
    let mock = MockTransport::new();
    mock.ok(Method::Post, "auth/login", auth_payload());
    mock.ok(
      Method::Get,
      "users/me",
      json!({ "id": "u1", "email": "a@b.c", "avatarUrl": "old.png" }),
    );
    mock.respond(
      Method::Patch,
      "users/me/avatar",
      RawResponse {
        status: 422,
        body: json!({ "message": "unsupported image" }),
      },
    );
    let client = client_with(&mock);
    client.sign_in("a@b.c", "pw").await.expect("sign in");

    let mut me = client.current_user();
    settled(&mut me).await;

    let err = client
      .update_profile_picture("new.png")
      .await
      .expect_err("rejected");
    assert!(matches!(err, ApiError::Api { status: 422, .. }));

    let snap = me.snapshot();
    assert_eq!(snap.data.expect("data")["avatarUrl"], json!("old.png"));
  }

  #[tokio::test]
  async fn test_log_out_clears_session_and_cache() {
    let mock = MockTransport::new();
    mock.ok(Method::Post, "auth/login", auth_payload());
    mock.ok(Method::Post, "auth/logout", Value::Null);
    mock.ok(Method::Get, "orders", json!([{ "id": "o1", "total": 9.0, "status": "paid" }]));
    let client = client_with(&mock);

    client.sign_in("a@b.c", "pw").await.expect("sign in");
    let mut orders = client.my_orders();
    settled(&mut orders).await;

    client.log_out().await;
    assert!(!client.session().is_authenticated());
    assert!(orders.snapshot().data.is_none(), "cache purged on sign-out");
  }

  #[tokio::test]
  async fn test_refresh_session_swaps_tokens() {
    let mock = MockTransport::new();
    mock.ok(Method::Post, "auth/login", auth_payload());
    mock.ok(
      Method::Post,
      "auth/refresh",
      json!({ "accessToken": "tok-2", "refreshToken": "ref-2" }),
    );
    let client = client_with(&mock);

    client.sign_in("a@b.c", "pw").await.expect("sign in");
    client.refresh_session().await.expect("refresh");

    assert_eq!(client.session().access_token(), Some("tok-2".to_string()));
    assert!(client.session().is_authenticated());
  }

  #[tokio::test]
  async fn test_refresh_without_session_is_unauthorized() {
    let mock = MockTransport::new();
    let client = client_with(&mock);
    client.session().clear_credentials();

    let err = client.refresh_session().await.expect_err("no session");
    assert!(err.is_auth_failure());
    assert!(mock.requests().is_empty());
  }
}
