#![allow(dead_code)]

use axum_storefront::{
    config::AppConfig,
    db::connect_and_migrate,
    dto::{cart::AddToCartRequest, orders::CheckoutRequest},
    entity::{
        products::{self, ActiveModel as ProductActive, Entity as Products},
        user_logs::{Column as LogCol, Entity as UserLogs},
        users::ActiveModel as UserActive,
    },
    middleware::auth::AuthUser,
    notify::{OrderEvent, OrderEvents},
    services::cart_service,
    state::AppState,
};
use chrono::Utc;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, EntityTrait, PaginatorTrait, QueryFilter,
    Set,
};
use tokio::sync::mpsc;
use uuid::Uuid;

// Not a valid argon2 hash; only users created through `register_user` can log in.
const PLACEHOLDER_HASH: &str = "$argon2id$v=19$m=19456,t=2,p=1$placeholder$placeholder";

/// Fresh in-memory database with the full schema applied.
pub async fn setup_db() -> DatabaseConnection {
    connect_and_migrate("sqlite::memory:")
        .await
        .expect("in-memory database with migrations")
}

pub fn test_config() -> AppConfig {
    AppConfig {
        database_url: "sqlite::memory:".into(),
        host: "127.0.0.1".into(),
        port: 0,
        jwt_secret: "test-secret".into(),
        jwt_ttl_hours: 1,
        notify_queue_capacity: 16,
    }
}

pub async fn setup_state() -> AppState {
    AppState::new(setup_db().await, OrderEvents::disabled(), &test_config())
}

pub fn events() -> (OrderEvents, mpsc::Receiver<OrderEvent>) {
    OrderEvents::channel(16)
}

pub async fn create_user(db: &DatabaseConnection, username: &str, is_admin: bool) -> AuthUser {
    let user = UserActive {
        id: Set(Uuid::new_v4()),
        username: Set(username.to_string()),
        email: Set(format!("{username}@example.com")),
        password_hash: Set(PLACEHOLDER_HASH.to_string()),
        is_admin: Set(is_admin),
        is_active: Set(true),
        phone: Set(None),
        address: Set(None),
        created_at: Set(Utc::now().into()),
        last_login: Set(None),
    }
    .insert(db)
    .await
    .expect("insert user");
    AuthUser::new(user.id, is_admin)
}

pub async fn create_product(
    db: &DatabaseConnection,
    name: &str,
    price: i64,
    stock: i32,
) -> products::Model {
    let now = Utc::now();
    ProductActive {
        id: Set(Uuid::new_v4()),
        name: Set(name.to_string()),
        description: Set(Some(format!("{name} for testing"))),
        price: Set(price),
        stock: Set(stock),
        category_id: Set(None),
        sku: Set(None),
        is_active: Set(true),
        created_at: Set(now.into()),
        updated_at: Set(now.into()),
    }
    .insert(db)
    .await
    .expect("insert product")
}

pub async fn set_stock(db: &DatabaseConnection, product_id: Uuid, stock: i32) {
    let product = Products::find_by_id(product_id)
        .one(db)
        .await
        .expect("query product")
        .expect("product exists");
    let mut active: ProductActive = product.into();
    active.stock = Set(stock);
    active.update(db).await.expect("update stock");
}

pub async fn stock_of(db: &DatabaseConnection, product_id: Uuid) -> i32 {
    Products::find_by_id(product_id)
        .one(db)
        .await
        .expect("query product")
        .expect("product exists")
        .stock
}

pub async fn add(db: &DatabaseConnection, user: &AuthUser, product_id: Uuid, quantity: i32) {
    cart_service::add_to_cart(db, user, AddToCartRequest { product_id, quantity })
        .await
        .expect("add to cart");
}

pub fn checkout_request() -> CheckoutRequest {
    CheckoutRequest {
        shipping_address: "1 Ferris Way".into(),
        contact_phone: Some("555-0100".into()),
        payment_method: Some("card".into()),
        notes: None,
    }
}

pub async fn log_count(db: &DatabaseConnection, user_id: Uuid, action: &str) -> u64 {
    UserLogs::find()
        .filter(LogCol::UserId.eq(user_id))
        .filter(LogCol::Action.eq(action))
        .count(db)
        .await
        .expect("count logs")
}

pub async fn total_log_count(db: &DatabaseConnection) -> u64 {
    UserLogs::find().count(db).await.expect("count logs")
}
