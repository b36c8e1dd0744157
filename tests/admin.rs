mod common;

use axum::{
    body::Body,
    http::{Request, StatusCode, header},
};
use axum_storefront::{
    dto::{
        categories::{CreateCategoryRequest, UpdateCategoryRequest},
        products::{CreateProductRequest, InventoryAdjustRequest, UpdateProductRequest},
    },
    error::AppError,
    middleware::auth::AuthUser,
    entity::users::Entity as Users,
    notify::OrderEvents,
    routes::create_api_router,
    routes::params::{AdminOrderQuery, LowStockQuery, ProductQuery, UserListQuery, UserLogQuery},
    services::{admin_service, auth_service, cart_service, category_service, order_service, product_service, user_admin_service},
    status::OrderStatus,
};
use chrono::{Duration, Utc};
use sea_orm::{DatabaseConnection, EntityTrait};
use tower::ServiceExt;
use uuid::Uuid;

async fn checkout(db: &DatabaseConnection, user: &AuthUser, product_id: Uuid, quantity: i32) -> String {
    common::add(db, user, product_id, quantity).await;
    order_service::checkout(db, &OrderEvents::disabled(), user, common::checkout_request())
        .await
        .expect("checkout")
        .data
        .expect("order")
        .order
        .order_number
}

fn new_product(name: &str, price: i64, stock: i32) -> CreateProductRequest {
    CreateProductRequest {
        name: name.to_string(),
        description: None,
        price,
        stock,
        category_id: None,
        sku: None,
    }
}

#[tokio::test]
async fn non_admins_are_forbidden_without_side_effects() -> anyhow::Result<()> {
    let db = common::setup_db().await;
    let user = common::create_user(&db, "alice", false).await;
    let product = common::create_product(&db, "A", 1_000, 5).await;
    let logs_before = common::total_log_count(&db).await;

    let err = admin_service::adjust_inventory(&db, &user, product.id, InventoryAdjustRequest { delta: 10 })
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::Forbidden));
    let err = product_service::create_product(&db, &user, new_product("B", 1, 1))
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::Forbidden));
    let err = product_service::delete_product(&db, &user, product.id).await.unwrap_err();
    assert!(matches!(err, AppError::Forbidden));
    let err = category_service::create_category(
        &db,
        &user,
        CreateCategoryRequest {
            name: "Books".into(),
            description: None,
        },
    )
    .await
    .unwrap_err();
    assert!(matches!(err, AppError::Forbidden));
    let err = user_admin_service::toggle_admin(&db, &user, user.user_id).await.unwrap_err();
    assert!(matches!(err, AppError::Forbidden));
    let err = admin_service::export_orders_csv(&db, &user).await.unwrap_err();
    assert!(matches!(err, AppError::Forbidden));
    let err = admin_service::list_all_orders(&db, &user, AdminOrderQuery::default())
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::Forbidden));

    assert_eq!(common::total_log_count(&db).await, logs_before);
    assert_eq!(common::stock_of(&db, product.id).await, 5);
    Ok(())
}

#[tokio::test]
async fn inventory_adjustments_are_logged_and_never_go_negative() -> anyhow::Result<()> {
    let db = common::setup_db().await;
    let admin = common::create_user(&db, "admin", true).await;
    let product = common::create_product(&db, "A", 1_000, 3).await;
    let plenty = common::create_product(&db, "B", 1_000, 40).await;

    let updated = admin_service::adjust_inventory(&db, &admin, product.id, InventoryAdjustRequest { delta: 7 })
        .await?
        .data
        .expect("product");
    assert_eq!(updated.stock, 10);

    let err = admin_service::adjust_inventory(&db, &admin, product.id, InventoryAdjustRequest { delta: -11 })
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::Validation(_)));
    let err = admin_service::adjust_inventory(&db, &admin, product.id, InventoryAdjustRequest { delta: 0 })
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::Validation(_)));
    assert_eq!(common::stock_of(&db, product.id).await, 10);
    assert_eq!(common::log_count(&db, admin.user_id, "ADJUST_INVENTORY").await, 1);

    admin_service::adjust_inventory(&db, &admin, product.id, InventoryAdjustRequest { delta: -8 }).await?;
    let low = admin_service::list_low_stock(&db, &admin, LowStockQuery::default())
        .await?
        .data
        .expect("products");
    assert_eq!(low.items.len(), 1);
    assert_eq!(low.items[0].id, product.id);

    let low = admin_service::list_low_stock(
        &db,
        &admin,
        LowStockQuery {
            threshold: Some(50),
            ..Default::default()
        },
    )
    .await?
    .data
    .expect("products");
    assert_eq!(low.items.len(), 2);
    assert_eq!(low.items[1].id, plenty.id);
    Ok(())
}

#[tokio::test]
async fn order_search_filters_and_totals() -> anyhow::Result<()> {
    let db = common::setup_db().await;
    let admin = common::create_user(&db, "admin", true).await;
    let alice = common::create_user(&db, "alice", false).await;
    let bob = common::create_user(&db, "bob", false).await;
    let product = common::create_product(&db, "A", 1_000, 50).await;

    let alice_order = checkout(&db, &alice, product.id, 1).await;
    checkout(&db, &bob, product.id, 2).await;
    checkout(&db, &bob, product.id, 3).await;

    let all = admin_service::list_all_orders(&db, &admin, AdminOrderQuery::default()).await?;
    let meta = all.meta.expect("meta");
    let all = all.data.expect("orders");
    assert_eq!(all.items.len(), 3);
    assert_eq!(meta.total, Some(3));
    assert_eq!(all.total_orders, 3);
    assert_eq!(all.total_revenue, 6_000);

    let by_user = admin_service::list_all_orders(
        &db,
        &admin,
        AdminOrderQuery {
            search: Some("BOB@EXAMPLE".into()),
            ..Default::default()
        },
    )
    .await?
    .data
    .expect("orders");
    assert_eq!(by_user.items.len(), 2);
    assert!(by_user.items.iter().all(|o| o.user_id == bob.user_id));
    // totals ignore filters
    assert_eq!(by_user.total_orders, 3);

    let by_number = admin_service::list_all_orders(
        &db,
        &admin,
        AdminOrderQuery {
            search: Some(alice_order.to_lowercase()),
            ..Default::default()
        },
    )
    .await?
    .data
    .expect("orders");
    assert_eq!(by_number.items.len(), 1);
    assert_eq!(by_number.items[0].order_number, alice_order);

    let alice_id = by_number.items[0].id;
    admin_service::update_order_status(
        &db,
        &OrderEvents::disabled(),
        &admin,
        alice_id,
        axum_storefront::dto::orders::UpdateOrderStatusRequest {
            status: "paid".into(),
        },
    )
    .await?;
    let paid = admin_service::list_all_orders(
        &db,
        &admin,
        AdminOrderQuery {
            status: Some("paid".into()),
            ..Default::default()
        },
    )
    .await?
    .data
    .expect("orders");
    assert_eq!(paid.items.len(), 1);
    assert_eq!(paid.items[0].status, OrderStatus::Paid);

    let err = admin_service::list_all_orders(
        &db,
        &admin,
        AdminOrderQuery {
            status: Some("unknown".into()),
            ..Default::default()
        },
    )
    .await
    .unwrap_err();
    assert!(matches!(err, AppError::InvalidStatus(_)));

    let today = Utc::now().date_naive();
    let in_range = admin_service::list_all_orders(
        &db,
        &admin,
        AdminOrderQuery {
            date_from: Some(today - Duration::days(1)),
            date_to: Some(today),
            ..Default::default()
        },
    )
    .await?
    .data
    .expect("orders");
    assert_eq!(in_range.items.len(), 3);

    let future = admin_service::list_all_orders(
        &db,
        &admin,
        AdminOrderQuery {
            date_from: Some(today + Duration::days(1)),
            ..Default::default()
        },
    )
    .await?
    .data
    .expect("orders");
    assert!(future.items.is_empty());

    let detail = admin_service::get_order_admin(&db, &admin, alice_id)
        .await?
        .data
        .expect("detail");
    assert_eq!(detail.customer.username, "alice");
    assert_eq!(detail.items.len(), 1);
    Ok(())
}

#[tokio::test]
async fn statistics_and_csv_export() -> anyhow::Result<()> {
    let db = common::setup_db().await;
    let admin = common::create_user(&db, "admin", true).await;
    let alice = common::create_user(&db, "alice", false).await;
    let mug = common::create_product(&db, "Mug", 1_000, 50).await;
    let pen = common::create_product(&db, "Pen", 100, 50).await;

    let first = checkout(&db, &alice, mug.id, 2).await;
    checkout(&db, &alice, pen.id, 5).await;
    checkout(&db, &alice, mug.id, 1).await;

    let stats = admin_service::order_statistics(&db, &admin)
        .await?
        .data
        .expect("stats");
    assert_eq!(stats.total_orders, 3);
    assert_eq!(stats.total_revenue, 3_500);
    assert_eq!(stats.by_status.len(), 1);
    assert_eq!(stats.by_status[0].status, OrderStatus::Pending);
    assert_eq!(stats.by_status[0].count, 3);
    assert_eq!(stats.popular_products[0].product_id, pen.id);
    assert_eq!(stats.popular_products[0].total_sold, 5);
    assert_eq!(stats.popular_products[1].name, "Mug");
    assert_eq!(stats.popular_products[1].total_revenue, 3_000);

    let csv = admin_service::export_orders_csv(&db, &admin).await?;
    let lines: Vec<&str> = csv.lines().collect();
    assert_eq!(lines.len(), 4);
    assert!(lines[0].starts_with("order_number,username,email,total_amount,status"));
    assert!(lines.iter().any(|l| l.starts_with(&first) && l.contains("alice@example.com")));
    assert_eq!(common::log_count(&db, admin.user_id, "EXPORT_ORDERS").await, 1);
    Ok(())
}

#[tokio::test]
async fn product_and_category_management() -> anyhow::Result<()> {
    let db = common::setup_db().await;
    let admin = common::create_user(&db, "admin", true).await;
    let alice = common::create_user(&db, "alice", false).await;

    let books = category_service::create_category(
        &db,
        &admin,
        CreateCategoryRequest {
            name: "Books".into(),
            description: Some("Reading".into()),
        },
    )
    .await?
    .data
    .expect("category");
    let err = category_service::create_category(
        &db,
        &admin,
        CreateCategoryRequest {
            name: "Books".into(),
            description: None,
        },
    )
    .await
    .unwrap_err();
    assert!(matches!(err, AppError::Validation(_)));

    let renamed = category_service::update_category(
        &db,
        &admin,
        books.id,
        UpdateCategoryRequest {
            name: Some("Ebooks".into()),
            ..Default::default()
        },
    )
    .await?
    .data
    .expect("category");
    assert_eq!(renamed.name, "Ebooks");

    let book = product_service::create_product(
        &db,
        &admin,
        CreateProductRequest {
            category_id: Some(books.id),
            sku: Some("BOOK-1".into()),
            ..new_product("Async Rust", 2_500, 10)
        },
    )
    .await?
    .data
    .expect("product");
    let err = product_service::create_product(
        &db,
        &admin,
        CreateProductRequest {
            sku: Some("BOOK-1".into()),
            ..new_product("Other", 1, 1)
        },
    )
    .await
    .unwrap_err();
    assert!(matches!(err, AppError::Validation(_)));
    for price in [-1, 0] {
        let err = product_service::create_product(&db, &admin, new_product("Bad", price, 1))
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Validation(_)));
    }

    let listed = product_service::list_products(
        &db,
        ProductQuery {
            q: Some("ASYNC".into()),
            category_id: Some(books.id),
            ..Default::default()
        },
    )
    .await?
    .data
    .expect("products");
    assert_eq!(listed.items.len(), 1);

    // ordered products are kept for history
    checkout(&db, &alice, book.id, 1).await;
    let err = product_service::delete_product(&db, &admin, book.id).await.unwrap_err();
    assert!(matches!(err, AppError::Validation(_)));

    product_service::update_product(
        &db,
        &admin,
        book.id,
        UpdateProductRequest {
            is_active: Some(false),
            ..Default::default()
        },
    )
    .await?;
    let public = product_service::list_products(&db, ProductQuery::default())
        .await?
        .data
        .expect("products");
    assert!(public.items.is_empty());
    let err = product_service::get_product(&db, book.id).await.unwrap_err();
    assert!(matches!(err, AppError::NotFound));
    let all = product_service::list_products_admin(&db, &admin, ProductQuery::default())
        .await?
        .data
        .expect("products");
    assert_eq!(all.items.len(), 1);

    let spare = product_service::create_product(
        &db,
        &admin,
        CreateProductRequest {
            category_id: Some(books.id),
            ..new_product("Spare", 100, 1)
        },
    )
    .await?
    .data
    .expect("product");

    category_service::delete_category(&db, &admin, books.id).await?;
    let detached = product_service::get_product(&db, spare.id).await?.data.expect("product");
    assert!(detached.category_id.is_none());

    common::add(&db, &alice, spare.id, 1).await;
    product_service::delete_product(&db, &admin, spare.id).await?;
    let cart = cart_service::view_cart(&db, &alice).await?.data.expect("cart");
    assert!(cart.items.is_empty());
    let err = product_service::get_product(&db, spare.id).await.unwrap_err();
    assert!(matches!(err, AppError::NotFound));

    assert_eq!(common::log_count(&db, admin.user_id, "CREATE_CATEGORY").await, 1);
    assert_eq!(common::log_count(&db, admin.user_id, "UPDATE_CATEGORY").await, 1);
    assert_eq!(common::log_count(&db, admin.user_id, "DELETE_CATEGORY").await, 1);
    assert_eq!(common::log_count(&db, admin.user_id, "CREATE_PRODUCT").await, 2);
    assert_eq!(common::log_count(&db, admin.user_id, "UPDATE_PRODUCT").await, 1);
    assert_eq!(common::log_count(&db, admin.user_id, "DELETE_PRODUCT").await, 1);
    Ok(())
}

#[tokio::test]
async fn user_management_and_activity_log() -> anyhow::Result<()> {
    let db = common::setup_db().await;
    let admin = common::create_user(&db, "admin", true).await;
    let alice = common::create_user(&db, "alice", false).await;
    common::create_user(&db, "bob", false).await;
    let product = common::create_product(&db, "A", 1_000, 10).await;
    checkout(&db, &alice, product.id, 2).await;

    let users = user_admin_service::list_users(&db, &admin, UserListQuery::default())
        .await?
        .data
        .expect("users");
    assert_eq!(users.total_users, 3);
    assert_eq!(users.admin_count, 1);
    assert_eq!(users.active_count, 3);

    let found = user_admin_service::list_users(
        &db,
        &admin,
        UserListQuery {
            search: Some("ALI".into()),
            ..Default::default()
        },
    )
    .await?
    .data
    .expect("users");
    assert_eq!(found.items.len(), 1);
    assert_eq!(found.items[0].id, alice.user_id);

    let detail = user_admin_service::user_detail(&db, &admin, alice.user_id)
        .await?
        .data
        .expect("detail");
    assert_eq!(detail.order_count, 1);
    assert_eq!(detail.total_spent, 2_000);
    assert_eq!(detail.recent_orders.len(), 1);
    assert!(detail.recent_logs.iter().any(|l| l.action == "PURCHASE"));

    let disabled = user_admin_service::toggle_active(&db, &admin, alice.user_id)
        .await?
        .data
        .expect("user");
    assert!(!disabled.is_active);
    let promoted = user_admin_service::toggle_admin(&db, &admin, alice.user_id)
        .await?
        .data
        .expect("user");
    assert!(promoted.is_admin);

    let err = user_admin_service::toggle_active(&db, &admin, admin.user_id)
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::Validation(_)));

    let logs = user_admin_service::list_logs(
        &db,
        &admin,
        UserLogQuery {
            user_id: Some(admin.user_id),
            ..Default::default()
        },
    )
    .await?
    .data
    .expect("logs");
    assert_eq!(logs.items.len(), 2);

    let purchases = user_admin_service::list_logs(
        &db,
        &admin,
        UserLogQuery {
            action: Some("purchase".into()),
            ..Default::default()
        },
    )
    .await?
    .data
    .expect("logs");
    assert_eq!(purchases.items.len(), 1);
    assert_eq!(purchases.items[0].user_id, alice.user_id);
    Ok(())
}

fn bearer(method: &str, uri: &str, token: &str) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .header(header::AUTHORIZATION, format!("Bearer {token}"))
        .body(Body::empty())
        .expect("request")
}

#[tokio::test]
async fn demoted_or_deactivated_admin_tokens_lose_access() -> anyhow::Result<()> {
    let state = common::setup_state().await;
    let db = state.orm.clone();
    let root = common::create_user(&db, "root", true).await;
    let bob = common::create_user(&db, "bob", true).await;
    let jwt = state.jwt.clone();
    let token = auth_service::issue_token(&jwt, &bob)?;
    let app = create_api_router().with_state(state);

    let resp = app.clone().oneshot(bearer("GET", "/admin/users", &token)).await?;
    assert_eq!(resp.status(), StatusCode::OK);

    // the token still carries the admin role after the demotion
    user_admin_service::toggle_admin(&db, &root, bob.user_id).await?;
    let toggle_root = format!("/admin/users/{}/toggle-admin", root.user_id);
    let resp = app.clone().oneshot(bearer("POST", &toggle_root, &token)).await?;
    assert_eq!(resp.status(), StatusCode::FORBIDDEN);
    let resp = app.clone().oneshot(bearer("GET", "/auth/me", &token)).await?;
    assert_eq!(resp.status(), StatusCode::OK);

    user_admin_service::toggle_active(&db, &root, bob.user_id).await?;
    let resp = app.clone().oneshot(bearer("GET", "/auth/me", &token)).await?;
    assert_eq!(resp.status(), StatusCode::FORBIDDEN);
    let resp = app.clone().oneshot(bearer("POST", &toggle_root, &token)).await?;
    assert_eq!(resp.status(), StatusCode::FORBIDDEN);

    let root_row = Users::find_by_id(root.user_id).one(&db).await?.expect("root");
    assert!(root_row.is_admin);
    assert!(root_row.is_active);
    assert_eq!(common::log_count(&db, bob.user_id, "TOGGLE_USER_ADMIN").await, 0);

    // tokens for accounts that no longer exist are rejected outright
    let ghost = auth_service::issue_token(&jwt, &AuthUser::new(Uuid::new_v4(), true))?;
    let resp = app.oneshot(bearer("GET", "/admin/users", &ghost)).await?;
    assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
    Ok(())
}

#[tokio::test]
async fn search_treats_wildcards_literally() -> anyhow::Result<()> {
    let db = common::setup_db().await;
    let admin = common::create_user(&db, "admin", true).await;
    common::create_user(&db, "ann_1", false).await;
    common::create_user(&db, "annx1", false).await;
    common::create_product(&db, "50% off mug", 900, 5).await;
    common::create_product(&db, "500 plates", 1_500, 5).await;

    let users = user_admin_service::list_users(
        &db,
        &admin,
        UserListQuery {
            search: Some("ann_".into()),
            ..Default::default()
        },
    )
    .await?
    .data
    .expect("users");
    assert_eq!(users.items.len(), 1);
    assert_eq!(users.items[0].username, "ann_1");

    let products = product_service::list_products(
        &db,
        ProductQuery {
            q: Some("50%".into()),
            ..Default::default()
        },
    )
    .await?
    .data
    .expect("products");
    assert_eq!(products.items.len(), 1);
    assert_eq!(products.items[0].name, "50% off mug");

    let plain = product_service::list_products(
        &db,
        ProductQuery {
            q: Some("50".into()),
            ..Default::default()
        },
    )
    .await?
    .data
    .expect("products");
    assert_eq!(plain.items.len(), 2);
    Ok(())
}
