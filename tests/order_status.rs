mod common;

use axum_storefront::{
    dto::orders::UpdateOrderStatusRequest,
    entity::{OrderItems, Orders},
    error::AppError,
    middleware::auth::AuthUser,
    models::Order,
    notify::{OrderEvent, OrderEvents},
    services::{admin_service, order_service},
    status::OrderStatus,
};
use sea_orm::{DatabaseConnection, EntityTrait, PaginatorTrait};
use uuid::Uuid;

async fn place_order(
    db: &DatabaseConnection,
    user: &AuthUser,
    product_id: Uuid,
    quantity: i32,
) -> Order {
    common::add(db, user, product_id, quantity).await;
    order_service::checkout(db, &OrderEvents::disabled(), user, common::checkout_request())
        .await
        .expect("checkout")
        .data
        .expect("order")
        .order
}

async fn set_status(
    db: &DatabaseConnection,
    admin: &AuthUser,
    order_id: Uuid,
    status: &str,
) -> Result<Order, AppError> {
    admin_service::update_order_status(
        db,
        &OrderEvents::disabled(),
        admin,
        order_id,
        UpdateOrderStatusRequest {
            status: status.to_string(),
        },
    )
    .await
    .map(|resp| resp.data.expect("order"))
}

#[tokio::test]
async fn admin_walks_the_happy_path_stamping_each_milestone_once() -> anyhow::Result<()> {
    let db = common::setup_db().await;
    let admin = common::create_user(&db, "admin", true).await;
    let user = common::create_user(&db, "alice", false).await;
    let product = common::create_product(&db, "A", 1_000, 5).await;
    let order = place_order(&db, &user, product.id, 1).await;

    let paid = set_status(&db, &admin, order.id, "paid").await?;
    assert_eq!(paid.status, OrderStatus::Paid);
    let paid_at = paid.paid_at.expect("paid_at stamped");

    // same status again is a no-op and writes no log line
    let again = set_status(&db, &admin, order.id, "PAID").await?;
    assert_eq!(again.paid_at, Some(paid_at));

    let shipped = set_status(&db, &admin, order.id, "shipped").await?;
    assert!(shipped.shipped_at.is_some());
    assert_eq!(shipped.paid_at, Some(paid_at));

    let completed = set_status(&db, &admin, order.id, "completed").await?;
    assert_eq!(completed.status, OrderStatus::Completed);
    assert!(completed.completed_at.is_some());
    assert_eq!(completed.shipped_at, shipped.shipped_at);
    assert!(completed.cancelled_at.is_none());

    assert_eq!(
        common::log_count(&db, admin.user_id, "UPDATE_ORDER_STATUS").await,
        3
    );
    assert_eq!(common::stock_of(&db, product.id).await, 4);
    Ok(())
}

#[tokio::test]
async fn skipping_steps_and_unknown_statuses_are_rejected() -> anyhow::Result<()> {
    let db = common::setup_db().await;
    let admin = common::create_user(&db, "admin", true).await;
    let user = common::create_user(&db, "bob", false).await;
    let product = common::create_product(&db, "A", 1_000, 5).await;
    let order = place_order(&db, &user, product.id, 1).await;

    let err = set_status(&db, &admin, order.id, "shipped").await.unwrap_err();
    match err {
        AppError::IllegalTransition { from, to } => {
            assert_eq!(from, "pending");
            assert_eq!(to, "shipped");
        }
        other => panic!("unexpected error: {other:?}"),
    }

    let err = set_status(&db, &admin, order.id, "lost").await.unwrap_err();
    assert!(matches!(err, AppError::InvalidStatus(_)));

    let err = set_status(&db, &admin, Uuid::new_v4(), "paid").await.unwrap_err();
    assert!(matches!(err, AppError::NotFound));

    let stored = Orders::find_by_id(order.id).one(&db).await?.expect("order");
    assert_eq!(stored.status, OrderStatus::Pending);
    Ok(())
}

#[tokio::test]
async fn cancel_restores_stock_exactly_once() -> anyhow::Result<()> {
    let db = common::setup_db().await;
    let (events, mut rx) = common::events();
    let user = common::create_user(&db, "carol", false).await;
    let product = common::create_product(&db, "A", 1_000, 5).await;
    let order = place_order(&db, &user, product.id, 3).await;
    assert_eq!(common::stock_of(&db, product.id).await, 2);

    order_service::pay_order(&db, &events, &user, order.id).await?;
    let cancelled = order_service::cancel_order(&db, &events, &user, order.id)
        .await?
        .data
        .expect("order");
    assert_eq!(cancelled.status, OrderStatus::Cancelled);
    assert!(cancelled.cancelled_at.is_some());
    assert!(cancelled.paid_at.is_some());
    assert_eq!(common::stock_of(&db, product.id).await, 5);

    let err = order_service::cancel_order(&db, &events, &user, order.id)
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::IllegalTransition { .. }));
    assert_eq!(common::stock_of(&db, product.id).await, 5);

    assert_eq!(common::log_count(&db, user.user_id, "PAY_ORDER").await, 1);
    assert_eq!(common::log_count(&db, user.user_id, "CANCEL_ORDER").await, 1);

    match rx.try_recv()? {
        OrderEvent::Cancelled { order_id, .. } => assert_eq!(order_id, order.id),
        other => panic!("unexpected event: {other:?}"),
    }
    assert!(rx.try_recv().is_err());
    Ok(())
}

#[tokio::test]
async fn shipped_orders_cannot_be_cancelled() -> anyhow::Result<()> {
    let db = common::setup_db().await;
    let admin = common::create_user(&db, "admin", true).await;
    let user = common::create_user(&db, "dave", false).await;
    let product = common::create_product(&db, "A", 1_000, 5).await;
    let order = place_order(&db, &user, product.id, 2).await;

    set_status(&db, &admin, order.id, "paid").await?;
    set_status(&db, &admin, order.id, "shipped").await?;

    let err = set_status(&db, &admin, order.id, "cancelled").await.unwrap_err();
    assert!(matches!(err, AppError::IllegalTransition { .. }));
    let err = order_service::cancel_order(&db, &OrderEvents::disabled(), &user, order.id)
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::IllegalTransition { .. }));

    let stored = Orders::find_by_id(order.id).one(&db).await?.expect("order");
    assert_eq!(stored.status, OrderStatus::Shipped);
    assert!(stored.cancelled_at.is_none());
    assert_eq!(common::stock_of(&db, product.id).await, 3);
    Ok(())
}

#[tokio::test]
async fn owners_may_only_pay_or_cancel_their_own_orders() -> anyhow::Result<()> {
    let db = common::setup_db().await;
    let events = OrderEvents::disabled();
    let owner = common::create_user(&db, "erin", false).await;
    let stranger = common::create_user(&db, "mallory", false).await;
    let product = common::create_product(&db, "A", 1_000, 5).await;
    let order = place_order(&db, &owner, product.id, 1).await;

    let err = order_service::transition_status(&db, &events, &owner, order.id, "shipped")
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::Forbidden));

    let err = order_service::pay_order(&db, &events, &stranger, order.id)
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::Unauthorized));
    let err = order_service::cancel_order(&db, &events, &stranger, order.id)
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::Unauthorized));

    // the admin endpoint refuses non-admins before touching the order
    let err = set_status(&db, &owner, order.id, "paid").await.unwrap_err();
    assert!(matches!(err, AppError::Forbidden));

    let stored = Orders::find_by_id(order.id).one(&db).await?.expect("order");
    assert_eq!(stored.status, OrderStatus::Pending);
    assert_eq!(common::stock_of(&db, product.id).await, 4);
    Ok(())
}

#[tokio::test]
async fn only_cancelled_orders_can_be_deleted() -> anyhow::Result<()> {
    let db = common::setup_db().await;
    let admin = common::create_user(&db, "admin", true).await;
    let user = common::create_user(&db, "frank", false).await;
    let product = common::create_product(&db, "A", 1_000, 5).await;
    let order = place_order(&db, &user, product.id, 2).await;

    let err = admin_service::delete_order(&db, &admin, order.id).await.unwrap_err();
    assert!(matches!(err, AppError::IllegalTransition { .. }));

    set_status(&db, &admin, order.id, "cancelled").await?;
    assert_eq!(common::stock_of(&db, product.id).await, 5);

    let err = admin_service::delete_order(&db, &user, order.id).await.unwrap_err();
    assert!(matches!(err, AppError::Forbidden));

    admin_service::delete_order(&db, &admin, order.id).await?;
    assert!(Orders::find_by_id(order.id).one(&db).await?.is_none());
    assert_eq!(OrderItems::find().count(&db).await?, 0);
    assert_eq!(common::log_count(&db, admin.user_id, "DELETE_ORDER").await, 1);
    // deleting does not touch stock a second time
    assert_eq!(common::stock_of(&db, product.id).await, 5);
    Ok(())
}
