mod common;

use axum_storefront::{
    dto::orders::CheckoutRequest,
    entity::{OrderItems, Orders},
    error::AppError,
    notify::{OrderEvent, OrderEvents},
    services::{cart_service, order_service},
    status::OrderStatus,
};
use sea_orm::{EntityTrait, PaginatorTrait};

#[tokio::test]
async fn checkout_creates_order_and_decrements_stock() -> anyhow::Result<()> {
    let db = common::setup_db().await;
    let (events, mut rx) = common::events();
    let user = common::create_user(&db, "alice", false).await;
    let a = common::create_product(&db, "A", 1_000, 5).await;
    let b = common::create_product(&db, "B", 2_500, 2).await;

    common::add(&db, &user, a.id, 3).await;
    common::add(&db, &user, b.id, 2).await;

    let placed = order_service::checkout(&db, &events, &user, common::checkout_request())
        .await?
        .data
        .expect("order");

    assert_eq!(placed.order.status, OrderStatus::Pending);
    assert_eq!(placed.order.user_id, user.user_id);
    assert_eq!(placed.order.total_amount, 3 * 1_000 + 2 * 2_500);
    assert_eq!(placed.items.len(), 2);
    let subtotal_sum: i64 = placed.items.iter().map(|i| i.subtotal).sum();
    assert_eq!(subtotal_sum, placed.order.total_amount);
    for item in &placed.items {
        assert_eq!(item.subtotal, item.price * i64::from(item.quantity));
    }
    assert!(placed.order.order_number.starts_with("ORD"));
    assert_eq!(placed.order.order_number.len(), 23);
    assert!(placed.order.paid_at.is_none());

    assert_eq!(common::stock_of(&db, a.id).await, 2);
    assert_eq!(common::stock_of(&db, b.id).await, 0);

    let cart = cart_service::view_cart(&db, &user).await?.data.expect("cart");
    assert!(cart.items.is_empty());

    assert_eq!(common::log_count(&db, user.user_id, "PURCHASE").await, 1);

    match rx.try_recv()? {
        OrderEvent::Created {
            order_number,
            email,
            total_amount,
            item_count,
            ..
        } => {
            assert_eq!(order_number, placed.order.order_number);
            assert_eq!(email, "alice@example.com");
            assert_eq!(total_amount, placed.order.total_amount);
            assert_eq!(item_count, 2);
        }
        other => panic!("unexpected event: {other:?}"),
    }
    Ok(())
}

#[tokio::test]
async fn insufficient_stock_aborts_the_whole_checkout() -> anyhow::Result<()> {
    let db = common::setup_db().await;
    let (events, mut rx) = common::events();
    let user = common::create_user(&db, "bob", false).await;
    let a = common::create_product(&db, "A", 1_000, 5).await;
    let b = common::create_product(&db, "B", 700, 2).await;

    common::add(&db, &user, a.id, 2).await;
    common::add(&db, &user, b.id, 2).await;
    // stock drops after the items were put in the cart
    common::set_stock(&db, b.id, 1).await;

    let err = order_service::checkout(&db, &events, &user, common::checkout_request())
        .await
        .unwrap_err();
    match err {
        AppError::InsufficientStock {
            product_id,
            requested,
            available,
            ..
        } => {
            assert_eq!(product_id, b.id);
            assert_eq!(requested, 2);
            assert_eq!(available, 1);
        }
        other => panic!("unexpected error: {other:?}"),
    }

    assert_eq!(common::stock_of(&db, a.id).await, 5);
    assert_eq!(common::stock_of(&db, b.id).await, 1);
    assert_eq!(Orders::find().count(&db).await?, 0);
    assert_eq!(OrderItems::find().count(&db).await?, 0);
    assert_eq!(common::log_count(&db, user.user_id, "PURCHASE").await, 0);

    let cart = cart_service::view_cart(&db, &user).await?.data.expect("cart");
    assert_eq!(cart.items.len(), 2);
    assert!(rx.try_recv().is_err());
    Ok(())
}

#[tokio::test]
async fn single_item_over_stock_leaves_stock_untouched() -> anyhow::Result<()> {
    let db = common::setup_db().await;
    let user = common::create_user(&db, "carol", false).await;
    let a = common::create_product(&db, "A", 1_000, 2).await;

    common::add(&db, &user, a.id, 2).await;
    common::set_stock(&db, a.id, 1).await;

    let err = order_service::checkout(&db, &OrderEvents::disabled(), &user, common::checkout_request())
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::InsufficientStock { .. }));
    assert_eq!(common::stock_of(&db, a.id).await, 1);
    assert_eq!(Orders::find().count(&db).await?, 0);
    Ok(())
}

#[tokio::test]
async fn empty_cart_and_missing_address_are_rejected() -> anyhow::Result<()> {
    let db = common::setup_db().await;
    let events = OrderEvents::disabled();
    let user = common::create_user(&db, "dave", false).await;

    let err = order_service::checkout(&db, &events, &user, common::checkout_request())
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::Validation(_)));

    let product = common::create_product(&db, "A", 100, 5).await;
    common::add(&db, &user, product.id, 1).await;

    let err = order_service::checkout(
        &db,
        &events,
        &user,
        CheckoutRequest {
            shipping_address: "   ".into(),
            contact_phone: None,
            payment_method: None,
            notes: None,
        },
    )
    .await
    .unwrap_err();
    assert!(matches!(err, AppError::Validation(_)));
    assert_eq!(common::stock_of(&db, product.id).await, 5);
    Ok(())
}

#[tokio::test]
async fn order_numbers_are_unique_and_orders_are_private() -> anyhow::Result<()> {
    let db = common::setup_db().await;
    let events = OrderEvents::disabled();
    let user = common::create_user(&db, "erin", false).await;
    let other = common::create_user(&db, "frank", false).await;
    let product = common::create_product(&db, "A", 100, 50).await;

    let mut numbers = Vec::new();
    for _ in 0..5 {
        common::add(&db, &user, product.id, 1).await;
        let placed = order_service::checkout(&db, &events, &user, common::checkout_request())
            .await?
            .data
            .expect("order");
        numbers.push(placed.order.order_number);
    }
    let mut unique = numbers.clone();
    unique.sort();
    unique.dedup();
    assert_eq!(unique.len(), numbers.len());
    assert_eq!(common::stock_of(&db, product.id).await, 45);

    let listed = order_service::list_orders(&db, &user, Default::default()).await?;
    assert_eq!(listed.data.expect("orders").items.len(), 5);
    assert_eq!(listed.meta.expect("meta").total, Some(5));

    let theirs = order_service::list_orders(&db, &other, Default::default()).await?;
    assert!(theirs.data.expect("orders").items.is_empty());

    let any_order = Orders::find().one(&db).await?.expect("order");
    let err = order_service::get_order(&db, &other, any_order.id).await.unwrap_err();
    assert!(matches!(err, AppError::NotFound));

    let mine = order_service::get_order(&db, &user, any_order.id).await?.data.expect("order");
    assert_eq!(mine.items.len(), 1);
    assert_eq!(mine.items[0].product_name, "A");
    Ok(())
}

#[tokio::test]
async fn concurrent_checkouts_cannot_both_take_the_last_unit() -> anyhow::Result<()> {
    let db = common::setup_db().await;
    let events = OrderEvents::disabled();
    let alice = common::create_user(&db, "alice", false).await;
    let bob = common::create_user(&db, "bob", false).await;
    let last = common::create_product(&db, "Last one", 4_200, 1).await;

    common::add(&db, &alice, last.id, 1).await;
    common::add(&db, &bob, last.id, 1).await;

    let (first, second) = tokio::join!(
        order_service::checkout(&db, &events, &alice, common::checkout_request()),
        order_service::checkout(&db, &events, &bob, common::checkout_request()),
    );

    let (winner, loser) = match (first, second) {
        (Ok(placed), Err(err)) => (placed, (bob.user_id, err)),
        (Err(err), Ok(placed)) => (placed, (alice.user_id, err)),
        (Ok(_), Ok(_)) => panic!("both checkouts took the last unit"),
        (Err(a), Err(b)) => panic!("both checkouts failed: {a:?} / {b:?}"),
    };
    match loser.1 {
        AppError::InsufficientStock {
            product_id,
            requested,
            available,
            ..
        } => {
            assert_eq!(product_id, last.id);
            assert_eq!(requested, 1);
            assert_eq!(available, 0);
        }
        other => panic!("unexpected error: {other:?}"),
    }

    assert_eq!(winner.data.expect("order").order.total_amount, 4_200);
    assert_eq!(common::stock_of(&db, last.id).await, 0);
    assert_eq!(Orders::find().count(&db).await?, 1);
    assert_eq!(OrderItems::find().count(&db).await?, 1);
    assert_eq!(common::log_count(&db, loser.0, "PURCHASE").await, 0);
    Ok(())
}
