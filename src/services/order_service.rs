use std::collections::HashMap;

use anyhow::anyhow;
use chrono::{DateTime, Utc};
use password_hash::rand_core::{OsRng, RngCore};
use sea_orm::prelude::DateTimeWithTimeZone;
use sea_orm::sea_query::{Expr, LockType};
use sea_orm::{
    ActiveModelTrait, ColumnTrait, Condition, ConnectionTrait, EntityTrait, PaginatorTrait,
    QueryFilter, QueryOrder, QuerySelect, Set, TransactionTrait,
};
use uuid::Uuid;

use crate::{
    audit::{UserAction, log_user_action},
    dto::orders::{CheckoutRequest, OrderList, OrderWithItems},
    entity::{
        cart_items::{Column as CartItemCol, Entity as CartItems},
        carts::{Column as CartCol, Entity as Carts},
        order_items::{ActiveModel as OrderItemActive, Column as OrderItemCol, Entity as OrderItems},
        orders::{ActiveModel as OrderActive, Column as OrderCol, Entity as Orders, Model as OrderModel},
        products::{Column as ProdCol, Entity as Products, Model as ProductModel},
        users::Entity as Users,
    },
    error::{AppError, AppResult},
    middleware::auth::AuthUser,
    models::{Order, OrderItem},
    notify::{OrderEvent, OrderEvents},
    response::{ApiResponse, Meta},
    routes::params::{OrderListQuery, SortOrder},
    status::{OrderStatus, Transition},
};

const ORDER_NUMBER_ATTEMPTS: usize = 8;

struct CheckoutLine {
    product_id: Uuid,
    product_name: String,
    quantity: i32,
    price: i64,
    subtotal: i64,
}

pub async fn list_orders<C>(
    db: &C,
    user: &AuthUser,
    query: OrderListQuery,
) -> AppResult<ApiResponse<OrderList>>
where
    C: ConnectionTrait,
{
    let (page, limit, offset) = query.pagination().normalize();
    let mut condition = Condition::all().add(OrderCol::UserId.eq(user.user_id));
    if let Some(status) = query.status.as_deref().filter(|s| !s.is_empty()) {
        let status: OrderStatus = status.parse()?;
        condition = condition.add(OrderCol::Status.eq(status));
    }

    let mut finder = Orders::find().filter(condition);
    finder = match query.sort_order.unwrap_or(SortOrder::Desc) {
        SortOrder::Asc => finder.order_by_asc(OrderCol::CreatedAt),
        SortOrder::Desc => finder.order_by_desc(OrderCol::CreatedAt),
    };

    let total = finder.clone().count(db).await? as i64;

    let orders = finder
        .limit(limit as u64)
        .offset(offset as u64)
        .all(db)
        .await?
        .into_iter()
        .map(Order::from)
        .collect();

    let meta = Meta::new(page, limit, total);
    Ok(ApiResponse::paged("Ok", OrderList { items: orders }, meta))
}

pub async fn get_order<C>(db: &C, user: &AuthUser, id: Uuid) -> AppResult<ApiResponse<OrderWithItems>>
where
    C: ConnectionTrait,
{
    let order = Orders::find()
        .filter(
            Condition::all()
                .add(OrderCol::UserId.eq(user.user_id))
                .add(OrderCol::Id.eq(id)),
        )
        .one(db)
        .await?
        .ok_or(AppError::NotFound)?;

    let items = load_items(db, order.id).await?;

    Ok(ApiResponse::ok(
        "OK",
        OrderWithItems {
            order: Order::from(order),
            items,
        },
    ))
}

/// Turn the caller's cart into a `pending` order.
///
/// Every product row involved is locked for the duration of the transaction and
/// stock is decremented with a guarded update, so two concurrent checkouts for
/// the last unit cannot both succeed. Any failure rolls the whole thing back.
/// The confirmation event is published only after commit.
pub async fn checkout<C>(
    db: &C,
    events: &OrderEvents,
    user: &AuthUser,
    payload: CheckoutRequest,
) -> AppResult<ApiResponse<OrderWithItems>>
where
    C: ConnectionTrait + TransactionTrait,
{
    let shipping_address = payload.shipping_address.trim().to_string();
    if shipping_address.is_empty() {
        return Err(AppError::validation("shipping address is required"));
    }

    let txn = db.begin().await?;

    let customer = Users::find_by_id(user.user_id)
        .one(&txn)
        .await?
        .ok_or(AppError::NotFound)?;
    if !customer.is_active {
        return Err(AppError::Forbidden);
    }

    let cart = Carts::find()
        .filter(CartCol::UserId.eq(user.user_id))
        .one(&txn)
        .await?
        .ok_or_else(|| AppError::validation("cart is empty"))?;

    let cart_items = CartItems::find()
        .filter(CartItemCol::CartId.eq(cart.id))
        .order_by_asc(CartItemCol::ProductId)
        .all(&txn)
        .await?;
    if cart_items.is_empty() {
        return Err(AppError::validation("cart is empty"));
    }

    // Lock in a stable order so concurrent checkouts cannot deadlock.
    let product_ids: Vec<Uuid> = cart_items.iter().map(|item| item.product_id).collect();
    let products: HashMap<Uuid, ProductModel> = Products::find()
        .filter(ProdCol::Id.is_in(product_ids))
        .order_by_asc(ProdCol::Id)
        .lock(LockType::Update)
        .all(&txn)
        .await?
        .into_iter()
        .map(|p| (p.id, p))
        .collect();

    let mut lines = Vec::with_capacity(cart_items.len());
    let mut total_amount: i64 = 0;
    for item in &cart_items {
        let product = products
            .get(&item.product_id)
            .filter(|p| p.is_active)
            .ok_or(AppError::NotFound)?;
        if item.quantity <= 0 {
            return Err(AppError::validation("cart has an invalid quantity"));
        }
        if item.quantity > product.stock {
            return Err(insufficient(product, item.quantity));
        }
        let subtotal = product
            .price
            .checked_mul(i64::from(item.quantity))
            .ok_or_else(|| AppError::validation("order amount is too large"))?;
        total_amount = total_amount
            .checked_add(subtotal)
            .ok_or_else(|| AppError::validation("order amount is too large"))?;
        lines.push(CheckoutLine {
            product_id: product.id,
            product_name: product.name.clone(),
            quantity: item.quantity,
            price: product.price,
            subtotal,
        });
    }

    let now = Utc::now();
    let now_tz: DateTimeWithTimeZone = now.into();
    let order_number = unique_order_number(&txn, now).await?;

    let order = OrderActive {
        id: Set(Uuid::new_v4()),
        order_number: Set(order_number),
        user_id: Set(user.user_id),
        total_amount: Set(total_amount),
        status: Set(OrderStatus::Pending),
        shipping_address: Set(shipping_address),
        contact_phone: Set(non_blank(payload.contact_phone)),
        payment_method: Set(non_blank(payload.payment_method)),
        notes: Set(non_blank(payload.notes)),
        created_at: Set(now_tz),
        updated_at: Set(now_tz),
        paid_at: Set(None),
        shipped_at: Set(None),
        completed_at: Set(None),
        cancelled_at: Set(None),
    }
    .insert(&txn)
    .await?;

    let mut order_items = Vec::with_capacity(lines.len());
    for line in lines {
        let decremented = Products::update_many()
            .col_expr(ProdCol::Stock, Expr::col(ProdCol::Stock).sub(line.quantity))
            .col_expr(ProdCol::UpdatedAt, Expr::value(now_tz))
            .filter(ProdCol::Id.eq(line.product_id))
            .filter(ProdCol::Stock.gte(line.quantity))
            .exec(&txn)
            .await?;
        if decremented.rows_affected != 1 {
            let product = &products[&line.product_id];
            return Err(insufficient(product, line.quantity));
        }

        let item = OrderItemActive {
            id: Set(Uuid::new_v4()),
            order_id: Set(order.id),
            product_id: Set(line.product_id),
            product_name: Set(line.product_name),
            quantity: Set(line.quantity),
            price: Set(line.price),
            subtotal: Set(line.subtotal),
            created_at: Set(now_tz),
        }
        .insert(&txn)
        .await?;
        order_items.push(OrderItem::from(item));
    }

    CartItems::delete_many()
        .filter(CartItemCol::CartId.eq(cart.id))
        .exec(&txn)
        .await?;

    log_user_action(
        &txn,
        user,
        UserAction::Purchase,
        Some(format!("order:{}", order.order_number)),
        Some(format!("total: {total_amount}")),
    )
    .await?;

    txn.commit().await?;

    tracing::info!(
        order_number = %order.order_number,
        user_id = %user.user_id,
        total_amount,
        items = order_items.len(),
        "order created"
    );

    events.publish(OrderEvent::Created {
        order_id: order.id,
        order_number: order.order_number.clone(),
        user_id: user.user_id,
        email: customer.email,
        total_amount,
        item_count: order_items.len(),
    });

    Ok(ApiResponse::ok(
        "Checkout success",
        OrderWithItems {
            order: Order::from(order),
            items: order_items,
        },
    ))
}

/// Move an order to `target`.
///
/// Admins may perform any legal transition. The owner may only pay or cancel
/// their own order; anyone else is rejected before anything is read for update.
pub async fn transition_status<C>(
    db: &C,
    events: &OrderEvents,
    actor: &AuthUser,
    order_id: Uuid,
    target: &str,
) -> AppResult<ApiResponse<Order>>
where
    C: ConnectionTrait + TransactionTrait,
{
    let target: OrderStatus = target.parse()?;

    let txn = db.begin().await?;
    let order = Orders::find_by_id(order_id)
        .lock(LockType::Update)
        .one(&txn)
        .await?
        .ok_or(AppError::NotFound)?;

    authorize_transition(actor, &order, target)?;

    let from = order.status;
    let plan = from.plan(target)?;
    let order = apply_transition(&txn, order, plan).await?;

    if plan != Transition::Unchanged {
        let action = if actor.is_admin {
            UserAction::UpdateOrderStatus
        } else if target == OrderStatus::Cancelled {
            UserAction::CancelOrder
        } else {
            UserAction::PayOrder
        };
        log_user_action(
            &txn,
            actor,
            action,
            Some(format!("order:{}", order.order_number)),
            Some(format!("status: {from} -> {target}")),
        )
        .await?;
    }

    txn.commit().await?;

    if plan == Transition::Cancel {
        tracing::info!(order_number = %order.order_number, "order cancelled, stock restored");
        events.publish(OrderEvent::Cancelled {
            order_id: order.id,
            order_number: order.order_number.clone(),
            user_id: order.user_id,
        });
    }

    let message = match plan {
        Transition::Unchanged => "Order unchanged",
        Transition::Advance(_) => "Order updated",
        Transition::Cancel => "Order cancelled",
    };
    Ok(ApiResponse::ok(message, Order::from(order)))
}

pub async fn pay_order<C>(
    db: &C,
    events: &OrderEvents,
    user: &AuthUser,
    id: Uuid,
) -> AppResult<ApiResponse<Order>>
where
    C: ConnectionTrait + TransactionTrait,
{
    transition_status(db, events, user, id, OrderStatus::Paid.as_str()).await
}

pub async fn cancel_order<C>(
    db: &C,
    events: &OrderEvents,
    user: &AuthUser,
    id: Uuid,
) -> AppResult<ApiResponse<Order>>
where
    C: ConnectionTrait + TransactionTrait,
{
    transition_status(db, events, user, id, OrderStatus::Cancelled.as_str()).await
}

pub(crate) async fn load_items<C>(db: &C, order_id: Uuid) -> AppResult<Vec<OrderItem>>
where
    C: ConnectionTrait,
{
    Ok(OrderItems::find()
        .filter(OrderItemCol::OrderId.eq(order_id))
        .order_by_asc(OrderItemCol::CreatedAt)
        .all(db)
        .await?
        .into_iter()
        .map(OrderItem::from)
        .collect())
}

fn authorize_transition(actor: &AuthUser, order: &OrderModel, target: OrderStatus) -> AppResult<()> {
    if actor.is_admin {
        return Ok(());
    }
    if order.user_id != actor.user_id {
        return Err(AppError::Unauthorized);
    }
    match target {
        OrderStatus::Paid | OrderStatus::Cancelled => Ok(()),
        _ => Err(AppError::Forbidden),
    }
}

async fn apply_transition<C>(db: &C, order: OrderModel, plan: Transition) -> AppResult<OrderModel>
where
    C: ConnectionTrait,
{
    let now: DateTimeWithTimeZone = Utc::now().into();
    match plan {
        Transition::Unchanged => Ok(order),
        Transition::Advance(next) => {
            let mut active: OrderActive = order.clone().into();
            active.status = Set(next);
            active.updated_at = Set(now);
            // each milestone is stamped once and never overwritten
            match next {
                OrderStatus::Paid if order.paid_at.is_none() => active.paid_at = Set(Some(now)),
                OrderStatus::Shipped if order.shipped_at.is_none() => {
                    active.shipped_at = Set(Some(now))
                }
                OrderStatus::Completed if order.completed_at.is_none() => {
                    active.completed_at = Set(Some(now))
                }
                _ => {}
            }
            Ok(active.update(db).await?)
        }
        Transition::Cancel => {
            restore_inventory(db, order.id, now).await?;
            let mut active: OrderActive = order.into();
            active.status = Set(OrderStatus::Cancelled);
            active.cancelled_at = Set(Some(now));
            active.updated_at = Set(now);
            Ok(active.update(db).await?)
        }
    }
}

async fn restore_inventory<C>(db: &C, order_id: Uuid, now: DateTimeWithTimeZone) -> AppResult<()>
where
    C: ConnectionTrait,
{
    let items = OrderItems::find()
        .filter(OrderItemCol::OrderId.eq(order_id))
        .all(db)
        .await?;

    for item in items {
        Products::update_many()
            .col_expr(ProdCol::Stock, Expr::col(ProdCol::Stock).add(item.quantity))
            .col_expr(ProdCol::UpdatedAt, Expr::value(now))
            .filter(ProdCol::Id.eq(item.product_id))
            .exec(db)
            .await?;
    }
    Ok(())
}

fn insufficient(product: &ProductModel, requested: i32) -> AppError {
    AppError::InsufficientStock {
        product_id: product.id,
        product_name: product.name.clone(),
        requested,
        available: product.stock.max(0),
    }
}

fn non_blank(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

/// `ORD` + `yyyymmddHHMMSS` + six random digits.
pub fn generate_order_number(now: DateTime<Utc>) -> String {
    let suffix = OsRng.next_u32() % 1_000_000;
    format!("ORD{}{:06}", now.format("%Y%m%d%H%M%S"), suffix)
}

async fn unique_order_number<C>(db: &C, now: DateTime<Utc>) -> AppResult<String>
where
    C: ConnectionTrait,
{
    for _ in 0..ORDER_NUMBER_ATTEMPTS {
        let candidate = generate_order_number(now);
        let taken = Orders::find()
            .filter(OrderCol::OrderNumber.eq(candidate.as_str()))
            .count(db)
            .await?;
        if taken == 0 {
            return Ok(candidate);
        }
        tracing::debug!(%candidate, "order number collision, retrying");
    }
    Err(AppError::Internal(anyhow!(
        "could not allocate a unique order number"
    )))
}
