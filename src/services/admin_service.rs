use chrono::{NaiveTime, Utc};
use sea_orm::prelude::DateTimeWithTimeZone;
use sea_orm::sea_query::{Expr, LockType};
use sea_orm::{
    ActiveModelTrait, ColumnTrait, Condition, ConnectionTrait, EntityTrait, FromQueryResult,
    JoinType, PaginatorTrait, QueryFilter, QueryOrder, QuerySelect, RelationTrait, Set,
    TransactionTrait,
};
use uuid::Uuid;

use crate::{
    audit::{UserAction, log_user_action},
    dto::{
        admin::{AdminOrderDetail, AdminOrderList, OrderStatistics, PopularProduct, StatusCount},
        orders::UpdateOrderStatusRequest,
        products::{InventoryAdjustRequest, ProductList},
    },
    entity::{
        order_items::{Column as OrderItemCol, Entity as OrderItems},
        orders::{self, Column as OrderCol, Entity as Orders},
        products::{ActiveModel as ProductActive, Column as ProdCol, Entity as Products},
        users::{Column as UserCol, Entity as Users},
    },
    error::{AppError, AppResult},
    middleware::auth::{AuthUser, ensure_admin},
    models::{Order, Product, User},
    notify::OrderEvents,
    response::{ApiResponse, Meta},
    routes::params::{AdminOrderQuery, LowStockQuery, SortOrder},
    services::{order_service, search::lower_like},
    status::OrderStatus,
};

pub const DEFAULT_LOW_STOCK_THRESHOLD: i32 = 5;
const POPULAR_PRODUCTS_LIMIT: u64 = 10;
const CSV_TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

#[derive(Debug, FromQueryResult)]
struct SumRow {
    total: i64,
}

#[derive(Debug, FromQueryResult)]
struct StatusRow {
    status: OrderStatus,
    count: i64,
}

#[derive(Debug, FromQueryResult)]
struct PopularRow {
    product_id: Uuid,
    name: String,
    total_sold: i64,
    total_revenue: i64,
}

pub async fn list_all_orders<C>(
    db: &C,
    user: &AuthUser,
    query: AdminOrderQuery,
) -> AppResult<ApiResponse<AdminOrderList>>
where
    C: ConnectionTrait,
{
    ensure_admin(user)?;
    let (page, limit, offset) = query.pagination().normalize();

    let mut condition = Condition::all();
    if let Some(search) = query.search.as_ref().map(|s| s.trim()).filter(|s| !s.is_empty()) {
        condition = condition.add(
            Condition::any()
                .add(lower_like((Orders, OrderCol::OrderNumber), search))
                .add(lower_like((Users, UserCol::Username), search))
                .add(lower_like((Users, UserCol::Email), search)),
        );
    }
    if let Some(status) = query.status.as_deref().filter(|s| !s.is_empty()) {
        let status: OrderStatus = status.parse()?;
        condition = condition.add(OrderCol::Status.eq(status));
    }
    if let Some(from) = query.date_from {
        condition = condition.add(OrderCol::CreatedAt.gte(start_of_day(from)));
    }
    if let Some(to) = query.date_to.and_then(|d| d.succ_opt()) {
        condition = condition.add(OrderCol::CreatedAt.lt(start_of_day(to)));
    }

    let mut finder = Orders::find()
        .join(JoinType::InnerJoin, orders::Relation::Users.def())
        .filter(condition);

    let sort_order = query.sort_order.unwrap_or(SortOrder::Desc);
    finder = match sort_order {
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

    let data = AdminOrderList {
        items: orders,
        total_orders: Orders::find().count(db).await? as i64,
        total_revenue: revenue(db, Condition::all()).await?,
    };
    Ok(ApiResponse::paged("Orders", data, Meta::new(page, limit, total)))
}

pub async fn get_order_admin<C>(
    db: &C,
    user: &AuthUser,
    id: Uuid,
) -> AppResult<ApiResponse<AdminOrderDetail>>
where
    C: ConnectionTrait,
{
    ensure_admin(user)?;
    let (order, customer) = Orders::find_by_id(id)
        .find_also_related(Users)
        .one(db)
        .await?
        .ok_or(AppError::NotFound)?;
    let customer = customer.ok_or(AppError::NotFound)?;

    let items = order_service::load_items(db, order.id).await?;

    let data = AdminOrderDetail {
        order: Order::from(order),
        items,
        customer: User::from(customer),
    };
    Ok(ApiResponse::success("Order found", data, Some(Meta::empty())))
}

pub async fn update_order_status<C>(
    db: &C,
    events: &OrderEvents,
    user: &AuthUser,
    id: Uuid,
    payload: UpdateOrderStatusRequest,
) -> AppResult<ApiResponse<Order>>
where
    C: ConnectionTrait + TransactionTrait,
{
    ensure_admin(user)?;
    order_service::transition_status(db, events, user, id, payload.status.trim()).await
}

/// Only cancelled orders may be removed; their stock was already restored.
pub async fn delete_order<C>(
    db: &C,
    user: &AuthUser,
    id: Uuid,
) -> AppResult<ApiResponse<serde_json::Value>>
where
    C: ConnectionTrait + TransactionTrait,
{
    ensure_admin(user)?;

    let txn = db.begin().await?;
    let order = Orders::find_by_id(id)
        .lock(LockType::Update)
        .one(&txn)
        .await?
        .ok_or(AppError::NotFound)?;

    if order.status != OrderStatus::Cancelled {
        return Err(AppError::IllegalTransition {
            from: order.status.to_string(),
            to: "deleted".to_string(),
        });
    }

    OrderItems::delete_many()
        .filter(OrderItemCol::OrderId.eq(id))
        .exec(&txn)
        .await?;
    Orders::delete_by_id(id).exec(&txn).await?;

    log_user_action(
        &txn,
        user,
        UserAction::DeleteOrder,
        Some(format!("order:{}", order.order_number)),
        None,
    )
    .await?;
    txn.commit().await?;

    tracing::info!(order_number = %order.order_number, "order deleted");
    Ok(ApiResponse::success(
        "Deleted",
        serde_json::json!({ "id": id, "order_number": order.order_number }),
        Some(Meta::empty()),
    ))
}

/// Every order, newest first, as CSV text.
pub async fn export_orders_csv<C>(db: &C, user: &AuthUser) -> AppResult<String>
where
    C: ConnectionTrait,
{
    ensure_admin(user)?;

    let rows = Orders::find()
        .find_also_related(Users)
        .order_by_desc(OrderCol::CreatedAt)
        .all(db)
        .await?;

    let mut writer = csv::Writer::from_writer(Vec::new());
    writer
        .write_record([
            "order_number",
            "username",
            "email",
            "total_amount",
            "status",
            "payment_method",
            "shipping_address",
            "created_at",
            "paid_at",
            "shipped_at",
            "completed_at",
        ])
        .map_err(csv_error)?;

    for (order, customer) in &rows {
        let (username, email) = customer
            .as_ref()
            .map(|c| (c.username.clone(), c.email.clone()))
            .unwrap_or_default();
        writer
            .write_record([
                order.order_number.clone(),
                username,
                email,
                order.total_amount.to_string(),
                order.status.to_string(),
                order.payment_method.clone().unwrap_or_default(),
                order.shipping_address.clone(),
                format_time(Some(order.created_at)),
                format_time(order.paid_at),
                format_time(order.shipped_at),
                format_time(order.completed_at),
            ])
            .map_err(csv_error)?;
    }

    let bytes = writer
        .into_inner()
        .map_err(|e| AppError::Internal(anyhow::anyhow!(e.to_string())))?;
    let body = String::from_utf8(bytes).map_err(|e| AppError::Internal(e.into()))?;

    log_user_action(
        db,
        user,
        UserAction::ExportOrders,
        None,
        Some(format!("rows: {}", rows.len())),
    )
    .await?;

    Ok(body)
}

pub async fn order_statistics<C>(db: &C, user: &AuthUser) -> AppResult<ApiResponse<OrderStatistics>>
where
    C: ConnectionTrait,
{
    ensure_admin(user)?;

    let by_status = Orders::find()
        .select_only()
        .column(OrderCol::Status)
        .column_as(OrderCol::Id.count(), "count")
        .group_by(OrderCol::Status)
        .into_model::<StatusRow>()
        .all(db)
        .await?
        .into_iter()
        .map(|row| StatusCount {
            status: row.status,
            count: row.count,
        })
        .collect();

    let popular_products = OrderItems::find()
        .select_only()
        .column(OrderItemCol::ProductId)
        .column_as(OrderItemCol::ProductName.max(), "name")
        .column_as(
            Expr::cust("CAST(COALESCE(SUM(quantity), 0) AS BIGINT)"),
            "total_sold",
        )
        .column_as(
            Expr::cust("CAST(COALESCE(SUM(subtotal), 0) AS BIGINT)"),
            "total_revenue",
        )
        .group_by(OrderItemCol::ProductId)
        .order_by_desc(Expr::cust("total_sold"))
        .limit(POPULAR_PRODUCTS_LIMIT)
        .into_model::<PopularRow>()
        .all(db)
        .await?
        .into_iter()
        .map(|row| PopularProduct {
            product_id: row.product_id,
            name: row.name,
            total_sold: row.total_sold,
            total_revenue: row.total_revenue,
        })
        .collect();

    let data = OrderStatistics {
        total_orders: Orders::find().count(db).await? as i64,
        total_revenue: revenue(db, Condition::all()).await?,
        by_status,
        popular_products,
    };
    Ok(ApiResponse::ok("Statistics", data))
}

pub async fn list_low_stock<C>(
    db: &C,
    user: &AuthUser,
    query: LowStockQuery,
) -> AppResult<ApiResponse<ProductList>>
where
    C: ConnectionTrait,
{
    ensure_admin(user)?;
    let threshold = query.threshold.unwrap_or(DEFAULT_LOW_STOCK_THRESHOLD);
    let (page, limit, offset) = query.pagination().normalize();

    let finder = Products::find()
        .filter(ProdCol::Stock.lte(threshold))
        .order_by_asc(ProdCol::Stock)
        .order_by_desc(ProdCol::CreatedAt);

    let total = finder.clone().count(db).await? as i64;

    let items = finder
        .limit(limit as u64)
        .offset(offset as u64)
        .all(db)
        .await?
        .into_iter()
        .map(Product::from)
        .collect();

    let data = ProductList { items };
    let meta = Meta::new(page, limit, total);
    Ok(ApiResponse::success("Low stock", data, Some(meta)))
}

pub async fn adjust_inventory<C>(
    db: &C,
    user: &AuthUser,
    id: Uuid,
    payload: InventoryAdjustRequest,
) -> AppResult<ApiResponse<Product>>
where
    C: ConnectionTrait + TransactionTrait,
{
    ensure_admin(user)?;
    if payload.delta == 0 {
        return Err(AppError::validation("delta must not be 0"));
    }

    let txn = db.begin().await?;
    let product = Products::find_by_id(id)
        .lock(LockType::Update)
        .one(&txn)
        .await?
        .ok_or(AppError::NotFound)?;

    let new_stock = product
        .stock
        .checked_add(payload.delta)
        .filter(|s| *s >= 0)
        .ok_or_else(|| AppError::validation("stock cannot be negative"))?;
    let before = product.stock;

    let mut active: ProductActive = product.into();
    active.stock = Set(new_stock);
    active.updated_at = Set(Utc::now().into());
    let updated = active.update(&txn).await?;

    log_user_action(
        &txn,
        user,
        UserAction::AdjustInventory,
        Some(format!("product:{}", updated.id)),
        Some(format!("stock: {before} -> {new_stock}")),
    )
    .await?;
    txn.commit().await?;

    Ok(ApiResponse::success(
        "Inventory updated",
        Product::from(updated),
        Some(Meta::empty()),
    ))
}

/// Sum of `total_amount` over orders matching `condition`.
pub(crate) async fn revenue<C>(db: &C, condition: Condition) -> AppResult<i64>
where
    C: ConnectionTrait,
{
    Ok(Orders::find()
        .select_only()
        .column_as(
            Expr::cust("CAST(COALESCE(SUM(total_amount), 0) AS BIGINT)"),
            "total",
        )
        .filter(condition)
        .into_model::<SumRow>()
        .one(db)
        .await?
        .map(|row| row.total)
        .unwrap_or(0))
}

fn start_of_day(date: chrono::NaiveDate) -> DateTimeWithTimeZone {
    date.and_time(NaiveTime::MIN).and_utc().into()
}

fn format_time(value: Option<DateTimeWithTimeZone>) -> String {
    value
        .map(|t| t.with_timezone(&Utc).format(CSV_TIME_FORMAT).to_string())
        .unwrap_or_default()
}

fn csv_error(err: csv::Error) -> AppError {
    AppError::Internal(err.into())
}
