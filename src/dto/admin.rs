use serde::Serialize;
use utoipa::ToSchema;

use crate::{
    models::{Order, OrderItem, User, UserLog},
    status::OrderStatus,
};

#[derive(Debug, Serialize, ToSchema)]
pub struct AdminOrderList {
    pub items: Vec<Order>,
    /// Orders in the whole store, ignoring filters.
    pub total_orders: i64,
    /// Revenue across the whole store, ignoring filters.
    pub total_revenue: i64,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct AdminOrderDetail {
    pub order: Order,
    pub items: Vec<OrderItem>,
    pub customer: User,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct StatusCount {
    pub status: OrderStatus,
    pub count: i64,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct PopularProduct {
    pub product_id: uuid::Uuid,
    pub name: String,
    pub total_sold: i64,
    pub total_revenue: i64,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct OrderStatistics {
    pub total_orders: i64,
    pub total_revenue: i64,
    pub by_status: Vec<StatusCount>,
    pub popular_products: Vec<PopularProduct>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct UserList {
    pub items: Vec<User>,
    pub total_users: i64,
    pub admin_count: i64,
    pub active_count: i64,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct UserDetail {
    pub user: User,
    pub order_count: i64,
    pub total_spent: i64,
    pub recent_orders: Vec<Order>,
    pub recent_logs: Vec<UserLog>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct UserLogList {
    pub items: Vec<UserLog>,
}
