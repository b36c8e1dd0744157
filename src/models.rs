use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::{entity, status::OrderStatus};

/// Public view of a user; the password hash never leaves the service layer.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct User {
    pub id: Uuid,
    pub username: String,
    pub email: String,
    pub is_admin: bool,
    pub is_active: bool,
    pub phone: Option<String>,
    pub address: Option<String>,
    pub created_at: DateTime<Utc>,
    pub last_login: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct Category {
    pub id: Uuid,
    pub name: String,
    pub description: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct Product {
    pub id: Uuid,
    pub name: String,
    pub description: Option<String>,
    pub price: i64,
    pub stock: i32,
    pub category_id: Option<Uuid>,
    pub sku: Option<String>,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct CartItem {
    pub id: Uuid,
    pub cart_id: Uuid,
    pub product_id: Uuid,
    pub quantity: i32,
    pub unit_price: i64,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct Order {
    pub id: Uuid,
    pub order_number: String,
    pub user_id: Uuid,
    pub total_amount: i64,
    pub status: OrderStatus,
    pub shipping_address: String,
    pub contact_phone: Option<String>,
    pub payment_method: Option<String>,
    pub notes: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub paid_at: Option<DateTime<Utc>>,
    pub shipped_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub cancelled_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct OrderItem {
    pub id: Uuid,
    pub order_id: Uuid,
    pub product_id: Uuid,
    pub product_name: String,
    pub quantity: i32,
    pub price: i64,
    pub subtotal: i64,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct UserLog {
    pub id: Uuid,
    pub user_id: Uuid,
    pub action: String,
    pub target: Option<String>,
    pub details: Option<String>,
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl From<entity::users::Model> for User {
    fn from(model: entity::users::Model) -> Self {
        Self {
            id: model.id,
            username: model.username,
            email: model.email,
            is_admin: model.is_admin,
            is_active: model.is_active,
            phone: model.phone,
            address: model.address,
            created_at: model.created_at.with_timezone(&Utc),
            last_login: model.last_login.map(|dt| dt.with_timezone(&Utc)),
        }
    }
}

impl From<entity::categories::Model> for Category {
    fn from(model: entity::categories::Model) -> Self {
        Self {
            id: model.id,
            name: model.name,
            description: model.description,
            created_at: model.created_at.with_timezone(&Utc),
        }
    }
}

impl From<entity::products::Model> for Product {
    fn from(model: entity::products::Model) -> Self {
        Self {
            id: model.id,
            name: model.name,
            description: model.description,
            price: model.price,
            stock: model.stock,
            category_id: model.category_id,
            sku: model.sku,
            is_active: model.is_active,
            created_at: model.created_at.with_timezone(&Utc),
            updated_at: model.updated_at.with_timezone(&Utc),
        }
    }
}

impl From<entity::cart_items::Model> for CartItem {
    fn from(model: entity::cart_items::Model) -> Self {
        Self {
            id: model.id,
            cart_id: model.cart_id,
            product_id: model.product_id,
            quantity: model.quantity,
            unit_price: model.unit_price,
            created_at: model.created_at.with_timezone(&Utc),
        }
    }
}

impl From<entity::orders::Model> for Order {
    fn from(model: entity::orders::Model) -> Self {
        Self {
            id: model.id,
            order_number: model.order_number,
            user_id: model.user_id,
            total_amount: model.total_amount,
            status: model.status,
            shipping_address: model.shipping_address,
            contact_phone: model.contact_phone,
            payment_method: model.payment_method,
            notes: model.notes,
            created_at: model.created_at.with_timezone(&Utc),
            updated_at: model.updated_at.with_timezone(&Utc),
            paid_at: model.paid_at.map(|dt| dt.with_timezone(&Utc)),
            shipped_at: model.shipped_at.map(|dt| dt.with_timezone(&Utc)),
            completed_at: model.completed_at.map(|dt| dt.with_timezone(&Utc)),
            cancelled_at: model.cancelled_at.map(|dt| dt.with_timezone(&Utc)),
        }
    }
}

impl From<entity::order_items::Model> for OrderItem {
    fn from(model: entity::order_items::Model) -> Self {
        Self {
            id: model.id,
            order_id: model.order_id,
            product_id: model.product_id,
            product_name: model.product_name,
            quantity: model.quantity,
            price: model.price,
            subtotal: model.subtotal,
            created_at: model.created_at.with_timezone(&Utc),
        }
    }
}

impl From<entity::user_logs::Model> for UserLog {
    fn from(model: entity::user_logs::Model) -> Self {
        Self {
            id: model.id,
            user_id: model.user_id,
            action: model.action,
            target: model.target,
            details: model.details,
            ip_address: model.ip_address,
            user_agent: model.user_agent,
            created_at: model.created_at.with_timezone(&Utc),
        }
    }
}
