use chrono::Utc;
use sea_orm::{ActiveModelTrait, ConnectionTrait, Set};
use uuid::Uuid;

use crate::{entity::user_logs, error::AppResult, middleware::auth::AuthUser};

/// Action codes written to `user_logs.action`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UserAction {
    Register,
    Login,
    UpdateProfile,
    AddToCart,
    UpdateCart,
    RemoveFromCart,
    ClearCart,
    Purchase,
    PayOrder,
    CancelOrder,
    UpdateOrderStatus,
    DeleteOrder,
    ExportOrders,
    CreateProduct,
    UpdateProduct,
    DeleteProduct,
    AdjustInventory,
    CreateCategory,
    UpdateCategory,
    DeleteCategory,
    ToggleUserActive,
    ToggleUserAdmin,
}

impl UserAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            UserAction::Register => "REGISTER",
            UserAction::Login => "LOGIN",
            UserAction::UpdateProfile => "UPDATE_PROFILE",
            UserAction::AddToCart => "ADD_TO_CART",
            UserAction::UpdateCart => "UPDATE_CART",
            UserAction::RemoveFromCart => "REMOVE_FROM_CART",
            UserAction::ClearCart => "CLEAR_CART",
            UserAction::Purchase => "PURCHASE",
            UserAction::PayOrder => "PAY_ORDER",
            UserAction::CancelOrder => "CANCEL_ORDER",
            UserAction::UpdateOrderStatus => "UPDATE_ORDER_STATUS",
            UserAction::DeleteOrder => "DELETE_ORDER",
            UserAction::ExportOrders => "EXPORT_ORDERS",
            UserAction::CreateProduct => "CREATE_PRODUCT",
            UserAction::UpdateProduct => "UPDATE_PRODUCT",
            UserAction::DeleteProduct => "DELETE_PRODUCT",
            UserAction::AdjustInventory => "ADJUST_INVENTORY",
            UserAction::CreateCategory => "CREATE_CATEGORY",
            UserAction::UpdateCategory => "UPDATE_CATEGORY",
            UserAction::DeleteCategory => "DELETE_CATEGORY",
            UserAction::ToggleUserActive => "TOGGLE_USER_ACTIVE",
            UserAction::ToggleUserAdmin => "TOGGLE_USER_ADMIN",
        }
    }
}

/// Append one activity entry using whatever connection or transaction the caller
/// holds, so admin mutations and their log line commit together.
pub async fn log_user_action<C>(
    db: &C,
    actor: &AuthUser,
    action: UserAction,
    target: Option<String>,
    details: Option<String>,
) -> AppResult<()>
where
    C: ConnectionTrait,
{
    user_logs::ActiveModel {
        id: Set(Uuid::new_v4()),
        user_id: Set(actor.user_id),
        action: Set(action.as_str().to_string()),
        target: Set(target),
        details: Set(details),
        ip_address: Set(actor.client.ip_address.clone()),
        user_agent: Set(actor.client.user_agent.clone()),
        created_at: Set(Utc::now().into()),
    }
    .insert(db)
    .await?;

    Ok(())
}

/// Best-effort variant for user-facing actions whose log line is not part of the
/// operation's atomic unit.
pub async fn log_user_action_lossy<C>(
    db: &C,
    actor: &AuthUser,
    action: UserAction,
    target: Option<String>,
    details: Option<String>,
) where
    C: ConnectionTrait,
{
    if let Err(err) = log_user_action(db, actor, action, target, details).await {
        tracing::warn!(error = %err, action = action.as_str(), "audit log failed");
    }
}
