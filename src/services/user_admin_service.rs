use sea_orm::{
    ActiveModelTrait, ColumnTrait, Condition, ConnectionTrait, EntityTrait, PaginatorTrait,
    QueryFilter, QueryOrder, QuerySelect, Set, TransactionTrait,
};
use sea_orm::sea_query::LockType;
use uuid::Uuid;

use crate::{
    audit::{UserAction, log_user_action},
    dto::admin::{UserDetail, UserList, UserLogList},
    entity::{
        orders::{Column as OrderCol, Entity as Orders},
        user_logs::{Column as LogCol, Entity as UserLogs},
        users::{ActiveModel as UserActive, Column as UserCol, Entity as Users, Model as UserModel},
    },
    error::{AppError, AppResult},
    middleware::auth::{AuthUser, ensure_admin},
    models::{Order, User, UserLog},
    response::{ApiResponse, Meta},
    routes::params::{UserListQuery, UserLogQuery},
    services::{admin_service::revenue, search::lower_like},
};

const RECENT_ORDERS: u64 = 5;
const RECENT_LOGS: u64 = 10;

pub async fn list_users<C>(
    db: &C,
    user: &AuthUser,
    query: UserListQuery,
) -> AppResult<ApiResponse<UserList>>
where
    C: ConnectionTrait,
{
    ensure_admin(user)?;
    let (page, limit, offset) = query.pagination().normalize();

    let mut condition = Condition::all();
    if let Some(search) = query.search.as_ref().map(|s| s.trim()).filter(|s| !s.is_empty()) {
        condition = condition.add(
            Condition::any()
                .add(lower_like(UserCol::Username, search))
                .add(lower_like(UserCol::Email, search))
                .add(lower_like(UserCol::Phone, search)),
        );
    }

    let finder = Users::find()
        .filter(condition)
        .order_by_desc(UserCol::CreatedAt);
    let total = finder.clone().count(db).await? as i64;

    let items = finder
        .limit(limit as u64)
        .offset(offset as u64)
        .all(db)
        .await?
        .into_iter()
        .map(User::from)
        .collect();

    let data = UserList {
        items,
        total_users: Users::find().count(db).await? as i64,
        admin_count: Users::find()
            .filter(UserCol::IsAdmin.eq(true))
            .count(db)
            .await? as i64,
        active_count: Users::find()
            .filter(UserCol::IsActive.eq(true))
            .count(db)
            .await? as i64,
    };
    Ok(ApiResponse::paged("Users", data, Meta::new(page, limit, total)))
}

pub async fn user_detail<C>(db: &C, user: &AuthUser, id: Uuid) -> AppResult<ApiResponse<UserDetail>>
where
    C: ConnectionTrait,
{
    ensure_admin(user)?;
    let target = Users::find_by_id(id)
        .one(db)
        .await?
        .ok_or(AppError::NotFound)?;

    let order_count = Orders::find()
        .filter(OrderCol::UserId.eq(id))
        .count(db)
        .await? as i64;
    let total_spent = revenue(db, Condition::all().add(OrderCol::UserId.eq(id))).await?;

    let recent_orders = Orders::find()
        .filter(OrderCol::UserId.eq(id))
        .order_by_desc(OrderCol::CreatedAt)
        .limit(RECENT_ORDERS)
        .all(db)
        .await?
        .into_iter()
        .map(Order::from)
        .collect();

    let recent_logs = UserLogs::find()
        .filter(LogCol::UserId.eq(id))
        .order_by_desc(LogCol::CreatedAt)
        .limit(RECENT_LOGS)
        .all(db)
        .await?
        .into_iter()
        .map(UserLog::from)
        .collect();

    let data = UserDetail {
        user: User::from(target),
        order_count,
        total_spent,
        recent_orders,
        recent_logs,
    };
    Ok(ApiResponse::ok("User", data))
}

pub async fn toggle_active<C>(db: &C, user: &AuthUser, id: Uuid) -> AppResult<ApiResponse<User>>
where
    C: ConnectionTrait + TransactionTrait,
{
    toggle_flag(db, user, id, UserFlag::Active).await
}

pub async fn toggle_admin<C>(db: &C, user: &AuthUser, id: Uuid) -> AppResult<ApiResponse<User>>
where
    C: ConnectionTrait + TransactionTrait,
{
    toggle_flag(db, user, id, UserFlag::Admin).await
}

#[derive(Debug, Clone, Copy)]
enum UserFlag {
    Active,
    Admin,
}

async fn toggle_flag<C>(
    db: &C,
    user: &AuthUser,
    id: Uuid,
    flag: UserFlag,
) -> AppResult<ApiResponse<User>>
where
    C: ConnectionTrait + TransactionTrait,
{
    ensure_admin(user)?;
    if id == user.user_id {
        return Err(AppError::validation("cannot change your own account flags"));
    }

    let txn = db.begin().await?;
    let target: UserModel = Users::find_by_id(id)
        .lock(LockType::Update)
        .one(&txn)
        .await?
        .ok_or(AppError::NotFound)?;

    let (action, value) = match flag {
        UserFlag::Active => (UserAction::ToggleUserActive, !target.is_active),
        UserFlag::Admin => (UserAction::ToggleUserAdmin, !target.is_admin),
    };
    let username = target.username.clone();

    let mut active: UserActive = target.into();
    match flag {
        UserFlag::Active => active.is_active = Set(value),
        UserFlag::Admin => active.is_admin = Set(value),
    }
    let updated = active.update(&txn).await?;

    log_user_action(
        &txn,
        user,
        action,
        Some(format!("user:{id}")),
        Some(format!("{username}: {value}")),
    )
    .await?;
    txn.commit().await?;

    tracing::info!(target_user = %id, ?flag, value, "user flag changed");
    Ok(ApiResponse::ok("User updated", User::from(updated)))
}

pub async fn list_logs<C>(
    db: &C,
    user: &AuthUser,
    query: UserLogQuery,
) -> AppResult<ApiResponse<UserLogList>>
where
    C: ConnectionTrait,
{
    ensure_admin(user)?;
    let (page, limit, offset) = query.pagination().normalize();

    let mut condition = Condition::all();
    if let Some(user_id) = query.user_id {
        condition = condition.add(LogCol::UserId.eq(user_id));
    }
    if let Some(action) = query.action.as_ref().map(|a| a.trim()).filter(|a| !a.is_empty()) {
        condition = condition.add(LogCol::Action.eq(action.to_uppercase()));
    }

    let finder = UserLogs::find()
        .filter(condition)
        .order_by_desc(LogCol::CreatedAt);
    let total = finder.clone().count(db).await? as i64;

    let items = finder
        .limit(limit as u64)
        .offset(offset as u64)
        .all(db)
        .await?
        .into_iter()
        .map(UserLog::from)
        .collect();

    Ok(ApiResponse::paged(
        "User logs",
        UserLogList { items },
        Meta::new(page, limit, total),
    ))
}
