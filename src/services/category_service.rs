use chrono::Utc;
use sea_orm::sea_query::Expr;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, EntityTrait, PaginatorTrait, QueryFilter,
    QueryOrder, Set, TransactionTrait,
};
use uuid::Uuid;

use crate::{
    audit::{UserAction, log_user_action},
    dto::categories::{CategoryList, CreateCategoryRequest, UpdateCategoryRequest},
    entity::{
        categories::{ActiveModel, Column, Entity as Categories},
        products::{Column as ProdCol, Entity as Products},
    },
    error::{AppError, AppResult},
    middleware::auth::{AuthUser, ensure_admin},
    models::Category,
    response::{ApiResponse, Meta},
};

pub async fn list_categories<C>(db: &C) -> AppResult<ApiResponse<CategoryList>>
where
    C: ConnectionTrait,
{
    let items = Categories::find()
        .order_by_asc(Column::Name)
        .all(db)
        .await?
        .into_iter()
        .map(Category::from)
        .collect();
    Ok(ApiResponse::ok("Categories", CategoryList { items }))
}

pub async fn create_category<C>(
    db: &C,
    user: &AuthUser,
    payload: CreateCategoryRequest,
) -> AppResult<ApiResponse<Category>>
where
    C: ConnectionTrait + TransactionTrait,
{
    ensure_admin(user)?;
    let name = required_name(&payload.name)?;

    let txn = db.begin().await?;
    ensure_name_free(&txn, &name, None).await?;

    let category = ActiveModel {
        id: Set(Uuid::new_v4()),
        name: Set(name),
        description: Set(payload.description),
        created_at: Set(Utc::now().into()),
    }
    .insert(&txn)
    .await?;

    log_user_action(
        &txn,
        user,
        UserAction::CreateCategory,
        Some(format!("category:{}", category.id)),
        Some(category.name.clone()),
    )
    .await?;
    txn.commit().await?;

    Ok(ApiResponse::success(
        "Category created",
        Category::from(category),
        Some(Meta::empty()),
    ))
}

pub async fn update_category<C>(
    db: &C,
    user: &AuthUser,
    id: Uuid,
    payload: UpdateCategoryRequest,
) -> AppResult<ApiResponse<Category>>
where
    C: ConnectionTrait + TransactionTrait,
{
    ensure_admin(user)?;

    let txn = db.begin().await?;
    let existing = Categories::find_by_id(id)
        .one(&txn)
        .await?
        .ok_or(AppError::NotFound)?;

    let mut active: ActiveModel = existing.into();
    if let Some(name) = payload.name.as_deref() {
        let name = required_name(name)?;
        ensure_name_free(&txn, &name, Some(id)).await?;
        active.name = Set(name);
    }
    if let Some(description) = payload.description {
        active.description = Set(Some(description));
    }
    let category = active.update(&txn).await?;

    log_user_action(
        &txn,
        user,
        UserAction::UpdateCategory,
        Some(format!("category:{id}")),
        Some(category.name.clone()),
    )
    .await?;
    txn.commit().await?;

    Ok(ApiResponse::success(
        "Updated",
        Category::from(category),
        Some(Meta::empty()),
    ))
}

/// Deleting a category leaves its products uncategorised.
pub async fn delete_category<C>(
    db: &C,
    user: &AuthUser,
    id: Uuid,
) -> AppResult<ApiResponse<serde_json::Value>>
where
    C: ConnectionTrait + TransactionTrait,
{
    ensure_admin(user)?;

    let txn = db.begin().await?;
    let category = Categories::find_by_id(id)
        .one(&txn)
        .await?
        .ok_or(AppError::NotFound)?;

    let detached = Products::update_many()
        .col_expr(ProdCol::CategoryId, Expr::value(Option::<Uuid>::None))
        .filter(ProdCol::CategoryId.eq(id))
        .exec(&txn)
        .await?
        .rows_affected;

    Categories::delete_by_id(id).exec(&txn).await?;

    log_user_action(
        &txn,
        user,
        UserAction::DeleteCategory,
        Some(format!("category:{id}")),
        Some(format!("{}; products detached: {detached}", category.name)),
    )
    .await?;
    txn.commit().await?;

    Ok(ApiResponse::success(
        "Deleted",
        serde_json::json!({ "id": id, "products_detached": detached }),
        Some(Meta::empty()),
    ))
}

fn required_name(name: &str) -> AppResult<String> {
    let name = name.trim();
    if name.is_empty() {
        return Err(AppError::validation("name is required"));
    }
    Ok(name.to_string())
}

async fn ensure_name_free<C>(db: &C, name: &str, except: Option<Uuid>) -> AppResult<()>
where
    C: ConnectionTrait,
{
    let mut finder = Categories::find().filter(Column::Name.eq(name));
    if let Some(id) = except {
        finder = finder.filter(Column::Id.ne(id));
    }
    if finder.count(db).await? > 0 {
        return Err(AppError::validation("category name is already in use"));
    }
    Ok(())
}
