use chrono::Utc;
use sea_orm::sea_query::LockType;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, Condition, ConnectionTrait, EntityTrait, PaginatorTrait,
    QueryFilter, QueryOrder, QuerySelect, Set, TransactionTrait,
};
use uuid::Uuid;

use crate::{
    audit::{UserAction, log_user_action},
    dto::products::{CreateProductRequest, ProductList, UpdateProductRequest},
    entity::{
        cart_items::{Column as CartItemCol, Entity as CartItems},
        categories::Entity as Categories,
        order_items::{Column as OrderItemCol, Entity as OrderItems},
        products::{ActiveModel, Column, Entity as Products},
    },
    error::{AppError, AppResult},
    middleware::auth::{AuthUser, ensure_admin},
    models::Product,
    response::{ApiResponse, Meta},
    routes::params::{ProductQuery, ProductSortBy, SortOrder},
    services::search::lower_like,
};

/// Storefront listing: active products only.
pub async fn list_products<C>(db: &C, query: ProductQuery) -> AppResult<ApiResponse<ProductList>>
where
    C: ConnectionTrait,
{
    search_products(db, query, false).await
}

/// Admin listing, including deactivated products.
pub async fn list_products_admin<C>(
    db: &C,
    user: &AuthUser,
    query: ProductQuery,
) -> AppResult<ApiResponse<ProductList>>
where
    C: ConnectionTrait,
{
    ensure_admin(user)?;
    search_products(db, query, true).await
}

async fn search_products<C>(
    db: &C,
    query: ProductQuery,
    include_inactive: bool,
) -> AppResult<ApiResponse<ProductList>>
where
    C: ConnectionTrait,
{
    let (page, limit, offset) = query.pagination().normalize();
    let mut condition = Condition::all();

    if !include_inactive {
        condition = condition.add(Column::IsActive.eq(true));
    }

    if let Some(search) = query.q.as_ref().map(|s| s.trim()).filter(|s| !s.is_empty()) {
        condition = condition.add(
            Condition::any()
                .add(lower_like(Column::Name, search))
                .add(lower_like(Column::Description, search)),
        );
    }

    if let Some(category_id) = query.category_id {
        condition = condition.add(Column::CategoryId.eq(category_id));
    }

    if let Some(min_price) = query.min_price {
        condition = condition.add(Column::Price.gte(min_price));
    }

    if let Some(max_price) = query.max_price {
        condition = condition.add(Column::Price.lte(max_price));
    }

    let sort_by = query.sort_by.unwrap_or(ProductSortBy::CreatedAt);
    let sort_order = query.sort_order.unwrap_or(SortOrder::Desc);
    let sort_col = match sort_by {
        ProductSortBy::CreatedAt => Column::CreatedAt,
        ProductSortBy::Price => Column::Price,
        ProductSortBy::Name => Column::Name,
    };

    let mut finder = Products::find().filter(condition);
    finder = match sort_order {
        SortOrder::Asc => finder.order_by_asc(sort_col),
        SortOrder::Desc => finder.order_by_desc(sort_col),
    };

    let total = finder.clone().count(db).await? as i64;

    let items = finder
        .limit(limit as u64)
        .offset(offset as u64)
        .all(db)
        .await?
        .into_iter()
        .map(Product::from)
        .collect();

    let meta = Meta::new(page, limit, total);
    let data = ProductList { items };
    Ok(ApiResponse::paged("Products", data, meta))
}

pub async fn get_product<C>(db: &C, id: Uuid) -> AppResult<ApiResponse<Product>>
where
    C: ConnectionTrait,
{
    let product = Products::find_by_id(id)
        .one(db)
        .await?
        .filter(|p| p.is_active)
        .ok_or(AppError::NotFound)?;
    Ok(ApiResponse::success("Product", Product::from(product), None))
}

pub async fn create_product<C>(
    db: &C,
    user: &AuthUser,
    payload: CreateProductRequest,
) -> AppResult<ApiResponse<Product>>
where
    C: ConnectionTrait + TransactionTrait,
{
    ensure_admin(user)?;

    let name = payload.name.trim().to_string();
    if name.is_empty() {
        return Err(AppError::validation("name is required"));
    }
    validate_amounts(Some(payload.price), Some(payload.stock))?;
    let sku = payload
        .sku
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty());

    let txn = db.begin().await?;
    if let Some(category_id) = payload.category_id {
        ensure_category(&txn, category_id).await?;
    }
    if let Some(sku) = sku.as_deref() {
        ensure_sku_free(&txn, sku, None).await?;
    }

    let now = Utc::now();
    let product = ActiveModel {
        id: Set(Uuid::new_v4()),
        name: Set(name),
        description: Set(payload.description),
        price: Set(payload.price),
        stock: Set(payload.stock),
        category_id: Set(payload.category_id),
        sku: Set(sku),
        is_active: Set(true),
        created_at: Set(now.into()),
        updated_at: Set(now.into()),
    }
    .insert(&txn)
    .await?;

    log_user_action(
        &txn,
        user,
        UserAction::CreateProduct,
        Some(format!("product:{}", product.id)),
        Some(product.name.clone()),
    )
    .await?;
    txn.commit().await?;

    Ok(ApiResponse::success(
        "Product created",
        Product::from(product),
        Some(Meta::empty()),
    ))
}

pub async fn update_product<C>(
    db: &C,
    user: &AuthUser,
    id: Uuid,
    payload: UpdateProductRequest,
) -> AppResult<ApiResponse<Product>>
where
    C: ConnectionTrait + TransactionTrait,
{
    ensure_admin(user)?;
    validate_amounts(payload.price, payload.stock)?;

    let txn = db.begin().await?;
    let existing = Products::find_by_id(id)
        .lock(LockType::Update)
        .one(&txn)
        .await?
        .ok_or(AppError::NotFound)?;

    let mut changed = Vec::new();
    let mut active: ActiveModel = existing.into();
    if let Some(name) = payload.name {
        let name = name.trim().to_string();
        if name.is_empty() {
            return Err(AppError::validation("name is required"));
        }
        active.name = Set(name);
        changed.push("name");
    }
    if let Some(description) = payload.description {
        active.description = Set(Some(description));
        changed.push("description");
    }
    if let Some(price) = payload.price {
        active.price = Set(price);
        changed.push("price");
    }
    if let Some(stock) = payload.stock {
        active.stock = Set(stock);
        changed.push("stock");
    }
    if let Some(category_id) = payload.category_id {
        ensure_category(&txn, category_id).await?;
        active.category_id = Set(Some(category_id));
        changed.push("category_id");
    }
    if let Some(sku) = payload.sku {
        let sku = sku.trim().to_string();
        if sku.is_empty() {
            active.sku = Set(None);
        } else {
            ensure_sku_free(&txn, &sku, Some(id)).await?;
            active.sku = Set(Some(sku));
        }
        changed.push("sku");
    }
    if let Some(is_active) = payload.is_active {
        active.is_active = Set(is_active);
        changed.push("is_active");
    }
    active.updated_at = Set(Utc::now().into());

    let product = active.update(&txn).await?;

    log_user_action(
        &txn,
        user,
        UserAction::UpdateProduct,
        Some(format!("product:{}", product.id)),
        Some(format!("fields: {}", changed.join(","))),
    )
    .await?;
    txn.commit().await?;

    Ok(ApiResponse::success(
        "Updated",
        Product::from(product),
        Some(Meta::empty()),
    ))
}

/// Products referenced by past orders are kept for history and can only be
/// deactivated.
pub async fn delete_product<C>(
    db: &C,
    user: &AuthUser,
    id: Uuid,
) -> AppResult<ApiResponse<serde_json::Value>>
where
    C: ConnectionTrait + TransactionTrait,
{
    ensure_admin(user)?;

    let txn = db.begin().await?;
    let product = Products::find_by_id(id)
        .lock(LockType::Update)
        .one(&txn)
        .await?
        .ok_or(AppError::NotFound)?;

    let ordered = OrderItems::find()
        .filter(OrderItemCol::ProductId.eq(id))
        .count(&txn)
        .await?;
    if ordered > 0 {
        return Err(AppError::validation(
            "product has order history; deactivate it instead",
        ));
    }

    let unlisted = CartItems::delete_many()
        .filter(CartItemCol::ProductId.eq(id))
        .exec(&txn)
        .await?;
    Products::delete_by_id(id).exec(&txn).await?;

    log_user_action(
        &txn,
        user,
        UserAction::DeleteProduct,
        Some(format!("product:{id}")),
        Some(product.name),
    )
    .await?;
    txn.commit().await?;

    tracing::info!(product_id = %id, cart_lines = unlisted.rows_affected, "product deleted");
    Ok(ApiResponse::success(
        "Deleted",
        serde_json::json!({ "id": id }),
        Some(Meta::empty()),
    ))
}

fn validate_amounts(price: Option<i64>, stock: Option<i32>) -> AppResult<()> {
    if price.is_some_and(|p| p <= 0) {
        return Err(AppError::validation("price must be greater than 0"));
    }
    if stock.is_some_and(|s| s < 0) {
        return Err(AppError::validation("stock must not be negative"));
    }
    Ok(())
}

async fn ensure_category<C>(db: &C, category_id: Uuid) -> AppResult<()>
where
    C: ConnectionTrait,
{
    Categories::find_by_id(category_id)
        .one(db)
        .await?
        .map(|_| ())
        .ok_or_else(|| AppError::validation("category does not exist"))
}

async fn ensure_sku_free<C>(db: &C, sku: &str, except: Option<Uuid>) -> AppResult<()>
where
    C: ConnectionTrait,
{
    let mut finder = Products::find().filter(Column::Sku.eq(sku));
    if let Some(id) = except {
        finder = finder.filter(Column::Id.ne(id));
    }
    if finder.count(db).await? > 0 {
        return Err(AppError::validation("sku is already in use"));
    }
    Ok(())
}
