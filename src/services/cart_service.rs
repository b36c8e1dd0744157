use chrono::Utc;
use sea_orm::sea_query::LockType;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, EntityTrait, ModelTrait, QueryFilter,
    QueryOrder, QuerySelect, Set, TransactionTrait,
};
use uuid::Uuid;

use crate::{
    audit::{UserAction, log_user_action_lossy},
    dto::cart::{AddToCartRequest, CartItemDto, CartView, UpdateCartItemRequest},
    entity::{
        cart_items::{self, ActiveModel as CartItemActive, Column as CartItemCol, Entity as CartItems},
        carts::{self, Column as CartCol, Entity as Carts},
        products::{Entity as Products, Model as ProductModel},
    },
    error::{AppError, AppResult},
    middleware::auth::AuthUser,
    models::{CartItem, Product},
    response::ApiResponse,
};

pub async fn view_cart<C>(db: &C, user: &AuthUser) -> AppResult<ApiResponse<CartView>>
where
    C: ConnectionTrait,
{
    let view = load_cart_view(db, user.user_id).await?;
    Ok(ApiResponse::ok("OK", view))
}

/// Sum of quantity x current product price over the caller's cart.
pub async fn cart_total<C>(db: &C, user: &AuthUser) -> AppResult<i64>
where
    C: ConnectionTrait,
{
    Ok(load_cart_view(db, user.user_id).await?.total)
}

pub async fn add_to_cart<C>(
    db: &C,
    user: &AuthUser,
    payload: AddToCartRequest,
) -> AppResult<ApiResponse<CartItem>>
where
    C: ConnectionTrait + TransactionTrait,
{
    if payload.quantity <= 0 {
        return Err(AppError::validation("quantity must be greater than 0"));
    }

    let txn = db.begin().await?;

    let product = Products::find_by_id(payload.product_id)
        .lock(LockType::Update)
        .one(&txn)
        .await?
        .filter(|p| p.is_active)
        .ok_or(AppError::NotFound)?;

    let cart = find_or_create_cart(&txn, user.user_id).await?;

    let existing = CartItems::find()
        .filter(CartItemCol::CartId.eq(cart.id))
        .filter(CartItemCol::ProductId.eq(product.id))
        .one(&txn)
        .await?;

    let reserved = existing.as_ref().map(|item| item.quantity).unwrap_or(0);
    ensure_available(&product, payload.quantity, product.stock - reserved)?;

    let item = match existing {
        Some(item) => {
            let quantity = item.quantity + payload.quantity;
            let mut active: CartItemActive = item.into();
            active.quantity = Set(quantity);
            active.update(&txn).await?
        }
        None => {
            CartItemActive {
                id: Set(Uuid::new_v4()),
                cart_id: Set(cart.id),
                product_id: Set(product.id),
                quantity: Set(payload.quantity),
                unit_price: Set(product.price),
                created_at: Set(Utc::now().into()),
            }
            .insert(&txn)
            .await?
        }
    };

    touch_cart(&txn, cart).await?;
    txn.commit().await?;

    log_user_action_lossy(
        db,
        user,
        UserAction::AddToCart,
        Some(format!("product:{}", product.id)),
        Some(format!("quantity: {}", payload.quantity)),
    )
    .await;

    Ok(ApiResponse::ok("Added to cart", CartItem::from(item)))
}

/// Set the quantity of one cart line; zero or less removes it. Returns `None`
/// in `data` when the line was removed.
pub async fn update_cart_item<C>(
    db: &C,
    user: &AuthUser,
    item_id: Uuid,
    payload: UpdateCartItemRequest,
) -> AppResult<ApiResponse<Option<CartItem>>>
where
    C: ConnectionTrait + TransactionTrait,
{
    let txn = db.begin().await?;
    let (item, _cart) = owned_item(&txn, user, item_id).await?;

    if payload.quantity <= 0 {
        item.delete(&txn).await?;
        txn.commit().await?;
        log_user_action_lossy(
            db,
            user,
            UserAction::RemoveFromCart,
            Some(format!("cart_item:{item_id}")),
            None,
        )
        .await;
        return Ok(ApiResponse::ok("Removed from cart", None));
    }

    let product = Products::find_by_id(item.product_id)
        .lock(LockType::Update)
        .one(&txn)
        .await?
        .ok_or(AppError::NotFound)?;
    ensure_available(&product, payload.quantity, product.stock)?;

    let mut active: CartItemActive = item.into();
    active.quantity = Set(payload.quantity);
    let item = active.update(&txn).await?;
    txn.commit().await?;

    log_user_action_lossy(
        db,
        user,
        UserAction::UpdateCart,
        Some(format!("cart_item:{item_id}")),
        Some(format!("quantity: {}", payload.quantity)),
    )
    .await;

    Ok(ApiResponse::ok("Cart updated", Some(CartItem::from(item))))
}

pub async fn remove_cart_item<C>(
    db: &C,
    user: &AuthUser,
    item_id: Uuid,
) -> AppResult<ApiResponse<serde_json::Value>>
where
    C: ConnectionTrait + TransactionTrait,
{
    let txn = db.begin().await?;
    let (item, _cart) = owned_item(&txn, user, item_id).await?;
    item.delete(&txn).await?;
    txn.commit().await?;

    log_user_action_lossy(
        db,
        user,
        UserAction::RemoveFromCart,
        Some(format!("cart_item:{item_id}")),
        None,
    )
    .await;

    Ok(ApiResponse::ok(
        "Removed from cart",
        serde_json::json!({ "id": item_id }),
    ))
}

pub async fn clear_cart<C>(db: &C, user: &AuthUser) -> AppResult<ApiResponse<serde_json::Value>>
where
    C: ConnectionTrait,
{
    let cart = Carts::find()
        .filter(CartCol::UserId.eq(user.user_id))
        .one(db)
        .await?;

    let removed = match cart {
        Some(cart) => {
            CartItems::delete_many()
                .filter(CartItemCol::CartId.eq(cart.id))
                .exec(db)
                .await?
                .rows_affected
        }
        None => 0,
    };

    log_user_action_lossy(db, user, UserAction::ClearCart, None, None).await;

    Ok(ApiResponse::ok(
        "Cart cleared",
        serde_json::json!({ "removed": removed }),
    ))
}

pub(crate) async fn load_cart_view<C>(db: &C, user_id: Uuid) -> AppResult<CartView>
where
    C: ConnectionTrait,
{
    let cart = Carts::find()
        .filter(CartCol::UserId.eq(user_id))
        .one(db)
        .await?;

    let Some(cart) = cart else {
        return Ok(CartView {
            cart_id: None,
            items: Vec::new(),
            item_count: 0,
            total: 0,
        });
    };

    let rows = CartItems::find()
        .filter(CartItemCol::CartId.eq(cart.id))
        .find_also_related(Products)
        .order_by_asc(CartItemCol::CreatedAt)
        .all(db)
        .await?;

    let items: Vec<CartItemDto> = rows
        .into_iter()
        .filter_map(|(item, product)| {
            let product = product?;
            Some(CartItemDto {
                id: item.id,
                line_total: product.price.saturating_mul(i64::from(item.quantity)),
                quantity: item.quantity,
                unit_price: item.unit_price,
                product: Product::from(product),
            })
        })
        .collect();

    let item_count = items.iter().map(|i| i64::from(i.quantity)).sum();
    let total = items.iter().map(|i| i.line_total).sum();

    Ok(CartView {
        cart_id: Some(cart.id),
        items,
        item_count,
        total,
    })
}

async fn find_or_create_cart<C>(db: &C, user_id: Uuid) -> AppResult<carts::Model>
where
    C: ConnectionTrait,
{
    if let Some(cart) = Carts::find()
        .filter(CartCol::UserId.eq(user_id))
        .one(db)
        .await?
    {
        return Ok(cart);
    }

    let now = Utc::now();
    let cart = carts::ActiveModel {
        id: Set(Uuid::new_v4()),
        user_id: Set(user_id),
        created_at: Set(now.into()),
        updated_at: Set(now.into()),
    }
    .insert(db)
    .await?;
    tracing::debug!(%user_id, cart_id = %cart.id, "cart created");
    Ok(cart)
}

async fn touch_cart<C>(db: &C, cart: carts::Model) -> AppResult<()>
where
    C: ConnectionTrait,
{
    let mut active: carts::ActiveModel = cart.into();
    active.updated_at = Set(Utc::now().into());
    active.update(db).await?;
    Ok(())
}

/// Load a cart line and check that its cart belongs to the caller.
async fn owned_item<C>(
    db: &C,
    user: &AuthUser,
    item_id: Uuid,
) -> AppResult<(cart_items::Model, carts::Model)>
where
    C: ConnectionTrait,
{
    let (item, cart) = CartItems::find_by_id(item_id)
        .find_also_related(Carts)
        .one(db)
        .await?
        .ok_or(AppError::NotFound)?;
    let cart = cart.ok_or(AppError::NotFound)?;

    if cart.user_id != user.user_id {
        tracing::warn!(user_id = %user.user_id, %item_id, "cart item belongs to another user");
        return Err(AppError::Unauthorized);
    }
    Ok((item, cart))
}

fn ensure_available(product: &ProductModel, requested: i32, available: i32) -> AppResult<()> {
    if requested > available {
        return Err(AppError::InsufficientStock {
            product_id: product.id,
            product_name: product.name.clone(),
            requested,
            available: available.max(0),
        });
    }
    Ok(())
}
