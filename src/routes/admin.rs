use axum::{
    Json, Router,
    extract::{Path, Query, State},
    http::{StatusCode, header},
    response::IntoResponse,
    routing::{get, patch, post},
};
use uuid::Uuid;

use crate::{
    dto::{
        admin::{AdminOrderDetail, AdminOrderList, OrderStatistics, UserDetail, UserList, UserLogList},
        categories::{CreateCategoryRequest, UpdateCategoryRequest},
        orders::UpdateOrderStatusRequest,
        products::{CreateProductRequest, InventoryAdjustRequest, ProductList, UpdateProductRequest},
    },
    error::AppResult,
    middleware::auth::AuthUser,
    models::{Category, Order, Product, User},
    response::ApiResponse,
    routes::params::{AdminOrderQuery, LowStockQuery, ProductQuery, UserListQuery, UserLogQuery},
    services::{admin_service, category_service, product_service, user_admin_service},
    state::AppState,
};

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/orders", get(list_all_orders))
        .route("/orders/export", get(export_orders))
        .route("/orders/statistics", get(order_statistics))
        .route("/orders/{id}", get(get_order_admin).delete(delete_order))
        .route("/orders/{id}/status", patch(update_order_status))
        .route("/products", get(list_products).post(create_product))
        .route("/products/{id}", patch(update_product).delete(delete_product))
        .route("/categories", post(create_category))
        .route(
            "/categories/{id}",
            patch(update_category).delete(delete_category),
        )
        .route("/inventory/low-stock", get(list_low_stock))
        .route("/inventory/{id}", patch(adjust_inventory))
        .route("/users", get(list_users))
        .route("/users/{id}", get(user_detail))
        .route("/users/{id}/toggle-active", post(toggle_user_active))
        .route("/users/{id}/toggle-admin", post(toggle_user_admin))
        .route("/logs", get(list_logs))
}

#[utoipa::path(
    get,
    path = "/api/admin/orders",
    params(AdminOrderQuery),
    responses(
        (status = 200, description = "Search all orders (admin only)", body = ApiResponse<AdminOrderList>),
        (status = 400, description = "Unknown status filter"),
        (status = 403, description = "Forbidden"),
    ),
    security(("bearer_auth" = [])),
    tag = "Admin"
)]
pub async fn list_all_orders(
    State(state): State<AppState>,
    user: AuthUser,
    Query(query): Query<AdminOrderQuery>,
) -> AppResult<Json<ApiResponse<AdminOrderList>>> {
    let resp = admin_service::list_all_orders(&state.orm, &user, query).await?;
    Ok(Json(resp))
}

#[utoipa::path(
    get,
    path = "/api/admin/orders/{id}",
    params(("id" = Uuid, Path, description = "Order ID")),
    responses(
        (status = 200, description = "Order with items and customer (admin only)", body = ApiResponse<AdminOrderDetail>),
        (status = 404, description = "Not Found"),
        (status = 403, description = "Forbidden"),
    ),
    security(("bearer_auth" = [])),
    tag = "Admin"
)]
pub async fn get_order_admin(
    State(state): State<AppState>,
    user: AuthUser,
    Path(id): Path<Uuid>,
) -> AppResult<Json<ApiResponse<AdminOrderDetail>>> {
    let resp = admin_service::get_order_admin(&state.orm, &user, id).await?;
    Ok(Json(resp))
}

#[utoipa::path(
    patch,
    path = "/api/admin/orders/{id}/status",
    params(("id" = Uuid, Path, description = "Order ID")),
    request_body = UpdateOrderStatusRequest,
    responses(
        (status = 200, description = "Order status updated (admin only)", body = ApiResponse<Order>),
        (status = 400, description = "Unknown status"),
        (status = 403, description = "Forbidden"),
        (status = 404, description = "Not Found"),
        (status = 409, description = "Illegal transition"),
    ),
    security(("bearer_auth" = [])),
    tag = "Admin"
)]
pub async fn update_order_status(
    State(state): State<AppState>,
    user: AuthUser,
    Path(id): Path<Uuid>,
    Json(payload): Json<UpdateOrderStatusRequest>,
) -> AppResult<Json<ApiResponse<Order>>> {
    let resp =
        admin_service::update_order_status(&state.orm, &state.events, &user, id, payload).await?;
    Ok(Json(resp))
}

#[utoipa::path(
    delete,
    path = "/api/admin/orders/{id}",
    params(("id" = Uuid, Path, description = "Order ID")),
    responses(
        (status = 200, description = "Cancelled order deleted (admin only)"),
        (status = 403, description = "Forbidden"),
        (status = 409, description = "Order is not cancelled"),
    ),
    security(("bearer_auth" = [])),
    tag = "Admin"
)]
pub async fn delete_order(
    State(state): State<AppState>,
    user: AuthUser,
    Path(id): Path<Uuid>,
) -> AppResult<Json<ApiResponse<serde_json::Value>>> {
    let resp = admin_service::delete_order(&state.orm, &user, id).await?;
    Ok(Json(resp))
}

#[utoipa::path(
    get,
    path = "/api/admin/orders/export",
    responses(
        (status = 200, description = "All orders as CSV (admin only)", content_type = "text/csv", body = String),
        (status = 403, description = "Forbidden"),
    ),
    security(("bearer_auth" = [])),
    tag = "Admin"
)]
pub async fn export_orders(
    State(state): State<AppState>,
    user: AuthUser,
) -> AppResult<impl IntoResponse> {
    let body = admin_service::export_orders_csv(&state.orm, &user).await?;
    Ok((
        StatusCode::OK,
        [
            (header::CONTENT_TYPE, "text/csv; charset=utf-8"),
            (
                header::CONTENT_DISPOSITION,
                "attachment; filename=orders_export.csv",
            ),
        ],
        body,
    ))
}

#[utoipa::path(
    get,
    path = "/api/admin/orders/statistics",
    responses(
        (status = 200, description = "Order statistics (admin only)", body = ApiResponse<OrderStatistics>),
        (status = 403, description = "Forbidden"),
    ),
    security(("bearer_auth" = [])),
    tag = "Admin"
)]
pub async fn order_statistics(
    State(state): State<AppState>,
    user: AuthUser,
) -> AppResult<Json<ApiResponse<OrderStatistics>>> {
    let resp = admin_service::order_statistics(&state.orm, &user).await?;
    Ok(Json(resp))
}

#[utoipa::path(
    get,
    path = "/api/admin/products",
    params(ProductQuery),
    responses(
        (status = 200, description = "All products including inactive (admin only)", body = ApiResponse<ProductList>),
        (status = 403, description = "Forbidden"),
    ),
    security(("bearer_auth" = [])),
    tag = "Admin"
)]
pub async fn list_products(
    State(state): State<AppState>,
    user: AuthUser,
    Query(query): Query<ProductQuery>,
) -> AppResult<Json<ApiResponse<ProductList>>> {
    let resp = product_service::list_products_admin(&state.orm, &user, query).await?;
    Ok(Json(resp))
}

#[utoipa::path(
    post,
    path = "/api/admin/products",
    request_body = CreateProductRequest,
    responses(
        (status = 201, description = "Create product (admin only)", body = ApiResponse<Product>),
        (status = 400, description = "Invalid input"),
        (status = 403, description = "Forbidden"),
    ),
    security(("bearer_auth" = [])),
    tag = "Admin"
)]
pub async fn create_product(
    State(state): State<AppState>,
    user: AuthUser,
    Json(payload): Json<CreateProductRequest>,
) -> AppResult<(StatusCode, Json<ApiResponse<Product>>)> {
    let resp = product_service::create_product(&state.orm, &user, payload).await?;
    Ok((StatusCode::CREATED, Json(resp)))
}

#[utoipa::path(
    patch,
    path = "/api/admin/products/{id}",
    params(("id" = Uuid, Path, description = "Product ID")),
    request_body = UpdateProductRequest,
    responses(
        (status = 200, description = "Update product (admin only)", body = ApiResponse<Product>),
        (status = 400, description = "Invalid input"),
        (status = 403, description = "Forbidden"),
        (status = 404, description = "Not Found"),
    ),
    security(("bearer_auth" = [])),
    tag = "Admin"
)]
pub async fn update_product(
    State(state): State<AppState>,
    user: AuthUser,
    Path(id): Path<Uuid>,
    Json(payload): Json<UpdateProductRequest>,
) -> AppResult<Json<ApiResponse<Product>>> {
    let resp = product_service::update_product(&state.orm, &user, id, payload).await?;
    Ok(Json(resp))
}

#[utoipa::path(
    delete,
    path = "/api/admin/products/{id}",
    params(("id" = Uuid, Path, description = "Product ID")),
    responses(
        (status = 200, description = "Delete product (admin only)"),
        (status = 400, description = "Product has order history"),
        (status = 403, description = "Forbidden"),
        (status = 404, description = "Not Found"),
    ),
    security(("bearer_auth" = [])),
    tag = "Admin"
)]
pub async fn delete_product(
    State(state): State<AppState>,
    user: AuthUser,
    Path(id): Path<Uuid>,
) -> AppResult<Json<ApiResponse<serde_json::Value>>> {
    let resp = product_service::delete_product(&state.orm, &user, id).await?;
    Ok(Json(resp))
}

#[utoipa::path(
    post,
    path = "/api/admin/categories",
    request_body = CreateCategoryRequest,
    responses(
        (status = 201, description = "Create category (admin only)", body = ApiResponse<Category>),
        (status = 400, description = "Invalid input"),
        (status = 403, description = "Forbidden"),
    ),
    security(("bearer_auth" = [])),
    tag = "Admin"
)]
pub async fn create_category(
    State(state): State<AppState>,
    user: AuthUser,
    Json(payload): Json<CreateCategoryRequest>,
) -> AppResult<(StatusCode, Json<ApiResponse<Category>>)> {
    let resp = category_service::create_category(&state.orm, &user, payload).await?;
    Ok((StatusCode::CREATED, Json(resp)))
}

#[utoipa::path(
    patch,
    path = "/api/admin/categories/{id}",
    params(("id" = Uuid, Path, description = "Category ID")),
    request_body = UpdateCategoryRequest,
    responses(
        (status = 200, description = "Update category (admin only)", body = ApiResponse<Category>),
        (status = 403, description = "Forbidden"),
        (status = 404, description = "Not Found"),
    ),
    security(("bearer_auth" = [])),
    tag = "Admin"
)]
pub async fn update_category(
    State(state): State<AppState>,
    user: AuthUser,
    Path(id): Path<Uuid>,
    Json(payload): Json<UpdateCategoryRequest>,
) -> AppResult<Json<ApiResponse<Category>>> {
    let resp = category_service::update_category(&state.orm, &user, id, payload).await?;
    Ok(Json(resp))
}

#[utoipa::path(
    delete,
    path = "/api/admin/categories/{id}",
    params(("id" = Uuid, Path, description = "Category ID")),
    responses(
        (status = 200, description = "Delete category, detaching its products (admin only)"),
        (status = 403, description = "Forbidden"),
        (status = 404, description = "Not Found"),
    ),
    security(("bearer_auth" = [])),
    tag = "Admin"
)]
pub async fn delete_category(
    State(state): State<AppState>,
    user: AuthUser,
    Path(id): Path<Uuid>,
) -> AppResult<Json<ApiResponse<serde_json::Value>>> {
    let resp = category_service::delete_category(&state.orm, &user, id).await?;
    Ok(Json(resp))
}

#[utoipa::path(
    get,
    path = "/api/admin/inventory/low-stock",
    params(LowStockQuery),
    responses(
        (status = 200, description = "Products at or below the threshold (admin only)", body = ApiResponse<ProductList>),
        (status = 403, description = "Forbidden"),
    ),
    security(("bearer_auth" = [])),
    tag = "Admin"
)]
pub async fn list_low_stock(
    State(state): State<AppState>,
    user: AuthUser,
    Query(query): Query<LowStockQuery>,
) -> AppResult<Json<ApiResponse<ProductList>>> {
    let resp = admin_service::list_low_stock(&state.orm, &user, query).await?;
    Ok(Json(resp))
}

#[utoipa::path(
    patch,
    path = "/api/admin/inventory/{id}",
    params(("id" = Uuid, Path, description = "Product ID")),
    request_body = InventoryAdjustRequest,
    responses(
        (status = 200, description = "Adjust stock by delta (admin only)", body = ApiResponse<Product>),
        (status = 400, description = "Zero delta or negative result"),
        (status = 403, description = "Forbidden"),
        (status = 404, description = "Not Found"),
    ),
    security(("bearer_auth" = [])),
    tag = "Admin"
)]
pub async fn adjust_inventory(
    State(state): State<AppState>,
    user: AuthUser,
    Path(id): Path<Uuid>,
    Json(payload): Json<InventoryAdjustRequest>,
) -> AppResult<Json<ApiResponse<Product>>> {
    let resp = admin_service::adjust_inventory(&state.orm, &user, id, payload).await?;
    Ok(Json(resp))
}

#[utoipa::path(
    get,
    path = "/api/admin/users",
    params(UserListQuery),
    responses(
        (status = 200, description = "Search users (admin only)", body = ApiResponse<UserList>),
        (status = 403, description = "Forbidden"),
    ),
    security(("bearer_auth" = [])),
    tag = "Admin"
)]
pub async fn list_users(
    State(state): State<AppState>,
    user: AuthUser,
    Query(query): Query<UserListQuery>,
) -> AppResult<Json<ApiResponse<UserList>>> {
    let resp = user_admin_service::list_users(&state.orm, &user, query).await?;
    Ok(Json(resp))
}

#[utoipa::path(
    get,
    path = "/api/admin/users/{id}",
    params(("id" = Uuid, Path, description = "User ID")),
    responses(
        (status = 200, description = "User with order summary and recent activity (admin only)", body = ApiResponse<UserDetail>),
        (status = 403, description = "Forbidden"),
        (status = 404, description = "Not Found"),
    ),
    security(("bearer_auth" = [])),
    tag = "Admin"
)]
pub async fn user_detail(
    State(state): State<AppState>,
    user: AuthUser,
    Path(id): Path<Uuid>,
) -> AppResult<Json<ApiResponse<UserDetail>>> {
    let resp = user_admin_service::user_detail(&state.orm, &user, id).await?;
    Ok(Json(resp))
}

#[utoipa::path(
    post,
    path = "/api/admin/users/{id}/toggle-active",
    params(("id" = Uuid, Path, description = "User ID")),
    responses(
        (status = 200, description = "Enable or disable an account (admin only)", body = ApiResponse<User>),
        (status = 400, description = "Own account"),
        (status = 403, description = "Forbidden"),
    ),
    security(("bearer_auth" = [])),
    tag = "Admin"
)]
pub async fn toggle_user_active(
    State(state): State<AppState>,
    user: AuthUser,
    Path(id): Path<Uuid>,
) -> AppResult<Json<ApiResponse<User>>> {
    let resp = user_admin_service::toggle_active(&state.orm, &user, id).await?;
    Ok(Json(resp))
}

#[utoipa::path(
    post,
    path = "/api/admin/users/{id}/toggle-admin",
    params(("id" = Uuid, Path, description = "User ID")),
    responses(
        (status = 200, description = "Grant or revoke admin (admin only)", body = ApiResponse<User>),
        (status = 400, description = "Own account"),
        (status = 403, description = "Forbidden"),
    ),
    security(("bearer_auth" = [])),
    tag = "Admin"
)]
pub async fn toggle_user_admin(
    State(state): State<AppState>,
    user: AuthUser,
    Path(id): Path<Uuid>,
) -> AppResult<Json<ApiResponse<User>>> {
    let resp = user_admin_service::toggle_admin(&state.orm, &user, id).await?;
    Ok(Json(resp))
}

#[utoipa::path(
    get,
    path = "/api/admin/logs",
    params(UserLogQuery),
    responses(
        (status = 200, description = "Activity log (admin only)", body = ApiResponse<UserLogList>),
        (status = 403, description = "Forbidden"),
    ),
    security(("bearer_auth" = [])),
    tag = "Admin"
)]
pub async fn list_logs(
    State(state): State<AppState>,
    user: AuthUser,
    Query(query): Query<UserLogQuery>,
) -> AppResult<Json<ApiResponse<UserLogList>>> {
    let resp = user_admin_service::list_logs(&state.orm, &user, query).await?;
    Ok(Json(resp))
}
