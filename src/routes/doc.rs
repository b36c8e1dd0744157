use utoipa::{
    Modify, OpenApi,
    openapi::{
        self,
        OpenApi as OpenApiSpec,
        security::{HttpAuthScheme, HttpBuilder, SecurityScheme},
    },
};
use utoipa_scalar::{Scalar, Servable};

use crate::{
    dto::{
        admin::{
            AdminOrderDetail, AdminOrderList, OrderStatistics, PopularProduct, StatusCount,
            UserDetail, UserList, UserLogList,
        },
        auth::{LoginRequest, LoginResponse, RegisterRequest, UpdateProfileRequest},
        cart::{AddToCartRequest, CartItemDto, CartView, UpdateCartItemRequest},
        categories::{CategoryList, CreateCategoryRequest, UpdateCategoryRequest},
        orders::{CheckoutRequest, OrderList, OrderWithItems, UpdateOrderStatusRequest},
        products::{CreateProductRequest, InventoryAdjustRequest, ProductList, UpdateProductRequest},
    },
    models::{CartItem, Category, Order, OrderItem, Product, User, UserLog},
    response::{ApiResponse, Meta},
    routes::{admin, auth, cart, health, orders, params, products},
    status::OrderStatus,
};

struct SecurityAddon;

impl Modify for SecurityAddon {
    fn modify(&self, openapi: &mut openapi::OpenApi) {
        let components = openapi.components.get_or_insert_with(Default::default);
        components.add_security_scheme(
            "bearer_auth",
            SecurityScheme::Http(
                HttpBuilder::new()
                    .scheme(HttpAuthScheme::Bearer)
                    .bearer_format("JWT")
                    .build(),
            ),
        );
    }
}

#[derive(OpenApi)]
#[openapi(
    paths(
        health::health_check,
        auth::register,
        auth::login,
        auth::me,
        auth::update_profile,
        products::list_products,
        products::get_product,
        products::list_categories,
        cart::view_cart,
        cart::add_to_cart,
        cart::update_cart_item,
        cart::remove_cart_item,
        cart::clear_cart,
        orders::list_order,
        orders::checkout,
        orders::get_order,
        orders::pay_order,
        orders::cancel_order,
        admin::list_all_orders,
        admin::get_order_admin,
        admin::update_order_status,
        admin::delete_order,
        admin::export_orders,
        admin::order_statistics,
        admin::list_products,
        admin::create_product,
        admin::update_product,
        admin::delete_product,
        admin::create_category,
        admin::update_category,
        admin::delete_category,
        admin::list_low_stock,
        admin::adjust_inventory,
        admin::list_users,
        admin::user_detail,
        admin::toggle_user_active,
        admin::toggle_user_admin,
        admin::list_logs
    ),
    components(
        schemas(
            User,
            Category,
            Product,
            CartItem,
            Order,
            OrderItem,
            UserLog,
            OrderStatus,
            RegisterRequest,
            LoginRequest,
            LoginResponse,
            UpdateProfileRequest,
            AddToCartRequest,
            UpdateCartItemRequest,
            CartView,
            CartItemDto,
            CheckoutRequest,
            UpdateOrderStatusRequest,
            OrderList,
            OrderWithItems,
            CreateProductRequest,
            UpdateProductRequest,
            InventoryAdjustRequest,
            ProductList,
            CreateCategoryRequest,
            UpdateCategoryRequest,
            CategoryList,
            AdminOrderList,
            AdminOrderDetail,
            StatusCount,
            PopularProduct,
            OrderStatistics,
            UserList,
            UserDetail,
            UserLogList,
            params::Pagination,
            params::SortOrder,
            params::ProductSortBy,
            Meta,
            ApiResponse<Product>,
            ApiResponse<ProductList>,
            ApiResponse<CartView>,
            ApiResponse<OrderWithItems>,
            ApiResponse<OrderList>,
            ApiResponse<AdminOrderList>
        )
    ),
    security(
        ("bearer_auth" = [])
    ),
    modifiers(&SecurityAddon),
    tags(
        (name = "Health", description = "Health check endpoint"),
        (name = "Auth", description = "Authentication endpoints"),
        (name = "Products", description = "Catalog endpoints"),
        (name = "Cart", description = "Cart endpoints"),
        (name = "Orders", description = "Checkout and order endpoints"),
        (name = "Admin", description = "Admin endpoints"),
    )
)]
pub struct ApiDoc;

pub fn scalar_docs() -> Scalar<OpenApiSpec> {
    Scalar::with_url("/docs", ApiDoc::openapi())
}
