use axum_storefront::{
    config::AppConfig,
    db::connect_and_migrate,
    entity::{
        categories::{self, Column as CategoryCol, Entity as Categories},
        products::{self, Column as ProductCol, Entity as Products},
        users::{self, Column as UserCol, Entity as Users},
    },
    services::auth_service::hash_password,
};
use chrono::Utc;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter, Set,
};
use uuid::Uuid;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let config = AppConfig::from_env()?;

    let orm = connect_and_migrate(&config.database_url).await?;

    let admin_id = ensure_user(&orm, "admin", "admin@example.com", "admin123", true).await?;
    let user_id = ensure_user(&orm, "alice", "alice@example.com", "alice123", false).await?;
    seed_catalog(&orm).await?;

    println!("Seed completed. Admin ID: {admin_id}, User ID: {user_id}");
    Ok(())
}

async fn ensure_user(
    orm: &DatabaseConnection,
    username: &str,
    email: &str,
    password: &str,
    is_admin: bool,
) -> anyhow::Result<Uuid> {
    if let Some(existing) = Users::find()
        .filter(UserCol::Email.eq(email))
        .one(orm)
        .await?
    {
        let mut active: users::ActiveModel = existing.into();
        active.is_admin = Set(is_admin);
        active.is_active = Set(true);
        let user = active.update(orm).await?;
        println!("Ensured user {email} (admin={is_admin})");
        return Ok(user.id);
    }

    let password_hash = hash_password(password).map_err(|e| anyhow::anyhow!(e.to_string()))?;
    let user = users::ActiveModel {
        id: Set(Uuid::new_v4()),
        username: Set(username.to_string()),
        email: Set(email.to_string()),
        password_hash: Set(password_hash),
        is_admin: Set(is_admin),
        is_active: Set(true),
        phone: Set(None),
        address: Set(None),
        created_at: Set(Utc::now().into()),
        last_login: Set(None),
    }
    .insert(orm)
    .await?;

    println!("Created user {email} (admin={is_admin})");
    Ok(user.id)
}

async fn ensure_category(orm: &DatabaseConnection, name: &str, description: &str) -> anyhow::Result<Uuid> {
    if let Some(existing) = Categories::find()
        .filter(CategoryCol::Name.eq(name))
        .one(orm)
        .await?
    {
        return Ok(existing.id);
    }
    let category = categories::ActiveModel {
        id: Set(Uuid::new_v4()),
        name: Set(name.to_string()),
        description: Set(Some(description.to_string())),
        created_at: Set(Utc::now().into()),
    }
    .insert(orm)
    .await?;
    Ok(category.id)
}

async fn seed_catalog(orm: &DatabaseConnection) -> anyhow::Result<()> {
    let apparel = ensure_category(orm, "Apparel", "Things to wear").await?;
    let kitchen = ensure_category(orm, "Kitchen", "Mugs and more").await?;
    let media = ensure_category(orm, "Books", "Reading material").await?;

    let products = vec![
        ("HOOD-001", "Axum Hoodie", "Warm hoodie for Rustaceans", 550000, 50, apparel),
        ("MUG-001", "Ferris Mug", "Coffee tastes better with Ferris", 120000, 100, kitchen),
        ("STK-001", "Rust Sticker Pack", "Decorate your laptop", 50000, 3, apparel),
        ("BOOK-001", "E-book: Async Rust", "Learn async Rust patterns", 250000, 75, media),
    ];

    for (sku, name, desc, price, stock, category_id) in products {
        let exists = Products::find()
            .filter(ProductCol::Sku.eq(sku))
            .one(orm)
            .await?
            .is_some();
        if exists {
            continue;
        }
        let now = Utc::now();
        products::ActiveModel {
            id: Set(Uuid::new_v4()),
            name: Set(name.to_string()),
            description: Set(Some(desc.to_string())),
            price: Set(price),
            stock: Set(stock),
            category_id: Set(Some(category_id)),
            sku: Set(Some(sku.to_string())),
            is_active: Set(true),
            created_at: Set(now.into()),
            updated_at: Set(now.into()),
        }
        .insert(orm)
        .await?;
    }

    println!("Seeded catalog");
    Ok(())
}
