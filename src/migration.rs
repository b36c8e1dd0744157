//! Schema migrations. Tables are derived from the entity definitions so the same
//! migration runs on PostgreSQL and SQLite.

use sea_orm::{EntityTrait, Schema};
use sea_orm_migration::prelude::*;

use crate::entity::{
    CartItems, Carts, Categories, OrderItems, Orders, Products, UserLogs, Users, cart_items,
    orders, user_logs,
};

pub struct Migrator;

#[async_trait::async_trait]
impl MigratorTrait for Migrator {
    fn migrations() -> Vec<Box<dyn MigrationTrait>> {
        vec![Box::new(CreateStorefrontTables)]
    }
}

#[derive(DeriveMigrationName)]
struct CreateStorefrontTables;

async fn create_table_for<E>(manager: &SchemaManager<'_>, schema: &Schema, entity: E) -> Result<(), DbErr>
where
    E: EntityTrait,
{
    manager
        .create_table(schema.create_table_from_entity(entity).if_not_exists().to_owned())
        .await
}

#[async_trait::async_trait]
impl MigrationTrait for CreateStorefrontTables {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        let schema = Schema::new(manager.get_database_backend());

        // parents before children
        create_table_for(manager, &schema, Users).await?;
        create_table_for(manager, &schema, Categories).await?;
        create_table_for(manager, &schema, Products).await?;
        create_table_for(manager, &schema, Carts).await?;
        create_table_for(manager, &schema, CartItems).await?;
        create_table_for(manager, &schema, Orders).await?;
        create_table_for(manager, &schema, OrderItems).await?;
        create_table_for(manager, &schema, UserLogs).await?;

        manager
            .create_index(
                Index::create()
                    .name("uq_cart_items_cart_product")
                    .table(CartItems)
                    .col(cart_items::Column::CartId)
                    .col(cart_items::Column::ProductId)
                    .unique()
                    .if_not_exists()
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_orders_user_created")
                    .table(Orders)
                    .col(orders::Column::UserId)
                    .col(orders::Column::CreatedAt)
                    .if_not_exists()
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_user_logs_user_created")
                    .table(UserLogs)
                    .col(user_logs::Column::UserId)
                    .col(user_logs::Column::CreatedAt)
                    .if_not_exists()
                    .to_owned(),
            )
            .await
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        // children before parents
        manager.drop_table(Table::drop().table(UserLogs).if_exists().to_owned()).await?;
        manager.drop_table(Table::drop().table(OrderItems).if_exists().to_owned()).await?;
        manager.drop_table(Table::drop().table(Orders).if_exists().to_owned()).await?;
        manager.drop_table(Table::drop().table(CartItems).if_exists().to_owned()).await?;
        manager.drop_table(Table::drop().table(Carts).if_exists().to_owned()).await?;
        manager.drop_table(Table::drop().table(Products).if_exists().to_owned()).await?;
        manager.drop_table(Table::drop().table(Categories).if_exists().to_owned()).await?;
        manager.drop_table(Table::drop().table(Users).if_exists().to_owned()).await
    }
}
