use sea_orm::DatabaseConnection;

use crate::{config::AppConfig, notify::OrderEvents};

#[derive(Debug, Clone)]
pub struct JwtSettings {
    pub secret: String,
    pub ttl_hours: i64,
}

#[derive(Clone)]
pub struct AppState {
    pub orm: DatabaseConnection,
    pub events: OrderEvents,
    pub jwt: JwtSettings,
}

impl AppState {
    pub fn new(orm: DatabaseConnection, events: OrderEvents, config: &AppConfig) -> Self {
        Self {
            orm,
            events,
            jwt: JwtSettings {
                secret: config.jwt_secret.clone(),
                ttl_hours: config.jwt_ttl_hours,
            },
        }
    }
}
