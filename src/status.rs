//! Order status state machine.
//!
//! ```text
//! pending -> paid -> shipped -> completed
//!    \________\______> cancelled
//! ```
//!
//! `completed` and `cancelled` are terminal. Normal updates advance exactly one
//! step; cancellation is only reachable from `pending` or `paid`.

use std::{fmt, str::FromStr};

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::error::AppError;

#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    EnumIter,
    DeriveActiveEnum,
    Serialize,
    Deserialize,
    ToSchema,
)]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::N(20))")]
#[serde(rename_all = "snake_case")]
pub enum OrderStatus {
    #[sea_orm(string_value = "pending")]
    Pending,
    #[sea_orm(string_value = "paid")]
    Paid,
    #[sea_orm(string_value = "shipped")]
    Shipped,
    #[sea_orm(string_value = "completed")]
    Completed,
    #[sea_orm(string_value = "cancelled")]
    Cancelled,
}

/// What applying a requested status to an order amounts to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    /// Target equals the current status; nothing is written.
    Unchanged,
    /// One step forward on the happy path.
    Advance(OrderStatus),
    /// Cancel and restore inventory.
    Cancel,
}

impl OrderStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderStatus::Pending => "pending",
            OrderStatus::Paid => "paid",
            OrderStatus::Shipped => "shipped",
            OrderStatus::Completed => "completed",
            OrderStatus::Cancelled => "cancelled",
        }
    }

    /// The successor on the happy path, if any.
    pub fn next(&self) -> Option<OrderStatus> {
        match self {
            OrderStatus::Pending => Some(OrderStatus::Paid),
            OrderStatus::Paid => Some(OrderStatus::Shipped),
            OrderStatus::Shipped => Some(OrderStatus::Completed),
            OrderStatus::Completed | OrderStatus::Cancelled => None,
        }
    }

    pub fn can_cancel(&self) -> bool {
        matches!(self, OrderStatus::Pending | OrderStatus::Paid)
    }

    /// Decide how `self -> target` is carried out, or reject it.
    pub fn plan(self, target: OrderStatus) -> Result<Transition, AppError> {
        if target == OrderStatus::Cancelled {
            return if self.can_cancel() {
                Ok(Transition::Cancel)
            } else {
                Err(self.illegal(target))
            };
        }
        if target == self {
            return Ok(Transition::Unchanged);
        }
        match self.next() {
            Some(next) if next == target => Ok(Transition::Advance(target)),
            _ => Err(self.illegal(target)),
        }
    }

    fn illegal(self, target: OrderStatus) -> AppError {
        AppError::IllegalTransition {
            from: self.as_str().to_string(),
            to: target.as_str().to_string(),
        }
    }
}

impl fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OrderStatus {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "pending" => Ok(OrderStatus::Pending),
            "paid" => Ok(OrderStatus::Paid),
            "shipped" => Ok(OrderStatus::Shipped),
            "completed" => Ok(OrderStatus::Completed),
            "cancelled" => Ok(OrderStatus::Cancelled),
            _ => Err(AppError::InvalidStatus(s.to_string())),
        }
    }
}
