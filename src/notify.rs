//! Order notifications.
//!
//! The checkout path only pushes an [`OrderEvent`] onto a bounded channel with
//! `try_send`; delivery happens on a separate task. A full or closed queue is
//! logged and otherwise ignored, so notification can never fail or stall a
//! request.

use serde::Serialize;
use tokio::{sync::mpsc, task::JoinHandle};
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OrderEvent {
    Created {
        order_id: Uuid,
        order_number: String,
        user_id: Uuid,
        email: String,
        total_amount: i64,
        item_count: usize,
    },
    Cancelled {
        order_id: Uuid,
        order_number: String,
        user_id: Uuid,
    },
}

impl OrderEvent {
    pub fn order_number(&self) -> &str {
        match self {
            OrderEvent::Created { order_number, .. } | OrderEvent::Cancelled { order_number, .. } => {
                order_number
            }
        }
    }
}

/// Publishing half of the notification queue, cloned into the app state.
#[derive(Debug, Clone, Default)]
pub struct OrderEvents {
    sender: Option<mpsc::Sender<OrderEvent>>,
}

impl OrderEvents {
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<OrderEvent>) {
        let (sender, receiver) = mpsc::channel(capacity.max(1));
        (
            Self {
                sender: Some(sender),
            },
            receiver,
        )
    }

    /// A publisher with no subscriber; every event is dropped.
    pub fn disabled() -> Self {
        Self { sender: None }
    }

    pub fn publish(&self, event: OrderEvent) {
        let Some(sender) = &self.sender else {
            tracing::debug!(order_number = %event.order_number(), "notifications disabled");
            return;
        };
        if let Err(err) = sender.try_send(event) {
            let (reason, event) = match err {
                mpsc::error::TrySendError::Full(event) => ("queue full", event),
                mpsc::error::TrySendError::Closed(event) => ("notifier stopped", event),
            };
            tracing::warn!(
                order_number = %event.order_number(),
                reason,
                "order notification dropped"
            );
        }
    }
}

/// Drain the queue until every publisher is gone.
pub fn spawn_notifier(mut receiver: mpsc::Receiver<OrderEvent>) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(event) = receiver.recv().await {
            deliver(&event);
        }
        tracing::info!("order notifier stopped");
    })
}

// Delivery channel is not part of this service; record what would be sent.
fn deliver(event: &OrderEvent) {
    match event {
        OrderEvent::Created {
            order_number,
            email,
            total_amount,
            item_count,
            ..
        } => tracing::info!(
            %order_number,
            %email,
            total_amount,
            item_count,
            "order confirmation sent"
        ),
        OrderEvent::Cancelled {
            order_number,
            user_id,
            ..
        } => tracing::info!(%order_number, %user_id, "order cancellation notice sent"),
    }
}
