//! PostgreSQL implementation of the store.
//!
//! Every conditional mutation is a single `UPDATE ... WHERE <condition>`
//! whose affected-row count reports whether it took effect. Row locks taken
//! by those updates serialize concurrent writers on the same order or lot.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::{PgConnection, PgPoolOptions};
use sqlx::{PgPool, Postgres, Transaction};
use uuid::Uuid;

use super::models::WebhookEventRecord;
use super::{FulfillmentStore, StoreError, StoreTx};
use crate::config::ServiceConfig;
use crate::domain::notification::{CHARGE_PAID, ORDER_PAID};
use crate::domain::{
    EventDateId, EventId, Lot, LotId, MinorUnits, Order, OrderId, OrderItem, OrderStatus,
    StatusChange, StatusChangeRecord, Ticket, TicketType, TicketTypeId, UserId,
};

/// PostgreSQL-backed store using `sqlx::PgPool`.
#[derive(Debug, Clone)]
pub struct PostgresStore {
    pool: PgPool,
}

impl PostgresStore {
    /// Creates a store over an existing connection pool.
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Connects using the database settings of `config`, applying
    /// migrations when enabled.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the pool cannot connect or a migration
    /// fails.
    pub async fn connect(config: &ServiceConfig) -> Result<Self, StoreError> {
        let pool = PgPoolOptions::new()
            .max_connections(config.database_max_connections)
            .min_connections(config.database_min_connections)
            .acquire_timeout(Duration::from_secs(config.database_connect_timeout_secs))
            .connect(&config.database_url)
            .await?;

        if config.database_run_migrations {
            sqlx::migrate!("./migrations")
                .run(&pool)
                .await
                .map_err(|e| StoreError::Unavailable(format!("migration failed: {e}")))?;
            tracing::info!("database migrations applied");
        }

        Ok(Self::new(pool))
    }
}

/// An open PostgreSQL transaction. Dropping it rolls back.
#[derive(Debug)]
pub struct PgTx {
    tx: Transaction<'static, Postgres>,
}

// ── Row mapping ─────────────────────────────────────────────────────────

type OrderRow = (
    Uuid,
    String,
    String,
    i64,
    DateTime<Utc>,
    Option<String>,
    Option<String>,
);
type OrderItemRow = (Uuid, Uuid, Uuid, Uuid, i32, i64);
type TicketTypeRow = (Uuid, Uuid, String, i64, i32, i32);
type TicketRow = (
    Uuid,
    String,
    String,
    Uuid,
    Uuid,
    i32,
    String,
    Uuid,
    Uuid,
    Uuid,
    bool,
    DateTime<Utc>,
);
type HistoryRow = (
    i64,
    Uuid,
    String,
    String,
    String,
    Option<String>,
    Option<String>,
    Option<String>,
    Option<String>,
    DateTime<Utc>,
);

const ORDER_COLUMNS: &str =
    "id, user_id, status, total_minor, expires_at, remote_order_id, remote_charge_id";
const ORDER_ITEM_COLUMNS: &str =
    "id, order_id, event_date_id, ticket_type_id, quantity, unit_price_minor";
const TICKET_TYPE_COLUMNS: &str =
    "id, lot_id, name, price_minor, max_quantity, sold_quantity";

fn to_u32(value: i32, what: &str) -> Result<u32, StoreError> {
    u32::try_from(value).map_err(|_| StoreError::Corrupt(format!("negative {what}: {value}")))
}

fn to_i32(value: u32, what: &str) -> Result<i32, StoreError> {
    i32::try_from(value).map_err(|_| StoreError::Corrupt(format!("{what} out of range: {value}")))
}

fn parse_status(raw: &str) -> Result<OrderStatus, StoreError> {
    raw.parse()
        .map_err(|e: crate::domain::order::UnknownOrderStatus| StoreError::Corrupt(e.to_string()))
}

fn map_order(row: OrderRow) -> Result<Order, StoreError> {
    let (id, user_id, status, total, expires_at, remote_order_id, remote_charge_id) = row;
    Ok(Order {
        id: OrderId::from_uuid(id),
        user_id: UserId::new(user_id),
        status: parse_status(&status)?,
        total: MinorUnits::new(total),
        expires_at,
        remote_order_id,
        remote_charge_id,
    })
}

fn map_order_item(row: OrderItemRow) -> Result<OrderItem, StoreError> {
    let (id, order_id, event_date_id, ticket_type_id, quantity, unit_price) = row;
    Ok(OrderItem {
        id: id.into(),
        order_id: order_id.into(),
        event_date_id: event_date_id.into(),
        ticket_type_id: ticket_type_id.into(),
        quantity: to_u32(quantity, "quantity")?,
        unit_price: MinorUnits::new(unit_price),
    })
}

fn map_ticket_type(row: TicketTypeRow) -> Result<TicketType, StoreError> {
    let (id, lot_id, name, price, max, sold) = row;
    Ok(TicketType {
        id: id.into(),
        lot_id: lot_id.into(),
        name,
        price: MinorUnits::new(price),
        max: to_u32(max, "max_quantity")?,
        sold: to_u32(sold, "sold_quantity")?,
    })
}

fn map_ticket(row: TicketRow) -> Result<Ticket, StoreError> {
    let (
        id,
        code,
        signed_token,
        order_id,
        order_item_id,
        unit_index,
        user_id,
        event_id,
        event_date_id,
        ticket_type_id,
        used,
        issued_at,
    ) = row;
    Ok(Ticket {
        id: id.into(),
        code,
        signed_token,
        order_id: order_id.into(),
        order_item_id: order_item_id.into(),
        unit_index: to_u32(unit_index, "unit_index")?,
        user_id: UserId::new(user_id),
        event_id: event_id.into(),
        event_date_id: event_date_id.into(),
        ticket_type_id: ticket_type_id.into(),
        used,
        issued_at,
    })
}

fn map_history(row: HistoryRow) -> Result<StatusChangeRecord, StoreError> {
    let (
        id,
        order_id,
        old_status,
        new_status,
        reason,
        error,
        remote_event_id,
        remote_order_id,
        remote_charge_id,
        recorded_at,
    ) = row;
    Ok(StatusChangeRecord {
        id,
        change: StatusChange {
            order_id: order_id.into(),
            old_status: parse_status(&old_status)?,
            new_status: parse_status(&new_status)?,
            reason: reason.parse().map_err(StoreError::Corrupt)?,
            error,
            remote_event_id,
            remote_order_id,
            remote_charge_id,
        },
        recorded_at,
    })
}

// ── Shared statements ───────────────────────────────────────────────────

async fn transition_status_on(
    conn: &mut PgConnection,
    order_id: OrderId,
    from: OrderStatus,
    to: OrderStatus,
) -> Result<bool, StoreError> {
    let result = sqlx::query(
        "UPDATE orders SET status = $3, updated_at = now() WHERE id = $1 AND status = $2",
    )
    .bind(order_id.as_uuid())
    .bind(from.as_str())
    .bind(to.as_str())
    .execute(conn)
    .await?;
    Ok(result.rows_affected() == 1)
}

async fn order_on(conn: &mut PgConnection, order_id: OrderId) -> Result<Option<Order>, StoreError> {
    sqlx::query_as::<_, OrderRow>(&format!("SELECT {ORDER_COLUMNS} FROM orders WHERE id = $1"))
        .bind(order_id.as_uuid())
        .fetch_optional(conn)
        .await?
        .map(map_order)
        .transpose()
}

async fn order_items_on(
    conn: &mut PgConnection,
    order_id: OrderId,
) -> Result<Vec<OrderItem>, StoreError> {
    sqlx::query_as::<_, OrderItemRow>(&format!(
        "SELECT {ORDER_ITEM_COLUMNS} FROM order_items WHERE order_id = $1 ORDER BY id"
    ))
    .bind(order_id.as_uuid())
    .fetch_all(conn)
    .await?
    .into_iter()
    .map(map_order_item)
    .collect()
}

async fn ticket_type_on(
    conn: &mut PgConnection,
    id: TicketTypeId,
) -> Result<Option<TicketType>, StoreError> {
    sqlx::query_as::<_, TicketTypeRow>(&format!(
        "SELECT {TICKET_TYPE_COLUMNS} FROM ticket_types WHERE id = $1"
    ))
    .bind(id.as_uuid())
    .fetch_optional(conn)
    .await?
    .map(map_ticket_type)
    .transpose()
}

async fn record_status_change_on(
    conn: &mut PgConnection,
    change: &StatusChange,
) -> Result<(), StoreError> {
    sqlx::query(
        "INSERT INTO order_status_history \
         (order_id, old_status, new_status, reason, error_message, remote_event_id, remote_order_id, remote_charge_id) \
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8)",
    )
    .bind(change.order_id.as_uuid())
    .bind(change.old_status.as_str())
    .bind(change.new_status.as_str())
    .bind(change.reason.as_str())
    .bind(change.error.as_deref())
    .bind(change.remote_event_id.as_deref())
    .bind(change.remote_order_id.as_deref())
    .bind(change.remote_charge_id.as_deref())
    .execute(conn)
    .await?;
    Ok(())
}

// ── FulfillmentStore ────────────────────────────────────────────────────

#[async_trait]
impl FulfillmentStore for PostgresStore {
    async fn begin(&self) -> Result<Box<dyn StoreTx>, StoreError> {
        let tx = self.pool.begin().await?;
        Ok(Box::new(PgTx { tx }))
    }

    async fn webhook_event_exists(&self, remote_event_id: &str) -> Result<bool, StoreError> {
        let exists = sqlx::query_scalar::<_, bool>(
            "SELECT EXISTS (SELECT 1 FROM webhook_events WHERE remote_event_id = $1)",
        )
        .bind(remote_event_id)
        .fetch_one(&self.pool)
        .await?;
        Ok(exists)
    }

    async fn insert_webhook_event(
        &self,
        remote_event_id: &str,
        event_type: &str,
    ) -> Result<bool, StoreError> {
        let result = sqlx::query(
            "INSERT INTO webhook_events (remote_event_id, event_type) VALUES ($1, $2) \
             ON CONFLICT (remote_event_id) DO NOTHING",
        )
        .bind(remote_event_id)
        .bind(event_type)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn mark_webhook_event_processed(
        &self,
        remote_event_id: &str,
        order_id: Option<OrderId>,
    ) -> Result<(), StoreError> {
        sqlx::query(
            "UPDATE webhook_events SET processed = TRUE, processed_at = now(), \
             order_id = COALESCE($2, order_id) WHERE remote_event_id = $1",
        )
        .bind(remote_event_id)
        .bind(order_id.map(Uuid::from))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn webhook_event(
        &self,
        remote_event_id: &str,
    ) -> Result<Option<WebhookEventRecord>, StoreError> {
        let row = sqlx::query_as::<
            _,
            (String, String, Option<Uuid>, bool, Option<DateTime<Utc>>, DateTime<Utc>),
        >(
            "SELECT remote_event_id, event_type, order_id, processed, processed_at, received_at \
             FROM webhook_events WHERE remote_event_id = $1",
        )
        .bind(remote_event_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(
            |(remote_event_id, event_type, order_id, processed, processed_at, received_at)| {
                WebhookEventRecord {
                    remote_event_id,
                    event_type,
                    order_id: order_id.map(OrderId::from_uuid),
                    processed,
                    processed_at,
                    received_at,
                }
            },
        ))
    }

    async fn payment_event_processed_for_order(
        &self,
        order_id: OrderId,
    ) -> Result<bool, StoreError> {
        let exists = sqlx::query_scalar::<_, bool>(
            "SELECT EXISTS (SELECT 1 FROM webhook_events \
             WHERE order_id = $1 AND processed AND event_type IN ($2, $3))",
        )
        .bind(order_id.as_uuid())
        .bind(ORDER_PAID)
        .bind(CHARGE_PAID)
        .fetch_one(&self.pool)
        .await?;
        Ok(exists)
    }

    async fn transition_status(
        &self,
        order_id: OrderId,
        from: OrderStatus,
        to: OrderStatus,
    ) -> Result<bool, StoreError> {
        let mut conn = self.pool.acquire().await?;
        transition_status_on(&mut conn, order_id, from, to).await
    }

    async fn order(&self, order_id: OrderId) -> Result<Option<Order>, StoreError> {
        let mut conn = self.pool.acquire().await?;
        order_on(&mut conn, order_id).await
    }

    async fn order_items(&self, order_id: OrderId) -> Result<Vec<OrderItem>, StoreError> {
        let mut conn = self.pool.acquire().await?;
        order_items_on(&mut conn, order_id).await
    }

    async fn ticket_type(&self, id: TicketTypeId) -> Result<Option<TicketType>, StoreError> {
        let mut conn = self.pool.acquire().await?;
        ticket_type_on(&mut conn, id).await
    }

    async fn set_remote_ids(
        &self,
        order_id: OrderId,
        remote_order_id: &str,
        remote_charge_id: Option<&str>,
    ) -> Result<(), StoreError> {
        sqlx::query(
            "UPDATE orders SET remote_order_id = $2, remote_charge_id = $3, updated_at = now() \
             WHERE id = $1",
        )
        .bind(order_id.as_uuid())
        .bind(remote_order_id)
        .bind(remote_charge_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn record_status_change(&self, change: &StatusChange) -> Result<(), StoreError> {
        let mut conn = self.pool.acquire().await?;
        record_status_change_on(&mut conn, change).await
    }

    async fn status_history(
        &self,
        order_id: OrderId,
    ) -> Result<Vec<StatusChangeRecord>, StoreError> {
        sqlx::query_as::<_, HistoryRow>(
            "SELECT id, order_id, old_status, new_status, reason, error_message, \
             remote_event_id, remote_order_id, remote_charge_id, created_at \
             FROM order_status_history WHERE order_id = $1 ORDER BY id ASC",
        )
        .bind(order_id.as_uuid())
        .fetch_all(&self.pool)
        .await?
        .into_iter()
        .map(map_history)
        .collect()
    }

    async fn tickets_for_order(&self, order_id: OrderId) -> Result<Vec<Ticket>, StoreError> {
        sqlx::query_as::<_, TicketRow>(
            "SELECT id, code, signed_token, order_id, order_item_id, unit_index, user_id, \
             event_id, event_date_id, ticket_type_id, used, issued_at \
             FROM tickets WHERE order_id = $1 ORDER BY order_item_id, unit_index",
        )
        .bind(order_id.as_uuid())
        .fetch_all(&self.pool)
        .await?
        .into_iter()
        .map(map_ticket)
        .collect()
    }

    async fn lot(&self, lot_id: LotId) -> Result<Option<Lot>, StoreError> {
        sqlx::query_as::<_, (Uuid, i32, i32)>(
            "SELECT id, available_quantity, total_quantity FROM lots WHERE id = $1",
        )
        .bind(lot_id.as_uuid())
        .fetch_optional(&self.pool)
        .await?
        .map(|(id, available, total)| {
            Ok(Lot {
                id: id.into(),
                available: to_u32(available, "available_quantity")?,
                total: to_u32(total, "total_quantity")?,
            })
        })
        .transpose()
    }
}

// ── StoreTx ─────────────────────────────────────────────────────────────

#[async_trait]
impl StoreTx for PgTx {
    async fn transition_status(
        &mut self,
        order_id: OrderId,
        from: OrderStatus,
        to: OrderStatus,
    ) -> Result<bool, StoreError> {
        transition_status_on(&mut self.tx, order_id, from, to).await
    }

    async fn set_remote_ids(
        &mut self,
        order_id: OrderId,
        remote_order_id: Option<&str>,
        remote_charge_id: Option<&str>,
    ) -> Result<(), StoreError> {
        sqlx::query(
            "UPDATE orders SET remote_order_id = COALESCE($2, remote_order_id), \
             remote_charge_id = COALESCE($3, remote_charge_id), updated_at = now() WHERE id = $1",
        )
        .bind(order_id.as_uuid())
        .bind(remote_order_id)
        .bind(remote_charge_id)
        .execute(&mut *self.tx)
        .await?;
        Ok(())
    }

    async fn order(&mut self, order_id: OrderId) -> Result<Option<Order>, StoreError> {
        order_on(&mut self.tx, order_id).await
    }

    async fn order_items(&mut self, order_id: OrderId) -> Result<Vec<OrderItem>, StoreError> {
        order_items_on(&mut self.tx, order_id).await
    }

    async fn ticket_type(&mut self, id: TicketTypeId) -> Result<Option<TicketType>, StoreError> {
        ticket_type_on(&mut self.tx, id).await
    }

    async fn event_for_date(&mut self, id: EventDateId) -> Result<Option<EventId>, StoreError> {
        let event = sqlx::query_scalar::<_, Uuid>("SELECT event_id FROM event_dates WHERE id = $1")
            .bind(id.as_uuid())
            .fetch_optional(&mut *self.tx)
            .await?;
        Ok(event.map(EventId::from_uuid))
    }

    async fn insert_ticket(&mut self, ticket: &Ticket) -> Result<(), StoreError> {
        let result = sqlx::query(
            "INSERT INTO tickets (id, code, signed_token, order_id, order_item_id, unit_index, \
             user_id, event_id, event_date_id, ticket_type_id, used, issued_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)",
        )
        .bind(ticket.id.as_uuid())
        .bind(&ticket.code)
        .bind(&ticket.signed_token)
        .bind(ticket.order_id.as_uuid())
        .bind(ticket.order_item_id.as_uuid())
        .bind(to_i32(ticket.unit_index, "unit_index")?)
        .bind(ticket.user_id.as_str())
        .bind(ticket.event_id.as_uuid())
        .bind(ticket.event_date_id.as_uuid())
        .bind(ticket.ticket_type_id.as_uuid())
        .bind(ticket.used)
        .bind(ticket.issued_at)
        .execute(&mut *self.tx)
        .await;

        match result {
            Ok(_) => Ok(()),
            Err(sqlx::Error::Database(db)) if db.is_unique_violation() => Err(
                StoreError::Conflict(format!(
                    "unit {} of order item {} already has a ticket",
                    ticket.unit_index, ticket.order_item_id
                )),
            ),
            Err(e) => Err(e.into()),
        }
    }

    async fn increment_sold(&mut self, id: TicketTypeId) -> Result<(), StoreError> {
        let result =
            sqlx::query("UPDATE ticket_types SET sold_quantity = sold_quantity + 1 WHERE id = $1")
                .bind(id.as_uuid())
                .execute(&mut *self.tx)
                .await?;
        if result.rows_affected() == 1 {
            Ok(())
        } else {
            Err(StoreError::NotFound(format!("ticket type {id}")))
        }
    }

    async fn decrement_available(&mut self, lot_id: LotId) -> Result<bool, StoreError> {
        let result = sqlx::query(
            "UPDATE lots SET available_quantity = available_quantity - 1 \
             WHERE id = $1 AND available_quantity >= 1",
        )
        .bind(lot_id.as_uuid())
        .execute(&mut *self.tx)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn record_status_change(&mut self, change: &StatusChange) -> Result<(), StoreError> {
        // A failed statement aborts a PostgreSQL transaction, so the insert
        // runs in a savepoint that is discarded on failure.
        let mut savepoint = sqlx::Connection::begin(&mut *self.tx).await?;
        record_status_change_on(&mut savepoint, change).await?;
        savepoint.commit().await?;
        Ok(())
    }

    async fn commit(self: Box<Self>) -> Result<(), StoreError> {
        self.tx.commit().await?;
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<(), StoreError> {
        self.tx.rollback().await?;
        Ok(())
    }
}
