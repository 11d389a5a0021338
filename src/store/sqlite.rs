use std::{collections::BTreeSet, fs, path::Path, str::FromStr};

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, SecondsFormat, Utc};
use sqlx::{
    sqlite::{SqliteConnectOptions, SqlitePoolOptions},
    Sqlite, SqliteConnection, SqlitePool, Transaction,
};

use super::{new_id, Store, StoreError};
use crate::{
    funnel::{apply_trigger, FunnelTrigger},
    models::{
        Appointment, AppointmentStatus, Booking, Client, ClientUpdate, NewAppointment, NewClient,
        NewNotification, NewProcedure, NewUser, Notification, Procedure, Slot, StageChange,
        StatusChange, TimeSlot, UnknownLabel, User,
    },
};

#[derive(Debug, sqlx::FromRow)]
struct UserRow {
    id: String,
    username: String,
    name: String,
    role: String,
    password_hash: String,
    created_at: String,
}

#[derive(Debug, sqlx::FromRow)]
struct ClientRow {
    id: String,
    name: String,
    email: String,
    phone: String,
    cpf: Option<String>,
    funnel_stage: String,
    interests: String,
    notes: Option<String>,
    last_interaction: String,
    created_at: String,
}

#[derive(Debug, sqlx::FromRow)]
struct ProcedureRow {
    id: String,
    name: String,
    description: String,
    duration: i64,
    price: i64,
    created_at: String,
}

#[derive(Debug, sqlx::FromRow)]
struct AppointmentRow {
    id: String,
    client_id: String,
    professional_id: String,
    procedure_id: String,
    date: String,
    time: String,
    status: String,
    notes: Option<String>,
    created_at: String,
}

#[derive(Debug, sqlx::FromRow)]
struct NotificationRow {
    id: String,
    user_id: String,
    title: String,
    description: String,
    #[sqlx(rename = "type")]
    kind: String,
    read: bool,
    link: Option<String>,
    created_at: String,
}

fn timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>, StoreError> {
    DateTime::parse_from_rfc3339(raw)
        .map(|at| at.with_timezone(&Utc))
        .map_err(|err| StoreError::Corrupt(format!("timestamp {raw:?}: {err}")))
}

fn day(date: NaiveDate) -> String {
    date.format("%Y-%m-%d").to_string()
}

fn parse_day(raw: &str) -> Result<NaiveDate, StoreError> {
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .map_err(|err| StoreError::Corrupt(format!("date {raw:?}: {err}")))
}

fn parse_label<T: FromStr<Err = UnknownLabel>>(raw: &str) -> Result<T, StoreError> {
    raw.parse().map_err(|err: UnknownLabel| StoreError::Corrupt(err.to_string()))
}

fn unique_or(err: sqlx::Error, on_unique: StoreError) -> StoreError {
    if let sqlx::Error::Database(db_err) = &err {
        if db_err.is_unique_violation() {
            return on_unique;
        }
    }
    StoreError::Database(err)
}

impl TryFrom<UserRow> for User {
    type Error = StoreError;

    fn try_from(row: UserRow) -> Result<Self, Self::Error> {
        Ok(User {
            role: parse_label(&row.role)?,
            created_at: parse_timestamp(&row.created_at)?,
            id: row.id,
            username: row.username,
            name: row.name,
            password_hash: row.password_hash,
        })
    }
}

impl TryFrom<ClientRow> for Client {
    type Error = StoreError;

    fn try_from(row: ClientRow) -> Result<Self, Self::Error> {
        Ok(Client {
            funnel_stage: parse_label(&row.funnel_stage)?,
            interests: serde_json::from_str::<BTreeSet<String>>(&row.interests)?,
            last_interaction: parse_timestamp(&row.last_interaction)?,
            created_at: parse_timestamp(&row.created_at)?,
            id: row.id,
            name: row.name,
            email: row.email,
            phone: row.phone,
            cpf: row.cpf,
            notes: row.notes,
        })
    }
}

impl TryFrom<ProcedureRow> for Procedure {
    type Error = StoreError;

    fn try_from(row: ProcedureRow) -> Result<Self, Self::Error> {
        Ok(Procedure {
            created_at: parse_timestamp(&row.created_at)?,
            id: row.id,
            name: row.name,
            description: row.description,
            duration: row.duration,
            price: row.price,
        })
    }
}

impl TryFrom<AppointmentRow> for Appointment {
    type Error = StoreError;

    fn try_from(row: AppointmentRow) -> Result<Self, Self::Error> {
        Ok(Appointment {
            date: parse_day(&row.date)?,
            time: TimeSlot::try_from(row.time).map_err(|err| StoreError::Corrupt(err.to_string()))?,
            status: parse_label(&row.status)?,
            created_at: parse_timestamp(&row.created_at)?,
            id: row.id,
            client_id: row.client_id,
            professional_id: row.professional_id,
            procedure_id: row.procedure_id,
            notes: row.notes,
        })
    }
}

impl TryFrom<NotificationRow> for Notification {
    type Error = StoreError;

    fn try_from(row: NotificationRow) -> Result<Self, Self::Error> {
        Ok(Notification {
            kind: parse_label(&row.kind)?,
            created_at: parse_timestamp(&row.created_at)?,
            id: row.id,
            user_id: row.user_id,
            title: row.title,
            description: row.description,
            read: row.read,
            link: row.link,
        })
    }
}

fn convert_all<R, T>(rows: Vec<R>) -> Result<Vec<T>, StoreError>
where
    T: TryFrom<R, Error = StoreError>,
{
    rows.into_iter().map(T::try_from).collect()
}

fn database_path(db_url: &str) -> Option<&str> {
    let path = db_url
        .strip_prefix("sqlite://")
        .or_else(|| db_url.strip_prefix("sqlite:"))?;
    let path = path.split('?').next().unwrap_or(path);
    if path == ":memory:" || path.is_empty() {
        return None;
    }
    Some(path.strip_prefix("file:").unwrap_or(path))
}

pub fn is_memory_url(db_url: &str) -> bool {
    db_url.contains(":memory:") || db_url.contains("mode=memory")
}

pub fn ensure_sqlite_dir(db_url: &str) -> std::io::Result<()> {
    let Some(path) = database_path(db_url) else {
        return Ok(());
    };
    if let Some(parent) = Path::new(path).parent() {
        fs::create_dir_all(parent)?;
    }
    Ok(())
}

/// Persistent store on SQLite. The slot invariant is enforced by the
/// `appointments_active_slot` partial unique index.
#[derive(Clone)]
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    pub async fn connect(db_url: &str, max_connections: u32) -> Result<Self, StoreError> {
        ensure_sqlite_dir(db_url)?;

        let options = SqliteConnectOptions::from_str(db_url)?
            .create_if_missing(true)
            .foreign_keys(true);
        // Each in-memory connection would otherwise see its own empty database.
        let max_connections = if is_memory_url(db_url) { 1 } else { max_connections };

        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .connect_with(options)
            .await?;

        let store = Self { pool };
        store.run_migrations().await?;
        Ok(store)
    }

    pub async fn run_migrations(&self) -> Result<(), StoreError> {
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        Ok(())
    }

    #[cfg(test)]
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    async fn fetch_client(conn: &mut SqliteConnection, id: &str) -> Result<Option<Client>, StoreError> {
        let row = sqlx::query_as::<_, ClientRow>(
            r#"SELECT id, name, email, phone, cpf, funnel_stage, interests, notes,
                      last_interaction, created_at
               FROM clients
               WHERE id = ?"#,
        )
        .bind(id)
        .fetch_optional(&mut *conn)
        .await?;
        row.map(Client::try_from).transpose()
    }

    async fn fire(
        conn: &mut SqliteConnection,
        client_id: &str,
        trigger: FunnelTrigger,
        at: DateTime<Utc>,
    ) -> Result<Option<StageChange>, StoreError> {
        if !Self::claim_client(conn, client_id).await? {
            return Ok(None);
        }
        let Some(mut client) = Self::fetch_client(conn, client_id).await? else {
            return Ok(None);
        };
        let change = apply_trigger(&mut client, trigger, at);
        if change.written {
            sqlx::query("UPDATE clients SET funnel_stage = ?, last_interaction = ? WHERE id = ?")
                .bind(change.client.funnel_stage.as_str())
                .bind(timestamp(change.client.last_interaction))
                .bind(client_id)
                .execute(&mut *conn)
                .await?;
        }
        Ok(Some(change))
    }

    async fn fetch_appointment(conn: &mut SqliteConnection, id: &str) -> Result<Option<Appointment>, StoreError> {
        let row = sqlx::query_as::<_, AppointmentRow>(
            r#"SELECT id, client_id, professional_id, procedure_id, date, time, status, notes, created_at
               FROM appointments
               WHERE id = ?"#,
        )
        .bind(id)
        .fetch_optional(&mut *conn)
        .await?;
        row.map(Appointment::try_from).transpose()
    }

    // A deferred transaction that reads first cannot wait for the write lock:
    // SQLite answers SQLITE_BUSY at once when it has to upgrade. Touching the
    // row first takes the write lock up front, under the busy timeout.
    async fn claim_client(conn: &mut SqliteConnection, id: &str) -> Result<bool, StoreError> {
        let claimed = sqlx::query("UPDATE clients SET last_interaction = last_interaction WHERE id = ?")
            .bind(id)
            .execute(&mut *conn)
            .await?;
        Ok(claimed.rows_affected() > 0)
    }

    async fn claim_appointment(conn: &mut SqliteConnection, id: &str) -> Result<bool, StoreError> {
        let claimed = sqlx::query("UPDATE appointments SET status = status WHERE id = ?")
            .bind(id)
            .execute(&mut *conn)
            .await?;
        Ok(claimed.rows_affected() > 0)
    }

    async fn write_client(conn: &mut SqliteConnection, client: &Client) -> Result<(), StoreError> {
        sqlx::query(
            r#"UPDATE clients
               SET name = ?, email = ?, phone = ?, cpf = ?, funnel_stage = ?, interests = ?,
                   notes = ?, last_interaction = ?
               WHERE id = ?"#,
        )
        .bind(&client.name)
        .bind(&client.email)
        .bind(&client.phone)
        .bind(&client.cpf)
        .bind(client.funnel_stage.as_str())
        .bind(serde_json::to_string(&client.interests)?)
        .bind(&client.notes)
        .bind(timestamp(client.last_interaction))
        .bind(&client.id)
        .execute(&mut *conn)
        .await?;
        Ok(())
    }

    async fn edit_client(
        conn: &mut SqliteConnection,
        id: &str,
        update: ClientUpdate,
        at: DateTime<Utc>,
    ) -> Result<Option<Client>, StoreError> {
        if !Self::claim_client(conn, id).await? {
            return Ok(None);
        }
        let Some(mut client) = Self::fetch_client(conn, id).await? else {
            return Ok(None);
        };
        update.apply(&mut client, at);
        Self::write_client(conn, &client).await?;
        Ok(Some(client))
    }

    async fn change_status(
        conn: &mut SqliteConnection,
        id: &str,
        status: AppointmentStatus,
        at: DateTime<Utc>,
    ) -> Result<Option<StatusChange>, StoreError> {
        if !Self::claim_appointment(conn, id).await? {
            return Ok(None);
        }
        let Some(mut appointment) = Self::fetch_appointment(conn, id).await? else {
            return Ok(None);
        };
        let previous = appointment.status;

        sqlx::query("UPDATE appointments SET status = ? WHERE id = ?")
            .bind(status.as_str())
            .bind(id)
            .execute(&mut *conn)
            .await
            .map_err(|err| unique_or(err, StoreError::SlotTaken))?;
        appointment.status = status;

        let stage_change = if status == AppointmentStatus::Completed {
            Self::fire(conn, &appointment.client_id, FunnelTrigger::Completed, at).await?
        } else {
            None
        };
        Ok(Some(StatusChange {
            appointment,
            previous,
            stage_change,
        }))
    }
}

/// Commits on success; rolls back and hands the error on otherwise.
async fn settle<T>(tx: Transaction<'_, Sqlite>, result: Result<T, StoreError>) -> Result<T, StoreError> {
    match result {
        Ok(value) => {
            tx.commit().await?;
            Ok(value)
        }
        Err(err) => {
            if let Err(rollback) = tx.rollback().await {
                log::warn!("Rollback after \"{err}\" failed: {rollback}");
            }
            Err(err)
        }
    }
}

#[async_trait]
impl Store for SqliteStore {
    async fn insert_user(&self, new: NewUser, at: DateTime<Utc>) -> Result<User, StoreError> {
        let user = User {
            id: new_id(),
            username: new.username,
            name: new.name,
            role: new.role,
            password_hash: new.password_hash,
            created_at: at,
        };
        sqlx::query(
            r#"INSERT INTO users (id, username, name, role, password_hash, created_at)
               VALUES (?, ?, ?, ?, ?, ?)"#,
        )
        .bind(&user.id)
        .bind(&user.username)
        .bind(&user.name)
        .bind(user.role.as_str())
        .bind(&user.password_hash)
        .bind(timestamp(at))
        .execute(&self.pool)
        .await
        .map_err(|err| unique_or(err, StoreError::Duplicate("username")))?;
        Ok(user)
    }

    async fn get_user(&self, id: &str) -> Result<Option<User>, StoreError> {
        sqlx::query_as::<_, UserRow>(
            "SELECT id, username, name, role, password_hash, created_at FROM users WHERE id = ?",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?
        .map(User::try_from)
        .transpose()
    }

    async fn find_user_by_username(&self, username: &str) -> Result<Option<User>, StoreError> {
        sqlx::query_as::<_, UserRow>(
            r#"SELECT id, username, name, role, password_hash, created_at
               FROM users
               WHERE username = ?
               LIMIT 1"#,
        )
        .bind(username)
        .fetch_optional(&self.pool)
        .await?
        .map(User::try_from)
        .transpose()
    }

    async fn list_users(&self) -> Result<Vec<User>, StoreError> {
        let rows = sqlx::query_as::<_, UserRow>(
            "SELECT id, username, name, role, password_hash, created_at FROM users ORDER BY name",
        )
        .fetch_all(&self.pool)
        .await?;
        convert_all(rows)
    }

    async fn insert_client(&self, new: NewClient, at: DateTime<Utc>) -> Result<Client, StoreError> {
        let client = Client {
            id: new_id(),
            name: new.name,
            email: new.email,
            phone: new.phone,
            cpf: new.cpf,
            funnel_stage: new.funnel_stage.unwrap_or_default(),
            interests: new.interests,
            notes: new.notes,
            last_interaction: at,
            created_at: at,
        };
        sqlx::query(
            r#"INSERT INTO clients
               (id, name, email, phone, cpf, funnel_stage, interests, notes, last_interaction, created_at)
               VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)"#,
        )
        .bind(&client.id)
        .bind(&client.name)
        .bind(&client.email)
        .bind(&client.phone)
        .bind(&client.cpf)
        .bind(client.funnel_stage.as_str())
        .bind(serde_json::to_string(&client.interests)?)
        .bind(&client.notes)
        .bind(timestamp(at))
        .bind(timestamp(at))
        .execute(&self.pool)
        .await?;
        Ok(client)
    }

    async fn get_client(&self, id: &str) -> Result<Option<Client>, StoreError> {
        let mut conn = self.pool.acquire().await?;
        Self::fetch_client(&mut conn, id).await
    }

    async fn list_clients(&self) -> Result<Vec<Client>, StoreError> {
        let rows = sqlx::query_as::<_, ClientRow>(
            r#"SELECT id, name, email, phone, cpf, funnel_stage, interests, notes,
                      last_interaction, created_at
               FROM clients
               ORDER BY created_at"#,
        )
        .fetch_all(&self.pool)
        .await?;
        convert_all(rows)
    }

    async fn update_client(
        &self,
        id: &str,
        update: ClientUpdate,
        at: DateTime<Utc>,
    ) -> Result<Option<Client>, StoreError> {
        let mut tx = self.pool.begin().await?;
        let result = Self::edit_client(&mut tx, id, update, at).await;
        settle(tx, result).await
    }

    async fn apply_funnel_trigger(
        &self,
        client_id: &str,
        trigger: FunnelTrigger,
        at: DateTime<Utc>,
    ) -> Result<Option<StageChange>, StoreError> {
        let mut tx = self.pool.begin().await?;
        let result = Self::fire(&mut tx, client_id, trigger, at).await;
        settle(tx, result).await
    }

    async fn funnel_stage_labels(&self) -> Result<Vec<String>, StoreError> {
        Ok(sqlx::query_scalar::<_, String>("SELECT funnel_stage FROM clients")
            .fetch_all(&self.pool)
            .await?)
    }

    async fn insert_procedure(&self, new: NewProcedure, at: DateTime<Utc>) -> Result<Procedure, StoreError> {
        let procedure = Procedure {
            id: new_id(),
            name: new.name,
            description: new.description,
            duration: new.duration,
            price: new.price,
            created_at: at,
        };
        sqlx::query(
            r#"INSERT INTO procedures (id, name, description, duration, price, created_at)
               VALUES (?, ?, ?, ?, ?, ?)"#,
        )
        .bind(&procedure.id)
        .bind(&procedure.name)
        .bind(&procedure.description)
        .bind(procedure.duration)
        .bind(procedure.price)
        .bind(timestamp(at))
        .execute(&self.pool)
        .await
        .map_err(|err| unique_or(err, StoreError::Duplicate("procedure name")))?;
        Ok(procedure)
    }

    async fn get_procedure(&self, id: &str) -> Result<Option<Procedure>, StoreError> {
        sqlx::query_as::<_, ProcedureRow>(
            "SELECT id, name, description, duration, price, created_at FROM procedures WHERE id = ?",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?
        .map(Procedure::try_from)
        .transpose()
    }

    async fn list_procedures(&self) -> Result<Vec<Procedure>, StoreError> {
        let rows = sqlx::query_as::<_, ProcedureRow>(
            "SELECT id, name, description, duration, price, created_at FROM procedures ORDER BY name",
        )
        .fetch_all(&self.pool)
        .await?;
        convert_all(rows)
    }

    async fn slot_taken(&self, slot: &Slot) -> Result<bool, StoreError> {
        let held = sqlx::query_scalar::<_, i64>(
            r#"SELECT COUNT(*) FROM appointments
               WHERE date = ? AND time = ? AND professional_id = ? AND status <> 'CANCELED'"#,
        )
        .bind(day(slot.date))
        .bind(slot.time.as_str())
        .bind(&slot.professional_id)
        .fetch_one(&self.pool)
        .await?;
        Ok(held > 0)
    }

    async fn book_appointment(&self, new: NewAppointment, at: DateTime<Utc>) -> Result<Booking, StoreError> {
        let appointment = Appointment {
            id: new_id(),
            status: new.initial_status(),
            client_id: new.client_id,
            professional_id: new.professional_id,
            procedure_id: new.procedure_id,
            date: new.date,
            time: new.time,
            notes: new.notes,
            created_at: at,
        };

        let mut tx = self.pool.begin().await?;
        let inserted = sqlx::query(
            r#"INSERT INTO appointments
               (id, client_id, professional_id, procedure_id, date, time, status, notes, created_at)
               VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)"#,
        )
        .bind(&appointment.id)
        .bind(&appointment.client_id)
        .bind(&appointment.professional_id)
        .bind(&appointment.procedure_id)
        .bind(day(appointment.date))
        .bind(appointment.time.as_str())
        .bind(appointment.status.as_str())
        .bind(&appointment.notes)
        .bind(timestamp(at))
        .execute(&mut *tx)
        .await
        .map_err(|err| unique_or(err, StoreError::SlotTaken));
        let result = match inserted {
            Ok(_) => Self::fire(&mut tx, &appointment.client_id, FunnelTrigger::Booked, at).await,
            Err(err) => Err(err),
        };
        let stage_change = settle(tx, result).await?;

        Ok(Booking {
            appointment,
            stage_change,
        })
    }

    async fn get_appointment(&self, id: &str) -> Result<Option<Appointment>, StoreError> {
        let mut conn = self.pool.acquire().await?;
        Self::fetch_appointment(&mut conn, id).await
    }

    async fn list_appointments(&self) -> Result<Vec<Appointment>, StoreError> {
        let rows = sqlx::query_as::<_, AppointmentRow>(
            r#"SELECT id, client_id, professional_id, procedure_id, date, time, status, notes, created_at
               FROM appointments
               ORDER BY date, time"#,
        )
        .fetch_all(&self.pool)
        .await?;
        convert_all(rows)
    }

    async fn appointments_between(&self, from: NaiveDate, to: NaiveDate) -> Result<Vec<Appointment>, StoreError> {
        let rows = sqlx::query_as::<_, AppointmentRow>(
            r#"SELECT id, client_id, professional_id, procedure_id, date, time, status, notes, created_at
               FROM appointments
               WHERE date BETWEEN ? AND ?
               ORDER BY date, time"#,
        )
        .bind(day(from))
        .bind(day(to))
        .fetch_all(&self.pool)
        .await?;
        convert_all(rows)
    }

    async fn set_appointment_status(
        &self,
        id: &str,
        status: AppointmentStatus,
        at: DateTime<Utc>,
    ) -> Result<Option<StatusChange>, StoreError> {
        let mut tx = self.pool.begin().await?;
        let result = Self::change_status(&mut tx, id, status, at).await;
        settle(tx, result).await
    }

    async fn insert_notification(
        &self,
        new: NewNotification,
        at: DateTime<Utc>,
    ) -> Result<Notification, StoreError> {
        let notification = Notification {
            id: new_id(),
            user_id: new.user_id,
            title: new.title,
            description: new.description,
            kind: new.kind,
            read: false,
            link: new.link,
            created_at: at,
        };
        sqlx::query(
            r#"INSERT INTO notifications (id, user_id, title, description, type, read, link, created_at)
               VALUES (?, ?, ?, ?, ?, 0, ?, ?)"#,
        )
        .bind(&notification.id)
        .bind(&notification.user_id)
        .bind(&notification.title)
        .bind(&notification.description)
        .bind(notification.kind.as_str())
        .bind(&notification.link)
        .bind(timestamp(at))
        .execute(&self.pool)
        .await?;
        Ok(notification)
    }

    async fn notifications_for_user(&self, user_id: &str) -> Result<Vec<Notification>, StoreError> {
        let rows = sqlx::query_as::<_, NotificationRow>(
            r#"SELECT id, user_id, title, description, type, read, link, created_at
               FROM notifications
               WHERE user_id = ?
               ORDER BY created_at DESC"#,
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;
        convert_all(rows)
    }

    async fn recent_notifications(&self, limit: usize) -> Result<Vec<Notification>, StoreError> {
        let rows = sqlx::query_as::<_, NotificationRow>(
            r#"SELECT id, user_id, title, description, type, read, link, created_at
               FROM notifications
               ORDER BY created_at DESC
               LIMIT ?"#,
        )
        .bind(i64::try_from(limit).unwrap_or(i64::MAX))
        .fetch_all(&self.pool)
        .await?;
        convert_all(rows)
    }

    async fn mark_notification_read(&self, id: &str) -> Result<Option<Notification>, StoreError> {
        let updated = sqlx::query("UPDATE notifications SET read = 1 WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;
        if updated.rows_affected() == 0 {
            return Ok(None);
        }
        sqlx::query_as::<_, NotificationRow>(
            r#"SELECT id, user_id, title, description, type, read, link, created_at
               FROM notifications
               WHERE id = ?"#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?
        .map(Notification::try_from)
        .transpose()
    }
}
