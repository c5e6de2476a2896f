//! SQLite-backed store for alert logs and duty statistics. All connection
//! access happens on a dedicated native thread; async callers submit
//! closures over a channel and await a oneshot reply.

use std::{
    path::PathBuf,
    sync::{mpsc, Arc, Mutex},
    thread::{self, JoinHandle},
};

use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, Utc};
use log::{error, info};
use rusqlite::{params, Connection};
use tokio::sync::oneshot;

mod migrations;

use crate::alerts::AlertRecord;
use crate::stats::StatsSnapshot;
use migrations::run_migrations;

type DbTask = Box<dyn FnOnce(&mut Connection) + Send + 'static>;

enum DbCommand {
    Execute(DbTask),
    Shutdown,
}

struct DatabaseInner {
    sender: mpsc::Sender<DbCommand>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl Drop for DatabaseInner {
    fn drop(&mut self) {
        let mut guard = match self.worker.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };

        if let Some(handle) = guard.take() {
            if let Err(err) = self.sender.send(DbCommand::Shutdown) {
                error!("Failed to send shutdown to DB thread: {err}");
            }
            if let Err(join_err) = handle.join() {
                error!("Failed to join DB thread: {join_err:?}");
            }
        }
    }
}

fn parse_datetime(value: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|err| anyhow!("invalid datetime '{value}': {err}"))
}

fn join_channels(channels: &[String]) -> String {
    channels.join(",")
}

fn split_channels(value: &str) -> Vec<String> {
    value
        .split(',')
        .filter(|s| !s.is_empty())
        .map(String::from)
        .collect()
}

#[derive(Clone)]
pub struct Database {
    inner: Arc<DatabaseInner>,
}

impl Database {
    pub fn new(db_path: PathBuf) -> Result<Self> {
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent).with_context(|| {
                format!("failed to create database directory {}", parent.display())
            })?;
        }

        let (command_tx, command_rx) = mpsc::channel::<DbCommand>();
        let (ready_tx, ready_rx) = mpsc::channel();
        let path_for_thread = db_path.clone();

        let worker = thread::Builder::new()
            .name("dutywatch-db".into())
            .spawn(move || {
                let mut conn = match Connection::open(&path_for_thread) {
                    Ok(connection) => connection,
                    Err(err) => {
                        let _ = ready_tx.send(Err(anyhow::Error::new(err)
                            .context("failed to open SQLite database")));
                        return;
                    }
                };

                if let Err(err) = conn.pragma_update(None, "journal_mode", "WAL") {
                    error!("Failed to enable WAL mode: {err}");
                }

                let init_result =
                    run_migrations(&mut conn).context("failed to run database migrations");
                if ready_tx.send(init_result).is_err() {
                    error!("DB initialization receiver dropped before ready signal");
                    return;
                }

                while let Ok(command) = command_rx.recv() {
                    match command {
                        DbCommand::Execute(task) => {
                            task(&mut conn);
                        }
                        DbCommand::Shutdown => break,
                    }
                }

                info!("Database thread shutting down");
            })
            .with_context(|| "failed to spawn database worker thread")?;

        ready_rx
            .recv()
            .context("database worker exited before signaling readiness")??;

        info!("Database initialized at {}", db_path.display());

        Ok(Self {
            inner: Arc::new(DatabaseInner {
                sender: command_tx,
                worker: Mutex::new(Some(worker)),
            }),
        })
    }

    pub async fn execute<F, T>(&self, task: F) -> Result<T>
    where
        F: FnOnce(&mut Connection) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let sender = self.inner.sender.clone();
        let (reply_tx, reply_rx) = oneshot::channel();

        let command = DbCommand::Execute(Box::new(move |conn| {
            let result = task(conn);
            if reply_tx.send(result).is_err() {
                error!("DB caller dropped before receiving result");
            }
        }));

        sender
            .send(command)
            .map_err(|err| anyhow!("failed to send command to DB thread: {err}"))?;

        reply_rx
            .await
            .map_err(|_| anyhow!("database thread terminated unexpectedly"))?
    }

    /// Inserts an alert and returns its assigned row id.
    pub async fn insert_alert(&self, alert: &AlertRecord) -> Result<i64> {
        let record = alert.clone();
        self.execute(move |conn| {
            conn.execute(
                "INSERT INTO alert_logs (person_id, person_label, alert_type, message, duration_seconds, triggered_at, channels, status)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                params![
                    record.person_id,
                    record.person_label,
                    record.alert_type,
                    record.message,
                    record.duration_seconds,
                    record.triggered_at.to_rfc3339(),
                    join_channels(&record.channels),
                    record.status,
                ],
            )
            .with_context(|| "failed to insert alert")?;
            Ok(conn.last_insert_rowid())
        })
        .await
    }

    /// Most recent alerts first, at most `limit` rows.
    pub async fn list_alerts(&self, limit: usize) -> Result<Vec<AlertRecord>> {
        self.execute(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT id, person_id, person_label, alert_type, message, duration_seconds, triggered_at, channels, status
                 FROM alert_logs
                 ORDER BY triggered_at DESC, id DESC
                 LIMIT ?1",
            )?;

            let mut rows = stmt.query(params![limit as i64])?;
            let mut alerts = Vec::new();
            while let Some(row) = rows.next()? {
                alerts.push(AlertRecord {
                    id: Some(row.get(0)?),
                    person_id: row.get(1)?,
                    person_label: row.get(2)?,
                    alert_type: row.get(3)?,
                    message: row.get(4)?,
                    duration_seconds: row.get(5)?,
                    triggered_at: parse_datetime(&row.get::<_, String>(6)?)?,
                    channels: split_channels(&row.get::<_, String>(7)?),
                    status: row.get(8)?,
                });
            }

            Ok(alerts)
        })
        .await
    }

    pub async fn count_alerts_since(&self, since: DateTime<Utc>) -> Result<i64> {
        self.execute(move |conn| {
            let count: i64 = conn.query_row(
                "SELECT COUNT(*) FROM alert_logs WHERE triggered_at >= ?1",
                params![since.to_rfc3339()],
                |row| row.get(0),
            )?;
            Ok(count)
        })
        .await
    }

    /// Returns false when no alert with this id exists.
    pub async fn update_alert_status(&self, alert_id: i64, status: &str) -> Result<bool> {
        let status = status.to_string();
        self.execute(move |conn| {
            let changed = conn
                .execute(
                    "UPDATE alert_logs SET status = ?1 WHERE id = ?2",
                    params![status, alert_id],
                )
                .with_context(|| "failed to update alert status")?;
            Ok(changed > 0)
        })
        .await
    }

    pub async fn insert_stats_snapshot(&self, snapshot: &StatsSnapshot) -> Result<i64> {
        let record = snapshot.clone();
        self.execute(move |conn| {
            conn.execute(
                "INSERT INTO stats_snapshots (captured_at, on_duty_seconds, off_duty_seconds, total_seconds, continuous_on_duty_seconds, within_work_hours)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    record.captured_at.to_rfc3339(),
                    record.on_duty_seconds,
                    record.off_duty_seconds,
                    record.total_seconds,
                    record.continuous_on_duty_seconds,
                    record.within_work_hours as i64,
                ],
            )
            .with_context(|| "failed to insert stats snapshot")?;
            Ok(conn.last_insert_rowid())
        })
        .await
    }

    /// Snapshots inside the optional time bounds, oldest first, at most
    /// `limit` rows.
    pub async fn query_stats_snapshots(
        &self,
        start: Option<DateTime<Utc>>,
        end: Option<DateTime<Utc>>,
        limit: usize,
    ) -> Result<Vec<StatsSnapshot>> {
        self.execute(move |conn| {
            let start = start.map(|dt| dt.to_rfc3339()).unwrap_or_default();
            let end = end
                .map(|dt| dt.to_rfc3339())
                .unwrap_or_else(|| "9999-12-31T23:59:59+00:00".to_string());

            let mut stmt = conn.prepare(
                "SELECT id, captured_at, on_duty_seconds, off_duty_seconds, total_seconds, continuous_on_duty_seconds, within_work_hours
                 FROM stats_snapshots
                 WHERE captured_at >= ?1 AND captured_at <= ?2
                 ORDER BY captured_at ASC
                 LIMIT ?3",
            )?;

            let mut rows = stmt.query(params![start, end, limit as i64])?;
            let mut snapshots = Vec::new();
            while let Some(row) = rows.next()? {
                snapshots.push(StatsSnapshot {
                    id: Some(row.get(0)?),
                    captured_at: parse_datetime(&row.get::<_, String>(1)?)?,
                    on_duty_seconds: row.get(2)?,
                    off_duty_seconds: row.get(3)?,
                    total_seconds: row.get(4)?,
                    continuous_on_duty_seconds: row.get(5)?,
                    within_work_hours: row.get::<_, i64>(6)? != 0,
                });
            }

            Ok(snapshots)
        })
        .await
    }
}
