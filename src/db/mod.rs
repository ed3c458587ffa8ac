//! Parking-session history store: an append-mostly SQLite table behind a
//! dedicated worker thread. Sessions are opened on the Parked transition,
//! get their verdict snapshot attached once evaluation completes, and are
//! closed with a departure timestamp on the Driving transition. Closed rows
//! are never mutated again.

use std::{
    path::{Path, PathBuf},
    sync::{mpsc, Arc, Mutex},
    thread::{self, JoinHandle},
};

use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, Utc};
use log::{error, info, warn};
use rusqlite::{params, Connection, Row};
use tokio::sync::oneshot;

mod migrations;

use migrations::run_migrations;

use crate::geo::LocationFix;
use crate::models::{ParkingSession, SessionStatus};
use crate::rules::RestrictionVerdict;

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

fn status_from_str(value: &str) -> Result<SessionStatus> {
    match value {
        "Active" => Ok(SessionStatus::Active),
        "Departed" => Ok(SessionStatus::Departed),
        "Interrupted" => Ok(SessionStatus::Interrupted),
        _ => Err(anyhow!("unknown session status '{value}'")),
    }
}

const SESSION_COLUMNS: &str = "id, started_at, ended_at, status, lat, lng, accuracy_m, \
                               fix_captured_at, verdict_json, created_at, updated_at";

fn session_from_row(row: &Row<'_>) -> Result<ParkingSession> {
    let location = match (
        row.get::<_, Option<f64>>(4)?,
        row.get::<_, Option<f64>>(5)?,
        row.get::<_, Option<f64>>(6)?,
        row.get::<_, Option<String>>(7)?,
    ) {
        (Some(lat), Some(lng), Some(accuracy_m), Some(captured_at)) => Some(LocationFix {
            lat,
            lng,
            accuracy_m,
            captured_at: parse_datetime(&captured_at)?,
        }),
        _ => None,
    };

    let verdict = row
        .get::<_, Option<String>>(8)?
        .map(|json| {
            serde_json::from_str::<RestrictionVerdict>(&json)
                .map_err(|err| anyhow!("invalid verdict snapshot: {err}"))
        })
        .transpose()?;

    Ok(ParkingSession {
        id: row.get(0)?,
        started_at: parse_datetime(&row.get::<_, String>(1)?)?,
        ended_at: row
            .get::<_, Option<String>>(2)?
            .map(|s| parse_datetime(&s))
            .transpose()?,
        status: status_from_str(&row.get::<_, String>(3)?)?,
        location,
        verdict,
        created_at: parse_datetime(&row.get::<_, String>(9)?)?,
        updated_at: parse_datetime(&row.get::<_, String>(10)?)?,
    })
}

#[derive(Clone)]
pub struct Database {
    inner: Arc<DatabaseInner>,
    db_path: Arc<PathBuf>,
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
            .name("curbwatch-db".into())
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

        info!("Session database initialized at {}", db_path.as_path().display());

        Ok(Self {
            inner: Arc::new(DatabaseInner {
                sender: command_tx,
                worker: Mutex::new(Some(worker)),
            }),
            db_path: Arc::new(db_path),
        })
    }

    pub fn path(&self) -> &Path {
        self.db_path.as_path()
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

    pub async fn insert_session(&self, session: &ParkingSession) -> Result<()> {
        let record = session.clone();
        self.execute(move |conn| {
            let verdict_json = record
                .verdict
                .as_ref()
                .map(serde_json::to_string)
                .transpose()
                .context("failed to serialize verdict snapshot")?;

            conn.execute(
                "INSERT INTO parking_sessions (id, started_at, ended_at, status, lat, lng, \
                 accuracy_m, fix_captured_at, verdict_json, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
                params![
                    record.id,
                    record.started_at.to_rfc3339(),
                    record.ended_at.as_ref().map(|dt| dt.to_rfc3339()),
                    record.status.as_str(),
                    record.location.map(|fix| fix.lat),
                    record.location.map(|fix| fix.lng),
                    record.location.map(|fix| fix.accuracy_m),
                    record.location.map(|fix| fix.captured_at.to_rfc3339()),
                    verdict_json,
                    record.created_at.to_rfc3339(),
                    record.updated_at.to_rfc3339(),
                ],
            )
            .with_context(|| "failed to insert parking session")?;
            Ok(())
        })
        .await
    }

    /// Attach the evaluation snapshot to an open session. The verdict column
    /// is written once; later evaluations supersede it with a fresh snapshot.
    pub async fn attach_verdict(
        &self,
        session_id: &str,
        verdict: &RestrictionVerdict,
        updated_at: DateTime<Utc>,
    ) -> Result<()> {
        let session_id = session_id.to_string();
        let verdict_json =
            serde_json::to_string(verdict).context("failed to serialize verdict snapshot")?;

        self.execute(move |conn| {
            conn.execute(
                "UPDATE parking_sessions
                 SET verdict_json = ?1,
                     updated_at = ?2
                 WHERE id = ?3",
                params![verdict_json, updated_at.to_rfc3339(), session_id],
            )
            .with_context(|| "failed to attach verdict snapshot")?;
            Ok(())
        })
        .await
    }

    pub async fn close_session(
        &self,
        session_id: &str,
        status: SessionStatus,
        ended_at: DateTime<Utc>,
    ) -> Result<()> {
        let session_id = session_id.to_string();
        self.execute(move |conn| {
            conn.execute(
                "UPDATE parking_sessions
                 SET status = ?1,
                     ended_at = ?2,
                     updated_at = ?3
                 WHERE id = ?4",
                params![
                    status.as_str(),
                    ended_at.to_rfc3339(),
                    ended_at.to_rfc3339(),
                    session_id,
                ],
            )
            .with_context(|| "failed to close parking session")?;
            Ok(())
        })
        .await
    }

    pub async fn get_open_session(&self) -> Result<Option<ParkingSession>> {
        self.execute(|conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {SESSION_COLUMNS} FROM parking_sessions
                 WHERE status = 'Active'
                 ORDER BY started_at DESC
                 LIMIT 1"
            ))?;

            let mut rows = stmt.query([])?;
            match rows.next()? {
                Some(row) => Ok(Some(session_from_row(row)?)),
                None => Ok(None),
            }
        })
        .await
    }

    /// Startup recovery: sessions left open by a previous process get closed
    /// as Interrupted so history never shows two concurrent parks.
    pub async fn mark_stale_sessions_interrupted(&self, at: DateTime<Utc>) -> Result<usize> {
        let count = self
            .execute(move |conn| {
                let updated = conn.execute(
                    "UPDATE parking_sessions
                     SET status = 'Interrupted',
                         ended_at = COALESCE(ended_at, ?1),
                         updated_at = ?1
                     WHERE status = 'Active'",
                    params![at.to_rfc3339()],
                )?;
                Ok(updated)
            })
            .await?;

        if count > 0 {
            warn!("Recovered {count} interrupted parking session(s) at startup");
        }
        Ok(count)
    }

    pub async fn list_recent(&self, limit: u32) -> Result<Vec<ParkingSession>> {
        self.execute(move |conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {SESSION_COLUMNS} FROM parking_sessions
                 ORDER BY started_at DESC
                 LIMIT ?1"
            ))?;

            let mut rows = stmt.query(params![limit])?;
            let mut sessions = Vec::new();
            while let Some(row) = rows.next()? {
                sessions.push(session_from_row(row)?);
            }
            Ok(sessions)
        })
        .await
    }
}
