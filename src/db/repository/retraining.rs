use std::str::FromStr;

use rusqlite::{params, Connection};
use uuid::Uuid;

use super::parse_timestamp;
use crate::db::DatabaseError;
use crate::models::*;

pub fn insert_retrain_run(conn: &Connection, run: &RetrainRun) -> Result<(), DatabaseError> {
    conn.execute(
        "INSERT INTO retraining_runs
         (id, trigger, started_at, finished_at, status, samples_used, samples_skipped,
          train_accuracy, train_loss, validation_accuracy, artifact_version, error)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
        params![
            run.id.to_string(),
            run.trigger.as_str(),
            run.started_at.to_rfc3339(),
            run.finished_at.to_rfc3339(),
            run.status.as_str(),
            run.samples_used as i64,
            run.samples_skipped as i64,
            run.train_accuracy,
            run.train_loss,
            run.validation_accuracy,
            run.artifact_version.map(|v| v as i64),
            run.error,
        ],
    )?;
    Ok(())
}

/// Most recent runs first.
pub fn list_retrain_runs(conn: &Connection, limit: usize) -> Result<Vec<RetrainRun>, DatabaseError> {
    let mut stmt = conn.prepare(
        "SELECT id, trigger, started_at, finished_at, status, samples_used, samples_skipped,
                train_accuracy, train_loss, validation_accuracy, artifact_version, error
         FROM retraining_runs ORDER BY started_at DESC LIMIT ?1",
    )?;

    let rows = stmt.query_map(params![limit as i64], |row| {
        Ok(RetrainRunRow {
            id: row.get(0)?,
            trigger: row.get(1)?,
            started_at: row.get(2)?,
            finished_at: row.get(3)?,
            status: row.get(4)?,
            samples_used: row.get(5)?,
            samples_skipped: row.get(6)?,
            train_accuracy: row.get(7)?,
            train_loss: row.get(8)?,
            validation_accuracy: row.get(9)?,
            artifact_version: row.get(10)?,
            error: row.get(11)?,
        })
    })?;

    let mut runs = Vec::new();
    for row in rows {
        runs.push(run_from_row(row?)?);
    }
    Ok(runs)
}

struct RetrainRunRow {
    id: String,
    trigger: String,
    started_at: String,
    finished_at: String,
    status: String,
    samples_used: i64,
    samples_skipped: i64,
    train_accuracy: Option<f32>,
    train_loss: Option<f32>,
    validation_accuracy: Option<f32>,
    artifact_version: Option<i64>,
    error: Option<String>,
}

fn run_from_row(row: RetrainRunRow) -> Result<RetrainRun, DatabaseError> {
    Ok(RetrainRun {
        id: Uuid::parse_str(&row.id).map_err(|e| DatabaseError::ConstraintViolation(e.to_string()))?,
        trigger: RetrainTrigger::from_str(&row.trigger)?,
        started_at: parse_timestamp("started_at", &row.started_at)?,
        finished_at: parse_timestamp("finished_at", &row.finished_at)?,
        status: RunStatus::from_str(&row.status)?,
        samples_used: row.samples_used.max(0) as usize,
        samples_skipped: row.samples_skipped.max(0) as usize,
        train_accuracy: row.train_accuracy,
        train_loss: row.train_loss,
        validation_accuracy: row.validation_accuracy,
        artifact_version: row.artifact_version.map(|v| v.max(0) as u64),
        error: row.error,
    })
}
