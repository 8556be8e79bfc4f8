use rusqlite::{params, Connection, Row};
use uuid::Uuid;

use super::{map_constraint, parse_timestamp};
use crate::db::DatabaseError;
use crate::models::*;

const SCAN_COLUMNS: &str = "id, patient_id, image_url, upload_date, prediction_condition,
     prediction_confidence, doctor_notes, doctor_confirmed, doctor_corrected_diagnosis,
     assessed_by, assessed_date";

pub fn insert_scan(conn: &Connection, scan: &Scan) -> Result<(), DatabaseError> {
    conn.execute(
        &format!(
            "INSERT INTO scans ({SCAN_COLUMNS})
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)"
        ),
        params![
            scan.id.to_string(),
            scan.patient_id,
            scan.image_url,
            scan.upload_date.to_rfc3339(),
            scan.prediction_condition,
            scan.prediction_confidence,
            scan.doctor_notes,
            scan.doctor_confirmed,
            scan.doctor_corrected_diagnosis,
            scan.assessed_by,
            scan.assessed_date.map(|d| d.to_rfc3339()),
        ],
    )
    .map_err(|e| map_constraint(e, &format!("image_url '{}' is already recorded", scan.image_url)))?;
    Ok(())
}

pub fn get_scan(conn: &Connection, id: &Uuid) -> Result<Option<Scan>, DatabaseError> {
    let mut stmt = conn.prepare(&format!("SELECT {SCAN_COLUMNS} FROM scans WHERE id = ?1"))?;
    let result = stmt.query_row(params![id.to_string()], scan_row);

    match result {
        Ok(row) => Ok(Some(scan_from_row(row)?)),
        Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
        Err(e) => Err(e.into()),
    }
}

pub fn list_scans(conn: &Connection) -> Result<Vec<Scan>, DatabaseError> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {SCAN_COLUMNS} FROM scans ORDER BY upload_date DESC"
    ))?;
    let rows = stmt.query_map([], scan_row)?;
    collect_scans(rows)
}

pub fn list_scans_by_patient(conn: &Connection, patient_id: &str) -> Result<Vec<Scan>, DatabaseError> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {SCAN_COLUMNS} FROM scans WHERE patient_id = ?1 ORDER BY upload_date DESC"
    ))?;
    let rows = stmt.query_map(params![patient_id], scan_row)?;
    collect_scans(rows)
}

/// Doctor-confirmed scans that carry a label (correction or prediction).
/// Whether the label is usable and the image resolvable is decided by the corpus builder.
pub fn list_training_eligible_scans(conn: &Connection) -> Result<Vec<Scan>, DatabaseError> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {SCAN_COLUMNS} FROM scans
         WHERE doctor_confirmed = 1
           AND (doctor_corrected_diagnosis IS NOT NULL OR prediction_condition IS NOT NULL)
         ORDER BY upload_date ASC"
    ))?;
    let rows = stmt.query_map([], scan_row)?;
    collect_scans(rows)
}

/// Apply a partial update. Assessor fields are written only when supplied.
///
/// Prediction fields of an assessed scan feed its training label, so they
/// change only together with an assessor; otherwise the update is a `Conflict`.
pub fn update_scan(
    conn: &Connection,
    id: &Uuid,
    update: &ScanUpdate,
    assessor: Option<&Assessor>,
) -> Result<Scan, DatabaseError> {
    if assessor.is_none() && update.changes_prediction() {
        let existing = get_scan(conn, id)?.ok_or_else(|| not_found(id))?;
        if existing.is_assessed() {
            return Err(DatabaseError::Conflict(format!(
                "Scan {id} has been assessed; its prediction can only change with a doctor's review"
            )));
        }
    }

    let rows = conn.execute(
        "UPDATE scans SET
            prediction_condition = COALESCE(?2, prediction_condition),
            prediction_confidence = COALESCE(?3, prediction_confidence),
            doctor_notes = CASE WHEN ?4 THEN ?5 ELSE doctor_notes END,
            doctor_confirmed = CASE WHEN ?6 THEN ?7 ELSE doctor_confirmed END,
            doctor_corrected_diagnosis = CASE WHEN ?8 THEN ?9 ELSE doctor_corrected_diagnosis END,
            assessed_by = COALESCE(?10, assessed_by),
            assessed_date = COALESCE(?11, assessed_date)
         WHERE id = ?1",
        params![
            id.to_string(),
            update.prediction_condition.map(|c| c.as_str()),
            update.prediction_confidence,
            update.doctor_notes.is_some(),
            update.doctor_notes.as_ref().and_then(|n| n.as_deref()),
            update.doctor_confirmed.is_some(),
            update.doctor_confirmed.flatten(),
            update.doctor_corrected_diagnosis.is_some(),
            update.doctor_corrected_diagnosis.flatten().map(|c| c.as_str()),
            assessor.map(|a| a.username.as_str()),
            assessor.map(|a| a.at.to_rfc3339()),
        ],
    )?;
    if rows == 0 {
        return Err(not_found(id));
    }
    get_scan(conn, id)?.ok_or_else(|| not_found(id))
}

/// Delete a scan and return the removed record.
pub fn delete_scan(conn: &Connection, id: &Uuid) -> Result<Scan, DatabaseError> {
    let existing = get_scan(conn, id)?.ok_or_else(|| not_found(id))?;
    conn.execute("DELETE FROM scans WHERE id = ?1", params![id.to_string()])?;
    Ok(existing)
}

fn not_found(id: &Uuid) -> DatabaseError {
    DatabaseError::NotFound {
        entity_type: "Scan".into(),
        id: id.to_string(),
    }
}

struct ScanRow {
    id: String,
    patient_id: String,
    image_url: String,
    upload_date: String,
    prediction_condition: Option<String>,
    prediction_confidence: Option<f32>,
    doctor_notes: Option<String>,
    doctor_confirmed: Option<bool>,
    doctor_corrected_diagnosis: Option<String>,
    assessed_by: Option<String>,
    assessed_date: Option<String>,
}

fn scan_row(row: &Row<'_>) -> rusqlite::Result<ScanRow> {
    Ok(ScanRow {
        id: row.get(0)?,
        patient_id: row.get(1)?,
        image_url: row.get(2)?,
        upload_date: row.get(3)?,
        prediction_condition: row.get(4)?,
        prediction_confidence: row.get(5)?,
        doctor_notes: row.get(6)?,
        doctor_confirmed: row.get(7)?,
        doctor_corrected_diagnosis: row.get(8)?,
        assessed_by: row.get(9)?,
        assessed_date: row.get(10)?,
    })
}

fn collect_scans(
    rows: impl Iterator<Item = rusqlite::Result<ScanRow>>,
) -> Result<Vec<Scan>, DatabaseError> {
    let mut scans = Vec::new();
    for row in rows {
        scans.push(scan_from_row(row?)?);
    }
    Ok(scans)
}

fn scan_from_row(row: ScanRow) -> Result<Scan, DatabaseError> {
    Ok(Scan {
        id: Uuid::parse_str(&row.id).map_err(|e| DatabaseError::ConstraintViolation(e.to_string()))?,
        patient_id: row.patient_id,
        image_url: row.image_url,
        upload_date: parse_timestamp("upload_date", &row.upload_date)?,
        prediction_condition: row.prediction_condition,
        prediction_confidence: row.prediction_confidence,
        doctor_notes: row.doctor_notes,
        doctor_confirmed: row.doctor_confirmed,
        doctor_corrected_diagnosis: row.doctor_corrected_diagnosis,
        assessed_by: row.assessed_by,
        assessed_date: row
            .assessed_date
            .as_deref()
            .map(|d| parse_timestamp("assessed_date", d))
            .transpose()?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::sqlite::open_memory_database;
    use chrono::{Duration, Utc};

    fn make_scan(patient: &str, url: &str) -> Scan {
        Scan {
            id: Uuid::new_v4(),
            patient_id: patient.into(),
            image_url: url.into(),
            upload_date: Utc::now(),
            prediction_condition: Some("Drusen".into()),
            prediction_confidence: Some(0.91),
            doctor_notes: None,
            doctor_confirmed: None,
            doctor_corrected_diagnosis: None,
            assessed_by: None,
            assessed_date: None,
        }
    }

    #[test]
    fn insert_and_get_scan() {
        let conn = open_memory_database().unwrap();
        let scan = make_scan("p-1", "uploads/a.png");
        insert_scan(&conn, &scan).unwrap();

        let loaded = get_scan(&conn, &scan.id).unwrap().unwrap();
        assert_eq!(loaded.patient_id, "p-1");
        assert_eq!(loaded.prediction_condition.as_deref(), Some("Drusen"));
        assert_eq!(loaded.doctor_confirmed, None);
        assert_eq!(
            loaded.upload_date.timestamp_micros(),
            scan.upload_date.timestamp_micros()
        );
    }

    #[test]
    fn get_missing_scan_is_none() {
        let conn = open_memory_database().unwrap();
        assert!(get_scan(&conn, &Uuid::new_v4()).unwrap().is_none());
    }

    #[test]
    fn duplicate_image_url_is_conflict() {
        let conn = open_memory_database().unwrap();
        insert_scan(&conn, &make_scan("p-1", "uploads/a.png")).unwrap();
        let result = insert_scan(&conn, &make_scan("p-2", "uploads/a.png"));
        assert!(matches!(result, Err(DatabaseError::Conflict(_))));
    }

    #[test]
    fn list_by_patient_filters_and_orders() {
        let conn = open_memory_database().unwrap();
        let mut older = make_scan("p-1", "uploads/old.png");
        older.upload_date = Utc::now() - Duration::days(2);
        let newer = make_scan("p-1", "uploads/new.png");
        insert_scan(&conn, &older).unwrap();
        insert_scan(&conn, &newer).unwrap();
        insert_scan(&conn, &make_scan("p-2", "uploads/other.png")).unwrap();

        let scans = list_scans_by_patient(&conn, "p-1").unwrap();
        assert_eq!(scans.len(), 2);
        assert_eq!(scans[0].id, newer.id);
        assert_eq!(list_scans(&conn).unwrap().len(), 3);
    }

    #[test]
    fn partial_update_keeps_unset_fields() {
        let conn = open_memory_database().unwrap();
        let scan = make_scan("p-1", "uploads/a.png");
        insert_scan(&conn, &scan).unwrap();

        let assessor = Assessor {
            username: "dr_house".into(),
            at: Utc::now(),
        };
        let update = ScanUpdate {
            doctor_confirmed: Some(Some(true)),
            doctor_corrected_diagnosis: Some(Some(Condition::Normal)),
            ..Default::default()
        };
        let updated = update_scan(&conn, &scan.id, &update, Some(&assessor)).unwrap();
        assert_eq!(updated.doctor_confirmed, Some(true));
        assert_eq!(updated.doctor_corrected_diagnosis.as_deref(), Some("Normal"));
        assert_eq!(updated.prediction_condition.as_deref(), Some("Drusen"));
        assert_eq!(updated.assessed_by.as_deref(), Some("dr_house"));
        assert!(updated.assessed_date.is_some());

        let notes_only = ScanUpdate {
            doctor_notes: Some(Some("follow up in 3 months".into())),
            ..Default::default()
        };
        let updated = update_scan(&conn, &scan.id, &notes_only, None).unwrap();
        assert_eq!(updated.doctor_confirmed, Some(true));
        assert_eq!(updated.doctor_notes.as_deref(), Some("follow up in 3 months"));
    }

    #[test]
    fn null_assessment_fields_are_cleared() {
        let conn = open_memory_database().unwrap();
        let scan = make_scan("p-1", "uploads/a.png");
        insert_scan(&conn, &scan).unwrap();
        let assessor = Assessor {
            username: "dr_house".into(),
            at: Utc::now(),
        };

        let confirm = ScanUpdate {
            doctor_confirmed: Some(Some(true)),
            doctor_corrected_diagnosis: Some(Some(Condition::Normal)),
            doctor_notes: Some(Some("wrong eye".into())),
            ..Default::default()
        };
        update_scan(&conn, &scan.id, &confirm, Some(&assessor)).unwrap();

        let withdraw = ScanUpdate {
            doctor_corrected_diagnosis: Some(None),
            doctor_notes: Some(None),
            ..Default::default()
        };
        let updated = update_scan(&conn, &scan.id, &withdraw, Some(&assessor)).unwrap();
        assert_eq!(updated.doctor_corrected_diagnosis, None);
        assert_eq!(updated.doctor_notes, None);
        assert_eq!(updated.doctor_confirmed, Some(true));
        assert_eq!(updated.training_label(), Some("Drusen"));

        let unset = ScanUpdate {
            doctor_confirmed: Some(None),
            ..Default::default()
        };
        let updated = update_scan(&conn, &scan.id, &unset, Some(&assessor)).unwrap();
        assert_eq!(updated.doctor_confirmed, None);
        assert!(list_training_eligible_scans(&conn).unwrap().is_empty());
    }

    #[test]
    fn assessed_prediction_needs_assessor() {
        let conn = open_memory_database().unwrap();
        let scan = make_scan("p-1", "uploads/a.png");
        insert_scan(&conn, &scan).unwrap();

        let relabel = ScanUpdate {
            prediction_condition: Some(Condition::Normal),
            ..Default::default()
        };
        // Before review the prediction is open to any actor.
        update_scan(&conn, &scan.id, &relabel, None).unwrap();

        let assessor = Assessor {
            username: "dr_house".into(),
            at: Utc::now(),
        };
        let confirm = ScanUpdate {
            doctor_confirmed: Some(Some(true)),
            ..Default::default()
        };
        update_scan(&conn, &scan.id, &confirm, Some(&assessor)).unwrap();

        let drusen = ScanUpdate {
            prediction_condition: Some(Condition::Drusen),
            ..Default::default()
        };
        let result = update_scan(&conn, &scan.id, &drusen, None);
        assert!(matches!(result, Err(DatabaseError::Conflict(_))));
        let stored = get_scan(&conn, &scan.id).unwrap().unwrap();
        assert_eq!(stored.training_label(), Some("Normal"));

        let updated = update_scan(&conn, &scan.id, &drusen, Some(&assessor)).unwrap();
        assert_eq!(updated.training_label(), Some("Drusen"));
    }

    #[test]
    fn update_missing_scan_is_not_found() {
        let conn = open_memory_database().unwrap();
        let result = update_scan(&conn, &Uuid::new_v4(), &ScanUpdate::default(), None);
        assert!(matches!(result, Err(DatabaseError::NotFound { .. })));
    }

    #[test]
    fn eligibility_filter_over_mixed_scans() {
        let conn = open_memory_database().unwrap();

        let mut confirmed_predicted = make_scan("p", "uploads/1.png");
        confirmed_predicted.doctor_confirmed = Some(true);

        let mut confirmed_corrected = make_scan("p", "uploads/2.png");
        confirmed_corrected.doctor_confirmed = Some(true);
        confirmed_corrected.prediction_condition = None;
        confirmed_corrected.doctor_corrected_diagnosis = Some("Normal".into());

        let mut rejected = make_scan("p", "uploads/3.png");
        rejected.doctor_confirmed = Some(false);

        let unreviewed = make_scan("p", "uploads/4.png");

        let mut confirmed_unlabeled = make_scan("p", "uploads/5.png");
        confirmed_unlabeled.doctor_confirmed = Some(true);
        confirmed_unlabeled.prediction_condition = None;

        for scan in [
            &confirmed_predicted,
            &confirmed_corrected,
            &rejected,
            &unreviewed,
            &confirmed_unlabeled,
        ] {
            insert_scan(&conn, scan).unwrap();
        }

        let eligible: Vec<Uuid> = list_training_eligible_scans(&conn)
            .unwrap()
            .into_iter()
            .map(|s| s.id)
            .collect();
        assert_eq!(eligible.len(), 2);
        assert!(eligible.contains(&confirmed_predicted.id));
        assert!(eligible.contains(&confirmed_corrected.id));
    }

    #[test]
    fn delete_returns_removed_scan() {
        let conn = open_memory_database().unwrap();
        let scan = make_scan("p-1", "uploads/a.png");
        insert_scan(&conn, &scan).unwrap();

        let removed = delete_scan(&conn, &scan.id).unwrap();
        assert_eq!(removed.id, scan.id);
        assert!(get_scan(&conn, &scan.id).unwrap().is_none());
        assert!(matches!(
            delete_scan(&conn, &scan.id),
            Err(DatabaseError::NotFound { .. })
        ));
    }
}
