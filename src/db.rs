use anyhow::Context;
use sqlx::{PgPool, Row};
use uuid::Uuid;

use crate::models::{AccessLevel, AlertEvent, Contact, Patient, Reading};
use crate::roster::RosterEntry;

pub async fn init_db(pool: &PgPool) -> anyhow::Result<()> {
    sqlx::migrate!("./migrations").run(pool).await?;
    Ok(())
}

pub async fn seed(pool: &PgPool) -> anyhow::Result<()> {
    let patients = vec![
        (
            Uuid::parse_str("6f1c2a0e-5b1d-4c8e-9a57-1e0f3b7d2c41")?,
            "Emma Johnson",
        ),
        (
            Uuid::parse_str("a3d94e17-0c6b-4f2a-8e13-52b7c9f0d6e8")?,
            "Jacob Smith",
        ),
        (
            Uuid::parse_str("c8b0f5d2-7e49-4a1c-b6f3-09d2e8a47b15")?,
            "Olivia Brown",
        ),
    ];

    for (id, name) in &patients {
        upsert_patient(pool, &Patient::new(*id, *name)).await?;
    }

    let contacts = vec![
        (
            "0b6e4a5c-1f3d-4e8a-9c27-7d5b1e0f2a36",
            0,
            "Lisa Mom",
            "Primary caregiver",
            AccessLevel::Full,
        ),
        (
            "5d2f8c1a-6b4e-4f09-a3d7-8e1c0b5f9a24",
            0,
            "John Dad",
            "Secondary caregiver",
            AccessLevel::Full,
        ),
        (
            "9e7a3b6d-2c5f-4d18-b0e4-1f6a8c3d5e72",
            0,
            "Emma Sister, 17",
            "Family member",
            AccessLevel::High,
        ),
        (
            "e4c1d8f7-3a2b-4c6e-9f05-6b8d2a1e7c93",
            0,
            "James Friend",
            "Emergency contact",
            AccessLevel::Low,
        ),
        (
            "2a9f6e3c-8d1b-4e7a-b5c2-4f0d9e6a3b18",
            1,
            "Sarah Caregiver",
            "Professional caregiver",
            AccessLevel::Full,
        ),
        (
            "7c3e0a9d-4f6b-4b2e-8d1a-3e5c7f9b0d46",
            2,
            "Sarah Caregiver",
            "Professional caregiver",
            AccessLevel::Full,
        ),
    ];

    for (id, patient_index, name, role, access_level) in contacts {
        let patient_id = patients
            .get(patient_index)
            .map(|(id, _)| *id)
            .context("seed contact references a missing patient")?;
        let contact = Contact {
            id: Uuid::parse_str(id)?,
            patient_id,
            caregiver_id: Uuid::new_v4(),
            name: name.to_string(),
            role: role.to_string(),
            access_level,
        };
        upsert_contact(pool, &contact).await?;
    }

    Ok(())
}

pub async fn upsert_patient(pool: &PgPool, patient: &Patient) -> anyhow::Result<()> {
    sqlx::query(
        r#"
        INSERT INTO glywatch.patients (id, full_name)
        VALUES ($1, $2)
        ON CONFLICT (id) DO UPDATE SET full_name = EXCLUDED.full_name
        "#,
    )
    .bind(patient.id)
    .bind(&patient.name)
    .execute(pool)
    .await?;
    Ok(())
}

pub async fn upsert_contact(pool: &PgPool, contact: &Contact) -> anyhow::Result<()> {
    sqlx::query(
        r#"
        INSERT INTO glywatch.contacts
        (id, patient_id, caregiver_id, full_name, role, access_level)
        VALUES ($1, $2, $3, $4, $5, $6)
        ON CONFLICT (id) DO UPDATE
        SET full_name = EXCLUDED.full_name,
            role = EXCLUDED.role,
            access_level = EXCLUDED.access_level
        "#,
    )
    .bind(contact.id)
    .bind(contact.patient_id)
    .bind(contact.caregiver_id)
    .bind(&contact.name)
    .bind(&contact.role)
    .bind(contact.access_level.as_str())
    .execute(pool)
    .await?;
    Ok(())
}

pub async fn delete_contact(pool: &PgPool, contact_id: Uuid) -> anyhow::Result<()> {
    sqlx::query("DELETE FROM glywatch.contacts WHERE id = $1")
        .bind(contact_id)
        .execute(pool)
        .await?;
    Ok(())
}

pub async fn record_reading(pool: &PgPool, reading: &Reading) -> anyhow::Result<()> {
    sqlx::query(
        r#"
        INSERT INTO glywatch.readings (patient_id, value_mg_dl, captured_at)
        VALUES ($1, $2, $3)
        "#,
    )
    .bind(reading.patient_id)
    .bind(reading.value)
    .bind(reading.captured_at)
    .execute(pool)
    .await?;
    Ok(())
}

pub async fn record_alert(pool: &PgPool, alert: &AlertEvent) -> anyhow::Result<()> {
    sqlx::query(
        r#"
        INSERT INTO glywatch.alerts
        (id, patient_id, kind, severity, state, description, occurrences,
         acknowledged_by, delivery_incomplete, created_at, updated_at, resolved_at)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
        ON CONFLICT (id) DO UPDATE
        SET severity = EXCLUDED.severity,
            state = EXCLUDED.state,
            description = EXCLUDED.description,
            occurrences = EXCLUDED.occurrences,
            acknowledged_by = EXCLUDED.acknowledged_by,
            delivery_incomplete = EXCLUDED.delivery_incomplete,
            updated_at = EXCLUDED.updated_at,
            resolved_at = EXCLUDED.resolved_at
        WHERE glywatch.alerts.updated_at <= EXCLUDED.updated_at
        "#,
    )
    .bind(alert.id)
    .bind(alert.patient_id)
    .bind(alert.kind.as_str())
    .bind(alert.severity.to_string())
    .bind(alert.state.as_str())
    .bind(&alert.description)
    .bind(alert.occurrences as i32)
    .bind(alert.acknowledged_by)
    .bind(alert.delivery_incomplete)
    .bind(alert.created_at)
    .bind(alert.updated_at)
    .bind(alert.resolved_at)
    .execute(pool)
    .await?;
    Ok(())
}

pub async fn fetch_roster(pool: &PgPool) -> anyhow::Result<Vec<RosterEntry>> {
    let rows = sqlx::query(
        "SELECT p.id AS patient_id, p.full_name AS patient_name, \
         c.id AS contact_id, c.caregiver_id, c.full_name AS contact_name, c.role, c.access_level \
         FROM glywatch.contacts c \
         JOIN glywatch.patients p ON p.id = c.patient_id \
         ORDER BY p.full_name, p.id, c.full_name",
    )
    .fetch_all(pool)
    .await?;

    let mut entries = Vec::with_capacity(rows.len());
    for row in rows {
        let access_level: String = row.get("access_level");
        entries.push(RosterEntry {
            patient_id: Some(row.get("patient_id")),
            patient_name: row.get("patient_name"),
            contact_id: Some(row.get("contact_id")),
            contact_name: row.get("contact_name"),
            caregiver_id: Some(row.get("caregiver_id")),
            role: row.get("role"),
            access_level: access_level
                .parse()
                .map_err(|e: String| anyhow::anyhow!(e))?,
        });
    }

    Ok(entries)
}
