use sqlx::{postgres::PgRow, PgPool, Row};

use crate::models::registry::{RegistryRecord, StoredRegistryRecord};
use crate::services::cnpj::mask_cnpj;

/// Insert or fully replace the registry row for a CNPJ
pub async fn upsert_registry_record(
    pool: &PgPool,
    cnpj: &str,
    record: &RegistryRecord,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        INSERT INTO registry_records (
            cnpj, state_registration, legal_name, taxpayer, trade_name, address,
            main_activity, auxiliary_unit, usage_condition, contract_end_date,
            tax_regime, registration_status, registration_status_date,
            registration_date, nfe_operations, notes, updated_on, consulted_on
        )
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17, $18)
        ON CONFLICT (cnpj) DO UPDATE SET
            state_registration = EXCLUDED.state_registration,
            legal_name = EXCLUDED.legal_name,
            taxpayer = EXCLUDED.taxpayer,
            trade_name = EXCLUDED.trade_name,
            address = EXCLUDED.address,
            main_activity = EXCLUDED.main_activity,
            auxiliary_unit = EXCLUDED.auxiliary_unit,
            usage_condition = EXCLUDED.usage_condition,
            contract_end_date = EXCLUDED.contract_end_date,
            tax_regime = EXCLUDED.tax_regime,
            registration_status = EXCLUDED.registration_status,
            registration_status_date = EXCLUDED.registration_status_date,
            registration_date = EXCLUDED.registration_date,
            nfe_operations = EXCLUDED.nfe_operations,
            notes = EXCLUDED.notes,
            updated_on = EXCLUDED.updated_on,
            consulted_on = EXCLUDED.consulted_on,
            updated_at = NOW()
        "#,
    )
    .bind(cnpj)
    .bind(&record.state_registration)
    .bind(&record.legal_name)
    .bind(&record.taxpayer)
    .bind(&record.trade_name)
    .bind(&record.address)
    .bind(&record.main_activity)
    .bind(&record.auxiliary_unit)
    .bind(&record.usage_condition)
    .bind(&record.contract_end_date)
    .bind(&record.tax_regime)
    .bind(&record.registration_status)
    .bind(&record.registration_status_date)
    .bind(&record.registration_date)
    .bind(&record.nfe_operations)
    .bind(&record.notes)
    .bind(&record.updated_on)
    .bind(&record.consulted_on)
    .execute(pool)
    .await?;

    Ok(())
}

/// Get the registry rows for a set of CNPJs
pub async fn get_registry_records(
    pool: &PgPool,
    cnpjs: &[String],
) -> Result<Vec<StoredRegistryRecord>, sqlx::Error> {
    if cnpjs.is_empty() {
        return Ok(Vec::new());
    }

    let rows = sqlx::query(
        r#"
        SELECT cnpj, state_registration, legal_name, taxpayer, trade_name, address,
               main_activity, auxiliary_unit, usage_condition, contract_end_date,
               tax_regime, registration_status, registration_status_date,
               registration_date, nfe_operations, notes, updated_on, consulted_on,
               created_at, updated_at
        FROM registry_records
        WHERE cnpj = ANY($1)
        "#,
    )
    .bind(cnpjs)
    .fetch_all(pool)
    .await?;

    rows.iter().map(row_to_record).collect()
}

fn row_to_record(r: &PgRow) -> Result<StoredRegistryRecord, sqlx::Error> {
    let subject: String = r.try_get("cnpj")?;
    Ok(StoredRegistryRecord {
        record: RegistryRecord {
            cnpj: Some(mask_cnpj(&subject)),
            state_registration: r.try_get("state_registration")?,
            legal_name: r.try_get("legal_name")?,
            taxpayer: r.try_get("taxpayer")?,
            trade_name: r.try_get("trade_name")?,
            address: r.try_get("address")?,
            main_activity: r.try_get("main_activity")?,
            auxiliary_unit: r.try_get("auxiliary_unit")?,
            usage_condition: r.try_get("usage_condition")?,
            contract_end_date: r.try_get("contract_end_date")?,
            tax_regime: r.try_get("tax_regime")?,
            registration_status: r.try_get("registration_status")?,
            registration_status_date: r.try_get("registration_status_date")?,
            registration_date: r.try_get("registration_date")?,
            nfe_operations: r.try_get("nfe_operations")?,
            notes: r.try_get("notes")?,
            updated_on: r.try_get("updated_on")?,
            consulted_on: r.try_get("consulted_on")?,
        },
        subject,
        created_at: r.try_get("created_at")?,
        updated_at: r.try_get("updated_at")?,
    })
}
