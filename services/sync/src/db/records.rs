//! Postgres-backed VM record store.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{postgres::PgPool, postgres::PgRow, Row};
use tracing::debug;
use vmsync_inventory::{PowerState, VmIdentity, VmRecord, VmUuid};

use super::{RecordStore, StoreError};

const SELECT_COLUMNS: &str = r#"
    SELECT uuid, name, host_address, hostname, address, power_state,
           tools_status, orphan, orphan_since, last_sync_time
    FROM vm_records
"#;

#[derive(Debug)]
struct VmRow {
    uuid: Option<String>,
    name: String,
    host_address: String,
    hostname: Option<String>,
    address: Option<String>,
    power_state: String,
    tools_status: String,
    orphan: bool,
    orphan_since: Option<DateTime<Utc>>,
    last_sync_time: DateTime<Utc>,
}

impl<'r> sqlx::FromRow<'r, PgRow> for VmRow {
    fn from_row(row: &'r PgRow) -> Result<Self, sqlx::Error> {
        Ok(Self {
            uuid: row.try_get("uuid")?,
            name: row.try_get("name")?,
            host_address: row.try_get("host_address")?,
            hostname: row.try_get("hostname")?,
            address: row.try_get("address")?,
            power_state: row.try_get("power_state")?,
            tools_status: row.try_get("tools_status")?,
            orphan: row.try_get("orphan")?,
            orphan_since: row.try_get("orphan_since")?,
            last_sync_time: row.try_get("last_sync_time")?,
        })
    }
}

impl TryFrom<VmRow> for VmRecord {
    type Error = StoreError;

    fn try_from(row: VmRow) -> Result<Self, Self::Error> {
        let uuid = row
            .uuid
            .as_deref()
            .map(VmUuid::parse)
            .transpose()
            .map_err(|e| StoreError::Decode(format!("vm '{}': {e}", row.name)))?;

        Ok(VmRecord {
            uuid,
            name: row.name,
            host_address: row.host_address,
            hostname: row.hostname,
            address: row.address,
            power_state: PowerState::from_observed(&row.power_state),
            tools_status: row.tools_status,
            orphan: row.orphan,
            orphan_since: row.orphan_since,
            last_sync_time: row.last_sync_time,
        })
    }
}

/// VM records in the `vm_records` table.
#[derive(Clone)]
pub struct PgRecordStore {
    pool: PgPool,
}

impl PgRecordStore {
    /// Create a new record store.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl RecordStore for PgRecordStore {
    async fn get(&self, identity: &VmIdentity) -> Result<Option<VmRecord>, StoreError> {
        let row = match identity {
            VmIdentity::Uuid(uuid) => {
                sqlx::query_as::<_, VmRow>(&format!("{SELECT_COLUMNS} WHERE uuid = $1"))
                    .bind(uuid.as_str())
                    .fetch_optional(&self.pool)
                    .await
            }
            VmIdentity::Name(name) => {
                sqlx::query_as::<_, VmRow>(&format!(
                    "{SELECT_COLUMNS} WHERE uuid IS NULL AND name = $1 ORDER BY id LIMIT 1"
                ))
                .bind(name)
                .fetch_optional(&self.pool)
                .await
            }
        }
        .map_err(StoreError::Query)?;

        row.map(VmRecord::try_from).transpose()
    }

    async fn create(&self, record: &VmRecord) -> Result<(), StoreError> {
        let identity = record.validate()?;

        if self.get(&identity).await?.is_some() {
            return Err(StoreError::Duplicate(identity.to_string()));
        }

        let result = sqlx::query(
            r#"
            INSERT INTO vm_records (
                uuid, name, host_address, hostname, address, power_state,
                tools_status, orphan, orphan_since, last_sync_time
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            ON CONFLICT DO NOTHING
            "#,
        )
        .bind(record.uuid.as_ref().map(VmUuid::as_str))
        .bind(&record.name)
        .bind(&record.host_address)
        .bind(&record.hostname)
        .bind(&record.address)
        .bind(record.power_state.as_str())
        .bind(&record.tools_status)
        .bind(record.orphan)
        .bind(record.orphan_since)
        .bind(record.last_sync_time)
        .execute(&self.pool)
        .await
        .map_err(StoreError::Query)?;

        if result.rows_affected() == 0 {
            return Err(StoreError::Duplicate(identity.to_string()));
        }

        debug!(identity = %identity, "Inserted VM record");
        Ok(())
    }

    async fn update(&self, record: &VmRecord) -> Result<(), StoreError> {
        let identity = record.validate()?;

        let (filter, key) = match &identity {
            VmIdentity::Uuid(uuid) => ("uuid = $1", uuid.as_str()),
            VmIdentity::Name(name) => ("uuid IS NULL AND name = $1", name.as_str()),
        };

        let result = sqlx::query(&format!(
            r#"
            UPDATE vm_records
            SET name = $2,
                host_address = $3,
                hostname = $4,
                address = $5,
                power_state = $6,
                tools_status = $7,
                orphan = $8,
                orphan_since = $9,
                last_sync_time = $10
            WHERE {filter}
            "#
        ))
        .bind(key)
        .bind(&record.name)
        .bind(&record.host_address)
        .bind(&record.hostname)
        .bind(&record.address)
        .bind(record.power_state.as_str())
        .bind(&record.tools_status)
        .bind(record.orphan)
        .bind(record.orphan_since)
        .bind(record.last_sync_time)
        .execute(&self.pool)
        .await
        .map_err(StoreError::Query)?;

        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound(identity.to_string()));
        }

        Ok(())
    }

    async fn query_by_host(&self, host_address: &str) -> Result<Vec<VmRecord>, StoreError> {
        if host_address.is_empty() {
            return Ok(Vec::new());
        }

        let rows = sqlx::query_as::<_, VmRow>(&format!(
            "{SELECT_COLUMNS} WHERE host_address = $1 ORDER BY id"
        ))
        .bind(host_address)
        .fetch_all(&self.pool)
        .await
        .map_err(StoreError::Query)?;

        rows.into_iter().map(VmRecord::try_from).collect()
    }
}
