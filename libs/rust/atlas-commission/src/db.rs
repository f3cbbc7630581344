//! Postgres persistence and mutating operations
//!
//! `Database` wraps the pool and exposes the engine's mutating surface.
//! Consistency rules hold at this boundary: illegal settlement transitions
//! and writes into frozen settlements are rejected with no partial
//! mutation, and every state change writes exactly one audit entry.
//!
//! The schema is applied through idempotent `CREATE TABLE IF NOT EXISTS`
//! statements at startup.

use atlas_core::{Cents, Month};
use chrono::{DateTime, NaiveDate, Utc};
use sqlx::postgres::PgPool;
use sqlx::FromRow;
use std::collections::{HashMap, HashSet};
use tracing::{debug, info};

use crate::error::CommissionError;
use crate::import::{plan_import, ImportCounters};
use crate::matcher::{is_auto_matchable, match_commission, ContractIndex, MappingIndex};
use crate::model::{
    AuditEntry, Commission, CommissionKind, CommissionModel, Contract, ContractOrigin,
    ContractStatus, Employee, EmployeeRole, ImportBatch, ImportSourceType, IntermediaryMapping,
    MatchStatus, Settlement, SettlementStatus, Shares, TlBasis,
};
use crate::settlement::{
    build_settlements, check_transition, plan_regeneration, RegenerateAction,
};
use crate::sheet::{SheetParseResult, SheetRow};
use crate::splitter::{affected_commissions, compute_shares, months_from, RecalcSummary};
use crate::xempus::XempusParseResult;

/// Database connection pool wrapper
#[derive(Clone)]
pub struct Database {
    pool: PgPool,
}

const MIGRATIONS: &[&str] = &[
    "CREATE TABLE IF NOT EXISTS commission_models (
        id BIGSERIAL PRIMARY KEY,
        name VARCHAR(100) NOT NULL,
        commission_rate DOUBLE PRECISION NOT NULL,
        tl_rate DOUBLE PRECISION,
        tl_basis VARCHAR(20),
        effective_from DATE NOT NULL,
        active BOOLEAN NOT NULL DEFAULT TRUE
    )",
    "CREATE INDEX IF NOT EXISTS idx_models_name ON commission_models(name)",
    "CREATE TABLE IF NOT EXISTS employees (
        id BIGSERIAL PRIMARY KEY,
        user_id BIGINT,
        name VARCHAR(200) NOT NULL,
        role VARCHAR(20) NOT NULL DEFAULT 'consultant',
        commission_model_id BIGINT REFERENCES commission_models(id),
        commission_rate_override DOUBLE PRECISION,
        tl_override_rate DOUBLE PRECISION,
        tl_override_basis VARCHAR(20),
        teamleiter_id BIGINT REFERENCES employees(id),
        is_active BOOLEAN NOT NULL DEFAULT TRUE
    )",
    "CREATE TABLE IF NOT EXISTS contracts (
        id BIGSERIAL PRIMARY KEY,
        vsnr VARCHAR(100) NOT NULL,
        vsnr_normalized VARCHAR(100) NOT NULL,
        carrier VARCHAR(100),
        policyholder VARCHAR(200),
        branch VARCHAR(100),
        premium BIGINT,
        inception DATE,
        consultant_id BIGINT REFERENCES employees(id),
        status VARCHAR(20) NOT NULL DEFAULT 'offen',
        source VARCHAR(20) NOT NULL DEFAULT 'manuell',
        xempus_id VARCHAR(100),
        provision_count BIGINT NOT NULL DEFAULT 0,
        provision_sum BIGINT NOT NULL DEFAULT 0
    )",
    "CREATE INDEX IF NOT EXISTS idx_contracts_vsnr_normalized ON contracts(vsnr_normalized)",
    "CREATE UNIQUE INDEX IF NOT EXISTS idx_contracts_xempus_id ON contracts(xempus_id) WHERE xempus_id IS NOT NULL",
    "CREATE TABLE IF NOT EXISTS import_batches (
        id BIGSERIAL PRIMARY KEY,
        source_type VARCHAR(20) NOT NULL,
        carrier VARCHAR(100),
        filename VARCHAR(300) NOT NULL,
        sheet VARCHAR(100),
        total_rows BIGINT NOT NULL DEFAULT 0,
        imported_rows BIGINT NOT NULL DEFAULT 0,
        matched_rows BIGINT NOT NULL DEFAULT 0,
        skipped_rows BIGINT NOT NULL DEFAULT 0,
        error_rows BIGINT NOT NULL DEFAULT 0,
        importer VARCHAR(200),
        created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
        file_sha256 VARCHAR(64)
    )",
    "CREATE TABLE IF NOT EXISTS commissions (
        id BIGSERIAL PRIMARY KEY,
        contract_id BIGINT REFERENCES contracts(id),
        vsnr VARCHAR(100) NOT NULL,
        vsnr_normalized VARCHAR(100) NOT NULL,
        amount BIGINT NOT NULL,
        kind VARCHAR(20) NOT NULL,
        payout_date DATE,
        carrier VARCHAR(100) NOT NULL,
        policyholder VARCHAR(200),
        intermediary_name VARCHAR(200),
        consultant_id BIGINT REFERENCES employees(id),
        match_status VARCHAR(20) NOT NULL DEFAULT 'unmatched',
        match_confidence DOUBLE PRECISION,
        consultant_share BIGINT,
        tl_share BIGINT,
        house_share BIGINT,
        batch_id BIGINT REFERENCES import_batches(id),
        booking_code_raw VARCHAR(50),
        conditions_code VARCHAR(20),
        commission_rate DOUBLE PRECISION,
        is_relevant BOOLEAN NOT NULL DEFAULT TRUE,
        row_hash VARCHAR(64) NOT NULL,
        source_row BIGINT,
        override_amount BIGINT,
        override_reason TEXT,
        note TEXT
    )",
    "CREATE UNIQUE INDEX IF NOT EXISTS idx_commissions_carrier_row_hash ON commissions(carrier, row_hash)",
    "CREATE INDEX IF NOT EXISTS idx_commissions_payout_date ON commissions(payout_date)",
    "CREATE INDEX IF NOT EXISTS idx_commissions_consultant ON commissions(consultant_id)",
    "CREATE TABLE IF NOT EXISTS intermediary_mappings (
        id BIGSERIAL PRIMARY KEY,
        name VARCHAR(200) NOT NULL,
        name_normalized VARCHAR(200) NOT NULL,
        employee_id BIGINT NOT NULL REFERENCES employees(id)
    )",
    "CREATE UNIQUE INDEX IF NOT EXISTS idx_mappings_name_normalized ON intermediary_mappings(name_normalized)",
    "CREATE TABLE IF NOT EXISTS settlements (
        id BIGSERIAL PRIMARY KEY,
        month VARCHAR(7) NOT NULL,
        employee_id BIGINT NOT NULL REFERENCES employees(id),
        revision INT NOT NULL DEFAULT 1,
        gross BIGINT NOT NULL DEFAULT 0,
        tl_deduction BIGINT NOT NULL DEFAULT 0,
        net BIGINT NOT NULL DEFAULT 0,
        chargebacks BIGINT NOT NULL DEFAULT 0,
        payout BIGINT NOT NULL DEFAULT 0,
        positions BIGINT NOT NULL DEFAULT 0,
        status VARCHAR(20) NOT NULL DEFAULT 'draft',
        is_locked BOOLEAN NOT NULL DEFAULT FALSE,
        is_regenerated_after_release BOOLEAN NOT NULL DEFAULT FALSE
    )",
    "CREATE UNIQUE INDEX IF NOT EXISTS idx_settlements_month_employee_revision ON settlements(month, employee_id, revision)",
    "CREATE TABLE IF NOT EXISTS audit_log (
        id BIGSERIAL PRIMARY KEY,
        entity_type VARCHAR(50) NOT NULL,
        entity_id BIGINT NOT NULL,
        action VARCHAR(50) NOT NULL,
        actor VARCHAR(200) NOT NULL,
        created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
        diff_json JSONB
    )",
    "CREATE INDEX IF NOT EXISTS idx_audit_entity ON audit_log(entity_type, entity_id)",
];

#[derive(Debug, FromRow)]
struct CommissionRow {
    id: i64,
    contract_id: Option<i64>,
    vsnr: String,
    vsnr_normalized: String,
    amount: i64,
    kind: String,
    payout_date: Option<NaiveDate>,
    carrier: String,
    policyholder: Option<String>,
    intermediary_name: Option<String>,
    consultant_id: Option<i64>,
    match_status: String,
    match_confidence: Option<f64>,
    consultant_share: Option<i64>,
    tl_share: Option<i64>,
    house_share: Option<i64>,
    batch_id: Option<i64>,
    booking_code_raw: Option<String>,
    conditions_code: Option<String>,
    commission_rate: Option<f64>,
    is_relevant: bool,
    row_hash: String,
    source_row: Option<i64>,
    override_amount: Option<i64>,
    override_reason: Option<String>,
    note: Option<String>,
}

impl From<CommissionRow> for Commission {
    fn from(row: CommissionRow) -> Self {
        let shares = match (row.consultant_share, row.tl_share, row.house_share) {
            (Some(consultant), Some(team_leader), Some(house)) => Some(Shares {
                consultant: Cents(consultant),
                team_leader: Cents(team_leader),
                house: Cents(house),
            }),
            _ => None,
        };
        Commission {
            id: row.id,
            contract_id: row.contract_id,
            vsnr: row.vsnr,
            vsnr_normalized: row.vsnr_normalized,
            amount: Cents(row.amount),
            kind: CommissionKind::parse(&row.kind).unwrap_or(CommissionKind::Other),
            payout_date: row.payout_date,
            carrier: row.carrier,
            policyholder: row.policyholder,
            intermediary_name: row.intermediary_name,
            consultant_id: row.consultant_id,
            match_status: MatchStatus::parse(&row.match_status).unwrap_or(MatchStatus::Unmatched),
            match_confidence: row.match_confidence,
            shares,
            batch_id: row.batch_id,
            booking_code_raw: row.booking_code_raw,
            conditions_code: row.conditions_code,
            commission_rate: row.commission_rate,
            is_relevant: row.is_relevant,
            row_hash: row.row_hash,
            source_row: row.source_row,
            override_amount: row.override_amount.map(Cents),
            override_reason: row.override_reason,
            note: row.note,
        }
    }
}

#[derive(Debug, FromRow)]
struct ContractRow {
    id: i64,
    vsnr: String,
    vsnr_normalized: String,
    carrier: Option<String>,
    policyholder: Option<String>,
    branch: Option<String>,
    premium: Option<i64>,
    inception: Option<NaiveDate>,
    consultant_id: Option<i64>,
    status: String,
    source: String,
    xempus_id: Option<String>,
    provision_count: i64,
    provision_sum: i64,
}

impl From<ContractRow> for Contract {
    fn from(row: ContractRow) -> Self {
        Contract {
            id: row.id,
            vsnr: row.vsnr,
            vsnr_normalized: row.vsnr_normalized,
            carrier: row.carrier,
            policyholder: row.policyholder,
            branch: row.branch,
            premium: row.premium.map(Cents),
            inception: row.inception,
            consultant_id: row.consultant_id,
            status: ContractStatus::parse(&row.status).unwrap_or(ContractStatus::Open),
            origin: ContractOrigin::parse(&row.source).unwrap_or(ContractOrigin::Manual),
            xempus_id: row.xempus_id,
            provision_count: row.provision_count,
            provision_sum: Cents(row.provision_sum),
        }
    }
}

#[derive(Debug, FromRow)]
struct EmployeeRow {
    id: i64,
    user_id: Option<i64>,
    name: String,
    role: String,
    commission_model_id: Option<i64>,
    commission_rate_override: Option<f64>,
    tl_override_rate: Option<f64>,
    tl_override_basis: Option<String>,
    teamleiter_id: Option<i64>,
    is_active: bool,
}

impl From<EmployeeRow> for Employee {
    fn from(row: EmployeeRow) -> Self {
        Employee {
            id: row.id,
            user_id: row.user_id,
            name: row.name,
            role: EmployeeRole::parse(&row.role).unwrap_or(EmployeeRole::Consultant),
            commission_model_id: row.commission_model_id,
            commission_rate_override: row.commission_rate_override,
            tl_override_rate: row.tl_override_rate,
            tl_override_basis: row.tl_override_basis.as_deref().and_then(TlBasis::parse),
            team_leader_id: row.teamleiter_id,
            is_active: row.is_active,
        }
    }
}

#[derive(Debug, FromRow)]
struct ModelRow {
    id: i64,
    name: String,
    commission_rate: f64,
    tl_rate: Option<f64>,
    tl_basis: Option<String>,
    effective_from: NaiveDate,
    active: bool,
}

impl From<ModelRow> for CommissionModel {
    fn from(row: ModelRow) -> Self {
        CommissionModel {
            id: row.id,
            name: row.name,
            commission_rate: row.commission_rate,
            tl_rate: row.tl_rate,
            tl_basis: row.tl_basis.as_deref().and_then(TlBasis::parse),
            effective_from: row.effective_from,
            active: row.active,
        }
    }
}

#[derive(Debug, FromRow)]
struct SettlementRow {
    id: i64,
    month: String,
    employee_id: i64,
    revision: i32,
    gross: i64,
    tl_deduction: i64,
    net: i64,
    chargebacks: i64,
    payout: i64,
    positions: i64,
    status: String,
    is_locked: bool,
    is_regenerated_after_release: bool,
}

impl TryFrom<SettlementRow> for Settlement {
    type Error = CommissionError;

    fn try_from(row: SettlementRow) -> Result<Self, Self::Error> {
        let month: Month = row
            .month
            .parse()
            .map_err(|_| CommissionError::NotFound {
                entity: "settlement month",
                id: row.id,
            })?;
        Ok(Settlement {
            id: row.id,
            month,
            employee_id: row.employee_id,
            revision: row.revision,
            gross: Cents(row.gross),
            tl_deduction: Cents(row.tl_deduction),
            net: Cents(row.net),
            chargebacks: Cents(row.chargebacks),
            payout: Cents(row.payout),
            positions: row.positions,
            status: SettlementStatus::parse(&row.status).unwrap_or(SettlementStatus::Draft),
            is_locked: row.is_locked,
            is_regenerated_after_release: row.is_regenerated_after_release,
        })
    }
}

#[derive(Debug, FromRow)]
struct BatchRow {
    id: i64,
    source_type: String,
    carrier: Option<String>,
    filename: String,
    sheet: Option<String>,
    total_rows: i64,
    imported_rows: i64,
    matched_rows: i64,
    skipped_rows: i64,
    error_rows: i64,
    importer: Option<String>,
    created_at: DateTime<Utc>,
    file_sha256: Option<String>,
}

impl From<BatchRow> for ImportBatch {
    fn from(row: BatchRow) -> Self {
        ImportBatch {
            id: row.id,
            source_type: ImportSourceType::parse(&row.source_type)
                .unwrap_or(ImportSourceType::CarrierSheet),
            carrier: row.carrier,
            filename: row.filename,
            sheet: row.sheet,
            total_rows: row.total_rows,
            imported_rows: row.imported_rows,
            matched_rows: row.matched_rows,
            skipped_rows: row.skipped_rows,
            error_rows: row.error_rows,
            importer: row.importer,
            created_at: row.created_at,
            file_sha256: row.file_sha256,
        }
    }
}

/// Outcome of an import run, including the match pass.
#[derive(Debug, Clone, serde::Serialize)]
pub struct ImportResult {
    pub batch_id: i64,
    pub counters: ImportCounters,
    pub matched: i64,
}

/// Month KPIs for the dashboard.
#[derive(Debug, Clone, serde::Serialize)]
pub struct MonthSummary {
    pub month: Month,
    /// Gross volume of the month, sign included.
    pub incoming: Cents,
    /// Negative volume only (≤ 0).
    pub chargebacks: Cents,
    pub consultant: Cents,
    pub team_leader: Cents,
    pub house: Cents,
    pub total_positions: i64,
    pub matched_positions: i64,
    pub unmatched_positions: i64,
}

/// One free (manually entered) commission.
#[derive(Debug, Clone)]
pub struct FreeCommissionInput {
    pub vsnr: String,
    pub amount: Cents,
    pub payout_date: NaiveDate,
    pub carrier: String,
    pub consultant_id: Option<i64>,
    pub note: Option<String>,
}

impl Database {
    /// Create a new database connection
    pub async fn connect(database_url: &str) -> Result<Self, CommissionError> {
        let pool = PgPool::connect(database_url).await?;
        Ok(Self { pool })
    }

    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Apply the schema; every statement is idempotent.
    pub async fn migrate(&self) -> Result<(), CommissionError> {
        for statement in MIGRATIONS {
            sqlx::query(statement).execute(&self.pool).await?;
        }
        info!("commission schema applied");
        Ok(())
    }

    // ── Audit ────────────────────────────────────────────────────────

    pub async fn write_audit(&self, entry: AuditEntry) -> Result<(), CommissionError> {
        sqlx::query(
            "INSERT INTO audit_log (entity_type, entity_id, action, actor, created_at, diff_json)
             VALUES ($1, $2, $3, $4, $5, $6)",
        )
        .bind(&entry.entity_type)
        .bind(entry.entity_id)
        .bind(&entry.action)
        .bind(&entry.actor)
        .bind(entry.created_at)
        .bind(&entry.diff)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn get_audit_log(
        &self,
        entity_type: Option<&str>,
        entity_id: Option<i64>,
        limit: i64,
    ) -> Result<Vec<AuditEntry>, CommissionError> {
        #[derive(FromRow)]
        struct Row {
            entity_type: String,
            entity_id: i64,
            action: String,
            actor: String,
            created_at: DateTime<Utc>,
            diff_json: Option<serde_json::Value>,
        }
        let rows: Vec<Row> = sqlx::query_as(
            "SELECT entity_type, entity_id, action, actor, created_at, diff_json
             FROM audit_log
             WHERE ($1::VARCHAR IS NULL OR entity_type = $1)
               AND ($2::BIGINT IS NULL OR entity_id = $2)
             ORDER BY id DESC
             LIMIT $3",
        )
        .bind(entity_type)
        .bind(entity_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows
            .into_iter()
            .map(|r| AuditEntry {
                entity_type: r.entity_type,
                entity_id: r.entity_id,
                action: r.action,
                actor: r.actor,
                created_at: r.created_at,
                diff: r.diff_json.unwrap_or(serde_json::Value::Null),
            })
            .collect())
    }

    // ── Employees ────────────────────────────────────────────────────

    pub async fn get_employees(&self) -> Result<Vec<Employee>, CommissionError> {
        let rows: Vec<EmployeeRow> =
            sqlx::query_as("SELECT * FROM employees ORDER BY name").fetch_all(&self.pool).await?;
        Ok(rows.into_iter().map(Employee::from).collect())
    }

    pub async fn get_employee(&self, id: i64) -> Result<Employee, CommissionError> {
        let row: Option<EmployeeRow> = sqlx::query_as("SELECT * FROM employees WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.map(Employee::from).ok_or(CommissionError::NotFound {
            entity: "employee",
            id,
        })
    }

    pub async fn create_employee(
        &self,
        employee: &Employee,
        actor: &str,
    ) -> Result<i64, CommissionError> {
        let (id,): (i64,) = sqlx::query_as(
            "INSERT INTO employees
                (user_id, name, role, commission_model_id, commission_rate_override,
                 tl_override_rate, tl_override_basis, teamleiter_id, is_active)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
             RETURNING id",
        )
        .bind(employee.user_id)
        .bind(&employee.name)
        .bind(employee.role.as_str())
        .bind(employee.commission_model_id)
        .bind(employee.commission_rate_override)
        .bind(employee.tl_override_rate)
        .bind(employee.tl_override_basis.map(|b| b.as_str()))
        .bind(employee.team_leader_id)
        .bind(employee.is_active)
        .fetch_one(&self.pool)
        .await?;
        self.write_audit(AuditEntry::new("employee", id, "create", actor).with_detail(employee))
            .await?;
        Ok(id)
    }

    /// Change an employee's rate overrides; splits and settlements from the
    /// cutoff date on are recomputed.
    pub async fn update_employee_rates(
        &self,
        employee_id: i64,
        commission_rate_override: Option<f64>,
        tl_override_rate: Option<f64>,
        tl_override_basis: Option<TlBasis>,
        effective_from: NaiveDate,
        actor: &str,
    ) -> Result<RecalcSummary, CommissionError> {
        let before = self.get_employee(employee_id).await?;
        sqlx::query(
            "UPDATE employees
             SET commission_rate_override = $2, tl_override_rate = $3, tl_override_basis = $4
             WHERE id = $1",
        )
        .bind(employee_id)
        .bind(commission_rate_override)
        .bind(tl_override_rate)
        .bind(tl_override_basis.map(|b| b.as_str()))
        .execute(&self.pool)
        .await?;
        let after = self.get_employee(employee_id).await?;

        self.write_audit(
            AuditEntry::new("employee", employee_id, "update_rates", actor)
                .with_diff(&before, &after),
        )
        .await?;

        self.recalculate_from(effective_from, &[employee_id], actor)
            .await
    }

    // ── Rate models ──────────────────────────────────────────────────

    pub async fn get_models(&self) -> Result<Vec<CommissionModel>, CommissionError> {
        let rows: Vec<ModelRow> =
            sqlx::query_as("SELECT * FROM commission_models ORDER BY name, effective_from")
                .fetch_all(&self.pool)
                .await?;
        Ok(rows.into_iter().map(CommissionModel::from).collect())
    }

    pub async fn get_model(&self, id: i64) -> Result<CommissionModel, CommissionError> {
        let row: Option<ModelRow> =
            sqlx::query_as("SELECT * FROM commission_models WHERE id = $1")
                .bind(id)
                .fetch_optional(&self.pool)
                .await?;
        row.map(CommissionModel::from).ok_or(CommissionError::NotFound {
            entity: "commission model",
            id,
        })
    }

    /// All versions of a model lineage, oldest first.
    pub async fn model_versions(&self, name: &str) -> Result<Vec<CommissionModel>, CommissionError> {
        let rows: Vec<ModelRow> = sqlx::query_as(
            "SELECT * FROM commission_models WHERE name = $1 ORDER BY effective_from",
        )
        .bind(name)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(CommissionModel::from).collect())
    }

    pub async fn create_model(
        &self,
        model: &CommissionModel,
        actor: &str,
    ) -> Result<i64, CommissionError> {
        let (id,): (i64,) = sqlx::query_as(
            "INSERT INTO commission_models
                (name, commission_rate, tl_rate, tl_basis, effective_from, active)
             VALUES ($1, $2, $3, $4, $5, $6)
             RETURNING id",
        )
        .bind(&model.name)
        .bind(model.commission_rate)
        .bind(model.tl_rate)
        .bind(model.tl_basis.map(|b| b.as_str()))
        .bind(model.effective_from)
        .bind(model.active)
        .fetch_one(&self.pool)
        .await?;
        self.write_audit(AuditEntry::new("commission_model", id, "create", actor).with_detail(model))
            .await?;
        Ok(id)
    }

    /// Edit a model's rates with a cutoff date: a new version row becomes
    /// effective at `effective_from`, and every non-frozen split and
    /// settlement from that date on is recomputed.
    pub async fn update_model_rate(
        &self,
        model_id: i64,
        commission_rate: f64,
        tl_rate: Option<f64>,
        tl_basis: Option<TlBasis>,
        effective_from: NaiveDate,
        actor: &str,
    ) -> Result<RecalcSummary, CommissionError> {
        let lineage_head = self.get_model(model_id).await?;

        let new_version = CommissionModel {
            id: 0,
            name: lineage_head.name.clone(),
            commission_rate,
            tl_rate,
            tl_basis,
            effective_from,
            active: true,
        };
        let (version_id,): (i64,) = sqlx::query_as(
            "INSERT INTO commission_models
                (name, commission_rate, tl_rate, tl_basis, effective_from, active)
             VALUES ($1, $2, $3, $4, $5, TRUE)
             RETURNING id",
        )
        .bind(&new_version.name)
        .bind(new_version.commission_rate)
        .bind(new_version.tl_rate)
        .bind(new_version.tl_basis.map(|b| b.as_str()))
        .bind(new_version.effective_from)
        .fetch_one(&self.pool)
        .await?;

        self.write_audit(
            AuditEntry::new("commission_model", version_id, "rate_change", actor)
                .with_diff(&lineage_head, &new_version),
        )
        .await?;

        // Every employee on any version of this lineage is affected.
        let lineage_ids: Vec<(i64,)> =
            sqlx::query_as("SELECT id FROM commission_models WHERE name = $1")
                .bind(&lineage_head.name)
                .fetch_all(&self.pool)
                .await?;
        let ids: Vec<i64> = lineage_ids.into_iter().map(|(id,)| id).collect();
        let employees: Vec<(i64,)> = sqlx::query_as(
            "SELECT id FROM employees WHERE commission_model_id = ANY($1) AND is_active",
        )
        .bind(&ids)
        .fetch_all(&self.pool)
        .await?;
        let employee_ids: Vec<i64> = employees.into_iter().map(|(id,)| id).collect();

        self.recalculate_from(effective_from, &employee_ids, actor)
            .await
    }

    // ── Contracts ────────────────────────────────────────────────────

    pub async fn get_contracts(&self) -> Result<Vec<Contract>, CommissionError> {
        let rows: Vec<ContractRow> =
            sqlx::query_as("SELECT * FROM contracts ORDER BY id").fetch_all(&self.pool).await?;
        Ok(rows.into_iter().map(Contract::from).collect())
    }

    pub async fn assign_consultant_to_contract(
        &self,
        contract_id: i64,
        consultant_id: i64,
        actor: &str,
    ) -> Result<(), CommissionError> {
        let updated = sqlx::query("UPDATE contracts SET consultant_id = $2 WHERE id = $1")
            .bind(contract_id)
            .bind(consultant_id)
            .execute(&self.pool)
            .await?;
        if updated.rows_affected() == 0 {
            return Err(CommissionError::NotFound {
                entity: "contract",
                id: contract_id,
            });
        }
        self.write_audit(
            AuditEntry::new("contract", contract_id, "assign_consultant", actor)
                .with_detail(serde_json::json!({ "consultant_id": consultant_id })),
        )
        .await?;
        Ok(())
    }

    // ── Intermediary mappings ────────────────────────────────────────

    pub async fn get_mappings(&self) -> Result<Vec<IntermediaryMapping>, CommissionError> {
        #[derive(FromRow)]
        struct Row {
            id: i64,
            name: String,
            name_normalized: String,
            employee_id: i64,
        }
        let rows: Vec<Row> =
            sqlx::query_as("SELECT * FROM intermediary_mappings ORDER BY name_normalized")
                .fetch_all(&self.pool)
                .await?;
        Ok(rows
            .into_iter()
            .map(|r| IntermediaryMapping {
                id: r.id,
                name: r.name,
                name_normalized: r.name_normalized,
                employee_id: r.employee_id,
            })
            .collect())
    }

    pub async fn create_mapping(
        &self,
        name: &str,
        employee_id: i64,
        actor: &str,
    ) -> Result<i64, CommissionError> {
        let normalized = atlas_core::normalize_intermediary(name);
        let (id,): (i64,) = sqlx::query_as(
            "INSERT INTO intermediary_mappings (name, name_normalized, employee_id)
             VALUES ($1, $2, $3)
             ON CONFLICT (name_normalized) DO UPDATE SET employee_id = EXCLUDED.employee_id
             RETURNING id",
        )
        .bind(name)
        .bind(&normalized)
        .bind(employee_id)
        .fetch_one(&self.pool)
        .await?;
        self.write_audit(
            AuditEntry::new("intermediary_mapping", id, "upsert", actor).with_detail(
                serde_json::json!({ "name": name, "normalized": normalized, "employee_id": employee_id }),
            ),
        )
        .await?;
        Ok(id)
    }

    pub async fn delete_mapping(&self, id: i64, actor: &str) -> Result<(), CommissionError> {
        let deleted = sqlx::query("DELETE FROM intermediary_mappings WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        if deleted.rows_affected() == 0 {
            return Err(CommissionError::NotFound {
                entity: "intermediary mapping",
                id,
            });
        }
        self.write_audit(AuditEntry::new("intermediary_mapping", id, "delete", actor))
            .await?;
        Ok(())
    }

    // ── Import ───────────────────────────────────────────────────────

    /// Row hashes already imported for a carrier, for the dedup plan.
    pub async fn existing_row_hashes(
        &self,
        carrier: &str,
    ) -> Result<HashSet<String>, CommissionError> {
        let rows: Vec<(String,)> =
            sqlx::query_as("SELECT row_hash FROM commissions WHERE carrier = $1")
                .bind(carrier)
                .fetch_all(&self.pool)
                .await?;
        Ok(rows.into_iter().map(|(hash,)| hash).collect())
    }

    pub async fn find_batch_by_file_hash(
        &self,
        file_sha256: &str,
    ) -> Result<Option<ImportBatch>, CommissionError> {
        let row: Option<BatchRow> =
            sqlx::query_as("SELECT * FROM import_batches WHERE file_sha256 = $1 LIMIT 1")
                .bind(file_sha256)
                .fetch_optional(&self.pool)
                .await?;
        Ok(row.map(ImportBatch::from))
    }

    pub async fn get_import_batches(&self) -> Result<Vec<ImportBatch>, CommissionError> {
        let rows: Vec<BatchRow> =
            sqlx::query_as("SELECT * FROM import_batches ORDER BY id DESC")
                .fetch_all(&self.pool)
                .await?;
        Ok(rows.into_iter().map(ImportBatch::from).collect())
    }

    /// Import one parsed carrier sheet as a batch.
    ///
    /// Transactional per batch: rows insert under the `(carrier, row_hash)`
    /// unique index, the batch record carries the counters, and auto-match
    /// runs afterwards unless `skip_match` is set (used when several sheets
    /// of one physical file upload back to back).
    pub async fn import_sheet(
        &self,
        parsed: &SheetParseResult,
        filename: &str,
        file_sha256: Option<&str>,
        importer: Option<&str>,
        skip_match: bool,
    ) -> Result<ImportResult, CommissionError> {
        if let Some(hash) = file_sha256 {
            if let Some(existing) = self.find_batch_by_file_hash(hash).await? {
                debug!(batch_id = existing.id, "file already imported, skipping");
                return Ok(ImportResult {
                    batch_id: existing.id,
                    counters: ImportCounters {
                        total: parsed.rows.len() as i64,
                        imported: 0,
                        skipped: parsed.rows.len() as i64,
                        errors: 0,
                    },
                    matched: 0,
                });
            }
        }

        let existing = self.existing_row_hashes(&parsed.carrier).await?;
        let (plan, skipped) = plan_import(&parsed.rows, &existing, parsed.errors.len());
        for (source_row, reason) in &skipped {
            debug!(carrier = %parsed.carrier, source_row, ?reason, "skipping duplicate row");
        }

        let mut tx = self.pool.begin().await?;
        let (batch_id,): (i64,) = sqlx::query_as(
            "INSERT INTO import_batches
                (source_type, carrier, filename, sheet, total_rows, imported_rows,
                 skipped_rows, error_rows, importer, file_sha256)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
             RETURNING id",
        )
        .bind(ImportSourceType::CarrierSheet.as_str())
        .bind(&parsed.carrier)
        .bind(filename)
        .bind(&parsed.sheet_name)
        .bind(plan.counters.total)
        .bind(plan.counters.imported)
        .bind(plan.counters.skipped)
        .bind(plan.counters.errors)
        .bind(importer)
        .bind(file_sha256)
        .fetch_one(&mut *tx)
        .await?;

        for row in &plan.to_insert {
            insert_commission_row(&mut tx, batch_id, &parsed.carrier, row).await?;
        }
        tx.commit().await?;

        self.write_audit(
            AuditEntry::new("import_batch", batch_id, "import", importer.unwrap_or("system"))
                .with_detail(&plan.counters),
        )
        .await?;

        let matched = if skip_match {
            0
        } else {
            self.auto_match(Some(batch_id), importer.unwrap_or("system"))
                .await?
        };
        if matched > 0 {
            sqlx::query("UPDATE import_batches SET matched_rows = $2 WHERE id = $1")
                .bind(batch_id)
                .bind(matched)
                .execute(&self.pool)
                .await?;
        }

        info!(
            batch_id,
            carrier = %parsed.carrier,
            imported = plan.counters.imported,
            skipped = plan.counters.skipped,
            matched,
            "sheet import finished"
        );
        Ok(ImportResult {
            batch_id,
            counters: plan.counters,
            matched,
        })
    }

    /// Import the Xempus contract export: contracts upsert by portal id or
    /// normalized VSNR, consultant names resolve against employees.
    pub async fn import_xempus(
        &self,
        parsed: &XempusParseResult,
        filename: &str,
        file_sha256: Option<&str>,
        importer: Option<&str>,
    ) -> Result<ImportResult, CommissionError> {
        if let Some(hash) = file_sha256 {
            if let Some(existing) = self.find_batch_by_file_hash(hash).await? {
                return Ok(ImportResult {
                    batch_id: existing.id,
                    counters: ImportCounters {
                        total: parsed.rows.len() as i64,
                        imported: 0,
                        skipped: parsed.rows.len() as i64,
                        errors: 0,
                    },
                    matched: 0,
                });
            }
        }

        // Consultant names in the export map to employees by normalized name.
        let employees = self.get_employees().await?;
        let by_name: HashMap<String, i64> = employees
            .iter()
            .map(|e| (atlas_core::normalize_db_name(&e.name), e.id))
            .collect();

        let mut tx = self.pool.begin().await?;
        let mut imported = 0i64;
        for row in &parsed.rows {
            let consultant_id = row
                .consultant_name
                .as_deref()
                .and_then(|name| by_name.get(&atlas_core::normalize_db_name(name)))
                .copied();

            let result = sqlx::query(
                "INSERT INTO contracts
                    (vsnr, vsnr_normalized, carrier, policyholder, branch, premium,
                     inception, consultant_id, status, source, xempus_id)
                 VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
                 ON CONFLICT (xempus_id) WHERE xempus_id IS NOT NULL DO UPDATE SET
                    vsnr = EXCLUDED.vsnr,
                    vsnr_normalized = EXCLUDED.vsnr_normalized,
                    status = EXCLUDED.status,
                    consultant_id = COALESCE(contracts.consultant_id, EXCLUDED.consultant_id)",
            )
            .bind(&row.vsnr)
            .bind(&row.vsnr_normalized)
            .bind(&row.carrier)
            .bind(&row.policyholder)
            .bind(&row.branch)
            .bind(row.premium.map(|p| p.0))
            .bind(row.inception)
            .bind(consultant_id)
            .bind(row.status.as_str())
            .bind(ContractOrigin::Xempus.as_str())
            .bind(&row.xempus_id)
            .execute(&mut *tx)
            .await?;
            imported += result.rows_affected() as i64;
        }

        let counters = ImportCounters {
            total: parsed.total_rows + parsed.errors.len() as i64,
            imported,
            skipped: parsed.skipped_rows,
            errors: parsed.errors.len() as i64,
        };
        let (batch_id,): (i64,) = sqlx::query_as(
            "INSERT INTO import_batches
                (source_type, filename, sheet, total_rows, imported_rows, skipped_rows,
                 error_rows, importer, file_sha256)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
             RETURNING id",
        )
        .bind(ImportSourceType::Xempus.as_str())
        .bind(filename)
        .bind(crate::xempus::CONTRACT_SHEET)
        .bind(counters.total)
        .bind(counters.imported)
        .bind(counters.skipped)
        .bind(counters.errors)
        .bind(importer)
        .bind(file_sha256)
        .fetch_one(&mut *tx)
        .await?;
        tx.commit().await?;

        self.write_audit(
            AuditEntry::new("import_batch", batch_id, "import", importer.unwrap_or("system"))
                .with_detail(&counters),
        )
        .await?;

        // Fresh contracts may resolve previously unmatched commissions.
        let matched = self.auto_match(None, importer.unwrap_or("system")).await?;
        Ok(ImportResult {
            batch_id,
            counters,
            matched,
        })
    }

    /// Record a manually entered commission through the standard batch path.
    pub async fn create_free_commission(
        &self,
        input: &FreeCommissionInput,
        actor: &str,
    ) -> Result<ImportResult, CommissionError> {
        let vsnr_normalized = atlas_core::normalize_vsnr(&input.vsnr);
        let kind = if input.amount.is_negative() {
            CommissionKind::Chargeback
        } else {
            CommissionKind::Initial
        };
        let row = SheetRow {
            vsnr: input.vsnr.clone(),
            vsnr_normalized: vsnr_normalized.clone(),
            amount: input.amount,
            kind,
            booking_code_raw: None,
            payout_date: Some(input.payout_date),
            policyholder: None,
            intermediary_name: None,
            commission_rate: None,
            conditions_code: None,
            // Free commissions bypass the carrier relevance rules.
            is_relevant: true,
            row_hash: crate::sheet::compute_row_hash(
                &input.carrier,
                &vsnr_normalized,
                input.amount,
                Some(input.payout_date),
                kind,
            ),
            source_row: 1,
        };

        let existing = self.existing_row_hashes(&input.carrier).await?;
        let rows = vec![row];
        let (plan, _) = plan_import(&rows, &existing, 0);

        let mut tx = self.pool.begin().await?;
        let (batch_id,): (i64,) = sqlx::query_as(
            "INSERT INTO import_batches
                (source_type, carrier, filename, total_rows, imported_rows, skipped_rows, importer)
             VALUES ($1, $2, $3, $4, $5, $6, $7)
             RETURNING id",
        )
        .bind(ImportSourceType::FreeCommission.as_str())
        .bind(&input.carrier)
        .bind("free-commission")
        .bind(plan.counters.total)
        .bind(plan.counters.imported)
        .bind(plan.counters.skipped)
        .bind(actor)
        .fetch_one(&mut *tx)
        .await?;
        for row in &plan.to_insert {
            insert_commission_row(&mut tx, batch_id, &input.carrier, row).await?;
        }
        if let (Some(consultant_id), 1) = (input.consultant_id, plan.counters.imported) {
            sqlx::query(
                "UPDATE commissions SET consultant_id = $2, match_status = $3, note = $4
                 WHERE batch_id = $1",
            )
            .bind(batch_id)
            .bind(consultant_id)
            .bind(MatchStatus::ManualMatched.as_str())
            .bind(&input.note)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;

        self.write_audit(
            AuditEntry::new("import_batch", batch_id, "free_commission", actor)
                .with_detail(&plan.counters),
        )
        .await?;
        self.auto_match(Some(batch_id), actor).await?;
        self.refresh_splits(None, actor).await?;

        Ok(ImportResult {
            batch_id,
            counters: plan.counters,
            matched: 0,
        })
    }

    // ── Matching ─────────────────────────────────────────────────────

    /// Run the two-stage matcher over auto-matchable commissions, persist
    /// changed verdicts and recompute their splits. Returns how many rows
    /// changed. Idempotent.
    pub async fn auto_match(
        &self,
        batch_id: Option<i64>,
        actor: &str,
    ) -> Result<i64, CommissionError> {
        let contracts = self.get_contracts().await?;
        let contract_index = ContractIndex::build(&contracts);
        let mappings = self.get_mappings().await?;
        let mapping_index = MappingIndex::build(&mappings);

        let rows: Vec<CommissionRow> = sqlx::query_as(
            "SELECT * FROM commissions
             WHERE match_status IN ('unmatched', 'auto_matched')
               AND ($1::BIGINT IS NULL OR batch_id = $1)",
        )
        .bind(batch_id)
        .fetch_all(&self.pool)
        .await?;

        let mut changed = 0i64;
        let mut touched_ids = Vec::new();
        for row in rows {
            let commission = Commission::from(row);
            if !is_auto_matchable(&commission) {
                continue;
            }
            let verdict = match_commission(
                &commission.vsnr_normalized,
                commission.intermediary_name.as_deref(),
                &contract_index,
                &mapping_index,
            );
            let consultant_after = verdict.consultant_id.or(commission.consultant_id);
            if verdict.contract_id == commission.contract_id
                && consultant_after == commission.consultant_id
                && verdict.status == commission.match_status
            {
                continue;
            }

            sqlx::query(
                "UPDATE commissions
                 SET contract_id = $2, consultant_id = $3, match_status = $4, match_confidence = $5
                 WHERE id = $1",
            )
            .bind(commission.id)
            .bind(verdict.contract_id)
            .bind(consultant_after)
            .bind(verdict.status.as_str())
            .bind(verdict.confidence)
            .execute(&self.pool)
            .await?;

            if verdict.status != commission.match_status {
                self.write_audit(
                    AuditEntry::new("commission", commission.id, "match_status", actor).with_diff(
                        serde_json::json!({ "status": commission.match_status.as_str() }),
                        serde_json::json!({ "status": verdict.status.as_str() }),
                    ),
                )
                .await?;
            }
            touched_ids.push(commission.id);
            changed += 1;
        }

        if !touched_ids.is_empty() {
            self.refresh_splits(Some(&touched_ids), actor).await?;
        }
        Ok(changed)
    }

    /// Manually assign a contract (and optionally a consultant).
    pub async fn assign_contract(
        &self,
        commission_id: i64,
        contract_id: Option<i64>,
        consultant_id: Option<i64>,
        actor: &str,
    ) -> Result<(), CommissionError> {
        let before = self.get_commission(commission_id).await?;
        self.guard_settlement_not_frozen(&before).await?;

        sqlx::query(
            "UPDATE commissions
             SET contract_id = COALESCE($2, contract_id),
                 consultant_id = COALESCE($3, consultant_id),
                 match_status = $4,
                 match_confidence = NULL
             WHERE id = $1",
        )
        .bind(commission_id)
        .bind(contract_id)
        .bind(consultant_id)
        .bind(MatchStatus::ManualMatched.as_str())
        .execute(&self.pool)
        .await?;

        self.write_audit(
            AuditEntry::new("commission", commission_id, "manual_match", actor).with_diff(
                serde_json::json!({
                    "contract_id": before.contract_id,
                    "consultant_id": before.consultant_id,
                    "status": before.match_status.as_str(),
                }),
                serde_json::json!({
                    "contract_id": contract_id.or(before.contract_id),
                    "consultant_id": consultant_id.or(before.consultant_id),
                    "status": MatchStatus::ManualMatched.as_str(),
                }),
            ),
        )
        .await?;
        self.refresh_splits(Some(&[commission_id]), actor).await?;
        Ok(())
    }

    /// Mark a commission as never-to-be-settled. Terminal.
    pub async fn ignore_commission(
        &self,
        commission_id: i64,
        actor: &str,
    ) -> Result<(), CommissionError> {
        let before = self.get_commission(commission_id).await?;
        self.guard_settlement_not_frozen(&before).await?;
        sqlx::query("UPDATE commissions SET match_status = $2 WHERE id = $1")
            .bind(commission_id)
            .bind(MatchStatus::Ignored.as_str())
            .execute(&self.pool)
            .await?;
        self.write_audit(
            AuditEntry::new("commission", commission_id, "match_status", actor).with_diff(
                serde_json::json!({ "status": before.match_status.as_str() }),
                serde_json::json!({ "status": MatchStatus::Ignored.as_str() }),
            ),
        )
        .await?;
        Ok(())
    }

    // ── Overrides and notes ──────────────────────────────────────────

    pub async fn set_override(
        &self,
        commission_id: i64,
        amount: Cents,
        reason: &str,
        actor: &str,
    ) -> Result<(), CommissionError> {
        let before = self.get_commission(commission_id).await?;
        self.guard_settlement_not_frozen(&before).await?;
        sqlx::query(
            "UPDATE commissions SET override_amount = $2, override_reason = $3 WHERE id = $1",
        )
        .bind(commission_id)
        .bind(amount.0)
        .bind(reason)
        .execute(&self.pool)
        .await?;
        self.write_audit(
            AuditEntry::new("commission", commission_id, "override", actor).with_diff(
                serde_json::json!({ "override_amount": before.override_amount.map(|c| c.0) }),
                serde_json::json!({ "override_amount": amount.0, "reason": reason }),
            ),
        )
        .await?;
        self.refresh_splits(Some(&[commission_id]), actor).await?;
        Ok(())
    }

    pub async fn reset_override(
        &self,
        commission_id: i64,
        actor: &str,
    ) -> Result<(), CommissionError> {
        let before = self.get_commission(commission_id).await?;
        self.guard_settlement_not_frozen(&before).await?;
        sqlx::query(
            "UPDATE commissions SET override_amount = NULL, override_reason = NULL WHERE id = $1",
        )
        .bind(commission_id)
        .execute(&self.pool)
        .await?;
        self.write_audit(
            AuditEntry::new("commission", commission_id, "override_reset", actor).with_diff(
                serde_json::json!({ "override_amount": before.override_amount.map(|c| c.0) }),
                serde_json::json!({ "override_amount": serde_json::Value::Null }),
            ),
        )
        .await?;
        self.refresh_splits(Some(&[commission_id]), actor).await?;
        Ok(())
    }

    pub async fn set_note(
        &self,
        commission_id: i64,
        note: Option<&str>,
        actor: &str,
    ) -> Result<(), CommissionError> {
        let before = self.get_commission(commission_id).await?;
        sqlx::query("UPDATE commissions SET note = $2 WHERE id = $1")
            .bind(commission_id)
            .bind(note)
            .execute(&self.pool)
            .await?;
        self.write_audit(
            AuditEntry::new("commission", commission_id, "note", actor)
                .with_diff(
                    serde_json::json!({ "note": before.note }),
                    serde_json::json!({ "note": note }),
                ),
        )
        .await?;
        Ok(())
    }

    // ── Commissions ──────────────────────────────────────────────────

    pub async fn get_commission(&self, id: i64) -> Result<Commission, CommissionError> {
        let row: Option<CommissionRow> = sqlx::query_as("SELECT * FROM commissions WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.map(Commission::from).ok_or(CommissionError::NotFound {
            entity: "commission",
            id,
        })
    }

    pub async fn get_commissions_for_month(
        &self,
        month: Month,
    ) -> Result<Vec<Commission>, CommissionError> {
        let rows: Vec<CommissionRow> = sqlx::query_as(
            "SELECT * FROM commissions WHERE payout_date >= $1 AND payout_date < $2 ORDER BY id",
        )
        .bind(month.first_day())
        .bind(month.next().first_day())
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(Commission::from).collect())
    }

    /// The clearance feed: relevant rows without a contract or without a
    /// consultant, oldest first.
    pub async fn get_clearance(&self) -> Result<Vec<Commission>, CommissionError> {
        let rows: Vec<CommissionRow> = sqlx::query_as(
            "SELECT * FROM commissions
             WHERE is_relevant
               AND match_status <> 'ignored'
               AND (contract_id IS NULL OR consultant_id IS NULL)
             ORDER BY payout_date NULLS LAST, id",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(Commission::from).collect())
    }

    pub async fn clearance_counts(&self) -> Result<crate::clearance::ClearanceCounts, CommissionError> {
        let (unmatched,): (i64,) = sqlx::query_as(
            "SELECT COUNT(*) FROM commissions
             WHERE is_relevant AND match_status <> 'ignored' AND contract_id IS NULL",
        )
        .fetch_one(&self.pool)
        .await?;
        let (missing_consultant,): (i64,) = sqlx::query_as(
            "SELECT COUNT(*) FROM commissions
             WHERE is_relevant AND match_status <> 'ignored'
               AND contract_id IS NOT NULL AND consultant_id IS NULL",
        )
        .fetch_one(&self.pool)
        .await?;
        Ok(crate::clearance::ClearanceCounts {
            unmatched,
            missing_consultant,
        })
    }

    /// Month KPIs for the dashboard.
    pub async fn month_summary(&self, month: Month) -> Result<MonthSummary, CommissionError> {
        #[derive(FromRow)]
        struct Row {
            incoming: Option<i64>,
            chargebacks: Option<i64>,
            consultant: Option<i64>,
            team_leader: Option<i64>,
            house: Option<i64>,
            total_positions: i64,
            matched_positions: i64,
            unmatched_positions: i64,
        }
        let row: Row = sqlx::query_as(
            "SELECT
                SUM(amount) AS incoming,
                SUM(amount) FILTER (WHERE amount < 0) AS chargebacks,
                SUM(consultant_share) AS consultant,
                SUM(tl_share) AS team_leader,
                SUM(house_share) AS house,
                COUNT(*) AS total_positions,
                COUNT(*) FILTER (WHERE contract_id IS NOT NULL) AS matched_positions,
                COUNT(*) FILTER (WHERE contract_id IS NULL AND match_status <> 'ignored')
                    AS unmatched_positions
             FROM commissions
             WHERE is_relevant AND payout_date >= $1 AND payout_date < $2",
        )
        .bind(month.first_day())
        .bind(month.next().first_day())
        .fetch_one(&self.pool)
        .await?;
        Ok(MonthSummary {
            month,
            incoming: Cents(row.incoming.unwrap_or(0)),
            chargebacks: Cents(row.chargebacks.unwrap_or(0)),
            consultant: Cents(row.consultant.unwrap_or(0)),
            team_leader: Cents(row.team_leader.unwrap_or(0)),
            house: Cents(row.house.unwrap_or(0)),
            total_positions: row.total_positions,
            matched_positions: row.matched_positions,
            unmatched_positions: row.unmatched_positions,
        })
    }

    // ── Splits ───────────────────────────────────────────────────────

    /// Recompute splits for the given commissions (or all of them), except
    /// those feeding a frozen settlement.
    async fn refresh_splits(
        &self,
        only_ids: Option<&[i64]>,
        _actor: &str,
    ) -> Result<i64, CommissionError> {
        let employees = self.get_employees().await?;
        let models = self.get_models().await?;
        let frozen = self.frozen_settlement_months().await?;

        let rows: Vec<CommissionRow> = sqlx::query_as(
            "SELECT * FROM commissions
             WHERE consultant_id IS NOT NULL
               AND payout_date IS NOT NULL
               AND is_relevant
               AND match_status <> 'ignored'
               AND ($1::BIGINT[] IS NULL OR id = ANY($1))",
        )
        .bind(only_ids)
        .fetch_all(&self.pool)
        .await?;

        let by_id: HashMap<i64, &Employee> = employees.iter().map(|e| (e.id, e)).collect();
        let versions_by_name: HashMap<&str, Vec<CommissionModel>> = {
            let mut map: HashMap<&str, Vec<CommissionModel>> = HashMap::new();
            for model in &models {
                map.entry(model.name.as_str()).or_default().push(model.clone());
            }
            map
        };

        let mut updated = 0i64;
        for row in rows {
            let commission = Commission::from(row);
            let (Some(consultant_id), Some(payout_date)) =
                (commission.consultant_id, commission.payout_date)
            else {
                continue;
            };
            if frozen.contains(&(Month::of(payout_date), consultant_id)) {
                continue;
            }
            let Some(employee) = by_id.get(&consultant_id) else {
                continue;
            };
            let lineage = employee
                .commission_model_id
                .and_then(|model_id| models.iter().find(|m| m.id == model_id))
                .and_then(|model| versions_by_name.get(model.name.as_str()))
                .map(Vec::as_slice)
                .unwrap_or(&[]);

            let shares = compute_shares(
                commission.effective_amount(),
                payout_date,
                employee,
                lineage,
            );
            let (consultant, tl, house) = match shares {
                Some(s) => (Some(s.consultant.0), Some(s.team_leader.0), Some(s.house.0)),
                None => (None, None, None),
            };
            let result = sqlx::query(
                "UPDATE commissions
                 SET consultant_share = $2, tl_share = $3, house_share = $4
                 WHERE id = $1
                   AND (consultant_share IS DISTINCT FROM $2
                     OR tl_share IS DISTINCT FROM $3
                     OR house_share IS DISTINCT FROM $4)",
            )
            .bind(commission.id)
            .bind(consultant)
            .bind(tl)
            .bind(house)
            .execute(&self.pool)
            .await?;
            updated += result.rows_affected() as i64;
        }
        Ok(updated)
    }

    /// (month, employee) pairs whose latest settlement revision is frozen.
    async fn frozen_settlement_months(
        &self,
    ) -> Result<HashSet<(Month, i64)>, CommissionError> {
        let rows: Vec<(String, i64)> = sqlx::query_as(
            "SELECT month, employee_id FROM settlements s
             WHERE revision = (SELECT MAX(revision) FROM settlements
                               WHERE month = s.month AND employee_id = s.employee_id)
               AND (is_locked OR status IN ('released', 'paid'))",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(rows
            .into_iter()
            .filter_map(|(month, employee_id)| {
                month.parse::<Month>().ok().map(|m| (m, employee_id))
            })
            .collect())
    }

    /// Rate-change recomputation: fresh splits for the affected employees'
    /// commissions with `payout_date >= cutoff`, then regenerated
    /// settlements for those employees from the cutoff month forward.
    /// Settlements of employees the rate change does not touch keep their
    /// current revision.
    pub async fn recalculate_from(
        &self,
        cutoff: NaiveDate,
        employee_ids: &[i64],
        actor: &str,
    ) -> Result<RecalcSummary, CommissionError> {
        let rows: Vec<CommissionRow> =
            sqlx::query_as("SELECT * FROM commissions WHERE payout_date >= $1")
                .bind(cutoff)
                .fetch_all(&self.pool)
                .await?;
        let candidates: Vec<Commission> = rows.into_iter().map(Commission::from).collect();
        let affected = affected_commissions(&candidates, employee_ids, cutoff);
        let affected_ids: Vec<i64> = affected.iter().map(|c| c.id).collect();

        let splits_recalculated = if affected_ids.is_empty() {
            0
        } else {
            self.refresh_splits(Some(&affected_ids), actor).await?
        };

        // Regenerate the affected employees' settlements from the cutoff
        // month through the last month they settle or pay out in.
        let (last_settled,): (Option<String>,) = sqlx::query_as(
            "SELECT MAX(month) FROM settlements WHERE employee_id = ANY($1) AND month >= $2",
        )
        .bind(employee_ids)
        .bind(Month::of(cutoff).to_string())
        .fetch_one(&self.pool)
        .await?;
        let last_settled = last_settled.and_then(|m| m.parse::<Month>().ok());
        let last_payout = affected
            .iter()
            .filter_map(|c| c.payout_date)
            .map(Month::of)
            .max();

        let mut settlements_regenerated = 0i64;
        if let Some(through) = last_settled.max(last_payout) {
            for month in months_from(cutoff, through) {
                settlements_regenerated += self
                    .generate_settlements_scoped(month, Some(employee_ids), actor)
                    .await?
                    .len() as i64;
            }
        }

        let summary = RecalcSummary {
            splits_recalculated,
            settlements_regenerated,
            affected_employees: employee_ids.len() as i64,
            from_date: Some(cutoff),
        };
        info!(
            splits = summary.splits_recalculated,
            settlements = summary.settlements_regenerated,
            employees = summary.affected_employees,
            from = %cutoff,
            "rate recomputation finished"
        );
        Ok(summary)
    }

    // ── Settlements ──────────────────────────────────────────────────

    pub async fn get_settlements(
        &self,
        month: Option<Month>,
    ) -> Result<Vec<Settlement>, CommissionError> {
        let rows: Vec<SettlementRow> = sqlx::query_as(
            "SELECT * FROM settlements
             WHERE ($1::VARCHAR IS NULL OR month = $1)
             ORDER BY month, employee_id, revision",
        )
        .bind(month.map(|m| m.to_string()))
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(Settlement::try_from).collect()
    }

    /// Latest revision per (month, employee).
    pub async fn latest_settlements(
        &self,
        month: Month,
    ) -> Result<Vec<Settlement>, CommissionError> {
        let rows: Vec<SettlementRow> = sqlx::query_as(
            "SELECT * FROM settlements s
             WHERE month = $1
               AND revision = (SELECT MAX(revision) FROM settlements
                               WHERE month = s.month AND employee_id = s.employee_id)
             ORDER BY employee_id",
        )
        .bind(month.to_string())
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(Settlement::try_from).collect()
    }

    /// Generate (or regenerate) the month's settlements. Returns the
    /// settlements written. Draft and reviewed snapshots are replaced by a
    /// new revision (reviewed drops back to draft); frozen ones stay and
    /// get a parallel flagged revision.
    pub async fn generate_settlements(
        &self,
        month: Month,
        actor: &str,
    ) -> Result<Vec<Settlement>, CommissionError> {
        self.generate_settlements_scoped(month, None, actor).await
    }

    /// Scoped regeneration: only settlements of the given employees are
    /// written. A rate edit must never bump the revision of a consultant it
    /// does not affect.
    async fn generate_settlements_scoped(
        &self,
        month: Month,
        only_employees: Option<&[i64]>,
        actor: &str,
    ) -> Result<Vec<Settlement>, CommissionError> {
        let commissions = self.get_commissions_for_month(month).await?;
        let mut drafts = build_settlements(month, &commissions);
        if let Some(ids) = only_employees {
            drafts.retain(|draft| ids.contains(&draft.employee_id));
        }
        let existing = self.latest_settlements(month).await?;
        let by_employee: HashMap<i64, &Settlement> =
            existing.iter().map(|s| (s.employee_id, s)).collect();

        let mut written = Vec::new();
        let mut tx = self.pool.begin().await?;
        for draft in drafts {
            let action = plan_regeneration(by_employee.get(&draft.employee_id).copied());
            let (revision, flagged) = match action {
                RegenerateAction::Replace { bump_revision_to } => (bump_revision_to, false),
                RegenerateAction::PreserveAndBranch { new_revision } => (new_revision, true),
            };

            let row: SettlementRow = sqlx::query_as(
                "INSERT INTO settlements
                    (month, employee_id, revision, gross, tl_deduction, net, chargebacks,
                     payout, positions, status, is_locked, is_regenerated_after_release)
                 VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, 'draft', FALSE, $10)
                 RETURNING *",
            )
            .bind(month.to_string())
            .bind(draft.employee_id)
            .bind(revision)
            .bind(draft.gross.0)
            .bind(draft.tl_deduction.0)
            .bind(draft.net.0)
            .bind(draft.chargebacks.0)
            .bind(draft.payout.0)
            .bind(draft.positions)
            .bind(flagged)
            .fetch_one(&mut *tx)
            .await?;
            written.push(Settlement::try_from(row)?);
        }
        tx.commit().await?;

        for settlement in &written {
            self.write_audit(
                AuditEntry::new("settlement", settlement.id, "generate", actor).with_detail(
                    serde_json::json!({
                        "month": settlement.month.to_string(),
                        "employee_id": settlement.employee_id,
                        "revision": settlement.revision,
                        "payout": settlement.payout.0,
                    }),
                ),
            )
            .await?;
        }
        info!(month = %month, count = written.len(), "settlements generated");
        Ok(written)
    }

    /// Move a settlement through the status machine.
    pub async fn update_settlement_status(
        &self,
        settlement_id: i64,
        to: SettlementStatus,
        actor: &str,
    ) -> Result<Settlement, CommissionError> {
        let row: Option<SettlementRow> =
            sqlx::query_as("SELECT * FROM settlements WHERE id = $1")
                .bind(settlement_id)
                .fetch_optional(&self.pool)
                .await?;
        let settlement = row
            .map(Settlement::try_from)
            .transpose()?
            .ok_or(CommissionError::NotFound {
                entity: "settlement",
                id: settlement_id,
            })?;

        check_transition(settlement.status, to)?;
        if settlement.is_locked {
            return Err(CommissionError::SettlementFrozen {
                id: settlement_id,
                status: settlement.status,
                locked: true,
            });
        }

        let row: SettlementRow =
            sqlx::query_as("UPDATE settlements SET status = $2 WHERE id = $1 RETURNING *")
                .bind(settlement_id)
                .bind(to.as_str())
                .fetch_one(&self.pool)
                .await?;
        self.write_audit(
            AuditEntry::new("settlement", settlement_id, "status", actor).with_diff(
                serde_json::json!({ "status": settlement.status.as_str() }),
                serde_json::json!({ "status": to.as_str() }),
            ),
        )
        .await?;
        Settlement::try_from(row)
    }

    pub async fn set_settlement_locked(
        &self,
        settlement_id: i64,
        locked: bool,
        actor: &str,
    ) -> Result<(), CommissionError> {
        let updated = sqlx::query("UPDATE settlements SET is_locked = $2 WHERE id = $1")
            .bind(settlement_id)
            .bind(locked)
            .execute(&self.pool)
            .await?;
        if updated.rows_affected() == 0 {
            return Err(CommissionError::NotFound {
                entity: "settlement",
                id: settlement_id,
            });
        }
        self.write_audit(
            AuditEntry::new("settlement", settlement_id, "lock", actor)
                .with_detail(serde_json::json!({ "locked": locked })),
        )
        .await?;
        Ok(())
    }

    // ── Guards ───────────────────────────────────────────────────────

    /// Refuse mutations whose effect would flow into a frozen settlement.
    async fn guard_settlement_not_frozen(
        &self,
        commission: &Commission,
    ) -> Result<(), CommissionError> {
        let (Some(consultant_id), Some(payout_date)) =
            (commission.consultant_id, commission.payout_date)
        else {
            return Ok(());
        };
        let month = Month::of(payout_date);
        let frozen = self.frozen_settlement_months().await?;
        if frozen.contains(&(month, consultant_id)) {
            let row: Option<SettlementRow> = sqlx::query_as(
                "SELECT * FROM settlements
                 WHERE month = $1 AND employee_id = $2
                 ORDER BY revision DESC LIMIT 1",
            )
            .bind(month.to_string())
            .bind(consultant_id)
            .fetch_optional(&self.pool)
            .await?;
            if let Some(row) = row {
                let settlement = Settlement::try_from(row)?;
                return Err(CommissionError::SettlementFrozen {
                    id: settlement.id,
                    status: settlement.status,
                    locked: settlement.is_locked,
                });
            }
        }
        Ok(())
    }
}

/// Insert one parsed row; the `(carrier, row_hash)` unique index is the
/// last line of defence against concurrent duplicate imports.
async fn insert_commission_row(
    tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
    batch_id: i64,
    carrier: &str,
    row: &SheetRow,
) -> Result<(), CommissionError> {
    sqlx::query(
        "INSERT INTO commissions
            (vsnr, vsnr_normalized, amount, kind, payout_date, carrier, policyholder,
             booking_code_raw, conditions_code, commission_rate, is_relevant,
             row_hash, source_row, batch_id, intermediary_name)
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15)
         ON CONFLICT (carrier, row_hash) DO NOTHING",
    )
    .bind(&row.vsnr)
    .bind(&row.vsnr_normalized)
    .bind(row.amount.0)
    .bind(row.kind.as_str())
    .bind(row.payout_date)
    .bind(carrier)
    .bind(&row.policyholder)
    .bind(&row.booking_code_raw)
    .bind(&row.conditions_code)
    .bind(row.commission_rate)
    .bind(row.is_relevant)
    .bind(&row.row_hash)
    .bind(row.source_row)
    .bind(batch_id)
    .bind(&row.intermediary_name)
    .execute(&mut **tx)
    .await?;
    Ok(())
}
