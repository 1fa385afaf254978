use anyhow::Result;
use sqlx::SqlitePool;

use crate::config::Config;
use crate::db;

pub async fn run_migrations(config: &Config) -> Result<()> {
    let pool = db::connect(config).await?;
    migrate_pool(&pool).await?;
    pool.close().await;
    Ok(())
}

/// Creates every table and index. Idempotent.
pub async fn migrate_pool(pool: &SqlitePool) -> Result<()> {
    // Parent table (PT_main)
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS patents_main (
            patent_number TEXT PRIMARY KEY,
            filing_date TEXT,
            grant_date TEXT,
            application_status_code TEXT,
            application_type_code TEXT,
            title_english TEXT,
            title_french TEXT,
            bibliographic_extract_date TEXT,
            country_publication_code TEXT,
            document_kind_type TEXT,
            examination_request_date TEXT,
            filing_country_code TEXT,
            language_filing_code TEXT,
            license_sale_indicator INTEGER NOT NULL DEFAULT 0,
            pct_application_number TEXT,
            pct_publication_number TEXT,
            pct_publication_date TEXT,
            parent_application_number TEXT,
            pct_article_22_39_date TEXT,
            pct_section_371_date TEXT,
            pct_publication_country_code TEXT,
            publication_kind_type TEXT,
            printed_amended_country_code TEXT,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Child tables. Key columns are NOT NULL DEFAULT '' so that rows with
    // absent key values still collide on re-ingestion.
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS patent_abstracts (
            patent_number TEXT NOT NULL,
            sequence_number INTEGER NOT NULL,
            filing_language_code TEXT,
            abstract_language_code TEXT NOT NULL DEFAULT '',
            abstract_text TEXT,
            updated_at TEXT NOT NULL,
            PRIMARY KEY (patent_number, sequence_number, abstract_language_code)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS patent_claims (
            patent_number TEXT NOT NULL,
            sequence_number INTEGER NOT NULL,
            filing_language_code TEXT,
            claims_text TEXT,
            updated_at TEXT NOT NULL,
            PRIMARY KEY (patent_number, sequence_number)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS patent_disclosures (
            patent_number TEXT NOT NULL,
            sequence_number INTEGER NOT NULL,
            filing_language_code TEXT,
            disclosure_text TEXT,
            updated_at TEXT NOT NULL,
            PRIMARY KEY (patent_number, sequence_number)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS patent_interested_parties (
            patent_number TEXT NOT NULL,
            agent_type_code TEXT,
            applicant_type_code TEXT,
            interested_party_type_code TEXT NOT NULL DEFAULT '',
            interested_party_type TEXT,
            owner_enable_date TEXT NOT NULL DEFAULT '',
            ownership_end_date TEXT,
            party_name TEXT NOT NULL DEFAULT '',
            party_address_line1 TEXT,
            party_address_line2 TEXT,
            party_address_line3 TEXT,
            party_address_line4 TEXT,
            party_address_line5 TEXT,
            party_city TEXT,
            party_province_code TEXT,
            party_province TEXT,
            party_postal_code TEXT,
            party_country_code TEXT,
            party_country TEXT,
            updated_at TEXT NOT NULL,
            PRIMARY KEY (patent_number, interested_party_type_code, party_name, owner_enable_date)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS patent_ipc_classifications (
            patent_number TEXT NOT NULL,
            sequence_number INTEGER NOT NULL,
            ipc_version_date TEXT,
            classification_level TEXT,
            classification_status_code TEXT,
            classification_status TEXT,
            ipc_section_code TEXT,
            ipc_section TEXT,
            ipc_class_code TEXT,
            ipc_class TEXT,
            ipc_subclass_code TEXT,
            ipc_subclass TEXT,
            ipc_main_group_code TEXT,
            ipc_group TEXT,
            ipc_subgroup_code TEXT,
            ipc_subgroup TEXT,
            updated_at TEXT NOT NULL,
            PRIMARY KEY (patent_number, sequence_number)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS patent_priority_claims (
            patent_number TEXT NOT NULL,
            foreign_application_number TEXT NOT NULL DEFAULT '',
            priority_claim_kind_code TEXT,
            priority_claim_country_code TEXT NOT NULL DEFAULT '',
            priority_claim_country TEXT,
            priority_claim_date TEXT,
            updated_at TEXT NOT NULL,
            PRIMARY KEY (patent_number, foreign_application_number, priority_claim_country_code)
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Degraded path for records whose kind could not be determined
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS legacy_patents (
            id TEXT PRIMARY KEY,
            title TEXT,
            description TEXT,
            patent_number TEXT,
            inventor_name TEXT,
            assignee TEXT,
            filing_date TEXT,
            grant_date TEXT,
            classification TEXT,
            status TEXT,
            url TEXT,
            updated_at TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS datasets (
            id TEXT PRIMARY KEY,
            name TEXT,
            title TEXT,
            description TEXT,
            last_updated TEXT,
            processed_at TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS file_cache (
            url TEXT PRIMARY KEY,
            local_path TEXT NOT NULL,
            downloaded_at TEXT NOT NULL,
            file_size INTEGER NOT NULL,
            processed INTEGER NOT NULL DEFAULT 0
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS archive_entries (
            url TEXT NOT NULL,
            entry_name TEXT NOT NULL,
            record_count INTEGER NOT NULL,
            processed_at TEXT NOT NULL,
            PRIMARY KEY (url, entry_name)
        )
        "#,
    )
    .execute(pool)
    .await?;

    let indexes = [
        "CREATE INDEX IF NOT EXISTS idx_patents_main_filing_date ON patents_main (filing_date)",
        "CREATE INDEX IF NOT EXISTS idx_patents_main_status ON patents_main (application_status_code)",
        "CREATE INDEX IF NOT EXISTS idx_patents_main_type ON patents_main (application_type_code)",
        "CREATE INDEX IF NOT EXISTS idx_parties_type ON patent_interested_parties (interested_party_type)",
        "CREATE INDEX IF NOT EXISTS idx_parties_name ON patent_interested_parties (party_name)",
        "CREATE INDEX IF NOT EXISTS idx_ipc_section ON patent_ipc_classifications (ipc_section_code)",
        "CREATE INDEX IF NOT EXISTS idx_ipc_class ON patent_ipc_classifications (ipc_class_code)",
        "CREATE INDEX IF NOT EXISTS idx_priority_country ON patent_priority_claims (priority_claim_country_code)",
        "CREATE INDEX IF NOT EXISTS idx_file_cache_path ON file_cache (local_path)",
    ];

    for index_sql in indexes {
        sqlx::query(index_sql).execute(pool).await?;
    }

    Ok(())
}
