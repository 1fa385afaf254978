//! Normalized patent tables.
//!
//! Every `save_*` call upserts on the table's natural key inside one
//! transaction per `batch_size` rows, so re-ingesting an archive replaces
//! rows instead of duplicating them. Rows without a patent number cannot
//! be keyed and are skipped.

use anyhow::Result;
use chrono::Utc;
use sqlx::query::Query;
use sqlx::sqlite::{Sqlite, SqliteArguments};
use sqlx::{Row, SqlitePool};

use crate::config::Config;
use crate::db;
use crate::mapping::MappedBatch;
use crate::migrate;
use crate::models::{
    DatasetInfo, InterestedParty, IpcClassification, LegacyPatent, PatentAbstract, PatentClaim,
    PatentDisclosure, PatentMain, PriorityClaim,
};

/// Longest dataset description kept in `datasets.description`.
const MAX_NOTES_CHARS: usize = 500;

/// Tables reported by [`PatentStore::table_counts`].
pub const PATENT_TABLES: [&str; 8] = [
    "patents_main",
    "patent_abstracts",
    "patent_claims",
    "patent_disclosures",
    "patent_interested_parties",
    "patent_ipc_classifications",
    "patent_priority_claims",
    "legacy_patents",
];

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SaveReport {
    pub saved: u64,
    pub skipped: u64,
}

#[derive(Clone)]
pub struct PatentStore {
    pool: SqlitePool,
    batch_size: usize,
}

type SqliteQuery<'q> = Query<'q, Sqlite, SqliteArguments<'q>>;

impl PatentStore {
    /// Open the configured database and make sure the schema exists.
    pub async fn open(config: &Config) -> Result<Self> {
        let pool = db::connect(config).await?;
        migrate::migrate_pool(&pool).await?;
        Ok(Self::from_pool(pool, config.ingest.batch_size))
    }

    pub fn from_pool(pool: SqlitePool, batch_size: usize) -> Self {
        Self {
            pool,
            batch_size: batch_size.max(1),
        }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    async fn upsert<'r, T>(
        &self,
        rows: &'r [T],
        now: &'r str,
        key: impl Fn(&T) -> Option<&str>,
        bind: impl Fn(&'r T, &'r str) -> SqliteQuery<'r>,
    ) -> Result<SaveReport> {
        let mut report = SaveReport::default();
        for chunk in rows.chunks(self.batch_size) {
            let mut tx = self.pool.begin().await?;
            let mut saved = 0;
            for row in chunk {
                if key(row).is_none() {
                    report.skipped += 1;
                    continue;
                }
                bind(row, now).execute(&mut *tx).await?;
                saved += 1;
            }
            tx.commit().await?;
            report.saved += saved;
        }
        Ok(report)
    }

    pub async fn save(&self, batch: &MappedBatch) -> Result<SaveReport> {
        match batch {
            MappedBatch::Main(rows) => self.save_main(rows).await,
            MappedBatch::Abstracts(rows) => self.save_abstracts(rows).await,
            MappedBatch::Claims(rows) => self.save_claims(rows).await,
            MappedBatch::Disclosures(rows) => self.save_disclosures(rows).await,
            MappedBatch::InterestedParties(rows) => self.save_interested_parties(rows).await,
            MappedBatch::IpcClassifications(rows) => self.save_ipc_classifications(rows).await,
            MappedBatch::PriorityClaims(rows) => self.save_priority_claims(rows).await,
            MappedBatch::Unknown(rows) => self.save_legacy(rows).await,
        }
    }

    /// Replaces every data column of an existing patent; `created_at` is kept.
    pub async fn save_main(&self, rows: &[PatentMain]) -> Result<SaveReport> {
        let now = Utc::now().to_rfc3339();
        self.upsert(
            rows,
            &now,
            |r| r.patent_number.as_deref(),
            |r, now| {
                sqlx::query(
                    r#"
                    INSERT INTO patents_main (
                        patent_number, filing_date, grant_date, application_status_code,
                        application_type_code, title_english, title_french,
                        bibliographic_extract_date, country_publication_code, document_kind_type,
                        examination_request_date, filing_country_code, language_filing_code,
                        license_sale_indicator, pct_application_number, pct_publication_number,
                        pct_publication_date, parent_application_number, pct_article_22_39_date,
                        pct_section_371_date, pct_publication_country_code, publication_kind_type,
                        printed_amended_country_code, created_at, updated_at
                    ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
                    ON CONFLICT(patent_number) DO UPDATE SET
                        filing_date = excluded.filing_date,
                        grant_date = excluded.grant_date,
                        application_status_code = excluded.application_status_code,
                        application_type_code = excluded.application_type_code,
                        title_english = excluded.title_english,
                        title_french = excluded.title_french,
                        bibliographic_extract_date = excluded.bibliographic_extract_date,
                        country_publication_code = excluded.country_publication_code,
                        document_kind_type = excluded.document_kind_type,
                        examination_request_date = excluded.examination_request_date,
                        filing_country_code = excluded.filing_country_code,
                        language_filing_code = excluded.language_filing_code,
                        license_sale_indicator = excluded.license_sale_indicator,
                        pct_application_number = excluded.pct_application_number,
                        pct_publication_number = excluded.pct_publication_number,
                        pct_publication_date = excluded.pct_publication_date,
                        parent_application_number = excluded.parent_application_number,
                        pct_article_22_39_date = excluded.pct_article_22_39_date,
                        pct_section_371_date = excluded.pct_section_371_date,
                        pct_publication_country_code = excluded.pct_publication_country_code,
                        publication_kind_type = excluded.publication_kind_type,
                        printed_amended_country_code = excluded.printed_amended_country_code,
                        updated_at = excluded.updated_at
                    "#,
                )
                .bind(r.patent_number.as_deref())
                .bind(r.filing_date.as_deref())
                .bind(r.grant_date.as_deref())
                .bind(r.application_status_code.as_deref())
                .bind(r.application_type_code.as_deref())
                .bind(r.title_english.as_deref())
                .bind(r.title_french.as_deref())
                .bind(r.bibliographic_extract_date.as_deref())
                .bind(r.country_publication_code.as_deref())
                .bind(r.document_kind_type.as_deref())
                .bind(r.examination_request_date.as_deref())
                .bind(r.filing_country_code.as_deref())
                .bind(r.language_filing_code.as_deref())
                .bind(r.license_sale_indicator)
                .bind(r.pct_application_number.as_deref())
                .bind(r.pct_publication_number.as_deref())
                .bind(r.pct_publication_date.as_deref())
                .bind(r.parent_application_number.as_deref())
                .bind(r.pct_article_22_39_date.as_deref())
                .bind(r.pct_section_371_date.as_deref())
                .bind(r.pct_publication_country_code.as_deref())
                .bind(r.publication_kind_type.as_deref())
                .bind(r.printed_amended_country_code.as_deref())
                .bind(now)
                .bind(now)
            },
        )
        .await
    }

    pub async fn save_abstracts(&self, rows: &[PatentAbstract]) -> Result<SaveReport> {
        let now = Utc::now().to_rfc3339();
        self.upsert(
            rows,
            &now,
            |r| r.patent_number.as_deref(),
            |r, now| {
                sqlx::query(
                    r#"
                    INSERT INTO patent_abstracts (
                        patent_number, sequence_number, filing_language_code,
                        abstract_language_code, abstract_text, updated_at
                    ) VALUES (?, ?, ?, ?, ?, ?)
                    ON CONFLICT(patent_number, sequence_number, abstract_language_code) DO UPDATE SET
                        filing_language_code = excluded.filing_language_code,
                        abstract_text = excluded.abstract_text,
                        updated_at = excluded.updated_at
                    "#,
                )
                .bind(r.patent_number.as_deref())
                .bind(r.sequence_number)
                .bind(r.filing_language_code.as_deref())
                .bind(r.abstract_language_code.as_deref().unwrap_or(""))
                .bind(r.abstract_text.as_deref())
                .bind(now)
            },
        )
        .await
    }

    pub async fn save_claims(&self, rows: &[PatentClaim]) -> Result<SaveReport> {
        let now = Utc::now().to_rfc3339();
        self.upsert(
            rows,
            &now,
            |r| r.patent_number.as_deref(),
            |r, now| {
                sqlx::query(
                    r#"
                    INSERT INTO patent_claims (
                        patent_number, sequence_number, filing_language_code, claims_text, updated_at
                    ) VALUES (?, ?, ?, ?, ?)
                    ON CONFLICT(patent_number, sequence_number) DO UPDATE SET
                        filing_language_code = excluded.filing_language_code,
                        claims_text = excluded.claims_text,
                        updated_at = excluded.updated_at
                    "#,
                )
                .bind(r.patent_number.as_deref())
                .bind(r.sequence_number)
                .bind(r.filing_language_code.as_deref())
                .bind(r.claims_text.as_deref())
                .bind(now)
            },
        )
        .await
    }

    pub async fn save_disclosures(&self, rows: &[PatentDisclosure]) -> Result<SaveReport> {
        let now = Utc::now().to_rfc3339();
        self.upsert(
            rows,
            &now,
            |r| r.patent_number.as_deref(),
            |r, now| {
                sqlx::query(
                    r#"
                    INSERT INTO patent_disclosures (
                        patent_number, sequence_number, filing_language_code, disclosure_text, updated_at
                    ) VALUES (?, ?, ?, ?, ?)
                    ON CONFLICT(patent_number, sequence_number) DO UPDATE SET
                        filing_language_code = excluded.filing_language_code,
                        disclosure_text = excluded.disclosure_text,
                        updated_at = excluded.updated_at
                    "#,
                )
                .bind(r.patent_number.as_deref())
                .bind(r.sequence_number)
                .bind(r.filing_language_code.as_deref())
                .bind(r.disclosure_text.as_deref())
                .bind(now)
            },
        )
        .await
    }

    pub async fn save_interested_parties(&self, rows: &[InterestedParty]) -> Result<SaveReport> {
        let now = Utc::now().to_rfc3339();
        self.upsert(
            rows,
            &now,
            |r| r.patent_number.as_deref(),
            |r, now| {
                let [line1, line2, line3, line4, line5] = &r.party_address_lines;
                sqlx::query(
                    r#"
                    INSERT INTO patent_interested_parties (
                        patent_number, agent_type_code, applicant_type_code,
                        interested_party_type_code, interested_party_type, owner_enable_date,
                        ownership_end_date, party_name, party_address_line1, party_address_line2,
                        party_address_line3, party_address_line4, party_address_line5, party_city,
                        party_province_code, party_province, party_postal_code, party_country_code,
                        party_country, updated_at
                    ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
                    ON CONFLICT(patent_number, interested_party_type_code, party_name, owner_enable_date)
                    DO UPDATE SET
                        agent_type_code = excluded.agent_type_code,
                        applicant_type_code = excluded.applicant_type_code,
                        interested_party_type = excluded.interested_party_type,
                        ownership_end_date = excluded.ownership_end_date,
                        party_address_line1 = excluded.party_address_line1,
                        party_address_line2 = excluded.party_address_line2,
                        party_address_line3 = excluded.party_address_line3,
                        party_address_line4 = excluded.party_address_line4,
                        party_address_line5 = excluded.party_address_line5,
                        party_city = excluded.party_city,
                        party_province_code = excluded.party_province_code,
                        party_province = excluded.party_province,
                        party_postal_code = excluded.party_postal_code,
                        party_country_code = excluded.party_country_code,
                        party_country = excluded.party_country,
                        updated_at = excluded.updated_at
                    "#,
                )
                .bind(r.patent_number.as_deref())
                .bind(r.agent_type_code.as_deref())
                .bind(r.applicant_type_code.as_deref())
                .bind(r.interested_party_type_code.as_deref().unwrap_or(""))
                .bind(r.interested_party_type.as_deref())
                .bind(r.owner_enable_date.as_deref().unwrap_or(""))
                .bind(r.ownership_end_date.as_deref())
                .bind(r.party_name.as_deref().unwrap_or(""))
                .bind(line1.as_deref())
                .bind(line2.as_deref())
                .bind(line3.as_deref())
                .bind(line4.as_deref())
                .bind(line5.as_deref())
                .bind(r.party_city.as_deref())
                .bind(r.party_province_code.as_deref())
                .bind(r.party_province.as_deref())
                .bind(r.party_postal_code.as_deref())
                .bind(r.party_country_code.as_deref())
                .bind(r.party_country.as_deref())
                .bind(now)
            },
        )
        .await
    }

    pub async fn save_ipc_classifications(&self, rows: &[IpcClassification]) -> Result<SaveReport> {
        let now = Utc::now().to_rfc3339();
        self.upsert(
            rows,
            &now,
            |r| r.patent_number.as_deref(),
            |r, now| {
                sqlx::query(
                    r#"
                    INSERT INTO patent_ipc_classifications (
                        patent_number, sequence_number, ipc_version_date, classification_level,
                        classification_status_code, classification_status, ipc_section_code,
                        ipc_section, ipc_class_code, ipc_class, ipc_subclass_code, ipc_subclass,
                        ipc_main_group_code, ipc_group, ipc_subgroup_code, ipc_subgroup, updated_at
                    ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
                    ON CONFLICT(patent_number, sequence_number) DO UPDATE SET
                        ipc_version_date = excluded.ipc_version_date,
                        classification_level = excluded.classification_level,
                        classification_status_code = excluded.classification_status_code,
                        classification_status = excluded.classification_status,
                        ipc_section_code = excluded.ipc_section_code,
                        ipc_section = excluded.ipc_section,
                        ipc_class_code = excluded.ipc_class_code,
                        ipc_class = excluded.ipc_class,
                        ipc_subclass_code = excluded.ipc_subclass_code,
                        ipc_subclass = excluded.ipc_subclass,
                        ipc_main_group_code = excluded.ipc_main_group_code,
                        ipc_group = excluded.ipc_group,
                        ipc_subgroup_code = excluded.ipc_subgroup_code,
                        ipc_subgroup = excluded.ipc_subgroup,
                        updated_at = excluded.updated_at
                    "#,
                )
                .bind(r.patent_number.as_deref())
                .bind(r.sequence_number)
                .bind(r.ipc_version_date.as_deref())
                .bind(r.classification_level.as_deref())
                .bind(r.classification_status_code.as_deref())
                .bind(r.classification_status.as_deref())
                .bind(r.ipc_section_code.as_deref())
                .bind(r.ipc_section.as_deref())
                .bind(r.ipc_class_code.as_deref())
                .bind(r.ipc_class.as_deref())
                .bind(r.ipc_subclass_code.as_deref())
                .bind(r.ipc_subclass.as_deref())
                .bind(r.ipc_main_group_code.as_deref())
                .bind(r.ipc_group.as_deref())
                .bind(r.ipc_subgroup_code.as_deref())
                .bind(r.ipc_subgroup.as_deref())
                .bind(now)
            },
        )
        .await
    }

    pub async fn save_priority_claims(&self, rows: &[PriorityClaim]) -> Result<SaveReport> {
        let now = Utc::now().to_rfc3339();
        self.upsert(
            rows,
            &now,
            |r| r.patent_number.as_deref(),
            |r, now| {
                sqlx::query(
                    r#"
                    INSERT INTO patent_priority_claims (
                        patent_number, foreign_application_number, priority_claim_kind_code,
                        priority_claim_country_code, priority_claim_country, priority_claim_date,
                        updated_at
                    ) VALUES (?, ?, ?, ?, ?, ?, ?)
                    ON CONFLICT(patent_number, foreign_application_number, priority_claim_country_code)
                    DO UPDATE SET
                        priority_claim_kind_code = excluded.priority_claim_kind_code,
                        priority_claim_country = excluded.priority_claim_country,
                        priority_claim_date = excluded.priority_claim_date,
                        updated_at = excluded.updated_at
                    "#,
                )
                .bind(r.patent_number.as_deref())
                .bind(r.foreign_application_number.as_deref().unwrap_or(""))
                .bind(r.priority_claim_kind_code.as_deref())
                .bind(r.priority_claim_country_code.as_deref().unwrap_or(""))
                .bind(r.priority_claim_country.as_deref())
                .bind(r.priority_claim_date.as_deref())
                .bind(now)
            },
        )
        .await
    }

    /// Legacy rows are keyed by their derived id, which always exists.
    pub async fn save_legacy(&self, rows: &[LegacyPatent]) -> Result<SaveReport> {
        let now = Utc::now().to_rfc3339();
        self.upsert(
            rows,
            &now,
            |r| Some(r.id.as_str()),
            |r, now| {
                sqlx::query(
                    r#"
                    INSERT INTO legacy_patents (
                        id, title, description, patent_number, inventor_name, assignee,
                        filing_date, grant_date, classification, status, url, updated_at
                    ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
                    ON CONFLICT(id) DO UPDATE SET
                        title = excluded.title,
                        description = excluded.description,
                        patent_number = excluded.patent_number,
                        inventor_name = excluded.inventor_name,
                        assignee = excluded.assignee,
                        filing_date = excluded.filing_date,
                        grant_date = excluded.grant_date,
                        classification = excluded.classification,
                        status = excluded.status,
                        url = excluded.url,
                        updated_at = excluded.updated_at
                    "#,
                )
                .bind(r.id.as_str())
                .bind(r.title.as_deref())
                .bind(r.description.as_deref())
                .bind(r.patent_number.as_deref())
                .bind(r.inventor_name.as_deref())
                .bind(r.assignee.as_deref())
                .bind(r.filing_date.as_deref())
                .bind(r.grant_date.as_deref())
                .bind(r.classification.as_deref())
                .bind(r.status.as_deref())
                .bind(r.url.as_deref())
                .bind(now)
            },
        )
        .await
    }

    pub async fn patent_count(&self) -> Result<i64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM patents_main")
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }

    /// Row count per patent table, in [`PATENT_TABLES`] order.
    pub async fn table_counts(&self) -> Result<Vec<(&'static str, i64)>> {
        let mut counts = Vec::with_capacity(PATENT_TABLES.len());
        for table in PATENT_TABLES {
            let count: i64 = sqlx::query_scalar(&format!("SELECT COUNT(*) FROM {}", table))
                .fetch_one(&self.pool)
                .await?;
            counts.push((table, count));
        }
        Ok(counts)
    }

    pub async fn get_main(&self, patent_number: &str) -> Result<Option<PatentMain>> {
        let row = sqlx::query("SELECT * FROM patents_main WHERE patent_number = ?")
            .bind(patent_number)
            .fetch_optional(&self.pool)
            .await?;

        Ok(row.map(|row| PatentMain {
            patent_number: row.get("patent_number"),
            filing_date: row.get("filing_date"),
            grant_date: row.get("grant_date"),
            application_status_code: row.get("application_status_code"),
            application_type_code: row.get("application_type_code"),
            title_english: row.get("title_english"),
            title_french: row.get("title_french"),
            bibliographic_extract_date: row.get("bibliographic_extract_date"),
            country_publication_code: row.get("country_publication_code"),
            document_kind_type: row.get("document_kind_type"),
            examination_request_date: row.get("examination_request_date"),
            filing_country_code: row.get("filing_country_code"),
            language_filing_code: row.get("language_filing_code"),
            license_sale_indicator: row.get::<i64, _>("license_sale_indicator") != 0,
            pct_application_number: row.get("pct_application_number"),
            pct_publication_number: row.get("pct_publication_number"),
            pct_publication_date: row.get("pct_publication_date"),
            parent_application_number: row.get("parent_application_number"),
            pct_article_22_39_date: row.get("pct_article_22_39_date"),
            pct_section_371_date: row.get("pct_section_371_date"),
            pct_publication_country_code: row.get("pct_publication_country_code"),
            publication_kind_type: row.get("publication_kind_type"),
            printed_amended_country_code: row.get("printed_amended_country_code"),
        }))
    }

    /// Upsert the catalog description of a dataset after its resources ran.
    pub async fn record_dataset(&self, info: &DatasetInfo) -> Result<()> {
        let description: Option<String> = info
            .notes
            .as_deref()
            .map(|n| n.chars().take(MAX_NOTES_CHARS).collect());

        sqlx::query(
            r#"
            INSERT INTO datasets (id, name, title, description, last_updated, processed_at)
            VALUES (?, ?, ?, ?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET
                name = excluded.name,
                title = excluded.title,
                description = excluded.description,
                last_updated = excluded.last_updated,
                processed_at = excluded.processed_at
            "#,
        )
        .bind(&info.id)
        .bind(&info.name)
        .bind(&info.title)
        .bind(description)
        .bind(&info.metadata_modified)
        .bind(Utc::now().to_rfc3339())
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}
