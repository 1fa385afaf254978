//! Source labels → canonical rows.
//!
//! The bulk exports carry bilingual column headers
//! (`"Filing Date - Date de dépôt"`). Each canonical column lists the
//! labels it has been published under; lookup is exact first, then by the
//! English half of the label, case-insensitively (see
//! [`RawRecord::lookup`]).
//!
//! Values are kept as text except for two coercions: the license-for-sale
//! flag (`"1"` is true) and sequence numbers (integers, defaulting to 1).

use sha2::{Digest, Sha256};

use crate::models::{
    InterestedParty, IpcClassification, LegacyPatent, PatentAbstract, PatentClaim,
    PatentDisclosure, PatentMain, PriorityClaim,
};
use crate::parse::RawRecord;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RecordKind {
    Main,
    Abstract,
    Claim,
    Disclosure,
    InterestedParty,
    IpcClassification,
    PriorityClaim,
    Unknown,
}

impl RecordKind {
    /// Classify a file by name, e.g. `PT_Main_2024.csv` → [`RecordKind::Main`].
    pub fn from_filename(name: &str) -> Self {
        let lower = name.to_lowercase();
        [
            ("pt_main", RecordKind::Main),
            ("pt_abstract", RecordKind::Abstract),
            ("pt_claim", RecordKind::Claim),
            ("pt_disclosure", RecordKind::Disclosure),
            ("pt_interested_party", RecordKind::InterestedParty),
            ("pt_ipc_classification", RecordKind::IpcClassification),
            ("pt_priority_claim", RecordKind::PriorityClaim),
        ]
        .into_iter()
        .find(|(marker, _)| lower.contains(marker))
        .map(|(_, kind)| kind)
        .unwrap_or(RecordKind::Unknown)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            RecordKind::Main => "main",
            RecordKind::Abstract => "abstract",
            RecordKind::Claim => "claim",
            RecordKind::Disclosure => "disclosure",
            RecordKind::InterestedParty => "interested_party",
            RecordKind::IpcClassification => "ipc_classification",
            RecordKind::PriorityClaim => "priority_claim",
            RecordKind::Unknown => "unknown",
        }
    }
}

impl std::fmt::Display for RecordKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Mapped rows of one file, tagged by kind.
#[derive(Debug, Clone, PartialEq)]
pub enum MappedBatch {
    Main(Vec<PatentMain>),
    Abstracts(Vec<PatentAbstract>),
    Claims(Vec<PatentClaim>),
    Disclosures(Vec<PatentDisclosure>),
    InterestedParties(Vec<InterestedParty>),
    IpcClassifications(Vec<IpcClassification>),
    PriorityClaims(Vec<PriorityClaim>),
    Unknown(Vec<LegacyPatent>),
}

impl MappedBatch {
    pub fn kind(&self) -> RecordKind {
        match self {
            MappedBatch::Main(_) => RecordKind::Main,
            MappedBatch::Abstracts(_) => RecordKind::Abstract,
            MappedBatch::Claims(_) => RecordKind::Claim,
            MappedBatch::Disclosures(_) => RecordKind::Disclosure,
            MappedBatch::InterestedParties(_) => RecordKind::InterestedParty,
            MappedBatch::IpcClassifications(_) => RecordKind::IpcClassification,
            MappedBatch::PriorityClaims(_) => RecordKind::PriorityClaim,
            MappedBatch::Unknown(_) => RecordKind::Unknown,
        }
    }

    pub fn len(&self) -> usize {
        match self {
            MappedBatch::Main(rows) => rows.len(),
            MappedBatch::Abstracts(rows) => rows.len(),
            MappedBatch::Claims(rows) => rows.len(),
            MappedBatch::Disclosures(rows) => rows.len(),
            MappedBatch::InterestedParties(rows) => rows.len(),
            MappedBatch::IpcClassifications(rows) => rows.len(),
            MappedBatch::PriorityClaims(rows) => rows.len(),
            MappedBatch::Unknown(rows) => rows.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

// Shared labels
const PATENT_NUMBER: &[&str] = &["Patent Number - Numéro du brevet"];
const CHILD_FILING_LANGUAGE: &[&str] = &[
    "Language of Filing Code - Langue du type de dépôt",
    "Language of Filing Code - Langue du dépôt de la demande",
];

// PT_main
const FILING_DATE: &[&str] = &["Filing Date - Date de dépôt"];
const GRANT_DATE: &[&str] = &["Grant Date - Date de l'octroi"];
const STATUS_CODE: &[&str] = &["Application Status Code - Code du statut de la demande"];
const TYPE_CODE: &[&str] = &["Application Type Code - Code du type de la demande"];
const TITLE_EN: &[&str] = &["Application/Patent Title English - Demande/Titre anglais du brevet"];
const TITLE_FR: &[&str] = &["Application/Patent Title French - Demande/Titre français du brevet"];
const EXTRACT_DATE: &[&str] =
    &["Bibliographic File Extract Date - Date d'extraction du fichier bibliographique"];
const PUBLICATION_COUNTRY: &[&str] = &["Country of Publication Code - Code du pays de publication"];
const DOCUMENT_KIND: &[&str] = &["Document Kind Type - Genre du type de document"];
const EXAMINATION_DATE: &[&str] = &["Examination Request Date - Date de la demande d'examen"];
const FILING_COUNTRY: &[&str] = &["Filing Country Code - Code du pays de dépôt"];
const MAIN_FILING_LANGUAGE: &[&str] = &[
    "Language of Filing Code - Langue du dépôt de la demande",
    "Language of Filing Code - Langue du type de dépôt",
];
const LICENSE_FOR_SALE: &[&str] = &["License For Sale Indicator - Indicateur de la licence de vente"];
const PCT_APPLICATION: &[&str] = &["PCT Application Number - Numéro de demande du TCMB"];
const PCT_PUBLICATION: &[&str] = &["PCT Publication Number - Numéro de publication du TCMB"];
const PCT_PUBLICATION_DATE: &[&str] = &["PCT Publication Date - Date de publication du TCMB"];
const PARENT_APPLICATION: &[&str] = &["Parent Application Number - Numéro de la demande principale"];
const PCT_ARTICLE_DATE: &[&str] = &[
    "PCT Article 22-39 fulfilled Date - Date d'accomplissement des articles 22 à 29 du TCMB",
];
const PCT_371_DATE: &[&str] = &["PCT Section 371 Date - Date de l'article 371 du TCMB"];
const PCT_PUBLICATION_COUNTRY: &[&str] =
    &["PCT Publication Country Code - Code du pays de publication du TCMB"];
const PUBLICATION_KIND: &[&str] = &["Publication Kind Type - Genre de type de publication"];
const AMENDED_COUNTRY: &[&str] = &[
    "Printed as Amended Country Code - Code du pays de la demande imprimée après modification",
];

// PT_abstract / PT_claim / PT_disclosure
const ABSTRACT_SEQUENCE: &[&str] =
    &["Abstract text sequence number - Texte de l'abrégé numéro de séquence"];
const ABSTRACT_LANGUAGE: &[&str] = &["Abstract Language Code - Code de la langue du résumé"];
const ABSTRACT_TEXT: &[&str] = &["Abstract Text - Texte de l'abrégé"];
const CLAIM_SEQUENCE: &[&str] = &[
    "Claims text sequence number - Texte des revendications numéro de séquence",
    "Claim text sequence number - Texte des revendications numéro de séquence",
];
const CLAIM_TEXT: &[&str] = &[
    "Claims Text - Texte des revendications",
    "Claim Text - Texte des revendications",
];
const DISCLOSURE_SEQUENCE: &[&str] =
    &["Disclosure text sequence number - Texte de la divulgation numéro de séquence"];
const DISCLOSURE_TEXT: &[&str] = &["Disclosure Text - Texte de la divulgation"];

// PT_interested_party
const AGENT_TYPE: &[&str] = &["Agent Type Code - Code du type d'agent"];
const APPLICANT_TYPE: &[&str] = &["Applicant Type Code - Code du type de demandeur"];
const PARTY_TYPE_CODE: &[&str] = &["Interested Party Type Code - Code du type de partie intéressée"];
const PARTY_TYPE: &[&str] = &["Interested Party Type - Type de partie intéressée"];
const OWNER_ENABLE_DATE: &[&str] = &["Owner Enable Date - Date de validation du propriétaire"];
const OWNERSHIP_END_DATE: &[&str] = &["Ownership End Date - Date de fin de propriété"];
const PARTY_NAME: &[&str] = &["Party Name - Nom de la partie"];
const PARTY_ADDRESS: [&[&str]; 5] = [
    &["Party Address Line 1 - Adresse de la partie ligne 1"],
    &["Party Address Line 2 - Adresse de la partie ligne 2"],
    &["Party Address Line 3 - Adresse de la partie ligne 3"],
    &["Party Address Line 4 - Adresse de la partie ligne 4"],
    &["Party Address Line 5 - Adresse de la partie ligne 5"],
];
const PARTY_CITY: &[&str] = &["Party City - Ville de la partie"];
const PARTY_PROVINCE_CODE: &[&str] = &["Party Province Code - Code de la province de la partie"];
const PARTY_PROVINCE: &[&str] = &["Party Province - Province de la partie"];
const PARTY_POSTAL_CODE: &[&str] = &["Party Postal Code - Code postal de la partie"];
const PARTY_COUNTRY_CODE: &[&str] = &["Party Country Code - Code du pays de la partie"];
const PARTY_COUNTRY: &[&str] = &["Party Country - Pays de la partie"];

// PT_IPC_classification
const IPC_SEQUENCE: &[&str] = &[
    "IPC Classification Sequence Number - Numéro de séquence de la classification de la CIB",
];
const IPC_VERSION_DATE: &[&str] = &["IPC Version Date - Date de la version de la CIB"];
const CLASSIFICATION_LEVEL: &[&str] = &["Classification Level - Niveau de classification"];
const CLASSIFICATION_STATUS_CODE: &[&str] =
    &["Classification Status Code - Code du statut de classification"];
const CLASSIFICATION_STATUS: &[&str] = &["Classification Status - Statut de classification"];
const IPC_SECTION_CODE: &[&str] = &["IPC Section Code - Code de la section de la CIB"];
const IPC_SECTION: &[&str] = &["IPC Section - Section de la CIB"];
const IPC_CLASS_CODE: &[&str] = &["IPC Class Code - Code de la classe de la CIB"];
const IPC_CLASS: &[&str] = &["IPC Class - Classe de la CIB"];
const IPC_SUBCLASS_CODE: &[&str] = &["IPC Subclass Code - Code de la sous-classe de la CIB"];
const IPC_SUBCLASS: &[&str] = &["IPC Subclass - Sous-classe de la CIB"];
const IPC_MAIN_GROUP_CODE: &[&str] = &["IPC Main Group Code - Code du groupe principal de la CIB"];
const IPC_GROUP: &[&str] = &["IPC Group - Groupe de la CIB"];
const IPC_SUBGROUP_CODE: &[&str] = &["IPC Subgroup Code - Code du sous-groupe de la CIB"];
const IPC_SUBGROUP: &[&str] = &["IPC Subgroup - Sous-groupe de la CIB"];

// PT_priority_claim
const FOREIGN_APPLICATION: &[&str] =
    &["Foreign Application/Patent Number - Numéro du brevet étranger / national"];
const PRIORITY_KIND: &[&str] =
    &["Priority Claim Kind Code - Code de type de revendications de priorité"];
const PRIORITY_COUNTRY_CODE: &[&str] =
    &["Priority Claim Country Code - Code du pays d'origine de revendications de priorité"];
const PRIORITY_COUNTRY: &[&str] =
    &["Priority Claim Country - Pays d'origine de revendications de priorité"];
const PRIORITY_DATE: &[&str] = &["Priority Claim Calendar Dt - Date de revendications de priorité"];

// Unclassified files: common names seen across open-data feeds
const LEGACY_TITLE: &[&str] = &[
    "title",
    "patent_title",
    "name",
    "invention_title",
    "Title - Titre",
    "Application/Patent Title English - Demande/Titre anglais du brevet",
    "Application/Patent Title French - Demande/Titre français du brevet",
];
const LEGACY_DESCRIPTION: &[&str] = &[
    "description",
    "abstract",
    "summary",
    "patent_abstract",
    "Abstract - Abrégé",
    "Abstract Text - Texte de l'abrégé",
];
const LEGACY_NUMBER: &[&str] = &[
    "patent_number",
    "patent_id",
    "application_number",
    "id",
    "Patent Number - Numéro du brevet",
    "Application Number - Numéro de demande",
];
const LEGACY_INVENTOR: &[&str] = &[
    "inventor",
    "inventor_name",
    "inventors",
    "applicant",
    "Inventor Name - Nom de l'inventeur",
];
const LEGACY_ASSIGNEE: &[&str] = &[
    "assignee",
    "assignee_name",
    "owner",
    "applicant_name",
    "Assignee Name - Nom du cessionnaire",
];
const LEGACY_FILING_DATE: &[&str] = &[
    "filing_date",
    "application_date",
    "filed_date",
    "date_filed",
    "Filing Date - Date de dépôt",
    "Application Filing Date - Date de dépôt de la demande",
];
const LEGACY_GRANT_DATE: &[&str] = &[
    "grant_date",
    "issue_date",
    "granted_date",
    "date_granted",
    "Grant Date - Date de l'octroi",
    "Patent Grant Date - Date d'octroi du brevet",
];
const LEGACY_CLASSIFICATION: &[&str] = &[
    "classification",
    "ipc_class",
    "class",
    "category",
    "IPC Class - Classe IPC",
];
const LEGACY_STATUS: &[&str] = &[
    "status",
    "patent_status",
    "state",
    "Application Status Code - Code du statut de la demande",
    "Application Status - État de la demande",
];
const LEGACY_URL: &[&str] = &["url", "link", "patent_url", "href"];

/// Resolved, trimmed value; empty counts as absent.
fn text(record: &RawRecord, aliases: &[&str]) -> Option<String> {
    record
        .lookup(aliases)
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

fn sequence(record: &RawRecord, aliases: &[&str]) -> i64 {
    record
        .lookup(aliases)
        .and_then(|v| v.trim().parse::<i64>().ok())
        .unwrap_or(1)
}

fn flag(record: &RawRecord, aliases: &[&str]) -> bool {
    record.lookup(aliases).map(str::trim) == Some("1")
}

pub fn map_main(record: &RawRecord) -> PatentMain {
    PatentMain {
        patent_number: text(record, PATENT_NUMBER),
        filing_date: text(record, FILING_DATE),
        grant_date: text(record, GRANT_DATE),
        application_status_code: text(record, STATUS_CODE),
        application_type_code: text(record, TYPE_CODE),
        title_english: text(record, TITLE_EN),
        title_french: text(record, TITLE_FR),
        bibliographic_extract_date: text(record, EXTRACT_DATE),
        country_publication_code: text(record, PUBLICATION_COUNTRY),
        document_kind_type: text(record, DOCUMENT_KIND),
        examination_request_date: text(record, EXAMINATION_DATE),
        filing_country_code: text(record, FILING_COUNTRY),
        language_filing_code: text(record, MAIN_FILING_LANGUAGE),
        license_sale_indicator: flag(record, LICENSE_FOR_SALE),
        pct_application_number: text(record, PCT_APPLICATION),
        pct_publication_number: text(record, PCT_PUBLICATION),
        pct_publication_date: text(record, PCT_PUBLICATION_DATE),
        parent_application_number: text(record, PARENT_APPLICATION),
        pct_article_22_39_date: text(record, PCT_ARTICLE_DATE),
        pct_section_371_date: text(record, PCT_371_DATE),
        pct_publication_country_code: text(record, PCT_PUBLICATION_COUNTRY),
        publication_kind_type: text(record, PUBLICATION_KIND),
        printed_amended_country_code: text(record, AMENDED_COUNTRY),
    }
}

pub fn map_abstract(record: &RawRecord) -> PatentAbstract {
    PatentAbstract {
        patent_number: text(record, PATENT_NUMBER),
        sequence_number: sequence(record, ABSTRACT_SEQUENCE),
        filing_language_code: text(record, CHILD_FILING_LANGUAGE),
        abstract_language_code: text(record, ABSTRACT_LANGUAGE),
        abstract_text: text(record, ABSTRACT_TEXT),
    }
}

pub fn map_claim(record: &RawRecord) -> PatentClaim {
    PatentClaim {
        patent_number: text(record, PATENT_NUMBER),
        sequence_number: sequence(record, CLAIM_SEQUENCE),
        filing_language_code: text(record, CHILD_FILING_LANGUAGE),
        claims_text: text(record, CLAIM_TEXT),
    }
}

pub fn map_disclosure(record: &RawRecord) -> PatentDisclosure {
    PatentDisclosure {
        patent_number: text(record, PATENT_NUMBER),
        sequence_number: sequence(record, DISCLOSURE_SEQUENCE),
        filing_language_code: text(record, CHILD_FILING_LANGUAGE),
        disclosure_text: text(record, DISCLOSURE_TEXT),
    }
}

pub fn map_interested_party(record: &RawRecord) -> InterestedParty {
    InterestedParty {
        patent_number: text(record, PATENT_NUMBER),
        agent_type_code: text(record, AGENT_TYPE),
        applicant_type_code: text(record, APPLICANT_TYPE),
        interested_party_type_code: text(record, PARTY_TYPE_CODE),
        interested_party_type: text(record, PARTY_TYPE),
        owner_enable_date: text(record, OWNER_ENABLE_DATE),
        ownership_end_date: text(record, OWNERSHIP_END_DATE),
        party_name: text(record, PARTY_NAME),
        party_address_lines: PARTY_ADDRESS.map(|aliases| text(record, aliases)),
        party_city: text(record, PARTY_CITY),
        party_province_code: text(record, PARTY_PROVINCE_CODE),
        party_province: text(record, PARTY_PROVINCE),
        party_postal_code: text(record, PARTY_POSTAL_CODE),
        party_country_code: text(record, PARTY_COUNTRY_CODE),
        party_country: text(record, PARTY_COUNTRY),
    }
}

pub fn map_ipc_classification(record: &RawRecord) -> IpcClassification {
    IpcClassification {
        patent_number: text(record, PATENT_NUMBER),
        sequence_number: sequence(record, IPC_SEQUENCE),
        ipc_version_date: text(record, IPC_VERSION_DATE),
        classification_level: text(record, CLASSIFICATION_LEVEL),
        classification_status_code: text(record, CLASSIFICATION_STATUS_CODE),
        classification_status: text(record, CLASSIFICATION_STATUS),
        ipc_section_code: text(record, IPC_SECTION_CODE),
        ipc_section: text(record, IPC_SECTION),
        ipc_class_code: text(record, IPC_CLASS_CODE),
        ipc_class: text(record, IPC_CLASS),
        ipc_subclass_code: text(record, IPC_SUBCLASS_CODE),
        ipc_subclass: text(record, IPC_SUBCLASS),
        ipc_main_group_code: text(record, IPC_MAIN_GROUP_CODE),
        ipc_group: text(record, IPC_GROUP),
        ipc_subgroup_code: text(record, IPC_SUBGROUP_CODE),
        ipc_subgroup: text(record, IPC_SUBGROUP),
    }
}

pub fn map_priority_claim(record: &RawRecord) -> PriorityClaim {
    PriorityClaim {
        patent_number: text(record, PATENT_NUMBER),
        foreign_application_number: text(record, FOREIGN_APPLICATION),
        priority_claim_kind_code: text(record, PRIORITY_KIND),
        priority_claim_country_code: text(record, PRIORITY_COUNTRY_CODE),
        priority_claim_country: text(record, PRIORITY_COUNTRY),
        priority_claim_date: text(record, PRIORITY_DATE),
    }
}

/// Best-effort extraction for files of unknown kind. `None` when neither a
/// title nor a patent number can be found.
pub fn map_legacy(record: &RawRecord) -> Option<LegacyPatent> {
    let title = text(record, LEGACY_TITLE);
    let patent_number = text(record, LEGACY_NUMBER);
    if title.is_none() && patent_number.is_none() {
        return None;
    }

    let id = patent_number
        .clone()
        .unwrap_or_else(|| format!("legacy-{}", record_digest(record)));

    Some(LegacyPatent {
        id,
        title,
        description: text(record, LEGACY_DESCRIPTION),
        patent_number,
        inventor_name: text(record, LEGACY_INVENTOR),
        assignee: text(record, LEGACY_ASSIGNEE),
        filing_date: text(record, LEGACY_FILING_DATE),
        grant_date: text(record, LEGACY_GRANT_DATE),
        classification: text(record, LEGACY_CLASSIFICATION),
        status: text(record, LEGACY_STATUS),
        url: text(record, LEGACY_URL),
    })
}

/// Stable 16-hex-char digest over a record's labels and values.
fn record_digest(record: &RawRecord) -> String {
    let mut hasher = Sha256::new();
    for (label, value) in record.iter() {
        hasher.update(label.as_bytes());
        hasher.update(b"\x1f");
        hasher.update(value.as_bytes());
        hasher.update(b"\x1e");
    }
    hex::encode(hasher.finalize())[..16].to_string()
}

/// Map every record of one file. No deduplication happens here.
pub fn map_records(kind: RecordKind, records: &[RawRecord]) -> MappedBatch {
    match kind {
        RecordKind::Main => MappedBatch::Main(records.iter().map(map_main).collect()),
        RecordKind::Abstract => MappedBatch::Abstracts(records.iter().map(map_abstract).collect()),
        RecordKind::Claim => MappedBatch::Claims(records.iter().map(map_claim).collect()),
        RecordKind::Disclosure => {
            MappedBatch::Disclosures(records.iter().map(map_disclosure).collect())
        }
        RecordKind::InterestedParty => {
            MappedBatch::InterestedParties(records.iter().map(map_interested_party).collect())
        }
        RecordKind::IpcClassification => {
            MappedBatch::IpcClassifications(records.iter().map(map_ipc_classification).collect())
        }
        RecordKind::PriorityClaim => {
            MappedBatch::PriorityClaims(records.iter().map(map_priority_claim).collect())
        }
        RecordKind::Unknown => MappedBatch::Unknown(records.iter().filter_map(map_legacy).collect()),
    }
}
