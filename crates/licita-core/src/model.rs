//! Tender entries and their contract-folder state (CODICE `ContractFolderStatus`).
//!
//! Every optional sub-structure of the feed is an explicit `Option` or an
//! empty collection; scalar fields fall back to empty strings and the zero
//! sentinels of [`crate::fields`].

use std::fmt;

use chrono::{DateTime, Utc};

use crate::FeedError;
use crate::fields::{Amount, Code, DateOnly, parse_timestamp};
use crate::xml::XmlNode;

/// Notice type code of the contract notice (`Anuncio de licitación`).
pub const CONTRACT_NOTICE: &str = "DOC_CN";

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Link {
    pub rel: String,
    pub href: String,
}

impl Link {
    pub fn from_node(node: &XmlNode) -> Self {
        Self {
            rel: node.attr("rel").unwrap_or_default().to_string(),
            href: node.attr("href").unwrap_or_default().to_string(),
        }
    }
}

/// One tender as published in one snapshot.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Entry {
    /// Stable global identifier of the tender across snapshots.
    pub id: String,
    pub title: String,
    pub summary: String,
    pub updated: Option<DateTime<Utc>>,
    pub links: Vec<Link>,
    pub contract: ContractState,
}

impl Entry {
    /// Map an `entry` element. Only an unparseable `updated` timestamp
    /// rejects the entry; every other field degrades to its empty value.
    pub fn from_node(node: &XmlNode) -> Result<Self, FeedError> {
        let id = node.text_at(&["id"]);
        let updated = match node.child("updated").map(XmlNode::text) {
            Some(raw) if !raw.is_empty() => {
                Some(parse_timestamp(raw).map_err(|e| FeedError::InvalidEntry {
                    id: id.clone(),
                    reason: e.to_string(),
                })?)
            }
            _ => None,
        };

        Ok(Self {
            title: node.text_at(&["title"]),
            summary: node.text_at(&["summary"]),
            updated,
            links: node.children_named("link").map(Link::from_node).collect(),
            contract: node
                .child("ContractFolderStatus")
                .map(ContractState::from_node)
                .unwrap_or_default(),
            id,
        })
    }

    /// URL of the tender's public page (first link of the entry).
    pub fn tender_url(&self) -> &str {
        self.links.first().map(|l| l.href.as_str()).unwrap_or_default()
    }

    /// Issue date of the first contract notice (`DOC_CN`), if valid.
    pub fn contract_notice_date(&self) -> Option<DateTime<Utc>> {
        self.contract
            .notices
            .iter()
            .find(|n| n.notice_type.value.eq_ignore_ascii_case(CONTRACT_NOTICE))
            .and_then(|n| n.issue_date.get())
    }

    pub fn commodity_codes(&self) -> impl Iterator<Item = &str> {
        self.contract
            .project
            .commodity_codes
            .iter()
            .map(|c| c.value.as_str())
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ContractState {
    pub folder_id: String,
    /// Lifecycle status (PUB, EV, ADJ, RES, ANUL, ...).
    pub status_code: Code,
    pub contracting_party: ContractingParty,
    pub project: ProcurementProject,
    /// Present once the tender is awarded or resolved.
    pub result: Option<TenderResult>,
    pub terms: Option<TenderingTerms>,
    pub process: TenderingProcess,
    pub legal_docs: Vec<DocumentReference>,
    pub technical_docs: Vec<DocumentReference>,
    /// Publication trail, in document order.
    pub notices: Vec<Notice>,
    pub general_docs: Vec<DocumentReference>,
}

impl ContractState {
    pub fn from_node(node: &XmlNode) -> Self {
        Self {
            folder_id: node.text_at(&["ContractFolderID"]),
            status_code: Code::at(node, &["ContractFolderStatusCode"]),
            contracting_party: node
                .child("LocatedContractingParty")
                .map(ContractingParty::from_node)
                .unwrap_or_default(),
            project: node
                .child("ProcurementProject")
                .map(ProcurementProject::from_node)
                .unwrap_or_default(),
            result: node.child("TenderResult").map(TenderResult::from_node),
            terms: node.child("TenderingTerms").map(|n| TenderingTerms {
                language_id: n.text_at(&["Language", "ID"]),
            }),
            process: node
                .child("TenderingProcess")
                .map(TenderingProcess::from_node)
                .unwrap_or_default(),
            legal_docs: node
                .children_named("LegalDocumentReference")
                .map(DocumentReference::from_node)
                .collect(),
            technical_docs: node
                .children_named("TechnicalDocumentReference")
                .map(DocumentReference::from_node)
                .collect(),
            notices: node
                .children_named("ValidNoticeInfo")
                .map(Notice::from_node)
                .collect(),
            general_docs: node
                .children_named("GeneralDocument")
                .filter_map(|n| n.child("GeneralDocumentDocumentReference"))
                .map(DocumentReference::from_node)
                .collect(),
        }
    }
}

/// Aggregation key of a contracting organization.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum OrganizationKey {
    Dir3(String),
    /// Whitespace-collapsed, upper-cased name.
    Name(String),
}

impl fmt::Display for OrganizationKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Dir3(code) => write!(f, "DIR3:{code}"),
            Self::Name(name) => write!(f, "NAME:{name}"),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ContractingParty {
    pub party_type: Code,
    pub activity_codes: Vec<Code>,
    pub buyer_profile_uri: String,
    pub party: Party,
}

impl ContractingParty {
    pub fn from_node(node: &XmlNode) -> Self {
        Self {
            party_type: Code::at(node, &["ContractingPartyTypeCode"]),
            activity_codes: node
                .children_named("ActivityCode")
                .map(Code::from_node)
                .collect(),
            buyer_profile_uri: node.text_at(&["BuyerProfileURIID"]),
            party: node.child("Party").map(Party::from_node).unwrap_or_default(),
        }
    }

    /// DIR3 code when published, otherwise the normalized organization name.
    pub fn organization_key(&self) -> OrganizationKey {
        match self.party.identification("DIR3") {
            Some(dir3) => OrganizationKey::Dir3(dir3.trim().to_uppercase()),
            None => OrganizationKey::Name(normalize_name(&self.party.name)),
        }
    }
}

pub fn normalize_name(name: &str) -> String {
    name.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_uppercase()
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PartyIdentification {
    /// DIR3, NIF, ID_PLATAFORMA, ...
    pub scheme_name: String,
    pub value: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Party {
    pub name: String,
    pub website_uri: String,
    pub identifications: Vec<PartyIdentification>,
    pub postal_address: Option<Address>,
    pub contact: Option<Contact>,
}

impl Party {
    pub fn from_node(node: &XmlNode) -> Self {
        Self {
            name: node.text_at(&["PartyName", "Name"]),
            website_uri: node.text_at(&["WebsiteURI"]),
            identifications: identifications(node),
            postal_address: node.child("PostalAddress").map(Address::from_node),
            contact: node.child("Contact").map(|n| Contact {
                name: n.text_at(&["Name"]),
                telephone: n.text_at(&["Telephone"]),
                email: n.text_at(&["ElectronicMail"]),
            }),
        }
    }

    /// First non-empty identification under `scheme` (case-insensitive).
    pub fn identification(&self, scheme: &str) -> Option<&str> {
        self.identifications
            .iter()
            .find(|i| i.scheme_name.eq_ignore_ascii_case(scheme) && !i.value.is_empty())
            .map(|i| i.value.as_str())
    }
}

fn identifications(node: &XmlNode) -> Vec<PartyIdentification> {
    node.children_named("PartyIdentification")
        .filter_map(|n| n.child("ID"))
        .map(|id| PartyIdentification {
            scheme_name: id.attr("schemeName").unwrap_or_default().to_string(),
            value: id.text().to_string(),
        })
        .collect()
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Address {
    pub city: String,
    pub postal_zone: String,
    pub line: String,
    pub country_code: Code,
    pub country_name: String,
}

impl Address {
    pub fn from_node(node: &XmlNode) -> Self {
        Self {
            city: node.text_at(&["CityName"]),
            postal_zone: node.text_at(&["PostalZone"]),
            line: node.text_at(&["AddressLine", "Line"]),
            country_code: Code::at(node, &["Country", "IdentificationCode"]),
            country_name: node.text_at(&["Country", "Name"]),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Contact {
    pub name: String,
    pub telephone: String,
    pub email: String,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProcurementProject {
    pub name: String,
    pub type_code: Code,
    pub sub_type_code: Code,
    pub mix_contract_indicator: String,
    pub budget: Option<Budget>,
    /// CPV codes (`RequiredCommodityClassification/ItemClassificationCode`).
    pub commodity_codes: Vec<Code>,
    pub location: Option<RealizedLocation>,
    pub planned_duration: Option<Measure>,
    pub extension: Option<ContractExtension>,
}

impl ProcurementProject {
    pub fn from_node(node: &XmlNode) -> Self {
        Self {
            name: node.text_at(&["Name"]),
            type_code: Code::at(node, &["TypeCode"]),
            sub_type_code: Code::at(node, &["SubTypeCode"]),
            mix_contract_indicator: node.text_at(&["MixContractIndicator"]),
            budget: node.child("BudgetAmount").map(|n| Budget {
                estimated_overall: Amount::at(n, &["EstimatedOverallContractAmount"]),
                total: Amount::at(n, &["TotalAmount"]),
                tax_exclusive: Amount::at(n, &["TaxExclusiveAmount"]),
            }),
            commodity_codes: node
                .children_named("RequiredCommodityClassification")
                .filter_map(|n| n.child("ItemClassificationCode"))
                .map(Code::from_node)
                .collect(),
            location: node.child("RealizedLocation").map(|n| RealizedLocation {
                nuts: Code::at(n, &["CountrySubentityCode"]),
                country_code: Code::at(n, &["Address", "Country", "IdentificationCode"]),
                country_name: n.text_at(&["Address", "Country", "Name"]),
            }),
            planned_duration: node
                .at(&["PlannedPeriod", "DurationMeasure"])
                .map(Measure::from_node),
            extension: node
                .at(&["ContractExtension", "OptionValidityPeriod"])
                .map(|n| ContractExtension {
                    description: n.text_at(&["Description"]),
                    start_date: n.child("StartDate").map(|d| DateOnly::parse(d.text())),
                    end_date: n.child("EndDate").map(|d| DateOnly::parse(d.text())),
                    duration: n.child("DurationMeasure").map(Measure::from_node),
                }),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Budget {
    pub estimated_overall: Amount,
    pub total: Amount,
    pub tax_exclusive: Amount,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RealizedLocation {
    /// NUTS region code.
    pub nuts: Code,
    pub country_code: Code,
    pub country_name: String,
}

/// A duration such as `12 MON`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Measure {
    /// `None` when the published value is not an integer.
    pub value: Option<u32>,
    /// DAY, MON, ANN.
    pub unit_code: String,
}

impl Measure {
    pub fn from_node(node: &XmlNode) -> Self {
        Self {
            value: node.text().parse().ok(),
            unit_code: node.attr("unitCode").unwrap_or_default().to_string(),
        }
    }
}

/// Option validity period of a contract extension.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ContractExtension {
    pub description: String,
    pub start_date: Option<DateOnly>,
    pub end_date: Option<DateOnly>,
    pub duration: Option<Measure>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct TenderResult {
    pub result_code: Code,
    pub award_date: DateOnly,
    pub winning_parties: Vec<WinningParty>,
    pub awarded: Option<AwardedTotals>,
}

impl TenderResult {
    pub fn from_node(node: &XmlNode) -> Self {
        Self {
            result_code: Code::at(node, &["ResultCode"]),
            award_date: DateOnly::at(node, &["AwardDate"]),
            winning_parties: node
                .children_named("WinningParty")
                .map(|n| WinningParty {
                    name: n.text_at(&["PartyName", "Name"]),
                    identifications: identifications(n),
                    nuts: Code::at(n, &["PhysicalLocation", "CountrySubentityCode"]),
                })
                .collect(),
            awarded: node
                .at(&["AwardedTenderedProject", "LegalMonetaryTotal"])
                .map(|n| AwardedTotals {
                    tax_exclusive: Amount::at(n, &["TaxExclusiveAmount"]),
                    payable: Amount::at(n, &["PayableAmount"]),
                }),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WinningParty {
    pub name: String,
    pub identifications: Vec<PartyIdentification>,
    pub nuts: Code,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct AwardedTotals {
    pub tax_exclusive: Amount,
    pub payable: Amount,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TenderingTerms {
    pub language_id: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TenderingProcess {
    pub procedure_code: Code,
    pub urgency_code: Code,
    pub contracting_system_code: Code,
    pub submission_method_code: Code,
    pub over_threshold_indicator: String,
    pub submission_deadline: Option<SubmissionDeadline>,
}

impl TenderingProcess {
    pub fn from_node(node: &XmlNode) -> Self {
        Self {
            procedure_code: Code::at(node, &["ProcedureCode"]),
            urgency_code: Code::at(node, &["UrgencyCode"]),
            contracting_system_code: Code::at(node, &["ContractingSystemCode"]),
            submission_method_code: Code::at(node, &["SubmissionMethodCode"]),
            over_threshold_indicator: node.text_at(&["OverThresholdIndicator"]),
            submission_deadline: node
                .child("TenderSubmissionDeadlinePeriod")
                .map(|n| SubmissionDeadline {
                    end_date: DateOnly::at(n, &["EndDate"]),
                    end_time: n.text_at(&["EndTime"]),
                    description: n.text_at(&["Description"]),
                }),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SubmissionDeadline {
    pub end_date: DateOnly,
    pub end_time: String,
    pub description: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DocumentReference {
    pub id: String,
    pub uri: String,
    pub file_name: String,
    pub document_hash: String,
}

impl DocumentReference {
    pub fn from_node(node: &XmlNode) -> Self {
        let external = node.at(&["Attachment", "ExternalReference"]);
        let text = |name: &str| external.map(|n| n.text_at(&[name])).unwrap_or_default();
        Self {
            id: node.text_at(&["ID"]),
            uri: text("URI"),
            file_name: text("FileName"),
            document_hash: text("DocumentHash"),
        }
    }
}

/// One entry of the publication trail (`ValidNoticeInfo`).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Notice {
    /// DOC_CN, DOC_CAN_ADJ, DOC_FORM, ...
    pub notice_type: Code,
    pub publication_media_name: String,
    pub issue_date: DateOnly,
}

impl Notice {
    pub fn from_node(node: &XmlNode) -> Self {
        let status = node.child("AdditionalPublicationStatus");
        Self {
            notice_type: Code::at(node, &["NoticeTypeCode"]),
            publication_media_name: status
                .map(|s| s.text_at(&["PublicationMediaName"]))
                .unwrap_or_default(),
            issue_date: status
                .map(|s| {
                    DateOnly::at(s, &["AdditionalPublicationDocumentReference", "IssueDate"])
                })
                .unwrap_or_default(),
        }
    }
}

/// A `deleted-entry` marker: the referenced entry was withdrawn.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Tombstone {
    pub when: Option<DateTime<Utc>>,
    /// ID of the withdrawn entry.
    pub reference: String,
    /// Reason from `comment@type` (ANULADA, CERRADA, ...).
    pub comment_type: String,
}

impl Tombstone {
    pub fn from_node(node: &XmlNode) -> Result<Self, FeedError> {
        let reference = node.attr("ref").unwrap_or_default().to_string();
        let when = match node.attr("when").map(str::trim) {
            Some(raw) if !raw.is_empty() => {
                Some(parse_timestamp(raw).map_err(|e| FeedError::InvalidEntry {
                    id: reference.clone(),
                    reason: e.to_string(),
                })?)
            }
            _ => None,
        };
        Ok(Self {
            when,
            comment_type: node
                .child("comment")
                .and_then(|c| c.attr("type"))
                .unwrap_or_default()
                .to_string(),
            reference,
        })
    }
}
