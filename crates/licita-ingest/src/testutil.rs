//! Snapshot fixtures shared by the ingest tests.

use std::path::{Path, PathBuf};

use chrono::{DateTime, TimeZone, Utc};
use licita_core::{SnapshotFile, SnapshotNaming};

/// Builder for one `entry` element.
#[derive(Debug, Clone)]
pub struct EntryXml {
    pub id: String,
    pub updated: String,
    pub org_name: String,
    pub dir3: String,
    pub nif: String,
    pub email: String,
    pub phone: String,
    pub city: String,
    pub status: String,
    pub cpv: Vec<String>,
    pub notices: Vec<(String, String)>,
}

impl EntryXml {
    pub fn new(id: &str, updated: &str) -> Self {
        Self {
            id: id.into(),
            updated: updated.into(),
            org_name: "Ayuntamiento de Ejemplo".into(),
            dir3: String::new(),
            nif: String::new(),
            email: String::new(),
            phone: String::new(),
            city: String::new(),
            status: "PUB".into(),
            cpv: vec!["09134100".into()],
            notices: Vec::new(),
        }
    }

    pub fn org(mut self, name: &str, dir3: &str) -> Self {
        self.org_name = name.into();
        self.dir3 = dir3.into();
        self
    }

    pub fn contact(mut self, email: &str, phone: &str) -> Self {
        self.email = email.into();
        self.phone = phone.into();
        self
    }

    pub fn nif(mut self, nif: &str) -> Self {
        self.nif = nif.into();
        self
    }

    pub fn city(mut self, city: &str) -> Self {
        self.city = city.into();
        self
    }

    pub fn status(mut self, status: &str) -> Self {
        self.status = status.into();
        self
    }

    pub fn cpv(mut self, codes: &[&str]) -> Self {
        self.cpv = codes.iter().map(|c| c.to_string()).collect();
        self
    }

    pub fn notice(mut self, code: &str, issued: &str) -> Self {
        self.notices.push((code.into(), issued.into()));
        self
    }

    pub fn render(&self) -> String {
        let mut ids = String::new();
        if !self.dir3.is_empty() {
            ids.push_str(&format!(
                r#"<cac:PartyIdentification><cbc:ID schemeName="DIR3">{}</cbc:ID></cac:PartyIdentification>"#,
                self.dir3
            ));
        }
        if !self.nif.is_empty() {
            ids.push_str(&format!(
                r#"<cac:PartyIdentification><cbc:ID schemeName="NIF">{}</cbc:ID></cac:PartyIdentification>"#,
                self.nif
            ));
        }
        let cpv: String = self
            .cpv
            .iter()
            .map(|c| {
                format!(
                    "<cac:RequiredCommodityClassification><cbc:ItemClassificationCode>{c}</cbc:ItemClassificationCode></cac:RequiredCommodityClassification>"
                )
            })
            .collect();
        let notices: String = self
            .notices
            .iter()
            .map(|(code, issued)| {
                format!(
                    "<cac-place-ext:ValidNoticeInfo><cbc-place-ext:NoticeTypeCode>{code}</cbc-place-ext:NoticeTypeCode><cac-place-ext:AdditionalPublicationStatus><cac-place-ext:AdditionalPublicationDocumentReference><cbc:IssueDate>{issued}</cbc:IssueDate></cac-place-ext:AdditionalPublicationDocumentReference></cac-place-ext:AdditionalPublicationStatus></cac-place-ext:ValidNoticeInfo>"
                )
            })
            .collect();
        format!(
            r#"<entry>
    <id>{id}</id>
    <link href="{id}/detalle"/>
    <title>Suministro {id}</title>
    <updated>{updated}</updated>
    <cac-place-ext:ContractFolderStatus>
      <cbc-place-ext:ContractFolderStatusCode>{status}</cbc-place-ext:ContractFolderStatusCode>
      <cac-place-ext:LocatedContractingParty>
        <cac:Party>
          {ids}
          <cac:PartyName><cbc:Name>{name}</cbc:Name></cac:PartyName>
          <cac:PostalAddress><cbc:CityName>{city}</cbc:CityName></cac:PostalAddress>
          <cac:Contact><cbc:Telephone>{phone}</cbc:Telephone><cbc:ElectronicMail>{email}</cbc:ElectronicMail></cac:Contact>
        </cac:Party>
      </cac-place-ext:LocatedContractingParty>
      <cac:ProcurementProject>{cpv}</cac:ProcurementProject>
      {notices}
    </cac-place-ext:ContractFolderStatus>
  </entry>"#,
            id = self.id,
            updated = self.updated,
            status = self.status,
            name = self.org_name,
            city = self.city,
            phone = self.phone,
            email = self.email,
        )
    }
}

pub fn feed_document(entries: &[EntryXml], tombstones: &[(&str, &str)]) -> String {
    let mut doc = String::from(
        r#"<?xml version="1.0" encoding="UTF-8"?>
<feed xmlns="http://www.w3.org/2005/Atom" xmlns:at="http://purl.org/atompub/tombstones/1.0" xmlns:cac="urn:cac" xmlns:cbc="urn:cbc" xmlns:cac-place-ext="urn:cac-ext" xmlns:cbc-place-ext="urn:cbc-ext">
  <link href="https://feed/self.atom" rel="self"/>
  <updated>2025-08-18T17:56:02+02:00</updated>
"#,
    );
    for (reference, comment) in tombstones {
        doc.push_str(&format!(
            "  <at:deleted-entry ref=\"{reference}\" when=\"2025-08-18T10:00:00+02:00\"><at:comment type=\"{comment}\"/></at:deleted-entry>\n"
        ));
    }
    for entry in entries {
        doc.push_str("  ");
        doc.push_str(&entry.render());
        doc.push('\n');
    }
    doc.push_str("</feed>\n");
    doc
}

pub fn utc(y: i32, m: u32, d: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(y, m, d, 12, 0, 0).unwrap()
}

/// Write a snapshot named for `at` and return it as the lister would.
pub fn write_snapshot(
    dir: &Path,
    at: DateTime<Utc>,
    sequence: Option<u32>,
    body: &str,
) -> SnapshotFile {
    let naming = SnapshotNaming::default();
    let path: PathBuf = dir.join(naming.file_name(at, sequence));
    std::fs::write(&path, body).unwrap();
    SnapshotFile {
        path,
        timestamp: at,
        sequence,
    }
}
