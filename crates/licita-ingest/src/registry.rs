//! Registry of contracting organizations aggregated across snapshots.
//!
//! Every display field remembers the recency of the observation that
//! supplied it. A non-empty value replaces the stored one when it is
//! strictly newer, or equally recent and lexicographically greater; blanks
//! never replace anything. The result is a per-field maximum, so folding the
//! same multiset of observations in any order gives the same record.

use std::collections::{HashMap, HashSet};
use std::io::Write;
use std::path::Path;
use std::sync::{Mutex, PoisonError};

use chrono::{DateTime, SecondsFormat, Utc};
use licita_core::{CountPolicy, Entry, OrganizationKey, RecencySource, ScanConfig, SnapshotFile};
use tracing::{debug, info};

use crate::IngestError;
use crate::pool::UnitHandler;

/// Commodity-code predicate. Codes and prefixes are compared with hyphens removed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CpvFilter {
    prefixes: Vec<String>,
}

impl CpvFilter {
    pub fn new<S: AsRef<str>>(prefixes: &[S]) -> Self {
        Self {
            prefixes: prefixes
                .iter()
                .map(|p| strip_hyphens(p.as_ref()))
                .filter(|p| !p.is_empty())
                .collect(),
        }
    }

    /// An empty filter admits everything.
    pub fn admits(&self, entry: &Entry) -> bool {
        self.prefixes.is_empty()
            || entry.commodity_codes().any(|code| {
                let code = strip_hyphens(code);
                self.prefixes.iter().any(|p| code.starts_with(p.as_str()))
            })
    }
}

fn strip_hyphens(s: &str) -> String {
    s.trim().chars().filter(|c| *c != '-').collect()
}

/// What one entry says about its contracting organization.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Observation {
    pub entry_id: String,
    pub at: Option<DateTime<Utc>>,
    pub name: String,
    pub dir3: String,
    pub nif: String,
    pub profile_url: String,
    pub email: String,
    pub phone: String,
    pub address_line: String,
    pub postal_code: String,
    pub city: String,
    pub country: String,
    pub tender_url: String,
}

impl Observation {
    /// `None` when the entry names no organization at all.
    pub fn from_entry(entry: &Entry, recency: RecencySource) -> Option<(OrganizationKey, Self)> {
        let cp = &entry.contract.contracting_party;
        let key = cp.organization_key();
        if matches!(&key, OrganizationKey::Dir3(k) | OrganizationKey::Name(k) if k.is_empty()) {
            return None;
        }
        let party = &cp.party;
        let address = party.postal_address.clone().unwrap_or_default();
        let contact = party.contact.clone().unwrap_or_default();
        let at = match recency {
            RecencySource::Updated => entry.updated,
            RecencySource::ContractNotice => entry.contract_notice_date().or(entry.updated),
        };
        let country = if address.country_name.is_empty() {
            address.country_code.value
        } else {
            address.country_name
        };
        Some((
            key,
            Self {
                entry_id: entry.id.clone(),
                at,
                name: party.name.clone(),
                dir3: party.identification("DIR3").unwrap_or_default().to_string(),
                nif: party.identification("NIF").unwrap_or_default().to_string(),
                profile_url: cp.buyer_profile_uri.clone(),
                email: contact.email,
                phone: contact.telephone,
                address_line: address.line,
                postal_code: address.postal_zone,
                city: address.city,
                country,
                tender_url: entry.tender_url().to_string(),
            },
        ))
    }
}

/// A field value with the recency of the observation that supplied it.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Stamped {
    pub value: String,
    pub at: Option<DateTime<Utc>>,
}

impl Stamped {
    fn offer(&mut self, value: &str, at: Option<DateTime<Utc>>) {
        let value = value.trim();
        if value.is_empty() {
            return;
        }
        if self.value.is_empty() || (at, value) > (self.at, self.value.as_str()) {
            self.value = value.to_string();
            self.at = at;
        }
    }

    pub fn as_str(&self) -> &str {
        &self.value
    }
}

/// One output row of the registry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrganizationRecord {
    pub key: OrganizationKey,
    pub name: Stamped,
    pub dir3: Stamped,
    pub nif: Stamped,
    pub profile_url: Stamped,
    pub email: Stamped,
    pub phone: Stamped,
    pub address_line: Stamped,
    pub postal_code: Stamped,
    pub city: Stamped,
    pub country: Stamped,
    pub last_tender_url: Stamped,
    /// Most recent observation seen; never moves backwards.
    pub last_action: Option<DateTime<Utc>>,
    pub entry_ids: HashSet<String>,
    pub observations: u64,
}

impl OrganizationRecord {
    fn new(key: OrganizationKey) -> Self {
        Self {
            key,
            name: Stamped::default(),
            dir3: Stamped::default(),
            nif: Stamped::default(),
            profile_url: Stamped::default(),
            email: Stamped::default(),
            phone: Stamped::default(),
            address_line: Stamped::default(),
            postal_code: Stamped::default(),
            city: Stamped::default(),
            country: Stamped::default(),
            last_tender_url: Stamped::default(),
            last_action: None,
            entry_ids: HashSet::new(),
            observations: 0,
        }
    }

    fn merge(&mut self, obs: &Observation) {
        let at = obs.at;
        self.name.offer(&obs.name, at);
        self.dir3.offer(&obs.dir3, at);
        self.nif.offer(&obs.nif, at);
        self.profile_url.offer(&obs.profile_url, at);
        self.email.offer(&obs.email, at);
        self.phone.offer(&obs.phone, at);
        self.address_line.offer(&obs.address_line, at);
        self.postal_code.offer(&obs.postal_code, at);
        self.city.offer(&obs.city, at);
        self.country.offer(&obs.country, at);
        self.last_tender_url.offer(&obs.tender_url, at);
        self.last_action = self.last_action.max(at);
        self.entry_ids.insert(obs.entry_id.clone());
        self.observations += 1;
    }

    pub fn tenders_count(&self, policy: CountPolicy) -> u64 {
        match policy {
            CountPolicy::DistinctEntries => self.entry_ids.len() as u64,
            CountPolicy::Observations => self.observations,
        }
    }

    /// `"<line> <postal>, <city> <country>"`, skipping empty parts.
    pub fn address(&self) -> String {
        let join = |a: &str, b: &str| {
            [a, b]
                .into_iter()
                .filter(|s| !s.is_empty())
                .collect::<Vec<_>>()
                .join(" ")
        };
        let street = join(self.address_line.as_str(), self.postal_code.as_str());
        let place = join(self.city.as_str(), self.country.as_str());
        [street, place]
            .into_iter()
            .filter(|s| !s.is_empty())
            .collect::<Vec<_>>()
            .join(", ")
    }

    fn display_name(&self) -> &str {
        match (&self.key, self.name.as_str()) {
            (_, name) if !name.is_empty() => name,
            (OrganizationKey::Dir3(code) | OrganizationKey::Name(code), _) => code,
        }
    }
}

const CSV_HEADER: [&str; 10] = [
    "organization",
    "nif",
    "profile_url",
    "email",
    "phone",
    "address",
    "last_action_date",
    "last_tender_url",
    "tenders_count",
    "dir3",
];

/// The aggregate keyed by organization identity.
#[derive(Debug, Clone, Default)]
pub struct OrgRegistry {
    policy: CountPolicy,
    records: HashMap<OrganizationKey, OrganizationRecord>,
}

impl OrgRegistry {
    pub fn new(policy: CountPolicy) -> Self {
        Self {
            policy,
            records: HashMap::new(),
        }
    }

    pub fn ingest(&mut self, key: OrganizationKey, obs: &Observation) {
        self.records
            .entry(key.clone())
            .or_insert_with(|| OrganizationRecord::new(key))
            .merge(obs);
    }

    pub fn get(&self, key: &OrganizationKey) -> Option<&OrganizationRecord> {
        self.records.get(key)
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn policy(&self) -> CountPolicy {
        self.policy
    }

    /// Most recent action first; ties by name, then key.
    pub fn records_sorted(&self) -> Vec<&OrganizationRecord> {
        let mut rows: Vec<_> = self.records.values().collect();
        rows.sort_by(|a, b| {
            b.last_action
                .cmp(&a.last_action)
                .then_with(|| a.display_name().cmp(b.display_name()))
                .then_with(|| a.key.cmp(&b.key))
        });
        rows
    }

    /// Write the registry as CSV to `w`.
    pub fn write_csv(&self, w: &mut dyn Write) -> std::io::Result<()> {
        let mut out = csv::Writer::from_writer(w);
        out.write_record(CSV_HEADER)?;
        for r in self.records_sorted() {
            let last_action = r
                .last_action
                .map(|t| t.to_rfc3339_opts(SecondsFormat::Secs, true))
                .unwrap_or_default();
            let count = r.tenders_count(self.policy).to_string();
            let address = r.address();
            out.write_record([
                r.display_name(),
                r.nif.as_str(),
                r.profile_url.as_str(),
                r.email.as_str(),
                r.phone.as_str(),
                address.as_str(),
                last_action.as_str(),
                r.last_tender_url.as_str(),
                count.as_str(),
                r.dir3.as_str(),
            ])?;
        }
        out.flush()
    }

    /// Publish the CSV at `path` atomically.
    pub fn publish_csv(&self, path: &Path) -> Result<(), IngestError> {
        licita_core::publish_atomically(path, |w| self.write_csv(w)).map_err(|source| {
            IngestError::OutputWrite {
                path: path.to_path_buf(),
                source,
            }
        })?;
        info!(path = %path.display(), organizations = self.len(), "organization registry written");
        Ok(())
    }
}

/// Pool consumer that filters entries and folds them into an [`OrgRegistry`].
#[derive(Debug)]
pub struct OrgAggregator {
    filter: CpvFilter,
    recency: RecencySource,
    registry: Mutex<OrgRegistry>,
}

impl OrgAggregator {
    pub fn new(filter: CpvFilter, recency: RecencySource, policy: CountPolicy) -> Self {
        Self {
            filter,
            recency,
            registry: Mutex::new(OrgRegistry::new(policy)),
        }
    }

    pub fn from_config(config: &ScanConfig) -> Self {
        Self::new(
            CpvFilter::new(config.cpv_prefixes.as_slice()),
            config.recency,
            config.count_policy,
        )
    }

    /// Offer one entry directly, outside a pool run.
    pub fn observe(&self, entry: &Entry) {
        if !self.filter.admits(entry) {
            return;
        }
        let Some((key, obs)) = Observation::from_entry(entry, self.recency) else {
            debug!(entry = %entry.id, "entry without organization skipped");
            return;
        };
        self.registry
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .ingest(key, &obs);
    }

    pub fn into_registry(self) -> OrgRegistry {
        self.registry
            .into_inner()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

impl UnitHandler for OrgAggregator {
    type Unit = Entry;

    fn handle(&self, _file: &SnapshotFile, entry: Entry) {
        self.observe(&entry);
    }
}

#[cfg(test)]
mod tests {
    use licita_core::EntryDecoder;

    use super::*;
    use crate::testutil::{EntryXml, feed_document, utc, write_snapshot};
    use crate::{CancelToken, WorkerPool};

    fn entry(xml: EntryXml) -> Entry {
        let doc = feed_document(&[xml], &[]);
        EntryDecoder::new(doc.as_bytes()).next().unwrap().unwrap()
    }

    fn aggregator(policy: CountPolicy) -> OrgAggregator {
        OrgAggregator::new(CpvFilter::new(&["091"]), RecencySource::Updated, policy)
    }

    fn only(registry: &OrgRegistry) -> &OrganizationRecord {
        assert_eq!(registry.len(), 1);
        registry.records_sorted()[0]
    }

    #[test]
    fn cpv_filter_prefix_boundary() {
        let filter = CpvFilter::new(&["09134"]);
        let near_miss = entry(EntryXml::new("a", "2025-01-01T00:00:00Z").cpv(&["0913"]));
        let exact = entry(EntryXml::new("b", "2025-01-01T00:00:00Z").cpv(&["09134"]));
        let hyphenated = entry(EntryXml::new("c", "2025-01-01T00:00:00Z").cpv(&["09134100-8"]));
        let other = entry(EntryXml::new("d", "2025-01-01T00:00:00Z").cpv(&["45000000", "0913-4"]));
        assert!(!filter.admits(&near_miss));
        assert!(filter.admits(&exact));
        assert!(filter.admits(&hyphenated));
        assert!(filter.admits(&other));
        assert!(CpvFilter::new::<&str>(&[]).admits(&near_miss));
    }

    #[test]
    fn key_prefers_dir3_and_normalizes_names() {
        let agg = aggregator(CountPolicy::DistinctEntries);
        agg.observe(&entry(
            EntryXml::new("a", "2025-01-01T00:00:00Z").org("Ayto  de   Ejemplo", ""),
        ));
        agg.observe(&entry(
            EntryXml::new("b", "2025-01-02T00:00:00Z").org("ayto de ejemplo", ""),
        ));
        agg.observe(&entry(
            EntryXml::new("c", "2025-01-03T00:00:00Z").org("Ayto de Ejemplo", "l01280796"),
        ));
        let registry = agg.into_registry();
        assert_eq!(registry.len(), 2);
        let by_name = registry
            .get(&OrganizationKey::Name("AYTO DE EJEMPLO".into()))
            .unwrap();
        assert_eq!(by_name.tenders_count(CountPolicy::DistinctEntries), 2);
        assert!(registry.get(&OrganizationKey::Dir3("L01280796".into())).is_some());
    }

    #[test]
    fn duplicate_entry_counts_by_policy() {
        let dup = entry(EntryXml::new("same", "2025-01-01T00:00:00Z"));

        let distinct = aggregator(CountPolicy::DistinctEntries);
        distinct.observe(&dup);
        distinct.observe(&dup);
        let distinct = distinct.into_registry();
        assert_eq!(only(&distinct).tenders_count(distinct.policy()), 1);

        let observed = aggregator(CountPolicy::Observations);
        observed.observe(&dup);
        observed.observe(&dup);
        let observed = observed.into_registry();
        assert_eq!(only(&observed).tenders_count(observed.policy()), 2);
    }

    #[test]
    fn merge_is_order_independent() {
        let entries = [
            entry(
                EntryXml::new("e1", "2025-01-01T00:00:00Z")
                    .contact("old@ayto.es", "900000001")
                    .city("Sevilla"),
            ),
            entry(EntryXml::new("e2", "2025-03-01T00:00:00Z").contact("new@ayto.es", "")),
            entry(
                EntryXml::new("e3", "2025-03-01T00:00:00Z")
                    .contact("", "900000003")
                    .nif("P4109100J"),
            ),
        ];
        let orders: [[usize; 3]; 6] = [
            [0, 1, 2],
            [0, 2, 1],
            [1, 0, 2],
            [1, 2, 0],
            [2, 0, 1],
            [2, 1, 0],
        ];
        let results: Vec<OrganizationRecord> = orders
            .iter()
            .map(|order| {
                let agg = aggregator(CountPolicy::DistinctEntries);
                for &i in order {
                    agg.observe(&entries[i]);
                }
                only(&agg.into_registry()).clone()
            })
            .collect();
        for r in &results[1..] {
            assert_eq!(r, &results[0]);
        }
        let r = &results[0];
        assert_eq!(r.email.as_str(), "new@ayto.es");
        assert_eq!(r.phone.as_str(), "900000003");
        assert_eq!(r.city.as_str(), "Sevilla");
        assert_eq!(r.nif.as_str(), "P4109100J");
        assert_eq!(r.last_action, Some(utc(2025, 3, 1) - chrono::Duration::hours(12)));
        assert_eq!(r.tenders_count(CountPolicy::DistinctEntries), 3);
    }

    #[test]
    fn older_sparse_entry_never_blanks_fields() {
        let agg = aggregator(CountPolicy::DistinctEntries);
        agg.observe(&entry(
            EntryXml::new("full", "2025-05-01T00:00:00Z")
                .contact("info@ayto.es", "900123123")
                .city("Huelva")
                .nif("P2100000A"),
        ));
        agg.observe(&entry(EntryXml::new("sparse", "2024-01-01T00:00:00Z")));
        let registry = agg.into_registry();
        let r = only(&registry);
        assert_eq!(r.email.as_str(), "info@ayto.es");
        assert_eq!(r.phone.as_str(), "900123123");
        assert_eq!(r.city.as_str(), "Huelva");
        assert_eq!(r.nif.as_str(), "P2100000A");
        assert_eq!(r.last_tender_url.as_str(), "full/detalle");
    }

    #[test]
    fn newer_values_overwrite_and_last_action_never_regresses() {
        let agg = aggregator(CountPolicy::DistinctEntries);
        agg.observe(&entry(
            EntryXml::new("new", "2025-05-01T00:00:00Z").contact("new@ayto.es", ""),
        ));
        agg.observe(&entry(
            EntryXml::new("old", "2024-05-01T00:00:00Z").contact("old@ayto.es", "900"),
        ));
        let registry = agg.into_registry();
        let r = only(&registry);
        assert_eq!(r.email.as_str(), "new@ayto.es");
        assert_eq!(r.phone.as_str(), "900");
        assert_eq!(r.last_tender_url.as_str(), "new/detalle");
        assert_eq!(r.last_action.unwrap().to_rfc3339(), "2025-05-01T00:00:00+00:00");
    }

    #[test]
    fn contract_notice_recency() {
        let agg = OrgAggregator::new(
            CpvFilter::default(),
            RecencySource::ContractNotice,
            CountPolicy::DistinctEntries,
        );
        agg.observe(&entry(
            EntryXml::new("a", "2025-05-01T00:00:00Z")
                .notice("DOC_CN", "2024-02-10")
                .contact("cn@ayto.es", ""),
        ));
        agg.observe(&entry(
            EntryXml::new("b", "2024-06-01T00:00:00Z").contact("updated@ayto.es", ""),
        ));
        let registry = agg.into_registry();
        let r = only(&registry);
        // Entry b has no notice, so its `updated` date is the newer one.
        assert_eq!(r.email.as_str(), "updated@ayto.es");
    }

    #[test]
    fn rows_sorted_by_recency_then_name() {
        let agg = OrgAggregator::new(
            CpvFilter::default(),
            RecencySource::Updated,
            CountPolicy::DistinctEntries,
        );
        agg.observe(&entry(EntryXml::new("1", "2025-01-01T00:00:00Z").org("Beta", "")));
        agg.observe(&entry(EntryXml::new("2", "2025-01-01T00:00:00Z").org("Alfa", "")));
        agg.observe(&entry(EntryXml::new("3", "2025-02-01T00:00:00Z").org("Zeta", "")));
        let registry = agg.into_registry();
        let names: Vec<&str> = registry
            .records_sorted()
            .iter()
            .map(|r| r.display_name())
            .collect();
        assert_eq!(names, vec!["Zeta", "Alfa", "Beta"]);
    }

    #[test]
    fn csv_output() {
        let agg = aggregator(CountPolicy::DistinctEntries);
        agg.observe(&entry(
            EntryXml::new("x", "2025-05-01T10:00:00+02:00")
                .org("Diputación, Provincial", "L02000021")
                .contact("d@dip.es", "959")
                .city("Huelva")
                .nif("P2100000A"),
        ));
        let registry = agg.into_registry();
        let mut out = Vec::new();
        registry.write_csv(&mut out).unwrap();
        let text = String::from_utf8(out).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines[0], CSV_HEADER.join(","));
        assert_eq!(
            lines[1],
            "\"Diputación, Provincial\",P2100000A,,d@dip.es,959,Huelva,2025-05-01T08:00:00Z,x/detalle,1,L02000021"
        );
    }

    #[test]
    fn duplicate_across_identical_snapshots_through_pool() {
        let dir = tempfile::tempdir().unwrap();
        let body = feed_document(&[EntryXml::new("dup", "2025-01-01T00:00:00Z")], &[]);
        let files = vec![
            write_snapshot(dir.path(), utc(2025, 1, 2), Some(1), &body),
            write_snapshot(dir.path(), utc(2025, 1, 2), Some(2), &body),
        ];
        let agg = aggregator(CountPolicy::DistinctEntries);
        WorkerPool::new(2, 2).run(files, &agg, &CancelToken::new());
        let registry = agg.into_registry();
        assert_eq!(only(&registry).tenders_count(CountPolicy::DistinctEntries), 1);
        assert_eq!(only(&registry).observations, 2);
    }

    #[test]
    fn publish_replaces_previous_registry() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("orgs.csv");
        std::fs::write(&path, "stale").unwrap();
        let agg = aggregator(CountPolicy::DistinctEntries);
        agg.observe(&entry(EntryXml::new("x", "2025-01-01T00:00:00Z")));
        agg.into_registry().publish_csv(&path).unwrap();
        let text = std::fs::read_to_string(&path).unwrap();
        assert!(text.starts_with("organization,nif"));
        assert!(text.contains("Ayuntamiento de Ejemplo"));
    }
}
