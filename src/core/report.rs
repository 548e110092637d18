//! Structured JSON records for scanned repositories and their analysis jobs.

use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::Result;
use super::call_graph::{CallGraphStats, Group, GroupingStats};
use super::discovery::DiscoveryWarning;
use super::languages::SymbolKind;
use super::llm::FailureKind;
use super::orchestrator::{AnalysisJob, JobStatus};
use super::parser::{ManifestContent, SourceUnit};
use super::symbols::{RepoMetrics, SymbolId, SymbolTable};
use super::vcs::VcsMetadata;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GroupStatus {
    Pending,
    Succeeded,
    FailedPermanent,
    /// Overflow group left out under the `skip` policy
    Skipped,
}

impl From<JobStatus> for GroupStatus {
    fn from(status: JobStatus) -> Self {
        match status {
            JobStatus::Pending | JobStatus::InFlight => GroupStatus::Pending,
            JobStatus::Succeeded => GroupStatus::Succeeded,
            JobStatus::FailedPermanent => GroupStatus::FailedPermanent,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemberRecord {
    pub id: SymbolId,
    pub name: String,
    pub kind: SymbolKind,
    pub file: PathBuf,
    pub line_range: (usize, usize),
}

/// Outcome of one group
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GroupRecord {
    pub group_id: String,
    pub fingerprint: String,
    pub members: Vec<MemberRecord>,
    pub size_estimate: usize,
    pub overflow: bool,
    pub truncated: bool,
    pub status: GroupStatus,
    pub attempts: u32,
    pub error_kind: Option<FailureKind>,
    pub error_message: Option<String>,
    pub transient_exhausted: bool,
    pub from_cache: bool,
    pub coalesced: bool,
    /// Artifact text file, relative to the report directory
    pub artifact_file: Option<String>,
}

impl GroupRecord {
    /// A pending record for `group`
    pub fn new(group: &Group, table: &SymbolTable) -> Self {
        let members = group
            .members
            .iter()
            .filter_map(|&id| table.get(id))
            .map(|symbol| MemberRecord {
                id: symbol.id,
                name: symbol.name.clone(),
                kind: symbol.kind,
                file: symbol.file.clone(),
                line_range: symbol.line_range,
            })
            .collect();

        Self {
            group_id: group.id.clone(),
            fingerprint: group.fingerprint.clone(),
            members,
            size_estimate: group.size_estimate,
            overflow: group.overflow,
            truncated: false,
            status: GroupStatus::Pending,
            attempts: 0,
            error_kind: None,
            error_message: None,
            transient_exhausted: false,
            from_cache: false,
            coalesced: false,
            artifact_file: None,
        }
    }

    pub fn skipped(mut self, reason: impl Into<String>) -> Self {
        self.status = GroupStatus::Skipped;
        self.error_message = Some(reason.into());
        self
    }

    pub fn apply_job(&mut self, job: &AnalysisJob) {
        self.status = job.status.into();
        self.attempts = job.attempts;
        self.error_kind = job.last_error;
        self.error_message = job.last_message.clone();
        self.transient_exhausted = job.transient_exhausted;
        self.from_cache = job.from_cache;
        self.coalesced = job.coalesced;
    }
}

/// Inventory line for one parsed file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileRecord {
    pub path: PathBuf,
    pub language: String,
    pub lines: usize,
    pub functions: Vec<String>,
    pub classes: Vec<String>,
    pub imports: Vec<String>,
}

impl FileRecord {
    pub fn from_unit(unit: &SourceUnit) -> Self {
        let names = |kind: SymbolKind| -> Vec<String> {
            unit.symbols
                .iter()
                .filter(|s| s.kind == kind)
                .map(|s| s.name.clone())
                .collect()
        };

        Self {
            path: unit.path.clone(),
            language: unit.language.clone(),
            lines: unit.line_count,
            functions: names(SymbolKind::Function),
            classes: names(SymbolKind::Class),
            imports: unit.imports.clone(),
        }
    }
}

/// Everything reported for one repository
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RepositoryRecord {
    pub name: String,
    pub root: PathBuf,
    pub languages: Vec<String>,
    pub vcs: VcsMetadata,
    pub metrics: RepoMetrics,
    pub call_graph: CallGraphStats,
    pub grouping: GroupingStats,
    pub warnings: Vec<DiscoveryWarning>,
    pub manifests: BTreeMap<String, ManifestContent>,
    pub files: Vec<FileRecord>,
    pub groups: Vec<GroupRecord>,
    pub generated_at: DateTime<Utc>,
}

impl RepositoryRecord {
    pub fn count(&self, status: GroupStatus) -> usize {
        self.groups.iter().filter(|g| g.status == status).count()
    }
}

/// One line of `index.json`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexEntry {
    pub name: String,
    pub root: PathBuf,
    pub languages: Vec<String>,
    pub remote_url: Option<String>,
    pub total_files: usize,
    pub groups: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub skipped: usize,
    pub pending: usize,
    pub report: String,
}

/// Contents of `index.json`
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReportIndex {
    pub repositories: Vec<IndexEntry>,
    pub warnings: Vec<DiscoveryWarning>,
}

/// Consumer of per-repository records
pub trait ReportSink {
    /// `artifacts` maps group id to generated text for succeeded groups
    fn write_repository(
        &mut self,
        record: RepositoryRecord,
        artifacts: &BTreeMap<String, String>,
    ) -> Result<()>;

    /// Discovery warnings that belong to no repository
    fn write_warnings(&mut self, warnings: &[DiscoveryWarning]) -> Result<()>;

    /// Flush anything that spans repositories
    fn finish(&mut self) -> Result<()>;
}

/// Writes `index.json`, `<repo>.json` and `<repo>/<group-id>.txt`
pub struct JsonReportSink {
    out_dir: PathBuf,
    index: ReportIndex,
    used_names: HashMap<String, usize>,
}

impl JsonReportSink {
    pub fn new<P: AsRef<Path>>(out_dir: P) -> Result<Self> {
        let out_dir = out_dir.as_ref().to_path_buf();
        fs::create_dir_all(&out_dir)?;
        Ok(Self {
            out_dir,
            index: ReportIndex::default(),
            used_names: HashMap::new(),
        })
    }

    /// File-safe name, suffixed when two repositories share a name
    fn file_stem(&mut self, name: &str) -> String {
        let safe: String = name
            .chars()
            .map(|c| {
                if c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.') {
                    c
                } else {
                    '_'
                }
            })
            .collect();
        let safe = if safe.is_empty() || safe == "index" {
            format!("repo_{}", safe)
        } else {
            safe
        };

        let seen = self.used_names.entry(safe.clone()).or_insert(0);
        *seen += 1;
        if *seen == 1 {
            safe
        } else {
            format!("{}-{}", safe, seen)
        }
    }
}

impl ReportSink for JsonReportSink {
    fn write_repository(
        &mut self,
        mut record: RepositoryRecord,
        artifacts: &BTreeMap<String, String>,
    ) -> Result<()> {
        let stem = self.file_stem(&record.name);

        for group in &mut record.groups {
            let Some(text) = artifacts.get(&group.group_id) else {
                continue;
            };
            if group.status != GroupStatus::Succeeded {
                continue;
            }
            let artifact_dir = self.out_dir.join(&stem);
            fs::create_dir_all(&artifact_dir)?;
            let relative = format!("{}/{}.txt", stem, group.group_id);
            fs::write(self.out_dir.join(&relative), text)?;
            group.artifact_file = Some(relative);
        }

        let report = format!("{}.json", stem);
        fs::write(
            self.out_dir.join(&report),
            serde_json::to_string_pretty(&record)?,
        )?;
        debug!("Wrote {}", report);

        self.index.repositories.push(IndexEntry {
            name: record.name.clone(),
            root: record.root.clone(),
            languages: record.languages.clone(),
            remote_url: record.vcs.remote_url.clone(),
            total_files: record.metrics.total_files,
            groups: record.groups.len(),
            succeeded: record.count(GroupStatus::Succeeded),
            failed: record.count(GroupStatus::FailedPermanent),
            skipped: record.count(GroupStatus::Skipped),
            pending: record.count(GroupStatus::Pending),
            report,
        });
        Ok(())
    }

    fn write_warnings(&mut self, warnings: &[DiscoveryWarning]) -> Result<()> {
        self.index.warnings.extend_from_slice(warnings);
        Ok(())
    }

    fn finish(&mut self) -> Result<()> {
        let path = self.out_dir.join("index.json");
        fs::write(&path, serde_json::to_string_pretty(&self.index)?)?;
        info!(
            "Wrote report for {} repositories to {}",
            self.index.repositories.len(),
            self.out_dir.display()
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::call_graph::{CallResolver, GroupingEngine};
    use crate::core::symbols::fixtures::python;
    use assert_fs::prelude::*;
    use predicates::prelude::*;

    fn record(name: &str) -> (RepositoryRecord, Vec<Group>) {
        let units = vec![python(
            "app.py",
            "def main():\n    helper()\n\ndef helper():\n    pass\n\ndef lonely():\n    pass\n",
        )];
        let table = SymbolTable::build(&units);
        let graph = CallResolver::new(&table).build_graph();
        let engine = GroupingEngine::new(10_000);
        let groups = engine.group(&table, &graph);

        let record = RepositoryRecord {
            name: name.to_string(),
            root: PathBuf::from("/src").join(name),
            languages: vec!["python".to_string()],
            vcs: VcsMetadata::default(),
            metrics: RepoMetrics::from_units(&units, &[], Vec::new()),
            call_graph: graph.get_statistics(),
            grouping: engine.get_grouping_statistics(&groups),
            warnings: Vec::new(),
            manifests: BTreeMap::new(),
            files: units.iter().map(FileRecord::from_unit).collect(),
            groups: groups.iter().map(|g| GroupRecord::new(g, &table)).collect(),
            generated_at: Utc::now(),
        };
        (record, groups)
    }

    #[test]
    fn writes_index_repository_and_artifacts() {
        let temp = assert_fs::TempDir::new().unwrap();
        let mut sink = JsonReportSink::new(temp.path()).unwrap();

        let (mut record, groups) = record("demo");
        assert_eq!(record.groups.len(), 2);
        record.groups[0].status = GroupStatus::Succeeded;
        let mut artifacts = BTreeMap::new();
        artifacts.insert(groups[0].id.clone(), "main calls helper".to_string());
        artifacts.insert(groups[1].id.clone(), "never written".to_string());

        sink.write_repository(record, &artifacts).unwrap();
        sink.finish().unwrap();

        temp.child("index.json")
            .assert(predicate::str::contains("\"report\": \"demo.json\""));
        temp.child("demo.json")
            .assert(predicate::str::contains("\"status\": \"succeeded\""))
            .assert(predicate::str::contains("\"name\": \"helper\""));
        temp.child(format!("demo/{}.txt", groups[0].id))
            .assert("main calls helper");
        temp.child(format!("demo/{}.txt", groups[1].id))
            .assert(predicate::path::missing());
    }

    #[test]
    fn repositories_with_the_same_name_get_distinct_files() {
        let temp = assert_fs::TempDir::new().unwrap();
        let mut sink = JsonReportSink::new(temp.path()).unwrap();

        sink.write_repository(record("api").0, &BTreeMap::new()).unwrap();
        sink.write_repository(record("api").0, &BTreeMap::new()).unwrap();
        sink.finish().unwrap();

        temp.child("api.json").assert(predicate::path::exists());
        temp.child("api-2.json").assert(predicate::path::exists());
        let index: ReportIndex =
            serde_json::from_str(&fs::read_to_string(temp.path().join("index.json")).unwrap())
                .unwrap();
        assert_eq!(index.repositories.len(), 2);
        assert_eq!(index.repositories[0].pending, 2);
        assert!(index.warnings.is_empty());
    }

    #[test]
    fn top_level_warnings_are_written_to_the_index() {
        let temp = assert_fs::TempDir::new().unwrap();
        let mut sink = JsonReportSink::new(temp.path()).unwrap();

        sink.write_warnings(&[DiscoveryWarning {
            path: PathBuf::from("/mnt/locked"),
            message: "unreadable root: permission denied".to_string(),
        }])
        .unwrap();
        sink.write_repository(record("api").0, &BTreeMap::new()).unwrap();
        sink.finish().unwrap();

        temp.child("index.json")
            .assert(predicate::str::contains("\"path\": \"/mnt/locked\""));
        let index: ReportIndex =
            serde_json::from_str(&fs::read_to_string(temp.path().join("index.json")).unwrap())
                .unwrap();
        assert_eq!(index.repositories.len(), 1);
        assert_eq!(index.warnings[0].message, "unreadable root: permission denied");
    }

    #[test]
    fn skipped_and_failed_groups_carry_their_reason() {
        let (record, _) = record("demo");
        let skipped = record.groups[0].clone().skipped("exceeds batch budget");
        assert_eq!(skipped.status, GroupStatus::Skipped);
        assert_eq!(skipped.error_message.as_deref(), Some("exceeds batch budget"));

        let mut failed = record.groups[1].clone();
        failed.apply_job(&AnalysisJob {
            id: 0,
            group_id: failed.group_id.clone(),
            repository: "demo".to_string(),
            fingerprint: failed.fingerprint.clone(),
            status: JobStatus::FailedPermanent,
            attempts: 5,
            last_error: Some(FailureKind::RateLimited),
            last_message: Some("429".to_string()),
            transient_exhausted: true,
            from_cache: false,
            coalesced: false,
        });
        assert_eq!(failed.status, GroupStatus::FailedPermanent);
        assert_eq!(failed.error_kind, Some(FailureKind::RateLimited));
        assert!(failed.transient_exhausted);
    }
}
