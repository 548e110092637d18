use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Result;
use chrono::Utc;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::config::{Config, OverflowPolicy};
use crate::error::RepoIntelError;
use super::call_graph::{CallGraph, CallResolver, Group, GroupingEngine, GroupingStats};
use super::discovery::{DiscoveredRoot, DiscoveryWarning, RepositoryDiscoverer};
use super::exclusion::ExclusionRules;
use super::llm::{create_generator, DocGenerator, GenerationRequest, GenerationStyle};
use super::orchestrator::{Orchestrator, OrchestratorSettings, ResultCache, RunSummary};
use super::parser::{detect_manifests, read_manifests, CodeParser, ManifestContent};
use super::report::{FileRecord, GroupRecord, JsonReportSink, ReportSink, RepositoryRecord};
use super::symbols::{RepoMetrics, SymbolTable};
use super::vcs::{GitCli, VcsInspector, VcsMetadata};

/// One scanned repository. Not modified after [`Engine::scan_repository`].
#[derive(Debug)]
pub struct Repository {
    pub root: PathBuf,
    pub name: String,
    pub languages: Vec<String>,
    pub table: SymbolTable,
    pub graph: CallGraph,
    pub metrics: RepoMetrics,
    pub groups: Vec<Group>,
    pub grouping: GroupingStats,
    pub vcs: VcsMetadata,
    pub warnings: Vec<DiscoveryWarning>,
    pub manifests: BTreeMap<String, ManifestContent>,
    pub files: Vec<FileRecord>,
    imports: BTreeMap<PathBuf, Vec<String>>,
}

impl Repository {
    /// Imports of every file that defines a member of `group`
    fn imports_for(&self, group: &Group) -> Vec<String> {
        let files: BTreeSet<&Path> = group
            .members
            .iter()
            .filter_map(|&id| self.table.get(id))
            .map(|s| s.file.as_path())
            .collect();
        let imports: BTreeSet<String> = files
            .into_iter()
            .filter_map(|f| self.imports.get(f))
            .flatten()
            .cloned()
            .collect();
        imports.into_iter().collect()
    }

    /// Report record with every group pending
    pub fn record(&self) -> RepositoryRecord {
        RepositoryRecord {
            name: self.name.clone(),
            root: self.root.clone(),
            languages: self.languages.clone(),
            vcs: self.vcs.clone(),
            metrics: self.metrics.clone(),
            call_graph: self.graph.get_statistics(),
            grouping: self.grouping.clone(),
            warnings: self.warnings.clone(),
            manifests: self.manifests.clone(),
            files: self.files.clone(),
            groups: self
                .groups
                .iter()
                .map(|g| GroupRecord::new(g, &self.table))
                .collect(),
            generated_at: Utc::now(),
        }
    }
}

/// Scanned repositories plus discovery warnings that belong to none of them
#[derive(Debug, Default)]
pub struct ScanResult {
    pub repositories: Vec<Repository>,
    /// Unreadable roots and walk errors outside every repository
    pub warnings: Vec<DiscoveryWarning>,
}

/// Totals of one `analyze` run
#[derive(Debug, Default)]
pub struct AnalysisOutcome {
    pub repositories: usize,
    pub groups: usize,
    pub skipped: usize,
    pub summary: Option<RunSummary>,
}

/// Main pipeline engine
pub struct Engine {
    config: Config,
    vcs: Box<dyn VcsInspector>,
}

impl Engine {
    pub async fn new(config_path: Option<&Path>) -> Result<Self> {
        let config = Config::load_or_default(config_path)?;
        debug!("Loaded configuration: {:?}", config);
        Ok(Self::from_config(config))
    }

    pub fn from_config(config: Config) -> Self {
        Self {
            config,
            vcs: Box::new(GitCli),
        }
    }

    pub fn set_roots(&mut self, roots: Vec<PathBuf>) {
        if !roots.is_empty() {
            self.config.discovery.roots = roots;
        }
    }

    pub fn set_report_dir(&mut self, dir: PathBuf) {
        self.config.output.report_dir = dir;
    }

    pub fn set_workers(&mut self, workers: usize) {
        self.config.orchestrator.workers = workers.max(1);
    }

    /// List repository roots under the configured directories
    pub async fn discover(&self, json: bool) -> Result<()> {
        let (roots, _) = self.discover_roots()?;

        if json {
            println!("{}", serde_json::to_string_pretty(&roots)?);
        } else {
            for root in &roots {
                println!("{}", root.root.display());
            }
        }
        info!("Found {} repositories", roots.len());
        Ok(())
    }

    /// Scan and group every repository, printing a JSON summary
    pub async fn scan(&self) -> Result<()> {
        let scan = self.scan_repositories()?;
        let records: Vec<RepositoryRecord> =
            scan.repositories.iter().map(Repository::record).collect();
        let output = serde_json::json!({
            "repositories": records,
            "warnings": scan.warnings,
        });
        println!("{}", serde_json::to_string_pretty(&output)?);
        Ok(())
    }

    /// Full pipeline: scan, group, generate, report
    pub async fn analyze(&self, dry_run: bool) -> Result<()> {
        let generator: Option<Arc<dyn DocGenerator>> = if dry_run {
            info!("📋 Dry run: groups will be reported without contacting the generator");
            None
        } else {
            let generator = create_generator(&self.config.llm)?;
            info!(
                "Using {} generator with model {}",
                generator.provider_name(),
                generator.model_name()
            );
            Some(Arc::from(generator))
        };

        let scan = self.scan_repositories()?;
        let outcome = self.analyze_repositories(&scan, generator).await?;

        info!(
            "🎉 Analysis complete: {} repositories, {} groups, {} skipped",
            outcome.repositories, outcome.groups, outcome.skipped
        );
        if let Some(summary) = &outcome.summary {
            if summary.cancelled {
                warn!("Run was cancelled; re-run to resume pending groups");
            }
        }
        Ok(())
    }

    /// Write a default configuration file
    pub async fn init(&self, path: Option<PathBuf>, force: bool) -> Result<()> {
        let target = path.unwrap_or_else(|| PathBuf::from("repo-intel.toml"));
        if target.exists() && !force {
            return Err(RepoIntelError::Config(format!(
                "{} already exists (use --force to overwrite)",
                target.display()
            ))
            .into());
        }
        Config::default().save(&target)?;
        info!("Wrote default configuration to {}", target.display());
        Ok(())
    }

    fn discover_roots(&self) -> Result<(Vec<DiscoveredRoot>, Vec<DiscoveryWarning>)> {
        let discoverer = RepositoryDiscoverer::new(&self.config.discovery)?;
        let mut iter = discoverer.iter();
        let roots: Vec<DiscoveredRoot> = iter.by_ref().collect();

        if iter.readable_roots() == 0 {
            return Err(RepoIntelError::NoReadableRoots(self.config.discovery.roots.clone()).into());
        }
        Ok((roots, iter.into_warnings()))
    }

    pub fn scan_repositories(&self) -> Result<ScanResult> {
        let (roots, mut warnings) = self.discover_roots()?;
        info!("🔍 Scanning {} repositories", roots.len());

        let rules = Arc::new(ExclusionRules::new(&self.config.discovery.exclude_patterns)?);
        let mut parser = CodeParser::new(&self.config.parsing, &self.config.discovery, rules)?;

        let mut repositories = Vec::with_capacity(roots.len());
        for root in &roots {
            let mut repository = self.scan_repository(&mut parser, root);
            let (inside, rest): (Vec<_>, Vec<_>) = warnings
                .into_iter()
                .partition(|w| w.path.starts_with(&root.root));
            repository.warnings.extend(inside);
            warnings = rest;
            repositories.push(repository);
        }
        Ok(ScanResult {
            repositories,
            warnings,
        })
    }

    pub fn scan_repository(&self, parser: &mut CodeParser, root: &DiscoveredRoot) -> Repository {
        let path = &root.root;
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| path.display().to_string());

        let parsed = parser.parse_repository(path);
        let metrics = RepoMetrics::from_units(&parsed.units, &parsed.unparseable, detect_manifests(path));
        let table = SymbolTable::build(&parsed.units);
        let graph = CallResolver::new(&table).build_graph();

        let engine = GroupingEngine::new(self.config.grouping.batch_budget);
        let groups = engine.group(&table, &graph);
        let grouping = engine.get_grouping_statistics(&groups);

        let imports = parsed
            .units
            .iter()
            .map(|u| (u.path.clone(), u.imports.clone()))
            .collect();
        let files = parsed.units.iter().map(FileRecord::from_unit).collect();

        info!(
            "📦 {}: {} files, {} symbols, {} groups ({} overflow)",
            name,
            metrics.total_files,
            table.len(),
            groups.len(),
            grouping.overflow_groups
        );

        Repository {
            root: path.clone(),
            languages: metrics.languages(),
            vcs: self.vcs.inspect(path),
            name,
            table,
            graph,
            metrics,
            groups,
            grouping,
            warnings: parsed.warnings,
            manifests: read_manifests(path),
            files,
            imports,
        }
    }

    /// Submit every group, run the orchestrator (unless `generator` is
    /// `None`) and write the report.
    pub async fn analyze_repositories(
        &self,
        scan: &ScanResult,
        generator: Option<Arc<dyn DocGenerator>>,
    ) -> Result<AnalysisOutcome> {
        let repositories = &scan.repositories;
        let budget = self.config.grouping.batch_budget;
        let style = GenerationStyle {
            word_target: self.config.llm.word_target,
            max_tokens: self.config.llm.max_tokens,
            temperature: self.config.llm.temperature,
        };

        let orchestrator = generator.map(|generator| {
            let cache = match &self.config.orchestrator.cache_dir {
                Some(dir) => ResultCache::with_dir(dir),
                None => ResultCache::in_memory(),
            };
            Orchestrator::new(
                generator,
                Arc::new(cache),
                OrchestratorSettings::from(&self.config.orchestrator),
            )
        });

        let mut outcome = AnalysisOutcome {
            repositories: repositories.len(),
            ..AnalysisOutcome::default()
        };

        // (record, job id per group) for every repository
        let mut staged: Vec<(RepositoryRecord, Vec<Option<usize>>)> = Vec::new();
        for repository in repositories {
            let mut record = repository.record();
            let mut job_ids = Vec::with_capacity(repository.groups.len());

            for (group, group_record) in repository.groups.iter().zip(record.groups.iter_mut()) {
                outcome.groups += 1;

                if group.overflow && self.config.grouping.overflow_policy == OverflowPolicy::Skip {
                    warn!(
                        "Skipping overflow group {} in {} ({} bytes > {})",
                        group.id, repository.name, group.size_estimate, budget
                    );
                    *group_record = group_record
                        .clone()
                        .skipped(format!("exceeds batch budget of {} bytes", budget));
                    outcome.skipped += 1;
                    job_ids.push(None);
                    continue;
                }

                let mut request = GenerationRequest::for_group(
                    &repository.name,
                    group,
                    &repository.table,
                    &repository.graph,
                    repository.imports_for(group),
                    style.clone(),
                );
                if request.payload_size() > budget {
                    request.truncate_to(budget);
                }
                group_record.truncated = request.truncated;

                job_ids.push(orchestrator.as_ref().map(|o| o.submit(request).id()));
            }
            staged.push((record, job_ids));
        }

        if let Some(orchestrator) = &orchestrator {
            let (cancel_tx, cancel_rx) = watch::channel(false);
            let interrupt = tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    warn!("Interrupted: no new calls will be made, waiting for in-flight calls");
                    let _ = cancel_tx.send(true);
                }
            });

            let summary = orchestrator.run(cancel_rx).await;
            interrupt.abort();
            outcome.summary = Some(summary);
        }

        let mut sink = JsonReportSink::new(&self.config.output.report_dir)?;
        sink.write_warnings(&scan.warnings)?;
        for (mut record, job_ids) in staged {
            let mut artifacts = BTreeMap::new();

            if let (Some(orchestrator), Some(summary)) = (&orchestrator, &outcome.summary) {
                for (group_record, job_id) in record.groups.iter_mut().zip(job_ids) {
                    let Some(job) = job_id.and_then(|id| summary.jobs.get(id)) else {
                        continue;
                    };
                    group_record.apply_job(job);
                    if let Some(result) = orchestrator.result_for(&job.fingerprint) {
                        artifacts.insert(group_record.group_id.clone(), result.artifact.content);
                    }
                }
            }

            sink.write_repository(record, &artifacts)?;
        }
        sink.finish()?;

        Ok(outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::llm::{GeneratedArtifact, GenerationError};
    use crate::core::orchestrator::JobStatus;
    use crate::core::report::{GroupStatus, ReportIndex};
    use std::fs;
    use tempfile::TempDir;

    struct EchoGenerator;

    #[async_trait::async_trait]
    impl DocGenerator for EchoGenerator {
        async fn generate(
            &self,
            request: &GenerationRequest,
        ) -> std::result::Result<GeneratedArtifact, GenerationError> {
            let names: Vec<_> = request.spans.iter().map(|s| s.symbol.as_str()).collect();
            Ok(GeneratedArtifact {
                content: format!("covers {}", names.join(", ")),
                model: "echo".to_string(),
                tokens_used: None,
            })
        }

        fn provider_name(&self) -> &str {
            "echo"
        }

        fn model_name(&self) -> &str {
            "echo"
        }
    }

    fn workspace() -> TempDir {
        let temp = TempDir::new().unwrap();
        let repo = temp.path().join("src/shop");
        fs::create_dir_all(repo.join(".git")).unwrap();
        fs::write(
            repo.join("orders.py"),
            "import json\n\ndef place():\n    charge()\n\ndef charge():\n    pass\n",
        )
        .unwrap();
        fs::write(repo.join("util.py"), "def unused():\n    pass\n").unwrap();
        temp
    }

    fn config(temp: &TempDir) -> Config {
        let mut config = Config::default();
        config.discovery.roots = vec![temp.path().join("src")];
        config.output.report_dir = temp.path().join("reports");
        config.orchestrator.cache_dir = Some(temp.path().join("cache"));
        config.orchestrator.requests_per_minute = None;
        config
    }

    #[test]
    fn scan_builds_groups_per_repository() {
        let temp = workspace();
        let engine = Engine::from_config(config(&temp));

        let scan = engine.scan_repositories().unwrap();
        assert_eq!(scan.repositories.len(), 1);
        assert!(scan.warnings.is_empty());

        let repo = &scan.repositories[0];
        assert_eq!(repo.name, "shop");
        assert_eq!(repo.languages, vec!["python".to_string()]);
        assert_eq!(repo.metrics.total_files, 2);
        assert_eq!(repo.table.len(), 3);
        assert_eq!(repo.groups.len(), 2);
        assert_eq!(repo.imports_for(&repo.groups[0]), vec!["json".to_string()]);
    }

    #[test]
    fn scan_records_the_file_inventory_and_manifests() {
        let temp = workspace();
        fs::write(
            temp.path().join("src/shop/package.json"),
            r#"{"name": "shop", "version": "0.1.0"}"#,
        )
        .unwrap();
        let engine = Engine::from_config(config(&temp));

        let scan = engine.scan_repositories().unwrap();
        let record = scan.repositories[0].record();

        let orders = record
            .files
            .iter()
            .find(|f| f.path == Path::new("orders.py"))
            .unwrap();
        assert_eq!(orders.language, "python");
        assert_eq!(orders.lines, 7);
        assert_eq!(orders.functions, vec!["place".to_string(), "charge".to_string()]);
        assert!(orders.classes.is_empty());
        assert_eq!(orders.imports, vec!["json".to_string()]);
        assert_eq!(record.files.len(), 2);

        match &record.manifests["package.json"] {
            ManifestContent::Json(value) => assert_eq!(value["version"], "0.1.0"),
            other => panic!("expected parsed JSON, got {:?}", other),
        }
    }

    #[test]
    fn missing_roots_are_a_configuration_error() {
        let temp = TempDir::new().unwrap();
        let mut config = Config::default();
        config.discovery.roots = vec![temp.path().join("nowhere")];
        let engine = Engine::from_config(config);

        let err = engine.scan_repositories().unwrap_err();
        assert!(matches!(
            err.downcast_ref::<RepoIntelError>(),
            Some(RepoIntelError::NoReadableRoots(_))
        ));
    }

    #[tokio::test]
    async fn dry_run_reports_every_group_pending() {
        let temp = workspace();
        let engine = Engine::from_config(config(&temp));

        let scan = engine.scan_repositories().unwrap();
        let outcome = engine.analyze_repositories(&scan, None).await.unwrap();
        assert_eq!(outcome.groups, 2);
        assert!(outcome.summary.is_none());

        let report = fs::read_to_string(temp.path().join("reports/shop.json")).unwrap();
        let record: RepositoryRecord = serde_json::from_str(&report).unwrap();
        assert!(record.groups.iter().all(|g| g.status == GroupStatus::Pending));
    }

    #[tokio::test]
    async fn analyze_writes_artifacts_and_reuses_the_cache() {
        let temp = workspace();
        let engine = Engine::from_config(config(&temp));
        let scan = engine.scan_repositories().unwrap();

        let first = engine
            .analyze_repositories(&scan, Some(Arc::new(EchoGenerator)))
            .await
            .unwrap()
            .summary
            .unwrap();
        assert_eq!(first.external_calls, 2);
        assert_eq!(first.count(JobStatus::Succeeded), 2);

        let index: ReportIndex = serde_json::from_str(
            &fs::read_to_string(temp.path().join("reports/index.json")).unwrap(),
        )
        .unwrap();
        assert_eq!(index.repositories[0].succeeded, 2);

        let record: RepositoryRecord = serde_json::from_str(
            &fs::read_to_string(temp.path().join("reports/shop.json")).unwrap(),
        )
        .unwrap();
        let artifact = record.groups[0].artifact_file.as_ref().unwrap();
        let text = fs::read_to_string(temp.path().join("reports").join(artifact)).unwrap();
        assert_eq!(text, "covers place, charge");

        let second = engine
            .analyze_repositories(&scan, Some(Arc::new(EchoGenerator)))
            .await
            .unwrap()
            .summary
            .unwrap();
        assert_eq!(second.external_calls, 0);
        assert!(second.jobs.iter().all(|j| j.from_cache));
    }

    #[tokio::test]
    async fn skip_policy_leaves_overflow_groups_out() {
        let temp = workspace();
        let mut config = config(&temp);
        config.grouping.batch_budget = 10;
        config.grouping.overflow_policy = OverflowPolicy::Skip;
        let engine = Engine::from_config(config);
        let scan = engine.scan_repositories().unwrap();

        let outcome = engine
            .analyze_repositories(&scan, Some(Arc::new(EchoGenerator)))
            .await
            .unwrap();
        assert_eq!(outcome.skipped, 3);
        assert_eq!(outcome.summary.unwrap().external_calls, 0);

        let record: RepositoryRecord = serde_json::from_str(
            &fs::read_to_string(temp.path().join("reports/shop.json")).unwrap(),
        )
        .unwrap();
        assert!(record.groups.iter().all(|g| g.status == GroupStatus::Skipped && g.overflow));
    }

    #[tokio::test]
    async fn warnings_outside_repositories_reach_the_index() {
        let temp = workspace();
        let mut config = config(&temp);
        let missing = temp.path().join("gone");
        config.discovery.roots.push(missing.clone());
        let engine = Engine::from_config(config);

        let scan = engine.scan_repositories().unwrap();
        assert_eq!(scan.repositories.len(), 1);
        assert!(scan.repositories[0].warnings.is_empty());
        assert_eq!(scan.warnings.len(), 1);
        assert_eq!(scan.warnings[0].path, missing);

        engine.analyze_repositories(&scan, None).await.unwrap();
        let index: ReportIndex = serde_json::from_str(
            &fs::read_to_string(temp.path().join("reports/index.json")).unwrap(),
        )
        .unwrap();
        assert_eq!(index.repositories.len(), 1);
        assert_eq!(index.warnings.len(), 1);
        assert!(index.warnings[0].message.starts_with("unreadable root"));
    }

    #[tokio::test]
    async fn init_refuses_to_overwrite() {
        let temp = TempDir::new().unwrap();
        let target = temp.path().join("repo-intel.toml");
        let engine = Engine::from_config(Config::default());

        engine.init(Some(target.clone()), false).await.unwrap();
        assert!(Config::load(&target).is_ok());
        assert!(engine.init(Some(target.clone()), false).await.is_err());
        engine.init(Some(target), true).await.unwrap();
    }
}
