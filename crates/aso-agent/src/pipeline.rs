use std::collections::BTreeMap;

use tokio::sync::watch;
use tracing::{info, warn};

use aso_core::id::IntentId;
use aso_core::types::{
    BuildConfig, BuildContext, BuildResult, BuildStatus, Intent, IntentStatus, IntentTransition,
    Manifest, BUILD_CONFIG_FILE,
};
use aso_ledger::{BuildLog, BuildRecord, IntentStore};
use aso_vault::layout::check_segment;
use aso_vault::EvidenceVault;

use crate::collect::{collect_artifacts, BUILD_RESULT_FILE};
use crate::{AgentError, BuildAgent};

/// What one pipeline run left behind.
#[derive(Debug, Clone)]
pub struct PipelineOutcome {
    pub intent: Intent,
    pub record: BuildRecord,
    pub result: BuildResult,
    pub manifest: Manifest,
}

/// Approved intent in, sealed evidence out.
///
/// Drives the intent through `in_progress` to `completed` or `failed`,
/// keeps the build record current, and seals whatever the build produced
/// (failed builds included) into the vault.
pub struct Pipeline {
    intents: IntentStore,
    builds: BuildLog,
    agent: BuildAgent,
    vault: EvidenceVault,
}

impl Pipeline {
    pub fn new(
        intents: IntentStore,
        builds: BuildLog,
        agent: BuildAgent,
        vault: EvidenceVault,
    ) -> Self {
        Self {
            intents,
            builds,
            agent,
            vault,
        }
    }

    pub async fn execute(
        &self,
        intent_id: &IntentId,
        config: &BuildConfig,
    ) -> Result<PipelineOutcome, AgentError> {
        self.execute_inner(intent_id, config, None).await
    }

    pub async fn execute_with_cancel(
        &self,
        intent_id: &IntentId,
        config: &BuildConfig,
        cancel: watch::Receiver<bool>,
    ) -> Result<PipelineOutcome, AgentError> {
        self.execute_inner(intent_id, config, Some(cancel)).await
    }

    async fn execute_inner(
        &self,
        intent_id: &IntentId,
        config: &BuildConfig,
        cancel: Option<watch::Receiver<bool>>,
    ) -> Result<PipelineOutcome, AgentError> {
        let intent = self
            .intents
            .get_by_id(intent_id)?
            .ok_or_else(|| AgentError::IntentNotFound(intent_id.clone()))?;
        if intent.status != IntentStatus::Approved {
            return Err(AgentError::NotApproved {
                id: intent.id,
                status: intent.status,
            });
        }

        check_segment(&intent.project)?;

        // Claiming the intent is the first write; nothing to undo if it fails.
        self.transition(intent_id, &IntentTransition::Start)?;
        let (ctx, record) = match self.start_build(&intent, config) {
            Ok(started) => started,
            Err(e) => {
                self.abandon(intent_id, None);
                return Err(e);
            }
        };
        info!(intent = %intent_id, build_id = %ctx.build_id, "pipeline started");

        match self.run_and_seal(&ctx, &record, config, cancel).await {
            Ok(outcome) => Ok(outcome),
            Err(e) => {
                self.abandon(intent_id, Some(&record));
                Err(e)
            }
        }
    }

    fn start_build(
        &self,
        intent: &Intent,
        config: &BuildConfig,
    ) -> Result<(BuildContext, BuildRecord), AgentError> {
        let ctx = self.agent.prepare_build(&intent.project, &intent.id, config)?;
        let record = self.builds.record(&ctx)?;
        Ok((ctx, record))
    }

    async fn run_and_seal(
        &self,
        ctx: &BuildContext,
        record: &BuildRecord,
        config: &BuildConfig,
        cancel: Option<watch::Receiver<bool>>,
    ) -> Result<PipelineOutcome, AgentError> {
        self.builds.set_status(&record.key, BuildStatus::Running)?;
        let result = match cancel {
            Some(cancel) => self.agent.run_build_with_cancel(ctx, config, cancel).await,
            None => self.agent.run_build(ctx, config).await,
        };
        self.builds.set_status(&record.key, result.status)?;

        let manifest = self.seal(ctx, config, &result)?;
        let record = self
            .builds
            .attach_manifest(&record.key, &manifest.chain_hash)?
            .unwrap_or_else(|| record.clone());

        let transition = if result.succeeded() {
            IntentTransition::Complete
        } else {
            IntentTransition::Fail
        };
        let intent = self.transition(&ctx.intent_id, &transition)?;
        info!(
            intent = %intent.id,
            build_id = %ctx.build_id,
            status = %result.status,
            chain_hash = %manifest.chain_hash,
            "pipeline finished"
        );

        Ok(PipelineOutcome {
            intent,
            record,
            result,
            manifest,
        })
    }

    fn seal(
        &self,
        ctx: &BuildContext,
        config: &BuildConfig,
        result: &BuildResult,
    ) -> Result<Manifest, AgentError> {
        let mut files = BTreeMap::new();
        for (name, path) in collect_artifacts(&ctx.work_dir, &config.artifacts)? {
            let content = std::fs::read(&path)?;
            let artifact = self
                .vault
                .write_artifact(&ctx.project, &ctx.build_id, &name, &content)?;
            files.insert(name, artifact);
        }

        let config_json = std::fs::read(ctx.work_dir.join(BUILD_CONFIG_FILE))?;
        let artifact =
            self.vault
                .write_artifact(&ctx.project, &ctx.build_id, BUILD_CONFIG_FILE, &config_json)?;
        files.insert(BUILD_CONFIG_FILE.to_string(), artifact);

        let result_json = serde_json::to_vec_pretty(result)
            .map_err(|e| AgentError::Serialization(e.to_string()))?;
        let artifact =
            self.vault
                .write_artifact(&ctx.project, &ctx.build_id, BUILD_RESULT_FILE, &result_json)?;
        files.insert(BUILD_RESULT_FILE.to_string(), artifact);

        Ok(self
            .vault
            .seal_build(&ctx.project, &ctx.build_id, &ctx.intent_id, files)?)
    }

    fn transition(
        &self,
        id: &IntentId,
        transition: &IntentTransition,
    ) -> Result<Intent, AgentError> {
        self.intents
            .update_status(id, transition)?
            .ok_or_else(|| AgentError::IntentNotFound(id.clone()))
    }

    /// Leaves no intent stuck `in_progress` after a storage fault.
    fn abandon(&self, intent_id: &IntentId, record: Option<&BuildRecord>) {
        if let Some(record) = record {
            if let Err(e) = self.builds.set_status(&record.key, BuildStatus::Failed) {
                warn!(key = %record.key, error = %e, "could not mark build failed");
            }
        }
        if let Err(e) = self.intents.update_status(intent_id, &IntentTransition::Fail) {
            warn!(intent = %intent_id, error = %e, "could not mark intent failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{config, ScriptedRuntime};
    use aso_core::types::{NewIntent, StatusMetadata};
    use aso_ledger::Ledger;
    use std::sync::Arc;

    struct Fixture {
        tmp: tempfile::TempDir,
        intents: IntentStore,
        builds: BuildLog,
        runtime: Arc<ScriptedRuntime>,
        pipeline: Pipeline,
    }

    fn fixture() -> Fixture {
        let tmp = tempfile::tempdir().unwrap();
        let ledger = Ledger::open(&tmp.path().join("ledger.redb")).unwrap();
        let intents = IntentStore::new(ledger.clone());
        let builds = BuildLog::new(ledger);
        let runtime = Arc::new(ScriptedRuntime::default());
        let agent = BuildAgent::new(&tmp.path().join("work"), runtime.clone());
        let vault = EvidenceVault::open(&tmp.path().join("vault")).unwrap();
        let pipeline = Pipeline::new(intents.clone(), builds.clone(), agent, vault);
        Fixture {
            tmp,
            intents,
            builds,
            runtime,
            pipeline,
        }
    }

    fn approved(intents: &IntentStore) -> Intent {
        approved_in(intents, "ASO")
    }

    fn approved_in(intents: &IntentStore, project: &str) -> Intent {
        let intent = intents
            .create(NewIntent {
                project: project.into(),
                author: "dev".into(),
                description: "ship the thing".into(),
                acceptance_criteria: vec!["it ships".into()],
                out_of_scope: vec![],
                contract_ref: None,
                contract_hash: None,
            })
            .unwrap();
        let approve = IntentTransition::for_status(
            IntentStatus::Approved,
            StatusMetadata {
                approved_by: Some("admin".into()),
                rejected_reason: None,
            },
        )
        .unwrap();
        intents.update_status(&intent.id, &approve).unwrap().unwrap()
    }

    #[tokio::test]
    async fn successful_build_completes_intent() {
        let f = fixture();
        let intent = approved(&f.intents);
        let cfg = config(&[("build", "emit out.bin hello"), ("test", "exit 0")]);

        let outcome = f.pipeline.execute(&intent.id, &cfg).await.unwrap();
        assert_eq!(outcome.intent.status, IntentStatus::Completed);
        assert_eq!(outcome.result.status, BuildStatus::Success);
        assert_eq!(outcome.record.status, BuildStatus::Success);
        assert_eq!(
            outcome.record.chain_hash.as_deref(),
            Some(outcome.manifest.chain_hash.as_str())
        );

        let names: Vec<_> = outcome.manifest.files.keys().map(String::as_str).collect();
        assert_eq!(names, vec!["artifacts/out.bin", "build-config.json", "build-result.json"]);
        assert_eq!(outcome.manifest.files["artifacts/out.bin"].size, 5);

        let report = f
            .pipeline
            .vault
            .verify_integrity("ASO", &outcome.manifest.build_id)
            .unwrap();
        assert!(report.valid, "{:?}", report.errors);
        assert_eq!(f.builds.list(Some(&intent.id)).unwrap().len(), 1);
    }

    #[tokio::test]
    async fn failing_build_fails_intent_but_is_sealed() {
        let f = fixture();
        let intent = approved(&f.intents);
        let cfg = config(&[("build", "exit 2"), ("never", "exit 0")]);

        let outcome = f.pipeline.execute(&intent.id, &cfg).await.unwrap();
        assert_eq!(outcome.intent.status, IntentStatus::Failed);
        assert_eq!(outcome.record.status, BuildStatus::Failed);
        assert_eq!(outcome.result.steps.len(), 1);
        assert!(outcome.manifest.files.contains_key("build-result.json"));
        assert_eq!(f.runtime.commands(), vec!["exit 2"]);

        let stored = f.intents.get_by_id(&intent.id).unwrap().unwrap();
        assert_eq!(stored.status, IntentStatus::Failed);
    }

    #[tokio::test]
    async fn pending_intent_is_refused() {
        let f = fixture();
        let approved_intent = approved(&f.intents);
        let pending = f
            .intents
            .create(NewIntent {
                project: "ASO".into(),
                author: "dev".into(),
                description: "not yet".into(),
                acceptance_criteria: vec!["later".into()],
                out_of_scope: vec![],
                contract_ref: None,
                contract_hash: None,
            })
            .unwrap();

        let err = f
            .pipeline
            .execute(&pending.id, &config(&[("a", "exit 0")]))
            .await
            .unwrap_err();
        assert!(matches!(err, AgentError::NotApproved { status: IntentStatus::Pending, .. }));
        assert!(f.runtime.commands().is_empty());
        assert!(f.builds.list(None).unwrap().is_empty());

        f.pipeline
            .execute(&approved_intent.id, &config(&[("a", "exit 0")]))
            .await
            .unwrap();
        let err = f
            .pipeline
            .execute(&approved_intent.id, &config(&[("a", "exit 0")]))
            .await
            .unwrap_err();
        assert!(matches!(err, AgentError::NotApproved { status: IntentStatus::Completed, .. }));
    }

    #[tokio::test]
    async fn unknown_intent() {
        let f = fixture();
        let err = f
            .pipeline
            .execute(&IntentId::generate(), &config(&[]))
            .await
            .unwrap_err();
        assert!(matches!(err, AgentError::IntentNotFound(_)));
    }

    #[tokio::test]
    async fn bad_artifact_pattern_abandons_the_run() {
        let f = fixture();
        let intent = approved(&f.intents);
        let mut cfg = config(&[("a", "exit 0")]);
        cfg.artifacts = vec!["a[".into()];

        let err = f.pipeline.execute(&intent.id, &cfg).await.unwrap_err();
        assert!(matches!(err, AgentError::Pattern(_)));
        let stored = f.intents.get_by_id(&intent.id).unwrap().unwrap();
        assert_eq!(stored.status, IntentStatus::Failed);
        assert_eq!(f.builds.list(None).unwrap()[0].status, BuildStatus::Failed);
    }

    #[tokio::test]
    async fn cancelled_build_fails_intent() {
        let f = fixture();
        let intent = approved(&f.intents);
        let (_tx, rx) = watch::channel(true);
        let outcome = f
            .pipeline
            .execute_with_cancel(&intent.id, &config(&[("a", "exit 0")]), rx)
            .await
            .unwrap();
        assert_eq!(outcome.result.status, BuildStatus::Cancelled);
        assert_eq!(outcome.record.status, BuildStatus::Cancelled);
        assert_eq!(outcome.intent.status, IntentStatus::Failed);
    }

    #[tokio::test]
    async fn project_unusable_as_vault_dir_is_refused_up_front() {
        let f = fixture();
        let intent = approved_in(&f.intents, "team/app");

        let err = f
            .pipeline
            .execute(&intent.id, &config(&[("a", "exit 0")]))
            .await
            .unwrap_err();
        assert!(matches!(err, AgentError::Vault(_)));
        assert!(f.runtime.commands().is_empty());
        assert!(f.builds.list(None).unwrap().is_empty());
        let stored = f.intents.get_by_id(&intent.id).unwrap().unwrap();
        assert_eq!(stored.status, IntentStatus::Approved);
    }

    #[tokio::test]
    async fn failed_preparation_does_not_strand_the_intent() {
        let f = fixture();
        let intent = approved(&f.intents);
        // The work root is a file, so no build dir can be created under it.
        std::fs::write(f.tmp.path().join("work"), b"not a directory").unwrap();

        let err = f
            .pipeline
            .execute(&intent.id, &config(&[("a", "exit 0")]))
            .await
            .unwrap_err();
        assert!(matches!(err, AgentError::Io(_)));
        assert!(f.runtime.commands().is_empty());
        assert!(f.builds.list(None).unwrap().is_empty());
        let stored = f.intents.get_by_id(&intent.id).unwrap().unwrap();
        assert_eq!(stored.status, IntentStatus::Failed);
    }
}
