use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use aso_agent::{AgentError, BuildAgent, ContainerRuntime, Pipeline, StepInvocation, StepOutput};
use aso_core::id::IntentId;
use aso_core::types::*;
use aso_ledger::{BuildLog, IntentStore, Ledger};
use aso_vault::EvidenceVault;

struct Env {
    _tmp: tempfile::TempDir,
    intents: IntentStore,
    builds: BuildLog,
    vault_root: std::path::PathBuf,
    work_root: std::path::PathBuf,
}

fn env() -> Env {
    let tmp = tempfile::tempdir().unwrap();
    let ledger = Ledger::open(&tmp.path().join("ledger.redb")).unwrap();
    Env {
        intents: IntentStore::new(ledger.clone()),
        builds: BuildLog::new(ledger),
        vault_root: tmp.path().join("vault"),
        work_root: tmp.path().join("work"),
        _tmp: tmp,
    }
}

fn aso_intent(store: &IntentStore) -> Intent {
    let draft: IntentDraft = serde_json::from_value(serde_json::json!({
        "project": "ASO",
        "author": "alice",
        "description": "Seal build evidence for every approved change",
        "acceptanceCriteria": ["manifest verifies", "tampering is detected"],
        "outOfScope": ["remote storage"],
        "contractHash": format!("sha256:{}", "0".repeat(64)),
    }))
    .unwrap();
    store.create(draft.validate().unwrap()).unwrap()
}

fn approve(store: &IntentStore, id: &IntentId) -> Intent {
    store
        .update_status(
            id,
            &IntentTransition::Approve {
                approved_by: "admin".into(),
            },
        )
        .unwrap()
        .unwrap()
}

/// Stands in for the container engine: `write <file> <text>` drops a file
/// into the mounted work dir, `fail` exits 1, anything else succeeds.
#[derive(Default)]
struct FakeEngine {
    seen: Mutex<Vec<String>>,
}

#[async_trait]
impl ContainerRuntime for FakeEngine {
    async fn run(&self, invocation: &StepInvocation) -> Result<StepOutput, AgentError> {
        self.seen.lock().unwrap().push(invocation.command.clone());
        let mut out = StepOutput {
            exit_code: 0,
            stdout: String::new(),
            stderr: String::new(),
        };
        if let Some(rest) = invocation.command.strip_prefix("write ") {
            let (file, text) = rest.split_once(' ').unwrap();
            let path = invocation.host_work_dir.join(file);
            std::fs::create_dir_all(path.parent().unwrap()).unwrap();
            std::fs::write(path, text).unwrap();
        } else if invocation.command == "fail" {
            out.exit_code = 1;
            out.stderr = "tests failed".into();
        }
        Ok(out)
    }
}

fn build_config(steps: &[(&str, &str)]) -> BuildConfig {
    BuildConfig {
        image: "alpine:3".into(),
        steps: steps
            .iter()
            .map(|(name, command)| BuildStep {
                name: name.to_string(),
                command: command.to_string(),
                working_dir: None,
            })
            .collect(),
        env: BTreeMap::new(),
        artifacts: vec![],
        step_timeout_secs: None,
    }
}

#[test]
fn aso_scenario_by_hand() {
    let env = env();

    let intent = aso_intent(&env.intents);
    assert_eq!(intent.status, IntentStatus::Pending);
    let approved = approve(&env.intents, &intent.id);
    assert_eq!(approved.status, IntentStatus::Approved);
    assert_eq!(approved.approved_by.as_deref(), Some("admin"));
    assert!(approved.approved_at.is_some());

    let agent = BuildAgent::new(&env.work_root, Arc::new(FakeEngine::default()));
    let ctx = agent
        .prepare_build("ASO", &intent.id, &build_config(&[("build", "true")]))
        .unwrap();
    assert!(ctx.work_dir.join(BUILD_CONFIG_FILE).is_file());

    let vault = EvidenceVault::open(&env.vault_root).unwrap();
    vault.create_build_directory("ASO", &ctx.build_id).unwrap();
    let artifact = vault
        .write_artifact("ASO", &ctx.build_id, "out.bin", b"hello")
        .unwrap();
    assert_eq!(artifact.size, 5);
    assert_eq!(
        artifact.hash,
        "2cf24dba5fb0a30e26e83b2ac5b9e29e1b161e5c1fa7425e73043362938b9824"
    );
    assert_eq!(artifact.path, format!("ASO/{}/out.bin", ctx.build_id));

    let manifest = vault
        .seal_build(
            "ASO",
            &ctx.build_id,
            &intent.id,
            BTreeMap::from([("out.bin".to_string(), artifact)]),
        )
        .unwrap();
    assert_eq!(manifest.chain_hash, manifest.compute_chain_hash().unwrap());

    let report = vault.verify_integrity("ASO", &ctx.build_id).unwrap();
    assert!(report.valid, "{:?}", report.errors);
    assert!(report.errors.is_empty());
}

#[tokio::test]
async fn pipeline_seals_verifiable_evidence() {
    let env = env();
    let intent = aso_intent(&env.intents);
    approve(&env.intents, &intent.id);

    let engine = Arc::new(FakeEngine::default());
    let pipeline = Pipeline::new(
        env.intents.clone(),
        env.builds.clone(),
        BuildAgent::new(&env.work_root, engine.clone()),
        EvidenceVault::open(&env.vault_root).unwrap(),
    );
    let config = build_config(&[
        ("compile", "write artifacts/aso.bin binary"),
        ("report", "write artifacts/reports/summary.txt all green"),
    ]);

    let outcome = pipeline.execute(&intent.id, &config).await.unwrap();
    assert_eq!(outcome.result.status, BuildStatus::Success);
    assert_eq!(outcome.intent.status, IntentStatus::Completed);

    let stored = env.intents.get_by_id(&intent.id).unwrap().unwrap();
    assert_eq!(stored.status, IntentStatus::Completed);
    let records = env.builds.list(Some(&intent.id)).unwrap();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].build_id, outcome.manifest.build_id);
    assert_eq!(records[0].chain_hash.as_deref(), Some(outcome.manifest.chain_hash.as_str()));

    let vault = EvidenceVault::open(&env.vault_root).unwrap();
    let build_id = &outcome.manifest.build_id;
    assert!(vault.verify_integrity("ASO", build_id).unwrap().valid);
    assert_eq!(
        vault.read_manifest("ASO", build_id).unwrap().unwrap(),
        outcome.manifest
    );

    // Tampering with a sealed artifact is caught.
    let sealed = env
        .vault_root
        .join("ASO")
        .join(build_id.as_str())
        .join("artifacts/aso.bin");
    std::fs::write(&sealed, b"BINARY").unwrap();
    let report = vault.verify_integrity("ASO", build_id).unwrap();
    assert!(!report.valid);
    assert_eq!(report.errors.len(), 1);
    assert!(report.errors[0].contains("artifacts/aso.bin"));
    assert!(report.errors[0].contains("hash mismatch"));
}

#[tokio::test]
async fn failed_build_still_leaves_evidence() {
    let env = env();
    let intent = aso_intent(&env.intents);
    approve(&env.intents, &intent.id);

    let engine = Arc::new(FakeEngine::default());
    let pipeline = Pipeline::new(
        env.intents.clone(),
        env.builds.clone(),
        BuildAgent::new(&env.work_root, engine.clone()),
        EvidenceVault::open(&env.vault_root).unwrap(),
    );
    let config = build_config(&[
        ("compile", "write artifacts/aso.bin binary"),
        ("test", "fail"),
        ("package", "write artifacts/aso.tar never"),
    ]);

    let outcome = pipeline.execute(&intent.id, &config).await.unwrap();
    assert_eq!(outcome.result.status, BuildStatus::Failed);
    assert_eq!(outcome.result.steps.len(), 2);
    assert_eq!(outcome.intent.status, IntentStatus::Failed);
    assert_eq!(engine.seen.lock().unwrap().len(), 2);

    let files: Vec<_> = outcome.manifest.files.keys().cloned().collect();
    assert_eq!(
        files,
        vec!["artifacts/aso.bin", "build-config.json", "build-result.json"]
    );

    let vault = EvidenceVault::open(&env.vault_root).unwrap();
    assert!(vault
        .verify_integrity("ASO", &outcome.manifest.build_id)
        .unwrap()
        .valid);
    let listed = vault.list_builds(Some("ASO")).unwrap();
    assert_eq!(listed.len(), 1);

    // A failed intent cannot be rebuilt.
    let err = pipeline.execute(&intent.id, &config).await.unwrap_err();
    assert!(matches!(err, AgentError::NotApproved { .. }));
}

#[test]
fn rejected_intent_cannot_be_approved() {
    let env = env();
    let intent = aso_intent(&env.intents);
    env.intents
        .update_status(
            &intent.id,
            &IntentTransition::Reject {
                reason: "duplicate".into(),
            },
        )
        .unwrap()
        .unwrap();

    let err = env
        .intents
        .update_status(
            &intent.id,
            &IntentTransition::Approve {
                approved_by: "admin".into(),
            },
        )
        .unwrap_err();
    assert!(err.to_string().contains("rejected"));
    let stored = env.intents.get_by_id(&intent.id).unwrap().unwrap();
    assert_eq!(stored.status, IntentStatus::Rejected);
    assert_eq!(stored.rejected_reason.as_deref(), Some("duplicate"));
}
