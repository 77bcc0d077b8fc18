use std::path::PathBuf;

use clap::{Args, Subcommand};

use aso_core::id::IntentId;
use aso_core::types::{Intent, IntentDraft, IntentFilter, IntentStatus, IntentTransition};
use aso_ledger::IntentStore;

use crate::config::Home;
use crate::output::{header, joined, kv, or_dash};

#[derive(Args)]
pub struct IntentArgs {
    #[command(subcommand)]
    command: IntentCommand,
}

#[derive(Subcommand)]
enum IntentCommand {
    /// Record a new pending intent
    New {
        /// Read the intent from a JSON file instead of flags
        #[arg(long, conflicts_with_all = ["project", "author", "description"])]
        file: Option<PathBuf>,
        #[arg(short, long)]
        project: Option<String>,
        #[arg(short, long)]
        author: Option<String>,
        #[arg(short, long)]
        description: Option<String>,
        /// Acceptance criterion (repeatable, kept in order)
        #[arg(short = 'c', long = "criterion")]
        criteria: Vec<String>,
        /// Explicitly out of scope (repeatable)
        #[arg(long)]
        out_of_scope: Vec<String>,
        #[arg(long)]
        contract_ref: Option<String>,
        /// sha256:<64 hex>
        #[arg(long)]
        contract_hash: Option<String>,
    },
    /// List intents, newest first
    List {
        #[arg(short, long)]
        project: Option<String>,
        #[arg(short, long)]
        status: Option<String>,
        #[arg(short, long)]
        author: Option<String>,
    },
    /// Show one intent
    Show { id: String },
    /// Approve a pending intent
    Approve {
        id: String,
        #[arg(long = "by")]
        approved_by: String,
    },
    /// Reject a pending intent
    Reject {
        id: String,
        #[arg(long)]
        reason: String,
    },
}

pub fn run(args: IntentArgs, home: Option<PathBuf>) -> anyhow::Result<()> {
    let home = Home::load(home)?;
    let store = IntentStore::new(home.open_ledger()?);

    match args.command {
        IntentCommand::New {
            file,
            project,
            author,
            description,
            criteria,
            out_of_scope,
            contract_ref,
            contract_hash,
        } => {
            let draft = match file {
                Some(path) => {
                    let content = std::fs::read(&path)?;
                    serde_json::from_slice::<IntentDraft>(&content)?
                }
                None => IntentDraft {
                    project,
                    author,
                    description,
                    acceptance_criteria: Some(criteria),
                    out_of_scope,
                    contract_ref,
                    contract_hash,
                },
            };
            let intent = store.create(draft.validate()?)?;
            println!("Created intent: {}", intent.id);
            println!("{}", kv("project", &intent.project));
            println!("{}", kv("status", intent.status.as_str()));
        }
        IntentCommand::List {
            project,
            status,
            author,
        } => {
            let filter = IntentFilter {
                project,
                status: status.map(|s| s.parse::<IntentStatus>()).transpose()?,
                author,
            };
            let intents = store.list(&filter)?;
            if intents.is_empty() {
                println!("No intents found.");
            }
            for intent in &intents {
                println!(
                    "{} {:<11} {:<12} {}",
                    intent.id,
                    intent.status.as_str(),
                    intent.project,
                    intent.description
                );
            }
        }
        IntentCommand::Show { id } => {
            let id = IntentId::parse(&id)?;
            let intent = store
                .get_by_id(&id)?
                .ok_or_else(|| anyhow::anyhow!("intent not found: {id}"))?;
            print_intent(&intent);
        }
        IntentCommand::Approve { id, approved_by } => {
            let intent = transition(&store, &id, IntentTransition::Approve { approved_by })?;
            println!("Approved intent: {}", intent.id);
        }
        IntentCommand::Reject { id, reason } => {
            let intent = transition(&store, &id, IntentTransition::Reject { reason })?;
            println!("Rejected intent: {}", intent.id);
        }
    }
    Ok(())
}

fn transition(
    store: &IntentStore,
    id: &str,
    transition: IntentTransition,
) -> anyhow::Result<Intent> {
    let id = IntentId::parse(id)?;
    store
        .update_status(&id, &transition)?
        .ok_or_else(|| anyhow::anyhow!("intent not found: {id}"))
}

fn print_intent(intent: &Intent) {
    println!("{}", header(&format!("Intent {}", intent.id)));
    println!("{}", kv("project", &intent.project));
    println!("{}", kv("author", &intent.author));
    println!("{}", kv("status", intent.status.as_str()));
    println!("{}", kv("description", &intent.description));
    println!("{}", kv("acceptance", &joined(&intent.acceptance_criteria)));
    println!("{}", kv("out of scope", &joined(&intent.out_of_scope)));
    println!("{}", kv("contract", or_dash(intent.contract_ref.as_deref())));
    println!("{}", kv("contract hash", or_dash(intent.contract_hash.as_deref())));
    println!("{}", kv("created", &intent.created_at.to_rfc3339()));
    if let (Some(by), Some(at)) = (&intent.approved_by, intent.approved_at) {
        println!("{}", kv("approved", &format!("{by} at {}", at.to_rfc3339())));
    }
    if let (Some(reason), Some(at)) = (&intent.rejected_reason, intent.rejected_at) {
        println!("{}", kv("rejected", &format!("{reason} at {}", at.to_rfc3339())));
    }
}
