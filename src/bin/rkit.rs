//! Thin command-line surface over the pipeline.
//!
//! Exit codes: 0 on success, 1 on rejection or refused input, 3 when a
//! record is BLOCKED, 4 when a validation lands INVALIDATED, 5 on ERROR.

use clap::{Parser, Subcommand};
use std::process::ExitCode;
use std::sync::Arc;

use rkit_core::{
    approve_idea, Error, Ingestor, Pipeline, ProposalQueue, SimBacktestBackend, SimilarityIndex,
    StrategyDraft, StrategyFilter, StrategyState, SubAgentClient, Verdict, Workspace,
};

const EXIT_REFUSED: u8 = 1;
const EXIT_BLOCKED: u8 = 3;
const EXIT_INVALIDATED: u8 = 4;
const EXIT_ERROR: u8 = 5;

#[derive(Parser)]
#[command(name = "rkit", about = "Strategy discovery and validation pipeline")]
struct Cli {
    /// Workspace directory
    #[arg(long, short, env = "RKIT_WORKSPACE", default_value = "~/research-kit")]
    workspace: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Ingest a draft file or a directory of drafts
    Ingest { path: String },
    /// Run static verification on a strategy
    Verify { id: String },
    /// Run the walk-forward validation (verify and generate first if needed)
    Validate {
        id: String,
        /// Append a fresh validation even if this key was already tested
        #[arg(long)]
        force: bool,
    },
    /// Show learnings recorded for a strategy
    Learn { id: String },
    /// Dispatch the persona panel over the latest validation
    Synthesize { id: String },
    /// List strategies, optionally by state
    List {
        #[arg(long)]
        state: Option<String>,
    },
    /// Print one record
    Show { id: String },
    /// Workspace summary
    Status,
    /// Approve a pending proposal, idea, queued draft, or tier-3 review
    Approve {
        /// `PROP-NNN`, `IDEA-NNN`, `STRAT-NNN` (tier-3 review), or a
        /// queued draft's source hash
        target: String,
        /// Draft file required when approving an idea
        #[arg(long)]
        draft: Option<String>,
        #[arg(long, default_value = "approved")]
        note: String,
    },
}

fn build_pipeline(workspace: &Workspace) -> Pipeline {
    Pipeline::new(
        Arc::clone(&workspace.store),
        workspace.config.clone(),
        workspace.registry.clone(),
        Arc::new(SimBacktestBackend::default()),
        Arc::new(rkit_core::RegimeTagger::new(workspace.reference.clone())),
    )
}

fn llm_client() -> Result<Arc<dyn SubAgentClient>, Error> {
    let api_key = std::env::var("ANTHROPIC_API_KEY")
        .map_err(|_| Error::Config("ANTHROPIC_API_KEY is not set".to_string()))?;
    Ok(Arc::new(rkit_core::AnthropicClient::new(
        rkit_core::ClientConfig::new(api_key),
    )?))
}

fn parse_state(name: &str) -> Result<StrategyState, Error> {
    serde_yaml::from_str(name)
        .map_err(|_| Error::Config(format!("unknown state '{name}'")))
}

async fn run(cli: Cli) -> Result<u8, Error> {
    let root = rkit_core::workspace::expand_path(&cli.workspace);
    let workspace = Workspace::open(&root)?;
    let similarity = SimilarityIndex::new();
    for id in workspace.store.query(&StrategyFilter::default())? {
        let record = workspace.store.get_strategy(id)?;
        if !record.state.is_terminal() || record.state == StrategyState::Validated {
            similarity.insert(id, &record.definition)?;
        }
    }

    match cli.command {
        Command::Ingest { path } => {
            let ingestor = Ingestor::new(&workspace.store, &similarity, &workspace.config);
            let outcomes = ingestor.ingest_path(rkit_core::workspace::expand_path(&path))?;
            let mut refused = false;
            for (file, outcome) in &outcomes {
                let id = outcome
                    .strategy_id
                    .map(|id| id.to_string())
                    .unwrap_or_else(|| "-".to_string());
                println!(
                    "{}\t{}\t{}\t{}",
                    file.display(),
                    outcome.decision,
                    id,
                    outcome.assessment.reason
                );
                refused |= matches!(
                    outcome.decision,
                    rkit_core::record::IngestDecision::Reject
                );
            }
            Ok(if refused { EXIT_REFUSED } else { 0 })
        }

        Command::Verify { id } => {
            let pipeline = build_pipeline(&workspace);
            let report = pipeline.verify(id.parse()?)?;
            for outcome in &report.outcomes {
                match &outcome.result {
                    rkit_core::verify::CheckResult::Pass => {
                        println!("{}\tpass", outcome.name);
                    }
                    rkit_core::verify::CheckResult::Fail { reason } => {
                        println!("{}\tfail\t{}", outcome.name, reason);
                    }
                }
            }
            Ok(if report.passed() { 0 } else { EXIT_BLOCKED })
        }

        Command::Validate { id, force } => {
            let pipeline = build_pipeline(&workspace);
            let strategy_id = id.parse()?;
            let state = workspace.store.get_strategy(strategy_id)?.state;
            let validation = match state {
                StrategyState::Pending => pipeline.run(strategy_id, force).await?,
                StrategyState::ReadyToGenerate => {
                    pipeline.generate(strategy_id)?;
                    pipeline.validate(strategy_id, force).await?
                }
                _ => pipeline.validate(strategy_id, force).await?,
            };
            let aggregate = &validation.outcome.aggregate;
            println!(
                "{}\t{}\tsharpe {:.2} ({:.2}..{:.2})\tconsistency {:.0}%\tp_adj {:.4}",
                strategy_id,
                validation.outcome.verdict.label(),
                aggregate.mean_sharpe,
                aggregate.sharpe_ci.0,
                aggregate.sharpe_ci.1,
                aggregate.consistency * 100.0,
                aggregate.p_adjusted,
            );
            Ok(match validation.outcome.verdict {
                Verdict::Validated | Verdict::Conditional { .. } => 0,
                _ => EXIT_INVALIDATED,
            })
        }

        Command::Learn { id } => {
            let strategy_id = id.parse()?;
            for learning in workspace.store.list_learnings(Some(strategy_id))? {
                println!("# learning {} ({})", learning.id, learning.created_at);
                for (dimension, insight) in &learning.insights {
                    println!("{dimension}: {insight}");
                }
            }
            Ok(0)
        }

        Command::Synthesize { id } => {
            let pipeline = build_pipeline(&workspace);
            let client = llm_client()?;
            let (synthesis, harvest) =
                pipeline.analyze(Arc::clone(&client), id.parse()?).await?;
            println!("status: {:?}", synthesis.status);
            println!("consensus: {}", synthesis.consensus);
            for action in &synthesis.actions {
                println!("action: {action}");
            }
            println!(
                "harvested: 1 learning, {} proposals, {} ideas",
                harvest.proposal_ids.len(),
                harvest.idea_ids.len()
            );
            let usage = client.usage();
            println!(
                "usage: {} calls, {} in / {} out tokens",
                usage.calls, usage.input_tokens, usage.output_tokens
            );
            Ok(0)
        }

        Command::List { state } => {
            let filter = StrategyFilter {
                state: state.as_deref().map(parse_state).transpose()?,
                ..Default::default()
            };
            for id in workspace.store.query(&filter)? {
                let record = workspace.store.get_strategy(id)?;
                println!(
                    "{}\t{}\t{}\ttrust {}\t{}",
                    record.id, record.state, record.quality.decision, record.quality.trust,
                    record.name
                );
            }
            Ok(0)
        }

        Command::Show { id } => {
            let record = workspace.store.get_strategy(id.parse()?)?;
            print!("{}", serde_yaml::to_string(&record)?);
            Ok(0)
        }

        Command::Status => {
            for (state, count) in workspace.store.index().state_counts()? {
                println!("{state}\t{count}");
            }
            let queue = ProposalQueue::new(&workspace.store);
            println!("proposals_pending\t{}", queue.pending(None)?.len());
            println!("ideas\t{}", workspace.store.list_ideas()?.len());
            Ok(0)
        }

        Command::Approve {
            target,
            draft,
            note,
        } => {
            let queue = ProposalQueue::new(&workspace.store);
            let ingestor = Ingestor::new(&workspace.store, &similarity, &workspace.config);

            if let Ok(proposal_id) = target.parse::<rkit_core::ProposalId>() {
                let effect = queue.approve(proposal_id, Some(note))?;
                println!("{proposal_id} approved: {effect:?}");
                return Ok(0);
            }
            if let Ok(idea_id) = target.parse::<rkit_core::IdeaId>() {
                let draft_path = draft.ok_or_else(|| {
                    Error::Config("approving an idea requires --draft <file>".to_string())
                })?;
                let draft = StrategyDraft::from_yaml_file(
                    rkit_core::workspace::expand_path(&draft_path),
                )?;
                let strategy_id = approve_idea(&workspace.store, &ingestor, idea_id, &draft)?;
                println!("{idea_id} promoted to {strategy_id}");
                return Ok(0);
            }
            if let Ok(strategy_id) = target.parse::<rkit_core::StrategyId>() {
                let pipeline = build_pipeline(&workspace);
                pipeline.approve_generated(strategy_id, &note)?;
                println!("{strategy_id} cleared for execution");
                return Ok(0);
            }
            // Fallback: a queued draft's source hash
            let outcome = ingestor.approve_queued(&target)?;
            println!(
                "queued draft accepted as {}",
                outcome
                    .strategy_id
                    .map(|id| id.to_string())
                    .unwrap_or_default()
            );
            Ok(0)
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("rkit_core=info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    match run(cli).await {
        Ok(code) => ExitCode::from(code),
        Err(e) => {
            eprintln!("error: {e}");
            let code = match e {
                Error::HardRedFlag { .. }
                | Error::BelowThreshold { .. }
                | Error::DuplicateStrategy { .. }
                | Error::ValidationExists { .. } => EXIT_REFUSED,
                Error::DataUnavailable { .. } | Error::FingerprintMismatch(_) => EXIT_BLOCKED,
                _ => EXIT_ERROR,
            };
            ExitCode::from(code)
        }
    }
}
