//! Taskmill CLI - Command-line client for the Taskmill daemon

mod client;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use colored::Colorize;
use reqwest::Method;
use serde_json::{json, Value};
use tabled::{Table, Tabled};

use client::ApiClient;
use taskmill_core::application::QueueSnapshot;
use taskmill_core::domain::{Job, JobStatus, QueueState};

const DEFAULT_API_URL: &str = "http://127.0.0.1:9530";

#[derive(Parser)]
#[command(name = "taskmill")]
#[command(about = "Taskmill multi-queue dispatcher CLI", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Daemon API URL
    #[arg(long, env = "TASKMILL_URL", default_value = DEFAULT_API_URL)]
    url: String,
}

#[derive(Subcommand)]
enum Commands {
    /// Manage queues
    #[command(subcommand)]
    Queue(QueueCommand),

    /// Manage tasks
    #[command(subcommand)]
    Task(TaskCommand),
}

#[derive(Subcommand)]
enum QueueCommand {
    /// Create a queue (starts Idle)
    Create {
        name: String,

        /// fifo, priority or scheduled
        #[arg(short, long, default_value = "fifo")]
        mode: String,

        /// Rate limit as FREQUENCY/PERIOD, e.g. 5/second (repeatable)
        #[arg(short, long = "rate", required = true)]
        rates: Vec<String>,

        #[command(flatten)]
        tuning: Tuning,
    },

    /// List all queues
    List,

    /// Show one queue
    Show { name: String },

    /// Filter queues by name substring, mode or state
    Search {
        #[arg(long)]
        name: Option<String>,
        #[arg(long)]
        mode: Option<String>,
        /// IDLE, ACTIVE, PAUSED or DRAINING
        #[arg(long)]
        state: Option<String>,
    },

    /// Change rate limits or tuning of a queue
    Update {
        name: String,

        /// Replacement rate limits (repeatable)
        #[arg(short, long = "rate")]
        rates: Vec<String>,

        #[command(flatten)]
        tuning: Tuning,

        /// Remove the retry ceiling
        #[arg(long, conflicts_with = "max_retries")]
        clear_max_retries: bool,
    },

    Start { name: String },
    Stop { name: String },
    Pause { name: String },
    Unpause { name: String },

    /// Stop accepting jobs and go Idle once empty
    Drain { name: String },

    /// Destroy a queue
    Delete {
        name: String,

        /// Allow the name to be reused
        #[arg(long)]
        release_name: bool,
    },

    /// List a queue's tasks
    Tasks {
        name: String,

        #[arg(short, long)]
        status: Option<String>,
    },
}

#[derive(Args)]
struct Tuning {
    #[arg(long)]
    batch_size: Option<u32>,

    /// Worker timeout in milliseconds
    #[arg(long)]
    timeout_ms: Option<u64>,

    /// Dead-letter jobs that exhaust their retries
    #[arg(long)]
    dead_letter: Option<bool>,

    #[arg(long)]
    max_retries: Option<u32>,
}

#[derive(Subcommand)]
enum TaskCommand {
    /// Enqueue one task
    Enqueue {
        #[arg(short, long)]
        queue: String,

        /// Payload as JSON string
        #[arg(long)]
        payload: String,

        #[arg(short, long)]
        priority: Option<i32>,

        /// Earliest dispatch time (epoch ms)
        #[arg(long)]
        at: Option<i64>,
    },

    /// Enqueue many tasks atomically
    Bulk {
        #[arg(short, long)]
        queue: String,

        /// JSON array of {payload, priority?, scheduled_at?}
        #[arg(long)]
        jobs: String,
    },

    Get { id: String },

    /// Re-prioritize or re-schedule a pending task
    Update {
        id: String,

        #[arg(short, long)]
        priority: Option<i32>,

        #[arg(long)]
        at: Option<i64>,
    },

    Cancel {
        id: String,
        #[arg(short, long)]
        queue: Option<String>,
    },

    /// Report success for a dispatched task
    Ack {
        id: String,
        #[arg(short, long)]
        queue: Option<String>,
    },

    /// Report failure for a dispatched task
    Fail {
        id: String,
        #[arg(short, long)]
        queue: Option<String>,
        #[arg(short, long)]
        reason: Option<String>,
    },
}

#[derive(Tabled)]
struct QueueRow {
    name: String,
    mode: String,
    state: String,
    rate: String,
    pending: usize,
    in_flight: usize,
    dead: usize,
    acked: u64,
}

impl From<&QueueSnapshot> for QueueRow {
    fn from(s: &QueueSnapshot) -> Self {
        Self {
            name: s.config.name.clone(),
            mode: s.config.mode.to_string(),
            state: s.state.to_string(),
            rate: format!("{}/{}ms", s.effective_rate.frequency, s.effective_rate.period_ms),
            pending: s.pending,
            in_flight: s.in_flight,
            dead: s.dead_lettered,
            acked: s.stats.acked,
        }
    }
}

#[derive(Tabled)]
struct TaskRow {
    id: String,
    queue: String,
    status: String,
    priority: i32,
    attempts: u32,
    scheduled_at: i64,
    last_error: String,
}

impl From<&Job> for TaskRow {
    fn from(job: &Job) -> Self {
        Self {
            id: job.id.clone(),
            queue: job.queue.clone(),
            status: job.status.to_string(),
            priority: job.priority,
            attempts: job.attempts,
            scheduled_at: job.scheduled_at,
            last_error: job.last_error.clone().unwrap_or_default(),
        }
    }
}

/// `5/second` -> `{"frequency": 5, "rate": "second"}`
fn parse_rate(raw: &str) -> Result<Value> {
    let (frequency, rate) = raw
        .split_once('/')
        .with_context(|| format!("rate '{}' must look like 5/second", raw))?;
    let frequency: u32 = frequency
        .trim()
        .parse()
        .with_context(|| format!("invalid frequency in '{}'", raw))?;
    Ok(json!({"frequency": frequency, "rate": rate.trim()}))
}

fn parse_rates(raw: &[String]) -> Result<Vec<Value>> {
    raw.iter().map(|r| parse_rate(r)).collect()
}

fn tuning_fields(tuning: &Tuning, body: &mut serde_json::Map<String, Value>) {
    if let Some(batch) = tuning.batch_size {
        body.insert("batch_size".into(), json!(batch));
    }
    if let Some(timeout) = tuning.timeout_ms {
        body.insert("worker_timeout_ms".into(), json!(timeout));
    }
    if let Some(dead_letter) = tuning.dead_letter {
        body.insert("use_dead_letter".into(), json!(dead_letter));
    }
    if let Some(retries) = tuning.max_retries {
        body.insert("max_retries".into(), json!(retries));
    }
}

fn colored_state(state: QueueState) -> colored::ColoredString {
    let text = state.to_string();
    match state {
        QueueState::Active => text.green(),
        QueueState::Paused | QueueState::Draining => text.yellow(),
        QueueState::Idle => text.normal(),
        QueueState::Destroyed => text.red(),
    }
}

fn colored_status(status: JobStatus) -> colored::ColoredString {
    let text = status.to_string();
    match status {
        JobStatus::Acked => text.green(),
        JobStatus::Pending | JobStatus::Dispatched => text.cyan(),
        JobStatus::Failed | JobStatus::DeadLettered => text.red(),
        JobStatus::Cancelled => text.yellow(),
    }
}

fn print_queue(snapshot: &QueueSnapshot) {
    println!("{} {}", "Queue".cyan().bold(), snapshot.config.name.bold());
    println!("  {} {}", "State:".bold(), colored_state(snapshot.state));
    println!("  {} {}", "Mode:".bold(), snapshot.config.mode);
    let limits: Vec<String> = snapshot
        .config
        .rate_limits
        .iter()
        .map(|l| format!("{}/{}", l.frequency, l.period))
        .collect();
    println!("  {} {}", "Rate limits:".bold(), limits.join(", "));
    println!(
        "  {} {} per {} ms",
        "Effective:".bold(),
        snapshot.effective_rate.frequency,
        snapshot.effective_rate.period_ms
    );
    println!(
        "  {} batch {} / timeout {} ms / dead-letter {} / max retries {}",
        "Tuning:".bold(),
        snapshot.config.batch_size,
        snapshot.config.worker_timeout_ms,
        snapshot.config.use_dead_letter,
        snapshot
            .config
            .max_retries
            .map_or_else(|| "-".to_string(), |n| n.to_string())
    );
    println!(
        "  {} pending {} / in flight {} / dead-lettered {}",
        "Jobs:".bold(),
        snapshot.pending,
        snapshot.in_flight,
        snapshot.dead_lettered
    );
    let stats = &snapshot.stats;
    println!(
        "  {} enqueued {} / dispatched {} / acked {} / failed {} / timed out {} / retried {}",
        "Stats:".bold(),
        stats.enqueued,
        stats.dispatched,
        stats.acked,
        stats.failed,
        stats.timed_out,
        stats.retried
    );
}

fn print_queues(snapshots: &[QueueSnapshot]) {
    if snapshots.is_empty() {
        println!("{}", "No queues".yellow());
        return;
    }
    let rows: Vec<QueueRow> = snapshots.iter().map(QueueRow::from).collect();
    println!("{}", Table::new(rows));
}

fn print_tasks(jobs: &[Job]) {
    if jobs.is_empty() {
        println!("{}", "No tasks".yellow());
        return;
    }
    let rows: Vec<TaskRow> = jobs.iter().map(TaskRow::from).collect();
    println!("{}", Table::new(rows));
}

fn print_task(label: &str, job: &Job) {
    println!("{} {} is {}", label.green().bold(), job.id, colored_status(job.status));
    println!("{}", Table::new(vec![TaskRow::from(job)]));
}

fn task_query(queue: Option<String>) -> Vec<(&'static str, String)> {
    queue.map(|q| vec![("queue", q)]).unwrap_or_default()
}

async fn run_queue(api: &ApiClient, command: QueueCommand) -> Result<()> {
    match command {
        QueueCommand::Create {
            name,
            mode,
            rates,
            tuning,
        } => {
            let mut body = serde_json::Map::new();
            body.insert("name".into(), json!(name));
            body.insert("mode".into(), json!(mode));
            body.insert("rate_limits".into(), json!(parse_rates(&rates)?));
            tuning_fields(&tuning, &mut body);

            let snapshot: QueueSnapshot = api
                .call(Method::POST, "/queue", &[], Some(Value::Object(body)))
                .await?;
            println!("{}", "✓ Queue created".green().bold());
            print_queue(&snapshot);
        }

        QueueCommand::List => {
            let snapshots: Vec<QueueSnapshot> = api.call(Method::GET, "/queue", &[], None).await?;
            print_queues(&snapshots);
        }

        QueueCommand::Show { name } => {
            let snapshot: QueueSnapshot = api
                .call(Method::GET, "/queue", &[("name", name)], None)
                .await?;
            print_queue(&snapshot);
        }

        QueueCommand::Search { name, mode, state } => {
            let mut query = Vec::new();
            if let Some(name) = name {
                query.push(("name", name));
            }
            if let Some(mode) = mode {
                query.push(("mode", mode));
            }
            if let Some(state) = state {
                query.push(("state", state.to_ascii_uppercase()));
            }
            let snapshots: Vec<QueueSnapshot> =
                api.call(Method::GET, "/queue/search", &query, None).await?;
            print_queues(&snapshots);
        }

        QueueCommand::Update {
            name,
            rates,
            tuning,
            clear_max_retries,
        } => {
            let mut body = serde_json::Map::new();
            body.insert("name".into(), json!(name));
            if !rates.is_empty() {
                body.insert("rate_limits".into(), json!(parse_rates(&rates)?));
            }
            tuning_fields(&tuning, &mut body);
            if clear_max_retries {
                body.insert("max_retries".into(), Value::Null);
            }

            let snapshot: QueueSnapshot = api
                .call(Method::PATCH, "/queue", &[], Some(Value::Object(body)))
                .await?;
            println!("{}", "✓ Queue updated".green().bold());
            print_queue(&snapshot);
        }

        QueueCommand::Start { name } => lifecycle(api, &name, "start").await?,
        QueueCommand::Stop { name } => lifecycle(api, &name, "stop").await?,
        QueueCommand::Pause { name } => lifecycle(api, &name, "pause").await?,
        QueueCommand::Unpause { name } => lifecycle(api, &name, "unpause").await?,
        QueueCommand::Drain { name } => lifecycle(api, &name, "drain").await?,

        QueueCommand::Delete { name, release_name } => {
            let query = [("name", name.clone()), ("release_name", release_name.to_string())];
            let _: Value = api.call(Method::DELETE, "/queue", &query, None).await?;
            println!("{}", format!("✓ Queue {} destroyed", name).green().bold());
            if !release_name {
                println!("  Name stays reserved (use --release-name to free it)");
            }
        }

        QueueCommand::Tasks { name, status } => {
            let query: Vec<(&str, String)> = status.map(|s| vec![("status", s)]).unwrap_or_default();
            let jobs: Vec<Job> = api
                .call(Method::GET, &format!("/queue/{}/tasks", name), &query, None)
                .await?;
            print_tasks(&jobs);
        }
    }
    Ok(())
}

async fn lifecycle(api: &ApiClient, name: &str, action: &str) -> Result<()> {
    let snapshot: QueueSnapshot = api
        .call(Method::POST, &format!("/queue/{}/{}", name, action), &[], None)
        .await?;
    println!(
        "{} {} is now {}",
        "✓".green().bold(),
        snapshot.config.name,
        colored_state(snapshot.state)
    );
    Ok(())
}

async fn run_task(api: &ApiClient, command: TaskCommand) -> Result<()> {
    match command {
        TaskCommand::Enqueue {
            queue,
            payload,
            priority,
            at,
        } => {
            let payload: Value = serde_json::from_str(&payload).context("Invalid JSON payload")?;
            let body = json!({
                "queue": queue,
                "payload": payload,
                "priority": priority,
                "scheduled_at": at,
            });
            let result: Value = api.call(Method::POST, "/task", &[], Some(body)).await?;
            println!("{}", "✓ Task enqueued".green().bold());
            println!("  {} {}", "ID:".bold(), result["id"].as_str().unwrap_or("-"));
        }

        TaskCommand::Bulk { queue, jobs } => {
            let jobs: Value = serde_json::from_str(&jobs).context("Invalid JSON jobs array")?;
            let result: Value = api
                .call(Method::POST, "/tasks", &[], Some(json!({"queue": queue, "jobs": jobs})))
                .await?;
            let ids = result["ids"].as_array().cloned().unwrap_or_default();
            println!("{}", format!("✓ {} tasks enqueued", ids.len()).green().bold());
            for id in ids {
                println!("  {}", id.as_str().unwrap_or("-"));
            }
        }

        TaskCommand::Get { id } => {
            let job: Job = api.call(Method::GET, &format!("/task/{}", id), &[], None).await?;
            print_task("Task", &job);
            println!("  {} {}", "Payload:".bold(), job.payload.as_value());
        }

        TaskCommand::Update { id, priority, at } => {
            let body = json!({"priority": priority, "scheduled_at": at});
            let job: Job = api
                .call(Method::PATCH, &format!("/task/{}", id), &[], Some(body))
                .await?;
            print_task("✓ Updated", &job);
        }

        TaskCommand::Cancel { id, queue } => {
            let job: Job = api
                .call(Method::DELETE, &format!("/task/{}", id), &task_query(queue), None)
                .await?;
            print_task("✓ Cancel", &job);
        }

        TaskCommand::Ack { id, queue } => {
            let job: Job = api
                .call(Method::POST, &format!("/task/{}/ack", id), &task_query(queue), None)
                .await?;
            print_task("✓ Ack", &job);
        }

        TaskCommand::Fail { id, queue, reason } => {
            let body = json!({"queue": queue, "reason": reason});
            let job: Job = api
                .call(Method::POST, &format!("/task/{}/fail", id), &[], Some(body))
                .await?;
            print_task("✓ Fail", &job);
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let api = ApiClient::new(&cli.url);

    let result = match cli.command {
        Commands::Queue(command) => run_queue(&api, command).await,
        Commands::Task(command) => run_task(&api, command).await,
    };

    if let Err(e) = result {
        eprintln!("{} {:#}", "✗".red().bold(), e);
        std::process::exit(1);
    }
    Ok(())
}
