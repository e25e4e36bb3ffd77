use anyhow::Context;
use clap::{Parser, Subcommand};
use internsheep_workflow::{
    config::{get_config, init_config, LogFormat},
    events::WorkflowEvent,
    models::application::{Application, ApplicationStatus, InterviewMethod, Role},
    models::command::InterviewDraft,
    services::notification_bridge::{Notification, NotificationBridge},
    session::Session,
    WorkflowEngine,
};
use tokio::sync::broadcast;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[derive(Parser)]
#[command(name = "internsheep", about = "Review and track internship applications")]
struct Cli {
    /// Bearer token for the backend
    #[arg(long, global = true, env = "INTERNSHEEP_API_TOKEN", hide_env_values = true)]
    token: Option<String>,

    /// Act as this role instead of the one in the token
    #[arg(long, global = true)]
    role: Option<Role>,

    /// Print JSON instead of text
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List applications
    List {
        #[arg(long)]
        status: Option<ApplicationStatus>,
    },
    Show {
        id: String,
    },
    /// Mark an applied application as reviewed
    Review {
        id: String,
    },
    /// Schedule or reschedule an interview
    Schedule {
        id: String,
        /// YYYY-MM-DD
        #[arg(long)]
        date: String,
        /// HH:MM
        #[arg(long)]
        time: String,
        #[arg(long)]
        method: InterviewMethod,
        /// Required for offline interviews
        #[arg(long)]
        location: Option<String>,
        #[arg(long)]
        notes: Option<String>,
    },
    Accept {
        id: String,
        #[arg(long)]
        note: Option<String>,
    },
    Reject {
        id: String,
        #[arg(long)]
        note: Option<String>,
    },
    /// Confirm attendance for a scheduled interview (students)
    ConfirmAttendance {
        id: String,
        #[arg(long, default_value = "system")]
        method: String,
    },
}

fn init_tracing(format: LogFormat) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    let registry = tracing_subscriber::registry().with(filter);
    match format {
        LogFormat::Json => registry
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .init(),
        LogFormat::Text => registry
            .with(fmt::layer().with_writer(std::io::stderr))
            .init(),
    }
}

fn session_for(token: &str, role: Option<Role>) -> anyhow::Result<Session> {
    match (Session::from_token(token), role) {
        (Ok(session), Some(role)) => Ok(session.with_role(role)),
        (Ok(session), None) => Ok(session),
        (Err(_), Some(role)) => Ok(Session::new(token, role, "cli")),
        (Err(err), None) => Err(err).context("Pass --role when the token carries no role claim"),
    }
}

fn print_notifications(
    bridge: &NotificationBridge,
    events: &mut broadcast::Receiver<WorkflowEvent>,
    json: bool,
) {
    while let Ok(event) = events.try_recv() {
        if let Some(notification) = bridge.notify(&event) {
            print_notification(&notification, json);
        }
    }
}

fn print_notification(notification: &Notification, json: bool) {
    if json {
        if let Ok(line) = serde_json::to_string(notification) {
            eprintln!("{}", line);
        }
    } else {
        eprintln!(
            "[{}] {}",
            format!("{:?}", notification.level).to_lowercase(),
            notification.message
        );
    }
}

fn print_application(app: &Application, json: bool) -> anyhow::Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(app)?);
        return Ok(());
    }
    println!(
        "{}  job={}  student={}  status={}  changed={}",
        app.id,
        app.job_id,
        app.student_id,
        app.status,
        app.status_changed_at.to_rfc3339()
    );
    if let Some(interview) = &app.interview {
        println!(
            "    interview: {} {} {}{}",
            interview.date,
            interview.time.format("%H:%M"),
            interview.method.as_str(),
            interview
                .location
                .as_deref()
                .map(|l| format!(" @ {}", l))
                .unwrap_or_default()
        );
    }
    if let Some(confirmation) = &app.attendance_confirmation {
        println!(
            "    attendance confirmed {} via {}",
            confirmation.confirmed_at.to_rfc3339(),
            confirmation.method
        );
    }
    if let Some(note) = &app.feedback_note {
        println!("    feedback: {}", note);
    }
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    init_config()?;
    let config = get_config();
    init_tracing(config.log_format);

    let token = cli
        .token
        .clone()
        .or_else(|| config.api_token.clone())
        .context("No API token: pass --token or set INTERNSHEEP_API_TOKEN")?;
    let session = session_for(&token, cli.role)?;
    tracing::info!(role = %session.role(), subject = session.subject(), "Session started");

    let engine = WorkflowEngine::new(config, session)?;
    let bridge = NotificationBridge::new();
    let mut events = engine.subscribe();

    engine
        .gateway
        .refresh()
        .await
        .context("Failed to load applications")?;

    let gateway = &engine.gateway;
    let result = match cli.command {
        Commands::List { status } => {
            let apps = match status {
                Some(status) => engine.store.get_by_status(status),
                None => engine.store.all(),
            };
            if cli.json {
                println!("{}", serde_json::to_string_pretty(&apps)?);
            } else {
                for app in &apps {
                    print_application(app, false)?;
                }
            }
            return Ok(());
        }
        Commands::Show { id } => gateway.refresh_one(&id).await,
        Commands::Review { id } => gateway.review(&id).await,
        Commands::Schedule {
            id,
            date,
            time,
            method,
            location,
            notes,
        } => {
            let draft = InterviewDraft {
                date: Some(date),
                time: Some(time),
                method: Some(method),
                location,
                notes,
            };
            gateway.schedule_interview(&id, draft).await
        }
        Commands::Accept { id, note } => gateway.accept(&id, note).await,
        Commands::Reject { id, note } => gateway.reject(&id, note).await,
        Commands::ConfirmAttendance { id, method } => {
            gateway.confirm_attendance(&id, method).await
        }
    };

    print_notifications(&bridge, &mut events, cli.json);
    let app = result?;
    print_application(&app, cli.json)
}
