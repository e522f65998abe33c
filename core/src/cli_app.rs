use crate::api::{HospitalApi, HttpApi};
use crate::config::Config;
use crate::conversations::{Delivery, Inbox};
use crate::models::{
    ChatMessage, LabReport, LabReportStatus, LabReportUpdate, NewLabReport, NewPatient,
    Notification, SearchResults, UnreadCounts,
};
use crate::notifications::NotificationCenter;
use crate::realtime::ConnectionState;
use crate::records::{LabReportBoard, PharmacyAlerts};
use crate::search::{normalize_query, SearchController, SearchState};
use crate::session::{SessionEvent, SessionManager};
use crate::unread::UnreadStore;
use colored::*;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::broadcast::error::RecvError;

/// Entry point shared by the `wardlink` binary.
pub async fn run(args: Vec<String>) -> anyhow::Result<()> {
    let outcome = execute(args).await;
    if let Err(e) = &outcome {
        eprintln!("{} {}", "✗".red().bold(), e.to_string().red());
    }
    outcome
}

async fn execute(args: Vec<String>) -> anyhow::Result<()> {
    let bin = args
        .first()
        .map(|s| s.as_str())
        .unwrap_or("wardlink")
        .to_string();

    let (config, rest) = Config::from_args(&args)?;
    let Some(command) = rest.first() else {
        print_usage(&bin);
        return Ok(());
    };
    let operands = &rest[1..];

    let api: Arc<dyn HospitalApi> = Arc::new(HttpApi::new(&config));

    match command.as_str() {
        "counts" => show_counts(api).await,
        "chats" => list_chats(&config, api).await,
        "history" => match operands.first() {
            Some(user_id) => show_history(&config, api, user_id).await,
            None => usage(&bin, "history <user_id>"),
        },
        "send" => {
            if operands.len() < 2 {
                usage(&bin, "send <user_id> <message>")
            } else {
                send_message(&config, api, &operands[0], &operands[1..].join(" ")).await
            }
        }
        "notifications" => list_notifications(api).await,
        "read" => match operands.first() {
            Some(id) => {
                notification_center(api).mark_read(id).await?;
                println!("{} Notification {} marked read", "✓".green(), id.cyan());
                Ok(())
            }
            None => usage(&bin, "read <notification_id>"),
        },
        "read-all" => {
            notification_center(api).mark_all_read().await?;
            println!("{} All notifications marked read", "✓".green());
            Ok(())
        }
        "delete" => match operands.first() {
            Some(id) => {
                notification_center(api).delete(id).await?;
                println!("{} Notification {} deleted", "✓".green(), id.cyan());
                Ok(())
            }
            None => usage(&bin, "delete <notification_id>"),
        },
        "clear" => {
            notification_center(api).delete_all().await?;
            println!("{} All notifications deleted", "✓".green());
            Ok(())
        }
        "search" => {
            if operands.is_empty() {
                interactive_search(&config, api).await
            } else {
                search_once(&config, api, &operands.join(" ")).await
            }
        }
        "patients" => list_patients(api).await,
        "register" => match operands.first() {
            Some(name) => register_patient(api, name, &operands[1..]).await,
            None => usage(&bin, "register <name> [age] [gender] [phone]"),
        },
        "lab-reports" => list_lab_reports(api).await,
        "lab-new" => {
            if operands.len() < 2 {
                usage(&bin, "lab-new <patient_id> <test name>")
            } else {
                create_lab_report(api, &operands[0], &operands[1..].join(" ")).await
            }
        }
        "lab-set" => {
            if operands.len() < 2 {
                usage(&bin, "lab-set <report_id> <pending|in-progress|completed> [result]")
            } else {
                update_lab_report(api, &operands[0], &operands[1], &operands[2..].join(" ")).await
            }
        }
        "alerts" => show_alerts(api).await,
        "watch" => watch(config, api).await,
        _ => {
            eprintln!("{} Unknown command: {}", "✗".red().bold(), command.red());
            print_usage(&bin);
            Ok(())
        }
    }
}

fn print_usage(bin: &str) {
    println!("{}", "⚕ WardLink".bright_cyan().bold());
    println!();
    println!("{}", "Usage:".bright_white().bold());
    println!(
        "  {} [--api <url>] [--realtime <host:port>] [--token <t>] [--user <id>] <command> [args]",
        bin.cyan()
    );
    println!();
    println!("{}", "Commands:".bright_white().bold());
    println!("  {}                       Unread message and notification counts", "counts".cyan());
    println!("  {}                        Conversations, most recent first", "chats".cyan());
    println!("  {} <user_id>            Open a conversation and mark it read", "history".cyan());
    println!("  {} <user_id> <message>     Send a chat message", "send".cyan());
    println!("  {}                Notification list", "notifications".cyan());
    println!(
        "  {} <id> | {} | {} <id> | {}   Manage notifications",
        "read".cyan(),
        "read-all".cyan(),
        "delete".cyan(),
        "clear".cyan()
    );
    println!("  {} [text]                Search (interactive when no text)", "search".cyan());
    println!("  {} | {} | {}  Records", "patients".cyan(), "lab-reports".cyan(), "alerts".cyan());
    println!("  {} <name> [age] [gender] [phone]   Register a patient", "register".cyan());
    println!(
        "  {} <patient_id> <test> | {} <id> <status> [result]   Lab reports",
        "lab-new".cyan(),
        "lab-set".cyan()
    );
    println!("  {}                        Follow real-time events until Ctrl+C", "watch".cyan());
}

fn usage(bin: &str, form: &str) -> anyhow::Result<()> {
    eprintln!("{}", format!("Usage: {} {}", bin, form).yellow());
    Ok(())
}

fn notification_center(api: Arc<dyn HospitalApi>) -> NotificationCenter {
    let unread = Arc::new(UnreadStore::new(api.clone()));
    NotificationCenter::new(api, unread)
}

fn inbox(config: &Config, api: Arc<dyn HospitalApi>) -> anyhow::Result<Inbox> {
    let me = config.require_user()?;
    let unread = Arc::new(UnreadStore::new(api.clone()));
    Ok(Inbox::new(me, api, unread))
}

fn print_counts(counts: &UnreadCounts) {
    println!(
        "{} {}   {} {}",
        "Messages:".bright_white(),
        badge(counts.message_count),
        "Notifications:".bright_white(),
        badge(counts.notification_count)
    );
}

fn badge(n: u64) -> ColoredString {
    if n == 0 {
        n.to_string().dimmed()
    } else {
        n.to_string().yellow().bold()
    }
}

fn print_message(me: &str, m: &ChatMessage) {
    let time = m.created_at.format("%Y-%m-%d %H:%M");
    if m.sender == me {
        println!("  {} {} {}", time.to_string().dimmed(), "me".green(), m.message);
    } else {
        println!("  {} {} {}", time.to_string().dimmed(), m.sender.cyan(), m.message);
    }
}

fn print_notification(n: &Notification) {
    let marker = if n.is_read { "·".dimmed() } else { "●".yellow() };
    println!(
        "{} {} {} {}",
        marker,
        n.id.dimmed(),
        n.title.bright_white(),
        n.message
    );
    if let Some(link) = &n.link {
        println!("    {}", link.dimmed());
    }
}

fn print_results(results: &SearchResults) {
    if results.is_empty() {
        println!("{}", "No results".dimmed());
        return;
    }
    let mut last = None;
    for (category, line) in results.summary_lines() {
        if last != Some(category) {
            println!("{}", category.to_string().bright_white().bold());
            last = Some(category);
        }
        println!("  {}", line);
    }
}

async fn show_counts(api: Arc<dyn HospitalApi>) -> anyhow::Result<()> {
    let store = UnreadStore::new(api);
    let counts = store.fetch_unread_count().await?;
    print_counts(&counts);
    Ok(())
}

async fn list_chats(config: &Config, api: Arc<dyn HospitalApi>) -> anyhow::Result<()> {
    let inbox = inbox(config, api)?;
    let counterparts = inbox.load_counterparts().await?;
    if counterparts.is_empty() {
        println!("{}", "No conversations".dimmed());
    }
    for c in counterparts {
        let unread = if c.unread_count > 0 {
            format!(" ({})", c.unread_count).yellow().bold()
        } else {
            "".normal()
        };
        println!("{} {} {}{}", c.id.dimmed(), c.name.cyan(), c.role.to_string().dimmed(), unread);
    }
    Ok(())
}

async fn show_history(
    config: &Config,
    api: Arc<dyn HospitalApi>,
    user_id: &str,
) -> anyhow::Result<()> {
    let inbox = inbox(config, api)?;
    let messages = inbox.open_conversation(user_id).await?;
    if messages.is_empty() {
        println!("{}", "No messages yet".dimmed());
    }
    for m in &messages {
        print_message(&inbox.me().id, m);
    }
    Ok(())
}

async fn send_message(
    config: &Config,
    api: Arc<dyn HospitalApi>,
    to: &str,
    body: &str,
) -> anyhow::Result<()> {
    let inbox = inbox(config, api)?;
    let sent = inbox.send_message(to, body).await?;
    match sent.id {
        Some(id) => println!("{} Message sent! ID: {}", "✓".green(), id.cyan()),
        None => println!("{} Message sent", "✓".green()),
    }
    Ok(())
}

async fn list_notifications(api: Arc<dyn HospitalApi>) -> anyhow::Result<()> {
    let items = notification_center(api).list().await?;
    if items.is_empty() {
        println!("{}", "No notifications".dimmed());
    }
    for n in &items {
        print_notification(n);
    }
    Ok(())
}

async fn search_once(config: &Config, api: Arc<dyn HospitalApi>, text: &str) -> anyhow::Result<()> {
    let Some(query) = normalize_query(text, config.search_min_chars) else {
        println!(
            "{}",
            format!("Type at least {} characters to search", config.search_min_chars).dimmed()
        );
        return Ok(());
    };
    let results = api.search(&query).await?;
    print_results(&results);
    Ok(())
}

/// Each stdin line replaces the search box contents
async fn interactive_search(config: &Config, api: Arc<dyn HospitalApi>) -> anyhow::Result<()> {
    let controller = SearchController::spawn(api, config.search_debounce, config.search_min_chars);
    let mut states = controller.subscribe();
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    println!("{}", "Type to search, Ctrl+D to quit".dimmed());

    loop {
        tokio::select! {
            line = lines.next_line() => match line? {
                Some(text) => controller.input(text),
                None => break,
            },
            changed = states.changed() => {
                if changed.is_err() {
                    break;
                }
                let state = states.borrow_and_update().clone();
                match state {
                    SearchState::Idle => {}
                    SearchState::Searching { query } => {
                        println!("{}", format!("Searching {:?}…", query).dimmed())
                    }
                    SearchState::Ready { results, .. } => print_results(&results),
                    SearchState::Failed { message, .. } => {
                        eprintln!("{} {}", "✗".red(), message.red())
                    }
                }
            }
        }
    }

    controller.shutdown().await;
    Ok(())
}

async fn list_patients(api: Arc<dyn HospitalApi>) -> anyhow::Result<()> {
    let patients = api.patients().await?;
    for p in &patients {
        println!("{} {}", p.id.dimmed(), p.summary());
    }
    println!("{}", format!("{} patients", patients.len()).dimmed());
    Ok(())
}

async fn register_patient(
    api: Arc<dyn HospitalApi>,
    name: &str,
    rest: &[String],
) -> anyhow::Result<()> {
    let age = match rest.first() {
        Some(a) => Some(
            a.parse::<u32>()
                .map_err(|_| anyhow::anyhow!("Age must be a number, got {}", a))?,
        ),
        None => None,
    };
    let patient = NewPatient {
        name: name.to_string(),
        age,
        gender: rest.get(1).cloned(),
        phone: rest.get(2).cloned(),
        blood_group: None,
    };
    let created = api.create_patient(&patient).await?;
    println!("{} Registered {}", "✓".green(), created.summary().cyan());
    Ok(())
}

fn print_lab_report(r: &LabReport) {
    let status = match r.status {
        LabReportStatus::Completed => r.status.to_string().green(),
        LabReportStatus::InProgress => r.status.to_string().yellow(),
        _ => r.status.to_string().dimmed(),
    };
    println!(
        "{} {} {} [{}]",
        r.id.dimmed(),
        r.test_name.bright_white(),
        r.patient.as_deref().unwrap_or("-").cyan(),
        status
    );
    if let Some(result) = &r.result {
        println!("    {}", result);
    }
}

async fn list_lab_reports(api: Arc<dyn HospitalApi>) -> anyhow::Result<()> {
    let reports = LabReportBoard::new(api).refresh().await?;
    if reports.is_empty() {
        println!("{}", "No lab reports".dimmed());
    }
    for r in &reports {
        print_lab_report(r);
    }
    Ok(())
}

async fn create_lab_report(
    api: Arc<dyn HospitalApi>,
    patient: &str,
    test_name: &str,
) -> anyhow::Result<()> {
    let report = NewLabReport {
        patient: patient.to_string(),
        test_name: test_name.to_string(),
        notes: None,
    };
    let created = LabReportBoard::new(api).create(&report).await?;
    print!("{} ", "✓".green());
    print_lab_report(&created);
    Ok(())
}

async fn update_lab_report(
    api: Arc<dyn HospitalApi>,
    id: &str,
    status: &str,
    result: &str,
) -> anyhow::Result<()> {
    let status = LabReportStatus::from_name(status)
        .ok_or_else(|| anyhow::anyhow!("Unknown lab report status: {}", status))?;
    let update = LabReportUpdate {
        status: Some(status),
        result: (!result.trim().is_empty()).then(|| result.trim().to_string()),
    };
    let updated = LabReportBoard::new(api).update(id, &update).await?;
    print!("{} ", "✓".green());
    print_lab_report(&updated);
    Ok(())
}

async fn show_alerts(api: Arc<dyn HospitalApi>) -> anyhow::Result<()> {
    let alerts = PharmacyAlerts::new(api).refresh().await?;
    println!("{}", "Low stock".bright_white().bold());
    for m in &alerts.low_stock {
        println!("  {} {}", "!".red(), m.summary());
    }
    println!("{}", "Expiring soon".bright_white().bold());
    for m in &alerts.expiring_soon {
        println!("  {} {}", "!".yellow(), m.summary());
    }
    Ok(())
}

async fn watch(config: Config, api: Arc<dyn HospitalApi>) -> anyhow::Result<()> {
    let user = config.require_user()?;
    let mut manager = SessionManager::new(config, api);
    let session = manager.login(user).await?;

    let me = session.user().id.clone();
    let mut events = session.subscribe();
    let mut counts = session.unread().subscribe();
    print_counts(&counts.borrow_and_update());

    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    loop {
        tokio::select! {
            _ = &mut ctrl_c => {
                println!();
                break;
            }
            event = events.recv() => match event {
                Ok(event) => print_event(&me, &event),
                Err(RecvError::Lagged(n)) => {
                    eprintln!("{}", format!("(skipped {} events)", n).dimmed())
                }
                Err(RecvError::Closed) => break,
            },
            changed = counts.changed() => {
                if changed.is_err() {
                    break;
                }
                let now = *counts.borrow_and_update();
                print_counts(&now);
            }
        }
    }

    manager.logout().await;
    Ok(())
}

fn print_event(me: &str, event: &SessionEvent) {
    match event {
        SessionEvent::Message { message, delivery } => match delivery {
            Delivery::Unread { from, unread_count } => println!(
                "{} {} {}",
                "✉".yellow(),
                format!("{} ({} unread)", from, unread_count).cyan(),
                message.message
            ),
            Delivery::Duplicate => {}
            _ => print_message(me, message),
        },
        SessionEvent::Notification(Some(n)) => print_notification(n),
        SessionEvent::Notification(None) => println!("{} New notification", "●".yellow()),
        SessionEvent::PharmacyAlerts(alerts) => println!(
            "{} Pharmacy alerts: {} low stock, {} expiring",
            "!".red(),
            alerts.low_stock.len(),
            alerts.expiring_soon.len()
        ),
        SessionEvent::LabReport(r) => println!(
            "{} Lab report {} is now {}",
            "⚗".cyan(),
            r.test_name.bright_white(),
            r.status
        ),
        SessionEvent::Connection(state) => match state {
            ConnectionState::Connected => println!("{} Real-time channel connected", "✓".green()),
            ConnectionState::Reconnecting { attempt, delay } => println!(
                "{}",
                format!("Reconnecting in {:?} (attempt {})", delay, attempt).dimmed()
            ),
            ConnectionState::Failed => println!("{} Real-time channel gave up", "✗".red()),
            ConnectionState::Connecting | ConnectionState::Closed => {}
        },
    }
}
