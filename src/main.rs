//! Terminal front-end for the s3keeper access gate.
//!
//! Stands in for the GUI shell: drives the same [`AuthFlow`], and only a
//! successful flow yields the `(user_id, username)` pair that unlocks
//! the rest of the manager.

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use console::style;
use dialoguer::{Confirm, Input, Password};
use tracing_subscriber::EnvFilter;

use s3keeper::auth::{
    validation, AuthFlow, AuthenticatedUser, CancelPolicy, CredentialStore, FlowState, Mode,
};
use s3keeper::settings::SettingsStore;

#[derive(Parser)]
#[command(name = "s3keeper", version, about = "Local access gate for the S3/MinIO manager")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Sign in (or, on first run, create the first account)
    Login,
    /// Create a new account
    Register,
    /// Forget the remembered session
    Logout,
    /// Show who the remembered session belongs to
    Whoami,
    /// Change your password
    Passwd,
    /// List registered usernames
    Users,
    /// Show connection settings (secret key redacted)
    Config,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .init();

    let cli = Cli::parse();
    let store = CredentialStore::open_default()?;
    let settings = SettingsStore::default_location()?;

    match cli.command {
        Command::Login => {
            let user = run_flow(store, settings, None)?;
            hand_off(&user);
        }
        Command::Register => {
            let user = run_flow(store, settings, Some(Mode::Register))?;
            hand_off(&user);
        }
        Command::Logout => {
            if settings.clear_session()? {
                println!("{} Session cleared.", style("✓").green());
            } else {
                println!("No session to clear.");
            }
        }
        Command::Whoami => whoami(&store, &settings)?,
        Command::Passwd => passwd(&store)?,
        Command::Users => {
            for name in store.list_usernames()? {
                println!("{name}");
            }
        }
        Command::Config => show_config(&settings),
    }
    Ok(())
}

/// Drive the auth flow interactively until it reaches a terminal state.
fn run_flow(
    store: CredentialStore,
    settings: SettingsStore,
    force_mode: Option<Mode>,
) -> Result<AuthenticatedUser> {
    let mut flow = AuthFlow::new(store, settings);

    if let FlowState::Authenticated(user) = flow.state() {
        println!(
            "{} Welcome back, {} (remembered session).",
            style("✓").green(),
            style(&user.username).bold()
        );
        return Ok(user.clone());
    }

    if let (Some(wanted), Some(current)) = (force_mode, flow.mode()) {
        if current != wanted {
            flow.toggle_mode();
        }
    }

    loop {
        let mode = match flow.mode() {
            Some(mode) => mode,
            None => break,
        };
        match mode {
            Mode::Login => println!("Sign in to continue."),
            Mode::Register => println!("Create an account to begin."),
        }

        let filled = match prompt_fields(&mut flow, mode) {
            Ok(filled) => filled,
            // Prompt aborted (EOF / Ctrl-C): explicit cancel, gate exits.
            Err(_) => {
                flow.cancel(CancelPolicy::ExitProcess);
                break;
            }
        };
        if !filled {
            continue;
        }

        match flow.submit() {
            Ok(user) => {
                println!("{} Signed in as {}.", style("✓").green(), style(&user.username).bold());
                return Ok(user);
            }
            Err(e) => {
                println!("{} {}", style("✗").red(), e.user_message());
            }
        }
    }
    bail!("authentication cancelled");
}

/// Fill the flow's form from the terminal. Returns false when the user
/// asked to switch modes instead of submitting.
fn prompt_fields(flow: &mut AuthFlow, mode: Mode) -> Result<bool> {
    let username: String = Input::new()
        .with_prompt("Username")
        .with_initial_text(flow.fields().username.clone())
        .interact_text()?;

    // Typing "/switch" as the username toggles sign-in <-> registration.
    if username.trim() == "/switch" {
        flow.toggle_mode();
        return Ok(false);
    }
    flow.set_username(&username);

    let password = Password::new().with_prompt("Password").interact()?;
    flow.set_password(&password);

    if mode == Mode::Register {
        println!("  strength: {}", strength_meter(flow.password_strength()));
        let confirm = Password::new().with_prompt("Confirm password").interact()?;
        flow.set_confirm(&confirm);
    }

    flow.remember_me = Confirm::new()
        .with_prompt("Keep me signed in?")
        .default(true)
        .interact()?;
    Ok(true)
}

fn strength_meter(score: u8) -> String {
    let filled = (score as usize) / 10;
    let bar: String = "█".repeat(filled) + &"░".repeat(10 - filled);
    let styled = match score {
        0..=39 => style(bar).red(),
        40..=69 => style(bar).yellow(),
        _ => style(bar).green(),
    };
    format!("{styled} {score}/100")
}

/// The gate's hand-off: report whether the host could construct an S3
/// client from the connection settings.
fn hand_off(user: &AuthenticatedUser) {
    tracing::info!(user_id = user.user_id, username = %user.username, "Authentication hand-off");
    let settings = match SettingsStore::default_location() {
        Ok(settings) => settings,
        Err(_) => return,
    };
    let missing = settings.load().connection.missing_keys();
    if missing.is_empty() {
        println!("Connection settings complete — manager ready.");
    } else {
        println!(
            "{} Connection settings incomplete, missing: {}",
            style("!").yellow(),
            missing.join(", ")
        );
    }
}

fn whoami(store: &CredentialStore, settings: &SettingsStore) -> Result<()> {
    let record = match settings.load().session_record() {
        Ok(Some(record)) => record,
        Ok(None) => {
            println!("No remembered session.");
            return Ok(());
        }
        Err(e) => {
            println!("Stored session is unreadable ({e}).");
            return Ok(());
        }
    };
    let unexpired = record.is_unexpired().unwrap_or(false);
    let known_user = store.get_user(&record.username)?.is_some();
    let status = if unexpired && known_user {
        style("valid").green()
    } else {
        style("invalid").red()
    };
    println!(
        "{} — session {} (expires {})",
        style(&record.username).bold(),
        status,
        record.expires_at
    );
    Ok(())
}

fn passwd(store: &CredentialStore) -> Result<()> {
    let username: String = Input::new().with_prompt("Username").interact_text()?;
    let current = Password::new().with_prompt("Current password").interact()?;
    let user_id = match store.verify_user(&username, &current)? {
        Some(id) => id,
        None => bail!("invalid username or password"),
    };

    let new = Password::new()
        .with_prompt("New password")
        .with_confirmation("Confirm new password", "Passwords do not match")
        .interact()?;
    if new.chars().count() < validation::MIN_PASSWORD_LEN {
        bail!(
            "password must be at least {} characters",
            validation::MIN_PASSWORD_LEN
        );
    }
    store
        .change_password(user_id, &new)
        .context("changing password")?;
    println!("{} Password changed.", style("✓").green());
    Ok(())
}

fn show_config(settings: &SettingsStore) {
    let doc = settings.load();
    let cs = &doc.connection;
    let show = |v: &Option<String>| v.clone().unwrap_or_else(|| "(unset)".into());

    println!("settings file:   {}", settings.path().display());
    println!("PROVIDER:        {}", show(&cs.provider));
    println!("AWS_REGION:      {}", show(&cs.region));
    println!(
        "AWS_S3_ENDPOINT: {}",
        cs.endpoint_or_default().unwrap_or_else(|| "(unset)".into())
    );
    println!("AWS_ACCESS_KEY_ID:     {}", show(&cs.access_key_id));
    println!(
        "AWS_SECRET_ACCESS_KEY: {}",
        if cs.secret_access_key.is_some() { "********" } else { "(unset)" }
    );
    let missing = cs.missing_keys();
    if missing.is_empty() {
        println!("{} ready to connect", style("✓").green());
    } else {
        println!("{} missing: {}", style("!").yellow(), missing.join(", "));
    }
}
