mod cli;
mod terminal;

use std::process::ExitCode;

use clap::Parser;
use serde_json::json;

use cli::{AddArgs, Cli, Commands, ConfigCommand, FeatureArgs};
use terminal::TerminalGuard;
use lagoon_cli::config::FeatureFlags;
use lagoon_cli::{ConfigStorage, Error, KeySelection, ProfileFields, ProfileStore, SessionContext};

fn main() -> ExitCode {
    let cli = Cli::parse();
    lagoon_cli::init_logging(cli.debug);

    let runtime = match tokio::runtime::Builder::new_current_thread().enable_all().build() {
        Ok(runtime) => runtime,
        Err(e) => {
            eprintln!("Error: failed to start async runtime: {}", e);
            return ExitCode::FAILURE;
        }
    };

    let terminal = TerminalGuard::capture();

    // Losing the race drops the command future, which closes any agent
    // socket or SSH session it holds.
    let result = runtime.block_on(async {
        tokio::select! {
            result = run(cli) => result,
            _ = tokio::signal::ctrl_c() => Err(Error::Interrupted),
        }
    });
    // A passphrase prompt may still be blocking on the terminal
    runtime.shutdown_background();
    if matches!(result, Err(Error::Interrupted)) {
        terminal.restore();
        eprintln!();
    }

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::debug!("Command failed: {:?}", e);
            eprintln!("Error: {}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> Result<(), Error> {
    let storage = match &cli.config_file {
        Some(path) => ConfigStorage::with_path(path),
        None => ConfigStorage::new()?,
    };
    let key = KeySelection::from_flag(cli.ssh_key.clone());
    let mut session = lagoon_cli::open_session(storage, key, cli.lagoon.clone()).await?;
    let json_output = cli.output_json;

    match cli.command {
        Commands::Config { command } => run_config(command, &mut session, json_output).await,
        Commands::Login => {
            let name = session.select_profile().await?;
            session.login(&name).await?;
            if json_output {
                print_json(&json!({ "result": "success", "lagoon": name }));
            } else {
                println!("Token fetched and saved.");
            }
            Ok(())
        }
        Commands::Token => {
            let name = session.select_profile().await?;
            let token = session.get_valid_token(&name).await?;
            println!("{}", token);
            Ok(())
        }
    }
}

async fn run_config(
    command: ConfigCommand,
    session: &mut SessionContext,
    json_output: bool,
) -> Result<(), Error> {
    match command {
        ConfigCommand::Default { name } => {
            let name = name.trim().to_string();
            session.store_mut().set_default(&name).await?;
            render_result(json_output, json!({ "default-lagoon": name }));
        }
        ConfigCommand::List => render_list(session.store(), json_output),
        ConfigCommand::Add(args) => add_profile(session.store_mut(), args, json_output).await?,
        ConfigCommand::Delete { name, force } => {
            let name = name.trim().to_string();
            if !session.store().contains(&name) {
                return Err(Error::NotFound(name));
            }
            let question = format!(
                "You are attempting to delete config for lagoon '{}', are you sure?",
                name
            );
            if !force && !confirm(question).await? {
                println!("Nothing deleted.");
                return Ok(());
            }
            session.store_mut().delete(&name).await?;
            render_result(json_output, json!({ "deleted-lagoon": name }));
        }
        ConfigCommand::Current => {
            let current = session.store().current_profile();
            if json_output {
                print_json(&json!({ "current": current }));
            } else {
                println!("{}", current.unwrap_or_default());
            }
        }
        ConfigCommand::Feature(args) => set_features(session.store_mut(), args).await?,
    }
    Ok(())
}

async fn add_profile(store: &mut ProfileStore, args: AddArgs, json_output: bool) -> Result<(), Error> {
    let fields = ProfileFields {
        hostname: args.hostname,
        port: args.port,
        api_endpoint: args.endpoint,
        ui: args.ui,
        logs: args.logs,
        token: args.token,
    };
    let profile = store.upsert(&args.name, fields).await?;

    render_result(
        json_output,
        json!({
            "lagoon": args.name.trim(),
            "hostname": profile.hostname,
            "port": profile.port,
            "graphql": profile.api_endpoint,
            "ui": profile.auxiliary.ui,
            "logs": profile.auxiliary.logs,
        }),
    );
    Ok(())
}

async fn set_features(store: &mut ProfileStore, args: FeatureArgs) -> Result<(), Error> {
    let mut features: FeatureFlags = store.features();
    if let Some(disable) = args.disable_update_check {
        features.update_check_disable = disable;
    }
    if let Some(disable) = args.disable_project_directory_check {
        features.project_directory_check_disable = disable;
    }
    store.set_features(features).await?;
    Ok(())
}

async fn confirm(question: String) -> Result<bool, Error> {
    tokio::task::spawn_blocking(move || {
        dialoguer::Confirm::new()
            .with_prompt(question)
            .default(false)
            .interact()
    })
    .await
    .map_err(|e| Error::Prompt(e.to_string()))?
    .map_err(|e| Error::Prompt(e.to_string()))
}

fn render_list(store: &ProfileStore, json_output: bool) {
    if json_output {
        let lagoons: Vec<_> = store
            .list()
            .into_iter()
            .map(|(name, profile)| {
                json!({
                    "name": name,
                    "hostname": profile.hostname,
                    "port": profile.port,
                    "graphql": profile.api_endpoint,
                    "ui": profile.auxiliary.ui,
                    "logs": profile.auxiliary.logs,
                    "token": profile.token().is_some(),
                })
            })
            .collect();
        print_json(&json!({
            "lagoons": lagoons,
            "default": store.default_profile(),
            "current": store.current_profile(),
        }));
        return;
    }

    println!("You have the following Lagoon instances configured:");
    for (name, profile) in store.list() {
        println!("Name: {}", name);
        println!(" - Hostname: {}", profile.hostname);
        println!(" - GraphQL: {}", profile.api_endpoint);
        println!(" - Port: {}", profile.port);
        println!(" - UI: {}", profile.auxiliary.ui.as_deref().unwrap_or_default());
        println!(" - Logs: {}", profile.auxiliary.logs.as_deref().unwrap_or_default());
        println!(
            " - Token: {}",
            if profile.token().is_some() { "cached" } else { "none" }
        );
    }
    println!("\nYour default Lagoon is:");
    println!("Name: {}\n", store.default_profile().unwrap_or_default());
    println!("Your current Lagoon is:");
    println!("Name: {}", store.current_profile().unwrap_or_default());
}

fn render_result(json_output: bool, data: serde_json::Value) {
    if json_output {
        print_json(&json!({ "result": "success", "resultData": data }));
        return;
    }
    println!("Result: success");
    if let Some(fields) = data.as_object() {
        for (key, value) in fields {
            match value {
                serde_json::Value::Null => {}
                serde_json::Value::String(s) => println!("{}: {}", key, s),
                other => println!("{}: {}", key, other),
            }
        }
    }
}

fn print_json(value: &serde_json::Value) {
    match serde_json::to_string_pretty(value) {
        Ok(text) => println!("{}", text),
        Err(e) => eprintln!("Error: failed to render JSON: {}", e),
    }
}
