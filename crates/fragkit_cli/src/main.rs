//! CLI smoke entry point.
//!
//! # Responsibility
//! - Verify `fragkit_core` linkage.
//! - Run a deterministic in-memory session of the Ranks extension.
//!
//! Pass `--log-dir <dir>` to enable the rotating file logger.

use fragkit_core::extension::api::HttpMethod;
use fragkit_core::messaging::strip_color_tokens;
use fragkit_core::plugins::ranks::LEADERBOARD_ROUTE;
use fragkit_core::{
    default_log_level, init_logging, rank_extension, Actor, CommandContext, CoreServices,
    ExtensionConfig, ExtensionHost,
};
use serde_json::json;
use std::error::Error;
use std::process::ExitCode;
use std::sync::Arc;

const DEMO_KILLS: &[(&str, &str)] = &[
    ("alice", "bob"),
    ("alice", "carol"),
    ("bob", "carol"),
    ("alice", "bob"),
    ("carol", "carol"),
];

fn main() -> ExitCode {
    println!("fragkit_core ping={}", fragkit_core::ping());
    println!("fragkit_core version={}", fragkit_core::core_version());
    match run_demo() {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("fragkit demo failed: {err}");
            ExitCode::FAILURE
        }
    }
}

fn log_dir_arg() -> Option<String> {
    let mut args = std::env::args().skip(1);
    while let Some(arg) = args.next() {
        if arg == "--log-dir" {
            return args.next();
        }
    }
    None
}

fn run_demo() -> Result<(), Box<dyn Error>> {
    if let Some(dir) = log_dir_arg() {
        init_logging(default_log_level(), &dir)?;
    }

    let services = CoreServices::in_memory()?;
    let mut overrides = ExtensionConfig::new();
    overrides.insert(
        "ranks".to_string(),
        json!([
            {"name": "Recruit", "threshold": 0, "tag": "^7"},
            {"name": "Private", "threshold": 2, "tag": "^2"},
            {"name": "Sergeant", "threshold": 3, "tag": "^4"},
        ]),
    );
    overrides.insert("reconcile_interval_secs".to_string(), json!(0));

    let mut host = ExtensionHost::new();
    host.register(Box::new(rank_extension(
        Arc::clone(&services.locator),
        overrides,
    )))?;
    host.init_all();

    for (killer, victim) in DEMO_KILLS {
        services.bus.publish(
            "player.kill",
            json!({
                "killer_id": killer,
                "victim_id": victim,
                "killer_name": killer,
                "server_id": "demo",
            }),
        );
    }

    let ctx = CommandContext::new(Actor::new("alice", "alice")).on_server("demo");
    for player in ["alice", "bob", "carol"] {
        let outcome = host.dispatch_command("rank", &[player.to_string()], &ctx);
        println!("rank {}", strip_color_tokens(&outcome.message));
    }
    let denied = host.dispatch_command("resetrank", &["bob".to_string()], &ctx);
    println!("resetrank {}", strip_color_tokens(&denied.message));

    if let Some(board) = services
        .routes
        .call(HttpMethod::Get, LEADERBOARD_ROUTE, &json!({"limit": 3}))
    {
        println!("leaderboard {}", serde_json::to_string(&board?)?);
    }
    for (server, line) in services.chat.lines() {
        println!("chat[{server}] {}", strip_color_tokens(&line));
    }

    host.shutdown_all();
    services.close()?;
    log::info!("event=cli_demo module=cli status=ok");
    Ok(())
}
