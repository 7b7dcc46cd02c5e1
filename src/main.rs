//! anonode-rs binary entry point.

use clap::Parser;

use anonode_rs::config::{load_config, CliArgs};
use anonode_rs::{logger, plog_fmt, Config, Launcher, LogLevel, Result, ServiceKind};

#[tokio::main]
async fn main() {
    let args = CliArgs::parse();
    if let Err(e) = run(args).await {
        eprintln!("error: {}", e);
        std::process::exit(1);
    }
}

async fn run(args: CliArgs) -> Result<()> {
    if let Some(ref path) = args.generate_config {
        Config::with_all_features().save(path)?;
        println!("wrote default configuration to {}", path.display());
        return Ok(());
    }

    let config = load_config(&args)?;

    if let Some(ref service) = args.print_command {
        let kind: ServiceKind = service.parse()?;
        println!("{}", anonode_rs::compile(&config, kind)?.preview());
        return Ok(());
    }

    logger::init(config.general.log_level, args.logfile.as_deref())?;

    plog_fmt!(
        LogLevel::Notice,
        "anonode-rs {} starting (daemon: {})",
        env!("CARGO_PKG_VERSION"),
        config.general.daemon_executable
    );
    for issue in config.validate() {
        plog_fmt!(LogLevel::Warn, "config: {}", issue);
    }

    let launcher = Launcher::new(config);

    for (kind, e) in launcher.start_enabled().await {
        plog_fmt!(LogLevel::Error, "{} failed to start: {}", kind, e);
    }
    launcher.spawn_address_watchers().await;

    if args.test_connectivity {
        // Give the listeners a moment before probing.
        tokio::time::sleep(std::time::Duration::from_secs(5)).await;
        let report = launcher.test_connectivity().await;
        for line in report.summary() {
            plog_fmt!(LogLevel::Notice, "connectivity: {}", line);
        }
    }

    plog_fmt!(LogLevel::Notice, "services up; press Ctrl-C to stop");
    tokio::signal::ctrl_c().await?;

    plog_fmt!(LogLevel::Notice, "shutting down");
    launcher.shutdown();
    // Let the supervisor observe the exits before the runtime goes away.
    for kind in ServiceKind::ALL {
        let mut waited = std::time::Duration::ZERO;
        while launcher.state(kind) == anonode_rs::ProcessState::Stopping
            && waited < std::time::Duration::from_secs(10)
        {
            tokio::time::sleep(std::time::Duration::from_millis(50)).await;
            waited += std::time::Duration::from_millis(50);
        }
    }
    plog_fmt!(LogLevel::Notice, "goodbye");
    Ok(())
}
