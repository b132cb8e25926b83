use std::path::Path;

use anyhow::Context;

use crate::cli::{Cli, Commands};
use owa_probe::concurrent::{Credential, SprayRunner};
use owa_probe::config::ProbeConfig;
use owa_probe::probe::{test_endpoint, test_proxy, NOT_FOUND};
use owa_probe::session::ProbeSession;

pub async fn run_from_cli(cli: Cli) -> anyhow::Result<()> {
    // Keep reqwest/hyper at INFO so --debug shows our own handshake steps only.
    use tracing_subscriber::EnvFilter;
    let crate_level = if cli.debug { "debug" } else if cli.verbose { "info" } else { "warn" };
    let filter_str = format!(
        "owa_probe={crate},reqwest=info,hyper=info,h2=info",
        crate = crate_level
    );
    let env_filter = EnvFilter::try_new(&filter_str).unwrap_or_else(|_| EnvFilter::new(crate_level));
    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_ansi(true)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let config = build_config(&cli)?;
    let session = ProbeSession::new(&config).context("setting up probe session")?;
    if let Some(proxy) = session.proxy() {
        tracing::info!(proxy = %proxy, "using proxy");
    }

    let outcome = match cli.command {
        Commands::Domain { url } => handle_domain(&session, &url).await,
        Commands::Check { url } => handle_check(&session, &url).await,
        Commands::ProxyTest { url } => handle_proxy_test(&session, &url).await,
        Commands::Spray { url, users, passwords, concurrency } => {
            let concurrency = concurrency.unwrap_or(config.concurrency);
            handle_spray(&session, &url, &users, &passwords, concurrency).await
        }
    };
    session.close();
    outcome
}

/// Config file (or defaults), then command-line overrides.
fn build_config(cli: &Cli) -> anyhow::Result<ProbeConfig> {
    let mut config = match cli.config {
        Some(ref path) => ProbeConfig::from_file(path)?,
        None => ProbeConfig::default(),
    };
    if let Some(ref proxy) = cli.proxy {
        config.proxy_url = Some(proxy.clone());
    }
    if let Some(ref ua) = cli.user_agent {
        config.user_agent = ua.clone();
    }
    if let Some(timeout) = cli.timeout {
        config.timeout_secs = timeout;
    }
    if let Some(retries) = cli.retries {
        config.max_retries = retries;
    }
    for (name, value) in &cli.headers {
        config.custom_headers.insert(name.clone(), value.clone());
    }
    if let Some(ref xff) = cli.xff {
        config.forwarded_for = Some(xff.clone());
    }
    Ok(config)
}

async fn handle_domain(session: &ProbeSession, url: &str) -> anyhow::Result<()> {
    match session.fingerprinter().fingerprint(url).await {
        Ok(Some(challenge)) => {
            println!(
                "Internal Domain: {}",
                challenge.netbios_domain().unwrap_or(NOT_FOUND)
            );
            for (name, value) in challenge.target_info.to_map() {
                println!("  {name}: {value}");
            }
        }
        Ok(None) => println!("Internal Domain: {NOT_FOUND}"),
        Err(e) => {
            tracing::warn!(error = %e, "fingerprint failed");
            println!("Internal Domain: {NOT_FOUND}");
        }
    }
    Ok(())
}

async fn handle_check(session: &ProbeSession, url: &str) -> anyhow::Result<()> {
    let report = test_endpoint(session.executor(), session.headers(), url).await;
    println!("{}", report.message);
    if !report.success {
        anyhow::bail!("{url} is not reachable");
    }
    Ok(())
}

async fn handle_proxy_test(session: &ProbeSession, url: &str) -> anyhow::Result<()> {
    if session.proxy().is_none() {
        tracing::warn!("no proxy configured, testing the direct connection");
    }
    let report = test_proxy(session.executor(), url).await;
    println!("{}", report.message);
    if !report.success {
        anyhow::bail!("proxy test failed");
    }
    Ok(())
}

async fn handle_spray(
    session: &ProbeSession,
    url: &str,
    users: &Path,
    passwords: &Path,
    concurrency: usize,
) -> anyhow::Result<()> {
    let usernames = read_lines(users)?;
    let passwords = read_lines(passwords)?;
    let credentials = Credential::cross(&usernames, &passwords);
    tracing::info!(
        target_url = url,
        users = usernames.len(),
        passwords = passwords.len(),
        concurrency,
        "starting spray"
    );

    let runner = SprayRunner::new(session.credential_probe(), concurrency);
    let mut valid = 0usize;
    runner
        .run_each(url, credentials, |result| {
            if result.credential_valid {
                valid += 1;
            }
            match serde_json::to_string(result) {
                Ok(line) => println!("{line}"),
                Err(e) => tracing::warn!(username = %result.username, error = %e, "cannot encode result"),
            }
        })
        .await;

    let (completed, errors) = runner.stats();
    tracing::info!(completed, errors, valid, "spray finished");
    Ok(())
}

/// Non-empty lines, trailing whitespace stripped.
fn read_lines(path: &Path) -> anyhow::Result<Vec<String>> {
    let data = std::fs::read_to_string(path)
        .with_context(|| format!("reading {}", path.display()))?;
    let lines: Vec<String> = data
        .lines()
        .map(|l| l.trim_end().to_string())
        .filter(|l| !l.is_empty())
        .collect();
    if lines.is_empty() {
        anyhow::bail!("{} is empty", path.display());
    }
    Ok(lines)
}
