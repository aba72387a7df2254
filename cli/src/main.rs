/*
    music-roast | Rust CLI tool that roasts your Spotify listening habits.
    Copyright (C) 2025  Israel Alberto Roldan Vega

    This program is free software: you can redistribute it and/or modify
    it under the terms of the GNU Affero General Public License as published
    by the Free Software Foundation, either version 3 of the License, or
    (at your option) any later version.

    This program is distributed in the hope that it will be useful,
    but WITHOUT ANY WARRANTY; without even the implied warranty of
    MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
    GNU Affero General Public License for more details.

    You should have received a copy of the GNU Affero General Public License
    along with this program.  If not, see <https://www.gnu.org/licenses/>.
*/

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use dotenvy::dotenv;
use log::{info, warn};
use roast_core::{
    profile::DEFAULT_TOP_LIMIT, AcquireOutcome, AuthCodeSpotify, AuthConfig, InboundQuery,
    RoastGenerator, Session, SessionId, SpotifyProvider, TasteProfiler, TasteReport,
    TokenAcquirer,
};
use std::fs::File;
use std::io::{self, IsTerminal, Write};
use std::process;

#[derive(Parser)]
#[command(name = "music-roast")]
#[command(about = "Roasts your Spotify listening habits", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Reuse the session of an earlier run (printed when a login is pending)
    #[arg(long, global = true, value_name = "SESSION_ID")]
    session: Option<String>,

    /// The URL Spotify redirected you to after login (or just its code)
    #[arg(long, global = true, value_name = "URL")]
    callback: Option<String>,

    /// Don't open a browser or listen for the redirect locally
    #[arg(long, global = true)]
    no_browser: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Shows your top tracks and roasts them (default)
    Roast {
        /// How many top tracks to fetch
        #[arg(long, short = 'n', default_value_t = DEFAULT_TOP_LIMIT)]
        limit: usize,
        /// Output the ranked tracks to a JSON file (e.g., --json=top.json)
        #[arg(long)]
        json: Option<String>,
    },
    /// Shows your top tracks with their genres, no roast
    Top {
        #[arg(long, short = 'n', default_value_t = DEFAULT_TOP_LIMIT)]
        limit: usize,
        #[arg(long)]
        json: Option<String>,
    },
    /// Logs in to Spotify and caches the credential for this session
    Login,
    /// Removes every cached Spotify login of this app
    ClearCache,
}

#[tokio::main]
async fn main() {
    env_logger::init();

    if dotenv().is_err() {
        // Silently ignore
    }

    let cli = Cli::parse();

    if let Err(e) = run(cli).await {
        eprintln!("[ERROR] {:#}", e);
        process::exit(1);
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let config = match AuthConfig::from_env() {
        Ok(config) => config.with_local_capture(!cli.no_browser),
        Err(e) => bail!(e.user_message()),
    };

    let mut session = match cli.session.as_deref() {
        Some(raw) => match SessionId::parse(raw) {
            Some(id) => Session::with_id(id),
            None => bail!("'{}' is not a valid session id", raw),
        },
        None => Session::new(),
    };
    let inbound = cli
        .callback
        .as_deref()
        .map(InboundQuery::parse)
        .unwrap_or_default();

    let provider = SpotifyProvider::new(&config);
    let acquirer = TokenAcquirer::new(config, provider);

    match cli.command.unwrap_or(Commands::Roast {
        limit: DEFAULT_TOP_LIMIT,
        json: None,
    }) {
        Commands::Roast { limit, json } => {
            let spotify = authenticate(&acquirer, &mut session, inbound).await?;
            let report = handle_top(spotify, limit, json.as_deref()).await?;
            handle_roast(&report).await;
        }
        Commands::Top { limit, json } => {
            let spotify = authenticate(&acquirer, &mut session, inbound).await?;
            handle_top(spotify, limit, json.as_deref()).await?;
        }
        Commands::Login => {
            authenticate(&acquirer, &mut session, inbound).await?;
            println!("[OK] Logged in to Spotify.");
            println!(
                "Reuse this login with: music-roast --session {}",
                session.ensure_session_id()
            );
        }
        Commands::ClearCache => {
            let removed = acquirer.clear_cache(&mut session)?;
            println!("[OK] Removed {} cached Spotify login(s).", removed);
        }
    }

    Ok(())
}

async fn authenticate(
    acquirer: &TokenAcquirer<SpotifyProvider>,
    session: &mut Session,
    inbound: InboundQuery,
) -> anyhow::Result<AuthCodeSpotify> {
    let mut outcome = acquirer.acquire(session, &inbound).await;

    if let AcquireOutcome::AwaitingUser { authorize_url } = &outcome {
        println!("Log in to Spotify to continue:");
        println!("  {}", authorize_url);

        if io::stdin().is_terminal() {
            println!();
            println!("After approving, paste the URL you were redirected to (or just the code):");
            io::stdout().flush().ok();
            let mut line = String::new();
            io::stdin()
                .read_line(&mut line)
                .context("Failed to read the redirect URL")?;
            let pasted = InboundQuery::parse(&line);
            if !pasted.is_empty() {
                outcome = acquirer.acquire(session, &pasted).await;
            }
        }
    }

    match outcome {
        AcquireOutcome::Authenticated { client, source } => {
            info!("Authenticated ({:?}), session {}", source, session.ensure_session_id());
            Ok(client)
        }
        AcquireOutcome::AwaitingUser { .. } => {
            println!();
            println!("Once you have approved access, run again with:");
            println!(
                "  music-roast --session {} --callback '<redirect URL>'",
                session.ensure_session_id()
            );
            process::exit(2);
        }
        AcquireOutcome::Failed(e) => bail!(e.user_message()),
    }
}

async fn handle_top(
    spotify: AuthCodeSpotify,
    limit: usize,
    json_path: Option<&str>,
) -> anyhow::Result<TasteReport> {
    let profiler = TasteProfiler::new(spotify);
    println!("Fetching your top {} tracks...", limit);

    let report = profiler
        .top_tracks(limit)
        .await
        .context("Failed to fetch your top tracks")?;

    if report.is_empty() {
        println!();
        println!("You need to listen to more music before I can roast you!");
        return Ok(report);
    }

    println!();
    println!("YOUR TOP SPOTIFY TRACKS");
    println!(
        "{:<4} | {:<30} | {:<22} | {:<30} | {:<5}",
        "Rank", "Track", "Artist(s)", "Genres", "Score"
    );
    println!(
        "{:-<4}-+-{:-<30}-+-{:-<22}-+-{:-<30}-+-{:-<5}",
        "", "", "", "", ""
    );
    for track in &report.tracks {
        println!(
            "{:<4} | {:<30} | {:<22} | {:<30} | {:<5}",
            track.rank,
            truncate(&track.name, 30),
            truncate(&track.artists, 22),
            truncate(&track.genres_label(), 30),
            track.ranking_score
        );
    }

    if let Some(path) = json_path {
        match File::create(path) {
            Ok(mut file) => {
                let json_content = serde_json::to_string_pretty(&report).unwrap_or_default();
                if let Err(e) = file.write_all(json_content.as_bytes()) {
                    eprintln!();
                    eprintln!("[ERROR] Failed to write report to file: {}", e);
                } else {
                    println!();
                    println!("[SAVED] Report saved to: {}", path);
                }
            }
            Err(e) => eprintln!("[ERROR] Failed to create file '{}': {}", path, e),
        }
    }

    Ok(report)
}

async fn handle_roast(report: &TasteReport) {
    if report.is_empty() {
        return;
    }

    let generator = match RoastGenerator::from_env() {
        Ok(generator) => generator,
        Err(e) => {
            warn!("Skipping roast: {}", e);
            eprintln!();
            eprintln!("[SKIPPED] No roast today: {}", e);
            return;
        }
    };

    println!();
    println!("---------------------------------------------------");
    println!("THE MUSIC ROAST");
    println!("---------------------------------------------------");
    match generator.roast(report).await {
        Ok(roast) => println!("> {}", roast),
        Err(e) => println!("(Gemini API Error) {}", e),
    }
    println!("---------------------------------------------------");
}

fn truncate(text: &str, width: usize) -> String {
    if text.chars().count() > width {
        let kept: String = text.chars().take(width.saturating_sub(2)).collect();
        format!("{}..", kept)
    } else {
        text.to_string()
    }
}
