use cybertank::{
    init_logging, sample_arrangement, transport::in_memory::InMemoryTransport, Bot, ClientConfig,
    FixtureBot, PlayMode, RandomStepBot, Session, SessionOutcome, SignalRTransport,
    DEFAULT_HUB_NAME, DEFAULT_PLAYER_NAME, DEFAULT_SERVER_URL,
};

use clap::{Parser, ValueEnum};
use rand::rngs::SmallRng;
use rand::SeedableRng;
use tokio::time::Duration;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum Mode {
    Fight,
    Debug,
    DebugTimeout,
}

impl From<Mode> for PlayMode {
    fn from(mode: Mode) -> Self {
        match mode {
            Mode::Fight => PlayMode::Fight,
            Mode::Debug => PlayMode::Debug,
            Mode::DebugTimeout => PlayMode::DebugTimeout,
        }
    }
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum BotKind {
    /// Sample arrangement, always steps at (1, 0).
    Fixture,
    /// Sample arrangement, random steps.
    Random,
}

#[derive(Parser)]
enum Commands {
    /// Connect to a CyberTank hub and play until it closes the connection.
    Play {
        #[arg(long, default_value = DEFAULT_SERVER_URL)]
        server: String,
        #[arg(long, default_value = DEFAULT_HUB_NAME)]
        hub: String,
        #[arg(long, default_value = DEFAULT_PLAYER_NAME)]
        name: String,
        #[arg(long, value_enum, default_value_t = Mode::Debug)]
        mode: Mode,
        #[arg(long, value_enum, default_value_t = BotKind::Fixture)]
        bot: BotKind,
        #[arg(long, help = "Fix RNG seed for reproducible steps (e.g., --seed 12345)")]
        seed: Option<u64>,
        #[arg(long, help = "Connect straight to the WebSocket endpoint")]
        skip_negotiation: bool,
        #[arg(long, default_value_t = 0, help = "Reconnect this many times after a failed session")]
        retries: u32,
        #[arg(long, default_value_t = 5)]
        retry_delay_secs: u64,
    },
    /// Play a scripted match against an in-process hub.
    Local {
        #[arg(long, default_value_t = 5)]
        turns: usize,
        #[arg(long, value_enum, default_value_t = BotKind::Random)]
        bot: BotKind,
        #[arg(long, help = "Fix RNG seed for reproducible steps (e.g., --seed 12345)")]
        seed: Option<u64>,
    },
}

fn make_rng(seed: Option<u64>) -> SmallRng {
    match seed {
        Some(s) => SmallRng::seed_from_u64(s),
        None => {
            let mut seed_rng = rand::rng();
            SmallRng::from_rng(&mut seed_rng)
        }
    }
}

fn make_bot(kind: BotKind, name: &str, seed: Option<u64>) -> Box<dyn Bot> {
    match kind {
        BotKind::Fixture => Box::new(FixtureBot::new(name)),
        BotKind::Random => Box::new(RandomStepBot::new(
            name,
            sample_arrangement(),
            make_rng(seed),
        )),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_logging();
    let cli = Cli::parse();

    match cli.command {
        Commands::Play {
            server,
            hub,
            name,
            mode,
            bot,
            seed,
            skip_negotiation,
            retries,
            retry_delay_secs,
        } => {
            let config = ClientConfig::new(server, mode.into(), name.clone())
                .with_hub_name(hub)
                .with_skip_negotiation(skip_negotiation);
            println!("Connecting to {} as {}...", config.hub_url(), name);
            if let Some(s) = seed {
                println!("Using fixed seed: {} (steps will be reproducible)", s);
            }

            let mut bot = make_bot(bot, &name, seed);
            let mut attempt = 0;
            loop {
                let transport = Box::new(SignalRTransport::new(&config));
                let mut session = Session::new(config.clone(), bot, transport);
                session.set_on_state_change(|state| println!("Session {}", state));

                let handle = session.handle();
                let ctrl_c = tokio::spawn(async move {
                    if tokio::signal::ctrl_c().await.is_ok() {
                        handle.stop();
                    }
                });
                let result = session.run().await;
                ctrl_c.abort();
                let dropped = session.dropped_events();
                bot = session.into_bot();

                match result {
                    Ok(SessionOutcome::Closed { reason }) => {
                        println!(
                            "Hub closed the connection{}",
                            reason.map(|r| format!(": {}", r)).unwrap_or_default()
                        );
                        if dropped > 0 {
                            println!("{} event(s) were dropped", dropped);
                        }
                        break;
                    }
                    Ok(SessionOutcome::Stopped) => {
                        println!("Stopped.");
                        break;
                    }
                    Err(e) if attempt < retries => {
                        attempt += 1;
                        eprintln!(
                            "Session ended with an error: {}. Retrying ({}/{}) in {}s...",
                            e, attempt, retries, retry_delay_secs
                        );
                        tokio::time::sleep(Duration::from_secs(retry_delay_secs)).await;
                    }
                    Err(e) => return Err(e.into()),
                }
            }
        }
        Commands::Local { turns, bot, seed } => {
            println!("Starting local match ({} turns)...", turns);
            if let Some(s) = seed {
                println!("Using fixed seed: {} (steps will be reproducible)", s);
            }
            let config = ClientConfig::default();
            let (transport, mut hub) = InMemoryTransport::pair();
            let mut session = Session::new(
                config.clone(),
                make_bot(bot, &config.player_name, seed),
                Box::new(transport),
            );

            let hub_future = async move { hub.play_scripted_match(turns).await };
            let (report, outcome) = tokio::join!(hub_future, session.run());
            let report = report?;
            outcome?;

            println!("{} started {} as {}", config.hub_url(), report.start_verb, report.player);
            for (i, step) in report.steps.iter().enumerate() {
                println!("Turn {}: ({}, {})", i + 1, step.x, step.y);
            }
        }
    }
    Ok(())
}
