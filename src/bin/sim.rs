use cybertank::{
    sample_arrangement, transport::in_memory::InMemoryTransport, ClientConfig, PlayMode,
    RandomStepBot, Session, SessionOutcome, DEFAULT_SERVER_URL,
};
use rand::{rngs::SmallRng, SeedableRng};
use serde_json::json;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args: Vec<String> = std::env::args().collect();
    if args.len() != 3 {
        eprintln!("Usage: {} <seed> <turns>", args[0]);
        std::process::exit(1);
    }
    let seed: u64 = args[1].parse()?;
    let turns: usize = args[2].parse()?;

    let config =
        ClientConfig::new(DEFAULT_SERVER_URL, PlayMode::Debug, "sim").with_hub_name("simHub");
    let mode = config.mode;
    let bot = RandomStepBot::new("sim", sample_arrangement(), SmallRng::seed_from_u64(seed));
    let (transport, mut hub) = InMemoryTransport::pair();
    let mut session = Session::new(config, Box::new(bot), Box::new(transport));

    let hub_future = async move {
        let report = hub.play_scripted_match(turns).await?;
        Ok::<_, anyhow::Error>((report, hub))
    };
    let (hub_res, outcome) = tokio::join!(hub_future, session.run());
    let (report, hub) = hub_res?;
    let reason = match outcome? {
        SessionOutcome::Closed { reason } => reason,
        SessionOutcome::Stopped => None,
    };

    let result = json!({
        "mode": mode.verb(),
        "start_verb": report.start_verb,
        "player": report.player,
        "occupied": report.arrangement.as_ref().map(|a| a.occupied()),
        "steps": report.steps.iter().map(|s| [s.x, s.y]).collect::<Vec<_>>(),
        "state": session.state().to_string(),
        "close_reason": reason,
        "transport_stops": hub.stop_count(),
    });

    println!("{}", serde_json::to_string(&result)?);
    Ok(())
}
