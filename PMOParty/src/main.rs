//! PMOParty - soirée de visionnage simulée
//!
//! Runs several synchronization engines in one process, connected through an
//! in-memory room, and plays a short script of user actions against them:
//! play, seek, pause, an episode switch by the leader, a member leaving and
//! coming back. The final state of every player is printed at the end.
//!
//! # Usage
//!
//! ```bash
//! cargo run -p PMOParty -- --members 4 --seconds 25
//! cargo run -p PMOParty -- --config-dir /tmp/pmoparty
//! ```

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use parking_lot::Mutex;
use pmoconfig::{Config, get_config};
use pmosync::{
    ContentInfo, LocalRoom, MemberId, SessionEvent, SimulatedPlayer, SyncHandle, SyncSession,
    SyncSettings, logs::init_logging,
};
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use tokio::time::{Instant, sleep_until};
use tracing::{info, warn};

/// Simulated watch party
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Number of room members (the first one leads)
    #[arg(short, long, default_value_t = 3, value_parser = clap::value_parser!(u8).range(2..=16))]
    members: u8,

    /// Duration of the scripted session
    #[arg(short, long, default_value_t = 20)]
    seconds: u64,

    /// Configuration directory (config.yaml)
    #[arg(long, env = "PMOSYNC_CONFIG")]
    config_dir: Option<PathBuf>,
}

#[derive(Debug, Clone, Copy)]
enum Action {
    Play(usize),
    Pause(usize),
    Seek(usize, f64),
    Switch(u32),
    Leave(usize),
    Join(usize),
}

impl Action {
    fn member(&self) -> Option<usize> {
        match self {
            Action::Play(m) | Action::Pause(m) | Action::Seek(m, _) => Some(*m),
            Action::Leave(m) | Action::Join(m) => Some(*m),
            Action::Switch(_) => None,
        }
    }
}

const SCRIPT: &[(u64, Action)] = &[
    (500, Action::Play(0)),
    (3_000, Action::Seek(1, 120.0)),
    (6_000, Action::Pause(2)),
    (7_500, Action::Play(1)),
    (9_000, Action::Switch(2)),
    (12_000, Action::Leave(1)),
    (14_000, Action::Seek(0, 300.0)),
    (16_000, Action::Join(1)),
];

struct Guest {
    id: MemberId,
    player: Arc<Mutex<SimulatedPlayer>>,
    handle: SyncHandle,
    episode: Arc<Mutex<u32>>,
    navigation: JoinHandle<()>,
}

fn episode(n: u32) -> ContentInfo {
    ContentInfo::new("1399", "vidsrc", format!("https://cdn.example/1399/s01e{n:02}.m3u8"))
        .with_name("Game of Thrones")
        .with_episode(n)
}

/// Follows the leader's content announcements, as the surrounding
/// application would by navigating.
fn follow_leader(id: MemberId, handle: SyncHandle, shown: Arc<Mutex<u32>>) -> JoinHandle<()> {
    let mut events = handle.events();
    tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(SessionEvent::Navigate(state)) => {
                    info!(
                        member = %id,
                        episode = state.content.effective_episode(),
                        "🔀 Navigating to the leader's content"
                    );
                    *shown.lock() = state.content.effective_episode();
                    if handle.set_content(state.content).is_err() {
                        break;
                    }
                }
                Ok(SessionEvent::RoleChanged(role)) => {
                    info!(member = %id, role = %role, "👑 Role changed");
                }
                Err(RecvError::Lagged(n)) => warn!(member = %id, "Missed {} session events", n),
                Err(RecvError::Closed) => break,
            }
        }
    })
}

fn load_config(dir: Option<&PathBuf>) -> Result<Arc<Config>> {
    match dir {
        Some(dir) => {
            let dir = dir.to_string_lossy();
            let config = Config::load_config(&dir)
                .with_context(|| format!("Cannot load configuration from {}", dir))?;
            Ok(Arc::new(config))
        }
        None => Ok(get_config()),
    }
}

async fn run_script(room: &LocalRoom, guests: &[Guest], seconds: u64) {
    let start = Instant::now();

    for (at, action) in SCRIPT {
        if *at >= seconds * 1000 {
            break;
        }
        if action.member().is_some_and(|m| m >= guests.len()) {
            continue;
        }
        sleep_until(start + Duration::from_millis(*at)).await;
        info!(at_ms = *at, ?action, "🎬 Script step");

        match *action {
            Action::Play(m) => guests[m].player.lock().user_play(),
            Action::Pause(m) => guests[m].player.lock().user_pause(),
            Action::Seek(m, position) => guests[m].player.lock().user_seek(position),
            Action::Switch(n) => match guests[0].handle.set_content(episode(n)) {
                Ok(()) => *guests[0].episode.lock() = n,
                Err(e) => warn!("⚠️ Cannot switch content: {}", e),
            },
            Action::Leave(m) => {
                if let Err(e) = room.leave(&guests[m].id) {
                    warn!("⚠️ {} cannot leave: {}", guests[m].id, e);
                }
            }
            Action::Join(m) => {
                if let Err(e) = room.join(&guests[m].id) {
                    warn!("⚠️ {} cannot join: {}", guests[m].id, e);
                }
            }
        }
    }

    sleep_until(start + Duration::from_secs(seconds)).await;
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let config = load_config(args.config_dir.as_ref())?;
    let _log_state = init_logging(&config);
    let settings = SyncSettings::from_config(&config)?;
    info!(?settings, "⚙️ Sync settings loaded");

    let local_id = config.get_member_id()?;
    let room = LocalRoom::new();
    let mut guests = Vec::new();

    for index in 0..usize::from(args.members) {
        let id = if index == 0 {
            MemberId::new(local_id.clone())
        } else {
            MemberId::new(format!("guest-{}", index))
        };
        let transport = room.connect(id.clone());
        transport.join()?;

        let player = Arc::new(Mutex::new(SimulatedPlayer::new(id.to_string())));
        let handle = SyncSession::new(Arc::new(transport), settings.clone())
            .with_player(player.clone())
            .with_content(episode(1))
            .spawn();
        let episode_shown = Arc::new(Mutex::new(1));
        let navigation = follow_leader(id.clone(), handle.clone(), episode_shown.clone());

        info!(member = %id, leader = handle.is_owner(), "🎟️ Member joined the party");
        guests.push(Guest {
            id,
            player,
            handle,
            episode: episode_shown,
            navigation,
        });
    }

    tokio::select! {
        _ = run_script(&room, &guests, args.seconds) => {}
        _ = tokio::signal::ctrl_c() => info!("🛑 Interrupted"),
    }

    println!();
    println!("{:<38} {:<9} {:>7} {:>10} {:>8}", "member", "role", "episode", "position", "state");
    for guest in &guests {
        let (position, paused) = {
            let player = guest.player.lock();
            (player.position(), player.is_paused())
        };
        println!(
            "{:<38} {:<9} {:>7} {:>10.2} {:>8}",
            guest.id.to_string(),
            guest.handle.role().to_string(),
            *guest.episode.lock(),
            position,
            if paused { "paused" } else { "playing" }
        );
    }

    for guest in guests {
        guest.handle.shutdown().await;
        guest.navigation.abort();
    }
    info!("👋 Party over");
    Ok(())
}
